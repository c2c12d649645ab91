//! Post-processing: configuration, the fixed stage order and the CPU chain.

pub mod bloom;
pub mod chain;
pub mod config;
pub mod effects;
pub mod pingpong;
pub mod ssao;
pub mod stage;
pub mod tonemap;

pub use chain::{GBufferView, PostFrame, PostProcessChain};
pub use config::{Effect, EffectToggles, OptionValue, PostProcessConfig, PostProcessParams, ToneMapOperator};
pub use pingpong::PingPong;
pub use stage::{plan, AntiAliasing, PostPlan, PostStage, PIPELINE_ORDER};
