//! Core spatial and timing types shared by the renderer and its collaborators.
//!
//! This crate provides the foundational types the pipeline consumes:
//! - Transform for object placement
//! - Bounding volumes and view frusta for culling and shadow fitting
//! - Frame timing

pub mod bounds;
pub mod time;
pub mod transform;

pub use bounds::*;
pub use time::*;
pub use transform::*;

// Re-export commonly used types
pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
