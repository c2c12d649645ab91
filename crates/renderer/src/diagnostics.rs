//! Rate-limited logging for recoverable resource problems.

use std::collections::HashSet;
use std::fmt::Display;

/// Emits each (stage, id) warning once for the lifetime of the renderer.
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: HashSet<(&'static str, String)>,
}

impl WarnOnce {
    /// Log `message` unless this stage already warned about `id`. Returns whether it logged.
    pub fn warn(&mut self, stage: &'static str, id: &str, message: impl Display) -> bool {
        if self.seen.insert((stage, id.to_owned())) {
            log::warn!("[{stage}] {id}: {message}");
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_suppressed_per_stage_and_id() {
        let mut warnings = WarnOnce::default();
        assert!(warnings.warn("lighting", "lamp", "no IES profile"));
        assert!(!warnings.warn("lighting", "lamp", "no IES profile"));
        assert!(warnings.warn("geometry", "lamp", "missing texture"));
        assert_eq!(warnings.count(), 2);
    }
}
