//! Per-frame counters exposed after every `render_scene`.

use std::time::Instant;

/// Snapshot of the last completed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frame_time_ms: f32,
    pub draw_calls: u32,
    pub triangles: u64,
    pub lights_processed: u32,
    pub shadow_maps_rendered: u32,
    pub shadow_draw_calls: u32,
    /// Objects without a mesh, invisible, or whose mesh is not uploaded.
    pub skipped_objects: u32,
    /// Objects outside the camera frustum.
    pub culled_objects: u32,
    pub frame_index: u64,
}

/// Accumulates counters for the frame in flight.
#[derive(Debug)]
pub(crate) struct FrameTimer {
    start: Instant,
    pub(crate) stats: FrameStats,
}

impl FrameTimer {
    pub(crate) fn start(frame_index: u64) -> Self {
        Self {
            start: Instant::now(),
            stats: FrameStats {
                frame_index,
                ..Default::default()
            },
        }
    }

    pub(crate) fn finish(mut self) -> FrameStats {
        self.stats.frame_time_ms = self.start.elapsed().as_secs_f32() * 1000.0;
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_keeps_frame_index_and_counts() {
        let mut timer = FrameTimer::start(9);
        timer.stats.draw_calls += 2;
        let stats = timer.finish();
        assert_eq!(stats.frame_index, 9);
        assert_eq!(stats.draw_calls, 2);
        assert!(stats.frame_time_ms >= 0.0);
    }
}
