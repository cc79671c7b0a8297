//! Gap-free scheduling of inbound frames on the output clock.

use crate::{audio::AudioFrame, device::PlaybackId};
use std::{collections::BTreeMap, sync::Arc};

/// A frame placed on the output timeline.
#[derive(Debug, Clone)]
pub struct ScheduledPlayback {
    pub id: PlaybackId,
    pub frame: Arc<AudioFrame>,
    pub start_at: f64,
}

impl ScheduledPlayback {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.frame.duration()
    }
}

/// Tracks the playback queue and the cursor where the next frame starts.
///
/// Frames are laid back to back in arrival order. If the output clock has
/// already passed the cursor when a frame arrives, the cursor catches up to
/// the clock first, so nothing is ever scheduled in the past.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    next_id: u64,
    queue: BTreeMap<PlaybackId, ScheduledPlayback>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `frame` at the cursor (or at `now` after a stall) and advances
    /// the cursor by the frame's duration.
    pub fn schedule(&mut self, now: f64, frame: Arc<AudioFrame>) -> ScheduledPlayback {
        if self.next_start < now {
            self.next_start = now;
        }
        self.next_id += 1;
        let entry = ScheduledPlayback {
            id: PlaybackId(self.next_id),
            start_at: self.next_start,
            frame,
        };
        self.next_start += entry.frame.duration();
        self.queue.insert(entry.id, entry.clone());
        entry
    }

    /// Drops a finished entry. Returns false if it was already gone.
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        self.queue.remove(&id).is_some()
    }

    /// Empties the queue and resets the cursor to zero, returning the ids
    /// that still need stopping on the output.
    pub fn flush(&mut self) -> Vec<PlaybackId> {
        self.next_start = 0.0;
        std::mem::take(&mut self.queue).into_keys().collect()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn get(&self, id: PlaybackId) -> Option<&ScheduledPlayback> {
        self.queue.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn frame(seconds: f64) -> Arc<AudioFrame> {
        let samples = (seconds * 24_000.0).round() as usize;
        Arc::new(AudioFrame::new(vec![0.0; samples], 1, 24_000))
    }

    #[test]
    fn frames_arriving_early_play_back_to_back() {
        let mut scheduler = PlaybackScheduler::new();
        let durations = [0.5, 0.25, 1.0, 0.125];
        let mut now = 0.0;
        let mut previous: Option<ScheduledPlayback> = None;
        for d in durations {
            let entry = scheduler.schedule(now, frame(d));
            if let Some(prev) = &previous {
                assert_abs_diff_eq!(entry.start_at, prev.start_at + prev.frame.duration());
            }
            previous = Some(entry);
            now += 0.01;
        }
        assert_abs_diff_eq!(scheduler.next_start(), 1.875);
        assert_eq!(scheduler.len(), 4);
    }

    #[test]
    fn stalled_cursor_catches_up_to_clock() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(0.0, frame(0.5));
        let late = scheduler.schedule(3.0, frame(0.5));
        assert_abs_diff_eq!(late.start_at, 3.0);
        assert_abs_diff_eq!(scheduler.next_start(), 3.5);
    }

    #[test]
    fn flush_clears_queue_and_resets_cursor() {
        let mut scheduler = PlaybackScheduler::new();
        let a = scheduler.schedule(1.0, frame(0.5));
        let b = scheduler.schedule(1.0, frame(0.5));
        let flushed = scheduler.flush();
        assert_eq!(flushed, vec![a.id, b.id]);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_start(), 0.0);

        let next = scheduler.schedule(2.25, frame(0.5));
        assert_abs_diff_eq!(next.start_at, 2.25);
    }

    #[test]
    fn complete_removes_only_once() {
        let mut scheduler = PlaybackScheduler::new();
        let entry = scheduler.schedule(0.0, frame(0.1));
        assert!(scheduler.complete(entry.id));
        assert!(!scheduler.complete(entry.id));
        // Completion never moves the cursor.
        assert_abs_diff_eq!(scheduler.next_start(), 0.1);
    }

    #[test]
    fn ids_are_unique_across_flushes() {
        let mut scheduler = PlaybackScheduler::new();
        let a = scheduler.schedule(0.0, frame(0.1));
        scheduler.flush();
        let b = scheduler.schedule(0.0, frame(0.1));
        assert_ne!(a.id, b.id);
    }
}
