// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::{Duration, Instant};

/// How often arriving frames are persisted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SaveCadence {
    /// Save when at least this much time has passed since the previous save.
    /// Zero saves every frame.
    Interval(Duration),

    /// Save frames whose frame id is a multiple of N.
    EveryNthFrame(u64),
}

/// Decides, once per arriving frame, whether that frame is saved.
#[derive(Debug)]
pub struct SaveGate {
    cadence: SaveCadence,
    last_save: Option<Instant>,
    saves: u64,
}

impl SaveGate {
    pub fn new(cadence: SaveCadence) -> Self {
        SaveGate{cadence, last_save: None, saves: 0}
    }

    pub fn cadence(&self) -> SaveCadence {
        self.cadence
    }

    /// Returns true if the frame arriving at `now` should be saved, and if so
    /// records `now` as the time of the latest save. The first frame under an
    /// interval cadence is always saved.
    pub fn should_save(&mut self, now: Instant, frame_id: u64) -> bool {
        let due = match self.cadence {
            SaveCadence::Interval(interval) => match self.last_save {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= interval,
            },
            SaveCadence::EveryNthFrame(n) => n <= 1 || frame_id % n == 0,
        };
        if due {
            self.last_save = Some(now);
            self.saves += 1;
        }
        due
    }

    /// Number of frames let through so far.
    pub fn saves(&self) -> u64 {
        self.saves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_gate() {
        let start = Instant::now();
        let mut gate = SaveGate::new(SaveCadence::Interval(Duration::from_secs(5)));
        assert!(gate.should_save(start, 0));
        assert!(!gate.should_save(start + Duration::from_millis(4999), 1));
        // Exactly the interval is due.
        assert!(gate.should_save(start + Duration::from_secs(5), 2));
        // Elapsed time is measured from the latest save, not from the start.
        assert!(!gate.should_save(start + Duration::from_secs(9), 3));
        assert!(gate.should_save(start + Duration::from_secs(10), 4));
        assert_eq!(gate.saves(), 3);
    }

    #[test]
    fn test_interval_gate_fires_once_per_frame() {
        let start = Instant::now();
        let mut gate = SaveGate::new(SaveCadence::Interval(Duration::from_secs(1)));
        assert!(gate.should_save(start, 0));
        let later = start + Duration::from_secs(3);
        assert!(gate.should_save(later, 1));
        // Same instant again (e.g. a second call for the same frame).
        assert!(!gate.should_save(later, 1));
    }

    #[test]
    fn test_zero_interval_saves_everything() {
        let start = Instant::now();
        let mut gate = SaveGate::new(SaveCadence::Interval(Duration::ZERO));
        for i in 0..5 {
            assert!(gate.should_save(start, i));
        }
    }

    #[test]
    fn test_clock_going_backwards_is_not_due() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut gate = SaveGate::new(SaveCadence::Interval(Duration::from_secs(1)));
        assert!(gate.should_save(start, 0));
        assert!(!gate.should_save(start - Duration::from_secs(5), 1));
    }

    #[test]
    fn test_every_nth_frame() {
        let mut gate = SaveGate::new(SaveCadence::EveryNthFrame(8));
        let now = Instant::now();
        let saved: Vec<u64> = (0..20).filter(|id| gate.should_save(now, *id)).collect();
        assert_eq!(saved, vec![0, 8, 16]);

        let mut gate = SaveGate::new(SaveCadence::EveryNthFrame(0));
        assert!(gate.should_save(now, 3));
    }
}
