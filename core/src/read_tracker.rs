/// Outbound read-advance watermarks, one per room
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ReadTracker {
    sent: HashMap<String, u64>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last watermark emitted for the room (0 if none)
    pub fn last_sent(&self, room_id: &str) -> u64 {
        self.sent.get(room_id).copied().unwrap_or(0)
    }

    /// Record `seen` if it beats the last emitted watermark and return it.
    ///
    /// The value is recorded at emission time, so a failed dispatch is not
    /// retried until a higher id shows up.
    pub fn observe(&mut self, room_id: &str, seen: Option<u64>) -> Option<u64> {
        let seen = seen?;
        if seen <= self.last_sent(room_id) {
            return None;
        }
        self.sent.insert(room_id.to_string(), seen);
        Some(seen)
    }

    pub fn forget(&mut self, room_id: &str) {
        self.sent.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_once_per_increase() {
        let mut tracker = ReadTracker::new();
        assert_eq!(tracker.observe("r", Some(5)), Some(5));
        assert_eq!(tracker.observe("r", Some(5)), None);
        assert_eq!(tracker.observe("r", Some(3)), None);
        assert_eq!(tracker.observe("r", Some(8)), Some(8));
        assert_eq!(tracker.last_sent("r"), 8);
    }

    #[test]
    fn test_rooms_are_independent() {
        let mut tracker = ReadTracker::new();
        tracker.observe("a", Some(10));
        assert_eq!(tracker.observe("b", Some(2)), Some(2));
        assert_eq!(tracker.observe("x", None), None);
    }

    #[test]
    fn test_forget_resets_watermark() {
        let mut tracker = ReadTracker::new();
        tracker.observe("a", Some(10));
        tracker.forget("a");
        assert_eq!(tracker.last_sent("a"), 0);
    }
}
