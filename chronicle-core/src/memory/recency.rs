//! Working memory: the last few turns, kept verbatim.
//!
//! A sliding window over the conversation. The window never grows past its
//! capacity; the oldest turn is evicted first.

use super::turn::Turn;
use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent turns.
#[derive(Debug, Clone)]
pub struct RecencyBuffer {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl RecencyBuffer {
    /// Create a buffer holding at most `capacity` turns (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, evicting the oldest when full.
    pub fn push(&mut self, turn: Turn) {
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Iterate over the current turns, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Copy of the current turns, oldest first.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// Drop every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> Turn {
        Turn::new(format!("action {i}"), format!("narration {i}"))
    }

    #[test]
    fn test_buffer_creation() {
        let buffer = RecencyBuffer::new(6);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 6);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = RecencyBuffer::new(0);
        buffer.push(turn(0));
        buffer.push(turn(1));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_eviction_keeps_last_turns_in_order() {
        let mut buffer = RecencyBuffer::new(4);
        for i in 0..11 {
            buffer.push(turn(i));
            assert!(buffer.len() <= 4);
        }

        let players: Vec<_> = buffer.iter().map(|t| t.player_text.as_str()).collect();
        assert_eq!(players, vec!["action 7", "action 8", "action 9", "action 10"]);
    }

    #[test]
    fn test_capacity_one_keeps_latest() {
        let mut buffer = RecencyBuffer::new(1);
        buffer.push(Turn::new("go north", "You enter a cave."));
        buffer.push(Turn::new("light torch", "The cave is now lit."));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].player_text, "light torch");
        assert_eq!(snapshot[0].dm_text, "The cave is now lit.");
    }

    #[test]
    fn test_clear() {
        let mut buffer = RecencyBuffer::new(3);
        buffer.push(turn(0));
        buffer.push(turn(1));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
    }
}
