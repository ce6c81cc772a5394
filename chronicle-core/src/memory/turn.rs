//! A single completed exchange between the player and the DM.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// One player action and the narration it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// When the turn was committed.
    pub timestamp: DateTime<Utc>,
    /// What the player typed.
    pub player_text: String,
    /// What the DM answered.
    pub dm_text: String,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(player_text: impl Into<String>, dm_text: impl Into<String>) -> Self {
        Self::at(Utc::now(), player_text, dm_text)
    }

    /// Create a turn with an explicit timestamp.
    pub fn at(
        timestamp: DateTime<Utc>,
        player_text: impl Into<String>,
        dm_text: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            player_text: player_text.into(),
            dm_text: dm_text.into(),
        }
    }

    /// Canonical text stored in the episodic archive.
    pub fn episode_text(&self) -> String {
        episode_text(&self.player_text, &self.dm_text)
    }

    /// One-line rendering used in prompt context.
    pub fn summary_line(&self) -> String {
        format!("- Player: {} | DM: {}", self.player_text, self.dm_text)
    }

    /// One-line rendering with a local wall-clock timestamp.
    pub fn timestamped_line(&self) -> String {
        let local = self.timestamp.with_timezone(&Local);
        format!(
            "- [{}] Player: {} | DM: {}",
            local.format("%Y-%m-%d %H:%M:%S"),
            self.player_text,
            self.dm_text
        )
    }
}

/// Format a player/DM pair the way the archive stores it.
pub fn episode_text(player_text: &str, dm_text: &str) -> String {
    format!("Player: {player_text}\nDM: {dm_text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_text() {
        let turn = Turn::new("go north", "You enter a cave.");
        assert_eq!(turn.episode_text(), "Player: go north\nDM: You enter a cave.");
    }

    #[test]
    fn test_summary_line() {
        let turn = Turn::new("light torch", "The cave is now lit.");
        assert_eq!(
            turn.summary_line(),
            "- Player: light torch | DM: The cave is now lit."
        );
        assert!(turn.timestamped_line().starts_with("- ["));
        assert!(turn
            .timestamped_line()
            .ends_with("] Player: light torch | DM: The cave is now lit."));
    }
}
