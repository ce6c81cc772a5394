//! Narrative text generation.

use async_trait::async_trait;
use chat::{Chat, Message, Request};
use thiserror::Error;
use tracing::debug;

const GENERATION_TEMPERATURE: f32 = 0.9;
const GENERATION_MAX_TOKENS: usize = 400;

/// Errors from the text generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generator request failed: {0}")]
    Api(#[from] chat::Error),

    #[error("Generator returned an empty response")]
    Empty,

    #[error("Generator unavailable: {0}")]
    Unavailable(String),
}

/// Produces the Dungeon Master's reply for one turn.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `context` is the assembled memory for this turn.
    async fn generate(&self, context: &str, player_input: &str) -> Result<String, GenerationError>;
}

/// Generator backed by a chat model.
pub struct LlmGenerator {
    client: Chat,
    model: Option<String>,
    max_tokens: usize,
}

impl LlmGenerator {
    pub fn new(client: Chat) -> Self {
        Self {
            client,
            model: None,
            max_tokens: GENERATION_MAX_TOKENS,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn generate(&self, context: &str, player_input: &str) -> Result<String, GenerationError> {
        let mut request = Request::new(vec![Message::user(turn_prompt(context, player_input))])
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(self.max_tokens)
            .with_temperature(GENERATION_TEMPERATURE);
        if let Some(model) = &self.model {
            request = request.with_model(model);
        }

        let response = self.client.complete(request).await?;
        let text = response.text().trim();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        debug!(chars = text.len(), "narration generated");
        Ok(text.to_string())
    }
}

const SYSTEM_PROMPT: &str = "You are a Dungeon Master narrating an interactive adventure. \
Continue the story from the player's action in no more than 120 words. \
Create roadblocks and complications for the player; if a problem is very hard, help them a little. \
Keep every established world fact consistent with the memory you are given. \
When the player says to start, begin a new story.";

fn turn_prompt(context: &str, player_input: &str) -> String {
    if context.trim().is_empty() {
        format!("Player: {player_input}\nDM:")
    } else {
        format!("Memory:\n{context}\n\nPlayer: {player_input}\nDM:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_prompt_includes_memory() {
        let prompt = turn_prompt("Recent relevant events:\n- the cave", "light torch");
        assert!(prompt.starts_with("Memory:\nRecent relevant events:"));
        assert!(prompt.ends_with("Player: light torch\nDM:"));
    }

    #[test]
    fn test_turn_prompt_without_memory() {
        assert_eq!(turn_prompt("  ", "start"), "Player: start\nDM:");
    }

    #[test]
    fn test_system_prompt_mentions_word_limit() {
        assert!(SYSTEM_PROMPT.contains("120 words"));
    }
}
