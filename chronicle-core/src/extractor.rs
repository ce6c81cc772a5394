//! Entity and relationship extraction from narrative text.
//!
//! A language model reads a span of story and answers with JSON describing
//! who and what appears in it. The answer is best-effort: models wrap JSON in
//! prose or markdown, leave trailing commas, or stop mid-object. Anything
//! that cannot be recovered becomes `None`; extraction never fails loudly.

use async_trait::async_trait;
use chat::{Chat, Message, Request};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Type assumed for entities the model did not classify.
const DEFAULT_ENTITY_TYPE: &str = "Other";

/// Maximum tokens for the extraction response.
const EXTRACTION_MAX_TOKENS: usize = 1024;

lazy_static! {
    static ref TRAILING_COMMA: Option<Regex> = Regex::new(r",\s*([}\]])").ok();
}

/// Structured facts pulled out of a span of text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Extraction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relationships: Vec<ExtractedRelationship>,
}

impl Extraction {
    /// Names of every entity with a non-empty name, in order.
    pub fn entity_names(&self) -> Vec<String> {
        self.entities
            .iter()
            .filter_map(|e| e.name())
            .map(str::to_string)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// An entity as reported by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractedEntity {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default, deserialize_with = "attribute_map")]
    pub attributes: BTreeMap<String, String>,
}

impl ExtractedEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            entity_type: Some(entity_type.into()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The trimmed name, if there is one.
    pub fn name(&self) -> Option<&str> {
        non_empty(self.name.as_deref())
    }

    pub fn entity_type(&self) -> &str {
        non_empty(self.entity_type.as_deref()).unwrap_or(DEFAULT_ENTITY_TYPE)
    }
}

/// A directed relationship as reported by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractedRelationship {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    relation: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

impl ExtractedRelationship {
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            relation: Some(relation.into()),
            target: Some(target.into()),
        }
    }

    pub fn source(&self) -> Option<&str> {
        non_empty(self.source.as_deref())
    }

    /// Raw relation text; normalization happens in the graph.
    pub fn relation(&self) -> &str {
        self.relation.as_deref().unwrap_or("")
    }

    pub fn target(&self) -> Option<&str> {
        non_empty(self.target.as_deref())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept any JSON object as attributes; non-string values keep their JSON text.
fn attribute_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect())
}

/// Something that can turn narrative text into entities and relationships.
///
/// `None` means the extractor could not produce a usable answer. Callers
/// decide whether that is an empty result or a reason to skip work.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Option<Extraction>;
}

/// Parse a model response into an [`Extraction`].
///
/// Takes the first balanced JSON object in `raw`, tries it as-is, then again
/// with trailing commas removed.
pub fn parse_extraction(raw: &str) -> Option<Extraction> {
    let Some(json) = extract_first_json(raw) else {
        debug!("no JSON object in extraction response");
        return None;
    };

    match serde_json::from_str(json) {
        Ok(extraction) => Some(extraction),
        Err(first) => {
            let repaired = TRAILING_COMMA.as_ref()?.replace_all(json, "$1");
            match serde_json::from_str(&repaired) {
                Ok(extraction) => {
                    debug!(error = %first, "repaired malformed extraction JSON");
                    Some(extraction)
                }
                Err(e) => {
                    debug!(error = %e, "unparseable extraction JSON");
                    None
                }
            }
        }
    }
}

/// The first `{ ... }` span with balanced braces, ignoring braces in strings.
fn extract_first_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extractor backed by a chat model at temperature 0.
pub struct LlmExtractor {
    client: Chat,
    model: Option<String>,
}

impl LlmExtractor {
    pub fn new(client: Chat) -> Self {
        Self {
            client,
            model: None,
        }
    }

    /// Use a different model than the client's default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl EntityExtractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Option<Extraction> {
        let mut request = Request::new(vec![Message::user(extraction_prompt(text))])
            .with_max_tokens(EXTRACTION_MAX_TOKENS)
            .with_temperature(0.0);
        if let Some(model) = &self.model {
            request = request.with_model(model);
        }

        let response = match self.client.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "entity extraction request failed");
                return None;
            }
        };

        let extraction = parse_extraction(response.text());
        if extraction.is_none() {
            warn!("entity extraction response was not usable JSON");
        }
        extraction
    }
}

fn extraction_prompt(story: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following story excerpt. Return **strict JSON only**.

Use the `attributes` field to describe the state of an entity, such as its status (alive, dead, friendly, hostile) or condition.

JSON format:
{{
  "entities": [ {{ "name": "Goblin", "type": "NPC", "attributes": {{"status": "dead", "equipment": "rusty sword"}} }} ],
  "relationships": [ {{ "source": "", "relation": "", "target": "" }} ]
}}

Use types: Player, NPC, Animal, Item, Location, Event, Other.

Story:
{story}

Return JSON exactly (no extra text)."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let raw = r#"{"entities":[{"name":"Goblin","type":"NPC","attributes":{"status":"dead"}}]}"#;
        let extraction = parse_extraction(raw).unwrap();
        assert_eq!(extraction.entities.len(), 1);
        let goblin = &extraction.entities[0];
        assert_eq!(goblin.name(), Some("Goblin"));
        assert_eq!(goblin.entity_type(), "NPC");
        assert_eq!(goblin.attributes["status"], "dead");
        assert!(extraction.relationships.is_empty());
    }

    #[test]
    fn test_parse_wrapped_in_prose_and_markdown() {
        let raw = "Sure! Here you go:\n```json\n{\"entities\": [{\"name\": \"Kael\", \"type\": \"Player\"}], \"relationships\": []}\n```\nLet me know.";
        let extraction = parse_extraction(raw).unwrap();
        assert_eq!(extraction.entity_names(), vec!["Kael".to_string()]);
    }

    #[test]
    fn test_parse_repairs_trailing_commas() {
        let raw = r#"{"entities": [{"name": "Torch", "type": "Item",},], "relationships": [{"source": "Kael", "relation": "holds", "target": "Torch",},],}"#;
        let extraction = parse_extraction(raw).unwrap();
        assert_eq!(extraction.entities[0].name(), Some("Torch"));
        assert_eq!(extraction.relationships[0].relation(), "holds");
    }

    #[test]
    fn test_parse_truncated_is_none() {
        assert!(parse_extraction(r#"{"entities": [{"name": "Gob"#).is_none());
        assert!(parse_extraction("no json here").is_none());
        assert!(parse_extraction("").is_none());
    }

    #[test]
    fn test_parse_garbage_object_is_none() {
        assert!(parse_extraction("{entities: [oops]}").is_none());
    }

    #[test]
    fn test_braces_inside_strings() {
        let raw = r#"{"entities": [{"name": "The {Cursed} Blade", "type": "Item"}]} trailing }"#;
        let extraction = parse_extraction(raw).unwrap();
        assert_eq!(extraction.entities[0].name(), Some("The {Cursed} Blade"));
    }

    #[test]
    fn test_lenient_fields() {
        let raw = r#"{
            "entities": [
                {"name": "  ", "type": "NPC"},
                {"name": "Wolf", "type": null, "attributes": {"hp": 7, "hostile": true, "note": null}},
                {"type": "Item"}
            ],
            "relationships": null
        }"#;
        let extraction = parse_extraction(raw).unwrap();
        assert_eq!(extraction.entity_names(), vec!["Wolf".to_string()]);

        let wolf = &extraction.entities[1];
        assert_eq!(wolf.entity_type(), DEFAULT_ENTITY_TYPE);
        assert_eq!(wolf.attributes["hp"], "7");
        assert_eq!(wolf.attributes["hostile"], "true");
        assert!(!wolf.attributes.contains_key("note"));
        assert!(extraction.relationships.is_empty());
    }

    #[test]
    fn test_relationship_accessors() {
        let rel: ExtractedRelationship =
            serde_json::from_str(r#"{"source": "Kael", "target": ""}"#).unwrap();
        assert_eq!(rel.source(), Some("Kael"));
        assert_eq!(rel.target(), None);
        assert_eq!(rel.relation(), "");
    }

    #[test]
    fn test_prompt_contains_story() {
        let prompt = extraction_prompt("The goblin falls.");
        assert!(prompt.contains("Story:\nThe goblin falls."));
        assert!(prompt.contains("\"entities\""));
    }
}
