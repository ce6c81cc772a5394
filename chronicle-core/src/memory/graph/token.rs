//! Normalized tokens for graph labels, relation types and attribute keys.
//!
//! Extracted names arrive as free text from a language model. Before they
//! reach the backing store they are reduced to identifier-safe tokens, with a
//! fixed fallback when nothing usable is left.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used when a type normalizes to nothing, or a node has no type.
pub const DEFAULT_LABEL: &str = "Entity";

/// Relation used when a relation normalizes to nothing.
pub const DEFAULT_RELATION: &str = "RELATED";

/// An entity type label: title-cased, alphanumeric only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(String);

impl Label {
    /// Normalize a free-text type.
    ///
    /// Each alphabetic run is title-cased, then every non-alphanumeric
    /// character is dropped: `"NPC"` → `Npc`, `"non-player character"` →
    /// `NonPlayerCharacter`, `"???"` → `Entity`.
    pub fn normalize(raw: &str) -> Self {
        let token: String = title_case(raw)
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if token.is_empty() {
            Self(DEFAULT_LABEL.to_string())
        } else {
            Self(token)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Label {
    fn default() -> Self {
        Self(DEFAULT_LABEL.to_string())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A relation type: uppercase, alphanumeric or underscore only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationType(String);

impl RelationType {
    /// Normalize a free-text relation: `"owns"` → `OWNS`, `"lives_in"` →
    /// `LIVES_IN`, `"is friend of"` → `ISFRIENDOF`, `""` → `RELATED`.
    pub fn normalize(raw: &str) -> Self {
        let token: String = raw
            .to_uppercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if token.is_empty() {
            Self(DEFAULT_RELATION.to_string())
        } else {
            Self(token)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Make an attribute key identifier-safe: spaces and hyphens become `_`.
pub fn normalize_attribute_key(key: &str) -> String {
    key.replace([' ', '-'], "_")
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_alpha = false;
    for c in raw.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_normalization() {
        assert_eq!(Label::normalize("NPC").as_str(), "Npc");
        assert_eq!(Label::normalize("location").as_str(), "Location");
        assert_eq!(Label::normalize("non-player character").as_str(), "NonPlayerCharacter");
        assert_eq!(Label::normalize("magic item!").as_str(), "MagicItem");
        assert_eq!(Label::normalize("3d printer").as_str(), "3DPrinter");
    }

    #[test]
    fn test_label_fallback() {
        assert_eq!(Label::normalize("").as_str(), DEFAULT_LABEL);
        assert_eq!(Label::normalize(" -_- ").as_str(), DEFAULT_LABEL);
        assert_eq!(Label::default().as_str(), DEFAULT_LABEL);
    }

    #[test]
    fn test_relation_normalization() {
        assert_eq!(RelationType::normalize("owns").as_str(), "OWNS");
        assert_eq!(RelationType::normalize("lives_in").as_str(), "LIVES_IN");
        assert_eq!(RelationType::normalize("is friend-of").as_str(), "ISFRIENDOF");
        assert_eq!(RelationType::normalize("`DROP`").as_str(), "DROP");
    }

    #[test]
    fn test_relation_fallback() {
        assert_eq!(RelationType::normalize("").as_str(), DEFAULT_RELATION);
        assert_eq!(RelationType::normalize("->").as_str(), DEFAULT_RELATION);
    }

    #[test]
    fn test_attribute_key() {
        assert_eq!(normalize_attribute_key("hit points"), "hit_points");
        assert_eq!(normalize_attribute_key("long-sword"), "long_sword");
        assert_eq!(normalize_attribute_key("status"), "status");
    }
}
