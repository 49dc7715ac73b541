//! behavior.rs: the closed set of reply behaviors a thread can be labeled with.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Behavior detected in an email thread.
///
/// `Unknown` is the mandatory fallback whenever no strategy can assign a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BehaviorLabel {
    Confirmation,
    Objection,
    Escalation,
    NewInformation,
    Unknown,
}

impl BehaviorLabel {
    /// Definition order. Remote extraction scans categories in this order.
    pub const ALL: [BehaviorLabel; 5] = [
        BehaviorLabel::Confirmation,
        BehaviorLabel::Objection,
        BehaviorLabel::Escalation,
        BehaviorLabel::NewInformation,
        BehaviorLabel::Unknown,
    ];

    /// Canonical display name, also used as the rule table key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmation => "Confirmation",
            Self::Objection => "Objection",
            Self::Escalation => "Escalation",
            Self::NewInformation => "New Information",
            Self::Unknown => "Unknown",
        }
    }

    /// One-line definition given to the remote model.
    pub fn definition(&self) -> &'static str {
        match self {
            Self::Confirmation => {
                "Confirms, accepts, or acknowledges a request, booking, or agreement."
            }
            Self::Objection => "Rejects, disputes, disagrees with, or raises an issue about the request.",
            Self::Escalation => {
                "Demands higher-level intervention such as a manager, an authority, or urgent resolution."
            }
            Self::NewInformation => "Provides new data, details, or updates not present earlier.",
            Self::Unknown => "None of the above apply.",
        }
    }

    /// Lenient parse: case-insensitive, ignores spaces, `_` and `-`.
    /// "New Information", "new_information" and "NewInformation" all match.
    pub fn parse_name(s: &str) -> Option<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "confirmation" => Some(Self::Confirmation),
            "objection" => Some(Self::Objection),
            "escalation" => Some(Self::Escalation),
            "newinformation" | "newinfo" => Some(Self::NewInformation),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Like `parse_name`, mapping anything unrecognised to `Unknown`.
    pub fn parse_or_unknown(s: &str) -> Self {
        Self::parse_name(s).unwrap_or(Self::Unknown)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for BehaviorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BehaviorLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Artifacts written by earlier runs may carry labels outside the closed set;
// they collapse to Unknown instead of failing the whole file.
impl<'de> Deserialize<'de> for BehaviorLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .map(Self::parse_or_unknown)
            .unwrap_or(Self::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_spacing_variants() {
        assert_eq!(
            BehaviorLabel::parse_name("New Information"),
            Some(BehaviorLabel::NewInformation)
        );
        assert_eq!(
            BehaviorLabel::parse_name("new_information"),
            Some(BehaviorLabel::NewInformation)
        );
        assert_eq!(
            BehaviorLabel::parse_name("ESCALATION"),
            Some(BehaviorLabel::Escalation)
        );
        assert_eq!(BehaviorLabel::parse_name("Question"), None);
    }

    #[test]
    fn serde_uses_display_names() {
        let v = serde_json::to_value(BehaviorLabel::NewInformation).unwrap();
        assert_eq!(v, serde_json::json!("New Information"));

        let back: BehaviorLabel = serde_json::from_str("\"Other\"").unwrap();
        assert_eq!(back, BehaviorLabel::Unknown);
        let null: BehaviorLabel = serde_json::from_str("null").unwrap();
        assert_eq!(null, BehaviorLabel::Unknown);
    }

    #[test]
    fn all_is_in_definition_order() {
        let names: Vec<_> = BehaviorLabel::ALL.iter().map(|b| b.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Confirmation",
                "Objection",
                "Escalation",
                "New Information",
                "Unknown"
            ]
        );
    }
}
