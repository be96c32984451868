use std::collections::HashMap;

use serde::Deserialize;
use tracing::info;

use crate::error::ReferenceError;

/// The feed message types this consumer understands, keyed by the header's `msg_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Activation,
    Cancellation,
    Movement,
    Reinstatement,
    OriginChange,
    IdentityChange,
    LocationChange,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::Activation,
        EventType::Cancellation,
        EventType::Movement,
        EventType::Reinstatement,
        EventType::OriginChange,
        EventType::IdentityChange,
        EventType::LocationChange,
    ];

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0001" => Some(EventType::Activation),
            "0002" => Some(EventType::Cancellation),
            "0003" => Some(EventType::Movement),
            "0005" => Some(EventType::Reinstatement),
            "0006" => Some(EventType::OriginChange),
            "0007" => Some(EventType::IdentityChange),
            "0008" => Some(EventType::LocationChange),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EventType::Activation => "0001",
            EventType::Cancellation => "0002",
            EventType::Movement => "0003",
            EventType::Reinstatement => "0005",
            EventType::OriginChange => "0006",
            EventType::IdentityChange => "0007",
            EventType::LocationChange => "0008",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventType::Activation => "activation",
            EventType::Cancellation => "cancellation",
            EventType::Movement => "movement",
            EventType::Reinstatement => "reinstatement",
            EventType::OriginChange => "origin change",
            EventType::IdentityChange => "identity change",
            EventType::LocationChange => "location change",
        }
    }
}

// Operator table entries carry more than we need; only the ATOC code is shown.
#[derive(Debug, Deserialize)]
struct OperatorEntry {
    atoc: String,
}

/// Read-only reference data, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ReferenceLookup {
    operators: HashMap<String, String>,
}

impl ReferenceLookup {
    pub fn new(operators: HashMap<String, String>) -> Self {
        Self { operators }
    }

    /// Parse an operator table of the form `{"<toc_id>": {"atoc": "<name>", ...}, ...}`.
    pub fn from_operator_json(json: &str) -> Result<Self, ReferenceError> {
        let entries: HashMap<String, OperatorEntry> = serde_json::from_str(json)?;
        let operators = entries
            .into_iter()
            .map(|(code, entry)| (code, entry.atoc))
            .collect();
        Ok(Self { operators })
    }

    pub fn load(path: &str) -> Result<Self, ReferenceError> {
        let json = std::fs::read_to_string(path).map_err(|source| ReferenceError::Read {
            path: path.to_owned(),
            source,
        })?;
        let lookup = Self::from_operator_json(&json)?;
        info!(path, operators = lookup.operators.len(), "Loaded operator table");
        Ok(lookup)
    }

    pub fn type_label(&self, type_code: &str) -> Option<&'static str> {
        EventType::from_code(type_code).map(|t| t.label())
    }

    pub fn operator_name(&self, operator_code: &str) -> Option<&str> {
        self.operators.get(operator_code).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_the_table() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::from_code(event_type.code()), Some(event_type));
        }
        assert_eq!(EventType::from_code("0004"), None);
        assert_eq!(EventType::from_code("0099"), None);
        assert_eq!(EventType::from_code(""), None);
    }

    #[test]
    fn test_type_labels() {
        let lookup = ReferenceLookup::default();
        assert_eq!(lookup.type_label("0003"), Some("movement"));
        assert_eq!(lookup.type_label("0006"), Some("origin change"));
        assert_eq!(lookup.type_label("0099"), None);
    }

    #[test]
    fn test_operator_table_parsing_ignores_extra_fields() {
        let lookup = ReferenceLookup::from_operator_json(
            r#"{"88": {"atoc": "GW", "name": "Great Western Railway"}, "61": {"atoc": "GR"}}"#,
        )
        .unwrap();

        assert_eq!(lookup.operator_name("88"), Some("GW"));
        assert_eq!(lookup.operator_name("61"), Some("GR"));
        assert_eq!(lookup.operator_name("00"), None);
    }

    #[test]
    fn test_operator_table_rejects_malformed_json() {
        let result = ReferenceLookup::from_operator_json(r#"{"88": "GW"}"#);
        assert!(matches!(result, Err(ReferenceError::Parse(_))));
    }

    #[test]
    fn test_missing_operator_file() {
        let result = ReferenceLookup::load("/definitely/not/here/tocs.json");
        assert!(matches!(result, Err(ReferenceError::Read { .. })));
    }
}
