use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::timestamp::{self, FeedTimestamp};

/// Typed view over an untyped event body. Every accessor validates presence
/// and shape, so the record builders never touch raw JSON.
pub struct BodyFields<'a> {
    body: &'a Map<String, Value>,
    type_code: &'a str,
}

impl<'a> BodyFields<'a> {
    pub fn new(body: &'a Map<String, Value>, type_code: &'a str) -> Self {
        Self { body, type_code }
    }

    fn missing(&self, field: &'static str) -> NormalizeError {
        NormalizeError::MissingField {
            field,
            type_code: self.type_code.to_owned(),
        }
    }

    fn malformed(&self, field: &'static str) -> NormalizeError {
        NormalizeError::MalformedField {
            field,
            type_code: self.type_code.to_owned(),
        }
    }

    /// A string-ish value, or `None` if the key is missing or null.
    /// Numbers are accepted and rendered, anything else is malformed.
    pub fn optional_str(&self, field: &'static str) -> Result<Option<String>, NormalizeError> {
        match self.body.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(self.malformed(field)),
        }
    }

    pub fn required_str(&self, field: &'static str) -> Result<String, NormalizeError> {
        self.optional_str(field)?
            .ok_or_else(|| self.missing(field))
    }

    /// Like `optional_str`, but empty strings count as absent.
    pub fn non_empty_str(&self, field: &'static str) -> Result<Option<String>, NormalizeError> {
        Ok(self.optional_str(field)?.filter(|s| !s.is_empty()))
    }

    /// The feed's boolean indicators: only the literal string "true" is true.
    pub fn flag(&self, field: &'static str) -> bool {
        matches!(self.body.get(field), Some(Value::String(s)) if s == "true")
    }

    /// A millisecond timestamp field. The key must be present; null, empty and
    /// zero all normalize to the absent timestamp.
    pub fn timestamp(&self, field: &'static str) -> Result<FeedTimestamp, NormalizeError> {
        let raw = match self.body.get(field) {
            None => return Err(self.missing(field)),
            Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| self.malformed(field))?,
            ),
            Some(Value::Number(n)) => Some(n.as_i64().ok_or_else(|| self.malformed(field))?),
            Some(_) => return Err(self.malformed(field)),
        };
        Ok(timestamp::normalize(raw))
    }
}
