use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::reference::{EventType, ReferenceLookup};

pub mod extract;
pub mod record;

use extract::BodyFields;
pub use record::{CanonicalRecord, EventDetails};

/// One feed event, with the header flattened into the fields we keep.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub type_code: String,
    pub source_device: String,
    pub original_source: String,
    pub body: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireEvent {
    header: WireHeader,
    body: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireHeader {
    msg_type: String,
    source_dev_id: String,
    original_data_source: String,
}

impl TryFrom<Value> for RawEvent {
    type Error = NormalizeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let wire: WireEvent = serde_json::from_value(value)
            .map_err(|e| NormalizeError::MalformedEvent(e.to_string()))?;
        Ok(RawEvent {
            type_code: wire.header.msg_type,
            source_device: wire.header.source_dev_id,
            original_source: wire.header.original_data_source,
            body: wire.body,
        })
    }
}

/// Split a delivery payload into its events. Only the outer array is checked
/// here; each element is validated on its own so one bad event cannot sink the rest.
pub fn parse_envelope(payload: &[u8]) -> Result<Vec<Result<RawEvent, NormalizeError>>, serde_json::Error> {
    let elements: Vec<Value> = serde_json::from_slice(payload)?;
    Ok(elements.into_iter().map(RawEvent::try_from).collect())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Record(Box<CanonicalRecord>),
    /// The type code is not one we handle. Intentional, logged discard.
    Skip { type_code: String },
}

pub struct Normalizer {
    lookup: Arc<ReferenceLookup>,
}

impl Normalizer {
    pub fn new(lookup: Arc<ReferenceLookup>) -> Self {
        Self { lookup }
    }

    pub fn normalize(
        &self,
        event: &RawEvent,
        formed_time: &str,
    ) -> Result<Normalized, NormalizeError> {
        let Some(event_type) = EventType::from_code(&event.type_code) else {
            return Ok(Normalized::Skip {
                type_code: event.type_code.clone(),
            });
        };

        let body = BodyFields::new(&event.body, &event.type_code);

        let train_id = match body.non_empty_str("current_train_id")? {
            Some(id) => id,
            None => body
                .non_empty_str("train_id")?
                .ok_or(NormalizeError::MissingTrainId)?,
        };
        let (headcode, category_speed_flag) = split_train_id(&train_id)?;

        let operator_code = body.optional_str("toc_id")?;
        let operator_name = operator_code
            .as_deref()
            .and_then(|code| self.lookup.operator_name(code))
            .map(str::to_owned);

        let details = EventDetails::extract(event_type, &body)?;

        Ok(Normalized::Record(Box::new(CanonicalRecord {
            type_id: event.type_code.clone(),
            type_name: self.lookup.type_label(&event.type_code).map(str::to_owned),
            source_device: event.source_device.clone(),
            original_source: event.original_source.clone(),
            formed_time: formed_time.to_owned(),
            train_id,
            operator_code,
            operator_name,
            headcode,
            category_speed_flag,
            details,
        })))
    }
}

// Train ids look like "172M27MN19": chars 2..6 are the headcode, char 6 the speed class.
fn split_train_id(train_id: &str) -> Result<(String, String), NormalizeError> {
    let chars: Vec<char> = train_id.chars().take(7).collect();
    if chars.len() < 7 {
        return Err(NormalizeError::MalformedTrainId(train_id.to_owned()));
    }
    Ok((chars[2..6].iter().collect(), chars[6].to_string()))
}
