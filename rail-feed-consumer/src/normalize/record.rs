use serde::Serialize;

use super::extract::BodyFields;
use crate::error::NormalizeError;
use crate::reference::EventType;

/// One normalized feed event. Serializes as a flat object: the common fields
/// followed by whichever type-specific fields the event carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub type_id: String,
    pub type_name: Option<String>,
    pub source_device: String,
    pub original_source: String,
    pub formed_time: String,
    pub train_id: String,
    pub operator_code: Option<String>,
    pub operator_name: Option<String>,
    pub headcode: String,
    pub category_speed_flag: String,
    #[serde(flatten)]
    pub details: EventDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetails {
    Activation(Activation),
    Cancellation(Cancellation),
    Movement(Movement),
    Reinstatement(Reinstatement),
    OriginChange(OriginChange),
    IdentityChange(IdentityChange),
    LocationChange(LocationChange),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activation {
    pub event_time: i64,
    pub event_datetime: Option<String>,
    pub origin_stanox: String,
    pub schedule_uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cancellation {
    pub event_time: i64,
    pub event_datetime: Option<String>,
    pub reason_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movement {
    pub event_time: i64,
    pub event_datetime: Option<String>,
    pub planned_time: i64,
    pub planned_datetime: Option<String>,
    pub stanox: String,
    pub original_stanox: String,
    pub is_amendment: bool,
    pub is_off_route: bool,
    pub is_terminating: bool,
    pub platform: String,
    pub variation_status: String,
    pub movement_type: String,
    pub next_report_time: String,
    pub next_report_stanox: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reinstatement {
    pub event_time: i64,
    pub event_datetime: Option<String>,
    pub stanox: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginChange {
    pub event_time: i64,
    pub event_datetime: Option<String>,
    pub origin_stanox: String,
    pub reason_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityChange {
    pub event_time: i64,
    pub event_datetime: Option<String>,
    pub revised_train_id: String,
}

/// Location changes carry nothing beyond the common fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationChange {}

impl EventDetails {
    pub fn extract(event_type: EventType, body: &BodyFields<'_>) -> Result<Self, NormalizeError> {
        let details = match event_type {
            EventType::Activation => {
                let time = body.timestamp("creation_timestamp")?;
                let origin_stanox = match body.non_empty_str("tp_origin_stanox")? {
                    Some(stanox) => stanox,
                    None => body.required_str("sched_origin_stanox")?,
                };
                EventDetails::Activation(Activation {
                    event_time: time.epoch_seconds,
                    event_datetime: time.iso,
                    origin_stanox,
                    schedule_uid: body.required_str("train_uid")?,
                })
            }
            EventType::Cancellation => {
                let time = body.timestamp("canx_timestamp")?;
                EventDetails::Cancellation(Cancellation {
                    event_time: time.epoch_seconds,
                    event_datetime: time.iso,
                    reason_code: body.required_str("canx_reason_code")?,
                })
            }
            EventType::Movement => {
                let actual = body.timestamp("actual_timestamp")?;
                let planned = body.timestamp("planned_timestamp")?;
                EventDetails::Movement(Movement {
                    event_time: actual.epoch_seconds,
                    event_datetime: actual.iso,
                    planned_time: planned.epoch_seconds,
                    planned_datetime: planned.iso,
                    stanox: body.required_str("loc_stanox")?,
                    original_stanox: body.required_str("original_loc_stanox")?,
                    is_amendment: body.flag("correction_ind"),
                    is_off_route: body.flag("offroute_ind"),
                    is_terminating: body.flag("train_terminated"),
                    platform: body.required_str("platform")?.trim().to_owned(),
                    variation_status: body.required_str("variation_status")?,
                    movement_type: body.required_str("planned_event_type")?,
                    next_report_time: body.required_str("next_report_run_time")?,
                    next_report_stanox: body.required_str("next_report_stanox")?,
                })
            }
            EventType::Reinstatement => {
                let time = body.timestamp("reinstatement_timestamp")?;
                EventDetails::Reinstatement(Reinstatement {
                    event_time: time.epoch_seconds,
                    event_datetime: time.iso,
                    stanox: body.required_str("loc_stanox")?,
                })
            }
            EventType::OriginChange => {
                let time = body.timestamp("coo_timestamp")?;
                EventDetails::OriginChange(OriginChange {
                    event_time: time.epoch_seconds,
                    event_datetime: time.iso,
                    origin_stanox: body.required_str("loc_stanox")?,
                    reason_code: body.required_str("reason_code")?,
                })
            }
            EventType::IdentityChange => {
                let time = body.timestamp("event_timestamp")?;
                EventDetails::IdentityChange(IdentityChange {
                    event_time: time.epoch_seconds,
                    event_datetime: time.iso,
                    revised_train_id: body.required_str("revised_train_id")?,
                })
            }
            EventType::LocationChange => EventDetails::LocationChange(LocationChange {}),
        };
        Ok(details)
    }
}
