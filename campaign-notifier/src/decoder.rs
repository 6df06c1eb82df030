use serde_json::{Map, Value};
use tracing::warn;

use crate::error::DecodeError;
use crate::metrics_consts::{DECODE_ERRORS, EVENTS_DECODED};
use crate::types::{CampaignEvent, RawRecord};

/// Events decoded from one micro-batch, in input order.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub events: Vec<CampaignEvent>,
    pub errors: usize,
}

/// Decodes one payload. Only the top level is strict: it must be a JSON
/// object. Individual fields that are missing or have the wrong type decode
/// to `None` instead of failing the record.
pub fn decode_event(payload: Option<&[u8]>) -> Result<CampaignEvent, DecodeError> {
    let payload = match payload {
        Some(p) if !p.is_empty() => p,
        _ => return Err(DecodeError::EmptyPayload),
    };

    let Value::Object(fields) = serde_json::from_slice::<Value>(payload)? else {
        return Err(DecodeError::NotAnObject);
    };

    Ok(CampaignEvent {
        restaurant_id: text_field(&fields, "restaurant_id"),
        campaign_id: text_field(&fields, "adv_campaign_id"),
        content: text_field(&fields, "adv_campaign_content"),
        owner: text_field(&fields, "adv_campaign_owner"),
        owner_contact: text_field(&fields, "adv_campaign_owner_contact"),
        window_start: integer_field(&fields, "adv_campaign_datetime_start"),
        window_end: integer_field(&fields, "adv_campaign_datetime_end"),
        created_at: integer_field(&fields, "datetime_created"),
    })
}

/// Decodes every record of a batch, dropping and counting the ones whose
/// payload is not a JSON object.
pub fn decode_batch(records: &[RawRecord]) -> DecodedBatch {
    let mut batch = DecodedBatch {
        events: Vec::with_capacity(records.len()),
        errors: 0,
    };

    for record in records {
        match decode_event(record.payload.as_deref()) {
            Ok(event) => batch.events.push(event),
            Err(e) => {
                metrics::counter!(DECODE_ERRORS, &[("kind", e.kind())]).increment(1);
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    "dropping undecodable record: {}",
                    e
                );
                batch.errors += 1;
            }
        }
    }

    metrics::counter!(EVENTS_DECODED).increment(batch.events.len() as u64);
    batch
}

/// Scalars are accepted as text, numbers and booleans in their JSON form.
pub(crate) fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(text_value)
}

fn integer_field(fields: &Map<String, Value>, name: &str) -> Option<i64> {
    fields.get(name).and_then(Value::as_i64)
}
