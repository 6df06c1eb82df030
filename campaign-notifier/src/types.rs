use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An advertising campaign notice read from the input topic. Every field is
/// nullable: absent or mistyped input fields decode to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub restaurant_id: Option<String>,
    #[serde(rename = "adv_campaign_id")]
    pub campaign_id: Option<String>,
    #[serde(rename = "adv_campaign_content")]
    pub content: Option<String>,
    #[serde(rename = "adv_campaign_owner")]
    pub owner: Option<String>,
    #[serde(rename = "adv_campaign_owner_contact")]
    pub owner_contact: Option<String>,
    #[serde(rename = "adv_campaign_datetime_start")]
    pub window_start: Option<i64>,
    #[serde(rename = "adv_campaign_datetime_end")]
    pub window_end: Option<i64>,
    #[serde(rename = "datetime_created")]
    pub created_at: Option<i64>,
}

/// A client that marked a restaurant as a favorite. Columns of the
/// reference row other than the two keys are kept in `attributes`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriberRestaurantLink {
    pub client_id: String,
    pub restaurant_id: String,
    pub attributes: Map<String, Value>,
}

impl SubscriberRestaurantLink {
    pub fn new(client_id: impl Into<String>, restaurant_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            restaurant_id: restaurant_id.into(),
            attributes: Map::new(),
        }
    }
}

/// One client to notify about one active campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(flatten)]
    pub event: CampaignEvent,
    pub client_id: String,
    #[serde(rename = "trigger_datetime_created")]
    pub trigger_created_at: i64,
}

/// The shape written to both sinks: the record plus a `feedback` column that
/// downstream consumers fill in. The pipeline always writes it as null.
#[derive(Debug, Serialize)]
pub struct FeedbackRow<'a> {
    #[serde(flatten)]
    pub record: &'a NotificationRecord,
    pub feedback: Option<String>,
}

impl<'a> From<&'a NotificationRecord> for FeedbackRow<'a> {
    fn from(record: &'a NotificationRecord) -> Self {
        FeedbackRow {
            record,
            feedback: None,
        }
    }
}

/// A message as read from the input topic, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl RawRecord {
    pub fn new(partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            offset,
            key: None,
            payload: Some(payload.into()),
        }
    }
}
