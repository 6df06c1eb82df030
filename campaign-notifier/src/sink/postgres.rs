use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::error::SinkError;
use crate::sink::DurableSink;
use crate::types::NotificationRecord;

/// Appends notifications to the feedback table with a single UNNEST insert.
pub struct PostgresSink {
    pool: PgPool,
    query: String,
}

impl PostgresSink {
    /// `table` is interpolated into the statement and must be a validated
    /// identifier.
    pub fn new(pool: PgPool, table: &str) -> Self {
        let query = format!(
            r#"
            INSERT INTO {table} (
                restaurant_id,
                adv_campaign_id,
                adv_campaign_content,
                adv_campaign_owner,
                adv_campaign_owner_contact,
                adv_campaign_datetime_start,
                adv_campaign_datetime_end,
                datetime_created,
                client_id,
                trigger_datetime_created,
                feedback)
            (SELECT u.*, NULL FROM UNNEST(
                $1::text[],
                $2::text[],
                $3::text[],
                $4::text[],
                $5::text[],
                $6::bigint[],
                $7::bigint[],
                $8::bigint[],
                $9::text[],
                $10::bigint[]) AS u)"#
        );
        Self { pool, query }
    }
}

/// Column-major copy of a batch, one vector per bound array.
#[derive(Default)]
struct Columns {
    restaurant_ids: Vec<Option<String>>,
    campaign_ids: Vec<Option<String>>,
    contents: Vec<Option<String>>,
    owners: Vec<Option<String>>,
    owner_contacts: Vec<Option<String>>,
    window_starts: Vec<Option<i64>>,
    window_ends: Vec<Option<i64>>,
    created_ats: Vec<Option<i64>>,
    client_ids: Vec<String>,
    trigger_created_ats: Vec<i64>,
}

impl Columns {
    fn from_records(records: &[NotificationRecord]) -> Self {
        let mut columns = Columns::default();
        for record in records {
            let event = &record.event;
            columns.restaurant_ids.push(event.restaurant_id.clone());
            columns.campaign_ids.push(event.campaign_id.clone());
            columns.contents.push(event.content.clone());
            columns.owners.push(event.owner.clone());
            columns.owner_contacts.push(event.owner_contact.clone());
            columns.window_starts.push(event.window_start);
            columns.window_ends.push(event.window_end);
            columns.created_ats.push(event.created_at);
            columns.client_ids.push(record.client_id.clone());
            columns.trigger_created_ats.push(record.trigger_created_at);
        }
        columns
    }
}

#[async_trait]
impl DurableSink for PostgresSink {
    async fn append(&self, records: &[NotificationRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let columns = Columns::from_records(records);
        let result = sqlx::query(&self.query)
            .bind(&columns.restaurant_ids)
            .bind(&columns.campaign_ids)
            .bind(&columns.contents)
            .bind(&columns.owners)
            .bind(&columns.owner_contacts)
            .bind(&columns.window_starts)
            .bind(&columns.window_ends)
            .bind(&columns.created_ats)
            .bind(&columns.client_ids)
            .bind(&columns.trigger_created_ats)
            .execute(&self.pool)
            .await?;

        debug!(rows = result.rows_affected(), "appended notifications");
        Ok(())
    }
}
