pub const RECORDS_RECEIVED: &str = "campaign_notifier_records_received";
pub const EVENTS_DECODED: &str = "campaign_notifier_events_decoded";
pub const DECODE_ERRORS: &str = "campaign_notifier_decode_errors";
pub const EVENTS_ACTIVE: &str = "campaign_notifier_events_active";
pub const EVENTS_INACTIVE: &str = "campaign_notifier_events_inactive";
pub const NOTIFICATIONS_JOINED: &str = "campaign_notifier_notifications_joined";
pub const EVENTS_WITHOUT_SUBSCRIBERS: &str = "campaign_notifier_events_without_subscribers";

pub const BATCH_SIZE: &str = "campaign_notifier_batch_size";
pub const BATCH_PROCESS_TIME: &str = "campaign_notifier_batch_process_time_ms";
pub const BATCHES_COMMITTED: &str = "campaign_notifier_batches_committed";
pub const BATCH_ATTEMPT: &str = "campaign_notifier_batch_attempt";
pub const SINK_WRITE_TIME: &str = "campaign_notifier_sink_write_time_ms";
pub const SINK_WRITE_ERRORS: &str = "campaign_notifier_sink_write_errors";
pub const CHECKPOINT_BATCH_ID: &str = "campaign_notifier_checkpoint_batch_id";

pub const REFERENCE_LINKS: &str = "campaign_notifier_reference_links";
pub const REFERENCE_DUPLICATES: &str = "campaign_notifier_reference_duplicates";
pub const REFERENCE_ROWS_SKIPPED: &str = "campaign_notifier_reference_rows_skipped";
pub const REFERENCE_REFRESH: &str = "campaign_notifier_reference_refresh";

pub const NOW_SNAPSHOT: &str = "campaign_notifier_now_snapshot_seconds";
