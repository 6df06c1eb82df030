use crate::metrics_consts::{EVENTS_WITHOUT_SUBSCRIBERS, NOTIFICATIONS_JOINED};
use crate::reference::ReferenceSet;
use crate::types::{CampaignEvent, NotificationRecord};

/// Inner join of active events with the subscriber links on restaurant id.
///
/// Every (event, link) match yields one record stamped with
/// `trigger_created_at`. Output keeps event order, then link order.
pub fn join_with_subscribers(
    events: &[CampaignEvent],
    reference: &ReferenceSet,
    trigger_created_at: i64,
) -> Vec<NotificationRecord> {
    let mut records = Vec::new();
    let mut unmatched = 0u64;

    for event in events {
        let links = event
            .restaurant_id
            .as_deref()
            .map(|restaurant_id| reference.links_for(restaurant_id))
            .unwrap_or_default();

        if links.is_empty() {
            unmatched += 1;
            continue;
        }

        records.extend(links.iter().map(|link| NotificationRecord {
            event: event.clone(),
            client_id: link.client_id.clone(),
            trigger_created_at,
        }));
    }

    metrics::counter!(EVENTS_WITHOUT_SUBSCRIBERS).increment(unmatched);
    metrics::counter!(NOTIFICATIONS_JOINED).increment(records.len() as u64);
    records
}
