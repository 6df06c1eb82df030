use crate::metrics_consts::{EVENTS_ACTIVE, EVENTS_INACTIVE};
use crate::types::CampaignEvent;

/// True iff `window_start <= now < window_end`. Events missing either bound
/// are never active.
pub fn is_active(event: &CampaignEvent, now: i64) -> bool {
    match (event.window_start, event.window_end) {
        (Some(start), Some(end)) => start <= now && now < end,
        _ => false,
    }
}

/// Keeps the events whose active window contains `now`, preserving order.
pub fn filter_active(events: Vec<CampaignEvent>, now: i64) -> Vec<CampaignEvent> {
    let total = events.len();
    let active: Vec<CampaignEvent> = events
        .into_iter()
        .filter(|event| is_active(event, now))
        .collect();

    metrics::counter!(EVENTS_ACTIVE).increment(active.len() as u64);
    metrics::counter!(EVENTS_INACTIVE).increment((total - active.len()) as u64);
    active
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: Option<i64>, end: Option<i64>) -> CampaignEvent {
        CampaignEvent {
            restaurant_id: Some("R1".to_string()),
            window_start: start,
            window_end: end,
            ..Default::default()
        }
    }

    #[test]
    fn window_is_half_open() {
        let event = window(Some(100), Some(200));

        assert!(!is_active(&event, 99));
        assert!(is_active(&event, 100));
        assert!(is_active(&event, 150));
        assert!(is_active(&event, 199));
        assert!(!is_active(&event, 200));
        assert!(!is_active(&event, 201));
    }

    #[test]
    fn missing_bounds_are_inactive() {
        assert!(!is_active(&window(None, Some(200)), 150));
        assert!(!is_active(&window(Some(100), None), 150));
        assert!(!is_active(&window(None, None), 150));
    }

    #[test]
    fn inverted_and_empty_windows_contain_nothing() {
        let inverted = window(Some(200), Some(100));
        let empty = window(Some(100), Some(100));
        for now in [50, 100, 150, 200, 250] {
            assert!(!is_active(&inverted, now));
            assert!(!is_active(&empty, now));
        }
    }

    #[test]
    fn filter_keeps_order_of_active_events() {
        let mut first = window(Some(0), Some(1000));
        first.campaign_id = Some("first".to_string());
        let expired = window(Some(0), Some(10));
        let mut second = window(Some(500), Some(501));
        second.campaign_id = Some("second".to_string());
        let future = window(Some(600), Some(700));

        let active = filter_active(vec![first, expired, second, future], 500);

        let ids: Vec<_> = active.iter().map(|e| e.campaign_id.as_deref()).collect();
        assert_eq!(ids, vec![Some("first"), Some("second")]);
    }

    #[test]
    fn filter_of_nothing_is_empty() {
        assert!(filter_active(vec![], 150).is_empty());
    }
}
