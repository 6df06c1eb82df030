use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::decoder::text_value;
use crate::error::ReferenceLoadError;
use crate::metrics_consts::{
    REFERENCE_DUPLICATES, REFERENCE_LINKS, REFERENCE_REFRESH, REFERENCE_ROWS_SKIPPED,
};
use crate::types::SubscriberRestaurantLink;

/// The deduplicated subscriber links, indexed by restaurant for the join.
#[derive(Debug, Default)]
pub struct ReferenceSet {
    by_restaurant: HashMap<String, Vec<SubscriberRestaurantLink>>,
    len: usize,
}

impl ReferenceSet {
    /// Builds the set keeping the first link seen for every
    /// (client_id, restaurant_id) pair. Per-restaurant order follows input order.
    pub fn from_links(links: impl IntoIterator<Item = SubscriberRestaurantLink>) -> Self {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut by_restaurant: HashMap<String, Vec<SubscriberRestaurantLink>> = HashMap::new();
        let mut duplicates = 0u64;

        for link in links {
            if !seen.insert((link.client_id.clone(), link.restaurant_id.clone())) {
                duplicates += 1;
                continue;
            }
            by_restaurant
                .entry(link.restaurant_id.clone())
                .or_default()
                .push(link);
        }

        metrics::counter!(REFERENCE_DUPLICATES).increment(duplicates);
        Self {
            by_restaurant,
            len: seen.len(),
        }
    }

    pub fn links_for(&self, restaurant_id: &str) -> &[SubscriberRestaurantLink] {
        self.by_restaurant
            .get(restaurant_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn restaurants(&self) -> usize {
        self.by_restaurant.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Reads every link of the reference store. Either all rows or an error.
    async fn fetch_links(&self) -> Result<Vec<SubscriberRestaurantLink>, ReferenceLoadError>;
}

/// Bulk reads the subscriber table. Rows are fetched as json so that any
/// extra columns end up in the link attributes.
pub struct PgReferenceSource {
    pool: PgPool,
    query: String,
}

impl PgReferenceSource {
    /// `table` must already be validated as a plain identifier, it is
    /// interpolated into the query.
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            query: format!("SELECT row_to_json(t) FROM {table} t"),
        }
    }
}

#[async_trait]
impl ReferenceSource for PgReferenceSource {
    async fn fetch_links(&self) -> Result<Vec<SubscriberRestaurantLink>, ReferenceLoadError> {
        let rows: Vec<Value> = sqlx::query_scalar(&self.query)
            .fetch_all(&self.pool)
            .await?;

        let total = rows.len();
        let links: Vec<_> = rows.into_iter().filter_map(link_from_row).collect();

        let skipped = total - links.len();
        if skipped > 0 {
            warn!(skipped, "skipped reference rows without client_id or restaurant_id");
            metrics::counter!(REFERENCE_ROWS_SKIPPED).increment(skipped as u64);
        }
        Ok(links)
    }
}

fn link_from_row(row: Value) -> Option<SubscriberRestaurantLink> {
    let Value::Object(mut attributes) = row else {
        return None;
    };
    let client_id = attributes.remove("client_id").as_ref().and_then(text_value)?;
    let restaurant_id = attributes
        .remove("restaurant_id")
        .as_ref()
        .and_then(text_value)?;

    Some(SubscriberRestaurantLink {
        client_id,
        restaurant_id,
        attributes,
    })
}

/// Holds the current reference set. The loader is the only writer: a
/// refresh loads a complete new set before swapping it in, and readers keep
/// the `Arc` they took for as long as they need a consistent view.
pub struct ReferenceData {
    source: Arc<dyn ReferenceSource>,
    current: RwLock<Arc<ReferenceSet>>,
}

impl ReferenceData {
    /// Performs the initial load. Any failure here must abort startup, since
    /// joining against a partial set would silently under-notify.
    pub async fn load(source: Arc<dyn ReferenceSource>) -> Result<Self, ReferenceLoadError> {
        let set = Self::fetch(source.as_ref()).await?;
        Ok(Self {
            source,
            current: RwLock::new(Arc::new(set)),
        })
    }

    pub fn snapshot(&self) -> Arc<ReferenceSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reloads the whole set. On error the previous set stays in place.
    pub async fn refresh(&self) -> Result<usize, ReferenceLoadError> {
        let set = Arc::new(Self::fetch(self.source.as_ref()).await?);
        let len = set.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = set;
        Ok(len)
    }

    async fn fetch(source: &dyn ReferenceSource) -> Result<ReferenceSet, ReferenceLoadError> {
        let links = source.fetch_links().await?;
        let rows = links.len();
        let set = ReferenceSet::from_links(links);

        metrics::gauge!(REFERENCE_LINKS).set(set.len() as f64);
        if set.is_empty() {
            warn!("reference set is empty, no notifications will be produced");
        }
        info!(
            rows,
            links = set.len(),
            restaurants = set.restaurants(),
            "loaded subscriber reference set"
        );
        Ok(set)
    }
}

/// Refreshes the reference set every `interval` until shutdown. Failed
/// refreshes are logged and retried on the next tick.
pub async fn refresh_loop(
    reference: Arc<ReferenceData>,
    interval: Duration,
    liveness: HealthHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately, and the set was just loaded
    ticker.tick().await;
    liveness.report_healthy();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("reference refresher shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        match reference.refresh().await {
            Ok(links) => {
                metrics::counter!(REFERENCE_REFRESH, &[("result", "ok")]).increment(1);
                info!(links, "refreshed subscriber reference set");
            }
            Err(e) => {
                metrics::counter!(REFERENCE_REFRESH, &[("result", "failed")]).increment(1);
                error!("failed to refresh reference set, keeping previous one: {}", e);
            }
        }
        // a failing store is not a dead loop, the previous set is still served
        liveness.report_healthy();
    }
}
