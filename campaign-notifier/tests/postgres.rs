use std::sync::Arc;

use campaign_notifier::reference::{PgReferenceSource, ReferenceData, ReferenceSource};
use campaign_notifier::sink::postgres::PostgresSink;
use campaign_notifier::sink::DurableSink;
use campaign_notifier::types::{CampaignEvent, NotificationRecord};
use sqlx::{PgPool, Row};

fn record(client_id: &str, content: Option<&str>) -> NotificationRecord {
    NotificationRecord {
        event: CampaignEvent {
            restaurant_id: Some("R1".to_string()),
            campaign_id: Some("A1".to_string()),
            content: content.map(str::to_string),
            owner: Some("Chef".to_string()),
            owner_contact: Some("chef@example.com".to_string()),
            window_start: Some(100),
            window_end: Some(200),
            created_at: None,
        },
        client_id: client_id.to_string(),
        trigger_created_at: 150,
    }
}

async fn seed_links(pool: &PgPool, links: &[(&str, &str)]) {
    for (client_id, restaurant_id) in links {
        sqlx::query("INSERT INTO subscribers_restaurants (client_id, restaurant_id) VALUES ($1, $2)")
            .bind(client_id)
            .bind(restaurant_id)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn appends_rows_with_null_feedback(db: PgPool) {
    let sink = PostgresSink::new(db.clone(), "public.subscribers_feedback");

    sink.append(&[record("C1", Some("free dessert")), record("C2", None)])
        .await
        .unwrap();

    let rows = sqlx::query(
        "SELECT client_id, adv_campaign_content, datetime_created, trigger_datetime_created, feedback
         FROM subscribers_feedback ORDER BY client_id",
    )
    .fetch_all(&db)
    .await
    .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<String, _>("client_id"), "C1");
    assert_eq!(
        rows[0].get::<Option<String>, _>("adv_campaign_content"),
        Some("free dessert".to_string())
    );
    assert_eq!(rows[1].get::<Option<String>, _>("adv_campaign_content"), None);
    for row in &rows {
        assert_eq!(row.get::<Option<i64>, _>("datetime_created"), None);
        assert_eq!(row.get::<i64, _>("trigger_datetime_created"), 150);
        assert_eq!(row.get::<Option<String>, _>("feedback"), None);
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn append_is_not_idempotent(db: PgPool) {
    let sink = PostgresSink::new(db.clone(), "subscribers_feedback");
    let batch = [record("C1", None)];

    sink.append(&batch).await.unwrap();
    sink.append(&batch).await.unwrap();
    sink.append(&[]).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers_feedback")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn loads_and_deduplicates_links(db: PgPool) {
    seed_links(&db, &[("C1", "R1"), ("C1", "R1"), ("C2", "R1"), ("C1", "R2")]).await;

    let source = PgReferenceSource::new(db.clone(), "public.subscribers_restaurants");
    let links = source.fetch_links().await.unwrap();
    assert_eq!(links.len(), 4);
    assert!(links.iter().all(|l| l.attributes.contains_key("id")));

    let reference = ReferenceData::load(Arc::new(source)).await.unwrap();
    let set = reference.snapshot();
    assert_eq!(set.len(), 3);
    assert_eq!(set.links_for("R1").len(), 2);
    assert_eq!(set.links_for("R2").len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn refresh_picks_up_new_links(db: PgPool) {
    seed_links(&db, &[("C1", "R1")]).await;
    let source = Arc::new(PgReferenceSource::new(db.clone(), "subscribers_restaurants"));
    let reference = ReferenceData::load(source).await.unwrap();
    assert_eq!(reference.snapshot().len(), 1);

    seed_links(&db, &[("C2", "R1")]).await;
    assert_eq!(reference.refresh().await.unwrap(), 2);
    assert_eq!(reference.snapshot().links_for("R1").len(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_reference_table_fails_the_load(db: PgPool) {
    let source = Arc::new(PgReferenceSource::new(db, "public.no_such_table"));
    assert!(ReferenceData::load(source).await.is_err());
}
