use pgbulk::test_support::TestDatabase;
use pgbulk::{Dataset, FanoutOptions, LoadOptions};
use sqlx::PgPool;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(err) => {
            eprintln!("skipping test: could not provision postgres container: {err}");
            None
        }
    }
}

async fn create_events_table(pool: &PgPool) {
    sqlx::query(
        r#"CREATE TABLE public.events (
            event_id text NOT NULL,
            payload text,
            CONSTRAINT events_pk PRIMARY KEY (event_id)
        )"#,
    )
    .execute(pool)
    .await
    .expect("create table");
}

fn event_dataset(count: usize, offset: usize) -> Dataset {
    let mut dataset = Dataset::new(vec!["event_id", "payload"]);
    for i in offset..offset + count {
        dataset
            .push_row(vec![
                Some(format!("evt-{:06}", i)),
                Some(format!("payload {}", i)),
            ])
            .expect("row arity");
    }
    dataset
}

fn worker_fanout(workers: usize) -> FanoutOptions {
    FanoutOptions {
        workers: Some(workers),
        worker_program: Some(env!("CARGO_BIN_EXE_pgbulk").into()),
    }
}

async fn row_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM public.events")
        .fetch_one(pool)
        .await
        .expect("count rows")
}

#[tokio::test]
async fn each_dataset_is_loaded_by_its_own_worker_process() {
    let Some(db) = provision().await else { return };
    let pool = db.pool().await.expect("helper pool");
    create_events_table(&pool).await;

    let mut options = LoadOptions::new(100);
    options.min_pool_size = 2;
    options.max_pool_size = 3;

    pgbulk::load_with_fanout(
        db.config(),
        "events",
        vec![event_dataset(300, 0), event_dataset(300, 300)],
        &options,
        &worker_fanout(2),
    )
    .await
    .expect("fanout load succeeds");

    assert_eq!(row_count(&pool).await, 600);
}

#[tokio::test]
async fn failing_worker_does_not_cancel_its_siblings() {
    let Some(db) = provision().await else { return };
    let pool = db.pool().await.expect("helper pool");
    create_events_table(&pool).await;

    // The second dataset duplicates a key within itself, so its single
    // COPY batch fails no matter how workers are interleaved.
    let mut conflicting = event_dataset(1, 900);
    conflicting
        .push_row(vec![
            Some("evt-000900".to_string()),
            Some("duplicate".to_string()),
        ])
        .expect("row arity");

    let mut options = LoadOptions::new(100);
    options.min_pool_size = 2;
    options.max_pool_size = 3;

    let err = pgbulk::load_with_fanout(
        db.config(),
        "events",
        vec![event_dataset(200, 0), conflicting],
        &options,
        &worker_fanout(2),
    )
    .await
    .expect_err("fanout load fails");

    assert!(
        err.to_string().contains("duplicate key"),
        "unexpected error: {err}"
    );
    // The healthy worker's dataset landed in full.
    assert_eq!(row_count(&pool).await, 200);
}
