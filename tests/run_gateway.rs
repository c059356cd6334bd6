use anyhow::Result;
use chrono::{DateTime, Utc};
use greendeer::{
    sqlite::run_schema, ConnectionPool, Goal, RunFields, RunGateway, SqliteConfig, StorageError,
    UserId,
};
use tempfile::TempDir;
use tokio::time::{Duration, Instant};

const ME: UserId = UserId(1);
const SOMEONE_ELSE: UserId = UserId(2);

// Helper function to create an in-memory gateway for testing
fn create_test_gateway() -> Result<RunGateway> {
    let pool = ConnectionPool::open(SqliteConfig::in_memory())?;
    Ok(RunGateway::new(pool))
}

// Helper function to create a gateway over a temporary database file
fn create_temp_gateway(max_connections: usize) -> Result<(RunGateway, TempDir)> {
    let dir = tempfile::tempdir()?;
    let config = SqliteConfig::new(dir.path().join("green-deer.db"), run_schema())
        .with_max_connections(max_connections);
    let pool = ConnectionPool::open(config)?;
    Ok((RunGateway::new(pool), dir))
}

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

fn run(seconds: i64, meters: u32, time_in_seconds: u32, weight: Option<f32>) -> RunFields {
    RunFields {
        time_finished: at(seconds),
        meters,
        time_in_seconds,
        weight,
    }
}

#[tokio::test]
async fn test_weight_presence_round_trips() -> Result<()> {
    let gateway = create_test_gateway()?;
    gateway
        .insert_runs(
            ME,
            vec![
                run(1_000, 7000, 2620, Some(84.7)),
                run(2_000, 3100, 991, None),
                run(3_000, 1500, 400, Some(0.0)),
            ],
            None,
        )
        .await?;

    let runs = gateway.list_runs(ME, None).await?;
    let weights: Vec<Option<f32>> = runs.iter().map(|r| r.weight).collect();
    assert_eq!(weights, vec![Some(0.0), None, Some(84.7)]);
    Ok(())
}

#[tokio::test]
async fn test_list_is_most_recent_first() -> Result<()> {
    let gateway = create_test_gateway()?;
    for seconds in [5_000, 1_000, 9_000, 3_000] {
        gateway.insert_run(ME, run(seconds, 1000, 300, None), None).await?;
    }

    let runs = gateway.list_runs(ME, None).await?;
    let times: Vec<i64> = runs.iter().map(|r| r.time_finished.timestamp()).collect();
    assert_eq!(times, vec![9_000, 5_000, 3_000, 1_000]);
    assert!(gateway.list_runs(SOMEONE_ELSE, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_insert_assigns_fresh_ids_and_owner() -> Result<()> {
    let gateway = create_test_gateway()?;
    let added = gateway
        .insert_runs(
            ME,
            vec![
                run(1, 100, 10, None),
                run(2, 200, 20, None),
                run(3, 300, 30, None),
            ],
            None,
        )
        .await?;

    assert_eq!(added.len(), 3);
    assert!(added.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert!(added.iter().all(|r| r.user_id == ME));

    // Deleting the newest run must not let its id be handed out again.
    let newest = added[2].id;
    gateway.delete_runs(ME, vec![newest], None).await?;
    let next = gateway.insert_run(ME, run(4, 400, 40, None), None).await?;
    assert!(next.id > newest);
    Ok(())
}

#[tokio::test]
async fn test_stats_for_user_without_runs_or_goal() -> Result<()> {
    let gateway = create_test_gateway()?;
    let stats = gateway.compute_stats(ME, None).await?;
    assert_eq!(stats.user_id, ME);
    assert_eq!(stats.meters_sum, 0);
    assert_eq!(stats.weight_lowest, None);
    assert_eq!(stats.goal, Goal::default());
    Ok(())
}

#[tokio::test]
async fn test_stats_only_count_own_runs() -> Result<()> {
    let gateway = create_test_gateway()?;
    gateway
        .insert_runs(
            ME,
            vec![run(1, 7000, 2620, Some(84.7)), run(2, 3100, 991, None)],
            None,
        )
        .await?;
    gateway
        .insert_run(SOMEONE_ELSE, run(3, 42_195, 10_800, Some(61.0)), None)
        .await?;

    let stats = gateway.compute_stats(ME, None).await?;
    assert_eq!(stats.meters_sum, 10_100);
    assert_eq!(stats.weight_lowest, Some(84.7));
    Ok(())
}

#[tokio::test]
async fn test_goal_presence_is_independent_of_runs() -> Result<()> {
    let gateway = create_test_gateway()?;
    // No weights recorded, so MIN(weight) is NULL; the goal must still read back.
    gateway.insert_run(ME, run(1, 5000, 1500, None), None).await?;
    gateway
        .set_goal(
            ME,
            Goal {
                meters: Some(100_000),
                weight: None,
            },
            None,
        )
        .await?;

    let stats = gateway.compute_stats(ME, None).await?;
    assert_eq!(stats.weight_lowest, None);
    assert_eq!(stats.goal.meters, Some(100_000));
    assert_eq!(stats.goal.weight, None);

    gateway
        .set_goal(
            ME,
            Goal {
                meters: None,
                weight: Some(80.5),
            },
            None,
        )
        .await?;
    assert_eq!(
        gateway.goal(ME, None).await?,
        Some(Goal {
            meters: None,
            weight: Some(80.5)
        })
    );
    assert_eq!(gateway.goal(SOMEONE_ELSE, None).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_update_replaces_fields_in_place() -> Result<()> {
    let gateway = create_test_gateway()?;
    let stored = gateway.insert_run(ME, run(2_000, 3100, 991, Some(83.0)), None).await?;

    let edited = gateway
        .update_run(ME, stored.id, run(2_000, 3200, 991, None), None)
        .await?;
    assert_eq!(edited.map(|r| (r.id, r.meters, r.weight)), Some((stored.id, 3200, None)));

    let runs = gateway.list_runs(ME, None).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].meters, 3200);
    assert_eq!(runs[0].weight, None);
    Ok(())
}

#[tokio::test]
async fn test_update_reports_misses_and_respects_owner() -> Result<()> {
    let gateway = create_test_gateway()?;
    let mine = gateway.insert_run(ME, run(1, 1000, 100, None), None).await?;
    let theirs = gateway.insert_run(SOMEONE_ELSE, run(1, 2000, 200, None), None).await?;

    let changed = gateway
        .update_runs(
            ME,
            vec![
                (theirs.id, run(1, 9999, 1, None)),
                (mine.id, run(1, 1100, 110, None)),
                (i64::MAX, run(1, 1, 1, None)),
            ],
            None,
        )
        .await?;
    assert_eq!(changed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![mine.id]);

    let untouched = gateway.list_runs(SOMEONE_ELSE, None).await?;
    assert_eq!(untouched[0].meters, 2000);
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_only_owned_existing_runs() -> Result<()> {
    let gateway = create_test_gateway()?;
    let mine = gateway
        .insert_runs(ME, vec![run(1, 1, 1, None), run(2, 2, 2, None), run(3, 3, 3, None)], None)
        .await?;
    let theirs = gateway.insert_run(SOMEONE_ELSE, run(4, 4, 4, None), None).await?;

    let removed = gateway
        .delete_runs(ME, vec![mine[0].id, mine[0].id, theirs.id, 12_345, mine[2].id], None)
        .await?;
    assert_eq!(removed, vec![mine[0].id, mine[2].id]);

    let left: Vec<i64> = gateway.list_runs(ME, None).await?.iter().map(|r| r.id).collect();
    assert_eq!(left, vec![mine[1].id]);
    assert_eq!(gateway.list_runs(SOMEONE_ELSE, None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_batch_is_rolled_back() -> Result<()> {
    let gateway = create_test_gateway()?;
    gateway.insert_run(ME, run(1, 1000, 100, None), None).await?;
    {
        let conn = gateway.pool().acquire().await?;
        conn.execute_batch(
            "CREATE TRIGGER reject_ultra BEFORE INSERT ON runs WHEN NEW.distance > 100000 \
             BEGIN SELECT RAISE(ABORT, 'distance too long'); END;",
        )?;
    }

    let result = gateway
        .insert_runs(
            ME,
            vec![run(2, 2000, 200, None), run(3, 200_000, 300, None), run(4, 4000, 400, None)],
            None,
        )
        .await;
    assert!(matches!(result, Err(StorageError::Sqlite(_))));

    let runs = gateway.list_runs(ME, None).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].meters, 1000);
    Ok(())
}

#[tokio::test]
async fn test_expired_deadline_does_not_touch_the_store() -> Result<()> {
    let gateway = create_test_gateway()?;
    let expired = Instant::now() - Duration::from_millis(1);

    let result = gateway.insert_run(ME, run(1, 1000, 100, None), Some(expired)).await;
    assert!(matches!(result, Err(StorageError::DeadlineExceeded("insert_runs"))));
    assert!(gateway.list_runs(ME, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_deadline_while_waiting_for_connection() -> Result<()> {
    let gateway = create_test_gateway()?;
    let _held = gateway.pool().acquire().await?;

    let deadline = Instant::now() + Duration::from_millis(50);
    let result = gateway.list_runs(ME, Some(deadline)).await;
    assert!(matches!(result, Err(StorageError::DeadlineExceeded("list_runs"))));
    Ok(())
}

#[tokio::test]
async fn test_closed_pool_surfaces_as_pool_closed() -> Result<()> {
    let gateway = create_test_gateway()?;
    gateway.pool().close();
    assert!(matches!(
        gateway.list_runs(ME, None).await,
        Err(StorageError::PoolClosed)
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_get_distinct_ids() -> Result<()> {
    let (gateway, _dir) = create_temp_gateway(4)?;

    let inserts = (0..16).map(|i| {
        let gateway = gateway.clone();
        async move {
            gateway
                .insert_runs(ME, vec![run(i, 100, 10, None), run(i, 200, 20, None)], None)
                .await
        }
    });
    let results = futures::future::join_all(inserts).await;

    let mut ids = Vec::new();
    for batch in results {
        ids.extend(batch?.into_iter().map(|r| r.id));
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 32);
    assert_eq!(gateway.list_runs(ME, None).await?.len(), 32);
    assert_eq!(gateway.compute_stats(ME, None).await?.meters_sum, 16 * 300);
    Ok(())
}

#[tokio::test]
async fn test_file_database_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = SqliteConfig::new(dir.path().join("green-deer.db"), run_schema());

    let first = RunGateway::new(ConnectionPool::open(config.clone())?);
    let stored = first.insert_run(ME, run(1_234, 5000, 1500, Some(70.25)), None).await?;
    first.pool().close();

    let second = RunGateway::new(ConnectionPool::open(config)?);
    let runs = second.list_runs(ME, None).await?;
    assert_eq!(runs, vec![stored]);
    Ok(())
}
