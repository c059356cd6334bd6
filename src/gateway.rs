//! Storage gateway: the only code that speaks SQL.
//!
//! Every public operation checks a connection out of the pool, runs its
//! statements on the blocking thread pool and maps rows back to domain
//! records. All values are bound as parameters. Multi-row writes run inside
//! one `IMMEDIATE` transaction so a batch is applied completely or not at all.

use crate::{
    error::StorageError,
    model::{Goal, Run, RunFields, Stats, UserId},
    pool::ConnectionPool,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashSet;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

const SELECT_RUNS: &str = "SELECT id, user_id, time_created, distance, time, weight \
     FROM runs WHERE user_id = ?1 ORDER BY time_created DESC, id DESC";
const SELECT_TOTALS: &str = "SELECT COALESCE(SUM(distance), 0), MIN(weight) \
     FROM runs WHERE user_id = ?1";
const SELECT_GOAL: &str = "SELECT distance, weight FROM goals WHERE user_id = ?1";
const INSERT_RUN: &str = "INSERT INTO runs (user_id, time_created, distance, time, weight) \
     VALUES (?1, ?2, ?3, ?4, ?5)";
const UPDATE_RUN: &str = "UPDATE runs SET time_created = ?1, distance = ?2, time = ?3, weight = ?4 \
     WHERE id = ?5 AND user_id = ?6";
const DELETE_RUN: &str = "DELETE FROM runs WHERE id = ?1 AND user_id = ?2";
const UPSERT_GOAL: &str = "INSERT INTO goals (user_id, distance, weight) VALUES (?1, ?2, ?3) \
     ON CONFLICT (user_id) DO UPDATE SET distance = excluded.distance, weight = excluded.weight";

/// Translates run operations to SQL over a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct RunGateway {
    pool: ConnectionPool,
}

impl RunGateway {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// All of the user's runs, most recently finished first.
    pub async fn list_runs(
        &self,
        user: UserId,
        deadline: Option<Instant>,
    ) -> Result<Vec<Run>, StorageError> {
        self.with_connection("list_runs", deadline, move |conn| select_runs(conn, user))
            .await
    }

    /// Distance total, lowest weight and goal for the user.
    pub async fn compute_stats(
        &self,
        user: UserId,
        deadline: Option<Instant>,
    ) -> Result<Stats, StorageError> {
        self.with_connection("compute_stats", deadline, move |conn| {
            let (meters_sum, weight_lowest) = select_totals(conn, user)?;
            let goal = select_goal(conn, user)?.unwrap_or_default();
            Ok(Stats {
                user_id: user,
                meters_sum,
                weight_lowest,
                goal,
            })
        })
        .await
    }

    pub async fn insert_run(
        &self,
        user: UserId,
        fields: RunFields,
        deadline: Option<Instant>,
    ) -> Result<Run, StorageError> {
        let mut inserted = self.insert_runs(user, vec![fields], deadline).await?;
        inserted
            .pop()
            .ok_or_else(|| StorageError::OutOfRange("insert produced no row".to_string()))
    }

    /// Store a batch of runs in input order. Ids are assigned by the store.
    pub async fn insert_runs(
        &self,
        user: UserId,
        batch: Vec<RunFields>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Run>, StorageError> {
        self.with_connection("insert_runs", deadline, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut inserted = Vec::with_capacity(batch.len());
            {
                let mut stmt = tx.prepare_cached(INSERT_RUN)?;
                for fields in batch {
                    stmt.execute(params![
                        user,
                        fields.time_finished.timestamp(),
                        fields.meters,
                        fields.time_in_seconds,
                        fields.weight.map(f64::from),
                    ])?;
                    inserted.push(Run::from_fields(tx.last_insert_rowid(), user, fields));
                }
            }
            tx.commit()?;
            debug!(%user, count = inserted.len(), "runs inserted");
            Ok(inserted)
        })
        .await
    }

    /// Replace the fields of the run `(id, user)`. `None` if no such run.
    pub async fn update_run(
        &self,
        user: UserId,
        id: i64,
        fields: RunFields,
        deadline: Option<Instant>,
    ) -> Result<Option<Run>, StorageError> {
        let mut updated = self.update_runs(user, vec![(id, fields)], deadline).await?;
        Ok(updated.pop())
    }

    /// Apply a batch of edits. Returns the runs that matched, in input order.
    pub async fn update_runs(
        &self,
        user: UserId,
        batch: Vec<(i64, RunFields)>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Run>, StorageError> {
        self.with_connection("update_runs", deadline, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut updated = Vec::with_capacity(batch.len());
            {
                let mut stmt = tx.prepare_cached(UPDATE_RUN)?;
                for (id, fields) in batch {
                    let changed = stmt.execute(params![
                        fields.time_finished.timestamp(),
                        fields.meters,
                        fields.time_in_seconds,
                        fields.weight.map(f64::from),
                        id,
                        user,
                    ])?;
                    if changed > 0 {
                        updated.push(Run::from_fields(id, user, fields));
                    }
                }
            }
            tx.commit()?;
            debug!(%user, count = updated.len(), "runs updated");
            Ok(updated)
        })
        .await
    }

    /// Delete the user's runs with the given ids. Returns the ids that existed.
    pub async fn delete_runs(
        &self,
        user: UserId,
        ids: Vec<i64>,
        deadline: Option<Instant>,
    ) -> Result<Vec<i64>, StorageError> {
        self.with_connection("delete_runs", deadline, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut seen = HashSet::with_capacity(ids.len());
            let mut removed = Vec::new();
            {
                let mut stmt = tx.prepare_cached(DELETE_RUN)?;
                for id in ids.into_iter().filter(|id| seen.insert(*id)) {
                    if stmt.execute(params![id, user])? > 0 {
                        removed.push(id);
                    }
                }
            }
            tx.commit()?;
            debug!(%user, count = removed.len(), "runs deleted");
            Ok(removed)
        })
        .await
    }

    pub async fn goal(
        &self,
        user: UserId,
        deadline: Option<Instant>,
    ) -> Result<Option<Goal>, StorageError> {
        self.with_connection("goal", deadline, move |conn| select_goal(conn, user))
            .await
    }

    /// Create or replace the user's goal row.
    pub async fn set_goal(
        &self,
        user: UserId,
        goal: Goal,
        deadline: Option<Instant>,
    ) -> Result<Goal, StorageError> {
        self.with_connection("set_goal", deadline, move |conn| {
            conn.execute(
                UPSERT_GOAL,
                params![user, goal.meters, goal.weight.map(f64::from)],
            )?;
            Ok(goal)
        })
        .await
    }

    /// Run `f` on a pooled connection on the blocking pool, bounded by `deadline`.
    ///
    /// When the deadline passes while SQL is executing, the statement is
    /// interrupted and the connection still returns to the pool once the
    /// blocking task unwinds.
    async fn with_connection<T, F>(
        &self,
        op: &'static str,
        deadline: Option<Instant>,
        f: F,
    ) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        if deadline.is_some_and(|at| at <= Instant::now()) {
            return Err(StorageError::DeadlineExceeded(op));
        }

        let mut conn = match deadline {
            Some(at) => timeout_at(at, self.pool.acquire())
                .await
                .map_err(|_| StorageError::DeadlineExceeded(op))??,
            None => self.pool.acquire().await?,
        };

        let interrupt = conn.get_interrupt_handle();
        let task = tokio::task::spawn_blocking(move || f(&mut *conn));
        let joined = match deadline {
            Some(at) => match timeout_at(at, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    interrupt.interrupt();
                    return Err(StorageError::DeadlineExceeded(op));
                }
            },
            None => task.await,
        };
        joined.map_err(|err| StorageError::Task {
            op,
            reason: err.to_string(),
        })?
    }
}

fn select_runs(conn: &Connection, user: UserId) -> Result<Vec<Run>, StorageError> {
    let mut stmt = conn.prepare_cached(SELECT_RUNS)?;
    let runs = stmt
        .query_map(params![user], map_run)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(runs)
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let seconds: i64 = row.get(2)?;
    let time_finished: DateTime<Utc> = DateTime::from_timestamp(seconds, 0)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, seconds))?;
    let weight: Option<f64> = row.get(5)?;
    Ok(Run {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        time_finished,
        meters: row.get(3)?,
        time_in_seconds: row.get(4)?,
        weight: weight.map(|w| w as f32),
    })
}

fn select_totals(conn: &Connection, user: UserId) -> Result<(u64, Option<f32>), StorageError> {
    let (sum, lowest): (i64, Option<f64>) = conn
        .prepare_cached(SELECT_TOTALS)?
        .query_row(params![user], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let sum = u64::try_from(sum)
        .map_err(|_| StorageError::OutOfRange(format!("negative distance total {sum}")))?;
    Ok((sum, lowest.map(|w| w as f32)))
}

fn select_goal(conn: &Connection, user: UserId) -> Result<Option<Goal>, StorageError> {
    let goal = conn
        .prepare_cached(SELECT_GOAL)?
        .query_row(params![user], |row| {
            let weight: Option<f64> = row.get(1)?;
            Ok(Goal {
                meters: row.get(0)?,
                weight: weight.map(|w| w as f32),
            })
        })
        .optional()?;
    Ok(goal)
}
