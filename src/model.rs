use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Principal that owns runs and goals. Every storage call is scoped to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

/// The client-controlled part of a run: everything except `id` and owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunFields {
    pub time_finished: DateTime<Utc>,
    pub meters: u32,
    pub time_in_seconds: u32,
    pub weight: Option<f32>,
}

/// A stored run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Run {
    pub id: i64,
    pub user_id: UserId,
    pub time_finished: DateTime<Utc>,
    pub meters: u32,
    pub time_in_seconds: u32,
    pub weight: Option<f32>,
}

impl Run {
    pub fn from_fields(id: i64, user_id: UserId, fields: RunFields) -> Self {
        Self {
            id,
            user_id,
            time_finished: fields.time_finished,
            meters: fields.meters,
            time_in_seconds: fields.time_in_seconds,
            weight: fields.weight,
        }
    }

    pub fn fields(&self) -> RunFields {
        RunFields {
            time_finished: self.time_finished,
            meters: self.meters,
            time_in_seconds: self.time_in_seconds,
            weight: self.weight,
        }
    }
}

/// Targets a user is working toward; either may be unset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Goal {
    pub meters: Option<u32>,
    pub weight: Option<f32>,
}

/// Aggregates computed on demand from a user's runs and goal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub user_id: UserId,
    pub meters_sum: u64,
    pub weight_lowest: Option<f32>,
    pub goal: Goal,
}
