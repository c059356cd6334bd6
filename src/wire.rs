//! Request and response messages of the `greendeer.RunService` RPC surface.
//!
//! Optional values travel as a value plus a `has_*` flag. The flag is always
//! derived from an `Option` when encoding, and only the flag decides whether
//! the value is read when decoding, so an unset weight never becomes `0.0`.

use crate::{
    error::Status,
    model::{Goal, Run, RunFields, Stats},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point in time with seconds precision. `nanos` is accepted but dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self::from_seconds(time.timestamp())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMessage {
    pub id: i64,
    pub user_id: i64,
    pub time_finished: Timestamp,
    pub meters: u32,
    pub time_in_seconds: u32,
    pub weight: f32,
    pub has_weight: bool,
}

impl RunMessage {
    /// Validate the client-controlled fields. `id` and `user_id` are ignored.
    pub fn to_fields(&self) -> Result<RunFields, String> {
        let time_finished = DateTime::from_timestamp(self.time_finished.seconds, 0)
            .ok_or_else(|| format!("time_finished {} is out of range", self.time_finished.seconds))?;
        let weight = if self.has_weight {
            if !self.weight.is_finite() || self.weight < 0.0 {
                return Err(format!("weight {} is not a valid body weight", self.weight));
            }
            Some(self.weight)
        } else {
            None
        };
        Ok(RunFields {
            time_finished,
            meters: self.meters,
            time_in_seconds: self.time_in_seconds,
            weight,
        })
    }
}

impl From<Run> for RunMessage {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            user_id: run.user_id.0,
            time_finished: run.time_finished.into(),
            meters: run.meters,
            time_in_seconds: run.time_in_seconds,
            weight: run.weight.unwrap_or_default(),
            has_weight: run.weight.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunList {
    pub runs: Vec<RunMessage>,
}

impl RunList {
    /// Validate every run of a batch, naming the first offending index.
    pub fn to_fields(&self, field: &str) -> Result<Vec<RunFields>, Status> {
        self.runs
            .iter()
            .enumerate()
            .map(|(index, run)| {
                run.to_fields()
                    .map_err(|reason| Status::invalid_argument(format!("{field}[{index}]: {reason}")))
            })
            .collect()
    }
}

impl FromIterator<Run> for RunList {
    fn from_iter<I: IntoIterator<Item = Run>>(iter: I) -> Self {
        Self {
            runs: iter.into_iter().map(RunMessage::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsMessage {
    pub user_id: i64,
    pub meters_sum: u64,
    pub weight_lowest: f32,
    pub has_weight_lowest: bool,
    pub meters_goal: u32,
    pub has_meters_goal: bool,
    pub weight_goal: f32,
    pub has_weight_goal: bool,
}

impl From<Stats> for StatsMessage {
    fn from(stats: Stats) -> Self {
        Self {
            user_id: stats.user_id.0,
            meters_sum: stats.meters_sum,
            weight_lowest: stats.weight_lowest.unwrap_or_default(),
            has_weight_lowest: stats.weight_lowest.is_some(),
            meters_goal: stats.goal.meters.unwrap_or_default(),
            has_meters_goal: stats.goal.meters.is_some(),
            weight_goal: stats.goal.weight.unwrap_or_default(),
            has_weight_goal: stats.goal.weight.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalMessage {
    pub meters: u32,
    pub has_meters: bool,
    pub weight: f32,
    pub has_weight: bool,
}

impl GoalMessage {
    pub fn to_goal(&self) -> Result<Goal, Status> {
        let weight = if self.has_weight {
            if !self.weight.is_finite() || self.weight < 0.0 {
                return Err(Status::invalid_argument(format!(
                    "goal.weight {} is not a valid body weight",
                    self.weight
                )));
            }
            Some(self.weight)
        } else {
            None
        };
        Ok(Goal {
            meters: self.has_meters.then_some(self.meters),
            weight,
        })
    }
}

impl From<Goal> for GoalMessage {
    fn from(goal: Goal) -> Self {
        Self {
            meters: goal.meters.unwrap_or_default(),
            has_meters: goal.meters.is_some(),
            weight: goal.weight.unwrap_or_default(),
            has_weight: goal.weight.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetListRequest {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetListResponse {
    pub run_list: RunList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetStatsRequest {}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetStatsResponse {
    pub stats: StatsMessage,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddRunsRequest {
    pub runs_to_add: RunList,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddRunsResponse {
    pub added_runs: RunList,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditRunsRequest {
    pub runs_to_edit: RunList,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditRunsResponse {
    pub changed_runs: RunList,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRunsRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRunsResponse {
    pub removed_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetGoalRequest {
    pub goal: GoalMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetGoalResponse {
    pub goal: GoalMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;

    fn sample(has_weight: bool, weight: f32) -> RunMessage {
        RunMessage {
            id: 77,
            user_id: 42,
            time_finished: Timestamp::from_seconds(1_500_000_000),
            meters: 7000,
            time_in_seconds: 2620,
            weight,
            has_weight,
        }
    }

    #[test]
    fn weight_presence_follows_the_flag() {
        let with = sample(true, 84.7).to_fields().unwrap();
        assert_eq!(with.weight, Some(84.7));

        // A stale value without the flag is ignored.
        let without = sample(false, 84.7).to_fields().unwrap();
        assert_eq!(without.weight, None);

        // Zero with the flag is a real value.
        assert_eq!(sample(true, 0.0).to_fields().unwrap().weight, Some(0.0));
    }

    #[test]
    fn unset_weight_encodes_as_absent() {
        let run = Run::from_fields(
            3,
            UserId(1),
            RunFields {
                time_finished: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
                meters: 3100,
                time_in_seconds: 991,
                weight: None,
            },
        );
        let message = RunMessage::from(run);
        assert!(!message.has_weight);
        assert_eq!(message.weight, 0.0);
        assert_eq!(message.time_finished, Timestamp::from_seconds(1_600_000_000));
        assert_eq!(message.user_id, 1);
    }

    #[test]
    fn rejects_invalid_weights_and_times() {
        assert!(sample(true, f32::NAN).to_fields().is_err());
        assert!(sample(true, -1.0).to_fields().is_err());
        assert!(sample(false, f32::NAN).to_fields().is_ok());

        let mut far = sample(false, 0.0);
        far.time_finished = Timestamp::from_seconds(i64::MAX);
        assert!(far.to_fields().is_err());
    }

    #[test]
    fn batch_validation_names_the_index() {
        let list = RunList {
            runs: vec![sample(true, 80.0), sample(true, -3.0)],
        };
        let status = list.to_fields("runs_to_add").unwrap_err();
        assert_eq!(status.code, crate::error::Code::InvalidArgument);
        assert!(status.message.starts_with("runs_to_add[1]:"));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let run: RunMessage = serde_json::from_str(r#"{"meters": 3100}"#).unwrap();
        assert_eq!(run.meters, 3100);
        assert!(!run.has_weight);

        assert!(serde_json::from_str::<RunMessage>(r#"{"meters": -5}"#).is_err());
    }

    #[test]
    fn goal_flags_round_trip() {
        let goal = GoalMessage {
            meters: 0,
            has_meters: false,
            weight: 80.0,
            has_weight: true,
        }
        .to_goal()
        .unwrap();
        assert_eq!(
            goal,
            Goal {
                meters: None,
                weight: Some(80.0)
            }
        );
        assert!(!GoalMessage::from(goal).has_meters);
    }
}
