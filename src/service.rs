use crate::{
    error::{Status, StorageError},
    gateway::RunGateway,
    model::UserId,
    wire::{
        AddRunsRequest, AddRunsResponse, DeleteRunsRequest, DeleteRunsResponse, EditRunsRequest,
        EditRunsResponse, GetListRequest, GetListResponse, GetStatsRequest, GetStatsResponse,
        RunList, SetGoalRequest, SetGoalResponse,
    },
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Fully qualified name under which the operations are exposed.
pub const SERVICE_NAME: &str = "greendeer.RunService";

/// Who is calling and how long they are willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub user: UserId,
    pub deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The run service contract, independent of transport.
#[async_trait]
pub trait RunRpc: Send + Sync {
    async fn get_list(
        &self,
        ctx: &CallContext,
        request: GetListRequest,
    ) -> Result<GetListResponse, Status>;

    async fn get_stats(
        &self,
        ctx: &CallContext,
        request: GetStatsRequest,
    ) -> Result<GetStatsResponse, Status>;

    async fn add_runs(
        &self,
        ctx: &CallContext,
        request: AddRunsRequest,
    ) -> Result<AddRunsResponse, Status>;

    async fn edit_runs(
        &self,
        ctx: &CallContext,
        request: EditRunsRequest,
    ) -> Result<EditRunsResponse, Status>;

    async fn delete_runs(
        &self,
        ctx: &CallContext,
        request: DeleteRunsRequest,
    ) -> Result<DeleteRunsResponse, Status>;

    async fn set_goal(
        &self,
        ctx: &CallContext,
        request: SetGoalRequest,
    ) -> Result<SetGoalResponse, Status>;
}

/// [`RunRpc`] backed by the SQLite gateway.
#[derive(Debug, Clone)]
pub struct RunService {
    gateway: RunGateway,
}

impl RunService {
    pub fn new(gateway: RunGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &RunGateway {
        &self.gateway
    }
}

/// Log the full storage error and reduce it to a caller-safe status.
fn storage_failure(op: &'static str, ctx: &CallContext) -> impl FnOnce(StorageError) -> Status {
    let user = ctx.user;
    move |err| {
        match &err {
            StorageError::DeadlineExceeded(_) => warn!(op, %user, error = %err, "deadline exceeded"),
            _ => error!(op, %user, error = %err, "storage operation failed"),
        }
        Status::from(&err)
    }
}

#[async_trait]
impl RunRpc for RunService {
    async fn get_list(
        &self,
        ctx: &CallContext,
        _request: GetListRequest,
    ) -> Result<GetListResponse, Status> {
        let runs = self
            .gateway
            .list_runs(ctx.user, ctx.deadline)
            .await
            .map_err(storage_failure("get_list", ctx))?;
        debug!(user = %ctx.user, count = runs.len(), "listed runs");
        Ok(GetListResponse {
            run_list: runs.into_iter().collect(),
        })
    }

    async fn get_stats(
        &self,
        ctx: &CallContext,
        _request: GetStatsRequest,
    ) -> Result<GetStatsResponse, Status> {
        let stats = self
            .gateway
            .compute_stats(ctx.user, ctx.deadline)
            .await
            .map_err(storage_failure("get_stats", ctx))?;
        Ok(GetStatsResponse {
            stats: stats.into(),
        })
    }

    async fn add_runs(
        &self,
        ctx: &CallContext,
        request: AddRunsRequest,
    ) -> Result<AddRunsResponse, Status> {
        let batch = request.runs_to_add.to_fields("runs_to_add")?;
        let added = self
            .gateway
            .insert_runs(ctx.user, batch, ctx.deadline)
            .await
            .map_err(storage_failure("add_runs", ctx))?;
        Ok(AddRunsResponse {
            added_runs: added.into_iter().collect(),
        })
    }

    async fn edit_runs(
        &self,
        ctx: &CallContext,
        request: EditRunsRequest,
    ) -> Result<EditRunsResponse, Status> {
        let fields = request.runs_to_edit.to_fields("runs_to_edit")?;
        let batch: Vec<_> = request
            .runs_to_edit
            .runs
            .iter()
            .map(|run| run.id)
            .zip(fields)
            .collect();
        let requested = batch.len();
        let changed = self
            .gateway
            .update_runs(ctx.user, batch, ctx.deadline)
            .await
            .map_err(storage_failure("edit_runs", ctx))?;
        if changed.len() < requested {
            debug!(
                user = %ctx.user,
                requested,
                matched = changed.len(),
                "some edits matched no run"
            );
        }
        Ok(EditRunsResponse {
            changed_runs: changed.into_iter().collect::<RunList>(),
        })
    }

    async fn delete_runs(
        &self,
        ctx: &CallContext,
        request: DeleteRunsRequest,
    ) -> Result<DeleteRunsResponse, Status> {
        let removed_ids = self
            .gateway
            .delete_runs(ctx.user, request.ids, ctx.deadline)
            .await
            .map_err(storage_failure("delete_runs", ctx))?;
        Ok(DeleteRunsResponse { removed_ids })
    }

    async fn set_goal(
        &self,
        ctx: &CallContext,
        request: SetGoalRequest,
    ) -> Result<SetGoalResponse, Status> {
        let goal = request.goal.to_goal()?;
        let stored = self
            .gateway
            .set_goal(ctx.user, goal, ctx.deadline)
            .await
            .map_err(storage_failure("set_goal", ctx))?;
        Ok(SetGoalResponse {
            goal: stored.into(),
        })
    }
}
