//! HTTP binding of the run service.
//!
//! Each operation is a `POST /greendeer.RunService/<Method>` carrying the JSON
//! request message and answering with the JSON response message. Failures
//! answer with a [`Status`] body and an HTTP status derived from its code.

use crate::{
    error::{Code, Status},
    model::UserId,
    service::{CallContext, RunRpc, SERVICE_NAME},
    wire::{
        AddRunsRequest, AddRunsResponse, DeleteRunsRequest, DeleteRunsResponse, EditRunsRequest,
        EditRunsResponse, GetListRequest, GetListResponse, GetStatsRequest, GetStatsResponse,
        SetGoalRequest, SetGoalResponse,
    },
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::{future::Future, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;

/// Request header carrying the caller's time budget in milliseconds.
pub const TIMEOUT_HEADER: &str = "x-timeout-ms";

/// Shared state of the RPC endpoint.
#[derive(Clone)]
pub struct RpcState {
    service: Arc<dyn RunRpc>,
    user: UserId,
    default_timeout: Option<Duration>,
}

impl RpcState {
    /// `user` is the implicit principal of this single-user deployment.
    pub fn new(service: Arc<dyn RunRpc>, user: UserId, default_timeout: Option<Duration>) -> Self {
        Self {
            service,
            user,
            default_timeout,
        }
    }

    fn context(&self, headers: &HeaderMap) -> Result<CallContext, Status> {
        let timeout = match headers.get(TIMEOUT_HEADER) {
            Some(value) => {
                let millis = value
                    .to_str()
                    .ok()
                    .and_then(|raw| raw.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        Status::invalid_argument(format!(
                            "{TIMEOUT_HEADER} must be a whole number of milliseconds"
                        ))
                    })?;
                Some(Duration::from_millis(millis))
            }
            None => self.default_timeout,
        };
        let ctx = CallContext::new(self.user);
        Ok(match timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        })
    }
}

impl IntoResponse for Status {
    fn into_response(self) -> Response {
        let status = match self.code {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route(&method_path("GetList"), post(get_list))
        .route(&method_path("GetStats"), post(get_stats))
        .route(&method_path("AddRuns"), post(add_runs))
        .route(&method_path("EditRuns"), post(edit_runs))
        .route(&method_path("DeleteRuns"), post(delete_runs))
        .route(&method_path("SetGoal"), post(set_goal))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Route of one operation, e.g. `/greendeer.RunService/GetList`.
pub fn method_path(method: &str) -> String {
    format!("/{SERVICE_NAME}/{method}")
}

type RpcResult<T> = Result<Json<T>, Status>;

/// Decode the request, build the call context and invoke one operation.
async fn dispatch<Req, Resp, F, Fut>(
    state: RpcState,
    headers: HeaderMap,
    payload: Result<Json<Req>, JsonRejection>,
    call: F,
) -> RpcResult<Resp>
where
    F: FnOnce(Arc<dyn RunRpc>, CallContext, Req) -> Fut,
    Fut: Future<Output = Result<Resp, Status>>,
{
    let Json(request) = payload.map_err(|rejection| Status::invalid_argument(rejection.body_text()))?;
    let ctx = state.context(&headers)?;
    call(Arc::clone(&state.service), ctx, request).await.map(Json)
}

async fn get_list(
    State(state): State<RpcState>,
    headers: HeaderMap,
    payload: Result<Json<GetListRequest>, JsonRejection>,
) -> RpcResult<GetListResponse> {
    dispatch(state, headers, payload, |svc, ctx, req| async move {
        svc.get_list(&ctx, req).await
    })
    .await
}

async fn get_stats(
    State(state): State<RpcState>,
    headers: HeaderMap,
    payload: Result<Json<GetStatsRequest>, JsonRejection>,
) -> RpcResult<GetStatsResponse> {
    dispatch(state, headers, payload, |svc, ctx, req| async move {
        svc.get_stats(&ctx, req).await
    })
    .await
}

async fn add_runs(
    State(state): State<RpcState>,
    headers: HeaderMap,
    payload: Result<Json<AddRunsRequest>, JsonRejection>,
) -> RpcResult<AddRunsResponse> {
    dispatch(state, headers, payload, |svc, ctx, req| async move {
        svc.add_runs(&ctx, req).await
    })
    .await
}

async fn edit_runs(
    State(state): State<RpcState>,
    headers: HeaderMap,
    payload: Result<Json<EditRunsRequest>, JsonRejection>,
) -> RpcResult<EditRunsResponse> {
    dispatch(state, headers, payload, |svc, ctx, req| async move {
        svc.edit_runs(&ctx, req).await
    })
    .await
}

async fn delete_runs(
    State(state): State<RpcState>,
    headers: HeaderMap,
    payload: Result<Json<DeleteRunsRequest>, JsonRejection>,
) -> RpcResult<DeleteRunsResponse> {
    dispatch(state, headers, payload, |svc, ctx, req| async move {
        svc.delete_runs(&ctx, req).await
    })
    .await
}

async fn set_goal(
    State(state): State<RpcState>,
    headers: HeaderMap,
    payload: Result<Json<SetGoalRequest>, JsonRejection>,
) -> RpcResult<SetGoalResponse> {
    dispatch(state, headers, payload, |svc, ctx, req| async move {
        svc.set_goal(&ctx, req).await
    })
    .await
}
