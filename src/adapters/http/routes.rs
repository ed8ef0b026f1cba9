//! Job submission and status routes.

use super::error::{ApiError, ApiResult};
use crate::application::dispatcher::JobDispatcher;
use crate::domain::jobs::{JobSubmission, NaturalKey};
use crate::domain::state::PipelineState;
use crate::ports::queue::JobQueue;
use crate::ports::repository::JobRepository;
use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router<Q, R>(dispatcher: Arc<JobDispatcher<Q, R>>) -> Router
where
    Q: JobQueue + 'static,
    R: JobRepository + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/submit", post(submit::<Q, R>))
        .route("/status", get(status))
        .route("/jobs/:meeting_id/:take/:user_id", get(job_status::<Q, R>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

/// POST /submit - Validate and queue a job.
async fn submit<Q, R>(
    State(dispatcher): State<Arc<JobDispatcher<Q, R>>>,
    body: Bytes,
) -> ApiResult<Json<Value>>
where
    Q: JobQueue + 'static,
    R: JobRepository + 'static,
{
    let submission: JobSubmission = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;

    let accepted = dispatcher.submit_raw(submission).await?;
    let key = &accepted.request.key;
    let config = &accepted.config;

    Ok(Json(json!({
        "status": "accepted",
        "message": format!(
            "Processing started for meeting {}, take {}, user {}",
            key.meeting_id, key.take, key.user_id
        ),
        "run_id": accepted.run_id,
        "meeting_id": key.meeting_id,
        "take": key.take,
        "user_id": key.user_id,
        "config": {
            "remote_source_prefix": config.remote_source_prefix,
            "local_work_dir": config.local_work_dir,
            "local_output_dir": config.local_output_dir,
            "remote_destination_prefix": config.remote_destination_prefix,
        },
        "options": {
            "whisper_model": accepted.request.whisper_model,
            "cleanup": accepted.request.cleanup,
            "skip_transcription": accepted.request.skip_transcription,
        },
    })))
}

/// GET /status - Liveness.
async fn status() -> Json<Value> {
    Json(json!({
        "status": "running",
        "message": "Video processing service is running",
    }))
}

/// GET /jobs/:meeting_id/:take/:user_id - Latest snapshot for a key.
async fn job_status<Q, R>(
    State(dispatcher): State<Arc<JobDispatcher<Q, R>>>,
    Path((meeting_id, take, user_id)): Path<(String, String, String)>,
) -> ApiResult<Json<PipelineState>>
where
    Q: JobQueue + 'static,
    R: JobRepository + 'static,
{
    let key = NaturalKey::new(meeting_id, take, user_id)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let state = dispatcher
        .status(&key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No job found for {key}")))?;
    Ok(Json(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::memory::InMemoryJobRepository;
    use crate::adapters::local::queue::ChannelQueue;
    use crate::config::PipelineSettings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> (Router, ChannelQueue) {
        let queue = ChannelQueue::new(8);
        let dispatcher = JobDispatcher::new(
            queue.clone(),
            InMemoryJobRepository::new(),
            &PipelineSettings::default(),
        );
        (router(Arc::new(dispatcher)), queue)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::post("/submit")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status() {
        let (app, _) = app();
        let (status, body) = send(app, Request::get("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
    }

    #[tokio::test]
    async fn test_submit_accepted() {
        let (app, _queue) = app();
        let (status, body) = send(
            app,
            post_json(r#"{"meeting_id":"m1","take":"1","user_id":"u1","whisper_model":"small"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["config"]["remote_source_prefix"], "recordings/m1/1/u1/");
        assert_eq!(body["options"]["whisper_model"], "small");
        assert_eq!(body["options"]["cleanup"], true);
    }

    #[tokio::test]
    async fn test_submit_missing_token() {
        let (app, _) = app();
        let (status, body) = send(app, post_json(r#"{"meeting_id":"m1","take":"1"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("user_id"));
    }

    #[tokio::test]
    async fn test_submit_invalid_model() {
        let (app, _) = app();
        let (status, _) = send(
            app,
            post_json(r#"{"meeting_id":"m1","take":"1","user_id":"u1","whisper_model":"xl"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_not_json() {
        let (app, _) = app();
        let (status, _) = send(app, post_json("meeting_id=m1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_duplicate_submit_conflicts() {
        let (app, _queue) = app();
        let body = r#"{"meeting_id":"m1","take":"1","user_id":"u1"}"#;
        let (first, _) = send(app.clone(), post_json(body)).await;
        let (second, _) = send(app, post_json(body)).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_closed_queue_unavailable() {
        let (app, queue) = app();
        queue.close().await;
        let (status, _) = send(app, post_json(r#"{"meeting_id":"m1","take":"1","user_id":"u1"}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_job_status_lookup() {
        let (app, _queue) = app();
        let (_, submitted) = send(
            app.clone(),
            post_json(r#"{"meeting_id":"m1","take":"1","user_id":"u1"}"#),
        )
        .await;

        let (status, body) = send(
            app.clone(),
            Request::get("/jobs/m1/1/u1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run_id"], submitted["run_id"]);
        assert_eq!(body["stage"], "pending");

        let (status, _) = send(app, Request::get("/jobs/m1/1/nobody").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
