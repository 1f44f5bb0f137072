//! HTTP ingress: `POST /submit`. The only endpoint the core exposes; an
//! operator CLI (`reservations`) covers visibility, not HTTP.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use gpu_control_plane::now_ms;
use gpu_sched_core::error::Categorizable;
use gpu_sched_core::ingress::submit;
use gpu_sched_core::model::SubmitRequest;
use gpu_sched_core::SchedulerConfig;
use gpu_sched_redis::RedisStore;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "GPU_SCHED_HTTP_ADDR")]
    addr: Option<String>,
    #[arg(long, env = "GPU_SCHED_REDIS_URL")]
    redis_url: Option<String>,
}

struct AppState {
    store: RedisStore,
    idempotency_ttl_s: i64,
}

#[derive(Deserialize)]
struct SubmitBody {
    tenant_id: String,
    agent_id: String,
    prompt: String,
    #[serde(default = "default_cost")]
    cost_gpu_seconds: f64,
}

fn default_cost() -> f64 {
    5.0
}

#[derive(Serialize)]
struct SubmitResponse {
    job_id: String,
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn handle_submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ErrorResponse>)> {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let req = SubmitRequest {
        tenant_id: body.tenant_id,
        agent_id: body.agent_id,
        prompt: body.prompt,
        cost_gpu_seconds: body.cost_gpu_seconds,
        idempotency_key,
    };

    submit(&state.store, req, now_ms(), state.idempotency_ttl_s)
        .await
        .map(|outcome| {
            Json(SubmitResponse {
                job_id: outcome.job_id,
                status: outcome.status,
            })
        })
        .map_err(|e| {
            let status = match e.category() {
                gpu_sched_core::SafeErrorCategory::Validation => StatusCode::BAD_REQUEST,
                gpu_sched_core::SafeErrorCategory::NotFound => StatusCode::NOT_FOUND,
                gpu_sched_core::SafeErrorCategory::Transient => StatusCode::SERVICE_UNAVAILABLE,
                gpu_sched_core::SafeErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(ErrorResponse {
                    error: e.safe_message().to_string(),
                }),
            )
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gpu_control_plane::init_tracing();
    let args = Args::parse();
    let cfg = SchedulerConfig::from_env()?;

    let redis_url = args.redis_url.unwrap_or(cfg.redis_url.clone());
    let addr = args.addr.unwrap_or(cfg.http_addr.clone());

    let store = RedisStore::connect(&redis_url).await?;
    store.ensure_groups().await?;
    let state = Arc::new(AppState {
        store,
        idempotency_ttl_s: cfg.idempotency_ttl_s,
    });

    let app = Router::new()
        .route("/submit", post(handle_submit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(%addr, "ingress listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
