use std::future::ready;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use delete_common::metrics::{setup_metrics_recorder, track_metrics};
use tower_http::trace::TraceLayer;

use crate::endpoint;
use crate::gateway::IngestionGateway;

#[derive(Clone)]
pub struct State {
    pub gateway: Arc<IngestionGateway>,
}

async fn index() -> &'static str {
    "device delete ingest"
}

async fn liveness() -> &'static str {
    "ok"
}

pub fn router(gateway: Arc<IngestionGateway>, metrics: bool) -> Router {
    let state = State { gateway };

    let router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .route("/_readiness", get(liveness))
        .route("/v1/devicedelete", post(endpoint::device_delete))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when used as a library (during tests etc)
    // does not work well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
