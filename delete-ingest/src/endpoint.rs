use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use delete_common::work_item::RequestInformation;
use tracing::instrument;

use crate::api::{IngestError, IngestSummary};
use crate::router;

const WATCHDOG_HEADER: &str = "x-watchdog-request";
const SERVED_BY_HEADER: &str = "x-served-by";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// What the request itself tells us, recorded on every work item it produces.
pub fn request_information(
    headers: &HeaderMap,
    request_time: time::OffsetDateTime,
) -> RequestInformation {
    let user_agent = header(headers, "user-agent").map(String::from);
    let served_by = header(headers, SERVED_BY_HEADER).map(String::from);

    RequestInformation {
        had_server_name: served_by.is_some(),
        had_user_agent: user_agent.is_some(),
        is_watchdog_request: header(headers, WATCHDOG_HEADER)
            .is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1"),
        served_by,
        user_agent,
        was_compressed: header(headers, "content-encoding")
            .is_some_and(|value| !value.eq_ignore_ascii_case("identity")),
        request_time,
    }
}

#[instrument(skip_all, fields(user_agent, watchdog))]
pub async fn device_delete(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestSummary>, IngestError> {
    let information =
        request_information(&headers, state.gateway.timesource().current_time());

    tracing::Span::current().record("user_agent", information.user_agent.as_deref());
    tracing::Span::current().record("watchdog", information.is_watchdog_request);

    let summary = state.gateway.ingest(&body, information).await?;

    Ok(Json(summary))
}
