use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Url};

use crate::error::ForwardError;
use crate::signal::DeleteRequest;

const MAX_ERROR_BODY_BYTES: usize = 1024;

/// Hands delete requests over to the downstream command system.
#[async_trait]
pub trait CommandForwarder: Send + Sync {
    async fn forward(&self, requests: &[DeleteRequest]) -> Result<(), ForwardError>;
}

/// Build the HTTP client shared by the verifier and the forwarder.
pub fn build_http_client(request_timeout: Duration) -> reqwest::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("Device Delete Worker")
        .timeout(request_timeout)
        .build()
}

pub struct HttpCommandForwarder {
    client: Client,
    endpoint: Url,
}

impl HttpCommandForwarder {
    pub fn new(client: Client, base_url: &str) -> Result<Self, ForwardError> {
        let endpoint = Url::parse(&format!(
            "{}/commands/delete",
            base_url.trim_end_matches('/')
        ))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl CommandForwarder for HttpCommandForwarder {
    async fn forward(&self, requests: &[DeleteRequest]) -> Result<(), ForwardError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(requests)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY_BYTES {
            let mut end = MAX_ERROR_BODY_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }

        Err(ForwardError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use delete_common::work_item::RequestInformation;
    use httpmock::prelude::*;
    use time::macros::datetime;
    use uuid::Uuid;

    use super::*;
    use crate::signal::Signal;

    fn request(data_type: &str) -> DeleteRequest {
        DeleteRequest::new(
            42,
            Signal::new(data_type, Uuid::new_v4()),
            "token".to_owned(),
            None,
            "cv".to_owned(),
            &RequestInformation::new(datetime!(2024-03-01 12:00 UTC)),
        )
    }

    #[tokio::test]
    async fn test_forward_posts_all_requests_at_once() {
        let server = MockServer::start();
        let requests = vec![request("BrowsingHistory"), request("CustomerContent")];
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/commands/delete")
                .header("content-type", "application/json")
                .json_body(serde_json::to_value(&requests).unwrap());
            then.status(202);
        });

        let client = build_http_client(Duration::from_secs(5)).unwrap();
        let forwarder = HttpCommandForwarder::new(client, &server.base_url()).unwrap();

        forwarder.forward(&requests).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_non_success_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/commands/delete");
            then.status(400).body("bad request");
        });

        let client = build_http_client(Duration::from_secs(5)).unwrap();
        let forwarder = HttpCommandForwarder::new(client, &server.base_url()).unwrap();

        match forwarder.forward(&[request("BrowsingHistory")]).await {
            Err(ForwardError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert_eq!(body, "bad request");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_base_url() {
        let client = build_http_client(Duration::from_secs(5)).unwrap();

        assert!(matches!(
            HttpCommandForwarder::new(client, "not a url"),
            Err(ForwardError::Url(_))
        ));
    }
}
