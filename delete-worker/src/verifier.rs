use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::VerifierError;

/// Issues the verifier token that authorizes one delete command for one device.
#[async_trait]
pub trait VerifierClient: Send + Sync {
    async fn get_verifier(
        &self,
        command_id: Uuid,
        device_id: i64,
        data_type: &str,
    ) -> Result<String, VerifierError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifierRequest<'a> {
    command_id: Uuid,
    device_id: i64,
    data_type: &'a str,
}

#[derive(Deserialize)]
struct VerifierResponse {
    #[serde(default)]
    verifier: String,
}

pub struct HttpVerifierClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpVerifierClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, VerifierError> {
        let endpoint = Url::parse(&format!(
            "{}/verifier/device-delete",
            base_url.trim_end_matches('/')
        ))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl VerifierClient for HttpVerifierClient {
    async fn get_verifier(
        &self,
        command_id: Uuid,
        device_id: i64,
        data_type: &str,
    ) -> Result<String, VerifierError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&VerifierRequest {
                command_id,
                device_id,
                data_type,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerifierError::Status { status, body });
        }

        let token = response.json::<VerifierResponse>().await?.verifier;
        if token.is_empty() {
            return Err(VerifierError::EmptyToken);
        }

        debug!(%command_id, data_type, "acquired verifier");
        Ok(token)
    }
}
