use std::sync::Arc;

use delete_common::device_id;
use delete_common::work_item::DeviceDeleteWorkItem;
use futures::future::try_join_all;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::FanoutError;
use crate::signal::{DeleteRequest, Signal};
use crate::verifier::VerifierClient;

/// Expands a work item into one delete request per configured data category.
pub struct SignalFanoutProcessor {
    verifier: Arc<dyn VerifierClient>,
    data_types: Vec<String>,
}

impl SignalFanoutProcessor {
    pub fn new(verifier: Arc<dyn VerifierClient>, data_types: Vec<String>) -> Self {
        Self {
            verifier,
            data_types,
        }
    }

    pub fn data_types(&self) -> &[String] {
        &self.data_types
    }

    /// Build the complete set of delete requests for `item`, or fail as a whole.
    ///
    /// Verifier tokens are requested concurrently, one per signal. The first failure aborts
    /// the item and any tokens already acquired are dropped.
    #[instrument(skip_all, fields(%request_id))]
    pub async fn process(
        &self,
        item: &DeviceDeleteWorkItem,
        request_id: Uuid,
    ) -> Result<Vec<DeleteRequest>, FanoutError> {
        let event = item
            .event()
            .map_err(|error| FanoutError::InvalidInput(format!("unreadable event: {error}")))?;
        let raw_device_id = event
            .device_id()
            .ok_or_else(|| FanoutError::InvalidInput("event has no device id".to_owned()))?;
        let device = device_id::decode(raw_device_id)
            .map_err(|error| FanoutError::InvalidInput(error.to_string()))?;

        let signals: Vec<Signal> = self
            .data_types
            .iter()
            .map(|data_type| Signal::new(data_type, request_id))
            .collect();

        let verifiers = try_join_all(signals.iter().map(|signal| {
            self.verifier
                .get_verifier(signal.command_id, device, &signal.data_type)
        }))
        .await
        .map_err(|error| {
            warn!(device, %error, "failed to acquire verifiers");
            FanoutError::Partner(error)
        })?;

        let correlation_vector = event
            .correlation_vector()
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        Ok(signals
            .into_iter()
            .zip(verifiers)
            .map(|(mut signal, verifier)| {
                signal.verifier = Some(verifier.clone());
                DeleteRequest::new(
                    device,
                    signal,
                    verifier,
                    event.time,
                    correlation_vector.clone(),
                    &item.request_information,
                )
            })
            .collect())
    }
}
