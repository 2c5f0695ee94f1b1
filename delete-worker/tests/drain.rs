use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use delete_common::queue::memory::MemoryQueue;
use delete_common::queue::pool::{PoolConfig, QueuePool};
use delete_common::queue::strategy::Ordered;
use delete_common::queue::BackingQueue;
use delete_common::work_item::{DeviceDeleteWorkItem, RequestInformation};
use delete_worker::error::{DrainError, FanoutError, ForwardError, VerifierError};
use delete_worker::fanout::SignalFanoutProcessor;
use delete_worker::forwarder::{build_http_client, CommandForwarder, HttpCommandForwarder};
use delete_worker::signal::{DeleteRequest, DEFAULT_DATA_CATEGORIES};
use delete_worker::verifier::{HttpVerifierClient, VerifierClient};
use delete_worker::worker::DeleteWorker;
use httpmock::prelude::*;
use serde_json::json;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const FAILING_DEVICE: i64 = 666;

/// Refuses tokens for `FAILING_DEVICE`.
struct StubVerifier;

#[async_trait]
impl VerifierClient for StubVerifier {
    async fn get_verifier(
        &self,
        _command_id: Uuid,
        device_id: i64,
        data_type: &str,
    ) -> Result<String, VerifierError> {
        if device_id == FAILING_DEVICE {
            Err(VerifierError::EmptyToken)
        } else {
            Ok(format!("token-{device_id}-{data_type}"))
        }
    }
}

#[derive(Default)]
struct RecordingForwarder {
    fail: Mutex<bool>,
    batches: Mutex<Vec<Vec<DeleteRequest>>>,
}

impl RecordingForwarder {
    fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn batches(&self) -> Vec<Vec<DeleteRequest>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandForwarder for RecordingForwarder {
    async fn forward(&self, requests: &[DeleteRequest]) -> Result<(), ForwardError> {
        if *self.fail.lock().unwrap() {
            return Err(ForwardError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "down".to_owned(),
            });
        }

        self.batches.lock().unwrap().push(requests.to_vec());
        Ok(())
    }
}

struct Harness {
    queue: Arc<MemoryQueue>,
    pool: Arc<QueuePool<DeviceDeleteWorkItem>>,
    forwarder: Arc<RecordingForwarder>,
    worker: Arc<DeleteWorker>,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self::with_clients(Arc::new(StubVerifier), None)
    }

    fn with_clients(
        verifier: Arc<dyn VerifierClient>,
        forwarder: Option<Arc<dyn CommandForwarder>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let queue = Arc::new(MemoryQueue::new("test", "device-delete-0"));
        let backing: Arc<dyn BackingQueue> = queue.clone();
        let pool = Arc::new(
            QueuePool::new(vec![backing], Ordered, PoolConfig::default(), &cancel).unwrap(),
        );

        let recording = Arc::new(RecordingForwarder::default());
        let forwarder = forwarder.unwrap_or_else(|| {
            let forwarder: Arc<dyn CommandForwarder> = recording.clone();
            forwarder
        });

        let categories = DEFAULT_DATA_CATEGORIES
            .iter()
            .map(|category| category.to_string())
            .collect();
        let worker = Arc::new(DeleteWorker::new(
            "test-worker",
            pool.clone(),
            SignalFanoutProcessor::new(verifier, categories),
            forwarder,
            Duration::from_secs(1),
            10,
        ));

        Self {
            queue,
            pool,
            forwarder: recording,
            worker,
            cancel,
        }
    }

    async fn publish(&self, device_id: &str) -> Uuid {
        let event = json!({ "ext": { "device": { "id": device_id } }, "cV": "cv.0" });
        let item = DeviceDeleteWorkItem::new(
            serde_json::to_vec(&event).unwrap(),
            RequestInformation::new(datetime!(2024-03-01 12:00 UTC)),
        );

        self.pool
            .publish_one(&item, Duration::ZERO, &self.cancel)
            .await
            .unwrap();
        item.request_id
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_drain_returns_no_outcomes() {
    let harness = Harness::new();

    let outcomes = harness
        .worker
        .drain_and_forward(10, &harness.cancel)
        .await
        .unwrap();

    assert!(outcomes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_item_does_not_affect_others() {
    let harness = Harness::new();
    let good = harness.publish("g:42").await;
    let bad = harness.publish(&format!("g:{FAILING_DEVICE}")).await;

    let outcomes = harness
        .worker
        .drain_and_forward(10, &harness.cancel)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    let good_outcome = outcomes.iter().find(|o| o.request_id == good).unwrap();
    assert_eq!(
        *good_outcome.result.as_ref().unwrap(),
        DEFAULT_DATA_CATEGORIES.len()
    );
    let bad_outcome = outcomes.iter().find(|o| o.request_id == bad).unwrap();
    assert!(matches!(
        bad_outcome.result,
        Err(DrainError::Fanout(FanoutError::Partner(_)))
    ));

    // Only the forwarded item left its queue, and nothing was sent for the failed one.
    assert_eq!(harness.queue.size().await.unwrap(), 1);
    let batches = harness.forwarder.batches();
    assert_eq!(batches.len(), 1);
    assert!(batches[0]
        .iter()
        .all(|request| request.subject.global_device_id == 42 && request.request_guid == good));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_item_is_removed_from_queue() {
    let harness = Harness::new();
    harness.publish("x:42").await;

    let outcomes = harness
        .worker
        .drain_and_forward(10, &harness.cancel)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].result.as_ref().unwrap_err().outcome(), "invalid");
    assert_eq!(harness.queue.size().await.unwrap(), 0);
    assert!(harness.forwarder.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_forward_failure_is_retried_after_lease() {
    let harness = Harness::new();
    let request_id = harness.publish("g:42").await;
    harness.forwarder.set_failing(true);

    let outcomes = harness
        .worker
        .drain_and_forward(10, &harness.cancel)
        .await
        .unwrap();
    assert!(matches!(outcomes[0].result, Err(DrainError::Forward(_))));
    assert_eq!(harness.queue.size().await.unwrap(), 1);

    // Still leased, nothing to drain.
    let outcomes = harness
        .worker
        .drain_and_forward(10, &harness.cancel)
        .await
        .unwrap();
    assert!(outcomes.is_empty());

    harness.forwarder.set_failing(false);
    tokio::time::advance(PoolConfig::default().lease + Duration::from_secs(1)).await;

    let outcomes = harness
        .worker
        .drain_and_forward(10, &harness.cancel)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].request_id, request_id);
    assert!(outcomes[0].is_success());
    assert_eq!(harness.queue.size().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_drains_until_cancelled() {
    let harness = Harness::new();
    harness.publish("g:42").await;

    let worker = harness.worker.clone();
    let cancel = harness.cancel.clone();
    let handle = tokio::spawn(async move { worker.run(cancel).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.forwarder.batches().len(), 1);

    harness.publish("g:43").await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.forwarder.batches().len(), 2);

    harness.cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_drain_against_http_services() {
    let server = MockServer::start();
    let verifier_mock = server.mock(|when, then| {
        when.method(POST).path("/verifier/device-delete");
        then.status(200).json_body(json!({ "verifier": "v-token" }));
    });
    let command_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/commands/delete")
            .header("content-type", "application/json");
        then.status(202);
    });

    let client = build_http_client(Duration::from_secs(5)).unwrap();
    let verifier: Arc<dyn VerifierClient> =
        Arc::new(HttpVerifierClient::new(client.clone(), &server.base_url()).unwrap());
    let forwarder: Arc<dyn CommandForwarder> =
        Arc::new(HttpCommandForwarder::new(client, &server.base_url()).unwrap());
    let harness = Harness::with_clients(verifier, Some(forwarder));
    harness.publish("g:6755399441055744").await;

    let outcomes = harness
        .worker
        .drain_and_forward(10, &harness.cancel)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success());
    verifier_mock.assert_hits(DEFAULT_DATA_CATEGORIES.len());
    command_mock.assert_hits(1);
    assert_eq!(harness.queue.size().await.unwrap(), 0);
}
