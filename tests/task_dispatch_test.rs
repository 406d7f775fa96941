// Integration tests for the task-dispatch protocol over TCP
//
// A dispatch server with the demo capabilities runs on an ephemeral
// loopback port; a TaskClient drives it the way a remote client would.

use beacon::capabilities::demo_capabilities;
use beacon::dispatch::{
    DispatchServer, ResultReply, ServiceTarget, TaskClient, TaskDispatcher, TaskStatus,
    RESULT_NOT_READY,
};
use beacon::errors::TaskClientError;
use beacon::service::{CapabilityStatus, ServiceDescriptor, SharedDescriptor};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    target: ServiceTarget,
    dispatcher: TaskDispatcher,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start(work_time: Duration) -> Harness {
    let table = demo_capabilities(work_time);
    let descriptor = SharedDescriptor::new(ServiceDescriptor::new(
        "ImageProcessingService",
        "1.2.0",
        "",
        table.specs(),
    ));
    let dispatcher = TaskDispatcher::new(descriptor.clone(), table);
    let server = DispatchServer::bind("127.0.0.1:0", dispatcher.clone())
        .await
        .unwrap();
    let endpoint = server.local_addr().unwrap().to_string();
    descriptor.set_endpoint(endpoint).await;
    let cancel = server.cancel_token();
    tokio::spawn(server.serve());

    Harness {
        target: ServiceTarget::from(&descriptor.snapshot().await),
        dispatcher,
        cancel,
    }
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn client() -> TaskClient {
    TaskClient::new("client-42", Duration::from_secs(2))
}

#[tokio::test]
async fn test_resize_round_trip_returns_handler_result() {
    let h = start(Duration::from_millis(200)).await;
    let client = client();

    let accepted = client
        .assign(&h.target, "resizeImage", params(json!({"width": 100, "height": 50})))
        .await
        .unwrap();
    assert_eq!(accepted.service_id, h.target.service_id);
    assert_eq!(accepted.task_status, TaskStatus::Processing);

    // Still running: explicit not-ready, never a default result
    match client.result(&h.target, &accepted.task_id).await.unwrap() {
        ResultReply::NotReady { error } => assert_eq!(error, RESULT_NOT_READY),
        other => panic!("expected not ready, got {:?}", other),
    }

    let result = client
        .poll_until_done(&h.target, &accepted.task_id, Duration::from_millis(25), 200)
        .await
        .unwrap();

    assert_eq!(result.payload.task_id, accepted.task_id);
    assert_eq!(result.payload.status, TaskStatus::Done);
    assert_eq!(result.payload.original_client_id, "client-42");
    assert!(result.message_id.ends_with("-result"));

    let data = &result.payload.result_data;
    assert_eq!(data["width"], 100);
    assert_eq!(data["height"], 50);
    assert_eq!(data["processedByServiceId"], h.target.service_id.as_str());

    // Stored result is what went over the wire
    let stored = h.dispatcher.store().result(&accepted.task_id).unwrap();
    assert_eq!(stored, result);
}

#[tokio::test]
async fn test_unknown_task_id_is_not_a_fault() {
    let h = start(Duration::ZERO).await;
    let client = client();

    let status = client.status(&h.target, "no-such-task").await.unwrap();
    assert_eq!(status.task_status, TaskStatus::Unknown);
    assert_eq!(status.task_id, "no-such-task");

    assert_eq!(
        client.result(&h.target, "no-such-task").await.unwrap(),
        ResultReply::not_ready()
    );

    let err = client
        .poll_until_done(&h.target, "no-such-task", Duration::from_millis(10), 5)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskClientError::UnknownTask { .. }));
}

#[tokio::test]
async fn test_busy_flag_clears_when_work_finishes() {
    let h = start(Duration::from_millis(150)).await;
    let client = client();

    let accepted = client
        .assign(&h.target, "resizeImage", params(json!({"width": 10, "height": 10})))
        .await
        .unwrap();
    let descriptor = h.dispatcher.descriptor();
    assert_eq!(
        descriptor.capability("resizeImage").await.unwrap().status,
        CapabilityStatus::Busy
    );

    client
        .poll_until_done(&h.target, &accepted.task_id, Duration::from_millis(25), 200)
        .await
        .unwrap();

    let mut ready = false;
    for _ in 0..50 {
        if descriptor.capability("resizeImage").await.unwrap().status == CapabilityStatus::Ready {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ready, "resizeImage stayed Busy after its only task finished");
}

#[tokio::test]
async fn test_failing_handler_reports_failed() {
    let h = start(Duration::ZERO).await;
    let client = client();

    let accepted = client
        .assign(&h.target, "convertFormat", Map::new())
        .await
        .unwrap();
    let result = client
        .poll_until_done(&h.target, &accepted.task_id, Duration::from_millis(10), 100)
        .await
        .unwrap();

    assert_eq!(result.payload.status, TaskStatus::Failed);
    assert!(result.payload.result_data["error"]
        .as_str()
        .unwrap()
        .contains("format"));
}

#[tokio::test]
async fn test_unknown_operation_rejected() {
    let h = start(Duration::ZERO).await;
    let err = client()
        .assign(&h.target, "sharpen", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TaskClientError::Rejected(_)));
    assert!(h.dispatcher.store().is_empty());
}

#[tokio::test]
async fn test_slow_task_does_not_block_queries() {
    let h = start(Duration::from_secs(30)).await;
    let client = client();

    let accepted = client
        .assign(&h.target, "applyFilter", params(json!({"name": "blur", "size": 2.5})))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let status = client.status(&h.target, &accepted.task_id).await.unwrap();
    assert_eq!(status.task_status, TaskStatus::Processing);
    assert!(started.elapsed() < Duration::from_secs(1));

    let err = client
        .poll_until_done(&h.target, &accepted.task_id, Duration::from_millis(10), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskClientError::Timeout { attempts: 3, .. }));
}
