// Task-dispatch wire format
//
// Requests are envelopes `{type, messageId, timestamp, payload}`, one
// JSON object per frame. Replies are flat objects tagged by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::discovery::utc_timestamp;
use crate::errors::DispatchError;
use crate::service::ServiceStatus;

pub const ASSIGN_TASK: &str = "AssignTask";
pub const GET_STATUS: &str = "GetStatus";
pub const GET_RESULT: &str = "GetResult";

/// Error text of a GetResult reply for an unfinished or unknown task
pub const RESULT_NOT_READY: &str = "Result not ready";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.to_string(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: utc_timestamp(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn parse(text: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(text).map_err(|e| DispatchError::MalformedMessage(e.to_string()))
    }

    /// Decode the payload as the request type `T`
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| {
            DispatchError::MalformedPayload {
                kind: self.kind.clone(),
                source,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTask {
    /// Generated by the provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub service_name: String,
    pub operation: String,
    #[serde(default)]
    pub task_parameters: Map<String, Value>,
    #[serde(default)]
    pub callback_client_id: String,
}

/// Payload of GetStatus and GetResult
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Processing,
    Done,
    /// Handler returned an error; resultData carries it
    Failed,
    /// Reported for ids the provider has never seen; never stored
    Unknown,
}

impl TaskStatus {
    /// Whether polling can stop
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub service_id: String,
    pub service_name: String,
    pub task_id: String,
    pub task_status: TaskStatus,
    pub status: ServiceStatus,
    pub load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultPayload {
    pub task_id: String,
    pub status: TaskStatus,
    pub result_data: Value,
    pub original_client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultMessage {
    pub message_id: String,
    pub timestamp: String,
    pub payload: TaskResultPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultReply {
    Ready(TaskResultMessage),
    NotReady { error: String },
}

impl ResultReply {
    pub fn not_ready() -> Self {
        ResultReply::NotReady {
            error: RESULT_NOT_READY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    Status(StatusReply),
    TaskResult(ResultReply),
    Error { error: String },
}

impl Reply {
    pub fn error(error: impl ToString) -> Self {
        Reply::Error {
            error: error.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Status(_) => "Status",
            Reply::TaskResult(_) => "TaskResult",
            Reply::Error { .. } => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_uses_type_field() {
        let request = AssignTask {
            task_id: None,
            service_name: "ImageProcessingService".to_string(),
            operation: "resizeImage".to_string(),
            task_parameters: json!({"width": 100}).as_object().cloned().unwrap(),
            callback_client_id: "client-1".to_string(),
        };
        let envelope = Envelope::new(ASSIGN_TASK, &request).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "AssignTask");
        assert!(json["messageId"].is_string());
        assert_eq!(json["payload"]["taskParameters"]["width"], 100);
        assert!(json["payload"].get("taskId").is_none());

        let decoded: AssignTask = envelope.payload_as().unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_query_without_task_id_is_malformed() {
        let envelope = Envelope::parse(r#"{"type":"GetStatus","payload":{"serviceId":"s"}}"#).unwrap();
        assert!(matches!(
            envelope.payload_as::<TaskQuery>(),
            Err(DispatchError::MalformedPayload { .. })
        ));
        assert!(Envelope::parse("{nope").is_err());
    }

    #[test]
    fn test_status_reply_is_flat() {
        let reply = Reply::Status(StatusReply {
            service_id: "s-1".to_string(),
            service_name: "Svc".to_string(),
            task_id: "t-1".to_string(),
            task_status: TaskStatus::Processing,
            status: ServiceStatus::Online,
            load: 12.5,
        });
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "Status",
                "serviceId": "s-1",
                "serviceName": "Svc",
                "taskId": "t-1",
                "taskStatus": "Processing",
                "status": "Online",
                "load": 12.5
            })
        );
    }

    #[test]
    fn test_result_reply_shapes() {
        let not_ready = serde_json::to_value(Reply::TaskResult(ResultReply::not_ready())).unwrap();
        assert_eq!(not_ready, json!({"type": "TaskResult", "error": "Result not ready"}));

        let ready = Reply::TaskResult(ResultReply::Ready(TaskResultMessage {
            message_id: "m-1-result".to_string(),
            timestamp: "2025-07-02T12:00:00Z".to_string(),
            payload: TaskResultPayload {
                task_id: "t-1".to_string(),
                status: TaskStatus::Done,
                result_data: json!({"width": 100}),
                original_client_id: "c".to_string(),
            },
        }));
        let json = serde_json::to_value(&ready).unwrap();
        assert_eq!(json["type"], "TaskResult");
        assert_eq!(json["payload"]["resultData"]["width"], 100);

        let back: Reply = serde_json::from_value(json).unwrap();
        assert_eq!(back, ready);
        let back: Reply = serde_json::from_value(not_ready).unwrap();
        assert_eq!(back, Reply::TaskResult(ResultReply::not_ready()));
    }

    #[test]
    fn test_only_done_and_failed_finish_polling() {
        assert!(TaskStatus::Done.is_finished());
        assert!(TaskStatus::Failed.is_finished());
        assert!(!TaskStatus::Processing.is_finished());
        assert!(!TaskStatus::Unknown.is_finished());
    }
}
