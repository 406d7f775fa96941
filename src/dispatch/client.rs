// Task client
//
// Every request opens a fresh WebSocket, sends one envelope frame and
// reads one reply frame. The protocol itself is connection-agnostic.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use super::envelope::{
    AssignTask, Envelope, Reply, ResultReply, StatusReply, TaskQuery, TaskResultMessage,
    TaskStatus, ASSIGN_TASK, GET_RESULT, GET_STATUS,
};
use super::server::frame_config;
use crate::config::ClientConfig;
use crate::errors::TaskClientError;
use crate::service::ServiceDescriptor;

type ClientResult<T> = std::result::Result<T, TaskClientError>;

/// Where to send requests and how to address the service in them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub endpoint: String,
    pub service_id: String,
    pub service_name: String,
}

impl From<&ServiceDescriptor> for ServiceTarget {
    fn from(descriptor: &ServiceDescriptor) -> Self {
        Self {
            endpoint: descriptor.endpoint.clone(),
            service_id: descriptor.service_id.clone(),
            service_name: descriptor.service_name.clone(),
        }
    }
}

impl ServiceTarget {
    fn query(&self, task_id: &str) -> TaskQuery {
        TaskQuery {
            service_id: self.service_id.clone(),
            service_name: self.service_name.clone(),
            task_id: task_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskClient {
    client_id: String,
    request_timeout: Duration,
}

impl TaskClient {
    pub fn new(client_id: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client_id: client_id.into(),
            request_timeout,
        }
    }

    pub fn from_config(client_id: impl Into<String>, config: &ClientConfig) -> Self {
        Self::new(client_id, config.request_timeout())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Send AssignTask. Returns the provider's immediate status reply;
    /// does not wait for the task to finish.
    pub async fn assign(
        &self,
        target: &ServiceTarget,
        operation: &str,
        parameters: Map<String, Value>,
    ) -> ClientResult<StatusReply> {
        let request = AssignTask {
            task_id: None,
            service_name: target.service_name.clone(),
            operation: operation.to_string(),
            task_parameters: parameters,
            callback_client_id: self.client_id.clone(),
        };
        match self.request(&target.endpoint, ASSIGN_TASK, &request).await? {
            Reply::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&self, target: &ServiceTarget, task_id: &str) -> ClientResult<StatusReply> {
        match self
            .request(&target.endpoint, GET_STATUS, &target.query(task_id))
            .await?
        {
            Reply::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn result(&self, target: &ServiceTarget, task_id: &str) -> ClientResult<ResultReply> {
        match self
            .request(&target.endpoint, GET_RESULT, &target.query(task_id))
            .await?
        {
            Reply::TaskResult(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// Poll GetStatus until the task finishes, then fetch the result
    /// once. Gives up after `max_attempts` polls.
    pub async fn poll_until_done(
        &self,
        target: &ServiceTarget,
        task_id: &str,
        interval: Duration,
        max_attempts: u32,
    ) -> ClientResult<TaskResultMessage> {
        for attempt in 1..=max_attempts {
            let status = self.status(target, task_id).await?;
            debug!(task_id = %task_id, attempt, status = ?status.task_status, "Polled task status");

            match status.task_status {
                TaskStatus::Unknown => {
                    return Err(TaskClientError::UnknownTask {
                        task_id: task_id.to_string(),
                    })
                }
                s if s.is_finished() => {
                    return match self.result(target, task_id).await? {
                        ResultReply::Ready(result) => Ok(result),
                        ResultReply::NotReady { error } => Err(TaskClientError::Protocol(format!(
                            "status was {:?} but result reported: {}",
                            s, error
                        ))),
                    };
                }
                _ => {}
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(TaskClientError::Timeout {
            task_id: task_id.to_string(),
            attempts: max_attempts,
        })
    }

    async fn request<T: Serialize>(&self, endpoint: &str, kind: &str, payload: &T) -> ClientResult<Reply> {
        let envelope =
            Envelope::new(kind, payload).map_err(|e| TaskClientError::Protocol(e.to_string()))?;
        let text =
            serde_json::to_string(&envelope).map_err(|e| TaskClientError::Protocol(e.to_string()))?;

        match tokio::time::timeout(self.request_timeout, exchange(endpoint, text)).await {
            Ok(reply) => reply,
            Err(_) => Err(TaskClientError::RequestTimeout {
                endpoint: endpoint.to_string(),
                timeout: self.request_timeout,
            }),
        }
    }
}

/// Advertised endpoints are `host:port`; a scheme is added when missing
pub fn websocket_url(endpoint: &str) -> String {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("ws://{}", endpoint)
    }
}

/// One connection, one frame out, one frame back
async fn exchange(endpoint: &str, text: String) -> ClientResult<Reply> {
    let url = websocket_url(endpoint);
    let (mut ws, _) = connect_async_with_config(url.as_str(), Some(frame_config()), true)
        .await
        .map_err(|source| TaskClientError::Connect {
            endpoint: endpoint.to_string(),
            source: Box::new(source),
        })?;

    ws.send(Message::Text(text))
        .await
        .map_err(|e| TaskClientError::Send {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    let reply = loop {
        match ws.next().await {
            Some(Ok(Message::Text(reply))) => break reply,
            Some(Ok(Message::Binary(bytes))) => {
                break String::from_utf8(bytes)
                    .map_err(|e| TaskClientError::Protocol(e.to_string()))?
            }
            Some(Ok(Message::Close(_)))
            | None
            | Some(Err(WsError::ConnectionClosed))
            | Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                return Err(TaskClientError::NoReply {
                    endpoint: endpoint.to_string(),
                })
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TaskClientError::Protocol(e.to_string())),
        }
    };

    if let Err(e) = ws.close(None).await {
        debug!(endpoint = %endpoint, error = %e, "Close handshake not completed");
    }

    serde_json::from_str(&reply).map_err(|e| TaskClientError::Protocol(format!("{}: {}", e, reply)))
}

fn unexpected(reply: Reply) -> TaskClientError {
    match reply {
        Reply::Error { error } => TaskClientError::Rejected(error),
        other => TaskClientError::Protocol(format!("unexpected {} reply", other.kind())),
    }
}
