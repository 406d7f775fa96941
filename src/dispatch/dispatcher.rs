// Task dispatcher
//
// Answers AssignTask, GetStatus and GetResult for one provider. Work is
// spawned and the reply goes out straight away; clients poll for the
// outcome. Other message types get no reply.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::envelope::{
    AssignTask, Envelope, Reply, ResultReply, StatusReply, TaskQuery, TaskStatus, ASSIGN_TASK,
    GET_RESULT, GET_STATUS,
};
use super::handler::{CapabilityHandler, CapabilityTable, TaskContext};
use super::store::TaskStore;
use crate::errors::DispatchError;
use crate::service::{CapabilityStatus, SharedDescriptor};

#[derive(Clone)]
pub struct TaskDispatcher {
    descriptor: SharedDescriptor,
    handlers: Arc<CapabilityTable>,
    store: TaskStore,
    /// Serializes Busy/Ready flips against task creation and completion
    flags: Arc<Mutex<()>>,
}

impl TaskDispatcher {
    pub fn new(descriptor: SharedDescriptor, handlers: CapabilityTable) -> Self {
        Self {
            descriptor,
            handlers: Arc::new(handlers),
            store: TaskStore::new(),
            flags: Arc::new(Mutex::new(())),
        }
    }

    pub fn descriptor(&self) -> &SharedDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Handle one request. `None` means no reply is sent.
    pub async fn handle(&self, envelope: Envelope) -> Option<Reply> {
        debug!(kind = %envelope.kind, message_id = %envelope.message_id, "Dispatch request");
        let reply = match envelope.kind.as_str() {
            ASSIGN_TASK => self.assign(&envelope).await,
            GET_STATUS => match envelope.payload_as::<TaskQuery>() {
                Ok(query) => Ok(Reply::Status(self.status(&query.task_id).await)),
                Err(e) => Err(e),
            },
            GET_RESULT => envelope
                .payload_as::<TaskQuery>()
                .map(|query| Reply::TaskResult(self.result(&query.task_id))),
            other => {
                debug!(kind = %other, "Unhandled message type, no reply");
                return None;
            }
        };

        Some(reply.unwrap_or_else(|e| {
            warn!(kind = %envelope.kind, error = %e, "Request rejected");
            Reply::error(e)
        }))
    }

    async fn assign(&self, envelope: &Envelope) -> Result<Reply, DispatchError> {
        let request: AssignTask = envelope.payload_as()?;
        let handler = self
            .handlers
            .get(&request.operation)
            .ok_or_else(|| DispatchError::UnknownOperation(request.operation.clone()))?;

        if let Some(capability) = self.descriptor.capability(&request.operation).await {
            for issue in capability.check_parameters(&request.task_parameters) {
                warn!(operation = %request.operation, "{}", issue);
            }
        }

        let task_id = request
            .task_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let token = {
            let _flags = self.flags.lock().await;
            let token = self.store.create(
                &task_id,
                &request.operation,
                request.task_parameters.clone(),
                &request.callback_client_id,
                &envelope.message_id,
            );
            self.descriptor
                .set_capability_status(&request.operation, CapabilityStatus::Busy)
                .await;
            token
        };

        info!(task_id = %task_id, operation = %request.operation, "Task assigned");

        let snapshot = self.descriptor.snapshot().await;
        let context = TaskContext {
            task_id: task_id.clone(),
            service_id: snapshot.service_id,
            service_name: snapshot.service_name,
        };
        tokio::spawn(self.clone().run_task(
            handler,
            context,
            request.operation,
            request.task_parameters,
            token,
        ));

        Ok(Reply::Status(self.status(&task_id).await))
    }

    async fn run_task(
        self,
        handler: Arc<dyn CapabilityHandler>,
        context: TaskContext,
        operation: String,
        parameters: serde_json::Map<String, serde_json::Value>,
        token: u64,
    ) {
        let task_id = context.task_id.clone();

        // The handler gets its own task so a panic fails this task only
        let outcome = tokio::spawn(async move { handler.run(&context, &parameters).await }).await;
        let (status, result_data) = match outcome {
            Ok(Ok(data)) => (TaskStatus::Done, data),
            Ok(Err(e)) => {
                warn!(task_id = %task_id, error = %e, "Task failed");
                (TaskStatus::Failed, json!({ "error": e.to_string() }))
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task handler aborted");
                (TaskStatus::Failed, json!({ "error": "handler aborted" }))
            }
        };

        let _flags = self.flags.lock().await;
        if !self.store.complete(&task_id, token, status, result_data) {
            debug!(task_id = %task_id, "Result for superseded assignment discarded");
        }
        if self.store.outstanding(&operation) == 0 {
            self.descriptor
                .set_capability_status(&operation, CapabilityStatus::Ready)
                .await;
        }
        info!(task_id = %task_id, status = ?status, "Task finished");
    }

    /// Status snapshot for `task_id`; Unknown if never assigned
    pub async fn status(&self, task_id: &str) -> StatusReply {
        let descriptor = self.descriptor.snapshot().await;
        StatusReply {
            service_id: descriptor.service_id,
            service_name: descriptor.service_name,
            task_id: task_id.to_string(),
            task_status: self.store.status(task_id),
            status: descriptor.status,
            load: descriptor.load,
        }
    }

    /// Stored result, or the not-ready error for unfinished and unknown tasks
    pub fn result(&self, task_id: &str) -> ResultReply {
        match self.store.result(task_id) {
            Some(result) => ResultReply::Ready(result),
            None => ResultReply::not_ready(),
        }
    }
}
