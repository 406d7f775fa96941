// Task dispatch
//
// Clients assign work to a provider's capabilities and poll for the
// outcome over JSON envelopes in WebSocket text frames.

pub mod client;
pub mod dispatcher;
pub mod envelope;
pub mod handler;
pub mod server;
pub mod store;

pub use client::{ServiceTarget, TaskClient};
pub use dispatcher::TaskDispatcher;
pub use envelope::{
    AssignTask, Envelope, Reply, ResultReply, StatusReply, TaskQuery, TaskResultMessage,
    TaskResultPayload, TaskStatus, RESULT_NOT_READY,
};
pub use handler::{CapabilityHandler, CapabilityTable, TaskContext};
pub use server::DispatchServer;
pub use store::{Task, TaskStore};
