// Capability handlers
//
// A handler does the actual work for one capability key. The dispatcher
// runs it off the request path and records whatever it returns.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::service::CapabilitySpec;

/// Identity of the task and provider a handler is running for
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub service_id: String,
    pub service_name: String,
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Capability this handler serves, as advertised
    fn spec(&self) -> CapabilitySpec;

    /// Perform the task. The returned value becomes the task's
    /// `resultData`; an error finishes the task as Failed.
    async fn run(&self, task: &TaskContext, parameters: &Map<String, Value>) -> Result<Value>;
}

/// Handlers keyed by capability key
#[derive(Clone, Default)]
pub struct CapabilityTable {
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same key
    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) {
        let key = handler.spec().key;
        self.handlers.insert(key, handler);
    }

    pub fn with(mut self, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(key).cloned()
    }

    /// Specs of every registered capability, sorted by key
    pub fn specs(&self) -> Vec<CapabilitySpec> {
        let mut specs: Vec<CapabilitySpec> = self.handlers.values().map(|h| h.spec()).collect();
        specs.sort_by(|a, b| a.key.cmp(&b.key));
        specs
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
