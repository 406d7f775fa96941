// Demo image-service capabilities
//
// Stand-ins for real image processing: each handler waits out a
// simulated work time and reports what it would have produced.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatch::{CapabilityHandler, CapabilityTable, TaskContext};
use crate::service::{CapabilitySpec, SettingDescriptor};

fn setting_string(name: &str) -> SettingDescriptor {
    SettingDescriptor::String(name.to_string())
}

fn positive_int(parameters: &Map<String, Value>, name: &str) -> Result<Option<i64>> {
    match parameters.get(name) {
        None => Ok(None),
        Some(value) => match value.as_i64() {
            Some(n) if n > 0 => Ok(Some(n)),
            _ => bail!("{} must be a positive integer, got {}", name, value),
        },
    }
}

pub struct ResizeImage {
    work_time: Duration,
}

impl ResizeImage {
    pub fn new(work_time: Duration) -> Self {
        Self { work_time }
    }
}

#[async_trait]
impl CapabilityHandler for ResizeImage {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "resizeImage",
            vec![
                setting_string("inputPath"),
                setting_string("output"),
                SettingDescriptor::Int("width".to_string()),
                SettingDescriptor::Int("height".to_string()),
            ],
        )
    }

    async fn run(&self, task: &TaskContext, parameters: &Map<String, Value>) -> Result<Value> {
        let started = Instant::now();
        let width = positive_int(parameters, "width")?;
        let height = positive_int(parameters, "height")?;
        tokio::time::sleep(self.work_time).await;

        let output = parameters
            .get("output")
            .or_else(|| parameters.get("outputPath"))
            .and_then(Value::as_str)
            .unwrap_or("output.jpg");

        Ok(json!({
            "outputImagePath": output,
            "width": width,
            "height": height,
            "processedByServiceId": task.service_id,
            "executionDurationMs": started.elapsed().as_millis() as u64,
        }))
    }
}

pub struct ApplyFilter {
    work_time: Duration,
}

impl ApplyFilter {
    pub fn new(work_time: Duration) -> Self {
        Self { work_time }
    }
}

#[async_trait]
impl CapabilityHandler for ApplyFilter {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "applyFilter",
            vec![
                setting_string("name"),
                SettingDescriptor::Float("size".to_string()),
            ],
        )
    }

    async fn run(&self, task: &TaskContext, parameters: &Map<String, Value>) -> Result<Value> {
        let Some(name) = parameters.get("name").and_then(Value::as_str) else {
            bail!("applyFilter needs a filter name");
        };
        let size = parameters.get("size").and_then(Value::as_f64).unwrap_or(1.0);
        tokio::time::sleep(self.work_time).await;

        Ok(json!({
            "filter": name,
            "size": size,
            "processedByServiceId": task.service_id,
        }))
    }
}

pub struct ConvertFormat {
    work_time: Duration,
}

impl ConvertFormat {
    pub fn new(work_time: Duration) -> Self {
        Self { work_time }
    }
}

#[async_trait]
impl CapabilityHandler for ConvertFormat {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "convertFormat",
            vec![SettingDescriptor::Float("format".to_string())],
        )
    }

    async fn run(&self, task: &TaskContext, parameters: &Map<String, Value>) -> Result<Value> {
        let Some(format) = parameters.get("format").filter(|v| !v.is_null()) else {
            bail!("convertFormat needs a target format");
        };
        tokio::time::sleep(self.work_time).await;

        Ok(json!({
            "format": format,
            "processedByServiceId": task.service_id,
        }))
    }
}

/// Table with all three demo capabilities
pub fn demo_capabilities(work_time: Duration) -> CapabilityTable {
    CapabilityTable::new()
        .with(Arc::new(ResizeImage::new(work_time)))
        .with(Arc::new(ApplyFilter::new(work_time)))
        .with(Arc::new(ConvertFormat::new(work_time)))
}
