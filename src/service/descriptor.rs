// Service descriptors: what a provider advertises about itself
//
// A descriptor is built once per provider process. Only `load` and the
// per-capability Ready/Busy flags change after the first broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Availability of a whole service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Online,
    /// Any status other than `Online` reported by a peer
    #[serde(other)]
    Unavailable,
}

/// Availability of one capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CapabilityStatus {
    #[default]
    Ready,
    Busy,
}

/// Primitive type of a capability parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    String,
    Int,
    Float,
    Bool,
}

/// One typed parameter of a capability.
///
/// Serialized as a single-entry map from type tag to parameter name,
/// e.g. `{"int": "width"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingDescriptor {
    String(String),
    Int(String),
    Float(String),
    Bool(String),
}

impl SettingDescriptor {
    pub fn name(&self) -> &str {
        match self {
            SettingDescriptor::String(n)
            | SettingDescriptor::Int(n)
            | SettingDescriptor::Float(n)
            | SettingDescriptor::Bool(n) => n,
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            SettingDescriptor::String(_) => SettingKind::String,
            SettingDescriptor::Int(_) => SettingKind::Int,
            SettingDescriptor::Float(_) => SettingKind::Float,
            SettingDescriptor::Bool(_) => SettingKind::Bool,
        }
    }

    /// Whether `value` fits this setting's primitive type
    pub fn accepts(&self, value: &Value) -> bool {
        match self.kind() {
            SettingKind::String => value.is_string(),
            SettingKind::Int => value.is_i64() || value.is_u64(),
            SettingKind::Float => value.is_number(),
            SettingKind::Bool => value.is_boolean(),
        }
    }
}

/// A named operation a provider can perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub key: String,
    #[serde(default)]
    pub status: CapabilityStatus,
    #[serde(default)]
    pub settings: Vec<SettingDescriptor>,
}

impl CapabilitySpec {
    pub fn new(key: impl Into<String>, settings: Vec<SettingDescriptor>) -> Self {
        Self {
            key: key.into(),
            status: CapabilityStatus::Ready,
            settings,
        }
    }

    /// Loose parameter check: returns one message per supplied parameter
    /// whose JSON type does not match its declared setting. Missing and
    /// undeclared parameters are allowed.
    pub fn check_parameters(&self, parameters: &Map<String, Value>) -> Vec<String> {
        self.settings
            .iter()
            .filter_map(|setting| {
                let value = parameters.get(setting.name())?;
                if setting.accepts(value) {
                    None
                } else {
                    Some(format!(
                        "parameter '{}' expected {:?}, got {}",
                        setting.name(),
                        setting.kind(),
                        value
                    ))
                }
            })
            .collect()
    }
}

/// Advertised identity of a service provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub service_id: String,
    pub service_name: String,
    pub service_version: String,
    /// `host:port` of the task-dispatch listener
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: BTreeMap<String, CapabilitySpec>,
    pub status: ServiceStatus,
    #[serde(default)]
    pub load: f64,
    /// Set by the receiving client, never by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_timestamp: Option<DateTime<Utc>>,
}

impl ServiceDescriptor {
    /// New online descriptor with a freshly generated service id
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        endpoint: impl Into<String>,
        capabilities: impl IntoIterator<Item = CapabilitySpec>,
    ) -> Self {
        Self {
            service_id: Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            service_version: service_version.into(),
            endpoint: endpoint.into(),
            capabilities: capabilities
                .into_iter()
                .map(|c| (c.key.clone(), c))
                .collect(),
            status: ServiceStatus::Online,
            load: 0.0,
            last_seen_timestamp: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ServiceStatus::Online
    }

    /// First 8 characters of the service id, for logs and tables
    pub fn short_id(&self) -> &str {
        self.service_id
            .get(..8)
            .unwrap_or(self.service_id.as_str())
    }
}

/// Provider-side descriptor shared between the dispatcher (which flips
/// capability flags) and the coordinator (which advertises it).
#[derive(Debug, Clone)]
pub struct SharedDescriptor {
    inner: Arc<RwLock<ServiceDescriptor>>,
}

impl SharedDescriptor {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(descriptor)),
        }
    }

    /// Copy of the current descriptor
    pub async fn snapshot(&self) -> ServiceDescriptor {
        self.inner.read().await.clone()
    }

    pub async fn service_id(&self) -> String {
        self.inner.read().await.service_id.clone()
    }

    pub async fn capability(&self, key: &str) -> Option<CapabilitySpec> {
        self.inner.read().await.capabilities.get(key).cloned()
    }

    /// Returns false if the capability does not exist.
    pub async fn set_capability_status(&self, key: &str, status: CapabilityStatus) -> bool {
        let mut descriptor = self.inner.write().await;
        match descriptor.capabilities.get_mut(key) {
            Some(capability) => {
                capability.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn set_load(&self, load: f64) {
        self.inner.write().await.load = load.clamp(0.0, 100.0);
    }

    pub async fn set_endpoint(&self, endpoint: String) {
        self.inner.write().await.endpoint = endpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resize() -> CapabilitySpec {
        CapabilitySpec::new(
            "resizeImage",
            vec![
                SettingDescriptor::String("inputPath".to_string()),
                SettingDescriptor::Int("width".to_string()),
                SettingDescriptor::Int("height".to_string()),
            ],
        )
    }

    #[test]
    fn test_setting_wire_format() {
        let json = serde_json::to_value(SettingDescriptor::Int("width".to_string())).unwrap();
        assert_eq!(json, json!({"int": "width"}));

        let parsed: SettingDescriptor = serde_json::from_value(json!({"float": "size"})).unwrap();
        assert_eq!(parsed.kind(), SettingKind::Float);
        assert_eq!(parsed.name(), "size");
    }

    #[test]
    fn test_capability_without_status_defaults_ready() {
        let cap: CapabilitySpec = serde_json::from_value(json!({
            "key": "applyFilter",
            "settings": [{"string": "name"}, {"float": "size"}]
        }))
        .unwrap();
        assert_eq!(cap.status, CapabilityStatus::Ready);
        assert_eq!(cap.settings.len(), 2);
    }

    #[test]
    fn test_check_parameters_is_loose() {
        let cap = resize();
        let ok = json!({"width": 100, "height": 50, "extra": true});
        assert!(cap.check_parameters(ok.as_object().unwrap()).is_empty());

        let missing = json!({});
        assert!(cap.check_parameters(missing.as_object().unwrap()).is_empty());

        let wrong = json!({"width": "wide", "height": 1.5});
        let issues = cap.check_parameters(wrong.as_object().unwrap());
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("width"));
    }

    #[test]
    fn test_descriptor_wire_names() {
        let d = ServiceDescriptor::new("Svc", "1.0.0", "127.0.0.1:8080", vec![resize()]);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["serviceName"], "Svc");
        assert_eq!(json["status"], "Online");
        assert_eq!(json["capabilities"]["resizeImage"]["status"], "Ready");
        assert!(json.get("lastSeenTimestamp").is_none());
    }

    #[test]
    fn test_unknown_status_is_unavailable() {
        let mut json = serde_json::to_value(ServiceDescriptor::new("a", "1", "h:1", vec![])).unwrap();
        json["status"] = json!("Maintenance");
        let d: ServiceDescriptor = serde_json::from_value(json).unwrap();
        assert!(!d.is_online());
    }

    #[tokio::test]
    async fn test_shared_descriptor_flags() {
        let shared = SharedDescriptor::new(ServiceDescriptor::new("a", "1", "h:1", vec![resize()]));
        assert!(shared.set_capability_status("resizeImage", CapabilityStatus::Busy).await);
        assert!(!shared.set_capability_status("nope", CapabilityStatus::Busy).await);
        assert_eq!(
            shared.capability("resizeImage").await.unwrap().status,
            CapabilityStatus::Busy
        );

        shared.set_load(250.0).await;
        assert_eq!(shared.snapshot().await.load, 100.0);
    }
}
