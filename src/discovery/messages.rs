// Discovery datagrams
//
// Every datagram is a JSON object tagged by `discoveryType` and stamped
// with a UTC `timestamp` (YYYY-MM-DDTHH:MM:SSZ).

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::service::ServiceDescriptor;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current UTC time in the discovery wire format
pub fn utc_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A provider's advertisement: its descriptor plus sender identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "discoveryType")]
pub enum DiscoveryMessage {
    /// Client → discovery port: who is out there?
    #[serde(rename_all = "camelCase")]
    ClientServiceDiscoveryRequest { client_id: String, timestamp: String },

    /// Provider → client
    ServiceAdvertisement(Advertisement),

    /// Secondary → local discovery port: where is the primary?
    #[serde(rename_all = "camelCase")]
    ProviderDiscoveryRequest { provider_id: String, timestamp: String },

    /// Primary → secondary
    #[serde(rename_all = "camelCase")]
    ProviderDiscoveryResponse { provider_id: String, timestamp: String },

    /// Secondary → primary, once after the primary is found
    #[serde(rename_all = "camelCase")]
    ProviderRegistration {
        provider_id: String,
        service_info: ServiceDescriptor,
        timestamp: String,
    },

    /// Secondary → primary, every heartbeat interval
    #[serde(rename_all = "camelCase")]
    ProviderHeartbeat { provider_id: String, timestamp: String },

    /// Primary → secondary: answer this client yourself
    #[serde(rename_all = "camelCase")]
    ProviderNotification {
        client_addr: SocketAddr,
        timestamp: String,
    },

    /// Secondary → primary on shutdown
    #[serde(rename_all = "camelCase")]
    ProviderUnregistration { provider_id: String, timestamp: String },
}

impl DiscoveryMessage {
    pub fn client_request(client_id: &str) -> Self {
        DiscoveryMessage::ClientServiceDiscoveryRequest {
            client_id: client_id.to_string(),
            timestamp: utc_timestamp(),
        }
    }

    pub fn advertisement(descriptor: ServiceDescriptor, provider_id: &str) -> Self {
        DiscoveryMessage::ServiceAdvertisement(Advertisement {
            descriptor,
            provider_id: provider_id.to_string(),
            timestamp: utc_timestamp(),
        })
    }

    pub fn provider_request(provider_id: &str) -> Self {
        DiscoveryMessage::ProviderDiscoveryRequest {
            provider_id: provider_id.to_string(),
            timestamp: utc_timestamp(),
        }
    }

    pub fn provider_response(provider_id: &str) -> Self {
        DiscoveryMessage::ProviderDiscoveryResponse {
            provider_id: provider_id.to_string(),
            timestamp: utc_timestamp(),
        }
    }

    pub fn registration(provider_id: &str, service_info: ServiceDescriptor) -> Self {
        DiscoveryMessage::ProviderRegistration {
            provider_id: provider_id.to_string(),
            service_info,
            timestamp: utc_timestamp(),
        }
    }

    pub fn heartbeat(provider_id: &str) -> Self {
        DiscoveryMessage::ProviderHeartbeat {
            provider_id: provider_id.to_string(),
            timestamp: utc_timestamp(),
        }
    }

    pub fn notification(client_addr: SocketAddr) -> Self {
        DiscoveryMessage::ProviderNotification {
            client_addr,
            timestamp: utc_timestamp(),
        }
    }

    pub fn unregistration(provider_id: &str) -> Self {
        DiscoveryMessage::ProviderUnregistration {
            provider_id: provider_id.to_string(),
            timestamp: utc_timestamp(),
        }
    }

    /// Wire name of this message, for logging
    pub fn discovery_type(&self) -> &'static str {
        match self {
            DiscoveryMessage::ClientServiceDiscoveryRequest { .. } => "ClientServiceDiscoveryRequest",
            DiscoveryMessage::ServiceAdvertisement(_) => "ServiceAdvertisement",
            DiscoveryMessage::ProviderDiscoveryRequest { .. } => "ProviderDiscoveryRequest",
            DiscoveryMessage::ProviderDiscoveryResponse { .. } => "ProviderDiscoveryResponse",
            DiscoveryMessage::ProviderRegistration { .. } => "ProviderRegistration",
            DiscoveryMessage::ProviderHeartbeat { .. } => "ProviderHeartbeat",
            DiscoveryMessage::ProviderNotification { .. } => "ProviderNotification",
            DiscoveryMessage::ProviderUnregistration { .. } => "ProviderUnregistration",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize discovery message")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Malformed discovery datagram")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{CapabilitySpec, SettingDescriptor};
    use serde_json::{json, Value};

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new(
            "ImageProcessingService",
            "1.2.0",
            "127.0.0.1:8080",
            vec![CapabilitySpec::new(
                "resizeImage",
                vec![SettingDescriptor::Int("width".to_string())],
            )],
        )
    }

    #[test]
    fn test_timestamp_format() {
        let ts = utc_timestamp();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_client_request_wire_shape() {
        let msg = DiscoveryMessage::client_request("client-1");
        let json: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["discoveryType"], "ClientServiceDiscoveryRequest");
        assert_eq!(json["clientId"], "client-1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_advertisement_is_flat() {
        let d = descriptor();
        let msg = DiscoveryMessage::advertisement(d.clone(), "prov-1");
        let json: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();

        assert_eq!(json["discoveryType"], "ServiceAdvertisement");
        assert_eq!(json["serviceId"], d.service_id.as_str());
        assert_eq!(json["providerId"], "prov-1");
        assert_eq!(json["capabilities"]["resizeImage"]["settings"][0]["int"], "width");

        match DiscoveryMessage::decode(&msg.encode().unwrap()).unwrap() {
            DiscoveryMessage::ServiceAdvertisement(ad) => assert_eq!(ad.descriptor, d),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_advertisement_without_provider_id_accepted() {
        // Plain providers omit providerId
        let mut json = serde_json::to_value(descriptor()).unwrap();
        json["discoveryType"] = json!("ServiceAdvertisement");
        json["timestamp"] = json!("2025-07-02T12:00:00Z");

        let msg = DiscoveryMessage::decode(json.to_string().as_bytes()).unwrap();
        assert_eq!(msg.discovery_type(), "ServiceAdvertisement");
    }

    #[test]
    fn test_notification_carries_socket_addr() {
        let addr: SocketAddr = "192.168.50.7:4096".parse().unwrap();
        let msg = DiscoveryMessage::notification(addr);
        let json: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["clientAddr"], "192.168.50.7:4096");

        match DiscoveryMessage::decode(&msg.encode().unwrap()).unwrap() {
            DiscoveryMessage::ProviderNotification { client_addr, .. } => {
                assert_eq!(client_addr, addr)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_and_unknown_rejected() {
        assert!(DiscoveryMessage::decode(b"not json").is_err());
        assert!(DiscoveryMessage::decode(br#"{"discoveryType":"Gossip"}"#).is_err());
        assert!(DiscoveryMessage::decode(br#"{"serviceId":"x"}"#).is_err());
    }
}
