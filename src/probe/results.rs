use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

impl Transport {
    /// Parses the upper-case `TCP` / `UDP` tokens used in probe definitions.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "TCP" => Some(Transport::Tcp),
            "UDP" => Some(Transport::Udp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp => write!(f, "TCP"),
            Transport::Udp => write!(f, "UDP"),
        }
    }
}

/// A named payload fired at a service, plus the metadata used to select it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub transport: Transport,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub ports: Vec<u16>,
    pub protocol: String,
    pub description: String,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// 1 (most common) to 9 (rarest).
    pub rarity: u8,
}

impl Probe {
    pub fn payload_hex(&self) -> String {
        hex::encode(&self.payload)
    }

    pub fn matches_port(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn key(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Normalized service identity extracted from a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedInfo {
    pub protocol: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub product: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub extra_info: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cpe: String,
    pub fields: BTreeMap<String, String>,
    pub confidence: u8,
}

impl ParsedInfo {
    pub fn new(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            ..Self::default()
        }
    }

    pub fn with_service(protocol: &str, service: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            service: service.to_string(),
            ..Self::default()
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn set_field(&mut self, key: &str, value: impl Into<String>) {
        self.fields.insert(key.to_string(), value.into());
    }
}

/// Outcome of one (target, probe) exchange. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target: String,
    pub port: u16,
    pub probe_name: String,
    pub protocol: String,
    pub success: bool,
    #[serde(with = "base64_bytes")]
    pub response: Vec<u8>,
    pub response_hex: String,
    pub banner: String,
    pub parsed_info: Option<ParsedInfo>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    pub fn failed(target: &Target, probe: &Probe, duration: Duration, error: String) -> Self {
        Self {
            target: target.key(),
            port: target.port,
            probe_name: probe.name.clone(),
            protocol: probe.protocol.clone(),
            success: false,
            response: Vec::new(),
            response_hex: String::new(),
            banner: String::new(),
            parsed_info: None,
            duration,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn confidence(&self) -> u8 {
        self.parsed_info.as_ref().map_or(0, |info| info.confidence)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_key() {
        assert_eq!(Target::new("10.0.0.5", 502).key(), "10.0.0.5:502");
        assert_eq!(Target::new("::1", 22).key(), "[::1]:22");
    }

    #[test]
    fn test_result_serializes_response_as_base64() {
        let target = Target::new("127.0.0.1", 6379);
        let probe = Probe {
            name: "RedisPing".to_string(),
            transport: Transport::Tcp,
            payload: b"*1\r\n$4\r\nPING\r\n".to_vec(),
            ports: vec![6379],
            protocol: "redis".to_string(),
            description: String::new(),
            timeout: Duration::from_secs(5),
            rarity: 1,
        };
        let mut result = ProbeResult::failed(&target, &probe, Duration::from_millis(12), "x".into());
        result.response = b"+PONG\r\n".to_vec();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["response"], "K1BPTkcNCg==");
        assert_eq!(json["duration"], 12);
        assert_eq!(json["target"], "127.0.0.1:6379");

        let back: ProbeResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.response, b"+PONG\r\n");
    }

    #[test]
    fn test_parsed_info_skips_empty_strings() {
        let mut info = ParsedInfo::with_service("redis", "redis");
        info.set_field("response", "PONG");
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("version"));
        assert!(json.contains("\"response\":\"PONG\""));
    }
}
