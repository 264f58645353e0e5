//! Per-protocol response decoders.
//!
//! Every decoder is total: arbitrary bytes never panic, frames shorter than
//! the protocol minimum yield an empty `ParsedInfo` with confidence 0, and
//! only a provably invalid frame is reported as an error.

pub mod camera;
pub mod database;
pub mod industrial;
pub mod mail;
pub mod messaging;
pub mod system;
pub mod tls;
pub mod web;

use std::borrow::Cow;
use std::collections::HashMap;

use regex::Regex;

use crate::error::DecodeError;
use crate::probe::results::ParsedInfo;

pub trait ProtocolDecoder: Send + Sync {
    /// Key this decoder is registered under.
    fn protocol(&self) -> &'static str;

    /// Shortest input worth parsing.
    fn min_frame_len(&self) -> usize {
        1
    }

    /// Parse a frame at least `min_frame_len` bytes long.
    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError>;

    /// How strongly `data` looks like this protocol, 0 to 100.
    fn confidence(&self, data: &[u8]) -> u8;

    fn decode(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        if data.len() < self.min_frame_len() {
            return Ok(ParsedInfo::new(self.protocol()));
        }
        self.parse(data)
    }
}

/// Lookup table from protocol key to decoder.
pub struct DecoderBank {
    decoders: HashMap<&'static str, Box<dyn ProtocolDecoder>>,
}

impl DecoderBank {
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut bank = Self::empty();
        bank.register(Box::new(web::HttpDecoder));
        bank.register(Box::new(web::HttpsDecoder));
        bank.register(Box::new(tls::TlsDecoder));
        bank.register(Box::new(system::SshDecoder));
        bank.register(Box::new(system::FtpDecoder));
        bank.register(Box::new(system::DnsDecoder));
        bank.register(Box::new(system::SnmpDecoder));
        bank.register(Box::new(system::TelnetDecoder));
        bank.register(Box::new(mail::SmtpDecoder));
        bank.register(Box::new(mail::Pop3Decoder));
        bank.register(Box::new(mail::ImapDecoder));
        bank.register(Box::new(database::MySqlDecoder));
        bank.register(Box::new(database::RedisDecoder));
        bank.register(Box::new(database::PostgresDecoder));
        bank.register(Box::new(messaging::MqttDecoder));
        bank.register(Box::new(messaging::MqttWebSocketDecoder));
        bank.register(Box::new(camera::RtspDecoder));
        bank.register(Box::new(camera::OnvifDecoder::new("onvif")));
        bank.register(Box::new(camera::OnvifDecoder::new("onvif-http")));
        bank.register(Box::new(camera::HikvisionDecoder));
        bank.register(Box::new(camera::DahuaDecoder));
        bank.register(Box::new(industrial::ModbusDecoder));
        bank.register(Box::new(industrial::Dnp3Decoder));
        bank.register(Box::new(industrial::BacnetDecoder));
        bank.register(Box::new(industrial::OpcUaDecoder));
        bank.register(Box::new(industrial::S7Decoder));
        bank
    }

    /// Registers `decoder`, replacing any decoder with the same key.
    pub fn register(&mut self, decoder: Box<dyn ProtocolDecoder>) {
        self.decoders.insert(decoder.protocol(), decoder);
    }

    pub fn get(&self, protocol: &str) -> Option<&dyn ProtocolDecoder> {
        self.decoders.get(protocol).map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn protocols(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = self.decoders.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Best-confidence protocol for an unlabelled response.
    ///
    /// Ties resolve to the alphabetically first key.
    pub fn sniff(&self, data: &[u8]) -> Option<(&'static str, u8)> {
        self.protocols()
            .into_iter()
            .filter_map(|key| {
                let score = self.decoders.get(key)?.confidence(data);
                (score > 0).then_some((key, score))
            })
            .fold(None, |best: Option<(&'static str, u8)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            })
    }
}

impl Default for DecoderBank {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for DecoderBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderBank")
            .field("protocols", &self.protocols())
            .finish()
    }
}

pub(crate) fn lossy(data: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(data)
}

pub(crate) fn capture<'t>(re: &Regex, text: &'t str, group: usize) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(group))
        .map(|m| m.as_str())
}

pub(crate) fn be_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

pub(crate) fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Status line plus lower-cased headers of an HTTP-style response.
pub(crate) struct HeaderBlock {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
}

impl HeaderBlock {
    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines();
        let status_line = lines.next().unwrap_or_default().trim().to_string();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                if key.is_empty() {
                    continue;
                }
                headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        Self {
            status_line,
            headers,
        }
    }

    /// Last value of `name`, matching the usual last-wins header semantics.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}
