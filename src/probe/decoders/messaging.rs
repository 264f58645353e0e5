use super::system::UNMATCHED_CONFIDENCE;
use super::web::parse_http;
use super::{be_u16, lossy, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::payloads::decode_remaining_length;
use crate::probe::results::ParsedInfo;

const PUBLISH_PREVIEW_LIMIT: usize = 100;

fn message_type_name(kind: u8) -> &'static str {
    match kind {
        1 => "CONNECT",
        2 => "CONNACK",
        3 => "PUBLISH",
        4 => "PUBACK",
        5 => "PUBREC",
        6 => "PUBREL",
        7 => "PUBCOMP",
        8 => "SUBSCRIBE",
        9 => "SUBACK",
        10 => "UNSUBSCRIBE",
        11 => "UNSUBACK",
        12 => "PINGREQ",
        13 => "PINGRESP",
        14 => "DISCONNECT",
        _ => "Reserved",
    }
}

fn return_code_name(code: u8) -> String {
    match code {
        0 => "Connection Accepted".to_string(),
        1 => "Connection Refused: Unacceptable Protocol Version".to_string(),
        2 => "Connection Refused: Identifier Rejected".to_string(),
        3 => "Connection Refused: Server Unavailable".to_string(),
        4 => "Connection Refused: Bad User Name or Password".to_string(),
        5 => "Connection Refused: Not Authorized".to_string(),
        other => format!("Unknown ({})", other),
    }
}

enum RemainingLength {
    Valid { value: u32, width: usize },
    Truncated,
    Overlong,
}

fn remaining_length(data: &[u8]) -> RemainingLength {
    let tail = &data[1..];
    match decode_remaining_length(tail) {
        Some((value, width)) => RemainingLength::Valid { value, width },
        None if tail.len() >= 4 => RemainingLength::Overlong,
        None => RemainingLength::Truncated,
    }
}

pub struct MqttDecoder;

impl ProtocolDecoder for MqttDecoder {
    fn protocol(&self) -> &'static str {
        "mqtt"
    }

    fn min_frame_len(&self) -> usize {
        2
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("mqtt", "mqtt");
        info.product = "MQTT Broker".to_string();
        info.confidence = 80;

        let header = data[0];
        let kind = header >> 4;
        info.set_field("message_type", kind.to_string());
        info.set_field("dup", ((header >> 3) & 0x01).to_string());
        info.set_field("qos", ((header >> 1) & 0x03).to_string());
        info.set_field("retain", (header & 0x01).to_string());
        info.set_field("message_type_name", message_type_name(kind));

        let body_offset = match remaining_length(data) {
            RemainingLength::Valid { value, width } => {
                info.set_field("remaining_length", value.to_string());
                info.set_field("length_bytes", width.to_string());
                1 + width
            }
            RemainingLength::Overlong => {
                info.set_field("remaining_length_error", "overlong");
                info.confidence = UNMATCHED_CONFIDENCE;
                return Ok(info);
            }
            RemainingLength::Truncated => {
                info.confidence = if (1..=14).contains(&kind) { 50 } else { UNMATCHED_CONFIDENCE };
                return Ok(info);
            }
        };

        match kind {
            1 => parse_connect(data, body_offset, &mut info),
            2 => {
                parse_connack(data, body_offset, &mut info);
                info.confidence = 95;
            }
            3 => parse_publish(data, body_offset, &mut info),
            4 => info.set_field("message_description", "Publish Acknowledgment"),
            8 => info.set_field("message_description", "Subscribe Request"),
            9 => info.set_field("message_description", "Subscribe Acknowledgment"),
            12 => info.set_field("message_description", "Ping Request"),
            13 => {
                info.set_field("message_description", "Ping Response");
                info.confidence = 90;
            }
            14 => info.set_field("message_description", "Disconnect"),
            0 | 15 => info.confidence = UNMATCHED_CONFIDENCE,
            _ => {}
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() < 2 {
            return 0;
        }
        let kind = data[0] >> 4;
        if !(1..=14).contains(&kind) {
            return 0;
        }
        match remaining_length(data) {
            RemainingLength::Overlong => 0,
            _ if kind == 2 => 95,
            _ => 80,
        }
    }
}

fn parse_connect(data: &[u8], mut offset: usize, info: &mut ParsedInfo) {
    let Some(name_len) = be_u16(data, offset) else {
        return;
    };
    offset += 2;
    let Some(name) = data.get(offset..offset + name_len as usize) else {
        return;
    };
    info.set_field("protocol_name", lossy(name).into_owned());
    offset += name_len as usize;

    let Some(fixed) = data.get(offset..offset + 4) else {
        return;
    };
    let level = fixed[0];
    info.set_field("protocol_level", level.to_string());
    info.version = match level {
        3 => "3.1".to_string(),
        4 => "3.1.1".to_string(),
        5 => "5.0".to_string(),
        other => format!("Unknown ({})", other),
    };

    let flags = fixed[1];
    info.set_field("clean_session", ((flags >> 1) & 0x01).to_string());
    info.set_field("will_flag", ((flags >> 2) & 0x01).to_string());
    info.set_field("will_qos", ((flags >> 3) & 0x03).to_string());
    info.set_field("will_retain", ((flags >> 5) & 0x01).to_string());
    info.set_field("password_flag", ((flags >> 6) & 0x01).to_string());
    info.set_field("username_flag", ((flags >> 7) & 0x01).to_string());

    let keep_alive = u16::from_be_bytes([fixed[2], fixed[3]]);
    info.set_field("keep_alive", keep_alive.to_string());
}

fn parse_connack(data: &[u8], offset: usize, info: &mut ParsedInfo) {
    let Some(body) = data.get(offset..offset + 2) else {
        return;
    };
    info.set_field("session_present", (body[0] & 0x01).to_string());

    let code = body[1];
    let name = return_code_name(code);
    info.set_field("return_code", code.to_string());
    info.extra_info = if code == 0 {
        "Connection Accepted".to_string()
    } else {
        format!("Connection Refused: {}", name)
    };
    info.set_field("return_code_name", name);
}

fn parse_publish(data: &[u8], mut offset: usize, info: &mut ParsedInfo) {
    let Some(topic_len) = be_u16(data, offset) else {
        return;
    };
    offset += 2;
    let Some(topic) = data.get(offset..offset + topic_len as usize) else {
        return;
    };
    info.set_field("topic", lossy(topic).into_owned());
    offset += topic_len as usize;

    let qos = (data[0] >> 1) & 0x03;
    if qos > 0 {
        if let Some(packet_id) = be_u16(data, offset) {
            info.set_field("packet_id", packet_id.to_string());
            offset += 2;
        }
    }

    if offset < data.len() {
        let payload = &data[offset..];
        info.set_field("payload_length", payload.len().to_string());
        if payload.len() <= PUBLISH_PREVIEW_LIMIT {
            info.set_field("payload", lossy(payload).into_owned());
        }
    }
}

/// MQTT brokers reached through an HTTP WebSocket upgrade.
pub struct MqttWebSocketDecoder;

impl ProtocolDecoder for MqttWebSocketDecoder {
    fn protocol(&self) -> &'static str {
        "mqtt-ws"
    }

    fn min_frame_len(&self) -> usize {
        2
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let lower = text.to_ascii_lowercase();

        if text.contains("HTTP/") && lower.contains("websocket") {
            let mut info = parse_http(data);
            info.protocol = "mqtt-ws".to_string();
            info.service = "mqtt-websocket".to_string();
            if lower.contains("mqtt") {
                info.product = "MQTT over WebSocket".to_string();
                info.extra_info = "WebSocket MQTT Broker".to_string();
                info.confidence = 90;
            }
            return Ok(info);
        }

        MqttDecoder.parse(data)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        let lower = lossy(data).to_ascii_lowercase();
        if lower.contains("http/") && lower.contains("websocket") {
            return if lower.contains("mqtt") { 90 } else { 70 };
        }
        MqttDecoder.confidence(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::payloads::{encode_remaining_length, mqtt_connect};

    #[test]
    fn test_connack_accepted() {
        let info = MqttDecoder.decode(&[0x20, 0x02, 0x00, 0x00]).unwrap();
        assert_eq!(info.field("message_type_name"), Some("CONNACK"));
        assert_eq!(info.field("return_code"), Some("0"));
        assert_eq!(info.extra_info, "Connection Accepted");
        assert_eq!(info.confidence, 95);
        assert_eq!(MqttDecoder.confidence(&[0x20, 0x02, 0x00, 0x00]), 95);
    }

    #[test]
    fn test_connack_refused() {
        let info = MqttDecoder.decode(&[0x20, 0x02, 0x01, 0x05]).unwrap();
        assert_eq!(info.field("session_present"), Some("1"));
        assert_eq!(
            info.extra_info,
            "Connection Refused: Connection Refused: Not Authorized"
        );
    }

    #[test]
    fn test_decodes_own_connect_packet() {
        let info = MqttDecoder.decode(&mqtt_connect()).unwrap();
        assert_eq!(info.field("message_type_name"), Some("CONNECT"));
        assert_eq!(info.field("protocol_name"), Some("MQTT"));
        assert_eq!(info.version, "3.1.1");
        assert_eq!(info.field("clean_session"), Some("1"));
        assert_eq!(info.field("keep_alive"), Some("60"));
        assert_eq!(info.field("remaining_length"), Some("24"));
    }

    #[test]
    fn test_publish_with_qos1() {
        let mut body = vec![0x00, 0x03];
        body.extend_from_slice(b"a/b");
        body.extend_from_slice(&[0x00, 0x07]);
        body.extend_from_slice(b"hello");
        let mut packet = vec![0x32];
        packet.extend(encode_remaining_length(body.len() as u32));
        packet.extend(body);

        let info = MqttDecoder.decode(&packet).unwrap();
        assert_eq!(info.field("topic"), Some("a/b"));
        assert_eq!(info.field("packet_id"), Some("7"));
        assert_eq!(info.field("payload"), Some("hello"));
        assert_eq!(info.field("qos"), Some("1"));
    }

    #[test]
    fn test_overlong_remaining_length_degrades() {
        let frame = [0x30, 0xff, 0xff, 0xff, 0xff, 0x01];
        let info = MqttDecoder.decode(&frame).unwrap();
        assert_eq!(info.confidence, UNMATCHED_CONFIDENCE);
        assert_eq!(info.field("remaining_length_error"), Some("overlong"));
        assert_eq!(info.field("message_type_name"), Some("PUBLISH"));
        assert!(info.field("remaining_length").is_none());
        assert_eq!(MqttDecoder.confidence(&frame), 0);

        let bank = crate::probe::decoders::DecoderBank::with_builtins();
        assert!(bank.get("mqtt").unwrap().decode(&frame).is_ok());
    }

    #[test]
    fn test_truncated_length_is_moderate() {
        let info = MqttDecoder.decode(&[0x30, 0x80]).unwrap();
        assert_eq!(info.confidence, 50);
    }

    #[test]
    fn test_websocket_upgrade() {
        let response = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Protocol: mqtt\r\n\r\n";
        let info = MqttWebSocketDecoder.decode(response).unwrap();
        assert_eq!(info.protocol, "mqtt-ws");
        assert_eq!(info.service, "mqtt-websocket");
        assert_eq!(info.product, "MQTT over WebSocket");
        assert_eq!(info.confidence, 90);
        assert_eq!(MqttWebSocketDecoder.confidence(response), 90);

        let info = MqttWebSocketDecoder.decode(&[0xd0, 0x00]).unwrap();
        assert_eq!(info.protocol, "mqtt");
        assert_eq!(info.confidence, 90);
    }
}
