use lazy_static::lazy_static;
use regex::Regex;

use super::system::UNMATCHED_CONFIDENCE;
use super::{capture, lossy, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::results::ParsedInfo;

lazy_static! {
    static ref MYSQL_VERSION_RE: Regex = Regex::new(r"^(\d+\.\d+\.\d+)").unwrap();
    static ref MARIADB_VERSION_RE: Regex = Regex::new(r"(\d+\.\d+\.\d+)-MariaDB").unwrap();
    static ref UBUNTU_RELEASE_RE: Regex = Regex::new(r"ubuntu0\.(\d+\.\d+)").unwrap();
}

const MYSQL_CAPABILITIES: [(u16, &str); 6] = [
    (0x0001, "LONG_PASSWORD"),
    (0x0002, "FOUND_ROWS"),
    (0x0004, "LONG_FLAG"),
    (0x0008, "CONNECT_WITH_DB"),
    (0x0800, "PROTOCOL_41"),
    (0x8000, "SSL"),
];

/// Longest server version string scanned for its NUL terminator.
const MAX_VERSION_LEN: usize = 50;

pub struct MySqlDecoder;

impl ProtocolDecoder for MySqlDecoder {
    fn protocol(&self) -> &'static str {
        "mysql"
    }

    fn min_frame_len(&self) -> usize {
        5
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("mysql", "mysql");
        info.product = "MySQL".to_string();

        let protocol_version = data[4];
        if protocol_version == 0xff {
            parse_error_packet(&data[5..], &mut info);
            return Ok(info);
        }

        info.set_field("protocol_version", protocol_version.to_string());
        info.confidence = if protocol_version == 10 { 95 } else { 85 };

        let start = 5;
        let end = data
            .iter()
            .enumerate()
            .skip(start)
            .take(MAX_VERSION_LEN)
            .find(|&(_, &b)| b == 0)
            .map(|(i, _)| i);

        match end {
            Some(end) if end > start => {
                let version = String::from_utf8_lossy(&data[start..end]).into_owned();
                info.set_field("server_version", version.clone());
                parse_version_string(&version, &mut info);
                if end + 1 < data.len() {
                    parse_handshake(&data[end + 1..], &mut info);
                }
            }
            _ if protocol_version != 10 => info.confidence = UNMATCHED_CONFIDENCE,
            _ => {}
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() > 4 && data[4] == 10 {
            90
        } else {
            0
        }
    }
}

/// ERR packet sent instead of a greeting, e.g. "Host is not allowed to connect".
fn parse_error_packet(body: &[u8], info: &mut ParsedInfo) {
    info.confidence = 90;
    info.set_field("response_type", "error");
    if body.len() >= 2 {
        let code = u16::from_le_bytes([body[0], body[1]]);
        info.set_field("error_code", code.to_string());
        let message = lossy(&body[2..]);
        let message = message.trim_start_matches('#');
        info.set_field("error_message", message.trim());
    }
}

fn parse_version_string(version: &str, info: &mut ParsedInfo) {
    if let Some(v) = capture(&MYSQL_VERSION_RE, version, 1) {
        info.version = v.to_string();
    }

    let lower = version.to_ascii_lowercase();
    if lower.contains("mariadb") {
        info.product = "MariaDB".to_string();
        info.confidence = 98;
        if let Some(v) = capture(&MARIADB_VERSION_RE, version, 1) {
            info.version = v.to_string();
        }
    } else if lower.contains("percona") {
        info.product = "Percona Server".to_string();
        info.confidence = 98;
    } else {
        info.product = "MySQL".to_string();
    }

    if version.contains("ubuntu") {
        info.os = "Ubuntu".to_string();
        if let Some(release) = capture(&UBUNTU_RELEASE_RE, version, 1) {
            info.set_field("ubuntu_version", release);
        }
    } else if version.contains("debian") {
        info.os = "Debian".to_string();
    } else if version.contains("el7") {
        info.os = "CentOS/RHEL".to_string();
        info.set_field("rhel_version", "7");
    } else if version.contains("el8") {
        info.os = "CentOS/RHEL".to_string();
        info.set_field("rhel_version", "8");
    }

    if version.contains("-log") {
        info.set_field("logging_enabled", "true");
    }
    if version.contains("cll-lve") {
        info.extra_info = "CloudLinux LVE".to_string();
    }
    if version.contains("rds") {
        info.set_field("cloud_provider", "AWS RDS");
    }
}

/// Fields following the version string: thread id, salt, filler, capabilities.
fn parse_handshake(data: &[u8], info: &mut ParsedInfo) {
    if data.len() < 4 {
        return;
    }
    let thread_id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    info.set_field("thread_id", thread_id.to_string());

    if data.len() < 15 {
        return;
    }
    let capabilities = u16::from_le_bytes([data[13], data[14]]);
    info.set_field("capabilities", format!("0x{:04x}", capabilities));

    let flags: Vec<&str> = MYSQL_CAPABILITIES
        .iter()
        .filter(|(bit, _)| capabilities & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if !flags.is_empty() {
        info.set_field("capability_flags", flags.join(", "));
    }
    if capabilities & 0x8000 != 0 {
        info.set_field("ssl_support", "true");
    }
}

pub struct RedisDecoder;

impl ProtocolDecoder for RedisDecoder {
    fn protocol(&self) -> &'static str {
        "redis"
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let mut info = ParsedInfo::with_service("redis", "redis");
        info.product = "Redis".to_string();

        info.confidence = if matches!(data[0], b'+' | b'-' | b':' | b'$' | b'*') {
            95
        } else {
            UNMATCHED_CONFIDENCE
        };

        if text.starts_with("+PONG") {
            info.set_field("response", "PONG");
        } else if let Some(error) = text.strip_prefix("-ERR") {
            info.set_field("error", error.trim());
        } else if text.starts_with("-NOAUTH") {
            info.set_field("auth_required", "true");
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.starts_with(b"+PONG") || data.starts_with(b"-ERR") {
            95
        } else {
            0
        }
    }
}

pub struct PostgresDecoder;

impl ProtocolDecoder for PostgresDecoder {
    fn protocol(&self) -> &'static str {
        "postgresql"
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("postgresql", "postgresql");
        info.product = "PostgreSQL".to_string();

        match data[0] {
            b'E' => {
                info.confidence = 80;
                info.set_field("response_type", "error");
                if data.len() > 5 {
                    parse_error_fields(&data[5..], &mut info);
                }
            }
            b'R' => {
                info.confidence = 80;
                info.set_field("response_type", "authentication");
            }
            _ => info.confidence = UNMATCHED_CONFIDENCE,
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        match data.first() {
            Some(b'E') | Some(b'R') => 75,
            _ => 0,
        }
    }
}

/// ErrorResponse body: NUL-separated `<code><text>` fields.
fn parse_error_fields(body: &[u8], info: &mut ParsedInfo) {
    for field in body.split(|&b| b == 0).filter(|f| !f.is_empty()) {
        let value = lossy(&field[1..]).into_owned();
        match field[0] {
            b'S' => info.set_field("severity", value),
            b'C' => info.set_field("sqlstate", value),
            b'M' => info.set_field("message", value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting(version: &str, capabilities: u16) -> Vec<u8> {
        let mut body = vec![0x0a];
        body.extend_from_slice(version.as_bytes());
        body.push(0);
        body.extend_from_slice(&42u32.to_le_bytes());
        body.extend_from_slice(b"saltsalt");
        body.push(0);
        body.extend_from_slice(&capabilities.to_le_bytes());
        body.extend_from_slice(&[0x21, 0x02, 0x00]);

        let len = body.len() as u32;
        let mut packet = len.to_le_bytes()[..3].to_vec();
        packet.push(0);
        packet.extend(body);
        packet
    }

    #[test]
    fn test_mysql_ubuntu_greeting() {
        let info = MySqlDecoder.decode(&greeting("8.0.27-0ubuntu0.20.04.1", 0x880f)).unwrap();
        assert_eq!(info.product, "MySQL");
        assert_eq!(info.version, "8.0.27");
        assert_eq!(info.os, "Ubuntu");
        assert_eq!(info.field("ubuntu_version"), Some("20.04"));
        assert_eq!(info.field("thread_id"), Some("42"));
        assert_eq!(info.field("capabilities"), Some("0x880f"));
        assert_eq!(
            info.field("capability_flags"),
            Some("LONG_PASSWORD, FOUND_ROWS, LONG_FLAG, CONNECT_WITH_DB, PROTOCOL_41, SSL")
        );
        assert_eq!(info.field("ssl_support"), Some("true"));
        assert_eq!(info.confidence, 95);
    }

    #[test]
    fn test_mariadb_greeting() {
        let info = MySqlDecoder.decode(&greeting("10.3.32-MariaDB-log", 0x0800)).unwrap();
        assert_eq!(info.product, "MariaDB");
        assert_eq!(info.version, "10.3.32");
        assert_eq!(info.confidence, 98);
        assert_eq!(info.field("logging_enabled"), Some("true"));
        assert!(info.field("ssl_support").is_none());
    }

    #[test]
    fn test_mysql_error_packet() {
        let mut packet = vec![0x17, 0x00, 0x00, 0x00, 0xff, 0x6a, 0x04];
        packet.extend_from_slice(b"Host is not allowed");
        let info = MySqlDecoder.decode(&packet).unwrap();
        assert_eq!(info.field("error_code"), Some("1130"));
        assert_eq!(info.field("error_message"), Some("Host is not allowed"));
    }

    #[test]
    fn test_mysql_short_handshake_does_not_panic() {
        let packet = [0x10, 0x00, 0x00, 0x00, 0x0a, b'5', b'.', b'7', 0x00, 1, 2, 3, 4, 5, 6];
        let info = MySqlDecoder.decode(&packet).unwrap();
        assert_eq!(info.field("thread_id"), Some("67305985"));
        assert!(info.field("capabilities").is_none());
    }

    #[test]
    fn test_redis_pong() {
        let info = RedisDecoder.decode(b"+PONG\r\n").unwrap();
        assert_eq!(info.field("response"), Some("PONG"));
        assert_eq!(info.confidence, 95);
        assert_eq!(RedisDecoder.confidence(b"+PONG\r\n"), 95);

        let info = RedisDecoder.decode(b"-ERR unknown command\r\n").unwrap();
        assert_eq!(info.field("error"), Some("unknown command"));
    }

    #[test]
    fn test_postgres_error_response() {
        let mut packet = vec![b'E', 0, 0, 0, 0x30];
        packet.extend_from_slice(b"SFATAL\0C28000\0Mno pg_hba.conf entry\0\0");
        let info = PostgresDecoder.decode(&packet).unwrap();
        assert_eq!(info.field("response_type"), Some("error"));
        assert_eq!(info.field("severity"), Some("FATAL"));
        assert_eq!(info.field("sqlstate"), Some("28000"));
        assert_eq!(info.field("message"), Some("no pg_hba.conf entry"));
    }
}
