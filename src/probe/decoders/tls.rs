use super::{be_u16, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::results::ParsedInfo;

const CIPHER_SUITES: &[(u16, &str)] = &[
    (0x002f, "TLS_RSA_WITH_AES_128_CBC_SHA"),
    (0x0035, "TLS_RSA_WITH_AES_256_CBC_SHA"),
    (0x003c, "TLS_RSA_WITH_AES_128_CBC_SHA256"),
    (0x003d, "TLS_RSA_WITH_AES_256_CBC_SHA256"),
    (0x009c, "TLS_RSA_WITH_AES_128_GCM_SHA256"),
    (0x009d, "TLS_RSA_WITH_AES_256_GCM_SHA384"),
    (0x1301, "TLS_AES_128_GCM_SHA256"),
    (0x1302, "TLS_AES_256_GCM_SHA384"),
    (0x1303, "TLS_CHACHA20_POLY1305_SHA256"),
    (0xc007, "TLS_ECDHE_ECDSA_WITH_RC4_128_SHA"),
    (0xc009, "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA"),
    (0xc00a, "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA"),
    (0xc011, "TLS_ECDHE_RSA_WITH_RC4_128_SHA"),
    (0xc013, "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA"),
    (0xc014, "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA"),
    (0xc023, "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256"),
    (0xc024, "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384"),
    (0xc027, "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256"),
    (0xc028, "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384"),
    (0xc02b, "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    (0xc02c, "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    (0xc02f, "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    (0xc030, "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    (0xcca8, "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
    (0xcca9, "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
];

const SUPPORTED_VERSIONS_EXT: u16 = 0x002b;

pub struct TlsDecoder;

impl ProtocolDecoder for TlsDecoder {
    fn protocol(&self) -> &'static str {
        "tls"
    }

    fn min_frame_len(&self) -> usize {
        5
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        Ok(parse_tls(data))
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() < 3 {
            return 0;
        }
        let version = u16::from_be_bytes([data[1], data[2]]);
        if (20..=23).contains(&data[0]) && (0x0300..=0x0304).contains(&version) {
            95
        } else {
            0
        }
    }
}

pub fn version_name(version: u16) -> Option<&'static str> {
    match version {
        0x0300 => Some("SSL 3.0"),
        0x0301 => Some("TLS 1.0"),
        0x0302 => Some("TLS 1.1"),
        0x0303 => Some("TLS 1.2"),
        0x0304 => Some("TLS 1.3"),
        _ => None,
    }
}

fn alert_name(code: u8) -> Option<&'static str> {
    Some(match code {
        0 => "close_notify",
        10 => "unexpected_message",
        20 => "bad_record_mac",
        21 => "decryption_failed",
        22 => "record_overflow",
        30 => "decompression_failure",
        40 => "handshake_failure",
        41 => "no_certificate",
        42 => "bad_certificate",
        43 => "unsupported_certificate",
        44 => "certificate_revoked",
        45 => "certificate_expired",
        46 => "certificate_unknown",
        47 => "illegal_parameter",
        48 => "unknown_ca",
        49 => "access_denied",
        50 => "decode_error",
        51 => "decrypt_error",
        60 => "export_restriction",
        70 => "protocol_version",
        71 => "insufficient_security",
        80 => "internal_error",
        90 => "user_canceled",
        100 => "no_renegotiation",
        110 => "unsupported_extension",
        _ => return None,
    })
}

fn handshake_name(kind: u8) -> Option<&'static str> {
    Some(match kind {
        0 => "HelloRequest",
        1 => "ClientHello",
        2 => "ServerHello",
        11 => "Certificate",
        12 => "ServerKeyExchange",
        13 => "CertificateRequest",
        14 => "ServerHelloDone",
        15 => "CertificateVerify",
        16 => "ClientKeyExchange",
        20 => "Finished",
        _ => return None,
    })
}

/// Record header, alert or handshake details of a TLS response.
pub(crate) fn parse_tls(data: &[u8]) -> ParsedInfo {
    let mut info = ParsedInfo::with_service("tls", "tls");
    info.confidence = 80;
    if data.len() < 5 {
        return info;
    }

    let content_type = data[0];
    let version = u16::from_be_bytes([data[1], data[2]]);
    let length = u16::from_be_bytes([data[3], data[4]]);
    info.set_field("content_type", content_type.to_string());
    info.set_field("record_length", length.to_string());

    match version_name(version) {
        Some(name) => {
            info.version = name.to_string();
            info.product = if version == 0x0300 { "SSL" } else { "TLS" }.to_string();
        }
        None => {
            info.version = format!("Unknown (0x{:04x})", version);
            info.product = "TLS/SSL".to_string();
        }
    }
    info.set_field("tls_version", info.version.clone());

    match content_type {
        20 => info.set_field("message_type", "ChangeCipherSpec"),
        21 => {
            info.set_field("message_type", "Alert");
            if data.len() >= 7 {
                info.set_field("alert_level", data[5].to_string());
                info.set_field("alert_description", data[6].to_string());
                if let Some(name) = alert_name(data[6]) {
                    info.set_field("alert_description_name", name);
                }
            }
        }
        22 => {
            info.set_field("message_type", "Handshake");
            if data.len() >= 6 {
                let kind = data[5];
                info.set_field("handshake_type", kind.to_string());
                if let Some(name) = handshake_name(kind) {
                    info.set_field("handshake_type_name", name);
                }
                if kind == 2 && data.len() - 5 >= 38 {
                    parse_server_hello(&data[5..], &mut info);
                }
            }
        }
        23 => info.set_field("message_type", "ApplicationData"),
        other => info.set_field("message_type", format!("Unknown ({})", other)),
    }

    info.confidence = if (20..=23).contains(&content_type) && version_name(version).is_some() {
        95
    } else {
        20
    };
    info
}

/// `data` starts at the handshake header.
fn parse_server_hello(data: &[u8], info: &mut ParsedInfo) {
    let mut offset = 4;

    if let Some(version) = be_u16(data, offset) {
        let name = match version {
            0x0303 => "TLS 1.2".to_string(),
            0x0304 => "TLS 1.3".to_string(),
            other => format!("0x{:04x}", other),
        };
        info.set_field("negotiated_version", name);
        offset += 2;
    }

    offset += 32;

    if let Some(&session_len) = data.get(offset) {
        info.set_field("session_id_length", session_len.to_string());
        offset += 1 + session_len as usize;
    }

    if let Some(suite) = be_u16(data, offset) {
        info.set_field("cipher_suite", format!("0x{:04x}", suite));
        describe_cipher_suite(suite, info);
        offset += 2;
    }

    if let Some(&compression) = data.get(offset) {
        info.set_field("compression_method", compression.to_string());
        offset += 1;
    }

    if let Some(selected) = selected_version(data, offset) {
        if let Some(name) = version_name(selected) {
            info.set_field("negotiated_version", name);
        }
    }
}

/// Value of the supported_versions extension, which carries the real
/// version of a TLS 1.3 ServerHello.
fn selected_version(data: &[u8], offset: usize) -> Option<u16> {
    let total = be_u16(data, offset)? as usize;
    let end = (offset + 2 + total).min(data.len());
    let mut cursor = offset + 2;

    while cursor + 4 <= end {
        let ext_type = be_u16(data, cursor)?;
        let ext_len = be_u16(data, cursor + 2)? as usize;
        if ext_type == SUPPORTED_VERSIONS_EXT && ext_len == 2 {
            return be_u16(data, cursor + 4);
        }
        cursor += 4 + ext_len;
    }
    None
}

fn describe_cipher_suite(suite: u16, info: &mut ParsedInfo) {
    let Some(&(_, name)) = CIPHER_SUITES.iter().find(|(code, _)| *code == suite) else {
        return;
    };
    info.set_field("cipher_suite_name", name);

    if name.contains("AES_256") || name.contains("CHACHA20") {
        info.set_field("encryption_strength", "Strong");
    } else if name.contains("AES_128") {
        info.set_field("encryption_strength", "Medium");
    } else if name.contains("RC4") {
        info.set_field("encryption_strength", "Weak");
    }

    // TLS 1.3 suites carry no key exchange in their name but are always ephemeral.
    let tls13 = (0x1301..=0x1303).contains(&suite);
    let forward_secrecy = tls13 || name.contains("DHE");
    info.set_field("forward_secrecy", if forward_secrecy { "Yes" } else { "No" });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_hello(legacy_version: u16, suite: u16, extensions: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&legacy_version.to_be_bytes());
        body.extend_from_slice(&[0x11; 32]);
        body.push(0x20);
        body.extend_from_slice(&[0x22; 32]);
        body.extend_from_slice(&suite.to_be_bytes());
        body.push(0x00);
        if !extensions.is_empty() {
            body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
            body.extend_from_slice(extensions);
        }

        let mut handshake = vec![0x02, 0x00];
        handshake.extend_from_slice(&(body.len() as u16).to_be_bytes());
        handshake.extend(body);

        let mut record = vec![0x16, 0x03, 0x03];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend(handshake);
        record
    }

    #[test]
    fn test_tls12_server_hello() {
        let record = server_hello(0x0303, 0xc02f, &[]);
        let info = TlsDecoder.decode(&record).unwrap();
        assert_eq!(info.version, "TLS 1.2");
        assert_eq!(info.product, "TLS");
        assert_eq!(info.confidence, 95);
        assert_eq!(info.field("handshake_type_name"), Some("ServerHello"));
        assert_eq!(info.field("negotiated_version"), Some("TLS 1.2"));
        assert_eq!(info.field("session_id_length"), Some("32"));
        assert_eq!(info.field("cipher_suite"), Some("0xc02f"));
        assert_eq!(info.field("cipher_suite_name"), Some("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"));
        assert_eq!(info.field("encryption_strength"), Some("Medium"));
        assert_eq!(info.field("forward_secrecy"), Some("Yes"));
        assert_eq!(info.field("compression_method"), Some("0"));
    }

    #[test]
    fn test_tls13_server_hello_uses_supported_versions() {
        let extensions = [0x00, 0x2b, 0x00, 0x02, 0x03, 0x04];
        let record = server_hello(0x0303, 0x1302, &extensions);
        let info = TlsDecoder.decode(&record).unwrap();
        assert_eq!(info.field("negotiated_version"), Some("TLS 1.3"));
        assert_eq!(info.field("encryption_strength"), Some("Strong"));
        assert_eq!(info.field("forward_secrecy"), Some("Yes"));
    }

    #[test]
    fn test_record_version_table() {
        for (version, name) in [
            (0x0300u16, "SSL 3.0"),
            (0x0301, "TLS 1.0"),
            (0x0302, "TLS 1.1"),
            (0x0303, "TLS 1.2"),
            (0x0304, "TLS 1.3"),
        ] {
            let [hi, lo] = version.to_be_bytes();
            let info = TlsDecoder.decode(&[0x17, hi, lo, 0x00, 0x00]).unwrap();
            assert_eq!(info.version, name);
            assert_eq!(TlsDecoder.confidence(&[0x17, hi, lo]), 95);
        }
        let info = TlsDecoder.decode(&[0x16, 0x03, 0x09, 0x00, 0x00]).unwrap();
        assert_eq!(info.version, "Unknown (0x0309)");
        assert_eq!(info.product, "TLS/SSL");
    }

    #[test]
    fn test_alert() {
        let info = TlsDecoder.decode(&[0x15, 0x03, 0x01, 0x00, 0x02, 0x02, 0x46]).unwrap();
        assert_eq!(info.field("message_type"), Some("Alert"));
        assert_eq!(info.field("alert_level"), Some("2"));
        assert_eq!(info.field("alert_description_name"), Some("protocol_version"));
    }

    #[test]
    fn test_rsa_suite_has_no_forward_secrecy() {
        let record = server_hello(0x0303, 0x0035, &[]);
        let info = TlsDecoder.decode(&record).unwrap();
        assert_eq!(info.field("encryption_strength"), Some("Strong"));
        assert_eq!(info.field("forward_secrecy"), Some("No"));
    }

    #[test]
    fn test_non_tls_bytes() {
        assert_eq!(TlsDecoder.confidence(b"SSH-2.0"), 0);
        let info = TlsDecoder.decode(b"SSH-2.0-x").unwrap();
        assert_eq!(info.confidence, 20);
    }
}
