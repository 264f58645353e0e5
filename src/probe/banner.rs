//! One-line summaries of decoded responses.
//!
//! Every template follows the same order: identity, environment, protocol
//! metadata, then free-form extra info. Rendering is pure.

use crate::probe::results::ParsedInfo;

/// Longest raw banner kept before truncation.
pub const MAX_RAW_BANNER: usize = 512;

/// Banner for a response, using the protocol template when `parsed` is present.
pub fn render(protocol: &str, raw: &[u8], parsed: Option<&ParsedInfo>) -> String {
    let Some(info) = parsed else {
        return extract_banner(raw);
    };

    let banner = match protocol {
        "http" => http(info),
        "https" => https(info),
        "tls" => tls(info),
        "ssh" => ssh(info),
        "mysql" => mysql(info),
        "ftp" => reply_code("FTP", info, true),
        "smtp" => reply_code("SMTP", info, false),
        "mqtt" => mqtt(info),
        "mqtt-ws" => mqtt_websocket(info),
        "rtsp" => rtsp(info),
        "onvif" | "onvif-http" => onvif(info),
        "hikvision" => hikvision(info),
        "dahua" => dahua(info),
        "modbus" => modbus(info),
        "dnp3" => dnp3(info),
        "bacnet" => bacnet(info),
        "opcua" => opcua(info),
        "s7" => s7(info),
        _ => generic(info),
    };

    if banner.is_empty() {
        extract_banner(raw)
    } else {
        banner
    }
}

/// Printable projection of raw bytes: ASCII and `\r\n\t` kept, the rest as `\xHH`.
pub fn extract_banner(raw: &[u8]) -> String {
    let mut banner = String::with_capacity(raw.len().min(MAX_RAW_BANNER));
    for &b in raw {
        match b {
            32..=126 | b'\r' | b'\n' | b'\t' => banner.push(b as char),
            _ => banner.push_str(&format!("\\x{:02x}", b)),
        }
        if banner.len() > MAX_RAW_BANNER {
            break;
        }
    }

    if banner.len() > MAX_RAW_BANNER {
        banner.truncate(MAX_RAW_BANNER);
        banner.push_str("...");
    }
    banner
}

/// Sections joined by `" | "`.
#[derive(Default)]
struct Line(String);

impl Line {
    fn push(&mut self, text: &str) -> &mut Self {
        self.0.push_str(text);
        self
    }

    fn section(&mut self, text: &str) -> &mut Self {
        if !self.0.is_empty() {
            self.0.push_str(" | ");
        }
        self.0.push_str(text);
        self
    }

    fn labelled(&mut self, label: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.section(&format!("{}{}", label, value));
        }
        self
    }

    fn extra(&mut self, info: &ParsedInfo) -> &mut Self {
        if !info.extra_info.is_empty() {
            self.section(&info.extra_info);
        }
        self
    }

    fn finish(&mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

fn generic(info: &ParsedInfo) -> String {
    let mut banner = String::new();
    if !info.product.is_empty() {
        banner.push_str(&info.product);
        if !info.version.is_empty() {
            banner.push_str(" v");
            banner.push_str(&info.version);
        }
    }
    if !info.os.is_empty() {
        if !banner.is_empty() {
            banner.push_str(" on ");
        }
        banner.push_str(&info.os);
    }
    if !info.extra_info.is_empty() {
        if banner.is_empty() {
            banner.push_str(&info.extra_info);
        } else {
            banner.push_str(&format!(" ({})", info.extra_info));
        }
    }
    banner
}

fn http(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    if let Some(status) = info.field("status_line").filter(|s| !s.is_empty()) {
        line.push(status);
    }
    if !info.product.is_empty() {
        let mut server = format!("Server: {}", info.product);
        if !info.version.is_empty() {
            server.push('/');
            server.push_str(&info.version);
        }
        if !info.os.is_empty() {
            server.push_str(&format!(" ({})", info.os));
        }
        line.section(&server);
    }
    line.labelled("Tech: ", info.field("technologies"))
        .labelled("Powered by: ", info.field("powered_by"))
        .finish()
}

fn https(info: &ParsedInfo) -> String {
    if info.protocol == "tls" {
        return tls(info);
    }
    match http(info) {
        banner if banner.is_empty() => "HTTPS Service".to_string(),
        banner => format!("HTTPS | {}", banner),
    }
}

fn tls(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    if !info.product.is_empty() {
        line.push(&info.product);
        if !info.version.is_empty() {
            line.push(" ").push(&info.version);
        }
    }

    if let Some(message) = info.field("message_type") {
        let mut section = message.to_string();
        if let Some(detail) = info
            .field("handshake_type_name")
            .or_else(|| info.field("alert_description_name"))
        {
            section.push_str(&format!(" ({})", detail));
        }
        line.section(&section);
    }

    if let Some(cipher) = info.field("cipher_suite_name") {
        let mut section = format!("Cipher: {}", cipher);
        if let Some(strength) = info.field("encryption_strength") {
            section.push_str(&format!(" [{}]", strength));
        }
        if info.field("forward_secrecy") == Some("Yes") {
            section.push_str(" [PFS]");
        }
        line.section(&section);
    }
    line.finish()
}

fn ssh(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    if let Some(version) = info.field("protocol_version") {
        line.push("SSH-").push(version);
    }

    if !info.product.is_empty() {
        let mut section = info.product.clone();
        if !info.version.is_empty() {
            section.push(' ');
            section.push_str(&info.version);
        }
        line.section(&section);
    }

    if !info.os.is_empty() {
        line.push(" on ").push(&info.os);
        if let Some(package) = info.field("ubuntu_package") {
            line.push(&format!(" (package: {})", package));
        }
    }
    if !info.device_type.is_empty() {
        line.push(&format!(" [{}]", info.device_type));
    }
    if !info.extra_info.is_empty() {
        line.push(" - ").push(&info.extra_info);
    }
    if let Some(cloud) = info.field("cloud_provider") {
        line.push(&format!(" ({})", cloud));
    }
    line.finish()
}

fn mysql(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    if !info.product.is_empty() {
        line.push(&info.product);
        if !info.version.is_empty() {
            line.push(" ").push(&info.version);
        }
    }
    if let Some(protocol) = info.field("protocol_version") {
        line.push(&format!(" (Protocol {})", protocol));
    }
    if !info.os.is_empty() {
        line.push(" on ").push(&info.os);
        if let Some(release) = info
            .field("ubuntu_version")
            .or_else(|| info.field("rhel_version"))
        {
            line.push(" ").push(release);
        }
    }

    if info.field("ssl_support") == Some("true") {
        line.section("SSL: Enabled");
    }
    if info.field("logging_enabled") == Some("true") {
        line.section("Logging: Enabled");
    }
    line.labelled("Cloud: ", info.field("cloud_provider"))
        .extra(info)
        .finish()
}

/// FTP and SMTP share the `<code> <message>` greeting layout.
fn reply_code(label: &str, info: &ParsedInfo, with_version: bool) -> String {
    let mut line = Line::default();
    if let Some(code) = info.field("response_code") {
        line.push(label).push(" ").push(code);
        if let Some(message) = info.field("message") {
            line.push(" ").push(message);
        }
    }
    if !info.product.is_empty() {
        let mut section = info.product.clone();
        if with_version && !info.version.is_empty() {
            section.push(' ');
            section.push_str(&info.version);
        }
        line.section(&section);
    }
    line.finish()
}

fn mqtt(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    if !info.product.is_empty() {
        line.push(&info.product);
        if !info.version.is_empty() {
            line.push(" v").push(&info.version);
        }
    }

    if let Some(kind) = info.field("message_type_name") {
        let mut section = kind.to_string();
        if let Some(code) = info.field("return_code_name") {
            section.push_str(&format!(" ({})", code));
        }
        if let Some(topic) = info.field("topic") {
            section.push_str(&format!(" Topic: {}", topic));
        }
        line.section(&section);
    }

    if let Some(name) = info.field("protocol_name") {
        let mut section = format!("Protocol: {}", name);
        if let Some(level) = info.field("protocol_level") {
            section.push_str(&format!(" Level {}", level));
        }
        line.section(&section);
    }
    if let Some(keep_alive) = info.field("keep_alive") {
        line.section(&format!("Keep-Alive: {}s", keep_alive));
    }
    line.extra(info).finish()
}

fn mqtt_websocket(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push("MQTT over WebSocket")
        .labelled("Server: ", info.field("server"))
        .labelled("MQTT: ", info.field("message_type_name"))
        .extra(info)
        .finish()
}

fn rtsp(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    if let Some(status) = info.field("status_line").filter(|s| !s.is_empty()) {
        line.push(status);
    }
    line.labelled("Server: ", info.field("header_server"));
    if !info.product.is_empty() && info.product != "RTSP Server" {
        let mut section = info.product.clone();
        if !info.version.is_empty() {
            section.push_str(" v");
            section.push_str(&info.version);
        }
        line.section(&section);
    }
    line.labelled("Methods: ", info.field("supported_methods"))
        .extra(info)
        .finish()
}

fn onvif(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    if !info.product.is_empty() {
        line.push(&info.product);
        if !info.version.is_empty() {
            line.push(&format!(" (Firmware: {})", info.version));
        }
    }
    line.labelled("Manufacturer: ", info.field("manufacturer"))
        .labelled("Model: ", info.field("model"))
        .labelled("S/N: ", info.field("serial_number"))
        .labelled("", info.field("response_type"))
        .labelled("Addresses: ", info.field("device_addresses"))
        .finish()
}

fn hikvision(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push("Hikvision IP Camera");
    if !info.version.is_empty() {
        line.push(&format!(" (Firmware: {})", info.version));
    }
    line.labelled("", info.field("status_line").filter(|s| !s.is_empty()))
        .labelled("Model: ", info.field("model"))
        .labelled("S/N: ", info.field("serial_number"))
        .labelled("Server: ", info.field("server"));
    if info.field("auth_required") == Some("true") {
        line.section("Auth Required");
    }
    line.labelled("", info.field("response_type")).finish()
}

fn dahua(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push("Dahua IP Camera")
        .labelled("Protocol Header: ", info.field("protocol_header"));
    match info.field("command_name") {
        Some(name) => line.section(&format!("Command: {}", name)),
        None => line.labelled("Command Type: ", info.field("command_type")),
    };
    line.labelled("Session: ", info.field("session_id"))
        .labelled("Length: ", info.field("packet_length"))
        .finish()
}

fn modbus(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push(&info.product);
    if let Some(name) = info.field("function_name") {
        let mut section = format!("Function: {}", name);
        if let Some(code) = info.field("function_code") {
            section.push_str(&format!(" ({})", code));
        }
        line.section(&section);
    }
    line.labelled("Unit ID: ", info.field("unit_id"));
    if info.field("exception_response") == Some("true") {
        match info.field("exception_code").filter(|c| !c.is_empty()) {
            Some(code) => line.section(&format!("EXCEPTION (Code: {})", code)),
            None => line.section("EXCEPTION"),
        };
    }
    line.extra(info).finish()
}

fn dnp3(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push(&info.product)
        .labelled("Function: ", info.field("function_name"))
        .labelled("Src: ", info.field("source"))
        .labelled("Dest: ", info.field("destination"));
    match info.field("direction") {
        Some("1") => line.section("Direction: Master->Outstation"),
        Some(_) => line.section("Direction: Outstation->Master"),
        None => &mut line,
    };
    line.extra(info).finish()
}

fn bacnet(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push(&info.product)
        .labelled("", info.field("network_type"))
        .labelled("", info.field("bvlc_function_name"))
        .labelled("NPDU v", info.field("npdu_version"))
        .labelled("Priority: ", info.field("network_priority").filter(|p| *p != "0"))
        .extra(info)
        .finish()
}

fn opcua(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push(&info.product)
        .labelled("Message: ", info.field("message_name"));
    match info.field("protocol_version") {
        Some(version) => line.section(&format!("Protocol v{}", version)),
        None => line.labelled("Server Protocol v", info.field("server_protocol_version")),
    };
    line.labelled("RxBuffer: ", info.field("receive_buffer_size"))
        .labelled("TxBuffer: ", info.field("send_buffer_size"))
        .labelled("Endpoint: ", info.field("endpoint_url"))
        .extra(info)
        .finish()
}

fn s7(info: &ParsedInfo) -> String {
    let mut line = Line::default();
    line.push(&info.product)
        .labelled("TPKT v", info.field("tpkt_version"))
        .labelled("COTP: ", info.field("cotp_pdu_name"))
        .labelled("Class ", info.field("transport_class"))
        .labelled("SrcRef: ", info.field("source_reference"))
        .labelled("DestRef: ", info.field("destination_reference"))
        .extra(info)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::decoders::DecoderBank;

    fn decode(protocol: &str, raw: &[u8]) -> String {
        let bank = DecoderBank::with_builtins();
        let info = bank.get(protocol).unwrap().decode(raw).unwrap();
        render(protocol, raw, Some(&info))
    }

    #[test]
    fn test_raw_banner_escapes_binary() {
        assert_eq!(extract_banner(b"220 ready\r\n\x00\xff"), "220 ready\r\n\\x00\\xff");
        assert_eq!(extract_banner(&[]), "");
        assert_eq!(render("ssh", b"abc", None), "abc");
    }

    #[test]
    fn test_raw_banner_is_truncated() {
        let banner = extract_banner(&[b'A'; 600]);
        assert_eq!(banner.len(), MAX_RAW_BANNER + 3);
        assert!(banner.ends_with("..."));

        let banner = extract_banner(&[0u8; 200]);
        assert_eq!(banner.len(), MAX_RAW_BANNER + 3);
    }

    #[test]
    fn test_http_banner() {
        let banner = decode(
            "http",
            b"HTTP/1.1 200 OK\r\nServer: nginx/1.18.0 (Ubuntu)\r\nX-Powered-By: PHP/7.4.3\r\n\r\n",
        );
        assert!(banner.starts_with("HTTP/1.1 200 OK | Server: nginx/1.18.0 (Ubuntu)"));
        assert!(banner.ends_with("Powered by: PHP/7.4.3"));
    }

    #[test]
    fn test_ssh_banner() {
        let banner = decode("ssh", b"SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5\r\n");
        assert_eq!(banner, "SSH-2.0 | OpenSSH 8.2p1 on Ubuntu (package: 4)");
    }

    #[test]
    fn test_modbus_exception_banner() {
        let banner = decode("modbus", &[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x02]);
        assert_eq!(
            banner,
            "Modbus TCP Server | Function: Read Coils (Exception) (129) | Unit ID: 1 \
             | EXCEPTION (Code: 2) | Modbus Exception Response"
        );
    }

    #[test]
    fn test_mqtt_connack_banner() {
        let banner = decode("mqtt", &[0x20, 0x02, 0x00, 0x00]);
        assert_eq!(
            banner,
            "MQTT Broker | CONNACK (Connection Accepted) | Connection Accepted"
        );
    }

    #[test]
    fn test_https_banner_prefix() {
        let banner = decode("https", b"HTTP/1.1 400 Bad Request\r\n\r\n");
        assert_eq!(banner, "HTTPS | HTTP/1.1 400 Bad Request");
    }

    #[test]
    fn test_generic_template() {
        let mut info = ParsedInfo::new("redis");
        info.product = "Redis".to_string();
        info.version = "7.0".to_string();
        info.os = "Linux".to_string();
        info.extra_info = "cluster".to_string();
        assert_eq!(render("redis", b"", Some(&info)), "Redis v7.0 on Linux (cluster)");

        let empty = ParsedInfo::new("redis");
        assert_eq!(render("redis", b"+PONG", Some(&empty)), "+PONG");
    }

    #[test]
    fn test_render_is_deterministic() {
        let raw = b"RTSP/1.0 200 OK\r\nServer: Dahua Rtsp Server\r\n\r\n";
        assert_eq!(decode("rtsp", raw), decode("rtsp", raw));
        assert_eq!(
            decode("rtsp", raw),
            "RTSP/1.0 200 OK | Server: Dahua Rtsp Server | Dahua IP Camera v1.0 | Dahua RTSP Server"
        );
    }
}
