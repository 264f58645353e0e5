use lazy_static::lazy_static;
use regex::Regex;

use super::{capture, lossy, tls, HeaderBlock, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::results::ParsedInfo;

lazy_static! {
    static ref STATUS_RE: Regex = Regex::new(r"HTTP/(\d+\.\d+)\s+(\d+)\s*(.*)").unwrap();
    static ref NGINX_RE: Regex = Regex::new(r"nginx/(\d+\.\d+(?:\.\d+)?)").unwrap();
    static ref APACHE_RE: Regex = Regex::new(r"Apache/(\d+\.\d+(?:\.\d+)?)").unwrap();
    static ref IIS_RE: Regex = Regex::new(r"Microsoft-IIS/(\d+\.\d+)").unwrap();
    static ref GUNICORN_RE: Regex = Regex::new(r"gunicorn/(\d+\.\d+\.\d+)").unwrap();
    static ref PHP_RE: Regex = Regex::new(r"php/(\d+\.\d+(?:\.\d+)?)").unwrap();
}

pub struct HttpDecoder;

impl ProtocolDecoder for HttpDecoder {
    fn protocol(&self) -> &'static str {
        "http"
    }

    fn min_frame_len(&self) -> usize {
        5
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        Ok(parse_http(data))
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if lossy(data).contains("HTTP/") {
            95
        } else {
            0
        }
    }
}

/// Status line, headers and server fingerprint of an HTTP response.
pub(crate) fn parse_http(data: &[u8]) -> ParsedInfo {
    let text = lossy(data);
    let mut info = ParsedInfo::with_service("http", "http");
    info.confidence = 70;

    let block = HeaderBlock::parse(&text);
    if let Some(caps) = STATUS_RE.captures(&block.status_line) {
        info.set_field("http_version", &caps[1]);
        info.set_field("status_code", &caps[2]);
        info.set_field("status_text", caps[3].trim());
    }
    info.set_field("status_line", block.status_line.clone());

    for (key, value) in &block.headers {
        info.set_field(&format!("header_{}", key), value.clone());
    }

    if let Some(server) = block.get("server") {
        parse_server_header(server, &mut info);
    }
    if let Some(content_type) = block.get("content-type") {
        info.set_field("content_type", content_type);
    }
    if let Some(powered) = block.get("x-powered-by") {
        info.set_field("powered_by", powered);
        parse_powered_by(powered, &mut info);
    }
    detect_technologies(&block, &mut info);

    info
}

fn parse_server_header(server: &str, info: &mut ParsedInfo) {
    let server = server.trim();
    info.set_field("server", server);
    let lower = server.to_ascii_lowercase();

    if let Some(version) = capture(&NGINX_RE, server, 1) {
        info.product = "nginx".to_string();
        info.version = version.to_string();
        info.confidence = 95;
        if server.contains("Ubuntu") {
            info.os = "Ubuntu".to_string();
        }
    } else if let Some(version) = capture(&APACHE_RE, server, 1) {
        info.product = "Apache httpd".to_string();
        info.version = version.to_string();
        info.confidence = 95;
        if server.contains("Ubuntu") {
            info.os = "Ubuntu".to_string();
        } else if server.contains("CentOS") {
            info.os = "CentOS".to_string();
        } else if server.contains("Win32") || server.contains("Win64") {
            info.os = "Windows".to_string();
        }
    } else if let Some(version) = capture(&IIS_RE, server, 1) {
        info.product = "Microsoft IIS".to_string();
        info.version = version.to_string();
        info.os = "Windows".to_string();
        info.confidence = 95;
    } else if lower.contains("gunicorn") {
        info.product = "Gunicorn".to_string();
        if let Some(version) = capture(&GUNICORN_RE, server, 1) {
            info.version = version.to_string();
        }
        info.extra_info = "Python WSGI HTTP Server".to_string();
        info.confidence = 90;
    } else if lower.contains("cloudflare") {
        info.product = "Cloudflare".to_string();
        info.extra_info = "CDN/Proxy".to_string();
        info.confidence = 85;
    }
}

fn parse_powered_by(powered: &str, info: &mut ParsedInfo) {
    let powered = powered.to_ascii_lowercase();

    if powered.contains("php") {
        info.extra_info = "PHP".to_string();
        if let Some(version) = capture(&PHP_RE, &powered, 1) {
            info.set_field("php_version", version);
        }
    } else if powered.contains("asp.net") {
        info.extra_info = "ASP.NET".to_string();
        info.os = "Windows".to_string();
    } else if powered.contains("express") {
        info.extra_info = "Node.js Express".to_string();
    }
}

fn detect_technologies(block: &HeaderBlock, info: &mut ParsedInfo) {
    let mut technologies: Vec<String> = Vec::new();

    if block.get("x-aspnet-version").is_some() {
        technologies.push("ASP.NET".to_string());
        info.os = "Windows".to_string();
    }
    if block.get("x-powered-by-plesk").is_some() {
        technologies.push("Plesk".to_string());
    }
    if block.get("x-drupal-cache").is_some() {
        technologies.push("Drupal".to_string());
    }
    if let Some(generator) = block.get("x-generator") {
        technologies.push(generator.to_string());
    }
    if let Some(cookie) = block.get("set-cookie") {
        let cookie = cookie.to_ascii_lowercase();
        if cookie.contains("phpsessid") {
            technologies.push("PHP".to_string());
        } else if cookie.contains("jsessionid") {
            technologies.push("Java/JSP".to_string());
        } else if cookie.contains("asp.net_sessionid") {
            technologies.push("ASP.NET".to_string());
        }
    }

    if !technologies.is_empty() {
        info.set_field("technologies", technologies.join(", "));
    }
}

/// HTTPS endpoints answer either with a TLS record or with plaintext HTTP.
pub struct HttpsDecoder;

pub(crate) fn is_tls_record(data: &[u8]) -> bool {
    data.len() >= 5 && (20..=23).contains(&data[0])
}

impl ProtocolDecoder for HttpsDecoder {
    fn protocol(&self) -> &'static str {
        "https"
    }

    fn min_frame_len(&self) -> usize {
        5
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        if is_tls_record(data) {
            Ok(tls::parse_tls(data))
        } else {
            Ok(parse_http(data))
        }
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        match tls::TlsDecoder.confidence(data) {
            0 => HttpDecoder.confidence(data),
            score => score,
        }
    }
}
