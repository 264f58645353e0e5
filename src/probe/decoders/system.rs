use lazy_static::lazy_static;
use regex::Regex;

use super::{be_u16, capture, lossy, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::results::ParsedInfo;

/// Confidence for a frame that reached the decoder but lacks the protocol signature.
pub(crate) const UNMATCHED_CONFIDENCE: u8 = 20;

lazy_static! {
    static ref SSH_RE: Regex = Regex::new(r"SSH-([.\d]+)-(.+?)(?:\s(.*))?(?:\r|\n|$)").unwrap();
    static ref OPENSSH_RE: Regex = Regex::new(r"OpenSSH[_\s]+(\d+\.\d+(?:p\d+)?)").unwrap();
    static ref UBUNTU_PKG_RE: Regex = Regex::new(r"Ubuntu-(\d+)ubuntu").unwrap();
    static ref DROPBEAR_RE: Regex = Regex::new(r"dropbear[_\s]+(\d+\.\d+)").unwrap();
    static ref LIBSSH_RE: Regex = Regex::new(r"libssh[_\s]+(\d+\.\d+\.\d+)").unwrap();
    pub(crate) static ref REPLY_CODE_RE: Regex = Regex::new(r"^(\d{3})\s+(.+)").unwrap();
    static ref VSFTPD_RE: Regex = Regex::new(r"(?i)vsftpd\s+([^\s)]+)").unwrap();
    static ref FTP_READY_RE: Regex = Regex::new(r"^2\d{2}\s").unwrap();
}

const HONEYPOT_KEYWORDS: [&str; 4] = ["honeypot", "cowrie", "kippo", "dionaea"];

pub struct SshDecoder;

impl ProtocolDecoder for SshDecoder {
    fn protocol(&self) -> &'static str {
        "ssh"
    }

    fn min_frame_len(&self) -> usize {
        4
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let content = text.trim();
        let mut info = ParsedInfo::with_service("ssh", "ssh");

        let Some(caps) = SSH_RE.captures(content) else {
            info.confidence = if content.starts_with("SSH-") { 50 } else { UNMATCHED_CONFIDENCE };
            return Ok(info);
        };

        info.confidence = 95;
        let software = caps[2].trim().to_string();
        let comments = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default().to_string();

        info.set_field("protocol_version", &caps[1]);
        info.set_field("software_version", software.clone());
        if !comments.is_empty() {
            info.set_field("comments", comments.clone());
        }

        identify_software(&software, &comments, &mut info);
        if !comments.is_empty() {
            inspect_comments(&comments, &mut info);
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.starts_with(b"SSH-") {
            95
        } else {
            0
        }
    }
}

fn identify_software(software: &str, comments: &str, info: &mut ParsedInfo) {
    let lower = software.to_ascii_lowercase();
    // Distribution tags usually sit in the comment part, e.g. "Ubuntu-4ubuntu0.5".
    let banner = format!("{} {}", software, comments);

    if let Some(version) = capture(&OPENSSH_RE, software, 1) {
        info.product = "OpenSSH".to_string();
        info.version = version.to_string();
        info.confidence = 98;

        if banner.contains("Ubuntu") {
            info.os = "Ubuntu".to_string();
            if let Some(package) = capture(&UBUNTU_PKG_RE, &banner, 1) {
                info.set_field("ubuntu_package", package);
            }
        } else if banner.contains("Debian") {
            info.os = "Debian".to_string();
        } else if banner.contains("CentOS") || banner.contains("Red Hat") {
            info.os = "CentOS/RHEL".to_string();
        } else if banner.contains("FreeBSD") {
            info.os = "FreeBSD".to_string();
        }
    } else if lower.contains("dropbear") {
        info.product = "Dropbear SSH".to_string();
        if let Some(version) = capture(&DROPBEAR_RE, &lower, 1) {
            info.version = version.to_string();
        }
        info.extra_info = "Lightweight SSH server".to_string();
        info.device_type = "embedded".to_string();
        info.confidence = 95;
    } else if lower.contains("libssh") {
        info.product = "libssh".to_string();
        if let Some(version) = capture(&LIBSSH_RE, &lower, 1) {
            info.version = version.to_string();
        }
        info.extra_info = "SSH library implementation".to_string();
        info.confidence = 90;
    } else if lower.contains("cisco") {
        info.product = "Cisco SSH".to_string();
        info.device_type = "network device".to_string();
        info.extra_info = "Cisco network equipment".to_string();
        info.confidence = 95;
    } else if lower.contains("paramiko") {
        info.product = "Paramiko".to_string();
        info.extra_info = "Python SSH implementation".to_string();
        info.confidence = 90;
    }
}

fn inspect_comments(comments: &str, info: &mut ParsedInfo) {
    let comments = comments.to_ascii_lowercase();

    if let Some(keyword) = HONEYPOT_KEYWORDS.iter().find(|k| comments.contains(*k)) {
        info.extra_info = "Possible honeypot".to_string();
        info.set_field("honeypot_indicator", *keyword);
    }

    if comments.contains("aws") || comments.contains("amazon") {
        info.set_field("cloud_provider", "AWS");
    } else if comments.contains("azure") {
        info.set_field("cloud_provider", "Azure");
    } else if comments.contains("gcp") || comments.contains("google") {
        info.set_field("cloud_provider", "Google Cloud");
    }
}

pub struct FtpDecoder;

impl ProtocolDecoder for FtpDecoder {
    fn protocol(&self) -> &'static str {
        "ftp"
    }

    fn min_frame_len(&self) -> usize {
        4
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let mut info = ParsedInfo::with_service("ftp", "ftp");
        info.confidence = UNMATCHED_CONFIDENCE;

        if let Some(caps) = REPLY_CODE_RE.captures(&text) {
            let message = caps[2].trim();
            info.confidence = 80;
            info.set_field("response_code", &caps[1]);
            info.set_field("message", message);

            if message.to_ascii_lowercase().contains("vsftpd") {
                info.product = "vsftpd".to_string();
                if let Some(version) = capture(&VSFTPD_RE, message, 1) {
                    info.version = version.to_string();
                }
            }
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if FTP_READY_RE.is_match(&lossy(data)) {
            80
        } else {
            0
        }
    }
}

pub(crate) fn starts_with_ready_code(text: &str) -> bool {
    FTP_READY_RE.is_match(text)
}

pub struct DnsDecoder;

impl ProtocolDecoder for DnsDecoder {
    fn protocol(&self) -> &'static str {
        "dns"
    }

    fn min_frame_len(&self) -> usize {
        12
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("dns", "dns");
        info.confidence = 80;

        if let Some(flags) = be_u16(data, 2) {
            info.set_field("flags", format!("0x{:04x}", flags));
            info.set_field("type", if flags & 0x8000 != 0 { "response" } else { "query" });
            info.set_field("rcode", (flags & 0x000f).to_string());
        }
        if let Some(id) = be_u16(data, 0) {
            info.set_field("transaction_id", id.to_string());
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() >= 12 {
            80
        } else {
            0
        }
    }
}

pub struct SnmpDecoder;

impl ProtocolDecoder for SnmpDecoder {
    fn protocol(&self) -> &'static str {
        "snmp"
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("snmp", "snmp");
        if data[0] == 0x30 {
            info.set_field("asn1_type", "sequence");
            info.confidence = 75;
        } else {
            info.confidence = UNMATCHED_CONFIDENCE;
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.first() == Some(&0x30) {
            70
        } else {
            0
        }
    }
}

pub struct TelnetDecoder;

impl ProtocolDecoder for TelnetDecoder {
    fn protocol(&self) -> &'static str {
        "telnet"
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("telnet", "telnet");
        info.confidence = 70;
        if data[0] == 0xff {
            info.set_field("telnet_command", "IAC");
            info.confidence = 85;
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.first() == Some(&0xff) {
            80
        } else {
            0
        }
    }
}
