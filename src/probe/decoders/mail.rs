use lazy_static::lazy_static;
use regex::Regex;

use super::system::{starts_with_ready_code, REPLY_CODE_RE, UNMATCHED_CONFIDENCE};
use super::{lossy, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::results::ParsedInfo;

lazy_static! {
    static ref IMAP_RE: Regex = Regex::new(r"^(\*|A\d+)\s+(OK|NO|BAD)\s+(.*)").unwrap();
    static ref IMAP_STATUS_RE: Regex = Regex::new(r"^(\*|A\d+)\s+(OK|NO|BAD)").unwrap();
}

pub struct SmtpDecoder;

impl ProtocolDecoder for SmtpDecoder {
    fn protocol(&self) -> &'static str {
        "smtp"
    }

    fn min_frame_len(&self) -> usize {
        4
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let mut info = ParsedInfo::with_service("smtp", "smtp");
        info.confidence = UNMATCHED_CONFIDENCE;

        if let Some(caps) = REPLY_CODE_RE.captures(&text) {
            let message = caps[2].trim();
            info.confidence = 80;
            info.set_field("response_code", &caps[1]);
            info.set_field("message", message);

            // "220 mail.example.com ESMTP Postfix"
            if caps[1].starts_with('2') {
                if let Some(host) = message.split_whitespace().next().filter(|h| h.contains('.')) {
                    info.hostname = host.to_string();
                }
            }
            if message.to_ascii_lowercase().contains("postfix") {
                info.product = "Postfix".to_string();
                info.confidence = 90;
            }
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        let text = lossy(data);
        if starts_with_ready_code(&text) && text.contains("SMTP") {
            85
        } else {
            0
        }
    }
}

pub struct Pop3Decoder;

impl ProtocolDecoder for Pop3Decoder {
    fn protocol(&self) -> &'static str {
        "pop3"
    }

    fn min_frame_len(&self) -> usize {
        3
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("pop3", "pop3");
        if data.starts_with(b"+OK") {
            info.set_field("response", "OK");
            info.confidence = 90;
        } else if data.starts_with(b"-ERR") {
            info.set_field("response", "ERR");
            info.confidence = 80;
        } else {
            info.confidence = UNMATCHED_CONFIDENCE;
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.starts_with(b"+OK") || data.starts_with(b"-ERR") {
            85
        } else {
            0
        }
    }
}

pub struct ImapDecoder;

impl ProtocolDecoder for ImapDecoder {
    fn protocol(&self) -> &'static str {
        "imap"
    }

    fn min_frame_len(&self) -> usize {
        4
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let mut info = ParsedInfo::with_service("imap", "imap");
        info.confidence = UNMATCHED_CONFIDENCE;

        if let Some(caps) = IMAP_RE.captures(&text) {
            info.set_field("tag", &caps[1]);
            info.set_field("status", &caps[2]);
            info.set_field("message", caps[3].trim());
            info.confidence = 90;
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if IMAP_STATUS_RE.is_match(&lossy(data)) {
            85
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_postfix_greeting() {
        let greeting = b"220 mail.example.com ESMTP Postfix (Ubuntu)\r\n";
        let info = SmtpDecoder.decode(greeting).unwrap();
        assert_eq!(info.product, "Postfix");
        assert_eq!(info.hostname, "mail.example.com");
        assert_eq!(info.confidence, 90);
        assert_eq!(SmtpDecoder.confidence(greeting), 85);
    }

    #[test]
    fn test_pop3_and_imap() {
        let info = Pop3Decoder.decode(b"+OK Dovecot ready.\r\n").unwrap();
        assert_eq!(info.field("response"), Some("OK"));
        assert_eq!(info.confidence, 90);

        let info = ImapDecoder
            .decode(b"* OK [CAPABILITY IMAP4rev1] Dovecot ready.\r\n")
            .unwrap();
        assert_eq!(info.field("tag"), Some("*"));
        assert_eq!(info.field("status"), Some("OK"));
        assert_eq!(info.confidence, 90);
        assert_eq!(ImapDecoder.confidence(b"A001 BAD command"), 85);
    }
}
