use lazy_static::lazy_static;
use regex::Regex;

use super::system::UNMATCHED_CONFIDENCE;
use super::{capture, le_u32, lossy, HeaderBlock, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::results::ParsedInfo;

lazy_static! {
    static ref RTSP_STATUS_RE: Regex = Regex::new(r"RTSP/(\d+\.\d+)\s+(\d+)\s*(.*)").unwrap();
    static ref HIKVISION_VERSION_RE: Regex = Regex::new(r"hikvision.*?(\d+\.\d+\.\d+)").unwrap();
    static ref TDS_MANUFACTURER_RE: Regex =
        Regex::new(r"<tds:Manufacturer>(.*?)</tds:Manufacturer>").unwrap();
    static ref TDS_MODEL_RE: Regex = Regex::new(r"<tds:Model>(.*?)</tds:Model>").unwrap();
    static ref TDS_FIRMWARE_RE: Regex =
        Regex::new(r"<tds:FirmwareVersion>(.*?)</tds:FirmwareVersion>").unwrap();
    static ref TDS_SERIAL_RE: Regex =
        Regex::new(r"<tds:SerialNumber>(.*?)</tds:SerialNumber>").unwrap();
    static ref WSD_TYPES_RE: Regex = Regex::new(r"<d:Types>(.*?)</d:Types>").unwrap();
    static ref WSD_XADDRS_RE: Regex = Regex::new(r"<d:XAddrs>(.*?)</d:XAddrs>").unwrap();
    static ref SERVER_HEADER_RE: Regex = Regex::new(r"(?i)server:\s*(.+)").unwrap();
    static ref ISAPI_MODEL_RE: Regex = Regex::new(r"<model>(.*?)</model>").unwrap();
    static ref ISAPI_FIRMWARE_RE: Regex =
        Regex::new(r"<firmwareVersion>(.*?)</firmwareVersion>").unwrap();
    static ref ISAPI_SERIAL_RE: Regex = Regex::new(r"<serialNumber>(.*?)</serialNumber>").unwrap();
}

pub struct RtspDecoder;

impl ProtocolDecoder for RtspDecoder {
    fn protocol(&self) -> &'static str {
        "rtsp"
    }

    fn min_frame_len(&self) -> usize {
        5
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let mut info = ParsedInfo::with_service("rtsp", "rtsp");
        info.product = "RTSP Server".to_string();
        info.confidence = if text.contains("RTSP/") { 80 } else { UNMATCHED_CONFIDENCE };

        let block = HeaderBlock::parse(&text);
        info.set_field("status_line", block.status_line.clone());
        if let Some(caps) = RTSP_STATUS_RE.captures(&block.status_line) {
            info.version = caps[1].to_string();
            info.set_field("status_code", &caps[2]);
            info.set_field("status_text", caps[3].trim());
            info.confidence = 95;
        }

        for (key, value) in &block.headers {
            info.set_field(&format!("header_{}", key), value.clone());
            match key.as_str() {
                "server" => parse_rtsp_server(value, &mut info),
                "public" => info.set_field("supported_methods", value.clone()),
                "cseq" => info.set_field("sequence", value.clone()),
                "session" => info.set_field("session_id", value.clone()),
                _ => {}
            }
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        let text = lossy(data);
        if text.starts_with("RTSP/") {
            95
        } else if text.contains("RTSP/1.0") {
            90
        } else {
            0
        }
    }
}

fn parse_rtsp_server(server: &str, info: &mut ParsedInfo) {
    info.set_field("server", server);
    let lower = server.to_ascii_lowercase();

    let (product, extra, certain) = if lower.contains("hikvision") {
        if let Some(version) = capture(&HIKVISION_VERSION_RE, &lower, 1) {
            info.version = version.to_string();
        }
        ("Hikvision IP Camera", "Hikvision RTSP Server", true)
    } else if lower.contains("dahua") {
        ("Dahua IP Camera", "Dahua RTSP Server", true)
    } else if lower.contains("axis") {
        ("AXIS IP Camera", "AXIS RTSP Server", true)
    } else if lower.contains("uniview") || lower.contains("unv") {
        ("Uniview IP Camera", "Uniview RTSP Server", true)
    } else if lower.contains("gstreamer") {
        ("GStreamer RTSP Server", "Open Source RTSP Server", false)
    } else if lower.contains("live555") {
        ("Live555 RTSP Server", "Live555 Media Server", false)
    } else {
        return;
    };

    info.product = product.to_string();
    info.extra_info = extra.to_string();
    if certain {
        info.confidence = 98;
    }
}

/// ONVIF SOAP responses, over WS-Discovery or the HTTP device service.
///
/// The same decoder serves both catalog keys; `protocol` echoes the key it
/// was registered under so results stay attributable.
pub struct OnvifDecoder {
    key: &'static str,
}

impl OnvifDecoder {
    pub fn new(key: &'static str) -> Self {
        Self { key }
    }
}

impl ProtocolDecoder for OnvifDecoder {
    fn protocol(&self) -> &'static str {
        self.key
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let mut info = ParsedInfo::with_service(self.key, "onvif");
        info.product = "ONVIF Device".to_string();
        info.confidence = 80;

        if !(text.contains("soap:Envelope") || text.contains("SOAP-ENV:Envelope")) {
            if !text.to_ascii_lowercase().contains("onvif") {
                info.confidence = UNMATCHED_CONFIDENCE;
            }
            return Ok(info);
        }

        info.set_field("message_type", "SOAP Response");
        info.confidence = 90;

        if text.contains("GetDeviceInformationResponse") {
            info.set_field("response_type", "DeviceInformation");
            if let Some(manufacturer) = capture(&TDS_MANUFACTURER_RE, &text, 1) {
                let manufacturer = manufacturer.trim();
                info.product = format!("{} ONVIF Device", manufacturer);
                info.set_field("manufacturer", manufacturer);
            }
            if let Some(model) = capture(&TDS_MODEL_RE, &text, 1) {
                info.set_field("model", model.trim());
            }
            if let Some(firmware) = capture(&TDS_FIRMWARE_RE, &text, 1) {
                info.version = firmware.trim().to_string();
            }
            if let Some(serial) = capture(&TDS_SERIAL_RE, &text, 1) {
                info.set_field("serial_number", serial.trim());
            }
            info.confidence = 98;
        }

        if text.contains("ProbeMatches") {
            info.set_field("response_type", "WS-Discovery ProbeMatches");
            info.service = "onvif-discovery".to_string();
            if let Some(types) = capture(&WSD_TYPES_RE, &text, 1) {
                info.set_field("device_types", types.trim());
            }
            if let Some(addresses) = capture(&WSD_XADDRS_RE, &text, 1) {
                info.set_field("device_addresses", addresses.trim());
            }
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        let lower = lossy(data).to_ascii_lowercase();
        if lower.contains("onvif") && lower.contains("soap") {
            95
        } else if lower.contains("soap:envelope") && lower.contains("device") {
            80
        } else {
            0
        }
    }
}

/// Hikvision ISAPI over HTTP.
pub struct HikvisionDecoder;

impl ProtocolDecoder for HikvisionDecoder {
    fn protocol(&self) -> &'static str {
        "hikvision"
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let text = lossy(data);
        let mut info = ParsedInfo::with_service("hikvision", "hikvision");
        info.product = "Hikvision IP Camera".to_string();
        info.confidence = 85;

        if !text.contains("HTTP/") {
            if !text.to_ascii_lowercase().contains("hikvision") {
                info.confidence = UNMATCHED_CONFIDENCE;
            }
            return Ok(info);
        }

        let status_line = text.lines().next().unwrap_or_default().trim();
        info.set_field("status_line", status_line);
        if status_line.contains("200 OK") {
            info.confidence = 95;
        } else if status_line.contains("401") {
            info.set_field("auth_required", "true");
            info.extra_info = "Authentication Required".to_string();
        }

        if let Some(server) = capture(&SERVER_HEADER_RE, &text, 1) {
            let server = server.trim();
            info.set_field("server", server);
            if server.to_ascii_lowercase().contains("hikvision") {
                info.confidence = 98;
            }
        }

        if text.contains("<DeviceInfo") {
            info.set_field("response_type", "ISAPI DeviceInfo");
            if let Some(model) = capture(&ISAPI_MODEL_RE, &text, 1) {
                info.set_field("model", model.trim());
            }
            if let Some(firmware) = capture(&ISAPI_FIRMWARE_RE, &text, 1) {
                info.version = firmware.trim().to_string();
            }
            if let Some(serial) = capture(&ISAPI_SERIAL_RE, &text, 1) {
                info.set_field("serial_number", serial.trim());
            }
            info.confidence = 98;
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        let lower = lossy(data).to_ascii_lowercase();
        if lower.contains("hikvision") {
            95
        } else if lower.contains("isapi") {
            85
        } else {
            0
        }
    }
}

/// Dahua private binary protocol (port 37777).
pub struct DahuaDecoder;

impl ProtocolDecoder for DahuaDecoder {
    fn protocol(&self) -> &'static str {
        "dahua"
    }

    fn min_frame_len(&self) -> usize {
        4
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("dahua", "dahua");
        info.product = "Dahua IP Camera".to_string();

        if data[0] != 0xa0 {
            info.confidence = UNMATCHED_CONFIDENCE;
            return Ok(info);
        }

        info.confidence = 90;
        info.set_field("protocol_header", "0xa0");
        let length = u32::from_be_bytes([0, data[1], data[2], data[3]]);
        info.set_field("packet_length", length.to_string());

        if let Some(command) = le_u32(data, 4) {
            info.set_field("command_type", format!("0x{:08x}", command));
            let name = match command {
                0x01 => Some("Login Request"),
                0x02 => Some("Login Response"),
                0x03 => Some("Logout"),
                0x1000 => Some("Keep Alive"),
                _ => None,
            };
            if let Some(name) = name {
                info.set_field("command_name", name);
            }
            if command == 0x02 {
                info.confidence = 95;
            }
        }

        if let Some(session) = le_u32(data, 12) {
            info.set_field("session_id", format!("0x{:08x}", session));
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() >= 4 && data[0] == 0xa0 {
            90
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::payloads::dahua_login;

    #[test]
    fn test_rtsp_hikvision_server() {
        let response = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE, PLAY\r\nServer: Hikvision-Webs/5.4.0\r\n\r\n";
        let info = RtspDecoder.decode(response).unwrap();
        assert_eq!(info.product, "Hikvision IP Camera");
        assert_eq!(info.version, "5.4.0");
        assert_eq!(info.confidence, 98);
        assert_eq!(info.field("status_code"), Some("200"));
        assert_eq!(info.field("sequence"), Some("1"));
        assert_eq!(info.field("supported_methods"), Some("OPTIONS, DESCRIBE, PLAY"));
        assert_eq!(info.field("header_cseq"), Some("1"));
        assert_eq!(RtspDecoder.confidence(response), 95);
    }

    #[test]
    fn test_rtsp_live555_keeps_status_confidence() {
        let response = b"RTSP/1.0 200 OK\r\nServer: LIVE555 Streaming Media v2020.01.01\r\n\r\n";
        let info = RtspDecoder.decode(response).unwrap();
        assert_eq!(info.product, "Live555 RTSP Server");
        assert_eq!(info.version, "1.0");
        assert_eq!(info.confidence, 95);
    }

    #[test]
    fn test_onvif_device_information() {
        let response = b"HTTP/1.1 200 OK\r\n\r\n<soap:Envelope><soap:Body><tds:GetDeviceInformationResponse>\
<tds:Manufacturer>Axis</tds:Manufacturer><tds:Model>P1365</tds:Model>\
<tds:FirmwareVersion>9.80.1</tds:FirmwareVersion><tds:SerialNumber>ACCC8E</tds:SerialNumber>\
</tds:GetDeviceInformationResponse></soap:Body></soap:Envelope>";
        let info = OnvifDecoder::new("onvif-http").decode(response).unwrap();
        assert_eq!(info.protocol, "onvif-http");
        assert_eq!(info.product, "Axis ONVIF Device");
        assert_eq!(info.version, "9.80.1");
        assert_eq!(info.field("model"), Some("P1365"));
        assert_eq!(info.field("serial_number"), Some("ACCC8E"));
        assert_eq!(info.confidence, 98);
    }

    #[test]
    fn test_onvif_probe_matches() {
        let response = b"<SOAP-ENV:Envelope><SOAP-ENV:Body><d:ProbeMatches><d:ProbeMatch>\
<d:Types>dn:NetworkVideoTransmitter</d:Types><d:XAddrs>http://10.0.0.5/onvif/device_service</d:XAddrs>\
</d:ProbeMatch></d:ProbeMatches></SOAP-ENV:Body></SOAP-ENV:Envelope>";
        let info = OnvifDecoder::new("onvif").decode(response).unwrap();
        assert_eq!(info.service, "onvif-discovery");
        assert_eq!(info.field("device_types"), Some("dn:NetworkVideoTransmitter"));
        assert_eq!(
            info.field("device_addresses"),
            Some("http://10.0.0.5/onvif/device_service")
        );
        assert_eq!(info.confidence, 90);
    }

    #[test]
    fn test_hikvision_isapi() {
        let response = b"HTTP/1.1 401 Unauthorized\r\nServer: App-webs/\r\n\r\n";
        let info = HikvisionDecoder.decode(response).unwrap();
        assert_eq!(info.field("auth_required"), Some("true"));
        assert_eq!(info.extra_info, "Authentication Required");
        assert_eq!(info.confidence, 85);

        let response = b"HTTP/1.1 200 OK\r\n\r\n<DeviceInfo><model>DS-2CD2043G0-I</model>\
<firmwareVersion>V5.5.0</firmwareVersion><serialNumber>DS123</serialNumber></DeviceInfo>";
        let info = HikvisionDecoder.decode(response).unwrap();
        assert_eq!(info.field("model"), Some("DS-2CD2043G0-I"));
        assert_eq!(info.version, "V5.5.0");
        assert_eq!(info.confidence, 98);
    }

    #[test]
    fn test_dahua_frames() {
        let info = DahuaDecoder.decode(&dahua_login()).unwrap();
        assert_eq!(info.field("command_type"), Some("0x00000001"));
        assert_eq!(info.field("command_name"), Some("Login Request"));
        assert_eq!(info.field("packet_length"), Some("96"));
        assert_eq!(info.confidence, 90);

        let mut response = vec![0xa0, 0x00, 0x00, 0x60, 0x02, 0x00, 0x00, 0x00];
        response.extend_from_slice(&[0u8; 4]);
        response.extend_from_slice(&0x1234u32.to_le_bytes());
        let info = DahuaDecoder.decode(&response).unwrap();
        assert_eq!(info.field("command_name"), Some("Login Response"));
        assert_eq!(info.field("session_id"), Some("0x00001234"));
        assert_eq!(info.confidence, 95);
    }
}
