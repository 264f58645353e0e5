use super::system::UNMATCHED_CONFIDENCE;
use super::{be_u16, le_u32, lossy, ProtocolDecoder};
use crate::error::DecodeError;
use crate::probe::payloads::dnp3_crc;
use crate::probe::results::ParsedInfo;

fn modbus_function_name(code: u8) -> String {
    fn base(code: u8) -> Option<&'static str> {
        Some(match code {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x0f => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            0x16 => "Mask Write Register",
            0x17 => "Read/Write Multiple Registers",
            _ => return None,
        })
    }

    if code >= 0x80 {
        return match base(code - 0x80) {
            Some(name) => format!("{} (Exception)", name),
            None => "Exception Response".to_string(),
        };
    }
    base(code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown (0x{:02x})", code))
}

/// Modbus TCP: MBAP header followed by the function code.
pub struct ModbusDecoder;

impl ProtocolDecoder for ModbusDecoder {
    fn protocol(&self) -> &'static str {
        "modbus"
    }

    fn min_frame_len(&self) -> usize {
        8
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("modbus", "modbus");
        info.product = "Modbus TCP Server".to_string();
        info.confidence = 80;

        let transaction_id = u16::from_be_bytes([data[0], data[1]]);
        let protocol_id = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]);
        let unit_id = data[6];
        let function = data[7];

        info.set_field("transaction_id", transaction_id.to_string());
        info.set_field("protocol_id", protocol_id.to_string());
        info.set_field("length", length.to_string());
        info.set_field("unit_id", unit_id.to_string());
        info.set_field("function_code", function.to_string());

        if protocol_id == 0 {
            info.confidence = 95;
        }

        let name = modbus_function_name(function);
        if function >= 0x80 {
            info.set_field("exception_response", "true");
            let code = data.get(8).map(|c| c.to_string()).unwrap_or_default();
            info.set_field("exception_code", code);
            info.extra_info = "Modbus Exception Response".to_string();
        } else {
            info.extra_info = format!("Modbus Function: {}", name);
        }
        info.set_field("function_name", name);
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() < 8 || be_u16(data, 2) != Some(0) {
            return 0;
        }
        let function = data[7];
        if function <= 0x18 || (0x80..=0x98).contains(&function) {
            90
        } else {
            0
        }
    }
}

fn dnp3_function_name(code: u8, primary: bool) -> String {
    let name = if primary {
        match code {
            0 => Some("Reset Link"),
            1 => Some("Reset User Process"),
            2 => Some("Test Link"),
            3 => Some("Confirmed User Data"),
            4 => Some("Unconfirmed User Data"),
            9 => Some("Request Link Status"),
            _ => None,
        }
    } else {
        match code {
            0 => Some("ACK"),
            1 => Some("NACK"),
            11 => Some("Link Status"),
            14 => Some("Link Not Functioning"),
            15 => Some("Link Not Used"),
            _ => None,
        }
    };
    name.map(str::to_string)
        .unwrap_or_else(|| format!("Unknown ({})", code))
}

/// DNP3 data-link header: start bytes, length, control, addresses, CRC.
///
/// Addresses are little-endian on the wire.
pub struct Dnp3Decoder;

impl ProtocolDecoder for Dnp3Decoder {
    fn protocol(&self) -> &'static str {
        "dnp3"
    }

    fn min_frame_len(&self) -> usize {
        10
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("dnp3", "dnp3");
        info.product = "DNP3 Outstation".to_string();

        if data[0] != 0x05 || data[1] != 0x64 {
            info.confidence = UNMATCHED_CONFIDENCE;
            return Ok(info);
        }

        info.confidence = 95;
        info.set_field("start_bytes", "0x0564");

        let control = data[3];
        let destination = u16::from_le_bytes([data[4], data[5]]);
        let source = u16::from_le_bytes([data[6], data[7]]);
        info.set_field("length", data[2].to_string());
        info.set_field("control", format!("0x{:02x}", control));
        info.set_field("destination", destination.to_string());
        info.set_field("source", source.to_string());

        let primary = (control >> 6) & 0x01 == 1;
        let function = control & 0x0f;
        info.set_field("direction", ((control >> 7) & 0x01).to_string());
        info.set_field("primary", u8::from(primary).to_string());
        info.set_field("frame_count_bit", ((control >> 5) & 0x01).to_string());
        info.set_field("frame_count_valid", ((control >> 4) & 0x01).to_string());
        info.set_field("function_code", function.to_string());

        let received = u16::from_le_bytes([data[8], data[9]]);
        info.set_field("crc_valid", (dnp3_crc(&data[..8]) == received).to_string());

        let name = dnp3_function_name(function, primary);
        info.extra_info = format!("DNP3 {}", name);
        info.set_field("function_name", name);
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.starts_with(&[0x05, 0x64]) {
            95
        } else {
            0
        }
    }
}

fn bvlc_function_name(function: u8) -> String {
    let name = match function {
        0x00 => "BVLC-Result",
        0x01 => "Write-Broadcast-Distribution-Table",
        0x02 => "Read-Broadcast-Distribution-Table",
        0x03 => "Read-Broadcast-Distribution-Table-Ack",
        0x04 => "Forwarded-NPDU",
        0x05 => "Register-Foreign-Device",
        0x06 => "Read-Foreign-Device-Table",
        0x07 => "Read-Foreign-Device-Table-Ack",
        0x08 => "Delete-Foreign-Device-Table-Entry",
        0x09 => "Distribute-Broadcast-To-Network",
        0x0a => "Original-Unicast-NPDU",
        0x0b => "Original-Broadcast-NPDU",
        _ => return format!("Unknown (0x{:02x})", function),
    };
    name.to_string()
}

/// BACnet/IP virtual link control header plus the NPDU control octet.
pub struct BacnetDecoder;

impl ProtocolDecoder for BacnetDecoder {
    fn protocol(&self) -> &'static str {
        "bacnet"
    }

    fn min_frame_len(&self) -> usize {
        4
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("bacnet", "bacnet");
        info.product = "BACnet Device".to_string();
        info.confidence = UNMATCHED_CONFIDENCE;

        let bvlc_type = data[0];
        let function = data[1];
        info.set_field("bvlc_type", format!("0x{:02x}", bvlc_type));
        info.set_field("bvlc_function", format!("0x{:02x}", function));
        info.set_field("bvlc_length", u16::from_be_bytes([data[2], data[3]]).to_string());

        if bvlc_type == 0x81 {
            info.confidence = 90;
            info.set_field("network_type", "BACnet/IP");
            let name = bvlc_function_name(function);
            info.extra_info = format!("BACnet/IP {}", name);
            info.set_field("bvlc_function_name", name);
            parse_npdu(&data[4..], &mut info);
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() >= 4 && data[0] == 0x81 && data[1] <= 0x0b {
            90
        } else {
            0
        }
    }
}

fn parse_npdu(npdu: &[u8], info: &mut ParsedInfo) {
    if npdu.len() < 2 {
        return;
    }
    let control = npdu[1];
    info.set_field("npdu_version", npdu[0].to_string());
    info.set_field("npdu_control", format!("0x{:02x}", control));
    info.set_field("network_layer_message", ((control >> 7) & 0x01).to_string());
    info.set_field("destination_specifier", ((control >> 5) & 0x01).to_string());
    info.set_field("source_specifier", ((control >> 3) & 0x01).to_string());
    info.set_field("expecting_reply", ((control >> 2) & 0x01).to_string());
    info.set_field("network_priority", (control & 0x03).to_string());
}

/// OPC UA binary transport: 3-byte message type, chunk type, LE size.
pub struct OpcUaDecoder;

const OPCUA_MESSAGE_TYPES: [(&[u8], &str, u8); 6] = [
    (b"HEL", "Hello", 95),
    (b"ACK", "Acknowledge", 95),
    (b"ERR", "Error", 95),
    (b"MSG", "Message", 90),
    (b"OPN", "OpenSecureChannel", 90),
    (b"CLO", "CloseSecureChannel", 90),
];

impl ProtocolDecoder for OpcUaDecoder {
    fn protocol(&self) -> &'static str {
        "opcua"
    }

    fn min_frame_len(&self) -> usize {
        8
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("opcua", "opcua");
        info.product = "OPC UA Server".to_string();

        let kind = &data[..3];
        info.set_field("message_type", lossy(kind).into_owned());
        info.set_field("chunk_type", lossy(&data[3..4]).into_owned());
        if let Some(size) = le_u32(data, 4) {
            info.set_field("message_size", size.to_string());
        }

        let known = OPCUA_MESSAGE_TYPES.iter().find(|(tag, _, _)| *tag == kind);
        let name = match known {
            Some((_, name, confidence)) => {
                info.confidence = *confidence;
                *name
            }
            None => {
                info.confidence = UNMATCHED_CONFIDENCE;
                "Unknown"
            }
        };
        info.set_field("message_name", name);
        info.extra_info = format!("OPC UA {}", name);

        match kind {
            b"HEL" => parse_transport_limits(&data[8..], "", &mut info),
            b"ACK" => parse_transport_limits(&data[8..], "server_", &mut info),
            _ => {}
        }
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() < 4 {
            return 0;
        }
        let kind = &data[..3];
        if OPCUA_MESSAGE_TYPES.iter().any(|(tag, _, _)| *tag == kind) {
            95
        } else {
            0
        }
    }
}

/// Hello and Acknowledge share the five buffer-limit words; Hello adds the endpoint URL.
fn parse_transport_limits(body: &[u8], prefix: &str, info: &mut ParsedInfo) {
    if body.len() < 20 {
        return;
    }
    let names = [
        "protocol_version",
        "receive_buffer_size",
        "send_buffer_size",
        "max_message_size",
        "max_chunk_count",
    ];
    for (i, name) in names.iter().enumerate() {
        if let Some(value) = le_u32(body, i * 4) {
            info.set_field(&format!("{}{}", prefix, name), value.to_string());
        }
    }

    if prefix.is_empty() && body.len() > 24 {
        if let Some(url_len) = le_u32(body, 20) {
            let end = 24usize.saturating_add(url_len as usize);
            if let Some(url) = body.get(24..end) {
                info.set_field("endpoint_url", lossy(url).into_owned());
            }
        }
    }
}

/// Siemens S7 over ISO-on-TCP: TPKT header then a COTP PDU.
pub struct S7Decoder;

impl ProtocolDecoder for S7Decoder {
    fn protocol(&self) -> &'static str {
        "s7"
    }

    fn min_frame_len(&self) -> usize {
        4
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedInfo, DecodeError> {
        let mut info = ParsedInfo::with_service("s7", "s7");
        info.product = "Siemens S7 PLC".to_string();

        if data[0] != 0x03 || data[1] != 0x00 {
            info.confidence = UNMATCHED_CONFIDENCE;
            return Ok(info);
        }

        info.confidence = 90;
        info.set_field("tpkt_version", "3");
        info.set_field("tpkt_length", u16::from_be_bytes([data[2], data[3]]).to_string());
        parse_cotp(&data[4..], &mut info);
        info.extra_info = "Siemens S7 Communication".to_string();
        Ok(info)
    }

    fn confidence(&self, data: &[u8]) -> u8 {
        if data.len() < 4 || data[0] != 0x03 || data[1] != 0x00 {
            return 0;
        }
        match data.get(5) {
            Some(0xe0) | Some(0xd0) | Some(0xf0) => 95,
            _ => 80,
        }
    }
}

fn parse_cotp(cotp: &[u8], info: &mut ParsedInfo) {
    let Some(&length) = cotp.first() else {
        return;
    };
    info.set_field("cotp_length", length.to_string());

    let Some(&pdu_type) = cotp.get(1) else {
        return;
    };
    info.set_field("cotp_pdu_type", format!("0x{:02x}", pdu_type));
    let name = match pdu_type {
        0xe0 => "Connection Request (CR)",
        0xd0 => "Connection Confirm (CC)",
        0x80 => "Disconnect Request (DR)",
        0xc0 => "Disconnect Confirm (DC)",
        0xf0 => "Data (DT)",
        _ => "Unknown",
    };
    info.set_field("cotp_pdu_name", name);

    if pdu_type == 0xe0 || pdu_type == 0xd0 {
        info.confidence = 95;
        parse_connection_params(&cotp[2..], info);
    }
}

fn parse_connection_params(params: &[u8], info: &mut ParsedInfo) {
    let (Some(destination), Some(source)) = (be_u16(params, 0), be_u16(params, 2)) else {
        return;
    };
    info.set_field("destination_reference", destination.to_string());
    info.set_field("source_reference", source.to_string());

    if let Some(&class_option) = params.get(4) {
        info.set_field("class_option", format!("0x{:02x}", class_option));
        info.set_field("transport_class", ((class_option >> 4) & 0x0f).to_string());
    }
}
