//! Wire payload builders for the built-in probes.
//!
//! Every length, size and checksum is computed from the parts it covers, so
//! the frames stay self-consistent when a field changes.

/// Largest value representable in the four-byte MQTT remaining length.
pub const MQTT_MAX_REMAINING_LENGTH: u32 = 268_435_455;

const ONVIF_MESSAGE_ID: &str = "12345678-1234-5678-9012-123456789012";

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn push_u24(buf: &mut Vec<u8>, value: usize) {
    buf.extend_from_slice(&[(value >> 16) as u8, (value >> 8) as u8, value as u8]);
}

fn push_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Encode `value` as an MQTT base-128 varint.
///
/// Values above [`MQTT_MAX_REMAINING_LENGTH`] are clamped to it.
pub fn encode_remaining_length(value: u32) -> Vec<u8> {
    let mut value = value.min(MQTT_MAX_REMAINING_LENGTH);
    let mut encoded = Vec::with_capacity(4);
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        encoded.push(byte);
        if value == 0 {
            break;
        }
    }
    encoded
}

/// Decode an MQTT remaining length, returning `(value, bytes_consumed)`.
///
/// Returns `None` for truncated input or a continuation bit on the fourth byte.
pub fn decode_remaining_length(data: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    let mut multiplier: u32 = 1;

    for (index, &byte) in data.iter().enumerate().take(4) {
        value += u32::from(byte & 0x7f) * multiplier;
        if byte & 0x80 == 0 {
            return Some((value, index + 1));
        }
        multiplier *= 128;
    }
    None
}

/// CRC-16/DNP over `data`, as transmitted (caller appends it little-endian).
pub fn dnp3_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA6BC;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

fn tls_extension(ext_type: u16, body: &[u8]) -> Vec<u8> {
    let mut ext = Vec::with_capacity(body.len() + 4);
    push_u16(&mut ext, ext_type);
    push_u16(&mut ext, body.len() as u16);
    ext.extend_from_slice(body);
    ext
}

fn u16_list(values: &[u16]) -> Vec<u8> {
    let mut list = Vec::with_capacity(values.len() * 2 + 2);
    push_u16(&mut list, (values.len() * 2) as u16);
    for &value in values {
        push_u16(&mut list, value);
    }
    list
}

/// TLS 1.2 ClientHello wrapped in a TLS 1.0 record header.
pub fn tls_client_hello() -> Vec<u8> {
    const CIPHER_SUITES: [u16; 16] = [
        0xc02c, 0xc030, 0x009f, 0xcca9, 0xcca8, 0xccaa, 0xc02b, 0xc02f,
        0x009e, 0xc024, 0xc028, 0x006b, 0xc023, 0xc027, 0x0067, 0xc00a,
    ];
    const GROUPS: [u16; 3] = [0x001d, 0x0017, 0x0018];
    const SIGNATURE_ALGORITHMS: [u16; 15] = [
        0x0601, 0x0602, 0x0603, 0x0501, 0x0502, 0x0503, 0x0401, 0x0402,
        0x0403, 0x0301, 0x0302, 0x0303, 0x0201, 0x0202, 0x0203,
    ];
    let host = b"localhost";

    let mut sni = Vec::new();
    push_u16(&mut sni, (host.len() + 3) as u16);
    sni.push(0x00);
    push_u16(&mut sni, host.len() as u16);
    sni.extend_from_slice(host);

    let mut extensions = Vec::new();
    extensions.extend(tls_extension(0x0000, &sni));
    extensions.extend(tls_extension(0x000a, &u16_list(&GROUPS)));
    extensions.extend(tls_extension(0x000b, &[0x01, 0x00]));
    extensions.extend(tls_extension(0x000d, &u16_list(&SIGNATURE_ALGORITHMS)));

    let mut hello = Vec::new();
    push_u16(&mut hello, 0x0303);
    hello.extend_from_slice(&[0x63, 0x82, 0x0a, 0x1c]);
    hello.extend(1u8..=0x1c);
    hello.push(0x00);
    hello.extend(u16_list(&CIPHER_SUITES));
    hello.extend_from_slice(&[0x01, 0x00]);
    push_u16(&mut hello, extensions.len() as u16);
    hello.extend(extensions);

    let mut handshake = vec![0x01];
    push_u24(&mut handshake, hello.len());
    handshake.extend(hello);

    let mut record = vec![0x16];
    push_u16(&mut record, 0x0301);
    push_u16(&mut record, handshake.len() as u16);
    record.extend(handshake);
    record
}

/// MQTT 3.1.1 CONNECT with a clean session and a fixed client id.
pub fn mqtt_connect() -> Vec<u8> {
    let client_id = b"probe_client";

    let mut body = Vec::new();
    push_u16(&mut body, 4);
    body.extend_from_slice(b"MQTT");
    body.push(0x04);
    body.push(0x02);
    push_u16(&mut body, 60);
    push_u16(&mut body, client_id.len() as u16);
    body.extend_from_slice(client_id);

    let mut packet = vec![0x10];
    packet.extend(encode_remaining_length(body.len() as u32));
    packet.extend(body);
    packet
}

/// Modbus TCP read coils 0..16 for unit 1.
pub fn modbus_read_coils() -> Vec<u8> {
    let pdu = [0x01, 0x00, 0x00, 0x00, 0x10];
    let unit_id = 0x01;

    let mut packet = Vec::new();
    push_u16(&mut packet, 1);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, (pdu.len() + 1) as u16);
    packet.push(unit_id);
    packet.extend_from_slice(&pdu);
    packet
}

/// DNP3 link-layer Reset Link from master 1 to outstation 0, with header CRC.
pub fn dnp3_reset_link() -> Vec<u8> {
    let destination: u16 = 0;
    let source: u16 = 1;

    let mut header = vec![0x05, 0x64, 0x05, 0x44];
    header.extend_from_slice(&destination.to_le_bytes());
    header.extend_from_slice(&source.to_le_bytes());
    let crc = dnp3_crc(&header);
    header.extend_from_slice(&crc.to_le_bytes());
    header
}

/// BACnet/IP Original-Unicast-NPDU carrying Who-Is over the full instance range.
pub fn bacnet_who_is() -> Vec<u8> {
    let npdu_apdu = [0x01, 0x00, 0x10, 0x08, 0x09, 0x00, 0x09, 0xff];

    let mut packet = vec![0x81, 0x0a];
    push_u16(&mut packet, (npdu_apdu.len() + 4) as u16);
    packet.extend_from_slice(&npdu_apdu);
    packet
}

/// OPC UA binary Hello (all integers little-endian).
pub fn opcua_hello() -> Vec<u8> {
    let endpoint = b"opc.tcp://localhost:4840";

    let mut body = Vec::new();
    push_u32_le(&mut body, 0);
    push_u32_le(&mut body, 32768);
    push_u32_le(&mut body, 32768);
    push_u32_le(&mut body, 0);
    push_u32_le(&mut body, 0);
    push_u32_le(&mut body, endpoint.len() as u32);
    body.extend_from_slice(endpoint);

    let mut packet = b"HELF".to_vec();
    push_u32_le(&mut packet, (body.len() + 8) as u32);
    packet.extend(body);
    packet
}

/// TPKT + COTP Connection Request used to open an S7 session.
pub fn s7_connection_request() -> Vec<u8> {
    let cotp = [
        0xe0, 0x00, 0x00, 0x00, 0x01, 0x00,
        0xc1, 0x02, 0x01, 0x00,
        0xc2, 0x02, 0x01, 0x02,
        0xc0, 0x01, 0x0a,
    ];

    let mut packet = vec![0x03, 0x00];
    push_u16(&mut packet, (cotp.len() + 5) as u16);
    packet.push(cotp.len() as u8);
    packet.extend_from_slice(&cotp);
    packet
}

/// Dahua private-protocol login request with default credentials.
pub fn dahua_login() -> Vec<u8> {
    fn padded(value: &[u8]) -> [u8; 32] {
        let mut field = [0u8; 32];
        field[..value.len()].copy_from_slice(value);
        field
    }

    let mut packet = vec![0xa0, 0x00, 0x00, 0x60];
    push_u32_le(&mut packet, 0x01);
    packet.extend_from_slice(&[0u8; 8]);
    packet.extend_from_slice(&padded(b"admin"));
    packet.extend_from_slice(&padded(b"admin"));
    packet.extend_from_slice(&[0u8; 8]);
    packet
}

/// WS-Discovery Probe for NetworkVideoTransmitter devices.
pub fn onvif_discovery() -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:tns="http://schemas.xmlsoap.org/ws/2005/04/discovery">
    <soap:Header>
        <wsa:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</wsa:Action>
        <wsa:MessageID>urn:uuid:{}</wsa:MessageID>
        <wsa:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</wsa:To>
    </soap:Header>
    <soap:Body>
        <tns:Probe>
            <tns:Types>dn:NetworkVideoTransmitter</tns:Types>
        </tns:Probe>
    </soap:Body>
</soap:Envelope>"#,
        ONVIF_MESSAGE_ID
    )
    .into_bytes()
}

/// HTTP POST of GetDeviceInformation to the ONVIF device service.
pub fn onvif_device_information() -> Vec<u8> {
    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
    <soap:Header/>
    <soap:Body>
        <tds:GetDeviceInformation/>
    </soap:Body>
</soap:Envelope>"#;

    format!(
        "POST /onvif/device_service HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Content-Type: application/soap+xml; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         SOAPAction: \"http://www.onvif.org/ver10/device/wsdl/GetDeviceInformation\"\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
    .into_bytes()
}
