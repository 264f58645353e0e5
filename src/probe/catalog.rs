use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::CatalogError;
use crate::probe::payloads;
use crate::probe::results::{Probe, Transport};

const IMPORTED_TIMEOUT: Duration = Duration::from_secs(10);
const IMPORTED_RARITY: u8 = 5;

/// Registry of probe definitions keyed by name.
///
/// Built once, then shared read-only by the engine. Listing methods return
/// probes ordered by ascending rarity, ties broken by name.
#[derive(Debug, Clone, Default)]
pub struct ProbeCatalog {
    probes: HashMap<String, Arc<Probe>>,
}

struct BuiltinProbe {
    name: &'static str,
    transport: Transport,
    payload: Vec<u8>,
    ports: &'static [u16],
    protocol: &'static str,
    description: &'static str,
    timeout_secs: u64,
    rarity: u8,
}

fn builtin_probes() -> Vec<BuiltinProbe> {
    use Transport::{Tcp, Udp};

    macro_rules! probe {
        ($name:expr, $transport:expr, $payload:expr, $ports:expr, $protocol:expr, $desc:expr, $timeout:expr, $rarity:expr) => {
            BuiltinProbe {
                name: $name,
                transport: $transport,
                payload: $payload,
                ports: $ports,
                protocol: $protocol,
                description: $desc,
                timeout_secs: $timeout,
                rarity: $rarity,
            }
        };
    }

    vec![
        probe!("NULL", Tcp, Vec::new(),
            &[21, 22, 23, 25, 53, 80, 110, 143, 443, 993, 995, 3306, 5432, 6379],
            "tcp", "TCP NULL probe - just connect", 5, 1),
        probe!("GetRequest", Tcp, b"GET / HTTP/1.0\r\n\r\n".to_vec(),
            &[80, 443, 8080, 8443, 8000, 8888], "http", "HTTP GET request", 10, 2),
        probe!("HTTPOptions", Tcp, b"OPTIONS / HTTP/1.0\r\n\r\n".to_vec(),
            &[80, 443, 8080], "http", "HTTP OPTIONS request", 10, 3),
        probe!("FTPBounce", Tcp, b"USER anonymous\r\n".to_vec(),
            &[21], "ftp", "FTP user command", 10, 4),
        probe!("SMTPOptions", Tcp, b"EHLO example.com\r\n".to_vec(),
            &[25, 465, 587], "smtp", "SMTP EHLO command", 10, 3),
        probe!("SSHVersionExchange", Tcp, Vec::new(),
            &[22], "ssh", "SSH version exchange", 5, 1),
        probe!("MySQLGreeting", Tcp, Vec::new(),
            &[3306], "mysql", "MySQL greeting message", 5, 2),
        probe!("RedisPing", Tcp, b"*1\r\n$4\r\nPING\r\n".to_vec(),
            &[6379], "redis", "Redis PING command", 5, 5),
        probe!("PostgreSQLStartup", Tcp,
            b"\x00\x00\x00\x17\x00\x03\x00\x00user\x00test\x00database\x00test\x00\x00".to_vec(),
            &[5432], "postgresql", "PostgreSQL startup message", 5, 6),
        probe!("DNSStatusRequest", Udp,
            b"\x00\x00\x10\x00\x00\x00\x00\x00\x00\x00\x00\x00".to_vec(),
            &[53], "dns", "DNS status request", 5, 3),
        probe!("SNMPv1GetRequest", Udp,
            b"\x30\x26\x02\x01\x00\x04\x06public\xa0\x19\x02\x04\x00\x00\x00\x00\x02\x01\x00\x02\x01\x00\x30\x0b\x30\x09\x06\x05\x2b\x06\x01\x02\x01\x05\x00".to_vec(),
            &[161], "snmp", "SNMP v1 GetRequest", 5, 7),
        probe!("TelnetOptions", Tcp, b"\xff\xfb\x01\xff\xfb\x03\xff\xfc\x27".to_vec(),
            &[23], "telnet", "Telnet option negotiation", 5, 4),
        probe!("POP3Capabilities", Tcp, b"CAPA\r\n".to_vec(),
            &[110, 995], "pop3", "POP3 capabilities command", 10, 4),
        probe!("IMAPCapabilities", Tcp, b"A001 CAPABILITY\r\n".to_vec(),
            &[143, 993], "imap", "IMAP capabilities command", 10, 4),
        probe!("TLSClientHello", Tcp, payloads::tls_client_hello(),
            &[443, 8443, 993, 995, 465, 587, 636, 989, 990, 992, 5061],
            "tls", "TLS Client Hello handshake", 10, 2),
        probe!("HTTPSGetRequest", Tcp, Vec::new(),
            &[443, 8443], "https", "HTTPS GET request over TLS", 15, 3),
        probe!("MQTTConnect", Tcp, payloads::mqtt_connect(),
            &[1883, 8883, 1884, 8884], "mqtt", "MQTT CONNECT packet", 10, 4),
        probe!("MQTTWebSocket", Tcp,
            b"GET /mqtt HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Protocol: mqtt\r\nSec-WebSocket-Version: 13\r\n\r\n".to_vec(),
            &[8080, 9001, 8000], "mqtt-ws", "MQTT over WebSocket", 10, 6),
        probe!("RTSPOptions", Tcp,
            b"OPTIONS rtsp://127.0.0.1/ RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: NetworkProbe/1.0\r\n\r\n".to_vec(),
            &[554, 8554, 1935, 8000, 8080], "rtsp", "RTSP OPTIONS request for IP cameras", 10, 3),
        probe!("RTSPDescribe", Tcp,
            b"DESCRIBE rtsp://127.0.0.1/ RTSP/1.0\r\nCSeq: 2\r\nUser-Agent: NetworkProbe/1.0\r\nAccept: application/sdp\r\n\r\n".to_vec(),
            &[554, 8554], "rtsp", "RTSP DESCRIBE request for stream info", 10, 4),
        probe!("ONVIFDiscovery", Udp, payloads::onvif_discovery(),
            &[3702], "onvif", "ONVIF WS-Discovery probe", 5, 5),
        probe!("ONVIFDeviceService", Tcp, payloads::onvif_device_information(),
            &[80, 8080, 8000, 8899], "onvif-http", "ONVIF Device Service request", 10, 4),
        probe!("HikvisionISAPI", Tcp,
            b"GET /ISAPI/System/deviceInfo HTTP/1.1\r\nHost: 127.0.0.1\r\nUser-Agent: NetworkProbe/1.0\r\nAuthorization: Basic YWRtaW46MTIzNDU2\r\n\r\n".to_vec(),
            &[80, 8000, 8080, 443], "hikvision", "Hikvision ISAPI device info request", 10, 5),
        probe!("DahuaLogin", Tcp, payloads::dahua_login(),
            &[37777, 37778, 80, 8000], "dahua", "Dahua camera login probe", 10, 6),
        probe!("ModbusTCP", Tcp, payloads::modbus_read_coils(),
            &[502], "modbus", "Modbus TCP read coils request", 5, 4),
        probe!("DNP3Request", Tcp, payloads::dnp3_reset_link(),
            &[20000, 19999], "dnp3", "DNP3 link layer test request", 5, 5),
        probe!("BACnetWhoIs", Udp, payloads::bacnet_who_is(),
            &[47808], "bacnet", "BACnet Who-Is broadcast request", 5, 5),
        probe!("OPCUAHello", Tcp, payloads::opcua_hello(),
            &[4840, 4843], "opcua", "OPC UA Hello message", 10, 4),
        probe!("S7CommSetup", Tcp, payloads::s7_connection_request(),
            &[102], "s7", "Siemens S7 communication setup", 5, 5),
    ]
}

impl ProbeCatalog {
    /// Empty catalog, mostly useful for tests and fully custom probe sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding every built-in probe.
    pub fn load_builtins() -> Self {
        let probes = builtin_probes()
            .into_iter()
            .map(|p| {
                let probe = Probe {
                    name: p.name.to_string(),
                    transport: p.transport,
                    payload: p.payload,
                    ports: p.ports.to_vec(),
                    protocol: p.protocol.to_string(),
                    description: p.description.to_string(),
                    timeout: Duration::from_secs(p.timeout_secs),
                    rarity: p.rarity,
                };
                (probe.name.clone(), Arc::new(probe))
            })
            .collect();
        Self { probes }
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Probe>> {
        self.probes.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Probe>> {
        self.sorted(|_| true)
    }

    pub fn by_port(&self, port: u16) -> Vec<Arc<Probe>> {
        self.sorted(|probe| probe.matches_port(port))
    }

    pub fn by_protocol(&self, protocol: &str) -> Vec<Arc<Probe>> {
        let protocol = protocol.to_ascii_lowercase();
        self.sorted(|probe| probe.protocol == protocol)
    }

    fn sorted<F: Fn(&Probe) -> bool>(&self, filter: F) -> Vec<Arc<Probe>> {
        let mut probes: Vec<Arc<Probe>> = self
            .probes
            .values()
            .filter(|probe| filter(probe))
            .cloned()
            .collect();
        probes.sort_by(|a, b| a.rarity.cmp(&b.rarity).then_with(|| a.name.cmp(&b.name)));
        probes
    }

    /// Register a TCP probe whose payload uses the escaped text form, either
    /// bare or wrapped as `q|...|`.
    pub fn add_custom(
        &mut self,
        name: &str,
        payload_spec: &str,
        ports: &[u16],
        protocol: &str,
        description: &str,
    ) -> Result<(), CatalogError> {
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(CatalogError::InvalidFormat(format!("invalid probe name {:?}", name)));
        }
        if protocol.trim().is_empty() {
            return Err(CatalogError::InvalidFormat("protocol must not be empty".to_string()));
        }
        if ports.contains(&0) {
            return Err(CatalogError::InvalidPorts("port 0 is not probeable".to_string()));
        }
        if self.probes.contains_key(name) {
            return Err(CatalogError::Duplicate(name.to_string()));
        }

        let payload = parse_payload(payload_spec)?;
        let probe = Probe {
            name: name.to_string(),
            transport: Transport::Tcp,
            payload,
            ports: ports.to_vec(),
            protocol: protocol.trim().to_ascii_lowercase(),
            description: description.to_string(),
            timeout: IMPORTED_TIMEOUT,
            rarity: IMPORTED_RARITY,
        };
        debug!(probe = %probe.name, protocol = %probe.protocol, "registered custom probe");
        self.probes.insert(probe.name.clone(), Arc::new(probe));
        Ok(())
    }

    /// Import probe definitions in `nmap-service-probes` style.
    ///
    /// `Probe` lines start a definition; `ports` and `rarity` lines apply to
    /// the preceding probe; blank lines, `#` comments and other directives are
    /// skipped. Either every probe is registered or none is.
    pub fn import_probes(&mut self, text: &str) -> Result<usize, CatalogError> {
        let mut parsed: Vec<Probe> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with("Probe ") {
                parsed.push(parse_probe_line(line)?);
                continue;
            }

            let Some(current) = parsed.last_mut() else {
                continue;
            };
            if let Some(ports) = line.strip_prefix("ports ") {
                current.ports = parse_port_list(ports)?;
            } else if let Some(rarity) = line.strip_prefix("rarity ") {
                current.rarity = rarity
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .filter(|r| (1..=9).contains(r))
                    .ok_or_else(|| CatalogError::InvalidFormat(format!("invalid rarity: {}", rarity)))?;
            }
        }

        for (index, probe) in parsed.iter().enumerate() {
            if self.probes.contains_key(&probe.name)
                || parsed[..index].iter().any(|p| p.name == probe.name)
            {
                return Err(CatalogError::Duplicate(probe.name.clone()));
            }
        }

        let count = parsed.len();
        for probe in parsed {
            debug!(probe = %probe.name, "imported probe definition");
            self.probes.insert(probe.name.clone(), Arc::new(probe));
        }
        Ok(count)
    }
}

/// Parse one `Probe <TCP|UDP> <name> [q|payload|]` line.
pub fn parse_probe_line(line: &str) -> Result<Probe, CatalogError> {
    let rest = line
        .strip_prefix("Probe ")
        .ok_or_else(|| CatalogError::NotAProbeLine(line.to_string()))?;

    let mut parts = rest.trim_start().splitn(2, char::is_whitespace);
    let transport_token = parts.next().unwrap_or_default().to_ascii_uppercase();
    let remainder = parts.next().unwrap_or_default().trim_start();
    let mut parts = remainder.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let payload_spec = parts.next().unwrap_or_default().trim();

    if transport_token.is_empty() || name.is_empty() {
        return Err(CatalogError::InvalidFormat(line.to_string()));
    }
    let transport = Transport::from_token(&transport_token)
        .ok_or_else(|| CatalogError::UnsupportedTransport(transport_token.clone()))?;

    let payload = if payload_spec.is_empty() {
        Vec::new()
    } else {
        parse_payload(payload_spec)?
    };

    Ok(Probe {
        name: name.to_string(),
        transport,
        payload,
        ports: Vec::new(),
        protocol: transport_token.to_ascii_lowercase(),
        description: format!("Nmap {} probe", name),
        timeout: IMPORTED_TIMEOUT,
        rarity: IMPORTED_RARITY,
    })
}

fn parse_payload(spec: &str) -> Result<Vec<u8>, CatalogError> {
    match spec.strip_prefix("q|") {
        Some(quoted) => {
            let content = quoted
                .strip_suffix('|')
                .ok_or_else(|| CatalogError::InvalidFormat(format!("unterminated payload: {}", spec)))?;
            unescape_payload(content)
        }
        None => unescape_payload(spec),
    }
}

/// Decode `\r \n \t \0 \\ \xHH` escapes; anything else after a backslash is rejected.
pub fn unescape_payload(text: &str) -> Result<Vec<u8>, CatalogError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let offset = i;
        let malformed = move |reason: &str| CatalogError::MalformedEscape {
            offset,
            reason: reason.to_string(),
        };
        let escape = *bytes.get(i + 1).ok_or_else(|| malformed("trailing backslash"))?;
        match escape {
            b'r' => out.push(b'\r'),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'0' => out.push(0),
            b'\\' => out.push(b'\\'),
            b'x' => {
                let digits = bytes
                    .get(i + 2..i + 4)
                    .and_then(|d| std::str::from_utf8(d).ok())
                    .ok_or_else(|| malformed("\\x needs two hex digits"))?;
                let value = u8::from_str_radix(digits, 16)
                    .map_err(|_| malformed("\\x needs two hex digits"))?;
                out.push(value);
                i += 4;
                continue;
            }
            other => return Err(malformed(&format!("unknown escape \\{}", other as char))),
        }
        i += 2;
    }

    Ok(out)
}

fn parse_port_list(spec: &str) -> Result<Vec<u16>, CatalogError> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let invalid = || CatalogError::InvalidPorts(spec.trim().to_string());
        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start.trim().parse().map_err(|_| invalid())?;
            let end: u16 = end.trim().parse().map_err(|_| invalid())?;
            if start == 0 || start > end {
                return Err(invalid());
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part.parse().map_err(|_| invalid())?;
            if port == 0 {
                return Err(invalid());
            }
            ports.push(port);
        }
    }
    Ok(ports)
}
