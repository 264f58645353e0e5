use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::ProbeMode;
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::probe::banner;
use crate::probe::catalog::ProbeCatalog;
use crate::probe::decoders::DecoderBank;
use crate::probe::results::{Probe, ProbeResult, Target, Transport};
use crate::probe::stats::{InFlightGauge, ProbeStats, StatsCollector};

/// Probes kept by `ProbeMode::Smart`.
pub const SMART_PROBE_LIMIT: usize = 10;

/// Fallback probe used when a selection comes up empty.
pub const NULL_PROBE: &str = "NULL";

/// Runs catalog probes against targets and decodes what comes back.
///
/// Cloning is cheap and every clone shares the same catalog, decoders,
/// statistics and concurrency limiter, so a batch spread over many tasks is
/// still capped at `max_concurrency` simultaneous exchanges.
#[derive(Clone)]
pub struct ProbeEngine {
    config: Arc<ProbeConfig>,
    catalog: Arc<ProbeCatalog>,
    decoders: Arc<DecoderBank>,
    stats: Arc<StatsCollector>,
    limiter: Arc<Semaphore>,
    in_flight: Arc<InFlightGauge>,
}

impl ProbeEngine {
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        Self::with_catalog(config, ProbeCatalog::load_builtins())
    }

    pub fn with_catalog(config: ProbeConfig, catalog: ProbeCatalog) -> Result<Self, ProbeError> {
        config.validate()?;
        let limiter = Arc::new(Semaphore::new(config.max_concurrency));
        Ok(Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            decoders: Arc::new(DecoderBank::with_builtins()),
            stats: Arc::new(StatsCollector::new()),
            limiter,
            in_flight: Arc::new(InFlightGauge::default()),
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ProbeCatalog {
        &self.catalog
    }

    pub fn decoders(&self) -> &DecoderBank {
        &self.decoders
    }

    pub fn get_stats(&self) -> ProbeStats {
        self.stats.snapshot()
    }

    /// Highest number of exchanges that held a slot at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    /// Probes to run against `port` under `mode`, never empty while the
    /// catalog holds a NULL probe.
    pub fn select_probes(&self, port: u16, mode: ProbeMode) -> Vec<Arc<Probe>> {
        let mut probes = match mode {
            ProbeMode::Port => self.catalog.by_port(port),
            ProbeMode::All => {
                let mut selected = self.catalog.by_port(port);
                let mut seen: HashSet<String> = selected.iter().map(|p| p.name.clone()).collect();
                for probe in self.catalog.all() {
                    if seen.insert(probe.name.clone()) {
                        selected.push(probe);
                    }
                }
                selected
            }
            ProbeMode::Smart => self
                .catalog
                .all()
                .into_iter()
                .take(SMART_PROBE_LIMIT)
                .collect(),
        };

        if probes.is_empty() {
            if let Some(null) = self.catalog.get(NULL_PROBE) {
                probes.push(null);
            }
        }
        probes
    }

    pub async fn probe_target(&self, target: &Target) -> Vec<ProbeResult> {
        self.probe_target_with_mode(target, ProbeMode::All).await
    }

    /// Runs every selected probe concurrently. Results arrive in completion
    /// order, so correlate them by `probe_name`.
    pub async fn probe_target_with_mode(&self, target: &Target, mode: ProbeMode) -> Vec<ProbeResult> {
        let probes = self.select_probes(target.port, mode);
        debug!(target = %target, mode = %mode, probes = probes.len(), "probing target");

        let mut tasks = FuturesUnordered::new();
        for probe in probes {
            let engine = self.clone();
            let target = target.clone();
            let fallback = probe.clone();
            let handle = tokio::spawn(async move { engine.execute_probe(&target, &probe).await });
            tasks.push(async move { (fallback, handle.await) });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some((probe, joined)) = tasks.next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(target = %target, probe = %probe.name, error = %e, "probe task aborted");
                    let result = ProbeResult::failed(target, &probe, Duration::ZERO, format!("probe task failed: {}", e));
                    self.stats.record(&result);
                    results.push(result);
                }
            }
        }
        results
    }

    pub async fn probe_multiple_targets(&self, targets: &[Target]) -> HashMap<String, Vec<ProbeResult>> {
        self.probe_multiple_targets_with_mode(targets, ProbeMode::All).await
    }

    /// Fans out over `targets`; the result map is keyed by `host:port`.
    pub async fn probe_multiple_targets_with_mode(
        &self,
        targets: &[Target],
        mode: ProbeMode,
    ) -> HashMap<String, Vec<ProbeResult>> {
        let started = Instant::now();
        let mut tasks = FuturesUnordered::new();
        for target in targets {
            let engine = self.clone();
            let target = target.clone();
            tasks.push(tokio::spawn(async move {
                let results = engine.probe_target_with_mode(&target, mode).await;
                (target.key(), results)
            }));
        }

        let mut results = HashMap::with_capacity(targets.len());
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((key, target_results)) => {
                    results.insert(key, target_results);
                }
                Err(e) => warn!(error = %e, "target task aborted"),
            }
        }

        info!(
            targets = targets.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );
        results
    }

    /// Probes `target` in `all` mode unless `cancel` fires or the configured
    /// overall timeout elapses first.
    ///
    /// Work already started is abandoned rather than aborted; each exchange
    /// still ends within its own probe timeout.
    pub async fn probe_with_context(
        &self,
        cancel: &CancellationToken,
        target: &Target,
    ) -> Result<Vec<ProbeResult>, ProbeError> {
        let deadline = self.config.timeout;
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target = %target, "probing cancelled");
                Err(ProbeError::Cancelled)
            }
            outcome = timeout(deadline, self.probe_target(target)) => {
                outcome.map_err(|_| ProbeError::Timeout(deadline.as_millis() as u64))
            }
        }
    }

    /// One exchange: take a slot, connect, write, read once, decode.
    ///
    /// Never fails; transport problems are reported in `ProbeResult::error`.
    pub async fn execute_probe(&self, target: &Target, probe: &Probe) -> ProbeResult {
        let started_at = Utc::now();

        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let result = ProbeResult {
                    timestamp: started_at,
                    ..ProbeResult::failed(target, probe, Duration::ZERO, ProbeError::LimiterClosed.to_string())
                };
                self.stats.record(&result);
                return result;
            }
        };

        let start = Instant::now();
        let outcome = {
            let _slot = self.in_flight.enter();
            self.exchange_within_deadline(target, probe).await
        };
        let duration = start.elapsed();

        if !self.config.probe_delay.is_zero() {
            sleep(self.config.probe_delay).await;
        }
        drop(permit);

        let result = match outcome {
            Ok(response) => self.build_result(target, probe, response, duration),
            Err(e) => {
                debug!(target = %target, probe = %probe.name, error = %e, "probe failed");
                ProbeResult::failed(target, probe, duration, e.to_string())
            }
        };
        let result = ProbeResult {
            timestamp: started_at,
            ..result
        };

        self.stats.record(&result);
        result
    }

    async fn exchange_within_deadline(&self, target: &Target, probe: &Probe) -> Result<Vec<u8>, ProbeError> {
        let exchange = async {
            match probe.transport {
                Transport::Tcp => self.exchange_tcp(target, &probe.payload).await,
                Transport::Udp => self.exchange_udp(target, &probe.payload).await,
            }
        };

        match timeout(probe.timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::ProbeDeadline {
                probe: probe.name.clone(),
                secs: probe.timeout.as_secs(),
            }),
        }
    }

    async fn exchange_tcp(&self, target: &Target, payload: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let connect = TcpStream::connect((target.host.as_str(), target.port));
        let mut stream = match timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProbeError::Connect(e)),
            Err(_) => return Err(ProbeError::ConnectTimeout(millis(self.config.connect_timeout))),
        };

        if !payload.is_empty() {
            stream.write_all(payload).await.map_err(ProbeError::Write)?;
        }

        let mut buffer = vec![0u8; self.config.max_response_size];
        let read = match timeout(self.config.read_timeout, stream.read(&mut buffer)).await {
            Ok(Ok(0)) => return Err(ProbeError::EmptyResponse),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ProbeError::Read(e)),
            Err(_) => return Err(ProbeError::ReadTimeout(millis(self.config.read_timeout))),
        };
        buffer.truncate(read);
        Ok(buffer)
    }

    async fn exchange_udp(&self, target: &Target, payload: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let resolve = lookup_host((target.host.as_str(), target.port));
        let addr = match timeout(self.config.connect_timeout, resolve).await {
            Ok(Ok(mut addrs)) => addrs.next().ok_or_else(|| ProbeError::Resolve {
                target: target.key(),
                reason: "no addresses returned".to_string(),
            })?,
            Ok(Err(e)) => {
                debug!(target = %target, error = %e, "address resolution failed");
                return Err(ProbeError::Resolve {
                    target: target.key(),
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(ProbeError::ConnectTimeout(millis(self.config.connect_timeout))),
        };

        let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await.map_err(ProbeError::Connect)?;
        socket.connect(addr).await.map_err(ProbeError::Connect)?;

        if !payload.is_empty() {
            socket.send(payload).await.map_err(ProbeError::Write)?;
        }

        let mut buffer = vec![0u8; self.config.max_response_size];
        let read = match timeout(self.config.read_timeout, socket.recv(&mut buffer)).await {
            Ok(Ok(0)) => return Err(ProbeError::EmptyResponse),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ProbeError::Read(e)),
            Err(_) => return Err(ProbeError::ReadTimeout(millis(self.config.read_timeout))),
        };
        buffer.truncate(read);
        Ok(buffer)
    }

    fn build_result(&self, target: &Target, probe: &Probe, response: Vec<u8>, duration: Duration) -> ProbeResult {
        let (parsed_info, error) = match self.decoders.get(&probe.protocol) {
            Some(decoder) => match decoder.decode(&response) {
                Ok(info) => (Some(info), None),
                Err(e) => {
                    warn!(target = %target, probe = %probe.name, error = %e, "undecodable response");
                    (None, Some(format!("decode error: {}", e)))
                }
            },
            None => (None, None),
        };

        let banner = banner::render(&probe.protocol, &response, parsed_info.as_ref());
        debug!(
            target = %target,
            probe = %probe.name,
            bytes = response.len(),
            confidence = parsed_info.as_ref().map_or(0, |info| info.confidence),
            "probe answered"
        );

        ProbeResult {
            target: target.key(),
            port: target.port,
            probe_name: probe.name.clone(),
            protocol: probe.protocol.clone(),
            success: true,
            response_hex: hex::encode(&response),
            response,
            banner,
            parsed_info,
            duration,
            error,
            timestamp: Utc::now(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl std::fmt::Debug for ProbeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeEngine")
            .field("config", &self.config)
            .field("probes", &self.catalog.len())
            .field("decoders", &self.decoders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ProbeEngine {
        ProbeEngine::new(ProbeConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ProbeConfig {
            max_concurrency: 0,
            ..ProbeConfig::default()
        };
        assert!(matches!(ProbeEngine::new(config), Err(ProbeError::InvalidConfig(_))));
    }

    #[test]
    fn test_port_mode_falls_back_to_null() {
        let probes = engine().select_probes(9, ProbeMode::Port);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].name, NULL_PROBE);
    }

    #[test]
    fn test_port_mode_uses_port_probes() {
        let probes = engine().select_probes(502, ProbeMode::Port);
        assert!(probes.iter().any(|p| p.name == "ModbusTCP"));
        assert!(probes.iter().all(|p| p.matches_port(502)));
    }

    #[test]
    fn test_all_mode_puts_port_probes_first_without_duplicates() {
        let engine = engine();
        let probes = engine.select_probes(22, ProbeMode::All);
        assert_eq!(probes.len(), engine.catalog().len());
        assert!(probes[0].matches_port(22));

        let names: HashSet<&str> = probes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names.len(), probes.len());
    }

    #[test]
    fn test_smart_mode_is_capped_and_rarity_ordered() {
        let probes = engine().select_probes(80, ProbeMode::Smart);
        assert_eq!(probes.len(), SMART_PROBE_LIMIT);
        assert!(probes.windows(2).all(|w| w[0].rarity <= w[1].rarity));
    }

    #[test]
    fn test_empty_catalog_selects_nothing() {
        let engine = ProbeEngine::with_catalog(ProbeConfig::default(), ProbeCatalog::new()).unwrap();
        assert!(engine.select_probes(80, ProbeMode::All).is_empty());
    }

    #[tokio::test]
    async fn test_resolver_failure_keeps_cause() {
        let engine = engine();
        let dns = engine.catalog().get("DNSStatusRequest").unwrap();
        let result = engine.execute_probe(&Target::new("bad\0host", 53), &dns).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("address resolution failed for"), "{}", error);
        let (_, reason) = error.rsplit_once(": ").unwrap();
        assert!(!reason.is_empty());
    }

    #[tokio::test]
    async fn test_refused_connection_is_recorded() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = engine();
        let probe = engine.catalog().get(NULL_PROBE).unwrap();
        let result = engine.execute_probe(&Target::new("127.0.0.1", port), &probe).await;

        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(result.parsed_info.is_none());
        assert_eq!(result.target, format!("127.0.0.1:{}", port));

        let stats = engine.get_stats();
        assert_eq!(stats.total_probes, 1);
        assert_eq!(stats.failed_probes, 1);
    }
}
