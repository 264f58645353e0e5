use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};

use crate::cli::OutputFormat;
use crate::probe::{DecoderBank, ProbeCatalog, ProbeResult, ProbeStats};

/// Everything one CLI run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Results per `host:port`, sorted by key.
    pub results: BTreeMap<String, Vec<ProbeResult>>,
    pub timestamp: DateTime<Utc>,
    pub summary: ReportSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProbeStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_targets: usize,
    pub total_probes: usize,
    pub success_probes: usize,
    pub success_rate: f64,
}

impl ProbeReport {
    pub fn new(results: HashMap<String, Vec<ProbeResult>>, stats: Option<ProbeStats>) -> Self {
        let total_probes = results.values().map(Vec::len).sum();
        let success_probes = results
            .values()
            .flat_map(|r| r.iter())
            .filter(|r| r.success)
            .count();
        let success_rate = if total_probes == 0 {
            0.0
        } else {
            success_probes as f64 / total_probes as f64 * 100.0
        };

        let results: BTreeMap<_, _> = results
            .into_iter()
            .map(|(key, mut list)| {
                list.sort_by(|a, b| b.confidence().cmp(&a.confidence()).then_with(|| a.probe_name.cmp(&b.probe_name)));
                (key, list)
            })
            .collect();

        Self {
            summary: ReportSummary {
                total_targets: results.len(),
                total_probes,
                success_probes,
                success_rate,
            },
            results,
            timestamp: Utc::now(),
            stats,
        }
    }
}

pub struct OutputWriter {
    format: OutputFormat,
    file: Option<PathBuf>,
    verbose: bool,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, file: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            format,
            file,
            verbose: false,
        })
    }

    /// Also show failed probes, decoded fields and raw hex in human output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn write(&self, report: &ProbeReport) -> Result<()> {
        let output = self.render(report)?;
        self.emit(&output)
    }

    pub fn render(&self, report: &ProbeReport) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_human(report)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        }
    }

    /// Writes to the configured file, or stdout when none was given.
    pub fn emit(&self, output: &str) -> Result<()> {
        match &self.file {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("failed to create output file {}", path.display()))?;
                let mut writer = BufWriter::new(file);
                writer.write_all(output.as_bytes())?;
                writer.flush()?;
            }
            None => {
                print!("{}", output);
                io::stdout().flush()?;
            }
        }
        Ok(())
    }

    fn format_human(&self, report: &ProbeReport) -> String {
        let mut output = String::new();

        output.push_str(&format!("\n{}\n\n", "PROBING COMPLETE".truecolor(0, 255, 65).bold()));
        output.push_str(&format!(
            "{} {} {} {} {}\n\n",
            "⟦".truecolor(64, 64, 64),
            format!("{} targets", report.summary.total_targets).truecolor(191, 64, 191).bold(),
            "•".truecolor(0, 255, 65),
            format!("{} probes", report.summary.total_probes).truecolor(191, 64, 191).bold(),
            "⟧".truecolor(64, 64, 64)
        ));

        let mut identified = 0;
        for (key, results) in &report.results {
            let answered: Vec<_> = results.iter().filter(|r| r.success).collect();
            if answered.is_empty() && !self.verbose {
                continue;
            }
            if !answered.is_empty() {
                identified += 1;
            }

            output.push_str(&format!(
                "{} {} {} {}\n",
                "▶".truecolor(0, 255, 65).bold(),
                key.truecolor(255, 255, 255).bold(),
                "•".truecolor(64, 64, 64),
                format!("{}/{} probes answered", answered.len(), results.len()).truecolor(0, 212, 255).bold()
            ));

            for result in results {
                if result.success {
                    self.push_success(&mut output, result);
                } else if self.verbose {
                    output.push_str(&format!(
                        "  {} {} {}\n",
                        "○".truecolor(128, 128, 128),
                        result.probe_name.truecolor(128, 128, 128),
                        result.error.as_deref().unwrap_or("no response").truecolor(128, 128, 128)
                    ));
                }
            }
            output.push('\n');
        }

        if identified == 0 {
            output.push_str(&format!(
                "{} {}\n",
                "⚠".truecolor(255, 140, 0).bold(),
                "No target answered any probe".truecolor(128, 128, 128)
            ));
        } else {
            output.push_str(&format!(
                "{} {} {} {} {}\n",
                "⚡".truecolor(0, 255, 65).bold(),
                "Probing complete:".truecolor(0, 255, 65).bold(),
                format!("{} responsive targets", identified).truecolor(255, 255, 255).bold(),
                "•".truecolor(64, 64, 64),
                format!("{:.1}% success", report.summary.success_rate).truecolor(255, 255, 255).bold()
            ));
        }

        if let Some(stats) = &report.stats {
            output.push('\n');
            output.push_str(&format_stats(stats));
        }

        output
    }

    fn push_success(&self, output: &mut String, result: &ProbeResult) {
        output.push_str(&format!(
            "  {} {} {} {} {}\n",
            "●".truecolor(0, 255, 65),
            result.probe_name.truecolor(255, 255, 255).bold(),
            result.protocol.truecolor(255, 140, 0),
            confidence_badge(result.confidence()),
            format!("({}ms)", result.duration.as_millis()).truecolor(0, 212, 255)
        ));
        if !result.banner.is_empty() {
            output.push_str(&format!("    {}\n", result.banner.truecolor(128, 128, 128)));
        }
        if let Some(error) = &result.error {
            output.push_str(&format!("    {}\n", error.truecolor(255, 140, 0)));
        }

        if self.verbose {
            if let Some(info) = &result.parsed_info {
                for (name, value) in &info.fields {
                    output.push_str(&format!(
                        "    {} {}\n",
                        format!("{}:", name).truecolor(64, 64, 64),
                        value.truecolor(128, 128, 128)
                    ));
                }
            }
            output.push_str(&format!(
                "    {} {}\n",
                "hex:".truecolor(64, 64, 64),
                result.response_hex.truecolor(64, 64, 64)
            ));
        }
    }
}

fn confidence_badge(confidence: u8) -> ColoredString {
    let text = format!("{}%", confidence);
    match confidence {
        90..=u8::MAX => text.truecolor(0, 255, 65).bold(),
        50..=89 => text.truecolor(255, 140, 0),
        _ => text.truecolor(128, 128, 128),
    }
}

fn format_stats(stats: &ProbeStats) -> String {
    let mut output = format!("{}\n", "STATISTICS".truecolor(191, 64, 191).bold());
    output.push_str(&format!(
        "  total {} • success {} • failed {} • rate {:.1}%\n",
        stats.total_probes,
        stats.success_probes,
        stats.failed_probes,
        stats.success_rate()
    ));
    output.push_str(&format!(
        "  avg {}ms • total {}ms\n",
        stats.avg_duration.as_millis(),
        stats.total_duration.as_millis()
    ));
    for (protocol, count) in &stats.protocol_counts {
        output.push_str(&format!("  {:<12} {}\n", protocol, count));
    }
    output
}

/// Catalog listing for `--list-probes`.
pub fn format_probe_list(catalog: &ProbeCatalog) -> String {
    let mut output = format!(
        "{} {}\n\n",
        "AVAILABLE PROBES".truecolor(0, 255, 65).bold(),
        format!("({})", catalog.len()).truecolor(128, 128, 128)
    );

    for probe in catalog.all() {
        let ports = probe
            .ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let ports = if ports.is_empty() { "-".to_string() } else { ports };
        output.push_str(&format!(
            "  {:<20} {:<4} {:<11} r{} {}\n",
            probe.name.truecolor(255, 255, 255).bold(),
            probe.transport.to_string(),
            probe.protocol.truecolor(255, 140, 0),
            probe.rarity,
            ports.truecolor(0, 212, 255)
        ));
        output.push_str(&format!("  {}\n", probe.description.truecolor(128, 128, 128)));
    }
    output
}

/// Decoder coverage for `--protocol-stats`: each decoded protocol and how
/// many catalog probes feed it.
pub fn format_protocol_stats(catalog: &ProbeCatalog, decoders: &DecoderBank) -> String {
    let mut output = format!(
        "{} {}\n\n",
        "SUPPORTED PROTOCOLS".truecolor(0, 255, 65).bold(),
        format!("({} decoders, {} probes)", decoders.len(), catalog.len()).truecolor(128, 128, 128)
    );

    for protocol in decoders.protocols() {
        let probes = catalog.by_protocol(protocol);
        let names = probes.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ");
        output.push_str(&format!(
            "  {:<12} {:>2} {}\n",
            protocol.truecolor(255, 140, 0).bold(),
            probes.len(),
            names.truecolor(128, 128, 128)
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{Probe, Target, Transport};
    use std::time::Duration;

    fn result(name: &str, success: bool) -> ProbeResult {
        let probe = Probe {
            name: name.to_string(),
            transport: Transport::Tcp,
            payload: Vec::new(),
            ports: vec![22],
            protocol: "ssh".to_string(),
            description: String::new(),
            timeout: Duration::from_secs(5),
            rarity: 1,
        };
        let mut result = ProbeResult::failed(&Target::new("10.0.0.1", 22), &probe, Duration::from_millis(3), "refused".to_string());
        if success {
            result.success = true;
            result.error = None;
            result.banner = "SSH-2.0 | OpenSSH".to_string();
        }
        result
    }

    fn report() -> ProbeReport {
        let mut results = HashMap::new();
        results.insert("10.0.0.1:22".to_string(), vec![result("NULL", false), result("SSHVersionExchange", true)]);
        results.insert("10.0.0.2:22".to_string(), vec![result("NULL", false)]);
        ProbeReport::new(results, None)
    }

    #[test]
    fn test_summary_counts() {
        let report = report();
        assert_eq!(report.summary.total_targets, 2);
        assert_eq!(report.summary.total_probes, 3);
        assert_eq!(report.summary.success_probes, 1);
        assert!((report.summary.success_rate - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_json_shape() {
        let writer = OutputWriter::new(OutputFormat::Json, None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&writer.render(&report()).unwrap()).unwrap();

        assert!(json["results"]["10.0.0.1:22"].is_array());
        assert_eq!(json["summary"]["total_probes"], 3);
        assert!(json.get("stats").is_none());
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_human_hides_failures_unless_verbose() {
        colored::control::set_override(false);
        let quiet = OutputWriter::new(OutputFormat::Human, None).unwrap().render(&report()).unwrap();
        assert!(quiet.contains("SSH-2.0 | OpenSSH"));
        assert!(!quiet.contains("10.0.0.2:22"));

        let verbose = OutputWriter::new(OutputFormat::Human, None)
            .unwrap()
            .with_verbose(true)
            .render(&report())
            .unwrap();
        assert!(verbose.contains("10.0.0.2:22"));
        assert!(verbose.contains("refused"));
    }

    #[test]
    fn test_probe_listing_names_every_probe() {
        colored::control::set_override(false);
        let catalog = ProbeCatalog::load_builtins();
        let listing = format_probe_list(&catalog);
        for probe in catalog.all() {
            assert!(listing.contains(&probe.name));
        }
    }
}
