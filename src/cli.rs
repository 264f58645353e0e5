use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "probescope")]
#[command(author = "ProbeScope")]
#[command(version = "0.1.0")]
#[command(about = "Protocol probing and service fingerprinting engine", long_about = None)]
pub struct Cli {
    #[arg(help = "Targets as host:port. Can be specified multiple times.")]
    pub target: Vec<String>,

    #[arg(long, help = "Target hosts: IP, hostname, IP range (IP1-IP2) or CIDR, comma separated")]
    pub host: Option<String>,

    #[arg(short, long, help = "Ports for --host: -p22,80,443 or -p500-510")]
    pub ports: Option<String>,

    #[arg(short = 'm', long, value_enum, default_value = "all", help = "Probe selection mode")]
    pub probe_mode: ProbeMode,

    #[arg(short, long, help = "Overall per-target deadline in seconds (default: 10)")]
    pub timeout: Option<u64>,

    #[arg(short = 'c', long, help = "Maximum simultaneous network operations (default: 10)")]
    pub concurrent: Option<usize>,

    #[arg(long, help = "Read timeout in milliseconds")]
    pub read_timeout: Option<u64>,

    #[arg(long, help = "Connect timeout in milliseconds")]
    pub connect_timeout: Option<u64>,

    #[arg(short = 'o', long, value_enum, default_value = "human", help = "Output format")]
    pub output_format: OutputFormat,

    #[arg(short = 'f', long, help = "Output file path")]
    pub output_file: Option<PathBuf>,

    #[arg(long, help = "JSON config file (default: <config dir>/probescope/config.json)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "File with extra probe definitions (Probe <TCP|UDP> <name> q|payload|)")]
    pub probe_file: Option<PathBuf>,

    #[arg(long, help = "List available probes and exit")]
    pub list_probes: bool,

    #[arg(long, help = "Show probing statistics")]
    pub stats: bool,

    #[arg(long, help = "Show supported protocol decoders and probe counts, then exit")]
    pub protocol_stats: bool,

    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(short, long, help = "Enable verbose output (failed probes, fields, raw hex, debug logs)")]
    pub verbose: bool,
}

/// Probe selection policy for a target.
#[derive(Debug, Clone, Copy, ValueEnum, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    #[value(name = "port", help = "Only probes registered for the target port (fast)")]
    Port,
    #[default]
    #[value(name = "all", help = "Port probes first, then every other probe (thorough)")]
    All,
    #[value(name = "smart", help = "The ten most common probes")]
    Smart,
}

impl std::fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeMode::Port => write!(f, "port"),
            ProbeMode::All => write!(f, "all"),
            ProbeMode::Smart => write!(f, "smart"),
        }
    }
}

impl FromStr for ProbeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "port" => Ok(ProbeMode::Port),
            "all" => Ok(ProbeMode::All),
            "smart" => Ok(ProbeMode::Smart),
            other => Err(format!("unknown probe mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputFormat {
    #[value(name = "human", help = "Human-readable output")]
    Human,
    #[value(name = "json", help = "JSON output")]
    Json,
}
