use std::fs;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use probescope::cli::{Cli, OutputFormat};
use probescope::config::ProbeConfig;
use probescope::network::{expand_targets, parse_target};
use probescope::output::{format_probe_list, format_protocol_stats, OutputWriter, ProbeReport};
use probescope::probe::{ProbeCatalog, ProbeEngine, Target};

const DEFAULT_CLI_CONCURRENCY: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = build_config(&cli)?;
    if config.enable_logging {
        init_logging(cli.verbose);
    }

    let mut catalog = ProbeCatalog::load_builtins();
    if let Some(path) = &cli.probe_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read probe file {}", path.display()))?;
        let added = catalog
            .import_probes(&text)
            .with_context(|| format!("failed to import probes from {}", path.display()))?;
        info!(added, file = %path.display(), "imported probes");
    }

    let engine = ProbeEngine::with_catalog(config, catalog)?;
    let output_writer = OutputWriter::new(cli.output_format, cli.output_file.clone())?.with_verbose(cli.verbose);

    if cli.list_probes {
        return output_writer.emit(&format_probe_list(engine.catalog()));
    }
    if cli.protocol_stats {
        return output_writer.emit(&format_protocol_stats(engine.catalog(), engine.decoders()));
    }

    let targets = collect_targets(&cli)?;
    if targets.is_empty() {
        eprintln!("{}", "Error: No target specified.".red());
        eprintln!("Example: probescope 192.168.1.10:502");
        eprintln!("         probescope --host 10.0.0.0/30 -p 22,80,554");
        eprintln!("Run 'probescope --help' for more information.");
        std::process::exit(1);
    }
    debug!(targets = targets.len(), mode = %cli.probe_mode, "starting probe run");

    let spinner = match cli.output_format {
        OutputFormat::Human => Some(progress_spinner(targets.len())?),
        OutputFormat::Json => None,
    };

    let results = engine
        .probe_multiple_targets_with_mode(&targets, cli.probe_mode)
        .await;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let stats = cli.stats.then(|| engine.get_stats());
    let report = ProbeReport::new(results, stats);
    output_writer.write(&report)?;

    Ok(())
}

/// Config file first, then command line overrides.
fn build_config(cli: &Cli) -> Result<ProbeConfig> {
    let path = cli.config.clone().or_else(|| {
        ProbeConfig::default_path().filter(|path| path.exists())
    });

    let (mut config, from_file) = match path {
        Some(path) => (ProbeConfig::load(&path)?, true),
        None => (ProbeConfig::default(), false),
    };

    if let Some(secs) = cli.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    match cli.concurrent {
        Some(n) => config.max_concurrency = n,
        None if !from_file => config.max_concurrency = DEFAULT_CLI_CONCURRENCY,
        None => {}
    }
    if let Some(ms) = cli.read_timeout {
        config.read_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.connect_timeout {
        config.connect_timeout = Duration::from_millis(ms);
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "probescope=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn collect_targets(cli: &Cli) -> Result<Vec<Target>> {
    let mut targets = cli
        .target
        .iter()
        .map(|spec| parse_target(spec))
        .collect::<Result<Vec<_>>>()?;

    match (&cli.host, &cli.ports) {
        (Some(hosts), Some(ports)) => targets.extend(expand_targets(hosts, ports)?),
        (Some(_), None) => bail!("--host requires --ports"),
        (None, Some(_)) => bail!("--ports requires --host"),
        (None, None) => {}
    }

    let mut seen = std::collections::HashSet::new();
    targets.retain(|t| seen.insert(t.key()));
    Ok(targets)
}

fn progress_spinner(targets: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("⟦{spinner:.bright_magenta}⟧ [{elapsed_precise}] {msg}")?,
    );
    pb.set_message(format!("probing {} targets", targets));
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}
