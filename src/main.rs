use anyhow::{anyhow, Context, Result};
use clap::Parser;
use proxy_egress::{
    probe::config::{DEFAULT_CONCURRENCY, DEFAULT_DESTINATION, DEFAULT_TIMEOUT_SECS},
    ParserKind, ParserRegistry, PortScanner, ProbeConfig, ReportWriter, ScanReport,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Probe a range of proxy ports and count the distinct egress IPs behind them
#[derive(Parser)]
#[command(name = "proxy-egress")]
#[command(about = "Probe a range of proxy ports and count the distinct egress IPs behind them")]
struct Cli {
    /// Proxy address: socks5://host | http://host | https://host, optionally with %PORT%
    #[arg(long = "proxy-host")]
    proxy_host: String,

    /// First port of the range, e.g. 17000
    #[arg(long = "proxy-port-from")]
    port_from: u16,

    /// Last port of the range, e.g. 17999
    #[arg(long = "proxy-port-to")]
    port_to: u16,

    /// Checker URL every probe requests
    #[arg(long, default_value = DEFAULT_DESTINATION)]
    dest: String,

    /// Maximum number of requests in flight
    #[arg(long = "async", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Timeout per request in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Upper bound for the whole scan in seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Response parser for a custom --dest (ip-nf, soax, none)
    #[arg(long)]
    checker: Option<String>,

    /// Save results in report files
    #[arg(long)]
    reports: bool,

    /// Directory for report files
    #[arg(long, default_value = ".")]
    reports_dir: PathBuf,

    /// Print the full scan report as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ProbeConfig::new(&cli.proxy_host, &cli.dest)?
        .with_port_range(cli.port_from, cli.port_to)
        .with_concurrency(cli.concurrency)
        .with_timeout(Duration::from_secs(cli.timeout));
    if let Some(deadline) = cli.deadline {
        config = config.with_scan_deadline(Duration::from_secs(deadline));
    }

    let mut registry = ParserRegistry::with_builtin();
    if let Some(checker) = &cli.checker {
        let kind = parse_checker(checker)?;
        registry.register(config.destination.as_str(), kind.parser());
    }

    println!(
        "Starting... proxy: {} from: {} to: {}",
        cli.proxy_host, cli.port_from, cli.port_to
    );

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling scan");
            cancel_ctrlc.cancel();
        }
    });

    let scanner = PortScanner::with_registry(config, registry);
    let report = scanner
        .run_with_cancel(cancel)
        .await
        .context("Scan failed")?;

    print_summary(&report);

    if cli.reports {
        println!("Preparing reports...");
        let files = ReportWriter::new(&cli.reports_dir).write(&report)?;
        println!("Success requests saved in: {}", files.success.display());
        println!("Error requests saved in: {}", files.error.display());
        println!("Unique IPs and duplicate counts saved in: {}", files.ip.display());
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    println!("Done!");
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

fn print_summary(report: &ScanReport) {
    println!(
        "Success: {} | Error: {} | Count uniq IP: {}",
        report.success_count(),
        report.error_count(),
        report.unique_ip_count()
    );

    if !report.ip_frequencies.is_empty() {
        println!("\nEgress IPs:");
        for (ip, count) in report.ip_frequencies.sorted() {
            println!("  {} ({} ports)", ip, count);
        }
    }
}

fn parse_checker(s: &str) -> Result<ParserKind> {
    s.parse::<ParserKind>().map_err(|e| anyhow!(e))
}
