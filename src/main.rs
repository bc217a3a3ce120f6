use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use watchpost::config::Config;
use watchpost::metrics;
use watchpost::monitors::capture::has_capture_privilege;
use watchpost::sink::AlertLog;
use watchpost::supervisor::MonitoringSupervisor;

#[derive(Parser, Debug)]
#[command(name = "watchpost", version)]
#[command(about = "Host and network intrusion detection: file integrity, process and packet rules")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/watchpost/config.toml")]
    config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs as JSON
    #[arg(long)]
    json: bool,

    /// Print the N most recent alerts from the alert log and exit
    #[arg(long, value_name = "N")]
    recent: Option<usize>,

    /// Metrics/health endpoint address (overrides config)
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Disable metrics/health endpoint
    #[arg(long)]
    no_metrics: bool,
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl+C")?,
            _ = term.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json {
        subscriber.json().init();
    } else {
        subscriber.with_target(false).init();
    }

    let config = Config::load(&args.config)?;

    if let Some(limit) = args.recent {
        for alert in AlertLog::recent(&config.general.alert_log, limit)? {
            println!("{}", serde_json::to_string(&alert)?);
        }
        return Ok(());
    }

    if !has_capture_privilege() {
        warn!("Not running as root: packet capture and some sensitive files will be unavailable");
    }

    info!("Config: {}", args.config.display());
    info!(
        sensitive_files = config.hids.sensitive_files.len(),
        suspicious_processes = config.hids.suspicious_processes.len(),
        whitelist_processes = config.hids.whitelist_processes.len(),
        interval_secs = config.hids.process_check_interval_secs,
        "HIDS configuration"
    );
    info!(
        suspicious_ports = ?config.nids.suspicious_ports,
        icmp = config.nids.monitor_icmp_ping,
        interface = config.network.preferred_interface().unwrap_or("auto"),
        whitelist_ips = config.network.whitelist_ips.len(),
        "NIDS configuration"
    );

    let sink = Arc::new(AlertLog::open(
        &config.general.alert_log,
        config.general.alert_log_max_bytes(),
        config.general.alert_log_backup_count,
    )?);
    info!("Alert log: {}", sink.path().display());

    let (ready_tx, ready_rx) = watch::channel(false);

    let metrics_enabled = (config.metrics.enabled || args.metrics_addr.is_some()) && !args.no_metrics;
    let metrics_addr = args.metrics_addr.unwrap_or(config.metrics.listen);
    if metrics_enabled {
        tokio::spawn(async move {
            metrics::start_server(metrics_addr, ready_rx).await;
        });
    }

    let mut supervisor = MonitoringSupervisor::new(&config, sink);
    let running = supervisor.start_all();
    if running == 0 {
        warn!("No monitors are active");
    }

    let _ = ready_tx.send(true);

    info!("watchpost running. Press Ctrl+C to stop.");
    if metrics_enabled {
        info!("Metrics available at http://{}/metrics", metrics_addr);
        info!("Health check at http://{}/health", metrics_addr);
    }

    if let Err(e) = shutdown_signal().await {
        error!("{:#}", e);
    }

    info!("Shutting down...");
    let _ = ready_tx.send(false);
    supervisor.stop_all().await;

    info!("watchpost stopped.");
    Ok(())
}
