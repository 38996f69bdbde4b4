//! LoRa Mesh Node - gateway daemon with HTTP read API
//!
//! This binary runs the mesh gateway with:
//! - The radio link supervisor and node report cycle
//! - TCP pushes of node status and inbound messages to the automation server
//! - The TCP command listener transmitting text to the mesh
//! - REST API serving the node registry (HTTP or HTTPS)

mod server;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use loramesh_gateway::config::DEFAULT_GREETING;
use loramesh_gateway::interface::DEFAULT_CLI_PROGRAM;
use loramesh_gateway::{CliRadio, Gateway, GatewayConfigBuilder, DEFAULT_HTTP_PORT};

/// Prefix of the rotated log files
const LOG_FILE_PREFIX: &str = "loraMesgGW.log";

/// Rotated log files kept on disk
const LOG_FILES_KEPT: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "loramesh-node")]
#[command(about = "Gateway between a Meshtastic LoRa mesh and an automation server")]
struct Args {
    /// Automation server host; the command listener binds here too
    #[arg(long, env = "LORAMESH_SERVER_HOST")]
    server_host: String,

    /// Port receiving node status snapshots
    #[arg(long, env = "LORAMESH_STATUS_PORT")]
    status_port: u16,

    /// Port receiving inbound text messages
    #[arg(long, env = "LORAMESH_MESSAGE_PORT")]
    message_port: u16,

    /// Port to listen on for text to transmit to the mesh
    #[arg(long, env = "LORAMESH_COMMAND_PORT")]
    command_port: u16,

    /// Read API port
    #[arg(long, env = "LORAMESH_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// Radio command-line tool
    #[arg(long, env = "LORAMESH_RADIO_CLI", default_value = DEFAULT_CLI_PROGRAM)]
    radio_cli: String,

    /// Network host of the radio
    #[arg(long, env = "LORAMESH_RADIO_HOST", conflicts_with = "radio_port")]
    radio_host: Option<String>,

    /// Serial device of the radio
    #[arg(long, env = "LORAMESH_RADIO_PORT")]
    radio_port: Option<String>,

    /// Write logs to daily rotated files instead of stdout
    #[arg(long, env = "LORAMESH_LOGGER")]
    logger: bool,

    /// Directory of the log files
    #[arg(long, env = "LORAMESH_LOG_DIR", default_value = "/tmp")]
    log_dir: PathBuf,

    /// Serve the read API over HTTPS
    #[arg(long, env = "LORAMESH_SECURE")]
    secure: bool,

    /// TLS certificate chain (PEM)
    #[arg(long, env = "LORAMESH_CERT", default_value = "asterisk.pem")]
    cert: PathBuf,

    /// TLS private key (PEM)
    #[arg(long, env = "LORAMESH_KEY", default_value = "ca.key")]
    key: PathBuf,

    /// Text sent to the mesh whenever the radio link comes up
    #[arg(long, env = "LORAMESH_GREETING", default_value = DEFAULT_GREETING)]
    greeting: String,

    /// Do not send a greeting on connect
    #[arg(long, env = "LORAMESH_NO_GREETING")]
    no_greeting: bool,

    /// Enable verbose logging
    #[arg(long, short, env = "LORAMESH_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&args)?;

    let config = GatewayConfigBuilder::new()
        .server_host(&args.server_host)
        .status_port(args.status_port)
        .message_port(args.message_port)
        .command_port(args.command_port)
        .greeting((!args.no_greeting).then(|| args.greeting.clone()))
        .build();

    let mut radio = CliRadio::new(&args.radio_cli);
    if let Some(host) = &args.radio_host {
        radio = radio.with_host(host);
    } else if let Some(device) = &args.radio_port {
        radio = radio.with_serial(device);
    }

    info!("Starting LoRa mesh gateway v{}", loramesh_gateway::VERSION);
    let (gateway, handle) = Gateway::new(radio, config)?;
    let mut gateway_task = tokio::spawn(gateway.run());

    let app = server::create_router(handle);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let scheme = if args.secure { "https" } else { "http" };

    info!("═══════════════════════════════════════════════════════════");
    info!("  Automation server: {}", args.server_host);
    info!("  Status push port: {}", args.status_port);
    info!("  Message push port: {}", args.message_port);
    info!("  Command port: {}", args.command_port);
    info!("  Read API: {}://{}/meshnodesinfo", scheme, addr);
    info!("═══════════════════════════════════════════════════════════");

    tokio::select! {
        result = &mut gateway_task => {
            match result {
                Ok(Ok(())) => info!("Gateway stopped"),
                Ok(Err(e)) => {
                    error!("Gateway error: {}", e);
                    return Err(e.into());
                }
                Err(e) => return Err(e).context("gateway task panicked"),
            }
        }
        result = serve(app, addr, &args) => {
            result?;
        }
    }

    Ok(())
}

/// Serve the read API until it fails
async fn serve(app: axum::Router, addr: SocketAddr, args: &Args) -> anyhow::Result<()> {
    if args.secure {
        let tls = RustlsConfig::from_pem_file(&args.cert, &args.key)
            .await
            .with_context(|| {
                format!(
                    "loading TLS material from {} and {}",
                    args.cert.display(),
                    args.key.display()
                )
            })?;
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding read API on {addr}"))?;
        axum::serve(listener, app).await?;
    }
    Ok(())
}

/// Install the global subscriber, to stdout or to rotated files
fn init_logging(args: &Args) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if !args.logger {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(None);
    }

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(LOG_FILES_KEPT)
        .build(&args.log_dir)
        .with_context(|| format!("opening log directory {}", args.log_dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 9] = [
        "loramesh-node",
        "--server-host",
        "127.0.0.1",
        "--status-port",
        "1880",
        "--message-port",
        "1881",
        "--command-port",
        "1882",
    ];

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(REQUIRED).unwrap();
        assert_eq!(args.http_port, 9000);
        assert_eq!(args.log_dir, PathBuf::from("/tmp"));
        assert_eq!(args.cert, PathBuf::from("asterisk.pem"));
        assert_eq!(args.key, PathBuf::from("ca.key"));
        assert_eq!(args.greeting, "hello mesh world");
        assert_eq!(args.radio_cli, "meshtastic");
        assert!(!args.logger);
        assert!(!args.secure);
    }

    #[test]
    fn test_ports_are_required() {
        let missing = Args::try_parse_from(&REQUIRED[..REQUIRED.len() - 2]);
        assert!(missing.is_err());
    }

    #[test]
    fn test_switches() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--logger", "--secure", "--http-port", "8443", "--radio-host", "10.0.0.9"]);
        let args = Args::try_parse_from(argv).unwrap();
        assert!(args.logger);
        assert!(args.secure);
        assert_eq!(args.http_port, 8443);
        assert_eq!(args.radio_host.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_radio_transports_conflict() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--radio-host", "10.0.0.9", "--radio-port", "/dev/ttyUSB0"]);
        assert!(Args::try_parse_from(argv).is_err());
    }
}
