//! Man-in-the-middle SSH transport proxy: terminates the client-facing and
//! server-facing transport handshakes independently and forwards decoded
//! packets between them once both are open.

mod forward;
mod registry;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cluelessh_keys::private::PlaintextPrivateKey;
use cluelessh_transport::server::ServerConfig;
use eyre::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::forward::ForwardSpec;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Man-in-the-middle SSH transport proxy.
#[derive(Parser)]
#[command(name = "sshproxy")]
struct Cli {
    /// Raise the log level by one notch per occurrence (info -> debug -> trace).
    #[arg(short = 'd', action = clap::ArgAction::Count)]
    debug: u8,

    /// Stay in the foreground. The proxy never daemonizes itself; accepted
    /// for command-line compatibility and threaded through as a config bit.
    #[arg(short = 'f')]
    foreground: bool,

    /// `[laddr:]lport:saddr:sport` forward specification.
    #[arg(short = 'L')]
    forward: String,

    /// PEM host key this proxy presents to the real client.
    #[arg(short = 'S')]
    client_facing_host_key: PathBuf,

    /// PEM host key this proxy presents to the upstream server.
    #[arg(short = 'C')]
    server_facing_host_key: PathBuf,
}

struct ProxyConfig {
    forward: ForwardSpec,
    client_facing_host_key: PlaintextPrivateKey,
    server_facing_host_key: PlaintextPrivateKey,
    #[allow(dead_code)]
    foreground: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let forward = ForwardSpec::parse(&cli.forward)?;
    let client_facing_host_key = load_host_key(&cli.client_facing_host_key)?;
    let server_facing_host_key = load_host_key(&cli.server_facing_host_key)?;

    let config = ProxyConfig {
        forward,
        client_facing_host_key,
        server_facing_host_key,
        foreground: cli.foreground,
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(run(config))
}

async fn run(config: ProxyConfig) -> Result<()> {
    let listen_addr = config.forward.listen_addr()?;
    let connect_addr = config.forward.connect_addr()?;

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding listen address {listen_addr}"))?;
    info!(%listen_addr, %connect_addr, "sshproxy listening");

    let registry = Arc::new(SessionRegistry::new());
    let client_facing_host_key = Arc::new(config.client_facing_host_key);
    let server_facing_host_key = Arc::new(config.server_facing_host_key);

    loop {
        let (client_stream, peer_addr) = listener.accept().await.context("accepting connection")?;
        info!(%peer_addr, "accepted connection");

        let registry = Arc::clone(&registry);
        let client_facing_host_key = Arc::clone(&client_facing_host_key);
        let server_facing_host_key = Arc::clone(&server_facing_host_key);

        tokio::spawn(async move {
            if let Err(err) = handle_connection(
                client_stream,
                connect_addr,
                registry,
                client_facing_host_key,
                server_facing_host_key,
            )
            .await
            {
                error!(%peer_addr, %err, "session ended with error");
            }
        });
    }
}

async fn handle_connection(
    client_stream: TcpStream,
    connect_addr: std::net::SocketAddr,
    registry: Arc<SessionRegistry>,
    client_facing_host_key: Arc<PlaintextPrivateKey>,
    server_facing_host_key: Arc<PlaintextPrivateKey>,
) -> Result<()> {
    let server_stream = TcpStream::connect(connect_addr)
        .await
        .with_context(|| format!("connecting to upstream {connect_addr}"))?;

    let mut session = Session::new(
        &registry,
        client_stream,
        server_stream,
        ServerConfig { host_key: (*client_facing_host_key).clone() },
        ServerConfig { host_key: (*server_facing_host_key).clone() },
    );
    session.pump().await;
    session.close(&registry);
    Ok(())
}

fn load_host_key(path: &PathBuf) -> Result<PlaintextPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("reading host key file {}", path.display()))?;
    PlaintextPrivateKey::from_pem_pkcs8_or_sec1(&pem)
        .map_err(|err| eyre::eyre!("parsing host key file {}: {err}", path.display()))
}
