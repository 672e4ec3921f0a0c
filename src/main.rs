//! netmirror agent.
//!
//! Serves one control-channel session per connection. Launched by inetd the
//! session is the TCP socket on stdin; under an ssh tunnel or any other
//! stdio pair it reads stdin and writes stdout, which is enough to list
//! interfaces but not to mirror (there is no peer address to replay to).
//! With `--listen` it accepts sessions one after another.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use netmirror::channel::is_socket;
use netmirror::error::exit;
use netmirror::signal::Wake;
use netmirror::{
    AgentConfig, ControlChannel, Dispatcher, SessionOutcome, ShutdownSignal, StdioChannel,
    SystemInterfaces,
};

#[derive(Parser)]
#[command(name = "netmirror")]
#[command(about = "Remote packet mirroring agent")]
struct Args {
    /// Accept sessions on this address instead of serving the socket on stdin
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Config file (default: $NETMIRROR_CONFIG or /etc/netmirror.conf)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bound on each wait for traffic, in milliseconds (0 waits forever)
    #[arg(long)]
    wait_timeout_ms: Option<u64>,

    /// Turn promiscuous mode off again when a session that enabled it ends
    #[arg(long)]
    restore_promiscuous: bool,
}

fn load_config(args: &Args) -> Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from(path),
        None => AgentConfig::load(),
    }
    .context("Failed to load configuration")?;

    if args.listen.is_some() {
        config.listen = args.listen;
    }
    if let Some(ms) = args.wait_timeout_ms {
        config.set("wait_timeout_ms", &ms.to_string())?;
    }
    if args.restore_promiscuous {
        config.restore_promiscuous = true;
    }
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(exit::CONFIG);
        }
    };

    // stdout may be the control channel, so logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let shutdown = match ShutdownSignal::new() {
        Ok(signal) => Arc::new(signal),
        Err(e) => {
            error!("eventfd: {}", e);
            return ExitCode::from(exit::OSERR);
        }
    };
    let s = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        s.trigger();
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    let interfaces = match SystemInterfaces::new() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            error!("socket: {}", e);
            return ExitCode::from(exit::OSERR);
        }
    };

    let mut mirror = config.mirror_options();
    mirror.shutdown = Some(shutdown.clone());
    let dispatcher = Dispatcher::new(&interfaces, config.capture_options(), mirror);

    let code = match config.listen {
        Some(addr) => match run_listener(addr, &dispatcher, &shutdown) {
            Ok(()) => exit::OK,
            Err(e) => {
                error!("{:#}", e);
                exit::OSERR
            }
        },
        None => match serve_stdio(&dispatcher) {
            Ok(code) => code,
            Err(e) => {
                error!("stdin: {}", e);
                exit::OSERR
            }
        },
    };
    ExitCode::from(code)
}

/// Serve the session on stdin/stdout. inetd hands over a connected socket,
/// anything else is treated as a plain descriptor pair.
fn serve_stdio(dispatcher: &Dispatcher<'_>) -> io::Result<u8> {
    let stdin = io::stdin();
    if is_socket(stdin.as_fd())? {
        let mut stream = TcpStream::from(stdin.as_fd().try_clone_to_owned()?);
        Ok(serve_session(dispatcher, &mut stream))
    } else {
        let mut channel = StdioChannel::from_stdio()?;
        Ok(serve_session(dispatcher, &mut channel))
    }
}

/// Serve one session and return its exit code.
fn serve_session<C: ControlChannel>(dispatcher: &Dispatcher<'_>, channel: &mut C) -> u8 {
    match dispatcher.serve(channel) {
        Ok(SessionOutcome::InterfacesListed(count)) => {
            info!("Session done: listed {} interfaces", count);
            exit::OK
        }
        Ok(SessionOutcome::Mirrored(stats)) => {
            info!(
                "Session done: mirrored {} frames, dropped {}",
                stats.frames_forwarded, stats.frames_dropped
            );
            exit::OK
        }
        Err(e) => {
            error!("Session failed: {}", e);
            e.exit_code()
        }
    }
}

/// Accept and serve sessions one at a time until a shutdown signal arrives.
fn run_listener(
    addr: SocketAddr,
    dispatcher: &Dispatcher<'_>,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    let listener =
        TcpListener::bind(addr).with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    loop {
        match shutdown.wait_readable(listener.as_fd()) {
            Ok(Wake::Ready) => {}
            Ok(Wake::Shutdown) => break,
            Err(e) => return Err(e).context("poll on listener failed"),
        }

        let (mut stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("accept failed"),
        };

        info!("Session from {}", peer);
        let code = serve_session(dispatcher, &mut stream);
        info!("Session from {} ended with status {}", peer, code);
    }

    info!("Listener stopped");
    Ok(())
}
