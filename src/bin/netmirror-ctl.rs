use std::fs;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use netmirror::controller::{request_interfaces, start_mirror, summarize_frame};
use netmirror::{AgentError, FilterProgram, LinkType, MirrorRequest};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "netmirror-ctl")]
#[command(about = "Controller for the netmirror packet mirroring agent")]
struct Cli {
    /// Agent control address (host:port)
    agent: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the agent's active interfaces
    Interfaces,
    /// Mirror traffic from the agent to this host
    Mirror {
        /// Interface to capture on (default: all interfaces)
        #[arg(short, long)]
        interface: Option<String>,
        /// Put the interface into promiscuous mode
        #[arg(short, long)]
        promiscuous: bool,
        /// Filter program in `tcpdump -ddd` output format
        #[arg(short, long)]
        filter: Option<PathBuf>,
        /// Local UDP port to receive frames on (0 picks a free port)
        #[arg(long, default_value_t = 0)]
        port: u16,
        /// Stop after this many frames
        #[arg(short = 'c', long)]
        count: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Interfaces => list_interfaces(&cli.agent),
        Commands::Mirror {
            interface,
            promiscuous,
            filter,
            port,
            count,
        } => mirror(&cli.agent, interface, promiscuous, filter, port, count),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            match e.downcast_ref::<AgentError>() {
                Some(agent_error) => ExitCode::from(agent_error.exit_code()),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn connect(agent: &str) -> Result<TcpStream> {
    TcpStream::connect(agent).with_context(|| format!("Failed to connect to {}", agent))
}

fn list_interfaces(agent: &str) -> Result<()> {
    let mut stream = connect(agent)?;
    let records = request_interfaces(&mut stream)?;

    for record in records {
        println!(
            "{:<16} {:<10} {}",
            record.name,
            record.link_type.to_string(),
            if record.is_promiscuous() { "promisc" } else { "" }
        );
    }
    Ok(())
}

/// Link type of the frames the agent will send for `interface`.
fn frame_link_type(agent: &str, interface: Option<&str>) -> Result<LinkType> {
    let Some(name) = interface else {
        // Captures on all interfaces arrive without a link header
        return Ok(LinkType::RawIp);
    };

    let mut stream = connect(agent)?;
    let records = request_interfaces(&mut stream)?;
    records
        .into_iter()
        .find(|record| record.name == name)
        .map(|record| record.link_type)
        .ok_or_else(|| anyhow!("Interface '{}' is not active on the agent", name))
}

fn load_filter(path: Option<PathBuf>) -> Result<FilterProgram> {
    let Some(path) = path else {
        return Ok(FilterProgram::default());
    };
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read filter {}", path.display()))?;
    FilterProgram::parse_ddd(&text).with_context(|| format!("Invalid filter {}", path.display()))
}

fn mirror(
    agent: &str,
    interface: Option<String>,
    promiscuous: bool,
    filter: Option<PathBuf>,
    port: u16,
    count: Option<u64>,
) -> Result<()> {
    let filter = load_filter(filter)?;
    let link = frame_link_type(agent, interface.as_deref())?;

    let mut control = connect(agent)?;

    // The agent replays to the address it sees us connecting from
    let local = control.local_addr()?;
    let receiver = UdpSocket::bind(SocketAddr::new(local.ip(), port))
        .with_context(|| format!("Failed to bind UDP port {}", port))?;
    receiver.set_read_timeout(Some(RECV_TIMEOUT))?;
    let port = receiver.local_addr()?.port();

    let request = MirrorRequest {
        interface,
        promiscuous,
        destination_port: port,
        filter,
    };
    start_mirror(&mut control, &request)?;
    control.set_nonblocking(true)?;
    info!("Receiving frames on port {}", port);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut received: u64 = 0;
    while running.load(Ordering::SeqCst) && count.map_or(true, |limit| received < limit) {
        match receiver.recv(&mut buf) {
            Ok(len) => {
                received += 1;
                println!("{}", summarize_frame(link, &buf[..len]));
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if agent_hung_up(&mut control) {
                    eprintln!("agent closed the session");
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to receive frame"),
        }
    }

    debug!("received {} frames", received);
    eprintln!("{} frames received", received);
    Ok(())
}

/// The agent never writes during a mirror session; EOF means it is gone.
fn agent_hung_up(control: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match control.read(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => e.kind() != ErrorKind::WouldBlock && e.kind() != ErrorKind::Interrupted,
    }
}
