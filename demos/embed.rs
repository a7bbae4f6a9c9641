//! # Embedding host
//!
//! Stands in for an instrumented process: starts the IPC server under
//! this process's pid, answers pings, executes nothing else. Point the
//! `frontend` demo at the printed pid from another terminal.
//!
//! ```bash
//! cargo run --example embed
//! cargo run --example embed -- --duration 600 --chatter 2
//! ```

use argh::FromArgs;
use std::time::Duration;
use tether::{EndpointName, MsgType, PingBody, Server, utc_timestamp};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Host process embedding a tether IPC server
#[derive(FromArgs)]
struct CliArgs {
    /// enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// seconds to keep the server alive (default: 300)
    #[argh(option)]
    duration: Option<u64>,

    /// seconds between emitted log frames, 0 to disable (default: 5)
    #[argh(option)]
    chatter: Option<u64>,

    /// write queue capacity (default: 1024)
    #[argh(option)]
    capacity: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: CliArgs = argh::from_env();

    let level = if args.debugging { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let pid = std::process::id();
    let name = EndpointName::for_pid(pid);
    let capacity = args.capacity.unwrap_or(tether::queue::DEFAULT_CAPACITY);

    let mut server = Server::start(&name, capacity, |writer, frame| {
        match frame.kind() {
            Some(MsgType::Ping) => {
                if let Ok(body) = PingBody::decode(&frame.payload) {
                    info!(serial = body.serial, "ping, answering");
                    let _ = writer.pong(body.serial, utc_timestamp());
                }
            }
            Some(MsgType::Command) => {
                info!(command = %String::from_utf8_lossy(&frame.payload), "command received");
            }
            kind => {
                info!(?kind, len = frame.payload.len(), "frame received");
            }
        }
    })?;

    info!(pid, address = %name, "embedded server up; attach a frontend");

    let duration = Duration::from_secs(args.duration.unwrap_or(300));
    let chatter = args.chatter.unwrap_or(5);
    let started = std::time::Instant::now();
    let mut beat = 0u32;

    while started.elapsed() < duration && server.is_running() {
        std::thread::sleep(Duration::from_secs(1));
        if chatter > 0 && started.elapsed().as_secs() % chatter == 0 {
            beat += 1;
            let line = format!("heartbeat {beat} from pid {pid}");
            let _ = server.write(MsgType::Log, line.as_bytes());
        }
    }

    info!("shutting down");
    server.stop();
    Ok(())
}
