//! # Frontend
//!
//! Connects to the server embedded in a target process, sends periodic
//! pings and prints every frame the agent emits.
//!
//! ```bash
//! cargo run --example frontend -- --pid 12345
//! cargo run --example frontend -- --pid 12345 --ping-interval 2 --command "status"
//! ```

use argh::FromArgs;

/// Frontend for a tether-instrumented process
#[derive(FromArgs)]
struct CliArgs {
    /// enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// pid of the instrumented target process
    #[argh(option, short = 'p')]
    pid: Option<u32>,

    /// endpoint suffix, overrides --pid
    #[argh(option)]
    suffix: Option<String>,

    /// seconds between pings (default: 5)
    #[argh(option)]
    ping_interval: Option<u64>,

    /// a command frame to send right after connecting
    #[argh(option)]
    command: Option<String>,
}

#[cfg(unix)]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use bytes::BytesMut;
    use std::time::Duration;
    use tether::{EndpointName, MsgType, PingBody, decode_frame, encode_frame, server_exists, utc_timestamp};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;
    use tracing::{Level, info, warn};
    use tracing_subscriber::FmtSubscriber;

    let args: CliArgs = argh::from_env();

    let level = if args.debugging { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let name = match (&args.suffix, args.pid) {
        (Some(suffix), _) => EndpointName::from_suffix(suffix.clone()),
        (None, Some(pid)) => {
            if !server_exists(pid) {
                warn!(pid, "no server detected for this pid, trying anyway");
            }
            EndpointName::for_pid(pid)
        }
        (None, None) => return Err("pass --pid or --suffix".into()),
    };

    info!(address = %name, "connecting");
    let stream = UnixStream::connect(name.address()).await?;
    let (mut reader, mut writer) = stream.into_split();

    if let Some(command) = &args.command {
        writer
            .write_all(&encode_frame(MsgType::Command, command.as_bytes())?)
            .await?;
    }

    let mut ticker =
        tokio::time::interval(Duration::from_secs(args.ping_interval.unwrap_or(5)));
    let mut buf = BytesMut::with_capacity(16 * 1024);
    let mut serial = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                serial += 1;
                let body = PingBody::new(serial, utc_timestamp());
                writer.write_all(&encode_frame(MsgType::Ping, &body.encode())?).await?;
                info!(serial, "ping sent");
            }
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    info!("agent closed the connection");
                    return Ok(());
                }
                while let Some(frame) = decode_frame(&mut buf)? {
                    print_frame(&frame);
                }
            }
        }
    }
}

#[cfg(unix)]
fn print_frame(frame: &tether::Frame) {
    use tether::{MsgType, PingBody, utc_timestamp};
    use tracing::info;

    match frame.kind() {
        Some(MsgType::Pong) => match PingBody::decode(&frame.payload) {
            Ok(body) => {
                let rtt_ms = (utc_timestamp() - body.timestamp) * 1e3;
                info!(serial = body.serial, rtt_ms = format!("{rtt_ms:.1}"), "pong");
            }
            Err(err) => info!(%err, "undecodable pong"),
        },
        Some(MsgType::Log) => {
            info!(line = %String::from_utf8_lossy(&frame.payload), "agent log");
        }
        kind => {
            info!(?kind, msg_type = frame.msg_type, len = frame.payload.len(), "frame");
        }
    }
}

#[cfg(not(unix))]
fn main() {
    let _args: CliArgs = argh::from_env();
    eprintln!("the frontend demo speaks Unix sockets only; on Windows, connect to the named pipe printed by the embed demo");
}
