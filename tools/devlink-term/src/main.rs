// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // CLI code readability over pedantic

//! devlink-term - interactive terminal for device links
//!
//! Opens a serial, TCP or UDP link, prints everything received (hex and
//! text) and sends every stdin line.

use clap::{Parser, Subcommand};
use colored::*;
use devlink::{
    Connection, HeartbeatConfig, LinkConfig, Parity, SerialConfig, StopBits, TcpClientConfig,
    TcpServerConfig, UdpConfig,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stdin_lines::spawn_line_reader;

/// Interactive terminal for serial, TCP and UDP device links
#[derive(Parser, Debug)]
#[command(name = "devlink-term")]
#[command(version)]
#[command(about = "Talk to a device over serial, TCP or UDP")]
struct Args {
    #[command(subcommand)]
    link: LinkArgs,

    /// Parse stdin lines as hex bytes ("AA 55 0x01") instead of text
    #[arg(long, global = true)]
    hex: bool,

    /// Line ending appended to text lines: none, lf, crlf
    #[arg(long, default_value = "lf", global = true)]
    eol: LineEnding,

    /// Print link statistics on exit
    #[arg(long, global = true)]
    stats: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum LinkArgs {
    /// Serial port
    Serial {
        /// Port name (/dev/ttyUSB0, COM3)
        port: String,

        #[arg(short, long, default_value = "9600")]
        baud: u32,

        /// Parity: none, odd, even
        #[arg(long, default_value = "none")]
        parity: ParityArg,

        #[arg(long, default_value = "8")]
        data_bits: u8,

        /// Stop bits: 1 or 2
        #[arg(long, default_value = "1")]
        stop_bits: u8,
    },
    /// TCP client with automatic reconnection
    TcpClient {
        /// Remote endpoint (host:port)
        remote: String,

        /// Local port to bind (0 = any)
        #[arg(long, default_value = "0")]
        local_port: u16,

        /// Wait between reconnect attempts, in milliseconds
        #[arg(long, default_value = "3000")]
        reconnect_ms: u64,

        /// Heartbeat payload as hex; enables the heartbeat
        #[arg(long)]
        heartbeat: Option<String>,

        /// Heartbeat interval, in milliseconds
        #[arg(long, default_value = "1000")]
        heartbeat_ms: u64,
    },
    /// TCP server broadcasting to every client
    TcpServer {
        /// Listen port
        port: u16,

        /// Listen address
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
    },
    /// UDP socket paired with one remote endpoint
    Udp {
        /// Remote endpoint (host:port); 255.255.255.255:port hears everyone
        remote: String,

        #[arg(long, default_value = "0")]
        local_port: u16,
    },
    /// Link described by a TOML file
    Config {
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug)]
struct ParityArg(Parity);

impl std::str::FromStr for ParityArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(ParityArg(Parity::None)),
            "odd" | "o" => Ok(ParityArg(Parity::Odd)),
            "even" | "e" => Ok(ParityArg(Parity::Even)),
            _ => Err(format!("Unknown parity: {}", s)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum LineEnding {
    None,
    Lf,
    CrLf,
}

impl LineEnding {
    fn bytes(self) -> &'static [u8] {
        match self {
            LineEnding::None => b"",
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

impl std::str::FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(LineEnding::None),
            "lf" => Ok(LineEnding::Lf),
            "crlf" => Ok(LineEnding::CrLf),
            _ => Err(format!("Unknown line ending: {}", s)),
        }
    }
}

fn main() {
    // RUST_LOG=debug shows reconnect attempts and socket events
    env_logger::init();

    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn link_config(link: &LinkArgs) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    let config = match link {
        LinkArgs::Serial {
            port,
            baud,
            parity,
            data_bits,
            stop_bits,
        } => {
            let stop_bits = match stop_bits {
                1 => StopBits::One,
                2 => StopBits::Two,
                other => return Err(format!("stop bits must be 1 or 2, got {}", other).into()),
            };
            let mut config = SerialConfig::new(port.clone(), *baud)
                .with_parity(parity.0)
                .with_stop_bits(stop_bits);
            config.data_bits = *data_bits;
            LinkConfig::Serial(config)
        }
        LinkArgs::TcpClient {
            remote,
            local_port,
            reconnect_ms,
            heartbeat,
            heartbeat_ms,
        } => {
            let mut config = TcpClientConfig::new(remote.clone())
                .with_local_port(*local_port)
                .with_reconnect_interval(Duration::from_millis(*reconnect_ms));
            if let Some(payload) = heartbeat {
                config.heartbeat = HeartbeatConfig {
                    enabled: true,
                    payload: parse_hex(payload)?,
                    interval: Duration::from_millis(*heartbeat_ms),
                };
            }
            LinkConfig::TcpClient(config)
        }
        LinkArgs::TcpServer { port, bind } => {
            LinkConfig::TcpServer(TcpServerConfig::new(*port).with_listen_address(*bind))
        }
        LinkArgs::Udp { remote, local_port } => {
            LinkConfig::Udp(UdpConfig::new(remote.clone(), *local_port))
        }
        LinkArgs::Config { file } => LinkConfig::from_file(file)?,
    };
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = link_config(&args.link)?;
    let kind = config.kind();
    let link: Arc<dyn Connection> = Arc::from(config.build());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    link.on_status_changed(Box::new(|connected| {
        if connected {
            eprintln!("{} {}", "***".green().bold(), "connected".green());
        } else {
            eprintln!("{} {}", "***".yellow().bold(), "disconnected".yellow());
        }
    }));
    link.on_data_received(Box::new(|sender: &str, bytes: &[u8]| {
        print_received(sender, bytes);
    }));

    eprintln!(
        "{} {} {} {}",
        ">>>".green().bold(),
        "Opening".bold(),
        kind.cyan(),
        link.address().cyan()
    );
    if !link.open() {
        return Err(format!("failed to open {} link (RUST_LOG=warn for details)", kind).into());
    }
    eprintln!("{}", "Type lines to send, Ctrl+C to quit".dimmed());

    let lines = spawn_line_reader()?;
    while running.load(Ordering::SeqCst) {
        let line = match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            // stdin closed
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        };

        let payload = if args.hex {
            match parse_hex(&line) {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("{}: {}", "Warning".yellow(), e);
                    continue;
                }
            }
        } else {
            let mut bytes = line.into_bytes();
            bytes.extend_from_slice(args.eol.bytes());
            bytes
        };

        if !link.send(&payload) {
            eprintln!(
                "{}: not sent ({} bytes, link {})",
                "Warning".yellow(),
                payload.len(),
                link.state()
            );
        }
    }

    link.close();
    if args.stats {
        let stats = link.stats();
        eprintln!();
        eprintln!("{}", "--- link statistics ---".dimmed());
        eprintln!("  sent:        {} msgs, {} bytes", stats.messages_sent, stats.bytes_sent);
        eprintln!(
            "  received:    {} msgs, {} bytes",
            stats.messages_received, stats.bytes_received
        );
        eprintln!("  send errors: {}", stats.send_failures);
        eprintln!("  connects:    {}/{}", stats.connections_established, stats.connect_attempts);
        eprintln!("  sessions:    {}", stats.sessions_accepted);
        eprintln!("  uptime:      {:.1}s", stats.uptime_secs);
    }
    Ok(())
}

fn print_received(sender: &str, bytes: &[u8]) {
    println!(
        "{} {} ({} bytes)",
        "<<<".blue().bold(),
        sender.cyan(),
        bytes.len()
    );
    for chunk in bytes.chunks(16) {
        println!("  {:<48} |{}|", format_hex(chunk), printable(chunk));
    }
}

/// Parse "AA 55", "aa55", "0xAA,0x55" into bytes.
///
/// A single-digit token ("A") is one byte; longer tokens need an even
/// number of digits.
fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for token in input.split(|c: char| c.is_whitespace() || c == ',' || c == ':') {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() {
            continue;
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("invalid hex '{}' in '{}'", token, input));
        }
        if digits.len() == 1 {
            bytes.push(hex_value(digits.as_bytes()[0]));
            continue;
        }
        if digits.len() % 2 != 0 {
            return Err(format!("odd number of hex digits in '{}'", token));
        }
        bytes.extend(
            digits
                .as_bytes()
                .chunks(2)
                .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1])),
        );
    }
    Ok(bytes)
}

/// Value of one ASCII hex digit (already checked).
fn hex_value(digit: u8) -> u8 {
    char::from(digit).to_digit(16).unwrap_or(0) as u8
}

fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
        .collect()
}

mod stdin_lines {
    use crossbeam::channel::{self, Receiver};
    use std::io::{self, BufRead};
    use std::thread;

    /// Read stdin lines on a background thread.
    ///
    /// The thread stays blocked in `read_line` at exit; the process ends
    /// around it.
    pub fn spawn_line_reader() -> io::Result<Receiver<String>> {
        let (tx, rx) = channel::unbounded();
        thread::Builder::new()
            .name("devlink-term-stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_formats() {
        assert_eq!(parse_hex("AA 55").unwrap(), vec![0xAA, 0x55]);
        assert_eq!(parse_hex("aa55").unwrap(), vec![0xAA, 0x55]);
        assert_eq!(parse_hex("0xAA,0x55").unwrap(), vec![0xAA, 0x55]);
        assert_eq!(parse_hex("de:ad:be:ef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex("1 2 f").unwrap(), vec![0x01, 0x02, 0x0F]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_parse_hex_errors() {
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("0x123").is_err());
        assert!(parse_hex("€").is_err());
        assert!(parse_hex("a€").is_err());
        assert!(parse_hex("AA 5é").is_err());
    }

    #[test]
    fn test_rendering() {
        assert_eq!(format_hex(&[0x00, 0x7f, 0xff]), "00 7f ff");
        assert_eq!(printable(b"ok\r\n"), "ok..");
    }

    #[test]
    fn test_link_config_from_args() {
        let args = Args::parse_from([
            "devlink-term",
            "tcp-client",
            "127.0.0.1:502",
            "--heartbeat",
            "AA55",
        ]);
        let LinkConfig::TcpClient(config) = link_config(&args.link).unwrap() else {
            panic!("expected a TCP client");
        };
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.payload, vec![0xAA, 0x55]);

        let args = Args::parse_from(["devlink-term", "serial", "/dev/ttyS0", "--stop-bits", "3"]);
        assert!(link_config(&args.link).is_err());

        let args = Args::parse_from(["devlink-term", "--hex", "udp", "127.0.0.1:7000"]);
        assert!(args.hex);
        assert_eq!(link_config(&args.link).unwrap().kind(), "udp");
    }
}
