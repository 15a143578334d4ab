//! linklayertool CLI
//!
//! Link-layer test harness: transmits synthetic IEEE 802.3 / 802.11 / raw
//! frames on an interface at a fixed cadence, or receives and decodes the
//! frames arriving on it.

mod config;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use linklayer_core::FrameKind;
use tracing::error;
use tracing_subscriber::EnvFilter;

use config::{Config, ConfigError, Mode, SessionConfig};

/// linklayertool - raw link-layer frame transmitter and receiver
#[derive(Parser, Debug)]
#[command(name = "linklayertool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transmit one test frame every DELAY_MS milliseconds (1..=1000)
    #[arg(short, long, value_name = "DELAY_MS", conflicts_with = "rx")]
    tx: Option<u64>,

    /// Receive and decode frames
    #[arg(short, long)]
    rx: bool,

    /// Link SAP / ethertype, decimal or 0x-prefixed hex
    #[arg(short, long, value_name = "SAP", value_parser = parse_sap)]
    lsap: Option<u32>,

    /// Interface name
    #[arg(short, long = "if", value_name = "NAME")]
    interface: Option<String>,

    /// Frame kind: ieee8023, ieee80211 or raw
    #[arg(short, long, value_name = "KIND")]
    frame: Option<FrameKind>,

    /// Exchange frames through PACKET_MMAP rings
    #[arg(long)]
    ring: bool,

    /// Slots per ring, a power of two
    #[arg(long, value_name = "FRAMES", requires = "ring")]
    ring_frames: Option<u32>,

    /// Payload bytes per transmitted frame (default 10, at least 14 for raw)
    #[arg(long, value_name = "BYTES")]
    payload_len: Option<usize>,
}

impl Cli {
    fn overrides(&self) -> Config {
        let mode = match (self.tx, self.rx) {
            (Some(_), _) => Some(Mode::Transmit),
            (None, true) => Some(Mode::Receive),
            (None, false) => None,
        };
        Config {
            mode,
            tx_delay_ms: self.tx,
            link_sap: self.lsap,
            interface: self.interface.clone(),
            frame: self.frame,
            ring: self.ring.then_some(true),
            ring_frames: self.ring_frames,
            payload_len: self.payload_len,
        }
    }

    fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let file = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        file.overlay(self.overrides()).validate()
    }
}

fn parse_sap(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid SAP {s:?}: {e}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.session_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };
    config.log();

    match session::run(&config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tx_and_rx_conflict() {
        let parsed = Cli::try_parse_from(["linklayertool", "-t", "100", "-r"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_flags_map_to_config() {
        let cli = Cli::try_parse_from([
            "linklayertool",
            "--tx",
            "250",
            "--lsap",
            "0x88B5",
            "--if",
            "eth0",
            "--frame",
            "ieee80211",
            "--ring",
            "--ring-frames",
            "16",
        ])
        .unwrap();
        let session = cli.session_config().unwrap();
        assert_eq!(session.link_sap, 0x88B5);
        assert_eq!(session.interface, "eth0");
        assert_eq!(session.frame_kind, FrameKind::Ieee80211);
        assert_eq!(session.ring_frames, Some(16));
        assert_eq!(session.tx_delay.as_millis(), 250);
    }

    #[test]
    fn test_ring_frames_requires_ring() {
        let parsed = Cli::try_parse_from(["linklayertool", "-r", "--ring-frames", "16"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_parse_sap() {
        assert_eq!(parse_sap("2048"), Ok(2048));
        assert_eq!(parse_sap("0x0800"), Ok(2048));
        assert!(parse_sap("zz").is_err());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"receive\"\nlink_sap = 1\ninterface = \"eth1\"\nframe = \"raw\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from(["linklayertool", "-c", &path, "-i", "eth9"]).unwrap();
        let session = cli.session_config().unwrap();
        assert_eq!(session.interface, "eth9");
        assert_eq!(session.frame_kind, FrameKind::Raw);
    }
}
