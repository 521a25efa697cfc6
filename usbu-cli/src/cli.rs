//! Command line definitions

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use usbu_model::{parse_usb_id, IdentityTag};
use usbu_sync::{ExchangeOptions, ReadMode, ResolveQuery, ServiceConfig};

/// Snapshot attached USB/BLE devices and resolve them to live serial ports
#[derive(Parser, Debug)]
#[command(name = "usbu", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/usbu/config.json)
    #[arg(long, global = true, env = "USBU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Snapshot store to read and write
    #[arg(long, global = true, env = "USBU_STORE")]
    pub store: Option<PathBuf>,

    /// Skip the BLE backend
    #[arg(long, global = true)]
    pub no_ble: bool,

    /// BLE advertisement listen window
    #[arg(long, global = true, value_name = "MS")]
    pub ble_timeout_ms: Option<u64>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan all backends and store the result
    Scan,

    /// Show the stored snapshots
    List,

    /// Look up stored snapshots by identity
    Find(FindArgs),

    /// Resolve an identity to its current serial port
    Resolve(ResolveArgs),

    /// List live serial ports
    Ports,

    /// Show each stored unit with an identity and its current port
    Connections(TargetArgs),

    /// Check whether a device is attached right now (exit 1 if not)
    IsConnected(TargetArgs),

    /// Resolve a device and exchange a command with it
    Send(SendArgs),
}

/// Durable device identity
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Vendor ID in hex (`0x1234` or `1234`)
    #[arg(value_parser = parse_id)]
    pub vendor_id: u16,

    /// Product ID in hex
    #[arg(value_parser = parse_id)]
    pub product_id: u16,

    /// Serial number
    #[arg(long, short = 's')]
    pub serial: Option<String>,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Show every match, not just the first
    #[arg(long, short = 'a')]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Identity tag selecting one of several identical units
    #[arg(long, short = 't')]
    pub tag: Option<String>,

    /// Scan (and store) before resolving
    #[arg(long, short = 'r')]
    pub refresh: bool,
}

impl ResolveArgs {
    pub fn query(&self) -> ResolveQuery {
        let mut query = ResolveQuery::new(self.target.vendor_id, self.target.product_id)
            .refreshed(self.refresh);
        if let Some(serial) = &self.target.serial {
            query = query.with_serial(serial.clone());
        }
        if let Some(tag) = &self.tag {
            query = query.with_identity_tag(IdentityTag::from_raw(tag.clone()));
        }
        query
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub resolve: ResolveArgs,

    /// Bytes to send (text, or hex digits with --hex)
    pub payload: String,

    /// Treat the payload as hex and print the reply as hex
    #[arg(long)]
    pub hex: bool,

    /// Terminate the payload with a newline
    #[arg(long, short = 'n')]
    pub newline: bool,

    #[arg(long, short = 'b', default_value_t = 9600)]
    pub baud: u32,

    /// Bound on the whole exchange
    #[arg(long, default_value_t = 2000, value_name = "MS")]
    pub timeout_ms: u64,

    /// Pause after opening the port
    #[arg(long, default_value_t = 50, value_name = "MS")]
    pub settle_ms: u64,

    /// Read exactly this many reply bytes
    #[arg(long, conflicts_with = "until")]
    pub read_bytes: Option<usize>,

    /// Read until this delimiter (`\n` and `\r` escapes allowed)
    #[arg(long)]
    pub until: Option<String>,
}

impl SendArgs {
    pub fn payload_bytes(&self) -> Result<Vec<u8>, String> {
        if self.hex {
            decode_hex(&self.payload)
        } else {
            Ok(self.payload.as_bytes().to_vec())
        }
    }

    pub fn exchange_options(&self) -> ExchangeOptions {
        let read = match (&self.read_bytes, &self.until) {
            (Some(n), _) => ReadMode::Bytes(*n),
            (None, Some(delim)) => ReadMode::Until(unescape(delim).into_bytes()),
            (None, None) => ReadMode::Nothing,
        };
        ExchangeOptions {
            baud_rate: self.baud,
            timeout: Duration::from_millis(self.timeout_ms),
            read,
            append_newline: self.newline,
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

impl Cli {
    /// The loaded config with command line overrides applied
    pub fn service_config(&self) -> ServiceConfig {
        let base = match &self.config {
            Some(path) => ServiceConfig::load_from(path),
            None => ServiceConfig::load(),
        };
        self.apply_overrides(base)
    }

    pub fn apply_overrides(&self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(store) = &self.store {
            config.snapshot_path = store.clone();
        }
        if self.no_ble {
            config.ble.enabled = false;
        }
        if let Some(ms) = self.ble_timeout_ms {
            config.ble.timeout_ms = ms;
        }
        config
    }
}

fn parse_id(text: &str) -> Result<u16, String> {
    parse_usb_id(text).map_err(|e| e.to_string())
}

fn unescape(text: &str) -> String {
    text.replace("\\r", "\r").replace("\\n", "\n")
}

/// Decode hex digits, ignoring whitespace
pub fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", text));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).map_err(|_| format!("invalid hex byte {:?}", byte))
        })
        .collect()
}
