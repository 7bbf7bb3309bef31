//! `le-autoconnect` command line client.
//!
//! Scans for an unconfigured device, connects to the first one found, writes
//! the configured value and reports progress as response lines on stdout.
//! Diagnostics go to stderr; set `RUST_LOG` or pass `-v` for more.

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use le_autoconnect::config::{OwnAddressType, ScanFilterPolicy, ScanType, DEFAULT_WRITE_VALUE};
use le_autoconnect::{
    DiscoveryProcedure, Outcome, Result, ScanConfig, SecurityLevel, SessionConfig, WriteTarget,
};

#[derive(Parser, Debug)]
#[command(name = "le-autoconnect")]
#[command(about = "Find an unconfigured BLE device, connect and write one characteristic")]
#[command(version)]
struct Cli {
    /// HCI adapter index (hciN)
    #[arg(short = 'i', long, default_value_t = 0)]
    adapter: u16,

    /// Scan passively, without scan requests
    #[arg(long)]
    passive: bool,

    /// Scan with a random own address
    #[arg(long)]
    privacy: bool,

    /// Only report advertisers in the controller whitelist
    #[arg(long)]
    whitelist: bool,

    /// Discovery procedure: g (general) or l (limited)
    #[arg(long, value_enum)]
    discovery: Option<Discovery>,

    /// Report duplicate advertisements
    #[arg(long)]
    duplicates: bool,

    /// Link security level: low, medium or high
    #[arg(long, default_value = "low")]
    sec_level: SecurityLevel,

    /// Requested ATT MTU (0 for the transport default)
    #[arg(long, default_value_t = 0)]
    mtu: u16,

    /// Keep serving the peer after the write completes
    #[arg(long)]
    listen: bool,

    /// Handle to write, decimal or 0x-prefixed hex
    #[arg(long, default_value = "0x0017", value_parser = parse_handle)]
    handle: u16,

    /// Value to write, as hex
    #[arg(long, default_value = DEFAULT_WRITE_VALUE)]
    value: String,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Discovery {
    /// General discovery
    #[value(name = "g")]
    General,
    /// Limited discovery
    #[value(name = "l")]
    Limited,
}

impl Cli {
    fn scan_config(&self) -> ScanConfig {
        let procedure = match self.discovery {
            Some(Discovery::General) => DiscoveryProcedure::General,
            Some(Discovery::Limited) => DiscoveryProcedure::Limited,
            None => DiscoveryProcedure::None,
        };

        ScanConfig {
            scan_type: if self.passive {
                ScanType::Passive
            } else {
                ScanType::Active
            },
            own_address_type: if self.privacy {
                OwnAddressType::Random
            } else {
                OwnAddressType::Public
            },
            filter_policy: if self.whitelist {
                ScanFilterPolicy::WhitelistOnly
            } else {
                ScanFilterPolicy::AcceptAll
            },
            filter_duplicates: !self.duplicates,
            ..ScanConfig::default()
        }
        .with_discovery(procedure)
    }

    fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            security: self.sec_level,
            mtu: self.mtu,
            listen: self.listen,
            write: WriteTarget::from_hex(self.handle, &self.value)?,
            ..SessionConfig::default()
        })
    }
}

fn parse_handle(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid handle '{}': {}", s, e))
}

fn init_tracing(verbose: bool) {
    let directive = if verbose {
        "le_autoconnect=debug"
    } else {
        "le_autoconnect=info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(target_os = "linux")]
async fn run(cli: Cli) -> Result<Outcome> {
    use std::sync::Arc;

    use le_autoconnect::hci::socket::HciSocket;
    use le_autoconnect::transport::l2cap::L2capTransport;
    use le_autoconnect::{AutoConnect, StdoutReporter};

    let scan = cli.scan_config();
    let session = cli.session_config()?;
    let device = HciSocket::open(cli.adapter)?;

    let autoconnect = AutoConnect::new(
        device,
        L2capTransport::new(),
        scan,
        session,
        Arc::new(StdoutReporter),
    );

    let cancel = autoconnect.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            cancel.cancel();
        }
    });

    autoconnect.run().await
}

#[cfg(not(target_os = "linux"))]
async fn run(cli: Cli) -> Result<Outcome> {
    let _ = (cli.scan_config(), cli.session_config()?);
    Err(le_autoconnect::Error::BluetoothUnavailable {
        reason: "raw HCI access is only available on Linux".to_string(),
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(outcome) => {
            info!("Finished without completing ({:?})", outcome);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handle() {
        assert_eq!(parse_handle("0x0017"), Ok(0x17));
        assert_eq!(parse_handle("0X2a"), Ok(0x2A));
        assert_eq!(parse_handle("23"), Ok(23));
        assert!(parse_handle("0xZZ").is_err());
        assert!(parse_handle("70000").is_err());
    }

    #[test]
    fn test_default_cli() {
        let cli = Cli::parse_from(["le-autoconnect"]);
        let scan = cli.scan_config();
        assert_eq!(scan, ScanConfig::default());

        let session = cli.session_config().unwrap();
        assert_eq!(session.write, WriteTarget::default());
        assert_eq!(session.security, SecurityLevel::Low);
        assert!(!session.listen);
    }

    #[test]
    fn test_scan_flags() {
        let cli = Cli::parse_from([
            "le-autoconnect",
            "--passive",
            "--privacy",
            "--whitelist",
            "--duplicates",
            "--discovery",
            "l",
        ]);
        let scan = cli.scan_config();
        assert_eq!(scan.scan_type, ScanType::Passive);
        assert_eq!(scan.own_address_type, OwnAddressType::Random);
        assert_eq!(scan.filter_policy, ScanFilterPolicy::WhitelistOnly);
        assert!(!scan.filter_duplicates);
        assert_eq!(scan.discovery, DiscoveryProcedure::Limited);
        assert_eq!(scan.interval, 0x0012);
    }

    #[test]
    fn test_session_flags() {
        let cli = Cli::parse_from([
            "le-autoconnect",
            "--sec-level",
            "high",
            "--listen",
            "--handle",
            "0x002a",
            "--value",
            "0102",
            "--mtu",
            "64",
        ]);
        let session = cli.session_config().unwrap();
        assert_eq!(session.security, SecurityLevel::High);
        assert!(session.listen);
        assert_eq!(session.mtu, 64);
        assert_eq!(session.write.handle, 0x2A);
        assert_eq!(session.write.value, vec![0x01, 0x02]);
    }

    #[test]
    fn test_bad_value_is_rejected() {
        let cli = Cli::parse_from(["le-autoconnect", "--value", "xyz"]);
        assert!(cli.session_config().is_err());
    }

    #[test]
    fn test_unknown_discovery_is_a_parse_error() {
        assert!(Cli::try_parse_from(["le-autoconnect", "--discovery", "x"]).is_err());
    }
}
