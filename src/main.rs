use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, ensure};
use tokio::task::JoinSet;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sgpt::cmds::{self, CmdError, ScsiDevice};
use sgpt::config::{PtConfig, TransferMode};
use sgpt::pt::NativeBackend;
use sgpt::scsi::command::StartStop;
use sgpt::scsi::response::Inquiry;
use sgpt::scsi::sense::{self, SenseInfo};

#[cfg(not(any(target_os = "linux", target_os = "haiku", windows)))]
compile_error!("sgpt has no pass-through backend for this target");

/// Largest REQUEST SENSE allocation length.
const SENSE_RESPONSE_LEN: usize = 252;
const INQUIRY_RESPONSE_LEN: usize = 96;
const VPD_RESPONSE_LEN: usize = 255;

#[derive(Parser)]
#[command(name = "sgpt", version)]
#[command(about = "Send SCSI commands through the OS pass-through interface")]
struct Cli {
    /// Command timeout in seconds
    #[arg(short, long, global = true, default_value_t = 60)]
    timeout: u64,

    /// Copy data through a driver owned buffer (Windows only)
    #[arg(long, global = true)]
    buffered: bool,

    /// Open devices read-only
    #[arg(short, long, global = true)]
    read_only: bool,

    /// Log more; repeat for more detail. RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Standard INQUIRY data, or a VPD page with --page
    Inquiry {
        device: String,
        #[arg(long, value_parser = parse_byte)]
        page: Option<u8>,
    },
    /// TEST UNIT READY
    Tur { device: String },
    /// READ CAPACITY, switching to the 16 byte form when needed
    Readcap {
        device: String,
        /// Always use READ CAPACITY(16)
        #[arg(long)]
        long: bool,
    },
    /// REQUEST SENSE
    Sense {
        device: String,
        /// Ask for descriptor format sense data
        #[arg(long)]
        desc: bool,
    },
    /// START STOP UNIT with START set
    Start {
        device: String,
        #[arg(long)]
        immed: bool,
        /// Load the medium as well
        #[arg(long)]
        load: bool,
    },
    /// START STOP UNIT with START clear
    Stop {
        device: String,
        #[arg(long)]
        immed: bool,
        /// Eject the medium as well
        #[arg(long)]
        eject: bool,
    },
    /// One mode page under every page control
    ModePage {
        device: String,
        #[arg(value_parser = parse_byte)]
        page: u8,
        #[arg(long, default_value_t = 0, value_parser = parse_byte)]
        subpage: u8,
        /// Use MODE SENSE(6)
        #[arg(long)]
        six: bool,
    },
    /// INQUIRY on several devices in parallel
    Scan {
        /// Devices to query; all sg devices when empty (Linux only)
        devices: Vec<String>,
    },
}

/// Decimal or `0x` prefixed hex.
fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("{s}: {err}"))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn config(&self) -> PtConfig {
        PtConfig {
            default_timeout: Duration::from_secs(self.timeout),
            transfer_mode: if self.buffered {
                TransferMode::Buffered
            } else {
                TransferMode::Direct
            },
            read_only: self.read_only,
            ..PtConfig::default()
        }
    }
}

fn open(name: &str, config: &PtConfig) -> Result<ScsiDevice<NativeBackend>> {
    ScsiDevice::open(NativeBackend::default(), name, config)
        .wrap_err_with(|| format!("failed to open {name}"))
}

fn hex_dump(data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!(" {:04x}  {}", row * 16, bytes.join(" "));
    }
}

fn print_inquiry(name: &str, inquiry: &Inquiry) {
    println!(
        "{name}: {:<8} {:<16} {:<4}  [{}{}]",
        inquiry.vendor,
        inquiry.product,
        inquiry.revision,
        inquiry.device_type_name(),
        if inquiry.removable { ", removable" } else { "" },
    );
}

fn inquiry(dev: &ScsiDevice<NativeBackend>) -> Result<Inquiry, CmdError> {
    let mut resp = [0u8; INQUIRY_RESPONSE_LEN];
    let n = cmds::ll_inquiry(dev, false, 0, &mut resp)?;
    Ok(Inquiry::parse(&resp[..n])?)
}

fn print_sense(sense_data: &[u8]) {
    match SenseInfo::from_bytes(sense_data) {
        Some(info) => {
            println!("{info}");
            if let Some(progress) = sense::progress(sense_data) {
                println!("progress: {:.1}%", f64::from(progress) * 100.0 / 65536.0);
            }
            if let Some(information) = sense::information(sense_data) {
                println!("information: {information:#x}");
            }
        }
        None => println!("no sense data"),
    }
}

async fn scan(config: PtConfig, mut devices: Vec<String>) -> Result<()> {
    if devices.is_empty() {
        devices = default_devices()?;
    }
    ensure!(!devices.is_empty(), "no devices to scan");

    let backend = NativeBackend::default();
    let mut tasks = JoinSet::new();
    for (idx, name) in devices.into_iter().enumerate() {
        let backend = backend.clone();
        let config = config.clone();
        tasks.spawn_blocking(move || {
            let result = ScsiDevice::open(backend, &name, &config)
                .map_err(CmdError::from)
                .and_then(|dev| inquiry(&dev));
            (idx, name, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.wrap_err("scan task failed")?);
    }
    results.sort_by_key(|(idx, ..)| *idx);
    info!(devices = results.len(), "scan finished");

    for (_, name, result) in results {
        match result {
            Ok(inquiry) => print_inquiry(&name, &inquiry),
            Err(err) => println!("{name}: {err}"),
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn default_devices() -> Result<Vec<String>> {
    let mut devices: Vec<(u32, String)> = std::fs::read_dir("/dev")
        .wrap_err("failed to list /dev")?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let index = name.strip_prefix("sg")?.parse().ok()?;
            Some((index, format!("/dev/{name}")))
        })
        .collect();
    devices.sort();
    Ok(devices.into_iter().map(|(_, path)| path).collect())
}

#[cfg(windows)]
fn default_devices() -> Result<Vec<String>> {
    Ok((0..16).map(|n| format!("PD{n}")).collect())
}

#[cfg(target_os = "haiku")]
fn default_devices() -> Result<Vec<String>> {
    Err(color_eyre::eyre::eyre!("name the raw devices to scan"))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config();
    debug!(?config, "starting");

    match cli.command {
        Command::Inquiry { device, page: None } => {
            let dev = open(&device, &config)?;
            let inquiry = inquiry(&dev)?;
            print_inquiry(&device, &inquiry);
            println!(
                "  qualifier {}, version {:#04x}, response data format {}",
                inquiry.peripheral_qualifier, inquiry.version, inquiry.response_data_format
            );
        }
        Command::Inquiry {
            device,
            page: Some(page),
        } => {
            let dev = open(&device, &config)?;
            let mut resp = [0u8; VPD_RESPONSE_LEN];
            let n = cmds::ll_inquiry(&dev, true, page, &mut resp)
                .wrap_err_with(|| format!("VPD page {page:#04x}"))?;
            println!("VPD page {page:#04x}, {n} bytes:");
            hex_dump(&resp[..n]);
        }
        Command::Tur { device } => {
            let dev = open(&device, &config)?;
            cmds::ll_test_unit_ready(&dev)?;
            println!("{device}: ready");
        }
        Command::Readcap { device, long } => {
            let dev = open(&device, &config)?;
            let mut capacity = None;
            if !long {
                let short = cmds::ll_readcap_10(&dev, false, 0)?;
                if !short.needs_16() {
                    capacity = Some(short);
                }
            }
            let capacity = match capacity {
                Some(capacity) => capacity,
                None => cmds::ll_readcap_16(&dev, false, 0)?,
            };
            println!(
                "{device}: {} blocks of {} bytes, {} bytes total",
                capacity.blocks(),
                capacity.block_len,
                capacity.bytes()
            );
        }
        Command::Sense { device, desc } => {
            let dev = open(&device, &config)?;
            let mut resp = [0u8; SENSE_RESPONSE_LEN];
            let n = cmds::ll_request_sense(&dev, desc, &mut resp)?;
            print_sense(&resp[..n]);
        }
        Command::Start {
            device,
            immed,
            load,
        } => {
            let dev = open(&device, &config)?;
            cmds::ll_start_stop_unit(
                &dev,
                StartStop {
                    immed,
                    load_eject: load,
                    start: true,
                    ..StartStop::default()
                },
            )?;
        }
        Command::Stop {
            device,
            immed,
            eject,
        } => {
            let dev = open(&device, &config)?;
            cmds::ll_start_stop_unit(
                &dev,
                StartStop {
                    immed,
                    load_eject: eject,
                    start: false,
                    ..StartStop::default()
                },
            )?;
        }
        Command::ModePage {
            device,
            page,
            subpage,
            six,
        } => {
            let dev = open(&device, &config)?;
            let controls = cmds::get_mode_page_controls(&dev, six, page, subpage, true, 4096)?;
            let pages = [
                ("current", Some(&controls.current)),
                ("changeable", controls.changeable.as_ref()),
                ("default", controls.default.as_ref()),
                ("saved", controls.saved.as_ref()),
            ];
            for (label, data) in pages {
                match data {
                    Some(data) => {
                        println!("{label}:");
                        hex_dump(data);
                    }
                    None => println!("{label}: not supported"),
                }
            }
        }
        Command::Scan { devices } => scan(config, devices).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_arguments() {
        assert_eq!(parse_byte("0x83"), Ok(0x83));
        assert_eq!(parse_byte("131"), Ok(131));
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("sg").is_err());
    }

    #[test]
    fn flags_map_into_config() {
        let cli = Cli::parse_from(["sgpt", "--buffered", "-t", "5", "-r", "tur", "/dev/sg1"]);
        let config = cli.config();
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.transfer_mode, TransferMode::Buffered);
        assert!(config.read_only);
        assert!(matches!(cli.command, Command::Tur { ref device } if device == "/dev/sg1"));
    }

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
