//! Command line tool for OpenEPaperLink and ATC e-paper tags
//!
//! Scans for tags, reads their display configuration and uploads images
//! over BLE.

mod home;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use oepl_ble::TagClient;
use oepl_ble::btle::{self, BtleTransport};
use oepl_image::DitherMode;
use oepl_proto::frame::RefreshMode;
use oepl_proto::{Protocol, color, tlv};
use tracing_subscriber::EnvFilter;

use home::{DeviceCache, DeviceRecord, Settings};

type Client = TagClient<BtleTransport>;

#[derive(Parser)]
#[command(name = "oepl")]
#[command(about = "Drive OpenEPaperLink and ATC e-paper tags over BLE")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for tags
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// List tags remembered from earlier scans
    Devices,
    /// Write settings.json with every key filled in, then print it
    Settings,
    /// Interrogate a tag and cache what it reports
    Info {
        address: String,
        /// atc or oepl, needed when the tag has not been scanned
        #[arg(short, long)]
        protocol: Option<Protocol>,
    },
    /// Dump the full configuration of an OEPL tag
    Config {
        address: String,
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Upload an image
    Upload {
        address: String,
        image: PathBuf,
        #[arg(short, long)]
        protocol: Option<Protocol>,
        /// none, burkes or ordered
        #[arg(long)]
        dither: Option<DitherMode>,
        /// full, fast, partial or partial2
        #[arg(long)]
        refresh: Option<RefreshMode>,
        /// Force the block transfer
        #[arg(long)]
        block: bool,
        /// Never compress direct writes
        #[arg(long)]
        no_compress: bool,
        /// Save the image as the tag will show it
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Switch the LED
    Led {
        address: String,
        #[arg(value_enum)]
        state: LedState,
        #[arg(short, long)]
        protocol: Option<Protocol>,
    },
    /// Connect and disconnect
    Ping {
        address: String,
        #[arg(short, long)]
        protocol: Option<Protocol>,
    },
    /// Show a clock, or stop showing it
    Clock {
        address: String,
        #[arg(long)]
        off: bool,
        #[arg(short, long)]
        protocol: Option<Protocol>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LedState {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let oepl_home = home::oepl_home()?;
    let settings = Settings::load(&oepl_home)?;
    let mut cache = DeviceCache::load(&oepl_home)?;

    match cli.command {
        Commands::Scan { duration } => {
            let duration = duration.map_or(settings.scan_duration(), std::time::Duration::from_secs);
            scan(&mut cache, duration).await?;
            cache.save(&oepl_home)?;
            return Ok(());
        }
        Commands::Devices => {
            for (address, record) in cache.iter() {
                print_info(address, record);
            }
            return Ok(());
        }
        Commands::Settings => {
            settings.save(&oepl_home)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            return Ok(());
        }
        _ => {}
    }

    let transport = BtleTransport::default_adapter(settings.scan_duration()).await?;
    let client = TagClient::with_config(transport, settings.operation_config());

    match cli.command {
        Commands::Scan { .. } | Commands::Devices | Commands::Settings => {}
        Commands::Info { address, protocol } => {
            let protocol = resolve_protocol(&cache, &address, protocol)?;
            let record = refresh_info(&client, &mut cache, &address, protocol).await?;
            cache.save(&oepl_home)?;
            print_info(&address, &record);
        }
        Commands::Config { address, json } => {
            let config = client.read_config(&address, Protocol::Oepl).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{config}");
            }
            let record = cache.entry(&address, Protocol::Oepl);
            record.capabilities = tlv::extract_display_capabilities(&config).ok();
            record.config = Some(config);
            cache.save(&oepl_home)?;
        }
        Commands::Upload {
            address,
            image,
            protocol,
            dither,
            refresh,
            block,
            no_compress,
            preview,
        } => {
            let protocol = resolve_protocol(&cache, &address, protocol)?;
            let cached = cache
                .get(&address)
                .filter(|r| r.protocol == protocol && r.capabilities.is_some())
                .cloned();
            let record = match cached {
                Some(record) => record,
                None => {
                    let record = refresh_info(&client, &mut cache, &address, protocol).await?;
                    cache.save(&oepl_home)?;
                    record
                }
            };
            let caps = record
                .capabilities
                .ok_or("tag did not report its display")?;

            let mut options = settings.upload_options();
            options.dither = dither.unwrap_or(options.dither);
            options.refresh = refresh.unwrap_or(options.refresh);
            options.compress &= !no_compress;

            let bytes = std::fs::read(&image)?;
            let source = oepl_image::transform::load(&bytes)?;
            let report = if block {
                client
                    .upload_block(&address, protocol, &source, &caps, &options)
                    .await?
            } else {
                client
                    .upload(
                        &address,
                        protocol,
                        &source,
                        &caps,
                        record.transmission_modes(),
                        &options,
                    )
                    .await?
            };
            println!("Uploaded {} via {}", image.display(), report.method);
            if let Some(outcome) = report.outcome {
                println!("  Result: {outcome:?}");
            }
            if let Some(path) = preview {
                report.preview.save(&path)?;
                println!("  Preview: {}", path.display());
            }
        }
        Commands::Led {
            address,
            state,
            protocol,
        } => {
            let protocol = resolve_protocol(&cache, &address, protocol)?;
            match state {
                LedState::On => client.turn_led_on(&address, protocol).await?,
                LedState::Off => client.turn_led_off(&address, protocol).await?,
            }
            println!("LED switched");
        }
        Commands::Ping { address, protocol } => {
            let protocol = resolve_protocol(&cache, &address, protocol)?;
            client.ping(&address, protocol).await?;
            println!("{address} is reachable");
        }
        Commands::Clock {
            address,
            off,
            protocol,
        } => {
            let protocol = resolve_protocol(&cache, &address, protocol)?;
            if off {
                client.disable_clock_mode(&address, protocol).await?;
                println!("Clock mode disabled");
            } else {
                let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                let now = u32::try_from(now)?;
                client.set_clock_mode(&address, protocol, now).await?;
                println!("Clock mode enabled");
            }
        }
    }

    Ok(())
}

fn resolve_protocol(
    cache: &DeviceCache,
    address: &str,
    explicit: Option<Protocol>,
) -> Result<Protocol, Box<dyn std::error::Error>> {
    if let Some(protocol) = explicit {
        return Ok(protocol);
    }
    cache
        .get(address)
        .map(|record| record.protocol)
        .ok_or_else(|| format!("unknown tag {address}: run `oepl scan` or pass --protocol").into())
}

async fn scan(
    cache: &mut DeviceCache,
    duration: std::time::Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for tags ({} seconds)...", duration.as_secs());
    let adapter = btle::get_adapter().await?;
    let tags = btle::discover(&adapter, duration).await?;

    println!("\nFound {} tags:", tags.len());
    for tag in tags {
        let rssi = tag
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        let temperature = tag
            .advertising
            .temperature
            .map(|t| format!(", {t}°C"))
            .unwrap_or_default();
        println!(
            "  {} [{}] {} RSSI: {}, battery {}% ({} mV){}",
            tag.address,
            tag.protocol,
            tag.name.as_deref().unwrap_or("Unknown"),
            rssi,
            tag.advertising.battery_pct,
            tag.advertising.battery_mv,
            temperature,
        );
        let record = cache.entry(&tag.address, tag.protocol);
        record.name = tag.name;
        record.advertising = Some(tag.advertising);
    }
    Ok(())
}

/// Interrogate, and for OEPL also fetch the config and firmware version
async fn refresh_info(
    client: &Client,
    cache: &mut DeviceCache,
    address: &str,
    protocol: Protocol,
) -> Result<DeviceRecord, Box<dyn std::error::Error>> {
    let record = cache.entry(address, protocol);
    match protocol {
        Protocol::Atc => {
            record.capabilities = Some(client.interrogate(address, protocol).await?);
        }
        Protocol::Oepl => {
            let config = client.read_config(address, protocol).await?;
            record.capabilities = Some(tlv::extract_display_capabilities(&config)?);
            record.config = Some(config);
            match client.read_firmware_version(address, protocol).await {
                Ok(version) => record.firmware = Some(version),
                Err(e) => tracing::warn!(address, error = %e, "could not read firmware version"),
            }
        }
    }
    Ok(record.clone())
}

fn print_info(address: &str, record: &DeviceRecord) {
    println!("{address} ({})", record.protocol);
    if let Some(caps) = &record.capabilities {
        println!(
            "  Display: {}x{} {}",
            caps.width,
            caps.height,
            color::describe_color_scheme(caps.color_scheme)
        );
        println!("  Rotate buffer: {}", caps.needs_rotation());
    }
    if let Some(version) = &record.firmware {
        println!("  Firmware: {version}");
    }
    if let Some(config) = &record.config {
        for display in &config.displays {
            if let Ok(model) = tlv::generate_model_name(display) {
                println!("  Model: {model}");
            }
        }
        println!("  Transfer modes: {:#04x}", record.transmission_modes());
    }
}
