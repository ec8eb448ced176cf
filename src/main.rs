mod args;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use accelshim::config::Config;
use accelshim::gpu::{Device, DeviceType};
use accelshim::runtime::state::ContainerState;
use accelshim::runtime::{Manager, Requirements, Strategy, VendorFilter};
use accelshim::utils::format_size;
use accelshim::logging;

use args::{Args, Command};

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_or_default(&args.config)?;
    let log_file = (!config.log_file.is_empty()).then(|| Path::new(&config.log_file));
    let _guard = logging::init(args.verbose || config.debug, log_file);

    let mut manager = Manager::new(config.clone());

    match args.command {
        Command::List { vendor, detailed } => {
            let devices = match vendor {
                Some(family) => manager.devices_by_type(DeviceType::parse(&family)),
                None => manager.devices(),
            };

            if devices.is_empty() {
                println!("No accelerators detected");
                return Ok(());
            }
            for device in &devices {
                print_device(device, detailed);
            }
        }

        Command::Select {
            vendor,
            min_vram,
            strategy,
        } => {
            let requirements = requirements_from(&config, vendor, min_vram, strategy);
            let device = manager.select_device(&requirements)?;
            print_device(&device, true);
        }

        Command::Modify {
            bundle,
            vendor,
            min_vram,
            strategy,
        } => {
            let requirements = requirements_from(&config, vendor, min_vram, strategy);
            let device = manager.select_device(&requirements)?;
            manager.modify_spec(&bundle.join("config.json"), &device)?;
            println!(
                "granted {}:{} ({}) to bundle {}",
                device.device_type,
                device.index,
                device.name,
                bundle.display()
            );
        }

        Command::Prestart => {
            let state: ContainerState = serde_json::from_reader(io::stdin())
                .context("failed to parse container state from stdin")?;
            manager.prestart(&state)?;
        }
    }

    Ok(())
}

/// Flags fall back to the configured defaults when absent.
fn requirements_from(
    config: &Config,
    vendor: Option<String>,
    min_vram: String,
    strategy: Option<String>,
) -> Requirements {
    Requirements {
        vendor: VendorFilter::parse(vendor.as_deref().unwrap_or(&config.preferred_vendor)),
        min_memory: min_vram,
        strategy: Strategy::parse(strategy.as_deref().unwrap_or(&config.default_strategy)),
    }
}

fn print_device(device: &Device, detailed: bool) {
    println!(
        "{}:{} {} ({})",
        device.device_type,
        device.index,
        device.name,
        format_size(device.vram_bytes)
    );

    if detailed {
        println!("  driver:      {}", fallback(&device.driver_version));
        println!("  bus id:      {}", fallback(&device.pci_bus_id));
        println!(
            "  telemetry:   {:.0}% util, {:.1} W, {} C",
            device.utilization, device.power_draw, device.temperature
        );
        println!(
            "  estimates:   score {}, ${:.2}/hr",
            device.performance_score, device.cost_per_hour
        );
    }
}

fn fallback(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}
