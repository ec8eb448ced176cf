use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vendor-neutral accelerator broker for container runtimes", long_about = None)]
pub struct Args {
    /// Path to the runtime configuration file
    #[arg(short, long, default_value = "/etc/accelshim/config.json")]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List detected accelerators
    List {
        /// Only show devices from one vendor family
        #[arg(long)]
        vendor: Option<String>,

        /// Show telemetry and cost estimates for each device
        #[arg(short, long)]
        detailed: bool,
    },

    /// Pick one accelerator matching the given requirements
    Select {
        /// Vendor family (nvidia, amd, intel, apple, any)
        #[arg(long)]
        vendor: Option<String>,

        /// Minimum device memory, e.g. "8GB"
        #[arg(long, default_value = "")]
        min_vram: String,

        /// Selection strategy (performance, cost, balanced)
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Select a device and inject it into a container launch spec
    Modify {
        /// Bundle directory containing the container's config.json
        #[arg(short, long)]
        bundle: PathBuf,

        /// Vendor family (nvidia, amd, intel, apple, any)
        #[arg(long)]
        vendor: Option<String>,

        /// Minimum device memory, e.g. "8GB"
        #[arg(long, default_value = "")]
        min_vram: String,

        /// Selection strategy (performance, cost, balanced)
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Validate the reserved accelerator for the container state on stdin
    Prestart,
}
