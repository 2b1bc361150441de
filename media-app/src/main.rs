// SPDX-License-Identifier: GPL-3.0-only

//! install-media: disk preparation for OS installs
//!
//! Scans the host, offers install targets, validates user layouts and
//! writes them out. `plan` shows what `apply` would do without touching
//! anything.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

mod commands;
mod config;
mod logging;

use config::{AppConfig, LoggingLevel, Profile};

/// Partition, format and mount installation media
#[derive(Parser)]
#[command(name = "install-media")]
#[command(about = "Prepare block devices for an operating system install", long_about = None)]
struct Cli {
    /// Configuration file (default: /etc/install-media/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List block devices and their partition tables
    Scan {
        /// Print the device trees as JSON
        #[arg(long, conflicts_with = "toml")]
        json: bool,
        /// Print the device trees as a layout document
        #[arg(long)]
        toml: bool,
        /// Only devices nothing is mounted from
        #[arg(long)]
        available: bool,
    },
    /// List the disks or regions an install can go to
    Targets {
        #[arg(long, value_enum, default_value_t = Policy::Safe)]
        policy: Policy,
        /// Minimum root size, e.g. "20GB" (default: from the profile)
        #[arg(long)]
        root_size: Option<String>,
        #[command(flatten)]
        media: MediaArgs,
    },
    /// Check a layout against the install policy
    Validate {
        /// Layout document (TOML)
        #[arg(long)]
        layout: PathBuf,
        /// Classify partitions by their CLR_* labels
        #[arg(long)]
        advanced: bool,
        #[command(flatten)]
        media: MediaArgs,
    },
    /// Print what applying a layout would change
    Plan {
        #[arg(long)]
        layout: PathBuf,
        /// DISK, DISK:whole or DISK:erase
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
        #[command(flatten)]
        media: MediaArgs,
    },
    /// Write a layout to disk and prepare the target root
    Apply {
        #[arg(long)]
        layout: PathBuf,
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
        /// Directory the new system is mounted at
        #[arg(long)]
        root: PathBuf,
        #[command(flatten)]
        media: MediaArgs,
    },
    /// Build a raw disk image from a layout
    Image {
        /// Layout document; `${image}` names the loop device
        #[arg(long)]
        layout: PathBuf,
        /// Image file to create
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        root: PathBuf,
        #[command(flatten)]
        media: MediaArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Safe,
    All,
    Advanced,
}

/// Media options that override the configuration file.
#[derive(Args, Clone, Default)]
struct MediaArgs {
    /// Boot in legacy BIOS mode
    #[arg(long)]
    legacy_bios: bool,
    /// Skip the size checks
    #[arg(long)]
    skip_size: bool,
    /// Skip validation entirely
    #[arg(long)]
    skip_validation: bool,
    /// Swap file size, e.g. "64MiB"
    #[arg(long)]
    swap_file: Option<String>,
    #[arg(long, value_enum)]
    profile: Option<Profile>,
}

impl MediaArgs {
    fn apply_to(&self, config: &mut AppConfig) {
        let media = &mut config.media;
        media.legacy_bios |= self.legacy_bios;
        media.skip_validation_size |= self.skip_size;
        media.skip_validation_all |= self.skip_validation;
        if let Some(size) = &self.swap_file {
            *media = media.clone().with_swap_file(size.clone());
        }
        if let Some(profile) = self.profile {
            config.profile = profile;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.log_level = LoggingLevel::Debug;
    }
    logging::init(&config);
    media_types::localize::init();

    tracing::debug!("install-media v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Scan {
            json,
            toml,
            available,
        } => {
            let format = if json {
                commands::ScanFormat::Json
            } else if toml {
                commands::ScanFormat::Layout
            } else {
                commands::ScanFormat::Text
            };
            commands::scan(format, available)
        }
        Commands::Targets {
            policy,
            root_size,
            media,
        } => {
            media.apply_to(&mut config);
            let policy = match policy {
                Policy::Safe => commands::TargetPolicy::Safe,
                Policy::All => commands::TargetPolicy::All,
                Policy::Advanced => commands::TargetPolicy::Advanced,
            };
            commands::targets(&config, policy, root_size.as_deref())
        }
        Commands::Validate {
            layout,
            advanced,
            media,
        } => {
            media.apply_to(&mut config);
            let errors = commands::validate(&config, &layout, advanced)?;
            if errors > 0 {
                anyhow::bail!("layout has {errors} validation error(s)");
            }
            Ok(())
        }
        Commands::Plan {
            layout,
            targets,
            media,
        } => {
            media.apply_to(&mut config);
            commands::plan(&config, &layout, &targets)
        }
        Commands::Apply {
            layout,
            targets,
            root,
            media,
        } => {
            require_root()?;
            media.apply_to(&mut config);
            commands::apply(&config, &layout, &targets, &root)
        }
        Commands::Image {
            layout,
            file,
            root,
            media,
        } => {
            require_root()?;
            media.apply_to(&mut config);
            commands::image(&config, &layout, &file, &root)
        }
    }
}

fn require_root() -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("install-media must run as root to change block devices");
        anyhow::bail!("this command needs root privileges");
    }
    Ok(())
}
