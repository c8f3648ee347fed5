use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use netgauge::settings::{Settings, SettingsError};
use netgauge::units::UnitMode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List network interfaces that can be measured
    Interfaces {
        /// Include loopback, tunnel and down interfaces as well
        #[arg(long)]
        all: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print one line per sample until interrupted
    Watch {
        #[command(flatten)]
        monitor: Monitor,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Stop after this many samples
        #[arg(long)]
        count: Option<usize>,
    },
    /// Live gauges in the terminal
    Dashboard {
        #[command(flatten)]
        monitor: Monitor,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Clone, Debug, Default)]
pub struct Monitor {
    /// JSON settings file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interface to measure (auto-select the fastest one if omitted)
    #[arg(long)]
    pub interface: Option<String>,

    /// Sampling interval in milliseconds (minimum 250)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Number of samples in the moving average
    #[arg(long)]
    pub smoothing: Option<usize>,

    #[arg(long, value_enum)]
    pub unit: Option<UnitMode>,

    /// Decimal places in formatted rates
    #[arg(long)]
    pub decimals: Option<usize>,

    /// Fixed download gauge ceiling in bytes/s
    #[arg(long)]
    pub max_download: Option<f64>,

    /// Fixed upload gauge ceiling in bytes/s
    #[arg(long)]
    pub max_upload: Option<f64>,

    /// Per-sample peak decay factor, in (0, 1]
    #[arg(long)]
    pub decay: Option<f64>,
}

impl Monitor {
    /// Defaults, then the settings file, then flags.
    pub fn resolve(&self) -> Result<Settings, SettingsError> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(i) = &self.interface {
            settings.preferred_interface_id = Some(i.clone());
        }
        if let Some(v) = self.interval_ms {
            settings.update_interval_ms = v;
        }
        if let Some(v) = self.smoothing {
            settings.smoothing_samples = v;
        }
        if let Some(v) = self.unit {
            settings.unit_mode = v;
        }
        if let Some(v) = self.decimals {
            settings.decimals = v;
        }
        if self.max_download.is_some() {
            settings.max_download_scale = self.max_download;
        }
        if self.max_upload.is_some() {
            settings.max_upload_scale = self.max_upload;
        }
        if let Some(v) = self.decay {
            settings.max_scale_decay = v;
        }
        settings.validate()?;
        Ok(settings)
    }
}
