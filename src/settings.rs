use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::units::UnitMode;

pub const DEFAULT_DECAY: f64 = 0.92;
pub const DEFAULT_HEADROOM: f64 = 1.1;
pub const DEFAULT_FLOOR: f64 = 8192.0;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Live tunables read by the sampling loop and the consumers every tick.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub update_interval_ms: u64,
    pub smoothing_samples: usize,
    pub unit_mode: UnitMode,
    pub decimals: usize,
    pub preferred_interface_id: Option<String>,
    /// Fixed download ceiling in bytes/s, bypasses auto-scaling
    pub max_download_scale: Option<f64>,
    pub max_upload_scale: Option<f64>,
    pub max_scale_decay: f64,
    pub scale_headroom: f64,
    pub scale_floor: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            smoothing_samples: 3,
            unit_mode: UnitMode::Auto,
            decimals: 1,
            preferred_interface_id: None,
            max_download_scale: None,
            max_upload_scale: None,
            max_scale_decay: DEFAULT_DECAY,
            scale_headroom: DEFAULT_HEADROOM,
            scale_floor: DEFAULT_FLOOR,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (field, value) in [
            ("max_download_scale", self.max_download_scale),
            ("max_upload_scale", self.max_upload_scale),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(SettingsError::Invalid {
                        field,
                        reason: format!("{v} is not a positive rate"),
                    });
                }
            }
        }
        if !(self.max_scale_decay > 0.0 && self.max_scale_decay <= 1.0) {
            return Err(SettingsError::Invalid {
                field: "max_scale_decay",
                reason: format!("{} is outside (0, 1]", self.max_scale_decay),
            });
        }
        if !(self.scale_headroom.is_finite() && self.scale_headroom >= 1.0) {
            return Err(SettingsError::Invalid {
                field: "scale_headroom",
                reason: format!("{} is below 1", self.scale_headroom),
            });
        }
        if !(self.scale_floor.is_finite() && self.scale_floor > 0.0) {
            return Err(SettingsError::Invalid {
                field: "scale_floor",
                reason: format!("{} is not a positive rate", self.scale_floor),
            });
        }
        Ok(())
    }
}

/// Read-only view of the current settings.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> Settings;
}

impl<F> SettingsSource for F
where
    F: Fn() -> Settings + Send + Sync,
{
    fn current(&self) -> Settings {
        self()
    }
}

/// Settings cell shared between the sampling loop and whoever edits settings.
#[derive(Clone)]
pub struct LiveSettings {
    inner: Arc<ArcSwap<Settings>>,
}

impl LiveSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(settings)),
        }
    }

    pub fn update(&self, f: impl Fn(&mut Settings)) {
        self.inner.rcu(|current| {
            let mut next = Settings::clone(current);
            f(&mut next);
            next
        });
    }
}

impl SettingsSource for LiveSettings {
    fn current(&self) -> Settings {
        Settings::clone(&self.inner.load())
    }
}
