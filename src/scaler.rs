use serde::Serialize;

use crate::sampler::Snapshot;
use crate::settings::{Settings, DEFAULT_DECAY};

/// Ceiling shown before the first snapshot arrives (1 MiB/s).
const INITIAL_CEILING: f64 = 1024.0 * 1024.0;

/// Display maxima used to normalise gauge positions.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct GaugeScale {
    pub download_max: f64,
    pub upload_max: f64,
}

/// Tracks decaying peaks of both directions and derives gauge ceilings.
///
/// Lives on the consumer side; feed it every snapshot in delivery order.
#[derive(Debug, Clone)]
pub struct AutoScaler {
    peak_download: f64,
    peak_upload: f64,
    scale: GaugeScale,
}

impl AutoScaler {
    pub fn new() -> Self {
        Self {
            peak_download: 0.0,
            peak_upload: 0.0,
            scale: GaugeScale {
                download_max: INITIAL_CEILING,
                upload_max: INITIAL_CEILING,
            },
        }
    }

    pub fn scale(&self) -> GaugeScale {
        self.scale
    }

    pub fn update(&mut self, snapshot: &Snapshot, settings: &Settings) -> GaugeScale {
        let (down, up) = if snapshot.valid {
            (snapshot.download_rate, snapshot.upload_rate)
        } else {
            (0.0, 0.0)
        };
        let decay = if settings.max_scale_decay > 0.0 && settings.max_scale_decay <= 1.0 {
            settings.max_scale_decay
        } else {
            DEFAULT_DECAY
        };

        self.scale.download_max = match settings.max_download_scale {
            Some(fixed) => fixed,
            None => {
                self.peak_download = decayed_peak(self.peak_download, decay, down);
                ceiling(self.peak_download, settings)
            }
        };
        self.scale.upload_max = match settings.max_upload_scale {
            Some(fixed) => fixed,
            None => {
                self.peak_upload = decayed_peak(self.peak_upload, decay, up);
                ceiling(self.peak_upload, settings)
            }
        };
        self.scale
    }
}

impl Default for AutoScaler {
    fn default() -> Self {
        Self::new()
    }
}

fn decayed_peak(peak: f64, decay: f64, observed: f64) -> f64 {
    let observed = if observed.is_finite() { observed.max(0.0) } else { 0.0 };
    (peak * decay).max(observed)
}

fn ceiling(peak: f64, settings: &Settings) -> f64 {
    (peak * settings.scale_headroom).max(settings.scale_floor)
}

/// Gauge position in `[0, 1]` for a rate against a ceiling.
pub fn normalize(rate: f64, max: f64) -> f64 {
    if !(max > 0.0) || !rate.is_finite() {
        return 0.0;
    }
    (rate.abs() / max).min(1.0)
}
