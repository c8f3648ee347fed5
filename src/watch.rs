use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use serde::Serialize;
use tracing::info;

use netgauge::{
    format_rate, AutoScaler, GaugeScale, LiveSettings, SamplingScheduler, Settings, SettingsSource, Snapshot,
    SystemProvider,
};

use crate::cli::{Monitor, OutputFormat};

pub fn run_watch(monitor: Monitor, format: OutputFormat, count: Option<usize>) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    let settings = monitor.resolve().context("Loading settings")?;
    run_watch_with_shutdown(settings, format, count, stop_flag)
}

pub(crate) fn run_watch_with_shutdown(
    settings: Settings,
    format: OutputFormat,
    count: Option<usize>,
    stop_flag: Arc<AtomicBool>,
) -> Result<()> {
    info!(
        interval_ms = settings.update_interval_ms,
        smoothing = settings.smoothing_samples,
        interface = settings.preferred_interface_id.as_deref().unwrap_or("auto"),
        "Starting netgauge"
    );
    let live = LiveSettings::new(settings);
    let mut scheduler = SamplingScheduler::new(SystemProvider::new(), Arc::new(live.clone()));
    let subscription = scheduler.subscribe();
    scheduler.start();

    let mut scaler = AutoScaler::new();
    let mut printed = 0usize;
    let stdout = std::io::stdout();
    let result = (|| -> Result<()> {
        while !stop_flag.load(Ordering::Relaxed) {
            let snapshot = match subscription.rx.recv_timeout(Duration::from_millis(200)) {
                Ok(s) => s,
                Err(channel::RecvTimeoutError::Timeout) => continue,
                Err(channel::RecvTimeoutError::Disconnected) => break,
            };
            let current = live.current();
            let scale = scaler.update(&snapshot, &current);
            let line = render_line(&snapshot, scale, &current, format)?;
            let mut out = stdout.lock();
            writeln!(out, "{line}").context("Writing to stdout")?;
            out.flush().ok();

            printed += 1;
            if count.is_some_and(|n| printed >= n) {
                break;
            }
        }
        Ok(())
    })();

    // Shutdown
    info!("Shutting down");
    scheduler.stop();
    result
}

#[derive(Serialize)]
struct WatchRecord<'a> {
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    scale: GaugeScale,
    download: String,
    upload: String,
}

pub(crate) fn render_line(
    snapshot: &Snapshot,
    scale: GaugeScale,
    settings: &Settings,
    format: OutputFormat,
) -> Result<String> {
    let fmt = |rate: f64| format_rate(rate, settings.unit_mode, settings.decimals);
    match format {
        OutputFormat::Json => {
            let record = WatchRecord {
                snapshot,
                scale,
                download: fmt(snapshot.download_rate),
                upload: fmt(snapshot.upload_rate),
            };
            Ok(serde_json::to_string(&record)?)
        }
        OutputFormat::Text if !snapshot.valid => {
            if snapshot.interface_id.is_empty() {
                Ok(format!("-\t{}", snapshot.interface_name))
            } else {
                Ok(format!("{}\t{}", snapshot.interface_id, snapshot.interface_name))
            }
        }
        OutputFormat::Text => Ok(format!(
            "{}\tdown {}\tup {}\tscale {} / {}",
            snapshot.interface_name,
            fmt(snapshot.download_rate),
            fmt(snapshot.upload_rate),
            fmt(scale.download_max),
            fmt(scale.upload_max),
        )),
    }
}
