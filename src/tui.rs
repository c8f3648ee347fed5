use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tracing::{info, warn};

use netgauge::interfaces::ProbeError;
use netgauge::scaler::normalize;
use netgauge::{
    format_rate, AutoScaler, GaugeScale, InterfaceHandle, InterfaceProvider, LiveSettings, SampleStatus,
    SamplingScheduler, Settings, SettingsSource, Snapshot, Subscription, SystemProvider,
};

use crate::cli::Monitor;

const MAX_EVENTS: usize = 100;

/// Consumer-side state: the only place the dashboard's AutoScaler is mutated.
pub(crate) struct DashboardView {
    scaler: AutoScaler,
    scale: GaugeScale,
    last: Option<Snapshot>,
    events: Vec<String>,
}

impl DashboardView {
    pub(crate) fn new() -> Self {
        let scaler = AutoScaler::new();
        let scale = scaler.scale();
        Self {
            scaler,
            scale,
            last: None,
            events: Vec::new(),
        }
    }

    pub(crate) fn apply(&mut self, snapshot: Snapshot, settings: &Settings) {
        self.scale = self.scaler.update(&snapshot, settings);

        let previous_status = self.last.as_ref().map(|s| (s.interface_id.clone(), s.status));
        let current_status = (snapshot.interface_id.clone(), snapshot.status);
        if previous_status.as_ref() != Some(&current_status) {
            let line = match snapshot.status {
                SampleStatus::Measured => format!("Measuring {}", snapshot.interface_name),
                SampleStatus::NoInterface => "No connection".to_string(),
                SampleStatus::AwaitingData => format!("{}: awaiting data", snapshot.interface_id),
                SampleStatus::Discontinuity => format!("{}: counters reset", snapshot.interface_id),
            };
            self.log(line);
        }
        self.last = Some(snapshot);
    }

    pub(crate) fn log(&mut self, line: String) {
        self.events.push(line);
        if self.events.len() > MAX_EVENTS {
            self.events.remove(0);
        }
    }

    /// Interface the dashboard is currently showing, if any.
    pub(crate) fn interface_id(&self) -> Option<&str> {
        self.last
            .as_ref()
            .map(|s| s.interface_id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Gauge fill for download and upload; zero when there is no data.
    pub(crate) fn ratios(&self) -> (f64, f64) {
        match &self.last {
            Some(s) if s.valid => (
                normalize(s.download_rate, self.scale.download_max),
                normalize(s.upload_rate, self.scale.upload_max),
            ),
            _ => (0.0, 0.0),
        }
    }

    fn labels(&self, settings: &Settings) -> (String, String) {
        let fmt = |rate: f64| format_rate(rate, settings.unit_mode, settings.decimals);
        match &self.last {
            Some(s) if s.valid => (
                format!("{} of {}", fmt(s.download_rate), fmt(self.scale.download_max)),
                format!("{} of {}", fmt(s.upload_rate), fmt(self.scale.upload_max)),
            ),
            Some(s) => (s.interface_name.clone(), s.interface_name.clone()),
            None => ("-".to_string(), "-".to_string()),
        }
    }

    fn render(&self, f: &mut Frame, settings: &Settings) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(f.size());

        let title = match &self.last {
            Some(s) if s.valid => format!("{} ({})", s.interface_name, s.interface_id),
            Some(s) if !s.interface_id.is_empty() => s.interface_id.clone(),
            _ => "no interface".to_string(),
        };
        let header = Paragraph::new(format!(
            "unit: {:?}   interval: {} ms   smoothing: {}",
            settings.unit_mode, settings.update_interval_ms, settings.smoothing_samples
        ))
        .block(Block::default().title(title).borders(Borders::ALL));
        f.render_widget(header, chunks[0]);

        let (down_ratio, up_ratio) = self.ratios();
        let (down_label, up_label) = self.labels(settings);
        let download = Gauge::default()
            .block(Block::default().title("Download").borders(Borders::ALL))
            .gauge_style(Style::default().fg(Color::Green))
            .ratio(down_ratio)
            .label(down_label);
        f.render_widget(download, chunks[1]);

        let upload = Gauge::default()
            .block(Block::default().title("Upload").borders(Borders::ALL))
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(up_ratio)
            .label(up_label);
        f.render_widget(upload, chunks[2]);

        let log_items: Vec<ListItem> = self.events.iter().rev().map(|l| ListItem::new(l.clone())).collect();
        let log_list = List::new(log_items).block(Block::default().title("Events").borders(Borders::ALL));
        f.render_widget(log_list, chunks[3]);

        let help = Paragraph::new("q quit   u unit   i next interface   r reset");
        f.render_widget(help, chunks[4]);
    }
}

/// Interface id following `current` in `available`, wrapping around.
pub(crate) fn next_interface(available: &[String], current: Option<&str>) -> Option<String> {
    if available.is_empty() {
        return None;
    }
    let idx = current
        .and_then(|c| available.iter().position(|a| a == c))
        .map(|i| (i + 1) % available.len())
        .unwrap_or(0);
    Some(available[idx].clone())
}

/// Points the preferred interface at the next listed one. Listing failures
/// only end up in the event log.
pub(crate) fn select_next_interface(
    view: &mut DashboardView,
    live: &LiveSettings,
    listed: Result<Vec<InterfaceHandle>, ProbeError>,
) {
    let ids: Vec<String> = match listed {
        Ok(list) => list.into_iter().map(|i| i.id).collect(),
        Err(e) => {
            warn!(?e, "Listing interfaces failed");
            view.log(format!("Listing interfaces failed: {e}"));
            return;
        }
    };
    match next_interface(&ids, view.interface_id()) {
        Some(next) => {
            view.log(format!("Preferring {next}"));
            live.update(|s| s.preferred_interface_id = Some(next.clone()));
        }
        None => view.log("No eligible interfaces".to_string()),
    }
}

pub fn run_dashboard(monitor: Monitor) -> Result<()> {
    let settings = monitor.resolve().context("Loading settings")?;
    let live = LiveSettings::new(settings);
    let mut scheduler = SamplingScheduler::new(SystemProvider::new(), Arc::new(live.clone()))
        .with_interface_lister(SystemProvider::new());
    let subscription = scheduler.subscribe();
    scheduler.start();

    let result = run_tui(&scheduler, &live, &subscription);

    info!("Shutting down");
    scheduler.stop();
    result
}

fn run_tui<P: InterfaceProvider + 'static>(
    scheduler: &SamplingScheduler<P>,
    live: &LiveSettings,
    subscription: &Subscription,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, scheduler, live, subscription);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop<P: InterfaceProvider + 'static>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    scheduler: &SamplingScheduler<P>,
    live: &LiveSettings,
    subscription: &Subscription,
) -> Result<()> {
    let mut view = DashboardView::new();

    loop {
        while let Ok(snapshot) = subscription.rx.try_recv() {
            view.apply(snapshot, &live.current());
        }

        let settings = live.current();
        terminal.draw(|f| view.render(f, &settings))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Char('q') => break,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            KeyCode::Char('u') => {
                live.update(|s| s.unit_mode = s.unit_mode.next());
            }
            KeyCode::Char('r') => {
                scheduler.reset();
                view.log("Reset requested".to_string());
            }
            KeyCode::Char('i') => select_next_interface(&mut view, live, scheduler.get_interfaces()),
            _ => {}
        }
    }
    Ok(())
}
