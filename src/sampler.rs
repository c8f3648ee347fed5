//! Interface selection, counter deltas and moving-average smoothing.
//!
//! [`ThroughputSampler::sample`] is called once per tick by the scheduler.
//! Expected gaps in the data (no interface, warm-up, counter resets, clock
//! anomalies) come back as invalid snapshots; only a failing provider is an
//! `Err`.

use std::collections::VecDeque;
use std::time::{Instant, SystemTime};

use serde::Serialize;
use tracing::{debug, info};

use crate::interfaces::{eligible, ByteCounters, InterfaceHandle, InterfaceProvider, ProbeError};
use crate::settings::Settings;

pub const NO_CONNECTION: &str = "no connection";
pub const AWAITING_DATA: &str = "awaiting data";

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Measured,
    NoInterface,
    AwaitingData,
    /// Counter regression or non-positive elapsed time
    Discontinuity,
}

/// One sampling result. Rates are bytes per second and only meaningful when `valid`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub interface_id: String,
    pub interface_name: String,
    pub download_rate: f64,
    pub upload_rate: f64,
    pub timestamp: SystemTime,
    pub valid: bool,
    pub status: SampleStatus,
}

impl Snapshot {
    fn invalid(status: SampleStatus, interface_id: &str, message: &str) -> Self {
        Self {
            interface_id: interface_id.to_string(),
            interface_name: message.to_string(),
            download_rate: 0.0,
            upload_rate: 0.0,
            timestamp: SystemTime::now(),
            valid: false,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Unbound,
    Bound(InterfaceHandle),
}

impl Binding {
    fn id(&self) -> Option<&str> {
        match self {
            Binding::Unbound => None,
            Binding::Bound(h) => Some(h.id.as_str()),
        }
    }
}

pub struct ThroughputSampler<P> {
    provider: P,
    binding: Binding,
    last: ByteCounters,
    last_instant: Option<Instant>,
    history: VecDeque<(f64, f64)>,
}

impl<P: InterfaceProvider> ThroughputSampler<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            binding: Binding::Unbound,
            last: ByteCounters::default(),
            last_instant: None,
            history: VecDeque::new(),
        }
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Eligible interfaces for pickers: no loopback, no tunnels, only up.
    pub fn interfaces(&mut self) -> Result<Vec<InterfaceHandle>, ProbeError> {
        Ok(eligible(self.provider.list()?))
    }

    /// All interfaces including the ones never picked for measurement.
    pub fn all_interfaces(&mut self) -> Result<Vec<InterfaceHandle>, ProbeError> {
        self.provider.list()
    }

    /// Drops smoothing history and baseline; the next tick is a warm-up tick.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last = ByteCounters::default();
        self.last_instant = None;
    }

    pub fn sample(&mut self, settings: &Settings) -> Result<Snapshot, ProbeError> {
        self.sample_at(settings, Instant::now())
    }

    pub(crate) fn sample_at(&mut self, settings: &Settings, now: Instant) -> Result<Snapshot, ProbeError> {
        let handle = match self.resolve_interface(settings)? {
            Some(h) => h,
            None => {
                self.reset();
                return Ok(Snapshot::invalid(SampleStatus::NoInterface, "", NO_CONNECTION));
            }
        };

        let Some(current) = self.provider.counters(&handle.id)? else {
            // Vanished between lookup and read; next tick re-resolves.
            self.binding = Binding::Unbound;
            self.reset();
            return Ok(Snapshot::invalid(SampleStatus::NoInterface, "", NO_CONNECTION));
        };

        let Some(prev_instant) = self.last_instant else {
            self.last = current;
            self.last_instant = Some(now);
            return Ok(Snapshot::invalid(SampleStatus::AwaitingData, &handle.id, AWAITING_DATA));
        };

        let elapsed = now
            .checked_duration_since(prev_instant)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        if elapsed <= 0.0 {
            debug!(interface = %handle.id, "Non-positive elapsed time, dropping baseline");
            self.reset();
            return Ok(Snapshot::invalid(SampleStatus::Discontinuity, &handle.id, AWAITING_DATA));
        }

        if current.rx_bytes < self.last.rx_bytes || current.tx_bytes < self.last.tx_bytes {
            debug!(
                interface = %handle.id,
                rx_last = self.last.rx_bytes,
                rx_now = current.rx_bytes,
                tx_last = self.last.tx_bytes,
                tx_now = current.tx_bytes,
                "Counter regression, re-baselining"
            );
            self.history.clear();
            self.last = current;
            self.last_instant = Some(now);
            return Ok(Snapshot::invalid(SampleStatus::Discontinuity, &handle.id, AWAITING_DATA));
        }

        let rx_rate = (current.rx_bytes - self.last.rx_bytes) as f64 / elapsed;
        let tx_rate = (current.tx_bytes - self.last.tx_bytes) as f64 / elapsed;
        self.last = current;
        self.last_instant = Some(now);

        let window = settings.smoothing_samples.max(1);
        self.history.push_back((rx_rate, tx_rate));
        while self.history.len() > window {
            self.history.pop_front();
        }
        let n = self.history.len() as f64;
        let (rx_sum, tx_sum) = self
            .history
            .iter()
            .fold((0.0, 0.0), |(a, b), (rx, tx)| (a + rx, b + tx));

        Ok(Snapshot {
            interface_id: handle.id.clone(),
            interface_name: handle.name.clone(),
            download_rate: rx_sum / n,
            upload_rate: tx_sum / n,
            timestamp: SystemTime::now(),
            valid: true,
            status: SampleStatus::Measured,
        })
    }

    /// Re-validates the binding and returns the interface to measure this tick.
    pub fn resolve_interface(&mut self, settings: &Settings) -> Result<Option<InterfaceHandle>, ProbeError> {
        let preferred = settings
            .preferred_interface_id
            .as_deref()
            .filter(|p| !p.trim().is_empty());
        let previous = self.binding.id().map(str::to_owned);

        if let (Some(pref), Some(bound)) = (preferred, previous.as_deref()) {
            if pref != bound {
                debug!(preferred = %pref, bound = %bound, "Preferred interface differs, re-resolving");
                self.binding = Binding::Unbound;
            }
        }

        if let Binding::Bound(bound) = &self.binding {
            if let Some(fresh) = self.provider.lookup(&bound.id)? {
                if fresh.is_up() {
                    self.binding = Binding::Bound(fresh.clone());
                    return Ok(Some(fresh));
                }
            }
            self.binding = Binding::Unbound;
        }

        let candidates = eligible(self.provider.list()?);
        if candidates.is_empty() {
            if previous.is_some() {
                info!("No eligible network interface");
            }
            self.binding = Binding::Unbound;
            return Ok(None);
        }

        let chosen = match preferred.and_then(|p| candidates.iter().find(|c| c.id == p)) {
            Some(p) => p.clone(),
            None => pick_fastest(&candidates),
        };

        if previous.as_deref() != Some(chosen.id.as_str()) {
            if preferred == Some(chosen.id.as_str()) {
                info!(interface = %chosen.id, name = %chosen.name, "Using preferred interface");
            } else {
                info!(interface = %chosen.id, name = %chosen.name, "Auto-selected interface");
            }
            self.reset();
        }
        self.binding = Binding::Bound(chosen.clone());
        Ok(Some(chosen))
    }
}

/// Highest nominal link speed wins; unknown speeds lose to any known one,
/// ties keep enumeration order.
fn pick_fastest(candidates: &[InterfaceHandle]) -> InterfaceHandle {
    let mut best = &candidates[0];
    for c in &candidates[1..] {
        if c.link_speed > best.link_speed {
            best = c;
        }
    }
    best.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::tests::{iface, FakeProvider};
    use crate::interfaces::InterfaceKind;
    use std::time::Duration;

    const GBIT: Option<u64> = Some(1_000_000_000);

    fn settings(window: usize) -> Settings {
        Settings {
            smoothing_samples: window,
            ..Settings::default()
        }
    }

    fn eth0_sampler() -> ThroughputSampler<FakeProvider> {
        let mut p = FakeProvider::with(vec![iface("eth0", InterfaceKind::Ethernet, true, GBIT)]);
        p.set_counters("eth0", 1_000, 1_000);
        ThroughputSampler::new(p)
    }

    #[test]
    fn no_interface_is_invalid_with_sentinel() {
        let mut s = ThroughputSampler::new(FakeProvider::with(vec![iface(
            "lo",
            InterfaceKind::Loopback,
            true,
            None,
        )]));
        let snap = s.sample_at(&settings(3), Instant::now()).unwrap();
        assert!(!snap.valid);
        assert_eq!(snap.status, SampleStatus::NoInterface);
        assert_eq!(snap.interface_name, NO_CONNECTION);
        assert_eq!(snap.interface_id, "");
        assert_eq!(s.binding(), &Binding::Unbound);
    }

    #[test]
    fn first_tick_awaits_then_measures() {
        let mut s = eth0_sampler();
        s.provider.set_counters("eth0", 0, 0);
        let t0 = Instant::now();
        let first = s.sample_at(&settings(1), t0).unwrap();
        assert!(!first.valid);
        assert_eq!(first.status, SampleStatus::AwaitingData);
        assert_eq!(first.interface_name, AWAITING_DATA);

        // a zero baseline is still a baseline
        s.provider.set_counters("eth0", 1_000_000, 500);
        let second = s.sample_at(&settings(1), t0 + Duration::from_secs(1)).unwrap();
        assert!(second.valid);
        assert_eq!(second.status, SampleStatus::Measured);
        assert!((second.download_rate - 1_000_000.0).abs() < 1e-6);
        assert!((second.upload_rate - 500.0).abs() < 1e-6);
        assert_eq!(second.interface_id, "eth0");
    }

    #[test]
    fn one_megabyte_in_one_second() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(1), t0).unwrap();
        s.provider.set_counters("eth0", 1_000 + 1_000_000, 1_000);
        let snap = s.sample_at(&settings(1), t0 + Duration::from_secs(1)).unwrap();
        assert!(snap.valid);
        assert!((snap.download_rate - 1_000_000.0).abs() < 1e-6);
        assert_eq!(snap.upload_rate, 0.0);
    }

    #[test]
    fn rate_is_mean_of_last_window() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(3), t0).unwrap();

        let deltas = [100u64, 200, 300, 400, 500];
        let mut rx = 1_000u64;
        let mut rates = Vec::new();
        for (i, d) in deltas.iter().enumerate() {
            rx += d * 2;
            s.provider.set_counters("eth0", rx, 1_000);
            let snap = s
                .sample_at(&settings(3), t0 + Duration::from_secs(2 * (i as u64 + 1)))
                .unwrap();
            rates.push(*d as f64);
            let tail = &rates[rates.len().saturating_sub(3)..];
            let expected = tail.iter().sum::<f64>() / tail.len() as f64;
            assert!(snap.valid);
            assert!((snap.download_rate - expected).abs() < 1e-9, "tick {i}");
            assert!(s.history_len() <= 3);
        }
    }

    #[test]
    fn zero_window_behaves_as_one() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(0), t0).unwrap();
        s.provider.set_counters("eth0", 3_000, 1_000);
        s.sample_at(&settings(0), t0 + Duration::from_secs(1)).unwrap();
        s.provider.set_counters("eth0", 3_100, 1_000);
        let snap = s.sample_at(&settings(0), t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(s.history_len(), 1);
        assert!((snap.download_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn shrinking_window_evicts_oldest() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(5), t0).unwrap();
        for i in 1..=4u64 {
            s.provider.set_counters("eth0", 1_000 + i * 1_000, 1_000);
            s.sample_at(&settings(5), t0 + Duration::from_secs(i)).unwrap();
        }
        assert_eq!(s.history_len(), 4);
        s.provider.set_counters("eth0", 6_000, 1_000);
        s.sample_at(&settings(2), t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(s.history_len(), 2);
    }

    #[test]
    fn counter_regression_rebaselines() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(3), t0).unwrap();
        s.provider.set_counters("eth0", 5_000, 2_000);
        assert!(s.sample_at(&settings(3), t0 + Duration::from_secs(1)).unwrap().valid);

        s.provider.set_counters("eth0", 100, 2_500);
        let snap = s.sample_at(&settings(3), t0 + Duration::from_secs(2)).unwrap();
        assert!(!snap.valid);
        assert_eq!(snap.status, SampleStatus::Discontinuity);
        assert_eq!(s.history_len(), 0);

        s.provider.set_counters("eth0", 400, 2_600);
        let next = s.sample_at(&settings(3), t0 + Duration::from_secs(3)).unwrap();
        assert!(next.valid);
        assert!((next.download_rate - 300.0).abs() < 1e-9);
        assert!((next.upload_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn upload_only_regression_rebaselines() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(3), t0).unwrap();
        s.provider.set_counters("eth0", 2_000, 3_000);
        assert!(s.sample_at(&settings(3), t0 + Duration::from_secs(1)).unwrap().valid);

        s.provider.set_counters("eth0", 2_500, 10);
        let snap = s.sample_at(&settings(3), t0 + Duration::from_secs(2)).unwrap();
        assert!(!snap.valid);
        assert_eq!(snap.status, SampleStatus::Discontinuity);
        assert_eq!(snap.upload_rate, 0.0);
        assert_eq!(s.history_len(), 0);

        s.provider.set_counters("eth0", 2_700, 60);
        let next = s.sample_at(&settings(3), t0 + Duration::from_secs(3)).unwrap();
        assert!(next.valid);
        assert!((next.download_rate - 200.0).abs() < 1e-9);
        assert!((next.upload_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_is_invalid() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(3), t0).unwrap();
        s.provider.set_counters("eth0", 9_000, 9_000);
        let snap = s.sample_at(&settings(3), t0).unwrap();
        assert!(!snap.valid);
        assert_eq!(snap.status, SampleStatus::Discontinuity);
        assert!(snap.download_rate.is_finite());

        // baseline was dropped, so the next tick warms up again
        let next = s.sample_at(&settings(3), t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(next.status, SampleStatus::AwaitingData);
    }

    #[test]
    fn clock_going_backwards_is_invalid() {
        let mut s = eth0_sampler();
        let t0 = Instant::now() + Duration::from_secs(10);
        s.sample_at(&settings(3), t0).unwrap();
        s.provider.set_counters("eth0", 9_000, 9_000);
        let snap = s.sample_at(&settings(3), t0 - Duration::from_secs(1)).unwrap();
        assert!(!snap.valid);
    }

    #[test]
    fn picks_fastest_candidate() {
        let p = FakeProvider::with(vec![
            iface("wlan0", InterfaceKind::Wireless, true, None),
            iface("eth0", InterfaceKind::Ethernet, true, Some(100_000_000)),
            iface("eth1", InterfaceKind::Ethernet, true, GBIT),
            iface("eth2", InterfaceKind::Ethernet, true, GBIT),
        ]);
        let mut s = ThroughputSampler::new(p);
        let chosen = s.resolve_interface(&settings(3)).unwrap().unwrap();
        assert_eq!(chosen.id, "eth1");
    }

    #[test]
    fn preferred_interface_wins_when_present() {
        let p = FakeProvider::with(vec![
            iface("eth0", InterfaceKind::Ethernet, true, GBIT),
            iface("wlan0", InterfaceKind::Wireless, true, None),
        ]);
        let mut s = ThroughputSampler::new(p);
        let mut cfg = settings(3);
        cfg.preferred_interface_id = Some("wlan0".into());
        assert_eq!(s.resolve_interface(&cfg).unwrap().unwrap().id, "wlan0");

        cfg.preferred_interface_id = Some("ppp0".into());
        assert_eq!(s.resolve_interface(&cfg).unwrap().unwrap().id, "eth0");
    }

    #[test]
    fn bound_interface_reused_without_enumeration() {
        let mut s = eth0_sampler();
        s.resolve_interface(&settings(3)).unwrap();
        let calls = s.provider.list_calls;
        s.resolve_interface(&settings(3)).unwrap();
        s.resolve_interface(&settings(3)).unwrap();
        assert_eq!(s.provider.list_calls, calls);
    }

    #[test]
    fn preference_change_switches_and_clears_history() {
        let mut p = FakeProvider::with(vec![
            iface("eth0", InterfaceKind::Ethernet, true, GBIT),
            iface("wlan0", InterfaceKind::Wireless, true, None),
        ]);
        p.set_counters("eth0", 1_000, 1_000);
        p.set_counters("wlan0", 50_000, 50_000);
        let mut s = ThroughputSampler::new(p);
        let t0 = Instant::now();
        let mut cfg = settings(3);
        s.sample_at(&cfg, t0).unwrap();
        s.provider.set_counters("eth0", 2_000, 1_000);
        assert!(s.sample_at(&cfg, t0 + Duration::from_secs(1)).unwrap().valid);
        assert_eq!(s.history_len(), 1);

        cfg.preferred_interface_id = Some("wlan0".into());
        let snap = s.sample_at(&cfg, t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(snap.status, SampleStatus::AwaitingData);
        assert_eq!(snap.interface_id, "wlan0");
        assert_eq!(s.history_len(), 0);
    }

    #[test]
    fn interface_going_down_fails_over() {
        let mut p = FakeProvider::with(vec![
            iface("eth0", InterfaceKind::Ethernet, true, GBIT),
            iface("wlan0", InterfaceKind::Wireless, true, None),
        ]);
        p.set_counters("eth0", 1_000, 1_000);
        p.set_counters("wlan0", 7_000, 7_000);
        let mut s = ThroughputSampler::new(p);
        let t0 = Instant::now();
        s.sample_at(&settings(3), t0).unwrap();
        assert_eq!(s.binding().id(), Some("eth0"));

        s.provider.interfaces[0].oper_state = crate::interfaces::OperState::Down;
        let snap = s.sample_at(&settings(3), t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(snap.interface_id, "wlan0");
        assert_eq!(snap.status, SampleStatus::AwaitingData);

        s.provider.interfaces.clear();
        let gone = s.sample_at(&settings(3), t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(gone.status, SampleStatus::NoInterface);
        assert_eq!(s.binding(), &Binding::Unbound);
    }

    #[test]
    fn reset_forces_awaiting_data() {
        let mut s = eth0_sampler();
        let t0 = Instant::now();
        s.sample_at(&settings(3), t0).unwrap();
        s.provider.set_counters("eth0", 2_000, 2_000);
        assert!(s.sample_at(&settings(3), t0 + Duration::from_secs(1)).unwrap().valid);
        s.reset();
        let snap = s.sample_at(&settings(3), t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(snap.status, SampleStatus::AwaitingData);
    }

    #[test]
    fn provider_failure_is_an_error() {
        let mut s = eth0_sampler();
        s.provider.fail = true;
        assert!(s.sample_at(&settings(3), Instant::now()).is_err());
    }
}
