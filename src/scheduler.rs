//! Background sampling loop with cancellable waits and bounded shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as channel;
use tracing::{error, info, warn};

use crate::bus::{SnapshotBus, Subscription};
use crate::interfaces::{eligible, InterfaceHandle, InterfaceProvider, ProbeError};
use crate::sampler::ThroughputSampler;
use crate::settings::SettingsSource;

pub const MIN_INTERVAL: Duration = Duration::from_millis(250);
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    /// Loop did not exit within the timeout and was abandoned
    TimedOut,
}

struct LoopHandle {
    // dropping the sender is the cancellation signal
    cancel_tx: channel::Sender<()>,
    // never sent on; disconnects when the loop thread exits
    done_rx: channel::Receiver<()>,
    thread: JoinHandle<()>,
}

struct LoopContext<P> {
    sampler: Arc<Mutex<ThroughputSampler<P>>>,
    settings: Arc<dyn SettingsSource>,
    bus: Arc<SnapshotBus>,
    reset_requested: Arc<AtomicBool>,
}

pub struct SamplingScheduler<P: InterfaceProvider + 'static> {
    sampler: Arc<Mutex<ThroughputSampler<P>>>,
    settings: Arc<dyn SettingsSource>,
    bus: Arc<SnapshotBus>,
    reset_requested: Arc<AtomicBool>,
    running: Option<LoopHandle>,
    stop_timeout: Duration,
    // separate provider for pickers; keeps listing off the tick lock
    lister: Option<Mutex<P>>,
}

fn lock<P>(sampler: &Mutex<ThroughputSampler<P>>) -> MutexGuard<'_, ThroughputSampler<P>> {
    sampler.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P: InterfaceProvider + 'static> SamplingScheduler<P> {
    pub fn new(provider: P, settings: Arc<dyn SettingsSource>) -> Self {
        Self {
            sampler: Arc::new(Mutex::new(ThroughputSampler::new(provider))),
            settings,
            bus: Arc::new(SnapshotBus::new(SUBSCRIBER_CAPACITY)),
            reset_requested: Arc::new(AtomicBool::new(false)),
            running: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            lister: None,
        }
    }

    /// Lists interfaces through `lister` instead of the sampling provider.
    pub fn with_interface_lister(mut self, lister: P) -> Self {
        self.lister = Some(Mutex::new(lister));
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: crate::bus::SubscriberId) {
        self.bus.unsubscribe(id);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Eligible interfaces for interface pickers.
    ///
    /// Without a separate lister this waits for any in-flight tick.
    pub fn get_interfaces(&self) -> Result<Vec<InterfaceHandle>, ProbeError> {
        match &self.lister {
            Some(lister) => {
                let mut provider = lister.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(eligible(provider.list()?))
            }
            None => lock(&self.sampler).interfaces(),
        }
    }

    /// Asks the loop to drop history and baseline before its next tick.
    pub fn reset(&self) {
        self.reset_requested.store(true, Ordering::Relaxed);
    }

    /// Stops any running loop, then starts a fresh one. Returns how the old loop ended.
    pub fn start(&mut self) -> StopOutcome {
        let previous = self.stop();

        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let ctx = LoopContext {
            sampler: Arc::clone(&self.sampler),
            settings: Arc::clone(&self.settings),
            bus: Arc::clone(&self.bus),
            reset_requested: Arc::clone(&self.reset_requested),
        };
        let thread = thread::Builder::new()
            .name("netgauge-sampler".into())
            .spawn(move || {
                let _done = done_tx;
                ctx.run(cancel_rx);
            });

        match thread {
            Ok(thread) => {
                self.running = Some(LoopHandle {
                    cancel_tx,
                    done_rx,
                    thread,
                });
            }
            Err(e) => error!(?e, "Failed to spawn sampling thread"),
        }
        previous
    }

    /// Cancels the loop and waits for it, at most the stop timeout.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(handle) = self.running.take() else {
            return StopOutcome::NotRunning;
        };
        drop(handle.cancel_tx);

        match handle.done_rx.recv_timeout(self.stop_timeout) {
            Err(channel::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Sampling loop did not stop in time, abandoning it"
                );
                StopOutcome::TimedOut
            }
            _ => {
                if handle.thread.join().is_err() {
                    warn!("Sampling thread panicked");
                }
                info!("Sampling loop stopped");
                StopOutcome::Stopped
            }
        }
    }
}

impl<P: InterfaceProvider + 'static> Drop for SamplingScheduler<P> {
    fn drop(&mut self) {
        self.stop();
        self.bus.dispose();
    }
}

impl<P: InterfaceProvider> LoopContext<P> {
    fn run(self, cancel_rx: channel::Receiver<()>) {
        info!("Sampling loop started");
        loop {
            if !matches!(cancel_rx.try_recv(), Err(channel::TryRecvError::Empty)) {
                break;
            }

            let settings = self.settings.current();
            let interval = Duration::from_millis(settings.update_interval_ms).max(MIN_INTERVAL);

            let wait = match self.tick(&settings) {
                Ok(()) => interval,
                Err(e) => {
                    error!(?e, "Network sampling failed");
                    ERROR_BACKOFF
                }
            };

            match cancel_rx.recv_timeout(wait) {
                Err(channel::RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        }
        info!("Sampling loop exited");
    }

    fn tick(&self, settings: &crate::settings::Settings) -> Result<(), ProbeError> {
        // Sample and publish under one lock so ticks never interleave.
        let mut sampler = lock(&self.sampler);
        if self.reset_requested.swap(false, Ordering::Relaxed) {
            sampler.reset();
        }
        let snapshot = sampler.sample(settings)?;
        self.bus.publish(&snapshot);
        Ok(())
    }
}
