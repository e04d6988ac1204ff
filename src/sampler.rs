//! # Location Sampler
//!
//! Periodically fetches the device position and evaluates it against one
//! proximity target.
//!
//! ## Session lifecycle
//!
//! `Idle -> Starting -> Tracking -> Stopped`, with `Errored` when permission
//! is refused or revoked. Starting while already starting or tracking is a
//! no-op, so at most one loop runs per sampler.
//!
//! ## Guarantees
//!
//! - At most one position fetch is in flight; ticks missed while a fetch is
//!   slow are skipped, not queued.
//! - Each session has a generation number. Callbacks run under a gate and are
//!   only invoked while their generation is current, so once [`LocationSampler::stop`]
//!   returns no callback of that session can fire.
//! - Calling `stop` from inside a callback is allowed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::error::{ProximityError, Result};
use crate::{Coordinate, ProximitySample, ProximityTarget};

/// Sampling interval used when none (or zero) is given.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

/// Receives every evaluated sample.
pub type SampleCallback = Arc<dyn Fn(ProximitySample) + Send + Sync>;
/// Receives permission and position errors.
pub type ErrorCallback = Arc<dyn Fn(ProximityError) + Send + Sync>;

/// Device location collaborator.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Ask for foreground location access. `false` means denied.
    async fn request_permission(&self) -> bool;

    /// One position fix. Transient failures are `PositionUnavailable`;
    /// revoked access is `PermissionDenied`.
    async fn current_position(&self) -> Result<Coordinate>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Starting,
    Tracking,
    Stopped,
    Errored,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the sampler handle and its loop task.
struct Shared {
    state: Mutex<SamplerState>,
    generation: AtomicU64,
    /// Held while a callback runs
    gate: Mutex<()>,
    /// Thread currently running a callback, if any
    callback_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Run `f` if `generation` is still current. Returns whether the session
    /// is still current afterwards.
    fn deliver(&self, generation: u64, f: impl FnOnce()) -> bool {
        let _gate = lock(&self.gate);
        if !self.is_current(generation) {
            return false;
        }
        *lock(&self.callback_thread) = Some(thread::current().id());
        f();
        *lock(&self.callback_thread) = None;
        self.is_current(generation)
    }

    fn in_callback_on_this_thread(&self) -> bool {
        *lock(&self.callback_thread) == Some(thread::current().id())
    }
}

/// Cancellable periodic location sampler.
pub struct LocationSampler {
    provider: Arc<dyn PositionProvider>,
    position_timeout: Option<Duration>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationSampler {
    pub fn new(provider: Arc<dyn PositionProvider>) -> Self {
        Self {
            provider,
            position_timeout: None,
            shared: Arc::new(Shared {
                state: Mutex::new(SamplerState::Idle),
                generation: AtomicU64::new(0),
                gate: Mutex::new(()),
                callback_thread: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Sampler whose fetch timeout comes from `config`.
    pub fn with_config(provider: Arc<dyn PositionProvider>, config: &EngineConfig) -> Self {
        Self::new(provider).with_position_timeout(config.position_timeout())
    }

    /// Override the per-fetch timeout (default: half the interval).
    pub fn with_position_timeout(mut self, timeout: Duration) -> Self {
        self.position_timeout = Some(timeout);
        self
    }

    pub fn state(&self) -> SamplerState {
        *lock(&self.shared.state)
    }

    /// Request permission and start sampling `target` every `interval`.
    ///
    /// The first sample is taken immediately. Returns the resulting state.
    pub async fn start(
        &self,
        target: ProximityTarget,
        interval: Duration,
        on_sample: SampleCallback,
        on_error: ErrorCallback,
    ) -> SamplerState {
        let generation = {
            let mut state = lock(&self.shared.state);
            if matches!(*state, SamplerState::Starting | SamplerState::Tracking) {
                debug!("[Sampler] Already {:?}, ignoring start", *state);
                return *state;
            }
            *state = SamplerState::Starting;
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let interval = if interval.is_zero() {
            warn!(
                "[Sampler] Zero interval, using {:?}",
                DEFAULT_SAMPLE_INTERVAL
            );
            DEFAULT_SAMPLE_INTERVAL
        } else {
            interval
        };

        let granted = self.provider.request_permission().await;

        {
            let mut state = lock(&self.shared.state);
            if !self.shared.is_current(generation) {
                debug!("[Sampler] Stopped while requesting permission");
                return *state;
            }
            if !granted {
                *state = SamplerState::Errored;
                drop(state);
                warn!("[Sampler] Location permission denied");
                self.shared
                    .deliver(generation, || on_error(ProximityError::PermissionDenied));
                return SamplerState::Errored;
            }
            *state = SamplerState::Tracking;
        }

        let timeout = self.position_timeout.unwrap_or(interval / 2);
        info!(
            "[Sampler] Tracking every {:?} (fetch timeout {:?})",
            interval, timeout
        );

        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.provider),
            Arc::clone(&self.shared),
            generation,
            target,
            interval,
            timeout,
            on_sample,
            on_error,
        ));
        if let Some(previous) = lock(&self.task).replace(handle) {
            previous.abort();
        }
        SamplerState::Tracking
    }

    /// End the session. Idempotent.
    ///
    /// After this returns no callback from the ended session will run.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            if *state == SamplerState::Stopped {
                return;
            }
            *state = SamplerState::Stopped;
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }

        // Wait out a callback already running elsewhere
        if !self.shared.in_callback_on_this_thread() {
            drop(lock(&self.shared.gate));
        }
        info!("[Sampler] Stopped");
    }
}

impl Drop for LocationSampler {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    provider: Arc<dyn PositionProvider>,
    shared: Arc<Shared>,
    generation: u64,
    target: ProximityTarget,
    interval: Duration,
    fetch_timeout: Duration,
    on_sample: SampleCallback,
    on_error: ErrorCallback,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !shared.is_current(generation) {
            break;
        }

        let fix = match time::timeout(fetch_timeout, provider.current_position()).await {
            Ok(result) => result.and_then(Coordinate::validated),
            Err(_) => Err(ProximityError::PositionUnavailable {
                message: format!("no fix within {:?}", fetch_timeout),
            }),
        };

        let still_current = match fix {
            Ok(location) => {
                let sample =
                    ProximitySample::evaluate(location, &target, Local::now().naive_local());
                shared.deliver(generation, || on_sample(sample))
            }
            Err(e) if e.ends_session() => {
                warn!("[Sampler] Permission revoked, ending session");
                {
                    let mut state = lock(&shared.state);
                    if shared.is_current(generation) {
                        *state = SamplerState::Errored;
                    }
                }
                shared.deliver(generation, || on_error(e));
                false
            }
            Err(e) => {
                debug!("[Sampler] Skipping tick: {}", e);
                shared.deliver(generation, || on_error(e))
            }
        };

        if !still_current {
            break;
        }
    }
    debug!("[Sampler] Loop for generation {} exited", generation);
}
