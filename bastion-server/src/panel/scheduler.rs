// Render scheduling
//
// Every render trigger (timer, ping, membership or presence churn) ends up
// in one single-consumer queue of capacity one: a trigger arriving while a
// render is pending coalesces into it, so at most one follow-up render is
// ever queued. The worker owning the queue runs under a supervisor that
// restarts it with backoff if it panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::PanelCoordinator;
use crate::config::SchedulerConfig;
use crate::platform::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Queued,
    /// Folded into a render that was already pending
    Coalesced,
    /// The scheduler is gone
    Closed,
}

/// Cheap, cloneable way to ask for a panel render
#[derive(Clone)]
pub struct PanelHandle {
    tx: Sender<()>,
    force_presence: Arc<AtomicBool>,
}

impl PanelHandle {
    /// `force_presence` makes the next render resample the directory even
    /// if its last sample is recent.
    pub fn request(&self, force_presence: bool) -> RequestStatus {
        if force_presence {
            self.force_presence.store(true, Ordering::SeqCst);
        }
        match self.tx.try_send(()) {
            Ok(()) => RequestStatus::Queued,
            Err(TrySendError::Full(())) => RequestStatus::Coalesced,
            Err(TrySendError::Closed(())) => RequestStatus::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Cancelled, or every handle was dropped
    Stopped,
    GaveUp { restarts: u32 },
}

#[derive(Debug)]
enum Trigger {
    Tick,
    Requested,
}

pub struct PanelScheduler {
    coordinator: Arc<PanelCoordinator>,
    config: SchedulerConfig,
    /// Outlives individual workers so a restarted worker keeps the queue
    requests: Mutex<Receiver<()>>,
    force_presence: Arc<AtomicBool>,
}

impl PanelScheduler {
    pub fn new(coordinator: Arc<PanelCoordinator>, config: SchedulerConfig) -> (Self, PanelHandle) {
        let (tx, rx) = mpsc::channel(1);
        let force_presence = Arc::new(AtomicBool::new(false));
        let handle = PanelHandle {
            tx,
            force_presence: force_presence.clone(),
        };
        let scheduler = Self {
            coordinator,
            config,
            requests: Mutex::new(rx),
            force_presence,
        };
        (scheduler, handle)
    }

    /// Render loop: once at start, then on every tick or request.
    ///
    /// Cancellation is only observed between renders; a render that has
    /// started always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut requests = self.requests.lock().await;
        let mut interval = self.config.interval;
        let mut next_tick = Instant::now();
        let mut not_before: Option<Instant> = None;
        info!("Panel: render loop started");

        loop {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(()) => Trigger::Requested,
                    None => break,
                },
                _ = sleep_until(next_tick) => Trigger::Tick,
            };

            if let Some(at) = not_before {
                if Instant::now() < at {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = sleep_until(at) => {}
                    }
                }
            }

            let force = self.force_presence.swap(false, Ordering::SeqCst);
            debug!("Panel: {:?} render (force presence: {})", trigger, force);
            let result = self.coordinator.render(force).await;
            let finished = Instant::now();

            let mut spacing = self.config.min_spacing;
            match result {
                Ok(_) => interval = self.config.interval,
                Err(PlatformError::RateLimited { retry_after }) => {
                    interval = interval
                        .saturating_mul(2)
                        .max(retry_after)
                        .min(self.config.backoff_ceiling);
                    spacing = spacing.max(interval);
                    warn!("Panel: rate limited, next render in {:?}", interval);
                }
                // Already logged by the coordinator; retry on the next tick
                Err(_) => {}
            }
            next_tick = finished + interval;
            not_before = Some(finished + spacing);
        }

        info!("Panel: render loop stopped");
    }

    /// Run the loop in a task of its own and restart it if it panics, with
    /// doubling delays, up to `max_restarts` times.
    pub async fn supervise(self: Arc<Self>, cancel: CancellationToken) -> SupervisorExit {
        let mut restarts = 0u32;

        loop {
            let worker = self.clone();
            let token = cancel.clone();
            let task = tokio::spawn(async move { worker.run(token).await });

            match task.await {
                Ok(()) => return SupervisorExit::Stopped,
                Err(e) if e.is_panic() => {
                    if restarts >= self.config.max_restarts {
                        error!(
                            "Panel: render loop panicked {} times, giving up",
                            restarts + 1
                        );
                        return SupervisorExit::GaveUp { restarts };
                    }
                    let delay = self
                        .config
                        .restart_backoff
                        .saturating_mul(1 << restarts.min(10));
                    restarts += 1;
                    error!(
                        "Panel: render loop panicked, restarting in {:?} ({}/{})",
                        delay, restarts, self.config.max_restarts
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return SupervisorExit::Stopped,
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!("Panel: render loop task aborted: {}", e);
                    return SupervisorExit::Stopped;
                }
            }
        }
    }
}

/// Lets one event through per window and swallows the rest.
pub struct EventDebouncer {
    window: Duration,
    last_fired: StdMutex<Option<Instant>>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: StdMutex::new(None),
        }
    }

    /// `true` for the first call and then once the window has passed
    pub fn ready(&self) -> bool {
        let mut last = self.last_fired.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
