use crate::bus::Bus;
use crate::detector::{notification_message, Detector};
use crate::log_store::LogStore;
use crate::metrics::Metrics;
use crate::model::{LogEntry, StatusSnapshot};
use crate::notifier::NotificationDispatcher;
use crate::probe::HardwareProbe;
use crate::shutdown::Shutdown;
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const CYCLE_ERROR_TITLE: &str = "Monitoring error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    Idle,
    Sampling,
    Comparing,
    Persisting,
    Notifying,
    Sleeping,
    Stopped,
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("poller is stopped")]
    Stopped,
    #[error("probe cycle failed: {0}")]
    Cycle(String),
}

#[derive(Debug, Error)]
enum CycleError {
    #[error("probe task failed: {0}")]
    Probe(#[from] JoinError),
}

enum Command {
    ProbeNow(oneshot::Sender<Result<Arc<StatusSnapshot>, PollerError>>),
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub notification_title: String,
    pub notify_on_cycle_error: bool,
}

#[derive(Clone)]
pub struct PollerHandle {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<PollerPhase>,
}

impl PollerHandle {
    /// Runs one full cycle right away, including detection and logging, and returns its snapshot.
    pub async fn probe_now(&self) -> Result<Arc<StatusSnapshot>, PollerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ProbeNow(reply))
            .await
            .map_err(|_| PollerError::Stopped)?;
        rx.await.map_err(|_| PollerError::Stopped)?
    }

    pub fn phase(&self) -> PollerPhase {
        *self.phase.borrow()
    }
}

pub struct Poller {
    probe: Arc<dyn HardwareProbe>,
    detector: Detector,
    store: LogStore,
    dispatcher: NotificationDispatcher,
    bus: Bus,
    metrics: Arc<Metrics>,
    settings: PollerSettings,
    commands: mpsc::Receiver<Command>,
    phase: watch::Sender<PollerPhase>,
}

impl Poller {
    pub fn new(
        probe: Arc<dyn HardwareProbe>,
        store: LogStore,
        dispatcher: NotificationDispatcher,
        bus: Bus,
        metrics: Arc<Metrics>,
        settings: PollerSettings,
    ) -> (Self, PollerHandle) {
        let (commands_tx, commands) = mpsc::channel(8);
        let (phase, phase_rx) = watch::channel(PollerPhase::Idle);
        let poller = Self {
            probe,
            detector: Detector::new(),
            store,
            dispatcher,
            bus,
            metrics,
            settings,
            commands,
            phase,
        };
        let handle = PollerHandle {
            commands: commands_tx,
            phase: phase_rx,
        };
        (poller, handle)
    }

    pub async fn run(mut self, shutdown: Shutdown) {
        let mut stop = shutdown.subscribe();
        let mut commands_open = true;
        info!(
            interval = %humantime::format_duration(self.settings.interval),
            "display poller started"
        );

        'cycles: loop {
            if *stop.borrow() {
                break;
            }
            let _ = self.tick().await;
            if *stop.borrow() {
                break;
            }

            // The next cycle is armed only after the current one finished.
            self.set_phase(PollerPhase::Sleeping);
            let deadline = deadline_after(self.settings.interval);
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break 'cycles;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => break,
                    command = self.commands.recv(), if commands_open => match command {
                        Some(Command::ProbeNow(reply)) => {
                            debug!("manual probe requested");
                            let result = self.tick().await;
                            self.set_phase(PollerPhase::Sleeping);
                            let _ = reply.send(result);
                        }
                        None => commands_open = false,
                    },
                }
            }
        }

        self.set_phase(PollerPhase::Stopped);
        info!("display poller stopped");
    }

    async fn tick(&mut self) -> Result<Arc<StatusSnapshot>, PollerError> {
        match self.cycle().await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                self.metrics.inc_cycle_error();
                error!(error = %err, "probe cycle failed");
                if self.settings.notify_on_cycle_error {
                    self.dispatcher
                        .send(CYCLE_ERROR_TITLE, format!("Error in monitoring loop: {err}"));
                }
                Err(PollerError::Cycle(err.to_string()))
            }
        }
    }

    async fn cycle(&mut self) -> Result<Arc<StatusSnapshot>, CycleError> {
        self.set_phase(PollerPhase::Sampling);
        let probe = self.probe.clone();
        let snapshot = Arc::new(tokio::task::spawn_blocking(move || probe.probe()).await?);
        self.metrics.update_from_snapshot(&snapshot);
        self.bus.publish_status(snapshot.clone());

        self.set_phase(PollerPhase::Comparing);
        let Some(kind) = self.detector.evaluate(&snapshot) else {
            debug!(
                since = %self.detector.last_accepted().timestamp,
                "no change since last logged status"
            );
            return Ok(snapshot);
        };

        self.set_phase(PollerPhase::Persisting);
        let entry = LogEntry::new(Local::now(), (*snapshot).clone(), kind);
        let store = self.store.clone();
        let record = entry.clone();
        let persisted = match tokio::task::spawn_blocking(move || store.append(&record)).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(err) = persisted {
            // Baseline stays put so the next cycle reports the same change again.
            self.metrics.inc_persistence_failure();
            warn!(error = %err, kind = %kind, "failed to log status change");
            return Ok(snapshot);
        }

        self.detector.accept(snapshot.clone());
        self.metrics.inc_event_logged(kind);
        info!(
            kind = %kind,
            hdmi_connected = snapshot.hdmi_connected,
            hdmi_active = snapshot.hdmi_active,
            "status change logged"
        );
        self.bus.publish_entry(Arc::new(entry));

        self.set_phase(PollerPhase::Notifying);
        self.dispatcher.send(
            self.settings.notification_title.clone(),
            notification_message(kind, &snapshot),
        );
        Ok(snapshot)
    }

    fn set_phase(&self, phase: PollerPhase) {
        self.phase.send_replace(phase);
    }
}

// Intervals too large to add to the clock sleep this long and re-arm.
pub(crate) const LONGEST_SLEEP: Duration = Duration::from_secs(86_400 * 365);

fn deadline_after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval.min(LONGEST_SLEEP)).unwrap_or(now)
}
