use crate::bus::Bus;
use crate::collectors::system::collect_system;
use crate::metrics::Metrics;
use crate::poller::LONGEST_SLEEP;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{System, SystemExt};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub struct SystemSampler {
    interval: Duration,
    bus: Bus,
    metrics: Arc<Metrics>,
}

impl SystemSampler {
    pub fn new(interval: Duration, bus: Bus, metrics: Arc<Metrics>) -> Self {
        Self {
            interval,
            bus,
            metrics,
        }
    }

    pub async fn run(self, shutdown: Shutdown) {
        let mut stop = shutdown.subscribe();
        let mut system = Some(System::new());
        let mut ticker = tokio::time::interval(self.interval.min(LONGEST_SLEEP));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval = %humantime::format_duration(self.interval),
            "system sampler started"
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => {
                    info!("system sampler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let mut current = system.take().unwrap_or_else(System::new);
                    let sampled = tokio::task::spawn_blocking(move || {
                        let snapshot = collect_system(&mut current);
                        (current, snapshot)
                    })
                    .await;
                    match sampled {
                        Ok((returned, snapshot)) => {
                            system = Some(returned);
                            self.metrics.update_from_system(&snapshot);
                            self.bus.publish_system(Arc::new(snapshot));
                        }
                        Err(err) => {
                            // The System went down with the task; a fresh one is built next tick.
                            self.metrics.inc_subsystem_error("system");
                            warn!(error = %err, "system sample failed");
                        }
                    }
                }
            }
        }
    }
}
