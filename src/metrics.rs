use crate::collectors::system::{GpuUsage, SystemSnapshot};
use crate::model::{EventKind, StatusSnapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub probe_cycles_total: Counter,
    pub cycle_errors_total: Counter,
    pub subsystem_errors_total: CounterVec,
    pub events_logged_total: CounterVec,
    pub persistence_failures_total: Counter,
    pub notifications_total: CounterVec,
    pub hdmi_connected: Gauge,
    pub hdmi_active: Gauge,
    pub display_count: Gauge,
    pub gpu_error_code: GaugeVec,
    pub last_probe_timestamp_seconds: Gauge,
    pub cpu_usage_percent: Gauge,
    pub cpu_core_count: Gauge,
    pub memory_used_bytes: Gauge,
    pub memory_total_bytes: Gauge,
    pub memory_usage_percent: Gauge,
    pub temperature_celsius: GaugeVec,
    pub gpu_utilization_percent: GaugeVec,
    pub gpu_temperature_celsius: GaugeVec,
    pub uptime_seconds: Gauge,
    pub scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let probe_cycles_total = Counter::with_opts(opts!(
            "hdmiwatch_probe_cycles_total",
            "Completed display and driver probe cycles"
        ))?;
        let cycle_errors_total = Counter::with_opts(opts!(
            "hdmiwatch_cycle_errors_total",
            "Probe cycles aborted by an unexpected error"
        ))?;
        let subsystem_errors_total = CounterVec::new(
            opts!(
                "hdmiwatch_subsystem_errors_total",
                "Probe subsystem failures recorded on snapshots"
            ),
            &["subsystem"],
        )?;
        let events_logged_total = CounterVec::new(
            opts!("hdmiwatch_events_logged_total", "Logged status changes by kind"),
            &["kind"],
        )?;
        let persistence_failures_total = Counter::with_opts(opts!(
            "hdmiwatch_persistence_failures_total",
            "Event log appends that failed"
        ))?;
        let notifications_total = CounterVec::new(
            opts!(
                "hdmiwatch_notifications_total",
                "Desktop notifications by outcome (sent, failed, dropped)"
            ),
            &["outcome"],
        )?;
        let hdmi_connected = Gauge::with_opts(opts!(
            "hdmiwatch_hdmi_connected",
            "1 when an HDMI output is enumerated"
        ))?;
        let hdmi_active = Gauge::with_opts(opts!(
            "hdmiwatch_hdmi_active",
            "1 when an HDMI output is enumerated and active"
        ))?;
        let display_count = Gauge::with_opts(opts!(
            "hdmiwatch_display_count",
            "Enumerated display outputs"
        ))?;
        let gpu_error_code = GaugeVec::new(
            opts!(
                "hdmiwatch_gpu_error_code",
                "Configuration manager error code by GPU slot"
            ),
            &["slot", "name"],
        )?;
        let last_probe_timestamp_seconds = Gauge::with_opts(opts!(
            "hdmiwatch_last_probe_timestamp_seconds",
            "Unix time of the latest probe"
        ))?;
        let cpu_usage_percent = Gauge::with_opts(opts!(
            "hdmiwatch_cpu_usage_percent",
            "Global CPU usage in percent (0..100)"
        ))?;
        let cpu_core_count =
            Gauge::with_opts(opts!("hdmiwatch_cpu_core_count", "Logical CPU cores"))?;
        let memory_used_bytes =
            Gauge::with_opts(opts!("hdmiwatch_memory_used_bytes", "Used memory in bytes"))?;
        let memory_total_bytes = Gauge::with_opts(opts!(
            "hdmiwatch_memory_total_bytes",
            "Total memory in bytes"
        ))?;
        let memory_usage_percent = Gauge::with_opts(opts!(
            "hdmiwatch_memory_usage_percent",
            "Memory usage in percent"
        ))?;
        let temperature_celsius = GaugeVec::new(
            opts!(
                "hdmiwatch_temperature_celsius",
                "Temperature by sensor group in Celsius"
            ),
            &["sensor"],
        )?;
        let gpu_utilization_percent = GaugeVec::new(
            opts!(
                "hdmiwatch_gpu_utilization_percent",
                "GPU load in percent by name"
            ),
            &["name"],
        )?;
        let gpu_temperature_celsius = GaugeVec::new(
            opts!(
                "hdmiwatch_gpu_temperature_celsius",
                "GPU temperature in Celsius by name"
            ),
            &["name"],
        )?;
        let uptime_seconds =
            Gauge::with_opts(opts!("hdmiwatch_uptime_seconds", "Daemon uptime in seconds"))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "hdmiwatch_scrape_count_total",
            "Total /metrics scrapes"
        ))?;

        register(&registry, &probe_cycles_total)?;
        register(&registry, &cycle_errors_total)?;
        register(&registry, &subsystem_errors_total)?;
        register(&registry, &events_logged_total)?;
        register(&registry, &persistence_failures_total)?;
        register(&registry, &notifications_total)?;
        register(&registry, &hdmi_connected)?;
        register(&registry, &hdmi_active)?;
        register(&registry, &display_count)?;
        register(&registry, &gpu_error_code)?;
        register(&registry, &last_probe_timestamp_seconds)?;
        register(&registry, &cpu_usage_percent)?;
        register(&registry, &cpu_core_count)?;
        register(&registry, &memory_used_bytes)?;
        register(&registry, &memory_total_bytes)?;
        register(&registry, &memory_usage_percent)?;
        register(&registry, &temperature_celsius)?;
        register(&registry, &gpu_utilization_percent)?;
        register(&registry, &gpu_temperature_celsius)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            probe_cycles_total,
            cycle_errors_total,
            subsystem_errors_total,
            events_logged_total,
            persistence_failures_total,
            notifications_total,
            hdmi_connected,
            hdmi_active,
            display_count,
            gpu_error_code,
            last_probe_timestamp_seconds,
            cpu_usage_percent,
            cpu_core_count,
            memory_used_bytes,
            memory_total_bytes,
            memory_usage_percent,
            temperature_celsius,
            gpu_utilization_percent,
            gpu_temperature_celsius,
            uptime_seconds,
            scrape_count_total,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &StatusSnapshot) {
        self.probe_cycles_total.inc();
        self.hdmi_connected
            .set(if snapshot.hdmi_connected { 1.0 } else { 0.0 });
        self.hdmi_active
            .set(if snapshot.hdmi_active { 1.0 } else { 0.0 });
        self.display_count.set(snapshot.displays.len() as f64);

        // Slots are positional and names change between sources; stale series would linger.
        self.gpu_error_code.reset();
        for (slot, gpu) in snapshot.gpus.iter() {
            self.gpu_error_code
                .with_label_values(&[slot, gpu.name.as_str()])
                .set(gpu.error_code as f64);
        }

        if snapshot.monitor_error.is_some() {
            self.inc_subsystem_error("monitor");
        }
        if snapshot.gpu_error.is_some() {
            self.inc_subsystem_error("gpu");
        }
        self.last_probe_timestamp_seconds
            .set(snapshot.timestamp.timestamp() as f64);
    }

    pub fn update_from_system(&self, snapshot: &SystemSnapshot) {
        self.cpu_usage_percent.set(snapshot.cpu.percent);
        self.cpu_core_count.set(snapshot.cpu.cores as f64);
        self.memory_used_bytes
            .set(snapshot.memory.used_bytes as f64);
        self.memory_total_bytes
            .set(snapshot.memory.total_bytes as f64);
        self.memory_usage_percent.set(snapshot.memory.percent);

        if let Some(v) = snapshot.temperatures.cpu {
            self.temperature_celsius.with_label_values(&["cpu"]).set(v);
        }
        if let Some(v) = snapshot.temperatures.mainboard {
            self.temperature_celsius
                .with_label_values(&["mainboard"])
                .set(v);
        }

        for g in &snapshot.gpus {
            if let GpuUsage::Live {
                name,
                load_percent,
                temperature_celsius,
                ..
            } = g
            {
                if let Some(v) = load_percent {
                    self.gpu_utilization_percent
                        .with_label_values(&[name.as_str()])
                        .set(*v);
                }
                if let Some(v) = temperature_celsius {
                    self.gpu_temperature_celsius
                        .with_label_values(&[name.as_str()])
                        .set(*v);
                }
            }
        }
    }

    pub fn inc_cycle_error(&self) {
        self.cycle_errors_total.inc();
    }

    pub fn inc_subsystem_error(&self, subsystem: &str) {
        self.subsystem_errors_total
            .with_label_values(&[subsystem])
            .inc();
    }

    pub fn inc_event_logged(&self, kind: EventKind) {
        self.events_logged_total
            .with_label_values(&[kind.to_string().as_str()])
            .inc();
    }

    pub fn inc_persistence_failure(&self) {
        self.persistence_failures_total.inc();
    }

    pub fn inc_notification(&self, outcome: &str) {
        self.notifications_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs() as f64);
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GpuSlots;
    use crate::probe::tests::{gpu, hdmi};
    use chrono::Local;

    #[test]
    fn snapshot_gauges_follow_latest_probe() {
        let metrics = Metrics::new().unwrap();
        let mut gpus = GpuSlots::new();
        gpus.insert("gpu_0", gpu("RTX", 43));
        let snap = StatusSnapshot::assemble(
            Local::now(),
            vec![hdmi(false)],
            gpus,
            None,
            Some("boom".to_string()),
        );
        metrics.update_from_snapshot(&snap);

        assert_eq!(metrics.hdmi_connected.get(), 1.0);
        assert_eq!(metrics.hdmi_active.get(), 0.0);
        assert_eq!(
            metrics
                .gpu_error_code
                .with_label_values(&["gpu_0", "RTX"])
                .get(),
            43.0
        );
        assert_eq!(
            metrics
                .subsystem_errors_total
                .with_label_values(&["gpu"])
                .get(),
            1.0
        );

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("hdmiwatch_hdmi_connected 1"));
        assert!(text.contains("hdmiwatch_probe_cycles_total 1"));
    }

    #[test]
    fn event_kinds_are_labelled_by_their_log_name() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_event_logged(EventKind::GpuErrorCode(43));
        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains(r#"hdmiwatch_events_logged_total{kind="GPU_ERROR_CODE_43"} 1"#));
    }
}
