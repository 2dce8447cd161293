use crate::collectors::display::WmiMonitorSource;
use crate::collectors::gpu::{NvidiaSmiSource, VideoControllerSource};
use crate::collectors::{GpuSource, MonitorSource};
use crate::model::{GpuHealth, GpuSlots, StatusSnapshot};
use chrono::Local;
use tracing::{debug, warn};

pub const NO_DISPLAY_FOUND: &str = "no connected display found";
pub const GPU_ERROR_SLOT: &str = "gpu_error";

pub trait HardwareProbe: Send + Sync + 'static {
    fn probe(&self) -> StatusSnapshot;
}

pub struct SystemProbe {
    monitors: Box<dyn MonitorSource>,
    live_gpus: Box<dyn GpuSource>,
    driver_gpus: Box<dyn GpuSource>,
}

impl SystemProbe {
    pub fn new(
        monitors: Box<dyn MonitorSource>,
        live_gpus: Box<dyn GpuSource>,
        driver_gpus: Box<dyn GpuSource>,
    ) -> Self {
        Self {
            monitors,
            live_gpus,
            driver_gpus,
        }
    }

    pub fn host() -> Self {
        Self::new(
            Box::new(WmiMonitorSource),
            Box::new(NvidiaSmiSource),
            Box::new(VideoControllerSource),
        )
    }

    fn probe_gpus(&self) -> (GpuSlots, Option<String>) {
        match self.live_gpus.gpus() {
            Ok(gpus) if !gpus.is_empty() => return (GpuSlots::from_enumerated(gpus), None),
            Ok(_) => debug!(source = self.live_gpus.name(), "no gpus from live source"),
            Err(err) => debug!(
                source = self.live_gpus.name(),
                error = %err,
                "live gpu source unavailable"
            ),
        }

        match self.driver_gpus.gpus() {
            Ok(gpus) if !gpus.is_empty() => (GpuSlots::from_enumerated(gpus), None),
            Ok(_) => {
                let mut slots = GpuSlots::new();
                slots.insert(GpuSlots::slot_id(0), GpuHealth::not_found());
                (slots, None)
            }
            Err(err) => {
                warn!(source = self.driver_gpus.name(), error = %err, "gpu enumeration failed");
                let message = err.to_string();
                let mut slots = GpuSlots::new();
                slots.insert(GPU_ERROR_SLOT, GpuHealth::enumeration_failed(&message));
                (slots, Some(message))
            }
        }
    }
}

impl HardwareProbe for SystemProbe {
    fn probe(&self) -> StatusSnapshot {
        let timestamp = Local::now();

        let (displays, monitor_error) = match self.monitors.monitors() {
            Ok(displays) if displays.is_empty() => (displays, Some(NO_DISPLAY_FOUND.to_string())),
            Ok(displays) => (displays, None),
            Err(err) => {
                warn!(error = %err, "monitor enumeration failed");
                (Vec::new(), Some(err.to_string()))
            }
        };

        let (gpus, gpu_error) = self.probe_gpus();

        for d in &displays {
            debug!(
                instance = %d.instance_name,
                connection = %d.connection_type.name(),
                active = d.active,
                "display output"
            );
        }
        for (slot, gpu) in gpus.iter() {
            debug!(
                slot,
                name = %gpu.name,
                code = gpu.error_code,
                health = gpu.driver_health.as_str(),
                "graphics adapter"
            );
        }

        StatusSnapshot::assemble(timestamp, displays, gpus, monitor_error, gpu_error)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collectors::shell::CommandError;
    use crate::collectors::ProbeError;
    use crate::model::{ConnectionStatus, ConnectionType, DisplayConnection, DriverHealth};

    pub(crate) fn hdmi(active: bool) -> DisplayConnection {
        DisplayConnection {
            instance_name: "DISPLAY\\HDMI\\1".to_string(),
            connection_type: ConnectionType::Hdmi,
            active,
            status: ConnectionStatus::Ok,
        }
    }

    pub(crate) fn gpu(name: &str, code: i64) -> GpuHealth {
        GpuHealth {
            name: name.to_string(),
            status: if code == 0 { "OK" } else { "Error" }.to_string(),
            error_code: code,
            description: crate::model::error_description(code),
            driver_health: DriverHealth::derive(Some(code), if code == 0 { "OK" } else { "Error" }),
            driver_version: Some("1.0".to_string()),
            driver_date: None,
            load_percent: None,
            temperature_celsius: None,
            memory_used_mb: None,
            memory_total_mb: None,
        }
    }

    fn unsupported() -> ProbeError {
        ProbeError::Command(CommandError::Unsupported("powershell"))
    }

    struct FixedMonitors(Option<Vec<DisplayConnection>>);

    impl MonitorSource for FixedMonitors {
        fn monitors(&self) -> Result<Vec<DisplayConnection>, ProbeError> {
            self.0.clone().ok_or_else(unsupported)
        }
    }

    struct FixedGpus(Option<Vec<GpuHealth>>);

    impl GpuSource for FixedGpus {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn gpus(&self) -> Result<Vec<GpuHealth>, ProbeError> {
            self.0.clone().ok_or_else(unsupported)
        }
    }

    fn probe_with(
        monitors: Option<Vec<DisplayConnection>>,
        live: Option<Vec<GpuHealth>>,
        driver: Option<Vec<GpuHealth>>,
    ) -> SystemProbe {
        SystemProbe::new(
            Box::new(FixedMonitors(monitors)),
            Box::new(FixedGpus(live)),
            Box::new(FixedGpus(driver)),
        )
    }

    #[test]
    fn monitor_failure_keeps_gpu_data() {
        let snap = probe_with(None, None, Some(vec![gpu("Intel UHD", 0)])).probe();
        assert!(!snap.hdmi_connected);
        assert!(!snap.hdmi_active);
        assert!(snap.displays.is_empty());
        assert!(snap.monitor_error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(snap.gpus.iter().count(), 1);
        assert_eq!(snap.gpus.get("gpu_0").unwrap().name, "Intel UHD");
        assert_eq!(snap.gpu_error, None);
    }

    #[test]
    fn live_source_wins_when_it_finds_devices() {
        let mut live = gpu("RTX", 0);
        live.load_percent = Some(12.0);
        let snap = probe_with(
            Some(vec![hdmi(true)]),
            Some(vec![live]),
            Some(vec![gpu("GTX", 43)]),
        )
        .probe();
        assert!(snap.hdmi_connected && snap.hdmi_active);
        assert_eq!(snap.gpus.iter().count(), 1);
        assert_eq!(snap.gpus.get("gpu_0").unwrap().load_percent, Some(12.0));
    }

    #[test]
    fn falls_back_to_driver_source_when_live_is_empty() {
        let snap = probe_with(
            Some(vec![hdmi(false)]),
            Some(vec![]),
            Some(vec![gpu("A", 0), gpu("B", 43)]),
        )
        .probe();
        let ids: Vec<&str> = snap.gpus.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["gpu_0", "gpu_1"]);
        assert_eq!(snap.gpus.get("gpu_1").unwrap().error_code, 43);
    }

    #[test]
    fn no_gpu_anywhere_yields_placeholder() {
        let snap = probe_with(Some(vec![hdmi(true)]), None, Some(vec![])).probe();
        assert_eq!(snap.gpus.iter().count(), 1);
        let placeholder = snap.gpus.get("gpu_0").unwrap();
        assert_eq!(placeholder.error_code, -1);
        assert!(placeholder.description.contains("not found"));
        assert_eq!(snap.gpu_error, None);
    }

    #[test]
    fn gpu_enumeration_failure_is_recorded() {
        let snap = probe_with(Some(vec![hdmi(true)]), None, None).probe();
        assert!(snap.gpu_error.is_some());
        let slot = snap.gpus.get(GPU_ERROR_SLOT).unwrap();
        assert_eq!(slot.error_code, -1);
        assert_eq!(Some(slot.description.clone()), snap.gpu_error);
    }

    #[test]
    fn zero_monitors_is_observable_state() {
        let snap = probe_with(Some(vec![]), Some(vec![gpu("RTX", 0)]), None).probe();
        assert!(!snap.hdmi_connected);
        assert_eq!(snap.monitor_error.as_deref(), Some(NO_DISPLAY_FOUND));
    }
}
