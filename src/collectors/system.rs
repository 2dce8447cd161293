use super::gpu::{NvidiaSmiSource, VideoControllerSource};
use super::GpuSource;
use chrono::{DateTime, Local};
use serde::Serialize;
use sysinfo::{ComponentExt, CpuExt, System, SystemExt};
use tracing::debug;

const CPU_SENSOR_MARKERS: [&str; 5] = ["cpu", "coretemp", "package", "tctl", "tdie"];
const BOARD_SENSOR_MARKERS: [&str; 3] = ["acpi", "system", "motherboard"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Local>,
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub temperatures: Temperatures,
    pub gpus: Vec<GpuUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuUsage {
    pub percent: f64,
    pub cores: usize,
    pub frequency_mhz: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Temperatures {
    pub cpu: Option<f64>,
    pub mainboard: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum GpuUsage {
    Live {
        name: String,
        load_percent: Option<f64>,
        memory_used_mb: Option<u64>,
        memory_total_mb: Option<u64>,
        temperature_celsius: Option<f64>,
    },
    Driver {
        name: String,
        driver_version: Option<String>,
        status: String,
    },
    Unavailable {
        error: String,
    },
}

pub fn collect_system(system: &mut System) -> SystemSnapshot {
    system.refresh_cpu();
    system.refresh_memory();
    system.refresh_components_list();
    system.refresh_components();

    let cpu = CpuUsage {
        percent: system.global_cpu_info().cpu_usage() as f64,
        cores: system.cpus().len(),
        frequency_mhz: system
            .cpus()
            .first()
            .map(|c| c.frequency())
            .filter(|f| *f > 0),
    };

    // sysinfo 0.29 reports memory in bytes.
    let memory = memory_usage(system.total_memory(), system.available_memory());

    let readings: Vec<(String, f64)> = system
        .components()
        .iter()
        .map(|c| (c.label().to_string(), c.temperature() as f64))
        .collect();
    let temperatures = classify_temperatures(&readings);

    let gpus = gpu_usage(&NvidiaSmiSource, &VideoControllerSource);

    SystemSnapshot {
        timestamp: Local::now(),
        cpu,
        memory,
        temperatures,
        gpus,
    }
}

fn memory_usage(total_bytes: u64, available_bytes: u64) -> MemoryUsage {
    let used_bytes = total_bytes.saturating_sub(available_bytes);
    let percent = if total_bytes > 0 {
        (used_bytes as f64 / total_bytes as f64) * 100.0
    } else {
        0.0
    };
    MemoryUsage {
        total_bytes,
        available_bytes,
        used_bytes,
        percent,
    }
}

fn classify_temperatures(readings: &[(String, f64)]) -> Temperatures {
    let valid: Vec<(String, f64)> = readings
        .iter()
        .filter(|(_, t)| *t > 0.0)
        .map(|(label, t)| (label.to_lowercase(), *t))
        .collect();
    if valid.is_empty() {
        return Temperatures {
            error: Some("no temperature sensors available on this host".to_string()),
            ..Temperatures::default()
        };
    }

    let find = |markers: &[&str]| {
        valid
            .iter()
            .find(|(label, _)| markers.iter().any(|m| label.contains(m)))
            .map(|(_, t)| *t)
    };
    Temperatures {
        cpu: find(&CPU_SENSOR_MARKERS),
        mainboard: find(&BOARD_SENSOR_MARKERS),
        error: None,
    }
}

fn gpu_usage(live: &dyn GpuSource, driver: &dyn GpuSource) -> Vec<GpuUsage> {
    match live.gpus() {
        Ok(gpus) if !gpus.is_empty() => {
            return gpus
                .into_iter()
                .map(|g| GpuUsage::Live {
                    name: g.name,
                    load_percent: g.load_percent,
                    memory_used_mb: g.memory_used_mb,
                    memory_total_mb: g.memory_total_mb,
                    temperature_celsius: g.temperature_celsius,
                })
                .collect();
        }
        Ok(_) => {}
        Err(err) => debug!(source = live.name(), error = %err, "live gpu usage unavailable"),
    }

    match driver.gpus() {
        Ok(gpus) if !gpus.is_empty() => gpus
            .into_iter()
            .map(|g| GpuUsage::Driver {
                name: g.name,
                driver_version: g.driver_version,
                status: g.status,
            })
            .collect(),
        Ok(_) => vec![GpuUsage::Unavailable {
            error: "no GPU data".to_string(),
        }],
        Err(err) => {
            debug!(source = driver.name(), error = %err, "driver gpu usage unavailable");
            vec![GpuUsage::Unavailable {
                error: "no GPU data".to_string(),
            }]
        }
    }
}
