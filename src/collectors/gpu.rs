use super::shell::{
    parse_f64_loose, parse_json_rows, parse_u64_loose, run_nvidia_smi, run_powershell,
};
use super::{GpuSource, ProbeError};
use crate::model::{error_description, DriverHealth, GpuHealth};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const VIDEO_CONTROLLER_QUERY: &str = "Get-CimInstance Win32_VideoController -ErrorAction Stop | Select-Object Name,Status,ConfigManagerErrorCode,DriverVersion,DriverDate | ConvertTo-Json -Compress";

#[derive(Debug, Default, Clone, Copy)]
pub struct NvidiaSmiSource;

impl GpuSource for NvidiaSmiSource {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn gpus(&self) -> Result<Vec<GpuHealth>, ProbeError> {
        let text = run_nvidia_smi(&[
            "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu",
            "--format=csv,noheader,nounits",
        ])?;
        Ok(parse_nvidia_smi(&text))
    }
}

pub fn parse_nvidia_smi(text: &str) -> Vec<GpuHealth> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(|v| v.trim()).collect();
            if parts.len() < 6 {
                return None;
            }

            Some(GpuHealth {
                name: parts[1].to_string(),
                status: "OK".to_string(),
                error_code: 0,
                description: error_description(0),
                driver_health: DriverHealth::Normal,
                driver_version: None,
                driver_date: None,
                load_percent: Some(parse_f64_loose(parts[2]).unwrap_or(0.0)),
                temperature_celsius: parse_f64_loose(parts[5]),
                memory_used_mb: Some(parse_u64_loose(parts[3]).unwrap_or(0)),
                memory_total_mb: Some(parse_u64_loose(parts[4]).unwrap_or(0)),
            })
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VideoControllerSource;

#[derive(Debug, Deserialize)]
struct VideoControllerRow {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "ConfigManagerErrorCode")]
    config_manager_error_code: Option<i64>,
    #[serde(rename = "DriverVersion")]
    driver_version: Option<String>,
    #[serde(rename = "DriverDate")]
    driver_date: Option<serde_json::Value>,
}

impl GpuSource for VideoControllerSource {
    fn name(&self) -> &'static str {
        "Win32_VideoController"
    }

    fn gpus(&self) -> Result<Vec<GpuHealth>, ProbeError> {
        let text = run_powershell(VIDEO_CONTROLLER_QUERY)?;
        parse_video_controllers(&text)
    }
}

pub fn parse_video_controllers(text: &str) -> Result<Vec<GpuHealth>, ProbeError> {
    let rows: Vec<VideoControllerRow> =
        parse_json_rows(text).map_err(|source| ProbeError::Parse {
            what: "Win32_VideoController",
            source,
        })?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let status = row.status.unwrap_or_else(|| "Unknown".to_string());
            let driver_health = DriverHealth::derive(row.config_manager_error_code, &status);
            let error_code = row.config_manager_error_code.unwrap_or(-1);
            GpuHealth {
                name: row.name.unwrap_or_else(|| "Unknown GPU".to_string()),
                status,
                error_code,
                description: error_description(error_code),
                driver_health,
                driver_version: row.driver_version.filter(|v| !v.trim().is_empty()),
                driver_date: row.driver_date.as_ref().and_then(normalize_driver_date),
                load_percent: None,
                temperature_celsius: None,
                memory_used_mb: None,
                memory_total_mb: None,
            }
        })
        .collect())
}

/// Windows PowerShell renders CIM datetimes as `/Date(<millis>)/`; anything else is kept verbatim.
fn normalize_driver_date(value: &serde_json::Value) -> Option<String> {
    let raw = match value {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map.get("value").and_then(|v| v.as_str())?,
        _ => return None,
    };
    let millis = raw
        .trim()
        .trim_matches('/')
        .strip_prefix("Date(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|digits| digits.parse::<i64>().ok());
    match millis.and_then(DateTime::<Utc>::from_timestamp_millis) {
        Some(dt) => Some(dt.date_naive().format("%Y-%m-%d").to_string()),
        None if raw.trim().is_empty() => None,
        None => Some(raw.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvidia_smi_rows_carry_live_fields() {
        let text = "0, NVIDIA GeForce RTX 3060, 17, 1024, 12288, 48\n1, Broken line\n";
        let gpus = parse_nvidia_smi(text);
        assert_eq!(gpus.len(), 1);
        let gpu = &gpus[0];
        assert_eq!(gpu.name, "NVIDIA GeForce RTX 3060");
        assert_eq!(gpu.error_code, 0);
        assert_eq!(gpu.driver_health, DriverHealth::Normal);
        assert_eq!(gpu.driver_version, None);
        assert_eq!(gpu.load_percent, Some(17.0));
        assert_eq!(gpu.memory_used_mb, Some(1024));
        assert_eq!(gpu.memory_total_mb, Some(12288));
        assert_eq!(gpu.temperature_celsius, Some(48.0));
    }

    #[test]
    fn video_controller_error_code_maps_to_tier_and_description() {
        let text = r#"[
            {"Name":"Intel(R) UHD Graphics","Status":"OK","ConfigManagerErrorCode":0,"DriverVersion":"31.0.101.2111","DriverDate":"/Date(1672531200000)/"},
            {"Name":"NVIDIA GeForce GTX 1050","Status":"Error","ConfigManagerErrorCode":43,"DriverVersion":"","DriverDate":null},
            {"Name":null,"Status":null,"ConfigManagerErrorCode":null,"DriverVersion":null,"DriverDate":null}
        ]"#;
        let gpus = parse_video_controllers(text).unwrap();
        assert_eq!(gpus.len(), 3);

        assert_eq!(gpus[0].driver_health, DriverHealth::Normal);
        assert_eq!(gpus[0].driver_version.as_deref(), Some("31.0.101.2111"));
        assert_eq!(gpus[0].driver_date.as_deref(), Some("2023-01-01"));

        assert_eq!(gpus[1].error_code, 43);
        assert_eq!(gpus[1].driver_health, DriverHealth::Error);
        assert_eq!(gpus[1].description, error_description(43));
        assert_eq!(gpus[1].driver_version, None);

        assert_eq!(gpus[2].name, "Unknown GPU");
        assert_eq!(gpus[2].error_code, -1);
        assert_eq!(gpus[2].driver_health, DriverHealth::Unknown);
        assert_eq!(gpus[2].description, "unknown error code -1");
    }

    #[test]
    fn driver_date_passthrough_for_other_formats() {
        let v = serde_json::Value::String("20230101000000.000000-000".to_string());
        assert_eq!(
            normalize_driver_date(&v).as_deref(),
            Some("20230101000000.000000-000")
        );
        assert_eq!(normalize_driver_date(&serde_json::Value::Null), None);
    }
}
