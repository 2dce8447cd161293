use super::shell::{parse_json_rows, run_powershell};
use super::{MonitorSource, ProbeError};
use crate::model::{ConnectionStatus, ConnectionType, DisplayConnection};
use serde::Deserialize;

const MONITOR_QUERY: &str = "Get-CimInstance -Namespace root/wmi -ClassName WmiMonitorConnectionParams -ErrorAction Stop | Select-Object InstanceName,VideoOutputTechnology,Active | ConvertTo-Json -Compress";

#[derive(Debug, Default, Clone, Copy)]
pub struct WmiMonitorSource;

#[derive(Debug, Deserialize)]
struct MonitorRow {
    #[serde(rename = "InstanceName")]
    instance_name: Option<String>,
    #[serde(rename = "VideoOutputTechnology")]
    video_output_technology: Option<i64>,
    #[serde(rename = "Active")]
    active: Option<bool>,
}

impl MonitorSource for WmiMonitorSource {
    fn monitors(&self) -> Result<Vec<DisplayConnection>, ProbeError> {
        let text = run_powershell(MONITOR_QUERY)?;
        parse_monitor_rows(&text)
    }
}

pub fn parse_monitor_rows(text: &str) -> Result<Vec<DisplayConnection>, ProbeError> {
    let rows: Vec<MonitorRow> = parse_json_rows(text).map_err(|source| ProbeError::Parse {
        what: "WmiMonitorConnectionParams",
        source,
    })?;
    Ok(rows.into_iter().map(row_to_connection).collect())
}

fn row_to_connection(row: MonitorRow) -> DisplayConnection {
    let instance_name = row.instance_name.unwrap_or_else(|| "Unknown".to_string());
    match (row.video_output_technology, row.active) {
        (Some(code), Some(active)) => DisplayConnection {
            instance_name,
            connection_type: ConnectionType::from_code(code),
            active,
            status: ConnectionStatus::Ok,
        },
        (code, active) => {
            let missing = match (code, active) {
                (None, None) => "VideoOutputTechnology, Active",
                (None, _) => "VideoOutputTechnology",
                _ => "Active",
            };
            DisplayConnection {
                instance_name,
                connection_type: ConnectionType::Other(-1),
                active: false,
                status: ConnectionStatus::ProbeError {
                    message: format!("missing {missing}"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_hdmi_monitor() {
        let text = r#"{"InstanceName":"DISPLAY\\GSM5B7F\\4&1_0","VideoOutputTechnology":5,"Active":true}"#;
        let monitors = parse_monitor_rows(text).unwrap();
        assert_eq!(monitors.len(), 1);
        assert!(monitors[0].is_hdmi());
        assert!(monitors[0].active);
        assert_eq!(monitors[0].status, ConnectionStatus::Ok);
    }

    #[test]
    fn unreadable_row_becomes_probe_error_entry() {
        let text = r#"[{"InstanceName":"A","VideoOutputTechnology":10,"Active":true},{"InstanceName":null,"VideoOutputTechnology":null,"Active":true}]"#;
        let monitors = parse_monitor_rows(text).unwrap();
        assert_eq!(monitors.len(), 2);
        assert_eq!(monitors[0].connection_type, ConnectionType::DisplayPort);
        assert_eq!(monitors[1].instance_name, "Unknown");
        assert_eq!(monitors[1].connection_type.code(), -1);
        assert!(!monitors[1].active);
        assert!(matches!(
            &monitors[1].status,
            ConnectionStatus::ProbeError { message } if message == "missing VideoOutputTechnology"
        ));
    }

    #[test]
    fn empty_output_means_no_monitors() {
        assert!(parse_monitor_rows("").unwrap().is_empty());
    }

    #[test]
    fn garbage_output_is_a_parse_error() {
        assert!(matches!(
            parse_monitor_rows("Get-CimInstance : Access denied"),
            Err(ProbeError::Parse { .. })
        ));
    }
}
