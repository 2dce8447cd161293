use chrono::{DateTime, Local};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// `VideoOutputTechnology` code reported for an HDMI output.
pub const CONNECTION_TYPE_HDMI: i64 = 5;

const CONNECTION_TYPE_NAMES: &[(i64, &str)] = &[
    (0, "VGA (HD15)"),
    (1, "TV Composite"),
    (2, "TV S-Video"),
    (3, "TV Component (RGB)"),
    (4, "DVI"),
    (5, "HDMI"),
    (6, "LVDS"),
    (8, "D-Jpn"),
    (9, "SDI"),
    (10, "DisplayPort"),
    (11, "HDMI External"),
    (12, "Virtual"),
];

const ERROR_DESCRIPTIONS: &[(i64, &str)] = &[
    (0, "working normally"),
    (1, "device is not configured correctly"),
    (2, "Windows cannot load the driver for this device"),
    (3, "driver may be corrupted or the system is low on memory"),
    (4, "device is not working properly"),
    (22, "device is disabled"),
    (28, "no driver is installed for this device"),
    (43, "Windows stopped this device because it reported problems"),
];

pub fn error_description(code: i64) -> String {
    ERROR_DESCRIPTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, text)| (*text).to_string())
        .unwrap_or_else(|| format!("unknown error code {code}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum ConnectionType {
    Vga,
    Composite,
    SVideo,
    Component,
    Dvi,
    Hdmi,
    Lvds,
    DJpn,
    Sdi,
    DisplayPort,
    HdmiExternal,
    Virtual,
    Other(i64),
}

impl ConnectionType {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Vga,
            1 => Self::Composite,
            2 => Self::SVideo,
            3 => Self::Component,
            4 => Self::Dvi,
            CONNECTION_TYPE_HDMI => Self::Hdmi,
            6 => Self::Lvds,
            8 => Self::DJpn,
            9 => Self::Sdi,
            10 => Self::DisplayPort,
            11 => Self::HdmiExternal,
            12 => Self::Virtual,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Vga => 0,
            Self::Composite => 1,
            Self::SVideo => 2,
            Self::Component => 3,
            Self::Dvi => 4,
            Self::Hdmi => CONNECTION_TYPE_HDMI,
            Self::Lvds => 6,
            Self::DJpn => 8,
            Self::Sdi => 9,
            Self::DisplayPort => 10,
            Self::HdmiExternal => 11,
            Self::Virtual => 12,
            Self::Other(code) => code,
        }
    }

    pub fn name(self) -> String {
        let code = self.code();
        CONNECTION_TYPE_NAMES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| (*name).to_string())
            .unwrap_or_else(|| format!("Unknown ({code})"))
    }
}

impl From<i64> for ConnectionType {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

impl From<ConnectionType> for i64 {
    fn from(value: ConnectionType) -> Self {
        value.code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Ok,
    ProbeError { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConnection {
    pub instance_name: String,
    pub connection_type: ConnectionType,
    pub active: bool,
    pub status: ConnectionStatus,
}

impl DisplayConnection {
    pub fn is_hdmi(&self) -> bool {
        self.connection_type == ConnectionType::Hdmi
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverHealth {
    Normal,
    Warning,
    Error,
    Unknown,
}

impl DriverHealth {
    pub fn derive(error_code: Option<i64>, status: &str) -> Self {
        match error_code {
            None => Self::Unknown,
            Some(0) if status.eq_ignore_ascii_case("OK") => Self::Normal,
            Some(0) => Self::Warning,
            Some(_) => Self::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuHealth {
    pub name: String,
    pub status: String,
    pub error_code: i64,
    pub description: String,
    pub driver_health: DriverHealth,
    pub driver_version: Option<String>,
    pub driver_date: Option<String>,
    pub load_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_total_mb: Option<u64>,
}

impl GpuHealth {
    pub fn not_found() -> Self {
        Self {
            name: "No GPU found".to_string(),
            status: "Not found".to_string(),
            error_code: -1,
            description: "graphics adapter not found or data unavailable".to_string(),
            driver_health: DriverHealth::Error,
            driver_version: None,
            driver_date: None,
            load_percent: None,
            temperature_celsius: None,
            memory_used_mb: None,
            memory_total_mb: None,
        }
    }

    pub fn enumeration_failed(message: &str) -> Self {
        Self {
            name: "Error checking GPU".to_string(),
            status: "Error".to_string(),
            description: message.to_string(),
            ..Self::not_found()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuSlots(Vec<(String, GpuHealth)>);

impl GpuSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_id(index: usize) -> String {
        format!("gpu_{index}")
    }

    pub fn from_enumerated(gpus: Vec<GpuHealth>) -> Self {
        Self(
            gpus.into_iter()
                .enumerate()
                .map(|(i, g)| (Self::slot_id(i), g))
                .collect(),
        )
    }

    pub fn insert(&mut self, id: impl Into<String>, gpu: GpuHealth) {
        let id = id.into();
        match self.0.iter_mut().find(|(k, _)| *k == id) {
            Some((_, existing)) => *existing = gpu,
            None => self.0.push((id, gpu)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&GpuHealth> {
        self.0.iter().find(|(k, _)| k == id).map(|(_, g)| g)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GpuHealth)> {
        self.0.iter().map(|(k, g)| (k.as_str(), g))
    }
}

impl Serialize for GpuSlots {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, gpu) in &self.0 {
            map.serialize_entry(id, gpu)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GpuSlots {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SlotsVisitor;

        impl<'de> Visitor<'de> for SlotsVisitor {
            type Value = GpuSlots;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of gpu slot id to gpu health")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<GpuSlots, A::Error> {
                let mut slots = GpuSlots::new();
                while let Some((id, gpu)) = access.next_entry::<String, GpuHealth>()? {
                    slots.insert(id, gpu);
                }
                Ok(slots)
            }
        }

        deserializer.deserialize_map(SlotsVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Local>,
    pub hdmi_connected: bool,
    pub hdmi_active: bool,
    pub displays: Vec<DisplayConnection>,
    pub gpus: GpuSlots,
    pub monitor_error: Option<String>,
    pub gpu_error: Option<String>,
}

impl StatusSnapshot {
    pub fn assemble(
        timestamp: DateTime<Local>,
        displays: Vec<DisplayConnection>,
        gpus: GpuSlots,
        monitor_error: Option<String>,
        gpu_error: Option<String>,
    ) -> Self {
        let hdmi_connected = displays.iter().any(DisplayConnection::is_hdmi);
        let hdmi_active = displays.iter().any(|d| d.is_hdmi() && d.active);
        Self {
            timestamp,
            hdmi_connected,
            hdmi_active,
            displays,
            gpus,
            monitor_error,
            gpu_error,
        }
    }

    pub fn baseline() -> Self {
        Self::assemble(Local::now(), Vec::new(), GpuSlots::new(), None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventKind {
    Normal,
    HdmiDisconnected,
    HdmiInactive,
    GpuErrorCode(i64),
}

const GPU_ERROR_PREFIX: &str = "GPU_ERROR_CODE_";

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("NORMAL"),
            Self::HdmiDisconnected => f.write_str("HDMI_DISCONNECTED"),
            Self::HdmiInactive => f.write_str("HDMI_INACTIVE"),
            Self::GpuErrorCode(code) => write!(f, "{GPU_ERROR_PREFIX}{code}"),
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Self::Normal),
            "HDMI_DISCONNECTED" => Ok(Self::HdmiDisconnected),
            "HDMI_INACTIVE" => Ok(Self::HdmiInactive),
            other => other
                .strip_prefix(GPU_ERROR_PREFIX)
                .and_then(|code| code.parse::<i64>().ok())
                .map(Self::GpuErrorCode)
                .ok_or_else(|| format!("unknown event type '{other}'")),
        }
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for EventKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub status: StatusSnapshot,
    pub event_type: EventKind,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Local>, status: StatusSnapshot, event_type: EventKind) -> Self {
        Self {
            timestamp,
            status,
            event_type,
        }
    }
}
