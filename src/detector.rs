use crate::model::{EventKind, StatusSnapshot};
use std::sync::Arc;

/// True when HDMI flags differ, or a GPU slot is new or changed its error code.
/// Slots that disappeared do not count.
pub fn has_changed(previous: &StatusSnapshot, current: &StatusSnapshot) -> bool {
    if previous.hdmi_connected != current.hdmi_connected {
        return true;
    }
    if previous.hdmi_active != current.hdmi_active {
        return true;
    }

    current
        .gpus
        .iter()
        .any(|(id, gpu)| match previous.gpus.get(id) {
            Some(prev) => prev.error_code != gpu.error_code,
            None => true,
        })
}

pub fn classify(current: &StatusSnapshot) -> EventKind {
    if !current.hdmi_connected {
        return EventKind::HdmiDisconnected;
    }
    if !current.hdmi_active {
        return EventKind::HdmiInactive;
    }
    current
        .gpus
        .iter()
        .find(|(_, gpu)| gpu.error_code != 0)
        .map(|(_, gpu)| EventKind::GpuErrorCode(gpu.error_code))
        .unwrap_or(EventKind::Normal)
}

pub fn detect(previous: &StatusSnapshot, current: &StatusSnapshot) -> Option<EventKind> {
    has_changed(previous, current).then(|| classify(current))
}

pub fn notification_message(kind: EventKind, snapshot: &StatusSnapshot) -> String {
    match kind {
        EventKind::HdmiDisconnected => "HDMI cable was disconnected".to_string(),
        EventKind::HdmiInactive => "HDMI is connected but not active".to_string(),
        EventKind::GpuErrorCode(code) => snapshot
            .gpus
            .iter()
            .find(|(_, gpu)| gpu.error_code == code)
            .map(|(_, gpu)| {
                format!(
                    "Graphics adapter {} has a problem: {}",
                    gpu.name, gpu.description
                )
            })
            .unwrap_or_else(|| format!("Graphics adapter problem (code {code})")),
        EventKind::Normal => "HDMI connection is working normally again".to_string(),
    }
}

#[derive(Debug)]
pub struct Detector {
    last_accepted: Arc<StatusSnapshot>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    pub fn new() -> Self {
        Self {
            last_accepted: Arc::new(StatusSnapshot::baseline()),
        }
    }

    pub fn evaluate(&self, current: &StatusSnapshot) -> Option<EventKind> {
        detect(&self.last_accepted, current)
    }

    /// Call once the change produced by `evaluate` has been persisted.
    pub fn accept(&mut self, snapshot: Arc<StatusSnapshot>) {
        self.last_accepted = snapshot;
    }

    pub fn last_accepted(&self) -> &StatusSnapshot {
        &self.last_accepted
    }
}
