//! Device picker
//!
//! The user-facing chooser shown when a printer cannot be re-acquired
//! silently. Autonomous contexts (kiosks, the CLI) use [`NoPicker`].

use async_trait::async_trait;
use crab_printer::DeviceCandidate;
use shared::models::PrinterKind;

#[async_trait]
pub trait DevicePicker: Send + Sync {
    /// Let the user choose one device; `None` means the user cancelled
    async fn pick(&self, kind: PrinterKind, candidates: Vec<DeviceCandidate>)
    -> Option<DeviceCandidate>;
}

/// Picker that always declines
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPicker;

#[async_trait]
impl DevicePicker for NoPicker {
    async fn pick(
        &self,
        _kind: PrinterKind,
        _candidates: Vec<DeviceCandidate>,
    ) -> Option<DeviceCandidate> {
        None
    }
}

/// Picker that takes the first candidate whose name starts with a prefix
///
/// For unattended setups where all printers share a model name.
#[derive(Debug, Clone)]
pub struct NamePrefixPicker {
    prefix: String,
}

impl NamePrefixPicker {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl DevicePicker for NamePrefixPicker {
    async fn pick(
        &self,
        _kind: PrinterKind,
        candidates: Vec<DeviceCandidate>,
    ) -> Option<DeviceCandidate> {
        candidates.into_iter().find(|c| {
            c.name
                .as_deref()
                .is_some_and(|name| name.starts_with(&self.prefix))
        })
    }
}
