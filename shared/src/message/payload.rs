use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{PrinterStatus, PrinterSummary};

// ==================== Notice Level ====================

/// 通知级别
///
/// The presentation layer renders these as non-blocking toasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

// ==================== Status Events ====================

/// What happened to a printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEventKind {
    Connecting,
    Connected,
    Reconnected,
    Disconnected,
    ConnectFailed,
    Cancelled,
    PrintSucceeded,
    PrintFailed,
    Forgotten,
}

impl StatusEventKind {
    /// Default notice level for this kind of event
    pub fn level(&self) -> NoticeLevel {
        match self {
            Self::Connecting | Self::Cancelled | Self::Forgotten => NoticeLevel::Info,
            Self::Connected | Self::Reconnected | Self::PrintSucceeded => NoticeLevel::Success,
            Self::Disconnected | Self::ConnectFailed | Self::PrintFailed => NoticeLevel::Warning,
        }
    }
}

impl fmt::Display for StatusEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::Disconnected => "disconnected",
            Self::ConnectFailed => "connect_failed",
            Self::Cancelled => "cancelled",
            Self::PrintSucceeded => "print_succeeded",
            Self::PrintFailed => "print_failed",
            Self::Forgotten => "forgotten",
        };
        write!(f, "{}", s)
    }
}

/// 状态变更通知 (管理器 -> 界面)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: StatusEventKind,
    pub printer: PrinterSummary,
    pub status: PrinterStatus,
    pub level: NoticeLevel,
    pub message: String,
}

impl StatusEvent {
    pub fn new(
        kind: StatusEventKind,
        printer: PrinterSummary,
        status: PrinterStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            printer,
            status,
            level: kind.level(),
            message: message.into(),
        }
    }
}
