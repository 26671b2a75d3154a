//! User-facing notifications

use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub level: ToastLevel,
}

impl Toast {
    pub fn new(title: impl Into<String>, description: impl Into<String>, level: ToastLevel) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            level,
        }
    }

    pub fn connected() -> Self {
        Self::new("Connected", "Call connected successfully", ToastLevel::Success)
    }

    pub fn connection_failed() -> Self {
        Self::new(
            "Connection Failed",
            "Failed to establish connection. Retrying...",
            ToastLevel::Warning,
        )
    }

    pub fn participant_joined() -> Self {
        Self::new(
            "Participant Joined",
            "The other participant has joined the call",
            ToastLevel::Info,
        )
    }

    pub fn participant_left() -> Self {
        Self::new(
            "Participant Left",
            "The other participant has left the call",
            ToastLevel::Info,
        )
    }

    pub fn call_error(message: impl Into<String>) -> Self {
        Self::new("Call Error", message, ToastLevel::Error)
    }

    pub fn incoming_call(caller_name: &str) -> Self {
        Self::new(
            "Incoming Call",
            format!("{} is calling you", caller_name),
            ToastLevel::Info,
        )
    }
}

/// Notification surface of the call UI
pub trait Toaster: Send + Sync {
    fn toast(&self, toast: Toast);
}

/// Writes toasts to the log
#[derive(Debug, Default, Clone)]
pub struct LogToaster;

impl Toaster for LogToaster {
    fn toast(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Error => error!(title = %toast.title, "{}", toast.description),
            ToastLevel::Warning => warn!(title = %toast.title, "{}", toast.description),
            ToastLevel::Info | ToastLevel::Success => {
                info!(title = %toast.title, "{}", toast.description)
            }
        }
    }
}

/// Forwards toasts to a receiver, for UIs and tests
#[derive(Debug, Clone)]
pub struct ChannelToaster {
    tx: mpsc::UnboundedSender<Toast>,
}

impl ChannelToaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Toaster for ChannelToaster {
    fn toast(&self, toast: Toast) {
        let _ = self.tx.send(toast);
    }
}
