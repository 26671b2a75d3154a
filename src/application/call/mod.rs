//! Call orchestration
//!
//! Everything one participant's call page needs: signaling, media,
//! the peer connection manager, presence, chat and the controller that
//! drives them, plus launching and incoming-call notification.

pub mod chat;
pub mod controller;
pub mod error;
pub mod launcher;
pub mod media;
pub mod notifier;
pub mod peer;
pub mod presence;
pub mod signaling;
pub mod state;
pub mod status;
pub mod toast;

pub use chat::ChatChannel;
pub use controller::{
    CallDependencies, CallHooks, CallSessionController, CallSettings, StartOutcome,
    SIGNALING_SETUP_ERROR,
};
pub use error::{CallError, CallResult};
pub use launcher::{CallLauncher, JoinedCall};
pub use media::{AcquiredMedia, MediaAcquirer};
pub use notifier::{IncomingCall, IncomingCallNotifier};
pub use peer::{
    DispatchOutcome, PeerConnectionManager, PeerEvent, PeerSettings, RetryPolicy,
    RETRY_EXHAUSTED_MESSAGE, SIGNALING_DATA_ERROR,
};
pub use presence::PresenceTracker;
pub use signaling::{SignalSender, SignalSink, SignalingTransport};
pub use state::CallSnapshot;
pub use status::StatusRecorder;
pub use toast::{ChannelToaster, LogToaster, Toast, ToastLevel, Toaster};
