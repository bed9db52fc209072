//! Screen-share signaling for proctored exams: a presenter side that
//! captures and offers a whole screen, a viewer side that accepts one
//! stream per participant, and the room relay that carries the messages
//! between them.

pub mod bridge;
pub mod capture;
pub mod config;
pub mod error;
pub mod media;
pub mod metrics;
pub mod observer;
pub mod peer;
pub mod presenter;
pub mod relay;
pub mod room;
pub mod signaller_message;
pub mod state;
pub mod viewer;
pub mod ws_channel;

#[cfg(test)]
pub(crate) mod testing;

pub type Result<T> = std::result::Result<T, failure::Error>;

pub use bridge::{RelayChannel, RelayHandle, Routing, SignalingBridge};
pub use capture::{CaptureSource, DisplayCapture};
pub use error::{DropReason, ShareError};
pub use presenter::{PresenterController, PresenterState};
pub use signaller_message::{CandidateDirection, SignallerMessage};
pub use viewer::{Screen, TeardownReport, ViewerRegistry};
