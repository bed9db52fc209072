//! Observability hooks. The core reports what happened; implementations decide
//! whether that becomes a log line, a metric, or nothing.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{DropReason, ShareError};
use crate::peer::PeerRole;

#[allow(unused_variables)]
pub trait SignalingObserver: Send + Sync {
    fn session_opened(&self, role: PeerRole, participant_id: &str) {}
    fn session_closed(&self, role: PeerRole, participant_id: &str, lifetime: Duration) {}
    fn screen_available(&self, participant_id: &str) {}
    fn message_dropped(&self, kind: &str, reason: DropReason) {}
    fn capture_failed(&self, error: &ShareError) {}
    fn negotiation_failed(&self, role: PeerRole, participant_id: &str, error: &ShareError) {}
    fn close_failed(&self, role: PeerRole, participant_id: &str, error: &failure::Error) {}
    /// An answer was produced but there is no room to address it to.
    fn answer_withheld(&self, participant_id: &str) {}
    fn relay_bound(&self) {}
    fn relay_detached(&self) {}
}

/// Discards everything.
pub struct NoopObserver;

impl SignalingObserver for NoopObserver {}

pub struct LogObserver;

impl SignalingObserver for LogObserver {
    fn session_opened(&self, role: PeerRole, participant_id: &str) {
        info!("{} session opened for {}", role, participant_id);
    }

    fn session_closed(&self, role: PeerRole, participant_id: &str, lifetime: Duration) {
        info!(
            "{} session for {} closed after {:.1}s",
            role,
            participant_id,
            lifetime.as_secs_f64()
        );
    }

    fn screen_available(&self, participant_id: &str) {
        info!("Screen of {} is available", participant_id);
    }

    fn message_dropped(&self, kind: &str, reason: DropReason) {
        debug!("Dropped {} ({})", kind, reason.as_str());
    }

    fn capture_failed(&self, error: &ShareError) {
        warn!("Screen capture failed: {}", error);
    }

    fn negotiation_failed(&self, role: PeerRole, participant_id: &str, error: &ShareError) {
        warn!("{} negotiation with {} failed: {}", role, participant_id, error);
    }

    fn close_failed(&self, role: PeerRole, participant_id: &str, error: &failure::Error) {
        warn!(
            "Error closing {} connection for {}: {}",
            role, participant_id, error
        );
    }

    fn answer_withheld(&self, participant_id: &str) {
        warn!(
            "Answer for {} not sent: no room context yet",
            participant_id
        );
    }

    fn relay_bound(&self) {
        info!("Relay channel bound");
    }

    fn relay_detached(&self) {
        info!("Relay channel detached");
    }
}

/// Forwards every event to each inner observer in order.
pub struct FanOut(pub Vec<Arc<dyn SignalingObserver>>);

impl SignalingObserver for FanOut {
    fn session_opened(&self, role: PeerRole, participant_id: &str) {
        self.0.iter().for_each(|o| o.session_opened(role, participant_id));
    }

    fn session_closed(&self, role: PeerRole, participant_id: &str, lifetime: Duration) {
        self.0
            .iter()
            .for_each(|o| o.session_closed(role, participant_id, lifetime));
    }

    fn screen_available(&self, participant_id: &str) {
        self.0.iter().for_each(|o| o.screen_available(participant_id));
    }

    fn message_dropped(&self, kind: &str, reason: DropReason) {
        self.0.iter().for_each(|o| o.message_dropped(kind, reason));
    }

    fn capture_failed(&self, error: &ShareError) {
        self.0.iter().for_each(|o| o.capture_failed(error));
    }

    fn negotiation_failed(&self, role: PeerRole, participant_id: &str, error: &ShareError) {
        self.0
            .iter()
            .for_each(|o| o.negotiation_failed(role, participant_id, error));
    }

    fn close_failed(&self, role: PeerRole, participant_id: &str, error: &failure::Error) {
        self.0
            .iter()
            .for_each(|o| o.close_failed(role, participant_id, error));
    }

    fn answer_withheld(&self, participant_id: &str) {
        self.0.iter().for_each(|o| o.answer_withheld(participant_id));
    }

    fn relay_bound(&self) {
        self.0.iter().for_each(|o| o.relay_bound());
    }

    fn relay_detached(&self) {
        self.0.iter().for_each(|o| o.relay_detached());
    }
}
