use std::fmt;

use failure::Fail;

/// Why an inbound message was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    NoChannel,
    NoConsumer,
    NoSession,
    WrongParticipant,
    WrongSender,
    OutOfOrder,
    NoRoomContext,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::NoChannel => "no_channel",
            DropReason::NoConsumer => "no_consumer",
            DropReason::NoSession => "no_session",
            DropReason::WrongParticipant => "wrong_participant",
            DropReason::WrongSender => "wrong_sender",
            DropReason::OutOfOrder => "out_of_order",
            DropReason::NoRoomContext => "no_room_context",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by the screen-share core.
///
/// Capture and negotiation failures end the current attempt and are shown to
/// the user of the initiating role. `StaleMessage` is a routing artifact of
/// normal teardown races and is never shown to anyone.
#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum ShareError {
    #[fail(display = "screen capture was denied: {}", _0)]
    CaptureDenied(String),

    #[fail(display = "please share your entire screen (got \"{}\")", label)]
    CaptureRejected { label: String },

    #[fail(display = "not ready to share: {}", _0)]
    NotReady(String),

    #[fail(display = "no relay channel is bound")]
    ChannelUnavailable,

    #[fail(
        display = "negotiation with {} failed: {}",
        participant_id, reason
    )]
    NegotiationFailed {
        participant_id: String,
        reason: String,
    },

    #[fail(display = "dropped stale {} ({})", kind, reason)]
    StaleMessage {
        kind: &'static str,
        reason: DropReason,
    },
}

impl ShareError {
    pub(crate) fn negotiation(participant_id: &str, err: failure::Error) -> Self {
        ShareError::NegotiationFailed {
            participant_id: participant_id.to_owned(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn stale(kind: &'static str, reason: DropReason) -> Self {
        ShareError::StaleMessage { kind, reason }
    }

    /// Whether the error belongs in the UI state of the initiating role.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, ShareError::StaleMessage { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failure::format_err;

    #[test]
    fn stale_messages_are_not_user_visible() {
        let stale = ShareError::stale("screen-share-answer", DropReason::NoSession);
        assert!(!stale.is_user_visible());
        assert_eq!(
            stale.to_string(),
            "dropped stale screen-share-answer (no_session)"
        );
        assert!(ShareError::ChannelUnavailable.is_user_visible());
        assert!(ShareError::CaptureDenied("denied".into()).is_user_visible());
    }

    #[test]
    fn negotiation_error_keeps_primitive_reason() {
        let err = ShareError::negotiation("stud-42", format_err!("bad sdp"));
        assert_eq!(
            err.to_string(),
            "negotiation with stud-42 failed: bad sdp"
        );
    }
}
