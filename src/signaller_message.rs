use serde::{Deserialize, Serialize};

use crate::media::{IceCandidateInit, SessionDescription};
use crate::peer::PeerRole;

/// Which side a candidate is travelling towards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateDirection {
    ToPresenter,
    ToViewer,
}

impl CandidateDirection {
    /// The role expected to have sent a candidate travelling this way.
    pub fn sender(self) -> PeerRole {
        match self {
            CandidateDirection::ToPresenter => PeerRole::Viewer,
            CandidateDirection::ToViewer => PeerRole::Presenter,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SignallerMessage {
    Start {},
    StartResponse {
        room_id: String,
    },
    Join {
        room_id: String,
        participant_id: String,
    },
    JoinDeclined {
        participant_id: String,
        reason: String,
    },
    ScreenShareOffer {
        session_description: SessionDescription,
        room_id: String,
        participant_id: String,
    },
    ScreenShareAnswer {
        session_description: SessionDescription,
        room_id: String,
        participant_id: String,
    },
    // presenter hung up; also sent by the relay when a presenter leaves
    ScreenShareEnded {
        room_id: String,
        participant_id: String,
    },
    IceCandidate {
        candidate: IceCandidateInit,
        direction: CandidateDirection,
        room_id: String,
        participant_id: String,
        // stamped by the relay with the sender's role
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PeerRole>,
    },
    Leave {},
    CloseRoom {
        room_id: String,
    },
    RoomClosed {
        room_id: String,
    },
    ExamEnded {
        room_id: String,
    },
    SessionError {
        error: String,
    },
    KeepAlive {},
}

impl SignallerMessage {
    /// Wire name of the message, used for log lines and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            SignallerMessage::Start {} => "start",
            SignallerMessage::StartResponse { .. } => "start-response",
            SignallerMessage::Join { .. } => "join",
            SignallerMessage::JoinDeclined { .. } => "join-declined",
            SignallerMessage::ScreenShareOffer { .. } => "screen-share-offer",
            SignallerMessage::ScreenShareAnswer { .. } => "screen-share-answer",
            SignallerMessage::ScreenShareEnded { .. } => "screen-share-ended",
            SignallerMessage::IceCandidate { .. } => "ice-candidate",
            SignallerMessage::Leave {} => "leave",
            SignallerMessage::CloseRoom { .. } => "close-room",
            SignallerMessage::RoomClosed { .. } => "room-closed",
            SignallerMessage::ExamEnded { .. } => "exam-ended",
            SignallerMessage::SessionError { .. } => "session-error",
            SignallerMessage::KeepAlive {} => "keep-alive",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_uses_kebab_case_type_and_camel_case_fields() {
        let msg = SignallerMessage::ScreenShareOffer {
            session_description: SessionDescription::offer("v=0"),
            room_id: "ABCDE".into(),
            participant_id: "stud-42".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "screen-share-offer",
                "sessionDescription": { "type": "offer", "sdp": "v=0" },
                "roomId": "ABCDE",
                "participantId": "stud-42",
            })
        );
    }

    #[test]
    fn relayed_candidate_carries_sender_role() {
        let raw = r#"{
            "type": "ice-candidate",
            "candidate": { "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0 },
            "direction": "to-presenter",
            "roomId": "ABCDE",
            "participantId": "stud-42",
            "from": "viewer"
        }"#;
        let msg: SignallerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            SignallerMessage::IceCandidate {
                direction, from, candidate, ..
            } => {
                assert_eq!(direction, CandidateDirection::ToPresenter);
                assert_eq!(from, Some(PeerRole::Viewer));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn outbound_candidate_omits_from() {
        let msg = SignallerMessage::IceCandidate {
            candidate: IceCandidateInit::new("candidate:1"),
            direction: CandidateDirection::ToViewer,
            room_id: "ABCDE".into(),
            participant_id: "stud-42".into(),
            from: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("from").is_none());
        assert_eq!(value["direction"], "to-viewer");
    }

    #[test]
    fn direction_names_expected_sender() {
        assert_eq!(CandidateDirection::ToPresenter.sender(), PeerRole::Viewer);
        assert_eq!(CandidateDirection::ToViewer.sender(), PeerRole::Presenter);
    }

    #[test]
    fn hangup_names_the_presenter() {
        let raw = r#"{"type":"screen-share-ended","roomId":"ABCDE","participantId":"stud-42"}"#;
        let msg: SignallerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind(), "screen-share-ended");
        assert_eq!(
            msg,
            SignallerMessage::ScreenShareEnded {
                room_id: "ABCDE".into(),
                participant_id: "stud-42".into(),
            }
        );
    }
}
