//! Seams to the real-time media primitive.
//!
//! The peer-connection implementation (NAT traversal, DTLS, codecs) is not
//! part of this crate. Everything here is the capability set the signaling
//! core drives, plus the opaque payloads it shuttles across the relay.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Offer or answer payload. The `sdp` body is never inspected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network reachability hint, in the shape browsers serialise it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        IceCandidateInit {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Configuration handed to the peer-connection factory. Only STUN resolvers
/// are carried; relayed media is not configured here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        RtcConfig {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_owned()],
        }
    }
}

pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;
    /// Human readable source label as reported by the capture backend.
    fn label(&self) -> String;
    fn stop(&self);
    fn is_live(&self) -> bool;
}

#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        MediaStream {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

pub type CandidateCallback = Box<dyn Fn(IceCandidateInit) + Send + Sync>;
pub type TrackCallback = Box<dyn Fn(MediaStream) + Send + Sync>;

/// One peer connection. Implementations must make callbacks registered
/// through `on_track` / `on_ice_candidate` inert once `close` returns.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()>;
    fn attach_media_tracks(&self, stream: &MediaStream) -> Result<()>;
    fn on_track(&self, callback: TrackCallback);
    fn on_ice_candidate(&self, callback: CandidateCallback);
    fn close(&self) -> Result<()>;
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(&self, config: &RtcConfig) -> Result<Arc<dyn PeerConnection>>;
}
