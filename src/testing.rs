//! In-memory stand-ins for the media primitive, the capture backend and the
//! relay channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use failure::format_err;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::bridge::RelayChannel;
use crate::capture::DisplayCapture;
use crate::error::{DropReason, ShareError};
use crate::media::{
    IceCandidateInit, MediaStream, MediaTrack, PeerConnection, PeerConnectionFactory, RtcConfig,
    SessionDescription,
};
use crate::observer::SignalingObserver;
use crate::peer::PeerRole;
use crate::signaller_message::SignallerMessage;
use crate::Result;

static NEXT_TRACK: AtomicUsize = AtomicUsize::new(1);

pub struct FakeTrack {
    id: String,
    label: String,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(label: &str) -> Arc<FakeTrack> {
        Arc::new(FakeTrack {
            id: format!("track-{}", NEXT_TRACK.fetch_add(1, Ordering::Relaxed)),
            label: label.to_owned(),
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

pub fn as_media_tracks(tracks: Vec<Arc<FakeTrack>>) -> Vec<Arc<dyn MediaTrack>> {
    tracks
        .into_iter()
        .map(|t| t as Arc<dyn MediaTrack>)
        .collect()
}

pub fn screen_stream(label: &str) -> MediaStream {
    MediaStream::new("remote", as_media_tracks(vec![FakeTrack::new(label)]))
}

pub struct FakeCapture {
    outcome: std::result::Result<Vec<Arc<dyn MediaTrack>>, String>,
    gate: Option<Arc<Notify>>,
}

impl FakeCapture {
    pub fn granting(tracks: Vec<Arc<FakeTrack>>) -> Arc<FakeCapture> {
        Arc::new(FakeCapture {
            outcome: Ok(as_media_tracks(tracks)),
            gate: None,
        })
    }

    pub fn denying(reason: &str) -> Arc<FakeCapture> {
        Arc::new(FakeCapture {
            outcome: Err(reason.to_owned()),
            gate: None,
        })
    }

    /// Capture completes only after the returned gate is notified.
    pub fn gated(tracks: Vec<Arc<FakeTrack>>) -> (Arc<FakeCapture>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let capture = Arc::new(FakeCapture {
            outcome: Ok(as_media_tracks(tracks)),
            gate: Some(gate.clone()),
        });
        (capture, gate)
    }
}

#[async_trait]
impl DisplayCapture for FakeCapture {
    async fn request_display(&self) -> std::result::Result<MediaStream, ShareError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.outcome {
            Ok(tracks) => Ok(MediaStream::new("display", tracks.clone())),
            Err(reason) => Err(ShareError::CaptureDenied(reason.clone())),
        }
    }
}

#[derive(Default)]
struct FakePcState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidateInit>,
    attached: Vec<String>,
    on_track: Option<Arc<dyn Fn(MediaStream) + Send + Sync>>,
    on_candidate: Option<Arc<dyn Fn(IceCandidateInit) + Send + Sync>>,
    close_calls: usize,
    fail_offer: bool,
    fail_remote: bool,
    fail_candidates: bool,
    fail_close: bool,
    offer_gate: Option<Arc<Notify>>,
    remote_gate: Option<Arc<Notify>>,
}

pub struct FakePeerConnection {
    state: Mutex<FakePcState>,
}

impl FakePeerConnection {
    pub fn new() -> Arc<FakePeerConnection> {
        Arc::new(FakePeerConnection {
            state: Mutex::new(FakePcState::default()),
        })
    }

    pub fn fail_offer(&self) {
        self.state.lock().fail_offer = true;
    }

    pub fn fail_remote_description(&self) {
        self.state.lock().fail_remote = true;
    }

    pub fn fail_candidates(&self) {
        self.state.lock().fail_candidates = true;
    }

    pub fn fail_close(&self) {
        self.state.lock().fail_close = true;
    }

    pub fn gate_offer(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().offer_gate = Some(gate.clone());
        gate
    }

    pub fn gate_remote_description(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().remote_gate = Some(gate.clone());
        gate
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidateInit> {
        self.state.lock().applied.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn attached_tracks(&self) -> Vec<String> {
        self.state.lock().attached.clone()
    }

    /// Fires the local-candidate callback the way a gatherer would.
    pub fn emit_candidate(&self, candidate: IceCandidateInit) {
        let callback = self.state.lock().on_candidate.clone();
        if let Some(callback) = callback {
            callback(candidate);
        }
    }

    pub fn emit_track(&self, stream: MediaStream) {
        let callback = self.state.lock().on_track.clone();
        if let Some(callback) = callback {
            callback(stream);
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let gate = self.state.lock().offer_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.state.lock().fail_offer {
            return Err(format_err!("offer rejected"));
        }
        Ok(SessionDescription::offer("fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.state.lock().remote.is_none() {
            return Err(format_err!("no remote offer"));
        }
        Ok(SessionDescription::answer("fake-answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.state.lock().local = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let gate = self.state.lock().remote_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state.lock();
        if state.fail_remote {
            return Err(format_err!("remote description rejected"));
        }
        state.remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_candidates {
            return Err(format_err!("candidate rejected"));
        }
        if state.remote.is_none() {
            return Err(format_err!("candidate before remote description"));
        }
        state.applied.push(candidate);
        Ok(())
    }

    fn attach_media_tracks(&self, stream: &MediaStream) -> Result<()> {
        let mut state = self.state.lock();
        state
            .attached
            .extend(stream.tracks().iter().map(|t| t.id()));
        Ok(())
    }

    fn on_track(&self, callback: Box<dyn Fn(MediaStream) + Send + Sync>) {
        self.state.lock().on_track = Some(Arc::from(callback));
    }

    fn on_ice_candidate(&self, callback: Box<dyn Fn(IceCandidateInit) + Send + Sync>) {
        self.state.lock().on_candidate = Some(Arc::from(callback));
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if state.fail_close {
            return Err(format_err!("close failed"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    prepared: Mutex<VecDeque<Arc<FakePeerConnection>>>,
    created: Mutex<Vec<Arc<FakePeerConnection>>>,
    fail: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<FakeFactory> {
        Arc::new(FakeFactory::default())
    }

    /// The next `create` hands out this connection instead of a fresh one.
    pub fn prepare(&self, connection: Arc<FakePeerConnection>) {
        self.prepared.lock().push_back(connection);
    }

    pub fn fail_creation(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Arc<FakePeerConnection>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<FakePeerConnection>> {
        self.created.lock().last().cloned()
    }

    pub fn open_connections(&self) -> usize {
        self.created.lock().iter().filter(|c| !c.is_closed()).count()
    }
}

impl PeerConnectionFactory for FakeFactory {
    fn create(&self, _config: &RtcConfig) -> Result<Arc<dyn PeerConnection>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(format_err!("peer connection unavailable"));
        }
        let connection = self
            .prepared
            .lock()
            .pop_front()
            .unwrap_or_else(FakePeerConnection::new);
        self.created.lock().push(connection.clone());
        Ok(connection)
    }
}

#[derive(Default)]
pub struct FakeRelay {
    published: Mutex<Vec<SignallerMessage>>,
    subscribers: Mutex<Vec<UnboundedSender<SignallerMessage>>>,
    fail_publish: AtomicBool,
}

impl FakeRelay {
    pub fn new() -> Arc<FakeRelay> {
        Arc::new(FakeRelay::default())
    }

    pub fn published(&self) -> Vec<SignallerMessage> {
        self.published.lock().clone()
    }

    pub fn published_kinds(&self) -> Vec<&'static str> {
        self.published.lock().iter().map(|m| m.kind()).collect()
    }

    pub fn fail_publish(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    /// Delivers a message to every live subscriber.
    pub fn inject(&self, message: SignallerMessage) {
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(message.clone()).is_ok());
    }

    pub fn live_subscribers(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl RelayChannel for FakeRelay {
    fn publish(&self, message: SignallerMessage) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(format_err!("relay closed"));
        }
        self.published.lock().push(message);
        Ok(())
    }

    fn subscribe(&self) -> UnboundedReceiver<SignallerMessage> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl SignalingObserver for RecordingObserver {
    fn session_opened(&self, role: PeerRole, participant_id: &str) {
        self.record(format!("opened {} {}", role, participant_id));
    }

    fn session_closed(&self, role: PeerRole, participant_id: &str, _lifetime: Duration) {
        self.record(format!("closed {} {}", role, participant_id));
    }

    fn message_dropped(&self, kind: &str, reason: DropReason) {
        self.record(format!("dropped {} {}", kind, reason.as_str()));
    }

    fn negotiation_failed(&self, role: PeerRole, participant_id: &str, _error: &ShareError) {
        self.record(format!("negotiation failed {} {}", role, participant_id));
    }

    fn close_failed(&self, role: PeerRole, participant_id: &str, _error: &failure::Error) {
        self.record(format!("close failed {} {}", role, participant_id));
    }

    fn answer_withheld(&self, participant_id: &str) {
        self.record(format!("answer withheld {}", participant_id));
    }
}

/// Lets spawned tasks run until they park.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
