//! Proctor side: one inbound peer session per presenting student.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bridge::RelayHandle;
use crate::error::{DropReason, ShareError};
use crate::media::{
    IceCandidateInit, MediaStream, PeerConnectionFactory, RtcConfig, SdpKind, SessionDescription,
};
use crate::observer::{NoopObserver, SignalingObserver};
use crate::peer::{flush_candidates, CandidateAction, Delivery, PeerRole, PeerSession};
use crate::signaller_message::{CandidateDirection, SignallerMessage};

/// A presenter's screen as currently rendered.
#[derive(Clone, Debug)]
pub struct Screen {
    pub participant_id: String,
    pub stream: MediaStream,
}

/// Outcome of a best-effort teardown. Close failures are diagnostics only.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub closed: usize,
    pub failures: Vec<(String, String)>,
}

struct ViewerEntry {
    session: PeerSession,
    stream: Option<MediaStream>,
}

#[derive(Default)]
struct ViewerState {
    room_id: Option<String>,
    entries: HashMap<String, ViewerEntry>,
}

impl ViewerState {
    fn current(&mut self, participant_id: &str, session_id: u64) -> Option<&mut PeerSession> {
        self.entries
            .get_mut(participant_id)
            .map(|e| &mut e.session)
            .filter(|s| s.id() == session_id && !s.is_closed())
    }
}

pub struct ViewerRegistry {
    relay: RelayHandle,
    factory: Arc<dyn PeerConnectionFactory>,
    rtc_config: RtcConfig,
    observer: Arc<dyn SignalingObserver>,
    state: Arc<Mutex<ViewerState>>,
}

impl ViewerRegistry {
    pub fn new(relay: RelayHandle, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        ViewerRegistry {
            relay,
            factory,
            rtc_config: RtcConfig::default(),
            observer: Arc::new(NoopObserver),
            state: Arc::new(Mutex::new(ViewerState::default())),
        }
    }

    pub fn with_rtc_config(mut self, rtc_config: RtcConfig) -> Self {
        self.rtc_config = rtc_config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SignalingObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn set_room(&self, room_id: Option<String>) {
        self.state.lock().room_id = room_id;
    }

    pub fn room_id(&self) -> Option<String> {
        self.state.lock().room_id.clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn has_session(&self, participant_id: &str) -> bool {
        self.state.lock().entries.contains_key(participant_id)
    }

    /// Screens whose media has arrived, ordered by participant.
    pub fn screens(&self) -> Vec<Screen> {
        let state = self.state.lock();
        let mut screens: Vec<Screen> = state
            .entries
            .iter()
            .filter_map(|(participant_id, entry)| {
                entry.stream.clone().map(|stream| Screen {
                    participant_id: participant_id.clone(),
                    stream,
                })
            })
            .collect();
        screens.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        screens
    }

    /// Negotiates a fresh session for `participant_id`, replacing any
    /// previous one. Without room context the session is still negotiated
    /// but the answer is not published.
    pub async fn handle_offer(
        &self,
        participant_id: &str,
        offer: SessionDescription,
    ) -> Result<Delivery, ShareError> {
        const KIND: &str = "screen-share-offer";
        if offer.kind != SdpKind::Offer {
            return Err(ShareError::stale(KIND, DropReason::OutOfOrder));
        }
        let connection = match self.factory.create(&self.rtc_config) {
            Ok(connection) => connection,
            Err(err) => {
                let err = ShareError::negotiation(participant_id, err);
                self.observer
                    .negotiation_failed(PeerRole::Viewer, participant_id, &err);
                return Err(err);
            }
        };

        let session_id = {
            let mut state = self.state.lock();
            if let Some(previous) = state.entries.remove(participant_id) {
                // close errors are reported to the observer by release
                let _ = self.release(previous.session);
            }
            let session =
                PeerSession::new(participant_id.to_owned(), PeerRole::Viewer, connection.clone());
            self.wire_callbacks(&session);
            let session_id = session.id();
            state.entries.insert(
                participant_id.to_owned(),
                ViewerEntry {
                    session,
                    stream: None,
                },
            );
            session_id
        };
        self.observer.session_opened(PeerRole::Viewer, participant_id);

        if let Err(err) = connection.set_remote_description(offer).await {
            return Err(self.fail(participant_id, session_id, err));
        }
        match self.state.lock().current(participant_id, session_id) {
            Some(session) => session.mark_remote_description_set(),
            None => return Err(ShareError::stale(KIND, DropReason::NoSession)),
        }

        let flushed = flush_candidates(&connection, || {
            self.state
                .lock()
                .current(participant_id, session_id)
                .and_then(|s| s.next_buffered())
        })
        .await;
        if let Err(err) = flushed {
            return Err(self.fail(participant_id, session_id, err));
        }

        let answer = match connection.create_answer().await {
            Ok(answer) => answer,
            Err(err) => return Err(self.fail(participant_id, session_id, err)),
        };
        if self.state.lock().current(participant_id, session_id).is_none() {
            return Err(ShareError::stale(KIND, DropReason::NoSession));
        }
        if let Err(err) = connection.set_local_description(answer.clone()).await {
            return Err(self.fail(participant_id, session_id, err));
        }

        let published = {
            let mut state = self.state.lock();
            let room_id = state.room_id.clone();
            match state.current(participant_id, session_id) {
                Some(session) => session.mark_local_description_set(),
                None => return Err(ShareError::stale(KIND, DropReason::NoSession)),
            }
            room_id.map(|room_id| {
                self.relay.publish(SignallerMessage::ScreenShareAnswer {
                    session_description: answer,
                    room_id,
                    participant_id: participant_id.to_owned(),
                })
            })
        };
        match published {
            None => {
                self.observer.answer_withheld(participant_id);
                Ok(Delivery::Applied)
            }
            Some(Ok(())) => Ok(Delivery::Applied),
            Some(Err(err)) => {
                self.drop_session(participant_id, session_id, &err);
                Err(err)
            }
        }
    }

    /// Applies or buffers a candidate sent by `participant_id`.
    pub async fn handle_candidate(
        &self,
        participant_id: &str,
        candidate: IceCandidateInit,
    ) -> Result<Delivery, ShareError> {
        let (session_id, connection, action) = {
            let mut state = self.state.lock();
            let session = match state.entries.get_mut(participant_id) {
                Some(entry) if !entry.session.is_closed() => &mut entry.session,
                _ => return Err(ShareError::stale("ice-candidate", DropReason::NoSession)),
            };
            (
                session.id(),
                session.connection(),
                session.offer_candidate(candidate),
            )
        };
        match action {
            CandidateAction::Buffered => Ok(Delivery::Buffered),
            CandidateAction::Apply(candidate) => match connection.add_ice_candidate(candidate).await {
                Ok(()) => Ok(Delivery::Applied),
                Err(err) => Err(self.fail(participant_id, session_id, err)),
            },
        }
    }

    /// Viewer-initiated teardown of one screen. Unknown identities are a
    /// no-op; returns whether a session was removed.
    pub fn remove_screen(&self, participant_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(participant_id) {
            Some(entry) => {
                // close errors are reported to the observer by release
                let _ = self.release(entry.session);
                true
            }
            None => false,
        }
    }

    /// Closes every session. Never fails as a whole; individual close errors
    /// are collected in the report.
    pub fn teardown_all(&self) -> TeardownReport {
        let entries: Vec<ViewerEntry> = {
            let mut state = self.state.lock();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        let mut report = TeardownReport::default();
        for entry in entries {
            let participant_id = entry.session.participant_id().to_owned();
            match self.release(entry.session) {
                Ok(()) => report.closed += 1,
                Err(err) => report.failures.push((participant_id, err.to_string())),
            }
        }
        report
    }

    fn wire_callbacks(&self, session: &PeerSession) {
        let connection = session.connection();
        let participant_id = session.participant_id().to_owned();
        let session_id = session.id();

        let state = Arc::downgrade(&self.state);
        let live = session.liveness();
        let observer = self.observer.clone();
        let pid = participant_id.clone();
        connection.on_track(Box::new(move |stream| {
            if !live.is_live() {
                return;
            }
            let stored = state.upgrade().map_or(false, |state| {
                let mut state = state.lock();
                match state.entries.get_mut(&pid) {
                    Some(entry) if entry.session.id() == session_id => {
                        entry.stream = Some(stream);
                        true
                    }
                    _ => false,
                }
            });
            if stored {
                observer.screen_available(&pid);
            }
        }));

        let state = Arc::downgrade(&self.state);
        let live = session.liveness();
        let observer = self.observer.clone();
        let relay = self.relay.clone();
        connection.on_ice_candidate(Box::new(move |candidate| {
            if !live.is_live() {
                return;
            }
            let room_id = state.upgrade().and_then(|state| state.lock().room_id.clone());
            let room_id = match room_id {
                Some(room_id) => room_id,
                None => {
                    observer.message_dropped("ice-candidate", DropReason::NoRoomContext);
                    return;
                }
            };
            let message = SignallerMessage::IceCandidate {
                candidate,
                direction: CandidateDirection::ToPresenter,
                room_id,
                participant_id: participant_id.clone(),
                from: None,
            };
            if relay.publish(message).is_err() {
                observer.message_dropped("ice-candidate", DropReason::NoChannel);
            }
        }));
    }

    fn fail(&self, participant_id: &str, session_id: u64, err: failure::Error) -> ShareError {
        let err = ShareError::negotiation(participant_id, err);
        self.drop_session(participant_id, session_id, &err);
        err
    }

    /// Removes the session if it is still the current one for the identity.
    fn drop_session(&self, participant_id: &str, session_id: u64, err: &ShareError) {
        let mut state = self.state.lock();
        if state.current(participant_id, session_id).is_some() {
            if let Some(entry) = state.entries.remove(participant_id) {
                // close errors are reported to the observer by release
                let _ = self.release(entry.session);
            }
        }
        drop(state);
        self.observer
            .negotiation_failed(PeerRole::Viewer, participant_id, err);
    }

    fn release(&self, mut session: PeerSession) -> Result<(), failure::Error> {
        let closed = session.close();
        if let Err(err) = &closed {
            self.observer
                .close_failed(PeerRole::Viewer, session.participant_id(), err);
        }
        self.observer.session_closed(
            PeerRole::Viewer,
            session.participant_id(),
            session.lifetime(),
        );
        closed.map(|_| ())
    }
}
