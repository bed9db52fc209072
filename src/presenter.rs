//! Student side: capture the screen and offer it to the room's viewer.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bridge::RelayHandle;
use crate::capture::CaptureSource;
use crate::error::{DropReason, ShareError};
use crate::media::{
    IceCandidateInit, MediaStream, PeerConnectionFactory, RtcConfig, SdpKind, SessionDescription,
};
use crate::observer::{NoopObserver, SignalingObserver};
use crate::peer::{flush_candidates, CandidateAction, Delivery, PeerRole, PeerSession};
use crate::signaller_message::{CandidateDirection, SignallerMessage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenterState {
    Idle,
    Capturing,
    Negotiating,
    Sharing,
}

/// Room and identity supplied by the room collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenterContext {
    pub room_id: Option<String>,
    pub participant_id: Option<String>,
}

struct Inner {
    state: PresenterState,
    context: PresenterContext,
    // bumped by every start and stop; async steps compare it on resume
    attempt: u64,
    room_id: Option<String>,
    session: Option<PeerSession>,
    stream: Option<MediaStream>,
    last_error: Option<String>,
}

impl Inner {
    fn current_session(&mut self, kind: &'static str) -> Result<&mut PeerSession, ShareError> {
        match self.session.as_mut() {
            Some(session) if !session.is_closed() => Ok(session),
            _ => Err(ShareError::stale(kind, DropReason::NoSession)),
        }
    }
}

pub struct PresenterController {
    relay: RelayHandle,
    capture: CaptureSource,
    factory: Arc<dyn PeerConnectionFactory>,
    rtc_config: RtcConfig,
    observer: Arc<dyn SignalingObserver>,
    inner: Mutex<Inner>,
}

impl PresenterController {
    pub fn new(
        relay: RelayHandle,
        capture: CaptureSource,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        PresenterController {
            relay,
            capture,
            factory,
            rtc_config: RtcConfig::default(),
            observer: Arc::new(NoopObserver),
            inner: Mutex::new(Inner {
                state: PresenterState::Idle,
                context: PresenterContext::default(),
                attempt: 0,
                room_id: None,
                session: None,
                stream: None,
                last_error: None,
            }),
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

    pub fn set_context(&self, room_id: Option<String>, participant_id: Option<String>) {
        self.inner.lock().context = PresenterContext {
            room_id,
            participant_id,
        };
    }

    pub fn context(&self) -> PresenterContext {
        self.inner.lock().context.clone()
    }

    pub fn state(&self) -> PresenterState {
        self.inner.lock().state
    }

    /// Local readiness only; the viewer may not have answered yet.
    pub fn is_sharing(&self) -> bool {
        self.state() == PresenterState::Sharing
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn has_session(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// Capture, build a peer session and publish an offer. Any previous or
    /// half-built session is discarded first.
    pub async fn start_share(&self) -> Result<(), ShareError> {
        let (attempt, room_id, participant_id, previous) = {
            let mut inner = self.inner.lock();
            let ready = if !self.relay.is_bound() {
                Err(ShareError::ChannelUnavailable)
            } else {
                match (&inner.context.room_id, &inner.context.participant_id) {
                    (None, _) => Err(ShareError::NotReady("missing room id".into())),
                    (_, None) => Err(ShareError::NotReady("missing participant id".into())),
                    (Some(room), Some(participant)) => Ok((room.clone(), participant.clone())),
                }
            };
            let (room_id, participant_id) = match ready {
                Ok(ids) => ids,
                Err(err) => {
                    inner.last_error = Some(err.to_string());
                    return Err(err);
                }
            };
            let previous = (inner.session.take(), inner.stream.take());
            inner.attempt += 1;
            inner.state = PresenterState::Capturing;
            inner.room_id = Some(room_id.clone());
            inner.last_error = None;
            (inner.attempt, room_id, participant_id, previous)
        };
        self.release(previous.0, previous.1);

        let stream = match self.capture.acquire().await {
            Ok(stream) => stream,
            Err(err) => {
                self.observer.capture_failed(&err);
                let mut inner = self.inner.lock();
                if inner.attempt == attempt {
                    inner.state = PresenterState::Idle;
                    inner.last_error = Some(err.to_string());
                }
                return Err(err);
            }
        };

        let connection = {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt {
                // stopped while the picker was open
                stream.stop_all();
                return Ok(());
            }
            inner.stream = Some(stream.clone());
            match self.factory.create(&self.rtc_config) {
                Ok(connection) => {
                    let session = PeerSession::new(
                        participant_id.clone(),
                        PeerRole::Presenter,
                        connection.clone(),
                    );
                    self.publish_candidates(&session, room_id.clone());
                    inner.session = Some(session);
                    inner.state = PresenterState::Negotiating;
                    connection
                }
                Err(err) => {
                    drop(inner);
                    let err = ShareError::negotiation(&participant_id, err);
                    return Err(self.abandon(attempt, err));
                }
            }
        };
        self.observer
            .session_opened(PeerRole::Presenter, &participant_id);

        if let Err(err) = connection.attach_media_tracks(&stream) {
            return Err(self.abandon(attempt, ShareError::negotiation(&participant_id, err)));
        }
        let offer = match connection.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                return Err(self.abandon(attempt, ShareError::negotiation(&participant_id, err)))
            }
        };
        if self.inner.lock().attempt != attempt {
            return Ok(());
        }
        if let Err(err) = connection.set_local_description(offer.clone()).await {
            return Err(self.abandon(attempt, ShareError::negotiation(&participant_id, err)));
        }

        let published = {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt {
                return Ok(());
            }
            let published = self.relay.publish(SignallerMessage::ScreenShareOffer {
                session_description: offer,
                room_id: room_id.clone(),
                participant_id: participant_id.clone(),
            });
            if published.is_ok() {
                inner.state = PresenterState::Sharing;
                if let Some(session) = inner.session.as_mut() {
                    session.mark_local_description_set();
                    // candidates gathered while the offer was built go out after it
                    session.outbound().release(|candidate| {
                        send_candidate(&self.relay, &*self.observer, &room_id, &participant_id, candidate)
                    });
                }
            }
            published
        };
        published.map_err(|err| self.abandon(attempt, err))
    }

    /// Stops capture and closes the session, telling the viewer if it was
    /// offered the screen. Safe to call at any time and any number of times.
    pub fn stop_share(&self) {
        self.teardown(true);
    }

    /// Applies the viewer's answer to the current session. Answers for other
    /// identities, duplicates and answers to a torn down session are stale.
    pub async fn handle_answer(
        &self,
        participant_id: &str,
        description: SessionDescription,
    ) -> Result<Delivery, ShareError> {
        const KIND: &str = "screen-share-answer";
        if description.kind != SdpKind::Answer {
            return Err(ShareError::stale(KIND, DropReason::OutOfOrder));
        }
        let (attempt, connection) = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            let attempt = inner.attempt;
            let session = inner.current_session(KIND)?;
            if session.participant_id() != participant_id {
                return Err(ShareError::stale(KIND, DropReason::WrongParticipant));
            }
            let negotiating =
                matches!(state, PresenterState::Negotiating | PresenterState::Sharing);
            if !negotiating
                || !session.local_description_set()
                || session.remote_description_set()
            {
                return Err(ShareError::stale(KIND, DropReason::OutOfOrder));
            }
            (attempt, session.connection())
        };

        if let Err(err) = connection.set_remote_description(description).await {
            return Err(self.abandon(attempt, ShareError::negotiation(participant_id, err)));
        }
        {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt {
                return Err(ShareError::stale(KIND, DropReason::NoSession));
            }
            inner.current_session(KIND)?.mark_remote_description_set();
        }

        let flushed = flush_candidates(&connection, || {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt {
                return None;
            }
            inner
                .session
                .as_mut()
                .filter(|s| !s.is_closed())
                .and_then(|s| s.next_buffered())
        })
        .await;
        match flushed {
            Ok(_) => Ok(Delivery::Applied),
            Err(err) => Err(self.abandon(attempt, ShareError::negotiation(participant_id, err))),
        }
    }

    /// Applies or buffers a candidate sent by the viewer.
    pub async fn handle_candidate(
        &self,
        participant_id: &str,
        candidate: IceCandidateInit,
    ) -> Result<Delivery, ShareError> {
        const KIND: &str = "ice-candidate";
        let (attempt, connection, action) = {
            let mut inner = self.inner.lock();
            let attempt = inner.attempt;
            let session = inner.current_session(KIND)?;
            if session.participant_id() != participant_id {
                return Err(ShareError::stale(KIND, DropReason::WrongParticipant));
            }
            (attempt, session.connection(), session.offer_candidate(candidate))
        };
        match action {
            CandidateAction::Buffered => Ok(Delivery::Buffered),
            CandidateAction::Apply(candidate) => match connection.add_ice_candidate(candidate).await {
                Ok(()) => Ok(Delivery::Applied),
                Err(err) => {
                    Err(self.abandon(attempt, ShareError::negotiation(participant_id, err)))
                }
            },
        }
    }

    /// Room closed or exam ended: media goes away with it. The viewer is
    /// already tearing down, so nothing is announced.
    pub fn on_room_ended(&self) {
        self.teardown(false);
    }

    fn teardown(&self, announce: bool) {
        let (session, stream, room_id) = {
            let mut inner = self.inner.lock();
            inner.attempt += 1;
            inner.state = PresenterState::Idle;
            inner.last_error = None;
            (inner.session.take(), inner.stream.take(), inner.room_id.take())
        };
        if announce {
            self.announce_end(session.as_ref(), room_id);
        }
        self.release(session, stream);
    }

    /// Publishes `screen-share-ended` for a session whose offer went out.
    fn announce_end(&self, session: Option<&PeerSession>, room_id: Option<String>) {
        let (session, room_id) = match (session, room_id) {
            (Some(session), Some(room_id)) => (session, room_id),
            _ => return,
        };
        if session.is_closed() || !session.local_description_set() {
            return;
        }
        let ended = SignallerMessage::ScreenShareEnded {
            room_id,
            participant_id: session.participant_id().to_owned(),
        };
        if self.relay.publish(ended).is_err() {
            self.observer
                .message_dropped("screen-share-ended", DropReason::NoChannel);
        }
    }

    fn publish_candidates(&self, session: &PeerSession, room_id: String) {
        let relay = self.relay.clone();
        let observer = self.observer.clone();
        let live = session.liveness();
        let outbound = session.outbound();
        let participant_id = session.participant_id().to_owned();
        session
            .connection()
            .on_ice_candidate(Box::new(move |candidate| {
                if !live.is_live() {
                    return;
                }
                outbound.submit(candidate, |candidate| {
                    send_candidate(&relay, &*observer, &room_id, &participant_id, candidate)
                });
            }));
    }

    /// Tears down whatever the given attempt built and records the error,
    /// unless a newer start or stop already took over.
    fn abandon(&self, attempt: u64, err: ShareError) -> ShareError {
        let taken = {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt {
                None
            } else {
                inner.state = PresenterState::Idle;
                inner.last_error = Some(err.to_string());
                Some((inner.session.take(), inner.stream.take(), inner.room_id.take()))
            }
        };
        if let Some((session, stream, room_id)) = taken {
            if let Some(session) = &session {
                self.observer
                    .negotiation_failed(PeerRole::Presenter, session.participant_id(), &err);
            }
            self.announce_end(session.as_ref(), room_id);
            self.release(session, stream);
        }
        err
    }

    fn release(&self, session: Option<PeerSession>, stream: Option<MediaStream>) {
        if let Some(stream) = stream {
            stream.stop_all();
        }
        if let Some(mut session) = session {
            match session.close() {
                Ok(false) => return,
                Ok(true) => {}
                Err(err) => {
                    self.observer
                        .close_failed(PeerRole::Presenter, session.participant_id(), &err)
                }
            }
            self.observer.session_closed(
                PeerRole::Presenter,
                session.participant_id(),
                session.lifetime(),
            );
        }
    }
}

fn send_candidate(
    relay: &RelayHandle,
    observer: &dyn SignalingObserver,
    room_id: &str,
    participant_id: &str,
    candidate: IceCandidateInit,
) {
    let message = SignallerMessage::IceCandidate {
        candidate,
        direction: CandidateDirection::ToViewer,
        room_id: room_id.to_owned(),
        participant_id: participant_id.to_owned(),
        from: None,
    };
    if relay.publish(message).is_err() {
        observer.message_dropped("ice-candidate", DropReason::NoChannel);
    }
}
