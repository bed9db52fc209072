//! Routes relay traffic to the presenter and viewer roles. The only part of
//! the core that touches the relay channel.

use std::sync::{Arc, Weak};

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::error::{DropReason, ShareError};
use crate::observer::{NoopObserver, SignalingObserver};
use crate::peer::Delivery;
use crate::presenter::PresenterController;
use crate::signaller_message::{CandidateDirection, SignallerMessage};
use crate::viewer::{TeardownReport, ViewerRegistry};
use crate::Result;

/// Room-scoped publish/subscribe transport.
pub trait RelayChannel: Send + Sync {
    fn publish(&self, message: SignallerMessage) -> Result<()>;
    /// Every subscriber receives every inbound message. Dropping the
    /// receiver unsubscribes.
    fn subscribe(&self) -> UnboundedReceiver<SignallerMessage>;
}

/// Shared slot holding the currently bound channel. Controllers publish
/// through it, the bridge swaps it on reconnect.
#[derive(Clone, Default)]
pub struct RelayHandle {
    slot: Arc<RwLock<Option<Arc<dyn RelayChannel>>>>,
}

impl RelayHandle {
    pub fn new() -> Self {
        RelayHandle::default()
    }

    pub fn bound(channel: Arc<dyn RelayChannel>) -> Self {
        let handle = RelayHandle::new();
        handle.bind(channel);
        handle
    }

    pub fn is_bound(&self) -> bool {
        self.slot.read().is_some()
    }

    pub fn bind(&self, channel: Arc<dyn RelayChannel>) -> Option<Arc<dyn RelayChannel>> {
        self.slot.write().replace(channel)
    }

    pub fn unbind(&self) -> Option<Arc<dyn RelayChannel>> {
        self.slot.write().take()
    }

    pub fn publish(&self, message: SignallerMessage) -> std::result::Result<(), ShareError> {
        let channel = self
            .slot
            .read()
            .clone()
            .ok_or(ShareError::ChannelUnavailable)?;
        channel
            .publish(message)
            .map_err(|_| ShareError::ChannelUnavailable)
    }
}

/// What the bridge did with one inbound message.
#[derive(Debug, PartialEq)]
pub enum Routing {
    Delivered(Delivery),
    TornDown(TeardownReport),
    ContextUpdated,
    Dropped(DropReason),
    Failed(ShareError),
    Ignored,
}

pub struct SignalingBridge {
    relay: RelayHandle,
    presenter: Option<Arc<PresenterController>>,
    viewer: Option<Arc<ViewerRegistry>>,
    observer: Arc<dyn SignalingObserver>,
    // dropping the sender stops the routing task of the previous channel
    router: Mutex<Option<oneshot::Sender<()>>>,
}

impl SignalingBridge {
    pub fn new(relay: RelayHandle) -> Self {
        SignalingBridge {
            relay,
            presenter: None,
            viewer: None,
            observer: Arc::new(NoopObserver),
            router: Mutex::new(None),
        }
    }

    pub fn with_presenter(mut self, presenter: Arc<PresenterController>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn with_viewer(mut self, viewer: Arc<ViewerRegistry>) -> Self {
        self.viewer = Some(viewer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SignalingObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    pub fn is_attached(&self) -> bool {
        self.router.lock().is_some()
    }

    /// Binds `channel` for publishing and routes everything it delivers.
    /// The previous channel's routing task stops once any message it is
    /// handling completes.
    pub fn rebind(self: &Arc<Self>, channel: Arc<dyn RelayChannel>) {
        let inbound = channel.subscribe();
        self.relay.bind(channel);
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(route_inbound(Arc::downgrade(self), inbound, stop_rx));
        // replacing drops the old sender
        *self.router.lock() = Some(stop_tx);
        self.observer.relay_bound();
    }

    pub fn detach(&self) {
        self.router.lock().take();
        if self.relay.unbind().is_some() {
            self.observer.relay_detached();
        }
    }

    pub async fn route(&self, message: SignallerMessage) -> Routing {
        let kind = message.kind();
        if !self.relay.is_bound() {
            return self.dropped(kind, DropReason::NoChannel);
        }
        match message {
            SignallerMessage::ScreenShareAnswer {
                session_description,
                participant_id,
                ..
            } => match &self.presenter {
                Some(presenter) => self.outcome(
                    kind,
                    presenter
                        .handle_answer(&participant_id, session_description)
                        .await,
                ),
                None => self.dropped(kind, DropReason::NoConsumer),
            },
            SignallerMessage::ScreenShareOffer {
                session_description,
                participant_id,
                ..
            } => match &self.viewer {
                Some(viewer) => self.outcome(
                    kind,
                    viewer.handle_offer(&participant_id, session_description).await,
                ),
                None => self.dropped(kind, DropReason::NoConsumer),
            },
            SignallerMessage::IceCandidate {
                candidate,
                direction,
                participant_id,
                from,
                ..
            } => {
                if from != Some(direction.sender()) {
                    return self.dropped(kind, DropReason::WrongSender);
                }
                match (direction, &self.presenter, &self.viewer) {
                    (CandidateDirection::ToPresenter, Some(presenter), _) => self.outcome(
                        kind,
                        presenter.handle_candidate(&participant_id, candidate).await,
                    ),
                    (CandidateDirection::ToViewer, _, Some(viewer)) => self.outcome(
                        kind,
                        viewer.handle_candidate(&participant_id, candidate).await,
                    ),
                    _ => self.dropped(kind, DropReason::NoConsumer),
                }
            }
            SignallerMessage::ScreenShareEnded { participant_id, .. } => match &self.viewer {
                Some(viewer) if viewer.remove_screen(&participant_id) => {
                    Routing::Delivered(Delivery::Applied)
                }
                Some(_) => self.dropped(kind, DropReason::NoSession),
                None => self.dropped(kind, DropReason::NoConsumer),
            },
            SignallerMessage::RoomClosed { .. } | SignallerMessage::ExamEnded { .. } => {
                if let Some(presenter) = &self.presenter {
                    presenter.on_room_ended();
                }
                let report = self
                    .viewer
                    .as_ref()
                    .map(|viewer| viewer.teardown_all())
                    .unwrap_or_default();
                Routing::TornDown(report)
            }
            SignallerMessage::StartResponse { room_id } => match &self.viewer {
                Some(viewer) => {
                    viewer.set_room(Some(room_id));
                    Routing::ContextUpdated
                }
                None => Routing::Ignored,
            },
            _ => Routing::Ignored,
        }
    }

    fn outcome(
        &self,
        kind: &'static str,
        result: std::result::Result<Delivery, ShareError>,
    ) -> Routing {
        match result {
            Ok(delivery) => Routing::Delivered(delivery),
            Err(ShareError::StaleMessage { reason, .. }) => self.dropped(kind, reason),
            // the owning role already recorded it
            Err(err) => Routing::Failed(err),
        }
    }

    fn dropped(&self, kind: &str, reason: DropReason) -> Routing {
        self.observer.message_dropped(kind, reason);
        Routing::Dropped(reason)
    }
}

async fn route_inbound(
    bridge: Weak<SignalingBridge>,
    mut inbound: UnboundedReceiver<SignallerMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let message = tokio::select! {
            _ = &mut stop => break,
            message = inbound.next() => match message {
                Some(message) => message,
                None => break,
            },
        };
        match bridge.upgrade() {
            Some(bridge) => {
                bridge.route(message).await;
            }
            None => break,
        }
    }
}
