use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::media::{IceCandidateInit, PeerConnection};
use crate::Result;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Presenter,
    Viewer,
}

impl PeerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerRole::Presenter => "presenter",
            PeerRole::Viewer => "viewer",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cleared when the owning session closes. Connection callbacks hold a copy
/// and check it before acting.
#[derive(Clone, Debug)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Liveness(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What happened to an inbound description or candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Applied,
    Buffered,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CandidateAction {
    Apply(IceCandidateInit),
    Buffered,
}

#[derive(Default)]
struct OutboundQueue {
    released: bool,
    pending: VecDeque<IceCandidateInit>,
}

/// Local candidates held back until the description they follow has been
/// published. Shared with the connection's candidate callback.
#[derive(Clone, Default)]
pub struct OutboundCandidates(Arc<Mutex<OutboundQueue>>);

impl OutboundCandidates {
    /// Passes `candidate` to `send` if the queue was released, otherwise
    /// keeps it. Returns whether it was sent.
    pub fn submit<F>(&self, candidate: IceCandidateInit, send: F) -> bool
    where
        F: FnOnce(IceCandidateInit),
    {
        let mut queue = self.0.lock();
        if queue.released {
            send(candidate);
            true
        } else {
            queue.pending.push_back(candidate);
            false
        }
    }

    /// Sends everything queued so far in arrival order. Later submissions
    /// go straight out.
    pub fn release<F>(&self, mut send: F) -> usize
    where
        F: FnMut(IceCandidateInit),
    {
        let mut queue = self.0.lock();
        queue.released = true;
        let mut sent = 0;
        while let Some(candidate) = queue.pending.pop_front() {
            send(candidate);
            sent += 1;
        }
        sent
    }

    pub fn pending(&self) -> usize {
        self.0.lock().pending.len()
    }

    fn clear(&self) {
        self.0.lock().pending.clear();
    }
}

/// State for one presenter/viewer pairing. Owns its connection handle
/// exclusively.
pub struct PeerSession {
    id: u64,
    participant_id: String,
    role: PeerRole,
    connection: Arc<dyn PeerConnection>,
    local_description_set: bool,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidateInit>,
    flushing: bool,
    outbound: OutboundCandidates,
    live: Liveness,
    opened_at: Instant,
}

impl PeerSession {
    pub fn new(participant_id: String, role: PeerRole, connection: Arc<dyn PeerConnection>) -> Self {
        PeerSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            participant_id,
            role,
            connection,
            local_description_set: false,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            flushing: false,
            outbound: OutboundCandidates::default(),
            live: Liveness::new(),
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn connection(&self) -> Arc<dyn PeerConnection> {
        Arc::clone(&self.connection)
    }

    pub fn liveness(&self) -> Liveness {
        self.live.clone()
    }

    /// Queue for locally gathered candidates.
    pub fn outbound(&self) -> OutboundCandidates {
        self.outbound.clone()
    }

    pub fn is_closed(&self) -> bool {
        !self.live.is_live()
    }

    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn lifetime(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn mark_local_description_set(&mut self) {
        self.local_description_set = true;
    }

    /// Candidates buffered so far become due; `next_buffered` hands them
    /// out in arrival order.
    pub fn mark_remote_description_set(&mut self) {
        self.remote_description_set = true;
        self.flushing = !self.pending_candidates.is_empty();
    }

    /// Candidates received before the remote description, or while earlier
    /// ones are still being flushed, queue behind them.
    pub fn offer_candidate(&mut self, candidate: IceCandidateInit) -> CandidateAction {
        if !self.remote_description_set || self.flushing {
            self.pending_candidates.push_back(candidate);
            CandidateAction::Buffered
        } else {
            CandidateAction::Apply(candidate)
        }
    }

    pub fn next_buffered(&mut self) -> Option<IceCandidateInit> {
        let next = self.pending_candidates.pop_front();
        if next.is_none() {
            self.flushing = false;
        }
        next
    }

    /// Closes the connection handle once. Later calls return `Ok(false)`
    /// without touching the handle.
    pub fn close(&mut self) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        self.live.kill();
        self.pending_candidates.clear();
        self.flushing = false;
        self.outbound.clear();
        self.connection.close()?;
        Ok(true)
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("participant_id", &self.participant_id)
            .field("role", &self.role)
            .field("local_description_set", &self.local_description_set)
            .field("remote_description_set", &self.remote_description_set)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("outbound_candidates", &self.outbound.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Applies candidates handed out by `next` until it runs dry. `next` is
/// expected to re-check that the session is still current on every call.
pub(crate) async fn flush_candidates<F>(
    connection: &Arc<dyn PeerConnection>,
    mut next: F,
) -> Result<usize>
where
    F: FnMut() -> Option<IceCandidateInit>,
{
    let mut applied = 0;
    while let Some(candidate) = next() {
        connection.add_ice_candidate(candidate).await?;
        applied += 1;
    }
    Ok(applied)
}
