use std::sync::Once;
use std::time::Duration;

use failure::format_err;
use lazy_static::lazy_static;
use log::error;
use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use warp::{Rejection, Reply};

use crate::error::{DropReason, ShareError};
use crate::observer::SignalingObserver;
use crate::peer::PeerRole;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    pub static ref NUM_CONNECTED_CLIENTS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("num_connected_clients", "Connected Clients"),
        &["hashed_ip"]
    )
    .expect("metric can be created");
    pub static ref NUM_OPEN_ROOMS: IntGauge =
        IntGauge::new("num_open_rooms", "Open Rooms").expect("metric can be created");
    pub static ref ROOM_DURATION_SEC: Histogram = Histogram::with_opts(
        HistogramOpts::new("room_duration_sec", "Room Duration Seconds").buckets(vec![
            1.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 90.0, 120.0, 180.0, 240.0,
            300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 43200.0, 86400.0,
        ])
    )
    .expect("metric can be created");
    pub static ref RELAYED_MESSAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("relayed_messages_total", "Messages received by the relay"),
        &["kind"]
    )
    .expect("metric can be created");
    pub static ref ACTIVE_PEER_SESSIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("active_peer_sessions", "Open Peer Sessions"),
        &["role"]
    )
    .expect("metric can be created");
    pub static ref NEGOTIATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("negotiation_failures_total", "Failed Negotiations"),
        &["role"]
    )
    .expect("metric can be created");
    pub static ref DROPPED_MESSAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("dropped_messages_total", "Stale Or Misrouted Messages"),
        &["kind", "reason"]
    )
    .expect("metric can be created");
    pub static ref CLOSE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("close_failures_total", "Peer Connection Close Failures"),
        &["role"]
    )
    .expect("metric can be created");
}

static REGISTER: Once = Once::new();

pub fn register() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(NUM_CONNECTED_CLIENTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(NUM_OPEN_ROOMS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(ROOM_DURATION_SEC.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(RELAYED_MESSAGES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_PEER_SESSIONS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(NEGOTIATION_FAILURES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(DROPPED_MESSAGES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CLOSE_FAILURES.clone()))
            .expect("collector can be registered");
    });
}

pub(crate) async fn metrics_handler() -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    let mut res = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    });

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("could not encode prometheus metrics: {}", e);
    };
    let res_custom = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("prometheus metrics could not be from_utf8'd: {}", e);
        String::default()
    });

    res.push_str(&res_custom);
    Ok(res)
}

pub fn hash_ip(ip: std::net::IpAddr, salt: &str) -> crate::Result<String> {
    use argon2::{
        password_hash::{PasswordHasher, SaltString},
        Argon2,
    };
    let salt = SaltString::from_b64(salt).map_err(|e| format_err!("invalid ip hash salt: {}", e))?;
    let hash = Argon2::default()
        .hash_password(ip.to_string().as_bytes(), &salt)
        .map_err(|e| format_err!("could not hash ip: {}", e))?;
    hash.hash
        .map(|output| output.to_string())
        .ok_or_else(|| format_err!("argon2 produced no hash"))
}

/// Feeds client-side signaling events into the registry.
pub struct MetricsObserver;

impl SignalingObserver for MetricsObserver {
    fn session_opened(&self, role: PeerRole, _participant_id: &str) {
        ACTIVE_PEER_SESSIONS
            .with_label_values(&[role.as_str()])
            .inc();
    }

    fn session_closed(&self, role: PeerRole, _participant_id: &str, _lifetime: Duration) {
        ACTIVE_PEER_SESSIONS
            .with_label_values(&[role.as_str()])
            .dec();
    }

    fn message_dropped(&self, kind: &str, reason: DropReason) {
        DROPPED_MESSAGES
            .with_label_values(&[kind, reason.as_str()])
            .inc();
    }

    fn negotiation_failed(&self, role: PeerRole, _participant_id: &str, _error: &ShareError) {
        NEGOTIATION_FAILURES
            .with_label_values(&[role.as_str()])
            .inc();
    }

    fn close_failed(&self, role: PeerRole, _participant_id: &str, _error: &failure::Error) {
        CLOSE_FAILURES.with_label_values(&[role.as_str()]).inc();
    }
}
