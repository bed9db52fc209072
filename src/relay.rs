//! Room relay service: forwards screen-share signaling between a room's
//! viewer socket and its presenter sockets.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_channel::mpsc::unbounded;
use futures_util::{future, pin_mut, stream::TryStreamExt, StreamExt};
use log::{info, warn};
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::metrics;
use crate::peer::PeerRole;
use crate::room::{send, ConnectionId, Tx};
use crate::signaller_message::{CandidateDirection, SignallerMessage};
use crate::state::{State, StateType};
use crate::Result;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

fn handle_message(
    state: &mut State,
    connection: ConnectionId,
    tx: &Tx,
    msg: SignallerMessage,
) -> Result<()> {
    metrics::RELAYED_MESSAGES
        .with_label_values(&[msg.kind()])
        .inc();

    match msg {
        SignallerMessage::Start {} => {
            let room_id = state.open_room(connection, tx.clone())?;
            info!("New room: {}", room_id);
            send(tx, &SignallerMessage::StartResponse { room_id })?;
        }
        SignallerMessage::Join {
            room_id,
            participant_id,
        } => match state.join(connection, tx.clone(), &room_id, &participant_id) {
            Ok(()) => {
                info!("{} joined room {}", participant_id, room_id);
                send(
                    state.viewer(&room_id)?,
                    &SignallerMessage::Join {
                        room_id,
                        participant_id,
                    },
                )?;
            }
            Err(e) => {
                info!("Error joining room: {}", e);
                send(
                    tx,
                    &SignallerMessage::JoinDeclined {
                        participant_id,
                        reason: e.to_string(),
                    },
                )?;
            }
        },
        SignallerMessage::ScreenShareOffer {
            ref room_id,
            ref participant_id,
            ..
        } => {
            state.authorise(connection, room_id, PeerRole::Presenter, Some(participant_id))?;
            send(state.viewer(room_id)?, &msg)?;
        }
        SignallerMessage::ScreenShareEnded {
            ref room_id,
            ref participant_id,
        } => {
            state.authorise(connection, room_id, PeerRole::Presenter, Some(participant_id))?;
            info!("{} stopped sharing in room {}", participant_id, room_id);
            send(state.viewer(room_id)?, &msg)?;
        }
        SignallerMessage::ScreenShareAnswer {
            ref room_id,
            ref participant_id,
            ..
        } => {
            state.authorise(connection, room_id, PeerRole::Viewer, None)?;
            send(state.presenter(room_id, participant_id)?, &msg)?;
        }
        SignallerMessage::IceCandidate {
            candidate,
            direction,
            room_id,
            participant_id,
            from: _,
        } => {
            let sender = direction.sender();
            let own_id = match sender {
                PeerRole::Presenter => Some(participant_id.as_str()),
                PeerRole::Viewer => None,
            };
            state.authorise(connection, &room_id, sender, own_id)?;
            let target = match direction {
                CandidateDirection::ToViewer => state.viewer(&room_id)?,
                CandidateDirection::ToPresenter => state.presenter(&room_id, &participant_id)?,
            };
            send(
                target,
                &SignallerMessage::IceCandidate {
                    candidate,
                    direction,
                    room_id,
                    participant_id,
                    from: Some(sender),
                },
            )?;
        }
        SignallerMessage::CloseRoom { room_id } => {
            state.authorise(connection, &room_id, PeerRole::Viewer, None)?;
            state.close_room(&room_id)?;
        }
        SignallerMessage::ExamEnded { room_id } => {
            state.authorise(connection, &room_id, PeerRole::Viewer, None)?;
            info!("Exam ended in room {}", room_id);
            state.broadcast(&room_id, &SignallerMessage::ExamEnded { room_id: room_id.clone() })?;
        }
        SignallerMessage::Leave {} => {
            state.leave(connection);
        }
        SignallerMessage::KeepAlive {}
        | SignallerMessage::StartResponse { .. }
        | SignallerMessage::JoinDeclined { .. }
        | SignallerMessage::RoomClosed { .. }
        | SignallerMessage::SessionError { .. } => {}
    };
    Ok(())
}

async fn process_message(
    msg: Message,
    state: StateType,
    connection: ConnectionId,
    tx: &Tx,
) -> std::result::Result<(), warp::Error> {
    if !msg.is_text() {
        return Ok(());
    }
    let raw = match msg.to_str() {
        Ok(raw) => raw,
        Err(()) => return Ok(()),
    };
    let parsed: SignallerMessage = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            info!("Ignoring malformed message: {}\nMessage: {}", e, raw);
            return Ok(());
        }
    };

    let kind = parsed.kind();
    let mut locked_state = state.lock().await;
    if let Err(e) = handle_message(&mut locked_state, connection, tx, parsed) {
        info!("Error occurred when handling {}: {}", kind, e);
        let reply = SignallerMessage::SessionError {
            error: e.to_string(),
        };
        if let Err(e) = send(tx, &reply) {
            info!("Error sending session error: {}", e);
        }
    }
    Ok(())
}

async fn handle_connection(salt: String, state: StateType, websocket: WebSocket, addr: IpAddr) {
    let hashed_ip = metrics::hash_ip(addr, &salt).unwrap_or_else(|e| {
        warn!("Could not hash client address: {}", e);
        String::from("unknown")
    });
    let connection = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[hashed_ip.as_str()])
        .inc();
    info!("WebSocket connection {} established: {}", connection, addr);

    let (tx, rx) = unbounded();
    let (outgoing, incoming) = websocket.split();

    let handle_incoming =
        incoming.try_for_each(|msg| process_message(msg, state.clone(), connection, &tx));

    let receive_from_others = rx.map(Ok).forward(outgoing);

    pin_mut!(handle_incoming, receive_from_others);
    future::select(handle_incoming, receive_from_others).await;

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[hashed_ip.as_str()])
        .dec();
    info!("{} disconnected", &addr);
    state.lock().await.leave(connection);
}

fn client_ip(forwarded: Vec<IpAddr>, remote: Option<SocketAddr>) -> IpAddr {
    forwarded
        .last()
        .copied()
        .or_else(|| remote.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub fn ws_route(
    salt: String,
    state: StateType,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    use warp::{any, ws};
    warp::path::end()
        .and(ws())
        .and(warp_real_ip::get_forwarded_for())
        .and(warp::addr::remote())
        .and(any().map(move || salt.clone()))
        .and(any().map(move || state.clone()))
        .map(
            |ws: ws::Ws,
             forwarded: Vec<IpAddr>,
             remote: Option<SocketAddr>,
             salt: String,
             state: StateType| {
                let ip = client_ip(forwarded, remote);
                ws.on_upgrade(move |socket| handle_connection(salt, state, socket, ip))
            },
        )
}

pub fn metrics_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("metrics").and_then(metrics::metrics_handler)
}

/// Binds the websocket relay. Returns the bound address and the server
/// future; an `addr` with port 0 picks a free port.
pub fn bind(
    addr: SocketAddr,
    salt: String,
    state: StateType,
) -> Result<(SocketAddr, impl Future<Output = ()>)> {
    let (bound, server) = warp::serve(ws_route(salt, state)).try_bind_ephemeral(addr)?;
    Ok((bound, server))
}

pub async fn start_server(
    addr: SocketAddr,
    metrics_addr: SocketAddr,
    salt: String,
    state: StateType,
) -> Result<()> {
    metrics::register();

    let (_, metrics_server) = warp::serve(metrics_route()).try_bind_ephemeral(metrics_addr)?;
    tokio::spawn(metrics_server);
    info!("Metrics served on {}", metrics_addr);

    let (bound, server) = bind(addr, salt, state)?;
    info!("Server listening on {}", bound);
    server.await;
    Ok(())
}
