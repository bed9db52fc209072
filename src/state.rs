use std::collections::HashMap;
use std::sync::Arc;

use failure::format_err;
use log::info;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::metrics;
use crate::peer::PeerRole;
use crate::room::{generate_room_id, send, ConnectionId, Member, Room, Tx};
use crate::signaller_message::SignallerMessage;
use crate::Result;

const ROOM_ID_TRIES: usize = 3;

/// What a socket is registered as. A socket holds at most one membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Membership {
    Viewer {
        room_id: String,
    },
    Presenter {
        room_id: String,
        participant_id: String,
    },
}

impl Membership {
    pub fn room_id(&self) -> &str {
        match self {
            Membership::Viewer { room_id } | Membership::Presenter { room_id, .. } => room_id,
        }
    }

    pub fn role(&self) -> PeerRole {
        match self {
            Membership::Viewer { .. } => PeerRole::Viewer,
            Membership::Presenter { .. } => PeerRole::Presenter,
        }
    }
}

pub struct State {
    pub rooms: HashMap<String, Room>,
    pub memberships: HashMap<ConnectionId, Membership>,
    room_code_length: usize,
    max_presenters_per_room: usize,
}

pub type StateType = Arc<Mutex<State>>;

impl State {
    pub fn new(config: &Config) -> StateType {
        Arc::new(Mutex::new(State {
            rooms: Default::default(),
            memberships: Default::default(),
            room_code_length: config.room_code_length,
            max_presenters_per_room: config.max_presenters_per_room,
        }))
    }

    pub fn open_room(&mut self, connection: ConnectionId, sender: Tx) -> Result<String> {
        let mut room_id = generate_room_id(self.room_code_length);
        for _ in 0..ROOM_ID_TRIES {
            if !self.rooms.contains_key(&room_id) {
                break;
            }
            room_id = generate_room_id(self.room_code_length);
        }
        if self.rooms.contains_key(&room_id) {
            return Err(format_err!("could not allocate a room code"));
        }

        self.leave(connection);
        self.rooms.insert(
            room_id.clone(),
            Room::new(room_id.clone(), Member { connection, sender }),
        );
        self.memberships.insert(
            connection,
            Membership::Viewer {
                room_id: room_id.clone(),
            },
        );
        metrics::NUM_OPEN_ROOMS.inc();
        Ok(room_id)
    }

    /// Registers a presenter socket. A second join under the same participant
    /// id replaces the earlier socket.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        sender: Tx,
        room_id: &str,
        participant_id: &str,
    ) -> Result<()> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| format_err!("room does not exist"))?;
        if !room.presenters.contains_key(participant_id)
            && room.presenters.len() >= self.max_presenters_per_room
        {
            return Err(format_err!("room is full"));
        }

        let same = Membership::Presenter {
            room_id: room_id.to_owned(),
            participant_id: participant_id.to_owned(),
        };
        if self.membership(connection) != Some(&same) {
            self.leave(connection);
        }
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| format_err!("room does not exist"))?;
        if let Some(previous) = room
            .presenters
            .insert(participant_id.to_owned(), Member { connection, sender })
        {
            info!(
                "{} rejoined room {}, dropping connection {}",
                participant_id, room_id, previous.connection
            );
            self.memberships.remove(&previous.connection);
        }
        self.memberships.insert(
            connection,
            Membership::Presenter {
                room_id: room_id.to_owned(),
                participant_id: participant_id.to_owned(),
            },
        );
        Ok(())
    }

    pub fn membership(&self, connection: ConnectionId) -> Option<&Membership> {
        self.memberships.get(&connection)
    }

    /// Fails unless `connection` is registered in `room_id` as `role`, and
    /// for presenters, under `participant_id`.
    pub fn authorise(
        &self,
        connection: ConnectionId,
        room_id: &str,
        role: PeerRole,
        participant_id: Option<&str>,
    ) -> Result<()> {
        let allowed = match (self.membership(connection), role) {
            (Some(Membership::Viewer { room_id: joined }), PeerRole::Viewer) => joined == room_id,
            (
                Some(Membership::Presenter {
                    room_id: joined,
                    participant_id: registered,
                }),
                PeerRole::Presenter,
            ) => joined == room_id && participant_id.map_or(true, |p| p == registered),
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(format_err!("not the {} of room {}", role, room_id))
        }
    }

    pub fn viewer(&self, room_id: &str) -> Result<&Tx> {
        self.rooms
            .get(room_id)
            .map(|room| &room.viewer.sender)
            .ok_or_else(|| format_err!("room does not exist"))
    }

    pub fn presenter(&self, room_id: &str, participant_id: &str) -> Result<&Tx> {
        self.rooms
            .get(room_id)
            .ok_or_else(|| format_err!("room does not exist"))?
            .presenters
            .get(participant_id)
            .map(|member| &member.sender)
            .ok_or_else(|| format_err!("participant is not in the room"))
    }

    pub fn broadcast(&self, room_id: &str, message: &SignallerMessage) -> Result<()> {
        self.rooms
            .get(room_id)
            .ok_or_else(|| format_err!("room does not exist"))?
            .broadcast(message);
        Ok(())
    }

    /// Removes the room and tells every member it is gone.
    pub fn close_room(&mut self, room_id: &str) -> Result<()> {
        let room = self
            .rooms
            .remove(room_id)
            .ok_or_else(|| format_err!("room does not exist"))?;
        info!("Removing room {}", room_id);
        room.broadcast(&SignallerMessage::RoomClosed {
            room_id: room_id.to_owned(),
        });
        for member in room.members() {
            self.memberships.remove(&member.connection);
        }
        metrics::NUM_OPEN_ROOMS.dec();
        metrics::ROOM_DURATION_SEC.observe(room.opened_at.elapsed().as_secs_f64());
        Ok(())
    }

    /// Explicit leave or socket disconnect. A viewer leaving closes its room;
    /// a presenter leaving is reported to the viewer as `screen-share-ended`.
    pub fn leave(&mut self, connection: ConnectionId) {
        match self.memberships.remove(&connection) {
            Some(Membership::Viewer { room_id }) => {
                let _ = self.close_room(&room_id);
            }
            Some(Membership::Presenter {
                room_id,
                participant_id,
            }) => {
                if let Some(room) = self.rooms.get_mut(&room_id) {
                    let current = room
                        .presenters
                        .get(&participant_id)
                        .map(|member| member.connection);
                    if current == Some(connection) {
                        room.presenters.remove(&participant_id);
                        info!("{} left room {}", participant_id, room_id);
                        let ended = SignallerMessage::ScreenShareEnded {
                            room_id: room_id.clone(),
                            participant_id,
                        };
                        if let Err(e) = send(&room.viewer.sender, &ended) {
                            info!("Could not reach the viewer of room {}: {}", room_id, e);
                        }
                    }
                }
            }
            None => {}
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::{unbounded, UnboundedReceiver};
    use warp::ws::Message;

    fn state_with(max_presenters: usize) -> State {
        State {
            rooms: Default::default(),
            memberships: Default::default(),
            room_code_length: 5,
            max_presenters_per_room: max_presenters,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<SignallerMessage> {
        let mut messages = vec![];
        while let Ok(Some(frame)) = rx.try_next() {
            messages.push(serde_json::from_str(frame.to_str().unwrap()).unwrap());
        }
        messages
    }

    #[test]
    fn viewer_opens_and_presenter_joins() {
        let mut state = state_with(64);
        let (viewer_tx, _viewer_rx) = unbounded();
        let (presenter_tx, _presenter_rx) = unbounded();

        let room_id = state.open_room(1, viewer_tx).unwrap();
        state.join(2, presenter_tx, &room_id, "stud-42").unwrap();

        assert!(state.authorise(1, &room_id, PeerRole::Viewer, None).is_ok());
        assert!(state
            .authorise(2, &room_id, PeerRole::Presenter, Some("stud-42"))
            .is_ok());
        assert!(state
            .authorise(2, &room_id, PeerRole::Presenter, Some("stud-7"))
            .is_err());
        assert!(state.authorise(2, &room_id, PeerRole::Viewer, None).is_err());
        assert!(state.presenter(&room_id, "stud-42").is_ok());
    }

    #[test]
    fn join_rejects_unknown_and_full_rooms() {
        let mut state = state_with(1);
        let (tx, _rx) = unbounded();
        assert!(state.join(2, tx.clone(), "NOPE1", "stud-1").is_err());

        let room_id = state.open_room(1, tx.clone()).unwrap();
        state.join(2, tx.clone(), &room_id, "stud-1").unwrap();
        let err = state.join(3, tx.clone(), &room_id, "stud-2").unwrap_err();
        assert_eq!(err.to_string(), "room is full");
        // rejoining under the same id is not blocked by the limit
        state.join(4, tx, &room_id, "stud-1").unwrap();
    }

    #[test]
    fn rejoin_replaces_the_previous_socket() {
        let mut state = state_with(64);
        let (viewer_tx, mut viewer_rx) = unbounded();
        let (tx, _rx) = unbounded();
        let room_id = state.open_room(1, viewer_tx).unwrap();
        state.join(2, tx.clone(), &room_id, "stud-42").unwrap();
        state.join(3, tx.clone(), &room_id, "stud-42").unwrap();
        // the same socket joining again is not a hangup
        state.join(3, tx, &room_id, "stud-42").unwrap();

        assert!(state.membership(2).is_none());
        assert_eq!(state.rooms[&room_id].presenters["stud-42"].connection, 3);

        // the stale socket disconnecting must not evict the new one
        state.leave(2);
        assert!(state.presenter(&room_id, "stud-42").is_ok());
        assert!(drain(&mut viewer_rx).is_empty());
    }

    #[test]
    fn viewer_leaving_closes_the_room() {
        let mut state = state_with(64);
        let (viewer_tx, _viewer_rx) = unbounded();
        let (presenter_tx, mut presenter_rx) = unbounded();
        let room_id = state.open_room(1, viewer_tx).unwrap();
        state.join(2, presenter_tx, &room_id, "stud-42").unwrap();

        state.leave(1);

        assert_eq!(state.room_count(), 0);
        assert!(state.membership(2).is_none());
        assert_eq!(
            drain(&mut presenter_rx),
            vec![SignallerMessage::RoomClosed { room_id }]
        );
    }

    #[test]
    fn presenter_leaving_keeps_the_room() {
        let mut state = state_with(64);
        let (viewer_tx, mut viewer_rx) = unbounded();
        let (tx, _rx) = unbounded();
        let room_id = state.open_room(1, viewer_tx).unwrap();
        state.join(2, tx, &room_id, "stud-42").unwrap();

        state.leave(2);

        assert_eq!(state.room_count(), 1);
        assert!(state.presenter(&room_id, "stud-42").is_err());
        assert_eq!(
            drain(&mut viewer_rx),
            vec![SignallerMessage::ScreenShareEnded {
                room_id,
                participant_id: "stud-42".into(),
            }]
        );
    }

    #[test]
    fn switching_rooms_ends_the_old_share() {
        let mut state = state_with(64);
        let (first_tx, mut first_rx) = unbounded();
        let (second_tx, _second_rx) = unbounded();
        let (tx, _rx) = unbounded();
        let first = state.open_room(1, first_tx).unwrap();
        let second = state.open_room(2, second_tx).unwrap();
        state.join(3, tx.clone(), &first, "stud-42").unwrap();
        state.join(3, tx, &second, "stud-42").unwrap();

        assert!(state.presenter(&first, "stud-42").is_err());
        assert_eq!(
            drain(&mut first_rx),
            vec![SignallerMessage::ScreenShareEnded {
                room_id: first,
                participant_id: "stud-42".into(),
            }]
        );
    }
}
