use std::collections::HashMap;
use std::time::Instant;

use futures_channel::mpsc::UnboundedSender;
use log::info;
use rand::distributions::Distribution;
use rand::{thread_rng, Rng};
use warp::ws::Message;

use crate::signaller_message::SignallerMessage;
use crate::Result;

pub type Tx = UnboundedSender<Message>;
pub type ConnectionId = u64;

pub fn generate_room_id(len: usize) -> String {
    pub struct UserFriendlyAlphabet;
    impl Distribution<u8> for UserFriendlyAlphabet {
        fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u8 {
            const GEN_ASCII_STR_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
            GEN_ASCII_STR_CHARSET[(rng.next_u32() >> (32 - 5)) as usize]
        }
    }

    thread_rng()
        .sample_iter(&UserFriendlyAlphabet)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn send(tx: &Tx, message: &SignallerMessage) -> Result<()> {
    tx.unbounded_send(Message::text(serde_json::to_string(message)?))?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct Member {
    pub connection: ConnectionId,
    pub sender: Tx,
}

/// One viewer plus the presenters that joined it, keyed by participant id.
pub struct Room {
    pub id: String,
    pub viewer: Member,
    pub presenters: HashMap<String, Member>,
    pub opened_at: Instant,
}

impl Room {
    pub fn new(id: String, viewer: Member) -> Self {
        Room {
            id,
            viewer,
            presenters: Default::default(),
            opened_at: Instant::now(),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        std::iter::once(&self.viewer).chain(self.presenters.values())
    }

    /// Best effort: members whose socket already went away are skipped.
    pub fn broadcast(&self, message: &SignallerMessage) {
        for member in self.members() {
            if let Err(e) = send(&member.sender, message) {
                info!(
                    "Could not deliver {} to connection {}: {}",
                    message.kind(),
                    member.connection,
                    e
                );
            }
        }
    }
}
