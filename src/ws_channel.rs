//! Websocket client side of the relay.

use std::sync::Arc;
use std::time::Duration;

use failure::format_err;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::bridge::RelayChannel;
use crate::signaller_message::SignallerMessage;
use crate::Result;

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

type Subscribers = Arc<Mutex<Vec<UnboundedSender<SignallerMessage>>>>;

pub struct WsRelayChannel {
    outbound: UnboundedSender<Message>,
    subscribers: Subscribers,
}

impl WsRelayChannel {
    pub async fn connect(url: &str) -> Result<Arc<WsRelayChannel>> {
        let (socket, _) = connect_async(url).await?;
        info!("Connected to relay at {}", url);
        let (write, mut read) = socket.split();
        let (outbound, rx) = unbounded();
        let subscribers: Subscribers = Default::default();

        tokio::spawn(async move {
            if let Err(e) = rx.map(Ok).forward(write).await {
                info!("Relay writer stopped: {}", e);
            }
        });

        let keep_alive = outbound.clone();
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + KEEP_ALIVE_INTERVAL, KEEP_ALIVE_INTERVAL);
            loop {
                ticks.tick().await;
                if send(&keep_alive, &SignallerMessage::KeepAlive {}).is_err() {
                    break;
                }
            }
        });

        let fanout = subscribers.clone();
        let closer = outbound.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(&fanout, &text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Relay connection failed: {}", e);
                        break;
                    }
                }
            }
            info!("Relay connection closed");
            // subscribers see the end of their stream
            fanout.lock().clear();
            closer.close_channel();
        });

        Ok(Arc::new(WsRelayChannel {
            outbound,
            subscribers,
        }))
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn close(&self) {
        let _ = self.outbound.unbounded_send(Message::Close(None));
        self.outbound.close_channel();
    }
}

fn send(outbound: &UnboundedSender<Message>, message: &SignallerMessage) -> Result<()> {
    outbound
        .unbounded_send(Message::Text(serde_json::to_string(message)?))
        .map_err(|_| format_err!("relay connection closed"))
}

fn dispatch(subscribers: &Subscribers, text: &str) {
    let message: SignallerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Skipping malformed relay frame: {}", e);
            return;
        }
    };
    subscribers
        .lock()
        .retain(|tx| tx.unbounded_send(message.clone()).is_ok());
}

impl RelayChannel for WsRelayChannel {
    fn publish(&self, message: SignallerMessage) -> Result<()> {
        send(&self.outbound, &message)
    }

    fn subscribe(&self) -> UnboundedReceiver<SignallerMessage> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

impl Drop for WsRelayChannel {
    fn drop(&mut self) {
        self.outbound.close_channel();
    }
}
