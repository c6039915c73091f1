use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use codec::{Frame, Packet};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::channel::{Channel, Outbound};
use crate::error::Error;

/// Collaborator notified of protocol-level events the agent supervisor
/// (C9) needs to act on.
pub trait ClientHandler: Send + Sync {
    /// The server assigned (or re-confirmed) this client's identity.
    fn on_identity(&self, uuid: Bytes);
    /// An application-level instruction arrived out of band of any channel.
    fn on_instruction(&self, sender: Bytes, data: Frame);
    /// The transport dropped or failed to connect. Default is a no-op;
    /// services with their own lifecycle (e.g. spawned processes) can use
    /// this to tear themselves down instead of lingering past the session
    /// that opened them.
    fn on_disconnect(&self) {}
}

/// `DISCONNECTED → CONNECTING → OPEN → {IDENTIFYING|IDENTIFIED}`, looping
/// back to `DISCONNECTED` on any transport error or close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    Identifying = 3,
    Identified = 4,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            1 => State::Connecting,
            2 => State::Open,
            3 => State::Identifying,
            4 => State::Identified,
            _ => State::Disconnected,
        }
    }
}

pub struct ClientOptions {
    pub url: String,
    /// Threshold since the last received frame past which the peer is
    /// considered unresponsive and a reconnect is forced. `None` disables
    /// the watcher.
    pub liveness_timeout: Option<Duration>,
    /// Base delay between reconnection attempts.
    pub reconnect_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            url: String::new(),
            liveness_timeout: Some(Duration::from_secs(100)),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

struct Inner {
    options: ClientOptions,
    handler: Arc<dyn ClientHandler>,
    channels: Mutex<HashMap<u32, Channel>>,
    identity: Mutex<Option<Bytes>>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Option<Frame>>>>,
    next_command_id: AtomicI64,
    state: AtomicU8,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl Outbound for Inner {
    fn send_data(&self, channel: u32, data: Bytes) {
        self.send_packet(&Packet::RequestSend { channel, data });
    }

    fn send_control(&self, channel: u32, data: Bytes) {
        self.send_packet(&Packet::RequestSendControl { channel, data });
    }

    fn send_close(&self, channel: u32) {
        self.send_packet(&Packet::RequestClose { channel });
    }
}

impl Inner {
    fn send_packet(&self, packet: &Packet) {
        let bytes = packet.encode_binary();
        if let Some(tx) = self.outbound_tx.lock().as_ref() {
            let _ = tx.send(bytes);
        }
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Owns the persistent outbound connection to the M2M server: frames and
/// unframes packets, routes `route`/`route-control` into the channel
/// table, routes `instruction` to the collaborator, and drives
/// reconnection forever.
#[derive(Clone)]
pub struct M2mClient(Arc<Inner>);

impl M2mClient {
    pub fn new(options: ClientOptions, handler: Arc<dyn ClientHandler>) -> M2mClient {
        M2mClient(Arc::new(Inner {
            options,
            handler,
            channels: Mutex::new(HashMap::new()),
            identity: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_command_id: AtomicI64::new(1),
            state: AtomicU8::new(State::Disconnected as u8),
            outbound_tx: Mutex::new(None),
        }))
    }

    pub fn state(&self) -> State {
        State::from_u8(self.0.state.load(Ordering::SeqCst))
    }

    pub fn identity(&self) -> Option<Bytes> {
        self.0.identity.lock().clone()
    }

    /// Look up a channel, creating it (in buffered mode) on first mention.
    pub fn get_channel(&self, number: u32) -> Channel {
        let mut channels = self.0.channels.lock();
        channels
            .entry(number)
            .or_insert_with(|| {
                let outbound: Arc<dyn Outbound> = self.0.clone();
                Channel::new(number, Arc::downgrade(&outbound))
            })
            .clone()
    }

    pub fn close_channel(&self, number: u32) {
        let channel = self.0.channels.lock().get(&number).cloned();
        if let Some(channel) = channel {
            channel.close();
        }
    }

    /// Register interest in a `response(command_id, ...)` for a packet this
    /// client is about to send. On disconnect, any still-pending receiver
    /// resolves to `None`.
    pub fn next_command_id(&self) -> i64 {
        self.0.next_command_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn register_pending(&self, command_id: i64) -> oneshot::Receiver<Option<Frame>> {
        let (tx, rx) = oneshot::channel();
        self.0.pending.lock().insert(command_id, tx);
        rx
    }

    /// Run the reconnection supervisor forever. Returns only if the
    /// process is asked to exit (not modelled here; callers `select!`
    /// against a shutdown signal around this future).
    pub async fn run(&self) -> ! {
        loop {
            self.0.set_state(State::Connecting);
            match tokio_tungstenite::connect_async(&self.0.options.url).await {
                Ok((stream, _response)) => {
                    self.0.set_state(State::Open);
                    let (mut sink, mut read) = stream.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
                    *self.0.outbound_tx.lock() = Some(tx);

                    let writer = tokio::spawn(async move {
                        while let Some(bytes) = rx.recv().await {
                            if sink.send(Message::Binary(bytes.to_vec())).await.is_err() {
                                break;
                            }
                        }
                    });

                    self.send_ready_packet();

                    let reason = self.read_loop(&mut read).await;
                    log::warn!("m2m transport disconnected: {}", reason);
                    writer.abort();
                }
                Err(e) => {
                    log::warn!("m2m connect failed: {}", e);
                }
            }
            self.handle_disconnect();
            tokio::time::sleep(self.0.options.reconnect_delay).await;
        }
    }

    fn send_ready_packet(&self) {
        match self.0.identity.lock().clone() {
            Some(uuid) => {
                self.0.set_state(State::Identifying);
                self.0.send_packet(&Packet::RequestIdentify { uuid });
            }
            None => {
                self.0.set_state(State::Identifying);
                self.0.send_packet(&Packet::RequestJoin);
            }
        }
    }

    async fn read_loop<S>(&self, stream: &mut S) -> String
    where
        S: futures_util::Stream<
                Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
            > + Unpin,
    {
        loop {
            let next = stream.next();
            let item = match self.0.options.liveness_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, next).await {
                    Ok(item) => item,
                    Err(_) => return "liveness timeout".to_string(),
                },
                None => next.await,
            };
            match item {
                Some(Ok(Message::Binary(data))) => {
                    self.handle_frame(Bytes::from(data));
                }
                Some(Ok(Message::Close(_))) | None => return "closed".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => return e.to_string(),
            }
        }
    }

    fn handle_frame(&self, data: Bytes) {
        let packet = match Packet::from_bytes(&data) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("dropping malformed packet: {}", e);
                return;
            }
        };
        self.dispatch(packet);
    }

    fn dispatch(&self, packet: Packet) {
        match packet {
            Packet::Welcome => {
                self.0.set_state(State::Identified);
            }
            Packet::SetIdentity { uuid } => {
                *self.0.identity.lock() = Some(uuid.clone());
                self.0.handler.on_identity(uuid);
            }
            Packet::Ping { data } => {
                let echo = data.slice(0..data.len().min(1024));
                self.0.send_packet(&Packet::Pong { data: echo });
            }
            Packet::Route { channel, data } => {
                self.get_channel(channel).on_data(data);
            }
            Packet::RouteControl { channel, data } => {
                self.get_channel(channel).on_control(data);
            }
            Packet::NotifyOpen { channel } => {
                self.get_channel(channel);
            }
            Packet::NotifyClose { channel } => {
                if let Some(channel) = self.0.channels.lock().remove(&channel) {
                    channel.on_close();
                }
            }
            Packet::Instruction { sender, data } => {
                self.0.handler.on_instruction(sender, data);
            }
            Packet::Response { command_id, result } => {
                if let Some(tx) = self.0.pending.lock().remove(&command_id) {
                    let _ = tx.send(Some(result));
                }
            }
            Packet::Log { text } => {
                log::info!("m2m: {}", String::from_utf8_lossy(&text));
            }
            other => {
                log::debug!("unhandled packet {:?}", other.packet_type());
            }
        }
    }

    fn handle_disconnect(&self) {
        self.0.set_state(State::Disconnected);
        *self.0.outbound_tx.lock() = None;
        for (_, tx) in self.0.pending.lock().drain() {
            let _ = tx.send(None);
        }
        let channels: Vec<Channel> = self.0.channels.lock().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.on_close();
        }
        self.0.handler.on_disconnect();
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;
    impl ClientHandler for NullHandler {
        fn on_identity(&self, _: Bytes) {}
        fn on_instruction(&self, _: Bytes, _: Frame) {}
    }

    struct DisconnectCountingHandler(Arc<std::sync::atomic::AtomicUsize>);
    impl ClientHandler for DisconnectCountingHandler {
        fn on_identity(&self, _: Bytes) {}
        fn on_instruction(&self, _: Bytes, _: Frame) {}
        fn on_disconnect(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn client() -> M2mClient {
        M2mClient::new(
            ClientOptions { url: "ws://unused".into(), ..Default::default() },
            Arc::new(NullHandler),
        )
    }

    #[test]
    fn route_recreates_channel_after_notify_close() {
        let client = client();
        client.get_channel(3);
        client.dispatch(Packet::NotifyClose { channel: 3 });
        assert!(!client.0.channels.lock().contains_key(&3));
        client.dispatch(Packet::Route { channel: 3, data: Bytes::from_static(b"hi") });
        assert!(client.0.channels.lock().contains_key(&3));
    }

    #[test]
    fn ping_triggers_pong_reply() {
        let client = client();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *client.0.outbound_tx.lock() = Some(tx);
        client.dispatch(Packet::Ping { data: Bytes::from_static(b"abc") });
        let sent = rx.try_recv().expect("a pong was sent");
        let packet = Packet::from_bytes(&sent).unwrap();
        assert_eq!(packet, Packet::Pong { data: Bytes::from_static(b"abc") });
    }

    #[test]
    fn disconnect_fires_pending_with_none_and_closes_channels() {
        let client = client();
        let ch = client.get_channel(1);
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = closed.clone();
        ch.set_callbacks(None, Some(Arc::new(move || flag.store(true, Ordering::SeqCst))), None);
        let rx = client.register_pending(42);
        client.handle_disconnect();
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(rx.try_recv().unwrap(), None);
    }

    #[test]
    fn ready_uses_join_without_identity_and_identify_with_one() {
        let client = client();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *client.0.outbound_tx.lock() = Some(tx);
        client.send_ready_packet();
        let sent = Packet::from_bytes(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent, Packet::RequestJoin);

        *client.0.identity.lock() = Some(Bytes::from_static(b"abc"));
        client.send_ready_packet();
        let sent = Packet::from_bytes(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent, Packet::RequestIdentify { uuid: Bytes::from_static(b"abc") });
    }

    #[test]
    fn disconnect_notifies_handler_exactly_once() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let client = M2mClient::new(
            ClientOptions { url: "ws://unused".into(), ..Default::default() },
            Arc::new(DisconnectCountingHandler(count.clone())),
        );
        client.handle_disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
