use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Called with a chunk of data delivered on a channel.
pub type DataCallback = Arc<dyn Fn(Bytes) + Send + Sync>;
/// Called once, when a channel transitions to closed.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// The channel's data-delivery mode.
///
/// A channel is polymorphic over this set and does not otherwise know its
/// consumer: either bytes accumulate in a FIFO buffer for a later `read`,
/// or they are pushed straight to a callback, or the channel is closed and
/// drops everything it receives.
enum Delivery {
    Buffered(VecDeque<u8>),
    Callback { on_data: DataCallback, on_control: Option<DataCallback> },
    Closed,
}

/// Sink a channel uses to emit outbound packets; implemented by the M2M
/// client. A channel holds only a weak reference, so the client's channel
/// table remains the sole owner of the connection's lifecycle.
pub trait Outbound: Send + Sync {
    fn send_data(&self, channel: u32, data: Bytes);
    fn send_control(&self, channel: u32, data: Bytes);
    fn send_close(&self, channel: u32);
}

struct Inner {
    number: u32,
    delivery: Mutex<Delivery>,
    notify: Notify,
    closed: AtomicBool,
    close_callback: Mutex<Option<CloseCallback>>,
    close_fired: AtomicBool,
    outbound: Mutex<Weak<dyn Outbound>>,
}

/// A numbered, bidirectional, reliable byte stream multiplexed over the
/// M2M connection.
#[derive(Clone)]
pub struct Channel(Arc<Inner>);

impl Channel {
    /// Construct a channel bound to `outbound`, in buffered delivery mode.
    /// Ordinarily a channel is vended by [`crate::client::M2mClient::get_channel`];
    /// this constructor is exposed for service implementations that need a
    /// channel wired to a test double.
    pub fn new(number: u32, outbound: Weak<dyn Outbound>) -> Channel {
        Channel(Arc::new(Inner {
            number,
            delivery: Mutex::new(Delivery::Buffered(VecDeque::new())),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            close_callback: Mutex::new(None),
            close_fired: AtomicBool::new(false),
            outbound: Mutex::new(outbound),
        }))
    }

    pub fn number(&self) -> u32 {
        self.0.number
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    /// Install observers. Setting `on_data` switches the channel from
    /// buffered to callback-driven delivery; any bytes already buffered
    /// are replayed through the new callback before it takes over live
    /// data.
    pub fn set_callbacks(
        &self,
        on_data: Option<DataCallback>,
        on_close: Option<CloseCallback>,
        on_control: Option<DataCallback>,
    ) {
        if let Some(on_close) = on_close {
            *self.0.close_callback.lock() = Some(on_close);
        }
        if let Some(on_data) = on_data {
            let mut delivery = self.0.delivery.lock();
            if let Delivery::Buffered(buf) = &mut *delivery {
                if !buf.is_empty() {
                    let pending: Vec<u8> = buf.drain(..).collect();
                    on_data(Bytes::from(pending));
                }
            }
            *delivery = Delivery::Callback { on_data, on_control };
        }
    }

    /// Enqueue a `request-send` for this channel. No-op once closed.
    pub fn write(&self, data: Bytes) {
        if self.is_closed() {
            return;
        }
        if let Some(outbound) = self.0.outbound.lock().upgrade() {
            outbound.send_data(self.0.number, data);
        }
    }

    /// JSON-encode `value` and send it as a `request-send-control`.
    pub fn send_control(&self, value: &serde_json::Value) {
        if self.is_closed() {
            return;
        }
        let encoded = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to encode control packet for channel {}: {}", self.0.number, e);
                return;
            }
        };
        if let Some(outbound) = self.0.outbound.lock().upgrade() {
            outbound.send_control(self.0.number, Bytes::from(encoded));
        }
    }

    /// Send `request-close` once; later calls are no-ops. Flips the local
    /// closed flag immediately, independent of the server's `notify-close`.
    pub fn close(&self) {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.0.delivery.lock() = Delivery::Closed;
        self.0.notify.notify_waiters();
        if let Some(outbound) = self.0.outbound.lock().upgrade() {
            outbound.send_close(self.0.number);
        }
        self.fire_close_callback();
    }

    fn fire_close_callback(&self) {
        if self.0.close_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let cb = self.0.close_callback.lock().clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    /// Deliver incoming bytes, driven by the M2M client's reader loop.
    pub(crate) fn on_data(&self, data: Bytes) {
        let cb = {
            let mut delivery = self.0.delivery.lock();
            match &mut *delivery {
                Delivery::Closed => {
                    log::debug!(
                        "dropped {} byte(s) on closed channel {}",
                        data.len(),
                        self.0.number
                    );
                    None
                }
                Delivery::Callback { on_data, .. } => Some(on_data.clone()),
                Delivery::Buffered(buf) => {
                    buf.extend(data.iter().copied());
                    self.0.notify.notify_waiters();
                    None
                }
            }
        };
        if let Some(cb) = cb {
            cb(data);
        }
    }

    /// Deliver an incoming control chunk, driven by the M2M client.
    pub(crate) fn on_control(&self, data: Bytes) {
        let cb = {
            let delivery = self.0.delivery.lock();
            match &*delivery {
                Delivery::Callback { on_control: Some(cb), .. } => Some(cb.clone()),
                _ => {
                    log::debug!("dropped control chunk on channel {} (no handler)", self.0.number);
                    None
                }
            }
        };
        if let Some(cb) = cb {
            cb(data);
        }
    }

    /// Invoked by the client when the server sends `notify-close`.
    pub(crate) fn on_close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        *self.0.delivery.lock() = Delivery::Closed;
        self.0.notify.notify_waiters();
        self.fire_close_callback();
    }

    /// Drain up to `n` bytes from the receive buffer. With `block`, waits
    /// (up to `timeout`, or forever if `None`) for data to arrive; returns
    /// empty bytes if the wait elapses or the channel is closed with
    /// nothing buffered.
    pub async fn read(&self, n: usize, block: bool, timeout: Option<Duration>) -> Bytes {
        loop {
            {
                let mut delivery = self.0.delivery.lock();
                match &mut *delivery {
                    Delivery::Buffered(buf) if !buf.is_empty() => {
                        let take = n.min(buf.len());
                        let chunk: Vec<u8> = buf.drain(..take).collect();
                        return Bytes::from(chunk);
                    }
                    Delivery::Closed => return Bytes::new(),
                    _ => {}
                }
            }
            if !block {
                return Bytes::new();
            }
            let notified = self.0.notify.notified();
            match timeout {
                Some(t) => {
                    if tokio::time::timeout(t, notified).await.is_err() {
                        return Bytes::new();
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct NullOutbound;
    impl Outbound for NullOutbound {
        fn send_data(&self, _: u32, _: Bytes) {}
        fn send_control(&self, _: u32, _: Bytes) {}
        fn send_close(&self, _: u32) {}
    }

    fn channel() -> (Channel, Arc<dyn Outbound>) {
        let sink: Arc<dyn Outbound> = Arc::new(NullOutbound);
        let weak = Arc::downgrade(&sink);
        (Channel::new(1, weak), sink)
    }

    #[tokio::test]
    async fn close_makes_write_a_noop() {
        let (ch, _sink) = channel();
        ch.close();
        assert!(ch.is_closed());
        ch.write(Bytes::from_static(b"x"));
        assert_eq!(ch.read(10, false, None).await.len(), 0);
    }

    #[tokio::test]
    async fn read_drains_fifo_across_deliveries() {
        let (ch, _sink) = channel();
        ch.on_data(Bytes::from_static(b"ab"));
        ch.on_data(Bytes::from_static(b"cd"));
        let got = ch.read(3, false, None).await;
        assert_eq!(&got[..], b"abc");
        let rest = ch.read(10, false, None).await;
        assert_eq!(&rest[..], b"d");
    }

    #[tokio::test]
    async fn read_blocking_times_out_empty() {
        let (ch, _sink) = channel();
        let got = ch.read(10, true, Some(Duration::from_millis(20))).await;
        assert_eq!(got.len(), 0);
    }

    #[tokio::test]
    async fn close_callback_fires_exactly_once() {
        let (ch, _sink) = channel();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        ch.set_callbacks(None, Some(Arc::new(move || { counted.fetch_add(1, Ordering::SeqCst); })), None);
        ch.on_close();
        ch.on_close();
        ch.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_delivery_bypasses_buffer() {
        let (ch, _sink) = channel();
        let received: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
        let sink2 = received.clone();
        ch.set_callbacks(Some(Arc::new(move |data: Bytes| sink2.lock().push(data))), None, None);
        ch.on_data(Bytes::from_static(b"hello"));
        assert_eq!(received.lock().len(), 1);
        assert_eq!(&received.lock()[0][..], b"hello");
    }
}
