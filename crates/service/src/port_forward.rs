use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use client::Channel;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::limiter::Limiter;

/// A command fed into the downstream writer task, in channel-arrival order.
enum WriteCommand {
    Data(Bytes),
    Close,
}

/// Sent into the channel when the `services` limiter is already at capacity;
/// the remote peer is often speaking HTTP, so a proper status line lets it
/// fail cleanly instead of hanging on a dropped connection.
const BUSY_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

const BUFFER_SIZE: usize = 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A single local TCP connection proxied over one M2M channel (C6.2).
///
/// Two independent pumps share the connection: an upstream task reads the
/// socket and writes to the channel; the channel's own callbacks push
/// incoming bytes onto an ordered queue that a single downstream writer
/// task drains in arrival order.
pub struct PortForwardConnection {
    channel: Channel,
}

impl PortForwardConnection {
    /// Connect to `(host, port)` and attach the connection to `channel`.
    /// On failure to connect, the channel is closed and the limiter slot
    /// is released immediately rather than held for the life of a dead
    /// connection.
    pub async fn attach(
        host: &str,
        port: u16,
        channel: Channel,
        services: &Limiter,
    ) -> Result<PortForwardConnection, Error> {
        let grant = match services.acquire() {
            Ok(grant) => grant,
            Err(e) => {
                channel.write(Bytes::from_static(BUSY_RESPONSE));
                channel.close();
                return Err(e);
            }
        };

        let addr = format!("{}:{}", host, port);
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                log::warn!("port-forward connect to {} failed: {}", addr, e);
                channel.close();
                return Ok(PortForwardConnection { channel });
            }
            Err(_) => {
                log::warn!("port-forward connect to {} timed out", addr);
                channel.close();
                return Ok(PortForwardConnection { channel });
            }
        };
        let _ = stream.set_nodelay(true);

        let (mut read_half, mut write_half) = stream.into_split();

        // A single writer task owns the socket's write half and drains an
        // ordered queue, so chunks are flushed in the order the server sent
        // them rather than racing each other for a shared lock.
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteCommand>();
        tokio::spawn(async move {
            while let Some(cmd) = write_rx.recv().await {
                match cmd {
                    WriteCommand::Data(data) => {
                        if let Err(e) = write_half.write_all(&data).await {
                            log::debug!("port-forward write failed: {}", e);
                            break;
                        }
                    }
                    WriteCommand::Close => {
                        let _ = write_half.shutdown().await;
                        break;
                    }
                }
            }
        });

        let down_tx = write_tx.clone();
        let close_tx = write_tx;
        channel.set_callbacks(
            Some(Arc::new(move |data: Bytes| {
                let _ = down_tx.send(WriteCommand::Data(data));
            })),
            Some(Arc::new(move || {
                let _ = close_tx.send(WriteCommand::Close);
            })),
            None,
        );

        let downstream = channel.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; BUFFER_SIZE];
            loop {
                if downstream.is_closed() {
                    break;
                }
                match read_half.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => downstream.write(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        log::debug!("port-forward read failed: {}", e);
                        break;
                    }
                }
            }
            downstream.close();
            drop(grant);
        });

        Ok(PortForwardConnection { channel })
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

/// `(name, host, port)`, the local target a server-initiated connection
/// is proxied to.
#[derive(Debug, Clone)]
pub struct PortForwardTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Named table of local TCP targets (C7). Two indexes (name→target,
/// port→name) let `open` resolve either a named service or a literal port.
pub struct PortForwardManager {
    by_name: SyncMutex<HashMap<String, PortForwardTarget>>,
    port_to_name: SyncMutex<HashMap<u16, String>>,
    services: Limiter,
}

impl PortForwardManager {
    pub fn new(services: Limiter) -> PortForwardManager {
        let manager = PortForwardManager {
            by_name: SyncMutex::new(HashMap::new()),
            port_to_name: SyncMutex::new(HashMap::new()),
            services,
        };
        manager.add_service("web", 80, "127.0.0.1");
        manager.add_service("ext", 81, "127.0.0.1");
        manager.add_service("extalt", 8000, "127.0.0.1");
        manager.add_service("alt", 8080, "127.0.0.1");
        manager
    }

    pub fn add_service(&self, name: &str, port: u16, host: &str) {
        let target = PortForwardTarget { name: name.to_string(), host: host.to_string(), port };
        self.by_name.lock().insert(name.to_string(), target);
        self.port_to_name.lock().insert(port, name.to_string());
        log::debug!("added port forward service '{}' on port {}", name, port);
    }

    fn target_by_name(&self, name: &str) -> Option<PortForwardTarget> {
        self.by_name.lock().get(name).cloned()
    }

    fn target_by_port(&self, port: u16) -> Option<PortForwardTarget> {
        let name = self.port_to_name.lock().get(&port).cloned()?;
        self.target_by_name(&name)
    }

    /// `{action:"open-portforward", service, route}`: `route`'s last element
    /// is the M2M channel to attach.
    pub fn open_service(&self, channel: Channel, service: &str) {
        let Some(target) = self.target_by_name(service) else {
            log::warn!("no port-forward service named '{}'", service);
            return;
        };
        self.spawn_attach(channel, target);
    }

    /// `{action:"open-portredirect", device_port, m2m_port}`: an anonymous
    /// target at `127.0.0.1:device_port`.
    pub fn open_redirect(&self, channel: Channel, device_port: u16) {
        let target = PortForwardTarget {
            name: format!("port-{}", device_port),
            host: "127.0.0.1".to_string(),
            port: device_port,
        };
        self.spawn_attach(channel, target);
    }

    /// Resolve a target by literal port number instead of by name.
    pub fn open_on_port(&self, channel: Channel, port: u16) {
        let Some(target) = self.target_by_port(port) else {
            log::warn!("no port-forward service on port {}", port);
            return;
        };
        self.spawn_attach(channel, target);
    }

    fn spawn_attach(&self, channel: Channel, target: PortForwardTarget) {
        let services = self.services.clone();
        tokio::spawn(async move {
            if let Err(e) = PortForwardConnection::attach(&target.host, target.port, channel, &services).await {
                log::debug!("port-forward attach to '{}' failed: {}", target.name, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_targets_resolve_both_ways() {
        let manager = PortForwardManager::new(Limiter::new("services", 10));
        assert_eq!(manager.target_by_name("web").unwrap().port, 80);
        assert_eq!(manager.target_by_port(8080).unwrap().name, "alt");
        assert!(manager.target_by_name("does-not-exist").is_none());
    }

    struct NullOutbound;
    impl client::Outbound for NullOutbound {
        fn send_data(&self, _: u32, _: Bytes) {}
        fn send_control(&self, _: u32, _: Bytes) {}
        fn send_close(&self, _: u32) {}
    }

    #[tokio::test]
    async fn connect_refused_closes_channel_without_partial_data() {
        let limiter = Limiter::new("services", 10);
        let sink: Arc<dyn client::Outbound> = Arc::new(NullOutbound);
        let channel = Channel::new(1, Arc::downgrade(&sink));
        // Port 1 is a reserved, unbound port; loopback refuses it immediately.
        let conn = PortForwardConnection::attach("127.0.0.1", 1, channel.clone(), &limiter).await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(limiter.value(), 0);
    }

    #[tokio::test]
    async fn limit_reached_closes_channel_without_connecting() {
        let limiter = Limiter::new("services", 0);
        let sink: Arc<dyn client::Outbound> = Arc::new(NullOutbound);
        let channel = Channel::new(1, Arc::downgrade(&sink));
        let err = PortForwardConnection::attach("127.0.0.1", 80, channel.clone(), &limiter).await.unwrap_err();
        assert!(matches!(err, Error::LimitReached("services")));
        assert!(channel.is_closed());
    }
}
