use bytes::Bytes;
use client::Channel;
use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::limiter::Limiter;

/// 1 MiB, matching the chunk size used elsewhere in this codebase for bulk
/// transfer over a channel.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Streams a local file to a channel in fixed-size chunks (C6.3).
pub struct FileStream;

impl FileStream {
    /// Open `path` and stream it to `channel` until EOF, then close the
    /// channel. On any open/read error, emits a
    /// `{service:"remote-file", type:"error", status, msg}` control packet
    /// before closing. Acquires and holds the `services` limiter slot for
    /// the life of the transfer.
    pub async fn attach(path: &str, channel: Channel, services: &Limiter) {
        let grant = match services.acquire() {
            Ok(grant) => grant,
            Err(e) => {
                channel.send_control(&json!({
                    "service": "remote-file",
                    "type": "error",
                    "status": "limit-reached",
                    "msg": e.to_string(),
                }));
                channel.close();
                return;
            }
        };

        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                log::warn!("failed to open '{}' for remote-file streaming: {}", path, e);
                channel.send_control(&json!({
                    "service": "remote-file",
                    "type": "error",
                    "status": "open-failed",
                    "msg": e.to_string(),
                }));
                channel.close();
                drop(grant);
                return;
            }
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if channel.is_closed() {
                break;
            }
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => channel.write(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    log::warn!("read error streaming '{}': {}", path, e);
                    channel.send_control(&json!({
                        "service": "remote-file",
                        "type": "error",
                        "status": "read-failed",
                        "msg": e.to_string(),
                    }));
                    break;
                }
            }
        }
        channel.close();
        drop(grant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NullOutbound;
    impl client::Outbound for NullOutbound {
        fn send_data(&self, _: u32, _: Bytes) {}
        fn send_control(&self, _: u32, _: Bytes) {}
        fn send_close(&self, _: u32) {}
    }

    fn channel() -> (Channel, Arc<dyn client::Outbound>) {
        let sink: Arc<dyn client::Outbound> = Arc::new(NullOutbound);
        let weak = Arc::downgrade(&sink);
        (Channel::new(1, weak), sink)
    }

    #[tokio::test]
    async fn streams_file_contents_and_closes() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("dataplicity-filestream-test-{}", std::process::id()));
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let (ch, _sink) = channel();
        let received: Arc<parking_lot::Mutex<Vec<u8>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink2 = received.clone();
        ch.set_callbacks(Some(Arc::new(move |data: Bytes| sink2.lock().extend_from_slice(&data))), None, None);

        let services = Limiter::new("services", 10);
        FileStream::attach(path.to_str().unwrap(), ch.clone(), &services).await;

        assert_eq!(&received.lock()[..], b"hello world");
        assert!(ch.is_closed());
        assert_eq!(services.value(), 0);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_file_closes_channel_and_releases_limiter() {
        let (ch, _sink) = channel();
        let services = Limiter::new("services", 10);
        FileStream::attach("/nonexistent/path/does-not-exist", ch.clone(), &services).await;

        assert!(ch.is_closed());
        assert_eq!(services.value(), 0);
    }

    #[tokio::test]
    async fn limit_reached_closes_channel_without_opening_file() {
        let (ch, _sink) = channel();
        let services = Limiter::new("services", 0);
        FileStream::attach("/etc/hostname", ch.clone(), &services).await;
        assert!(ch.is_closed());
    }
}
