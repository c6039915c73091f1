use bytes::Bytes;
use client::Channel;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::limiter::Limiter;

/// Runs a shell command and streams its output to a channel (C6.4).
pub struct CommandStream;

impl CommandStream {
    /// Spawns `command_line` via the platform shell with piped stdout and
    /// stderr. Stdout bytes are written to `channel`; stderr bytes are only
    /// logged. Runs until the child's stdout reaches EOF or the channel
    /// closes (there is no time-out); on completion sends
    /// `{service:"command", type:"complete", returncode}` and kills the
    /// child if it is still alive. Acquires and holds the `services`
    /// limiter slot for the life of the run.
    pub async fn attach(command_line: &str, channel: Channel, services: &Limiter) {
        let grant = match services.acquire() {
            Ok(grant) => grant,
            Err(e) => {
                channel.send_control(&json!({
                    "service": "command",
                    "type": "error",
                    "msg": e.to_string(),
                }));
                channel.close();
                return;
            }
        };

        let mut child = match Command::new("/bin/sh")
            .arg("-c")
            .arg(command_line)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log::warn!("failed to spawn command '{}': {}", command_line, e);
                channel.send_control(&json!({
                    "service": "command",
                    "type": "error",
                    "msg": e.to_string(),
                }));
                channel.close();
                drop(grant);
                return;
            }
        };

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let command = command_line.to_string();
        tokio::spawn(async move {
            let mut buf = [0u8; 64 * 1024];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => log::debug!(
                        "stderr from '{}': {}",
                        command,
                        String::from_utf8_lossy(&buf[..n])
                    ),
                    Err(_) => break,
                }
            }
        });

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            if channel.is_closed() {
                break;
            }
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => channel.write(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    log::debug!("stdout read failed for '{}': {}", command_line, e);
                    break;
                }
            }
        }

        let returncode = match child.try_wait() {
            Ok(Some(status)) => status.code().unwrap_or(-1),
            Ok(None) => {
                let _ = child.start_kill();
                match child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                }
            }
            Err(_) => -1,
        };

        channel.send_control(&json!({
            "service": "command",
            "type": "complete",
            "returncode": returncode,
        }));
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
    async fn echo_command_streams_output_and_completes_with_zero() {
        let (ch, _sink) = channel();
        let received: Arc<parking_lot::Mutex<Vec<u8>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink2 = received.clone();
        ch.set_callbacks(Some(Arc::new(move |data: Bytes| sink2.lock().extend_from_slice(&data))), None, None);

        let services = Limiter::new("services", 10);
        CommandStream::attach("echo hello", ch.clone(), &services).await;

        assert_eq!(&received.lock()[..], b"hello\n");
        assert!(ch.is_closed());
        assert_eq!(services.value(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let (ch, _sink) = channel();
        let services = Limiter::new("services", 10);
        CommandStream::attach("exit 7", ch.clone(), &services).await;
        assert!(ch.is_closed());
    }
}
