use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use client::Channel;
use nix::pty::{forkpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, ForkResult, Group, Pid, User};
use parking_lot::Mutex;

use crate::error::Error;
use crate::limiter::{Grant, Limiter};

/// How long a process gets after SIGHUP before being escalated to SIGKILL.
const KILL_AFTER: Duration = Duration::from_secs(15);
/// Elapsed time thresholds (since SIGHUP) at which a still-alive child is
/// logged again, tapering off as it becomes less likely anyone is watching.
const WARNING_SCHEDULE: [u64; 7] = [5, 10, 30, 60, 600, 3600, 86400];
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A PTY-backed child process bound one-to-one with a channel (C6.1).
///
/// Data written to the channel goes to the pty master; data read from the
/// master is routed back onto the channel. A `window_resize` control
/// message resizes the pty via `TIOCSWINSZ`. Closing the channel (locally
/// or via `notify-close`) sends SIGHUP to the child and, if it has not
/// exited within [`KILL_AFTER`], SIGKILL.
pub struct RemoteProcess {
    channel: Channel,
    pid: Pid,
}

impl RemoteProcess {
    pub fn spawn(
        command_line: &str,
        user: Option<&str>,
        group: Option<&str>,
        channel: Channel,
        size: (u16, u16),
        terminals: &Limiter,
    ) -> Result<RemoteProcess, Error> {
        let grant = terminals.acquire()?;

        let winsize = Winsize { ws_row: size.1, ws_col: size.0, ws_xpixel: 0, ws_ypixel: 0 };
        // Safety: between fork and exec the child only reads its own
        // arguments and makes syscalls (setuid/setgid/execvp); it never
        // touches the parent's heap state.
        let result = unsafe { forkpty(Some(&winsize), None) }?;

        match result.fork_result {
            ForkResult::Child => {
                run_child(command_line, user, group);
                // Only reached if execvp itself failed.
                std::process::exit(127);
            }
            ForkResult::Parent { child } => {
                let master = Arc::new(result.master);
                let terminated = Arc::new(AtomicBool::new(false));
                let grant_slot = Arc::new(Mutex::new(Some(grant)));
                let command = command_line.to_string();

                std::thread::spawn({
                    let master = master.clone();
                    let channel = channel.clone();
                    let terminated = terminated.clone();
                    let grant_slot = grant_slot.clone();
                    let command = command.clone();
                    move || read_loop(child, master.as_raw_fd(), channel, terminated, grant_slot, command)
                });

                let write_master = master.clone();
                let resize_master = master.clone();
                let close_terminated = terminated.clone();
                let close_grant_slot = grant_slot.clone();
                let close_command = command.clone();
                channel.set_callbacks(
                    Some(Arc::new(move |data: Bytes| {
                        if let Err(e) = write_all_raw(write_master.as_raw_fd(), &data) {
                            log::debug!("pty write failed for pid {}: {}", child, e);
                        }
                    })),
                    Some(Arc::new(move || {
                        terminate(child, &close_terminated, close_command.clone(), close_grant_slot.clone());
                    })),
                    Some(Arc::new(move |data: Bytes| {
                        handle_control(&data, resize_master.as_raw_fd());
                    })),
                );

                Ok(RemoteProcess { channel, pid: child })
            }
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub fn close(&self) {
        self.channel.close();
    }
}

fn run_child(command_line: &str, user: Option<&str>, group: Option<&str>) -> ! {
    if let Some(name) = group {
        apply_group(name);
    }
    if let Some(name) = user {
        apply_user(name);
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let words: Vec<String> = {
        let split: Vec<String> = command_line.split_whitespace().map(String::from).collect();
        if split.is_empty() {
            vec![shell]
        } else {
            split
        }
    };
    let argv: Vec<CString> = words
        .iter()
        .map(|w| CString::new(w.as_str()).expect("command argument contains a NUL byte"))
        .collect();
    if let Err(e) = execvp(&argv[0], &argv) {
        log::error!("failed to exec '{}': {}", command_line, e);
    }
    std::process::exit(127);
}

fn apply_group(name: &str) {
    match Group::from_name(name) {
        Ok(Some(g)) => {
            if let Err(e) = nix::unistd::setgid(g.gid) {
                log::warn!("failed to setgid to '{}': {}", name, e);
            }
        }
        Ok(None) => log::warn!("no such group '{}', running without a group change", name),
        Err(e) => log::warn!("group lookup for '{}' failed: {}", name, e),
    }
}

fn apply_user(name: &str) {
    match User::from_name(name) {
        Ok(Some(u)) => {
            if let Err(e) = nix::unistd::setuid(u.uid) {
                log::warn!("failed to setuid to '{}': {}", name, e);
            }
        }
        Ok(None) => log::warn!("no such user '{}', running without a user change", name),
        Err(e) => log::warn!("user lookup for '{}' failed: {}", name, e),
    }
}

fn read_loop(
    pid: Pid,
    fd: RawFd,
    channel: Channel,
    terminated: Arc<AtomicBool>,
    grant_slot: Arc<Mutex<Option<Grant>>>,
    command: String,
) {
    let mut buf = [0u8; 64 * 1024];
    loop {
        if channel.is_closed() {
            break;
        }
        match read_raw(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => channel.write(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    terminate(pid, &terminated, command, grant_slot);
}

/// Runs at most once per process, regardless of whether it was triggered
/// by the channel closing or the pty master hitting EOF.
fn terminate(pid: Pid, terminated: &Arc<AtomicBool>, command: String, grant_slot: Arc<Mutex<Option<Grant>>>) {
    if terminated.swap(true, Ordering::SeqCst) {
        return;
    }
    let _ = kill(pid, Signal::SIGHUP);
    std::thread::spawn(move || {
        let grant = grant_slot.lock().take();
        wait_for_exit(pid, &command);
        drop(grant);
    });
}

fn wait_for_exit(pid: Pid, command: &str) {
    let start = Instant::now();
    let mut warnings = WARNING_SCHEDULE.iter().copied().peekable();
    let mut killed = false;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                let elapsed = start.elapsed();
                if let Some(&next) = warnings.peek() {
                    if elapsed >= Duration::from_secs(next) {
                        warnings.next();
                        log::warn!(
                            "process \"{}\" (pid {}) has not exited {:.0}s after being signalled",
                            command,
                            pid,
                            elapsed.as_secs_f64()
                        );
                    }
                }
                if !killed && elapsed >= KILL_AFTER {
                    killed = true;
                    log::debug!("sending SIGKILL to process \"{}\" (pid {})", command, pid);
                    let _ = kill(pid, Signal::SIGKILL);
                }
                if warnings.peek().is_none() {
                    log::error!("process \"{}\" (pid {}) will not die", command, pid);
                    break;
                }
                std::thread::sleep(WAIT_POLL_INTERVAL);
            }
            _ => {
                log::debug!("process \"{}\" (pid {}) exited", command, pid);
                break;
            }
        }
    }
}

fn handle_control(data: &Bytes, fd: RawFd) {
    let value: serde_json::Value = match serde_json::from_slice(data) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("malformed control message on terminal channel: {}", e);
            return;
        }
    };
    let control_type = value.get("type").and_then(|t| t.as_str());
    if control_type != Some("window_resize") {
        log::debug!("dropping unrecognized terminal control type {:?}", control_type);
        return;
    }
    let size = match value.get("size").and_then(|s| s.as_array()) {
        Some(arr) if arr.len() == 2 => arr,
        _ => return,
    };
    let cols = size[0].as_u64().unwrap_or(0) as u16;
    let rows = size[1].as_u64().unwrap_or(0) as u16;
    set_winsize(fd, cols, rows);
}

fn set_winsize(fd: RawFd, cols: u16, rows: u16) {
    let ws = libc::winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws as *const libc::winsize) };
    if rc != 0 {
        log::debug!("ioctl TIOCSWINSZ failed: {}", io::Error::last_os_error());
    }
}

fn read_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn write_all_raw(fd: RawFd, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        data = &data[n as usize..];
    }
    Ok(())
}
