use std::collections::HashMap;

use client::Channel;
use parking_lot::Mutex;

use crate::error::Error;
use crate::limiter::Limiter;
use crate::remote_process::RemoteProcess;

/// `(name, command_line, user?, group?)`: a named shell launch spec (C8).
#[derive(Debug, Clone)]
pub struct TerminalDefinition {
    pub name: String,
    pub command_line: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

struct Entry {
    definition: TerminalDefinition,
    processes: Vec<RemoteProcess>,
}

/// Map from terminal name to its launch spec and live processes. Launching
/// prunes dead processes first, then constructs a new [`RemoteProcess`] and
/// records it.
pub struct TerminalRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    terminals: Limiter,
}

impl TerminalRegistry {
    pub fn new(terminals: Limiter) -> TerminalRegistry {
        let registry = TerminalRegistry { entries: Mutex::new(HashMap::new()), terminals };
        registry.add("shell", "bash -i", None, None);
        registry
    }

    pub fn add(&self, name: &str, command_line: &str, user: Option<&str>, group: Option<&str>) {
        let definition = TerminalDefinition {
            name: name.to_string(),
            command_line: command_line.to_string(),
            user: user.map(String::from),
            group: group.map(String::from),
        };
        self.entries.lock().insert(name.to_string(), Entry { definition, processes: Vec::new() });
    }

    /// Prune dead processes for `name`, spawn a new PTY-backed shell, and
    /// attach it to `channel`. Fails with [`Error::UnknownTerminal`] if no
    /// definition is registered under `name`, or propagates the limiter/PTY
    /// error from [`RemoteProcess::spawn`].
    pub fn launch(&self, name: &str, channel: Channel, size: (u16, u16)) -> Result<(), Error> {
        let definition = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(name).ok_or_else(|| Error::UnknownTerminal(name.to_string()))?;
            entry.processes.retain(|p| !p.is_closed());
            entry.definition.clone()
        };

        let process = RemoteProcess::spawn(
            &definition.command_line,
            definition.user.as_deref(),
            definition.group.as_deref(),
            channel,
            size,
            &self.terminals,
        )?;

        if let Some(entry) = self.entries.lock().get_mut(name) {
            entry.processes.push(process);
        }
        Ok(())
    }

    /// Close every live process across every terminal definition. Called
    /// when the M2M connection drops, matching the original semantics of
    /// tearing down all terminals on client disconnect.
    pub fn close_all(&self) {
        for entry in self.entries.lock().values() {
            for process in &entry.processes {
                process.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_a_shell_terminal() {
        let registry = TerminalRegistry::new(Limiter::new("terminals", 10));
        assert!(registry.entries.lock().contains_key("shell"));
    }

    #[test]
    fn launch_on_unknown_name_fails() {
        let registry = TerminalRegistry::new(Limiter::new("terminals", 10));
        let sink: std::sync::Arc<dyn client::Outbound> = std::sync::Arc::new(NullOutbound);
        let channel = Channel::new(1, std::sync::Arc::downgrade(&sink));
        let err = registry.launch("does-not-exist", channel, (80, 24)).unwrap_err();
        assert!(matches!(err, Error::UnknownTerminal(name) if name == "does-not-exist"));
    }

    struct NullOutbound;
    impl client::Outbound for NullOutbound {
        fn send_data(&self, _: u32, _: bytes::Bytes) {}
        fn send_control(&self, _: u32, _: bytes::Bytes) {}
        fn send_close(&self, _: u32) {}
    }
}
