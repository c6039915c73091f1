use std::sync::Arc;

use bytes::Bytes;
use client::{ClientHandler, ClientOptions, M2mClient};
use codec::Frame;
use parking_lot::Mutex;
use service::instruction::Instruction;
use service::{Echo, FileStream, PortForwardManager, TerminalRegistry};

use crate::config::Config;
use crate::control_plane::ControlPlane;
use crate::identity::Identity;

/// Composes the M2M client (C4) and the service layer (C5-C8), dispatching
/// every instruction the server sends and notifying the control-plane
/// collaborator of the events it cares about.
pub struct Agent {
    client: M2mClient,
    port_forward: PortForwardManager,
    terminals: TerminalRegistry,
    services: service::Limiter,
    control_plane: Arc<dyn ControlPlane>,
    /// The on-disk serial/auth pair, loaded once at startup.
    device_identity: Mutex<Option<Identity>>,
    /// The server-assigned `set-identity` uuid, tracked so the control
    /// plane is notified at most once per distinct value.
    m2m_identity: Mutex<Option<Bytes>>,
}

impl Agent {
    pub fn new(config: &Config, control_plane: Arc<dyn ControlPlane>) -> Arc<Agent> {
        let services = service::Limiter::new("services", config.limit_services);
        let terminals = service::Limiter::new("terminals", config.limit_terminals);

        Arc::new_cyclic(|weak: &std::sync::Weak<Agent>| {
            let handler: Arc<dyn ClientHandler> = weak.clone().into_handler();
            let client = M2mClient::new(
                ClientOptions { url: config.m2m_url.clone(), ..ClientOptions::default() },
                handler,
            );
            Agent {
                client,
                port_forward: PortForwardManager::new(services.clone()),
                terminals: TerminalRegistry::new(terminals.clone()),
                services,
                control_plane,
                device_identity: Mutex::new(None),
                m2m_identity: Mutex::new(None),
            }
        })
    }

    /// Record the on-disk serial/auth pair loaded at startup.
    pub fn set_device_identity(&self, identity: Identity) {
        *self.device_identity.lock() = Some(identity);
    }

    /// Handle a `set-identity(uuid)` from the server: remember it, and
    /// notify the control-plane collaborator exactly once per distinct
    /// value (a reconnect re-sending the same uuid is not a change).
    fn on_m2m_identity(&self, uuid: Bytes) {
        let mut current = self.m2m_identity.lock();
        if current.as_ref() == Some(&uuid) {
            return;
        }
        *current = Some(uuid.clone());
        drop(current);
        match std::str::from_utf8(&uuid) {
            Ok(s) => self.control_plane.associate(s),
            Err(_) => log::warn!("m2m identity is not valid utf-8 ({} bytes)", uuid.len()),
        }
    }

    /// Drive the reconnection supervisor forever.
    pub async fn run(&self) -> ! {
        self.client.run().await
    }

    fn dispatch(&self, instruction: Instruction) {
        match instruction {
            Instruction::Sync => self.control_plane.sync(),
            Instruction::ScanDirectory => self.control_plane.trigger_directory_scan(),
            Instruction::Reboot => {
                log::warn!("reboot-device instruction received; rebooting the host is out of scope for this agent");
            }
            Instruction::OpenEcho { channel } => {
                Echo::attach(self.client.get_channel(channel));
            }
            Instruction::OpenTerminal { name, channel, size } => {
                let channel = self.client.get_channel(channel);
                let size = size.unwrap_or((80, 24));
                if let Err(e) = self.terminals.launch(&name, channel, size) {
                    log::warn!("failed to launch terminal '{}': {}", name, e);
                }
            }
            Instruction::OpenPortForward { service, channel } => {
                self.port_forward.open_service(self.client.get_channel(channel), &service);
            }
            Instruction::OpenPortRedirect { device_port, channel } => {
                self.port_forward.open_redirect(self.client.get_channel(channel), device_port);
            }
            Instruction::ReadFile { channel, path } => {
                let channel = self.client.get_channel(channel);
                let services = self.services.clone();
                tokio::spawn(async move {
                    FileStream::attach(&path, channel, &services).await;
                });
            }
            Instruction::RunCommand { channel, command } => {
                let channel = self.client.get_channel(channel);
                let services = self.services.clone();
                tokio::spawn(async move {
                    service::CommandStream::attach(&command, channel, &services).await;
                });
            }
        }
    }
}

/// A thin `ClientHandler` adapter over a weak reference to the agent, so
/// the client (which the agent owns) does not hold the agent alive on its
/// own behalf.
struct HandlerAdapter(std::sync::Weak<Agent>);

trait IntoHandler {
    fn into_handler(self) -> Arc<dyn ClientHandler>;
}

impl IntoHandler for std::sync::Weak<Agent> {
    fn into_handler(self) -> Arc<dyn ClientHandler> {
        Arc::new(HandlerAdapter(self))
    }
}

impl ClientHandler for HandlerAdapter {
    fn on_identity(&self, uuid: Bytes) {
        if let Some(agent) = self.0.upgrade() {
            agent.on_m2m_identity(uuid);
        }
    }

    fn on_instruction(&self, sender: Bytes, data: Frame) {
        let Some(agent) = self.0.upgrade() else { return };
        match Instruction::decode(&data) {
            Some(instruction) => agent.dispatch(instruction),
            None => log::debug!("dropped unrecognized instruction from {:?}", sender),
        }
    }

    fn on_disconnect(&self) {
        let Some(agent) = self.0.upgrade() else { return };
        agent.terminals.close_all();
    }
}

/// Build an `Agent` from `config`, load its identity, and run the
/// reconnection supervisor until the process is asked to exit.
pub async fn startup(config: Config, control_plane: Arc<dyn ControlPlane>) -> anyhow::Result<()> {
    let identity = crate::identity::IdentityStore::load(&config.identity)?;
    let agent = Agent::new(&config, control_plane);
    agent.set_device_identity(identity);
    agent.run().await;
}
