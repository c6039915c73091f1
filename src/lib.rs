pub mod agent;
pub mod cli;
pub mod config;
pub mod control_plane;
pub mod identity;
pub mod logging;

use std::sync::Arc;

pub use agent::Agent;
pub use config::Config;
pub use control_plane::ControlPlane;
pub use identity::{Identity, IdentityStore};

/// Loads this device's identity and runs the agent's reconnection
/// supervisor until the process is asked to exit. The sole entry point
/// used by `main`, kept separate from it so integration tests can drive
/// the same startup path the binary does.
pub async fn run(config: Config, control_plane: Arc<dyn ControlPlane>) -> anyhow::Result<()> {
    agent::startup(config, control_plane).await
}
