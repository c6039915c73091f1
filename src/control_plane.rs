/// External collaborator the agent supervisor notifies of protocol-level
/// events it does not itself act on. Modelled the way the teacher models
/// its handler trait: every method has a default no-op body, so the
/// supervisor can be built and tested without a real implementation wired
/// in.
pub trait ControlPlane: Send + Sync {
    /// The server assigned (or re-issued) this agent's m2m identity
    /// (the `set-identity` uuid, not the on-disk serial/auth pair).
    #[allow(unused_variables)]
    fn associate(&self, m2m_identity: &str) {}

    /// Periodic telemetry push.
    fn sync(&self) {}

    /// A `scan-directory` instruction arrived.
    fn trigger_directory_scan(&self) {}
}

/// A control plane that does nothing; used where no real collaborator is
/// wired in.
pub struct NullControlPlane;

impl ControlPlane for NullControlPlane {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_control_plane_accepts_every_call() {
        let plane = NullControlPlane;
        plane.associate("abc-123");
        plane.sync();
        plane.trigger_directory_scan();
    }
}
