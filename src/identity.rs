use std::fs;

use crate::config::IdentityConfig;

/// The two values that identify this device to the M2M server.
#[derive(Debug, Clone)]
pub struct Identity {
    pub serial: String,
    pub auth: String,
}

pub struct IdentityStore;

impl IdentityStore {
    /// Read the serial and auth files named by `config`, trimming
    /// whitespace. The only unrecoverable initialisation error in this
    /// agent: with no override, a missing file here is fatal.
    pub fn load(config: &IdentityConfig) -> anyhow::Result<Identity> {
        let (serial_path, auth_path) = config.resolve();

        let serial = fs::read_to_string(&serial_path)
            .map_err(|e| anyhow::anyhow!("failed to read serial file '{}': {}", serial_path, e))?
            .trim()
            .to_string();
        let auth = fs::read_to_string(&auth_path)
            .map_err(|e| anyhow::anyhow!("failed to read auth file '{}': {}", auth_path, e))?
            .trim()
            .to_string();

        Ok(Identity { serial, auth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_trims_both_files() {
        let dir = std::env::temp_dir().join(format!("dataplicity-identity-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("serial"), "ABC123\n").unwrap();
        std::fs::write(dir.join("auth"), "  secret-token  \n").unwrap();

        let config = IdentityConfig { dir: Some(dir.to_str().unwrap().to_string()), serial_path: None, auth_path: None };
        let identity = IdentityStore::load(&config).unwrap();
        assert_eq!(identity.serial, "ABC123");
        assert_eq!(identity.auth, "secret-token");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_an_error() {
        let config = IdentityConfig {
            dir: Some("/nonexistent/dataplicity-test-dir".to_string()),
            serial_path: None,
            auth_path: None,
        };
        assert!(IdentityStore::load(&config).is_err());
    }
}
