use crate::auth::AuthError;
use crate::config;
use keyring::Entry;
use std::fs;
use std::path::PathBuf;

const KEYRING_SERVICE: &str = "atoll-cli";
const KEYRING_ACCOUNT: &str = "api-token";
const FALLBACK_FILE: &str = "credentials";

/// Stores the platform API token in the OS keyring, falling back to a
/// permission-restricted file when no keyring is available (headless hosts,
/// CI containers).
pub struct CredentialStore {
    service: &'static str,
    account: &'static str,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self {
            service: KEYRING_SERVICE,
            account: KEYRING_ACCOUNT,
        }
    }
}

impl CredentialStore {
    pub fn store(&self, token: &str) -> Result<(), AuthError> {
        match Entry::new(self.service, self.account) {
            Ok(entry) => match entry.set_password(token) {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::warn!(
                        target: "atoll::auth",
                        error = %err,
                        "keyring unavailable; falling back to file storage"
                    );
                    self.store_file(token)
                }
            },
            Err(err) => {
                tracing::warn!(
                    target: "atoll::auth",
                    error = %err,
                    "keyring unavailable; falling back to file storage"
                );
                self.store_file(token)
            }
        }
    }

    pub fn load(&self) -> Result<Option<String>, AuthError> {
        if let Ok(entry) = Entry::new(self.service, self.account) {
            match entry.get_password() {
                Ok(token) => return Ok(Some(token)),
                Err(keyring::Error::NoEntry) => {}
                Err(err) => {
                    tracing::debug!(
                        target: "atoll::auth",
                        error = %err,
                        "keyring read failed; trying file fallback"
                    );
                }
            }
        }
        self.load_file()
    }

    /// Remove the stored token. Returns whether anything was deleted.
    pub fn clear(&self) -> Result<bool, AuthError> {
        let mut removed = false;
        if let Ok(entry) = Entry::new(self.service, self.account) {
            match entry.delete_password() {
                Ok(()) => removed = true,
                Err(keyring::Error::NoEntry) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "atoll::auth",
                        error = %err,
                        "failed to delete keyring entry"
                    );
                }
            }
        }
        let path = self.fallback_path()?;
        if path.exists() {
            fs::remove_file(&path).map_err(|err| AuthError::Storage(err.to_string()))?;
            removed = true;
        }
        Ok(removed)
    }

    fn store_file(&self, token: &str) -> Result<(), AuthError> {
        let path = self.fallback_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AuthError::Storage(err.to_string()))?;
        }
        fs::write(&path, token).map_err(|err| AuthError::Storage(err.to_string()))?;
        restrict_permissions(&path)?;
        Ok(())
    }

    fn load_file(&self) -> Result<Option<String>, AuthError> {
        let path = self.fallback_path()?;
        if !path.exists() {
            return Ok(None);
        }
        let token =
            fs::read_to_string(&path).map_err(|err| AuthError::Storage(err.to_string()))?;
        let token = token.trim().to_string();
        Ok(if token.is_empty() { None } else { Some(token) })
    }

    fn fallback_path(&self) -> Result<PathBuf, AuthError> {
        let dir = config::config_dir().map_err(|err| AuthError::Storage(err.to_string()))?;
        Ok(dir.join(FALLBACK_FILE))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|err| AuthError::Storage(err.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> Result<(), AuthError> {
    Ok(())
}
