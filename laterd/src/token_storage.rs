use keyring::Entry;
use thiserror::Error;

const SERVICE_NAME: &str = "laterd";

pub const ACCESS_TOKEN_KEY: &str = "access_token";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Persistence backend for tokens, injectable so tests and headless
/// environments can avoid the system keyring.
pub trait TokenBackend: Send + Sync {
    fn save(&self, key: &str, token: &str) -> Result<(), TokenError>;
    fn load(&self, key: &str) -> Result<Option<String>, TokenError>;
    fn delete(&self, key: &str) -> Result<(), TokenError>;
}

/// System-keyring backend used in production.
pub struct KeyringBackend;

impl TokenBackend for KeyringBackend {
    fn save(&self, key: &str, token: &str) -> Result<(), TokenError> {
        Entry::new(SERVICE_NAME, key)?.set_password(token)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, TokenError> {
        match Entry::new(SERVICE_NAME, key)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), TokenError> {
        match Entry::new(SERVICE_NAME, key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Token storage with an injectable backend and a keyring default.
pub struct TokenStorage {
    backend: Box<dyn TokenBackend>,
}

impl TokenStorage {
    pub fn new() -> Self {
        Self::with_backend(Box::new(KeyringBackend))
    }

    pub fn with_backend(backend: Box<dyn TokenBackend>) -> Self {
        Self { backend }
    }

    pub fn save_access_token(&self, token: &str) -> Result<(), TokenError> {
        self.backend.save(ACCESS_TOKEN_KEY, token)
    }

    pub fn load_access_token(&self) -> Result<Option<String>, TokenError> {
        self.backend.load(ACCESS_TOKEN_KEY)
    }

    pub fn delete_access_token(&self) -> Result<(), TokenError> {
        self.backend.delete(ACCESS_TOKEN_KEY)
    }
}

impl Default for TokenStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryBackend {
        tokens: Mutex<HashMap<String, String>>,
    }

    impl TokenBackend for MemoryBackend {
        fn save(&self, key: &str, token: &str) -> Result<(), TokenError> {
            self.tokens
                .lock()
                .unwrap()
                .insert(key.to_string(), token.to_string());
            Ok(())
        }

        fn load(&self, key: &str) -> Result<Option<String>, TokenError> {
            Ok(self.tokens.lock().unwrap().get(key).cloned())
        }

        fn delete(&self, key: &str) -> Result<(), TokenError> {
            self.tokens.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[test]
    fn access_token_round_trips_through_the_backend() {
        let storage = TokenStorage::with_backend(Box::new(MemoryBackend::default()));

        assert!(storage.load_access_token().unwrap().is_none());

        storage.save_access_token("secret").unwrap();
        assert_eq!(storage.load_access_token().unwrap().as_deref(), Some("secret"));

        storage.delete_access_token().unwrap();
        assert!(storage.load_access_token().unwrap().is_none());
    }
}
