//! Single-use password cell

use std::sync::{Mutex, PoisonError};

/// A password that can be spent once
///
/// `peek` hands a copy to the login handshake, which enforces its own
/// one-attempt limit. `take` and `clear` discard the secret for good; there
/// is no way to put it back.
#[derive(Default)]
pub struct OneShotPassword {
    secret: Mutex<Option<String>>,
}

impl OneShotPassword {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: Mutex::new(secret),
        }
    }

    /// Copy of the secret, if still held
    pub fn peek(&self) -> Option<String> {
        self.secret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Consume the secret
    pub fn take(&self) -> Option<String> {
        self.secret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Discard the secret without using it
    pub fn clear(&self) {
        drop(self.take());
    }

    pub fn is_held(&self) -> bool {
        self.secret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for OneShotPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotPassword")
            .field("held", &self.is_held())
            .finish()
    }
}
