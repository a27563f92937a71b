//! Session → account binding.
//!
//! The provider addresses accounts through game sessions; a session is bound
//! to exactly one account when the game is launched. The processor checks
//! the binding on every request so a stale or forged session id can never
//! move another account's money.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<String, Uuid>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session to an account. Rebinding an existing session id to a
    /// different account is an error — session ids are single-owner.
    pub fn bind(&self, session_id: impl Into<String>, account_id: Uuid) -> Result<(), Uuid> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let session_id = session_id.into();
        match inner.get(&session_id) {
            Some(&existing) if existing != account_id => Err(existing),
            _ => {
                inner.insert(session_id, account_id);
                Ok(())
            }
        }
    }

    pub fn account_for(&self, session_id: &str) -> Option<Uuid> {
        let inner = self.inner.lock().expect("session store poisoned");
        inner.get(session_id).copied()
    }

    pub fn end(&self, session_id: &str) {
        let mut inner = self.inner.lock().expect("session store poisoned");
        inner.remove(session_id);
    }
}
