//! Lock lógico por `(policy_id, user_id)`.
//!
//! El mutex de tokio es justo (FIFO), así que las entradas de un mismo
//! usuario se procesan en orden de llegada. Usuarios distintos no comparten
//! lock y avanzan en paralelo.
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::CoreEngineError;

#[derive(Debug, Default)]
pub struct UserLocks {
    inner: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Espera el lock hasta `timeout` por intento, con `retries` reintentos.
    pub async fn acquire(&self,
                         policy_id: &str,
                         user_id: &str,
                         timeout: Duration,
                         retries: u32)
                         -> Result<OwnedMutexGuard<()>, CoreEngineError> {
        let lock = self.inner
                       .entry((policy_id.to_string(), user_id.to_string()))
                       .or_default()
                       .clone();
        for attempt in 0..=retries {
            match tokio::time::timeout(timeout, lock.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => log::warn!("lock {}/{} busy (attempt {} of {})", policy_id, user_id, attempt + 1, retries + 1),
            }
        }
        Err(CoreEngineError::Concurrency(format!("could not acquire lock for {}/{} after {} attempt(s)",
                                                 policy_id,
                                                 user_id,
                                                 retries + 1)))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
