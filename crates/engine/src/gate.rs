use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::InferenceError;

/// "One model call at a time" capability.
///
/// Clones share the same permit, so handing the same gate to the vision stage
/// and to the anchor extractor serializes their device use. Tests just build a
/// fresh gate.
#[derive(Debug, Clone)]
pub struct InferenceGate {
    semaphore: Arc<Semaphore>,
}

/// Held for the duration of one inference call.
#[derive(Debug)]
pub struct InferencePermit {
    _permit: OwnedSemaphorePermit,
}

impl InferenceGate {
    pub fn exclusive() -> Self {
        InferenceGate {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wraps a semaphore owned by the wider pipeline.
    pub fn from_semaphore(semaphore: Arc<Semaphore>) -> Self {
        InferenceGate { semaphore }
    }

    pub async fn acquire(&self) -> Result<InferencePermit, InferenceError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| InferenceError::GateClosed)?;
        Ok(InferencePermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for InferenceGate {
    fn default() -> Self {
        InferenceGate::exclusive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_one_permit() {
        let gate = InferenceGate::exclusive();
        let other_stage = gate.clone();

        let permit = gate.acquire().await.unwrap();
        assert_eq!(other_stage.available(), 0);
        drop(permit);
        assert_eq!(other_stage.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_gate_fails() {
        let semaphore = Arc::new(Semaphore::new(1));
        let gate = InferenceGate::from_semaphore(semaphore.clone());
        semaphore.close();
        assert!(matches!(gate.acquire().await, Err(InferenceError::GateClosed)));
    }
}
