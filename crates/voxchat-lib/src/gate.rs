//! Device gate — one permit for the shared compute device.
//!
//! Every engine call, from every request, holds the permit while its stream
//! is being drained, so the speech and text engines never run concurrently.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::engine::EngineError;

#[derive(Clone)]
pub struct DeviceGate {
    permits: Arc<Semaphore>,
}

impl Default for DeviceGate {
    fn default() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }
}

impl DeviceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of the device. Released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::GateClosed)
    }

    /// Whether the device is currently free.
    pub fn is_idle(&self) -> bool {
        self.permits.available_permits() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permit_is_exclusive() {
        let gate = DeviceGate::new();
        let permit = gate.acquire().await.unwrap();
        assert!(!gate.is_idle());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(drop) })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(permit);
        waiter.await.unwrap().unwrap();
        assert!(gate.is_idle());
    }
}
