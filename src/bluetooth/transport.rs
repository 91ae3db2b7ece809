/// GATT capability consumed by the download session
use async_trait::async_trait;
use bluer::Uuid;
use log::{debug, warn};

use crate::error::TransportError;

/// Invoked for every notification on a subscribed characteristic
pub type NotifyCallback = Box<dyn Fn(Vec<u8>) + Send + Sync + 'static>;

#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Open a session with the gadget at `address`
    ///
    /// Implementations must leave no link behind when this returns an error.
    async fn connect(&self, address: &str) -> Result<Box<dyn GattSession>, TransportError>;
}

#[async_trait]
pub trait GattSession: Send {
    async fn read_characteristic(&mut self, id: Uuid) -> Result<Vec<u8>, TransportError>;

    async fn write_characteristic(&mut self, id: Uuid, value: &[u8]) -> Result<(), TransportError>;

    async fn subscribe(&mut self, id: Uuid, on_notify: NotifyCallback) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, id: Uuid) -> Result<(), TransportError>;

    /// Drop subscriptions and disconnect. Must be safe to call repeatedly.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Scoped owner of a [`GattSession`]
///
/// Call [`SessionGuard::release`] on every normal exit path. If the guard is
/// dropped without being released (the owning future was cancelled or
/// panicked) the session is closed on a spawned task instead.
pub struct SessionGuard {
    session: Option<Box<dyn GattSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn GattSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session(&mut self) -> Result<&mut (dyn GattSession + 'static), TransportError> {
        self.session.as_deref_mut().ok_or(TransportError::Closed)
    }

    /// Close the session now; later calls are no-ops
    pub async fn release(&mut self) -> Result<(), TransportError> {
        match self.session.take() {
            Some(mut session) => session.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Session guard dropped unreleased, closing in background");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("Background session close failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("Session guard dropped outside a runtime, session not closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GattSession for CountingSession {
        async fn read_characteristic(&mut self, _id: Uuid) -> Result<Vec<u8>, TransportError> {
            Ok(Vec::new())
        }

        async fn write_characteristic(&mut self, _id: Uuid, _value: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn subscribe(&mut self, _id: Uuid, _cb: NotifyCallback) -> Result<(), TransportError> {
            Ok(())
        }

        async fn unsubscribe(&mut self, _id: Uuid) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn release_closes_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut guard = SessionGuard::new(Box::new(CountingSession {
            closes: closes.clone(),
        }));

        guard.release().await.unwrap();
        guard.release().await.unwrap();
        drop(guard);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreleased_guard_closes_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let guard = SessionGuard::new(Box::new(CountingSession {
            closes: closes.clone(),
        }));
        drop(guard);

        for _ in 0..10 {
            if closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_guard_refuses_further_use() {
        let mut guard = SessionGuard::new(Box::new(CountingSession {
            closes: Arc::new(AtomicUsize::new(0)),
        }));
        guard.release().await.unwrap();
        assert!(matches!(guard.session(), Err(TransportError::Closed)));
    }
}
