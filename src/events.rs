use tokio::sync::broadcast;
use uuid::Uuid;

/// Outbound auth events other components (onboarding, audit) can subscribe
/// to. Delivery is best-effort: a send with no live receivers is fine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    EmailVerified { user_id: Uuid },
    PasswordReset { user_id: Uuid },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: AuthEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(?event, "auth event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(32)
    }
}
