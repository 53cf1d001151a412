//! Crisis latch shared by both modes.
//!
//! Raised by a reply flagged `crisis`, cleared only by the user acknowledging
//! the alert. While raised, no turn may be submitted in either mode. The gate
//! itself never queues or drops submissions; callers consult it.

use std::sync::Arc;

use ai_therapist_types::CrisisBanner;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct CrisisAlert {
    message: String,
    banner: Option<CrisisBanner>,
}

impl CrisisAlert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            banner: None,
        }
    }

    pub fn with_banner(mut self, banner: Option<CrisisBanner>) -> Self {
        self.banner = banner;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn banner(&self) -> Option<&CrisisBanner> {
        self.banner.as_ref()
    }
}

impl From<&str> for CrisisAlert {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CrisisAlert {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

#[derive(Clone)]
pub struct CrisisGate {
    state: Arc<watch::Sender<Option<CrisisAlert>>>,
}

impl CrisisGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Raising while already raised replaces the alert.
    pub fn raise(&self, alert: impl Into<CrisisAlert>) {
        let alert = alert.into();
        tracing::info!("crisis raised, suspending turn submission");
        self.state.send_replace(Some(alert));
    }

    pub fn clear(&self) {
        if self.state.send_replace(None).is_some() {
            tracing::info!("crisis acknowledged, resuming turn submission");
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn alert(&self) -> Option<CrisisAlert> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CrisisAlert>> {
        self.state.subscribe()
    }
}

impl Default for CrisisGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CrisisGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrisisGate")
            .field("alert", &*self.state.borrow())
            .finish()
    }
}
