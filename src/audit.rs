//! Audit trail for account and matching actions.
//!
//! One JSON line per [`AuditEvent`]: `at_ms`, `actor`, `action`, optional `detail`, `outcome`.
//! The actor is a uid, or the submitted identifier for forms sent before sign-in.

use crate::types::now_millis;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Signup,
    Login,
    Logout,
    EmailVerified,
    PasswordResetRequested,
    PasswordReset,
    Join,
    Leave,
    ToggleWaiting,
    QuizSubmit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// Refused by validation or a precondition.
    Rejected,
    /// The store or provider failed.
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub at_ms: u64,
    pub actor: String,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    pub fn new(actor: impl Into<String>, action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            at_ms: now_millis(),
            actor: actor.into(),
            action,
            detail: None,
            outcome,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Event carrying only an error message as detail.
    pub fn failed(actor: impl Into<String>, action: AuditAction, outcome: AuditOutcome, error: &str) -> Self {
        Self::new(actor, action, outcome).with_detail(serde_json::json!({ "error": error }))
    }
}

/// Receives every audit event the service emits.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// JSON lines on stdout. Used by the server binary.
pub struct StdoutAuditSink;

impl AuditSink for StdoutAuditSink {
    fn emit(&self, event: &AuditEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("audit event not serializable: {}", e),
        }
    }
}

pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn emit(&self, _event: &AuditEvent) {}
}

/// Keeps events in memory. Clones share one buffer.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events().into_iter().map(|e| e.action).collect()
    }

    pub fn count(&self, action: AuditAction, outcome: AuditOutcome) -> usize {
        self.events()
            .iter()
            .filter(|e| e.action == action && e.outcome == outcome)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.clear();
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event.clone());
        }
    }
}
