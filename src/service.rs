//! Single-entry facade over the auth provider, the document store, and the join routine.
//!
//! Holds the collaborators, the gating policy, an audit sink, and a clock so the HTTP
//! layer can call one method per user action. Join, leave, and toggle run one at a time
//! per `Service`: the read-then-write sequence of the join routine is not atomic in the
//! store, so in-process callers are serialized here.

use crate::accounts::{self, LoginOutcome, SignUpForm, SignUpOutcome};
use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, NullAuditSink};
use crate::auth::{AuthProvider, AuthUser, InMemoryAuthProvider};
use crate::config::Config;
use crate::error::{AccountError, AuthError, JoinError, StoreError};
use crate::gate::{self, GateDecision, GatePolicy};
use crate::matching::{self, JoinOutcome, LeaveOutcome, ToggleOutcome, WelcomeState};
use crate::persistence::{FilePersistence, PersistedState};
use crate::quiz::{self, QuizError};
use crate::store::{load_counts, DocumentStore, InMemoryStore};
use crate::types::{now_millis, GenderCounts, Question, Uid};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Millisecond clock that never returns the same value twice, so waiting order is total.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn now(&self) -> u64 {
        let wall = now_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Errors from quiz submission.
#[derive(Debug, thiserror::Error)]
pub enum AnswersError {
    #[error("{0}")]
    Quiz(#[from] QuizError),
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// In-process state that can be written to a file.
struct LocalState {
    store: Arc<InMemoryStore>,
    auth: Arc<InMemoryAuthProvider>,
    file: Option<FilePersistence>,
    /// Held from snapshot to rename so the newest snapshot is always the last one written.
    save_lock: Mutex<()>,
}

/// Provider or store failures are errors; everything else is a rejected request.
fn failure_outcome(e: &AccountError) -> AuditOutcome {
    match e {
        AccountError::Store(_) | AccountError::Auth(AuthError::Internal(_)) => AuditOutcome::Error,
        _ => AuditOutcome::Rejected,
    }
}

pub struct Service {
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    policy: GatePolicy,
    audit: Arc<dyn AuditSink>,
    clock: MonotonicClock,
    match_guard: Mutex<()>,
    local: Option<LocalState>,
}

impl Service {
    /// Service over arbitrary collaborators. Nothing is persisted.
    pub fn new(store: Arc<dyn DocumentStore>, auth: Arc<dyn AuthProvider>, policy: GatePolicy) -> Self {
        Self {
            store,
            auth,
            policy,
            audit: Arc::new(NullAuditSink),
            clock: MonotonicClock::default(),
            match_guard: Mutex::new(()),
            local: None,
        }
    }

    /// In-memory store and auth provider, with the given policy. For tests and local runs.
    pub fn in_memory(policy: GatePolicy, max_failed_attempts: u32) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let auth = Arc::new(InMemoryAuthProvider::new(max_failed_attempts));
        let mut svc = Self::new(store.clone(), auth.clone(), policy);
        svc.local = Some(LocalState {
            store,
            auth,
            file: None,
            save_lock: Mutex::new(()),
        });
        svc
    }

    /// Builds the local service from config: loads `DATA_FILE` if present.
    pub fn from_config(config: &Config) -> Result<Self, String> {
        let policy = GatePolicy {
            require_verified_email: config.require_verified_email,
        };
        let mut svc = Self::in_memory(policy, config.max_failed_attempts);
        if let Some(path) = &config.data_file {
            let file = FilePersistence::new(path);
            if let Some(state) = file.load()? {
                if let Some(local) = &svc.local {
                    local.store.restore(state.documents).map_err(|e| e.to_string())?;
                    local.auth.restore(state.auth).map_err(|e| e.to_string())?;
                }
                info!("state loaded from {}", path.display());
            }
            if let Some(local) = svc.local.as_mut() {
                local.file = Some(file);
            }
        }
        Ok(svc)
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    /// Shared handle to the auth provider, for the session middleware.
    pub fn auth_provider(&self) -> Arc<dyn AuthProvider> {
        Arc::clone(&self.auth)
    }

    /// The in-process auth provider, when this service owns one (emulator outbox access).
    pub fn local_auth(&self) -> Option<&InMemoryAuthProvider> {
        self.local.as_ref().map(|l| l.auth.as_ref())
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn audit(&self, event: AuditEvent) {
        self.audit.emit(&event);
    }

    /// Writes the persisted state, if a data file is configured. Failures are logged only.
    ///
    /// Saves are serialized, and the snapshot is taken between join routine runs so a
    /// match is never written without its counter change.
    pub fn persist(&self) {
        let Some(LocalState {
            store,
            auth,
            file: Some(file),
            save_lock,
        }) = &self.local
        else {
            return;
        };
        let Ok(_saving) = save_lock.lock() else {
            warn!("persist: save lock poisoned");
            return;
        };
        let snapshot = {
            let Ok(_matching) = self.match_guard.lock() else {
                warn!("persist: match guard poisoned");
                return;
            };
            store.snapshot().map_err(|e| e.to_string()).and_then(|documents| {
                auth.snapshot()
                    .map(|auth| PersistedState { documents, auth })
                    .map_err(|e| e.to_string())
            })
        };
        let state = match snapshot {
            Ok(s) => s,
            Err(e) => {
                warn!("persist: snapshot failed: {}", e);
                return;
            }
        };
        if let Err(e) = file.save(&state) {
            warn!("persist: save to {} failed: {}", file.path().display(), e);
        }
    }

    pub fn sign_up(&self, form: &SignUpForm) -> Result<SignUpOutcome, AccountError> {
        let now = self.now();
        let result = accounts::sign_up(self.store(), self.auth(), form, now);
        match &result {
            Ok(out) => {
                self.audit(
                    AuditEvent::new(out.uid.as_str(), AuditAction::Signup, AuditOutcome::Success)
                        .with_detail(serde_json::json!({ "username": out.username })),
                );
                self.persist();
            }
            Err(e) => self.audit(AuditEvent::failed(
                &form.username,
                AuditAction::Signup,
                failure_outcome(e),
                &e.to_string(),
            )),
        }
        result
    }

    pub fn log_in(&self, identifier: &str, password: &str) -> Result<LoginOutcome, AccountError> {
        let result = accounts::log_in(self.store(), self.auth(), identifier, password);
        match &result {
            Ok(out) => self.audit(AuditEvent::new(out.uid.as_str(), AuditAction::Login, AuditOutcome::Success)),
            Err(e) => {
                let code = match e {
                    AccountError::Auth(a) => a.code().to_string(),
                    other => other.to_string(),
                };
                self.audit(AuditEvent::failed(identifier.trim(), AuditAction::Login, failure_outcome(e), &code));
            }
        }
        result
    }

    pub fn log_out(&self, token: &str, uid: &Uid) {
        self.auth.sign_out(token);
        self.audit(AuditEvent::new(uid.as_str(), AuditAction::Logout, AuditOutcome::Success));
    }

    pub fn current_user(&self, token: &str) -> Option<AuthUser> {
        self.auth.current_user(token)
    }

    pub fn request_password_reset(&self, email: &str) -> Result<&'static str, AccountError> {
        let result = accounts::request_password_reset(self.auth(), email);
        let outcome = match &result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => failure_outcome(e),
        };
        self.audit(AuditEvent::new(email.trim(), AuditAction::PasswordResetRequested, outcome));
        if result.is_ok() {
            self.persist();
        }
        result
    }

    pub fn confirm_password_reset(&self, code: &str, new_password: &str) -> Result<(), AccountError> {
        self.auth.confirm_password_reset(code, new_password)?;
        self.audit(AuditEvent::new("anonymous", AuditAction::PasswordReset, AuditOutcome::Success));
        self.persist();
        Ok(())
    }

    pub fn confirm_email(&self, code: &str) -> Result<AuthUser, AccountError> {
        let user = self.auth.confirm_email_verification(code)?;
        self.audit(AuditEvent::new(user.uid.as_str(), AuditAction::EmailVerified, AuditOutcome::Success));
        self.persist();
        Ok(user)
    }

    pub fn resend_verification(&self, uid: &Uid) -> Result<(), AccountError> {
        self.auth.send_email_verification(uid)?;
        self.persist();
        Ok(())
    }

    pub fn gate(&self, path: &str, user: Option<&AuthUser>) -> GateDecision {
        gate::gate(self.store(), self.policy, path, user)
    }

    pub fn welcome(&self, uid: &Uid) -> Result<WelcomeState, JoinError> {
        matching::welcome_state(self.store(), uid)
    }

    fn guarded<T>(&self, f: impl FnOnce() -> Result<T, JoinError>) -> Result<T, JoinError> {
        let _guard = self
            .match_guard
            .lock()
            .map_err(|_| JoinError::Store(StoreError::Unavailable("match guard poisoned".into())))?;
        f()
    }

    fn audit_join<T: serde::Serialize>(&self, uid: &Uid, action: AuditAction, result: &Result<T, JoinError>) {
        let event = match result {
            Ok(out) => {
                let event = AuditEvent::new(uid.as_str(), action, AuditOutcome::Success);
                match serde_json::to_value(out) {
                    Ok(detail) => event.with_detail(detail),
                    Err(_) => event,
                }
            }
            Err(e @ JoinError::Store(_)) => AuditEvent::failed(uid.as_str(), action, AuditOutcome::Error, &e.to_string()),
            Err(e) => AuditEvent::failed(uid.as_str(), action, AuditOutcome::Rejected, &e.to_string()),
        };
        self.audit(event);
    }

    pub fn join(&self, uid: &Uid) -> Result<JoinOutcome, JoinError> {
        let result = self.guarded(|| matching::join(self.store(), uid, self.now()));
        self.audit_join(uid, AuditAction::Join, &result);
        if result.is_ok() {
            self.persist();
        }
        result
    }

    pub fn leave(&self, uid: &Uid) -> Result<LeaveOutcome, JoinError> {
        let result = self.guarded(|| matching::leave(self.store(), uid));
        self.audit_join(uid, AuditAction::Leave, &result);
        if result.is_ok() {
            self.persist();
        }
        result
    }

    pub fn toggle_waiting(&self, uid: &Uid) -> Result<ToggleOutcome, JoinError> {
        let result = self.guarded(|| matching::toggle_waiting(self.store(), uid, self.now()));
        self.audit_join(uid, AuditAction::ToggleWaiting, &result);
        if result.is_ok() {
            self.persist();
        }
        result
    }

    pub fn counts(&self) -> Result<GenderCounts, StoreError> {
        load_counts(self.store())
    }

    pub fn questions(&self) -> Result<Vec<Question>, StoreError> {
        quiz::load_questions(self.store())
    }

    /// Validates answers against the current questions and stores them on the profile.
    pub fn submit_answers(&self, uid: &Uid, answers: &BTreeMap<usize, usize>) -> Result<usize, AnswersError> {
        let questions = self.questions()?;
        quiz::validate_answers(&questions, answers)?;
        let n = quiz::submit_answers(self.store(), uid, answers)?;
        self.audit(
            AuditEvent::new(uid.as_str(), AuditAction::QuizSubmit, AuditOutcome::Success)
                .with_detail(serde_json::json!({ "answered": n })),
        );
        self.persist();
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::auth::EmailKind;
    use crate::gate::Route;

    fn init_log() {
        let _ = env_logger::try_init();
    }

    fn form(username: &str, gender: &str) -> SignUpForm {
        SignUpForm {
            username: username.into(),
            email: format!("{}@example.com", username),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
            gender: gender.into(),
        }
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let c = MonotonicClock::default();
        let a = c.now();
        let b = c.now();
        let d = c.now();
        assert!(a < b && b < d);
    }

    #[test]
    fn full_flow_signup_verify_login_join_match() {
        init_log();
        let sink = InMemoryAuditSink::new();
        let svc = Service::in_memory(GatePolicy::default(), 5).with_audit(Arc::new(sink.clone()));

        let ann = svc.sign_up(&form("ann", "female")).unwrap();
        let bob = svc.sign_up(&form("bob", "male")).unwrap();

        let login = svc.log_in("ann", "secret1").unwrap();
        let user = svc.current_user(&login.token).unwrap();
        assert_eq!(svc.gate("/welcome", Some(&user)), GateDecision::Redirect(Route::Home));

        let outbox = svc.local_auth().unwrap();
        let code = outbox.last_email("ann@example.com", EmailKind::VerifyEmail).unwrap().code;
        svc.confirm_email(&code).unwrap();
        let user = svc.current_user(&login.token).unwrap();
        assert_eq!(svc.gate("/", Some(&user)), GateDecision::Redirect(Route::Welcome));

        assert!(matches!(svc.join(&ann.uid).unwrap(), JoinOutcome::Waiting { .. }));
        assert_eq!(svc.counts().unwrap(), GenderCounts { male: 0, female: 1 });
        assert_eq!(svc.join(&bob.uid).unwrap(), JoinOutcome::Matched { with: ann.uid.clone() });
        assert_eq!(svc.counts().unwrap(), GenderCounts::default());
        assert_eq!(svc.gate("/welcome", Some(&user)), GateDecision::Redirect(Route::Joined));

        let actions = sink.actions();
        assert!(actions.contains(&AuditAction::Signup));
        assert!(actions.contains(&AuditAction::EmailVerified));
        assert_eq!(sink.count(AuditAction::Join, AuditOutcome::Success), 2);
    }

    #[test]
    fn rejected_join_is_audited() {
        let sink = InMemoryAuditSink::new();
        let svc = Service::in_memory(GatePolicy::default(), 5).with_audit(Arc::new(sink.clone()));
        let err = svc.join(&Uid::from("ghost")).unwrap_err();
        assert_eq!(err, JoinError::ProfileNotFound);
        let events = sink.events();
        let last = events.last().unwrap();
        assert_eq!(last.action, AuditAction::Join);
        assert_eq!(last.outcome, AuditOutcome::Rejected);
    }

    #[test]
    fn answers_are_validated_before_storing() {
        let svc = Service::in_memory(GatePolicy::default(), 5);
        let ann = svc.sign_up(&form("ann", "female")).unwrap();
        let err = svc.submit_answers(&ann.uid, &BTreeMap::from([(0, 0)])).unwrap_err();
        assert!(matches!(err, AnswersError::Quiz(QuizError::OptionOutOfRange { .. })));
    }

    #[test]
    fn persists_and_reloads_from_data_file() {
        let path = std::env::temp_dir().join(format!("only_one_service_{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let config = Config {
            data_file: Some(path.clone()),
            ..Default::default()
        };
        let uid = {
            let svc = Service::from_config(&config).unwrap();
            let out = svc.sign_up(&form("ann", "female")).unwrap();
            svc.join(&out.uid).unwrap();
            out.uid
        };
        let svc = Service::from_config(&config).unwrap();
        assert!(svc.welcome(&uid).unwrap().waiting);
        assert_eq!(svc.counts().unwrap().female, 1);
        assert!(svc.log_in("ann@example.com", "secret1").is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn concurrent_sign_ups_all_survive_reload() {
        let path = std::env::temp_dir().join(format!("only_one_concurrent_{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let config = Config {
            data_file: Some(path.clone()),
            ..Default::default()
        };
        let svc = Arc::new(Service::from_config(&config).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let svc = Arc::clone(&svc);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let gender = if i % 2 == 0 { "male" } else { "female" };
                        svc.sign_up(&form(&format!("t{}n{}", t, i), gender)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        drop(svc);

        let reloaded = Service::from_config(&config).unwrap();
        assert_eq!(reloaded.store().list(crate::types::USERS).unwrap().len(), 80);
        assert_eq!(reloaded.store().list(crate::types::USERNAMES).unwrap().len(), 80);
        assert!(reloaded.log_in("t7n9", "secret1").is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn concurrent_joins_match_each_user_once() {
        init_log();
        let svc = Arc::new(Service::in_memory(GatePolicy::default(), 5));
        let uids: Vec<Uid> = (0..24)
            .map(|i| {
                let gender = if i % 3 == 0 { "male" } else { "female" };
                svc.sign_up(&form(&format!("user{}", i), gender)).unwrap().uid
            })
            .collect();

        let handles: Vec<_> = uids
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, uid)| {
                let svc = Arc::clone(&svc);
                std::thread::spawn(move || {
                    let mut matches = 0;
                    let presses = if i % 4 == 0 { 2 } else { 1 };
                    for _ in 0..presses {
                        match svc.toggle_waiting(&uid) {
                            Ok(out) if out.matched_with.is_some() => matches += 1,
                            Ok(_) | Err(JoinError::AlreadyJoined) => {}
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    matches
                })
            })
            .collect();
        let matches: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let profiles: Vec<(Uid, crate::types::UserProfile)> = uids
            .iter()
            .map(|u| (u.clone(), crate::store::load_profile(svc.store(), u).unwrap().unwrap()))
            .collect();
        let joined = profiles.iter().filter(|(_, p)| p.joined).count();
        assert_eq!(joined, matches * 2, "each match joins exactly two users");
        for (uid, p) in profiles.iter().filter(|(_, p)| p.joined) {
            let partner = p.matched_with.as_ref().unwrap();
            let (_, q) = profiles.iter().find(|(u, _)| u == partner).unwrap();
            assert_eq!(q.matched_with.as_ref(), Some(uid));
            assert_ne!(q.gender, p.gender);
            assert!(!p.waiting);
        }
        let waiting = |g: crate::types::Gender| {
            profiles
                .iter()
                .filter(|(_, p)| p.gender == Some(g) && p.waiting && !p.joined)
                .count() as i64
        };
        assert_eq!(
            svc.counts().unwrap(),
            GenderCounts {
                male: waiting(crate::types::Gender::Male),
                female: waiting(crate::types::Gender::Female),
            }
        );
    }
}
