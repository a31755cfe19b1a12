//! Auth provider seam, an in-process provider, and the session middleware.
//!
//! [`AuthProvider`] covers what the app needs from a managed auth service: email/password
//! accounts, sessions, email verification, and password reset. [`InMemoryAuthProvider`]
//! behaves like a local emulator: emails are not delivered but kept in an outbox so the
//! action codes can be confirmed by tests or a dev UI.
//!
//! HTTP requests carry the session as `Authorization: Bearer <token>`; [`require_session`]
//! resolves it and injects the [`AuthUser`] into request extensions.

use crate::error::AuthError;
use crate::types::Uid;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Signed-in user as seen by the app.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuthUser {
    pub uid: Uid,
    pub email: String,
    pub email_verified: bool,
}

/// Result of a successful sign-in: the user and an opaque session token.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Session {
    pub token: String,
    pub user: AuthUser,
}

/// What an outgoing email was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    VerifyEmail,
    PasswordReset,
}

/// An email the provider would have sent, with its one-time action code.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub kind: EmailKind,
    pub code: String,
}

/// Managed auth operations used by the app.
pub trait AuthProvider: Send + Sync {
    /// Creates an email/password account. The new account starts unverified.
    fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    /// Signs in and opens a session.
    fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Closes a session. Unknown tokens are ignored.
    fn sign_out(&self, token: &str);

    /// User behind a session token, if the session is open.
    fn current_user(&self, token: &str) -> Option<AuthUser>;

    fn send_email_verification(&self, uid: &Uid) -> Result<(), AuthError>;

    fn confirm_email_verification(&self, code: &str) -> Result<AuthUser, AuthError>;

    fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    fn confirm_password_reset(&self, code: &str, new_password: &str) -> Result<(), AuthError>;
}

/// Minimum password length accepted by the provider.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Stored account. Passwords are kept as salted SHA-256.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Account {
    pub uid: Uid,
    pub email: String,
    pub email_verified: bool,
    salt: String,
    password_hash: String,
    #[serde(default)]
    failed_attempts: u32,
}

impl Account {
    fn user(&self) -> AuthUser {
        AuthUser {
            uid: self.uid.clone(),
            email: self.email.clone(),
            email_verified: self.email_verified,
        }
    }

    fn password_matches(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }
}

/// Persistable provider state: accounts and pending action codes. Sessions are not persisted.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct AuthSnapshot {
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub pending: Vec<(String, EmailKind, Uid)>,
}

#[derive(Debug, Default)]
struct AuthState {
    /// Lower-cased email -> account.
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, Uid>,
    /// Action code -> (kind, uid).
    pending: HashMap<String, (EmailKind, Uid)>,
    outbox: Vec<OutgoingEmail>,
}

impl AuthState {
    fn by_uid(&self, uid: &Uid) -> Option<&Account> {
        self.accounts.values().find(|a| &a.uid == uid)
    }

    fn by_uid_mut(&mut self, uid: &Uid) -> Option<&mut Account> {
        self.accounts.values_mut().find(|a| &a.uid == uid)
    }
}

/// In-process auth provider.
#[derive(Debug)]
pub struct InMemoryAuthProvider {
    state: Mutex<AuthState>,
    max_failed_attempts: u32,
}

impl Default for InMemoryAuthProvider {
    fn default() -> Self {
        Self::new(5)
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loose shape check: one `@`, non-empty local part, a dot in the domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let mut parts = email.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

impl InMemoryAuthProvider {
    /// `max_failed_attempts` consecutive wrong passwords lock the account until a password reset.
    pub fn new(max_failed_attempts: u32) -> Self {
        Self {
            state: Mutex::new(AuthState::default()),
            max_failed_attempts,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AuthState>, AuthError> {
        self.state
            .lock()
            .map_err(|_| AuthError::Internal("auth state lock poisoned".into()))
    }

    /// Every email "sent" so far, oldest first.
    pub fn outbox(&self) -> Vec<OutgoingEmail> {
        self.lock().map(|s| s.outbox.clone()).unwrap_or_default()
    }

    /// Most recent email of `kind` sent to `to`.
    pub fn last_email(&self, to: &str, kind: EmailKind) -> Option<OutgoingEmail> {
        self.outbox()
            .into_iter()
            .rev()
            .find(|m| m.kind == kind && m.to.eq_ignore_ascii_case(to))
    }

    pub fn snapshot(&self) -> Result<AuthSnapshot, AuthError> {
        let state = self.lock()?;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.uid.cmp(&b.uid));
        let pending = state
            .pending
            .iter()
            .map(|(code, (kind, uid))| (code.clone(), *kind, uid.clone()))
            .collect();
        Ok(AuthSnapshot { accounts, pending })
    }

    pub fn restore(&self, snapshot: AuthSnapshot) -> Result<(), AuthError> {
        let mut state = self.lock()?;
        state.accounts = snapshot
            .accounts
            .into_iter()
            .map(|a| (a.email.to_lowercase(), a))
            .collect();
        state.pending = snapshot
            .pending
            .into_iter()
            .map(|(code, kind, uid)| (code, (kind, uid)))
            .collect();
        state.sessions.clear();
        Ok(())
    }

    fn queue_email(state: &mut AuthState, to: &str, kind: EmailKind, uid: Uid) {
        let code = random_token(24);
        state.pending.insert(code.clone(), (kind, uid));
        state.outbox.push(OutgoingEmail {
            to: to.to_string(),
            kind,
            code,
        });
    }
}

impl AuthProvider for InMemoryAuthProvider {
    fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let mut state = self.lock()?;
        let key = email.to_lowercase();
        if state.accounts.contains_key(&key) {
            return Err(AuthError::EmailAlreadyInUse);
        }
        let salt = random_token(16);
        let account = Account {
            uid: Uid(random_token(28)),
            email: email.to_string(),
            email_verified: false,
            password_hash: hash_password(&salt, password),
            salt,
            failed_attempts: 0,
        };
        let user = account.user();
        state.accounts.insert(key, account);
        log::info!("auth account created uid={}", user.uid);
        Ok(user)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }
        let max = self.max_failed_attempts;
        let mut state = self.lock()?;
        let account = state
            .accounts
            .get_mut(&email.to_lowercase())
            .ok_or(AuthError::UserNotFound)?;
        if max > 0 && account.failed_attempts >= max {
            return Err(AuthError::TooManyRequests);
        }
        if !account.password_matches(password) {
            account.failed_attempts += 1;
            log::warn!(
                "auth sign-in failed uid={} failed_attempts={}",
                account.uid,
                account.failed_attempts
            );
            return Err(AuthError::WrongPassword);
        }
        account.failed_attempts = 0;
        let user = account.user();
        let token = random_token(40);
        state.sessions.insert(token.clone(), user.uid.clone());
        Ok(Session { token, user })
    }

    fn sign_out(&self, token: &str) {
        if let Ok(mut state) = self.lock() {
            state.sessions.remove(token);
        }
    }

    fn current_user(&self, token: &str) -> Option<AuthUser> {
        let state = self.lock().ok()?;
        let uid = state.sessions.get(token)?;
        state.by_uid(uid).map(Account::user)
    }

    fn send_email_verification(&self, uid: &Uid) -> Result<(), AuthError> {
        let mut state = self.lock()?;
        let email = state.by_uid(uid).ok_or(AuthError::UserNotFound)?.email.clone();
        Self::queue_email(&mut state, &email, EmailKind::VerifyEmail, uid.clone());
        Ok(())
    }

    fn confirm_email_verification(&self, code: &str) -> Result<AuthUser, AuthError> {
        let mut state = self.lock()?;
        let uid = match state.pending.get(code) {
            Some((EmailKind::VerifyEmail, uid)) => uid.clone(),
            _ => return Err(AuthError::InvalidActionCode),
        };
        state.pending.remove(code);
        let account = state.by_uid_mut(&uid).ok_or(AuthError::UserNotFound)?;
        account.email_verified = true;
        Ok(account.user())
    }

    fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }
        let mut state = self.lock()?;
        let (to, uid) = state
            .accounts
            .get(&email.to_lowercase())
            .map(|a| (a.email.clone(), a.uid.clone()))
            .ok_or(AuthError::UserNotFound)?;
        Self::queue_email(&mut state, &to, EmailKind::PasswordReset, uid);
        Ok(())
    }

    fn confirm_password_reset(&self, code: &str, new_password: &str) -> Result<(), AuthError> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let mut state = self.lock()?;
        let uid = match state.pending.get(code) {
            Some((EmailKind::PasswordReset, uid)) => uid.clone(),
            _ => return Err(AuthError::InvalidActionCode),
        };
        state.pending.remove(code);
        let account = state.by_uid_mut(&uid).ok_or(AuthError::UserNotFound)?;
        account.salt = random_token(16);
        account.password_hash = hash_password(&account.salt, new_password);
        account.failed_attempts = 0;
        // A reset revokes every open session of the account.
        state.sessions.retain(|_, u| u != &uid);
        Ok(())
    }
}

/// Returns the session token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let v = headers.get(header::AUTHORIZATION)?;
    let s = v.to_str().ok()?.trim();
    if s.len() >= 7 && s.get(..7).map(|p| p.eq_ignore_ascii_case("bearer ")).unwrap_or(false) {
        let token = s.get(7..).unwrap_or("").trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

/// The token that authenticated the current request, stored next to the [`AuthUser`].
#[derive(Clone, Debug)]
pub struct SessionToken(pub String);

/// Session middleware: requires a bearer token for an open session and injects
/// [`AuthUser`] and [`SessionToken`]; returns 401 otherwise.
pub async fn require_session(
    mut req: Request<Body>,
    next: Next,
    provider: Arc<dyn AuthProvider>,
) -> Response {
    let token = match bearer_token(req.headers()) {
        Some(t) => t,
        None => {
            return (StatusCode::UNAUTHORIZED, "missing or invalid Authorization").into_response();
        }
    };
    match provider.current_user(&token) {
        Some(user) => {
            req.extensions_mut().insert(user);
            req.extensions_mut().insert(SessionToken(token));
            next.run(req).await
        }
        None => (StatusCode::UNAUTHORIZED, "invalid or expired session").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@@b.co"));
        assert!(!is_valid_email("plain"));
    }

    #[test]
    fn create_then_sign_in() {
        let auth = InMemoryAuthProvider::default();
        let user = auth.create_user("Ann@Example.com", "secret1").unwrap();
        assert!(!user.email_verified);
        let session = auth.sign_in("ann@example.com", "secret1").unwrap();
        assert_eq!(session.user.uid, user.uid);
        assert_eq!(auth.current_user(&session.token).unwrap().uid, user.uid);
        auth.sign_out(&session.token);
        assert!(auth.current_user(&session.token).is_none());
    }

    #[test]
    fn create_rejects_bad_input() {
        let auth = InMemoryAuthProvider::default();
        assert_eq!(auth.create_user("nope", "secret1"), Err(AuthError::InvalidEmail));
        assert_eq!(auth.create_user("a@b.co", "12345"), Err(AuthError::WeakPassword));
        auth.create_user("a@b.co", "123456").unwrap();
        assert_eq!(auth.create_user("A@B.co", "123456"), Err(AuthError::EmailAlreadyInUse));
    }

    #[test]
    fn sign_in_errors_and_lockout() {
        let auth = InMemoryAuthProvider::new(2);
        auth.create_user("a@b.co", "123456").unwrap();
        assert_eq!(auth.sign_in("x@b.co", "123456").unwrap_err(), AuthError::UserNotFound);
        assert_eq!(auth.sign_in("a@b.co", "bad").unwrap_err(), AuthError::WrongPassword);
        assert_eq!(auth.sign_in("a@b.co", "bad").unwrap_err(), AuthError::WrongPassword);
        assert_eq!(auth.sign_in("a@b.co", "123456").unwrap_err(), AuthError::TooManyRequests);
    }

    #[test]
    fn verification_code_flow() {
        let auth = InMemoryAuthProvider::default();
        let user = auth.create_user("a@b.co", "123456").unwrap();
        auth.send_email_verification(&user.uid).unwrap();
        let mail = auth.last_email("a@b.co", EmailKind::VerifyEmail).unwrap();
        assert_eq!(
            auth.confirm_password_reset(&mail.code, "abcdef").unwrap_err(),
            AuthError::InvalidActionCode
        );
        let verified = auth.confirm_email_verification(&mail.code).unwrap();
        assert!(verified.email_verified);
        assert_eq!(
            auth.confirm_email_verification(&mail.code).unwrap_err(),
            AuthError::InvalidActionCode
        );
    }

    #[test]
    fn password_reset_unlocks_and_revokes_sessions() {
        let auth = InMemoryAuthProvider::new(1);
        auth.create_user("a@b.co", "123456").unwrap();
        let session = auth.sign_in("a@b.co", "123456").unwrap();
        let _ = auth.sign_in("a@b.co", "wrong");
        assert_eq!(auth.sign_in("a@b.co", "123456").unwrap_err(), AuthError::TooManyRequests);
        auth.send_password_reset("a@b.co").unwrap();
        let mail = auth.last_email("a@b.co", EmailKind::PasswordReset).unwrap();
        auth.confirm_password_reset(&mail.code, "newpass").unwrap();
        assert!(auth.current_user(&session.token).is_none());
        assert!(auth.sign_in("a@b.co", "newpass").is_ok());
    }

    #[test]
    fn snapshot_restore_keeps_accounts() {
        let auth = InMemoryAuthProvider::default();
        auth.create_user("a@b.co", "123456").unwrap();
        let snap = auth.snapshot().unwrap();
        let other = InMemoryAuthProvider::default();
        other.restore(snap).unwrap();
        assert!(other.sign_in("a@b.co", "123456").is_ok());
    }
}
