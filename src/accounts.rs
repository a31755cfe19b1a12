//! Sign-up, login, and password reset.
//!
//! Each operation validates its form locally, then talks to the auth provider and the
//! document store. Errors are [`AccountError`]s whose `Display` is the message shown
//! next to the form; login errors go through [`friendly_login_message`] first.

use crate::error::{AccountError, AuthError};
use crate::store::{load_profile, load_username, to_document, DocumentStore};
use crate::types::{Gender, UserProfile, UsernameRecord, Uid, USERNAMES, USERS};
use log::{info, warn};

/// Notice shown after a successful sign-up.
pub const VERIFICATION_SENT: &str = "Verification link sent. Please check your email.";
/// Notice shown after a reset email is sent.
pub const RESET_SENT: &str = "Check your email for a reset link.";
pub const SIGN_UP_FAILED: &str = "Failed to create account.";
pub const RESET_FAILED: &str = "Failed to send reset email.";
pub const LOGIN_FAILED: &str = "Login failed. Please try again.";

/// Maximum username length, in characters.
pub const MAX_USERNAME_LEN: usize = 30;

/// Sign-up form as submitted.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct SignUpForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub gender: String,
}

/// Sign-up form after local validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidSignUp {
    /// Lower-cased.
    pub username: String,
    pub email: String,
    pub password: String,
    pub gender: Gender,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct SignUpOutcome {
    pub uid: Uid,
    pub username: String,
    pub notice: &'static str,
    pub next: &'static str,
}

/// Checks a username: 1-30 of `a-z 0-9 . _` after lower-casing, no leading or trailing
/// `.`/`_`, no `..`.
pub fn is_valid_username(username: &str) -> bool {
    if username.is_empty() {
        return false;
    }
    let user = username.to_lowercase();
    let len = user.chars().count();
    if len > MAX_USERNAME_LEN {
        return false;
    }
    if !user
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_')
    {
        return false;
    }
    if user.starts_with(['.', '_']) || user.ends_with(['.', '_']) {
        return false;
    }
    !user.contains("..")
}

impl SignUpForm {
    /// Local checks, in the order the user sees them.
    pub fn validate(&self) -> Result<ValidSignUp, AccountError> {
        if self.username.is_empty()
            || self.email.is_empty()
            || self.password.is_empty()
            || self.confirm_password.is_empty()
            || self.gender.is_empty()
        {
            return Err(AccountError::MissingFields);
        }
        if !is_valid_username(&self.username) {
            return Err(AccountError::InvalidUsername);
        }
        let gender = Gender::parse(&self.gender).ok_or(AccountError::InvalidGender)?;
        if self.password != self.confirm_password {
            return Err(AccountError::PasswordMismatch);
        }
        Ok(ValidSignUp {
            username: self.username.to_lowercase(),
            email: self.email.clone(),
            password: self.password.clone(),
            gender,
        })
    }
}

/// Creates the account, reserves the username, writes the profile, and sends the
/// verification email.
///
/// The username check and the reservation are separate calls: two concurrent sign-ups
/// for the same name can both pass the check.
pub fn sign_up(
    store: &dyn DocumentStore,
    auth: &dyn crate::auth::AuthProvider,
    form: &SignUpForm,
    now: u64,
) -> Result<SignUpOutcome, AccountError> {
    let valid = form.validate()?;
    if load_username(store, &valid.username)?.is_some() {
        return Err(AccountError::UsernameTaken);
    }

    let user = auth.create_user(&valid.email, &valid.password)?;

    let record = UsernameRecord {
        uid: Some(user.uid.clone()),
        created_at: now,
    };
    store.set(USERNAMES, &valid.username, to_document(&record)?)?;
    let profile = UserProfile {
        username: valid.username.clone(),
        email: valid.email.clone(),
        gender: Some(valid.gender),
        created_at: now,
        ..Default::default()
    };
    store.set(USERS, user.uid.as_str(), to_document(&profile)?)?;

    auth.send_email_verification(&user.uid)?;
    info!(
        "signed up uid={} username={} gender={}",
        user.uid, valid.username, valid.gender
    );
    Ok(SignUpOutcome {
        uid: user.uid,
        username: valid.username,
        notice: VERIFICATION_SENT,
        next: "/",
    })
}

/// Resolves a login identifier to an email: emails pass through, anything else is a username.
pub fn resolve_email(store: &dyn DocumentStore, identifier: &str) -> Result<String, AccountError> {
    let id = identifier.trim();
    if id.contains('@') {
        return Ok(id.to_string());
    }
    let record = load_username(store, &id.to_lowercase())?.ok_or(AccountError::UnknownUsername)?;
    let uid = record.uid.ok_or(AccountError::InvalidUsernameMapping)?;
    let email = load_profile(store, &uid)?
        .map(|p| p.email)
        .filter(|e| !e.is_empty())
        .ok_or(AccountError::UnresolvedEmail)?;
    Ok(email)
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub uid: Uid,
    pub email_verified: bool,
    pub next: &'static str,
}

/// Signs in with a username or email.
pub fn log_in(
    store: &dyn DocumentStore,
    auth: &dyn crate::auth::AuthProvider,
    identifier: &str,
    password: &str,
) -> Result<LoginOutcome, AccountError> {
    let email = resolve_email(store, identifier)?;
    let session = auth.sign_in(&email, password)?;
    info!("logged in uid={}", session.user.uid);
    Ok(LoginOutcome {
        token: session.token,
        uid: session.user.uid,
        email_verified: session.user.email_verified,
        next: "/welcome",
    })
}

/// Message shown for a failed login.
pub fn friendly_login_message(err: &AccountError) -> String {
    match err {
        AccountError::Auth(AuthError::InvalidCredential | AuthError::WrongPassword) => {
            "Incorrect email/username or password.".into()
        }
        AccountError::Auth(AuthError::UserNotFound) => "No account found with these credentials.".into(),
        AccountError::Auth(AuthError::TooManyRequests) => "Too many attempts. Please try again later.".into(),
        AccountError::Auth(AuthError::InvalidEmail) => "Please enter a valid email address.".into(),
        AccountError::Auth(_) | AccountError::Store(_) => LOGIN_FAILED.into(),
        other => other.to_string(),
    }
}

/// Message shown for a failed sign-up. Provider and form errors keep their text.
pub fn sign_up_message(err: &AccountError) -> String {
    match err {
        AccountError::Store(e) => {
            warn!("sign-up store failure: {}", e);
            SIGN_UP_FAILED.into()
        }
        AccountError::Auth(AuthError::Internal(_)) => SIGN_UP_FAILED.into(),
        other => other.to_string(),
    }
}

/// Sends a password reset email.
pub fn request_password_reset(
    auth: &dyn crate::auth::AuthProvider,
    email: &str,
) -> Result<&'static str, AccountError> {
    auth.send_password_reset(email)?;
    Ok(RESET_SENT)
}

/// Message shown for a failed reset request.
pub fn reset_message(err: &AccountError) -> String {
    match err {
        AccountError::Auth(AuthError::Internal(_)) | AccountError::Store(_) => RESET_FAILED.into(),
        other => other.to_string(),
    }
}
