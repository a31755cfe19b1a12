//! Error types for the store, auth provider, account forms, and the join routine.

use thiserror::Error;

/// Document store failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("field {field} in {collection}/{id} is not a number")]
    NotNumeric {
        collection: String,
        id: String,
        field: String,
    },

    #[error("malformed document {collection}/{id}: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Auth provider failures. Each variant carries a stable provider code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("The supplied auth credential is incorrect.")]
    InvalidCredential,

    #[error("The password is invalid.")]
    WrongPassword,

    #[error("There is no user record corresponding to this identifier.")]
    UserNotFound,

    #[error("Access has been temporarily disabled due to many failed login attempts.")]
    TooManyRequests,

    #[error("The email address is badly formatted.")]
    InvalidEmail,

    #[error("The email address is already in use by another account.")]
    EmailAlreadyInUse,

    #[error("Password should be at least 6 characters.")]
    WeakPassword,

    #[error("The action code is invalid or has expired.")]
    InvalidActionCode,

    #[error("The session is missing or has expired.")]
    InvalidSession,

    #[error("auth provider error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "auth/invalid-credential",
            AuthError::WrongPassword => "auth/wrong-password",
            AuthError::UserNotFound => "auth/user-not-found",
            AuthError::TooManyRequests => "auth/too-many-requests",
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::InvalidActionCode => "auth/invalid-action-code",
            AuthError::InvalidSession => "auth/invalid-session",
            AuthError::Internal(_) => "auth/internal-error",
        }
    }
}

/// Sign-up, login, and password reset form failures. `Display` is the message shown to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("All fields are required.")]
    MissingFields,

    #[error("Username must be 1-30 chars, letters/numbers/._ only, no leading/trailing . or _, no consecutive dots.")]
    InvalidUsername,

    #[error("Gender must be male or female.")]
    InvalidGender,

    #[error("Passwords do not match.")]
    PasswordMismatch,

    #[error("Username is already taken.")]
    UsernameTaken,

    #[error("No account found for this username.")]
    UnknownUsername,

    #[error("Invalid username mapping.")]
    InvalidUsernameMapping,

    #[error("Could not resolve email for this username.")]
    UnresolvedEmail,

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Join / leave failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JoinError {
    #[error("Missing gender in profile")]
    MissingGender,

    #[error("Profile not found")]
    ProfileNotFound,

    #[error("Already joined")]
    AlreadyJoined,

    #[error("Already waiting")]
    AlreadyWaiting,

    #[error("{0}")]
    Store(#[from] StoreError),
}
