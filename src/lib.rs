//! # Only One
//!
//! Client core for a small matching app built on a managed auth provider and a
//! document store: sign-up / login / password reset forms, route gating, the profile
//! quiz, and the join routine that pairs a user with the earliest-waiting user of the
//! opposite gender.
//!
//! ## Entry point
//!
//! Use [`Service`] as the single entry point: create with [`Service::in_memory`] (or
//! [`Service::new`] over your own [`DocumentStore`] and [`AuthProvider`]), then call
//! [`Service::sign_up`], [`Service::log_in`], [`Service::gate`], [`Service::join`], ...
//!
//! ## Example
//!
//! ```rust
//! use only_one::{GatePolicy, JoinOutcome, Service, SignUpForm};
//!
//! let svc = Service::in_memory(GatePolicy { require_verified_email: false }, 5);
//! let form = |name: &str, gender: &str| SignUpForm {
//!     username: name.into(),
//!     email: format!("{}@example.com", name),
//!     password: "secret1".into(),
//!     confirm_password: "secret1".into(),
//!     gender: gender.into(),
//! };
//! let ann = svc.sign_up(&form("ann", "female")).unwrap();
//! let bob = svc.sign_up(&form("bob", "male")).unwrap();
//! assert!(matches!(svc.join(&ann.uid).unwrap(), JoinOutcome::Waiting { .. }));
//! assert_eq!(svc.join(&bob.uid).unwrap(), JoinOutcome::Matched { with: ann.uid });
//! ```
//!
//! ## Lower-level API
//!
//! The modules can also be used directly: [`matching::join`] over any [`DocumentStore`],
//! [`gate::gate`] for routing, [`accounts`] for the forms.

pub mod accounts;
pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod matching;
pub mod persistence;
pub mod population_gen;
pub mod quiz;
pub mod service;
pub mod store;
pub mod types;

pub use accounts::{LoginOutcome, SignUpForm, SignUpOutcome};
pub use auth::{AuthProvider, AuthUser, EmailKind, InMemoryAuthProvider};
pub use config::Config;
pub use error::{AccountError, AuthError, JoinError, StoreError};
pub use gate::{GateDecision, GatePolicy, Route};
pub use matching::{JoinOutcome, LeaveOutcome, ToggleOutcome, WelcomeState};
pub use population_gen::{Generator, PopulationConfig};
pub use service::Service;
pub use store::{DocumentStore, InMemoryStore};
pub use types::{Gender, GenderCounts, Question, QuestionKind, Uid, UserProfile};
