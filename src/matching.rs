//! The join routine: pair the current user with the earliest-waiting user of the opposite
//! gender, or put them in the waiting pool.
//!
//! [`decide`] is the pure decision over the counters and the candidate found;
//! [`join`] performs the reads and the dependent writes around it:
//!
//! - match: decrement the opposite counter, mark the other user joined, mark self joined;
//! - no match: increment own counter, mark self waiting.
//!
//! The writes are separate store calls with no transaction. Two joins running against
//! the same store from different processes can both take the same candidate; callers in
//! one process serialize through [`crate::service::Service`].

use crate::error::JoinError;
use crate::store::{fields, load_counts, load_profile, DocumentStore};
use crate::types::{Gender, GenderCounts, UserProfile, Uid, GENDER_COUNTS, STATS, USERS};
use log::{info, warn};
use serde_json::Value;

pub const MATCHED: &str = "You have been matched!";
pub const NOW_WAITING: &str = "You are now waiting";
pub const ENDED_WAITING: &str = "Ended waiting";
pub const PROFILE_LOAD_FAILED: &str = "Failed to load your profile";
pub const WAITING_UPDATE_FAILED: &str = "Failed to update waiting status";

/// Waiting user found by the earliest-waiting query.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub uid: Uid,
    pub gender: Gender,
    pub waiting_since: u64,
}

/// What [`join`] should do.
#[derive(Clone, Debug, PartialEq)]
pub enum JoinDecision {
    /// Pair with this waiting user.
    Match(Candidate),
    /// Nobody to pair with: wait.
    Wait,
    /// The opposite counter says someone is waiting but nobody was found.
    WaitStaleCounter { counted: i64 },
}

/// Pure decision: match only if the opposite counter is positive and a candidate of the
/// opposite gender exists.
pub fn decide(counts: GenderCounts, gender: Gender, candidate: Option<Candidate>) -> JoinDecision {
    let opposite = gender.opposite();
    let counted = counts.get(opposite);
    if counted <= 0 {
        return JoinDecision::Wait;
    }
    match candidate {
        Some(c) if c.gender == opposite => JoinDecision::Match(c),
        _ => JoinDecision::WaitStaleCounter { counted },
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinOutcome {
    Matched { with: Uid },
    Waiting { since: u64 },
}

impl JoinOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            JoinOutcome::Matched { .. } => MATCHED,
            JoinOutcome::Waiting { .. } => NOW_WAITING,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LeaveOutcome {
    Left,
    NotWaiting,
}

/// What the Welcome screen shows.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct WelcomeState {
    pub gender: Option<Gender>,
    pub waiting: bool,
    pub joined: bool,
    pub matched_with: Option<Uid>,
}

impl From<&UserProfile> for WelcomeState {
    fn from(p: &UserProfile) -> Self {
        Self {
            gender: p.gender,
            waiting: p.waiting,
            joined: p.joined,
            matched_with: p.matched_with.clone(),
        }
    }
}

fn require_profile(store: &dyn DocumentStore, uid: &Uid) -> Result<UserProfile, JoinError> {
    load_profile(store, uid)?.ok_or(JoinError::ProfileNotFound)
}

/// Reads the Welcome screen state for `uid`.
pub fn welcome_state(store: &dyn DocumentStore, uid: &Uid) -> Result<WelcomeState, JoinError> {
    Ok(WelcomeState::from(&require_profile(store, uid)?))
}

/// Earliest waiting, not yet joined user of `gender`.
pub fn earliest_waiting(store: &dyn DocumentStore, gender: Gender) -> Result<Option<Candidate>, JoinError> {
    let found = store.query_first(
        USERS,
        &[
            ("gender", Value::from(gender.as_str())),
            ("waiting", Value::Bool(true)),
            ("joined", Value::Bool(false)),
        ],
        "waitingSince",
    )?;
    Ok(found.map(|(id, doc)| Candidate {
        uid: Uid(id),
        gender,
        waiting_since: doc.get("waitingSince").and_then(Value::as_u64).unwrap_or(0),
    }))
}

/// Runs the join routine for `uid` at time `now` (milliseconds).
pub fn join(store: &dyn DocumentStore, uid: &Uid, now: u64) -> Result<JoinOutcome, JoinError> {
    let profile = require_profile(store, uid)?;
    let gender = profile.gender.ok_or(JoinError::MissingGender)?;
    if profile.joined {
        return Err(JoinError::AlreadyJoined);
    }
    if profile.waiting {
        return Err(JoinError::AlreadyWaiting);
    }

    let counts = load_counts(store)?;
    let opposite = gender.opposite();
    let candidate = if counts.get(opposite) > 0 {
        earliest_waiting(store, opposite)?
    } else {
        None
    };

    match decide(counts, gender, candidate) {
        JoinDecision::Match(other) => {
            store.increment(STATS, GENDER_COUNTS, opposite.as_str(), -1)?;
            store.update(
                USERS,
                other.uid.as_str(),
                fields([
                    ("joined", Value::Bool(true)),
                    ("waiting", Value::Bool(false)),
                    ("matchedWith", Value::from(uid.as_str())),
                ]),
            )?;
            store.update(
                USERS,
                uid.as_str(),
                fields([
                    ("joined", Value::Bool(true)),
                    ("waiting", Value::Bool(false)),
                    ("matchedWith", Value::from(other.uid.as_str())),
                ]),
            )?;
            info!(
                "matched uid={} gender={} with={} waited_since={}",
                uid, gender, other.uid, other.waiting_since
            );
            Ok(JoinOutcome::Matched { with: other.uid })
        }
        decision => {
            if let JoinDecision::WaitStaleCounter { counted } = decision {
                warn!(
                    "stale waiting counter gender={} counted={} but nobody waiting",
                    opposite, counted
                );
            }
            store.increment(STATS, GENDER_COUNTS, gender.as_str(), 1)?;
            store.update(
                USERS,
                uid.as_str(),
                fields([
                    ("waiting", Value::Bool(true)),
                    ("joined", Value::Bool(false)),
                    ("waitingSince", Value::from(now)),
                ]),
            )?;
            info!("waiting uid={} gender={} since={}", uid, gender, now);
            Ok(JoinOutcome::Waiting { since: now })
        }
    }
}

/// Takes `uid` out of the waiting pool.
pub fn leave(store: &dyn DocumentStore, uid: &Uid) -> Result<LeaveOutcome, JoinError> {
    let profile = require_profile(store, uid)?;
    let gender = profile.gender.ok_or(JoinError::MissingGender)?;
    if !profile.waiting {
        return Ok(LeaveOutcome::NotWaiting);
    }
    store.increment(STATS, GENDER_COUNTS, gender.as_str(), -1)?;
    store.update(USERS, uid.as_str(), fields([("waiting", Value::Bool(false))]))?;
    info!("left waiting uid={} gender={}", uid, gender);
    Ok(LeaveOutcome::Left)
}

/// Result of pressing the Wait / End waiting button.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ToggleOutcome {
    pub waiting: bool,
    pub joined: bool,
    pub message: &'static str,
    pub matched_with: Option<Uid>,
}

/// Wait if not waiting (which may match immediately), end waiting otherwise.
pub fn toggle_waiting(store: &dyn DocumentStore, uid: &Uid, now: u64) -> Result<ToggleOutcome, JoinError> {
    let profile = require_profile(store, uid)?;
    if profile.gender.is_none() {
        return Err(JoinError::MissingGender);
    }
    if profile.waiting {
        leave(store, uid)?;
        return Ok(ToggleOutcome {
            waiting: false,
            joined: false,
            message: ENDED_WAITING,
            matched_with: None,
        });
    }
    let outcome = join(store, uid, now)?;
    let message = outcome.message();
    Ok(match outcome {
        JoinOutcome::Matched { with } => ToggleOutcome {
            waiting: false,
            joined: true,
            message,
            matched_with: Some(with),
        },
        JoinOutcome::Waiting { .. } => ToggleOutcome {
            waiting: true,
            joined: false,
            message,
            matched_with: None,
        },
    })
}
