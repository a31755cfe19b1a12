//! Synthetic user population and join/leave activity.
//!
//! Deterministic, configurable stream for replay tests, benchmarks, and demo seeding.
//! Same seed ⇒ same sign-up forms and the same sequence of actions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::accounts::SignUpForm;
use crate::error::JoinError;
use crate::matching::{self, JoinOutcome, LeaveOutcome};
use crate::service::Service;
use crate::store::DocumentStore;
use crate::types::{Gender, Uid};

/// Configuration for the population generator.
#[derive(Clone, Debug)]
pub struct PopulationConfig {
    /// RNG seed. Same seed ⇒ same stream.
    pub seed: u64,
    /// Number of users to generate.
    pub num_users: usize,
    /// Number of join/leave actions to generate.
    pub num_actions: usize,
    /// Probability that a user is male (0.0..=1.0).
    pub male_ratio: f64,
    /// Probability that an action is a leave rather than a join (0.0..=1.0).
    pub leave_ratio: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_users: 20,
            num_actions: 100,
            male_ratio: 0.5,
            leave_ratio: 0.2,
        }
    }
}

/// One generated action against user number `user` (index into the generated users).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Join { user: usize },
    Leave { user: usize },
}

/// Deterministic generator. Create with [`Generator::new`].
pub struct Generator {
    rng: StdRng,
    config: PopulationConfig,
    next_user: usize,
}

impl Generator {
    pub fn new(config: PopulationConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            next_user: 0,
        }
    }

    /// Next sign-up form. Usernames are `user{n}`, emails `user{n}@example.com`.
    pub fn next_user(&mut self) -> SignUpForm {
        let n = self.next_user;
        self.next_user += 1;
        let gender = if self.rng.gen::<f64>() < self.config.male_ratio {
            Gender::Male
        } else {
            Gender::Female
        };
        let username = format!("user{}", n);
        SignUpForm {
            email: format!("{}@example.com", username),
            username,
            password: "password".into(),
            confirm_password: "password".into(),
            gender: gender.as_str().into(),
        }
    }

    pub fn users(&mut self) -> Vec<SignUpForm> {
        (0..self.config.num_users).map(|_| self.next_user()).collect()
    }

    pub fn next_action(&mut self) -> Action {
        let user = self.rng.gen_range(0..self.config.num_users.max(1));
        if self.rng.gen_bool(self.config.leave_ratio.clamp(0.0, 1.0)) {
            Action::Leave { user }
        } else {
            Action::Join { user }
        }
    }

    pub fn actions(&mut self) -> Vec<Action> {
        (0..self.config.num_actions).map(|_| self.next_action()).collect()
    }
}

/// Totals from a replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub matches: usize,
    pub waits: usize,
    pub leaves: usize,
    /// Joins refused by a precondition (already joined or waiting), leaves while not waiting,
    /// and actions naming a user with no uid.
    pub refused: usize,
}

/// Replays actions directly against a store, with a logical clock starting at 1.
/// Store failures stop the replay; precondition refusals and unknown users are counted.
pub fn replay(
    store: &dyn DocumentStore,
    uids: &[Uid],
    actions: impl IntoIterator<Item = Action>,
) -> Result<ReplaySummary, JoinError> {
    let mut summary = ReplaySummary::default();
    for (tick, action) in actions.into_iter().enumerate() {
        let user = match action {
            Action::Join { user } | Action::Leave { user } => user,
        };
        let Some(uid) = uids.get(user) else {
            summary.refused += 1;
            continue;
        };
        let result = match action {
            Action::Join { .. } => matching::join(store, uid, tick as u64 + 1).map(|o| match o {
                JoinOutcome::Matched { .. } => summary.matches += 1,
                JoinOutcome::Waiting { .. } => summary.waits += 1,
            }),
            Action::Leave { .. } => matching::leave(store, uid).map(|o| match o {
                LeaveOutcome::Left => summary.leaves += 1,
                LeaveOutcome::NotWaiting => summary.refused += 1,
            }),
        };
        match result {
            Ok(()) => {}
            Err(JoinError::Store(e)) => return Err(JoinError::Store(e)),
            Err(_) => summary.refused += 1,
        }
    }
    Ok(summary)
}

/// Signs up the generated users through the service. Returns their uids in order.
pub fn seed_users(service: &Service, forms: &[SignUpForm]) -> Result<Vec<Uid>, String> {
    forms
        .iter()
        .map(|f| service.sign_up(f).map(|o| o.uid).map_err(|e| e.to_string()))
        .collect()
}
