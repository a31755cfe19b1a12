//! Route gating on sign-in, email verification, and joined status.
//!
//! [`gate`] decides, for the path a client is on, whether it may stay or must be sent
//! elsewhere. Redirects always replace the current history entry.

use crate::auth::AuthUser;
use crate::store::{load_profile, DocumentStore};
use log::warn;

/// Every screen of the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Home,
    Login,
    SignUp,
    Forgot,
    Welcome,
    Joined,
    Profile,
}

impl Route {
    pub const ALL: [Route; 7] = [
        Route::Home,
        Route::Login,
        Route::SignUp,
        Route::Forgot,
        Route::Welcome,
        Route::Joined,
        Route::Profile,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Login => "/login",
            Route::SignUp => "/signup",
            Route::Forgot => "/forgot",
            Route::Welcome => "/welcome",
            Route::Joined => "/joined",
            Route::Profile => "/profile",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Route::ALL.into_iter().find(|r| r.path() == path)
    }

    /// Reachable while signed out.
    pub fn is_public(self) -> bool {
        matches!(self, Route::Home | Route::Login | Route::SignUp | Route::Forgot)
    }

    /// Routes a signed-in user is moved off of, to `/welcome` or `/joined`.
    fn is_entry(self) -> bool {
        matches!(self, Route::Home | Route::Login | Route::SignUp)
    }
}

/// Outcome of gating one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "action", content = "to", rename_all = "snake_case")]
pub enum GateDecision {
    Stay,
    Redirect(Route),
    NotFound,
}

/// Gating options.
#[derive(Clone, Copy, Debug)]
pub struct GatePolicy {
    /// Signed-in users with an unverified email are treated as signed out for protected routes.
    pub require_verified_email: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            require_verified_email: true,
        }
    }
}

/// Decides where a client on `path` belongs.
///
/// Reading the profile can fail; from an entry route the user still goes to `/welcome`,
/// on a protected route they stay where they are.
pub fn gate(
    store: &dyn DocumentStore,
    policy: GatePolicy,
    path: &str,
    user: Option<&AuthUser>,
) -> GateDecision {
    let route = Route::from_path(path);

    let user = match user {
        Some(u) if u.email_verified || !policy.require_verified_email => u,
        _ => {
            return match route {
                Some(r) if r.is_public() => GateDecision::Stay,
                _ => GateDecision::Redirect(Route::Home),
            };
        }
    };

    let Some(route) = route else {
        return GateDecision::NotFound;
    };

    if route == Route::Forgot {
        return GateDecision::Stay;
    }

    let joined = match load_profile(store, &user.uid) {
        Ok(profile) => Ok(profile.map(|p| p.joined).unwrap_or(false)),
        Err(e) => {
            warn!("gate: failed to read joined status uid={}: {}", user.uid, e);
            Err(e)
        }
    };

    if route.is_entry() {
        return match joined {
            Ok(true) => GateDecision::Redirect(Route::Joined),
            _ => GateDecision::Redirect(Route::Welcome),
        };
    }

    match (route, joined) {
        (Route::Welcome, Ok(true)) => GateDecision::Redirect(Route::Joined),
        (Route::Joined, Ok(false)) => GateDecision::Redirect(Route::Welcome),
        _ => GateDecision::Stay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{Collections, Document, InMemoryStore};
    use crate::types::{Uid, USERS};
    use serde_json::{json, Value};

    fn user(verified: bool) -> AuthUser {
        AuthUser {
            uid: Uid::from("u1"),
            email: "a@b.co".into(),
            email_verified: verified,
        }
    }

    fn store_with(joined: bool) -> InMemoryStore {
        let store = InMemoryStore::new();
        let doc = json!({ "username": "a", "gender": "male", "joined": joined });
        if let Value::Object(m) = doc {
            store.set(USERS, "u1", m).unwrap();
        }
        store
    }

    /// Store whose reads always fail.
    struct Broken;

    impl DocumentStore for Broken {
        fn get(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn set(&self, _: &str, _: &str, _: Document) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn merge(&self, _: &str, _: &str, _: Document) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn update(&self, _: &str, _: &str, _: Document) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn increment(&self, _: &str, _: &str, _: &str, _: i64) -> Result<i64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn list(&self, _: &str) -> Result<Vec<(String, Document)>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn query_first(
            &self,
            _: &str,
            _: &[(&str, Value)],
            _: &str,
        ) -> Result<Option<(String, Document)>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn snapshot(&self) -> Result<Collections, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn restore(&self, _: Collections) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[test]
    fn paths_roundtrip() {
        for r in Route::ALL {
            assert_eq!(Route::from_path(r.path()), Some(r));
        }
        assert_eq!(Route::from_path("/nope"), None);
    }

    #[test]
    fn signed_out_only_public() {
        let store = InMemoryStore::new();
        let p = GatePolicy::default();
        assert_eq!(gate(&store, p, "/", None), GateDecision::Stay);
        assert_eq!(gate(&store, p, "/forgot", None), GateDecision::Stay);
        assert_eq!(gate(&store, p, "/welcome", None), GateDecision::Redirect(Route::Home));
        assert_eq!(gate(&store, p, "/joined", None), GateDecision::Redirect(Route::Home));
        assert_eq!(gate(&store, p, "/profile", None), GateDecision::Redirect(Route::Home));
        assert_eq!(gate(&store, p, "/elsewhere", None), GateDecision::Redirect(Route::Home));
    }

    #[test]
    fn unverified_user_is_held_on_public_routes() {
        let store = store_with(false);
        let p = GatePolicy::default();
        let u = user(false);
        assert_eq!(gate(&store, p, "/", Some(&u)), GateDecision::Stay);
        assert_eq!(gate(&store, p, "/welcome", Some(&u)), GateDecision::Redirect(Route::Home));

        let lax = GatePolicy {
            require_verified_email: false,
        };
        assert_eq!(gate(&store, lax, "/", Some(&u)), GateDecision::Redirect(Route::Welcome));
    }

    #[test]
    fn unknown_path_is_not_found_only_when_signed_in() {
        let store = store_with(false);
        let p = GatePolicy::default();
        assert_eq!(gate(&store, p, "/nope", Some(&user(true))), GateDecision::NotFound);
        assert_eq!(gate(&store, p, "/nope", Some(&user(false))), GateDecision::Redirect(Route::Home));
        assert_eq!(gate(&store, p, "/nope", None), GateDecision::Redirect(Route::Home));
    }

    #[test]
    fn entry_routes_send_signed_in_users_on() {
        let p = GatePolicy::default();
        let u = user(true);
        let waiting = store_with(false);
        let joined = store_with(true);
        for path in ["/", "/login", "/signup"] {
            assert_eq!(gate(&waiting, p, path, Some(&u)), GateDecision::Redirect(Route::Welcome));
            assert_eq!(gate(&joined, p, path, Some(&u)), GateDecision::Redirect(Route::Joined));
        }
        assert_eq!(gate(&joined, p, "/forgot", Some(&u)), GateDecision::Stay);
    }

    #[test]
    fn protected_routes_follow_joined_flag() {
        let p = GatePolicy::default();
        let u = user(true);
        let waiting = store_with(false);
        let joined = store_with(true);
        assert_eq!(gate(&waiting, p, "/welcome", Some(&u)), GateDecision::Stay);
        assert_eq!(gate(&waiting, p, "/joined", Some(&u)), GateDecision::Redirect(Route::Welcome));
        assert_eq!(gate(&joined, p, "/welcome", Some(&u)), GateDecision::Redirect(Route::Joined));
        assert_eq!(gate(&joined, p, "/joined", Some(&u)), GateDecision::Stay);
        assert_eq!(gate(&joined, p, "/profile", Some(&u)), GateDecision::Stay);
    }

    #[test]
    fn missing_profile_counts_as_not_joined() {
        let store = InMemoryStore::new();
        let u = user(true);
        let p = GatePolicy::default();
        assert_eq!(gate(&store, p, "/login", Some(&u)), GateDecision::Redirect(Route::Welcome));
        assert_eq!(gate(&store, p, "/joined", Some(&u)), GateDecision::Redirect(Route::Welcome));
    }

    #[test]
    fn read_failure_fallbacks() {
        let u = user(true);
        let p = GatePolicy::default();
        assert_eq!(gate(&Broken, p, "/", Some(&u)), GateDecision::Redirect(Route::Welcome));
        assert_eq!(gate(&Broken, p, "/joined", Some(&u)), GateDecision::Stay);
        assert_eq!(gate(&Broken, p, "/welcome", Some(&u)), GateDecision::Stay);
    }
}
