//! Runtime configuration, read from the environment.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `PORT` | 8080 | HTTP listen port |
//! | `DATA_FILE` | unset | JSON file for store + auth persistence; in-memory only when unset |
//! | `REQUIRE_VERIFIED_EMAIL` | true | gate protected routes on a verified email |
//! | `AUTH_MAX_FAILED_ATTEMPTS` | 5 | wrong passwords before sign-in is refused (0 = never) |
//! | `SEED_DEMO_USERS` | 0 | sign up this many generated users at startup |
//! | `SEED` | 0 | seed for generated demo users |

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub data_file: Option<PathBuf>,
    pub require_verified_email: bool,
    pub max_failed_attempts: u32,
    pub seed_demo_users: usize,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            data_file: None,
            require_verified_email: true,
            max_failed_attempts: 5,
            seed_demo_users: 0,
            seed: 0,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    let v = v.trim();
    if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") {
        Some(true)
    } else if v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") {
        Some(false)
    } else {
        None
    }
}

impl Config {
    /// Reads the variables above; unparsable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`Config::from_env`] over any key lookup. For tests.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Self {
            port: get("PORT").and_then(|s| s.trim().parse().ok()).unwrap_or(d.port),
            data_file: get("DATA_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            require_verified_email: get("REQUIRE_VERIFIED_EMAIL")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(d.require_verified_email),
            max_failed_attempts: get("AUTH_MAX_FAILED_ATTEMPTS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(d.max_failed_attempts),
            seed_demo_users: get("SEED_DEMO_USERS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(d.seed_demo_users),
            seed: get("SEED").and_then(|s| s.trim().parse().ok()).unwrap_or(d.seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let c = Config::from_lookup(|_| None);
        assert_eq!(c.port, 8080);
        assert!(c.data_file.is_none());
        assert!(c.require_verified_email);
        assert_eq!(c.max_failed_attempts, 5);
    }

    #[test]
    fn reads_and_falls_back() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9000"),
            ("DATA_FILE", "/tmp/state.json"),
            ("REQUIRE_VERIFIED_EMAIL", "false"),
            ("AUTH_MAX_FAILED_ATTEMPTS", "many"),
            ("SEED_DEMO_USERS", "12"),
        ]);
        let c = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.port, 9000);
        assert_eq!(c.data_file, Some(PathBuf::from("/tmp/state.json")));
        assert!(!c.require_verified_email);
        assert_eq!(c.max_failed_attempts, 5);
        assert_eq!(c.seed_demo_users, 12);
    }
}
