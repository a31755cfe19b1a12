//! Core types for the app's documents (users, usernames, stats, questions).
//!
//! Field names follow the stored document layout (camelCase), so a profile written
//! by one client reads back unchanged in another.

use std::collections::BTreeMap;
use std::fmt;

/// Collection holding one profile per auth uid.
pub const USERS: &str = "users";
/// Collection mapping a lower-cased username to its owner's uid.
pub const USERNAMES: &str = "usernames";
/// Collection holding aggregate counters.
pub const STATS: &str = "stats";
/// Document id of the per-gender waiting counters inside [`STATS`].
pub const GENDER_COUNTS: &str = "genderCounts";
/// Collection of quiz question groups.
pub const QUESTIONS: &str = "questions";

/// Auth provider user id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Uid(pub String);

impl Uid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Uid(s.to_string())
    }
}

/// Recorded gender. Matching always pairs opposite genders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn opposite(self) -> Self {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }

    /// Name used both as the stored value and as the counter field in `stats/genderCounts`.
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("male") {
            Some(Gender::Male)
        } else if s.eq_ignore_ascii_case("female") {
            Some(Gender::Female)
        } else {
            None
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile document at `users/{uid}`.
///
/// Every field except the sign-up ones is optional in storage: a profile created
/// at sign-up has no `waiting`/`joined` flags until the user first joins.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// `None` when the stored value is missing or not a known gender.
    #[serde(default, deserialize_with = "lenient_gender")]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub waiting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_since: Option<u64>,
    #[serde(default)]
    pub joined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_with: Option<Uid>,
    /// Quiz answers: question index -> chosen option index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub answers: BTreeMap<usize, usize>,
}

fn lenient_gender<'de, D>(d: D) -> Result<Option<Gender>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = serde::Deserialize::deserialize(d)?;
    Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(Gender::parse))
}

/// Username reservation at `usernames/{username}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameRecord {
    /// Missing in a corrupted mapping; login reports that as an invalid mapping.
    #[serde(default)]
    pub uid: Option<Uid>,
    #[serde(default)]
    pub created_at: u64,
}

/// Waiting counters at `stats/genderCounts`. Missing fields count as zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GenderCounts {
    #[serde(default)]
    pub male: i64,
    #[serde(default)]
    pub female: i64,
}

impl GenderCounts {
    pub fn get(&self, gender: Gender) -> i64 {
        match gender {
            Gender::Male => self.male,
            Gender::Female => self.female,
        }
    }
}

/// How answers to a question are compared between two users.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Similarity,
    Complementary,
}

impl QuestionKind {
    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::Similarity => "Similarity",
            QuestionKind::Complementary => "Complementary",
        }
    }
}

/// One quiz question, flattened out of its category document.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub category: String,
    pub question: String,
    pub options: Vec<String>,
    pub scores: Vec<serde_json::Value>,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
}

/// Milliseconds since the Unix epoch; 0 if the clock is before the epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_parse_and_opposite() {
        assert_eq!(Gender::parse("Male"), Some(Gender::Male));
        assert_eq!(Gender::parse(" female "), Some(Gender::Female));
        assert_eq!(Gender::parse("other"), None);
        assert_eq!(Gender::Male.opposite(), Gender::Female);
        assert_eq!(Gender::Female.opposite().as_str(), "male");
    }

    #[test]
    fn profile_reads_sparse_document() {
        let doc = serde_json::json!({
            "username": "ann",
            "email": "ann@example.com",
            "gender": "female",
            "createdAt": 5
        });
        let p: UserProfile = serde_json::from_value(doc).unwrap();
        assert_eq!(p.gender, Some(Gender::Female));
        assert!(!p.waiting);
        assert!(!p.joined);
        assert!(p.matched_with.is_none());
    }

    #[test]
    fn profile_unknown_gender_is_none() {
        let doc = serde_json::json!({ "gender": "" });
        let p: UserProfile = serde_json::from_value(doc).unwrap();
        assert!(p.gender.is_none());
        let doc = serde_json::json!({ "gender": 3 });
        let p: UserProfile = serde_json::from_value(doc).unwrap();
        assert!(p.gender.is_none());
    }

    #[test]
    fn profile_writes_camel_case() {
        let p = UserProfile {
            waiting_since: Some(7),
            matched_with: Some(Uid::from("u2")),
            ..Default::default()
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["waitingSince"], 7);
        assert_eq!(v["matchedWith"], "u2");
        assert!(v.get("answers").is_none());
    }
}
