//! Profile quiz: question loading and answer collection.
//!
//! Questions live in the `questions` collection, one document per category:
//! `{ category, questions: [{ question, options, scores, type }] }`. Loading is forgiving:
//! malformed entries are dropped rather than failing the whole quiz.

use crate::error::StoreError;
use crate::store::{fields, DocumentStore};
use crate::types::{Question, QuestionKind, Uid, QUESTIONS, USERS};
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;

pub const LOAD_FAILED: &str = "Unable to load questions right now. Please try again later.";

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn option_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flattens one category document into its usable questions.
fn questions_in(doc: &serde_json::Map<String, Value>) -> Vec<Question> {
    let category = doc
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(Value::Array(entries)) = doc.get("questions") else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let question = entry.get("question")?.as_str()?.to_string();
            let options = match entry.get("options") {
                Some(Value::Array(opts)) => opts.iter().filter(|o| truthy(o)).map(option_text).collect(),
                _ => Vec::new(),
            };
            let scores = match entry.get("scores") {
                Some(Value::Array(s)) => s.clone(),
                _ => Vec::new(),
            };
            let kind = match entry.get("type").and_then(Value::as_str) {
                Some("complementary") => QuestionKind::Complementary,
                _ => QuestionKind::Similarity,
            };
            Some(Question {
                category: category.clone(),
                question,
                options,
                scores,
                kind,
            })
        })
        .filter(|q| !q.question.is_empty() && !q.options.is_empty())
        .collect()
}

/// Loads every usable question, category documents in id order.
pub fn load_questions(store: &dyn DocumentStore) -> Result<Vec<Question>, StoreError> {
    let docs = store.list(QUESTIONS)?;
    let questions: Vec<Question> = docs.iter().flat_map(|(_, d)| questions_in(d)).collect();
    info!("quiz loaded categories={} questions={}", docs.len(), questions.len());
    Ok(questions)
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QuizError {
    #[error("No questions available.")]
    Empty,
    #[error("option {option} out of range for question {index}")]
    OptionOutOfRange { index: usize, option: usize },
}

/// One pass through the quiz: the current question and the answers picked so far.
#[derive(Clone, Debug)]
pub struct QuizSession {
    questions: Vec<Question>,
    current: usize,
    answers: BTreeMap<usize, usize>,
}

impl QuizSession {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            current: 0,
            answers: BTreeMap::new(),
        }
    }

    /// Resumes with previously stored answers; answers for questions that no longer exist are dropped.
    pub fn with_answers(questions: Vec<Question>, answers: BTreeMap<usize, usize>) -> Self {
        let answers = answers
            .into_iter()
            .filter(|(q, o)| questions.get(*q).map(|qq| *o < qq.options.len()).unwrap_or(false))
            .collect();
        Self {
            questions,
            current: 0,
            answers,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    /// Option picked for the current question.
    pub fn selected(&self) -> Option<usize> {
        self.answers.get(&self.current).copied()
    }

    /// Picks an option for the current question, replacing any earlier pick.
    pub fn select(&mut self, option: usize) -> Result<(), QuizError> {
        let q = self.current().ok_or(QuizError::Empty)?;
        if option >= q.options.len() {
            return Err(QuizError::OptionOutOfRange {
                index: self.current,
                option,
            });
        }
        self.answers.insert(self.current, option);
        Ok(())
    }

    pub fn previous(&mut self) {
        self.current = self.current.saturating_sub(1);
    }

    pub fn next(&mut self) {
        self.current = (self.current + 1).min(self.questions.len().saturating_sub(1));
    }

    pub fn is_first(&self) -> bool {
        self.current == 0
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.questions.len()
    }

    /// "Question i of n".
    pub fn progress(&self) -> String {
        format!("Question {} of {}", self.current + 1, self.questions.len())
    }

    /// "Category • Kind question" header for the current question; empty categories read "General".
    pub fn heading(&self) -> Option<String> {
        self.current().map(|q| {
            let category = if q.category.is_empty() { "General" } else { &q.category };
            format!("{} \u{2022} {} question", category, q.kind.label())
        })
    }

    pub fn answers(&self) -> &BTreeMap<usize, usize> {
        &self.answers
    }
}

/// Stores the session's answers on `users/{uid}`. The profile must exist.
pub fn submit_answers(store: &dyn DocumentStore, uid: &Uid, answers: &BTreeMap<usize, usize>) -> Result<usize, StoreError> {
    let value = serde_json::to_value(answers).map_err(|e| StoreError::Malformed {
        collection: USERS.into(),
        id: uid.to_string(),
        reason: e.to_string(),
    })?;
    store.update(USERS, uid.as_str(), fields([("answers", value)]))?;
    info!("quiz answers stored uid={} answered={}", uid, answers.len());
    Ok(answers.len())
}

/// Checks submitted answers against the loaded questions.
pub fn validate_answers(questions: &[Question], answers: &BTreeMap<usize, usize>) -> Result<(), QuizError> {
    for (&index, &option) in answers {
        let ok = questions.get(index).map(|q| option < q.options.len()).unwrap_or(false);
        if !ok {
            warn!("quiz answer rejected index={} option={}", index, option);
            return Err(QuizError::OptionOutOfRange { index, option });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{load_profile, InMemoryStore};
    use serde_json::json;

    fn put(store: &InMemoryStore, id: &str, v: Value) {
        if let Value::Object(m) = v {
            store.set(QUESTIONS, id, m).unwrap();
        }
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        put(
            &store,
            "b-values",
            json!({
                "category": "Values",
                "questions": [
                    { "question": "Kids?", "options": ["Yes", "", null, "No"], "scores": [1, 0], "type": "complementary" },
                    { "question": "", "options": ["x"] },
                    { "question": 5, "options": ["x"] },
                    { "question": "No options", "options": [] },
                    "garbage"
                ]
            }),
        );
        put(
            &store,
            "a-life",
            json!({
                "questions": [
                    { "question": "Early bird?", "options": ["Yes", "No"], "scores": "nope", "type": "weird" }
                ]
            }),
        );
        put(&store, "c-broken", json!({ "category": "X", "questions": "nope" }));
        store
    }

    #[test]
    fn load_filters_and_normalises() {
        let qs = load_questions(&seeded()).unwrap();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].question, "Early bird?");
        assert_eq!(qs[0].category, "");
        assert_eq!(qs[0].kind, QuestionKind::Similarity);
        assert!(qs[0].scores.is_empty());
        assert_eq!(qs[1].options, vec!["Yes".to_string(), "No".to_string()]);
        assert_eq!(qs[1].kind, QuestionKind::Complementary);
        assert_eq!(qs[1].scores, vec![json!(1), json!(0)]);
    }

    #[test]
    fn navigation_clamps() {
        let mut s = QuizSession::new(load_questions(&seeded()).unwrap());
        assert!(s.is_first());
        s.previous();
        assert_eq!(s.index(), 0);
        s.next();
        s.next();
        assert_eq!(s.index(), 1);
        assert!(s.is_last());
        assert_eq!(s.progress(), "Question 2 of 2");
        assert_eq!(s.heading().unwrap(), "Values \u{2022} Complementary question");
    }

    #[test]
    fn empty_quiz() {
        let mut s = QuizSession::new(Vec::new());
        s.next();
        assert_eq!(s.index(), 0);
        assert!(s.current().is_none());
        assert_eq!(s.select(0).unwrap_err(), QuizError::Empty);
    }

    #[test]
    fn select_replaces_and_checks_range() {
        let mut s = QuizSession::new(load_questions(&seeded()).unwrap());
        s.select(1).unwrap();
        s.select(0).unwrap();
        assert_eq!(s.selected(), Some(0));
        assert!(matches!(s.select(2), Err(QuizError::OptionOutOfRange { .. })));
        s.next();
        assert_eq!(s.selected(), None);
    }

    #[test]
    fn resume_drops_stale_answers() {
        let qs = load_questions(&seeded()).unwrap();
        let stored = BTreeMap::from([(0, 1), (1, 5), (9, 0)]);
        let s = QuizSession::with_answers(qs, stored);
        assert_eq!(s.answers(), &BTreeMap::from([(0, 1)]));
    }

    #[test]
    fn submit_writes_to_profile() {
        let store = seeded();
        store
            .set(USERS, "u1", fields([("username", json!("ann"))]))
            .unwrap();
        let answers = BTreeMap::from([(0, 1), (1, 0)]);
        assert_eq!(submit_answers(&store, &Uid::from("u1"), &answers).unwrap(), 2);
        let p = load_profile(&store, &Uid::from("u1")).unwrap().unwrap();
        assert_eq!(p.answers, answers);
        assert!(submit_answers(&store, &Uid::from("ghost"), &answers).is_err());
    }

    #[test]
    fn validate_against_questions() {
        let qs = load_questions(&seeded()).unwrap();
        assert!(validate_answers(&qs, &BTreeMap::from([(1, 1)])).is_ok());
        assert!(validate_answers(&qs, &BTreeMap::from([(2, 0)])).is_err());
    }
}
