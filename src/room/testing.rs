//! Fixtures shared by the room tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::quiz::{Catalog, Difficulty, Question, Subject};
use crate::room::{ParticipantId, RoomCode};
use crate::store::{MemoryStore, Store, StoreError, Subscription};

pub fn participant(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

pub fn room_code(code: &str) -> RoomCode {
    RoomCode::parse(code).unwrap()
}

fn question(id: &str, subject: Subject, difficulty: Difficulty, choices: &[&str], correct: &str) -> Question {
    Question {
        id: id.to_string(),
        subject,
        difficulty,
        stem: format!("Question {}", id),
        choices: choices.iter().map(|c| c.to_string()).collect(),
        correct: BTreeSet::from([correct.to_string()]),
        rationale: None,
    }
}

/// Three math questions (only `q7` is easy), two reading, one easy writing.
pub fn catalog() -> Catalog {
    Catalog::new(vec![
        question("q7", Subject::Math, Difficulty::Easy, &["1", "2", "4"], "4"),
        question("m2", Subject::Math, Difficulty::Medium, &["a", "b"], "a"),
        question("m3", Subject::Math, Difficulty::Hard, &["a", "b"], "b"),
        question(
            "paris",
            Subject::Reading,
            Difficulty::Easy,
            &["Rome", "Berlin", "Paris"],
            "Paris",
        ),
        question("r2", Subject::Reading, Difficulty::Medium, &["x", "y"], "y"),
        question("w1", Subject::Writing, Difficulty::Easy, &["its", "it's"], "its"),
    ])
}

/// A memory store that can be switched into failing every call.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.check()?;
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write(path, value).await
    }

    async fn merge(&self, path: &str, partial: Map<String, Value>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.merge(path, partial).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(path).await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        self.check()?;
        self.inner.subscribe(path).await
    }
}
