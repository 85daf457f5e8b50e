pub mod adapter;
pub mod controller;
pub mod phase;
#[cfg(test)]
mod testing;

use std::collections::BTreeMap;
use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::quiz::{Difficulty, Subject};
use crate::store::StoreError;

pub use adapter::RoomStore;
pub use controller::{GameEvent, RoomController};
pub use phase::Phase;

/// Rooms hold at most this many participants.
pub const ROOM_CAPACITY: usize = 2;

const PARTICIPANT_ID_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("the room store is not configured")]
    NotConfigured,
    #[error("room codes are four digits")]
    InvalidCode,
    #[error("room not found")]
    NotFound,
    #[error("room is full")]
    Full,
    #[error("room already exists")]
    AlreadyExists,
    #[error("no questions match the selected filters")]
    NoMatchingQuestions,
    #[error("participant is not in the room")]
    NotMember,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed room document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Four digit, zero padded invite code. Also the room's key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(raw: &str) -> Result<Self, RoomError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > 4 || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(RoomError::InvalidCode);
        }
        Ok(Self(format!("{:0>4}", raw)))
    }

    pub fn random() -> Self {
        Self(format!("{:04}", rand::thread_rng().gen_range(0..10_000)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> String {
        format!("rooms/{}", self.as_str())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locally generated pseudo-identity of one player. Not a credential.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PARTICIPANT_ID_LEN)
            .map(char::from)
            .collect();
        Self::new(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the room creator asked for.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Empty means every subject.
    #[serde(default)]
    pub modules: Vec<Subject>,
    /// Empty means every difficulty.
    #[serde(default)]
    pub difficulties: Vec<Difficulty>,
    /// `0` means every matching question.
    #[serde(default)]
    pub question_count: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            difficulties: Vec::new(),
            question_count: 10,
        }
    }
}

/// The shared document both clients read and write.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomCode,
    #[serde(default)]
    pub players: Vec<ParticipantId>,
    #[serde(default)]
    pub current_question: usize,
    #[serde(default)]
    pub started: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<ParticipantId, u32>,
    /// Answers to the current question only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub answers: BTreeMap<ParticipantId, usize>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RoomConfig>,
}

impl Room {
    pub fn new(
        id: RoomCode,
        creator: ParticipantId,
        questions: Vec<String>,
        config: Option<RoomConfig>,
    ) -> Self {
        Self {
            id,
            players: vec![creator.clone()],
            current_question: 0,
            started: false,
            scores: BTreeMap::from([(creator, 0)]),
            answers: BTreeMap::new(),
            questions,
            config,
        }
    }

    pub fn has_player(&self, participant: &ParticipantId) -> bool {
        self.players.contains(participant)
    }

    /// Two players and the game started.
    pub fn is_ready(&self) -> bool {
        self.started && self.players.len() == ROOM_CAPACITY
    }

    /// The pointer has moved past the last question.
    pub fn is_finished(&self) -> bool {
        self.current_question >= self.questions.len()
    }

    pub fn current_question_id(&self) -> Option<&str> {
        self.questions.get(self.current_question).map(String::as_str)
    }

    /// Every seat is taken and every player answered the current question.
    pub fn all_answered(&self) -> bool {
        self.players.len() == ROOM_CAPACITY
            && self.players.iter().all(|p| self.answers.contains_key(p))
    }

    pub fn opponent_of(&self, participant: &ParticipantId) -> Option<&ParticipantId> {
        self.players.iter().find(|p| *p != participant)
    }
}
