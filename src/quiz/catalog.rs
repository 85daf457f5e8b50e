use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;

use crate::quiz::{Difficulty, Question, Subject};

const BUNDLED_QUESTIONS: &str = include_str!("../../data/questions.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot open question file: {0}")]
    Io(#[from] std::io::Error),
    #[error("question file is not a JSON list of questions: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why a raw entry did not make it into the catalog.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("entry has no id")]
    MissingId,
    #[error("entry has no question text")]
    MissingStem,
    #[error("unknown subject {0:?}")]
    UnknownSubject(Option<String>),
    #[error("no answer choices (free response)")]
    NoChoices,
    #[error("correct answer does not match any choice")]
    NoCorrectChoice,
    #[error("unreadable entry: {0}")]
    Unreadable(String),
}

/// A question as it appears in the source data, before normalization.
///
/// Sources disagree on field names and on how options and correct answers
/// are written down, so everything here is optional or loosely typed.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestion {
    #[serde(default, alias = "questionId", alias = "uid")]
    pub id: Option<RawScalar>,
    #[serde(default, alias = "subject")]
    pub module: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default, alias = "question", alias = "prompt")]
    pub stem: Option<String>,
    #[serde(default, alias = "options", alias = "answerOptions")]
    pub choices: Vec<RawChoice>,
    #[serde(default, alias = "answer", alias = "correctAnswer")]
    pub correct: Option<RawCorrect>,
    #[serde(default, alias = "explanation")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Text(String),
    Number(u64),
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum RawChoice {
    Text(String),
    Labelled {
        #[serde(alias = "content", alias = "value")]
        text: String,
        #[serde(default, alias = "id", alias = "label")]
        letter: Option<String>,
    },
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum RawCorrect {
    One(RawScalar),
    Many(Vec<RawScalar>),
}

impl RawChoice {
    fn text(&self) -> &str {
        match self {
            RawChoice::Text(text) => text.trim(),
            RawChoice::Labelled { text, .. } => text.trim(),
        }
    }

    fn letter(&self) -> Option<&str> {
        match self {
            RawChoice::Labelled {
                letter: Some(letter),
                ..
            } => Some(letter.trim()),
            _ => None,
        }
    }
}

impl RawQuestion {
    /// Coerces the entry into a [`Question`].
    pub fn normalize(self) -> Result<Question, Rejection> {
        let id = match self.id {
            Some(RawScalar::Text(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(RawScalar::Number(id)) => id.to_string(),
            _ => return Err(Rejection::MissingId),
        };
        let stem = match self.stem {
            Some(stem) if !stem.trim().is_empty() => stem,
            _ => return Err(Rejection::MissingStem),
        };
        let subject = self
            .module
            .as_deref()
            .and_then(Subject::parse)
            .ok_or_else(|| Rejection::UnknownSubject(self.module.clone()))?;
        let difficulty = self
            .difficulty
            .as_deref()
            .and_then(Difficulty::parse)
            .unwrap_or_default();

        let choices: Vec<String> = self
            .choices
            .iter()
            .map(|choice| choice.text().to_string())
            .filter(|text| !text.is_empty())
            .collect();
        if choices.is_empty() {
            return Err(Rejection::NoChoices);
        }

        let entries = match self.correct {
            Some(RawCorrect::One(entry)) => vec![entry],
            Some(RawCorrect::Many(entries)) => entries,
            None => Vec::new(),
        };
        let correct: BTreeSet<String> = entries
            .iter()
            .filter_map(|entry| resolve_correct(entry, &self.choices, &choices))
            .collect();
        if !choices.iter().any(|choice| correct.contains(choice)) {
            return Err(Rejection::NoCorrectChoice);
        }

        Ok(Question {
            id,
            subject,
            difficulty,
            stem,
            choices,
            correct,
            rationale: self.rationale.filter(|r| !r.trim().is_empty()),
        })
    }
}

/// Turns one correct-answer entry into the literal text it stands for.
///
/// Entries can be the text itself, a zero-based index, or a choice letter
/// (`"B"`), either one declared on the option or implied by its position.
fn resolve_correct(entry: &RawScalar, raw: &[RawChoice], choices: &[String]) -> Option<String> {
    let text = match entry {
        RawScalar::Number(index) => return choices.get(*index as usize).cloned(),
        RawScalar::Text(text) => text.trim(),
    };
    if text.is_empty() {
        return None;
    }
    if choices.iter().any(|choice| choice == text) {
        return Some(text.to_string());
    }

    if let Some(choice) = raw
        .iter()
        .find(|choice| choice.letter().map_or(false, |l| l.eq_ignore_ascii_case(text)))
    {
        return Some(choice.text().to_string());
    }

    let mut chars = text.chars();
    if let (Some(letter), None) = (chars.next(), chars.next()) {
        if letter.is_ascii_alphabetic() {
            let index = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
            if let Some(choice) = choices.get(index) {
                return Some(choice.clone());
            }
        }
    }

    // Another phrasing of the canonical answer.
    Some(text.to_string())
}

fn read_entry(entry: Value) -> Result<Question, Rejection> {
    serde_json::from_value::<RawQuestion>(entry)
        .map_err(|err| Rejection::Unreadable(err.to_string()))?
        .normalize()
}

/// The fixed set of questions available to every room.
#[derive(Debug, Default)]
pub struct Catalog {
    questions: Vec<Question>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(questions: Vec<Question>) -> Self {
        let mut catalog = Self::default();
        for question in questions {
            if catalog.index.contains_key(&question.id) {
                warn!("Dropping duplicate question id {:?}", question.id);
                continue;
            }
            catalog
                .index
                .insert(question.id.clone(), catalog.questions.len());
            catalog.questions.push(question);
        }
        catalog
    }

    /// Builds the catalog from loose JSON entries. Entries that cannot be
    /// read or normalized are logged and skipped, the rest are kept.
    pub fn from_entries(entries: Vec<Value>) -> Self {
        let total = entries.len();
        let questions: Vec<Question> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(position, entry)| match read_entry(entry) {
                Ok(question) => Some(question),
                Err(reason) => {
                    warn!("Skipping catalog entry #{}: {}", position, reason);
                    None
                }
            })
            .collect();
        let catalog = Self::new(questions);
        info!("Loaded {} of {} catalog entries", catalog.len(), total);
        catalog
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let entries: Vec<Value> = serde_json::from_reader(reader)?;
        Ok(Self::from_entries(entries))
    }

    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// The question set shipped with the bot.
    pub fn bundled() -> Result<Self, CatalogError> {
        Self::from_reader(BUNDLED_QUESTIONS.as_bytes())
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.index.get(id).map(|&i| &self.questions[i])
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Questions passing the filter. An empty filter list accepts everything on that axis.
    pub fn matching<'a>(
        &'a self,
        subjects: &'a [Subject],
        difficulties: &'a [Difficulty],
    ) -> impl Iterator<Item = &'a Question> + 'a {
        self.questions.iter().filter(move |q| {
            (subjects.is_empty() || subjects.contains(&q.subject))
                && (difficulties.is_empty() || difficulties.contains(&q.difficulty))
        })
    }

    /// Shuffled ids of matching questions, at most `count` of them (`0` keeps all).
    pub fn draw<R: Rng + ?Sized>(
        &self,
        subjects: &[Subject],
        difficulties: &[Difficulty],
        count: usize,
        rng: &mut R,
    ) -> Vec<String> {
        let mut ids: Vec<String> = self
            .matching(subjects, difficulties)
            .map(|q| q.id.clone())
            .collect();
        ids.shuffle(rng);
        if count > 0 {
            ids.truncate(count);
        }
        ids
    }
}
