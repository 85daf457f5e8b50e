pub mod ai_helper;
pub mod catalog;

use std::collections::BTreeSet;
use std::fmt;

pub use catalog::Catalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Math,
    Reading,
    Writing,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Math, Subject::Reading, Subject::Writing];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "math" | "maths" => Some(Subject::Math),
            "reading" => Some(Subject::Reading),
            "writing" => Some(Subject::Writing),
            _ => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subject::Math => "Math",
            Subject::Reading => "Reading",
            Subject::Writing => "Writing",
        };
        f.write_str(name)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[serde(alias = "E")]
    Easy,
    #[default]
    #[serde(alias = "M")]
    Medium,
    #[serde(alias = "H")]
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "e" | "easy" => Some(Difficulty::Easy),
            "m" | "medium" => Some(Difficulty::Medium),
            "h" | "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        };
        f.write_str(name)
    }
}

/// A multiple choice quiz item. Never changes once the catalog is built.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub id: String,
    pub subject: Subject,
    pub difficulty: Difficulty,
    /// HTML formatted question text.
    pub stem: String,
    pub choices: Vec<String>,
    /// Every phrasing accepted as correct.
    pub correct: BTreeSet<String>,
    pub rationale: Option<String>,
}

impl Question {
    pub fn is_correct(&self, choice: usize) -> bool {
        self.choices
            .get(choice)
            .map_or(false, |text| self.correct.contains(text.trim()))
    }

    /// The first choice that counts as correct, for reveal messages.
    pub fn correct_choice(&self) -> Option<(usize, &str)> {
        self.choices
            .iter()
            .enumerate()
            .find(|(i, _)| self.is_correct(*i))
            .map(|(i, text)| (i, text.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capital_question() -> Question {
        Question {
            id: "geo-1".to_string(),
            subject: Subject::Reading,
            difficulty: Difficulty::Easy,
            stem: "Capital of France?".to_string(),
            choices: vec!["Rome".into(), "Berlin".into(), "Paris".into()],
            correct: BTreeSet::from(["Paris".to_string()]),
            rationale: None,
        }
    }

    #[test]
    fn correctness_is_looked_up_by_choice_text() {
        let question = capital_question();
        assert!(question.is_correct(2));
        assert!(!question.is_correct(0));
        assert!(!question.is_correct(7));
        assert_eq!(question.correct_choice(), Some((2, "Paris")));
    }

    #[test]
    fn difficulty_accepts_letters() {
        let parsed: Vec<Difficulty> = serde_json::from_str(r#"["E", "medium", "H"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![Difficulty::Easy, Difficulty::Medium, Difficulty::Hard]
        );
        assert_eq!(Difficulty::parse(" hard "), Some(Difficulty::Hard));
        assert_eq!(Subject::parse("MATH"), Some(Subject::Math));
        assert_eq!(Subject::parse("science"), None);
    }
}
