use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Fr,
    Ar,
}

impl Language {
    /// Catalog order: every `fr` entry precedes every `ar` entry.
    pub const ALL: [Language; 2] = [Language::Fr, Language::Ar];

    pub fn key(self) -> &'static str {
        match self {
            Language::Fr => "fr",
            Language::Ar => "ar",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
    pub language: Language,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub answer: String,
    pub matched_question: Option<String>,
    pub score: f32,
    pub entry_index: Option<usize>,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.matched_question.is_some()
    }

    pub fn decision(&self) -> Decision {
        if self.is_match() {
            Decision::Hit
        } else {
            Decision::Miss
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnansweredRecord {
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Score")]
    pub score: f32,
}
