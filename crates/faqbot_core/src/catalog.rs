use crate::error::{FaqError, Result};
use crate::model::{FaqEntry, Language};
use serde_json::{Map, Value};
use std::path::Path;

/// Flattened catalog: all `fr` entries in source order, then all `ar` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    entries: Vec<FaqEntry>,
}

impl Corpus {
    /// Entries are regrouped by language (stable) so the `fr` block always
    /// comes first.
    pub fn from_entries(entries: Vec<FaqEntry>) -> Self {
        let (mut fr, ar): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| e.language == Language::Fr);
        fr.extend(ar);
        Self { entries: fr }
    }

    pub fn entries(&self) -> &[FaqEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&FaqEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn questions(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.question.as_str()).collect()
    }

    pub fn answers(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.answer.as_str()).collect()
    }

    pub fn count(&self, language: Language) -> usize {
        self.entries
            .iter()
            .filter(|e| e.language == language)
            .count()
    }

    /// Index of the first `ar` entry, equal to the number of `fr` entries.
    pub fn language_boundary(&self) -> usize {
        self.count(Language::Fr)
    }
}

pub fn load_catalog(path: &Path) -> Result<Corpus> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| FaqError::config(format!("read {}: {e}", path.display())))?;
    let corpus = parse_catalog(&text)?;
    tracing::info!(
        path = %path.display(),
        fr = corpus.count(Language::Fr),
        ar = corpus.count(Language::Ar),
        "catalog loaded"
    );
    Ok(corpus)
}

pub fn parse_catalog(text: &str) -> Result<Corpus> {
    let root: Value = serde_json::from_str(text)
        .map_err(|e| FaqError::config(format!("malformed catalog json: {e}")))?;

    let questions = root
        .get("questions")
        .ok_or_else(|| FaqError::config("missing top-level key 'questions'"))?
        .as_object()
        .ok_or_else(|| FaqError::config("'questions' must be an object"))?;

    let mut entries = Vec::new();
    for language in Language::ALL {
        let section = language_section(questions, language)?;
        for (question, answer) in section {
            let answer = answer.as_str().ok_or_else(|| {
                FaqError::config(format!(
                    "answer for {language} question {question:?} must be a string"
                ))
            })?;
            if question.trim().is_empty() {
                return Err(FaqError::config(format!(
                    "empty question in '{language}' section"
                )));
            }
            entries.push(FaqEntry {
                question: question.clone(),
                answer: answer.to_string(),
                language,
            });
        }
    }

    if entries.is_empty() {
        return Err(FaqError::config("catalog contains no questions"));
    }

    Ok(Corpus { entries })
}

fn language_section(
    questions: &Map<String, Value>,
    language: Language,
) -> Result<&Map<String, Value>> {
    questions
        .get(language.key())
        .ok_or_else(|| FaqError::config(format!("missing language key '{language}'")))?
        .as_object()
        .ok_or_else(|| FaqError::config(format!("'{language}' must be an object")))
}
