use crate::catalog::Corpus;
use crate::embed::EmbeddingProvider;
use crate::error::{FaqError, Result};
use crate::model::MatchResult;
use crate::retrieval::{LinearIndex, VectorIndex};
use crate::unanswered::UnansweredSink;
use crate::{DEFAULT_THRESHOLD, FALLBACK_ANSWER};

/// Immutable matching context: the corpus, its embeddings and the model that
/// produced them. Built once at startup and shared by every request.
pub struct FaqMatcher {
    corpus: Corpus,
    embedder: Box<dyn EmbeddingProvider>,
    index: Box<dyn VectorIndex>,
    unanswered: Box<dyn UnansweredSink>,
}

impl FaqMatcher {
    /// Encodes every corpus question with `embedder` into a [`LinearIndex`].
    pub fn build(
        corpus: Corpus,
        embedder: impl EmbeddingProvider + 'static,
        unanswered: impl UnansweredSink + 'static,
    ) -> Result<Self> {
        let questions = corpus.questions();
        let vectors = embedder.encode_batch(&questions)?;
        if vectors.len() != questions.len() {
            return Err(FaqError::config(format!(
                "embedder returned {} vectors for {} questions",
                vectors.len(),
                questions.len()
            )));
        }
        let index = LinearIndex::new(vectors)
            .ok_or_else(|| FaqError::config("embedder returned vectors of mixed dimension"))?;

        tracing::info!(
            entries = index.len(),
            dimension = index.dimension(),
            "similarity index built"
        );
        Self::with_index(corpus, embedder, index, unanswered)
    }

    /// Uses a prebuilt index. Position `i` of the index must hold the
    /// embedding of corpus entry `i`.
    pub fn with_index(
        corpus: Corpus,
        embedder: impl EmbeddingProvider + 'static,
        index: impl VectorIndex + 'static,
        unanswered: impl UnansweredSink + 'static,
    ) -> Result<Self> {
        if index.len() != corpus.len() {
            return Err(FaqError::config(format!(
                "index holds {} vectors for {} corpus entries",
                index.len(),
                corpus.len()
            )));
        }
        Ok(Self {
            corpus,
            embedder: Box::new(embedder),
            index: Box::new(index),
            unanswered: Box::new(unanswered),
        })
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn resolve_default(&self, query: &str) -> Result<MatchResult> {
        self.resolve(query, DEFAULT_THRESHOLD)
    }

    /// Top-1 match for `query`. Scores below `threshold` yield the fallback
    /// answer and are recorded in the unanswered log; `score == threshold`
    /// is a match.
    pub fn resolve(&self, query: &str, threshold: f32) -> Result<MatchResult> {
        let query_vector = self.embedder.embed(query)?;
        let best = self.index.best_match(&query_vector);

        let result = match best {
            Some((idx, score)) if score >= threshold => {
                let entry = self.corpus.get(idx).ok_or_else(|| {
                    FaqError::config(format!("index returned position {idx} outside the corpus"))
                })?;
                MatchResult {
                    answer: entry.answer.clone(),
                    matched_question: Some(entry.question.clone()),
                    score,
                    entry_index: Some(idx),
                }
            }
            other => {
                let score = other.map_or(0.0, |(_, score)| score);
                if let Err(err) = self.unanswered.record(query, score) {
                    tracing::warn!(error = %err, "failed to record unanswered question");
                }
                MatchResult {
                    answer: FALLBACK_ANSWER.to_string(),
                    matched_question: None,
                    score,
                    entry_index: None,
                }
            }
        };

        tracing::debug!(
            score = result.score,
            threshold,
            decision = ?result.decision(),
            entry = ?result.entry_index,
            "query resolved"
        );
        Ok(result)
    }

    /// `(answer, matched_question)`; the question is `None` on fallback.
    pub fn get_best_answer(&self, query: &str, threshold: f32) -> Result<(String, Option<String>)> {
        let result = self.resolve(query, threshold)?;
        Ok((result.answer, result.matched_question))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_catalog;
    use crate::embed::HashEmbeddingProvider;
    use crate::model::{Decision, FaqEntry, Language};
    use crate::unanswered::{CsvUnansweredLog, MemoryUnansweredLog};
    use std::collections::HashMap;
    use std::sync::Arc;

    const FR_QUESTION: &str = "Quelles sont les dates d'inscription ?";
    const FR_ANSWER: &str = "Les inscriptions ouvrent en septembre.";

    fn single_entry_catalog() -> Corpus {
        parse_catalog(&format!(
            r#"{{"questions": {{"fr": {{"{FR_QUESTION}": "{FR_ANSWER}"}}, "ar": {{}}}}}}"#
        ))
        .unwrap()
    }

    /// Hands out fixed vectors so scores are known exactly.
    struct FixedEmbeddings(HashMap<String, Vec<f32>>);

    impl FixedEmbeddings {
        fn new(pairs: &[(&str, [f32; 2])]) -> Self {
            Self(
                pairs
                    .iter()
                    .map(|(text, v)| (text.to_string(), v.to_vec()))
                    .collect(),
            )
        }
    }

    impl EmbeddingProvider for FixedEmbeddings {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.0
                .get(text)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no vector for {text:?}"))
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn entry(question: &str, answer: &str, language: Language) -> FaqEntry {
        FaqEntry {
            question: question.to_string(),
            answer: answer.to_string(),
            language,
        }
    }

    #[test]
    fn matching_query_returns_catalog_entry() {
        let log = Arc::new(MemoryUnansweredLog::new());
        let matcher =
            FaqMatcher::build(single_entry_catalog(), HashEmbeddingProvider::default(), log.clone())
                .unwrap();

        let result = matcher.resolve_default("dates d'inscription").unwrap();

        assert_eq!(result.matched_question.as_deref(), Some(FR_QUESTION));
        assert_eq!(result.answer, FR_ANSWER);
        assert_eq!(result.entry_index, Some(0));
        assert_eq!(result.decision(), Decision::Hit);
        assert!(result.score >= DEFAULT_THRESHOLD);
        assert!(log.records().is_empty());
    }

    #[test]
    fn unknown_query_falls_back_and_logs_once() {
        let log = Arc::new(MemoryUnansweredLog::new());
        let matcher =
            FaqMatcher::build(single_entry_catalog(), HashEmbeddingProvider::default(), log.clone())
                .unwrap();
        let query = "quelle est la capitale de la France ?";

        let result = matcher.resolve_default(query).unwrap();

        assert_eq!(result.answer, FALLBACK_ANSWER);
        assert_eq!(result.matched_question, None);
        assert_eq!(result.decision(), Decision::Miss);
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].question, query);
        assert_eq!(records[0].score, result.score);
    }

    #[test]
    fn get_best_answer_returns_pair() {
        let matcher = FaqMatcher::build(
            single_entry_catalog(),
            HashEmbeddingProvider::default(),
            MemoryUnansweredLog::new(),
        )
        .unwrap();

        assert_eq!(
            matcher.get_best_answer("dates d'inscription", 0.65).unwrap(),
            (FR_ANSWER.to_string(), Some(FR_QUESTION.to_string()))
        );
        assert_eq!(
            matcher.get_best_answer("bibliothèque", 0.65).unwrap(),
            (FALLBACK_ANSWER.to_string(), None)
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let embedder = FixedEmbeddings::new(&[("q", [1.0, 0.0]), ("query", [0.8, 0.6])]);
        let log = Arc::new(MemoryUnansweredLog::new());
        let corpus = Corpus::from_entries(vec![entry("q", "a", Language::Fr)]);
        let matcher = FaqMatcher::build(corpus, embedder, log.clone()).unwrap();

        let exact = matcher.resolve("query", 0.0).unwrap().score;
        assert!(exact > 0.0);

        let at = matcher.resolve("query", exact).unwrap();
        assert!(at.is_match());
        assert_eq!(at.answer, "a");

        let above = f32::from_bits(exact.to_bits() + 1);
        let below = matcher.resolve("query", above).unwrap();
        assert!(!below.is_match());
        assert_eq!(below.answer, FALLBACK_ANSWER);
        assert_eq!(log.records().len(), 1);
    }

    #[test]
    fn duplicate_questions_resolve_to_lowest_index() {
        let corpus = Corpus::from_entries(vec![
            entry("autre", "x", Language::Fr),
            entry("même question", "première", Language::Fr),
            entry("même question", "seconde", Language::Ar),
        ]);
        let matcher = FaqMatcher::build(
            corpus,
            HashEmbeddingProvider::default(),
            MemoryUnansweredLog::new(),
        )
        .unwrap();

        let result = matcher.resolve_default("même question").unwrap();
        assert_eq!(result.entry_index, Some(1));
        assert_eq!(result.answer, "première");
    }

    #[test]
    fn any_language_entry_can_match() {
        let embedder = FixedEmbeddings::new(&[
            ("fr", [1.0, 0.0]),
            ("ar", [0.0, 1.0]),
            ("question", [0.1, 0.9]),
        ]);
        let corpus = Corpus::from_entries(vec![
            entry("fr", "réponse", Language::Fr),
            entry("ar", "جواب", Language::Ar),
        ]);
        let matcher = FaqMatcher::build(corpus, embedder, MemoryUnansweredLog::new()).unwrap();

        let result = matcher.resolve_default("question").unwrap();
        assert_eq!(result.entry_index, Some(1));
        assert_eq!(result.answer, "جواب");
    }

    #[test]
    fn resolve_is_deterministic() {
        let matcher = FaqMatcher::build(
            single_entry_catalog(),
            HashEmbeddingProvider::default(),
            MemoryUnansweredLog::new(),
        )
        .unwrap();

        let a = matcher.resolve_default("dates d'inscription").unwrap();
        let b = matcher.resolve_default("dates d'inscription").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn blank_query_takes_fallback_path() {
        let log = Arc::new(MemoryUnansweredLog::new());
        let matcher =
            FaqMatcher::build(single_entry_catalog(), HashEmbeddingProvider::default(), log.clone())
                .unwrap();

        let result = matcher.resolve_default("").unwrap();
        assert!(!result.is_match());
        assert_eq!(result.score, 0.0);
        assert_eq!(log.records().len(), 1);
    }

    #[test]
    fn log_write_failure_still_returns_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvUnansweredLog::new(dir.path().join("missing").join("log.csv"));
        let matcher =
            FaqMatcher::build(single_entry_catalog(), HashEmbeddingProvider::default(), log)
                .unwrap();

        let result = matcher.resolve_default("quelle est la capitale de la France ?").unwrap();
        assert_eq!(result.answer, FALLBACK_ANSWER);
        assert_eq!(result.matched_question, None);
    }

    #[test]
    fn fallback_is_appended_to_csv_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unanswered_questions.csv");
        let matcher = FaqMatcher::build(
            single_entry_catalog(),
            HashEmbeddingProvider::default(),
            CsvUnansweredLog::new(&path),
        )
        .unwrap();

        matcher.resolve_default("quelle est la capitale de la France ?").unwrap();
        matcher.resolve_default("dates d'inscription").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Question,Score");
        assert!(lines[1].starts_with("quelle est la capitale de la France ?,"));
    }

    #[test]
    fn shared_across_threads() {
        let log = Arc::new(MemoryUnansweredLog::new());
        let matcher = Arc::new(
            FaqMatcher::build(single_entry_catalog(), HashEmbeddingProvider::default(), log.clone())
                .unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let matcher = Arc::clone(&matcher);
                std::thread::spawn(move || {
                    let query = if i % 2 == 0 {
                        "dates d'inscription"
                    } else {
                        "quelle est la capitale de la France ?"
                    };
                    matcher.resolve_default(query).unwrap().is_match()
                })
            })
            .collect();
        let hits = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|hit| *hit)
            .count();

        assert_eq!(hits, 2);
        assert_eq!(log.records().len(), 2);
    }

    #[test]
    fn with_index_rejects_size_mismatch() {
        let index = LinearIndex::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let result = FaqMatcher::with_index(
            single_entry_catalog(),
            HashEmbeddingProvider::default(),
            index,
            MemoryUnansweredLog::new(),
        );
        assert!(matches!(result, Err(FaqError::Config(_))));
    }
}
