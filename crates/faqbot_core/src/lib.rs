pub mod bert_embed;
pub mod catalog;
pub mod embed;
pub mod error;
pub mod eval;
pub mod matcher;
pub mod model;
pub mod retrieval;
pub mod unanswered;

pub use bert_embed::{BertConfig, BertEmbeddingProvider};
pub use catalog::{load_catalog, parse_catalog, Corpus};
pub use embed::{EmbeddingProvider, HashEmbeddingProvider};
pub use error::{FaqError, Result};
pub use eval::{evaluate_cases, load_eval_cases, CaseExpectation, EvalCase, EvalOutcome, EvalSummary};
pub use matcher::FaqMatcher;
pub use model::{Decision, FaqEntry, Language, MatchResult, UnansweredRecord};
pub use retrieval::{cosine_similarity, LinearIndex, VectorIndex};
pub use unanswered::{CsvUnansweredLog, MemoryUnansweredLog, NullUnansweredLog, UnansweredSink};

pub const DEFAULT_THRESHOLD: f32 = 0.65;
pub const DEFAULT_REQUIRED_PASS_RATE: f32 = 0.85;
pub const DEFAULT_MODEL_ID: &str = "paraphrase-multilingual-MiniLM-L12-v2";
pub const DEFAULT_MAX_SEQ_LENGTH: usize = 128;
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_CATALOG_PATH: &str = "faq.json";
pub const DEFAULT_UNANSWERED_LOG: &str = "unanswered_questions.csv";
pub const FALLBACK_ANSWER: &str =
    "Je n'ai pas compris votre question. Pour plus d'aide, contactez le service administratif.";
