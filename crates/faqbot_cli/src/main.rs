use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faqbot_core::{
    evaluate_cases, load_catalog, load_eval_cases, BertEmbeddingProvider, CsvUnansweredLog,
    EmbeddingProvider, FaqMatcher, HashEmbeddingProvider, Language, NullUnansweredLog,
    UnansweredSink, DEFAULT_CATALOG_PATH, DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_SEQ_LENGTH,
    DEFAULT_REQUIRED_PASS_RATE, DEFAULT_THRESHOLD, DEFAULT_UNANSWERED_LOG,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "faqbot")]
#[command(about = "Bilingual FAQ matcher: answers questions from a curated catalog")]
struct Cli {
    /// FAQ catalog: JSON with `questions.fr` and `questions.ar` maps.
    #[arg(long, global = true, env = "FAQBOT_CATALOG", default_value = DEFAULT_CATALOG_PATH)]
    catalog: PathBuf,

    /// Model directory with config.json, model.safetensors and tokenizer.json.
    /// Without it, hashed bag-of-words embeddings are used.
    #[arg(long, global = true, env = "FAQBOT_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// CSV file collecting questions that fell below the threshold.
    #[arg(
        long,
        global = true,
        env = "FAQBOT_UNANSWERED_LOG",
        default_value = DEFAULT_UNANSWERED_LOG
    )]
    unanswered_log: PathBuf,

    #[arg(
        long,
        global = true,
        env = "FAQBOT_THRESHOLD",
        default_value_t = DEFAULT_THRESHOLD,
        value_parser = parse_threshold
    )]
    threshold: f32,

    #[arg(long, global = true, default_value_t = DEFAULT_MAX_SEQ_LENGTH)]
    max_seq_length: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Answer a single question.
    Ask {
        #[arg(long)]
        question: String,
        /// Print the full match result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Answer questions read line by line from stdin.
    Chat,
    /// Score labelled cases against the catalog.
    Eval {
        #[arg(long)]
        cases: PathBuf,
        #[arg(long, default_value_t = DEFAULT_REQUIRED_PASS_RATE)]
        min_pass_rate: f32,
    },
    /// Validate the catalog and print its layout.
    Catalog,
}

fn parse_threshold(s: &str) -> std::result::Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("invalid threshold '{s}': {e}"))?;
    if !(-1.0..=1.0).contains(&value) {
        return Err(format!("threshold must be within [-1, 1], got {value}"));
    }
    Ok(value)
}

fn make_embedder(cli: &Cli) -> Result<Box<dyn EmbeddingProvider>> {
    match &cli.model_dir {
        Some(dir) => {
            tracing::info!(model_dir = %dir.display(), "loading embedding model");
            let provider = BertEmbeddingProvider::load(dir, cli.max_seq_length)?;
            Ok(Box::new(provider))
        }
        None => {
            tracing::warn!("no --model-dir given, using hash embeddings");
            Ok(Box::new(HashEmbeddingProvider::new(DEFAULT_EMBEDDING_DIM)))
        }
    }
}

/// Catalog, then model, then index. Any failure stops before serving.
fn build_matcher(cli: &Cli, unanswered: impl UnansweredSink + 'static) -> Result<FaqMatcher> {
    let corpus = load_catalog(&cli.catalog)?;
    let embedder = make_embedder(cli)?;
    let matcher = FaqMatcher::build(corpus, embedder, unanswered)?;
    Ok(matcher)
}

fn model_name(cli: &Cli) -> String {
    cli.model_dir
        .as_ref()
        .map(|p| {
            p.file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .unwrap_or_else(|| "hash".to_string())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Ask { question, json } => {
            let question = question.trim();
            if question.is_empty() {
                bail!("question must not be blank");
            }
            let matcher = build_matcher(&cli, CsvUnansweredLog::new(&cli.unanswered_log))?;
            let result = matcher.resolve(question, cli.threshold)?;

            if *json {
                println!(
                    "{}",
                    serde_json::to_string(&result).context("serialize match result")?
                );
            } else {
                println!(
                    "model={} decision={:?} score={:.4} matched_question={}",
                    model_name(&cli),
                    result.decision(),
                    result.score,
                    result.matched_question.as_deref().unwrap_or("null")
                );
                println!("answer={}", result.answer);
            }
        }
        Commands::Chat => {
            let matcher = build_matcher(&cli, CsvUnansweredLog::new(&cli.unanswered_log))?;
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout().lock();

            for line in stdin.lock().lines() {
                let line = line.context("read question from stdin")?;
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                let (answer, _) = matcher.get_best_answer(question, cli.threshold)?;
                writeln!(stdout, "{answer}").context("write answer")?;
                stdout.flush().context("flush answer")?;
            }
        }
        Commands::Eval {
            cases,
            min_pass_rate,
        } => {
            let matcher = build_matcher(&cli, NullUnansweredLog)?;
            let cases = load_eval_cases(cases)
                .with_context(|| format!("load eval cases {}", cases.display()))?;
            let summary = evaluate_cases(&matcher, &cases, cli.threshold)?;

            for o in &summary.outcomes {
                println!(
                    "case={} passed={} decision={:?} matched_question={} score={:.4} latency={:.1}ms",
                    o.case_id,
                    o.passed,
                    o.actual_decision,
                    o.matched_question.as_deref().unwrap_or("null"),
                    o.score,
                    o.latency_ms
                );
            }
            println!(
                "model={} total={} passed={} failed={} pass_rate={:.4} required={:.4} threshold={:.2}",
                model_name(&cli),
                summary.total,
                summary.passed,
                summary.failed,
                summary.pass_rate,
                min_pass_rate,
                summary.threshold
            );

            if !summary.meets(*min_pass_rate) {
                bail!(
                    "pass rate {:.4} is below the required {:.4}",
                    summary.pass_rate,
                    min_pass_rate
                );
            }
        }
        Commands::Catalog => {
            let corpus = load_catalog(&cli.catalog)?;
            println!(
                "entries={} fr={} ar={} boundary={}",
                corpus.len(),
                corpus.count(Language::Fr),
                corpus.count(Language::Ar),
                corpus.language_boundary()
            );
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
