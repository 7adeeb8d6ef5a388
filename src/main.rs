//! # DocFusion CLI (`docfusion`)
//!
//! Ingest documents into per-document hybrid indices and query them from
//! the command line or over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! docfusion --config ./config/docfusion.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docfusion ingest <paths..>` | Index files, or every matching file under a directory |
//! | `docfusion ask "<question>"` | Answer from the top passages |
//! | `docfusion search "<query>"` | Show ranked passages |
//! | `docfusion chat` | Interactive multi-turn questions on stdin |
//! | `docfusion status` | Loaded indices and per-document page coverage |
//! | `docfusion list` | List indexed documents |
//! | `docfusion delete <filename>` | Remove a document and its index |
//! | `docfusion reset` | Remove every index |
//! | `docfusion serve` | Start the HTTP server |
//! | `docfusion completions <shell>` | Print a shell completion script |

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

use docfusion::answer::AnswerStyle;
use docfusion::chat::ChatSession;
use docfusion::config::{self, Config, DEFAULT_CONFIG_PATH};
use docfusion::eval;
use docfusion::federation::IndexFederation;
use docfusion::logging;
use docfusion::scan::collect_documents;
use docfusion::server;

/// DocFusion: hybrid dense + BM25 retrieval over a federation of
/// per-document indices.
#[derive(Parser)]
#[command(name = "docfusion", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When omitted, `./config/docfusion.toml` is used if it exists and
    /// built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents.
    ///
    /// Files are copied into the corpus, parsed, and indexed. Directories
    /// are walked and filtered through `[ingest] include_globs`.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,
        /// Passages to retrieve (defaults to `retrieval.default_top_k`).
        #[arg(long)]
        top_k: Option<usize>,
        /// concise, detailed, bullet, or citation.
        #[arg(long, default_value = "concise")]
        style: AnswerStyle,
        /// Also print the supporting passages and quality heuristics.
        #[arg(long)]
        full: bool,
    },

    /// Show the ranked passages for a query.
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask follow-up questions interactively.
    ///
    /// Reads one question per line from stdin. `exit` or `quit` ends the
    /// session, `/clear` forgets the history, `/style <name>` switches the
    /// answer style.
    Chat {
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long, default_value = "concise")]
        style: AnswerStyle,
        /// Also print the supporting passages after each answer.
        #[arg(long)]
        full: bool,
    },

    /// List indexed documents.
    List,

    /// Show loaded indices and how many pages each document's passages cover.
    Status,

    /// Remove a document, its index, and its stored copy.
    Delete { filename: String },

    /// Remove every index and empty the registry.
    Reset,

    /// Start the HTTP server on `[server] bind`.
    Serve,

    /// Print a shell completion script.
    Completions { shell: clap_complete::Shell },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "docfusion", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => config::load_or_default(path, true)?,
        None => config::load_or_default(Path::new(DEFAULT_CONFIG_PATH), false)?,
    };
    logging::init_tracing(cfg.logging.format);

    let federation = Arc::new(IndexFederation::from_config(&cfg).await?);

    match cli.command {
        Commands::Ingest { paths } => run_ingest(&cfg, federation, &paths).await?,
        Commands::Ask {
            question,
            top_k,
            style,
            full,
        } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.default_top_k);
            let answer = federation.ask(&question, top_k, style).await?;
            println!("{}", answer.answer);
            if full {
                println!();
                print_passages(&answer.chunks);
                let contexts: Vec<&str> = answer.chunks.iter().map(|c| c.content()).collect();
                println!();
                println!(
                    "precision@{}: {:.2}  correctness: {:.2}  hallucination: {:.2}",
                    top_k,
                    eval::precision_at_k(&answer.chunks, &question, top_k),
                    eval::answer_correctness_proxy(&answer.answer, &question),
                    eval::hallucination_rate_proxy(&answer.answer, &contexts),
                );
            }
        }
        Commands::Search { query, top_k } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.default_top_k);
            let results = federation.query(&query, top_k).await?;
            if results.is_empty() {
                println!("No results.");
            } else {
                print_passages(&results);
            }
        }
        Commands::Chat { top_k, style, full } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.default_top_k);
            run_chat(ChatSession::new(federation, style), top_k, full).await?
        }
        Commands::Status => run_status(&federation).await,
        Commands::List => {
            let names = federation.list().await;
            if names.is_empty() {
                println!("No documents indexed yet.");
            }
            for name in names {
                println!("{}", name);
            }
        }
        Commands::Delete { filename } => {
            if federation.remove(&filename).await?.removed {
                println!("Removed {}", filename);
            } else {
                anyhow::bail!("No document named {}", filename);
            }
        }
        Commands::Reset => {
            federation.reset().await?;
            println!("All indices removed.");
        }
        Commands::Serve => server::run_server(&cfg, federation).await?,
        Commands::Completions { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}

async fn run_ingest(cfg: &Config, federation: Arc<IndexFederation>, paths: &[PathBuf]) -> Result<()> {
    let files = collect_documents(paths, &cfg.ingest)?;
    if files.is_empty() {
        println!("No matching documents.");
        return Ok(());
    }

    let mut tasks = JoinSet::new();
    for file in files {
        let federation = federation.clone();
        tasks.spawn(async move {
            let outcome = federation.ingest_file(&file).await;
            (file, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined?);
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut failed = 0;
    for (file, outcome) in results {
        match outcome {
            Ok(o) => println!(
                "{}  uid={}  passages={}  {}",
                o.filename,
                o.content_uid,
                o.passages,
                format!("{:?}", o.origin).to_lowercase(),
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {:#}", file.display(), e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} document(s) failed to ingest", failed);
    }
    Ok(())
}

async fn run_chat(mut chat: ChatSession, top_k: usize, full: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                chat.clear();
                println!("History cleared.");
                continue;
            }
            _ => {}
        }
        if let Some(name) = question.strip_prefix("/style") {
            match name.trim().parse::<AnswerStyle>() {
                Ok(style) => {
                    chat.set_style(style);
                    println!("Style set to {}.", chat.style());
                }
                Err(e) => eprintln!("{}", e),
            }
            continue;
        }

        match chat.ask(question, top_k).await {
            Ok(answer) => {
                println!("Assistant: {}", answer.answer);
                if full && !answer.chunks.is_empty() {
                    println!();
                    print_passages(&answer.chunks);
                }
                println!();
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}

async fn run_status(federation: &IndexFederation) {
    let status = federation.status().await;
    println!(
        "documents: {}  loaded: {}  passages: {}",
        status.documents, status.loaded_indices, status.passages
    );
    for filename in federation.list().await {
        match federation.loaded_index(&filename).await {
            Some(index) => {
                let records = index.records();
                let pages = records.iter().map(|r| r.passage.page as usize).max().unwrap_or(0);
                println!(
                    "{}  passages={}  pages={}  coverage={:.2}",
                    filename,
                    records.len(),
                    pages,
                    eval::page_coverage(records, pages)
                );
            }
            None => println!("{}  not loaded", filename),
        }
    }
}

fn print_passages(passages: &[docfusion_core::ScoredPassage]) {
    for (i, p) in passages.iter().enumerate() {
        let passage = &p.record.passage;
        let rerank = p
            .rerank_score
            .map(|s| format!("  rerank={:.4}", s))
            .unwrap_or_default();
        println!(
            "{}. [{}] {} p.{} ({})  score={:.4}{}",
            i + 1,
            p.id(),
            passage.document_id,
            passage.page,
            passage.kind,
            p.score,
            rerank
        );
        let snippet: String = passage.content.chars().take(240).collect();
        println!("   {}", snippet.replace('\n', " "));
    }
}
