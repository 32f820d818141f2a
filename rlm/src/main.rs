//! Recursive language model CLI.
//!
//! Answers a question about a file or directory by letting a model explore
//! it with sandboxed code. Configuration lives in `.rlm/config.toml` and each
//! session is stored under `.rlm/traces/`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};

use rlm::core::types::{Turn, TurnKind};
use rlm::exit_codes;
use rlm::io::backend::HttpBackend;
use rlm::io::config::{RlmConfig, config_path, load_config};
use rlm::io::corpus::{CorpusOptions, load_context};
use rlm::io::init::{InitOptions, init_rlm};
use rlm::io::sandbox::{NoSubCall, PythonSandbox, Sandbox};
use rlm::io::trace_log::write_trace;
use rlm::logging;
use rlm::session::{SessionRequest, run_session};

#[derive(Parser)]
#[command(
    name = "rlm",
    version,
    about = "Answer questions about large texts with a model that writes code"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.rlm/config.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run a session and print the answer.
    Ask {
        /// File or directory to load as the context.
        #[arg(long)]
        context: PathBuf,
        /// The question to answer.
        #[arg(short, long)]
        question: String,
        /// Override `max_iterations` from the config.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Config file (defaults to `.rlm/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the full session outcome as JSON.
        #[arg(long)]
        json: bool,
        /// Do not store the trace under `.rlm/traces/`.
        #[arg(long)]
        no_save: bool,
    },
    /// Run one sandbox execution against a context (sub-calls disabled).
    Exec {
        /// File or directory to load as the context.
        #[arg(long)]
        context: PathBuf,
        /// File with the code to run (reads stdin when omitted).
        #[arg(long)]
        code: Option<PathBuf>,
        /// Config file (defaults to `.rlm/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Ask {
            context,
            question,
            max_iterations,
            config,
            json,
            no_save,
        } => cmd_ask(
            &root,
            &AskArgs {
                context,
                question,
                max_iterations,
                config,
                json,
                no_save,
            },
        ),
        Command::Exec {
            context,
            code,
            config,
        } => cmd_exec(&root, &context, code.as_deref(), config.as_deref()),
    }
}

struct AskArgs {
    context: PathBuf,
    question: String,
    max_iterations: Option<u32>,
    config: Option<PathBuf>,
    json: bool,
    no_save: bool,
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_rlm(root, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_ask(root: &Path, args: &AskArgs) -> Result<i32> {
    if args.question.trim().is_empty() {
        bail!("--question must be non-empty");
    }
    if args.max_iterations == Some(0) {
        bail!("--max-iterations must be > 0");
    }
    let config = load(root, args.config.as_deref())?;
    let context = load_context(&args.context, &CorpusOptions::default())
        .with_context(|| format!("load context {}", args.context.display()))?;
    let backend = HttpBackend::from_config(&config.backend)?;
    let sandbox = PythonSandbox::new(config.sandbox.clone());

    let mut request = SessionRequest::new(&args.question, &context, &config);
    if let Some(max_iterations) = args.max_iterations {
        request.max_iterations = max_iterations;
    }
    let outcome = run_session(&request, &backend, &sandbox, print_progress)?;

    if !args.no_save {
        let paths = write_trace(root, &outcome)?;
        eprintln!("trace: {}", paths.dir.display());
    }
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("serialize outcome")?
        );
    } else {
        println!("{}", outcome.answer_or_sentinel());
    }
    Ok(outcome.exit_code())
}

fn cmd_exec(
    root: &Path,
    context: &Path,
    code: Option<&Path>,
    config: Option<&Path>,
) -> Result<i32> {
    let config = load(root, config)?;
    let context = load_context(context, &CorpusOptions::default())
        .with_context(|| format!("load context {}", context.display()))?;
    let code = match code {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read code from stdin")?;
            buf
        }
    };

    let output = PythonSandbox::new(config.sandbox).execute(&code, &context, &NoSubCall);
    println!("{output}");
    Ok(if output.starts_with("ERROR:") {
        exit_codes::INVALID
    } else {
        exit_codes::OK
    })
}

fn load(root: &Path, explicit: Option<&Path>) -> Result<RlmConfig> {
    match explicit {
        Some(path) => {
            if !path.is_file() {
                bail!("config file {} does not exist", path.display());
            }
            load_config(path)
        }
        None => load_config(&config_path(root)),
    }
}

fn print_progress(turn: &Turn) {
    let detail = match turn.kind {
        TurnKind::CodeExecution => {
            let output = turn.output.as_deref().unwrap_or_default();
            let first = output.lines().next().unwrap_or_default();
            format!(
                "code ({} sub-calls) -> {}",
                turn.sub_calls.len(),
                first.chars().take(80).collect::<String>()
            )
        }
        TurnKind::FinalAnswer => "final answer".to_string(),
        TurnKind::NoCode if turn.backend_failed => "backend failed".to_string(),
        TurnKind::NoCode => "no code".to_string(),
    };
    eprintln!("[{}] {detail}", turn.iteration);
}
