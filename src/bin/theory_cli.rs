//! Offline tools around the bot: batch parsing, RAG test runs, index rebuilds
//! and an interactive question loop.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use permiso_bot::config::Settings;
use permiso_bot::llm::{build_embedder, build_vision_model};
use permiso_bot::question::{build_rag_query, format_result, parse_model_output, ScreenshotParser};
use permiso_bot::rag::{build_query_engine, rebuild_index};
use permiso_bot::utils::format_secs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Words that end the chat loop
const EXIT_WORDS: [&str; 3] = ["salir", "quit", "exit"];

#[derive(Parser)]
#[command(name = "theory-cli")]
#[command(version, about = "Permiso B theory tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse every screenshot in a folder into the corpus
    Parse {
        /// Folder with .jpg/.jpeg/.png screenshots
        folder: PathBuf,

        /// Output directory (defaults to PARSED_OUTPUT_DIR)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Answer a parsed question file with RAG only
    Ask {
        /// Parsed `.json` file
        json_file: PathBuf,

        /// Also print the retrieved chunks
        #[arg(long)]
        sources: bool,
    },

    /// Delete and rebuild the index from DATA_DIR
    Rebuild,

    /// Ask free-form questions against the index
    Chat,
}

fn is_exit_word(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    EXIT_WORDS.contains(&input.as_str())
}

async fn parse(settings: &Settings, folder: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let vision = Arc::new(build_vision_model(settings)?);
    let output = output.unwrap_or_else(|| settings.parsed_output_dir.clone());
    let parser = ScreenshotParser::new(vision, output);

    let results = parser.parse_folder(&folder).await?;
    let parsed = results
        .iter()
        .filter(|(_, outcome)| outcome.question().is_some())
        .count();
    println!(
        "Parsed {parsed}/{} screenshots into {}",
        results.len(),
        parser.output_dir().display()
    );
    Ok(())
}

async fn ask(settings: &Settings, json_file: PathBuf, show_sources: bool) -> Result<()> {
    let contents = tokio::fs::read_to_string(&json_file)
        .await
        .with_context(|| format!("failed to read {}", json_file.display()))?;
    let outcome = parse_model_output(&contents);
    let Some(question) = outcome.question() else {
        bail!(
            "{} holds no parsed question:\n{}",
            json_file.display(),
            format_result(&outcome)
        );
    };

    let engine = build_query_engine(settings).await?;
    let started = Instant::now();
    let answer = engine.query(&build_rag_query(question)).await?;
    let elapsed = started.elapsed();

    println!("{answer}");
    if show_sources {
        println!();
        for source in &answer.sources {
            println!("[{:.3}] {}", source.score, source.source);
        }
    }
    println!("\nTiming: rag={}", format_secs(elapsed));
    Ok(())
}

async fn rebuild(settings: &Settings) -> Result<()> {
    let embedder = build_embedder(settings)?;
    let index = rebuild_index(settings, &embedder).await?;
    println!(
        "Rebuilt index in {} ({} chunks)",
        settings.persist_dir.display(),
        index.len()
    );
    Ok(())
}

async fn chat(settings: &Settings) -> Result<()> {
    let engine = build_query_engine(settings).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout
            .write_all(b"\nQuestion about the theory exam (or 'salir'): ")
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if is_exit_word(&line) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match engine.query(line.trim()).await {
            Ok(answer) => println!("\nAnswer: {answer}"),
            Err(e) => eprintln!("\nError: {e}"),
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::new().context("failed to load configuration")?;
    match cli.command {
        Commands::Parse { folder, output } => parse(&settings, folder, output).await,
        Commands::Ask { json_file, sources } => ask(&settings, json_file, sources).await,
        Commands::Rebuild => rebuild(&settings).await,
        Commands::Chat => chat(&settings).await,
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,permiso_bot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_words() {
        assert!(is_exit_word("salir"));
        assert!(is_exit_word("  QUIT \n"));
        assert!(!is_exit_word("what does a triangle sign mean?"));
    }

    #[test]
    fn test_ask_arguments() {
        let cli = Cli::try_parse_from(["theory-cli", "ask", "parsed/q1.json", "--sources"])
            .expect("valid arguments");
        assert!(matches!(
            cli.command,
            Commands::Ask { ref json_file, sources: true } if json_file == &PathBuf::from("parsed/q1.json")
        ));
    }
}
