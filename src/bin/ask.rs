//! One-shot question answering from the command line.
//!
//! Retrieves evidence from the persisted indices, renders it into a
//! grounded prompt, and asks the configured chat provider. `--dry-run`
//! stops after retrieval and prints the evidence block instead.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use campusrag::answerer::{self, Answerer, AnswererConfig, AnthropicProvider, OpenAiProvider};
use campusrag::embedder::EmbedderSettings;
use campusrag::retriever::FusionPolicy;
use campusrag::service::{ServiceContext, SourceConfig};

#[derive(Parser, Debug)]
#[command(name = "campusrag-ask", about = "Ask a grounded question over indexed corpora")]
struct Args {
    /// The question to answer.
    question: String,

    /// Directory of the courses index.
    #[arg(long)]
    courses_dir: Option<PathBuf>,

    /// Directory of the faculty-rules index.
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Evidence chunks to retrieve.
    #[arg(short, long, default_value_t = 5)]
    k: usize,

    /// Chat provider: openai or anthropic.
    #[arg(long, default_value = "openai")]
    provider: String,

    /// Chat model; defaults per provider.
    #[arg(long)]
    model: Option<String>,

    /// Print the retrieved evidence and exit without calling a provider.
    #[arg(long)]
    dry_run: bool,

    /// OpenAI API key, for embeddings and the openai provider.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// Anthropic API key, for the anthropic provider.
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Base URL for the OpenAI API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// Base URL for the Anthropic API.
    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = "https://api.anthropic.com")]
    anthropic_base_url: String,

    /// Base URL of the local embedding server.
    #[arg(long, env = "EMBED_SERVER_URL", default_value = "http://127.0.0.1:8081")]
    server_base_url: String,
}

fn build_answerer(args: &Args) -> Result<Answerer> {
    let config = AnswererConfig::default();
    match args.provider.as_str() {
        "openai" => {
            let api_key = match &args.openai_api_key {
                Some(key) if !key.trim().is_empty() => key.clone(),
                _ => bail!("OPENAI_API_KEY is required for the openai provider"),
            };
            let model = args
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            let provider = OpenAiProvider::new(api_key, args.openai_base_url.clone(), model)?;
            Ok(Answerer::new(Box::new(provider), config))
        }
        "anthropic" => {
            let api_key = match &args.anthropic_api_key {
                Some(key) if !key.trim().is_empty() => key.clone(),
                _ => bail!("ANTHROPIC_API_KEY is required for the anthropic provider"),
            };
            let model = args
                .model
                .clone()
                .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string());
            let provider = AnthropicProvider::new(api_key, args.anthropic_base_url.clone(), model)?;
            Ok(Answerer::new(Box::new(provider), config))
        }
        other => bail!("unknown provider {other:?}, expected openai or anthropic"),
    }
}

fn source_configs(args: &Args) -> Result<Vec<SourceConfig>> {
    let mut configs = Vec::new();
    if let Some(dir) = &args.courses_dir {
        configs.push(SourceConfig {
            name: "courses".to_string(),
            dir: dir.clone(),
        });
    }
    if let Some(dir) = &args.rules_dir {
        configs.push(SourceConfig {
            name: "faculty-rules".to_string(),
            dir: dir.clone(),
        });
    }
    if configs.is_empty() {
        bail!("at least one of --courses-dir or --rules-dir is required");
    }
    Ok(configs)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let configs = source_configs(&args)?;
    let settings = EmbedderSettings {
        openai_api_key: args.openai_api_key.clone(),
        openai_base_url: args.openai_base_url.clone(),
        server_base_url: args.server_base_url.clone(),
        ..EmbedderSettings::default()
    };
    let context = ServiceContext::load(&configs, &settings, FusionPolicy::default())?;
    let hits = context.search(&args.question, args.k.max(1))?;
    eprintln!("retrieved {} evidence chunks", hits.len());

    if args.dry_run {
        println!(
            "{}",
            answerer::render_context(&AnswererConfig::default(), &hits)
        );
        return Ok(());
    }
    let answerer = build_answerer(&args)?;
    let answer = answerer.answer(&args.question, &hits)?;
    println!("{answer}");
    Ok(())
}
