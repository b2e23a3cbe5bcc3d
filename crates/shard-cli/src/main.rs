//! `shardctl` – command-line entry point for the shard fleet.
//!
//! 1. Checks for `~/.shardctl/config.toml`; runs a **first-run wizard** when
//!    the file is absent.
//! 2. Probes the local Ollama instance and reports available models.
//! 3. Boots the shard fleet (Perception, Executive, Constitution start
//!    automatically; Router, Planner, Legislator, WorldModel on demand).
//! 4. Drops the user into an interactive REPL with slash-commands.
//! 5. Intercepts Ctrl-C for a graceful shutdown.

mod config;
mod fleet;
mod ollama;
mod repl;
mod transducer;

use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let _telemetry_guard = shard_base::telemetry::init_tracing("shardctl");

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "Ctrl-C received, shutting down...".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }

    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => println!("  Config loaded from {}", config::config_path().display().to_string().bold()),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    let cfg = config::load().ok().flatten().unwrap_or_default();

    print!("\n  Probing Ollama at {} ... ", cfg.ollama_url.dimmed());
    let ollama_reachable = ollama::is_running(&cfg.ollama_url);
    if ollama_reachable {
        println!("{}", "online".green());
    } else {
        println!("{}", "offline".yellow());
        println!(
            "  {}  Falling back to a scripted LLM stand-in; run `{}` for real completions.",
            "No Ollama instance detected.".dimmed(),
            "ollama serve".bold()
        );
    }

    println!();
    print!("  Booting shard fleet ... ");
    let fleet = fleet::Fleet::boot(&cfg, ollama_reachable).await;
    println!("{}", "OK".green());
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(fleet, shutdown).await;
}

fn run_first_run_wizard() {
    println!();
    println!("{}", "  First-Run Setup".bold().cyan());
    println!("  No configuration found. Let's set up shardctl.\n");

    let mut cfg = config::Config::default();

    println!("  Which LLM provider would you like to use?");
    println!("    1) Local AI via Ollama  (default, offline-first)");
    println!("    2) Cloud AI via OpenAI");
    println!("    3) Cloud AI via Anthropic");
    let choice = prompt_line("  Enter choice [1]: ", "1");
    cfg.llm_provider = match choice.trim() {
        "2" => config::LlmProvider::OpenAI,
        "3" => config::LlmProvider::Anthropic,
        _ => config::LlmProvider::Ollama,
    };

    let model = prompt_line(&format!("  Active model [{}]: ", cfg.active_model), &cfg.active_model);
    cfg.active_model = model;

    match config::save(&cfg) {
        Ok(()) => println!("\n  {} Config saved to {}\n", "OK".green().bold(), config::config_path().display().to_string().bold()),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

fn print_banner() {
    println!();
    println!("{}", "  shardctl".bold().cyan());
    println!("  {} {}", "OODA shard fleet".dimmed(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!();
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
