//! REPL – Read-Eval-Print Loop for `shardctl`.
//!
//! Plain input lines are fed to [`Perception`](shard_perception::Perception)
//! as natural-language operator input; slash-commands drive the
//! on-demand shards and inspect the shared fact store.
//!
//! Supported slash-commands:
//!   /help               – show this list
//!   /settings           – interactively edit `~/.shardctl/config.toml`
//!   /models             – list / switch the active Ollama model
//!   /connections        – adapter connectivity diagnostic
//!   /route              – tick the Router once
//!   /plan <goal>        – decompose a goal into agenda items
//!   /legislate <rule>   – turn a directive into a hot-loaded rule
//!   /scan <path>        – seed the fact store from a filesystem tree
//!   /status             – show recent facts from the Kernel
//!   /quit | /exit       – gracefully exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kernel_api::Kernel;

use crate::config::{self, Config, LlmProvider};
use crate::fleet::Fleet;
use crate::ollama;

/// Facts surfaced by `/status`, one query per line of output.
const STATUS_PREDICATES: &[&str] = &[
    "intent",
    "routing_result",
    "permitted_action",
    "security_violation",
    "agenda_item",
    "task_completed",
    "task_blocked",
    "rule_hot_loaded",
    "directive_rejected",
];

/// Entry point for the interactive REPL. `shutdown` is polled each
/// iteration; when set (by the Ctrl-C handler) the REPL exits cleanly.
pub async fn run(mut fleet: Fleet, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match read_line_blocking("shard> ") {
            Some(line) => {
                let cmd = line.trim();
                if cmd.is_empty() {
                    continue;
                }

                if cmd == "/quit" || cmd == "/exit" {
                    println!("{}", "Goodbye.".green());
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }

                dispatch(cmd, &fleet).await;
            }
            None => break, // EOF
        }
    }

    fleet.shutdown().await;
}

async fn dispatch(cmd: &str, fleet: &Fleet) {
    if let Some(rest) = cmd.strip_prefix('/') {
        let (head, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        let arg = arg.trim();
        match head {
            "help" => cmd_help(),
            "settings" => cmd_settings(),
            "models" => cmd_models(),
            "connections" => cmd_connections(fleet).await,
            "route" => cmd_route(fleet).await,
            "plan" => cmd_plan(fleet, arg).await,
            "legislate" => cmd_legislate(fleet, arg).await,
            "scan" => cmd_scan(fleet, arg).await,
            "status" => cmd_status(fleet).await,
            other => {
                println!(
                    "{} '/{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
        return;
    }

    match fleet.perception.submit_input(cmd.to_string()) {
        Ok(()) => println!("  {}", "queued for perception".dimmed()),
        Err(e) => println!("{}: {}", "Perception queue full".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "shardctl Commands".bold().underline());
    println!("  {}                  – natural-language input, queued to Perception", "<text>".bold().cyan());
    println!("  {}             – edit ~/.shardctl/config.toml settings", "/settings".bold().cyan());
    println!("  {}               – list and switch the active model", "/models".bold().cyan());
    println!("  {}          – adapter connectivity diagnostic", "/connections".bold().cyan());
    println!("  {}                – tick the Router once", "/route".bold().cyan());
    println!("  {} <goal>          – decompose a goal into agenda items", "/plan".bold().cyan());
    println!("  {} <rule>     – turn a directive into a hot-loaded rule", "/legislate".bold().cyan());
    println!("  {} <path>          – seed the fact store from a filesystem tree", "/scan".bold().cyan());
    println!("  {}               – show recent facts from the Kernel", "/status".bold().cyan());
    println!("  {}     – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_settings() {
    let mut cfg = load_config_or_default();

    println!("{}", "Settings Editor".bold().underline());
    println!(
        "  LLM provider     : {} (ollama / openai / anthropic)",
        cfg.llm_provider.to_string().yellow()
    );
    let provider = prompt_str(&format!("  LLM provider     [{}]: ", cfg.llm_provider), &cfg.llm_provider.to_string());
    cfg.llm_provider = match provider.to_lowercase().as_str() {
        "openai" => LlmProvider::OpenAI,
        "anthropic" => LlmProvider::Anthropic,
        _ => LlmProvider::Ollama,
    };

    let model = prompt_str(&format!("  Active model     [{}]: ", cfg.active_model), &cfg.active_model);
    cfg.active_model = model;

    let strict = prompt_bool(&format!("  Strict mode      [{}]: ", cfg.strict_mode), cfg.strict_mode);
    cfg.strict_mode = strict;

    let barriers = prompt_bool(&format!("  Strict barriers  [{}]: ", cfg.strict_barriers), cfg.strict_barriers);
    cfg.strict_barriers = barriers;

    match config::save(&cfg) {
        Ok(()) => println!("{} {}", "Settings saved to".green(), config::config_path().display().to_string().bold()),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    println!("  {}", "Restart shardctl for changes to take effect.".dimmed());
}

fn cmd_models() {
    let cfg = load_config_or_default();

    println!("{}", "Models".bold().underline());
    println!("  Active model : {}", cfg.active_model.yellow());

    if cfg.llm_provider != LlmProvider::Ollama {
        println!("  Provider: {}", cfg.llm_provider.to_string().yellow());
        println!("  (Cloud model selection is managed via the API key settings.)");
        return;
    }

    print!("  Probing Ollama at {} ... ", cfg.ollama_url.dimmed());
    io::stdout().flush().ok();
    match ollama::fetch_models(&cfg.ollama_url) {
        Ok(models) if models.is_empty() => {
            println!("{}", "no models found".yellow());
            println!("  Run `ollama pull llama3` to download a model.");
        }
        Ok(models) => {
            println!("{}", "online".green());
            for m in &models {
                let marker = if m.name == cfg.active_model { "*" } else { " " };
                println!("    {} {}", marker.green(), m.name.bold());
            }
        }
        Err(e) => {
            println!("{}", "offline".red());
            println!("  {}", e.dimmed());
        }
    }
}

async fn cmd_connections(fleet: &Fleet) {
    let cfg = load_config_or_default();

    println!("{}", "Connection Diagnostics".bold().underline());

    print!("  Probing Ollama at {} ... ", cfg.ollama_url.dimmed());
    io::stdout().flush().ok();
    if ollama::is_running(&cfg.ollama_url) {
        println!("{}", "online".green());
    } else {
        println!("{}", "offline".red());
    }

    let state = fleet.perception.base().state().await;
    println!(
        "  Perception shard: {}",
        if state == shard_base::ShardState::Running { "running".green() } else { "stopped".red() }
    );
}

async fn cmd_route(fleet: &Fleet) {
    match fleet.router.tick().await {
        Ok(()) => println!("{}", "router ticked".green()),
        Err(e) => println!("{}: {}", "Router tick failed".red(), e),
    }
}

async fn cmd_plan(fleet: &Fleet, goal: &str) {
    if goal.is_empty() {
        println!("{}", "usage: /plan <goal>".yellow());
        return;
    }
    match fleet.planner.decompose_goal(goal).await {
        Ok(ids) if ids.is_empty() => println!("  {}", "no tasks derived from that goal".dimmed()),
        Ok(ids) => {
            println!("  {}", "agenda items:".green());
            for id in ids {
                println!("    {}", id);
            }
        }
        Err(e) => println!("{}: {}", "Planning failed".red(), e),
    }
}

async fn cmd_legislate(fleet: &Fleet, directive: &str) {
    if directive.is_empty() {
        println!("{}", "usage: /legislate <directive>".yellow());
        return;
    }
    match fleet
        .legislator
        .process_directive(directive, fleet.llm.as_ref(), fleet.feedback.as_ref(), fleet.rule_validator.as_ref())
        .await
    {
        Ok(shard_runtime::LegislatorOutcome::HotLoaded { rule }) => {
            println!("  {} {}", "hot-loaded:".green(), rule);
        }
        Ok(shard_runtime::LegislatorOutcome::Rejected { reason }) => {
            println!("  {} {}", "rejected:".yellow(), reason);
        }
        Err(e) => println!("{}: {}", "Legislation failed".red(), e),
    }
}

async fn cmd_scan(fleet: &Fleet, path: &str) {
    let path = if path.is_empty() { "." } else { path };
    match fleet.world_model.scan(Path::new(path)).await {
        Ok(summary) => println!(
            "  {} {} files, {} symbols, {} links",
            "scanned:".green(),
            summary.files_scanned,
            summary.symbols_found,
            summary.links_found
        ),
        Err(e) => println!("{}: {}", "Scan failed".red(), e),
    }
}

async fn cmd_status(fleet: &Fleet) {
    println!("{}", "Kernel Status".bold().underline());
    for predicate in STATUS_PREDICATES {
        match fleet.kernel.query(predicate).await {
            Ok(facts) if facts.is_empty() => continue,
            Ok(facts) => {
                println!("  {} ({})", predicate.bold().cyan(), facts.len());
                for fact in facts.iter().take(5) {
                    println!("    {:?}", fact);
                }
            }
            Err(e) => println!("  {}: {}", predicate.red(), e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────

fn load_config_or_default() -> Config {
    match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {} - using defaults", "Config error".red(), e);
            Config::default()
        }
    }
}

fn read_line_blocking(prompt: &str) -> Option<String> {
    print!("{} ", prompt.bold().cyan());
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(e) => {
            eprintln!("{}: {}", "Read error".red(), e);
            None
        }
    }
}

fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() { default.to_string() } else { trimmed }
        }
        Err(_) => default.to_string(),
    }
}

fn prompt_bool(msg: &str, default: bool) -> bool {
    let raw = prompt_str(msg, &default.to_string());
    match raw.to_lowercase().as_str() {
        "true" | "yes" | "y" => true,
        "false" | "no" | "n" => false,
        _ => default,
    }
}
