//! `phasegate-cli` – Phasegate Command Line Interface
//!
//! A thin shell over `phasegate-kernel` for a single file-backed project:
//!
//! 1. Loads `~/.phasegate/config.toml` (defaults when absent) with
//!    `PHASEGATE_*` environment overrides.
//! 2. Compiles the policy from the configured overrides file.
//! 3. Dispatches one subcommand against the project ledger, persisting it
//!    whenever the kernel grows it.

mod config;
mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use serde::Deserialize;
use tracing::{debug, info};

use phasegate_kernel::ledger::find_duplicate_sequences;
use phasegate_kernel::{
    ActionQueue, ActionResult, GateDecisionRequest, GovernanceAction, KernelContext, KernelGate, Ledger,
    PolicyDocument, QueueAction, QueueStatus, bootstrap_project_ledger, evaluate_phase_state, gate_summary,
    verify_ledger_integrity,
};
use phasegate_types::{Artifact, DecisionStatus, GovernanceMode, Phase};

use config::Config;
use store::{CliError, PhaseFile};

/// `RUST_LOG` fallback when the variable is unset.
const DEFAULT_LOG_LEVEL: &str = "info";

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG controls verbosity (defaults to "info"). Logs go to stderr so
    // command output stays pipeable. PHASEGATE_LOG_FORMAT=json emits
    // newline-delimited JSON.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("PHASEGATE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<ExitCode, CliError> {
    let cfg = config::load().map_err(CliError::Config)?;
    debug!(?cfg, "config loaded");

    let Some((cmd, rest)) = args.split_first() else {
        cmd_help();
        return Ok(ExitCode::SUCCESS);
    };

    match cmd.as_str() {
        "init" => cmd_init(&cfg, rest),
        "verify" => cmd_verify(&cfg, rest),
        "policy" => cmd_policy(&cfg, rest),
        "schema" => cmd_schema(),
        "process" => cmd_process(&cfg, rest),
        "queue" => cmd_queue(&cfg, rest),
        "state" => cmd_state(&cfg, rest),
        "decide" => cmd_decide(&cfg, rest),
        "amend" => cmd_amend(&cfg, rest),
        "export" => cmd_export(&cfg, rest),
        "help" | "--help" | "-h" => {
            cmd_help();
            Ok(ExitCode::SUCCESS)
        }
        other => Err(CliError::Usage(format!(
            "unknown command '{other}'. Run `phasegate help` for available commands."
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// `init <project-id> [name]` – write the genesis entry, and a default
/// config file when none exists yet.
fn cmd_init(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let project_id = args
        .first()
        .ok_or_else(|| CliError::Usage("phasegate init <project-id> [name]".into()))?;
    let name = args.get(1).unwrap_or(project_id);

    if cfg.ledger_path.exists() {
        return Err(CliError::LedgerExists(cfg.ledger_path.display().to_string()));
    }
    let ledger = bootstrap_project_ledger(project_id, name, &cfg.default_actor, None)?;
    store::save_ledger(&cfg.ledger_path, &ledger)?;

    if !config::config_path().exists() {
        config::save(cfg).map_err(CliError::Config)?;
        println!("  Config saved to {}", config::config_path().display().to_string().bold());
    }

    let genesis = &ledger.entries()[0];
    println!(
        "  {} Project {} created by {}",
        "✓".green().bold(),
        project_id.bold(),
        cfg.default_actor.cyan()
    );
    println!("  Ledger: {}", cfg.ledger_path.display());
    println!("  Genesis hash: {}", genesis.hash.dimmed());
    Ok(ExitCode::SUCCESS)
}

/// `verify [ledger.json]`
fn cmd_verify(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let path = args.first().map(PathBuf::from).unwrap_or_else(|| cfg.ledger_path.clone());
    let ledger = store::load_ledger(&path)?;
    let report = verify_ledger_integrity(&ledger);
    let duplicates = find_duplicate_sequences(&ledger);

    println!("  Ledger: {} ({} entries)", path.display(), report.entries);
    if !duplicates.is_empty() {
        println!("  {} duplicate sequence numbers: {:?}", "!".yellow().bold(), duplicates);
    }
    match (&report.error, report.broken_at) {
        (Some(violation), Some(index)) => {
            println!("  {} broken at entry {}: {}", "✗".red().bold(), index, violation);
            Ok(ExitCode::FAILURE)
        }
        _ => {
            if let Some(tip) = ledger.tip() {
                println!("  Tip: #{} {} {}", tip.sequence, tip.kind, tip.hash.dimmed());
            }
            println!("  {} hash chain intact", "✓".green().bold());
            Ok(if duplicates.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

/// `policy [overrides.json]` – compile and print the effective policy.
fn cmd_policy(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let path = args.first().map(PathBuf::from).or_else(|| cfg.policy_path.clone());
    let compiled = store::load_policy(path.as_deref())?;

    println!("{}", serde_json::to_string_pretty(compiled.policy.tree())?);
    println!("  Version: {}", compiled.policy.version());
    println!("  Hash:    {}", compiled.hash.dimmed());
    if compiled.valid {
        println!("  {} valid", "✓".green().bold());
        Ok(ExitCode::SUCCESS)
    } else {
        for e in &compiled.errors {
            println!("  {} {}", "✗".red().bold(), e);
        }
        Ok(ExitCode::FAILURE)
    }
}

/// `schema` – the JSON schema of a policy document.
fn cmd_schema() -> Result<ExitCode, CliError> {
    println!("{}", serde_json::to_string_pretty(&PolicyDocument::json_schema())?);
    Ok(ExitCode::SUCCESS)
}

/// `process <actions.json>` – run a batch of actions through the pipeline.
fn cmd_process(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let path = args
        .first()
        .ok_or_else(|| CliError::Usage("phasegate process <actions.json>".into()))?;
    let actions = store::load_actions(Path::new(path))?;
    let ctx = context(cfg)?;
    let before = ctx.ledger.len();

    let outcome = KernelGate::default().process_batch(&actions, &ctx)?;
    for (action, verdict) in actions.iter().zip(&outcome.results) {
        print_verdict(action, verdict.result, &verdict.reason);
    }
    persist(cfg, &outcome.ledger, before)?;
    Ok(ExitCode::SUCCESS)
}

/// Contents of a `queue` batch file.
#[derive(Debug, Deserialize)]
struct QueueBatch {
    #[serde(default)]
    revisions: HashMap<String, u64>,
    actions: Vec<QueueAction>,
}

/// `queue <batch.json>` – submit agent actions through the action queue,
/// then drain it through the pipeline in sequence order.
fn cmd_queue(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let path = args
        .first()
        .ok_or_else(|| CliError::Usage("phasegate queue <batch.json>".into()))?;
    let batch: QueueBatch = store::read_json(Path::new(path))?;

    let mut queue = ActionQueue::new(cfg.queue_max_depth);
    for action in batch.actions {
        let submission = queue.submit(action, &batch.revisions);
        let entry = &submission.entry;
        let status = match entry.status {
            QueueStatus::Rejected => "rejected".red(),
            _ => "queued".green(),
        };
        println!(
            "  #{} {} {} {}{}",
            entry.sequence,
            status,
            entry.kind.bold(),
            entry.agent_id.cyan(),
            entry
                .rejection_reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default()
        );
        if submission.back_pressure {
            println!("  {} queue depth reached {}", "!".yellow().bold(), cfg.queue_max_depth);
        }
        queue = submission.queue;
    }

    let ctx = context(cfg)?;
    let before = ctx.ledger.len();
    let drain = KernelGate::default().process_queue(&queue, &ctx)?;
    for (entry, verdict) in &drain.results {
        let action = GovernanceAction::new(entry.kind.clone(), entry.agent_id.clone());
        print_verdict(&action, verdict.result, &verdict.reason);
    }
    let stats = drain.queue.stats();
    println!(
        "  Queue: {} accepted, {} rejected, {} superseded",
        stats.accepted, stats.rejected, stats.superseded
    );
    persist(cfg, &drain.ledger, before)?;
    Ok(ExitCode::SUCCESS)
}

/// `state <phase.json>` – artifact statuses, gate readiness and phase state.
fn cmd_state(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let path = args
        .first()
        .ok_or_else(|| CliError::Usage("phasegate state <phase.json>".into()))?;
    let file = PhaseFile::load(Path::new(path))?;
    let policy = store::load_policy(cfg.policy_path.as_deref())?.policy;
    let resolver = |p: &Phase, a: &Artifact| file.resolve(p, a);
    let phase = &file.phase;

    println!("  Phase {} ({})", phase.name.bold(), phase.id);
    for artifact in &phase.artifacts {
        let eval = phasegate_kernel::evaluator::evaluate_artifact(phase, artifact, &resolver, &policy);
        println!(
            "    {} {:<24} {:?}{}",
            if artifact.gate_blocking { "●" } else { "○" },
            artifact.name,
            eval.status,
            if eval.binding.is_fail_closed() {
                format!(" [template {:?}]", eval.binding).red().to_string()
            } else {
                String::new()
            }
        );
    }
    let summary = gate_summary(phase, &resolver, &policy);
    println!(
        "  Gate: {}/{} blocking resolved ({} waived)",
        summary.complete + summary.waived,
        summary.gate_blocking,
        summary.waived
    );
    if !summary.remaining.is_empty() {
        println!("  Remaining: {}", summary.remaining.join(", ").yellow());
    }
    println!("  State: {:?}", evaluate_phase_state(phase, &resolver, &policy));
    Ok(ExitCode::SUCCESS)
}

/// `decide <phase.json> <go|no-go> [notes…] [--solo]` – record a gate
/// decision with a bound proof.
fn cmd_decide(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let usage = || CliError::Usage("phasegate decide <phase.json> <go|no-go> [notes…] [--solo]".into());
    let (path, rest) = args.split_first().ok_or_else(usage)?;
    let (decision, rest) = rest.split_first().ok_or_else(usage)?;
    let decision = match decision.as_str() {
        "go" => DecisionStatus::Go,
        "no-go" => DecisionStatus::NoGo,
        _ => return Err(usage()),
    };
    let solo = rest.iter().any(|a| a == "--solo");
    let notes = rest
        .iter()
        .filter(|a| a.as_str() != "--solo")
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    let file = PhaseFile::load(Path::new(path))?;
    let resolver = |p: &Phase, a: &Artifact| file.resolve(p, a);
    let ctx = context(cfg)?;
    let before = ctx.ledger.len();
    let request = GateDecisionRequest {
        actor_id: cfg.default_actor.clone(),
        decision,
        notes,
        governance_mode: Some(if solo { GovernanceMode::Solo } else { GovernanceMode::Team }),
    };

    let outcome = KernelGate::default().process_gate_decision(&request, &file.phase, &resolver, &ctx)?;
    let action = GovernanceAction::new("DECIDE_GATE", cfg.default_actor.clone());
    print_verdict(&action, outcome.result, &outcome.reason);
    if let Some(proof) = &outcome.proof {
        println!("{}", serde_json::to_string_pretty(proof)?);
    }
    persist(cfg, &outcome.ledger, before)?;
    Ok(if outcome.result == ActionResult::Ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// `amend <changes.json>` – revise the policy and write it back to the
/// configured policy file.
fn cmd_amend(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let path = args
        .first()
        .ok_or_else(|| CliError::Usage("phasegate amend <changes.json>".into()))?;
    let policy_path = cfg
        .policy_path
        .clone()
        .ok_or_else(|| CliError::Config("policy_path must be set to amend the policy".into()))?;
    let changes: serde_json::Value = store::read_json(Path::new(path))?;
    let ctx = context(cfg)?;
    let before = ctx.ledger.len();

    let outcome = KernelGate::default().process_policy_change(&cfg.default_actor, &changes, &ctx)?;
    let action = GovernanceAction::new("CHANGE_POLICY", cfg.default_actor.clone());
    print_verdict(&action, outcome.result, &outcome.reason);
    if let Some(revised) = &outcome.policy {
        let raw = serde_json::to_string_pretty(revised.policy.tree())?;
        config::write_private(&policy_path, raw.as_bytes()).map_err(CliError::Config)?;
        println!("  Policy written to {}", policy_path.display());
    }
    persist(cfg, &outcome.ledger, before)?;
    Ok(if outcome.result == ActionResult::Ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// `export [out.json]` – log the export and write the ledger out.
fn cmd_export(cfg: &Config, args: &[String]) -> Result<ExitCode, CliError> {
    let ctx = context(cfg)?;
    let before = ctx.ledger.len();
    let outcome = KernelGate::default().process_ledger_export(&cfg.default_actor, &ctx)?;
    if outcome.result != ActionResult::Ok {
        let action = GovernanceAction::new("EXPORT_LEDGER", cfg.default_actor.clone());
        print_verdict(&action, outcome.result, &outcome.reason);
        persist(cfg, &outcome.ledger, before)?;
        return Ok(ExitCode::FAILURE);
    }

    match args.first() {
        Some(out) => {
            store::save_ledger(Path::new(out), &ctx.ledger)?;
            println!("  {} {} entries exported to {}", "✓".green().bold(), ctx.ledger.len(), out);
        }
        None => println!("{}", ctx.ledger.to_json_pretty()?),
    }
    persist(cfg, &outcome.ledger, before)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_help() {
    println!();
    println!("  {} {}", "Phasegate".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Governance kernel for phase-gated projects");
    println!();
    println!("{}", "  Commands:".bold());
    for (cmd, desc) in [
        ("init <project-id> [name]", "Create the project ledger"),
        ("verify [ledger.json]", "Verify the ledger hash chain"),
        ("policy [overrides.json]", "Compile and show the effective policy"),
        ("schema", "Print the policy JSON schema"),
        ("process <actions.json>", "Run governance actions through the kernel"),
        ("queue <batch.json>", "Queue agent actions, then process them in order"),
        ("state <phase.json>", "Show artifact statuses and gate readiness"),
        ("decide <phase.json> <go|no-go> [notes] [--solo]", "Record a gate decision with proof"),
        ("amend <changes.json>", "Revise the policy"),
        ("export [out.json]", "Export the ledger"),
        ("help", "Show this message"),
    ] {
        println!("    {:<50} {}", cmd.cyan(), desc);
    }
    println!();
    println!("  Config: {}", config::config_path().display().to_string().dimmed());
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn context(cfg: &Config) -> Result<KernelContext, CliError> {
    let ledger = store::load_verified_ledger(&cfg.ledger_path)?;
    let compiled = store::load_policy(cfg.policy_path.as_deref())?;
    if !compiled.valid {
        return Err(CliError::Config(format!("invalid policy: {}", compiled.errors.join("; "))));
    }
    Ok(KernelContext::new(ledger, compiled.policy))
}

/// Save the ledger when the kernel appended to it.
fn persist(cfg: &Config, ledger: &Ledger, before: usize) -> Result<(), CliError> {
    if ledger.len() > before {
        store::save_ledger(&cfg.ledger_path, ledger)?;
        info!(appended = ledger.len() - before, path = %cfg.ledger_path.display(), "ledger saved");
    }
    Ok(())
}

fn print_verdict(action: &GovernanceAction, result: ActionResult, reason: &str) {
    let label = match result {
        ActionResult::Ok => "OK".green().bold(),
        ActionResult::PolicyBlocked => "POLICY_BLOCKED".yellow().bold(),
        ActionResult::CapabilityDenied => "CAPABILITY_DENIED".red().bold(),
    };
    println!("  {:<18} {} {} – {}", label, action.kind.bold(), action.agent_id.cyan(), reason.dimmed());
}
