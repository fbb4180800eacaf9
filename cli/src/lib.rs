//! Diagnostic and repair commands for a metaschema database.
//!
//! The binary is a thin wrapper: it parses [`Cli`], installs logging and
//! prints what [`run`] returns. Keeping the commands here lets them be
//! exercised against temporary databases in tests.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use metaschema_engine::{AuditMode, AuditReport, EngineConfig, MigrationPlan, SchemaEngine};
use metaschema_model::{EntityDefinition, MigrationRecord};
use metaschema_types::EntityDefId;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "metaschema")]
#[command(about = "Inspect and repair metaschema entity tables")]
pub struct Cli {
    /// Path to the metaschema database
    #[arg(short, long, env = "METASCHEMA_DATABASE")]
    pub database: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare metadata, ledger and live tables
    Audit {
        /// Persist corrected table names instead of only reporting them
        #[arg(long)]
        apply: bool,

        /// Limit the audit to one entity (id or name)
        #[arg(short, long)]
        entity: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the physical table an entity resolves to
    Resolve { entity: String },
    /// Show the pending migration for an entity without applying it
    Plan {
        entity: String,

        #[arg(long)]
        json: bool,
    },
    /// Apply the pending migration for a published entity
    Migrate {
        entity: String,

        /// Commit message stored with the ledger record
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List an entity's migration ledger, oldest first
    Ledger {
        entity: String,

        #[arg(long)]
        json: bool,
    },
}

/// Text to print plus whether the command found the database healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub text: String,
    pub success: bool,
}

impl Output {
    fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }
}

pub fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

pub fn run(cli: &Cli) -> Result<Output> {
    let config = load_config(cli.config.as_ref())?;
    if !cli.database.exists() {
        bail!("database {} does not exist", cli.database.display());
    }
    let engine = SchemaEngine::open(&cli.database, config)
        .with_context(|| format!("failed to open {}", cli.database.display()))?;
    debug!(database = %cli.database.display(), "engine opened");

    match &cli.command {
        Command::Audit {
            apply,
            entity,
            json,
        } => {
            let only = entity
                .as_deref()
                .map(|e| find_entity(&engine, e).map(|e| e.id))
                .transpose()?;
            let mode = if *apply { AuditMode::Apply } else { AuditMode::DryRun };
            let report = engine.audit(mode, only)?;
            info!(
                problems = report.problem_count(),
                repaired = report.repaired_count(),
                "audit complete"
            );
            let text = if *json {
                serde_json::to_string_pretty(&report)?
            } else {
                render_audit(&report)
            };
            Ok(Output {
                text,
                success: audit_succeeded(&report),
            })
        }
        Command::Resolve { entity } => {
            let entity = find_entity(&engine, entity)?;
            let resolved = engine.resolve_table(entity.id)?;
            Ok(Output::ok(resolved.to_string()))
        }
        Command::Plan { entity, json } => {
            let entity = find_entity(&engine, entity)?;
            let plan = engine.plan_migration(entity.id)?;
            let text = if *json {
                serde_json::to_string_pretty(&plan)?
            } else {
                render_plan(&entity, &plan)
            };
            Ok(Output::ok(text))
        }
        Command::Migrate { entity, message } => {
            let entity = find_entity(&engine, entity)?;
            let text = match engine.migrate(entity.id, message.as_deref())? {
                Some(record) => format!(
                    "applied {} ({} ops) to {}",
                    record.id,
                    record.upgrade.len(),
                    entity.name
                ),
                None => format!("{} is up to date", entity.name),
            };
            Ok(Output::ok(text))
        }
        Command::Ledger { entity, json } => {
            let entity = find_entity(&engine, entity)?;
            let records = engine.ledger(entity.id)?;
            let text = if *json {
                serde_json::to_string_pretty(&records)?
            } else {
                render_ledger(&records)
            };
            Ok(Output::ok(text))
        }
    }
}

/// Looks an entity up by id, falling back to its name.
pub fn find_entity(engine: &SchemaEngine, key: &str) -> Result<EntityDefinition> {
    if let Ok(id) = EntityDefId::parse(key) {
        return engine
            .entity(id)
            .with_context(|| format!("no entity with id {id}"));
    }
    let mut matches: Vec<EntityDefinition> = engine
        .store()
        .entities(false)?
        .into_iter()
        .filter(|e| e.name == key)
        .collect();
    match matches.len() {
        0 => bail!("no entity named '{key}'"),
        1 => Ok(matches.remove(0)),
        n => bail!("{n} entities are named '{key}'; use the id instead"),
    }
}

/// A dry run succeeds only when nothing is wrong; an applied run succeeds
/// when every remaining problem was repaired.
fn audit_succeeded(report: &AuditReport) -> bool {
    match report.mode {
        AuditMode::DryRun => report.is_clean(),
        AuditMode::Apply => report
            .entries
            .iter()
            .all(|e| e.is_clean() || (e.repaired && e.problems.len() == 1)),
    }
}

pub fn render_audit(report: &AuditReport) -> String {
    let mut out = String::new();
    for entry in &report.entries {
        let resolved = entry
            .resolved_table
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".into());
        let _ = writeln!(
            out,
            "{} [{}] {} -> {}",
            entry.entity_name, entry.status, entry.stored_table, resolved
        );
        for problem in &entry.problems {
            let _ = writeln!(out, "  - {problem}");
        }
        if entry.repaired {
            let _ = writeln!(out, "  repaired: table name updated");
        }
    }
    let _ = write!(
        out,
        "{} entities, {} problems, {} repaired",
        report.entries.len(),
        report.problem_count(),
        report.repaired_count()
    );
    out
}

pub fn render_plan(entity: &EntityDefinition, plan: &MigrationPlan) -> String {
    if plan.is_empty() {
        return format!("{}: no changes", entity.name);
    }
    let mut out = format!(
        "{}: {} ops against {}.{}\n",
        entity.name,
        plan.steps.len(),
        plan.to.schema,
        plan.to.table
    );
    for column in &plan.adopted {
        let _ = writeln!(out, "  adopt {column}");
    }
    for step in &plan.steps {
        let _ = writeln!(out, "  {}", step.op);
    }
    out.pop();
    out
}

pub fn render_ledger(records: &[MigrationRecord]) -> String {
    if records.is_empty() {
        return "no migrations".into();
    }
    records
        .iter()
        .map(|r| {
            let mut line = format!("{} {:<6} {} ops", r.id, r.kind.as_str(), r.upgrade.len());
            if let Some(message) = &r.commit_message {
                line.push_str(&format!("  {message}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
