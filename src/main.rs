//! opengov-scout — CLI entrypoint.
//! Discovers projects, grants, and datasets from public open-data APIs,
//! merges them into the local store, and reports on stored state.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use opengov_scout::connectors::default_connectors;
use opengov_scout::enrich::build_enrichment_client;
use opengov_scout::pipeline::{load_status, DiscoveryEngine};
use opengov_scout::presets::PresetBook;
use opengov_scout::score::KeywordScorer;
use opengov_scout::store::{get_json, JsonFileStore, KEY_GRANTS, KEY_PROJECTS};
use opengov_scout::{GrantRecord, ProjectRecord};

#[derive(Debug, Parser)]
#[command(name = "opengov-scout")]
#[command(about = "Discover public-sector projects and grant opportunities")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show last run, stored record counts, and recent jobs.
    Status,
    /// Run discovery for a named preset.
    Discover {
        /// Preset name; see `presets`.
        preset: String,
        /// Skip the enrichment stage.
        #[arg(long = "no-ai")]
        no_ai: bool,
    },
    /// Print stored records.
    List {
        collection: Collection,
    },
    /// List available presets.
    Presets,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Collection {
    Projects,
    Grants,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("opengov_scout=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op elsewhere.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let store = Arc::new(JsonFileStore::from_env());

    match cli.command {
        Commands::Status => {
            let report = load_status(store.as_ref()).await?;
            println!(
                "Last run:  {}",
                report.last_run.as_deref().unwrap_or("never")
            );
            println!("Projects:  {} stored", report.project_count);
            println!("Grants:    {} stored", report.grant_count);
            if report.jobs.is_empty() {
                println!("Jobs:      none recorded");
            } else {
                println!("Recent jobs:");
                for job in report.jobs.iter().take(5) {
                    let duration = job
                        .duration_secs()
                        .map(|s| format!(" ({s}s)"))
                        .unwrap_or_default();
                    println!(
                        "  {}  {:9}  preset={} found={} imported={} errors={}{}",
                        job.id,
                        job.status.as_str(),
                        job.source,
                        job.records_found,
                        job.records_imported,
                        job.errors.len(),
                        duration
                    );
                }
            }
        }
        Commands::Discover { preset, no_ai } => {
            let book = PresetBook::load_default();
            let selected = book
                .get(&preset)
                .with_context(|| {
                    format!("unknown preset '{preset}' (run `opengov-scout presets`)")
                })?
                .clone();

            let scorer = KeywordScorer::load_default();
            let engine = DiscoveryEngine::new(
                default_connectors(&scorer),
                store,
                build_enrichment_client(),
            );
            let summary = engine.run(&preset, &selected, !no_ai).await?;

            println!("Discovery complete for preset '{preset}'");
            println!("  found:    {} records", summary.job.records_found);
            println!(
                "  imported: {} (projects +{}/~{}, grants +{}/~{})",
                summary.job.records_imported,
                summary.projects.inserted,
                summary.projects.replaced,
                summary.grants.inserted,
                summary.grants.replaced
            );
            if summary.projects.evicted + summary.grants.evicted > 0 {
                println!(
                    "  evicted:  {} projects, {} grants",
                    summary.projects.evicted, summary.grants.evicted
                );
            }
            if !no_ai {
                println!(
                    "  enriched: {} grants, {} projects",
                    summary.enriched_grants, summary.enriched_projects
                );
            }
            if !summary.job.errors.is_empty() {
                println!("  errors:");
                for err in &summary.job.errors {
                    println!("    - {err}");
                }
            }
        }
        Commands::List { collection } => match collection {
            Collection::Projects => {
                let projects: Vec<ProjectRecord> = get_json(store.as_ref(), KEY_PROJECTS)
                    .await
                    .context("read stored projects")?
                    .unwrap_or_default();
                println!("{} project records", projects.len());
                for p in &projects {
                    let score = p
                        .priority_score
                        .map(|s| format!("{s:>3.0}"))
                        .unwrap_or_else(|| " --".to_string());
                    println!("  [{score}] {}  {} ({})", p.id, p.title, p.sector);
                }
            }
            Collection::Grants => {
                let grants: Vec<GrantRecord> = get_json(store.as_ref(), KEY_GRANTS)
                    .await
                    .context("read stored grants")?
                    .unwrap_or_default();
                println!("{} grant records", grants.len());
                for g in &grants {
                    let close = g
                        .close_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "open".to_string());
                    println!("  [{close}] {}  {}  ({})", g.id, g.title, g.agency);
                }
            }
        },
        Commands::Presets => {
            let book = PresetBook::load_default();
            println!("Available presets:");
            for (name, preset) in book.iter() {
                println!(
                    "  {name:<12} threshold {:.2}  keywords: {}",
                    preset.relevance_threshold,
                    preset.keywords.join(", ")
                );
            }
        }
    }

    Ok(())
}
