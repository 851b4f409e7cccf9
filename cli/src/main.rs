use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mobmap_core::config::MobmapConfig;
use mobmap_core::control_points::{self, LabeledPoint};
use mobmap_core::database::Database;
use mobmap_core::feed::{into_records, load_feed};
use mobmap_core::file_utils::write_timestamped;
use mobmap_core::models::{MobRecord, Visibility};
use mobmap_core::report::{TriangulationReport, render_import_report, stale_map_positions};
use mobmap_core::{MobmapError, estimate};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(
    name = "mobmap",
    version = "0.1.0",
    about = "Maintenance toolkit for the named mob map",
    long_about = None
)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true, env = "MOBMAP_DATABASE")]
    database: Option<PathBuf>,

    /// Path to log file
    #[arg(long, global = true, default_value = "/tmp/mobmap.log")]
    log_file: PathBuf,

    /// Path to TOML configuration file
    #[arg(long, global = true, env = "MOBMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (repeat for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge an already-fetched codex feed into the store
    Import {
        /// Feed JSON file
        #[arg(long)]
        feed: PathBuf,
        /// Roll back instead of committing
        #[arg(long)]
        dry_run: bool,
        /// Let the feed overwrite this owned field (repeatable)
        #[arg(long = "release-field")]
        release_field: Vec<String>,
        /// Directory for the saved report (defaults to the configured one)
        #[arg(long)]
        report_dir: Option<PathBuf>,
        /// Quiet mode (0=show messages/warnings, 1=suppress messages, 2=suppress both)
        #[arg(long, default_value_t = 0)]
        quiet: u8,
    },

    /// Fit a transform from control points and place mobs on the map
    Triangulate {
        /// CSV file with label,lat,lng columns (defaults to REF markers)
        #[arg(long)]
        control_points: Option<PathBuf>,
        /// Recompute coordinates that came from an earlier fit
        #[arg(long)]
        overwrite_derived: bool,
        /// Roll back instead of committing
        #[arg(long)]
        dry_run: bool,
        /// Write a JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
        /// Quiet mode
        #[arg(long, default_value_t = 0)]
        quiet: u8,
    },

    /// Set a mob's map coordinates by hand
    Place {
        /// Mob id or name
        target: String,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lng: f64,
    },

    /// Show or change which mobs are drawn on the map
    Visibility {
        #[command(subcommand)]
        action: VisibilityAction,
    },

    /// Recompute special drop categories from item rarities
    Recategorize {
        /// Roll back instead of committing
        #[arg(long)]
        dry_run: bool,
        /// Quiet mode
        #[arg(long, default_value_t = 0)]
        quiet: u8,
    },

    /// Show store counts
    Status,
}

#[derive(Subcommand)]
enum VisibilityAction {
    /// List mobs with their item counts
    List {
        #[arg(long)]
        include_hidden: bool,
    },
    /// Hide one mob (id or name)
    Hide { target: String },
    /// Show one mob (id or name)
    Show { target: String },
    /// Hide every mob without special drops
    HideNoItems,
    /// Show every hidden mob that has special drops
    ShowWithItems,
}

fn setup_logging(verbose: u8, log_file: &std::path::Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter_level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(filter_level.into());

    let file_appender = tracing_appender::rolling::never(
        log_file.parent().unwrap_or(std::path::Path::new(".")),
        log_file.file_name().unwrap_or(std::ffi::OsStr::new("mobmap.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().with_writer(std::io::stderr).with_ansi(true))
        .with(fmt::Layer::new().with_writer(non_blocking).with_ansi(false));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = setup_logging(cli.verbose, &cli.log_file)?;

    let config = MobmapConfig::load(cli.config.as_deref())
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;
    let db_path = cli.database.unwrap_or_else(|| PathBuf::from("./mobmap.sqlite"));
    let db = Database::new(&db_path).with_context(|| format!("Failed to open database {:?}", db_path))?;

    match cli.command {
        Commands::Import { feed, dry_run, release_field, report_dir, quiet } => {
            let mut owned = config.owned_fields_for::<MobRecord>()?;
            for field in &release_field {
                if !owned.contains(field) {
                    anyhow::bail!("'{}' is not an owned field (owned: {:?})", field, owned.iter().collect::<Vec<_>>());
                }
                if quiet < 2 {
                    warn!("Releasing owned field '{}': feed values will overwrite local ones", field);
                }
                owned = owned.without(field);
            }

            let records = into_records(load_feed(&feed)?, &config.classification);
            if quiet == 0 {
                info!("Loaded {} mobs from {:?}", records.len(), feed);
            }

            let report = db.import_mobs(records.clone(), &owned, dry_run)?;
            if quiet < 2 {
                for name in &report.duplicate_incoming {
                    warn!("Feed lists {} more than once; later entry won", name);
                }
            }

            let stale = stale_map_positions(&report, &db.load_mobs()?);
            if quiet < 2 {
                for name in &stale {
                    warn!("{} moved in the feed but keeps its fitted map position", name);
                }
            }

            let now = chrono::Local::now();
            let text = render_import_report(&report, &records, &stale, now);
            println!("{}", text);

            if !dry_run {
                let dir = report_dir.unwrap_or_else(|| config.import.report_dir.clone());
                let path = write_timestamped(&dir, "codex_import", "txt", &text, now)?;
                if quiet == 0 {
                    info!("Report saved to {:?}", path);
                }
            }

            if quiet == 0 {
                info!(
                    "Import {}: {} added, {} field changes, {} missing upstream",
                    if dry_run { "dry run" } else { "committed" },
                    report.added.len(),
                    report.change_count(),
                    report.missing_upstream.len()
                );
            }
        }
        Commands::Triangulate { control_points: csv_path, overwrite_derived, dry_run, report, quiet } => {
            let settings = &config.triangulation;
            let labels: Vec<LabeledPoint> = match &csv_path {
                Some(path) => control_points::load_csv(path)?,
                None => db.reference_markers(&settings.reference_tag)?,
            };
            if quiet == 0 {
                info!("Found {} control point candidates", labels.len());
            }

            let mobs = db.load_mobs()?;
            let resolution = control_points::resolve(&labels, &mobs, settings);
            let points = resolution.points();

            let fit = match estimate(&points) {
                Ok(fit) => fit,
                Err(MobmapError::InsufficientPoints { found, required }) => {
                    anyhow::bail!(
                        "Only {} of {} control points resolved to mobs, need at least {}",
                        found,
                        labels.len(),
                        required
                    );
                }
                Err(e) => return Err(e.into()),
            };

            if quiet == 0 {
                info!("Fit: {:?}", fit.transform);
                for (resolved, residual) in resolution.resolved.iter().zip(fit.residuals(&points)) {
                    info!(
                        "  {}: expected ({:.3}, {:.3}) predicted ({:.3}, {:.3}) error {:.3}",
                        resolved.mob_name,
                        residual.expected.0,
                        residual.expected.1,
                        residual.predicted.0,
                        residual.predicted.1,
                        residual.error
                    );
                }
                info!("RMS residual {:.4}, mean error {:.4}", fit.rmse, fit.mean_error(&points));
            }
            if fit.rmse > settings.warn_rmse && quiet < 2 {
                warn!(
                    "RMS residual {:.4} exceeds {:.4}; check the control points before trusting this fit",
                    fit.rmse, settings.warn_rmse
                );
            }

            let plan = db.apply_fit(&fit, overwrite_derived, dry_run)?;
            if quiet < 2 && !plan.unprojectable.is_empty() {
                warn!("{} mobs have no game coordinates: {}", plan.unprojectable.len(), plan.unprojectable.join(", "));
            }
            if quiet == 0 {
                info!(
                    "{} {} mobs, kept {} existing positions",
                    if dry_run { "Would place" } else { "Placed" },
                    plan.updates.len(),
                    plan.kept.len()
                );
            }

            if let Some(path) = report {
                let skipped: Vec<String> = resolution.skipped.iter().map(|e| e.to_string()).collect();
                let report = TriangulationReport::new(&fit, &resolution.resolved, &skipped, &plan, dry_run, chrono::Local::now());
                std::fs::write(&path, report.to_json()?)
                    .with_context(|| format!("Failed to write report {:?}", path))?;
                if quiet == 0 {
                    info!("Report saved to {:?}", path);
                }
            }
        }
        Commands::Place { target, lat, lng } => {
            let name = db.set_manual_coords(&target, lat, lng)?;
            info!("Placed {} at ({}, {})", name, lat, lng);
        }
        Commands::Visibility { action } => match action {
            VisibilityAction::List { include_hidden } => {
                let rows = db.list_visibility(include_hidden)?;
                println!("{:<5} {:<40} {:>5} {:>6} {}", "ID", "NAME", "LEVEL", "ITEMS", "STATE");
                for row in &rows {
                    let level = row.level.map(|l| l.to_string()).unwrap_or_default();
                    println!("{:<5} {:<40} {:>5} {:>6} {}", row.id, row.name, level, row.item_count, row.visibility);
                }
                println!("{} mobs", rows.len());
            }
            VisibilityAction::Hide { target } => {
                let name = db.set_visibility(&target, Visibility::Hidden)?;
                info!("Hidden {}", name);
            }
            VisibilityAction::Show { target } => {
                let name = db.set_visibility(&target, Visibility::Visible)?;
                info!("Shown {}", name);
            }
            VisibilityAction::HideNoItems => {
                let count = db.hide_mobs_without_items()?;
                info!("Hidden {} mobs without special drops", count);
            }
            VisibilityAction::ShowWithItems => {
                let count = db.show_mobs_with_items()?;
                info!("Shown {} mobs with special drops", count);
            }
        },
        Commands::Recategorize { dry_run, quiet } => {
            let changes = db.recategorize(&config.grading, dry_run)?;
            if quiet == 0 {
                for change in &changes {
                    info!(
                        "  {} (level {}): {} -> {}",
                        change.name,
                        change.level.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string()),
                        change.old.as_deref().unwrap_or("(none)"),
                        change.new
                    );
                }
                info!("{} categories {}", changes.len(), if dry_run { "would change" } else { "changed" });
            }

            for (category, count) in db.category_distribution()? {
                println!("{:<20} {}", category, count);
            }
        }
        Commands::Status => {
            let summary = db.summary()?;
            println!("Database:        {}", db_path.display());
            println!("Mobs:            {}", summary.mobs);
            println!("With items:      {}", summary.with_items);
            println!("With map coords: {}", summary.with_map_coords);
            println!("Hidden:          {}", summary.hidden);
        }
    }

    Ok(())
}
