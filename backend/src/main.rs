//! Rosterload CLI - preview and import vendor CSV uploads
//!
//! # Commands
//!
//! ```bash
//! rosterload preview team.csv --entity team-member --scope vendor-42
//! rosterload import team.csv --entity team-member --scope vendor-42 --update-existing
//! rosterload import hours.csv --entity timesheet --scope vendor-42 \
//!     --period-start 2025-03-01 --period-end 2025-03-31
//! rosterload template timesheet > hours.csv
//! rosterload serve --port 3000
//! ```
//!
//! Records are kept in `ROSTERLOAD_STORE_DIR` (default `.rosterload/store`),
//! so importing the same file twice creates nothing the second time.

use clap::{Args, Parser, Subcommand};
use rosterload::api::AppState;
use rosterload::{
    confirm, preview, AppConfig, CommitSelection, EntityKind, EntitySchema, ImportContext,
    ImportPreview, ImportRowStatus, JsonFileStore, MatchStrategy, PipelineOptions,
    ReportingPeriod,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rosterload")]
#[command(about = "Two-phase CSV import of vendor team members and timesheets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a file and show what an import would do (no writes)
    Preview {
        #[command(flatten)]
        upload: UploadArgs,

        /// Write the full preview JSON to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Preview, then commit the eligible rows
    Import {
        #[command(flatten)]
        upload: UploadArgs,

        /// Also write rows flagged as duplicates
        #[arg(long)]
        include_duplicates: bool,

        /// With --include-duplicates, overwrite the matched records
        #[arg(long, requires = "include_duplicates")]
        update_existing: bool,

        /// Only commit these row numbers (e.g. 2,3,7)
        #[arg(long, value_delimiter = ',')]
        rows: Vec<usize>,
    },

    /// Print the header-only CSV template of an entity
    Template {
        /// team-member or timesheet
        entity: EntityKind,

        /// Custom entity schema (JSON)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on (overrides ROSTERLOAD_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Store directory (overrides ROSTERLOAD_STORE_DIR)
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Duplicate matching strategy: exact, name or fuzzy
        #[arg(long = "match")]
        match_strategy: Option<MatchStrategy>,

        /// Custom entity schema files (JSON), one per entity
        #[arg(long)]
        schema: Vec<PathBuf>,
    },
}

/// Arguments shared by `preview` and `import`.
#[derive(Args)]
struct UploadArgs {
    /// Input CSV file
    input: PathBuf,

    /// team-member or timesheet
    #[arg(short, long)]
    entity: EntityKind,

    /// Parent the records belong to (e.g. vendor id)
    #[arg(short, long)]
    scope: String,

    /// First day of the reporting period (YYYY-MM-DD or DD/MM/YYYY)
    #[arg(long, requires = "period_end")]
    period_start: Option<String>,

    /// Last day of the reporting period
    #[arg(long, requires = "period_start")]
    period_end: Option<String>,

    /// Custom entity schema (JSON)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Duplicate matching strategy: exact, name or fuzzy
    #[arg(long = "match")]
    match_strategy: Option<MatchStrategy>,

    /// Store directory (overrides ROSTERLOAD_STORE_DIR)
    #[arg(long)]
    store_dir: Option<PathBuf>,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let cli = Cli::parse();

    let result = match AppConfig::from_env() {
        Err(e) => Err(e.into()),
        Ok(config) => match cli.command {
            Commands::Preview { upload, output } => cmd_preview(&config, &upload, output.as_deref()),
            Commands::Import {
                upload,
                include_duplicates,
                update_existing,
                rows,
            } => {
                let selection = CommitSelection {
                    skip_duplicates: !include_duplicates,
                    update_existing,
                    row_numbers: (!rows.is_empty()).then_some(rows),
                };
                cmd_import(&config, &upload, &selection)
            }
            Commands::Template {
                entity,
                schema,
                output,
            } => cmd_template(entity, schema.as_deref(), output.as_deref()),
            Commands::Serve {
                port,
                store_dir,
                match_strategy,
                schema,
            } => {
                let mut config = config;
                config.port = port.unwrap_or(config.port);
                config.store_dir = store_dir.unwrap_or(config.store_dir);
                config.match_strategy = match_strategy.unwrap_or(config.match_strategy);
                cmd_serve(config, &schema).await
            }
        },
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Everything `preview` and `import` share once arguments are resolved.
struct Prepared {
    file_name: String,
    bytes: Vec<u8>,
    context: ImportContext,
    schema: EntitySchema,
    options: PipelineOptions,
    store: JsonFileStore,
}

fn prepare(config: &AppConfig, args: &UploadArgs) -> CliResult<Prepared> {
    let bytes = fs::read(&args.input)
        .map_err(|e| format!("Cannot read '{}': {}", args.input.display(), e))?;
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.display().to_string());

    let schema = load_schema(args.entity, args.schema.as_deref())?;

    let mut context = ImportContext::new(args.entity, args.scope.clone());
    if let (Some(start), Some(end)) = (&args.period_start, &args.period_end) {
        let start = rosterload::parse_date(start).map_err(|e| format!("--period-start: {}", e))?;
        let end = rosterload::parse_date(end).map_err(|e| format!("--period-end: {}", e))?;
        context = context.with_period(ReportingPeriod::new(start, end)?);
    }

    let options = PipelineOptions {
        match_strategy: args.match_strategy.unwrap_or(config.match_strategy),
    };
    let store = JsonFileStore::open(args.store_dir.as_deref().unwrap_or(config.store_dir.as_path()))?;

    Ok(Prepared {
        file_name,
        bytes,
        context,
        schema,
        options,
        store,
    })
}

fn cmd_preview(config: &AppConfig, args: &UploadArgs, output: Option<&Path>) -> CliResult<()> {
    let p = prepare(config, args)?;
    let outcome = preview(&p.file_name, &p.bytes, &p.context, &p.schema, &p.store, &p.options)?;

    print_preview(&outcome.preview);

    if let Some(path) = output {
        write_output(&serde_json::to_string_pretty(&outcome.preview)?, Some(path))?;
    }
    if outcome.preview.is_blocked() {
        return Err("fix the header row and upload again".into());
    }
    Ok(())
}

fn cmd_import(config: &AppConfig, args: &UploadArgs, selection: &CommitSelection) -> CliResult<()> {
    let mut p = prepare(config, args)?;
    let outcome = preview(&p.file_name, &p.bytes, &p.context, &p.schema, &p.store, &p.options)?;

    print_preview(&outcome.preview);
    if outcome.preview.is_blocked() {
        return Err("fix the header row and upload again".into());
    }
    if outcome.preview.importable_count() == 0 {
        return Err("nothing to import: no valid or warning rows".into());
    }

    let result = confirm(
        &p.file_name,
        &outcome.file,
        selection,
        &p.context,
        &p.schema,
        &mut p.store,
        &p.options,
    )?;

    eprintln!();
    eprintln!("📊 RESULT");
    eprintln!("   Created:  {}", result.created);
    eprintln!("   Updated:  {}", result.updated);
    eprintln!("   Skipped:  {}", result.skipped);
    eprintln!("   Failed:   {}", result.failed);
    for failure in &result.errors {
        eprintln!("   ❌ Row {}: {}", failure.row_number, failure.error);
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        return Err(format!("{} rows failed", result.failed).into());
    }
    Ok(())
}

fn cmd_template(entity: EntityKind, schema: Option<&Path>, output: Option<&Path>) -> CliResult<()> {
    let schema = load_schema(entity, schema)?;
    let csv = schema.template_csv();
    write_output(csv.trim_end_matches('\n'), output)
}

async fn cmd_serve(config: AppConfig, schemas: &[PathBuf]) -> CliResult<()> {
    let store = JsonFileStore::open(&config.store_dir)?;
    log::info!("Loaded {} records from {}", store.len(), store.dir().display());

    let mut state = AppState::new(
        Box::new(store),
        PipelineOptions {
            match_strategy: config.match_strategy,
        },
    )
    .with_session_ttl(Duration::from_secs(config.session_ttl_secs));
    for path in schemas {
        let schema = EntitySchema::from_file(path)?;
        log::info!("Using custom {} schema from {}", schema.entity, path.display());
        state = state.with_schema(schema);
    }

    rosterload::server::start_server(&config, state).await
}

fn load_schema(entity: EntityKind, path: Option<&Path>) -> CliResult<EntitySchema> {
    let Some(path) = path else {
        return Ok(EntitySchema::builtin(entity));
    };
    let schema = EntitySchema::from_file(path)?;
    if schema.entity != entity {
        return Err(format!(
            "schema '{}' describes {}, not {}",
            path.display(),
            schema.entity,
            entity
        )
        .into());
    }
    Ok(schema)
}

fn print_preview(preview: &ImportPreview) {
    eprintln!();
    eprintln!("📋 PREVIEW: {}", preview.file_name);
    for entry in &preview.header_mappings.entries {
        let marker = if !entry.recognized {
            "ignored"
        } else if entry.is_unchanged() {
            "="
        } else {
            "→"
        };
        eprintln!("   {:<24} {} {}", entry.original, marker, if entry.recognized { entry.mapped.as_str() } else { "" });
    }

    if preview.is_blocked() {
        eprintln!("   ❌ Missing required columns: {}", preview.missing_required_headers.join(", "));
        return;
    }

    let stats = &preview.stats;
    eprintln!(
        "   Total {} | valid {} | warnings {} | invalid {} | duplicates {}",
        stats.total, stats.valid, stats.warnings, stats.invalid, stats.duplicates
    );

    for row in preview.rows.iter().filter(|r| r.status != ImportRowStatus::Valid) {
        let issues: Vec<String> = row
            .errors
            .iter()
            .chain(&row.warnings)
            .map(|i| format!("{}: {}", i.field, i.message))
            .collect();
        let duplicate = row.duplicate_info.as_ref().map(|d| match d.matched_row_number {
            Some(first) => format!("duplicate of row {}", first),
            None => format!(
                "already exists{}",
                d.matched_email.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default()
            ),
        });
        let detail: Vec<String> = issues.into_iter().chain(duplicate).collect();
        eprintln!("   Row {:>4} [{}] {}", row.row_number, row.status.as_str(), detail.join("; "));
    }
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult<()> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
