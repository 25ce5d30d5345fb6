use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use gitsnow_catalog::{capture_snapshot, CatalogConnector, MockConnector, SnowflakeConnectorBuilder};
use gitsnow_core::{Config, ObjectName, Report, Severity};
use gitsnow_engine::{export_snapshot, plan_deployment, DeploymentPlan, FilterPredicate, TraceBuilder, TraceRequest};
use gitsnow_graph::{dependency_ordered_objects, display_path, schedule, DependencyListing, GraphBuilder};
use gitsnow_sql::{SqlFormatter, SqlLineageAdapter};

/// gitsnow - Snowflake schema as code
#[derive(Parser)]
#[command(name = "gitsnow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scripts directory (<schema>/<kind>/<name>.sql)
    #[arg(short, long, global = true, default_value = "scripts")]
    scripts_dir: PathBuf,

    /// Path to config file (default: gitsnow.toml next to the scripts directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every object of a live database into the scripts directory
    DbToFolder {
        /// Database to export
        #[arg(long, env = "SNOWFLAKE_DATABASE")]
        db_name: Option<String>,

        /// Only export these schemas (repeatable)
        #[arg(long = "schema")]
        schemas: Vec<String>,

        /// Use the built-in mock database instead of a live connection
        #[arg(long)]
        test: bool,
    },

    /// Diff the scripts directory against a live database and write deployment scripts
    FolderToScript {
        /// Database to compare against
        #[arg(long, env = "SNOWFLAKE_DATABASE")]
        db_name: Option<String>,

        /// Prefix of the written <prefix>.up.sql, .down.sql and .base.sql
        #[arg(short, long, default_value = "deploy")]
        output_file_prefix: PathBuf,

        /// Also write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Use the built-in mock database instead of a live connection
        #[arg(long)]
        test: bool,
    },

    /// List every scripted object with its dependencies, in deploy order
    ShowDependencies {
        /// Comma-separated name prefixes hidden from the unreferenced list
        #[arg(long)]
        ignore_prefixes: Option<String>,

        /// Print names in upper case
        #[arg(long)]
        upper_case: bool,
    },

    /// Build a chained query that traces a column back to its sources
    Trace {
        /// Table holding the traced column (SCHEMA.TABLE)
        #[arg(long)]
        table: String,

        /// Column to trace
        #[arg(long)]
        column: String,

        /// Row filter on the traced table, COL=VALUE (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Maximum hops to follow (default from [trace] max_depth)
        #[arg(long)]
        max_depth: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(config_path) => Config::from_file(config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?,
        None => Config::discover(&cli.scripts_dir).context("Failed to load gitsnow.toml")?,
    };

    if cli.verbose {
        eprintln!("{} dialect: {:?}", "Using".cyan(), config.dialect);
    }

    match cli.command {
        Commands::DbToFolder { db_name, schemas, test } => {
            db_to_folder_command(&config, &cli.scripts_dir, db_name, &schemas, test, cli.verbose).await
        }
        Commands::FolderToScript {
            db_name,
            output_file_prefix,
            report,
            test,
        } => {
            folder_to_script_command(
                &config,
                &cli.scripts_dir,
                db_name,
                &output_file_prefix,
                report.as_deref(),
                test,
                cli.verbose,
            )
            .await
        }
        Commands::ShowDependencies {
            ignore_prefixes,
            upper_case,
        } => show_dependencies_command(&config, &cli.scripts_dir, ignore_prefixes.as_deref(), upper_case),
        Commands::Trace {
            table,
            column,
            filters,
            max_depth,
        } => trace_command(&config, &cli.scripts_dir, &table, &column, &filters, max_depth),
    }
}

/// Log to stderr; `RUST_LOG` overrides the level picked from `--verbose`
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Pick the database to work on; `--test` falls back to the mock database
fn resolve_database(db_name: Option<String>, test: bool) -> Result<String> {
    match db_name {
        Some(name) => Ok(name),
        None if test => Ok("MOCK_DB".to_string()),
        None => Err(anyhow::anyhow!(
            "No database given. Pass --db-name or set SNOWFLAKE_DATABASE."
        )),
    }
}

/// Connector for `[connection]`, or the mock database under `--test`
fn connector_for(config: &Config, test: bool, verbose: bool) -> Result<Box<dyn CatalogConnector>> {
    let connection = config.connection.clone().unwrap_or_default();
    let use_mock = test || connection.warehouse_type.eq_ignore_ascii_case("mock");

    if use_mock {
        if verbose {
            eprintln!("{}", "Using the built-in mock database".yellow());
        }
        return Ok(Box::new(MockConnector::demo()));
    }

    match connection.warehouse_type.to_lowercase().as_str() {
        "snowflake" => {
            let builder = SnowflakeConnectorBuilder::from_settings(&connection.settings)
                .context("Invalid Snowflake connection settings")?;
            if verbose {
                eprintln!("{} {}...", "Connecting to Snowflake account".cyan(), builder.account());
            }
            Ok(Box::new(builder.build().context("Failed to create Snowflake connector")?))
        }
        other => Err(anyhow::anyhow!(
            "Unsupported connection type '{}'. Supported: snowflake, mock",
            other
        )),
    }
}

/// db-to-folder - write every live object's formatted DDL under the scripts directory
async fn db_to_folder_command(
    config: &Config,
    scripts_dir: &Path,
    db_name: Option<String>,
    schemas: &[String],
    test: bool,
    verbose: bool,
) -> Result<()> {
    let database = resolve_database(db_name, test)?;
    let connector = connector_for(config, test, verbose)?;

    eprintln!(
        "Exporting objects from database '{}' to '{}'...",
        database,
        scripts_dir.display()
    );

    let schema_filter = if schemas.is_empty() { None } else { Some(schemas) };
    let capture = capture_snapshot(
        connector.as_ref(),
        &database,
        schema_filter,
        &config.catalog,
        &config.dialect,
    )
    .await
    .with_context(|| format!("Failed to read database '{}'", database))?;

    let formatter = SqlFormatter::new(&config.dialect, &config.format);
    let export = export_snapshot(&capture.snapshot, scripts_dir, &formatter)?;

    for file in &export.written {
        println!("  - Wrote {}", display_path(scripts_dir, &file.path));
    }

    if verbose {
        let mut report = Report::from_diagnostics(capture.diagnostics);
        report.extend(export.diagnostics);
        print_diagnostics(&report);
    }

    eprintln!("{}", "Export complete.".green());
    Ok(())
}

/// folder-to-script - diff the scripts directory against the database and write scripts
async fn folder_to_script_command(
    config: &Config,
    scripts_dir: &Path,
    db_name: Option<String>,
    output_file_prefix: &Path,
    report_path: Option<&Path>,
    test: bool,
    verbose: bool,
) -> Result<()> {
    let database = resolve_database(db_name, test)?;
    let connector = connector_for(config, test, verbose)?;

    if verbose {
        eprintln!("{} {}...", "Scanning".cyan(), scripts_dir.display());
    }

    let plan = plan_deployment(connector.as_ref(), scripts_dir, &database, config)
        .await
        .with_context(|| format!("Failed to plan deployment against '{}'", database))?;

    println!("Found {} folder objects.", plan.folder_objects());
    println!("Found {} database objects.", plan.snapshot.len());

    for change in &plan.diff.changes {
        println!(
            "  - Change detected ({}): {}",
            change.describe(),
            display_path(scripts_dir, &change.path)
        );
    }

    let report = plan.report();
    if verbose {
        print_diagnostics(&report);
    }
    if let Some(path) = report_path {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        if verbose {
            eprintln!("{} {}", "Report saved to:".green(), path.display());
        }
    }

    if !plan.has_changes() {
        println!("{}", "No changes detected. Database is in sync with scripts.".green());
        return Ok(());
    }

    println!("\nFound {} changed objects to deploy.", plan.diff.changes.len());
    write_scripts(&plan, output_file_prefix)
}

fn write_scripts(plan: &DeploymentPlan, prefix: &Path) -> Result<()> {
    let Some(scripts) = &plan.scripts else {
        return Ok(());
    };

    let mut outputs = vec![
        ("up", &scripts.up),
        ("down", &scripts.down),
        ("base", &scripts.base),
    ];
    if let Some(staged) = &scripts.staged {
        outputs.push(("staged", staged));
    }

    for (label, text) in outputs {
        let path = PathBuf::from(format!("{}.{}.sql", prefix.display(), label));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;

        let mut label = label.to_string();
        if let Some(first) = label.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        println!("{} script written to '{}'.", label, path.display());
    }

    Ok(())
}

/// show-dependencies - print the deploy-ordered dependency listing
fn show_dependencies_command(
    config: &Config,
    scripts_dir: &Path,
    ignore_prefixes: Option<&str>,
    upper_case: bool,
) -> Result<()> {
    let adapter = SqlLineageAdapter::new(&config.dialect);
    let build = GraphBuilder::new(&adapter)
        .build(scripts_dir)
        .with_context(|| format!("Failed to scan {}", scripts_dir.display()))?;

    let order = schedule(&build.graph);
    if let Some(cycle) = order.cycle_diagnostic() {
        warn!("{}", cycle.message);
    }

    let objects = dependency_ordered_objects(&build.graph, &order);
    let mut listing = DependencyListing::new(&objects).upper_case(upper_case);
    if let Some(prefixes) = ignore_prefixes {
        listing = listing.ignore_prefixes(prefixes);
    }

    print!("{}", listing.render());
    Ok(())
}

/// trace - print the lineage trace plan for one column
fn trace_command(
    config: &Config,
    scripts_dir: &Path,
    table: &str,
    column: &str,
    filters: &[String],
    max_depth: Option<usize>,
) -> Result<()> {
    let table = ObjectName::parse(table)
        .ok_or_else(|| anyhow::anyhow!("Invalid table name '{}', expected SCHEMA.TABLE", table))?;

    let mut request = TraceRequest::new(table, column)
        .with_max_depth(max_depth.unwrap_or(config.trace.max_depth));
    for filter in filters {
        request = request.with_filter(FilterPredicate::parse(filter)?);
    }

    let adapter = SqlLineageAdapter::new(&config.dialect);
    let build = GraphBuilder::new(&adapter)
        .build(scripts_dir)
        .with_context(|| format!("Failed to scan {}", scripts_dir.display()))?;

    let plan = TraceBuilder::new(&build.graph, &adapter).trace(&request)?;
    debug!(steps = plan.steps.len(), paths = plan.paths.len(), "Trace plan built");
    print!("{}", plan.render());
    Ok(())
}

/// Print collected diagnostics to stderr
fn print_diagnostics(report: &Report) {
    if report.diagnostics.is_empty() {
        return;
    }

    eprintln!();
    eprintln!(
        "{} {} warnings, {} info",
        "Diagnostics:".bold(),
        report.summary.warnings,
        report.summary.info
    );
    for diag in &report.diagnostics {
        let severity = match diag.severity {
            Severity::Error => "ERROR".red().bold(),
            Severity::Warn => "WARN".yellow().bold(),
            Severity::Info => "INFO".cyan(),
        };
        eprintln!("  [{}] {}: {}", severity, diag.code, diag.message);
        if let Some(loc) = &diag.location {
            eprintln!("    at {}", loc.file);
        }
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeated_trace_filters() {
        let cli = Cli::try_parse_from([
            "gitsnow",
            "trace",
            "--table",
            "sales.orders",
            "--column",
            "id",
            "--filter",
            "ID=5",
            "--filter",
            "REGION=EU",
        ])
        .unwrap();

        match cli.command {
            Commands::Trace { filters, max_depth, .. } => {
                assert_eq!(filters, vec!["ID=5", "REGION=EU"]);
                assert_eq!(max_depth, None);
            }
            _ => panic!("expected trace"),
        }
        assert_eq!(cli.scripts_dir, PathBuf::from("scripts"));
    }

    #[test]
    fn test_mode_defaults_to_mock_database() {
        assert_eq!(resolve_database(None, true).unwrap(), "MOCK_DB");
        assert_eq!(resolve_database(Some("PROD".to_string()), true).unwrap(), "PROD");
        assert!(resolve_database(None, false).is_err());
    }

    #[test]
    fn mock_connection_type_selects_mock() {
        let config = Config::from_toml("[connection]\ntype = \"mock\"\n").unwrap();
        let connector = connector_for(&config, false, false).unwrap();
        assert_eq!(connector.name(), MockConnector::demo().name());
    }

    #[tokio::test]
    async fn folder_to_script_writes_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        let view_dir = scripts.join("my_schema/views");
        std::fs::create_dir_all(&view_dir).unwrap();
        std::fs::write(
            view_dir.join("new_view.sql"),
            "create or replace view my_schema.new_view as select id from my_schema.base_customers;",
        )
        .unwrap();

        let prefix = dir.path().join("out/deploy");
        let report = dir.path().join("report.json");
        folder_to_script_command(&Config::default(), &scripts, None, &prefix, Some(&report), true, false)
            .await
            .unwrap();

        let up = std::fs::read_to_string(dir.path().join("out/deploy.up.sql")).unwrap();
        assert!(up.contains("-- Object: scripts/my_schema/views/new_view.sql"));
        assert!(dir.path().join("out/deploy.down.sql").exists());
        assert!(dir.path().join("out/deploy.base.sql").exists());
        assert!(!dir.path().join("out/deploy.staged.sql").exists());

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(json["summary"]["changes_detected"], 1);
    }
}
