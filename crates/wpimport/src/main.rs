use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use log::LevelFilter;
use serde::Serialize;
use simple_logger::SimpleLogger;
use wpimport_core::config::{ImportSettings, load_config};
use wpimport_core::dump::{Row, decode_dump, extract_table};
use wpimport_core::import::{ImportIssue, ImportOptions, backfill_featured_images, run_import};
use wpimport_core::migrate::{open_migrated, pending_migration_count, run_migrations};
use wpimport_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    init_layout, inspect_runtime, resolve_paths,
};
use wpimport_core::store;
use wpimport_core::unescape::unescape_mysql;
use wpimport_core::wordpress::{TablePrefix, WordPressDump};
use wpimport_core::wpress::extract_wpress;

#[derive(Debug, Parser)]
#[command(
    name = "wpimport",
    version,
    about = "Import WordPress MySQL dumps and .wpress archives into the portal database"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "More log output (-v info, -vv debug)")]
    verbose: u8,
    #[arg(short, long, global = true, help = "Only log errors")]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .wpimport/ and a starter config.toml")]
    Init(InitArgs),
    #[command(about = "Show resolved paths and runtime readiness")]
    Status,
    #[command(about = "Extract database.sql and uploads from a .wpress archive")]
    Extract(ExtractArgs),
    #[command(about = "Count rows and statements per WordPress table in a dump")]
    Inspect(InspectArgs),
    #[command(about = "Print the raw rows of one table")]
    Rows(RowsArgs),
    #[command(about = "Import users, categories, tags and posts from a dump")]
    Import(ImportArgs),
    #[command(
        name = "featured-images",
        about = "Backfill featured images on imported posts"
    )]
    FeaturedImages(FeaturedImagesArgs),
    Db(DbArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
    #[arg(long, help = "Skip writing .wpimport/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    archive: PathBuf,
    #[arg(long, short, value_name = "DIR", default_value = "wp-backup")]
    output: PathBuf,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    dump: PathBuf,
    #[arg(long, value_name = "PREFIX", help = "Table prefix (default: config or wp_)")]
    prefix: Option<String>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct RowsArgs {
    dump: PathBuf,
    #[arg(help = "Full table name, e.g. wp_posts")]
    table: String,
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
    #[arg(long, help = "Decode MySQL escapes in field values")]
    unescape: bool,
    #[arg(long, help = "Print rows as JSON arrays")]
    json: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    dump: Option<PathBuf>,
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,
    #[arg(long, help = "Run the import and roll it back")]
    dry_run: bool,
    #[arg(long, help = "Only import posts with status publish")]
    published_only: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct FeaturedImagesArgs {
    dump: Option<PathBuf>,
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,
    #[arg(long, help = "Compute updates and roll them back")]
    dry_run: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    #[command(about = "Apply pending schema migrations")]
    Migrate,
    #[command(about = "Print row counts of the destination tables")]
    Stats,
}

#[derive(Debug, Serialize)]
struct InspectedTable {
    table: String,
    mapped_rows: usize,
    skipped_rows: usize,
    statements: usize,
    unterminated_statements: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet)?;
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Extract(args)) => run_extract(&runtime, args),
        Some(Commands::Inspect(args)) => run_inspect(&runtime, args),
        Some(Commands::Rows(args)) => run_rows(&runtime, args),
        Some(Commands::Import(args)) => run_import_command(&runtime, args),
        Some(Commands::FeaturedImages(args)) => run_featured_images(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let from_flags = match (quiet, verbose) {
        (true, _) => Some(LevelFilter::Error),
        (false, 0) => None,
        (false, 1) => Some(LevelFilter::Info),
        (false, _) => Some(LevelFilter::Debug),
    };
    let level = from_flags
        .or_else(|| {
            std::env::var("WPIMPORT_LOG")
                .ok()
                .and_then(|value| value.trim().parse().ok())
        })
        .unwrap_or(LevelFilter::Warn);
    SimpleLogger::new()
        .with_level(level)
        .init()
        .context("failed to initialize logger")
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized wpimport runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    if let Some(size) = status.db_size_bytes {
        println!("db_size_bytes: {size}");
        println!(
            "pending_migrations: {}",
            pending_migration_count(&paths)?
        );
    }
    println!("config_exists: {}", format_flag(status.config_exists));
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_extract(runtime: &RuntimeOptions, args: ExtractArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let archive = paths.input_path(&args.archive);
    let output = paths.input_path(&args.output);
    let report = extract_wpress(&archive, &output)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("wpress extract");
    println!("archive: {}", report.archive);
    println!("output_dir: {}", report.output_dir);
    println!(
        "database: {}",
        report.database.as_deref().unwrap_or("<not found>")
    );
    println!("extracted_files: {}", report.extracted_files);
    println!("extracted_bytes: {}", report.extracted_bytes);
    println!("skipped_entries: {}", report.skipped_entries);
    println!("resync_bytes: {}", report.resync_bytes);
    println!("truncated: {}", report.truncated);
    for path in &report.rejected_paths {
        println!("rejected_path: {path}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_inspect(runtime: &RuntimeOptions, args: InspectArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let settings = load_settings(&paths)?;
    let dump_path = paths.input_path(&args.dump);
    let dump = read_dump(&dump_path)?;
    let prefix = args
        .prefix
        .map(TablePrefix::new)
        .unwrap_or(settings.table_prefix);
    let parsed = WordPressDump::parse(&dump, &prefix);

    let mapped = [
        parsed.users.len(),
        parsed.posts.len(),
        parsed.postmeta.len(),
        parsed.terms.len(),
        parsed.taxonomies.len(),
        parsed.relationships.len(),
    ];
    let tables = parsed
        .tables
        .iter()
        .zip(mapped)
        .map(|(extraction, mapped_rows)| InspectedTable {
            table: extraction.table.clone(),
            mapped_rows,
            skipped_rows: parsed
                .skipped
                .iter()
                .filter(|skip| skip.table == extraction.table)
                .count(),
            statements: extraction.statements,
            unterminated_statements: extraction.unterminated_statements,
        })
        .collect::<Vec<_>>();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }
    println!("dump inspect");
    println!("dump_path: {}", normalize_path(&dump_path));
    println!("table_prefix: {}", prefix.as_str());
    for table in &tables {
        println!(
            "{}: rows={} skipped={} statements={} unterminated={}",
            table.table,
            table.mapped_rows,
            table.skipped_rows,
            table.statements,
            table.unterminated_statements
        );
    }
    if parsed.is_empty() {
        println!("warnings:");
        println!(
            "  - no INSERT statements found for prefix `{}`",
            prefix.as_str()
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_rows(runtime: &RuntimeOptions, args: RowsArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let dump_path = paths.input_path(&args.dump);
    let dump = read_dump(&dump_path)?;
    let extraction = extract_table(&dump, &args.table);

    let limit = args.limit.unwrap_or(usize::MAX);
    let rows: Vec<Row> = extraction
        .rows
        .iter()
        .take(limit)
        .map(|row| {
            if args.unescape {
                row.iter().map(|field| unescape_mysql(field)).collect()
            } else {
                row.clone()
            }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!("table: {}", extraction.table);
    println!("statements: {}", extraction.statements);
    println!("unterminated_statements: {}", extraction.unterminated_statements);
    println!("rows: {}", extraction.rows.len());
    for (index, row) in rows.iter().enumerate() {
        println!("[{}] {}", index + 1, row.join(" | "));
    }
    Ok(())
}

fn run_import_command(runtime: &RuntimeOptions, args: ImportArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let settings = load_settings(&paths)?;
    let report = run_import(
        &paths,
        &settings,
        &ImportOptions {
            dump_path: args.dump,
            table_prefix: args.prefix,
            dry_run: args.dry_run,
            published_only: args.published_only,
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("wordpress import");
    println!("dump_path: {}", report.dump_path);
    println!("dump_sha256: {}", report.dump_sha256);
    println!("table_prefix: {}", report.table_prefix);
    println!("dry_run: {}", report.dry_run);
    for table in &report.tables {
        println!(
            "table.{}: statements={} unterminated={}",
            table.table, table.statements, table.unterminated_statements
        );
    }
    println!(
        "users: created={} matched={}",
        report.users_created, report.users_matched
    );
    println!(
        "categories: created={} matched={}",
        report.categories_created, report.categories_matched
    );
    println!(
        "tags: created={} matched={}",
        report.tags_created, report.tags_matched
    );
    println!("posts_imported: {}", report.posts_imported.len());
    println!("posts_skipped: {}", report.posts_skipped.len());
    println!("posts_with_images: {}", report.posts_with_images);
    println!("category_links: {}", report.category_links);
    println!("tag_links: {}", report.tag_links);
    if let Some(run_id) = report.run_id {
        println!("run_id: {run_id}");
    }
    print_issues(&report.errors);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_featured_images(runtime: &RuntimeOptions, args: FeaturedImagesArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let settings = load_settings(&paths)?;
    let report = backfill_featured_images(
        &paths,
        &settings,
        &ImportOptions {
            dump_path: args.dump,
            table_prefix: args.prefix,
            dry_run: args.dry_run,
            published_only: false,
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("featured images");
    println!("dump_path: {}", report.dump_path);
    println!("table_prefix: {}", report.table_prefix);
    println!("updated: {}", report.updated.len());
    println!("already_set: {}", report.already_set);
    println!("post_not_found: {}", report.post_not_found);
    print_issues(&report.errors);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&paths.db_path));
    if report.applied.is_empty() {
        println!("applied: <none>");
    }
    for migration in &report.applied {
        println!("applied: v{:03}_{}", migration.version, migration.name);
    }
    println!("current_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_migrated(&paths)?;
    let stats = store::stats(&connection)?;

    println!("db stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("users: {}", stats.users);
    println!("categories: {}", stats.categories);
    println!("tags: {}", stats.tags);
    println!("posts: {}", stats.posts);
    println!("posts_with_featured_image: {}", stats.posts_with_featured_image);
    println!("post_categories: {}", stats.post_categories);
    println!("post_tags: {}", stats.post_tags);
    println!("import_runs: {}", stats.import_runs);
    println!(
        "last_import_sha256: {}",
        stats.last_import_sha256.as_deref().unwrap_or("<none>")
    );
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_issues(issues: &[ImportIssue]) {
    println!("issues: {}", issues.len());
    for issue in issues {
        let location = match (&issue.table, issue.row, &issue.subject) {
            (Some(table), Some(row), _) => format!("{table}#{row}"),
            (_, _, Some(subject)) => subject.clone(),
            _ => "-".to_string(),
        };
        println!("  - {location}: {}", issue.message);
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn load_settings(paths: &ResolvedPaths) -> Result<ImportSettings> {
    Ok(load_config(&paths.config_path)?.settings())
}

fn read_dump(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(decode_dump(bytes, path))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
