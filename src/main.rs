use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use reaper::{
    config::ReaperConfig,
    db,
    observability::{self, TracingGuard},
    retention::{self, BacklogScheduler, RetentionEngine},
};

/// CLI arguments for Reaper
#[derive(Parser, Debug)]
#[command(version, about = "Policy-driven row retention", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./reaper.toml if it exists)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the retention worker until interrupted (default)
    Run,
    /// Run one cleanup for a single entity type and print the result
    Cleanup {
        /// Entity type (table name) to clean up
        entity: String,
        /// Count expired rows without removing any
        #[arg(long)]
        dry_run: bool,
    },
    /// Run one backlog chain over every policy and print it
    Drain {
        /// Round number to start the chain from
        #[arg(long, default_value = "1")]
        start_round: u32,
    },
    /// List the configured policies after validating them against the database
    Policies,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Schema { output }) => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Some(Command::Features) => {
            run_features();
        }
        Some(Command::Cleanup { entity, dry_run }) => {
            let app = bootstrap(args.config.as_deref()).await;
            run_cleanup(&app, &entity, dry_run).await;
        }
        Some(Command::Drain { start_round }) => {
            let app = bootstrap(args.config.as_deref()).await;
            run_drain(&app, start_round).await;
        }
        Some(Command::Policies) => {
            let app = bootstrap(args.config.as_deref()).await;
            run_policies(&app.engine);
        }
        Some(Command::Run) | None => {
            let app = bootstrap(args.config.as_deref()).await;
            run_worker(app).await;
        }
    }
}

fn resolve_config_path(explicit_path: Option<&str>) -> Result<Option<PathBuf>, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from("reaper.toml");
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    Ok(None)
}

fn load_config(explicit_path: Option<&str>) -> ReaperConfig {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let Some(config_path) = config_path else {
        eprintln!("Error: No config file found. Pass --config or create ./reaper.toml.");
        std::process::exit(1);
    };

    match ReaperConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

/// Everything a database-backed command needs.
struct App {
    config: ReaperConfig,
    engine: Arc<RetentionEngine>,
    _tracing_guard: TracingGuard,
}

/// Load config, start logging and metrics, connect, and register every
/// configured policy.
async fn bootstrap(explicit_config_path: Option<&str>) -> App {
    let config = load_config(explicit_config_path);

    let tracing_guard = match observability::init_tracing(&config.observability) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: Failed to initialize tracing: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        eprintln!("Error: Failed to initialize metrics: {}", e);
        std::process::exit(1);
    }

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Add a [database] section.");
        std::process::exit(1);
    }

    let pool = match db::DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = pool.health_check().await {
        tracing::error!(error = %e, "Database health check failed");
        eprintln!("Error: Database health check failed: {}", e);
        std::process::exit(1);
    }

    tracing::info!(backend = pool.backend(), "Connected to database");

    let engine = RetentionEngine::from_pool(&pool, &config.retention);
    if let Err(e) = engine.register_from_config(&config.retention).await {
        eprintln!("Error: Invalid retention policy: {}", e);
        std::process::exit(1);
    }

    App {
        config,
        engine: Arc::new(engine),
        _tracing_guard: tracing_guard,
    }
}

async fn run_worker(app: App) {
    let App { config, engine, .. } = &app;
    if !config.retention.enabled {
        eprintln!("Error: Retention is disabled. Set [retention] enabled = true to run the worker.");
        std::process::exit(1);
    }

    let worker = tokio::spawn(retention::start_retention_worker(
        Arc::clone(engine),
        config.retention.clone(),
    ));

    tokio::select! {
        result = worker => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Retention worker task failed");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, stopping retention worker");
        }
    }
}

async fn run_cleanup(app: &App, entity: &str, dry_run: bool) {
    let dry_run = dry_run || app.config.retention.dry_run;

    match app.engine.cleanup(entity, dry_run).await {
        Ok(Some(result)) => print_json(&result),
        Ok(None) => {
            eprintln!("Error: No retention policy registered for '{}'", entity);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: Cleanup of '{}' failed: {}", entity, e);
            std::process::exit(1);
        }
    }
}

async fn run_drain(app: &App, start_round: u32) {
    if app.config.retention.dry_run {
        let summary = retention::dry_run_pass(&app.engine).await;
        print_json(&serde_json::json!({
            "dry_run": true,
            "total": summary.total(),
            "expired": summary.expired.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
            "unavailable": summary.unavailable,
        }));
        return;
    }

    let scheduler = BacklogScheduler::new(Arc::clone(&app.engine))
        .with_max_rounds(app.config.retention.max_rounds);
    let chain = scheduler.drain(start_round.max(1)).await;
    print_json(&chain);

    if chain.failures() > 0 {
        std::process::exit(1);
    }
}

fn run_policies(engine: &RetentionEngine) {
    let registry = engine.registry();
    let mut policies = Vec::with_capacity(registry.len());

    for entity in registry.entity_types() {
        let Some(registered) = registry.lookup(&entity) else {
            continue;
        };
        let policy = &registered.policy;
        policies.push(serde_json::json!({
            "entity": entity,
            "id_column": registered.entity.id_column,
            "column": policy.column,
            "period_secs": policy.period.num_seconds(),
            "strategy": policy.strategy,
            "batch_limit": policy.batch_limit,
            "filter": policy.filter,
        }));
    }

    print_json(&policies);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

/// Export JSON schema for the configuration file to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match ReaperConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: Failed to render JSON schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        (
            "database-sqlite",
            "Databases",
            cfg!(feature = "database-sqlite"),
        ),
        (
            "database-postgres",
            "Databases",
            cfg!(feature = "database-postgres"),
        ),
        ("prometheus", "Infrastructure", cfg!(feature = "prometheus")),
        (
            "json-schema",
            "Validation & Export",
            cfg!(feature = "json-schema"),
        ),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "standard") {
        "standard"
    } else if cfg!(feature = "minimal") {
        "minimal"
    } else {
        "custom"
    };

    println!("Reaper v{}", version);
    println!("Build profile: {}", profile);
    println!();

    let mut current_category = "";
    for (name, category, enabled) in features {
        if *category != current_category {
            if !current_category.is_empty() {
                println!();
            }
            println!("{}:", category);
            current_category = category;
        }
        let marker = if *enabled { "+" } else { "-" };
        println!("  {} {}", marker, name);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
