use anyhow::Result;
use axum::Router;
use chrono::Utc;
use council_storage::{
    config::{AppConfig, CliAction, Command},
    db, routes,
    services::{audit, diagnostics, migration},
    state::{AppState, StateOptions},
};
use std::{collections::HashSet, fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + requested action ---
    let (cfg, action) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting council-storage with config: {:?}", redacted(&cfg));

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    let command = match action {
        CliAction::InitDb => {
            db::run_migrations(&db).await?;
            tracing::info!("Database schema applied.");
            return Ok(()); // exit after schema bootstrap
        }
        CliAction::Run(command) => command,
    };

    // --- Initialize core services ---
    let state = AppState::new(
        db.clone(),
        cfg.credential_provider(),
        StateOptions {
            bucket: cfg.bucket.clone(),
            storage_dir: cfg.storage_dir.clone().into(),
            uploads_dir: cfg.uploads_dir.clone(),
            public_base_url: cfg.public_base_url.clone(),
            upload_ttl_secs: cfg.upload_ttl_secs,
        },
    );

    match command {
        Command::Serve => serve(&cfg, state).await,
        Command::MigrateFiles { .. } => {
            let engine = state.migration_engine().skip_existing(cfg.skip_existing);
            let report = engine.run().await?;
            let path = migration::write_report(&report, &cfg.report_dir).await?;
            tracing::info!(
                report = %path.display(),
                migrated = report.total_files,
                updated = report.total_updated,
                errors = report.total_errors,
                "Migration finished."
            );
            Ok(())
        }
        Command::MigrateReferences => {
            let engine = state.migration_engine();
            engine.check_connectivity().await?;
            let results = engine.migrate_references(&HashSet::new()).await;
            tracing::info!(
                updated = results.total_updated(),
                errors = results.total_errors(),
                "Reference migration finished."
            );
            Ok(())
        }
        Command::Diagnose { cleanup, apply } => {
            let checks = state.diagnostics();
            if cleanup {
                let report = checks.cleanup_missing_references(!apply).await;
                for change in &report.changes {
                    tracing::info!(dry_run = report.dry_run, "{}", change);
                }
                tracing::info!(
                    dry_run = report.dry_run,
                    candidates = report.changes.len(),
                    cleaned = report.cleaned,
                    errors = report.errors,
                    "Cleanup finished."
                );
            } else {
                let report = checks.diagnose().await;
                let path = diagnostics::write_report(&report, &cfg.report_dir).await?;
                tracing::info!(
                    report = %path.display(),
                    issues = report.issues.len(),
                    missing = report.missing_objects,
                    legacy = report.legacy_references,
                    "Diagnostics finished."
                );
            }
            Ok(())
        }
        Command::Audit { days } => {
            let cutoff = audit::cutoff_for(Utc::now(), days);
            let root = cfg.uploads_dir.clone();
            let records = tokio::task::spawn_blocking(move || audit::scan(&root, cutoff)).await?;
            let report = audit::summarize(records, cutoff, days);
            let (text, json) = audit::write_reports(&report, &cfg.report_dir)?;
            tracing::info!(
                files = report.summary.total_files,
                size = %audit::format_size(report.summary.total_size),
                text = %text.display(),
                json = %json.display(),
                "Audit finished."
            );
            Ok(())
        }
    }
}

async fn serve(cfg: &AppConfig, state: AppState) -> Result<()> {
    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Config as logged: the signing secret never reaches the logs.
fn redacted(cfg: &AppConfig) -> AppConfig {
    let mut cfg = cfg.clone();
    if cfg.signing_secret.is_some() {
        cfg.signing_secret = Some("<redacted>".into());
    }
    cfg
}
