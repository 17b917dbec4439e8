use crate::services::{
    audit::DEFAULT_AUDIT_DAYS,
    credentials::{CredentialProvider, SidecarCredentialProvider, StaticCredentialProvider},
    upload_sessions::DEFAULT_UPLOAD_TTL_SECS,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, sync::Arc};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Backing container every object lives in.
    pub bucket: String,
    /// Root of the legacy `uploads/` tree.
    pub uploads_dir: PathBuf,
    /// Origin prefixed to signed upload URLs.
    pub public_base_url: String,
    pub upload_ttl_secs: u64,
    pub signing_secret: Option<String>,
    pub sidecar_endpoint: String,
    /// Where migration and audit reports are written.
    pub report_dir: PathBuf,
    pub skip_existing: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage layer for the council portal")]
pub struct Args {
    /// Host to bind to (overrides COUNCIL_STORAGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides COUNCIL_STORAGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides COUNCIL_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage bucket (overrides DEFAULT_OBJECT_STORAGE_BUCKET_ID)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Legacy uploads directory (overrides COUNCIL_UPLOADS_DIR)
    #[arg(long)]
    pub uploads_dir: Option<PathBuf>,

    /// Directory for migration and audit reports (overrides COUNCIL_REPORT_DIR)
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Apply the database schema and exit
    #[arg(long)]
    pub init_db: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Migrate legacy files and references, then write a JSON report
    MigrateFiles {
        /// Leave objects that already exist untouched
        #[arg(long)]
        skip_existing: bool,
    },
    /// Rewrite legacy references only
    MigrateReferences,
    /// Check stored references against the backing store
    Diagnose {
        /// List references to missing objects that would be cleared
        #[arg(long)]
        cleanup: bool,
        /// With --cleanup, actually clear them
        #[arg(long, requires = "cleanup")]
        apply: bool,
    },
    /// Report files modified in the trailing window
    Audit {
        #[arg(long, default_value_t = DEFAULT_AUDIT_DAYS)]
        days: u32,
    },
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    InitDb,
    Run(Command),
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the requested action.
    pub fn from_env_and_args() -> Result<(Self, CliAction)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, CliAction)> {
        // --- Environment fallback ---
        let env_host = env_or("COUNCIL_STORAGE_HOST", "0.0.0.0");
        let env_port = parse_env("COUNCIL_STORAGE_PORT", 3000u16)?;
        let port = args.port.unwrap_or(env_port);
        let upload_ttl_secs = parse_env("COUNCIL_UPLOAD_TTL_SECS", DEFAULT_UPLOAD_TTL_SECS)?;
        let env_skip = parse_env("COUNCIL_MIGRATION_SKIP_EXISTING", false)?;

        // --- Merge ---
        let mut cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("COUNCIL_STORAGE_DIR", "./data/objects")),
            database_url: args
                .database_url
                .unwrap_or_else(|| env_or("DATABASE_URL", "sqlite://./data/council.db")),
            bucket: args
                .bucket
                .unwrap_or_else(|| env_or("DEFAULT_OBJECT_STORAGE_BUCKET_ID", "council-objects")),
            uploads_dir: args
                .uploads_dir
                .unwrap_or_else(|| env_or("COUNCIL_UPLOADS_DIR", "./uploads").into()),
            public_base_url: env_or("COUNCIL_PUBLIC_BASE_URL", &format!("http://127.0.0.1:{port}")),
            upload_ttl_secs,
            signing_secret: env::var("OBJECT_STORAGE_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            sidecar_endpoint: env_or("OBJECT_STORAGE_SIDECAR_ENDPOINT", "http://127.0.0.1:1106"),
            report_dir: args
                .report_dir
                .unwrap_or_else(|| env_or("COUNCIL_REPORT_DIR", ".").into()),
            skip_existing: env_skip,
        };

        let action = if args.init_db {
            CliAction::InitDb
        } else {
            let command = args.command.unwrap_or(Command::Serve);
            if let Command::MigrateFiles { skip_existing } = &command {
                cfg.skip_existing |= *skip_existing;
            }
            CliAction::Run(command)
        };
        Ok((cfg, action))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured secret when present, the local sidecar otherwise.
    pub fn credential_provider(&self) -> Arc<dyn CredentialProvider> {
        match &self.signing_secret {
            Some(secret) => Arc::new(StaticCredentialProvider::new(secret.clone())),
            None => Arc::new(SidecarCredentialProvider::new(self.sidecar_endpoint.clone())),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> (AppConfig, CliAction) {
        AppConfig::from_args(Args::try_parse_from(argv.iter().copied()).unwrap()).unwrap()
    }

    #[test]
    fn serve_is_the_default_command() {
        let (cfg, action) = parse(&["council-storage", "--port", "4100"]);
        assert_eq!(action, CliAction::Run(Command::Serve));
        assert_eq!(cfg.addr().rsplit(':').next(), Some("4100"));
    }

    #[test]
    fn init_db_wins_over_subcommands() {
        let (_, action) = parse(&["council-storage", "--init-db", "audit"]);
        assert_eq!(action, CliAction::InitDb);
    }

    #[test]
    fn audit_days_default_and_override() {
        let (_, action) = parse(&["council-storage", "audit"]);
        assert_eq!(action, CliAction::Run(Command::Audit { days: DEFAULT_AUDIT_DAYS }));
        let (_, action) = parse(&["council-storage", "audit", "--days", "30"]);
        assert_eq!(action, CliAction::Run(Command::Audit { days: 30 }));
    }

    #[test]
    fn diagnose_cleanup_is_a_dry_run_unless_applied() {
        let (_, action) = parse(&["council-storage", "diagnose", "--cleanup"]);
        assert_eq!(
            action,
            CliAction::Run(Command::Diagnose {
                cleanup: true,
                apply: false
            })
        );
        assert!(Args::try_parse_from(["council-storage", "diagnose", "--apply"]).is_err());
    }

    #[test]
    fn skip_existing_flag_enables_short_circuit() {
        let (cfg, _) = parse(&["council-storage", "migrate-files", "--skip-existing"]);
        assert!(cfg.skip_existing);
    }

    #[test]
    fn cli_values_override_environment() {
        let (cfg, _) = parse(&[
            "council-storage",
            "--bucket",
            "test-bucket",
            "--uploads-dir",
            "/srv/uploads",
        ]);
        assert_eq!(cfg.bucket, "test-bucket");
        assert_eq!(cfg.uploads_dir, PathBuf::from("/srv/uploads"));
    }
}
