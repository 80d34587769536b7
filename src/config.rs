use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;

/// Which ledger implementation backs file descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LedgerBackend {
    /// Descriptors in SQLite at `database_url`.
    Sqlite,
    /// Descriptors in process memory; lost on restart.
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(value, true)
            .map_err(|_| anyhow::anyhow!("unknown ledger backend `{}`", value))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub ledger: LedgerBackend,
    pub database_url: String,
    pub max_upload_bytes: usize,
    pub upload_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File upload and range-serving API")]
pub struct Args {
    /// Host to bind to (overrides FILESTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILESTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where files are stored (overrides FILESTORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Ledger backend (overrides FILESTORE_LEDGER)
    #[arg(long, value_enum)]
    pub ledger: Option<LedgerBackend>,

    /// Database URL for the sqlite ledger (overrides FILESTORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload body in bytes (overrides FILESTORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Seconds an upload may take end to end (overrides FILESTORE_UPLOAD_TIMEOUT_SECS)
    #[arg(long)]
    pub upload_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |name| env::var(name))?, migrate))
    }

    /// Merge CLI args over values looked up with `lookup`, over defaults.
    fn merge(
        args: Args,
        lookup: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|_| default.into());

        let env_port = parse_var(&lookup, "FILESTORE_PORT", 3000u16)?;
        let env_ledger = parse_var(&lookup, "FILESTORE_LEDGER", LedgerBackend::Sqlite)?;
        let env_max_upload =
            parse_var(&lookup, "FILESTORE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_timeout = parse_var(
            &lookup,
            "FILESTORE_UPLOAD_TIMEOUT_SECS",
            DEFAULT_UPLOAD_TIMEOUT_SECS,
        )?;

        Ok(Self {
            host: args.host.unwrap_or_else(|| var("FILESTORE_HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| var("FILESTORE_STORAGE_DIR", "./data/files")),
            ledger: args.ledger.unwrap_or(env_ledger),
            database_url: args.database_url.unwrap_or_else(|| {
                var("FILESTORE_DATABASE_URL", "sqlite://./data/meta/ledger.db")
            }),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            upload_timeout: Duration::from_secs(args.upload_timeout_secs.unwrap_or(env_timeout)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse an optional environment value, falling back to `default` when unset.
fn parse_var<T>(
    lookup: &impl Fn(&str) -> Result<String, env::VarError>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
