use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 << 20;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    /// Base URL used in download links handed to clients.
    pub public_url: String,
    /// Upper bound on the size of one upload request, in bytes.
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File upload and download service")]
pub struct Args {
    /// Host to bind to (overrides FILEDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides FILEDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Public base URL for download links (overrides FILEDROP_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Maximum upload request size in bytes (overrides FILEDROP_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |key| env::var(key))
    }

    /// Merge parsed CLI args over values from `lookup`. CLI wins.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = lookup("FILEDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "FILEDROP_PORT")?.unwrap_or(8080);
        let env_storage =
            lookup("FILEDROP_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_public_url = lookup("FILEDROP_PUBLIC_URL").ok();
        let env_max_upload =
            parse_var(&lookup, "FILEDROP_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        // --- Merge ---
        let port = args.port.unwrap_or(env_port);
        let public_url = args
            .public_url
            .or(env_public_url)
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            public_url,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional variable; a present but unparseable value is an error.
fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
