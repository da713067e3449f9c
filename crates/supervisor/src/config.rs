//! Generates the daemon configuration file from tunable options.
//!
//! The template is rewritten on every bootstrap so option changes take
//! effect, but RPC credentials already present in an existing file are
//! preserved so the host does not invalidate a running setup.

use std::fs;
use std::path::Path;

use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};

static RPC_USER_DEFAULT: &str = "nodehost";

/// RPC credentials written into the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCredentials {
    /// RPC username.
    pub user: String,

    /// RPC password.
    pub password: String,
}

/// Resource profile for the generated configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunePreset {
    /// Minimal footprint for constrained devices.
    Light,
    /// Default mobile profile.
    #[default]
    Balanced,
    /// Larger caches and more peers for capable devices.
    Full,
    /// Caller-supplied values used as-is.
    Custom,
}

impl TunePreset {
    /// Returns the preset name as written into the config header.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Balanced => "balanced",
            Self::Full => "full",
            Self::Custom => "custom",
        }
    }
}

/// Tunable options for the generated daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOptions {
    /// Resource profile recorded in the file header.
    pub preset: TunePreset,

    /// Maximum peer connections.
    pub max_connections: u16,

    /// Prune target in megabytes.
    pub prune_target_mb: u32,

    /// Database cache size in megabytes.
    pub db_cache_mb: u32,

    /// Relay blocks only, skipping loose transactions.
    pub blocks_only: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self::for_preset(TunePreset::Balanced)
    }
}

impl ConfigOptions {
    /// Returns the canonical options for a preset.
    #[must_use]
    pub const fn for_preset(preset: TunePreset) -> Self {
        match preset {
            TunePreset::Light => Self {
                preset,
                max_connections: 6,
                prune_target_mb: 2048,
                db_cache_mb: 128,
                blocks_only: true,
            },
            TunePreset::Full => Self {
                preset,
                max_connections: 16,
                prune_target_mb: 8192,
                db_cache_mb: 512,
                blocks_only: false,
            },
            TunePreset::Balanced | TunePreset::Custom => Self {
                preset,
                max_connections: 10,
                prune_target_mb: 4096,
                db_cache_mb: 256,
                blocks_only: false,
            },
        }
    }
}

/// Writes the daemon configuration file, preserving existing RPC
/// credentials and generating a random password otherwise.
///
/// # Errors
///
/// Returns an error if the configuration file cannot be written.
pub fn ensure_config(config_file: &Path, options: &ConfigOptions) -> Result<RpcCredentials> {
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Io("failed to create config directory", e))?;
    }

    let existing = match fs::read_to_string(config_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            warn!("failed to read existing config: {}", e);
            String::new()
        }
    };

    let user =
        parse_value(&existing, "rpcuser").unwrap_or_else(|| RPC_USER_DEFAULT.to_string());
    let password =
        parse_value(&existing, "rpcpassword").unwrap_or_else(|| Uuid::new_v4().to_string());
    let credentials = RpcCredentials { user, password };

    fs::write(config_file, build_template(&credentials, options))
        .map_err(|e| Error::Io("failed to write daemon config", e))?;

    Ok(credentials)
}

fn build_template(credentials: &RpcCredentials, options: &ConfigOptions) -> String {
    let mut out = String::new();
    out.push_str("# Generated node configuration\n");
    out.push_str(&format!("# Profile: {}\n", options.preset.as_str()));
    out.push_str("server=1\n");
    out.push_str("listen=1\n");
    out.push_str("dns=1\n");
    out.push_str("discover=1\n");
    out.push_str(&format!("maxconnections={}\n", options.max_connections));
    out.push_str(&format!("prune={}\n", options.prune_target_mb));
    out.push_str(&format!("dbcache={}\n", options.db_cache_mb));
    out.push_str("txindex=0\n");
    if options.blocks_only {
        out.push_str("blocksonly=1\n");
    }
    out.push('\n');
    out.push_str(&format!("rpcuser={}\n", credentials.user));
    out.push_str(&format!("rpcpassword={}\n", credentials.password));
    out.push_str("rpcallowip=127.0.0.1\n");
    out.push_str("rpcbind=127.0.0.1\n");
    out
}

/// Looks up `key=` in key/value config contents, skipping comments.
pub(crate) fn parse_value(contents: &str, key: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let (k, v) = line.split_once('=')?;
            k.eq_ignore_ascii_case(key).then(|| v.to_string())
        })
}
