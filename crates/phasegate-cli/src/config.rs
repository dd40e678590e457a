//! Configuration Vault – reads/writes `~/.phasegate/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use phasegate_kernel::queue::DEFAULT_MAX_DEPTH;

/// Persisted user configuration stored in `~/.phasegate/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where the project ledger is kept (JSON array of entries).
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Optional JSON file of policy overrides merged onto the defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,

    /// Pending depth at which the action queue signals back-pressure.
    #[serde(default = "default_queue_max_depth")]
    pub queue_max_depth: usize,

    /// Identity used when a command does not name an actor.
    #[serde(default = "default_actor")]
    pub default_actor: String,
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(home_dir()).join(".phasegate").join("ledger.json")
}
fn default_queue_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}
fn default_actor() -> String {
    "human:operator".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            policy_path: None,
            queue_max_depth: default_queue_max_depth(),
            default_actor: default_actor(),
        }
    }
}

/// Return the path to `~/.phasegate/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".phasegate").join("config.toml")
}

/// Load the config from disk, or the defaults when no file exists yet.
/// Environment overrides apply either way.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `PHASEGATE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PHASEGATE_LEDGER_PATH` | `ledger_path` |
/// | `PHASEGATE_POLICY_PATH` | `policy_path` |
/// | `PHASEGATE_QUEUE_MAX_DEPTH` | `queue_max_depth` |
/// | `PHASEGATE_ACTOR` | `default_actor` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PHASEGATE_LEDGER_PATH") {
        cfg.ledger_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("PHASEGATE_POLICY_PATH") {
        cfg.policy_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("PHASEGATE_QUEUE_MAX_DEPTH")
        && let Ok(depth) = v.parse::<usize>()
    {
        cfg.queue_max_depth = depth;
    }
    if let Ok(v) = std::env::var("PHASEGATE_ACTOR")
        && !v.trim().is_empty()
    {
        cfg.default_actor = v;
    }
}

/// Save the config to disk, creating `~/.phasegate/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    write_private(path, raw.as_bytes())
}

/// Write `bytes` to `path` readable by the owner only, creating the parent
/// directory (also owner-only) if needed.
pub(crate) fn write_private(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set directory permissions: {}", e))?;
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(bytes)
            })
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, bytes).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    Ok(())
}
