//! Configuration Vault – reads/writes `~/.shardctl/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Supported LLM provider choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    OpenAI,
    Anthropic,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::OpenAI => write!(f, "openai"),
            LlmProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Persisted user configuration stored in `~/.shardctl/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chosen LLM provider.
    #[serde(default)]
    pub llm_provider: LlmProvider,

    /// Active model name (e.g. "llama3", "gpt-4o").
    #[serde(default = "default_model")]
    pub active_model: String,

    /// Base URL of the Ollama instance.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// OpenAI API key (stored as plain text – users should restrict file
    /// permissions on `~/.shardctl/config.toml`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub openai_api_key: String,

    /// Anthropic API key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub anthropic_api_key: String,

    /// Constitution's strict mode: deny on no `permitted/1` match rather
    /// than permit.
    #[serde(default = "default_true")]
    pub strict_mode: bool,

    /// Constitution's domain allowlist.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Executive's barrier enforcement: block action derivation while any
    /// `block_commit`/`block_action`/`executive_blocked`/`test_state_blocking`
    /// fact holds.
    #[serde(default = "default_true")]
    pub strict_barriers: bool,

    /// Planner's `maxRetriesPerTask` before a task escalates to blocked.
    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("llm_provider", &self.llm_provider)
            .field("active_model", &self.active_model)
            .field("ollama_url", &self.ollama_url)
            .field(
                "openai_api_key",
                if self.openai_api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field(
                "anthropic_api_key",
                if self.anthropic_api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("strict_mode", &self.strict_mode)
            .field("allowed_domains", &self.allowed_domains)
            .field("strict_barriers", &self.strict_barriers)
            .field("max_task_retries", &self.max_task_retries)
            .finish()
    }
}

fn default_model() -> String {
    "llama3".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_task_retries() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::default(),
            active_model: default_model(),
            ollama_url: default_ollama_url(),
            openai_api_key: String::new(),
            anthropic_api_key: String::new(),
            strict_mode: default_true(),
            allowed_domains: Vec::new(),
            strict_barriers: default_true(),
            max_task_retries: default_max_task_retries(),
        }
    }
}

/// Return the path to `~/.shardctl/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".shardctl").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SHARDCTL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SHARDCTL_OLLAMA_URL` | `ollama_url` |
/// | `SHARDCTL_MODEL` | `active_model` |
/// | `SHARDCTL_STRICT_MODE` | `strict_mode` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SHARDCTL_OLLAMA_URL") {
        cfg.ollama_url = v;
    }
    if let Ok(v) = std::env::var("SHARDCTL_MODEL") {
        cfg.active_model = v;
    }
    if let Ok(v) = std::env::var("SHARDCTL_STRICT_MODE") {
        if let Ok(b) = v.parse::<bool>() {
            cfg.strict_mode = b;
        }
    }
}

/// Save the config to disk, creating `~/.shardctl/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
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
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_api_keys() {
        let mut cfg = Config::default();
        cfg.openai_api_key = "sk-super-secret".to_string();
        cfg.anthropic_api_key = "ant-super-secret".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("sk-super-secret"));
        assert!(!debug_str.contains("ant-super-secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_keys() {
        let cfg = Config::default();
        let debug_str = format!("{:?}", cfg);
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let file_meta = std::fs::metadata(&path).expect("file metadata");
        assert_eq!(file_meta.permissions().mode() & 0o777, 0o600);

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.active_model, "llama3");
        assert_eq!(loaded.llm_provider, LlmProvider::Ollama);
        assert!(loaded.strict_mode);
    }

    #[test]
    fn config_path_points_to_shardctl_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".shardctl"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let result = load_from(&path).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn apply_env_overrides_changes_ollama_url() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("SHARDCTL_OLLAMA_URL", "http://llm-host:11434") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ollama_url, "http://llm-host:11434");
        unsafe { std::env::remove_var("SHARDCTL_OLLAMA_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_model() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("SHARDCTL_MODEL", "gpt-4o") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.active_model, "gpt-4o");
        unsafe { std::env::remove_var("SHARDCTL_MODEL") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_bool() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("SHARDCTL_STRICT_MODE", "not-a-bool") };
        let mut cfg = Config::default();
        let original = cfg.strict_mode;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.strict_mode, original);
        unsafe { std::env::remove_var("SHARDCTL_STRICT_MODE") };
    }
}
