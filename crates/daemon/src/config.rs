// Local configuration files.
//
// Global config: `~/.kibitz/config.toml`
// Project config: `<project>/.kibitz/project.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root directory for Kibitz global state: `~/.kibitz/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".kibitz"))
}

/// Path to the global config file: `~/.kibitz/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Path to the project config file: `<root>/.kibitz/project.toml`.
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".kibitz").join("project.toml")
}

/// Runtime override for the projects base directory.
pub const PROJECTS_DIR_ENV: &str = "KIBITZ_PROJECTS_DIR";
/// Build-time style public setting, consulted after the persisted config.
pub const PUBLIC_PROJECTS_DIR_ENV: &str = "NEXT_PUBLIC_PROJECTS_DIR";

// ── Global config ──────────────────────────────────────────────────

/// Global configuration at `~/.kibitz/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Directory holding one subdirectory per project.
    pub projects_base_dir: Option<PathBuf>,
    /// Listen address for `kibitzd`.
    pub listen_addr: String,
    /// Tool server id used for local execution.
    pub server_id: String,
    /// TTL of the git state cache in milliseconds (0 disables it).
    pub cache_ttl_ms: u64,
    /// Identity written into repositories that have none.
    pub author_name: String,
    pub author_email: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            projects_base_dir: None,
            listen_addr: "127.0.0.1:3001".into(),
            server_id: "local".into(),
            cache_ttl_ms: 800,
            author_name: "Kibitz".into(),
            author_email: "kibitz@localhost".into(),
        }
    }
}

impl GlobalConfig {
    /// Load from `~/.kibitz/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to `~/.kibitz/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        write_toml(path, self)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Resolve the projects base directory. First hit wins: explicit override,
/// `KIBITZ_PROJECTS_DIR`, the persisted `projects_base_dir`,
/// `NEXT_PUBLIC_PROJECTS_DIR`, then `~/gitrepo/projects`.
pub fn resolve_projects_base_dir(
    override_dir: Option<&Path>,
    global: &GlobalConfig,
) -> Option<PathBuf> {
    resolve_projects_base_dir_with(override_dir, global, |key| std::env::var(key).ok())
}

pub fn resolve_projects_base_dir_with(
    override_dir: Option<&Path>,
    global: &GlobalConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty()).map(PathBuf::from);

    override_dir
        .map(Path::to_path_buf)
        .or_else(|| non_empty(env(PROJECTS_DIR_ENV)))
        .or_else(|| global.projects_base_dir.clone())
        .or_else(|| non_empty(env(PUBLIC_PROJECTS_DIR_ENV)))
        .or_else(|| dirs::home_dir().map(|h| h.join("gitrepo").join("projects")))
}

// ── Project config ─────────────────────────────────────────────────

/// Per-project configuration at `<root>/.kibitz/project.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProjectConfig {
    pub git: GitConfig,
    pub llm: LlmConfig,
}

impl ProjectConfig {
    /// Load from `<root>/.kibitz/project.toml`. Returns defaults if the
    /// file doesn't exist or can't be parsed.
    pub fn load(project_root: &Path) -> Self {
        Self::load_from(&project_config_path(project_root)).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    pub fn save(&self, project_root: &Path) -> Result<(), ConfigError> {
        self.save_to(&project_config_path(project_root))
    }

    /// Save to a specific path. The file may hold API keys, so it is made
    /// owner-only on unix.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        write_toml(path, self)?;
        restrict_to_owner(path).map_err(ConfigError::Io)
    }
}

/// Git behaviour per project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitConfig {
    /// Commit automatically at the end of an agent turn.
    pub auto_commit: bool,
    /// Auto mode skips turns that changed fewer files than this.
    pub min_files_for_auto_commit_push: usize,
    /// Push after an automatic commit.
    pub auto_push: bool,
    /// Base URL of a push endpoint; pushes directly through git when unset.
    pub push_endpoint: Option<String>,
    /// Git remote name (defaults to `"origin"`).
    pub remote: String,
    /// Ask an LLM for commit messages.
    pub use_llm_messages: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            min_files_for_auto_commit_push: 2,
            auto_push: false,
            push_endpoint: None,
            remote: "origin".into(),
            use_llm_messages: true,
        }
    }
}

/// LLM provider selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAi,
    OpenRouter,
}

/// Commit-message model settings per project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    /// Provider default when unset.
    pub model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
    }
    let contents = toml::to_string_pretty(value).map_err(ConfigError::Serialize)?;
    std::fs::write(path, contents).map_err(ConfigError::Io)
}

fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    // ── GlobalConfig ───────────────────────────────────────────────

    #[test]
    fn global_config_defaults() {
        let cfg = GlobalConfig::default();
        assert!(cfg.projects_base_dir.is_none());
        assert_eq!(cfg.listen_addr, "127.0.0.1:3001");
        assert_eq!(cfg.server_id, "local");
        assert_eq!(cfg.cache_ttl(), std::time::Duration::from_millis(800));
    }

    #[test]
    fn global_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = GlobalConfig {
            projects_base_dir: Some("/srv/projects".into()),
            listen_addr: "0.0.0.0:4000".into(),
            cache_ttl_ms: 0,
            ..GlobalConfig::default()
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(GlobalConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn global_config_missing_fields_use_defaults() {
        let cfg: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, GlobalConfig::default());
    }

    #[test]
    fn global_config_load_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(GlobalConfig::load_from(&dir.path().join("missing.toml")).is_err());
    }

    // ── Projects dir resolution ────────────────────────────────────

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_override_wins() {
        let global = GlobalConfig { projects_base_dir: Some("/cfg".into()), ..Default::default() };
        let env = env_of(&[(PROJECTS_DIR_ENV, "/runtime"), (PUBLIC_PROJECTS_DIR_ENV, "/public")]);
        let resolved = resolve_projects_base_dir_with(Some(Path::new("/cli")), &global, env);
        assert_eq!(resolved, Some(PathBuf::from("/cli")));
    }

    #[test]
    fn runtime_env_beats_persisted_setting() {
        let global = GlobalConfig { projects_base_dir: Some("/cfg".into()), ..Default::default() };
        let env = env_of(&[(PROJECTS_DIR_ENV, "/runtime"), (PUBLIC_PROJECTS_DIR_ENV, "/public")]);
        assert_eq!(resolve_projects_base_dir_with(None, &global, env), Some("/runtime".into()));
    }

    #[test]
    fn persisted_setting_beats_public_env() {
        let global = GlobalConfig { projects_base_dir: Some("/cfg".into()), ..Default::default() };
        let env = env_of(&[(PROJECTS_DIR_ENV, "  "), (PUBLIC_PROJECTS_DIR_ENV, "/public")]);
        assert_eq!(resolve_projects_base_dir_with(None, &global, env), Some("/cfg".into()));
    }

    #[test]
    fn public_env_then_home_default() {
        let global = GlobalConfig::default();
        let env = env_of(&[(PUBLIC_PROJECTS_DIR_ENV, "/public")]);
        assert_eq!(resolve_projects_base_dir_with(None, &global, env), Some("/public".into()));

        let fallback = resolve_projects_base_dir_with(None, &global, env_of(&[]));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(fallback, Some(home.join("gitrepo").join("projects")));
        }
    }

    // ── ProjectConfig ──────────────────────────────────────────────

    #[test]
    fn project_config_defaults() {
        let cfg = ProjectConfig::default();
        assert!(cfg.git.auto_commit);
        assert_eq!(cfg.git.min_files_for_auto_commit_push, 2);
        assert!(!cfg.git.auto_push);
        assert_eq!(cfg.git.remote, "origin");
        assert_eq!(cfg.llm.provider, ProviderKind::Anthropic);
        assert!(cfg.llm.model.is_none());
    }

    #[test]
    fn project_config_parse_from_toml() {
        let toml_str = r#"
[git]
min_files_for_auto_commit_push = 5
auto_push = true
push_endpoint = "http://localhost:3001"

[llm]
provider = "openrouter"
model = "anthropic/claude-3.5-haiku"
openrouter_api_key = "or-key"
"#;
        let cfg: ProjectConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.git.min_files_for_auto_commit_push, 5);
        assert!(cfg.git.auto_push);
        assert!(cfg.git.auto_commit);
        assert_eq!(cfg.git.push_endpoint.as_deref(), Some("http://localhost:3001"));
        assert_eq!(cfg.llm.provider, ProviderKind::OpenRouter);
        assert_eq!(cfg.llm.openrouter_api_key.as_deref(), Some("or-key"));
    }

    #[test]
    fn project_config_provider_names() {
        let cfg: ProjectConfig = toml::from_str("[llm]\nprovider = \"openai\"\n").unwrap();
        assert_eq!(cfg.llm.provider, ProviderKind::OpenAi);
    }

    #[test]
    fn project_config_saved_under_kibitz_dir() {
        let dir = TempDir::new().unwrap();
        let cfg = ProjectConfig {
            git: GitConfig { auto_commit: false, ..GitConfig::default() },
            ..ProjectConfig::default()
        };
        cfg.save(dir.path()).unwrap();

        let expected_path = dir.path().join(".kibitz").join("project.toml");
        assert!(expected_path.exists());
        assert_eq!(ProjectConfig::load(dir.path()), cfg);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&expected_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn project_config_unparsable_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let path = project_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "git = [not toml").unwrap();

        assert_eq!(ProjectConfig::load(dir.path()), ProjectConfig::default());
        assert!(ProjectConfig::load_from(&path).is_err());
    }

    #[test]
    fn global_dir_is_under_home() {
        if let Some(dir) = global_dir() {
            assert!(dir.ends_with(".kibitz"));
        }
    }
}
