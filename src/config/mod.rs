//! Configuration management for reforge
//!
//! A single optional TOML file configures the engine. It is looked up in this
//! order:
//!
//! 1. the path in `REFORGE_CONFIG_PATH`
//! 2. `<install_dir>/reforge.toml`
//! 3. built-in defaults
//!
//! Every field has a default, so a partial file only overrides what it names.
//!
//! ```toml
//! [upstream]
//! remote = "upstream"
//! url = "https://github.com/acme/service.git"
//! mainline = "main"
//!
//! [github]
//! owner = "acme"
//! repo = "service"
//! token = "ghp_xxx"
//!
//! [service]
//! port = 8087
//!
//! [[assets.entries]]
//! source = "config/Settings.json"
//! dest = "config/Settings.json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    BACKUP_DIR_NAME, CONFIG_FILE_NAME, CONFIG_PATH_ENV, DEFAULT_SERVICE_PORT, LEDGER_FILE_NAME,
    MAX_BACKUPS, SOURCE_DIR_NAME,
};
use crate::core::UpdaterError;

const DEFAULT_OWNER: &str = "reforge-dev";
const DEFAULT_REPO: &str = "service";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Upstream remote used for updates and PR fetches
    pub upstream: UpstreamConfig,
    /// Remote patch-metadata API
    pub github: GithubConfig,
    /// Local directory and file names
    pub paths: PathsConfig,
    /// Backup retention
    pub backup: BackupConfig,
    /// The managed service process
    pub service: ServiceConfig,
    /// External build toolchain
    pub build: BuildConfig,
    /// Runtime files staged next to a fresh build
    pub assets: AssetsConfig,
}

/// `[upstream]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Remote name added to the source repository
    pub remote: String,
    /// Fetch URL of the upstream repository
    pub url: String,
    /// Substring an existing remote URL must contain to be left alone.
    /// Defaults to `<owner>/<repo>` from `[github]`.
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub url_match: Option<String>,
    /// Branch updates merge from
    pub mainline: String,
    /// URL cloned when no source repository exists. Defaults to `url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            remote: "upstream".to_string(),
            url: format!("https://github.com/{DEFAULT_OWNER}/{DEFAULT_REPO}.git"),
            url_match: None,
            mainline: "main".to_string(),
            clone_url: None,
        }
    }
}

/// `[github]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// API root, without trailing slash
    pub api_base: String,
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Optional bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            owner: DEFAULT_OWNER.to_string(),
            repo: DEFAULT_REPO.to_string(),
            token: None,
            timeout_secs: crate::constants::api_timeout().as_secs(),
        }
    }
}

/// `[paths]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Managed clone directory, relative to the working directory
    pub source_dir_name: String,
    /// Backup directory, relative to the install directory
    pub backup_dir: String,
    /// Ledger file, relative to the install directory
    pub ledger_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir_name: SOURCE_DIR_NAME.to_string(),
            backup_dir: BACKUP_DIR_NAME.to_string(),
            ledger_file: LEDGER_FILE_NAME.to_string(),
        }
    }
}

/// `[backup]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Unique backups kept after a prune pass
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_backups: MAX_BACKUPS,
        }
    }
}

/// `[service]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Port the service listens on; the launcher waits for it to close
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVICE_PORT,
        }
    }
}

/// `[build]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Compiler version read with `<compiler> version`
    pub compiler: String,
    /// Obfuscating wrapper that performs the build
    pub obfuscator: String,
    /// Install hint shown when the obfuscator is missing
    pub obfuscator_hint: String,
    /// Package path passed to the build
    pub package: String,
    /// Link-time symbol prefix for embedded build identity
    pub version_symbol: String,
    /// Name of the variable that carries `obfuscation_scope`
    pub obfuscation_env: String,
    /// Package patterns the obfuscator rewrites
    pub obfuscation_scope: String,
    /// Argument template; see [`BuildConfig::render_args`]
    pub args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let module = format!("github.com/{DEFAULT_OWNER}/{DEFAULT_REPO}");
        Self {
            compiler: "go".to_string(),
            obfuscator: "garble".to_string(),
            obfuscator_hint: "Install with: go install mvdan.cc/garble@v0.14.2".to_string(),
            package: format!("./cmd/{DEFAULT_REPO}"),
            version_symbol: format!("{module}/internal/updater"),
            obfuscation_env: "GOGARBLE".to_string(),
            obfuscation_scope: format!("{module}/*,!{module}/internal/server*"),
            args: [
                "-literals=false",
                "-seed=random",
                "build",
                "-a",
                "-trimpath",
                "-tags",
                "static",
                "--ldflags",
                "-s -w -H windowsgui -X 'main.buildID={build_id}' -X 'main.buildTime={build_time}' \
                 -X '{version_symbol}.buildCommitHash={commit}' \
                 -X '{version_symbol}.buildCommitTime={commit_time}'",
                "-o",
                "{output}",
                "{package}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Values substituted into [`BuildConfig::args`].
#[derive(Debug, Clone, Default)]
pub struct BuildVars<'a> {
    /// `{build_id}`
    pub build_id: &'a str,
    /// `{build_time}`
    pub build_time: &'a str,
    /// `{commit}`
    pub commit: &'a str,
    /// `{commit_time}`
    pub commit_time: &'a str,
    /// `{output}`
    pub output: &'a str,
}

impl BuildConfig {
    /// Expands every placeholder in the argument template.
    #[must_use]
    pub fn render_args(&self, vars: &BuildVars<'_>) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{build_id}", vars.build_id)
                    .replace("{build_time}", vars.build_time)
                    .replace("{commit}", vars.commit)
                    .replace("{commit_time}", vars.commit_time)
                    .replace("{output}", vars.output)
                    .replace("{package}", &self.package)
                    .replace("{version_symbol}", &self.version_symbol)
            })
            .collect()
    }
}

/// `[assets]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Files and directories copied from the repository to the install dir
    pub entries: Vec<AssetEntry>,
}

/// One staged file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Path relative to the repository root
    pub source: String,
    /// Path relative to the install directory; may climb out with `..`
    pub dest: String,
    /// Replace files that already exist at the destination
    #[serde(default)]
    pub overwrite: bool,
    /// A failed copy is a warning instead of an error
    #[serde(default)]
    pub optional: bool,
}

impl AssetEntry {
    fn new(source: &str, dest: &str, overwrite: bool, optional: bool) -> Self {
        Self {
            source: source.to_string(),
            dest: dest.to_string(),
            overwrite,
            optional,
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            entries: vec![
                AssetEntry::new("tools", "tools", true, false),
                AssetEntry::new("config/Settings.json", "config/Settings.json", false, false),
                AssetEntry::new("config/service.yaml.dist", "config/service.yaml", false, false),
                AssetEntry::new("config/template", "config/template", true, false),
                AssetEntry::new("assets", "../assets", true, false),
                AssetEntry::new("README.md", "README.md", true, true),
            ],
        }
    }
}

impl UpdaterConfig {
    /// Loads the configuration for an installation.
    ///
    /// Uses `REFORGE_CONFIG_PATH` when set, else `<install_dir>/reforge.toml`
    /// when present, else defaults.
    ///
    /// # Errors
    ///
    /// Fails when the chosen file exists but cannot be read or parsed. A
    /// `REFORGE_CONFIG_PATH` pointing at a missing file is an error.
    pub fn load(install_dir: &Path) -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return Self::load_from(Path::new(&path));
            }
        }

        let path = install_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, install_dir.display());
            Ok(Self::default())
        }
    }

    /// Loads the configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).map_err(|e| {
            UpdaterError::ConfigParse {
                file: path.display().to_string(),
                reason: e.message().to_string(),
            }
            .into()
        })
    }

    /// `<remote>/<mainline>`, the ref updates merge.
    #[must_use]
    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.upstream.remote, self.upstream.mainline)
    }

    /// The fragment an existing upstream URL must contain.
    #[must_use]
    pub fn upstream_match(&self) -> String {
        self.upstream
            .url_match
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.github.owner, self.github.repo))
    }

    /// URL cloned into the managed source directory.
    #[must_use]
    pub fn clone_url(&self) -> &str {
        self.upstream.clone_url.as_deref().unwrap_or(&self.upstream.url)
    }

    /// Backup directory under `install_dir`.
    #[must_use]
    pub fn backup_dir(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(&self.paths.backup_dir)
    }

    /// Ledger path under `install_dir`.
    #[must_use]
    pub fn ledger_path(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(&self.paths.ledger_file)
    }

    /// Remote API request timeout.
    #[must_use]
    pub const fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.github.timeout_secs)
    }
}
