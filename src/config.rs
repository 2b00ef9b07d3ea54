//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. The `--config` command-line path
//! 2. `$EML2PDF_CONFIG` (environment variable)
//! 3. `~/.config/eml2pdf/config.toml` (Linux/macOS)
//!    `%APPDATA%\eml2pdf\config.toml` (Windows)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Body layout settings.
    pub render: RenderConfig,
    /// Office conversion engine settings.
    pub office: OfficeConfig,
    /// Raster export settings.
    pub raster: RasterConfig,
    /// Failure policies.
    pub policy: PolicyConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Number of messages converted in parallel (0 = available parallelism).
    pub jobs: usize,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
}

/// Which layout engine renders the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    /// WeasyPrint when it is installed, the built-in engine otherwise.
    Auto,
    /// The built-in flow layout engine.
    Builtin,
    /// The external WeasyPrint engine.
    Weasyprint,
}

/// Body layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Layout engine selection.
    pub engine: EngineChoice,
    /// Page margin on every side, in millimetres.
    pub margin_mm: f32,
    /// Print a From/To/Date/Subject block above the body.
    pub header_block: bool,
    /// WeasyPrint executable (name on `PATH` or absolute path).
    pub weasyprint_path: PathBuf,
    /// Timeout for one WeasyPrint run.
    pub timeout_secs: u64,
    /// TrueType font for text outside Latin-1. Searched among system fonts if unset.
    pub unicode_font: Option<PathBuf>,
    /// Download `http(s)` images referenced by HTML bodies and embed them.
    pub fetch_remote_images: bool,
    /// Timeout for one image download.
    pub fetch_timeout_secs: u64,
    /// Downloads larger than this are dropped.
    pub fetch_max_bytes: u64,
}

/// Office conversion engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficeConfig {
    /// `soffice` executable. Searched on `PATH` and in the usual install locations if unset.
    pub soffice_path: Option<PathBuf>,
    /// Timeout for one conversion attempt.
    pub timeout_secs: u64,
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Host-wide lock file serializing conversions across processes.
    /// Defaults to `eml2pdf-office.lock` in the system temp directory.
    pub lock_file: Option<PathBuf>,
    /// Give up waiting for the lock after this long.
    pub lock_wait_secs: u64,
}

/// Raster export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Ghostscript executable.
    pub gs_path: PathBuf,
    /// Resolution of the exported frames.
    pub dpi: u32,
    /// Timeout for one rasterization run.
    pub timeout_secs: u64,
}

/// What to do with attachments no converter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedPolicy {
    /// Insert a placeholder page naming the attachment.
    Placeholder,
    /// Leave the attachment out of the document.
    Skip,
}

/// Failure policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Exit non-zero when any attachment was replaced by a placeholder.
    pub fail_on_placeholder: bool,
    /// Handling of unsupported attachment types.
    pub unsupported: UnsupportedPolicy,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            jobs: 0,
            cache_dir: None,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            engine: EngineChoice::Auto,
            margin_mm: 20.0,
            header_block: true,
            weasyprint_path: PathBuf::from("weasyprint"),
            timeout_secs: 60,
            unicode_font: None,
            fetch_remote_images: false,
            fetch_timeout_secs: 10,
            fetch_max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            soffice_path: None,
            timeout_secs: 60,
            retries: 1,
            lock_file: None,
            lock_wait_secs: 1800,
        }
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            gs_path: PathBuf::from("gs"),
            dpi: 200,
            timeout_secs: 120,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            fail_on_placeholder: false,
            unsupported: UnsupportedPolicy::Placeholder,
        }
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl OfficeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolved path of the host-wide lock file.
    pub fn lock_file_path(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("eml2pdf-office.lock"))
    }
}

impl RasterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// A loaded configuration, where it came from, and any problem met on the way.
///
/// Loading happens before logging is set up, so nothing is logged here;
/// call [`LoadedConfig::log`] once a subscriber exists.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: Option<PathBuf>,
    pub warning: Option<String>,
}

impl LoadedConfig {
    pub fn log(&self) {
        if let Some(path) = &self.path {
            tracing::info!(path = %path.display(), "Loaded config");
        }
        if let Some(warning) = &self.warning {
            tracing::warn!("{warning}, using defaults");
        }
    }
}

/// Load configuration, searching standard locations.
///
/// An explicit path that cannot be read or parsed is an error; the standard
/// locations fall back to defaults with a warning.
pub fn load_config(explicit: Option<&Path>) -> crate::error::Result<LoadedConfig> {
    if let Some(path) = explicit {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::error::Error::io(path, e))?;
        let config = toml::from_str::<Config>(&contents)
            .map_err(|e| crate::error::Error::Config(format!("{}: {e}", path.display())))?;
        return Ok(LoadedConfig {
            config,
            path: Some(path.to_path_buf()),
            warning: None,
        });
    }
    Ok(load_standard(config_file_path()))
}

fn load_standard(path: Option<PathBuf>) -> LoadedConfig {
    let defaults = |warning| LoadedConfig {
        config: Config::default(),
        path: None,
        warning,
    };
    let Some(path) = path.filter(|p| p.exists()) else {
        return defaults(None);
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(config) => LoadedConfig {
                config,
                path: Some(path),
                warning: None,
            },
            Err(e) => defaults(Some(format!(
                "Failed to parse config {}: {e}",
                path.display()
            ))),
        },
        Err(e) => defaults(Some(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))),
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("EML2PDF_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("eml2pdf").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eml2pdf")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("eml2pdf.log")
}
