//! Ignore filters for the watched root.
//!
//! Files matching these filters are never classified, moved, or reported:
//! browsers and download managers park partial files next to the finished
//! ones, and those must not be sorted half-written.
//!
//! # Filter File Format
//!
//! ```toml
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["Thumbs.db"]
//! patterns = ["~$*"]
//! extensions = ["crdownload", "part", "tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Filter file looked up inside the watched root.
pub const ROOT_FILTER_FILE: &str = ".tidywatch.toml";

/// Extensions of in-progress downloads excluded by default.
const PARTIAL_DOWNLOAD_EXTENSIONS: [&str; 3] = ["crdownload", "part", "tmp"];

/// Errors that can occur while loading or compiling filters.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("filter file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("invalid filter file {}: {reason}", .path.display())]
    ConfigInvalid { path: PathBuf, reason: String },
    #[error("invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },
    #[error("failed to read filter file {}: {reason}", .path.display())]
    IoError { path: PathBuf, reason: String },
}

/// Top-level filter document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub filters: FilterRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether dot-files are considered at all. Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Whitelist that overrides every exclude rule.
    #[serde(default)]
    pub include: IncludeRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact file names.
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the file name.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions without the leading dot, case-insensitive.
    #[serde(default)]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub regex: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl FilterConfig {
    /// Loads the filters for `root`.
    ///
    /// Lookup order:
    /// 1. `explicit`, when given (must exist)
    /// 2. `<root>/.tidywatch.toml`
    /// 3. `~/.config/tidywatch/filters.toml`
    /// 4. built-in defaults
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        let local = root.join(ROOT_FILTER_FILE);
        if local.exists() {
            return Self::load_from_file(&local);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("tidywatch")
                .join("filters.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        debug!("loading filters from {}", path.display());
        toml::from_str(&content).map_err(|e| ConfigError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Compiles patterns once so per-file checks stay cheap.
    pub fn compile(self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self.filters)
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filters: FilterRules {
                enable_hidden_files: false,
                exclude: ExcludeRules {
                    extensions: PARTIAL_DOWNLOAD_EXTENSIONS
                        .iter()
                        .map(|e| e.to_string())
                        .collect(),
                    ..ExcludeRules::default()
                },
                include: IncludeRules::default(),
            },
        }
    }
}

/// Pre-compiled filter rules.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Whether a top-level file named `file_name` should be organized.
    ///
    /// Include patterns win; then hidden files, exact names, extensions,
    /// globs and regexes exclude in that order.
    pub fn should_include(&self, file_name: &str) -> bool {
        if self.include_patterns.iter().any(|p| p.matches(file_name)) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name) {
            return false;
        }

        if let Some(ext) = Path::new(file_name).extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.exclude_patterns.iter().any(|p| p.matches(file_name)) {
            return false;
        }

        !self.exclude_regexes.iter().any(|r| r.is_match(file_name))
    }
}

impl Default for CompiledFilters {
    fn default() -> Self {
        // The built-in patterns are all literals and always compile.
        let rules = FilterConfig::default().filters;
        Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: HashSet::new(),
            exclude_extensions: rules.exclude.extensions.into_iter().collect(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}
