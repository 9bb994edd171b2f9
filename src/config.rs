//! Build configuration module.
//!
//! Handles loading and validating `revsite.toml`. Every option has a stock
//! default, so a missing file builds the conventional layout:
//!
//! ```text
//! src/
//! ├── images/            # → build/dist/img/   (hashed, manifested)
//! ├── css/               # → build/dist/css/   (hashed, manifested)
//! ├── js/                # → build/dist/js/    (hashed, manifested)
//! ├── pages/             # → build/dist/       (copied, rewritten)
//! └── static/            # → build/dist/       (copied, rewritten)
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! source_dir = "src"
//! output_dir = "build/dist"
//! temp_dir = "build/.tmp"
//! hash_length = 10          # hex characters of the content token (6-64)
//!
//! [[assets]]
//! name = "images"
//! source = "images"         # relative to source_dir
//! output = "img"            # relative to output_dir
//! include = ["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"]
//! webp = true               # also publish a .webp of every png/jpg
//! command = []              # external tool: bytes on stdin, result on stdout
//!
//! [[assets]]
//! name = "styles"
//! source = "css"
//! output = "css"
//! include = ["css"]
//!
//! [[assets]]
//! name = "scripts"
//! source = "js"
//! output = "js"
//! include = ["js", "mjs"]
//!
//! [copy]
//! dirs = ["pages", "static"]
//!
//! [rewrite]
//! extensions = ["html", "css", "js", "mjs", "xml", "json", "webmanifest", "webapp", "handlebars"]
//! order = ["images", "styles", "scripts"]
//!
//! [sitemap]
//! enabled = true
//! base_url = "http://localhost:8083"
//! exclude = ["404.html"]
//!
//! [serve]
//! interface = "127.0.0.1"
//! port = 8083
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Declaring any `[[assets]]` table replaces the stock class list entirely.
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `revsite.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Root of the pre-rendered input tree.
    pub source_dir: PathBuf,
    /// Published output tree. Wiped by the `clean` stage.
    pub output_dir: PathBuf,
    /// Intermediate files: page index and build status.
    pub temp_dir: PathBuf,
    /// Number of hex characters in a content token.
    pub hash_length: usize,
    /// Asset classes, hashed and manifested in this order.
    pub assets: Vec<AssetClassConfig>,
    pub copy: CopyConfig,
    pub rewrite: RewriteConfig,
    pub sitemap: SitemapConfig,
    pub serve: ServeConfig,
    pub processing: ProcessingConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src"),
            output_dir: PathBuf::from("build/dist"),
            temp_dir: PathBuf::from("build/.tmp"),
            hash_length: 10,
            assets: default_asset_classes(),
            copy: CopyConfig::default(),
            rewrite: RewriteConfig::default(),
            sitemap: SitemapConfig::default(),
            serve: ServeConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

/// Stage names the pipeline uses itself; asset classes cannot take them.
pub const RESERVED_STAGE_NAMES: &[&str] = &["clean", "copy", "rewrite", "sitemap"];

impl SiteConfig {
    /// Validate config values are within acceptable ranges and that every
    /// cross-reference (rewrite order → asset class) resolves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(6..=64).contains(&self.hash_length) {
            return Err(ConfigError::Validation(
                "hash_length must be between 6 and 64".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut outputs = HashSet::new();
        for class in &self.assets {
            if class.name.is_empty() {
                return Err(ConfigError::Validation(
                    "assets.name must not be empty".into(),
                ));
            }
            if RESERVED_STAGE_NAMES.contains(&class.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "asset class '{}' would shadow the stage of the same name",
                    class.name
                )));
            }
            if !names.insert(class.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate asset class '{}'",
                    class.name
                )));
            }
            if class.output.trim_matches('/').is_empty() {
                return Err(ConfigError::Validation(format!(
                    "assets.output of '{}' must name a subdirectory",
                    class.name
                )));
            }
            if !outputs.insert(class.output.trim_matches('/')) {
                return Err(ConfigError::Validation(format!(
                    "asset classes share output directory '{}'",
                    class.output
                )));
            }
            if class.include.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "assets.include of '{}' must not be empty",
                    class.name
                )));
            }
        }

        for name in &self.rewrite.order {
            if self.class(name).is_none() {
                return Err(ConfigError::Validation(format!(
                    "rewrite.order names unknown asset class '{name}'"
                )));
            }
        }

        if self.sitemap.enabled && self.sitemap.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sitemap.base_url must be set when the sitemap is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Look up an asset class by name.
    pub fn class(&self, name: &str) -> Option<&AssetClassConfig> {
        self.assets.iter().find(|c| c.name == name)
    }

    /// Resolve every configured directory against a project root.
    ///
    /// Relative paths in `revsite.toml` are relative to the directory holding
    /// the file, not to the process working directory.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        self.source_dir = root.join(&self.source_dir);
        self.output_dir = root.join(&self.output_dir);
        self.temp_dir = root.join(&self.temp_dir);
        self
    }
}

/// One asset class: a source directory whose files are hashed into an output
/// directory and recorded in that directory's `rev-manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AssetClassConfig {
    pub name: String,
    /// Source directory, relative to `source_dir`.
    pub source: String,
    /// Output directory, relative to `output_dir`. Also the path prefix of
    /// every manifest key of this class.
    pub output: String,
    /// File extensions (without dot, case-insensitive) belonging to the class.
    pub include: Vec<String>,
    /// Publish a lossless WebP derivative of every PNG/JPEG source.
    #[serde(default)]
    pub webp: bool,
    /// External tool run over each file: bytes on stdin, result on stdout.
    /// `{path}` in an argument is replaced by the source file path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl AssetClassConfig {
    fn new(name: &str, source: &str, output: &str, include: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            output: output.to_string(),
            include: include.iter().map(|s| s.to_string()).collect(),
            webp: false,
            command: Vec::new(),
        }
    }

    /// Whether `path` has one of this class's extensions.
    pub fn includes(&self, path: &Path) -> bool {
        has_extension(path, &self.include)
    }
}

fn default_asset_classes() -> Vec<AssetClassConfig> {
    vec![
        AssetClassConfig {
            webp: true,
            ..AssetClassConfig::new(
                "images",
                "images",
                "img",
                &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"],
            )
        },
        AssetClassConfig::new("styles", "css", "css", &["css"]),
        AssetClassConfig::new("scripts", "js", "js", &["js", "mjs"]),
    ]
}

/// Directories published into the output root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CopyConfig {
    /// Directories relative to `source_dir`.
    pub dirs: Vec<String>,
    /// External tool run over each file matching `command_include`, like an
    /// asset class `command`. Other files are copied unchanged.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Extensions (without dot, case-insensitive) that go through `command`.
    pub command_include: Vec<String>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            dirs: vec!["pages".into(), "static".into()],
            command: Vec::new(),
            command_include: vec!["html".into()],
        }
    }
}

/// Reference rewriting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewriteConfig {
    /// Extensions of rewrite-eligible files.
    pub extensions: Vec<String>,
    /// Asset classes whose manifests are applied, in order.
    pub order: Vec<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            extensions: [
                "html",
                "css",
                "js",
                "mjs",
                "xml",
                "json",
                "webmanifest",
                "webapp",
                "handlebars",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            order: vec!["images".into(), "styles".into(), "scripts".into()],
        }
    }
}

/// Page index and sitemap settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SitemapConfig {
    pub enabled: bool,
    /// Absolute site URL prefixed to every page path.
    pub base_url: String,
    /// Output-relative page paths left out of the sitemap.
    pub exclude: Vec<String>,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8083".into(),
            exclude: vec!["404.html".into()],
        }
    }
}

/// Static server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    pub interface: String,
    /// Overridden by the `PORT` environment variable.
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            interface: "127.0.0.1".into(),
            port: 8083,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Case-insensitive extension check against a list of dot-less extensions.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Load and validate a config file.
///
/// A missing file yields the stock defaults; an unreadable or malformed one
/// is an error. Relative directories are resolved against the file's parent.
pub fn load_config(path: &Path) -> Result<SiteConfig, ConfigError> {
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let config = if path.exists() {
        let content = fs::read_to_string(path)?;
        toml::from_str::<SiteConfig>(&content)?
    } else {
        SiteConfig::default()
    };
    config.validate()?;
    Ok(config.rooted_at(root))
}

/// A documented `revsite.toml` with every option at its stock value.
pub fn stock_config_toml() -> &'static str {
    r#"# revsite configuration
# All options are optional - the values below are the defaults.

# Root of the pre-rendered input tree
source_dir = "src"
# Published output tree (wiped by `revsite clean`)
output_dir = "build/dist"
# Page index and build status
temp_dir = "build/.tmp"
# Hex characters of the content token inserted into file names (6-64)
hash_length = 10

# Asset classes are hashed in this order. Text assets of a class are
# rewritten against the manifests of every earlier class before hashing.
# Declaring any [[assets]] table replaces this list entirely.
[[assets]]
name = "images"
source = "images"
output = "img"
include = ["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"]
# Also publish a lossless .webp of every png/jpg
webp = true

[[assets]]
name = "styles"
source = "css"
output = "css"
include = ["css"]
# External tool: file bytes on stdin, result on stdout
# command = ["npx", "postcss", "--use", "autoprefixer"]

[[assets]]
name = "scripts"
source = "js"
output = "js"
include = ["js", "mjs"]

[copy]
# Directories copied into the output root (then rewritten)
dirs = ["pages", "static"]
# External tool for pages, same contract as an asset class command
# command = ["npx", "html-minifier-terser", "--collapse-whitespace"]
# Extensions that go through the command
command_include = ["html"]

[rewrite]
# Files with these extensions have asset references rewritten
extensions = ["html", "css", "js", "mjs", "xml", "json", "webmanifest", "webapp", "handlebars"]
# Manifests applied in this order
order = ["images", "styles", "scripts"]

[sitemap]
enabled = true
base_url = "http://localhost:8083"
exclude = ["404.html"]

[serve]
interface = "127.0.0.1"
# The PORT environment variable takes precedence
port = 8083

[processing]
# Maximum parallel workers (omit for auto = CPU cores)
# max_processes = 4
"#
}
