//! Build orchestration: an explicit stage graph with artifact barriers.
//!
//! Every stage declares the artifacts it requires and the ones it produces.
//! [`plan`] derives the graph from the configuration:
//!
//! ```text
//! clean ──► images ──► styles ──► scripts ──┐
//!   │         (Manifest(images), ...)        ├──► rewrite ──► sitemap
//!   └──────────────► copy (Targets) ─────────┘
//! ```
//!
//! - One asset stage per configured class, in config order. A class requires
//!   the manifest of every earlier class, because its text assets are
//!   rewritten against them before being hashed.
//! - `rewrite` requires the published targets and the manifest of every
//!   class named in `rewrite.order`: it can only start once all hashing that
//!   feeds it has finished.
//!
//! [`Pipeline::run_all`] executes the stages sequentially and checks each
//! stage's requirements against what has been produced so far. The first
//! error aborts the build. [`Pipeline::run_stage`] runs a single stage and
//! satisfies its requirements from the earlier stages recorded as completed
//! in `<temp_dir>/build-status.json`, loading their manifests from disk. A
//! manifest whose stage is no longer recorded is ignored even if the file is
//! still there.

use crate::assets::{self, AssetContext, AssetError, AssetReport};
use crate::config::SiteConfig;
use crate::copy::{self, CopyError, CopyReport};
use crate::fsutil;
use crate::manifest::{ManifestError, RevManifest};
use crate::rewrite::{self, RewriteError, RewriteOptions, RewriteReport};
use crate::sitemap::{self, SitemapError, SitemapReport};
use crate::transform::{self, Transform, TransformError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the build status inside the temp directory.
pub const STATUS_FILENAME: &str = "build-status.json";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stage '{stage}' requires {artifact}, which has not been produced")]
    MissingArtifact { stage: String, artifact: Artifact },
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
    #[error("malformed build status: {0}")]
    Status(#[from] serde_json::Error),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Sitemap(#[from] SitemapError),
}

/// Something a stage leaves behind for later stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// A fresh, empty output directory.
    Clean,
    /// The emitted manifest of one asset class.
    Manifest(String),
    /// Pages and static files published into the output root.
    Targets,
    /// References across the output tree point at hashed assets.
    Rewritten,
    Sitemap,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Clean => write!(f, "a clean output directory"),
            Artifact::Manifest(class) => write!(f, "the '{class}' manifest"),
            Artifact::Targets => write!(f, "the copied pages"),
            Artifact::Rewritten => write!(f, "rewritten references"),
            Artifact::Sitemap => write!(f, "the sitemap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    Clean,
    Assets(String),
    Copy,
    Rewrite,
    Sitemap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    pub requires: Vec<Artifact>,
    pub produces: Vec<Artifact>,
}

/// Derive the stage graph, in execution order.
pub fn plan(config: &SiteConfig) -> Vec<Stage> {
    let mut stages = vec![Stage {
        name: "clean".into(),
        kind: StageKind::Clean,
        requires: vec![],
        produces: vec![Artifact::Clean],
    }];

    let mut earlier = Vec::new();
    for class in &config.assets {
        let mut requires = vec![Artifact::Clean];
        requires.extend(earlier.iter().cloned());
        let manifest = Artifact::Manifest(class.name.clone());
        stages.push(Stage {
            name: class.name.clone(),
            kind: StageKind::Assets(class.name.clone()),
            requires,
            produces: vec![manifest.clone()],
        });
        earlier.push(manifest);
    }

    stages.push(Stage {
        name: "copy".into(),
        kind: StageKind::Copy,
        requires: vec![Artifact::Clean],
        produces: vec![Artifact::Targets],
    });

    let mut requires = vec![Artifact::Targets];
    requires.extend(
        config
            .rewrite
            .order
            .iter()
            .map(|name| Artifact::Manifest(name.clone())),
    );
    stages.push(Stage {
        name: "rewrite".into(),
        kind: StageKind::Rewrite,
        requires,
        produces: vec![Artifact::Rewritten],
    });

    if config.sitemap.enabled {
        stages.push(Stage {
            name: "sitemap".into(),
            kind: StageKind::Sitemap,
            requires: vec![Artifact::Rewritten],
            produces: vec![Artifact::Sitemap],
        });
    }
    stages
}

/// Persisted outcome of the most recent build, read by `serve` and by
/// single-stage runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Completed stages, in execution order.
    pub completed: Vec<String>,
    /// Set only when a full build ran every stage.
    pub success: bool,
    pub failed_stage: Option<String>,
}

impl BuildStatus {
    pub fn path_in(temp_dir: &Path) -> PathBuf {
        temp_dir.join(STATUS_FILENAME)
    }

    /// Load the status, or `None` if no build has recorded one.
    pub fn load(temp_dir: &Path) -> Result<Option<Self>, PipelineError> {
        let path = Self::path_in(temp_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, temp_dir: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)?;
        fsutil::write_atomic(&Self::path_in(temp_dir), json.as_bytes())?;
        Ok(())
    }
}

/// What one stage did, for display.
#[derive(Debug, Clone)]
pub enum StageReport {
    Clean { output_dir: PathBuf, removed: bool },
    Assets(AssetReport),
    Copy(CopyReport),
    Rewrite(RewriteReport),
    Sitemap(SitemapReport),
}

#[derive(Default)]
struct BuildState {
    available: HashSet<Artifact>,
    manifests: BTreeMap<String, RevManifest>,
}

/// Runs the stage graph for one configuration.
pub struct Pipeline<'a> {
    config: &'a SiteConfig,
    stages: Vec<Stage>,
    overrides: HashMap<String, Box<dyn Transform>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a SiteConfig) -> Self {
        Self {
            config,
            stages: plan(config),
            overrides: HashMap::new(),
        }
    }

    /// Use `transform` for an asset class (or for `"copy"`) instead of its
    /// configured command.
    pub fn with_transform(mut self, class: impl Into<String>, transform: Box<dyn Transform>) -> Self {
        self.overrides.insert(class.into(), transform);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in order, stopping at the first failure.
    pub fn run_all(
        &self,
        mut on_stage: impl FnMut(&Stage, &StageReport),
    ) -> Result<BuildStatus, PipelineError> {
        let temp_dir = &self.config.temp_dir;
        let mut status = BuildStatus::default();
        status.save(temp_dir)?;

        let mut state = BuildState::default();
        for stage in &self.stages {
            let report = match self.execute(stage, &mut state) {
                Ok(report) => report,
                Err(e) => {
                    status.failed_stage = Some(stage.name.clone());
                    status.save(temp_dir)?;
                    return Err(e);
                }
            };
            status.completed.push(stage.name.clone());
            status.save(temp_dir)?;
            on_stage(stage, &report);
        }

        status.success = true;
        status.save(temp_dir)?;
        tracing::info!(stages = status.completed.len(), "build complete");
        Ok(status)
    }

    /// Run the stage called `name` against the results of earlier runs.
    ///
    /// Completed stages that follow `name` in the graph are dropped from the
    /// recorded status, since rerunning `name` may invalidate them.
    pub fn run_stage(
        &self,
        name: &str,
        mut on_stage: impl FnMut(&Stage, &StageReport),
    ) -> Result<BuildStatus, PipelineError> {
        let position = self
            .stages
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let stage = &self.stages[position];

        let temp_dir = &self.config.temp_dir;
        let mut status = BuildStatus::load(temp_dir)?.unwrap_or_default();
        let earlier: Vec<&str> = self.stages[..position].iter().map(|s| s.name.as_str()).collect();
        status.completed.retain(|s| earlier.contains(&s.as_str()));
        status.success = false;
        status.failed_stage = None;
        let mut state = self.resume(&status)?;

        match self.execute(stage, &mut state) {
            Ok(report) => {
                status.completed.push(stage.name.clone());
                status.save(temp_dir)?;
                on_stage(stage, &report);
                Ok(status)
            }
            Err(e) => {
                status.failed_stage = Some(stage.name.clone());
                status.save(temp_dir)?;
                Err(e)
            }
        }
    }

    /// Reconstruct available artifacts from the stages `status` records as
    /// completed.
    fn resume(&self, status: &BuildStatus) -> Result<BuildState, PipelineError> {
        let mut state = BuildState::default();
        for stage in &self.stages {
            if status.completed.contains(&stage.name) {
                state.available.extend(stage.produces.iter().cloned());
            }
        }
        // A manifest on disk counts only when the stage that wrote it is
        // still recorded as completed.
        for class in &self.config.assets {
            let artifact = Artifact::Manifest(class.name.clone());
            if !state.available.contains(&artifact) {
                continue;
            }
            let dir = fsutil::join_slash(&self.config.output_dir, class.output.trim_matches('/'));
            if RevManifest::path_in(&dir).is_file() {
                state.manifests.insert(class.name.clone(), RevManifest::load(&dir)?);
            } else {
                state.available.remove(&artifact);
            }
        }
        Ok(state)
    }

    fn execute(&self, stage: &Stage, state: &mut BuildState) -> Result<StageReport, PipelineError> {
        if let Some(missing) = stage.requires.iter().find(|a| !state.available.contains(a)) {
            return Err(PipelineError::MissingArtifact {
                stage: stage.name.clone(),
                artifact: missing.clone(),
            });
        }
        tracing::debug!(stage = %stage.name, "running stage");

        let report = match &stage.kind {
            StageKind::Clean => self.clean(state)?,
            StageKind::Assets(class) => self.assets(class, state)?,
            StageKind::Copy => self.copy()?,
            StageKind::Rewrite => self.rewrite(state)?,
            StageKind::Sitemap => StageReport::Sitemap(sitemap::build_sitemap(self.config)?),
        };
        state.available.extend(stage.produces.iter().cloned());
        Ok(report)
    }

    fn clean(&self, state: &mut BuildState) -> Result<StageReport, PipelineError> {
        let output_dir = &self.config.output_dir;
        let removed = output_dir.exists();
        if removed {
            std::fs::remove_dir_all(output_dir)?;
        }
        std::fs::create_dir_all(output_dir)?;
        std::fs::create_dir_all(&self.config.temp_dir)?;
        // Everything derived from the old output is gone.
        *state = BuildState::default();
        Ok(StageReport::Clean {
            output_dir: output_dir.clone(),
            removed,
        })
    }

    fn assets(&self, name: &str, state: &mut BuildState) -> Result<StageReport, PipelineError> {
        let Some(class) = self.config.class(name) else {
            return Err(PipelineError::UnknownStage(name.to_string()));
        };

        let earlier: Vec<&RevManifest> = self
            .config
            .assets
            .iter()
            .take_while(|c| c.name != name)
            .filter_map(|c| state.manifests.get(&c.name))
            .collect();

        let configured;
        let transform: &dyn Transform = match self.overrides.get(name) {
            Some(t) => t.as_ref(),
            None => {
                configured = transform::for_command(&class.command)?;
                configured.as_ref()
            }
        };

        let ctx = AssetContext {
            source_dir: &self.config.source_dir,
            output_dir: &self.config.output_dir,
            hash_length: self.config.hash_length,
            rewrite_extensions: &self.config.rewrite.extensions,
            earlier: &earlier,
            transform,
        };
        let (manifest, report) = assets::process_class(class, &ctx)?;
        state.manifests.insert(name.to_string(), manifest);
        Ok(StageReport::Assets(report))
    }

    fn copy(&self) -> Result<StageReport, PipelineError> {
        let configured;
        let transform: Option<&dyn Transform> = match self.overrides.get("copy") {
            Some(t) => Some(t.as_ref()),
            None if self.config.copy.command.is_empty() => None,
            None => {
                configured = transform::for_command(&self.config.copy.command)?;
                Some(configured.as_ref())
            }
        };
        let report = copy::copy_dirs(
            &self.config.source_dir,
            &self.config.copy,
            &self.config.output_dir,
            transform,
        )?;
        Ok(StageReport::Copy(report))
    }

    fn rewrite(&self, state: &BuildState) -> Result<StageReport, PipelineError> {
        let manifests: Vec<&RevManifest> = self
            .config
            .rewrite
            .order
            .iter()
            .filter_map(|name| state.manifests.get(name))
            .collect();
        let asset_dirs: Vec<String> = self
            .config
            .assets
            .iter()
            .map(|c| c.output.trim_matches('/').to_string())
            .collect();
        let options = RewriteOptions {
            extensions: &self.config.rewrite.extensions,
            asset_dirs: &asset_dirs,
        };
        let report = rewrite::rewrite_tree(&self.config.output_dir, &manifests, &options)?;
        Ok(StageReport::Rewrite(report))
    }
}
