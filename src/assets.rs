//! Asset class processing: transform, hash, publish and manifest one class.
//!
//! For every file of a class this stage:
//!
//! 1. reads the source bytes,
//! 2. runs the class's [`Transform`] (pass-through unless a command is
//!    configured),
//! 3. rewrites references to assets of *earlier* classes, when the file is
//!    rewrite-eligible text, so that a stylesheet's `url(/img/bg.png)` already
//!    points at the hashed image before the stylesheet's own hash is taken,
//! 4. settles references *within* the class: hash every file, rewrite each
//!    text file against the class's own hashed names, rehash, and repeat
//!    until no token changes (`@import url(/css/reset.css)` then names the
//!    reset stylesheet's final token, and the importer's token covers that),
//! 5. writes the final bytes to
//!    `<output_dir>/<class.output>/<name>.<token>.<ext>`,
//!
//! and finally records every (original → hashed) pair and emits the class's
//! `rev-manifest.json`.
//!
//! A file that references itself, directly or through a cycle, can never
//! carry a token of its own final bytes. Such a class fails with
//! [`AssetError::ReferenceCycle`].
//!
//! ## Output Structure
//!
//! ```text
//! build/dist/img/
//! ├── rev-manifest.json
//! ├── logo.0a1b2c3d4e.png
//! ├── logo.5f6e7d8c9b.webp        # WebP derivative (when `webp = true`)
//! └── icons/menu.3f2a9c01be.svg
//! ```
//!
//! ## Parallel Processing
//!
//! Steps 1–3 and 5 run on rayon's pool, and each settling round rewrites in
//! parallel. Results are recorded afterwards in sorted source order, which
//! keeps the manifest (and any duplicate-key resolution) deterministic.

use crate::config::{AssetClassConfig, has_extension};
use crate::fsutil;
use crate::hash::{content_token, hashed_path};
use crate::manifest::{ManifestError, ManifestRecorder, RevManifest};
use crate::rewrite::rewrite_text;
use crate::transform::{Transform, TransformError, WebpEncoder};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("cannot read asset {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write asset {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot list {path}: {source}")]
    Walk {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("{0} is rewrite-eligible but not valid UTF-8 text")]
    NotText(PathBuf),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("references between {class} assets never settle: {}", files.join(", "))]
    ReferenceCycle { class: String, files: Vec<String> },
}

/// Everything the stage needs besides the class itself.
pub struct AssetContext<'a> {
    pub source_dir: &'a Path,
    pub output_dir: &'a Path,
    pub hash_length: usize,
    /// Extensions of text files whose references are rewritten before hashing.
    pub rewrite_extensions: &'a [String],
    /// Manifests of the classes processed before this one, in order.
    pub earlier: &'a [&'a RevManifest],
    pub transform: &'a dyn Transform,
}

/// One published asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedAsset {
    pub original: String,
    pub hashed: String,
    /// Generated from another source (WebP derivative).
    pub derivative: bool,
    /// References to earlier classes and to this class replaced before
    /// hashing.
    pub rewrites: usize,
    /// Published size in bytes.
    pub size: u64,
}

/// Result of processing one class.
#[derive(Debug, Clone)]
pub struct AssetReport {
    pub class: String,
    /// Published assets in manifest order.
    pub assets: Vec<PublishedAsset>,
    pub duplicates: Vec<String>,
    pub manifest_path: PathBuf,
    /// The class's source directory did not exist.
    pub missing_source: bool,
}

struct Job {
    source: PathBuf,
    original: String,
    derivative: bool,
}

fn plan_jobs(class: &AssetClassConfig, src_root: &Path, files: &[PathBuf]) -> Vec<Job> {
    let prefix = class.output.trim_matches('/');
    let mut jobs: Vec<Job> = files
        .iter()
        .filter_map(|path| {
            let rel = fsutil::slash_path(path, src_root)?;
            Some(Job {
                source: path.clone(),
                original: format!("{prefix}/{rel}"),
                derivative: false,
            })
        })
        .collect();

    if class.webp {
        let taken: HashSet<String> = jobs.iter().map(|j| j.original.clone()).collect();
        let derivatives: Vec<Job> = jobs
            .iter()
            .filter(|j| WebpEncoder::accepts(&j.source))
            .filter_map(|j| {
                let stem_end = j.original.rfind('.')?;
                let original = format!("{}.webp", &j.original[..stem_end]);
                if taken.contains(&original) {
                    tracing::debug!(path = %original, "source file shadows WebP derivative");
                    return None;
                }
                Some(Job {
                    source: j.source.clone(),
                    original,
                    derivative: true,
                })
            })
            .collect();
        jobs.extend(derivatives);
    }

    jobs.sort_by(|a, b| a.original.cmp(&b.original));
    jobs
}

/// A job's bytes after transform and the earlier-class rewrite, before its
/// own class is settled.
enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    fn bytes(&self) -> &[u8] {
        match self {
            Content::Text(text) => text.as_bytes(),
            Content::Binary(bytes) => bytes,
        }
    }
}

struct Prepared {
    content: Content,
    rewrites: usize,
}

fn prepare(job: &Job, ctx: &AssetContext<'_>) -> Result<Prepared, AssetError> {
    let bytes = std::fs::read(&job.source).map_err(|source| AssetError::Read {
        path: job.source.clone(),
        source,
    })?;
    let bytes = if job.derivative {
        WebpEncoder.process(&job.source, bytes)?
    } else {
        ctx.transform.process(&job.source, bytes)?
    };

    if job.derivative || !has_extension(Path::new(&job.original), ctx.rewrite_extensions) {
        return Ok(Prepared {
            content: Content::Binary(bytes),
            rewrites: 0,
        });
    }
    let text = String::from_utf8(bytes).map_err(|_| AssetError::NotText(job.source.clone()))?;
    Ok(match rewrite_text(&text, ctx.earlier) {
        Some((rewritten, count)) => Prepared {
            content: Content::Text(rewritten),
            rewrites: count,
        },
        None => Prepared {
            content: Content::Text(text),
            rewrites: 0,
        },
    })
}

/// Final bytes of every job once references inside the class point at
/// hashed names whose tokens cover the referencing file's final bytes.
struct Settled {
    bytes: Vec<Vec<u8>>,
    rewrites: Vec<usize>,
    tokens: Vec<String>,
}

/// Hash, rewrite against the class's own names, rehash, until no token
/// changes. A chain of `n` files settles within `n + 1` rounds; anything
/// still moving after that references itself, directly or in a cycle.
fn settle(
    class: &str,
    jobs: &[Job],
    prepared: Vec<Prepared>,
    hash_length: usize,
) -> Result<Settled, AssetError> {
    let token_of = |bytes: &[u8]| content_token(bytes, hash_length);
    let mut tokens: Vec<String> = prepared.iter().map(|p| token_of(p.content.bytes())).collect();
    let has_text = prepared.iter().any(|p| matches!(p.content, Content::Text(_)));
    let mut own: Vec<Option<(String, usize)>> = prepared.iter().map(|_| None).collect();

    if has_text {
        for round in 0..=jobs.len() {
            let names: RevManifest = jobs
                .iter()
                .zip(&tokens)
                .map(|(job, token)| (job.original.clone(), hashed_path(&job.original, token)))
                .collect();
            let next: Vec<Option<(String, usize)>> = prepared
                .par_iter()
                .map(|p| match &p.content {
                    Content::Text(text) => rewrite_text(text, &[&names]),
                    Content::Binary(_) => None,
                })
                .collect();
            let next_tokens: Vec<String> = prepared
                .iter()
                .zip(&next)
                .map(|(p, rewritten)| match rewritten {
                    Some((text, _)) => token_of(text.as_bytes()),
                    None => token_of(p.content.bytes()),
                })
                .collect();
            own = next;
            if next_tokens == tokens {
                tracing::debug!(class, rounds = round + 1, "class references settled");
                break;
            }
            if round == jobs.len() {
                let files = jobs
                    .iter()
                    .zip(tokens.iter().zip(&next_tokens))
                    .filter(|(_, (before, after))| before != after)
                    .map(|(job, _)| job.original.clone())
                    .collect();
                return Err(AssetError::ReferenceCycle {
                    class: class.to_string(),
                    files,
                });
            }
            tokens = next_tokens;
        }
    }

    let mut settled = Settled {
        bytes: Vec::with_capacity(prepared.len()),
        rewrites: Vec::with_capacity(prepared.len()),
        tokens,
    };
    for (p, rewritten) in prepared.into_iter().zip(own) {
        match rewritten {
            Some((text, count)) => {
                settled.bytes.push(text.into_bytes());
                settled.rewrites.push(p.rewrites + count);
            }
            None => {
                settled.bytes.push(match p.content {
                    Content::Text(text) => text.into_bytes(),
                    Content::Binary(bytes) => bytes,
                });
                settled.rewrites.push(p.rewrites);
            }
        }
    }
    Ok(settled)
}

fn publish(
    job: &Job,
    bytes: &[u8],
    token: &str,
    rewrites: usize,
    output_dir: &Path,
) -> Result<PublishedAsset, AssetError> {
    let hashed = hashed_path(&job.original, token);
    let target = fsutil::join_slash(output_dir, &hashed);
    fsutil::write_atomic(&target, bytes).map_err(|source| AssetError::Write {
        path: target.clone(),
        source,
    })?;

    Ok(PublishedAsset {
        original: job.original.clone(),
        hashed,
        derivative: job.derivative,
        rewrites,
        size: bytes.len() as u64,
    })
}

/// Process one asset class and emit its manifest.
pub fn process_class(
    class: &AssetClassConfig,
    ctx: &AssetContext<'_>,
) -> Result<(RevManifest, AssetReport), AssetError> {
    let src_root = ctx.source_dir.join(&class.source);
    let missing_source = !src_root.is_dir();
    if missing_source {
        tracing::warn!(class = %class.name, dir = %src_root.display(), "asset source directory not found, emitting empty manifest");
    }

    let files: Vec<PathBuf> = fsutil::list_files(&src_root)
        .map_err(|source| AssetError::Walk {
            path: src_root.clone(),
            source,
        })?
        .into_iter()
        .filter(|p| class.includes(p))
        .collect();

    let jobs = plan_jobs(class, &src_root, &files);
    tracing::debug!(class = %class.name, assets = jobs.len(), "hashing assets");

    let prepared: Vec<Prepared> = jobs
        .par_iter()
        .map(|job| prepare(job, ctx))
        .collect::<Result<_, _>>()?;
    let settled = settle(&class.name, &jobs, prepared, ctx.hash_length)?;

    let published: Vec<PublishedAsset> = jobs
        .par_iter()
        .zip(settled.bytes.par_iter())
        .zip(settled.tokens.par_iter().zip(settled.rewrites.par_iter()))
        .map(|((job, bytes), (token, rewrites))| {
            publish(job, bytes, token, *rewrites, ctx.output_dir)
        })
        .collect::<Result<_, _>>()?;

    let mut recorder = ManifestRecorder::new(class.name.clone());
    for asset in &published {
        recorder.record(asset.original.clone(), asset.hashed.clone());
    }
    let duplicates = recorder.duplicates().to_vec();
    let manifest = recorder.finish();

    let class_dir = fsutil::join_slash(ctx.output_dir, class.output.trim_matches('/'));
    let manifest_path = manifest.emit(&class_dir)?;

    Ok((
        manifest,
        AssetReport {
            class: class.name.clone(),
            assets: published,
            duplicates,
            manifest_path,
            missing_source,
        },
    ))
}
