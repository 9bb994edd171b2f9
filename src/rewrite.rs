//! Reference rewriting: point every asset reference at its hashed file.
//!
//! After the asset stages have emitted their manifests, every text file in the
//! output tree whose extension is rewrite-eligible is scanned and each
//! occurrence of an original asset path is replaced by its hashed path.
//! Hashed assets themselves are scanned but never modified: the asset stage
//! settled their references before naming them.
//!
//! ## Matching
//!
//! Manifests are applied one at a time, in the configured order. Each
//! manifest is a single left-to-right pass: at every position the manifest's
//! keys are tried longest first, and a match is replaced and skipped over, so
//! replaced text is never re-scanned in the same pass.
//!
//! A match must sit on a path boundary, which keeps `img/logo.png` from
//! matching inside `img/biglogo.png` or `main.css` inside `main.css.map`:
//!
//! - the character before it is not alphanumeric (in any script), `_`, `-`
//!   or `.` (`/`, quotes, `(`, `=` and whitespace all qualify);
//! - the character after it is not alphanumeric, `_` or `-`, and a `.`
//!   after it only qualifies when it is not followed by an alphanumeric.
//!
//! Because a hashed path never contains its own original on a boundary
//! (`img/logo.png` vs `img/logo.0a1b2c3d4e.png`), running the rewriter over
//! already-rewritten output is a no-op.
//!
//! ## Unresolved references
//!
//! A reference into an asset directory that no manifest knows is left exactly
//! as written. That is deliberate: a broken link is a content problem to fix
//! in the source, not a reason to refuse to publish. Such references are
//! found by [`find_unresolved`], logged, and returned in the report.
//!
//! ## Atomicity
//!
//! Each file is rewritten completely in memory and then replaced atomically,
//! and only if its content changed. A failure never leaves a partially
//! substituted file behind; files already rewritten before the failure stay
//! rewritten (the pipeline marks the build failed).

use crate::config::has_extension;
use crate::fsutil;
use crate::manifest::{MANIFEST_FILENAME, RevManifest};
use rayon::prelude::*;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8 text")]
    NotText(PathBuf),
}

/// Index of one manifest's keys by their first byte, longest key first.
struct KeyIndex<'a> {
    by_first: HashMap<u8, Vec<(&'a str, &'a str)>>,
}

impl<'a> KeyIndex<'a> {
    fn new(manifest: &'a RevManifest) -> Self {
        let mut by_first: HashMap<u8, Vec<(&str, &str)>> = HashMap::new();
        for (original, hashed) in manifest.iter() {
            if let Some(&first) = original.as_bytes().first() {
                by_first.entry(first).or_default().push((original, hashed));
            }
        }
        for candidates in by_first.values_mut() {
            candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        }
        Self { by_first }
    }

    /// The longest key matching at `pos` on a path boundary.
    fn match_at(&self, text: &str, pos: usize) -> Option<(&'a str, &'a str)> {
        let bytes = text.as_bytes();
        let candidates = self.by_first.get(&bytes[pos])?;
        if !text.is_char_boundary(pos) || !boundary_before(text, pos) {
            return None;
        }
        candidates
            .iter()
            .find(|(original, _)| {
                bytes[pos..].starts_with(original.as_bytes())
                    && boundary_after(text, pos + original.len())
            })
            .copied()
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn boundary_before(text: &str, pos: usize) -> bool {
    match text[..pos].chars().next_back() {
        None => true,
        Some(c) => !(is_name_char(c) || c == '.'),
    }
}

fn boundary_after(text: &str, end: usize) -> bool {
    let mut rest = text[end..].chars();
    match rest.next() {
        None => true,
        Some('.') => !rest.next().is_some_and(char::is_alphanumeric),
        Some(c) => !is_name_char(c),
    }
}

/// One manifest pass over `text`. Returns the new text and the number of
/// replacements.
fn apply_manifest(text: &str, index: &KeyIndex<'_>) -> (String, usize) {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut pos = 0;
    let mut count = 0;

    while pos < bytes.len() {
        if let Some((original, hashed)) = index.match_at(text, pos) {
            out.push_str(&text[copied_to..pos]);
            out.push_str(hashed);
            pos += original.len();
            copied_to = pos;
            count += 1;
        } else {
            pos += 1;
        }
    }
    out.push_str(&text[copied_to..]);
    (out, count)
}

/// Rewrite `text` against `manifests`, applied in order.
///
/// Returns `None` when nothing matched, so callers can skip the write.
pub fn rewrite_text(text: &str, manifests: &[&RevManifest]) -> Option<(String, usize)> {
    let mut current: Option<String> = None;
    let mut total = 0;
    for manifest in manifests {
        if manifest.is_empty() {
            continue;
        }
        let index = KeyIndex::new(manifest);
        let source = current.as_deref().unwrap_or(text);
        let (rewritten, count) = apply_manifest(source, &index);
        if count > 0 {
            total += count;
            current = Some(rewritten);
        }
    }
    current.map(|text| (text, total))
}

/// A reference into an asset directory that no manifest resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    /// Output-relative path of the file containing the reference.
    pub file: String,
    /// The reference exactly as written.
    pub reference: String,
}

static ATTR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:src|href|srcset|content|data-src|poster)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid regex")
});

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]+))\s*\)"#).expect("valid regex")
});

/// Candidate asset paths referenced by `text`: attribute values (every entry
/// of a `srcset`) and CSS `url(...)` values.
fn references(text: &str) -> Vec<&str> {
    let mut refs = Vec::new();
    for caps in ATTR_REF.captures_iter(text) {
        if let Some(value) = caps.get(1).or_else(|| caps.get(2)) {
            for candidate in value.as_str().split(',') {
                if let Some(url) = candidate.split_whitespace().next() {
                    refs.push(url);
                }
            }
        }
    }
    for caps in CSS_URL.captures_iter(text) {
        if let Some(value) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            refs.push(value.as_str());
        }
    }
    refs
}

/// Reduce a reference to an output-relative path, or `None` for external,
/// inline and fragment-only references.
fn local_path(reference: &str) -> Option<&str> {
    let r = reference.trim();
    if r.is_empty()
        || r.starts_with('#')
        || r.starts_with("//")
        || r.contains("://")
        || r.starts_with("data:")
        || r.starts_with("mailto:")
        || r.starts_with("tel:")
        || r.starts_with("javascript:")
    {
        return None;
    }
    let end = r.find(['?', '#']).unwrap_or(r.len());
    let mut path = &r[..end];
    loop {
        if let Some(rest) = path.strip_prefix("../") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }
    (!path.is_empty()).then_some(path)
}

/// References in `text` pointing into one of `asset_dirs` that are neither a
/// hashed path nor an original path of any manifest.
pub fn find_unresolved(
    file: &str,
    text: &str,
    manifests: &[&RevManifest],
    asset_dirs: &[String],
) -> Vec<UnresolvedRef> {
    let mut unresolved = Vec::new();
    for reference in references(text) {
        let Some(path) = local_path(reference) else {
            continue;
        };
        let in_asset_dir = asset_dirs.iter().any(|dir| {
            let dir = dir.trim_matches('/');
            path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
        });
        if !in_asset_dir {
            continue;
        }
        let known = manifests
            .iter()
            .any(|m| m.get(path).is_some() || m.is_hashed_value(path));
        if !known {
            unresolved.push(UnresolvedRef {
                file: file.to_string(),
                reference: reference.to_string(),
            });
        }
    }
    unresolved
}

/// Summary of a rewrite run over an output tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    /// Eligible files read.
    pub files_scanned: usize,
    /// Output-relative paths of files whose content changed, sorted.
    pub files_rewritten: Vec<String>,
    /// Total replacements across all files.
    pub replacements: usize,
    pub unresolved: Vec<UnresolvedRef>,
    /// Hashed assets still referencing original paths. Their bytes are fixed
    /// by their name, so these references stay as written.
    pub frozen: Vec<String>,
}

fn read_text(path: &Path) -> Result<String, RewriteError> {
    let bytes = std::fs::read(path).map_err(|source| RewriteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| RewriteError::NotText(path.to_path_buf()))
}

/// Rewrite one file in place. Returns the replacement count (0 = untouched).
pub fn rewrite_file(path: &Path, manifests: &[&RevManifest]) -> Result<usize, RewriteError> {
    let text = read_text(path)?;
    match rewrite_text(&text, manifests) {
        Some((rewritten, count)) => {
            fsutil::write_atomic(path, rewritten.as_bytes()).map_err(|source| {
                RewriteError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            Ok(count)
        }
        None => Ok(0),
    }
}

/// Options for [`rewrite_tree`].
#[derive(Debug, Clone)]
pub struct RewriteOptions<'a> {
    /// Dot-less, case-insensitive extensions of rewrite-eligible files.
    pub extensions: &'a [String],
    /// Output-relative asset directories, for unresolved-reference detection.
    pub asset_dirs: &'a [String],
}

struct FileOutcome {
    rel: String,
    replacements: usize,
    frozen: bool,
    unresolved: Vec<UnresolvedRef>,
}

/// Rewrite every eligible file under `root`.
///
/// Manifest files are never rewritten. Neither are hashed assets (any
/// manifest's values): a hashed name promises fixed bytes. They are still
/// scanned for unresolved references. Files are processed in parallel; the
/// first error aborts the run.
pub fn rewrite_tree(
    root: &Path,
    manifests: &[&RevManifest],
    options: &RewriteOptions<'_>,
) -> Result<RewriteReport, RewriteError> {
    let files: Vec<PathBuf> = fsutil::list_files(root)
        .map_err(|source| RewriteError::Io {
            path: root.to_path_buf(),
            source,
        })?
        .into_iter()
        .filter(|p| has_extension(p, options.extensions))
        .filter(|p| p.file_name().is_none_or(|n| n != MANIFEST_FILENAME))
        .collect();
    let hashed: HashSet<&str> = manifests
        .iter()
        .flat_map(|m| m.iter().map(|(_, hashed)| hashed))
        .collect();

    let results: Vec<FileOutcome> = files
        .par_iter()
        .map(|path| -> Result<FileOutcome, RewriteError> {
            let rel = fsutil::slash_path(path, root).unwrap_or_else(|| path.display().to_string());
            if hashed.contains(rel.as_str()) {
                let text = read_text(path)?;
                return Ok(FileOutcome {
                    frozen: rewrite_text(&text, manifests).is_some(),
                    unresolved: find_unresolved(&rel, &text, manifests, options.asset_dirs),
                    replacements: 0,
                    rel,
                });
            }
            let replacements = rewrite_file(path, manifests)?;
            let text = read_text(path)?;
            let unresolved = find_unresolved(&rel, &text, manifests, options.asset_dirs);
            Ok(FileOutcome {
                rel,
                replacements,
                frozen: false,
                unresolved,
            })
        })
        .collect::<Result<_, _>>()?;

    let mut report = RewriteReport {
        files_scanned: results.len(),
        ..Default::default()
    };
    for outcome in results {
        if outcome.replacements > 0 {
            tracing::debug!(file = %outcome.rel, replacements = outcome.replacements, "rewrote references");
            report.files_rewritten.push(outcome.rel.clone());
            report.replacements += outcome.replacements;
        }
        if outcome.frozen {
            tracing::warn!(file = %outcome.rel, "hashed asset references a later asset class, left unchanged");
            report.frozen.push(outcome.rel);
        }
        for u in outcome.unresolved {
            tracing::warn!(file = %u.file, reference = %u.reference, "unresolved asset reference left unchanged");
            report.unresolved.push(u);
        }
    }
    Ok(report)
}
