//! Copy stage: publishes the non-hashed trees (pages, static files) into the
//! output root, where the rewrite stage later finds them.
//!
//! Each configured directory is merged into the output root, so
//! `src/pages/about/index.html` lands at `dist/about/index.html`. Later
//! directories overwrite earlier ones on collision. A missing directory is
//! skipped with a warning.
//!
//! Pages may need a tool of their own (an HTML minifier, say). With
//! `[copy] command` set (or a transform supplied by the caller), files whose extension is in `command_include` are
//! piped through that [`Transform`] and written atomically; everything else
//! is copied byte for byte.

use crate::config::{CopyConfig, has_extension};
use crate::fsutil;
use crate::transform::{Transform, TransformError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CopyError + '_ {
    move |source| CopyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Files published by the copy stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CopyReport {
    /// Output-relative paths, in copy order.
    pub files: Vec<String>,
    /// Output-relative paths of files that went through the transform.
    pub transformed: Vec<String>,
    /// Configured directories that did not exist.
    pub missing: Vec<String>,
    /// Total bytes published.
    pub bytes: u64,
}

fn copy_dir_recursive(
    src: &Path,
    dst: &Path,
    config: &CopyConfig,
    transform: Option<&dyn Transform>,
    report: &mut CopyReport,
) -> Result<(), CopyError> {
    for path in fsutil::list_files(src).map_err(io_err(src))? {
        let Some(rel) = fsutil::slash_path(&path, src) else {
            continue;
        };
        let target = fsutil::join_slash(dst, &rel);
        if let Some(transform) = transform.filter(|_| has_extension(&path, &config.command_include)) {
            let bytes = fs::read(&path).map_err(io_err(&path))?;
            let bytes = transform.process(&path, bytes)?;
            fsutil::write_atomic(&target, &bytes).map_err(io_err(&target))?;
            report.bytes += bytes.len() as u64;
            report.transformed.push(rel.clone());
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            report.bytes += fs::copy(&path, &target).map_err(io_err(&path))?;
        }
        report.files.push(rel);
    }
    Ok(())
}

/// Copy every directory in `config.dirs` (relative to `source_dir`) into
/// `output_dir`. With a `transform`, files matching `config.command_include`
/// are published through it instead.
pub fn copy_dirs(
    source_dir: &Path,
    config: &CopyConfig,
    output_dir: &Path,
    transform: Option<&dyn Transform>,
) -> Result<CopyReport, CopyError> {
    let mut report = CopyReport::default();
    fs::create_dir_all(output_dir).map_err(io_err(output_dir))?;
    for dir in &config.dirs {
        let src: PathBuf = fsutil::join_slash(source_dir, dir);
        if !src.is_dir() {
            tracing::warn!(dir = %src.display(), "copy directory not found, skipping");
            report.missing.push(dir.clone());
            continue;
        }
        let before = report.files.len();
        copy_dir_recursive(&src, output_dir, config, transform, &mut report)?;
        tracing::debug!(dir = %dir, files = report.files.len() - before, "copied directory");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::tests::{FailingTransform, RecordingTransform};
    use tempfile::TempDir;

    fn dirs(names: &[&str]) -> CopyConfig {
        CopyConfig {
            dirs: names.iter().map(|s| s.to_string()).collect(),
            ..CopyConfig::default()
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn merges_dirs_into_output_root() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("dist");
        write(&src.join("pages/index.html"), "<h1>home</h1>");
        write(&src.join("pages/blog/index.html"), "<h1>blog</h1>");
        write(&src.join("static/robots.txt"), "User-agent: *");

        let report = copy_dirs(&src, &dirs(&["pages", "static"]), &out, None).unwrap();

        assert_eq!(
            report.files,
            vec!["blog/index.html", "index.html", "robots.txt"]
        );
        assert_eq!(
            fs::read_to_string(out.join("blog/index.html")).unwrap(),
            "<h1>blog</h1>"
        );
        assert!(out.join("robots.txt").exists());
        assert!(report.missing.is_empty());
        assert!(report.transformed.is_empty());
        assert_eq!(report.bytes, 13 + 13 + 13);
    }

    #[test]
    fn later_dir_wins_on_collision() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("dist");
        write(&src.join("pages/favicon.txt"), "pages");
        write(&src.join("static/favicon.txt"), "static");

        copy_dirs(&src, &dirs(&["pages", "static"]), &out, None).unwrap();
        assert_eq!(fs::read_to_string(out.join("favicon.txt")).unwrap(), "static");
    }

    #[test]
    fn missing_dir_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("dist");
        write(&src.join("pages/index.html"), "x");

        let report = copy_dirs(&src, &dirs(&["pages", "static"]), &out, None).unwrap();
        assert_eq!(report.files, vec!["index.html"]);
        assert_eq!(report.missing, vec!["static"]);
    }

    #[test]
    fn transform_applies_to_included_extensions_only() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("dist");
        write(&src.join("pages/index.html"), "<p> a </p>");
        write(&src.join("pages/about/index.html"), "<p>b</p>");
        write(&src.join("static/robots.txt"), "User-agent: *");

        let transform = RecordingTransform::with_suffix(b"<!--min-->");
        let report =
            copy_dirs(&src, &dirs(&["pages", "static"]), &out, Some(&transform)).unwrap();

        assert_eq!(transform.seen(), vec!["index.html", "index.html"]);
        assert_eq!(report.transformed, vec!["about/index.html", "index.html"]);
        assert_eq!(
            fs::read_to_string(out.join("index.html")).unwrap(),
            "<p> a </p><!--min-->"
        );
        assert_eq!(fs::read_to_string(out.join("robots.txt")).unwrap(), "User-agent: *");
    }

    #[test]
    fn command_include_selects_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("dist");
        write(&src.join("pages/index.html"), "<p>a</p>");
        write(&src.join("pages/feed.xml"), "<rss/>");

        let config = CopyConfig {
            command_include: vec!["xml".into()],
            ..dirs(&["pages"])
        };
        let transform = RecordingTransform::with_suffix(b"");
        let report = copy_dirs(&src, &config, &out, Some(&transform)).unwrap();
        assert_eq!(transform.seen(), vec!["feed.xml"]);
        assert_eq!(report.transformed, vec!["feed.xml"]);
    }

    #[test]
    fn transform_failure_aborts_copy() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("dist");
        write(&src.join("pages/index.html"), "<p>a</p>");

        let result = copy_dirs(&src, &dirs(&["pages"]), &out, Some(&FailingTransform));
        assert!(matches!(result, Err(CopyError::Transform(_))));
        assert!(!out.join("index.html").exists());
    }
}
