//! CLI output formatting for all pipeline stages.
//!
//! Every stage report has a pure `format_*` function returning display
//! lines and a thin `print_*` wrapper. Keeping formatting pure lets the
//! exact output be tested without capturing stdout.
//!
//! # Output Format
//!
//! ## Assets
//!
//! ```text
//! ==> images
//! 2 assets, 9.1 KB (1 WebP derivative)
//!     img/logo.png → img/logo.0a1b2c3d4e.png (5.4 KB)
//!     img/logo.webp → img/logo.5f6e7d8c9b.webp (3.7 KB, derivative)
//!     Manifest: build/dist/img/rev-manifest.json
//! ```
//!
//! ## Rewrite
//!
//! ```text
//! ==> rewrite
//! Rewrote 4 references in 2 of 3 files
//!     index.html
//!     blog/index.html
//! Unresolved references (1)
//!     about.html: /img/missing.png
//! ```
//!
//! Diagnostics (warnings, debug detail) go through `tracing` to stderr;
//! these reports go to stdout.

use crate::assets::AssetReport;
use crate::copy::CopyReport;
use crate::pipeline::{Stage, StageReport};
use crate::rewrite::RewriteReport;
use crate::sitemap::SitemapReport;

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{} {}", count, if count == 1 { one } else { many })
}

/// Human-readable byte count: `812 B`, `1.2 KB`, `3.4 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

/// Header line printed before a stage's report.
pub fn format_stage_header(stage: &Stage) -> String {
    format!("==> {}", stage.name)
}

// ============================================================================
// Stage reports
// ============================================================================

fn format_assets(report: &AssetReport) -> Vec<String> {
    let mut lines = Vec::new();
    let derivatives = report.assets.iter().filter(|a| a.derivative).count();
    let total: u64 = report.assets.iter().map(|a| a.size).sum();
    let mut summary = plural(report.assets.len(), "asset", "assets");
    if !report.assets.is_empty() {
        summary.push_str(&format!(", {}", format_bytes(total)));
    }
    if derivatives > 0 {
        summary.push_str(&format!(
            " ({})",
            plural(derivatives, "WebP derivative", "WebP derivatives")
        ));
    }
    lines.push(summary);

    if report.missing_source {
        lines.push("    Source directory not found".to_string());
    }
    for asset in &report.assets {
        let mut line = format!(
            "    {} \u{2192} {} ({}",
            asset.original,
            asset.hashed,
            format_bytes(asset.size)
        );
        if asset.derivative {
            line.push_str(", derivative");
        }
        line.push(')');
        if asset.rewrites > 0 {
            line.push_str(&format!(
                " ({} rewritten)",
                plural(asset.rewrites, "reference", "references")
            ));
        }
        lines.push(line);
    }
    for dup in &report.duplicates {
        lines.push(format!("    Duplicate: {dup} (last entry kept)"));
    }
    lines.push(format!("    Manifest: {}", report.manifest_path.display()));
    lines
}

fn format_copy(report: &CopyReport) -> Vec<String> {
    let mut summary = format!(
        "Copied {}, {}",
        plural(report.files.len(), "file", "files"),
        format_bytes(report.bytes)
    );
    if !report.transformed.is_empty() {
        summary.push_str(&format!(" ({} transformed)", report.transformed.len()));
    }
    let mut lines = vec![summary];
    for dir in &report.missing {
        lines.push(format!("    Missing: {dir}/"));
    }
    lines
}

/// Format the unresolved-reference section of a rewrite report.
pub fn format_unresolved(report: &RewriteReport) -> Vec<String> {
    if report.unresolved.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("Unresolved references ({})", report.unresolved.len())];
    for u in &report.unresolved {
        lines.push(format!("    {}: {}", u.file, u.reference));
    }
    lines
}

fn format_rewrite(report: &RewriteReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Rewrote {} in {} of {}",
        plural(report.replacements, "reference", "references"),
        report.files_rewritten.len(),
        plural(report.files_scanned, "file", "files"),
    )];
    for file in &report.files_rewritten {
        lines.push(format!("    {file}"));
    }
    if !report.frozen.is_empty() {
        lines.push(format!(
            "Hashed assets with references left as written ({})",
            report.frozen.len()
        ));
        for file in &report.frozen {
            lines.push(format!("    {file}"));
        }
    }
    lines.extend(format_unresolved(report));
    lines
}

fn format_sitemap(report: &SitemapReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Indexed {}, {} in sitemap",
        plural(report.pages.len(), "page", "pages"),
        report.urls
    )];
    for page in &report.pages {
        match &page.title {
            Some(title) => lines.push(format!("    {} {}", page.url, title)),
            None => lines.push(format!("    {}", page.url)),
        }
    }
    lines.push(format!("    Sitemap: {}", report.sitemap_path.display()));
    lines
}

/// Format one stage's report as display lines.
pub fn format_stage_report(report: &StageReport) -> Vec<String> {
    match report {
        StageReport::Clean {
            output_dir,
            removed,
        } => {
            let verb = if *removed { "Cleaned" } else { "Created" };
            vec![format!("{verb} {}", output_dir.display())]
        }
        StageReport::Assets(r) => format_assets(r),
        StageReport::Copy(r) => format_copy(r),
        StageReport::Rewrite(r) => format_rewrite(r),
        StageReport::Sitemap(r) => format_sitemap(r),
    }
}

/// Print a stage header and its report to stdout.
pub fn print_stage_report(stage: &Stage, report: &StageReport) {
    println!("{}", format_stage_header(stage));
    for line in format_stage_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format the stage graph: one line per stage with its requirements.
pub fn format_plan(stages: &[Stage]) -> Vec<String> {
    let mut lines = vec!["Stages".to_string()];
    for (i, stage) in stages.iter().enumerate() {
        lines.push(format!("{:03} {}", i + 1, stage.name));
        if !stage.requires.is_empty() {
            let requires: Vec<String> = stage.requires.iter().map(|a| a.to_string()).collect();
            lines.push(format!("    Requires: {}", requires.join(", ")));
        }
    }
    lines
}

pub fn print_plan(stages: &[Stage]) {
    for line in format_plan(stages) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::PublishedAsset;
    use crate::config::SiteConfig;
    use crate::pipeline::plan;
    use crate::rewrite::UnresolvedRef;
    use crate::sitemap::PageEntry;
    use std::path::PathBuf;

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "file", "files"), "1 file");
        assert_eq!(plural(0, "file", "files"), "0 files");
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1229), "1.2 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 + 400 * 1024), "3.4 MB");
    }

    #[test]
    fn format_clean() {
        let lines = format_stage_report(&StageReport::Clean {
            output_dir: PathBuf::from("build/dist"),
            removed: true,
        });
        assert_eq!(lines, vec!["Cleaned build/dist"]);
    }

    #[test]
    fn format_assets_report() {
        let report = AssetReport {
            class: "images".into(),
            assets: vec![
                PublishedAsset {
                    original: "img/logo.png".into(),
                    hashed: "img/logo.0a1b2c3d4e.png".into(),
                    derivative: false,
                    rewrites: 0,
                    size: 5530,
                },
                PublishedAsset {
                    original: "img/logo.webp".into(),
                    hashed: "img/logo.5f6e7d8c9b.webp".into(),
                    derivative: true,
                    rewrites: 0,
                    size: 3789,
                },
            ],
            duplicates: vec![],
            manifest_path: PathBuf::from("build/dist/img/rev-manifest.json"),
            missing_source: false,
        };
        let lines = format_stage_report(&StageReport::Assets(report));
        assert_eq!(lines[0], "2 assets, 9.1 KB (1 WebP derivative)");
        assert_eq!(
            lines[1],
            "    img/logo.png \u{2192} img/logo.0a1b2c3d4e.png (5.4 KB)"
        );
        assert_eq!(
            lines[2],
            "    img/logo.webp \u{2192} img/logo.5f6e7d8c9b.webp (3.7 KB, derivative)"
        );
        assert_eq!(lines[3], "    Manifest: build/dist/img/rev-manifest.json");
    }

    #[test]
    fn format_asset_rewrites_and_duplicates() {
        let report = AssetReport {
            class: "styles".into(),
            assets: vec![PublishedAsset {
                original: "css/main.css".into(),
                hashed: "css/main.abcdef1234.css".into(),
                derivative: false,
                rewrites: 2,
                size: 120,
            }],
            duplicates: vec!["css/main.css".into()],
            manifest_path: PathBuf::from("m.json"),
            missing_source: true,
        };
        let lines = format_stage_report(&StageReport::Assets(report));
        assert_eq!(lines[0], "1 asset, 120 B");
        assert_eq!(
            lines[2],
            "    css/main.css \u{2192} css/main.abcdef1234.css (120 B) (2 references rewritten)"
        );
        assert_eq!(lines[1], "    Source directory not found");
        assert!(lines[2].ends_with("(2 references rewritten)"));
        assert_eq!(lines[3], "    Duplicate: css/main.css (last entry kept)");
    }

    #[test]
    fn format_copy_lists_missing_dirs() {
        let report = CopyReport {
            files: vec!["index.html".into()],
            transformed: vec!["index.html".into()],
            missing: vec!["static".into()],
            bytes: 2048,
        };
        assert_eq!(
            format_stage_report(&StageReport::Copy(report)),
            vec!["Copied 1 file, 2.0 KB (1 transformed)", "    Missing: static/"]
        );
    }

    #[test]
    fn format_rewrite_with_unresolved() {
        let report = RewriteReport {
            files_scanned: 3,
            files_rewritten: vec!["blog/index.html".into(), "index.html".into()],
            replacements: 4,
            unresolved: vec![UnresolvedRef {
                file: "about.html".into(),
                reference: "/img/missing.png".into(),
            }],
            frozen: vec!["css/main.abcdef.css".into()],
        };
        let lines = format_stage_report(&StageReport::Rewrite(report));
        assert_eq!(
            lines,
            vec![
                "Rewrote 4 references in 2 of 3 files",
                "    blog/index.html",
                "    index.html",
                "Hashed assets with references left as written (1)",
                "    css/main.abcdef.css",
                "Unresolved references (1)",
                "    about.html: /img/missing.png",
            ]
        );
    }

    #[test]
    fn format_unresolved_empty() {
        assert!(format_unresolved(&RewriteReport::default()).is_empty());
    }

    #[test]
    fn format_sitemap_report() {
        let report = SitemapReport {
            pages: vec![
                PageEntry {
                    file: "index.html".into(),
                    url: "/".into(),
                    title: Some("Home".into()),
                },
                PageEntry {
                    file: "404.html".into(),
                    url: "/404.html".into(),
                    title: None,
                },
            ],
            urls: 1,
            index_path: PathBuf::from("build/.tmp/pageindex.json"),
            sitemap_path: PathBuf::from("build/dist/sitemap.xml"),
        };
        let lines = format_stage_report(&StageReport::Sitemap(report));
        assert_eq!(lines[0], "Indexed 2 pages, 1 in sitemap");
        assert_eq!(lines[1], "    / Home");
        assert_eq!(lines[2], "    /404.html");
        assert_eq!(lines[3], "    Sitemap: build/dist/sitemap.xml");
    }

    #[test]
    fn format_plan_lists_requirements() {
        let stages = plan(&SiteConfig::default());
        let lines = format_plan(&stages);
        assert_eq!(lines[0], "Stages");
        assert_eq!(lines[1], "001 clean");
        assert_eq!(lines[2], "002 images");
        assert_eq!(lines[3], "    Requires: a clean output directory");
        assert!(lines.iter().any(|l| l.contains("the 'scripts' manifest")));
    }

    #[test]
    fn stage_header() {
        let stages = plan(&SiteConfig::default());
        assert_eq!(format_stage_header(&stages[0]), "==> clean");
    }
}
