//! Page index and sitemap generation.
//!
//! Runs after references are rewritten, over the published output tree:
//!
//! 1. [`index_pages`] lists every `.html` page with its URL and `<title>`,
//! 2. the index is saved to `<temp_dir>/pageindex.json` for other tooling,
//! 3. [`render_sitemap`] turns the index into `<output_dir>/sitemap.xml`.
//!
//! # Sitemap Format
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
//!   <url>
//!     <loc>https://example.com/</loc>
//!   </url>
//! </urlset>
//! ```

use crate::config::SiteConfig;
use crate::fsutil;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// File name of the page index inside the temp directory.
pub const PAGE_INDEX_FILENAME: &str = "pageindex.json";
/// File name of the sitemap inside the output root.
pub const SITEMAP_FILENAME: &str = "sitemap.xml";

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));

#[derive(Error, Debug)]
pub enum SitemapError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One published page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    /// Output-relative file path, e.g. `blog/index.html`.
    pub file: String,
    /// Site-absolute URL path, e.g. `/blog/`.
    pub url: String,
    pub title: Option<String>,
}

/// Outcome of the sitemap stage.
#[derive(Debug, Clone)]
pub struct SitemapReport {
    pub pages: Vec<PageEntry>,
    /// Pages listed in the sitemap (after exclusions).
    pub urls: usize,
    pub index_path: PathBuf,
    pub sitemap_path: PathBuf,
}

/// URL path of an output-relative page file.
///
/// `index.html` maps to its directory: `index.html` → `/`,
/// `blog/index.html` → `/blog/`.
pub fn page_url(file: &str) -> String {
    match file.strip_suffix("index.html") {
        Some(dir) if dir.is_empty() || dir.ends_with('/') => format!("/{dir}"),
        _ => format!("/{file}"),
    }
}

/// Text of the first `<title>` element, whitespace-collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    let raw = TITLE.captures(html)?.get(1)?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Every `.html` page under `output_dir`, sorted by file path.
pub fn index_pages(output_dir: &Path) -> Result<Vec<PageEntry>, SitemapError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SitemapError::Io { path, source }
    };
    let mut pages = Vec::new();
    for path in fsutil::list_files(output_dir).map_err(io_err(output_dir))? {
        let is_html = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("html"));
        if !is_html {
            continue;
        }
        let Some(file) = fsutil::slash_path(&path, output_dir) else {
            continue;
        };
        let bytes = std::fs::read(&path).map_err(io_err(&path))?;
        let title = extract_title(&String::from_utf8_lossy(&bytes));
        pages.push(PageEntry {
            url: page_url(&file),
            file,
            title,
        });
    }
    pages.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(pages)
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&apos;"),
    )
}

/// Render a sitemaps.org `urlset` for `pages`, skipping `exclude`d files.
pub fn render_sitemap(base_url: &str, pages: &[PageEntry], exclude: &[String]) -> String {
    let base_url = base_url.trim_end_matches('/');
    let mut xml = String::with_capacity(4096);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<urlset xmlns=\"");
    xml.push_str(SITEMAP_NS);
    xml.push_str("\">\n");

    for page in pages.iter().filter(|p| !exclude.contains(&p.file)) {
        let loc = format!("{base_url}{}", page.url);
        xml.push_str("  <url>\n    <loc>");
        xml.push_str(&escape_xml(&loc));
        xml.push_str("</loc>\n  </url>\n");
    }

    xml.push_str("</urlset>\n");
    xml
}

/// Index the output tree, save the page index and write `sitemap.xml`.
pub fn build_sitemap(config: &SiteConfig) -> Result<SitemapReport, SitemapError> {
    let pages = index_pages(&config.output_dir)?;

    let index_path = config.temp_dir.join(PAGE_INDEX_FILENAME);
    let json = serde_json::to_string_pretty(&pages)?;
    fsutil::write_atomic(&index_path, json.as_bytes()).map_err(|source| SitemapError::Io {
        path: index_path.clone(),
        source,
    })?;

    let xml = render_sitemap(&config.sitemap.base_url, &pages, &config.sitemap.exclude);
    let sitemap_path = config.output_dir.join(SITEMAP_FILENAME);
    fsutil::write_atomic(&sitemap_path, xml.as_bytes()).map_err(|source| SitemapError::Io {
        path: sitemap_path.clone(),
        source,
    })?;

    let urls = pages
        .iter()
        .filter(|p| !config.sitemap.exclude.contains(&p.file))
        .count();
    tracing::debug!(pages = pages.len(), urls, "wrote sitemap");

    Ok(SitemapReport {
        pages,
        urls,
        index_path,
        sitemap_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn page(file: &str) -> PageEntry {
        PageEntry {
            file: file.to_string(),
            url: page_url(file),
            title: None,
        }
    }

    #[test]
    fn page_url_maps_index_to_directory() {
        assert_eq!(page_url("index.html"), "/");
        assert_eq!(page_url("blog/index.html"), "/blog/");
        assert_eq!(page_url("about.html"), "/about.html");
        assert_eq!(page_url("notindex.html"), "/notindex.html");
    }

    #[test]
    fn extract_title_collapses_whitespace() {
        let html = "<html><head><TITLE>\n  Hello\n  World </TITLE></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Hello World"));
        assert_eq!(extract_title("<title></title>"), None);
        assert_eq!(extract_title("<p>no title</p>"), None);
    }

    #[test]
    fn escape_xml_borrows_when_clean() {
        assert!(matches!(escape_xml("https://a.b/c"), Cow::Borrowed(_)));
        assert_eq!(escape_xml("/?a=1&b=<2>"), "/?a=1&amp;b=&lt;2&gt;");
    }

    #[test]
    fn render_sitemap_lists_pages_and_skips_excluded() {
        let pages = vec![page("404.html"), page("blog/index.html"), page("index.html")];
        let xml = render_sitemap("https://example.com/", &pages, &["404.html".into()]);

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(xml.contains(SITEMAP_NS));
        assert!(xml.contains("<loc>https://example.com/blog/</loc>"));
        assert!(xml.contains("<loc>https://example.com/</loc>"));
        assert!(!xml.contains("404"));
        assert_eq!(xml.matches("<url>").count(), 2);
    }

    #[test]
    fn index_pages_reads_titles_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("blog")).unwrap();
        fs::write(tmp.path().join("index.html"), "<title>Home</title>").unwrap();
        fs::write(tmp.path().join("blog/index.html"), "<title>Blog</title>").unwrap();
        fs::write(tmp.path().join("style.css"), "body{}").unwrap();

        let pages = index_pages(tmp.path()).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].file, "blog/index.html");
        assert_eq!(pages[0].url, "/blog/");
        assert_eq!(pages[0].title.as_deref(), Some("Blog"));
        assert_eq!(pages[1].url, "/");
    }

    #[test]
    fn build_sitemap_writes_index_and_xml() {
        let tmp = TempDir::new().unwrap();
        let config = SiteConfig::default().rooted_at(tmp.path());
        fs::create_dir_all(&config.output_dir).unwrap();
        fs::write(config.output_dir.join("index.html"), "<title>Home</title>").unwrap();
        fs::write(config.output_dir.join("404.html"), "<title>Lost</title>").unwrap();

        let report = build_sitemap(&config).unwrap();
        assert_eq!(report.pages.len(), 2);
        assert_eq!(report.urls, 1);

        let index: Vec<PageEntry> =
            serde_json::from_str(&fs::read_to_string(&report.index_path).unwrap()).unwrap();
        assert_eq!(index, report.pages);
        let xml = fs::read_to_string(config.output_dir.join(SITEMAP_FILENAME)).unwrap();
        assert!(xml.contains("<loc>http://localhost:8083/</loc>"));
    }
}
