//! # revsite
//!
//! A static website asset pipeline. It takes a pre-rendered site (markup,
//! compiled styles, bundled scripts, images), publishes every asset under a
//! content-hashed file name, and rewrites every reference so pages point at
//! the hashed files. Hashed files never change, so they can be cached
//! forever; a content change produces a new name.
//!
//! # Architecture: Staged Pipeline
//!
//! ```text
//! clean     →  empty build/dist/
//! images    src/images/  →  dist/img/logo.0a1b2c3d4e.png + img/rev-manifest.json
//! styles    src/css/     →  dist/css/…  (image refs rewritten before hashing)
//! scripts   src/js/      →  dist/js/…   (image + style refs rewritten before hashing)
//! copy      src/pages/, src/static/  →  dist/  (optional markup command)
//! rewrite   dist/**/*.{html,css,js,…}: original paths → hashed paths
//! sitemap   dist/sitemap.xml + .tmp/pageindex.json
//! ```
//!
//! Each stage declares the artifacts it requires and produces; the
//! [`pipeline`] refuses to run a stage whose inputs are missing. The
//! artifacts between stages are plain files: every class's
//! `rev-manifest.json` is a flat, sorted JSON object you can inspect.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Stage graph, artifact barriers, build status |
//! | [`assets`] | Per-class stage: transform, hash, publish, emit manifest |
//! | [`hash`] | Content tokens and hashed file names |
//! | [`manifest`] | Recording and emitting `rev-manifest.json` |
//! | [`rewrite`] | Boundary-aware reference replacement, unresolved-reference scan |
//! | [`transform`] | The `Transform` seam: pass-through, external command, WebP |
//! | [`copy`] | Publishes pages and static files into the output root |
//! | [`sitemap`] | Page index and `sitemap.xml` |
//! | [`serve`] | Static file server with hash-aware cache headers |
//! | [`config`] | `revsite.toml` loading and validation |
//! | [`output`] | CLI output formatting for stage reports |
//!
//! # Design Decisions
//!
//! ## Hash the Final Bytes
//!
//! A stylesheet that references `/img/bg.png` is rewritten to reference the
//! hashed image *before* its own token is computed. References inside one
//! class (`@import url(/css/reset.css)`) are settled the same way, by
//! rehashing until no token moves. The token therefore reflects what is
//! actually served, and changing any file changes the name of everything
//! that references it. The rewrite stage never touches a hashed file.
//!
//! ## Unresolved References Are Not Fatal
//!
//! A page referencing an asset that does not exist keeps its reference
//! verbatim. The rewrite report lists such references and each is logged,
//! but the build succeeds.
//!
//! ## External Tools Behind One Trait
//!
//! Minifiers and compilers are not reimplemented. A class can name any
//! command that reads stdin and writes stdout; see [`transform`].

pub mod assets;
pub mod config;
pub mod copy;
pub(crate) mod fsutil;
pub mod hash;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod rewrite;
pub mod serve;
pub mod sitemap;
pub mod transform;
