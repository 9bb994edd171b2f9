//! Asset transforms: the narrow seam between the pipeline and the tools that
//! actually compile, minify or convert files.
//!
//! The pipeline never reimplements a style compiler, an image optimizer or a
//! script bundler. Each is an opaque collaborator behind [`Transform`]:
//! bytes in, bytes out. Three implementations ship:
//!
//! | Transform | Use |
//! |-----------|-----|
//! | [`Passthrough`] | Files that are already in their published form |
//! | [`CommandTransform`] | Any external tool that reads stdin and writes stdout |
//! | [`WebpEncoder`] | Lossless WebP derivative of a PNG/JPEG source |
//!
//! Tests substitute a recording mock, so the asset stage can be exercised
//! without spawning processes.

use image::ImageFormat;
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`{program}` failed on {path} ({status}): {stderr}")]
    CommandFailed {
        program: String,
        path: String,
        status: String,
        stderr: String,
    },
    #[error("image conversion failed for {path}: {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },
    #[error("empty command")]
    EmptyCommand,
}

/// Turns an asset's bytes into its published bytes.
///
/// Implementations must be `Sync`: the asset stage calls them from rayon
/// workers.
pub trait Transform: Sync {
    /// `path` identifies the source file for diagnostics and tools that need
    /// it; the content to transform is `bytes`.
    fn process(&self, path: &Path, bytes: Vec<u8>) -> Result<Vec<u8>, TransformError>;
}

/// Publishes bytes unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn process(&self, _path: &Path, bytes: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        Ok(bytes)
    }
}

/// Runs an external program per file: content on stdin, result on stdout.
///
/// A `{path}` placeholder in any argument is replaced by the source path.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    program: String,
    args: Vec<String>,
}

impl CommandTransform {
    pub fn new(argv: &[String]) -> Result<Self, TransformError> {
        let (program, args) = argv.split_first().ok_or(TransformError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn resolve_args(&self, path: &Path) -> Vec<String> {
        let path = path.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{path}", &path))
            .collect()
    }
}

impl Transform for CommandTransform {
    fn process(&self, path: &Path, bytes: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let mut child = Command::new(&self.program)
            .args(self.resolve_args(path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from a separate thread so a tool that writes before it
        // finishes reading cannot deadlock on a full stdout pipe.
        let mut stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdin unavailable")
        })?;
        let writer = std::thread::spawn(move || stdin.write_all(&bytes));

        let output = child.wait_with_output()?;
        let write_result = writer
            .join()
            .map_err(|_| std::io::Error::other("stdin writer panicked"))?;

        if !output.status.success() {
            return Err(TransformError::CommandFailed {
                program: self.program.clone(),
                path: path.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // A tool may legitimately exit before consuming all input.
        if let Err(e) = write_result
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }
        Ok(output.stdout)
    }
}

/// Re-encodes PNG/JPEG images as lossless WebP.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpEncoder;

impl WebpEncoder {
    /// Whether a source file can be converted.
    pub fn accepts(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                ["png", "jpg", "jpeg"]
                    .iter()
                    .any(|x| x.eq_ignore_ascii_case(e))
            })
    }
}

impl Transform for WebpEncoder {
    fn process(&self, path: &Path, bytes: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let to_err = |source| TransformError::Image {
            path: path.display().to_string(),
            source,
        };
        let img = image::load_from_memory(&bytes).map_err(to_err)?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::WebP).map_err(to_err)?;
        Ok(out.into_inner())
    }
}

/// Build the transform configured for an asset class.
pub fn for_command(command: &[String]) -> Result<Box<dyn Transform>, TransformError> {
    if command.is_empty() {
        Ok(Box::new(Passthrough))
    } else {
        Ok(Box::new(CommandTransform::new(command)?))
    }
}
