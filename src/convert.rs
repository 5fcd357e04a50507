//! Turn `.note` files into PDF bytes.
//!
//! The private cloud's converter (notelib) usually renders every synced note
//! to PDF on its own, under hashed names we cannot map back to the source.
//! We match on modification time instead: notelib converts right after sync,
//! so its output lands within a few minutes of the note's mtime. When no such
//! PDF exists the note is rendered by an external command.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::process::Command;

use crate::config::Settings;

/// Largest mtime distance between a note and a pre-converted PDF.
pub const NOTELIB_WINDOW: Duration = Duration::from_secs(300);
/// How much older than the note a pre-converted PDF may be.
pub const NOTELIB_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer command is empty")]
    EmptyCommand,

    #[error("Failed to start renderer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer exited with {status} for {note}: {stderr}")]
    RendererFailed {
        note: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Renderer produced no output for {0}")]
    EmptyOutput(String),
}

impl ConvertError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// External renderer invoked as `program args...`, with `{input}` and
/// `{output}` substituted per call. Arguments are split on whitespace; paths
/// substituted into them are passed as single arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    program: String,
    args: Vec<String>,
}

impl RenderCommand {
    pub fn parse(template: &str) -> Result<Self, ConvertError> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ConvertError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn args_for(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    /// Render `note` to PDF bytes.
    pub async fn render(&self, note: &Path) -> Result<Vec<u8>, ConvertError> {
        let out = tempfile::Builder::new()
            .prefix("sn-bridge-")
            .suffix(".pdf")
            .tempfile()
            .map_err(|e| ConvertError::io(&std::env::temp_dir(), e))?;

        let output = Command::new(&self.program)
            .args(self.args_for(note, out.path()))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConvertError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ConvertError::RendererFailed {
                note: display_name(note),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pdf = tokio::fs::read(out.path())
            .await
            .map_err(|e| ConvertError::io(out.path(), e))?;
        if pdf.is_empty() {
            return Err(ConvertError::EmptyOutput(display_name(note)));
        }
        Ok(pdf)
    }
}

/// Produces PDF bytes for a note, preferring notelib's output.
#[derive(Debug, Clone)]
pub struct Converter {
    convert_dir: Option<PathBuf>,
    renderer: RenderCommand,
}

impl Converter {
    pub fn new(convert_dir: Option<PathBuf>, renderer: RenderCommand) -> Self {
        Self {
            convert_dir,
            renderer,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConvertError> {
        Ok(Self::new(
            settings.notelib_convert_dir.clone(),
            RenderCommand::parse(&settings.convert_command)?,
        ))
    }

    pub async fn pdf_for_note(&self, note: &Path) -> Result<Vec<u8>, ConvertError> {
        if let Some(dir) = &self.convert_dir {
            let note_mtime = std::fs::metadata(note)
                .and_then(|m| m.modified())
                .map_err(|e| ConvertError::io(note, e))?;

            if let Some(pdf) = find_notelib_pdf(dir, note_mtime) {
                let bytes = tokio::fs::read(&pdf)
                    .await
                    .map_err(|e| ConvertError::io(&pdf, e))?;
                tracing::info!(
                    "Using pre-converted {} for {} ({} KiB)",
                    display_name(&pdf),
                    display_name(note),
                    bytes.len() / 1024
                );
                return Ok(bytes);
            }
        }

        tracing::info!("Rendering {} with {}", display_name(note), self.renderer.program);
        let started = std::time::Instant::now();
        let bytes = self.renderer.render(note).await?;
        tracing::debug!(
            "Rendered {} in {:.2}s ({} KiB)",
            display_name(note),
            started.elapsed().as_secs_f64(),
            bytes.len() / 1024
        );
        Ok(bytes)
    }
}

/// Pick the PDF in `dir` whose mtime is closest to `note_mtime`, among those
/// at most [`NOTELIB_SLACK`] older and [`NOTELIB_WINDOW`] away.
pub fn find_notelib_pdf(dir: &Path, note_mtime: SystemTime) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;

    let mut best: Option<(Duration, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            continue;
        }
        let Ok(pdf_mtime) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };

        let (delta, older) = match pdf_mtime.duration_since(note_mtime) {
            Ok(newer_by) => (newer_by, false),
            Err(e) => (e.duration(), true),
        };
        if (older && delta > NOTELIB_SLACK) || delta > NOTELIB_WINDOW {
            continue;
        }

        if best.as_ref().map_or(true, |(d, _)| delta < *d) {
            best = Some((delta, path));
        }
    }

    best.map(|(delta, path)| {
        tracing::debug!(
            "Pre-converted candidate {} ({:.1}s from note)",
            display_name(&path),
            delta.as_secs_f64()
        );
        path
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
