//! OCR adapter: recognise text on a page raster.
//!
//! The pipeline talks to OCR through the [`OcrEngine`] capability trait so
//! engines can be swapped or stubbed in tests without touching pipeline
//! logic. The default implementation drives the `tesseract` executable as a
//! subprocess in TSV mode, which yields per-word boxes and confidences —
//! enough to rebuild ordered text runs with approximate font sizes from the
//! glyph box heights.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::OcrError;

/// One recognised line, in pixel coordinates with a top-left origin (as the
/// engine reports them). The caller maps these into page space using the
/// raster scale.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrRun {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    /// Mean word confidence in 0–100.
    pub confidence: f32,
}

/// Capability interface for optical character recognition.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise text on a PNG-encoded page raster. `languages` is the
    /// engine-specific hint set, e.g. `"rus+eng"`.
    async fn recognize(&self, image_png: &[u8], languages: &str) -> Result<Vec<OcrRun>, OcrError>;
}

/// OCR via the `tesseract` command-line tool.
///
/// `--psm 1` selects automatic page segmentation with orientation/script
/// detection, matching how scanned pages arrive with unknown layout.
pub struct TesseractOcr {
    binary: PathBuf,
    timeout_secs: u64,
    scratch_dir: Option<PathBuf>,
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            timeout_secs: 120,
            scratch_dir: None,
        }
    }

    /// Use a specific tesseract binary instead of resolving from `PATH`.
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = path.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    /// Directory for the intermediate raster file handed to the engine.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image_png: &[u8], languages: &str) -> Result<Vec<OcrRun>, OcrError> {
        // tesseract reads from a file path; hand it a managed temp file that
        // disappears when this call returns.
        let mut builder = tempfile::Builder::new();
        builder.prefix("pagemill-ocr").suffix(".png");
        let mut tmp = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| OcrError::Unavailable(format!("scratch file: {e}")))?;
        tmp.write_all(image_png)
            .map_err(|e| OcrError::Unavailable(format!("scratch write: {e}")))?;

        let mut command = tokio::process::Command::new(&self.binary);
        command
            .arg(tmp.path())
            .arg("stdout")
            .args(["-l", languages, "--psm", "1", "tsv"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), async {
            command
                .spawn()
                .map_err(|e| OcrError::Unavailable(format!("{}: {e}", self.binary.display())))?
                .wait_with_output()
                .await
                .map_err(|e| OcrError::Unavailable(e.to_string()))
        })
        .await
        .map_err(|_| OcrError::Timeout(self.timeout_secs))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Unavailable(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let runs = parse_tsv(&tsv);
        debug!(runs = runs.len(), "tesseract recognised runs");
        Ok(runs)
    }
}

/// Fold tesseract's word-level TSV into line runs.
///
/// TSV columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Level 5 rows are words; a line is
/// identified by (block, par, line).
fn parse_tsv(tsv: &str) -> Vec<OcrRun> {
    let mut runs: Vec<OcrRun> = Vec::new();
    let mut current_key: Option<(u32, u32, u32)> = None;
    let mut current: Option<LineAccumulator> = None;

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let parse = |i: usize| cols[i].trim().parse::<f32>().ok();
        let key = (
            cols[2].trim().parse().unwrap_or(0u32),
            cols[3].trim().parse().unwrap_or(0u32),
            cols[4].trim().parse().unwrap_or(0u32),
        );
        let (Some(left), Some(top), Some(width), Some(height)) =
            (parse(6), parse(7), parse(8), parse(9))
        else {
            warn!("unparsable tsv row skipped");
            continue;
        };
        let conf = parse(10).unwrap_or(-1.0);
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }

        if current_key != Some(key) {
            if let Some(acc) = current.take() {
                runs.push(acc.finish());
            }
            current_key = Some(key);
            current = Some(LineAccumulator::new());
        }
        if let Some(acc) = current.as_mut() {
            acc.push(word, left, top, width, height, conf);
        }
    }
    if let Some(acc) = current.take() {
        runs.push(acc.finish());
    }
    runs
}

struct LineAccumulator {
    text: String,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    conf_sum: f32,
    conf_count: usize,
}

impl LineAccumulator {
    fn new() -> Self {
        Self {
            text: String::new(),
            left: f32::INFINITY,
            top: f32::INFINITY,
            right: 0.0,
            bottom: 0.0,
            conf_sum: 0.0,
            conf_count: 0,
        }
    }

    fn push(&mut self, word: &str, left: f32, top: f32, width: f32, height: f32, conf: f32) {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(word);
        self.left = self.left.min(left);
        self.top = self.top.min(top);
        self.right = self.right.max(left + width);
        self.bottom = self.bottom.max(top + height);
        if conf >= 0.0 {
            self.conf_sum += conf;
            self.conf_count += 1;
        }
    }

    fn finish(self) -> OcrRun {
        let confidence = if self.conf_count > 0 {
            self.conf_sum / self.conf_count as f32
        } else {
            0.0
        };
        OcrRun {
            text: self.text,
            left: self.left,
            top: self.top,
            width: self.right - self.left,
            height: self.bottom - self.top,
            confidence,
        }
    }
}
