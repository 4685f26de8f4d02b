use std::io::{BufRead as _, BufReader, Read as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context as _;

use crate::assets::media::{FRAME_PATTERN, is_ffmpeg_on_path, list_frames};
use crate::foundation::core::Fps;
use crate::foundation::error::{MosaicError, MosaicResult};

/// Options for encoding a numbered frame sequence into an MP4.
#[derive(Clone, Debug)]
pub struct EncodeConfig {
    /// Directory holding `frame_NNNNNN.png` files, numbered from 1 without gaps.
    pub frames_dir: PathBuf,
    pub fps: Fps,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl EncodeConfig {
    pub fn validate(&self) -> MosaicResult<()> {
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(MosaicError::validation("encode fps must be non-zero"));
        }
        if !self.frames_dir.is_dir() {
            return Err(MosaicError::validation(format!(
                "frames directory '{}' does not exist",
                self.frames_dir.display()
            )));
        }
        Ok(())
    }
}

/// Progress line reported by ffmpeg's `-progress` output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeProgress {
    pub frames_encoded: u64,
    pub finished: bool,
}

/// Encode the frame sequence described by `cfg`, calling `on_progress` as ffmpeg reports it.
///
/// Returns the number of frames ffmpeg reported as encoded.
#[tracing::instrument(skip(on_progress), fields(out = %cfg.out_path.display()))]
pub fn encode_frame_sequence(
    cfg: &EncodeConfig,
    on_progress: &mut dyn FnMut(EncodeProgress),
) -> MosaicResult<u64> {
    cfg.validate()?;
    let expected = list_frames(&cfg.frames_dir)?.len() as u64;
    if expected == 0 {
        return Err(MosaicError::encoding(format!(
            "no frames to encode in '{}'",
            cfg.frames_dir.display()
        )));
    }

    ensure_parent_dir(&cfg.out_path)?;
    if !cfg.overwrite && cfg.out_path.exists() {
        return Err(MosaicError::validation(format!(
            "output file '{}' already exists",
            cfg.out_path.display()
        )));
    }
    if !is_ffmpeg_on_path() {
        return Err(MosaicError::encoding(
            "ffmpeg is required for MP4 encoding, but was not found on PATH",
        ));
    }

    let mut cmd = Command::new("ffmpeg");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.arg(if cfg.overwrite { "-y" } else { "-n" });
    cmd.args([
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
        "-framerate",
        &cfg.fps.to_ffmpeg_arg(),
        "-i",
    ])
    .arg(cfg.frames_dir.join(FRAME_PATTERN))
    // yuv420p needs even dimensions; pad odd frames by one pixel.
    .args([
        "-vf",
        "pad=ceil(iw/2)*2:ceil(ih/2)*2",
        "-an",
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        "-movflags",
        "+faststart",
    ])
    .arg(&cfg.out_path);

    let mut child = cmd.spawn().map_err(|e| {
        MosaicError::encoding(format!(
            "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MosaicError::encoding("failed to open ffmpeg stdout (unexpected)"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| MosaicError::encoding("failed to open ffmpeg stderr (unexpected)"))?;
    let stderr_drain = std::thread::spawn(move || {
        let mut stderr_bytes = Vec::new();
        stderr.read_to_end(&mut stderr_bytes)?;
        Ok::<_, std::io::Error>(stderr_bytes)
    });

    let mut progress = EncodeProgress::default();
    for line in BufReader::new(stdout).lines() {
        let line = line.map_err(|e| MosaicError::encoding(format!("ffmpeg progress read: {e}")))?;
        if apply_progress_line(&mut progress, &line) {
            tracing::debug!(frames = progress.frames_encoded, expected, "encoding");
            on_progress(progress);
        }
    }

    let status = child.wait().map_err(|e| {
        MosaicError::encoding(format!("failed to wait for ffmpeg to finish: {e}"))
    })?;
    let stderr_bytes = stderr_drain
        .join()
        .map_err(|_| MosaicError::encoding("ffmpeg stderr drain thread panicked"))?
        .map_err(|e| MosaicError::encoding(format!("ffmpeg stderr read failed: {e}")))?;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr_bytes);
        return Err(MosaicError::encoding(format!(
            "ffmpeg exited with status {}: {}",
            status,
            stderr.trim()
        )));
    }

    if progress.frames_encoded < expected {
        tracing::warn!(
            encoded = progress.frames_encoded,
            expected,
            "ffmpeg encoded fewer frames than the sequence holds"
        );
    }
    Ok(progress.frames_encoded)
}

/// Fold one `key=value` line of ffmpeg progress output. Returns `true` at the end of a block.
fn apply_progress_line(progress: &mut EncodeProgress, line: &str) -> bool {
    let Some((key, value)) = line.trim().split_once('=') else {
        return false;
    };
    match key {
        "frame" => {
            if let Ok(n) = value.trim().parse::<u64>() {
                progress.frames_encoded = n;
            }
            false
        }
        "progress" => {
            progress.finished = value.trim() == "end";
            true
        }
        _ => false,
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> MosaicResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}
