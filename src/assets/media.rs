use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context as _;

use crate::foundation::core::Fps;
use crate::foundation::error::{MosaicError, MosaicResult};

/// ffmpeg image-sequence pattern used for extracted and composited frames.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";

#[derive(Clone, Debug)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub duration_sec: f64,
}

impl VideoSourceInfo {
    pub fn source_fps(&self) -> f64 {
        if self.fps_den == 0 {
            0.0
        } else {
            f64::from(self.fps_num) / f64::from(self.fps_den)
        }
    }
}

/// File name ffmpeg gives the `n`-th (1-based) frame of [`FRAME_PATTERN`].
pub fn frame_file_name(n: u64) -> String {
    format!("{FRAME_PREFIX}{n:06}.{FRAME_EXTENSION}")
}

pub fn is_ffmpeg_on_path() -> bool {
    tool_on_path("ffmpeg")
}

pub fn is_ffprobe_on_path() -> bool {
    tool_on_path("ffprobe")
}

fn tool_on_path(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn probe_video(source_path: &Path) -> MosaicResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| MosaicError::media(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(MosaicError::media(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| MosaicError::media(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MosaicError::media("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| MosaicError::media("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| MosaicError::media("missing video height from ffprobe"))?;

    let (fps_num, fps_den) = parse_ff_ratio(video_stream.r_frame_rate.as_deref().unwrap_or("0/1"))
        .ok_or_else(|| MosaicError::media("invalid video r_frame_rate"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        fps_num,
        fps_den,
        duration_sec,
    })
}

/// Decode `source` into a numbered PNG sequence in `frames_dir`, sampled at `fps`.
///
/// Returns the extracted frame paths in playback order.
#[tracing::instrument(skip_all, fields(source = %source.display()))]
pub fn extract_frames(source: &Path, frames_dir: &Path, fps: Fps) -> MosaicResult<Vec<PathBuf>> {
    if !is_ffmpeg_on_path() {
        return Err(MosaicError::media(
            "ffmpeg is required for frame extraction, but was not found on PATH",
        ));
    }
    std::fs::create_dir_all(frames_dir)
        .with_context(|| format!("create frames directory '{}'", frames_dir.display()))?;
    clear_frames(frames_dir)?;

    let out = Command::new("ffmpeg")
        .args(["-v", "error", "-y", "-i"])
        .arg(source)
        .args(["-vf", &format!("fps={}", fps.to_ffmpeg_arg())])
        .arg(frames_dir.join(FRAME_PATTERN))
        .stdout(Stdio::null())
        .output()
        .map_err(|e| MosaicError::media(format!("failed to run ffmpeg for frame extraction: {e}")))?;
    if !out.status.success() {
        return Err(MosaicError::media(format!(
            "ffmpeg frame extraction failed for '{}': {}",
            source.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let frames = list_frames(frames_dir)?;
    if frames.is_empty() {
        return Err(MosaicError::media(format!(
            "ffmpeg produced no frames for '{}'",
            source.display()
        )));
    }
    tracing::info!(frames = frames.len(), "extracted frames");
    Ok(frames)
}

/// Frame files (`frame_NNNNNN.png`) in `dir`, sorted by frame number.
pub fn list_frames(dir: &Path) -> MosaicResult<Vec<PathBuf>> {
    let read = std::fs::read_dir(dir)
        .with_context(|| format!("read frames directory '{}'", dir.display()))?;
    let mut numbered = Vec::new();
    for entry in read {
        let entry = entry.with_context(|| format!("read frames directory '{}'", dir.display()))?;
        let path = entry.path();
        if let Some(n) = frame_number(&path) {
            numbered.push((n, path));
        }
    }
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

/// Delete every frame file (`frame_NNNNNN.png`) in `dir`, leaving other files alone.
///
/// Returns the number of files removed. A missing directory counts as empty.
pub fn clear_frames(dir: &Path) -> MosaicResult<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let stale = list_frames(dir)?;
    for path in &stale {
        std::fs::remove_file(path)
            .with_context(|| format!("remove stale frame '{}'", path.display()))?;
    }
    if !stale.is_empty() {
        tracing::debug!(dir = %dir.display(), removed = stale.len(), "cleared stale frames");
    }
    Ok(stale.len())
}

fn frame_number(path: &Path) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some(FRAME_EXTENSION) {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(FRAME_PREFIX)?
        .parse::<u64>()
        .ok()
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.parse::<u32>().ok()?;
    let b = parts.next()?.parse::<u32>().ok()?;
    if b == 0 {
        return None;
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_names_follow_the_pattern() {
        assert_eq!(frame_file_name(1), "frame_000001.png");
        assert_eq!(frame_number(Path::new("x/frame_000042.png")), Some(42));
        assert_eq!(frame_number(Path::new("x/frame_000042.jpg")), None);
        assert_eq!(frame_number(Path::new("x/other_000042.png")), None);
    }

    #[test]
    fn list_frames_sorts_numerically_and_ignores_strays() {
        let dir = std::env::temp_dir().join(format!("lumosaic_list_frames_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["frame_000010.png", "frame_000002.png", "notes.txt", "frame_000001.png"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let frames = list_frames(&dir).unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["frame_000001.png", "frame_000002.png", "frame_000010.png"]
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn clear_frames_removes_only_frame_files() {
        let dir = std::env::temp_dir().join(format!("lumosaic_clear_frames_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["frame_000001.png", "frame_000007.png", "catalog.json"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        assert_eq!(clear_frames(&dir).unwrap(), 2);
        assert!(list_frames(&dir).unwrap().is_empty());
        assert!(dir.join("catalog.json").exists());
        assert_eq!(clear_frames(&dir.join("missing")).unwrap(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn parses_ffprobe_ratios() {
        assert_eq!(parse_ff_ratio("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_ff_ratio("25/0"), None);
        assert_eq!(parse_ff_ratio("abc"), None);
    }
}
