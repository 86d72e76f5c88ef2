use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{FrameSelection, Transcoder, VideoMetadata};
use crate::engine::config::{DetectionConfig, RemovalConfig, ToolConfig};
use crate::engine::error::EngineError;

const FRAME_PATTERN: &str = "frame_%03d.png";
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// ffprobe/ffmpeg subprocess implementation of [`Transcoder`].
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    tools: ToolConfig,
    preset: String,
    assumed_fps: f64,
    extraction_timeout: Duration,
    reencode_timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(tools: &ToolConfig, detection: &DetectionConfig, removal: &RemovalConfig) -> Self {
        Self {
            tools: tools.clone(),
            preset: removal.preset.clone(),
            assumed_fps: detection.assumed_fps,
            extraction_timeout: detection.extraction_timeout(),
            reencode_timeout: removal.reencode_timeout(),
        }
    }

    /// Checks that both tools answer `-version`.
    pub async fn is_available(&self) -> bool {
        for tool in [&self.tools.ffmpeg_path, &self.tools.ffprobe_path] {
            let ok = Command::new(tool)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if !ok {
                return false;
            }
        }
        true
    }
}

async fn run_tool(program: &Path, args: &[OsString], limit: Duration) -> Result<Output> {
    debug!(program = %program.display(), ?args, "running external tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", program.display()))?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.with_context(|| format!("failed to wait for {}", program.display())),
        Err(_) => anyhow::bail!("{} timed out after {}s", program.display(), limit.as_secs()),
    }
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn exit_message(program: &str, output: &Output) -> String {
    let tail = stderr_tail(output);
    if tail.is_empty() {
        format!("{} exited with {}", program, output.status)
    } else {
        format!("{} exited with {}: {}", program, output.status, tail)
    }
}

/// Parse frame rate string like "30000/1001".
fn parse_frame_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value?.parse::<f64>().ok().filter(|d| d.is_finite() && *d > 0.0)
}

pub(crate) fn parse_probe_output(
    raw: &[u8],
    assumed_fps: f64,
) -> Result<VideoMetadata, EngineError> {
    let parsed: FfprobeOutput = serde_json::from_slice(raw)
        .map_err(|e| EngineError::probe(format!("failed to parse ffprobe output: {}", e)))?;

    let streams = parsed.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| EngineError::probe("no video stream found"))?;
    let has_audio = streams.iter().any(|s| s.codec_type.as_deref() == Some("audio"));

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(EngineError::probe("video stream has no dimensions")),
    };

    let fps = parse_frame_rate(video.avg_frame_rate.as_deref())
        .or_else(|| parse_frame_rate(video.r_frame_rate.as_deref()))
        .unwrap_or(assumed_fps);

    let duration_seconds = parse_seconds(video.duration.as_deref())
        .or_else(|| parse_seconds(parsed.format.as_ref().and_then(|f| f.duration.as_deref())))
        .unwrap_or(0.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration_seconds * fps).round() as u64);

    Ok(VideoMetadata {
        width,
        height,
        duration_seconds,
        fps,
        frame_count,
        has_audio,
        estimated: false,
    })
}

pub(crate) fn extraction_args(
    video_ref: &str,
    selection: &FrameSelection,
    output_dir: &Path,
) -> Vec<OsString> {
    let select = format!("select=not(mod(n\\,{}))", selection.interval_frames.max(1));
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(video_ref.into());
    for arg in ["-vf", select.as_str(), "-vsync", "vfr", "-frames:v"] {
        args.push(arg.into());
    }
    args.push(selection.count.to_string().into());
    args.push(output_dir.join(FRAME_PATTERN).into_os_string());
    args
}

pub(crate) fn reencode_args(
    video_ref: &str,
    filter_graph: &str,
    output_ref: &str,
    preset: &str,
    crf: u8,
) -> Vec<OsString> {
    let crf = crf.to_string();
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y"]
        .iter()
        .map(OsString::from)
        .collect();
    for (flag, value) in [
        ("-i", video_ref),
        ("-filter_complex", filter_graph),
        ("-map", "[vout]"),
        ("-map", "0:a?"),
        ("-c:v", "libx264"),
        ("-preset", preset),
        ("-crf", crf.as_str()),
        ("-c:a", "copy"),
    ] {
        args.push(flag.into());
        args.push(value.into());
    }
    args.push(output_ref.into());
    args
}

fn collect_frames(output_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("frame_") && n.ends_with(".png"))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    Ok(frames)
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[instrument(skip(self))]
    async fn probe(&self, video_ref: &str) -> Result<VideoMetadata, EngineError> {
        let args: Vec<OsString> = [
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            video_ref,
        ]
        .iter()
        .map(OsString::from)
        .collect();

        let output = run_tool(&self.tools.ffprobe_path, &args, self.extraction_timeout)
            .await
            .map_err(|e| EngineError::probe(format!("{:#}", e)))?;

        if !output.status.success() {
            return Err(EngineError::probe(exit_message("ffprobe", &output)));
        }

        parse_probe_output(&output.stdout, self.assumed_fps)
    }

    #[instrument(skip(self, output_dir))]
    async fn extract_frames(
        &self,
        video_ref: &str,
        selection: &FrameSelection,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let args = extraction_args(video_ref, selection, output_dir);
        let output = run_tool(&self.tools.ffmpeg_path, &args, self.extraction_timeout)
            .await
            .map_err(|e| EngineError::extraction(format!("{:#}", e)))?;

        if !output.status.success() {
            return Err(EngineError::extraction(exit_message("ffmpeg", &output)));
        }

        let frames = collect_frames(output_dir)
            .map_err(|e| EngineError::extraction(format!("cannot read scratch directory: {}", e)))?;
        if frames.is_empty() {
            return Err(EngineError::extraction("ffmpeg produced no frames"));
        }
        if frames.len() < selection.count as usize {
            warn!(
                expected = selection.count,
                extracted = frames.len(),
                "fewer frames than requested"
            );
        }
        Ok(frames)
    }

    #[instrument(skip(self, filter_graph))]
    async fn reencode(
        &self,
        video_ref: &str,
        filter_graph: &str,
        output_ref: &str,
        crf: u8,
    ) -> Result<(), EngineError> {
        let args = reencode_args(video_ref, filter_graph, output_ref, &self.preset, crf);
        let output = run_tool(&self.tools.ffmpeg_path, &args, self.reencode_timeout)
            .await
            .map_err(|e| EngineError::transcode(format!("{:#}", e)))?;

        if !output.status.success() {
            return Err(EngineError::transcode(exit_message("ffmpeg", &output)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "width": 1280, "height": 720,
             "r_frame_rate": "30000/1001", "avg_frame_rate": "30000/1001",
             "nb_frames": "1798", "duration": "60.000"},
            {"codec_type": "audio", "duration": "60.010"}
        ],
        "format": {"duration": "60.010"}
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let meta = parse_probe_output(PROBE_JSON.as_bytes(), 30.0).unwrap();
        assert_eq!(meta.width, 1280);
        assert_eq!(meta.height, 720);
        assert_eq!(meta.frame_count, 1798);
        assert!((meta.fps - 29.97).abs() < 0.01);
        assert!(meta.has_audio);
        assert!(!meta.estimated);
    }

    #[test]
    fn test_frame_count_derived_from_duration() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 640, "height": 360,
            "r_frame_rate": "25/1"}], "format": {"duration": "10.0"}}"#;
        let meta = parse_probe_output(json.as_bytes(), 30.0).unwrap();
        assert_eq!(meta.fps, 25.0);
        assert_eq!(meta.frame_count, 250);
        assert!(!meta.has_audio);
    }

    #[test]
    fn test_probe_without_video_stream_fails() {
        let json = r#"{"streams": [{"codec_type": "audio"}]}"#;
        let err = parse_probe_output(json.as_bytes(), 30.0).unwrap_err();
        assert!(matches!(err, EngineError::Probe(_)));

        let err = parse_probe_output(b"not json", 30.0).unwrap_err();
        assert!(matches!(err, EngineError::Probe(_)));
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate(Some("25/1")), Some(25.0));
        assert_eq!(parse_frame_rate(Some("24")), Some(24.0));
        assert_eq!(parse_frame_rate(Some("0/0")), None);
        assert_eq!(parse_frame_rate(None), None);
    }

    #[test]
    fn test_extraction_args() {
        let selection = FrameSelection { interval_frames: 360, count: 5 };
        let args = extraction_args("in.mp4", &selection, Path::new("/tmp/scratch"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"select=not(mod(n\\,360))".to_string()));
        assert_eq!(args[args.len() - 2], "5");
        assert_eq!(args.last().unwrap(), "/tmp/scratch/frame_%03d.png");
    }

    #[test]
    fn test_reencode_args_copy_audio() {
        let args = reencode_args("in.mp4", "[0:v]hqdn3d[vout]", "out.mp4", "medium", 18);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let pos = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[pos + 1], "copy");
        let pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[pos + 1], "[0:v]hqdn3d[vout]");
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[tokio::test]
    async fn test_missing_tool_maps_to_probe_error() {
        let tools = ToolConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
        };
        let transcoder =
            FfmpegTranscoder::new(&tools, &DetectionConfig::default(), &RemovalConfig::default());
        assert!(!transcoder.is_available().await);

        let err = transcoder.probe("in.mp4").await.unwrap_err();
        assert!(matches!(err, EngineError::Probe(_)));

        let dir = tempfile::tempdir().unwrap();
        let selection = FrameSelection { interval_frames: 10, count: 3 };
        let err = transcoder.extract_frames("in.mp4", &selection, dir.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::Extraction(_)));

        let err = transcoder
            .reencode("in.mp4", "[0:v]null[vout]", "out.mp4", 18)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transcode(_)));
    }
}
