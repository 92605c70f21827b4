//! ffmpeg-backed [`TranscodeEngine`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::format::{OutputFormat, VideoCodec};
use super::process::{ToolCommand, ToolError};
use super::{check_paths, EngineSummary, TranscodeEngine, TranscodeError, TranscodeOutcome, TranscodeRequest};

/// Lines of stderr kept in a failed job's error detail.
const DIAGNOSTIC_LINES: usize = 20;

pub struct FfmpegEngine {
    binary: PathBuf,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn invoke(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        check_paths(request).await?;

        let mut cmd = ToolCommand::new(self.binary.clone());
        cmd.args(build_args(&request.input, &request.output, &request.format))
            .timeout(request.timeout)
            .grace(request.grace);

        info!(
            "🎥 Transcoding {:?} -> {:?} ({})",
            request.input, request.output, request.format
        );

        let output = match cmd.execute(cancel).await {
            Ok(output) => output,
            Err(e) => {
                discard_partial(&request.output).await;
                return Err(match e {
                    ToolError::TimedOut(after) => TranscodeError::Timeout(after),
                    ToolError::Cancelled => TranscodeError::Cancelled,
                    ToolError::Spawn { .. } | ToolError::Io(_) => TranscodeError::Spawn(e.to_string()),
                });
            }
        };

        if !output.status.success() {
            discard_partial(&request.output).await;
            return Err(TranscodeError::Failed {
                status: output.status.to_string(),
                diagnostics: diagnostic_tail(&output.stderr, DIAGNOSTIC_LINES),
            });
        }

        let bytes = match fs::metadata(&request.output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                discard_partial(&request.output).await;
                return Err(TranscodeError::Failed {
                    status: output.status.to_string(),
                    diagnostics: format!(
                        "engine reported success but wrote no output\n{}",
                        diagnostic_tail(&output.stderr, DIAGNOSTIC_LINES)
                    ),
                });
            }
        };

        Ok(TranscodeOutcome {
            output: request.output.clone(),
            bytes,
            elapsed: output.elapsed,
            summary: parse_summary(&output.stderr),
        })
    }
}

async fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove partial output {:?}: {}", path, e);
        }
    }
}

/// ffmpeg arguments for one transcode. `-n` refuses to overwrite the output.
pub fn build_args(input: &Path, output: &Path, format: &OutputFormat) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-n", "-i"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(input.to_string_lossy().to_string());

    args.extend(["-map", "0:v:0", "-map", "0:a:0?"].map(String::from));
    args.extend(["-c:v".to_string(), format.video_codec.encoder().to_string()]);

    let quality: &[&str] = match format.video_codec {
        VideoCodec::H264 => &["-preset", "fast", "-crf", "23"],
        VideoCodec::H265 => &["-preset", "fast", "-crf", "28"],
        VideoCodec::Vp9 => &["-crf", "32", "-b:v", "0"],
        VideoCodec::Av1 => &["-preset", "8", "-crf", "35"],
    };
    args.extend(quality.iter().map(|s| s.to_string()));

    if let Some(height) = format.quality.max_height() {
        args.push("-vf".to_string());
        args.push(format!("scale=-2:'min({height},ih)'"));
    }

    let audio_bitrate = if format.audio_encoder() == "libopus" { "96k" } else { "128k" };
    args.extend([
        "-c:a".to_string(),
        format.audio_encoder().to_string(),
        "-b:a".to_string(),
        audio_bitrate.to_string(),
    ]);

    if matches!(format.container.muxer(), "mp4" | "mov") {
        args.extend(["-movflags", "+faststart"].map(String::from));
    }

    args.extend(["-f".to_string(), format.container.muxer().to_string()]);
    args.push(output.to_string_lossy().to_string());
    args
}

/// Pulls durations, speed and stream sizes out of ffmpeg's stderr. Progress
/// lines are `\r` separated, so both line endings are split on.
pub fn parse_summary(stderr: &str) -> EngineSummary {
    let mut summary = EngineSummary::default();

    for line in stderr.split(['\n', '\r']).map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("Duration:") {
            if summary.input_duration_secs.is_none() {
                let stamp = rest.trim().split(',').next().unwrap_or_default();
                summary.input_duration_secs = parse_timestamp(stamp);
            }
        }
        if let Some(stamp) = field(line, "time=") {
            if let Some(secs) = parse_timestamp(stamp) {
                summary.encoded_duration_secs = Some(secs);
            }
        }
        if let Some(speed) = field(line, "speed=") {
            if let Ok(value) = speed.trim_end_matches('x').parse::<f64>() {
                summary.speed = Some(value);
            }
        }
        if line.starts_with("video:") {
            summary.video_kib = field(line, "video:").and_then(parse_kib);
            summary.audio_kib = field(line, "audio:").and_then(parse_kib);
        }
    }

    summary
}

/// Last `lines` non-empty lines of engine output.
pub fn diagnostic_tail(stderr: &str, lines: usize) -> String {
    let kept: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}

/// Value after `key`, skipping padding spaces, up to the next whitespace.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let value = rest.split_whitespace().next()?;
    (!value.is_empty()).then_some(value)
}

/// `HH:MM:SS.ss` to seconds. ffmpeg prints `N/A` before the first frame.
fn parse_timestamp(stamp: &str) -> Option<f64> {
    let mut parts = stamp.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_kib(raw: &str) -> Option<u64> {
    let digits = raw
        .trim_end_matches("KiB")
        .trim_end_matches("kB")
        .trim_end_matches("kiB");
    digits.parse().ok()
}
