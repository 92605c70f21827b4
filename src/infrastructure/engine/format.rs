//! Output format descriptors (`container/codec` plus a quality preset).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("format descriptor '{0}' must look like 'container/codec'")]
    Malformed(String),
    #[error("unknown container '{0}'")]
    UnknownContainer(String),
    #[error("unknown video codec '{0}'")]
    UnknownCodec(String),
    #[error("unknown quality preset '{0}'")]
    UnknownQuality(String),
    #[error("codec {codec} cannot be muxed into {container}")]
    Incompatible {
        container: Container,
        codec: VideoCodec,
    },
    #[error("format {0} is not enabled on this worker")]
    NotAllowed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mkv,
    Webm,
    Mov,
}

impl Container {
    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
            Container::Mov => "mov",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Name of the ffmpeg muxer for `-f`.
    pub fn muxer(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "matroska",
            Container::Webm => "webm",
            Container::Mov => "mov",
        }
    }

    pub fn supports(&self, codec: VideoCodec) -> bool {
        match self {
            Container::Mkv => true,
            Container::Mp4 => matches!(codec, VideoCodec::H264 | VideoCodec::H265 | VideoCodec::Av1),
            Container::Webm => matches!(codec, VideoCodec::Vp9 | VideoCodec::Av1),
            Container::Mov => matches!(codec, VideoCodec::H264 | VideoCodec::H265),
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Container {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Container::Mp4),
            "mkv" | "matroska" => Ok(Container::Mkv),
            "webm" => Ok(Container::Webm),
            "mov" => Ok(Container::Mov),
            other => Err(FormatError::UnknownContainer(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }

    /// ffmpeg encoder used for this codec.
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Av1 => "libsvtav1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoCodec {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(VideoCodec::H264),
            "h265" | "hevc" => Ok(VideoCodec::H265),
            "vp9" => Ok(VideoCodec::Vp9),
            "av1" => Ok(VideoCodec::Av1),
            other => Err(FormatError::UnknownCodec(other.to_string())),
        }
    }
}

/// Resolution preset. Anything but `Best` caps the output height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Quality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::P1080 => "1080p",
            Quality::P720 => "720p",
            Quality::P480 => "480p",
            Quality::P360 => "360p",
        }
    }

    pub fn max_height(&self) -> Option<u32> {
        match self {
            Quality::Best => None,
            Quality::P1080 => Some(1080),
            Quality::P720 => Some(720),
            Quality::P480 => Some(480),
            Quality::P360 => Some(360),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" | "" => Ok(Quality::Best),
            "1080p" | "1080" => Ok(Quality::P1080),
            "720p" | "720" => Ok(Quality::P720),
            "480p" | "480" => Ok(Quality::P480),
            "360p" | "360" => Ok(Quality::P360),
            other => Err(FormatError::UnknownQuality(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct OutputFormat {
    pub container: Container,
    pub video_codec: VideoCodec,
    pub quality: Quality,
}

impl OutputFormat {
    /// Parses `container/codec` and checks the pair can be muxed together.
    pub fn parse(descriptor: &str, quality: Quality) -> Result<Self, FormatError> {
        let (container, codec) = descriptor
            .split_once('/')
            .ok_or_else(|| FormatError::Malformed(descriptor.to_string()))?;
        if codec.contains('/') {
            return Err(FormatError::Malformed(descriptor.to_string()));
        }

        let container: Container = container.parse()?;
        let video_codec: VideoCodec = codec.parse()?;
        if !container.supports(video_codec) {
            return Err(FormatError::Incompatible {
                container,
                codec: video_codec,
            });
        }

        Ok(Self {
            container,
            video_codec,
            quality,
        })
    }

    pub fn descriptor(&self) -> String {
        format!("{}/{}", self.container, self.video_codec)
    }

    pub fn audio_encoder(&self) -> &'static str {
        match self.container {
            Container::Webm => "libopus",
            _ => "aac",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.descriptor(), self.quality)
    }
}

/// The `container/codec` pairs this worker accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatAllowlist(BTreeSet<(Container, VideoCodec)>);

impl FormatAllowlist {
    /// Parses a comma separated list such as `mp4/h264,webm/vp9`.
    pub fn parse(list: &str) -> Result<Self, FormatError> {
        let mut pairs = BTreeSet::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let format = OutputFormat::parse(entry, Quality::Best)?;
            pairs.insert((format.container, format.video_codec));
        }
        if pairs.is_empty() {
            return Err(FormatError::Malformed(list.to_string()));
        }
        Ok(Self(pairs))
    }

    pub fn check(&self, format: &OutputFormat) -> Result<(), FormatError> {
        if self.0.contains(&(format.container, format.video_codec)) {
            Ok(())
        } else {
            Err(FormatError::NotAllowed(format.descriptor()))
        }
    }

    pub fn descriptors(&self) -> Vec<String> {
        self.0.iter().map(|(c, v)| format!("{c}/{v}")).collect()
    }
}

impl Default for FormatAllowlist {
    fn default() -> Self {
        Self(BTreeSet::from([
            (Container::Mp4, VideoCodec::H264),
            (Container::Mp4, VideoCodec::H265),
            (Container::Webm, VideoCodec::Vp9),
            (Container::Mkv, VideoCodec::H264),
        ]))
    }
}
