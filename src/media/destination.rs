//! Output destinations and the container format they imply

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{RecorderError, Result};

/// Muxing format of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    MpegTs,
}

impl ContainerFormat {
    /// FFmpeg short name
    pub fn short_name(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::MpegTs => "mpegts",
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Container-level options applied when the output is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Keep the caller's timestamps instead of shifting them to zero
    pub copy_ts: bool,
    /// Allow codecs the muxer flags as experimental
    pub experimental: bool,
}

impl ContainerOptions {
    pub fn for_format(format: ContainerFormat) -> Self {
        Self {
            copy_ts: format == ContainerFormat::MpegTs,
            experimental: true,
        }
    }
}

/// Where a recording is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Local file
    File(PathBuf),
    /// Any URI handled by the container sink (`content://`, `udp://`, ...)
    Uri(String),
}

impl Destination {
    /// Generated file name for a recording started at `now`
    pub fn timestamped(dir: impl AsRef<Path>, now: DateTime<Local>) -> Self {
        let name = format!("VID_{}.mp4", now.format("%Y%m%d_%H%M%S"));
        Destination::File(dir.as_ref().join(name))
    }

    pub fn scheme(&self) -> Option<&str> {
        match self {
            Destination::File(_) => None,
            Destination::Uri(uri) => uri.split_once("://").map(|(scheme, _)| scheme),
        }
    }

    /// Files and content-provider URIs are muxed to MP4, anything else is
    /// a live stream and uses MPEG-TS.
    pub fn container_format(&self) -> ContainerFormat {
        match self.scheme() {
            None | Some("content") | Some("file") => ContainerFormat::Mp4,
            Some(_) => ContainerFormat::MpegTs,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.container_format() == ContainerFormat::MpegTs
    }
}

impl FromStr for Destination {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RecorderError::Config("empty destination".into()));
        }
        match s.split_once("://") {
            Some(("file", path)) => Ok(Destination::File(PathBuf::from(path))),
            Some((scheme, _)) if scheme.is_empty() => {
                Err(RecorderError::Config(format!("missing scheme in {}", s)))
            }
            Some(_) => Ok(Destination::Uri(s.to_string())),
            None => Ok(Destination::File(PathBuf::from(s))),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::File(path) => write!(f, "{}", path.display()),
            Destination::Uri(uri) => f.write_str(uri),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_destinations() {
        assert_eq!(
            "/tmp/a.mp4".parse::<Destination>().unwrap(),
            Destination::File(PathBuf::from("/tmp/a.mp4"))
        );
        assert_eq!(
            "file:///tmp/a.mp4".parse::<Destination>().unwrap(),
            Destination::File(PathBuf::from("/tmp/a.mp4"))
        );
        assert_eq!(
            "udp://239.0.0.1:1234".parse::<Destination>().unwrap(),
            Destination::Uri("udp://239.0.0.1:1234".into())
        );
        assert!("".parse::<Destination>().is_err());
        assert!("://nowhere".parse::<Destination>().is_err());
    }

    #[test]
    fn test_container_format_follows_scheme() {
        let file: Destination = "out.mp4".parse().unwrap();
        let content: Destination = "content://media/video/12".parse().unwrap();
        let udp: Destination = "udp://127.0.0.1:5000".parse().unwrap();

        assert_eq!(file.container_format(), ContainerFormat::Mp4);
        assert_eq!(content.container_format(), ContainerFormat::Mp4);
        assert_eq!(udp.container_format(), ContainerFormat::MpegTs);
        assert!(udp.is_stream());
        assert!(ContainerOptions::for_format(ContainerFormat::MpegTs).copy_ts);
        assert!(!ContainerOptions::for_format(ContainerFormat::Mp4).copy_ts);
    }

    #[test]
    fn test_timestamped_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let dest = Destination::timestamped("/videos", now);
        assert_eq!(
            dest,
            Destination::File(PathBuf::from("/videos/VID_20240309_140507.mp4"))
        );
    }
}
