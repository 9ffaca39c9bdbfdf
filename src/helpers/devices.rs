use std::{fmt, path::PathBuf, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    binary::MediaBinary,
    error::DecoderError,
    helpers::{
        capabilities::supported_demuxers,
        process::{Capture, run_program},
    },
};

static QUOTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(.*?[^\\])""#).expect("valid regex"));
static INDEXED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[0-9]+\](.*)").expect("valid regex"));
static V4L2_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.\- ]*").expect("valid regex"));

/// A video capture device discovered on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureDevice {
    /// Human-readable device name.
    pub name: String,
    /// The string ffmpeg expects as `-i` for this device.
    pub source: String,
}

/// Lists the video capture devices of one platform.
pub trait DeviceEnumerator: fmt::Debug + Send + Sync {
    /// The ffmpeg demuxer that reads from these devices.
    fn demuxer(&self) -> &'static str;

    /// Discovers the devices, in the order ffmpeg indexes them.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform listing command cannot be run.
    fn enumerate(&self, binary: &dyn MediaBinary) -> Result<Vec<CaptureDevice>, DecoderError>;
}

/// DirectShow devices on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectShow;

impl DeviceEnumerator for DirectShow {
    #[inline]
    fn demuxer(&self) -> &'static str {
        "dshow"
    }

    #[inline]
    fn enumerate(&self, binary: &dyn MediaBinary) -> Result<Vec<CaptureDevice>, DecoderError> {
        let listing = binary.diagnostics(&list_devices_args(self.demuxer()))?;
        Ok(parse_dshow_listing(&listing))
    }
}

/// AVFoundation devices on macOS.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvFoundation;

impl DeviceEnumerator for AvFoundation {
    #[inline]
    fn demuxer(&self) -> &'static str {
        "avfoundation"
    }

    #[inline]
    fn enumerate(&self, binary: &dyn MediaBinary) -> Result<Vec<CaptureDevice>, DecoderError> {
        let listing = binary.diagnostics(&list_devices_args(self.demuxer()))?;
        Ok(parse_avfoundation_listing(&listing))
    }
}

/// Video4Linux2 devices, discovered through `v4l2-ctl`.
#[derive(Debug, Clone)]
pub struct Video4Linux {
    ctl: PathBuf,
}

impl Default for Video4Linux {
    #[inline]
    fn default() -> Self {
        Self::with_ctl("v4l2-ctl")
    }
}

impl Video4Linux {
    /// Uses the `v4l2-ctl` executable at `ctl`.
    #[inline]
    #[must_use]
    pub fn with_ctl<P: Into<PathBuf>>(ctl: P) -> Self {
        Self { ctl: ctl.into() }
    }

    fn node_captures_video(&self, node: &str) -> bool {
        let device_arg = format!("--device={node}");
        match run_program(&self.ctl, &[device_arg.as_str(), "--all"], Capture::Stdout) {
            Ok(report) => report.contains("Width/Height") && report.contains("Pixel Format"),
            Err(e) => {
                debug!(node, error = %e, "skipping unreadable video node");
                false
            }
        }
    }
}

impl DeviceEnumerator for Video4Linux {
    #[inline]
    fn demuxer(&self) -> &'static str {
        "v4l2"
    }

    #[inline]
    fn enumerate(&self, _binary: &dyn MediaBinary) -> Result<Vec<CaptureDevice>, DecoderError> {
        let listing = run_program(&self.ctl, &["--list-devices"], Capture::Diagnostics).map_err(
            |e| DecoderError::NoDevicesFound {
                cause: format!("cannot run `{}`, is v4l-utils installed? ({e})", self.ctl.display()),
            },
        )?;
        if listing.contains("Cannot open device") && !listing.contains("):") {
            return Err(DecoderError::NoDevicesFound {
                cause: "permission denied, add the user to the `video` group".to_string(),
            });
        }

        let mut devices = Vec::new();
        for (name, nodes) in parse_v4l2_listing(&listing) {
            if nodes.len() > 1 {
                warn!(device = %name, nodes = nodes.len(), "device exposes several video nodes, probing each");
                devices.extend(
                    nodes
                        .into_iter()
                        .filter(|node| self.node_captures_video(node))
                        .map(|node| CaptureDevice {
                            name: name.clone(),
                            source: node,
                        }),
                );
            } else {
                devices.extend(nodes.into_iter().map(|node| CaptureDevice {
                    name: name.clone(),
                    source: node,
                }));
            }
        }
        Ok(devices)
    }
}

/// The enumerator for the platform this crate was built for, if any.
#[inline]
#[must_use]
pub fn platform_enumerator() -> Option<Box<dyn DeviceEnumerator>> {
    if cfg!(target_os = "windows") {
        Some(Box::new(DirectShow))
    } else if cfg!(target_os = "macos") {
        Some(Box::new(AvFoundation))
    } else if cfg!(target_os = "linux") {
        Some(Box::new(Video4Linux::default()))
    } else {
        None
    }
}

fn list_devices_args(demuxer: &str) -> Vec<String> {
    ["-hide_banner", "-list_devices", "true", "-f", demuxer, "-i", "dummy"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Discovers devices and checks that the required demuxer is available.
pub(crate) fn discover(
    enumerator: &dyn DeviceEnumerator,
    binary: &dyn MediaBinary,
) -> Result<Vec<CaptureDevice>, DecoderError> {
    let demuxer = enumerator.demuxer();
    if !supported_demuxers(binary)?.iter().any(|d| d == demuxer) {
        return Err(DecoderError::UnsupportedDemuxer {
            demuxer: demuxer.to_string(),
        });
    }
    debug!(demuxer, "searching for capture devices");
    let devices = enumerator.enumerate(binary)?;
    if devices.is_empty() {
        return Err(DecoderError::NoDevicesFound {
            cause: format!("`{demuxer}` reported no video devices"),
        });
    }
    for (index, device) in devices.iter().enumerate() {
        info!(index, name = %device.name, source = %device.source, "found capture device");
    }
    Ok(devices)
}

pub(crate) fn parse_dshow_listing(listing: &str) -> Vec<CaptureDevice> {
    let video = listing
        .split_once("DirectShow audio")
        .map_or(listing, |(head, _)| head);
    video
        .lines()
        .filter(|line| !line.contains("(audio)"))
        .flat_map(|line| QUOTED_NAME.captures_iter(line))
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.starts_with("@device"))
        .map(|name| CaptureDevice {
            source: format!("video={name}"),
            name,
        })
        .collect()
}

pub(crate) fn parse_avfoundation_listing(listing: &str) -> Vec<CaptureDevice> {
    let video = listing
        .split_once("AVFoundation audio")
        .map_or(listing, |(head, _)| head);
    INDEXED_NAME
        .captures_iter(video)
        .enumerate()
        .map(|(index, caps)| CaptureDevice {
            name: caps[1].trim().to_string(),
            source: index.to_string(),
        })
        .collect()
}

/// Device blocks of `v4l2-ctl --list-devices`: a name line followed by its
/// `/dev/video*` nodes.
pub(crate) fn parse_v4l2_listing(listing: &str) -> Vec<(String, Vec<String>)> {
    listing
        .split("\n\n")
        .map(str::trim)
        .filter(|block| block.contains("/dev/video") && block.contains("):"))
        .map(|block| {
            let name = V4L2_NAME
                .find(block)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let nodes = block
                .lines()
                .map(str::trim)
                .filter(|line| line.starts_with("/dev/video"))
                .map(str::to_string)
                .collect();
            (name, nodes)
        })
        .collect()
}
