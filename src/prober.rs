//! Source validation and metadata probing.
//!
//! A [`Prober`] turns a loosely specified source (a path, URL, image pattern,
//! device index, or lavfi expression) into a [`ProbedSource`]: the resolved
//! source string and demuxer plus a [`ProbeResult`] scraped from ffmpeg's
//! diagnostic banner.

use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{Span, debug, debug_span, warn};

use crate::{
    binary::MediaBinary,
    diagnostics::{self, StreamKind},
    error::DecoderError,
    helpers::{
        capabilities::{supported_demuxers, supported_image_extensions, supported_protocols},
        devices::{CaptureDevice, DeviceEnumerator, discover, platform_enumerator},
    },
    options::ProbeOptions,
    util::{dotted_extension, parse_device_index, wrap_index},
};

/// Demuxer value that asks for capture device discovery.
pub const AUTO_DEMUXER: &str = "auto";

/// Identifies what is being decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Path, URL, device index or path, or filter expression.
    pub source: String,
    /// Explicit demuxer (`-f`), or [`AUTO_DEMUXER`].
    pub demuxer: Option<String>,
}

impl SourceDescriptor {
    /// A source whose kind is detected automatically.
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(source: S) -> Self {
        Self {
            source: source.into(),
            demuxer: None,
        }
    }

    /// Reads the source through `demuxer`.
    #[inline]
    #[must_use]
    pub fn with_demuxer<S: Into<String>>(mut self, demuxer: S) -> Self {
        self.demuxer = Some(demuxer.into());
        self
    }
}

/// Stream properties scraped from the diagnostic banner.
///
/// Every property is optional since ffmpeg omits whatever it cannot
/// determine. The `output_*` fields are only set when probing ran with output
/// arguments, and describe the stream after filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// A video stream was found.
    pub has_video: bool,
    /// An audio stream was found.
    pub has_audio: bool,
    /// The source is a directory of numbered images.
    pub has_image_sequence: bool,
    /// `(width, height)` of the selected video stream.
    pub resolution: Option<(u32, u32)>,
    /// Frames per second of the selected video stream.
    pub framerate: Option<f64>,
    /// Native pixel format, e.g. `yuv420p`.
    pub pixel_format: Option<String>,
    /// Codec token, e.g. `h264`.
    pub decoder: Option<String>,
    /// Video bitrate such as `1205k`.
    pub video_bitrate: Option<String>,
    /// Length of the source in seconds.
    pub duration_seconds: Option<f64>,
    /// Estimated number of frames, `None` for live or unbounded sources.
    pub approx_frame_count: Option<u64>,
    /// Audio bitrate such as `384k`.
    pub audio_bitrate: Option<String>,
    /// Audio sample rate such as `48000 Hz`.
    pub audio_sample_rate: Option<String>,
    /// Post-filter `(width, height)`.
    pub output_resolution: Option<(u32, u32)>,
    /// Post-filter pixel format.
    pub output_pixel_format: Option<String>,
    /// Post-filter frame rate.
    pub output_framerate: Option<f64>,
}

impl ProbeResult {
    /// Whether the banner included an output stream summary.
    #[inline]
    #[must_use]
    pub fn has_filter_output(&self) -> bool {
        self.output_resolution.is_some()
            || self.output_pixel_format.is_some()
            || self.output_framerate.is_some()
    }
}

/// A validated source together with its probed metadata.
#[derive(Debug, Clone)]
pub struct ProbedSource {
    binary_path: PathBuf,
    source: String,
    demuxer: Option<String>,
    result: ProbeResult,
    devices: Vec<CaptureDevice>,
    had_output_args: bool,
}

impl ProbedSource {
    /// The ffmpeg executable that probed the source.
    #[inline]
    #[must_use]
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// The resolved source: an absolute file path, URL, or device reference.
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The resolved demuxer, if the source needs one.
    #[inline]
    #[must_use]
    pub fn demuxer(&self) -> Option<&str> {
        self.demuxer.as_deref()
    }

    /// The source's extension including the dot, when no demuxer is used.
    #[inline]
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        self.demuxer
            .is_none()
            .then(|| dotted_extension(&self.source))
    }

    /// The probed stream properties.
    #[inline]
    #[must_use]
    pub fn result(&self) -> &ProbeResult {
        &self.result
    }

    /// Capture devices found while resolving an `auto` demuxer, in index order.
    #[inline]
    #[must_use]
    pub fn devices(&self) -> &[CaptureDevice] {
        &self.devices
    }

    /// Whether probing ran with output arguments such as filters.
    #[inline]
    #[must_use]
    pub fn had_output_args(&self) -> bool {
        self.had_output_args
    }
}

/// How a source without an explicit demuxer was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Forced,
    File,
    ImageSequence,
    Url,
}

/// Validates sources and probes their metadata with ffmpeg.
#[derive(Debug)]
pub struct Prober<'a> {
    binary: &'a dyn MediaBinary,
    options: ProbeOptions,
    enumerator: Option<Box<dyn DeviceEnumerator>>,
    span: Span,
}

impl<'a> Prober<'a> {
    /// Creates a prober that runs `binary`.
    #[inline]
    #[must_use]
    pub fn new(binary: &'a dyn MediaBinary, mut options: ProbeOptions) -> Self {
        let span = options
            .span
            .take()
            .unwrap_or_else(|| debug_span!("prober"));
        let enumerator = options
            .device_enumerator
            .take()
            .or_else(platform_enumerator);
        Self {
            binary,
            options,
            enumerator,
            span,
        }
    }

    /// Validates `descriptor` and extracts its stream properties.
    ///
    /// `stream_indexes` selects which `(video, audio)` stream to describe when
    /// the source has several; out-of-range indexes fall back to the first.
    ///
    /// # Errors
    ///
    /// - `EmptySource` if the source string is empty.
    /// - `InvalidDeviceIndex`, `UnsupportedPlatform`, `NoDevicesFound` or
    ///   `DeviceIndexOutOfRange` while resolving an `auto` demuxer.
    /// - `UnsupportedDemuxer` if an explicit demuxer is unknown to ffmpeg.
    /// - `InvalidSource` if the source is not a file, image sequence, or
    ///   supported URL.
    /// - `NoDecodableStream` if neither audio nor video was found.
    #[inline]
    pub fn probe(
        &self,
        descriptor: &SourceDescriptor,
        stream_indexes: (usize, usize),
    ) -> Result<ProbedSource, DecoderError> {
        let _entered = self.span.enter();
        let mut source = descriptor.source.trim().to_string();
        if source.is_empty() {
            return Err(DecoderError::EmptySource);
        }

        let mut demuxer = descriptor.demuxer.clone();
        if demuxer.is_none() && parse_device_index(&source).is_some() {
            warn!(%source, "source is a device index, enforcing the `auto` demuxer");
            demuxer = Some(AUTO_DEMUXER.to_string());
        }

        let requested = demuxer.clone();
        let mut devices = Vec::new();
        let mut kind = None;
        match requested.as_deref() {
            Some(AUTO_DEMUXER) => {
                let (device, device_demuxer, found) = self.resolve_device(&source)?;
                debug!(name = %device.name, source = %device.source, demuxer = device_demuxer, "configured capture device");
                source = device.source;
                demuxer = Some(device_demuxer.to_string());
                devices = found;
            }
            Some(name) => {
                if !supported_demuxers(self.binary)?.iter().any(|d| d == name) {
                    return Err(DecoderError::UnsupportedDemuxer {
                        demuxer: name.to_string(),
                    });
                }
            }
            None => {
                let (resolved, detected) = self.classify(&source)?;
                debug!(source = %resolved, kind = ?detected, "validated source");
                source = resolved;
                kind = Some(detected);
            }
        }

        let args = self.probe_args(&source, demuxer.as_deref());
        let banner = self.binary.diagnostics(&args)?;
        let result = parse_probe_output(
            &banner,
            kind == Some(SourceKind::ImageSequence),
            stream_indexes,
        )?;
        debug!(?result, "probed source metadata");

        Ok(ProbedSource {
            binary_path: self.binary.path().to_path_buf(),
            source,
            demuxer,
            result,
            devices,
            had_output_args: !self.options.output_args.is_empty(),
        })
    }

    fn resolve_device(
        &self,
        source: &str,
    ) -> Result<(CaptureDevice, &'static str, Vec<CaptureDevice>), DecoderError> {
        let index = parse_device_index(source).ok_or_else(|| DecoderError::InvalidDeviceIndex {
            source_name: source.to_string(),
        })?;
        let enumerator =
            self.enumerator
                .as_deref()
                .ok_or_else(|| DecoderError::UnsupportedPlatform {
                    os: std::env::consts::OS.to_string(),
                })?;
        let devices = discover(enumerator, self.binary)?;
        let position =
            wrap_index(index, devices.len()).ok_or(DecoderError::DeviceIndexOutOfRange {
                index,
                count: devices.len(),
            })?;
        let device = devices[position].clone();
        Ok((device, enumerator.demuxer(), devices))
    }

    fn classify(&self, source: &str) -> Result<(String, SourceKind), DecoderError> {
        let path = Path::new(source);
        if self.options.force_validate_source {
            warn!(source, "forcefully passing validation for source");
            Ok((source.to_string(), SourceKind::Forced))
        } else if path.is_file() {
            let absolute = std::path::absolute(path)
                .map_or_else(|_| source.to_string(), |p| p.to_string_lossy().into_owned());
            Ok((absolute, SourceKind::File))
        } else if self.is_image_sequence(path)? {
            Ok((source.to_string(), SourceKind::ImageSequence))
        } else if self.is_supported_url(source)? {
            Ok((source.to_string(), SourceKind::Url))
        } else {
            warn!(source, "source is unusable or unsupported");
            Err(DecoderError::InvalidSource {
                source_name: source.to_string(),
            })
        }
    }

    fn is_image_sequence(&self, path: &Path) -> Result<bool, DecoderError> {
        let Some(extension) = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase)
        else {
            return Ok(false);
        };
        if !supported_image_extensions(self.binary)?.contains(&extension) {
            return Ok(false);
        }
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let count = count_files_with_extension(dir, &extension);
        debug!(dir = %dir.display(), %extension, count, "checked image sequence directory");
        Ok(count > 2)
    }

    fn is_supported_url(&self, source: &str) -> Result<bool, DecoderError> {
        let Some((scheme, _)) = source.split_once("://") else {
            return Ok(false);
        };
        if supported_protocols(self.binary)?.iter().any(|p| p == scheme) {
            return Ok(true);
        }
        // rtsp is a demuxer rather than a protocol
        Ok(scheme == "rtsp" && supported_demuxers(self.binary)?.iter().any(|d| d == "rtsp"))
    }

    /// Arguments of the metadata-only ffmpeg run.
    pub(crate) fn probe_args(&self, source: &str, demuxer: Option<&str>) -> Vec<String> {
        let with_output = !self.options.output_args.is_empty();
        let mut args = Vec::new();
        if !self.options.verbose {
            args.push("-hide_banner".to_string());
        }
        if with_output {
            args.extend(["-t".to_string(), "0.0001".to_string()]);
        }
        args.extend(self.options.pre_input_args.iter().cloned());
        if let Some(demuxer) = demuxer {
            args.extend(["-f".to_string(), demuxer.to_string()]);
        }
        args.extend(["-i".to_string(), source.to_string()]);
        if with_output {
            args.extend(self.options.output_args.iter().cloned());
            args.extend(["-f", "null", "-"].map(str::to_string));
        }
        args
    }
}

fn count_files_with_extension(dir: &Path, extension: &str) -> usize {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(OsStr::to_str)
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
            })
            .count(),
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot list image sequence directory");
            0
        }
    }
}

/// Builds a [`ProbeResult`] from a diagnostic banner.
pub(crate) fn parse_probe_output(
    banner: &str,
    image_sequence: bool,
    (video_index, audio_index): (usize, usize),
) -> Result<ProbeResult, DecoderError> {
    let (input, output) = diagnostics::split_sections(banner);
    let video = diagnostics::stream_line(input, StreamKind::Video, video_index);

    let mut result = ProbeResult {
        has_image_sequence: image_sequence,
        resolution: video.and_then(diagnostics::resolution),
        framerate: video.and_then(diagnostics::framerate),
        pixel_format: video.and_then(diagnostics::pixel_format),
        decoder: video.and_then(diagnostics::decoder),
        ..ProbeResult::default()
    };

    if let Some(line) =
        output.and_then(|section| diagnostics::stream_line(section, StreamKind::Video, video_index))
    {
        result.output_resolution = diagnostics::resolution(line);
        result.output_framerate = diagnostics::framerate(line);
        result.output_pixel_format = diagnostics::pixel_format(line);
    }

    if !image_sequence {
        result.video_bitrate = video.and_then(diagnostics::bitrate);
        if let Some(line) = diagnostics::stream_line(input, StreamKind::Audio, audio_index) {
            result.audio_bitrate = diagnostics::bitrate(line);
            result.audio_sample_rate = diagnostics::sample_rate(line);
        }
        result.duration_seconds = diagnostics::duration(input);
        result.has_video = result.video_bitrate.is_some()
            || (result.framerate.is_some() && result.resolution.is_some());
        result.has_audio = result.audio_bitrate.is_some() || result.audio_sample_rate.is_some();
        if !result.has_video && !result.has_audio {
            return Err(DecoderError::NoDecodableStream);
        }
    }

    result.approx_frame_count =
        diagnostics::approx_frame_count(result.framerate, result.duration_seconds);
    Ok(result)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs::File;

    use super::*;
    use crate::{binary::fake::FakeBinary, diagnostics::samples};

    #[derive(Debug)]
    pub(crate) struct FakeCameras;

    impl DeviceEnumerator for FakeCameras {
        fn demuxer(&self) -> &'static str {
            "v4l2"
        }

        fn enumerate(&self, _: &dyn MediaBinary) -> Result<Vec<CaptureDevice>, DecoderError> {
            Ok((0..3)
                .map(|i| CaptureDevice {
                    name: format!("Camera {i}"),
                    source: format!("/dev/video{i}"),
                })
                .collect())
        }
    }

    fn prober(binary: &FakeBinary) -> Prober<'_> {
        Prober::new(binary, ProbeOptions::default().device_enumerator(FakeCameras))
    }

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            File::create(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn probes_local_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["clip.mp4"]);
        let binary = FakeBinary::mp4();
        let source = dir.path().join("clip.mp4").to_string_lossy().into_owned();

        let probed = prober(&binary)
            .probe(&SourceDescriptor::new(source.clone()), (0, 0))
            .unwrap();
        assert_eq!(probed.source(), source);
        assert_eq!(probed.demuxer(), None);
        assert_eq!(probed.extension().as_deref(), Some(".mp4"));

        let result = probed.result();
        assert!(result.has_video && result.has_audio && !result.has_image_sequence);
        assert_eq!(result.resolution, Some((1280, 720)));
        assert_eq!(result.framerate, Some(25.0));
        assert_eq!(result.approx_frame_count, Some(133));
        assert_eq!(result.audio_sample_rate.as_deref(), Some("48000 Hz"));
        assert!(!result.has_filter_output());
        assert_eq!(
            binary.last_launch(),
            ["-hide_banner", "-i", source.as_str()]
        );
    }

    #[test]
    fn audio_only_source_has_no_video() {
        let result = parse_probe_output(samples::AUDIO_ONLY_BANNER, false, (0, 0)).unwrap();
        assert!(!result.has_video);
        assert!(result.has_audio);
        assert_eq!(result.approx_frame_count, None);
    }

    #[test]
    fn presence_needs_rate_and_size_without_bitrate() {
        let banner = "Input #0, matroska,webm, from 'mixed.mkv':
  Duration: 00:00:04.00, start: 0.000000, bitrate: N/A
    Stream #0:0: Video: vp9, yuv420p(tv), 1280x720, SAR 1:1 DAR 16:9, 30 fps, 30 tbr, 1k tbn
    Stream #0:1: Audio: opus, stereo, fltp, 96 kb/s
";
        let result = parse_probe_output(banner, false, (0, 0)).unwrap();
        assert!(result.has_video);
        assert!(result.has_audio);
        assert_eq!(result.video_bitrate, None);
        assert_eq!(result.audio_sample_rate, None);
        assert_eq!(result.approx_frame_count, Some(120));
    }

    #[test]
    fn no_streams_is_an_error() {
        let banner = "Input #0, data, from 'blob.bin':\n  Duration: N/A\n    Stream #0:0: Data: none\n";
        let err = parse_probe_output(banner, false, (0, 0)).unwrap_err();
        assert!(matches!(err, DecoderError::NoDecodableStream));
    }

    #[test]
    fn filtered_probe_reports_output_stream() {
        let result = parse_probe_output(samples::FILTERED_BANNER, false, (0, 0)).unwrap();
        assert_eq!(result.output_resolution, Some((640, 360)));
        assert_eq!(result.output_pixel_format.as_deref(), Some("gray"));
        assert_eq!(result.output_framerate, Some(12.5));
        assert!(result.has_filter_output());
    }

    #[test]
    fn output_args_switch_to_null_sink() {
        let binary = FakeBinary::mp4();
        let prober = Prober::new(
            &binary,
            ProbeOptions::default()
                .pre_input_args(["-re"])
                .output_args(["-vf", "scale=640:-1"]),
        );
        let args = prober.probe_args("in.mp4", Some("mov"));
        assert_eq!(
            args,
            [
                "-hide_banner", "-t", "0.0001", "-re", "-f", "mov", "-i", "in.mp4", "-vf",
                "scale=640:-1", "-f", "null", "-",
            ]
        );
    }

    #[test]
    fn image_sequence_needs_more_than_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let banner = "Input #0, image2, from 'img%03d.png':
  Duration: 00:00:00.12, start: 0.000000, bitrate: N/A
    Stream #0:0: Video: png, rgb24(pc), 640x480, 25 fps, 25 tbr, 25 tbn
";
        let binary = FakeBinary::new(banner);
        let pattern = dir.path().join("img%03d.png").to_string_lossy().into_owned();

        touch(dir.path(), &["img001.png", "img002.png"]);
        let err = prober(&binary)
            .probe(&SourceDescriptor::new(pattern.clone()), (0, 0))
            .unwrap_err();
        assert!(matches!(err, DecoderError::InvalidSource { .. }));

        touch(dir.path(), &["img003.PNG"]);
        let probed = prober(&binary)
            .probe(&SourceDescriptor::new(pattern), (0, 0))
            .unwrap();
        let result = probed.result();
        assert!(result.has_image_sequence);
        assert!(!result.has_video);
        assert_eq!(result.resolution, Some((640, 480)));
        assert_eq!(result.duration_seconds, None);
        assert_eq!(result.approx_frame_count, None);
    }

    #[test]
    fn urls_need_a_known_scheme() {
        let binary = FakeBinary::mp4();
        let prober = prober(&binary);
        for url in ["https://example.com/clip.mp4", "rtsp://camera.local/stream"] {
            let probed = prober.probe(&SourceDescriptor::new(url), (0, 0)).unwrap();
            assert_eq!(probed.source(), url);
        }
        let err = prober
            .probe(&SourceDescriptor::new("gopher://example.com/clip"), (0, 0))
            .unwrap_err();
        assert!(matches!(err, DecoderError::InvalidSource { .. }));
    }

    #[test]
    fn forced_validation_accepts_anything() {
        let binary = FakeBinary::mp4();
        let prober = Prober::new(&binary, ProbeOptions::default().force_validate_source(true));
        let probed = prober
            .probe(&SourceDescriptor::new("not-a-real-source"), (0, 0))
            .unwrap();
        assert_eq!(probed.source(), "not-a-real-source");
    }

    #[test]
    fn empty_source_is_rejected() {
        let binary = FakeBinary::mp4();
        let err = prober(&binary)
            .probe(&SourceDescriptor::new("  "), (0, 0))
            .unwrap_err();
        assert!(matches!(err, DecoderError::EmptySource));
    }

    #[test]
    fn explicit_demuxer_is_validated() {
        let binary = FakeBinary::new(samples::LAVFI_BANNER);
        let prober = prober(&binary);
        let probed = prober
            .probe(
                &SourceDescriptor::new("testsrc=size=1280x720:rate=30").with_demuxer("lavfi"),
                (0, 0),
            )
            .unwrap();
        assert_eq!(probed.demuxer(), Some("lavfi"));
        assert_eq!(probed.extension(), None);
        assert_eq!(probed.result().framerate, Some(30.0));
        assert_eq!(probed.result().approx_frame_count, None);

        let err = prober
            .probe(&SourceDescriptor::new("x").with_demuxer("nonexistent"), (0, 0))
            .unwrap_err();
        assert!(matches!(err, DecoderError::UnsupportedDemuxer { .. }));
    }

    #[test]
    fn device_indexes_wrap_from_the_end() {
        let binary = FakeBinary::mp4();
        let prober = prober(&binary);
        let last = prober.probe(&SourceDescriptor::new("-1"), (0, 0)).unwrap();
        let explicit = prober
            .probe(&SourceDescriptor::new("2").with_demuxer(AUTO_DEMUXER), (0, 0))
            .unwrap();
        assert_eq!(last.source(), "/dev/video2");
        assert_eq!(last.source(), explicit.source());
        assert_eq!(last.demuxer(), Some("v4l2"));
        assert_eq!(last.devices().len(), 3);

        for index in ["3", "-4"] {
            let err = prober
                .probe(&SourceDescriptor::new(index), (0, 0))
                .unwrap_err();
            assert!(matches!(
                err,
                DecoderError::DeviceIndexOutOfRange { count: 3, .. }
            ));
        }
    }

    #[test]
    fn auto_demuxer_needs_an_index() {
        let binary = FakeBinary::mp4();
        let err = prober(&binary)
            .probe(&SourceDescriptor::new("webcam").with_demuxer(AUTO_DEMUXER), (0, 0))
            .unwrap_err();
        assert!(matches!(err, DecoderError::InvalidDeviceIndex { .. }));
    }
}
