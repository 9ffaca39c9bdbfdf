//! Typed configuration for probing and decoding.

use std::path::PathBuf;

use tracing::Span;

use crate::{binary::BinaryLocator, helpers::devices::DeviceEnumerator};

/// A value that is either derived automatically, given explicitly, or left
/// out of the ffmpeg command altogether.
///
/// `Omit` is meant for filter graphs that already fix a property downstream,
/// where re-asserting it on the command line would conflict.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Override<T> {
    /// Derive the value from probed metadata.
    #[default]
    Auto,
    /// Use this value.
    Value(T),
    /// Do not emit the corresponding flag.
    Omit,
}

impl<T> Override<T> {
    /// The explicit value, if one was given.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Auto | Self::Omit => None,
        }
    }

    /// Whether the flag should be left out.
    #[inline]
    #[must_use]
    pub const fn is_omitted(&self) -> bool {
        matches!(self, Self::Omit)
    }
}

/// Output pixel format selection, e.g. `Override::Value("gray".into())`.
pub type PixelFormatChoice = Override<String>;

/// Video decoder selection, passed to ffmpeg as `-vcodec`.
pub type DecoderChoice = Override<String>;

/// Options that affect how a source is validated and probed.
#[derive(Debug, Default)]
pub struct ProbeOptions {
    /// Accept sources that fail classification, logging a warning instead.
    pub force_validate_source: bool,
    /// Arguments placed before the input, such as `-re`.
    pub pre_input_args: Vec<String>,
    /// Output arguments (usually filters) applied during probing so the
    /// post-filter stream shape is reported.
    pub output_args: Vec<String>,
    /// Keep ffmpeg's banner in probe output.
    pub verbose: bool,
    /// Device enumerator used for the `auto` demuxer. Defaults to the one for
    /// the current platform.
    pub device_enumerator: Option<Box<dyn DeviceEnumerator>>,
    /// Span that prober events are recorded in.
    pub span: Option<Span>,
}

impl ProbeOptions {
    /// Accepts sources that fail validation.
    #[inline]
    #[must_use]
    pub fn force_validate_source(mut self, force: bool) -> Self {
        self.force_validate_source = force;
        self
    }

    /// Adds arguments placed before the input.
    #[inline]
    #[must_use]
    pub fn pre_input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds output arguments used while probing.
    #[inline]
    #[must_use]
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keeps ffmpeg's banner.
    #[inline]
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Uses a custom device enumerator for the `auto` demuxer.
    #[inline]
    #[must_use]
    pub fn device_enumerator<E: DeviceEnumerator + 'static>(mut self, enumerator: E) -> Self {
        self.device_enumerator = Some(Box::new(enumerator));
        self
    }

    /// Records prober events inside `span`.
    #[inline]
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Options for a decoding session.
///
/// Every field has a sensible default, so `DecoderOptions::default()` decodes
/// the first video stream into `rgb24` frames at the source's own size and
/// rate.
#[derive(Debug, Default)]
pub struct DecoderOptions {
    /// Output pixel format.
    pub frame_format: PixelFormatChoice,
    /// Output frame size as `(width, height)`.
    pub resolution: Override<(u32, u32)>,
    /// Output frame rate.
    pub framerate: Override<f64>,
    /// Maximum number of frames to decode (`-frames:v`).
    pub frames: Option<u64>,
    /// Video decoder for the source.
    pub video_decoder: DecoderChoice,
    /// Arguments placed before the input, such as `-re`.
    pub pre_input_args: Vec<String>,
    /// Arguments placed right before `-i`, after the demuxer.
    pub input_args: Vec<String>,
    /// Auxiliary inputs appended after the main input, e.g.
    /// `["-i", "logo.png"]` for overlays.
    pub clones: Vec<String>,
    /// Output arguments passed through verbatim.
    pub output_args: Vec<String>,
    /// Preferred `(video, audio)` stream indexes.
    pub stream_indexes: (usize, usize),
    /// Pass the audio stream through when the source has both.
    pub passthrough_audio: bool,
    /// Custom ffmpeg executable or directory containing it.
    pub custom_ffmpeg: Option<PathBuf>,
    /// Directory hint for locators that download ffmpeg.
    pub download_dir: Option<PathBuf>,
    /// How to find ffmpeg. Defaults to [`SystemLocator`](crate::SystemLocator).
    pub locator: Option<Box<dyn BinaryLocator>>,
    /// Options for the probe that runs on construction.
    pub probe: ProbeOptions,
    /// Keep ffmpeg's banner and inherit its stderr while decoding.
    pub verbose: bool,
    /// Span that decoder events are recorded in.
    pub span: Option<Span>,
}

impl DecoderOptions {
    /// Requests frames in `pix_fmt`, e.g. `gray` or `bgr24`.
    #[inline]
    #[must_use]
    pub fn frame_format<S: Into<String>>(mut self, pix_fmt: S) -> Self {
        self.frame_format = Override::Value(pix_fmt.into());
        self
    }

    /// Leaves `-pix_fmt` out of the decode command.
    #[inline]
    #[must_use]
    pub fn omit_frame_format(mut self) -> Self {
        self.frame_format = Override::Omit;
        self
    }

    /// Scales frames to `width` x `height`.
    #[inline]
    #[must_use]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Override::Value((width, height));
        self
    }

    /// Sets the output frame rate.
    #[inline]
    #[must_use]
    pub fn framerate(mut self, fps: f64) -> Self {
        self.framerate = Override::Value(fps);
        self
    }

    /// Stops after `count` frames.
    #[inline]
    #[must_use]
    pub fn frames(mut self, count: u64) -> Self {
        self.frames = Some(count);
        self
    }

    /// Decodes the source with the named decoder.
    #[inline]
    #[must_use]
    pub fn video_decoder<S: Into<String>>(mut self, decoder: S) -> Self {
        self.video_decoder = Override::Value(decoder.into());
        self
    }

    /// Applies a `-vf` filter graph while probing and while decoding.
    #[inline]
    #[must_use]
    pub fn video_filter<S: Into<String>>(mut self, filter: S) -> Self {
        let filter = filter.into();
        self.probe
            .output_args
            .extend(["-vf".to_string(), filter.clone()]);
        self.output_args.extend(["-vf".to_string(), filter]);
        self
    }

    /// Adds arguments placed before the input for both probing and decoding.
    #[inline]
    #[must_use]
    pub fn pre_input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        self.probe.pre_input_args.extend(args.iter().cloned());
        self.pre_input_args.extend(args);
        self
    }

    /// Adds arguments placed right before `-i`.
    #[inline]
    #[must_use]
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds auxiliary inputs after the main input.
    #[inline]
    #[must_use]
    pub fn clones<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clones.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds output arguments passed through verbatim.
    #[inline]
    #[must_use]
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Selects which video and audio stream to read.
    #[inline]
    #[must_use]
    pub fn stream_indexes(mut self, video: usize, audio: usize) -> Self {
        self.stream_indexes = (video, audio);
        self
    }

    /// Passes audio through when the source carries both streams.
    #[inline]
    #[must_use]
    pub fn passthrough_audio(mut self, passthrough: bool) -> Self {
        self.passthrough_audio = passthrough;
        self
    }

    /// Uses the ffmpeg executable at `path`, a file or directory.
    #[inline]
    #[must_use]
    pub fn custom_ffmpeg<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.custom_ffmpeg = Some(path.into());
        self
    }

    /// Gives locators that download ffmpeg a directory to put it in.
    #[inline]
    #[must_use]
    pub fn download_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    /// Finds ffmpeg with a custom locator.
    #[inline]
    #[must_use]
    pub fn locator<L: BinaryLocator + 'static>(mut self, locator: L) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    /// Merges `probe` into the probe options.
    ///
    /// Arguments already added through [`video_filter`](Self::video_filter),
    /// [`pre_input_args`](Self::pre_input_args) or an earlier call stay in
    /// front of the new ones. Flags are combined, and the enumerator and span
    /// of `probe` win when set.
    #[inline]
    #[must_use]
    pub fn probe(mut self, mut probe: ProbeOptions) -> Self {
        let mut previous = std::mem::take(&mut self.probe);
        previous.pre_input_args.append(&mut probe.pre_input_args);
        previous.output_args.append(&mut probe.output_args);
        probe.pre_input_args = previous.pre_input_args;
        probe.output_args = previous.output_args;
        probe.force_validate_source |= previous.force_validate_source;
        probe.verbose |= previous.verbose;
        probe.device_enumerator = probe.device_enumerator.or(previous.device_enumerator);
        probe.span = probe.span.or(previous.span);
        self.probe = probe;
        self
    }

    /// Keeps ffmpeg's banner and stderr for both probing and decoding.
    #[inline]
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self.probe.verbose = verbose;
        self
    }

    /// Records decoder events inside `span`.
    #[inline]
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_filter_reaches_probe_and_decode() {
        let options = DecoderOptions::default().video_filter("scale=320:-1");
        assert_eq!(options.output_args, ["-vf", "scale=320:-1"]);
        assert_eq!(options.probe.output_args, ["-vf", "scale=320:-1"]);
    }

    #[test]
    fn pre_input_args_are_shared() {
        let options = DecoderOptions::default().pre_input_args(["-re"]);
        assert_eq!(options.pre_input_args, ["-re"]);
        assert_eq!(options.probe.pre_input_args, ["-re"]);
    }

    #[test]
    fn probe_options_merge_with_earlier_arguments() {
        let options = DecoderOptions::default()
            .video_filter("format=gray")
            .pre_input_args(["-re"])
            .verbose(true)
            .probe(
                ProbeOptions::default()
                    .pre_input_args(["-thread_queue_size", "512"])
                    .output_args(["-an"])
                    .force_validate_source(true),
            );
        assert_eq!(
            options.probe.pre_input_args,
            ["-re", "-thread_queue_size", "512"]
        );
        assert_eq!(options.probe.output_args, ["-vf", "format=gray", "-an"]);
        assert!(options.probe.verbose);
        assert!(options.probe.force_validate_source);

        let options = options.probe(ProbeOptions::default());
        assert_eq!(options.probe.output_args, ["-vf", "format=gray", "-an"]);
        assert!(options.probe.force_validate_source);
    }

    #[test]
    fn overrides_report_their_state() {
        let options = DecoderOptions::default().resolution(640, 480).omit_frame_format();
        assert_eq!(options.resolution.value(), Some(&(640, 480)));
        assert!(options.frame_format.is_omitted());
        assert!(options.framerate.value().is_none());
        assert!(!options.framerate.is_omitted());
    }
}
