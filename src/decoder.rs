//! The decoding session: probe, formulate, read, terminate.

use std::{
    mem,
    process::{Child, ChildStdout},
};

use serde_json::Value;
use tracing::{Span, debug, debug_span, error, info, warn};

use crate::{
    binary::{BinaryLocator, MediaBinary, SystemLocator},
    error::DecoderError,
    frame::{Frame, FrameReader, Sample, check_sample_type},
    helpers::{
        capabilities::{supported_pixel_formats, supported_video_decoders},
        devices::CaptureDevice,
    },
    metadata::{Metadata, MetadataValue},
    options::DecoderOptions,
    plan::{self, Capabilities, DecodePlan},
    prober::{Prober, SourceDescriptor},
    util::display_command,
};

/// A decoder that runs ffmpeg as a subprocess and reads raw frames from its
/// standard output.
///
/// The source is probed when the decoder is created. [`formulate`] then
/// settles the decode plan and launches the pipeline, after which frames are
/// pulled one at a time with [`next_frame`] or lazily with [`frames`]. The
/// subprocess is killed by [`terminate`] or when the decoder is dropped.
///
/// Reads block until ffmpeg delivers a whole frame. Nothing reads ahead, so
/// the caller's consumption rate paces the subprocess.
///
/// [`formulate`]: FfDecoder::formulate
/// [`next_frame`]: FfDecoder::next_frame
/// [`frames`]: FfDecoder::frames
/// [`terminate`]: FfDecoder::terminate
///
/// ## Examples
///
/// ```no_run
/// use av_ffpipe::{DecoderOptions, FfDecoder, SourceDescriptor};
///
/// let options = DecoderOptions::default().frame_format("gray").frames(100);
/// let mut decoder = FfDecoder::new(SourceDescriptor::new("video.mp4"), options)?;
/// decoder.formulate()?;
///
/// for frame in decoder.frames::<u8>()? {
///     println!("{}x{}", frame.width(), frame.height());
/// }
/// decoder.terminate();
/// # Ok::<(), av_ffpipe::DecoderError>(())
/// ```
#[derive(Debug)]
pub struct FfDecoder {
    binary: Box<dyn MediaBinary>,
    options: DecoderOptions,
    metadata: Metadata,
    devices: Vec<CaptureDevice>,
    plan: Option<DecodePlan>,
    process: Option<Child>,
    reader: Option<FrameReader<ChildStdout>>,
    terminated: bool,
    span: Span,
}

impl FfDecoder {
    /// Locates ffmpeg and probes `descriptor`.
    ///
    /// The executable is found with `options.locator`, or [`SystemLocator`]
    /// when none is set.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::BinaryNotFound` if ffmpeg cannot be located,
    /// any error of [`Prober::probe`], and `DecoderError::NoVideoStream` if
    /// the source has no video to decode.
    #[inline]
    pub fn new(
        descriptor: SourceDescriptor,
        mut options: DecoderOptions,
    ) -> Result<Self, DecoderError> {
        let locator: Box<dyn BinaryLocator> =
            options.locator.take().unwrap_or_else(|| Box::new(SystemLocator));
        let binary = locator.locate(
            options.custom_ffmpeg.as_deref(),
            options.download_dir.as_deref(),
        )?;
        Self::with_binary(binary, descriptor, options)
    }

    /// Probes `descriptor` with an already located executable.
    ///
    /// # Errors
    ///
    /// Same as [`FfDecoder::new`], minus the locator failure.
    #[inline]
    pub fn with_binary<B: MediaBinary + 'static>(
        binary: B,
        descriptor: SourceDescriptor,
        mut options: DecoderOptions,
    ) -> Result<Self, DecoderError> {
        let span = options
            .span
            .take()
            .unwrap_or_else(|| debug_span!("decoder", source = %descriptor.source));
        let binary: Box<dyn MediaBinary> = Box::new(binary);

        let (metadata, devices) = {
            let _entered = span.enter();
            let prober = Prober::new(binary.as_ref(), mem::take(&mut options.probe));
            let probed = prober.probe(&descriptor, options.stream_indexes)?;
            let mut metadata = Metadata::from_probe(&probed);
            let mode = plan::operational_mode(&metadata, options.passthrough_audio)?;
            info!(%mode, source = %metadata.source(), "selected operational mode");
            metadata.operational_mode = Some(mode);
            (metadata, probed.devices().to_vec())
        };

        Ok(Self {
            binary,
            options,
            metadata,
            devices,
            plan: None,
            process: None,
            reader: None,
            terminated: false,
            span,
        })
    }

    /// Resolves the decode plan and launches the ffmpeg pipeline.
    ///
    /// Can only succeed once per decoder. Metadata updates made before this
    /// call are taken into account.
    ///
    /// # Errors
    ///
    /// - `DecoderError::AlreadyFormulated` on a second call. The running
    ///   pipeline is left untouched.
    /// - Any error of plan resolution, such as `NoUsableDecoder` or
    ///   `UnresolvedResolution`.
    /// - `DecoderError::SpawnError` if ffmpeg cannot be launched.
    #[inline]
    pub fn formulate(&mut self) -> Result<&DecodePlan, DecoderError> {
        let _entered = self.span.enter();
        if self.plan.is_some() {
            error!("decoding pipeline is already running, refusing to launch another");
            return Err(DecoderError::AlreadyFormulated);
        }

        let caps = Capabilities {
            pixel_formats: supported_pixel_formats(self.binary.as_ref())?,
            decoders: supported_video_decoders(self.binary.as_ref())?,
        };
        let plan = plan::resolve_plan(&self.metadata, &self.options, &caps)?;
        let args = plan::decode_args(&plan, &self.metadata, &self.options);
        info!(
            pixfmt = %plan.pixel_format,
            width = plan.resolution.0,
            height = plan.resolution.1,
            framerate = ?plan.framerate,
            frames = ?plan.frame_count,
            "formulated decode plan"
        );
        debug!(command = %display_command(self.binary.path(), &args), "launching pipeline");

        let mut child = self.binary.spawn_pipeline(&args, self.options.verbose)?;
        let Some(stdout) = child.stdout.take() else {
            if let Err(e) = child.kill() {
                debug!(error = %e, "pipeline without stdout already exited");
            }
            if let Err(e) = child.wait() {
                warn!(error = %e, "failed to reap pipeline");
            }
            return Err(DecoderError::SpawnError {
                command: self.binary.path().to_string_lossy().into_owned(),
                cause: "standard output was not captured".to_string(),
            });
        };
        self.reader = Some(FrameReader::new(stdout, plan.geometry));
        self.process = Some(child);
        self.terminated = false;
        Ok(self.plan.insert(plan))
    }

    /// Reads the next frame, or `None` once the stream has ended.
    ///
    /// Blocks until a whole frame is available. A short read means the
    /// stream ended and is not retried.
    ///
    /// # Errors
    ///
    /// - `DecoderError::NotFormulated` before [`formulate`](Self::formulate).
    /// - `DecoderError::SampleTypeMismatch` if `T` does not fit the plan.
    /// - `DecoderError::FrameReadError` if the pipe fails mid-frame.
    #[inline]
    pub fn next_frame<T: Sample>(&mut self) -> Result<Option<Frame<T>>, DecoderError> {
        if self.plan.is_none() {
            return Err(DecoderError::NotFormulated);
        }
        self.reader
            .as_mut()
            .map_or(Ok(None), |reader| reader.read_frame())
    }

    /// A lazy iterator over the remaining frames.
    ///
    /// When the plan knows the frame count, at most that many frames are
    /// yielded in total; otherwise frames are read until the stream ends.
    /// Once the stream has ended, or after [`terminate`](Self::terminate),
    /// later calls yield nothing.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::NotFormulated` before
    /// [`formulate`](Self::formulate), and
    /// `DecoderError::SampleTypeMismatch` if `T` does not fit the plan.
    #[inline]
    pub fn frames<T: Sample>(&mut self) -> Result<impl Iterator<Item = Frame<T>>, DecoderError> {
        let plan = self.plan.as_ref().ok_or(DecoderError::NotFormulated)?;
        check_sample_type::<T>(plan.sample_type())?;
        let frame_count = plan.frame_count;
        let frames = self.reader.as_mut().map(|reader| {
            let limit = frame_count.map(|count| {
                usize::try_from(count)
                    .unwrap_or(usize::MAX)
                    .saturating_sub(reader.frames_read())
            });
            reader.frames(limit)
        });
        Ok(frames.into_iter().flatten())
    }

    /// The plan the pipeline runs with, once formulated.
    #[inline]
    #[must_use]
    pub fn plan(&self) -> Option<&DecodePlan> {
        self.plan.as_ref()
    }

    /// The merged probe and override metadata.
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The metadata as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::InvalidMetadata` if serialization fails.
    #[inline]
    pub fn metadata_json(&self, pretty: bool) -> Result<String, DecoderError> {
        self.metadata.to_json(pretty)
    }

    /// Applies a partial metadata update. See [`Metadata::update`].
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::InvalidMetadata` if `changes` is empty.
    #[inline]
    pub fn update_metadata<I, K, V>(&mut self, changes: I) -> Result<usize, DecoderError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        let _entered = self.span.enter();
        if self.plan.is_some() {
            warn!("pipeline is already running, metadata changes will not affect it");
        }
        self.metadata.update(changes)
    }

    /// A single metadata value, as it appears in [`metadata_json`](Self::metadata_json).
    #[inline]
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<Value> {
        self.metadata.get(key)
    }

    /// Capture devices discovered while resolving an `auto` demuxer.
    #[inline]
    #[must_use]
    pub fn devices(&self) -> &[CaptureDevice] {
        &self.devices
    }

    /// The operating system id of the running pipeline.
    #[inline]
    #[must_use]
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().map(Child::id)
    }

    /// Whether [`terminate`](Self::terminate) has torn a pipeline down.
    #[inline]
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Closes the pipes and kills the pipeline, waiting for it to exit.
    ///
    /// Safe to call any number of times.
    #[inline]
    pub fn terminate(&mut self) {
        let _entered = self.span.enter();
        let Some(mut child) = self.process.take() else {
            info!("no pipeline is running, nothing to terminate");
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                info!(%status, "pipeline has already exited");
                self.reader = None;
            }
            Ok(None) | Err(_) => {
                drop(child.stdin.take());
                self.reader = None;
                if let Err(e) = child.kill() {
                    debug!(error = %e, "pipeline exited before it could be killed");
                }
                match child.wait() {
                    Ok(status) => debug!(%status, "pipeline terminated"),
                    Err(e) => warn!(error = %e, "failed to reap pipeline"),
                }
            }
        }
        self.terminated = true;
    }
}

impl Drop for FfDecoder {
    #[inline]
    fn drop(&mut self) {
        self.terminate();
    }
}
