use thiserror::Error;

/// Errors that can occur while probing a source or decoding frames from it.
///
/// Configuration problems (bad source, unsupported demuxer, unresolvable frame
/// geometry) are raised while probing or formulating the pipeline and are never
/// retried. Runtime problems (spawn failures, broken pipes) are raised by the
/// operation that hit them.
#[derive(Debug, Clone, Error)]
pub enum DecoderError {
    /// No working ffmpeg executable could be located or validated.
    #[error("failed to find a usable ffmpeg executable ({cause})")]
    BinaryNotFound {
        /// The underlying cause of the error
        cause: String,
    },

    /// A subprocess could not be spawned at all.
    #[error("failed to launch `{command}` ({cause})")]
    SpawnError {
        /// The program that failed to start
        command: String,
        /// The underlying cause of the error
        cause: String,
    },

    /// A subprocess exited unsuccessfully while its exit status mattered.
    #[error("`{command}` exited with status {status}: {output}")]
    CommandFailed {
        /// The command line that was executed
        command: String,
        /// The exit status reported by the operating system
        status: String,
        /// Whatever the command wrote before failing
        output: String,
    },

    /// The text printed by an introspection command could not be understood.
    #[error("failed to parse `{listing}` listing ({cause})")]
    CapabilityParseError {
        /// The introspection flag whose output was being parsed
        listing: String,
        /// The underlying cause of the error
        cause: String,
    },

    /// The source identifier is empty.
    #[error("input source is empty")]
    EmptySource,

    /// The source is neither a file, an image sequence, nor a supported URL.
    #[error("input source `{source_name}` is invalid or unsupported")]
    InvalidSource {
        /// The rejected source string
        source_name: String,
    },

    /// An explicitly requested demuxer is not known to the ffmpeg binary.
    #[error("installed ffmpeg does not recognize the `{demuxer}` demuxer")]
    UnsupportedDemuxer {
        /// The rejected demuxer name
        demuxer: String,
    },

    /// The `auto` demuxer was requested for a source that is not an integer.
    #[error("source `{source_name}` is not a valid device index")]
    InvalidDeviceIndex {
        /// The rejected source string
        source_name: String,
    },

    /// The device index does not address any discovered capture device.
    #[error("device index {index} is out of range for {count} discovered device(s)")]
    DeviceIndexOutOfRange {
        /// The requested index, possibly negative
        index: i64,
        /// How many devices were discovered
        count: usize,
    },

    /// Capture device discovery is not available on this operating system.
    #[error("automatic device discovery is not supported on `{os}`")]
    UnsupportedPlatform {
        /// The operating system name
        os: String,
    },

    /// Device discovery ran but found nothing usable.
    #[error("no usable capture devices were discovered ({cause})")]
    NoDevicesFound {
        /// The underlying cause of the error
        cause: String,
    },

    /// The probe found neither audio nor video stream characteristics.
    #[error("source has no decodable audio or video stream")]
    NoDecodableStream,

    /// No decodeable video stream (or image sequence) was found in the source.
    #[error("no decodeable video stream found in source")]
    NoVideoStream,

    /// Neither the requested nor the probed video decoder is supported.
    #[error(
        "ffmpeg does not support any usable video decoder for this source--set one explicitly or use another ffmpeg build"
    )]
    NoUsableDecoder,

    /// No output resolution could be derived from overrides or probe results.
    #[error("unable to determine the output frame resolution")]
    UnresolvedResolution,

    /// No output framerate could be derived from overrides or probe results.
    #[error("unable to determine the output framerate")]
    UnresolvedFramerate,

    /// The pixel format cannot be represented as raw frame buffers.
    #[error("unsupported pixel format {fmt}")]
    UnsupportedFormat {
        /// The pixel format which triggered the error
        fmt: String,
    },

    /// `formulate` was called on a decoder whose pipeline is already running.
    #[error("the decoding pipeline has already been formulated")]
    AlreadyFormulated,

    /// A frame was requested before the pipeline was formulated.
    #[error("the decoding pipeline has not been formulated yet")]
    NotFormulated,

    /// Reading from the decode subprocess failed.
    #[error("failed to read frame data ({cause})")]
    FrameReadError {
        /// The underlying cause of the error
        cause: String,
    },

    /// The requested sample type does not match the negotiated pixel format.
    #[error("frames are {expected} samples but {requested} samples were requested")]
    SampleTypeMismatch {
        /// The sample type implied by the pixel format
        expected: String,
        /// The sample type requested by the caller
        requested: String,
    },

    /// A metadata update could not be applied.
    #[error("invalid metadata update ({cause})")]
    InvalidMetadata {
        /// The underlying cause of the error
        cause: String,
    },
}
