//! This crate decodes video into raw frames by running ffmpeg as a subprocess
//! and reading its standard output.
//!
//! Sources are probed up front by scraping the diagnostic banner ffmpeg prints
//! for its inputs, so the frame geometry is known before a single byte is
//! decoded. Capture devices, image sequences, URLs and local files are all
//! accepted, as is anything else ffmpeg can open with an explicit demuxer.
//!
//! An ffmpeg executable is required at runtime. By default it is looked up on
//! `PATH`; see [`BinaryLocator`] for other strategies.
//!
//! ```no_run
//! use av_ffpipe::{DecoderOptions, FfDecoder, SourceDescriptor};
//!
//! let mut decoder = FfDecoder::new(
//!     SourceDescriptor::new("video.mp4"),
//!     DecoderOptions::default().resolution(640, 360),
//! )?;
//! println!("{}", decoder.metadata_json(true)?);
//!
//! decoder.formulate()?;
//! while let Some(frame) = decoder.next_frame::<u8>()? {
//!     assert_eq!(frame.shape(), [360, 640, 3]);
//! }
//! # Ok::<(), av_ffpipe::DecoderError>(())
//! ```

mod error;
mod util;
mod helpers {
    pub(crate) mod capabilities;
    pub(crate) mod devices;
    pub(crate) mod process;
}

pub mod binary;
pub mod decoder;
pub mod diagnostics;
pub mod frame;
pub mod metadata;
pub mod options;
pub mod plan;
pub mod prober;

pub use binary::{BinaryLocator, FfmpegBinary, MediaBinary, SystemLocator};
pub use decoder::FfDecoder;
pub use error::DecoderError;
pub use frame::{Frame, FrameGeometry, FrameIter, FrameReader, PixelLayout, Sample, SampleType};
pub use helpers::capabilities::{PixelFormatInfo, PixelFormatTable};
pub use helpers::devices::{
    AvFoundation, CaptureDevice, DeviceEnumerator, DirectShow, Video4Linux, platform_enumerator,
};
pub use metadata::{FieldPolicy, Metadata, MetadataValue, OperationalMode};
pub use options::{DecoderChoice, DecoderOptions, Override, PixelFormatChoice, ProbeOptions};
pub use plan::{DEFAULT_PIXEL_FORMAT, DecodePlan};
pub use prober::{AUTO_DEMUXER, ProbeResult, ProbedSource, Prober, SourceDescriptor};
