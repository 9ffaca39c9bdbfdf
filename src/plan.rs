//! Resolution of probed metadata and caller options into a decode plan.
//!
//! Everything here is pure: the capability tables are passed in, so the
//! whole priority chain for decoder, pixel format, geometry and frame count
//! can be exercised without running ffmpeg.

use tracing::{info, warn};

use crate::{
    error::DecoderError,
    frame::{FrameGeometry, PixelLayout, SampleType},
    helpers::capabilities::PixelFormatTable,
    metadata::{Metadata, OperationalMode},
    options::{DecoderOptions, Override},
};

/// Pixel format preferred for output frames when the caller has no opinion.
pub const DEFAULT_PIXEL_FORMAT: &str = "rgb24";

/// What the installed ffmpeg build can decode into.
#[derive(Debug, Clone, Default)]
pub(crate) struct Capabilities {
    pub(crate) pixel_formats: PixelFormatTable,
    pub(crate) decoders: Vec<String>,
}

impl Capabilities {
    fn supports_decoder(&self, name: &str) -> bool {
        self.decoders.iter().any(|decoder| decoder == name)
    }
}

/// The configuration a decode pipeline is launched with.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodePlan {
    /// Decoder passed as `-vcodec`, if any.
    pub decoder: Option<String>,
    /// Pixel format the raw frames arrive in.
    pub pixel_format: String,
    /// Whether `-pix_fmt` is part of the command.
    pub emit_pixel_format: bool,
    /// Output frame size as `(width, height)`.
    pub resolution: (u32, u32),
    /// Whether `-s` is part of the command.
    pub emit_resolution: bool,
    /// Output frame rate, if known.
    pub framerate: Option<f64>,
    /// Whether `-r` is part of the command.
    pub emit_framerate: bool,
    /// Frames to decode, `None` for open-ended streams.
    pub frame_count: Option<u64>,
    /// Explicit `-frames:v` limit.
    pub frame_limit: Option<u64>,
    /// Shape of each raw frame.
    pub geometry: FrameGeometry,
    /// How the source is consumed.
    pub mode: OperationalMode,
}

impl DecodePlan {
    /// Components per pixel.
    #[inline]
    #[must_use]
    pub const fn frame_depth(&self) -> usize {
        self.geometry.depth
    }

    /// Sample type of every component.
    #[inline]
    #[must_use]
    pub const fn sample_type(&self) -> SampleType {
        self.geometry.sample_type
    }

    /// Exact byte length of one raw frame.
    #[inline]
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.geometry.frame_len()
    }
}

/// Picks the mode of operation from stream presence.
pub(crate) fn operational_mode(
    metadata: &Metadata,
    passthrough_audio: bool,
) -> Result<OperationalMode, DecoderError> {
    if metadata.source_has_image_sequence {
        Ok(OperationalMode::ImageSequence)
    } else if metadata.source_has_video && metadata.source_has_audio && passthrough_audio {
        Ok(OperationalMode::AudioVideo)
    } else if metadata.source_has_video {
        Ok(OperationalMode::VideoOnly)
    } else {
        Err(DecoderError::NoVideoStream)
    }
}

/// Sample type and component count of a format that frames can be built from.
fn representation(table: &PixelFormatTable, name: &str) -> Option<(SampleType, usize, PixelLayout)> {
    let info = table.get(name)?;
    let depth = info.stored_components()?;
    let sample_type = match info.bits_per_component()? {
        8 => SampleType::U8,
        16 if name.ends_with("le") => SampleType::U16Le,
        16 if name.ends_with("be") => SampleType::U16Be,
        _ => return None,
    };
    Some((sample_type, depth, info.layout))
}

fn resolve_decoder(
    metadata: &Metadata,
    choice: &Override<String>,
    caps: &Capabilities,
) -> Result<Option<String>, DecoderError> {
    if metadata.source_has_image_sequence || choice.is_omitted() {
        return Ok(None);
    }
    let source_decoder = metadata
        .source_video_decoder
        .as_deref()
        .filter(|name| caps.supports_decoder(name));
    match choice.value().or(metadata.source_video_decoder.as_ref()) {
        Some(name) if caps.supports_decoder(name) => Ok(Some(name.clone())),
        requested => {
            let fallback = source_decoder.ok_or(DecoderError::NoUsableDecoder)?;
            warn!(requested = ?requested, fallback, "video decoder is unsupported, switching to source decoder");
            Ok(Some(fallback.to_string()))
        }
    }
}

/// Pixel format and whether it is emitted on the command line.
fn resolve_pixel_format(
    metadata: &Metadata,
    choice: &Override<String>,
    table: &PixelFormatTable,
) -> Result<(String, bool, (SampleType, usize, PixelLayout)), DecoderError> {
    let source_format = metadata.source_video_pixfmt.as_deref();
    let filter_format = metadata
        .filter_output
        .then_some(metadata.output_frames_pixfmt.as_deref())
        .flatten();
    let default_format = if table.supports(DEFAULT_PIXEL_FORMAT) {
        Some(DEFAULT_PIXEL_FORMAT)
    } else {
        source_format
    };

    let (candidate, emit) = match choice {
        Override::Omit => (filter_format.or(source_format), false),
        Override::Value(name) if table.supports(name) => (Some(name.as_str()), true),
        Override::Value(name) => {
            warn!(requested = %name, fallback = ?default_format, "pixel format is unsupported, switching to default");
            (
                filter_format
                    .filter(|name| table.supports(name))
                    .or(default_format),
                true,
            )
        }
        Override::Auto => (
            filter_format
                .filter(|name| table.supports(name))
                .or(default_format),
            true,
        ),
    };

    if let Some((name, repr)) =
        candidate.and_then(|name| representation(table, name).map(|repr| (name, repr)))
    {
        return Ok((name.to_string(), emit, repr));
    }
    let fallback = default_format.ok_or_else(|| DecoderError::UnsupportedFormat {
        fmt: candidate.unwrap_or("unknown").to_string(),
    })?;
    warn!(format = ?candidate, fallback, "frames cannot be built from pixel format, switching to default");
    let repr = representation(table, fallback).ok_or_else(|| DecoderError::UnsupportedFormat {
        fmt: fallback.to_string(),
    })?;
    if !emit {
        info!(fallback, "re-enabling `-pix_fmt` for the fallback format");
    }
    Ok((fallback.to_string(), true, repr))
}

/// Resolves a complete plan for `metadata` under `options`.
///
/// # Errors
///
/// Returns `NoUsableDecoder`, `UnsupportedFormat`, `UnresolvedResolution`,
/// `UnresolvedFramerate` or `NoVideoStream` when the corresponding property
/// cannot be settled.
pub(crate) fn resolve_plan(
    metadata: &Metadata,
    options: &DecoderOptions,
    caps: &Capabilities,
) -> Result<DecodePlan, DecoderError> {
    let mode = match metadata.operational_mode {
        Some(mode) => mode,
        None => operational_mode(metadata, options.passthrough_audio)?,
    };
    let decoder = resolve_decoder(metadata, &options.video_decoder, caps)?;
    let (pixel_format, emit_pixel_format, (sample_type, depth, layout)) =
        resolve_pixel_format(metadata, &options.frame_format, &caps.pixel_formats)?;

    let probed_resolution = metadata
        .filter_output
        .then_some(metadata.output_frames_resolution)
        .flatten()
        .or(metadata.source_video_resolution);
    let resolution = options
        .resolution
        .value()
        .copied()
        .or(probed_resolution)
        .filter(|&(width, height)| width > 0 && height > 0)
        .ok_or(DecoderError::UnresolvedResolution)?;

    let probed_framerate = metadata
        .filter_output
        .then_some(metadata.output_framerate)
        .flatten()
        .or(metadata.source_video_framerate);
    let framerate = match options.framerate {
        Override::Value(fps) if fps > 0.0 => Some(fps),
        Override::Value(fps) => {
            warn!(fps, "ignoring non-positive framerate");
            probed_framerate
        }
        Override::Auto | Override::Omit => probed_framerate,
    }
    .filter(|fps| fps.is_finite() && *fps > 0.0);
    let emit_framerate = !options.framerate.is_omitted();
    if emit_framerate && framerate.is_none() {
        return Err(DecoderError::UnresolvedFramerate);
    }

    let frame_limit = options.frames.filter(|&count| count > 0);
    let frame_count = frame_limit.or(metadata.approx_video_nframes);
    if frame_count.is_none() {
        info!("number of frames is unknown, decoding until the stream ends");
    }

    let geometry = FrameGeometry {
        width: resolution.0 as usize,
        height: resolution.1 as usize,
        depth,
        sample_type,
        layout,
    };
    if geometry.checked_frame_len().is_none() {
        warn!(?resolution, depth, "frame size overflows the address space");
        return Err(DecoderError::UnresolvedResolution);
    }

    Ok(DecodePlan {
        decoder,
        pixel_format,
        emit_pixel_format,
        resolution,
        emit_resolution: !options.resolution.is_omitted(),
        framerate,
        emit_framerate,
        frame_count,
        frame_limit,
        geometry,
        mode,
    })
}

/// Arguments of the decode pipeline, excluding the program itself.
pub(crate) fn decode_args(
    plan: &DecodePlan,
    metadata: &Metadata,
    options: &DecoderOptions,
) -> Vec<String> {
    let mut args = Vec::new();
    if !options.verbose {
        args.push("-hide_banner".to_string());
    }
    args.extend(options.pre_input_args.iter().cloned());
    if let Some(decoder) = &plan.decoder {
        args.extend(["-vcodec".to_string(), decoder.clone()]);
    }
    if let Some(demuxer) = &metadata.source_demuxer {
        args.extend(["-f".to_string(), demuxer.clone()]);
    }
    args.extend(options.input_args.iter().cloned());
    args.extend(["-i".to_string(), metadata.source.clone()]);
    args.extend(options.clones.iter().cloned());
    if plan.emit_pixel_format {
        args.extend(["-pix_fmt".to_string(), plan.pixel_format.clone()]);
    }
    if plan.emit_resolution {
        let (width, height) = plan.resolution;
        args.extend(["-s".to_string(), format!("{width}x{height}")]);
    }
    if let (true, Some(fps)) = (plan.emit_framerate, plan.framerate) {
        args.extend(["-r".to_string(), fps.to_string()]);
    }
    if let Some(limit) = plan.frame_limit {
        args.extend(["-frames:v".to_string(), limit.to_string()]);
    }
    args.extend(options.output_args.iter().cloned());
    args.extend(["-f", "rawvideo", "-"].map(str::to_string));
    args
}
