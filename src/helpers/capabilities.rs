use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use tracing::debug;

use crate::{binary::MediaBinary, error::DecoderError, frame::PixelLayout};

/// Pixel formats whose raw output stores every component as its own
/// full-resolution plane. These are the only formats that need a
/// planar-to-interleaved conversion; subsampled planar formats never reach
/// the reader because their bits per component is not 8 or 16.
const FULL_RESOLUTION_PLANAR: &[&str] = &[
    "yuv444p",
    "yuvj444p",
    "yuv444p16le",
    "yuv444p16be",
    "yuva444p",
    "yuva444p16le",
    "yuva444p16be",
    "gbrp",
    "gbrp16le",
    "gbrp16be",
    "gbrap",
    "gbrap16le",
    "gbrap16be",
];

/// Packed formats with an unused padding byte per pixel. `-pix_fmts` lists
/// them with the meaningful components only, but rawvideo stores all four.
const PADDED_PACKED: &[&str] = &["0rgb", "rgb0", "0bgr", "bgr0", "vuyx"];

/// Formats that store luma in one plane and interleaved chroma in another.
/// Their samples fit neither the packed nor the planar reshape.
const SEMI_PLANAR: &[&str] = &[
    "nv12", "nv21", "nv16", "nv24", "nv42", "nv20le", "nv20be", "p010le", "p010be", "p012le",
    "p012be", "p016le", "p016be", "p210le", "p210be", "p212le", "p212be", "p216le", "p216be",
    "p410le", "p410be", "p412le", "p412be", "p416le", "p416be",
];

/// Image formats that ffmpeg reads through `<name>_pipe` demuxers but whose
/// files conventionally carry a different extension.
const IMAGE_EXTENSION_ALIASES: &[(&str, &str)] = &[("jpeg", "jpg"), ("tiff", "tif")];

static PIX_FMT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z.]{5})\s+([a-z0-9_]+)\s+([0-9]+)\s+([0-9]+)").expect("valid regex")
});
static DECODER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^V[A-Z.]{5}\s+([a-z0-9_-]+)").expect("valid regex"));
static DEMUXER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^D[E. ]?\s*(?:d\s+)?([a-z0-9_,-]+)").expect("valid regex")
});
static IMAGE_PIPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z0-9]+)_pipe\b").expect("valid regex"));

/// One entry of ffmpeg's `-pix_fmts` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormatInfo {
    /// Format token, e.g. `rgb24`.
    pub name: String,
    /// Number of components per pixel.
    pub components: u8,
    /// Meaningful bits per pixel across all components.
    pub bits_per_pixel: u16,
    /// Whether ffmpeg can convert frames into this format.
    pub output: bool,
    /// Paletted formats carry a palette after the pixel indexes of every frame.
    pub paletted: bool,
    /// Bitstream formats pack several pixels into one byte.
    pub bitstream: bool,
    /// Classification used to reshape raw frames of this format.
    pub layout: PixelLayout,
}

impl PixelFormatInfo {
    /// Bits per component, if the pixel's bits divide evenly between them.
    #[inline]
    #[must_use]
    pub fn bits_per_component(&self) -> Option<u16> {
        let components = u16::from(self.components);
        (components > 0 && self.bits_per_pixel % components == 0)
            .then(|| self.bits_per_pixel / components)
    }

    /// Samples stored per pixel in a raw frame, or `None` if frames of this
    /// format cannot be cut into fixed-size sample grids.
    ///
    /// Padded formats store one more sample than they have components.
    #[inline]
    #[must_use]
    pub fn stored_components(&self) -> Option<usize> {
        if self.paletted
            || self.bitstream
            || self.components == 0
            || SEMI_PLANAR.contains(&self.name.as_str())
        {
            return None;
        }
        let padding = usize::from(PADDED_PACKED.contains(&self.name.as_str()));
        Some(usize::from(self.components) + padding)
    }
}

/// Classifies a pixel format by component count and the explicit planar table.
fn classify(name: &str, components: u8) -> PixelLayout {
    if components == 1 {
        PixelLayout::Gray
    } else if FULL_RESOLUTION_PLANAR.contains(&name) {
        PixelLayout::Planar
    } else {
        PixelLayout::Packed
    }
}

/// Lookup table of the pixel formats an ffmpeg build supports.
#[derive(Debug, Clone, Default)]
pub struct PixelFormatTable {
    formats: HashMap<String, PixelFormatInfo>,
}

impl PixelFormatTable {
    /// Looks up a format by name.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PixelFormatInfo> {
        self.formats.get(name)
    }

    /// Whether `name` is a format ffmpeg can produce.
    #[inline]
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.get(name).is_some_and(|info| info.output)
    }

    /// Number of formats in the table.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Whether the table is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// All formats, in no particular order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PixelFormatInfo> {
        self.formats.values()
    }
}

impl FromIterator<PixelFormatInfo> for PixelFormatTable {
    #[inline]
    fn from_iter<I: IntoIterator<Item = PixelFormatInfo>>(iter: I) -> Self {
        Self {
            formats: iter
                .into_iter()
                .map(|info| (info.name.clone(), info))
                .collect(),
        }
    }
}

/// Lines following the first separator line made only of dashes.
fn after_separator(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .skip_while(|line| {
            let line = line.trim();
            line.is_empty() || !line.chars().all(|c| c == '-')
        })
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

pub(crate) fn parse_pixel_formats(listing: &str) -> Result<PixelFormatTable, DecoderError> {
    let table: PixelFormatTable = after_separator(listing)
        .filter_map(|line| PIX_FMT_LINE.captures(line))
        .filter_map(|caps| {
            let name = caps[2].to_string();
            let components = caps[3].parse().ok()?;
            let flags = caps[1].as_bytes();
            Some(PixelFormatInfo {
                layout: classify(&name, components),
                output: flags.get(1) == Some(&b'O'),
                paletted: flags.get(3) == Some(&b'P'),
                bitstream: flags.get(4) == Some(&b'B'),
                bits_per_pixel: caps[4].parse().ok()?,
                components,
                name,
            })
        })
        .collect();
    if table.is_empty() {
        return Err(DecoderError::CapabilityParseError {
            listing: "-pix_fmts".to_string(),
            cause: "no pixel formats found".to_string(),
        });
    }
    Ok(table)
}

pub(crate) fn parse_video_decoders(listing: &str) -> Vec<String> {
    after_separator(listing)
        .filter_map(|line| DECODER_LINE.captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

pub(crate) fn parse_demuxers(listing: &str) -> Vec<String> {
    after_separator(listing)
        .filter_map(|line| DEMUXER_LINE.captures(line))
        .flat_map(|caps| {
            caps[1]
                .split(',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Input protocols, i.e. the names listed between `Input:` and `Output:`.
pub(crate) fn parse_input_protocols(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .skip_while(|line| *line != "Input:")
        .skip(1)
        .take_while(|line| *line != "Output:")
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// File extensions of image formats that ffmpeg can read as a sequence.
pub(crate) fn parse_image_extensions(listing: &str) -> Vec<String> {
    let mut extensions: Vec<String> = IMAGE_PIPE
        .captures_iter(listing)
        .map(|caps| caps[1].to_string())
        .collect();
    for (format, alias) in IMAGE_EXTENSION_ALIASES {
        if extensions.iter().any(|ext| ext == format) {
            extensions.push((*alias).to_string());
        }
    }
    extensions.sort_unstable();
    extensions.dedup();
    extensions
}

/// Queries the pixel formats supported by `binary`.
pub(crate) fn supported_pixel_formats(
    binary: &dyn MediaBinary,
) -> Result<PixelFormatTable, DecoderError> {
    let table = parse_pixel_formats(&binary.query(&["-hide_banner", "-pix_fmts"])?)?;
    debug!(count = table.len(), "queried supported pixel formats");
    Ok(table)
}

/// Queries the video decoders supported by `binary`.
pub(crate) fn supported_video_decoders(
    binary: &dyn MediaBinary,
) -> Result<Vec<String>, DecoderError> {
    Ok(parse_video_decoders(
        &binary.query(&["-hide_banner", "-decoders"])?,
    ))
}

/// Queries the demuxers supported by `binary`.
pub(crate) fn supported_demuxers(binary: &dyn MediaBinary) -> Result<Vec<String>, DecoderError> {
    Ok(parse_demuxers(&binary.query(&["-hide_banner", "-demuxers"])?))
}

/// Queries the input protocols supported by `binary`.
pub(crate) fn supported_protocols(binary: &dyn MediaBinary) -> Result<Vec<String>, DecoderError> {
    Ok(parse_input_protocols(
        &binary.query(&["-hide_banner", "-protocols"])?,
    ))
}

/// Queries the image sequence extensions supported by `binary`.
pub(crate) fn supported_image_extensions(
    binary: &dyn MediaBinary,
) -> Result<Vec<String>, DecoderError> {
    Ok(parse_image_extensions(
        &binary.query(&["-hide_banner", "-formats"])?,
    ))
}
