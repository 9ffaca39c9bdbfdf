//! Field extraction from ffmpeg's human-readable diagnostic banner.
//!
//! ffmpeg prints an `Input #N` summary for every source it opens and, when an
//! output is configured, an `Output #N` summary describing the stream after
//! filtering. Each function here pulls exactly one property out of that text.
//! They never fail: a field that cannot be found is `None`, and deciding what
//! a missing field means is left to the caller.

use std::sync::LazyLock;

use regex::Regex;

static RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([1-9]\d+)x([1-9]\d+)").expect("valid regex"));
static FPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\sfps").expect("valid regex"));
static TBR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\stbr").expect("valid regex"));
static PIXEL_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s([a-z][a-z0-9_-]*)").expect("valid regex"));
static BITRATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s([0-9]+)\s(\w)\w/s").expect("valid regex"));
static SAMPLE_RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s([0-9]+)\sHz").expect("valid regex"));
static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[01]\d|2[0123]):(?:[012345]\d):(?:[012345]\d+(?:\.\d+)?)")
        .expect("valid regex")
});

/// Which kind of stream summary line to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Lines carrying a `Video:` marker.
    Video,
    /// Lines carrying an `Audio:` marker.
    Audio,
}

impl StreamKind {
    const fn marker(self) -> &'static str {
        match self {
            Self::Video => "Video:",
            Self::Audio => "Audio:",
        }
    }
}

/// Splits a banner into its input half and, if present, its output half.
#[inline]
#[must_use]
pub fn split_sections(text: &str) -> (&str, Option<&str>) {
    match text.split_once("Output #") {
        Some((input, output)) => (input, Some(output)),
        None => (text, None),
    }
}

/// Selects the `index`-th stream line of the given kind.
///
/// An index that is zero or past the end selects the first matching line.
#[inline]
#[must_use]
pub fn stream_line(section: &str, kind: StreamKind, index: usize) -> Option<&str> {
    let lines: Vec<&str> = section
        .lines()
        .filter(|line| line.contains("Stream #") && line.contains(kind.marker()))
        .collect();
    let chosen = if index > 0 && index < lines.len() {
        index
    } else {
        0
    };
    lines.get(chosen).copied()
}

/// First `WIDTHxHEIGHT` pair where both sides have at least two digits.
#[inline]
#[must_use]
pub fn resolution(line: &str) -> Option<(u32, u32)> {
    let caps = RESOLUTION.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Frames per second from the `fps` token, falling back to `tbr`.
#[inline]
#[must_use]
pub fn framerate(line: &str) -> Option<f64> {
    FPS.captures(line)
        .or_else(|| TBR.captures(line))
        .and_then(|caps| caps[1].parse().ok())
}

/// The first comma-delimited lowercase token, e.g. `yuv420p`.
#[inline]
#[must_use]
pub fn pixel_format(line: &str) -> Option<String> {
    PIXEL_FORMAT.captures(line).map(|caps| caps[1].to_string())
}

/// The codec token right after the `Video:` marker.
#[inline]
#[must_use]
pub fn decoder(line: &str) -> Option<String> {
    let (_, rest) = line.split_once("Video:")?;
    let token: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    (!token.is_empty()).then_some(token)
}

/// A `<n> kb/s` style token normalized to `<n>k` or `<n>M`.
#[inline]
#[must_use]
pub fn bitrate(line: &str) -> Option<String> {
    let caps = BITRATE.captures(line)?;
    let unit = if &caps[2] == "M" { "M" } else { "k" };
    Some(format!("{}{}", &caps[1], unit))
}

/// The `<n> Hz` token of an audio stream, e.g. `48000 Hz`.
#[inline]
#[must_use]
pub fn sample_rate(line: &str) -> Option<String> {
    SAMPLE_RATE
        .captures(line)
        .map(|caps| format!("{} Hz", &caps[1]))
}

/// Total seconds from the `Duration:` line, or `None` for `N/A`.
#[inline]
#[must_use]
pub fn duration(section: &str) -> Option<f64> {
    let line = section.lines().find(|line| line.contains("Duration:"))?;
    let token = DURATION.find(line)?.as_str();
    token
        .split(':')
        .rev()
        .zip([1.0, 60.0, 3600.0])
        .try_fold(0.0, |total, (part, weight)| {
            part.parse::<f64>().ok().map(|value| total + value * weight)
        })
}

/// `round(framerate * duration)` when both are known and positive.
#[inline]
#[must_use]
pub fn approx_frame_count(framerate: Option<f64>, duration: Option<f64>) -> Option<u64> {
    match (framerate, duration) {
        (Some(fps), Some(secs)) if fps > 0.0 && secs > 0.0 => {
            let estimate = (fps * secs).round();
            (estimate.is_finite() && estimate >= 1.0).then(|| estimate as u64)
        }
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod samples {
    pub(crate) const MP4_BANNER: &str = "\
Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'big_buck_bunny_720p_1mb.mp4':
  Metadata:
    major_brand     : isom
  Duration: 00:00:05.31, start: 0.000000, bitrate: 1589 kb/s
    Stream #0:0(und): Video: h264 (Main) (avc1 / 0x31637661), yuv420p, 1280x720 [SAR 1:1 DAR 16:9], 1205 kb/s, 25 fps, 25 tbr, 12800 tbn, 50 tbc (default)
    Stream #0:1(und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, 5.1, fltp, 384 kb/s (default)
At least one output file must be specified
";

    pub(crate) const FILTERED_BANNER: &str = "\
Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'big_buck_bunny_720p_1mb.mp4':
  Duration: 00:00:05.31, start: 0.000000, bitrate: 1589 kb/s
    Stream #0:0(und): Video: h264 (Main) (avc1 / 0x31637661), yuv420p, 1280x720 [SAR 1:1 DAR 16:9], 1205 kb/s, 25 fps, 25 tbr, 12800 tbn, 50 tbc (default)
Stream mapping:
  Stream #0:0 -> #0:0 (h264 (native) -> wrapped_avframe (native))
Output #0, null, to 'pipe:':
    Stream #0:0(und): Video: wrapped_avframe, gray(progressive), 640x360 [SAR 1:1 DAR 16:9], q=2-31, 200 kb/s, 12.5 fps, 12.5 tbn (default)
";

    pub(crate) const LAVFI_BANNER: &str = "\
Input #0, lavfi, from 'testsrc=size=1280x720:rate=30':
  Duration: N/A, start: 0.000000, bitrate: N/A
    Stream #0:0: Video: rawvideo (RGB[24] / 0x18424752), rgb24, 1280x720 [SAR 1:1 DAR 16:9], 30 tbr, 30 tbn
";

    pub(crate) const AUDIO_ONLY_BANNER: &str = "\
Input #0, mp3, from 'song.mp3':
  Duration: 00:03:12.04, start: 0.025057, bitrate: 128 kb/s
    Stream #0:0: Audio: mp3, 44100 Hz, stereo, fltp, 128 kb/s
";
}
