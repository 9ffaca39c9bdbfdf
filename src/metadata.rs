//! The merged source metadata record exposed by a decoder.
//!
//! [`Metadata`] starts as a snapshot of a [`ProbedSource`] and can then be
//! amended by the caller. Every key has a [`FieldPolicy`]: identity fields
//! are read-only, the output stream description is read-only until filters
//! make it meaningful, and everything else may be overridden with a value of
//! the right JSON type. Keys the record does not know are kept as user keys.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{error::DecoderError, prober::ProbedSource};

/// How frames are consumed from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationalMode {
    /// Video is decoded and audio is left alone.
    #[serde(rename = "Video-Only")]
    VideoOnly,
    /// Video is decoded and audio is available for pass-through.
    #[serde(rename = "Audio-Video")]
    AudioVideo,
    /// Frames come from a numbered image sequence.
    #[serde(rename = "Image-Sequence")]
    ImageSequence,
}

impl fmt::Display for OperationalMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VideoOnly => "Video-Only",
            Self::AudioVideo => "Audio-Video",
            Self::ImageSequence => "Image-Sequence",
        })
    }
}

/// Whether a metadata key may be changed by [`Metadata::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Any value of the field's type is accepted.
    Overridable,
    /// The key identifies the session and never changes.
    ReadOnly,
    /// The key mirrors another one; update that one instead.
    ReadOnlyWithCounterpart(&'static str),
}

/// A value supplied to [`Metadata::update`].
///
/// JSON has no tuples, so [`MetadataValue::Tuple`] is stored as a list.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// Any JSON value.
    Json(Value),
    /// A fixed-size group of values, widened to a JSON list.
    Tuple(Vec<Value>),
}

impl From<Value> for MetadataValue {
    #[inline]
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<(u32, u32)> for MetadataValue {
    #[inline]
    fn from((a, b): (u32, u32)) -> Self {
        Self::Tuple(vec![a.into(), b.into()])
    }
}

const READ_ONLY: &[&str] = &[
    "ffmpeg_binary_path",
    "source",
    "source_demuxer",
    "source_extension",
    "operational_mode",
];

const COUNTERPARTS: &[(&str, &str)] = &[
    ("output_frames_resolution", "source_video_resolution"),
    ("output_frames_pixfmt", "source_video_pixfmt"),
    ("output_framerate", "source_video_framerate"),
];

/// Source metadata merged with caller overrides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub(crate) ffmpeg_binary_path: String,
    pub(crate) source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) source_demuxer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) source_extension: Option<String>,
    pub(crate) source_video_resolution: Option<(u32, u32)>,
    pub(crate) source_video_pixfmt: Option<String>,
    pub(crate) source_video_framerate: Option<f64>,
    pub(crate) source_video_decoder: Option<String>,
    pub(crate) source_duration_sec: Option<f64>,
    pub(crate) approx_video_nframes: Option<u64>,
    pub(crate) source_video_bitrate: Option<String>,
    pub(crate) source_audio_bitrate: Option<String>,
    pub(crate) source_audio_samplerate: Option<String>,
    pub(crate) source_has_video: bool,
    pub(crate) source_has_audio: bool,
    pub(crate) source_has_image_sequence: bool,
    pub(crate) output_frames_resolution: Option<(u32, u32)>,
    pub(crate) output_frames_pixfmt: Option<String>,
    pub(crate) output_framerate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) operational_mode: Option<OperationalMode>,
    #[serde(flatten)]
    pub(crate) user: Map<String, Value>,
    #[serde(skip)]
    pub(crate) filter_output: bool,
}

impl Metadata {
    /// Snapshots a probed source.
    #[inline]
    #[must_use]
    pub fn from_probe(probed: &ProbedSource) -> Self {
        let result = probed.result();
        let filter_output = probed.had_output_args() && result.has_filter_output();
        Self {
            ffmpeg_binary_path: probed.binary_path().to_string_lossy().into_owned(),
            source: probed.source().to_string(),
            source_demuxer: probed.demuxer().map(str::to_string),
            source_extension: probed.extension(),
            source_video_resolution: result.resolution,
            source_video_pixfmt: result.pixel_format.clone(),
            source_video_framerate: result.framerate,
            source_video_decoder: result.decoder.clone(),
            source_duration_sec: result.duration_seconds,
            approx_video_nframes: result.approx_frame_count,
            source_video_bitrate: result.video_bitrate.clone(),
            source_audio_bitrate: result.audio_bitrate.clone(),
            source_audio_samplerate: result.audio_sample_rate.clone(),
            source_has_video: result.has_video,
            source_has_audio: result.has_audio,
            source_has_image_sequence: result.has_image_sequence,
            output_frames_resolution: result.output_resolution,
            output_frames_pixfmt: result.output_pixel_format.clone(),
            output_framerate: result.output_framerate,
            operational_mode: None,
            user: Map::new(),
            filter_output,
        }
    }

    /// The resolved source string.
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The mode selected for this source, once known.
    #[inline]
    #[must_use]
    pub fn operational_mode(&self) -> Option<OperationalMode> {
        self.operational_mode
    }

    /// Whether the `output_*` keys describe a filtered stream rather than
    /// mirroring the source.
    #[inline]
    #[must_use]
    pub fn has_filter_output(&self) -> bool {
        self.filter_output
    }

    /// The update policy of `key`.
    #[inline]
    #[must_use]
    pub fn policy(&self, key: &str) -> FieldPolicy {
        if READ_ONLY.contains(&key) {
            return FieldPolicy::ReadOnly;
        }
        match COUNTERPARTS.iter().find(|(output, _)| *output == key) {
            Some((_, counterpart)) if !self.filter_output => {
                FieldPolicy::ReadOnlyWithCounterpart(*counterpart)
            }
            _ => FieldPolicy::Overridable,
        }
    }

    /// The record as a flat JSON object.
    ///
    /// Without filters the `output_*` keys repeat their source counterparts.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::InvalidMetadata` if a user key cannot be
    /// represented as JSON.
    #[inline]
    pub fn to_value(&self) -> Result<Value, DecoderError> {
        let mut value = serde_json::to_value(self).map_err(|e| DecoderError::InvalidMetadata {
            cause: e.to_string(),
        })?;
        if !self.filter_output {
            mirror_counterparts(&mut value);
        }
        Ok(value)
    }

    /// The record serialized as JSON text.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::InvalidMetadata` if serialization fails.
    #[inline]
    pub fn to_json(&self, pretty: bool) -> Result<String, DecoderError> {
        let value = self.to_value()?;
        let text = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        };
        text.map_err(|e| DecoderError::InvalidMetadata {
            cause: e.to_string(),
        })
    }

    /// Looks up a single key.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.to_value()
            .ok()
            .and_then(|mut value| value.as_object_mut().and_then(|map| map.remove(key)))
    }

    /// Applies a partial update and returns how many keys were accepted.
    ///
    /// Read-only keys and values of the wrong type are rejected one by one
    /// with a warning; the remaining keys are still applied. Tuples are
    /// widened to lists. Unknown keys are stored as user keys.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::InvalidMetadata` if `changes` is empty.
    #[inline]
    pub fn update<I, K, V>(&mut self, changes: I) -> Result<usize, DecoderError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        let changes: Vec<(String, MetadataValue)> = changes
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        if changes.is_empty() {
            return Err(DecoderError::InvalidMetadata {
                cause: "no metadata keys to update".to_string(),
            });
        }

        let mut applied = 0;
        for (key, value) in changes {
            let value = match value {
                MetadataValue::Json(value) => value,
                MetadataValue::Tuple(items) => {
                    warn!(%key, "tuple metadata value stored as a list");
                    Value::Array(items)
                }
            };
            match self.policy(&key) {
                FieldPolicy::ReadOnly => {
                    warn!(%key, "refusing to update read-only metadata key");
                }
                FieldPolicy::ReadOnlyWithCounterpart(counterpart) => {
                    warn!(%key, counterpart, "metadata key mirrors its counterpart, update that instead");
                }
                FieldPolicy::Overridable => {
                    if self.assign(&key, value) {
                        debug!(%key, "updated metadata");
                        applied += 1;
                    }
                }
            }
        }
        Ok(applied)
    }

    fn assign(&mut self, key: &str, value: Value) -> bool {
        match key {
            "source_video_resolution" => set(&mut self.source_video_resolution, key, value),
            "source_video_pixfmt" => set(&mut self.source_video_pixfmt, key, value),
            "source_video_framerate" => set(&mut self.source_video_framerate, key, value),
            "source_video_decoder" => set(&mut self.source_video_decoder, key, value),
            "source_duration_sec" => set(&mut self.source_duration_sec, key, value),
            "approx_video_nframes" => set(&mut self.approx_video_nframes, key, value),
            "source_video_bitrate" => set(&mut self.source_video_bitrate, key, value),
            "source_audio_bitrate" => set(&mut self.source_audio_bitrate, key, value),
            "source_audio_samplerate" => set(&mut self.source_audio_samplerate, key, value),
            "source_has_video" => set(&mut self.source_has_video, key, value),
            "source_has_audio" => set(&mut self.source_has_audio, key, value),
            "source_has_image_sequence" => set(&mut self.source_has_image_sequence, key, value),
            "output_frames_resolution" => set(&mut self.output_frames_resolution, key, value),
            "output_frames_pixfmt" => set(&mut self.output_frames_pixfmt, key, value),
            "output_framerate" => set(&mut self.output_framerate, key, value),
            _ => {
                self.user.insert(key.to_string(), value);
                true
            }
        }
    }
}

fn mirror_counterparts(value: &mut Value) {
    let Some(map) = value.as_object_mut() else {
        return;
    };
    for (output, counterpart) in COUNTERPARTS {
        let mirrored = map.get(*counterpart).cloned().unwrap_or(Value::Null);
        map.insert((*output).to_string(), mirrored);
    }
}

/// Stores `value` in `slot` if it deserializes into the slot's type.
fn set<T: DeserializeOwned>(slot: &mut T, key: &str, value: Value) -> bool {
    match serde_json::from_value(value) {
        Ok(typed) => {
            *slot = typed;
            true
        }
        Err(e) => {
            warn!(key, error = %e, "rejected metadata value of the wrong type");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        binary::fake::FakeBinary,
        diagnostics::samples,
        options::ProbeOptions,
        prober::{Prober, SourceDescriptor},
    };

    fn lavfi_metadata(banner: &str, output_args: &[&str]) -> Metadata {
        let binary = FakeBinary::new(banner);
        let options = ProbeOptions::default().output_args(output_args.iter().copied());
        let probed = Prober::new(&binary, options)
            .probe(
                &SourceDescriptor::new("testsrc=size=1280x720:rate=30").with_demuxer("lavfi"),
                (0, 0),
            )
            .unwrap();
        Metadata::from_probe(&probed)
    }

    #[test]
    fn output_keys_mirror_source_without_filters() {
        let metadata = lavfi_metadata(samples::LAVFI_BANNER, &[]);
        let value = metadata.to_value().unwrap();
        assert_eq!(value["source_video_resolution"], json!([1280, 720]));
        assert_eq!(value["output_frames_resolution"], json!([1280, 720]));
        assert_eq!(value["output_frames_pixfmt"], json!("rgb24"));
        assert_eq!(value["output_framerate"], json!(30.0));
        assert_eq!(value["source_demuxer"], json!("lavfi"));
        assert!(value.get("source_extension").is_none());
        assert_eq!(value["approx_video_nframes"], Value::Null);
        assert_eq!(
            metadata.policy("output_framerate"),
            FieldPolicy::ReadOnlyWithCounterpart("source_video_framerate")
        );
    }

    #[test]
    fn filtered_output_keys_are_overridable() {
        let mut metadata = lavfi_metadata(samples::FILTERED_BANNER, &["-vf", "scale=640:-1,format=gray"]);
        assert!(metadata.has_filter_output());
        assert_eq!(metadata.get("output_frames_pixfmt"), Some(json!("gray")));
        assert_eq!(metadata.policy("output_frames_pixfmt"), FieldPolicy::Overridable);
        assert_eq!(
            metadata.update([("output_framerate", json!(10))]).unwrap(),
            1
        );
        assert_eq!(metadata.get("output_framerate"), Some(json!(10.0)));
    }

    #[test]
    fn identity_fields_are_read_only() {
        let mut metadata = lavfi_metadata(samples::LAVFI_BANNER, &[]);
        let applied = metadata
            .update([
                ("source", json!("elsewhere.mp4")),
                ("output_frames_pixfmt", json!("gray")),
            ])
            .unwrap();
        assert_eq!(applied, 0);
        assert_eq!(metadata.source(), "testsrc=size=1280x720:rate=30");
        assert_eq!(metadata.get("output_frames_pixfmt"), Some(json!("rgb24")));
    }

    #[test]
    fn wrong_types_are_rejected_per_key() {
        let mut metadata = lavfi_metadata(samples::LAVFI_BANNER, &[]);
        let applied = metadata
            .update([
                ("source_video_framerate", json!("fast")),
                ("approx_video_nframes", json!(300)),
                ("source_has_audio", json!("yes")),
            ])
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(metadata.get("source_video_framerate"), Some(json!(30.0)));
        assert_eq!(metadata.get("approx_video_nframes"), Some(json!(300)));
        assert_eq!(metadata.get("source_has_audio"), Some(json!(false)));
    }

    #[test]
    fn tuples_are_widened_and_user_keys_kept() {
        let mut metadata = lavfi_metadata(samples::LAVFI_BANNER, &[]);
        metadata
            .update([("source_video_resolution", MetadataValue::from((640, 480)))])
            .unwrap();
        metadata
            .update([("custom_tag", MetadataValue::Tuple(vec![json!(1), json!("a")]))])
            .unwrap();
        let value = metadata.to_value().unwrap();
        assert_eq!(value["source_video_resolution"], json!([640, 480]));
        assert_eq!(value["output_frames_resolution"], json!([640, 480]));
        assert_eq!(value["custom_tag"], json!([1, "a"]));
        assert!(metadata.to_json(true).unwrap().contains("\"custom_tag\""));
    }

    #[test]
    fn empty_updates_are_an_error() {
        let mut metadata = lavfi_metadata(samples::LAVFI_BANNER, &[]);
        let err = metadata
            .update(Vec::<(String, MetadataValue)>::new())
            .unwrap_err();
        assert!(matches!(err, DecoderError::InvalidMetadata { .. }));
    }

    #[test]
    fn operational_mode_serializes_with_display_name() {
        assert_eq!(
            serde_json::to_value(OperationalMode::ImageSequence).unwrap(),
            json!("Image-Sequence")
        );
        assert_eq!(OperationalMode::AudioVideo.to_string(), "Audio-Video");
    }
}
