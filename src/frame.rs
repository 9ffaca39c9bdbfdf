//! Raw frame buffers and the reader that cuts them out of a byte stream.
//!
//! ffmpeg's `rawvideo` output has no container framing: one frame is exactly
//! `depth * sample_size * width * height` bytes and the next frame starts
//! immediately after. [`FrameReader`] reads exactly that many bytes per call
//! and reshapes them according to the pixel format's [`PixelLayout`].

use std::{fmt, io::Read, marker::PhantomData};

use serde::{Deserialize, Serialize};

use crate::error::DecoderError;

/// How the components of one frame are arranged in the raw byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// Single-component formats. Frames are returned as 2D `(height, width)`.
    Gray,
    /// Full-resolution planes stored one after another (`yuv444p`, `gbrp`).
    /// Frames are converted to interleaved `(height, width, depth)`.
    Planar,
    /// Components interleaved per pixel (`rgb24`, `bgra`, `ya8`).
    Packed,
}

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// Storage type of a single frame component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    /// 8-bit unsigned.
    U8,
    /// 16-bit unsigned, little-endian.
    U16Le,
    /// 16-bit unsigned, big-endian.
    U16Be,
}

impl SampleType {
    /// Bytes occupied by one sample.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16Le | Self::U16Be => 2,
        }
    }

    /// Byte order of the sample, irrelevant for single-byte samples.
    #[inline]
    #[must_use]
    pub const fn endianness(self) -> Endianness {
        match self {
            Self::U8 | Self::U16Le => Endianness::Little,
            Self::U16Be => Endianness::Big,
        }
    }
}

impl fmt::Display for SampleType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::U8 => "u8",
            Self::U16Le => "u16le",
            Self::U16Be => "u16be",
        })
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
}

/// A frame component type that can be decoded from raw bytes.
///
/// Implemented for `u8` (8-bit formats) and `u16` (16-bit formats of either
/// byte order).
pub trait Sample: private::Sealed + Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Bytes occupied by one sample.
    const SIZE: usize;

    /// Decodes one sample from exactly [`Self::SIZE`] bytes.
    fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self;
}

impl Sample for u8 {
    const SIZE: usize = 1;

    #[inline]
    fn from_bytes(bytes: &[u8], _endianness: Endianness) -> Self {
        bytes[0]
    }
}

impl Sample for u16 {
    const SIZE: usize = 2;

    #[inline]
    fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self {
        let pair = [bytes[0], bytes[1]];
        match endianness {
            Endianness::Little => u16::from_le_bytes(pair),
            Endianness::Big => u16::from_be_bytes(pair),
        }
    }
}

/// Everything needed to cut frames out of the raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Components per pixel.
    pub depth: usize,
    /// Storage type of each component.
    pub sample_type: SampleType,
    /// Arrangement of components in the stream.
    pub layout: PixelLayout,
}

impl FrameGeometry {
    /// Number of samples in one raw frame, saturating at `usize::MAX`.
    #[inline]
    #[must_use]
    pub const fn samples_per_frame(&self) -> usize {
        self.depth
            .saturating_mul(self.width)
            .saturating_mul(self.height)
    }

    /// Exact byte length of one raw frame, saturating at `usize::MAX`.
    ///
    /// Use [`checked_frame_len`](Self::checked_frame_len) to detect geometries
    /// too large to address.
    #[inline]
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.samples_per_frame()
            .saturating_mul(self.sample_type.size())
    }

    /// Byte length of one raw frame, or `None` if it overflows `usize`.
    #[inline]
    #[must_use]
    pub fn checked_frame_len(&self) -> Option<usize> {
        self.depth
            .checked_mul(self.width)?
            .checked_mul(self.height)?
            .checked_mul(self.sample_type.size())
    }

    /// Shape of the frames produced from this geometry.
    #[inline]
    #[must_use]
    pub fn output_shape(&self) -> Vec<usize> {
        match self.layout {
            PixelLayout::Gray => vec![self.height, self.width],
            PixelLayout::Planar | PixelLayout::Packed => {
                vec![self.height, self.width, self.depth]
            }
        }
    }

    /// Decodes and reshapes one raw frame.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::SampleTypeMismatch` if `T` does not match the
    /// geometry's sample type, and `DecoderError::FrameReadError` if `raw` is
    /// not exactly one frame long.
    #[inline]
    pub fn reshape<T: Sample>(&self, raw: &[u8]) -> Result<Frame<T>, DecoderError> {
        check_sample_type::<T>(self.sample_type)?;
        if raw.len() != self.frame_len() {
            return Err(DecoderError::FrameReadError {
                cause: format!(
                    "expected {} bytes per frame, got {}",
                    self.frame_len(),
                    raw.len()
                ),
            });
        }

        let endianness = self.sample_type.endianness();
        let samples = raw
            .chunks_exact(T::SIZE)
            .map(|chunk| T::from_bytes(chunk, endianness));
        let plane = self.width * self.height;

        let data: Vec<T> = match self.layout {
            // (height, width, depth)[:, :, 0]
            PixelLayout::Gray => samples.step_by(self.depth).collect(),
            PixelLayout::Packed => samples.collect(),
            // (depth, height, width) -> (height, width, depth)
            PixelLayout::Planar => {
                let planar: Vec<T> = samples.collect();
                let mut interleaved = vec![T::default(); planar.len()];
                for (component, values) in planar.chunks_exact(plane).enumerate() {
                    for (pixel, value) in values.iter().enumerate() {
                        interleaved[pixel * self.depth + component] = *value;
                    }
                }
                interleaved
            }
        };

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            channels: match self.layout {
                PixelLayout::Gray => 1,
                PixelLayout::Planar | PixelLayout::Packed => self.depth,
            },
            shape: self.output_shape(),
        })
    }
}

pub(crate) fn check_sample_type<T: Sample>(sample_type: SampleType) -> Result<(), DecoderError> {
    if T::SIZE == sample_type.size() {
        Ok(())
    } else {
        Err(DecoderError::SampleTypeMismatch {
            expected: sample_type.to_string(),
            requested: std::any::type_name::<T>().to_string(),
        })
    }
}

/// One decoded video frame, stored row-major with interleaved components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<T: Sample> {
    data: Vec<T>,
    width: usize,
    height: usize,
    channels: usize,
    shape: Vec<usize>,
}

impl<T: Sample> Frame<T> {
    /// `[height, width]` for gray frames, `[height, width, depth]` otherwise.
    #[inline]
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Frame width in pixels.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Components stored per pixel (1 for gray frames).
    #[inline]
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The sample at row `y`, column `x`, component `c`.
    #[inline]
    #[must_use]
    pub fn get(&self, y: usize, x: usize, c: usize) -> Option<T> {
        if y >= self.height || x >= self.width || c >= self.channels {
            return None;
        }
        self.data
            .get((y * self.width + x) * self.channels + c)
            .copied()
    }

    /// All samples in row-major, component-interleaved order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Consumes the frame and returns its samples.
    #[inline]
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/// Reads fixed-size raw frames from a byte stream.
///
/// Reads block until a whole frame arrives or the stream ends. A short read
/// is end of stream: the partial frame is dropped, never buffered.
pub struct FrameReader<R: Read> {
    reader: R,
    geometry: FrameGeometry,
    buffer: Vec<u8>,
    finished: bool,
    frames_read: usize,
}

impl<R: Read> fmt::Debug for FrameReader<R> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReader")
            .field("geometry", &self.geometry)
            .field("finished", &self.finished)
            .field("frames_read", &self.frames_read)
            .finish_non_exhaustive()
    }
}

impl<R: Read> FrameReader<R> {
    /// Wraps `reader`, which must yield frames of `geometry` back to back.
    #[inline]
    #[must_use]
    pub fn new(reader: R, geometry: FrameGeometry) -> Self {
        Self {
            reader,
            buffer: vec![0; geometry.frame_len()],
            geometry,
            finished: false,
            frames_read: 0,
        }
    }

    /// The geometry frames are cut with.
    #[inline]
    #[must_use]
    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// How many complete frames have been returned so far.
    #[inline]
    #[must_use]
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Whether the stream has ended.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reads the next frame, or `None` once the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError::SampleTypeMismatch` if `T` does not match the
    /// negotiated format, and `DecoderError::FrameReadError` if the
    /// underlying read fails for a reason other than end of stream.
    #[inline]
    pub fn read_frame<T: Sample>(&mut self) -> Result<Option<Frame<T>>, DecoderError> {
        check_sample_type::<T>(self.geometry.sample_type)?;
        if self.finished {
            return Ok(None);
        }

        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.reader.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.finished = true;
                    return Err(DecoderError::FrameReadError {
                        cause: e.to_string(),
                    });
                }
            }
        }
        if filled < self.buffer.len() {
            self.finished = true;
            return Ok(None);
        }

        let frame = self.geometry.reshape(&self.buffer)?;
        self.frames_read += 1;
        Ok(Some(frame))
    }

    /// A lazy iterator over the remaining frames.
    ///
    /// `limit` caps how many frames are yielded in total by this call; `None`
    /// reads until the stream ends. Read failures end the iteration.
    #[inline]
    pub fn frames<T: Sample>(&mut self, limit: Option<usize>) -> FrameIter<'_, R, T> {
        FrameIter {
            reader: self,
            remaining: limit,
            _sample: PhantomData,
        }
    }

    /// Consumes the reader and returns the underlying stream.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Iterator returned by [`FrameReader::frames`].
#[derive(Debug)]
pub struct FrameIter<'a, R: Read, T: Sample> {
    reader: &'a mut FrameReader<R>,
    remaining: Option<usize>,
    _sample: PhantomData<T>,
}

impl<R: Read, T: Sample> Iterator for FrameIter<'_, R, T> {
    type Item = Frame<T>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        match self.reader.read_frame::<T>() {
            Ok(Some(frame)) => {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Some(frame)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, "frame read failed, ending iteration");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn geometry(
        width: usize,
        height: usize,
        depth: usize,
        sample_type: SampleType,
        layout: PixelLayout,
    ) -> FrameGeometry {
        FrameGeometry {
            width,
            height,
            depth,
            sample_type,
            layout,
        }
    }

    #[test]
    fn packed_frames_keep_interleaving() {
        let geo = geometry(2, 1, 3, SampleType::U8, PixelLayout::Packed);
        let frame: Frame<u8> = geo.reshape(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame.shape(), &[1, 2, 3]);
        assert_eq!(frame.get(0, 1, 0), Some(4));
        assert_eq!(frame.get(0, 1, 2), Some(6));
    }

    #[test]
    fn planar_frames_are_interleaved() {
        // three 2x2 planes: Y=0..4, U=10..14, V=20..24
        let raw = [0, 1, 2, 3, 10, 11, 12, 13, 20, 21, 22, 23];
        let geo = geometry(2, 2, 3, SampleType::U8, PixelLayout::Planar);
        let frame: Frame<u8> = geo.reshape(&raw).unwrap();
        assert_eq!(frame.shape(), &[2, 2, 3]);
        assert_eq!(&frame.as_slice()[..6], &[0, 10, 20, 1, 11, 21]);
        assert_eq!(frame.get(1, 1, 2), Some(23));
    }

    #[test]
    fn gray_frames_take_first_component() {
        // ya8-style two-component data read as gray keeps only the first plane
        let geo = geometry(2, 1, 2, SampleType::U8, PixelLayout::Gray);
        let frame: Frame<u8> = geo.reshape(&[7, 255, 9, 255]).unwrap();
        assert_eq!(frame.shape(), &[1, 2]);
        assert_eq!(frame.as_slice(), &[7, 9]);
        assert_eq!(frame.channels(), 1);
    }

    #[test]
    fn sixteen_bit_samples_honour_endianness() {
        let le = geometry(1, 1, 1, SampleType::U16Le, PixelLayout::Gray);
        let be = geometry(1, 1, 1, SampleType::U16Be, PixelLayout::Gray);
        let raw = [0x01, 0x02];
        assert_eq!(le.reshape::<u16>(&raw).unwrap().as_slice(), &[0x0201]);
        assert_eq!(be.reshape::<u16>(&raw).unwrap().as_slice(), &[0x0102]);
    }

    #[test]
    fn wrong_sample_type_is_rejected() {
        let geo = geometry(1, 1, 1, SampleType::U16Le, PixelLayout::Gray);
        let err = geo.reshape::<u8>(&[0, 0]).unwrap_err();
        assert!(matches!(err, DecoderError::SampleTypeMismatch { .. }));
    }

    #[test]
    fn frame_length_matches_reshaped_size_for_every_layout() {
        for layout in [PixelLayout::Gray, PixelLayout::Planar, PixelLayout::Packed] {
            for (depth, sample_type) in [
                (1, SampleType::U8),
                (3, SampleType::U8),
                (4, SampleType::U16Be),
            ] {
                let geo = geometry(16, 9, depth, sample_type, layout);
                let raw = vec![0u8; geo.frame_len()];
                let count = if sample_type == SampleType::U8 {
                    geo.reshape::<u8>(&raw).unwrap().as_slice().len()
                } else {
                    geo.reshape::<u16>(&raw).unwrap().as_slice().len()
                };
                assert_eq!(count, geo.output_shape().iter().product::<usize>());
            }
        }
    }

    #[test]
    fn huge_geometry_saturates_instead_of_overflowing() {
        let geo = geometry(usize::MAX, 2, 3, SampleType::U16Le, PixelLayout::Packed);
        assert_eq!(geo.frame_len(), usize::MAX);
        assert_eq!(geo.checked_frame_len(), None);

        let geo = geometry(16, 9, 3, SampleType::U16Le, PixelLayout::Packed);
        assert_eq!(geo.checked_frame_len(), Some(geo.frame_len()));
    }

    #[test]
    fn reader_stops_on_short_read() {
        let geo = geometry(2, 2, 3, SampleType::U8, PixelLayout::Packed);
        // two full frames plus five stray bytes
        let bytes = vec![1u8; geo.frame_len() * 2 + 5];
        let mut reader = FrameReader::new(Cursor::new(bytes), geo);
        assert!(reader.read_frame::<u8>().unwrap().is_some());
        assert!(reader.read_frame::<u8>().unwrap().is_some());
        assert!(reader.read_frame::<u8>().unwrap().is_none());
        assert!(reader.is_finished());
        assert!(reader.read_frame::<u8>().unwrap().is_none());
        assert_eq!(reader.frames_read(), 2);
    }

    #[test]
    fn frame_iterator_respects_limit() {
        let geo = geometry(2, 2, 1, SampleType::U8, PixelLayout::Gray);
        let bytes = vec![0u8; geo.frame_len() * 5];
        let mut reader = FrameReader::new(Cursor::new(bytes), geo);
        assert_eq!(reader.frames::<u8>(Some(3)).count(), 3);
        assert_eq!(reader.frames::<u8>(None).count(), 2);
        assert_eq!(reader.frames::<u8>(None).count(), 0);
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn read_failures_end_iteration() {
        let geo = geometry(2, 2, 1, SampleType::U8, PixelLayout::Gray);
        let mut reader = FrameReader::new(FailingReader, geo);
        assert_eq!(reader.frames::<u8>(None).count(), 0);
        assert!(reader.is_finished());

        let mut reader = FrameReader::new(FailingReader, geo);
        assert!(matches!(
            reader.read_frame::<u8>(),
            Err(DecoderError::FrameReadError { .. })
        ));
    }
}
