//! Conversion of raw interleaved dongle bytes into the stream formats.
//!
//! The wire format is two unsigned bytes per sample, in-phase first. The
//! 16-bit and float formats go through the tables in [`super::dsp`]; the
//! native 8-bit format is only re-centred.

use num_complex::Complex;
use std::fmt;
use std::str::FromStr;

use super::dsp::ConversionLut;
use crate::error::{Error, Result};

/// Offset subtracted from each raw byte for the native signed 8-bit format.
///
/// The LUT paths use the measured DC level (`dsp::LUT_BIAS`); an integer
/// output cannot carry that fraction, so the 8-bit path uses the exact
/// midpoint and stays lossless.
pub const RAW_BIAS: i16 = 128;

/// Full-scale value of the native format.
pub const NATIVE_FULL_SCALE: f64 = 128.0;

pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    /// complex signed 8-bit, the native format
    Cs8,
    /// complex signed 16-bit
    Cs16,
    /// complex 32-bit float
    Cf32,
}

impl StreamFormat {
    pub const ALL: [StreamFormat; 3] = [StreamFormat::Cs8, StreamFormat::Cs16, StreamFormat::Cf32];

    pub fn name(self) -> &'static str {
        match self {
            StreamFormat::Cs8 => "CS8",
            StreamFormat::Cs16 => "CS16",
            StreamFormat::Cf32 => "CF32",
        }
    }

    /// Size of one converted element in the caller's buffer.
    pub fn element_size(self) -> usize {
        match self {
            StreamFormat::Cs8 => 2,
            StreamFormat::Cs16 => 4,
            StreamFormat::Cf32 => 8,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<StreamFormat> {
        match s {
            "CS8" => Ok(StreamFormat::Cs8),
            "CS16" => Ok(StreamFormat::Cs16),
            "CF32" => Ok(StreamFormat::Cf32),
            other => Err(Error::InvalidFormat(other.to_string())),
        }
    }
}

/// An element type a stream can be read into.
pub trait Sample: Copy + Default + Send + 'static {
    const FORMAT: StreamFormat;

    /// Convert `dst.len()` samples from `src`, which holds at least twice
    /// as many bytes.
    fn convert(lut: &ConversionLut, iq_swap: bool, src: &[u8], dst: &mut [Self]);

    /// Little-endian byte image, as written to capture files.
    fn write_le(&self, out: &mut Vec<u8>);
}

#[inline]
fn pair_index(pair: &[u8]) -> usize {
    u16::from_ne_bytes([pair[0], pair[1]]) as usize
}

impl Sample for Complex<f32> {
    const FORMAT: StreamFormat = StreamFormat::Cf32;

    fn convert(lut: &ConversionLut, iq_swap: bool, src: &[u8], dst: &mut [Self]) {
        let table = lut.cf32(iq_swap);
        for (out, pair) in dst.iter_mut().zip(src.chunks_exact(BYTES_PER_SAMPLE)) {
            *out = table[pair_index(pair)];
        }
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.re.to_le_bytes());
        out.extend_from_slice(&self.im.to_le_bytes());
    }
}

impl Sample for Complex<i16> {
    const FORMAT: StreamFormat = StreamFormat::Cs16;

    fn convert(lut: &ConversionLut, iq_swap: bool, src: &[u8], dst: &mut [Self]) {
        let table = lut.cs16(iq_swap);
        for (out, pair) in dst.iter_mut().zip(src.chunks_exact(BYTES_PER_SAMPLE)) {
            *out = table[pair_index(pair)];
        }
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.re.to_le_bytes());
        out.extend_from_slice(&self.im.to_le_bytes());
    }
}

impl Sample for Complex<i8> {
    const FORMAT: StreamFormat = StreamFormat::Cs8;

    fn convert(_lut: &ConversionLut, iq_swap: bool, src: &[u8], dst: &mut [Self]) {
        let (i, q) = if iq_swap { (1, 0) } else { (0, 1) };
        for (out, pair) in dst.iter_mut().zip(src.chunks_exact(BYTES_PER_SAMPLE)) {
            *out = Complex::new(recenter(pair[i]), recenter(pair[q]));
        }
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(self.re as u8);
        out.push(self.im as u8);
    }
}

#[inline]
fn recenter(b: u8) -> i8 {
    (b as i16 - RAW_BIAS) as i8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdr::dsp::lut;

    #[test]
    fn format_names_round_trip() {
        for f in StreamFormat::ALL.iter() {
            assert_eq!(f.name().parse::<StreamFormat>().unwrap(), *f);
        }
        assert_eq!(
            "CF16".parse::<StreamFormat>(),
            Err(Error::InvalidFormat("CF16".to_string()))
        );
    }

    #[test]
    fn raw_path_recenters_without_tables() {
        let src = [0x80, 0x7f, 0x00, 0xff];
        let mut dst = [Complex::<i8>::default(); 2];

        Complex::<i8>::convert(lut(), false, &src, &mut dst);
        assert_eq!(dst, [Complex::new(0, -1), Complex::new(-128, 127)]);

        Complex::<i8>::convert(lut(), true, &src, &mut dst);
        assert_eq!(dst, [Complex::new(-1, 0), Complex::new(127, -128)]);
    }

    #[test]
    fn float_path_uses_the_table() {
        let src = [0x00, 0xff, 0xff, 0x00];
        let mut dst = [Complex::<f32>::default(); 2];
        Complex::<f32>::convert(lut(), false, &src, &mut dst);

        assert!(dst[0].re < -0.99 && dst[0].im > 0.99);
        assert!(dst[1].re > 0.99 && dst[1].im < -0.99);
    }

    #[test]
    fn only_whole_pairs_are_converted() {
        let src = [0x7f, 0x7f, 0x80];
        let mut dst = [Complex::new(9i16, 9i16); 2];
        Complex::<i16>::convert(lut(), false, &src, &mut dst);

        assert!(dst[0].re.abs() < 200 && dst[0].im.abs() < 200);
        assert_eq!(dst[1], Complex::new(9, 9));
    }

    #[test]
    fn little_endian_image() {
        let mut out = Vec::new();
        Complex::new(1i16, -2i16).write_le(&mut out);
        assert_eq!(out, vec![1, 0, 0xfe, 0xff]);
    }
}
