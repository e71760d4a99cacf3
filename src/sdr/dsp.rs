use log::*;
use num_complex::Complex;
use std::sync::OnceLock;

/// DC level of the dongle's unsigned ADC samples, as seen by the LUT paths.
pub const LUT_BIAS: f32 = 127.4;

/// Divisor normalising a re-centred byte to roughly [-1, 1).
pub const LUT_SCALE: f32 = 128.0;

/// One entry per possible packed (I, Q) byte pair.
pub const LUT_SIZE: usize = 1 << 16;

/// One raw sample as it arrives on the wire: in-phase byte first.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IQ {
    pub i: u8,
    pub q: u8,
}

impl IQ {
    /// The LUT index of this pair: the two bytes read as one native-endian u16.
    pub fn index(self) -> u16 {
        u16::from_ne_bytes([self.i, self.q])
    }

    pub fn from_index(idx: u16) -> IQ {
        let [i, q] = idx.to_ne_bytes();
        IQ { i, q }
    }

    pub fn to_complex(self) -> Complex<f32> {
        Complex::new(
            (self.i as f32 - LUT_BIAS) / LUT_SCALE,
            (self.q as f32 - LUT_BIAS) / LUT_SCALE,
        )
    }
}

impl From<&[u8; 2]> for IQ {
    fn from(item: &[u8; 2]) -> Self {
        IQ {
            i: item[0],
            q: item[1],
        }
    }
}

/// Lookup tables from a packed byte pair to a converted complex sample.
pub struct ConversionLut {
    cf32: Box<[Complex<f32>]>,
    cf32_swap: Box<[Complex<f32>]>,
    cs16: Box<[Complex<i16>]>,
    cs16_swap: Box<[Complex<i16>]>,
}

impl ConversionLut {
    pub fn build() -> ConversionLut {
        let mut cf32 = Vec::with_capacity(LUT_SIZE);
        let mut cf32_swap = Vec::with_capacity(LUT_SIZE);
        let mut cs16 = Vec::with_capacity(LUT_SIZE);
        let mut cs16_swap = Vec::with_capacity(LUT_SIZE);

        for idx in 0..LUT_SIZE {
            let c = IQ::from_index(idx as u16).to_complex();
            let s = Complex::new(to_i16(c.re), to_i16(c.im));

            cf32.push(c);
            cf32_swap.push(Complex::new(c.im, c.re));
            cs16.push(s);
            cs16_swap.push(Complex::new(s.im, s.re));
        }

        ConversionLut {
            cf32: cf32.into_boxed_slice(),
            cf32_swap: cf32_swap.into_boxed_slice(),
            cs16: cs16.into_boxed_slice(),
            cs16_swap: cs16_swap.into_boxed_slice(),
        }
    }

    pub fn cf32(&self, iq_swap: bool) -> &[Complex<f32>] {
        if iq_swap {
            &self.cf32_swap
        } else {
            &self.cf32
        }
    }

    pub fn cs16(&self, iq_swap: bool) -> &[Complex<i16>] {
        if iq_swap {
            &self.cs16_swap
        } else {
            &self.cs16
        }
    }
}

// truncating, as the tables always have been
fn to_i16(v: f32) -> i16 {
    (v * i16::MAX as f32) as i16
}

static LUT: OnceLock<ConversionLut> = OnceLock::new();

/// The process-wide tables, built on first use.
pub fn lut() -> &'static ConversionLut {
    LUT.get_or_init(|| {
        debug!("building sample conversion tables");
        ConversionLut::build()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requantize(v: f32) -> i32 {
        (v * LUT_SCALE + LUT_BIAS).round() as i32
    }

    #[test]
    fn float_table_recovers_every_byte_pair() {
        let table = lut().cf32(false);
        assert_eq!(table.len(), LUT_SIZE);

        for idx in 0..LUT_SIZE {
            let iq = IQ::from_index(idx as u16);
            let c = table[idx];
            assert!((requantize(c.re) - iq.i as i32).abs() <= 1, "idx {:#06x}", idx);
            assert!((requantize(c.im) - iq.q as i32).abs() <= 1, "idx {:#06x}", idx);
        }
    }

    #[test]
    fn swapped_tables_exchange_components() {
        let lut = lut();
        for idx in 0..LUT_SIZE {
            let (a, b) = (lut.cf32(false)[idx], lut.cf32(true)[idx]);
            assert_eq!(a.re, b.im);
            assert_eq!(a.im, b.re);

            let (a, b) = (lut.cs16(false)[idx], lut.cs16(true)[idx]);
            assert_eq!(a.re, b.im);
            assert_eq!(a.im, b.re);
        }
    }

    #[test]
    fn integer_table_is_the_scaled_float_table() {
        let lut = lut();
        let idx = IQ { i: 0xff, q: 0x00 }.index() as usize;
        let f = lut.cf32(false)[idx];
        let s = lut.cs16(false)[idx];

        assert_eq!(s.re, (f.re * 32767.0) as i16);
        assert_eq!(s.im, (f.im * 32767.0) as i16);
        assert!(s.re > 32000);
        assert!(s.im < -32000);
    }

    #[test]
    fn tables_are_built_once() {
        let a = lut() as *const ConversionLut;
        let b = lut() as *const ConversionLut;
        assert_eq!(a, b);
        assert_eq!(lut().cs16(true).len(), LUT_SIZE);
    }

    #[test]
    fn index_follows_wire_byte_order() {
        let iq = IQ::from(&[0x12, 0x34]);
        assert_eq!(iq.index().to_ne_bytes(), [0x12, 0x34]);
        assert_eq!(IQ::from_index(iq.index()), iq);
    }
}
