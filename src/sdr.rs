//! Device capability seam and the streaming engine built on top of it.

pub mod convert;
pub mod dsp;
pub mod ingest;
#[cfg(feature = "rtlsdr")]
pub mod librtlsdr;
pub mod replay;
pub mod ring;
pub mod rtl;
pub mod stream;
pub mod tuner;

use crate::error::Result;
use tuner::TunerType;

/// USB descriptor strings of an attached dongle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsbStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectSampling {
    Off,
    IBranch,
    QBranch,
}

impl DirectSampling {
    pub fn from_mode(mode: i64) -> Option<DirectSampling> {
        match mode {
            0 => Some(DirectSampling::Off),
            1 => Some(DirectSampling::IBranch),
            2 => Some(DirectSampling::QBranch),
            _ => None,
        }
    }

    pub fn mode(self) -> i32 {
        match self {
            DirectSampling::Off => 0,
            DirectSampling::IBranch => 1,
            DirectSampling::QBranch => 2,
        }
    }
}

/// Entry point of a vendor library: enumerates and opens dongles.
pub trait Driver: Send + Sync + 'static {
    type Controller: Controller;
    type Reader: Reader;

    fn device_count(&self) -> u32;

    fn device_name(&self, index: u32) -> String;

    fn usb_strings(&self, index: u32) -> Result<UsbStrings>;

    fn open(&self, index: u32) -> Result<(Self::Controller, Self::Reader)>;
}

/// Register-level control of an open dongle, used from the caller's thread.
///
/// Gains are in tenths of a dB, as the hardware takes them.
pub trait Controller: Send + 'static {
    fn tuner_type(&self) -> TunerType;

    /// Discrete tuner gains, tenths of a dB.
    fn tuner_gains(&self) -> Vec<i32>;

    fn set_sample_rate(&mut self, rate: u32) -> Result<()>;
    fn sample_rate(&self) -> u32;

    fn set_center_freq(&mut self, freq: u32) -> Result<()>;
    fn center_freq(&self) -> u32;

    fn set_freq_correction(&mut self, ppm: i32) -> Result<()>;
    fn freq_correction(&self) -> i32;

    fn set_tuner_gain_mode(&mut self, manual: bool) -> Result<()>;
    fn set_tuner_gain(&mut self, gain: i32) -> Result<()>;
    fn tuner_gain(&self) -> i32;
    fn set_tuner_if_gain(&mut self, stage: u8, gain: i32) -> Result<()>;

    fn set_agc_mode(&mut self, on: bool) -> Result<()>;
    fn set_offset_tuning(&mut self, on: bool) -> Result<()>;
    fn set_direct_sampling(&mut self, mode: DirectSampling) -> Result<()>;
    fn set_bias_tee(&mut self, on: bool) -> Result<()>;
    fn set_dithering(&mut self, on: bool) -> Result<()>;
    fn set_test_mode(&mut self, on: bool) -> Result<()>;

    fn reset_buffer(&mut self) -> Result<()>;

    /// Stop a running `Reader::read_async`. Must be callable while the read
    /// blocks on another thread, and must do nothing when none is running.
    fn cancel_async(&mut self);
}

/// The sample pipe of an open dongle; moved onto the ingestion thread.
pub trait Reader: Send + 'static {
    /// Deliver transfers of `buf_len` bytes to `callback` until cancelled.
    /// A `buf_num` of zero lets the library choose its transfer count.
    fn read_async(
        &mut self,
        buf_num: u32,
        buf_len: u32,
        callback: &mut dyn FnMut(&[u8]),
    ) -> Result<()>;

    /// Blocking read into `buf`, returning the bytes received.
    fn read_sync(&mut self, buf: &mut [u8]) -> Result<usize>;
}
