//! Real dongles through librtlsdr, via `rtlsdr_mt`.
//!
//! `rtlsdr_mt` splits a device into a controller and a reader, the same cut
//! the streaming engine needs. It exposes the common tuning registers only;
//! the rest report `NotSupported`.
//!
//! USB descriptor strings are not reachable through `rtlsdr_mt`, so the
//! serial reported here is the device index zero-padded to eight digits and
//! is only stable while the set of attached dongles does not change. The
//! tuner type is recognised from the gain table the library reports.

use log::*;

use super::tuner::TunerType;
use super::{Controller, DirectSampling, Driver, Reader, UsbStrings};
use crate::error::{Error, Result};

pub struct LibRtlSdr;

impl Driver for LibRtlSdr {
    type Controller = RtlController;
    type Reader = RtlReader;

    fn device_count(&self) -> u32 {
        rtlsdr_mt::devices().count() as u32
    }

    fn device_name(&self, index: u32) -> String {
        rtlsdr_mt::devices()
            .nth(index as usize)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn usb_strings(&self, index: u32) -> Result<UsbStrings> {
        let product = rtlsdr_mt::devices()
            .nth(index as usize)
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::NotFound(format!("rtl-sdr {}", index)))?;

        Ok(UsbStrings {
            manufacturer: String::new(),
            product,
            serial: format!("{:08}", index),
        })
    }

    fn open(&self, index: u32) -> Result<(RtlController, RtlReader)> {
        debug!("starting rtl-sdr with device-id {}", index);
        let (ctl, reader) = rtlsdr_mt::open(index).map_err(|e| Error::hardware("open", e))?;
        Ok((
            RtlController {
                ctl,
                tuner_gain: 0,
            },
            RtlReader { reader },
        ))
    }
}

pub struct RtlController {
    ctl: rtlsdr_mt::Controller,
    tuner_gain: i32,
}

impl Controller for RtlController {
    fn tuner_type(&self) -> TunerType {
        TunerType::from_gains(&self.tuner_gains())
    }

    fn tuner_gains(&self) -> Vec<i32> {
        let mut buf = rtlsdr_mt::TunerGains::default();
        self.ctl.tuner_gains(&mut buf).to_vec()
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        self.ctl
            .set_sample_rate(rate)
            .map_err(|e| Error::hardware("set_sample_rate", e))
    }

    fn sample_rate(&self) -> u32 {
        self.ctl.sample_rate()
    }

    fn set_center_freq(&mut self, freq: u32) -> Result<()> {
        self.ctl
            .set_center_freq(freq)
            .map_err(|e| Error::hardware("set_center_freq", e))
    }

    fn center_freq(&self) -> u32 {
        self.ctl.center_freq()
    }

    fn set_freq_correction(&mut self, ppm: i32) -> Result<()> {
        self.ctl.set_ppm(ppm).map_err(|e| Error::hardware("set_ppm", e))
    }

    fn freq_correction(&self) -> i32 {
        self.ctl.ppm()
    }

    fn set_tuner_gain_mode(&mut self, manual: bool) -> Result<()> {
        if manual {
            self.ctl.disable_agc()
        } else {
            self.ctl.enable_agc()
        }
        .map_err(|e| Error::hardware("set_tuner_gain_mode", e))
    }

    fn set_tuner_gain(&mut self, gain: i32) -> Result<()> {
        self.ctl
            .set_tuner_gain(gain)
            .map_err(|e| Error::hardware("set_tuner_gain", e))?;
        self.tuner_gain = gain;
        Ok(())
    }

    fn tuner_gain(&self) -> i32 {
        self.tuner_gain
    }

    fn set_tuner_if_gain(&mut self, _stage: u8, _gain: i32) -> Result<()> {
        Err(Error::NotSupported("IF gain stage"))
    }

    fn set_agc_mode(&mut self, _on: bool) -> Result<()> {
        Err(Error::NotSupported("digital AGC"))
    }

    fn set_offset_tuning(&mut self, _on: bool) -> Result<()> {
        Err(Error::NotSupported("offset tuning"))
    }

    fn set_direct_sampling(&mut self, _mode: DirectSampling) -> Result<()> {
        Err(Error::NotSupported("direct sampling"))
    }

    fn set_bias_tee(&mut self, _on: bool) -> Result<()> {
        Err(Error::NotSupported("bias tee"))
    }

    fn set_dithering(&mut self, _on: bool) -> Result<()> {
        Err(Error::NotSupported("dithering"))
    }

    fn set_test_mode(&mut self, _on: bool) -> Result<()> {
        Err(Error::NotSupported("test mode"))
    }

    fn reset_buffer(&mut self) -> Result<()> {
        // read_async resets the endpoint itself before streaming
        Ok(())
    }

    fn cancel_async(&mut self) {
        self.ctl.cancel_async_read();
    }
}

pub struct RtlReader {
    reader: rtlsdr_mt::Reader,
}

impl Reader for RtlReader {
    fn read_async(
        &mut self,
        buf_num: u32,
        buf_len: u32,
        callback: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        self.reader
            .read_async(buf_num, buf_len, |bytes| callback(bytes))
            .map_err(|e| Error::hardware("read_async", e))
    }

    fn read_sync(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::NotSupported("synchronous read"))
    }
}
