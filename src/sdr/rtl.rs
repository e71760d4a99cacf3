//! The dongle as the device framework sees it: settings plus a single
//! receive stream.

use log::*;
use std::collections::BTreeMap;
use std::time::Duration;

use super::convert::{Sample, StreamFormat, NATIVE_FULL_SCALE};
use super::ingest::Ingestion;
use super::stream::{ReadBuffer, ReadResult, Stream};
use super::tuner::{
    FrequencyElement, GainElement, Range, TunerType, CORR_RANGE, SAMPLE_RATES,
    SAMPLE_RATE_WINDOWS,
};
use super::{Controller, DirectSampling, Driver, Reader};
use crate::config::{self, ArgInfo, DeviceArgs, Kwargs, StreamArgs};
use crate::error::{Error, Result};
use crate::registry::{Claim, DeviceInfo};

pub const DEFAULT_SAMPLE_RATE: f64 = 2_048_000.0;
pub const DEFAULT_CENTER_FREQ: f64 = 100_000_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Names the stream set up on a `Radio`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamHandle(u64);

pub struct Radio<D: Driver> {
    info: DeviceInfo,
    tuner: TunerType,
    tuner_gains: Vec<i32>,
    ctl: D::Controller,
    reader: Option<D::Reader>,
    ingestion: Option<Ingestion<D::Reader>>,
    stream: Option<(StreamHandle, Stream)>,
    next_stream: u64,
    default_stream_args: StreamArgs,
    _claim: Option<Claim>,

    sample_rate: f64,
    center_freq: f64,
    ppm: i32,
    auto_gain: bool,
    tuner_gain: f64,
    if_gains: [f64; 6],
    direct_sampling: DirectSampling,
    offset_tuning: bool,
    iq_swap: bool,
    bias_tee: bool,
    digital_agc: bool,
    test_mode: bool,
}

impl<D: Driver> Radio<D> {
    pub(crate) fn open(
        driver: &D,
        info: DeviceInfo,
        args: &DeviceArgs,
        claim: Option<Claim>,
    ) -> Result<Radio<D>> {
        debug!("opening rtl-sdr device {} ({})", info.index, info.label);
        let (ctl, reader) = driver.open(info.index)?;
        let mut radio = Radio::from_parts(ctl, reader, info, args)?;
        radio._claim = claim;
        Ok(radio)
    }

    /// Wrap an already opened device and apply the initial settings.
    pub fn from_parts(
        ctl: D::Controller,
        reader: D::Reader,
        mut info: DeviceInfo,
        args: &DeviceArgs,
    ) -> Result<Radio<D>> {
        let tuner = ctl.tuner_type();
        info.tuner = tuner.name().to_string();
        let tuner_gains = ctl.tuner_gains();
        debug!("tuner {} with gains {:?}", tuner, tuner_gains);

        let mut radio: Radio<D> = Radio {
            info,
            tuner,
            tuner_gains,
            ctl,
            reader: Some(reader),
            ingestion: None,
            stream: None,
            next_stream: 1,
            default_stream_args: args.stream.clone(),
            _claim: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            center_freq: DEFAULT_CENTER_FREQ,
            ppm: args.ppm,
            auto_gain: true,
            tuner_gain: 0.0,
            if_gains: [0.0; 6],
            direct_sampling: DirectSampling::Off,
            offset_tuning: false,
            iq_swap: args.iq_swap,
            bias_tee: false,
            digital_agc: false,
            test_mode: false,
        };

        radio.set_sample_rate(DEFAULT_SAMPLE_RATE)?;
        radio.set_frequency(FrequencyElement::Rf, DEFAULT_CENTER_FREQ)?;
        if args.ppm != 0 {
            radio.set_frequency(FrequencyElement::Corr, args.ppm as f64)?;
        }
        radio.ctl.set_tuner_gain_mode(false)?;
        if args.direct_sampling != DirectSampling::Off {
            radio.set_direct_sampling(args.direct_sampling)?;
        }
        if args.offset_tuning {
            radio.set_offset_tuning(true)?;
        }
        if args.bias_tee {
            radio.set_bias_tee(true)?;
        }
        if args.digital_agc {
            radio.set_digital_agc(true)?;
        }
        if args.test_mode {
            radio.set_test_mode(true)?;
        }
        Ok(radio)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn controller(&self) -> &D::Controller {
        &self.ctl
    }

    /*******************************************************************
     * Identification
     ******************************************************************/

    pub fn driver_key(&self) -> &'static str {
        "RTLSDR"
    }

    pub fn hardware_key(&self) -> &'static str {
        self.tuner.name()
    }

    pub fn hardware_info(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        info.insert("origin".to_string(), env!("CARGO_PKG_NAME").to_string());
        info.insert("index".to_string(), self.info.index.to_string());
        info.insert("label".to_string(), self.info.label.clone());
        info.insert("manufacturer".to_string(), self.info.manufacturer.clone());
        info.insert("product".to_string(), self.info.product.clone());
        info.insert("serial".to_string(), self.info.serial.clone());
        info.insert("tuner".to_string(), self.tuner.name().to_string());
        info
    }

    pub fn num_channels(&self, direction: Direction) -> usize {
        match direction {
            Direction::Rx => 1,
            Direction::Tx => 0,
        }
    }

    /*******************************************************************
     * Antenna
     ******************************************************************/

    pub fn list_antennas(&self, direction: Direction) -> Vec<&'static str> {
        match direction {
            Direction::Rx => vec!["RX"],
            Direction::Tx => vec![],
        }
    }

    pub fn set_antenna(&mut self, direction: Direction, name: &str) -> Result<()> {
        if direction != Direction::Rx {
            return Err(Error::WrongDirection);
        }
        if name != "RX" {
            return Err(Error::invalid_argument("antenna", name));
        }
        Ok(())
    }

    pub fn antenna(&self, _direction: Direction) -> &'static str {
        "RX"
    }

    /*******************************************************************
     * Gain
     ******************************************************************/

    pub fn list_gains(&self) -> Vec<GainElement> {
        let mut gains: Vec<GainElement> = (1..=self.tuner.if_stages().len() as u8)
            .map(GainElement::If)
            .collect();
        gains.push(GainElement::Tuner);
        gains
    }

    pub fn set_gain_mode(&mut self, automatic: bool) -> Result<()> {
        debug!("changing gain mode to {}", if automatic { "automatic" } else { "manual" });
        self.ctl.set_tuner_gain_mode(!automatic)?;
        self.auto_gain = automatic;
        if !automatic {
            self.set_gain_element(GainElement::Tuner, self.tuner_gain)?;
        }
        Ok(())
    }

    pub fn gain_mode(&self) -> bool {
        self.auto_gain
    }

    /// Overall gain, carried by the tuner stage.
    pub fn set_gain(&mut self, value: f64) -> Result<()> {
        let value = self.gain_range(GainElement::Tuner)?.clamp(value);
        self.set_gain_element(GainElement::Tuner, value)
    }

    pub fn gain(&self) -> f64 {
        self.tuner_gain
    }

    pub fn set_gain_element(&mut self, element: GainElement, value: f64) -> Result<()> {
        match element {
            GainElement::Tuner => {
                self.ctl.set_tuner_gain((value * 10.0).round() as i32)?;
                self.tuner_gain = self.ctl.tuner_gain() as f64 / 10.0;
                debug!("tuner gain set to {} dB", self.tuner_gain);
            }
            GainElement::If(stage) => {
                let range = self.if_stage(stage)?;
                let value = range.clamp(value);
                self.ctl.set_tuner_if_gain(stage, (value * 10.0).round() as i32)?;
                self.if_gains[stage as usize - 1] = value;
                debug!("IF{} gain set to {} dB", stage, value);
            }
        }
        Ok(())
    }

    pub fn gain_element(&self, element: GainElement) -> Result<f64> {
        match element {
            GainElement::Tuner => Ok(self.tuner_gain),
            GainElement::If(stage) => {
                self.if_stage(stage)?;
                Ok(self.if_gains[stage as usize - 1])
            }
        }
    }

    pub fn gain_range(&self, element: GainElement) -> Result<Range> {
        match element {
            GainElement::Tuner => {
                let min = self.tuner_gains.iter().copied().min().unwrap_or(0);
                let max = self.tuner_gains.iter().copied().max().unwrap_or(0);
                Ok(Range::new(min as f64 / 10.0, max as f64 / 10.0))
            }
            GainElement::If(stage) => self.if_stage(stage),
        }
    }

    fn if_stage(&self, stage: u8) -> Result<Range> {
        let stages = self.tuner.if_stages();
        if stage == 0 || stage as usize > stages.len() {
            return Err(Error::NotSupported("IF gain stage"));
        }
        Ok(stages[stage as usize - 1])
    }

    /*******************************************************************
     * Frequency
     ******************************************************************/

    pub fn set_frequency(&mut self, element: FrequencyElement, value: f64) -> Result<()> {
        match element {
            FrequencyElement::Rf => {
                if value < 0.0 || value > u32::MAX as f64 {
                    return Err(Error::invalid_argument("frequency", value.to_string()));
                }
                debug!("setting center freq: {}", value as u32);
                self.ctl.set_center_freq(value as u32)?;
                self.center_freq = self.ctl.center_freq() as f64;
                self.reset_stream();
            }
            FrequencyElement::Corr => {
                if !CORR_RANGE.contains(value) {
                    return Err(Error::invalid_argument("ppm", value.to_string()));
                }
                debug!("setting freq correction: {} ppm", value as i32);
                self.ctl.set_freq_correction(value as i32)?;
                self.ppm = value as i32;
            }
        }
        Ok(())
    }

    pub fn frequency(&self, element: FrequencyElement) -> f64 {
        match element {
            FrequencyElement::Rf => self.center_freq,
            FrequencyElement::Corr => self.ppm as f64,
        }
    }

    pub fn list_frequencies(&self) -> Vec<FrequencyElement> {
        vec![FrequencyElement::Rf, FrequencyElement::Corr]
    }

    pub fn frequency_range(&self, element: FrequencyElement) -> Vec<Range> {
        match element {
            FrequencyElement::Rf => self.tuner.rf_ranges(),
            FrequencyElement::Corr => vec![CORR_RANGE],
        }
    }

    /*******************************************************************
     * Sample rate
     ******************************************************************/

    pub fn set_sample_rate(&mut self, rate: f64) -> Result<()> {
        if !SAMPLE_RATE_WINDOWS.iter().any(|w| w.contains(rate)) {
            return Err(Error::invalid_argument(
                "sample rate",
                format!("{} Hz is outside 225001-300000 and 900001-3200000", rate),
            ));
        }
        debug!("setting sample rate: {}", rate as u32);
        self.ctl.set_sample_rate(rate as u32)?;
        self.sample_rate = rate;
        self.reset_stream();
        Ok(())
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn list_sample_rates(&self) -> Vec<f64> {
        SAMPLE_RATES.to_vec()
    }

    /*******************************************************************
     * Tuner modes
     ******************************************************************/

    pub fn set_direct_sampling(&mut self, mode: DirectSampling) -> Result<()> {
        debug!("direct sampling mode {}", mode.mode());
        self.ctl.set_direct_sampling(mode)?;
        self.direct_sampling = mode;
        Ok(())
    }

    pub fn direct_sampling(&self) -> DirectSampling {
        self.direct_sampling
    }

    pub fn set_offset_tuning(&mut self, on: bool) -> Result<()> {
        self.ctl.set_offset_tuning(on)?;
        self.offset_tuning = on;
        Ok(())
    }

    pub fn offset_tuning(&self) -> bool {
        self.offset_tuning
    }

    pub fn set_iq_swap(&mut self, on: bool) {
        debug!("I/Q swap: {}", if on { "yes" } else { "no" });
        self.iq_swap = on;
        if let Some((_, stream)) = self.stream.as_mut() {
            stream.set_iq_swap(on);
        }
    }

    pub fn iq_swap(&self) -> bool {
        self.iq_swap
    }

    pub fn set_bias_tee(&mut self, on: bool) -> Result<()> {
        self.ctl.set_bias_tee(on)?;
        self.bias_tee = on;
        Ok(())
    }

    pub fn bias_tee(&self) -> bool {
        self.bias_tee
    }

    pub fn set_digital_agc(&mut self, on: bool) -> Result<()> {
        self.ctl.set_agc_mode(on)?;
        self.digital_agc = on;
        Ok(())
    }

    pub fn digital_agc(&self) -> bool {
        self.digital_agc
    }

    pub fn set_test_mode(&mut self, on: bool) -> Result<()> {
        self.ctl.set_test_mode(on)?;
        self.test_mode = on;
        Ok(())
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn set_dithering(&mut self, on: bool) -> Result<()> {
        self.ctl.set_dithering(on)
    }

    fn reset_stream(&mut self) {
        if let Some((_, stream)) = self.stream.as_ref() {
            stream.request_reset();
        }
    }

    /*******************************************************************
     * Stream
     ******************************************************************/

    pub fn stream_formats(&self, _direction: Direction) -> Vec<StreamFormat> {
        StreamFormat::ALL.to_vec()
    }

    pub fn native_stream_format(&self, _direction: Direction) -> (StreamFormat, f64) {
        (StreamFormat::Cs8, NATIVE_FULL_SCALE)
    }

    pub fn stream_args_info(&self, _direction: Direction) -> Vec<ArgInfo> {
        config::stream_args_info()
    }

    /// Set up the receive stream from framework-style arguments.
    pub fn setup_stream(
        &mut self,
        direction: Direction,
        format: &str,
        channels: &[usize],
        args: &Kwargs,
    ) -> Result<StreamHandle> {
        if direction != Direction::Rx {
            return Err(Error::WrongDirection);
        }
        let format: StreamFormat = format.parse()?;
        let args = self.default_stream_args.merge_kwargs(args)?;
        self.setup_stream_with(direction, format, channels, args)
    }

    pub fn setup_stream_with(
        &mut self,
        direction: Direction,
        format: StreamFormat,
        channels: &[usize],
        args: StreamArgs,
    ) -> Result<StreamHandle> {
        if direction != Direction::Rx {
            return Err(Error::WrongDirection);
        }
        if channels.len() > 1 || channels.iter().any(|&c| c != 0) {
            return Err(Error::InvalidChannelSelection(channels.to_vec()));
        }
        if self.stream.is_some() {
            return Err(Error::StreamBusy);
        }
        args.validate()?;

        info!("Using format {}.", format);
        debug!(
            "stream buffers: {} x {} bytes, {} async buffers",
            args.buffers, args.buffer_len, args.async_buffs
        );

        let handle = StreamHandle(self.next_stream);
        self.next_stream += 1;
        self.stream = Some((handle, Stream::new(format, args, self.iq_swap)));
        Ok(handle)
    }

    fn stream(&self, handle: StreamHandle) -> Result<&Stream> {
        match &self.stream {
            Some((h, stream)) if *h == handle => Ok(stream),
            _ => Err(Error::NoStream),
        }
    }

    fn stream_mut(&mut self, handle: StreamHandle) -> Result<&mut Stream> {
        match &mut self.stream {
            Some((h, stream)) if *h == handle => Ok(stream),
            _ => Err(Error::NoStream),
        }
    }

    pub fn close_stream(&mut self, handle: StreamHandle) -> Result<()> {
        self.stream(handle)?;
        self.deactivate_stream(handle)?;
        self.stream = None;
        debug!("stream closed");
        Ok(())
    }

    /// Elements per ring slot.
    pub fn stream_mtu(&self, handle: StreamHandle) -> Result<usize> {
        self.stream(handle).map(|s| s.mtu())
    }

    /// Ring slots captured and not yet read.
    pub fn queued_buffers(&self, handle: StreamHandle) -> Result<usize> {
        self.stream(handle).map(|s| s.pool().queued())
    }

    /// True while the ingestion thread is running.
    pub fn is_active(&self) -> bool {
        self.ingestion.as_ref().map_or(false, |i| !i.is_finished())
    }

    /// Join an ingestion thread whose transfer loop ended on its own.
    fn reap(&mut self) -> Result<()> {
        if self.ingestion.as_ref().map_or(false, |i| i.is_finished()) {
            warn!("rx thread exited without being cancelled");
            self.stop_ingestion()?;
        }
        Ok(())
    }

    /// Start the ingestion thread. Does nothing when already running.
    pub fn activate_stream(&mut self, handle: StreamHandle) -> Result<()> {
        self.stream(handle)?;
        self.reap()?;
        if self.ingestion.is_some() {
            return Ok(());
        }

        self.ctl.reset_buffer()?;
        let stream = self.stream_mut(handle)?;
        let producer = stream.producer()?;
        let args = stream.args().clone();
        let reader = self.reader.take().ok_or_else(reader_lost)?;

        debug!("activating stream");
        self.ingestion = Some(Ingestion::spawn(
            reader,
            producer,
            args.async_buffs,
            args.buffer_len as u32,
        )?);
        Ok(())
    }

    /// Stop and join the ingestion thread. Does nothing when not running.
    pub fn deactivate_stream(&mut self, handle: StreamHandle) -> Result<()> {
        self.stream(handle)?;
        self.stop_ingestion()
    }

    fn stop_ingestion(&mut self) -> Result<()> {
        if let Some(ingestion) = self.ingestion.take() {
            debug!("deactivating stream");
            self.reader = Some(ingestion.stop(&mut self.ctl)?);
        }
        Ok(())
    }

    /// Read up to `buf.len()` elements in the stream's format.
    pub fn read_stream<T: Sample>(
        &mut self,
        handle: StreamHandle,
        buf: &mut [T],
        timeout: Duration,
    ) -> Result<ReadResult> {
        let rate = self.sample_rate;
        self.stream_mut(handle)?.read(buf, rate, timeout)
    }

    pub fn num_direct_access_buffers(&self, handle: StreamHandle) -> Result<usize> {
        self.stream(handle).map(|s| s.num_direct_access_buffers())
    }

    /// Raw bytes of an acquired slot.
    pub fn direct_access_buffer(&self, handle: StreamHandle, buffer: usize) -> Result<&[u8]> {
        self.stream(handle)?.direct_access_buffer(buffer)
    }

    pub fn acquire_read_buffer(
        &mut self,
        handle: StreamHandle,
        timeout: Duration,
    ) -> Result<ReadBuffer> {
        let rate = self.sample_rate;
        self.stream_mut(handle)?.acquire_read_buffer(rate, timeout)
    }

    pub fn release_read_buffer(&mut self, handle: StreamHandle, buffer: usize) -> Result<()> {
        self.stream_mut(handle)?.release_read_buffer(buffer)
    }

    /// Blocking raw capture while no stream is active.
    pub fn read_sync(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reap()?;
        if self.ingestion.is_some() {
            return Err(Error::StreamBusy);
        }
        match self.reader.as_mut() {
            Some(reader) => reader.read_sync(buf),
            None => Err(reader_lost()),
        }
    }
}

fn reader_lost() -> Error {
    Error::Hardware {
        op: "rx thread",
        reason: "reader lost by an earlier failure".to_string(),
    }
}

impl<D: Driver> Drop for Radio<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_ingestion() {
            error!("failed to stop rx thread: {}", e);
        }
        trace!("rtl-sdr device {} closed", self.info.index);
    }
}
