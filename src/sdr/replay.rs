//! A dongle stand-in that plays back captured samples.
//!
//! A replay device delivers either a raw cu8 capture file, paced at the
//! configured sample rate, or byte chunks sent over a channel. It behaves
//! like the USB library towards the streaming engine: `read_async` blocks
//! and calls back per transfer until cancelled.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::*;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::tuner::{TunerType, SAMPLE_RATE_WINDOWS};
use super::{Controller, DirectSampling, Driver, Reader, UsbStrings};
use crate::error::{Error, Result};

const POLL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub enum ReplaySource {
    File { path: PathBuf, repeat: bool },
    Feed(Receiver<Vec<u8>>),
}

#[derive(Clone)]
pub struct ReplayDevice {
    pub name: String,
    pub strings: UsbStrings,
    pub tuner: TunerType,
    pub source: ReplaySource,
    /// open fails, as for a dongle claimed by another process
    pub busy: bool,
    /// `read_async` calls that fail before transfers start flowing
    pub failing_reads: u32,
}

impl ReplayDevice {
    pub fn new(serial: &str, source: ReplaySource) -> ReplayDevice {
        ReplayDevice {
            name: "Generic RTL2832U OEM".to_string(),
            strings: UsbStrings {
                manufacturer: "Realtek".to_string(),
                product: "RTL2838UHIDIR".to_string(),
                serial: serial.to_string(),
            },
            tuner: TunerType::R820t,
            source,
            busy: false,
            failing_reads: 0,
        }
    }

    pub fn tuner(mut self, tuner: TunerType) -> ReplayDevice {
        self.tuner = tuner;
        self
    }

    pub fn busy(mut self) -> ReplayDevice {
        self.busy = true;
        self
    }

    pub fn failing_reads(mut self, n: u32) -> ReplayDevice {
        self.failing_reads = n;
        self
    }
}

#[derive(Clone, Default)]
pub struct ReplayDriver {
    devices: Vec<ReplayDevice>,
}

impl ReplayDriver {
    pub fn new() -> ReplayDriver {
        ReplayDriver::default()
    }

    pub fn with_device(mut self, device: ReplayDevice) -> ReplayDriver {
        self.devices.push(device);
        self
    }

    /// A single device fed from the returned sender.
    pub fn feed() -> (ReplayDriver, Sender<Vec<u8>>) {
        let (tx, rx) = unbounded();
        let driver = ReplayDriver::new().with_device(ReplayDevice::new("00000001", ReplaySource::Feed(rx)));
        (driver, tx)
    }

    /// A single device playing a capture file.
    pub fn file<P: Into<PathBuf>>(path: P, repeat: bool) -> ReplayDriver {
        let source = ReplaySource::File {
            path: path.into(),
            repeat,
        };
        ReplayDriver::new().with_device(ReplayDevice::new("00000001", source))
    }

    fn device(&self, index: u32) -> Result<&ReplayDevice> {
        self.devices
            .get(index as usize)
            .ok_or_else(|| Error::NotFound(format!("replay device {}", index)))
    }
}

impl Driver for ReplayDriver {
    type Controller = ReplayController;
    type Reader = ReplayReader;

    fn device_count(&self) -> u32 {
        self.devices.len() as u32
    }

    fn device_name(&self, index: u32) -> String {
        self.device(index)
            .map(|d| d.name.clone())
            .unwrap_or_default()
    }

    fn usb_strings(&self, index: u32) -> Result<UsbStrings> {
        self.device(index).map(|d| d.strings.clone())
    }

    fn open(&self, index: u32) -> Result<(ReplayController, ReplayReader)> {
        let device = self.device(index)?;
        if device.busy {
            return Err(Error::hardware("open", "usb_claim_interface error -6"));
        }

        let source = match &device.source {
            ReplaySource::File { path, repeat } => {
                let file = File::open(path).map_err(|e| Error::hardware("open", e))?;
                Playback::File {
                    reader: BufReader::new(file),
                    repeat: *repeat,
                }
            }
            ReplaySource::Feed(rx) => Playback::Feed(rx.clone()),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let sample_rate = Arc::new(AtomicU32::new(0));
        debug!("opened replay device {} ({})", index, device.strings.serial);

        let ctl = ReplayController {
            tuner: device.tuner,
            cancel: cancel.clone(),
            sample_rate: sample_rate.clone(),
            settings: ReplaySettings::default(),
        };
        let reader = ReplayReader {
            source,
            cancel,
            sample_rate,
            failing_reads: device.failing_reads,
        };
        Ok((ctl, reader))
    }
}

/// Register state a replay controller remembers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplaySettings {
    pub center_freq: u32,
    pub ppm: i32,
    pub manual_gain: bool,
    pub tuner_gain: i32,
    pub if_gains: [i32; 6],
    pub agc: bool,
    pub offset_tuning: bool,
    pub direct_sampling: i32,
    pub bias_tee: bool,
    pub dithering: bool,
    pub test_mode: bool,
    pub buffer_resets: u32,
}

pub struct ReplayController {
    tuner: TunerType,
    cancel: Arc<AtomicBool>,
    sample_rate: Arc<AtomicU32>,
    settings: ReplaySettings,
}

impl ReplayController {
    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }
}

impl Controller for ReplayController {
    fn tuner_type(&self) -> TunerType {
        self.tuner
    }

    fn tuner_gains(&self) -> Vec<i32> {
        self.tuner.gains().to_vec()
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        if !SAMPLE_RATE_WINDOWS.iter().any(|w| w.contains(rate as f64)) {
            return Err(Error::hardware("set_sample_rate", rate));
        }
        self.sample_rate.store(rate, Ordering::Relaxed);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    fn set_center_freq(&mut self, freq: u32) -> Result<()> {
        self.settings.center_freq = freq;
        Ok(())
    }

    fn center_freq(&self) -> u32 {
        self.settings.center_freq
    }

    fn set_freq_correction(&mut self, ppm: i32) -> Result<()> {
        self.settings.ppm = ppm;
        Ok(())
    }

    fn freq_correction(&self) -> i32 {
        self.settings.ppm
    }

    fn set_tuner_gain_mode(&mut self, manual: bool) -> Result<()> {
        self.settings.manual_gain = manual;
        Ok(())
    }

    fn set_tuner_gain(&mut self, gain: i32) -> Result<()> {
        // the tuner snaps to its nearest discrete gain
        let nearest = self
            .tuner
            .gains()
            .iter()
            .copied()
            .min_by_key(|g| (g - gain).abs())
            .unwrap_or(0);
        self.settings.tuner_gain = nearest;
        Ok(())
    }

    fn tuner_gain(&self) -> i32 {
        self.settings.tuner_gain
    }

    fn set_tuner_if_gain(&mut self, stage: u8, gain: i32) -> Result<()> {
        if self.tuner != TunerType::E4000 || stage < 1 || stage > 6 {
            return Err(Error::NotSupported("IF gain stage"));
        }
        self.settings.if_gains[stage as usize - 1] = gain;
        Ok(())
    }

    fn set_agc_mode(&mut self, on: bool) -> Result<()> {
        self.settings.agc = on;
        Ok(())
    }

    fn set_offset_tuning(&mut self, on: bool) -> Result<()> {
        if on && (self.tuner == TunerType::R820t || self.tuner == TunerType::R828d) {
            return Err(Error::hardware("set_offset_tuning", -2));
        }
        self.settings.offset_tuning = on;
        Ok(())
    }

    fn set_direct_sampling(&mut self, mode: DirectSampling) -> Result<()> {
        self.settings.direct_sampling = mode.mode();
        Ok(())
    }

    fn set_bias_tee(&mut self, on: bool) -> Result<()> {
        self.settings.bias_tee = on;
        Ok(())
    }

    fn set_dithering(&mut self, on: bool) -> Result<()> {
        self.settings.dithering = on;
        Ok(())
    }

    fn set_test_mode(&mut self, on: bool) -> Result<()> {
        self.settings.test_mode = on;
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.settings.buffer_resets += 1;
        Ok(())
    }

    fn cancel_async(&mut self) {
        self.cancel.store(true, Ordering::Release);
    }
}

enum Playback {
    File {
        reader: BufReader<File>,
        repeat: bool,
    },
    Feed(Receiver<Vec<u8>>),
}

pub struct ReplayReader {
    source: Playback,
    cancel: Arc<AtomicBool>,
    sample_rate: Arc<AtomicU32>,
    failing_reads: u32,
}

impl ReplayReader {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Sleep for `d` in small steps; false if cancelled meanwhile.
    fn pace(&self, d: Duration) -> bool {
        let mut left = d;
        while left > Duration::from_millis(0) {
            if self.cancelled() {
                return false;
            }
            let step = left.min(POLL);
            thread::sleep(step);
            left -= step;
        }
        !self.cancelled()
    }

    fn idle_until_cancelled(&self) {
        while self.pace(POLL) {}
    }
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match reader.read(&mut buf[n..])? {
            0 => break,
            k => n += k,
        }
    }
    Ok(n)
}

impl Reader for ReplayReader {
    fn read_async(
        &mut self,
        _buf_num: u32,
        buf_len: u32,
        callback: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        self.cancel.store(false, Ordering::Release);
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(Error::hardware("read_async", "LIBUSB_ERROR_IO"));
        }
        let buf_len = buf_len.max(2) as usize;
        let mut chunk = vec![0u8; buf_len];

        loop {
            if self.cancelled() {
                break;
            }

            let n = match &mut self.source {
                Playback::Feed(rx) => match rx.recv_timeout(POLL) {
                    Ok(bytes) => {
                        for piece in bytes.chunks(buf_len) {
                            callback(piece);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => 0,
                },
                Playback::File { reader, repeat } => {
                    let n = fill(reader, &mut chunk).map_err(|e| Error::hardware("read_async", e))?;
                    if n == 0 && *repeat {
                        reader
                            .seek(SeekFrom::Start(0))
                            .map_err(|e| Error::hardware("read_async", e))?;
                        continue;
                    }
                    n
                }
            };

            if n == 0 {
                debug!("replay source exhausted, idling");
                self.idle_until_cancelled();
                break;
            }

            trace!("replayed {} bytes", n);
            callback(&chunk[..n]);

            let rate = self.sample_rate.load(Ordering::Relaxed);
            if rate > 0 {
                let samples = (n / 2) as u64;
                self.pace(Duration::from_nanos(samples * 1_000_000_000 / rate as u64));
            }
        }

        debug!("replay async read cancelled");
        Ok(())
    }

    fn read_sync(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.source {
            Playback::Feed(rx) => match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Err(_) => Ok(0),
            },
            Playback::File { reader, .. } => {
                fill(reader, buf).map_err(|e| Error::hardware("read_sync", e))
            }
        }
    }
}
