//! Device enumeration and in-process open tracking.
//!
//! One `Registry` is owned by whoever hosts the devices and is passed to
//! every `make`; no state lives in statics.

use log::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{DeviceArgs, DeviceSelector, Kwargs};
use crate::error::{Error, Result};
use crate::sdr::rtl::Radio;
use crate::sdr::{Controller, Driver};

/// Tuner name reported for devices that could not be probed.
pub const TUNER_UNAVAILABLE: &str = "unavailable";

/// What enumeration knows about one attached dongle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceInfo {
    pub index: u32,
    pub label: String,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub tuner: String,
}

impl DeviceInfo {
    pub fn to_kwargs(&self) -> Kwargs {
        let mut args = Kwargs::new();
        args.insert("rtl".to_string(), self.index.to_string());
        args.insert("label".to_string(), self.label.clone());
        args.insert("manufacturer".to_string(), self.manufacturer.clone());
        args.insert("product".to_string(), self.product.clone());
        args.insert("serial".to_string(), self.serial.clone());
        args.insert("tuner".to_string(), self.tuner.clone());
        args
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a device index as open until dropped.
pub struct Claim {
    open: Arc<Mutex<HashSet<u32>>>,
    index: u32,
}

impl Claim {
    fn take(open: &Arc<Mutex<HashSet<u32>>>, index: u32) -> Result<Claim> {
        if !lock(open).insert(index) {
            return Err(Error::AlreadyOpen(index));
        }
        Ok(Claim {
            open: open.clone(),
            index,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.open).remove(&self.index);
    }
}

pub struct Registry<D: Driver> {
    driver: D,
    // serial -> tuner name
    tuners: Mutex<HashMap<String, String>>,
    open: Arc<Mutex<HashSet<u32>>>,
}

impl<D: Driver> Registry<D> {
    pub fn new(driver: D) -> Registry<D> {
        Registry {
            driver,
            tuners: Mutex::new(HashMap::new()),
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn is_open(&self, index: u32) -> bool {
        lock(&self.open).contains(&index)
    }

    fn describe(&self, index: u32) -> DeviceInfo {
        let name = self.driver.device_name(index);
        let strings = match self.driver.usb_strings(index) {
            Ok(s) => s,
            Err(e) => {
                warn!("no usb strings for device {}: {}", index, e);
                Default::default()
            }
        };
        DeviceInfo {
            index,
            label: format!("{} :: {}", name, strings.serial),
            manufacturer: strings.manufacturer,
            product: strings.product,
            tuner: String::new(),
            serial: strings.serial,
        }
    }

    /// Tuner name for `info`, opening the device briefly if not yet known.
    fn probe_tuner(&self, info: &DeviceInfo) -> String {
        if let Some(tuner) = lock(&self.tuners).get(&info.serial) {
            return tuner.clone();
        }
        if self.is_open(info.index) {
            return TUNER_UNAVAILABLE.to_string();
        }

        match self.driver.open(info.index) {
            Ok((ctl, _reader)) => {
                let tuner = ctl.tuner_type().name().to_string();
                debug!("probed device {}: tuner {}", info.index, tuner);
                lock(&self.tuners).insert(info.serial.clone(), tuner.clone());
                tuner
            }
            Err(e) => {
                debug!("device {} could not be probed: {}", info.index, e);
                TUNER_UNAVAILABLE.to_string()
            }
        }
    }

    /// Attached devices, restricted to those matching the `serial`,
    /// `label` or `rtl` keys present in `filter`.
    pub fn find(&self, filter: &Kwargs) -> Vec<DeviceInfo> {
        let count = self.driver.device_count();
        debug!("found {} rtl-sdr device(s)", count);

        (0..count)
            .map(|index| self.describe(index))
            .filter(|info| {
                filter.get("serial").map_or(true, |s| *s == info.serial)
                    && filter.get("label").map_or(true, |l| *l == info.label)
                    && filter.get("rtl").map_or(true, |i| *i == info.index.to_string())
            })
            .map(|mut info| {
                info.tuner = self.probe_tuner(&info);
                info
            })
            .collect()
    }

    fn select(&self, selector: &DeviceSelector) -> Result<DeviceInfo> {
        let count = self.driver.device_count();
        let found = match selector {
            DeviceSelector::Index(index) if *index < count => Some(self.describe(*index)),
            DeviceSelector::Index(_) => None,
            DeviceSelector::Serial(serial) => (0..count)
                .map(|i| self.describe(i))
                .find(|info| info.serial == *serial),
            DeviceSelector::Label(label) => (0..count)
                .map(|i| self.describe(i))
                .find(|info| info.label == *label),
        };
        found.ok_or_else(|| Error::NotFound(format!("{:?}", selector)))
    }

    /// Open the device `args` selects.
    pub fn make(&self, args: &DeviceArgs) -> Result<Radio<D>> {
        let info = self.select(&args.device)?;
        let claim = Claim::take(&self.open, info.index)?;
        let serial = info.serial.clone();

        let radio = Radio::open(&self.driver, info, args, Some(claim))?;
        lock(&self.tuners).insert(serial, radio.info().tuner.clone());
        Ok(radio)
    }

    pub fn make_kwargs(&self, args: &Kwargs) -> Result<Radio<D>> {
        self.make(&DeviceArgs::from_kwargs(args)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdr::replay::{ReplayDevice, ReplayDriver, ReplaySource};
    use crossbeam_channel::unbounded;

    fn two_devices() -> Registry<ReplayDriver> {
        let (_tx, rx) = unbounded();
        let driver = ReplayDriver::new()
            .with_device(ReplayDevice::new("00000001", ReplaySource::Feed(rx.clone())))
            .with_device(ReplayDevice::new("00000002", ReplaySource::Feed(rx)).busy());
        Registry::new(driver)
    }

    #[test]
    fn busy_devices_are_listed_as_unavailable() {
        let registry = two_devices();
        let found = registry.find(&Kwargs::new());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].tuner, "R820T");
        assert_eq!(found[0].label, "Generic RTL2832U OEM :: 00000001");
        assert_eq!(found[1].tuner, TUNER_UNAVAILABLE);
    }

    #[test]
    fn find_filters_by_serial() {
        let registry = two_devices();
        let mut filter = Kwargs::new();
        filter.insert("serial".into(), "00000002".into());
        let found = registry.find(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 1);
        assert_eq!(found[0].to_kwargs()["rtl"], "1");
    }

    #[test]
    fn second_open_is_refused_until_drop() {
        let registry = two_devices();
        let args = DeviceArgs::default();
        let radio = registry.make(&args).unwrap();
        assert!(registry.is_open(0));
        assert_eq!(registry.make(&args).err(), Some(Error::AlreadyOpen(0)));

        drop(radio);
        assert!(!registry.is_open(0));
        registry.make(&args).unwrap();
    }

    #[test]
    fn failed_open_releases_the_claim() {
        let registry = two_devices();
        let args = DeviceArgs {
            device: DeviceSelector::Serial("00000002".into()),
            ..DeviceArgs::default()
        };
        assert!(matches!(registry.make(&args), Err(Error::Hardware { .. })));
        assert!(!registry.is_open(1));

        let args = DeviceArgs {
            device: DeviceSelector::Index(5),
            ..DeviceArgs::default()
        };
        assert!(matches!(registry.make(&args), Err(Error::NotFound(_))));
    }
}
