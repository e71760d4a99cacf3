//! Typed device and stream arguments.
//!
//! The device framework hands over string key/value maps; they are parsed
//! and range-checked here once, and only the typed structs travel further.

use log::*;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::sdr::DirectSampling;

pub type Kwargs = BTreeMap<String, String>;

pub const DEFAULT_BUFFER_LENGTH: usize = 16384;
pub const DEFAULT_NUM_BUFFERS: usize = 16;
pub const DEFAULT_ASYNC_BUFFERS: u32 = 0;

/// USB bulk transfers are multiples of this.
pub const TRANSFER_ALIGN: usize = 512;

fn parse<T: FromStr>(args: &Kwargs, key: &str) -> Result<Option<T>> {
    match args.get(key) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_argument(key, format!("cannot parse '{}'", v))),
    }
}

fn parse_flag(args: &Kwargs, key: &str) -> Result<Option<bool>> {
    match args.get(key).map(|v| v.trim()) {
        None => Ok(None),
        Some("1") | Some("true") => Ok(Some(true)),
        Some("0") | Some("false") => Ok(Some(false)),
        Some(v) => Err(Error::invalid_argument(key, format!("expected 0 or 1, got '{}'", v))),
    }
}

/// Ring geometry of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamArgs {
    /// bytes per ring slot, also the USB transfer length
    pub buffer_len: usize,
    /// ring slot count
    pub buffers: usize,
    /// transfers queued inside the USB library, 0 for its default
    pub async_buffs: u32,
}

impl Default for StreamArgs {
    fn default() -> StreamArgs {
        StreamArgs {
            buffer_len: DEFAULT_BUFFER_LENGTH,
            buffers: DEFAULT_NUM_BUFFERS,
            async_buffs: DEFAULT_ASYNC_BUFFERS,
        }
    }
}

impl StreamArgs {
    /// Parse `bufflen`, `buffers` and `asyncBuffs`, falling back to `self`
    /// for keys not given.
    pub fn merge_kwargs(&self, args: &Kwargs) -> Result<StreamArgs> {
        let merged = StreamArgs {
            buffer_len: parse(args, "bufflen")?.unwrap_or(self.buffer_len),
            buffers: parse(args, "buffers")?.unwrap_or(self.buffers),
            async_buffs: parse(args, "asyncBuffs")?.unwrap_or(self.async_buffs),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn from_kwargs(args: &Kwargs) -> Result<StreamArgs> {
        StreamArgs::default().merge_kwargs(args)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_len < 2 || self.buffer_len % 2 != 0 {
            return Err(Error::invalid_argument(
                "bufflen",
                format!("{} is not a positive even byte count", self.buffer_len),
            ));
        }
        if self.buffer_len > u32::MAX as usize {
            return Err(Error::invalid_argument("bufflen", "too large"));
        }
        if self.buffers == 0 {
            return Err(Error::invalid_argument("buffers", "must be at least 1"));
        }
        if self.buffer_len % TRANSFER_ALIGN != 0 {
            warn!(
                "bufflen {} is not a multiple of {}, USB transfers may be short",
                self.buffer_len, TRANSFER_ALIGN
            );
        }
        Ok(())
    }
}

/// Description of one stream option, for the framework's introspection.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgInfo {
    pub key: &'static str,
    pub value: String,
    pub name: &'static str,
    pub description: &'static str,
    pub units: &'static str,
    pub kind: ArgKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Int,
    Float,
    String,
}

pub fn stream_args_info() -> Vec<ArgInfo> {
    vec![
        ArgInfo {
            key: "bufflen",
            value: DEFAULT_BUFFER_LENGTH.to_string(),
            name: "Buffer Size",
            description: "Number of bytes per buffer, multiples of 512 only.",
            units: "bytes",
            kind: ArgKind::Int,
        },
        ArgInfo {
            key: "buffers",
            value: DEFAULT_NUM_BUFFERS.to_string(),
            name: "Ring buffers",
            description: "Number of buffers in the ring.",
            units: "buffers",
            kind: ArgKind::Int,
        },
        ArgInfo {
            key: "asyncBuffs",
            value: DEFAULT_ASYNC_BUFFERS.to_string(),
            name: "Async buffers",
            description: "Number of async usb buffers (advanced).",
            units: "buffers",
            kind: ArgKind::Int,
        },
    ]
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceSelector {
    Index(u32),
    Serial(String),
    Label(String),
}

impl Default for DeviceSelector {
    fn default() -> DeviceSelector {
        DeviceSelector::Index(0)
    }
}

/// Arguments a device is opened with.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceArgs {
    pub device: DeviceSelector,
    /// defaults for streams set up on this device
    pub stream: StreamArgs,
    pub direct_sampling: DirectSampling,
    pub offset_tuning: bool,
    pub iq_swap: bool,
    pub ppm: i32,
    pub bias_tee: bool,
    pub digital_agc: bool,
    pub test_mode: bool,
}

impl Default for DeviceArgs {
    fn default() -> DeviceArgs {
        DeviceArgs {
            device: DeviceSelector::default(),
            stream: StreamArgs::default(),
            direct_sampling: DirectSampling::Off,
            offset_tuning: false,
            iq_swap: false,
            ppm: 0,
            bias_tee: false,
            digital_agc: false,
            test_mode: false,
        }
    }
}

impl DeviceArgs {
    pub fn from_kwargs(args: &Kwargs) -> Result<DeviceArgs> {
        let device = if let Some(index) = parse(args, "rtl")? {
            DeviceSelector::Index(index)
        } else if let Some(serial) = args.get("serial") {
            DeviceSelector::Serial(serial.clone())
        } else if let Some(label) = args.get("label") {
            DeviceSelector::Label(label.clone())
        } else {
            DeviceSelector::default()
        };

        let direct_sampling = match parse::<i64>(args, "direct_samp")? {
            None => DirectSampling::Off,
            Some(mode) => DirectSampling::from_mode(mode).ok_or_else(|| {
                Error::invalid_argument(
                    "direct_samp",
                    format!("{} invalid, 0 = off, 1 = I ADC, 2 = Q ADC", mode),
                )
            })?,
        };

        let ppm = parse::<i32>(args, "ppm")?.unwrap_or(0);
        if ppm < -1000 || ppm > 1000 {
            return Err(Error::invalid_argument("ppm", format!("{} out of range", ppm)));
        }

        let parsed = DeviceArgs {
            device,
            stream: StreamArgs::from_kwargs(args)?,
            direct_sampling,
            offset_tuning: parse_flag(args, "offset_tune")?.unwrap_or(false),
            iq_swap: parse_flag(args, "iq_swap")?.unwrap_or(false),
            ppm,
            bias_tee: parse_flag(args, "biastee")?.unwrap_or(false),
            digital_agc: parse_flag(args, "digital_agc")?.unwrap_or(false),
            test_mode: parse_flag(args, "testmode")?.unwrap_or(false),
        };
        debug!("device args: {:?}", parsed);
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kwargs(pairs: &[(&str, &str)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn stream_defaults() {
        let args = StreamArgs::from_kwargs(&Kwargs::new()).unwrap();
        assert_eq!(args.buffer_len, 16384);
        assert_eq!(args.buffers, 16);
        assert_eq!(args.async_buffs, 0);
    }

    #[test]
    fn stream_overrides() {
        let args = StreamArgs::from_kwargs(&kwargs(&[
            ("bufflen", "4"),
            ("buffers", "2"),
            ("asyncBuffs", "8"),
        ]))
        .unwrap();
        assert_eq!(
            args,
            StreamArgs {
                buffer_len: 4,
                buffers: 2,
                async_buffs: 8
            }
        );
    }

    #[test]
    fn device_defaults_carry_into_streams() {
        let base = StreamArgs {
            buffer_len: 1024,
            buffers: 4,
            async_buffs: 0,
        };
        let merged = base.merge_kwargs(&kwargs(&[("buffers", "8")])).unwrap();
        assert_eq!(merged.buffer_len, 1024);
        assert_eq!(merged.buffers, 8);
    }

    #[test]
    fn bad_stream_values_are_rejected() {
        let cases = [
            ("bufflen", "0"),
            ("bufflen", "511"),
            ("bufflen", "-4"),
            ("buffers", "0"),
            ("buffers", "many"),
        ];
        for &(k, v) in cases.iter() {
            let err = StreamArgs::from_kwargs(&kwargs(&[(k, v)])).unwrap_err();
            match err {
                Error::InvalidArgument { name, .. } => assert_eq!(&name, k),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn device_selector_precedence() {
        let args = DeviceArgs::from_kwargs(&kwargs(&[("serial", "00000001"), ("rtl", "2")])).unwrap();
        assert_eq!(args.device, DeviceSelector::Index(2));

        let args = DeviceArgs::from_kwargs(&kwargs(&[("label", "Generic RTL2832U :: 1")])).unwrap();
        assert_eq!(args.device, DeviceSelector::Label("Generic RTL2832U :: 1".into()));
    }

    #[test]
    fn device_settings() {
        let args = DeviceArgs::from_kwargs(&kwargs(&[
            ("direct_samp", "2"),
            ("iq_swap", "1"),
            ("offset_tune", "true"),
            ("ppm", "-12"),
        ]))
        .unwrap();
        assert_eq!(args.direct_sampling, DirectSampling::QBranch);
        assert!(args.iq_swap && args.offset_tuning);
        assert_eq!(args.ppm, -12);

        assert!(DeviceArgs::from_kwargs(&kwargs(&[("direct_samp", "3")])).is_err());
        assert!(DeviceArgs::from_kwargs(&kwargs(&[("iq_swap", "yes")])).is_err());
    }

    #[test]
    fn args_info_lists_stream_options() {
        let keys: Vec<_> = stream_args_info().iter().map(|a| a.key).collect();
        assert_eq!(keys, vec!["bufflen", "buffers", "asyncBuffs"]);
        assert!(stream_args_info().iter().all(|a| a.kind == ArgKind::Int));
    }
}
