pub mod config;
pub mod error;
pub mod registry;
pub mod sdr;

pub use config::{DeviceArgs, Kwargs, StreamArgs};
pub use error::{Error, Result};
pub use registry::{DeviceInfo, Registry};
pub use sdr::convert::{Sample, StreamFormat};
pub use sdr::rtl::{Direction, Radio, StreamHandle};
pub use sdr::stream::{ReadBuffer, ReadResult};
pub use sdr::tuner::{FrequencyElement, GainElement, TunerType};
