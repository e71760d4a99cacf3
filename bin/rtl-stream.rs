use failure::{format_err, Error};
use log::*;
use num_complex::Complex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

use rtlstream::sdr::replay::ReplayDriver;
use rtlstream::sdr::Driver;
use rtlstream::{
    DeviceArgs, Direction, FrequencyElement, Kwargs, Radio, Registry, Sample, StreamFormat,
    StreamHandle,
};

/// Consecutive read timeouts tolerated before giving up.
const MAX_TIMEOUTS: u32 = 5;

#[derive(StructOpt)]
#[structopt(name = "rtl-stream", about = "capture iq samples from an rtl-sdr")]
struct Cli {
    /// replay a raw cu8 capture instead of opening hardware
    #[structopt(short, long, parse(from_os_str))]
    path: Option<PathBuf>,

    /// loop the replay file
    #[structopt(long)]
    repeat: bool,

    /// list attached devices and exit
    #[structopt(short, long)]
    list: bool,

    #[structopt(short = "d", long, default_value = "0")]
    index: u32,

    #[structopt(long)]
    serial: Option<String>,

    /// CS8, CS16 or CF32
    #[structopt(short = "F", long, default_value = "CF32")]
    format: String,

    #[structopt(long)]
    bufflen: Option<usize>,

    #[structopt(long)]
    buffers: Option<usize>,

    #[structopt(short = "s", long, default_value = "2048000")]
    rate: f64,

    #[structopt(short = "f", long, default_value = "100000000")]
    freq: f64,

    /// tuner gain in dB, automatic when omitted
    #[structopt(short, long)]
    gain: Option<f64>,

    #[structopt(long, default_value = "0")]
    ppm: i32,

    /// samples to capture
    #[structopt(short = "n", long, default_value = "2048000")]
    count: usize,

    #[structopt(long, default_value = "1000")]
    timeout_ms: u64,

    /// output file, stdout when omitted
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
}

impl Cli {
    fn device_kwargs(&self) -> Kwargs {
        let mut args = Kwargs::new();
        match &self.serial {
            Some(serial) => args.insert("serial".to_string(), serial.clone()),
            None => args.insert("rtl".to_string(), self.index.to_string()),
        };
        args.insert("ppm".to_string(), self.ppm.to_string());
        args
    }

    fn stream_kwargs(&self) -> Kwargs {
        let mut args = Kwargs::new();
        if let Some(bufflen) = self.bufflen {
            args.insert("bufflen".to_string(), bufflen.to_string());
        }
        if let Some(buffers) = self.buffers {
            args.insert("buffers".to_string(), buffers.to_string());
        }
        args
    }
}

fn main() -> Result<(), Error> {
    pretty_env_logger::init();
    let cli = Cli::from_args();

    if let Some(path) = &cli.path {
        return run(Registry::new(ReplayDriver::file(path, cli.repeat)), &cli);
    }
    open_hardware(&cli)
}

#[cfg(feature = "rtlsdr")]
fn open_hardware(cli: &Cli) -> Result<(), Error> {
    run(Registry::new(rtlstream::sdr::librtlsdr::LibRtlSdr), cli)
}

#[cfg(not(feature = "rtlsdr"))]
fn open_hardware(_cli: &Cli) -> Result<(), Error> {
    Err(format_err!(
        "built without the rtlsdr feature, use --path to replay a capture"
    ))
}

fn run<D: Driver>(registry: Registry<D>, cli: &Cli) -> Result<(), Error> {
    if cli.list {
        for info in registry.find(&Kwargs::new()) {
            println!("{}: {} (tuner {})", info.index, info.label, info.tuner);
        }
        return Ok(());
    }

    let mut radio = registry.make(&DeviceArgs::from_kwargs(&cli.device_kwargs())?)?;
    radio.set_sample_rate(cli.rate)?;
    radio.set_frequency(FrequencyElement::Rf, cli.freq)?;
    match cli.gain {
        Some(gain) => {
            radio.set_gain_mode(false)?;
            radio.set_gain(gain)?;
        }
        None => radio.set_gain_mode(true)?,
    }
    info!(
        "tuned to {} Hz at {} S/s, gain {}",
        radio.frequency(FrequencyElement::Rf),
        radio.sample_rate(),
        if radio.gain_mode() { "auto".to_string() } else { format!("{} dB", radio.gain()) }
    );

    let handle = radio.setup_stream(Direction::Rx, &cli.format, &[0], &cli.stream_kwargs())?;

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    radio.activate_stream(handle)?;
    let format: StreamFormat = cli.format.parse()?;
    let captured = match format {
        StreamFormat::Cs8 => capture::<Complex<i8>, D>(&mut radio, handle, cli, &mut out),
        StreamFormat::Cs16 => capture::<Complex<i16>, D>(&mut radio, handle, cli, &mut out),
        StreamFormat::Cf32 => capture::<Complex<f32>, D>(&mut radio, handle, cli, &mut out),
    };
    radio.deactivate_stream(handle)?;
    radio.close_stream(handle)?;

    out.flush()?;
    info!("captured {} samples", captured?);
    Ok(())
}

fn capture<T: Sample, D: Driver>(
    radio: &mut Radio<D>,
    handle: StreamHandle,
    cli: &Cli,
    out: &mut dyn Write,
) -> Result<usize, Error> {
    let timeout = Duration::from_millis(cli.timeout_ms);
    let mut buf = vec![T::default(); radio.stream_mtu(handle)?];
    let mut bytes = Vec::with_capacity(buf.len() * T::FORMAT.element_size());

    let mut total = 0;
    let mut timeouts = 0;
    let mut overflows = 0;
    while total < cli.count {
        let want = buf.len().min(cli.count - total);
        match radio.read_stream(handle, &mut buf[..want], timeout) {
            Ok(r) => {
                timeouts = 0;
                trace!("{} samples at {} ns", r.elems, r.time_ns);
                bytes.clear();
                for s in &buf[..r.elems] {
                    s.write_le(&mut bytes);
                }
                out.write_all(&bytes)?;
                total += r.elems;
            }
            Err(rtlstream::Error::Timeout) => {
                timeouts += 1;
                warn!("timeout waiting for samples ({}/{})", timeouts, MAX_TIMEOUTS);
                if timeouts >= MAX_TIMEOUTS {
                    return Err(format_err!("no samples after {} timeouts", timeouts));
                }
            }
            Err(rtlstream::Error::Overflow) => overflows += 1,
            Err(e) => return Err(e.into()),
        }
    }

    if overflows > 0 {
        warn!("{} overflows during capture", overflows);
    }
    Ok(total)
}
