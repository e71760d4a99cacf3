//! The open receive stream: pulls ring slots and converts them into the
//! caller's buffers, one slot possibly spanning several reads.

use log::*;
use std::sync::Arc;
use std::time::Duration;

use super::convert::{Sample, StreamFormat, BYTES_PER_SAMPLE};
use super::dsp::{lut, ConversionLut};
use super::ring::{RingBufferPool, RingConsumer, RingProducer};
use crate::config::StreamArgs;
use crate::error::{Error, Result};

/// Outcome of a successful `read`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadResult {
    /// elements written to the caller's buffer
    pub elems: usize,
    /// stream time of the first element written
    pub time_ns: i64,
    /// the current slot still holds elements for the next read
    pub more_fragments: bool,
}

/// A slot handed out through direct buffer access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadBuffer {
    pub handle: usize,
    pub elems: usize,
    pub time_ns: i64,
}

/// Convert a sample-clock position into nanoseconds of stream time.
pub fn ticks_to_time_ns(ticks: i64, rate: f64) -> i64 {
    if rate <= 0.0 {
        return 0;
    }
    let full = (ticks as f64 / rate) as i64;
    let err = ticks - (full as f64 * rate) as i64;
    let part = (err as f64 * 1e9 / rate).round() as i64;
    full * 1_000_000_000 + part
}

pub struct Stream {
    format: StreamFormat,
    iq_swap: bool,
    args: StreamArgs,
    lut: &'static ConversionLut,
    consumer: RingConsumer,

    // partially consumed slot
    handle: Option<usize>,
    buffered_elems: usize,
    offset: usize,
    buf_ticks: i64,
}

impl Stream {
    pub fn new(format: StreamFormat, args: StreamArgs, iq_swap: bool) -> Stream {
        let pool = RingBufferPool::new(args.buffers, args.buffer_len);
        Stream {
            format,
            iq_swap,
            args,
            lut: lut(),
            consumer: RingConsumer::new(pool),
            handle: None,
            buffered_elems: 0,
            offset: 0,
            buf_ticks: 0,
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn args(&self) -> &StreamArgs {
        &self.args
    }

    pub fn iq_swap(&self) -> bool {
        self.iq_swap
    }

    pub fn set_iq_swap(&mut self, iq_swap: bool) {
        self.iq_swap = iq_swap;
    }

    pub fn pool(&self) -> &Arc<RingBufferPool> {
        self.consumer.pool()
    }

    /// Elements per slot.
    pub fn mtu(&self) -> usize {
        self.args.buffer_len / BYTES_PER_SAMPLE
    }

    /// A fresh producer for a new activation, with the sample clock at zero.
    /// Anything still queued from an earlier activation is discarded.
    pub fn producer(&mut self) -> Result<RingProducer> {
        self.release_all()?;
        self.pool().clear();
        Ok(RingProducer::new(self.pool().clone()))
    }

    /// Drop buffered data at the next read, after a retune or rate change.
    pub fn request_reset(&self) {
        self.pool().request_reset();
    }

    /// Read up to `buf.len()` elements.
    ///
    /// Blocks for at most `timeout` when nothing is buffered. A slot larger
    /// than `buf` is handed out over several reads, flagged with
    /// `more_fragments` until its last element is delivered.
    pub fn read<T: Sample>(
        &mut self,
        buf: &mut [T],
        sample_rate: f64,
        timeout: Duration,
    ) -> Result<ReadResult> {
        if T::FORMAT != self.format {
            return Err(Error::InvalidFormat(T::FORMAT.name().to_string()));
        }

        if self.pool().reset_pending() && self.buffered_elems != 0 {
            debug!("reset pending, dropping {} buffered elements", self.buffered_elems);
            self.buffered_elems = 0;
            self.release_current()?;
        }

        if self.buffered_elems == 0 {
            let rb = self.acquire_read_buffer(sample_rate, timeout)?;
            self.handle = Some(rb.handle);
            self.buffered_elems = rb.elems;
            self.offset = 0;
        }
        let time_ns = ticks_to_time_ns(self.buf_ticks, sample_rate);

        let handle = self.handle.ok_or(Error::NoStream)?;
        let slot = self.consumer.held(handle).ok_or(Error::InvalidHandle(handle))?;

        let n = buf.len().min(self.buffered_elems);
        let src = &slot.bytes()[self.offset..self.offset + n * BYTES_PER_SAMPLE];
        T::convert(self.lut, self.iq_swap, src, &mut buf[..n]);

        self.buffered_elems -= n;
        self.offset += n * BYTES_PER_SAMPLE;
        self.buf_ticks += n as i64;

        let more_fragments = self.buffered_elems != 0;
        if !more_fragments {
            self.release_current()?;
        }
        trace!("read {} elements, {} left in slot", n, self.buffered_elems);

        Ok(ReadResult {
            elems: n,
            time_ns,
            more_fragments,
        })
    }

    fn release_current(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.consumer.release(handle),
            None => Ok(()),
        }
    }

    pub fn num_direct_access_buffers(&self) -> usize {
        self.pool().num_buffers()
    }

    /// Raw bytes of slot `handle`, available while it is acquired.
    pub fn direct_access_buffer(&self, handle: usize) -> Result<&[u8]> {
        if handle >= self.num_direct_access_buffers() {
            return Err(Error::InvalidHandle(handle));
        }
        self.consumer
            .held(handle)
            .map(|slot| slot.bytes())
            .ok_or(Error::InvalidHandle(handle))
    }

    /// Take the oldest filled slot without converting it.
    ///
    /// Must be paired with `release_read_buffer`.
    pub fn acquire_read_buffer(&mut self, sample_rate: f64, timeout: Duration) -> Result<ReadBuffer> {
        let slot = self.consumer.acquire(timeout)?;
        self.buf_ticks = slot.tick();
        Ok(ReadBuffer {
            handle: slot.index(),
            elems: slot.elems(),
            time_ns: ticks_to_time_ns(slot.tick(), sample_rate),
        })
    }

    pub fn release_read_buffer(&mut self, handle: usize) -> Result<()> {
        if self.handle == Some(handle) {
            self.handle = None;
            self.buffered_elems = 0;
        }
        self.consumer.release(handle)
    }

    /// Give back a slot still held by a partial read.
    pub fn release_all(&mut self) -> Result<()> {
        self.buffered_elems = 0;
        match self.consumer.held_handle() {
            Some(handle) => {
                self.handle = None;
                self.consumer.release(handle)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    const RATE: f64 = 2.048e6;
    const WAIT: Duration = Duration::from_millis(50);

    fn stream(format: StreamFormat, buffer_len: usize, buffers: usize) -> (Stream, RingProducer) {
        let args = StreamArgs {
            buffer_len,
            buffers,
            async_buffs: 0,
        };
        let mut stream = Stream::new(format, args, false);
        let producer = stream.producer().unwrap();
        (stream, producer)
    }

    #[test]
    fn converts_pushed_bytes_to_float() {
        let (mut stream, mut tx) = stream(StreamFormat::Cf32, 4, 2);
        tx.push(&[0x7f, 0x7f, 0x80, 0x80]);
        tx.push(&[0x00, 0xff, 0xff, 0x00]);

        let mut buf = [Complex::<f32>::default(); 4];
        let first = stream.read(&mut buf, RATE, WAIT).unwrap();
        assert_eq!(first.elems, 2);
        assert!(!first.more_fragments);
        let second = stream.read(&mut buf[2..], RATE, WAIT).unwrap();
        assert_eq!(second.elems, 2);

        assert!(buf[0].re.abs() < 0.01 && buf[0].im.abs() < 0.01);
        assert!(buf[2].re < -0.9);
        assert!(buf[2].im > 0.9);
        assert!(second.time_ns > first.time_ns);
    }

    #[test]
    fn large_slot_spans_several_reads() {
        let (mut stream, mut tx) = stream(StreamFormat::Cs16, 16, 2);
        tx.push(&[0x80; 16]);

        let mut buf = [Complex::<i16>::default(); 3];
        let mut delivered = 0;
        let mut times = Vec::new();
        loop {
            let r = stream.read(&mut buf, RATE, WAIT).unwrap();
            delivered += r.elems;
            times.push(r.time_ns);
            if !r.more_fragments {
                break;
            }
            assert!(delivered < 8);
        }
        assert_eq!(delivered, 8);
        assert_eq!(times[1], ticks_to_time_ns(3, RATE));
        assert_eq!(stream.read(&mut buf, RATE, WAIT).err(), Some(Error::Timeout));
    }

    #[test]
    fn reset_drops_partial_slot() {
        let (mut stream, mut tx) = stream(StreamFormat::Cs8, 8, 4);
        tx.push(&[0x80; 8]);
        tx.push(&[0x90; 8]);

        let mut buf = [Complex::<i8>::default(); 1];
        assert!(stream.read(&mut buf, RATE, WAIT).unwrap().more_fragments);

        stream.request_reset();
        assert_eq!(stream.read(&mut buf, RATE, WAIT).err(), Some(Error::Timeout));

        tx.push(&[0xa0; 8]);
        stream.read(&mut buf, RATE, WAIT).unwrap();
        assert_eq!(buf[0], Complex::new(0x20, 0x20));
    }

    #[test]
    fn wrong_sample_type_is_rejected() {
        let (mut stream, _tx) = stream(StreamFormat::Cs16, 8, 2);
        let mut buf = [Complex::<f32>::default(); 4];
        assert_eq!(
            stream.read(&mut buf, RATE, WAIT).err(),
            Some(Error::InvalidFormat("CF32".to_string()))
        );
    }

    #[test]
    fn swap_applies_to_the_next_read() {
        let (mut stream, mut tx) = stream(StreamFormat::Cs8, 2, 2);
        tx.push(&[0x90, 0x70]);
        tx.push(&[0x90, 0x70]);

        let mut buf = [Complex::<i8>::default(); 1];
        stream.read(&mut buf, RATE, WAIT).unwrap();
        assert_eq!(buf[0], Complex::new(16, -16));

        stream.set_iq_swap(true);
        stream.read(&mut buf, RATE, WAIT).unwrap();
        assert_eq!(buf[0], Complex::new(-16, 16));
    }

    #[test]
    fn direct_access_hands_out_raw_slots() {
        let (mut stream, mut tx) = stream(StreamFormat::Cs8, 4, 3);
        assert_eq!(stream.num_direct_access_buffers(), 3);
        tx.push(&[1, 2, 3, 4]);

        let rb = stream.acquire_read_buffer(RATE, WAIT).unwrap();
        assert_eq!(rb.elems, 2);
        assert_eq!(rb.time_ns, 0);
        assert_eq!(stream.direct_access_buffer(rb.handle).unwrap(), &[1, 2, 3, 4]);

        stream.release_read_buffer(rb.handle).unwrap();
        assert_eq!(
            stream.direct_access_buffer(rb.handle).err(),
            Some(Error::InvalidHandle(rb.handle))
        );
        assert!(stream.direct_access_buffer(7).is_err());
    }

    #[test]
    fn tick_conversion() {
        assert_eq!(ticks_to_time_ns(0, RATE), 0);
        assert_eq!(ticks_to_time_ns(2_048_000, RATE), 1_000_000_000);
        assert_eq!(ticks_to_time_ns(1024, RATE), 500_000);
        assert_eq!(ticks_to_time_ns(3 * 2_048_000 + 2048, RATE), 3_001_000_000);
        assert_eq!(ticks_to_time_ns(100, 0.0), 0);
    }
}
