use log::*;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::ring::RingProducer;
use super::{Controller, Reader};
use crate::error::{Error, Result};

/// How often deactivation re-issues the cancel while waiting for the
/// transfer loop to notice it.
const CANCEL_RETRY: Duration = Duration::from_millis(5);

/// The thread running the device's async transfer loop.
///
/// The thread hands the reader back when it exits so the stream can be
/// activated again.
pub struct Ingestion<R: Reader> {
    handle: JoinHandle<R>,
}

impl<R: Reader> Ingestion<R> {
    pub fn spawn(
        mut reader: R,
        mut producer: RingProducer,
        buf_num: u32,
        buf_len: u32,
    ) -> Result<Ingestion<R>> {
        let handle = thread::Builder::new()
            .name("rtl-rx".to_string())
            .spawn(move || {
                debug!("rx thread started, {} byte transfers", buf_len);

                let mut callback = |bytes: &[u8]| {
                    trace!("got buffer from rtl-sdr iq, {} bytes", bytes.len());
                    producer.push(bytes);
                };
                if let Err(e) = reader.read_async(buf_num, buf_len, &mut callback) {
                    error!("async read ended with error: {}", e);
                }

                debug!("rx thread finished at tick {}", producer.ticks());
                reader
            })
            .map_err(|e| Error::hardware("spawn rx thread", e))?;

        Ok(Ingestion { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the transfer loop and wait for the thread to exit.
    ///
    /// No callback runs after this returns.
    pub fn stop<C: Controller>(self, ctl: &mut C) -> Result<R> {
        loop {
            ctl.cancel_async();
            if self.handle.is_finished() {
                break;
            }
            thread::sleep(CANCEL_RETRY);
        }

        let reader = self
            .handle
            .join()
            .map_err(|_| Error::hardware("join rx thread", "thread panicked"))?;
        trace!("rtl-sdr reader thread joined");
        Ok(reader)
    }
}
