//! The shared memory ring buffer we hand finished pages to
//!
//! PSRDADA blocks are lent out by an iterator that borrows the client, so a block
//! can't be held across packets. Pages are assembled in one of a small pool of
//! buffers instead and a writer thread copies each finished one into the next data
//! block. The packet thread only ever blocks when the pool is empty, which means
//! PSRDADA itself has fallen behind.

use std::{
    io::Write,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use lending_iterator::LendingIterator;
use psrdada::client::DadaClient;
use tracing::{debug, info};

use crate::{error::RingBufferError, header::Header};

/// Pages that can be in the writer's hands or waiting for it at once
pub const PAGES_IN_FLIGHT: usize = 2;

/// Page handshake with the ring buffer service.
///
/// Every acquired page is handed back exactly once, either with [`RingBuffer::mark_filled`]
/// or, for the very last page, with [`RingBuffer::mark_end_of_data`].
pub trait RingBuffer {
    /// Size of one data page, as reported by the service
    fn page_size(&self) -> usize;
    fn publish_header(&mut self, header: &Header) -> Result<(), RingBufferError>;
    /// Get a fresh page to write into (blocking)
    fn acquire_page(&mut self) -> Result<(), RingBufferError>;
    /// The page currently being written
    fn page_mut(&mut self) -> Result<&mut [u8], RingBufferError>;
    fn mark_filled(&mut self, size: usize) -> Result<(), RingBufferError>;
    fn mark_end_of_data(&mut self, size: usize) -> Result<(), RingBufferError>;
}

enum Command {
    Header(Header),
    Page { page: Vec<u8>, size: usize, eod: bool },
}

/// The writer thread's end of the hand-off
pub(crate) struct Worker {
    ready: Sender<usize>,
    commands: Receiver<Command>,
    free: Sender<Vec<u8>>,
}

impl Worker {
    /// Report the page size and stock the page pool
    pub(crate) fn ready(&self, page_size: usize) -> Result<(), RingBufferError> {
        fn gone<T>(_: T) -> RingBufferError {
            RingBufferError::Writer("ring buffer handle dropped".to_owned())
        }
        for _ in 0..PAGES_IN_FLIGHT {
            self.free.send(vec![0u8; page_size]).map_err(gone)?;
        }
        self.ready.send(page_size).map_err(gone)
    }

    /// Pass headers and pages on in the order they were handed off, until end of data
    pub(crate) fn serve(
        self,
        mut push_header: impl FnMut(&Header) -> Result<(), RingBufferError>,
        mut write_page: impl FnMut(&[u8], bool) -> Result<(), RingBufferError>,
    ) -> Result<(), RingBufferError> {
        for command in self.commands.iter() {
            match command {
                Command::Header(header) => push_header(&header)?,
                Command::Page { page, size, eod } => {
                    write_page(&page[..size], eod)?;
                    if eod {
                        return Ok(());
                    }
                    // Nobody to take it back once the run is over
                    let _ = self.free.send(page);
                }
            }
        }
        Ok(())
    }
}

/// A PSRDADA ring buffer created by someone else (usually `dada_db`)
pub struct DadaRingBuffer {
    key: i32,
    page_size: usize,
    commands: Sender<Command>,
    free: Receiver<Vec<u8>>,
    current: Option<Vec<u8>>,
    writer: Option<JoinHandle<Result<(), RingBufferError>>>,
}

impl DadaRingBuffer {
    pub fn connect(key: i32) -> Result<Self, RingBufferError> {
        let ring = Self::spawn(key, move |worker| {
            // Build the PSRDADA client on the thread that writes to it
            #[allow(unused_mut)]
            let mut client = DadaClient::new(key).map_err(|e| RingBufferError::Connect {
                key,
                reason: format!("{e:?}"),
            })?;
            #[allow(clippy::unnecessary_cast)]
            let page_size = client.data_buf_size() as usize;
            worker.ready(page_size)?;
            let (mut hc, mut dc) = client.split();
            let mut writer = dc.writer();
            worker.serve(
                |header| {
                    // Safety: check_header made sure no key has whitespace and no value has a line break
                    unsafe { hc.push_header(header) }
                        .map(|_| ())
                        .map_err(|e| RingBufferError::Header(format!("{e:?}")))
                },
                |page, eod| {
                    // Grab the next psrdada block we can write to (BLOCKING)
                    let mut block = writer.next().ok_or_else(|| {
                        RingBufferError::Acquire("no data block available".to_owned())
                    })?;
                    block
                        .write_all(page)
                        .map_err(|e| RingBufferError::MarkFilled(e.to_string()))?;
                    if eod {
                        block.eod();
                    }
                    block.commit();
                    Ok(())
                },
            )
        })?;
        info!(
            key = format!("{key:x}"),
            page_size = ring.page_size,
            "Connected to PSRDADA"
        );
        Ok(ring)
    }

    /// Start the writer thread running `body` and wait for it to report a page size
    pub(crate) fn spawn<F>(key: i32, body: F) -> Result<Self, RingBufferError>
    where
        F: FnOnce(Worker) -> Result<(), RingBufferError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded(1);
        // The header plus every page of the pool
        let (commands_tx, commands_rx) = bounded(PAGES_IN_FLIGHT + 1);
        let (free_tx, free_rx) = bounded(PAGES_IN_FLIGHT);
        let worker = Worker {
            ready: ready_tx,
            commands: commands_rx,
            free: free_tx,
        };
        let handle = thread::Builder::new()
            .name(format!("dada-{key:x}"))
            .spawn(move || body(worker))
            .map_err(|e| RingBufferError::Connect {
                key,
                reason: e.to_string(),
            })?;
        let mut ring = Self {
            key,
            page_size: 0,
            commands: commands_tx,
            free: free_rx,
            current: None,
            writer: Some(handle),
        };
        match ready_rx.recv() {
            Ok(page_size) => {
                ring.page_size = page_size;
                Ok(ring)
            }
            Err(_) => Err(ring.writer_error()),
        }
    }

    /// Why the writer thread went away
    fn writer_error(&mut self) -> RingBufferError {
        match self.join() {
            Err(e) => e,
            Ok(()) => RingBufferError::Writer("writer already finished".to_owned()),
        }
    }

    fn join(&mut self) -> Result<(), RingBufferError> {
        let handle = self
            .writer
            .take()
            .ok_or_else(|| RingBufferError::Writer("writer already finished".to_owned()))?;
        handle
            .join()
            .map_err(|_| RingBufferError::Writer("writer thread panicked".to_owned()))?
    }

    fn hand_off(&mut self, size: usize, eod: bool) -> Result<(), RingBufferError> {
        let page = self.current.take().ok_or(RingBufferError::NoPage)?;
        if size > page.len() {
            return Err(RingBufferError::MarkFilled(format!(
                "{size} bytes don't fit a {} byte page",
                page.len()
            )));
        }
        if self.commands.send(Command::Page { page, size, eod }).is_err() {
            return Err(self.writer_error());
        }
        debug!(key = format!("{:x}", self.key), size, eod, "Handed off page");
        if eod {
            // Everything is in PSRDADA once the writer is done
            self.join()?;
        }
        Ok(())
    }
}

impl RingBuffer for DadaRingBuffer {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn publish_header(&mut self, header: &Header) -> Result<(), RingBufferError> {
        crate::header::check_header(header).map_err(|e| RingBufferError::Header(e.to_string()))?;
        if self.commands.send(Command::Header(header.clone())).is_err() {
            return Err(self.writer_error());
        }
        Ok(())
    }

    fn acquire_page(&mut self) -> Result<(), RingBufferError> {
        if self.current.is_some() {
            return Err(RingBufferError::Acquire(
                "previous page was never marked filled".to_owned(),
            ));
        }
        // Blocks while the writer still holds every page of the pool
        match self.free.recv() {
            Ok(page) => {
                self.current = Some(page);
                Ok(())
            }
            Err(_) => Err(self.writer_error()),
        }
    }

    fn page_mut(&mut self) -> Result<&mut [u8], RingBufferError> {
        self.current.as_deref_mut().ok_or(RingBufferError::NoPage)
    }

    fn mark_filled(&mut self, size: usize) -> Result<(), RingBufferError> {
        self.hand_off(size, false)
    }

    fn mark_end_of_data(&mut self, size: usize) -> Result<(), RingBufferError> {
        self.hand_off(size, true)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Written {
        Header(Header),
        Page(Vec<u8>, bool),
    }

    /// A writer thread that records what it was handed and fails on page `fail_at`
    fn recording(fail_at: Option<usize>) -> (DadaRingBuffer, Arc<Mutex<Vec<Written>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (headers, pages) = (log.clone(), log.clone());
        let ring = DadaRingBuffer::spawn(0xdada, move |worker| {
            worker.ready(16)?;
            let mut count = 0;
            worker.serve(
                |header| {
                    headers.lock().unwrap().push(Written::Header(header.clone()));
                    Ok(())
                },
                |page, eod| {
                    if Some(count) == fail_at {
                        return Err(RingBufferError::MarkFilled("ring full".to_owned()));
                    }
                    count += 1;
                    pages.lock().unwrap().push(Written::Page(page.to_vec(), eod));
                    Ok(())
                },
            )
        })
        .unwrap();
        (ring, log)
    }

    #[test]
    fn test_pages_reach_the_writer_in_order() {
        let (mut ring, log) = recording(None);
        assert_eq!(ring.page_size(), 16);
        let header = Header::from([("NCHAN".to_owned(), "1536".to_owned())]);
        ring.publish_header(&header).unwrap();
        // More pages than the pool holds, so acquiring has to wait for the writer
        for k in 0..5u8 {
            ring.acquire_page().unwrap();
            ring.page_mut().unwrap().fill(k);
            if k < 4 {
                ring.mark_filled(16).unwrap();
            } else {
                ring.mark_end_of_data(8).unwrap();
            }
        }
        // The writer has been joined, so everything is in the log
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 6);
        assert_eq!(log[0], Written::Header(header));
        for k in 0..4u8 {
            assert_eq!(log[k as usize + 1], Written::Page(vec![k; 16], false));
        }
        assert_eq!(log[5], Written::Page(vec![4; 8], true));
    }

    #[test]
    fn test_handshake_misuse() {
        let (mut ring, _) = recording(None);
        assert!(matches!(ring.page_mut(), Err(RingBufferError::NoPage)));
        assert!(matches!(ring.mark_filled(16), Err(RingBufferError::NoPage)));
        ring.acquire_page().unwrap();
        assert!(matches!(ring.acquire_page(), Err(RingBufferError::Acquire(_))));
        assert!(matches!(ring.mark_filled(17), Err(RingBufferError::MarkFilled(_))));
    }

    #[test]
    fn test_writer_failure_surfaces() {
        let (mut ring, _) = recording(Some(0));
        let result = (0..PAGES_IN_FLIGHT + 2).try_for_each(|_| {
            ring.acquire_page()?;
            ring.mark_filled(16)
        });
        assert!(matches!(result, Err(RingBufferError::MarkFilled(ref m)) if m == "ring full"));
    }

    #[test]
    fn test_connect_failure_surfaces() {
        let result = DadaRingBuffer::spawn(0xbeef, |_| {
            Err(RingBufferError::Connect {
                key: 0xbeef,
                reason: "no shared memory".to_owned(),
            })
        });
        assert!(matches!(result, Err(RingBufferError::Connect { key: 0xbeef, .. })));
    }
}
