//! This module contains all the capture logic

// The capture side does one thing, as fast as possible: pull datagrams off the
// socket in big batches into a fixed set of slots. Nothing here allocates after
// construction, and the only blocking call is the batched receive itself.

use std::net::{Ipv4Addr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use crate::error::TransportError;

/// Datagrams requested per receive call
pub const BATCH: usize = 256;
/// Receive slot size, the NIC MTU should be set to 9000
pub const SLOT_SIZE: usize = 9000;

/// Anything that hands out raw datagrams one by one
pub trait PacketSource {
    fn next_packet(&mut self) -> Result<&[u8], TransportError>;
}

pub struct UdpBatchReader {
    socket: Socket,
    /// BATCH slots of SLOT_SIZE bytes back to back
    slots: Vec<u8>,
    lens: [usize; BATCH],
    /// Next slot to hand out
    cursor: usize,
    #[cfg(target_os = "linux")]
    iovs: Vec<libc::iovec>,
    #[cfg(target_os = "linux")]
    msgs: Vec<libc::mmsghdr>,
}

impl UdpBatchReader {
    /// Bind to `0.0.0.0:port` and ask for a `buffer_size` byte receive buffer
    pub fn bind(port: u16, buffer_size: usize) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(
            |source| TransportError::SocketOption {
                option: "socket",
                source,
            },
        )?;
        set_receive_buffer(&socket, buffer_size)?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket
            .bind(&addr.into())
            .map_err(|source| TransportError::Bind { port, source })?;
        info!(port, "Listening for UDP packets");

        #[cfg_attr(not(target_os = "linux"), allow(unused_mut))]
        let mut slots = vec![0u8; BATCH * SLOT_SIZE];
        #[cfg(target_os = "linux")]
        let (iovs, msgs) = {
            let mut iovs: Vec<libc::iovec> = slots
                .chunks_exact_mut(SLOT_SIZE)
                .map(|slot| libc::iovec {
                    iov_base: slot.as_mut_ptr() as _,
                    iov_len: SLOT_SIZE,
                })
                .collect();
            let msgs = iovs
                .iter_mut()
                .map(|iov| {
                    // Safety: all-zero is a valid msghdr, we fill in the iov below
                    let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
                    hdr.msg_iov = iov as *mut _;
                    hdr.msg_iovlen = 1;
                    libc::mmsghdr {
                        msg_hdr: hdr,
                        msg_len: 0,
                    }
                })
                .collect();
            (iovs, msgs)
        };

        Ok(Self {
            socket,
            slots,
            lens: [0; BATCH],
            // Start exhausted so the first call receives
            cursor: BATCH,
            #[cfg(target_os = "linux")]
            iovs,
            #[cfg(target_os = "linux")]
            msgs,
        })
    }

    /// Fill every slot with one blocking recvmmsg call
    #[cfg(target_os = "linux")]
    fn refill(&mut self) -> Result<(), TransportError> {
        use std::os::unix::io::AsRawFd;
        // Reset fields that recvmmsg may have modified
        for (msg, iov) in self.msgs.iter_mut().zip(self.iovs.iter_mut()) {
            iov.iov_len = SLOT_SIZE;
            msg.msg_hdr.msg_iov = iov as *mut _;
            msg.msg_hdr.msg_flags = 0;
            msg.msg_len = 0;
        }
        // Safety: msgs and iovs point into self.slots, which lives (and doesn't move) as long as self
        let n = unsafe {
            libc::recvmmsg(
                self.socket.as_raw_fd(),
                self.msgs.as_mut_ptr(),
                BATCH as _,
                0,
                std::ptr::null_mut(),
            )
        };
        if n < 0 {
            return Err(TransportError::Receive(std::io::Error::last_os_error()));
        }
        let n = n as usize;
        if n != BATCH {
            return Err(TransportError::ShortBatch {
                got: n,
                requested: BATCH,
            });
        }
        for (len, msg) in self.lens.iter_mut().zip(&self.msgs) {
            if msg.msg_hdr.msg_flags & libc::MSG_TRUNC != 0 {
                return Err(TransportError::Truncated(SLOT_SIZE));
            }
            *len = msg.msg_len as usize;
        }
        Ok(())
    }

    /// No recvmmsg, one blocking recv per slot
    #[cfg(not(target_os = "linux"))]
    fn refill(&mut self) -> Result<(), TransportError> {
        use std::mem::MaybeUninit;
        for (slot, len) in self.slots.chunks_exact_mut(SLOT_SIZE).zip(self.lens.iter_mut()) {
            // Safety: u8 and MaybeUninit<u8> share a layout and the slot is already initialized
            let buf: &mut [MaybeUninit<u8>] = unsafe {
                std::slice::from_raw_parts_mut(slot.as_mut_ptr() as _, slot.len())
            };
            *len = self.socket.recv(buf).map_err(TransportError::Receive)?;
        }
        Ok(())
    }
}

impl PacketSource for UdpBatchReader {
    fn next_packet(&mut self) -> Result<&[u8], TransportError> {
        if self.cursor == BATCH {
            self.refill()?;
            self.cursor = 0;
        }
        let i = self.cursor;
        self.cursor += 1;
        let start = i * SLOT_SIZE;
        Ok(&self.slots[start..start + self.lens[i]])
    }
}

/// Ask for a big receive buffer so bursts don't overflow the socket
fn set_receive_buffer(socket: &Socket, size: usize) -> Result<(), TransportError> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let val = size as libc::c_int;
        // SO_RCVBUFFORCE bypasses net.core.rmem_max but needs CAP_NET_ADMIN
        // Safety: plain setsockopt with a c_int argument
        let forced = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUFFORCE,
                &val as *const _ as _,
                std::mem::size_of::<libc::c_int>() as _,
            )
        } == 0;
        if forced {
            return Ok(());
        }
    }
    socket
        .set_recv_buffer_size(size)
        .map_err(|source| TransportError::SocketOption {
            option: "SO_RCVBUF",
            source,
        })?;
    if let Ok(actual) = socket.recv_buffer_size() {
        if actual < size / 2 {
            warn!(
                "Receive buffer is {}KB (wanted {}KB); run as root or: sysctl -w net.core.rmem_max={}",
                actual / 1024,
                size / 1024,
                size * 2
            );
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_any_port() {
        let reader = UdpBatchReader::bind(0, 1024 * 1024).unwrap();
        assert!(reader.socket.local_addr().unwrap().as_socket().is_some());
        assert_eq!(reader.cursor, BATCH);
        assert_eq!(reader.slots.len(), BATCH * SLOT_SIZE);
    }
}
