//! Poll-mode NIC abstraction.
//!
//! A [`Nic`] moves whole Ethernet frames in bursts and never blocks. Two
//! implementations are provided: an in-process link for tests and
//! simulations, and a UDP socket that tunnels frames to the peer host.

use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use super::{BufferPool, PooledBuffer};
use crate::config::NicConfig;
use crate::error::{Error, Result, TransportError};

/// Burst-oriented frame I/O.
pub trait Nic: Send {
    /// Receive up to `max` frames, appending them to `out`.
    fn rx_burst(&mut self, out: &mut Vec<PooledBuffer>, max: usize) -> Result<usize>;

    /// Transmit frames from the front of `frames`.
    ///
    /// Sent frames are removed and released; frames the NIC could not take
    /// stay in `frames`. Returns how many were sent.
    fn tx_burst(&mut self, frames: &mut Vec<PooledBuffer>) -> Result<usize>;
}

/// Per-frame hook on an in-memory link.
///
/// May rewrite the frame in place; returning `false` drops it.
pub type LinkFilter = Box<dyn FnMut(&mut [u8]) -> bool + Send>;

/// Test-side handle on one direction of a [`MemoryNic`] pair.
#[derive(Clone)]
pub struct LinkControl {
    inbound: Arc<ArrayQueue<Vec<u8>>>,
    outbound_filter: Arc<Mutex<Option<LinkFilter>>>,
}

impl LinkControl {
    /// Install a hook on frames this NIC transmits.
    pub fn set_filter(&self, filter: impl FnMut(&mut [u8]) -> bool + Send + 'static) {
        *self.outbound_filter.lock() = Some(Box::new(filter));
    }

    pub fn clear_filter(&self) {
        *self.outbound_filter.lock() = None;
    }

    /// Place a raw frame in this NIC's receive ring.
    pub fn inject(&self, frame: Vec<u8>) -> bool {
        self.inbound.push(frame).is_ok()
    }

    /// Frames waiting in this NIC's receive ring.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }
}

impl fmt::Debug for LinkControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkControl")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// One end of an in-process point-to-point link.
pub struct MemoryNic {
    pool: Arc<BufferPool>,
    rx: Arc<ArrayQueue<Vec<u8>>>,
    tx: Arc<ArrayQueue<Vec<u8>>>,
    filter: Arc<Mutex<Option<LinkFilter>>>,
}

impl MemoryNic {
    /// Create two NICs wired to each other, each ring holding `capacity` frames.
    pub fn pair(
        pool_a: Arc<BufferPool>,
        pool_b: Arc<BufferPool>,
        capacity: usize,
    ) -> (MemoryNic, MemoryNic) {
        let a_to_b = Arc::new(ArrayQueue::new(capacity.max(1)));
        let b_to_a = Arc::new(ArrayQueue::new(capacity.max(1)));

        let a = MemoryNic {
            pool: pool_a,
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            filter: Arc::new(Mutex::new(None)),
        };
        let b = MemoryNic {
            pool: pool_b,
            rx: a_to_b,
            tx: b_to_a,
            filter: Arc::new(Mutex::new(None)),
        };

        (a, b)
    }

    /// Handle for steering this NIC from outside its owning loop.
    pub fn control(&self) -> LinkControl {
        LinkControl {
            inbound: Arc::clone(&self.rx),
            outbound_filter: Arc::clone(&self.filter),
        }
    }
}

impl Nic for MemoryNic {
    fn rx_burst(&mut self, out: &mut Vec<PooledBuffer>, max: usize) -> Result<usize> {
        let mut received = 0;
        while received < max {
            if self.rx.is_empty() {
                break;
            }
            // Frames stay on the ring until a buffer is available
            let mut buffer = match self.pool.try_get() {
                Ok(buffer) => buffer,
                Err(Error::BufferExhausted) if received > 0 => break,
                Err(e) => return Err(e),
            };
            let Some(frame) = self.rx.pop() else {
                break;
            };
            buffer.copy_from(&frame);
            out.push(buffer);
            received += 1;
        }
        Ok(received)
    }

    fn tx_burst(&mut self, frames: &mut Vec<PooledBuffer>) -> Result<usize> {
        let mut sent = 0;
        let mut filter = self.filter.lock();

        for frame in frames.iter() {
            if self.tx.is_full() {
                break;
            }
            let mut bytes = frame.as_slice().to_vec();
            let keep = filter.as_mut().map_or(true, |f| f(&mut bytes));
            if keep {
                let _ = self.tx.push(bytes);
            }
            // A filtered frame counts as sent: it was lost on the wire
            sent += 1;
        }

        frames.drain(..sent);
        Ok(sent)
    }
}

impl fmt::Debug for MemoryNic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNic")
            .field("rx_pending", &self.rx.len())
            .field("tx_pending", &self.tx.len())
            .finish_non_exhaustive()
    }
}

/// Tunnels frames to the peer host as UDP datagrams.
///
/// The socket is non-blocking; each datagram carries exactly one frame. If
/// no peer is configured, the source of the first received datagram is used.
#[derive(Debug)]
pub struct UdpNic {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    pool: Arc<BufferPool>,
}

impl UdpNic {
    /// Bind according to `config`.
    pub fn bind(config: &NicConfig, pool: Arc<BufferPool>) -> Result<Self> {
        let socket = create_socket(config.bind)?;
        let local = socket.local_addr().map_err(|e| TransportError::BindFailed {
            addr: config.bind,
            reason: e.to_string(),
        })?;

        info!(%local, peer = ?config.peer, "UDP NIC bound");

        Ok(Self {
            socket,
            peer: config.peer,
            pool,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

fn create_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let bind_failed = |e: std::io::Error| TransportError::BindFailed {
        addr,
        reason: e.to_string(),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;

    Ok(socket.into())
}

impl Nic for UdpNic {
    fn rx_burst(&mut self, out: &mut Vec<PooledBuffer>, max: usize) -> Result<usize> {
        let mut received = 0;
        while received < max {
            let mut buffer = match self.pool.try_get() {
                Ok(buffer) => buffer,
                Err(Error::BufferExhausted) if received > 0 => break,
                Err(e) => return Err(e),
            };
            match self.socket.recv_from(buffer.as_mut_slice()) {
                Ok((len, from)) => {
                    if self.peer.is_none() {
                        debug!(%from, "learned peer address");
                        self.peer = Some(from);
                    }
                    buffer.set_len(len);
                    out.push(buffer);
                    received += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(TransportError::ReceiveFailed(e.to_string()).into()),
            }
        }
        Ok(received)
    }

    fn tx_burst(&mut self, frames: &mut Vec<PooledBuffer>) -> Result<usize> {
        let Some(peer) = self.peer else {
            return Ok(0);
        };

        let mut sent = 0;
        let mut failure = None;
        for frame in frames.iter() {
            match self.socket.send_to(frame.as_slice(), peer) {
                Ok(_) => sent += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        frames.drain(..sent);
        match failure {
            Some(e) => Err(TransportError::SendFailed(e.to_string()).into()),
            None => Ok(sent),
        }
    }
}
