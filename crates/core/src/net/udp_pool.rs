//! Shared UDP socket-pair pool.
//!
//! RTP/RTCP always travel on an adjacent even/odd port pair. The pool
//! hands out pairs bound to the server's configured interface and, where
//! possible, reuses pairs released by torn-down sessions instead of
//! binding fresh sockets.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};

/// An RTP/RTCP socket pair whose ports satisfy `rtcp_port == rtp_port + 1`.
pub struct UdpPair {
    pub rtp: UdpSocket,
    pub rtcp: UdpSocket,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

struct Idle {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    rtp_port: u16,
    rtcp_port: u16,
}

/// Pool of `(local_addr, port_pair)` entries, single mutex protected; no
/// per-entry work is performed while the mutex is held.
pub struct UdpPortPool {
    inner: Mutex<Inner>,
    port_min: u16,
    port_max: u16,
}

struct Inner {
    idle: Vec<Idle>,
    next_candidate: u32,
}

impl UdpPortPool {
    pub fn new(port_min: u16, port_max: u16) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                idle: Vec::new(),
                next_candidate: port_min as u32,
            }),
            port_min,
            port_max,
        })
    }

    /// Acquire a pair bound to `local_addr`'s IP, reusing an idle pair
    /// when one with matching ports is free, otherwise binding a fresh
    /// even/odd pair from the configured range.
    pub fn acquire(&self, local_ip: IpAddr) -> Result<UdpPair> {
        let mut inner = self.inner.lock();

        if let Some(idle) = inner.idle.pop() {
            return Ok(UdpPair {
                rtp: idle.rtp,
                rtcp: idle.rtcp,
                rtp_port: idle.rtp_port,
                rtcp_port: idle.rtcp_port,
            });
        }

        let span = (self.port_max - self.port_min) as u32 + 1;
        for _ in 0..span {
            let candidate = self.port_min as u32 + (inner.next_candidate - self.port_min as u32) % span;
            inner.next_candidate = candidate + 2;

            if candidate + 1 > self.port_max as u32 {
                continue;
            }
            let rtp_port = candidate as u16;
            let rtcp_port = rtp_port + 1;

            let rtp_addr = SocketAddr::new(local_ip, rtp_port);
            let rtcp_addr = SocketAddr::new(local_ip, rtcp_port);

            let Ok(rtp) = UdpSocket::bind(rtp_addr) else {
                continue;
            };
            let Ok(rtcp) = UdpSocket::bind(rtcp_addr) else {
                continue;
            };
            rtp.set_nonblocking(true)?;
            rtcp.set_nonblocking(true)?;

            tracing::debug!(rtp_port, rtcp_port, "allocated UDP pair");
            return Ok(UdpPair {
                rtp,
                rtcp,
                rtp_port,
                rtcp_port,
            });
        }

        Err(RtspError::PortRangeExhausted)
    }

    /// Return a pair to the pool for reuse by a future session.
    pub fn release(&self, pair: UdpPair) {
        let mut inner = self.inner.lock();
        inner.idle.push(Idle {
            rtp: pair.rtp,
            rtcp: pair.rtcp,
            rtp_port: pair.rtp_port,
            rtcp_port: pair.rtcp_port,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn acquire_gives_even_rtp_port() {
        let pool = UdpPortPool::new(16000, 16100);
        let pair = pool.acquire(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(pair.rtp_port % 2, 0);
        assert_eq!(pair.rtcp_port, pair.rtp_port + 1);
    }

    #[test]
    fn release_then_acquire_reuses_pair() {
        let pool = UdpPortPool::new(16100, 16200);
        let pair = pool.acquire(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        let port = pair.rtp_port;
        pool.release(pair);
        let reused = pool.acquire(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(reused.rtp_port, port);
    }

    #[test]
    fn exhausted_range_errors() {
        let pool = UdpPortPool::new(17000, 17001);
        let first = pool.acquire(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        let second = pool.acquire(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(second.is_err());
        drop(first);
    }
}
