// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The socket reader: binds a kernel datagram socket and reads one datagram
//! at a time into a [`PacketBuf`], recovering the destination address from
//! PKTINFO ancillary data when the kernel doesn't place it in the message
//! name (mandatory for UDP-encap and IPv6).

use crate::config::EncapMode;
use crate::packet::PacketBuf;
use socket2::{Domain, Protocol, Socket as Socket2, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Outcome of one `recv_one` call.
pub enum RecvOutcome {
    /// `n` bytes landed in the buffer with both addresses populated.
    Data(usize),
    /// Non-blocking socket had nothing to read.
    WouldBlock,
    /// Orderly shutdown (zero-length read).
    Closed,
    /// PKTINFO was mandatory for this read (UDP-encap or IPv6) but the
    /// kernel did not supply it; this is a parse-stage discard, not an
    /// error returned to the caller.
    MissingDestination,
}

/// The bound socket plus the framing mode it was constructed for.
pub struct Socket {
    udp: UdpSocket,
    encap_mode: EncapMode,
    is_ipv6: bool,
}

impl Socket {
    /// Bind a non-blocking UDP socket at `addr` for `encap_mode`, enabling
    /// PKTINFO reception where the platform supports it.
    pub fn bind(addr: SocketAddr, encap_mode: EncapMode) -> io::Result<Self> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let sock2 = Socket2::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        sock2.set_reuse_address(true)?;
        sock2.bind(&addr.into())?;
        sock2.set_nonblocking(true)?;

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            if addr.is_ipv6() {
                pktinfo::enable_pktinfo_v6(sock2.as_raw_fd())?;
            } else {
                pktinfo::enable_pktinfo_v4(sock2.as_raw_fd())?;
            }
        }

        let udp: UdpSocket = sock2.into();
        log::info!("[PGM-RX] socket bound addr={addr} encap={encap_mode:?}");
        Ok(Self {
            udp,
            encap_mode,
            is_ipv6: addr.is_ipv6(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// PKTINFO is mandatory when UDP-encapsulated or when the socket family
    /// is IPv6.
    pub fn requires_pktinfo(&self) -> bool {
        self.encap_mode.is_udp_encap() || self.is_ipv6
    }

    /// Read a single datagram into `buf`, recovering `dst_addr` from
    /// PKTINFO when required.
    #[cfg(target_os = "linux")]
    pub fn recv_one(&self, buf: &mut PacketBuf) -> io::Result<RecvOutcome> {
        let fd = self.udp.as_raw_fd();
        match pktinfo::recvmsg_with_pktinfo(fd, &mut buf.storage) {
            Ok(pktinfo::RawRecv::WouldBlock) => Ok(RecvOutcome::WouldBlock),
            Ok(pktinfo::RawRecv::Closed) => Ok(RecvOutcome::Closed),
            Ok(pktinfo::RawRecv::Data { len, src, dst }) => {
                buf.len = len;
                buf.data_offset = 0;
                buf.src_addr = src;
                match dst {
                    Some(d) => buf.dst_addr = d,
                    None if self.requires_pktinfo() => return Ok(RecvOutcome::MissingDestination),
                    None => buf.dst_addr = self.local_addr()?,
                }
                Ok(RecvOutcome::Data(len))
            }
            Err(e) => Err(e),
        }
    }

    /// Non-Linux fallback: no ancillary-data support, so destination
    /// recovery is only ever the socket's own bound address. This satisfies
    /// raw-IPv4 framing; callers requiring UDP-encap/IPv6 PKTINFO recovery
    /// on other platforms should extend this module with their OS's
    /// equivalent (`IP_RECVDSTADDR`/`WSARecvMsg`).
    #[cfg(not(target_os = "linux"))]
    pub fn recv_one(&self, buf: &mut PacketBuf) -> io::Result<RecvOutcome> {
        if self.requires_pktinfo() {
            return Ok(RecvOutcome::MissingDestination);
        }
        match self.udp.recv_from(&mut buf.storage) {
            Ok((0, _src)) => Ok(RecvOutcome::Closed),
            Ok((n, src)) => {
                buf.len = n;
                buf.data_offset = 0;
                buf.src_addr = src;
                buf.dst_addr = self.local_addr()?;
                Ok(RecvOutcome::Data(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.udp.as_raw_fd()
    }
}

#[cfg(target_os = "linux")]
mod pktinfo {
    use std::io;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
    use std::os::unix::io::RawFd;

    #[repr(C, align(8))]
    struct AlignedCmsgBuf {
        data: [u8; 128],
    }

    pub enum RawRecv {
        Data { len: usize, src: SocketAddr, dst: Option<SocketAddr> },
        WouldBlock,
        Closed,
    }

    /// `recvmsg(2)` with ancillary-data space for `IP_PKTINFO`/`IPV6_PKTINFO`,
    /// adapted from the packet-info control-message handling used elsewhere
    /// in this codebase for the send side; here it is read, not built.
    pub fn recvmsg_with_pktinfo(fd: RawFd, buf: &mut [u8]) -> io::Result<RawRecv> {
        let mut cmsg_buf = AlignedCmsgBuf { data: [0u8; 128] };
        let mut src_storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };

        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = (&mut src_storage as *mut libc::sockaddr_storage).cast();
        msg.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as u32;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.data.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_buf.data.len();

        // SAFETY: fd is a live, bound datagram socket; msg_name/msg_iov/
        // msg_control all point at stack buffers outliving this call.
        let ret = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(RawRecv::WouldBlock);
            }
            return Err(err);
        }
        if ret == 0 {
            return Ok(RawRecv::Closed);
        }

        let src = sockaddr_storage_to_socket_addr(&src_storage)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unrecognised source address family"))?;

        let mut dst_ip: Option<IpAddr> = None;
        // SAFETY: msg was populated by the kernel above; CMSG_FIRSTHDR/NXTHDR
        // follow the standard ancillary-data iteration contract.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                let hdr = &*cmsg;
                if hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == libc::IP_PKTINFO {
                    let data = libc::CMSG_DATA(cmsg);
                    let info: libc::in_pktinfo = std::ptr::read_unaligned(data.cast());
                    dst_ip = Some(IpAddr::V4(Ipv4Addr::from(u32::from_ne_bytes(
                        info.ipi_addr.s_addr.to_ne_bytes(),
                    ))));
                } else if hdr.cmsg_level == libc::IPPROTO_IPV6 && hdr.cmsg_type == libc::IPV6_PKTINFO {
                    let data = libc::CMSG_DATA(cmsg);
                    let info: libc::in6_pktinfo = std::ptr::read_unaligned(data.cast());
                    dst_ip = Some(IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)));
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        Ok(RawRecv::Data {
            len: ret as usize,
            src,
            dst: dst_ip.map(|ip| SocketAddr::new(ip, 0)),
        })
    }

    fn sockaddr_storage_to_socket_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
        match storage.ss_family as i32 {
            libc::AF_INET => {
                // SAFETY: family tag verified above; storage is large enough
                // to hold sockaddr_in.
                let sin: libc::sockaddr_in =
                    unsafe { std::ptr::read_unaligned((storage as *const _ as *const libc::sockaddr_in)) };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                Some(SocketAddr::new(IpAddr::V4(ip), u16::from_be(sin.sin_port)))
            }
            libc::AF_INET6 => {
                // SAFETY: family tag verified above; storage is large enough
                // to hold sockaddr_in6.
                let sin6: libc::sockaddr_in6 =
                    unsafe { std::ptr::read_unaligned((storage as *const _ as *const libc::sockaddr_in6)) };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Some(SocketAddr::new(IpAddr::V6(ip), u16::from_be(sin6.sin6_port)))
            }
            _ => None,
        }
    }

    pub fn enable_pktinfo_v4(fd: RawFd) -> io::Result<()> {
        let val: libc::c_int = 1;
        // SAFETY: fd is a valid, just-constructed socket; val is a properly
        // initialised c_int on the stack; IP_PKTINFO takes a c_int.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_PKTINFO,
                (&val as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn enable_pktinfo_v6(fd: RawFd) -> io::Result<()> {
        let val: libc::c_int = 1;
        // SAFETY: fd is a valid, just-constructed socket; val is a properly
        // initialised c_int on the stack; IPV6_RECVPKTINFO takes a c_int.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_RECVPKTINFO,
                (&val as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
