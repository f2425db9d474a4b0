// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The pending-notify channel: a signalable one-bit queue whose `send`/
//! `clear` are safe to call concurrently with the wait, modelled as a
//! bounded capacity-1 queue.
//!
//! Built directly on a kernel wakeable descriptor rather than an in-process
//! condvar, so the same descriptor can be registered with an external
//! poller alongside the data socket. Correctness of the single-bit latch on
//! top of this channel (`is_pending_read`) is the caller's responsibility —
//! see `endpoint.rs` — this type only provides the raw send/clear/fd
//! primitives.

#[cfg(unix)]
pub use unix::NotifyChannel;
#[cfg(windows)]
pub use windows::NotifyChannel;

#[cfg(unix)]
mod unix {
    use std::io;
    use std::os::unix::io::RawFd;

    /// `eventfd`-backed notify channel. `send` increments the kernel
    /// counter by one; `clear` drains it back to zero. Safe to call `send`
    /// from any thread concurrently with a `poll`/`epoll` wait on `raw_fd`
    /// elsewhere, which is what lets the ingest loop release its lock around
    /// the blocking call without missing a wakeup.
    #[derive(Debug)]
    pub struct NotifyChannel {
        fd: RawFd,
    }

    impl NotifyChannel {
        pub fn new() -> io::Result<Self> {
            // SAFETY: eventfd(2) with an initial count of 0; EFD_NONBLOCK so
            // `clear` never blocks when nothing is pending, EFD_CLOEXEC so the
            // descriptor is not leaked across exec.
            let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { fd })
        }

        /// Write one token. Idempotent at the OS level (the counter just
        /// accumulates) but the ingest loop's `is_pending_read` latch
        /// ensures this is only called when the latch transitions false->true.
        pub fn send(&self) -> io::Result<()> {
            let one: u64 = 1;
            // SAFETY: fd is a live eventfd owned by this struct; buffer is
            // exactly 8 bytes as eventfd requires.
            let ret = unsafe {
                libc::write(self.fd, (&one as *const u64).cast(), std::mem::size_of::<u64>())
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }

        /// Drain the counter back to zero. Returns `Ok(true)` if a token was
        /// present, `Ok(false)` if the channel was already empty.
        pub fn clear(&self) -> io::Result<bool> {
            let mut buf: u64 = 0;
            // SAFETY: fd is a live eventfd owned by this struct; buffer is
            // exactly 8 bytes as eventfd requires.
            let ret = unsafe {
                libc::read(self.fd, (&mut buf as *mut u64).cast(), std::mem::size_of::<u64>())
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(false);
                }
                return Err(err);
            }
            Ok(true)
        }

        /// The descriptor external pollers register alongside the data
        /// socket.
        pub fn raw_fd(&self) -> RawFd {
            self.fd
        }
    }

    impl Drop for NotifyChannel {
        fn drop(&mut self) {
            // SAFETY: fd is owned exclusively by this struct and not reused
            // after this point.
            unsafe {
                libc::close(self.fd);
            }
        }
    }

    // eventfd is safe to share across threads: concurrent read/write are
    // kernel-synchronised.
    unsafe impl Send for NotifyChannel {}
    unsafe impl Sync for NotifyChannel {}

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn send_then_clear_round_trips() {
            let ch = NotifyChannel::new().unwrap();
            assert_eq!(ch.clear().unwrap(), false);
            ch.send().unwrap();
            assert_eq!(ch.clear().unwrap(), true);
            assert_eq!(ch.clear().unwrap(), false);
        }

        #[test]
        fn multiple_sends_still_clear_in_one_shot() {
            let ch = NotifyChannel::new().unwrap();
            ch.send().unwrap();
            ch.send().unwrap();
            assert_eq!(ch.clear().unwrap(), true);
            assert_eq!(ch.clear().unwrap(), false);
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use std::ptr;

    type Handle = *mut std::ffi::c_void;

    extern "system" {
        fn CreateEventW(attrs: *mut std::ffi::c_void, manual_reset: i32, initial_state: i32, name: *const u16) -> Handle;
        fn SetEvent(handle: Handle) -> i32;
        fn ResetEvent(handle: Handle) -> i32;
        fn WaitForSingleObject(handle: Handle, millis: u32) -> u32;
        fn CloseHandle(handle: Handle) -> i32;
    }

    const WAIT_OBJECT_0: u32 = 0;

    /// Manual-reset Win32 event backing the notify channel, mirroring the
    /// semantics of the Unix `eventfd` variant: `send` sets the event,
    /// `clear` resets it and reports whether it had been set.
    #[derive(Debug)]
    pub struct NotifyChannel {
        handle: Handle,
    }

    impl NotifyChannel {
        pub fn new() -> io::Result<Self> {
            let handle = unsafe { CreateEventW(ptr::null_mut(), 1, 0, ptr::null()) };
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { handle })
        }

        pub fn send(&self) -> io::Result<()> {
            if unsafe { SetEvent(self.handle) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn clear(&self) -> io::Result<bool> {
            let was_set = unsafe { WaitForSingleObject(self.handle, 0) } == WAIT_OBJECT_0;
            if unsafe { ResetEvent(self.handle) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(was_set)
        }
    }

    impl Drop for NotifyChannel {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }

    unsafe impl Send for NotifyChannel {}
    unsafe impl Sync for NotifyChannel {}
}
