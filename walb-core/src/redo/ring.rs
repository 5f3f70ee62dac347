//! The async IO submission/completion substrate the redo engine drives
//! writes through. On Linux this is a thin wrapper over `io_uring`:
//! submission-queue push, `submit_and_wait`, then drain completions.
//! Elsewhere it falls back to synchronous `libc::pwrite`, with
//! completions reported immediately.

use std::io;
use std::os::unix::io::RawFd;

/// One finished IO: the `user_data` tag it was submitted with, and its
/// result (bytes written, or a negative `errno` on failure).
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub user_data: u64,
    pub result: i32,
}

#[cfg(target_os = "linux")]
mod linux {
    use super::Completion;
    use io_uring::{opcode, types, IoUring};
    use std::io;
    use std::os::unix::io::RawFd;

    /// An `io_uring` instance plus the count of entries submitted but not
    /// yet reaped, so callers can bound in-flight IO without tracking it
    /// themselves.
    pub struct SubmitRing {
        ring: IoUring,
        in_flight: usize,
    }

    impl SubmitRing {
        pub fn new(queue_depth: u32) -> io::Result<Self> {
            let ring = IoUring::new(queue_depth)?;
            Ok(Self { ring, in_flight: 0 })
        }

        #[must_use]
        pub const fn in_flight(&self) -> usize {
            self.in_flight
        }

        /// Queue a write of `buf` to `fd` at `offset`, tagged with
        /// `user_data`. Does not submit; call [`Self::submit`] to flush the
        /// submission queue.
        ///
        /// # Safety
        /// `buf` must remain valid and unmoved until its completion is
        /// reaped.
        pub unsafe fn push_write(&mut self, fd: RawFd, buf: &[u8], offset: u64, user_data: u64) -> io::Result<()> {
            let entry = opcode::Write::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
                .offset(offset)
                .build()
                .user_data(user_data);
            // SAFETY: caller guarantees `buf` outlives this entry's completion.
            unsafe {
                self.ring.submission().push(&entry).map_err(|_| io::Error::from(io::ErrorKind::WouldBlock))?;
            }
            self.in_flight += 1;
            Ok(())
        }

        /// Queue an `fdatasync` of `fd`, tagged with `user_data`.
        pub fn push_fdatasync(&mut self, fd: RawFd, user_data: u64) -> io::Result<()> {
            let entry = opcode::Fsync::new(types::Fd(fd))
                .flags(types::FsyncFlags::DATASYNC)
                .build()
                .user_data(user_data);
            // SAFETY: fsync entries carry no buffer pointer.
            unsafe {
                self.ring.submission().push(&entry).map_err(|_| io::Error::from(io::ErrorKind::WouldBlock))?;
            }
            self.in_flight += 1;
            Ok(())
        }

        /// Submit everything queued so far and block until at least
        /// `min_complete` entries finish.
        pub fn submit_and_wait(&mut self, min_complete: usize) -> io::Result<()> {
            self.ring.submit_and_wait(min_complete)?;
            Ok(())
        }

        /// Drain the completion queue without blocking.
        pub fn reap(&mut self) -> Vec<Completion> {
            let mut out = Vec::new();
            let mut cq = self.ring.completion();
            cq.sync();
            for cqe in &mut cq {
                out.push(Completion {
                    user_data: cqe.user_data(),
                    result: cqe.result(),
                });
            }
            self.in_flight -= out.len();
            out
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod fallback {
    use super::Completion;
    use std::io;
    use std::os::unix::io::RawFd;

    /// A synchronous stand-in for [`linux::SubmitRing`]: every push
    /// performs the IO immediately via `libc` and queues its result for
    /// the next `reap`, so callers see the same submit/reap protocol on
    /// every platform.
    pub struct SubmitRing {
        ready: Vec<Completion>,
    }

    impl SubmitRing {
        pub fn new(_queue_depth: u32) -> io::Result<Self> {
            Ok(Self { ready: Vec::new() })
        }

        #[must_use]
        pub const fn in_flight(&self) -> usize {
            0
        }

        /// # Safety
        /// No different from a synchronous `pwrite`; kept `unsafe` to match
        /// the Linux backend's signature.
        pub unsafe fn push_write(&mut self, fd: RawFd, buf: &[u8], offset: u64, user_data: u64) -> io::Result<()> {
            // SAFETY: `fd` is a valid, open file descriptor for the
            // lifetime of this call; `buf` is valid for `buf.len()` bytes.
            let n = unsafe { libc::pwrite(fd, buf.as_ptr().cast(), buf.len(), offset as libc::off_t) };
            let result = if n < 0 { -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO) } else { n as i32 };
            self.ready.push(Completion { user_data, result });
            Ok(())
        }

        pub fn push_fdatasync(&mut self, fd: RawFd, user_data: u64) -> io::Result<()> {
            // SAFETY: `fd` is a valid, open file descriptor.
            let rc = unsafe { libc::fdatasync(fd) };
            let result = if rc < 0 { -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO) } else { 0 };
            self.ready.push(Completion { user_data, result });
            Ok(())
        }

        pub fn submit_and_wait(&mut self, _min_complete: usize) -> io::Result<()> {
            Ok(())
        }

        pub fn reap(&mut self) -> Vec<Completion> {
            std::mem::take(&mut self.ready)
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::SubmitRing;
#[cfg(not(target_os = "linux"))]
pub use fallback::SubmitRing;

/// Re-exported so callers depending only on `redo::ring` don't need a
/// separate `std::os::unix::io` import just for the `RawFd` alias used in
/// [`SubmitRing`]'s methods.
pub type Fd = RawFd;

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn write_and_reap_round_trip() {
        let mut file = tempfile::tempfile().unwrap();
        file.set_len(4096).unwrap();
        let fd = file.as_raw_fd();

        let mut ring = SubmitRing::new(8).unwrap();
        let buf = vec![0xAAu8; 512];
        // SAFETY: `buf` is not moved or dropped before `submit_and_wait` returns.
        unsafe { ring.push_write(fd, &buf, 0, 42).unwrap() };
        ring.submit_and_wait(1).unwrap();
        let completions = ring.reap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].user_data, 42);
        assert_eq!(completions[0].result, 512);

        let mut readback = vec![0u8; 512];
        file.seek(SeekFrom::Start(0)).unwrap();
        std::io::Read::read_exact(&mut file, &mut readback).unwrap();
        assert_eq!(readback, buf);
    }
}
