//! Pollable descriptors: eventfd, timerfd and poll(2)
//!
//! Thin owned wrappers around the Linux primitives the worker multiplexes.
//! All descriptors are non-blocking and close-on-exec.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

const EVENTFD_FLAGS: libc::c_int = libc::EFD_NONBLOCK | libc::EFD_CLOEXEC;
const TIMERFD_FLAGS: libc::c_int = libc::TFD_NONBLOCK | libc::TFD_CLOEXEC;

/// Counter-style event notification descriptor
///
/// Readable while the counter is non-zero. `signal` adds to the counter,
/// `drain` resets it.
#[derive(Debug)]
pub struct EventFd {
    fd: RawFd,
}

impl EventFd {
    pub fn new() -> io::Result<Self> {
        // SAFETY: eventfd is invoked with valid flags and no shared state.
        let fd = unsafe { libc::eventfd(0, EVENTFD_FLAGS) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Add `count` to the counter, making the descriptor readable
    pub fn signal(&self, count: u64) {
        let payload = count.max(1).to_ne_bytes();
        loop {
            // SAFETY: payload references a stack buffer with the 8-byte eventfd payload.
            let ret = unsafe { libc::write(self.fd, payload.as_ptr().cast(), payload.len()) };
            if ret >= 0 {
                break;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                // Counter saturated: already readable
                io::ErrorKind::WouldBlock => break,
                _ => {
                    tracing::debug!("eventfd write failed: {}", err);
                    break;
                }
            }
        }
    }

    /// Reset the counter, returning its previous value (0 if not readable)
    pub fn drain(&self) -> u64 {
        let mut payload = [0u8; 8];
        loop {
            // SAFETY: payload is a stack buffer sized to the eventfd read requirements (8 bytes).
            let ret = unsafe { libc::read(self.fd, payload.as_mut_ptr().cast(), payload.len()) };
            if ret >= 0 {
                return u64::from_ne_bytes(payload);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return 0,
                _ => {
                    tracing::debug!("eventfd read failed: {}", err);
                    return 0;
                }
            }
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        // SAFETY: fd was obtained via libc::eventfd and is closed once here.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Periodic monotonic timer descriptor
#[derive(Debug)]
pub struct TimerFd {
    fd: RawFd,
    interval: Duration,
}

impl TimerFd {
    /// Create an armed timer firing every `interval`
    pub fn periodic(interval: Duration) -> io::Result<Self> {
        if interval.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "timer interval must be > 0",
            ));
        }

        // SAFETY: timerfd_create takes a clock id and flags only.
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, TIMERFD_FLAGS) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let timer = Self { fd, interval };

        let spec = libc::itimerspec {
            it_interval: to_timespec(interval),
            it_value: to_timespec(interval),
        };
        // SAFETY: spec is a valid itimerspec; the old value pointer may be null.
        let ret = unsafe { libc::timerfd_settime(timer.fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(timer)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of expirations since the last call, 0 if none
    pub fn expirations(&self) -> io::Result<u64> {
        let mut payload = [0u8; 8];
        loop {
            // SAFETY: payload is a stack buffer sized for the 8-byte expiration counter.
            let ret = unsafe { libc::read(self.fd, payload.as_mut_ptr().cast(), payload.len()) };
            if ret >= 0 {
                return Ok(u64::from_ne_bytes(payload));
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(0),
                _ => return Err(err),
            }
        }
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TimerFd {
    fn drop(&mut self) {
        // SAFETY: fd was obtained via libc::timerfd_create and is closed once here.
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

/// Build a read-interest poll entry
pub fn poll_entry(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// `true` if poll(2) flagged the entry readable
#[inline]
pub fn is_readable(pfd: &libc::pollfd) -> bool {
    pfd.revents & libc::POLLIN != 0
}

/// `true` if poll(2) flagged the entry as broken
#[inline]
pub fn is_broken(pfd: &libc::pollfd) -> bool {
    pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0
}

/// Block in poll(2) until at least one entry is ready
///
/// `None` waits forever. Returns the number of ready entries (0 on timeout).
pub fn poll(pfds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms = timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as libc::c_int)
        .unwrap_or(-1);

    loop {
        // SAFETY: pfds is a valid, exclusively borrowed slice of pollfd structures.
        let res = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms) };
        if res >= 0 {
            return Ok(res as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Wait until a single descriptor becomes readable
pub fn wait_readable(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
    let mut pfd = [poll_entry(fd)];
    Ok(poll(&mut pfd, timeout)? > 0 && is_readable(&pfd[0]))
}
