use std::os::fd::RawFd;
use std::time::Duration;
use std::{cmp, fmt, io, mem, ptr};

use crate::Interest;

/// Level-triggered select(2) backend.
///
/// Maintains read, write and except descriptor sets across iterations;
/// each wait snapshots the sets because `select` mutates them in place.
/// The native API caps descriptors at `FD_SETSIZE`, so registrations
/// beyond that are rejected.
pub(crate) struct Selector {
    read_set: libc::fd_set,
    write_set: libc::fd_set,
    except_set: libc::fd_set,
    max_fd: RawFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        Ok(Selector {
            read_set: empty_set(),
            write_set: empty_set(),
            except_set: empty_set(),
            max_fd: -1,
        })
    }

    pub(crate) fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        // `select` writes the ready subsets back into its arguments, so
        // operate on copies and keep the registered sets intact.
        let mut read_ready = self.read_set;
        let mut write_ready = self.write_set;
        let mut except_ready = self.except_set;

        let mut timeval = timeout.map(|to| libc::timeval {
            tv_sec: cmp::min(to.as_secs(), libc::time_t::MAX as u64) as libc::time_t,
            tv_usec: to.subsec_micros() as libc::suseconds_t,
        });
        let timeout = timeval
            .as_mut()
            .map(|tv| tv as *mut _)
            .unwrap_or(ptr::null_mut());

        syscall!(select(
            self.max_fd + 1,
            &mut read_ready,
            &mut write_ready,
            &mut except_ready,
            timeout,
        ))?;

        for fd in 0..=self.max_fd {
            // SAFETY: `fd` is within the bounds register enforces.
            let (readable, writable) = unsafe {
                (
                    libc::FD_ISSET(fd, &read_ready),
                    libc::FD_ISSET(fd, &write_ready) || libc::FD_ISSET(fd, &except_ready),
                )
            };
            if readable || writable {
                events.push(Event {
                    fd,
                    readable,
                    writable,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn register(&mut self, fd: RawFd, interests: Interest) -> io::Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "fd outside select(2) capacity",
            ));
        }
        self.arm(fd, interests);
        if fd > self.max_fd {
            self.max_fd = fd;
        }
        Ok(())
    }

    pub(crate) fn reregister(&mut self, fd: RawFd, interests: Interest) -> io::Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "fd outside select(2) capacity",
            ));
        }
        self.clear(fd);
        self.arm(fd, interests);
        if fd > self.max_fd {
            self.max_fd = fd;
        }
        Ok(())
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "fd outside select(2) capacity",
            ));
        }
        self.clear(fd);
        while self.max_fd >= 0 && !self.registered(self.max_fd) {
            self.max_fd -= 1;
        }
        Ok(())
    }

    // Exceptional conditions are folded into write readiness, so
    // writable interest arms both the write and except sets.
    fn arm(&mut self, fd: RawFd, interests: Interest) {
        unsafe {
            if interests.is_readable() {
                libc::FD_SET(fd, &mut self.read_set);
            }
            if interests.is_writable() {
                libc::FD_SET(fd, &mut self.write_set);
                libc::FD_SET(fd, &mut self.except_set);
            }
        }
    }

    fn clear(&mut self, fd: RawFd) {
        unsafe {
            libc::FD_CLR(fd, &mut self.read_set);
            libc::FD_CLR(fd, &mut self.write_set);
            libc::FD_CLR(fd, &mut self.except_set);
        }
    }

    fn registered(&self, fd: RawFd) -> bool {
        unsafe {
            libc::FD_ISSET(fd, &self.read_set)
                || libc::FD_ISSET(fd, &self.write_set)
                || libc::FD_ISSET(fd, &self.except_set)
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Selector")
            .field("max_fd", &self.max_fd)
            .finish()
    }
}

fn empty_set() -> libc::fd_set {
    let mut set = mem::MaybeUninit::<libc::fd_set>::uninit();
    // SAFETY: `FD_ZERO` initialises the whole set.
    unsafe {
        libc::FD_ZERO(set.as_mut_ptr());
        set.assume_init()
    }
}

#[derive(Debug)]
pub(crate) struct Event {
    fd: RawFd,
    readable: bool,
    writable: bool,
}

pub(crate) type Events = Vec<Event>;

pub(crate) mod event {
    use std::os::fd::RawFd;

    use super::Event;

    pub(crate) fn fd(event: &Event) -> RawFd {
        event.fd
    }

    pub(crate) fn is_readable(event: &Event) -> bool {
        event.readable
    }

    pub(crate) fn is_writable(event: &Event) -> bool {
        event.writable
    }
}
