use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

mod selector;
pub(crate) use self::selector::{event, Event, Events, Selector};

/// Creates a connected, bidirectional pair of local stream sockets with
/// both ends set non-blocking.
pub(crate) fn socket_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1, -1];
    syscall!(socketpair(
        libc::AF_UNIX,
        libc::SOCK_STREAM,
        0,
        fds.as_mut_ptr(),
    ))?;
    // SAFETY: `socketpair(2)` returned two valid descriptors we own; on
    // any error below the pair is dropped and both ends close.
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_nonblocking(fds[0])?;
    set_nonblocking(fds[1])?;
    Ok(pair)
}

/// Sets `O_NONBLOCK`, preserving the descriptor's other flags.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)).map(|_| ())
}
