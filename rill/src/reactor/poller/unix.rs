use libc::{
    accept, bind, c_char, c_int, c_uint, close, connect, fcntl, getpeername, getsockname,
    getsockopt, listen, lseek, mode_t, off_t, open, pipe, read, setsockopt, sockaddr, sockaddr_in,
    sockaddr_storage, socket, socklen_t, write, AF_INET, EINPROGRESS, F_GETFL, F_SETFL, O_APPEND,
    O_CREAT, O_NONBLOCK, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, SEEK_CUR, SEEK_END, SEEK_SET,
    SOCK_STREAM, SOL_SOCKET, SO_ERROR, SO_REUSEADDR,
};
use std::io::{self, SeekFrom};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::RawFd;
use std::{mem, ptr};

/// Flags used when opening a file for reading.
pub(crate) const READ_FLAGS: i32 = O_RDONLY | O_NONBLOCK;

/// Flags used when creating a file for writing, truncating an existing one.
pub(crate) const WRITE_FLAGS: i32 = O_WRONLY | O_CREAT | O_TRUNC | O_NONBLOCK;

/// Flags used when opening a file for appending.
pub(crate) const APPEND_FLAGS: i32 = O_WRONLY | O_CREAT | O_APPEND | O_NONBLOCK;

/// Flags used when opening a file for reading and writing.
pub(crate) const READ_WRITE_FLAGS: i32 = O_RDWR | O_CREAT | O_NONBLOCK;

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read, or a negative value on error.
/// The file descriptor **must** be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) }
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes written, or a negative value on error.
/// The file descriptor **must** be non-blocking.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { write(fd, buffer.as_ptr() as *const _, buffer.len()) }
}

/// Closes a file descriptor, discarding any error.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Opens a file using `open(2)`.
pub(crate) fn sys_open(path: *const c_char, flags: i32, mode: mode_t) -> RawFd {
    unsafe { open(path, flags, mode as c_uint) }
}

/// Repositions a file descriptor using `lseek(2)` and returns the new
/// absolute offset.
pub(crate) fn sys_seek(fd: RawFd, position: SeekFrom) -> io::Result<u64> {
    let (offset, whence) = match position {
        SeekFrom::Start(offset) => (offset as off_t, SEEK_SET),
        SeekFrom::Current(delta) => (delta as off_t, SEEK_CUR),
        SeekFrom::End(delta) => (delta as off_t, SEEK_END),
    };

    let at = unsafe { lseek(fd, offset, whence) };
    if at < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(at as u64)
    }
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking IPv4 stream socket.
pub(crate) fn sys_socket() -> io::Result<RawFd> {
    let fd = unsafe { socket(AF_INET, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(fd) {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Binds a socket to an IPv4 address.
pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let sa = to_sockaddr_in(addr);
    let rc = unsafe {
        bind(
            fd,
            &sa as *const _ as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as listening with the given backlog.
pub(crate) fn sys_listen(fd: RawFd, backlog: c_int) -> io::Result<()> {
    let rc = unsafe { listen(fd, backlog) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a new incoming connection.
///
/// The returned client socket is automatically set to non-blocking mode.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if client < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(client) {
        sys_close(client);
        return Err(e);
    }

    Ok((client, from_storage(&storage)?))
}

/// Initiates a non-blocking connection to an IPv4 address.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let sa = to_sockaddr_in(addr);
    let rc = unsafe {
        connect(
            fd,
            &sa as *const _ as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// True when a connect error means the attempt is still in flight.
pub(crate) fn connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        from_storage(&storage)
    }
}

/// Returns the peer address of a connected socket.
///
/// Fails while a connection is still pending, which is how connect
/// completion is probed.
pub(crate) fn sys_peername(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        from_storage(&storage)
    }
}

/// Reads and clears the pending `SO_ERROR` on a socket.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else if err != 0 {
        Err(io::Error::from_raw_os_error(err))
    } else {
        Ok(())
    }
}

/// Creates a pipe with both ends non-blocking.
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [c_int; 2] = [0; 2];

    let rc = unsafe { pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    for fd in fds {
        if let Err(e) = sys_set_nonblocking(fd) {
            sys_close(fds[0]);
            sys_close(fds[1]);
            return Err(e);
        }
    }

    Ok((fds[0], fds[1]))
}

fn to_sockaddr_in(addr: &SocketAddrV4) -> sockaddr_in {
    let mut sa: sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = AF_INET as _;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
    sa
}

fn from_storage(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    if storage.ss_family as c_int != AF_INET {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        ));
    }

    let sa = unsafe { ptr::read(storage as *const _ as *const sockaddr_in) };
    let ip = Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr));
    let port = u16::from_be(sa.sin_port);

    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}
