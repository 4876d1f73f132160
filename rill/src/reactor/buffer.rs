use std::collections::VecDeque;
use std::io::{self, SeekFrom};
use std::os::fd::RawFd;

use super::poller::platform::{sys_seek, sys_write};

/// A pending write destined for a specific file offset.
pub(crate) struct Chunk {
    offset: u64,
    data: Vec<u8>,
    written: usize,
}

/// Buffered output for one endpoint.
///
/// Writes from handler code land here and are drained by the reactor when
/// the endpoint reports writable. The stream variant is a contiguous byte
/// queue; the seekable variant keeps each write tagged with the offset it
/// was issued at, so writes interleaved with seeks still land where they
/// were aimed.
///
/// A flush stops without error on would-block, leaving the remainder for
/// the next writability event. Appends never drop bytes.
pub(crate) enum OutputBuffer {
    Stream(Vec<u8>),
    Seekable(VecDeque<Chunk>),
}

impl OutputBuffer {
    pub(crate) fn stream() -> Self {
        OutputBuffer::Stream(Vec::new())
    }

    pub(crate) fn seekable() -> Self {
        OutputBuffer::Seekable(VecDeque::new())
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            OutputBuffer::Stream(bytes) => bytes.is_empty(),
            OutputBuffer::Seekable(chunks) => chunks.is_empty(),
        }
    }

    /// Queues bytes at the back of a stream buffer.
    pub(crate) fn append(&mut self, bytes: &[u8]) {
        match self {
            OutputBuffer::Stream(queue) => queue.extend_from_slice(bytes),
            OutputBuffer::Seekable(_) => {
                debug_assert!(false, "offset-less append on a seekable buffer")
            }
        }
    }

    /// Queues bytes aimed at a specific offset of a seekable buffer.
    pub(crate) fn append_at(&mut self, offset: u64, bytes: &[u8]) {
        match self {
            OutputBuffer::Seekable(chunks) => chunks.push_back(Chunk {
                offset,
                data: bytes.to_vec(),
                written: 0,
            }),
            OutputBuffer::Stream(_) => debug_assert!(false, "offset append on a stream buffer"),
        }
    }

    /// Drains as much buffered output as the descriptor accepts.
    ///
    /// Returns `Ok` both when the buffer empties and when the descriptor
    /// reports would-block; the caller retries on the next writability
    /// event. Hard errors abandon the remaining bytes to the caller's
    /// error path.
    pub(crate) fn flush(&mut self, fd: RawFd) -> io::Result<()> {
        match self {
            OutputBuffer::Stream(queue) => flush_stream(fd, queue),
            OutputBuffer::Seekable(chunks) => flush_seekable(fd, chunks),
        }
    }
}

fn flush_stream(fd: RawFd, queue: &mut Vec<u8>) -> io::Result<()> {
    while !queue.is_empty() {
        let n = sys_write(fd, queue);

        if n > 0 {
            queue.drain(..n as usize);
            continue;
        }

        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(()),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }

    Ok(())
}

fn flush_seekable(fd: RawFd, chunks: &mut VecDeque<Chunk>) -> io::Result<()> {
    while let Some(chunk) = chunks.front_mut() {
        sys_seek(fd, SeekFrom::Start(chunk.offset + chunk.written as u64))?;

        while chunk.written < chunk.data.len() {
            let n = sys_write(fd, &chunk.data[chunk.written..]);

            if n > 0 {
                chunk.written += n as usize;
                continue;
            }

            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(()),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }

        chunks.pop_front();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::platform::sys_close;
    use std::fs;
    use std::os::fd::IntoRawFd;
    use std::path::PathBuf;

    fn scratch_file(name: &str) -> (PathBuf, RawFd) {
        let path = std::env::temp_dir().join(format!("rill-buffer-{}-{}", std::process::id(), name));
        let fd = fs::File::create(&path)
            .expect("failed to create scratch file")
            .into_raw_fd();
        (path, fd)
    }

    #[test]
    fn stream_flush_drains_everything() {
        let (path, fd) = scratch_file("stream");
        let mut buffer = OutputBuffer::stream();

        buffer.append(b"hello ");
        buffer.append(b"world");
        assert!(!buffer.is_empty());

        buffer.flush(fd).expect("flush failed");
        sys_close(fd);

        assert!(buffer.is_empty());
        assert_eq!(fs::read(&path).expect("read back failed"), b"hello world");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn seekable_flush_honors_chunk_offsets() {
        let (path, fd) = scratch_file("seekable");
        let mut buffer = OutputBuffer::seekable();

        buffer.append_at(0, b"AAA");
        buffer.append_at(0, b"B");

        buffer.flush(fd).expect("flush failed");
        sys_close(fd);

        assert!(buffer.is_empty());
        assert_eq!(fs::read(&path).expect("read back failed"), b"BAA");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn flush_of_empty_buffer_is_a_no_op() {
        let mut buffer = OutputBuffer::stream();
        buffer.flush(-1).expect("empty flush must not touch the fd");

        let mut buffer = OutputBuffer::seekable();
        buffer.flush(-1).expect("empty flush must not touch the fd");
    }
}
