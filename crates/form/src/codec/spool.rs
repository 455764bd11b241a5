//! Memory-or-disk storage for multipart part bodies.
//!
//! A [`Spool`] buffers incoming body bytes in memory until they would grow past
//! the configured threshold, then moves everything written so far into an
//! anonymous temporary file and keeps appending there. Once the part is complete
//! the spool is turned into a [`SpooledBody`], a seekable reader over the stored
//! bytes.
//!
//! The temporary file has no name on disk: it is released when the owning
//! [`SpooledBody`] (or the unfinished [`Spool`]) is dropped, exactly once, no
//! matter whether parsing succeeded.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Write side of a part body.
#[derive(Debug)]
pub struct Spool {
    threshold: usize,
    dir: Option<PathBuf>,
    len: u64,
    state: SpoolState,
}

#[derive(Debug)]
enum SpoolState {
    Memory(BytesMut),
    Disk(BufWriter<File>),
}

impl Spool {
    /// Creates a spool that stays in memory for up to `threshold` bytes.
    ///
    /// Temporary files are created in `dir`, or the system temp dir when `None`.
    pub fn new(threshold: usize, dir: Option<&Path>) -> Self {
        Self { threshold, dir: dir.map(Path::to_path_buf), len: 0, state: SpoolState::Memory(BytesMut::new()) }
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if let SpoolState::Memory(buf) = &mut self.state {
            if buf.len() + data.len() <= self.threshold {
                buf.extend_from_slice(data);
                self.len += data.len() as u64;
                return Ok(());
            }

            let file = match &self.dir {
                Some(dir) => tempfile::tempfile_in(dir)?,
                None => tempfile::tempfile()?,
            };
            let mut writer = BufWriter::new(file);
            writer.write_all(buf)?;
            debug!(buffered = buf.len(), threshold = self.threshold, "part body rolled over to temporary file");
            self.state = SpoolState::Disk(writer);
        }

        if let SpoolState::Disk(writer) = &mut self.state {
            writer.write_all(data)?;
        }
        self.len += data.len() as u64;
        Ok(())
    }

    /// Total bytes written so far.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true once the body has moved to a temporary file.
    #[inline]
    pub fn is_spooled(&self) -> bool {
        matches!(self.state, SpoolState::Disk(_))
    }

    /// Flushes pending writes and rewinds, producing the read side.
    pub fn finish(self) -> io::Result<SpooledBody> {
        let inner = match self.state {
            SpoolState::Memory(buf) => BodyKind::Memory(Cursor::new(buf.freeze())),
            SpoolState::Disk(writer) => {
                let mut file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
                file.seek(SeekFrom::Start(0))?;
                BodyKind::Disk(BufReader::new(file))
            }
        };
        Ok(SpooledBody { inner, len: self.len })
    }
}

/// Read side of a part body, positioned at the start after [`Spool::finish`].
#[derive(Debug)]
pub struct SpooledBody {
    inner: BodyKind,
    len: u64,
}

#[derive(Debug)]
enum BodyKind {
    Memory(Cursor<Bytes>),
    Disk(BufReader<File>),
}

impl SpooledBody {
    pub fn from_bytes(bytes: Bytes) -> Self {
        let len = bytes.len() as u64;
        Self { inner: BodyKind::Memory(Cursor::new(bytes)), len }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_spooled(&self) -> bool {
        matches!(self.inner, BodyKind::Disk(_))
    }

    /// Reads the whole body from the start and restores the current position.
    pub fn contents(&mut self) -> io::Result<Bytes> {
        if let BodyKind::Memory(cursor) = &self.inner {
            return Ok(cursor.get_ref().clone());
        }

        let position = self.stream_position()?;
        self.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        let read_result = self.read_to_end(&mut buf);
        self.seek(SeekFrom::Start(position))?;
        read_result?;
        Ok(Bytes::from(buf))
    }

    /// Consumes the body and returns all of its bytes.
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        self.contents()
    }
}

impl Read for SpooledBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            BodyKind::Memory(cursor) => cursor.read(buf),
            BodyKind::Disk(reader) => reader.read(buf),
        }
    }
}

impl BufRead for SpooledBody {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match &mut self.inner {
            BodyKind::Memory(cursor) => cursor.fill_buf(),
            BodyKind::Disk(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match &mut self.inner {
            BodyKind::Memory(cursor) => cursor.consume(amt),
            BodyKind::Disk(reader) => reader.consume(amt),
        }
    }
}

impl Seek for SpooledBody {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            BodyKind::Memory(cursor) => cursor.seek(pos),
            BodyKind::Disk(reader) => reader.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_stays_in_memory() {
        let mut spool = Spool::new(16, None);
        spool.write(b"hello").unwrap();
        spool.write(b" world").unwrap();
        assert!(!spool.is_spooled());
        assert_eq!(spool.len(), 11);

        let body = spool.finish().unwrap();
        assert!(!body.is_spooled());
        assert_eq!(&body.into_bytes().unwrap()[..], b"hello world");
    }

    #[test]
    fn large_body_rolls_over_to_disk() {
        let mut spool = Spool::new(8, None);
        spool.write(b"12345").unwrap();
        assert!(!spool.is_spooled());
        spool.write(b"67890").unwrap();
        assert!(spool.is_spooled());
        spool.write(b"abc").unwrap();

        let mut body = spool.finish().unwrap();
        assert!(body.is_spooled());
        assert_eq!(body.len(), 13);

        let mut first = [0u8; 3];
        body.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"123");

        // contents keeps the read position
        assert_eq!(&body.contents().unwrap()[..], b"1234567890abc");
        assert_eq!(body.stream_position().unwrap(), 3);

        let mut rest = String::new();
        body.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "4567890abc");
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut spool = Spool::new(4, None);
        spool.write(b"abcd").unwrap();
        assert!(!spool.is_spooled());
        spool.write(b"e").unwrap();
        assert!(spool.is_spooled());
    }

    #[test]
    fn read_line_over_disk_body() {
        let mut spool = Spool::new(0, None);
        spool.write(b"first\nsecond\n").unwrap();
        let mut body = spool.finish().unwrap();

        let mut line = String::new();
        body.read_line(&mut line).unwrap();
        assert_eq!(line, "first\n");
        body.seek(SeekFrom::Start(0)).unwrap();
        line.clear();
        body.read_line(&mut line).unwrap();
        assert_eq!(line, "first\n");
    }
}
