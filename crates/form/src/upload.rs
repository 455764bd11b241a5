//! Uploaded files.
//!
//! A [`FileUpload`] is what a multipart part with a non-empty file name turns
//! into. It behaves like a read-only file: [`Read`], [`Seek`], line reading,
//! `tell` and `close`, plus the part's file name and headers.
//!
//! Handles are cheap to clone. Clones share the same storage and the same read
//! position, and compare equal only to each other.

use std::fmt;
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use parking_lot::Mutex;
use tracing::trace;

use crate::codec::SpooledBody;

/// A file uploaded through a multipart form.
#[derive(Clone)]
pub struct FileUpload {
    inner: Arc<Upload>,
}

struct Upload {
    filename: String,
    headers: HeaderMap,
    size: u64,
    spooled: bool,
    /// `None` once closed
    body: Mutex<Option<SpooledBody>>,
}

impl FileUpload {
    /// Wraps a part body.
    ///
    /// `filename` is the decoded file name as sent by the client; any path in
    /// front of the last `\` or `/` is removed.
    pub fn new(filename: &str, headers: HeaderMap, body: SpooledBody) -> Self {
        let upload = Upload {
            filename: sanitize_filename(filename).to_string(),
            headers,
            size: body.len(),
            spooled: body.is_spooled(),
            body: Mutex::new(Some(body)),
        };
        Self { inner: Arc::new(upload) }
    }

    /// The file name without any client side directory.
    #[inline]
    pub fn filename(&self) -> &str {
        &self.inner.filename
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// The part's `Content-Type` header, if it is valid text.
    pub fn content_type(&self) -> Option<&str> {
        self.inner.headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok())
    }

    /// Size of the uploaded content in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Returns true when the content lives in a temporary file.
    #[inline]
    pub fn is_spooled(&self) -> bool {
        self.inner.spooled
    }

    pub fn is_closed(&self) -> bool {
        self.inner.body.lock().is_none()
    }

    /// Reads the whole content, leaving the read position where it was.
    pub fn contents(&self) -> io::Result<Bytes> {
        self.with_body(SpooledBody::contents)
    }

    /// Reads one line including its `\n` into `buf`, returning the bytes read.
    pub fn read_line(&self, buf: &mut String) -> io::Result<usize> {
        self.with_body(|body| body.read_line(buf))
    }

    /// Reads all remaining lines.
    pub fn read_lines(&self) -> io::Result<Vec<String>> {
        self.with_body(|body| body.lines().collect())
    }

    /// Current read position.
    pub fn tell(&self) -> io::Result<u64> {
        self.with_body(Seek::stream_position)
    }

    /// Releases the content for this handle and all of its clones.
    ///
    /// A temporary file is deleted here at the latest. Reading afterwards fails.
    pub fn close(&self) {
        if self.inner.body.lock().take().is_some() {
            trace!(filename = %self.inner.filename, "upload closed");
        }
    }

    fn with_body<T>(&self, f: impl FnOnce(&mut SpooledBody) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.inner.body.lock();
        let body = guard.as_mut().ok_or_else(|| io::Error::other("read on closed file upload"))?;
        f(body)
    }
}

impl Read for FileUpload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_body(|body| body.read(buf))
    }
}

impl Seek for FileUpload {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.with_body(|body| body.seek(pos))
    }
}

/// Uploads are equal only to themselves and their clones.
impl PartialEq for FileUpload {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FileUpload {}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("filename", &self.inner.filename)
            .field("size", &self.inner.size)
            .field("spooled", &self.inner.spooled)
            .finish_non_exhaustive()
    }
}

/// Drops everything up to the last path separator, then surrounding whitespace.
///
/// Some browsers send the full client path, e.g. `C:\Users\me\report.pdf`.
fn sanitize_filename(filename: &str) -> &str {
    let start = filename.rfind(['\\', '/']).map_or(0, |pos| pos + 1);
    filename[start..].trim()
}
