//! Byte sources and the cancellable buffered input the parser reads from.
//!
//! A `ByteSource` is opened at an absolute byte position with a `DataSpec`,
//! read until it reports end of input (`Ok(0)`), then closed.
//! `open` and `close` are always called in pairs, also when `open` fails.

use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::PathBuf,
    sync::Arc,
};

use log::debug;

use crate::{support::CancelFlag, Mp4Error};

const SKIP_SCRATCH_LENGTH: usize = 4096;

/// Byte range to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSpec {
    /// `file:///path`, a bare path, or `memory:` for in-memory sources.
    pub uri: String,
    /// Absolute byte position to start reading at.
    pub position: u64,
    /// Number of bytes to read, `None` for unbounded.
    pub length: Option<u64>,
    /// Optional cache key.
    pub key: Option<String>,
}

impl DataSpec {
    pub fn new(uri: &str, position: u64) -> Self {
        Self {
            uri: uri.to_owned(),
            position,
            ..Self::default()
        }
    }

    pub fn with_length(self, length: u64) -> Self {
        Self {length: Some(length), ..self}
    }

    /// Scheme of the URI, e.g. `file`, if any.
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.uri.split_once(':')?;
        // Windows drive letters are not schemes
        match scheme.len() > 1 && scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
            true => Some(scheme),
            false => None,
        }
    }
}

/// Raw byte source, e.g. a file.
pub trait ByteSource: Send {
    /// Opens the source at `spec.position`.
    /// Returns the number of bytes that can be read, `None` if unknown.
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, Mp4Error>;
    /// Reads up to `buf.len()` bytes. `Ok(0)` means end of input.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Mp4Error>;
    /// Releases any resources held since `open`.
    fn close(&mut self) -> Result<(), Mp4Error>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, Mp4Error> {
        (**self).open(spec)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Mp4Error> {
        (**self).read(buf)
    }

    fn close(&mut self) -> Result<(), Mp4Error> {
        (**self).close()
    }
}

/// Local file source.
/// Accepts `file://` URIs and bare paths.
#[derive(Debug, Default)]
pub struct FileSource {
    reader: Option<BufReader<File>>,
    /// Bytes left in the opened range.
    remaining: u64,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn path(uri: &str) -> PathBuf {
        PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
    }
}

impl ByteSource for FileSource {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, Mp4Error> {
        let file = File::open(Self::path(&spec.uri))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(spec.position))?;

        let available = file_len.saturating_sub(spec.position);
        self.remaining = match spec.length {
            Some(len) => len.min(available),
            None => available,
        };
        self.reader = Some(reader);
        Ok(Some(self.remaining))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Mp4Error> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(Mp4Error::NotPrepared)
        };
        if self.remaining == 0 {
            return Ok(0)
        }
        let len = (buf.len() as u64).min(self.remaining) as usize;
        let n = reader.read(&mut buf[.. len])?;
        self.remaining -= n as u64;
        Ok(n)
    }

    fn close(&mut self) -> Result<(), Mp4Error> {
        self.reader = None;
        self.remaining = 0;
        Ok(())
    }
}

/// Source over bytes already in memory.
/// Cloning shares the underlying bytes.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
    position: usize,
    end: usize,
    opened: bool,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            end: 0,
            opened: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while opened.
    pub fn is_open(&self) -> bool {
        self.opened
    }
}

impl ByteSource for MemorySource {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, Mp4Error> {
        let start = (spec.position as usize).min(self.data.len());
        let available = self.data.len() - start;
        let len = match spec.length {
            Some(len) => (len as usize).min(available),
            None => available,
        };
        self.position = start;
        self.end = start + len;
        self.opened = true;
        Ok(Some(len as u64))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Mp4Error> {
        if !self.opened {
            return Err(Mp4Error::NotPrepared)
        }
        let n = buf.len().min(self.end - self.position);
        buf[.. n].copy_from_slice(&self.data[self.position .. self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn close(&mut self) -> Result<(), Mp4Error> {
        self.opened = false;
        Ok(())
    }
}

/// Opened source, chosen by URI scheme.
#[derive(Debug)]
enum OpenedSource {
    File(FileSource),
    Memory(MemorySource),
}

/// Byte source that picks a `FileSource` or `MemorySource`
/// from the URI scheme on every open,
/// and keeps it until closed.
///
/// `file:` or no scheme opens a file, `memory:` the bytes
/// registered with `with_memory()`.
#[derive(Debug, Default)]
pub struct UriSource {
    memory: Option<MemorySource>,
    opened: Option<OpenedSource>,
}

impl UriSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes served for `memory:` URIs.
    pub fn with_memory(self, data: impl Into<Arc<[u8]>>) -> Self {
        Self {memory: Some(MemorySource::new(data)), ..self}
    }
}

impl ByteSource for UriSource {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, Mp4Error> {
        let mut source = match spec.scheme() {
            None | Some("file") => OpenedSource::File(FileSource::new()),
            Some("memory") => match &self.memory {
                Some(memory) => OpenedSource::Memory(memory.clone()),
                None => return Err(Mp4Error::UnsupportedUri(spec.uri.to_owned())),
            },
            Some(_) => return Err(Mp4Error::UnsupportedUri(spec.uri.to_owned())),
        };
        debug!("Opening '{}' @ {}", spec.uri, spec.position);
        let len = match &mut source {
            OpenedSource::File(s) => s.open(spec),
            OpenedSource::Memory(s) => s.open(spec),
        };
        // kept even on failure, so that close() pairs with open()
        self.opened = Some(source);
        len
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Mp4Error> {
        match &mut self.opened {
            Some(OpenedSource::File(s)) => s.read(buf),
            Some(OpenedSource::Memory(s)) => s.read(buf),
            None => Err(Mp4Error::NotPrepared),
        }
    }

    fn close(&mut self) -> Result<(), Mp4Error> {
        match self.opened.take() {
            Some(OpenedSource::File(mut s)) => s.close(),
            Some(OpenedSource::Memory(mut s)) => s.close(),
            None => Ok(()),
        }
    }
}

/// Opened `ByteSource` with a tracked absolute position.
///
/// Every call checks the cancel flag first and fails
/// with `Mp4Error::Cancelled` if set.
pub struct BufferedInput<'a> {
    source: &'a mut dyn ByteSource,
    position: u64,
    /// Absolute stream length, if known.
    length: Option<u64>,
    cancel: CancelFlag,
}

impl<'a> BufferedInput<'a> {
    /// Wraps a source opened at absolute `position`,
    /// `length` being the value returned by `open()`.
    pub fn new(
        source: &'a mut dyn ByteSource,
        position: u64,
        length: Option<u64>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            source,
            position,
            length: length.map(|len| position + len),
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), Mp4Error> {
        match self.cancel.is_cancelled() {
            true => Err(Mp4Error::Cancelled),
            false => Ok(())
        }
    }

    /// Absolute byte position of the next read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Absolute length of the stream, if known.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Reads up to `buf.len()` bytes, `Ok(0)` on end of input.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Mp4Error> {
        self.check_cancelled()?;
        if buf.is_empty() {
            return Ok(0)
        }
        let n = self.source.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Fills `buf` completely.
    ///
    /// Returns `Ok(false)` if input ended before the first byte
    /// and `allow_end_of_input` is set. Ending anywhere else
    /// is `Mp4Error::UnexpectedEof`.
    pub fn read_fully(&mut self, buf: &mut [u8], allow_end_of_input: bool) -> Result<bool, Mp4Error> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled ..])?;
            if n == 0 {
                if filled == 0 && allow_end_of_input {
                    return Ok(false)
                }
                return Err(Mp4Error::UnexpectedEof{offset: self.position})
            }
            filled += n;
        }
        Ok(true)
    }

    /// Reads and discards `len` bytes.
    pub fn skip_fully(&mut self, len: u64) -> Result<(), Mp4Error> {
        let mut scratch = [0_u8; SKIP_SCRATCH_LENGTH];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(SKIP_SCRATCH_LENGTH as u64) as usize;
            let n = self.read(&mut scratch[.. chunk])?;
            if n == 0 {
                return Err(Mp4Error::UnexpectedEof{offset: self.position})
            }
            remaining -= n as u64;
        }
        Ok(())
    }
}
