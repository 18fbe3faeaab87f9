//! File Boundary
//!
//! The narrow byte-oriented interfaces the log writer and reader consume.
//! Anything that can append (or read sequentially and skip) can back a log:
//! real files, in-memory buffers, or fault-injecting test doubles.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Append-only byte sink
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered bytes to the operating system
    fn flush(&mut self) -> Result<()>;

    /// Make appended bytes durable
    fn sync(&mut self) -> Result<()>;
}

/// Sequential byte source
pub trait SequentialFile {
    /// Read up to `buf.len()` bytes. A short count means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Skip `n` bytes forward
    fn skip(&mut self, n: u64) -> Result<()>;
}

impl<R: Read + Seek> SequentialFile for R {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match Read::read(self, &mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let offset = i64::try_from(n).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "skip distance too large")
        })?;
        self.seek(SeekFrom::Current(offset))?;
        Ok(())
    }
}

/// In-memory sink, mostly for tests and tools
impl WritableFile for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

impl WritableFile for Box<dyn WritableFile> {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        (**self).append(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}

/// Buffered append-only file on disk
pub struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogFile {
    /// Create (or truncate) a file for appending
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Open an existing file for appending, returning it with its current length
    pub fn open_append(path: &Path) -> Result<(Self, u64)> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
            },
            len,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WritableFile for LogFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile").field("path", &self.path).finish()
    }
}
