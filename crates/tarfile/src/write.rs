//! Functionality for writing tar archives
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::compression::{Compression, CompressionLevel, Encoder};
use crate::entry::{Entry, ResourceMetadata};
use crate::source::ByteSource;
use crate::TarFileError;

/// The default size of the chunks in which file contents are copied into the archive.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Options that control how an archive is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// The compression that wraps the tar stream.
    pub compression: Compression,
    /// The compression level, ignored for uncompressed archives.
    pub compression_level: CompressionLevel,
    /// The size of the chunks in which file contents are copied.
    pub chunk_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            compression_level: CompressionLevel::Default,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl WriteOptions {
    /// Default options for the given compression.
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            ..Self::default()
        }
    }

    /// Sets the compression level.
    pub fn with_compression_level(mut self, compression_level: CompressionLevel) -> Self {
        self.compression_level = compression_level;
        self
    }

    /// Sets the size of the chunks in which file contents are copied.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn validate(&self) -> Result<(), TarFileError> {
        self.compression_level.validate(self.compression)?;
        if self.chunk_size == 0 {
            return Err(TarFileError::InvalidArgument(String::from(
                "the chunk size must be larger than zero",
            )));
        }
        Ok(())
    }
}

/// Writes a tar archive, optionally compressed with gzip or bzip2.
///
/// Entries are serialized by a [`tar::Builder`] into a buffer that feeds the compression encoder,
/// which in turn writes to the output. [`TarFileWriter::finish`] must be called to write the end of the archive; an
/// archive that is dropped without finishing is incomplete.
///
/// ```rust,no_run
/// use tarfile::{Compression, ResourceMetadata, TarFileWriter};
/// use std::path::PathBuf;
///
/// let mut writer = TarFileWriter::create("export.tar.gz", Compression::Gzip).unwrap();
/// writer.write_directory("src/", &ResourceMetadata::default()).unwrap();
///
/// let source = PathBuf::from("src/main.rs");
/// let metadata = ResourceMetadata::from_path(&source).unwrap();
/// let size = std::fs::metadata(&source).unwrap().len();
/// writer.write_file("src/main.rs", &metadata, size, &source).unwrap();
/// writer.finish().unwrap();
/// ```
pub struct TarFileWriter<W: Write = fs_err::File> {
    builder: tar::Builder<BufWriter<Encoder<W>>>,
    chunk_size: usize,
}

impl TarFileWriter<fs_err::File> {
    /// Creates (or truncates) the file at `path` and writes an archive with the given
    /// compression to it.
    pub fn create(path: impl AsRef<Path>, compression: Compression) -> Result<Self, TarFileError> {
        Self::create_with_options(path, WriteOptions::new(compression))
    }

    /// Creates (or truncates) the file at `path` and writes an archive to it. The options are
    /// validated before the file is created.
    pub fn create_with_options(
        path: impl AsRef<Path>,
        options: WriteOptions,
    ) -> Result<Self, TarFileError> {
        options.validate()?;
        let file = fs_err::File::create(path.as_ref())?;
        Self::new(file, options)
    }
}

impl<W: Write> TarFileWriter<W> {
    /// Writes an archive to `writer`.
    pub fn new(writer: W, options: WriteOptions) -> Result<Self, TarFileError> {
        options.validate()?;
        tracing::debug!(
            "writing tar archive (compression: {}, level: {:?})",
            options.compression,
            options.compression_level
        );
        let encoder = Encoder::new(writer, options.compression, options.compression_level)?;
        Ok(Self {
            builder: tar::Builder::new(BufWriter::new(encoder)),
            chunk_size: options.chunk_size,
        })
    }

    /// Writes a directory entry. A trailing `/` is appended to `name` if it is missing.
    pub fn write_directory(
        &mut self,
        name: &str,
        metadata: &ResourceMetadata,
    ) -> Result<(), TarFileError> {
        validate_name(name)?;
        let entry = Entry::directory(name).with_metadata(metadata);
        tracing::trace!("adding directory '{}'", entry.name());
        self.builder
            .append_data(&mut entry.to_header(), entry.name(), std::io::empty())?;
        Ok(())
    }

    /// Writes a regular file entry of `content_size` bytes whose contents are read from
    /// `content`.
    ///
    /// If `content` cannot be opened this fails with [`TarFileError::Resource`] before anything is
    /// written. If reading fails halfway, or `content` holds fewer bytes than announced, the rest
    /// of the entry is filled with zeros so the archive stays valid, and
    /// [`TarFileError::Resource`] is returned. Bytes beyond `content_size` are ignored.
    pub fn write_file<C: ByteSource + ?Sized>(
        &mut self,
        name: &str,
        metadata: &ResourceMetadata,
        content_size: u64,
        content: &C,
    ) -> Result<(), TarFileError> {
        validate_name(name)?;
        let reader = content.open().map_err(|source| TarFileError::Resource {
            name: name.to_owned(),
            source,
        })?;

        let entry = Entry::file(name, content_size).with_metadata(metadata);
        tracing::trace!("adding file '{}' ({content_size} bytes)", entry.name());
        let mut contents = ContentReader::new(reader, content_size, self.chunk_size);
        self.builder
            .append_data(&mut entry.to_header(), entry.name(), &mut contents)?;

        let copied = contents.copied;
        if copied < content_size {
            tracing::warn!(
                "only {copied} of {content_size} bytes of '{name}' could be read, filling the rest with zeros"
            );
        }
        match contents.error {
            Some(source) => Err(TarFileError::Resource {
                name: name.to_owned(),
                source,
            }),
            None if copied < content_size => Err(TarFileError::Resource {
                name: name.to_owned(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {content_size} bytes but the content ended after {copied}"),
                ),
            }),
            None => Ok(()),
        }
    }

    /// Writes the end-of-archive marker, finishes the compressed stream and returns the
    /// underlying writer.
    pub fn finish(self) -> Result<W, TarFileError> {
        let output = self.builder.into_inner()?;

        // The tar stream has to be flushed completely before the compressed stream is closed.
        let encoder = output.into_inner().map_err(|err| err.into_error())?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        tracing::debug!("finished writing tar archive");
        Ok(writer)
    }
}

/// Reads exactly `size` bytes of entry contents in chunks of at most `chunk_size` bytes. When the
/// underlying reader fails or ends early the remainder is filled with zeros, and the error is
/// kept for the caller.
struct ContentReader<R> {
    reader: R,
    size: u64,
    chunk_size: usize,
    copied: u64,
    zero_filled: u64,
    filling: bool,
    error: Option<std::io::Error>,
}

impl<R: Read> ContentReader<R> {
    fn new(reader: R, size: u64, chunk_size: usize) -> Self {
        Self {
            reader,
            size,
            chunk_size,
            copied: 0,
            zero_filled: 0,
            filling: false,
            error: None,
        }
    }

    fn remaining(&self) -> u64 {
        self.size - self.copied - self.zero_filled
    }
}

impl<R: Read> Read for ContentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = buf
            .len()
            .min(self.chunk_size)
            .min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
        if len == 0 {
            return Ok(0);
        }

        if !self.filling {
            match self.reader.read(&mut buf[..len]) {
                Ok(0) => self.filling = true,
                Ok(read) => {
                    self.copied += read as u64;
                    return Ok(read);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => return Err(err),
                Err(err) => {
                    self.filling = true;
                    self.error = Some(err);
                }
            }
        }

        buf[..len].fill(0);
        self.zero_filled += len as u64;
        Ok(len)
    }
}

fn validate_name(name: &str) -> Result<(), TarFileError> {
    let escapes_archive = name.starts_with('/')
        || Path::new(name)
            .components()
            .any(|component| component == std::path::Component::ParentDir);
    if name.is_empty() || name.contains('\0') || escapes_archive {
        return Err(TarFileError::InvalidArgument(format!(
            "'{}' is not a valid entry name",
            name.escape_default()
        )));
    }
    Ok(())
}
