#![deny(missing_docs)]

//! This crate provides the ability to read and write tar archives that are optionally compressed
//! with gzip or bzip2.
//!
//! Reading is done through [`read::TarFile`]. Opening an archive sniffs the compression of the
//! source and exposes a forward-only catalogue of its entries. The contents of any entry that was
//! seen in the catalogue can be retrieved afterwards with [`read::TarFile::content_of`], in any
//! order. Because neither compressed streams nor the tar format can be rewound, retrieving an
//! entry that lies *before* the current read position restarts the source from the beginning.
//! Accessing entries in archive order is therefore much cheaper than accessing them in reverse.
//!
//! Writing is done through [`write::TarFileWriter`].
//!
//! ```rust,no_run
//! use std::io::Read;
//! use tarfile::read::TarFile;
//!
//! let mut archive = TarFile::open("project.tar.gz").unwrap();
//! let entries = archive.entries().collect::<Vec<_>>();
//! for entry in entries.iter().filter(|entry| entry.is_file()) {
//!     let mut content = String::new();
//!     archive.content_of(entry).unwrap().read_to_string(&mut content).unwrap();
//!     println!("{}: {content}", entry.name());
//! }
//! ```

pub mod compression;
pub mod entry;
pub mod read;
pub mod source;
pub mod stream;
pub mod write;

pub use compression::{Compression, CompressionLevel};
pub use entry::{Entry, EntryKind, ResourceAttributes, ResourceMetadata};
pub use read::TarFile;
pub use source::ByteSource;
pub use write::{TarFileWriter, WriteOptions};

/// An error that can occur when reading or writing a tar archive.
#[derive(thiserror::Error, Debug)]
pub enum TarFileError {
    /// The underlying source or sink failed.
    #[error("an io error occurred")]
    IoError(#[source] std::io::Error),

    /// The source does not start with a valid tar header.
    #[error("not a tar archive")]
    NotAnArchive(#[source] TarFormatError),

    /// The archive is malformed.
    #[error(transparent)]
    TarFormat(#[from] TarFormatError),

    /// The contents of a resource that was written to the archive could not be read.
    #[error("could not read the contents of '{name}'")]
    Resource {
        /// The name of the entry in the archive.
        name: String,
        /// The error that occurred while opening or reading the resource.
        #[source]
        source: std::io::Error,
    },

    /// An argument passed to a function is not supported.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Describes why the tar stream could not be interpreted.
#[derive(thiserror::Error, Debug)]
pub enum TarFormatError {
    /// The data ended in the middle of a header block.
    #[error("unexpected end of data in the header at offset {offset}")]
    TruncatedHeader {
        /// Offset of the header in the decompressed stream.
        offset: u64,
    },

    /// The data ended before all the contents of an entry were read.
    #[error("unexpected end of data in the contents of '{name}', {missing} bytes are missing")]
    TruncatedEntry {
        /// The name of the entry.
        name: String,
        /// The number of content bytes that could not be read.
        missing: u64,
    },

    /// The checksum stored in a header does not match its contents.
    #[error("invalid header checksum at offset {offset}")]
    InvalidChecksum {
        /// Offset of the header in the decompressed stream.
        offset: u64,
    },

    /// A field of a header could not be decoded.
    #[error("invalid header at offset {offset}: {reason}")]
    InvalidHeader {
        /// Offset of the header in the decompressed stream.
        offset: u64,
        /// A description of the problem.
        reason: String,
    },

    /// The requested entry could not be found at the position it was catalogued at.
    #[error("the entry '{name}' could not be found in the archive")]
    EntryNotFound {
        /// The name of the requested entry.
        name: String,
    },

    /// The requested entry lies before the current position of a forward-only stream.
    #[error("the entry '{name}' lies before the current position of the stream")]
    EntryPassed {
        /// The name of the requested entry.
        name: String,
    },
}

impl From<std::io::Error> for TarFileError {
    /// Content readers report malformed data as an [`std::io::Error`] that wraps a
    /// [`TarFormatError`]. This unwraps those so they surface as [`TarFileError::TarFormat`].
    fn from(err: std::io::Error) -> Self {
        match err.downcast::<TarFormatError>() {
            Ok(format_err) => TarFileError::TarFormat(format_err),
            Err(err) => TarFileError::IoError(err),
        }
    }
}

impl From<TarFormatError> for std::io::Error {
    fn from(err: TarFormatError) -> Self {
        let kind = match &err {
            TarFormatError::TruncatedHeader { .. } | TarFormatError::TruncatedEntry { .. } => {
                std::io::ErrorKind::UnexpectedEof
            }
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, err)
    }
}
