//! Sources of bytes that can be opened from the start any number of times.
//!
//! Compressed streams and the tar format can only be read forward. Every time an archive has to
//! be read again from the beginning (to probe a different compression format, or to reach an
//! entry that was already passed) the source is opened anew through [`ByteSource::open`].

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Something that can produce independent readers that start at the beginning of the same
/// sequence of bytes.
pub trait ByteSource {
    /// The reader returned by [`ByteSource::open`].
    type Reader: Read;

    /// Opens a fresh reader positioned at the start of the bytes.
    fn open(&self) -> std::io::Result<Self::Reader>;
}

impl ByteSource for PathBuf {
    type Reader = fs_err::File;

    fn open(&self) -> std::io::Result<Self::Reader> {
        fs_err::File::open(self)
    }
}

impl ByteSource for &Path {
    type Reader = fs_err::File;

    fn open(&self) -> std::io::Result<Self::Reader> {
        fs_err::File::open(self)
    }
}

impl ByteSource for Arc<[u8]> {
    type Reader = Cursor<Arc<[u8]>>;

    fn open(&self) -> std::io::Result<Self::Reader> {
        Ok(Cursor::new(self.clone()))
    }
}

impl ByteSource for Vec<u8> {
    type Reader = Cursor<Vec<u8>>;

    fn open(&self) -> std::io::Result<Self::Reader> {
        Ok(Cursor::new(self.clone()))
    }
}

impl ByteSource for &'static [u8] {
    type Reader = &'static [u8];

    fn open(&self) -> std::io::Result<Self::Reader> {
        Ok(*self)
    }
}
