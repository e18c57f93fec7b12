//! The description of a single item in a tar archive and the metadata it is built from.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::TarFormatError;

/// The size of a block in a tar archive. Headers occupy exactly one block and contents are
/// padded to a multiple of this size.
pub const BLOCK_SIZE: u64 = 512;

/// The mode of a regular file that has no special attributes.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// The mode of a directory that has no special attributes.
const DEFAULT_DIRECTORY_MODE: u32 = 0o755;

/// Execute permission for user, group and other.
const EXECUTE_BITS: u32 = 0o111;

/// Write permission for user, group and other.
const WRITE_BITS: u32 = 0o222;

/// The type of item an [`Entry`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular file with content.
    File,
    /// A directory, which never has content.
    Directory,
    /// Any other kind of item (symlinks, devices, ...), identified by its raw type flag.
    Other(u8),
}

/// Where an entry was found in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Position {
    /// Offset of the first header block of the entry in the decompressed stream.
    pub offset: u64,
    /// The number of entries that precede this one.
    pub index: usize,
}

/// A single item in a tar archive.
///
/// Entries returned by [`crate::read::TarFile::entries`] remember where in the archive they were
/// found, which is what allows their contents to be retrieved later on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    name: String,
    size: u64,
    mtime: Option<u64>,
    kind: EntryKind,
    mode: u32,
    position: Option<Position>,
}

impl Entry {
    /// Constructs a regular file entry with the given content size.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mtime: None,
            kind: EntryKind::File,
            mode: DEFAULT_FILE_MODE,
            position: None,
        }
    }

    /// Constructs a directory entry. A trailing `/` is appended to the name if it is missing.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            size: 0,
            mtime: None,
            kind: EntryKind::Directory,
            mode: DEFAULT_DIRECTORY_MODE,
            position: None,
        }
    }

    /// Applies the timestamp and attributes of a resource to this entry.
    pub fn with_metadata(mut self, metadata: &ResourceMetadata) -> Self {
        self.mtime = metadata
            .modified
            .map(|modified| modified.timestamp().max(0) as u64);
        if let Some(attributes) = metadata.attributes {
            self.mode = attributes.apply_to_mode(self.mode);
        }
        self
    }

    /// Overrides the permission bits of this entry.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// The path of the entry inside the archive. Directories end with a `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of content bytes of the entry.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The modification time in seconds since the unix epoch, if it was set.
    pub fn mtime(&self) -> Option<u64> {
        self.mtime
    }

    /// The modification time of the entry, if it was set.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.mtime
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// The kind of item this entry describes.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Returns true if this entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Returns true if this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// The unix permission bits of the entry.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Returns true if any of the execute bits are set.
    pub fn is_executable(&self) -> bool {
        self.mode & EXECUTE_BITS != 0
    }

    /// Returns true if none of the write bits are set.
    pub fn is_read_only(&self) -> bool {
        self.mode & WRITE_BITS == 0
    }

    /// The number of entries that precede this one in the archive it was read from.
    pub fn index(&self) -> Option<usize> {
        self.position.map(|position| position.index)
    }

    pub(crate) fn position(&self) -> Option<Position> {
        self.position
    }

    /// The number of bytes of zero padding that follow the contents of this entry.
    pub(crate) fn padding(&self) -> u64 {
        padding_for(self.size)
    }

    /// Decodes an entry from a header that was read at the given position. `long_name` holds the
    /// name of a preceding GNU long name record, if any.
    pub(crate) fn from_header(
        header: &tar::Header,
        long_name: Option<String>,
        position: Position,
    ) -> Result<Self, TarFormatError> {
        let invalid = |field: &str, err: std::io::Error| TarFormatError::InvalidHeader {
            offset: position.offset,
            reason: format!("invalid {field}: {err}"),
        };

        let name = match long_name {
            Some(name) => name,
            None => String::from_utf8_lossy(&header.path_bytes()).into_owned(),
        };
        let size = header.entry_size().map_err(|err| invalid("size", err))?;
        let mtime = header.mtime().map_err(|err| invalid("mtime", err))?;
        let mode = header.mode().map_err(|err| invalid("mode", err))?;

        let entry_type = header.entry_type();
        let kind = if entry_type.is_dir() || (entry_type.is_file() && name.ends_with('/')) {
            EntryKind::Directory
        } else if entry_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other(entry_type.as_byte())
        };

        Ok(Self {
            name,
            size,
            mtime: (mtime != 0).then_some(mtime),
            kind,
            mode,
            position: Some(position),
        })
    }

    /// Builds the header of this entry without its path. The path is set when the entry is
    /// appended to a [`tar::Builder`], which also takes care of names that do not fit.
    pub(crate) fn to_header(&self) -> tar::Header {
        let entry_type = match self.kind {
            EntryKind::File => tar::EntryType::Regular,
            EntryKind::Directory => tar::EntryType::Directory,
            EntryKind::Other(flag) => tar::EntryType::new(flag),
        };
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_size(self.size);
        header.set_mode(self.mode);
        header.set_mtime(self.mtime.unwrap_or(0));
        header.set_uid(0);
        header.set_gid(0);
        header
    }
}

/// Verifies the checksum stored in a header block against the one computed by the header codec.
pub(crate) fn verify_checksum(header: &tar::Header, offset: u64) -> Result<(), TarFormatError> {
    let invalid = |err: std::io::Error| TarFormatError::InvalidHeader {
        offset,
        reason: format!("invalid checksum field: {err}"),
    };

    let mut expected = header.clone();
    expected.set_cksum();
    if header.cksum().map_err(invalid)? == expected.cksum().map_err(invalid)? {
        Ok(())
    } else {
        Err(TarFormatError::InvalidChecksum { offset })
    }
}

/// The number of zero bytes needed to pad `size` bytes to a block boundary.
pub(crate) fn padding_for(size: u64) -> u64 {
    (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE
}

/// Attributes of a resource that are reflected in the permission bits of its entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAttributes {
    /// Sets the execute bits.
    pub executable: bool,
    /// Clears the write bits.
    pub read_only: bool,
}

impl ResourceAttributes {
    fn apply_to_mode(self, mut mode: u32) -> u32 {
        if self.executable {
            mode |= EXECUTE_BITS;
        }
        if self.read_only {
            mode &= !WRITE_BITS;
        }
        mode
    }
}

/// Metadata of a resource that is written to an archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceMetadata {
    /// The last modification time, or `None` if it is unknown.
    pub modified: Option<DateTime<Utc>>,
    /// Attributes of the resource, or `None` if they are unknown.
    pub attributes: Option<ResourceAttributes>,
}

impl ResourceMetadata {
    /// Reads the metadata of a file or directory on disk.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let metadata = fs_err::metadata(path.as_ref())?;
        Ok(Self::from(&metadata))
    }
}

impl From<&std::fs::Metadata> for ResourceMetadata {
    fn from(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let executable = {
            use std::os::unix::fs::PermissionsExt;
            metadata.is_file() && metadata.permissions().mode() & EXECUTE_BITS != 0
        };
        #[cfg(not(unix))]
        let executable = false;

        Self {
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            attributes: Some(ResourceAttributes {
                executable,
                read_only: metadata.permissions().readonly(),
            }),
        }
    }
}
