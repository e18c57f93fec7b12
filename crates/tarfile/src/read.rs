//! Reading tar archives with repeatable access to the contents of their entries.

use std::path::{Path, PathBuf};

use crate::compression::{open_decompressed, Compression};
use crate::entry::Entry;
use crate::source::ByteSource;
use crate::stream::{EntryReader, TarStream};
use crate::{TarFileError, TarFormatError};

/// An opened tar archive, optionally compressed with gzip or bzip2.
///
/// The archive is read through two independent streams over the same source. The *enumeration*
/// stream backs [`TarFile::entries`] and [`TarFile::next_entry`] and only ever moves forward. The
/// *content* stream is created on the first call to [`TarFile::content_of`] and is reused for as
/// long as the requested entries lie ahead of it. Requesting an entry that it has already passed
/// reopens the source and scans forward from the start, so reading contents in archive order is
/// linear in the size of the archive whereas reading them in reverse order is quadratic.
///
/// Both streams are owned by the `TarFile`. They are released by [`TarFile::close`] or when the
/// `TarFile` is dropped.
pub struct TarFile<S: ByteSource = PathBuf> {
    source: S,
    compression: Compression,
    enumeration: Option<TarStream<S::Reader>>,
    /// The first entry, read eagerly when the archive is opened.
    first: Option<Entry>,
    content: Option<TarStream<S::Reader>>,
}

impl TarFile<PathBuf> {
    /// Opens the archive at the given path.
    ///
    /// ```rust,no_run
    /// use tarfile::read::TarFile;
    ///
    /// let archive = TarFile::open("sources.tar.bz2").unwrap();
    /// println!("{} compressed", archive.compression());
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TarFileError> {
        Self::from_source(path.as_ref().to_path_buf())
    }

    /// The path of the archive.
    pub fn path(&self) -> &Path {
        &self.source
    }
}

impl<S: ByteSource> TarFile<S> {
    /// Opens an archive from an arbitrary source. The compression of the source is detected and
    /// the first header is read.
    ///
    /// Fails with [`TarFileError::NotAnArchive`] if the data does not start with a valid tar
    /// header. An empty source is a valid archive without entries.
    pub fn from_source(source: S) -> Result<Self, TarFileError> {
        let mut enumeration = TarStream::new(open_decompressed(&source)?);
        let compression = enumeration.compression();
        let first = enumeration.next_entry().map_err(|err| match err {
            TarFileError::TarFormat(err) => TarFileError::NotAnArchive(err),
            err => err,
        })?;

        Ok(Self {
            source,
            compression,
            enumeration: Some(enumeration),
            first,
            content: None,
        })
    }

    /// The source the archive is read from.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The compression that was detected when the archive was opened.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Returns an iterator over the entries in the archive that have not been enumerated yet.
    ///
    /// The archive is enumerated only once: calling this function again continues where the
    /// previous iterator stopped. Enumeration stops at the end of the archive, but also as soon
    /// as an entry cannot be parsed. A truncated or corrupt archive is therefore indistinguishable
    /// from one that ends early.
    pub fn entries(&mut self) -> Entries<'_, S> {
        Entries { archive: self }
    }

    /// Returns the next entry of the enumeration, see [`TarFile::entries`].
    pub fn next_entry(&mut self) -> Option<Entry> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }

        let enumeration = self.enumeration.as_mut()?;
        match enumeration.next_entry() {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => {
                self.enumeration = None;
                None
            }
            Err(err) => {
                tracing::debug!("stopped enumerating entries: {err}");
                self.enumeration = None;
                None
            }
        }
    }

    /// Returns a reader over the contents of `entry`, which must have been returned by the
    /// enumeration of this archive. The reader yields exactly [`Entry::size`] bytes.
    ///
    /// The returned reader borrows the archive; dropping it does not release anything.
    ///
    /// Fails with a [`TarFileError::TarFormat`] error if the archive is corrupt or ends before the
    /// entry is reached. If the contents of the entry itself are cut short, reading from the
    /// returned reader fails with an error of kind [`std::io::ErrorKind::UnexpectedEof`].
    pub fn content_of(
        &mut self,
        entry: &Entry,
    ) -> Result<EntryReader<'_, S::Reader>, TarFileError> {
        let reachable = self
            .content
            .as_ref()
            .is_some_and(|stream| stream.is_reachable(entry));
        if !reachable {
            if self.content.is_some() {
                tracing::debug!(
                    "restarting the archive to read '{}', which was already passed",
                    entry.name()
                );
            }
            // Release the old reader before the source is opened again.
            self.content = None;
            self.content = Some(TarStream::new(open_decompressed(&self.source)?));
        }
        let Some(stream) = self.content.as_mut() else {
            return Err(TarFormatError::EntryNotFound {
                name: entry.name().to_owned(),
            }
            .into());
        };

        // A stream that fails to reach the entry is left exhausted and is replaced on the next
        // call.
        stream.skip_to_entry(entry)?;
        Ok(EntryReader::new(stream))
    }

    /// Releases the streams that read the archive, and with them every reader of the source.
    /// Calling this more than once is harmless.
    ///
    /// Closing ends the enumeration: [`TarFile::entries`] yields nothing afterwards. The source
    /// itself stays owned by the `TarFile`, so a later call to [`TarFile::content_of`] opens it
    /// again from the start and holds a reader until the next `close`.
    pub fn close(&mut self) {
        let had_streams = self.enumeration.take().is_some() | self.content.take().is_some();
        if had_streams {
            tracing::trace!("closed tar archive");
        }
        self.first = None;
    }
}

impl<S: ByteSource> Drop for TarFile<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// An iterator over the entries of a [`TarFile`], created by [`TarFile::entries`].
pub struct Entries<'a, S: ByteSource> {
    archive: &'a mut TarFile<S>,
}

impl<S: ByteSource> Iterator for Entries<'_, S> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        self.archive.next_entry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ResourceMetadata;
    use crate::write::{TarFileWriter, WriteOptions};
    use assert_matches::assert_matches;
    use std::io::Read;
    use std::sync::Arc;

    fn build(compression: Compression, files: &[(&str, &str)]) -> Arc<[u8]> {
        let mut writer =
            TarFileWriter::new(Vec::new(), WriteOptions::new(compression)).unwrap();
        for (name, content) in files {
            writer
                .write_file(
                    name,
                    &ResourceMetadata::default(),
                    content.len() as u64,
                    &content.as_bytes().to_vec(),
                )
                .unwrap();
        }
        Arc::from(writer.finish().unwrap())
    }

    #[test]
    fn test_first_entry_is_read_eagerly() {
        let source = build(Compression::Gzip, &[("a.txt", "a")]);
        let mut archive = TarFile::from_source(source).unwrap();
        assert_eq!(archive.compression(), Compression::Gzip);
        assert!(archive.first.is_some());
        assert_eq!(archive.entries().count(), 1);
        assert_eq!(archive.entries().count(), 0);
    }

    #[test]
    fn test_empty_source_has_no_entries() {
        let source: Arc<[u8]> = Arc::from(Vec::new());
        let mut archive = TarFile::from_source(source).unwrap();
        assert_eq!(archive.entries().count(), 0);
    }

    #[test]
    fn test_garbage_is_not_an_archive() {
        let source: Arc<[u8]> = Arc::from(vec![b'x'; 2048]);
        assert_matches!(
            TarFile::from_source(source).err(),
            Some(TarFileError::NotAnArchive(_))
        );
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_content_stream_is_reused_going_forward() {
        let source = build(Compression::None, &[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut archive = TarFile::from_source(source).unwrap();
        let entries = archive.entries().collect::<Vec<_>>();

        let mut content = String::new();
        archive
            .content_of(&entries[0])
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        let mut reader = archive.content_of(&entries[2]).unwrap();
        assert_eq!(reader.remaining(), 1);
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "13");

        // The stream that served the first entry moved on to the third one.
        assert!(!logs_contain("restarting the archive"));
        let stream = archive.content.as_ref().unwrap();
        assert!(stream.current().is_none());
        assert!(!stream.is_reachable(&entries[1]));
        assert!(!stream.is_reachable(&entries[2]));

        // Going back requires a fresh stream.
        assert_eq!(archive.content_of(&entries[1]).unwrap().read_all().unwrap(), b"2");
        assert!(logs_contain("restarting the archive to read 'b'"));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_reverse_access_restarts_the_source() {
        let source = build(Compression::Gzip, &[("a", "1"), ("b", "2")]);
        let mut archive = TarFile::from_source(source).unwrap();
        let entries = archive.entries().collect::<Vec<_>>();

        archive.content_of(&entries[1]).unwrap();
        assert!(!logs_contain("restarting the archive"));

        archive.content_of(&entries[0]).unwrap();
        assert!(logs_contain("restarting the archive to read 'a'"));
    }

    #[test]
    fn test_interleaved_enumeration_and_contents() {
        let source = build(Compression::Bzip2, &[("a", "first"), ("b", "second")]);
        let mut archive = TarFile::from_source(source).unwrap();

        let mut contents = Vec::new();
        while let Some(entry) = archive.next_entry() {
            let data = archive.content_of(&entry).unwrap().read_all().unwrap();
            contents.push(String::from_utf8(data).unwrap());
        }
        assert_eq!(contents, ["first", "second"]);
    }

    #[test]
    fn test_unpositioned_entry_is_not_found() {
        let source = build(Compression::None, &[("a", "1")]);
        let mut archive = TarFile::from_source(source).unwrap();
        assert_matches!(
            archive.content_of(&Entry::file("a", 1)).err(),
            Some(TarFileError::TarFormat(
                crate::TarFormatError::EntryNotFound { .. }
            ))
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let source = build(Compression::None, &[("a", "1")]);
        let mut archive = TarFile::from_source(source).unwrap();
        let entries = archive.entries().collect::<Vec<_>>();
        archive.content_of(&entries[0]).unwrap();

        archive.close();
        archive.close();
        assert!(archive.content.is_none());
        assert!(archive.enumeration.is_none());
        assert_eq!(archive.entries().count(), 0);

        // Contents can still be retrieved by reopening the source.
        assert_eq!(archive.content_of(&entries[0]).unwrap().read_all().unwrap(), b"1");
    }
}
