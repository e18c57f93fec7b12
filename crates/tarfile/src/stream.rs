//! A forward-only tar stream that serves the contents of one entry at a time.
//!
//! [`TarStream`] reads headers and contents from a decompressed byte stream. After a header has
//! been read the stream is positioned at the contents of that entry and reading from it yields
//! exactly [`Entry::size`] bytes. Moving on to a later entry skips over the remaining contents
//! and padding without exposing them. Entries that have already been passed cannot be reached
//! again; the stream has to be recreated from the start of the source instead.

use std::io::{Read, Write};

use crate::compression::{Compression, Decompressed};
use crate::entry::{padding_for, verify_checksum, Entry, Position, BLOCK_SIZE};
use crate::{TarFileError, TarFormatError};

/// Long names are stored in the archive as the contents of a separate record. Anything larger
/// than this is considered corrupt.
const MAX_LONG_NAME_LEN: u64 = 64 * 1024;

/// Where a [`TarStream`] is with respect to the entries in the archive.
#[derive(Debug, Clone)]
enum State {
    /// Positioned at a header. Nothing of the next entry has been read.
    BeforeEntry,
    /// Positioned inside the contents of `entry`.
    InEntry { entry: Entry, remaining: u64 },
    /// All contents of the last entry were read, its padding was not.
    AfterEntry { padding: u64 },
    /// The end of the archive was reached or the stream is unusable.
    Exhausted,
}

/// A tar stream on top of a decompressed reader.
pub struct TarStream<R: Read> {
    reader: Decompressed<R>,
    state: State,
    /// The number of bytes consumed from `reader`.
    offset: u64,
    /// The number of entry headers that have been read.
    entries_read: usize,
}

impl<R: Read> TarStream<R> {
    /// Constructs a stream that is positioned at the first header of the archive.
    pub fn new(reader: Decompressed<R>) -> Self {
        Self {
            reader,
            state: State::BeforeEntry,
            offset: 0,
            entries_read: 0,
        }
    }

    /// The compression of the source this stream reads from.
    pub fn compression(&self) -> Compression {
        self.reader.compression()
    }

    /// The entry whose contents are currently being served, if any.
    pub fn current(&self) -> Option<&Entry> {
        match &self.state {
            State::InEntry { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// Returns true if the contents of `target` can still be served by this stream, either
    /// because it is the current entry and none of its contents were read yet, or because it
    /// lies further ahead in the archive.
    pub fn is_reachable(&self, target: &Entry) -> bool {
        let Some(position) = target.position() else {
            return false;
        };
        match &self.state {
            State::Exhausted => false,
            State::InEntry { entry, remaining } if entry.position() == Some(position) => {
                *remaining == entry.size()
            }
            _ => position.index >= self.entries_read,
        }
    }

    /// Skips over the remainder of the archive up to the header of the next entry, reads that
    /// header and positions the stream at its contents.
    ///
    /// Returns `None` when the end-of-archive marker or the end of the data is reached.
    pub fn next_entry(&mut self) -> Result<Option<Entry>, TarFileError> {
        let result = self.read_next_entry();
        if result.is_err() {
            self.state = State::Exhausted;
        }
        result
    }

    /// Positions the stream at the contents of `target`, skipping over all entries in between.
    ///
    /// Fails with [`TarFormatError::EntryPassed`] if `target` is not reachable (see
    /// [`TarStream::is_reachable`]) and with another [`TarFormatError`] if the archive ends or is
    /// corrupt before `target` is reached.
    pub fn skip_to_entry(&mut self, target: &Entry) -> Result<(), TarFileError> {
        let Some(position) = target.position() else {
            return Err(TarFormatError::EntryNotFound {
                name: target.name().to_owned(),
            }
            .into());
        };

        if !self.is_reachable(target) {
            return Err(TarFormatError::EntryPassed {
                name: target.name().to_owned(),
            }
            .into());
        }

        if let State::InEntry { entry, .. } = &self.state {
            if entry.position() == Some(position) {
                return Ok(());
            }
        }

        while let Some(entry) = self.next_entry()? {
            match entry.index() {
                Some(index) if index < position.index => {
                    tracing::trace!("skipping over '{}'", entry.name());
                }
                Some(index) if index == position.index && entry == *target => return Ok(()),
                _ => break,
            }
        }

        self.state = State::Exhausted;
        Err(TarFormatError::EntryNotFound {
            name: target.name().to_owned(),
        }
        .into())
    }

    fn read_next_entry(&mut self) -> Result<Option<Entry>, TarFileError> {
        if !self.skip_to_header()? {
            return Ok(None);
        }

        let start = self.offset;
        let mut long_name = None;
        let mut pax_path = None;
        loop {
            let header_offset = self.offset;
            let Some(block) = self.read_block()? else {
                self.state = State::Exhausted;
                return Ok(None);
            };

            // The archive ends with (at least) one block of zeros.
            if block.iter().all(|&byte| byte == 0) {
                self.state = State::Exhausted;
                return Ok(None);
            }

            let header = tar::Header::from_byte_slice(&block);
            verify_checksum(header, header_offset)?;

            let entry_type = header.entry_type();
            if entry_type.is_gnu_longname() {
                let data = self.read_record(header, header_offset)?;
                let name = data.split(|&byte| byte == 0).next().unwrap_or_default();
                long_name = Some(String::from_utf8_lossy(name).into_owned());
                continue;
            } else if entry_type.is_pax_local_extensions() {
                let data = self.read_record(header, header_offset)?;
                pax_path = pax_path_of(&data, header_offset)?.or(pax_path);
                continue;
            } else if entry_type.is_gnu_longlink() || entry_type.is_pax_global_extensions() {
                tracing::trace!(
                    "ignoring extension record of type {:?} at offset {header_offset}",
                    entry_type
                );
                self.read_record(header, header_offset)?;
                continue;
            }

            let entry = Entry::from_header(
                header,
                // A pax path takes precedence over a GNU long name.
                pax_path.or(long_name),
                Position {
                    offset: start,
                    index: self.entries_read,
                },
            )?;
            self.entries_read += 1;
            self.state = State::InEntry {
                remaining: entry.size(),
                entry: entry.clone(),
            };
            return Ok(Some(entry));
        }
    }

    /// Discards everything up to the next header. Returns false if the end of the archive was
    /// reached instead.
    fn skip_to_header(&mut self) -> Result<bool, TarFileError> {
        loop {
            match &self.state {
                State::BeforeEntry => return Ok(true),
                State::Exhausted => return Ok(false),
                State::InEntry { entry, remaining } => {
                    let (entry, remaining) = (entry.clone(), *remaining);
                    let skipped = self.skip(remaining)?;
                    if skipped < remaining {
                        return Err(TarFormatError::TruncatedEntry {
                            name: entry.name().to_owned(),
                            missing: remaining - skipped,
                        }
                        .into());
                    }
                    self.state = State::AfterEntry {
                        padding: entry.padding(),
                    };
                }
                State::AfterEntry { padding } => {
                    let padding = *padding;
                    if self.skip(padding)? < padding {
                        // The data ends without padding or end-of-archive marker.
                        self.state = State::Exhausted;
                    } else {
                        self.state = State::BeforeEntry;
                    }
                }
            }
        }
    }

    /// Reads the contents of a record that is part of the header of an entry.
    fn read_record(
        &mut self,
        header: &tar::Header,
        header_offset: u64,
    ) -> Result<Vec<u8>, TarFileError> {
        let size = header
            .entry_size()
            .map_err(|err| TarFormatError::InvalidHeader {
                offset: header_offset,
                reason: format!("invalid size: {err}"),
            })?;
        if size > MAX_LONG_NAME_LEN {
            return Err(TarFormatError::InvalidHeader {
                offset: header_offset,
                reason: format!("extension record of {size} bytes is too large"),
            }
            .into());
        }

        let mut data = Vec::with_capacity(size as usize);
        let read = (&mut self.reader).take(size).read_to_end(&mut data)? as u64;
        self.offset += read;
        let padding = padding_for(size);
        if read < size || self.skip(padding)? < padding {
            return Err(TarFormatError::TruncatedHeader {
                offset: header_offset,
            }
            .into());
        }
        Ok(data)
    }

    /// Reads a single block. Returns `None` if the data ends exactly at the block boundary.
    fn read_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE as usize]>, TarFileError> {
        let mut block = [0u8; BLOCK_SIZE as usize];
        let mut filled = 0;
        while filled < block.len() {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }

        let offset = self.offset;
        self.offset += filled as u64;
        match filled {
            0 => Ok(None),
            n if n == block.len() => Ok(Some(block)),
            _ => Err(TarFormatError::TruncatedHeader { offset }.into()),
        }
    }

    /// Discards up to `len` bytes and returns how many were discarded.
    fn skip(&mut self, len: u64) -> std::io::Result<u64> {
        let skipped = std::io::copy(&mut (&mut self.reader).take(len), &mut std::io::sink())?;
        self.offset += skipped;
        Ok(skipped)
    }
}

/// Returns the `path` record of a pax extended header, if it has one.
fn pax_path_of(data: &[u8], header_offset: u64) -> Result<Option<String>, TarFormatError> {
    let mut path = None;
    for extension in tar::PaxExtensions::new(data) {
        let extension = extension.map_err(|err| TarFormatError::InvalidHeader {
            offset: header_offset,
            reason: format!("invalid pax extension: {err}"),
        })?;
        if extension.key() == Ok("path") {
            path = Some(String::from_utf8_lossy(extension.value_bytes()).into_owned());
        }
    }
    Ok(path)
}

impl<R: Read> Read for TarStream<R> {
    /// Reads contents of the current entry. Never reads past the end of the entry; at the end
    /// `Ok(0)` is returned. Data that ends before the entry does is reported as an error of kind
    /// [`std::io::ErrorKind::UnexpectedEof`] wrapping a [`TarFormatError::TruncatedEntry`].
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let State::InEntry { entry, remaining } = &mut self.state else {
            return Ok(0);
        };
        if *remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
        let read = self.reader.read(&mut buf[..len])?;
        if read == 0 {
            let err = TarFormatError::TruncatedEntry {
                name: entry.name().to_owned(),
                missing: *remaining,
            };
            self.state = State::Exhausted;
            return Err(err.into());
        }

        *remaining -= read as u64;
        self.offset += read as u64;
        if *remaining == 0 {
            let padding = entry.padding();
            self.state = State::AfterEntry { padding };
        }
        Ok(read)
    }
}

/// A view on the contents of a single entry of a [`TarStream`].
///
/// The view borrows the stream it reads from; dropping it leaves the stream, and the source it
/// reads from, open so that it can be reused for later entries.
pub struct EntryReader<'a, R: Read> {
    stream: &'a mut TarStream<R>,
}

impl<'a, R: Read> EntryReader<'a, R> {
    pub(crate) fn new(stream: &'a mut TarStream<R>) -> Self {
        Self { stream }
    }

    /// The number of content bytes that have not been read yet.
    pub fn remaining(&self) -> u64 {
        match &self.stream.state {
            State::InEntry { remaining, .. } => *remaining,
            _ => 0,
        }
    }

    /// Reads all remaining content into a vector, reporting malformed data as a
    /// [`TarFileError::TarFormat`].
    pub fn read_all(&mut self) -> Result<Vec<u8>, TarFileError> {
        let mut data = Vec::with_capacity(usize::try_from(self.remaining()).unwrap_or(0));
        self.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Copies all remaining content into `writer`.
    pub fn copy_to(&mut self, writer: &mut impl Write) -> Result<u64, TarFileError> {
        Ok(std::io::copy(self, writer)?)
    }
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}
