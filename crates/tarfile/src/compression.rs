//! Detection, decoding and encoding of the compression formats that can wrap a tar stream.

use std::fmt::{Display, Formatter};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::source::ByteSource;
use crate::TarFileError;

/// The compression format that wraps a tar stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// A plain `.tar` stream.
    #[default]
    None,
    /// A gzip compressed `.tar.gz` stream.
    Gzip,
    /// A bzip2 compressed `.tar.bz2` stream.
    Bzip2,
}

/// The order in which compression formats are probed when opening a source.
const PROBE_ORDER: [Compression; 2] = [Compression::Gzip, Compression::Bzip2];

impl Compression {
    /// Returns the compression that belongs to one of the numeric modes `0` (uncompressed),
    /// `1` (gzip) or `2` (bzip2).
    pub fn from_mode(mode: u8) -> Result<Self, TarFileError> {
        match mode {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Bzip2),
            _ => Err(TarFileError::InvalidArgument(format!(
                "unknown compression mode {mode}"
            ))),
        }
    }

    /// Determines the compression from the extension of a file name, e.g. `archive.tar.gz` or
    /// `archive.tbz2`. Returns `None` if the name does not look like a tar archive.
    pub fn from_file_name(path: impl AsRef<Path>) -> Option<Self> {
        let file_name = path.as_ref().file_name()?.to_str()?.to_ascii_lowercase();
        if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
            Some(Compression::Gzip)
        } else if file_name.ends_with(".tar.bz2")
            || file_name.ends_with(".tbz2")
            || file_name.ends_with(".tbz")
        {
            Some(Compression::Bzip2)
        } else if file_name.ends_with(".tar") {
            Some(Compression::None)
        } else {
            None
        }
    }

    /// The bytes every stream in this format starts with.
    fn magic(self) -> &'static [u8] {
        match self {
            Compression::None => &[],
            Compression::Gzip => &[0x1f, 0x8b],
            Compression::Bzip2 => b"BZh",
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
        }
    }
}

impl FromStr for Compression {
    type Err = TarFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "tar" | "uncompressed" => Ok(Compression::None),
            "gzip" | "gz" | "tgz" => Ok(Compression::Gzip),
            "bzip2" | "bz2" | "tbz2" => Ok(Compression::Bzip2),
            _ => Err(TarFileError::InvalidArgument(format!(
                "unknown compression mode '{s}'"
            ))),
        }
    }
}

/// Select the compression level to use when writing an archive
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Use the lowest compression level (gzip: 1, bzip2: 1)
    Lowest,
    /// Use the highest compression level (gzip: 9, bzip2: 9)
    Highest,
    /// Use the default compression level (gzip: 6, bzip2: 9)
    #[default]
    Default,
    /// Use a numeric compression level (gzip: 0-9, bzip2: 1-9)
    Numeric(u32),
}

impl CompressionLevel {
    fn to_gzip_level(self) -> Result<flate2::Compression, TarFileError> {
        match self {
            CompressionLevel::Lowest => Ok(flate2::Compression::new(1)),
            CompressionLevel::Highest => Ok(flate2::Compression::new(9)),
            CompressionLevel::Default => Ok(flate2::Compression::new(6)),
            CompressionLevel::Numeric(n) => {
                if n > 9 {
                    Err(TarFileError::InvalidArgument(String::from(
                        "gzip compression level must be between 0 and 9",
                    )))
                } else {
                    Ok(flate2::Compression::new(n))
                }
            }
        }
    }

    fn to_bzip2_level(self) -> Result<bzip2::Compression, TarFileError> {
        match self {
            CompressionLevel::Lowest => Ok(bzip2::Compression::new(1)),
            CompressionLevel::Highest => Ok(bzip2::Compression::new(9)),
            CompressionLevel::Default => Ok(bzip2::Compression::new(9)),
            CompressionLevel::Numeric(n) => {
                if !(1..=9).contains(&n) {
                    Err(TarFileError::InvalidArgument(String::from(
                        "bzip2 compression level must be between 1 and 9",
                    )))
                } else {
                    Ok(bzip2::Compression::new(n))
                }
            }
        }
    }

    /// Checks that this level can be used with the given compression.
    pub fn validate(self, compression: Compression) -> Result<(), TarFileError> {
        match compression {
            Compression::None => Ok(()),
            Compression::Gzip => self.to_gzip_level().map(|_| ()),
            Compression::Bzip2 => self.to_bzip2_level().map(|_| ()),
        }
    }
}

/// A decompressed view over a reader obtained from a [`ByteSource`].
pub enum Decompressed<R: Read> {
    /// The source was not compressed.
    Raw(BufReader<R>),
    /// The source was gzip compressed.
    Gzip(BufReader<flate2::bufread::MultiGzDecoder<BufReader<R>>>),
    /// The source was bzip2 compressed.
    Bzip2(BufReader<bzip2::bufread::MultiBzDecoder<BufReader<R>>>),
}

impl<R: Read> Decompressed<R> {
    fn new(compression: Compression, reader: BufReader<R>) -> Self {
        match compression {
            Compression::None => Decompressed::Raw(reader),
            Compression::Gzip => Decompressed::Gzip(BufReader::new(
                flate2::bufread::MultiGzDecoder::new(reader),
            )),
            Compression::Bzip2 => Decompressed::Bzip2(BufReader::new(
                bzip2::bufread::MultiBzDecoder::new(reader),
            )),
        }
    }

    /// Returns the compression of the underlying source.
    pub fn compression(&self) -> Compression {
        match self {
            Decompressed::Raw(_) => Compression::None,
            Decompressed::Gzip(_) => Compression::Gzip,
            Decompressed::Bzip2(_) => Compression::Bzip2,
        }
    }
}

impl<R: Read> Read for Decompressed<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Decompressed::Raw(reader) => reader.read(buf),
            Decompressed::Gzip(reader) => reader.read(buf),
            Decompressed::Bzip2(reader) => reader.read(buf),
        }
    }
}

impl<R: Read> BufRead for Decompressed<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            Decompressed::Raw(reader) => reader.fill_buf(),
            Decompressed::Gzip(reader) => reader.fill_buf(),
            Decompressed::Bzip2(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Decompressed::Raw(reader) => reader.consume(amt),
            Decompressed::Gzip(reader) => reader.consume(amt),
            Decompressed::Bzip2(reader) => reader.consume(amt),
        }
    }
}

/// The outcome of probing a source for a single compression format.
enum Probe<T> {
    /// The source is compressed with the probed format.
    Detected(T),
    /// The source is not compressed with the probed format.
    Mismatch,
}

/// Opens the source and returns its decompressed contents.
///
/// Every supported compression format is probed in order by opening a fresh reader, checking the
/// magic bytes and decoding the first chunk of data. A source that matches none of the formats is
/// returned as-is. Only a single reader remains open when this function returns.
///
/// An error is only returned if the source itself cannot be opened or read.
pub fn open_decompressed<S: ByteSource + ?Sized>(
    source: &S,
) -> std::io::Result<Decompressed<S::Reader>> {
    for compression in PROBE_ORDER {
        match probe(source, compression)? {
            Probe::Detected(stream) => {
                tracing::debug!("detected {compression} compressed tar stream");
                return Ok(stream);
            }
            Probe::Mismatch => {
                tracing::trace!("source is not {compression} compressed");
            }
        }
    }

    tracing::debug!("treating source as an uncompressed tar stream");
    Ok(Decompressed::new(
        Compression::None,
        BufReader::new(source.open()?),
    ))
}

fn probe<S: ByteSource + ?Sized>(
    source: &S,
    compression: Compression,
) -> std::io::Result<Probe<Decompressed<S::Reader>>> {
    let mut reader = BufReader::new(source.open()?);
    if !reader.fill_buf()?.starts_with(compression.magic()) {
        return Ok(Probe::Mismatch);
    }

    let mut stream = Decompressed::new(compression, reader);
    match stream.fill_buf() {
        Ok(_) => Ok(Probe::Detected(stream)),
        Err(err) if is_format_mismatch(&err) => {
            tracing::trace!("{compression} magic found but decoding failed: {err}");
            Ok(Probe::Mismatch)
        }
        Err(err) => Err(err),
    }
}

/// Decoders report data they do not understand with one of these kinds. Anything else is a
/// failure of the underlying source.
fn is_format_mismatch(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData
            | std::io::ErrorKind::UnexpectedEof
    )
}

/// Compresses everything written to it with the selected format.
pub enum Encoder<W: Write> {
    /// Bytes are passed through unchanged.
    None(W),
    /// Bytes are gzip compressed.
    Gzip(flate2::write::GzEncoder<W>),
    /// Bytes are bzip2 compressed.
    Bzip2(bzip2::write::BzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    /// Wraps the writer in an encoder for the given compression.
    pub fn new(
        writer: W,
        compression: Compression,
        level: CompressionLevel,
    ) -> Result<Self, TarFileError> {
        Ok(match compression {
            Compression::None => Encoder::None(writer),
            Compression::Gzip => {
                Encoder::Gzip(flate2::write::GzEncoder::new(writer, level.to_gzip_level()?))
            }
            Compression::Bzip2 => {
                Encoder::Bzip2(bzip2::write::BzEncoder::new(writer, level.to_bzip2_level()?))
            }
        })
    }

    /// Writes the trailer of the compressed stream and returns the inner writer.
    pub fn finish(self) -> std::io::Result<W> {
        match self {
            Encoder::None(writer) => Ok(writer),
            Encoder::Gzip(encoder) => encoder.finish(),
            Encoder::Bzip2(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Encoder::None(writer) => writer.write(buf),
            Encoder::Gzip(encoder) => encoder.write(buf),
            Encoder::Bzip2(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Encoder::None(writer) => writer.flush(),
            Encoder::Gzip(encoder) => encoder.flush(),
            Encoder::Bzip2(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use std::sync::Arc;

    fn compress(compression: Compression, data: &[u8]) -> Arc<[u8]> {
        let mut encoder = Encoder::new(Vec::new(), compression, CompressionLevel::Default).unwrap();
        encoder.write_all(data).unwrap();
        Arc::from(encoder.finish().unwrap())
    }

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Gzip)]
    #[case(Compression::Bzip2)]
    fn test_sniff_detects_compression(#[case] compression: Compression) {
        let source = compress(compression, &[7u8; 2048]);
        let mut stream = open_decompressed(&source).unwrap();
        assert_eq!(stream.compression(), compression);

        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, vec![7u8; 2048]);
    }

    #[test]
    fn test_fake_magic_falls_through_to_raw() {
        // Starts with the bzip2 magic but is not a bzip2 stream.
        let source: Arc<[u8]> = Arc::from(&b"BZh-not-really-bzip2"[..]);
        let mut stream = open_decompressed(&source).unwrap();
        assert_eq!(stream.compression(), Compression::None);

        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"BZh-not-really-bzip2");
    }

    #[test]
    fn test_empty_source_is_uncompressed() {
        let source: Arc<[u8]> = Arc::from(Vec::new());
        let stream = open_decompressed(&source).unwrap();
        assert_eq!(stream.compression(), Compression::None);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.tar.gz");
        let err = open_decompressed(&path).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[rstest]
    #[case("a.tar", Some(Compression::None))]
    #[case("a.tar.gz", Some(Compression::Gzip))]
    #[case("A.TGZ", Some(Compression::Gzip))]
    #[case("dir/a.tar.bz2", Some(Compression::Bzip2))]
    #[case("a.tbz2", Some(Compression::Bzip2))]
    #[case("a.zip", None)]
    fn test_from_file_name(#[case] name: &str, #[case] expected: Option<Compression>) {
        assert_eq!(Compression::from_file_name(name), expected);
    }

    #[test]
    fn test_unknown_modes_are_invalid() {
        assert_matches!(Compression::from_mode(3), Err(TarFileError::InvalidArgument(_)));
        assert_matches!(
            "xz".parse::<Compression>(),
            Err(TarFileError::InvalidArgument(_))
        );
        assert_eq!("GZ".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!(Compression::from_mode(2).unwrap(), Compression::Bzip2);
    }

    #[test]
    fn test_level_validation() {
        assert!(CompressionLevel::Numeric(0).validate(Compression::Gzip).is_ok());
        assert_matches!(
            CompressionLevel::Numeric(0).validate(Compression::Bzip2),
            Err(TarFileError::InvalidArgument(_))
        );
        assert_matches!(
            CompressionLevel::Numeric(10).validate(Compression::Gzip),
            Err(TarFileError::InvalidArgument(_))
        );
        assert!(CompressionLevel::Numeric(42).validate(Compression::None).is_ok());
    }
}
