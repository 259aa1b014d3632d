// ABOUTME: Streaming compression codecs for dump files
// ABOUTME: Resolves gzip/xz/zstd from an explicit option or the file suffix

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Supported dump compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl Codec {
    /// Resolve a codec from a file suffix. Unrecognized suffixes mean
    /// uncompressed.
    pub fn from_path(path: &Path) -> Codec {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("gz") | Some("gzip") => Codec::Gzip,
            Some("xz") => Codec::Xz,
            Some("zst") | Some("zstd") => Codec::Zstd,
            _ => Codec::None,
        }
    }

    /// Resolve a codec from an explicit name, as given on a command line.
    pub fn from_name(name: &str) -> Option<Codec> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Codec::None),
            "gzip" | "gz" => Some(Codec::Gzip),
            "xz" => Some(Codec::Xz),
            "zstd" | "zst" => Some(Codec::Zstd),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Gzip => "gzip",
            Codec::Xz => "xz",
            Codec::Zstd => "zstd",
        }
    }
}

/// Open a dump file for reading, decompressing on the fly.
///
/// Decompression is fully streaming: memory use is bounded by the buffer
/// size, not the file size. A corrupt stream surfaces as an I/O error from
/// a later read, which aborts the whole operation.
pub fn open_reader(path: &Path, codec: Option<Codec>) -> io::Result<Box<dyn BufRead + Send>> {
    let codec = codec.unwrap_or_else(|| Codec::from_path(path));
    let file = File::open(path)?;
    let reader: Box<dyn Read + Send> = match codec {
        Codec::None => Box::new(file),
        Codec::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        Codec::Xz => Box::new(xz2::read::XzDecoder::new(file)),
        Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(file)?),
    };
    Ok(Box::new(BufReader::with_capacity(256 * 1024, reader)))
}

enum SinkInner {
    Plain(BufWriter<File>),
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    Xz(xz2::write::XzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

/// A compressing byte sink with an explicit `finish`.
///
/// Encoders write stream trailers when finished; relying on Drop would
/// swallow the error, so callers finish the sink themselves.
pub struct ByteSink {
    inner: SinkInner,
}

impl ByteSink {
    pub fn create(path: &Path, codec: Codec) -> io::Result<ByteSink> {
        let file = BufWriter::with_capacity(256 * 1024, File::create(path)?);
        let inner = match codec {
            Codec::None => SinkInner::Plain(file),
            Codec::Gzip => SinkInner::Gzip(flate2::write::GzEncoder::new(
                file,
                flate2::Compression::default(),
            )),
            Codec::Xz => SinkInner::Xz(xz2::write::XzEncoder::new(file, 6)),
            Codec::Zstd => SinkInner::Zstd(zstd::stream::write::Encoder::new(file, 0)?),
        };
        Ok(ByteSink { inner })
    }

    /// Flush the stream and write the codec trailer.
    pub fn finish(self) -> io::Result<()> {
        match self.inner {
            SinkInner::Plain(mut w) => w.flush(),
            SinkInner::Gzip(enc) => enc.finish()?.flush(),
            SinkInner::Xz(enc) => enc.finish()?.flush(),
            SinkInner::Zstd(enc) => enc.finish()?.flush(),
        }
    }
}

impl Write for ByteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            SinkInner::Plain(w) => w.write(buf),
            SinkInner::Gzip(w) => w.write(buf),
            SinkInner::Xz(w) => w.write(buf),
            SinkInner::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            SinkInner::Plain(w) => w.flush(),
            SinkInner::Gzip(w) => w.flush(),
            SinkInner::Xz(w) => w.flush(),
            SinkInner::Zstd(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_codec_from_path_suffixes() {
        assert_eq!(Codec::from_path(&PathBuf::from("dump.sql.gz")), Codec::Gzip);
        assert_eq!(Codec::from_path(&PathBuf::from("dump.GZIP")), Codec::Gzip);
        assert_eq!(Codec::from_path(&PathBuf::from("dump.sql.xz")), Codec::Xz);
        assert_eq!(Codec::from_path(&PathBuf::from("dump.zst")), Codec::Zstd);
        assert_eq!(Codec::from_path(&PathBuf::from("dump.zstd")), Codec::Zstd);
        assert_eq!(Codec::from_path(&PathBuf::from("dump.sql")), Codec::None);
        assert_eq!(Codec::from_path(&PathBuf::from("dump")), Codec::None);
    }

    #[test]
    fn test_codec_from_name() {
        assert_eq!(Codec::from_name("gzip"), Some(Codec::Gzip));
        assert_eq!(Codec::from_name("ZSTD"), Some(Codec::Zstd));
        assert_eq!(Codec::from_name("none"), Some(Codec::None));
        assert_eq!(Codec::from_name("brotli"), None);
    }

    fn roundtrip(codec: Codec, payload: &[u8]) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");

        let mut sink = ByteSink::create(&path, codec).unwrap();
        sink.write_all(payload).unwrap();
        sink.finish().unwrap();

        let mut reader = open_reader(&path, Some(codec)).unwrap();
        let mut back = Vec::new();
        reader.read_to_end(&mut back).unwrap();
        assert_eq!(back, payload, "round-trip failed for {:?}", codec);
    }

    #[test]
    fn test_roundtrip_empty_input() {
        for codec in [Codec::None, Codec::Gzip, Codec::Xz, Codec::Zstd] {
            roundtrip(codec, b"");
        }
    }

    #[test]
    fn test_roundtrip_multi_buffer_input() {
        // Larger than the internal 256 KiB buffers to force several fills.
        let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
        for codec in [Codec::None, Codec::Gzip, Codec::Xz, Codec::Zstd] {
            roundtrip(codec, &payload);
        }
    }

    #[test]
    fn test_suffix_resolution_used_when_no_explicit_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql.gz");

        let mut sink = ByteSink::create(&path, Codec::Gzip).unwrap();
        sink.write_all(b"SELECT 1;").unwrap();
        sink.finish().unwrap();

        // No explicit codec: the .gz suffix must win.
        let mut reader = open_reader(&path, None).unwrap();
        let mut back = String::new();
        reader.read_to_string(&mut back).unwrap();
        assert_eq!(back, "SELECT 1;");
    }
}
