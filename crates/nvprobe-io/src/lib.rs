//! # nvprobe-io
//!
//! Write-then-read round trip against a file or block device node.
//!
//! The probe writes a fixed payload to the target, reopens it, reads the same
//! number of bytes back and hands the result to the caller. Every failure is
//! returned as a [`ProbeError`] naming the target path; nothing is retried.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use nvprobe_config::log_probe_debug;
use thiserror::Error;

pub use nvprobe_config::DEFAULT_FILE_MODE;

/// Bytes written to the target on every probe.
pub const PAYLOAD: &[u8] = b"Excelero NVMesh";

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to sync {}: {source}", path.display())]
    Sync {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {} for reading: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("short read from {}: expected {expected} bytes, got {actual}", path.display())]
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("content read from {} differs from payload at byte {offset}", path.display())]
    Mismatch { path: PathBuf, offset: usize },
}

/// Coarse classification of a [`ProbeError`], used for exit status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    Io,
    ShortRead,
    Mismatch,
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::Write { .. }
            | ProbeError::Sync { .. }
            | ProbeError::Open { .. }
            | ProbeError::Read { .. } => ProbeErrorKind::Io,
            ProbeError::ShortRead { .. } => ProbeErrorKind::ShortRead,
            ProbeError::Mismatch { .. } => ProbeErrorKind::Mismatch,
        }
    }

    /// Target path the failing operation was addressed to.
    pub fn path(&self) -> &Path {
        match self {
            ProbeError::Write { path, .. }
            | ProbeError::Sync { path, .. }
            | ProbeError::Open { path, .. }
            | ProbeError::Read { path, .. }
            | ProbeError::ShortRead { path, .. }
            | ProbeError::Mismatch { path, .. } => path,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Knobs for a single probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Permission bits used when the target is created
    pub mode: u32,
    /// `fsync` the target after writing
    pub sync: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            mode: DEFAULT_FILE_MODE,
            sync: false,
        }
    }
}

/// Bytes obtained from the target after the write step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBack {
    pub requested: usize,
    pub data: Vec<u8>,
}

impl ReadBack {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when as many bytes came back as were asked for.
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.requested
    }

    pub fn matches(&self, expected: &[u8]) -> bool {
        self.data == expected
    }

    pub fn as_lossy_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Create or truncate `path` and write `payload` to it.
pub fn write_payload(path: &Path, payload: &[u8], opts: &ProbeOptions) -> Result<()> {
    let write_err = |source| ProbeError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(opts.mode);
    }

    let mut file = options.open(path).map_err(write_err)?;
    file.write_all(payload).map_err(write_err)?;

    if opts.sync {
        file.sync_all().map_err(|source| ProbeError::Sync {
            path: path.to_path_buf(),
            source,
        })?;
    }

    log_probe_debug!("Payload written", bytes = payload.len(), sync = opts.sync);
    Ok(())
}

/// Open `path` and read up to `len` bytes into a fresh buffer.
///
/// Stops early only at end of file. A short count is not an error here; use
/// [`verify`] to enforce it.
pub fn read_back(path: &Path, len: usize) -> Result<ReadBack> {
    let mut file = File::open(path).map_err(|source| ProbeError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut data = vec![0u8; len];
    let filled = fill_buf(&mut file, &mut data).map_err(|source| ProbeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    data.truncate(filled);

    log_probe_debug!("Read back", requested = len, actual = filled);
    Ok(ReadBack {
        requested: len,
        data,
    })
}

/// Reads until `buf` is full or the reader reports EOF.
fn fill_buf<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Check that `read` holds exactly `expected`.
pub fn verify(path: &Path, expected: &[u8], read: &ReadBack) -> Result<()> {
    if read.len() != expected.len() {
        return Err(ProbeError::ShortRead {
            path: path.to_path_buf(),
            expected: expected.len(),
            actual: read.len(),
        });
    }

    if let Some(offset) = read
        .data
        .iter()
        .zip(expected)
        .position(|(got, want)| got != want)
    {
        return Err(ProbeError::Mismatch {
            path: path.to_path_buf(),
            offset,
        });
    }

    Ok(())
}

/// Write `payload` to `path` and read the same number of bytes back.
///
/// Verification is left to the caller so the read result can be reported
/// before a mismatch is.
pub fn round_trip(path: &Path, payload: &[u8], opts: &ProbeOptions) -> Result<ReadBack> {
    write_payload(path, payload, opts)?;
    read_back(path, payload.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Hands out at most `chunk` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
        interrupt_once: bool,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupt_once {
                self.interrupt_once = false;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_default_mode_matches_config_default() {
        assert_eq!(ProbeOptions::default().mode, 0o644);
        assert_eq!(
            ProbeOptions::default().mode,
            nvprobe_config::ProbeConfig::default().file_mode
        );
    }

    #[test]
    fn test_payload_is_fifteen_bytes() {
        assert_eq!(PAYLOAD.len(), 15);
        assert_eq!(PAYLOAD, b"Excelero NVMesh");
    }

    #[test]
    fn test_fill_buf_collects_partial_reads() {
        let mut reader = Trickle {
            data: PAYLOAD,
            chunk: 4,
            interrupt_once: true,
        };
        let mut buf = [0u8; 15];
        let n = fill_buf(&mut reader, &mut buf).unwrap();
        assert_eq!(n, 15);
        assert_eq!(&buf, PAYLOAD);
    }

    #[test]
    fn test_fill_buf_stops_at_eof() {
        let mut reader = Trickle {
            data: b"Excel",
            chunk: 2,
            interrupt_once: false,
        };
        let mut buf = [0u8; 15];
        assert_eq!(fill_buf(&mut reader, &mut buf).unwrap(), 5);
    }

    #[test]
    fn test_round_trip_regular_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("testfile");

        let read = round_trip(&target, PAYLOAD, &ProbeOptions::default()).unwrap();

        assert!(read.is_complete());
        assert!(read.matches(PAYLOAD));
        assert_eq!(read.as_lossy_str(), "Excelero NVMesh");
        verify(&target, PAYLOAD, &read).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), PAYLOAD);
    }

    #[test]
    fn test_write_truncates_existing_content() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("testfile");
        std::fs::write(&target, vec![b'x'; 64]).unwrap();

        write_payload(&target, PAYLOAD, &ProbeOptions::default()).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), PAYLOAD);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_applies_mode_on_create() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let target = dir.path().join("testfile");
        let opts = ProbeOptions {
            mode: 0o600,
            ..ProbeOptions::default()
        };

        write_payload(&target, PAYLOAD, &opts).unwrap();

        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        // umask can only clear bits
        assert_eq!(mode & 0o077, 0);
        assert_eq!(mode & 0o600, 0o600);
    }

    #[test]
    fn test_write_with_sync() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("testfile");
        let opts = ProbeOptions {
            sync: true,
            ..ProbeOptions::default()
        };
        write_payload(&target, PAYLOAD, &opts).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), PAYLOAD);
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("missing").join("testfile");

        let err = write_payload(&target, PAYLOAD, &ProbeOptions::default()).unwrap_err();

        assert!(matches!(err, ProbeError::Write { .. }));
        assert_eq!(err.kind(), ProbeErrorKind::Io);
        assert_eq!(err.path(), target.as_path());
    }

    #[test]
    fn test_read_back_missing_file_is_open_error() {
        let dir = tempdir().unwrap();
        let err = read_back(&dir.path().join("nope"), 15).unwrap_err();
        assert!(matches!(err, ProbeError::Open { .. }));
    }

    #[test]
    fn test_read_back_reports_short_count() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("short");
        std::fs::write(&target, b"Excel").unwrap();

        let read = read_back(&target, PAYLOAD.len()).unwrap();

        assert_eq!(read.len(), 5);
        assert!(!read.is_complete());
        let err = verify(&target, PAYLOAD, &read).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::ShortRead {
                expected: 15,
                actual: 5,
                ..
            }
        ));
        assert_eq!(err.kind(), ProbeErrorKind::ShortRead);
    }

    #[test]
    fn test_read_back_stops_at_requested_length() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("long");
        std::fs::write(&target, b"Excelero NVMesh and then some").unwrap();

        let read = read_back(&target, PAYLOAD.len()).unwrap();

        assert!(read.is_complete());
        verify(&target, PAYLOAD, &read).unwrap();
    }

    #[test]
    fn test_verify_reports_first_differing_offset() {
        let read = ReadBack {
            requested: 15,
            data: b"Excelero NVMasH".to_vec(),
        };
        let err = verify(Path::new("/dev/fake"), PAYLOAD, &read).unwrap_err();
        match err {
            ProbeError::Mismatch { offset, .. } => assert_eq!(offset, 12),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_message_names_path() {
        let err = ProbeError::ShortRead {
            path: PathBuf::from("/dev/nvme0n1"),
            expected: 15,
            actual: 0,
        };
        assert_eq!(
            err.to_string(),
            "short read from /dev/nvme0n1: expected 15 bytes, got 0"
        );
    }
}
