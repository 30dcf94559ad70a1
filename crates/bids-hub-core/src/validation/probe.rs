//! Header probes for sampled payload files
//!
//! Only the fixed-size header is read; payload bytes are never decoded.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

const NIFTI1_HEADER_LEN: usize = 348;
const NIFTI2_HEADER_LEN: usize = 540;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("header truncated")]
    Truncated,

    #[error("unrecognized sizeof_hdr {0}")]
    UnknownHeaderSize(i32),

    #[error("bad magic {0:?}")]
    BadMagic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiftiVersion {
    Nifti1,
    Nifti2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub version: NiftiVersion,
    pub big_endian: bool,
    pub compressed: bool,
    /// `dim[1..=dim[0]]`
    pub dims: Vec<i64>,
}

/// Attempt to open and parse a payload header
pub trait HeaderProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<HeaderInfo, ProbeError>;
}

/// NIfTI-1 / NIfTI-2, raw or gzip-compressed, either byte order
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiHeaderProbe;

impl HeaderProbe for NiftiHeaderProbe {
    fn probe(&self, path: &Path) -> Result<HeaderInfo, ProbeError> {
        let mut magic = [0u8; 2];
        let compressed = match File::open(path)?.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ProbeError::Truncated),
            Err(e) => return Err(e.into()),
        };

        let file = File::open(path)?;
        let mut reader: Box<dyn Read> = if compressed {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut header = vec![0u8; NIFTI1_HEADER_LEN];
        read_full(&mut reader, &mut header)?;

        let raw: [u8; 4] = [header[0], header[1], header[2], header[3]];
        let (version, big_endian) = match (i32::from_le_bytes(raw), i32::from_be_bytes(raw)) {
            (348, _) => (NiftiVersion::Nifti1, false),
            (_, 348) => (NiftiVersion::Nifti1, true),
            (540, _) => (NiftiVersion::Nifti2, false),
            (_, 540) => (NiftiVersion::Nifti2, true),
            (le, _) => return Err(ProbeError::UnknownHeaderSize(le)),
        };

        if version == NiftiVersion::Nifti2 {
            header.resize(NIFTI2_HEADER_LEN, 0);
            read_full(&mut reader, &mut header[NIFTI1_HEADER_LEN..])?;
        }

        let dims = match version {
            NiftiVersion::Nifti1 => {
                check_magic(&header[344..348], &[b"n+1\0", b"ni1\0"])?;
                (0..8)
                    .map(|i| {
                        let at = 40 + i * 2;
                        let b = [header[at], header[at + 1]];
                        i64::from(if big_endian { i16::from_be_bytes(b) } else { i16::from_le_bytes(b) })
                    })
                    .collect::<Vec<_>>()
            },
            NiftiVersion::Nifti2 => {
                check_magic(&header[4..8], &[b"n+2\0", b"ni2\0"])?;
                (0..8)
                    .map(|i| {
                        let at = 16 + i * 8;
                        let mut b = [0u8; 8];
                        b.copy_from_slice(&header[at..at + 8]);
                        if big_endian { i64::from_be_bytes(b) } else { i64::from_le_bytes(b) }
                    })
                    .collect::<Vec<_>>()
            },
        };

        let ndim = dims[0].clamp(0, 7) as usize;
        Ok(HeaderInfo {
            version,
            big_endian,
            compressed,
            dims: dims[1..=ndim].to_vec(),
        })
    }
}

fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> Result<(), ProbeError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ProbeError::Truncated,
        _ => ProbeError::Io(e),
    })
}

fn check_magic(found: &[u8], accepted: &[&[u8; 4]]) -> Result<(), ProbeError> {
    if accepted.iter().any(|m| m.as_slice() == found) {
        Ok(())
    } else {
        Err(ProbeError::BadMagic(String::from_utf8_lossy(found).into_owned()))
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::fixtures::{gzip, nifti1_header};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_gzipped_nifti1() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub-1_T1w.nii.gz");
        std::fs::write(&path, gzip(&nifti1_header(&[64, 64, 32]))).unwrap();

        let info = NiftiHeaderProbe.probe(&path).unwrap();
        assert_eq!(info.version, NiftiVersion::Nifti1);
        assert!(info.compressed);
        assert!(!info.big_endian);
        assert_eq!(info.dims, vec![64, 64, 32]);
    }

    #[test]
    fn test_probe_big_endian_nifti2() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.nii");
        let mut header = vec![0u8; 544];
        header[0..4].copy_from_slice(&540i32.to_be_bytes());
        header[4..8].copy_from_slice(b"n+2\0");
        header[16..24].copy_from_slice(&2i64.to_be_bytes());
        header[24..32].copy_from_slice(&10i64.to_be_bytes());
        header[32..40].copy_from_slice(&12i64.to_be_bytes());
        std::fs::write(&path, &header).unwrap();

        let info = NiftiHeaderProbe.probe(&path).unwrap();
        assert_eq!(info.version, NiftiVersion::Nifti2);
        assert!(info.big_endian);
        assert_eq!(info.dims, vec![10, 12]);
    }

    #[test]
    fn test_probe_rejects_truncated_and_garbage() {
        let dir = TempDir::new().unwrap();
        let truncated = dir.path().join("t.nii.gz");
        std::fs::write(&truncated, gzip(&nifti1_header(&[4])[..100])).unwrap();
        assert!(matches!(NiftiHeaderProbe.probe(&truncated), Err(ProbeError::Truncated)));

        let garbage = dir.path().join("g.nii");
        std::fs::write(&garbage, vec![7u8; 400]).unwrap();
        assert!(matches!(
            NiftiHeaderProbe.probe(&garbage),
            Err(ProbeError::UnknownHeaderSize(_))
        ));

        let empty = dir.path().join("e.nii.gz");
        std::fs::write(&empty, b"").unwrap();
        assert!(NiftiHeaderProbe.probe(&empty).is_err());
    }
}
