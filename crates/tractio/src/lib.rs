//! TRACTIO: small dependency-light readers for tractography inputs.
//!
//! - `trk`: TrackVis `.trk` streamline files (read and write).
//! - `nifti`: single-file NIfTI-1 scalar volumes (`.nii`, `.nii.gz`).
//!
//! Both parsers work on a contiguous byte slice; `read_file` helpers map or read the
//! whole file first. Malformed input is reported as `io::ErrorKind::InvalidData`,
//! truncated input as `io::ErrorKind::UnexpectedEof`.

use std::io::{self, ErrorKind};

pub mod nifti;
pub mod trk;

pub use nifti::{parse_nifti_bytes, NiftiDatatype, NiftiVolume};
pub use trk::{parse_trk_bytes, TractRange, TrkFile, TrkHeader};

/// Byte order of a binary header and its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[inline(always)]
pub(crate) fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated input"))
    } else {
        Ok(())
    }
}

#[inline(always)]
pub(crate) fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
pub(crate) fn skip(buf: &mut &[u8], n: usize) -> io::Result<()> {
    take(buf, n).map(|_| ())
}

macro_rules! read_num {
    ($name:ident, $t:ty, $n:expr) => {
        #[inline(always)]
        pub(crate) fn $name(buf: &mut &[u8], order: ByteOrder) -> io::Result<$t> {
            let mut raw = [0u8; $n];
            raw.copy_from_slice(take(buf, $n)?);
            Ok(match order {
                ByteOrder::Little => <$t>::from_le_bytes(raw),
                ByteOrder::Big => <$t>::from_be_bytes(raw),
            })
        }
    };
}

read_num!(rd_i16, i16, 2);
read_num!(rd_i32, i32, 4);
read_num!(rd_f32, f32, 4);
read_num!(rd_f64, f64, 8);

#[cold]
pub(crate) fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// NUL-terminated fixed-width ASCII field to an owned string.
pub(crate) fn fixed_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(feature = "mmap")]
pub(crate) fn with_file_bytes<P, T, F>(path: P, parse: F) -> io::Result<T>
where
    P: AsRef<std::path::Path>,
    F: FnOnce(&[u8]) -> io::Result<T>,
{
    let file = std::fs::File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse(&map)
}

#[cfg(not(feature = "mmap"))]
pub(crate) fn with_file_bytes<P, T, F>(path: P, parse: F) -> io::Result<T>
where
    P: AsRef<std::path::Path>,
    F: FnOnce(&[u8]) -> io::Result<T>,
{
    let bytes = std::fs::read(path)?;
    parse(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_honour_byte_order() {
        let mut le: &[u8] = &[0x01, 0x02];
        let mut be: &[u8] = &[0x01, 0x02];
        assert_eq!(rd_i16(&mut le, ByteOrder::Little).unwrap(), 0x0201);
        assert_eq!(rd_i16(&mut be, ByteOrder::Big).unwrap(), 0x0102);
        assert!(le.is_empty() && be.is_empty());
    }

    #[test]
    fn take_past_end_is_eof() {
        let mut p: &[u8] = &[1, 2, 3];
        let err = take(&mut p, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn fixed_str_stops_at_nul() {
        assert_eq!(fixed_str(b"FA\0\0junk"), "FA");
        assert_eq!(fixed_str(b"abc"), "abc");
    }
}
