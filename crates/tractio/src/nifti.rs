//! NIfTI-1 single-file scalar volumes (`.nii`, optionally gzip-compressed).
//!
//! Only the fields needed to pull the first 3D frame out are decoded:
//!   000 : i32     sizeof_hdr = 348 (also selects byte order)
//!   040 : i16[8]  dim
//!   070 : i16     datatype
//!   072 : i16     bitpix
//!   076 : f32[8]  pixdim
//!   108 : f32     vox_offset
//!   112 : f32     scl_slope
//!   116 : f32     scl_inter
//!   344 : [u8;4]  magic = "n+1\0"

use crate::{bad, need, rd_f32, rd_f64, rd_i16, rd_i32, skip, take, with_file_bytes, ByteOrder};
use std::io;
use std::path::Path;

pub const NIFTI1_HEADER_SIZE: usize = 348;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiftiDatatype {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl NiftiDatatype {
    fn from_code(code: i16) -> io::Result<Self> {
        Ok(match code {
            2 => Self::U8,
            4 => Self::I16,
            8 => Self::I32,
            16 => Self::F32,
            64 => Self::F64,
            256 => Self::I8,
            512 => Self::U16,
            768 => Self::U32,
            x => return Err(bad(&format!("unsupported NIfTI datatype {}", x))),
        })
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NiftiVolume {
    /// Voxel counts along x, y, z.
    pub dims: [usize; 3],
    /// Voxel spacing along x, y, z.
    pub pixdim: [f32; 3],
    pub datatype: NiftiDatatype,
    /// Scaled voxel values, x fastest.
    pub data: Vec<f32>,
}

impl NiftiVolume {
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }
}

/// Strip a gzip member and inflate its deflate stream.
fn gunzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut p = bytes;
    let head = take(&mut p, 10)?;
    if head[..2] != GZIP_MAGIC || head[2] != 8 {
        return Err(bad("not a deflate gzip stream"));
    }
    let flags = head[3];

    if flags & 0x04 != 0 {
        let xlen = rd_i16(&mut p, ByteOrder::Little)? as u16 as usize;
        skip(&mut p, xlen)?;
    }
    for bit in [0x08u8, 0x10] {
        if flags & bit != 0 {
            let end = p
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| bad("unterminated gzip header string"))?;
            skip(&mut p, end + 1)?;
        }
    }
    if flags & 0x02 != 0 {
        skip(&mut p, 2)?;
    }

    miniz_oxide::inflate::decompress_to_vec(p)
        .map_err(|e| bad(&format!("gzip inflate failed: {:?}", e.status)))
}

/// Parse a NIfTI-1 image (raw or gzip) from a contiguous byte slice.
pub fn parse_nifti_bytes(bytes: &[u8]) -> io::Result<NiftiVolume> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let inflated = gunzip(bytes)?;
        return parse_raw(&inflated);
    }
    parse_raw(bytes)
}

fn parse_raw(bytes: &[u8]) -> io::Result<NiftiVolume> {
    need(bytes, NIFTI1_HEADER_SIZE)?;

    let order = {
        let mut le = &bytes[..4];
        let mut be = &bytes[..4];
        if rd_i32(&mut le, ByteOrder::Little)? == NIFTI1_HEADER_SIZE as i32 {
            ByteOrder::Little
        } else if rd_i32(&mut be, ByteOrder::Big)? == NIFTI1_HEADER_SIZE as i32 {
            ByteOrder::Big
        } else {
            return Err(bad("NIfTI sizeof_hdr must be 348"));
        }
    };

    if &bytes[344..347] != b"n+1" {
        return Err(bad("only single-file NIfTI-1 (n+1) is supported"));
    }

    let mut p = &bytes[40..];
    let mut dim = [0i16; 8];
    for d in dim.iter_mut() {
        *d = rd_i16(&mut p, order)?;
    }
    if !(3..=7).contains(&dim[0]) {
        return Err(bad("NIfTI image must have at least three dimensions"));
    }
    if dim[1..4].iter().any(|&d| d <= 0) {
        return Err(bad("NIfTI spatial dimension must be positive"));
    }
    let dims = [dim[1] as usize, dim[2] as usize, dim[3] as usize];

    let mut p = &bytes[70..];
    let datatype = NiftiDatatype::from_code(rd_i16(&mut p, order)?)?;

    let mut p = &bytes[76..];
    let mut pixdim = [0.0f32; 8];
    for v in pixdim.iter_mut() {
        *v = rd_f32(&mut p, order)?;
    }
    let vox_offset = rd_f32(&mut p, order)?;
    let scl_slope = rd_f32(&mut p, order)?;
    let scl_inter = rd_f32(&mut p, order)?;

    // slope 0 (or NaN) means "not scaled"
    let (slope, inter) = if scl_slope == 0.0 || !scl_slope.is_finite() {
        (1.0, 0.0)
    } else {
        (scl_slope, if scl_inter.is_finite() { scl_inter } else { 0.0 })
    };

    let offset = (vox_offset.max(NIFTI1_HEADER_SIZE as f32)) as usize;
    let count = dims[0]
        .checked_mul(dims[1])
        .and_then(|n| n.checked_mul(dims[2]))
        .ok_or_else(|| bad("NIfTI volume size overflow"))?;
    let payload = count
        .checked_mul(datatype.bytes())
        .ok_or_else(|| bad("NIfTI volume size overflow"))?;

    need(bytes, offset)?;
    let mut p = &bytes[offset..];
    let raw = take(&mut p, payload)?;

    let mut data = Vec::<f32>::with_capacity(count);
    let mut rp = raw;
    for _ in 0..count {
        let v = match datatype {
            NiftiDatatype::U8 => take(&mut rp, 1)?[0] as f32,
            NiftiDatatype::I8 => take(&mut rp, 1)?[0] as i8 as f32,
            NiftiDatatype::I16 => rd_i16(&mut rp, order)? as f32,
            NiftiDatatype::U16 => rd_i16(&mut rp, order)? as u16 as f32,
            NiftiDatatype::I32 => rd_i32(&mut rp, order)? as f32,
            NiftiDatatype::U32 => rd_i32(&mut rp, order)? as u32 as f32,
            NiftiDatatype::F32 => rd_f32(&mut rp, order)?,
            NiftiDatatype::F64 => rd_f64(&mut rp, order)? as f32,
        };
        data.push(v * slope + inter);
    }

    Ok(NiftiVolume {
        dims,
        pixdim: [pixdim[1], pixdim[2], pixdim[3]],
        datatype,
        data,
    })
}

/// Reads `.nii` or `.nii.gz`; compression is detected from the content.
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<NiftiVolume> {
    with_file_bytes(path, parse_nifti_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn header(dims: [i16; 3], datatype: i16, slope: f32, inter: f32) -> Vec<u8> {
        let mut h = vec![0u8; 352];
        h[0..4].copy_from_slice(&348i32.to_le_bytes());
        let dim = [3i16, dims[0], dims[1], dims[2], 1, 1, 1, 1];
        for (i, d) in dim.iter().enumerate() {
            h[40 + 2 * i..42 + 2 * i].copy_from_slice(&d.to_le_bytes());
        }
        h[70..72].copy_from_slice(&datatype.to_le_bytes());
        for i in 0..8 {
            h[76 + 4 * i..80 + 4 * i].copy_from_slice(&1.5f32.to_le_bytes());
        }
        h[108..112].copy_from_slice(&352.0f32.to_le_bytes());
        h[112..116].copy_from_slice(&slope.to_le_bytes());
        h[116..120].copy_from_slice(&inter.to_le_bytes());
        h[344..348].copy_from_slice(b"n+1\0");
        h
    }

    #[test]
    fn reads_u8_volume_with_scaling() {
        let mut bytes = header([2, 2, 1], 2, 2.0, 1.0);
        bytes.extend_from_slice(&[0, 1, 2, 3]);

        let vol = parse_nifti_bytes(&bytes).unwrap();
        assert_eq!(vol.dims, [2, 2, 1]);
        assert_eq!(vol.pixdim, [1.5, 1.5, 1.5]);
        assert_eq!(vol.data, vec![1.0, 3.0, 5.0, 7.0]);
        assert_eq!(vol.index(1, 1, 0), 3);
    }

    #[test]
    fn zero_slope_means_unscaled_float() {
        let mut bytes = header([1, 1, 2], 16, 0.0, 5.0);
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&0.75f32.to_le_bytes());

        let vol = parse_nifti_bytes(&bytes).unwrap();
        assert_eq!(vol.datatype, NiftiDatatype::F32);
        assert_eq!(vol.data, vec![0.25, 0.75]);
    }

    #[test]
    fn gzip_stream_is_inflated() {
        let mut raw = header([2, 1, 1], 4, 1.0, 0.0);
        raw.extend_from_slice(&(-3i16).to_le_bytes());
        raw.extend_from_slice(&9i16.to_le_bytes());

        let mut gz = vec![0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 255];
        gz.extend(miniz_oxide::deflate::compress_to_vec(&raw, 6));
        gz.extend_from_slice(&[0u8; 8]);

        let vol = parse_nifti_bytes(&gz).unwrap();
        assert_eq!(vol.data, vec![-3.0, 9.0]);
    }

    #[test]
    fn rejects_pair_files_and_short_payloads() {
        let mut bytes = header([2, 2, 2], 2, 1.0, 0.0);
        bytes[344..348].copy_from_slice(b"ni1\0");
        assert_eq!(parse_nifti_bytes(&bytes).unwrap_err().kind(), ErrorKind::InvalidData);

        let mut bytes = header([2, 2, 2], 2, 1.0, 0.0);
        bytes.extend_from_slice(&[0; 7]);
        assert_eq!(parse_nifti_bytes(&bytes).unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }
}
