//! TrackVis `.trk` streamlines.
//!
//! File layout (byte order detected from `hdr_size`):
//!   000 : [u8;6]   id_string = "TRACK\0"
//!   006 : i16[3]   dim
//!   012 : f32[3]   voxel_size
//!   024 : f32[3]   origin
//!   036 : i16      n_scalars
//!   038 : [u8;200] scalar_name (10 x 20 bytes)
//!   238 : i16      n_properties
//!   240 : [u8;200] property_name (10 x 20 bytes)
//!   440 : f32[16]  vox_to_ras (row-major, [3][3] == 0 means "not recorded")
//!   504 : [u8;444] reserved
//!   948 : [u8;4]   voxel_order
//!   952 : [u8;4]   pad2
//!   956 : f32[6]   image_orientation_patient
//!   980 : [u8;2]   pad1
//!   982 : u8[6]    invert_x, invert_y, invert_z, swap_xy, swap_yz, swap_zx
//!   988 : i32      n_count (0 = unknown)
//!   992 : i32      version
//!   996 : i32      hdr_size = 1000
//!
//! Tracks follow until EOF:
//!   i32 n_points, n_points x (f32 x, y, z, f32 scalars[n_scalars]), f32 properties[n_properties]

use crate::{bad, fixed_str, rd_f32, rd_i16, rd_i32, skip, take, with_file_bytes, ByteOrder};
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

pub const TRK_MAGIC: [u8; 6] = *b"TRACK\0";
pub const TRK_HEADER_SIZE: usize = 1000;
pub const TRK_VERSION: i32 = 2;

const NAME_SLOTS: usize = 10;
const NAME_LEN: usize = 20;

/// Contiguous run `[offset, offset + size)` of a flat point array forming one polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TractRange {
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrkHeader {
    pub dim: [i16; 3],
    pub voxel_size: [f32; 3],
    pub origin: [f32; 3],
    pub scalar_names: Vec<String>,
    pub property_names: Vec<String>,
    /// Row-major voxel-to-RAS matrix as stored in the file.
    pub vox_to_ras: [[f32; 4]; 4],
    pub voxel_order: [u8; 4],
    pub image_orientation_patient: [f32; 6],
    /// invert_x, invert_y, invert_z, swap_xy, swap_yz, swap_zx
    pub flags: [u8; 6],
    pub n_count: i32,
    pub version: i32,
}

impl Default for TrkHeader {
    fn default() -> Self {
        Self {
            dim: [0; 3],
            voxel_size: [1.0; 3],
            origin: [0.0; 3],
            scalar_names: Vec::new(),
            property_names: Vec::new(),
            vox_to_ras: [[0.0; 4]; 4],
            voxel_order: *b"RAS\0",
            image_orientation_patient: [0.0; 6],
            flags: [0; 6],
            n_count: 0,
            version: TRK_VERSION,
        }
    }
}

impl TrkHeader {
    /// Voxel-to-RAS transform, identity when the file does not record one.
    pub fn vox_to_ras_or_identity(&self) -> [[f32; 4]; 4] {
        if self.vox_to_ras[3][3] == 0.0 {
            [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ]
        } else {
            self.vox_to_ras
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrkFile {
    pub header: TrkHeader,
    pub points: Vec<[f32; 3]>,
    pub tracts: Vec<TractRange>,
    /// `n_scalars` values per point, point-major.
    pub scalars: Vec<f32>,
    /// `n_properties` values per tract, tract-major.
    pub properties: Vec<f32>,
}

impl TrkFile {
    #[inline]
    pub fn n_scalars(&self) -> usize {
        self.header.scalar_names.len()
    }

    #[inline]
    pub fn n_properties(&self) -> usize {
        self.header.property_names.len()
    }

    /// Scalar channel `channel` for every point, or `None` if the file has fewer channels.
    pub fn scalar_channel(&self, channel: usize) -> Option<Vec<f32>> {
        let n = self.n_scalars();
        if channel >= n {
            return None;
        }
        Some(self.scalars.chunks_exact(n).map(|s| s[channel]).collect())
    }
}

fn detect_order(header: &[u8]) -> io::Result<ByteOrder> {
    let mut tail = &header[996..1000];
    let mut tail_be = tail;
    if rd_i32(&mut tail, ByteOrder::Little)? == TRK_HEADER_SIZE as i32 {
        Ok(ByteOrder::Little)
    } else if rd_i32(&mut tail_be, ByteOrder::Big)? == TRK_HEADER_SIZE as i32 {
        Ok(ByteOrder::Big)
    } else {
        Err(bad("trk hdr_size must be 1000"))
    }
}

fn read_names(p: &mut &[u8], count: i16) -> io::Result<Vec<String>> {
    if !(0..=NAME_SLOTS as i16).contains(&count) {
        return Err(bad("trk name count out of range"));
    }
    let block = take(p, NAME_SLOTS * NAME_LEN)?;
    Ok(block
        .chunks_exact(NAME_LEN)
        .take(count as usize)
        .map(fixed_str)
        .collect())
}

/// Parse a `.trk` file from a contiguous byte slice.
pub fn parse_trk_bytes(mut p: &[u8]) -> io::Result<TrkFile> {
    crate::need(p, TRK_HEADER_SIZE)?;
    if &p[..5] != b"TRACK" {
        return Err(bad("bad trk magic"));
    }
    let order = detect_order(p)?;
    skip(&mut p, 6)?;

    let dim = [
        rd_i16(&mut p, order)?,
        rd_i16(&mut p, order)?,
        rd_i16(&mut p, order)?,
    ];
    let mut voxel_size = [0.0f32; 3];
    for v in voxel_size.iter_mut() {
        *v = rd_f32(&mut p, order)?;
    }
    let mut origin = [0.0f32; 3];
    for v in origin.iter_mut() {
        *v = rd_f32(&mut p, order)?;
    }

    let n_scalars = rd_i16(&mut p, order)?;
    let scalar_names = read_names(&mut p, n_scalars)?;
    let n_properties = rd_i16(&mut p, order)?;
    let property_names = read_names(&mut p, n_properties)?;

    let mut vox_to_ras = [[0.0f32; 4]; 4];
    for row in vox_to_ras.iter_mut() {
        for v in row.iter_mut() {
            *v = rd_f32(&mut p, order)?;
        }
    }

    skip(&mut p, 444)?;
    let mut voxel_order = [0u8; 4];
    voxel_order.copy_from_slice(take(&mut p, 4)?);
    skip(&mut p, 4)?;

    let mut image_orientation_patient = [0.0f32; 6];
    for v in image_orientation_patient.iter_mut() {
        *v = rd_f32(&mut p, order)?;
    }
    skip(&mut p, 2)?;

    let mut flags = [0u8; 6];
    flags.copy_from_slice(take(&mut p, 6)?);

    let n_count = rd_i32(&mut p, order)?;
    let version = rd_i32(&mut p, order)?;
    let _hdr_size = rd_i32(&mut p, order)?;

    let header = TrkHeader {
        dim,
        voxel_size,
        origin,
        scalar_names,
        property_names,
        vox_to_ras,
        voxel_order,
        image_orientation_patient,
        flags,
        n_count,
        version,
    };

    // Tracks, until EOF.
    let ns = n_scalars as usize;
    let np = n_properties as usize;
    let mut points = Vec::<[f32; 3]>::new();
    let mut tracts = Vec::<TractRange>::new();
    let mut scalars = Vec::<f32>::new();
    let mut properties = Vec::<f32>::new();

    if n_count > 0 {
        tracts.reserve(n_count as usize);
    }

    while !p.is_empty() {
        let count = rd_i32(&mut p, order)?;
        if count < 0 {
            return Err(bad("negative trk point count"));
        }
        let count = count as usize;
        let rec = (3 + ns) * 4;
        let bytes = count.checked_mul(rec).ok_or_else(|| bad("trk track size overflow"))?;
        let raw = take(&mut p, bytes)?;

        let offset = points.len() as u32;

        if ns == 0 && order == ByteOrder::Little && cfg!(target_endian = "little") {
            // Tightly packed xyz triples; the slice is not guaranteed to be aligned.
            points.extend(bytemuck::pod_collect_to_vec::<u8, [f32; 3]>(raw));
        } else {
            let mut rp = raw;
            for _ in 0..count {
                points.push([
                    rd_f32(&mut rp, order)?,
                    rd_f32(&mut rp, order)?,
                    rd_f32(&mut rp, order)?,
                ]);
                for _ in 0..ns {
                    scalars.push(rd_f32(&mut rp, order)?);
                }
            }
        }

        for _ in 0..np {
            properties.push(rd_f32(&mut p, order)?);
        }

        tracts.push(TractRange {
            offset,
            size: count as u32,
        });
    }

    Ok(TrkFile {
        header,
        points,
        tracts,
        scalars,
        properties,
    })
}

pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<TrkFile> {
    with_file_bytes(path, parse_trk_bytes)
}

fn write_names<W: Write>(w: &mut W, names: &[String]) -> io::Result<()> {
    if names.len() > NAME_SLOTS {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "trk supports at most 10 scalar/property names",
        ));
    }
    write_i16(w, names.len() as i16)?;
    for slot in 0..NAME_SLOTS {
        let mut field = [0u8; NAME_LEN];
        if let Some(name) = names.get(slot) {
            let b = name.as_bytes();
            let n = b.len().min(NAME_LEN - 1);
            field[..n].copy_from_slice(&b[..n]);
        }
        w.write_all(&field)?;
    }
    Ok(())
}

/// Serialize `trk` into any writer (little-endian, version 2).
pub fn write_trk<W: Write>(w: &mut W, trk: &TrkFile) -> io::Result<()> {
    let ns = trk.n_scalars();
    let np = trk.n_properties();

    if trk.scalars.len() != trk.points.len() * ns {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "scalars length != points * n_scalars",
        ));
    }
    if trk.properties.len() != trk.tracts.len() * np {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "properties length != tracts * n_properties",
        ));
    }

    let h = &trk.header;
    w.write_all(&TRK_MAGIC)?;
    for v in h.dim {
        write_i16(w, v)?;
    }
    for v in h.voxel_size.iter().chain(h.origin.iter()) {
        write_f32(w, *v)?;
    }
    write_names(w, &h.scalar_names)?;
    write_names(w, &h.property_names)?;
    for row in h.vox_to_ras.iter() {
        for v in row {
            write_f32(w, *v)?;
        }
    }
    w.write_all(&[0u8; 444])?;
    w.write_all(&h.voxel_order)?;
    w.write_all(&[0u8; 4])?;
    for v in h.image_orientation_patient {
        write_f32(w, v)?;
    }
    w.write_all(&[0u8; 2])?;
    w.write_all(&h.flags)?;
    write_i32(w, trk.tracts.len() as i32)?;
    write_i32(w, TRK_VERSION)?;
    write_i32(w, TRK_HEADER_SIZE as i32)?;

    for (t, range) in trk.tracts.iter().enumerate() {
        let start = range.offset as usize;
        let end = start + range.size as usize;
        if end > trk.points.len() {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "tract range exceeds point array",
            ));
        }

        write_i32(w, range.size as i32)?;
        for i in start..end {
            for v in trk.points[i] {
                write_f32(w, v)?;
            }
            for v in &trk.scalars[i * ns..(i + 1) * ns] {
                write_f32(w, *v)?;
            }
        }
        for v in &trk.properties[t * np..(t + 1) * np] {
            write_f32(w, *v)?;
        }
    }

    Ok(())
}

pub fn write_file<P: AsRef<Path>>(path: P, trk: &TrkFile) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_trk(&mut file, trk)?;
    file.flush()?;
    Ok(())
}

#[inline]
fn write_i16<W: Write>(w: &mut W, v: i16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_f32<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tracts(with_scalars: bool) -> TrkFile {
        let mut header = TrkHeader::default();
        if with_scalars {
            header.scalar_names = vec!["fa".into()];
        }
        header.property_names = vec!["id".into()];
        header.vox_to_ras = [
            [2.0, 0.0, 0.0, 1.0],
            [0.0, 2.0, 0.0, 0.0],
            [0.0, 0.0, 2.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        TrkFile {
            header,
            points: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 1.0, 0.0], [3.0, 1.0, 1.0], [4.0, 2.0, 1.0]],
            tracts: vec![TractRange { offset: 0, size: 2 }, TractRange { offset: 2, size: 3 }],
            scalars: if with_scalars { vec![0.1, 0.2, 0.3, 0.4, 0.5] } else { Vec::new() },
            properties: vec![7.0, 8.0],
        }
    }

    fn encode(trk: &TrkFile) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_trk(&mut bytes, trk).unwrap();
        bytes
    }

    #[test]
    fn header_is_exactly_1000_bytes() {
        let mut trk = two_tracts(false);
        trk.tracts.clear();
        trk.points.clear();
        trk.properties.clear();
        assert_eq!(encode(&trk).len(), TRK_HEADER_SIZE);
    }

    #[test]
    fn tracts_and_scalars_survive_a_write() {
        let src = two_tracts(true);
        let back = parse_trk_bytes(&encode(&src)).unwrap();

        assert_eq!(back.tracts, src.tracts);
        assert_eq!(back.points, src.points);
        assert_eq!(back.scalars, src.scalars);
        assert_eq!(back.properties, src.properties);
        assert_eq!(back.header.scalar_names, vec!["fa".to_string()]);
        assert_eq!(back.header.n_count, 2);
        assert_eq!(back.scalar_channel(0).unwrap(), src.scalars);
        assert!(back.scalar_channel(1).is_none());
    }

    #[test]
    fn packed_points_path_matches_interleaved() {
        let back = parse_trk_bytes(&encode(&two_tracts(false))).unwrap();
        assert_eq!(back.points.len(), 5);
        assert_eq!(back.points[3], [3.0, 1.0, 1.0]);
        assert!(back.scalars.is_empty());
    }

    #[test]
    fn missing_vox_to_ras_is_identity() {
        let h = TrkHeader::default();
        let m = h.vox_to_ras_or_identity();
        assert_eq!(m[0][0], 1.0);
        assert_eq!(m[3][3], 1.0);
        assert_eq!(m[0][3], 0.0);

        let h2 = two_tracts(false).header;
        assert_eq!(h2.vox_to_ras_or_identity()[0][3], 1.0);
    }

    #[test]
    fn rejects_bad_magic_and_header_size() {
        let mut bytes = encode(&two_tracts(false));
        bytes[0] = b'X';
        assert_eq!(parse_trk_bytes(&bytes).unwrap_err().kind(), ErrorKind::InvalidData);

        let mut bytes = encode(&two_tracts(false));
        bytes[996..1000].copy_from_slice(&999i32.to_le_bytes());
        assert_eq!(parse_trk_bytes(&bytes).unwrap_err().kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_track_is_eof() {
        let bytes = encode(&two_tracts(false));
        let cut = &bytes[..bytes.len() - 3];
        assert_eq!(parse_trk_bytes(cut).unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }
}
