//! Binary irradiance file.
//!
//! A 52-byte [`ProbeFileHeader`] followed by `num_probes` records of 27
//! floats in linear-index order. Values are stored in native (little-endian
//! on every supported target) IEEE-754 layout.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};
use thiserror::Error;

use super::irradiance::{GridLayout, IrradianceGrid};
use super::spherical_harmonics::SphericalHarmonics;

pub const HEADER_SIZE: usize = std::mem::size_of::<ProbeFileHeader>();
pub const PROBE_RECORD_SIZE: usize = std::mem::size_of::<SphericalHarmonics>();
const MAX_PREALLOCATED_RECORDS: usize = 4096;

#[derive(Debug, Error)]
pub enum ProbeFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file ends inside the header")]
    TruncatedHeader,
    #[error("file holds {found} of {expected} probe records")]
    TruncatedPayload { expected: usize, found: usize },
    #[error("header declares {declared} probes but dims give {computed}")]
    CountMismatch { declared: i32, computed: u64 },
    #[error("grid dims {0:?} are not positive integers")]
    InvalidDims([f32; 3]),
}

pub type ProbeFileResult<T> = Result<T, ProbeFileError>;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ProbeFileHeader {
    pub start_pos: [f32; 3],
    pub end_pos: [f32; 3],
    pub delta: [f32; 3],
    /// Integral values stored as floats
    pub dims: [f32; 3],
    pub num_probes: i32,
}

impl ProbeFileHeader {
    pub fn from_grid(grid: &IrradianceGrid) -> Self {
        Self {
            start_pos: grid.layout.start.to_array(),
            end_pos: grid.end.to_array(),
            delta: grid.layout.delta.to_array(),
            dims: grid.layout.dims.as_vec3().to_array(),
            num_probes: grid.probes().len() as i32,
        }
    }

    fn validated_dims(&self) -> ProbeFileResult<UVec3> {
        let valid = |d: f32| d.is_finite() && d >= 1.0 && d.fract() == 0.0 && d <= u32::MAX as f32;
        if !self.dims.iter().all(|&d| valid(d)) {
            return Err(ProbeFileError::InvalidDims(self.dims));
        }
        let dims = UVec3::new(self.dims[0] as u32, self.dims[1] as u32, self.dims[2] as u32);
        let computed = dims.x as u64 * dims.y as u64 * dims.z as u64;
        if self.num_probes < 0 || self.num_probes as u64 != computed {
            return Err(ProbeFileError::CountMismatch {
                declared: self.num_probes,
                computed,
            });
        }
        Ok(dims)
    }
}

pub fn write_probes<W: Write>(grid: &IrradianceGrid, mut writer: W) -> ProbeFileResult<()> {
    let header = ProbeFileHeader::from_grid(grid);
    writer.write_all(bytemuck::bytes_of(&header))?;
    for probe in grid.probes() {
        writer.write_all(bytemuck::bytes_of(&probe.sh))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a grid back. Positions come from the stored start and delta, so they
/// match the written grid exactly.
pub fn read_probes<R: Read>(mut reader: R) -> ProbeFileResult<IrradianceGrid> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    read_fully(&mut reader, &mut header_bytes).and_then(|n| {
        if n < HEADER_SIZE {
            Err(ProbeFileError::TruncatedHeader)
        } else {
            Ok(())
        }
    })?;
    let header: ProbeFileHeader = bytemuck::pod_read_unaligned(&header_bytes);
    let dims = header.validated_dims()?;

    let layout = GridLayout {
        start: Vec3::from_array(header.start_pos),
        delta: Vec3::from_array(header.delta),
        dims,
    };
    let expected = layout.probe_count();

    // The header alone never sizes an allocation; records grow with the payload.
    let mut records: Vec<SphericalHarmonics> = Vec::with_capacity(expected.min(MAX_PREALLOCATED_RECORDS));
    let mut record = [0u8; PROBE_RECORD_SIZE];
    for index in 0..expected {
        if read_fully(&mut reader, &mut record)? < PROBE_RECORD_SIZE {
            return Err(ProbeFileError::TruncatedPayload { expected, found: index });
        }
        records.push(bytemuck::pod_read_unaligned(&record));
    }

    let mut grid = IrradianceGrid::new(layout, Vec3::from_array(header.end_pos));
    for (index, sh) in records.into_iter().enumerate() {
        grid.set_coefficients(index, sh);
    }
    Ok(grid)
}

/// Like `read_exact` but reports how many bytes arrived before EOF
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> ProbeFileResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

pub fn save_probes(grid: &IrradianceGrid, path: impl AsRef<Path>) -> ProbeFileResult<()> {
    let path = path.as_ref();
    write_probes(grid, BufWriter::new(File::create(path)?))?;
    log::info!("Wrote {} probes to {}", grid.probes().len(), path.display());
    Ok(())
}

pub fn load_probes(path: impl AsRef<Path>) -> ProbeFileResult<IrradianceGrid> {
    let path = path.as_ref();
    let grid = read_probes(BufReader::new(File::open(path)?))?;
    log::info!("Loaded {} probes from {}", grid.probes().len(), path.display());
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::irradiance::IrradianceGridDesc;

    fn sample_grid() -> IrradianceGrid {
        let mut grid = IrradianceGrid::from_desc(&IrradianceGridDesc::default()).unwrap();
        for i in 0..grid.probes().len() {
            let mut sh = SphericalHarmonics::default();
            for (k, c) in sh.coeffs.iter_mut().enumerate() {
                *c = Vec3::new(i as f32, k as f32 * 0.1, 1.0 / (k + 1) as f32);
            }
            grid.set_coefficients(i, sh);
        }
        grid
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE, 52);
        assert_eq!(PROBE_RECORD_SIZE, 108);
    }

    #[test]
    fn test_file_size() {
        let mut bytes = Vec::new();
        write_probes(&sample_grid(), &mut bytes).unwrap();
        assert_eq!(bytes.len(), 52 + 8 * 108);
    }

    #[test]
    fn test_truncated_header() {
        let err = read_probes(&[0u8; 20][..]).unwrap_err();
        assert!(matches!(err, ProbeFileError::TruncatedHeader));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = Vec::new();
        write_probes(&sample_grid(), &mut bytes).unwrap();
        bytes.truncate(52 + 3 * 108 + 10);
        match read_probes(bytes.as_slice()) {
            Err(ProbeFileError::TruncatedPayload { expected, found }) => {
                assert_eq!((expected, found), (8, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_header_only_file_for_huge_grid() {
        let header = ProbeFileHeader {
            start_pos: [0.0; 3],
            end_pos: [199.0; 3],
            delta: [1.0; 3],
            dims: [200.0; 3],
            num_probes: 8_000_000,
        };
        match read_probes(bytemuck::bytes_of(&header)) {
            Err(ProbeFileError::TruncatedPayload { expected, found }) => {
                assert_eq!((expected, found), (8_000_000, 0));
            }
            other => panic!("unexpected {:?}", other.map(|g| g.probes().len())),
        }
    }

    #[test]
    fn test_count_mismatch() {
        let mut header = ProbeFileHeader::from_grid(&sample_grid());
        header.num_probes = 5;
        let err = read_probes(bytemuck::bytes_of(&header)).unwrap_err();
        assert!(matches!(err, ProbeFileError::CountMismatch { declared: 5, computed: 8 }));
    }

    #[test]
    fn test_fractional_dims_rejected() {
        let mut header = ProbeFileHeader::from_grid(&sample_grid());
        header.dims[1] = 2.5;
        let err = read_probes(bytemuck::bytes_of(&header)).unwrap_err();
        assert!(matches!(err, ProbeFileError::InvalidDims(_)));
    }
}
