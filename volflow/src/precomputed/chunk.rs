//! Chunk file naming and the raw chunk codec.
//!
//! A chunk covering voxels `[x0, x1) x [y0, y1) x [z0, z1)` is stored at
//! `<scale key>/<x0>-<x1>_<y0>-<y1>_<z0>-<z1>`. The payload is the chunk's
//! elements in little-endian byte order, x varying fastest, then y, z and
//! finally channel. Gzip-compressed chunks carry a `.gz` suffix and are
//! recognised on read by their magic bytes.

use super::error::{PrecomputedError, PrecomputedResult};
use super::info::DataType;
use crate::geometry::IntVec3D;
use crate::tensor::Tensor;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array4;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Leading bytes of a gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Suffix appended to compressed chunk files.
pub const GZIP_SUFFIX: &str = ".gz";

/// File name of the chunk spanning `[start, end)`.
pub fn chunk_name(start: IntVec3D, end: IntVec3D) -> String {
    format!(
        "{}-{}_{}-{}_{}-{}",
        start[0], end[0], start[1], end[1], start[2], end[2]
    )
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(GZIP_SUFFIX);
    PathBuf::from(name)
}

/// Serializes chunk data as raw little-endian elements.
///
/// Integer types are rounded and saturate at their range.
pub fn encode_chunk(data: &Tensor, data_type: DataType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() * data_type.size_bytes());
    // Iterating [c, z, y, x] in logical order puts x fastest and c slowest.
    let file_order = data.view().permuted_axes([0, 3, 2, 1]);
    for &v in file_order.iter() {
        // Writes into a Vec cannot fail.
        let _ = match data_type {
            DataType::Uint8 => buf.write_u8(v.round() as u8),
            DataType::Int8 => buf.write_i8(v.round() as i8),
            DataType::Uint16 => buf.write_u16::<LittleEndian>(v.round() as u16),
            DataType::Int16 => buf.write_i16::<LittleEndian>(v.round() as i16),
            DataType::Uint32 => buf.write_u32::<LittleEndian>(v.round() as u32),
            DataType::Int32 => buf.write_i32::<LittleEndian>(v.round() as i32),
            DataType::Float32 => buf.write_f32::<LittleEndian>(v as f32),
            DataType::Float64 => buf.write_f64::<LittleEndian>(v),
        };
    }
    buf
}

/// Parses raw little-endian chunk bytes into a tensor of the given shape.
pub fn decode_chunk(
    bytes: &[u8],
    data_type: DataType,
    num_channels: usize,
    shape: [usize; 3],
    name: &str,
) -> PrecomputedResult<Tensor> {
    let width = data_type.size_bytes();
    let count = num_channels * shape[0] * shape[1] * shape[2];
    if bytes.len() != count * width {
        return Err(PrecomputedError::ChunkSize {
            name: name.to_string(),
            expected: count * width,
            actual: bytes.len(),
        });
    }
    let values: Vec<f64> = bytes
        .chunks_exact(width)
        .map(|b| match data_type {
            DataType::Uint8 => b[0] as f64,
            DataType::Int8 => b[0] as i8 as f64,
            DataType::Uint16 => LittleEndian::read_u16(b) as f64,
            DataType::Int16 => LittleEndian::read_i16(b) as f64,
            DataType::Uint32 => LittleEndian::read_u32(b) as f64,
            DataType::Int32 => LittleEndian::read_i32(b) as f64,
            DataType::Float32 => LittleEndian::read_f32(b) as f64,
            DataType::Float64 => LittleEndian::read_f64(b),
        })
        .collect();
    let file_order = Array4::from_shape_vec((num_channels, shape[2], shape[1], shape[0]), values)
        .map_err(|_| PrecomputedError::ChunkSize {
            name: name.to_string(),
            expected: count * width,
            actual: bytes.len(),
        })?;
    Ok(file_order
        .permuted_axes([0, 3, 2, 1])
        .as_standard_layout()
        .into_owned())
}

/// Reads a chunk file, trying the plain name and then the `.gz` name.
///
/// Returns `None` when neither exists.
pub fn read_chunk_file(
    path: &Path,
    data_type: DataType,
    num_channels: usize,
    shape: [usize; 3],
) -> PrecomputedResult<Option<Tensor>> {
    let mut raw = None;
    for candidate in [path.to_path_buf(), gz_path(path)] {
        match fs::read(&candidate) {
            Ok(bytes) => {
                raw = Some((candidate, bytes));
                break;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(PrecomputedError::io(candidate, e)),
        }
    }
    let Some((found, bytes)) = raw else {
        return Ok(None);
    };

    let bytes = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| PrecomputedError::io(&found, e))?;
        decoded
    } else {
        bytes
    };
    let name = found.display().to_string();
    decode_chunk(&bytes, data_type, num_channels, shape, &name).map(Some)
}

/// Writes a chunk file, removing any stale copy under the other name.
pub fn write_chunk_file(
    path: &Path,
    data: &Tensor,
    data_type: DataType,
    compress: bool,
) -> PrecomputedResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PrecomputedError::io(parent, e))?;
    }
    let raw = encode_chunk(data, data_type);
    let (target, stale, payload) = if compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(&raw)
            .map_err(|e| PrecomputedError::io(path, e))?;
        let payload = encoder.finish().map_err(|e| PrecomputedError::io(path, e))?;
        (gz_path(path), path.to_path_buf(), payload)
    } else {
        (path.to_path_buf(), gz_path(path), raw)
    };
    fs::write(&target, payload).map_err(|e| PrecomputedError::io(&target, e))?;
    match fs::remove_file(&stale) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PrecomputedError::io(stale, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Tensor {
        Array4::from_shape_fn((2, 3, 2, 2), |(c, x, y, z)| (c * 100 + x * 10 + y * 3 + z) as f64)
    }

    #[test]
    fn test_chunk_name() {
        assert_eq!(
            chunk_name(IntVec3D::new(0, 64, 8), IntVec3D::new(64, 128, 16)),
            "0-64_64-128_8-16"
        );
    }

    #[test]
    fn test_encode_is_x_fastest() {
        let data = Array4::from_shape_fn((1, 2, 2, 1), |(_, x, y, _)| (x + 2 * y) as f64);
        assert_eq!(encode_chunk(&data, DataType::Uint8), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_encode_little_endian() {
        let data = Array4::from_elem((1, 1, 1, 1), 258.0);
        assert_eq!(encode_chunk(&data, DataType::Uint16), vec![2, 1]);
    }

    #[test]
    fn test_codec_preserves_values() {
        let data = sample();
        for dtype in [DataType::Uint16, DataType::Int32, DataType::Float32, DataType::Float64] {
            let bytes = encode_chunk(&data, dtype);
            let decoded = decode_chunk(&bytes, dtype, 2, [3, 2, 2], "t").unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn test_decode_wrong_size() {
        let err = decode_chunk(&[0u8; 7], DataType::Uint8, 1, [2, 2, 2], "c").unwrap_err();
        assert!(matches!(err, PrecomputedError::ChunkSize { expected: 8, actual: 7, .. }));
    }

    #[test]
    fn test_file_roundtrip_plain_and_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("4_4_40").join("0-3_0-2_0-2");
        let data = sample();

        write_chunk_file(&path, &data, DataType::Uint8, true).unwrap();
        assert!(gz_path(&path).exists());
        assert!(!path.exists());
        let read = read_chunk_file(&path, DataType::Uint8, 2, [3, 2, 2]).unwrap();
        assert_eq!(read, Some(data.clone()));

        write_chunk_file(&path, &data, DataType::Uint8, false).unwrap();
        assert!(path.exists());
        assert!(!gz_path(&path).exists());
    }

    #[test]
    fn test_missing_chunk() {
        let dir = TempDir::new().unwrap();
        let read = read_chunk_file(&dir.path().join("nope"), DataType::Uint8, 1, [1, 1, 1]).unwrap();
        assert!(read.is_none());
    }
}
