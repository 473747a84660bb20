use image::{GrayImage, Luma};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::Serialize;

use crate::error::RetrievalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Raster {
    Single(Array2<f32>),
    MultiBand(Array3<f32>),
}

impl Raster {
    pub fn ndim(&self) -> usize {
        match self {
            Raster::Single(_) => 2,
            Raster::MultiBand(_) => 3,
        }
    }

    pub fn band_count(&self) -> usize {
        match self {
            Raster::Single(_) => 1,
            Raster::MultiBand(stack) => stack.len_of(Axis(2)),
        }
    }

    pub fn band(&self, position: usize) -> Result<Array2<f32>, RetrievalError> {
        match self {
            Raster::Single(array) => Ok(array.clone()),
            Raster::MultiBand(stack) => {
                let bands = stack.len_of(Axis(2));
                if position >= bands {
                    return Err(RetrievalError::BandOutOfRange {
                        index: position,
                        bands,
                    });
                }
                Ok(stack.index_axis(Axis(2), position).to_owned())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandStats {
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub std_dev: f64,
}

impl BandStats {
    pub fn compute(array: ArrayView2<'_, f32>) -> Result<Self, RetrievalError> {
        if array.is_empty() {
            return Err(RetrievalError::Raster("cannot summarise an empty band".to_string()));
        }
        let values = array.mapv(f64::from);
        let average = values.mean().unwrap_or(f64::NAN);
        let minimum = values.iter().copied().fold(f64::INFINITY, f64::min);
        let maximum = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std_dev = values.std(0.0);
        Ok(Self {
            average,
            minimum,
            maximum,
            std_dev,
        })
    }
}

pub fn to_gray8(array: ArrayView2<'_, f32>) -> Result<GrayImage, RetrievalError> {
    let (height, width) = array.dim();
    if height == 0 || width == 0 {
        return Err(RetrievalError::Raster("cannot render an empty band".to_string()));
    }
    let finite = array.iter().copied().filter(|value| value.is_finite());
    let (min, max) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), value| {
        (lo.min(value), hi.max(value))
    });
    let range = max - min;

    let mut image = GrayImage::new(width as u32, height as u32);
    for ((row, col), &value) in array.indexed_iter() {
        let level = if range > 0.0 && value.is_finite() {
            ((value - min) / range * 255.0) as u8
        } else {
            0
        };
        image.put_pixel(col as u32, row as u32, Luma([level]));
    }
    Ok(image)
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

pub fn encode_npy(array: ArrayView2<'_, f32>) -> Vec<u8> {
    let (rows, cols) = array.dim();
    let dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}"
    );
    // magic + version + u16 length precede the header; total must be 64-byte aligned
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    let header = format!("{dict}{}\n", " ".repeat(pad));

    let mut out = Vec::with_capacity(unpadded + pad + rows * cols * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in array.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_npy(bytes: &[u8]) -> Result<Raster, RetrievalError> {
    let bad = |message: &str| RetrievalError::Raster(format!("invalid npy payload: {message}"));

    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(bad("missing magic"));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(bad("truncated header length"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        _ => return Err(bad("unsupported version")),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(bad("truncated header"));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| bad("header is not utf-8"))?;

    let descr = header_value(header, "descr")
        .map(|value| value.trim_matches(['\'', '"']).to_string())
        .ok_or_else(|| bad("no descr"))?;
    if header_value(header, "fortran_order").is_some_and(|value| value.starts_with("True")) {
        return Err(bad("fortran order is not supported"));
    }
    let shape = parse_shape(header).ok_or_else(|| bad("no shape"))?;

    let body = &bytes[data_start..];
    let values: Vec<f32> = match descr.as_str() {
        "<f4" => body
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        "<f8" => body
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw) as f32
            })
            .collect(),
        "<u2" => body
            .chunks_exact(2)
            .map(|chunk| f32::from(u16::from_le_bytes([chunk[0], chunk[1]])))
            .collect(),
        "|u1" | "<u1" => body.iter().map(|value| f32::from(*value)).collect(),
        other => return Err(bad(&format!("unsupported dtype {other}"))),
    };

    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(bad(&format!(
            "expected {expected} values for shape {shape:?}, found {}",
            values.len()
        )));
    }

    match shape.as_slice() {
        [rows, cols] => Array2::from_shape_vec((*rows, *cols), values)
            .map(Raster::Single)
            .map_err(|err| RetrievalError::Raster(err.to_string())),
        [rows, cols, bands] => Array3::from_shape_vec((*rows, *cols, *bands), values)
            .map(Raster::MultiBand)
            .map_err(|err| RetrievalError::Raster(err.to_string())),
        _ => Err(bad(&format!("expected 2 or 3 dimensions, found {}", shape.len()))),
    }
}

fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{key}':");
    let start = header.find(&needle)? + needle.len();
    let rest = header[start..].trim_start();
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn parse_shape(header: &str) -> Option<Vec<usize>> {
    let start = header.find("'shape':")?;
    let rest = &header[start..];
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<usize>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn npy_header_is_aligned() {
        let band = array![[1.0f32, 2.0], [3.0, 4.0]];
        let bytes = encode_npy(band.view());
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(decode_npy(&bytes).unwrap(), Raster::Single(band));
    }

    #[test]
    fn stats_use_population_std() {
        let band = array![[1.0f32, 3.0], [1.0, 3.0]];
        let stats = BandStats::compute(band.view()).unwrap();
        assert_eq!(stats.average, 2.0);
        assert_eq!(stats.minimum, 1.0);
        assert_eq!(stats.maximum, 3.0);
        assert_eq!(stats.std_dev, 1.0);
    }

    #[test]
    fn flat_band_renders_black() {
        let band = Array2::<f32>::from_elem((2, 3), 7.0);
        let image = to_gray8(band.view()).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert!(image.pixels().all(|pixel| pixel.0[0] == 0));
    }

    #[test]
    fn band_out_of_range() {
        let stack = Raster::MultiBand(Array3::zeros((2, 2, 3)));
        assert!(matches!(
            stack.band(3),
            Err(RetrievalError::BandOutOfRange { index: 3, bands: 3 })
        ));
    }
}
