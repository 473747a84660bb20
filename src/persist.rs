use std::io::{Cursor, Write};

use camino::{Utf8Path, Utf8PathBuf};
use image::{GrayImage, ImageFormat, Luma, imageops};
use ndarray::Array2;
use tracing::{debug, info};

use crate::domain::{DATE_FORMAT, Preface, Project, RetrievalUnit, TimeSlot};
use crate::error::RetrievalError;
use crate::ledger::CompletionLedger;
use crate::naming::{CanonicalName, canonical_name};
use crate::paths;
use crate::raster::{self, BandStats};
use crate::summary::{SummaryRow, SummaryTable};

pub const ARRAY_EXT: &str = ".npy";
pub const IMAGE_EXT: &str = ".png";

const COMPOSITE_COLUMNS: usize = 3;
const COMPOSITE_GUTTER: u32 = 4;

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), RetrievalError> {
    paths::ensure_parent(path)?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".srm-artifact")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .and_then(|_| temp.as_file().sync_data())
        .map_err(|err| RetrievalError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
    Ok(())
}

fn encode_png(image: &GrayImage) -> Result<Vec<u8>, RetrievalError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| RetrievalError::Raster(err.to_string()))?;
    Ok(buffer.into_inner())
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: Utf8PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn path_for(&self, name: &CanonicalName) -> Utf8PathBuf {
        self.dir.join(name.as_str())
    }

    pub fn write_artifact(
        &self,
        array: &Array2<f32>,
        name: &CanonicalName,
    ) -> Result<Utf8PathBuf, RetrievalError> {
        let path = self.path_for(name);
        let bytes = if name.as_str().ends_with(IMAGE_EXT) {
            encode_png(&raster::to_gray8(array.view())?)?
        } else {
            raster::encode_npy(array.view())
        };
        write_bytes_atomic(&path, &bytes)?;
        debug!(path = %path, "wrote artifact");
        Ok(path)
    }
}

pub struct Persistence<'a> {
    pub artifacts: &'a ArtifactStore,
    pub ledger: &'a mut dyn CompletionLedger,
    pub summary: &'a SummaryTable,
    pub ledger_ext: &'a str,
    pub write_arrays: bool,
}

impl Persistence<'_> {
    pub fn persist_unit(
        &mut self,
        unit: &RetrievalUnit,
        band: &Array2<f32>,
    ) -> Result<BandStats, RetrievalError> {
        let stats = BandStats::compute(band.view())?;

        if self.write_arrays {
            self.artifacts
                .write_artifact(band, &canonical_name(unit, ARRAY_EXT))?;
            self.artifacts
                .write_artifact(band, &canonical_name(unit, IMAGE_EXT))?;
        }

        self.append_ledger(&canonical_name(unit, self.ledger_ext))?;
        self.append_summary_row(&SummaryRow {
            slot: unit.slot,
            stats,
        })?;
        Ok(stats)
    }

    pub fn append_ledger(&mut self, name: &CanonicalName) -> Result<(), RetrievalError> {
        self.ledger.append(name)
    }

    pub fn append_summary_row(&self, row: &SummaryRow) -> Result<(), RetrievalError> {
        self.summary.append_row(row)
    }

    pub fn resort_summary(&self) -> Result<(), RetrievalError> {
        self.summary.resort()
    }
}

pub fn composite_name(project: &Project, preface: &Preface, slots: &[TimeSlot]) -> Option<String> {
    let first = slots.first()?;
    let last = slots.last()?;
    Some(format!(
        "{project}_{}_{}{preface}{IMAGE_EXT}",
        first.start().format(DATE_FORMAT),
        last.end().format(DATE_FORMAT),
    ))
}

pub fn render_composite(bands: &[Array2<f32>], path: &Utf8Path) -> Result<bool, RetrievalError> {
    if bands.is_empty() {
        return Ok(false);
    }
    if path.as_std_path().exists() {
        info!(path = %path, "composite plot already exists, skipping");
        return Ok(false);
    }

    let tiles = bands
        .iter()
        .map(|band| raster::to_gray8(band.view()))
        .collect::<Result<Vec<_>, RetrievalError>>()?;
    let tile_width = tiles.iter().map(|tile| tile.width()).max().unwrap_or(1);
    let tile_height = tiles.iter().map(|tile| tile.height()).max().unwrap_or(1);
    let columns = tiles.len().min(COMPOSITE_COLUMNS) as u32;
    let rows = tiles.len().div_ceil(COMPOSITE_COLUMNS) as u32;

    let mut canvas = GrayImage::from_pixel(
        columns * tile_width + (columns + 1) * COMPOSITE_GUTTER,
        rows * tile_height + (rows + 1) * COMPOSITE_GUTTER,
        Luma([255]),
    );
    for (position, tile) in tiles.iter().enumerate() {
        let column = position as u32 % columns;
        let row = position as u32 / columns;
        let x = COMPOSITE_GUTTER + column * (tile_width + COMPOSITE_GUTTER);
        let y = COMPOSITE_GUTTER + row * (tile_height + COMPOSITE_GUTTER);
        imageops::replace(&mut canvas, tile, i64::from(x), i64::from(y));
    }

    write_bytes_atomic(path, &encode_png(&canvas)?)?;
    info!(path = %path, tiles = tiles.len(), "rendered composite plot");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_name_spans_batch() {
        let slots = vec![
            TimeSlot::parse("2022-01-01", "2022-02-01").unwrap(),
            TimeSlot::parse("2022-02-01", "2022-03-01").unwrap(),
        ];
        let name = composite_name(
            &"MaxFarm".parse().unwrap(),
            &"Thermal".parse().unwrap(),
            &slots,
        )
        .unwrap();
        assert_eq!(name, "MaxFarm_2022-01-01_2022-03-01Thermal.png");
        assert!(composite_name(&"MaxFarm".parse().unwrap(), &"Thermal".parse().unwrap(), &[]).is_none());
    }

    #[test]
    fn composite_is_written_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("figures/plot.png")).unwrap();
        let bands = vec![Array2::from_elem((4, 5), 1.0f32); 4];
        assert!(render_composite(&bands, &path).unwrap());
        assert!(!render_composite(&bands, &path).unwrap());

        let plot = image::open(path.as_std_path()).unwrap().into_luma8();
        assert_eq!(plot.width(), 3 * 5 + 4 * COMPOSITE_GUTTER);
        assert_eq!(plot.height(), 2 * 4 + 3 * COMPOSITE_GUTTER);
    }

    #[test]
    fn artifact_extension_picks_encoding() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("images")).unwrap();
        let store = ArtifactStore::new(dir);
        let band = Array2::from_shape_fn((2, 2), |(r, c)| (r * 2 + c) as f32);

        let npy = store
            .write_artifact(&band, &CanonicalName::from_ledger_line("MaxFarm_2022-01-01_2022-02-01_Thermal_0.npy"))
            .unwrap();
        let bytes = std::fs::read(npy.as_std_path()).unwrap();
        assert_eq!(raster::decode_npy(&bytes).unwrap(), raster::Raster::Single(band.clone()));

        let png = store
            .write_artifact(&band, &CanonicalName::from_ledger_line("MaxFarm_2022-01-01_2022-02-01_Thermal_0.png"))
            .unwrap();
        assert!(std::fs::read(png.as_std_path()).unwrap().starts_with(b"\x89PNG"));
    }
}
