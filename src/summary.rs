use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::domain::TimeSlot;
use crate::error::RetrievalError;
use crate::paths;
use crate::raster::BandStats;

pub const HEADER: [&str; 5] = [
    "Date Range",
    "Average",
    "Minimum",
    "Maximum",
    "Standard Deviation",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub slot: TimeSlot,
    pub stats: BandStats,
}

impl SummaryRow {
    fn record(&self) -> [String; 5] {
        [
            self.slot.range_label(),
            self.stats.average.to_string(),
            self.stats.minimum.to_string(),
            self.stats.maximum.to_string(),
            self.stats.std_dev.to_string(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SummaryTable {
    path: Utf8PathBuf,
}

impl SummaryTable {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn bootstrap(path: &Utf8Path) -> Result<Self, RetrievalError> {
        paths::create_blank_file(path)?;
        let table = Self::new(path);
        table.check_header()?;
        Ok(table)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn check_header(&self) -> Result<(), RetrievalError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(self.path.as_std_path())
            .map_err(csv_error)?;
        let mut header = csv::StringRecord::new();
        if !reader.read_record(&mut header).map_err(csv_error)? {
            return Ok(());
        }
        if header.iter().eq(HEADER) {
            Ok(())
        } else {
            Err(RetrievalError::SummaryHeader {
                path: self.path.as_std_path().to_path_buf(),
                found: header.iter().collect::<Vec<_>>().join(","),
            })
        }
    }

    pub fn append_rows(&self, rows: &[SummaryRow]) -> Result<(), RetrievalError> {
        let needs_header = fs::metadata(self.path.as_std_path())
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| RetrievalError::Filesystem(format!("open {}: {err}", self.path)))?;
        let mut writer = csv::Writer::from_writer(file);
        if needs_header {
            writer.write_record(HEADER).map_err(csv_error)?;
        }
        for row in rows {
            writer.write_record(row.record()).map_err(csv_error)?;
        }
        let mut file = writer
            .into_inner()
            .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        file.flush()
            .and_then(|_| file.sync_data())
            .map_err(|err| RetrievalError::Filesystem(format!("flush {}: {err}", self.path)))?;
        Ok(())
    }

    pub fn append_row(&self, row: &SummaryRow) -> Result<(), RetrievalError> {
        self.append_rows(std::slice::from_ref(row))
    }

    pub fn resort(&self) -> Result<(), RetrievalError> {
        let mut records = self.read_records()?;
        if records.len() < 2 {
            return Ok(());
        }
        let data = records.split_off(1);
        let header = records;

        let mut keyed = data
            .into_iter()
            .map(|record| {
                let label = record.first().cloned().unwrap_or_default();
                TimeSlot::from_range_label(&label)
                    .map(|slot| (slot.start(), record))
                    .map_err(|_| RetrievalError::SummaryRow(label))
            })
            .collect::<Result<Vec<_>, RetrievalError>>()?;
        keyed.sort_by_key(|(start, _)| *start);

        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".srm-summary")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        {
            let mut writer = csv::Writer::from_writer(temp.as_file());
            for record in header.iter().chain(keyed.iter().map(|(_, record)| record)) {
                writer.write_record(record).map_err(csv_error)?;
            }
            writer
                .flush()
                .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        }
        temp.as_file()
            .sync_data()
            .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        debug!(path = %self.path, rows = keyed.len(), "re-sorted summary table");
        Ok(())
    }

    pub fn rows(&self) -> Result<Vec<SummaryRow>, RetrievalError> {
        self.read_records()?
            .into_iter()
            .skip(1)
            .map(|record| parse_row(&record))
            .collect()
    }

    fn read_records(&self) -> Result<Vec<Vec<String>>, RetrievalError> {
        if !self.path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(self.path.as_std_path())
            .map_err(csv_error)?;
        reader
            .records()
            .map(|record| {
                record
                    .map(|record| record.iter().map(str::to_string).collect::<Vec<_>>())
                    .map_err(csv_error)
            })
            .collect()
    }
}

fn parse_row(record: &[String]) -> Result<SummaryRow, RetrievalError> {
    let invalid = || RetrievalError::SummaryRow(record.join(","));
    if record.len() != HEADER.len() {
        return Err(invalid());
    }
    let slot = TimeSlot::from_range_label(&record[0]).map_err(|_| invalid())?;
    let number = |value: &str| value.trim().parse::<f64>().map_err(|_| invalid());
    Ok(SummaryRow {
        slot,
        stats: BandStats {
            average: number(&record[1])?,
            minimum: number(&record[2])?,
            maximum: number(&record[3])?,
            std_dev: number(&record[4])?,
        },
    })
}

fn csv_error(err: csv::Error) -> RetrievalError {
    RetrievalError::Filesystem(format!("summary table: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(start: &str, end: &str, average: f64) -> SummaryRow {
        SummaryRow {
            slot: TimeSlot::parse(start, end).unwrap(),
            stats: BandStats {
                average,
                minimum: 0.0,
                maximum: 1.0,
                std_dev: 0.5,
            },
        }
    }

    #[test]
    fn header_written_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("data/MaxFarm_compData.csv")).unwrap();
        let table = SummaryTable::bootstrap(&path).unwrap();
        table.append_row(&row("2022-02-01", "2022-03-01", 2.0)).unwrap();
        table.append_row(&row("2022-01-01", "2022-02-01", 1.0)).unwrap();
        SummaryTable::bootstrap(&path).unwrap();

        let content = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(content.matches("Date Range").count(), 1);
        assert!(content.starts_with("Date Range,Average,Minimum,Maximum,Standard Deviation"));
        assert!(content.contains("\"('2022-02-01', '2022-03-01')\""));
    }

    #[test]
    fn mismatched_header_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("stats.csv")).unwrap();
        fs::write(path.as_std_path(), "date,mean\n").unwrap();
        let err = SummaryTable::bootstrap(&path).unwrap_err();
        assert!(matches!(err, RetrievalError::SummaryHeader { .. }));
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), "date,mean\n");
    }
}
