use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Project(String);

impl Project {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Project {
    type Err = RetrievalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && !normalized.contains('_')
            && !normalized.contains(['/', '\\', '\n', '\r']);
        if !is_valid {
            return Err(RetrievalError::InvalidProject(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for Project {
    type Error = RetrievalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Project> for String {
    fn from(value: Project) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Preface(String);

impl Preface {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Preface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Preface {
    type Err = RetrievalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() || normalized.contains(['/', '\\', '\n', '\r']) {
            return Err(RetrievalError::InvalidUnit(format!(
                "invalid preface: {value:?}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for Preface {
    type Error = RetrievalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Preface> for String {
    fn from(value: Preface) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimeSlot {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RetrievalError> {
        if end < start {
            return Err(RetrievalError::InvalidUnit(format!(
                "time slot ends before it starts: {start} > {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, RetrievalError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn range_label(&self) -> String {
        format!(
            "('{}', '{}')",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }

    pub fn from_range_label(label: &str) -> Result<Self, RetrievalError> {
        let inner = label
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| RetrievalError::SummaryRow(label.to_string()))?;
        let (start, end) = inner
            .split_once(',')
            .ok_or_else(|| RetrievalError::SummaryRow(label.to_string()))?;
        let unquote = |value: &str| value.trim().trim_matches(['\'', '"']).to_string();
        Self::parse(&unquote(start), &unquote(end))
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, RetrievalError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| RetrievalError::InvalidDate(value.to_string()))
}

/// Splits `[start, end]` into `chunks` evenly spaced edges and pairs neighbours,
/// yielding `chunks - 1` slots. Edges are truncated to whole days.
pub fn timeslots(
    start: NaiveDate,
    end: NaiveDate,
    chunks: usize,
) -> Result<Vec<TimeSlot>, RetrievalError> {
    if chunks == 0 {
        return Err(RetrievalError::InvalidUnit(
            "time span must be split into at least one chunk".to_string(),
        ));
    }
    if end < start {
        return Err(RetrievalError::InvalidUnit(format!(
            "time span ends before it starts: {start} > {end}"
        )));
    }

    let origin = start.and_time(NaiveTime::MIN);
    let span_ms = (end - start).num_milliseconds();
    let edges = (0..chunks as i64)
        .map(|i| (origin + Duration::milliseconds(span_ms * i / chunks as i64)).date())
        .collect::<Vec<_>>();

    edges
        .windows(2)
        .map(|pair| TimeSlot::new(pair[0], pair[1]))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalUnit {
    pub project: Project,
    pub preface: Preface,
    pub index: usize,
    pub slot: TimeSlot,
}

impl RetrievalUnit {
    pub fn new(project: Project, preface: Preface, index: usize, slot: TimeSlot) -> Self {
        Self {
            project,
            preface,
            index,
            slot,
        }
    }

    pub fn for_slots(project: &Project, preface: &Preface, slots: &[TimeSlot]) -> Vec<Self> {
        slots
            .iter()
            .enumerate()
            .map(|(index, slot)| Self::new(project.clone(), preface.clone(), index, *slot))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct Region {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

const METERS_PER_DEGREE: f64 = 111_320.0;

impl Region {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, RetrievalError> {
        let in_range = (-180.0..=180.0).contains(&min_lon)
            && (-180.0..=180.0).contains(&max_lon)
            && (-90.0..=90.0).contains(&min_lat)
            && (-90.0..=90.0).contains(&max_lat);
        if !in_range || min_lon >= max_lon || min_lat >= max_lat {
            return Err(RetrievalError::InvalidUnit(format!(
                "invalid region [{min_lon}, {min_lat}, {max_lon}, {max_lat}]"
            )));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    pub fn pixel_size(&self, resolution: f64) -> Result<ImageSize, RetrievalError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(RetrievalError::InvalidUnit(format!(
                "resolution must be positive, got {resolution}"
            )));
        }
        let mid_lat = ((self.min_lat + self.max_lat) / 2.0).to_radians();
        let width_m = (self.max_lon - self.min_lon) * METERS_PER_DEGREE * mid_lat.cos();
        let height_m = (self.max_lat - self.min_lat) * METERS_PER_DEGREE;
        Ok(ImageSize {
            width: ((width_m / resolution).round() as u32).max(1),
            height: ((height_m / resolution).round() as u32).max(1),
        })
    }
}

impl TryFrom<[f64; 4]> for Region {
    type Error = RetrievalError;

    fn try_from(value: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<Region> for [f64; 4] {
    fn from(value: Region) -> Self {
        [value.min_lon, value.min_lat, value.max_lon, value.max_lat]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn date(value: &str) -> NaiveDate {
        parse_date(value).unwrap()
    }

    #[test]
    fn project_rejects_delimiter() {
        let err = "Max_Farm".parse::<Project>().unwrap_err();
        assert_matches!(err, RetrievalError::InvalidProject(_));
        assert_eq!("MaxFarm".parse::<Project>().unwrap().as_str(), "MaxFarm");
    }

    #[test]
    fn range_label_round_trip() {
        let slot = TimeSlot::new(date("2022-01-01"), date("2022-02-01")).unwrap();
        assert_eq!(slot.range_label(), "('2022-01-01', '2022-02-01')");
        assert_eq!(TimeSlot::from_range_label(&slot.range_label()).unwrap(), slot);
    }

    #[test]
    fn timeslots_pairs_edges() {
        let slots = timeslots(date("2021-01-01"), date("2021-12-31"), 13).unwrap();
        assert_eq!(slots.len(), 12);
        assert_eq!(slots[0].start(), date("2021-01-01"));
        for pair in slots.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
        }
    }

    #[test]
    fn timeslots_keeps_zero_width_slots() {
        let slots = timeslots(date("2022-01-01"), date("2022-01-02"), 4).unwrap();
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|slot| slot.start() == slot.end()));
    }

    #[test]
    fn pixel_size_is_positive() {
        let region = Region::new(-69.9040, 43.8586, -69.8987, 43.8651).unwrap();
        let size = region.pixel_size(30.0).unwrap();
        assert!(size.width >= 1 && size.height >= 1);
        assert!(size.height > size.width);
    }
}
