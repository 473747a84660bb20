use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{DATE_FORMAT, Preface, Project, RetrievalUnit, TimeSlot, parse_date};
use crate::error::RetrievalError;

const DELIMITER: char = '_';

/// `project_start_end_preface_index{ext}`. The only identity the ledger knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalName(String);

impl CanonicalName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_ledger_line(line: &str) -> Self {
        Self(line.to_string())
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CanonicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn canonical_name(unit: &RetrievalUnit, ext: &str) -> CanonicalName {
    CanonicalName(format!(
        "{project}{d}{start}{d}{end}{d}{preface}{d}{index}{ext}",
        project = unit.project,
        start = unit.slot.start().format(DATE_FORMAT),
        end = unit.slot.end().format(DATE_FORMAT),
        preface = unit.preface,
        index = unit.index,
        d = DELIMITER,
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub project: Project,
    pub slot: TimeSlot,
    pub preface: Preface,
    pub index: usize,
    pub ext: String,
}

impl ParsedName {
    pub fn into_unit(self) -> RetrievalUnit {
        RetrievalUnit::new(self.project, self.preface, self.index, self.slot)
    }
}

pub fn parse_name(name: &str) -> Result<ParsedName, RetrievalError> {
    let malformed = || RetrievalError::MalformedName(name.to_string());

    let tokens = name.split(DELIMITER).collect::<Vec<_>>();
    if tokens.len() < 5 {
        return Err(malformed());
    }

    let project = tokens[0].parse::<Project>().map_err(|_| malformed())?;
    let slot = range_from_tokens(tokens[1], tokens[2]).map_err(|_| malformed())?;
    let preface = tokens[3..tokens.len() - 1]
        .join("_")
        .parse::<Preface>()
        .map_err(|_| malformed())?;

    let last = tokens[tokens.len() - 1];
    let digits = last.chars().take_while(|ch| ch.is_ascii_digit()).count();
    if digits == 0 {
        return Err(malformed());
    }
    let (index, ext) = last.split_at(digits);
    let index = index.parse::<usize>().map_err(|_| malformed())?;

    Ok(ParsedName {
        project,
        slot,
        preface,
        index,
        ext: ext.to_string(),
    })
}

pub fn parse_range_from_name(name: &str) -> Result<TimeSlot, RetrievalError> {
    let tokens = name.split(DELIMITER).collect::<Vec<_>>();
    if tokens.len() < 5 {
        return Err(RetrievalError::MalformedName(name.to_string()));
    }
    range_from_tokens(tokens[1], tokens[2])
        .map_err(|_| RetrievalError::MalformedName(name.to_string()))
}

fn range_from_tokens(start: &str, end: &str) -> Result<TimeSlot, RetrievalError> {
    TimeSlot::new(parse_date(start)?, parse_date(end)?)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn unit(preface: &str, index: usize) -> RetrievalUnit {
        RetrievalUnit::new(
            "MaxFarm".parse().unwrap(),
            preface.parse().unwrap(),
            index,
            TimeSlot::parse("2022-01-01", "2022-02-01").unwrap(),
        )
    }

    #[test]
    fn name_layout() {
        let name = canonical_name(&unit("Thermal", 0), ".npy");
        assert_eq!(name.as_str(), "MaxFarm_2022-01-01_2022-02-01_Thermal_0.npy");
    }

    #[test]
    fn parse_keeps_underscored_preface() {
        let parsed = parse_name(canonical_name(&unit("B8_A", 11), ".png").as_str()).unwrap();
        assert_eq!(parsed.preface.as_str(), "B8_A");
        assert_eq!(parsed.index, 11);
        assert_eq!(parsed.ext, ".png");
    }

    #[test]
    fn short_name_is_malformed() {
        let err = parse_range_from_name("MaxFarm_2022-01-01.npy").unwrap_err();
        assert_matches!(err, RetrievalError::MalformedName(_));
    }

    #[test]
    fn non_date_token_is_malformed() {
        let err = parse_range_from_name("MaxFarm_Thermal_2022-01-01_x_0.npy").unwrap_err();
        assert_matches!(err, RetrievalError::MalformedName(_));
    }
}
