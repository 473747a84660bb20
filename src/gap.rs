use serde::Serialize;
use tracing::debug;

use crate::domain::RetrievalUnit;
use crate::error::RetrievalError;
use crate::ledger::CompletionLedger;
use crate::naming::{CanonicalName, canonical_name, parse_name};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapPlan {
    Satisfied,
    Full(Vec<RetrievalUnit>),
    Partial(Vec<RetrievalUnit>),
}

impl GapPlan {
    pub fn units(&self) -> &[RetrievalUnit] {
        match self {
            GapPlan::Satisfied => &[],
            GapPlan::Full(units) | GapPlan::Partial(units) => units,
        }
    }

    pub fn into_units(self) -> Vec<RetrievalUnit> {
        match self {
            GapPlan::Satisfied => Vec::new(),
            GapPlan::Full(units) | GapPlan::Partial(units) => units,
        }
    }

    pub fn len(&self) -> usize {
        self.units().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units().is_empty()
    }

    pub fn kind(&self) -> GapKind {
        match self {
            GapPlan::Satisfied => GapKind::Satisfied,
            GapPlan::Full(_) => GapKind::Full,
            GapPlan::Partial(_) => GapKind::Partial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GapKind {
    Satisfied,
    Full,
    Partial,
}

/// Splits `units` into satisfied and missing by asking the ledger about each
/// canonical name. Missing units keep their relative order.
pub fn compute_gap(
    units: &[RetrievalUnit],
    ledger: &dyn CompletionLedger,
    ext: &str,
) -> Result<GapPlan, RetrievalError> {
    let mut missing: Vec<CanonicalName> = Vec::new();
    for unit in units {
        let name = canonical_name(unit, ext);
        if !ledger.exists(&name)? {
            missing.push(name);
        }
    }

    debug!(
        requested = units.len(),
        missing = missing.len(),
        ledger = %ledger.location(),
        "computed gap"
    );

    if missing.is_empty() {
        return Ok(GapPlan::Satisfied);
    }
    if missing.len() == units.len() {
        return Ok(GapPlan::Full(units.to_vec()));
    }

    let group = &units[0];
    let rebuilt = missing
        .iter()
        .map(|name| {
            let parsed = parse_name(name.as_str())?;
            if parsed.project != group.project || parsed.preface != group.preface {
                return Err(RetrievalError::MalformedName(name.to_string()));
            }
            Ok(parsed.into_unit())
        })
        .collect::<Result<Vec<_>, RetrievalError>>()?;
    Ok(GapPlan::Partial(rebuilt))
}
