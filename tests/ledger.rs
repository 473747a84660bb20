use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use sat_retrieval_manager::domain::{RetrievalUnit, TimeSlot};
use sat_retrieval_manager::error::RetrievalError;
use sat_retrieval_manager::gap::{GapKind, GapPlan, compute_gap};
use sat_retrieval_manager::ledger::{
    CompletionLedger, DirectoryLedger, FileLedger, LedgerMode, LedgerState, open_ledger,
};
use sat_retrieval_manager::naming::{CanonicalName, canonical_name};

fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).unwrap()
}

fn monthly_units(count: usize) -> Vec<RetrievalUnit> {
    let slots = (0..count)
        .map(|month| {
            TimeSlot::parse(
                &format!("2022-{:02}-01", month + 1),
                &format!("2022-{:02}-01", month + 2),
            )
            .unwrap()
        })
        .collect::<Vec<_>>();
    RetrievalUnit::for_slots(&"MaxFarm".parse().unwrap(), &"Thermal".parse().unwrap(), &slots)
}

#[test]
fn file_ledger_lifecycle() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8(temp.path().join("satData/logs/MaxFarm_oper.txt"));

    assert_eq!(FileLedger::state_at(&path).unwrap(), LedgerState::Uninitialized);
    assert_matches!(FileLedger::open(&path), Err(RetrievalError::LedgerUnavailable(_)));

    let mut ledger = FileLedger::bootstrap(&path).unwrap();
    assert_eq!(ledger.state(), LedgerState::Empty);

    let name = CanonicalName::from_ledger_line("MaxFarm_2022-01-01_2022-02-01_Thermal_0.npy");
    ledger.append(&name).unwrap();
    assert!(ledger.exists(&name).unwrap());

    let reopened = FileLedger::bootstrap(&path).unwrap();
    assert_eq!(reopened.state(), LedgerState::Populated);
    assert!(reopened.exists(&name).unwrap());
    assert_eq!(
        fs::read_to_string(path.as_std_path()).unwrap(),
        "MaxFarm_2022-01-01_2022-02-01_Thermal_0.npy\n"
    );
}

#[test]
fn directory_ledger_uses_artifacts() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path().join("images"));
    let mut ledger = open_ledger(LedgerMode::Directory, &dir).unwrap();
    assert_eq!(ledger.state(), LedgerState::Empty);

    let name = CanonicalName::from_ledger_line("MaxFarm_2022-01-01_2022-02-01_Thermal_0.npy");
    assert!(!ledger.exists(&name).unwrap());
    assert_matches!(ledger.append(&name), Err(RetrievalError::Filesystem(_)));

    fs::write(dir.join(name.as_str()).as_std_path(), b"npy").unwrap();
    ledger.append(&name).unwrap();
    assert!(ledger.exists(&name).unwrap());
    assert!(DirectoryLedger::open(&dir).is_ok());
}

#[test]
fn empty_ledger_passes_request_through() {
    let temp = tempfile::tempdir().unwrap();
    let ledger = FileLedger::bootstrap(&utf8(temp.path().join("oper.txt"))).unwrap();
    let units = monthly_units(4);
    let plan = compute_gap(&units, &ledger, ".npy").unwrap();
    assert_eq!(plan, GapPlan::Full(units));
}

#[test]
fn gap_excludes_satisfied_units_in_order() {
    let temp = tempfile::tempdir().unwrap();
    let mut ledger = FileLedger::bootstrap(&utf8(temp.path().join("oper.txt"))).unwrap();
    let units = monthly_units(6);
    for index in [0, 2, 5] {
        ledger.append(&canonical_name(&units[index], ".npy")).unwrap();
    }

    let plan = compute_gap(&units, &ledger, ".npy").unwrap();
    assert_eq!(plan.kind(), GapKind::Partial);
    assert_eq!(plan.units(), &[units[1].clone(), units[3].clone(), units[4].clone()]);
}

#[test]
fn fully_recorded_request_is_satisfied() {
    let temp = tempfile::tempdir().unwrap();
    let mut ledger = FileLedger::bootstrap(&utf8(temp.path().join("oper.txt"))).unwrap();
    let units = monthly_units(3);
    for unit in &units {
        ledger.append(&canonical_name(unit, ".npy")).unwrap();
    }
    let plan = compute_gap(&units, &ledger, ".npy").unwrap();
    assert_eq!(plan, GapPlan::Satisfied);
    assert!(plan.is_empty());
}

#[test]
fn extension_is_part_of_identity() {
    let temp = tempfile::tempdir().unwrap();
    let mut ledger = FileLedger::bootstrap(&utf8(temp.path().join("oper.txt"))).unwrap();
    let units = monthly_units(2);
    for unit in &units {
        ledger.append(&canonical_name(unit, ".txt")).unwrap();
    }
    assert_eq!(compute_gap(&units, &ledger, ".npy").unwrap().len(), 2);
}

#[test]
fn zero_width_slots_are_distinct_units() {
    let temp = tempfile::tempdir().unwrap();
    let mut ledger = FileLedger::bootstrap(&utf8(temp.path().join("oper.txt"))).unwrap();
    let day = TimeSlot::parse("2022-03-01", "2022-03-01").unwrap();
    let units = RetrievalUnit::for_slots(
        &"MaxFarm".parse().unwrap(),
        &"Thermal".parse().unwrap(),
        &[day, day, day],
    );
    ledger.append(&canonical_name(&units[1], ".npy")).unwrap();

    let plan = compute_gap(&units, &ledger, ".npy").unwrap();
    assert_eq!(plan.kind(), GapKind::Partial);
    let indices = plan.units().iter().map(|unit| unit.index).collect::<Vec<_>>();
    assert_eq!(indices, vec![0, 2]);
    assert!(plan.units().iter().all(|unit| unit.slot == day));
}
