use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::TempDir;

use super::helpers::{add_list, ops_of};
use crate::value::Value;
use crate::wal::Wal;

/// Overwrites `len` bytes at `offset` in the log file.
fn clobber(path: &Path, offset: u64, bytes: &[u8]) {
    let mut f = OpenOptions::new().write(true).open(path).unwrap();
    f.seek(SeekFrom::Start(offset)).unwrap();
    f.write_all(bytes).unwrap();
    f.sync_all().unwrap();
}

/// Two one-add transactions after INIT. With this op shape each
/// transaction occupies 72 bytes: BEGIN(12) ADD(48) END(12).
fn write_two_txns(path: &Path) -> (Vec<crate::oplist::Op>, Vec<crate::oplist::Op>) {
    let txn1 = add_list(&[("a", Value::str("x"), "s")]);
    let txn2 = add_list(&[("b", Value::str("y"), "s")]);
    let wal = Wal::open(path, 4096).unwrap();
    wal.init(0);
    wal.append(&txn1, true).unwrap();
    wal.append(&txn2, true).unwrap();
    (ops_of(&txn1), ops_of(&txn2))
}

fn replay(path: &Path, checkpoint: u64) -> Vec<Vec<crate::oplist::Op>> {
    let wal = Wal::open(path, 4096).unwrap();
    wal.init(checkpoint);
    let mut out = Vec::new();
    wal.redo(|l| {
        if !l.is_empty() {
            out.push(ops_of(&l));
        }
    })
    .unwrap();
    out
}

#[test]
fn a_transaction_without_end_is_discarded() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("db.log");
    let (txn1, _) = write_two_txns(&path);

    // Destroy txn2's END record at offset 144.
    clobber(&path, 144, &[0u8; 12]);

    let replayed = replay(&path, 0);
    assert_eq!(replayed, vec![txn1]);
}

#[test]
fn a_counter_discontinuity_truncates_the_tail() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("db.log");
    let (txn1, _) = write_two_txns(&path);

    // Corrupt the counter of txn2's ADD header at offset 96.
    clobber(&path, 96 + 4, &9999u64.to_le_bytes());

    let replayed = replay(&path, 0);
    assert_eq!(replayed, vec![txn1]);
}

#[test]
fn an_unknown_record_type_truncates_the_tail() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("db.log");
    let (txn1, _) = write_two_txns(&path);

    // Valid counter, bogus type, at txn2's BEGIN (offset 84).
    let mut forged = Vec::new();
    forged.extend_from_slice(&0xdead_beefu32.to_le_bytes());
    forged.extend_from_slice(&84u64.to_le_bytes());
    clobber(&path, 84, &forged);

    let replayed = replay(&path, 0);
    assert_eq!(replayed, vec![txn1]);
}

#[test]
fn both_transactions_survive_an_untouched_log() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("db.log");
    let (txn1, txn2) = write_two_txns(&path);
    let replayed = replay(&path, 0);
    assert_eq!(replayed, vec![txn1, txn2]);
}

#[test]
fn a_stale_logpoint_falls_back_to_a_full_rescan() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("db.log");
    write_two_txns(&path);

    // Pretend the snapshot claims a counter the log never reached. The
    // rescan starts at offset 0 and skips everything the claimed
    // checkpoint already covers.
    let replayed = replay(&path, 2000);
    assert!(replayed.is_empty());
}

#[test]
fn redo_positions_the_log_for_further_appends() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("db.log");
    let (txn1, txn2) = write_two_txns(&path);

    let txn3 = add_list(&[("c", Value::str("z"), "s")]);
    {
        let wal = Wal::open(&path, 4096).unwrap();
        wal.init(0);
        wal.redo(|_| {}).unwrap();
        wal.append(&txn3, true).unwrap();
    }

    let replayed = replay(&path, 0);
    assert_eq!(replayed, vec![txn1, txn2, ops_of(&txn3)]);
}
