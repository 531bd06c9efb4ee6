#![forbid(unsafe_code)]

use dealer_storage::kv::{StorageError, VersionedKvStore};
use dealer_storage::repo::{StoreCursor, VersionedStore};

fn bytes(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

fn seeded(keys: &[&str]) -> VersionedKvStore {
    let mut s = VersionedKvStore::new_in_memory();
    for k in keys {
        s.put_state(k, bytes(&format!("value_{k}"))).unwrap();
    }
    s
}

#[test]
fn at_kv_db_01_put_get_delete_round_trip() {
    let mut s = VersionedKvStore::new_in_memory();
    assert_eq!(s.get_state("D1").unwrap(), None);

    s.put_state("D1", bytes("one")).unwrap();
    assert_eq!(s.get_state("D1").unwrap(), Some(bytes("one")));

    s.put_state("D1", bytes("two")).unwrap();
    assert_eq!(s.get_state("D1").unwrap(), Some(bytes("two")));

    s.del_state("D1").unwrap();
    assert_eq!(s.get_state("D1").unwrap(), None);
    assert_eq!(s.live_key_count(), 0);
}

#[test]
fn at_kv_db_02_history_keeps_every_version_and_tombstone() {
    let mut s = VersionedKvStore::new_in_memory();
    s.put_state("D1", bytes("one")).unwrap();
    s.put_state("D1", bytes("two")).unwrap();
    s.del_state("D1").unwrap();

    let rows: Vec<_> = s
        .history_for_key("D1")
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].value, bytes("one"));
    assert_eq!(rows[1].value, bytes("two"));
    assert!(rows[2].is_delete);
    assert!(rows[2].value.is_empty());
    assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(s.open_cursor_count(), 0);
}

#[test]
fn at_kv_db_03_history_of_unknown_key_is_empty() {
    let s = VersionedKvStore::new_in_memory();
    assert_eq!(s.history_for_key("nope").unwrap().count(), 0);
}

#[test]
fn at_kv_db_04_open_range_scan_returns_all_live_keys_in_order() {
    let mut s = seeded(&["D3", "D1", "D2"]);
    s.del_state("D2").unwrap();

    let keys: Vec<String> = s
        .state_by_range("", "")
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(keys, vec!["D1".to_string(), "D3".to_string()]);
}

#[test]
fn at_kv_db_05_bounded_scan_is_start_inclusive_end_exclusive() {
    let s = seeded(&["a", "b", "c", "d"]);

    let keys: Vec<String> = s
        .state_by_range("b", "d")
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);

    let tail: Vec<String> = s
        .state_by_range("c", "")
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(tail, vec!["c".to_string(), "d".to_string()]);

    assert_eq!(s.state_by_range("d", "a").unwrap().count(), 0);
}

#[test]
fn at_kv_db_06_cursors_release_on_exhaustion_drop_and_close() {
    let s = seeded(&["a", "b", "c"]);

    let exhausted = s.state_by_range("", "").unwrap();
    assert_eq!(s.open_cursor_count(), 1);
    assert_eq!(exhausted.count(), 3);
    assert_eq!(s.open_cursor_count(), 0);

    {
        let mut abandoned = s.state_by_range("", "").unwrap();
        let _ = abandoned.next();
        assert_eq!(s.open_cursor_count(), 1);
    }
    assert_eq!(s.open_cursor_count(), 0);

    let mut closed = s.history_for_key("a").unwrap();
    closed.close();
    assert_eq!(s.open_cursor_count(), 0);
    assert!(closed.next().is_none());
    drop(closed);
    assert_eq!(s.open_cursor_count(), 0);
}

#[test]
fn at_kv_db_07_empty_key_and_empty_value_are_refused() {
    let mut s = VersionedKvStore::new_in_memory();
    assert!(matches!(
        s.put_state("", bytes("x")),
        Err(StorageError::ContractViolation(_))
    ));
    assert!(matches!(
        s.put_state("D1", Vec::new()),
        Err(StorageError::ContractViolation(_))
    ));
    assert!(s.key_modifications("D1").is_empty());
}

#[test]
fn at_kv_db_08_later_writes_never_rewrite_earlier_versions() {
    let mut s = VersionedKvStore::new_in_memory();
    s.put("D1", bytes("one")).unwrap();
    s.put("D1", bytes("two")).unwrap();
    let before = s.key_modifications("D1").to_vec();

    s.delete("D1").unwrap();
    s.put("D1", bytes("three")).unwrap();

    let after = s.key_modifications("D1");
    assert_eq!(after.len(), 4);
    assert_eq!(&after[..2], before.as_slice());
}

#[test]
fn at_kv_db_09_replay_restores_state_and_history_verbatim() {
    let mut source = VersionedKvStore::new_in_memory();
    source.put("D1", bytes("one")).unwrap();
    source.put("D2", bytes("two")).unwrap();
    source.delete("D1").unwrap();

    let mut log: Vec<(String, _)> = Vec::new();
    for key in ["D1", "D2"] {
        for m in source.key_modifications(key) {
            log.push((key.to_string(), m.clone()));
        }
    }
    log.sort_by_key(|(_, m)| m.timestamp);

    let mut restored = VersionedKvStore::new_in_memory();
    for (key, m) in log {
        restored.apply_modification(&key, m).unwrap();
    }
    assert_eq!(restored.get("D1").unwrap(), None);
    assert_eq!(restored.get("D2").unwrap(), Some(bytes("two")));
    assert_eq!(
        restored.key_modifications("D1"),
        source.key_modifications("D1")
    );

    let next = restored.put("D2", bytes("three")).unwrap();
    assert!(source
        .key_modifications("D2")
        .iter()
        .all(|m| m.tx_id != next));
}

#[test]
fn at_kv_db_10_replay_rejects_out_of_order_and_duplicate_versions() {
    let mut source = VersionedKvStore::new_in_memory();
    source.put("D1", bytes("one")).unwrap();
    source.put("D1", bytes("two")).unwrap();
    let rows = source.key_modifications("D1").to_vec();

    let mut restored = VersionedKvStore::new_in_memory();
    restored.apply_modification("D1", rows[1].clone()).unwrap();
    assert!(matches!(
        restored.apply_modification("D1", rows[0].clone()),
        Err(StorageError::OutOfOrderReplay { .. })
    ));
    assert!(matches!(
        restored.apply_modification("D1", rows[1].clone()),
        Err(StorageError::OutOfOrderReplay { .. })
    ));
}
