#![forbid(unsafe_code)]

use dealer_kernel_contracts::asset::{AssetFields, DealerId};
use dealer_os::{
    AssetError, AssetHistory, AssetLifecycle, AssetLifecycleManager, HistoryReconstructor,
};
use dealer_storage::{VersionedKvStore, VersionedStore};

fn dealer(id: &str) -> DealerId {
    DealerId::new(id).unwrap()
}

fn d1_initial() -> AssetFields {
    AssetFields {
        msisdn: "9990001111".to_string(),
        mpin: "1234".to_string(),
        balance: 100.0,
        status: "ACTIVE".to_string(),
        trans_amount: 0.0,
        trans_type: "NONE".to_string(),
        remarks: "init".to_string(),
    }
}

fn d1_topup() -> AssetFields {
    AssetFields {
        balance: 150.0,
        trans_amount: 50.0,
        trans_type: "CREDIT".to_string(),
        remarks: "topup".to_string(),
        ..d1_initial()
    }
}

#[test]
fn at_history_db_01_create_update_delete_scenario() {
    let mut s = VersionedKvStore::new_in_memory();
    let m = AssetLifecycleManager::new();
    let h = HistoryReconstructor::new();
    let id = dealer("D1");

    m.create(&mut s, &id, d1_initial()).unwrap();
    assert_eq!(m.read(&s, &id).unwrap().fields(), d1_initial());

    m.update(&mut s, &id, d1_topup()).unwrap();
    let updated = m.read(&s, &id).unwrap();
    assert_eq!(updated.balance, 150.0);
    assert_eq!(updated.msisdn, "9990001111");
    assert_eq!(updated.status, "ACTIVE");

    m.delete(&mut s, &id).unwrap();
    assert!(matches!(m.read(&s, &id), Err(AssetError::NotFound { .. })));

    let entries = h.history_entries(&s, &id).unwrap();
    assert_eq!(entries.len(), 3);

    assert!(!entries[0].is_delete);
    assert_eq!(entries[0].record.balance, 100.0);
    assert_eq!(entries[0].record.remarks, "init");

    assert!(!entries[1].is_delete);
    assert_eq!(entries[1].record.balance, 150.0);
    assert_eq!(entries[1].record.trans_type, "CREDIT");

    assert!(entries[2].is_delete);
    assert_eq!(entries[2].record.dealer_id, id);
    assert_eq!(entries[2].record.fields(), AssetFields::default());

    assert!(entries
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(s.open_cursor_count(), 0);
}

#[test]
fn at_history_db_02_entries_follow_store_commit_order_exactly() {
    let mut s = VersionedKvStore::new_in_memory();
    let m = AssetLifecycleManager::new();
    let h = HistoryReconstructor::new();
    let id = dealer("D7");

    m.create(&mut s, &id, d1_initial()).unwrap();
    for balance in [110.0, 120.0, 130.0] {
        m.update(
            &mut s,
            &id,
            AssetFields {
                balance,
                ..d1_initial()
            },
        )
        .unwrap();
    }

    let entries = h.history_entries(&s, &id).unwrap();
    let balances: Vec<f64> = entries.iter().map(|e| e.record.balance).collect();
    assert_eq!(balances, vec![100.0, 110.0, 120.0, 130.0]);

    let stored = s.key_modifications("D7");
    for (entry, version) in entries.iter().zip(stored) {
        assert_eq!(entry.tx_id, version.tx_id);
        assert_eq!(entry.timestamp, version.timestamp);
    }
}

#[test]
fn at_history_db_03_history_survives_recreate_after_delete() {
    let mut s = VersionedKvStore::new_in_memory();
    let m = AssetLifecycleManager::new();
    let h = HistoryReconstructor::new();
    let id = dealer("D1");

    m.create(&mut s, &id, d1_initial()).unwrap();
    m.delete(&mut s, &id).unwrap();
    m.create(&mut s, &id, d1_topup()).unwrap();

    let flags: Vec<bool> = h
        .history_entries(&s, &id)
        .unwrap()
        .iter()
        .map(|e| e.is_delete)
        .collect();
    assert_eq!(flags, vec![false, true, false]);
}

#[test]
fn at_history_db_04_unknown_key_has_empty_history() {
    let s = VersionedKvStore::new_in_memory();
    let h = HistoryReconstructor::new();
    assert!(h.history_entries(&s, &dealer("none")).unwrap().is_empty());
}

#[test]
fn at_history_db_05_corrupt_version_fails_and_releases_stream() {
    let mut s = VersionedKvStore::new_in_memory();
    let m = AssetLifecycleManager::new();
    let h = HistoryReconstructor::new();
    let id = dealer("D1");

    m.create(&mut s, &id, d1_initial()).unwrap();
    s.put_state("D1", b"{\"DEALERID\":".to_vec()).unwrap();
    m.update(&mut s, &id, d1_topup()).unwrap();

    let mut it = h.history_of(&s, &id).unwrap();
    assert!(matches!(it.next(), Some(Ok(_))));
    assert!(matches!(it.next(), Some(Err(AssetError::DecodeError { .. }))));
    assert_eq!(s.open_cursor_count(), 0);
    assert!(it.next().is_none());
    drop(it);
    assert_eq!(s.open_cursor_count(), 0);
}

#[test]
fn at_history_db_06_abandoned_history_stream_is_released() {
    let mut s = VersionedKvStore::new_in_memory();
    let m = AssetLifecycleManager::new();
    let h = HistoryReconstructor::new();
    let id = dealer("D1");
    m.create(&mut s, &id, d1_initial()).unwrap();
    m.update(&mut s, &id, d1_topup()).unwrap();

    {
        let mut it = h.history_of(&s, &id).unwrap();
        assert!(it.next().is_some());
        assert_eq!(s.open_cursor_count(), 1);
    }
    assert_eq!(s.open_cursor_count(), 0);
}
