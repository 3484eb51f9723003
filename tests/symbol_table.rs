use std::collections::HashMap;
use std::path::Path;

use journal_store::column::Column;
use journal_store::common::{JournalError, JournalMode, VALUE_IS_NULL, VALUE_NOT_FOUND};
use journal_store::{Result, SymbolTable, SymbolTableOptions};
use proptest::prelude::*;
use tempfile::tempdir;

fn open(dir: &Path, mode: JournalMode, capacity: usize) -> Result<SymbolTable> {
    let options = SymbolTableOptions { capacity, avg_string_size: 4 };
    SymbolTable::open(dir, "sym", mode, options, None, -1)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn keys_are_dense_and_stable_across_restart(values in proptest::collection::vec("[a-e]{1,3}", 1..80)) {
        let dir = tempdir().unwrap();
        let mut expected: HashMap<String, i32> = HashMap::new();
        {
            // 小容量迫使桶链跨多个块
            let mut st = open(dir.path(), JournalMode::Append, 10).unwrap();
            for v in &values {
                let next = expected.len() as i32;
                let want = *expected.entry(v.clone()).or_insert(next);
                prop_assert_eq!(st.put(v.as_str()).unwrap(), want);
            }
            prop_assert_eq!(st.size() as usize, expected.len());
            st.commit().unwrap();
        }

        let mut st = open(dir.path(), JournalMode::Read, 10).unwrap();
        prop_assert_eq!(st.size() as usize, expected.len());
        for (v, &key) in &expected {
            prop_assert_eq!(st.get(v.as_str()).unwrap(), key);
            prop_assert_eq!(&st.value(key).unwrap(), v);
        }
    }
}

#[test]
fn reopen_for_append_keeps_dedup() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let mut st = open(dir.path(), JournalMode::Append, 100)?;
        for v in ["AB", "CD", "EF"] {
            st.put(v)?;
        }
        st.commit()?;
        st.close();
    }
    let mut st = open(dir.path(), JournalMode::BulkAppend, 100)?;
    assert_eq!(st.put("CD")?, 1);
    assert_eq!(st.put("GH")?, 3);
    assert_eq!(st.size(), 4);
    Ok(())
}

#[test]
fn sentinels_and_domain_errors() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let mut st = open(dir.path(), JournalMode::Append, 100)?;
    st.put("known")?;
    assert_eq!(st.get_quick(None)?, VALUE_IS_NULL);
    assert_eq!(st.get(None)?, VALUE_IS_NULL);
    assert_eq!(st.get_quick("unknown")?, VALUE_NOT_FOUND);
    match st.get("unknown") {
        Err(JournalError::InvalidSymbolValue { column, value }) => {
            assert_eq!(column, "sym");
            assert_eq!(value, "unknown");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(st.value(5), Err(JournalError::InvalidSymbolKey { key: 5, size: 1, .. })));
    assert!(!st.value_exists("unknown")?);
    Ok(())
}

#[test]
fn pre_load_and_values_iterate_in_key_order() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let mut st = open(dir.path(), JournalMode::Append, 100)?;
        for v in ["x", "y", "x", "z"] {
            st.put(v)?;
        }
        st.commit()?;
    }
    let mut st = open(dir.path(), JournalMode::Read, 100)?;
    let values = st.values().collect::<Result<Vec<_>>>()?;
    assert_eq!(values, ["x", "y", "z"]);
    assert_eq!(st.pre_load()?.get("z")?, 2);
    assert_eq!(st.value(1)?, "y");
    Ok(())
}

#[test]
fn update_index_after_raw_appends() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let mut st = open(dir.path(), JournalMode::Append, 100)?;
    st.put("a")?;

    let data = st.data_column()?;
    data.put_string(Some("b"))?;
    data.put_string(Some("c"))?;
    data.commit()?;
    assert_eq!(st.size(), 1);
    assert_eq!(st.get_quick("b")?, VALUE_NOT_FOUND);

    st.update_index(1, 3)?;
    st.align_size()?;
    assert_eq!(st.size(), 3);
    assert_eq!(st.get("b")?, 1);
    assert_eq!(st.get("c")?, 2);
    assert_eq!(st.put("c")?, 2);
    Ok(())
}

#[test]
fn truncate_is_idempotent_and_persists() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let mut st = open(dir.path(), JournalMode::Append, 100)?;
        for v in ["a", "b", "c", "d", "e"] {
            st.put(v)?;
        }
        st.value(4)?;
        st.truncate(2)?;
        st.truncate(2)?;
        st.truncate(7)?;
        assert_eq!(st.size(), 2);
        assert!(st.value(4).is_err());
        assert_eq!(st.get_quick("d")?, VALUE_NOT_FOUND);
        st.commit()?;
    }
    let mut st = open(dir.path(), JournalMode::Append, 100)?;
    assert_eq!(st.size(), 2);
    assert_eq!(st.put("e")?, 2);
    st.truncate_all()?;
    assert_eq!(st.size(), 0);
    assert_eq!(st.get_quick("a")?, VALUE_NOT_FOUND);
    Ok(())
}

#[test]
fn apply_tx_sets_size_and_index_checkpoint() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let checkpoint;
    {
        let mut st = open(dir.path(), JournalMode::Append, 100)?;
        st.put("a")?;
        st.put("b")?;
        st.commit()?;
        checkpoint = st.index_tx_address();
        assert!(checkpoint > 0);
        st.apply_tx(1, checkpoint)?;
        assert_eq!(st.size(), 1);
        assert!(st.value(1).is_err());
    }
    let options = SymbolTableOptions { capacity: 100, avg_string_size: 4 };
    let st = SymbolTable::open(dir.path(), "sym", JournalMode::Read, options, Some(2), -1)?;
    assert_eq!(st.size(), 2);
    assert_eq!(st.index_tx_address(), checkpoint);
    assert_eq!(st.hash_key_count(), 20);
    Ok(())
}

#[test]
fn reopen_with_other_capacity_uses_stored_buckets() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let values: Vec<String> = (0..30).map(|i| format!("v{i}")).collect();
    {
        let mut st = open(dir.path(), JournalMode::Append, 100)?;
        for v in &values {
            st.put(v.as_str())?;
        }
        st.commit()?;
    }

    for capacity in [1000, 50] {
        let mut st = open(dir.path(), JournalMode::Append, capacity)?;
        assert_eq!(st.hash_key_count(), 20);
        for (key, v) in values.iter().enumerate() {
            assert_eq!(st.put(v.as_str())?, key as i32);
        }
        assert_eq!(st.size(), 30);
        assert_eq!(st.put("fresh")?, 30);
        assert_eq!(st.get("fresh")?, 30);
        st.truncate(30)?;
        st.commit()?;
    }
    Ok(())
}
