mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use packstore::{ErrorKind, Packer, PackerConfig};
use packstore_storage::{collect_keys, InMemoryStorage, StorageView};
use packstore_types::{HashKey, Item};

use common::{ctx, memory_packer, open};

#[test]
fn put_get_delete() {
    let (_backend, packer) = memory_packer();
    packer.put_item(&ctx(), Item::new("item1", b"data1".to_vec())).unwrap();
    assert_eq!(
        packer.get_item(&ctx(), "item1").unwrap(),
        Some(Item::new("item1", b"data1".to_vec()))
    );
    packer.delete_item(&ctx(), "item1").unwrap();
    assert_eq!(packer.get_item(&ctx(), "item1").unwrap(), None);
}

#[test]
fn items_survive_a_restart() {
    let (backend, packer) = memory_packer();
    packer.put_item(&ctx(), Item::new("item1", b"data1".to_vec())).unwrap();
    drop(packer);

    let reopened = open(backend, PackerConfig::default());
    assert_eq!(
        reopened.get_item(&ctx(), "item1").unwrap(),
        Some(Item::new("item1", b"data1".to_vec()))
    );
}

#[test]
fn batches_span_many_buckets() {
    let (backend, packer) = memory_packer();
    let items: Vec<Item> = (0..257)
        .map(|n| Item::new(format!("item-{n}"), format!("data-{n}").into_bytes()))
        .collect();
    packer.put_items(&ctx(), items.clone()).unwrap();

    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    let found = packer.get_items(&ctx(), &ids).unwrap();
    assert_eq!(found.len(), items.len());
    for (item, found) in items.iter().zip(&found) {
        assert_eq!(found.as_ref(), Some(item));
    }

    let roots: BTreeSet<String> = ids
        .iter()
        .map(|id| HashKey::of(id).as_str()[..2].to_string())
        .collect();
    let stored = collect_keys(&StorageView::new(backend, "packer/buckets/v2/"), &ctx()).unwrap();
    assert_eq!(stored.len(), roots.len());

    packer.delete_items(&ctx(), &ids[..100]).unwrap();
    let found = packer.get_items(&ctx(), &ids).unwrap();
    assert!(found[..100].iter().all(Option::is_none));
    assert!(found[100..].iter().all(Option::is_some));
}

#[test]
fn all_items_lists_every_leaf() {
    let (_backend, packer) = memory_packer();
    let mut expected: Vec<Item> = (0..50)
        .map(|n| Item::new(format!("k{n}"), vec![n as u8]))
        .collect();
    packer.put_items(&ctx(), expected.clone()).unwrap();

    let mut all = packer.all_items(&ctx()).unwrap();
    all.sort_by(|a, b| a.id.cmp(&b.id));
    expected.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(all, expected);
}

#[test]
fn invalid_items_are_rejected_before_writing() {
    let (backend, packer) = memory_packer();
    let err = packer
        .put_items(&ctx(), vec![Item::new("ok", b"1".to_vec()), Item::new("", b"2".to_vec())])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arg);
    assert!(err.to_string().contains("missing ID"));
    assert!(packer.get_item(&ctx(), "ok").unwrap().is_none());
    assert!(collect_keys(&StorageView::new(backend, "packer/buckets/v2/"), &ctx())
        .unwrap()
        .is_empty());

    assert_eq!(packer.get_item(&ctx(), "").unwrap_err().kind(), ErrorKind::Arg);
    assert_eq!(packer.delete_item(&ctx(), "").unwrap_err().kind(), ErrorKind::Arg);
}

#[test]
fn bad_geometry_is_refused() {
    let backend = Arc::new(InMemoryStorage::new());
    for config in [
        PackerConfig::default().with_base_bucket_bits(0),
        PackerConfig::default().with_base_bucket_bits(6),
        PackerConfig::default().with_bucket_shard_bits(2),
        PackerConfig::default().with_bucket_shard_bits(5),
    ] {
        let err = Packer::new(
            StorageView::new(backend.clone(), "packer/buckets/"),
            StorageView::new(backend.clone(), "packer/config/"),
            config.clone(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arg, "{config:?}");
    }
}

#[test]
fn unloaded_packer_refuses_work() {
    let backend = Arc::new(InMemoryStorage::new());
    let packer = Packer::new(
        StorageView::new(backend.clone(), "packer/buckets/"),
        StorageView::new(backend, "packer/config/"),
        PackerConfig::default(),
    )
    .unwrap();
    assert!(!packer.is_initialized());
    let kind = |r: Result<(), packstore::PackerError>| r.unwrap_err().kind();
    assert_eq!(
        kind(packer.put_item(&ctx(), Item::new("a", b"1".to_vec()))),
        ErrorKind::NotInitialized
    );
    assert_eq!(kind(packer.delete_item(&ctx(), "a")), ErrorKind::NotInitialized);
    assert_eq!(packer.all_items(&ctx()).unwrap_err().kind(), ErrorKind::NotInitialized);

    packer.preload_from_disk(&ctx()).unwrap();
    packer.put_item(&ctx(), Item::new("a", b"1".to_vec())).unwrap();
}

#[test]
fn root_width_follows_base_bits() {
    for (bits, width) in [(4u32, 1usize), (8, 2), (12, 3)] {
        let backend = Arc::new(InMemoryStorage::new());
        let packer = open(
            backend.clone(),
            PackerConfig::default().with_base_bucket_bits(bits),
        );
        packer.put_item(&ctx(), Item::new("item1", b"x".to_vec())).unwrap();
        let hash = HashKey::of("item1");
        let expected = &hash.as_str()[..width];
        assert_eq!(packer.bucket_key_for_item_id(&ctx(), "item1").unwrap(), expected);
        let stored = collect_keys(&StorageView::new(backend, "packer/buckets/v2/"), &ctx()).unwrap();
        assert_eq!(stored, vec![expected.to_string()]);
    }
}

#[test]
fn persisted_base_bits_win_over_config() {
    let backend = Arc::new(InMemoryStorage::new());
    let packer = open(backend.clone(), PackerConfig::default().with_base_bucket_bits(4));
    packer.put_item(&ctx(), Item::new("item1", b"x".to_vec())).unwrap();
    drop(packer);

    let reopened = open(backend, PackerConfig::default().with_base_bucket_bits(12));
    assert_eq!(reopened.geometry().unwrap().root_width(), 1);
    assert!(reopened.get_item(&ctx(), "item1").unwrap().is_some());
}

#[test]
fn cancelled_context_stops_writes() {
    let (_backend, packer) = memory_packer();
    let cancelled = ctx();
    cancelled.cancel();
    let err = packer
        .put_item(&cancelled, Item::new("a", b"1".to_vec()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[test]
fn cancelled_context_stops_listing() {
    let (_backend, packer) = memory_packer();
    packer.put_item(&ctx(), Item::new("a", b"1".to_vec())).unwrap();
    let cancelled = ctx();
    cancelled.cancel();

    assert_eq!(packer.all_items(&cancelled).unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(packer.buckets(&cancelled).unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(packer.stats(&cancelled).unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(
        packer.bucket_key_for_item_id(&cancelled, "a").unwrap_err().kind(),
        ErrorKind::Cancelled
    );

    let expired = ctx().with_timeout(std::time::Duration::ZERO);
    assert_eq!(packer.stats(&expired).unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(packer.all_items(&ctx()).unwrap().len(), 1);
}
