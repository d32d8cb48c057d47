mod common;

use std::sync::Arc;
use std::thread;

use packstore::{ErrorKind, PackerConfig};
use packstore_storage::{
    collect_keys, FileStorage, InMemoryStorage, Storage, StorageEntry, StorageView,
};
use packstore_types::Item;

use common::{
    colliding_ids, ctx, limited_packer, noise, open, CancellingStorage, FailingStorage,
};

#[test]
fn crash_before_parent_flip_is_rolled_back() {
    let (backend, packer) = limited_packer(10_000);
    let ids = colliding_ids(10, "000", "crash");
    let items: Vec<Item> = ids.iter().map(|id| Item::new(id.clone(), noise(1000))).collect();

    for item in &items[..9] {
        packer.put_item(&ctx(), item.clone()).unwrap();
    }
    let root = packer.get_bucket(&ctx(), "00", false).unwrap().unwrap();
    assert!(!root.has_shards());
    assert_eq!(root.item_count(), 9);
    let pre_split = backend
        .get(&ctx(), "packer/buckets/v2/00")
        .unwrap()
        .unwrap()
        .value;

    packer.put_item(&ctx(), items[9].clone()).unwrap();
    let root = packer.get_bucket(&ctx(), "00", false).unwrap().unwrap();
    assert!(root.has_shards());
    let child = packer.get_bucket(&ctx(), "000", false).unwrap().unwrap();
    assert!(child.key().starts_with("00/0"));
    drop(packer);

    // Lose part of the split and the parent flip.
    for digit in "3456789abcdef".chars() {
        backend
            .delete(&ctx(), &format!("packer/buckets/v2/00/{digit}"))
            .unwrap();
    }
    backend
        .put(&ctx(), &StorageEntry::new("packer/buckets/v2/00", pre_split))
        .unwrap();

    let recovered = open(backend.clone(), PackerConfig::default());
    for item in &items[..9] {
        assert_eq!(recovered.get_item(&ctx(), &item.id).unwrap().as_ref(), Some(item));
    }
    assert!(recovered.get_item(&ctx(), &items[9].id).unwrap().is_none());
    // The surviving children were orphans and are gone.
    let v2 = StorageView::new(backend, "packer/buckets/v2/");
    assert_eq!(collect_keys(&v2, &ctx()).unwrap(), vec!["00"]);
}

#[test]
fn failed_split_removes_everything_it_wrote() {
    let backend = Arc::new(InMemoryStorage::with_max_value_size(10_000));
    let failing = Arc::new(FailingStorage::new(backend.clone(), "v2/00/0/c"));
    let packer = open(failing, PackerConfig::default());
    let ids = colliding_ids(10, "000", "split");

    for id in &ids[..9] {
        packer.put_item(&ctx(), Item::new(id.clone(), noise(1000))).unwrap();
    }
    let err = packer
        .put_item(&ctx(), Item::new(ids[9].clone(), noise(1000)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let bucket = packer.get_bucket(&ctx(), "0000", false).unwrap().unwrap();
    assert_eq!(bucket.key(), "00");
    assert!(!bucket.has_shards());
    assert_eq!(bucket.item_count(), 9);

    let v2 = StorageView::new(backend, "packer/buckets/v2/");
    assert!(v2.list(&ctx(), "00/").unwrap().is_empty());
    for id in &ids[..9] {
        assert!(packer.get_item(&ctx(), id).unwrap().is_some());
    }
    assert!(packer.get_item(&ctx(), &ids[9]).unwrap().is_none());
}

#[test]
fn cancelled_split_still_cleans_up() {
    let backend = Arc::new(InMemoryStorage::with_max_value_size(10_000));
    let cancelling = Arc::new(CancellingStorage::new(backend.clone(), "v2/00/0"));
    let packer = open(cancelling, PackerConfig::default());
    let ids = colliding_ids(10, "000", "cancelled");

    for id in &ids[..9] {
        packer.put_item(&ctx(), Item::new(id.clone(), noise(1000))).unwrap();
    }
    // The first child lands, then the caller gives up mid-split.
    let err = packer
        .put_item(&ctx(), Item::new(ids[9].clone(), noise(1000)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let v2 = StorageView::new(backend.clone(), "packer/buckets/v2/");
    assert_eq!(collect_keys(&v2, &ctx()).unwrap(), vec!["00"]);

    packer.delete_items(&ctx(), &ids[..9]).unwrap();
    drop(packer);

    let reopened = open(backend.clone(), PackerConfig::default());
    for id in &ids {
        assert!(reopened.get_item(&ctx(), id).unwrap().is_none(), "{id} came back");
    }
    assert!(collect_keys(&v2, &ctx())
        .unwrap()
        .iter()
        .all(|key| !key.starts_with("00/")));
}

#[test]
fn readers_and_invalidations_race_splits() {
    let (_backend, packer) = limited_packer(4_000);
    let packer = Arc::new(packer);
    let ids = colliding_ids(200, "00", "race");

    thread::scope(|scope| {
        let writer = Arc::clone(&packer);
        let ids = &ids;
        scope.spawn(move || {
            for id in ids {
                writer
                    .put_item(&ctx(), Item::new(id.clone(), id.as_bytes().repeat(8)))
                    .unwrap();
            }
        });
        let reader = Arc::clone(&packer);
        scope.spawn(move || {
            for _ in 0..200 {
                let stats = reader.stats(&ctx()).unwrap();
                assert_eq!(stats.buckets, stats.leaf_buckets + stats.interior_buckets);
                reader.buckets(&ctx()).unwrap();
                reader.all_items(&ctx()).unwrap();
                reader.bucket_key_for_item_id(&ctx(), &ids[0]).unwrap();
            }
        });
        let invalidator = Arc::clone(&packer);
        scope.spawn(move || {
            // Re-announce whatever storage currently holds for the bucket.
            for id in ids.iter().step_by(20) {
                let key = invalidator.bucket_key_for_item_id(&ctx(), id).unwrap();
                let storage = invalidator.bucket_storage();
                let Some(entry) = storage.get(&ctx(), &key).unwrap() else {
                    continue;
                };
                invalidator
                    .invalidate_items(&ctx(), &storage.expand_key(&key), Some(&entry.value))
                    .unwrap();
            }
        });
    });

    assert!(packer.stats(&ctx()).unwrap().interior_buckets >= 1);
}

#[test]
fn concurrent_writers_on_one_root() {
    let (backend, packer) = limited_packer(4_000);
    let packer = Arc::new(packer);
    let ids = colliding_ids(400, "00", "concurrent");
    let (left, right) = ids.split_at(200);

    thread::scope(|scope| {
        for half in [left, right] {
            let packer = Arc::clone(&packer);
            scope.spawn(move || {
                for id in half {
                    packer
                        .put_item(&ctx(), Item::new(id.clone(), id.as_bytes().repeat(8)))
                        .unwrap();
                }
            });
        }
    });

    let mut all: Vec<String> = packer.all_items(&ctx()).unwrap().into_iter().map(|i| i.id).collect();
    all.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(all, expected);
    for id in &ids {
        let item = packer.get_item(&ctx(), id).unwrap().unwrap();
        assert_eq!(item.data, id.as_bytes().repeat(8));
    }
    assert!(packer.stats(&ctx()).unwrap().interior_buckets >= 1);

    let reopened = open(backend, PackerConfig::default());
    assert_eq!(reopened.all_items(&ctx()).unwrap().len(), 400);
}

#[test]
fn queued_writes_wait_for_flush() {
    let (backend, packer) = limited_packer(10_000);
    packer.set_queue_mode(true);
    let ids = colliding_ids(12, "00", "queued");
    for id in &ids {
        packer.put_item(&ctx(), Item::new(id.clone(), noise(1000))).unwrap();
    }
    let v2 = StorageView::new(backend.clone(), "packer/buckets/v2/");
    assert!(collect_keys(&v2, &ctx()).unwrap().is_empty());
    assert_eq!(packer.stats(&ctx()).unwrap().pending_writes, 1);

    // Flushing is where the oversize root gets split.
    packer.flush_queue(&ctx()).unwrap();
    assert!(packer.get_bucket(&ctx(), "00", false).unwrap().unwrap().has_shards());
    packer.set_queue_mode(false);

    let reopened = open(backend, PackerConfig::default());
    for id in &ids {
        assert!(reopened.get_item(&ctx(), id).unwrap().is_some());
    }
}

#[test]
fn file_storage_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let ids = colliding_ids(12, "00", "file");
    {
        let storage = Arc::new(FileStorage::open(dir.path()).unwrap().with_max_value_size(10_000));
        let packer = open(storage, PackerConfig::default());
        for id in &ids {
            packer.put_item(&ctx(), Item::new(id.clone(), noise(1000))).unwrap();
        }
        packer.delete_item(&ctx(), &ids[0]).unwrap();
        assert!(packer.get_bucket(&ctx(), "00", false).unwrap().unwrap().has_shards());
    }
    assert!(dir.path().join("packer/buckets/v2/_00").is_file());
    assert!(dir.path().join("packer/config/_config").is_file());

    let storage = Arc::new(FileStorage::open(dir.path()).unwrap());
    let packer = open(storage, PackerConfig::default());
    assert!(packer.get_item(&ctx(), &ids[0]).unwrap().is_none());
    for id in &ids[1..] {
        assert!(packer.get_item(&ctx(), id).unwrap().is_some());
    }
}
