mod common;

use std::collections::BTreeSet;

use packstore::{ErrorKind, LockedBucket, Packer};
use packstore_codec::{Bucket, BucketCodec};
use packstore_types::Item;

use common::{colliding_ids, ctx, memory_packer};

fn items(ids: &[String]) -> Vec<Item> {
    ids.iter()
        .map(|id| Item::new(id.clone(), format!("data-{id}").into_bytes()))
        .collect()
}

fn leaf(key: &str, items: &[Item]) -> Bucket {
    let mut bucket = Bucket::leaf(key);
    for item in items {
        bucket.insert_item(item.clone());
    }
    bucket
}

fn interior(key: &str) -> Bucket {
    let mut bucket = Bucket::leaf(key);
    bucket.mark_sharded();
    bucket
}

fn path(packer: &Packer, key: &str) -> String {
    packer.bucket_storage().expand_key(key)
}

fn encode(bucket: &Bucket) -> Vec<u8> {
    BucketCodec::default().encode(bucket).unwrap()
}

fn ids_of(items: &[Item]) -> BTreeSet<String> {
    items.iter().map(|i| i.id.clone()).collect()
}

#[test]
fn replacement_reports_present_and_deleted() {
    let (_backend, packer) = memory_packer();
    let a = items(&colliding_ids(10, "001", "a"));
    let b = items(&colliding_ids(10, "002", "b"));
    for bucket in [interior("00"), leaf("00/1", &a), leaf("00/2", &b)] {
        packer.put_bucket(&ctx(), &LockedBucket::detached(bucket)).unwrap();
    }

    let replacement = leaf("00/1", &a[..8]);
    let result = packer
        .invalidate_items(&ctx(), &path(&packer, "00/1"), Some(&encode(&replacement)))
        .unwrap();
    assert_eq!(ids_of(&result.present), ids_of(&a[..8]));
    assert_eq!(ids_of(&result.deleted), ids_of(&a[8..]));

    for item in &a[8..] {
        assert!(packer.get_item(&ctx(), &item.id).unwrap().is_none());
    }
    for item in &b {
        assert_eq!(packer.get_item(&ctx(), &item.id).unwrap().as_ref(), Some(item));
    }
}

#[test]
fn arrival_order_does_not_lose_items() {
    let a = items(&colliding_ids(10, "001", "a"));
    let b = items(&colliding_ids(10, "002", "b"));
    let remote = [
        ("00", interior("00")),
        ("00/1", leaf("00/1", &a)),
        ("00/2", leaf("00/2", &b)),
    ];
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    let everything: BTreeSet<String> = ids_of(&a).union(&ids_of(&b)).cloned().collect();

    for order in orders {
        let (_backend, packer) = memory_packer();
        packer.put_items(&ctx(), a.iter().chain(&b).cloned().collect()).unwrap();
        assert_eq!(packer.bucket_key_for_item_id(&ctx(), &a[0].id).unwrap(), "00");

        let mut present = BTreeSet::new();
        for index in order {
            let (key, bucket) = &remote[index];
            let result = packer
                .invalidate_items(&ctx(), &path(&packer, key), Some(&encode(bucket)))
                .unwrap();
            for item in &result.deleted {
                present.remove(&item.id);
            }
            present.extend(result.present.iter().map(|i| i.id.clone()));
            if order[2] == 0 && *key == "00" {
                // Children already arrived, so nothing the parent held is lost.
                assert!(result.deleted.is_empty(), "order {order:?}");
            }
        }

        assert_eq!(present, everything, "order {order:?}");
        for item in a.iter().chain(&b) {
            assert_eq!(
                packer.get_item(&ctx(), &item.id).unwrap().as_ref(),
                Some(item),
                "order {order:?}"
            );
        }
        assert_eq!(ids_of(&packer.all_items(&ctx()).unwrap()), everything, "order {order:?}");
    }
}

#[test]
fn deleted_bucket_drops_its_items() {
    let (_backend, packer) = memory_packer();
    let a = items(&colliding_ids(3, "00", "gone"));
    packer.put_items(&ctx(), a.clone()).unwrap();

    let result = packer.invalidate_items(&ctx(), &path(&packer, "00"), None).unwrap();
    assert!(result.present.is_empty());
    assert_eq!(ids_of(&result.deleted), ids_of(&a));
    assert!(packer.get_item(&ctx(), &a[0].id).unwrap().is_none());
}

#[test]
fn bad_paths_are_arg_errors() {
    let (_backend, packer) = memory_packer();
    let outside = packer
        .invalidate_items(&ctx(), "elsewhere/v2/00", None)
        .unwrap_err();
    assert_eq!(outside.kind(), ErrorKind::Arg);

    let mismatched = packer
        .invalidate_items(&ctx(), &path(&packer, "00"), Some(&encode(&Bucket::leaf("01"))))
        .unwrap_err();
    assert_eq!(mismatched.kind(), ErrorKind::Arg);

    let garbage = packer
        .invalidate_items(&ctx(), &path(&packer, "00"), Some(&[b'S', 0xff, 0xff]))
        .unwrap_err();
    assert_eq!(garbage.kind(), ErrorKind::Codec);
}
