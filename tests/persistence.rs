//! Durability behavior of the file-backed page cache.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use tempfile::tempdir;

use shale::btree::{BTree, TreeOptions};
use shale::pager::{FilePager, FilePagerOptions, PageCache};
use shale::types::ShaleError;

fn tree_options() -> TreeOptions {
    TreeOptions {
        order: Some(8),
        ..TreeOptions::default()
    }
}

#[test]
fn tree_survives_close_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.shale");

    {
        let pager = Arc::new(FilePager::create(&path, FilePagerOptions::default()).unwrap());
        let tree: BTree<u64, String> = BTree::open_or_create(pager, tree_options()).unwrap();
        for k in 0..500u64 {
            tree.put(&k, &format!("value-{k}")).unwrap();
        }
        for k in (0..500u64).step_by(5) {
            assert!(tree.delete(&k).unwrap());
        }
        tree.sync().unwrap();
    }

    let pager = Arc::new(FilePager::open(&path, FilePagerOptions::default()).unwrap());
    let tree: BTree<u64, String> = BTree::open_or_create(pager, tree_options()).unwrap();
    assert_eq!(tree.key_count(), 400);
    for k in 0..500u64 {
        let expected = if k % 5 == 0 {
            None
        } else {
            Some(format!("value-{k}"))
        };
        assert_eq!(tree.get(&k).unwrap(), expected);
    }
    tree.check_invariants().unwrap();
}

#[test]
fn reopened_tree_keeps_growing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.shale");

    {
        let pager = Arc::new(FilePager::create(&path, FilePagerOptions::default()).unwrap());
        let tree: BTree<u64, u64> = BTree::open_or_create(pager, tree_options()).unwrap();
        for k in 0..200u64 {
            tree.put(&k, &k).unwrap();
        }
        tree.sync().unwrap();
    }
    {
        let pager = Arc::new(FilePager::open(&path, FilePagerOptions::default()).unwrap());
        let tree: BTree<u64, u64> = BTree::open_or_create(pager, tree_options()).unwrap();
        for k in 200..400u64 {
            tree.put(&k, &k).unwrap();
        }
        tree.sync().unwrap();
    }

    let pager = Arc::new(FilePager::open(&path, FilePagerOptions::default()).unwrap());
    let tree: BTree<u64, u64> = BTree::open_or_create(pager, tree_options()).unwrap();
    assert_eq!(tree.key_count(), 400);
    let keys: Vec<u64> = tree
        .range_scan(&0, &1_000)
        .unwrap()
        .map(|entry| entry.map(|(k, _)| k))
        .collect::<shale::types::Result<_>>()
        .unwrap();
    assert_eq!(keys, (0..400u64).collect::<Vec<_>>());
}

#[test]
fn torn_page_is_reported_as_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.shale");
    let page_size;

    {
        let pager = Arc::new(FilePager::create(&path, FilePagerOptions::default()).unwrap());
        page_size = pager.page_size() as u64;
        let tree: BTree<u64, u64> = BTree::open_or_create(pager, tree_options()).unwrap();
        for k in 0..100u64 {
            tree.put(&k, &k).unwrap();
        }
        tree.sync().unwrap();
    }

    // Damage a node page body behind the pager's back. Page 1 is the first
    // allocated page and always holds a node.
    {
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(page_size + page_size / 2)).unwrap();
        file.write_all(&[0xAA, 0xBB, 0xCC]).unwrap();
    }

    // The damage surfaces either while the reopened tree walks its pages or
    // on the first lookup that touches the torn page.
    let pager = Arc::new(FilePager::open(&path, FilePagerOptions::default()).unwrap());
    let mut hit_corruption = false;
    match BTree::<u64, u64>::open_or_create(pager, tree_options()) {
        Err(ShaleError::Corruption(_)) => hit_corruption = true,
        Err(other) => panic!("unexpected error: {other}"),
        Ok(tree) => {
            for k in 0..100u64 {
                match tree.get(&k) {
                    Ok(_) => {}
                    Err(ShaleError::Corruption(_)) => {
                        hit_corruption = true;
                        break;
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }
    }
    assert!(hit_corruption);
}

#[test]
fn verification_can_be_disabled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.shale");

    {
        let pager = Arc::new(FilePager::create(&path, FilePagerOptions::default()).unwrap());
        let tree: BTree<u64, u64> = BTree::open_or_create(pager, tree_options()).unwrap();
        tree.put(&1, &1).unwrap();
        tree.sync().unwrap();
    }

    let options = FilePagerOptions {
        checksum_verify_on_read: false,
        ..FilePagerOptions::default()
    };
    let pager = Arc::new(FilePager::open(&path, options).unwrap());
    let tree: BTree<u64, u64> = BTree::open_or_create(pager, tree_options()).unwrap();
    assert_eq!(tree.get(&1).unwrap(), Some(1));
}
