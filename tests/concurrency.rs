//! Multi-threaded access through the latch-crabbing write path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use shale::btree::{BTree, TreeOptions};
use shale::pager::MemoryPager;

fn shared_tree(order: usize) -> Arc<BTree<u64, u64>> {
    let cache = Arc::new(MemoryPager::new(4096));
    let options = TreeOptions {
        order: Some(order),
        ..TreeOptions::default()
    };
    Arc::new(BTree::open_or_create(cache, options).unwrap())
}

#[test]
fn disjoint_writers_land_every_key() {
    let tree = shared_tree(4);
    let threads = 8;
    let per_thread = 250u64;

    let mut handles = Vec::new();
    for t in 0..threads {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let key = t * per_thread + i;
                tree.put(&key, &(key * 2)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.key_count(), threads * per_thread);
    for key in 0..threads * per_thread {
        assert_eq!(tree.get(&key).unwrap(), Some(key * 2));
    }
    tree.check_invariants().unwrap();
}

#[test]
fn readers_run_against_concurrent_writers() {
    let tree = shared_tree(4);
    // Stable keys that never change while the writers churn.
    for key in 0..100u64 {
        tree.put(&key, &key).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..4u64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..500u64 {
                let key = 1_000 + t * 500 + i;
                tree.put(&key, &key).unwrap();
                if i % 3 == 0 {
                    tree.delete(&key).unwrap();
                }
            }
        }));
    }
    for _ in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for round in 0..200u64 {
                let key = round % 100;
                assert_eq!(tree.get(&key).unwrap(), Some(key));
                let mut scan = tree.range_scan(&0, &99).unwrap();
                let mut seen = 0;
                let mut last = None;
                while let Some((k, v)) = scan.next_entry().unwrap() {
                    if k < 100 {
                        assert_eq!(v, k);
                    }
                    assert!(last.map_or(true, |prev| prev < k));
                    last = Some(k);
                    seen += 1;
                }
                assert_eq!(seen, 100);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    tree.check_invariants().unwrap();
}

#[test]
fn mixed_workload_converges_to_a_consistent_tree() {
    let tree = shared_tree(4);
    let threads = 6u64;
    let span = 300u64;

    let mut handles = Vec::new();
    for t in 0..threads {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            // Each thread owns a disjoint key span, so the final content is
            // deterministic even though the interleaving is not.
            let base = t * span;
            for i in 0..span {
                tree.put(&(base + i), &i).unwrap();
            }
            for i in (0..span).step_by(2) {
                assert!(tree.delete(&(base + i)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut expected = BTreeMap::new();
    for t in 0..threads {
        for i in (1..span).step_by(2) {
            expected.insert(t * span + i, i);
        }
    }
    let got: BTreeMap<u64, u64> = tree
        .range_scan(&0, &(threads * span))
        .unwrap()
        .collect::<shale::types::Result<_>>()
        .unwrap();
    assert_eq!(got, expected);
    assert_eq!(tree.key_count(), expected.len() as u64);
    tree.check_invariants().unwrap();
}
