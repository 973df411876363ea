use anyhow::Result;
use rellydb::btree::{self, Key, Leaf, Pair};
use rellydb::storage::buffer::BufferPool;
use rellydb::storage::{BufferPoolManager, DiskManager, PageId, PAGE_SIZE};
use rellydb::{Database, StorageConfig};
use tempfile::{tempdir, TempDir};

fn create_pool(pool_size: usize) -> Result<(TempDir, BufferPoolManager)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir()?;
    let disk = DiskManager::create(&dir.path().join("heap"))?;
    Ok((dir, BufferPoolManager::new(disk, BufferPool::new(pool_size)?)))
}

#[test]
fn test_single_frame_eviction_reloads_written_page() -> Result<()> {
    let (_dir, mut bpm) = create_pool(1)?;

    let a = bpm.create_page()?;
    let page_a = a.page_id();
    let mut content = vec![0u8; PAGE_SIZE];
    for (i, b) in content.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    a.write().data_mut().copy_from_slice(&content);
    bpm.take_back_page(&a)?;
    drop(a);

    let b = bpm.create_page()?;
    assert_ne!(b.page_id(), page_a);
    assert!(!bpm.is_resident(page_a));
    bpm.take_back_page(&b)?;
    drop(b);

    let a = bpm.fetch_page(page_a)?;
    assert_eq!(&a.read().data()[..], &content[..]);
    bpm.take_back_page(&a)?;
    Ok(())
}

#[test]
fn test_leaf_yields_keys_in_order() -> Result<()> {
    let mut leaf = Leaf::new();
    for n in [5u64, 1, 3] {
        leaf.insert(&Pair::new(Key::from_u64(n), format!("v{}", n).into_bytes()))?;
    }

    let pairs = leaf.pairs().collect::<Result<Vec<_>, _>>()?;
    let keys: Vec<Key> = pairs.iter().map(|p| p.key.clone()).collect();
    assert_eq!(
        keys,
        vec![Key::from_u64(1), Key::from_u64(3), Key::from_u64(5)]
    );
    assert_eq!(pairs[2].value, b"v5");
    Ok(())
}

/// Insert through the root, splitting full leaves and growing the root as
/// needed, the way an embedder drives the page-level helpers.
fn insert(bpm: &mut BufferPoolManager, root: &mut PageId, pair: &Pair) -> Result<()> {
    loop {
        let err = match btree::insert_into_page(bpm, *root, pair) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !matches!(err.root_cause(), rellydb::storage::StorageError::NoFreeSpace { .. }) {
            return Err(err.into());
        }

        let full = btree::find_leaf(bpm, *root, pair.key.as_bytes())?;
        let (separator, left) = btree::split_page(bpm, full)?.expect("full leaf splits");
        if full == *root {
            *root = btree::create_root(bpm, separator, left, full)?;
        } else {
            // Single-level tree: the parent is the root branch.
            let buffer = bpm.fetch_page(*root)?;
            let mut node = btree::Node::load(buffer.read().data())?;
            if let btree::Node::Branch(branch) = &mut node {
                branch.insert_child(separator, left)?;
            }
            node.store(buffer.write().data_mut())?;
            bpm.take_back_page(&buffer)?;
        }
    }
}

#[test]
fn test_tree_survives_splits_and_reopen() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir()?;
    let config = StorageConfig::new(dir.path().join("tree.db")).with_pool_size(8);
    let count = 600u64;

    let (root, first_leaf) = {
        let db = Database::create(&config)?;
        let pool = db.buffer_pool();
        let mut bpm = pool.lock();

        let first_leaf = btree::create_leaf(&mut bpm)?;
        let mut root = first_leaf;
        // Insert in an interleaved order so splits happen in both halves.
        for n in (0..count).filter(|n| n % 2 == 0).chain((0..count).filter(|n| n % 2 == 1)) {
            insert(&mut bpm, &mut root, &Pair::new(Key::from_u64(n), n.to_be_bytes().to_vec()))?;
        }
        assert_ne!(root, first_leaf);
        drop(bpm);
        db.close()?;
        (root, first_leaf)
    };

    let db = Database::open(&config)?;
    let pool = db.buffer_pool();
    let mut bpm = pool.lock();

    for n in [0u64, 1, 299, 300, count - 1] {
        let value = btree::get(&mut bpm, root, &Key::from_u64(n).into_bytes())?;
        assert_eq!(value, Some(n.to_be_bytes().to_vec()));
    }
    assert_eq!(btree::get(&mut bpm, root, &Key::from_u64(count).into_bytes())?, None);

    // The leaf chain starts at the leftmost leaf, which every split has
    // moved to a fresh page.
    let leftmost = btree::find_leaf(&mut bpm, root, &[])?;
    assert_ne!(leftmost, first_leaf);
    let all = btree::scan_leaves(&mut bpm, leftmost)?;
    let keys: Vec<Key> = all.into_iter().map(|p| p.key).collect();
    let expected: Vec<Key> = (0..count).map(Key::from_u64).collect();
    assert_eq!(keys, expected);
    Ok(())
}
