//! B+ tree nodes stored one per page.
//!
//! The first byte of a node page tells leaves from branches. Nodes are
//! decoded into a [`Node`], changed in memory, and stored back into the
//! pinned page. Tree pages reference each other only by [`PageId`], so all
//! navigation goes through the [`BufferPoolManager`].

pub mod branch;
pub mod leaf;
pub mod pair;

pub use branch::Branch;
pub use leaf::Leaf;
pub use pair::{Key, Pair};

use crate::storage::buffer::{Buffer, BufferPoolManager};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;
use log::debug;
use std::sync::Arc;

pub const LEAF_TAG: u8 = 1;
pub const BRANCH_TAG: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Branch,
    Leaf,
}

#[derive(Debug, Clone)]
pub enum Node {
    Branch(Branch),
    Leaf(Leaf),
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Branch(_) => NodeType::Branch,
            Node::Leaf(_) => NodeType::Leaf,
        }
    }

    pub fn load(data: &[u8]) -> StorageResult<Self> {
        match data.first() {
            Some(&LEAF_TAG) => Leaf::from_bytes(data).map(Node::Leaf),
            Some(&BRANCH_TAG) => Branch::from_bytes(data).map(Node::Branch),
            Some(&tag) => Err(StorageError::UnknownNodeType(tag)),
            None => Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: 0,
            }),
        }
    }

    pub fn store(&self, data: &mut [u8]) -> StorageResult<()> {
        match self {
            Node::Branch(branch) => branch.write_to(data),
            Node::Leaf(leaf) => {
                if data.len() != PAGE_SIZE {
                    return Err(StorageError::InvalidPageSize {
                        expected: PAGE_SIZE,
                        actual: data.len(),
                    });
                }
                data.copy_from_slice(leaf.as_bytes());
                Ok(())
            }
        }
    }

    /// Insert into this leaf, or route through this branch to the child
    /// page that covers the key.
    pub fn insert(&mut self, pair: &Pair, pool: &mut BufferPoolManager) -> StorageResult<()> {
        match self {
            Node::Branch(branch) => branch.insert(pair, pool),
            Node::Leaf(leaf) => leaf.insert(pair),
        }
    }

    /// Split in two. `self` keeps the upper half; the returned node holds
    /// the lower half and belongs left of the returned key.
    pub fn split(&mut self) -> StorageResult<(Key, Node)> {
        match self {
            Node::Branch(branch) => branch.split().map(|(key, left)| (key, Node::Branch(left))),
            Node::Leaf(leaf) => leaf.split().map(|(key, left)| (key, Node::Leaf(left))),
        }
    }
}

/// Pin `page_id` for the duration of `f`. The pin is released whether or
/// not `f` succeeds.
fn with_page<T>(
    pool: &mut BufferPoolManager,
    page_id: PageId,
    f: impl FnOnce(&mut BufferPoolManager, &Arc<Buffer>) -> StorageResult<T>,
) -> StorageResult<T> {
    let buffer = pool.fetch_page(page_id)?;
    let result = f(pool, &buffer);
    let released = pool.take_back_page(&buffer);
    let value = result?;
    released?;
    Ok(value)
}

fn load_node(buffer: &Buffer) -> StorageResult<Node> {
    Node::load(buffer.read().data())
}

/// Insert `pair` into the subtree rooted at `page_id`.
///
/// Fails with `NoFreeSpace` (possibly wrapped in `ChildInsert`) when the
/// target leaf is full; the caller splits and retries.
pub fn insert_into_page(
    pool: &mut BufferPoolManager,
    page_id: PageId,
    pair: &Pair,
) -> StorageResult<()> {
    with_page(pool, page_id, |pool, buffer| {
        let mut node = load_node(buffer)?;
        node.insert(pair, pool)?;
        if node.node_type() == NodeType::Leaf {
            node.store(buffer.write().data_mut())?;
        }
        Ok(())
    })
}

/// Split the node in `page_id` into a new left sibling page.
///
/// Returns the separator and the new page, ready for
/// [`Branch::insert_child`] or [`create_root`]. Leaves are relinked so the
/// new page sits between the old predecessor and `page_id`. Nodes too small
/// to split are left alone and yield `None`.
///
/// Every page involved is pinned before any of them is written, so a failed
/// fetch or allocation leaves the tree untouched.
pub fn split_page(
    pool: &mut BufferPoolManager,
    page_id: PageId,
) -> StorageResult<Option<(Key, PageId)>> {
    with_page(pool, page_id, |pool, buffer| {
        let mut node = load_node(buffer)?;
        let (key, mut left) = match node.split() {
            Ok(split) => split,
            Err(StorageError::SplitPrecondition { len }) => {
                debug!("Page {} holds {} entries, too few to split", page_id, len);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let old_prev = match &node {
            Node::Leaf(right) => right.prev(),
            Node::Branch(_) => None,
        };
        let left_id = match old_prev {
            Some(prev_id) => with_page(pool, prev_id, |pool, prev_buffer| {
                let mut prev = Leaf::from_bytes(prev_buffer.read().data())?;
                let left_id = store_split(pool, page_id, buffer, &mut node, &mut left)?;
                prev.set_next(Some(left_id));
                prev_buffer.write().data_mut().copy_from_slice(prev.as_bytes());
                Ok(left_id)
            })?,
            None => store_split(pool, page_id, buffer, &mut node, &mut left)?,
        };

        debug!(
            "Split page {} into {} and {} at {:?}",
            page_id, left_id, page_id, key
        );
        Ok(Some((key, left_id)))
    })
}

/// Allocate the left sibling, link the halves and write both out.
fn store_split(
    pool: &mut BufferPoolManager,
    right_id: PageId,
    right_buffer: &Buffer,
    right: &mut Node,
    left: &mut Node,
) -> StorageResult<PageId> {
    let left_buffer = pool.create_page()?;
    let left_id = left_buffer.page_id();

    if let (Node::Leaf(right), Node::Leaf(left)) = (&mut *right, &mut *left) {
        left.set_prev(right.prev());
        left.set_next(Some(right_id));
        right.set_prev(Some(left_id));
    }

    let stored = left.store(left_buffer.write().data_mut());
    pool.take_back_page(&left_buffer)?;
    stored?;
    right.store(right_buffer.write().data_mut())?;
    Ok(left_id)
}

/// Allocate a page holding an empty leaf.
pub fn create_leaf(pool: &mut BufferPoolManager) -> StorageResult<PageId> {
    let buffer = pool.create_page()?;
    let page_id = buffer.page_id();
    let stored = Node::Leaf(Leaf::new()).store(buffer.write().data_mut());
    pool.take_back_page(&buffer)?;
    stored?;
    Ok(page_id)
}

/// Allocate a page holding a branch with a single separator.
pub fn create_root(
    pool: &mut BufferPoolManager,
    key: Key,
    left: PageId,
    right: PageId,
) -> StorageResult<PageId> {
    let buffer = pool.create_page()?;
    let page_id = buffer.page_id();
    let stored = Node::Branch(Branch::new_root(key, left, right)).store(buffer.write().data_mut());
    pool.take_back_page(&buffer)?;
    stored?;
    debug!("Created root {} over {} and {}", page_id, left, right);
    Ok(page_id)
}

/// Descend from `root` to the leaf whose range covers `key`.
pub fn find_leaf(pool: &mut BufferPoolManager, root: PageId, key: &[u8]) -> StorageResult<PageId> {
    let mut page_id = root;
    loop {
        let next = with_page(pool, page_id, |_, buffer| match load_node(buffer)? {
            Node::Branch(branch) => Ok(Some(branch.child_for(key))),
            Node::Leaf(_) => Ok(None),
        })?;
        match next {
            Some(child) => page_id = child,
            None => return Ok(page_id),
        }
    }
}

/// Point lookup in the tree rooted at `root`.
pub fn get(pool: &mut BufferPoolManager, root: PageId, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
    let leaf_id = find_leaf(pool, root, key)?;
    with_page(pool, leaf_id, |_, buffer| {
        Leaf::from_bytes(buffer.read().data())?.get(key)
    })
}

/// Every pair reachable along the leaf chain starting at `first`, in key
/// order.
pub fn scan_leaves(pool: &mut BufferPoolManager, first: PageId) -> StorageResult<Vec<Pair>> {
    let mut pairs = Vec::new();
    let mut next = Some(first);
    while let Some(page_id) = next {
        next = with_page(pool, page_id, |_, buffer| {
            let leaf = Leaf::from_bytes(buffer.read().data())?;
            for pair in leaf.pairs() {
                pairs.push(pair?);
            }
            Ok(leaf.next())
        })?;
    }
    Ok(pairs)
}
