use core::borrow::Borrow;
use core::fmt::{self, Write};

use smallvec::SmallVec;

use super::arena::Arena;
use super::handle::Handle;
use super::node::{InternalNode, LeafNode, MAX_KEYS, Node, SearchResult};

/// The core B+ tree backing `BPlusSet`.
///
/// All nodes live in one arena; `root` is never absent - an empty tree is a
/// single empty leaf, and `first_leaf` aliases it. Keys are stored only in
/// leaves, which are chained in global key order for iteration.
pub(crate) struct RawBPlusSet<K> {
    nodes: Arena<Node<K>>,
    root: Handle,
    /// Leftmost leaf, the start of the chain.
    first_leaf: Handle,
    len: usize,
}

/// One step of a root-to-leaf descent: the internal node visited and the
/// child slot taken. Splits and merges replay this path upward.
#[derive(Clone, Copy)]
struct PathElement {
    node: Handle,
    child_index: usize,
}

type Path = SmallVec<[PathElement; 16]>;

impl<K> RawBPlusSet<K> {
    pub(crate) fn new() -> Self {
        let mut nodes = Arena::new();
        let root = nodes.alloc(Node::Leaf(LeafNode::new()));
        Self {
            nodes,
            root,
            first_leaf: root,
            len: 0,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every node and reinstalls an empty leaf as the root.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.root = self.nodes.alloc(Node::Leaf(LeafNode::new()));
        self.first_leaf = self.root;
        self.len = 0;
        debug_assert_eq!(self.nodes.len(), 1);
    }

    pub(crate) fn first_leaf(&self) -> Handle {
        self.first_leaf
    }

    pub(crate) fn node(&self, handle: Handle) -> &Node<K> {
        self.nodes.get(handle)
    }

    /// Moves every key out in sorted order by walking the leaf chain,
    /// leaving the tree empty. O(n): no rebalancing happens on the way out.
    pub(crate) fn drain_to_vec(&mut self) -> alloc::vec::Vec<K> {
        let mut result = alloc::vec::Vec::with_capacity(self.len);
        let mut current = Some(self.first_leaf);

        while let Some(leaf_handle) = current {
            let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
            current = leaf.next();
            result.extend(leaf.take_keys());
        }

        self.clear();
        result
    }

    /// Writes the tree as nested `Internal[...]` / `Leaf[...]` lines,
    /// indented four spaces per level. Diagnostic only.
    pub(crate) fn dump(&self, out: &mut dyn Write) -> fmt::Result
    where
        K: fmt::Debug,
    {
        self.dump_node(self.root, 0, out)
    }

    fn dump_node(&self, handle: Handle, depth: usize, out: &mut dyn Write) -> fmt::Result
    where
        K: fmt::Debug,
    {
        for _ in 0..depth {
            out.write_str("    ")?;
        }
        match self.nodes.get(handle) {
            Node::Leaf(leaf) => {
                out.write_str("Leaf[")?;
                for (i, key) in leaf.keys().iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{key:?}")?;
                }
                out.write_str("]\n")
            }
            Node::Internal(internal) => {
                out.write_str("Internal[")?;
                for i in 0..internal.key_count() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{:?}", internal.separator(i))?;
                }
                out.write_str("]\n")?;
                for &child in internal.children() {
                    self.dump_node(child, depth + 1, out)?;
                }
                Ok(())
            }
        }
    }
}

impl<K: Clone + Ord> RawBPlusSet<K> {
    /// Locates a key, returning the leaf holding it and its slot.
    pub(crate) fn search<Q>(&self, key: &Q) -> Option<(Handle, usize)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let mut current = self.root;

        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => {
                    current = internal.child(internal.search_child(key));
                }
                Node::Leaf(leaf) => {
                    return match leaf.search(key) {
                        SearchResult::Found(index) => Some((current, index)),
                        SearchResult::NotFound(_) => None,
                    };
                }
            }
        }
    }

    pub(crate) fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.search(key).is_some()
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&K>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let (leaf_handle, index) = self.search(key)?;
        Some(self.nodes.get(leaf_handle).as_leaf().key(index))
    }

    /// The minimum key; O(1) through the leftmost-leaf handle.
    pub(crate) fn first(&self) -> Option<&K> {
        self.nodes.get(self.first_leaf).as_leaf().first_key()
    }

    /// The maximum key, found by descending the rightmost spine.
    pub(crate) fn last(&self) -> Option<&K> {
        let mut current = self.root;
        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => {
                    current = internal.child(internal.child_count() - 1);
                }
                Node::Leaf(leaf) => return leaf.last_key(),
            }
        }
    }

    /// Inserts a key; returns false (and leaves the tree untouched) if it
    /// was already present.
    pub(crate) fn insert(&mut self, key: K) -> bool {
        let (leaf_handle, path) = self.descend_to_leaf(&key);

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        match leaf.search(&key) {
            SearchResult::Found(_) => false,
            SearchResult::NotFound(index) => {
                leaf.insert(index, key);
                self.len += 1;

                if leaf.key_count() > MAX_KEYS {
                    self.split_leaf_and_propagate(leaf_handle, path);
                }
                true
            }
        }
    }

    /// Removes a key; returns false if it was not present.
    pub(crate) fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let (leaf_handle, path) = self.descend_to_leaf(key);

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let index = match leaf.search(key) {
            SearchResult::Found(index) => index,
            SearchResult::NotFound(_) => return false,
        };
        leaf.remove(index);
        self.len -= 1;

        // A root leaf may hold any number of keys, including none.
        if !path.is_empty() && self.nodes.get(leaf_handle).as_leaf().is_underfull() {
            self.rebalance_leaf(leaf_handle, path);
        }
        true
    }

    /// Walks from the root to the leaf responsible for `key`, recording the
    /// child slot taken at every internal node.
    fn descend_to_leaf<Q>(&self, key: &Q) -> (Handle, Path)
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let mut path: Path = SmallVec::new();
        let mut current = self.root;

        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => {
                    let child_index = internal.search_child(key);
                    path.push(PathElement {
                        node: current,
                        child_index,
                    });
                    current = internal.child(child_index);
                }
                Node::Leaf(_) => return (current, path),
            }
        }
    }

    /// Splits an overfull leaf, splices the new right sibling into the
    /// chain, and pushes the split upward.
    fn split_leaf_and_propagate(&mut self, leaf_handle: Handle, path: Path) {
        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let (separator, mut right) = leaf.split();

        let old_next = leaf.next();
        right.set_prev(Some(leaf_handle));
        right.set_next(old_next);

        let right_handle = self.nodes.alloc(Node::Leaf(right));
        self.nodes.get_mut(leaf_handle).as_leaf_mut().set_next(Some(right_handle));
        if let Some(next_handle) = old_next {
            self.nodes.get_mut(next_handle).as_leaf_mut().set_prev(Some(right_handle));
        }

        self.propagate_split(path, separator, right_handle);
    }

    /// Inserts `(separator, new_child)` into the parent recorded on the
    /// path, splitting ancestors while they overflow. An exhausted path
    /// means the root itself split and the tree grows a level.
    fn propagate_split(&mut self, mut path: Path, mut separator: K, mut new_child: Handle) {
        while let Some(element) = path.pop() {
            let parent = self.nodes.get_mut(element.node).as_internal_mut();
            parent.insert_child(element.child_index, separator, new_child);

            if parent.key_count() <= MAX_KEYS {
                return;
            }

            let (median, right) = parent.split();
            separator = median;
            new_child = self.nodes.alloc(Node::Internal(right));
        }

        let mut new_root = InternalNode::new();
        new_root.adopt_first_child(self.root);
        new_root.push(separator, new_child);
        self.root = self.nodes.alloc(Node::Internal(new_root));
    }

    /// Picks the rebalancing partner for the child at `child_index`: edge
    /// positions take the only sibling, interior positions the larger one,
    /// ties toward the right.
    fn use_right_sibling(&self, parent: &InternalNode<K>, child_index: usize) -> bool {
        if child_index == 0 {
            return true;
        }
        if child_index == parent.child_count() - 1 {
            return false;
        }
        let left_len = self.nodes.get(parent.child(child_index - 1)).key_count();
        let right_len = self.nodes.get(parent.child(child_index + 1)).key_count();
        right_len >= left_len
    }

    fn rebalance_leaf(&mut self, leaf_handle: Handle, path: Path) {
        let PathElement {
            node: parent_handle,
            child_index,
        } = *path.last().unwrap();
        let parent = self.nodes.get(parent_handle).as_internal();

        if self.use_right_sibling(parent, child_index) {
            let sibling_handle = parent.child(child_index + 1);
            if self.nodes.get(sibling_handle).as_leaf().can_lend() {
                self.borrow_from_right_leaf(leaf_handle, sibling_handle, parent_handle, child_index);
            } else {
                self.merge_leaves(leaf_handle, sibling_handle, path, child_index);
            }
        } else {
            let sibling_handle = parent.child(child_index - 1);
            if self.nodes.get(sibling_handle).as_leaf().can_lend() {
                self.borrow_from_left_leaf(leaf_handle, sibling_handle, parent_handle, child_index);
            } else {
                self.merge_leaves(sibling_handle, leaf_handle, path, child_index - 1);
            }
        }
    }

    /// Moves the right sibling's first key to the end of the underfull
    /// leaf; the separator becomes the sibling's new first key.
    fn borrow_from_right_leaf(
        &mut self,
        leaf_handle: Handle,
        right_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let right = self.nodes.get_mut(right_handle).as_leaf_mut();
        let moved = right.pop_front().unwrap();
        let new_separator = right.first_key().unwrap().clone();

        self.nodes.get_mut(leaf_handle).as_leaf_mut().push(moved);
        self.nodes.get_mut(parent_handle).as_internal_mut().set_separator(child_index, new_separator);
    }

    /// Moves the left sibling's last key to the front of the underfull
    /// leaf; that key is now the leaf's minimum and becomes the separator.
    fn borrow_from_left_leaf(
        &mut self,
        leaf_handle: Handle,
        left_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let left = self.nodes.get_mut(left_handle).as_leaf_mut();
        let moved = left.pop().unwrap();
        let new_separator = moved.clone();

        self.nodes.get_mut(leaf_handle).as_leaf_mut().push_front(moved);
        self.nodes.get_mut(parent_handle).as_internal_mut().set_separator(child_index - 1, new_separator);
    }

    /// Fuses two adjacent leaves into the left one, bridging the chain
    /// across the freed right leaf.
    fn merge_leaves(&mut self, left_handle: Handle, right_handle: Handle, path: Path, separator_index: usize) {
        let right = match self.nodes.take(right_handle) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf"),
        };

        let left = self.nodes.get_mut(left_handle).as_leaf_mut();
        left.merge_with_right(right);
        debug_assert!(left.key_count() <= MAX_KEYS);

        let adopted_next = left.next();
        if let Some(next_handle) = adopted_next {
            self.nodes.get_mut(next_handle).as_leaf_mut().set_prev(Some(left_handle));
        }

        self.remove_separator_and_propagate(path, separator_index);
    }

    /// Drops the separator left redundant by a fuse, then handles the
    /// parent: a root with no separators collapses onto its lone child,
    /// an underfull non-root parent rebalances in turn.
    fn remove_separator_and_propagate(&mut self, mut path: Path, separator_index: usize) {
        let element = path.pop().unwrap();
        let parent_handle = element.node;

        // The child right of the separator was consumed by the fuse.
        let parent = self.nodes.get_mut(parent_handle).as_internal_mut();
        let (_separator, _fused_away) = parent.remove_child(separator_index);

        if path.is_empty() {
            let parent = self.nodes.get(parent_handle).as_internal();
            if parent.key_count() == 0 {
                let lone_child = parent.child(0);
                self.nodes.free(parent_handle);
                self.root = lone_child;
            }
            return;
        }

        if self.nodes.get(parent_handle).as_internal().is_underfull() {
            self.rebalance_internal(parent_handle, path);
        }
    }

    fn rebalance_internal(&mut self, node_handle: Handle, path: Path) {
        let PathElement {
            node: parent_handle,
            child_index,
        } = *path.last().unwrap();
        let parent = self.nodes.get(parent_handle).as_internal();

        if self.use_right_sibling(parent, child_index) {
            let sibling_handle = parent.child(child_index + 1);
            if self.nodes.get(sibling_handle).as_internal().can_lend() {
                self.borrow_from_right_internal(node_handle, sibling_handle, parent_handle, child_index);
            } else {
                self.merge_internals(node_handle, sibling_handle, path, child_index);
            }
        } else {
            let sibling_handle = parent.child(child_index - 1);
            if self.nodes.get(sibling_handle).as_internal().can_lend() {
                self.borrow_from_left_internal(node_handle, sibling_handle, parent_handle, child_index);
            } else {
                self.merge_internals(sibling_handle, node_handle, path, child_index - 1);
            }
        }
    }

    /// Rotates one separator through the parent from the right sibling:
    /// the parent separator drops to the end of the underfull node, the
    /// sibling's first child moves across, and the sibling's first
    /// separator is promoted.
    fn borrow_from_right_internal(
        &mut self,
        node_handle: Handle,
        right_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let pulled_down = self.nodes.get(parent_handle).as_internal().separator(child_index).clone();

        let right = self.nodes.get_mut(right_handle).as_internal_mut();
        let (promoted, moved_child) = right.pop_front().unwrap();

        self.nodes.get_mut(node_handle).as_internal_mut().push(pulled_down, moved_child);
        self.nodes.get_mut(parent_handle).as_internal_mut().set_separator(child_index, promoted);
    }

    /// Mirror of [`Self::borrow_from_right_internal`] for the left sibling.
    fn borrow_from_left_internal(
        &mut self,
        node_handle: Handle,
        left_handle: Handle,
        parent_handle: Handle,
        child_index: usize,
    ) {
        let pulled_down = self.nodes.get(parent_handle).as_internal().separator(child_index - 1).clone();

        let left = self.nodes.get_mut(left_handle).as_internal_mut();
        let (promoted, moved_child) = left.pop().unwrap();

        self.nodes.get_mut(node_handle).as_internal_mut().push_front(pulled_down, moved_child);
        self.nodes.get_mut(parent_handle).as_internal_mut().set_separator(child_index - 1, promoted);
    }

    /// Fuses two adjacent internal nodes into the left one, pulling the
    /// separating parent key down between their separator runs.
    fn merge_internals(&mut self, left_handle: Handle, right_handle: Handle, path: Path, separator_index: usize) {
        let parent_handle = path.last().unwrap().node;
        let separator = self.nodes.get(parent_handle).as_internal().separator(separator_index).clone();

        let right = match self.nodes.take(right_handle) {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal"),
        };

        let left = self.nodes.get_mut(left_handle).as_internal_mut();
        left.merge_with_right(separator, right);
        debug_assert!(left.key_count() <= MAX_KEYS);

        self.remove_separator_and_propagate(path, separator_index);
    }
}
