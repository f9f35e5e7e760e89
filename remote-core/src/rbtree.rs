//! Red-black tree backed connection table, keyed by file descriptor.
//!
//! The case analysis in `insert_fixup`/`delete_fixup`/the rotations mirrors
//! the classic CLRS red-black tree algorithm case-for-case. Rather than a
//! pointer graph with a shared sentinel node (as a C implementation would
//! use), nodes live in a single `Vec` arena and are addressed by index;
//! index `0` is the permanent sentinel, colored black and never exposed to
//! callers, which gives the same "no null-child special case" property the
//! pointer-sentinel gives without any unsafe code.

const NIL: usize = 0;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node<V> {
    key: i32,
    value: Option<V>,
    color: Color,
    parent: usize,
    left: usize,
    right: usize,
}

impl<V> Node<V> {
    fn sentinel() -> Node<V> {
        Node {
            key: i32::MIN,
            value: None,
            color: Color::Black,
            parent: NIL,
            left: NIL,
            right: NIL,
        }
    }
}

/// Ordered map from fd to connection record, implemented as a red-black
/// tree so insert/lookup/delete are logarithmic and in-order iteration
/// (used during bulk teardown) is stable.
pub struct ConnTable<V> {
    nodes: Vec<Node<V>>,
    free: Vec<usize>,
    root: usize,
}

impl<V> ConnTable<V> {
    pub fn new() -> ConnTable<V> {
        ConnTable {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
            root: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - 1 - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `value` under `key`. Callers guarantee `key` is not already
    /// present — fds are unique while open, so duplicate insert is a caller
    /// bug and is not handled gracefully here (matches the reference
    /// implementation's "duplicate insert is undefined" contract).
    pub fn insert(&mut self, key: i32, value: V) {
        debug_assert!(self.lookup(key).is_none(), "duplicate fd inserted into connection table");

        let idx = self.alloc(Node {
            key,
            value: Some(value),
            color: Color::Red,
            parent: NIL,
            left: NIL,
            right: NIL,
        });

        if self.root == NIL {
            self.nodes[idx].color = Color::Black;
            self.nodes[idx].left = NIL;
            self.nodes[idx].right = NIL;
            self.root = idx;
            return;
        }

        self.bst_insert(idx);
        self.insert_fixup(idx);
    }

    pub fn lookup(&self, key: i32) -> Option<&V> {
        self.find_index(key).and_then(|idx| self.nodes[idx].value.as_ref())
    }

    pub fn lookup_mut(&mut self, key: i32) -> Option<&mut V> {
        match self.find_index(key) {
            Some(idx) => self.nodes[idx].value.as_mut(),
            None => None,
        }
    }

    pub fn contains(&self, key: i32) -> bool {
        self.find_index(key).is_some()
    }

    /// Removes and returns the value stored under `key`, if present.
    pub fn delete(&mut self, key: i32) -> Option<V> {
        let idx = self.find_index(key)?;
        let value = self.nodes[idx].value.take();
        self.remove_node(idx);
        self.free.push(idx);
        value
    }

    /// Visits every (key, value) pair in ascending key order. Structural
    /// mutation of the table during the walk is not supported.
    pub fn inorder_walk<F: FnMut(i32, &V)>(&self, mut visitor: F) {
        self.inorder_from(self.root, &mut visitor);
    }

    fn inorder_from<F: FnMut(i32, &V)>(&self, idx: usize, visitor: &mut F) {
        if idx == NIL {
            return;
        }
        self.inorder_from(self.nodes[idx].left, visitor);
        if let Some(value) = &self.nodes[idx].value {
            visitor(self.nodes[idx].key, value);
        }
        self.inorder_from(self.nodes[idx].right, visitor);
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn find_index(&self, key: i32) -> Option<usize> {
        let mut idx = self.root;
        while idx != NIL && self.nodes[idx].key != key {
            idx = if key < self.nodes[idx].key {
                self.nodes[idx].left
            } else {
                self.nodes[idx].right
            };
        }
        if idx == NIL {
            None
        } else {
            Some(idx)
        }
    }

    fn bst_insert(&mut self, node: usize) {
        let mut parent = self.root;
        loop {
            let next = if self.nodes[node].key < self.nodes[parent].key {
                self.nodes[parent].left
            } else {
                self.nodes[parent].right
            };

            if next == NIL {
                break;
            }
            parent = next;
        }

        if self.nodes[node].key < self.nodes[parent].key {
            self.nodes[parent].left = node;
        } else {
            self.nodes[parent].right = node;
        }

        self.nodes[node].parent = parent;
        self.nodes[node].left = NIL;
        self.nodes[node].right = NIL;
        self.nodes[node].color = Color::Red;
    }

    fn left_rotate(&mut self, x: usize) {
        let y = self.nodes[x].right;
        self.nodes[x].right = self.nodes[y].left;

        if self.nodes[y].left != NIL {
            self.nodes[self.nodes[y].left].parent = x;
        }

        self.nodes[y].parent = self.nodes[x].parent;

        if x == self.root {
            self.root = y;
        } else if x == self.nodes[self.nodes[x].parent].left {
            self.nodes[self.nodes[x].parent].left = y;
        } else {
            self.nodes[self.nodes[x].parent].right = y;
        }

        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn right_rotate(&mut self, x: usize) {
        let y = self.nodes[x].left;
        self.nodes[x].left = self.nodes[y].right;

        if self.nodes[y].right != NIL {
            self.nodes[self.nodes[y].right].parent = x;
        }

        self.nodes[y].parent = self.nodes[x].parent;

        if x == self.root {
            self.root = y;
        } else if x == self.nodes[self.nodes[x].parent].right {
            self.nodes[self.nodes[x].parent].right = y;
        } else {
            self.nodes[self.nodes[x].parent].left = y;
        }

        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    fn is_red(&self, idx: usize) -> bool {
        idx != NIL && self.nodes[idx].color == Color::Red
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while z != self.root && self.is_red(self.nodes[z].parent) {
            let parent = self.nodes[z].parent;
            let grandparent = self.nodes[parent].parent;

            if parent == self.nodes[grandparent].left {
                let uncle = self.nodes[grandparent].right;

                if self.is_red(uncle) {
                    self.nodes[parent].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    z = grandparent;
                } else {
                    if z == self.nodes[parent].right {
                        z = parent;
                        self.left_rotate(z);
                    }
                    let parent = self.nodes[z].parent;
                    let grandparent = self.nodes[parent].parent;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    self.right_rotate(grandparent);
                }
            } else {
                let uncle = self.nodes[grandparent].left;

                if self.is_red(uncle) {
                    self.nodes[parent].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    z = grandparent;
                } else {
                    if z == self.nodes[parent].left {
                        z = parent;
                        self.right_rotate(z);
                    }
                    let parent = self.nodes[z].parent;
                    let grandparent = self.nodes[parent].parent;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[grandparent].color = Color::Red;
                    self.left_rotate(grandparent);
                }
            }
        }

        self.nodes[self.root].color = Color::Black;
    }

    fn minimum(&self, mut idx: usize) -> usize {
        while self.nodes[idx].left != NIL {
            idx = self.nodes[idx].left;
        }
        idx
    }

    /// Replaces the subtree rooted at `u` with the subtree rooted at `v`,
    /// rewiring `u`'s parent to point at `v` (the standard CLRS transplant).
    /// `v` may be the sentinel; writing `v`'s parent in that case is the
    /// usual sentinel trick that lets `delete_fixup` read `x`'s parent even
    /// when `x` is the sentinel.
    fn transplant(&mut self, u: usize, v: usize) {
        let pu = self.nodes[u].parent;
        if u == self.root {
            self.root = v;
        } else if u == self.nodes[pu].left {
            self.nodes[pu].left = v;
        } else {
            self.nodes[pu].right = v;
        }
        self.nodes[v].parent = pu;
    }

    /// Removes `node` from the tree, substituting the in-order successor
    /// when it has two real children, and restores red-black balance if a
    /// black node was spliced out. Mirrors the reference implementation's
    /// pointer-splicing delete case-for-case; `node`'s own arena slot is
    /// always what ends up freed by the caller, since the successor (when
    /// one is used) keeps its own index and is relinked into `node`'s old
    /// structural position rather than having its contents copied over.
    fn remove_node(&mut self, node: usize) {
        let mut y = node;
        let mut y_original_color = self.nodes[y].color;
        let x;

        if self.nodes[node].left == NIL {
            x = self.nodes[node].right;
            self.transplant(node, self.nodes[node].right);
        } else if self.nodes[node].right == NIL {
            x = self.nodes[node].left;
            self.transplant(node, self.nodes[node].left);
        } else {
            y = self.minimum(self.nodes[node].right);
            y_original_color = self.nodes[y].color;
            x = self.nodes[y].right;

            if self.nodes[y].parent == node {
                self.nodes[x].parent = y;
            } else {
                self.transplant(y, self.nodes[y].right);
                self.nodes[y].right = self.nodes[node].right;
                let right = self.nodes[y].right;
                self.nodes[right].parent = y;
            }

            self.transplant(node, y);
            self.nodes[y].left = self.nodes[node].left;
            let left = self.nodes[y].left;
            self.nodes[left].parent = y;
            self.nodes[y].color = self.nodes[node].color;
        }

        if y_original_color == Color::Black {
            self.delete_fixup(x);
        }
    }

    fn delete_fixup(&mut self, mut x: usize) {
        while x != self.root && !self.is_red_strict(x) {
            let parent = self.nodes[x].parent;

            if x == self.nodes[parent].left {
                let mut w = self.nodes[parent].right;

                if self.is_red(w) {
                    self.nodes[w].color = Color::Black;
                    self.nodes[parent].color = Color::Red;
                    self.left_rotate(parent);
                    w = self.nodes[parent].right;
                }

                if !self.is_red(self.nodes[w].left) && !self.is_red(self.nodes[w].right) {
                    self.nodes[w].color = Color::Red;
                    x = parent;
                } else {
                    if !self.is_red(self.nodes[w].right) {
                        self.nodes[self.nodes[w].left].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.right_rotate(w);
                        w = self.nodes[parent].right;
                    }

                    self.nodes[w].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[self.nodes[w].right].color = Color::Black;
                    self.left_rotate(parent);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[parent].left;

                if self.is_red(w) {
                    self.nodes[w].color = Color::Black;
                    self.nodes[parent].color = Color::Red;
                    self.right_rotate(parent);
                    w = self.nodes[parent].left;
                }

                if !self.is_red(self.nodes[w].right) && !self.is_red(self.nodes[w].left) {
                    self.nodes[w].color = Color::Red;
                    x = parent;
                } else {
                    if !self.is_red(self.nodes[w].left) {
                        self.nodes[self.nodes[w].right].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.left_rotate(w);
                        w = self.nodes[parent].left;
                    }

                    self.nodes[w].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[self.nodes[w].left].color = Color::Black;
                    self.right_rotate(parent);
                    x = self.root;
                }
            }
        }

        self.nodes[x].color = Color::Black;
    }

    /// `x` may be `NIL` while walking the fix-up (the spliced-out child can
    /// be the sentinel); `NIL` is always black, never red.
    fn is_red_strict(&self, idx: usize) -> bool {
        idx != NIL && self.nodes[idx].color == Color::Red
    }

    /// Verifies the two red-black invariants (no red node has a red child,
    /// every root-to-leaf path has equal black height). Intended for tests
    /// and debug assertions, not the hot path.
    #[cfg(test)]
    fn check_invariants(&self) -> bool {
        if self.root != NIL && self.nodes[self.root].color != Color::Black {
            return false;
        }
        self.check_no_red_red(self.root) && self.check_black_height(self.root).is_some()
    }

    #[cfg(test)]
    fn check_no_red_red(&self, idx: usize) -> bool {
        if idx == NIL {
            return true;
        }
        if self.nodes[idx].color == Color::Red {
            if self.is_red(self.nodes[idx].left) || self.is_red(self.nodes[idx].right) {
                return false;
            }
        }
        self.check_no_red_red(self.nodes[idx].left) && self.check_no_red_red(self.nodes[idx].right)
    }

    #[cfg(test)]
    fn check_black_height(&self, idx: usize) -> Option<usize> {
        if idx == NIL {
            return Some(1);
        }
        let left = self.check_black_height(self.nodes[idx].left)?;
        let right = self.check_black_height(self.nodes[idx].right)?;
        if left != right {
            return None;
        }
        Some(if self.nodes[idx].color == Color::Black { left + 1 } else { left })
    }
}

impl<V> Default for ConnTable<V> {
    fn default() -> Self {
        ConnTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    #[test]
    fn insert_lookup_delete_roundtrip() {
        let mut table = ConnTable::new();
        table.insert(3, "three");
        table.insert(1, "one");
        table.insert(2, "two");

        assert_eq!(table.lookup(1), Some(&"one"));
        assert_eq!(table.lookup(2), Some(&"two"));
        assert_eq!(table.lookup(3), Some(&"three"));
        assert_eq!(table.lookup(4), None);

        assert_eq!(table.delete(2), Some("two"));
        assert_eq!(table.lookup(2), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn inorder_walk_is_ascending() {
        let mut table = ConnTable::new();
        for key in [5, 3, 8, 1, 4, 7, 9, 2, 6] {
            table.insert(key, key);
        }

        let mut seen = Vec::new();
        table.inorder_walk(|key, _| seen.push(key));

        let mut expected = seen.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn stress_random_insert_delete_preserves_invariants() {
        let mut table = ConnTable::new();
        let mut rng = thread_rng();

        let mut keys: Vec<i32> = (0..1000).collect();
        keys.shuffle(&mut rng);

        for &key in &keys {
            table.insert(key, key);
            assert!(table.check_invariants());
        }

        let mut order = Vec::new();
        table.inorder_walk(|key, _| order.push(key));
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);

        for &key in &keys {
            assert_eq!(table.lookup(key), Some(&key));
        }

        let mut delete_order = keys.clone();
        delete_order.shuffle(&mut rng);

        for (i, &key) in delete_order.iter().enumerate() {
            assert_eq!(table.delete(key), Some(key));
            assert!(table.check_invariants());

            for &remaining in &delete_order[i + 1..] {
                assert_eq!(table.lookup(remaining), Some(&remaining));
            }
        }

        assert!(table.is_empty());
    }
}
