//! Tournament loser tree for replacement selection.
//!
//! The tree holds `k` workspace slots plus one permanently retired slot.
//! Every internal node remembers the loser of the subtournament below it and
//! the root slot remembers the overall winner, so replacing the winner only
//! replays the matches along one leaf-to-root path: O(log k) per step after
//! an O(k) build.

/// One workspace slot: a value tagged with the run it is destined for, or
/// the empty marker that retires the slot.
///
/// The comparison order is lexicographic `(run, value)` with `Empty` above
/// every value; the variant and field order make the derived impls produce
/// exactly that, so the winner of a match is simply the smaller slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Slot<T> {
    Value {
        /// Run the value is destined for.
        run: u32,
        value: T,
    },
    Empty,
}

impl<T> Slot<T> {
    /// Whether this slot has been retired.
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

/// Loser tree over `k` slots.
///
/// `tree` stores leaf indices: `tree[0]` is the overall winner, every other
/// entry the loser parked at that internal node. The parent of leaf `i` is
/// `(i + k) / 2` and the parent of internal node `j > 0` is `j / 2`.
pub struct LoserTree<T> {
    tree: Vec<usize>,
    /// `k` workspace slots plus the permanent empty slot at index `k`.
    leaves: Vec<Slot<T>>,
    k: usize,
}

impl<T: Copy + Ord> LoserTree<T> {
    /// Creates a tree with `k` slots, all retired.
    ///
    /// # Panics
    ///
    /// Panics if `k` is zero.
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "loser tree needs at least one slot");
        LoserTree {
            // every internal node starts out pointing at the empty slot
            tree: vec![k; k],
            leaves: vec![Slot::Empty; k + 1],
            k,
        }
    }

    /// Number of workspace slots.
    pub fn capacity(&self) -> usize {
        self.k
    }

    /// Loads up to `k` elements, tags them all with run 1, and plays the
    /// opening tournament. Previous contents are discarded.
    ///
    /// # Panics
    ///
    /// Panics if `data` holds more than `k` elements.
    pub fn initialize(&mut self, data: &[T]) {
        assert!(data.len() <= self.k, "initial data exceeds workspace");

        for slot in 0..self.k {
            self.leaves[slot] = match data.get(slot) {
                Some(&value) => Slot::Value { run: 1, value },
                None => Slot::Empty,
            };
        }

        let empty = self.k;
        for node in self.tree.iter_mut() {
            *node = empty;
        }

        // bubble each leaf towards the root: the first contestant to reach a
        // node parks there and waits, later arrivals play a match, the loser
        // stays parked and the winner moves on
        for leaf in (0..self.k).rev() {
            let mut current = leaf;
            let mut parent = (leaf + self.k) / 2;
            while parent > 0 {
                if self.tree[parent] == empty {
                    self.tree[parent] = current;
                    break;
                }
                let parked = self.tree[parent];
                if self.leaves[current] > self.leaves[parked] {
                    self.tree[parent] = current;
                    current = parked;
                }
                parent /= 2;
            }
            if parent == 0 {
                self.tree[0] = current;
            }
        }
    }

    /// The current overall winner.
    pub fn winner(&self) -> Slot<T> {
        self.leaves[self.tree[0]]
    }

    /// Overwrites the winner's slot with a freshly tagged value and replays.
    pub fn replace_winner(&mut self, value: T, run: u32) {
        let leaf = self.tree[0];
        debug_assert!(leaf < self.k, "tree not initialized");
        self.leaves[leaf] = Slot::Value { run, value };
        self.replay(leaf);
    }

    /// Retires the winner's slot; the empty marker sinks out of contention.
    pub fn retire_winner(&mut self) {
        let leaf = self.tree[0];
        debug_assert!(leaf < self.k, "tree not initialized");
        self.leaves[leaf] = Slot::Empty;
        self.replay(leaf);
    }

    fn replay(&mut self, leaf: usize) {
        let mut current = leaf;
        let mut parent = (leaf + self.k) / 2;
        while parent > 0 {
            let parked = self.tree[parent];
            if self.leaves[current] > self.leaves[parked] {
                self.tree[parent] = current;
                current = parked;
            }
            parent /= 2;
        }
        self.tree[0] = current;
    }
}
