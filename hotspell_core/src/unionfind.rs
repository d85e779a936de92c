//! Flat disjoint-set forest.
//!
//! Used as per-call scratch by the labeller: one entry per provisional
//! component label, merged as connectivity is discovered. Path halving plus
//! union by rank keeps each operation effectively constant time.

/// Union-find over the elements `0..n`.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    /// A forest of `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            rank: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Representative of the set containing `x`, with path halving.
    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grand = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grand;
            x = grand;
        }
        x
    }

    /// Join the sets containing `a` and `b`.
    ///
    /// Returns `false` if they were already in the same set.
    pub fn union(&mut self, a: u32, b: u32) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => self.parent[ra as usize] = rb,
            std::cmp::Ordering::Greater => self.parent[rb as usize] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb as usize] = ra;
                self.rank[ra as usize] += 1;
            }
        }
        true
    }

    /// Whether `a` and `b` are currently in the same set.
    pub fn connected(&mut self, a: u32, b: u32) -> bool {
        self.find(a) == self.find(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn singletons_are_their_own_roots() {
        let mut forest = UnionFind::new(4);
        for x in 0..4 {
            assert_eq!(forest.find(x), x);
        }
    }

    #[test]
    fn union_merges_and_reports_novelty() {
        let mut forest = UnionFind::new(5);
        assert!(forest.union(0, 1));
        assert!(forest.union(1, 2));
        assert!(!forest.union(0, 2));
        assert!(forest.connected(0, 2));
        assert!(!forest.connected(0, 3));
    }

    #[test]
    fn chains_collapse_to_one_root() {
        let mut forest = UnionFind::new(100);
        for x in 0..99 {
            forest.union(x, x + 1);
        }
        let root = forest.find(0);
        for x in 0..100 {
            assert_eq!(forest.find(x), root);
        }
    }

    proptest! {
        #[test]
        fn union_is_idempotent_and_symmetric(pairs in proptest::collection::vec((0u32..32, 0u32..32), 0..64)) {
            let mut fwd = UnionFind::new(32);
            let mut rev = UnionFind::new(32);
            for &(a, b) in &pairs {
                fwd.union(a, b);
                rev.union(b, a);
                // repeating the union never changes connectivity
                prop_assert!(!fwd.union(a, b));
            }
            for x in 0..32 {
                for y in 0..32 {
                    prop_assert_eq!(fwd.connected(x, y), rev.connected(x, y));
                }
            }
        }
    }
}
