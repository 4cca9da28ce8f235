//! Dominators over index-based flow graphs.
//!
//! The Cooper–Harvey–Kennedy iterative algorithm; runs on anything that
//! exposes entry/successors/predecessors by index, so both the AST-level
//! CFG and IL functions share it.

use std::collections::BTreeSet;

/// An index-addressed flow graph.
pub trait FlowGraph {
    /// Number of nodes, reachable or not.
    fn len(&self) -> usize;
    /// Entry node index.
    fn entry(&self) -> usize;
    /// Successor indices of `node`.
    fn successors(&self, node: usize) -> Vec<usize>;
    /// Predecessor indices of `node`.
    fn predecessors(&self, node: usize) -> Vec<usize>;

    /// True when the graph has no nodes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immediate-dominator tree plus derived queries.
#[derive(Debug, Clone)]
pub struct Dominators {
    /// `idom[n]`: immediate dominator; `None` for the entry and for
    /// unreachable nodes.
    idom: Vec<Option<usize>>,
    /// Reverse post-order of reachable nodes.
    rpo: Vec<usize>,
    /// Position of each node in `rpo`; `usize::MAX` when unreachable.
    rpo_index: Vec<usize>,
    entry: usize,
}

impl Dominators {
    /// Compute dominators of `graph`.
    pub fn compute<G: FlowGraph>(graph: &G) -> Self {
        let len = graph.len();
        let entry = graph.entry();
        let rpo = reverse_postorder(graph);
        let mut rpo_index = vec![usize::MAX; len];
        for (i, &n) in rpo.iter().enumerate() {
            rpo_index[n] = i;
        }

        let mut idom: Vec<Option<usize>> = vec![None; len];
        idom[entry] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.iter().skip(1) {
                let preds: Vec<usize> = graph
                    .predecessors(node)
                    .into_iter()
                    .filter(|&p| idom[p].is_some())
                    .collect();
                let Some(&first) = preds.first() else {
                    continue;
                };
                let mut new_idom = first;
                for &pred in &preds[1..] {
                    new_idom = intersect(&idom, &rpo_index, pred, new_idom);
                }
                if idom[node] != Some(new_idom) {
                    idom[node] = Some(new_idom);
                    changed = true;
                }
            }
        }
        // The entry's self-loop is an algorithm artifact, not a tree edge.
        idom[entry] = None;

        Self {
            idom,
            rpo,
            rpo_index,
            entry,
        }
    }

    /// Immediate dominator of `node`; `None` for entry and unreachable
    /// nodes.
    pub fn idom(&self, node: usize) -> Option<usize> {
        self.idom.get(node).copied().flatten()
    }

    /// True when `node` was reached from the entry.
    pub fn is_reachable(&self, node: usize) -> bool {
        node == self.entry || self.idom(node).is_some()
    }

    /// Reverse post-order of reachable nodes.
    pub fn reverse_postorder(&self) -> &[usize] {
        &self.rpo
    }

    /// True when `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    /// Children lists of the dominator tree.
    pub fn children(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.idom.len()];
        for (node, idom) in self.idom.iter().enumerate() {
            if let Some(parent) = idom {
                children[*parent].push(node);
            }
        }
        children
    }

    /// Dominator-tree pre-order starting at the entry.
    pub fn preorder(&self) -> Vec<usize> {
        let children = self.children();
        let mut order = Vec::with_capacity(self.rpo.len());
        let mut stack = vec![self.entry];
        while let Some(node) = stack.pop() {
            order.push(node);
            // Reverse keeps child visitation in index order.
            for &child in children[node].iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Dominance frontier of every node.
    pub fn frontiers<G: FlowGraph>(&self, graph: &G) -> Vec<BTreeSet<usize>> {
        let mut frontiers = vec![BTreeSet::new(); graph.len()];
        for node in 0..graph.len() {
            if !self.is_reachable(node) {
                continue;
            }
            let preds: Vec<usize> = graph
                .predecessors(node)
                .into_iter()
                .filter(|&p| self.is_reachable(p))
                .collect();
            if preds.len() < 2 {
                continue;
            }
            let Some(idom) = self.idom(node) else {
                continue;
            };
            for pred in preds {
                let mut runner = pred;
                while runner != idom {
                    frontiers[runner].insert(node);
                    match self.idom(runner) {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }
        frontiers
    }
}

fn intersect(
    idom: &[Option<usize>],
    rpo_index: &[usize],
    mut a: usize,
    mut b: usize,
) -> usize {
    while a != b {
        while rpo_index[a] > rpo_index[b] {
            a = idom[a].expect("processed node has an idom");
        }
        while rpo_index[b] > rpo_index[a] {
            b = idom[b].expect("processed node has an idom");
        }
    }
    a
}

fn reverse_postorder<G: FlowGraph>(graph: &G) -> Vec<usize> {
    let mut visited = vec![false; graph.len()];
    let mut order = Vec::with_capacity(graph.len());
    postorder(graph, graph.entry(), &mut visited, &mut order);
    order.reverse();
    order
}

fn postorder<G: FlowGraph>(graph: &G, node: usize, visited: &mut [bool], order: &mut Vec<usize>) {
    if visited[node] {
        return;
    }
    visited[node] = true;
    for succ in graph.successors(node) {
        postorder(graph, succ, visited, order);
    }
    order.push(node);
}
