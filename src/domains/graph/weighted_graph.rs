use std::collections::BTreeMap;

/// Graph weights. The octagon converts its arbitrary-precision numbers to
/// this at the boundary.
pub type Wt = i64;

/// Dense, reusable vertex identifiers
pub type VertId = usize;

/// A weight combiner for `update_edge`. When the edge is absent,
/// `default_is_absorbing` decides whether the update is dropped (true) or
/// the new weight is installed as-is (false).
pub trait WtOp {
    fn apply(&self, x: Wt, y: Wt) -> Wt;
    fn default_is_absorbing(&self) -> bool;
}

pub struct WtMin;

impl WtOp for WtMin {
    fn apply(&self, x: Wt, y: Wt) -> Wt {
        x.min(y)
    }
    fn default_is_absorbing(&self) -> bool {
        false
    }
}

pub struct WtMax;

impl WtOp for WtMax {
    fn apply(&self, x: Wt, y: Wt) -> Wt {
        x.max(y)
    }
    fn default_is_absorbing(&self) -> bool {
        true
    }
}

/// Read-only access shared by the graph and its views. The closure
/// machinery is generic over this.
pub trait GraphView {
    fn size(&self) -> usize;
    fn verts(&self) -> Vec<VertId>;
    fn lookup(&self, u: VertId, v: VertId) -> Option<Wt>;
    fn succs(&self, v: VertId) -> Vec<VertId>;
    fn preds(&self, v: VertId) -> Vec<VertId>;
    fn e_succs(&self, v: VertId) -> Vec<(VertId, Wt)>;
    fn e_preds(&self, v: VertId) -> Vec<(VertId, Wt)>;

    fn elem(&self, u: VertId, v: VertId) -> bool {
        self.lookup(u, v).is_some()
    }

    fn edge_val(&self, u: VertId, v: VertId) -> Wt {
        self.lookup(u, v).expect("edge_val on a missing edge")
    }
}

/// Vertex-indexed mutable graph with edge weights. Every edge lives in both
/// the successor table of its source and the predecessor table of its
/// destination, with the same weight. Freed vertex ids go to a free list
/// and may be handed out again.
#[derive(Clone, Default)]
pub struct WeightedGraph {
    succs: Vec<Option<BTreeMap<VertId, Wt>>>,
    preds: Vec<Option<BTreeMap<VertId, Wt>>>,
    free: Vec<VertId>,
    edge_count: usize,
}

impl WeightedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_vertex(&mut self) -> VertId {
        if let Some(v) = self.free.pop() {
            self.succs[v] = Some(BTreeMap::new());
            self.preds[v] = Some(BTreeMap::new());
            v
        } else {
            self.succs.push(Some(BTreeMap::new()));
            self.preds.push(Some(BTreeMap::new()));
            self.succs.len() - 1
        }
    }

    /// Ensure vertices `0..n` exist
    pub fn grow_to(&mut self, n: usize) {
        while self.succs.len() < n {
            self.succs.push(Some(BTreeMap::new()));
            self.preds.push(Some(BTreeMap::new()));
        }
        for v in 0..n {
            if self.succs[v].is_none() {
                self.succs[v] = Some(BTreeMap::new());
                self.preds[v] = Some(BTreeMap::new());
            }
        }
        self.free.retain(|&v| v >= n);
    }

    pub fn is_vertex(&self, v: VertId) -> bool {
        v < self.succs.len() && self.succs[v].is_some()
    }

    /// Remove all incident edges and free the vertex id
    pub fn forget(&mut self, v: VertId) {
        if !self.is_vertex(v) {
            return;
        }
        let out: Vec<VertId> = self.succs[v].as_ref().unwrap().keys().copied().collect();
        for d in out {
            self.preds[d].as_mut().unwrap().remove(&v);
            self.edge_count -= 1;
        }
        let inc: Vec<VertId> = self.preds[v].as_ref().unwrap().keys().copied().collect();
        for s in inc {
            self.succs[s].as_mut().unwrap().remove(&v);
            self.edge_count -= 1;
        }
        self.succs[v] = None;
        self.preds[v] = None;
        self.free.push(v);
    }

    /// Insert an edge assumed to be absent
    pub fn add_edge(&mut self, u: VertId, w: Wt, v: VertId) {
        debug_assert!(!self.elem(u, v));
        self.succs[u].as_mut().unwrap().insert(v, w);
        self.preds[v].as_mut().unwrap().insert(u, w);
        self.edge_count += 1;
    }

    /// Insert or overwrite
    pub fn set_edge(&mut self, u: VertId, w: Wt, v: VertId) {
        if self.succs[u].as_mut().unwrap().insert(v, w).is_none() {
            self.edge_count += 1;
        }
        self.preds[v].as_mut().unwrap().insert(u, w);
    }

    /// Combine with the existing weight through `op`; a missing edge is
    /// created or ignored according to `op.default_is_absorbing()`
    pub fn update_edge<O: WtOp>(&mut self, u: VertId, w: Wt, v: VertId, op: &O) {
        match self.lookup(u, v) {
            Some(old) => self.set_edge(u, op.apply(old, w), v),
            None => {
                if !op.default_is_absorbing() {
                    self.set_edge(u, w, v);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.succs.clear();
        self.preds.clear();
        self.free.clear();
        self.edge_count = 0;
    }

    pub fn num_edges(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count == 0
    }

    #[cfg(test)]
    pub fn check_adjs(&self) -> bool {
        for u in self.verts() {
            for (v, w) in self.e_succs(u) {
                match self.preds[v].as_ref().and_then(|m| m.get(&u)) {
                    Some(wp) if *wp == w => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

impl GraphView for WeightedGraph {
    fn size(&self) -> usize {
        self.succs.len()
    }

    fn verts(&self) -> Vec<VertId> {
        (0..self.succs.len())
            .filter(|&v| self.succs[v].is_some())
            .collect()
    }

    fn lookup(&self, u: VertId, v: VertId) -> Option<Wt> {
        self.succs
            .get(u)
            .and_then(|s| s.as_ref())
            .and_then(|m| m.get(&v))
            .copied()
    }

    fn succs(&self, v: VertId) -> Vec<VertId> {
        match self.succs.get(v).and_then(|s| s.as_ref()) {
            Some(m) => m.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    fn preds(&self, v: VertId) -> Vec<VertId> {
        match self.preds.get(v).and_then(|s| s.as_ref()) {
            Some(m) => m.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    fn e_succs(&self, v: VertId) -> Vec<(VertId, Wt)> {
        match self.succs.get(v).and_then(|s| s.as_ref()) {
            Some(m) => m.iter().map(|(&d, &w)| (d, w)).collect(),
            None => Vec::new(),
        }
    }

    fn e_preds(&self, v: VertId) -> Vec<(VertId, Wt)> {
        match self.preds.get(v).and_then(|s| s.as_ref()) {
            Some(m) => m.iter().map(|(&d, &w)| (d, w)).collect(),
            None => Vec::new(),
        }
    }
}

/// Permuted view: vertex `i` of the view is vertex `perm[i]` of the
/// underlying graph; `None` entries are absent vertices without edges.
pub struct GraphPerm<'a, G: GraphView> {
    perm: Vec<Option<VertId>>,
    inv: Vec<Option<VertId>>,
    g: &'a G,
}

impl<'a, G: GraphView> GraphPerm<'a, G> {
    pub fn new(perm: Vec<Option<VertId>>, g: &'a G) -> Self {
        let mut inv = vec![None; g.size()];
        for (i, p) in perm.iter().enumerate() {
            if let Some(pv) = p {
                if *pv < inv.len() {
                    inv[*pv] = Some(i);
                }
            }
        }
        GraphPerm { perm, inv, g }
    }

    fn fwd(&self, v: VertId) -> Option<VertId> {
        self.perm.get(v).copied().flatten()
    }
}

impl<'a, G: GraphView> GraphView for GraphPerm<'a, G> {
    fn size(&self) -> usize {
        self.perm.len()
    }

    fn verts(&self) -> Vec<VertId> {
        (0..self.perm.len())
            .filter(|&v| self.perm[v].is_some())
            .collect()
    }

    fn lookup(&self, u: VertId, v: VertId) -> Option<Wt> {
        match (self.fwd(u), self.fwd(v)) {
            (Some(gu), Some(gv)) => self.g.lookup(gu, gv),
            _ => None,
        }
    }

    fn succs(&self, v: VertId) -> Vec<VertId> {
        self.e_succs(v).into_iter().map(|(d, _)| d).collect()
    }

    fn preds(&self, v: VertId) -> Vec<VertId> {
        self.e_preds(v).into_iter().map(|(d, _)| d).collect()
    }

    fn e_succs(&self, v: VertId) -> Vec<(VertId, Wt)> {
        match self.fwd(v) {
            Some(gv) => self
                .g
                .e_succs(gv)
                .into_iter()
                .filter_map(|(d, w)| self.inv.get(d).copied().flatten().map(|vd| (vd, w)))
                .collect(),
            None => Vec::new(),
        }
    }

    fn e_preds(&self, v: VertId) -> Vec<(VertId, Wt)> {
        match self.fwd(v) {
            Some(gv) => self
                .g
                .e_preds(gv)
                .into_iter()
                .filter_map(|(d, w)| self.inv.get(d).copied().flatten().map(|vd| (vd, w)))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// View that hides the diagonal edges between the two vertices of one
/// variable (`u/2 == v/2`), leaving only relational edges visible.
pub struct SplitGraph<'a, G: GraphView> {
    g: &'a G,
}

impl<'a, G: GraphView> SplitGraph<'a, G> {
    pub fn new(g: &'a G) -> Self {
        SplitGraph { g }
    }
}

fn same_var(u: VertId, v: VertId) -> bool {
    u / 2 == v / 2
}

impl<'a, G: GraphView> GraphView for SplitGraph<'a, G> {
    fn size(&self) -> usize {
        self.g.size()
    }

    fn verts(&self) -> Vec<VertId> {
        self.g.verts()
    }

    fn lookup(&self, u: VertId, v: VertId) -> Option<Wt> {
        if same_var(u, v) {
            None
        } else {
            self.g.lookup(u, v)
        }
    }

    fn succs(&self, v: VertId) -> Vec<VertId> {
        self.g
            .succs(v)
            .into_iter()
            .filter(|&d| !same_var(v, d))
            .collect()
    }

    fn preds(&self, v: VertId) -> Vec<VertId> {
        self.g
            .preds(v)
            .into_iter()
            .filter(|&d| !same_var(v, d))
            .collect()
    }

    fn e_succs(&self, v: VertId) -> Vec<(VertId, Wt)> {
        self.g
            .e_succs(v)
            .into_iter()
            .filter(|&(d, _)| !same_var(v, d))
            .collect()
    }

    fn e_preds(&self, v: VertId) -> Vec<(VertId, Wt)> {
        self.g
            .e_preds(v)
            .into_iter()
            .filter(|&(d, _)| !same_var(v, d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_and_mirror_invariant() {
        let mut g = WeightedGraph::new();
        let a = g.new_vertex();
        let b = g.new_vertex();
        let c = g.new_vertex();
        g.add_edge(a, 3, b);
        g.add_edge(b, -1, c);
        g.set_edge(a, 2, b);
        assert_eq!(g.lookup(a, b), Some(2));
        assert_eq!(g.e_preds(b), vec![(a, 2)]);
        assert!(g.check_adjs());

        g.update_edge(a, 5, b, &WtMin);
        assert_eq!(g.lookup(a, b), Some(2));
        g.update_edge(a, 1, b, &WtMin);
        assert_eq!(g.lookup(a, b), Some(1));
        // min creates missing edges, max does not
        g.update_edge(c, 7, a, &WtMax);
        assert!(!g.elem(c, a));
        g.update_edge(c, 7, a, &WtMin);
        assert_eq!(g.lookup(c, a), Some(7));
        assert!(g.check_adjs());
    }

    #[test]
    fn test_forget_and_reuse() {
        let mut g = WeightedGraph::new();
        let a = g.new_vertex();
        let b = g.new_vertex();
        g.add_edge(a, 1, b);
        g.add_edge(b, 2, a);
        g.forget(b);
        assert!(g.is_empty());
        assert!(!g.is_vertex(b));
        assert!(g.succs(a).is_empty());
        let b2 = g.new_vertex();
        assert_eq!(b2, b);
        assert!(g.succs(b2).is_empty());
    }

    #[test]
    fn test_perm_view() {
        let mut g = WeightedGraph::new();
        let a = g.new_vertex();
        let b = g.new_vertex();
        let _c = g.new_vertex();
        g.add_edge(a, 4, b);
        // view: 0 -> b, 1 -> a, 2 absent
        let p = GraphPerm::new(vec![Some(b), Some(a), None], &g);
        assert_eq!(p.lookup(1, 0), Some(4));
        assert_eq!(p.lookup(0, 1), None);
        assert_eq!(p.e_succs(1), vec![(0, 4)]);
        assert_eq!(p.e_preds(0), vec![(1, 4)]);
        assert!(p.e_succs(2).is_empty());
        assert_eq!(p.verts(), vec![0, 1]);
    }

    #[test]
    fn test_split_view() {
        let mut g = WeightedGraph::new();
        let v0 = g.new_vertex(); // x+
        let v1 = g.new_vertex(); // x-
        let v2 = g.new_vertex(); // y+
        g.add_edge(v0, 10, v1); // diagonal
        g.add_edge(v0, 3, v2); // relational
        let s = SplitGraph::new(&g);
        assert_eq!(s.lookup(v0, v1), None);
        assert_eq!(s.lookup(v0, v2), Some(3));
        assert_eq!(s.succs(v0), vec![v2]);
        assert_eq!(g.succs(v0), vec![v1, v2]);
    }
}
