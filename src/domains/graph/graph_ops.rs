use crate::domains::graph::weighted_graph::{
    GraphView, VertId, WeightedGraph, Wt, WtMin,
};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

/// A batch of edge updates `((src, dest), weight)`
pub type EdgeVector = Vec<((VertId, VertId), Wt)>;

/// Vertex-wise union of the operands, minimum weight on common edges. The
/// second component reports whether the result is certainly still closed:
/// it is unless an edge of one operand was absent or weaker in the other.
pub fn meet<G1: GraphView, G2: GraphView>(l: &G1, r: &G2) -> (WeightedGraph, bool) {
    let sz = l.size().max(r.size());
    let mut g = WeightedGraph::new();
    g.grow_to(sz);
    let mut is_closed = true;
    for s in l.verts() {
        for (d, w) in l.e_succs(s) {
            match r.lookup(s, d) {
                Some(rw) if rw <= w => {}
                _ => is_closed = false,
            }
            g.set_edge(s, w, d);
        }
    }
    for s in r.verts() {
        for (d, w) in r.e_succs(s) {
            match g.lookup(s, d) {
                Some(cur) => {
                    if w < cur {
                        g.set_edge(s, w, d);
                        is_closed = false;
                    }
                }
                None => {
                    g.set_edge(s, w, d);
                    is_closed = false;
                }
            }
        }
    }
    (g, is_closed)
}

/// Pointwise maximum of the edges common to both operands; one-sided edges
/// are dropped.
pub fn join<G1: GraphView, G2: GraphView>(l: &G1, r: &G2) -> WeightedGraph {
    let sz = l.size().max(r.size());
    let mut g = WeightedGraph::new();
    g.grow_to(sz);
    for s in l.verts() {
        for (d, w) in l.e_succs(s) {
            if let Some(rw) = r.lookup(s, d) {
                g.set_edge(s, w.max(rw), d);
            }
        }
    }
    g
}

/// Keep an edge of `l` only when `r` still entails it (its weight did not
/// grow); otherwise extrapolate to infinity by dropping it. Sources of
/// dropped edges are reported in `unstable`.
pub fn widen<G1: GraphView, G2: GraphView>(
    l: &G1,
    r: &G2,
    unstable: &mut Vec<VertId>,
) -> WeightedGraph {
    widen_impl(l, r, None, unstable)
}

/// Widening against a sorted threshold ladder: a growing edge jumps to the
/// least threshold that still admits the right operand's weight instead of
/// disappearing. `scale(s, d)` is the factor the caller uses for edges that
/// encode scaled constraints (diagonal bound edges store twice the bound).
pub fn widen_thresholds<G1: GraphView, G2: GraphView>(
    l: &G1,
    r: &G2,
    thresholds: &[Wt],
    unstable: &mut Vec<VertId>,
) -> WeightedGraph {
    widen_impl(l, r, Some(thresholds), unstable)
}

fn widen_impl<G1: GraphView, G2: GraphView>(
    l: &G1,
    r: &G2,
    thresholds: Option<&[Wt]>,
    unstable: &mut Vec<VertId>,
) -> WeightedGraph {
    let sz = l.size().max(r.size());
    let mut g = WeightedGraph::new();
    g.grow_to(sz);
    for s in l.verts() {
        let mut dropped = false;
        for (d, w) in l.e_succs(s) {
            match r.lookup(s, d) {
                Some(rw) if rw <= w => {
                    g.set_edge(s, w, d);
                }
                Some(rw) => {
                    // The bound grew; extrapolate
                    let scale = if s / 2 == d / 2 { 2 } else { 1 };
                    let jump = thresholds
                        .and_then(|ts| ts.iter().find(|&&t| t.saturating_mul(scale) >= rw))
                        .map(|&t| t * scale);
                    match jump {
                        Some(t) => g.set_edge(s, t, d),
                        None => {}
                    }
                    dropped = true;
                }
                None => dropped = true,
            }
        }
        if dropped {
            unstable.push(s);
        }
    }
    g
}

/// Apply a batch of edge updates, min-combining with existing edges
pub fn apply_delta(g: &mut WeightedGraph, delta: &EdgeVector) {
    let min_op = WtMin;
    for &((s, d), w) in delta {
        if s != d {
            g.update_edge(s, w, d, &min_op);
        }
    }
}

/// Single-source shortest paths with Johnson-reduced weights
/// `w' = pot[u] + w - pot[v]`. The potential invariant makes every reduced
/// weight non-negative, so Dijkstra applies; returned distances are true
/// (un-reduced) distances.
pub fn dijkstra<G: GraphView>(g: &G, pot: &[Wt], src: VertId) -> Vec<Option<Wt>> {
    let n = g.size();
    let mut dist: Vec<Option<Wt>> = vec![None; n];
    let mut heap: BinaryHeap<Reverse<(Wt, VertId)>> = BinaryHeap::new();
    dist[src] = Some(0);
    heap.push(Reverse((0, src)));
    while let Some(Reverse((rd, u))) = heap.pop() {
        if dist[u] != Some(rd) {
            continue;
        }
        for (v, w) in g.e_succs(u) {
            let rw = pot[u] + w - pot[v];
            debug_assert!(rw >= 0, "potential invariant violated");
            let cand = rd + rw;
            if dist[v].map_or(true, |cur| cand < cur) {
                dist[v] = Some(cand);
                heap.push(Reverse((cand, v)));
            }
        }
    }
    // Un-reduce
    for v in 0..n {
        if let Some(rd) = dist[v] {
            dist[v] = Some(rd - pot[src] + pot[v]);
        }
    }
    dist
}

fn close_from_source<G: GraphView>(g: &G, pot: &[Wt], src: VertId, delta: &mut EdgeVector) {
    let dist = dijkstra(g, pot, src);
    for (d, dd) in dist.iter().enumerate() {
        if d == src {
            continue;
        }
        if let Some(dd) = dd {
            match g.lookup(src, d) {
                Some(w) if w <= *dd => {}
                _ => delta.push(((src, d), *dd)),
            }
        }
    }
}

/// Restore closure after a meet by running Dijkstra from every source with
/// outgoing edges, recording improved or newly reachable edges in `delta`.
pub fn close_after_meet<G: GraphView>(g: &G, pot: &[Wt], delta: &mut EdgeVector) {
    for v in g.verts() {
        if g.succs(v).is_empty() {
            continue;
        }
        close_from_source(g, pot, v, delta);
    }
}

/// Full Johnson pass: recompute potentials by Bellman-Ford, then close from
/// every source. Returns false when a negative cycle makes the graph
/// infeasible.
pub fn close_johnson<G: GraphView>(g: &G, pot: &mut Vec<Wt>, delta: &mut EdgeVector) -> bool {
    if !select_potentials(g, pot) {
        return false;
    }
    close_after_meet(g, pot, delta);
    true
}

/// Restore closure around a freshly assigned vertex: shortest paths leaving
/// and entering `v`. Only edges incident to `v` appear in the delta.
pub fn close_after_assign<G: GraphView>(g: &G, pot: &[Wt], v: VertId, delta: &mut EdgeVector) {
    let fwd = dijkstra(g, pot, v);
    for (d, dd) in fwd.iter().enumerate() {
        if d == v {
            continue;
        }
        if let Some(dd) = dd {
            match g.lookup(v, d) {
                Some(w) if w <= *dd => {}
                _ => delta.push(((v, d), *dd)),
            }
        }
    }
    let bwd = dijkstra(&ReverseView { g }, &negated(pot), v);
    for (s, ds) in bwd.iter().enumerate() {
        if s == v {
            continue;
        }
        if let Some(ds) = ds {
            match g.lookup(s, v) {
                Some(w) if w <= *ds => {}
                _ => delta.push(((s, v), *ds)),
            }
        }
    }
}

/// Re-close only from the vertices destabilized by a widening
pub fn close_after_widen<G: GraphView, F>(
    g: &G,
    pot: &[Wt],
    is_unstable: F,
    delta: &mut EdgeVector,
) where
    F: Fn(VertId) -> bool,
{
    for v in g.verts() {
        if is_unstable(v) && !g.succs(v).is_empty() {
            close_from_source(g, pot, v, delta);
        }
    }
}

/// Warm-started Bellman-Ford: decrease potentials until every edge has a
/// non-negative reduced weight. False on a negative cycle.
pub fn select_potentials<G: GraphView>(g: &G, pot: &mut Vec<Wt>) -> bool {
    let verts = g.verts();
    let n = verts.len();
    if pot.len() < g.size() {
        pot.resize(g.size(), 0);
    }
    for _round in 0..=n {
        let mut changed = false;
        for &u in &verts {
            for (v, w) in g.e_succs(u) {
                if pot[u] + w < pot[v] {
                    pot[v] = pot[u] + w;
                    changed = true;
                }
            }
        }
        if !changed {
            return true;
        }
    }
    false
}

/// After tightening the edge `src -> dest`, push potential decreases forward
/// from `dest`. A decrease that wraps back to `src` closes a negative cycle
/// through the new edge; the graph was feasible before, so any negative
/// cycle must pass through it, which also bounds the propagation.
pub fn repair_potential(g: &WeightedGraph, pot: &mut Vec<Wt>, src: VertId, dest: VertId) -> bool {
    let w = match g.lookup(src, dest) {
        Some(w) => w,
        None => return true,
    };
    if pot[src] + w >= pot[dest] {
        return true;
    }
    pot[dest] = pot[src] + w;
    let mut queue = VecDeque::new();
    queue.push_back(dest);
    while let Some(u) = queue.pop_front() {
        for (v, wv) in g.e_succs(u) {
            if pot[u] + wv < pot[v] {
                if v == src {
                    return false;
                }
                pot[v] = pot[u] + wv;
                queue.push_back(v);
            }
        }
    }
    true
}

/// Transposed view used for the backward half of `close_after_assign`;
/// potentials must be negated so reduced weights stay non-negative.
struct ReverseView<'a, G: GraphView> {
    g: &'a G,
}

fn negated(pot: &[Wt]) -> Vec<Wt> {
    pot.iter().map(|&p| -p).collect()
}

impl<'a, G: GraphView> GraphView for ReverseView<'a, G> {
    fn size(&self) -> usize {
        self.g.size()
    }
    fn verts(&self) -> Vec<VertId> {
        self.g.verts()
    }
    fn lookup(&self, u: VertId, v: VertId) -> Option<Wt> {
        self.g.lookup(v, u)
    }
    fn succs(&self, v: VertId) -> Vec<VertId> {
        self.g.preds(v)
    }
    fn preds(&self, v: VertId) -> Vec<VertId> {
        self.g.succs(v)
    }
    fn e_succs(&self, v: VertId) -> Vec<(VertId, Wt)> {
        self.g.e_preds(v)
    }
    fn e_preds(&self, v: VertId) -> Vec<(VertId, Wt)> {
        self.g.e_succs(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_graph(n: usize, edges: &[(VertId, Wt, VertId)]) -> WeightedGraph {
        let mut g = WeightedGraph::new();
        g.grow_to(n);
        for &(u, w, v) in edges {
            g.set_edge(u, w, v);
        }
        g
    }

    #[test]
    fn test_meet_and_join() {
        let l = mk_graph(3, &[(0, 5, 1), (1, 2, 2)]);
        let r = mk_graph(3, &[(0, 3, 1), (0, 9, 2)]);
        let (m, closed) = meet(&l, &r);
        assert!(!closed);
        assert_eq!(m.lookup(0, 1), Some(3));
        assert_eq!(m.lookup(1, 2), Some(2));
        assert_eq!(m.lookup(0, 2), Some(9));

        let j = join(&l, &r);
        assert_eq!(j.lookup(0, 1), Some(5));
        assert!(!j.elem(1, 2));
        assert!(!j.elem(0, 2));
    }

    #[test]
    fn test_meet_closed_when_nothing_changes() {
        let l = mk_graph(2, &[(0, 5, 1)]);
        let (_, closed) = meet(&l, &l);
        assert!(closed);
    }

    #[test]
    fn test_widen() {
        let l = mk_graph(2, &[(0, 5, 1), (1, 3, 0)]);
        let r = mk_graph(2, &[(0, 5, 1), (1, 7, 0)]);
        let mut unstable = Vec::new();
        let w = widen(&l, &r, &mut unstable);
        assert_eq!(w.lookup(0, 1), Some(5));
        assert!(!w.elem(1, 0));
        assert_eq!(unstable, vec![1]);
    }

    #[test]
    fn test_widen_thresholds() {
        let l = mk_graph(2, &[(0, 5, 1)]);
        let r = mk_graph(2, &[(0, 8, 1)]);
        let mut unstable = Vec::new();
        let w = widen_thresholds(&l, &r, &[7, 10, 100], &mut unstable);
        assert_eq!(w.lookup(0, 1), Some(10));
        // diagonal edges scale the threshold by two
        let l2 = mk_graph(2, &[(1, 5, 0)]);
        let r2 = mk_graph(2, &[(1, 8, 0)]);
        let mut unstable2 = Vec::new();
        let w2 = widen_thresholds(&l2, &r2, &[7, 10, 100], &mut unstable2);
        assert_eq!(w2.lookup(1, 0), Some(14));
    }

    #[test]
    fn test_dijkstra_reduced() {
        let g = mk_graph(4, &[(0, 2, 1), (1, -1, 2), (0, 5, 2), (2, 1, 3)]);
        let mut pot = vec![0; 4];
        assert!(select_potentials(&g, &mut pot));
        let dist = dijkstra(&g, &pot, 0);
        assert_eq!(dist[1], Some(2));
        assert_eq!(dist[2], Some(1));
        assert_eq!(dist[3], Some(2));
    }

    #[test]
    fn test_close_after_meet_restores_shortest_paths() {
        let g = mk_graph(3, &[(0, 2, 1), (1, 2, 2), (0, 9, 2)]);
        let mut pot = vec![0; 3];
        assert!(select_potentials(&g, &mut pot));
        let mut delta = EdgeVector::new();
        close_after_meet(&g, &pot, &mut delta);
        let mut g = g;
        apply_delta(&mut g, &delta);
        assert_eq!(g.lookup(0, 2), Some(4));
    }

    #[test]
    fn test_close_after_assign_only_touches_vertex() {
        let g = mk_graph(4, &[(0, 1, 3), (3, 2, 1), (1, 1, 2)]);
        let mut pot = vec![0; 4];
        assert!(select_potentials(&g, &mut pot));
        let mut delta = EdgeVector::new();
        close_after_assign(&g, &pot, 3, &mut delta);
        assert!(delta.iter().all(|((s, d), _)| *s == 3 || *d == 3));
        // 3 -> 1 -> 2 improves on the missing direct edge
        assert_eq!(delta, vec![((3, 2), 3)]);
    }

    #[test]
    fn test_select_potentials_negative_cycle() {
        let g = mk_graph(2, &[(0, -3, 1), (1, 2, 0)]);
        let mut pot = vec![0; 2];
        assert!(!select_potentials(&g, &mut pot));
    }

    #[test]
    fn test_repair_potential() {
        let mut g = mk_graph(3, &[(0, 4, 1), (1, 4, 2)]);
        let mut pot = vec![0; 3];
        assert!(select_potentials(&g, &mut pot));
        // tighten 0 -> 1, repair succeeds
        g.set_edge(0, -2, 1);
        assert!(repair_potential(&g, &mut pot, 0, 1));
        for &(u, v) in &[(0, 1), (1, 2)] {
            assert!(pot[u] + g.edge_val(u, v) - pot[v] >= 0);
        }
        // introduce a negative cycle through the new edge
        let mut pot2 = pot.clone();
        g.set_edge(1, -1, 0);
        assert!(!repair_potential(&g, &mut pot2, 1, 0));
    }
}
