use crate::domains::domain_traits::NumericalDomain;
use crate::domains::graph::graph_ops as ops;
use crate::domains::graph::graph_ops::EdgeVector;
use crate::domains::graph::weighted_graph::{
    GraphPerm, GraphView, SplitGraph, VertId, WeightedGraph, Wt, WtMin,
};
use crate::domains::interval::{Bound, Interval};
use crate::domains::lattice::LatticeTrait;
use crate::domains::linear_constraint::{
    DisjunctiveLinearConstraintSystem, LinearConstraint, LinearConstraintSystem, LinearExpression,
};
use crate::domains::op::{ArithOp, BitwiseOp, BoolOp, ConvOp, DivOp};
use crate::option::{DefaultParams, Params};
use crate::variable::Variable;
use itertools::{EitherOrBoth, Itertools};
use rug::Integer;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// The vertex encoding the opposite sign of `v`'s variable. Positive
/// vertices are even, so the pair partner is one xor away.
fn neg(v: VertId) -> VertId {
    v ^ 1
}

fn ntov(n: &Integer) -> Wt {
    n.to_i64().expect("octagon weight does not fit in i64")
}

/// A difference constraint `x - y <= k`
type DiffCst = ((Variable, Variable), Wt);

/// Working representation of an octagonal state. Every variable owns a pair
/// of graph vertices `(v+, v-)`; an edge `u -> v` with weight `w` encodes
/// `s_v - s_u <= w` where `s_u` is `+x` on the positive vertex of `x` and
/// `-x` on the negative one. Edges inside one pair carry twice the unary
/// bound.
pub struct SplitOctagonState<P: Params = DefaultParams> {
    vert_map: BTreeMap<Variable, (VertId, VertId)>,
    rev_map: Vec<Option<Variable>>,
    graph: WeightedGraph,
    potential: Vec<Wt>,
    unstable: HashSet<VertId>,
    is_bottom: bool,
    phantom: PhantomData<P>,
}

impl<P: Params> Clone for SplitOctagonState<P> {
    fn clone(&self) -> Self {
        SplitOctagonState {
            vert_map: self.vert_map.clone(),
            rev_map: self.rev_map.clone(),
            graph: self.graph.clone(),
            potential: self.potential.clone(),
            unstable: self.unstable.clone(),
            is_bottom: self.is_bottom,
            phantom: PhantomData,
        }
    }
}

impl<P: Params> SplitOctagonState<P> {
    pub fn top() -> Self {
        SplitOctagonState {
            vert_map: BTreeMap::new(),
            rev_map: Vec::new(),
            graph: WeightedGraph::new(),
            potential: Vec::new(),
            unstable: HashSet::new(),
            is_bottom: false,
            phantom: PhantomData,
        }
    }

    pub fn bottom() -> Self {
        let mut s = Self::top();
        s.is_bottom = true;
        s
    }

    pub fn is_bottom(&self) -> bool {
        self.is_bottom
    }

    pub fn is_top(&self) -> bool {
        !self.is_bottom && self.graph.is_empty()
    }

    fn set_to_bottom(&mut self) {
        self.vert_map.clear();
        self.rev_map.clear();
        self.graph.clear();
        self.potential.clear();
        self.unstable.clear();
        self.is_bottom = true;
    }

    fn set_to_top(&mut self) {
        *self = Self::top();
    }

    fn install_vertex(&mut self, vid: VertId, var: &Variable, pot: Wt) {
        if vid < self.rev_map.len() {
            self.potential[vid] = pot;
            self.rev_map[vid] = Some(var.clone());
        } else {
            debug_assert!(vid == self.rev_map.len());
            self.potential.push(pot);
            self.rev_map.push(Some(var.clone()));
        }
    }

    /// Vertex pair for `v`, allocating one when absent. Returns the
    /// positive vertex; the negative one is its successor.
    fn get_vert(&mut self, v: &Variable) -> VertId {
        if let Some(&(p, _)) = self.vert_map.get(v) {
            return p;
        }
        let mut vert_pos = self.graph.new_vertex();
        let mut vert_neg = self.graph.new_vertex();
        if vert_pos > vert_neg {
            std::mem::swap(&mut vert_pos, &mut vert_neg);
        }
        debug_assert!(vert_pos % 2 == 0 && vert_neg == vert_pos + 1);
        self.vert_map
            .insert(v.clone(), (vert_pos, vert_neg));
        self.install_vertex(vert_pos, v, 0);
        self.install_vertex(vert_neg, v, 0);
        vert_pos
    }

    /// Interval of a variable from its diagonal edges, without normalizing
    fn interval_of(&self, x: &Variable) -> Interval {
        if self.is_bottom {
            return Interval::bottom();
        }
        match self.vert_map.get(x) {
            None => Interval::top(),
            Some(&(v, _)) => {
                let lb = match self.graph.lookup(v, v + 1) {
                    // -2x <= w, so x >= -floor(w/2)
                    Some(w) => Bound::Int(-Integer::from(w.div_euclid(2))),
                    None => Bound::NINF,
                };
                let ub = match self.graph.lookup(v + 1, v) {
                    Some(w) => Bound::Int(Integer::from(w.div_euclid(2))),
                    None => Bound::INF,
                };
                Interval::new(lb, ub)
            }
        }
    }

    fn pot_value(&self, v: &Variable) -> Wt {
        match self.vert_map.get(v) {
            Some(&(p, _)) => self.potential[p],
            None => 0,
        }
    }

    fn eval_expression(&self, e: &LinearExpression) -> Wt {
        let mut v = ntov(&e.constant());
        for (var, coeff) in e {
            v += self.pot_value(var) * ntov(coeff);
        }
        v
    }

    fn eval_interval(&self, e: &LinearExpression) -> Interval {
        e.eval(|v| self.interval_of(v))
    }

    fn repair_potential(&mut self, src: VertId, dest: VertId) -> bool {
        ops::repair_potential(&self.graph, &mut self.potential, src, dest)
    }

    #[cfg(test)]
    fn check_potential(&self) -> bool {
        for u in self.graph.verts() {
            for (v, w) in self.graph.e_succs(u) {
                if self.potential[u] + w - self.potential[v] < 0 {
                    return false;
                }
            }
        }
        true
    }

    #[cfg(test)]
    fn check_coherence(&self) -> bool {
        for u in self.graph.verts() {
            for (v, w) in self.graph.e_succs(u) {
                if u / 2 == v / 2 {
                    continue;
                }
                match self.graph.lookup(neg(v), neg(u)) {
                    Some(m) if m == w => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Enforce the coherence property (every relational edge has its mirror
    /// with the same weight), then restabilize the vertices left unstable
    /// by a widening.
    pub fn normalize(&mut self) {
        if self.is_bottom {
            return;
        }
        let mut edges = Vec::new();
        for v in self.graph.verts() {
            for (d, w) in self.graph.e_succs(v) {
                if v / 2 != d / 2 {
                    edges.push((v, d, w));
                }
            }
        }
        for (v, d, cur) in edges {
            let (mv, md) = (neg(d), neg(v));
            match self.graph.lookup(mv, md) {
                Some(mirror) => {
                    let m = mirror.min(cur);
                    if m < mirror {
                        self.graph.set_edge(mv, m, md);
                        if !self.repair_potential(mv, md) {
                            self.set_to_bottom();
                            return;
                        }
                    }
                    if m < cur {
                        self.graph.set_edge(v, m, d);
                        if !self.repair_potential(v, d) {
                            self.set_to_bottom();
                            return;
                        }
                    }
                }
                None => {
                    self.graph.add_edge(mv, cur, md);
                    if !self.repair_potential(mv, md) {
                        self.set_to_bottom();
                        return;
                    }
                }
            }
        }

        if self.unstable.is_empty() {
            return;
        }
        let mut delta = EdgeVector::new();
        let mut infeasible = false;
        {
            let graph = &self.graph;
            let potential = &mut self.potential;
            let unstable = &self.unstable;
            let g_excl = SplitGraph::new(graph);
            if P::WIDEN_RESTABILIZE {
                ops::close_after_widen(&g_excl, potential, |v| unstable.contains(&v), &mut delta);
            } else if !ops::close_johnson(&g_excl, potential, &mut delta) {
                infeasible = true;
            }
        }
        if infeasible {
            self.set_to_bottom();
            return;
        }
        ops::apply_delta(&mut self.graph, &delta);
        // The deltas are relational; potentials may need re-validation
        // against the full graph before the next shortest-path pass.
        if !ops::select_potentials(&self.graph, &mut self.potential) {
            self.set_to_bottom();
            return;
        }
        self.unstable.clear();
    }

    /// After the edge `(u, v)` was tightened to `c`, tighten the unary
    /// bounds reachable by composing it with one diagonal edge.
    fn tighten_bounds_via(&mut self, u: VertId, v: VertId, c: Wt) {
        let min_op = WtMin;
        if let Some(w) = self.graph.lookup(neg(v), u) {
            self.graph.update_edge(neg(v), w + c, v, &min_op);
        }
        if let Some(w) = self.graph.lookup(v, neg(u)) {
            self.graph.update_edge(u, w + c, neg(u), &min_op);
        }
    }

    /// Propagate a freshly tightened diagonal edge `u -> neg(u)` through
    /// incident relational edges. All derived edges are path consequences,
    /// so the potential invariant is preserved without repairs.
    fn close_over_bound_edge(&mut self, u: VertId) {
        let nu = neg(u);
        let w = match self.graph.lookup(u, nu) {
            Some(w) => w,
            None => return,
        };
        let min_op = WtMin;
        let preds: Vec<(VertId, Wt)> = self
            .graph
            .e_preds(u)
            .into_iter()
            .filter(|&(p, _)| p / 2 != u / 2)
            .collect();
        let succs: Vec<(VertId, Wt)> = self
            .graph
            .e_succs(nu)
            .into_iter()
            .filter(|&(s, _)| s / 2 != u / 2)
            .collect();
        for &(p, wp) in &preds {
            self.graph.update_edge(p, wp + w, nu, &min_op);
        }
        for &(s, ws) in &succs {
            self.graph.update_edge(u, w + ws, s, &min_op);
        }
        for &(p, wp) in &preds {
            for &(s, ws) in &succs {
                if p / 2 == s / 2 {
                    if p == neg(s) {
                        // A diagonal consequence: a bound on var(s)
                        self.graph.update_edge(p, wp + w + ws, s, &min_op);
                    }
                    continue;
                }
                self.graph.update_edge(p, wp + w + ws, s, &min_op);
            }
        }
    }

    /// Propagate the consequences of a tightened relational edge
    /// `ii -> jj`, mirroring the incremental closure of shortest paths
    /// through that edge. Derived edges are path consequences and keep the
    /// potential invariant.
    fn close_over_edge(&mut self, ii: VertId, jj: VertId) {
        debug_assert!(ii / 2 != jj / 2);
        let c = match self.graph.lookup(ii, jj) {
            Some(c) => c,
            None => return,
        };
        self.tighten_bounds_via(ii, jj, c);

        let preds: Vec<(VertId, Wt)> = self
            .graph
            .e_preds(ii)
            .into_iter()
            .filter(|&(p, _)| p / 2 != ii / 2 && p != jj)
            .collect();
        let succs: Vec<(VertId, Wt)> = self
            .graph
            .e_succs(jj)
            .into_iter()
            .filter(|&(s, _)| s / 2 != jj / 2 && s != ii)
            .collect();

        let mut src_dec: Vec<(VertId, Wt)> = Vec::new();
        for &(se, wse) in &preds {
            let wt_sij = wse + c;
            match self.graph.lookup(se, jj) {
                Some(wcur) if wcur <= wt_sij => continue,
                _ => self.graph.set_edge(se, wt_sij, jj),
            }
            src_dec.push((se, wse));
            self.tighten_bounds_via(se, jj, wt_sij);
        }

        let mut dest_dec: Vec<(VertId, Wt)> = Vec::new();
        for &(de, wde) in &succs {
            let wt_ijd = c + wde;
            match self.graph.lookup(ii, de) {
                Some(wcur) if wcur <= wt_ijd => continue,
                _ => self.graph.set_edge(ii, wt_ijd, de),
            }
            dest_dec.push((de, wde));
            self.tighten_bounds_via(ii, de, wt_ijd);
        }

        for &(se, wse) in &src_dec {
            for &(de, wde) in &dest_dec {
                if se == de || se / 2 == de / 2 {
                    continue;
                }
                let wt = wse + c + wde;
                match self.graph.lookup(se, de) {
                    Some(wcur) if wcur <= wt => continue,
                    _ => self.graph.set_edge(se, wt, de),
                }
                self.tighten_bounds_via(se, de, wt);
            }
        }
    }

    fn assign_ub_csts(&self, exp: &LinearExpression) -> Vec<(Variable, Wt)> {
        let mut unbounded_ubvar: Option<Variable> = None;
        let mut exp_ub: Wt = ntov(&exp.constant());
        let mut ub_terms: Vec<(Variable, Wt)> = Vec::new();
        for (y, c) in exp {
            let coeff = ntov(c);
            if coeff < 0 {
                match self.interval_of(y).lb().number() {
                    Some(n) => exp_ub += ntov(n) * coeff,
                    None => return Vec::new(),
                }
            } else {
                match self.interval_of(y).ub().number() {
                    Some(n) => {
                        let ymax = ntov(n);
                        exp_ub += ymax * coeff;
                        ub_terms.push((y.clone(), ymax));
                    }
                    None => {
                        if unbounded_ubvar.is_some() || coeff != 1 {
                            return Vec::new();
                        }
                        unbounded_ubvar = Some(y.clone());
                    }
                }
            }
        }
        match unbounded_ubvar {
            Some(y) => vec![(y, exp_ub)],
            None => ub_terms
                .into_iter()
                .map(|(y, ymax)| (y, exp_ub - ymax))
                .collect(),
        }
    }

    fn assign_lb_csts(&self, exp: &LinearExpression) -> Vec<(Variable, Wt)> {
        let mut unbounded_lbvar: Option<Variable> = None;
        let mut exp_lb: Wt = ntov(&exp.constant());
        let mut lb_terms: Vec<(Variable, Wt)> = Vec::new();
        for (y, c) in exp {
            let coeff = ntov(c);
            if coeff < 0 {
                match self.interval_of(y).ub().number() {
                    Some(n) => exp_lb += ntov(n) * coeff,
                    None => return Vec::new(),
                }
            } else {
                match self.interval_of(y).lb().number() {
                    Some(n) => {
                        let ymin = ntov(n);
                        exp_lb += ymin * coeff;
                        lb_terms.push((y.clone(), ymin));
                    }
                    None => {
                        if unbounded_lbvar.is_some() || coeff != 1 {
                            return Vec::new();
                        }
                        unbounded_lbvar = Some(y.clone());
                    }
                }
            }
        }
        match unbounded_lbvar {
            Some(y) => vec![(y, exp_lb)],
            None => lb_terms
                .into_iter()
                .map(|(y, ymin)| (y, exp_lb - ymin))
                .collect(),
        }
    }

    /// Difference bounds between the assigned variable and each bounded
    /// term of the right-hand side: `x - y >= lb_k` and `x - y <= ub_k`
    fn diffcsts_of_assign(
        &self,
        exp: &LinearExpression,
    ) -> (Vec<(Variable, Wt)>, Vec<(Variable, Wt)>) {
        (self.assign_lb_csts(exp), self.assign_ub_csts(exp))
    }

    /// Octagonal sum bounds of an assignment: for each term `-t` of the
    /// right-hand side, `x + t` equals the rest of the expression, so the
    /// rest's bounds carry over when they are finite. `upper` selects
    /// between `x + t <= w` and `x + t >= w`.
    fn assign_sum_csts(&self, exp: &LinearExpression, upper: bool) -> Vec<(Variable, Wt)> {
        let mut out = Vec::new();
        'terms: for (t, ct) in exp {
            if ntov(ct) != -1 {
                continue;
            }
            let mut w = ntov(&exp.constant());
            for (y, c) in exp {
                if y == t {
                    continue;
                }
                let coeff = ntov(c);
                let itv = self.interval_of(y);
                let b = if (coeff > 0) == upper {
                    itv.ub().number().cloned()
                } else {
                    itv.lb().number().cloned()
                };
                match b {
                    Some(n) => w += coeff * ntov(&n),
                    None => continue 'terms,
                }
            }
            out.push((t.clone(), w));
        }
        out
    }

    /// Decompose `exp <= 0` into unary bounds and binary difference
    /// constraints. Bounds go to `lbs`/`ubs` as `x >= w` / `x <= w`;
    /// differences go to `csts` as `x - y <= k`.
    fn diffcsts_of_lin_leq(
        &self,
        exp: &LinearExpression,
        csts: &mut Vec<DiffCst>,
        lbs: &mut Vec<(Variable, Wt)>,
        ubs: &mut Vec<(Variable, Wt)>,
    ) {
        let mut exp_ub: Wt = -ntov(&exp.constant());
        let mut unbounded_lbcoeff: Wt = 0;
        let mut unbounded_ubcoeff: Wt = 0;
        let mut unbounded_lbvar: Option<Variable> = None;
        let mut unbounded_ubvar: Option<Variable> = None;
        // ((coeff, y), lb(y)) and ((|coeff|, y), ub(y))
        let mut pos_terms: Vec<((Wt, Variable), Wt)> = Vec::new();
        let mut neg_terms: Vec<((Wt, Variable), Wt)> = Vec::new();

        for (y, c) in exp {
            let coeff = ntov(c);
            if coeff > 0 {
                match self.interval_of(y).lb().number() {
                    Some(n) => {
                        let ymin = ntov(n);
                        exp_ub -= ymin * coeff;
                        pos_terms.push(((coeff, y.clone()), ymin));
                    }
                    None => {
                        if unbounded_lbvar.is_some() {
                            return;
                        }
                        unbounded_lbvar = Some(y.clone());
                        unbounded_lbcoeff = coeff;
                    }
                }
            } else {
                match self.interval_of(y).ub().number() {
                    Some(n) => {
                        let ymax = ntov(n);
                        exp_ub -= ymax * coeff;
                        neg_terms.push(((-coeff, y.clone()), ymax));
                    }
                    None => {
                        if unbounded_ubvar.is_some() {
                            return;
                        }
                        unbounded_ubvar = Some(y.clone());
                        unbounded_ubcoeff = -coeff;
                    }
                }
            }
        }

        match (unbounded_lbvar, unbounded_ubvar) {
            (Some(x), Some(y)) => {
                if unbounded_lbcoeff == 1 && unbounded_ubcoeff == 1 {
                    csts.push(((x, y), exp_ub));
                }
            }
            (Some(x), None) => {
                if unbounded_lbcoeff == 1 {
                    for ((_, y), ymax) in &neg_terms {
                        csts.push(((x.clone(), y.clone()), exp_ub - ymax));
                    }
                }
                ubs.push((x, exp_ub.div_euclid(unbounded_lbcoeff)));
            }
            (None, Some(y)) => {
                if unbounded_ubcoeff == 1 {
                    for ((_, x), ymin) in &pos_terms {
                        csts.push(((x.clone(), y.clone()), exp_ub + ymin));
                    }
                }
                lbs.push((y, -exp_ub.div_euclid(unbounded_ubcoeff)));
            }
            (None, None) => {
                for ((_, yl), l_ub) in &neg_terms {
                    for ((_, yu), u_lb) in &pos_terms {
                        csts.push(((yu.clone(), yl.clone()), exp_ub - l_ub + u_lb));
                    }
                }
                for ((cl, yl), l_ub) in &neg_terms {
                    lbs.push((yl.clone(), -exp_ub.div_euclid(*cl) + l_ub));
                }
                for ((cu, yu), u_lb) in &pos_terms {
                    ubs.push((yu.clone(), exp_ub.div_euclid(*cu) + u_lb));
                }
            }
        }
    }

    /// Add `exp <= 0`. False means the state became infeasible (and is
    /// already bottom).
    fn add_linear_leq(&mut self, exp: &LinearExpression) -> bool {
        // A two-variable sum is directly one octagonal edge; the generic
        // decomposition below only sees it through its interval bounds.
        if exp.size() == 2 {
            let terms: Vec<(Variable, Wt)> = exp
                .into_iter()
                .map(|(v, c)| (v.clone(), ntov(c)))
                .collect();
            let k = -ntov(&exp.constant());
            let oct_edge = match (terms[0].1, terms[1].1) {
                // x0 + x1 <= k
                (1, 1) => {
                    let v = self.get_vert(&terms[0].0);
                    let u = self.get_vert(&terms[1].0) + 1;
                    Some((u, v, k))
                }
                // -x0 - x1 <= k
                (-1, -1) => {
                    let v = self.get_vert(&terms[0].0) + 1;
                    let u = self.get_vert(&terms[1].0);
                    Some((u, v, k))
                }
                _ => None,
            };
            if let Some((u, v, k)) = oct_edge {
                let min_op = WtMin;
                self.graph.update_edge(u, k, v, &min_op);
                self.graph.update_edge(neg(v), k, neg(u), &min_op);
                if !self.repair_potential(u, v) {
                    self.set_to_bottom();
                    return false;
                }
                if !self.repair_potential(neg(v), neg(u)) {
                    self.set_to_bottom();
                    return false;
                }
                self.close_over_edge(u, v);
                self.close_over_edge(neg(v), neg(u));
            }
        }

        let mut csts: Vec<DiffCst> = Vec::new();
        let mut lbs: Vec<(Variable, Wt)> = Vec::new();
        let mut ubs: Vec<(Variable, Wt)> = Vec::new();
        self.diffcsts_of_lin_leq(exp, &mut csts, &mut lbs, &mut ubs);

        let min_op = WtMin;
        for (x, lb) in lbs {
            let v = self.get_vert(&x);
            if let Some(w) = self.graph.lookup(v, v + 1) {
                if w <= -2 * lb {
                    continue;
                }
            }
            self.graph.set_edge(v, -2 * lb, v + 1);
            if !self.repair_potential(v, v + 1) {
                self.set_to_bottom();
                return false;
            }
            self.close_over_bound_edge(v);
        }

        for (x, ub) in ubs {
            let v = self.get_vert(&x);
            if let Some(w) = self.graph.lookup(v + 1, v) {
                if w <= 2 * ub {
                    continue;
                }
            }
            self.graph.set_edge(v + 1, 2 * ub, v);
            if !self.repair_potential(v + 1, v) {
                self.set_to_bottom();
                return false;
            }
            self.close_over_bound_edge(v + 1);
        }

        for ((x, y), k) in csts {
            // x - y <= k
            let src = self.get_vert(&y);
            let dest = self.get_vert(&x);
            self.graph.update_edge(src, k, dest, &min_op);
            self.graph.update_edge(neg(dest), k, neg(src), &min_op);
            if !self.repair_potential(src, dest) {
                self.set_to_bottom();
                return false;
            }
            if !self.repair_potential(neg(dest), neg(src)) {
                self.set_to_bottom();
                return false;
            }
            self.close_over_edge(src, dest);
            self.close_over_edge(neg(dest), neg(src));
        }
        true
    }

    fn compute_residual(&self, e: &LinearExpression, pivot: &Variable) -> Interval {
        let mut residual = Interval::from(-e.constant());
        for (v, c) in e {
            if v != pivot {
                residual = residual - Interval::from(c.clone()) * self.interval_of(v);
            }
        }
        residual
    }

    fn add_univar_disequation(&mut self, x: &Variable, n: Integer) {
        let i = self.interval_of(x);
        let new_i = i.trim(&n);
        if new_i.is_bottom() {
            self.set_to_bottom();
            return;
        }
        if new_i.is_top() || !new_i.leq(&i) {
            return;
        }
        let v = self.get_vert(x);
        if let Some(lb) = new_i.lb().number() {
            let lb_val = ntov(lb);
            if let Some(w) = self.graph.lookup(v, v + 1) {
                if -2 * lb_val < w {
                    self.graph.set_edge(v, -2 * lb_val, v + 1);
                    if !self.repair_potential(v, v + 1) {
                        self.set_to_bottom();
                        return;
                    }
                }
            }
        }
        if let Some(ub) = new_i.ub().number() {
            let ub_val = ntov(ub);
            if let Some(w) = self.graph.lookup(v + 1, v) {
                if 2 * ub_val < w {
                    self.graph.set_edge(v + 1, 2 * ub_val, v);
                    if !self.repair_potential(v + 1, v) {
                        self.set_to_bottom();
                        return;
                    }
                }
            }
        }
    }

    /// For each variable, solve the disequation against the rest; a
    /// singleton residual trims that variable's interval
    fn add_disequation(&mut self, e: &LinearExpression) {
        for (v, c) in e {
            let i = self.compute_residual(e, v) / Interval::from(c.clone());
            if let Some(k) = i.singleton() {
                self.add_univar_disequation(v, k);
                if self.is_bottom {
                    return;
                }
            }
        }
    }

    pub fn add_constraint(&mut self, cst: &LinearConstraint) {
        if self.is_bottom {
            return;
        }
        self.normalize();
        if cst.is_tautology() {
            return;
        }
        if cst.is_contradiction() {
            self.set_to_bottom();
            return;
        }
        match cst {
            LinearConstraint::LessEq(e) => {
                self.add_linear_leq(e);
            }
            LinearConstraint::LessThan(_) => {
                let lowered = cst.strict_to_non_strict();
                self.add_linear_leq(lowered.expression());
            }
            LinearConstraint::Equality(e) => {
                if !self.add_linear_leq(e) || !self.add_linear_leq(&-e.clone()) {
                    self.set_to_bottom();
                }
            }
            LinearConstraint::Inequality(e) => {
                self.add_disequation(e);
            }
        }
        debug!("--- {:?} {:?}", cst, self);
    }

    pub fn forget_var(&mut self, v: &Variable) {
        if self.is_bottom {
            return;
        }
        self.normalize();
        if let Some((p, n)) = self.vert_map.remove(v) {
            self.graph.forget(p);
            self.graph.forget(n);
            self.rev_map[p] = None;
            self.rev_map[n] = None;
            self.unstable.remove(&p);
            self.unstable.remove(&n);
        }
    }

    /// Force the interval of `x`, dropping every relation it had
    pub fn set(&mut self, x: &Variable, intv: Interval) {
        if self.is_bottom {
            return;
        }
        self.forget_var(x);
        if self.is_bottom {
            return;
        }
        if intv.is_bottom() {
            self.set_to_bottom();
            return;
        }
        if intv.is_top() {
            return;
        }
        let v = self.get_vert(x);
        if let Some(ub) = intv.ub().number() {
            let ub = ntov(ub);
            self.potential[v] = ub;
            self.potential[v + 1] = -ub;
            self.graph.set_edge(v + 1, 2 * ub, v);
        }
        if let Some(lb) = intv.lb().number() {
            let lb = ntov(lb);
            self.potential[v] = lb;
            self.potential[v + 1] = -lb;
            self.graph.set_edge(v, -2 * lb, v + 1);
        }
    }

    pub fn assign(&mut self, x: &Variable, e: &LinearExpression) {
        if self.is_bottom {
            return;
        }
        self.normalize();

        if e.is_constant() {
            self.set(x, Interval::from(e.constant()));
            return;
        }

        let x_int = self.eval_interval(e);
        let (diffs_lb, diffs_ub) = self.diffcsts_of_assign(e);
        let sums_lb = self.assign_sum_csts(e, false);
        let sums_ub = self.assign_sum_csts(e, true);
        if diffs_lb.is_empty() && diffs_ub.is_empty() && sums_lb.is_empty() && sums_ub.is_empty() {
            self.set(x, x_int);
            return;
        }

        let min_op = WtMin;
        let mut v = self.graph.new_vertex();
        let mut w = self.graph.new_vertex();
        if w < v {
            std::mem::swap(&mut v, &mut w);
        }

        if P::SPECIAL_ASSIGN {
            let seed = self.eval_expression(e);
            self.install_vertex(v, x, seed);
            self.install_vertex(w, x, -seed);

            let mut delta = EdgeVector::new();
            for (y, wt) in &diffs_lb {
                let yv = self.get_vert(y);
                delta.push(((v, yv), -wt));
            }
            for (y, wt) in &diffs_ub {
                let yv = self.get_vert(y);
                delta.push(((yv, v), *wt));
            }
            for (t, wt) in &sums_ub {
                // x + t <= w is an edge from t's negative vertex
                let tv = self.get_vert(t);
                delta.push(((tv + 1, v), *wt));
            }
            for (t, wt) in &sums_lb {
                // x + t >= w, that is -x - t <= -w
                let tv = self.get_vert(t);
                delta.push(((v, tv + 1), -wt));
            }
            ops::apply_delta(&mut self.graph, &delta);
            for &((s, d), _) in &delta {
                if !self.repair_potential(s, d) {
                    self.set_to_bottom();
                    return;
                }
            }

            delta.clear();
            {
                let g_excl = SplitGraph::new(&self.graph);
                ops::close_after_assign(&g_excl, &self.potential, v, &mut delta);
            }
            ops::apply_delta(&mut self.graph, &delta);

            if let Some(lb) = x_int.lb().number() {
                self.graph.update_edge(v, -2 * ntov(lb), w, &min_op);
            }
            if let Some(ub) = x_int.ub().number() {
                self.graph.update_edge(w, 2 * ntov(ub), v, &min_op);
            }
        } else {
            self.install_vertex(v, x, 0);
            self.install_vertex(w, x, 0);

            let mut cst_edges: Vec<((VertId, VertId), Wt)> = Vec::new();
            for (y, wt) in &diffs_lb {
                let yv = self.get_vert(y);
                cst_edges.push(((v, yv), -wt));
            }
            for (y, wt) in &diffs_ub {
                let yv = self.get_vert(y);
                cst_edges.push(((yv, v), *wt));
            }
            for (t, wt) in &sums_ub {
                let tv = self.get_vert(t);
                cst_edges.push(((tv + 1, v), *wt));
            }
            for (t, wt) in &sums_lb {
                let tv = self.get_vert(t);
                cst_edges.push(((v, tv + 1), -wt));
            }
            for ((src, dest), wt) in cst_edges {
                self.graph.update_edge(src, wt, dest, &min_op);
                if !self.repair_potential(src, dest) {
                    self.set_to_bottom();
                    return;
                }
                self.close_over_edge(src, dest);
            }
            if let Some(lb) = x_int.lb().number() {
                self.graph.update_edge(v, -2 * ntov(lb), w, &min_op);
            }
            if let Some(ub) = x_int.ub().number() {
                self.graph.update_edge(w, 2 * ntov(ub), v, &min_op);
            }
        }

        // Swap in the fresh pair for x
        self.forget_var(x);
        if self.is_bottom {
            return;
        }
        self.rev_map[v] = Some(x.clone());
        self.rev_map[w] = Some(x.clone());
        self.vert_map.insert(x.clone(), (v, w));
        debug!("--- {:?} := {:?} {:?}", x, e, self);
    }

    /// true if self <= o
    pub fn leq(&mut self, o: &Self) -> bool {
        if self.is_bottom {
            return true;
        }
        if o.is_bottom {
            return false;
        }
        if o.is_top() {
            return true;
        }
        if self.is_top() {
            return false;
        }
        self.normalize();

        let mut vert_renaming: Vec<Option<VertId>> = vec![None; o.graph.size()];
        for (var, &(yp, yn)) in &o.vert_map {
            if o.graph.succs(yp).is_empty()
                && o.graph.succs(yn).is_empty()
                && o.graph.preds(yp).is_empty()
                && o.graph.preds(yn).is_empty()
            {
                continue;
            }
            match self.vert_map.get(var) {
                None => return false,
                Some(&(xp, xn)) => {
                    vert_renaming[yp] = Some(xp);
                    vert_renaming[yn] = Some(xn);
                }
            }
        }

        for ox in o.graph.verts() {
            for (oy, ow) in o.graph.e_succs(ox) {
                if ox == oy {
                    continue;
                }
                let x = match vert_renaming[ox] {
                    Some(x) => x,
                    None => return false,
                };
                let y = match vert_renaming[oy] {
                    Some(y) => y,
                    None => return false,
                };
                if let Some(wx) = self.graph.lookup(x, y) {
                    if wx <= ow {
                        continue;
                    }
                }
                // Search for a detour through some variable's own
                // diagonal edge
                let mut covered = false;
                for g in self.graph.verts() {
                    if g % 2 != 0 {
                        continue;
                    }
                    if let Some(wd) = self.graph.lookup(g, g + 1) {
                        if let (Some(w1), Some(w2)) =
                            (self.graph.lookup(x, g), self.graph.lookup(g + 1, y))
                        {
                            if w1 + wd + w2 <= ow {
                                covered = true;
                                break;
                            }
                        }
                    }
                    if let Some(wd) = self.graph.lookup(g + 1, g) {
                        if let (Some(w1), Some(w2)) =
                            (self.graph.lookup(x, g + 1), self.graph.lookup(g, y))
                        {
                            if w1 + wd + w2 <= ow {
                                covered = true;
                                break;
                            }
                        }
                    }
                }
                if !covered {
                    return false;
                }
            }
        }
        true
    }

    /// Deferred relations: for each relational edge `s -> d` of `rel`,
    /// materialize the bound implied by `bounds`' diagonal edges
    fn deferred_relations<G1: GraphView, G2: GraphView>(
        rel: &G1,
        bounds: &G2,
        sz: usize,
    ) -> WeightedGraph {
        let mut g = WeightedGraph::new();
        g.grow_to(sz);
        let rel_excl = SplitGraph::new(rel);
        for s in rel_excl.verts() {
            for (d, _) in rel_excl.e_succs(s) {
                if let (Some(ws), Some(wd)) =
                    (bounds.lookup(s, neg(s)), bounds.lookup(neg(d), d))
                {
                    g.set_edge(s, (ws + wd).div_euclid(2), d);
                }
            }
        }
        g
    }

    fn close_meet_result(g: &mut WeightedGraph, pot: &mut Vec<Wt>) {
        if !ops::select_potentials(g, pot) {
            // Deferred relations are implied; a cycle cannot appear here
            debug_assert!(false, "implied meet became infeasible");
            return;
        }
        let mut delta = EdgeVector::new();
        {
            let g_excl = SplitGraph::new(&*g);
            ops::close_after_meet(&g_excl, pot, &mut delta);
        }
        ops::apply_delta(g, &delta);
    }

    pub fn join(&mut self, o: &mut Self) -> Self {
        if self.is_bottom || o.is_top() {
            return o.clone();
        }
        if self.is_top() || o.is_bottom {
            return self.clone();
        }
        self.normalize();
        o.normalize();

        let mut perm_x: Vec<Option<VertId>> = Vec::new();
        let mut perm_y: Vec<Option<VertId>> = Vec::new();
        let mut out_vmap: BTreeMap<Variable, (VertId, VertId)> = BTreeMap::new();
        let mut out_revmap: Vec<Option<Variable>> = Vec::new();
        let mut pot_rx: Vec<Wt> = Vec::new();
        let mut pot_ry: Vec<Wt> = Vec::new();

        for pair in self
            .vert_map
            .iter()
            .merge_join_by(o.vert_map.iter(), |a, b| a.0.cmp(b.0))
        {
            if let EitherOrBoth::Both((var, &(xp, xn)), (_, &(yp, yn))) = pair {
                out_vmap.insert(var.clone(), (perm_x.len(), perm_x.len() + 1));
                out_revmap.push(Some(var.clone()));
                out_revmap.push(Some(var.clone()));
                pot_rx.push(self.potential[xp]);
                pot_rx.push(self.potential[xn]);
                pot_ry.push(o.potential[yp]);
                pot_ry.push(o.potential[yn]);
                perm_x.push(Some(xp));
                perm_x.push(Some(xn));
                perm_y.push(Some(yp));
                perm_y.push(Some(yn));
            }
        }
        let sz = perm_x.len();

        let gx = GraphPerm::new(perm_x, &self.graph);
        let gy = GraphPerm::new(perm_y, &o.graph);

        // Enrich each operand with the relations implied by its own bounds
        // along the other operand's relational edges, and re-close.
        let g_ix_ry = Self::deferred_relations(&gy, &gx, sz);
        let (mut g_rx, rx_closed) = ops::meet(&gx, &g_ix_ry);
        if !rx_closed {
            Self::close_meet_result(&mut g_rx, &mut pot_rx);
        }

        let g_rx_iy = Self::deferred_relations(&gx, &gy, sz);
        let (mut g_ry, ry_closed) = ops::meet(&gy, &g_rx_iy);
        if !ry_closed {
            Self::close_meet_result(&mut g_ry, &mut pot_ry);
        }

        let mut join_g = ops::join(&g_rx, &g_ry);

        // Bound products: bounds that moved in opposite ways between the
        // operands imply relations the pointwise join cannot see.
        let min_op = WtMin;
        let mut lb_up: Vec<VertId> = Vec::new();
        let mut lb_down: Vec<VertId> = Vec::new();
        let mut ub_up: Vec<VertId> = Vec::new();
        let mut ub_down: Vec<VertId> = Vec::new();
        let mut v = 0;
        while v < sz {
            if let (Some(wx), Some(wy)) = (gx.lookup(v + 1, v), gy.lookup(v + 1, v)) {
                if wx < wy {
                    ub_up.push(v);
                }
                if wy < wx {
                    ub_down.push(v);
                }
            }
            if let (Some(wx), Some(wy)) = (gx.lookup(v, v + 1), gy.lookup(v, v + 1)) {
                if wx < wy {
                    lb_down.push(v);
                }
                if wy < wx {
                    lb_up.push(v);
                }
            }
            v += 2;
        }

        let ub_of = |g: &GraphPerm<WeightedGraph>, v: VertId| g.edge_val(v + 1, v).div_euclid(2);
        let neg_lb_of = |g: &GraphPerm<WeightedGraph>, v: VertId| g.edge_val(v, v + 1).div_euclid(2);

        // Difference edges s+ -> d+ : x_d - x_s <= -lb_s + ub_d
        for (ss, dd) in lb_up
            .iter()
            .cartesian_product(ub_up.iter())
            .chain(lb_down.iter().cartesian_product(ub_down.iter()))
        {
            let (s, d) = (*ss, *dd);
            if s == d {
                continue;
            }
            let wt = (neg_lb_of(&gx, s) + ub_of(&gx, d)).max(neg_lb_of(&gy, s) + ub_of(&gy, d));
            join_g.update_edge(s, wt, d, &min_op);
        }
        // Sum edges s- -> d+ : x_d + x_s <= ub_s + ub_d
        for (ss, dd) in ub_up
            .iter()
            .cartesian_product(ub_down.iter())
            .chain(ub_down.iter().cartesian_product(ub_up.iter()))
        {
            let (s, d) = (*ss, *dd);
            if s == d {
                continue;
            }
            let wt = (ub_of(&gx, s) + ub_of(&gx, d)).max(ub_of(&gy, s) + ub_of(&gy, d));
            join_g.update_edge(s + 1, wt, d, &min_op);
        }
        // Negated-sum edges s+ -> d- : -x_d - x_s <= -lb_s - lb_d
        for (ss, dd) in lb_up
            .iter()
            .cartesian_product(lb_down.iter())
            .chain(lb_down.iter().cartesian_product(lb_up.iter()))
        {
            let (s, d) = (*ss, *dd);
            if s == d {
                continue;
            }
            let wt =
                (neg_lb_of(&gx, s) + neg_lb_of(&gx, d)).max(neg_lb_of(&gy, s) + neg_lb_of(&gy, d));
            join_g.update_edge(s, wt, d + 1, &min_op);
        }

        // Garbage-collect variable pairs that lost every edge
        let mut v = 0;
        while v < sz {
            if join_g.succs(v).is_empty()
                && join_g.preds(v).is_empty()
                && join_g.succs(v + 1).is_empty()
                && join_g.preds(v + 1).is_empty()
            {
                join_g.forget(v);
                join_g.forget(v + 1);
                if let Some(var) = out_revmap[v].take() {
                    out_vmap.remove(&var);
                    out_revmap[v + 1] = None;
                }
            }
            v += 2;
        }

        let res = SplitOctagonState {
            vert_map: out_vmap,
            rev_map: out_revmap,
            graph: join_g,
            potential: pot_rx,
            unstable: HashSet::new(),
            is_bottom: false,
            phantom: PhantomData,
        };
        debug!("join of {:?} and {:?} is {:?}", self, o, res);
        res
    }

    pub fn meet(&mut self, o: &mut Self) -> Self {
        if self.is_bottom || o.is_bottom {
            return Self::bottom();
        }
        if self.is_top() {
            return o.clone();
        }
        if o.is_top() {
            return self.clone();
        }
        self.normalize();
        o.normalize();

        let mut meet_verts: BTreeMap<Variable, (VertId, VertId)> = BTreeMap::new();
        let mut meet_rev: Vec<Option<Variable>> = Vec::new();
        let mut perm_x: Vec<Option<VertId>> = Vec::new();
        let mut perm_y: Vec<Option<VertId>> = Vec::new();
        let mut meet_pi: Vec<Wt> = Vec::new();

        for pair in self
            .vert_map
            .iter()
            .merge_join_by(o.vert_map.iter(), |a, b| a.0.cmp(b.0))
        {
            let vv = perm_x.len();
            match pair {
                EitherOrBoth::Both((var, &(xp, xn)), (_, &(yp, yn))) => {
                    meet_verts.insert(var.clone(), (vv, vv + 1));
                    meet_rev.push(Some(var.clone()));
                    meet_rev.push(Some(var.clone()));
                    perm_x.push(Some(xp));
                    perm_x.push(Some(xn));
                    perm_y.push(Some(yp));
                    perm_y.push(Some(yn));
                    meet_pi.push(self.potential[xp]);
                    meet_pi.push(self.potential[xn]);
                }
                EitherOrBoth::Left((var, &(xp, xn))) => {
                    meet_verts.insert(var.clone(), (vv, vv + 1));
                    meet_rev.push(Some(var.clone()));
                    meet_rev.push(Some(var.clone()));
                    perm_x.push(Some(xp));
                    perm_x.push(Some(xn));
                    perm_y.push(None);
                    perm_y.push(None);
                    meet_pi.push(self.potential[xp]);
                    meet_pi.push(self.potential[xn]);
                }
                EitherOrBoth::Right((var, &(yp, yn))) => {
                    meet_verts.insert(var.clone(), (vv, vv + 1));
                    meet_rev.push(Some(var.clone()));
                    meet_rev.push(Some(var.clone()));
                    perm_x.push(None);
                    perm_x.push(None);
                    perm_y.push(Some(yp));
                    perm_y.push(Some(yn));
                    meet_pi.push(o.potential[yp]);
                    meet_pi.push(o.potential[yn]);
                }
            }
        }

        let gx = GraphPerm::new(perm_x, &self.graph);
        let gy = GraphPerm::new(perm_y, &o.graph);

        let (mut meet_g, is_closed) = ops::meet(&gx, &gy);

        if !ops::select_potentials(&meet_g, &mut meet_pi) {
            // Potentials cannot be selected: the state is infeasible
            return Self::bottom();
        }

        if !is_closed {
            let mut delta = EdgeVector::new();
            let feasible = {
                let g_excl = SplitGraph::new(&meet_g);
                if P::CHROME_DIJKSTRA {
                    ops::close_after_meet(&g_excl, &meet_pi, &mut delta);
                    true
                } else {
                    ops::close_johnson(&g_excl, &mut meet_pi, &mut delta)
                }
            };
            if !feasible {
                return Self::bottom();
            }
            ops::apply_delta(&mut meet_g, &delta);
            if !ops::select_potentials(&meet_g, &mut meet_pi) {
                return Self::bottom();
            }
        }

        SplitOctagonState {
            vert_map: meet_verts,
            rev_map: meet_rev,
            graph: meet_g,
            potential: meet_pi,
            unstable: HashSet::new(),
            is_bottom: false,
            phantom: PhantomData,
        }
    }

    fn widen_impl(&self, o: &mut Self, thresholds: Option<&[Wt]>) -> Self {
        if self.is_bottom {
            return o.clone();
        }
        if o.is_bottom {
            return self.clone();
        }
        o.normalize();

        let mut perm_x: Vec<Option<VertId>> = Vec::new();
        let mut perm_y: Vec<Option<VertId>> = Vec::new();
        let mut out_vmap: BTreeMap<Variable, (VertId, VertId)> = BTreeMap::new();
        let mut out_revmap: Vec<Option<Variable>> = Vec::new();
        let mut widen_pot: Vec<Wt> = Vec::new();
        let mut renaming: Vec<Option<VertId>> = vec![None; self.graph.size()];

        for (var, &(xp, xn)) in &self.vert_map {
            if let Some(&(yp, yn)) = o.vert_map.get(var) {
                let vv = perm_x.len();
                out_vmap.insert(var.clone(), (vv, vv + 1));
                out_revmap.push(Some(var.clone()));
                out_revmap.push(Some(var.clone()));
                widen_pot.push(self.potential[xp]);
                widen_pot.push(self.potential[xn]);
                renaming[xp] = Some(vv);
                renaming[xn] = Some(vv + 1);
                perm_x.push(Some(xp));
                perm_x.push(Some(xn));
                perm_y.push(Some(yp));
                perm_y.push(Some(yn));
            }
        }

        let gx = GraphPerm::new(perm_x, &self.graph);
        let gy = GraphPerm::new(perm_y, &o.graph);

        let mut destabilized: Vec<VertId> = Vec::new();
        let widen_g = match thresholds {
            Some(ts) => ops::widen_thresholds(&gx, &gy, ts, &mut destabilized),
            None => ops::widen(&gx, &gy, &mut destabilized),
        };

        let mut widen_unstable: HashSet<VertId> = HashSet::new();
        for &u in &self.unstable {
            if let Some(Some(nu)) = renaming.get(u) {
                widen_unstable.insert(*nu);
            }
        }
        widen_unstable.extend(destabilized);

        SplitOctagonState {
            vert_map: out_vmap,
            rev_map: out_revmap,
            graph: widen_g,
            potential: widen_pot,
            unstable: widen_unstable,
            is_bottom: false,
            phantom: PhantomData,
        }
    }

    pub fn widening_with(&self, o: &mut Self) -> Self {
        self.widen_impl(o, None)
    }

    pub fn widening_with_thresholds(&self, o: &mut Self, thresholds: &[Integer]) -> Self {
        let mut ts: Vec<Wt> = thresholds.iter().map(ntov).collect();
        ts.sort_unstable();
        ts.dedup();
        self.widen_impl(o, Some(&ts))
    }

    /// Narrowing is the identity beyond the bottom cases. Sound because a
    /// descending iteration may stop anywhere above the limit.
    pub fn narrowing_with(&mut self, o: &Self) -> Self {
        if self.is_bottom || o.is_bottom {
            return Self::bottom();
        }
        if self.is_top() {
            return o.clone();
        }
        self.normalize();
        self.clone()
    }

    pub fn get_interval(&mut self, x: &Variable) -> Interval {
        if self.is_bottom {
            return Interval::bottom();
        }
        self.normalize();
        self.interval_of(x)
    }

    pub fn forget_range(&mut self, vars: &[Variable]) {
        if self.is_bottom {
            return;
        }
        for v in vars {
            self.forget_var(v);
        }
    }

    pub fn project(&mut self, vars: &[Variable]) {
        if self.is_bottom || vars.is_empty() {
            return;
        }
        self.normalize();
        let mut save = vec![false; self.rev_map.len()];
        for x in vars {
            if let Some(&(p, n)) = self.vert_map.get(x) {
                save[p] = true;
                save[n] = true;
            }
        }
        let doomed: Vec<Variable> = self
            .rev_map
            .iter()
            .enumerate()
            .filter_map(|(v, var)| match var {
                Some(var) if !save[v] => Some(var.clone()),
                _ => None,
            })
            .unique()
            .collect();
        for var in doomed {
            self.forget_var(&var);
        }
    }

    /// Copy every constraint of `x` onto the fresh variable `y` without
    /// relating the two
    pub fn expand(&mut self, x: &Variable, y: &Variable) {
        if self.is_bottom {
            return;
        }
        if self.vert_map.contains_key(y) {
            panic!("expand: target variable {:?} already exists", y);
        }
        if !self.vert_map.contains_key(x) {
            return;
        }
        let ii = self.get_vert(x);
        let jj = self.get_vert(y);

        for side in 0..2 {
            let from = ii + side;
            let to = jj + side;
            for (p, w) in self.graph.e_preds(from) {
                let p2 = if p / 2 == ii / 2 { jj + (p - ii) } else { p };
                self.graph.set_edge(p2, w, to);
            }
            for (s, w) in self.graph.e_succs(from) {
                let s2 = if s / 2 == ii / 2 { jj + (s - ii) } else { s };
                self.graph.set_edge(to, w, s2);
            }
        }
        self.potential[jj] = self.potential[ii];
        self.potential[jj + 1] = self.potential[ii + 1];
    }

    pub fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        if self.is_top() || self.is_bottom {
            return;
        }
        assert_eq!(from.len(), to.len());
        let mut new_vert_map: BTreeMap<Variable, (VertId, VertId)> = BTreeMap::new();
        for (var, verts) in &self.vert_map {
            match from.iter().position(|v| v == var) {
                Some(pos) => {
                    let new_v = to[pos].clone();
                    self.rev_map[verts.0] = Some(new_v.clone());
                    self.rev_map[verts.1] = Some(new_v.clone());
                    new_vert_map.insert(new_v, *verts);
                }
                None => {
                    new_vert_map.insert(var.clone(), *verts);
                }
            }
        }
        self.vert_map = new_vert_map;
    }

    pub fn active_variables(&self) -> Vec<Variable> {
        self.vert_map.keys().cloned().collect()
    }

    /// Candidate difference constraint of `exp <= 0` as an implied edge
    /// `(u, v, k)` meaning `s_v - s_u <= k`
    fn diffcst_of_leq(&self, exp: &LinearExpression) -> Option<(VertId, VertId, Wt)> {
        let k = -ntov(&exp.constant());
        let terms: Vec<(Variable, Wt)> = exp
            .into_iter()
            .map(|(v, c)| (v.clone(), ntov(c)))
            .collect();
        let vert = |v: &Variable| self.vert_map.get(v).map(|&(p, _)| p);
        match terms.as_slice() {
            [(x, 1)] => {
                // 2x <= 2k
                let p = vert(x)?;
                Some((p + 1, p, 2 * k))
            }
            [(x, -1)] => {
                let p = vert(x)?;
                Some((p, p + 1, 2 * k))
            }
            [(x, 1), (y, -1)] => {
                // x - y <= k
                let (px, py) = (vert(x)?, vert(y)?);
                Some((py, px, k))
            }
            [(x, -1), (y, 1)] => {
                let (px, py) = (vert(x)?, vert(y)?);
                Some((px, py, k))
            }
            [(x, 1), (y, 1)] => {
                // x + y <= k
                let (px, py) = (vert(x)?, vert(y)?);
                Some((py + 1, px, k))
            }
            [(x, -1), (y, -1)] => {
                let (px, py) = (vert(x)?, vert(y)?);
                Some((py, px + 1, k))
            }
            _ => None,
        }
    }

    fn signed_interval(&self, v: VertId) -> Interval {
        let var = match &self.rev_map[v / 2 * 2] {
            Some(var) => var.clone(),
            None => return Interval::top(),
        };
        let i = self.interval_of(&var);
        if v % 2 == 0 {
            i
        } else {
            Interval::from(Integer::from(0)) - i
        }
    }

    /// Cheap refutation: does the candidate edge of `cst` close a negative
    /// cycle with an existing bound?
    pub fn is_unsat(&mut self, cst: &LinearConstraint) -> bool {
        if self.is_bottom || cst.is_contradiction() {
            return true;
        }
        if self.is_top() || cst.is_tautology() {
            return false;
        }
        let lowered;
        let exp = match cst {
            LinearConstraint::LessEq(e) => e,
            LinearConstraint::LessThan(_) => {
                lowered = cst.strict_to_non_strict();
                lowered.expression()
            }
            _ => return false,
        };
        self.normalize();
        let (u, v, k) = match self.diffcst_of_leq(exp) {
            Some(t) => t,
            None => return false,
        };
        if let Some(w) = self.graph.lookup(v, u) {
            return w + k < 0;
        }
        let iv = self.signed_interval(v);
        let iu = self.signed_interval(u);
        if iv.is_top() || iu.is_top() {
            return false;
        }
        // s_v - s_u <= k is refutable when its lower bound exceeds k
        match (iv - iu).lb().number() {
            Some(l) => ntov(l) > k,
            None => false,
        }
    }

    pub fn to_linear_constraint_system(&mut self) -> LinearConstraintSystem {
        self.normalize();
        let mut csts = LinearConstraintSystem::default();
        if self.is_bottom {
            csts.add(LinearConstraint::new_false());
            return csts;
        }
        for v in self.graph.verts() {
            if v % 2 != 0 {
                continue;
            }
            let var = match &self.rev_map[v] {
                Some(var) => var.clone(),
                None => continue,
            };
            if let Some(w) = self.graph.lookup(v, v + 1) {
                // x >= -floor(w/2)
                let lb = Integer::from(-w.div_euclid(2));
                csts.add(LinearConstraint::LessEq(
                    LinearExpression::from(lb) - var.clone(),
                ));
            }
            if let Some(w) = self.graph.lookup(v + 1, v) {
                let ub = Integer::from(w.div_euclid(2));
                csts.add(LinearConstraint::LessEq(
                    LinearExpression::variable(var.clone()) - ub,
                ));
            }
        }
        let g_excl = SplitGraph::new(&self.graph);
        for s in g_excl.verts() {
            let vs = match &self.rev_map[s / 2 * 2] {
                Some(var) => var.clone(),
                None => continue,
            };
            for (d, w) in g_excl.e_succs(s) {
                let vd = match &self.rev_map[d / 2 * 2] {
                    Some(var) => var.clone(),
                    None => continue,
                };
                let w = Integer::from(w);
                let e = match (s % 2 == 0, d % 2 == 0) {
                    // x_d - x_s <= w
                    (true, true) => LinearExpression::variable(vd) - vs.clone() - w,
                    // x_d + x_s <= w
                    (false, true) => LinearExpression::variable(vd) + vs.clone() - w,
                    // -x_d - x_s <= w
                    (true, false) => -(LinearExpression::variable(vd) + vs.clone()) - w,
                    // x_s - x_d <= w
                    (false, false) => LinearExpression::variable(vs.clone()) - vd - w,
                };
                csts.add(LinearConstraint::LessEq(e));
            }
        }
        csts
    }
}

impl<P: Params> fmt::Debug for SplitOctagonState<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bottom {
            return write!(f, "_|_");
        }
        if self.is_top() {
            return write!(f, "{{}}");
        }
        let mut first = true;
        write!(f, "{{")?;
        for v in self.graph.verts() {
            if v % 2 != 0 {
                continue;
            }
            let var = match &self.rev_map[v] {
                Some(var) => var,
                None => continue,
            };
            if !self.graph.elem(v, v + 1) && !self.graph.elem(v + 1, v) {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{:?} -> {:?}", var, self.interval_of(var))?;
        }
        let g_excl = SplitGraph::new(&self.graph);
        for s in g_excl.verts() {
            let vs = match &self.rev_map[s / 2 * 2] {
                Some(var) => var,
                None => continue,
            };
            for (d, w) in g_excl.e_succs(s) {
                let vd = match &self.rev_map[d / 2 * 2] {
                    Some(var) => var,
                    None => continue,
                };
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                match (s % 2 == 0, d % 2 == 0) {
                    (true, true) => write!(f, "{:?}-{:?}<={}", vd, vs, w)?,
                    (false, true) => write!(f, "{:?}+{:?}<={}", vd, vs, w)?,
                    (true, false) => write!(f, "-{:?}-{:?}<={}", vd, vs, w)?,
                    (false, false) => write!(f, "{:?}-{:?}<={}", vs, vd, w)?,
                }
            }
        }
        write!(f, "}}")
    }
}

/// Copy-on-write handle over `SplitOctagonState`. Queries go through the
/// normalized reference; mutators call `lock` first, which privatizes the
/// payload when it is shared. Widening reads its left operand through the
/// un-normalized base so extrapolation is not undone.
pub struct SplitOctagon<P: Params = DefaultParams> {
    base: Option<Rc<RefCell<SplitOctagonState<P>>>>,
    norm: Rc<RefCell<SplitOctagonState<P>>>,
}

impl<P: Params> Clone for SplitOctagon<P> {
    fn clone(&self) -> Self {
        SplitOctagon {
            base: self.base.clone(),
            norm: self.norm.clone(),
        }
    }
}

impl<P: Params> SplitOctagon<P> {
    fn create(t: SplitOctagonState<P>) -> Self {
        SplitOctagon {
            base: None,
            norm: Rc::new(RefCell::new(t)),
        }
    }

    fn create_base(t: SplitOctagonState<P>) -> Self {
        SplitOctagon {
            base: Some(Rc::new(RefCell::new(t.clone()))),
            norm: Rc::new(RefCell::new(t)),
        }
    }

    fn lock(&mut self) {
        if Rc::strong_count(&self.norm) > 1 {
            let copy = self.norm.borrow().clone();
            self.norm = Rc::new(RefCell::new(copy));
        }
        self.base = None;
    }

    fn same_payload(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.norm, &other.norm)
    }

    pub fn is_unsat(&self, cst: &LinearConstraint) -> bool {
        self.norm.borrow_mut().is_unsat(cst)
    }

    pub fn active_variables(&self) -> Vec<Variable> {
        self.norm.borrow().active_variables()
    }

    #[cfg(test)]
    fn with_state<R>(&self, f: impl FnOnce(&SplitOctagonState<P>) -> R) -> R {
        f(&self.norm.borrow())
    }
}

impl<P: Params> Default for SplitOctagon<P> {
    fn default() -> Self {
        Self::top()
    }
}

impl<P: Params> fmt::Debug for SplitOctagon<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.norm.borrow())
    }
}

impl<P: Params> LatticeTrait for SplitOctagon<P> {
    fn top() -> Self {
        Self::create(SplitOctagonState::top())
    }

    fn is_top(&self) -> bool {
        self.norm.borrow().is_top()
    }

    fn set_to_top(&mut self) {
        self.lock();
        self.norm.borrow_mut().set_to_top();
    }

    fn bottom() -> Self {
        Self::create(SplitOctagonState::bottom())
    }

    fn is_bottom(&self) -> bool {
        self.norm.borrow().is_bottom()
    }

    fn set_to_bottom(&mut self) {
        self.lock();
        self.norm.borrow_mut().set_to_bottom();
    }

    fn lub(&self, other: &Self) -> Self {
        if self.same_payload(other) {
            return self.clone();
        }
        Self::create(
            self.norm
                .borrow_mut()
                .join(&mut other.norm.borrow_mut()),
        )
    }

    fn widening_with(&self, other: &Self) -> Self {
        if self.same_payload(other) {
            return self.clone();
        }
        let left = self.base.as_ref().unwrap_or(&self.norm);
        Self::create_base(left.borrow().widening_with(&mut other.norm.borrow_mut()))
    }
}

impl<P: Params> NumericalDomain for SplitOctagon<P> {
    fn leq(&self, other: &Self) -> bool {
        if self.same_payload(other) {
            return true;
        }
        self.norm.borrow_mut().leq(&other.norm.borrow())
    }

    fn meet(&self, other: &Self) -> Self {
        if self.same_payload(other) {
            return self.clone();
        }
        Self::create(
            self.norm
                .borrow_mut()
                .meet(&mut other.norm.borrow_mut()),
        )
    }

    fn narrowing_with(&self, other: &Self) -> Self {
        if self.same_payload(other) {
            return self.clone();
        }
        Self::create(self.norm.borrow_mut().narrowing_with(&other.norm.borrow()))
    }

    fn widening_with_thresholds(&self, other: &Self, thresholds: &[Integer]) -> Self {
        if self.same_payload(other) {
            return self.clone();
        }
        let left = self.base.as_ref().unwrap_or(&self.norm);
        Self::create_base(
            left.borrow()
                .widening_with_thresholds(&mut other.norm.borrow_mut(), thresholds),
        )
    }

    fn normalize(&mut self) {
        self.norm.borrow_mut().normalize();
    }

    fn assign(&mut self, x: &Variable, e: &LinearExpression) {
        self.lock();
        self.norm.borrow_mut().assign(x, e);
    }

    fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Variable) {
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        match op {
            ArithOp::Addition => {
                let e = LinearExpression::variable(y.clone()) + z.clone();
                state.assign(x, &e);
            }
            ArithOp::Subtraction => {
                let e = LinearExpression::variable(y.clone()) - z.clone();
                state.assign(x, &e);
            }
            ArithOp::Multiplication => {
                let xi = state.get_interval(y) * state.get_interval(z);
                state.set(x, xi);
            }
            ArithOp::Division => {
                let xi = state.get_interval(y) / state.get_interval(z);
                if xi.is_bottom() {
                    state.set_to_bottom();
                } else {
                    state.set(x, xi);
                }
            }
        }
    }

    fn apply_num(&mut self, op: ArithOp, x: &Variable, y: &Variable, k: &Integer) {
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        match op {
            ArithOp::Addition => {
                let e = LinearExpression::variable(y.clone()) + k.clone();
                state.assign(x, &e);
            }
            ArithOp::Subtraction => {
                let e = LinearExpression::variable(y.clone()) - k.clone();
                state.assign(x, &e);
            }
            ArithOp::Multiplication => {
                let xi = state.get_interval(y) * Interval::from(k.clone());
                state.set(x, xi);
            }
            ArithOp::Division => {
                if *k == 0 {
                    state.set_to_bottom();
                } else {
                    let xi = state.get_interval(y) / Interval::from(k.clone());
                    state.set(x, xi);
                }
            }
        }
    }

    fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Variable) {
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        let yi = state.get_interval(y);
        let zi = state.get_interval(z);
        let xi = apply_bitwise_itv(op, &yi, &zi);
        state.set(x, xi);
    }

    fn apply_bitwise_num(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, k: &Integer) {
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        let yi = state.get_interval(y);
        let zi = Interval::from(k.clone());
        let xi = apply_bitwise_itv(op, &yi, &zi);
        state.set(x, xi);
    }

    fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Variable) {
        if op == DivOp::SDiv {
            self.apply(ArithOp::Division, x, y, z);
            return;
        }
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        let yi = state.get_interval(y);
        let zi = state.get_interval(z);
        let xi = apply_div_itv(op, &yi, &zi);
        state.set(x, xi);
    }

    fn apply_div_num(&mut self, op: DivOp, x: &Variable, y: &Variable, k: &Integer) {
        if op == DivOp::SDiv {
            self.apply_num(ArithOp::Division, x, y, k);
            return;
        }
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        let yi = state.get_interval(y);
        let zi = Interval::from(k.clone());
        let xi = apply_div_itv(op, &yi, &zi);
        state.set(x, xi);
    }

    fn apply_conv(&mut self, _op: ConvOp, dst: &Variable, src: &Variable) {
        // Infinite precision: widths are ignored
        self.lock();
        let e = LinearExpression::variable(src.clone());
        self.norm.borrow_mut().assign(dst, &e);
    }

    fn backward_assign(&mut self, x: &Variable, e: &LinearExpression, inv: &Self) {
        self.lock();
        if self.is_bottom() {
            return;
        }
        let cst = LinearConstraint::Equality(e.clone() - x.clone());
        {
            let mut state = self.norm.borrow_mut();
            state.add_constraint(&cst);
            state.forget_var(x);
        }
        *self = self.meet(inv);
    }

    fn backward_apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Variable, inv: &Self) {
        match op {
            ArithOp::Addition => {
                let e = LinearExpression::variable(y.clone()) + z.clone();
                self.backward_assign(x, &e, inv);
            }
            ArithOp::Subtraction => {
                let e = LinearExpression::variable(y.clone()) - z.clone();
                self.backward_assign(x, &e, inv);
            }
            _ => {
                self.lock();
                self.norm.borrow_mut().forget_var(x);
                *self = self.meet(inv);
            }
        }
    }

    fn backward_apply_num(
        &mut self,
        op: ArithOp,
        x: &Variable,
        y: &Variable,
        k: &Integer,
        inv: &Self,
    ) {
        match op {
            ArithOp::Addition => {
                let e = LinearExpression::variable(y.clone()) + k.clone();
                self.backward_assign(x, &e, inv);
            }
            ArithOp::Subtraction => {
                let e = LinearExpression::variable(y.clone()) - k.clone();
                self.backward_assign(x, &e, inv);
            }
            _ => {
                self.lock();
                self.norm.borrow_mut().forget_var(x);
                *self = self.meet(inv);
            }
        }
    }

    fn assign_bool_cst(&mut self, lhs: &Variable, rhs: &LinearConstraint) {
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        if rhs.is_tautology() {
            state.set(lhs, Interval::from(Integer::from(1)));
        } else if rhs.is_contradiction() {
            state.set(lhs, Interval::from(Integer::from(0)));
        } else {
            state.set(
                lhs,
                Interval::new(Bound::Int(Integer::from(0)), Bound::Int(Integer::from(1))),
            );
        }
    }

    fn assign_bool_var(&mut self, lhs: &Variable, rhs: &Variable, is_not_rhs: bool) {
        self.lock();
        let e = if is_not_rhs {
            LinearExpression::from(1) - rhs.clone()
        } else {
            LinearExpression::variable(rhs.clone())
        };
        self.norm.borrow_mut().assign(lhs, &e);
    }

    fn apply_binary_bool(&mut self, op: BoolOp, x: &Variable, y: &Variable, z: &Variable) {
        self.lock();
        let mut state = self.norm.borrow_mut();
        if state.is_bottom() {
            return;
        }
        let yi = state.get_interval(y).singleton();
        let zi = state.get_interval(z).singleton();
        let xi = match (yi, zi) {
            (Some(a), Some(b)) => {
                let (a, b) = (a != 0, b != 0);
                let r = match op {
                    BoolOp::And => a && b,
                    BoolOp::Or => a || b,
                    BoolOp::Xor => a != b,
                };
                Interval::from(Integer::from(r as i32))
            }
            _ => Interval::new(Bound::Int(Integer::from(0)), Bound::Int(Integer::from(1))),
        };
        state.set(x, xi);
    }

    fn assume_bool(&mut self, v: &Variable, is_negated: bool) {
        self.lock();
        let e = if is_negated {
            // v == 0
            LinearExpression::variable(v.clone())
        } else {
            // v == 1
            LinearExpression::variable(v.clone()) - Integer::from(1)
        };
        self.norm
            .borrow_mut()
            .add_constraint(&LinearConstraint::Equality(e));
    }

    fn pointer_assign(&mut self, lhs: &Variable, _rhs: &Variable, _offset: &LinearExpression) {
        // Addresses are not tracked relationally
        self.lock();
        self.norm.borrow_mut().forget_var(lhs);
    }

    fn pointer_mk_null(&mut self, lhs: &Variable) {
        self.lock();
        self.norm
            .borrow_mut()
            .set(lhs, Interval::from(Integer::from(0)));
    }

    fn add_constraint(&mut self, cst: &LinearConstraint) {
        self.lock();
        self.norm.borrow_mut().add_constraint(cst);
    }

    fn get_interval(&self, x: &Variable) -> Interval {
        self.norm.borrow_mut().get_interval(x)
    }

    fn set(&mut self, x: &Variable, intv: Interval) {
        self.lock();
        self.norm.borrow_mut().set(x, intv);
    }

    fn forget(&mut self, x: &Variable) {
        self.lock();
        self.norm.borrow_mut().forget_var(x);
    }

    fn project(&mut self, vars: &[Variable]) {
        self.lock();
        self.norm.borrow_mut().project(vars);
    }

    fn expand(&mut self, x: &Variable, new_x: &Variable) {
        self.lock();
        self.norm.borrow_mut().expand(x, new_x);
    }

    fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        self.lock();
        self.norm.borrow_mut().rename(from, to);
    }

    fn to_linear_constraint_system(&self) -> LinearConstraintSystem {
        self.norm.borrow_mut().to_linear_constraint_system()
    }

    fn to_disjunctive_linear_constraint_system(&self) -> DisjunctiveLinearConstraintSystem {
        DisjunctiveLinearConstraintSystem::from(self.to_linear_constraint_system())
    }
}

fn apply_bitwise_itv(op: BitwiseOp, yi: &Interval, zi: &Interval) -> Interval {
    match op {
        BitwiseOp::And => yi.and(zi),
        BitwiseOp::Or => yi.or(zi),
        BitwiseOp::Xor => yi.xor(zi),
        BitwiseOp::Shl => yi.shl(zi),
        BitwiseOp::LShr => yi.lshr(zi),
        BitwiseOp::AShr => yi.ashr(zi),
    }
}

fn apply_div_itv(op: DivOp, yi: &Interval, zi: &Interval) -> Interval {
    match op {
        DivOp::UDiv => yi.udiv(zi),
        DivOp::SRem => yi.srem(zi),
        DivOp::URem => yi.urem(zi),
        DivOp::SDiv => unreachable!("signed division takes the arithmetic path"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::domain_traits::{entail, intersect};
    use crate::variable::{VarType, VariableFactory};

    type Oct = SplitOctagon<DefaultParams>;

    fn var(vfac: &VariableFactory, name: &str) -> Variable {
        vfac.get(name, VarType::Int(32))
    }

    fn expr(v: &Variable) -> LinearExpression {
        LinearExpression::variable(v.clone())
    }

    fn cst(k: i64) -> LinearExpression {
        LinearExpression::from(k)
    }

    // v <= k
    fn leq_k(v: &Variable, k: i64) -> LinearConstraint {
        LinearConstraint::LessEq(expr(v) - Integer::from(k))
    }

    // v >= k
    fn geq_k(v: &Variable, k: i64) -> LinearConstraint {
        LinearConstraint::LessEq(cst(k) - v.clone())
    }

    fn eq_k(v: &Variable, k: i64) -> LinearConstraint {
        LinearConstraint::Equality(expr(v) - Integer::from(k))
    }

    fn neq_k(v: &Variable, k: i64) -> LinearConstraint {
        LinearConstraint::Inequality(expr(v) - Integer::from(k))
    }

    fn itv(lo: i64, hi: i64) -> Interval {
        Interval::new(Bound::from(lo), Bound::from(hi))
    }

    fn assert_same(a: &Oct, b: &Oct) {
        assert!(a.leq(b) && b.leq(a), "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_assign_and_interval() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut oct = Oct::top();
        oct.assign(&x, &cst(5));
        assert_eq!(oct.get_interval(&x), itv(5, 5));
        oct.assign(&y, &(expr(&x) + Integer::from(3)));
        assert_eq!(oct.get_interval(&y), itv(8, 8));
        // y tracks x relationally
        assert!(entail(&oct, &LinearConstraint::Equality(
            expr(&y) - x.clone() - Integer::from(3),
        )));
    }

    #[test]
    fn test_add_constraints_and_bottom() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 0));
        oct.add_constraint(&leq_k(&x, 10));
        assert_eq!(oct.get_interval(&x), itv(0, 10));
        oct.add_constraint(&geq_k(&x, 11));
        assert!(oct.is_bottom());
    }

    #[test]
    fn test_relational_closure() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let z = var(&vfac, "z");
        let mut oct = Oct::top();
        // y - x <= 1, z - y <= 2, x = 0
        oct.add_constraint(&LinearConstraint::LessEq(expr(&y) - x.clone() - Integer::from(1)));
        oct.add_constraint(&LinearConstraint::LessEq(expr(&z) - y.clone() - Integer::from(2)));
        oct.add_constraint(&eq_k(&x, 0));
        // z - x <= 3 by transitivity
        assert!(entail(&oct, &LinearConstraint::LessEq(
            expr(&z) - x.clone() - Integer::from(3),
        )));
        assert!(entail(&oct, &leq_k(&z, 3)));
        assert!(!entail(&oct, &leq_k(&z, 2)));
    }

    #[test]
    fn test_sum_constraints() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut oct = Oct::top();
        // x + y <= 10, x >= 4
        oct.add_constraint(&LinearConstraint::LessEq(
            expr(&x) + y.clone() - Integer::from(10),
        ));
        oct.add_constraint(&geq_k(&x, 4));
        assert!(entail(&oct, &leq_k(&y, 6)));
    }

    #[test]
    fn test_lattice_laws() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut s1 = Oct::top();
        s1.add_constraint(&geq_k(&x, 0));
        s1.add_constraint(&leq_k(&x, 5));
        s1.add_constraint(&LinearConstraint::LessEq(expr(&y) - x.clone() - Integer::from(3)));
        let mut s2 = Oct::top();
        s2.add_constraint(&geq_k(&x, 2));
        s2.add_constraint(&leq_k(&x, 10));
        // y - x <= -2, so the relation is materialized in both operands
        s2.add_constraint(&LinearConstraint::LessEq(
            expr(&y) - x.clone() + Integer::from(2),
        ));
        s2.add_constraint(&geq_k(&y, 0));

        // idempotence
        assert_same(&s1.lub(&s1.clone()), &s1);
        assert_same(&s1.meet(&s1.clone()), &s1);
        // commutativity
        assert_same(&s1.lub(&s2), &s2.lub(&s1));
        assert_same(&s1.meet(&s2), &s2.meet(&s1));
        // join is an upper bound, meet a lower bound
        assert!(s1.leq(&s1.lub(&s2)));
        assert!(s2.leq(&s1.lub(&s2)));
        assert!(s1.meet(&s2).leq(&s1));
        assert!(s1.meet(&s2).leq(&s2));
        // absorption with top and bottom
        let top = Oct::top();
        let bot = Oct::bottom();
        assert_same(&s1.lub(&bot), &s1);
        assert_same(&s1.meet(&top), &s1);
        assert!(s1.lub(&top).is_top());
        assert!(s1.meet(&bot).is_bottom());
        assert!(bot.leq(&s1));
        assert!(s1.leq(&top));
    }

    #[test]
    fn test_monotone_assign() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut small = Oct::top();
        small.add_constraint(&geq_k(&x, 0));
        small.add_constraint(&leq_k(&x, 3));
        let mut big = Oct::top();
        big.add_constraint(&geq_k(&x, 0));
        big.add_constraint(&leq_k(&x, 10));
        assert!(small.leq(&big));
        let e = expr(&x) + Integer::from(1);
        small.assign(&y, &e);
        big.assign(&y, &e);
        assert!(small.leq(&big));
    }

    #[test]
    fn test_join_preserves_relations() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut a = Oct::top();
        a.add_constraint(&eq_k(&x, 0));
        a.add_constraint(&LinearConstraint::Equality(expr(&y) - x.clone()));
        let mut b = Oct::top();
        b.add_constraint(&eq_k(&x, 5));
        b.add_constraint(&LinearConstraint::Equality(expr(&y) - x.clone()));
        let j = a.lub(&b);
        // y == x holds in both operands
        assert!(entail(&j, &LinearConstraint::LessEq(expr(&y) - x.clone())));
        assert!(entail(&j, &LinearConstraint::LessEq(expr(&x) - y.clone())));
        assert_eq!(j.get_interval(&x), itv(0, 5));
    }

    #[test]
    fn test_join_bound_products() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        // two boxes on the line x + y == 200
        let mut a = Oct::top();
        a.add_constraint(&eq_k(&x, 0));
        a.add_constraint(&eq_k(&y, 200));
        let mut b = Oct::top();
        b.add_constraint(&eq_k(&x, 1));
        b.add_constraint(&eq_k(&y, 198));
        let j = a.lub(&b);
        // the sum product recovers x + y <= 200
        assert!(entail(&j, &LinearConstraint::LessEq(
            expr(&x) + y.clone() - Integer::from(200),
        )));
    }

    #[test]
    fn test_widening_termination() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let mut head = Oct::top();
        head.assign(&x, &cst(0));
        let mut steps = 0;
        loop {
            let mut body = head.clone();
            body.add_constraint(&leq_k(&x, 1_000_000));
            body.assign(&x, &(expr(&x) + Integer::from(1)));
            let joined = head.lub(&body);
            let next = head.widening_with(&joined);
            steps += 1;
            assert!(steps < 10, "widening chain did not stabilize");
            if next.leq(&head) {
                break;
            }
            head = next;
        }
    }

    #[test]
    fn test_coherence_and_potential_invariants() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let z = var(&vfac, "z");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 0));
        oct.add_constraint(&leq_k(&x, 9));
        oct.add_constraint(&LinearConstraint::LessEq(expr(&y) - x.clone() - Integer::from(2)));
        oct.add_constraint(&LinearConstraint::LessEq(
            expr(&z) + y.clone() - Integer::from(7),
        ));
        oct.normalize();
        oct.with_state(|s| {
            assert!(s.check_coherence());
            assert!(s.check_potential());
        });
    }

    #[test]
    fn test_scenario_simple_loop_bound() {
        let vfac = VariableFactory::new();
        let i = var(&vfac, "i");
        let thresholds = [Integer::from(100)];

        let mut entry = Oct::top();
        entry.assign(&i, &cst(0));
        let mut head = entry.clone();
        let mut steps = 0;
        loop {
            let mut body = head.clone();
            body.add_constraint(&leq_k(&i, 99));
            body.assign(&i, &(expr(&i) + Integer::from(1)));
            let joined = head.lub(&body);
            let next = head.widening_with_thresholds(&joined, &thresholds);
            steps += 1;
            assert!(steps < 20, "loop head did not stabilize");
            if next.leq(&head) {
                break;
            }
            head = next;
        }
        assert_eq!(head.get_interval(&i), itv(0, 100));

        let mut exit = head.clone();
        exit.add_constraint(&geq_k(&i, 100));
        assert!(entail(&exit, &eq_k(&i, 100)));
    }

    #[test]
    fn test_scenario_two_variable_coupling() {
        let vfac = VariableFactory::new();
        let k = var(&vfac, "k");
        let n = var(&vfac, "n");
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let t = var(&vfac, "t");

        let mut entry = Oct::top();
        entry.assign(&k, &cst(200));
        entry.assign(&n, &cst(100));
        entry.assign(&x, &cst(0));
        entry.assign(&y, &expr(&k));

        // exact fixpoint, no widening
        let mut head = entry.clone();
        let mut steps = 0;
        loop {
            let mut body = head.clone();
            // x <= n - 1
            body.add_constraint(&LinearConstraint::LessEq(
                expr(&x) - n.clone() + Integer::from(1),
            ));
            if body.is_bottom() {
                break;
            }
            body.assign(&x, &(expr(&x) + Integer::from(1)));
            body.assign(&t, &(expr(&x) * Integer::from(2)));
            body.assign(&y, &(expr(&k) - t.clone()));
            let next = head.lub(&body);
            if next.leq(&head) {
                break;
            }
            head = next;
            steps += 1;
            assert!(steps < 200, "loop did not converge");
        }

        let mut exit = head.clone();
        exit.add_constraint(&LinearConstraint::LessEq(expr(&n) - x.clone()));
        assert!(!exit.is_bottom());
        // x + y <= k at the loop exit
        assert!(entail(&exit, &LinearConstraint::LessEq(
            expr(&x) + y.clone() - k.clone(),
        )));
    }

    #[test]
    fn test_scenario_disequation_trimming() {
        let vfac = VariableFactory::new();
        let i = var(&vfac, "i");

        let mut entry = Oct::top();
        entry.assign(&i, &cst(0));
        let mut head = entry.clone();
        let mut steps = 0;
        loop {
            let mut body = head.clone();
            body.add_constraint(&neq_k(&i, 9));
            body.assign(&i, &(expr(&i) + Integer::from(1)));
            let next = head.lub(&body);
            if next.leq(&head) {
                break;
            }
            head = next;
            steps += 1;
            // convergence relies on trimming the interval at i != 9
            assert!(steps < 30, "disequation did not bound the loop");
        }
        assert_eq!(head.get_interval(&i), itv(0, 9));

        let mut exit = head.clone();
        exit.add_constraint(&eq_k(&i, 9));
        assert!(!exit.is_bottom());
        assert!(entail(&exit, &eq_k(&i, 9)));
    }

    #[test]
    fn test_extract_and_active_variables() {
        use crate::domains::domain_traits::extract;
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let z = var(&vfac, "z");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 0));
        oct.add_constraint(&leq_k(&x, 5));
        oct.add_constraint(&eq_k(&z, 1));
        oct.add_constraint(&LinearConstraint::LessEq(expr(&y) - x.clone()));
        let mut csts = LinearConstraintSystem::default();
        extract(&oct, &x, &mut csts, false);
        assert!(csts.size() >= 3);
        for cst in &csts {
            assert!(cst.variables().iter().any(|v| *v == x));
        }
        let active = oct.active_variables();
        assert_eq!(active.len(), 3);
        assert!(active.contains(&x) && active.contains(&y) && active.contains(&z));
    }

    #[test]
    fn test_forget_and_project() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let z = var(&vfac, "z");
        let mut oct = Oct::top();
        oct.add_constraint(&eq_k(&x, 1));
        oct.add_constraint(&eq_k(&y, 2));
        oct.add_constraint(&eq_k(&z, 3));
        oct.forget(&y);
        assert!(oct.get_interval(&y).is_top());
        assert_eq!(oct.get_interval(&x), itv(1, 1));
        oct.project(&[x.clone()]);
        assert!(oct.get_interval(&z).is_top());
        assert_eq!(oct.get_interval(&x), itv(1, 1));
    }

    #[test]
    fn test_expand() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let x2 = var(&vfac, "x_copy");
        let z = var(&vfac, "z");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 1));
        oct.add_constraint(&leq_k(&x, 2));
        oct.add_constraint(&LinearConstraint::LessEq(expr(&x) - z.clone()));
        oct.expand(&x, &x2);
        assert_eq!(oct.get_interval(&x2), itv(1, 2));
        // the copy inherits relations to other variables
        assert!(entail(&oct, &LinearConstraint::LessEq(expr(&x2) - z.clone())));
        // but no relation to the original: constraining x leaves x2 alone
        oct.add_constraint(&eq_k(&x, 1));
        assert_eq!(oct.get_interval(&x2), itv(1, 2));
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn test_expand_existing_target() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut oct = Oct::top();
        oct.add_constraint(&eq_k(&x, 1));
        oct.add_constraint(&eq_k(&y, 1));
        oct.expand(&x, &y);
    }

    #[test]
    fn test_rename() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let x2 = var(&vfac, "x_new");
        let mut oct = Oct::top();
        oct.add_constraint(&eq_k(&x, 7));
        oct.rename(&[x.clone()], &[x2.clone()]);
        assert_eq!(oct.get_interval(&x2), itv(7, 7));
        assert!(oct.get_interval(&x).is_top());
    }

    #[test]
    fn test_is_unsat() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 0));
        oct.add_constraint(&leq_k(&x, 5));
        oct.add_constraint(&eq_k(&y, 0));
        // x >= 10 contradicts x <= 5
        assert!(oct.is_unsat(&geq_k(&x, 10)));
        assert!(!oct.is_unsat(&leq_k(&x, 3)));
        // x - y <= -1 means x <= -1
        assert!(oct.is_unsat(&LinearConstraint::LessEq(
            expr(&x) - y.clone() + Integer::from(1),
        )));
    }

    #[test]
    fn test_entail_and_intersect() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 3));
        oct.add_constraint(&leq_k(&x, 7));
        assert!(entail(&oct, &geq_k(&x, 0)));
        assert!(entail(&oct, &leq_k(&x, 7)));
        assert!(!entail(&oct, &leq_k(&x, 6)));
        assert!(!entail(&oct, &eq_k(&x, 3)));
        assert!(intersect(&oct, &eq_k(&x, 5)));
        assert!(!intersect(&oct, &eq_k(&x, 11)));
    }

    #[test]
    fn test_backward_assign() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        // post-state of x := y + 1 with x == 5
        let mut post = Oct::top();
        post.add_constraint(&eq_k(&x, 5));
        let pre_inv = Oct::top();
        post.backward_assign(&x, &(expr(&y) + Integer::from(1)), &pre_inv);
        assert_eq!(post.get_interval(&y), itv(4, 4));
        assert!(post.get_interval(&x).is_top());
    }

    #[test]
    fn test_serialization() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 0));
        oct.add_constraint(&leq_k(&x, 5));
        oct.add_constraint(&LinearConstraint::LessEq(expr(&y) - x.clone() - Integer::from(3)));
        let csts = oct.to_linear_constraint_system();
        assert!(csts.size() >= 3);
        // a fresh octagon constrained by the output entails the original bounds
        let mut back = Oct::top();
        back.add_constraints(&csts);
        assert!(entail(&back, &leq_k(&x, 5)));
        assert!(entail(&back, &LinearConstraint::LessEq(
            expr(&y) - x.clone() - Integer::from(3),
        )));

        let dis = oct.to_disjunctive_linear_constraint_system();
        assert_eq!(dis.size(), 1);
    }

    #[test]
    fn test_debug_output() {
        let bot = Oct::bottom();
        assert_eq!(format!("{:?}", bot), "_|_");
        let top = Oct::top();
        assert_eq!(format!("{:?}", top), "{}");
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let mut oct = Oct::top();
        oct.add_constraint(&geq_k(&x, 0));
        oct.add_constraint(&leq_k(&x, 2));
        let s = format!("{:?}", oct);
        assert!(s.starts_with('{') && s.ends_with('}'));
        assert!(s.contains("x -> [0, 2]"));
    }

    #[test]
    fn test_simple_params_agree() {
        type SOct = SplitOctagon<crate::option::SimpleParams>;
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let y = var(&vfac, "y");
        let mut a = SOct::top();
        a.add_constraint(&geq_k(&x, 0));
        a.add_constraint(&leq_k(&x, 5));
        a.assign(&y, &(expr(&x) + Integer::from(2)));
        assert_eq!(a.get_interval(&y), itv(2, 7));
        let mut b = a.clone();
        b.add_constraint(&leq_k(&y, 4));
        assert_eq!(b.get_interval(&x), itv(0, 2));
        // the original is untouched by the copy's mutation
        assert_eq!(a.get_interval(&x), itv(0, 5));
    }

    #[test]
    fn test_copy_on_write_aliasing() {
        let vfac = VariableFactory::new();
        let x = var(&vfac, "x");
        let mut a = Oct::top();
        a.add_constraint(&eq_k(&x, 1));
        let b = a.clone();
        a.add_constraint(&eq_k(&x, 2));
        assert!(a.is_bottom());
        assert_eq!(b.get_interval(&x), itv(1, 1));
    }
}
