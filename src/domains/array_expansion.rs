use crate::domains::domain_traits::{ArrayDomain, NumericalDomain};
use crate::domains::interval::Interval;
use crate::domains::lattice::LatticeTrait;
use crate::domains::linear_constraint::{
    DisjunctiveLinearConstraintSystem, LinearConstraint, LinearConstraintSystem, LinearExpression,
};
use crate::domains::op::{ArithOp, BitwiseOp, BoolOp, ConvOp, DivOp};
use crate::domains::patricia_tree::{BinaryOp, PartialOrderOp, PatriciaTree};
use crate::option::DEFAULT_MAX_INIT_SIZE;
use crate::variable::{VarType, Variable, VariableFactory};
use rug::Integer;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Mutex;

lazy_static! {
    /// Process-wide memoization of cell scalar indices: the same
    /// `(array, offset, size)` triple resolves to the same index in every
    /// state of every analysis in this process.
    static ref CELL_INDEX_MAP: Mutex<HashMap<(String, u64, u32), usize>> =
        Mutex::new(HashMap::new());
}

fn cell_scalar_index(a: &Variable, offset: u64, size: u32) -> usize {
    let mut map = CELL_INDEX_MAP.lock().unwrap();
    let next = map.len();
    *map.entry((a.name().to_string(), offset, size)).or_insert(next)
}

/// A sequence of `size` consecutive bytes of some array starting at
/// `offset`, abstracted by one scalar variable. The scalar is absent only
/// on the temporary probe cells of the overlap query; equality and ordering
/// ignore it.
#[derive(Clone)]
pub struct Cell {
    offset: u64,
    size: u32,
    scalar: Option<Variable>,
}

impl Cell {
    fn new(offset: u64, size: u32, scalar: Option<Variable>) -> Self {
        Cell {
            offset,
            size,
            scalar,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn has_scalar(&self) -> bool {
        self.scalar.is_some()
    }

    pub fn scalar(&self) -> Variable {
        match &self.scalar {
            Some(v) => v.clone(),
            None => panic!("cannot get the scalar of an undefined cell"),
        }
    }

    fn last_byte(&self) -> u64 {
        self.offset + self.size as u64 - 1
    }

    /// Byte-interval intersection test
    pub fn overlap(&self, offset: u64, size: u32) -> bool {
        debug_assert!(size > 0);
        let last = offset + size as u64 - 1;
        self.offset.max(offset) <= self.last_byte().min(last)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.size == other.size
    }
}

impl Eq for Cell {}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.offset, self.size).cmp(&(other.offset, other.size))
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] -> ", self.offset, self.last_byte())?;
        match &self.scalar {
            Some(v) => write!(f, "{:?}", v),
            None => write!(f, "_"),
        }
    }
}

type CellSet = BTreeSet<Cell>;

struct JoinOp;

impl BinaryOp<CellSet> for JoinOp {
    fn apply(&self, x: &CellSet, y: &CellSet) -> Option<CellSet> {
        Some(x.union(y).cloned().collect())
    }
    // keys missing on one side are kept
    fn default_is_absorbing(&self) -> bool {
        false
    }
}

struct MeetOp;

impl BinaryOp<CellSet> for MeetOp {
    fn apply(&self, x: &CellSet, y: &CellSet) -> Option<CellSet> {
        let r: CellSet = x.intersection(y).cloned().collect();
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }
    // keys missing on one side are dropped
    fn default_is_absorbing(&self) -> bool {
        true
    }
}

struct InclusionPo;

impl PartialOrderOp<CellSet> for InclusionPo {
    fn leq(&self, x: &CellSet, y: &CellSet) -> bool {
        x.is_subset(y)
    }
    // a missing key means the empty cell set
    fn default_is_top(&self) -> bool {
        false
    }
}

/// Map from offsets to the cells starting there (same start, different
/// sizes). Keys are traversed in big-endian order, so the range walks of
/// the overlap query see sorted offsets.
#[derive(Clone, Default)]
pub struct OffsetMap {
    map: PatriciaTree<CellSet>,
}

impl OffsetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of distinct offsets
    pub fn size(&self) -> usize {
        self.map.size()
    }

    fn remove_cell(&mut self, c: &Cell) {
        if let Some(cells) = self.map.lookup(c.offset) {
            let mut cells = cells.clone();
            if cells.remove(c) {
                self.map.remove(c.offset);
                if !cells.is_empty() {
                    self.map.insert(c.offset, cells);
                }
            }
        }
    }

    fn insert_cell(&mut self, c: Cell, sanity_check: bool) {
        if sanity_check && !c.has_scalar() {
            panic!("array expansion cannot insert a cell without a scalar variable");
        }
        match self.map.lookup(c.offset) {
            Some(cells) => {
                let mut cells = cells.clone();
                if cells.insert(c.clone()) {
                    self.map.insert(c.offset, cells);
                }
            }
            None => {
                let mut cells = CellSet::new();
                let offset = c.offset;
                cells.insert(c);
                self.map.insert(offset, cells);
            }
        }
    }

    pub fn get_cell(&self, offset: u64, size: u32) -> Option<Cell> {
        let probe = Cell::new(offset, size, None);
        self.map
            .lookup(offset)
            .and_then(|cells| cells.get(&probe).cloned())
    }

    fn mk_scalar_name(a: &Variable, offset: u64, size: u32) -> String {
        if size == 1 {
            format!("{}[{}]", a.name(), offset)
        } else {
            format!("{}[{}...{}]", a.name(), offset, offset + size as u64 - 1)
        }
    }

    /// Find or create the cell `(offset, size)` of `a`. The scalar identity
    /// comes from the process-wide index map, so equal cells in different
    /// states share it.
    fn mk_cell(&mut self, vfac: &VariableFactory, a: &Variable, offset: u64, size: u32) -> Cell {
        if let Some(c) = self.get_cell(offset, size) {
            if !c.has_scalar() {
                panic!("array expansion found a cell without a scalar");
            }
            return c;
        }
        let vname = Self::mk_scalar_name(a, offset, size);
        let vtype = a
            .vtype()
            .element_type()
            .unwrap_or_else(|| panic!("{:?} is not an array variable", a));
        let vindex = cell_scalar_index(a, offset, size);
        let scalar = vfac.get_indexed(&vname, vtype, vindex);
        let c = Cell::new(offset, size, Some(scalar));
        self.insert_cell(c.clone(), true);
        debug!("created cell {:?}", c);
        c
    }

    /// All cells that may overlap `(offset, size)`, except the exact match.
    /// Walks backward then forward from the target offset through the
    /// sorted bindings and stops at the first bucket with no overlapping
    /// cell; finally sweeps the cells starting exactly at `offset`.
    pub fn get_overlap_cells(&self, offset: u64, size: u32) -> Vec<Cell> {
        let mut out: Vec<Cell> = Vec::new();
        let exact = Cell::new(offset, size, None);
        let bindings: Vec<(u64, &CellSet)> = self.map.iter().collect();
        let lb = bindings.partition_point(|(o, _)| *o < offset);

        let mut push = |out: &mut Vec<Cell>, c: &Cell| {
            if *c != exact && !out.contains(c) {
                out.push(c.clone());
            }
        };

        // below the target offset
        for i in (0..lb).rev() {
            let mut any = false;
            for c in bindings[i].1 {
                if c.overlap(offset, size) {
                    push(&mut out, c);
                    any = true;
                }
            }
            if !any {
                break;
            }
        }
        // above it
        let mut ub = lb;
        if ub < bindings.len() && bindings[ub].0 == offset {
            ub += 1;
        }
        for binding in bindings.iter().skip(ub) {
            let mut any = false;
            for c in binding.1 {
                if c.overlap(offset, size) {
                    push(&mut out, c);
                    any = true;
                }
            }
            if !any {
                break;
            }
        }
        // cells at the target offset itself, any size
        if let Some(cells) = self.map.lookup(offset) {
            for c in cells {
                if c.overlap(offset, size) {
                    push(&mut out, c);
                }
            }
        }
        out
    }

    pub fn join(&self, other: &OffsetMap) -> OffsetMap {
        let mut map = self.map.clone();
        map.merge_with(&other.map, &JoinOp);
        OffsetMap { map }
    }

    pub fn meet(&self, other: &OffsetMap) -> OffsetMap {
        let mut map = self.map.clone();
        map.merge_with(&other.map, &MeetOp);
        OffsetMap { map }
    }

    pub fn leq(&self, other: &OffsetMap) -> bool {
        self.map.leq(&other.map, &InclusionPo)
    }
}

impl fmt::Debug for OffsetMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.map.is_empty() {
            return write!(f, "empty");
        }
        for (_, cells) in self.map.iter() {
            write!(f, "{{")?;
            for (i, c) in cells.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{:?}", c)?;
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

/// Array lifter that materializes one scalar per accessed `(offset, size)`
/// region. Precise for constant indices; overlapping reads degrade to top
/// and overlapping writes conservatively kill the cells they touch.
pub struct ArrayExpansion<D: NumericalDomain> {
    array_map: BTreeMap<Variable, OffsetMap>,
    inv: D,
    vfac: VariableFactory,
    max_init_size: u64,
}

impl<D: NumericalDomain> Clone for ArrayExpansion<D> {
    fn clone(&self) -> Self {
        ArrayExpansion {
            array_map: self.array_map.clone(),
            inv: self.inv.clone(),
            vfac: self.vfac.clone(),
            max_init_size: self.max_init_size,
        }
    }
}

impl<D: NumericalDomain> fmt::Debug for ArrayExpansion<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.inv)
    }
}

impl<D: NumericalDomain> ArrayExpansion<D> {
    pub fn new(vfac: VariableFactory) -> Self {
        ArrayExpansion {
            array_map: BTreeMap::new(),
            inv: D::top(),
            vfac,
            max_init_size: DEFAULT_MAX_INIT_SIZE,
        }
    }

    pub fn with_max_init_size(vfac: VariableFactory, max_init_size: u64) -> Self {
        ArrayExpansion {
            max_init_size,
            ..Self::new(vfac)
        }
    }

    pub fn get_content_domain(&self) -> &D {
        &self.inv
    }

    pub fn offset_map(&self, a: &Variable) -> Option<&OffsetMap> {
        self.array_map.get(a)
    }

    fn to_interval(&self, e: &LinearExpression) -> Interval {
        e.eval(|v| self.inv.get_interval(v))
    }

    fn singleton_u64(&self, e: &LinearExpression) -> Option<u64> {
        self.to_interval(e).singleton().and_then(|n| n.to_u64())
    }

    fn assign_cell(&mut self, lhs: &Variable, rhs: &Variable, elem_ty: VarType) {
        match elem_ty {
            VarType::Bool => self.inv.assign_bool_var(lhs, rhs, false),
            VarType::Ptr => self
                .inv
                .pointer_assign(lhs, rhs, &LinearExpression::from(0)),
            _ => {
                let e = LinearExpression::variable(rhs.clone());
                self.inv.assign(lhs, &e);
            }
        }
    }

    fn store_cell(&mut self, scalar: &Variable, val: &LinearExpression, elem_ty: VarType) {
        match elem_ty {
            VarType::Bool => {
                if val.is_constant() {
                    let cst = if val.constant() >= 1 {
                        LinearConstraint::new_true()
                    } else {
                        LinearConstraint::new_false()
                    };
                    self.inv.assign_bool_cst(scalar, &cst);
                } else if let Some(v) = val.get_variable() {
                    self.inv.assign_bool_var(scalar, &v, false);
                }
            }
            VarType::Ptr => {
                if val.is_constant() && val.constant() == 0 {
                    self.inv.pointer_mk_null(scalar);
                } else if let Some(v) = val.get_variable() {
                    self.inv
                        .pointer_assign(scalar, &v, &LinearExpression::from(0));
                }
            }
            _ => self.inv.assign(scalar, val),
        }
    }

    fn join_array_maps(
        a: &BTreeMap<Variable, OffsetMap>,
        b: &BTreeMap<Variable, OffsetMap>,
    ) -> BTreeMap<Variable, OffsetMap> {
        let mut out = a.clone();
        for (var, m) in b {
            match out.get_mut(var) {
                Some(cur) => *cur = cur.join(m),
                None => {
                    out.insert(var.clone(), m.clone());
                }
            }
        }
        out
    }

    fn meet_array_maps(
        a: &BTreeMap<Variable, OffsetMap>,
        b: &BTreeMap<Variable, OffsetMap>,
    ) -> BTreeMap<Variable, OffsetMap> {
        let mut out = BTreeMap::new();
        for (var, m) in a {
            if let Some(other) = b.get(var) {
                out.insert(var.clone(), m.meet(other));
            }
        }
        out
    }
}

impl<D: NumericalDomain> LatticeTrait for ArrayExpansion<D> {
    fn top() -> Self {
        Self::new(VariableFactory::default())
    }

    fn is_top(&self) -> bool {
        self.inv.is_top()
    }

    fn set_to_top(&mut self) {
        self.array_map.clear();
        self.inv.set_to_top();
    }

    fn bottom() -> Self {
        let mut s = Self::new(VariableFactory::default());
        s.inv.set_to_bottom();
        s
    }

    fn is_bottom(&self) -> bool {
        self.inv.is_bottom()
    }

    fn set_to_bottom(&mut self) {
        self.array_map.clear();
        self.inv.set_to_bottom();
    }

    fn lub(&self, other: &Self) -> Self {
        ArrayExpansion {
            array_map: Self::join_array_maps(&self.array_map, &other.array_map),
            inv: self.inv.lub(&other.inv),
            vfac: self.vfac.clone(),
            max_init_size: self.max_init_size,
        }
    }

    fn widening_with(&self, other: &Self) -> Self {
        ArrayExpansion {
            array_map: Self::join_array_maps(&self.array_map, &other.array_map),
            inv: self.inv.widening_with(&other.inv),
            vfac: self.vfac.clone(),
            max_init_size: self.max_init_size,
        }
    }
}

impl<D: NumericalDomain> NumericalDomain for ArrayExpansion<D> {
    fn leq(&self, other: &Self) -> bool {
        self.inv.leq(&other.inv)
    }

    fn meet(&self, other: &Self) -> Self {
        ArrayExpansion {
            array_map: Self::meet_array_maps(&self.array_map, &other.array_map),
            inv: self.inv.meet(&other.inv),
            vfac: self.vfac.clone(),
            max_init_size: self.max_init_size,
        }
    }

    fn narrowing_with(&self, other: &Self) -> Self {
        ArrayExpansion {
            array_map: Self::meet_array_maps(&self.array_map, &other.array_map),
            inv: self.inv.narrowing_with(&other.inv),
            vfac: self.vfac.clone(),
            max_init_size: self.max_init_size,
        }
    }

    fn widening_with_thresholds(&self, other: &Self, thresholds: &[Integer]) -> Self {
        ArrayExpansion {
            array_map: Self::join_array_maps(&self.array_map, &other.array_map),
            inv: self.inv.widening_with_thresholds(&other.inv, thresholds),
            vfac: self.vfac.clone(),
            max_init_size: self.max_init_size,
        }
    }

    fn normalize(&mut self) {
        self.inv.normalize();
    }

    fn assign(&mut self, x: &Variable, e: &LinearExpression) {
        self.inv.assign(x, e);
    }

    fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Variable) {
        self.inv.apply(op, x, y, z);
    }

    fn apply_num(&mut self, op: ArithOp, x: &Variable, y: &Variable, k: &Integer) {
        self.inv.apply_num(op, x, y, k);
    }

    fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Variable) {
        self.inv.apply_bitwise(op, x, y, z);
    }

    fn apply_bitwise_num(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, k: &Integer) {
        self.inv.apply_bitwise_num(op, x, y, k);
    }

    fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Variable) {
        self.inv.apply_div(op, x, y, z);
    }

    fn apply_div_num(&mut self, op: DivOp, x: &Variable, y: &Variable, k: &Integer) {
        self.inv.apply_div_num(op, x, y, k);
    }

    fn apply_conv(&mut self, op: ConvOp, dst: &Variable, src: &Variable) {
        self.inv.apply_conv(op, dst, src);
    }

    fn backward_assign(&mut self, x: &Variable, e: &LinearExpression, inv: &Self) {
        self.inv.backward_assign(x, e, &inv.inv);
    }

    fn backward_apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Variable, inv: &Self) {
        self.inv.backward_apply(op, x, y, z, &inv.inv);
    }

    fn backward_apply_num(
        &mut self,
        op: ArithOp,
        x: &Variable,
        y: &Variable,
        k: &Integer,
        inv: &Self,
    ) {
        self.inv.backward_apply_num(op, x, y, k, &inv.inv);
    }

    fn assign_bool_cst(&mut self, lhs: &Variable, rhs: &LinearConstraint) {
        self.inv.assign_bool_cst(lhs, rhs);
    }

    fn assign_bool_var(&mut self, lhs: &Variable, rhs: &Variable, is_not_rhs: bool) {
        self.inv.assign_bool_var(lhs, rhs, is_not_rhs);
    }

    fn apply_binary_bool(&mut self, op: BoolOp, x: &Variable, y: &Variable, z: &Variable) {
        self.inv.apply_binary_bool(op, x, y, z);
    }

    fn assume_bool(&mut self, v: &Variable, is_negated: bool) {
        self.inv.assume_bool(v, is_negated);
    }

    fn pointer_assign(&mut self, lhs: &Variable, rhs: &Variable, offset: &LinearExpression) {
        self.inv.pointer_assign(lhs, rhs, offset);
    }

    fn pointer_mk_null(&mut self, lhs: &Variable) {
        self.inv.pointer_mk_null(lhs);
    }

    fn add_constraint(&mut self, cst: &LinearConstraint) {
        self.inv.add_constraint(cst);
    }

    fn get_interval(&self, x: &Variable) -> Interval {
        self.inv.get_interval(x)
    }

    fn set(&mut self, x: &Variable, intv: Interval) {
        self.inv.set(x, intv);
    }

    fn forget(&mut self, x: &Variable) {
        if x.is_array() {
            self.array_map.remove(x);
        } else {
            self.inv.forget(x);
        }
    }

    fn project(&mut self, vars: &[Variable]) {
        for v in vars {
            if v.is_array() {
                warn!("array expansion cannot project onto the array variable {:?}", v);
            }
        }
        let scalars: Vec<Variable> = vars.iter().filter(|v| !v.is_array()).cloned().collect();
        self.inv.project(&scalars);
    }

    fn expand(&mut self, x: &Variable, new_x: &Variable) {
        if x.is_array() {
            warn!("array expansion cannot expand the array variable {:?}", x);
            return;
        }
        self.inv.expand(x, new_x);
    }

    fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        for v in from {
            if v.is_array() {
                warn!("array expansion cannot rename the array variable {:?}", v);
            }
        }
        self.inv.rename(from, to);
    }

    fn to_linear_constraint_system(&self) -> LinearConstraintSystem {
        self.inv.to_linear_constraint_system()
    }

    fn to_disjunctive_linear_constraint_system(&self) -> DisjunctiveLinearConstraintSystem {
        self.inv.to_disjunctive_linear_constraint_system()
    }
}

impl<D: NumericalDomain> ArrayDomain for ArrayExpansion<D> {
    fn array_init(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpression,
        lb: &LinearExpression,
        ub: &LinearExpression,
        val: &LinearExpression,
    ) {
        if self.is_bottom() {
            return;
        }
        let lb = match self.singleton_u64(lb) {
            Some(n) => n,
            None => {
                warn!("array expansion initialization ignored: lower bound is not constant");
                return;
            }
        };
        let ub = match self.singleton_u64(ub) {
            Some(n) => n,
            None => {
                warn!("array expansion initialization ignored: upper bound is not constant");
                return;
            }
        };
        let n = match self.singleton_u64(elem_size) {
            Some(n) if n > 0 => n,
            _ => {
                warn!("array expansion initialization ignored: element size is not constant");
                return;
            }
        };
        if ub < lb || (ub - lb) % n != 0 {
            warn!(
                "array expansion initialization ignored: region size must be divisible by {}",
                n
            );
            return;
        }
        if ub - lb > self.max_init_size {
            warn!(
                "array expansion initialization ignored: region is larger than the limit of {}",
                self.max_init_size
            );
            return;
        }
        let mut i = lb;
        while i < ub {
            self.array_store(a, elem_size, &LinearExpression::from(i as i64), val, false);
            i += n;
        }
        debug!("{:?}[{}...{}] := {:?} -- {:?}", a, lb, ub, val, self);
    }

    fn array_load(
        &mut self,
        lhs: &Variable,
        a: &Variable,
        elem_size: &LinearExpression,
        i: &LinearExpression,
    ) {
        if self.is_bottom() {
            return;
        }
        let offset = match self.singleton_u64(i) {
            Some(o) => o,
            None => {
                warn!("array expansion ignored a read at the non-constant index {:?}", i);
                self.inv.forget(lhs);
                return;
            }
        };
        let size = match self.singleton_u64(elem_size) {
            Some(n) if n > 0 && n <= u32::max_value() as u64 => n as u32,
            _ => {
                warn!("array expansion ignored a read: element size is not constant");
                self.inv.forget(lhs);
                return;
            }
        };
        let mut offset_map = self.array_map.get(a).cloned().unwrap_or_default();
        let cells = offset_map.get_overlap_cells(offset, size);
        if !cells.is_empty() {
            warn!(
                "array expansion ignored a read from [{}...{}]: it overlaps with other cells",
                offset,
                offset + size as u64 - 1
            );
            self.inv.forget(lhs);
            return;
        }
        let c = offset_map.mk_cell(&self.vfac, a, offset, size);
        let elem_ty = a.vtype().element_type().expect("array variable expected");
        // The cell is not a summary, so a direct assignment is sound
        let scalar = c.scalar();
        self.assign_cell(lhs, &scalar, elem_ty);
        self.array_map.insert(a.clone(), offset_map);
        debug!("{:?} := {:?}[{:?}] -- {:?}", lhs, a, i, self);
    }

    fn array_store(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpression,
        i: &LinearExpression,
        val: &LinearExpression,
        _is_singleton: bool,
    ) {
        if self.is_bottom() {
            return;
        }
        let offset = match self.singleton_u64(i) {
            Some(o) => o,
            None => {
                warn!("array expansion ignored a write at the non-constant index {:?}", i);
                return;
            }
        };
        let size = match self.singleton_u64(elem_size) {
            Some(n) if n > 0 && n <= u32::max_value() as u64 => n as u32,
            _ => {
                warn!("array expansion ignored a write: element size is not constant");
                return;
            }
        };
        let mut offset_map = self.array_map.get(a).cloned().unwrap_or_default();

        // Kill the cells the write may touch; they are re-created on demand
        let cells = offset_map.get_overlap_cells(offset, size);
        if !cells.is_empty() {
            debug!(
                "array expansion killed {} cells overlapping with [{}...{}]",
                cells.len(),
                offset,
                offset + size as u64 - 1
            );
            for c in &cells {
                if c.has_scalar() {
                    self.inv.forget(&c.scalar());
                } else {
                    panic!("array expansion: cell without a scalar variable in a store");
                }
                offset_map.remove_cell(c);
            }
        }

        let c = offset_map.mk_cell(&self.vfac, a, offset, size);
        let elem_ty = a.vtype().element_type().expect("array variable expected");
        let scalar = c.scalar();
        self.store_cell(&scalar, val, elem_ty);
        self.array_map.insert(a.clone(), offset_map);
        debug!("{:?}[{:?}] := {:?} -- {:?}", a, i, val, self);
    }

    fn array_assign(&mut self, lhs: &Variable, rhs: &Variable) {
        let m = self.array_map.get(rhs).cloned().unwrap_or_default();
        self.array_map.insert(lhs.clone(), m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::interval::Bound;
    use crate::domains::split_octagon::SplitOctagon;
    use crate::option::DefaultParams;

    type Dom = ArrayExpansion<SplitOctagon<DefaultParams>>;

    fn itv(lo: i64, hi: i64) -> Interval {
        Interval::new(Bound::from(lo), Bound::from(hi))
    }

    fn e(k: i64) -> LinearExpression {
        LinearExpression::from(k)
    }

    fn init_zeroed(dom: &mut Dom, a: &Variable) {
        dom.array_init(a, &e(4), &e(0), &e(16), &e(0));
    }

    #[test]
    fn test_init_materializes_cells() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let x = vfac.get("x", VarType::Int(32));
        let mut dom = Dom::new(vfac);
        init_zeroed(&mut dom, &a);
        let m = dom.offset_map(&a).unwrap();
        assert_eq!(m.size(), 4);
        for o in &[0u64, 4, 8, 12] {
            assert!(m.get_cell(*o, 4).is_some());
        }
        dom.array_load(&x, &a, &e(4), &e(12));
        assert_eq!(dom.get_interval(&x), itv(0, 0));
    }

    #[test]
    fn test_strong_update_after_store() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let x = vfac.get("x", VarType::Int(32));
        let y = vfac.get("y", VarType::Int(32));
        let mut dom = Dom::new(vfac);
        init_zeroed(&mut dom, &a);
        dom.array_store(&a, &e(4), &e(8), &e(7), false);
        dom.array_load(&x, &a, &e(4), &e(8));
        assert_eq!(dom.get_interval(&x), itv(7, 7));
        dom.array_load(&y, &a, &e(4), &e(0));
        assert_eq!(dom.get_interval(&y), itv(0, 0));
    }

    #[test]
    fn test_overlapping_store_kills_cells() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let x = vfac.get("x", VarType::Int(32));
        let y = vfac.get("y", VarType::Int(32));
        let mut dom = Dom::new(vfac);
        init_zeroed(&mut dom, &a);
        // write bytes [6, 10): overlaps the cells at 4 and 8
        dom.array_store(&a, &e(4), &e(6), &e(5), false);
        let m = dom.offset_map(&a).unwrap();
        assert!(m.get_cell(4, 4).is_none());
        assert!(m.get_cell(8, 4).is_none());
        assert!(m.get_cell(6, 4).is_some());
        // a load over the killed region overlaps the new cell and degrades
        dom.array_load(&x, &a, &e(4), &e(8));
        assert!(dom.get_interval(&x).is_top());
        // untouched cells keep their value
        dom.array_load(&y, &a, &e(4), &e(0));
        assert_eq!(dom.get_interval(&y), itv(0, 0));
    }

    #[test]
    fn test_non_constant_index_degrades() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let i = vfac.get("i", VarType::Int(32));
        let x = vfac.get("x", VarType::Int(32));
        let mut dom = Dom::new(vfac);
        init_zeroed(&mut dom, &a);
        // i is unconstrained
        dom.array_load(&x, &a, &e(4), &LinearExpression::variable(i.clone()));
        assert!(dom.get_interval(&x).is_top());
        // a non-constant store leaves the cells alone
        dom.array_store(&a, &e(4), &LinearExpression::variable(i), &e(3), false);
        assert_eq!(dom.offset_map(&a).unwrap().size(), 4);
    }

    #[test]
    fn test_init_preconditions() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let mut dom = Dom::new(vfac.clone());
        // 10 is not divisible by 4
        dom.array_init(&a, &e(4), &e(0), &e(10), &e(0));
        assert!(dom.offset_map(&a).is_none());
        // too large
        let mut dom2 = Dom::with_max_init_size(vfac, 8);
        dom2.array_init(&a, &e(4), &e(0), &e(16), &e(0));
        assert!(dom2.offset_map(&a).is_none());
    }

    #[test]
    fn test_array_assign_copies_cells() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let b = vfac.get("b", VarType::ArrayInt(32));
        let x = vfac.get("x", VarType::Int(32));
        let mut dom = Dom::new(vfac);
        init_zeroed(&mut dom, &a);
        dom.array_store(&a, &e(4), &e(4), &e(9), false);
        dom.array_assign(&b, &a);
        dom.array_load(&x, &b, &e(4), &e(4));
        assert_eq!(dom.get_interval(&x), itv(9, 9));
    }

    #[test]
    fn test_cell_scalar_identity_is_process_wide() {
        let vfac1 = VariableFactory::new();
        let vfac2 = VariableFactory::new();
        let a1 = vfac1.get("arr_stable", VarType::ArrayInt(32));
        let a2 = vfac2.get("arr_stable", VarType::ArrayInt(32));
        let mut d1 = Dom::new(vfac1);
        let mut d2 = Dom::new(vfac2);
        d1.array_store(&a1, &e(4), &e(8), &e(1), false);
        d2.array_store(&a2, &e(4), &e(8), &e(2), false);
        let c1 = d1.offset_map(&a1).unwrap().get_cell(8, 4).unwrap();
        let c2 = d2.offset_map(&a2).unwrap().get_cell(8, 4).unwrap();
        assert_eq!(c1.scalar(), c2.scalar());
        assert_eq!(c1.scalar().index(), c2.scalar().index());
        assert_eq!(c1.scalar().name(), "arr_stable[8...11]");
    }

    #[test]
    fn test_join_keeps_common_cells() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let x = vfac.get("x", VarType::Int(32));
        let mut d1 = Dom::new(vfac.clone());
        let mut d2 = Dom::new(vfac);
        init_zeroed(&mut d1, &a);
        init_zeroed(&mut d2, &a);
        d1.array_store(&a, &e(4), &e(0), &e(1), false);
        d2.array_store(&a, &e(4), &e(0), &e(3), false);
        let mut j = d1.lub(&d2);
        assert_eq!(j.offset_map(&a).unwrap().size(), 4);
        j.array_load(&x, &a, &e(4), &e(0));
        assert_eq!(j.get_interval(&x), itv(1, 3));
    }

    #[test]
    fn test_overlap_query_walks_both_directions() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let mut m = OffsetMap::new();
        m.mk_cell(&vfac, &a, 0, 4);
        m.mk_cell(&vfac, &a, 4, 4);
        m.mk_cell(&vfac, &a, 4, 8);
        m.mk_cell(&vfac, &a, 12, 4);
        // target [6, 10) overlaps (4,4), (4,8) but not (0,4) or (12,4)
        let cells = m.get_overlap_cells(6, 4);
        assert_eq!(cells.len(), 2);
        assert!(cells.iter().all(|c| c.offset() == 4));
        // the exact match is excluded, other sizes at the offset are not
        let cells = m.get_overlap_cells(4, 4);
        assert!(!cells.iter().any(|c| c.offset() == 4 && c.size() == 4));
        assert!(cells.iter().any(|c| c.offset() == 4 && c.size() == 8));
    }
}
