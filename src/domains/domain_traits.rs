use crate::domains::interval::Interval;
use crate::domains::lattice::LatticeTrait;
use crate::domains::linear_constraint::{
    DisjunctiveLinearConstraintSystem, LinearConstraint, LinearConstraintSystem, LinearExpression,
};
use crate::domains::op::{ArithOp, BitwiseOp, BoolOp, ConvOp, DivOp};
use crate::variable::Variable;
use rug::Integer;
use std::fmt::Debug;

/// The contract every numerical domain satisfies; array lifters both
/// require and implement it, so domains stack arbitrarily.
pub trait NumericalDomain: LatticeTrait + Clone + Debug {
    fn leq(&self, other: &Self) -> bool;
    fn meet(&self, other: &Self) -> Self;
    fn narrowing_with(&self, other: &Self) -> Self;
    fn widening_with_thresholds(&self, other: &Self, thresholds: &[Integer]) -> Self;

    /// Bring the internal representation to its canonical form, when the
    /// domain has one
    fn normalize(&mut self) {}

    // Transfer functions
    fn assign(&mut self, x: &Variable, e: &LinearExpression);
    fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Variable);
    fn apply_num(&mut self, op: ArithOp, x: &Variable, y: &Variable, k: &Integer);
    fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Variable);
    fn apply_bitwise_num(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, k: &Integer);
    fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Variable);
    fn apply_div_num(&mut self, op: DivOp, x: &Variable, y: &Variable, k: &Integer);
    /// Infinite precision: conversions are plain assignments
    fn apply_conv(&mut self, op: ConvOp, dst: &Variable, src: &Variable);

    // Backward transfer functions
    fn backward_assign(&mut self, x: &Variable, e: &LinearExpression, inv: &Self);
    fn backward_apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Variable, inv: &Self);
    fn backward_apply_num(
        &mut self,
        op: ArithOp,
        x: &Variable,
        y: &Variable,
        k: &Integer,
        inv: &Self,
    );

    // Boolean operations (booleans are 0/1 integers)
    fn assign_bool_cst(&mut self, lhs: &Variable, rhs: &LinearConstraint);
    fn assign_bool_var(&mut self, lhs: &Variable, rhs: &Variable, is_not_rhs: bool);
    fn apply_binary_bool(&mut self, op: BoolOp, x: &Variable, y: &Variable, z: &Variable);
    fn assume_bool(&mut self, v: &Variable, is_negated: bool);

    // Pointer operations
    fn pointer_assign(&mut self, lhs: &Variable, rhs: &Variable, offset: &LinearExpression);
    fn pointer_mk_null(&mut self, lhs: &Variable);

    // Constraints
    fn add_constraint(&mut self, cst: &LinearConstraint);
    fn add_constraints(&mut self, csts: &LinearConstraintSystem) {
        for cst in csts {
            self.add_constraint(cst);
        }
    }
    fn get_interval(&self, x: &Variable) -> Interval;
    fn set(&mut self, x: &Variable, intv: Interval);

    // Management
    fn forget(&mut self, x: &Variable);
    fn forget_all(&mut self, vars: &[Variable]) {
        for v in vars {
            self.forget(v);
        }
    }
    /// Dual of forget: keep only `vars`
    fn project(&mut self, vars: &[Variable]);
    /// Create `new_x` with the value of `x` but no relation between them
    fn expand(&mut self, x: &Variable, new_x: &Variable);
    fn rename(&mut self, from: &[Variable], to: &[Variable]);

    // Serialization
    fn to_linear_constraint_system(&self) -> LinearConstraintSystem;
    fn to_disjunctive_linear_constraint_system(&self) -> DisjunctiveLinearConstraintSystem;
}

/// Operations a domain must provide to abstract array content
pub trait ArrayDomain: NumericalDomain {
    /// All elements of `a` in `[lb, ub)` are initialized to `val`
    fn array_init(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpression,
        lb: &LinearExpression,
        ub: &LinearExpression,
        val: &LinearExpression,
    );
    fn array_load(
        &mut self,
        lhs: &Variable,
        a: &Variable,
        elem_size: &LinearExpression,
        i: &LinearExpression,
    );
    fn array_store(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpression,
        i: &LinearExpression,
        val: &LinearExpression,
        is_singleton: bool,
    );
    fn array_assign(&mut self, lhs: &Variable, rhs: &Variable);
}

/// Initialization hook for domain-wide static data, called once per
/// analyzed control-flow graph. None of the domains here need it.
pub fn do_initialization<Cfg>(_cfg: &Cfg) {}

/// Convert an equality into two inequalities so a later negation cannot
/// produce a disequality. Pass-through for every other kind.
pub fn lower_equality(cst: &LinearConstraint, csts: &mut LinearConstraintSystem) {
    if let LinearConstraint::Equality(e) = cst {
        csts.add(LinearConstraint::LessEq(e.clone()));
        csts.add(LinearConstraint::LessEq(-e.clone()));
    } else {
        csts.add(cst.clone());
    }
}

fn entails_one<D: NumericalDomain>(inv: &D, cst: &LinearConstraint) -> bool {
    // copy is necessary
    let mut dom = inv.clone();
    dom.add_constraint(&cst.negate());
    dom.is_bottom()
}

/// True when `inv` entails `cst`
pub fn entail<D: NumericalDomain>(inv: &D, cst: &LinearConstraint) -> bool {
    if inv.is_bottom() || cst.is_tautology() {
        return true;
    }
    if cst.is_contradiction() {
        return false;
    }
    if cst.is_equality() {
        let mut csts = LinearConstraintSystem::default();
        lower_equality(cst, &mut csts);
        (&csts).into_iter().all(|c| entails_one(inv, c))
    } else {
        entails_one(inv, cst)
    }
}

/// True when `inv` and `cst` have a common model
pub fn intersect<D: NumericalDomain>(inv: &D, cst: &LinearConstraint) -> bool {
    if inv.is_bottom() || cst.is_contradiction() {
        return false;
    }
    if inv.is_top() || cst.is_tautology() {
        return true;
    }
    let mut cst_inv = D::top();
    cst_inv.add_constraint(cst);
    !cst_inv.meet(inv).is_bottom()
}

/// Extract the constraints of `dom` that mention `x`
pub fn extract<D: NumericalDomain>(
    dom: &D,
    x: &Variable,
    csts: &mut LinearConstraintSystem,
    only_equalities: bool,
) {
    for cst in &dom.to_linear_constraint_system() {
        if only_equalities && !cst.is_equality() {
            continue;
        }
        if cst.variables().iter().any(|v| v == x) {
            csts.add(cst.clone());
        }
    }
}

/// Generic unsatisfiability check: conjoin and test for bottom. The split
/// octagon also has a cheaper syntactic path (`SplitOctagon::is_unsat`).
pub fn is_unsat<D: NumericalDomain>(inv: &D, cst: &LinearConstraint) -> bool {
    let mut copy = inv.clone();
    copy.add_constraint(cst);
    copy.is_bottom()
}
