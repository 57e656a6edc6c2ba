use crate::domains::domain_traits::{ArrayDomain, NumericalDomain};
use crate::domains::interval::Interval;
use crate::domains::lattice::LatticeTrait;
use crate::domains::linear_constraint::{
    DisjunctiveLinearConstraintSystem, LinearConstraint, LinearConstraintSystem, LinearExpression,
};
use crate::domains::op::{ArithOp, BitwiseOp, BoolOp, ConvOp, DivOp};
use crate::variable::{VarType, Variable, VariableFactory};
use rug::Integer;
use std::fmt;

/// Array lifter that smashes every element of an array into one summary
/// variable of the content domain. Reads and writes on any index are
/// reflected on that single variable.
pub struct ArraySmashing<D: NumericalDomain> {
    inv: D,
    vfac: VariableFactory,
}

impl<D: NumericalDomain> Clone for ArraySmashing<D> {
    fn clone(&self) -> Self {
        ArraySmashing {
            inv: self.inv.clone(),
            vfac: self.vfac.clone(),
        }
    }
}

impl<D: NumericalDomain> fmt::Debug for ArraySmashing<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.inv)
    }
}

impl<D: NumericalDomain> ArraySmashing<D> {
    pub fn new(vfac: VariableFactory) -> Self {
        ArraySmashing {
            inv: D::top(),
            vfac,
        }
    }

    pub fn get_content_domain(&self) -> &D {
        &self.inv
    }

    fn assign_by_type(inv: &mut D, a: &Variable, rhs: &LinearExpression) {
        match a.vtype() {
            VarType::ArrayBool | VarType::Bool => {
                if rhs.is_constant() {
                    let cst = if rhs.constant() >= 1 {
                        LinearConstraint::new_true()
                    } else {
                        LinearConstraint::new_false()
                    };
                    inv.assign_bool_cst(a, &cst);
                } else if let Some(v) = rhs.get_variable() {
                    inv.assign_bool_var(a, &v, false);
                }
            }
            VarType::ArrayPtr | VarType::Ptr => {
                if rhs.is_constant() && rhs.constant() == 0 {
                    inv.pointer_mk_null(a);
                } else if let Some(v) = rhs.get_variable() {
                    inv.pointer_assign(a, &v, &LinearExpression::from(0));
                }
            }
            _ => inv.assign(a, rhs),
        }
    }

    fn strong_update(&mut self, a: &Variable, rhs: &LinearExpression) {
        Self::assign_by_type(&mut self.inv, a, rhs);
    }

    fn weak_update(&mut self, a: &Variable, rhs: &LinearExpression) {
        let mut other = self.inv.clone();
        Self::assign_by_type(&mut other, a, rhs);
        self.inv = self.inv.lub(&other);
    }
}

impl<D: NumericalDomain> LatticeTrait for ArraySmashing<D> {
    fn top() -> Self {
        ArraySmashing {
            inv: D::top(),
            vfac: VariableFactory::default(),
        }
    }

    fn is_top(&self) -> bool {
        self.inv.is_top()
    }

    fn set_to_top(&mut self) {
        self.inv.set_to_top();
    }

    fn bottom() -> Self {
        ArraySmashing {
            inv: D::bottom(),
            vfac: VariableFactory::default(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.inv.is_bottom()
    }

    fn set_to_bottom(&mut self) {
        self.inv.set_to_bottom();
    }

    fn lub(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.lub(&other.inv),
            vfac: self.vfac.clone(),
        }
    }

    fn widening_with(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.widening_with(&other.inv),
            vfac: self.vfac.clone(),
        }
    }
}

impl<D: NumericalDomain> NumericalDomain for ArraySmashing<D> {
    fn leq(&self, other: &Self) -> bool {
        self.inv.leq(&other.inv)
    }

    fn meet(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.meet(&other.inv),
            vfac: self.vfac.clone(),
        }
    }

    fn narrowing_with(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.narrowing_with(&other.inv),
            vfac: self.vfac.clone(),
        }
    }

    fn widening_with_thresholds(&self, other: &Self, thresholds: &[Integer]) -> Self {
        ArraySmashing {
            inv: self.inv.widening_with_thresholds(&other.inv, thresholds),
            vfac: self.vfac.clone(),
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
        self.inv.forget(x);
    }

    fn project(&mut self, vars: &[Variable]) {
        self.inv.project(vars);
    }

    fn expand(&mut self, x: &Variable, new_x: &Variable) {
        if x.is_array() {
            warn!("array smashing cannot expand the array variable {:?}", x);
            return;
        }
        self.inv.expand(x, new_x);
    }

    fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        self.inv.rename(from, to);
    }

    fn to_linear_constraint_system(&self) -> LinearConstraintSystem {
        self.inv.to_linear_constraint_system()
    }

    fn to_disjunctive_linear_constraint_system(&self) -> DisjunctiveLinearConstraintSystem {
        self.inv.to_disjunctive_linear_constraint_system()
    }
}

impl<D: NumericalDomain> ArrayDomain for ArraySmashing<D> {
    /// All elements start equal to `val`, so initialization is one strong
    /// update of the summary
    fn array_init(
        &mut self,
        a: &Variable,
        _elem_size: &LinearExpression,
        _lb: &LinearExpression,
        _ub: &LinearExpression,
        val: &LinearExpression,
    ) {
        self.strong_update(a, val);
        debug!("forall i: {:?}[i] == {:?} -- {:?}", a, val, self);
    }

    /// Moving the summary into `lhs` directly would be unsound; go through
    /// a fresh expanded copy instead
    fn array_load(
        &mut self,
        lhs: &Variable,
        a: &Variable,
        _elem_size: &LinearExpression,
        i: &LinearExpression,
    ) {
        let elem_ty = a
            .vtype()
            .element_type()
            .unwrap_or_else(|| panic!("array load from non-array variable {:?}", a));
        let a_prime = self.vfac.fresh(elem_ty);
        self.inv.expand(a, &a_prime);
        match a.vtype() {
            VarType::ArrayBool => self.inv.assign_bool_var(lhs, &a_prime, false),
            VarType::ArrayPtr => {
                self.inv
                    .pointer_assign(lhs, &a_prime, &LinearExpression::from(0))
            }
            _ => {
                let e = LinearExpression::variable(a_prime.clone());
                self.inv.assign(lhs, &e);
            }
        }
        self.inv.forget(&a_prime);
        debug!("{:?} := {:?}[{:?}] -- {:?}", lhs, a, i, self);
    }

    fn array_store(
        &mut self,
        a: &Variable,
        _elem_size: &LinearExpression,
        i: &LinearExpression,
        val: &LinearExpression,
        is_singleton: bool,
    ) {
        if is_singleton {
            self.strong_update(a, val);
        } else {
            self.weak_update(a, val);
        }
        debug!("{:?}[{:?}] := {:?} -- {:?}", a, i, val, self);
    }

    fn array_assign(&mut self, lhs: &Variable, rhs: &Variable) {
        match lhs.vtype() {
            VarType::ArrayBool => self.inv.assign_bool_var(lhs, rhs, false),
            VarType::ArrayPtr => {
                self.inv
                    .pointer_assign(lhs, rhs, &LinearExpression::from(0))
            }
            _ => {
                let e = LinearExpression::variable(rhs.clone());
                self.inv.assign(lhs, &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::split_octagon::SplitOctagon;
    use crate::domains::interval::Bound;
    use crate::option::DefaultParams;

    type Dom = ArraySmashing<SplitOctagon<DefaultParams>>;

    fn itv(lo: i64, hi: i64) -> Interval {
        Interval::new(Bound::from(lo), Bound::from(hi))
    }

    #[test]
    fn test_weak_update_after_init() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let idx = vfac.get("idx", VarType::Int(32));
        let mut dom = Dom::new(vfac);
        let es = LinearExpression::from(4);
        dom.array_init(
            &a,
            &es,
            &LinearExpression::from(0),
            &LinearExpression::from(16),
            &LinearExpression::from(0),
        );
        assert_eq!(dom.get_interval(&a), itv(0, 0));
        // a non-singleton store folds the old and the new value
        dom.array_store(
            &a,
            &es,
            &LinearExpression::variable(idx),
            &LinearExpression::from(5),
            false,
        );
        assert_eq!(dom.get_interval(&a), itv(0, 5));
    }

    #[test]
    fn test_singleton_store_is_strong() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let mut dom = Dom::new(vfac);
        let es = LinearExpression::from(4);
        dom.array_init(
            &a,
            &es,
            &LinearExpression::from(0),
            &LinearExpression::from(4),
            &LinearExpression::from(0),
        );
        dom.array_store(&a, &es, &LinearExpression::from(0), &LinearExpression::from(7), true);
        assert_eq!(dom.get_interval(&a), itv(7, 7));
    }

    #[test]
    fn test_load_goes_through_expansion() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let x = vfac.get("x", VarType::Int(32));
        let mut dom = Dom::new(vfac);
        let es = LinearExpression::from(4);
        dom.array_init(
            &a,
            &es,
            &LinearExpression::from(0),
            &LinearExpression::from(16),
            &LinearExpression::from(3),
        );
        dom.array_load(&x, &a, &es, &LinearExpression::from(8));
        assert_eq!(dom.get_interval(&x), itv(3, 3));
        // the summary itself is untouched
        assert_eq!(dom.get_interval(&a), itv(3, 3));
        // and the scratch variable did not leak into the state
        let active = dom.get_content_domain().to_linear_constraint_system();
        for cst in &active {
            for v in cst.variables() {
                assert!(!v.name().starts_with("$shadow"), "leaked {:?}", v);
            }
        }
    }

    #[test]
    fn test_array_assign_copies_summary() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let b = vfac.get("b", VarType::ArrayInt(32));
        let mut dom = Dom::new(vfac);
        let es = LinearExpression::from(4);
        dom.array_init(
            &a,
            &es,
            &LinearExpression::from(0),
            &LinearExpression::from(8),
            &LinearExpression::from(9),
        );
        dom.array_assign(&b, &a);
        assert_eq!(dom.get_interval(&b), itv(9, 9));
    }

    #[test]
    fn test_join_of_smashed_states() {
        let vfac = VariableFactory::new();
        let a = vfac.get("a", VarType::ArrayInt(32));
        let mut d1 = Dom::new(vfac.clone());
        let mut d2 = Dom::new(vfac);
        let es = LinearExpression::from(4);
        d1.array_init(
            &a,
            &es,
            &LinearExpression::from(0),
            &LinearExpression::from(8),
            &LinearExpression::from(1),
        );
        d2.array_init(
            &a,
            &es,
            &LinearExpression::from(0),
            &LinearExpression::from(8),
            &LinearExpression::from(4),
        );
        let j = d1.lub(&d2);
        assert_eq!(j.get_interval(&a), itv(1, 4));
        assert!(d1.leq(&j) && d2.leq(&j));
    }
}
