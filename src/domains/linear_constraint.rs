use crate::domains::interval::Interval;
use crate::variable::Variable;
use rug::Integer;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::ops::{Add, Mul, Neg, Sub};

/// Represents a linear expression with integer coefficients
/// E.g. 3*a+4*b-5*c+6, where `cof_map` stores {(a,3), (b,4), (c,-5)}, and `cst` stores 6
#[derive(PartialEq, Eq, Clone)]
pub struct LinearExpression {
    cof_map: BTreeMap<Variable, Integer>,
    cst: Integer,
}

impl Default for LinearExpression {
    /// The default value of a linear expression is simply zero
    fn default() -> Self {
        Self {
            cof_map: BTreeMap::new(),
            cst: Integer::from(0),
        }
    }
}

impl LinearExpression {
    /// Test if the expression only has the constant term
    pub fn is_constant(&self) -> bool {
        self.cof_map.is_empty()
    }

    /// Returns the constant term
    pub fn constant(&self) -> Integer {
        self.cst.clone()
    }

    /// Number of variable terms
    pub fn size(&self) -> usize {
        self.cof_map.len()
    }

    /// Get the coefficient of variable `var`. If `var` is not found in the
    /// expression, returns zero
    pub fn get_coff(&self, var: &Variable) -> Integer {
        if let Some(coff) = self.cof_map.get(var) {
            coff.clone()
        } else {
            Integer::from(0)
        }
    }

    /// Add term `n*x` to the linear expression
    pub fn add_term(&mut self, x: Variable, n: Integer) {
        if let Some(num) = self.cof_map.get(&x) {
            let r = num + n;
            if r == 0 {
                self.cof_map.remove(&x);
            } else {
                self.cof_map.insert(x, r);
            }
        } else if n != 0 {
            self.cof_map.insert(x, n);
        }
    }

    /// The single variable of a `1*x + 0` expression, if it has that shape
    pub fn get_variable(&self) -> Option<Variable> {
        if self.cst == 0 && self.cof_map.len() == 1 {
            let (v, n) = self.cof_map.iter().next().unwrap();
            if *n == 1 {
                return Some(v.clone());
            }
        }
        None
    }

    pub fn variables(&self) -> Vec<Variable> {
        self.cof_map.keys().cloned().collect()
    }

    /// Evaluate the expression under an interval valuation
    pub fn eval<F>(&self, valuation: F) -> Interval
    where
        F: Fn(&Variable) -> Interval,
    {
        let mut r = Interval::from(self.cst.clone());
        for (v, n) in self {
            r = r + Interval::from(n.clone()) * valuation(v);
        }
        r
    }
}

impl<Num> From<Num> for LinearExpression
where
    Integer: From<Num>,
{
    fn from(src: Num) -> Self {
        LinearExpression::default() + Integer::from(src)
    }
}

impl LinearExpression {
    pub fn variable(v: Variable) -> Self {
        LinearExpression::default() + v
    }
}

impl Add<Self> for LinearExpression {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        let mut res = Self {
            cof_map: self.cof_map,
            cst: self.cst + &other.cst,
        };
        for (var, coff) in other.cof_map {
            res.add_term(var, coff);
        }
        res
    }
}

impl Add<Integer> for LinearExpression {
    type Output = Self;

    fn add(self, other: Integer) -> Self {
        Self {
            cof_map: self.cof_map,
            cst: self.cst + other,
        }
    }
}

impl Add<Variable> for LinearExpression {
    type Output = Self;

    fn add(self, other: Variable) -> Self {
        let mut res = self;
        res.add_term(other, Integer::from(1));
        res
    }
}

impl Sub<Self> for LinearExpression {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        let mut res = Self {
            cof_map: self.cof_map,
            cst: self.cst - &other.cst,
        };
        for (var, coff) in other.cof_map {
            res.add_term(var, -coff);
        }
        res
    }
}

impl Sub<Integer> for LinearExpression {
    type Output = Self;

    fn sub(self, other: Integer) -> Self {
        self + (-other)
    }
}

impl Sub<Variable> for LinearExpression {
    type Output = Self;

    fn sub(self, other: Variable) -> Self {
        let mut res = self;
        res.add_term(other, Integer::from(-1));
        res
    }
}

impl Mul<Integer> for LinearExpression {
    type Output = Self;

    fn mul(self, other: Integer) -> Self {
        if other == 0 {
            Self::default()
        } else {
            let mut cof_map = BTreeMap::new();
            for (var, coff) in &self {
                let r = coff * other.clone();
                if r != 0 {
                    cof_map.insert(var.clone(), r);
                }
            }
            Self {
                cof_map,
                cst: other * &self.cst,
            }
        }
    }
}

impl Neg for LinearExpression {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self * Integer::from(-1)
    }
}

impl IntoIterator for LinearExpression {
    type Item = (Variable, Integer);
    type IntoIter = std::collections::btree_map::IntoIter<Variable, Integer>;
    fn into_iter(self) -> Self::IntoIter {
        self.cof_map.into_iter()
    }
}

impl<'a> IntoIterator for &'a LinearExpression {
    type Item = (&'a Variable, &'a Integer);
    type IntoIter = std::collections::btree_map::Iter<'a, Variable, Integer>;
    fn into_iter(self) -> Self::IntoIter {
        self.cof_map.iter()
    }
}

impl Debug for LinearExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = String::new();
        for (i, (v, n)) in self.cof_map.iter().enumerate() {
            if *n > 0 && i != 0 {
                res.push('+');
            }
            if *n == -1 {
                res.push('-');
            } else if *n != 1 {
                res.push_str(format!("{}*", n).as_str());
            }
            res.push_str(format!("{:?}", v).as_str());
        }
        if self.cst > 0 && !self.cof_map.is_empty() {
            res.push('+');
        }
        if self.cst != 0 || self.cof_map.is_empty() {
            res.push_str(format!("{}", self.cst).as_str());
        }
        write!(f, "{}", res)
    }
}

/// A linear constraint `cons := exp op 0`
/// Where `op` is `==`, `!=`, `<=`, `<`, other operators can be transformed into these
#[derive(PartialEq, Eq, Clone)]
pub enum LinearConstraint {
    // "=="
    Equality(LinearExpression),
    // "!="
    Inequality(LinearExpression),
    // "<="
    LessEq(LinearExpression),
    // "<"
    LessThan(LinearExpression),
}

impl LinearConstraint {
    pub fn new_true() -> Self {
        Self::Equality(LinearExpression::from(0))
    }

    pub fn new_false() -> Self {
        Self::Inequality(LinearExpression::from(0))
    }

    pub fn expression(&self) -> &LinearExpression {
        match self {
            LinearConstraint::Equality(e)
            | LinearConstraint::Inequality(e)
            | LinearConstraint::LessEq(e)
            | LinearConstraint::LessThan(e) => e,
        }
    }

    pub fn is_tautology(&self) -> bool {
        match self {
            LinearConstraint::Equality(expr) => expr.is_constant() && expr.constant() == 0,
            LinearConstraint::Inequality(expr) => expr.is_constant() && expr.constant() != 0,
            LinearConstraint::LessEq(expr) => expr.is_constant() && expr.constant() <= 0,
            LinearConstraint::LessThan(expr) => expr.is_constant() && expr.constant() < 0,
        }
    }

    pub fn is_contradiction(&self) -> bool {
        match self {
            LinearConstraint::Equality(expr) => expr.is_constant() && expr.constant() != 0,
            LinearConstraint::Inequality(expr) => expr.is_constant() && expr.constant() == 0,
            LinearConstraint::LessEq(expr) => expr.is_constant() && expr.constant() > 0,
            LinearConstraint::LessThan(expr) => expr.is_constant() && expr.constant() >= 0,
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, LinearConstraint::Equality(..))
    }

    pub fn is_disequation(&self) -> bool {
        matches!(self, LinearConstraint::Inequality(..))
    }

    pub fn is_inequality(&self) -> bool {
        matches!(self, LinearConstraint::LessEq(..))
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, LinearConstraint::LessThan(..))
    }

    /// `e < 0` is `e + 1 <= 0` over the integers
    pub fn strict_to_non_strict(&self) -> Self {
        assert!(self.is_strict());
        match self {
            Self::LessThan(expr) => Self::LessEq(expr.clone() + Integer::from(1)),
            _ => unreachable!(),
        }
    }

    pub fn negate(&self) -> Self {
        if self.is_tautology() {
            Self::new_false()
        } else if self.is_contradiction() {
            Self::new_true()
        } else {
            match self {
                LinearConstraint::Equality(expr) => Self::Inequality(expr.clone()),
                LinearConstraint::Inequality(expr) => Self::Equality(expr.clone()),
                LinearConstraint::LessEq(expr) => Self::LessThan(-expr.clone()),
                LinearConstraint::LessThan(expr) => Self::LessEq(-expr.clone()),
            }
        }
    }

    pub fn variables(&self) -> Vec<Variable> {
        self.expression().variables()
    }
}

impl Debug for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_contradiction() {
            write!(f, "false")
        } else if self.is_tautology() {
            write!(f, "true")
        } else {
            let (expr, op) = match self {
                LinearConstraint::Equality(expr) => (expr, "="),
                LinearConstraint::Inequality(expr) => (expr, "!="),
                LinearConstraint::LessEq(expr) => (expr, "<="),
                LinearConstraint::LessThan(expr) => (expr, "<"),
            };
            let e = expr.clone() - expr.constant();
            write!(f, "{:?}{}{}", e, op, -expr.constant())
        }
    }
}

impl From<LinearConstraint> for LinearConstraintSystem {
    fn from(value: LinearConstraint) -> Self {
        let mut result = LinearConstraintSystem::default();
        result.add(value);
        result
    }
}

#[derive(Clone, Default)]
pub struct LinearConstraintSystem {
    csts: Vec<LinearConstraint>,
}

impl LinearConstraintSystem {
    pub fn add(&mut self, cst: LinearConstraint) {
        if !self.csts.iter().any(|constraint| *constraint == cst) {
            self.csts.push(cst);
        }
    }

    pub fn join(&self, csts: LinearConstraintSystem) -> Self {
        let mut result = self.clone();
        for cst in csts {
            result.add(cst);
        }
        result
    }

    pub fn size(&self) -> usize {
        self.csts.len()
    }

    pub fn is_false(&self) -> bool {
        if self.csts.is_empty() {
            false
        } else {
            self.csts.iter().all(|cst| cst.is_contradiction())
        }
    }

    pub fn is_true(&self) -> bool {
        self.csts.is_empty()
    }
}

impl IntoIterator for LinearConstraintSystem {
    type Item = LinearConstraint;
    type IntoIter = std::vec::IntoIter<Self::Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.csts.into_iter()
    }
}

impl<'a> IntoIterator for &'a LinearConstraintSystem {
    type Item = &'a LinearConstraint;
    type IntoIter = std::slice::Iter<'a, LinearConstraint>;
    fn into_iter(self) -> Self::IntoIter {
        self.csts.iter()
    }
}

impl Debug for LinearConstraintSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.csts.is_empty() {
            write!(f, "{{}}")
        } else {
            let mut res = String::from("{");
            for cst in self {
                res.push_str(format!("{:?}; ", cst).as_str());
            }
            res.pop();
            res.pop();
            res.push('}');
            write!(f, "{}", res)
        }
    }
}

/// A disjunction of conjunctive constraint systems
#[derive(Clone, Default)]
pub struct DisjunctiveLinearConstraintSystem {
    disjuncts: Vec<LinearConstraintSystem>,
}

impl DisjunctiveLinearConstraintSystem {
    pub fn add(&mut self, csts: LinearConstraintSystem) {
        self.disjuncts.push(csts);
    }

    pub fn size(&self) -> usize {
        self.disjuncts.len()
    }

    pub fn is_false(&self) -> bool {
        self.disjuncts.iter().all(|c| c.is_false()) && !self.disjuncts.is_empty()
    }
}

impl From<LinearConstraintSystem> for DisjunctiveLinearConstraintSystem {
    fn from(csts: LinearConstraintSystem) -> Self {
        let mut res = Self::default();
        res.add(csts);
        res
    }
}

impl<'a> IntoIterator for &'a DisjunctiveLinearConstraintSystem {
    type Item = &'a LinearConstraintSystem;
    type IntoIter = std::slice::Iter<'a, LinearConstraintSystem>;
    fn into_iter(self) -> Self::IntoIter {
        self.disjuncts.iter()
    }
}

impl Debug for DisjunctiveLinearConstraintSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.disjuncts.is_empty() {
            write!(f, "{{}}")
        } else {
            let mut first = true;
            for c in self {
                if !first {
                    write!(f, " or ")?;
                }
                first = false;
                write!(f, "{:?}", c)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{VarType, VariableFactory};

    #[test]
    fn test_linear_expression() {
        let vfac = VariableFactory::new();
        let x = vfac.get("x", VarType::Int(32));
        let y = vfac.get("y", VarType::Int(32));
        let mut exp1 = LinearExpression::default();
        let mut exp2 = LinearExpression::default();
        // exp1 = 3x
        exp1.add_term(x.clone(), Integer::from(3));
        // exp2 = 4y
        exp2.add_term(y.clone(), Integer::from(4));
        // exp1 = exp1 * 5 = 15x
        exp1 = exp1 * Integer::from(5);
        // exp1 = exp1 + exp2 = 15x + 4y
        exp1 = exp1 + exp2.clone();

        let mut exp3 = LinearExpression::default();
        exp3.add_term(y, Integer::from(4));
        exp3.add_term(x.clone(), Integer::from(15));
        assert_eq!(exp1, exp3);

        let exp4 = exp1 - exp2;
        assert_eq!(exp4.get_coff(&x), Integer::from(15));
    }

    #[test]
    fn test_cancellation() {
        let vfac = VariableFactory::new();
        let x = vfac.get("x", VarType::Int(32));
        let e = LinearExpression::default() + x.clone() - x;
        assert!(e.is_constant());
        assert_eq!(e.constant(), Integer::from(0));
    }

    #[test]
    fn test_negate() {
        let vfac = VariableFactory::new();
        let x = vfac.get("x", VarType::Int(32));
        // x - 3 <= 0
        let cst = LinearConstraint::LessEq(LinearExpression::variable(x.clone()) - Integer::from(3));
        // negation: 3 - x < 0
        let neg = cst.negate();
        assert!(neg.is_strict());
        assert_eq!(neg.expression().get_coff(&x), Integer::from(-1));
        // over the integers: 4 - x <= 0
        let non_strict = neg.strict_to_non_strict();
        assert_eq!(non_strict.expression().constant(), Integer::from(4));

        assert!(LinearConstraint::new_true().is_tautology());
        assert!(LinearConstraint::new_false().is_contradiction());
        assert!(LinearConstraint::new_true().negate().is_contradiction());
    }

    #[test]
    fn test_system_dedup() {
        let vfac = VariableFactory::new();
        let x = vfac.get("x", VarType::Int(32));
        let cst = LinearConstraint::LessEq(LinearExpression::variable(x) - Integer::from(3));
        let mut csts = LinearConstraintSystem::default();
        csts.add(cst.clone());
        csts.add(cst);
        assert_eq!(csts.size(), 1);
    }
}
