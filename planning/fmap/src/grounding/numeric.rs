//! Ground numeric expressions, conditions and effects.

use crate::ids::VarId;
use crate::task::{Comparator, NumericEffectKind};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn apply(self, a: f64, b: f64) -> Option<f64> {
        match self {
            ArithOp::Add => Some(a + b),
            ArithOp::Sub => Some(a - b),
            ArithOp::Mul => Some(a * b),
            ArithOp::Div if b == 0.0 => None,
            ArithOp::Div => Some(a / b),
        }
    }
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

/// Arithmetic expression over constants and numeric ground variables.
#[derive(Clone, Debug, PartialEq)]
pub enum NumExpr {
    Const(f64),
    Var(VarId),
    Bin(ArithOp, Box<NumExpr>, Box<NumExpr>),
}

impl NumExpr {
    /// Evaluates the expression. Returns `None` if a variable has no value or on division by zero.
    pub fn eval(&self, value_of: &impl Fn(VarId) -> Option<f64>) -> Option<f64> {
        match self {
            NumExpr::Const(c) => Some(*c),
            NumExpr::Var(v) => value_of(*v),
            NumExpr::Bin(op, a, b) => op.apply(a.eval(value_of)?, b.eval(value_of)?),
        }
    }

    pub fn collect_vars(&self, out: &mut Vec<VarId>) {
        match self {
            NumExpr::Const(_) => {}
            NumExpr::Var(v) => {
                if !out.contains(v) {
                    out.push(*v)
                }
            }
            NumExpr::Bin(_, a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// Value of the expression if it does not depend on any variable.
    pub fn as_constant(&self) -> Option<f64> {
        self.eval(&|_| None)
    }

    pub fn format(&self, var_name: &impl Fn(VarId) -> String) -> String {
        match self {
            NumExpr::Const(c) => format!("{c}"),
            NumExpr::Var(v) => var_name(*v),
            NumExpr::Bin(op, a, b) => format!("({} {} {})", op.symbol(), a.format(var_name), b.format(var_name)),
        }
    }
}

pub fn compare(cmp: Comparator, a: f64, b: f64) -> bool {
    match cmp {
        Comparator::Lt => a < b,
        Comparator::Le => a <= b,
        Comparator::Eq => a == b,
        Comparator::Ge => a >= b,
        Comparator::Gt => a > b,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NumericCondition {
    pub comparator: Comparator,
    pub lhs: NumExpr,
    pub rhs: NumExpr,
}

impl NumericCondition {
    pub fn holds(&self, value_of: &impl Fn(VarId) -> Option<f64>) -> bool {
        match (self.lhs.eval(value_of), self.rhs.eval(value_of)) {
            (Some(a), Some(b)) => compare(self.comparator, a, b),
            _ => false,
        }
    }

    pub fn vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.lhs.collect_vars(&mut out);
        self.rhs.collect_vars(&mut out);
        out
    }

    /// Distance to satisfaction when the condition compares a single variable to a constant:
    /// returns the variable and the signed amount it must change by (`0` if satisfied).
    pub fn gap(&self, value_of: &impl Fn(VarId) -> Option<f64>) -> Option<(VarId, f64)> {
        let (var, bound, cmp) = match (&self.lhs, self.rhs.as_constant()) {
            (NumExpr::Var(v), Some(c)) => (*v, c, self.comparator),
            _ => match (self.lhs.as_constant(), &self.rhs) {
                (Some(c), NumExpr::Var(v)) => (*v, c, mirror(self.comparator)),
                _ => return None,
            },
        };
        let current = value_of(var)?;
        if compare(cmp, current, bound) {
            return Some((var, 0.0));
        }
        Some((var, bound - current))
    }
}

fn mirror(cmp: Comparator) -> Comparator {
    match cmp {
        Comparator::Lt => Comparator::Gt,
        Comparator::Le => Comparator::Ge,
        Comparator::Eq => Comparator::Eq,
        Comparator::Ge => Comparator::Le,
        Comparator::Gt => Comparator::Lt,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NumericEffect {
    pub kind: NumericEffectKind,
    pub var: VarId,
    pub expr: NumExpr,
}

impl NumericEffect {
    /// New value of the affected variable, evaluated in the state preceding the effect.
    pub fn apply(&self, value_of: &impl Fn(VarId) -> Option<f64>) -> Option<f64> {
        let operand = self.expr.eval(value_of)?;
        match self.kind {
            NumericEffectKind::Assign => Some(operand),
            NumericEffectKind::Increase => Some(value_of(self.var)? + operand),
            NumericEffectKind::Decrease => Some(value_of(self.var)? - operand),
        }
    }

    /// Constant change applied to the variable, if any.
    pub fn constant_delta(&self) -> Option<f64> {
        let c = self.expr.as_constant()?;
        match self.kind {
            NumericEffectKind::Increase => Some(c),
            NumericEffectKind::Decrease => Some(-c),
            NumericEffectKind::Assign => None,
        }
    }

    pub fn reads(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.expr.collect_vars(&mut out);
        if self.kind != NumericEffectKind::Assign && !out.contains(&self.var) {
            out.push(self.var);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(x: f64) -> impl Fn(VarId) -> Option<f64> {
        move |v| if v == VarId::from(0usize) { Some(x) } else { None }
    }

    #[test]
    fn effects_and_gaps() {
        let c = VarId::from(0usize);
        let inc = NumericEffect {
            kind: NumericEffectKind::Increase,
            var: c,
            expr: NumExpr::Const(1.0),
        };
        assert_eq!(inc.apply(&counter(0.0)), Some(1.0));
        assert_eq!(inc.constant_delta(), Some(1.0));

        let goal = NumericCondition {
            comparator: Comparator::Ge,
            lhs: NumExpr::Var(c),
            rhs: NumExpr::Const(2.0),
        };
        assert!(!goal.holds(&counter(1.0)));
        assert!(goal.holds(&counter(2.0)));
        assert_eq!(goal.gap(&counter(0.0)), Some((c, 2.0)));
        assert_eq!(goal.gap(&counter(3.0)), Some((c, 0.0)));
    }

    #[test]
    fn division_by_zero_is_undefined() {
        let e = NumExpr::Bin(ArithOp::Div, Box::new(NumExpr::Const(1.0)), Box::new(NumExpr::Const(0.0)));
        assert_eq!(e.as_constant(), None);
    }
}
