//! A small closed expression DSL standing in for the source system's
//! string-based prescribed-motion and family-transition fragments (Design
//! Notes §9: "model this as a small expression DSL with explicit operators
//! and variables" rather than opaque source text injected into a device
//! JIT this core does not have).
//!
//! Expressions are evaluated once per owner per production, not compiled;
//! there is no JIT involved on this path.

use crate::spatial::Axis;

/// Scalar context an [`Expr`] is evaluated against.
#[derive(Copy, Clone, Debug)]
pub struct EvalContext {
    pub time: f64,
    pub pos: [f64; 3],
    pub vel: [f64; 3],
}

/// A pure, side-effect-free scalar expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(f64),
    Time,
    Pos(Axis),
    Vel(Axis),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sin(Box<Expr>),
    Cos(Box<Expr>),
    /// `a < b`, used by inspector predicates; evaluates to `1.0`/`0.0`.
    Lt(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
}

impl Expr {
    #[must_use]
    pub fn eval(&self, ctx: &EvalContext) -> f64 {
        match self {
            Expr::Const(v) => *v,
            Expr::Time => ctx.time,
            Expr::Pos(axis) => ctx.pos[axis_index(*axis)],
            Expr::Vel(axis) => ctx.vel[axis_index(*axis)],
            Expr::Add(a, b) => a.eval(ctx) + b.eval(ctx),
            Expr::Sub(a, b) => a.eval(ctx) - b.eval(ctx),
            Expr::Mul(a, b) => a.eval(ctx) * b.eval(ctx),
            Expr::Div(a, b) => a.eval(ctx) / b.eval(ctx),
            Expr::Neg(a) => -a.eval(ctx),
            Expr::Sin(a) => a.eval(ctx).sin(),
            Expr::Cos(a) => a.eval(ctx).cos(),
            Expr::Lt(a, b) => f64::from(a.eval(ctx) < b.eval(ctx)),
            Expr::Gt(a, b) => f64::from(a.eval(ctx) > b.eval(ctx)),
        }
    }

    /// Evaluates as a boolean predicate: non-zero is true.
    #[must_use]
    pub fn eval_bool(&self, ctx: &EvalContext) -> bool {
        self.eval(ctx) != 0.0
    }
}

fn axis_index(a: Axis) -> usize {
    match a {
        Axis::X => 0,
        Axis::Y => 1,
        Axis::Z => 2,
    }
}

/// A per-axis prescribed-motion rule: either the owner integrates normally
/// (`None`) or the named component is driven by an expression.
#[derive(Clone, Debug, Default)]
pub struct PrescribedAxis(pub Option<Expr>);

/// Prescribed motion for one family: either position or velocity components
/// may be driven, per axis; unset axes integrate normally.
#[derive(Clone, Debug, Default)]
pub struct PrescribedMotion {
    pub pos: [PrescribedAxis; 3],
    pub vel: [PrescribedAxis; 3],
}
