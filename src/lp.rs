//! Linear programming boundary
//!
//! The graph solver builds an [`LpProblem`] and hands it to any
//! [`LpBackend`]. Backends work in floating point; callers convert the
//! values back to rationals.

use std::fmt;

use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpVariable {
    pub name: String,
    /// Objective coefficient
    pub cost: f64,
    pub lower: f64,
    pub upper: f64,
}

/// One row of the sparse constraint matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct LpConstraint {
    pub name: String,
    pub coefficients: Vec<(usize, f64)>,
    pub op: Comparison,
    pub rhs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpProblem {
    pub direction: Direction,
    pub variables: Vec<LpVariable>,
    pub constraints: Vec<LpConstraint>,
}

impl LpProblem {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            variables: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add a variable and return its column.
    pub fn add_variable(&mut self, name: impl Into<String>, cost: f64, lower: f64, upper: f64) -> usize {
        self.variables.push(LpVariable {
            name: name.into(),
            cost,
            lower,
            upper,
        });
        self.variables.len() - 1
    }

    /// Add a row. Coefficients for the same column are summed.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        coefficients: impl IntoIterator<Item = (usize, f64)>,
        op: Comparison,
        rhs: f64,
    ) {
        let mut merged: Vec<(usize, f64)> = Vec::new();
        for (col, coef) in coefficients {
            match merged.iter_mut().find(|(c, _)| *c == col) {
                Some((_, existing)) => *existing += coef,
                None => merged.push((col, coef)),
            }
        }
        merged.retain(|(_, coef)| *coef != 0.0);
        self.constraints.push(LpConstraint {
            name: name.into(),
            coefficients: merged,
            op,
            rhs,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    /// The column that can grow without bound, when the backend knows it
    Unbounded { column: Option<usize> },
    Error { code: i32, message: String },
}

impl LpStatus {
    /// Numeric return code: 0 optimal, 2 infeasible, 3 unbounded.
    pub fn code(&self) -> i32 {
        match self {
            LpStatus::Optimal => 0,
            LpStatus::Infeasible => 2,
            LpStatus::Unbounded { .. } => 3,
            LpStatus::Error { code, .. } => *code,
        }
    }
}

impl fmt::Display for LpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LpStatus::Optimal => write!(f, "optimal"),
            LpStatus::Infeasible => write!(f, "no_feasible"),
            LpStatus::Unbounded { .. } => write!(f, "unbounded"),
            LpStatus::Error { code, message } => write!(f, "error {code}: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpOutcome {
    pub status: LpStatus,
    /// One value per variable; empty unless optimal
    pub values: Vec<f64>,
    pub objective: Option<f64>,
}

impl LpOutcome {
    pub fn failed(status: LpStatus) -> Self {
        Self {
            status,
            values: Vec::new(),
            objective: None,
        }
    }
}

/// A linear programming solver. Solving is synchronous and runs to
/// completion.
pub trait LpBackend {
    fn name(&self) -> &str;

    fn submit(&self, problem: &LpProblem) -> LpOutcome;
}

/// Pure Rust dual simplex from the `minilp` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinilpBackend;

impl LpBackend for MinilpBackend {
    fn name(&self) -> &str {
        "minilp"
    }

    fn submit(&self, problem: &LpProblem) -> LpOutcome {
        let direction = match problem.direction {
            Direction::Minimize => OptimizationDirection::Minimize,
            Direction::Maximize => OptimizationDirection::Maximize,
        };
        let mut lp = Problem::new(direction);

        let mut vars = Vec::with_capacity(problem.variables.len());
        for var in &problem.variables {
            if var.lower > var.upper || var.lower.is_nan() || var.upper.is_nan() {
                return LpOutcome::failed(LpStatus::Error {
                    code: 1,
                    message: format!("invalid bounds for {}", var.name),
                });
            }
            vars.push(lp.add_var(var.cost, (var.lower, var.upper)));
        }

        for row in &problem.constraints {
            let mut expr = LinearExpr::empty();
            for &(col, coef) in &row.coefficients {
                let Some(var) = vars.get(col) else {
                    return LpOutcome::failed(LpStatus::Error {
                        code: 2,
                        message: format!("constraint {} references column {col}", row.name),
                    });
                };
                expr.add(*var, coef);
            }
            let op = match row.op {
                Comparison::Eq => ComparisonOp::Eq,
                Comparison::Le => ComparisonOp::Le,
                Comparison::Ge => ComparisonOp::Ge,
            };
            lp.add_constraint(expr, op, row.rhs);
        }

        debug!(
            variables = vars.len(),
            constraints = problem.constraints.len(),
            "submitting problem to minilp"
        );

        match lp.solve() {
            Ok(solution) => LpOutcome {
                status: LpStatus::Optimal,
                values: vars.iter().map(|v| solution[*v]).collect(),
                objective: Some(solution.objective()),
            },
            Err(minilp::Error::Infeasible) => LpOutcome::failed(LpStatus::Infeasible),
            Err(minilp::Error::Unbounded) => LpOutcome::failed(LpStatus::Unbounded { column: None }),
        }
    }
}
