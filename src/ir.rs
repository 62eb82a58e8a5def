//! The planner IR: the single representation both parser front-ends emit
//! (spec.md §3 "Program", §4.1).

use crate::diagnostics::SourceLoc;
use crate::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

/// A single clause of a comprehension: `for <targets> in <iterable> if <ifs>...`.
#[derive(Debug, Clone)]
pub struct ComprehensionClause {
    pub targets: Vec<String>,
    pub iterable: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Attr {
        base: Box<Expr>,
        path: Vec<String>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        base: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
    },
    /// Chained comparisons: `a < b < c` (spec.md §4.2 "Comparison chains").
    Compare {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },
    BoolOp {
        op: BoolOpKind,
        operands: Vec<Expr>,
    },
    In {
        left: Box<Expr>,
        right: Box<Expr>,
        negate: bool,
    },
    Is {
        left: Box<Expr>,
        right: Box<Expr>,
        negate: bool,
    },
    Call {
        func: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    ListLit(Vec<Expr>),
    TupleLit(Vec<Expr>),
    SetLit(Vec<Expr>),
    DictLit(Vec<(Expr, Expr)>),
    ListComp {
        elt: Box<Expr>,
        clauses: Vec<ComprehensionClause>,
    },
    SetComp {
        elt: Box<Expr>,
        clauses: Vec<ComprehensionClause>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        clauses: Vec<ComprehensionClause>,
    },
}

/// An assignment target: a plain name, or a dotted path for attribute
/// rebinding is intentionally unsupported (spec.md targets are names only).
pub type Name = String;

#[derive(Debug, Clone)]
pub enum Step {
    Assign {
        target: Name,
        expr: Expr,
    },
    Unpack {
        targets: Vec<Name>,
        expr: Expr,
    },
    Tool {
        name: String,
        args: Vec<(Name, Expr)>,
        save_as: Option<Name>,
        source_loc: Option<SourceLoc>,
    },
    Qllm {
        save_as: Name,
        instruction: String,
        input: Expr,
        schema: Schema,
    },
    If {
        cond: Expr,
        then_branch: Vec<Step>,
        else_branch: Vec<Step>,
    },
    For {
        targets: Vec<Name>,
        iterable: Expr,
        body: Vec<Step>,
    },
    Raise {
        error: Expr,
    },
    Final {
        template: String,
    },
}

/// A complete validated program: an ordered sequence of steps.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub steps: Vec<Step>,
}

impl Program {
    /// Total step count summed across all nested bodies (spec.md §3 invariant 4,
    /// the ≤64 step budget).
    pub fn total_step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|s| {
                    1 + match s {
                        Step::If {
                            then_branch,
                            else_branch,
                            ..
                        } => count(then_branch) + count(else_branch),
                        Step::For { body, .. } => count(body),
                        _ => 0,
                    }
                })
                .sum()
        }
        count(&self.steps)
    }
}

/// Field type for a `query_ai_assistant` extraction schema (spec.md §3 "Schema").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Email,
    Datetime,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub items: Option<Box<FieldSpec>>,
    #[serde(default)]
    pub properties: Option<std::collections::BTreeMap<String, FieldSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schema {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: std::collections::BTreeMap<String, FieldSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_step_count_sums_nested_bodies() {
        let program = Program {
            steps: vec![Step::If {
                cond: Expr::Literal(Value::Bool(true)),
                then_branch: vec![
                    Step::Final {
                        template: "a".into(),
                    },
                    Step::Final {
                        template: "b".into(),
                    },
                ],
                else_branch: vec![],
            }],
        };
        // 1 (if) + 2 (then branch) = 3
        assert_eq!(program.total_step_count(), 3);
    }
}
