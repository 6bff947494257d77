//! Parse tree produced by [`crate::parser::Parser`], mirroring the
//! FHIRPath grammar productions directly without semantic analysis.

use fhirkit_values::decimal::Decimal;
use fhirkit_values::{DateTimeValue, DateValue, TimeValue};

#[derive(Debug, Clone)]
pub enum Ast {
    Invocation { target: Box<Ast>, invocation: Box<Ast> },
    Indexer { target: Box<Ast>, index: Box<Ast> },
    Polarity { op: PolarityOp, expr: Box<Ast> },
    Multiplicative { left: Box<Ast>, op: MultiplicativeOp, right: Box<Ast> },
    Additive { left: Box<Ast>, op: AdditiveOp, right: Box<Ast> },
    Type { expr: Box<Ast>, op: TypeOp, type_name: String },
    Union { left: Box<Ast>, right: Box<Ast> },
    Inequality { left: Box<Ast>, op: InequalityOp, right: Box<Ast> },
    Equality { left: Box<Ast>, op: EqualityOp, right: Box<Ast> },
    Membership { left: Box<Ast>, op: MembershipOp, right: Box<Ast> },
    And { left: Box<Ast>, right: Box<Ast> },
    Or { left: Box<Ast>, op: OrOp, right: Box<Ast> },
    Implies { left: Box<Ast>, right: Box<Ast> },

    ExternalConstant(String),
    Parenthesized(Box<Ast>),

    MemberInvocation(String),
    FunctionInvocation { name: String, args: Vec<Ast> },
    This,
    Index,
    Total,

    Null,
    Boolean(bool),
    String(String),
    Integer(i64),
    Number(Decimal),
    Date(DateValue),
    DateTime(DateTimeValue),
    Time(TimeValue),
    Quantity { value: Decimal, unit: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolarityOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplicativeOp {
    Multiply,
    Divide,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdditiveOp {
    Plus,
    Minus,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOp {
    Is,
    As,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InequalityOp {
    Le,
    Lt,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityOp {
    Eq,
    Equivalent,
    Ne,
    NotEquivalent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOp {
    In,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrOp {
    Or,
    Xor,
}
