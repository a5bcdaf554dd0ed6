// Abstract syntax produced by the parser; names are still raw text until
// the binder resolves them against the catalog.

use crate::common::Value;
use crate::vector::{BinaryOperator, UnaryOperator};

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedExpr {
    Literal(Value),
    Parameter(String),
    Variable(String),
    Property(String, String),
    Unary(UnaryOperator, Box<ParsedExpr>),
    Binary(BinaryOperator, Box<ParsedExpr>, Box<ParsedExpr>),
    Function { name: String, distinct: bool, star: bool, args: Vec<ParsedExpr> },
    ListLiteral(Vec<ParsedExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOrientation {
    /// `-[..]->`
    LeftToRight,
    /// `<-[..]-`
    RightToLeft,
    /// `-[..]-`
    Undirected,
}

#[derive(Debug, Clone)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub label: Option<String>,
    pub properties: Vec<(String, ParsedExpr)>,
}

#[derive(Debug, Clone)]
pub struct RelPattern {
    pub variable: Option<String>,
    pub label: Option<String>,
    pub orientation: RelOrientation,
    /// Hop bounds from `*lower..upper`.
    pub range: Option<(u32, u32)>,
}

/// One chain of the pattern: n0 r0 n1 r1 n2 ...
#[derive(Debug, Clone)]
pub struct PatternPart {
    pub nodes: Vec<NodePattern>,
    pub rels: Vec<RelPattern>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectionBody {
    pub items: Vec<(ParsedExpr, Option<String>)>,
    pub order_by: Vec<(ParsedExpr, bool)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    Match { patterns: Vec<PatternPart>, where_clause: Option<ParsedExpr> },
    Unwind { list: ParsedExpr, alias: String },
    Create { patterns: Vec<PatternPart> },
    Set { items: Vec<(String, String, ParsedExpr)> },
    Delete { variables: Vec<String> },
    With { body: ProjectionBody, where_clause: Option<ParsedExpr> },
    Return { body: ProjectionBody },
}

#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub clauses: Vec<Clause>,
    pub is_explain: bool,
    pub is_profile: bool,
}
