//! RPN token model shared between the front-end parser (out of tree) and the
//! compiler in this crate.

use std::fmt;

/// One element of a postfix token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RpnToken {
    /// Numeric literal.
    Literal(f64),
    /// Reference to a parameter by name; resolved against the compile scope.
    Param(String),
    /// Built-in operator or function.
    Op(Operator),
}

/// Built-in operators and functions, postfix arity fixed per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Fact,
    Cos,
    Sin,
    Tan,
    Cosh,
    Sinh,
    Tanh,
    Exp,
    Log,
    Log2,
    Log10,
    Ceil,
    Floor,
    Abs,
    Sqrt,
    Max,
    Min,
    And,
    Or,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    If,
}

impl Operator {
    /// Number of operands popped from the evaluation stack.
    pub fn arg_count(self) -> usize {
        use Operator::*;
        match self {
            Fact | Cos | Sin | Tan | Cosh | Sinh | Tanh | Exp | Log | Log2 | Log10 | Ceil
            | Floor | Abs | Sqrt => 1,
            Add | Sub | Mul | Div | Mod | Pow | Max | Min | And | Or | Greater | GreaterEq
            | Less | LessEq => 2,
            If => 3,
        }
    }

    /// Token spelling, used in diagnostics.
    pub fn symbol(self) -> &'static str {
        use Operator::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Pow => "^",
            Fact => "fact",
            Cos => "cos",
            Sin => "sin",
            Tan => "tan",
            Cosh => "cosh",
            Sinh => "sinh",
            Tanh => "tanh",
            Exp => "exp",
            Log => "log",
            Log2 => "log2",
            Log10 => "log10",
            Ceil => "ceil",
            Floor => "floor",
            Abs => "abs",
            Sqrt => "sqrt",
            Max => "max",
            Min => "min",
            And => "&&",
            Or => "||",
            Greater => ">",
            GreaterEq => ">=",
            Less => "<",
            LessEq => "<=",
            If => "if",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl RpnToken {
    pub fn literal(value: i64) -> Self {
        RpnToken::Literal(value as f64)
    }

    pub fn param(name: impl Into<String>) -> Self {
        RpnToken::Param(name.into())
    }
}
