//! Compile-once / evaluate-many expression trees over postfix token streams.
//!
//! Rate and timing formulas arrive as RPN token sequences. Compilation builds
//! a small tagged-variant tree (`Const` / `Var` / `Op`) and folds every
//! constant sub-tree eagerly, so a formula with only static parameters costs
//! nothing at evaluation time: it collapses to a single value and records no
//! symbol table. Dynamic parameters are resolved by index into the value
//! slice handed to `evaluate`, never by name.

use std::fmt;
use thiserror::Error;
use tracing::trace;

mod token;

pub use token::{Operator, RpnToken};

/// Expression compilation / evaluation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unknown parameter [{0}] referenced by expression")]
    UnknownParameter(String),
    #[error("malformed postfix stream: operator [{0}] missing operands")]
    MissingOperand(Operator),
    #[error("malformed postfix stream: {0} values left on the stack")]
    UnbalancedStack(usize),
    #[error("numeric error while evaluating [{0}]")]
    NumericError(Operator),
}

/// Binding of a parameter name at compile time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding<'a> {
    /// Value known now; folded into the tree.
    Constant(&'a str, f64),
    /// Value only known at evaluation; `usize` is the index into the value
    /// slice passed to [`Expression::evaluate`].
    Dynamic(&'a str, usize),
}

impl<'a> Binding<'a> {
    fn name(&self) -> &'a str {
        match self {
            Binding::Constant(name, _) | Binding::Dynamic(name, _) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Const(f64),
    Var(u32),
    Op(Operator, Box<[Node]>),
}

/// A compiled expression. Cheap to clone; a constant expression is a single
/// `Const` node with an empty symbol table.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
    /// Names of the dynamic parameters this expression reads, parallel to the
    /// `Var` indices; kept for diagnostics only.
    symbols: Vec<String>,
    /// For each `Var` index, the position in the evaluation value slice.
    value_indices: Vec<usize>,
}

impl Expression {
    /// Expression holding a fixed integer value.
    pub fn constant(value: i64) -> Self {
        Self {
            root: Node::Const(value as f64),
            symbols: Vec::new(),
            value_indices: Vec::new(),
        }
    }

    /// Compile a postfix token stream against a parameter scope.
    ///
    /// Constant sub-trees (literals, `Constant` bindings and operators whose
    /// operands all reduced to constants) are evaluated during this pass.
    pub fn compile(tokens: &[RpnToken], scope: &[Binding<'_>]) -> Result<Self, ExprError> {
        let mut stack: Vec<Node> = Vec::with_capacity(tokens.len());
        let mut symbols: Vec<String> = Vec::new();
        let mut value_indices: Vec<usize> = Vec::new();
        for token in tokens {
            match token {
                RpnToken::Literal(value) => stack.push(Node::Const(*value)),
                RpnToken::Param(name) => {
                    let binding = scope
                        .iter()
                        .find(|b| b.name() == name)
                        .ok_or_else(|| ExprError::UnknownParameter(name.clone()))?;
                    match binding {
                        Binding::Constant(_, value) => stack.push(Node::Const(*value)),
                        Binding::Dynamic(_, value_ix) => {
                            let var_ix = match symbols.iter().position(|s| s == name) {
                                Some(ix) => ix,
                                None => {
                                    symbols.push(name.clone());
                                    value_indices.push(*value_ix);
                                    symbols.len() - 1
                                }
                            };
                            stack.push(Node::Var(var_ix as u32));
                        }
                    }
                }
                RpnToken::Op(op) => {
                    let argc = op.arg_count();
                    if stack.len() < argc {
                        return Err(ExprError::MissingOperand(*op));
                    }
                    let children: Box<[Node]> = stack.split_off(stack.len() - argc).into();
                    if children.iter().all(|n| matches!(n, Node::Const(_))) {
                        let args: Vec<f64> = children
                            .iter()
                            .map(|n| match n {
                                Node::Const(v) => *v,
                                _ => unreachable!(),
                            })
                            .collect();
                        stack.push(Node::Const(apply(*op, &args)?));
                    } else {
                        stack.push(Node::Op(*op, children));
                    }
                }
            }
        }
        if stack.len() != 1 {
            return Err(ExprError::UnbalancedStack(stack.len()));
        }
        let root = stack.pop().unwrap_or(Node::Const(0.0));
        trace!(
            target: "expr",
            dynamic = !symbols.is_empty(),
            symbols = symbols.len(),
            "expression_compiled"
        );
        Ok(Self {
            root,
            symbols,
            value_indices,
        })
    }

    /// True when at least one dynamic parameter is referenced.
    pub fn is_dynamic(&self) -> bool {
        !self.symbols.is_empty()
    }

    /// True when evaluation reads the given slot of the value slice.
    pub fn reads_value_index(&self, ix: usize) -> bool {
        self.value_indices.contains(&ix)
    }

    /// Rewire references from one value slot to another. Used by the graph
    /// model when out-of-order parameter erase moves a slot.
    pub fn remap_value_index(&mut self, from: usize, to: usize) {
        for v in &mut self.value_indices {
            if *v == from {
                *v = to;
            }
        }
    }

    /// Fast path: the folded value of a fully-constant expression.
    pub fn value(&self) -> Option<f64> {
        match self.root {
            Node::Const(v) if self.symbols.is_empty() => Some(v),
            _ => None,
        }
    }

    /// Evaluate against the current parameter value table.
    pub fn evaluate(&self, values: &[i64]) -> Result<f64, ExprError> {
        self.eval_node(&self.root, values)
    }

    /// Evaluate and truncate to `i64` (rate/timing contexts are integral).
    pub fn evaluate_i64(&self, values: &[i64]) -> Result<i64, ExprError> {
        Ok(self.evaluate(values)? as i64)
    }

    fn eval_node(&self, node: &Node, values: &[i64]) -> Result<f64, ExprError> {
        match node {
            Node::Const(v) => Ok(*v),
            Node::Var(ix) => {
                let value_ix = self.value_indices[*ix as usize];
                values
                    .get(value_ix)
                    .map(|v| *v as f64)
                    .ok_or_else(|| ExprError::UnknownParameter(self.symbols[*ix as usize].clone()))
            }
            Node::Op(op, children) => {
                let mut args = [0.0f64; 3];
                for (slot, child) in args.iter_mut().zip(children.iter()) {
                    *slot = self.eval_node(child, values)?;
                }
                apply(*op, &args[..children.len()])
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "dynamic({})", self.symbols.join(", ")),
        }
    }
}

fn factorial(n: f64) -> f64 {
    let n = n.round().max(0.0) as u64;
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

fn apply(op: Operator, args: &[f64]) -> Result<f64, ExprError> {
    use Operator::*;
    let a = args[0];
    let b = *args.get(1).unwrap_or(&0.0);
    let result = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => a / b,
        Mod => a % b,
        Pow => a.powf(b),
        Fact => factorial(a),
        Cos => a.cos(),
        Sin => a.sin(),
        Tan => a.tan(),
        Cosh => a.cosh(),
        Sinh => a.sinh(),
        Tanh => a.tanh(),
        Exp => a.exp(),
        Log => a.ln(),
        Log2 => a.log2(),
        Log10 => a.log10(),
        Ceil => a.ceil(),
        Floor => a.floor(),
        Abs => a.abs(),
        Sqrt => a.sqrt(),
        Max => a.max(b),
        Min => a.min(b),
        And => ((a != 0.0) && (b != 0.0)) as i64 as f64,
        Or => ((a != 0.0) || (b != 0.0)) as i64 as f64,
        Greater => (a > b) as i64 as f64,
        GreaterEq => (a >= b) as i64 as f64,
        Less => (a < b) as i64 as f64,
        LessEq => (a <= b) as i64 as f64,
        If => {
            if a != 0.0 {
                b
            } else {
                args[2]
            }
        }
    };
    if result.is_finite() {
        Ok(result)
    } else {
        Err(ExprError::NumericError(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn op(o: Operator) -> RpnToken {
        RpnToken::Op(o)
    }

    #[test]
    fn constant_stream_folds_to_value() {
        // 4 2 * 1 + => 9
        let tokens = [
            RpnToken::literal(4),
            RpnToken::literal(2),
            op(Operator::Mul),
            RpnToken::literal(1),
            op(Operator::Add),
        ];
        let expr = Expression::compile(&tokens, &[]).unwrap();
        assert!(!expr.is_dynamic());
        assert_eq!(expr.value(), Some(9.0));
        assert_eq!(expr.evaluate_i64(&[]).unwrap(), 9);
    }

    #[test]
    fn static_binding_folds_like_a_literal() {
        // n 2 ^ with n = 3 => 9, folded at compile
        let tokens = [RpnToken::param("n"), RpnToken::literal(2), op(Operator::Pow)];
        let expr = Expression::compile(&tokens, &[Binding::Constant("n", 3.0)]).unwrap();
        assert_eq!(expr.value(), Some(9.0));
    }

    #[test]
    fn dynamic_binding_reads_the_value_slice() {
        // p 1 + with p dynamic at value index 2
        let tokens = [RpnToken::param("p"), RpnToken::literal(1), op(Operator::Add)];
        let expr = Expression::compile(&tokens, &[Binding::Dynamic("p", 2)]).unwrap();
        assert!(expr.is_dynamic());
        assert_eq!(expr.value(), None);
        assert_eq!(expr.evaluate_i64(&[0, 0, 41]).unwrap(), 42);
    }

    #[test]
    fn repeated_parameter_shares_one_symbol() {
        // p p * => p^2
        let tokens = [RpnToken::param("p"), RpnToken::param("p"), op(Operator::Mul)];
        let expr = Expression::compile(&tokens, &[Binding::Dynamic("p", 0)]).unwrap();
        assert_eq!(expr.symbols.len(), 1);
        assert_eq!(expr.evaluate_i64(&[5]).unwrap(), 25);
    }

    #[test]
    fn mixed_tree_folds_only_constant_half() {
        // (2 * 3) + p: left operand folds, root stays an Op
        let tokens = [
            RpnToken::literal(2),
            RpnToken::literal(3),
            op(Operator::Mul),
            RpnToken::param("p"),
            op(Operator::Add),
        ];
        let expr = Expression::compile(&tokens, &[Binding::Dynamic("p", 0)]).unwrap();
        assert!(matches!(&expr.root, Node::Op(Operator::Add, children)
            if children[0] == Node::Const(6.0) && children[1] == Node::Var(0)));
        assert_eq!(expr.evaluate_i64(&[4]).unwrap(), 10);
    }

    #[test]
    fn unknown_parameter_is_a_compile_error() {
        let tokens = [RpnToken::param("missing")];
        assert_eq!(
            Expression::compile(&tokens, &[]),
            Err(ExprError::UnknownParameter("missing".into()))
        );
    }

    #[test]
    fn division_by_zero_is_a_numeric_error() {
        let tokens = [RpnToken::literal(1), RpnToken::literal(0), op(Operator::Div)];
        assert_eq!(
            Expression::compile(&tokens, &[]),
            Err(ExprError::NumericError(Operator::Div))
        );
        // Same failure when the zero only shows up at evaluation.
        let tokens = [RpnToken::literal(1), RpnToken::param("p"), op(Operator::Div)];
        let expr = Expression::compile(&tokens, &[Binding::Dynamic("p", 0)]).unwrap();
        assert_eq!(expr.evaluate(&[0]), Err(ExprError::NumericError(Operator::Div)));
    }

    #[test]
    fn comparison_and_if_operators() {
        // p 2 >= 10 20 if => 10 when p >= 2 else 20
        let tokens = [
            RpnToken::param("p"),
            RpnToken::literal(2),
            op(Operator::GreaterEq),
            RpnToken::literal(10),
            RpnToken::literal(20),
            op(Operator::If),
        ];
        let expr = Expression::compile(&tokens, &[Binding::Dynamic("p", 0)]).unwrap();
        assert_eq!(expr.evaluate_i64(&[3]).unwrap(), 10);
        assert_eq!(expr.evaluate_i64(&[1]).unwrap(), 20);
    }

    #[test]
    fn unary_functions_fold() {
        let tokens = [RpnToken::literal(5), op(Operator::Fact)];
        let expr = Expression::compile(&tokens, &[]).unwrap();
        assert_eq!(expr.value(), Some(120.0));
        let tokens = [RpnToken::Literal(9.0), op(Operator::Sqrt)];
        assert_eq!(Expression::compile(&tokens, &[]).unwrap().value(), Some(3.0));
    }

    #[test]
    fn malformed_streams_are_rejected() {
        let tokens = [op(Operator::Add)];
        assert_eq!(
            Expression::compile(&tokens, &[]),
            Err(ExprError::MissingOperand(Operator::Add))
        );
        let tokens = [RpnToken::literal(1), RpnToken::literal(2)];
        assert_eq!(
            Expression::compile(&tokens, &[]),
            Err(ExprError::UnbalancedStack(2))
        );
    }
}
