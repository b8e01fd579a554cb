//! Graph parameters.

use crate::ParamId;
use core_expr::Expression;

/// Parameter kind. Static values are folded into expressions at compile
/// time; every other kind occupies a slot in the per-firing value table of
/// the graph's handlers.
#[derive(Debug, Clone)]
pub enum ParamKind {
    /// Expression evaluated once at build time.
    Static { value: i64 },
    /// Value assigned by exactly one configuration actor at runtime.
    Dynamic,
    /// Expression over dynamic parameters, recomputed when they resolve.
    DynamicDependent { expr: Expression },
    /// Value copied from a parameter of the parent graph at firing time.
    Inherited { parent: ParamId },
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

impl Param {
    /// True when the value is unknown until runtime resolution.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self.kind, ParamKind::Static { .. })
    }

    /// Static build-time value, if this is a static parameter.
    pub fn static_value(&self) -> Option<i64> {
        match self.kind {
            ParamKind::Static { value } => Some(value),
            _ => None,
        }
    }
}
