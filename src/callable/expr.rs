//! DS-003b: Inline expressions for callable slots.
//!
//! An inline callable is written `|param| body`, where `body` is a JavaScript
//! expression: `|response| response.text.includes("ok")` or `|res| res > 0`.
//! Compilation parses `(param) => (body)` with boa and walks the AST; the body
//! may reference its declared parameter and nothing else, so a compiled
//! expression captures nothing from its host. Each invocation runs in a fresh
//! boa context with loop and recursion limits.
//!
//! Arguments and results cross the boundary as JSON, mapped from and to
//! `serde_yaml_ng::Value`, the same dynamic type task parameters use.

use boa_engine::ast::expression::access::{PropertyAccess, PropertyAccessField};
use boa_engine::ast::expression::literal::Literal;
use boa_engine::ast::expression::{Expression, Identifier};
use boa_engine::ast::scope::Scope;
use boa_engine::ast::visitor::{VisitWith, Visitor};
use boa_engine::interner::{Interner, Sym};
use boa_engine::parser::Parser;
use boa_engine::{Context, JsValue, Source};
use serde_yaml_ng::Value;
use std::fmt;
use std::ops::ControlFlow;
use thiserror::Error;

/// Longest accepted expression, header included.
pub const MAX_SOURCE_LEN: usize = 4096;

/// Deepest accepted bracket nesting in a body.
pub const MAX_NESTING: usize = 64;

/// Most opening brackets accepted in a body.
pub const MAX_BRACKETS: usize = 256;

const LOOP_ITERATION_LIMIT: u64 = 100_000;
const RECURSION_LIMIT: usize = 64;

/// Identifiers that are always in scope besides the parameter.
const VALUE_GLOBALS: &[&str] = &["undefined", "NaN", "Infinity"];

/// Property names that reach the prototype chain.
const FORBIDDEN_PROPERTIES: &[&str] = &["__proto__", "constructor", "prototype"];

/// Compile-time failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("expected '|param| body'")]
    MissingHeader,

    #[error("parameter list {0}")]
    Parameter(String),

    #[error("expression is {actual} bytes, limit is {max}")]
    TooLong { max: usize, actual: usize },

    #[error("nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("more than {0} brackets")]
    TooManyBrackets(usize),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown identifier '{name}': only '{param}' is in scope")]
    OutOfScope { name: String, param: String },

    #[error("{0} is not allowed")]
    Forbidden(String),
}

/// Failure while evaluating a compiled expression against an argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("argument cannot be passed to an expression: {0}")]
    Argument(String),

    #[error("expression raised: {0}")]
    Raised(String),

    #[error("expression result cannot be returned: {0}")]
    Output(String),
}

/// A compiled single-parameter expression.
#[derive(Clone, PartialEq, Eq)]
pub struct Lambda {
    param: String,
    source: String,
    program: String,
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda").field("source", &self.source).finish()
    }
}

impl Lambda {
    /// The declared parameter name.
    pub fn param(&self) -> &str {
        &self.param
    }

    /// The source text this lambda was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the body with `arg` bound to the parameter.
    ///
    /// `undefined` and non-finite numbers come back as null.
    pub fn call(&self, arg: &Value) -> Result<Value, EvalError> {
        let script = format!("JSON.stringify([{}({})])", self.program, argument(arg)?);
        let text = evaluate(&script, |value| {
            value.as_string().map(|s| s.to_std_string_escaped())
        })?
        .ok_or_else(|| EvalError::Output("result is not serializable".to_string()))?;

        let mut items: Vec<serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| EvalError::Output(e.to_string()))?;
        let result = items.pop().unwrap_or(serde_json::Value::Null);
        serde_yaml_ng::to_value(result).map_err(|e| EvalError::Output(e.to_string()))
    }

    /// Evaluate the body and coerce the result to a boolean the way the
    /// expression language does (`0`, `""`, `null`, `NaN` are false).
    pub fn test(&self, arg: &Value) -> Result<bool, EvalError> {
        let script = format!("!!{}({})", self.program, argument(arg)?);
        evaluate(&script, JsValue::as_boolean)?
            .ok_or_else(|| EvalError::Output("predicate did not yield a boolean".to_string()))
    }
}

/// Compile `|param| body` into a [`Lambda`].
pub fn compile(src: &str) -> Result<Lambda, ExprError> {
    let src = src.trim();
    if src.len() > MAX_SOURCE_LEN {
        return Err(ExprError::TooLong {
            max: MAX_SOURCE_LEN,
            actual: src.len(),
        });
    }
    let (param, body) = split_header(src)?;
    check_nesting(body)?;

    let program = format!("(({param}) => ({body}))");
    let mut interner = Interner::default();
    let script = Parser::new(Source::from_bytes(&program))
        .parse_script(&Scope::new_global(), &mut interner)
        .map_err(|e| ExprError::Syntax(e.to_string()))?;
    if script.statements().statements().len() != 1 {
        return Err(ExprError::Syntax("body must be a single expression".to_string()));
    }

    let mut check = ScopeCheck {
        interner: &interner,
        param,
        functions: 0,
    };
    if let ControlFlow::Break(err) = check.visit_script(&script) {
        return Err(err);
    }

    Ok(Lambda {
        param: param.to_string(),
        source: src.to_string(),
        program,
    })
}

fn split_header(src: &str) -> Result<(&str, &str), ExprError> {
    let rest = src.strip_prefix('|').ok_or(ExprError::MissingHeader)?;
    let (params, body) = rest.split_once('|').ok_or(ExprError::MissingHeader)?;
    let param = params.trim();
    if param.is_empty() {
        return Err(ExprError::Parameter("declares no parameter, found none".to_string()));
    }
    if param.contains(',') {
        return Err(ExprError::Parameter(format!("'{param}' declares several parameters")));
    }
    let mut chars = param.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if !valid {
        return Err(ExprError::Parameter(format!("'{param}' is not an identifier")));
    }
    if body.trim().is_empty() {
        return Err(ExprError::Syntax("empty body".to_string()));
    }
    Ok((param, body))
}

/// Reject bodies whose bracket nesting could exhaust the parser's stack.
///
/// Every opening bracket counts, closing brackets only outside quotes, so text
/// inside literals can raise the estimate but never lower it.
fn check_nesting(body: &str) -> Result<(), ExprError> {
    let mut depth = 0usize;
    let mut opened = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in body.chars() {
        if matches!(c, '(' | '[' | '{') {
            depth += 1;
            opened += 1;
            if depth > MAX_NESTING {
                return Err(ExprError::TooDeep(MAX_NESTING));
            }
            if opened > MAX_BRACKETS {
                return Err(ExprError::TooManyBrackets(MAX_BRACKETS));
            }
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

// ============================================================================
// Scope check
// ============================================================================

struct ScopeCheck<'a> {
    interner: &'a Interner,
    param: &'a str,
    functions: usize,
}

impl ScopeCheck<'_> {
    fn name(&self, sym: Sym) -> String {
        self.interner
            .resolve(sym)
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    fn property(&self, sym: Sym) -> ControlFlow<ExprError> {
        let name = self.name(sym);
        if FORBIDDEN_PROPERTIES.contains(&name.as_str()) {
            return ControlFlow::Break(ExprError::Forbidden(format!("property '{name}'")));
        }
        ControlFlow::Continue(())
    }
}

impl<'ast> Visitor<'ast> for ScopeCheck<'_> {
    type BreakTy = ExprError;

    fn visit_expression(&mut self, node: &'ast Expression) -> ControlFlow<Self::BreakTy> {
        match node {
            Expression::This => {
                return ControlFlow::Break(ExprError::Forbidden("'this'".to_string()));
            }
            Expression::Optional(_) => {
                return ControlFlow::Break(ExprError::Forbidden("optional chaining".to_string()));
            }
            Expression::ArrowFunction(_) => {
                // The first arrow is the wrapper around the body
                self.functions += 1;
                if self.functions > 1 {
                    return ControlFlow::Break(ExprError::Forbidden(
                        "a nested function".to_string(),
                    ));
                }
            }
            _ => {}
        }
        node.visit_with(self)
    }

    fn visit_identifier(&mut self, node: &'ast Identifier) -> ControlFlow<Self::BreakTy> {
        let name = self.name(node.sym());
        if name == self.param || VALUE_GLOBALS.contains(&name.as_str()) {
            return ControlFlow::Continue(());
        }
        ControlFlow::Break(ExprError::OutOfScope {
            name,
            param: self.param.to_string(),
        })
    }

    fn visit_property_access(&mut self, node: &'ast PropertyAccess) -> ControlFlow<Self::BreakTy> {
        if let PropertyAccess::Simple(simple) = node {
            let checked = match simple.field() {
                PropertyAccessField::Const(sym) => self.property(*sym),
                PropertyAccessField::Expr(field) => match field.as_ref() {
                    Expression::Literal(Literal::String(sym)) => self.property(*sym),
                    Expression::Literal(_) => ControlFlow::Continue(()),
                    _ => ControlFlow::Break(ExprError::Forbidden(
                        "a computed property name".to_string(),
                    )),
                },
            };
            if checked.is_break() {
                return checked;
            }
        }
        node.visit_with(self)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// The argument as a `JSON.parse` call.
fn argument(arg: &Value) -> Result<String, EvalError> {
    let json = serde_json::to_string(arg).map_err(|e| EvalError::Argument(e.to_string()))?;
    Ok(format!(
        "JSON.parse('{}')",
        json.replace('\\', "\\\\").replace('\'', "\\'")
    ))
}

/// Run `script` in a fresh context and extract its completion value.
fn evaluate<T>(script: &str, extract: impl FnOnce(&JsValue) -> Option<T>) -> Result<Option<T>, EvalError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
    context.runtime_limits_mut().set_recursion_limit(RECURSION_LIMIT);

    let value = context
        .eval(Source::from_bytes(script))
        .map_err(|e| EvalError::Raised(e.to_string()))?;
    Ok(extract(&value))
}

// ============================================================================
// Tests
// ============================================================================
