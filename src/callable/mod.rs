//! DS-003: Callable loading.
//!
//! A callable slot is filled either by a named symbol in a source unit
//! (`checks.yaml::ok_response`) or by an inline expression
//! (`|response| response.text.includes("ok")`). Exactly one form may be used per slot.
//! Units and compiled handles are cached for the lifetime of one loader, so a
//! unit referenced by several tasks is read and parsed once per build.

pub mod expr;
pub mod source;

use crate::core::error::{BuildError, Result};
use crate::core::types::ParamMap;
use expr::{EvalError, Lambda};
use serde_yaml_ng::Value;
use source::{SourceReader, SourceUnit};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// References
// ============================================================================

/// An unresolved pointer to executable logic, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallableReference {
    /// Named symbol inside a source unit
    Named { location: PathBuf, symbol: String },
    /// Inline single-parameter expression
    Inline(String),
}

impl fmt::Display for CallableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { location, symbol } => write!(f, "{}::{}", location.display(), symbol),
            Self::Inline(src) => f.write_str(src),
        }
    }
}

impl CallableReference {
    /// Parse a reference from a callback value.
    ///
    /// Accepted forms:
    /// - `"<location>::<symbol>"`
    /// - `"|param| body"`
    /// - `{file: <location>, name: <symbol>}`
    /// - `{expr: "|param| body"}`
    pub fn from_value(owner: &str, slot: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => Self::from_text(slot, text),
            Value::Mapping(map) => {
                let field = |key: &str| -> Result<Option<String>> {
                    match map.get(key) {
                        None | Some(Value::Null) => Ok(None),
                        Some(Value::String(s)) => Ok(Some(s.clone())),
                        Some(_) => Err(BuildError::invalid(
                            format!("{slot}.{key}"),
                            "expected a string",
                        )),
                    }
                };
                Self::from_parts(
                    owner,
                    slot,
                    field("file")?,
                    field("name")?,
                    field("expr")?,
                    &[format!("{slot}.file").as_str(), format!("{slot}.name").as_str()],
                )
            }
            other => Err(BuildError::callable(
                slot,
                format!(
                    "expected a string or a mapping, found {}",
                    value_kind(other)
                ),
            )),
        }
    }

    /// Take `<slot>_file`, `<slot>_name` and `<slot>_expr` out of `params`.
    ///
    /// Returns `None` when none of the three keys is present.
    pub fn take_slot_params(owner: &str, slot: &str, params: &mut ParamMap) -> Result<Option<Self>> {
        let file_key = format!("{slot}_file");
        let name_key = format!("{slot}_name");
        let expr_key = format!("{slot}_expr");

        let mut take = |key: &str| -> Result<Option<String>> {
            match params.shift_remove(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s)),
                Some(_) => Err(BuildError::invalid(key, "expected a string")),
            }
        };
        let file = take(&file_key)?;
        let name = take(&name_key)?;
        let expr = take(&expr_key)?;

        if file.is_none() && name.is_none() && expr.is_none() {
            return Ok(None);
        }
        Self::from_parts(owner, slot, file, name, expr, &[file_key.as_str(), name_key.as_str()]).map(Some)
    }

    fn from_text(slot: &str, text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.starts_with('|') {
            return Ok(Self::Inline(trimmed.to_string()));
        }
        match trimmed.rsplit_once("::") {
            Some((location, symbol)) if !location.is_empty() && !symbol.is_empty() => {
                Ok(Self::Named {
                    location: PathBuf::from(location),
                    symbol: symbol.to_string(),
                })
            }
            _ => Err(BuildError::callable(
                slot,
                format!("'{trimmed}' is neither '<location>::<symbol>' nor an inline '|arg| ...' expression"),
            )),
        }
    }

    fn from_parts(
        owner: &str,
        slot: &str,
        file: Option<String>,
        name: Option<String>,
        expr: Option<String>,
        named_keys: &[&str; 2],
    ) -> Result<Self> {
        match (file, name, expr) {
            (None, None, Some(src)) => Ok(Self::Inline(src.trim().to_string())),
            (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => Err(BuildError::AmbiguousCallable {
                owner: owner.to_string(),
                slot: slot.to_string(),
            }),
            (Some(location), Some(symbol), None) => Ok(Self::Named {
                location: PathBuf::from(location),
                symbol,
            }),
            (file, name, None) => {
                let mut missing = Vec::new();
                if file.is_none() {
                    missing.push(named_keys[0].to_string());
                }
                if name.is_none() {
                    missing.push(named_keys[1].to_string());
                }
                Err(BuildError::MissingParameter {
                    task_id: owner.to_string(),
                    params: missing,
                })
            }
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

// ============================================================================
// Resolved callables
// ============================================================================

/// A resolved, invocable handle.
#[derive(Clone)]
pub struct Callable {
    lambda: Arc<Lambda>,
    origin: CallableReference,
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("origin", &self.origin.to_string())
            .field("source", &self.lambda.source())
            .finish()
    }
}

impl Callable {
    /// Invoke with one argument.
    pub fn call(&self, arg: &Value) -> std::result::Result<Value, EvalError> {
        self.lambda.call(arg)
    }

    /// Invoke and interpret the result as a predicate.
    pub fn test(&self, arg: &Value) -> std::result::Result<bool, EvalError> {
        self.lambda.test(arg)
    }

    pub fn origin(&self) -> &CallableReference {
        &self.origin
    }

    /// Expression text backing this handle.
    pub fn source(&self) -> &str {
        self.lambda.source()
    }

    /// Whether two handles share one compiled body.
    pub fn same_handle(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.lambda, &other.lambda)
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Resolves references to handles, caching units and handles per build.
pub struct CallableLoader<'a> {
    reader: &'a dyn SourceReader,
    root: Option<&'a Path>,
    units: HashMap<PathBuf, Arc<SourceUnit>>,
    handles: HashMap<(PathBuf, String), Callable>,
}

impl<'a> CallableLoader<'a> {
    pub fn new(reader: &'a dyn SourceReader, root: Option<&'a Path>) -> Self {
        Self {
            reader,
            root,
            units: HashMap::new(),
            handles: HashMap::new(),
        }
    }

    /// Resolve `reference` for `slot`.
    pub fn load(&mut self, slot: &str, reference: &CallableReference) -> Result<Callable> {
        match reference {
            CallableReference::Inline(src) => {
                let lambda = expr::compile(src)
                    .map_err(|e| BuildError::callable(slot, format!("inline expression: {e}")))?;
                Ok(Callable {
                    lambda: Arc::new(lambda),
                    origin: reference.clone(),
                })
            }
            CallableReference::Named { location, symbol } => {
                let path = self.locate(location);
                let key = (path.clone(), symbol.clone());
                if let Some(handle) = self.handles.get(&key) {
                    tracing::debug!(slot, symbol = %symbol, "callable cache hit");
                    return Ok(handle.clone());
                }

                let unit = self.unit(&path).map_err(|r| BuildError::callable(slot, r))?;
                let text = unit
                    .expression(symbol)
                    .map_err(|r| BuildError::callable(slot, r))?;
                let lambda = expr::compile(text).map_err(|e| {
                    BuildError::callable(
                        slot,
                        format!("symbol '{}' in {}: {}", symbol, path.display(), e),
                    )
                })?;
                let handle = Callable {
                    lambda: Arc::new(lambda),
                    origin: reference.clone(),
                };
                tracing::debug!(slot, location = %path.display(), symbol = %symbol, "loaded callable");
                self.handles.insert(key, handle.clone());
                Ok(handle)
            }
        }
    }

    /// Fill a task-kind callable slot from task parameters, removing the slot keys.
    pub fn bind_slot(
        &mut self,
        task_id: &str,
        slot: &str,
        required: bool,
        params: &mut ParamMap,
    ) -> Result<Option<Callable>> {
        match CallableReference::take_slot_params(task_id, slot, params)? {
            Some(reference) => self.load(slot, &reference).map(Some),
            None if required => Err(BuildError::MissingParameter {
                task_id: task_id.to_string(),
                params: vec![format!("{slot}_name"), format!("{slot}_expr")],
            }),
            None => Ok(None),
        }
    }

    /// Number of source units read so far.
    pub fn units_loaded(&self) -> usize {
        self.units.len()
    }

    fn locate(&self, location: &Path) -> PathBuf {
        match self.root {
            Some(root) if location.is_relative() => root.join(location),
            _ => location.to_path_buf(),
        }
    }

    fn unit(&mut self, path: &Path) -> std::result::Result<Arc<SourceUnit>, String> {
        if let Some(unit) = self.units.get(path) {
            return Ok(Arc::clone(unit));
        }
        let unit = Arc::new(SourceUnit::load(self.reader, path)?);
        self.units.insert(path.to_path_buf(), Arc::clone(&unit));
        Ok(unit)
    }
}

// ============================================================================
// Tests
// ============================================================================
