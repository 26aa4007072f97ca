//! Compact textual graph format used by fusion patterns and tests.
//!
//! The syntax mirrors the printed form of the IR:
//!
//! ```text
//! graph(%a, %b):
//!   %alpha : int = prim::Constant[value=1]()
//!   %c : Tensor = aten::add(%a, %b, %alpha)
//!   return (%c)
//! ```
//!
//! Types are optional and default to `Tensor`. `prim::Constant` nodes carry
//! their payload in a `[value=...]` attribute (int, float, bool, int list, or
//! absent for `None`).

use std::collections::HashMap;

use thiserror::Error;

use crate::tensor::IValue;

use super::graph::{Graph, TypeKind, ValueId};
use super::symbol::{kinds, Symbol};

/// Errors raised while parsing the textual graph format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextIrError {
    #[error("{0}")]
    Message(String),
}

impl TextIrError {
    fn new(msg: impl Into<String>) -> Self {
        TextIrError::Message(msg.into())
    }
}

/// Parses a graph described in the textual format.
///
/// # Example
/// ```
/// use staticrt::ir::parse_graph;
///
/// let graph = parse_graph(
///     r#"
///     graph(%a, %b):
///       %c = aten::mul(%a, %b)
///       return (%c)
///     "#,
/// )
/// .expect("valid graph");
/// assert_eq!(graph.inputs().len(), 2);
/// assert_eq!(graph.node_count(), 1);
/// ```
pub fn parse_graph(src: &str) -> Result<Graph, TextIrError> {
    Parser::new(src).parse()
}

struct Parser<'a> {
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Parser { source }
    }

    fn parse(&self) -> Result<Graph, TextIrError> {
        let mut graph = Graph::new();
        let mut env: HashMap<String, ValueId> = HashMap::new();
        let mut saw_header = false;
        let mut saw_return = false;

        for raw_line in self.source.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            if !saw_header {
                self.parse_header(line, &mut graph, &mut env)?;
                saw_header = true;
            } else if let Some(rest) = line.strip_prefix("return") {
                self.parse_return(rest.trim(), &mut graph, &env)?;
                saw_return = true;
            } else {
                if saw_return {
                    return Err(TextIrError::new("statement after return"));
                }
                self.parse_statement(line, &mut graph, &mut env)?;
            }
        }

        if !saw_header {
            return Err(TextIrError::new("input is empty"));
        }
        if !saw_return {
            return Err(TextIrError::new("missing return statement"));
        }
        Ok(graph)
    }

    fn parse_header(
        &self,
        line: &str,
        graph: &mut Graph,
        env: &mut HashMap<String, ValueId>,
    ) -> Result<(), TextIrError> {
        let rest = line
            .strip_prefix("graph(")
            .ok_or_else(|| TextIrError::new("graph must start with `graph(`"))?;
        let rest = rest
            .strip_suffix("):")
            .ok_or_else(|| TextIrError::new("graph header must end with `):`"))?;
        for part in split_top_level(rest) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, ty) = parse_typed_value(part)?;
            let ty = match ty {
                TypeKind::Other(marker) if marker == "?" => TypeKind::Tensor,
                declared => declared,
            };
            let v = graph.add_input(Some(name.clone()), ty);
            env.insert(name, v);
        }
        Ok(())
    }

    fn parse_return(
        &self,
        rest: &str,
        graph: &mut Graph,
        env: &HashMap<String, ValueId>,
    ) -> Result<(), TextIrError> {
        let inner = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| TextIrError::new("return expects a parenthesised value list"))?;
        for part in split_top_level(inner) {
            let name = parse_value_name(part.trim())?;
            let v = lookup(env, &name)?;
            graph.register_output(v);
        }
        Ok(())
    }

    fn parse_statement(
        &self,
        line: &str,
        graph: &mut Graph,
        env: &mut HashMap<String, ValueId>,
    ) -> Result<(), TextIrError> {
        let (lhs, rhs) = line
            .split_once('=')
            .ok_or_else(|| TextIrError::new(format!("expected `=` in statement: {line}")))?;

        let mut out_names = Vec::new();
        let mut out_types = Vec::new();
        for part in split_top_level(lhs.trim()) {
            let (name, ty) = parse_typed_value(part.trim())?;
            out_names.push(name);
            out_types.push(ty);
        }

        let rhs = rhs.trim();
        let open = rhs
            .find('(')
            .ok_or_else(|| TextIrError::new(format!("expected `(` in expression: {rhs}")))?;
        let close = rhs
            .rfind(')')
            .ok_or_else(|| TextIrError::new(format!("expected `)` in expression: {rhs}")))?;
        let head = &rhs[..open];
        let args_src = &rhs[open + 1..close];

        let (kind_str, attr) = match head.split_once('[') {
            Some((kind, attr)) => {
                let attr = attr
                    .strip_suffix(']')
                    .ok_or_else(|| TextIrError::new("unterminated attribute"))?;
                (kind.trim(), Some(attr.trim()))
            }
            None => (head.trim(), None),
        };
        let kind = Symbol::intern(kind_str);

        let mut inputs = Vec::new();
        for part in split_top_level(args_src) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let name = parse_value_name(part)?;
            inputs.push(lookup(env, &name)?);
        }

        let payload = if kind == kinds::constant() {
            Some(parse_constant_value(attr)?)
        } else {
            if attr.is_some() {
                return Err(TextIrError::new("attributes only allowed on prim::Constant"));
            }
            None
        };

        // Untyped outputs get an inferred type: constants from their payload,
        // aggregates from their element types, everything else Tensor.
        let inferred: Vec<TypeKind> = out_types
            .iter()
            .enumerate()
            .map(|(slot, ty)| match ty {
                TypeKind::Other(marker) if marker == "?" => {
                    infer_output_type(graph, kind, &inputs, payload.as_ref(), slot)
                }
                declared => declared.clone(),
            })
            .collect();

        let node = graph.add_node(kind, &inputs, &inferred);
        if let Some(value) = payload {
            graph.set_node_ival(node, value);
        }
        let outputs: Vec<ValueId> = graph.node_outputs(node).to_vec();
        for (name, v) in out_names.iter().zip(outputs) {
            graph.set_value_name(v, name.clone());
            env.insert(name.clone(), v);
        }
        Ok(())
    }
}

fn infer_output_type(
    graph: &Graph,
    kind: Symbol,
    inputs: &[ValueId],
    payload: Option<&IValue>,
    _slot: usize,
) -> TypeKind {
    if kind == kinds::constant() {
        return match payload {
            Some(IValue::Int(_)) => TypeKind::Int,
            Some(IValue::Float(_)) => TypeKind::Float,
            Some(IValue::Bool(_)) => TypeKind::Bool,
            Some(IValue::IntList(_)) => TypeKind::IntList,
            Some(IValue::None) | None => TypeKind::NoneType,
            _ => TypeKind::Tensor,
        };
    }
    if kind == kinds::tuple_construct() {
        return TypeKind::Tuple(
            inputs
                .iter()
                .map(|v| graph.value_type(*v).clone())
                .collect(),
        );
    }
    if kind == kinds::list_construct() {
        let all_tensor = inputs
            .iter()
            .all(|v| matches!(graph.value_type(*v), TypeKind::Tensor));
        return if all_tensor && !inputs.is_empty() {
            TypeKind::TensorList
        } else {
            TypeKind::IntList
        };
    }
    TypeKind::Tensor
}

fn lookup(env: &HashMap<String, ValueId>, name: &str) -> Result<ValueId, TextIrError> {
    env.get(name)
        .copied()
        .ok_or_else(|| TextIrError::new(format!("use of undefined value %{name}")))
}

fn parse_value_name(part: &str) -> Result<String, TextIrError> {
    part.strip_prefix('%')
        .map(str::to_owned)
        .ok_or_else(|| TextIrError::new(format!("expected %value, got `{part}`")))
}

/// Parses `%name` or `%name : Type`; untyped values get a marker resolved by
/// type inference.
fn parse_typed_value(part: &str) -> Result<(String, TypeKind), TextIrError> {
    match part.split_once(':') {
        Some((name, ty)) => Ok((parse_value_name(name.trim())?, parse_type(ty.trim())?)),
        None => Ok((
            parse_value_name(part)?,
            TypeKind::Other("?".to_owned()),
        )),
    }
}

fn parse_type(src: &str) -> Result<TypeKind, TextIrError> {
    let src = src.trim();
    if let Some(inner) = src.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        let elements = split_top_level(inner)
            .into_iter()
            .map(|p| parse_type(p.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(TypeKind::Tuple(elements));
    }
    Ok(match src {
        "Tensor" => TypeKind::Tensor,
        "Tensor[]" => TypeKind::TensorList,
        "int" => TypeKind::Int,
        "float" => TypeKind::Float,
        "bool" => TypeKind::Bool,
        "int[]" => TypeKind::IntList,
        "None" => TypeKind::NoneType,
        "Module" => TypeKind::Module,
        other => TypeKind::Other(other.to_owned()),
    })
}

fn parse_constant_value(attr: Option<&str>) -> Result<IValue, TextIrError> {
    let Some(attr) = attr else {
        return Ok(IValue::None);
    };
    let value = attr
        .strip_prefix("value=")
        .ok_or_else(|| TextIrError::new(format!("expected value= attribute, got `{attr}`")))?
        .trim();
    if value == "None" {
        return Ok(IValue::None);
    }
    if value == "true" || value == "false" {
        return Ok(IValue::Bool(value == "true"));
    }
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|_| TextIrError::new(format!("invalid int list element `{s}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(IValue::IntList(items));
    }
    if let Ok(int) = value.parse::<i64>() {
        return Ok(IValue::Int(int));
    }
    if let Ok(float) = value.parse::<f64>() {
        return Ok(IValue::Float(float));
    }
    Err(TextIrError::new(format!("invalid constant value `{value}`")))
}

/// Splits on commas that are not nested inside brackets or parentheses.
fn split_top_level(src: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in src.char_indices() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&src[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < src.len() {
        parts.push(&src[start..]);
    }
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Prints a graph in the textual format accepted by [`parse_graph`].
pub fn print_graph(graph: &Graph) -> String {
    let mut out = String::new();
    let name_of = |v: ValueId| -> String {
        match graph.value_name(v) {
            Some(name) => format!("%{name}"),
            None => format!("%v{}", v.0),
        }
    };
    out.push_str("graph(");
    let inputs: Vec<String> = graph
        .inputs()
        .iter()
        .map(|&v| format!("{} : {}", name_of(v), graph.value_type(v)))
        .collect();
    out.push_str(&inputs.join(", "));
    out.push_str("):\n");
    for node in graph.nodes() {
        let outputs: Vec<String> = graph
            .node_outputs(node)
            .iter()
            .map(|&v| format!("{} : {}", name_of(v), graph.value_type(v)))
            .collect();
        let attr = match graph.node_ival(node) {
            Some(value) if graph.kind(node) == kinds::constant() => {
                format!("[value={}]", print_ival(value))
            }
            _ => String::new(),
        };
        let args: Vec<String> = graph
            .node_inputs(node)
            .iter()
            .map(|&v| name_of(v))
            .collect();
        out.push_str(&format!(
            "  {} = {}{}({})\n",
            outputs.join(", "),
            graph.kind(node),
            attr,
            args.join(", ")
        ));
    }
    let rets: Vec<String> = graph.outputs().iter().map(|&v| name_of(v)).collect();
    out.push_str(&format!("  return ({})\n", rets.join(", ")));
    out
}

fn print_ival(value: &IValue) -> String {
    match value {
        IValue::None => "None".to_owned(),
        IValue::Int(v) => v.to_string(),
        IValue::Float(v) => format!("{v:?}"),
        IValue::Bool(v) => v.to_string(),
        IValue::IntList(items) => format!(
            "[{}]",
            items
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        other => format!("<{}>", other.tag_name()),
    }
}
