//! Tagged runtime value container moved through the value table.

use std::sync::Arc;

use anyhow::{bail, Result};

use super::tensor::Tensor;

/// A runtime value: the dynamic counterpart of a graph [`Value`](crate::ir::ValueId).
///
/// Tuples are reference-counted aggregates, mirroring how output tuples keep
/// their elements alive until explicitly moved out of the value table.
#[derive(Clone, Debug, Default)]
pub enum IValue {
    #[default]
    None,
    Tensor(Tensor),
    Tuple(Arc<Vec<IValue>>),
    List(Vec<IValue>),
    Int(i64),
    Float(f64),
    Bool(bool),
    IntList(Vec<i64>),
}

impl IValue {
    pub fn is_none(&self) -> bool {
        matches!(self, IValue::None)
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, IValue::Tensor(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, IValue::Tuple(_))
    }

    pub fn is_tensor_list(&self) -> bool {
        match self {
            IValue::List(items) => items.iter().all(IValue::is_tensor),
            _ => false,
        }
    }

    pub fn tuple(elements: Vec<IValue>) -> IValue {
        IValue::Tuple(Arc::new(elements))
    }

    /// Borrows the tensor payload or fails with the value's actual tag.
    pub fn as_tensor(&self) -> Result<&Tensor> {
        match self {
            IValue::Tensor(t) => Ok(t),
            other => bail!("expected tensor, got {}", other.tag_name()),
        }
    }

    pub fn as_tensor_mut(&mut self) -> Result<&mut Tensor> {
        match self {
            IValue::Tensor(t) => Ok(t),
            other => bail!("expected tensor, got {}", other.tag_name()),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            IValue::Int(v) => Ok(*v),
            IValue::Bool(b) => Ok(*b as i64),
            other => bail!("expected int, got {}", other.tag_name()),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            IValue::Bool(b) => Ok(*b),
            IValue::Int(v) => Ok(*v != 0),
            other => bail!("expected bool, got {}", other.tag_name()),
        }
    }

    /// Numeric scalar as f64; integers widen.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            IValue::Float(v) => Ok(*v),
            IValue::Int(v) => Ok(*v as f64),
            other => bail!("expected float, got {}", other.tag_name()),
        }
    }

    /// Optional numeric scalar: `None` maps to Rust `None`.
    pub fn as_optional_float(&self) -> Result<Option<f64>> {
        match self {
            IValue::None => Ok(None),
            other => other.as_float().map(Some),
        }
    }

    pub fn as_int_list(&self) -> Result<Vec<i64>> {
        match self {
            IValue::IntList(items) => Ok(items.clone()),
            IValue::List(items) => items.iter().map(IValue::as_int).collect(),
            other => bail!("expected int list, got {}", other.tag_name()),
        }
    }

    pub fn as_tensor_list(&self) -> Result<Vec<Tensor>> {
        match self {
            IValue::List(items) => items
                .iter()
                .map(|item| item.as_tensor().cloned())
                .collect(),
            other => bail!("expected tensor list, got {}", other.tag_name()),
        }
    }

    pub fn tag_name(&self) -> &'static str {
        match self {
            IValue::None => "None",
            IValue::Tensor(_) => "Tensor",
            IValue::Tuple(_) => "Tuple",
            IValue::List(_) => "List",
            IValue::Int(_) => "Int",
            IValue::Float(_) => "Float",
            IValue::Bool(_) => "Bool",
            IValue::IntList(_) => "IntList",
        }
    }
}

impl From<Tensor> for IValue {
    fn from(t: Tensor) -> Self {
        IValue::Tensor(t)
    }
}

impl From<i64> for IValue {
    fn from(v: i64) -> Self {
        IValue::Int(v)
    }
}

impl From<f64> for IValue {
    fn from(v: f64) -> Self {
        IValue::Float(v)
    }
}

impl From<bool> for IValue {
    fn from(v: bool) -> Self {
        IValue::Bool(v)
    }
}
