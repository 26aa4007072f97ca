//! Call schemas: argument names, defaults, and keyword normalisation.

use std::collections::HashMap;

use thiserror::Error;

use crate::tensor::IValue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema `{schema}` takes {expected} arguments, got {actual}")]
    TooManyArguments {
        schema: String,
        expected: usize,
        actual: usize,
    },
    #[error("missing argument `{0}`")]
    MissingArgument(String),
    #[error("unknown keyword argument `{0}`")]
    UnknownKeyword(String),
    #[error("argument `{0}` passed both positionally and as a keyword")]
    DuplicateArgument(String),
    #[error("schema has no leading `self` argument to strip")]
    MissingSelf,
}

/// A named argument with an optional default value.
#[derive(Debug, Clone)]
pub struct Argument {
    name: String,
    default: Option<IValue>,
}

impl Argument {
    pub fn new(name: impl Into<String>) -> Argument {
        Argument {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: IValue) -> Argument {
        Argument {
            name: name.into(),
            default: Some(default),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Positional/keyword signature of a graph entry point.
#[derive(Debug, Clone)]
pub struct FunctionSchema {
    name: String,
    arguments: Vec<Argument>,
}

impl FunctionSchema {
    pub fn new(name: impl Into<String>, arguments: Vec<Argument>) -> FunctionSchema {
        FunctionSchema {
            name: name.into(),
            arguments,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// Returns a copy of this schema without the leading `self` argument.
    pub fn strip_self(&self) -> Result<FunctionSchema, SchemaError> {
        match self.arguments.first() {
            Some(first) if first.name == "self" => Ok(FunctionSchema {
                name: self.name.clone(),
                arguments: self.arguments[1..].to_vec(),
            }),
            _ => Err(SchemaError::MissingSelf),
        }
    }

    /// Merges positional and keyword arguments into positional order,
    /// applying defaults for anything left unbound.
    pub fn check_and_normalize_inputs(
        &self,
        args: &mut Vec<IValue>,
        kwargs: &HashMap<String, IValue>,
    ) -> Result<(), SchemaError> {
        if args.len() > self.arguments.len() {
            return Err(SchemaError::TooManyArguments {
                schema: self.name.clone(),
                expected: self.arguments.len(),
                actual: args.len(),
            });
        }
        for key in kwargs.keys() {
            let position = self
                .arguments
                .iter()
                .position(|argument| &argument.name == key)
                .ok_or_else(|| SchemaError::UnknownKeyword(key.clone()))?;
            if position < args.len() {
                return Err(SchemaError::DuplicateArgument(key.clone()));
            }
        }
        for argument in &self.arguments[args.len()..] {
            let value = kwargs
                .get(&argument.name)
                .cloned()
                .or_else(|| argument.default.clone())
                .ok_or_else(|| SchemaError::MissingArgument(argument.name.clone()))?;
            args.push(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FunctionSchema {
        FunctionSchema::new(
            "forward",
            vec![
                Argument::new("a"),
                Argument::new("b"),
                Argument::with_default("alpha", IValue::Int(1)),
            ],
        )
    }

    #[test]
    fn kwargs_fill_positional_tail() {
        let mut args = vec![IValue::Int(10)];
        let kwargs = HashMap::from([("b".to_owned(), IValue::Int(20))]);
        schema().check_and_normalize_inputs(&mut args, &kwargs).unwrap();
        assert_eq!(args.len(), 3);
        assert!(matches!(args[1], IValue::Int(20)));
        assert!(matches!(args[2], IValue::Int(1)));
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let mut args = vec![];
        let kwargs = HashMap::from([("nope".to_owned(), IValue::Int(0))]);
        let err = schema()
            .check_and_normalize_inputs(&mut args, &kwargs)
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownKeyword("nope".to_owned()));
    }

    #[test]
    fn strip_self_requires_leading_self() {
        let with_self = FunctionSchema::new(
            "forward",
            vec![Argument::new("self"), Argument::new("a")],
        );
        let stripped = with_self.strip_self().unwrap();
        assert_eq!(stripped.arguments().len(), 1);
        assert_eq!(schema().strip_self().unwrap_err(), SchemaError::MissingSelf);
    }
}
