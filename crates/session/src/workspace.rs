//! Base-workspace variables of a session.

use std::sync::Arc;

use enginelink_transport::{
    ASSIGN_FUNCTION, GET_VARIABLE_FUNCTION, SharedBuffer, SinkRef, Value, failure_ids,
};

use crate::error::{EngineError, Result};
use crate::function::CallOptions;
use crate::handle::EngineHandle;

const MAX_IDENTIFIER_LEN: usize = 63;

const KEYWORDS: &[&str] = &[
    "break",
    "case",
    "catch",
    "classdef",
    "continue",
    "else",
    "elseif",
    "end",
    "for",
    "function",
    "global",
    "if",
    "otherwise",
    "parfor",
    "persistent",
    "return",
    "spmd",
    "switch",
    "try",
    "while",
];

/// Whether `name` can name a workspace variable.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= MAX_IDENTIFIER_LEN
        && !KEYWORDS.contains(&name)
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::InvalidArgument(
            "variable name must not be empty".to_string(),
        ));
    }
    if !is_valid_identifier(name) {
        return Err(EngineError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// View of the base workspace, borrowed from its [`EngineHandle`].
#[derive(Debug, Clone, Copy)]
pub struct Workspace<'e> {
    engine: &'e EngineHandle,
}

impl<'e> Workspace<'e> {
    pub(crate) fn new(engine: &'e EngineHandle) -> Self {
        Self { engine }
    }

    /// Read variable `name`.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.engine.require_live()?;
        check_name(name)?;
        let options = CallOptions::default().nargout(1);
        self.engine
            .function(GET_VARIABLE_FUNCTION)
            .invoke(vec![Value::from(name)], options)
            .and_then(|dispatched| dispatched.resolve())
            .map_err(|err| match err {
                EngineError::RemoteExecution { ref identifier, .. }
                    if identifier == failure_ids::UNDEFINED_VARIABLE =>
                {
                    EngineError::VariableNotFound(name.to_string())
                }
                other => other,
            })
    }

    /// Assign `value` to variable `name`.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.engine.require_live()?;
        check_name(name)?;
        let options = CallOptions::default().nargout(0);
        self.engine
            .function(ASSIGN_FUNCTION)
            .invoke(
                vec![Value::from("base"), Value::from(name), value.into()],
                options,
            )?
            .resolve()?;
        Ok(())
    }

    /// Listing of the workspace as printed by the engine's `whos`.
    pub fn describe(&self) -> Result<String> {
        let buf = SharedBuffer::new();
        let sink: SinkRef = Arc::new(buf.clone());
        let options = CallOptions::default().nargout(0).stdout(sink);
        self.engine
            .function("whos")
            .invoke(Vec::new(), options)?
            .resolve()?;
        Ok(buf.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_rules() {
        assert!(is_valid_identifier("x"));
        assert!(is_valid_identifier("abc_12"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("_x"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier("for"));
        assert!(!is_valid_identifier(""));
        assert!(is_valid_identifier(&"a".repeat(63)));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn empty_name_is_an_argument_error() {
        assert_eq!(
            check_name("").unwrap_err().kind(),
            crate::ErrorKind::InvalidArgument
        );
        assert_eq!(
            check_name("end").unwrap_err().kind(),
            crate::ErrorKind::InvalidIdentifier
        );
    }
}
