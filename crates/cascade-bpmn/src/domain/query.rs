use jmespath::ast::Ast;

use crate::document;
use crate::EngineError;

/// Evaluates expressions against binary variable documents
pub trait QueryProcessor: Send + Sync {
    /// Evaluate `expression` against `document`.
    ///
    /// Returns `Ok(None)` when the expression cannot be resolved yet, which is
    /// the case whenever it yields null.
    fn evaluate(&self, expression: &str, document: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// The variable an expression reads, if it reads exactly one
    fn root_variable(&self, expression: &str) -> Option<String>;
}

/// Query processor using JMESPath
#[derive(Debug, Default, Clone, Copy)]
pub struct JmesPathQueryProcessor;

impl QueryProcessor for JmesPathQueryProcessor {
    fn evaluate(&self, expression: &str, document: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let compiled = jmespath::compile(expression).map_err(|e| {
            EngineError::ExpressionError(format!(
                "Failed to compile JMESPath expression: {}: {}",
                expression, e
            ))
        })?;

        let context = document::decode_json(document)?;
        let result = compiled.search(&context).map_err(|e| {
            EngineError::ExpressionError(format!(
                "Failed to evaluate JMESPath expression: {}: {}",
                expression, e
            ))
        })?;

        if result.is_null() {
            return Ok(None);
        }

        let value = serde_json::to_value(&*result)?;
        Ok(Some(document::encode_json(&value)?))
    }

    fn root_variable(&self, expression: &str) -> Option<String> {
        let ast = jmespath::parse(expression).ok()?;
        path_root(&ast).map(str::to_string)
    }
}

/// The field a path expression starts from.
///
/// Only the leftmost operand of a sub-expression, projection, flatten or
/// object projection is evaluated against the root document; everything to
/// its right sees the operand's result. Any other node (`||`, `&&`,
/// comparisons, multi-selects, functions, literals, `@`) may read more than
/// one variable.
fn path_root(ast: &Ast) -> Option<&str> {
    match ast {
        Ast::Field { name, .. } => Some(name.as_str()),
        Ast::Subexpr { lhs, .. } | Ast::Projection { lhs, .. } => path_root(lhs),
        Ast::Flatten { node, .. } | Ast::ObjectValues { node, .. } => path_root(node),
        _ => None,
    }
}
