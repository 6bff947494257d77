//! FHIRPath: parser, compiler and evaluator over the `fhirkit-values`
//! element model (spec component D/E — the expression tree and its
//! compiler). `fhirkit-model::Repository` is used only for `is`/`as`/
//! `ofType` type resolution; `fhirkit-slicing` and `fhirkit-validator`
//! build on top of this crate rather than the other way around.

pub mod ast;
pub mod compiler;
pub mod context;
pub mod error;
pub mod expr;
pub mod lexer;
pub mod parser;
pub mod token;

pub use compiler::compile;
pub use context::{ConformsToChecker, EvalContext, ReferenceResolverHook};
pub use error::{Error, Result};
pub use expr::{choice_aware_children, is_derived_from, Expr, Expression};

use fhirkit_values::{Collection, Element};

/// Convenience entrypoint: compile `source` and evaluate it once against
/// `root`, with `root` bound as both the evaluation input and `%context`.
pub fn evaluate(source: &str, root: &Element) -> Result<Collection> {
    let expr = compile(source)?;
    let ctx = EvalContext::new(root.clone());
    expr.eval(&ctx, &Collection::singleton(root.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_model::JsonNode;

    fn element_from_json(text: &str) -> Element {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        Element::structured(JsonNode::new(value))
    }

    #[test]
    fn evaluate_simple_path_over_json() {
        let root = element_from_json(r#"{"resourceType":"Patient","active":true,"name":[{"family":"Smith"}]}"#);
        let result = evaluate("Patient.name.family", &root).unwrap();
        assert_eq!(result.single().unwrap().as_string().unwrap(), "Smith");
    }

    #[test]
    fn evaluate_exists_and_where() {
        let root = element_from_json(
            r#"{"resourceType":"Patient","name":[{"use":"official","family":"A"},{"use":"nickname","family":"B"}]}"#,
        );
        let result = evaluate("Patient.name.where(use = 'official').family", &root).unwrap();
        assert_eq!(result.single().unwrap().as_string().unwrap(), "A");
    }

    #[test]
    fn evaluate_three_valued_exists() {
        let root = element_from_json(r#"{"resourceType":"Patient"}"#);
        let result = evaluate("Patient.name.exists()", &root).unwrap();
        assert!(!result.single().unwrap().as_bool().unwrap());
    }
}
