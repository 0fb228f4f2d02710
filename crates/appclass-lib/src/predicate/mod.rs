//! Predicate evaluation
//!
//! Predicates are compiled once per pass and then evaluated against the
//! attributes of each workload unit. Evaluation is pure: no clock, no I/O,
//! and attributes an expression does not find evaluate to `absent`.

mod eval;
mod parser;

pub use parser::{parse, Ast, CmpOp, Expr, Operand, ParseError};

use crate::error::PredicateCompileError;
use crate::models::{Predicate, WorkloadAttributes};
use std::collections::BTreeMap;

/// Outcome of evaluating one predicate against one workload unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Affinity score, only present on a match with a numeric score clause
    pub score: Option<f64>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            score: None,
        }
    }
}

/// A predicate whose expression has been parsed
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    name: String,
    ast: Ast,
}

impl CompiledPredicate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, attrs: &WorkloadAttributes) -> MatchResult {
        if !eval::eval_expr(&self.ast.condition, attrs) {
            return MatchResult::no_match();
        }

        MatchResult {
            matched: true,
            score: eval::eval_score(&self.ast, attrs),
        }
    }
}

/// Compile a single predicate
pub fn compile(predicate: &Predicate) -> Result<CompiledPredicate, PredicateCompileError> {
    parse(&predicate.expression)
        .map(|ast| CompiledPredicate {
            name: predicate.name.clone(),
            ast,
        })
        .map_err(|e| PredicateCompileError {
            predicate: predicate.name.clone(),
            fragment: e.fragment,
            reason: e.reason,
        })
}

/// Compiled predicates of one specification, keyed by name
pub type PredicateSet = BTreeMap<String, CompiledPredicate>;

/// Compile every predicate, collecting all compile errors rather than the first
pub fn compile_all(predicates: &[Predicate]) -> Result<PredicateSet, Vec<PredicateCompileError>> {
    let mut compiled = PredicateSet::new();
    let mut errors = Vec::new();

    for predicate in predicates {
        match compile(predicate) {
            Ok(p) => {
                compiled.insert(predicate.name.clone(), p);
            }
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(compiled)
    } else {
        Err(errors)
    }
}

/// Compile and evaluate in one step
pub fn evaluate(
    predicate: &Predicate,
    attrs: &WorkloadAttributes,
) -> Result<MatchResult, PredicateCompileError> {
    compile(predicate).map(|p| p.evaluate(attrs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttributeValue;

    fn us_east() -> WorkloadAttributes {
        [("region".to_string(), AttributeValue::from("us-east"))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let predicate = Predicate::new("P1", "region == \"us-east\" score 3");
        let first = evaluate(&predicate, &us_east()).unwrap();
        let second = evaluate(&predicate, &us_east()).unwrap();

        assert_eq!(first, second);
        assert!(first.matched);
        assert_eq!(first.score, Some(3.0));
    }

    #[test]
    fn test_no_score_without_match() {
        let predicate = Predicate::new("P1", "region == \"eu-west\" score 3");
        assert_eq!(evaluate(&predicate, &us_east()).unwrap(), MatchResult::no_match());
    }

    #[test]
    fn test_compile_error_names_predicate() {
        let err = compile(&Predicate::new("P3", "region ==")).unwrap_err();
        assert_eq!(err.predicate, "P3");
        assert_eq!(err.reason, "expected attribute or literal");
    }

    #[test]
    fn test_compile_all_collects_every_error() {
        let predicates = vec![
            Predicate::new("ok", "region == \"us-east\""),
            Predicate::new("bad1", "(region"),
            Predicate::new("bad2", "&& x"),
        ];

        let errors = compile_all(&predicates).unwrap_err();
        let names: Vec<_> = errors.iter().map(|e| e.predicate.as_str()).collect();
        assert_eq!(names, vec!["bad1", "bad2"]);
    }
}
