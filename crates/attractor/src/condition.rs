//! The `key[=|!=]literal (&& ...)` condition language used on edge
//! `condition` attributes.
//!
//! Grammar: `Expr ::= Clause ('&&' Clause)*`, `Clause ::= Key ('=' | '!=')
//! Literal | Key`. An empty or whitespace-only expression, and an empty
//! clause (a stray `&&`), both evaluate to `true`. A bare key tests
//! truthiness of its resolved value — `""`, `"0"`, and `"false"` are
//! falsy. A literal may be unquoted or double-quoted; only a matching pair
//! of double quotes is stripped.

use std::collections::HashMap;

use serde_json::Value;

/// The values a condition clause's key can resolve against: the outcome
/// that just ran, and the run's context snapshot.
pub struct ConditionContext<'a> {
    pub outcome_status: String,
    pub preferred_label: Option<String>,
    pub context: &'a HashMap<String, Value>,
}

impl ConditionContext<'_> {
    fn resolve(&self, key: &str) -> String {
        let key = key.trim();
        match key {
            "outcome" => self.outcome_status.clone(),
            "preferred_label" => self.preferred_label.clone().unwrap_or_default(),
            _ if key.starts_with("context.") => self
                .context
                .get(key)
                .or_else(|| self.context.get(&key["context.".len()..]))
                .map(value_to_string)
                .unwrap_or_default(),
            _ => self.context.get(key).map(value_to_string).unwrap_or_default(),
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn unquote(literal: &str) -> String {
    if literal.len() >= 2 && literal.starts_with('"') && literal.ends_with('"') {
        literal[1..literal.len() - 1].to_string()
    } else {
        literal.to_string()
    }
}

fn evaluate_clause(clause: &str, ctx: &ConditionContext) -> bool {
    let clause = clause.trim();
    if clause.is_empty() {
        return true;
    }
    if let Some(idx) = clause.find("!=") {
        let key = &clause[..idx];
        let literal = unquote(clause[idx + 2..].trim());
        return ctx.resolve(key) != literal;
    }
    if let Some(idx) = clause.find('=') {
        let key = &clause[..idx];
        let literal = unquote(clause[idx + 1..].trim());
        return ctx.resolve(key) == literal;
    }
    let value = ctx.resolve(clause);
    !(value.is_empty() || value == "0" || value == "false")
}

/// Evaluate a condition expression against `ctx`.
#[must_use]
pub fn evaluate(expr: &str, ctx: &ConditionContext) -> bool {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return true;
    }
    trimmed.split("&&").all(|clause| evaluate_clause(clause, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(context: &HashMap<String, Value>) -> ConditionContext<'_> {
        ConditionContext { outcome_status: "success".into(), preferred_label: None, context }
    }

    #[test]
    fn empty_and_whitespace_expressions_are_true() {
        let context = HashMap::new();
        assert!(evaluate("", &ctx(&context)));
        assert!(evaluate("   ", &ctx(&context)));
    }

    #[test]
    fn trailing_ampersand_ampersand_leaves_an_empty_clause_that_is_true() {
        let context = HashMap::new();
        assert!(evaluate("outcome=success &&", &ctx(&context)));
    }

    #[test]
    fn equality_and_inequality_are_exact_complements() {
        let mut context = HashMap::new();
        context.insert("status".to_string(), Value::String("ready".into()));
        assert!(evaluate("status=ready", &ctx(&context)));
        assert!(!evaluate("status!=ready", &ctx(&context)));
        assert!(!evaluate("status=idle", &ctx(&context)));
        assert!(evaluate("status!=idle", &ctx(&context)));
    }

    #[test]
    fn bare_key_truthiness_treats_empty_zero_and_false_as_falsy() {
        let mut context = HashMap::new();
        context.insert("a".to_string(), Value::String(String::new()));
        context.insert("b".to_string(), Value::String("0".into()));
        context.insert("c".to_string(), Value::String("false".into()));
        context.insert("d".to_string(), Value::String("yes".into()));
        let c = ctx(&context);
        assert!(!evaluate("a", &c));
        assert!(!evaluate("b", &c));
        assert!(!evaluate("c", &c));
        assert!(evaluate("d", &c));
        assert!(!evaluate("missing", &c));
    }

    #[test]
    fn outcome_and_preferred_label_keys_resolve_specially() {
        let context = HashMap::new();
        let c = ConditionContext { outcome_status: "fail".into(), preferred_label: Some("Retry".into()), context: &context };
        assert!(evaluate("outcome=fail", &c));
        assert!(evaluate("preferred_label=Retry", &c));
    }

    #[test]
    fn context_dot_prefixed_key_falls_back_to_bare_path() {
        let mut context = HashMap::new();
        context.insert("stage.count".to_string(), Value::from(3));
        let c = ctx(&context);
        assert!(evaluate("context.stage.count=3", &c));
    }

    #[test]
    fn quoted_literal_strips_only_matching_quotes() {
        let mut context = HashMap::new();
        context.insert("name".to_string(), Value::String("bob".into()));
        let c = ctx(&context);
        assert!(evaluate(r#"name="bob""#, &c));
    }

    #[test]
    fn conjunction_requires_every_clause_to_hold() {
        let mut context = HashMap::new();
        context.insert("a".to_string(), Value::from(1));
        context.insert("b".to_string(), Value::from(2));
        let c = ctx(&context);
        assert!(evaluate("a=1 && b=2", &c));
        assert!(!evaluate("a=1 && b=3", &c));
    }
}
