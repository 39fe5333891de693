//! Pre-parse lint
//!
//! Oracle output frequently contains pseudo-code that is not a single
//! expression (variable bindings, conditionals, comments). These are caught
//! here with a descriptive message before the recursive-descent parser runs.

use regex::Regex;

use crate::parser::ParseError;

struct LintRule {
    pattern: &'static Regex,
    description: &'static str,
}

lazy_static::lazy_static! {
    static ref LET_BINDING: Regex = Regex::new(r"(?i)\bLET\s*\(").unwrap();
    static ref CONDITIONAL: Regex = Regex::new(r"(?i)\bIF\s*\(").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"//").unwrap();
    static ref HASH_COMMENT: Regex = Regex::new(r"#\s+[A-Za-z]").unwrap();
    static ref STATEMENT_SEPARATOR: Regex = Regex::new(r";").unwrap();
    static ref ASSIGNMENT: Regex = Regex::new(r"(?i)\b[a-z_][a-z0-9_]*\s*=\s*[^=]").unwrap();
    static ref BOOLEAN_KEYWORD: Regex = Regex::new(r"(?i)\b(AND|OR)\b").unwrap();
    static ref NULL_KEYWORD: Regex = Regex::new(r"(?i)\bNULL\b").unwrap();
}

fn rules() -> [LintRule; 8] {
    [
        LintRule {
            pattern: &LET_BINDING,
            description: "variable binding (LET)",
        },
        LintRule {
            pattern: &CONDITIONAL,
            description: "conditional (IF)",
        },
        LintRule {
            pattern: &LINE_COMMENT,
            description: "line comment (//)",
        },
        LintRule {
            pattern: &HASH_COMMENT,
            description: "comment (#)",
        },
        LintRule {
            pattern: &STATEMENT_SEPARATOR,
            description: "multiple statements (;)",
        },
        LintRule {
            pattern: &ASSIGNMENT,
            description: "assignment (name = ...)",
        },
        LintRule {
            pattern: &BOOLEAN_KEYWORD,
            description: "boolean keyword (AND/OR)",
        },
        LintRule {
            pattern: &NULL_KEYWORD,
            description: "NULL keyword",
        },
    ]
}

/// All lint findings for `text`, in rule order
pub fn lint_issues(text: &str) -> Vec<&'static str> {
    rules()
        .iter()
        .filter(|rule| rule.pattern.is_match(text))
        .map(|rule| rule.description)
        .collect()
}

/// Fail on the first unsupported construct
pub fn lint(text: &str) -> Result<(), ParseError> {
    match lint_issues(text).first() {
        Some(description) => Err(ParseError::UnsupportedConstruct(description.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_expressions_pass() {
        assert!(lint("($close-$open)/$open").is_ok());
        assert!(lint("TS_CORR($close, $volume, 10)").is_ok());
        assert!(lint("RANK(DELTA($vwap, 5)) * -1").is_ok());
    }

    #[test]
    fn test_pseudo_code_is_flagged() {
        assert_eq!(
            lint_issues("LET(x, $close)"),
            vec!["variable binding (LET)"]
        );
        assert!(lint("IF($close > $open, 1, 0)").is_err());
        assert!(lint("roc60 = $close / DELAY($close, 60)").is_err());
        assert!(lint("$close // momentum").is_err());
        assert!(lint("RANK($close) AND RANK($open)").is_err());
        assert!(lint("$close; $open").is_err());
    }

    #[test]
    fn test_reports_every_issue() {
        let issues = lint_issues("x = IF($close, NULL, 1); # note");
        assert!(issues.contains(&"conditional (IF)"));
        assert!(issues.contains(&"NULL keyword"));
        assert!(issues.contains(&"multiple statements (;)"));
        assert!(issues.contains(&"assignment (name = ...)"));
        assert!(issues.contains(&"comment (#)"));
    }
}
