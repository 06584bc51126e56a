//! Query helpers for SQL-backed taps
//!
//! - [`get_query_list`] renders an incremental query template once per
//!   highwatermark row.
//! - [`describe_query`] derives a zero-row variant of a SELECT for column
//!   introspection.

use inbound_common::{InboundError, Result};
use minijinja::{context, Environment};
use regex::Regex;
use tracing::debug;

use crate::models::HighwatermarkRow;

/// Template environment shared by query and DDL rendering.
///
/// Python-style methods on mappings (`highwatermark.get("X", default)`) are
/// enabled so templates written for the Jinja-based tooling keep working.
pub(crate) fn template_env<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
    env
}

pub(crate) fn template_error(err: minijinja::Error) -> InboundError {
    InboundError::Template(err.to_string())
}

/// Render `template` once per highwatermark row, in input order.
///
/// Inside the template the current row is available as `highwatermark`.
/// A single empty row renders the template without substitution. An empty
/// list is rejected: zero watermark rows mean "do not extract", which the
/// caller must decide before building queries.
pub fn get_query_list(template: &str, highwatermarks: &[HighwatermarkRow]) -> Result<Vec<String>> {
    if highwatermarks.is_empty() {
        return Err(InboundError::InvalidArgument(
            "highwatermarks should not be an empty list".to_string(),
        ));
    }

    let env = template_env();
    let compiled = env.template_from_str(template).map_err(template_error)?;

    highwatermarks
        .iter()
        .map(|highwatermark| {
            compiled
                .render(context! { highwatermark => highwatermark })
                .map_err(template_error)
        })
        .collect()
}

/// The query list for a template without any highwatermark
pub fn get_single_query(template: &str) -> Result<String> {
    let mut queries = get_query_list(template, &[HighwatermarkRow::new()])?;
    queries
        .pop()
        .ok_or_else(|| InboundError::Template("template rendered no query".to_string()))
}

fn keyword(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| InboundError::InvalidArgument(format!("bad keyword pattern: {}", e)))
}

/// Derive a query that returns the same columns as `query` but no rows.
///
/// The statement is split at the first `WHERE` and, in what follows, at the
/// first `GROUP BY`, then rebuilt as
/// `<select> where 1=2[ group by <group-by>]`.
///
/// This is a textual heuristic. A subquery whose own WHERE or GROUP BY comes
/// before the outer clause is split at the wrong place.
pub fn describe_query(query: &str) -> Result<String> {
    let where_keyword = keyword(r"(?i)\bwhere\b")?;
    let group_by_keyword = keyword(r"(?i)\bgroup\s+by\b")?;

    let (select, rest) = match where_keyword.find(query) {
        Some(m) => (&query[..m.start()], &query[m.end()..]),
        None => (query, ""),
    };

    // Without a WHERE the GROUP BY, if any, lives in the select part.
    let (select, group_by) = if rest.is_empty() {
        match group_by_keyword.find(select) {
            Some(m) => (&select[..m.start()], Some(&select[m.end()..])),
            None => (select, None),
        }
    } else {
        (
            select,
            group_by_keyword.find(rest).map(|m| &rest[m.end()..]),
        )
    };

    let mut desc = format!("{} where 1=2", select.trim());
    if let Some(group_by) = group_by {
        desc.push_str(" group by ");
        desc.push_str(group_by.trim());
    }

    debug!(describe_query = %desc, "Derived describe query");
    Ok(desc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn watermark(pairs: &[(&str, serde_json::Value)]) -> HighwatermarkRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_highwatermark_subscript() {
        let result = get_query_list("{{ highwatermark['a'] }}", &[watermark(&[("a", json!("1"))])])
            .unwrap();
        assert_eq!(result, vec!["1"]);
    }

    #[test]
    fn test_multiple_highwatermarks_keep_order() {
        let rows = vec![
            watermark(&[("a", json!("1"))]),
            watermark(&[("a", json!("2"))]),
            watermark(&[("a", json!("3"))]),
        ];
        let result = get_query_list("select * from t where id > {{ highwatermark['a'] }}", &rows)
            .unwrap();

        assert_eq!(
            result,
            vec![
                "select * from t where id > 1",
                "select * from t where id > 2",
                "select * from t where id > 3",
            ]
        );
    }

    #[test]
    fn test_empty_highwatermark_list_is_rejected() {
        let err = get_query_list("foo {{ highwatermark.get('A', 'null') }}", &[]).unwrap_err();
        assert!(matches!(err, InboundError::InvalidArgument(_)));
    }

    #[test]
    fn test_get_with_default() {
        let rows = vec![watermark(&[("A", json!(42))]), HighwatermarkRow::new()];
        let result = get_query_list("foo {{ highwatermark.get('A', 'null') }}", &rows).unwrap();
        assert_eq!(result, vec!["foo 42", "foo null"]);
    }

    #[test]
    fn test_attribute_access() {
        let rows = vec![watermark(&[("periode", json!("2024-01"))])];
        let result = get_query_list("p = '{{ highwatermark.periode }}'", &rows).unwrap();
        assert_eq!(result, vec!["p = '2024-01'"]);
    }

    #[test]
    fn test_single_query_without_substitution() {
        assert_eq!(get_single_query("select 1").unwrap(), "select 1");
    }

    #[test]
    fn test_broken_template_is_a_template_error() {
        let err = get_single_query("select {{ highwatermark[ }}").unwrap_err();
        assert!(matches!(err, InboundError::Template(_)));
    }

    #[test]
    fn test_describe_query_where() {
        assert_eq!(
            describe_query("select a from t where a>1").unwrap(),
            "select a from t where 1=2"
        );
    }

    #[test]
    fn test_describe_query_group_by() {
        assert_eq!(
            describe_query("select a from t group by a").unwrap(),
            "select a from t where 1=2 group by a"
        );
    }

    #[test]
    fn test_describe_query_where_and_group_by() {
        assert_eq!(
            describe_query("select a from t where a>1 group by a").unwrap(),
            "select a from t where 1=2 group by a"
        );
    }

    #[test]
    fn test_describe_query_is_case_insensitive() {
        assert_eq!(
            describe_query("SELECT a, count(*) FROM t WHERE a > 1 GROUP  BY a").unwrap(),
            "SELECT a, count(*) FROM t where 1=2 group by a"
        );
    }

    #[test]
    fn test_describe_query_plain_select() {
        assert_eq!(describe_query("select * from dual").unwrap(), "select * from dual where 1=2");
    }

    #[test]
    fn test_describe_query_ignores_keyword_inside_identifier() {
        assert_eq!(
            describe_query("select somewhere_id from t where x = 1").unwrap(),
            "select somewhere_id from t where 1=2"
        );
    }

    #[test]
    fn test_describe_query_subquery_limitation() {
        // The inner WHERE wins; the outer GROUP BY is still found after it.
        assert_eq!(
            describe_query("select a from (select a from t where b = 1) s group by a").unwrap(),
            "select a from (select a from t where 1=2 group by a"
        );
    }
}
