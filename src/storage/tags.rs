//! Tag query translation.
//!
//! A tag list such as `["tech", "-muted"]` means "tagged `tech` and not
//! tagged `muted`". Empty entries are skipped and every predicate is ANDed.

use sqlx::{QueryBuilder, Sqlite};

/// One parsed tag predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter<'a> {
    /// The row's tag set must contain this tag.
    Include(&'a str),
    /// The row's tag set must not contain this tag.
    Exclude(&'a str),
}

impl<'a> TagFilter<'a> {
    /// Parse a single query tag. Returns `None` for an empty string.
    pub fn parse(tag: &'a str) -> Option<Self> {
        if tag.is_empty() {
            return None;
        }
        match tag.strip_prefix('-') {
            Some(excluded) => Some(TagFilter::Exclude(excluded)),
            None => Some(TagFilter::Include(tag)),
        }
    }

    pub fn parse_all(tags: &'a [String]) -> Vec<Self> {
        tags.iter().filter_map(|t| TagFilter::parse(t)).collect()
    }

    /// Evaluate against an in-memory tag set.
    pub fn matches(&self, tags: &[String]) -> bool {
        match self {
            TagFilter::Include(tag) => tags.iter().any(|t| t == tag),
            TagFilter::Exclude(tag) => !tags.iter().any(|t| t == tag),
        }
    }
}

/// True when `tags` satisfies every predicate of `query`.
pub fn matches_all(query: &[String], tags: &[String]) -> bool {
    TagFilter::parse_all(query).iter().all(|f| f.matches(tags))
}

/// Append ` AND [NOT] EXISTS (...)` clauses for `query` to `builder`.
///
/// `column` names a JSON array column (e.g. `feeds.tags`); membership is
/// tested element-wise with `json_each`, so the array's order and
/// formatting do not matter. The builder must already be inside a `WHERE`.
pub(crate) fn push_tag_filters(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, query: &[String]) {
    for filter in TagFilter::parse_all(query) {
        let (negate, tag) = match filter {
            TagFilter::Include(tag) => ("", tag),
            TagFilter::Exclude(tag) => ("NOT ", tag),
        };
        builder.push(format!(
            " AND {negate}EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value = "
        ));
        builder.push_bind(tag.to_string());
        builder.push(")");
    }
}
