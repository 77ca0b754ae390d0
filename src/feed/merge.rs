//! Folding a freshly parsed document into a stored feed.
//!
//! `feed.refreshed` is the low-water mark: entries dated before it were
//! already offered by an earlier fetch and are skipped. Entries dated after
//! the fetch's `now` are clock-skewed and skipped as well. There is no
//! ID- or URL-based dedup beyond that window.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::parser::ParsedFeed;
use super::sanitize::sanitize;
use crate::storage::{Feed, FeedItem};

/// Per-fetch counts, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub accepted: usize,
    /// Dated strictly before the feed's previous `refreshed`
    pub rejected_stale: usize,
    /// Dated strictly after `now`
    pub rejected_future: usize,
}

/// Apply `parsed` to `feed`.
///
/// `now` must be the instant the fetch started. It stamps undated entries,
/// bounds the future cutoff, and becomes the new `refreshed`. `etag` is the
/// response's validator and replaces the stored one even when empty.
pub fn merge(feed: &mut Feed, parsed: ParsedFeed, etag: String, now: DateTime<Utc>) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for entry in parsed.entries {
        let date = entry.published.or(entry.updated).unwrap_or(now);

        if feed.refreshed.is_some_and(|cutoff| date < cutoff) {
            outcome.rejected_stale += 1;
            continue;
        }
        if date > now {
            outcome.rejected_future += 1;
            continue;
        }

        let body = entry.content.or(entry.description).unwrap_or_default();
        feed.items.push(FeedItem {
            id: Uuid::new_v4().to_string(),
            created: now,
            updated: now,
            title: entry.title,
            url: entry.link,
            date,
            content: sanitize(&body),
        });
        outcome.accepted += 1;
    }

    if let Some(updated) = parsed.updated {
        feed.last_authored = Some(updated);
    }
    feed.etag = etag;
    feed.refreshed = Some(now);
    if feed.title.is_empty() {
        if let Some(title) = parsed.title {
            feed.title = title;
        }
    }

    // Vec::sort_by is stable: equal dates keep their prior relative order
    feed.items.sort_by(|a, b| b.date.cmp(&a.date));

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parser::ParsedEntry;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn entry(title: &str, published: Option<DateTime<Utc>>) -> ParsedEntry {
        ParsedEntry {
            title: title.to_string(),
            link: format!("https://example.com/{title}"),
            published,
            ..ParsedEntry::default()
        }
    }

    fn titles(feed: &Feed) -> Vec<&str> {
        feed.items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_cutoff_window() {
        let now = t0();
        let refreshed = now - Duration::hours(2);
        let mut feed = Feed {
            refreshed: Some(refreshed),
            ..Feed::with_url("https://example.com/feed")
        };

        let parsed = ParsedFeed {
            entries: vec![
                entry("stale", Some(refreshed - Duration::milliseconds(1))),
                entry("boundary", Some(refreshed)),
                entry("recent", Some(now - Duration::hours(1))),
                entry("at-now", Some(now)),
                entry("future", Some(now + Duration::hours(1))),
            ],
            ..ParsedFeed::default()
        };

        let outcome = merge(&mut feed, parsed, String::new(), now);

        assert_eq!(
            outcome,
            MergeOutcome {
                accepted: 3,
                rejected_stale: 1,
                rejected_future: 1
            }
        );
        assert_eq!(titles(&feed), ["at-now", "recent", "boundary"]);
        assert_eq!(feed.refreshed, Some(now));
    }

    #[test]
    fn test_scenario_one_past_one_future() {
        let now = t0();
        let mut feed = Feed {
            refreshed: Some(now - Duration::days(1)),
            ..Feed::with_url("https://example.com/feed")
        };
        let parsed = ParsedFeed {
            entries: vec![
                entry("past", Some(now - Duration::hours(1))),
                entry("ahead", Some(now + Duration::hours(1))),
            ],
            ..ParsedFeed::default()
        };

        merge(&mut feed, parsed, String::new(), now);

        assert_eq!(titles(&feed), ["past"]);
        assert_eq!(feed.items[0].date, now - Duration::hours(1));
        assert_eq!(feed.items[0].created, now);
        assert!(!feed.items[0].id.is_empty());
    }

    #[test]
    fn test_date_fallbacks() {
        let now = t0();
        let updated_only = ParsedEntry {
            updated: Some(now - Duration::minutes(5)),
            ..entry("updated-only", None)
        };
        let both = ParsedEntry {
            updated: Some(now - Duration::minutes(1)),
            ..entry("both", Some(now - Duration::minutes(10)))
        };
        let parsed = ParsedFeed {
            entries: vec![entry("undated", None), updated_only, both],
            ..ParsedFeed::default()
        };

        let mut feed = Feed::with_url("https://example.com/feed");
        merge(&mut feed, parsed, String::new(), now);

        let date_of = |title: &str| feed.items.iter().find(|i| i.title == title).map(|i| i.date);
        assert_eq!(date_of("undated"), Some(now));
        assert_eq!(date_of("updated-only"), Some(now - Duration::minutes(5)));
        assert_eq!(date_of("both"), Some(now - Duration::minutes(10)));
    }

    #[test]
    fn test_content_prefers_body_and_is_sanitized() {
        let now = t0();
        let with_body = ParsedEntry {
            content: Some("<p>Body <em>text</em></p>".into()),
            description: Some("Description".into()),
            ..entry("a", Some(now))
        };
        let description_only = ParsedEntry {
            description: Some("<b>Only</b> description".into()),
            ..entry("b", Some(now))
        };
        let parsed = ParsedFeed {
            entries: vec![with_body, description_only, entry("c", Some(now))],
            ..ParsedFeed::default()
        };

        let mut feed = Feed::with_url("https://example.com/feed");
        merge(&mut feed, parsed, String::new(), now);

        assert_eq!(feed.items[0].content, "Body text");
        assert_eq!(feed.items[1].content, "Only description");
        assert_eq!(feed.items[2].content, "");
        assert!(feed.items.iter().all(|i| !i.content.contains('<')));
    }

    #[test]
    fn test_metadata_updates() {
        let now = t0();
        let authored = now - Duration::days(3);
        let mut feed = Feed {
            etag: "\"old\"".into(),
            last_authored: Some(now - Duration::days(30)),
            ..Feed::with_url("https://example.com/feed")
        };
        let parsed = ParsedFeed {
            title: Some("Parsed Title".into()),
            updated: Some(authored),
            entries: Vec::new(),
        };

        merge(&mut feed, parsed, "\"new\"".into(), now);

        assert_eq!(feed.title, "Parsed Title");
        assert_eq!(feed.last_authored, Some(authored));
        assert_eq!(feed.etag, "\"new\"");
        assert_eq!(feed.refreshed, Some(now));
    }

    #[test]
    fn test_manual_title_kept_and_etag_cleared() {
        let now = t0();
        let mut feed = Feed {
            title: "My Name".into(),
            etag: "\"old\"".into(),
            last_authored: Some(now - Duration::days(30)),
            ..Feed::with_url("https://example.com/feed")
        };
        let parsed = ParsedFeed {
            title: Some("Parsed Title".into()),
            ..ParsedFeed::default()
        };

        merge(&mut feed, parsed, String::new(), now);

        assert_eq!(feed.title, "My Name");
        assert_eq!(feed.etag, "");
        // No document date: LastAuthored untouched
        assert_eq!(feed.last_authored, Some(now - Duration::days(30)));
    }

    #[test]
    fn test_new_items_interleave_with_existing() {
        let now = t0();
        let existing = |title: &str, date| FeedItem {
            id: title.to_string(),
            created: date,
            updated: date,
            title: title.to_string(),
            url: String::new(),
            date,
            content: String::new(),
        };
        let mut feed = Feed {
            refreshed: Some(now - Duration::hours(10)),
            items: vec![
                existing("old-1", now - Duration::hours(20)),
                existing("old-2", now - Duration::hours(30)),
            ],
            ..Feed::with_url("https://example.com/feed")
        };
        let parsed = ParsedFeed {
            entries: vec![entry("new", Some(now - Duration::hours(5)))],
            ..ParsedFeed::default()
        };

        merge(&mut feed, parsed, String::new(), now);

        assert_eq!(titles(&feed), ["new", "old-1", "old-2"]);
    }

    proptest! {
        #[test]
        fn prop_accepted_items_within_window_and_sorted(
            offsets in proptest::collection::vec(-7_200i64..7_200, 0..40),
            cutoff_offset in -7_200i64..0,
        ) {
            let now = t0();
            let cutoff = now + Duration::seconds(cutoff_offset);
            let mut feed = Feed {
                refreshed: Some(cutoff),
                ..Feed::with_url("https://example.com/feed")
            };
            let parsed = ParsedFeed {
                entries: offsets
                    .iter()
                    .enumerate()
                    .map(|(i, s)| entry(&i.to_string(), Some(now + Duration::seconds(*s))))
                    .collect(),
                ..ParsedFeed::default()
            };

            let outcome = merge(&mut feed, parsed, String::new(), now);

            prop_assert_eq!(
                outcome.accepted + outcome.rejected_stale + outcome.rejected_future,
                offsets.len()
            );
            prop_assert_eq!(feed.items.len(), outcome.accepted);
            for item in &feed.items {
                prop_assert!(item.date >= cutoff && item.date <= now);
            }
            for pair in feed.items.windows(2) {
                prop_assert!(pair[0].date >= pair[1].date);
            }
        }

        #[test]
        fn prop_sort_is_stable(dates in proptest::collection::vec(0i64..4, 1..30)) {
            let now = t0();
            let mut feed = Feed::with_url("https://example.com/feed");
            let parsed = ParsedFeed {
                entries: dates
                    .iter()
                    .enumerate()
                    .map(|(i, d)| entry(&i.to_string(), Some(now - Duration::minutes(*d))))
                    .collect(),
                ..ParsedFeed::default()
            };

            merge(&mut feed, parsed, String::new(), now);

            // Among equal dates, input order (ascending index) is preserved
            for pair in feed.items.windows(2) {
                if pair[0].date == pair[1].date {
                    let a: usize = pair[0].title.parse().unwrap();
                    let b: usize = pair[1].title.parse().unwrap();
                    prop_assert!(a < b);
                }
            }
        }
    }
}
