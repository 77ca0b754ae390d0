use chrono::{DateTime, Utc};
use feed_rs::parser;

/// A decoded RSS/Atom document, reduced to what the merger consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    /// Document-level updated time (`<updated>` / `<lastBuildDate>`).
    pub updated: Option<DateTime<Utc>>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntry {
    pub title: String,
    pub link: String,
    /// Full body (`<content>` / `<content:encoded>`), raw HTML
    pub content: Option<String>,
    /// Summary (`<summary>` / `<description>`), raw HTML
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| ParsedEntry {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry
                .links
                .into_iter()
                .next()
                .map(|l| l.href)
                .unwrap_or_default(),
            content: entry
                .content
                .and_then(|c| c.body)
                .filter(|body| !body.trim().is_empty()),
            description: entry
                .summary
                .map(|s| s.content)
                .filter(|summary| !summary.trim().is_empty()),
            published: entry.published,
            updated: entry.updated,
        })
        .collect();

    Ok(ParsedFeed {
        title: feed
            .title
            .map(|t| t.content)
            .filter(|title| !title.trim().is_empty()),
        updated: feed.updated,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
    <title>Example RSS</title>
    <link>https://example.com/</link>
    <lastBuildDate>Mon, 01 Jan 2024 12:00:00 GMT</lastBuildDate>
    <item>
        <title>First post</title>
        <link>https://example.com/1</link>
        <description>&lt;p&gt;Short&lt;/p&gt;</description>
        <content:encoded><![CDATA[<p>Long body</p>]]></content:encoded>
        <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
        <title>Undated</title>
        <link>https://example.com/2</link>
        <description>Only a description</description>
    </item>
</channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Example Atom</title>
    <id>urn:example</id>
    <updated>2024-02-01T00:00:00Z</updated>
    <entry>
        <title>Atom entry</title>
        <id>urn:example:1</id>
        <link href="https://example.com/atom/1"/>
        <updated>2024-01-31T08:30:00Z</updated>
        <summary>Summary text</summary>
    </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Example RSS"));
        assert_eq!(
            feed.updated,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.title, "First post");
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(first.content.as_deref(), Some("<p>Long body</p>"));
        assert_eq!(first.description.as_deref(), Some("<p>Short</p>"));
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );

        let second = &feed.entries[1];
        assert_eq!(second.content, None);
        assert_eq!(second.description.as_deref(), Some("Only a description"));
        assert_eq!(second.published, None);
        assert_eq!(second.updated, None);
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(ATOM.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Example Atom"));
        assert_eq!(
            feed.updated,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );

        let entry = &feed.entries[0];
        assert_eq!(entry.title, "Atom entry");
        assert_eq!(entry.link, "https://example.com/atom/1");
        assert_eq!(entry.description.as_deref(), Some("Summary text"));
        assert_eq!(entry.published, None);
        assert_eq!(
            entry.updated,
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 8, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"").is_err());
    }
}
