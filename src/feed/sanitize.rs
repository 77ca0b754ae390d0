//! Markup stripping for feed item bodies.

use html2text::render::TrivialDecorator;

/// Wrap column handed to html2text; wide enough that paragraphs stay on one line.
const RENDER_WIDTH: usize = 10_000;

/// Reduce an HTML fragment to its text nodes with no surviving tags.
///
/// Only the literal text is kept: no link brackets, list bullets, heading
/// markers or table borders. The result is HTML-escaped, so `&`, `<` and `>`
/// always come out as `&amp;`, `&lt;` and `&gt;` whether the source spelled
/// them as entities or not.
pub fn sanitize(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let rendered = html2text::config::with_decorator(TrivialDecorator::new())
        .raw_mode(true)
        .string_from_read(html.as_bytes(), RENDER_WIDTH);
    let text = match rendered {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, "html2text failed, stripping tags directly");
            strip_tags(html)
        }
    };

    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Drop everything between `<` and `>`.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strips_tags_keeps_text() {
        let out = sanitize("<p>Hello <b>world</b>, <a href=\"https://x\">link</a></p>");
        assert!(out.contains("Hello world"), "got {out:?}");
        assert!(out.contains("link"));
        assert!(!out.contains('<'));
        assert!(!out.contains("href"));
    }

    #[test]
    fn test_no_script_survives() {
        let out = sanitize("<div>safe</div><script>alert('x')</script><img src=x onerror=alert(1)>");
        assert!(out.contains("safe"));
        assert!(!out.to_lowercase().contains("<script"));
        assert!(!out.contains("onerror"));
    }

    #[test]
    fn test_escaped_markup_stays_inert() {
        let out = sanitize("<p>&lt;script&gt;alert(1)&lt;/script&gt;</p>");
        assert_eq!(out, "&lt;script&gt;alert(1)&lt;/script&gt;");
    }

    #[test]
    fn test_special_characters_escaped_consistently() {
        assert_eq!(sanitize("AT&amp;T &lt;3"), "AT&amp;T &lt;3");
        assert_eq!(sanitize("Fish &amp; Chips"), "Fish &amp; Chips");
        // Bare characters end up the same as their entity spellings
        assert_eq!(sanitize("<p>1 &gt; 0</p>"), sanitize("<p>1 > 0</p>"));
    }

    #[test]
    fn test_link_has_no_decoration() {
        let out = sanitize("<a href='https://example.com/x'>link</a> text");
        assert_eq!(out, "link text");
    }

    #[test]
    fn test_list_has_no_bullets() {
        let out = sanitize("<ul><li>one</li><li>two</li></ul><ol><li>three</li></ol>");
        let lines: Vec<_> = out.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, ["one", "two", "three"]);
    }

    #[test]
    fn test_heading_has_no_marker() {
        let out = sanitize("<h1>Head</h1><h2>Sub</h2>body");
        assert!(!out.contains('#'), "got {out:?}");
        let lines: Vec<_> = out.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, ["Head", "Sub", "body"]);
    }

    #[test]
    fn test_image_has_no_placeholder() {
        let out = sanitize("before <img src='x.png' alt='pic'> after");
        assert!(!out.contains('['), "got {out:?}");
        assert!(!out.contains("x.png"));
        assert!(out.starts_with("before"));
        assert!(out.ends_with("after"));
    }

    #[test]
    fn test_table_has_no_borders() {
        let out = sanitize("<table><tr><td>c1</td><td>c2</td></tr><tr><td>c3</td><td>c4</td></tr></table>");
        for border in ['│', '─', '┬', '┴', '┼', '|', '-'] {
            assert!(!out.contains(border), "found {border:?} in {out:?}");
        }
        for cell in ["c1", "c2", "c3", "c4"] {
            assert!(out.contains(cell), "missing {cell} in {out:?}");
        }
    }

    #[test]
    fn test_emphasis_has_no_markers() {
        let out = sanitize("<p><em>soft</em> <strong>loud</strong> <code>x</code> <del>gone</del></p>");
        for marker in ['*', '_', '`', '~'] {
            assert!(!out.contains(marker), "found {marker:?} in {out:?}");
        }
        assert!(out.contains("soft"));
        assert!(out.contains("loud"));
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(sanitize("just text"), "just text");
    }

    #[test]
    fn test_empty() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("  \n "), "");
    }

    #[test]
    fn test_strip_tags_fallback() {
        assert_eq!(strip_tags("a<b>b</b>c<br/>"), "abc");
        assert_eq!(strip_tags("1 > 0"), "1 > 0");
    }
}
