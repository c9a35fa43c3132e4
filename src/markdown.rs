//! HTML -> Markdown conversion with a small, fixed set of element mappings
//! (§4.4.1, §4.4.2). Not a general-purpose converter: exactly the elements
//! both site drivers need, nothing more.

use scraper::node::Node;
use scraper::{ElementRef, Html};

/// Converts an HTML fragment to Markdown using the mappings below. Elements
/// with no explicit mapping fall through to their children's text.
pub fn html_to_markdown(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    for child in fragment.tree.root().children() {
        render_node(child, &mut out, 0);
    }
    collapse_blank_lines(&out).trim().to_string()
}

fn render_node(node: ego_tree::NodeRef<'_, Node>, out: &mut String, list_depth: usize) {
    match node.value() {
        Node::Text(text) => {
            out.push_str(&text.text);
        }
        Node::Element(_) => {
            let el = ElementRef::wrap(node).expect("element node wraps to ElementRef");
            render_element(el, out, list_depth);
        }
        _ => {}
    }
}

fn render_children(node: ego_tree::NodeRef<'_, Node>, out: &mut String, list_depth: usize) {
    for child in node.children() {
        render_node(child, out, list_depth);
    }
}

fn inline(el: ElementRef<'_>) -> String {
    let mut buf = String::new();
    render_children(*el, &mut buf, 0);
    buf.trim().to_string()
}

fn render_element(el: ElementRef<'_>, out: &mut String, list_depth: usize) {
    let name = el.value().name();
    match name {
        "script" | "style" | "noscript" => {}
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name.as_bytes()[1] - b'0';
            out.push('\n');
            out.push_str(&"#".repeat(level as usize));
            out.push(' ');
            out.push_str(&inline(el));
            out.push_str("\n\n");
        }
        "p" | "div" => {
            out.push('\n');
            render_children(*el, out, list_depth);
            out.push_str("\n\n");
        }
        "br" => {
            out.push_str("  \n");
        }
        "strong" | "b" => {
            out.push_str("**");
            out.push_str(&inline(el));
            out.push_str("**");
        }
        "em" | "i" => {
            out.push('*');
            out.push_str(&inline(el));
            out.push('*');
        }
        "code" => {
            out.push('`');
            out.push_str(&inline(el));
            out.push('`');
        }
        "pre" => {
            out.push_str("\n```\n");
            out.push_str(&inline(el));
            out.push_str("\n```\n\n");
        }
        "a" => {
            let href = el.value().attr("href").unwrap_or("");
            out.push('[');
            out.push_str(&inline(el));
            out.push_str("](");
            out.push_str(href);
            out.push(')');
        }
        "img" => {
            let src = el.value().attr("src").unwrap_or("");
            let alt = el.value().attr("alt").unwrap_or("");
            out.push_str("![");
            out.push_str(alt);
            out.push_str("](");
            out.push_str(src);
            out.push(')');
        }
        "ul" | "ol" => {
            out.push('\n');
            render_children(*el, out, list_depth + 1);
            out.push('\n');
        }
        "li" => {
            out.push_str(&"  ".repeat(list_depth.saturating_sub(1)));
            out.push_str("- ");
            out.push_str(&inline(el));
            out.push('\n');
        }
        "blockquote" => {
            out.push_str("\n> ");
            out.push_str(&inline(el));
            out.push_str("\n\n");
        }
        "table" => {
            render_table(el, out);
        }
        _ => {
            render_children(*el, out, list_depth);
        }
    }
}

fn render_table(el: ElementRef<'_>, out: &mut String) {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for descendant in el.descendants() {
        if let Some(tr) = ElementRef::wrap(descendant) {
            if tr.value().name() == "tr" {
                let cells: Vec<String> = tr
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| matches!(c.value().name(), "td" | "th"))
                    .map(inline)
                    .collect();
                if !cells.is_empty() {
                    rows.push(cells);
                }
            }
        }
    }

    if rows.is_empty() {
        return;
    }

    out.push('\n');
    for (i, row) in rows.iter().enumerate() {
        out.push_str("| ");
        out.push_str(&row.join(" | "));
        out.push_str(" |\n");
        if i == 0 {
            out.push_str("| ");
            out.push_str(&vec!["---"; row.len()].join(" | "));
            out.push_str(" |\n");
        }
    }
    out.push('\n');
}

fn collapse_blank_lines(s: &str) -> String {
    let mut out = String::new();
    let mut blank_run = 0;
    for line in s.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Extracts the main content region per §4.4.1: first of `#main-content`,
/// `.wiki-content`, `<main>`, `<article>`, `.content`, else `<body>`.
pub fn extract_main_content<'a>(document: &'a Html) -> Option<ElementRef<'a>> {
    for selector_str in [
        "#main-content",
        ".wiki-content",
        "main",
        "article",
        ".content",
        "body",
    ] {
        if let Ok(selector) = scraper::Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).next() {
                return Some(el);
            }
        }
    }
    None
}

/// Prepends a metadata header to converted Markdown: title, space, page id,
/// and last-updated timestamp alongside the source URL (§4.4.2).
pub fn with_metadata_header(
    title: &str,
    source_url: &str,
    space_key: Option<&str>,
    page_id: Option<&str>,
    updated_when: Option<&str>,
    body_markdown: &str,
) -> String {
    let mut header = format!("# {title}\n\nSource: {source_url}\n");
    if let Some(space_key) = space_key {
        header.push_str(&format!("Space: {space_key}\n"));
    }
    if let Some(page_id) = page_id {
        header.push_str(&format!("Page ID: {page_id}\n"));
    }
    if let Some(updated_when) = updated_when {
        header.push_str(&format!("Last updated: {updated_when}\n"));
    }
    header.push('\n');
    header.push_str(body_markdown);
    header.push('\n');
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_headings_and_paragraphs() {
        let md = html_to_markdown("<h1>Title</h1><p>Hello <strong>world</strong></p>");
        assert!(md.contains("# Title"));
        assert!(md.contains("Hello **world**"));
    }

    #[test]
    fn converts_links_and_lists() {
        let md = html_to_markdown(r#"<ul><li>a</li><li><a href="/x">b</a></li></ul>"#);
        assert!(md.contains("- a"));
        assert!(md.contains("[b](/x)"));
    }

    #[test]
    fn drops_script_and_style_content() {
        let md = html_to_markdown("<p>keep</p><script>evil()</script><style>.x{}</style>");
        assert!(md.contains("keep"));
        assert!(!md.contains("evil"));
    }

    #[test]
    fn converts_simple_table() {
        let md = html_to_markdown("<table><tr><th>A</th><th>B</th></tr><tr><td>1</td><td>2</td></tr></table>");
        assert!(md.contains("| A | B |"));
        assert!(md.contains("| 1 | 2 |"));
    }

    #[test]
    fn metadata_header_includes_title_and_source() {
        let header = with_metadata_header("My Page", "https://h/p", None, None, None, "body");
        assert!(header.starts_with("# My Page"));
        assert!(header.contains("https://h/p"));
    }

    #[test]
    fn metadata_header_includes_space_page_id_and_updated_when() {
        let header = with_metadata_header(
            "My Page",
            "https://h/p",
            Some("AR"),
            Some("42"),
            Some("2026-01-01T00:00:00.000Z"),
            "body",
        );
        assert!(header.contains("Space: AR"));
        assert!(header.contains("Page ID: 42"));
        assert!(header.contains("Last updated: 2026-01-01T00:00:00.000Z"));
    }

    #[test]
    fn extract_main_content_prefers_main_content_id() {
        let html = Html::parse_document(r#"<html><body><div id="main-content">X</div><main>Y</main></body></html>"#);
        let el = extract_main_content(&html).unwrap();
        assert_eq!(el.text().collect::<String>(), "X");
    }
}
