//! Rich document → Markdown.
//!
//! The writer keeps a line-prefix stack (`delim`) so nested blockquotes and
//! list items re-emit their prefixes after every newline, and defers block
//! separation until the next write so the output never ends with blank lines.

use std::sync::LazyLock;

use regex::Regex;

use crate::document::core::rich::{MAX_DEPTH, Mark, Node, RichDocument};
use crate::document::markdown::ConversionError;

/// Escapes applied only when text starts a line.
static LINE_START_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"^(\+ |[-*>])", r"\${0}"),
        (r"^(\s*)(#{1,6})(\s|$)", r"${1}\${2}${3}"),
        (r"^(\s*\d+)([.)])(\s)", r"${1}\${2}${3}"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Serialize a document to Markdown.
///
/// # Errors
/// Returns a [`ConversionError`] when the tree breaks the schema (inline
/// nodes at block level, blocks inside inline content, stray list items)
/// or nests deeper than [`MAX_DEPTH`].
pub fn try_document_to_markdown(doc: &RichDocument) -> Result<String, ConversionError> {
    let mut writer = MarkdownWriter::default();
    writer.render_blocks(&doc.content, 1)?;
    Ok(writer.out)
}

#[derive(Default)]
struct MarkdownWriter {
    out: String,
    delim: String,
    closed: Option<&'static str>,
    in_tight_list: bool,
    at_prefix: bool,
}

impl MarkdownWriter {
    fn at_blank(&self) -> bool {
        self.out.is_empty() || self.out.ends_with('\n')
    }

    /// Emit the separation owed to the last closed block.
    fn flush_close(&mut self, size: usize) {
        if self.closed.is_none() {
            return;
        }
        if !self.at_blank() {
            self.out.push('\n');
        }
        if size > 1 {
            let delim_min = self.delim.trim_end().to_string();
            for _ in 1..size {
                self.out.push_str(&delim_min);
                self.out.push('\n');
            }
        }
        self.closed = None;
    }

    fn write(&mut self, content: &str) {
        self.flush_close(2);
        if !self.delim.is_empty() && self.at_blank() {
            self.out.push_str(&self.delim);
        }
        self.out.push_str(content);
        if !content.is_empty() {
            self.at_prefix = false;
        }
    }

    fn ensure_new_line(&mut self) {
        if !self.at_blank() {
            self.out.push('\n');
        }
    }

    const fn close_block(&mut self, kind: &'static str) {
        self.closed = Some(kind);
    }

    fn text(&mut self, text: &str, escape: bool) {
        let mut lines = text.split('\n').peekable();
        while let Some(line) = lines.next() {
            let start_of_line = self.at_blank() || self.closed.is_some() || self.at_prefix;
            self.write("");
            if escape {
                let escaped = escape_text(line, start_of_line);
                self.out.push_str(&escaped);
            } else {
                self.out.push_str(line);
            }
            self.at_prefix = false;
            if lines.peek().is_some() {
                self.out.push('\n');
            }
        }
    }

    fn wrap_block(
        &mut self,
        delim: &str,
        first_delim: &str,
        kind: &'static str,
        render: impl FnOnce(&mut Self) -> Result<(), ConversionError>,
    ) -> Result<(), ConversionError> {
        let previous = self.delim.clone();
        self.write(first_delim);
        self.at_prefix = true;
        self.delim.push_str(delim);
        let rendered = render(self);
        self.delim = previous;
        rendered?;
        self.close_block(kind);
        Ok(())
    }

    fn render_blocks(&mut self, nodes: &[Node], depth: usize) -> Result<(), ConversionError> {
        if depth > MAX_DEPTH {
            return Err(ConversionError::TooDeep(MAX_DEPTH));
        }
        nodes
            .iter()
            .try_for_each(|node| self.render_block(node, depth))
    }

    fn render_block(&mut self, node: &Node, depth: usize) -> Result<(), ConversionError> {
        match node {
            Node::Paragraph { content } => {
                self.render_inline(content)?;
                self.close_block(node.kind());
            }
            Node::Heading { attrs, content } => {
                self.write(&format!("{} ", "#".repeat(usize::from(attrs.level))));
                self.render_inline(content)?;
                self.close_block(node.kind());
            }
            Node::Blockquote { content } => {
                self.wrap_block("> ", "> ", node.kind(), |w| {
                    w.render_blocks(content, depth + 1)
                })?;
            }
            Node::CodeBlock { attrs, content } => {
                let code = code_text(content)?;
                let fence = code_fence(&code);
                self.write(&format!("{fence}{}\n", attrs.params.as_deref().unwrap_or("")));
                self.text(&code, false);
                self.ensure_new_line();
                self.write(&fence);
                self.close_block(node.kind());
            }
            Node::BulletList { attrs, content } => {
                let bullet = attrs.bullet.as_deref().unwrap_or("*");
                self.render_list(content, node.kind(), "  ", depth, |_| format!("{bullet} "))?;
            }
            Node::OrderedList { attrs, content } => {
                let start = attrs.order.max(1);
                let last = start.saturating_add(content.len().saturating_sub(1) as u64);
                let width = last.to_string().len();
                let delim = " ".repeat(width + 2);
                self.render_list(content, node.kind(), &delim, depth, |index| {
                    let number = start.saturating_add(index as u64);
                    format!("{number:>width$}. ")
                })?;
            }
            Node::HorizontalRule { attrs } => {
                self.write(attrs.markup.as_deref().unwrap_or("---"));
                self.close_block(node.kind());
            }
            Node::ListItem { .. } | Node::HardBreak | Node::Text { .. } => {
                return Err(ConversionError::UnexpectedNode {
                    node: node.kind(),
                    context: "block content",
                });
            }
        }
        Ok(())
    }

    fn render_list(
        &mut self,
        items: &[Node],
        kind: &'static str,
        delim: &str,
        depth: usize,
        first_delim: impl Fn(usize) -> String,
    ) -> Result<(), ConversionError> {
        if self.closed == Some(kind) {
            // Keeps two adjacent lists of the same type from merging.
            self.flush_close(3);
        } else if self.in_tight_list {
            self.flush_close(1);
        }

        let previous_tight = self.in_tight_list;
        self.in_tight_list = true;
        let rendered = items.iter().enumerate().try_for_each(|(index, item)| {
            if index > 0 {
                self.flush_close(1);
            }
            let Node::ListItem { content } = item else {
                return Err(ConversionError::UnexpectedNode {
                    node: item.kind(),
                    context: kind,
                });
            };
            self.wrap_block(delim, &first_delim(index), kind, |w| {
                w.render_blocks(content, depth + 1)
            })
        });
        self.in_tight_list = previous_tight;
        rendered
    }

    fn render_inline(&mut self, nodes: &[Node]) -> Result<(), ConversionError> {
        let mut active: Vec<Mark> = Vec::new();
        let mut pending_ws = String::new();

        for (index, node) in nodes.iter().enumerate() {
            match node {
                Node::HardBreak => {
                    pending_ws.clear();
                    let followed_by_content = nodes[index + 1..]
                        .iter()
                        .any(|next| !matches!(next, Node::HardBreak));
                    if followed_by_content {
                        self.write("\\\n");
                    }
                }
                Node::Text { text, marks } => {
                    let mut marks = marks.clone();
                    marks.sort_by_key(Mark::rank);
                    marks.dedup();
                    let is_code = marks.contains(&Mark::Code);
                    marks.retain(|mark| *mark != Mark::Code);

                    let (lead, core, trail) = if is_code {
                        ("", text.as_str(), "")
                    } else {
                        split_whitespace(text)
                    };
                    if core.is_empty() {
                        pending_ws.push_str(text);
                        continue;
                    }

                    let keep = active
                        .iter()
                        .zip(&marks)
                        .take_while(|(open, wanted)| open == wanted)
                        .count();
                    while active.len() > keep {
                        if let Some(mark) = active.pop() {
                            self.write(&mark_close(&mark));
                        }
                    }
                    if !pending_ws.is_empty() {
                        self.text(&pending_ws, false);
                        pending_ws.clear();
                    }
                    if !lead.is_empty() {
                        self.text(lead, false);
                    }
                    for mark in &marks[keep..] {
                        self.write(mark_open(mark));
                        active.push(mark.clone());
                    }

                    if is_code {
                        self.write(&code_span(core));
                    } else {
                        self.text(core, true);
                    }
                    pending_ws = trail.to_string();
                }
                other => {
                    return Err(ConversionError::UnexpectedNode {
                        node: other.kind(),
                        context: "inline content",
                    });
                }
            }
        }

        while let Some(mark) = active.pop() {
            self.write(&mark_close(&mark));
        }
        Ok(())
    }
}

const fn mark_open(mark: &Mark) -> &'static str {
    match mark {
        Mark::Bold => "**",
        Mark::Italic => "*",
        Mark::Strike => "~~",
        Mark::Code => "`",
        Mark::Link { .. } => "[",
    }
}

fn mark_close(mark: &Mark) -> String {
    match mark {
        Mark::Link { attrs } => {
            let href = if attrs.href.contains(char::is_whitespace) || attrs.href.contains(['(', ')'])
            {
                format!("<{}>", attrs.href)
            } else {
                attrs.href.clone()
            };
            match &attrs.title {
                Some(title) => format!("]({href} \"{}\")", title.replace('"', "\\\"")),
                None => format!("]({href})"),
            }
        }
        other => mark_open(other).to_string(),
    }
}

fn split_whitespace(text: &str) -> (&str, &str, &str) {
    let trimmed_start = text.trim_start();
    let lead = &text[..text.len() - trimmed_start.len()];
    let core = trimmed_start.trim_end();
    let trail = &trimmed_start[core.len()..];
    (lead, core, trail)
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for ch in text.chars() {
        if ch == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Inline code: no escaping inside, fence longer than any backtick run.
fn code_span(code: &str) -> String {
    let run = longest_backtick_run(code);
    let fence = "`".repeat(run + 1);
    if run > 0 && (code.starts_with('`') || code.ends_with('`')) {
        format!("{fence} {code} {fence}")
    } else {
        format!("{fence}{code}{fence}")
    }
}

fn code_fence(code: &str) -> String {
    let run = longest_backtick_run(code);
    "`".repeat(if run >= 3 { run + 1 } else { 3 })
}

fn code_text(content: &[Node]) -> Result<String, ConversionError> {
    content
        .iter()
        .map(|node| match node {
            Node::Text { text, .. } => Ok(text.as_str()),
            Node::HardBreak => Ok("\n"),
            other => Err(ConversionError::UnexpectedNode {
                node: other.kind(),
                context: "codeBlock",
            }),
        })
        .collect()
}

fn escape_text(text: &str, start_of_line: bool) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    for (i, &ch) in chars.iter().enumerate() {
        match ch {
            '`' | '*' | '\\' | '~' | '[' | ']' | '<' | '&' => {
                out.push('\\');
                out.push(ch);
            }
            '_' => {
                let intraword = i > 0
                    && i + 1 < chars.len()
                    && chars[i - 1].is_alphanumeric()
                    && chars[i + 1].is_alphanumeric();
                if !intraword {
                    out.push('\\');
                }
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    if start_of_line {
        for (rule, replacement) in LINE_START_RULES.iter() {
            out = rule.replace(&out, *replacement).into_owned();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::core::rich::{
        BulletListAttrs, CodeBlockAttrs, HeadingAttrs, HorizontalRuleAttrs, LinkAttrs,
        OrderedListAttrs,
    };

    fn doc(content: Vec<Node>) -> RichDocument {
        RichDocument::new(content)
    }

    fn md(content: Vec<Node>) -> String {
        try_document_to_markdown(&doc(content)).unwrap()
    }

    fn item(text: &str) -> Node {
        Node::ListItem {
            content: vec![Node::paragraph(vec![Node::text(text)])],
        }
    }

    #[test]
    fn test_empty_document_is_empty_string() {
        assert_eq!(md(vec![]), "");
        assert_eq!(md(vec![Node::paragraph(vec![])]), "");
    }

    #[test]
    fn test_heading_and_paragraphs() {
        let out = md(vec![
            Node::Heading {
                attrs: HeadingAttrs { level: 2 },
                content: vec![Node::text("Title")],
            },
            Node::paragraph(vec![Node::text("one")]),
            Node::paragraph(vec![Node::text("two")]),
        ]);
        assert_eq!(out, "## Title\n\none\n\ntwo");
    }

    #[test]
    fn test_marks() {
        let out = md(vec![Node::paragraph(vec![
            Node::marked("bold", vec![Mark::Bold]),
            Node::text(" "),
            Node::marked("it", vec![Mark::Italic]),
            Node::text(" "),
            Node::marked("gone", vec![Mark::Strike]),
            Node::text(" "),
            Node::marked("a*b", vec![Mark::Code]),
        ])]);
        assert_eq!(out, "**bold** *it* ~~gone~~ `a*b`");
    }

    #[test]
    fn test_overlapping_marks_stay_open() {
        let out = md(vec![Node::paragraph(vec![
            Node::marked("bold ", vec![Mark::Bold]),
            Node::marked("both", vec![Mark::Italic, Mark::Bold]),
        ])]);
        assert_eq!(out, "**bold *both***");
    }

    #[test]
    fn test_links_with_and_without_title() {
        let plain = Mark::Link {
            attrs: LinkAttrs {
                href: "https://a.example".to_string(),
                title: None,
            },
        };
        let titled = Mark::Link {
            attrs: LinkAttrs {
                href: "https://b.example".to_string(),
                title: Some("B".to_string()),
            },
        };
        let out = md(vec![Node::paragraph(vec![
            Node::marked("a", vec![plain]),
            Node::text(" and "),
            Node::marked("b", vec![titled]),
        ])]);
        assert_eq!(out, "[a](https://a.example) and [b](https://b.example \"B\")");
    }

    #[test]
    fn test_code_block_with_params() {
        let out = md(vec![Node::CodeBlock {
            attrs: CodeBlockAttrs {
                params: Some("rust".to_string()),
            },
            content: vec![Node::text("let x = *y;")],
        }]);
        assert_eq!(out, "```rust\nlet x = *y;\n```");
    }

    #[test]
    fn test_blockquote_prefixes_every_line() {
        let out = md(vec![Node::Blockquote {
            content: vec![
                Node::paragraph(vec![Node::text("first")]),
                Node::paragraph(vec![Node::text("second")]),
            ],
        }]);
        assert_eq!(out, "> first\n>\n> second");
    }

    #[test]
    fn test_bullet_list_default_and_custom_bullet() {
        let out = md(vec![Node::BulletList {
            attrs: BulletListAttrs::default(),
            content: vec![item("a"), item("b")],
        }]);
        assert_eq!(out, "* a\n* b");

        let out = md(vec![Node::BulletList {
            attrs: BulletListAttrs {
                bullet: Some("-".to_string()),
            },
            content: vec![item("a")],
        }]);
        assert_eq!(out, "- a");
    }

    #[test]
    fn test_nested_list_indents_under_item() {
        let out = md(vec![Node::BulletList {
            attrs: BulletListAttrs::default(),
            content: vec![Node::ListItem {
                content: vec![
                    Node::paragraph(vec![Node::text("outer")]),
                    Node::BulletList {
                        attrs: BulletListAttrs::default(),
                        content: vec![item("inner")],
                    },
                ],
            }],
        }]);
        assert_eq!(out, "* outer\n  * inner");
    }

    #[test]
    fn test_ordered_list_pads_numbers_to_widest() {
        let items = (1..=12).map(|n| item(&format!("item {n}"))).collect();
        let out = md(vec![Node::OrderedList {
            attrs: OrderedListAttrs { order: 1 },
            content: items,
        }]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], " 1. item 1");
        assert_eq!(lines[8], " 9. item 9");
        assert_eq!(lines[9], "10. item 10");
        assert_eq!(lines[11], "12. item 12");
    }

    #[test]
    fn test_ordered_list_respects_start() {
        let out = md(vec![Node::OrderedList {
            attrs: OrderedListAttrs { order: 7 },
            content: vec![item("a"), item("b")],
        }]);
        assert_eq!(out, "7. a\n8. b");

        let out = md(vec![Node::OrderedList {
            attrs: OrderedListAttrs { order: 0 },
            content: vec![item("a"), item("b")],
        }]);
        assert_eq!(out, "1. a\n2. b");
    }

    #[test]
    fn test_horizontal_rule_markup() {
        assert_eq!(
            md(vec![Node::HorizontalRule {
                attrs: HorizontalRuleAttrs::default()
            }]),
            "---"
        );
        assert_eq!(
            md(vec![Node::HorizontalRule {
                attrs: HorizontalRuleAttrs {
                    markup: Some("***".to_string())
                }
            }]),
            "***"
        );
    }

    #[test]
    fn test_hard_breaks() {
        let inner = md(vec![Node::paragraph(vec![
            Node::text("a"),
            Node::HardBreak,
            Node::text("b"),
        ])]);
        assert_eq!(inner, "a\\\nb");

        let trailing = md(vec![Node::paragraph(vec![
            Node::text("a"),
            Node::HardBreak,
            Node::HardBreak,
        ])]);
        assert_eq!(trailing, "a");
    }

    #[test]
    fn test_hard_break_inside_blockquote_keeps_prefix() {
        let out = md(vec![Node::Blockquote {
            content: vec![Node::paragraph(vec![
                Node::text("a"),
                Node::HardBreak,
                Node::text("b"),
            ])],
        }]);
        assert_eq!(out, "> a\\\n> b");
    }

    #[test]
    fn test_escaping() {
        let out = md(vec![Node::paragraph(vec![Node::text(
            "# not a heading with *stars* and snake_case",
        )])]);
        assert_eq!(out, "\\# not a heading with \\*stars\\* and snake_case");

        let out = md(vec![Node::paragraph(vec![Node::text("1. not a list")])]);
        assert_eq!(out, "1\\. not a list");

        let out = md(vec![Node::paragraph(vec![Node::text("<b>x</b> &amp; more")])]);
        assert_eq!(out, "\\<b>x\\</b> \\&amp; more");
    }

    #[test]
    fn test_schema_violations_are_errors() {
        let stray_text = doc(vec![Node::text("loose")]);
        assert!(matches!(
            try_document_to_markdown(&stray_text),
            Err(ConversionError::UnexpectedNode { node: "text", .. })
        ));

        let block_in_inline = doc(vec![Node::paragraph(vec![Node::paragraph(vec![])])]);
        assert!(try_document_to_markdown(&block_in_inline).is_err());

        let bad_item = doc(vec![Node::BulletList {
            attrs: BulletListAttrs::default(),
            content: vec![Node::paragraph(vec![])],
        }]);
        assert!(try_document_to_markdown(&bad_item).is_err());
    }

    #[test]
    fn test_excessive_nesting_is_an_error() {
        let mut node = Node::paragraph(vec![Node::text("deep")]);
        for _ in 0..=MAX_DEPTH {
            node = Node::Blockquote {
                content: vec![node],
            };
        }
        assert!(matches!(
            try_document_to_markdown(&doc(vec![node])),
            Err(ConversionError::TooDeep(_))
        ));
    }
}
