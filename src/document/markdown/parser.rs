//! Markdown → HTML → rich document.
//!
//! pulldown-cmark renders the Markdown with a fixed extension set, and the
//! resulting HTML fragment is walked with scraper (html5ever), so the mapping
//! works the same in any server context with no DOM.

use pulldown_cmark::{Options, Parser};
use scraper::{ElementRef, Html};

use crate::document::core::rich::{
    BulletListAttrs, CodeBlockAttrs, HeadingAttrs, HorizontalRuleAttrs, LinkAttrs, MAX_DEPTH,
    Mark, Node, OrderedListAttrs, RichDocument,
};

/// Render Markdown to HTML.
#[must_use]
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);

    let mut html = String::with_capacity(markdown.len() + markdown.len() / 2);
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Parse Markdown into a rich document.
#[must_use]
pub fn markdown_to_document(markdown: &str) -> RichDocument {
    html_to_document(&markdown_to_html(markdown))
}

/// Map an HTML fragment onto the document schema.
///
/// Unknown elements are transparent: their children are kept, their tag is not.
#[must_use]
pub fn html_to_document(html: &str) -> RichDocument {
    let fragment = Html::parse_fragment(html);
    RichDocument::new(parse_blocks(fragment.root_element(), 1))
}

fn is_block_tag(name: &str) -> bool {
    matches!(
        name,
        "p" | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "blockquote"
            | "pre"
            | "ul"
            | "ol"
            | "li"
            | "hr"
            | "div"
            | "section"
            | "article"
            | "table"
            | "thead"
            | "tbody"
            | "tr"
            | "td"
            | "th"
    )
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn parse_blocks(parent: ElementRef<'_>, depth: usize) -> Vec<Node> {
    let mut blocks = Vec::new();
    let mut inline = InlineCollector::default();

    for child in parent.children() {
        match child.value() {
            scraper::Node::Text(text) => inline.push_text(text, &[]),
            scraper::Node::Element(element) => {
                let Some(child_ref) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_block_tag(element.name()) {
                    inline.flush_into(&mut blocks);
                    blocks.extend(parse_block(child_ref, depth));
                } else {
                    inline.collect_element(child_ref, &[]);
                }
            }
            _ => {}
        }
    }

    inline.flush_into(&mut blocks);
    blocks
}

fn parse_block(element: ElementRef<'_>, depth: usize) -> Vec<Node> {
    if depth > MAX_DEPTH {
        let text = collapse_whitespace(&element.text().collect::<String>());
        let text = text.trim();
        return if text.is_empty() {
            Vec::new()
        } else {
            vec![Node::paragraph(vec![Node::text(text)])]
        };
    }

    let name = element.value().name();
    if let Some(level) = heading_level(name) {
        return vec![Node::Heading {
            attrs: HeadingAttrs { level },
            content: inline_content(element),
        }];
    }

    match name {
        "p" => vec![Node::paragraph(inline_content(element))],
        "blockquote" => vec![Node::Blockquote {
            content: parse_blocks(element, depth + 1),
        }],
        "pre" => vec![code_block(element)],
        "ul" => vec![Node::BulletList {
            attrs: BulletListAttrs::default(),
            content: list_items(element, depth),
        }],
        "ol" => {
            let order = element
                .value()
                .attr("start")
                .and_then(|start| start.trim().parse().ok())
                .unwrap_or(1);
            vec![Node::OrderedList {
                attrs: OrderedListAttrs { order },
                content: list_items(element, depth),
            }]
        }
        "hr" => vec![Node::HorizontalRule {
            attrs: HorizontalRuleAttrs::default(),
        }],
        _ => parse_blocks(element, depth + 1),
    }
}

fn code_block(pre: ElementRef<'_>) -> Node {
    let params = pre
        .children()
        .filter_map(ElementRef::wrap)
        .find(|child| child.value().name() == "code")
        .and_then(|code| code.value().attr("class"))
        .and_then(|class| {
            class
                .split_whitespace()
                .find_map(|part| part.strip_prefix("language-"))
                .map(str::to_string)
        });

    let mut text: String = pre.text().collect();
    if text.ends_with('\n') {
        text.pop();
    }

    Node::CodeBlock {
        attrs: CodeBlockAttrs { params },
        content: if text.is_empty() {
            Vec::new()
        } else {
            vec![Node::text(text)]
        },
    }
}

fn list_items(list: ElementRef<'_>, depth: usize) -> Vec<Node> {
    list.children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "li")
        .map(|item| {
            let mut content = parse_blocks(item, depth + 1);
            if content.is_empty() {
                content.push(Node::paragraph(Vec::new()));
            }
            Node::ListItem { content }
        })
        .collect()
}

fn inline_content(element: ElementRef<'_>) -> Vec<Node> {
    let mut inline = InlineCollector::default();
    inline.collect_children(element, &[]);
    inline.finish()
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

fn with_mark(marks: &[Mark], mark: Mark) -> Vec<Mark> {
    let mut marks = marks.to_vec();
    if !marks.contains(&mark) {
        marks.push(mark);
        marks.sort_by_key(Mark::rank);
    }
    marks
}

/// Accumulates inline nodes until a block boundary.
#[derive(Default)]
struct InlineCollector {
    nodes: Vec<Node>,
}

impl InlineCollector {
    fn push_text(&mut self, raw: &str, marks: &[Mark]) {
        self.push_verbatim(collapse_whitespace(raw), marks);
    }

    fn push_verbatim(&mut self, text: String, marks: &[Mark]) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text {
            text: previous,
            marks: previous_marks,
        }) = self.nodes.last_mut()
            && previous_marks.as_slice() == marks
        {
            previous.push_str(&text);
            return;
        }
        self.nodes.push(Node::marked(text, marks.to_vec()));
    }

    fn collect_children(&mut self, element: ElementRef<'_>, marks: &[Mark]) {
        for child in element.children() {
            match child.value() {
                scraper::Node::Text(text) => self.push_text(text, marks),
                scraper::Node::Element(_) => {
                    if let Some(child_ref) = ElementRef::wrap(child) {
                        self.collect_element(child_ref, marks);
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_element(&mut self, element: ElementRef<'_>, marks: &[Mark]) {
        let value = element.value();
        match value.name() {
            "br" => self.nodes.push(Node::HardBreak),
            "img" => {
                if let Some(alt) = value.attr("alt") {
                    self.push_text(alt, marks);
                }
            }
            "code" => {
                let code: String = element.text().collect();
                self.push_verbatim(code, &with_mark(marks, Mark::Code));
            }
            "strong" | "b" => self.collect_children(element, &with_mark(marks, Mark::Bold)),
            "em" | "i" => self.collect_children(element, &with_mark(marks, Mark::Italic)),
            "del" | "s" | "strike" => {
                self.collect_children(element, &with_mark(marks, Mark::Strike));
            }
            "a" => {
                let link = Mark::Link {
                    attrs: LinkAttrs {
                        href: value.attr("href").unwrap_or_default().to_string(),
                        title: value.attr("title").map(str::to_string),
                    },
                };
                self.collect_children(element, &with_mark(marks, link));
            }
            _ => self.collect_children(element, marks),
        }
    }

    /// Move pending content into a paragraph unless it is only whitespace.
    fn flush_into(&mut self, blocks: &mut Vec<Node>) {
        let nodes = std::mem::take(&mut self.nodes);
        let content = Self { nodes }.finish();
        if !content.is_empty() {
            blocks.push(Node::paragraph(content));
        }
    }

    /// Trim whitespace at line edges and merge equally-marked neighbours.
    fn finish(self) -> Vec<Node> {
        let mut out: Vec<Node> = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            match node {
                Node::Text { mut text, marks } => {
                    let is_code = marks.contains(&Mark::Code);
                    let after_space = match out.last() {
                        None | Some(Node::HardBreak) => true,
                        Some(Node::Text { text: previous, .. }) => previous.ends_with(' '),
                        Some(_) => false,
                    };
                    if after_space && !is_code {
                        text = text.trim_start_matches(' ').to_string();
                    }
                    if text.is_empty() {
                        continue;
                    }
                    if let Some(Node::Text {
                        text: previous,
                        marks: previous_marks,
                    }) = out.last_mut()
                        && *previous_marks == marks
                    {
                        previous.push_str(&text);
                        continue;
                    }
                    out.push(Node::Text { text, marks });
                }
                Node::HardBreak => {
                    trim_trailing_space(&mut out);
                    out.push(Node::HardBreak);
                }
                other => out.push(other),
            }
        }
        trim_trailing_space(&mut out);
        while matches!(out.last(), Some(Node::HardBreak)) {
            out.pop();
        }
        out
    }
}

fn trim_trailing_space(nodes: &mut Vec<Node>) {
    if let Some(Node::Text { text, marks }) = nodes.last_mut()
        && !marks.contains(&Mark::Code)
    {
        let kept = text.trim_end_matches(' ').len();
        text.truncate(kept);
        if text.is_empty() {
            nodes.pop();
        }
    }
}
