// Display metadata extracted from markdown files: front-matter title, first
// level-1 heading, `#tags`, `[[wiki links]]` and word/character counts.

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownMetadata {
    pub title: Option<String>,
    pub heading: Option<String>,
    pub tags: Vec<String>,
    pub links: Vec<String>,
    pub word_count: u64,
    pub char_count: u64,
}

pub fn extract_metadata(markdown: &str) -> MarkdownMetadata {
    let (front_matter, body) = split_front_matter(markdown);
    let mut metadata = MarkdownMetadata {
        title: front_matter.and_then(front_matter_title),
        word_count: body.split_whitespace().count() as u64,
        char_count: body.chars().filter(|ch| !ch.is_whitespace()).count() as u64,
        links: wiki_link_targets(body),
        ..MarkdownMetadata::default()
    };

    let mut in_h1: Option<String> = None;
    let mut in_code = false;
    for event in Parser::new(body) {
        match event {
            Event::Start(Tag::Heading { level: HeadingLevel::H1, .. }) if metadata.heading.is_none() => {
                in_h1 = Some(String::new());
            }
            Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
                if let Some(text) = in_h1.take() {
                    let text = text.trim();
                    if !text.is_empty() {
                        metadata.heading = Some(text.to_string());
                    }
                }
            }
            Event::Start(Tag::CodeBlock(_)) => in_code = true,
            Event::End(TagEnd::CodeBlock) => in_code = false,
            Event::Text(text) => {
                if let Some(heading) = in_h1.as_mut() {
                    heading.push_str(&text);
                }
                if !in_code {
                    collect_tags(&text, &mut metadata.tags);
                }
            }
            Event::Code(text) => {
                if let Some(heading) = in_h1.as_mut() {
                    heading.push_str(&text);
                }
            }
            _ => {}
        }
    }

    metadata
}

/// Returns (front matter, body). Front matter is a leading `---` fenced block.
fn split_front_matter(markdown: &str) -> (Option<&str>, &str) {
    let Some(rest) = markdown.strip_prefix("---\n").or_else(|| markdown.strip_prefix("---\r\n")) else {
        return (None, markdown);
    };

    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, markdown)
}

fn front_matter_title(front_matter: &str) -> Option<String> {
    front_matter.lines().find_map(|line| {
        let value = line.strip_prefix("title:")?.trim();
        let value = value.trim_matches(|ch| ch == '"' || ch == '\'').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn collect_tags(text: &str, tags: &mut Vec<String>) {
    let mut previous: Option<char> = None;
    let mut chars = text.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        let at_boundary = previous.map_or(true, char::is_whitespace);
        previous = Some(ch);
        if ch != '#' || !at_boundary {
            continue;
        }

        let start = index + 1;
        let mut end = start;
        while let Some((next_index, next)) = chars.peek().copied() {
            if next.is_alphanumeric() || matches!(next, '-' | '_' | '/') {
                end = next_index + next.len_utf8();
                previous = Some(next);
                chars.next();
            } else {
                break;
            }
        }

        let tag = &text[start..end];
        if !tag.is_empty() && !tag.chars().all(|ch| ch.is_ascii_digit()) && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
}

/// Targets of `[[target]]`, `[[target|alias]]` and `[[target#heading]]`
/// links, deduplicated in order of first appearance.
fn wiki_link_targets(markdown: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    let mut rest = markdown;

    while let Some(open) = rest.find("[[") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("]]") else {
            break;
        };

        let inner = after_open[..close].trim();
        let target = inner.split('|').next().unwrap_or("").split('#').next().unwrap_or("").trim();
        if !target.is_empty() && !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
        rest = &after_open[close + 2..];
    }

    targets
}
