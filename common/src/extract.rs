use thiserror::Error;

/// Failure while turning tagged model output into typed data. Parsing fails
/// closed: a malformed section is surfaced as an error, never as a
/// partially-coerced value.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("missing <{0}> section in model output")]
    MissingTag(String),

    #[error("invalid JSON in <{tag}> section: {source}")]
    InvalidJson {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected value in <{tag}> section: {detail}")]
    Invalid { tag: String, detail: String },
}

/// Remove `<think>...</think>` reasoning blocks. An unterminated block
/// swallows the rest of the text, matching how reasoning models stream.
pub fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Every `<tag>...</tag>` section body, trimmed, in document order.
pub fn extract_all(text: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut sections = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        sections.push(after[..end].trim().to_string());
        rest = &after[end + close.len()..];
    }
    sections
}

/// First `<tag>` section body; `MissingTag` when the reply has none.
pub fn extract_required(text: &str, tag: &str) -> Result<String, ParseError> {
    extract_all(text, tag)
        .into_iter()
        .next()
        .ok_or_else(|| ParseError::MissingTag(tag.to_string()))
}

pub fn extract_optional(text: &str, tag: &str) -> Option<String> {
    extract_all(text, tag).into_iter().next()
}

/// Clean near-JSON model output so it parses strictly: drop `//` line
/// comments and trailing commas, both outside string literals only.
pub fn clean_json_block(block: &str) -> String {
    strip_trailing_commas(&strip_line_comments(block))
}

fn strip_line_comments(block: &str) -> String {
    let chars: Vec<char> = block.chars().collect();
    let mut out = String::with_capacity(block.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 2;
                    continue;
                }
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
        } else if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

fn strip_trailing_commas(block: &str) -> String {
    let chars: Vec<char> = block.chars().collect();
    let mut out = String::with_capacity(block.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 2;
                    continue;
                }
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
        } else if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
        } else if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if !matches!(chars.get(j), Some('}') | Some(']')) {
                out.push(c);
            }
            i += 1;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}
