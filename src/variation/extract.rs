use std::ops::Range;

use crate::error::{PromptError, Result};
use crate::variation::Variation;

const OPEN_TAG: &str = "<variation";
const CLOSE_TAG: &str = "</variation";

/// A variation recognized in a buffer, with the byte range of its
/// delimited span (open tag through close tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub variation: Variation,
    pub span: Range<usize>,
}

/// Find and parse the first complete `<variationN> … </variationM>` span.
///
/// Returns `Ok(None)` while no complete span exists. The numeric suffixes
/// must be one or more ASCII digits but need not agree between the open and
/// close tag. Missing text fields degrade to `""` and a missing tags line to
/// an empty list; only a tags value that starts like a JSON array but is
/// not one is an error.
pub fn extract_first(buffer: &str) -> Result<Option<Extracted>> {
    let Some(open) = find_tag(buffer, 0, OPEN_TAG) else {
        return Ok(None);
    };
    let Some(close) = find_tag(buffer, open.end, CLOSE_TAG) else {
        return Ok(None);
    };

    let body = &buffer[open.end..close.start];
    let variation = parse_body(body)?;

    Ok(Some(Extracted {
        variation,
        span: open.start..close.end,
    }))
}

/// Locate the first well-formed tag `<prefix><digits>>` at or after `from`.
/// Candidates with no digits, non-digit suffixes or a missing `>` are skipped.
fn find_tag(s: &str, from: usize, prefix: &str) -> Option<Range<usize>> {
    let mut search_from = from;
    while search_from < s.len() {
        let pos = search_from + s[search_from..].find(prefix)?;
        let digits_start = pos + prefix.len();
        let digits = s.as_bytes()[digits_start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();

        if digits > 0 && s.as_bytes().get(digits_start + digits) == Some(&b'>') {
            return Some(pos..digits_start + digits + 1);
        }

        // '<' is ASCII so pos + 1 stays on a char boundary
        search_from = pos + 1;
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Prompt,
    Description,
    Category,
    Tags,
}

impl Field {
    const ALL: [Field; 4] = [Field::Prompt, Field::Description, Field::Category, Field::Tags];

    fn key(self) -> &'static str {
        match self {
            Field::Prompt => "prompt",
            Field::Description => "description",
            Field::Category => "category",
            Field::Tags => "tags",
        }
    }
}

/// Classification of one line inside a delimited span.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Field(Field, &'a str),
    Other,
}

fn classify(line: &str) -> Line<'_> {
    let line = line.trim_start();
    for field in Field::ALL {
        if let Some(rest) = line.strip_prefix(field.key()) {
            if let Some(value) = rest.strip_prefix(':') {
                return Line::Field(field, value.trim());
            }
        }
    }
    Line::Other
}

fn parse_body(body: &str) -> Result<Variation> {
    let mut prompt = None;
    let mut description = None;
    let mut category = None;
    let mut tags = None;

    for line in body.lines() {
        let Line::Field(field, value) = classify(line) else {
            continue;
        };
        let slot = match field {
            Field::Prompt => &mut prompt,
            Field::Description => &mut description,
            Field::Category => &mut category,
            Field::Tags => &mut tags,
        };
        // first occurrence wins
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    Ok(Variation {
        prompt: prompt.unwrap_or_default().to_string(),
        description: description.unwrap_or_default().to_string(),
        category: category.unwrap_or_default().to_string(),
        tags: match tags {
            Some(value) => parse_tags(value)?,
            None => Vec::new(),
        },
    })
}

/// Decode the leading JSON array of strings in a tags value. Anything after
/// the closing bracket is ignored; a value that does not open with `[`
/// carries no tags.
fn parse_tags(value: &str) -> Result<Vec<String>> {
    if !value.starts_with('[') {
        return Ok(Vec::new());
    }

    let mut values = serde_json::Deserializer::from_str(value).into_iter::<Vec<String>>();
    match values.next() {
        Some(Ok(tags)) => Ok(tags),
        Some(Err(e)) => Err(PromptError::MalformedTags(format!("{e}: {value}"))),
        None => Ok(Vec::new()),
    }
}
