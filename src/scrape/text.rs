//! Line-oriented parser for the Prometheus text exposition format.
//!
//! Only the pieces the source tasks consume are modeled: sample lines with
//! their label sets, grouped into families by sample name. Values are kept
//! as raw strings; numeric interpretation belongs to the transform step so
//! a malformed value can skip a single row instead of the whole document.

use std::collections::HashMap;

/// A named group of samples from one scraped document.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub samples: Vec<Sample>,
}

/// One sample line: label set plus the raw value string.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: HashMap<String, String>,
    pub value: String,
}

/// Parse an exposition document into families, preserving first-seen family
/// order and per-family sample order. Comment lines, blank lines, and lines
/// that do not form a valid sample are skipped.
pub fn parse_families(body: &str) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, sample)) = parse_sample_line(line) else {
            continue;
        };

        match index.get(&name) {
            Some(&i) => families[i].samples.push(sample),
            None => {
                index.insert(name.clone(), families.len());
                families.push(MetricFamily {
                    name,
                    samples: vec![sample],
                });
            }
        }
    }

    families
}

/// Parse `name{label="value",...} value [timestamp]` or `name value`.
fn parse_sample_line(line: &str) -> Option<(String, Sample)> {
    let (name, labels, rest) = match line.find('{') {
        Some(open) => {
            let name = line[..open].trim();
            let close = find_label_end(&line[open + 1..])? + open + 1;
            let labels = parse_labels(&line[open + 1..close])?;
            (name, labels, &line[close + 1..])
        }
        None => {
            let mut parts = line.splitn(2, char::is_whitespace);
            let name = parts.next()?;
            (name, HashMap::new(), parts.next().unwrap_or(""))
        }
    };

    if name.is_empty() {
        return None;
    }

    // First token after the label set is the value; an optional timestamp
    // may follow and is ignored.
    let value = rest.split_whitespace().next()?.to_string();

    Some((
        name.to_string(),
        Sample {
            labels,
            value,
        },
    ))
}

/// Offset of the closing `}` within the label body, honoring quoted values.
fn find_label_end(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes => return Some(i),
            _ => {}
        }
    }

    None
}

fn parse_labels(body: &str) -> Option<HashMap<String, String>> {
    let mut labels = HashMap::new();
    let mut rest = body.trim();

    while !rest.is_empty() {
        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_string();
        let after_key = rest[eq + 1..].trim_start();
        if !after_key.starts_with('"') {
            return None;
        }

        let (value, consumed) = parse_quoted(&after_key[1..])?;
        labels.insert(key, value);

        rest = after_key[1 + consumed..].trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    Some(labels)
}

/// Parse a quoted label value starting after the opening quote. Returns the
/// unescaped value and the number of bytes consumed including the closing
/// quote.
fn parse_quoted(s: &str) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = s.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return None,
            },
            '"' => return Some((value, i + 1)),
            _ => value.push(c),
        }
    }

    None
}
