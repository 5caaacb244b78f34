//! Static Lineage Extractor
//!
//! Pattern-based column candidates from script text. Used only when the proxy
//! observed nothing; callers intersect the candidates with the dataset's columns.

use super::rules::LineageRules;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;

lazy_static! {
    static ref SINGLE_SUBSCRIPT: Regex = Regex::new(r#"\[\s*(?:'([^'\n]*)'|"([^"\n]*)")\s*\]"#).unwrap();
    static ref LIST_SUBSCRIPT: Regex = Regex::new(r"\[\s*\[([^\[\]]*)\]\s*\]").unwrap();
    static ref QUOTED: Regex = Regex::new(r#"'([^'\n]*)'|"([^"\n]*)""#).unwrap();
    static ref KEYWORD_ARG: Regex = Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=[^=]").unwrap();
    static ref DICT_KEY: Regex = Regex::new(r#"(?:'([^'\n]*)'|"([^"\n]*)")\s*:"#).unwrap();
}

/// Byte spans of quoted literal contents in `text`, shifted by `base`
fn quoted_spans(text: &str, base: usize) -> Vec<Range<usize>> {
    QUOTED
        .captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| base + m.start()..base + m.end())
        .collect()
}

/// Remove `#` comments, leaving `#` inside string literals alone
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut cut = line.len();
        for (i, c) in line.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match (quote, c) {
                (Some(_), '\\') => escaped = true,
                (Some(q), c) if c == q => quote = None,
                (None, '\'') | (None, '"') => quote = Some(c),
                (None, '#') => {
                    cut = i;
                    break;
                }
                _ => {}
            }
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}

/// Replace the contents of every string literal with `_`, keeping byte offsets.
/// Quotes stay, so literals still delimit arguments, but text inside a literal
/// can no longer look like code.
pub fn mask_strings(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;
    while i < bytes.len() {
        let quote = bytes[i];
        if quote != b'\'' && quote != b'"' {
            i += 1;
            continue;
        }
        let closing = [quote; 3];
        let triple = bytes[i..].starts_with(&closing);
        let width = if triple { 3 } else { 1 };
        let mut j = i + width;
        while j < bytes.len() {
            match bytes[j] {
                b'\\' => {
                    out[j] = b'_';
                    if j + 1 < bytes.len() && bytes[j + 1] != b'\n' {
                        out[j + 1] = b'_';
                    }
                    j += 2;
                    continue;
                }
                c if c == quote && (!triple || bytes[j..].starts_with(&closing)) => break,
                b'\n' if !triple => break,
                b'\n' => {}
                _ => out[j] = b'_',
            }
            j += 1;
        }
        i = j + width;
    }
    // every byte of a multi-byte character inside a literal is rewritten
    String::from_utf8(out).unwrap_or_else(|_| text.to_string())
}

/// Span between the parenthesis at `open` and its match
fn call_arguments(text: &str, open: usize) -> Range<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text[open..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') | (None, '[') | (None, '{') => depth += 1,
            (None, ')') | (None, ']') | (None, '}') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return open + 1..open + i;
                }
            }
            _ => {}
        }
    }
    open + 1..text.len()
}

/// Split `span` on commas outside brackets and strings
fn split_top_level(text: &str, span: Range<usize>) -> Vec<Range<usize>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = span.start;
    for (i, c) in text[span.clone()].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') | (None, '[') | (None, '{') => depth += 1,
            (None, ')') | (None, ']') | (None, '}') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(start..span.start + i);
                start = span.start + i + 1;
            }
            _ => {}
        }
    }
    parts.push(start..span.end);
    parts
}

/// Trimmed text of `span` and the offset it starts at
fn trimmed(text: &str, span: Range<usize>) -> (&str, usize) {
    let raw = &text[span.clone()];
    let lead = raw.len() - raw.trim_start().len();
    (raw.trim(), span.start + lead)
}

fn argument_candidates(text: &str, span: Range<usize>) -> Vec<Range<usize>> {
    let (arg, base) = trimmed(text, span);
    if arg.starts_with('{') {
        return DICT_KEY
            .captures_iter(arg)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| base + m.start()..base + m.end())
            .collect();
    }
    if arg.starts_with('\'') || arg.starts_with('"') || arg.starts_with('[') || arg.starts_with('(') {
        return quoted_spans(arg, base);
    }
    Vec::new()
}

/// Column of a named aggregation: the first literal of `('sales', 'sum')`
fn named_aggregation(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let (arg, base) = trimmed(text, span);
    if !arg.starts_with('(') {
        return None;
    }
    quoted_spans(arg, base).into_iter().next()
}

#[derive(Debug, Clone)]
pub struct StaticLineageExtractor {
    rules: LineageRules,
    operation_call: Option<Regex>,
}

impl StaticLineageExtractor {
    pub fn new(rules: LineageRules) -> Self {
        let alternatives: Vec<String> = rules.operations.iter().map(|op| regex::escape(op)).collect();
        let operation_call = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(r"\.({})\s*\(", alternatives.join("|"))).ok()
        };
        Self {
            rules,
            operation_call,
        }
    }

    /// Raw column candidates; may include names that are not dataset columns.
    /// Comments and text inside string literals never contribute.
    pub fn extract_candidates(&self, source: &str) -> BTreeSet<String> {
        let text = strip_comments(source);
        // same byte offsets as `text`; matching runs here, names are read from `text`
        let code = mask_strings(&text);
        let mut spans = Vec::new();

        for caps in SINGLE_SUBSCRIPT.captures_iter(&code) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                spans.push(m.range());
            }
        }
        for caps in LIST_SUBSCRIPT.captures_iter(&code) {
            if let Some(m) = caps.get(1) {
                spans.extend(quoted_spans(m.as_str(), m.start()));
            }
        }

        if let Some(call) = &self.operation_call {
            for caps in call.captures_iter(&code) {
                let (Some(whole), Some(op)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let named_aggregations = self.rules.takes_named_aggregations(op.as_str());
                let args = call_arguments(&code, whole.end() - 1);
                for arg in split_top_level(&code, args) {
                    let Some(kw) = KEYWORD_ARG.captures(&code[arg.clone()]) else {
                        spans.extend(argument_candidates(&code, arg));
                        continue;
                    };
                    let name = kw.get(1).map(|k| k.as_str()).unwrap_or_default();
                    let Some(eq) = code[arg.clone()].find('=') else {
                        continue;
                    };
                    let value = arg.start + eq + 1..arg.end;
                    if self.rules.is_column_keyword(name) {
                        spans.extend(argument_candidates(&code, value));
                    } else if named_aggregations {
                        spans.extend(named_aggregation(&code, value));
                    }
                }
            }
        }
        spans.into_iter().map(|span| text[span].to_string()).collect()
    }
}

impl Default for StaticLineageExtractor {
    fn default() -> Self {
        Self::new(LineageRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> Vec<String> {
        StaticLineageExtractor::default()
            .extract_candidates(source)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_subscripts_single_and_list() {
        let found = extract("a = df['sales']\nb = df[[\"region\", 'date']]\n");
        assert_eq!(found, vec!["date", "region", "sales"]);
    }

    #[test]
    fn test_operation_keywords_and_positionals() {
        let found = extract("df.groupby(by='region').agg({'sales': 'sum'})\ndf.sort_values('date', ascending=False)");
        assert_eq!(found, vec!["date", "region", "sales"]);
    }

    #[test]
    fn test_named_aggregation_columns() {
        let found = extract("df.groupby('region').agg(total=('sales', 'sum'), label='units')");
        assert_eq!(found, vec!["region", "sales"]);
    }

    #[test]
    fn test_rename_mapping_keys() {
        let found = extract("df.rename(columns={'sales': 'revenue'})");
        assert_eq!(found, vec!["sales"]);
    }

    #[test]
    fn test_comments_are_ignored() {
        let found = extract("# df['secret']\nx = df['sales']  # df['other']\ns = '#'");
        assert_eq!(found, vec!["sales"]);
    }

    #[test]
    fn test_code_inside_string_literals_is_ignored() {
        let source = r#"print("see df['region'] and df.groupby('date')")
note = '''
df[['sales']]
'''
x = df['units']"#;
        assert_eq!(extract(source), vec!["units"]);
    }

    #[test]
    fn test_mask_keeps_offsets() {
        let source = r#"a = 'héllo' + "x\"y""#;
        let masked = mask_strings(source);
        assert_eq!(masked.len(), source.len());
        assert!(masked.starts_with("a = '"));
        assert!(masked.ends_with('"'));
        assert!(!masked.contains("llo"));
        assert!(!masked.contains('y'));
    }

    #[test]
    fn test_unrelated_calls_are_ignored() {
        assert!(extract("print('region')\nx = len('sales')").is_empty());
    }
}
