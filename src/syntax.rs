//! Minimal syntax highlighting for code blocks.

use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorRole {
    Regular,
    Keyword,
    Comment,
}

/// Byte range `start..end` of line `line` drawn with `role`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColoredSpan {
    pub line: usize,
    pub start: usize,
    pub end: usize,
    pub role: ColorRole,
}

/// Splits code into colored spans. The spans of a line are ordered and cover
/// the whole line.
pub trait Tokenizer: Send + Sync {
    fn prepare(&self, lines: &[&str]) -> Vec<ColoredSpan>;
}

/// Every line is regular text.
struct PlainTokenizer;

impl Tokenizer for PlainTokenizer {
    fn prepare(&self, lines: &[&str]) -> Vec<ColoredSpan> {
        lines
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.is_empty())
            .map(|(line, l)| ColoredSpan {
                line,
                start: 0,
                end: l.len(),
                role: ColorRole::Regular,
            })
            .collect()
    }
}

/// Keywords plus C style `//` and `/* */` comments. Double quoted strings are
/// skipped so that comment markers inside them are not highlighted.
struct CStyleTokenizer {
    keywords: &'static [&'static str],
}

impl CStyleTokenizer {
    fn push(spans: &mut Vec<ColoredSpan>, line: usize, start: usize, end: usize, role: ColorRole) {
        if start == end {
            return;
        }
        match spans.last_mut() {
            Some(prev) if prev.line == line && prev.end == start && prev.role == role => {
                prev.end = end
            }
            _ => spans.push(ColoredSpan {
                line,
                start,
                end,
                role,
            }),
        }
    }
}

impl Tokenizer for CStyleTokenizer {
    fn prepare(&self, lines: &[&str]) -> Vec<ColoredSpan> {
        let mut spans = Vec::new();
        let mut in_block_comment = false;

        for (n, line) in lines.iter().enumerate() {
            let bytes = line.as_bytes();
            let mut pos = 0;
            while pos < bytes.len() {
                let rest = &line[pos..];
                if in_block_comment {
                    let end = rest.find("*/").map_or(bytes.len(), |i| pos + i + 2);
                    in_block_comment = end == bytes.len() && !rest.ends_with("*/");
                    Self::push(&mut spans, n, pos, end, ColorRole::Comment);
                    pos = end;
                } else if rest.starts_with("//") {
                    Self::push(&mut spans, n, pos, bytes.len(), ColorRole::Comment);
                    pos = bytes.len();
                } else if rest.starts_with("/*") {
                    in_block_comment = true;
                    Self::push(&mut spans, n, pos, pos + 2, ColorRole::Comment);
                    pos += 2;
                } else if bytes[pos] == b'"' {
                    let mut end = pos + 1;
                    while end < bytes.len() && bytes[end] != b'"' {
                        end += if bytes[end] == b'\\' { 2 } else { 1 };
                    }
                    let mut end = (end + 1).min(bytes.len());
                    while !line.is_char_boundary(end) {
                        end += 1;
                    }
                    Self::push(&mut spans, n, pos, end, ColorRole::Regular);
                    pos = end;
                } else if bytes[pos].is_ascii_alphabetic() || bytes[pos] == b'_' {
                    let len = rest
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                        .unwrap_or(rest.len());
                    let word = &rest[..len];
                    let role = if self.keywords.binary_search(&word).is_ok() {
                        ColorRole::Keyword
                    } else {
                        ColorRole::Regular
                    };
                    Self::push(&mut spans, n, pos, pos + len, role);
                    pos += len;
                } else {
                    let len = rest.chars().next().map_or(1, char::len_utf8);
                    Self::push(&mut spans, n, pos, pos + len, ColorRole::Regular);
                    pos += len;
                }
            }
        }
        spans
    }
}

// Sorted for binary search.
const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "auto", "bool", "break", "case", "catch", "char", "class", "const",
    "constexpr", "continue", "decltype", "default", "delete", "do", "double", "else", "enum",
    "explicit", "extern", "false", "float", "for", "friend", "goto", "if", "inline", "int", "long",
    "mutable", "namespace", "new", "noexcept", "nullptr", "operator", "override", "private",
    "protected", "public", "return", "short", "signed", "sizeof", "static", "static_cast",
    "struct", "switch", "template", "this", "throw", "true", "try", "typedef", "typename",
    "union", "unsigned", "using", "virtual", "void", "volatile", "while",
];

const RUST_KEYWORDS: &[&str] = &[
    "Self", "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true", "type",
    "unsafe", "use", "where", "while",
];

const JAVA_KEYWORDS: &[&str] = &[
    "abstract", "boolean", "break", "byte", "case", "catch", "char", "class", "continue",
    "default", "do", "double", "else", "enum", "extends", "false", "final", "finally", "float",
    "for", "if", "implements", "import", "instanceof", "int", "interface", "long", "new", "null",
    "package", "private", "protected", "public", "return", "short", "static", "super", "switch",
    "synchronized", "this", "throw", "throws", "true", "try", "void", "volatile", "while",
];

/// Language tag to tokenizer mapping, built once and shared read-only.
pub struct SyntaxRegistry {
    by_tag: HashMap<&'static str, Arc<dyn Tokenizer>>,
    plain: Arc<dyn Tokenizer>,
}

impl Default for SyntaxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntaxRegistry {
    pub fn new() -> Self {
        let cpp: Arc<dyn Tokenizer> = Arc::new(CStyleTokenizer {
            keywords: CPP_KEYWORDS,
        });
        let mut by_tag: HashMap<&'static str, Arc<dyn Tokenizer>> = HashMap::new();
        for tag in ["cpp", "c++", "c", "h", "hpp"] {
            by_tag.insert(tag, Arc::clone(&cpp));
        }
        by_tag.insert("rust", Arc::new(CStyleTokenizer { keywords: RUST_KEYWORDS }));
        by_tag.insert("rs", Arc::new(CStyleTokenizer { keywords: RUST_KEYWORDS }));
        by_tag.insert("java", Arc::new(CStyleTokenizer { keywords: JAVA_KEYWORDS }));
        SyntaxRegistry {
            by_tag,
            plain: Arc::new(PlainTokenizer),
        }
    }

    /// Tokenizer for `tag`; unknown tags get one that marks everything regular.
    pub fn tokenizer(&self, tag: &str) -> &dyn Tokenizer {
        self.by_tag
            .get(tag.trim().to_ascii_lowercase().as_str())
            .unwrap_or(&self.plain)
            .as_ref()
    }

    pub fn prepare(&self, tag: &str, lines: &[&str]) -> Vec<ColoredSpan> {
        self.tokenizer(tag).prepare(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(tag: &str, line: &str) -> Vec<(String, ColorRole)> {
        SyntaxRegistry::new()
            .prepare(tag, &[line])
            .into_iter()
            .map(|s| (line[s.start..s.end].to_string(), s.role))
            .collect()
    }

    #[test]
    fn keyword_lists_are_sorted() {
        for list in [CPP_KEYWORDS, RUST_KEYWORDS, JAVA_KEYWORDS] {
            assert!(list.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn highlights_keywords_and_line_comments() {
        assert_eq!(
            roles("cpp", "int x; // note"),
            vec![
                ("int".to_string(), ColorRole::Keyword),
                (" x; ".to_string(), ColorRole::Regular),
                ("// note".to_string(), ColorRole::Comment),
            ]
        );
    }

    #[test]
    fn block_comment_spans_lines() {
        let spans = SyntaxRegistry::new().prepare("rust", &["let a; /* one", "two */ fn"]);
        let comments: Vec<_> = spans.iter().filter(|s| s.role == ColorRole::Comment).collect();
        assert_eq!(comments.len(), 2);
        assert_eq!((comments[0].line, comments[0].start, comments[0].end), (0, 7, 13));
        assert_eq!((comments[1].line, comments[1].start, comments[1].end), (1, 0, 6));
        assert_eq!(spans.last().unwrap().role, ColorRole::Keyword);
    }

    #[test]
    fn comment_markers_inside_strings_are_ignored() {
        let spans = roles("java", "s = \"http://x\";");
        assert!(spans.iter().all(|(_, r)| *r == ColorRole::Regular));
    }

    #[test]
    fn unknown_language_is_regular() {
        let spans = SyntaxRegistry::new().prepare("brainfuck", &["int // x", "", "y"]);
        assert_eq!(
            spans,
            vec![
                ColoredSpan { line: 0, start: 0, end: 8, role: ColorRole::Regular },
                ColoredSpan { line: 2, start: 0, end: 1, role: ColorRole::Regular },
            ]
        );
    }

    #[test]
    fn spans_cover_each_line() {
        let line = "fn main() { println!(\"hi\"); }";
        let spans = SyntaxRegistry::new().prepare("RUST", &[line]);
        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, line.len());
        assert!(spans.windows(2).all(|w| w[0].end == w[1].start));
    }
}
