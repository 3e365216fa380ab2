//! Line-level predicates shared by the block and inline parsers.
//!
//! All positions are byte offsets. Every marker the grammar cares about is
//! ASCII, so slicing at a marker position always lands on a char boundary.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockType {
    Unknown,
    Text,
    List,
    CodeIndentedBySpaces,
    Code,
    Blockquote,
    Heading,
}

pub(crate) fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace()
}

pub(crate) fn skip_spaces(i: usize, line: &str) -> usize {
    let bytes = line.as_bytes();
    let mut i = i;
    while i < bytes.len() && is_space(bytes[i]) {
        i += 1;
    }
    i
}

pub(crate) fn is_blank(line: &str) -> bool {
    skip_spaces(0, line) == line.len()
}

pub(crate) fn expand_tabs(line: &str) -> String {
    line.replace('\t', "    ")
}

/// Trim and collapse internal whitespace to single spaces.
pub(crate) fn simplified(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `N.` or `N)` followed by whitespace. Returns the number.
pub(crate) fn ordered_list_number(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    let mut p = skip_spaces(0, s);
    let digits_start = p;
    while p < bytes.len() && bytes[p].is_ascii_digit() {
        p += 1;
    }
    if digits_start == p || p >= bytes.len() {
        return None;
    }
    let num = s[digits_start..p].parse::<u32>().ok()?;
    if (bytes[p] == b'.' || bytes[p] == b')') && p + 1 < bytes.len() && is_space(bytes[p + 1]) {
        Some(num)
    } else {
        None
    }
}

pub(crate) fn is_ordered_list(s: &str) -> bool {
    ordered_list_number(s).is_some()
}

/// Bullet marker `-`, `+` or `*` followed by whitespace, at `s[0]`.
fn starts_with_bullet(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() > 1 && matches!(bytes[0], b'-' | b'+' | b'*') && is_space(bytes[1])
}

/// Read up to the first unescaped whitespace, dropping escaping backslashes.
pub(crate) fn read_escaped_sequence(i: usize, s: &str) -> String {
    let mut ret = String::new();
    let mut backslash = false;
    for ch in s[i..].chars() {
        let mut now = false;
        if ch == '\\' && !backslash {
            backslash = true;
            now = true;
        } else if ch.is_whitespace() && !backslash {
            break;
        } else {
            ret.push(ch);
        }
        if !now {
            backslash = false;
        }
    }
    ret
}

/// Language tag of an opening fence, `Some("")` when the fence has none.
pub(crate) fn fence_syntax(s: &str) -> Option<String> {
    let first = skip_spaces(0, s);
    let str = &s[first..];
    let bytes = str.as_bytes();
    if bytes.len() < 3 || !matches!(bytes[0], b'`' | b'~') {
        return None;
    }
    let c = bytes[0];
    let mut p = 1;
    while p < bytes.len() && bytes[p] == c {
        p += 1;
    }
    if p < 3 {
        return None;
    }
    let p = skip_spaces(p, str);
    if p < str.len() {
        Some(read_escaped_sequence(p, str))
    } else {
        Some(String::new())
    }
}

/// Position of the list item content in `s`.
pub(crate) fn pos_of_list_item(s: &str, ordered: bool) -> usize {
    let bytes = s.as_bytes();
    let mut p = skip_spaces(0, s);
    if ordered {
        while p < bytes.len() && bytes[p].is_ascii_digit() {
            p += 1;
        }
    }
    p += 1;
    skip_spaces(p.min(bytes.len()), s)
}

/// Thematic break: 3+ of `*`, `-` or `_`, optionally separated by spaces.
/// The caller strips at most 3 leading spaces beforehand.
pub(crate) fn is_horizontal_line(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 3 || !matches!(bytes[0], b'*' | b'-' | b'_') {
        return false;
    }
    let c = bytes[0];
    let mut count = 0;
    for &b in bytes {
        if b == c {
            count += 1;
        } else if !is_space(b) {
            return false;
        }
    }
    count >= 3
}

/// Horizontal rule with at most 3 leading spaces.
pub(crate) fn is_indented_horizontal_line(s: &str) -> bool {
    let first = skip_spaces(0, s);
    first < 4 && is_horizontal_line(&s[first..])
}

/// `[^id]:` with a non-empty id, at most 3 leading spaces.
pub(crate) fn is_footnote(s: &str) -> bool {
    let p = skip_spaces(0, s);
    if p > 3 || !s[p..].starts_with("[^") {
        return false;
    }
    let rest = &s[p + 2..];
    match rest.find(']') {
        Some(end) => end > 0 && rest[end + 1..].starts_with(':'),
        None => false,
    }
}

/// Leading run of one repeated character after indentation.
pub(crate) fn start_sequence(line: &str) -> &str {
    let p = skip_spaces(0, line);
    let bytes = line.as_bytes();
    if p >= bytes.len() {
        return "";
    }
    let c = bytes[p];
    let mut end = p;
    while end < bytes.len() && bytes[end] == c {
        end += 1;
    }
    &line[p..end]
}

/// Opening or closing code fence with at most 3 leading spaces.
pub(crate) fn is_code_fences(s: &str, closing: bool) -> bool {
    let p = skip_spaces(0, s);
    if p > 3 {
        return false;
    }
    let seq = start_sequence(s);
    if seq.len() < 3 || !(seq.starts_with('`') || seq.starts_with('~')) {
        return false;
    }
    let rest = &s[p + seq.len()..];
    if closing {
        is_blank(rest)
    } else if seq.starts_with('`') {
        !rest.contains('`')
    } else {
        true
    }
}

pub(crate) fn is_column_alignment(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut p = skip_spaces(0, s);
    if p == bytes.len() {
        return true;
    }
    if !matches!(bytes[p], b':' | b'-') {
        return false;
    }
    if bytes[p] == b':' {
        p += 1;
    }
    let dashes = p;
    while p < bytes.len() && bytes[p] == b'-' {
        p += 1;
    }
    if dashes != p && p - dashes < 3 {
        return false;
    }
    if p == bytes.len() {
        return true;
    }
    if bytes[p] != b':' && !is_space(bytes[p]) {
        return false;
    }
    is_blank(&s[p + 1..])
}

pub(crate) fn is_table_alignment(s: &str) -> bool {
    s.split('|')
        .filter(|c| !c.is_empty())
        .all(is_column_alignment)
}

fn is_setext(s: &str, c: u8) -> bool {
    let bytes = s.as_bytes();
    let mut p = skip_spaces(0, s);
    if p > 3 {
        return false;
    }
    let start = p;
    while p < bytes.len() && bytes[p] == c {
        p += 1;
    }
    p > start && is_blank(&s[p..])
}

pub(crate) fn is_h1(s: &str) -> bool {
    is_setext(s, b'=')
}

pub(crate) fn is_h2(s: &str) -> bool {
    is_setext(s, b'-')
}

/// A line that starts a list item at column 0 of an already dedented list.
pub(crate) fn is_list_item_and_not_nested(s: &str) -> bool {
    skip_spaces(0, s) == 0 && (starts_with_bullet(s) || is_ordered_list(s))
}

/// Content offset of a list item line, or `None` if the line is not an item.
pub(crate) fn list_item_content_pos(s: &str) -> Option<usize> {
    let p = skip_spaces(0, s);
    if p + 1 >= s.len() {
        return None;
    }
    if starts_with_bullet(&s[p..]) {
        Some(p + 2)
    } else {
        ordered_list_number(s).map(|num| p + num.to_string().len() + 2)
    }
}

/// Classify one line. `in_list` is set after an empty line inside a list; then
/// `indent` is the content column of the list and only deeper lines become code.
/// Outside a list, a list marker records its content column into `indent`.
pub(crate) fn classify(str: &str, in_list: bool, indent: Option<&mut usize>) -> BlockType {
    let first = skip_spaces(0, str);
    if first >= str.len() {
        return BlockType::Unknown;
    }
    let s = &str[first..];

    if s.starts_with('>') {
        return BlockType::Blockquote;
    }
    if s.starts_with('#') && first < 4 {
        let c = s.bytes().take_while(|&b| b == b'#').count();
        let after = s.as_bytes().get(c);
        return if c <= 6 && after.is_none_or(|&b| is_space(b)) {
            BlockType::Heading
        } else {
            BlockType::Text
        };
    }
    if first < 4 && is_horizontal_line(s) {
        return BlockType::Text;
    }

    if in_list {
        if starts_with_bullet(s) || is_ordered_list(str) {
            return BlockType::List;
        }
        let width = indent.map_or(4, |i| *i);
        if first >= width + 4 {
            return BlockType::CodeIndentedBySpaces;
        }
    } else {
        let ordered = is_ordered_list(str);
        if starts_with_bullet(s) || ordered {
            if let Some(indent) = indent {
                *indent = pos_of_list_item(str, ordered);
            }
            return BlockType::List;
        }
        if first >= 4 {
            return BlockType::CodeIndentedBySpaces;
        }
    }

    if s.starts_with("```") || s.starts_with("~~~") {
        return if is_code_fences(str, false) {
            BlockType::Code
        } else {
            BlockType::Text
        };
    }
    BlockType::Text
}
