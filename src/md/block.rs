//! Block structure: splitting a line stream into fragments and turning each
//! fragment into headings, paragraphs, lists, quotes, tables and code.

use std::collections::BTreeSet;

use crate::error::ParseError;
use crate::model::{
    Alignment, Blockquote, Code, Footnote, Heading, Item, List, ListItem, ListKind, ListStart,
    Math, Paragraph, Table, TableCell, TableRow,
};

use super::Context;
use super::inline::parse_formatted_text;
use super::lines::{
    BlockType, classify, expand_tabs, fence_syntax, is_code_fences, is_footnote, is_h1, is_h2,
    is_horizontal_line, is_indented_horizontal_line, is_list_item_and_not_nested, is_space,
    is_table_alignment, list_item_content_pos, ordered_list_number, simplified, skip_spaces,
    start_sequence,
};
use super::stream::{LineStream, StringListStream, read_line_without_comments};

/// Accumulates consecutive lines of one block type.
struct Splitter {
    fragments: Vec<Vec<String>>,
    fragment: Vec<String>,
    kind: BlockType,
    empty_line_in_list: bool,
    empty_lines_in_list: usize,
    empty_lines_in_code: usize,
    indents: BTreeSet<usize>,
    indent: usize,
    start_of_code: String,
}

impl Splitter {
    fn new() -> Self {
        Splitter {
            fragments: Vec::new(),
            fragment: Vec::new(),
            kind: BlockType::Unknown,
            empty_line_in_list: false,
            empty_lines_in_list: 0,
            empty_lines_in_code: 0,
            indents: BTreeSet::new(),
            indent: 0,
            start_of_code: String::new(),
        }
    }

    fn flush(&mut self) {
        if !self.fragment.is_empty() {
            self.fragments.push(std::mem::take(&mut self.fragment));
        }
        self.kind = BlockType::Unknown;
        self.empty_line_in_list = false;
        self.empty_lines_in_list = 0;
        self.empty_lines_in_code = 0;
        self.indents.clear();
        self.indent = 0;
    }

    fn start(&mut self, kind: BlockType, line: String) {
        self.kind = kind;
        if kind == BlockType::Code {
            self.start_of_code = start_sequence(&line).to_string();
        }
        self.fragment.push(line);
        if kind == BlockType::Heading {
            self.flush();
        }
    }

    /// A non-blank line after blank lines still belongs to the list when it
    /// is indented at least as deep as the shallowest item content.
    fn indent_in_list(&self, ns: usize) -> bool {
        self.indents.first().is_some_and(|&min| ns >= min)
    }

    /// Footnote bodies continue over blank lines and lines indented by 4.
    fn eat_footnote(&mut self, stream: &mut dyn LineStream, in_comment: &mut bool) {
        while !stream.at_end() {
            let (raw, _) = read_line_without_comments(stream, in_comment);
            let line = expand_tabs(&raw);
            if line.is_empty() || line.starts_with("    ") {
                self.fragment.push(line);
            } else {
                self.flush();
                let kind = classify(&line, false, Some(&mut self.indent));
                self.start(kind, line);
                break;
            }
        }
    }

    fn finish(mut self) -> Result<Vec<Vec<String>>, ParseError> {
        if !self.fragment.is_empty() {
            if self.kind == BlockType::Code {
                return Err(ParseError::UnterminatedFence {
                    line: self.fragment[0].clone(),
                });
            }
            self.flush();
        }
        Ok(self.fragments)
    }
}

pub(crate) fn split_fragments(stream: &mut dyn LineStream) -> Result<Vec<Vec<String>>, ParseError> {
    use BlockType::*;

    let mut s = Splitter::new();
    let mut in_comment = false;
    let mut split = false;

    while !stream.at_end() {
        let (raw, was_comment) = read_line_without_comments(stream, &mut in_comment);
        let line = expand_tabs(&raw);
        if was_comment {
            split = true;
        }

        let prev_indent = s.indent;
        let mut line_type = classify(&line, s.empty_line_in_list, Some(&mut s.indent));
        if prev_indent != s.indent {
            s.indents.insert(s.indent);
        }

        let ns = skip_spaces(0, &line);
        let blank = ns == line.len();

        // A comment between two lists ends the first one.
        if matches!(line_type, List | CodeIndentedBySpaces) && s.kind == List && split {
            s.flush();
            s.start(line_type, line);
            split = false;
            continue;
        }
        if !blank {
            split = false;
        }

        if s.kind == CodeIndentedBySpaces && ns > 3 {
            line_type = CodeIndentedBySpaces;
        }

        if s.kind == Unknown {
            if !blank {
                s.start(line_type, line);
            }
            continue;
        }

        if blank {
            match s.kind {
                Text => {
                    if is_footnote(&s.fragment[0]) {
                        s.fragment.push(String::new());
                        s.eat_footnote(stream, &mut in_comment);
                    } else {
                        s.flush();
                    }
                }
                Blockquote => s.flush(),
                CodeIndentedBySpaces => s.empty_lines_in_code += 1,
                Code => s.fragment.push(line),
                List => {
                    s.empty_line_in_list = true;
                    s.empty_lines_in_list += 1;
                }
                _ => {}
            }
            continue;
        }

        if s.empty_line_in_list {
            if s.indent_in_list(ns) || matches!(line_type, List | CodeIndentedBySpaces) {
                for _ in 0..s.empty_lines_in_list {
                    s.fragment.push(String::new());
                }
                s.fragment.push(line);
                s.empty_line_in_list = false;
                s.empty_lines_in_list = 0;
            } else {
                s.flush();
                s.start(line_type, line);
            }
            continue;
        }

        if s.empty_lines_in_code > 0 {
            if line_type == CodeIndentedBySpaces {
                let indent = skip_spaces(0, &s.fragment[0]);
                for _ in 0..s.empty_lines_in_code {
                    s.fragment.push(" ".repeat(indent));
                }
                s.fragment.push(line);
                s.empty_lines_in_code = 0;
            } else {
                s.flush();
                s.start(line_type, line);
            }
            continue;
        }

        if s.kind != line_type && !matches!(s.kind, Code | List | Blockquote) {
            let continues_paragraph = s.kind == Text
                && (line_type == CodeIndentedBySpaces
                    || (line_type == List && ordered_list_number(&line).is_some_and(|n| n > 1)));
            if continues_paragraph {
                s.fragment.push(line);
            } else {
                s.flush();
                s.start(line_type, line);
            }
        } else if s.kind == Code
            && line_type == Code
            && start_sequence(&line) == s.start_of_code
            && is_code_fences(&line, true)
        {
            s.fragment.push(line);
            s.flush();
        } else {
            s.fragment.push(line);
        }
    }

    s.finish()
}

/// Parse a nested container's lines into `parent`.
pub(crate) fn parse_lines(
    lines: Vec<String>,
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    let mut stream = StringListStream::new(lines);
    for fragment in split_fragments(&mut stream)? {
        parse_fragment(fragment, parent, ctx, collect_ref_links)?;
    }
    Ok(())
}

/// Top level of one file: the first pass over the fragments only collects
/// reference definitions, the second builds the tree.
pub(crate) fn parse_top_level(
    stream: &mut dyn LineStream,
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
) -> Result<(), ParseError> {
    let fragments = split_fragments(stream)?;
    for fragment in &fragments {
        parse_fragment(fragment.clone(), parent, ctx, true)?;
    }
    for fragment in fragments {
        parse_fragment(fragment, parent, ctx, false)?;
    }
    Ok(())
}

fn parse_fragment(
    fr: Vec<String>,
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    let Some(first) = fr.first() else {
        return Ok(());
    };
    match classify(first, false, None) {
        BlockType::Text => parse_text(fr, parent, ctx, collect_ref_links),
        BlockType::Blockquote => parse_blockquote(fr, parent, ctx, collect_ref_links),
        BlockType::Code => parse_code(fr, parent, collect_ref_links),
        BlockType::CodeIndentedBySpaces => {
            if !collect_ref_links {
                parse_indented_code(&fr, parent, 4, String::new());
            }
            Ok(())
        }
        BlockType::Heading => {
            if !collect_ref_links {
                parse_heading(&fr[0], parent, ctx);
            }
            Ok(())
        }
        BlockType::List => parse_list(fr, parent, ctx, collect_ref_links),
        BlockType::Unknown => Ok(()),
    }
}

fn parse_text(
    fr: Vec<String>,
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    if is_footnote(&fr[0]) {
        parse_footnote(fr, ctx, collect_ref_links)
    } else if fr[0].contains('|') && fr.len() > 1 && is_table_alignment(&fr[1]) {
        parse_table(&fr, parent, ctx, collect_ref_links);
        Ok(())
    } else {
        parse_paragraph(fr, parent, ctx, collect_ref_links)
    }
}

fn take_paragraph(items: Vec<Item>) -> Paragraph {
    items
        .into_iter()
        .find_map(|i| match i {
            Item::Paragraph(p) => Some(p),
            _ => None,
        })
        .unwrap_or_default()
}

/// `{#id}` anywhere in a heading line. Returns `#id` and removes the suffix.
fn find_and_remove_heading_label(s: &mut String) -> Option<String> {
    let start = s.find("{#")?;
    let end = start + s[start..].find('}')?;
    let label = format!("#{}", &s[start + 2..end]);
    s.replace_range(start..=end, "");
    Some(label)
}

/// Strip an ATX closing sequence: trailing `#`s preceded by a space.
fn find_and_remove_closing_sequence(s: &mut String) {
    let b = s.as_bytes();
    let mut end = None;
    let mut start = None;
    for i in (0..b.len()).rev() {
        if !is_space(b[i]) && b[i] != b'#' && end.is_none() {
            return;
        }
        if b[i] == b'#' {
            end.get_or_insert(i);
            if i == 0 {
                start = Some(0);
            } else if is_space(b[i - 1]) {
                start = Some(i);
                break;
            } else if b[i - 1] != b'#' {
                return;
            }
        }
    }
    if let (Some(start), Some(end)) = (start, end) {
        s.replace_range(start..=end, "");
    }
}

/// Slug of a heading: letters and digits lowercased, whitespace as `-`.
fn paragraph_to_label(p: &Paragraph) -> String {
    let mut l = String::new();
    for item in &p.items {
        if let Item::Text(t) = item {
            if !l.is_empty() {
                l.push('-');
            }
            for c in simplified(&t.text).chars() {
                if c.is_alphanumeric() {
                    l.extend(c.to_lowercase());
                } else if c.is_whitespace() {
                    l.push('-');
                }
            }
        }
    }
    l
}

fn register_heading(ctx: &mut Context<'_>, parent: &mut Vec<Item>, heading: Heading) {
    ctx.doc
        .labeled_headings
        .entry(heading.label.clone())
        .or_insert_with(|| heading.clone());
    parent.push(Item::Heading(heading));
}

fn parse_heading(line: &str, parent: &mut Vec<Item>, ctx: &mut Context<'_>) {
    let line = &line[skip_spaces(0, line)..];
    let level = line.bytes().take_while(|&b| b == b'#').count();
    let rest = &line[level..];
    let mut text = rest[skip_spaces(0, rest)..].to_string();

    let label = find_and_remove_heading_label(&mut text);
    find_and_remove_closing_sequence(&mut text);

    let items = parse_formatted_text(&[simplified(&text)], ctx, false, false);
    let text = take_paragraph(items);
    let label = match label {
        Some(label) => ctx.compose_label(&label),
        None => ctx.compose_label(&format!("#{}", paragraph_to_label(&text))),
    };

    register_heading(
        ctx,
        parent,
        Heading {
            text,
            level: level as u8,
            label,
        },
    );
}

fn parse_footnote(
    fr: Vec<String>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    let mut lines = fr;
    let first = lines.remove(0);
    let line = &first[skip_spaces(0, &first)..];
    let Some(close) = line.find(']') else {
        return Ok(());
    };
    let id = &line[1..close];
    if id.len() < 2 || line.as_bytes().get(close + 1) != Some(&b':') {
        return Ok(());
    }

    for l in lines.iter_mut() {
        if let Some(rest) = l.strip_prefix("    ") {
            *l = rest.to_string();
        }
    }
    lines.insert(0, line[close + 2..].to_string());

    let mut items = Vec::new();
    parse_lines(lines, &mut items, ctx, collect_ref_links)?;
    if !items.is_empty() {
        let key = ctx.compose_label(&format!("#{}", id.to_lowercase()));
        ctx.doc.footnotes.insert(key, Footnote { items });
    }
    Ok(())
}

fn column_alignment(s: &str) -> Alignment {
    if s.starts_with(':') && s.ends_with(':') && s.len() > 1 {
        Alignment::Center
    } else if s.ends_with(':') {
        Alignment::Right
    } else {
        Alignment::Left
    }
}

fn parse_table(
    fr: &[String],
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) {
    let alignments: Vec<Alignment> = fr[1]
        .split('|')
        .map(simplified)
        .filter(|c| !c.is_empty())
        .map(|c| column_alignment(&c))
        .collect();
    let columns = alignments.len();

    let mut table = Table {
        rows: Vec::new(),
        alignments,
    };

    for (n, row) in fr.iter().enumerate() {
        if n == 1 {
            continue;
        }
        let line = simplified(row);
        let line = line.strip_prefix('|').unwrap_or(&line);
        let line = line.strip_suffix('|').unwrap_or(line);

        let mut cells = Vec::new();
        for column in line.split('|').take(columns) {
            let mut cell = TableCell::default();
            if !column.is_empty() {
                let text = column.replace("&#124;", "|");
                let items = parse_formatted_text(&[text], ctx, collect_ref_links, false);
                cell.items = take_paragraph(items).items;
            }
            cells.push(cell);
        }
        if !cells.is_empty() {
            table.rows.push(TableRow { cells });
        }
    }

    if !table.rows.is_empty() && !collect_ref_links {
        parent.push(Item::Table(table));
    }
}

fn append_formatted(
    lines: &[String],
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) {
    let items = parse_formatted_text(lines, ctx, collect_ref_links, false);
    if !collect_ref_links {
        parent.extend(items);
    }
}

/// Plain paragraph, or a setext heading followed by whatever comes after
/// its underline.
fn parse_paragraph(
    fr: Vec<String>,
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    let mut setext = None;
    for i in 1..fr.len() {
        let prev = &fr[i - 1];
        if is_indented_horizontal_line(prev) || simplified(prev).is_empty() {
            continue;
        }
        if is_h1(&fr[i]) {
            setext = Some((i, 1));
            break;
        }
        if is_h2(&fr[i]) {
            setext = Some((i, 2));
            break;
        }
    }

    let Some((underline, level)) = setext else {
        append_formatted(&fr, parent, ctx, collect_ref_links);
        return Ok(());
    };

    let start = (0..underline)
        .rev()
        .find(|&j| is_indented_horizontal_line(&fr[j]))
        .map_or(0, |j| j + 1);
    if start > 0 {
        append_formatted(&fr[..start], parent, ctx, collect_ref_links);
    }

    if !collect_ref_links {
        let mut tmp = fr[start..underline].to_vec();
        if let Some(first) = tmp.first_mut() {
            *first = first.trim_start().to_string();
        }
        if let Some(last) = tmp.last_mut() {
            *last = last.trim_end().to_string();
        }
        let text = take_paragraph(parse_formatted_text(&tmp, ctx, false, true));
        let label = ctx.compose_label(&format!("#{}", paragraph_to_label(&text)));
        register_heading(ctx, parent, Heading { text, level, label });
    }

    let rest = fr[underline + 1..].to_vec();
    if !rest.is_empty() {
        parse_lines(rest, parent, ctx, collect_ref_links)?;
    }
    Ok(())
}

/// Strips one level of `>`. A horizontal rule line ends the quote; the
/// remaining lines are parsed as siblings.
fn parse_blockquote(
    fr: Vec<String>,
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    let mut inner = Vec::with_capacity(fr.len());
    let mut rule_at = None;
    for (i, l) in fr.iter().enumerate() {
        if is_indented_horizontal_line(l) {
            rule_at = Some(i);
            break;
        }
        let ns = skip_spaces(0, l);
        if l[ns..].starts_with('>') {
            inner.push(l[ns + 1..].to_string());
        } else {
            inner.push(l.clone());
        }
    }

    let mut items = Vec::new();
    parse_lines(inner, &mut items, ctx, collect_ref_links)?;
    if !items.is_empty() {
        parent.push(Item::Blockquote(Blockquote { items }));
    }

    if let Some(i) = rule_at {
        if !collect_ref_links {
            parent.push(Item::HorizontalLine);
        }
        if i + 1 < fr.len() {
            parse_lines(fr[i + 1..].to_vec(), parent, ctx, collect_ref_links)?;
        }
    }
    Ok(())
}

fn parse_list(
    fr: Vec<String>,
    parent: &mut Vec<Item>,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    let indent = skip_spaces(0, &fr[0]);
    if indent == fr[0].len() {
        return Ok(());
    }

    let mut list = List::default();
    let mut item_lines = vec![fr[0][indent..].to_string()];

    for l in &fr[1..] {
        let ns = skip_spaces(0, l);
        let cut = if ns > indent {
            indent
        } else if ns != l.len() {
            ns
        } else {
            0
        };
        let l = l[cut..].to_string();

        if is_horizontal_line(&l) && !item_lines.is_empty() {
            parse_list_item(std::mem::take(&mut item_lines), &mut list, ctx, collect_ref_links)?;
            if !list.items.is_empty() {
                parent.push(Item::List(std::mem::take(&mut list)));
            }
            if !collect_ref_links {
                parent.push(Item::HorizontalLine);
            }
            continue;
        } else if is_list_item_and_not_nested(&l) && !item_lines.is_empty() {
            parse_list_item(std::mem::take(&mut item_lines), &mut list, ctx, collect_ref_links)?;
        }
        item_lines.push(l);
    }

    if !item_lines.is_empty() {
        parse_list_item(item_lines, &mut list, ctx, collect_ref_links)?;
    }
    if !list.items.is_empty() {
        parent.push(Item::List(list));
    }
    Ok(())
}

fn parse_list_item(
    fr: Vec<String>,
    list: &mut List,
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    let number = ordered_list_number(&fr[0]);
    let kind = if number.is_some() {
        ListKind::Ordered
    } else {
        ListKind::Unordered
    };
    let start = match number {
        Some(n) if n != 1 => ListStart::Continue,
        _ => ListStart::Start,
    };

    let first = &fr[0];
    let mut indent = list_item_content_pos(first).unwrap_or(0).min(first.len());
    let first_non_space = skip_spaces(indent, first);
    if first_non_space - indent < 4 {
        indent = first_non_space;
    }

    let mut items = Vec::new();
    let mut data = vec![first[indent..].to_string()];
    let prefix = " ".repeat(indent);

    for (pos, l) in fr.iter().enumerate().skip(1) {
        if list_item_content_pos(l).is_some() {
            parse_lines(std::mem::take(&mut data), &mut items, ctx, collect_ref_links)?;
            parse_list(fr[pos..].to_vec(), &mut items, ctx, collect_ref_links)?;
            break;
        }
        data.push(l.strip_prefix(prefix.as_str()).unwrap_or(l).to_string());
    }

    if !data.is_empty() {
        parse_lines(data, &mut items, ctx, collect_ref_links)?;
    }
    if !items.is_empty() {
        list.items.push(ListItem {
            kind,
            start,
            number: number.unwrap_or(0),
            items,
        });
    }
    Ok(())
}

fn parse_code(
    fr: Vec<String>,
    parent: &mut Vec<Item>,
    collect_ref_links: bool,
) -> Result<(), ParseError> {
    if fr.len() < 2 {
        return Err(ParseError::UnterminatedFence {
            line: fr[0].clone(),
        });
    }
    if collect_ref_links {
        return Ok(());
    }

    let indent = skip_spaces(0, &fr[0]);
    let syntax = fence_syntax(&fr[0]).unwrap_or_default();
    let body = &fr[1..fr.len() - 1];

    if syntax.eq_ignore_ascii_case("math") {
        parent.push(Item::Math(Math {
            expr: body.join("\n"),
            inlined: false,
        }));
    } else {
        parse_indented_code(body, parent, indent, syntax);
    }
    Ok(())
}

/// Remove up to `indent` leading spaces from every line.
fn parse_indented_code(lines: &[String], parent: &mut Vec<Item>, indent: usize, syntax: String) {
    let text = lines
        .iter()
        .map(|l| {
            let ns = skip_spaces(0, l);
            &l[ns.min(indent)..]
        })
        .collect::<Vec<_>>()
        .join("\n");
    parent.push(Item::Code(Code {
        text,
        inlined: false,
        syntax,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::md::stream::TextStream;

    fn split(text: &str) -> Vec<Vec<String>> {
        split_fragments(&mut TextStream::new(text)).unwrap()
    }

    #[test]
    fn paragraphs_are_split_by_blank_lines() {
        assert_eq!(split("a\nb\n\nc"), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn heading_is_its_own_fragment() {
        assert_eq!(split("# h\ntext"), vec![vec!["# h"], vec!["text"]]);
    }

    #[test]
    fn list_keeps_indented_continuation_after_blank() {
        assert_eq!(
            split("- a\n\n  more\n- b\n\nafter"),
            vec![vec!["- a", "", "  more", "- b"], vec!["after"]]
        );
    }

    #[test]
    fn ordered_number_above_one_continues_paragraph() {
        assert_eq!(split("year\n1984. was"), vec![vec!["year", "1984. was"]]);
        assert_eq!(split("text\n1. item").len(), 2);
    }

    #[test]
    fn fence_closes_only_on_same_sequence() {
        let f = split("````\n```\n~~~~\n````\nafter");
        assert_eq!(f[0], vec!["````", "```", "~~~~", "````"]);
        assert_eq!(f[1], vec!["after"]);
    }

    #[test]
    fn blank_lines_inside_indented_code_are_kept() {
        assert_eq!(
            split("    a\n\n    b"),
            vec![vec!["    a", "    ", "    b"]]
        );
    }

    #[test]
    fn unterminated_fence_reports_opening_line() {
        let err = split_fragments(&mut TextStream::new("text\n\n```cpp\nint a;")).unwrap_err();
        match err {
            ParseError::UnterminatedFence { line } => assert_eq!(line, "```cpp"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn footnote_swallows_indented_paragraphs() {
        assert_eq!(
            split("[^1]: first\n\n    second\n\nnext"),
            vec![vec!["[^1]: first", "", "    second", ""], vec!["next"]]
        );
    }

    #[test]
    fn comment_between_lists_splits_them() {
        assert_eq!(split("- a\n<!-- -->\n- b").len(), 2);
    }

    #[test]
    fn closing_sequence() {
        let mut s = "Foo ##".to_string();
        find_and_remove_closing_sequence(&mut s);
        assert_eq!(s, "Foo ");
        let mut s = "C#".to_string();
        find_and_remove_closing_sequence(&mut s);
        assert_eq!(s, "C#");
    }

    #[test]
    fn explicit_heading_label() {
        let mut s = "Title {#custom} ".to_string();
        assert_eq!(find_and_remove_heading_label(&mut s), Some("#custom".into()));
        assert_eq!(s, "Title  ");
    }
}
