//! Inline constructs: emphasis, code spans, links, images, autolinks and
//! footnote references.
//!
//! A paragraph's lines are first scanned into a flat list of [`Delimiter`]s,
//! then a left-to-right resolver walks that list and turns it into `Text`,
//! `Link`, `Image`, `Code` and `FootnoteRef` items. Anything that does not
//! resolve is emitted as literal text.

use crate::model::{Code, FootnoteRef, Image, Item, Link, Paragraph, Text, TextOptions};

use super::Context;
use super::lines::{is_indented_horizontal_line, is_space, simplified, skip_spaces};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DelimiterKind {
    ParenthesesOpen,
    ParenthesesClose,
    SquareBracketsOpen,
    SquareBracketsClose,
    ImageOpen,
    Strikethrough,
    Italic1,
    Italic2,
    Bold1,
    Bold2,
    BoldItalic1,
    BoldItalic2,
    BoldItalic3Open,
    BoldItalic3Close,
    BoldItalic4Open,
    BoldItalic4Close,
    InlineCode,
    Less,
    Greater,
    HorizontalLine,
}

impl DelimiterKind {
    fn is_style(self) -> bool {
        use DelimiterKind::*;
        matches!(
            self,
            Strikethrough
                | Italic1
                | Italic2
                | Bold1
                | Bold2
                | BoldItalic1
                | BoldItalic2
                | BoldItalic3Open
                | BoldItalic3Close
                | BoldItalic4Open
                | BoldItalic4Close
        )
    }

    /// The delimiter that closes this one. `_**` and `**_` close each other,
    /// in either order, and so do `__*` and `*__`.
    fn counterpart(self) -> DelimiterKind {
        use DelimiterKind::*;
        match self {
            BoldItalic3Open => BoldItalic3Close,
            BoldItalic3Close => BoldItalic3Open,
            BoldItalic4Open => BoldItalic4Close,
            BoldItalic4Close => BoldItalic4Open,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Delimiter {
    pub(crate) kind: DelimiterKind,
    pub(crate) line: usize,
    pub(crate) pos: usize,
    pub(crate) len: usize,
}

fn style_type(s: &str) -> Option<DelimiterKind> {
    use DelimiterKind::*;
    Some(match s {
        "*" => Italic1,
        "_" => Italic2,
        "**" => Bold1,
        "__" => Bold2,
        "***" => BoldItalic1,
        "___" => BoldItalic2,
        "_**" => BoldItalic3Open,
        "**_" => BoldItalic3Close,
        "__*" => BoldItalic4Open,
        "*__" => BoldItalic4Close,
        _ => return None,
    })
}

pub(crate) fn collect_delimiters(fr: &[String]) -> Vec<Delimiter> {
    use DelimiterKind::*;

    let mut d = Vec::new();
    for (line, str) in fr.iter().enumerate() {
        if is_indented_horizontal_line(str) {
            d.push(Delimiter {
                kind: HorizontalLine,
                line,
                pos: 0,
                len: str.len(),
            });
            continue;
        }

        let bytes = str.as_bytes();
        let mut push = |kind, pos, len| d.push(Delimiter { kind, line, pos, len });
        let mut backslash = false;
        let mut i = 0;
        while i < bytes.len() {
            let mut now = false;
            let c = bytes[i];
            if c == b'\\' && !backslash {
                backslash = true;
                now = true;
            } else if !backslash {
                match c {
                    b'_' | b'*' => {
                        let start = i;
                        while i < bytes.len() && matches!(bytes[i], b'_' | b'*') {
                            i += 1;
                        }
                        if let Some(kind) = style_type(&str[start..i]) {
                            push(kind, start, i - start);
                        }
                        i -= 1;
                    }
                    b'~' => {
                        let start = i;
                        while i < bytes.len() && bytes[i] == b'~' {
                            i += 1;
                        }
                        if i - start == 2 {
                            push(Strikethrough, start, 2);
                        }
                        i -= 1;
                    }
                    b'`' => {
                        let start = i;
                        while i < bytes.len() && bytes[i] == b'`' {
                            i += 1;
                        }
                        push(InlineCode, start, i - start);
                        i -= 1;
                    }
                    b'!' if bytes.get(i + 1) == Some(&b'[') => {
                        push(ImageOpen, i, 2);
                        i += 1;
                    }
                    b'[' => push(SquareBracketsOpen, i, 1),
                    b']' => push(SquareBracketsClose, i, 1),
                    b'(' => push(ParenthesesOpen, i, 1),
                    b')' => push(ParenthesesClose, i, 1),
                    b'<' => push(Less, i, 1),
                    b'>' => push(Greater, i, 1),
                    _ => {}
                }
            }
            if !now {
                backslash = false;
            }
            i += 1;
        }
    }
    d
}

const CAN_BE_ESCAPED: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

pub(crate) fn remove_backslashes(s: &str) -> String {
    let mut r = String::with_capacity(s.len());
    let mut backslash = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        let mut now = false;
        if c == '\\' && !backslash && chars.peek().is_some() {
            backslash = true;
            now = true;
        } else if backslash && CAN_BE_ESCAPED.contains(c) {
            r.push(c);
        } else if backslash {
            r.push('\\');
            r.push(c);
        } else {
            r.push(c);
        }
        if !now {
            backslash = false;
        }
    }
    r
}

fn is_line_break(s: &str) -> bool {
    s.ends_with("  ") || s.ends_with('\\')
}

fn remove_line_break(s: &str) -> &str {
    s.strip_suffix('\\').unwrap_or(s)
}

fn slice_from(s: &str, pos: usize) -> &str {
    s.get(pos..).unwrap_or("")
}

/// `scheme:rest` with a valid scheme.
pub(crate) fn is_absolute_url(s: &str) -> bool {
    let Some(colon) = s.find(':') else {
        return false;
    };
    let scheme = &s[..colon];
    let mut chars = scheme.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    first_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
        && colon + 1 < s.len()
}

pub(crate) fn is_relative_url(s: &str) -> bool {
    !is_absolute_url(s)
}

fn is_email(s: &str) -> bool {
    const LOCAL_EXTRA: &str = ".!#$%&'*+/=?^_`{|}~-";
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty()
        || !local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || LOCAL_EXTRA.contains(c))
    {
        return false;
    }
    !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_autolink_target(url: &str) -> bool {
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return false;
    }
    let email = if url.len() >= 7 && url[..7].eq_ignore_ascii_case("mailto:") {
        &url[7..]
    } else {
        url
    };
    is_email(email) || is_absolute_url(url)
}

/// Resolver position saved around look-ahead scans.
#[derive(Clone, Copy)]
struct Checkpoint {
    collect_ref_links: bool,
    line: usize,
    pos: usize,
    last_definition_line: Option<usize>,
}

struct TextParser<'p, 'c> {
    fr: &'p [String],
    d: Vec<Delimiter>,
    ctx: &'p mut Context<'c>,
    collect_ref_links: bool,
    ignore_line_break: bool,
    line: usize,
    pos: usize,
    opts: TextOptions,
    styles: Vec<DelimiterKind>,
    paragraph: Vec<Item>,
    last_definition_line: Option<usize>,
}

/// Parse the lines of one paragraph into `Paragraph` items, split by any
/// horizontal rules found on their own line.
pub(crate) fn parse_formatted_text(
    fr: &[String],
    ctx: &mut Context<'_>,
    collect_ref_links: bool,
    ignore_line_break: bool,
) -> Vec<Item> {
    let mut out = Vec::new();
    if fr.is_empty() {
        return out;
    }

    let d = collect_delimiters(fr);
    let n = d.len();
    let mut p = TextParser {
        fr,
        d,
        ctx,
        collect_ref_links,
        ignore_line_break,
        line: 0,
        pos: 0,
        opts: TextOptions::PLAIN,
        styles: Vec::new(),
        paragraph: Vec::new(),
        last_definition_line: None,
    };

    let mut i = 0;
    while i < n {
        let di = p.d[i];
        if (di.line, di.pos) > (p.line, p.pos) && !collect_ref_links {
            p.make_text(di.line, di.pos, false);
        }
        i = match di.kind {
            DelimiterKind::SquareBracketsOpen => p.check_for_link(i),
            DelimiterKind::ImageOpen => p.check_for_image(i),
            DelimiterKind::Less => p.check_for_autolink(i),
            DelimiterKind::InlineCode => p.check_for_inline_code(i),
            kind if kind.is_style() => p.check_for_style(i),
            DelimiterKind::HorizontalLine => {
                if !collect_ref_links {
                    if !p.paragraph.is_empty() {
                        let items = std::mem::take(&mut p.paragraph);
                        out.push(Item::Paragraph(optimize_paragraph(items)));
                    }
                    out.push(Item::HorizontalLine);
                    p.line = di.line;
                    p.pos = di.pos + di.len;
                }
                i
            }
            _ => {
                if !collect_ref_links {
                    p.make_text(di.line, di.pos + di.len, false);
                }
                i
            }
        };
        i += 1;
    }

    if !collect_ref_links {
        let last = fr.len() - 1;
        p.make_text(last, fr[last].len(), false);
    }
    if !p.paragraph.is_empty() {
        out.push(Item::Paragraph(optimize_paragraph(p.paragraph)));
    }
    out
}

impl TextParser<'_, '_> {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            collect_ref_links: self.collect_ref_links,
            line: self.line,
            pos: self.pos,
            last_definition_line: self.last_definition_line,
        }
    }

    fn restore(&mut self, c: Checkpoint) {
        self.collect_ref_links = c.collect_ref_links;
        self.line = c.line;
        self.pos = c.pos;
        self.last_definition_line = c.last_definition_line;
    }

    fn end_of(&self, i: usize) -> (usize, usize) {
        let d = self.d[i];
        (d.line, d.pos + d.len)
    }

    fn move_past(&mut self, i: usize) {
        (self.line, self.pos) = self.end_of(i);
    }

    fn escape(&self, s: &str, do_not_escape: bool) -> String {
        if do_not_escape {
            s.to_string()
        } else {
            remove_backslashes(s)
        }
    }

    fn has_line_break(&self, line: usize) -> bool {
        !self.ignore_line_break && line + 1 < self.fr.len() && is_line_break(&self.fr[line])
    }

    fn push_text(&mut self, text: &str, space_before: bool, space_after: bool) {
        let s = simplified(text);
        if !s.is_empty() {
            self.paragraph.push(Item::Text(Text {
                text: s,
                opts: self.opts,
                space_before,
                space_after,
            }));
        }
    }

    fn push_text_with_line_break(&mut self, text: &str, space_before: bool) {
        self.push_text(text, space_before, true);
        self.paragraph.push(Item::LineBreak);
    }

    /// Emit the source between the current position and `(last_line, last_pos)`
    /// as text, honoring hard line breaks.
    fn make_text(&mut self, last_line: usize, last_pos: usize, do_not_escape: bool) {
        if self.line > last_line || (self.line == last_line && self.pos >= last_pos) {
            return;
        }
        let fr = self.fr;
        let cur = fr[self.line].as_str();
        let cb = cur.as_bytes();
        let mut space_before = if self.pos > 0 && self.pos < cb.len() {
            is_space(cb[self.pos - 1]) || is_space(cb[self.pos])
        } else {
            true
        };
        let mut text = String::new();

        let line_break = self.has_line_break(self.line)
            && (self.line != last_line || last_pos == cb.len());
        if line_break {
            let rest = slice_from(remove_line_break(cur), self.pos);
            text.push_str(&self.escape(rest, do_not_escape));
            self.push_text_with_line_break(&text, space_before);
            text.clear();
            space_before = true;
        } else {
            let end = if self.line == last_line { last_pos } else { cb.len() };
            text.push_str(&self.escape(&cur[self.pos..end], do_not_escape));
        }

        if self.line != last_line {
            text.push(' ');
            self.line += 1;
            while self.line < last_line {
                let l = fr[self.line].as_str();
                let lb = self.has_line_break(self.line);
                let s = if lb { remove_line_break(l) } else { l };
                text.push_str(&self.escape(s, do_not_escape));
                text.push(' ');
                if lb {
                    self.push_text_with_line_break(&text, space_before);
                    text.clear();
                    space_before = true;
                }
                self.line += 1;
            }
            let l = fr[self.line].as_str();
            if self.has_line_break(self.line) && last_pos == l.len() {
                text.push_str(&self.escape(remove_line_break(l), do_not_escape));
                self.push_text_with_line_break(&text, space_before);
                text.clear();
                space_before = true;
            } else {
                text.push_str(&self.escape(&l[..last_pos], do_not_escape));
            }
        }

        self.pos = last_pos;
        let space_after = if self.pos > 0 {
            is_space(fr[self.line].as_bytes()[self.pos - 1])
        } else {
            true
        };
        self.push_text(&text, space_before, space_after);
    }

    fn check_for_autolink(&mut self, i: usize) -> usize {
        let d = self.d[i];
        let closing = (i + 1..self.d.len())
            .find(|&j| self.d[j].kind == DelimiterKind::Greater)
            .filter(|&j| self.d[j].line == d.line);

        if let Some(j) = closing {
            let g = self.d[j];
            if !self.collect_ref_links {
                let url = &self.fr[d.line][d.pos + 1..g.pos];
                if is_autolink_target(url) {
                    self.paragraph.push(Item::Link(Link {
                        url: simplified(url),
                        text: String::new(),
                        opts: self.opts,
                        img: None,
                    }));
                } else {
                    self.make_text(g.line, g.pos + g.len, true);
                }
            }
            self.move_past(j);
            return j;
        }

        if !self.collect_ref_links {
            self.make_text(d.line, d.pos + d.len, false);
        }
        self.move_past(i);
        i
    }

    fn make_inline_code(&mut self, last_line: usize, last_pos: usize) {
        let mut c = String::new();
        while self.line <= last_line {
            let l = &self.fr[self.line];
            let end = if self.line == last_line { last_pos } else { l.len() };
            c.push_str(&l[self.pos.min(end)..end]);
            if self.line < last_line {
                c.push(' ');
            }
            self.pos = 0;
            self.line += 1;
        }
        self.line = last_line;

        if c.chars().count() > 2 && c.starts_with(' ') && c.ends_with(' ') {
            c = c[1..c.len() - 1].to_string();
        }
        if !c.is_empty() {
            self.paragraph.push(Item::Code(Code {
                text: c,
                inlined: true,
                syntax: String::new(),
            }));
        }
    }

    /// A run of N backticks is closed only by another run of exactly N.
    fn check_for_inline_code(&mut self, i: usize) -> usize {
        let start = self.d[i];
        let closing = (i + 1..self.d.len()).find(|&j| {
            self.d[j].kind == DelimiterKind::InlineCode && self.d[j].len == start.len
        });

        match closing {
            Some(j) => {
                let end = self.d[j];
                if !self.collect_ref_links {
                    self.make_text(start.line, start.pos, false);
                    self.line = start.line;
                    self.pos = start.pos + start.len;
                    self.make_inline_code(end.line, end.pos);
                }
                self.move_past(j);
                j
            }
            None => {
                if !self.collect_ref_links {
                    self.make_text(start.line, start.pos + start.len, false);
                }
                i
            }
        }
    }

    /// Text between `[` at `start` and `]` at `end`. Returns `start` as the
    /// index on failure.
    fn read_text_between_square_brackets(
        &mut self,
        start: usize,
        end: Option<usize>,
        do_not_create_text_on_fail: bool,
    ) -> (String, usize) {
        let s = self.d[start];
        if let Some(j) = end {
            let e = self.d[j];
            if s.line == e.line {
                let text = &self.fr[s.line][s.pos + s.len..e.pos];
                return (remove_backslashes(&simplified(text)), j);
            }
            if e.line - s.line < 3 {
                let mut text = self.fr[s.line][s.pos + s.len..].to_string();
                for l in s.line + 1..=e.line {
                    text.push(' ');
                    if l == e.line {
                        text.push_str(&self.fr[l][..e.pos]);
                    } else {
                        text.push_str(&self.fr[l]);
                    }
                }
                return (remove_backslashes(&simplified(&text)), j);
            }
        }
        if !self.collect_ref_links && !do_not_create_text_on_fail {
            self.make_text(s.line, s.pos + s.len, false);
        }
        (String::new(), start)
    }

    fn check_for_link_text(&mut self, i: usize) -> (String, usize) {
        let saved = self.checkpoint();
        self.collect_ref_links = true;

        let mut brackets = 0usize;
        let mut found = None;
        let mut j = i + 1;
        while j < self.d.len() {
            match self.d[j].kind {
                DelimiterKind::SquareBracketsClose => {
                    if brackets == 0 {
                        found = Some(j);
                        break;
                    }
                    brackets -= 1;
                }
                DelimiterKind::SquareBracketsOpen | DelimiterKind::ImageOpen => brackets += 1,
                DelimiterKind::InlineCode => j = self.check_for_inline_code(j),
                DelimiterKind::Less => j = self.check_for_autolink(j),
                _ => {}
            }
            j += 1;
        }

        self.line = saved.line;
        self.pos = saved.pos;
        let r = self.read_text_between_square_brackets(i, found, false);
        self.restore(saved);
        r
    }

    fn check_for_link_label(&mut self, i: usize) -> (String, usize) {
        let mut found = None;
        for j in i + 1..self.d.len() {
            match self.d[j].kind {
                DelimiterKind::SquareBracketsClose => {
                    found = Some(j);
                    break;
                }
                DelimiterKind::SquareBracketsOpen | DelimiterKind::ImageOpen => break,
                _ => {}
            }
        }
        self.read_text_between_square_brackets(i, found, true)
    }

    fn make_link(
        &mut self,
        url: &str,
        text: &str,
        do_not_create_text_on_fail: bool,
        last_line: usize,
        last_pos: usize,
    ) -> Option<Link> {
        let mut u = remove_backslashes(url);
        if u.starts_with('#') {
            u = self.ctx.compose_label(&u);
        } else if is_relative_url(&u) && self.ctx.file_exists(&u) {
            u = self.ctx.absolute_path(&u);
            if !self.collect_ref_links {
                self.ctx.links_to_parse.push(u.clone());
            }
        }

        let items = parse_formatted_text(
            &[text.to_string()],
            &mut *self.ctx,
            self.collect_ref_links,
            true,
        );

        let mut img = None;
        let mut opts = self.opts;
        let mut shown = String::new();
        if let [Item::Paragraph(p)] = items.as_slice() {
            for item in &p.items {
                match item {
                    Item::Link(_) => {
                        if !self.collect_ref_links && !do_not_create_text_on_fail {
                            self.make_text(last_line, last_pos, false);
                        }
                        return None;
                    }
                    Item::Image(i) => img = Some(i.clone()),
                    Item::Text(t) => {
                        if !shown.is_empty() && t.space_before {
                            shown.push(' ');
                        }
                        shown.push_str(&t.text);
                        opts.bold |= t.opts.bold;
                        opts.italic |= t.opts.italic;
                        opts.strikethrough |= t.opts.strikethrough;
                    }
                    Item::Code(c) => {
                        if !shown.is_empty() {
                            shown.push(' ');
                        }
                        shown.push_str(&c.text);
                    }
                    _ => {}
                }
            }
        }

        Some(Link {
            url: u,
            text: shown,
            opts,
            img,
        })
    }

    fn create_shortcut_link(
        &mut self,
        text: &str,
        last_line: usize,
        last_pos: usize,
        last_it: usize,
        link_text: &str,
        do_not_create_text_on_fail: bool,
    ) -> bool {
        let u = format!("#{}", simplified(text).to_lowercase());
        let url = self.ctx.compose_label(&u);
        if !self.ctx.doc.labeled_links.contains_key(&url) {
            if !self.collect_ref_links && !do_not_create_text_on_fail {
                self.make_text(last_line, last_pos, false);
            }
            return false;
        }
        if !self.collect_ref_links {
            let shown = if link_text.is_empty() { text } else { link_text };
            match self.make_link(&u, shown, do_not_create_text_on_fail, last_line, last_pos) {
                Some(link) => {
                    self.ctx.links_to_parse.push(url);
                    self.paragraph.push(Item::Link(link));
                    self.move_past(last_it);
                }
                None => {
                    if !do_not_create_text_on_fail {
                        self.make_text(last_line, last_pos, false);
                    }
                    return false;
                }
            }
        }
        true
    }

    fn make_image(&mut self, url: &str, text: &str) -> Image {
        let url = if is_relative_url(url) && self.ctx.file_exists(url) {
            format!("{}{}", self.ctx.working_path, url)
        } else {
            url.to_string()
        };
        Image {
            url,
            text: simplified(text),
        }
    }

    fn create_shortcut_image(
        &mut self,
        text: &str,
        last_line: usize,
        last_pos: usize,
        last_it: usize,
        link_text: &str,
        do_not_create_text_on_fail: bool,
    ) -> bool {
        let url = self
            .ctx
            .compose_label(&format!("#{}", simplified(text).to_lowercase()));
        let Some(target) = self.ctx.doc.labeled_links.get(&url).map(|l| l.url.clone()) else {
            if !self.collect_ref_links && !do_not_create_text_on_fail {
                self.make_text(last_line, last_pos, false);
            }
            return false;
        };
        if !self.collect_ref_links {
            let shown = if link_text.is_empty() { text } else { link_text };
            let img = self.make_image(&target, shown);
            self.paragraph.push(Item::Image(img));
            self.move_past(last_it);
        }
        true
    }

    fn skip_spaces_up_to_1_line(&self, line: usize, pos: usize) -> (usize, usize) {
        let pos = skip_spaces(pos.min(self.fr[line].len()), &self.fr[line]);
        if pos == self.fr[line].len() && line + 1 < self.fr.len() {
            (line + 1, skip_spaces(0, &self.fr[line + 1]))
        } else {
            (line, pos)
        }
    }

    /// `<dest>` or a run without spaces with balanced parentheses.
    fn read_link_destination(&self, line: usize, pos: usize) -> Option<(usize, usize, String)> {
        let (line, mut pos) = self.skip_spaces_up_to_1_line(line, pos);
        let s = self.fr[line].as_bytes();
        if pos >= s.len() {
            return None;
        }
        let mut dest = Vec::new();
        let mut backslash = false;

        if s[pos] == b'<' {
            pos += 1;
            while pos < s.len() {
                let mut now = false;
                if s[pos] == b'\\' && !backslash {
                    backslash = true;
                    now = true;
                } else if !backslash && s[pos] == b'<' {
                    return None;
                } else if !backslash && s[pos] == b'>' {
                    pos += 1;
                    break;
                } else {
                    dest.push(s[pos]);
                }
                if !now {
                    backslash = false;
                }
                pos += 1;
            }
            return Some((line, pos, String::from_utf8_lossy(&dest).into_owned()));
        }

        let mut parens = 0usize;
        while pos < s.len() {
            let mut now = false;
            if s[pos] == b'\\' && !backslash {
                backslash = true;
                now = true;
            } else if !backslash && is_space(s[pos]) {
                if parens == 0 {
                    break;
                }
                return None;
            } else if !backslash && s[pos] == b'(' {
                parens += 1;
                dest.push(s[pos]);
            } else if !backslash && s[pos] == b')' {
                if parens == 0 {
                    break;
                }
                parens -= 1;
                dest.push(s[pos]);
            } else {
                dest.push(s[pos]);
            }
            if !now {
                backslash = false;
            }
            pos += 1;
        }
        Some((line, pos, String::from_utf8_lossy(&dest).into_owned()))
    }

    /// `"title"`, `'title'` or `(title)`, preceded by whitespace.
    fn read_link_title(&self, line: usize, pos: usize) -> (usize, usize, Option<String>) {
        let space = self.fr[line]
            .as_bytes()
            .get(pos)
            .is_none_or(|&b| is_space(b));
        let (mut line, mut pos) = self.skip_spaces_up_to_1_line(line, pos);
        let Some(&sc) = self.fr[line].as_bytes().get(pos) else {
            return (line, pos, None);
        };
        if !matches!(sc, b'"' | b'\'' | b'(') || !space {
            return (line, pos, None);
        }

        let mut backslash = false;
        (line, pos) = self.skip_spaces_up_to_1_line(line, pos + 1);
        let mut title = Vec::new();
        while line < self.fr.len() && pos < self.fr[line].len() {
            let c = self.fr[line].as_bytes()[pos];
            let mut now = false;
            if c == b'\\' && !backslash {
                backslash = true;
                now = true;
            } else if sc == b'(' && c == b')' && !backslash {
                return (line, pos + 1, Some(String::from_utf8_lossy(&title).into_owned()));
            } else if sc == b'(' && c == b'(' && !backslash {
                return (line, pos, None);
            } else if sc != b'(' && c == sc && !backslash {
                return (line, pos + 1, Some(String::from_utf8_lossy(&title).into_owned()));
            } else {
                title.push(c);
            }
            if !now {
                backslash = false;
            }
            pos += 1;
            if pos == self.fr[line].len() {
                if line + 1 >= self.fr.len() {
                    break;
                }
                title.push(b' ');
                (line, pos) = self.skip_spaces_up_to_1_line(line, pos);
            }
        }
        (line, pos, None)
    }

    /// `(dest "title")` after `]`. `it` is the `(` delimiter.
    fn check_for_inline_link(&self, it: usize) -> Option<(String, String, usize)> {
        let (l, p) = self.end_of(it);
        let (l, p, dest) = self.read_link_destination(l, p)?;
        let (tl, tp, title) = self.read_link_title(l, p);
        let (l, p) = match title {
            Some(_) => self.skip_spaces_up_to_1_line(tl, tp),
            None => self.skip_spaces_up_to_1_line(l, p),
        };
        if self.fr[l].as_bytes().get(p) != Some(&b')') {
            return None;
        }
        (it..self.d.len())
            .find(|&j| self.d[j].line == l && self.d[j].pos == p)
            .map(|j| (dest, title.unwrap_or_default(), j))
    }

    /// `: dest "title"` after `]` of a reference definition. The definition
    /// must end its line.
    fn check_for_ref_link(&mut self, it: usize) -> Option<(String, String, usize)> {
        let (l, p) = self.end_of(it);
        let (dl, dp, dest) = self.read_link_destination(l, p + 1)?;
        let (tl, tp, title) = self.read_link_title(dl, dp);
        let (l, p) = match title {
            Some(_) => (tl, skip_spaces(tp, &self.fr[tl])),
            None => (dl, skip_spaces(dp, &self.fr[dl])),
        };
        if p < self.fr[l].len() {
            return None;
        }
        let mut j = it;
        while j < self.d.len()
            && !(self.d[j].line > l || (self.d[j].line == l && self.d[j].pos > p))
        {
            j += 1;
        }
        self.line = l;
        self.pos = p;
        Some((dest, title.unwrap_or_default(), j - 1))
    }

    fn check_for_image(&mut self, i: usize) -> usize {
        let start = self.d[i];
        let (text, it) = self.check_for_link_text(i);
        if it == i {
            if !self.collect_ref_links {
                self.make_text(start.line, start.pos + start.len, false);
            }
            return i;
        }

        let (last_line, last_pos) = (start.line, start.pos + start.len);
        let e = self.d[it];
        let next = self.fr[e.line].as_bytes().get(e.pos + e.len).copied();
        let label = text.to_lowercase();

        match next {
            Some(b'(') if it + 1 < self.d.len() => {
                if let Some((url, _title, iit)) = self.check_for_inline_link(it + 1) {
                    if !self.collect_ref_links {
                        let img = self.make_image(&url, &text);
                        self.paragraph.push(Item::Image(img));
                    }
                    self.move_past(iit);
                    return iit;
                }
                if self.create_shortcut_image(&label, last_line, last_pos, it, "", false) {
                    return it;
                }
            }
            Some(b'[') if it + 1 < self.d.len() => {
                let (ref_label, lit) = self.check_for_link_label(it + 1);
                if lit != it + 1 {
                    if self
                        .create_shortcut_image(&ref_label, last_line, last_pos, lit, &text, true)
                    {
                        return lit;
                    }
                    if self.create_shortcut_image(&label, last_line, last_pos, it, "", false) {
                        if ref_label.is_empty() {
                            self.move_past(lit);
                            return lit;
                        }
                        return it;
                    }
                } else if self.create_shortcut_image(&label, last_line, last_pos, it, "", false) {
                    return it;
                }
            }
            _ => {
                if self.create_shortcut_image(&label, last_line, last_pos, it, "", false) {
                    return it;
                }
            }
        }
        i
    }

    /// Reference definitions are only legal at the start of a paragraph or
    /// right after another definition.
    fn definition_allowed(&self, start: Delimiter) -> bool {
        let ns = skip_spaces(0, &self.fr[start.line]);
        let at_paragraph_start = start.line == 0
            || self.last_definition_line == Some(start.line - 1);
        at_paragraph_start && ns < 4 && start.pos == ns
    }

    fn check_for_link(&mut self, i: usize) -> usize {
        let start = self.d[i];
        let (text, it) = self.check_for_link_text(i);
        if it == i {
            if !self.collect_ref_links {
                self.make_text(start.line, start.pos + start.len, false);
            }
            return i;
        }

        if text.starts_with('^') {
            if !self.collect_ref_links {
                let id = self
                    .ctx
                    .compose_label(&format!("#{}", simplified(&text).to_lowercase()));
                self.paragraph.push(Item::FootnoteRef(FootnoteRef { id }));
            }
            self.move_past(it);
            return it;
        }

        let (last_line, last_pos) = (start.line, start.pos + start.len);
        let e = self.d[it];
        let next = self.fr[e.line].as_bytes().get(e.pos + e.len).copied();

        match next {
            Some(b':') => {
                if self.definition_allowed(start) {
                    if let Some((url, _title, iit)) = self.check_for_ref_link(it) {
                        let label = self
                            .ctx
                            .compose_label(&format!("#{}", simplified(&text).to_lowercase()));
                        let mut url = url;
                        if is_relative_url(&url) && self.ctx.file_exists(&url) {
                            url = self.ctx.absolute_path(&url);
                        }
                        self.ctx.doc.labeled_links.entry(label).or_insert(Link {
                            url: remove_backslashes(&url),
                            text: String::new(),
                            opts: TextOptions::PLAIN,
                            img: None,
                        });
                        self.last_definition_line = Some(self.line);
                        return iit;
                    }
                }
                if !self.collect_ref_links {
                    self.make_text(last_line, last_pos, false);
                }
                return i;
            }
            Some(b'(') if it + 1 < self.d.len() => {
                if let Some((url, _title, iit)) = self.check_for_inline_link(it + 1) {
                    return match self.make_link(&url, &text, false, last_line, last_pos) {
                        Some(link) => {
                            if !self.collect_ref_links {
                                self.paragraph.push(Item::Link(link));
                            }
                            self.move_past(iit);
                            iit
                        }
                        None => it,
                    };
                }
                if self.create_shortcut_link(&text, last_line, last_pos, it, "", false) {
                    return it;
                }
            }
            Some(b'[') if it + 1 < self.d.len() => {
                let (label, lit) = self.check_for_link_label(it + 1);
                if lit != it + 1 {
                    if self.create_shortcut_link(&label, last_line, last_pos, lit, &text, true) {
                        return lit;
                    }
                    if self.create_shortcut_link(&text, last_line, last_pos, it, "", false) {
                        if label.is_empty() {
                            self.move_past(lit);
                            return lit;
                        }
                        return it;
                    }
                } else if self.create_shortcut_link(&text, last_line, last_pos, it, "", false) {
                    return it;
                }
            }
            _ => {
                if self.create_shortcut_link(&text, last_line, last_pos, it, "", false) {
                    return it;
                }
            }
        }
        i
    }

    fn is_closing_style(&self, kind: DelimiterKind) -> bool {
        kind.is_style() && self.styles.contains(&kind.counterpart())
    }

    fn close_style(&mut self, kind: DelimiterKind) {
        let open = kind.counterpart();
        if let Some(idx) = self.styles.iter().position(|&s| s == open) {
            self.styles.remove(idx);
        }
    }

    fn set_style(&mut self, kind: DelimiterKind, on: bool) {
        use DelimiterKind::*;
        match kind {
            Strikethrough => self.opts.strikethrough = on,
            Italic1 | Italic2 => self.opts.italic = on,
            Bold1 | Bold2 => self.opts.bold = on,
            BoldItalic1 | BoldItalic2 | BoldItalic3Open | BoldItalic3Close | BoldItalic4Open
            | BoldItalic4Close => {
                self.opts.bold = on;
                self.opts.italic = on;
            }
            _ => {}
        }
    }

    /// Look ahead for a delimiter closing the style opened at `i`, skipping
    /// over links, images, autolinks and code spans.
    fn is_style_closed(&mut self, i: usize) -> bool {
        let open = self.d[i].kind;
        let saved = self.checkpoint();
        self.collect_ref_links = true;

        let mut closed = false;
        let mut j = i + 1;
        while j < self.d.len() {
            match self.d[j].kind {
                DelimiterKind::SquareBracketsOpen => j = self.check_for_link(j),
                DelimiterKind::ImageOpen => j = self.check_for_image(j),
                DelimiterKind::Less => j = self.check_for_autolink(j),
                DelimiterKind::InlineCode => j = self.check_for_inline_code(j),
                kind if kind.is_style() && kind == open.counterpart() => {
                    closed = true;
                    break;
                }
                _ => {}
            }
            j += 1;
        }

        self.restore(saved);
        closed
    }

    fn check_for_style(&mut self, i: usize) -> usize {
        let d = self.d[i];
        if self.is_closing_style(d.kind) {
            self.close_style(d.kind);
            self.set_style(d.kind, false);
            self.move_past(i);
        } else if self.is_style_closed(i) {
            self.set_style(d.kind, true);
            self.styles.push(d.kind);
            self.move_past(i);
        } else if !self.collect_ref_links {
            self.make_text(d.line, d.pos + d.len, false);
        }
        i
    }
}

fn concatenate_text(texts: &[Text]) -> Text {
    let mut data = String::new();
    for t in texts {
        if t.space_before {
            data.push(' ');
        }
        data.push_str(&t.text);
        if t.space_after {
            data.push(' ');
        }
    }
    Text {
        text: simplified(&data),
        opts: texts[0].opts,
        space_before: texts[0].space_before,
        space_after: texts[texts.len() - 1].space_after,
    }
}

/// Merge adjacent text runs sharing the same options.
pub(crate) fn optimize_paragraph(items: Vec<Item>) -> Paragraph {
    let mut out = Vec::with_capacity(items.len());
    let mut run: Vec<Text> = Vec::new();
    for item in items {
        match item {
            Item::Text(t) => {
                if run.last().is_some_and(|prev| prev.opts != t.opts) {
                    out.push(Item::Text(concatenate_text(&run)));
                    run.clear();
                }
                run.push(t);
            }
            other => {
                if !run.is_empty() {
                    out.push(Item::Text(concatenate_text(&run)));
                    run.clear();
                }
                out.push(other);
            }
        }
    }
    if !run.is_empty() {
        out.push(Item::Text(concatenate_text(&run)));
    }
    Paragraph { items: out }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;

    fn parse_with(doc: &mut Document, text: &str) -> (Vec<Item>, Vec<String>) {
        let mut links = Vec::new();
        let fr: Vec<String> = text.lines().map(String::from).collect();
        let items = {
            let mut ctx = Context {
                doc,
                links_to_parse: &mut links,
                working_path: "/nonexistent/",
                file_name: "t.md",
            };
            parse_formatted_text(&fr, &mut ctx, true, false);
            parse_formatted_text(&fr, &mut ctx, false, false)
        };
        (items, links)
    }

    fn parse(text: &str) -> Vec<Item> {
        let mut doc = Document::default();
        parse_with(&mut doc, text).0
    }

    fn paragraph(text: &str) -> Vec<Item> {
        match parse(text).as_slice() {
            [Item::Paragraph(p)] => p.items.clone(),
            other => panic!("expected one paragraph, got {other:?}"),
        }
    }

    fn single_text(text: &str) -> Text {
        match paragraph(text).as_slice() {
            [Item::Text(t)] => t.clone(),
            other => panic!("expected one text item, got {other:?}"),
        }
    }

    fn opts(bold: bool, italic: bool) -> TextOptions {
        TextOptions {
            bold,
            italic,
            strikethrough: false,
        }
    }

    fn plain_text(items: &[Item]) -> String {
        items
            .iter()
            .filter_map(|i| match i {
                Item::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn scans_delimiters_with_positions() {
        let d = collect_delimiters(&["a **b** `c` ![i](u)".to_string()]);
        let kinds: Vec<_> = d.iter().map(|d| (d.kind, d.pos, d.len)).collect();
        assert_eq!(
            kinds,
            vec![
                (DelimiterKind::Bold1, 2, 2),
                (DelimiterKind::Bold1, 5, 2),
                (DelimiterKind::InlineCode, 8, 1),
                (DelimiterKind::InlineCode, 10, 1),
                (DelimiterKind::ImageOpen, 12, 2),
                (DelimiterKind::SquareBracketsClose, 15, 1),
                (DelimiterKind::ParenthesesOpen, 16, 1),
                (DelimiterKind::ParenthesesClose, 18, 1),
            ]
        );
    }

    #[test]
    fn escaped_markers_are_not_delimiters() {
        let d = collect_delimiters(&["\\*a\\*".to_string()]);
        assert!(d.is_empty());
        assert_eq!(single_text("\\*a\\*").text, "*a*");
    }

    #[test]
    fn italic() {
        let t = single_text("*a*");
        assert_eq!(t.text, "a");
        assert_eq!(t.opts, opts(false, true));
    }

    #[test]
    fn bold() {
        let t = single_text("**a**");
        assert_eq!(t.text, "a");
        assert_eq!(t.opts, opts(true, false));
    }

    #[test]
    fn bold_italic_forms() {
        for src in ["***a***", "___a___", "_**a**_", "**_a_**", "__*a*__", "*__a__*"] {
            let t = single_text(src);
            assert_eq!(t.text, "a", "{src}");
            assert_eq!(t.opts, opts(true, true), "{src}");
        }
    }

    #[test]
    fn strikethrough() {
        let t = single_text("~~gone~~");
        assert!(t.opts.strikethrough);
        assert_eq!(single_text("~~~x~~~").text, "~~~x~~~");
    }

    #[test]
    fn unmatched_markers_stay_literal() {
        for src in ["a * b", "**open only", "`unclosed code", "[not a link", "x < y"] {
            let items = paragraph(src);
            assert_eq!(plain_text(&items), simplified(src), "{src}");
        }
    }

    #[test]
    fn inline_code_needs_equal_run() {
        let items = paragraph("``a ` b``");
        assert_eq!(
            items,
            vec![Item::Code(Code {
                text: "a ` b".to_string(),
                inlined: true,
                syntax: String::new(),
            })]
        );
    }

    #[test]
    fn inline_code_strips_one_surrounding_space() {
        match paragraph("` `` `").as_slice() {
            [Item::Code(c)] => assert_eq!(c.text, "``"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn emphasis_inside_code_is_ignored() {
        match paragraph("`*a*`").as_slice() {
            [Item::Code(c)] => assert_eq!(c.text, "*a*"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn inline_link_with_title() {
        match paragraph("see [the site](https://example.com \"Title\") now").as_slice() {
            [Item::Text(a), Item::Link(l), Item::Text(b)] => {
                assert_eq!(a.text, "see");
                assert_eq!(l.url, "https://example.com");
                assert_eq!(l.text, "the site");
                assert_eq!(b.text, "now");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn image_inside_link() {
        match paragraph("[![alt](img.png)](https://example.com)").as_slice() {
            [Item::Link(l)] => {
                let img = l.img.as_ref().expect("image");
                assert_eq!(img.url, "img.png");
                assert_eq!(img.text, "alt");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn reference_definition_and_use() {
        let mut doc = Document::default();
        let (items, links) = parse_with(&mut doc, "[foo]: https://foo.org\n[Foo] and [bar]");
        let label = "#foo//nonexistent/t.md";
        assert_eq!(doc.labeled_links[label].url, "https://foo.org");
        match items.as_slice() {
            [Item::Paragraph(p)] => match p.items.as_slice() {
                [Item::Link(l), Item::Text(t)] => {
                    assert_eq!(l.url, label);
                    assert_eq!(l.text, "Foo");
                    assert_eq!(t.text, "and [bar]");
                }
                other => panic!("{other:?}"),
            },
            other => panic!("{other:?}"),
        }
        assert_eq!(links, vec![label.to_string()]);
    }

    #[test]
    fn footnote_reference() {
        match paragraph("text[^Note]").as_slice() {
            [Item::Text(_), Item::FootnoteRef(f)] => {
                assert_eq!(f.id, "#^note//nonexistent/t.md");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn autolinks() {
        match paragraph("<https://a.b/c> <mailto:me@host.org> <not a link>").as_slice() {
            [Item::Link(a), Item::Link(b), Item::Text(t)] => {
                assert_eq!(a.url, "https://a.b/c");
                assert_eq!(b.url, "mailto:me@host.org");
                assert_eq!(t.text, "<not a link>");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn hard_line_breaks() {
        let items = paragraph("one  \ntwo\\\nthree");
        assert_eq!(
            items
                .iter()
                .filter(|i| matches!(i, Item::LineBreak))
                .count(),
            2
        );
        assert_eq!(plain_text(&items), "one two three");
    }

    #[test]
    fn horizontal_line_splits_paragraph() {
        let items = parse("above\n***\nbelow");
        assert!(matches!(
            items.as_slice(),
            [Item::Paragraph(_), Item::HorizontalLine, Item::Paragraph(_)]
        ));
    }

    #[test]
    fn adjacent_runs_are_merged() {
        let items = paragraph("a b\nc d");
        assert_eq!(items.len(), 1);
        assert_eq!(plain_text(&items), "a b c d");
    }

    #[test]
    fn backslashes_before_non_punctuation_survive() {
        assert_eq!(remove_backslashes(r"a\b\*c\"), r"a\b*c\");
    }
}
