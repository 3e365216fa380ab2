//! Line sources for the block parser.

pub(crate) trait LineStream {
    fn at_end(&self) -> bool;
    fn read_line(&mut self) -> String;
}

/// Lines of a whole file. Accepts `\n`, `\r\n` and bare `\r` line endings.
pub(crate) struct TextStream {
    lines: Vec<String>,
    pos: usize,
}

impl TextStream {
    pub(crate) fn new(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    lines.push(std::mem::take(&mut current));
                }
                '\n' => lines.push(std::mem::take(&mut current)),
                '\0' => {}
                _ => current.push(c),
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        TextStream { lines, pos: 0 }
    }
}

impl LineStream for TextStream {
    fn at_end(&self) -> bool {
        self.pos >= self.lines.len()
    }

    fn read_line(&mut self) -> String {
        let line = self.lines.get(self.pos).cloned().unwrap_or_default();
        self.pos += 1;
        line
    }
}

/// Already split lines of a nested container (blockquote, list item, footnote).
pub(crate) struct StringListStream {
    lines: std::vec::IntoIter<String>,
}

impl StringListStream {
    pub(crate) fn new(lines: Vec<String>) -> Self {
        StringListStream {
            lines: lines.into_iter(),
        }
    }
}

impl LineStream for StringListStream {
    fn at_end(&self) -> bool {
        self.lines.len() == 0
    }

    fn read_line(&mut self) -> String {
        self.lines.next().unwrap_or_default()
    }
}

const COMMENT_START: &str = "<!--";
const COMMENT_END: &str = "-->";

/// Reads the next logical line with HTML comments removed, including comments
/// spanning several lines. `in_comment` carries an open comment across calls.
/// The flag in the result is set when a comment was removed from the line.
pub(crate) fn read_line_without_comments(
    stream: &mut dyn LineStream,
    in_comment: &mut bool,
) -> (String, bool) {
    let mut line = stream.read_line();
    let mut was_comment = *in_comment;
    let mut out = String::new();

    loop {
        if *in_comment {
            match line.find(COMMENT_END) {
                Some(end) => {
                    line.replace_range(..end + COMMENT_END.len(), "");
                    *in_comment = false;
                }
                None => {
                    if !out.is_empty() || stream.at_end() {
                        return (out, true);
                    }
                    line = stream.read_line();
                    continue;
                }
            }
        }
        match line.find(COMMENT_START) {
            Some(start) => {
                was_comment = true;
                out.push_str(&line[..start]);
                line.replace_range(..start + COMMENT_START.len(), "");
                *in_comment = true;
            }
            None => {
                out.push_str(&line);
                return (out, was_comment);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(text: &str) -> Vec<String> {
        let mut stream = TextStream::new(text);
        let mut in_comment = false;
        let mut out = Vec::new();
        while !stream.at_end() {
            out.push(read_line_without_comments(&mut stream, &mut in_comment).0);
        }
        out
    }

    #[test]
    fn splits_all_line_endings() {
        let mut s = TextStream::new("a\r\nb\rc\nd");
        let mut lines = Vec::new();
        while !s.at_end() {
            lines.push(s.read_line());
        }
        assert_eq!(lines, ["a", "b", "c", "d"]);
    }

    #[test]
    fn strips_inline_comment() {
        assert_eq!(read_all("a <!-- x --> b"), ["a  b"]);
    }

    #[test]
    fn strips_multiline_comment() {
        assert_eq!(
            read_all("text <!-- one\ntwo\nthree --> tail\nnext"),
            ["text ", " tail", "next"]
        );
        assert_eq!(read_all("<!--\nhidden\n-->visible"), ["visible"]);
    }
}
