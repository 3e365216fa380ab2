//! Markdown parser producing a [`Document`].
//!
//! Parsing is line driven: [`block`] splits the input into fragments of one
//! block type each and [`inline`] resolves the inline constructs of every
//! paragraph-like fragment. Links to other Markdown files can be followed,
//! in which case every included file is appended after a page break.

mod block;
mod inline;
mod lines;
mod stream;

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::ParseError;
use crate::model::{Document, Item};

pub(crate) use inline::is_absolute_url;

use stream::TextStream;

/// Parsing state shared by every fragment of one file.
pub(crate) struct Context<'a> {
    pub(crate) doc: &'a mut Document,
    /// Files (absolute paths) and labels referenced by links.
    pub(crate) links_to_parse: &'a mut Vec<String>,
    /// Directory of the file being parsed, with a trailing `/`.
    pub(crate) working_path: &'a str,
    pub(crate) file_name: &'a str,
}

impl Context<'_> {
    /// `<id>/<working path><file name>`; keeps labels of different files apart.
    pub(crate) fn compose_label(&self, id: &str) -> String {
        format!("{id}/{}{}", self.working_path, self.file_name)
    }

    pub(crate) fn file_exists(&self, relative: &str) -> bool {
        Path::new(&format!("{}{}", self.working_path, relative)).exists()
    }

    pub(crate) fn absolute_path(&self, relative: &str) -> String {
        path_string(&normalize(Path::new(&format!(
            "{}{}",
            self.working_path, relative
        ))))
    }
}

/// Resolve `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn absolute(path: &Path) -> Result<PathBuf, ParseError> {
    std::path::absolute(path)
        .map(|p| normalize(&p))
        .map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
}

/// Working directory (with trailing `/`) and file name of an absolute path.
fn split_path(path: &Path) -> (String, String) {
    let dir = path.parent().map(path_string).unwrap_or_default();
    let working_path = if dir.ends_with('/') { dir } else { format!("{dir}/") };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (working_path, file_name)
}

/// Parses Markdown files. Remembers which files were already parsed so that
/// recursive inclusion visits each file once.
#[derive(Debug, Default)]
pub struct Parser {
    parsed_files: Vec<String>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the file at `path`. With `recursive`, linked Markdown files are
    /// parsed as well and appended to the same document.
    pub fn parse(
        &mut self,
        path: impl AsRef<Path>,
        recursive: bool,
    ) -> Result<Document, ParseError> {
        let path = absolute(path.as_ref())?;
        let mut doc = Document::default();
        let result = self.parse_file(&path, recursive, &mut doc, None);
        self.parsed_files.clear();
        result.map(|()| doc)
    }

    /// Parse in-memory Markdown as if it was read from `path`. Links are
    /// resolved relative to the directory of `path`; no files are included.
    pub fn parse_str(
        &mut self,
        text: &str,
        path: impl AsRef<Path>,
    ) -> Result<Document, ParseError> {
        let path = absolute(path.as_ref())?;
        let mut doc = Document::default();
        let mut links = Vec::new();
        parse_text_into(text, &path, &mut doc, &mut links)?;
        Ok(doc)
    }

    fn parse_file(
        &mut self,
        path: &Path,
        recursive: bool,
        doc: &mut Document,
        parent_links: Option<&mut Vec<String>>,
    ) -> Result<(), ParseError> {
        let text = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut links = Vec::new();
        parse_text_into(&text, path, doc, &mut links)?;
        self.parsed_files.push(path_string(path));

        // Labels resolve to the URL of their reference definition.
        links.retain_mut(|link| {
            if !link.starts_with('#') {
                return true;
            }
            match doc.labeled_links.get(link.as_str()) {
                Some(target) if !target.url.starts_with('#') => {
                    *link = target.url.clone();
                    true
                }
                _ => false,
            }
        });

        if !recursive || links.is_empty() {
            return Ok(());
        }

        // Files still queued by the including file are left to it. Links of
        // an included file are handed back to the includer's queue.
        let included = links.clone();
        while !links.is_empty() {
            let next = links.remove(0);
            if parent_links.as_ref().is_some_and(|p| p.contains(&next)) {
                continue;
            }
            let next_path = PathBuf::from(&next);
            if !is_markdown(&next_path)
                || !next_path.is_file()
                || self.parsed_files.contains(&next)
            {
                continue;
            }
            if doc.items.last().is_some_and(|i| *i != Item::PageBreak) {
                doc.items.push(Item::PageBreak);
            }
            log::debug!("Including {next}");
            self.parse_file(&next_path, recursive, doc, Some(&mut links))?;
        }

        if let Some(parent) = parent_links {
            parent.extend(included);
        }
        Ok(())
    }
}

fn parse_text_into(
    text: &str,
    path: &Path,
    doc: &mut Document,
    links: &mut Vec<String>,
) -> Result<(), ParseError> {
    let (working_path, file_name) = split_path(path);
    doc.items.push(Item::Anchor(path_string(path)));

    let mut items = std::mem::take(&mut doc.items);
    let mut stream = TextStream::new(text);
    let result = {
        let mut ctx = Context {
            doc,
            links_to_parse: links,
            working_path: &working_path,
            file_name: &file_name,
        };
        block::parse_top_level(&mut stream, &mut items, &mut ctx)
    };
    doc.items = items;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_lexically() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d.md")),
            PathBuf::from("/a/c/d.md")
        );
    }

    #[test]
    fn splits_working_path() {
        let (wp, name) = split_path(Path::new("/docs/guide/intro.md"));
        assert_eq!(wp, "/docs/guide/");
        assert_eq!(name, "intro.md");
    }

    #[test]
    fn markdown_extensions() {
        assert!(is_markdown(Path::new("a.md")));
        assert!(is_markdown(Path::new("a.MARKDOWN")));
        assert!(!is_markdown(Path::new("a.txt")));
        assert!(!is_markdown(Path::new("md")));
    }

    #[test]
    fn anchor_precedes_content() {
        let doc = Parser::new().parse_str("text", "/virtual/doc.md").unwrap();
        assert_eq!(doc.items[0], Item::Anchor("/virtual/doc.md".into()));
        assert!(matches!(doc.items[1], Item::Paragraph(_)));
    }

    #[test]
    fn reference_defined_after_use_resolves() {
        let doc = Parser::new()
            .parse_str("[site]\n\n[site]: https://example.org", "/virtual/doc.md")
            .unwrap();
        match &doc.items[1] {
            Item::Paragraph(p) => assert!(matches!(p.items[0], Item::Link(_))),
            other => panic!("{other:?}"),
        }
        assert_eq!(doc.items.len(), 2);
    }
}
