use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextOptions {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
}

impl TextOptions {
    pub const PLAIN: TextOptions = TextOptions {
        bold: false,
        italic: false,
        strikethrough: false,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

/// A run of plain text. `space_before`/`space_after` record whether the source
/// had whitespace around the run; layout uses them to decide word spacing.
#[derive(Clone, Debug, PartialEq)]
pub struct Text {
    pub text: String,
    pub opts: TextOptions,
    pub space_before: bool,
    pub space_after: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Paragraph {
    pub items: Vec<Item>,
}

impl Paragraph {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Heading {
    pub text: Paragraph,
    pub level: u8,
    /// `#<slug>/<working path><file name>`, explicit `{#id}` or generated.
    pub label: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blockquote {
    pub items: Vec<Item>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    Ordered,
    Unordered,
}

/// Whether an ordered item restarts numbering (`1.`) or continues it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListStart {
    Start,
    Continue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListItem {
    pub kind: ListKind,
    pub start: ListStart,
    pub number: u32,
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct List {
    pub items: Vec<ListItem>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub url: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub url: String,
    /// Empty means the URL itself is the visible text.
    pub text: String,
    pub opts: TextOptions,
    pub img: Option<Image>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    pub text: String,
    pub inlined: bool,
    pub syntax: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Math {
    pub expr: String,
    pub inlined: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableCell {
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

/// First row is the header. Rows never carry more cells than there are columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<TableRow>,
    pub alignments: Vec<Alignment>,
}

impl Table {
    pub fn columns_count(&self) -> usize {
        self.alignments.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FootnoteRef {
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Footnote {
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Heading(Heading),
    Paragraph(Paragraph),
    Text(Text),
    LineBreak,
    Blockquote(Blockquote),
    List(List),
    Link(Link),
    Image(Image),
    Code(Code),
    Math(Math),
    Table(Table),
    FootnoteRef(FootnoteRef),
    PageBreak,
    /// Absolute path of an included file; target of links to that file.
    Anchor(String),
    HorizontalLine,
}

#[derive(Clone, Debug, Default)]
pub struct Document {
    pub items: Vec<Item>,
    pub footnotes: HashMap<String, Footnote>,
    pub labeled_links: HashMap<String, Link>,
    pub labeled_headings: HashMap<String, Heading>,
}

impl Document {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
