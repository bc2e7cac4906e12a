// powerplant_api - Operations dashboard backend for power-plant efficiency metrics
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::document::options::{Align, ParagraphOptions, RenderOptions, TableOptions};
use serde_json::Value;

pub const BULLET_PREFIX: &str = "• ";
pub const DEFAULT_TABLE_STYLE: &str = "Table Grid";
pub const DEFAULT_TABLE_FONT_SIZE: f64 = 10.0;
const MAX_HEADING_LEVEL: u8 = 9;

/// Sequence of blocks making up the body of a document, below the title.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn paragraphs(&self) -> impl Iterator<Item = &Paragraph> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Paragraph(p) => Some(p),
            _ => None,
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Table(t) => Some(t),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Block {
    Paragraph(Paragraph),
    /// Empty line between paragraphs.
    Blank,
    Table(Table),
    PageBreak,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParagraphKind {
    Body,
    Heading(u8),
}

/// Color as red, green and blue components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn parse(s: &str) -> Option<Rgb> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }

        let component = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Rgb(component(0)?, component(2)?, component(4)?))
    }

    pub fn hex(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

/// A paragraph with every formatting attribute resolved against the document defaults.
///
/// Sizes and spacing are points. Indents are kept in the unit of the request, which is
/// centimeters for Word output and points for PDF output.
#[derive(Clone, Debug, PartialEq)]
pub struct Paragraph {
    pub kind: ParagraphKind,
    pub text: String,
    pub font: Option<String>,
    pub size: f64,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: Option<Rgb>,
    pub align: Align,
    pub line_spacing: f64,
    pub leading: Option<f64>,
    pub space_before: f64,
    pub space_after: f64,
    pub left_indent: f64,
    pub first_line_indent: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
    pub style: String,
    pub font_size: f64,
    pub align: Align,
}

impl Table {
    /// Number of columns, taken from the first row.
    pub fn columns(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    /// Cell text for every row, padded with empty cells or truncated to `columns()`.
    pub fn normalized_rows(&self) -> Vec<Vec<&str>> {
        let cols = self.columns();
        self.rows
            .iter()
            .map(|row| (0..cols).map(|i| row.get(i).map(String::as_str).unwrap_or("")).collect())
            .collect()
    }
}

/// Default point size of a heading at the given level.
pub fn heading_size(level: u8) -> f64 {
    match level {
        0 | 1 => 16.0,
        2 => 14.0,
        3 => 13.0,
        _ => 12.0,
    }
}

/// Split plain content into lines. Clients send either real line feeds or the
/// two character escape `\n`, both are accepted.
pub fn split_lines(content: &str) -> Vec<&str> {
    content
        .split('\n')
        .flat_map(|line| line.split("\\n"))
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Build the body of a document from plain `content` or, when present, the paragraph
/// list in `options`. A table and a trailing page break are appended when requested.
pub fn build(content: &str, options: &RenderOptions) -> Document {
    let mut blocks = Vec::new();

    match &options.paragraphs {
        Some(paragraphs) => {
            let mut counter = 0;
            for p in paragraphs {
                blocks.push(Block::Paragraph(paragraph(p, options, &mut counter)));
            }
        }
        None => {
            // A trailing newline does not add an empty paragraph
            let content = content.strip_suffix('\n').unwrap_or(content);
            if content.is_empty() {
                blocks.push(Block::Blank);
            } else {
                for line in split_lines(content) {
                    if line.trim().is_empty() {
                        blocks.push(Block::Blank);
                    } else {
                        blocks.push(Block::Paragraph(body(line, options)));
                    }
                }
            }
        }
    }

    if let Some(t) = options.table.as_ref().and_then(table) {
        blocks.push(Block::Table(t));
    }

    if options.page_break {
        blocks.push(Block::PageBreak);
    }

    Document { blocks }
}

fn body(text: &str, options: &RenderOptions) -> Paragraph {
    Paragraph {
        kind: ParagraphKind::Body,
        text: text.to_owned(),
        font: options.font.clone(),
        size: options.font_size(),
        bold: false,
        italic: false,
        underline: false,
        color: None,
        align: options.align.unwrap_or_default(),
        line_spacing: options.line_spacing.unwrap_or(RenderOptions::DEFAULT_LINE_SPACING),
        leading: options.leading,
        space_before: options.space_before.unwrap_or(RenderOptions::DEFAULT_SPACE_BEFORE),
        space_after: options.space_after.unwrap_or(RenderOptions::DEFAULT_SPACE_AFTER),
        left_indent: 0.0,
        first_line_indent: 0.0,
    }
}

fn paragraph(p: &ParagraphOptions, options: &RenderOptions, counter: &mut u32) -> Paragraph {
    let mut out = body(&p.content, options);

    // Heading wins over numbered, which wins over bulleted
    if p.is_heading() {
        let level = p.level.unwrap_or(1).clamp(1, MAX_HEADING_LEVEL);
        out.kind = ParagraphKind::Heading(level);
        out.size = heading_size(level);
        out.bold = true;
    } else if p.numbered {
        *counter += 1;
        out.text = format!("{}. {}", counter, p.content);
    } else if p.bulleted {
        out.text = format!("{}{}", BULLET_PREFIX, p.content);
    }

    if let Some(font) = &p.font {
        out.font = Some(font.clone());
    }
    if let Some(size) = p.font_size {
        out.size = size;
    }
    if let Some(bold) = p.bold {
        out.bold = bold;
    }

    out.italic = p.italic;
    out.underline = p.underline;
    out.color = p.color.as_deref().and_then(Rgb::parse);
    out.align = p.align.unwrap_or(out.align);
    out.line_spacing = p.line_spacing.unwrap_or(out.line_spacing);
    out.leading = p.leading.or(out.leading);
    out.space_before = p.space_before.unwrap_or(out.space_before);
    out.space_after = p.space_after.unwrap_or(out.space_after);
    out.left_indent = p.left_indent.unwrap_or(0.0);
    out.first_line_indent = p.first_line_indent.unwrap_or(0.0);
    out
}

fn table(t: &TableOptions) -> Option<Table> {
    if t.data.is_empty() || t.data[0].is_empty() {
        return None;
    }

    Some(Table {
        rows: t.data.iter().map(|row| row.iter().map(cell_text).collect()).collect(),
        style: t.style.clone().unwrap_or_else(|| DEFAULT_TABLE_STYLE.to_owned()),
        font_size: t.font_size.unwrap_or(DEFAULT_TABLE_FONT_SIZE),
        align: t.align.unwrap_or_default(),
    })
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
