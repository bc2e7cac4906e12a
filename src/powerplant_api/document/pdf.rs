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

//! PDF 1.4 writer.
//!
//! Text is wrapped and paginated here rather than by a viewer, so every page is a fixed
//! sequence of drawing operators. All text is set in a single font: an embedded TrueType
//! font when one could be loaded, otherwise the built-in Helvetica.

use crate::document::font::{self, PdfFont, TrueTypeFont};
use crate::document::layout::{Block, Document, Paragraph, ParagraphKind, Rgb, Table};
use crate::document::options::{Align, RenderOptions};
use crate::document::DocumentError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::mem;
use std::path::PathBuf;

pub const DEFAULT_TITLE: &str = "生成的PDF文档";
pub const DEFAULT_FOOTER: &str = "第 {page} 页";
const PAGE_PLACEHOLDER: &str = "{page}";

const A4: (f64, f64) = (595.2756, 841.8898);
const LETTER: (f64, f64) = (612.0, 792.0);
const POINTS_PER_CM: f64 = 28.346_457;

const DEFAULT_MARGINS_CM: (f64, f64, f64, f64) = (2.0, 2.0, 2.5, 2.5);
const DEFAULT_LEADING: f64 = 18.0;
const TITLE_SPACE_AFTER: f64 = 12.0;
const TITLE_SPACER: f64 = 12.0;
const TABLE_SPACER: f64 = 12.0;
const BLANK_SPACER: f64 = 6.0;
const HEADER_FOOTER_SIZE: f64 = 9.0;
const HEADER_FOOTER_OFFSET: f64 = 15.0;

const CELL_PADDING_X: f64 = 6.0;
const CELL_PADDING_Y: f64 = 3.0;
const GRID_WIDTH: f64 = 0.5;

type Color = (f64, f64, f64);

const BLACK: Color = (0.0, 0.0, 0.0);
const GREY: Color = (0.502, 0.502, 0.502);
const WHITE: Color = (1.0, 1.0, 1.0);
const WHITESMOKE: Color = (0.961, 0.961, 0.961);
const LIGHTGREY: Color = (0.827, 0.827, 0.827);

/// Write `doc` as a PDF. The font at `fontPath` is tried first, then `fallback_fonts`.
pub fn write(doc: &Document, options: &RenderOptions, fallback_fonts: &[PathBuf]) -> Result<Vec<u8>, DocumentError> {
    let requested = options
        .font_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(font::DEFAULT_FONT_PATH));
    let font = PdfFont::resolve(Some(requested.as_path()), fallback_fonts);

    let (width, height) = page_size(options.page_size.as_deref());
    let (left, right, top, bottom) = options.resolve_margins(DEFAULT_MARGINS_CM, true);
    let geometry = Geometry {
        width,
        height,
        left: left * POINTS_PER_CM,
        right: right * POINTS_PER_CM,
        top: top * POINTS_PER_CM,
        bottom: bottom * POINTS_PER_CM,
    };

    let title = options.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let leading = options.leading.unwrap_or(DEFAULT_LEADING);

    let mut composer = Composer::new(&font, geometry);
    composer.title(title, options.title_size());
    for block in &doc.blocks {
        match block {
            Block::Paragraph(p) => composer.paragraph(p, leading),
            Block::Blank => composer.space(BLANK_SPACER),
            Block::Table(t) => composer.table(t),
            Block::PageBreak => composer.new_page(),
        }
    }

    let footer = options.footer.as_deref().unwrap_or(DEFAULT_FOOTER);
    let (pages, glyphs) = composer.finish(options.header.as_deref(), footer);
    tracing::debug!(message = "composed PDF", pages = pages.len(), glyphs = glyphs.len());

    assemble(&pages, &font, &glyphs, &geometry, title)
}

fn page_size(name: Option<&str>) -> (f64, f64) {
    match name {
        None => A4,
        Some(s) if s.trim().eq_ignore_ascii_case("A4") => A4,
        Some(_) => LETTER,
    }
}

#[derive(Clone, Copy, Debug)]
struct Geometry {
    width: f64,
    height: f64,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
}

impl Geometry {
    fn frame_width(&self) -> f64 {
        self.width - self.left - self.right
    }

    fn frame_top(&self) -> f64 {
        self.height - self.top
    }
}

/// Character formatting for one line of text.
#[derive(Clone, Copy, Debug)]
struct TextStyle {
    size: f64,
    bold: bool,
    italic: bool,
    underline: bool,
    color: Option<Rgb>,
    char_spacing: f64,
}

impl TextStyle {
    fn plain(size: f64) -> Self {
        TextStyle {
            size,
            bold: false,
            italic: false,
            underline: false,
            color: None,
            char_spacing: 0.0,
        }
    }
}

/// Number formatted for a content stream.
fn num(v: f64) -> String {
    let s = format!("{:.2}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".to_owned()
    } else {
        s.to_owned()
    }
}

fn is_wide(c: char) -> bool {
    matches!(c as u32, 0x2E80..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF | 0xFF00..=0xFFEF)
}

/// Break `text` into lines no wider than `first_width` (first line) or `width` (the
/// rest). Lines break after spaces or between wide characters, and anywhere inside
/// a word that does not fit on a line by itself.
fn wrap(font: &PdfFont, text: &str, size: f64, first_width: f64, width: f64) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut lines = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let avail = if lines.is_empty() { first_width } else { width };
        let mut used = 0.0;
        let mut end = start;
        let mut last_break = None;

        while end < chars.len() {
            let w = font.char_width(chars[end], size);
            if used + w > avail && end > start {
                break;
            }
            used += w;
            if chars[end] == ' ' || is_wide(chars[end]) {
                last_break = Some(end + 1);
            }
            end += 1;
        }

        if end < chars.len() && !(chars[end] == ' ' || is_wide(chars[end])) {
            if let Some(b) = last_break {
                end = b;
            }
        }

        let line: String = chars[start..end].iter().collect();
        lines.push(line.trim_end().to_owned());

        start = end;
        while start < chars.len() && chars[start] == ' ' {
            start += 1;
        }
    }

    lines
}

/// Lays out blocks onto pages, producing one content stream per page.
struct Composer<'a> {
    font: &'a PdfFont,
    geometry: Geometry,
    glyphs: BTreeMap<u16, char>,
    pages: Vec<String>,
    page: String,
    y: f64,
    fresh: bool,
}

impl<'a> Composer<'a> {
    fn new(font: &'a PdfFont, geometry: Geometry) -> Self {
        Composer {
            font,
            geometry,
            glyphs: BTreeMap::new(),
            pages: Vec::new(),
            page: String::new(),
            y: geometry.frame_top(),
            fresh: true,
        }
    }

    fn new_page(&mut self) {
        let page = mem::take(&mut self.page);
        self.pages.push(page);
        self.y = self.geometry.frame_top();
        self.fresh = true;
    }

    /// Start a new page unless `height` fits below the cursor. Content taller than a
    /// whole page is placed at the top of a page and allowed to overflow.
    fn ensure(&mut self, height: f64) {
        if !self.fresh && self.y - height < self.geometry.bottom - 0.01 {
            self.new_page();
        }
    }

    /// Vertical space, dropped at the top of a page.
    fn space(&mut self, height: f64) {
        if !self.fresh {
            self.y -= height;
        }
    }

    fn encode(&mut self, text: &str) -> String {
        let font = self.font;
        let mut hex = String::with_capacity(text.len() * 4);

        match font {
            PdfFont::Embedded(f) => {
                for c in text.chars() {
                    let glyph = f.glyph(c);
                    self.glyphs.entry(glyph).or_insert(c);
                    let _ = write!(hex, "{:04X}", glyph);
                }
            }
            PdfFont::Helvetica => {
                for c in text.chars() {
                    let _ = write!(hex, "{:02X}", font::win_ansi(c));
                }
            }
        }

        hex
    }

    fn draw_text(&mut self, x: f64, baseline: f64, text: &str, style: &TextStyle) {
        if text.is_empty() {
            return;
        }

        let hex = self.encode(text);
        let (r, g, b) = style
            .color
            .map(|c| (f64::from(c.0) / 255.0, f64::from(c.1) / 255.0, f64::from(c.2) / 255.0))
            .unwrap_or(BLACK);
        let skew = if style.italic { 0.21 } else { 0.0 };

        let out = &mut self.page;
        let _ = writeln!(out, "q");
        let _ = writeln!(out, "{} {} {} rg {} {} {} RG", num(r), num(g), num(b), num(r), num(g), num(b));
        if style.bold {
            let _ = writeln!(out, "{} w", num(style.size * 0.03));
        }
        let _ = writeln!(out, "BT");
        let _ = writeln!(out, "/F1 {} Tf", num(style.size));
        if style.bold {
            let _ = writeln!(out, "2 Tr");
        }
        if style.char_spacing != 0.0 {
            let _ = writeln!(out, "{} Tc", num(style.char_spacing));
        }
        let _ = writeln!(out, "1 0 {} 1 {} {} Tm", num(skew), num(x), num(baseline));
        let _ = writeln!(out, "<{}> Tj", hex);
        let _ = writeln!(out, "ET");

        if style.underline {
            let width = self.font.text_width(text, style.size)
                + style.char_spacing * (text.chars().count().saturating_sub(1)) as f64;
            let uy = baseline - style.size * 0.15;
            let _ = writeln!(out, "{} w", num((style.size * 0.06).max(0.5)));
            let _ = writeln!(out, "{} {} m {} {} l S", num(x), num(uy), num(x + width), num(uy));
        }

        let _ = writeln!(out, "Q");
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) {
        let _ = writeln!(
            self.page,
            "q {} {} {} rg {} {} {} {} re f Q",
            num(color.0),
            num(color.1),
            num(color.2),
            num(x),
            num(y),
            num(w),
            num(h)
        );
    }

    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color, line_width: f64) {
        let _ = writeln!(
            self.page,
            "q {} w {} {} {} RG {} {} {} {} re S Q",
            num(line_width),
            num(color.0),
            num(color.1),
            num(color.2),
            num(x),
            num(y),
            num(w),
            num(h)
        );
    }

    fn title(&mut self, text: &str, size: f64) {
        let p = Paragraph {
            kind: ParagraphKind::Body,
            text: text.to_owned(),
            font: None,
            size,
            bold: false,
            italic: false,
            underline: false,
            color: None,
            align: Align::Center,
            line_spacing: 1.0,
            leading: Some(size * 1.2),
            space_before: 0.0,
            space_after: TITLE_SPACE_AFTER,
            left_indent: 0.0,
            first_line_indent: 0.0,
        };

        self.paragraph(&p, size * 1.2);
        self.space(TITLE_SPACER);
    }

    fn paragraph(&mut self, p: &Paragraph, default_leading: f64) {
        let size = p.size.max(1.0);
        let leading = match p.leading {
            Some(l) => l.max(1.0),
            None => default_leading.max(size * 1.2),
        };

        self.space(p.space_before);

        let frame = self.geometry.frame_width();
        let first_indent = p.left_indent + p.first_line_indent;
        let lines = if p.text.is_empty() {
            vec![String::new()]
        } else {
            wrap(self.font, &p.text, size, frame - first_indent, frame - p.left_indent)
        };

        let last = lines.len() - 1;
        for (i, line) in lines.iter().enumerate() {
            self.ensure(leading);

            let indent = if i == 0 { first_indent } else { p.left_indent };
            let avail = frame - indent;
            let line_width = self.font.text_width(line, size);

            let mut style = TextStyle {
                size,
                bold: p.bold,
                italic: p.italic,
                underline: p.underline,
                color: p.color,
                char_spacing: 0.0,
            };

            let x = self.geometry.left
                + indent
                + match p.align {
                    Align::Left | Align::Justify => 0.0,
                    Align::Center => (avail - line_width) / 2.0,
                    Align::Right => avail - line_width,
                };

            let glyphs = line.chars().count();
            if p.align == Align::Justify && i < last && glyphs > 1 && avail > line_width {
                style.char_spacing = (avail - line_width) / (glyphs - 1) as f64;
            }

            let baseline = baseline(self.y, leading, size);
            self.draw_text(x, baseline, line, &style);
            self.y -= leading;
            self.fresh = false;
        }

        self.y -= p.space_after;
    }

    fn table(&mut self, t: &Table) {
        let rows = t.normalized_rows();
        let cols = t.columns();
        if cols == 0 {
            return;
        }

        self.space(TABLE_SPACER);

        let size = t.font_size.max(1.0);
        let line_height = size * 1.2;
        let frame = self.geometry.frame_width();

        let mut widths = vec![2.0 * CELL_PADDING_X + size; cols];
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                let w = self.font.text_width(cell, size) + 2.0 * CELL_PADDING_X;
                widths[i] = widths[i].max(w);
            }
        }

        let natural: f64 = widths.iter().sum();
        if natural > frame {
            let scale = frame / natural;
            widths.iter_mut().for_each(|w| *w *= scale);
        }

        let table_width: f64 = widths.iter().sum();
        let x0 = self.geometry.left + (frame - table_width).max(0.0) / 2.0;

        for (r, row) in rows.iter().enumerate() {
            let cells: Vec<Vec<String>> = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| {
                    let inner = (w - 2.0 * CELL_PADDING_X).max(size);
                    wrap(self.font, cell, size, inner, inner)
                })
                .collect();

            let lines = cells.iter().map(Vec::len).max().unwrap_or(0).max(1);
            let height = lines as f64 * line_height + 2.0 * CELL_PADDING_Y;
            self.ensure(height);

            let top = self.y;
            let background = match r {
                0 => WHITESMOKE,
                n if n % 2 == 1 => WHITE,
                _ => LIGHTGREY,
            };
            self.fill_rect(x0, top - height, table_width, height, background);

            let mut x = x0;
            for (cell, w) in cells.iter().zip(&widths) {
                self.stroke_rect(x, top - height, *w, height, GREY, GRID_WIDTH);

                let block = cell.len() as f64 * line_height;
                let mut line_top = top - (height - block) / 2.0;
                for line in cell {
                    let line_width = self.font.text_width(line, size);
                    let offset = match t.align {
                        Align::Left | Align::Justify => CELL_PADDING_X,
                        Align::Center => (w - line_width) / 2.0,
                        Align::Right => w - CELL_PADDING_X - line_width,
                    };
                    let baseline = baseline(line_top, line_height, size);
                    self.draw_text(x + offset, baseline, line, &TextStyle::plain(size));
                    line_top -= line_height;
                }

                x += w;
            }

            self.y -= height;
            self.fresh = false;
        }
    }

    /// Close the last page and draw the header and footer on every page.
    fn finish(mut self, header: Option<&str>, footer: &str) -> (Vec<String>, BTreeMap<u16, char>) {
        let page = mem::take(&mut self.page);
        self.pages.push(page);

        let g = self.geometry;
        let style = TextStyle::plain(HEADER_FOOTER_SIZE);
        let mut pages = mem::take(&mut self.pages);

        for (i, content) in pages.iter_mut().enumerate() {
            let number = (i + 1).to_string();
            mem::swap(&mut self.page, content);

            if let Some(text) = header.filter(|h| !h.is_empty()) {
                let text = text.replace(PAGE_PLACEHOLDER, &number);
                self.draw_text(g.left, g.frame_top() + HEADER_FOOTER_OFFSET, &text, &style);
            }

            if !footer.is_empty() {
                let text = footer.replace(PAGE_PLACEHOLDER, &number);
                let width = self.font.text_width(&text, HEADER_FOOTER_SIZE);
                self.draw_text(
                    g.width - g.right - width,
                    g.bottom - HEADER_FOOTER_OFFSET,
                    &text,
                    &style,
                );
            }

            mem::swap(&mut self.page, content);
        }

        (pages, self.glyphs)
    }
}

/// Baseline for text of `size` vertically centered in a line box of `height`.
fn baseline(top: f64, height: f64, size: f64) -> f64 {
    top - height + (height - size) / 2.0 + size * 0.22
}

/// Sequential object writer that records offsets for the cross-reference table.
struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<Option<usize>>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut buf = b"%PDF-1.4\n".to_vec();
        buf.extend_from_slice(&[b'%', 0xE2, 0xE3, 0xCF, 0xD3, b'\n']);
        PdfWriter {
            buf,
            offsets: Vec::new(),
        }
    }

    /// Allocate an object number to be written later.
    fn reserve(&mut self) -> usize {
        self.offsets.push(None);
        self.offsets.len()
    }

    fn object(&mut self, id: usize, body: &str) {
        self.offsets[id - 1] = Some(self.buf.len());
        self.buf
            .extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) -> Result<(), DocumentError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        self.offsets[id - 1] = Some(self.buf.len());
        self.buf.extend_from_slice(
            format!(
                "{} 0 obj\n<< {} /Filter /FlateDecode /Length {} >>\nstream\n",
                id,
                dict,
                compressed.len()
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(&compressed);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        Ok(())
    }

    fn finish(mut self, root: usize, info: usize) -> Vec<u8> {
        let xref = self.buf.len();
        let size = self.offsets.len() + 1;

        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", size);
        for offset in &self.offsets {
            match offset {
                Some(o) => {
                    let _ = write!(table, "{:010} 00000 n \n", o);
                }
                None => table.push_str("0000000000 65535 f \n"),
            }
        }
        let _ = write!(
            table,
            "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            size, root, info, xref
        );

        self.buf.extend_from_slice(table.as_bytes());
        self.buf
    }
}

fn utf16_hex(text: &str) -> String {
    let mut hex = String::from("FEFF");
    for unit in text.encode_utf16() {
        let _ = write!(hex, "{:04X}", unit);
    }
    hex
}

fn assemble(
    pages: &[String],
    font: &PdfFont,
    glyphs: &BTreeMap<u16, char>,
    geometry: &Geometry,
    title: &str,
) -> Result<Vec<u8>, DocumentError> {
    let mut pdf = PdfWriter::new();
    let catalog = pdf.reserve();
    let page_tree = pdf.reserve();
    let font_id = write_font(&mut pdf, font, glyphs)?;

    let mut kids = Vec::with_capacity(pages.len());
    for content in pages {
        let content_id = pdf.reserve();
        pdf.stream(content_id, "", content.as_bytes())?;

        let page_id = pdf.reserve();
        pdf.object(
            page_id,
            &format!(
                "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 {} 0 R >> >> /Contents {} 0 R >>",
                page_tree,
                num(geometry.width),
                num(geometry.height),
                font_id,
                content_id
            ),
        );
        kids.push(format!("{} 0 R", page_id));
    }

    pdf.object(
        page_tree,
        &format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), kids.len()),
    );
    pdf.object(catalog, &format!("<< /Type /Catalog /Pages {} 0 R >>", page_tree));

    let info = pdf.reserve();
    pdf.object(
        info,
        &format!("<< /Producer (powerplant_api) /Title <{}> >>", utf16_hex(title)),
    );

    Ok(pdf.finish(catalog, info))
}

fn write_font(pdf: &mut PdfWriter, font: &PdfFont, glyphs: &BTreeMap<u16, char>) -> Result<usize, DocumentError> {
    match font {
        PdfFont::Helvetica => {
            let id = pdf.reserve();
            pdf.object(
                id,
                "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
            );
            Ok(id)
        }
        PdfFont::Embedded(f) => write_embedded_font(pdf, f, glyphs),
    }
}

fn write_embedded_font(
    pdf: &mut PdfWriter,
    font: &TrueTypeFont,
    glyphs: &BTreeMap<u16, char>,
) -> Result<usize, DocumentError> {
    let program = font.subset(glyphs.keys().copied()).unwrap_or_else(|e| {
        tracing::debug!(message = "unable to subset font, embedding all of it", font = %font.name, error = %e);
        font.data.clone()
    });

    let file = pdf.reserve();
    pdf.stream(file, &format!("/Length1 {}", program.len()), &program)?;

    let bbox = font.bbox();
    let descriptor = pdf.reserve();
    pdf.object(
        descriptor,
        &format!(
            "<< /Type /FontDescriptor /FontName /{} /Flags 4 /FontBBox [{} {} {} {}] /ItalicAngle 0 /Ascent {} /Descent {} /CapHeight {} /StemV 80 /FontFile2 {} 0 R >>",
            font.name,
            num(bbox[0]),
            num(bbox[1]),
            num(bbox[2]),
            num(bbox[3]),
            num(font.ascent()),
            num(font.descent()),
            num(font.ascent()),
            file
        ),
    );

    let mut widths = String::new();
    for glyph in glyphs.keys() {
        let _ = write!(widths, "{} [{}] ", glyph, num(font.advance(*glyph)));
    }

    let cid_font = pdf.reserve();
    pdf.object(
        cid_font,
        &format!(
            "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{} /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> /FontDescriptor {} 0 R /DW 1000 /W [{}] /CIDToGIDMap /Identity >>",
            font.name,
            descriptor,
            widths.trim_end()
        ),
    );

    let to_unicode = pdf.reserve();
    pdf.stream(to_unicode, "", to_unicode_cmap(glyphs).as_bytes())?;

    let id = pdf.reserve();
    pdf.object(
        id,
        &format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{} /Encoding /Identity-H /DescendantFonts [{} 0 R] /ToUnicode {} 0 R >>",
            font.name, cid_font, to_unicode
        ),
    );

    Ok(id)
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, char>) -> String {
    let mut out = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );

    let entries: Vec<(&u16, &char)> = glyphs.iter().filter(|(g, _)| **g != 0).collect();
    for chunk in entries.chunks(100) {
        let _ = writeln!(out, "{} beginbfchar", chunk.len());
        for (glyph, c) in chunk {
            let mut units = [0u16; 2];
            let hex: String = c.encode_utf16(&mut units).iter().map(|u| format!("{:04X}", u)).collect();
            let _ = writeln!(out, "<{:04X}> <{}>", glyph, hex);
        }
        let _ = writeln!(out, "endbfchar");
    }

    out.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    out
}
