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

//! Office Open XML (`.docx`) writer.

use crate::document::layout::{Block, Document, Paragraph, ParagraphKind, Table};
use crate::document::options::{Align, RenderOptions};
use crate::document::DocumentError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_TITLE: &str = "生成的文档";
pub const DEFAULT_FONT: &str = "SimSun";
const DEFAULT_MARGIN_CM: f64 = 2.5;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PACKAGE_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const REL_DOCUMENT: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_STYLES: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
const REL_HEADER: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/header";
const REL_FOOTER: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer";

const CT_RELS: &str = "application/vnd.openxmlformats-package.relationships+xml";
const CT_DOCUMENT: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml";
const CT_HEADER: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.header+xml";
const CT_FOOTER: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml";

// A4 in twentieths of a point
const PAGE_WIDTH_TWIPS: i64 = 11906;
const PAGE_HEIGHT_TWIPS: i64 = 16838;
const TWIPS_PER_CM: f64 = 567.0;
const PAGE_PLACEHOLDER: &str = "{page}";

/// Write `doc` as a `.docx` package.
pub fn write(doc: &Document, options: &RenderOptions) -> Result<Vec<u8>, DocumentError> {
    let header = options.header.as_deref().filter(|h| !h.is_empty());
    let footer = options.footer.as_deref().filter(|f| !f.is_empty());
    let font = options.font.as_deref().unwrap_or(DEFAULT_FONT);

    let mut parts = vec![
        ("[Content_Types].xml", content_types(header.is_some(), footer.is_some())?),
        ("_rels/.rels", package_relationships()?),
        (
            "word/_rels/document.xml.rels",
            document_relationships(header.is_some(), footer.is_some())?,
        ),
        ("word/document.xml", document_xml(doc, options, header.is_some(), footer.is_some())?),
        ("word/styles.xml", styles_xml(font, options.font_size())?),
    ];

    if let Some(text) = header {
        parts.push(("word/header1.xml", header_footer_xml("w:hdr", text, font)?));
    }
    if let Some(text) = footer {
        parts.push(("word/footer1.xml", header_footer_xml("w:ftr", text, font)?));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let file_options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in parts {
        zip.start_file(name, file_options)?;
        zip.write_all(&data)?;
    }

    Ok(zip.finish()?.into_inner())
}

fn xml_error<E: fmt::Display>(e: E) -> DocumentError {
    DocumentError::Xml(e.to_string())
}

fn twips(points: f64) -> String {
    ((points * 20.0).round() as i64).to_string()
}

fn cm_twips(cm: f64) -> i64 {
    (cm * TWIPS_PER_CM).round() as i64
}

fn half_points(points: f64) -> String {
    ((points * 2.0).round() as i64).max(1).to_string()
}

fn justification(align: Align) -> &'static str {
    match align {
        Align::Left => "left",
        Align::Center => "center",
        Align::Right => "right",
        Align::Justify => "both",
    }
}

/// Thin wrapper over the quick-xml writer for element-at-a-time output.
struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    fn new() -> Result<Self, DocumentError> {
        let mut inner = Writer::new(Vec::new());
        inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(xml_error)?;
        Ok(XmlWriter { inner })
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), DocumentError> {
        let mut el = BytesStart::new(name);
        for attr in attrs {
            el.push_attribute(*attr);
        }
        self.inner.write_event(Event::Start(el)).map_err(xml_error)
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), DocumentError> {
        let mut el = BytesStart::new(name);
        for attr in attrs {
            el.push_attribute(*attr);
        }
        self.inner.write_event(Event::Empty(el)).map_err(xml_error)
    }

    fn end(&mut self, name: &str) -> Result<(), DocumentError> {
        self.inner.write_event(Event::End(BytesEnd::new(name))).map_err(xml_error)
    }

    fn text(&mut self, text: &str) -> Result<(), DocumentError> {
        self.inner.write_event(Event::Text(BytesText::new(text))).map_err(xml_error)
    }

    fn finish(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

/// Character formatting applied to a single run.
struct RunStyle<'a> {
    font: &'a str,
    size: f64,
    bold: bool,
    italic: bool,
    underline: bool,
    color: Option<String>,
}

impl<'a> RunStyle<'a> {
    fn plain(font: &'a str, size: f64) -> Self {
        RunStyle {
            font,
            size,
            bold: false,
            italic: false,
            underline: false,
            color: None,
        }
    }
}

fn run(w: &mut XmlWriter, text: &str, style: &RunStyle<'_>) -> Result<(), DocumentError> {
    let size = half_points(style.size);

    w.start("w:r", &[])?;
    w.start("w:rPr", &[])?;
    w.empty(
        "w:rFonts",
        &[
            ("w:ascii", style.font),
            ("w:hAnsi", style.font),
            ("w:eastAsia", style.font),
            ("w:cs", style.font),
        ],
    )?;
    if style.bold {
        w.empty("w:b", &[])?;
    }
    if style.italic {
        w.empty("w:i", &[])?;
    }
    if let Some(color) = &style.color {
        w.empty("w:color", &[("w:val", color.as_str())])?;
    }
    w.empty("w:sz", &[("w:val", size.as_str())])?;
    w.empty("w:szCs", &[("w:val", size.as_str())])?;
    if style.underline {
        w.empty("w:u", &[("w:val", "single")])?;
    }
    w.end("w:rPr")?;

    w.start("w:t", &[("xml:space", "preserve")])?;
    w.text(text)?;
    w.end("w:t")?;
    w.end("w:r")
}

fn document_xml(
    doc: &Document,
    options: &RenderOptions,
    has_header: bool,
    has_footer: bool,
) -> Result<Vec<u8>, DocumentError> {
    let font = options.font.as_deref().unwrap_or(DEFAULT_FONT);
    let (left, right, top, bottom) = options.resolve_margins(
        (DEFAULT_MARGIN_CM, DEFAULT_MARGIN_CM, DEFAULT_MARGIN_CM, DEFAULT_MARGIN_CM),
        false,
    );
    let text_width = (PAGE_WIDTH_TWIPS - cm_twips(left) - cm_twips(right)).max(TWIPS_PER_CM as i64);

    let mut w = XmlWriter::new()?;
    w.start("w:document", &[("xmlns:w", NS_MAIN), ("xmlns:r", NS_REL)])?;
    w.start("w:body", &[])?;

    title(&mut w, options)?;

    for block in &doc.blocks {
        match block {
            Block::Paragraph(p) => paragraph(&mut w, p, font)?,
            Block::Blank => w.empty("w:p", &[])?,
            Block::Table(t) => {
                table(&mut w, t, font, text_width)?;
                // Word expects a paragraph between a table and what follows it
                w.empty("w:p", &[])?;
            }
            Block::PageBreak => {
                w.start("w:p", &[])?;
                w.start("w:r", &[])?;
                w.empty("w:br", &[("w:type", "page")])?;
                w.end("w:r")?;
                w.end("w:p")?;
            }
        }
    }

    w.start("w:sectPr", &[])?;
    if has_header {
        w.empty("w:headerReference", &[("w:type", "default"), ("r:id", "rIdHeader1")])?;
    }
    if has_footer {
        w.empty("w:footerReference", &[("w:type", "default"), ("r:id", "rIdFooter1")])?;
    }
    w.empty(
        "w:pgSz",
        &[
            ("w:w", PAGE_WIDTH_TWIPS.to_string().as_str()),
            ("w:h", PAGE_HEIGHT_TWIPS.to_string().as_str()),
        ],
    )?;
    w.empty(
        "w:pgMar",
        &[
            ("w:top", cm_twips(top).to_string().as_str()),
            ("w:right", cm_twips(right).to_string().as_str()),
            ("w:bottom", cm_twips(bottom).to_string().as_str()),
            ("w:left", cm_twips(left).to_string().as_str()),
            ("w:header", "720"),
            ("w:footer", "720"),
            ("w:gutter", "0"),
        ],
    )?;
    w.end("w:sectPr")?;

    w.end("w:body")?;
    w.end("w:document")?;
    Ok(w.finish())
}

fn title(w: &mut XmlWriter, options: &RenderOptions) -> Result<(), DocumentError> {
    let text = options.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let font = options.title_font.as_deref().unwrap_or(DEFAULT_FONT);

    w.start("w:p", &[])?;
    w.start("w:pPr", &[])?;
    w.empty("w:pStyle", &[("w:val", "Title")])?;
    w.empty("w:jc", &[("w:val", "center")])?;
    w.end("w:pPr")?;
    run(w, text, &RunStyle::plain(font, options.title_size()))?;
    w.end("w:p")
}

fn paragraph(w: &mut XmlWriter, p: &Paragraph, default_font: &str) -> Result<(), DocumentError> {
    let line = ((p.line_spacing * 240.0).round() as i64).max(1).to_string();

    w.start("w:p", &[])?;
    w.start("w:pPr", &[])?;
    if let ParagraphKind::Heading(level) = p.kind {
        w.empty("w:pStyle", &[("w:val", format!("Heading{}", level).as_str())])?;
    }
    w.empty(
        "w:spacing",
        &[
            ("w:before", twips(p.space_before).as_str()),
            ("w:after", twips(p.space_after).as_str()),
            ("w:line", line.as_str()),
            ("w:lineRule", "auto"),
        ],
    )?;
    if p.left_indent != 0.0 || p.first_line_indent != 0.0 {
        let left = cm_twips(p.left_indent).to_string();
        let first = cm_twips(p.first_line_indent);
        let first_value = first.abs().to_string();
        let first_attr = if first < 0 { "w:hanging" } else { "w:firstLine" };
        w.empty("w:ind", &[("w:left", left.as_str()), (first_attr, first_value.as_str())])?;
    }
    w.empty("w:jc", &[("w:val", justification(p.align))])?;
    w.end("w:pPr")?;

    let style = RunStyle {
        font: p.font.as_deref().unwrap_or(default_font),
        size: p.size,
        bold: p.bold,
        italic: p.italic,
        underline: p.underline,
        color: p.color.map(|c| c.hex()),
    };
    if !p.text.is_empty() {
        run(w, &p.text, &style)?;
    }

    w.end("w:p")
}

fn table(w: &mut XmlWriter, t: &Table, font: &str, text_width: i64) -> Result<(), DocumentError> {
    let cols = t.columns();
    if cols == 0 {
        return Ok(());
    }

    let style_id: String = t.style.chars().filter(|c| !c.is_whitespace()).collect();
    let col_width = (text_width / cols as i64).to_string();

    w.start("w:tbl", &[])?;
    w.start("w:tblPr", &[])?;
    w.empty("w:tblStyle", &[("w:val", style_id.as_str())])?;
    w.empty("w:tblW", &[("w:w", "0"), ("w:type", "auto")])?;
    w.empty("w:tblLayout", &[("w:type", "fixed")])?;
    w.end("w:tblPr")?;

    w.start("w:tblGrid", &[])?;
    for _ in 0..cols {
        w.empty("w:gridCol", &[("w:w", col_width.as_str())])?;
    }
    w.end("w:tblGrid")?;

    let style = RunStyle::plain(font, t.font_size);
    for row in t.normalized_rows() {
        w.start("w:tr", &[])?;
        for cell in row {
            w.start("w:tc", &[])?;
            w.start("w:tcPr", &[])?;
            w.empty("w:tcW", &[("w:w", col_width.as_str()), ("w:type", "dxa")])?;
            w.end("w:tcPr")?;

            w.start("w:p", &[])?;
            w.start("w:pPr", &[])?;
            w.empty("w:jc", &[("w:val", justification(t.align))])?;
            w.end("w:pPr")?;
            if !cell.is_empty() {
                run(w, cell, &style)?;
            }
            w.end("w:p")?;
            w.end("w:tc")?;
        }
        w.end("w:tr")?;
    }

    w.end("w:tbl")
}

fn header_footer_xml(root: &str, text: &str, font: &str) -> Result<Vec<u8>, DocumentError> {
    let style = RunStyle::plain(font, 9.0);

    let mut w = XmlWriter::new()?;
    w.start(root, &[("xmlns:w", NS_MAIN), ("xmlns:r", NS_REL)])?;
    w.start("w:p", &[])?;
    w.start("w:pPr", &[])?;
    w.empty("w:jc", &[("w:val", "center")])?;
    w.end("w:pPr")?;

    for (i, piece) in text.split(PAGE_PLACEHOLDER).enumerate() {
        if i > 0 {
            w.start("w:fldSimple", &[("w:instr", "PAGE")])?;
            run(&mut w, "1", &style)?;
            w.end("w:fldSimple")?;
        }
        if !piece.is_empty() {
            run(&mut w, piece, &style)?;
        }
    }

    w.end("w:p")?;
    w.end(root)?;
    Ok(w.finish())
}

fn styles_xml(font: &str, font_size: f64) -> Result<Vec<u8>, DocumentError> {
    let size = half_points(font_size);

    let mut w = XmlWriter::new()?;
    w.start("w:styles", &[("xmlns:w", NS_MAIN)])?;

    w.start("w:docDefaults", &[])?;
    w.start("w:rPrDefault", &[])?;
    w.start("w:rPr", &[])?;
    w.empty(
        "w:rFonts",
        &[("w:ascii", font), ("w:hAnsi", font), ("w:eastAsia", font), ("w:cs", font)],
    )?;
    w.empty("w:sz", &[("w:val", size.as_str())])?;
    w.empty("w:szCs", &[("w:val", size.as_str())])?;
    w.empty("w:lang", &[("w:val", "en-US"), ("w:eastAsia", "zh-CN")])?;
    w.end("w:rPr")?;
    w.end("w:rPrDefault")?;
    w.empty("w:pPrDefault", &[])?;
    w.end("w:docDefaults")?;

    w.start("w:style", &[("w:type", "paragraph"), ("w:default", "1"), ("w:styleId", "Normal")])?;
    w.empty("w:name", &[("w:val", "Normal")])?;
    w.empty("w:qFormat", &[])?;
    w.end("w:style")?;

    w.start("w:style", &[("w:type", "paragraph"), ("w:styleId", "Title")])?;
    w.empty("w:name", &[("w:val", "Title")])?;
    w.empty("w:basedOn", &[("w:val", "Normal")])?;
    w.empty("w:next", &[("w:val", "Normal")])?;
    w.empty("w:qFormat", &[])?;
    w.start("w:pPr", &[])?;
    w.empty("w:spacing", &[("w:after", "240")])?;
    w.end("w:pPr")?;
    w.end("w:style")?;

    for level in 1..=9u8 {
        let id = format!("Heading{}", level);
        let name = format!("heading {}", level);
        let outline = (level - 1).to_string();
        let heading_size = half_points(crate::document::layout::heading_size(level));

        w.start("w:style", &[("w:type", "paragraph"), ("w:styleId", id.as_str())])?;
        w.empty("w:name", &[("w:val", name.as_str())])?;
        w.empty("w:basedOn", &[("w:val", "Normal")])?;
        w.empty("w:next", &[("w:val", "Normal")])?;
        w.empty("w:qFormat", &[])?;
        w.start("w:pPr", &[])?;
        w.empty("w:keepNext", &[])?;
        w.empty("w:spacing", &[("w:before", "240"), ("w:after", "60")])?;
        w.empty("w:outlineLvl", &[("w:val", outline.as_str())])?;
        w.end("w:pPr")?;
        w.start("w:rPr", &[])?;
        w.empty("w:b", &[])?;
        w.empty("w:sz", &[("w:val", heading_size.as_str())])?;
        w.empty("w:szCs", &[("w:val", heading_size.as_str())])?;
        w.end("w:rPr")?;
        w.end("w:style")?;
    }

    w.start("w:style", &[("w:type", "table"), ("w:default", "1"), ("w:styleId", "TableNormal")])?;
    w.empty("w:name", &[("w:val", "Normal Table")])?;
    w.start("w:tblPr", &[])?;
    w.empty("w:tblInd", &[("w:w", "0"), ("w:type", "dxa")])?;
    w.start("w:tblCellMar", &[])?;
    for (side, width) in [("w:top", "0"), ("w:left", "108"), ("w:bottom", "0"), ("w:right", "108")] {
        w.empty(side, &[("w:w", width), ("w:type", "dxa")])?;
    }
    w.end("w:tblCellMar")?;
    w.end("w:tblPr")?;
    w.end("w:style")?;

    w.start("w:style", &[("w:type", "table"), ("w:styleId", "TableGrid")])?;
    w.empty("w:name", &[("w:val", "Table Grid")])?;
    w.empty("w:basedOn", &[("w:val", "TableNormal")])?;
    w.start("w:tblPr", &[])?;
    w.start("w:tblBorders", &[])?;
    for side in ["w:top", "w:left", "w:bottom", "w:right", "w:insideH", "w:insideV"] {
        w.empty(
            side,
            &[("w:val", "single"), ("w:sz", "4"), ("w:space", "0"), ("w:color", "auto")],
        )?;
    }
    w.end("w:tblBorders")?;
    w.end("w:tblPr")?;
    w.end("w:style")?;

    w.end("w:styles")?;
    Ok(w.finish())
}

fn content_types(has_header: bool, has_footer: bool) -> Result<Vec<u8>, DocumentError> {
    let mut w = XmlWriter::new()?;
    w.start("Types", &[("xmlns", NS_CONTENT_TYPES)])?;
    w.empty("Default", &[("Extension", "rels"), ("ContentType", CT_RELS)])?;
    w.empty("Default", &[("Extension", "xml"), ("ContentType", "application/xml")])?;
    w.empty("Override", &[("PartName", "/word/document.xml"), ("ContentType", CT_DOCUMENT)])?;
    w.empty("Override", &[("PartName", "/word/styles.xml"), ("ContentType", CT_STYLES)])?;
    if has_header {
        w.empty("Override", &[("PartName", "/word/header1.xml"), ("ContentType", CT_HEADER)])?;
    }
    if has_footer {
        w.empty("Override", &[("PartName", "/word/footer1.xml"), ("ContentType", CT_FOOTER)])?;
    }
    w.end("Types")?;
    Ok(w.finish())
}

fn package_relationships() -> Result<Vec<u8>, DocumentError> {
    let mut w = XmlWriter::new()?;
    w.start("Relationships", &[("xmlns", NS_PACKAGE_REL)])?;
    w.empty(
        "Relationship",
        &[("Id", "rId1"), ("Type", REL_DOCUMENT), ("Target", "word/document.xml")],
    )?;
    w.end("Relationships")?;
    Ok(w.finish())
}

fn document_relationships(has_header: bool, has_footer: bool) -> Result<Vec<u8>, DocumentError> {
    let mut w = XmlWriter::new()?;
    w.start("Relationships", &[("xmlns", NS_PACKAGE_REL)])?;
    w.empty("Relationship", &[("Id", "rIdStyles"), ("Type", REL_STYLES), ("Target", "styles.xml")])?;
    if has_header {
        w.empty("Relationship", &[("Id", "rIdHeader1"), ("Type", REL_HEADER), ("Target", "header1.xml")])?;
    }
    if has_footer {
        w.empty("Relationship", &[("Id", "rIdFooter1"), ("Type", REL_FOOTER), ("Target", "footer1.xml")])?;
    }
    w.end("Relationships")?;
    Ok(w.finish())
}
