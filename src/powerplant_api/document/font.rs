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

//! Fonts for PDF output.
//!
//! A font file is usable when it is a TrueType font, or a collection whose first face is
//! one, with `cmap`, `hmtx` and `glyf` tables. Fonts with PostScript (CFF) outlines are
//! rejected. When no candidate is usable text is set in the built-in Helvetica, which
//! only covers Latin-1.

use std::collections::{BTreeSet, HashMap};
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

/// Font files tried, in order, after the requested font.
pub const DEFAULT_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/PingFang.ttc",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc";

const TAG_TRUE: u32 = 0x0001_0000;
const TAG_TRUE_MAC: u32 = 0x7472_7565; // "true"
const TAG_OTTO: u32 = 0x4F54_544F; // "OTTO"
const TAG_TTCF: u32 = 0x7474_6366; // "ttcf"

/// Helvetica advance widths for the printable ASCII range, 1000 units per em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' ' to '/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // digits
    278, 278, 584, 584, 584, 556, 1015, // ':' to '@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A' to 'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N' to 'Z'
    278, 278, 278, 469, 556, 333, // '[' to '`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a' to 'm'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n' to 'z'
    334, 260, 334, 584, // '{' to '~'
];

#[derive(Debug)]
pub enum FontError {
    Io(PathBuf, io::Error),
    Malformed(&'static str),
    Unsupported(&'static str),
}

impl fmt::Display for FontError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(p, e) => write!(f, "unable to read font {}: {}", p.display(), e),
            Self::Malformed(m) => write!(f, "malformed font: {}", m),
            Self::Unsupported(m) => write!(f, "unsupported font: {}", m),
        }
    }
}

impl error::Error for FontError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Font used to set all text of a PDF document.
#[derive(Debug)]
pub enum PdfFont {
    Embedded(TrueTypeFont),
    Helvetica,
}

impl PdfFont {
    /// First usable font of `requested` followed by `fallbacks`, or Helvetica.
    pub fn resolve(requested: Option<&Path>, fallbacks: &[PathBuf]) -> PdfFont {
        let mut tried: Vec<&Path> = Vec::new();
        for path in requested.into_iter().chain(fallbacks.iter().map(PathBuf::as_path)) {
            if tried.contains(&path) {
                continue;
            }

            tried.push(path);
            match TrueTypeFont::from_file(path) {
                Ok(font) => {
                    tracing::debug!(message = "using font for PDF", path = %path.display());
                    return PdfFont::Embedded(font);
                }
                Err(e) => {
                    tracing::debug!(message = "skipping font", path = %path.display(), error = %e);
                }
            }
        }

        tracing::debug!(message = "no usable font file, falling back to Helvetica");
        PdfFont::Helvetica
    }

    /// Advance width of `c` at `size` points.
    pub fn char_width(&self, c: char, size: f64) -> f64 {
        let units = match self {
            Self::Embedded(f) => f.advance(f.glyph(c)),
            Self::Helvetica => helvetica_width(c),
        };

        units * size / 1000.0
    }

    pub fn text_width(&self, text: &str, size: f64) -> f64 {
        text.chars().map(|c| self.char_width(c, size)).sum()
    }
}

fn helvetica_width(c: char) -> f64 {
    let code = c as u32;
    let w = if (32..127).contains(&code) {
        HELVETICA_WIDTHS[(code - 32) as usize]
    } else if c == '•' {
        350
    } else {
        556
    };

    f64::from(w)
}

/// Single-byte WinAnsi code for `c`, `?` for characters Helvetica cannot show.
pub fn win_ansi(c: char) -> u8 {
    match c as u32 {
        code @ 32..=126 => code as u8,
        code @ 0xA0..=0xFF => code as u8,
        0x2022 => 0x95,
        _ => b'?',
    }
}

/// A parsed TrueType face ready to be embedded.
#[derive(Debug)]
pub struct TrueTypeFont {
    pub name: String,
    /// Standalone font program. Collections are unpacked to their first face.
    pub data: Vec<u8>,
    units_per_em: u16,
    bbox: [i16; 4],
    ascent: i16,
    descent: i16,
    cmap: HashMap<u32, u16>,
    advances: Vec<u16>,
}

impl TrueTypeFont {
    pub fn from_file(path: &Path) -> Result<Self, FontError> {
        let data = fs::read(path).map_err(|e| FontError::Io(path.to_path_buf(), e))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().chars().filter(char::is_ascii_alphanumeric).collect::<String>())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "EmbeddedFont".to_owned());

        Self::parse(name, &data)
    }

    pub fn parse(name: String, data: &[u8]) -> Result<Self, FontError> {
        let face = match read_u32(data, 0)? {
            TAG_TTCF => {
                if read_u32(data, 8)? == 0 {
                    return Err(FontError::Malformed("empty font collection"));
                }
                let offset = read_u32(data, 12)? as usize;
                extract_face(data, offset)?
            }
            TAG_TRUE | TAG_TRUE_MAC => data.to_vec(),
            TAG_OTTO => return Err(FontError::Unsupported("PostScript outlines")),
            _ => return Err(FontError::Malformed("unknown sfnt version")),
        };

        if read_u32(&face, 0)? == TAG_OTTO {
            return Err(FontError::Unsupported("PostScript outlines"));
        }

        let tables = table_directory(&face, 0)?;
        if !tables.contains_key(b"glyf") {
            return Err(FontError::Unsupported("no TrueType outlines"));
        }

        let head = table(&face, &tables, b"head")?;
        let hhea = table(&face, &tables, b"hhea")?;
        let maxp = table(&face, &tables, b"maxp")?;
        let hmtx = table(&face, &tables, b"hmtx")?;
        let cmap = table(&face, &tables, b"cmap")?;

        let units_per_em = read_u16(head, 18)?;
        if units_per_em == 0 {
            return Err(FontError::Malformed("zero units per em"));
        }

        let bbox = [
            read_i16(head, 36)?,
            read_i16(head, 38)?,
            read_i16(head, 40)?,
            read_i16(head, 42)?,
        ];
        let ascent = read_i16(hhea, 4)?;
        let descent = read_i16(hhea, 6)?;
        let num_h_metrics = read_u16(hhea, 34)? as usize;
        let num_glyphs = read_u16(maxp, 4)? as usize;

        let advances = parse_hmtx(hmtx, num_h_metrics, num_glyphs)?;
        let cmap = parse_cmap(cmap)?;

        Ok(TrueTypeFont {
            name,
            data: face,
            units_per_em,
            bbox,
            ascent,
            descent,
            cmap,
            advances,
        })
    }

    /// Glyph for `c`, 0 (the missing glyph) when the font does not cover it.
    pub fn glyph(&self, c: char) -> u16 {
        self.cmap.get(&(c as u32)).copied().unwrap_or(0)
    }

    /// Advance width of `glyph` scaled to 1000 units per em.
    pub fn advance(&self, glyph: u16) -> f64 {
        let raw = self
            .advances
            .get(glyph as usize)
            .or_else(|| self.advances.last())
            .copied()
            .unwrap_or(0);

        self.scale(raw as i32)
    }

    pub fn bbox(&self) -> [f64; 4] {
        self.bbox.map(|v| self.scale(v as i32))
    }

    pub fn ascent(&self) -> f64 {
        self.scale(self.ascent as i32)
    }

    pub fn descent(&self) -> f64 {
        self.scale(self.descent as i32)
    }

    fn scale(&self, v: i32) -> f64 {
        (f64::from(v) * 1000.0 / f64::from(self.units_per_em)).round()
    }

    /// Font program holding only the outlines of `glyphs`, the missing glyph, and any
    /// glyphs they are composed of. Glyph ids are unchanged; other glyphs are left empty.
    /// Only the tables a PDF reader needs to draw glyphs by id are kept.
    pub fn subset<I>(&self, glyphs: I) -> Result<Vec<u8>, FontError>
    where
        I: IntoIterator<Item = u16>,
    {
        let tables = table_directory(&self.data, 0)?;
        let head = table(&self.data, &tables, b"head")?;
        let maxp = table(&self.data, &tables, b"maxp")?;
        let loca = table(&self.data, &tables, b"loca")?;
        let glyf = table(&self.data, &tables, b"glyf")?;

        let num_glyphs = read_u16(maxp, 4)? as usize;
        let long_offsets = read_i16(head, 50)? != 0;
        let offsets = parse_loca(loca, num_glyphs, long_offsets)?;
        let outline = |gid: usize| -> Result<&[u8], FontError> {
            glyf.get(offsets[gid]..offsets[gid + 1])
                .ok_or(FontError::Malformed("glyph outside of glyf table"))
        };

        let mut keep = BTreeSet::new();
        let mut pending: Vec<usize> = glyphs
            .into_iter()
            .map(usize::from)
            .chain([0])
            .filter(|g| *g < num_glyphs)
            .collect();
        while let Some(gid) = pending.pop() {
            if keep.insert(gid) {
                let components = composite_components(outline(gid)?)?;
                pending.extend(components.into_iter().filter(|c| *c < num_glyphs));
            }
        }

        let mut new_glyf = Vec::new();
        let mut new_loca = Vec::with_capacity((num_glyphs + 1) * 4);
        for gid in 0..num_glyphs {
            new_loca.extend_from_slice(&(new_glyf.len() as u32).to_be_bytes());
            if keep.contains(&gid) {
                new_glyf.extend_from_slice(outline(gid)?);
                while new_glyf.len() % 4 != 0 {
                    new_glyf.push(0);
                }
            }
        }
        new_loca.extend_from_slice(&(new_glyf.len() as u32).to_be_bytes());

        // Long loca offsets, and no whole-file checksum since the layout changed
        let mut new_head = head.to_vec();
        new_head[8..12].copy_from_slice(&[0; 4]);
        new_head[50..52].copy_from_slice(&1u16.to_be_bytes());

        let mut out_tables: Vec<([u8; 4], Vec<u8>)> = Vec::new();
        for tag in SUBSET_TABLES {
            let data = match tag {
                b"glyf" => mem::take(&mut new_glyf),
                b"loca" => mem::take(&mut new_loca),
                b"head" => mem::take(&mut new_head),
                _ => match tables.get(tag) {
                    Some(_) => table(&self.data, &tables, tag)?.to_vec(),
                    None => continue,
                },
            };
            out_tables.push((*tag, data));
        }

        Ok(assemble_font(&out_tables))
    }
}

/// Tables kept in a subset font, in tag order.
const SUBSET_TABLES: [&[u8; 4]; 9] = [
    b"cvt ", b"fpgm", b"glyf", b"head", b"hhea", b"hmtx", b"loca", b"maxp", b"prep",
];

fn parse_loca(loca: &[u8], num_glyphs: usize, long_offsets: bool) -> Result<Vec<usize>, FontError> {
    let offsets = (0..=num_glyphs)
        .map(|i| {
            if long_offsets {
                read_u32(loca, i * 4).map(|v| v as usize)
            } else {
                read_u16(loca, i * 2).map(|v| v as usize * 2)
            }
        })
        .collect::<Result<Vec<usize>, FontError>>()?;

    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(FontError::Malformed("glyph offsets out of order"));
    }

    Ok(offsets)
}

/// Glyph ids referenced by a composite glyph, empty for simple or empty glyphs.
fn composite_components(outline: &[u8]) -> Result<Vec<usize>, FontError> {
    const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
    const WE_HAVE_A_SCALE: u16 = 0x0008;
    const MORE_COMPONENTS: u16 = 0x0020;
    const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
    const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;

    if outline.is_empty() || read_i16(outline, 0)? >= 0 {
        return Ok(Vec::new());
    }

    let mut components = Vec::new();
    let mut pos = 10;
    loop {
        let flags = read_u16(outline, pos)?;
        components.push(read_u16(outline, pos + 2)? as usize);

        pos += 4;
        pos += if flags & ARG_1_AND_2_ARE_WORDS != 0 { 4 } else { 2 };
        if flags & WE_HAVE_A_SCALE != 0 {
            pos += 2;
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            pos += 4;
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            pos += 8;
        }

        if flags & MORE_COMPONENTS == 0 {
            return Ok(components);
        }
    }
}

fn checksum(data: &[u8]) -> u32 {
    data.chunks(4).fold(0u32, |sum, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum.wrapping_add(u32::from_be_bytes(word))
    })
}

/// Standalone font from tables given in tag order.
fn assemble_font(tables: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let num_tables = tables.len() as u16;
    let entry_selector = if num_tables == 0 { 0 } else { 15 - num_tables.leading_zeros() as u16 };
    let search_range = (1u16 << entry_selector) * 16;
    let range_shift = num_tables * 16 - search_range.min(num_tables * 16);

    let header_len = 12 + tables.len() * 16;
    let mut out = Vec::with_capacity(header_len);
    out.extend_from_slice(&TAG_TRUE.to_be_bytes());
    for v in [num_tables, search_range, entry_selector, range_shift] {
        out.extend_from_slice(&v.to_be_bytes());
    }

    let mut body = Vec::new();
    for (tag, data) in tables {
        out.extend_from_slice(tag);
        out.extend_from_slice(&checksum(data).to_be_bytes());
        out.extend_from_slice(&((header_len + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());

        body.extend_from_slice(data);
        while body.len() % 4 != 0 {
            body.push(0);
        }
    }

    out.extend_from_slice(&body);
    out
}

fn read_u16(data: &[u8], off: usize) -> Result<u16, FontError> {
    data.get(off..off + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(FontError::Malformed("unexpected end of data"))
}

fn read_i16(data: &[u8], off: usize) -> Result<i16, FontError> {
    read_u16(data, off).map(|v| v as i16)
}

fn read_u32(data: &[u8], off: usize) -> Result<u32, FontError> {
    data.get(off..off + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(FontError::Malformed("unexpected end of data"))
}

#[derive(Clone, Copy, Debug)]
struct TableRecord {
    checksum: u32,
    offset: usize,
    length: usize,
}

fn table_directory(data: &[u8], start: usize) -> Result<HashMap<[u8; 4], TableRecord>, FontError> {
    let num_tables = read_u16(data, start + 4)? as usize;
    let mut tables = HashMap::with_capacity(num_tables);

    for i in 0..num_tables {
        let rec = start + 12 + i * 16;
        let tag = data
            .get(rec..rec + 4)
            .ok_or(FontError::Malformed("truncated table directory"))?;
        tables.insert(
            [tag[0], tag[1], tag[2], tag[3]],
            TableRecord {
                checksum: read_u32(data, rec + 4)?,
                offset: read_u32(data, rec + 8)? as usize,
                length: read_u32(data, rec + 12)? as usize,
            },
        );
    }

    Ok(tables)
}

fn table<'a>(data: &'a [u8], tables: &HashMap<[u8; 4], TableRecord>, tag: &[u8; 4]) -> Result<&'a [u8], FontError> {
    let rec = tables.get(tag).ok_or(FontError::Malformed("missing required table"))?;
    data.get(rec.offset..rec.offset + rec.length)
        .ok_or(FontError::Malformed("table outside of font data"))
}

/// Copy a face out of a collection into a standalone font, rewriting table offsets.
fn extract_face(data: &[u8], start: usize) -> Result<Vec<u8>, FontError> {
    let version = read_u32(data, start)?;
    let tables = table_directory(data, start)?;
    let num_tables = tables.len();

    let mut records: Vec<([u8; 4], TableRecord)> = tables.into_iter().collect();
    records.sort_by_key(|(tag, _)| *tag);

    let header_len = 12 + num_tables * 16;
    let mut out = Vec::with_capacity(header_len);
    out.extend_from_slice(&version.to_be_bytes());
    // Table count and search fields are copied from the original face
    let search = data
        .get(start + 4..start + 12)
        .ok_or(FontError::Malformed("truncated offset table"))?;
    out.extend_from_slice(search);

    let mut body = Vec::new();
    for (tag, rec) in &records {
        let bytes = data
            .get(rec.offset..rec.offset + rec.length)
            .ok_or(FontError::Malformed("table outside of font data"))?;
        let offset = header_len + body.len();

        out.extend_from_slice(tag);
        out.extend_from_slice(&rec.checksum.to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(rec.length as u32).to_be_bytes());

        body.extend_from_slice(bytes);
        while body.len() % 4 != 0 {
            body.push(0);
        }
    }

    out.extend_from_slice(&body);
    Ok(out)
}

fn parse_hmtx(hmtx: &[u8], num_h_metrics: usize, num_glyphs: usize) -> Result<Vec<u16>, FontError> {
    if num_h_metrics == 0 {
        return Err(FontError::Malformed("no horizontal metrics"));
    }

    let mut advances = Vec::with_capacity(num_glyphs.max(num_h_metrics));
    for i in 0..num_h_metrics {
        advances.push(read_u16(hmtx, i * 4)?);
    }

    // Remaining glyphs share the last advance width
    let last = advances[num_h_metrics - 1];
    advances.resize(num_glyphs.max(num_h_metrics), last);
    Ok(advances)
}

fn parse_cmap(cmap: &[u8]) -> Result<HashMap<u32, u16>, FontError> {
    let num_tables = read_u16(cmap, 2)? as usize;
    let mut format4 = None;
    let mut format12 = None;

    for i in 0..num_tables {
        let rec = 4 + i * 8;
        let platform = read_u16(cmap, rec)?;
        let encoding = read_u16(cmap, rec + 2)?;
        let offset = read_u32(cmap, rec + 4)? as usize;
        let format = read_u16(cmap, offset)?;

        match (platform, encoding, format) {
            (3, 10, 12) | (0, _, 12) => format12 = format12.or(Some(offset)),
            (3, 1, 4) | (0, _, 4) => format4 = format4.or(Some(offset)),
            _ => {}
        }
    }

    if let Some(offset) = format12 {
        parse_format12(cmap, offset)
    } else if let Some(offset) = format4 {
        parse_format4(cmap, offset)
    } else {
        Err(FontError::Unsupported("no Unicode character map"))
    }
}

fn parse_format4(cmap: &[u8], offset: usize) -> Result<HashMap<u32, u16>, FontError> {
    let seg_count = read_u16(cmap, offset + 6)? as usize / 2;
    let ends = offset + 14;
    let starts = ends + seg_count * 2 + 2;
    let deltas = starts + seg_count * 2;
    let range_offsets = deltas + seg_count * 2;

    let mut map = HashMap::new();
    for seg in 0..seg_count {
        let end = read_u16(cmap, ends + seg * 2)?;
        let start = read_u16(cmap, starts + seg * 2)?;
        let delta = read_u16(cmap, deltas + seg * 2)?;
        let range_pos = range_offsets + seg * 2;
        let range_offset = read_u16(cmap, range_pos)? as usize;

        if start > end {
            continue;
        }

        for c in start..=end {
            if c == 0xFFFF {
                break;
            }

            let glyph = if range_offset == 0 {
                c.wrapping_add(delta)
            } else {
                let pos = range_pos + range_offset + (c - start) as usize * 2;
                match read_u16(cmap, pos)? {
                    0 => 0,
                    g => g.wrapping_add(delta),
                }
            };

            if glyph != 0 {
                map.insert(u32::from(c), glyph);
            }
        }
    }

    Ok(map)
}

fn parse_format12(cmap: &[u8], offset: usize) -> Result<HashMap<u32, u16>, FontError> {
    let groups = read_u32(cmap, offset + 12)? as usize;
    let mut map = HashMap::new();

    for g in 0..groups {
        let rec = offset + 16 + g * 12;
        let start = read_u32(cmap, rec)?;
        let end = read_u32(cmap, rec + 4)?.min(0x10FFFF);
        let glyph = read_u32(cmap, rec + 8)?;

        for (i, c) in (start..=end).enumerate() {
            let id = glyph as usize + i;
            if id > u16::MAX as usize {
                break;
            }
            map.insert(c, id as u16);
        }
    }

    Ok(map)
}
