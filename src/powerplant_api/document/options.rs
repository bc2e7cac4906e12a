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

//! Rendering options accepted by the document endpoints.
//!
//! Every field is optional and falls back to a default chosen by the output format, so
//! most fields are kept as `Option` here and resolved by the writers. Keys that are not
//! listed are ignored.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::PathBuf;

/// Horizontal alignment of a paragraph or table cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

impl Align {
    /// Parse an alignment name case-insensitively. Unknown names are left aligned.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "CENTER" | "CENTRE" => Self::Center,
            "RIGHT" => Self::Right,
            "JUSTIFY" => Self::Justify,
            _ => Self::Left,
        }
    }
}

impl<'de> Deserialize<'de> for Align {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Align::parse(&s))
    }
}

/// Page margins in centimeters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Margins {
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub top: Option<f64>,
    pub bottom: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TableOptions {
    pub data: Vec<Vec<Value>>,
    pub style: Option<String>,
    pub font_size: Option<f64>,
    pub align: Option<Align>,
}

/// Formatting for a single paragraph when documents are built from a paragraph list.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ParagraphOptions {
    pub content: String,
    pub style: Option<String>,
    pub level: Option<u8>,
    pub numbered: bool,
    pub bulleted: bool,
    pub bold: Option<bool>,
    pub italic: bool,
    pub underline: bool,
    pub color: Option<String>,
    pub font: Option<String>,
    pub font_size: Option<f64>,
    pub align: Option<Align>,
    pub line_spacing: Option<f64>,
    pub leading: Option<f64>,
    pub space_before: Option<f64>,
    pub space_after: Option<f64>,
    pub left_indent: Option<f64>,
    pub first_line_indent: Option<f64>,
}

impl ParagraphOptions {
    pub fn is_heading(&self) -> bool {
        self.style
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("heading"))
            .unwrap_or(false)
    }
}

/// Document level options shared by the Word and PDF writers.
///
/// Fonts, sizes and spacing are in points. `margins` is in centimeters and applies to
/// both formats; the flat `marginLeft` style keys take precedence for PDF output.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub title: Option<String>,
    pub title_font: Option<String>,
    pub title_size: Option<f64>,
    pub font: Option<String>,
    pub font_size: Option<f64>,
    pub line_spacing: Option<f64>,
    pub leading: Option<f64>,
    pub space_before: Option<f64>,
    pub space_after: Option<f64>,
    pub align: Option<Align>,
    pub margins: Option<Margins>,
    pub margin_left: Option<f64>,
    pub margin_right: Option<f64>,
    pub margin_top: Option<f64>,
    pub margin_bottom: Option<f64>,
    pub page_size: Option<String>,
    pub font_path: Option<PathBuf>,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub page_break: bool,
    pub table: Option<TableOptions>,
    pub paragraphs: Option<Vec<ParagraphOptions>>,
}

impl RenderOptions {
    pub const DEFAULT_FONT_SIZE: f64 = 12.0;
    pub const DEFAULT_TITLE_SIZE: f64 = 18.0;
    pub const DEFAULT_LINE_SPACING: f64 = 1.5;
    pub const DEFAULT_SPACE_BEFORE: f64 = 0.0;
    pub const DEFAULT_SPACE_AFTER: f64 = 6.0;

    pub fn font_size(&self) -> f64 {
        self.font_size.unwrap_or(Self::DEFAULT_FONT_SIZE)
    }

    pub fn title_size(&self) -> f64 {
        self.title_size.unwrap_or(Self::DEFAULT_TITLE_SIZE)
    }

    /// Margins in centimeters as `(left, right, top, bottom)`, using the flat keys first
    /// when `prefer_flat` is set, then `margins`, then `defaults`.
    pub fn resolve_margins(&self, defaults: (f64, f64, f64, f64), prefer_flat: bool) -> (f64, f64, f64, f64) {
        let nested = self.margins.clone().unwrap_or_default();
        let pick = |flat: Option<f64>, nested: Option<f64>, default: f64| {
            if prefer_flat {
                flat.or(nested).unwrap_or(default)
            } else {
                nested.or(flat).unwrap_or(default)
            }
        };

        (
            pick(self.margin_left, nested.left, defaults.0),
            pick(self.margin_right, nested.right, defaults.1),
            pick(self.margin_top, nested.top, defaults.2),
            pick(self.margin_bottom, nested.bottom, defaults.3),
        )
    }
}
