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

//! Word and PDF report generation.
//!
//! Content and options are first turned into a format independent `layout::Document`,
//! which is then written by the `docx` or `pdf` writer into an in-memory buffer.

pub mod docx;
pub mod font;
pub mod layout;
pub mod options;
pub mod pdf;

pub use options::RenderOptions;

use prometheus_client::encoding::EncodeLabelValue;
use std::error;
use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Format {
    Word,
    Pdf,
}

impl Format {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Word => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn default_filename(self) -> &'static str {
        match self {
            Self::Word => "document.docx",
            Self::Pdf => "document.pdf",
        }
    }
}

#[derive(Debug)]
pub enum DocumentError {
    Xml(String),
    Archive(zip::result::ZipError),
    Io(io::Error),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml(e) => write!(f, "unable to write document XML: {}", e),
            Self::Archive(e) => write!(f, "unable to write document archive: {}", e),
            Self::Io(e) => write!(f, "unable to write document: {}", e),
        }
    }
}

impl error::Error for DocumentError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Archive(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<zip::result::ZipError> for DocumentError {
    fn from(e: zip::result::ZipError) -> Self {
        DocumentError::Archive(e)
    }
}

impl From<io::Error> for DocumentError {
    fn from(e: io::Error) -> Self {
        DocumentError::Io(e)
    }
}

/// Renders documents, trying `fallback_fonts` in order for PDF output when the
/// requested font cannot be used.
#[derive(Clone, Debug, Default)]
pub struct DocumentRenderer {
    fallback_fonts: Vec<PathBuf>,
}

impl DocumentRenderer {
    pub fn new(fallback_fonts: Vec<PathBuf>) -> Self {
        DocumentRenderer { fallback_fonts }
    }

    pub fn render(&self, format: Format, content: &str, options: &RenderOptions) -> Result<Vec<u8>, DocumentError> {
        let doc = layout::build(content, options);
        tracing::debug!(message = "rendering document", format = ?format, blocks = doc.blocks.len());

        match format {
            Format::Word => docx::write(&doc, options),
            Format::Pdf => pdf::write(&doc, options, &self.fallback_fonts),
        }
    }
}
