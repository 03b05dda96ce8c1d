//! Pdfium-backed [`DocumentProvider`](pdfscroll_core::DocumentProvider)
//! plus the byte fetching shared by every engine.

mod fetch;
#[cfg(feature = "pdf")]
mod pdfium;

pub use fetch::fetch_source;
#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumProvider, LIBRARY_PATH_ENV};
