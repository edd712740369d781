//! # costsheet-xlsx
//!
//! Excel backends for costsheet.
//!
//! This crate provides:
//! - The timesheet report layout engine (`ExcelRenderer`)
//! - The xlsx-backed roster store (`XlsxRosterStore`)
//! - Manager-based project color coding
//! - Splicing the period sheet into an existing report document
//!
//! ## Example
//!
//! ```rust,ignore
//! use costsheet_core::{Renderer, RosterStore};
//! use costsheet_xlsx::{ExcelRenderer, XlsxRosterStore};
//!
//! let roster = XlsxRosterStore::new("ProjectConfig.xlsx").load()?;
//!
//! let renderer = ExcelRenderer::new("Report.xlsx").currency_format("#,##0 \"$\"");
//! let summary = renderer.render(&report)?;
//! println!("wrote sheet {}", summary.sheet_name);
//! ```

pub mod color;
pub mod document;
pub mod excel;
pub mod roster;
pub mod style;
mod xml;

pub use color::{assign_colors, shade_color, HexColor, PROJECT_PALETTE};
pub use document::ExistingDocument;
pub use excel::{sheet_name, ExcelRenderer, LayoutContext, RenderSummary, SkippedEffort};
pub use roster::XlsxRosterStore;
pub use style::DEFAULT_CURRENCY_FORMAT;
