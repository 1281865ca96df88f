//! Lifecycle hooks fired by the write session.
//!
//! Handlers are registered per scope. A normal notification runs the
//! workbook handlers, then the active sheet's, then the active table's.
//! Replay notifications (a new sheet or table catching up on workbook and
//! sheet creation) run only the new scope's own handlers.

use rust_xlsxwriter::{Format, Workbook};

use crate::conf::derive_default_header_format;
use crate::error::Result;
use crate::spec::{EnumCellValue, SpecCellFormat};
use crate::util::{cast_col_num, cast_row_num, derive_rust_xlsx_format};

/// Sheet identity passed to sheet hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetEvent {
    /// Resolved sheet number.
    pub sheet_no: usize,
    /// Sheet name when known.
    pub sheet_name: Option<String>,
    /// Engine worksheet index; `None` before the sheet exists.
    pub idx_sheet: Option<usize>,
}

/// Row position passed to row hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecRowEvent {
    /// Engine worksheet index.
    pub idx_sheet: usize,
    /// Absolute row index.
    pub row_idx: usize,
    /// Row index relative to the header or the written batch.
    pub row_idx_relative: usize,
    /// Whether the row belongs to a header.
    pub if_head: bool,
}

/// Cell position and value passed to cell hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecCellEvent {
    /// Engine worksheet index.
    pub idx_sheet: usize,
    /// Absolute row index.
    pub row_idx: usize,
    /// Column index.
    pub col_idx: usize,
    /// Row index relative to the header or the written batch.
    pub row_idx_relative: usize,
    /// Whether the cell belongs to a header.
    pub if_head: bool,
    /// Value written to the cell.
    pub value: EnumCellValue,
}

/// Extension point notified at the named lifecycle points of a write session.
///
/// Every hook defaults to a no-op. An `Err` raised during sheet, table or
/// header setup fails that setup; an `Err` from [`Self::after_workbook_dispose`]
/// is reported by finish.
pub trait WriteHandler {
    fn before_workbook_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_workbook_create(&mut self, _workbook: &mut Workbook) -> Result<()> {
        Ok(())
    }

    fn before_sheet_create(&mut self, _event: &SpecSheetEvent) -> Result<()> {
        Ok(())
    }

    fn after_sheet_create(&mut self, _workbook: &mut Workbook, _event: &SpecSheetEvent) -> Result<()> {
        Ok(())
    }

    fn before_row_create(&mut self, _event: &SpecRowEvent) -> Result<()> {
        Ok(())
    }

    fn after_row_create(&mut self, _workbook: &mut Workbook, _event: &SpecRowEvent) -> Result<()> {
        Ok(())
    }

    fn after_row_dispose(&mut self, _workbook: &mut Workbook, _event: &SpecRowEvent) -> Result<()> {
        Ok(())
    }

    fn before_cell_create(&mut self, _event: &SpecCellEvent) -> Result<()> {
        Ok(())
    }

    fn after_cell_create(&mut self, _workbook: &mut Workbook, _event: &SpecCellEvent) -> Result<()> {
        Ok(())
    }

    fn after_cell_dispose(&mut self, _workbook: &mut Workbook, _event: &SpecCellEvent) -> Result<()> {
        Ok(())
    }

    fn after_workbook_dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Applies one cell format to every header cell.
pub struct HeaderStyleHandler {
    format: Format,
}

impl HeaderStyleHandler {
    /// Build from a cell format specification.
    pub fn new(spec: &SpecCellFormat) -> Self {
        Self {
            format: derive_rust_xlsx_format(spec),
        }
    }
}

impl Default for HeaderStyleHandler {
    fn default() -> Self {
        Self::new(&derive_default_header_format())
    }
}

impl WriteHandler for HeaderStyleHandler {
    fn after_cell_dispose(&mut self, workbook: &mut Workbook, event: &SpecCellEvent) -> Result<()> {
        if !event.if_head {
            return Ok(());
        }
        let worksheet = workbook.worksheet_from_index(event.idx_sheet)?;
        let n_row = cast_row_num(event.row_idx)?;
        let n_col = cast_col_num(event.col_idx)?;
        match &event.value {
            EnumCellValue::String(label) if !label.is_empty() => {
                worksheet.write_string_with_format(n_row, n_col, label, &self.format)?;
            }
            _ => {
                worksheet.write_blank(n_row, n_col, &self.format)?;
            }
        }
        Ok(())
    }
}
