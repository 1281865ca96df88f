//! Shared write-session specification models.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::conf::{C_DATE_NUM_FORMAT_DEFAULT, derive_default_scope_options};
use crate::handler::WriteHandler;

////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Cell format specification consumed by styling handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Number format code.
    pub num_format: Option<String>,
    /// Background fill color.
    pub bg_color: Option<String>,
    /// Font color.
    pub font_color: Option<String>,
}

impl SpecCellFormat {
    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            text_wrap: other.text_wrap.or(self.text_wrap),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
        }
    }
}

/// Normalized cell value during conversion/write pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// Date-time value.
    DateTime(NaiveDateTime),
}

impl From<&str> for EnumCellValue {
    fn from(value: &str) -> Self {
        EnumCellValue::String(value.to_string())
    }
}

impl From<String> for EnumCellValue {
    fn from(value: String) -> Self {
        EnumCellValue::String(value)
    }
}

impl From<f64> for EnumCellValue {
    fn from(value: f64) -> Self {
        EnumCellValue::Number(value)
    }
}

impl From<i64> for EnumCellValue {
    fn from(value: i64) -> Self {
        EnumCellValue::Number(value as f64)
    }
}

impl From<bool> for EnumCellValue {
    fn from(value: bool) -> Self {
        EnumCellValue::Boolean(value)
    }
}

impl From<NaiveDateTime> for EnumCellValue {
    fn from(value: NaiveDateTime) -> Self {
        EnumCellValue::DateTime(value)
    }
}

/// Value conversion policy for missing/NaN/Inf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecXlsxValuePolicy {
    /// Replacement text for missing value when keep-missing is enabled.
    pub missing_value_str: String,
    /// Replacement text for NaN.
    pub nan_str: String,
    /// Replacement text for positive infinity.
    pub posinf_str: String,
    /// Replacement text for negative infinity.
    pub neginf_str: String,
}

impl Default for SpecXlsxValuePolicy {
    fn default() -> Self {
        Self {
            missing_value_str: "NA".to_string(),
            nan_str: "NaN".to_string(),
            posinf_str: "Inf".to_string(),
            neginf_str: "-Inf".to_string(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorkbookSpecification

/// Container format of the produced workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumExcelType {
    /// Zip-based Office Open XML workbook.
    #[default]
    Xlsx,
    /// Legacy binary workbook.
    Xls,
}

/// Kind of write operation that selects a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumWriteType {
    /// Append new data; first selection emits the header.
    #[default]
    Add,
    /// Fill placeholders of a template; no header is emitted.
    Fill,
}

/// Where the finished workbook is written.
pub enum EnumOutputTarget {
    /// Write to a file path.
    File(PathBuf),
    /// Write to a caller-provided byte stream.
    Stream(Box<dyn Write>),
}

impl EnumOutputTarget {
    /// Build a stream target from any writer.
    pub fn from_writer(writer: impl Write + 'static) -> Self {
        EnumOutputTarget::Stream(Box::new(writer))
    }

    /// Whether the target is a byte stream.
    pub fn is_stream(&self) -> bool {
        matches!(self, EnumOutputTarget::Stream(_))
    }
}

impl fmt::Debug for EnumOutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumOutputTarget::File(path) => f.debug_tuple("File").field(path).finish(),
            EnumOutputTarget::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Source of a pre-existing workbook used as template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumTemplateSource {
    /// Read template from a file.
    File(PathBuf),
    /// Use in-memory template bytes.
    Bytes(Vec<u8>),
}

/// Inheritable scope options. `None` means "inherit from the parent scope".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecScopeOptions {
    /// Emit a header on first selection.
    pub need_head: Option<bool>,
    /// Register merge regions for repeated header labels.
    pub automatic_merge_head: Option<bool>,
    /// Rows skipped between the cursor and the header.
    pub relative_head_row_index: Option<usize>,
    /// Header labels by column, one label per header row.
    pub head: Option<Vec<Vec<String>>>,
    /// Keep missing/NaN/Inf as text instead of blank.
    pub keep_missing_values: Option<bool>,
    /// Number format code applied to numeric body cells.
    pub number_format: Option<String>,
    /// Number format code applied to date-time body cells.
    pub date_num_format: Option<String>,
    /// Render date-time body cells as text using this strftime pattern.
    pub date_text_pattern: Option<String>,
}

impl SpecScopeOptions {
    /// Merge two option sets with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecScopeOptions) -> SpecScopeOptions {
        SpecScopeOptions {
            need_head: other.need_head.or(self.need_head),
            automatic_merge_head: other.automatic_merge_head.or(self.automatic_merge_head),
            relative_head_row_index: other
                .relative_head_row_index
                .or(self.relative_head_row_index),
            head: other.head.clone().or_else(|| self.head.clone()),
            keep_missing_values: other.keep_missing_values.or(self.keep_missing_values),
            number_format: other
                .number_format
                .clone()
                .or_else(|| self.number_format.clone()),
            date_num_format: other
                .date_num_format
                .clone()
                .or_else(|| self.date_num_format.clone()),
            date_text_pattern: other
                .date_text_pattern
                .clone()
                .or_else(|| self.date_text_pattern.clone()),
        }
    }

    /// Resolve the nearest defined value of every option, falling back to defaults.
    pub fn resolve(&self) -> SpecScopeResolved {
        let cfg = derive_default_scope_options().merge(self);
        SpecScopeResolved {
            need_head: cfg.need_head.unwrap_or(true),
            automatic_merge_head: cfg.automatic_merge_head.unwrap_or(true),
            relative_head_row_index: cfg.relative_head_row_index.unwrap_or(0),
            head: cfg.head,
            keep_missing_values: cfg.keep_missing_values.unwrap_or(false),
            number_format: cfg.number_format,
            date_num_format: cfg
                .date_num_format
                .unwrap_or_else(|| C_DATE_NUM_FORMAT_DEFAULT.to_string()),
            date_text_pattern: cfg.date_text_pattern,
        }
    }
}

/// Fully resolved options of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecScopeResolved {
    /// Emit a header on first selection.
    pub need_head: bool,
    /// Register merge regions for repeated header labels.
    pub automatic_merge_head: bool,
    /// Rows skipped between the cursor and the header.
    pub relative_head_row_index: usize,
    /// Header labels by column.
    pub head: Option<Vec<Vec<String>>>,
    /// Keep missing/NaN/Inf as text instead of blank.
    pub keep_missing_values: bool,
    /// Number format code applied to numeric body cells.
    pub number_format: Option<String>,
    /// Number format code applied to date-time body cells.
    pub date_num_format: String,
    /// Strftime pattern for date-time text rendering.
    pub date_text_pattern: Option<String>,
}

impl SpecScopeResolved {
    /// Whether a header is configured at all.
    pub fn has_head(&self) -> bool {
        self.head.as_ref().is_some_and(|l_cols| !l_cols.is_empty())
    }
}

/// Workbook-wide options for one write session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecWorkbookOptions {
    /// Container format.
    pub excel_type: EnumExcelType,
    /// Password used to encrypt the finished workbook.
    pub password: Option<String>,
    /// Pre-existing workbook whose sheets are carried into the output.
    pub template: Option<EnumTemplateSource>,
    /// Close the output stream at finish.
    pub if_auto_close_stream: bool,
    /// Write the workbook even when the session finishes after a failure.
    pub if_write_excel_on_exception: bool,
    /// Directory for private temporary files; system default when `None`.
    pub dir_temp: Option<PathBuf>,
    /// Value conversion policy.
    pub value_policy: SpecXlsxValuePolicy,
    /// Workbook-level scope options inherited by sheets and tables.
    pub scope: SpecScopeOptions,
}

impl Default for SpecWorkbookOptions {
    fn default() -> Self {
        Self {
            excel_type: EnumExcelType::Xlsx,
            password: None,
            template: None,
            if_auto_close_stream: true,
            if_write_excel_on_exception: false,
            dir_temp: None,
            value_policy: SpecXlsxValuePolicy::default(),
            scope: SpecScopeOptions::default(),
        }
    }
}

impl SpecWorkbookOptions {
    /// Password when set and non-empty.
    pub fn password_effective(&self) -> Option<&str> {
        self.password.as_deref().filter(|c_pw| !c_pw.is_empty())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TargetSpecification

/// Sheet identity plus sheet-level options and handlers.
#[derive(Default)]
pub struct SpecWriteSheet {
    /// Zero-based sheet number.
    pub sheet_no: Option<usize>,
    /// Sheet name, used for lookup only when number is absent.
    pub sheet_name: Option<String>,
    /// Sheet-level scope options.
    pub options: SpecScopeOptions,
    /// Handlers owned by this sheet scope.
    pub handlers: Vec<Box<dyn WriteHandler>>,
}

impl SpecWriteSheet {
    /// Select a sheet by number.
    pub fn from_no(sheet_no: usize) -> Self {
        Self {
            sheet_no: Some(sheet_no),
            ..Default::default()
        }
    }

    /// Select a sheet by name.
    pub fn from_name(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: Some(sheet_name.into()),
            ..Default::default()
        }
    }

    /// Replace sheet-level options.
    pub fn with_options(mut self, options: SpecScopeOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a sheet-level handler.
    pub fn with_handler(mut self, handler: impl WriteHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Name when set and non-empty.
    pub fn sheet_name_effective(&self) -> Option<&str> {
        self.sheet_name.as_deref().filter(|c_name| !c_name.is_empty())
    }
}

impl fmt::Debug for SpecWriteSheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecWriteSheet")
            .field("sheet_no", &self.sheet_no)
            .field("sheet_name", &self.sheet_name)
            .field("options", &self.options)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Table identity plus table-level options and handlers.
#[derive(Default)]
pub struct SpecWriteTable {
    /// Table number; unset or non-positive means 0.
    pub table_no: Option<i64>,
    /// Table-level scope options.
    pub options: SpecScopeOptions,
    /// Handlers owned by this table scope.
    pub handlers: Vec<Box<dyn WriteHandler>>,
}

impl SpecWriteTable {
    /// Select a table by number.
    pub fn from_no(table_no: i64) -> Self {
        Self {
            table_no: Some(table_no),
            ..Default::default()
        }
    }

    /// Replace table-level options.
    pub fn with_options(mut self, options: SpecScopeOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a table-level handler.
    pub fn with_handler(mut self, handler: impl WriteHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Normalized table number.
    pub fn table_no_effective(&self) -> usize {
        self.table_no
            .filter(|n_no| *n_no > 0)
            .and_then(|n_no| usize::try_from(n_no).ok())
            .unwrap_or(crate::conf::N_TABLE_NO_DEFAULT)
    }
}

impl fmt::Debug for SpecWriteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecWriteTable")
            .field("table_no", &self.table_no)
            .field("options", &self.options)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region HeadSpecification

/// Merge region in header-local or sheet coordinates (inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpecMergeRegion {
    /// First row index.
    pub row_first: usize,
    /// Last row index.
    pub row_last: usize,
    /// First column index.
    pub col_first: usize,
    /// Last column index.
    pub col_last: usize,
}

impl SpecMergeRegion {
    /// Shift rows by `n_rows`, keeping columns.
    pub fn translate_rows(&self, n_rows: usize) -> SpecMergeRegion {
        SpecMergeRegion {
            row_first: self.row_first + n_rows,
            row_last: self.row_last + n_rows,
            ..*self
        }
    }

    /// Whether the region covers more than one cell.
    pub fn is_multi_cell(&self) -> bool {
        self.row_last > self.row_first || self.col_last > self.col_first
    }
}

/// Header layout derived from the active scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecHeadSpec {
    /// Number of header rows.
    pub n_rows: usize,
    /// Labels by column index, exactly `n_rows` per column.
    pub labels_by_col: BTreeMap<usize, Vec<String>>,
    /// Merge regions in header-local coordinates.
    pub merges: Vec<SpecMergeRegion>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Kind of scope currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumScopeKind {
    /// Workbook scope.
    Workbook,
    /// Sheet scope.
    Sheet,
    /// Table scope.
    Table,
}

/// Encryption path taken by finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumEncryptionPath {
    /// No encryption.
    #[default]
    None,
    /// Encrypted through a private temporary file into the output stream.
    Stream,
    /// Output file encrypted in place.
    File,
}

/// Outcome of one finish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecFinishReport {
    /// Whether this call ran the finalize sequence.
    pub if_performed: bool,
    /// Whether the workbook was serialized to the output target.
    pub if_written: bool,
    /// Encryption path taken.
    pub rule_encryption: EnumEncryptionPath,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_options_merge_right_side_wins() {
        let parent = SpecScopeOptions {
            need_head: Some(false),
            relative_head_row_index: Some(2),
            ..Default::default()
        };
        let child = SpecScopeOptions {
            need_head: Some(true),
            ..Default::default()
        };

        let merged = parent.merge(&child);
        assert_eq!(merged.need_head, Some(true));
        assert_eq!(merged.relative_head_row_index, Some(2));
        assert_eq!(merged.automatic_merge_head, None);
    }

    #[test]
    fn scope_options_resolve_fills_defaults() {
        let resolved = SpecScopeOptions::default().resolve();
        assert!(resolved.need_head);
        assert!(resolved.automatic_merge_head);
        assert_eq!(resolved.relative_head_row_index, 0);
        assert_eq!(resolved.date_num_format, C_DATE_NUM_FORMAT_DEFAULT);
        assert!(!resolved.has_head());
    }

    #[test]
    fn table_no_non_positive_becomes_zero() {
        assert_eq!(SpecWriteTable::default().table_no_effective(), 0);
        assert_eq!(SpecWriteTable::from_no(-3).table_no_effective(), 0);
        assert_eq!(SpecWriteTable::from_no(0).table_no_effective(), 0);
        assert_eq!(SpecWriteTable::from_no(4).table_no_effective(), 4);
    }

    #[test]
    fn merge_region_translate_keeps_columns() {
        let region = SpecMergeRegion {
            row_first: 0,
            row_last: 1,
            col_first: 2,
            col_last: 3,
        };
        let moved = region.translate_rows(5);
        assert_eq!((moved.row_first, moved.row_last), (5, 6));
        assert_eq!((moved.col_first, moved.col_last), (2, 3));
    }

    #[test]
    fn empty_password_is_not_effective() {
        let options = SpecWorkbookOptions {
            password: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(options.password_effective(), None);
    }
}
