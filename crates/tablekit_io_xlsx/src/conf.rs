//! XLSX write-session constants and default preset factories.

use crate::spec::{SpecCellFormat, SpecScopeOptions, SpecWorkbookOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Sheet number used when a sheet is selected without number and name.
pub const N_SHEET_NO_DEFAULT: usize = 0;
/// Table number used when a table is selected without a positive number.
pub const N_TABLE_NO_DEFAULT: usize = 0;

/// Default number format for date-time cells written as numbers.
pub const C_DATE_NUM_FORMAT_DEFAULT: &str = "yyyy-mm-dd hh:mm:ss";

/// Hash iterations for password key derivation.
pub const N_ENCRYPTION_SPIN_COUNT: u32 = 50_000;
/// AES key size in bytes (AES-128).
pub const N_ENCRYPTION_KEY_SIZE: usize = 16;
/// Cryptographic provider name recorded in `EncryptionInfo`.
pub const C_ENCRYPTION_CSP_NAME: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";

/// Prefix of private temporary files used by stream encryption.
pub const C_TEMP_FILE_PREFIX: &str = "tablekit-xlsx-";
/// Suffix of private temporary files used by stream encryption.
pub const C_TEMP_FILE_SUFFIX: &str = ".xlsx";

/// Build default scope options applied at workbook level.
pub fn derive_default_scope_options() -> SpecScopeOptions {
    SpecScopeOptions {
        need_head: Some(true),
        automatic_merge_head: Some(true),
        relative_head_row_index: Some(0),
        keep_missing_values: Some(false),
        date_num_format: Some(C_DATE_NUM_FORMAT_DEFAULT.to_string()),
        ..Default::default()
    }
}

/// Build default workbook options.
pub fn derive_default_workbook_options() -> SpecWorkbookOptions {
    SpecWorkbookOptions::default()
}

/// Build default header cell format used by [`crate::handler::HeaderStyleHandler`].
pub fn derive_default_header_format() -> SpecCellFormat {
    SpecCellFormat {
        font_name: Some("Times New Roman".to_string()),
        font_size: Some(11),
        bold: Some(true),
        border: Some(1),
        align: Some("center".to_string()),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    }
}
