//! `tablekit_io_xlsx` v1:
//! Scoped XLSX write sessions.
//!
//! Architecture:
//! - `conf`     : constants and default presets
//! - `spec`     : specs/models/options
//! - `util`     : pure helper functions
//! - `error`    : error taxonomy and the finalize error slot
//! - `cache`    : thread-scoped format caches
//! - `holder`   : workbook/sheet/table scopes and their caches
//! - `handler`  : lifecycle hooks
//! - `head`     : header layout and emission
//! - `context`  : write context state machine
//! - `finish`   : exactly-once finalize and encryption
//! - `crypto`   : password encryption container
//! - `template` : template loading and placeholder fill
//! - `writer`   : row-level write surface
pub mod cache;
pub mod conf;
pub mod context;
pub mod crypto;
pub mod error;
pub mod finish;
pub mod handler;
pub mod head;
pub mod holder;
pub mod spec;
pub mod template;
pub mod util;
pub mod writer;

pub use cache::{count_thread_local_cache, remove_thread_local_cache};
pub use conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
    derive_default_header_format, derive_default_workbook_options,
};
pub use context::{EnumScopeRef, ScopeView, WriteContext};
pub use crypto::{decrypt_package_from_ole, encrypt_package_to_ole, is_ole_container};
pub use error::{EnumSheetLookup, ErrorSlot, Result, XlsxWriteError};
pub use handler::{HeaderStyleHandler, SpecCellEvent, SpecRowEvent, SpecSheetEvent, WriteHandler};
pub use head::{derive_head_spec, plan_head_merges};
pub use holder::{SheetHolder, SheetTrack, TableHolder};
pub use spec::{
    EnumCellValue, EnumEncryptionPath, EnumExcelType, EnumOutputTarget, EnumScopeKind,
    EnumTemplateSource, EnumWriteType, SpecCellFormat, SpecFinishReport, SpecHeadSpec,
    SpecMergeRegion, SpecScopeOptions, SpecScopeResolved, SpecWorkbookOptions,
    SpecWriteSheet, SpecWriteTable, SpecXlsxValuePolicy,
};
pub use writer::XlsxWriter;
