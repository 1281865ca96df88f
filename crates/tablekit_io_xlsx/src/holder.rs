//! Workbook, sheet and table scopes plus the caches that make selection idempotent.

use std::collections::{BTreeMap, BTreeSet};

use rust_xlsxwriter::Workbook;

use crate::handler::WriteHandler;
use crate::spec::{
    EnumOutputTarget, SpecMergeRegion, SpecScopeOptions, SpecScopeResolved, SpecWorkbookOptions,
};
use crate::template::SpecTemplateBook;

/// Row cursor and merge bookkeeping of one engine worksheet.
///
/// The engine cannot read back written rows, so the last occupied row is
/// tracked here. Several sheet scopes may bind the same worksheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetTrack {
    /// Worksheet name.
    pub sheet_name: String,
    /// Last occupied row index.
    pub n_row_last: Option<usize>,
    /// Merge regions registered on this worksheet, in sheet coordinates.
    pub merges: Vec<SpecMergeRegion>,
}

impl SheetTrack {
    /// Next row where new content starts.
    pub fn n_row_next(&self) -> usize {
        self.n_row_last.map_or(0, |n_row| n_row + 1)
    }

    /// Record that `row_idx` is occupied.
    pub fn mark_row(&mut self, row_idx: usize) {
        self.n_row_last = Some(self.n_row_last.map_or(row_idx, |n_row| n_row.max(row_idx)));
    }
}

/// Workbook scope: output target, engine workbook and the sheet caches.
pub struct WorkbookHolder {
    pub(crate) options: SpecWorkbookOptions,
    pub(crate) output: Option<EnumOutputTarget>,
    pub(crate) workbook: Option<Workbook>,
    pub(crate) template: Option<SpecTemplateBook>,
    pub(crate) handlers: Vec<Box<dyn WriteHandler>>,
    pub(crate) if_initialized: bool,
    pub(crate) tracks: Vec<SheetTrack>,
    pub(crate) sheets: Vec<SheetHolder>,
    pub(crate) dict_sheet_by_no: BTreeMap<usize, usize>,
    pub(crate) dict_sheet_by_name: BTreeMap<String, usize>,
    /// Worksheets created by a sheet setup that failed; a retry under the same name rebinds them.
    pub(crate) set_sheet_orphaned: BTreeSet<usize>,
}

impl WorkbookHolder {
    pub(crate) fn new(
        options: SpecWorkbookOptions,
        output: EnumOutputTarget,
        handlers: Vec<Box<dyn WriteHandler>>,
    ) -> Self {
        Self {
            options,
            output: Some(output),
            workbook: None,
            template: None,
            handlers,
            if_initialized: false,
            tracks: Vec::new(),
            sheets: Vec::new(),
            dict_sheet_by_no: BTreeMap::new(),
            dict_sheet_by_name: BTreeMap::new(),
            set_sheet_orphaned: BTreeSet::new(),
        }
    }

    /// Workbook-level options.
    pub fn options(&self) -> &SpecWorkbookOptions {
        &self.options
    }

    /// Cached sheet scope for a number, then for a name.
    pub(crate) fn find_sheet(&self, sheet_no: Option<usize>, sheet_name: Option<&str>) -> Option<usize> {
        sheet_no
            .and_then(|n_no| self.dict_sheet_by_no.get(&n_no).copied())
            .or_else(|| sheet_name.and_then(|c_name| self.dict_sheet_by_name.get(c_name).copied()))
    }

    /// Row cursors of every worksheet, for [`Self::rollback_cursors`].
    pub(crate) fn snapshot_cursors(&self) -> Vec<Option<usize>> {
        self.tracks.iter().map(|track| track.n_row_last).collect()
    }

    /// Undo cursor moves of a failed setup.
    ///
    /// Worksheets created since the snapshot stay in the engine, so they are
    /// reset and marked orphaned. Merge records are kept: the engine already
    /// holds those regions.
    pub(crate) fn rollback_cursors(&mut self, l_rows_last: &[Option<usize>]) {
        for (idx_sheet, track) in self.tracks.iter_mut().enumerate() {
            match l_rows_last.get(idx_sheet) {
                Some(n_row_last) => track.n_row_last = *n_row_last,
                None => {
                    track.n_row_last = None;
                    self.set_sheet_orphaned.insert(idx_sheet);
                }
            }
        }
    }

    /// Register a sheet scope under each key it is reachable by.
    pub(crate) fn register_sheet(&mut self, idx_holder: usize, sheet_no: Option<usize>, sheet_name: Option<String>) {
        if let Some(n_no) = sheet_no {
            self.dict_sheet_by_no.insert(n_no, idx_holder);
        }
        if let Some(c_name) = sheet_name {
            self.dict_sheet_by_name.insert(c_name, idx_holder);
        }
    }
}

/// Sheet scope bound to one engine worksheet.
pub struct SheetHolder {
    pub(crate) sheet_no: usize,
    pub(crate) sheet_name: Option<String>,
    pub(crate) idx_sheet: Option<usize>,
    pub(crate) options: SpecScopeOptions,
    pub(crate) handlers: Vec<Box<dyn WriteHandler>>,
    pub(crate) if_new_initialization: bool,
    pub(crate) n_head_emitted: usize,
    pub(crate) tables: Vec<TableHolder>,
    pub(crate) dict_table_by_no: BTreeMap<usize, usize>,
}

impl SheetHolder {
    pub(crate) fn new(
        sheet_no: usize,
        sheet_name: Option<String>,
        options: SpecScopeOptions,
        handlers: Vec<Box<dyn WriteHandler>>,
    ) -> Self {
        Self {
            sheet_no,
            sheet_name,
            idx_sheet: None,
            options,
            handlers,
            if_new_initialization: true,
            n_head_emitted: 0,
            tables: Vec::new(),
            dict_table_by_no: BTreeMap::new(),
        }
    }

    /// Resolved sheet number.
    pub fn sheet_no(&self) -> usize {
        self.sheet_no
    }

    /// Sheet name when known.
    pub fn sheet_name(&self) -> Option<&str> {
        self.sheet_name.as_deref()
    }

    /// Engine worksheet index once bound.
    pub fn idx_sheet(&self) -> Option<usize> {
        self.idx_sheet
    }

    /// Effective options of this scope.
    pub fn options(&self) -> SpecScopeResolved {
        self.options.resolve()
    }

    /// Whether the last selection created this scope.
    pub fn if_new_initialization(&self) -> bool {
        self.if_new_initialization
    }

    /// Number of headers emitted for this scope.
    pub fn n_head_emitted(&self) -> usize {
        self.n_head_emitted
    }

    /// Number of table scopes created under this sheet.
    pub fn n_tables(&self) -> usize {
        self.tables.len()
    }
}

/// Table scope nested in a sheet scope.
pub struct TableHolder {
    pub(crate) table_no: usize,
    pub(crate) options: SpecScopeOptions,
    pub(crate) handlers: Vec<Box<dyn WriteHandler>>,
    pub(crate) if_new_initialization: bool,
    pub(crate) n_head_emitted: usize,
}

impl TableHolder {
    pub(crate) fn new(table_no: usize, options: SpecScopeOptions, handlers: Vec<Box<dyn WriteHandler>>) -> Self {
        Self {
            table_no,
            options,
            handlers,
            if_new_initialization: true,
            n_head_emitted: 0,
        }
    }

    /// Normalized table number.
    pub fn table_no(&self) -> usize {
        self.table_no
    }

    /// Effective options of this scope.
    pub fn options(&self) -> SpecScopeResolved {
        self.options.resolve()
    }

    /// Whether the last selection created this scope.
    pub fn if_new_initialization(&self) -> bool {
        self.if_new_initialization
    }

    /// Number of headers emitted for this scope.
    pub fn n_head_emitted(&self) -> usize {
        self.n_head_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_track_cursor_follows_highest_row() {
        let mut track = SheetTrack::default();
        assert_eq!(track.n_row_next(), 0);

        track.mark_row(3);
        track.mark_row(1);
        assert_eq!(track.n_row_next(), 4);
    }

    #[test]
    fn find_sheet_prefers_number_over_name() {
        let mut holder = WorkbookHolder::new(
            SpecWorkbookOptions::default(),
            EnumOutputTarget::from_writer(Vec::new()),
            Vec::new(),
        );
        holder.register_sheet(0, Some(0), Some("0".to_string()));
        holder.register_sheet(1, None, Some("Temp".to_string()));

        assert_eq!(holder.find_sheet(Some(0), Some("Temp")), Some(0));
        assert_eq!(holder.find_sheet(Some(9), Some("Temp")), Some(1));
        assert_eq!(holder.find_sheet(None, Some("Temp")), Some(1));
        assert_eq!(holder.find_sheet(Some(9), None), None);
    }

    #[test]
    fn rollback_restores_cursors_and_orphans_new_worksheets() {
        let mut holder = WorkbookHolder::new(
            SpecWorkbookOptions::default(),
            EnumOutputTarget::from_writer(Vec::new()),
            Vec::new(),
        );
        holder.tracks.push(SheetTrack {
            sheet_name: "Kept".to_string(),
            n_row_last: Some(2),
            ..Default::default()
        });
        let l_rows_last = holder.snapshot_cursors();

        holder.tracks[0].mark_row(5);
        holder.tracks.push(SheetTrack {
            sheet_name: "New".to_string(),
            n_row_last: Some(1),
            ..Default::default()
        });
        holder.rollback_cursors(&l_rows_last);

        assert_eq!(holder.tracks[0].n_row_next(), 3);
        assert_eq!(holder.tracks[1].n_row_next(), 0);
        assert!(!holder.set_sheet_orphaned.contains(&0));
        assert!(holder.set_sheet_orphaned.contains(&1));
    }
}
