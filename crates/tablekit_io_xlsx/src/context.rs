//! Write context: the state machine tracking the current workbook, sheet and table scope.

use std::io::Write;

use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::cache::{derive_num_format, format_date};
use crate::conf::N_SHEET_NO_DEFAULT;
use crate::error::{EnumSheetLookup, Result, XlsxWriteError};
use crate::handler::{SpecCellEvent, SpecRowEvent, SpecSheetEvent, WriteHandler};
use crate::holder::{SheetHolder, SheetTrack, TableHolder, WorkbookHolder};
use crate::spec::{
    EnumCellValue, EnumExcelType, EnumOutputTarget, EnumScopeKind, EnumWriteType, SpecMergeRegion,
    SpecScopeResolved, SpecWorkbookOptions, SpecWriteSheet, SpecWriteTable,
};
use crate::template::{load_template, materialize_template};
use crate::util::{cast_col_num, cast_row_num, validate_sheet_name};

/// Pointer to the active scope: holder indices into the workbook arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumScopeRef {
    /// Workbook scope.
    Workbook,
    /// Sheet scope at this holder index.
    Sheet(usize),
    /// Table scope at `(sheet holder index, table holder index)`.
    Table(usize, usize),
}

/// Read-only view of the active scope.
pub struct ScopeView<'a> {
    holder: &'a WorkbookHolder,
    scope: EnumScopeRef,
}

impl<'a> ScopeView<'a> {
    /// Kind of the active scope.
    pub fn kind(&self) -> EnumScopeKind {
        match self.scope {
            EnumScopeRef::Workbook => EnumScopeKind::Workbook,
            EnumScopeRef::Sheet(_) => EnumScopeKind::Sheet,
            EnumScopeRef::Table(_, _) => EnumScopeKind::Table,
        }
    }

    /// Active sheet scope, also when a table is active.
    pub fn sheet(&self) -> Option<&'a SheetHolder> {
        match self.scope {
            EnumScopeRef::Workbook => None,
            EnumScopeRef::Sheet(idx) | EnumScopeRef::Table(idx, _) => self.holder.sheets.get(idx),
        }
    }

    /// Active table scope.
    pub fn table(&self) -> Option<&'a TableHolder> {
        match self.scope {
            EnumScopeRef::Table(idx, idx_table) => self
                .holder
                .sheets
                .get(idx)
                .and_then(|sheet| sheet.tables.get(idx_table)),
            _ => None,
        }
    }

    /// Options of the active scope, resolved through its parents.
    pub fn options(&self) -> SpecScopeResolved {
        if let Some(table) = self.table() {
            return table.options();
        }
        if let Some(sheet) = self.sheet() {
            return sheet.options();
        }
        self.holder.options.scope.resolve()
    }

    /// Whether the active scope was created by the last selection.
    pub fn if_new_initialization(&self) -> bool {
        if let Some(table) = self.table() {
            return table.if_new_initialization();
        }
        self.sheet().is_none_or(SheetHolder::if_new_initialization)
    }

    /// Engine worksheet index of the active sheet.
    pub fn idx_sheet(&self) -> Option<usize> {
        self.sheet().and_then(SheetHolder::idx_sheet)
    }

    /// Row cursor and merges of the active worksheet.
    pub fn track(&self) -> Option<&'a SheetTrack> {
        self.idx_sheet().and_then(|idx| self.holder.tracks.get(idx))
    }
}

/// Stateful write session over one workbook target.
pub struct WriteContext {
    pub(crate) holder: WorkbookHolder,
    pub(crate) scope_current: EnumScopeRef,
    pub(crate) if_finished: bool,
}

impl WriteContext {
    /// Open a session: validate the target, build the workbook and load the template.
    ///
    /// Workbook handlers see `before_workbook_create` and `after_workbook_create`.
    pub fn open(
        output: EnumOutputTarget,
        options: SpecWorkbookOptions,
        handlers: Vec<Box<dyn WriteHandler>>,
    ) -> Result<Self> {
        validate_open(&output, &options)?;
        log::debug!("Begin to initialize write context");

        let mut ctx = Self {
            holder: WorkbookHolder::new(options, output, handlers),
            scope_current: EnumScopeRef::Workbook,
            if_finished: false,
        };
        ctx.init_workbook(false)
            .map_err(|err| err.into_generate("workbook"))?;
        ctx.holder.if_initialized = true;

        log::debug!("Initialization of write context complete");
        Ok(ctx)
    }

    fn init_workbook(&mut self, if_run_own: bool) -> Result<()> {
        self.notify(if_run_own, |handler, _| handler.before_workbook_create())?;

        let mut workbook = Workbook::new();
        if let Some(source) = &self.holder.options.template {
            let book = load_template(source)?;
            self.holder.tracks = materialize_template(&book, &mut workbook)?;
            self.holder.template = Some(book);
        }
        self.holder.workbook = Some(workbook);

        self.notify_with_workbook(if_run_own, |handler, workbook| {
            handler.after_workbook_create(workbook)
        })
    }

    fn replay_workbook_create(&mut self) -> Result<()> {
        self.notify(true, |handler, _| handler.before_workbook_create())?;
        self.notify_with_workbook(true, |handler, workbook| {
            handler.after_workbook_create(workbook)
        })
    }

    ////////////////////////////////////////////////////////////////////////////
    // #region SheetSelection

    /// Make `sheet` the active scope, creating it on first selection.
    ///
    /// A repeated identity is a cache hit: the scope is reported as not newly
    /// initialized and nothing is created or emitted again. On first selection
    /// with [`EnumWriteType::Add`] the header is emitted.
    pub fn select_sheet(&mut self, sheet: SpecWriteSheet, write_type: EnumWriteType) -> Result<()> {
        self.ensure_open()?;
        if self.select_sheet_from_cache(&sheet) {
            return Ok(());
        }
        self.init_sheet(sheet, write_type)
    }

    fn select_sheet_from_cache(&mut self, sheet: &SpecWriteSheet) -> bool {
        let c_name = sheet.sheet_name_effective();
        let sheet_no = derive_sheet_key(sheet.sheet_no, c_name);
        let Some(idx_holder) = self.holder.find_sheet(sheet_no, c_name) else {
            return false;
        };

        let holder_sheet = &mut self.holder.sheets[idx_holder];
        holder_sheet.if_new_initialization = false;
        log::debug!(
            "Sheet no {} name {:?} already exists",
            holder_sheet.sheet_no,
            holder_sheet.sheet_name
        );
        self.scope_current = EnumScopeRef::Sheet(idx_holder);
        log::debug!("Current configuration is sheet {idx_holder}");
        true
    }

    fn init_sheet(&mut self, sheet: SpecWriteSheet, write_type: EnumWriteType) -> Result<()> {
        let c_name = sheet.sheet_name_effective().map(str::to_string);
        let sheet_no_given = sheet.sheet_no;
        let sheet_no_resolved = sheet_no_given.unwrap_or(N_SHEET_NO_DEFAULT);
        let sheet_no_key = derive_sheet_key(sheet_no_given, c_name.as_deref());

        let options = self.holder.options.scope.merge(&sheet.options);
        let idx_holder = self.holder.sheets.len();
        self.holder.sheets.push(SheetHolder::new(
            sheet_no_resolved,
            c_name.clone(),
            options,
            sheet.handlers,
        ));
        self.scope_current = EnumScopeRef::Sheet(idx_holder);
        log::debug!("Current configuration is sheet {idx_holder}");

        let l_rows_last = self.holder.snapshot_cursors();
        if let Err(err) = self.setup_sheet(idx_holder, sheet_no_given, write_type) {
            self.holder.sheets.truncate(idx_holder);
            self.holder.rollback_cursors(&l_rows_last);
            self.scope_current = EnumScopeRef::Workbook;
            return Err(err.into_generate(format!("sheet {sheet_no_resolved}")));
        }

        let c_name_bound = self.holder.sheets[idx_holder].sheet_name.clone();
        self.holder
            .register_sheet(idx_holder, sheet_no_key, c_name_bound.or(c_name));
        Ok(())
    }

    fn setup_sheet(
        &mut self,
        idx_holder: usize,
        sheet_no_given: Option<usize>,
        write_type: EnumWriteType,
    ) -> Result<()> {
        self.replay_workbook_create()?;

        let event = self.derive_sheet_event(idx_holder);
        self.notify(false, |handler, _| handler.before_sheet_create(&event))?;

        let if_add = write_type == EnumWriteType::Add;
        let rule_lookup = if sheet_no_given.is_some() && if_add && self.holder.template.is_none() {
            EnumSheetLookup::NotFound
        } else {
            self.locate_sheet(sheet_no_given, event.sheet_name.as_deref())
        };
        let idx_sheet = match rule_lookup {
            EnumSheetLookup::Found(idx_sheet) => idx_sheet,
            EnumSheetLookup::NotFound => self.create_sheet(idx_holder)?,
        };

        self.holder.set_sheet_orphaned.remove(&idx_sheet);
        let holder_sheet = &mut self.holder.sheets[idx_holder];
        holder_sheet.idx_sheet = Some(idx_sheet);
        if holder_sheet.sheet_name.is_none() {
            holder_sheet.sheet_name = self
                .holder
                .tracks
                .get(idx_sheet)
                .map(|track| track.sheet_name.clone());
        }

        let event = self.derive_sheet_event(idx_holder);
        self.notify_with_workbook(false, |handler, workbook| {
            handler.after_sheet_create(workbook, &event)
        })?;

        if if_add {
            self.init_head()?;
        }
        Ok(())
    }

    /// Locate an existing engine worksheet by number, or by name when no number is given.
    fn locate_sheet(&self, sheet_no: Option<usize>, sheet_name: Option<&str>) -> EnumSheetLookup {
        let idx_found = match (sheet_no, sheet_name) {
            (Some(n_no), _) => (n_no < self.holder.tracks.len()).then_some(n_no),
            (None, Some(c_name)) => self
                .holder
                .tracks
                .iter()
                .position(|track| track.sheet_name == c_name),
            (None, None) => None,
        };
        match idx_found {
            Some(idx_sheet) => {
                log::debug!("Bound existing worksheet {idx_sheet}");
                EnumSheetLookup::Found(idx_sheet)
            }
            None => {
                log::debug!("No existing worksheet for {sheet_no:?} {sheet_name:?}, creating one");
                EnumSheetLookup::NotFound
            }
        }
    }

    fn create_sheet(&mut self, idx_holder: usize) -> Result<usize> {
        let holder_sheet = &self.holder.sheets[idx_holder];
        let c_name = holder_sheet
            .sheet_name
            .clone()
            .unwrap_or_else(|| holder_sheet.sheet_no.to_string());

        if let Some(idx_sheet) = self.holder.tracks.iter().position(|track| track.sheet_name == c_name) {
            if !self.holder.set_sheet_orphaned.contains(&idx_sheet) {
                return Err(XlsxWriteError::Config(format!(
                    "worksheet name '{c_name}' is already used"
                )));
            }
            log::debug!("Rebinding worksheet {idx_sheet} left by a failed setup");
            self.holder.sheets[idx_holder].sheet_name = Some(c_name);
            return Ok(idx_sheet);
        }

        validate_sheet_name(&c_name)?;
        let mut worksheet = Worksheet::new();
        worksheet.set_name(&c_name)?;
        self.workbook_required()?.push_worksheet(worksheet);

        let idx_sheet = self.holder.tracks.len();
        self.holder.tracks.push(SheetTrack {
            sheet_name: c_name.clone(),
            ..Default::default()
        });
        self.holder.sheets[idx_holder].sheet_name = Some(c_name);
        Ok(idx_sheet)
    }

    fn derive_sheet_event(&self, idx_holder: usize) -> SpecSheetEvent {
        let holder_sheet = &self.holder.sheets[idx_holder];
        SpecSheetEvent {
            sheet_no: holder_sheet.sheet_no,
            sheet_name: holder_sheet.sheet_name.clone(),
            idx_sheet: holder_sheet.idx_sheet,
        }
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region TableSelection

    /// Make `table` the active scope inside the current sheet.
    ///
    /// `None` keeps the current scope. A new table replays workbook and
    /// sheet creation for its own handlers before emitting its header.
    pub fn select_table(&mut self, table: Option<SpecWriteTable>) -> Result<()> {
        self.ensure_open()?;
        let Some(table) = table else {
            return Ok(());
        };
        let idx_holder = match self.scope_current {
            EnumScopeRef::Sheet(idx) | EnumScopeRef::Table(idx, _) => idx,
            EnumScopeRef::Workbook => {
                return Err(XlsxWriteError::Config(
                    "select a sheet before selecting a table".to_string(),
                ));
            }
        };

        let table_no = table.table_no_effective();
        let holder_sheet = &mut self.holder.sheets[idx_holder];
        if let Some(idx_table) = holder_sheet.dict_table_by_no.get(&table_no).copied() {
            holder_sheet.tables[idx_table].if_new_initialization = false;
            log::debug!("Table {table_no} already exists");
            self.scope_current = EnumScopeRef::Table(idx_holder, idx_table);
            return Ok(());
        }

        let options = holder_sheet.options.merge(&table.options);
        let idx_table = holder_sheet.tables.len();
        holder_sheet
            .tables
            .push(TableHolder::new(table_no, options, table.handlers));
        self.scope_current = EnumScopeRef::Table(idx_holder, idx_table);
        log::debug!("Current configuration is table {table_no}");

        let l_rows_last = self.holder.snapshot_cursors();
        if let Err(err) = self.setup_table(idx_holder) {
            self.holder.sheets[idx_holder].tables.truncate(idx_table);
            self.holder.rollback_cursors(&l_rows_last);
            self.scope_current = EnumScopeRef::Sheet(idx_holder);
            return Err(err.into_generate(format!("table {table_no}")));
        }

        self.holder.sheets[idx_holder]
            .dict_table_by_no
            .insert(table_no, idx_table);
        Ok(())
    }

    fn setup_table(&mut self, idx_holder: usize) -> Result<()> {
        self.replay_workbook_create()?;

        let event = self.derive_sheet_event(idx_holder);
        self.notify(true, |handler, _| handler.before_sheet_create(&event))?;
        self.notify_with_workbook(true, |handler, workbook| {
            handler.after_sheet_create(workbook, &event)
        })?;

        self.init_head()
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Accessors

    /// View of the active scope.
    pub fn current_scope(&self) -> ScopeView<'_> {
        ScopeView {
            holder: &self.holder,
            scope: self.scope_current,
        }
    }

    /// Pointer to the active scope.
    pub fn scope_ref(&self) -> EnumScopeRef {
        self.scope_current
    }

    /// Workbook-level options.
    pub fn workbook_options(&self) -> &SpecWorkbookOptions {
        &self.holder.options
    }

    /// Engine workbook, until finish releases it.
    pub fn workbook_mut(&mut self) -> Option<&mut Workbook> {
        self.holder.workbook.as_mut()
    }

    /// Number of sheet scopes created so far.
    pub fn n_sheet_scopes(&self) -> usize {
        self.holder.sheets.len()
    }

    /// Number of engine worksheets.
    pub fn n_worksheets(&self) -> usize {
        self.holder.tracks.len()
    }

    /// Row cursor and merges of an engine worksheet.
    pub fn sheet_track(&self, idx_sheet: usize) -> Option<&SheetTrack> {
        self.holder.tracks.get(idx_sheet)
    }

    /// Whether finish already ran.
    pub fn is_finished(&self) -> bool {
        self.if_finished
    }

    /// Output stream kept open after finish when auto-close is disabled.
    pub fn take_output_stream(&mut self) -> Option<Box<dyn Write>> {
        match self.holder.output.take() {
            Some(EnumOutputTarget::Stream(stream)) => Some(stream),
            other => {
                self.holder.output = other;
                None
            }
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.if_finished {
            return Err(XlsxWriteError::Config(
                "write context already finished".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn current_idx_sheet(&self) -> Result<usize> {
        self.current_scope()
            .idx_sheet()
            .ok_or_else(|| XlsxWriteError::Config("no sheet selected".to_string()))
    }

    pub(crate) fn track(&self, idx_sheet: usize) -> Result<&SheetTrack> {
        self.holder
            .tracks
            .get(idx_sheet)
            .ok_or_else(|| XlsxWriteError::Config(format!("unknown worksheet {idx_sheet}")))
    }

    fn workbook_required(&mut self) -> Result<&mut Workbook> {
        self.holder
            .workbook
            .as_mut()
            .ok_or_else(|| XlsxWriteError::Config("workbook already released".to_string()))
    }

    pub(crate) fn mark_head_emitted(&mut self) {
        match self.scope_current {
            EnumScopeRef::Workbook => {}
            EnumScopeRef::Sheet(idx) => self.holder.sheets[idx].n_head_emitted += 1,
            EnumScopeRef::Table(idx, idx_table) => {
                self.holder.sheets[idx].tables[idx_table].n_head_emitted += 1
            }
        }
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Emission

    /// Register a merge region on an engine worksheet.
    pub(crate) fn add_merge_region(&mut self, idx_sheet: usize, region: SpecMergeRegion) -> Result<()> {
        // A retried header re-emits regions the engine already holds.
        if self
            .holder
            .tracks
            .get(idx_sheet)
            .is_some_and(|track| track.merges.contains(&region))
        {
            return Ok(());
        }
        let workbook = self.workbook_required()?;
        workbook.worksheet_from_index(idx_sheet)?.merge_range(
            cast_row_num(region.row_first)?,
            cast_col_num(region.col_first)?,
            cast_row_num(region.row_last)?,
            cast_col_num(region.col_last)?,
            "",
            &Format::new(),
        )?;
        if let Some(track) = self.holder.tracks.get_mut(idx_sheet) {
            track.merges.push(region);
        }
        Ok(())
    }

    /// Create a row: before/after row create hooks around cursor bookkeeping.
    pub(crate) fn emit_row_begin(&mut self, event: &SpecRowEvent) -> Result<()> {
        cast_row_num(event.row_idx)?;
        self.notify(false, |handler, _| handler.before_row_create(event))?;
        if let Some(track) = self.holder.tracks.get_mut(event.idx_sheet) {
            track.mark_row(event.row_idx);
        }
        self.notify_with_workbook(false, |handler, workbook| {
            handler.after_row_create(workbook, event)
        })
    }

    /// Finish a row: after row dispose hook.
    pub(crate) fn emit_row_end(&mut self, event: &SpecRowEvent) -> Result<()> {
        self.notify_with_workbook(false, |handler, workbook| {
            handler.after_row_dispose(workbook, event)
        })
    }

    /// Write one cell with its create and dispose hooks.
    pub(crate) fn emit_cell(&mut self, event: SpecCellEvent, options: &SpecScopeResolved) -> Result<()> {
        self.notify(false, |handler, _| handler.before_cell_create(&event))?;
        self.notify_with_workbook(false, |handler, workbook| {
            handler.after_cell_create(workbook, &event)
        })?;
        // Value lands after create hooks so it wins over any placeholder they write.
        let workbook = self.workbook_required()?;
        write_cell_value(
            workbook,
            event.idx_sheet,
            event.row_idx,
            event.col_idx,
            &event.value,
            options,
        )?;
        self.notify_with_workbook(false, |handler, workbook| {
            handler.after_cell_dispose(workbook, &event)
        })
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Notification

    /// Run `hook` on the handlers of the active chain, or of the active scope only.
    pub(crate) fn notify<F>(&mut self, if_run_own: bool, mut hook: F) -> Result<()>
    where
        F: FnMut(&mut dyn WriteHandler, Option<&mut Workbook>) -> Result<()>,
    {
        let WorkbookHolder {
            workbook,
            handlers,
            sheets,
            ..
        } = &mut self.holder;

        let mut l_groups: Vec<&mut Vec<Box<dyn WriteHandler>>> = Vec::with_capacity(3);
        match self.scope_current {
            EnumScopeRef::Workbook => l_groups.push(handlers),
            EnumScopeRef::Sheet(idx) => {
                if !if_run_own {
                    l_groups.push(handlers);
                }
                l_groups.push(&mut sheets[idx].handlers);
            }
            EnumScopeRef::Table(idx, idx_table) => {
                let holder_sheet = &mut sheets[idx];
                if !if_run_own {
                    l_groups.push(handlers);
                    l_groups.push(&mut holder_sheet.handlers);
                }
                l_groups.push(&mut holder_sheet.tables[idx_table].handlers);
            }
        }

        for l_handlers in l_groups {
            for handler in l_handlers.iter_mut() {
                hook(handler.as_mut(), workbook.as_mut())?;
            }
        }
        Ok(())
    }

    /// Like [`Self::notify`] for hooks that need the workbook; skipped once it is released.
    pub(crate) fn notify_with_workbook<F>(&mut self, if_run_own: bool, mut hook: F) -> Result<()>
    where
        F: FnMut(&mut dyn WriteHandler, &mut Workbook) -> Result<()>,
    {
        self.notify(if_run_own, |handler, workbook| match workbook {
            Some(workbook) => hook(handler, workbook),
            None => Ok(()),
        })
    }

    // #endregion
}

/// Cache key by number: a selection without number and name means sheet 0.
fn derive_sheet_key(sheet_no: Option<usize>, sheet_name: Option<&str>) -> Option<usize> {
    match (sheet_no, sheet_name) {
        (None, None) => Some(N_SHEET_NO_DEFAULT),
        (sheet_no, _) => sheet_no,
    }
}

fn validate_open(output: &EnumOutputTarget, options: &SpecWorkbookOptions) -> Result<()> {
    if options.excel_type == EnumExcelType::Xls {
        return Err(XlsxWriteError::Config(
            "legacy binary workbooks cannot be written".to_string(),
        ));
    }
    if let EnumOutputTarget::File(path) = output
        && path.as_os_str().is_empty()
    {
        return Err(XlsxWriteError::Config("output file path is empty".to_string()));
    }
    Ok(())
}

/// Write a typed value through the engine, applying the scope's number and date formats.
fn write_cell_value(
    workbook: &mut Workbook,
    idx_sheet: usize,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    options: &SpecScopeResolved,
) -> Result<()> {
    let worksheet = workbook.worksheet_from_index(idx_sheet)?;
    let n_row = cast_row_num(row_idx)?;
    let n_col = cast_col_num(col_idx)?;
    match value {
        EnumCellValue::None => {}
        EnumCellValue::String(val) => {
            worksheet.write_string(n_row, n_col, val)?;
        }
        EnumCellValue::Number(val) => match &options.number_format {
            Some(code) => {
                worksheet.write_number_with_format(n_row, n_col, *val, &derive_num_format(code))?;
            }
            None => {
                worksheet.write_number(n_row, n_col, *val)?;
            }
        },
        EnumCellValue::Boolean(val) => {
            worksheet.write_boolean(n_row, n_col, *val)?;
        }
        EnumCellValue::DateTime(val) => match &options.date_text_pattern {
            Some(pattern) => {
                worksheet.write_string(n_row, n_col, format_date(val, pattern)?)?;
            }
            None => {
                worksheet.write_datetime_with_format(
                    n_row,
                    n_col,
                    val,
                    &derive_num_format(&options.date_num_format),
                )?;
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::conf::derive_default_workbook_options;
    use crate::handler::tests::{FailOnceRowHandler, RecordingHandler};
    use crate::spec::{EnumTemplateSource, SpecScopeOptions};

    fn open_ctx(options: SpecWorkbookOptions) -> WriteContext {
        WriteContext::open(EnumOutputTarget::from_writer(Vec::new()), options, Vec::new()).unwrap()
    }

    fn head_options(l_cols: &[&[&str]]) -> SpecScopeOptions {
        SpecScopeOptions {
            head: Some(
                l_cols
                    .iter()
                    .map(|l_col| l_col.iter().map(|c| c.to_string()).collect())
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn open_rejects_legacy_binary() {
        let options = SpecWorkbookOptions {
            excel_type: EnumExcelType::Xls,
            ..Default::default()
        };
        let result = WriteContext::open(EnumOutputTarget::from_writer(Vec::new()), options, Vec::new());
        assert!(matches!(result, Err(XlsxWriteError::Config(_))));
    }

    #[test]
    fn open_rejects_empty_file_path() {
        let result = WriteContext::open(
            EnumOutputTarget::File(std::path::PathBuf::new()),
            SpecWorkbookOptions::default(),
            Vec::new(),
        );
        assert!(matches!(result, Err(XlsxWriteError::Config(_))));
    }

    #[test]
    fn select_same_sheet_twice_hits_cache() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        let sheet = || SpecWriteSheet::from_no(0).with_options(head_options(&[&["Name"], &["Age"]]));

        ctx.select_sheet(sheet(), EnumWriteType::Add).unwrap();
        assert!(ctx.current_scope().if_new_initialization());
        assert_eq!(ctx.current_scope().track().unwrap().n_row_next(), 1);

        ctx.select_sheet(sheet(), EnumWriteType::Add).unwrap();
        let view = ctx.current_scope();
        assert!(!view.if_new_initialization());
        assert_eq!(view.sheet().unwrap().n_head_emitted(), 1);
        assert_eq!(view.track().unwrap().n_row_next(), 1);
        assert_eq!(ctx.n_worksheets(), 1);
        assert_eq!(ctx.n_sheet_scopes(), 1);
    }

    #[test]
    fn select_without_identity_defaults_to_sheet_zero() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::default(), EnumWriteType::Add)
            .unwrap();
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();

        let view = ctx.current_scope();
        assert!(!view.if_new_initialization());
        assert_eq!(view.sheet().unwrap().sheet_name(), Some("0"));
    }

    #[test]
    fn select_by_name_only_resolves_number_zero() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::from_name("Temp"), EnumWriteType::Add)
            .unwrap();
        let holder_sheet = ctx.current_scope().sheet().unwrap();
        assert_eq!(holder_sheet.sheet_no(), 0);
        assert_eq!(holder_sheet.sheet_name(), Some("Temp"));

        ctx.select_sheet(SpecWriteSheet::from_name("Temp"), EnumWriteType::Add)
            .unwrap();
        assert!(!ctx.current_scope().if_new_initialization());
        assert_eq!(ctx.n_worksheets(), 1);
    }

    #[test]
    fn sheet_reachable_by_number_and_generated_name() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::from_no(2), EnumWriteType::Add)
            .unwrap();
        ctx.select_sheet(SpecWriteSheet::from_name("2"), EnumWriteType::Add)
            .unwrap();

        assert!(!ctx.current_scope().if_new_initialization());
        assert_eq!(ctx.n_sheet_scopes(), 1);
    }

    #[test]
    fn table_selection_is_idempotent_per_number() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();

        ctx.select_table(Some(SpecWriteTable::from_no(1))).unwrap();
        assert_eq!(ctx.scope_ref(), EnumScopeRef::Table(0, 0));
        assert!(ctx.current_scope().if_new_initialization());

        ctx.select_table(Some(SpecWriteTable::from_no(1))).unwrap();
        assert_eq!(ctx.scope_ref(), EnumScopeRef::Table(0, 0));
        assert!(!ctx.current_scope().if_new_initialization());

        ctx.select_table(Some(SpecWriteTable::from_no(2))).unwrap();
        assert_eq!(ctx.scope_ref(), EnumScopeRef::Table(0, 1));

        ctx.select_table(Some(SpecWriteTable::from_no(-5))).unwrap();
        assert_eq!(ctx.current_scope().table().unwrap().table_no(), 0);
        assert_eq!(ctx.current_scope().sheet().unwrap().n_tables(), 3);
    }

    #[test]
    fn select_table_none_keeps_scope() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();
        ctx.select_table(None).unwrap();
        assert_eq!(ctx.scope_ref(), EnumScopeRef::Sheet(0));
    }

    #[test]
    fn select_table_before_sheet_is_config_error() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        assert!(matches!(
            ctx.select_table(Some(SpecWriteTable::default())),
            Err(XlsxWriteError::Config(_))
        ));
    }

    #[test]
    fn reselecting_sheet_clears_table() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();
        ctx.select_table(Some(SpecWriteTable::from_no(1))).unwrap();
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();
        assert_eq!(ctx.current_scope().kind(), EnumScopeKind::Sheet);
        assert!(ctx.current_scope().table().is_none());
    }

    #[test]
    fn options_inherit_through_scopes() {
        let options = SpecWorkbookOptions {
            scope: SpecScopeOptions {
                relative_head_row_index: Some(3),
                number_format: Some("0.00".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut ctx = open_ctx(options);
        ctx.select_sheet(
            SpecWriteSheet::from_no(0).with_options(SpecScopeOptions {
                need_head: Some(false),
                ..Default::default()
            }),
            EnumWriteType::Add,
        )
        .unwrap();
        ctx.select_table(Some(SpecWriteTable::from_no(1).with_options(SpecScopeOptions {
            number_format: Some("0".to_string()),
            ..Default::default()
        })))
        .unwrap();

        let resolved = ctx.current_scope().options();
        assert!(!resolved.need_head);
        assert_eq!(resolved.relative_head_row_index, 3);
        assert_eq!(resolved.number_format.as_deref(), Some("0"));
    }

    #[test]
    fn header_occupies_offset_rows_and_translates_merges() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        let options = SpecScopeOptions {
            relative_head_row_index: Some(2),
            ..head_options(&[&["Info", "Name"], &["Info", "Age"]])
        };
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();
        ctx.select_table(Some(SpecWriteTable::from_no(1).with_options(options)))
            .unwrap();

        let track = ctx.current_scope().track().unwrap();
        assert_eq!(track.n_row_last, Some(3));
        assert_eq!(
            track.merges,
            vec![SpecMergeRegion {
                row_first: 2,
                row_last: 2,
                col_first: 0,
                col_last: 1
            }]
        );
    }

    #[test]
    fn fill_selection_skips_header() {
        let mut ctx = open_ctx(SpecWorkbookOptions {
            scope: head_options(&[&["A"]]),
            ..Default::default()
        });
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Fill)
            .unwrap();
        assert_eq!(ctx.current_scope().track().unwrap().n_row_last, None);
        assert_eq!(ctx.current_scope().sheet().unwrap().n_head_emitted(), 0);
    }

    #[test]
    fn automatic_merge_disabled_registers_no_regions() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        let options = SpecScopeOptions {
            automatic_merge_head: Some(false),
            ..head_options(&[&["Info", "Name"], &["Info", "Age"]])
        };
        ctx.select_sheet(SpecWriteSheet::from_no(0).with_options(options), EnumWriteType::Add)
            .unwrap();
        let track = ctx.current_scope().track().unwrap();
        assert!(track.merges.is_empty());
        assert_eq!(track.n_row_next(), 2);
    }

    #[test]
    fn new_sheet_replays_workbook_create_for_own_handlers() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = WriteContext::open(
            EnumOutputTarget::from_writer(Vec::new()),
            SpecWorkbookOptions::default(),
            vec![Box::new(RecordingHandler::new("wb", &log))],
        )
        .unwrap();
        ctx.select_sheet(
            SpecWriteSheet::from_no(0)
                .with_options(head_options(&[&["A"]]))
                .with_handler(RecordingHandler::new("sh", &log)),
            EnumWriteType::Add,
        )
        .unwrap();

        assert_eq!(
            log.borrow().as_slice(),
            [
                "wb:before_workbook_create",
                "wb:after_workbook_create",
                "sh:before_workbook_create",
                "sh:after_workbook_create",
                "wb:before_sheet_create",
                "sh:before_sheet_create",
                "wb:after_sheet_create",
                "sh:after_sheet_create",
                "wb:before_row_create:0",
                "sh:before_row_create:0",
                "wb:after_row_create:0",
                "sh:after_row_create:0",
                "wb:before_cell_create:0:0",
                "sh:before_cell_create:0:0",
                "wb:after_cell_create:0:0",
                "sh:after_cell_create:0:0",
                "wb:after_cell_dispose:0:0:String(\"A\")",
                "sh:after_cell_dispose:0:0:String(\"A\")",
                "wb:after_row_dispose:0",
                "sh:after_row_dispose:0",
            ]
        );
    }

    #[test]
    fn new_table_replays_sheet_create_for_own_handlers() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = WriteContext::open(
            EnumOutputTarget::from_writer(Vec::new()),
            SpecWorkbookOptions::default(),
            vec![Box::new(RecordingHandler::new("wb", &log))],
        )
        .unwrap();
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();
        log.borrow_mut().clear();

        ctx.select_table(Some(
            SpecWriteTable::from_no(1).with_handler(RecordingHandler::new("tb", &log)),
        ))
        .unwrap();
        assert_eq!(
            log.borrow().as_slice(),
            [
                "tb:before_workbook_create",
                "tb:after_workbook_create",
                "tb:before_sheet_create",
                "tb:after_sheet_create",
            ]
        );

        log.borrow_mut().clear();
        ctx.select_table(Some(SpecWriteTable::from_no(1))).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn select_after_finish_is_config_error() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.finish(false).unwrap();
        assert!(matches!(
            ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add),
            Err(XlsxWriteError::Config(_))
        ));
    }

    #[test]
    fn invalid_sheet_name_surfaces_generation_failure() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        let err = ctx
            .select_sheet(SpecWriteSheet::from_name("bad/name"), EnumWriteType::Add)
            .unwrap_err();
        assert!(matches!(err, XlsxWriteError::Generate { .. }));
        assert_eq!(ctx.scope_ref(), EnumScopeRef::Workbook);
        assert_eq!(ctx.n_sheet_scopes(), 0);
        assert_eq!(ctx.n_worksheets(), 0);

        ctx.select_sheet(SpecWriteSheet::from_name("good"), EnumWriteType::Add)
            .unwrap();
        assert_eq!(ctx.current_scope().idx_sheet(), Some(0));
    }

    #[test]
    fn colliding_generated_name_is_rejected() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::from_name("1"), EnumWriteType::Add)
            .unwrap();
        let err = ctx
            .select_sheet(SpecWriteSheet::from_no(1), EnumWriteType::Add)
            .unwrap_err();
        match err {
            XlsxWriteError::Generate { source, .. } => {
                assert!(matches!(*source, XlsxWriteError::Config(_)))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failed_header_setup_can_be_retried() {
        let mut ctx = WriteContext::open(
            EnumOutputTarget::from_writer(Vec::new()),
            derive_default_workbook_options(),
            vec![Box::new(FailOnceRowHandler {
                row_idx: 1,
                if_failed: false,
            })],
        )
        .unwrap();
        let derive_sheet = || {
            SpecWriteSheet::from_no(0).with_options(head_options(&[&["Group", "A"], &["Group", "B"]]))
        };

        let err = ctx.select_sheet(derive_sheet(), EnumWriteType::Add).unwrap_err();
        assert!(matches!(err, XlsxWriteError::Generate { .. }));
        assert_eq!(ctx.n_sheet_scopes(), 0);
        assert_eq!(ctx.n_worksheets(), 1);
        assert_eq!(ctx.sheet_track(0).unwrap().n_row_last, None);

        ctx.select_sheet(derive_sheet(), EnumWriteType::Add).unwrap();
        assert_eq!(ctx.n_worksheets(), 1);
        assert_eq!(ctx.current_scope().idx_sheet(), Some(0));
        let track = ctx.sheet_track(0).unwrap();
        assert_eq!(track.n_row_next(), 2);
        assert_eq!(track.merges.len(), 1);
        ctx.finish(false).unwrap();
    }

    #[test]
    fn failed_table_setup_restores_sheet_cursor() {
        let mut ctx = WriteContext::open(
            EnumOutputTarget::from_writer(Vec::new()),
            derive_default_workbook_options(),
            vec![Box::new(FailOnceRowHandler {
                row_idx: 2,
                if_failed: false,
            })],
        )
        .unwrap();
        ctx.select_sheet(
            SpecWriteSheet::from_no(0).with_options(head_options(&[&["A"]])),
            EnumWriteType::Add,
        )
        .unwrap();

        let table = || SpecWriteTable::from_no(1).with_options(head_options(&[&["T", "U"]]));
        assert!(ctx.select_table(Some(table())).is_err());
        assert_eq!(ctx.sheet_track(0).unwrap().n_row_next(), 1);

        ctx.select_table(Some(table())).unwrap();
        assert_eq!(ctx.sheet_track(0).unwrap().n_row_next(), 3);
    }

    #[test]
    fn template_lookup_miss_creates_sheet() {
        let mut template = Workbook::new();
        template.add_worksheet().set_name("Report").unwrap();
        let options = SpecWorkbookOptions {
            template: Some(EnumTemplateSource::Bytes(template.save_to_buffer().unwrap())),
            ..Default::default()
        };
        let mut ctx = open_ctx(options);

        ctx.select_sheet(SpecWriteSheet::from_no(3), EnumWriteType::Add)
            .unwrap();
        assert_eq!(ctx.n_worksheets(), 2);
        assert_eq!(ctx.current_scope().idx_sheet(), Some(1));
        assert_eq!(ctx.sheet_track(1).unwrap().sheet_name, "3");

        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();
        assert_eq!(ctx.current_scope().idx_sheet(), Some(0));
        assert_eq!(ctx.n_worksheets(), 2);
    }

    #[test]
    fn overflowing_header_offset_is_config_error() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        let options = SpecScopeOptions {
            relative_head_row_index: Some(usize::MAX),
            ..head_options(&[&["A"]])
        };
        ctx.select_sheet(
            SpecWriteSheet::from_no(0).with_options(head_options(&[&["A"]])),
            EnumWriteType::Add,
        )
        .unwrap();

        let err = ctx
            .select_table(Some(SpecWriteTable::from_no(1).with_options(options)))
            .unwrap_err();
        match err {
            XlsxWriteError::Generate { source, .. } => {
                assert!(matches!(*source, XlsxWriteError::Config(_)))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn workbook_is_reachable_until_finish() {
        let mut ctx = open_ctx(derive_default_workbook_options());
        ctx.select_sheet(SpecWriteSheet::from_no(0), EnumWriteType::Add)
            .unwrap();
        ctx.workbook_mut()
            .unwrap()
            .worksheet_from_index(0)
            .unwrap()
            .write_string(0, 0, "direct")
            .unwrap();

        ctx.finish(false).unwrap();
        assert!(ctx.workbook_mut().is_none());
    }
}
