//! Row-level write surface over a [`WriteContext`].

use std::collections::BTreeMap;

use polars::prelude::{AnyValue, DataFrame};

use crate::context::WriteContext;
use crate::error::{Result, XlsxWriteError};
use crate::handler::{SpecCellEvent, SpecRowEvent, WriteHandler};
use crate::spec::{
    EnumCellValue, EnumOutputTarget, EnumWriteType, SpecFinishReport, SpecWorkbookOptions,
    SpecWriteSheet, SpecWriteTable,
};
use crate::template::plan_fill_value;
use crate::util::convert_cell_value;

/// Stateful workbook writer.
///
/// Any failure while writing finishes the session as failed before the
/// error is returned. Dropping an unfinished writer finishes it.
pub struct XlsxWriter {
    context: WriteContext,
}

impl XlsxWriter {
    pub fn new(output: EnumOutputTarget, options: SpecWorkbookOptions) -> Result<Self> {
        Self::with_handlers(output, options, Vec::new())
    }

    /// Open with workbook-level handlers.
    pub fn with_handlers(
        output: EnumOutputTarget,
        options: SpecWorkbookOptions,
        handlers: Vec<Box<dyn WriteHandler>>,
    ) -> Result<Self> {
        Ok(Self {
            context: WriteContext::open(output, options, handlers)?,
        })
    }

    pub fn context(&self) -> &WriteContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut WriteContext {
        &mut self.context
    }

    /// Append `rows` below the current content of the selected sheet or table.
    pub fn write_rows(
        &mut self,
        rows: &[Vec<EnumCellValue>],
        sheet: SpecWriteSheet,
        table: Option<SpecWriteTable>,
    ) -> Result<()> {
        let result = self.write_rows_in_scope(rows, sheet, table);
        self.finish_on_error(result)
    }

    /// Append a DataFrame; column names become the header when none is configured.
    pub fn write_dataframe(
        &mut self,
        df: &DataFrame,
        mut sheet: SpecWriteSheet,
        mut table: Option<SpecWriteTable>,
    ) -> Result<()> {
        let l_head: Vec<Vec<String>> = df
            .get_column_names_str()
            .into_iter()
            .map(|c_name| vec![c_name.to_string()])
            .collect();
        let options_inner = match table.as_mut() {
            Some(table) => &mut table.options,
            None => &mut sheet.options,
        };
        if options_inner.head.is_none() {
            options_inner.head = Some(l_head);
        }

        let result = derive_rows_from_dataframe(df)
            .and_then(|l_rows| self.write_rows_in_scope(&l_rows, sheet, table));
        self.finish_on_error(result)
    }

    /// Replace `{key}` placeholders of the template sheet selected by `sheet`.
    pub fn fill(&mut self, data: &BTreeMap<String, EnumCellValue>, sheet: SpecWriteSheet) -> Result<()> {
        let result = self.fill_in_scope(data, sheet);
        self.finish_on_error(result)
    }

    /// Finish the session and write the workbook.
    pub fn finish(&mut self) -> Result<SpecFinishReport> {
        self.context.finish(false)
    }

    fn write_rows_in_scope(
        &mut self,
        rows: &[Vec<EnumCellValue>],
        sheet: SpecWriteSheet,
        table: Option<SpecWriteTable>,
    ) -> Result<()> {
        self.context.select_sheet(sheet, EnumWriteType::Add)?;
        self.context.select_table(table)?;

        let options = self.context.current_scope().options();
        let value_policy = self.context.workbook_options().value_policy.clone();
        let idx_sheet = self.context.current_idx_sheet()?;
        let n_row_start = self.context.track(idx_sheet)?.n_row_next();

        for (n_row_rel, l_values) in rows.iter().enumerate() {
            let event_row = SpecRowEvent {
                idx_sheet,
                row_idx: n_row_start + n_row_rel,
                row_idx_relative: n_row_rel,
                if_head: false,
            };
            self.context.emit_row_begin(&event_row)?;
            for (col_idx, value) in l_values.iter().enumerate() {
                let event_cell = SpecCellEvent {
                    idx_sheet,
                    row_idx: event_row.row_idx,
                    col_idx,
                    row_idx_relative: n_row_rel,
                    if_head: false,
                    value: convert_cell_value(value, options.keep_missing_values, &value_policy),
                };
                self.context.emit_cell(event_cell, &options)?;
            }
            self.context.emit_row_end(&event_row)?;
        }

        log::debug!("Wrote {} row(s) at row {n_row_start} of sheet {idx_sheet}", rows.len());
        Ok(())
    }

    fn fill_in_scope(&mut self, data: &BTreeMap<String, EnumCellValue>, sheet: SpecWriteSheet) -> Result<()> {
        self.context.select_sheet(sheet, EnumWriteType::Fill)?;

        let options = self.context.current_scope().options();
        let idx_sheet = self.context.current_idx_sheet()?;
        let c_sheet_name = self.context.track(idx_sheet)?.sheet_name.clone();

        let Some(book) = self.context.holder.template.as_ref() else {
            return Err(XlsxWriteError::Config("fill requires a template workbook".to_string()));
        };
        let l_fills: Vec<((usize, usize), EnumCellValue)> = book
            .sheets
            .iter()
            .find(|sheet_tpl| sheet_tpl.sheet_name == c_sheet_name)
            .map(|sheet_tpl| {
                sheet_tpl
                    .cells
                    .iter()
                    .filter_map(|(pos, value)| match value {
                        EnumCellValue::String(text) => plan_fill_value(text, data).map(|v| (*pos, v)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        for ((row_idx, col_idx), value) in l_fills {
            let event_cell = SpecCellEvent {
                idx_sheet,
                row_idx,
                col_idx,
                row_idx_relative: row_idx,
                if_head: false,
                value,
            };
            self.context.emit_cell(event_cell, &options)?;
        }
        Ok(())
    }

    fn finish_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.context.finish(true)?;
        }
        result
    }
}

impl Drop for XlsxWriter {
    fn drop(&mut self) {
        if self.context.is_finished() {
            return;
        }
        if let Err(err) = self.context.finish(false) {
            log::warn!("Failed to finish workbook on drop: {err}");
        }
    }
}

fn derive_rows_from_dataframe(df: &DataFrame) -> Result<Vec<Vec<EnumCellValue>>> {
    let l_cols = df.get_columns();
    (0..df.height())
        .map(|n_idx_row| {
            l_cols
                .iter()
                .map(|col| {
                    col.get(n_idx_row)
                        .map(derive_cell_value_from_any_value)
                        .map_err(|err| XlsxWriteError::Config(format!("Failed to access cell value: {err}")))
                })
                .collect()
        })
        .collect()
}

fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumCellValue::Boolean(val),
        AnyValue::UInt8(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt16(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt32(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int8(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int16(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float64(val) => EnumCellValue::Number(val),
        _ => EnumCellValue::String(value.to_string()),
    }
}
