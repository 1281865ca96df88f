//! Template workbook loading and placeholder filling.

use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use rust_xlsxwriter::Workbook;

use crate::cache::derive_num_format;
use crate::conf::C_DATE_NUM_FORMAT_DEFAULT;
use crate::error::{Result, XlsxWriteError};
use crate::holder::SheetTrack;
use crate::spec::{EnumCellValue, EnumTemplateSource};
use crate::util::{cast_col_num, cast_row_num};

/// One template worksheet read back as plain values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecTemplateSheet {
    /// Worksheet name.
    pub sheet_name: String,
    /// Number of rows up to the last used row.
    pub n_rows: usize,
    /// Non-empty cells by `(row, col)`.
    pub cells: BTreeMap<(usize, usize), EnumCellValue>,
}

/// Template workbook held open for the whole session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecTemplateBook {
    /// Raw template bytes.
    pub v_bytes: Vec<u8>,
    /// Worksheets in workbook order.
    pub sheets: Vec<SpecTemplateSheet>,
}

/// Read a template and collect every worksheet's values.
pub fn load_template(source: &EnumTemplateSource) -> Result<SpecTemplateBook> {
    let v_bytes = match source {
        EnumTemplateSource::File(path) => std::fs::read(path).map_err(|err| {
            XlsxWriteError::Template(format!("cannot read {}: {err}", path.display()))
        })?,
        EnumTemplateSource::Bytes(v_bytes) => v_bytes.clone(),
    };

    let mut book = open_workbook_auto_from_rs(Cursor::new(v_bytes.clone()))?;
    let l_sheet_names: Vec<String> = book.sheet_names().to_vec();

    let mut l_sheets = Vec::with_capacity(l_sheet_names.len());
    for sheet_name in l_sheet_names {
        let range = book.worksheet_range(&sheet_name)?;
        let (n_row_start, n_col_start) = range.start().unwrap_or((0, 0));
        let n_rows = range.end().map_or(0, |(n_row_end, _)| n_row_end as usize + 1);

        let mut cells = BTreeMap::new();
        for (row_idx, col_idx, data) in range.used_cells() {
            let value = derive_cell_value_from_data(data);
            if value != EnumCellValue::None {
                cells.insert(
                    (n_row_start as usize + row_idx, n_col_start as usize + col_idx),
                    value,
                );
            }
        }

        l_sheets.push(SpecTemplateSheet {
            sheet_name,
            n_rows,
            cells,
        });
    }

    log::debug!("Loaded template with {} sheet(s)", l_sheets.len());
    Ok(SpecTemplateBook {
        v_bytes,
        sheets: l_sheets,
    })
}

fn derive_cell_value_from_data(data: &Data) -> EnumCellValue {
    match data {
        Data::Empty => EnumCellValue::None,
        Data::String(val) => EnumCellValue::String(val.clone()),
        Data::Float(val) => EnumCellValue::Number(*val),
        Data::Int(val) => EnumCellValue::Number(*val as f64),
        Data::Bool(val) => EnumCellValue::Boolean(*val),
        Data::DateTime(val) => match val.as_datetime() {
            Some(dt) if val.is_datetime() => EnumCellValue::DateTime(dt),
            _ => EnumCellValue::Number(val.as_f64()),
        },
        Data::DateTimeIso(val) | Data::DurationIso(val) => EnumCellValue::String(val.clone()),
        Data::Error(val) => EnumCellValue::String(format!("#{val:?}")),
    }
}

/// Recreate every template worksheet in `workbook` and return their tracks.
pub fn materialize_template(book: &SpecTemplateBook, workbook: &mut Workbook) -> Result<Vec<SheetTrack>> {
    let mut l_tracks = Vec::with_capacity(book.sheets.len());
    for sheet in &book.sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.sheet_name)?;

        for ((row_idx, col_idx), value) in &sheet.cells {
            let n_row = cast_row_num(*row_idx)?;
            let n_col = cast_col_num(*col_idx)?;
            match value {
                EnumCellValue::String(val) => {
                    worksheet.write_string(n_row, n_col, val)?;
                }
                EnumCellValue::Number(val) => {
                    worksheet.write_number(n_row, n_col, *val)?;
                }
                EnumCellValue::Boolean(val) => {
                    worksheet.write_boolean(n_row, n_col, *val)?;
                }
                EnumCellValue::DateTime(val) => {
                    worksheet.write_datetime_with_format(
                        n_row,
                        n_col,
                        val,
                        &derive_num_format(C_DATE_NUM_FORMAT_DEFAULT),
                    )?;
                }
                EnumCellValue::None => {}
            }
        }

        l_tracks.push(SheetTrack {
            sheet_name: sheet.sheet_name.clone(),
            n_row_last: sheet.n_rows.checked_sub(1),
            merges: Vec::new(),
        });
    }
    Ok(l_tracks)
}

////////////////////////////////////////////////////////////////////////////////
// #region PlaceholderFill

/// Text form of a value inside an embedded placeholder.
pub fn derive_fill_text(value: &EnumCellValue) -> String {
    match value {
        EnumCellValue::None => String::new(),
        EnumCellValue::String(val) => val.clone(),
        EnumCellValue::Number(val) => val.to_string(),
        EnumCellValue::Boolean(val) => val.to_string(),
        EnumCellValue::DateTime(val) => val.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Replacement of one template cell by filled data.
///
/// A cell that is exactly `{key}` takes the value as-is; placeholders
/// embedded in longer text are replaced textually. Unknown keys are kept.
pub fn plan_fill_value(text: &str, data: &BTreeMap<String, EnumCellValue>) -> Option<EnumCellValue> {
    if let Some(c_key) = text
        .strip_prefix('{')
        .and_then(|c_rest| c_rest.strip_suffix('}'))
        && !c_key.contains(['{', '}'])
    {
        return data.get(c_key).cloned();
    }

    let mut c_out = String::with_capacity(text.len());
    let mut c_rest = text;
    let mut if_replaced = false;
    while let Some(n_open) = c_rest.find('{') {
        let Some(n_close) = c_rest[n_open..].find('}').map(|n_off| n_open + n_off) else {
            break;
        };
        let c_key = &c_rest[n_open + 1..n_close];
        c_out.push_str(&c_rest[..n_open]);
        match data.get(c_key) {
            Some(value) => {
                c_out.push_str(&derive_fill_text(value));
                if_replaced = true;
            }
            None => c_out.push_str(&c_rest[n_open..=n_close]),
        }
        c_rest = &c_rest[n_close + 1..];
    }
    c_out.push_str(c_rest);

    if_replaced.then_some(EnumCellValue::String(c_out))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
