//! Header layout derivation and emission.

use std::collections::{BTreeMap, BTreeSet};

use crate::context::WriteContext;
use crate::error::{Result, XlsxWriteError};
use crate::handler::{SpecCellEvent, SpecRowEvent};
use crate::spec::{EnumCellValue, SpecHeadSpec, SpecMergeRegion};

////////////////////////////////////////////////////////////////////////////////
// #region HeadLayout

/// Derive the header layout from per-column labels.
///
/// Columns with fewer labels than the tallest column repeat their last label,
/// so they merge vertically. Columns without labels stay blank.
pub fn derive_head_spec(head: &[Vec<String>]) -> SpecHeadSpec {
    let n_rows = head.iter().map(Vec::len).max().unwrap_or(0);
    if n_rows == 0 {
        return SpecHeadSpec::default();
    }

    let mut labels_by_col = BTreeMap::new();
    for (col_idx, l_labels) in head.iter().enumerate() {
        let c_last = l_labels.last().cloned().unwrap_or_default();
        let mut l_padded = l_labels.clone();
        l_padded.resize(n_rows, c_last);
        labels_by_col.insert(col_idx, l_padded);
    }

    let l_grid: Vec<Vec<String>> = (0..n_rows)
        .map(|row_idx| {
            labels_by_col
                .values()
                .map(|l_labels| l_labels[row_idx].clone())
                .collect()
        })
        .collect();

    SpecHeadSpec {
        n_rows,
        merges: plan_head_merges(&l_grid),
        labels_by_col,
    }
}

/// Plan rectangular merges over equal non-empty neighbouring labels.
///
/// Scans row-major; each unvisited cell grows right over equal labels, then
/// down while every column of that span keeps the same label. Short rows
/// read as blank past their end.
pub fn plan_head_merges(header_grid: &[Vec<String>]) -> Vec<SpecMergeRegion> {
    let mut l_merges = Vec::new();
    let n_rows = header_grid.len();
    let n_cols = header_grid.iter().map(Vec::len).max().unwrap_or(0);

    let mut set_visited: BTreeSet<(usize, usize)> = BTreeSet::new();
    for row_idx in 0..n_rows {
        for col_idx in 0..n_cols {
            if set_visited.contains(&(row_idx, col_idx)) {
                continue;
            }
            set_visited.insert((row_idx, col_idx));

            let c_label = label_at(header_grid, row_idx, col_idx);
            if c_label.is_empty() {
                continue;
            }

            let mut n_col_last = col_idx;
            while n_col_last + 1 < n_cols
                && !set_visited.contains(&(row_idx, n_col_last + 1))
                && label_at(header_grid, row_idx, n_col_last + 1) == c_label
            {
                n_col_last += 1;
                set_visited.insert((row_idx, n_col_last));
            }

            let mut n_row_last = row_idx;
            while n_row_last + 1 < n_rows
                && (col_idx..=n_col_last).all(|_col| {
                    !set_visited.contains(&(n_row_last + 1, _col))
                        && label_at(header_grid, n_row_last + 1, _col) == c_label
                })
            {
                n_row_last += 1;
                for _col in col_idx..=n_col_last {
                    set_visited.insert((n_row_last, _col));
                }
            }

            let region = SpecMergeRegion {
                row_first: row_idx,
                row_last: n_row_last,
                col_first: col_idx,
                col_last: n_col_last,
            };
            if region.is_multi_cell() {
                l_merges.push(region);
            }
        }
    }

    l_merges
}

fn label_at(header_grid: &[Vec<String>], row_idx: usize, col_idx: usize) -> &str {
    header_grid[row_idx].get(col_idx).map_or("", String::as_str)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region HeadEmission

impl WriteContext {
    /// Emit the active scope's header at the sheet cursor.
    pub(crate) fn init_head(&mut self) -> Result<()> {
        let options = self.current_scope().options();
        if !options.need_head || !options.has_head() {
            return Ok(());
        }
        let head = derive_head_spec(options.head.as_deref().unwrap_or_default());
        if head.n_rows == 0 {
            return Ok(());
        }

        let idx_sheet = self.current_idx_sheet()?;
        let n_row_start = self
            .track(idx_sheet)?
            .n_row_next()
            .checked_add(options.relative_head_row_index)
            .ok_or_else(|| {
                XlsxWriteError::Config(format!(
                    "header offset {} overflows the row index",
                    options.relative_head_row_index
                ))
            })?;

        if options.automatic_merge_head {
            for region in &head.merges {
                self.add_merge_region(idx_sheet, region.translate_rows(n_row_start))?;
            }
        }

        for n_row_rel in 0..head.n_rows {
            let event_row = SpecRowEvent {
                idx_sheet,
                row_idx: n_row_start + n_row_rel,
                row_idx_relative: n_row_rel,
                if_head: true,
            };
            self.emit_row_begin(&event_row)?;
            for (col_idx, l_labels) in &head.labels_by_col {
                let event_cell = SpecCellEvent {
                    idx_sheet,
                    row_idx: event_row.row_idx,
                    col_idx: *col_idx,
                    row_idx_relative: n_row_rel,
                    if_head: true,
                    value: EnumCellValue::String(l_labels[n_row_rel].clone()),
                };
                self.emit_cell(event_cell, &options)?;
            }
            self.emit_row_end(&event_row)?;
        }

        self.mark_head_emitted();
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(l_cols: &[&[&str]]) -> Vec<Vec<String>> {
        l_cols
            .iter()
            .map(|l_col| l_col.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn derive_head_spec_pads_short_columns() {
        let head = derive_head_spec(&labels(&[&["Info", "Name"], &["Info", "Age"], &["Id"]]));

        assert_eq!(head.n_rows, 2);
        assert_eq!(head.labels_by_col[&2], vec!["Id".to_string(), "Id".to_string()]);
        assert_eq!(
            head.merges,
            vec![
                SpecMergeRegion {
                    row_first: 0,
                    row_last: 0,
                    col_first: 0,
                    col_last: 1
                },
                SpecMergeRegion {
                    row_first: 0,
                    row_last: 1,
                    col_first: 2,
                    col_last: 2
                },
            ]
        );
    }

    #[test]
    fn derive_head_spec_single_row_has_no_merges() {
        let head = derive_head_spec(&labels(&[&["A"], &["B"], &["C"]]));
        assert_eq!(head.n_rows, 1);
        assert!(head.merges.is_empty());
    }

    #[test]
    fn derive_head_spec_empty_head() {
        assert_eq!(derive_head_spec(&[]), SpecHeadSpec::default());
        assert_eq!(derive_head_spec(&labels(&[&[], &[]])).n_rows, 0);
    }

    #[test]
    fn plan_head_merges_grows_rectangles() {
        let grid = vec![
            vec!["T".to_string(), "T".to_string(), "X".to_string()],
            vec!["T".to_string(), "T".to_string(), "Y".to_string()],
            vec!["a".to_string(), "b".to_string(), "Y".to_string()],
        ];

        assert_eq!(
            plan_head_merges(&grid),
            vec![
                SpecMergeRegion {
                    row_first: 0,
                    row_last: 1,
                    col_first: 0,
                    col_last: 1
                },
                SpecMergeRegion {
                    row_first: 1,
                    row_last: 2,
                    col_first: 2,
                    col_last: 2
                },
            ]
        );
    }

    #[test]
    fn plan_head_merges_reads_short_rows_as_blank() {
        let grid = vec![
            vec!["T".to_string(), "T".to_string(), "X".to_string()],
            vec!["T".to_string()],
        ];

        assert_eq!(
            plan_head_merges(&grid),
            vec![SpecMergeRegion {
                row_first: 0,
                row_last: 0,
                col_first: 0,
                col_last: 1
            }]
        );
        assert_eq!(plan_head_merges(&[vec![], vec!["A".to_string(), "A".to_string()]]).len(), 1);
    }

    #[test]
    fn plan_head_merges_skips_empty_labels() {
        let grid = vec![vec!["".to_string(), "".to_string()], vec!["".to_string(), "".to_string()]];
        assert!(plan_head_merges(&grid).is_empty());
    }
}
