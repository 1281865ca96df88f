//! Thread-scoped caches of number formats and date patterns.
//!
//! Entries live until [`remove_thread_local_cache`] runs at session finish,
//! so a pooled thread never carries formats into an unrelated session.

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::NaiveDateTime;
use chrono::format::{Item, StrftimeItems};
use rust_xlsxwriter::Format;

use crate::error::{Result, XlsxWriteError};

thread_local! {
    static NUM_FORMAT_CACHE: RefCell<HashMap<String, Format>> = RefCell::new(HashMap::new());
    static DATE_PATTERN_CACHE: RefCell<HashMap<String, Vec<Item<'static>>>> =
        RefCell::new(HashMap::new());
}

/// Engine format carrying number format `code`, built once per thread.
pub fn derive_num_format(code: &str) -> Format {
    NUM_FORMAT_CACHE.with(|cell| {
        cell.borrow_mut()
            .entry(code.to_string())
            .or_insert_with(|| Format::new().set_num_format(code))
            .clone()
    })
}

/// Render `value` with strftime `pattern`, parsing the pattern once per thread.
pub fn format_date(value: &NaiveDateTime, pattern: &str) -> Result<String> {
    DATE_PATTERN_CACHE.with(|cell| {
        let mut dict_items = cell.borrow_mut();
        if !dict_items.contains_key(pattern) {
            let l_items = StrftimeItems::new(pattern)
                .parse_to_owned()
                .map_err(|err| {
                    XlsxWriteError::Config(format!("invalid date pattern {pattern:?}: {err}"))
                })?;
            dict_items.insert(pattern.to_string(), l_items);
        }
        let l_items = dict_items
            .get(pattern)
            .ok_or_else(|| XlsxWriteError::Config(format!("date pattern {pattern:?} not cached")))?;
        Ok(value.format_with_items(l_items.iter()).to_string())
    })
}

/// Drop every cached format of the current thread.
pub fn remove_thread_local_cache() {
    NUM_FORMAT_CACHE.with(|cell| cell.borrow_mut().clear());
    DATE_PATTERN_CACHE.with(|cell| cell.borrow_mut().clear());
}

/// Number of cached entries on the current thread.
pub fn count_thread_local_cache() -> usize {
    let n_num = NUM_FORMAT_CACHE.with(|cell| cell.borrow().len());
    let n_date = DATE_PATTERN_CACHE.with(|cell| cell.borrow().len());
    n_num + n_date
}
