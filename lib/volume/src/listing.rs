//! Display ordering and filtering of directory contents.
//!
//! Both are pure functions over a slice of entries; the cached listing is
//! never reordered in place.

use std::cmp::Ordering;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::entry::Entry;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortField {
    #[default]
    Name,
    /// Data fork size.
    Size,
    Modified,
    /// Filename extension.
    Type,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingOptions {
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    /// Case-insensitive substring the name must contain. Empty matches all.
    pub filter_text: String,
    /// Include names starting with '.'.
    pub show_hidden: bool,
}

/// Compare names the way a person reads them: case-insensitive, with runs of
/// digits compared by value so that "file2" sorts before "file10".
pub fn natural_compare(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let ord = compare_digit_runs(&l_run, &r_run);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
        run.push(c);
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trimmed = a.trim_start_matches('0');
    let b_trimmed = b.trim_start_matches('0');
    a_trimmed
        .len()
        .cmp(&b_trimmed.len())
        .then_with(|| a_trimmed.cmp(b_trimmed))
        // "007" after "7"
        .then_with(|| a.len().cmp(&b.len()))
}

fn compare_modified(a: Option<SystemTime>, b: Option<SystemTime>) -> Ordering {
    // None sorts as the earliest possible time
    a.cmp(&b)
}

fn compare_by(field: SortField, a: &Entry, b: &Entry) -> Ordering {
    match field {
        SortField::Name => natural_compare(a.name(), b.name()),
        SortField::Size => a.data_size().cmp(&b.data_size()),
        SortField::Modified => compare_modified(a.modified(), b.modified()),
        SortField::Type => {
            natural_compare(a.extension().unwrap_or(""), b.extension().unwrap_or(""))
        }
    }
}

/// Directories first; within each group by the requested field. Descending
/// only inverts the field comparison.
pub fn compare_entries(a: &Entry, b: &Entry, field: SortField, order: SortOrder) -> Ordering {
    b.is_directory().cmp(&a.is_directory()).then_with(|| {
        let ord = compare_by(field, a, b);
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    })
}

pub fn matches_filter(entry: &Entry, options: &ListingOptions) -> bool {
    if !options.show_hidden && entry.name().starts_with('.') {
        return false;
    }
    options.filter_text.is_empty()
        || entry
            .name()
            .to_lowercase()
            .contains(&options.filter_text.to_lowercase())
}

/// Filtered and sorted copy of `entries`.
pub fn sorted_filtered(entries: &[Entry], options: &ListingOptions) -> Vec<Entry> {
    let mut visible: Vec<Entry> = entries
        .iter()
        .filter(|e| matches_filter(e, options))
        .cloned()
        .collect();
    visible.sort_by(|a, b| compare_entries(a, b, options.sort_field, options.sort_order));
    visible
}
