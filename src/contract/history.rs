//! Change-log maintenance for the contract's embedded `history` list.
//!
//! The list is deduplicated per field name: a repeated change replaces the
//! earlier entry so the log always shows the latest movement of a field.
//! `commissions` is the one exception and accumulates every change.

use super::domain::HistoryEntry;

/// Field name exempt from history deduplication.
pub const COMMISSIONS_FIELD: &str = "commissions";

/// Append `entry`, dropping any earlier entry with the same name unless
/// the field is `commissions`.
pub fn record(history: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    if entry.name != COMMISSIONS_FIELD {
        history.retain(|existing| existing.name != entry.name);
    }
    history.push(entry);
}
