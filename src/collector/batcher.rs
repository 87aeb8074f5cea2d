use crate::collector::batch::LogBatch;
use crate::source::entry::LogEntry;

const TIMESTAMP_SIZE: usize = 8;
const SEVERITY_SIZE: usize = 4;
const EVENT_ID_SIZE: usize = 4;

/// Deterministic size estimate of an entry: fixed widths for the fixed fields,
/// UTF-8 byte counts for every string. This is what batch limits are measured in.
pub fn estimate_entry_size(entry: &LogEntry) -> usize {
    let tags: usize = entry
        .tags
        .iter()
        .map(|(key, value)| key.len() + value.len())
        .sum();

    TIMESTAMP_SIZE
        + entry.machine_id.len()
        + SEVERITY_SIZE
        + EVENT_ID_SIZE
        + entry.message.len()
        + entry.operation_id.as_ref().map_or(0, |op| op.len())
        + tags
}

/// Greedy single pass over `entries` in source order.
///
/// The open batch is closed when it already holds `max_batch_entries` entries or
/// when the next entry would push it past `max_batch_size_bytes`. An entry larger
/// than the byte limit on its own still ships, alone in its batch.
pub fn to_batches(
    entries: Vec<LogEntry>,
    max_batch_size_bytes: usize,
    max_batch_entries: usize,
) -> Vec<LogBatch> {
    let max_batch_entries = max_batch_entries.max(1);

    let mut batches = Vec::new();
    let mut current: Vec<LogEntry> = Vec::new();
    let mut current_size = 0usize;

    for entry in entries {
        let entry_size = estimate_entry_size(&entry);

        let full = current.len() >= max_batch_entries
            || current_size.saturating_add(entry_size) > max_batch_size_bytes;

        if full && !current.is_empty() {
            batches.push(LogBatch::new(std::mem::take(&mut current), current_size));
            current_size = 0;
        }

        current.push(entry);
        current_size += entry_size;
    }

    if !current.is_empty() {
        batches.push(LogBatch::new(current, current_size));
    }

    batches
}
