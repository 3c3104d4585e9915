use std::collections::HashSet;
use std::io::{self, BufRead};

use serde_json::Value;

use crate::telemetry::FailureKind;

/// Which logged failures cause a block to be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryFilter {
    /// Blocks whose row never reached the store.
    #[default]
    BlockFailures,
    /// Also blocks where individual transactions failed.
    AllFailures,
}

impl RetryFilter {
    fn accepts(self, kind: FailureKind) -> bool {
        // Rejected blocks fail the same way on every attempt.
        if kind == FailureKind::BlockRejected {
            return false;
        }
        match self {
            RetryFilter::BlockFailures => kind.is_block_level(),
            RetryFilter::AllFailures => true,
        }
    }
}

/// Block numbers of failure events in a JSON log, first occurrence order, deduplicated.
///
/// Lines that are not JSON failure events are ignored.
pub fn failed_blocks<R: BufRead>(reader: R, filter: RetryFilter) -> io::Result<Vec<u64>> {
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let Some(number) = parse_failure_line(&line, filter) else {
            continue;
        };
        if seen.insert(number) {
            blocks.push(number);
        }
    }
    Ok(blocks)
}

fn parse_failure_line(line: &str, filter: RetryFilter) -> Option<u64> {
    let event: Value = serde_json::from_str(line.trim()).ok()?;
    let level = event.get("level")?.as_str()?;
    if !level.eq_ignore_ascii_case("error") {
        return None;
    }
    // Unflattened formatters nest event fields under "fields".
    let fields = event
        .get("fields")
        .filter(|fields| fields.is_object())
        .unwrap_or(&event);
    let kind = FailureKind::parse(fields.get("failure")?.as_str()?)?;
    if !filter.accepts(kind) {
        return None;
    }
    fields.get("block")?.as_u64()
}
