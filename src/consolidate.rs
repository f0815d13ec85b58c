//! Consolidation engine
//!
//! Turns ordered messages into display units: consecutive messages share a
//! unit, corrections are spliced into the unit holding the message they
//! replace, and history pages are merged in front of the live cache.

use crate::message::Message;
use crate::unit::DisplayUnit;
use std::collections::HashSet;
use tracing::debug;

/// Merge `incoming` (oldest first) onto the end of `existing`.
///
/// Messages whose uid is already present, or was already replaced by a
/// correction, are skipped so that re-applying the same input is a no-op.
pub fn merge_sequential(
    existing: Vec<DisplayUnit>,
    incoming: &[Message],
    window_ms: i64,
) -> Vec<DisplayUnit> {
    let mut units = existing;
    let mut seen = seen_ids(&units);

    for msg in incoming {
        if seen.contains(&msg.uid) {
            continue;
        }
        seen.insert(msg.uid.clone());
        append_message(&mut units, msg.clone(), window_ms);
    }
    units
}

/// Find the unit a new message should be merged into.
///
/// For a correction this is the newest unit holding the corrected uid, or
/// `None` when that message is no longer loaded. For anything else it is the
/// newest unit of the same kind.
pub fn resolve_correction(units: &[DisplayUnit], msg: &Message) -> Option<usize> {
    match msg.corrected_uid.as_deref() {
        Some(target) => units.iter().rposition(|u| u.has_seen(target)),
        None => units.iter().rposition(|u| u.kind() == msg.kind),
    }
}

/// Append one live message; returns the index of the unit it landed in
pub fn append_message(units: &mut Vec<DisplayUnit>, msg: Message, window_ms: i64) -> usize {
    if msg.is_correction() {
        match resolve_correction(units, &msg) {
            Some(idx) => {
                units[idx].merge(msg);
                return idx;
            }
            None => {
                debug!(
                    uid = %msg.uid,
                    corrected = ?msg.corrected_uid,
                    "correction target not loaded, appending as new message"
                );
            }
        }
    }

    match units.last_mut() {
        Some(last) if last.accepts(&msg, window_ms) => {
            last.merge(msg);
            units.len() - 1
        }
        _ => {
            units.push(DisplayUnit::new(msg));
            units.len() - 1
        }
    }
}

/// Merge an older history page in front of the cache.
///
/// Both lists are walked from their ends, always taking the later unit, so the
/// output is time ordered without sorting. Units already present in the cache
/// are dropped, and where a history unit directly precedes a cache unit the
/// two are coalesced if the cache unit is consecutive to it.
pub fn tail_merge(
    history: Vec<DisplayUnit>,
    cache: Vec<DisplayUnit>,
    window_ms: i64,
) -> Vec<DisplayUnit> {
    let seen = seen_ids(&cache);
    let history: Vec<DisplayUnit> = history
        .into_iter()
        .filter_map(|unit| {
            let ids: HashSet<String> = unit
                .message_ids()
                .into_iter()
                .filter(|id| seen.contains(*id))
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                Some(unit)
            } else {
                unit.remove_ids(&ids).map(|(u, _)| u)
            }
        })
        .collect();

    if history.is_empty() {
        return cache;
    }

    // (unit, came_from_history), built newest first
    let mut reversed: Vec<(DisplayUnit, bool)> = Vec::with_capacity(history.len() + cache.len());
    let mut history = history.into_iter().rev().peekable();
    let mut cache = cache.into_iter().rev().peekable();

    loop {
        let take_history = match (history.peek(), cache.peek()) {
            (Some(h), Some(c)) => h.timestamp() > c.timestamp(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_history {
            if let Some(h) = history.next() {
                reversed.push((h, true));
            }
        } else if let Some(c) = cache.next() {
            reversed.push((c, false));
        }
    }

    let mut output: Vec<(DisplayUnit, bool)> = Vec::with_capacity(reversed.len());
    for (unit, from_history) in reversed.into_iter().rev() {
        if let Some((prev, prev_from_history)) = output.last_mut() {
            if *prev_from_history && !from_history && prev.accepts(unit.root(), window_ms) {
                debug!(uid = %unit.root().uid, "coalescing cache head into history tail");
                prev.absorb(unit);
                // The coalesced unit now ends with cache content
                *prev_from_history = false;
                continue;
            }
        }
        output.push((unit, from_history));
    }

    output.into_iter().map(|(unit, _)| unit).collect()
}

/// All messages of `units`, oldest first
pub fn flatten(units: &[DisplayUnit]) -> Vec<Message> {
    units.iter().flat_map(|u| u.messages().cloned()).collect()
}

fn seen_ids(units: &[DisplayUnit]) -> HashSet<String> {
    let mut seen = HashSet::new();
    for unit in units {
        seen.extend(unit.messages().map(|m| m.uid.clone()));
        seen.extend(unit.superseded().map(str::to_string));
    }
    seen
}
