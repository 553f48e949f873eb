use crate::display::{is_valid_dpi_scale, DEFAULT_DPI_SCALE};
use crate::hotkey::{is_valid_key_code, MAX_HOTKEY_KEYS};
use crate::settings_store::DisplaySettings;
use std::collections::BTreeSet;

/// Drop invalid and duplicate codes and cap the combo length.
pub fn sanitize_keys(keys: &[u32]) -> Vec<u32> {
    let mut out: Vec<u32> = Vec::with_capacity(keys.len().min(MAX_HOTKEY_KEYS));
    for &code in keys {
        if out.len() == MAX_HOTKEY_KEYS {
            break;
        }
        if is_valid_key_code(code) && !out.contains(&code) {
            out.push(code);
        }
    }
    out
}

/// Bring a stored display record back into range. Modes are left alone; a
/// stale mode shows up as `ModeUnsupported` when the slot is activated.
///
/// Returns `true` when anything was changed.
pub fn sanitize_display(id: &str, record: &mut DisplaySettings, max_slots: usize) -> bool {
    let mut changed = false;

    if record.slots.len() > max_slots {
        tracing::warn!(display = id, slots = record.slots.len(), max_slots, "too many stored slots");
        record.slots.truncate(max_slots);
        changed = true;
    }
    if record.slot_count > max_slots {
        tracing::warn!(display = id, slot_count = record.slot_count, "slot count out of range");
        record.slot_count = max_slots;
        changed = true;
    }
    if !record.orientation.is_concrete() {
        record.orientation = crate::display::Orientation::Normal;
        changed = true;
    }

    for (index, slot) in record.slots.iter_mut().enumerate() {
        if !is_valid_dpi_scale(slot.dpi_scale) {
            tracing::warn!(display = id, slot = index, dpi = slot.dpi_scale, "invalid dpi scale");
            slot.dpi_scale = DEFAULT_DPI_SCALE;
            changed = true;
        }
        let keys = sanitize_keys(&slot.keys);
        if keys != slot.keys {
            tracing::warn!(display = id, slot = index, keys = ?slot.keys, "invalid hotkey codes");
            slot.keys = keys;
            changed = true;
        }
    }
    changed
}

/// A bound slot as seen by the capture conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundCombo {
    pub display_index: usize,
    pub slot_index: usize,
    pub keys: BTreeSet<u32>,
}

/// Check a freshly captured combo against the other bound slots.
///
/// On the same display the new combo may not be a subset of (or equal to)
/// another slot's combo, since that slot could never fire on its own. Across
/// displays a strict subset or superset is rejected. Returns the first
/// offending slot.
pub fn capture_conflict(
    candidate: &BTreeSet<u32>,
    display_index: usize,
    slot_index: usize,
    bound: &[BoundCombo],
) -> Option<(usize, usize)> {
    bound
        .iter()
        .filter(|b| !(b.display_index == display_index && b.slot_index == slot_index))
        .filter(|b| !b.keys.is_empty())
        .find(|b| {
            if b.display_index == display_index {
                candidate.is_subset(&b.keys)
            } else {
                candidate != &b.keys
                    && (candidate.is_subset(&b.keys) || candidate.is_superset(&b.keys))
            }
        })
        .map(|b| (b.display_index, b.slot_index))
}
