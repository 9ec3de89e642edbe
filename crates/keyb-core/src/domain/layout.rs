//! The keyboard layout entity and its per-keystroke runtime.
//!
//! A layout is a dense two-dimensional table indexed by
//! `(scan_code, plane)`.  Twelve planes exist per scan code:
//!
//! | Plane | Meaning |
//! |-------|---------|
//! | 0     | normal |
//! | 1     | shift |
//! | 2..9  | additional user-defined planes, gated by [`PlanePredicate`]s |
//! | 10    | command-bit row: bit *i* marks plane *i*'s entry as a command |
//! | 11    | per-key flag row: entry length, caps-affected bit, S-flag |
//!
//! Each table entry is a 16-bit value: 0 means "unmapped", otherwise the
//! low byte is a character code, optionally joined by a paired scan code
//! in the high byte when the per-key S-flag is set.
//!
//! Translation walks the planes under the current modifier state, then
//! feeds the selected entry through the command dispatcher / dead-key
//! state machine in [`KeyboardLayout::map_key`].  Emission goes straight
//! to the injected [`KeyBuffer`].

use crate::host::KeyBuffer;

/// Largest scan code the BIOS emits.
pub const MAX_SCAN_CODE: u8 = 0x58;

/// Parallel translation tables per scan code (see module docs).
pub(crate) const LAYOUT_PLANES: usize = 12;

/// Planes 2..9: at most eight predicate-gated planes.
pub(crate) const MAX_ADDITIONAL_PLANES: u8 = (LAYOUT_PLANES - 4) as u8;

/// Fixed capacity of the diacritics table.
pub(crate) const DIACRITICS_CAPACITY: usize = 2048;

const COMMAND_ROW: usize = LAYOUT_PLANES - 2;
const FLAGS_ROW: usize = LAYOUT_PLANES - 1;

/// The name under which a session reports "no translation installed".
pub const PASSTHROUGH_NAME: &str = "none";

/// Modifier-state masks a predicate-gated plane matches against.
///
/// `required_flags`/`forbidden_flags` test the combined BIOS flag word
/// built per keystroke; the userflag pair tests the layout's latching
/// user-key bits (set and cleared by command codes 180..195).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanePredicate {
    pub required_flags: u16,
    pub forbidden_flags: u16,
    pub required_userflags: u16,
    pub forbidden_userflags: u16,
}

impl PlanePredicate {
    /// An unconfigured plane: forbids every flag, so it can never match a
    /// non-empty modifier state.
    const fn unconfigured() -> Self {
        Self {
            required_flags: 0,
            forbidden_flags: 0xFFFF,
            required_userflags: 0,
            forbidden_userflags: 0xFFFF,
        }
    }
}

/// Result of feeding one scan-code event through the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// The key is not translated; the caller's default handling applies.
    PassThrough,
    /// The key was consumed (zero or more words went to the key buffer).
    Handled,
    /// A submapping-switch command fired: the session must re-parse the
    /// current layout file with this forced submapping index.
    SwitchSubmapping(u16),
}

/// Outcome of dispatching a single table entry.
enum MapOutcome {
    Handled,
    NotHandled,
    Switch(u16),
}

/// Result of consulting the diacritics table for a pending dead key.
enum DiacriticHit {
    /// The literal matched a pair: emit the combined character.
    Combined(u8),
    /// No pair matched: emit the sub-table's standard byte.
    Standard(u8),
}

/// One DOS keyboard layout plus its live translation state.
pub struct KeyboardLayout {
    name: String,
    table: [[u16; LAYOUT_PLANES]; MAX_SCAN_CODE as usize + 1],
    plane_predicates: [PlanePredicate; MAX_ADDITIONAL_PLANES as usize],
    pub(crate) additional_planes: u8,
    pub(crate) used_lock_modifiers: u8,
    diacritics: [u8; DIACRITICS_CAPACITY],
    diacritics_entries: u16,
    /// Pending dead-key state, biased by 200 as on the wire; 0 = none.
    diacritics_character: u16,
    user_keys: u16,
    use_foreign_layout: bool,
    pub(crate) language_codes: Vec<String>,
}

impl KeyboardLayout {
    /// Creates the power-on layout: pass-through, name `"none"`.
    pub fn new() -> Self {
        Self {
            name: PASSTHROUGH_NAME.to_string(),
            table: [[0; LAYOUT_PLANES]; MAX_SCAN_CODE as usize + 1],
            plane_predicates: [PlanePredicate::unconfigured(); MAX_ADDITIONAL_PLANES as usize],
            additional_planes: 0,
            used_lock_modifiers: 0x0F,
            diacritics: [0; DIACRITICS_CAPACITY],
            diacritics_entries: 0,
            diacritics_character: 0,
            user_keys: 0,
            use_foreign_layout: false,
            language_codes: Vec::new(),
        }
    }

    /// Clears every parsed table back to the identity state.
    ///
    /// The layout name and the foreign/US flag survive a reset; the
    /// loaders manage both explicitly.
    pub(crate) fn reset(&mut self) {
        self.table = [[0; LAYOUT_PLANES]; MAX_SCAN_CODE as usize + 1];
        self.plane_predicates = [PlanePredicate::unconfigured(); MAX_ADDITIONAL_PLANES as usize];
        self.additional_planes = 0;
        self.used_lock_modifiers = 0x0F;
        self.diacritics_entries = 0;
        self.diacritics_character = 0;
        self.user_keys = 0;
        self.language_codes.clear();
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// The layout's file name (`"none"` for pass-through).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// `true` when foreign translation is active (vs US pass-through).
    pub fn is_foreign(&self) -> bool {
        self.use_foreign_layout
    }

    pub(crate) fn set_foreign(&mut self, foreign: bool) {
        self.use_foreign_layout = foreign;
    }

    /// Language codes the layout recognises itself by.
    pub fn language_codes(&self) -> &[String] {
        &self.language_codes
    }

    /// The first language code, used for reporting.
    pub fn main_language_code(&self) -> Option<&str> {
        self.language_codes.first().map(String::as_str)
    }

    /// `true` when `query` is a case-insensitive prefix of one of the
    /// layout's language codes.
    pub fn matches_language_code(&self, query: &str) -> bool {
        let q = query.as_bytes();
        self.language_codes.iter().any(|code| {
            let c = code.as_bytes();
            c.len() >= q.len() && c[..q.len()].eq_ignore_ascii_case(q)
        })
    }

    /// Live user-flag bits (latched by command codes 180..195).
    pub fn user_keys(&self) -> u16 {
        self.user_keys
    }

    /// Raw table cell, including the command-bit row (plane 10) and the
    /// per-key flag row (plane 11).
    pub fn table_entry(&self, scan: u8, plane: usize) -> u16 {
        if scan > MAX_SCAN_CODE || plane >= LAYOUT_PLANES {
            return 0;
        }
        self.table[scan as usize][plane]
    }

    /// Drops any pending dead key (layout switches do this).
    pub fn clear_pending_diacritic(&mut self) {
        self.diacritics_character = 0;
    }

    /// Number of sub-tables in the loaded diacritics table.
    pub fn diacritics_entries(&self) -> u16 {
        self.diacritics_entries
    }

    // ── Parser-facing mutators ────────────────────────────────────────────────

    pub(crate) fn set_plane_predicate(&mut self, index: usize, predicate: PlanePredicate) {
        if index < self.plane_predicates.len() {
            self.plane_predicates[index] = predicate;
            self.used_lock_modifiers |= (predicate.required_flags & 0x70) as u8;
        }
    }

    /// Installs one table entry and its command bit.
    pub(crate) fn install_entry(&mut self, scan: u8, plane: usize, entry: u16, is_command: bool) {
        let row = &mut self.table[scan as usize];
        row[plane] = entry;
        row[COMMAND_ROW] &= !(1u16 << plane);
        if is_command {
            row[COMMAND_ROW] |= 1u16 << plane;
        }
    }

    /// Folds a key record's flag byte into the per-key flag row: the
    /// entry-length field (low 3 bits) takes the element-wise maximum, the
    /// high nibble ORs in.
    pub(crate) fn merge_key_flags(&mut self, scan: u8, flags: u8) {
        let row = &mut self.table[scan as usize];
        let old = row[FLAGS_ROW];
        let length = (old & 0x07).max(flags as u16 & 0x07);
        row[FLAGS_ROW] = length | ((flags as u16 | old) & 0xF0);
    }

    pub(crate) fn clear_diacritics(&mut self) {
        self.diacritics_entries = 0;
    }

    /// Replaces the diacritics table with `bytes` (already terminated).
    pub(crate) fn set_diacritics(&mut self, bytes: &[u8], entries: u16) {
        let len = bytes.len().min(DIACRITICS_CAPACITY);
        self.diacritics[..len].copy_from_slice(&bytes[..len]);
        self.diacritics_entries = entries;
    }

    // ── Runtime ───────────────────────────────────────────────────────────────

    /// Translates one scan-code event under the given BIOS modifier state.
    ///
    /// `flags1` is the BIOS shift-state byte (bit 0 right shift, 1 left
    /// shift, 2 ctrl, 3 alt, 4 scroll lock, 5 num lock, 6 caps lock,
    /// 7 insert); `flags2` and `flags3` carry the e0-prefix and auxiliary
    /// bits.  Emission happens through `keys`; the returned value tells
    /// the caller whether the event was consumed.
    pub fn translate(
        &mut self,
        scan: u8,
        flags1: u8,
        flags2: u8,
        flags3: u8,
        keys: &dyn KeyBuffer,
    ) -> Translation {
        if scan > MAX_SCAN_CODE || !self.use_foreign_layout {
            return Translation::PassThrough;
        }

        let key_flags = self.table[scan as usize][FLAGS_ROW];
        let is_pair = key_flags & 0x80 != 0;
        let command_row = self.table[scan as usize][COMMAND_ROW];

        // Fast path: no honoured lock/ctrl/alt modifier and no e0 prefix
        // means only the shift/normal pair can apply.
        if flags1 & self.used_lock_modifiers & 0x7C == 0 && flags3 & 0x02 == 0 {
            // (left shift OR right shift) XOR (key caps-affected AND caps locked)
            let shift_active = ((flags1 & 0x02) >> 1) | (flags1 & 0x01);
            let caps_effect = ((key_flags as u8 & 0x40) & (flags1 & 0x40)) >> 6;
            let plane = usize::from(shift_active ^ caps_effect != 0);
            let entry = self.table[scan as usize][plane];
            if entry != 0 {
                let is_command = command_row & (1 << plane) != 0;
                match self.map_key(scan, entry, is_command, is_pair, keys) {
                    MapOutcome::Handled => return Translation::Handled,
                    MapOutcome::Switch(index) => return Translation::SwitchSubmapping(index),
                    MapOutcome::NotHandled => {}
                }
            }
        }

        // Combined flag word for the predicate-gated planes.
        let mut current_flags =
            u16::from(flags1 & 0x7F) | (u16::from((flags2 & 0x03) | (flags3 & 0x0C)) << 8);
        if flags1 & 0x03 != 0 {
            current_flags |= 0x4000; // either shift key down
        }
        if flags3 & 0x02 != 0 {
            current_flags |= 0x1000; // e0-prefixed
        }

        for plane_index in 0..self.additional_planes as usize {
            let predicate = self.plane_predicates[plane_index];
            let matches = current_flags & predicate.required_flags == predicate.required_flags
                && self.user_keys & predicate.required_userflags == predicate.required_userflags
                && current_flags & predicate.forbidden_flags == 0
                && self.user_keys & predicate.forbidden_userflags == 0;
            if !matches {
                continue;
            }
            let entry = self.table[scan as usize][2 + plane_index];
            if entry == 0 {
                // A matching plane with no entry masks all later planes.
                break;
            }
            let is_command = (command_row >> (plane_index + 2)) & 1 != 0;
            match self.map_key(scan, entry, is_command, is_pair, keys) {
                MapOutcome::Handled => return Translation::Handled,
                MapOutcome::Switch(index) => return Translation::SwitchSubmapping(index),
                MapOutcome::NotHandled => {}
            }
        }

        // A pending dead key is consumed by any non-modifier key that made
        // it this far (no table entry anywhere).
        if self.diacritics_character > 0 && !is_modifier_scan(scan) {
            self.diacritics_character = 0;
            return Translation::Handled;
        }

        Translation::PassThrough
    }

    /// Dispatches one selected table entry: either executes its command
    /// code or emits the literal, advancing dead-key composition.
    fn map_key(
        &mut self,
        scan: u8,
        entry: u16,
        is_command: bool,
        is_pair: bool,
        keys: &dyn KeyBuffer,
    ) -> MapOutcome {
        if is_command {
            let command = (entry & 0xFF) as u8;
            return match command {
                200..=234 => {
                    self.diacritics_character = u16::from(command);
                    if self.diacritics_character >= self.diacritics_entries + 200 {
                        self.diacritics_character = 0;
                    }
                    MapOutcome::Handled
                }
                120..=139 => MapOutcome::Switch(u16::from(command) - 119),
                180..=187 => {
                    self.user_keys &= !(1u16 << (command - 180));
                    MapOutcome::Handled
                }
                188..=195 => {
                    self.user_keys |= 1u16 << (command - 188);
                    MapOutcome::Handled
                }
                160 => MapOutcome::Handled, // nop
                _ => MapOutcome::NotHandled,
            };
        }

        if self.diacritics_character > 0 {
            let biased = self.diacritics_character.saturating_sub(200);
            let sub_table = usize::from(biased);
            let in_range = biased < self.diacritics_entries;
            self.diacritics_character = 0;
            if in_range {
                match self.diacritic_lookup(sub_table, (entry & 0xFF) as u8) {
                    Some(DiacriticHit::Combined(combined)) => {
                        keys.add_key(u16::from(scan) << 8 | u16::from(combined));
                        return MapOutcome::Handled;
                    }
                    Some(DiacriticHit::Standard(standard)) => {
                        keys.add_key(u16::from(scan) << 8 | u16::from(standard));
                        return MapOutcome::Handled;
                    }
                    // A truncated sub-table behaves like no pending key.
                    None => {}
                }
            }
        }

        if is_pair {
            keys.add_key(entry);
        } else {
            keys.add_key(u16::from(scan) << 8 | (entry & 0xFF));
        }
        MapOutcome::Handled
    }

    /// Resolves a pending dead key against the literal that follows it.
    ///
    /// Sub-tables are laid out `[lead, n, (char, combined)·n]` back to
    /// back; walking is by length, there is no index.  Returns `None`
    /// only when the table is truncated mid-walk.
    fn diacritic_lookup(&self, sub_table: usize, literal: u8) -> Option<DiacriticHit> {
        let mut start = 0usize;
        for _ in 0..sub_table {
            let n = *self.diacritics.get(start + 1)?;
            start += n as usize * 2 + 2;
        }
        let standard = *self.diacritics.get(start)?;
        let pair_count = *self.diacritics.get(start + 1)?;
        let pairs = start + 2;
        for i in 0..pair_count as usize {
            let c = *self.diacritics.get(pairs + i * 2)?;
            if c == literal {
                let combined = *self.diacritics.get(pairs + i * 2 + 1)?;
                return Some(DiacriticHit::Combined(combined));
            }
        }
        Some(DiacriticHit::Standard(standard))
    }
}

impl Default for KeyboardLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan codes that neither cancel nor advance a pending dead key.
fn is_modifier_scan(scan: u8) -> bool {
    matches!(scan, 0x1D | 0x2A | 0x36 | 0x38 | 0x3A | 0x45 | 0x46)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
