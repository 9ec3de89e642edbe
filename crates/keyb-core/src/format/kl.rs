//! `.KL` keyboard-layout parser.
//!
//! A layout payload is resolved from one of three places, in order:
//! a bare `<name>.kl` file, a record inside one of the four `.KCL`
//! library files (`keyboard.sys`, `keybrd2.sys`, `keybrd3.sys`,
//! `keybrd4.sys`), or a record inside the bundled equivalents of those
//! libraries.  Library candidates are scanned twice — a first-id pass,
//! then a full-alias pass — so an exact primary hit anywhere beats an
//! alias hit anywhere.
//!
//! Payload structure (offsets relative to the payload start):
//!
//! ```text
//! [data_len:u8][ language codes, data_len bytes ]
//! P: [submappings:u8][additional_planes:u8][... up to P+0x14]
//! P+0x14 + 8·s:  per-submapping descriptor
//!                [codepage:u16][table_off:u16][diacritics_off:u16][2 reserved]
//! P+0x14 + 8·submappings: four u16 masks per additional plane
//! ```
//!
//! Table and diacritics offsets are relative to `P`.  A codepage of 0 in
//! a descriptor marks the wildcard submapping.

use tracing::{error, info, warn};

use crate::domain::codepage::DEFAULT_CODEPAGE;
use crate::domain::layout::{
    KeyboardLayout, PlanePredicate, DIACRITICS_CAPACITY, MAX_ADDITIONAL_PLANES, MAX_SCAN_CODE,
    PASSTHROUGH_NAME,
};
use crate::error::KeybError;
use crate::format::kcl;
use crate::format::reader::{ByteReader, OutOfBounds};
use crate::format::SCRATCH_SIZE;
use crate::host::ResourceStore;

const KL_MAGIC: [u8; 3] = [0x4B, 0x4C, 0x46];

/// Header length of a bare `.KL` file: the magic plus two skipped bytes.
const BARE_KL_HEADER: usize = 5;

/// Library files searched when no bare `.KL` file exists.
const LIBRARY_FILES: [&str; 4] = ["keyboard.sys", "keybrd2.sys", "keybrd3.sys", "keybrd4.sys"];

fn invalid(_: OutOfBounds) -> KeybError {
    KeybError::InvalidFile
}

/// A layout payload plus the offset its `data_len` byte starts at.
struct ResolvedLayout {
    buf: Vec<u8>,
    start: usize,
}

/// Resolves `name` to a layout payload (see module docs for the order).
fn resolve_layout_file(
    name: &str,
    resources: &dyn ResourceStore,
) -> Result<ResolvedLayout, KeybError> {
    let file_name = format!("{name}.kl");
    if let Some(mut bytes) = resources.open(&file_name) {
        if bytes.len() < 4 || bytes[..3] != KL_MAGIC {
            error!("invalid keyboard layout file {file_name}");
            return Err(KeybError::InvalidFile);
        }
        bytes.truncate(SCRATCH_SIZE - 1);
        return Ok(ResolvedLayout { buf: bytes, start: BARE_KL_HEADER });
    }

    for first_id_only in [true, false] {
        for library in LIBRARY_FILES {
            if let Some(bytes) = resources.open(library) {
                if let Some(record) = kcl::locate(&bytes, name, first_id_only) {
                    return Ok(extract_record(&bytes, record));
                }
            }
        }
    }
    for first_id_only in [true, false] {
        for library in LIBRARY_FILES {
            if let Some(bytes) = resources.bundled(library) {
                if let Some(record) = kcl::locate(&bytes, name, first_id_only) {
                    return Ok(extract_record(&bytes, record));
                }
            }
        }
    }

    error!("keyboard layout file {name} not found");
    Err(KeybError::FileNotFound)
}

/// Cuts a library record down to its KL payload.  The payload begins two
/// bytes into the record (at its `data_len` byte) and carries no magic.
fn extract_record(library: &[u8], record: usize) -> ResolvedLayout {
    let start = (record + 2).min(library.len());
    let end = library.len().min(start + SCRATCH_SIZE - 1);
    ResolvedLayout { buf: library[start..end].to_vec(), start: 0 }
}

/// Extracts the comma-separated language-code list.  Each entry leads
/// with a two-byte numeric id that the KL form ignores.
fn parse_language_codes(
    r: &ByteReader,
    start: usize,
    data_len: usize,
    layout: &mut KeyboardLayout,
) -> Result<(), KeybError> {
    let mut i = 0usize;
    while i < data_len {
        i += 2;
        let mut code = String::new();
        while i < data_len {
            let byte = r.u8(start + i).map_err(invalid)?;
            i += 1;
            if byte == b',' {
                break;
            }
            code.push(byte as char);
        }
        layout.language_codes.push(code);
    }
    Ok(())
}

/// Scans and copies one diacritics table: sub-tables
/// `[lead, n, (char, combined)·n]` until a zero lead or the 2 KiB cap.
fn parse_diacritics(
    r: &ByteReader,
    base: usize,
    layout: &mut KeyboardLayout,
) -> Result<(), KeybError> {
    let mut i = 0usize;
    let mut entries = 0u16;
    while i < DIACRITICS_CAPACITY {
        let lead = r.u8(base + i).map_err(invalid)?;
        if lead == 0 {
            break;
        }
        entries += 1;
        let pair_count = r.u8(base + i + 1).map_err(invalid)? as usize;
        i += pair_count * 2 + 2;
    }
    let copy_len = (i + 1).min(DIACRITICS_CAPACITY);
    let bytes = r.slice(base, copy_len).map_err(invalid)?;
    layout.set_diacritics(bytes, entries);
    Ok(())
}

/// Parses one key-mapping table into the layout.
///
/// Records are `[scan][flags_and_len][command_bits][entries...]`; a zero
/// scan terminates.  The low three flag bits give `scan_length - 1`, bit
/// 7 doubles the entry width to scan/char pairs.
fn parse_key_table(
    r: &ByteReader,
    base: usize,
    layout: &mut KeyboardLayout,
) -> Result<(), KeybError> {
    let mut pos = base;
    loop {
        let scan = r.u8(pos).map_err(invalid)?;
        pos += 1;
        if scan == 0 {
            break;
        }
        let flags = r.u8(pos).map_err(invalid)?;
        let command_bits = r.u8(pos + 1).map_err(invalid)?;
        pos += 2;
        let scan_length = (flags & 0x07) as usize + 1;
        let stride = if flags & 0x80 != 0 { 2usize } else { 1 };

        if (scan & 0x7F) <= MAX_SCAN_CODE && scan <= MAX_SCAN_CODE {
            let plane_limit = scan_length.min(layout.additional_planes as usize + 2);
            for plane in 0..plane_limit {
                let entry_pos = pos + plane * stride;
                let mut entry = u16::from(r.u8(entry_pos).map_err(invalid)?);
                if entry != 0 {
                    if stride == 2 {
                        entry |= u16::from(r.u8(entry_pos + 1).map_err(invalid)?) << 8;
                    }
                    layout.install_entry(scan, plane, entry, command_bits & (1 << plane) != 0);
                }
            }
            layout.merge_key_flags(scan, flags);
        }

        pos += scan_length * stride;
    }
    Ok(())
}

/// Parses a keyboard layout for `requested_codepage` into `layout`.
///
/// `specific_layout` forces a submapping index; it is used by the
/// submapping-switch command codes (120..139) and bypasses code-page
/// filtering, exactly as re-reading the current file did originally.
///
/// On any error the layout is left fully reset (identity translation);
/// the name set from `name` survives so a later submapping switch can
/// still find the file.
pub fn read_keyboard_file(
    layout: &mut KeyboardLayout,
    name: &str,
    specific_layout: Option<u16>,
    requested_codepage: u16,
    resources: &dyn ResourceStore,
) -> Result<(), KeybError> {
    layout.reset();
    if specific_layout.is_none() {
        layout.set_name(name);
    }
    if name == PASSTHROUGH_NAME {
        return Ok(());
    }

    let resolved = resolve_layout_file(name, resources)?;
    let r = ByteReader::new(&resolved.buf);

    match parse_payload(&r, resolved.start, layout, specific_layout, requested_codepage) {
        Ok(true) => {
            layout.set_foreign(true);
            match specific_layout {
                None => info!("keyboard layout {name} loaded"),
                Some(index) => info!("keyboard layout {name} ({index}) loaded"),
            }
            Ok(())
        }
        Ok(false) => {
            error!("no matching keyboard layout found in {name}");
            // The wildcard pass may have partially populated the tables.
            layout.reset();
            Err(KeybError::LayoutNotFound)
        }
        Err(err) => {
            warn!("keyboard layout file {name} is corrupt");
            layout.reset();
            Err(err)
        }
    }
}

/// Parses the payload proper; returns whether a usable submapping (exact
/// code-page match, or the wildcard at index 0) was installed.
fn parse_payload(
    r: &ByteReader,
    mut pos: usize,
    layout: &mut KeyboardLayout,
    specific_layout: Option<u16>,
    requested_codepage: u16,
) -> Result<bool, KeybError> {
    let data_len = r.u8(pos).map_err(invalid)? as usize;
    pos += 1;
    parse_language_codes(r, pos, data_len, layout)?;
    pos += data_len;
    let keyb_cb = pos;

    let submappings = u16::from(r.u8(keyb_cb).map_err(invalid)?);
    layout.additional_planes = r.u8(keyb_cb + 1).map_err(invalid)?.min(MAX_ADDITIONAL_PLANES);

    // The descriptor array must fit the payload.
    let descriptor_end = keyb_cb + 0x14 + usize::from(submappings) * 8;
    if descriptor_end > r.len() {
        return Err(KeybError::InvalidFile);
    }

    let mut predicate_pos = descriptor_end;
    for index in 0..layout.additional_planes as usize {
        let predicate = PlanePredicate {
            required_flags: r.u16(predicate_pos).map_err(invalid)?,
            forbidden_flags: r.u16(predicate_pos + 2).map_err(invalid)?,
            required_userflags: r.u16(predicate_pos + 4).map_err(invalid)?,
            forbidden_userflags: r.u16(predicate_pos + 6).map_err(invalid)?,
        };
        predicate_pos += 8;
        layout.set_plane_predicate(index, predicate);
    }

    let mut found_matching = false;
    let mut wildcard_used = false;
    let mut sub_map: u16 = 0;
    while sub_map < submappings && !found_matching {
        if sub_map != 0 {
            if let Some(forced) = specific_layout {
                sub_map = forced;
                if sub_map >= submappings {
                    break;
                }
            }
        }
        let descriptor = keyb_cb + 0x14 + usize::from(sub_map) * 8;
        let submap_cp = r.u16(descriptor).map_err(invalid)?;

        let is_wildcard = submap_cp == 0 && sub_map == 0;
        let accepted =
            specific_layout.is_some() || submap_cp == requested_codepage || is_wildcard;

        if accepted {
            if submap_cp == requested_codepage {
                found_matching = true;
            }
            if is_wildcard {
                wildcard_used = true;
            }

            layout.clear_diacritics();
            let diacritics_offset = r.u16(descriptor + 4).map_err(invalid)? as usize;
            if diacritics_offset != 0 {
                parse_diacritics(r, keyb_cb + diacritics_offset, layout)?;
            }

            let table_offset = r.u16(descriptor + 2).map_err(invalid)? as usize;
            if table_offset != 0 {
                parse_key_table(r, keyb_cb + table_offset, layout)?;
            }
        }

        if specific_layout == Some(sub_map) {
            break;
        }
        sub_map += 1;
    }

    Ok(found_matching || wildcard_used)
}

/// Reads the code page a layout was built for: the first non-zero
/// submapping code page, or 437 when the layout cannot be resolved,
/// parsed, or only carries wildcards.
pub fn extract_codepage(name: &str, resources: &dyn ResourceStore) -> u16 {
    if name == PASSTHROUGH_NAME {
        return DEFAULT_CODEPAGE;
    }
    let Ok(resolved) = resolve_layout_file(name, resources) else {
        return DEFAULT_CODEPAGE;
    };
    let r = ByteReader::new(&resolved.buf);
    let mut pos = resolved.start;

    let Ok(data_len) = r.u8(pos) else {
        return DEFAULT_CODEPAGE;
    };
    pos += 1 + data_len as usize;
    let keyb_cb = pos;

    let Ok(submappings) = r.u8(keyb_cb) else {
        return DEFAULT_CODEPAGE;
    };
    // Reject submapping counts whose descriptor array overflows the
    // payload.
    if keyb_cb + 0x14 + usize::from(submappings) * 8 > r.len() {
        warn!("keyboard layout file {name} is corrupt");
        return DEFAULT_CODEPAGE;
    }

    for sub_map in 0..usize::from(submappings) {
        match r.u16(keyb_cb + 0x14 + sub_map * 8) {
            Ok(codepage) if codepage != 0 => return codepage,
            Ok(_) => {}
            Err(_) => return DEFAULT_CODEPAGE,
        }
    }
    DEFAULT_CODEPAGE
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) use tests::{build_kl, KeyRecord, Submapping};
