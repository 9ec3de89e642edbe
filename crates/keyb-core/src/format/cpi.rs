//! `.CPI` / `.CPX` code-page file parser and the UPX trampoline.
//!
//! Identification, per the legacy formats:
//!
//! - `FF 'F' 'O' 'N' 'T'` — a plain uncompressed CPI.
//! - `7F 'D' 'R' 'F' '_'` — the DR-DOS variant, detected and rejected.
//! - anything else — presumed UPX-packed: the literal `UPX!` must appear
//!   in the scan window after the 5-byte probe, followed by a version
//!   byte of at least 10.
//!
//! A packed file is decompressed by executing its own UPX stub in
//! conventional memory through the [`DosMemory`] seam: the stub is
//! patched with a far-return so it hands control back instead of jumping
//! into DOS, copied to `segment:0x100`, and far-called with DS/ES/SS/ESP
//! pointing into the scratch segment.  A host that prefers a native UPX
//! implementation can supply one behind the same trait, as long as it
//! produces identical bytes.
//!
//! After decompression the CPI body is walked: a u32 at offset 0x13
//! points at the code-page entry list; each entry links to the next
//! through a forward pointer that must strictly increase.

use tracing::{error, info, warn};

use crate::domain::codepage;
use crate::error::KeybError;
use crate::font::FontInstaller;
use crate::format::reader::{ByteReader, OutOfBounds};
use crate::format::SCRATCH_SIZE;
use crate::host::{DosMemory, FontBank, ResourceStore, VideoAdapter};

const CPI_MAGIC: [u8; 5] = [0xFF, b'F', b'O', b'N', b'T'];
const DRDOS_MAGIC: [u8; 5] = [0x7F, b'D', b'R', b'F', b'_'];

/// Bytes consumed by the initial signature probe.
const PROBE_SIZE: usize = 5;
/// The `UPX!` marker must appear within this many bytes after the probe.
const UPX_SCAN_WINDOW: usize = 100;
const UPX_MIN_VERSION: u8 = 10;

/// Largest packed payload the trampoline accepts.
const MAX_CPX_SIZE: usize = 0xFE00;
/// Size of the conventional-memory allocation backing the trampoline.
const TRAMPOLINE_PARAGRAPHS: u16 = 0x1500;
/// The stub is patched with a far-return this far past the marker scan
/// position, turning its final jump into a return to the engine.
const FAR_RETURN_PATCH_OFFSET: usize = 19;

fn invalid(_: OutOfBounds) -> KeybError {
    KeybError::InvalidCpFile
}

/// A code-page file after identification.
#[derive(Debug)]
enum CodepageImage {
    Plain(Vec<u8>),
    Packed {
        data: Vec<u8>,
        /// Scan position the patch offset is relative to.
        found_at: usize,
    },
}

/// Classifies a code-page file by signature.
fn identify(bytes: Vec<u8>, name: &str) -> Result<CodepageImage, KeybError> {
    if bytes.len() < PROBE_SIZE {
        warn!("codepage file {name} is too small");
        return Err(KeybError::InvalidCpFile);
    }
    if bytes[..PROBE_SIZE] == CPI_MAGIC {
        return Ok(CodepageImage::Plain(bytes));
    }
    if bytes[..PROBE_SIZE] == DRDOS_MAGIC {
        warn!("codepage file {name} has the unsupported DR-DOS format");
        return Err(KeybError::InvalidCpFile);
    }

    let window_end = bytes.len().min(PROBE_SIZE + UPX_SCAN_WINDOW);
    let marker = bytes[PROBE_SIZE..window_end]
        .windows(4)
        .position(|w| w == b"UPX!");
    let Some(marker) = marker else {
        warn!("codepage file {name} is invalid: no UPX identifier");
        return Err(KeybError::InvalidCpFile);
    };
    let marker = PROBE_SIZE + marker;

    let version = *bytes.get(marker + 4).ok_or(KeybError::InvalidCpFile)?;
    if version < UPX_MIN_VERSION {
        warn!(
            "codepage file {name} is packed with UPX version {version}, but {UPX_MIN_VERSION}+ is needed"
        );
        return Err(KeybError::InvalidCpFile);
    }

    Ok(CodepageImage::Packed { data: bytes, found_at: marker + 5 })
}

/// Decompresses a UPX-packed CPX payload through the real-mode
/// trampoline, returning the full 64 KiB scratch image.
pub fn unpack_cpx(
    dos: &dyn DosMemory,
    mut payload: Vec<u8>,
    found_at: usize,
) -> Result<Vec<u8>, KeybError> {
    if payload.len() > MAX_CPX_SIZE {
        error!("compressed codepage data is too big ({} bytes)", payload.len());
        return Err(KeybError::InvalidCpFile);
    }
    // Patch the stub so it returns instead of jumping into DOS.
    let patch_at = found_at + FAR_RETURN_PATCH_OFFSET;
    let Some(slot) = payload.get_mut(patch_at) else {
        return Err(KeybError::InvalidCpFile);
    };
    *slot = 0xCB; // far return

    let Some(segment) = dos.allocate(TRAMPOLINE_PARAGRAPHS) else {
        error!("not enough free low memory to unpack codepage data");
        return Err(KeybError::InvalidCpFile);
    };
    let base = (u32::from(segment) << 4) + 0x100;
    dos.write_block(base, &payload);

    let saved = dos.save_context();
    dos.set_segments(segment, segment, segment + 0x1000, 0xFFFE);
    dos.run_far(segment, 0x100);
    dos.restore_context(saved);

    let mut unpacked = vec![0u8; SCRATCH_SIZE];
    dos.read_block(base, &mut unpacked);
    dos.free(segment);
    Ok(unpacked)
}

/// Swaps a `.CPI` name to `.CPX` and vice versa, preserving case.
fn swap_extension(name: &str) -> Option<String> {
    let mut chars: Vec<char> = name.chars().collect();
    let last = chars.last_mut()?;
    *last = match *last {
        'i' => 'x',
        'I' => 'X',
        'x' => 'i',
        'X' => 'I',
        _ => return None,
    };
    Some(chars.into_iter().collect())
}

/// Loads the code page `codepage_id` from `codepage_file_name`.
///
/// `"none"` skips loading; a page equal to `loaded_codepage` is a no-op;
/// `"auto"` picks the bundled archive for the id.  A missing file is
/// retried with the swapped `.CPI`/`.CPX` extension, then falls back to
/// the bundled archive for the id.
///
/// Returns `Ok(Some(id))` when the page was installed (the session
/// records it), `Ok(None)` when there was nothing to do.
pub fn read_codepage_file(
    codepage_file_name: &str,
    codepage_id: u16,
    loaded_codepage: u16,
    resources: &dyn ResourceStore,
    video: &dyn VideoAdapter,
    dos: &dyn DosMemory,
) -> Result<Option<u16>, KeybError> {
    if codepage_file_name == "none" {
        return Ok(None);
    }
    if codepage_id == loaded_codepage {
        return Ok(None);
    }

    let file_name = if codepage_file_name == "auto" {
        match codepage::codepage_file_for(codepage_id) {
            Some(name) => name.to_string(),
            None => {
                info!("no matching cpi file for codepage {codepage_id}");
                return Err(KeybError::InvalidCpFile);
            }
        }
    } else {
        codepage_file_name.to_string()
    };

    let mut bytes = resources.open(&file_name);
    if bytes.is_none() {
        if let Some(swapped) = swap_extension(&file_name) {
            bytes = resources.open(&swapped);
        }
    }
    let mut bytes = match bytes {
        Some(bytes) => bytes,
        None => codepage::codepage_file_for(codepage_id)
            .and_then(|name| resources.bundled(name))
            .ok_or(KeybError::InvalidCpFile)?,
    };
    bytes.truncate(SCRATCH_SIZE);

    let cpi = match identify(bytes, &file_name)? {
        CodepageImage::Plain(data) => data,
        CodepageImage::Packed { data, found_at } => unpack_cpx(dos, data, found_at)?,
    };

    install_codepage(&cpi, codepage_id, video)?;
    Ok(Some(codepage_id))
}

/// Walks the CPI body and installs the fonts of the matching display
/// code page.
fn install_codepage(cpi: &[u8], wanted: u16, video: &dyn VideoAdapter) -> Result<(), KeybError> {
    let r = ByteReader::new(cpi);

    let mut entry = r.u32(0x13).map_err(invalid)? as usize;
    if entry >= cpi.len() {
        warn!("could not parse code-page data (start offset {entry} out of range)");
        return Err(KeybError::InvalidCpFile);
    }
    let entry_count = r.u16(entry).map_err(invalid)?;
    entry += 4;

    for _ in 0..entry_count {
        // Printers share the format; only display entries (type 1) apply.
        let device_type = r.u16(entry + 0x04).map_err(invalid)?;
        let font_codepage = r.u16(entry + 0x0E).map_err(invalid)?;
        let header = r.u32(entry + 0x16).map_err(invalid)? as usize;
        let font_type = r.u16(header).map_err(invalid)?;

        if device_type == 1 && font_type == 1 && font_codepage == wanted {
            let font_count = r.u16(header + 2).map_err(invalid)?;
            let mut data = header + 6;
            let installer = FontInstaller::new(video);
            let mut font_changed = false;

            for _ in 0..font_count {
                let height = r.u8(data).map_err(invalid)?;
                data += 6;
                match height {
                    0x10 => {
                        installer.install(FontBank::Font16, r.slice(data, 256 * 16).map_err(invalid)?);
                        installer.terminate_alternate(FontBank::Font16Alternate);
                        font_changed = true;
                    }
                    0x0E => {
                        installer.install(FontBank::Font14, r.slice(data, 256 * 14).map_err(invalid)?);
                        installer.terminate_alternate(FontBank::Font14Alternate);
                        font_changed = true;
                    }
                    0x08 => {
                        installer.install(FontBank::Font8First, r.slice(data, 128 * 8).map_err(invalid)?);
                        installer
                            .install(FontBank::Font8Second, r.slice(data + 128 * 8, 128 * 8).map_err(invalid)?);
                        font_changed = true;
                    }
                    _ => {}
                }
                data += usize::from(height) * 256;
            }

            info!("codepage {wanted} loaded");
            if font_changed && video.is_text_mode() && video.is_ega_vga() {
                video.reload_font();
            }
            video.refresh_rom_checksum();
            return Ok(());
        }

        // Follow the forward chain; reject cycles and regressions.
        let next = r.u32(entry).map_err(invalid)? as usize + 2;
        if next <= entry || next >= cpi.len() {
            warn!("code-page entry chain is corrupt");
            return Err(KeybError::InvalidCpFile);
        }
        entry = next;
    }

    error!("codepage {wanted} not found");
    Err(KeybError::InvalidCpFile)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) use tests::{build_cpi, FontSpec};
