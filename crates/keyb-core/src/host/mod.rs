//! Host capability seams.
//!
//! The engine never touches the filesystem, the BIOS data area, video
//! memory, or the emulated CPU directly.  Each of those capabilities is a
//! trait defined here and injected into the session; the emulator supplies
//! production implementations, while [`sim`] provides recording
//! simulations for tests and the diagnostic CLI.
//!
//! All traits take `&self`: implementations that mutate state (the key
//! buffer, font memory, DOS memory) use interior mutability, so the
//! single-threaded session can hold shared handles without borrow
//! gymnastics.

pub mod sim;

/// Opens named resources as byte vectors.
///
/// The engine asks for DOS-style names (`"gr.kl"`, `"keyboard.sys"`,
/// `"EGA.CPX"`).  `open` resolves against the host's filesystem or
/// virtual drive; `bundled` resolves against the blobs compiled into or
/// shipped with the host.  The two tiers are separate because the layout
/// library search exhausts every filesystem candidate before falling back
/// to any bundled one.
pub trait ResourceStore {
    /// Opens a file by name, returning its full contents, or `None` if it
    /// does not exist.
    fn open(&self, name: &str) -> Option<Vec<u8>>;

    /// Looks up a bundled resource blob by its canonical file name.
    fn bundled(&self, name: &str) -> Option<Vec<u8>>;
}

/// The BIOS keyboard-buffer sink.
///
/// Translated keys are 16-bit words: scan code in the high byte, character
/// code in the low byte (or a full scan/char pair for S-flagged entries).
pub trait KeyBuffer {
    /// Appends one combined scan/character word to the BIOS key buffer.
    fn add_key(&self, code: u16);
}

/// The ROM font tables a code page can replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontBank {
    /// 8×8 font, characters 0x00..0x7F.
    Font8First,
    /// 8×8 font, characters 0x80..0xFF.
    Font8Second,
    /// 14×8 font, all 256 characters.
    Font14,
    /// 16×8 font, all 256 characters.
    Font16,
    /// The 14-line alternate-character list terminator byte.
    Font14Alternate,
    /// The 16-line alternate-character list terminator byte.
    Font16Alternate,
}

/// The emulated video adapter's font memory and reload hooks.
pub trait VideoAdapter {
    /// Physical address of the given ROM font table.
    fn font_base(&self, bank: FontBank) -> u32;

    /// Writes one byte of physical video/ROM memory.
    fn write_byte(&self, addr: u32, value: u8);

    /// `true` while a text mode is active.
    fn is_text_mode(&self) -> bool;

    /// `true` on EGA/VGA-class adapters (font reload is meaningful).
    fn is_ega_vga(&self) -> bool;

    /// Re-applies the currently installed font to the active text mode.
    fn reload_font(&self);

    /// Restores the adapter's original ROM fonts (teardown path).
    fn restore_rom_fonts(&self);

    /// Recomputes the ROM checksum after font memory was rewritten.
    fn refresh_rom_checksum(&self);
}

/// Saved real-mode segment register state around a trampoline call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealModeContext {
    pub ds: u16,
    pub es: u16,
    pub ss: u16,
    pub esp: u32,
}

/// Conventional DOS memory and real-mode execution.
///
/// Used exclusively by the CPX decompression trampoline: the packed
/// payload is copied into a freshly allocated segment and executed as its
/// own decompressor (a UPX version ≥ 10 self-extracting stub returns to
/// the caller once patched with a far-return opcode).
pub trait DosMemory {
    /// Allocates `paragraphs` × 16 bytes of conventional memory, returning
    /// the segment, or `None` when low memory is exhausted.
    fn allocate(&self, paragraphs: u16) -> Option<u16>;

    /// Frees a segment returned by [`DosMemory::allocate`].
    fn free(&self, segment: u16);

    /// Copies `data` into physical memory at `addr`.
    fn write_block(&self, addr: u32, data: &[u8]);

    /// Reads `out.len()` bytes of physical memory at `addr`.
    fn read_block(&self, addr: u32, out: &mut [u8]);

    /// Captures DS/ES/SS/ESP before the trampoline reassigns them.
    fn save_context(&self) -> RealModeContext;

    /// Restores a previously captured register context.
    fn restore_context(&self, ctx: RealModeContext);

    /// Points DS/ES/SS/ESP at the trampoline segment.
    fn set_segments(&self, ds: u16, es: u16, ss: u16, esp: u32);

    /// Executes a far call to `segment:offset`, returning when the callee
    /// executes a far return.
    fn run_far(&self, segment: u16, offset: u16);
}
