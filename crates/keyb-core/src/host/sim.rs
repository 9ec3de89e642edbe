//! Simulated host implementations.
//!
//! These back the integration tests and the `keyb` diagnostic CLI.  Each
//! simulation records every interaction so a test can assert on exactly
//! what the engine did: which keys reached the BIOS buffer, which font
//! bytes were written where, whether the ROM checksum was refreshed, and
//! how the decompression trampoline drove the real-mode primitives.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{DosMemory, FontBank, KeyBuffer, RealModeContext, ResourceStore, VideoAdapter};

// ── Resources ─────────────────────────────────────────────────────────────────

/// An in-memory [`ResourceStore`]: a file map and a bundled-blob map.
///
/// Names are matched case-insensitively, as DOS file names are.
#[derive(Default)]
pub struct MemoryResources {
    files: HashMap<String, Vec<u8>>,
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file visible through [`ResourceStore::open`].
    pub fn insert_file(&mut self, name: &str, bytes: Vec<u8>) {
        self.files.insert(name.to_ascii_lowercase(), bytes);
    }

    /// Adds (or replaces) a blob visible through [`ResourceStore::bundled`].
    pub fn insert_bundled(&mut self, name: &str, bytes: Vec<u8>) {
        self.blobs.insert(name.to_ascii_lowercase(), bytes);
    }

    /// Builder form of [`MemoryResources::insert_file`].
    pub fn with_file(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.insert_file(name, bytes);
        self
    }

    /// Builder form of [`MemoryResources::insert_bundled`].
    pub fn with_bundled(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.insert_bundled(name, bytes);
        self
    }
}

impl ResourceStore for MemoryResources {
    fn open(&self, name: &str) -> Option<Vec<u8>> {
        self.files.get(&name.to_ascii_lowercase()).cloned()
    }

    fn bundled(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.get(&name.to_ascii_lowercase()).cloned()
    }
}

// ── BIOS key buffer ───────────────────────────────────────────────────────────

/// A [`KeyBuffer`] that records every enqueued word.
#[derive(Default)]
pub struct RecordingKeyBuffer {
    keys: Mutex<Vec<u16>>,
}

impl RecordingKeyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything enqueued so far, in order.
    pub fn keys(&self) -> Vec<u16> {
        self.keys.lock().expect("lock poisoned").clone()
    }

    /// Clears the recording (not the emulated BIOS state; there is none).
    pub fn clear(&self) {
        self.keys.lock().expect("lock poisoned").clear();
    }
}

impl KeyBuffer for RecordingKeyBuffer {
    fn add_key(&self, code: u16) {
        self.keys.lock().expect("lock poisoned").push(code);
    }
}

// ── Video adapter ─────────────────────────────────────────────────────────────

/// Font-table placement inside [`SimVideo`]'s flat memory image.
const FONT8_FIRST_BASE: u32 = 0x0000;
const FONT8_SECOND_BASE: u32 = 0x0400;
const FONT14_BASE: u32 = 0x0800;
const FONT16_BASE: u32 = 0x1800;
const FONT14_ALT_BASE: u32 = 0x2800;
const FONT16_ALT_BASE: u32 = 0x2801;
const VIDEO_MEMORY_SIZE: usize = 0x2802;

#[derive(Default)]
struct SimVideoState {
    memory: Vec<u8>,
    reload_font_calls: u32,
    restore_rom_font_calls: u32,
    checksum_refreshes: u32,
}

/// A [`VideoAdapter`] over a flat byte image with fixed font addresses.
pub struct SimVideo {
    state: Mutex<SimVideoState>,
    text_mode: Mutex<bool>,
    ega_vga: Mutex<bool>,
}

impl SimVideo {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimVideoState {
                memory: vec![0; VIDEO_MEMORY_SIZE],
                ..SimVideoState::default()
            }),
            text_mode: Mutex::new(true),
            ega_vga: Mutex::new(true),
        }
    }

    /// Switches the simulated adapter in or out of text mode.
    pub fn set_text_mode(&self, on: bool) {
        *self.text_mode.lock().expect("lock poisoned") = on;
    }

    /// Switches the simulated adapter class between EGA/VGA and other.
    pub fn set_ega_vga(&self, on: bool) {
        *self.ega_vga.lock().expect("lock poisoned") = on;
    }

    /// Reads back `len` bytes of a font table for assertions.
    pub fn font_bytes(&self, bank: FontBank, len: usize) -> Vec<u8> {
        let base = self.font_base(bank) as usize;
        let state = self.state.lock().expect("lock poisoned");
        state.memory[base..base + len].to_vec()
    }

    pub fn reload_font_calls(&self) -> u32 {
        self.state.lock().expect("lock poisoned").reload_font_calls
    }

    pub fn restore_rom_font_calls(&self) -> u32 {
        self.state.lock().expect("lock poisoned").restore_rom_font_calls
    }

    pub fn checksum_refreshes(&self) -> u32 {
        self.state.lock().expect("lock poisoned").checksum_refreshes
    }
}

impl Default for SimVideo {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoAdapter for SimVideo {
    fn font_base(&self, bank: FontBank) -> u32 {
        match bank {
            FontBank::Font8First => FONT8_FIRST_BASE,
            FontBank::Font8Second => FONT8_SECOND_BASE,
            FontBank::Font14 => FONT14_BASE,
            FontBank::Font16 => FONT16_BASE,
            FontBank::Font14Alternate => FONT14_ALT_BASE,
            FontBank::Font16Alternate => FONT16_ALT_BASE,
        }
    }

    fn write_byte(&self, addr: u32, value: u8) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(slot) = state.memory.get_mut(addr as usize) {
            *slot = value;
        }
    }

    fn is_text_mode(&self) -> bool {
        *self.text_mode.lock().expect("lock poisoned")
    }

    fn is_ega_vga(&self) -> bool {
        *self.ega_vga.lock().expect("lock poisoned")
    }

    fn reload_font(&self) {
        self.state.lock().expect("lock poisoned").reload_font_calls += 1;
    }

    fn restore_rom_fonts(&self) {
        self.state.lock().expect("lock poisoned").restore_rom_font_calls += 1;
    }

    fn refresh_rom_checksum(&self) {
        self.state.lock().expect("lock poisoned").checksum_refreshes += 1;
    }
}

// ── DOS memory and real-mode execution ────────────────────────────────────────

/// Hook invoked when the engine far-calls into the trampoline segment.
///
/// Receives the full conventional-memory image plus the call target, and
/// mutates the image the way the executed decompression stub would.
pub type FarCallHook = Box<dyn Fn(&mut [u8], u16, u16) + Send>;

const CONVENTIONAL_MEMORY_SIZE: usize = 0xA0000;
const FIRST_FREE_SEGMENT: u16 = 0x1000;

struct SimDosState {
    memory: Vec<u8>,
    next_segment: u16,
    live_allocations: Vec<u16>,
    far_calls: Vec<(u16, u16)>,
    context: RealModeContext,
    restored: bool,
    exhausted: bool,
}

/// A [`DosMemory`] over a flat conventional-memory image.
///
/// `run_far` does not execute code; instead it invokes the installed
/// [`FarCallHook`], which plays the role of the UPX stub.  Tests install a
/// hook that writes the known decompressed image at the segment's data
/// address, which is exactly what the real stub does on the real CPU.
pub struct SimDos {
    state: Mutex<SimDosState>,
    hook: Mutex<Option<FarCallHook>>,
}

impl SimDos {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimDosState {
                memory: vec![0; CONVENTIONAL_MEMORY_SIZE],
                next_segment: FIRST_FREE_SEGMENT,
                live_allocations: Vec::new(),
                far_calls: Vec::new(),
                context: RealModeContext { ds: 0, es: 0, ss: 0, esp: 0 },
                restored: false,
                exhausted: false,
            }),
            hook: Mutex::new(None),
        }
    }

    /// Installs the far-call hook standing in for the decompression stub.
    pub fn set_far_call_hook(&self, hook: FarCallHook) {
        *self.hook.lock().expect("lock poisoned") = Some(hook);
    }

    /// Makes every subsequent allocation fail, for out-of-memory tests.
    pub fn exhaust_memory(&self) {
        self.state.lock().expect("lock poisoned").exhausted = true;
    }

    /// Far calls performed so far, as `(segment, offset)` pairs.
    pub fn far_calls(&self) -> Vec<(u16, u16)> {
        self.state.lock().expect("lock poisoned").far_calls.clone()
    }

    /// Segments allocated and not yet freed.
    pub fn live_allocations(&self) -> Vec<u16> {
        self.state.lock().expect("lock poisoned").live_allocations.clone()
    }

    /// `true` once a saved register context has been restored.
    pub fn context_restored(&self) -> bool {
        self.state.lock().expect("lock poisoned").restored
    }
}

impl Default for SimDos {
    fn default() -> Self {
        Self::new()
    }
}

impl DosMemory for SimDos {
    fn allocate(&self, paragraphs: u16) -> Option<u16> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.exhausted {
            return None;
        }
        let segment = state.next_segment;
        let end = (segment as usize + paragraphs as usize) << 4;
        if end > state.memory.len() {
            return None;
        }
        state.next_segment = segment.checked_add(paragraphs)?;
        state.live_allocations.push(segment);
        Some(segment)
    }

    fn free(&self, segment: u16) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.live_allocations.retain(|&s| s != segment);
    }

    fn write_block(&self, addr: u32, data: &[u8]) {
        let mut state = self.state.lock().expect("lock poisoned");
        let start = addr as usize;
        let end = (start + data.len()).min(state.memory.len());
        if start < end {
            let span = end - start;
            state.memory[start..end].copy_from_slice(&data[..span]);
        }
    }

    fn read_block(&self, addr: u32, out: &mut [u8]) {
        let state = self.state.lock().expect("lock poisoned");
        let start = addr as usize;
        let end = (start + out.len()).min(state.memory.len());
        if start < end {
            let span = end - start;
            out[..span].copy_from_slice(&state.memory[start..end]);
        }
    }

    fn save_context(&self) -> RealModeContext {
        self.state.lock().expect("lock poisoned").context
    }

    fn restore_context(&self, ctx: RealModeContext) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.context = ctx;
        state.restored = true;
    }

    fn set_segments(&self, ds: u16, es: u16, ss: u16, esp: u32) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.context = RealModeContext { ds, es, ss, esp };
    }

    fn run_far(&self, segment: u16, offset: u16) {
        // Record first, then hand the memory image to the hook.
        let hook = self.hook.lock().expect("lock poisoned");
        let mut state = self.state.lock().expect("lock poisoned");
        state.far_calls.push((segment, offset));
        if let Some(ref hook) = *hook {
            hook(&mut state.memory, segment, offset);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
