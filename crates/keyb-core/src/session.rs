//! The keyboard session: load, switch, translate, tear down.
//!
//! One session owns at most one active [`KeyboardLayout`] and the
//! currently loaded code-page id (437 at power-on).  Loading and
//! switching are atomic with respect to observers: a fresh layout is
//! built aside and only replaces the active one once both the layout
//! parse and the code-page load have succeeded.  On any failure the
//! previous layout — and its translation behaviour — remain untouched.
//!
//! The session runs on the emulator's main tick; `translate_key` is
//! called from the interrupt shim on the same thread, and the loaders
//! are quiescent with respect to it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::codepage::DEFAULT_CODEPAGE;
use crate::domain::layout::{KeyboardLayout, Translation, PASSTHROUGH_NAME};
use crate::error::{KeybError, SwitchError};
use crate::format::{cpi, kl};
use crate::host::{DosMemory, KeyBuffer, ResourceStore, VideoAdapter};

/// Owns the active layout and drives the host seams.
pub struct KeyboardSession {
    resources: Arc<dyn ResourceStore>,
    key_buffer: Arc<dyn KeyBuffer>,
    video: Arc<dyn VideoAdapter>,
    dos_memory: Arc<dyn DosMemory>,
    layout: KeyboardLayout,
    loaded_codepage: u16,
}

impl KeyboardSession {
    /// Creates a session in the power-on state: US pass-through layout,
    /// code page 437.
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        key_buffer: Arc<dyn KeyBuffer>,
        video: Arc<dyn VideoAdapter>,
        dos_memory: Arc<dyn DosMemory>,
    ) -> Self {
        Self {
            resources,
            key_buffer,
            video,
            dos_memory,
            layout: KeyboardLayout::new(),
            loaded_codepage: DEFAULT_CODEPAGE,
        }
    }

    /// Loads `layout_name` for `codepage` and installs the code page's
    /// fonts from `codepage_file` (`"auto"` selects the bundled archive,
    /// `"none"` skips code-page loading).
    ///
    /// # Errors
    ///
    /// Any [`KeybError`]; the previous layout and code page stay active.
    pub fn load_layout(
        &mut self,
        layout_name: &str,
        codepage: u16,
        codepage_file: &str,
    ) -> Result<(), KeybError> {
        let mut fresh = KeyboardLayout::new();
        kl::read_keyboard_file(&mut fresh, layout_name, None, codepage, self.resources.as_ref())?;

        if let Some(loaded) = cpi::read_codepage_file(
            codepage_file,
            codepage,
            self.loaded_codepage,
            self.resources.as_ref(),
            self.video.as_ref(),
            self.dos_memory.as_ref(),
        )? {
            self.loaded_codepage = loaded;
        }

        self.layout = fresh;
        Ok(())
    }

    /// Switches the active layout.
    ///
    /// A name starting with `"US"` drops to pass-through without a
    /// re-parse; a name matching one of the current layout's language
    /// codes re-enables foreign translation.  Anything else is a full
    /// load (layout, auto-extracted code page, fonts) that replaces the
    /// session state only if every step succeeds.
    ///
    /// # Errors
    ///
    /// [`SwitchError`] carrying the attempted code page; the previous
    /// layout stays active and translates identically.
    pub fn switch_layout(&mut self, new_layout: &str) -> Result<(), SwitchError> {
        let to_us = new_layout.len() >= 2 && new_layout.as_bytes()[..2].eq_ignore_ascii_case(b"US");
        if to_us {
            if self.layout.is_foreign() {
                self.layout.set_foreign(false);
                self.layout.clear_pending_diacritic();
                info!("switched to US layout");
            }
            return Ok(());
        }

        if self.layout.matches_language_code(new_layout) {
            if !self.layout.is_foreign() {
                self.layout.set_foreign(true);
                self.layout.clear_pending_diacritic();
                info!("switched to layout {new_layout}");
            }
            return Ok(());
        }

        let attempted = kl::extract_codepage(new_layout, self.resources.as_ref());
        let mut fresh = KeyboardLayout::new();
        kl::read_keyboard_file(
            &mut fresh,
            new_layout,
            None,
            attempted,
            self.resources.as_ref(),
        )
        .map_err(|source| SwitchError { source, attempted_codepage: Some(attempted) })?;

        match cpi::read_codepage_file(
            "auto",
            attempted,
            self.loaded_codepage,
            self.resources.as_ref(),
            self.video.as_ref(),
            self.dos_memory.as_ref(),
        ) {
            Ok(Some(loaded)) => self.loaded_codepage = loaded,
            Ok(None) => {}
            Err(source) => {
                return Err(SwitchError { source, attempted_codepage: Some(attempted) })
            }
        }

        self.layout = fresh;
        Ok(())
    }

    /// Toggles between the foreign layout and US pass-through.
    pub fn switch_foreign_layout(&mut self) {
        let foreign = !self.layout.is_foreign();
        self.layout.set_foreign(foreign);
        self.layout.clear_pending_diacritic();
        if foreign {
            info!("switched to foreign layout");
        } else {
            info!("switched to US layout");
        }
    }

    /// Translates one scan-code event; returns whether it was consumed.
    ///
    /// Submapping-switch commands embedded in the layout re-parse the
    /// current file against the loaded code page; a failed re-parse
    /// leaves the identity layout, matching the legacy engine.
    pub fn translate_key(&mut self, scan: u8, flags1: u8, flags2: u8, flags3: u8) -> bool {
        match self
            .layout
            .translate(scan, flags1, flags2, flags3, self.key_buffer.as_ref())
        {
            Translation::PassThrough => false,
            Translation::Handled => true,
            Translation::SwitchSubmapping(index) => {
                self.switch_submapping(index);
                true
            }
        }
    }

    fn switch_submapping(&mut self, index: u16) {
        if self.layout.name() == PASSTHROUGH_NAME {
            return;
        }
        let name = self.layout.name().to_string();
        if let Err(err) = kl::read_keyboard_file(
            &mut self.layout,
            &name,
            Some(index),
            self.loaded_codepage,
            self.resources.as_ref(),
        ) {
            warn!("submapping switch {index} in layout {name} failed: {err}");
        }
    }

    /// The active layout's name, or `None` in pass-through mode.
    pub fn loaded_layout_name(&self) -> Option<&str> {
        if self.layout.is_foreign() && self.layout.name() != PASSTHROUGH_NAME {
            Some(self.layout.name())
        } else {
            None
        }
    }

    /// The currently installed code page.
    pub fn loaded_codepage(&self) -> u16 {
        self.loaded_codepage
    }

    /// The active layout's first language code.
    pub fn main_language_code(&self) -> Option<&str> {
        self.layout.main_language_code()
    }

    /// Read access to the active layout, for diagnostics.
    pub fn active_layout(&self) -> &KeyboardLayout {
        &self.layout
    }

    /// Tears the session down: restores the ROM fonts if a non-default
    /// code page is installed in text mode, and drops the layout.
    pub fn shutdown(&mut self) {
        if self.loaded_codepage != DEFAULT_CODEPAGE && self.video.is_text_mode() {
            self.video.restore_rom_fonts();
            self.loaded_codepage = DEFAULT_CODEPAGE;
        }
        self.layout = KeyboardLayout::new();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::{MemoryResources, RecordingKeyBuffer, SimDos, SimVideo};
    use crate::format::kl::{build_kl, KeyRecord, Submapping};

    struct Harness {
        session: KeyboardSession,
        keys: Arc<RecordingKeyBuffer>,
        video: Arc<SimVideo>,
    }

    fn harness(resources: MemoryResources) -> Harness {
        let keys = Arc::new(RecordingKeyBuffer::new());
        let video = Arc::new(SimVideo::new());
        let session = KeyboardSession::new(
            Arc::new(resources),
            Arc::clone(&keys) as Arc<dyn crate::host::KeyBuffer>,
            Arc::clone(&video) as Arc<dyn crate::host::VideoAdapter>,
            Arc::new(SimDos::new()),
        );
        Harness { session, keys, video }
    }

    /// A single-submapping layout mapping scan 0x10 to 'q'/'Q'.
    fn qwerty_image(codepage: u16) -> Vec<u8> {
        build_kl(
            &[(0, "gr")],
            0,
            &[],
            &[Submapping {
                codepage,
                keys: vec![KeyRecord {
                    scan: 0x10,
                    flags: 0x01,
                    command_bits: 0,
                    entries: vec![u16::from(b'q'), u16::from(b'Q')],
                }],
                diacritics: Vec::new(),
            }],
        )
    }

    #[test]
    fn test_power_on_state_is_us_passthrough_437() {
        let h = harness(MemoryResources::new());
        assert_eq!(h.session.loaded_codepage(), DEFAULT_CODEPAGE);
        assert_eq!(h.session.loaded_layout_name(), None);
    }

    #[test]
    fn test_load_none_keeps_passthrough() {
        let mut h = harness(MemoryResources::new());
        h.session.load_layout("none", 437, "none").expect("none loads");
        assert_eq!(h.session.loaded_layout_name(), None);
        assert!(!h.session.translate_key(0x10, 0, 0, 0));
        assert!(h.keys.keys().is_empty());
    }

    #[test]
    fn test_load_layout_translates_and_reports_name() {
        let store = MemoryResources::new().with_file("gr.kl", qwerty_image(437));
        let mut h = harness(store);
        h.session.load_layout("gr", 437, "none").expect("gr loads");
        assert_eq!(h.session.loaded_layout_name(), Some("gr"));
        assert_eq!(h.session.main_language_code(), Some("gr"));
        assert!(h.session.translate_key(0x10, 0, 0, 0));
        assert_eq!(h.keys.keys(), vec![0x1000 | u16::from(b'q')]);
    }

    #[test]
    fn test_failed_layout_load_keeps_previous_layout() {
        let store = MemoryResources::new().with_file("gr.kl", qwerty_image(437));
        let mut h = harness(store);
        h.session.load_layout("gr", 437, "none").expect("gr loads");

        let result = h.session.load_layout("fr", 437, "none");
        assert_eq!(result, Err(KeybError::FileNotFound));
        assert_eq!(h.session.loaded_layout_name(), Some("gr"));
        assert!(h.session.translate_key(0x10, 0, 0, 0));
    }

    #[test]
    fn test_failed_codepage_load_discards_fresh_layout() {
        let store = MemoryResources::new().with_file("gr.kl", qwerty_image(0));
        let mut h = harness(store);
        // The wildcard layout parses, but no code-page source for 866
        // exists anywhere.
        let result = h.session.load_layout("gr", 866, "auto");
        assert_eq!(result, Err(KeybError::InvalidCpFile));
        assert_eq!(h.session.loaded_layout_name(), None);
        assert_eq!(h.session.loaded_codepage(), DEFAULT_CODEPAGE);
        assert!(!h.session.translate_key(0x10, 0, 0, 0));
    }

    #[test]
    fn test_switch_to_us_prefix_disables_translation_without_reparse() {
        let store = MemoryResources::new().with_file("gr.kl", qwerty_image(437));
        let mut h = harness(store);
        h.session.load_layout("gr", 437, "none").expect("gr loads");

        h.session.switch_layout("US").expect("US always succeeds");
        assert_eq!(h.session.loaded_layout_name(), None);
        assert!(!h.session.translate_key(0x10, 0, 0, 0));

        // The tables survive: switching back by language code restores
        // translation without touching the store.
        h.session.switch_layout("gr").expect("language code hit");
        assert!(h.session.translate_key(0x10, 0, 0, 0));
        assert_eq!(h.keys.keys(), vec![0x1000 | u16::from(b'q')]);
    }

    #[test]
    fn test_switch_to_unknown_layout_reports_file_not_found() {
        let store = MemoryResources::new().with_file("gr.kl", qwerty_image(437));
        let mut h = harness(store);
        h.session.load_layout("gr", 437, "none").expect("gr loads");

        let err = h.session.switch_layout("xx999").unwrap_err();
        assert_eq!(err.source, KeybError::FileNotFound);
        assert_eq!(err.attempted_codepage, Some(DEFAULT_CODEPAGE));
        assert_eq!(h.session.loaded_layout_name(), Some("gr"));
    }

    #[test]
    fn test_switch_foreign_layout_toggles() {
        let store = MemoryResources::new().with_file("gr.kl", qwerty_image(437));
        let mut h = harness(store);
        h.session.load_layout("gr", 437, "none").expect("gr loads");

        h.session.switch_foreign_layout();
        assert_eq!(h.session.loaded_layout_name(), None);
        h.session.switch_foreign_layout();
        assert_eq!(h.session.loaded_layout_name(), Some("gr"));
    }

    #[test]
    fn test_shutdown_restores_rom_fonts_for_foreign_codepage() {
        use crate::format::cpi::{build_cpi, FontSpec};

        let fonts = [FontSpec { height: 0x10, glyphs: Vec::new() }];
        let store = MemoryResources::new()
            .with_file("gr.kl", qwerty_image(858))
            .with_file("ega.cpi", build_cpi(858, &fonts));
        let mut h = harness(store);
        h.session.load_layout("gr", 858, "ega.cpi").expect("loads with fonts");
        assert_eq!(h.session.loaded_codepage(), 858);

        h.session.shutdown();
        assert_eq!(h.session.loaded_codepage(), DEFAULT_CODEPAGE);
        assert_eq!(h.video.restore_rom_font_calls(), 1);
        assert_eq!(h.session.loaded_layout_name(), None);
    }

    #[test]
    fn test_shutdown_without_foreign_codepage_leaves_fonts_alone() {
        let mut h = harness(MemoryResources::new());
        h.session.shutdown();
        assert_eq!(h.video.restore_rom_font_calls(), 0);
    }

    #[test]
    fn test_submapping_switch_command_reparses_current_file() {
        // Submapping 0 is a wildcard with the switch command on scan
        // 0x02; submapping 1 remaps scan 0x10 to 'z'.
        let image = build_kl(
            &[(0, "gr")],
            0,
            &[],
            &[
                Submapping {
                    codepage: 0,
                    keys: vec![
                        KeyRecord {
                            scan: 0x02,
                            flags: 0x00,
                            command_bits: 0x01,
                            entries: vec![120], // switch to submapping 1
                        },
                        KeyRecord {
                            scan: 0x10,
                            flags: 0x00,
                            command_bits: 0,
                            entries: vec![u16::from(b'q')],
                        },
                    ],
                    diacritics: Vec::new(),
                },
                Submapping {
                    codepage: 437,
                    keys: vec![KeyRecord {
                        scan: 0x10,
                        flags: 0x00,
                        command_bits: 0,
                        entries: vec![u16::from(b'z')],
                    }],
                    diacritics: Vec::new(),
                },
            ],
        );
        let store = MemoryResources::new().with_file("gr.kl", image);
        let mut h = harness(store);
        h.session.load_layout("gr", 437, "none").expect("loads");

        assert!(h.session.translate_key(0x02, 0, 0, 0), "command consumed");
        assert!(h.session.translate_key(0x10, 0, 0, 0));
        assert_eq!(h.keys.keys(), vec![0x1000 | u16::from(b'z')]);
    }
}
