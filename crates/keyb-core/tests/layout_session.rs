//! End-to-end scenarios for the keyboard session.
//!
//! These tests drive the public API — `KeyboardSession` over the
//! simulated host — against synthetic `.KL`, `.KCL`, `.CPI` and packed
//! `.CPX` images built by the helpers at the bottom.  They cover the
//! load/switch/translate lifecycle: pass-through identity, shift-plane
//! selection, dead-key composition, switch rollback atomicity, library
//! precedence, and UPX-packed code-page loading with the decompressed
//! image pinned by SHA-256.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use keyb_core::domain::layout::PlanePredicate;
use keyb_core::host::sim::{MemoryResources, RecordingKeyBuffer, SimDos, SimVideo};
use keyb_core::host::FontBank;
use keyb_core::{KeybError, KeyboardSession};

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    session: KeyboardSession,
    keys: Arc<RecordingKeyBuffer>,
    video: Arc<SimVideo>,
    dos: Arc<SimDos>,
}

fn harness(resources: MemoryResources) -> Harness {
    let keys = Arc::new(RecordingKeyBuffer::new());
    let video = Arc::new(SimVideo::new());
    let dos = Arc::new(SimDos::new());
    let session = KeyboardSession::new(
        Arc::new(resources),
        Arc::clone(&keys) as Arc<dyn keyb_core::host::KeyBuffer>,
        Arc::clone(&video) as Arc<dyn keyb_core::host::VideoAdapter>,
        Arc::clone(&dos) as Arc<dyn keyb_core::host::DosMemory>,
    );
    Harness { session, keys, video, dos }
}

// ── Scenario 1: US pass-through ───────────────────────────────────────────────

#[test]
fn us_passthrough_translates_nothing() {
    let mut h = harness(MemoryResources::new());
    h.session.load_layout("none", 437, "none").expect("none loads");

    assert!(!h.session.translate_key(0x1E, 0, 0, 0));
    assert!(h.keys.keys().is_empty(), "key buffer must stay empty");
    assert_eq!(h.session.loaded_layout_name(), None);
}

/// Identity property: in pass-through mode no input has side effects.
#[test]
fn passthrough_is_identity_for_all_flag_combinations() {
    let mut h = harness(MemoryResources::new());
    h.session.load_layout("none", 437, "none").expect("none loads");

    for scan in 0u8..=0x60 {
        for flags1 in [0x00u8, 0x01, 0x02, 0x04, 0x40, 0x43, 0x7F] {
            assert!(!h.session.translate_key(scan, flags1, 0x02, 0x02));
        }
    }
    assert!(h.keys.keys().is_empty());
}

// ── Scenario 2: shift plane ───────────────────────────────────────────────────

#[test]
fn qwertz_shift_plane_yields_uppercase_pair() {
    let image = KlBuilder::new("gr")
        .key(0x10, 0x41, 0, &[u16::from(b'q'), u16::from(b'Q')])
        .build(437);
    let mut h = harness(MemoryResources::new().with_file("gr.kl", image));
    h.session.load_layout("gr", 437, "none").expect("gr loads");

    assert!(h.session.translate_key(0x10, 0x01, 0, 0), "left shift + Q key");
    assert_eq!(h.keys.keys(), vec![0x1051], "scan 0x10, character 'Q'");
}

// ── Scenarios 3 and 4: dead keys ──────────────────────────────────────────────

/// A French-flavoured layout: scan 0x1A is a dead circumflex, 0x12 is
/// 'e', 0x10 is 'q'.
fn french_image() -> Vec<u8> {
    KlBuilder::new("fr")
        .key(0x1A, 0x00, 0x01, &[200])
        .key(0x12, 0x00, 0, &[u16::from(b'e')])
        .key(0x10, 0x00, 0, &[u16::from(b'q')])
        .diacritic(b'^', &[(b'e', 0xEA)])
        .build(437)
}

#[test]
fn dead_key_circumflex_composes_e_hat() {
    let mut h = harness(MemoryResources::new().with_file("fr.kl", french_image()));
    h.session.load_layout("fr", 437, "none").expect("fr loads");

    assert!(h.session.translate_key(0x1A, 0, 0, 0), "dead key is consumed");
    assert!(h.keys.keys().is_empty(), "nothing is emitted yet");
    assert!(h.session.translate_key(0x12, 0, 0, 0));
    assert_eq!(h.keys.keys(), vec![0x1200 | 0xEA], "exactly one composed value");
}

#[test]
fn dead_key_with_nonmatching_literal_emits_standard_byte() {
    let mut h = harness(MemoryResources::new().with_file("fr.kl", french_image()));
    h.session.load_layout("fr", 437, "none").expect("fr loads");

    h.session.translate_key(0x1A, 0, 0, 0);
    assert!(h.session.translate_key(0x10, 0, 0, 0));
    assert_eq!(
        h.keys.keys(),
        vec![0x1000 | u16::from(b'^')],
        "the sub-table's standard byte rides the literal's scan code"
    );
}

/// Modifier transparency: a modifier-only scan between the lead and the
/// literal neither cancels nor advances the composition.
#[test]
fn modifiers_are_transparent_inside_a_composition() {
    for modifier in [0x1Du8, 0x2A, 0x36, 0x38, 0x3A, 0x45, 0x46] {
        let mut h = harness(MemoryResources::new().with_file("fr.kl", french_image()));
        h.session.load_layout("fr", 437, "none").expect("fr loads");

        h.session.translate_key(0x1A, 0, 0, 0);
        h.session.translate_key(modifier, 0, 0, 0);
        h.session.translate_key(0x12, 0, 0, 0);
        assert_eq!(
            h.keys.keys(),
            vec![0x1200 | 0xEA],
            "modifier 0x{modifier:02X} must not disturb the composition"
        );
    }
}

// ── Scenario 5: switch rollback ───────────────────────────────────────────────

/// Inputs used to fingerprint translation behaviour around a switch.
const PROBES: [(u8, u8); 6] =
    [(0x10, 0x00), (0x10, 0x01), (0x12, 0x00), (0x1A, 0x00), (0x1E, 0x00), (0x3A, 0x40)];

fn capture(h: &mut Harness) -> Vec<(bool, Vec<u16>)> {
    PROBES
        .iter()
        .map(|&(scan, flags1)| {
            h.keys.clear();
            let handled = h.session.translate_key(scan, flags1, 0, 0);
            (handled, h.keys.keys())
        })
        .collect()
}

#[test]
fn failed_switch_leaves_translation_byte_identical() {
    let mut h = harness(MemoryResources::new().with_file("fr.kl", french_image()));
    h.session.load_layout("fr", 437, "none").expect("fr loads");
    let before = capture(&mut h);

    let err = h.session.switch_layout("xx999").unwrap_err();
    assert_eq!(err.source, KeybError::FileNotFound);
    assert_eq!(h.session.loaded_layout_name(), Some("fr"));

    let after = capture(&mut h);
    assert_eq!(before, after, "failed switch must not change behaviour");
}

#[test]
fn switch_by_language_code_and_back_to_us() {
    let mut h = harness(MemoryResources::new().with_file("fr.kl", french_image()));
    h.session.load_layout("fr", 437, "none").expect("fr loads");

    h.session.switch_layout("us").expect("US always succeeds");
    assert_eq!(h.session.loaded_layout_name(), None);
    assert!(!h.session.translate_key(0x12, 0, 0, 0));

    h.session.switch_layout("fr").expect("language code matches");
    assert_eq!(h.session.loaded_layout_name(), Some("fr"));
    assert!(h.session.translate_key(0x12, 0, 0, 0));
}

// ── Library precedence ────────────────────────────────────────────────────────

/// An exact primary id in a later library must beat a secondary alias in
/// an earlier one: the first-id pass runs over every library before any
/// alias pass starts.
#[test]
fn primary_id_in_later_library_beats_alias_in_earlier_one() {
    // keyboard.sys: a record whose *second* code is "de".
    let alias_payload = KlBuilder::new("gr").code("de").key(0x10, 0, 0, &[u16::from(b'a')]).payload(437);
    // keybrd2.sys: a record whose primary code is "de".
    let primary_payload = KlBuilder::new("de").key(0x10, 0, 0, &[u16::from(b'b')]).payload(437);

    let store = MemoryResources::new()
        .with_file("keyboard.sys", kcl_library(&[alias_payload.as_slice()]))
        .with_file("keybrd2.sys", kcl_library(&[primary_payload.as_slice()]));
    let mut h = harness(store);
    h.session.load_layout("de", 437, "none").expect("de resolves");

    assert!(h.session.translate_key(0x10, 0, 0, 0));
    assert_eq!(h.keys.keys(), vec![0x1000 | u16::from(b'b')], "primary hit wins");
}

#[test]
fn alias_resolves_when_no_primary_exists_anywhere() {
    let alias_payload = KlBuilder::new("gr").code("de").key(0x10, 0, 0, &[u16::from(b'a')]).payload(437);
    let store =
        MemoryResources::new().with_file("keyboard.sys", kcl_library(&[alias_payload.as_slice()]));
    let mut h = harness(store);
    h.session.load_layout("de", 437, "none").expect("alias resolves");

    assert!(h.session.translate_key(0x10, 0, 0, 0));
    assert_eq!(h.keys.keys(), vec![0x1000 | u16::from(b'a')]);
}

// ── Scenario 6: UPX-packed code page ──────────────────────────────────────────

/// Installs the far-call hook that plays the UPX stub: it clears the
/// payload region and writes `plain` at the trampoline data address.
fn install_stub(dos: &SimDos, plain: Vec<u8>) {
    dos.set_far_call_hook(Box::new(move |memory, segment, offset| {
        assert_eq!(offset, 0x100, "the stub entry point is segment:0x100");
        let base = ((segment as usize) << 4) + 0x100;
        memory[base..base + 65536].fill(0);
        memory[base..base + plain.len()].copy_from_slice(&plain);
    }));
}

#[test]
fn upx_packed_cpx_loads_fonts_and_codepage() {
    let glyphs: Vec<u8> = (0..256 * 16).map(|i| (i % 253) as u8).collect();
    let plain = cpi_image(850, 0x10, &glyphs);
    let packed = packed_container();

    let store = MemoryResources::new()
        .with_file("gr.kl", KlBuilder::new("gr").key(0x10, 0, 0, &[u16::from(b'q')]).build(0))
        .with_file("EGA.CPX", packed);
    let mut h = harness(store);
    install_stub(&h.dos, plain);

    h.session.load_layout("gr", 850, "auto").expect("packed code page loads");
    assert_eq!(h.session.loaded_codepage(), 850);
    assert_eq!(
        h.video.font_bytes(FontBank::Font16, 256 * 16),
        glyphs,
        "16-line glyphs must land in video font memory"
    );
    assert_eq!(h.video.font_bytes(FontBank::Font16Alternate, 1), vec![0]);
    assert_eq!(h.dos.far_calls().len(), 1, "exactly one trampoline call");
    assert!(h.dos.live_allocations().is_empty(), "scratch segment freed");
}

/// Pins the decompressed image by SHA-256, so a real-mode trampoline and
/// a native UPX implementation are interchangeable: both must produce
/// the identical 64 KiB scratch image.
#[test]
fn unpacked_image_is_pinned_by_sha256() {
    let glyphs: Vec<u8> = (0..256 * 16).map(|i| (i % 247) as u8).collect();
    let plain = cpi_image(850, 0x10, &glyphs);
    let mut expected = plain.clone();
    expected.resize(65536, 0);
    let expected_digest = Sha256::digest(&expected);

    let dos = SimDos::new();
    install_stub(&dos, plain);
    let packed = packed_container();
    // The UPX marker sits at offset 32; the scan position is 37.
    let unpacked =
        keyb_core::format::cpi::unpack_cpx(&dos, packed, 37).expect("unpack succeeds");

    assert_eq!(unpacked.len(), 65536);
    assert_eq!(
        Sha256::digest(&unpacked),
        expected_digest,
        "decompressed bytes must match the pinned image"
    );
}

// ── Bounds: adversarial truncation ────────────────────────────────────────────

/// Every truncation of a well-formed KL file either loads or fails with
/// an error; nothing may panic or read out of range.
#[test]
fn truncated_layout_files_never_panic() {
    let image = french_image();
    for cut in 0..image.len() {
        let store = MemoryResources::new().with_file("fr.kl", image[..cut].to_vec());
        let mut h = harness(store);
        let _ = h.session.load_layout("fr", 437, "none");
    }
}

/// Same for CPI images, including ones with wild internal offsets.
#[test]
fn truncated_codepage_files_never_panic() {
    let glyphs: Vec<u8> = vec![0xAA; 256 * 16];
    let image = cpi_image(850, 0x10, &glyphs);
    for cut in (0..image.len()).step_by(97) {
        let store = MemoryResources::new().with_file("ega.cpi", image[..cut].to_vec());
        let mut h = harness(store);
        let result = h.session.load_layout("none", 850, "ega.cpi");
        assert!(result.is_err() || cut == 0, "truncated CPI at {cut} must fail");
    }
}

// ── Plane predicates through the full stack ───────────────────────────────────

#[test]
fn altgr_plane_is_selected_by_predicate_masks() {
    let image = KlBuilder::new("gr")
        .planes(1, &[PlanePredicate {
            required_flags: 0x0008,
            forbidden_flags: 0x0004,
            required_userflags: 0,
            forbidden_userflags: 0,
        }])
        .key(0x12, 0x02, 0, &[u16::from(b'e'), u16::from(b'E'), 0x80 | 0x04])
        .build(437);
    let mut h = harness(MemoryResources::new().with_file("gr.kl", image));
    h.session.load_layout("gr", 437, "none").expect("gr loads");

    assert!(h.session.translate_key(0x12, 0x08, 0, 0), "alt selects plane 2");
    assert_eq!(h.keys.keys(), vec![0x1200 | 0x84]);
}

// ── Builders ──────────────────────────────────────────────────────────────────

struct KlKey {
    scan: u8,
    flags: u8,
    command_bits: u8,
    entries: Vec<u16>,
}

/// Builds single-submapping `.KL` images for the scenarios above.
struct KlBuilder {
    codes: Vec<String>,
    additional_planes: u8,
    predicates: Vec<PlanePredicate>,
    keys: Vec<KlKey>,
    diacritics: Vec<(u8, Vec<(u8, u8)>)>,
}

impl KlBuilder {
    fn new(code: &str) -> Self {
        Self {
            codes: vec![code.to_string()],
            additional_planes: 0,
            predicates: Vec::new(),
            keys: Vec::new(),
            diacritics: Vec::new(),
        }
    }

    /// Adds a secondary language code.
    fn code(mut self, code: &str) -> Self {
        self.codes.push(code.to_string());
        self
    }

    fn planes(mut self, count: u8, predicates: &[PlanePredicate]) -> Self {
        self.additional_planes = count;
        self.predicates = predicates.to_vec();
        self
    }

    fn key(mut self, scan: u8, flags: u8, command_bits: u8, entries: &[u16]) -> Self {
        self.keys.push(KlKey { scan, flags, command_bits, entries: entries.to_vec() });
        self
    }

    fn diacritic(mut self, lead: u8, pairs: &[(u8, u8)]) -> Self {
        self.diacritics.push((lead, pairs.to_vec()));
        self
    }

    /// Serialises the payload (the part a KCL record embeds).
    fn payload(&self, codepage: u16) -> Vec<u8> {
        let mut codes = Vec::new();
        for code in &self.codes {
            codes.extend_from_slice(&0u16.to_le_bytes());
            codes.extend_from_slice(code.as_bytes());
            codes.push(b',');
        }

        let mut cb = vec![1u8, self.additional_planes];
        cb.resize(0x14, 0);

        let tail_base = 0x14 + 8 + self.predicates.len() * 8;
        let mut tail = Vec::new();

        let table_offset = if self.keys.is_empty() {
            0u16
        } else {
            let offset = (tail_base + tail.len()) as u16;
            for key in &self.keys {
                tail.push(key.scan);
                tail.push(key.flags);
                tail.push(key.command_bits);
                for entry in &key.entries {
                    tail.push((entry & 0xFF) as u8);
                    if key.flags & 0x80 != 0 {
                        tail.push((entry >> 8) as u8);
                    }
                }
            }
            tail.push(0);
            offset
        };
        let diacritics_offset = if self.diacritics.is_empty() {
            0u16
        } else {
            let offset = (tail_base + tail.len()) as u16;
            for (lead, pairs) in &self.diacritics {
                tail.push(*lead);
                tail.push(pairs.len() as u8);
                for (ch, combined) in pairs {
                    tail.push(*ch);
                    tail.push(*combined);
                }
            }
            tail.push(0);
            offset
        };

        let mut descriptor = Vec::new();
        descriptor.extend_from_slice(&codepage.to_le_bytes());
        descriptor.extend_from_slice(&table_offset.to_le_bytes());
        descriptor.extend_from_slice(&diacritics_offset.to_le_bytes());
        descriptor.extend_from_slice(&[0, 0]);

        let mut predicate_block = Vec::new();
        for predicate in &self.predicates {
            predicate_block.extend_from_slice(&predicate.required_flags.to_le_bytes());
            predicate_block.extend_from_slice(&predicate.forbidden_flags.to_le_bytes());
            predicate_block.extend_from_slice(&predicate.required_userflags.to_le_bytes());
            predicate_block.extend_from_slice(&predicate.forbidden_userflags.to_le_bytes());
        }

        let mut payload = vec![codes.len() as u8];
        payload.extend_from_slice(&codes);
        payload.extend_from_slice(&cb);
        payload.extend_from_slice(&descriptor);
        payload.extend_from_slice(&predicate_block);
        payload.extend_from_slice(&tail);
        payload
    }

    /// Serialises a bare `.KL` file.
    fn build(&self, codepage: u16) -> Vec<u8> {
        let mut out = vec![0x4B, 0x4C, 0x46, 0x01, 0x00];
        out.extend_from_slice(&self.payload(codepage));
        out
    }
}

/// Wraps KL payloads into a `.KCL` library image.
fn kcl_library(payloads: &[&[u8]]) -> Vec<u8> {
    let mut out = vec![0x4B, 0x43, 0x46, 0, 0, 0, 0];
    for payload in payloads {
        let record_len = (payload.len() - 1) as u16; // minus the data_len byte
        out.extend_from_slice(&record_len.to_le_bytes());
        out.extend_from_slice(payload);
    }
    out
}

/// Builds a plain CPI image with one display entry and one font table.
fn cpi_image(codepage: u16, height: u8, glyphs: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, b'F', b'O', b'N', b'T'];
    out.resize(0x13, 0);
    out.extend_from_slice(&0x17u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&[0, 0]);

    let entry_base = out.len();
    let header_ptr = (entry_base + 0x1A) as u32;
    let mut record = vec![0u8; 0x1A];
    record[0..4].copy_from_slice(&(header_ptr + 100).to_le_bytes()); // next: unused
    record[0x04..0x06].copy_from_slice(&1u16.to_le_bytes());
    record[0x0E..0x10].copy_from_slice(&codepage.to_le_bytes());
    record[0x16..0x1A].copy_from_slice(&header_ptr.to_le_bytes());
    out.extend_from_slice(&record);

    out.extend_from_slice(&1u16.to_le_bytes()); // font type: screen
    out.extend_from_slice(&1u16.to_le_bytes()); // one font
    out.extend_from_slice(&[0, 0]);
    out.push(height);
    out.extend_from_slice(&[8, 0, 0, 0, 0]);
    let expected = usize::from(height) * 256;
    let mut table = glyphs.to_vec();
    table.resize(expected, 0);
    out.extend_from_slice(&table);
    out
}

/// A fake UPX container: no CPI magic, `UPX!` at offset 32, version 13.
/// The decompression itself is played by the test's far-call hook.
fn packed_container() -> Vec<u8> {
    let mut out = vec![0u8; 600];
    out[0] = 0x4D; // arbitrary non-magic lead-in
    out[1] = 0x5A;
    out[32..36].copy_from_slice(b"UPX!");
    out[36] = 13;
    out
}
