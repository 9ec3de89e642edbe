//! Binary file-format parsers.
//!
//! Four related on-disk formats feed the engine, all little-endian:
//!
//! | Format | Magic | Contents |
//! |--------|-------|----------|
//! | `.KL`  | `4B 4C 46` ("KLF") | one keyboard layout: submappings, planes, diacritics |
//! | `.KCL` | `4B 43 46` ("KCF") | a library of KL payloads indexed by language code |
//! | `.CPI` | `FF 46 4F 4E 54` ("\xFFFONT") | code-page screen fonts |
//! | `.CPX` | ASCII `UPX!` within the first bytes | a CPI compressed by UPX ≥ 10 |
//!
//! All parsing goes through [`reader::ByteReader`]; no raw offset
//! arithmetic escapes bounds checking, so adversarial files of any shape
//! fail with an error instead of reading out of range.

pub mod cpi;
pub mod kcl;
pub mod kl;
pub mod reader;

/// Largest payload any KL/KCL/CPI image may occupy: a 64 KiB scratch
/// buffer is sufficient for every real-world layout and code-page file.
pub(crate) const SCRATCH_SIZE: usize = 65536;
