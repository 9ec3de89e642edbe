//! Error taxonomy for layout and code-page loading.
//!
//! Translation itself (`translate_key`) cannot fail: unknown scan codes,
//! empty table entries, and exhausted dead-key tables all fall through to
//! pass-through.  Only the loaders surface errors, and a failed load or
//! switch always leaves the session on its previous state.

use thiserror::Error;

/// Failure classes reported by the layout and code-page loaders.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KeybError {
    /// No `.KL` file, no `.KCL` library, and no bundled blob contains the
    /// requested layout id.
    #[error("keyboard layout file not found")]
    FileNotFound,

    /// Magic mismatch, truncated record, or an offset pointing outside the
    /// file in a KL/KCL image.
    #[error("keyboard layout file is invalid")]
    InvalidFile,

    /// The file parsed, but no submapping matches the requested code page
    /// and no wildcard submapping exists.
    #[error("no matching layout for the requested code page")]
    LayoutNotFound,

    /// A CPI/CPX file failed its signature check, decompression, or does
    /// not provide the requested code page.
    #[error("invalid or unsuitable code page file")]
    InvalidCpFile,
}

/// Error returned by [`crate::session::KeyboardSession::switch_layout`].
///
/// Carries the code page the switch attempted to load, so the caller can
/// report which page was tried even though the previous layout remains
/// active.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("layout switch failed: {source}")]
pub struct SwitchError {
    #[source]
    pub source: KeybError,
    /// The code page the failed switch attempted, when one was resolved.
    pub attempted_codepage: Option<u16>,
}
