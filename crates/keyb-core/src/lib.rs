//! # keyb-core
//!
//! A DOS-compatible keyboard-layout and code-page engine.  It parses the
//! binary layout files shipped with MS-DOS and FreeDOS (`.KL` layouts,
//! `.KCL` layout libraries, `.CPI`/`.CPX` code-page information files) and
//! uses the parsed tables to translate raw keyboard scan codes — qualified
//! by shift/ctrl/alt/lock/user modifier state — into the 16-bit
//! scan/character words a legacy DOS program expects in its BIOS keyboard
//! buffer.  Loading a code page also installs the page's screen font into
//! the emulated video adapter's font memory.
//!
//! This crate has zero dependencies on OS APIs, UI frameworks, or any
//! concrete emulator.  Everything the engine needs from its host — opening
//! named resources, enqueueing keys into the BIOS buffer, writing video
//! font memory, running real-mode code for UPX decompression — is a trait
//! in [`host`], injected into the [`session::KeyboardSession`].
//!
//! # Architecture overview
//!
//! - **`format`** – How bytes on disk become tables.  Bounds-checked
//!   little-endian reads ([`format::reader`]), the `.KCL` library index
//!   ([`format::kcl`]), the `.KL` layout parser ([`format::kl`]), and the
//!   `.CPI`/`.CPX` code-page parser with its UPX trampoline
//!   ([`format::cpi`]).
//!
//! - **`domain`** – Pure keystroke logic with no I/O.  The central piece
//!   is [`domain::layout::KeyboardLayout`]: a 12-plane translation table
//!   per scan code, modifier-plane predicates, and the dead-key
//!   composition state machine.
//!
//! - **`session`** – The lifecycle protocol: load a layout and its code
//!   page atomically, switch layouts with rollback on partial failure,
//!   translate keystrokes, tear down.
//!
//! - **`host`** – The capability seams, plus [`host::sim`] with recording
//!   simulations used by the test suite and the `keyb` CLI.

pub mod domain;
pub mod error;
pub mod font;
pub mod format;
pub mod host;
pub mod session;

// Re-export the most-used types at the crate root so callers can write
// `keyb_core::KeyboardSession` instead of the full path.
pub use domain::codepage::DEFAULT_CODEPAGE;
pub use domain::layout::{KeyboardLayout, MAX_SCAN_CODE};
pub use error::{KeybError, SwitchError};
pub use session::KeyboardSession;
