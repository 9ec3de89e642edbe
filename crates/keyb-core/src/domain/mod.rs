//! Pure keystroke-translation logic, no I/O.
//!
//! [`layout::KeyboardLayout`] is the central entity: the 12-plane
//! translation table, modifier-plane predicates, and the dead-key
//! composition state machine.  [`codepage`] carries the closed table
//! mapping code-page ids to the bundled `EGA*.CPX` files.

pub mod codepage;
pub mod layout;
