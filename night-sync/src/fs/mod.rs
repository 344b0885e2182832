//! Local file system layout and enumeration.

pub mod layout;
