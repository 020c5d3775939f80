//! Atom header and the in-memory atom tree assembled while parsing `moov`.

mod atom;
mod header;

pub use atom::{Atom, ContainerAtom, LeafAtom};
pub use header::AtomHeader;
pub(crate) use header::ChildAtoms;
