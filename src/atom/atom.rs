//! MP4 atom tree, built incrementally by the parser.
//!
//! Containers own their children. The tree only lives until
//! `moov` is complete and has been folded into tracks.

use std::io::Cursor;

use binrw::{BinReaderExt, BinRead};

use crate::{errors::Mp4Error, fourcc::FourCC};

/// MP4 atom. Either a buffered leaf or a container with children.
#[derive(Debug, Clone)]
pub enum Atom {
    Leaf(LeafAtom),
    Container(ContainerAtom),
}

impl Atom {
    pub fn name(&self) -> FourCC {
        match self {
            Self::Leaf(leaf) => leaf.name,
            Self::Container(container) => container.name,
        }
    }
}

/// Leaf atom with its data load (excludes header) buffered in memory.
#[derive(Debug, Clone)]
pub struct LeafAtom {
    pub(crate) name: FourCC,
    pub(crate) data: Vec<u8>,
}

impl LeafAtom {
    pub fn new(name: FourCC, data: Vec<u8>) -> Self {
        Self {name, data}
    }

    pub fn name(&self) -> FourCC {
        self.name
    }

    /// Data load, excluding header.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode the data load as a Big Endian binrw structure.
    pub fn read<T>(&self) -> Result<T, Mp4Error>
        where
            T: BinRead,
            <T as BinRead>::Args<'static>: Sized + Clone + Default
    {
        let mut cursor = Cursor::new(&self.data);
        Ok(cursor.read_be::<T>()?)
    }
}

/// Container atom with ordered leaf and container children.
#[derive(Debug, Clone)]
pub struct ContainerAtom {
    pub(crate) name: FourCC,
    /// Absolute byte offset where this container ends.
    pub(crate) end_offset: u64,
    pub(crate) leaves: Vec<LeafAtom>,
    pub(crate) containers: Vec<ContainerAtom>,
}

impl ContainerAtom {
    pub fn new(name: FourCC, end_offset: u64) -> Self {
        Self {
            name,
            end_offset,
            leaves: Vec::new(),
            containers: Vec::new(),
        }
    }

    pub fn name(&self) -> FourCC {
        self.name
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn add(&mut self, atom: Atom) {
        match atom {
            Atom::Leaf(leaf) => self.leaves.push(leaf),
            Atom::Container(container) => self.containers.push(container),
        }
    }

    pub fn leaves(&self) -> &[LeafAtom] {
        &self.leaves
    }

    pub fn containers(&self) -> &[ContainerAtom] {
        &self.containers
    }

    /// First leaf child with specified FourCC.
    pub fn leaf(&self, name: FourCC) -> Option<&LeafAtom> {
        self.leaves.iter().find(|l| l.name == name)
    }

    /// First container child with specified FourCC.
    pub fn container(&self, name: FourCC) -> Option<&ContainerAtom> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Like `leaf()`, but a missing atom is an error.
    pub(crate) fn require_leaf(&self, name: FourCC) -> Result<&LeafAtom, Mp4Error> {
        self.leaf(name)
            .ok_or_else(|| Mp4Error::NoSuchAtom(format!("{}/{}", self.name, name)))
    }

    /// Like `container()`, but a missing atom is an error.
    pub(crate) fn require_container(&self, name: FourCC) -> Result<&ContainerAtom, Mp4Error> {
        self.container(name)
            .ok_or_else(|| Mp4Error::NoSuchAtom(format!("{}/{}", self.name, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_children_in_order() {
        let mut stbl = ContainerAtom::new(FourCC::Stbl, 200);
        stbl.add(Atom::Leaf(LeafAtom::new(FourCC::Stsz, vec![1])));
        stbl.add(Atom::Leaf(LeafAtom::new(FourCC::Stco, vec![2])));
        let mut minf = ContainerAtom::new(FourCC::Minf, 200);
        minf.add(Atom::Container(stbl));

        let stbl = minf.container(FourCC::Stbl).unwrap();
        assert_eq!(stbl.leaves().len(), 2);
        assert_eq!(stbl.leaf(FourCC::Stco).unwrap().data(), &[2]);
        assert!(stbl.leaf(FourCC::Stss).is_none());
        assert!(matches!(minf.require_leaf(FourCC::Vmhd), Err(Mp4Error::NoSuchAtom(_))));
    }

    #[test]
    fn decodes_leaf_payload() {
        let leaf = LeafAtom::new(FourCC::Custom(*b"test"), vec![0, 0, 1, 0]);
        assert_eq!(leaf.read::<u32>().unwrap(), 256);
        assert!(leaf.read::<u64>().is_err());
    }
}
