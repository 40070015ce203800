//! ARM Cortex-M DWT comparator allocation: the data-watchpoint block has a
//! small, chip-reported number of comparator slots (`DWT_CTRL.NUMCOMP`),
//! each independently programmable to watch one address for read, write,
//! or either.

use crate::error::{EabError, Result};

pub const DWT_CTRL: u64 = 0xE000_1000;
const DWT_COMP_BASE: u64 = 0xE000_1020;
const DWT_COMP_STRIDE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Read,
    Write,
    ReadWrite,
}

impl WatchMode {
    /// DWT_FUNCTIONn.FUNCTION encoding for a data-address comparator
    /// (ARMv7-M Architecture Reference Manual, DWT_FUNCTIONn).
    fn function_bits(&self) -> u32 {
        match self {
            WatchMode::Read => 0b0101,
            WatchMode::Write => 0b0110,
            WatchMode::ReadWrite => 0b0111,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Comparator {
    pub index: u8,
    pub address: u64,
    pub label: String,
    pub mode: WatchMode,
    pub size_bytes: u8,
}

impl Comparator {
    pub fn comp_register(&self) -> u64 {
        DWT_COMP_BASE + self.index as u64 * DWT_COMP_STRIDE
    }

    pub fn mask_register(&self) -> u64 {
        self.comp_register() + 4
    }

    pub fn function_register(&self) -> u64 {
        self.comp_register() + 8
    }

    /// DWT_MASKn ignores the low `mask_bits` address bits; a 4-byte-aligned
    /// word needs 2, an 8-byte double needs 3, anything smaller needs 0.
    fn mask_bits(&self) -> u32 {
        match self.size_bytes {
            0 | 1 => 0,
            2..=3 => 1,
            4..=7 => 2,
            _ => 3,
        }
    }
}

/// Allocates and releases comparator slots, and knows how to program each
/// one via caller-supplied memory writes — it never touches a transport
/// directly, so it works the same whether the memory access goes through
/// J-Link, probe-rs, or a scripting-server backend.
pub struct ComparatorAllocator {
    numcomp: u8,
    slots: Vec<Option<Comparator>>,
}

impl ComparatorAllocator {
    pub fn new(numcomp: u8) -> Self {
        ComparatorAllocator { numcomp, slots: vec![None; numcomp as usize] }
    }

    /// Read `DWT_CTRL.NUMCOMP` (bits 31:28) via `memory_read` to discover
    /// how many comparators this core actually has.
    pub fn discover<F>(mut memory_read: F) -> Result<Self>
    where
        F: FnMut(u64, u8) -> Result<Vec<u8>>,
    {
        let raw = memory_read(DWT_CTRL, 4)?;
        if raw.len() < 4 {
            return Err(EabError::ConnectionLost("short read of DWT_CTRL".into()));
        }
        let ctrl = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let numcomp = ((ctrl >> 28) & 0xF) as u8;
        Ok(ComparatorAllocator::new(numcomp))
    }

    pub fn numcomp(&self) -> u8 {
        self.numcomp
    }

    fn lowest_free_index(&self) -> Option<u8> {
        self.slots.iter().position(Option::is_none).map(|i| i as u8)
    }

    /// Allocate the lowest free comparator slot and program it via
    /// `memory_write`. Returns [`EabError::Exhausted`] if every slot is
    /// already in use.
    pub fn allocate<F>(
        &mut self,
        address: u64,
        label: impl Into<String>,
        mode: WatchMode,
        size_bytes: u8,
        mut memory_write: F,
    ) -> Result<Comparator>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let index = self
            .lowest_free_index()
            .ok_or_else(|| EabError::Exhausted(format!("all {} DWT comparators in use", self.numcomp)))?;

        let comparator = Comparator { index, address, label: label.into(), mode, size_bytes };

        memory_write(comparator.comp_register(), &(address as u32).to_le_bytes())?;
        memory_write(comparator.mask_register(), &comparator.mask_bits().to_le_bytes())?;
        memory_write(comparator.function_register(), &mode.function_bits().to_le_bytes())?;

        self.slots[index as usize] = Some(comparator.clone());
        Ok(comparator)
    }

    /// Disable the comparator (function = 0, i.e. "disabled") and free the
    /// slot for reuse.
    pub fn release<F>(&mut self, index: u8, mut memory_write: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| EabError::InvalidArgument(format!("comparator index {index} out of range")))?;
        let Some(comparator) = slot.take() else {
            return Err(EabError::InvalidArgument(format!("comparator {index} is not allocated")));
        };
        memory_write(comparator.function_register(), &0u32.to_le_bytes())?;
        Ok(())
    }

    /// Disarm and free every occupied slot, the way `release` does for one.
    pub fn release_all<F>(&mut self, mut memory_write: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        for index in 0..self.numcomp {
            if self.slots[index as usize].is_some() {
                self.release(index, &mut memory_write)?;
            }
        }
        Ok(())
    }

    pub fn active(&self) -> impl Iterator<Item = &Comparator> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn allocates_lowest_free_index() {
        let mut alloc = ComparatorAllocator::new(2);
        let writes = RefCell::new(Vec::new());
        let write = |addr: u64, data: &[u8]| -> Result<()> {
            writes.borrow_mut().push((addr, data.to_vec()));
            Ok(())
        };

        let first = alloc.allocate(0x2000_0000, "a", WatchMode::Write, 4, write).unwrap();
        assert_eq!(first.index, 0);
        let second = alloc.allocate(0x2000_0010, "b", WatchMode::Read, 4, write).unwrap();
        assert_eq!(second.index, 1);
    }

    #[test]
    fn exhausted_when_all_slots_taken() {
        let mut alloc = ComparatorAllocator::new(1);
        let write = |_addr: u64, _data: &[u8]| -> Result<()> { Ok(()) };
        alloc.allocate(0x2000_0000, "a", WatchMode::Write, 4, write).unwrap();
        let err = alloc.allocate(0x2000_0004, "b", WatchMode::Write, 4, write).unwrap_err();
        assert_eq!(err.kind().as_str(), "exhausted");
    }

    #[test]
    fn release_frees_the_slot_for_reuse() {
        let mut alloc = ComparatorAllocator::new(1);
        let write = |_addr: u64, _data: &[u8]| -> Result<()> { Ok(()) };
        let c = alloc.allocate(0x2000_0000, "a", WatchMode::Write, 4, write).unwrap();
        alloc.release(c.index, write).unwrap();
        let reused = alloc.allocate(0x2000_0004, "b", WatchMode::Write, 4, write).unwrap();
        assert_eq!(reused.index, 0);
    }

    #[test]
    fn release_all_frees_every_occupied_slot() {
        let mut alloc = ComparatorAllocator::new(2);
        let write = |_addr: u64, _data: &[u8]| -> Result<()> { Ok(()) };
        alloc.allocate(0x2000_0000, "a", WatchMode::Write, 4, write).unwrap();
        alloc.allocate(0x2000_0010, "b", WatchMode::Read, 4, write).unwrap();
        alloc.release_all(write).unwrap();
        assert_eq!(alloc.active().count(), 0);
        let reused = alloc.allocate(0x2000_0020, "c", WatchMode::Write, 4, write).unwrap();
        assert_eq!(reused.index, 0);
    }

    #[test]
    fn discover_reads_numcomp_from_dwt_ctrl() {
        // NUMCOMP = 4 in bits 31:28.
        let ctrl_value: u32 = 4 << 28;
        let alloc = ComparatorAllocator::discover(|addr, _size| {
            assert_eq!(addr, DWT_CTRL);
            Ok(ctrl_value.to_le_bytes().to_vec())
        })
        .unwrap();
        assert_eq!(alloc.numcomp(), 4);
    }
}
