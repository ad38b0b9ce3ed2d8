//! Flat register and stack image of one call.

use std::fmt;
use std::sync::Arc;

use binding::{CallingSequence, StorageClass, VMStorage};

use crate::{AbiDescriptor, Address};

/// Reads and writes the physical slot behind a storage.
pub trait StorageAccess {
    fn read(&self, storage: VMStorage) -> u64;
    fn write(&mut self, storage: VMStorage, bits: u64);
}

/// Byte offset of every storage a call may touch within one flat frame.
///
/// Classes are laid out in [`StorageClass`] order. Argument and return
/// registers are always present in full; the stack area covers the slots the
/// calling sequence uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    bases: [usize; StorageClass::COUNT],
    counts: [usize; StorageClass::COUNT],
    widths: [usize; StorageClass::COUNT],
    size: usize,
}

impl BufferLayout {
    pub fn new(abi: &AbiDescriptor, sequence: &CallingSequence) -> Self {
        let stack_slots = sequence
            .storages()
            .iter()
            .filter(|s| s.class() == StorageClass::Stack)
            .map(|s| usize::from(s.index()) + 1)
            .max()
            .unwrap_or(0);
        Self::with_stack_slots(abi, stack_slots)
    }

    pub fn with_stack_slots(abi: &AbiDescriptor, stack_slots: usize) -> Self {
        let mut bases = [0; StorageClass::COUNT];
        let mut counts = [0; StorageClass::COUNT];
        let mut widths = [0; StorageClass::COUNT];
        let mut offset = 0;
        for class in StorageClass::ALL {
            let i = class.index();
            counts[i] = match class {
                StorageClass::Stack => stack_slots,
                _ => abi.slot_count(class),
            };
            widths[i] = usize::from(abi.slot_size(class));
            bases[i] = offset;
            offset += counts[i] * widths[i];
        }
        Self {
            bases,
            counts,
            widths,
            size: offset,
        }
    }

    pub fn try_offset(&self, storage: VMStorage) -> Option<usize> {
        let i = storage.class().index();
        let index = usize::from(storage.index());
        (index < self.counts[i]).then(|| self.bases[i] + index * self.widths[i])
    }

    pub fn offset(&self, storage: VMStorage) -> usize {
        self.try_offset(storage)
            .unwrap_or_else(|| panic!("{storage} is not part of this frame layout"))
    }

    pub fn slot_count(&self, class: StorageClass) -> usize {
        self.counts[class.index()]
    }

    /// Frame size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Display for BufferLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for class in StorageClass::ALL {
            let i = class.index();
            if self.counts[i] == 0 {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{class}: +{} x{}", self.bases[i], self.counts[i])?;
        }
        write!(f, "}} {} bytes", self.size)
    }
}

/// Backing memory for one call's storages, shaped by a [`BufferLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    layout: Arc<BufferLayout>,
    words: Box<[u64]>,
}

impl CallFrame {
    pub fn new(layout: Arc<BufferLayout>) -> Self {
        let words = vec![0u64; layout.size().div_ceil(8)].into_boxed_slice();
        Self { layout, words }
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    #[inline(always)]
    pub fn read_word(&self, offset: usize) -> u64 {
        self.words[offset / 8]
    }

    #[inline(always)]
    pub fn write_word(&mut self, offset: usize, bits: u64) {
        self.words[offset / 8] = bits;
    }

    fn slot(&self, class: StorageClass, index: usize) -> usize {
        self.layout
            .offset(VMStorage::new(class, index as u16, 8))
    }

    fn get(&self, class: StorageClass, index: usize) -> u64 {
        self.read_word(self.slot(class, index))
    }

    fn put(&mut self, class: StorageClass, index: usize, bits: u64) {
        let offset = self.slot(class, index);
        self.write_word(offset, bits);
    }

    pub fn int_arg(&self, index: usize) -> i64 {
        self.get(StorageClass::IntegerArg, index) as i64
    }

    pub fn set_int_arg(&mut self, index: usize, value: i64) {
        self.put(StorageClass::IntegerArg, index, value as u64);
    }

    pub fn vector_arg(&self, index: usize) -> u64 {
        self.get(StorageClass::VectorArg, index)
    }

    pub fn set_vector_arg(&mut self, index: usize, bits: u64) {
        self.put(StorageClass::VectorArg, index, bits);
    }

    pub fn f64_arg(&self, index: usize) -> f64 {
        f64::from_bits(self.vector_arg(index))
    }

    pub fn f32_arg(&self, index: usize) -> f32 {
        f32::from_bits(self.vector_arg(index) as u32)
    }

    pub fn stack_arg(&self, index: usize) -> u64 {
        self.get(StorageClass::Stack, index)
    }

    pub fn set_stack_arg(&mut self, index: usize, bits: u64) {
        self.put(StorageClass::Stack, index, bits);
    }

    pub fn pointer_arg(&self, index: usize) -> Address {
        Address::new(self.get(StorageClass::IntegerArg, index))
    }

    /// Address in the dedicated indirect-result register.
    pub fn indirect_result(&self) -> Address {
        Address::new(self.get(StorageClass::IndirectResult, 0))
    }

    pub fn set_indirect_result(&mut self, address: Address) {
        self.put(StorageClass::IndirectResult, 0, address.bits());
    }

    pub fn int_return(&self, index: usize) -> i64 {
        self.get(StorageClass::IntegerReturn, index) as i64
    }

    pub fn set_int_return(&mut self, index: usize, value: i64) {
        self.put(StorageClass::IntegerReturn, index, value as u64);
    }

    pub fn vector_return(&self, index: usize) -> u64 {
        self.get(StorageClass::VectorReturn, index)
    }

    pub fn set_vector_return(&mut self, index: usize, bits: u64) {
        self.put(StorageClass::VectorReturn, index, bits);
    }

    pub fn set_f64_return(&mut self, value: f64) {
        self.set_vector_return(0, value.to_bits());
    }

    pub fn set_f32_return(&mut self, value: f32) {
        self.set_vector_return(0, u64::from(value.to_bits()));
    }
}

impl StorageAccess for CallFrame {
    fn read(&self, storage: VMStorage) -> u64 {
        self.read_word(self.layout.offset(storage))
    }

    fn write(&mut self, storage: VMStorage, bits: u64) {
        let offset = self.layout.offset(storage);
        self.write_word(offset, bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysv_layout_offsets() {
        let abi = AbiDescriptor::x86_64_sysv();
        let layout = BufferLayout::with_stack_slots(abi, 2);
        assert_eq!(layout.offset(abi.integer_argument(0)), 0);
        assert_eq!(layout.offset(abi.integer_argument(5)), 40);
        assert_eq!(layout.offset(abi.vector_argument(0)), 48);
        assert_eq!(layout.offset(abi.stack_slot(1)), 48 + 64 + 8);
        assert_eq!(layout.offset(abi.integer_return(0)), 128);
        assert_eq!(layout.slot_count(StorageClass::IndirectResult), 0);
        // rax rdx, xmm0 xmm1, st0 st1 at 16 bytes each
        assert_eq!(layout.size(), 128 + 16 + 16 + 32);
    }

    #[test]
    fn missing_storage_has_no_offset() {
        let abi = AbiDescriptor::x86_64_sysv();
        let layout = BufferLayout::with_stack_slots(abi, 0);
        assert_eq!(layout.try_offset(abi.stack_slot(0)), None);
        let x8 = VMStorage::new(StorageClass::IndirectResult, 0, 8);
        assert_eq!(layout.try_offset(x8), None);
    }

    #[test]
    fn typed_helpers_share_storage_slots() {
        let abi = AbiDescriptor::aarch64();
        let mut frame = CallFrame::new(Arc::new(BufferLayout::with_stack_slots(abi, 1)));
        frame.set_int_arg(1, -3);
        frame.set_stack_arg(0, 77);
        frame.set_indirect_result(Address::new(0x1000));
        frame.set_f64_return(2.5);
        assert_eq!(frame.read(abi.integer_argument(1)), (-3i64) as u64);
        assert_eq!(frame.read(abi.stack_slot(0)), 77);
        assert_eq!(frame.indirect_result(), Address::new(0x1000));
        assert_eq!(f64::from_bits(frame.read(abi.vector_return(0))), 2.5);
        frame.clear();
        assert!(frame.words().iter().all(|w| *w == 0));
    }
}
