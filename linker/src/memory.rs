//! Native memory: raw addresses and the segments that bound them.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use binding::Primitive;

use crate::Value;

/// A raw machine address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u64);

impl Address {
    pub const NULL: Address = Address(0);

    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }

    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Zeroed heap memory with a fixed layout, freed on drop.
#[derive(Debug)]
pub struct NativeBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer is plain bytes owned by this value; access goes through
// raw pointers guarded by the owning segment's bounds checks.
unsafe impl Send for NativeBuffer {}
unsafe impl Sync for NativeBuffer {}

impl NativeBuffer {
    pub fn zeroed(size: usize, alignment: usize) -> Self {
        let layout = Layout::from_size_align(size.max(1), alignment.max(1))
            .unwrap_or_else(|_| panic!("invalid buffer layout {size}/{alignment}"));
        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };
        Self { ptr, layout }
    }

    pub fn address(&self) -> Address {
        Address::from_ptr(self.ptr.as_ptr())
    }

    pub fn capacity(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Who keeps a segment's memory alive.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Foreign memory whose lifetime is not tracked.
    Global,
    Owned(Arc<NativeBuffer>),
    /// Scratch memory of a binding context; dead once the context closes.
    Context(Arc<AtomicBool>),
}

/// A bounded view of native memory.
///
/// Every access is checked against the segment length and the liveness of
/// its scope. A failed check is a marshalling defect and panics.
#[derive(Debug, Clone)]
pub struct Segment {
    address: Address,
    len: usize,
    scope: Scope,
}

impl Segment {
    /// Fresh zeroed memory owned by the returned segment and its clones.
    pub fn allocate(size: usize, alignment: usize) -> Self {
        let buffer = Arc::new(NativeBuffer::zeroed(size, alignment));
        Self {
            address: buffer.address(),
            len: size,
            scope: Scope::Owned(buffer),
        }
    }

    /// # Safety
    /// `address..address + len` must be readable and writable for as long as
    /// the segment is used.
    pub unsafe fn global(address: Address, len: usize) -> Self {
        Self {
            address,
            len,
            scope: Scope::Global,
        }
    }

    pub(crate) fn in_context(
        address: Address,
        len: usize,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            address,
            len,
            scope: Scope::Context(alive),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_alive(&self) -> bool {
        match &self.scope {
            Scope::Context(alive) => alive.load(Ordering::Acquire),
            Scope::Global | Scope::Owned(_) => true,
        }
    }

    fn check(&self, offset: usize, size: usize) {
        assert!(
            self.is_alive(),
            "access to segment {} after its scope was closed",
            self.address
        );
        assert!(
            offset.checked_add(size).is_some_and(|end| end <= self.len),
            "access of {size} bytes at +{offset} is outside segment of {} bytes",
            self.len
        );
    }

    fn ptr(&self, offset: usize) -> *mut u8 {
        self.address.add(offset).as_ptr()
    }

    /// Read the `ty` field at `offset`.
    pub fn get(&self, ty: Primitive, offset: usize) -> Value {
        self.check(offset, ty.byte_size());
        let p = self.ptr(offset);
        // SAFETY: bounds and liveness checked above
        unsafe {
            match ty {
                Primitive::Bool => Value::Bool(p.read() != 0),
                Primitive::I8 => Value::I8(p.cast::<i8>().read()),
                Primitive::I16 => Value::I16(p.cast::<i16>().read_unaligned()),
                Primitive::Char => Value::Char(p.cast::<u16>().read_unaligned()),
                Primitive::I32 => Value::I32(p.cast::<i32>().read_unaligned()),
                Primitive::I64 => Value::I64(p.cast::<i64>().read_unaligned()),
                Primitive::F32 => Value::F32(p.cast::<f32>().read_unaligned()),
                Primitive::F64 => Value::F64(p.cast::<f64>().read_unaligned()),
            }
        }
    }

    /// Write a primitive value at `offset`.
    pub fn set(&self, offset: usize, value: &Value) {
        let Some(ty) = value.primitive() else {
            panic!("cannot store {value:?} into a segment field");
        };
        self.check(offset, ty.byte_size());
        let p = self.ptr(offset);
        // SAFETY: bounds and liveness checked above
        unsafe {
            match *value {
                Value::Bool(v) => p.write(u8::from(v)),
                Value::I8(v) => p.cast::<i8>().write(v),
                Value::I16(v) => p.cast::<i16>().write_unaligned(v),
                Value::Char(v) => p.cast::<u16>().write_unaligned(v),
                Value::I32(v) => p.cast::<i32>().write_unaligned(v),
                Value::I64(v) => p.cast::<i64>().write_unaligned(v),
                Value::F32(v) => p.cast::<f32>().write_unaligned(v),
                Value::F64(v) => p.cast::<f64>().write_unaligned(v),
                _ => unreachable!(),
            }
        }
    }

    /// Copy the first `other.len()` bytes of `other` to the start of `self`.
    pub fn copy_from(&self, other: &Segment) {
        other.check(0, other.len);
        self.check(0, other.len);
        // SAFETY: both ranges checked, `copy` tolerates overlap
        unsafe { std::ptr::copy(other.ptr(0), self.ptr(0), other.len) };
    }

    /// A view of the first `len` bytes sharing this segment's scope.
    pub fn prefix(&self, len: usize) -> Segment {
        self.check(0, len);
        Self {
            address: self.address,
            len,
            scope: self.scope.clone(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.check(0, self.len);
        let mut bytes = vec![0u8; self.len];
        // SAFETY: range checked above
        unsafe { std::ptr::copy_nonoverlapping(self.ptr(0), bytes.as_mut_ptr(), self.len) };
        bytes
    }

    /// Detach a copy into memory owned by the returned segment.
    pub fn to_owned_segment(&self) -> Segment {
        let owned = Segment::allocate(self.len, 16);
        owned.copy_from(self);
        owned
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.len == other.len
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment({}, {})", self.address, self.len)
    }
}
