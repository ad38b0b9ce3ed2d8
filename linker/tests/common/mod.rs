#![allow(dead_code)]

use std::sync::Arc;

use binding::{MemoryLayout, Primitive};
use linker::{Abi, EmulatedNatives, Linker, LinkerSettings, Segment, Value};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn v(p: Primitive) -> MemoryLayout {
    MemoryLayout::value(p)
}

pub fn i64l() -> MemoryLayout {
    v(Primitive::I64)
}

pub fn f64l() -> MemoryLayout {
    v(Primitive::F64)
}

pub fn linker(abi: Abi, natives: &EmulatedNatives, settings: LinkerSettings) -> Linker {
    Linker::new(abi, Arc::new(natives.clone()), settings)
}

/// A segment of `layout` with the given fields written in order.
pub fn segment(layout: &MemoryLayout, fields: &[(usize, Value)]) -> Segment {
    let seg = Segment::allocate(layout.byte_size(), layout.byte_alignment());
    for (offset, value) in fields {
        seg.set(*offset, value);
    }
    seg
}
