//! Interpreted against specialized dispatch:
//!   cargo bench --bench dispatch_benchmark

use std::sync::Arc;

use binding::{FunctionDescriptor, MemoryLayout, Primitive};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use linker::{
    Abi, DowncallHandle, EmulatedNatives, Linker, LinkerSettings, NativeSymbol, Segment, Value,
};

fn i64l() -> MemoryLayout {
    MemoryLayout::value(Primitive::I64)
}

fn f64l() -> MemoryLayout {
    MemoryLayout::value(Primitive::F64)
}

fn natives() -> (EmulatedNatives, NativeSymbol, NativeSymbol) {
    let natives = EmulatedNatives::new();
    let axpy = natives.define("axpy", |frame, _| {
        let r = frame.f64_arg(0) * frame.int_arg(0) as f64 + frame.f64_arg(1);
        frame.set_f64_return(r);
        Ok(())
    });
    let span = natives.define("span", |frame, _| {
        frame.set_int_return(0, frame.int_arg(1) - frame.int_arg(0));
        Ok(())
    });
    (natives, axpy, span)
}

fn handle(
    natives: &EmulatedNatives,
    symbol: &NativeSymbol,
    descriptor: &FunctionDescriptor,
    settings: LinkerSettings,
) -> DowncallHandle {
    let linker = Linker::new(Abi::SysV, Arc::new(natives.clone()), settings);
    linker.downcall(symbol, descriptor).expect("link failed")
}

/// Benchmark 1: three scalars in, one scalar out.
fn bench_scalar_downcall(c: &mut Criterion) {
    let (natives, axpy, _) = natives();
    let desc = FunctionDescriptor::of(f64l(), [f64l(), i64l(), f64l()]);
    let args = [Value::F64(1.5), Value::I64(3), Value::F64(0.25)];

    for (name, settings) in [
        ("scalar_interpreted", LinkerSettings::interpreted()),
        ("scalar_specialized", LinkerSettings::default()),
    ] {
        let handle = handle(&natives, &axpy, &desc, settings);
        let mut frame = handle.new_frame();
        c.bench_function(name, |b| {
            b.iter(|| {
                handle
                    .invoke_in(black_box(&args), &mut frame)
                    .expect("call failed")
            });
        });
    }
}

/// Benchmark 2: a 16 byte struct, which always takes the interpreter.
fn bench_struct_downcall(c: &mut Criterion) {
    let (natives, _, span) = natives();
    let range = MemoryLayout::structure([i64l(), i64l()]);
    let desc = FunctionDescriptor::of(i64l(), [range.clone()]);
    let arg = Segment::allocate(range.byte_size(), range.byte_alignment());
    arg.set(8, &Value::I64(64));
    let args = [Value::Segment(arg)];

    let handle = handle(&natives, &span, &desc, LinkerSettings::default());
    let mut frame = handle.new_frame();
    c.bench_function("struct_interpreted", |b| {
        b.iter(|| {
            handle
                .invoke_in(black_box(&args), &mut frame)
                .expect("call failed")
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(50);
    targets = bench_scalar_downcall, bench_struct_downcall
}

criterion_main!(benches);
