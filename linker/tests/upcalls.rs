mod common;

use std::sync::Arc;

use binding::{Carrier, FunctionDescriptor, MemoryLayout, Primitive};
use common::*;
use linker::{Abi, CallError, EmulatedNatives, LinkerSettings, Segment, UpcallTarget, Value};

fn triple() -> MemoryLayout {
    MemoryLayout::structure([i64l(), i64l(), i64l()])
}

fn compare() -> UpcallTarget {
    Arc::new(|args: &[Value]| {
        let a = args[0].as_i64().ok_or("left")?;
        let b = args[1].as_i64().ok_or("right")?;
        Ok(Value::I32(a.cmp(&b) as i32))
    })
}

/// `int apply(int (*cmp)(long, long), long a, long b)`.
fn define_apply(natives: &EmulatedNatives) -> linker::NativeSymbol {
    natives.define("apply", |frame, natives| {
        let callback = frame.pointer_arg(0);
        let mut inner = natives.upcall_frame(callback)?;
        inner.set_int_arg(0, frame.int_arg(1));
        inner.set_int_arg(1, frame.int_arg(2));
        natives.call_upcall(callback, &mut inner)?;
        frame.set_int_return(0, inner.int_return(0));
        Ok(())
    })
}

#[test]
fn native_calls_back_into_managed_code() {
    init_logger();
    let natives = EmulatedNatives::new();
    let apply = define_apply(&natives);
    let i32l = v(Primitive::I32);
    let cmp_desc = FunctionDescriptor::of(i32l.clone(), [i64l(), i64l()]);
    let apply_desc =
        FunctionDescriptor::of(i32l, [MemoryLayout::Address, i64l(), i64l()]);

    for settings in [
        LinkerSettings::interpreted(),
        LinkerSettings {
            specialize_upcalls: true,
            ..LinkerSettings::default()
        },
    ] {
        let linker = linker(Abi::SysV, &natives, settings);
        let cmp = linker.upcall(compare(), &cmp_desc).unwrap();
        assert_eq!(cmp.handler().is_specialized(), settings.specialize_upcalls);
        let handle = linker.downcall(&apply, &apply_desc).unwrap();

        let call = |a, b| {
            handle
                .invoke(&[cmp.as_value(), Value::I64(a), Value::I64(b)])
                .unwrap()
        };
        assert_eq!(call(1, 2), Value::I32(-1));
        assert_eq!(call(5, 5), Value::I32(0));
        assert_eq!(call(9, -9), Value::I32(1));
    }
    assert_eq!(natives.upcall_count(), 2);
}

#[test]
fn specialized_upcall_returns_floats() {
    init_logger();
    let natives = EmulatedNatives::new();
    let settings = LinkerSettings {
        specialize_upcalls: true,
        ..LinkerSettings::default()
    };
    let linker = linker(Abi::SysV, &natives, settings);
    let scale: UpcallTarget = Arc::new(|args: &[Value]| {
        let x = args[0].as_f64().ok_or("x")?;
        let k = args[1].as_i64().ok_or("k")?;
        Ok(Value::F64(x * k as f64))
    });
    let stub = linker
        .upcall(scale, &FunctionDescriptor::of(f64l(), [f64l(), i64l()]))
        .unwrap();
    assert!(stub.handler().is_specialized());

    let mut frame = natives.upcall_frame(stub.address()).unwrap();
    frame.set_vector_arg(0, 1.5f64.to_bits());
    frame.set_int_arg(0, 4);
    natives.call_upcall(stub.address(), &mut frame).unwrap();
    assert_eq!(f64::from_bits(frame.vector_return(0)), 6.0);
}

#[test]
fn wrong_result_type_is_reported() {
    init_logger();
    let natives = EmulatedNatives::new();
    let sloppy: UpcallTarget = Arc::new(|_: &[Value]| Ok(Value::I32(1)));
    for settings in [
        LinkerSettings::interpreted(),
        LinkerSettings {
            specialize_upcalls: true,
            ..LinkerSettings::default()
        },
    ] {
        let linker = linker(Abi::SysV, &natives, settings);
        let stub = linker
            .upcall(sloppy.clone(), &FunctionDescriptor::of(i64l(), []))
            .unwrap();
        let mut frame = natives.upcall_frame(stub.address()).unwrap();
        let err = natives.call_upcall(stub.address(), &mut frame).unwrap_err();
        assert!(err.to_string().contains("result"), "{err}");
        assert_eq!(frame.int_return(0), 0);
    }
}

fn make_triple() -> UpcallTarget {
    Arc::new(|args: &[Value]| {
        let base = args[0].as_i64().ok_or("base")?;
        let out = Segment::allocate(24, 8);
        for i in 0..3 {
            out.set(i * 8, &Value::I64(base * (i as i64 + 1)));
        }
        Ok(Value::Segment(out))
    })
}

#[test]
fn in_memory_upcall_result_on_sysv() {
    init_logger();
    let natives = EmulatedNatives::new();
    let linker = linker(Abi::SysV, &natives, LinkerSettings::default());
    let stub = linker
        .upcall(make_triple(), &FunctionDescriptor::of(triple(), [i64l()]))
        .unwrap();
    assert!(stub.handler().sequence().is_indirect_result());

    let buffer = Segment::allocate(24, 8);
    let mut frame = natives.upcall_frame(stub.address()).unwrap();
    frame.set_int_arg(0, buffer.address().bits() as i64);
    frame.set_int_arg(1, 7);
    natives.call_upcall(stub.address(), &mut frame).unwrap();

    assert_eq!(frame.int_return(0) as u64, buffer.address().bits());
    assert_eq!(buffer.get(Primitive::I64, 0), Value::I64(7));
    assert_eq!(buffer.get(Primitive::I64, 8), Value::I64(14));
    assert_eq!(buffer.get(Primitive::I64, 16), Value::I64(21));
}

#[test]
fn in_memory_upcall_result_on_aarch64() {
    init_logger();
    let natives = EmulatedNatives::new();
    let linker = linker(Abi::AArch64, &natives, LinkerSettings::default());
    let stub = linker
        .upcall(make_triple(), &FunctionDescriptor::of(triple(), [i64l()]))
        .unwrap();

    let buffer = Segment::allocate(24, 8);
    let mut frame = natives.upcall_frame(stub.address()).unwrap();
    frame.set_indirect_result(buffer.address());
    frame.set_int_arg(0, 5);
    natives.call_upcall(stub.address(), &mut frame).unwrap();

    assert_eq!(buffer.get(Primitive::I64, 16), Value::I64(15));
    // x8 carries the buffer in, nothing comes back in registers
    assert_eq!(frame.int_return(0), 0);
}

#[test]
fn in_memory_upcall_without_a_buffer_is_refused() {
    init_logger();
    let natives = EmulatedNatives::new();
    let linker = linker(Abi::SysV, &natives, LinkerSettings::default());
    let stub = linker
        .upcall(make_triple(), &FunctionDescriptor::of(triple(), [i64l()]))
        .unwrap();
    let mut frame = natives.upcall_frame(stub.address()).unwrap();
    let err = natives.call_upcall(stub.address(), &mut frame).unwrap_err();
    assert!(err.to_string().contains("24 byte"), "{err}");
}

fn short_segment() -> UpcallTarget {
    Arc::new(|_: &[Value]| Ok(Value::Segment(Segment::allocate(4, 4))))
}

fn short_result() -> CallError {
    CallError::ResultType {
        expected: Some(Carrier::Segment),
        found: Some(Carrier::Segment),
    }
}

#[test]
fn short_register_struct_result_is_an_error() {
    init_logger();
    let natives = EmulatedNatives::new();
    let point = MemoryLayout::structure([v(Primitive::I32), v(Primitive::I32)]);
    for settings in [
        LinkerSettings::interpreted(),
        LinkerSettings {
            specialize_upcalls: true,
            ..LinkerSettings::default()
        },
    ] {
        let linker = linker(Abi::SysV, &natives, settings);
        let stub = linker
            .upcall(short_segment(), &FunctionDescriptor::of(point.clone(), []))
            .unwrap();
        assert_eq!(stub.handler().is_specialized(), settings.specialize_upcalls);

        let mut frame = natives.upcall_frame(stub.address()).unwrap();
        assert_eq!(stub.handler().invoke(&mut frame).unwrap_err(), short_result());
        assert!(frame.words().iter().all(|w| *w == 0));
    }
}

#[test]
fn short_in_memory_result_is_an_error() {
    init_logger();
    let natives = EmulatedNatives::new();
    let linker = linker(Abi::SysV, &natives, LinkerSettings::default());
    let stub = linker
        .upcall(short_segment(), &FunctionDescriptor::of(triple(), []))
        .unwrap();

    let buffer = Segment::allocate(24, 8);
    buffer.set(0, &Value::I64(-1));
    let mut frame = natives.upcall_frame(stub.address()).unwrap();
    frame.set_int_arg(0, buffer.address().bits() as i64);
    assert_eq!(stub.handler().invoke(&mut frame).unwrap_err(), short_result());
    assert_eq!(buffer.get(Primitive::I64, 0), Value::I64(-1));
    assert_eq!(frame.int_return(0), 0);
}
