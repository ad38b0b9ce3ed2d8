use std::fmt;

use binding::{Carrier, Primitive};

use crate::{Address, Segment};

/// A managed value crossing the call boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    Char(u16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Address(Address),
    Segment(Segment),
    Void,
}

impl Value {
    pub fn primitive(&self) -> Option<Primitive> {
        Some(match self {
            Self::Bool(_) => Primitive::Bool,
            Self::I8(_) => Primitive::I8,
            Self::I16(_) => Primitive::I16,
            Self::Char(_) => Primitive::Char,
            Self::I32(_) => Primitive::I32,
            Self::I64(_) => Primitive::I64,
            Self::F32(_) => Primitive::F32,
            Self::F64(_) => Primitive::F64,
            Self::Address(_) | Self::Segment(_) | Self::Void => return None,
        })
    }

    /// `None` for [`Value::Void`].
    pub fn carrier(&self) -> Option<Carrier> {
        match self {
            Self::Address(_) => Some(Carrier::Address),
            Self::Segment(_) => Some(Carrier::Segment),
            Self::Void => None,
            _ => self.primitive().map(Carrier::Primitive),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            Self::Segment(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_segment(self) -> Option<Segment> {
        match self {
            Self::Segment(s) => Some(s),
            _ => None,
        }
    }

    /// Slot bits of a primitive value, widened per [`encoder`].
    pub fn to_slot_bits(&self) -> u64 {
        let Some(ty) = self.primitive() else {
            panic!("{self:?} has no slot encoding");
        };
        encoder(ty)(self)
    }

    pub fn from_slot_bits(ty: Primitive, bits: u64) -> Value {
        decoder(ty)(bits)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "'\\u{{{v:04x}}}'"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}f"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Address(a) => write!(f, "{a}"),
            Self::Segment(s) => write!(f, "{s}"),
            Self::Void => f.write_str("void"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Address => Address,
    Segment => Segment,
}

/// Widens a primitive into a 64-bit slot.
pub type Encoder = fn(&Value) -> u64;
/// Narrows a 64-bit slot back into a primitive.
pub type Decoder = fn(u64) -> Value;

fn mismatch(expected: Primitive, value: &Value) -> ! {
    panic!("expected {expected} value, found {value:?}")
}

// Signed kinds sign-extend, Bool and Char zero-extend, floats occupy the low
// bits with the rest cleared.
static ENCODERS: [Encoder; Primitive::COUNT] = [
    |v| match v {
        Value::Bool(b) => u64::from(*b),
        _ => mismatch(Primitive::Bool, v),
    },
    |v| match v {
        Value::I8(x) => *x as i64 as u64,
        _ => mismatch(Primitive::I8, v),
    },
    |v| match v {
        Value::I16(x) => *x as i64 as u64,
        _ => mismatch(Primitive::I16, v),
    },
    |v| match v {
        Value::Char(x) => u64::from(*x),
        _ => mismatch(Primitive::Char, v),
    },
    |v| match v {
        Value::I32(x) => *x as i64 as u64,
        _ => mismatch(Primitive::I32, v),
    },
    |v| match v {
        Value::I64(x) => *x as u64,
        _ => mismatch(Primitive::I64, v),
    },
    |v| match v {
        Value::F32(x) => u64::from(x.to_bits()),
        _ => mismatch(Primitive::F32, v),
    },
    |v| match v {
        Value::F64(x) => x.to_bits(),
        _ => mismatch(Primitive::F64, v),
    },
];

static DECODERS: [Decoder; Primitive::COUNT] = [
    |bits| Value::Bool(bits as u8 != 0),
    |bits| Value::I8(bits as i8),
    |bits| Value::I16(bits as i16),
    |bits| Value::Char(bits as u16),
    |bits| Value::I32(bits as i32),
    |bits| Value::I64(bits as i64),
    |bits| Value::F32(f32::from_bits(bits as u32)),
    |bits| Value::F64(f64::from_bits(bits)),
];

#[inline(always)]
pub fn encoder(ty: Primitive) -> Encoder {
    ENCODERS[ty.index()]
}

#[inline(always)]
pub fn decoder(ty: Primitive) -> Decoder {
    DECODERS[ty.index()]
}
