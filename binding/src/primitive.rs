use std::fmt;

/// Scalar carrier kinds that fit in a single storage slot.
///
/// The discriminants are dense and start at zero so the enum can index
/// per-kind tables (see [`Primitive::index`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Primitive {
    Bool = 0,
    I8,
    I16,
    /// Unsigned 16-bit code unit.
    Char,
    I32,
    I64,
    F32,
    F64,
}

impl Primitive {
    pub const COUNT: usize = Primitive::F64 as usize + 1;

    pub const ALL: [Primitive; Primitive::COUNT] = [
        Primitive::Bool,
        Primitive::I8,
        Primitive::I16,
        Primitive::Char,
        Primitive::I32,
        Primitive::I64,
        Primitive::F32,
        Primitive::F64,
    ];

    pub const fn byte_size(self) -> usize {
        match self {
            Self::Bool | Self::I8 => 1,
            Self::I16 | Self::Char => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Signed integral kinds are sign-extended when written to a wider slot.
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The signed integral kind of exactly `size` bytes.
    pub const fn integral_for_size(size: usize) -> Option<Self> {
        match size {
            1 => Some(Self::I8),
            2 => Some(Self::I16),
            4 => Some(Self::I32),
            8 => Some(Self::I64),
            _ => None,
        }
    }

    /// The floating kind of exactly `size` bytes.
    pub const fn float_for_size(size: usize) -> Option<Self> {
        match size {
            4 => Some(Self::F32),
            8 => Some(Self::F64),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::Char => "char",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The erased type of a value crossing the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Carrier {
    Primitive(Primitive),
    Address,
    Segment,
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::Address => f.write_str("address"),
            Self::Segment => f.write_str("segment"),
        }
    }
}

impl From<Primitive> for Carrier {
    fn from(value: Primitive) -> Self {
        Self::Primitive(value)
    }
}

/// Erased low-level signature: one carrier per argument program and an
/// optional carrier for the return program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    params: Vec<Carrier>,
    ret: Option<Carrier>,
}

impl Signature {
    pub fn new(params: Vec<Carrier>, ret: Option<Carrier>) -> Self {
        Self { params, ret }
    }

    pub fn params(&self) -> &[Carrier] {
        &self.params
    }

    pub fn ret(&self) -> Option<Carrier> {
        self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn push_param(&mut self, carrier: Carrier) {
        self.params.push(carrier);
    }

    pub(crate) fn set_ret(&mut self, carrier: Carrier) {
        self.ret = Some(carrier);
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        match self.ret {
            Some(ret) => write!(f, ") -> {ret}"),
            None => f.write_str(") -> void"),
        }
    }
}
