use std::fmt;

/// Category of a physical location in a native call.
///
/// Argument-side classes are written by a downcall and read by an upcall;
/// return-side classes the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StorageClass {
    IntegerArg = 0,
    VectorArg,
    Stack,
    /// Register carrying the address of an in-memory aggregate result.
    IndirectResult,
    IntegerReturn,
    VectorReturn,
    X87Return,
}

impl StorageClass {
    pub const COUNT: usize = StorageClass::X87Return as usize + 1;

    pub const ALL: [StorageClass; StorageClass::COUNT] = [
        StorageClass::IntegerArg,
        StorageClass::VectorArg,
        StorageClass::Stack,
        StorageClass::IndirectResult,
        StorageClass::IntegerReturn,
        StorageClass::VectorReturn,
        StorageClass::X87Return,
    ];

    pub const fn is_argument(self) -> bool {
        matches!(
            self,
            Self::IntegerArg | Self::VectorArg | Self::Stack | Self::IndirectResult
        )
    }

    pub const fn is_return(self) -> bool {
        !self.is_argument()
    }

    pub const fn is_integer(self) -> bool {
        matches!(self, Self::IntegerArg | Self::IntegerReturn)
    }

    pub const fn is_vector(self) -> bool {
        matches!(self, Self::VectorArg | Self::VectorReturn)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn short_name(self) -> &'static str {
        match self {
            Self::IntegerArg => "int_arg",
            Self::VectorArg => "vec_arg",
            Self::Stack => "stack",
            Self::IndirectResult => "imr",
            Self::IntegerReturn => "int_ret",
            Self::VectorReturn => "vec_ret",
            Self::X87Return => "x87_ret",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// One physical slot: a storage class, an index within that class and the
/// slot width in bytes.
///
/// Two storages with the same class and index name the same location for the
/// whole call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VMStorage {
    class: StorageClass,
    index: u16,
    size: u16,
}

impl VMStorage {
    pub const fn new(class: StorageClass, index: u16, size: u16) -> Self {
        Self { class, index, size }
    }

    pub const fn class(&self) -> StorageClass {
        self.class
    }

    pub const fn index(&self) -> u16 {
        self.index
    }

    /// Slot width in bytes.
    pub const fn size(&self) -> usize {
        self.size as usize
    }

    /// Whether `other` names the same physical location.
    pub const fn same_location(&self, other: &VMStorage) -> bool {
        self.class as u8 == other.class as u8 && self.index == other.index
    }
}

impl fmt::Display for VMStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class, self.index)
    }
}
