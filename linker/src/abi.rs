//! Register inventories of the supported calling conventions.

use std::fmt;

use binding::{CallDirection, StorageClass, VMStorage};

/// Width of a vector slot that may take part in a direct call.
pub const DIRECT_VECTOR_WIDTH: usize = 8;

const SLOT_SIZE: u16 = 8;
const X87_SLOT_SIZE: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    SysV,
    AArch64,
}

impl Abi {
    /// The convention of the build target, if supported.
    pub fn host() -> Option<Abi> {
        if cfg!(all(target_arch = "x86_64", unix)) {
            Some(Abi::SysV)
        } else if cfg!(target_arch = "aarch64") {
            Some(Abi::AArch64)
        } else {
            None
        }
    }

    pub fn descriptor(self) -> &'static AbiDescriptor {
        match self {
            Abi::SysV => &SYSV,
            Abi::AArch64 => &AARCH64,
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().name)
    }
}

/// Which storages a convention provides, and their register names.
#[derive(Debug)]
pub struct AbiDescriptor {
    pub name: &'static str,
    pub integer_arguments: &'static [&'static str],
    pub vector_arguments: &'static [&'static str],
    pub integer_returns: &'static [&'static str],
    pub vector_returns: &'static [&'static str],
    pub x87_returns: &'static [&'static str],
    /// Dedicated register for the address of an in-memory result.
    pub indirect_result: Option<&'static str>,
    /// Whether the callee hands the in-memory result address back in the
    /// first integer return register.
    pub returns_indirect_address: bool,
    pub stack_slot_size: u16,
}

pub static SYSV: AbiDescriptor = AbiDescriptor {
    name: "x86_64-sysv",
    integer_arguments: &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
    vector_arguments: &["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"],
    integer_returns: &["rax", "rdx"],
    vector_returns: &["xmm0", "xmm1"],
    x87_returns: &["st0", "st1"],
    indirect_result: None,
    returns_indirect_address: true,
    stack_slot_size: SLOT_SIZE,
};

pub static AARCH64: AbiDescriptor = AbiDescriptor {
    name: "aarch64-aapcs64",
    integer_arguments: &["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"],
    vector_arguments: &["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7"],
    integer_returns: &["x0", "x1"],
    vector_returns: &["v0", "v1", "v2", "v3"],
    x87_returns: &[],
    indirect_result: Some("x8"),
    returns_indirect_address: false,
    stack_slot_size: SLOT_SIZE,
};

impl AbiDescriptor {
    pub fn x86_64_sysv() -> &'static AbiDescriptor {
        &SYSV
    }

    pub fn aarch64() -> &'static AbiDescriptor {
        &AARCH64
    }

    /// Number of slots of `class` the convention provides. The stack is
    /// unbounded and reports zero.
    pub fn slot_count(&self, class: StorageClass) -> usize {
        match class {
            StorageClass::IntegerArg => self.integer_arguments.len(),
            StorageClass::VectorArg => self.vector_arguments.len(),
            StorageClass::IntegerReturn => self.integer_returns.len(),
            StorageClass::VectorReturn => self.vector_returns.len(),
            StorageClass::X87Return => self.x87_returns.len(),
            StorageClass::IndirectResult => usize::from(self.indirect_result.is_some()),
            StorageClass::Stack => 0,
        }
    }

    pub fn slot_size(&self, class: StorageClass) -> u16 {
        match class {
            StorageClass::X87Return => X87_SLOT_SIZE,
            StorageClass::Stack => self.stack_slot_size,
            _ => SLOT_SIZE,
        }
    }

    pub fn storage(&self, class: StorageClass, index: usize) -> VMStorage {
        assert!(
            class == StorageClass::Stack || index < self.slot_count(class),
            "{} has no {class} slot {index}",
            self.name
        );
        VMStorage::new(class, index as u16, self.slot_size(class))
    }

    pub fn integer_argument(&self, index: usize) -> VMStorage {
        self.storage(StorageClass::IntegerArg, index)
    }

    pub fn vector_argument(&self, index: usize) -> VMStorage {
        self.storage(StorageClass::VectorArg, index)
    }

    pub fn integer_return(&self, index: usize) -> VMStorage {
        self.storage(StorageClass::IntegerReturn, index)
    }

    pub fn vector_return(&self, index: usize) -> VMStorage {
        self.storage(StorageClass::VectorReturn, index)
    }

    pub fn stack_slot(&self, index: usize) -> VMStorage {
        self.storage(StorageClass::Stack, index)
    }

    pub fn indirect_result_storage(&self) -> Option<VMStorage> {
        self.indirect_result
            .map(|_| self.storage(StorageClass::IndirectResult, 0))
    }

    /// Register name of `storage`, or `stack[n]`.
    pub fn register_name(&self, storage: VMStorage) -> String {
        let index = usize::from(storage.index());
        let names: &[&str] = match storage.class() {
            StorageClass::IntegerArg => self.integer_arguments,
            StorageClass::VectorArg => self.vector_arguments,
            StorageClass::IntegerReturn => self.integer_returns,
            StorageClass::VectorReturn => self.vector_returns,
            StorageClass::X87Return => self.x87_returns,
            StorageClass::IndirectResult => {
                return self.indirect_result.unwrap_or("imr").to_string();
            }
            StorageClass::Stack => return format!("stack[{index}]"),
        };
        names
            .get(index)
            .map_or_else(|| storage.to_string(), |n| n.to_string())
    }

    /// Most arguments a specialized call of `direction` may take. An upcall
    /// stub keeps its target in one integer register.
    pub fn max_direct_arguments(&self, direction: CallDirection) -> usize {
        match direction {
            CallDirection::Downcall => self.integer_arguments.len(),
            CallDirection::Upcall => self.integer_arguments.len() - 1,
        }
    }
}

/// Whether a value of `aggregate_size` bytes bound through `storage` can be
/// moved by a specialized call.
pub fn is_direct_storage(storage: VMStorage, aggregate_size: usize) -> bool {
    match storage.class() {
        StorageClass::Stack | StorageClass::IndirectResult | StorageClass::X87Return => false,
        StorageClass::VectorArg | StorageClass::VectorReturn => {
            storage.size() == DIRECT_VECTOR_WIDTH && aggregate_size <= DIRECT_VECTOR_WIDTH
        }
        StorageClass::IntegerArg | StorageClass::IntegerReturn => {
            aggregate_size <= storage.size()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let sysv = AbiDescriptor::x86_64_sysv();
        assert!(is_direct_storage(sysv.integer_argument(0), 8));
        assert!(!is_direct_storage(sysv.integer_argument(0), 16));
        assert!(is_direct_storage(sysv.vector_argument(3), 4));
        assert!(!is_direct_storage(sysv.stack_slot(0), 8));
        assert!(!is_direct_storage(VMStorage::new(StorageClass::VectorArg, 0, 16), 8));
        assert!(!is_direct_storage(sysv.storage(StorageClass::X87Return, 0), 8));
        let imr = AbiDescriptor::aarch64().indirect_result_storage().unwrap();
        assert!(!is_direct_storage(imr, 8));
    }

    #[test]
    fn classification_is_monotone_in_size() {
        let sysv = AbiDescriptor::x86_64_sysv();
        let storages = [
            sysv.integer_argument(0),
            sysv.vector_argument(0),
            sysv.integer_return(1),
            sysv.vector_return(0),
        ];
        for storage in storages {
            for size in 1..=16 {
                if is_direct_storage(storage, size) {
                    for smaller in 1..size {
                        assert!(is_direct_storage(storage, smaller), "{storage} {smaller}");
                    }
                }
            }
        }
    }

    #[test]
    fn register_names() {
        let sysv = AbiDescriptor::x86_64_sysv();
        assert_eq!(sysv.register_name(sysv.integer_argument(2)), "rdx");
        assert_eq!(sysv.register_name(sysv.vector_return(1)), "xmm1");
        assert_eq!(sysv.register_name(sysv.stack_slot(3)), "stack[3]");
        let arm = AbiDescriptor::aarch64();
        assert_eq!(arm.register_name(arm.indirect_result_storage().unwrap()), "x8");
    }

    #[test]
    fn arity_budgets() {
        let sysv = AbiDescriptor::x86_64_sysv();
        assert_eq!(sysv.max_direct_arguments(CallDirection::Downcall), 6);
        assert_eq!(sysv.max_direct_arguments(CallDirection::Upcall), 5);
    }
}
