/// Knobs of a [`Linker`](crate::Linker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkerSettings {
    /// Compile eligible downcalls instead of interpreting them.
    pub specialize_downcalls: bool,
    /// Compile eligible upcalls. Off unless asked for.
    pub specialize_upcalls: bool,
    /// Arrange each (descriptor, direction) once and reuse the sequence.
    pub cache_sequences: bool,
}

impl Default for LinkerSettings {
    fn default() -> Self {
        Self {
            specialize_downcalls: true,
            specialize_upcalls: false,
            cache_sequences: true,
        }
    }
}

pub const SPECIALIZE_VAR: &str = "FFI_BINDING_SPECIALIZE";
pub const SPECIALIZE_UPCALLS_VAR: &str = "FFI_BINDING_SPECIALIZE_UPCALLS";
pub const CACHE_VAR: &str = "FFI_BINDING_CACHE";

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

impl LinkerSettings {
    /// Defaults overridden by the `FFI_BINDING_*` variables that are set to
    /// `0`, `1`, `true` or `false`. Other values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        let flag = |name: &str| lookup(name).as_deref().and_then(parse_flag);
        flag(SPECIALIZE_VAR).inspect(|&val| settings.specialize_downcalls = val);
        flag(SPECIALIZE_UPCALLS_VAR).inspect(|&val| settings.specialize_upcalls = val);
        flag(CACHE_VAR).inspect(|&val| settings.cache_sequences = val);
        settings
    }

    pub fn interpreted() -> Self {
        Self {
            specialize_downcalls: false,
            specialize_upcalls: false,
            ..Self::default()
        }
    }
}
