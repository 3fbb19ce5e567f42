//! Namespace identifiers for addresses.

/// Labels where an address lives. `Register`, `Frame` and `FrameBack` are
/// not relocatable; `None` means unspecified (used during partial
/// resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Code,
    Data,
    Bytepool,
    Register,
    Frame,
    FrameBack,
    None,
}

impl Section {
    /// Whether a defined, simple reference into this section is subject to
    /// per-section relocation offsets at merge-link time.
    pub fn is_relocatable(self) -> bool {
        matches!(self, Section::Code | Section::Data | Section::Bytepool)
    }
}
