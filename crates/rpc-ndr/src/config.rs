//! Marshaling configuration

/// First referent ID handed out in a message.
pub const DEFAULT_INITIAL_REF_ID: u32 = 0x0002_0000;

/// Upper bound on elements allocated for a single decoded array or string.
pub const MAX_NDR_ARRAY_ELEMENTS: usize = 16 * 1024 * 1024;

/// Per-call configuration for [`Marshaller`](crate::Marshaller) and
/// [`Unmarshaller`](crate::Unmarshaller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdrConfig {
    /// Referent ID assigned to the first referent of a message
    pub initial_ref_id: u32,
    /// Largest element count accepted from the wire
    pub max_elements: usize,
}

impl NdrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start referent IDs at `ref_id` instead of the default
    pub fn with_initial_ref_id(mut self, ref_id: u32) -> Self {
        self.initial_ref_id = ref_id;
        self
    }

    /// Set the decode allocation limit
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }
}

impl Default for NdrConfig {
    fn default() -> Self {
        Self {
            initial_ref_id: DEFAULT_INITIAL_REF_ID,
            max_elements: MAX_NDR_ARRAY_ELEMENTS,
        }
    }
}
