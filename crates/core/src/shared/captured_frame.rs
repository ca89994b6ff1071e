use std::sync::Arc;

/// An encoded frame as received from the client, plus the client's capture
/// timestamp (milliseconds on the client's monotonic clock).
///
/// Cloning is cheap: the payload is shared, never copied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    bytes: Arc<[u8]>,
    captured_at_ms: u64,
}

impl CapturedFrame {
    pub fn new(bytes: impl Into<Arc<[u8]>>, captured_at_ms: u64) -> Self {
        Self {
            bytes: bytes.into(),
            captured_at_ms,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn captured_at_ms(&self) -> u64 {
        self.captured_at_ms
    }
}
