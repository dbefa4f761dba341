//! The pre-parsed firmware image consumed by the session driver (§3).

/// Default base of the target's flash window.
pub const FLASH_BASE_ADDRESS: u32 = 0x0800_0000;

/// A contiguous address/byte region of the firmware image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    pub fn bytes(&self) -> usize {
        self.data.len()
    }
}

/// An ordered sequence of segments, built once by an external parser and
/// read-only thereafter. Segments are expected in ascending address order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareImage {
    pub segments: Vec<Segment>,
    pub bytes_total: usize,
}

impl FirmwareImage {
    pub fn new(segments: Vec<Segment>) -> Self {
        let bytes_total = segments.iter().map(Segment::bytes).sum();
        Self { segments, bytes_total }
    }

    /// Highest byte offset (relative to `FLASH_BASE_ADDRESS`) touched by the
    /// last segment. Used by the erase engine to bound a partial erase.
    pub fn max_offset(&self) -> usize {
        match self.segments.last() {
            Some(segment) => {
                (segment.address as usize + segment.bytes()).saturating_sub(FLASH_BASE_ADDRESS as usize)
            }
            None => 0,
        }
    }
}
