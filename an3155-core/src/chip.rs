//! Product-id → flash geometry lookup (§4.3).

/// Result of a GET ID signature lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipProfile {
    pub product_id: u16,
    pub family: &'static str,
    /// Bytes of available flash, or 0 if the family is recognized but its
    /// geometry is unknown (the session aborts as `UnknownChip` in that case).
    pub available_flash_size: usize,
    /// Erase page size in bytes, or 0 alongside `available_flash_size == 0`.
    pub page_size: usize,
}

/// Families with known flash size and page size.
const KNOWN_GEOMETRY: &[ChipProfile] = &[
    ChipProfile {
        product_id: 0x410,
        family: "STM32F1 medium-density",
        available_flash_size: 131_072,
        page_size: 1024,
    },
    ChipProfile {
        product_id: 0x414,
        family: "STM32F1 high-density",
        available_flash_size: 262_144,
        page_size: 2048,
    },
    ChipProfile {
        product_id: 0x422,
        family: "STM32F3 30x/31x",
        available_flash_size: 262_144,
        page_size: 2048,
    },
];

/// Families recognized by signature but whose geometry this registry does
/// not carry; looking one of these up still produces a `ChipProfile`, with
/// `available_flash_size == 0`, so callers can report a useful family name
/// before aborting.
const RECOGNIZED_WITHOUT_GEOMETRY: &[(u16, &str)] = &[
    (0x412, "STM32F1 low-density"),
    (0x418, "STM32F1 connectivity line"),
    (0x420, "STM32F1 value line, low/medium-density"),
    (0x428, "STM32F1 value line, high-density"),
    (0x430, "STM32F1 XL-density"),
    (0x416, "STM32L1 medium-density"),
    (0x436, "STM32L1 high-density"),
    (0x427, "STM32L1 medium-density+"),
    (0x411, "STM32F2"),
    (0x440, "STM32F0"),
    (0x444, "STM32F0 small"),
    (0x413, "STM32F4"),
    (0x419, "STM32F4 high-density"),
    (0x432, "STM32F3 37x/38x"),
];

/// Resolve a 12-bit product id read back from GET ID into a `ChipProfile`.
///
/// Returns `None` for product ids this registry has never seen; callers
/// treat that the same as a recognized-but-geometry-unknown chip (both are
/// `UnknownChip` at the session level), but a `None` carries no family label
/// to log.
pub fn lookup(product_id: u16) -> Option<ChipProfile> {
    if let Some(profile) = KNOWN_GEOMETRY.iter().find(|p| p.product_id == product_id) {
        return Some(*profile);
    }
    RECOGNIZED_WITHOUT_GEOMETRY
        .iter()
        .find(|(id, _)| *id == product_id)
        .map(|(id, family)| ChipProfile {
            product_id: *id,
            family,
            available_flash_size: 0,
            page_size: 0,
        })
}
