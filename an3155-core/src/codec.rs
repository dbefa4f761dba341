//! Wire frame encoding for the AN3155 bootloader protocol.
//!
//! Every helper here returns bytes ready to hand to the port's `send`; none
//! of them touch the port themselves so they can be exercised with plain
//! assertions (see the `tests` module below).

/// Accepted response byte meaning the bootloader accepted the previous frame.
pub const ACK: u8 = 0x79;
/// Accepted response byte meaning the bootloader rejected the previous frame.
pub const NACK: u8 = 0x1F;
/// Probe byte used during auto-baud synchronization.
pub const SYNC_BYTE: u8 = 0x7F;

pub const GET: u8 = 0x00;
pub const GET_ID: u8 = 0x02;
pub const READ_MEMORY: u8 = 0x11;
pub const GO: u8 = 0x21;
pub const WRITE_MEMORY: u8 = 0x31;
pub const ERASE: u8 = 0x43;
pub const EXTENDED_ERASE: u8 = 0x44;

/// `[cmd, cmd XOR 0xFF]`
pub fn command_frame(cmd: u8) -> [u8; 2] {
    [cmd, !cmd]
}

/// Four big-endian address bytes followed by their XOR checksum.
pub fn address_frame(address: u32) -> [u8; 5] {
    let b = address.to_be_bytes();
    let checksum = b[0] ^ b[1] ^ b[2] ^ b[3];
    [b[0], b[1], b[2], b[3], checksum]
}

/// `[N-1, payload..., checksum]` with `checksum = (N-1) XOR payload[0] XOR ...`.
///
/// `payload` must be 1..=256 bytes; this is enforced by the write/verify
/// engine's chunking, not re-validated here.
pub fn data_frame(payload: &[u8]) -> Vec<u8> {
    debug_assert!(!payload.is_empty() && payload.len() <= 256);
    let n = (payload.len() - 1) as u8;
    let checksum = payload.iter().fold(n, |acc, b| acc ^ b);
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(n);
    frame.extend_from_slice(payload);
    frame.push(checksum);
    frame
}

/// `[N-1, ~(N-1)]` — requests `n` bytes back from READ_MEMORY.
pub fn read_count_frame(n: usize) -> [u8; 2] {
    debug_assert!(n >= 1 && n <= 256);
    let nm1 = (n - 1) as u8;
    [nm1, !nm1]
}

/// Classic (one-byte page number) erase list frame for the given pages.
pub fn classic_erase_list_frame(pages: &[u8]) -> Vec<u8> {
    debug_assert!(!pages.is_empty() && pages.len() <= 256);
    let n = (pages.len() - 1) as u8;
    let checksum = pages.iter().fold(n, |acc, p| acc ^ p);
    let mut frame = Vec::with_capacity(pages.len() + 2);
    frame.push(n);
    frame.extend_from_slice(pages);
    frame.push(checksum);
    frame
}

/// `[0xFF, 0x00]` — classic global erase.
pub fn classic_global_erase_frame() -> [u8; 2] {
    [0xFF, 0x00]
}

/// Extended (two-byte, big-endian page number) erase list frame. The first
/// two bytes encode `pages.len() - 1`, mirroring the classic list frame's
/// one-byte `n - 1` encoding (spec §4.2); this differs from the reference
/// crate's `extended_erase`, which sends the raw page count there.
pub fn extended_erase_list_frame(pages: &[u16]) -> Vec<u8> {
    debug_assert!(!pages.is_empty() && pages.len() <= u16::MAX as usize + 1);
    let n = (pages.len() - 1) as u16;
    let mut frame = Vec::with_capacity(2 + pages.len() * 2 + 1);
    frame.extend_from_slice(&n.to_be_bytes());
    for page in pages {
        frame.extend_from_slice(&page.to_be_bytes());
    }
    let checksum = frame.iter().fold(0u8, |acc, b| acc ^ b);
    frame.push(checksum);
    frame
}

/// `[0xFF, 0xFF, 0x00]` — extended global erase.
pub fn extended_global_erase_frame() -> [u8; 3] {
    [0xFF, 0xFF, 0x00]
}
