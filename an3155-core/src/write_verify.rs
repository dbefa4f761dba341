//! Write/verify engine (§4.5 Phases 5-6): chunks the image into ≤256-byte
//! frames, streams write-memory and read-memory cycles, and compares.

use std::io::{Read, Write};

use log::{debug, info};

use crate::codec::{self, READ_MEMORY, WRITE_MEMORY};
use crate::error::Error;
use crate::session::Session;

/// Largest payload a single WRITE_MEMORY/READ_MEMORY frame can carry.
const MAX_CHUNK: usize = 256;

/// Phase 5: write every segment, chunked into ≤256-byte frames.
pub fn write<T>(session: &mut Session<'_, T>) -> Result<(), Error>
where
    T: Read + Write,
{
    for segment in &session.image.segments {
        let chunk_count = segment.data.chunks(MAX_CHUNK).count();
        info!(
            "writing segment at 0x{:08X}: {} bytes in {} chunk(s)",
            segment.address,
            segment.bytes(),
            chunk_count
        );
        for (index, chunk) in segment.data.chunks(MAX_CHUNK).enumerate() {
            let address = segment.address + (index * MAX_CHUNK) as u32;
            debug!("write chunk #{index} at 0x{address:08X}, {} bytes", chunk.len());
            session.send_and_ack(&codec::command_frame(WRITE_MEMORY))?;
            session.send_and_ack(&codec::address_frame(address))?;
            session.send_and_ack(&codec::data_frame(chunk))?;
        }
    }
    Ok(())
}

/// Phase 6: read every segment back, chunked the same way, and compare.
pub fn verify<T>(session: &mut Session<'_, T>) -> Result<(), Error>
where
    T: Read + Write,
{
    session.verify_buffer = Vec::with_capacity(session.image.segments.len());

    for segment in &session.image.segments {
        let mut collected = Vec::with_capacity(segment.bytes());
        let mut offset = 0usize;
        while offset < segment.bytes() {
            let len = (segment.bytes() - offset).min(MAX_CHUNK);
            let address = segment.address + offset as u32;
            session.send_and_ack(&codec::command_frame(READ_MEMORY))?;
            session.send_and_ack(&codec::address_frame(address))?;
            session.send_and_ack(&codec::read_count_frame(len))?;
            let data = session.retrieve(len)?;
            collected.extend(data);
            offset += len;
        }
        session.verify_buffer.push(collected);
    }

    for (segment_index, segment) in session.image.segments.iter().enumerate() {
        let observed = &session.verify_buffer[segment_index];
        for (offset, (original, written)) in segment.data.iter().zip(observed.iter()).enumerate() {
            if original != written {
                return Err(Error::VerifyMismatch {
                    segment: segment_index,
                    offset,
                });
            }
        }
    }
    info!("verification passed for {} segment(s)", session.image.segments.len());
    Ok(())
}
