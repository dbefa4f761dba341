//! Erase engine (§4.4): issues either the classic or extended erase dialect,
//! globally or bounded to the image's top address.

use std::io::{Read, Write};

use log::{debug, info};

use crate::codec::{self, ERASE, EXTENDED_ERASE};
use crate::error::Error;
use crate::session::Session;

pub fn erase<T>(session: &mut Session<'_, T>) -> Result<(), Error>
where
    T: Read + Write,
{
    if session.options.erase_chip {
        global_erase(session)
    } else {
        partial_erase(session)
    }
}

fn global_erase<T>(session: &mut Session<'_, T>) -> Result<(), Error>
where
    T: Read + Write,
{
    if session.use_extended_erase {
        info!("issuing extended global erase");
        session.send_and_ack(&codec::command_frame(EXTENDED_ERASE))?;
        session.send_and_ack(&codec::extended_global_erase_frame())?;
    } else {
        info!("issuing classic global erase");
        session.send_and_ack(&codec::command_frame(ERASE))?;
        session.send_and_ack(&codec::classic_global_erase_frame())?;
    }
    Ok(())
}

fn partial_erase<T>(session: &mut Session<'_, T>) -> Result<(), Error>
where
    T: Read + Write,
{
    let chip = session
        .chip
        .expect("chip profile is resolved before erase runs");
    let max_offset = session.image.max_offset();
    let pages = pages_for_offset(max_offset, chip.page_size);
    debug!("partial erase: {pages} pages (page size {})", chip.page_size);

    if session.use_extended_erase {
        info!("issuing extended erase of pages 0..{pages}");
        let page_numbers: Vec<u16> = (0..pages as u16).collect();
        session.send_and_ack(&codec::command_frame(EXTENDED_ERASE))?;
        session.send_and_ack(&codec::extended_erase_list_frame(&page_numbers))?;
    } else {
        info!("issuing classic erase of pages 0..{pages}");
        let page_numbers: Vec<u8> = (0..pages as u8).collect();
        session.send_and_ack(&codec::command_frame(ERASE))?;
        session.send_and_ack(&codec::classic_erase_list_frame(&page_numbers))?;
    }
    Ok(())
}

/// `ceil(max_offset / page_size)`, the number of pages a partial erase must
/// cover to reach every byte the image touches.
fn pages_for_offset(max_offset: usize, page_size: usize) -> usize {
    if max_offset == 0 {
        0
    } else {
        (max_offset + page_size - 1) / page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(pages_for_offset(1024, 1024), 1);
        assert_eq!(pages_for_offset(1025, 1024), 2);
        assert_eq!(pages_for_offset(2048, 1024), 2);
        assert_eq!(pages_for_offset(0, 1024), 0);
    }
}
