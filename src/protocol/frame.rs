use std::time::Duration;

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
};
use log::warn;

use crate::transport::{Channel, TransportError, read_all, write_all};

/// Largest message body accepted in either direction.
pub const MAX_MESSAGE_LEN: usize = 8 * 1024 * 1024;

const HEADER_LEN: usize = size_of::<u32>();

fn config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Encodes `message` and writes it as a single frame.
pub fn write_message<C, M>(channel: &mut C, message: &M) -> Result<(), TransportError>
where
    C: Channel + ?Sized,
    M: Encode,
{
    let body = bincode::encode_to_vec(message, config())?;
    if body.len() > MAX_MESSAGE_LEN {
        return Err(TransportError::MessageTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);

    let written = write_all(channel, &frame);
    if written != frame.len() {
        return Err(TransportError::ShortWrite {
            written,
            expected: frame.len(),
        });
    }
    Ok(())
}

/// Reads one frame and decodes its body.
///
/// `timeout` applies to the header and to the body separately.
pub fn read_message<C, M>(channel: &mut C, timeout: Option<Duration>) -> Result<M, TransportError>
where
    C: Channel + ?Sized,
    M: Decode<()>,
{
    let mut header = [0u8; HEADER_LEN];
    let read = read_all(channel, &mut header, timeout)?;
    if read != HEADER_LEN {
        warn!("frame header truncated: read {read} of {HEADER_LEN} bytes");
        return Err(TransportError::ShortRead {
            read,
            expected: HEADER_LEN,
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(TransportError::MessageTooLarge(len));
    }

    let mut body = vec![0u8; len];
    let read = read_all(channel, &mut body, timeout)?;
    if read != len {
        warn!("frame body truncated: read {read} of {len} bytes");
        return Err(TransportError::ShortRead {
            read,
            expected: len,
        });
    }

    let (message, _) = bincode::decode_from_slice(&body, config())?;
    Ok(message)
}
