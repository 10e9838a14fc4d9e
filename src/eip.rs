// eip.rs - EtherNet/IP encapsulation layer
// =========================================================================
//
// Every exchange on the TCP connection starts with a fixed 24-byte header:
//
//   u16 command | u16 length | u32 session_handle | u32 status
//   u64 sender_context | u32 options
//
// all little-endian. CIP traffic rides inside SendRRData, wrapped in a
// Common Packet Format (CPF) header holding a null address item and an
// unconnected data item.

use crate::buffer::ByteBuffer;
use crate::error::{EipError, Result};
use std::io::{self, Read};

pub const EIP_HEADER_SIZE: usize = 24;
pub const CPF_HEADER_SIZE: usize = 16;

pub const CMD_NOP: u16 = 0x0000;
pub const CMD_REGISTER_SESSION: u16 = 0x0065;
pub const CMD_UNREGISTER_SESSION: u16 = 0x0066;
pub const CMD_SEND_RR_DATA: u16 = 0x006F;

pub const EIP_PROTOCOL_VERSION: u16 = 1;

pub const CPF_ITEM_NULL_ADDRESS: u16 = 0x0000;
pub const CPF_ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

/// Decoded encapsulation header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EipHeader {
    pub command: u16,
    pub length: u16,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: u64,
    pub options: u32,
}

impl EipHeader {
    /// Parses the header fields without judging the status word
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EIP_HEADER_SIZE {
            return Err(EipError::TooSmall(format!(
                "EtherNet/IP header needs {} bytes, got {}",
                EIP_HEADER_SIZE,
                bytes.len()
            )));
        }
        Ok(Self {
            command: u16::from_le_bytes([bytes[0], bytes[1]]),
            length: u16::from_le_bytes([bytes[2], bytes[3]]),
            session_handle: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            status: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            sender_context: u64::from_le_bytes([
                bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18],
                bytes[19],
            ]),
            options: u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
        })
    }

    /// Total frame size announced by this header
    pub fn frame_len(&self) -> usize {
        EIP_HEADER_SIZE + self.length as usize
    }
}

/// Prepends an encapsulation header to the payload already in `buf`. The
/// length field is the payload size at the time of the call.
pub fn marshal_eip_header(
    buf: &mut ByteBuffer,
    command: u16,
    session_handle: u32,
    sender_context: u64,
) -> Result<()> {
    let length = u16::try_from(buf.len()).map_err(|_| {
        EipError::TooLarge(format!(
            "EtherNet/IP payload of {} bytes exceeds 65535",
            buf.len()
        ))
    })?;

    let mut header = [0u8; EIP_HEADER_SIZE];
    header[0..2].copy_from_slice(&command.to_le_bytes());
    header[2..4].copy_from_slice(&length.to_le_bytes());
    header[4..8].copy_from_slice(&session_handle.to_le_bytes());
    // status [8..12] and options [20..24] stay zero
    header[12..20].copy_from_slice(&sender_context.to_le_bytes());

    buf.prepend(&header);
    Ok(())
}

/// Decodes and validates an encapsulation header. A non-zero status is
/// reported as [`EipError::EipStatus`].
pub fn unmarshal_eip_header(bytes: &[u8]) -> Result<EipHeader> {
    let header = EipHeader::parse(bytes)?;
    if header.status != 0 {
        return Err(EipError::EipStatus(header.status));
    }
    Ok(header)
}

/// Register Session payload: protocol version and option flags
pub fn marshal_register_session(buf: &mut ByteBuffer) {
    buf.put_u16(EIP_PROTOCOL_VERSION);
    buf.put_u16(0);
}

/// Builds a complete Register Session request frame
pub fn build_register_session(sender_context: u64) -> Result<Vec<u8>> {
    let mut buf = ByteBuffer::with_capacity(EIP_HEADER_SIZE + 4);
    marshal_register_session(&mut buf);
    marshal_eip_header(&mut buf, CMD_REGISTER_SESSION, 0, sender_context)?;
    Ok(buf.into_vec())
}

/// Validates a Register Session reply frame and returns the session handle
pub fn unmarshal_register_session_reply(frame: &[u8]) -> Result<u32> {
    let header = unmarshal_eip_header(frame)?;
    if header.command != CMD_REGISTER_SESSION {
        return Err(EipError::BadReply(format!(
            "expected Register Session reply (0x{:04X}), got command 0x{:04X}",
            CMD_REGISTER_SESSION, header.command
        )));
    }
    if header.session_handle == 0 {
        return Err(EipError::BadReply(
            "Register Session reply carried a zero session handle".to_string(),
        ));
    }
    Ok(header.session_handle)
}

/// Builds an Unregister Session frame (header only)
pub fn build_unregister_session(session_handle: u32, sender_context: u64) -> Result<Vec<u8>> {
    let mut buf = ByteBuffer::with_capacity(EIP_HEADER_SIZE);
    marshal_eip_header(&mut buf, CMD_UNREGISTER_SESSION, session_handle, sender_context)?;
    Ok(buf.into_vec())
}

/// Prepends the CPF header for an unconnected message around the CIP
/// payload already in `buf`.
pub fn marshal_cip_cfp_unconnected(buf: &mut ByteBuffer, router_timeout: u16) -> Result<()> {
    let payload_len = u16::try_from(buf.len()).map_err(|_| {
        EipError::TooLarge(format!("CIP payload of {} bytes exceeds 65535", buf.len()))
    })?;

    let mut header = ByteBuffer::with_capacity(CPF_HEADER_SIZE);
    header.put_u32(0); // interface handle
    header.put_u16(router_timeout);
    header.put_u16(2); // item count
    header.put_u16(CPF_ITEM_NULL_ADDRESS);
    header.put_u16(0);
    header.put_u16(CPF_ITEM_UNCONNECTED_DATA);
    header.put_u16(payload_len);

    buf.prepend(header.as_slice());
    Ok(())
}

/// Strips the CPF header from a SendRRData payload and returns the CIP bytes
pub fn unmarshal_cip_cfp_unconnected(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < CPF_HEADER_SIZE {
        return Err(EipError::BadReply(format!(
            "CPF header needs {} bytes, got {}",
            CPF_HEADER_SIZE,
            bytes.len()
        )));
    }

    let word = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

    let item_count = word(6);
    if item_count != 2 {
        return Err(EipError::BadReply(format!(
            "expected 2 CPF items, got {}",
            item_count
        )));
    }
    if word(8) != CPF_ITEM_NULL_ADDRESS || word(10) != 0 {
        return Err(EipError::BadReply(format!(
            "expected null address item, got type 0x{:04X} length {}",
            word(8),
            word(10)
        )));
    }
    if word(12) != CPF_ITEM_UNCONNECTED_DATA {
        return Err(EipError::BadReply(format!(
            "expected unconnected data item (0x00B2), got 0x{:04X}",
            word(12)
        )));
    }

    let data_len = word(14) as usize;
    let data = &bytes[CPF_HEADER_SIZE..];
    if data.len() != data_len {
        return Err(EipError::BadReply(format!(
            "unconnected data item announces {} bytes, frame holds {}",
            data_len,
            data.len()
        )));
    }
    Ok(data)
}

/// Accumulates one encapsulation frame from a possibly non-blocking reader.
///
/// First exactly the 24 header bytes are gathered, then the payload length
/// taken from the header. Partial reads are kept across calls, so `poll`
/// can be retried whenever the socket has more data.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held from an incomplete frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn wanted(&self) -> usize {
        if self.buf.len() < EIP_HEADER_SIZE {
            EIP_HEADER_SIZE
        } else {
            let length = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
            EIP_HEADER_SIZE + length
        }
    }

    /// Returns `Ok(Some(frame))` once a whole frame is present, `Ok(None)`
    /// when the reader has no more data for now.
    pub fn poll<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; 4096];
        loop {
            let wanted = self.wanted();
            if self.buf.len() >= wanted {
                let frame: Vec<u8> = self.buf.drain(..wanted).collect();
                return Ok(Some(frame));
            }

            let want = (wanted - self.buf.len()).min(chunk.len());
            match reader.read(&mut chunk[..want]) {
                Ok(0) => {
                    return Err(EipError::BadConnection(
                        "connection closed by peer".to_string(),
                    ))
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
