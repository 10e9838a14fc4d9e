// cip.rs - CIP service codecs
// =========================================================================
//
// Request builders and reply decoders for the CIP services this client
// speaks over unconnected messaging:
//
// - 0x4C Read Tag
// - 0x4D Write Tag
// - 0x03 Get Attribute List
// - 0x52 Unconnected Send (Connection Manager routing envelope)
//
// Builders write into a ByteBuffer so the caller can keep prepending the
// CPF and encapsulation layers (see eip.rs).
// =========================================================================

use crate::buffer::ByteBuffer;
use crate::error::{EipError, Result};
use std::fmt;

pub const SERVICE_GET_ATTRIBUTE_LIST: u8 = 0x03;
pub const SERVICE_READ_TAG: u8 = 0x4C;
pub const SERVICE_WRITE_TAG: u8 = 0x4D;
pub const SERVICE_UNCONNECTED_SEND: u8 = 0x52;
pub const REPLY_FLAG: u8 = 0x80;

/// Connection Manager object: class 0x06, instance 1
const CM_ROUTE: [u8; 5] = [0x02, 0x20, 0x06, 0x24, 0x01];

pub const IDENTITY_CLASS: u16 = 0x01;

pub const STATUS_SUCCESS: u8 = 0x00;
pub const STATUS_PARTIAL_TRANSFER: u8 = 0x06;

/// Human readable text for a CIP general status code
pub fn status_message(general: u8) -> &'static str {
    match general {
        0x00 => "Success",
        0x01 => "Connection failure",
        0x02 => "Resource unavailable",
        0x03 => "Invalid parameter value",
        0x04 => "Path segment error",
        0x05 => "Path destination unknown",
        0x06 => "Partial transfer",
        0x07 => "Connection lost",
        0x08 => "Service not supported",
        0x09 => "Invalid attribute value",
        0x0A => "Attribute list error",
        0x0B => "Already in requested mode/state",
        0x0C => "Object state conflict",
        0x0D => "Object already exists",
        0x0E => "Attribute not settable",
        0x0F => "Privilege violation",
        0x10 => "Device state conflict",
        0x11 => "Reply data too large",
        0x12 => "Fragmentation of a primitive value",
        0x13 => "Not enough data",
        0x14 => "Attribute not supported",
        0x15 => "Too much data",
        0x16 => "Object does not exist",
        0x17 => "Service fragmentation sequence not in progress",
        0x18 => "No stored attribute data",
        0x19 => "Store operation failure",
        0x1A => "Routing failure, request packet too large",
        0x1B => "Routing failure, response packet too large",
        0x1C => "Missing attribute list entry data",
        0x1D => "Invalid attribute value list",
        0x1E => "Embedded service error",
        0x1F => "Vendor specific error",
        0x20 => "Invalid parameter",
        0x21 => "Write-once value or medium already written",
        0x22 => "Invalid reply received",
        0x23 => "Buffer overflow",
        0x24 => "Invalid message format",
        0x25 => "Key failure in path",
        0x26 => "Path size invalid",
        0x27 => "Unexpected attribute in list",
        0x28 => "Invalid member ID",
        0x29 => "Member not settable",
        0x2A => "Group 2 only server general failure",
        0x2B => "Unknown Modbus error",
        0x2C => "Attribute not gettable",
        _ => "Unknown CIP error",
    }
}

/// Atomic Logix data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipType {
    Bool,
    Sint,
    Int,
    Dint,
    Lint,
    Usint,
    Uint,
    Udint,
    Ulint,
    Real,
    Lreal,
}

impl CipType {
    pub const ALL: [CipType; 11] = [
        CipType::Bool,
        CipType::Sint,
        CipType::Int,
        CipType::Dint,
        CipType::Lint,
        CipType::Usint,
        CipType::Uint,
        CipType::Udint,
        CipType::Ulint,
        CipType::Real,
        CipType::Lreal,
    ];

    /// Type code as it appears in the read reply and write request
    pub fn code(self) -> u8 {
        match self {
            CipType::Bool => 0xC1,
            CipType::Sint => 0xC2,
            CipType::Int => 0xC3,
            CipType::Dint => 0xC4,
            CipType::Lint => 0xC5,
            CipType::Usint => 0xC6,
            CipType::Uint => 0xC7,
            CipType::Udint => 0xC8,
            CipType::Ulint => 0xC9,
            CipType::Real => 0xCA,
            CipType::Lreal => 0xCB,
        }
    }

    /// Size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            CipType::Bool | CipType::Sint | CipType::Usint => 1,
            CipType::Int | CipType::Uint => 2,
            CipType::Dint | CipType::Udint | CipType::Real => 4,
            CipType::Lint | CipType::Ulint | CipType::Lreal => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipType::Bool => "bool",
            CipType::Sint => "sint",
            CipType::Int => "int",
            CipType::Dint => "dint",
            CipType::Lint => "lint",
            CipType::Usint => "usint",
            CipType::Uint => "uint",
            CipType::Udint => "udint",
            CipType::Ulint => "ulint",
            CipType::Real => "real",
            CipType::Lreal => "lreal",
        }
    }

    /// Case-insensitive lookup by attribute name (`dint`, `REAL`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    /// The two-byte type header a write request carries for this type
    pub fn type_header(self) -> [u8; 2] {
        [self.code(), 0x00]
    }
}

impl fmt::Display for CipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Length of the type descriptor at the start of read reply data.
///
/// Fixed lookup table:
/// - `0xC1..=0xD4` atomic types: two bytes (type code + reserved)
/// - `0xA0..=0xA3` structure/array types: two bytes plus the descriptor
///   length carried in the second byte (`A0 02 <u16 handle>` is 4 bytes)
///
/// Anything else is rejected.
pub fn type_header_len(data: &[u8]) -> Result<usize> {
    let code = *data
        .first()
        .ok_or_else(|| EipError::TooSmall("read reply carries no type information".to_string()))?;

    let len = match code {
        0xC1..=0xD4 => 2,
        0xA0..=0xA3 => {
            let extra = *data.get(1).ok_or_else(|| {
                EipError::TooSmall("truncated aggregate type descriptor".to_string())
            })?;
            2 + extra as usize
        }
        other => {
            return Err(EipError::Unsupported(format!(
                "unsupported CIP data type 0x{:02X}",
                other
            )))
        }
    };

    if data.len() < len {
        return Err(EipError::TooSmall(format!(
            "type descriptor needs {} bytes, reply holds {}",
            len,
            data.len()
        )));
    }
    Ok(len)
}

/// Writes `[word count][segments...][pad]` for a comma-separated port path
/// such as `"1,0"`.
pub fn cip_encode_path(buf: &mut ByteBuffer, path: &str) -> Result<()> {
    let segments = parse_path_segments(path)?;
    let words = path_words(&segments)?;
    buf.put_u8(words);
    buf.write_bytes(&segments);
    if segments.len() % 2 != 0 {
        buf.put_u8(0);
    }
    Ok(())
}

/// Parses `"1,0"` into raw segment bytes
pub fn parse_path_segments(path: &str) -> Result<Vec<u8>> {
    let path = path.trim();
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Err(EipError::Format(format!(
                    "empty segment in routing path '{}'",
                    path
                )));
            }
            part.parse::<u8>().map_err(|_| {
                EipError::Format(format!(
                    "routing path segment '{}' is not a number in 0..=255",
                    part
                ))
            })
        })
        .collect()
}

fn path_words(segments: &[u8]) -> Result<u8> {
    u8::try_from((segments.len() + 1) / 2).map_err(|_| {
        EipError::TooLarge(format!(
            "routing path of {} bytes does not fit a word count byte",
            segments.len()
        ))
    })
}

/// Wraps the CIP request in `buf` in an Unconnected Send envelope addressed
/// through the Connection Manager, with the route to the target appended.
pub fn marshal_cip_cm_unconnected(
    buf: &mut ByteBuffer,
    route: &[u8],
    secs_per_tick: u8,
    timeout_ticks: u8,
) -> Result<()> {
    let embedded_len = u16::try_from(buf.len()).map_err(|_| {
        EipError::TooLarge(format!(
            "embedded request of {} bytes exceeds 65535",
            buf.len()
        ))
    })?;
    let route_words = path_words(route)?;

    let mut header = ByteBuffer::with_capacity(10);
    header.put_u8(SERVICE_UNCONNECTED_SEND);
    header.write_bytes(&CM_ROUTE);
    header.put_u8(secs_per_tick);
    header.put_u8(timeout_ticks);
    header.put_u16(embedded_len);
    buf.prepend(header.as_slice());

    buf.pad_to_even();
    buf.put_u8(route_words);
    buf.put_u8(0); // reserved
    buf.write_bytes(route);
    buf.pad_to_even();
    Ok(())
}

/// Read Tag request: service, IOI path, element count
pub fn marshal_cip_read(buf: &mut ByteBuffer, encoded_tag: &[u8], elem_count: u16) {
    buf.put_u8(SERVICE_READ_TAG);
    buf.write_bytes(encoded_tag);
    buf.put_u16(elem_count);
}

/// Write Tag request: service, IOI path, type header, element count, data
pub fn marshal_cip_write(
    buf: &mut ByteBuffer,
    encoded_tag: &[u8],
    type_info: &[u8],
    elem_count: u16,
    data: &[u8],
) {
    buf.put_u8(SERVICE_WRITE_TAG);
    buf.write_bytes(encoded_tag);
    buf.write_bytes(type_info);
    buf.put_u16(elem_count);
    buf.write_bytes(data);
}

fn put_logical_segment(buf: &mut ByteBuffer, short_form: u8, value: u16) {
    if value <= 0xFF {
        buf.put_u8(short_form);
        buf.put_u8(value as u8);
    } else {
        buf.put_u8(short_form | 0x01);
        buf.put_u8(0);
        buf.put_u16(value);
    }
}

/// Get Attribute List request for `class`/`instance`
pub fn marshal_cip_get_attr_list(
    buf: &mut ByteBuffer,
    class: u16,
    instance: u16,
    attributes: &[u16],
) -> Result<()> {
    let count = u16::try_from(attributes.len())
        .map_err(|_| EipError::TooLarge("too many attributes requested".to_string()))?;

    let mut path = ByteBuffer::new();
    put_logical_segment(&mut path, 0x20, class);
    put_logical_segment(&mut path, 0x24, instance);

    buf.put_u8(SERVICE_GET_ATTRIBUTE_LIST);
    buf.put_u8((path.len() / 2) as u8);
    buf.write_bytes(path.as_slice());
    buf.put_u16(count);
    for id in attributes {
        buf.put_u16(*id);
    }
    Ok(())
}

/// Decoded CIP reply header plus a view of the service data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipReply<'a> {
    pub service: u8,
    pub general_status: u8,
    pub extended_status: Vec<u16>,
    pub data: &'a [u8],
}

/// Decodes a CIP reply to `request_service`. Non-zero general status is an
/// error, as is an Unconnected Send failure reported by the router.
pub fn unmarshal_cip_reply(bytes: &[u8], request_service: u8) -> Result<CipReply<'_>> {
    if bytes.len() < 4 {
        return Err(EipError::TooSmall(format!(
            "CIP reply needs at least 4 bytes, got {}",
            bytes.len()
        )));
    }

    let service = bytes[0];
    let general_status = bytes[2];
    let ext_words = bytes[3] as usize;
    let data_start = 4 + ext_words * 2;
    if bytes.len() < data_start {
        return Err(EipError::TooSmall(format!(
            "CIP reply announces {} extended status words but is {} bytes long",
            ext_words,
            bytes.len()
        )));
    }

    let extended_status: Vec<u16> = bytes[4..data_start]
        .chunks_exact(2)
        .map(|w| u16::from_le_bytes([w[0], w[1]]))
        .collect();

    let routed_failure = service == (SERVICE_UNCONNECTED_SEND | REPLY_FLAG)
        && request_service != SERVICE_UNCONNECTED_SEND;
    if routed_failure && general_status == STATUS_SUCCESS {
        return Err(EipError::BadReply(
            "Unconnected Send reply without an embedded response".to_string(),
        ));
    }
    if !routed_failure && service != (request_service | REPLY_FLAG) {
        return Err(EipError::BadReply(format!(
            "reply service 0x{:02X} does not answer request 0x{:02X}",
            service, request_service
        )));
    }

    if general_status != STATUS_SUCCESS {
        return Err(EipError::CipStatus {
            general: general_status,
            extended: extended_status.first().copied(),
        });
    }

    Ok(CipReply {
        service,
        general_status,
        extended_status,
        data: &bytes[data_start..],
    })
}

/// Read Tag reply data split into the type descriptor and the values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReply<'a> {
    pub type_info: &'a [u8],
    pub data: &'a [u8],
}

impl ReadReply<'_> {
    pub fn cip_type(&self) -> Option<CipType> {
        self.type_info.first().copied().and_then(CipType::from_code)
    }
}

pub fn unmarshal_cip_read(data: &[u8]) -> Result<ReadReply<'_>> {
    let header_len = type_header_len(data)?;
    Ok(ReadReply {
        type_info: &data[..header_len],
        data: &data[header_len..],
    })
}

/// How an attribute's value is laid out in a Get Attribute List reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeLayout {
    Fixed(usize),
    /// One length byte followed by that many characters
    ShortString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub id: u16,
    pub status: u16,
    pub data: Vec<u8>,
}

/// Decodes a Get Attribute List reply. `layouts` gives the value layout per
/// requested attribute id; attributes reported with a non-zero status carry
/// no value.
pub fn unmarshal_cip_get_attr_list(
    data: &[u8],
    layouts: &[(u16, AttributeLayout)],
) -> Result<Vec<AttributeValue>> {
    let mut buf = ByteBuffer::from_vec(data.to_vec());
    buf.set_cursor(0);

    let too_small = |_| EipError::TooSmall("truncated Get Attribute List reply".to_string());

    let count = buf.take_u16().map_err(too_small)?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = buf.take_u16().map_err(too_small)?;
        let status = buf.take_u16().map_err(too_small)?;
        let layout = layouts
            .iter()
            .find(|(want, _)| *want == id)
            .map(|(_, layout)| *layout)
            .ok_or_else(|| EipError::BadReply(format!("unexpected attribute {} in reply", id)))?;

        let data = if status != 0 {
            Vec::new()
        } else {
            let len = match layout {
                AttributeLayout::Fixed(n) => n,
                AttributeLayout::ShortString => {
                    let n = buf.get_u8(buf.cursor()).map_err(too_small)? as usize;
                    n + 1
                }
            };
            buf.read_bytes(len).map_err(too_small)?.to_vec()
        };
        values.push(AttributeValue { id, status, data });
    }
    Ok(values)
}

/// Identity object (class 0x01) attributes read by
/// `EipClient::controller_identity`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerIdentity {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub revision_major: u8,
    pub revision_minor: u8,
    pub serial_number: u32,
    pub product_name: String,
}

impl ControllerIdentity {
    pub const ATTRIBUTES: [(u16, AttributeLayout); 6] = [
        (1, AttributeLayout::Fixed(2)),
        (2, AttributeLayout::Fixed(2)),
        (3, AttributeLayout::Fixed(2)),
        (4, AttributeLayout::Fixed(2)),
        (6, AttributeLayout::Fixed(4)),
        (7, AttributeLayout::ShortString),
    ];

    pub fn attribute_ids() -> Vec<u16> {
        Self::ATTRIBUTES.iter().map(|(id, _)| *id).collect()
    }

    /// Decodes the data of a Get Attribute List reply for the Identity object
    pub fn decode(data: &[u8]) -> Result<Self> {
        let values = unmarshal_cip_get_attr_list(data, &Self::ATTRIBUTES)?;

        let vendor = attribute(&values, 1)?;
        let device_type = attribute(&values, 2)?;
        let product_code = attribute(&values, 3)?;
        let revision = attribute(&values, 4)?;
        let serial = attribute(&values, 6)?;
        let name = attribute(&values, 7)?;

        Ok(Self {
            vendor_id: u16::from_le_bytes([vendor[0], vendor[1]]),
            device_type: u16::from_le_bytes([device_type[0], device_type[1]]),
            product_code: u16::from_le_bytes([product_code[0], product_code[1]]),
            revision_major: revision[0],
            revision_minor: revision[1],
            serial_number: u32::from_le_bytes([serial[0], serial[1], serial[2], serial[3]]),
            product_name: String::from_utf8_lossy(&name[1..]).into_owned(),
        })
    }
}

fn attribute(values: &[AttributeValue], id: u16) -> Result<&[u8]> {
    let attr = values
        .iter()
        .find(|v| v.id == id)
        .ok_or_else(|| EipError::NoData(format!("identity attribute {} missing", id)))?;
    if attr.status != 0 {
        return Err(EipError::CipStatus {
            general: attr.status as u8,
            extended: None,
        });
    }
    Ok(&attr.data)
}

impl fmt::Display for ControllerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}.{} (vendor {}, type {}, product {}, serial {:08X})",
            self.product_name,
            self.revision_major,
            self.revision_minor,
            self.vendor_id,
            self.device_type,
            self.product_code,
            self.serial_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path() {
        let mut buf = ByteBuffer::new();
        cip_encode_path(&mut buf, "1,2,3").unwrap();
        assert_eq!(buf.as_slice(), &[2, 1, 2, 3, 0]);

        let mut buf = ByteBuffer::new();
        cip_encode_path(&mut buf, "1,0").unwrap();
        assert_eq!(buf.as_slice(), &[1, 1, 0]);

        let mut buf = ByteBuffer::new();
        assert!(matches!(
            cip_encode_path(&mut buf, "1,x"),
            Err(EipError::Format(_))
        ));
        assert!(matches!(
            cip_encode_path(&mut buf, "1,256"),
            Err(EipError::Format(_))
        ));
        assert!(matches!(
            cip_encode_path(&mut buf, "1,"),
            Err(EipError::Format(_))
        ));
    }

    #[test]
    fn test_unconnected_send_layout() {
        let mut buf = ByteBuffer::from_vec(vec![0x4C, 0x01, 0x91, 0x00, 0x01]);
        marshal_cip_cm_unconnected(&mut buf, &[1, 0], 0x0A, 0x05).unwrap();
        assert_eq!(
            buf.as_slice(),
            &[
                0x52, 0x02, 0x20, 0x06, 0x24, 0x01, 0x0A, 0x05, 0x05, 0x00, // envelope
                0x4C, 0x01, 0x91, 0x00, 0x01, 0x00, // embedded + pad
                0x01, 0x00, 0x01, 0x00, // route
            ]
        );
    }

    #[test]
    fn test_read_request_layout() {
        let mut buf = ByteBuffer::new();
        marshal_cip_read(&mut buf, &[0x02, 0x91, 0x03, b'a', b'b', b'c', 0x00], 10);
        assert_eq!(
            buf.as_slice(),
            &[0x4C, 0x02, 0x91, 0x03, b'a', b'b', b'c', 0x00, 0x0A, 0x00]
        );
    }

    #[test]
    fn test_write_request_layout() {
        let mut buf = ByteBuffer::new();
        marshal_cip_write(
            &mut buf,
            &[0x01, 0x91, 0x00],
            &CipType::Dint.type_header(),
            1,
            &7i32.to_le_bytes(),
        );
        assert_eq!(
            buf.as_slice(),
            &[0x4D, 0x01, 0x91, 0x00, 0xC4, 0x00, 0x01, 0x00, 7, 0, 0, 0]
        );
    }

    #[test]
    fn test_type_classification() {
        assert_eq!(type_header_len(&[0xC4, 0x00, 1, 2, 3, 4]).unwrap(), 2);
        assert_eq!(type_header_len(&[0xD3, 0x00]).unwrap(), 2);
        assert_eq!(type_header_len(&[0xA0, 0x02, 0x34, 0x12, 9]).unwrap(), 4);
        assert!(matches!(
            type_header_len(&[0xA0, 0x02, 0x34]),
            Err(EipError::TooSmall(_))
        ));
        assert!(matches!(
            type_header_len(&[0x10, 0x00]),
            Err(EipError::Unsupported(_))
        ));
        assert!(matches!(type_header_len(&[]), Err(EipError::TooSmall(_))));
    }

    #[test]
    fn test_read_reply_split() {
        let reply = unmarshal_cip_read(&[0xCA, 0x00, 0x00, 0x00, 0x80, 0x3F]).unwrap();
        assert_eq!(reply.type_info, &[0xCA, 0x00]);
        assert_eq!(reply.data, &1.0f32.to_le_bytes());
        assert_eq!(reply.cip_type(), Some(CipType::Real));

        let reply = unmarshal_cip_read(&[0xA0, 0x02, 0xCE, 0x0F, 1, 2, 3]).unwrap();
        assert_eq!(reply.type_info.len(), 4);
        assert_eq!(reply.data, &[1, 2, 3]);
        assert_eq!(reply.cip_type(), None);
    }

    #[test]
    fn test_reply_status_handling() {
        let ok = unmarshal_cip_reply(&[0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00], SERVICE_READ_TAG)
            .unwrap();
        assert_eq!(ok.data, &[0xC4, 0x00]);

        let err = unmarshal_cip_reply(&[0xCC, 0x00, 0x04, 0x01, 0x05, 0x00], SERVICE_READ_TAG)
            .unwrap_err();
        assert_eq!(
            err,
            EipError::CipStatus {
                general: 0x04,
                extended: Some(0x0005)
            }
        );

        let routed = unmarshal_cip_reply(&[0xD2, 0x00, 0x01, 0x01, 0x04, 0x02], SERVICE_READ_TAG)
            .unwrap_err();
        assert_eq!(
            routed,
            EipError::CipStatus {
                general: 0x01,
                extended: Some(0x0204)
            }
        );

        assert!(matches!(
            unmarshal_cip_reply(&[0xCD, 0x00, 0x00, 0x00], SERVICE_READ_TAG),
            Err(EipError::BadReply(_))
        ));
        assert!(matches!(
            unmarshal_cip_reply(&[0xCC, 0x00, 0x00, 0x02, 0x00], SERVICE_READ_TAG),
            Err(EipError::TooSmall(_))
        ));
    }

    #[test]
    fn test_get_attr_list_request() {
        let mut buf = ByteBuffer::new();
        marshal_cip_get_attr_list(&mut buf, IDENTITY_CLASS, 1, &[1, 7]).unwrap();
        assert_eq!(
            buf.as_slice(),
            &[0x03, 0x02, 0x20, 0x01, 0x24, 0x01, 0x02, 0x00, 0x01, 0x00, 0x07, 0x00]
        );

        let mut buf = ByteBuffer::new();
        marshal_cip_get_attr_list(&mut buf, 0x1234, 0x0300, &[]).unwrap();
        assert_eq!(
            buf.as_slice(),
            &[0x03, 0x04, 0x21, 0x00, 0x34, 0x12, 0x25, 0x00, 0x00, 0x03, 0x00, 0x00]
        );
    }

    fn identity_reply() -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.put_u16(6);
        for (id, bytes) in [
            (1u16, vec![0x01, 0x00]),
            (2, vec![0x0E, 0x00]),
            (3, vec![0x5F, 0x00]),
            (4, vec![33, 11]),
            (6, 0xC0FF_EE01u32.to_le_bytes().to_vec()),
            (7, {
                let mut s = vec![10];
                s.extend_from_slice(b"1756-L85E/");
                s
            }),
        ] {
            buf.put_u16(id);
            buf.put_u16(0);
            buf.write_bytes(&bytes);
        }
        buf.into_vec()
    }

    #[test]
    fn test_identity_decode() {
        let identity = ControllerIdentity::decode(&identity_reply()).unwrap();
        assert_eq!(identity.vendor_id, 1);
        assert_eq!(identity.device_type, 0x0E);
        assert_eq!(identity.product_code, 0x5F);
        assert_eq!((identity.revision_major, identity.revision_minor), (33, 11));
        assert_eq!(identity.serial_number, 0xC0FF_EE01);
        assert_eq!(identity.product_name, "1756-L85E/");
    }

    #[test]
    fn test_identity_missing_attribute() {
        let mut reply = ByteBuffer::new();
        reply.put_u16(1);
        reply.put_u16(1);
        reply.put_u16(0x14); // attribute not supported
        let err = ControllerIdentity::decode(reply.as_slice()).unwrap_err();
        assert!(matches!(err, EipError::CipStatus { general: 0x14, .. }));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(CipType::from_name("DINT"), Some(CipType::Dint));
        assert_eq!(CipType::from_name(" real "), Some(CipType::Real));
        assert_eq!(CipType::from_name("string"), None);
        assert_eq!(CipType::from_code(0xCB), Some(CipType::Lreal));
        assert_eq!(CipType::Lint.size(), 8);
        assert_eq!(status_message(0x04), "Path segment error");
    }
}
