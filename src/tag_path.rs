// tag_path.rs - Logix tag name to IOI encoding
// =========================================================================
//
// Turns references like `Program:Main.Recipe[3].Steps[1,2]` into the
// symbolic/numeric segment sequence CIP expects:
//
//   [word count] ( 0x91 len name [pad] | 0x28 u8 | 0x29 00 u16 | 0x2A 00 u32 )+
//
// The decoder exists to verify the encoder and to let test servers
// recover tag names from requests.
// =========================================================================

use crate::buffer::ByteBuffer;
use crate::error::{EipError, Result};
use std::fmt;

const SYMBOLIC_SEGMENT: u8 = 0x91;
const ELEMENT_U8: u8 = 0x28;
const ELEMENT_U16: u8 = 0x29;
const ELEMENT_U32: u8 = 0x2A;

/// One component of a tag reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSegment {
    Symbol(String),
    Element(u32),
}

/// A parsed tag reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPath {
    segments: Vec<TagSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Start,
    Name,
    Array,
    /// Space after an index digit; only `,` `]` or more spaces may follow
    IndexEnd,
    /// Just after `]`
    ArrayEnd,
    Dot,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

impl TagPath {
    /// Parses an LGX-style tag reference
    pub fn parse(name: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut state = ParseState::Start;
        let mut symbol = String::new();
        let mut index = String::new();

        for c in name.chars() {
            state = match state {
                ParseState::Start | ParseState::Dot => {
                    if is_name_start(c) {
                        symbol.push(c);
                        ParseState::Name
                    } else if state == ParseState::Start {
                        return Err(EipError::Format(format!(
                            "tag '{}' must start with a name",
                            name
                        )));
                    } else {
                        return Err(EipError::Format(format!(
                            "expected a member name after '.' in '{}'",
                            name
                        )));
                    }
                }
                ParseState::Name => match c {
                    c if is_name_char(c) => {
                        symbol.push(c);
                        ParseState::Name
                    }
                    '.' => {
                        segments.push(finish_symbol(&mut symbol)?);
                        ParseState::Dot
                    }
                    '[' => {
                        segments.push(finish_symbol(&mut symbol)?);
                        ParseState::Array
                    }
                    other => {
                        return Err(EipError::Format(format!(
                            "invalid character '{}' in tag '{}'",
                            other, name
                        )))
                    }
                },
                ParseState::Array => match c {
                    '0'..='9' => {
                        index.push(c);
                        ParseState::Array
                    }
                    ' ' if index.is_empty() => ParseState::Array,
                    ' ' => ParseState::IndexEnd,
                    ',' => {
                        segments.push(finish_index(&mut index, name)?);
                        ParseState::Array
                    }
                    ']' => {
                        segments.push(finish_index(&mut index, name)?);
                        ParseState::ArrayEnd
                    }
                    other => {
                        return Err(EipError::Format(format!(
                            "non-numeric array index character '{}' in '{}'",
                            other, name
                        )))
                    }
                },
                ParseState::IndexEnd => match c {
                    ' ' => ParseState::IndexEnd,
                    ',' => {
                        segments.push(finish_index(&mut index, name)?);
                        ParseState::Array
                    }
                    ']' => {
                        segments.push(finish_index(&mut index, name)?);
                        ParseState::ArrayEnd
                    }
                    other => {
                        return Err(EipError::Format(format!(
                            "unexpected '{}' after array index '{}' in '{}'",
                            other, index, name
                        )))
                    }
                },
                ParseState::ArrayEnd => match c {
                    '.' => ParseState::Dot,
                    '[' => ParseState::Array,
                    other => {
                        return Err(EipError::Format(format!(
                            "unexpected '{}' after ']' in '{}'",
                            other, name
                        )))
                    }
                },
            };
        }

        match state {
            ParseState::Name => segments.push(finish_symbol(&mut symbol)?),
            ParseState::ArrayEnd => {}
            ParseState::Start => {
                return Err(EipError::Format("tag name is empty".to_string()));
            }
            ParseState::Array | ParseState::IndexEnd => {
                return Err(EipError::Format(format!("unterminated '[' in '{}'", name)));
            }
            ParseState::Dot => {
                return Err(EipError::Format(format!("trailing '.' in '{}'", name)));
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[TagSegment] {
        &self.segments
    }

    /// Leading symbolic name, e.g. `Recipe` for `Recipe[3].Step`
    pub fn base_name(&self) -> &str {
        match self.segments.first() {
            Some(TagSegment::Symbol(name)) => name,
            _ => "",
        }
    }

    /// Appends the word-count prefixed IOI to `buf`
    pub fn encode(&self, buf: &mut ByteBuffer) -> Result<()> {
        let mut body = ByteBuffer::new();
        for segment in &self.segments {
            match segment {
                TagSegment::Symbol(name) => {
                    body.put_u8(SYMBOLIC_SEGMENT);
                    body.put_u8(name.len() as u8);
                    body.write_bytes(name.as_bytes());
                    body.pad_to_even();
                }
                TagSegment::Element(index) => {
                    if *index <= 0xFF {
                        body.put_u8(ELEMENT_U8);
                        body.put_u8(*index as u8);
                    } else if *index <= 0xFFFF {
                        body.put_u8(ELEMENT_U16);
                        body.put_u8(0);
                        body.put_u16(*index as u16);
                    } else {
                        body.put_u8(ELEMENT_U32);
                        body.put_u8(0);
                        body.put_u32(*index);
                    }
                }
            }
        }

        let words = u8::try_from(body.len() / 2).map_err(|_| {
            EipError::TooLarge(format!(
                "encoded tag path of {} bytes exceeds 255 words",
                body.len()
            ))
        })?;
        buf.put_u8(words);
        buf.write_bytes(body.as_slice());
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new();
        self.encode(&mut buf)?;
        Ok(buf.into_vec())
    }

    /// Decodes a word-count prefixed IOI back into segments
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let words = *bytes
            .first()
            .ok_or_else(|| EipError::TooSmall("empty tag path".to_string()))?;
        let end = 1 + words as usize * 2;
        if bytes.len() < end {
            return Err(EipError::TooSmall(format!(
                "tag path announces {} words but holds {} bytes",
                words,
                bytes.len() - 1
            )));
        }

        let mut buf = ByteBuffer::from_vec(bytes[1..end].to_vec());
        buf.set_cursor(0);
        let truncated = |_| EipError::BadData("truncated tag path segment".to_string());

        let mut segments = Vec::new();
        while buf.cursor() < buf.len() {
            match buf.take_u8().map_err(truncated)? {
                SYMBOLIC_SEGMENT => {
                    let len = buf.take_u8().map_err(truncated)? as usize;
                    let raw = buf.read_bytes(len).map_err(truncated)?;
                    let name = String::from_utf8(raw.to_vec()).map_err(|_| {
                        EipError::BadData("symbolic segment is not valid text".to_string())
                    })?;
                    if len % 2 != 0 {
                        buf.take_u8().map_err(truncated)?;
                    }
                    segments.push(TagSegment::Symbol(name));
                }
                ELEMENT_U8 => {
                    let index = buf.take_u8().map_err(truncated)?;
                    segments.push(TagSegment::Element(index as u32));
                }
                ELEMENT_U16 => {
                    buf.take_u8().map_err(truncated)?;
                    let index = buf.take_u16().map_err(truncated)?;
                    segments.push(TagSegment::Element(index as u32));
                }
                ELEMENT_U32 => {
                    buf.take_u8().map_err(truncated)?;
                    let index = buf.take_u32().map_err(truncated)?;
                    segments.push(TagSegment::Element(index));
                }
                other => {
                    return Err(EipError::BadData(format!(
                        "unknown path segment type 0x{:02X}",
                        other
                    )))
                }
            }
        }

        Ok(Self { segments })
    }
}

fn finish_symbol(symbol: &mut String) -> Result<TagSegment> {
    if symbol.len() > 255 {
        return Err(EipError::TooLarge(format!(
            "tag name component '{}' longer than 255 characters",
            symbol
        )));
    }
    Ok(TagSegment::Symbol(std::mem::take(symbol)))
}

fn finish_index(index: &mut String, name: &str) -> Result<TagSegment> {
    if index.is_empty() {
        return Err(EipError::Format(format!("empty array index in '{}'", name)));
    }
    let value = index.parse::<u32>().map_err(|_| {
        EipError::Format(format!("array index '{}' out of range in '{}'", index, name))
    })?;
    index.clear();
    Ok(TagSegment::Element(value))
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut in_brackets = false;
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                TagSegment::Symbol(name) => {
                    if in_brackets {
                        f.write_str("]")?;
                        in_brackets = false;
                    }
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                TagSegment::Element(index) => {
                    if in_brackets {
                        write!(f, ",{}", index)?;
                    } else {
                        write!(f, "[{}", index)?;
                        in_brackets = true;
                    }
                }
            }
        }
        if in_brackets {
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Appends the IOI encoding of `name` to `buf`
pub fn cip_encode_tag_name(buf: &mut ByteBuffer, name: &str) -> Result<()> {
    TagPath::parse(name)?.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(name: &str) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        cip_encode_tag_name(&mut buf, name).unwrap();
        buf.into_vec()
    }

    #[test]
    fn test_simple_array_element() {
        let mut expected = vec![7u8, 0x91, 9];
        expected.extend_from_slice(b"TestArray");
        expected.extend_from_slice(&[0x00, 0x28, 0x03]);
        assert_eq!(encode("TestArray[3]"), expected);
    }

    #[test]
    fn test_index_width_by_magnitude() {
        assert_eq!(
            encode("Big[100000]"),
            vec![6, 0x91, 3, b'B', b'i', b'g', 0x00, 0x2A, 0x00, 0xA0, 0x86, 0x01, 0x00]
        );
        assert_eq!(
            encode("Mid[300]"),
            vec![5, 0x91, 3, b'M', b'i', b'd', 0x00, 0x29, 0x00, 0x2C, 0x01]
        );
    }

    #[test]
    fn test_members_and_even_names() {
        assert_eq!(
            encode("ab.cd"),
            vec![4, 0x91, 2, b'a', b'b', 0x91, 2, b'c', b'd']
        );
    }

    #[test]
    fn test_parse_shapes() {
        let path = TagPath::parse("Program:Main.foo[3].bar[1,2]").unwrap();
        assert_eq!(
            path.segments(),
            &[
                TagSegment::Symbol("Program:Main".into()),
                TagSegment::Symbol("foo".into()),
                TagSegment::Element(3),
                TagSegment::Symbol("bar".into()),
                TagSegment::Element(1),
                TagSegment::Element(2),
            ]
        );
        assert_eq!(path.base_name(), "Program:Main");
        assert_eq!(path.to_string(), "Program:Main.foo[3].bar[1,2]");
    }

    #[test]
    fn test_decode_recovers_segments() {
        for name in [
            "TestArray[3]",
            "Big[100000]",
            "a.b.c",
            "Recipe[2].Steps[300].Time",
            "grid[1][65535]",
            "_x9",
        ] {
            let parsed = TagPath::parse(name).unwrap();
            let decoded = TagPath::decode(&parsed.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, parsed, "{}", name);
        }
    }

    #[test]
    fn test_spaces_only_around_indexes() {
        for name in ["a[ 7 ]", "a[1 , 2]", "a[ 1,2 ]"] {
            assert!(TagPath::parse(name).is_ok(), "{}", name);
        }
        assert_eq!(TagPath::parse("a[ 7 ]").unwrap().to_string(), "a[7]");
        for bad in ["a[1 2]", "a[1 ,2 3]", "a[ 1 2 ]", "a[1 "] {
            assert!(
                matches!(TagPath::parse(bad), Err(EipError::Format(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_format_errors() {
        for bad in ["", "[3]", "1abc", "a[", "a[x]", "a[]", "a.", "a..b", "a[1]b", "a b"] {
            let mut buf = ByteBuffer::new();
            let err = cip_encode_tag_name(&mut buf, bad).unwrap_err();
            assert!(matches!(err, EipError::Format(_)), "{}: {:?}", bad, err);
        }
    }

    #[test]
    fn test_oversized_paths() {
        let long = "x".repeat(256);
        assert!(matches!(
            TagPath::parse(&long),
            Err(EipError::TooLarge(_))
        ));

        let many = vec!["abcd"; 90].join(".");
        let path = TagPath::parse(&many).unwrap();
        assert!(matches!(path.to_bytes(), Err(EipError::TooLarge(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            TagPath::decode(&[1, 0x55, 0x00]),
            Err(EipError::BadData(_))
        ));
        assert!(matches!(
            TagPath::decode(&[3, 0x91, 0x01]),
            Err(EipError::TooSmall(_))
        ));
    }
}
