//! Tag attribute strings.
//!
//! ```text
//! protocol=ab_eip&gateway=10.1.2.3&path=1,0&name=Recipe[3]&elem_count=10&elem_type=dint
//! ```

use crate::cip::CipType;
use crate::error::{EipError, Result};
use std::fmt;

pub const MAX_ELEM_COUNT: usize = u16::MAX as usize;

/// Everything needed to create a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAttributes {
    /// `gateway[,path]`, fed to [`crate::endpoint::Endpoint::parse`]
    pub endpoint: String,
    pub name: String,
    pub elem_count: usize,
    pub elem_size: Option<usize>,
    pub elem_type: Option<CipType>,
}

impl TagAttributes {
    pub fn parse(text: &str) -> Result<Self> {
        let mut gateway = None;
        let mut path = None;
        let mut name = None;
        let mut elem_count = 1usize;
        let mut elem_size = None;
        let mut elem_type = None;

        for pair in text.split('&').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                EipError::BadParam(format!("attribute '{}' is not key=value", pair))
            })?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if value.is_empty() {
                return Err(EipError::BadParam(format!("attribute '{}' has no value", key)));
            }

            match key.as_str() {
                "protocol" => {
                    if !matches!(value.to_ascii_lowercase().as_str(), "ab_eip" | "ab-eip") {
                        return Err(EipError::Unsupported(format!(
                            "protocol '{}' is not supported",
                            value
                        )));
                    }
                }
                "gateway" => gateway = Some(value.to_string()),
                "path" => path = Some(value.to_string()),
                "name" => name = Some(value.to_string()),
                "elem_count" => {
                    elem_count = parse_count(value, 1, MAX_ELEM_COUNT, "elem_count")?;
                }
                "elem_size" => {
                    elem_size = Some(parse_count(value, 1, u16::MAX as usize, "elem_size")?);
                }
                "elem_type" => {
                    elem_type = Some(CipType::from_name(value).ok_or_else(|| {
                        EipError::BadParam(format!("unknown elem_type '{}'", value))
                    })?);
                }
                other => {
                    tracing::debug!(key = other, "ignoring unknown tag attribute");
                }
            }
        }

        let name = name.ok_or_else(|| EipError::BadParam("attribute 'name' is required".to_string()))?;

        let endpoint = match (gateway, path) {
            (Some(gateway), Some(path)) => format!("{},{}", gateway, path),
            (Some(gateway), None) => gateway,
            (None, Some(path)) => path,
            (None, None) => {
                return Err(EipError::BadParam(
                    "attribute 'gateway' or 'path' is required".to_string(),
                ))
            }
        };

        if let (Some(size), Some(ty)) = (elem_size, elem_type) {
            if size != ty.size() {
                return Err(EipError::BadParam(format!(
                    "elem_size {} does not match elem_type {} ({} bytes)",
                    size,
                    ty,
                    ty.size()
                )));
            }
        }

        Ok(Self {
            endpoint,
            name,
            elem_count,
            elem_size,
            elem_type,
        })
    }

    /// Element size from the explicit size or the declared type
    pub fn element_size(&self) -> Option<usize> {
        self.elem_size.or(self.elem_type.map(CipType::size))
    }

    /// Data size in bytes when the element size is known up front
    pub fn data_size(&self) -> Option<usize> {
        self.element_size().map(|size| size * self.elem_count)
    }
}

fn parse_count(value: &str, min: usize, max: usize, key: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .ok()
        .filter(|n| (min..=max).contains(n))
        .ok_or_else(|| {
            EipError::BadParam(format!(
                "{} must be a number in {}..={}, got '{}'",
                key, min, max, value
            ))
        })
}

impl fmt::Display for TagAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "protocol=ab_eip&path={}&name={}&elem_count={}",
            self.endpoint, self.name, self.elem_count
        )?;
        if let Some(size) = self.elem_size {
            write!(f, "&elem_size={}", size)?;
        }
        if let Some(ty) = self.elem_type {
            write!(f, "&elem_type={}", ty)?;
        }
        Ok(())
    }
}
