//! Data elements as produced by the streaming decoder,
//! and the attribute name lookup used to describe them.

use crate::meta::Endianness;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use dicom::core::{Tag, VR, dictionary::DataDictionary};
use dicom_dictionary_std::StandardDataDictionary;
use std::fmt::Write;

/// Value length marking a sequence or item closed by a delimiter
pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// Name shown for tags missing from the standard dictionary
pub const UNKNOWN_TAG_NAME: &str = "N/A";

const PREVIEW_MAX_CHARS: usize = 64;

/// One item of a sequence: a nested data set.
pub type Item = Vec<DicomElement>;

#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Bytes(Vec<u8>),
    Sequence(Vec<Item>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DicomElement {
    pub tag: Tag,
    pub vr: VR,
    /// Length as declared in the stream, possibly [`UNDEFINED_LENGTH`]
    pub length: u32,
    pub value: ElementValue,
}

/// Keyword of a standard attribute, e.g. `WindowCenter` for (0028,1050).
pub fn tag_name(tag: Tag) -> &'static str {
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.alias)
        .unwrap_or(UNKNOWN_TAG_NAME)
}

impl DicomElement {
    pub fn new(tag: Tag, vr: VR, length: u32, value: ElementValue) -> Self {
        Self {
            tag,
            vr,
            length,
            value,
        }
    }

    pub fn name(&self) -> &'static str {
        tag_name(self.tag)
    }

    pub fn is_undefined_length(&self) -> bool {
        self.length == UNDEFINED_LENGTH
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            ElementValue::Bytes(bytes) => Some(bytes),
            ElementValue::Sequence(_) => None,
        }
    }

    pub fn items(&self) -> Option<&[Item]> {
        match &self.value {
            ElementValue::Sequence(items) => Some(items),
            ElementValue::Bytes(_) => None,
        }
    }

    /// Text value with DICOM padding (trailing spaces and NULs) removed.
    pub fn to_str(&self) -> Option<&str> {
        let text = std::str::from_utf8(self.bytes()?).ok()?;
        Some(text.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
    }

    /// All numbers of a multi-valued decimal or integer string (DS, IS).
    pub fn to_f32s(&self) -> Vec<f32> {
        self.to_str()
            .map(|text| {
                text.split('\\')
                    .filter_map(|part| part.trim().parse::<f32>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_f32(&self) -> Option<f32> {
        self.to_f32s().first().copied()
    }

    /// First value of an unsigned short (US) element.
    pub fn to_u16(&self, endianness: Endianness) -> Option<u16> {
        let bytes = self.bytes()?;
        if bytes.len() < 2 {
            return None;
        }
        Some(match endianness {
            Endianness::Little => LittleEndian::read_u16(bytes),
            Endianness::Big => BigEndian::read_u16(bytes),
        })
    }

    /// Short human readable rendering of the value.
    pub fn preview(&self, endianness: Endianness) -> String {
        let bytes = match &self.value {
            ElementValue::Sequence(items) => return format!("[{} items]", items.len()),
            ElementValue::Bytes(bytes) => bytes,
        };

        let text = match endianness {
            Endianness::Little => numeric_preview::<LittleEndian>(self.vr, bytes),
            Endianness::Big => numeric_preview::<BigEndian>(self.vr, bytes),
        }
        .unwrap_or_else(|| match self.vr {
            VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN => {
                format!("[{} bytes]", bytes.len())
            }
            _ => self
                .to_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("[{} bytes]", bytes.len())),
        });

        truncate(text)
    }
}

fn numeric_preview<B: ByteOrder>(vr: VR, bytes: &[u8]) -> Option<String> {
    let values: Vec<String> = match vr {
        VR::US => bytes.chunks_exact(2).map(|c| B::read_u16(c).to_string()).collect(),
        VR::SS => bytes.chunks_exact(2).map(|c| B::read_i16(c).to_string()).collect(),
        VR::UL => bytes.chunks_exact(4).map(|c| B::read_u32(c).to_string()).collect(),
        VR::SL => bytes.chunks_exact(4).map(|c| B::read_i32(c).to_string()).collect(),
        VR::FL => bytes.chunks_exact(4).map(|c| B::read_f32(c).to_string()).collect(),
        VR::FD => bytes.chunks_exact(8).map(|c| B::read_f64(c).to_string()).collect(),
        VR::AT => bytes
            .chunks_exact(4)
            .map(|c| Tag(B::read_u16(&c[0..2]), B::read_u16(&c[2..4])).to_string())
            .collect(),
        _ => return None,
    };
    Some(values.join("\\"))
}

fn truncate(text: String) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text;
    }
    let mut short: String = text.chars().take(PREVIEW_MAX_CHARS - 3).collect();
    let _ = write!(short, "...");
    short
}
