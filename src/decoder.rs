use crate::{
    canonical::{CanonicalImage, Rescale},
    config::PipelineConfig,
    display::WindowLevel,
    element::{DicomElement, ElementValue, Item, tag_name},
    error::{Error, Result, try_alloc},
    meta::{Endianness, MetaInformation, TransferSyntax},
};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use dicom::{
    core::{Tag, VR, header::DataElementHeader},
    encoding::{text::SpecificCharacterSet, transfer_syntax::TransferSyntaxIndex},
    parser::dataset::{
        DataSetReader, DataToken,
        read::{DataSetReaderOptions, Error as ReadError, ValueReadStrategy},
    },
    transfer_syntax::TransferSyntaxRegistry,
};
use dicom_dictionary_std::tags;
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};
use tracing::debug;

const MAX_SEQUENCE_DEPTH: usize = 32;

/// The raw bytes of the top-level _Pixel Data_ element.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelData {
    pub vr: VR,
    pub bytes: Vec<u8>,
}

/// One row of an element listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDescription {
    pub tag: Tag,
    pub name: &'static str,
    pub vr: VR,
    pub value: String,
}

/// Image pixel module attributes needed to interpret the pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelModule {
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub signed: bool,
}

/// A fully decoded data set: every element in stream order,
/// with the pixel data kept apart.
#[derive(Debug, Clone, PartialEq)]
pub struct DicomObject {
    pub meta: MetaInformation,
    pub elements: Vec<DicomElement>,
    pub pixel_data: Option<PixelData>,
}

pub struct DicomDecoder;

impl DicomDecoder {
    /// Read only the file meta group of a file.
    pub fn read_meta(path: impl AsRef<Path>) -> Result<MetaInformation> {
        let file = File::open(path.as_ref())?;
        MetaInformation::from_reader(BufReader::new(file))
    }

    /// Decode a whole file into elements and pixel data.
    ///
    /// # Errors
    ///
    /// Directory records fail with [`Error::UnsupportedObject`] and compressed
    /// transfer syntaxes with [`Error::UnsupportedCompression`], both before
    /// the data set is read.
    pub fn read_object(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<DicomObject> {
        let file = File::open(path.as_ref())?;
        Self::read_object_from(BufReader::new(file), config)
    }

    /// Decode a data set from any seekable source positioned at the start
    /// of a DICOM file. Reading stops after the top-level pixel data.
    pub fn read_object_from<R: Read + Seek>(
        mut source: R,
        config: &PipelineConfig,
    ) -> Result<DicomObject> {
        let meta = MetaInformation::from_reader(&mut source)?;

        if meta.is_directory_record() {
            return Err(Error::UnsupportedObject(
                "media storage directory".to_string(),
            ));
        }
        let unsupported = || Error::UnsupportedCompression(meta.transfer_syntax_uid.clone());
        if meta.transfer_syntax().is_compressed() {
            return Err(unsupported());
        }
        let ts = TransferSyntaxRegistry
            .get(&meta.transfer_syntax_uid)
            .ok_or_else(unsupported)?;

        let remaining = remaining_len(&mut source)?;
        let options = DataSetReaderOptions::default().value_read(ValueReadStrategy::Raw);
        let tokens = DataSetReader::new_with_ts_cs_options(
            &mut source,
            ts,
            SpecificCharacterSet::default(),
            options,
        )
        .map_err(Error::from_parser)?;
        let contents = read_data_set(tokens, remaining, &meta.transfer_syntax_uid)?;

        let pixel_data = match contents.pixel_header {
            Some(header) => Some(read_pixel_data(&mut source, header, config)?),
            None => None,
        };

        debug!(
            elements = contents.elements.len(),
            has_pixel_data = pixel_data.is_some(),
            transfer_syntax = %meta.transfer_syntax_uid,
            "decoded DICOM data set"
        );

        Ok(DicomObject {
            meta,
            elements: contents.elements,
            pixel_data,
        })
    }

    /// Decode a file straight into a canonical image.
    pub fn decode_image(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<CanonicalImage> {
        Self::read_object(path, config)?.to_image(config)
    }
}

/// Bytes left between the current position and the end of the source.
fn remaining_len<S: Seek>(source: &mut S) -> Result<u64> {
    let position = source.stream_position()?;
    let end = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(position))?;
    Ok(end.saturating_sub(position))
}

/// A sequence whose items are still being read.
struct OpenSequence {
    tag: Tag,
    length: u32,
    items: Vec<Item>,
    item: Option<Item>,
}

struct DataSetContents {
    elements: Vec<DicomElement>,
    /// Header of the top-level pixel data, whose value is still unread
    pixel_header: Option<DataElementHeader>,
}

/// Assemble parser tokens into elements, stopping at the top-level pixel
/// data header. No value longer than the `remaining` bytes of the source
/// is read.
fn read_data_set<I>(tokens: I, remaining: u64, transfer_syntax_uid: &str) -> Result<DataSetContents>
where
    I: IntoIterator<Item = Result<DataToken, ReadError>>,
{
    let mut elements = Vec::new();
    let mut open: Vec<OpenSequence> = Vec::new();
    let mut pending = None;

    for token in tokens {
        match token.map_err(Error::from_parser)? {
            DataToken::ElementHeader(header) => {
                if header.tag.group() == 0xFFFE {
                    return Err(Error::MalformedHeader(format!(
                        "unexpected delimiter {}",
                        header.tag
                    )));
                }
                if u64::from(header.len.0) > remaining {
                    return Err(Error::TruncatedStream);
                }
                if header.tag == tags::PIXEL_DATA && open.is_empty() {
                    return Ok(DataSetContents {
                        elements,
                        pixel_header: Some(header),
                    });
                }
                pending = Some(header);
            }
            DataToken::PrimitiveValue(value) => {
                let header: DataElementHeader = pending.take().ok_or_else(|| {
                    Error::MalformedHeader("value without an element header".to_string())
                })?;
                let element = DicomElement::new(
                    header.tag,
                    header.vr,
                    header.len.0,
                    ElementValue::Bytes(value.to_bytes().into_owned()),
                );
                container(&mut open, &mut elements)?.push(element);
            }
            DataToken::SequenceStart { tag, len } => {
                if open.len() >= MAX_SEQUENCE_DEPTH {
                    return Err(Error::MalformedHeader(format!(
                        "sequences nested deeper than {MAX_SEQUENCE_DEPTH} levels"
                    )));
                }
                open.push(OpenSequence {
                    tag,
                    length: len.0,
                    items: Vec::new(),
                    item: None,
                });
            }
            DataToken::ItemStart { .. } => match open.last_mut() {
                Some(sequence) => sequence.item = Some(Vec::new()),
                None => {
                    return Err(Error::MalformedHeader(
                        "item outside of a sequence".to_string(),
                    ));
                }
            },
            DataToken::ItemEnd => {
                if let Some(sequence) = open.last_mut() {
                    sequence.items.extend(sequence.item.take());
                }
            }
            DataToken::SequenceEnd => {
                let sequence = open.pop().ok_or_else(|| {
                    Error::MalformedHeader("sequence end outside of a sequence".to_string())
                })?;
                let element = DicomElement::new(
                    sequence.tag,
                    VR::SQ,
                    sequence.length,
                    ElementValue::Sequence(sequence.items),
                );
                container(&mut open, &mut elements)?.push(element);
            }
            // pixel data fragments
            _ => {
                return Err(Error::UnsupportedCompression(format!(
                    "encapsulated pixel data in {transfer_syntax_uid}"
                )));
            }
        }
    }

    // the source ended cleanly at an element boundary inside an item
    if !open.is_empty() {
        return Err(Error::TruncatedStream);
    }
    Ok(DataSetContents {
        elements,
        pixel_header: None,
    })
}

/// Where the next complete element goes: the innermost open item, or the
/// top level.
fn container<'a>(
    open: &'a mut [OpenSequence],
    top_level: &'a mut Vec<DicomElement>,
) -> Result<&'a mut Vec<DicomElement>> {
    match open.last_mut() {
        None => Ok(top_level),
        Some(sequence) => {
            let tag = sequence.tag;
            sequence.item.as_mut().ok_or_else(|| {
                Error::MalformedHeader(format!("element outside of an item in {tag}"))
            })
        }
    }
}

/// Read the value of the top-level pixel data right after its header,
/// within the pixel budget.
fn read_pixel_data<R: Read>(
    source: &mut R,
    header: DataElementHeader,
    config: &PipelineConfig,
) -> Result<PixelData> {
    let mut bytes = try_alloc::<u8>(header.len.0 as usize, config.max_pixel_bytes())?;
    source
        .read_exact(&mut bytes)
        .map_err(Error::from_dicom_io)?;
    Ok(PixelData {
        vr: header.vr,
        bytes,
    })
}

impl DicomObject {
    pub fn transfer_syntax(&self) -> TransferSyntax {
        self.meta.transfer_syntax()
    }

    /// Top-level element by tag
    pub fn element(&self, tag: Tag) -> Option<&DicomElement> {
        self.elements.iter().find(|e| e.tag == tag)
    }

    fn u16_value(&self, tag: Tag) -> Option<u16> {
        self.element(tag)?.to_u16(self.transfer_syntax().endianness())
    }

    /// List every top-level element, pixel data included, with its
    /// dictionary name and a short value preview.
    pub fn describe(&self) -> Vec<ElementDescription> {
        let endianness = self.transfer_syntax().endianness();
        let mut rows: Vec<_> = self
            .elements
            .iter()
            .map(|element| ElementDescription {
                tag: element.tag,
                name: element.name(),
                vr: element.vr,
                value: element.preview(endianness),
            })
            .collect();
        if let Some(pixel_data) = &self.pixel_data {
            rows.push(ElementDescription {
                tag: tags::PIXEL_DATA,
                name: tag_name(tags::PIXEL_DATA),
                vr: pixel_data.vr,
                value: format!("[{} bytes]", pixel_data.bytes.len()),
            });
        }
        rows
    }

    pub fn pixel_module(&self) -> Result<PixelModule> {
        let missing = |tag: Tag| Error::MalformedHeader(format!("missing {}", tag_name(tag)));

        let rows = self.u16_value(tags::ROWS).ok_or_else(|| missing(tags::ROWS))?;
        let columns = self
            .u16_value(tags::COLUMNS)
            .ok_or_else(|| missing(tags::COLUMNS))?;
        let bits_allocated = self
            .u16_value(tags::BITS_ALLOCATED)
            .ok_or_else(|| missing(tags::BITS_ALLOCATED))?;
        let bits_stored = self
            .u16_value(tags::BITS_STORED)
            .unwrap_or(bits_allocated)
            .clamp(1, bits_allocated.max(1));

        Ok(PixelModule {
            rows,
            columns,
            samples_per_pixel: self.u16_value(tags::SAMPLES_PER_PIXEL).unwrap_or(1),
            bits_allocated,
            bits_stored,
            signed: self.u16_value(tags::PIXEL_REPRESENTATION) == Some(1),
        })
    }

    /// Interpret the pixel data as a canonical 16-bit image.
    ///
    /// Only the first frame is used. Signed samples are shifted into the
    /// unsigned range and the rescale intercept compensates, so modality
    /// values are unchanged.
    pub fn to_image(&self, config: &PipelineConfig) -> Result<CanonicalImage> {
        let pixel_data = self
            .pixel_data
            .as_ref()
            .ok_or_else(|| Error::UnsupportedObject("no pixel data".to_string()))?;
        let module = self.pixel_module()?;

        if module.samples_per_pixel != 1 {
            return Err(Error::UnsupportedObject(format!(
                "{} samples per pixel",
                module.samples_per_pixel
            )));
        }
        if !matches!(module.bits_allocated, 8 | 16) {
            return Err(Error::UnsupportedObject(format!(
                "{} bits allocated",
                module.bits_allocated
            )));
        }

        let (width, height) = (u32::from(module.columns), u32::from(module.rows));
        let count = width as usize * height as usize;
        let bytes_per_sample = usize::from(module.bits_allocated / 8);
        let frame = pixel_data
            .bytes
            .get(..count * bytes_per_sample)
            .ok_or(Error::InvalidDimensions {
                width,
                height,
                len: pixel_data.bytes.len() / bytes_per_sample,
            })?;

        let mut samples = try_alloc::<u16>(count, config.max_pixel_bytes())?;
        if bytes_per_sample == 1 {
            samples
                .iter_mut()
                .zip(frame)
                .for_each(|(sample, &byte)| *sample = u16::from(byte));
        } else {
            match self.transfer_syntax().endianness() {
                Endianness::Little => LittleEndian::read_u16_into(frame, &mut samples),
                Endianness::Big => BigEndian::read_u16_into(frame, &mut samples),
            }
        }

        let offset = normalize_samples(&mut samples, module.bits_stored, module.signed);

        let slope = self
            .element(tags::RESCALE_SLOPE)
            .and_then(DicomElement::to_f32)
            .filter(|s| *s != 0.0)
            .unwrap_or(1.0);
        let intercept = self
            .element(tags::RESCALE_INTERCEPT)
            .and_then(DicomElement::to_f32)
            .unwrap_or(0.0);
        let rescale = Rescale::new(slope, intercept - slope * offset);

        let orientation = self
            .element(tags::IMAGE_ORIENTATION_PATIENT)
            .map(DicomElement::to_f32s)
            .and_then(|values| <[f32; 6]>::try_from(values).ok());

        let image = CanonicalImage::new(width, height, samples)?
            .with_rescale(rescale)
            .with_orientation(orientation);

        let window = match (
            self.element(tags::WINDOW_CENTER).and_then(DicomElement::to_f32),
            self.element(tags::WINDOW_WIDTH).and_then(DicomElement::to_f32),
        ) {
            (Some(center), Some(width)) if width > 0.0 => WindowLevel::new(center, width),
            _ => WindowLevel::from_range(image.modality_range()),
        };

        debug!(
            width,
            height,
            bits_stored = module.bits_stored,
            signed = module.signed,
            "built canonical image"
        );

        Ok(image.with_window(window))
    }
}

/// Keep the low `bits_stored` bits of each sample. Signed samples are sign
/// extended and shifted up by half the range; the shift is returned.
fn normalize_samples(samples: &mut [u16], bits_stored: u16, signed: bool) -> f32 {
    let bits = u32::from(bits_stored.clamp(1, 16));
    let mask = ((1u32 << bits) - 1) as u16;

    if !signed {
        samples.iter_mut().for_each(|s| *s &= mask);
        return 0.0;
    }

    let half = 1i32 << (bits - 1);
    samples.iter_mut().for_each(|s| {
        let raw = i32::from(*s & mask);
        let value = if raw >= half { raw - (1 << bits) } else { raw };
        *s = (value + half) as u16;
    });
    half as f32
}
