//! DICOM Part 10 files for tests, written with `dicom-object`.

use crate::meta::TransferSyntax;

use dicom::{
    core::{DataElement, PrimitiveValue, Tag, VR, value::DataSetSequence},
    object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject},
};
use dicom_dictionary_std::{tags, uids};
use std::path::{Path, PathBuf};

pub const MR_IMAGE_STORAGE: &str = uids::MR_IMAGE_STORAGE;
pub const SOP_INSTANCE_UID: &str = "1.2.3.4.5";
const IMPLEMENTATION_CLASS_UID: &str = "1.2.3.4";

/// (0008,0080) UT claiming 0xFFFFFFF0 bytes, followed by only two of them,
/// in explicit VR little endian.
pub const OVERSIZED_TEXT_ELEMENT: [u8; 14] = [
    0x08, 0x00, 0x80, 0x00, b'U', b'T', 0, 0, 0xF0, 0xFF, 0xFF, 0xFF, b'A', b'B',
];

#[derive(Debug, Clone)]
pub struct DicomFileBuilder {
    transfer_syntax_uid: String,
    sop_class_uid: String,
    object: InMemDicomObject,
}

impl DicomFileBuilder {
    pub fn new(transfer_syntax_uid: &str) -> Self {
        Self {
            transfer_syntax_uid: transfer_syntax_uid.to_string(),
            sop_class_uid: MR_IMAGE_STORAGE.to_string(),
            object: InMemDicomObject::new_empty(),
        }
    }

    pub fn explicit_le() -> Self {
        Self::new(uids::EXPLICIT_VR_LITTLE_ENDIAN)
    }

    pub fn implicit_le() -> Self {
        Self::new(uids::IMPLICIT_VR_LITTLE_ENDIAN)
    }

    pub fn explicit_be() -> Self {
        Self::new(uids::EXPLICIT_VR_BIG_ENDIAN)
    }

    pub fn sop_class(mut self, uid: &str) -> Self {
        self.sop_class_uid = uid.to_string();
        self
    }

    pub fn element(mut self, tag: Tag, vr: VR, value: PrimitiveValue) -> Self {
        self.object.put(DataElement::new(tag, vr, value));
        self
    }

    pub fn us(self, tag: Tag, value: u16) -> Self {
        self.element(tag, VR::US, PrimitiveValue::from(value))
    }

    pub fn ds(self, tag: Tag, value: &str) -> Self {
        self.element(tag, VR::DS, PrimitiveValue::from(value))
    }

    pub fn ui(self, tag: Tag, value: &str) -> Self {
        self.element(tag, VR::UI, PrimitiveValue::from(value))
    }

    /// A sequence of undefined length holding the given items.
    pub fn sequence(mut self, tag: Tag, items: Vec<InMemDicomObject>) -> Self {
        self.object
            .put(DataElement::new(tag, VR::SQ, DataSetSequence::from(items)));
        self
    }

    /// The elements gathered so far, as a sequence item.
    pub fn into_item(self) -> InMemDicomObject {
        self.object
    }

    /// Image attributes and 16-bit unsigned pixel data.
    pub fn image(self, width: u16, height: u16, pixels: &[u16]) -> Self {
        self.pixel_module(width, height, 16, 16, 0)
            .pixel_data(VR::OW, PrimitiveValue::U16(pixels.iter().copied().collect()))
    }

    /// Image attributes and 16-bit signed pixel data.
    pub fn signed_image(self, width: u16, height: u16, bits_stored: u16, pixels: &[i16]) -> Self {
        self.pixel_module(width, height, 16, bits_stored, 1)
            .pixel_data(VR::OW, PrimitiveValue::I16(pixels.iter().copied().collect()))
    }

    /// Image attributes and 8-bit pixel data.
    pub fn image_8bit(self, width: u16, height: u16, pixels: &[u8]) -> Self {
        self.pixel_module(width, height, 8, 8, 0)
            .pixel_data(VR::OB, PrimitiveValue::U8(pixels.iter().copied().collect()))
    }

    pub fn pixel_module(
        self,
        width: u16,
        height: u16,
        bits_allocated: u16,
        bits_stored: u16,
        pixel_representation: u16,
    ) -> Self {
        self.us(tags::SAMPLES_PER_PIXEL, 1)
            .element(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from("MONOCHROME2"),
            )
            .us(tags::ROWS, height)
            .us(tags::COLUMNS, width)
            .us(tags::BITS_ALLOCATED, bits_allocated)
            .us(tags::BITS_STORED, bits_stored)
            .us(tags::HIGH_BIT, bits_stored.saturating_sub(1))
            .us(tags::PIXEL_REPRESENTATION, pixel_representation)
    }

    pub fn pixel_data(self, vr: VR, value: PrimitiveValue) -> Self {
        self.element(tags::PIXEL_DATA, vr, value)
    }

    fn file_object(&self) -> FileDicomObject<InMemDicomObject> {
        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(self.sop_class_uid.as_str())
            .media_storage_sop_instance_uid(SOP_INSTANCE_UID)
            .transfer_syntax(self.transfer_syntax_uid.as_str())
            .implementation_class_uid(IMPLEMENTATION_CLASS_UID);
        self.object
            .clone()
            .with_meta(meta)
            .expect("should have built the file meta group")
    }

    /// Compressed files carry no data set, since they are rejected from
    /// their meta group alone.
    fn is_compressed(&self) -> bool {
        TransferSyntax::from_uid(&self.transfer_syntax_uid).is_compressed()
    }

    /// Preamble, magic code and file meta group.
    pub fn meta_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        self.file_object()
            .write_meta(&mut out)
            .expect("should have written the file meta group");
        out
    }

    pub fn build(&self) -> Vec<u8> {
        if self.is_compressed() {
            return self.meta_bytes();
        }
        let mut out = Vec::new();
        self.file_object()
            .write_all(&mut out)
            .expect("should have written the DICOM file");
        out
    }

    pub fn write_to(&self, dir: impl AsRef<Path>, name: &str) -> PathBuf {
        let path = dir.as_ref().join(name);
        if self.is_compressed() {
            std::fs::write(&path, self.build()).expect("should have written test file");
        } else {
            self.file_object()
                .write_to_file(&path)
                .expect("should have written test file");
        }
        path
    }
}

/// A small CT-like slice with rescale and window attributes.
pub fn ct_slice(width: u16, height: u16) -> DicomFileBuilder {
    let pixels: Vec<u16> = (0..u32::from(width) * u32::from(height))
        .map(|i| (i * 37 % 4096) as u16)
        .collect();
    DicomFileBuilder::explicit_le()
        .sop_class(uids::CT_IMAGE_STORAGE)
        .ds(tags::IMAGE_ORIENTATION_PATIENT, "1\\0\\0\\0\\1\\0")
        .ds(tags::WINDOW_CENTER, "40")
        .ds(tags::WINDOW_WIDTH, "400")
        .ds(tags::RESCALE_INTERCEPT, "-1024")
        .ds(tags::RESCALE_SLOPE, "1")
        .image(width, height, &pixels)
}
