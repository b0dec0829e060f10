//! File meta information (group 0002) parsing and transfer syntax triage.

use crate::error::{Error, Result};

use byteorder::{ByteOrder, LittleEndian};
use dicom::{
    core::header::{HasLength, Header},
    encoding::{
        decode::{Decode, file_header_decoder},
        transfer_syntax::TransferSyntaxIndex,
    },
    object::meta::FileMetaTable,
    transfer_syntax::TransferSyntaxRegistry,
};
use dicom_dictionary_std::{tags, uids};
use std::io::{Cursor, Read};

const DICM_MAGIC_CODE: [u8; 4] = *b"DICM";
const PREAMBLE_LENGTH: usize = 128;
/// Tag, VR, length and value of (0002,0000) in explicit VR little endian
const GROUP_LENGTH_ELEMENT_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

/// Encoding rules of the main data set, as far as this crate understands them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
    ExplicitVrBigEndian,
    /// Any compressed, deflated or unknown syntax. Never decoded.
    Encapsulated,
}

impl TransferSyntax {
    /// Look the UID up in the transfer syntax registry. Only native
    /// syntaxes that need no codec are decoded.
    pub fn from_uid(uid: &str) -> Self {
        let native = TransferSyntaxRegistry
            .get(uid.trim_end_matches(['\0', ' ']))
            .filter(|ts| ts.is_codec_free());
        match native.map(|ts| ts.uid()) {
            Some(uids::IMPLICIT_VR_LITTLE_ENDIAN) => TransferSyntax::ImplicitVrLittleEndian,
            Some(uids::EXPLICIT_VR_LITTLE_ENDIAN) => TransferSyntax::ExplicitVrLittleEndian,
            Some(uids::EXPLICIT_VR_BIG_ENDIAN) => TransferSyntax::ExplicitVrBigEndian,
            _ => TransferSyntax::Encapsulated,
        }
    }

    pub fn is_explicit_vr(self) -> bool {
        !matches!(self, TransferSyntax::ImplicitVrLittleEndian)
    }

    pub fn endianness(self) -> Endianness {
        match self {
            TransferSyntax::ExplicitVrBigEndian => Endianness::Big,
            _ => Endianness::Little,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, TransferSyntax::Encapsulated)
    }
}

/// The parts of the file meta group needed to triage a file before decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaInformation {
    /// Media Storage SOP Class UID
    pub sop_class_uid: String,
    /// Media Storage SOP Instance UID
    pub sop_instance_uid: String,
    pub transfer_syntax_uid: String,
    pub implementation_class_uid: String,
    /// Byte offset of the first data set element following the meta group
    pub end_of_meta_info_offset: u64,
}

impl MetaInformation {
    /// Read the preamble, magic code and file meta group from the start of
    /// a DICOM file, leaving the data set untouched.
    ///
    /// The group is read up to its declared group length and handed to
    /// [`FileMetaTable`], so no byte of the data set is consumed.
    pub fn from_reader<R: Read>(mut source: R) -> Result<Self> {
        let preamble = read_magic_code(&mut source)?;

        let mut head = [0u8; GROUP_LENGTH_ELEMENT_LEN];
        source
            .read_exact(&mut head)
            .map_err(Error::from_dicom_io)?;
        let (header, _) = file_header_decoder()
            .decode_header(&mut &head[..])
            .map_err(Error::from_parser)?;
        if header.tag() != tags::FILE_META_INFORMATION_GROUP_LENGTH || header.length().0 != 4 {
            return Err(Error::MalformedHeader(format!(
                "file meta group starts with {} instead of its group length",
                header.tag()
            )));
        }
        let group_length = LittleEndian::read_u32(&head[8..]);

        let mut group = Vec::new();
        source
            .by_ref()
            .take(u64::from(group_length))
            .read_to_end(&mut group)?;
        if group.len() < group_length as usize {
            return Err(Error::TruncatedStream);
        }
        check_group(&group)?;

        let mut table_bytes = Vec::with_capacity(DICM_MAGIC_CODE.len() + head.len() + group.len());
        table_bytes.extend_from_slice(&DICM_MAGIC_CODE);
        table_bytes.extend_from_slice(&head);
        table_bytes.extend_from_slice(&group);
        let mut table_source = Cursor::new(table_bytes);
        let table = FileMetaTable::from_reader(&mut table_source).map_err(Error::from_parser)?;
        if table_source.position() != table_source.get_ref().len() as u64 {
            return Err(Error::MalformedHeader(format!(
                "file meta group length {group_length} does not match its elements"
            )));
        }

        Ok(MetaInformation {
            sop_class_uid: uid_string(&table.media_storage_sop_class_uid),
            sop_instance_uid: uid_string(&table.media_storage_sop_instance_uid),
            transfer_syntax_uid: uid_string(&table.transfer_syntax),
            implementation_class_uid: uid_string(&table.implementation_class_uid),
            end_of_meta_info_offset: (preamble + DICM_MAGIC_CODE.len() + head.len()) as u64
                + u64::from(group_length),
        })
    }

    pub fn transfer_syntax(&self) -> TransferSyntax {
        TransferSyntax::from_uid(&self.transfer_syntax_uid)
    }

    /// DICOMDIR files index other files and hold no image.
    pub fn is_directory_record(&self) -> bool {
        self.sop_class_uid == uids::MEDIA_STORAGE_DIRECTORY_STORAGE
    }
}

/// Accept either a 128-byte preamble followed by `DICM`, or `DICM` right
/// away. Returns the preamble length.
fn read_magic_code<R: Read>(source: &mut R) -> Result<usize> {
    let not_dicom = || Error::MalformedHeader("missing DICM magic code".to_string());

    let mut head = [0u8; 4];
    match source.read_exact(&mut head).map_err(Error::from_dicom_io) {
        Ok(()) => {}
        Err(Error::TruncatedStream) => return Err(not_dicom()),
        Err(e) => return Err(e),
    }
    if head == DICM_MAGIC_CODE {
        return Ok(0);
    }

    let mut rest = [0u8; PREAMBLE_LENGTH];
    match source.read_exact(&mut rest).map_err(Error::from_dicom_io) {
        Ok(()) => {}
        Err(Error::TruncatedStream) => return Err(not_dicom()),
        Err(e) => return Err(e),
    }
    if rest[PREAMBLE_LENGTH - 4..] != DICM_MAGIC_CODE {
        return Err(not_dicom());
    }
    Ok(PREAMBLE_LENGTH)
}

/// Every element of the group must belong to group 0002 and the last one
/// must end exactly at the declared group length.
fn check_group(group: &[u8]) -> Result<()> {
    let decoder = file_header_decoder();
    let end = group.len() as u64;
    let mut cursor = Cursor::new(group);

    while cursor.position() < end {
        let (header, _) = decoder.decode_header(&mut cursor).map_err(|e| {
            Error::MalformedHeader(format!("file meta group length {end} cuts an element: {e}"))
        })?;
        if header.tag().group() != 0x0002 {
            return Err(Error::MalformedHeader(format!(
                "element {} inside the file meta group",
                header.tag()
            )));
        }
        let Some(len) = header.length().get() else {
            return Err(Error::MalformedHeader(format!(
                "undefined length for meta element {}",
                header.tag()
            )));
        };
        cursor.set_position(cursor.position() + u64::from(len));
    }

    if cursor.position() != end {
        return Err(Error::MalformedHeader(format!(
            "file meta group length {end} cuts an element"
        )));
    }
    Ok(())
}

fn uid_string(value: &str) -> String {
    value.trim_end_matches(['\0', ' ']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DicomFileBuilder, MR_IMAGE_STORAGE};

    /// Rewrite the group length value of a built file.
    fn with_group_length(mut bytes: Vec<u8>, adjust: i64) -> Vec<u8> {
        let at = PREAMBLE_LENGTH + DICM_MAGIC_CODE.len() + 8;
        let length = LittleEndian::read_u32(&bytes[at..at + 4]);
        let length = (i64::from(length) + adjust) as u32;
        LittleEndian::write_u32(&mut bytes[at..at + 4], length);
        bytes
    }

    #[test]
    fn reads_meta_group_and_stops() {
        let builder = DicomFileBuilder::explicit_le().image(2, 2, &[1, 2, 3, 4]);
        let bytes = builder.build();
        let meta = MetaInformation::from_reader(&bytes[..]).unwrap();

        assert_eq!(meta.sop_class_uid, MR_IMAGE_STORAGE);
        assert_eq!(meta.sop_instance_uid, crate::test_support::SOP_INSTANCE_UID);
        assert_eq!(meta.transfer_syntax_uid, uids::EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(meta.transfer_syntax(), TransferSyntax::ExplicitVrLittleEndian);
        assert!(!meta.is_directory_record());
        assert_eq!(meta.end_of_meta_info_offset, builder.meta_bytes().len() as u64);
    }

    #[test]
    fn leaves_the_data_set_unread() {
        let builder = DicomFileBuilder::explicit_le().image(1, 1, &[7]);
        let bytes = builder.build();
        let mut source = &bytes[..];
        MetaInformation::from_reader(&mut source).unwrap();
        assert_eq!(source.len(), bytes.len() - builder.meta_bytes().len());
    }

    #[test]
    fn accepts_missing_preamble() {
        let bytes = DicomFileBuilder::explicit_le().image(1, 1, &[7]).build();
        let meta = MetaInformation::from_reader(&bytes[PREAMBLE_LENGTH..]).unwrap();
        assert_eq!(meta.transfer_syntax(), TransferSyntax::ExplicitVrLittleEndian);
        assert_eq!(
            meta.end_of_meta_info_offset,
            (DicomFileBuilder::explicit_le().meta_bytes().len() - PREAMBLE_LENGTH) as u64
        );
    }

    #[test]
    fn rejects_non_dicom() {
        let err = MetaInformation::from_reader(&[0u8; 300][..]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)));

        let err = MetaInformation::from_reader(&b"hello"[..]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)));
    }

    #[test]
    fn truncated_meta_group() {
        let bytes = DicomFileBuilder::explicit_le().meta_bytes();
        let err = MetaInformation::from_reader(&bytes[..bytes.len() - 10]).unwrap_err();
        assert!(matches!(err, Error::TruncatedStream));
    }

    #[test]
    fn group_length_cutting_an_element_is_malformed() {
        let bytes = DicomFileBuilder::explicit_le().image(1, 1, &[7]).build();
        let err = MetaInformation::from_reader(&with_group_length(bytes, -2)[..]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)), "{err:?}");
    }

    #[test]
    fn group_length_reaching_into_the_data_set_is_malformed() {
        let bytes = DicomFileBuilder::explicit_le().image(1, 1, &[7]).build();
        // (0028,0002) Samples per Pixel is 10 bytes long
        let err = MetaInformation::from_reader(&with_group_length(bytes, 10)[..]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)), "{err:?}");
    }

    #[test]
    fn classifies_transfer_syntaxes() {
        assert_eq!(
            TransferSyntax::from_uid("1.2.840.10008.1.2\0"),
            TransferSyntax::ImplicitVrLittleEndian
        );
        assert_eq!(
            TransferSyntax::from_uid(uids::EXPLICIT_VR_BIG_ENDIAN).endianness(),
            Endianness::Big
        );
        assert!(TransferSyntax::from_uid(uids::JPEG_BASELINE8_BIT).is_compressed());
        assert!(TransferSyntax::from_uid(uids::RLE_LOSSLESS).is_compressed());
        assert!(TransferSyntax::from_uid(uids::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN).is_compressed());
        assert!(TransferSyntax::from_uid("1.2.3.4.5.6").is_compressed());
    }
}
