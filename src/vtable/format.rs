//! Wire format of vTable records, handles, and SST-side index entries.
//!
//! The fixed 4-byte record header lets a reader sized to `handle.size`
//! split header from body without a second fetch; the varint on the key
//! length keeps short keys cheap.

use crate::encoding::{
    get_fixed32, get_varint64, put_fixed32, put_length_prefixed_slice, put_varint64,
};

use super::VTableError;

/// Size of the fixed record header (`u32` little-endian body length).
pub const RECORD_HEADER_SIZE: usize = 4;

/// Leading byte of an SST-side vTable index entry.
///
/// Must differ from every value-type byte the host stores for inline
/// values, so a single byte test distinguishes "inline value" from
/// "vTable index" on the read path.
pub const VTABLE_INDEX_TAG: u8 = 1;

// ------------------------------------------------------------------------------------------------
// VTableRecord
// ------------------------------------------------------------------------------------------------

/// The atom of a vTable: one `(key, value)` pair of byte strings.
///
/// `key` is the user key (not the internal key carrying sequence and type);
/// `value` is the user value minus its one-byte value-type prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VTableRecord {
    /// User key.
    pub key: Vec<u8>,
    /// User value payload.
    pub value: Vec<u8>,
}

impl VTableRecord {
    /// Combined key+value payload length, used for telemetry.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

// ------------------------------------------------------------------------------------------------
// RecordEncoder / RecordDecoder
// ------------------------------------------------------------------------------------------------

/// Encodes one record into a reusable header/body buffer pair.
///
/// The body is `[varint64 key_len][key][value]`; the header is the body
/// length as a little-endian `u32`.
#[derive(Debug, Default)]
pub struct RecordEncoder {
    header: [u8; RECORD_HEADER_SIZE],
    body: Vec<u8>,
}

impl RecordEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `record`, replacing any previously encoded one.
    ///
    /// Fails with corruption if the framed body cannot be described by the
    /// `u32` header (callers are expected to keep records far below that).
    pub fn encode(&mut self, record: &VTableRecord) -> Result<(), VTableError> {
        self.body.clear();
        put_length_prefixed_slice(&mut self.body, &record.key);
        self.body.extend_from_slice(&record.value);

        let body_len = u32::try_from(self.body.len()).map_err(|_| {
            VTableError::Corruption(format!("record of {} bytes exceeds u32 framing", self.body.len()))
        })?;
        let mut header = Vec::with_capacity(RECORD_HEADER_SIZE);
        put_fixed32(&mut header, body_len);
        self.header.copy_from_slice(&header);
        Ok(())
    }

    /// The 4-byte header of the last encoded record.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// The framed body of the last encoded record.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total on-disk size of the last encoded record, header included.
    pub fn encoded_size(&self) -> u64 {
        (RECORD_HEADER_SIZE + self.body.len()) as u64
    }
}

/// Decodes one record from its header and body.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    record_size: u32,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume exactly [`RECORD_HEADER_SIZE`] bytes from the cursor.
    pub fn decode_header(&mut self, input: &mut &[u8]) -> Result<(), VTableError> {
        self.record_size = get_fixed32(input)
            .map_err(|e| VTableError::corrupt("record header", e))?;
        Ok(())
    }

    /// Body length announced by the last decoded header.
    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    /// Consume exactly `record_size` bytes from the cursor and decode them.
    ///
    /// Fails with corruption on any underflow: fewer than `record_size`
    /// bytes remaining, or a key length running past the body.
    pub fn decode_record(&self, input: &mut &[u8]) -> Result<VTableRecord, VTableError> {
        let size = self.record_size as usize;
        if input.len() < size {
            return Err(VTableError::Corruption(format!(
                "record body truncated: need {size} bytes, have {}",
                input.len()
            )));
        }
        let (body, rest) = input.split_at(size);
        *input = rest;

        let mut cursor = body;
        let key_len = get_varint64(&mut cursor)
            .map_err(|e| VTableError::corrupt("record key length", e))?;
        if key_len > cursor.len() as u64 {
            return Err(VTableError::Corruption(format!(
                "record key length {key_len} exceeds body remainder {}",
                cursor.len()
            )));
        }
        let (key, value) = cursor.split_at(key_len as usize);
        Ok(VTableRecord {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// VTableHandle
// ------------------------------------------------------------------------------------------------

/// Pointer into a vTable file: where a framed record starts and how many
/// bytes it spans (header included).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VTableHandle {
    /// Byte offset of the record header within the file.
    pub offset: u64,
    /// Total framed size: `RECORD_HEADER_SIZE` + body length.
    pub size: u64,
}

impl VTableHandle {
    /// Append `[varint64 offset][varint64 size]`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_varint64(buf, self.offset);
        put_varint64(buf, self.size);
    }

    /// Consume a handle from the cursor.
    pub fn decode(input: &mut &[u8]) -> Result<Self, VTableError> {
        let offset =
            get_varint64(input).map_err(|e| VTableError::corrupt("handle offset", e))?;
        let size = get_varint64(input).map_err(|e| VTableError::corrupt("handle size", e))?;
        Ok(Self { offset, size })
    }
}

// ------------------------------------------------------------------------------------------------
// VTableIndex
// ------------------------------------------------------------------------------------------------

/// The SST-side placeholder stored in place of a separated value:
/// which vTable file holds the record, and where inside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VTableIndex {
    /// Number of the vTable file holding the record.
    pub file_number: u64,
    /// Location of the record within that file.
    pub handle: VTableHandle,
}

impl VTableIndex {
    /// Append `[tag][varint64 file_number][handle]`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.push(VTABLE_INDEX_TAG);
        put_varint64(buf, self.file_number);
        self.handle.encode_to(buf);
    }

    /// Consume an index entry from the cursor.
    ///
    /// Fails with corruption if the tag byte is absent or is not
    /// [`VTABLE_INDEX_TAG`].
    pub fn decode(input: &mut &[u8]) -> Result<Self, VTableError> {
        let Some((&tag, rest)) = input.split_first() else {
            return Err(VTableError::Corruption("empty vtable index".into()));
        };
        if tag != VTABLE_INDEX_TAG {
            return Err(VTableError::Corruption(format!(
                "bad vtable index tag: {tag:#04x}"
            )));
        }
        *input = rest;
        let file_number =
            get_varint64(input).map_err(|e| VTableError::corrupt("index file number", e))?;
        let handle = VTableHandle::decode(input)?;
        Ok(Self {
            file_number,
            handle,
        })
    }
}
