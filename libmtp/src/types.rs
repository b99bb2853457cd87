//! Datasets exchanged in the data phase of MTP transactions.

use crate::codec::{Decoder, Encoder};
use crate::codes::{self, datatype, filesystem_type, format, storage_type};
use crate::error::{MtpError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub mtp_extension: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<u16>,
    pub events_supported: Vec<u16>,
    pub device_properties_supported: Vec<u16>,
    pub capture_formats: Vec<u16>,
    pub playback_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut d = Decoder::new(buf, "DeviceInfo");
        Ok(DeviceInfo {
            standard_version: d.u16()?,
            vendor_extension_id: d.u32()?,
            vendor_extension_version: d.u16()?,
            mtp_extension: d.string()?,
            functional_mode: d.u16()?,
            operations_supported: d.u16_array()?,
            events_supported: d.u16_array()?,
            device_properties_supported: d.u16_array()?,
            capture_formats: d.u16_array()?,
            playback_formats: d.u16_array()?,
            manufacturer: d.string()?,
            model: d.string()?,
            device_version: d.string()?,
            serial_number: d.string()?,
        })
    }

    #[cfg(any(test, feature = "mock"))]
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.u16(self.standard_version)
            .u32(self.vendor_extension_id)
            .u16(self.vendor_extension_version)
            .string(&self.mtp_extension)
            .u16(self.functional_mode);
        for list in [
            &self.operations_supported,
            &self.events_supported,
            &self.device_properties_supported,
            &self.capture_formats,
            &self.playback_formats,
        ] {
            e.u32(list.len() as u32);
            for v in list {
                e.u16(*v);
            }
        }
        e.string(&self.manufacturer)
            .string(&self.model)
            .string(&self.device_version)
            .string(&self.serial_number);
        e.finish()
    }

    /// Whether the device speaks MTP rather than plain PTP.
    pub fn has_mtp_extension(&self) -> bool {
        self.vendor_extension_id == codes::MTP_VENDOR_EXTENSION_ID
            || self.mtp_extension.contains("microsoft.com")
    }

    pub fn supports(&self, operation: u16) -> bool {
        self.operations_supported.contains(&operation)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub storage_type: u16,
    pub filesystem_type: u16,
    pub access_capability: u16,
    pub max_capacity: u64,
    pub free_space_in_bytes: u64,
    pub free_space_in_objects: u32,
    pub storage_description: String,
    pub volume_identifier: String,
}

impl StorageInfo {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut d = Decoder::new(buf, "StorageInfo");
        Ok(StorageInfo {
            storage_type: d.u16()?,
            filesystem_type: d.u16()?,
            access_capability: d.u16()?,
            max_capacity: d.u64()?,
            free_space_in_bytes: d.u64()?,
            free_space_in_objects: d.u32()?,
            storage_description: d.string()?,
            volume_identifier: d.string()?,
        })
    }

    #[cfg(any(test, feature = "mock"))]
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.u16(self.storage_type)
            .u16(self.filesystem_type)
            .u16(self.access_capability)
            .u64(self.max_capacity)
            .u64(self.free_space_in_bytes)
            .u32(self.free_space_in_objects)
            .string(&self.storage_description)
            .string(&self.volume_identifier);
        e.finish()
    }

    pub fn is_hierarchical(&self) -> bool {
        self.filesystem_type == filesystem_type::GENERIC_HIERARCHICAL
    }

    pub fn is_dcf(&self) -> bool {
        self.filesystem_type == filesystem_type::DCF
    }

    pub fn is_removable(&self) -> bool {
        matches!(
            self.storage_type,
            storage_type::REMOVABLE_RAM | storage_type::REMOVABLE_ROM
        )
    }

    pub fn is_read_only(&self) -> bool {
        self.access_capability != codes::access::READ_WRITE
            || self.storage_type == storage_type::FIXED_ROM
            || self.storage_type == storage_type::REMOVABLE_ROM
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: u16,
    pub protection_status: u16,
    pub compressed_size: u32,
    pub thumb_format: u16,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: String,
    pub capture_date: String,
    pub modification_date: String,
    pub keywords: String,
}

impl ObjectInfo {
    /// Dataset announcing a regular file of `size` bytes.
    pub fn file(name: &str, size: u64, modified: &str) -> Self {
        ObjectInfo {
            object_format: format::UNDEFINED,
            compressed_size: u32::try_from(size).unwrap_or(u32::MAX),
            filename: name.to_string(),
            modification_date: modified.to_string(),
            ..Default::default()
        }
    }

    /// Dataset announcing a folder.
    pub fn folder(name: &str, modified: &str) -> Self {
        ObjectInfo {
            object_format: format::ASSOCIATION,
            association_type: codes::ASSOCIATION_GENERIC_FOLDER,
            filename: name.to_string(),
            modification_date: modified.to_string(),
            ..Default::default()
        }
    }

    pub fn is_folder(&self) -> bool {
        self.object_format == format::ASSOCIATION
    }

    /// False when the 32-bit size field overflowed and the real size has to be
    /// queried as an object property.
    pub fn size_is_exact(&self) -> bool {
        self.compressed_size != u32::MAX
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut d = Decoder::new(buf, "ObjectInfo");
        Ok(ObjectInfo {
            storage_id: d.u32()?,
            object_format: d.u16()?,
            protection_status: d.u16()?,
            compressed_size: d.u32()?,
            thumb_format: d.u16()?,
            thumb_compressed_size: d.u32()?,
            thumb_pix_width: d.u32()?,
            thumb_pix_height: d.u32()?,
            image_pix_width: d.u32()?,
            image_pix_height: d.u32()?,
            image_bit_depth: d.u32()?,
            parent_object: d.u32()?,
            association_type: d.u16()?,
            association_desc: d.u32()?,
            sequence_number: d.u32()?,
            filename: d.string()?,
            capture_date: d.string()?,
            modification_date: d.string()?,
            keywords: d.string()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.u32(self.storage_id)
            .u16(self.object_format)
            .u16(self.protection_status)
            .u32(self.compressed_size)
            .u16(self.thumb_format)
            .u32(self.thumb_compressed_size)
            .u32(self.thumb_pix_width)
            .u32(self.thumb_pix_height)
            .u32(self.image_pix_width)
            .u32(self.image_pix_height)
            .u32(self.image_bit_depth)
            .u32(self.parent_object)
            .u16(self.association_type)
            .u32(self.association_desc)
            .u32(self.sequence_number)
            .string(&self.filename)
            .string(&self.capture_date)
            .string(&self.modification_date)
            .string(&self.keywords);
        e.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    Int(i64),
    Uint(u64),
    Str(String),
    /// 128-bit values and arrays; carried but not interpreted.
    Opaque,
}

impl PropValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropValue::Uint(v) => Some(*v),
            PropValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn decode(d: &mut Decoder<'_>, data_type: u16) -> Result<Self> {
        Ok(match data_type {
            datatype::INT8 => PropValue::Int(d.u8()? as i8 as i64),
            datatype::UINT8 => PropValue::Uint(d.u8()? as u64),
            datatype::INT16 => PropValue::Int(d.u16()? as i16 as i64),
            datatype::UINT16 => PropValue::Uint(d.u16()? as u64),
            datatype::INT32 => PropValue::Int(d.u32()? as i32 as i64),
            datatype::UINT32 => PropValue::Uint(d.u32()? as u64),
            datatype::INT64 => PropValue::Int(d.u64()? as i64),
            datatype::UINT64 => PropValue::Uint(d.u64()?),
            datatype::INT128 | datatype::UINT128 => {
                d.skip(16)?;
                PropValue::Opaque
            }
            datatype::STR => PropValue::Str(d.string()?),
            t if t & datatype::ARRAY_FLAG != 0 => {
                let width = scalar_width(t & !datatype::ARRAY_FLAG).ok_or_else(|| {
                    MtpError::decode("property value", format!("array of type 0x{t:04x}"))
                })?;
                let n = d.u32()? as usize;
                d.skip(n.saturating_mul(width))?;
                PropValue::Opaque
            }
            other => {
                return Err(MtpError::decode(
                    "property value",
                    format!("unknown data type 0x{other:04x}"),
                ));
            }
        })
    }
}

fn scalar_width(data_type: u16) -> Option<usize> {
    match data_type {
        datatype::INT8 | datatype::UINT8 => Some(1),
        datatype::INT16 | datatype::UINT16 => Some(2),
        datatype::INT32 | datatype::UINT32 => Some(4),
        datatype::INT64 | datatype::UINT64 => Some(8),
        datatype::INT128 | datatype::UINT128 => Some(16),
        _ => None,
    }
}

/// One element of an ObjectPropList dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProp {
    pub handle: u32,
    pub code: u16,
    pub value: PropValue,
}

pub fn decode_prop_list(buf: &[u8]) -> Result<Vec<ObjectProp>> {
    let mut d = Decoder::new(buf, "ObjectPropList");
    let count = d.u32()? as usize;
    // every element needs at least 9 bytes, guard against absurd counts
    let mut out = Vec::with_capacity(count.min(d.remaining() / 9));
    for _ in 0..count {
        let handle = d.u32()?;
        let code = d.u16()?;
        let data_type = d.u16()?;
        let value = PropValue::decode(&mut d, data_type)?;
        out.push(ObjectProp {
            handle,
            code,
            value,
        });
    }
    Ok(out)
}

#[cfg(any(test, feature = "mock"))]
pub fn encode_prop_list(props: &[ObjectProp]) -> Vec<u8> {
    let mut e = Encoder::new();
    e.u32(props.len() as u32);
    for p in props {
        e.u32(p.handle).u16(p.code);
        match &p.value {
            PropValue::Uint(v) => {
                e.u16(datatype::UINT64).u64(*v);
            }
            PropValue::Int(v) => {
                e.u16(datatype::INT64).u64(*v as u64);
            }
            PropValue::Str(s) => {
                e.u16(datatype::STR).string(s);
            }
            PropValue::Opaque => {
                e.u16(datatype::UINT128).u64(0).u64(0);
            }
        }
    }
    e.finish()
}
