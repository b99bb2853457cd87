//! Operation, response, format and property codes from the PTP (ISO 15740)
//! and MTP 1.1 specifications, plus the Android vendor extension.

use std::fmt;

pub mod container {
    pub const COMMAND: u16 = 1;
    pub const DATA: u16 = 2;
    pub const RESPONSE: u16 = 3;
    pub const EVENT: u16 = 4;
}

pub mod op {
    pub const GET_DEVICE_INFO: u16 = 0x1001;
    pub const OPEN_SESSION: u16 = 0x1002;
    pub const CLOSE_SESSION: u16 = 0x1003;
    pub const GET_STORAGE_IDS: u16 = 0x1004;
    pub const GET_STORAGE_INFO: u16 = 0x1005;
    pub const GET_OBJECT_HANDLES: u16 = 0x1007;
    pub const GET_OBJECT_INFO: u16 = 0x1008;
    pub const GET_OBJECT: u16 = 0x1009;
    pub const DELETE_OBJECT: u16 = 0x100B;
    pub const SEND_OBJECT_INFO: u16 = 0x100C;
    pub const SEND_OBJECT: u16 = 0x100D;
    pub const MOVE_OBJECT: u16 = 0x1019;
    pub const GET_PARTIAL_OBJECT: u16 = 0x101B;

    pub const GET_OBJECT_PROP_VALUE: u16 = 0x9803;
    pub const SET_OBJECT_PROP_VALUE: u16 = 0x9804;
    pub const GET_OBJECT_PROP_LIST: u16 = 0x9805;

    // Android extensions.
    pub const GET_PARTIAL_OBJECT_64: u16 = 0x95C1;
    pub const SEND_PARTIAL_OBJECT: u16 = 0x95C2;
    pub const TRUNCATE_OBJECT: u16 = 0x95C3;
    pub const BEGIN_EDIT_OBJECT: u16 = 0x95C4;
    pub const END_EDIT_OBJECT: u16 = 0x95C5;
}

pub mod response {
    pub const OK: u16 = 0x2001;
    pub const GENERAL_ERROR: u16 = 0x2002;
    pub const SESSION_NOT_OPEN: u16 = 0x2003;
    pub const INVALID_TRANSACTION_ID: u16 = 0x2004;
    pub const OPERATION_NOT_SUPPORTED: u16 = 0x2005;
    pub const PARAMETER_NOT_SUPPORTED: u16 = 0x2006;
    pub const INCOMPLETE_TRANSFER: u16 = 0x2007;
    pub const INVALID_STORAGE_ID: u16 = 0x2008;
    pub const INVALID_OBJECT_HANDLE: u16 = 0x2009;
    pub const STORE_FULL: u16 = 0x200C;
    pub const OBJECT_WRITE_PROTECTED: u16 = 0x200D;
    pub const STORE_READ_ONLY: u16 = 0x200E;
    pub const ACCESS_DENIED: u16 = 0x200F;
    pub const PARTIAL_DELETION: u16 = 0x2012;
    pub const SPECIFICATION_BY_FORMAT_UNSUPPORTED: u16 = 0x2014;
    pub const DEVICE_BUSY: u16 = 0x2019;
    pub const INVALID_PARENT_OBJECT: u16 = 0x201A;
    pub const INVALID_PARAMETER: u16 = 0x201D;
    pub const SESSION_ALREADY_OPEN: u16 = 0x201E;
    pub const INVALID_OBJECT_PROP_CODE: u16 = 0xA801;
    pub const SPECIFICATION_BY_GROUP_UNSUPPORTED: u16 = 0xA807;
    pub const SPECIFICATION_BY_DEPTH_UNSUPPORTED: u16 = 0xA808;
    pub const OBJECT_PROP_NOT_SUPPORTED: u16 = 0xA80A;
}

pub mod format {
    pub const UNDEFINED: u16 = 0x3000;
    pub const ASSOCIATION: u16 = 0x3001;
}

/// Association type of a generic folder.
pub const ASSOCIATION_GENERIC_FOLDER: u16 = 0x0001;

pub mod prop {
    pub const STORAGE_ID: u16 = 0xDC01;
    pub const OBJECT_FORMAT: u16 = 0xDC02;
    pub const OBJECT_SIZE: u16 = 0xDC04;
    pub const OBJECT_FILE_NAME: u16 = 0xDC07;
    pub const DATE_MODIFIED: u16 = 0xDC09;
    pub const PARENT_OBJECT: u16 = 0xDC0B;
    /// Wildcard selecting every property in GetObjectPropList.
    pub const ALL: u32 = 0xFFFF_FFFF;
}

pub mod storage_type {
    pub const FIXED_ROM: u16 = 0x0001;
    pub const REMOVABLE_ROM: u16 = 0x0002;
    pub const FIXED_RAM: u16 = 0x0003;
    pub const REMOVABLE_RAM: u16 = 0x0004;
}

pub mod filesystem_type {
    pub const GENERIC_FLAT: u16 = 0x0001;
    pub const GENERIC_HIERARCHICAL: u16 = 0x0002;
    pub const DCF: u16 = 0x0003;
}

pub mod access {
    pub const READ_WRITE: u16 = 0x0000;
    pub const READ_ONLY_NO_DELETE: u16 = 0x0001;
    pub const READ_ONLY_WITH_DELETE: u16 = 0x0002;
}

/// Data type codes used by property datasets.
pub mod datatype {
    pub const INT8: u16 = 0x0001;
    pub const UINT8: u16 = 0x0002;
    pub const INT16: u16 = 0x0003;
    pub const UINT16: u16 = 0x0004;
    pub const INT32: u16 = 0x0005;
    pub const UINT32: u16 = 0x0006;
    pub const INT64: u16 = 0x0007;
    pub const UINT64: u16 = 0x0008;
    pub const INT128: u16 = 0x0009;
    pub const UINT128: u16 = 0x000A;
    pub const ARRAY_FLAG: u16 = 0x4000;
    pub const STR: u16 = 0xFFFF;
}

/// Handle used as "parent" for objects at the root of a storage.
pub const ROOT_PARENT: u32 = 0xFFFF_FFFF;

/// Vendor extension id registered by Microsoft for MTP.
pub const MTP_VENDOR_EXTENSION_ID: u32 = 0x0000_0006;

pub fn operation_name(code: u16) -> &'static str {
    match code {
        op::GET_DEVICE_INFO => "GetDeviceInfo",
        op::OPEN_SESSION => "OpenSession",
        op::CLOSE_SESSION => "CloseSession",
        op::GET_STORAGE_IDS => "GetStorageIDs",
        op::GET_STORAGE_INFO => "GetStorageInfo",
        op::GET_OBJECT_HANDLES => "GetObjectHandles",
        op::GET_OBJECT_INFO => "GetObjectInfo",
        op::GET_OBJECT => "GetObject",
        op::DELETE_OBJECT => "DeleteObject",
        op::SEND_OBJECT_INFO => "SendObjectInfo",
        op::SEND_OBJECT => "SendObject",
        op::MOVE_OBJECT => "MoveObject",
        op::GET_PARTIAL_OBJECT => "GetPartialObject",
        op::GET_OBJECT_PROP_VALUE => "GetObjectPropValue",
        op::SET_OBJECT_PROP_VALUE => "SetObjectPropValue",
        op::GET_OBJECT_PROP_LIST => "GetObjectPropList",
        op::GET_PARTIAL_OBJECT_64 => "GetPartialObject64",
        op::SEND_PARTIAL_OBJECT => "SendPartialObject",
        op::TRUNCATE_OBJECT => "TruncateObject",
        op::BEGIN_EDIT_OBJECT => "BeginEditObject",
        op::END_EDIT_OBJECT => "EndEditObject",
        _ => "UnknownOperation",
    }
}

/// A PTP/MTP response code, displayed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(pub u16);

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            response::OK => "OK",
            response::GENERAL_ERROR => "GeneralError",
            response::SESSION_NOT_OPEN => "SessionNotOpen",
            response::INVALID_TRANSACTION_ID => "InvalidTransactionID",
            response::OPERATION_NOT_SUPPORTED => "OperationNotSupported",
            response::PARAMETER_NOT_SUPPORTED => "ParameterNotSupported",
            response::INCOMPLETE_TRANSFER => "IncompleteTransfer",
            response::INVALID_STORAGE_ID => "InvalidStorageID",
            response::INVALID_OBJECT_HANDLE => "InvalidObjectHandle",
            response::STORE_FULL => "StoreFull",
            response::OBJECT_WRITE_PROTECTED => "ObjectWriteProtected",
            response::STORE_READ_ONLY => "StoreReadOnly",
            response::ACCESS_DENIED => "AccessDenied",
            response::PARTIAL_DELETION => "PartialDeletion",
            response::SPECIFICATION_BY_FORMAT_UNSUPPORTED => "SpecificationByFormatUnsupported",
            response::DEVICE_BUSY => "DeviceBusy",
            response::INVALID_PARENT_OBJECT => "InvalidParentObject",
            response::INVALID_PARAMETER => "InvalidParameter",
            response::SESSION_ALREADY_OPEN => "SessionAlreadyOpen",
            response::INVALID_OBJECT_PROP_CODE => "InvalidObjectPropCode",
            response::SPECIFICATION_BY_GROUP_UNSUPPORTED => "SpecificationByGroupUnsupported",
            response::SPECIFICATION_BY_DEPTH_UNSUPPORTED => "SpecificationByDepthUnsupported",
            response::OBJECT_PROP_NOT_SUPPORTED => "ObjectPropNotSupported",
            other => return write!(f, "Response(0x{other:04x})"),
        };
        f.write_str(name)
    }
}
