//! Selective access descriptors for ProfileGeneric buffers.
//!
//! A GET on a profile buffer may carry an access descriptor restricting which
//! rows and columns the server returns. Both descriptors are encoded as plain
//! A-XDR structures; the access selector byte (1 = range, 2 = entry) travels
//! next to them in the request.

use alloc::vec::Vec;

use crate::cosem::CosemAttribute;
use crate::data::Data;
use crate::obis_code::ObisCode;

/// One column of a ProfileGeneric capture list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CaptureObjectDefinition {
    pub attribute: CosemAttribute,
    /// Index into the attribute when it is itself a structure; 0 selects the
    /// whole attribute.
    pub data_index: u16,
}

impl CaptureObjectDefinition {
    pub const fn new(attribute: CosemAttribute, data_index: u16) -> Self {
        Self { attribute, data_index }
    }

    pub fn to_data(&self) -> Data {
        Data::Structure(alloc::vec![
            Data::LongUnsigned(self.attribute.class_id),
            Data::OctetString(self.attribute.instance_id.encode().to_vec()),
            Data::Integer(self.attribute.attribute_id),
            Data::LongUnsigned(self.data_index),
        ])
    }

    pub fn from_data(data: &Data) -> Option<Self> {
        let Data::Structure(members) = data else { return None };
        match members.as_slice() {
            [
                Data::LongUnsigned(class_id),
                Data::OctetString(name),
                Data::Integer(attribute_id),
                Data::LongUnsigned(data_index),
            ] => {
                let (_, instance_id) = ObisCode::parse(name).ok()?;
                Some(Self::new(
                    CosemAttribute::new(*class_id, instance_id, *attribute_id),
                    *data_index,
                ))
            }
            _ => None,
        }
    }
}

/// Range descriptor (access selector 1): rows where the restricting column
/// lies in `[from_value, to_value]`, projected onto `selected_values`
/// (empty = all columns).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RangeDescriptor {
    pub restricting_object: CaptureObjectDefinition,
    pub from_value: Data,
    pub to_value: Data,
    pub selected_values: Vec<CaptureObjectDefinition>,
}

impl RangeDescriptor {
    pub const SELECTOR: u8 = 1;

    pub fn to_data(&self) -> Data {
        Data::Structure(alloc::vec![
            self.restricting_object.to_data(),
            self.from_value.clone(),
            self.to_value.clone(),
            Data::Array(self.selected_values.iter().map(|v| v.to_data()).collect()),
        ])
    }
}

/// Entry descriptor (access selector 2): rows `from_entry..=to_entry` and
/// columns `from_selected_value..=to_selected_value` by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntryDescriptor {
    pub from_entry: u32,
    pub to_entry: u32,
    pub from_selected_value: u16,
    pub to_selected_value: u16,
}

impl EntryDescriptor {
    pub const SELECTOR: u8 = 2;

    pub fn to_data(&self) -> Data {
        Data::Structure(alloc::vec![
            Data::DoubleLongUnsigned(self.from_entry),
            Data::DoubleLongUnsigned(self.to_entry),
            Data::LongUnsigned(self.from_selected_value),
            Data::LongUnsigned(self.to_selected_value),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Date, DateTime, Time};

    fn clock_column() -> CaptureObjectDefinition {
        CaptureObjectDefinition::new(
            CosemAttribute::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2),
            0,
        )
    }

    #[test]
    fn test_capture_object_encoding() {
        let encoded = clock_column().to_data().encode();

        // structure of 4: class 8, clock logical name, attribute 2, index 0
        assert_eq!(
            encoded,
            [
                0x02, 0x04, 0x12, 0x00, 0x08, 0x09, 0x06, 0x00, 0x00, 0x01, 0x00, 0x00, 0xff,
                0x0f, 0x02, 0x12, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn test_capture_object_data_roundtrip() {
        let definition = clock_column();
        let data = definition.to_data();
        assert_eq!(CaptureObjectDefinition::from_data(&data), Some(definition));
    }

    #[test]
    fn test_capture_object_from_data_rejects_shape_mismatch() {
        assert_eq!(CaptureObjectDefinition::from_data(&Data::Null), None);
        assert_eq!(
            CaptureObjectDefinition::from_data(&Data::Structure(alloc::vec![Data::Null])),
            None
        );
    }

    #[test]
    fn test_range_descriptor_shape() {
        let range = RangeDescriptor {
            restricting_object: clock_column(),
            from_value: Data::DateTime(DateTime::from_local(
                Date::new(2024, 1, 1, 1),
                Time::new(0, 0, 0, 0),
                60,
            )),
            to_value: Data::DateTime(DateTime::from_local(
                Date::new(2024, 1, 2, 2),
                Time::new(0, 0, 0, 0),
                60,
            )),
            selected_values: Vec::new(),
        };

        let data = range.to_data();
        let Data::Structure(members) = &data else { panic!("expected structure") };
        assert_eq!(members.len(), 4);
        assert_eq!(members[3], Data::Array(Vec::new()));

        // The descriptor must survive the generic data codec untouched.
        let (_, reparsed) = Data::parse(&data.encode()).unwrap();
        assert_eq!(reparsed, data);
    }

    #[test]
    fn test_entry_descriptor_shape() {
        let entry = EntryDescriptor {
            from_entry: 1,
            to_entry: 100,
            from_selected_value: 1,
            to_selected_value: 0,
        };

        let data = entry.to_data();
        let (_, reparsed) = Data::parse(&data.encode()).unwrap();
        assert_eq!(reparsed, data);
        assert_eq!(EntryDescriptor::SELECTOR, 2);
        assert_eq!(RangeDescriptor::SELECTOR, 1);
    }
}
