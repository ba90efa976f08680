//! Annotation containers as laid out in the data section
//!
//! - annotation_item (visibility plus an encoded annotation)
//! - annotation_set_item and annotation_set_ref_list (offset lists)
//! - annotations_directory_item

use crate::dex::encoded_values::{Annotation, AnnotationVisibility, EncodedAnnotation};
use crate::dex::error::DexError;
use crate::dex::references::{IndexResolver, ReferenceLookup};
use crate::dex::{read_u1, read_u4, write_u1, write_u4};

pub fn read_annotation_item(bytes: &[u8], ix: &mut usize, lookup: &dyn ReferenceLookup) -> Result<Annotation, DexError> {
    let visibility = AnnotationVisibility::from_value(read_u1(bytes, ix)?)?;
    let encoded = EncodedAnnotation::read(bytes, ix, lookup)?;
    Ok(Annotation { visibility, annotation_type: encoded.annotation_type, elements: encoded.elements })
}

pub fn write_annotation_item(annotation: &Annotation, bytes: &mut Vec<u8>, resolver: &dyn IndexResolver) -> Result<usize, DexError> {
    let mut c = write_u1(bytes, annotation.visibility.value());
    c += annotation.encoded().write(bytes, resolver)?;
    Ok(c)
}

/// A u4 count followed by that many u4 file offsets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetList(pub Vec<u32>);

/// Offsets of `annotation_item`s.
pub type AnnotationSetItem = OffsetList;
/// Offsets of `annotation_set_item`s, one per parameter; zero for an unannotated parameter.
pub type AnnotationSetRefList = OffsetList;

impl OffsetList {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<OffsetList, DexError> {
        let size = read_u4(bytes, ix)? as usize;
        let mut entries = Vec::with_capacity(size.min(0x10000));
        for _ in 0..size {
            entries.push(read_u4(bytes, ix)?);
        }
        Ok(OffsetList(entries))
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = write_u4(bytes, self.0.len() as u32);
        for off in &self.0 {
            c += write_u4(bytes, *off);
        }
        c
    }
}

/// A field or method index paired with the offset of its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAnnotation {
    pub index: u32,
    pub offset: u32,
}

impl MemberAnnotation {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<MemberAnnotation, DexError> {
        Ok(MemberAnnotation { index: read_u4(bytes, ix)?, offset: read_u4(bytes, ix)? })
    }

    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_u4(bytes, self.index) + write_u4(bytes, self.offset)
    }
}

/// annotations_directory_item. Member entries must be sorted by index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationsDirectoryItem {
    /// Offset to the class annotation set, or 0 if none
    pub class_annotations_off: u32,
    pub field_annotations: Vec<MemberAnnotation>,
    pub method_annotations: Vec<MemberAnnotation>,
    /// Offsets here point at annotation set ref lists
    pub parameter_annotations: Vec<MemberAnnotation>,
}

impl AnnotationsDirectoryItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationsDirectoryItem, DexError> {
        let class_annotations_off = read_u4(bytes, ix)?;
        let fields_size = read_u4(bytes, ix)?;
        let annotated_methods_size = read_u4(bytes, ix)?;
        let annotated_parameters_size = read_u4(bytes, ix)?;

        let mut read_entries = |count: u32| -> Result<Vec<MemberAnnotation>, DexError> {
            (0..count).map(|_| MemberAnnotation::read(bytes, ix)).collect()
        };
        let field_annotations = read_entries(fields_size)?;
        let method_annotations = read_entries(annotated_methods_size)?;
        let parameter_annotations = read_entries(annotated_parameters_size)?;

        Ok(AnnotationsDirectoryItem { class_annotations_off, field_annotations, method_annotations, parameter_annotations })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u4(bytes, self.class_annotations_off);
        c += write_u4(bytes, self.field_annotations.len() as u32);
        c += write_u4(bytes, self.method_annotations.len() as u32);
        c += write_u4(bytes, self.parameter_annotations.len() as u32);

        for entry in self.field_annotations.iter().chain(&self.method_annotations).chain(&self.parameter_annotations) {
            c += entry.write(bytes);
        }
        c
    }

    /// A directory holding only class annotations can be shared between classes.
    pub fn is_class_only(&self) -> bool {
        self.field_annotations.is_empty() && self.method_annotations.is_empty() && self.parameter_annotations.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.class_annotations_off == 0 && self.is_class_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::encoded_values::tests::TableResolver;
    use crate::dex::encoded_values::{AnnotationElement, EncodedValue};

    #[test]
    fn test_annotation_item_framing() {
        let resolver = TableResolver::new();
        let annotation = Annotation::new(
            AnnotationVisibility::Runtime,
            "La/Ann;",
            vec![AnnotationElement::new("value", EncodedValue::Int(7))],
        );

        let mut buf = vec![];
        let n = write_annotation_item(&annotation, &mut buf, &resolver).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(buf[0], 1);
        let mut ix = 0;
        let back = read_annotation_item(&buf, &mut ix, &resolver).unwrap();
        assert_eq!(ix, buf.len());
        assert_eq!(back, annotation);
    }

    #[test]
    fn test_bad_visibility_rejected() {
        let resolver = TableResolver::new();
        let mut ix = 0;
        assert!(read_annotation_item(&[0x05, 0x01, 0x00], &mut ix, &resolver).is_err());
    }

    #[test]
    fn test_offset_list_layout() {
        let set = OffsetList(vec![0x10, 0x20]);
        let mut buf = vec![];
        assert_eq!(set.write(&mut buf), 12);
        assert_eq!(&buf[..4], &[2, 0, 0, 0]);
        let mut ix = 0;
        assert_eq!(OffsetList::read(&buf, &mut ix).unwrap(), set);
    }

    #[test]
    fn test_annotations_directory_layout() {
        let dir = AnnotationsDirectoryItem {
            class_annotations_off: 0x1000,
            field_annotations: vec![MemberAnnotation { index: 1, offset: 0x2000 }],
            method_annotations: vec![],
            parameter_annotations: vec![MemberAnnotation { index: 3, offset: 0x4000 }],
        };
        let mut buf = vec![];
        assert_eq!(dir.write(&mut buf), 16 + 16);
        assert_eq!(&buf[8..12], &[0, 0, 0, 0]);
        let mut ix = 0;
        assert_eq!(AnnotationsDirectoryItem::read(&buf, &mut ix).unwrap(), dir);
        assert!(!dir.is_class_only());

        let class_only = AnnotationsDirectoryItem { class_annotations_off: 0x10, ..Default::default() };
        assert!(class_only.is_class_only());
        assert!(!class_only.is_empty());
    }
}
