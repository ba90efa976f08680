//! Builder mode: interning through shared references, so many threads can feed one dex file.
//!
//! Each pool is a [`DashMap`] from value to an [`Arc`] handle. Racing inserts of equal values
//! resolve through the map's entry API, and every caller gets the winner's handle back. Handles
//! carry an atomic slot that [`DexBuilder::write`] fills once the final layout is known.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};

use crate::dex::encoded_values::{Annotation, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::model::{compare_utf16, ClassDef};
use crate::dex::opcodes::Opcodes;
use crate::dex::pool::{annotation_set_key, intern_class_graph, ClassInterner, DexPool};
use crate::dex::references::{CallSiteRef, FieldRef, MethodHandleRef, MethodHandleTarget, MethodRef, ProtoRef, Reference};
use crate::dex::writer::{write_all, DexWriter};

const UNASSIGNED: u32 = u32::MAX;

/// A value interned in a [`DexBuilder`].
///
/// For id items (strings, types, protos, fields, methods, call sites, method handles) the
/// published value is the item's index. For data items (type lists, annotations, annotation sets,
/// encoded arrays) it is the item's file offset.
#[derive(Debug)]
pub struct BuilderItem<K> {
    value: K,
    slot: AtomicU32,
}

impl<K: Debug> BuilderItem<K> {
    fn new(value: K) -> BuilderItem<K> {
        BuilderItem { value, slot: AtomicU32::new(UNASSIGNED) }
    }

    pub fn value(&self) -> &K {
        &self.value
    }

    /// Fails until the builder has been written.
    pub fn index(&self) -> Result<u32, DexError> {
        match self.slot.load(Ordering::Acquire) {
            UNASSIGNED => fail!("{:?} has no index until the builder has been written", self.value),
            index => Ok(index),
        }
    }

    /// The file offset of a data item. Fails until the builder has been written.
    pub fn offset(&self) -> Result<u32, DexError> {
        match self.slot.load(Ordering::Acquire) {
            UNASSIGNED => fail!("{:?} has no offset until the builder has been written", self.value),
            offset => Ok(offset),
        }
    }

    fn publish(&self, index: u32) {
        self.slot.store(index, Ordering::Release);
    }
}

pub type BuilderHandle<K> = Arc<BuilderItem<K>>;
pub type StringHandle = BuilderHandle<String>;
pub type TypeHandle = BuilderHandle<String>;
pub type TypeListHandle = BuilderHandle<Vec<String>>;
pub type ProtoHandle = BuilderHandle<ProtoRef>;
pub type FieldHandle = BuilderHandle<FieldRef>;
pub type MethodHandle = BuilderHandle<MethodRef>;
pub type MethodHandleHandle = BuilderHandle<MethodHandleRef>;
pub type CallSiteHandle = BuilderHandle<CallSiteRef>;
pub type AnnotationHandle = BuilderHandle<Annotation>;
pub type AnnotationSetHandle = BuilderHandle<Vec<Annotation>>;
pub type EncodedArrayHandle = BuilderHandle<Vec<EncodedValue>>;

#[derive(Debug)]
struct BuilderPool<K: Eq + Hash> {
    entries: DashMap<K, BuilderHandle<K>>,
}

impl<K: Eq + Hash + Clone + Debug> BuilderPool<K> {
    fn new() -> BuilderPool<K> {
        BuilderPool { entries: DashMap::new() }
    }

    fn intern<Q>(&self, key: &Q) -> BuilderHandle<K>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(existing) = self.entries.get(key) {
            return Arc::clone(existing.value());
        }
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let item = Arc::new(BuilderItem::new(entry.key().clone()));
                entry.insert(Arc::clone(&item));
                item
            }
        }
    }

    fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// A snapshot of the handles. Map iteration order is unspecified.
    fn handles(&self) -> Vec<BuilderHandle<K>> {
        self.entries.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// A snapshot in a stable order, for pools whose write order is insertion order.
    fn handles_in_stable_order(&self) -> Vec<BuilderHandle<K>> {
        let mut handles = self.handles();
        handles.sort_by_cached_key(|item| format!("{:?}", item.value));
        handles
    }

    fn publish_with(&self, slot: impl Fn(&K) -> Result<u32, DexError>) -> Result<(), DexError> {
        for item in self.handles() {
            item.publish(slot(&item.value)?);
        }
        Ok(())
    }
}

/// The builder-mode front end. `Sync`: every operation takes `&self`.
///
/// ```ignore
/// let builder = DexBuilder::new(Opcodes::for_api(26));
/// std::thread::scope(|s| {
///     for class in classes {
///         s.spawn(|| builder.add_class(class));
///     }
/// });
/// let bytes = builder.write()?;
/// ```
#[derive(Debug)]
pub struct DexBuilder {
    opcodes: Opcodes,
    strings: BuilderPool<String>,
    types: BuilderPool<String>,
    type_lists: BuilderPool<Vec<String>>,
    protos: BuilderPool<ProtoRef>,
    fields: BuilderPool<FieldRef>,
    methods: BuilderPool<MethodRef>,
    method_handles: BuilderPool<MethodHandleRef>,
    call_sites: BuilderPool<CallSiteRef>,
    annotations: BuilderPool<Annotation>,
    annotation_sets: BuilderPool<Vec<Annotation>>,
    encoded_arrays: BuilderPool<Vec<EncodedValue>>,
    classes: DashMap<String, ClassDef>,
}

impl DexBuilder {
    pub fn new(opcodes: Opcodes) -> DexBuilder {
        DexBuilder {
            opcodes,
            strings: BuilderPool::new(),
            types: BuilderPool::new(),
            type_lists: BuilderPool::new(),
            protos: BuilderPool::new(),
            fields: BuilderPool::new(),
            methods: BuilderPool::new(),
            method_handles: BuilderPool::new(),
            call_sites: BuilderPool::new(),
            annotations: BuilderPool::new(),
            annotation_sets: BuilderPool::new(),
            encoded_arrays: BuilderPool::new(),
            classes: DashMap::new(),
        }
    }

    pub fn opcodes(&self) -> &Opcodes {
        &self.opcodes
    }

    pub fn intern_string(&self, value: &str) -> StringHandle {
        self.strings.intern(value)
    }

    pub fn intern_type(&self, descriptor: &str) -> TypeHandle {
        if !self.types.contains(descriptor) {
            self.intern_string(descriptor);
        }
        self.types.intern(descriptor)
    }

    /// An empty list has no item in the file and interns to `None`.
    pub fn intern_type_list(&self, types: &[String]) -> Option<TypeListHandle> {
        if types.is_empty() {
            return None;
        }
        for t in types {
            self.intern_type(t);
        }
        Some(self.type_lists.intern(types))
    }

    pub fn intern_proto(&self, proto: &ProtoRef) -> ProtoHandle {
        if !self.protos.contains(proto) {
            self.intern_string(&proto.shorty());
            self.intern_type(&proto.return_type);
            self.intern_type_list(&proto.parameters);
        }
        self.protos.intern(proto)
    }

    pub fn intern_field(&self, field: &FieldRef) -> FieldHandle {
        if !self.fields.contains(field) {
            self.intern_type(&field.defining_class);
            self.intern_string(&field.name);
            self.intern_type(&field.field_type);
        }
        self.fields.intern(field)
    }

    pub fn intern_method(&self, method: &MethodRef) -> MethodHandle {
        if !self.methods.contains(method) {
            self.intern_type(&method.defining_class);
            self.intern_string(&method.name);
            self.intern_proto(&method.proto);
        }
        self.methods.intern(method)
    }

    pub fn intern_method_handle(&self, handle: &MethodHandleRef) -> MethodHandleHandle {
        match &handle.target {
            MethodHandleTarget::Field(field) => {
                self.intern_field(field);
            }
            MethodHandleTarget::Method(method) => {
                self.intern_method(method);
            }
        }
        self.method_handles.intern(handle)
    }

    pub fn intern_call_site(&self, call_site: &CallSiteRef) -> CallSiteHandle {
        if !self.call_sites.contains(call_site) {
            self.intern_encoded_array(&call_site.encoded_array());
        }
        self.call_sites.intern(call_site)
    }

    /// Interns everything a value mentions. Values themselves are not pooled.
    pub fn intern_encoded_value(&self, value: &EncodedValue) {
        match value {
            EncodedValue::String(s) => {
                self.intern_string(s);
            }
            EncodedValue::Type(t) => {
                self.intern_type(t);
            }
            EncodedValue::Field(f) | EncodedValue::Enum(f) => {
                self.intern_field(f);
            }
            EncodedValue::Method(m) => {
                self.intern_method(m);
            }
            EncodedValue::MethodType(p) => {
                self.intern_proto(p);
            }
            EncodedValue::MethodHandle(h) => {
                self.intern_method_handle(h);
            }
            EncodedValue::Array(values) => values.iter().for_each(|v| self.intern_encoded_value(v)),
            EncodedValue::Annotation(annotation) => {
                self.intern_type(&annotation.annotation_type);
                for element in &annotation.elements {
                    self.intern_string(&element.name);
                    self.intern_encoded_value(&element.value);
                }
            }
            _ => {}
        }
    }

    pub fn intern_encoded_array(&self, values: &[EncodedValue]) -> EncodedArrayHandle {
        if !self.encoded_arrays.contains(values) {
            values.iter().for_each(|v| self.intern_encoded_value(v));
        }
        self.encoded_arrays.intern(values)
    }

    pub fn intern_annotation(&self, annotation: &Annotation) -> AnnotationHandle {
        if !self.annotations.contains(annotation) {
            self.intern_type(&annotation.annotation_type);
            for element in &annotation.elements {
                self.intern_string(&element.name);
                self.intern_encoded_value(&element.value);
            }
        }
        self.annotations.intern(annotation)
    }

    /// Element order does not matter. An empty set interns to `None`.
    pub fn intern_annotation_set(&self, annotations: &[Annotation]) -> Result<Option<AnnotationSetHandle>, DexError> {
        if annotations.is_empty() {
            return Ok(None);
        }
        let key = annotation_set_key(annotations)?;
        for annotation in &key {
            self.intern_annotation(annotation);
        }
        Ok(Some(self.annotation_sets.intern(&key)))
    }

    pub fn intern_reference(&self, reference: &Reference) {
        match reference {
            Reference::String(s) => {
                self.intern_string(s);
            }
            Reference::Type(t) => {
                self.intern_type(t);
            }
            Reference::Field(f) => {
                self.intern_field(f);
            }
            Reference::Method(m) => {
                self.intern_method(m);
            }
            Reference::MethodProto(p) => {
                self.intern_proto(p);
            }
            Reference::CallSite(c) => {
                self.intern_call_site(c);
            }
            Reference::MethodHandle(h) => {
                self.intern_method_handle(h);
            }
        }
    }

    /// Adds a class and everything it refers to, returning the handle of its type.
    pub fn add_class(&self, class: ClassDef) -> Result<TypeHandle, DexError> {
        if self.classes.contains_key(&class.class_type) {
            fail!("Class {} has already been interned", class.class_type);
        }
        let mut interner = self;
        intern_class_graph(&mut interner, &class)?;

        let class_type = class.class_type.clone();
        match self.classes.entry(class_type.clone()) {
            Entry::Occupied(_) => fail!("Class {} has already been interned", class_type),
            Entry::Vacant(entry) => {
                entry.insert(class);
            }
        }
        Ok(self.intern_type(&class_type))
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Lays out everything added so far and returns the file. On success every handle handed out
    /// before the call can report its index.
    ///
    /// Interning concurrently with `write` is not supported: values added while the write runs
    /// may or may not make it into the output.
    pub fn write(&self) -> Result<Vec<u8>, DexError> {
        let mut pool = DexPool::new(self.opcodes.clone());

        let mut classes: Vec<ClassDef> = self.classes.iter().map(|entry| entry.value().clone()).collect();
        classes.sort_by(|a, b| compare_utf16(&a.class_type, &b.class_type));
        let class_count = classes.len();
        for class in classes {
            pool.intern_class(class)?;
        }
        self.transfer_leftovers(&mut pool)?;

        let bytes = DexWriter::new(&mut pool).write()?;
        self.publish(&pool)?;
        info!("builder wrote {} classes into {} bytes", class_count, bytes.len());
        Ok(bytes)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), DexError> {
        let bytes = self.write()?;
        write_all(out, &bytes)
    }

    /// Values interned directly rather than through a class still end up in the file.
    fn transfer_leftovers(&self, pool: &mut DexPool) -> Result<(), DexError> {
        for item in self.strings.handles() {
            pool.intern_string(&item.value)?;
        }
        for item in self.types.handles() {
            pool.intern_type(&item.value)?;
        }
        for item in self.protos.handles() {
            pool.intern_proto(&item.value)?;
        }
        for item in self.fields.handles() {
            pool.intern_field(&item.value)?;
        }
        for item in self.methods.handles() {
            pool.intern_method(&item.value)?;
        }
        for item in self.method_handles.handles() {
            pool.intern_method_handle(&item.value)?;
        }
        for item in self.call_sites.handles() {
            pool.intern_call_site(&item.value)?;
        }
        for item in self.type_lists.handles_in_stable_order() {
            pool.intern_type_list(&item.value)?;
        }
        for item in self.encoded_arrays.handles_in_stable_order() {
            pool.intern_encoded_array(&item.value)?;
        }
        for item in self.annotations.handles_in_stable_order() {
            pool.intern_annotation(&item.value)?;
        }
        for item in self.annotation_sets.handles_in_stable_order() {
            pool.intern_annotation_set(&item.value)?;
        }
        debug!(
            "transferred {} strings, {} types, {} methods from builder",
            pool.strings.len(),
            pool.types.len(),
            pool.methods.len()
        );
        Ok(())
    }

    fn publish(&self, pool: &DexPool) -> Result<(), DexError> {
        self.strings.publish_with(|s| pool.strings.index(s.as_str()))?;
        self.types.publish_with(|t| pool.types.index(t.as_str()))?;
        self.protos.publish_with(|p| pool.protos.index(p))?;
        self.fields.publish_with(|f| pool.fields.index(f))?;
        self.methods.publish_with(|m| pool.methods.index(m))?;
        self.method_handles.publish_with(|h| pool.method_handles.index(h))?;
        self.call_sites.publish_with(|c| pool.call_sites.index(c))?;
        self.type_lists.publish_with(|l| pool.type_lists.offset(l))?;
        self.encoded_arrays.publish_with(|a| pool.encoded_arrays.offset(a))?;
        self.annotations.publish_with(|a| pool.annotations.offset(a))?;
        self.annotation_sets.publish_with(|s| pool.annotation_sets.offset(s))?;
        Ok(())
    }
}

impl ClassInterner for &DexBuilder {
    fn add_string(&mut self, value: &str) -> Result<(), DexError> {
        self.intern_string(value);
        Ok(())
    }

    fn add_type(&mut self, descriptor: &str) -> Result<(), DexError> {
        self.intern_type(descriptor);
        Ok(())
    }

    fn add_type_list(&mut self, types: &[String]) -> Result<(), DexError> {
        self.intern_type_list(types);
        Ok(())
    }

    fn add_field(&mut self, field: &FieldRef) -> Result<(), DexError> {
        self.intern_field(field);
        Ok(())
    }

    fn add_method(&mut self, method: &MethodRef) -> Result<(), DexError> {
        self.intern_method(method);
        Ok(())
    }

    fn add_encoded_value(&mut self, value: &EncodedValue) -> Result<(), DexError> {
        self.intern_encoded_value(value);
        Ok(())
    }

    fn add_encoded_array(&mut self, values: &[EncodedValue]) -> Result<(), DexError> {
        self.intern_encoded_array(values);
        Ok(())
    }

    fn add_annotation_set(&mut self, annotations: &[Annotation]) -> Result<(), DexError> {
        self.intern_annotation_set(annotations).map(drop)
    }

    fn add_reference(&mut self, reference: &Reference) -> Result<(), DexError> {
        self.intern_reference(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::dex_file::DexFile;
    use crate::dex::instructions::{Instruction, InstructionRef, Operands};
    use crate::dex::model::{AccessFlags, Field, Method, MethodImplementation};
    use std::thread;

    fn simple_class(opcodes: &Opcodes, name: &str) -> ClassDef {
        let mut class = ClassDef::new(name, AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        class.fields.push(Field::new(name, "count", "I", AccessFlags::STATIC).with_initial_value(EncodedValue::Int(1)));
        let body = vec![
            Instruction::from_name(
                opcodes,
                "const-string",
                Operands::RegRef { a: 0, reference: InstructionRef::Resolved(Reference::String(format!("from {}", name))) },
            )
            .unwrap(),
            Instruction::from_name(opcodes, "return-void", Operands::None).unwrap(),
        ];
        class.methods.push(
            Method::new(name, "run", vec![], "V", AccessFlags::PUBLIC | AccessFlags::STATIC)
                .with_implementation(MethodImplementation::new(1, body)),
        );
        class
    }

    #[test]
    fn test_builder_is_sync() {
        fn assert_sync<T: Sync + Send>() {}
        assert_sync::<DexBuilder>();
        assert_sync::<StringHandle>();
    }

    #[test]
    fn test_concurrent_interning_shares_one_handle() {
        let builder = DexBuilder::new(Opcodes::for_api(26));
        let handles: Vec<StringHandle> = thread::scope(|scope| {
            let workers: Vec<_> = (0..8).map(|_| scope.spawn(|| builder.intern_string("shared"))).collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(builder.strings.len(), 1);
    }

    #[test]
    fn test_index_unavailable_until_written() {
        let builder = DexBuilder::new(Opcodes::for_api(26));
        let handle = builder.intern_type("La/B;");
        let e = handle.index().unwrap_err();
        assert!(e.message().contains("La/B;"), "{}", e);

        builder.write().unwrap();
        assert_eq!(handle.index().unwrap(), 0);
        assert_eq!(builder.intern_string("La/B;").index().unwrap(), 0);
    }

    #[test]
    fn test_cascade_through_method() {
        let builder = DexBuilder::new(Opcodes::default());
        builder.intern_method(&MethodRef::new("La;", "m", &["J", "La;"], "V"));
        assert!(builder.strings.contains("VJL"));
        assert!(builder.types.contains("J"));
        assert!(builder.type_lists.contains(["J".to_string(), "La;".to_string()].as_slice()));
        assert_eq!(builder.protos.len(), 1);
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let opcodes = Opcodes::for_api(26);
        let builder = DexBuilder::new(opcodes.clone());
        builder.add_class(simple_class(&opcodes, "La;")).unwrap();
        let e = builder.add_class(simple_class(&opcodes, "La;")).unwrap_err();
        assert_eq!(e.message(), "Class La; has already been interned");
        assert_eq!(builder.class_count(), 1);
    }

    #[test]
    fn test_invalid_class_not_added() {
        let builder = DexBuilder::new(Opcodes::default());
        let mut class = ClassDef::new("La;", AccessFlags::PUBLIC, None);
        class.fields.push(Field::new("La;", "x", "I", AccessFlags::PRIVATE));
        class.fields.push(Field::new("La;", "x", "I", AccessFlags::PRIVATE));
        let e = builder.add_class(class).unwrap_err();
        assert_eq!(e.to_string(), "Multiple definitions for field La;->x:I for class La;");
        assert_eq!(builder.class_count(), 0);
    }

    #[test]
    fn test_leftover_values_are_written() {
        let opcodes = Opcodes::for_api(26);
        let builder = DexBuilder::new(opcodes.clone());
        builder.add_class(simple_class(&opcodes, "La;")).unwrap();
        let unused = builder.intern_string("not used by any class");
        let array = builder.intern_encoded_array(&[EncodedValue::Long(9)]);

        let bytes = builder.write().unwrap();
        let dex = DexFile::from_bytes(&bytes).unwrap();
        let index = unused.index().unwrap() as usize;
        assert_eq!(dex.strings[index].to_string().unwrap(), "not used by any class");
        assert!(array.offset().unwrap() >= dex.header.data_off);
    }

    #[test]
    fn test_concurrent_classes_match_pool_output() {
        let opcodes = Opcodes::for_api(26);
        let names: Vec<String> = (0..6).map(|i| format!("Lcom/example/C{};", i)).collect();

        let builder = DexBuilder::new(opcodes.clone());
        thread::scope(|scope| {
            for name in names.iter().rev() {
                let builder = &builder;
                let opcodes = &opcodes;
                scope.spawn(move || builder.add_class(simple_class(opcodes, name)).unwrap());
            }
        });
        let built = builder.write().unwrap();

        let mut pool = DexPool::new(opcodes.clone());
        for name in &names {
            pool.intern_class(simple_class(&opcodes, name)).unwrap();
        }
        let pooled = DexWriter::new(&mut pool).write().unwrap();
        assert_eq!(built, pooled);

        let run = builder.intern_method(&MethodRef::new("Lcom/example/C3;", "run", &[], "V"));
        assert_eq!(run.index().unwrap(), pool.methods.index(run.value()).unwrap());
    }
}
