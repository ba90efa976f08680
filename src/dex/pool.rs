//! Deduplicating pools for everything a dex file indexes or points at.
//!
//! Values are interned first and only ordered once the whole graph is known: closing a pool fixes
//! its final order and assigns indices, and the writer records data offsets afterwards. A
//! [`DexPool`] owns one pool per item kind and performs the cascade from a class down to every
//! string, type and member it mentions.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use log::debug;

use crate::dex::encoded_values::{Annotation, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::instructions::{Instruction, InstructionRef, Operands};
use crate::dex::model::{compare_utf16, ClassDef, DebugItem, Method, MethodImplementation};
use crate::dex::opcode_format::ReferenceType;
use crate::dex::opcodes::Opcodes;
use crate::dex::references::{
    CallSiteRef, FieldRef, IndexResolver, MethodHandleRef, MethodHandleTarget, MethodRef, ProtoRef, Reference,
};

/// Identifies an interned value by its insertion position in one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle(usize);

impl PoolHandle {
    pub fn position(&self) -> usize {
        self.0
    }
}

/// A value-keyed pool. Interning is idempotent; indices and offsets exist only after `close`.
#[derive(Debug)]
pub struct InternPool<K> {
    kind: &'static str,
    items: Vec<K>,
    positions: HashMap<K, usize>,
    order: Vec<usize>,
    indices: Option<Vec<u32>>,
    offsets: Vec<Option<u32>>,
}

pub type StringPool = InternPool<String>;
pub type TypePool = InternPool<String>;
pub type TypeListPool = InternPool<Vec<String>>;
pub type ProtoPool = InternPool<ProtoRef>;
pub type FieldPool = InternPool<FieldRef>;
pub type MethodPool = InternPool<MethodRef>;
pub type AnnotationPool = InternPool<Annotation>;
/// Keyed by the set's annotations in type order, one annotation per type.
pub type AnnotationSetPool = InternPool<Vec<Annotation>>;
pub type EncodedArrayPool = InternPool<Vec<EncodedValue>>;
pub type CallSitePool = InternPool<CallSiteRef>;
pub type MethodHandlePool = InternPool<MethodHandleRef>;

impl<K: Clone + Eq + Hash + Debug> InternPool<K> {
    pub fn new(kind: &'static str) -> InternPool<K> {
        InternPool { kind, items: vec![], positions: HashMap::new(), order: vec![], indices: None, offsets: vec![] }
    }

    pub fn intern(&mut self, key: K) -> Result<PoolHandle, DexError> {
        if let Some(position) = self.positions.get(&key) {
            return Ok(PoolHandle(*position));
        }
        if self.is_closed() {
            fail!("{} pool is closed, cannot intern {:?}", self.kind, key);
        }
        let position = self.items.len();
        self.positions.insert(key.clone(), position);
        self.items.push(key);
        self.offsets.push(None);
        Ok(PoolHandle(position))
    }

    pub fn handle_of<Q>(&self, key: &Q) -> Option<PoolHandle>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.positions.get(key).map(|p| PoolHandle(*p))
    }

    pub fn get(&self, handle: PoolHandle) -> Option<&K> {
        self.items.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.indices.is_some()
    }

    /// Closes the pool keeping insertion order. Used for pools that only carry offsets.
    pub fn close(&mut self) {
        self.apply_order((0..self.items.len()).collect());
    }

    pub fn close_by(&mut self, mut compare: impl FnMut(&K, &K) -> Ordering) {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        order.sort_by(|a, b| compare(&self.items[*a], &self.items[*b]));
        self.apply_order(order);
    }

    /// Closes the pool ordered by a key computed once per item. Equal keys keep insertion order.
    pub fn close_by_key<T: Ord>(&mut self, mut key: impl FnMut(&K) -> Result<T, DexError>) -> Result<(), DexError> {
        let mut keyed = Vec::with_capacity(self.items.len());
        for (position, item) in self.items.iter().enumerate() {
            keyed.push((key(item)?, position));
        }
        keyed.sort();
        self.apply_order(keyed.into_iter().map(|(_, position)| position).collect());
        Ok(())
    }

    /// Drops every item interned after the first `len`. Only valid before the pool is closed.
    fn truncate(&mut self, len: usize) {
        for key in self.items.drain(len.min(self.items.len())..) {
            self.positions.remove(&key);
        }
        self.offsets.truncate(len);
    }

    fn apply_order(&mut self, order: Vec<usize>) {
        let mut indices = vec![0u32; order.len()];
        for (index, position) in order.iter().enumerate() {
            indices[*position] = index as u32;
        }
        self.order = order;
        self.indices = Some(indices);
    }

    pub fn index<Q>(&self, key: &Q) -> Result<u32, DexError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        match self.positions.get(key) {
            Some(position) => self.index_of(PoolHandle(*position)),
            None => fail!("{} not interned: {:?}", self.kind, key),
        }
    }

    pub fn index_of(&self, handle: PoolHandle) -> Result<u32, DexError> {
        match &self.indices {
            Some(indices) => match indices.get(handle.0) {
                Some(index) => Ok(*index),
                None => fail!("Invalid {} handle {}", self.kind, handle.0),
            },
            None => fail!("{} pool has not been closed", self.kind),
        }
    }

    /// Items in final index order. Empty until the pool is closed.
    pub fn sorted(&self) -> impl Iterator<Item = (PoolHandle, &K)> + '_ {
        self.order.iter().map(move |position| (PoolHandle(*position), &self.items[*position]))
    }

    pub fn set_offset(&mut self, handle: PoolHandle, offset: u32) {
        if let Some(slot) = self.offsets.get_mut(handle.0) {
            *slot = Some(offset);
        }
    }

    pub fn offset<Q>(&self, key: &Q) -> Result<u32, DexError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        match self.positions.get(key) {
            Some(position) => self.offset_of(PoolHandle(*position)),
            None => fail!("{} not interned: {:?}", self.kind, key),
        }
    }

    pub fn offset_of(&self, handle: PoolHandle) -> Result<u32, DexError> {
        match self.offsets.get(handle.0).copied().flatten() {
            Some(offset) => Ok(offset),
            None => fail!("{} {:?} has no offset assigned", self.kind, self.items.get(handle.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    Active,
    Done,
}

/// Classes keyed by type descriptor. A type may be defined only once.
#[derive(Debug, Default)]
pub struct ClassPool {
    classes: Vec<ClassDef>,
    positions: HashMap<String, usize>,
    order: Option<Vec<usize>>,
}

impl ClassPool {
    pub fn intern(&mut self, class: ClassDef) -> Result<PoolHandle, DexError> {
        if self.positions.contains_key(&class.class_type) {
            fail!("Class {} has already been interned", class.class_type);
        }
        if self.order.is_some() {
            fail!("Class pool is closed, cannot intern {}", class.class_type);
        }
        let position = self.classes.len();
        self.positions.insert(class.class_type.clone(), position);
        self.classes.push(class);
        Ok(PoolHandle(position))
    }

    pub fn get(&self, class_type: &str) -> Option<&ClassDef> {
        self.positions.get(class_type).map(|p| &self.classes[*p])
    }

    pub fn contains(&self, class_type: &str) -> bool {
        self.positions.contains_key(class_type)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Orders classes so that a superclass or interface defined in this pool comes before every
    /// class that extends or implements it. Unrelated classes follow type order.
    pub fn close(&mut self) -> Result<(), DexError> {
        let mut roots: Vec<usize> = (0..self.classes.len()).collect();
        roots.sort_by(|a, b| compare_utf16(&self.classes[*a].class_type, &self.classes[*b].class_type));

        let mut state = vec![Visit::Pending; self.classes.len()];
        let mut order = Vec::with_capacity(self.classes.len());
        for root in roots {
            self.visit(root, &mut state, &mut order)?;
        }
        self.order = Some(order);
        Ok(())
    }

    fn visit(&self, position: usize, state: &mut [Visit], order: &mut Vec<usize>) -> Result<(), DexError> {
        match state[position] {
            Visit::Done => return Ok(()),
            Visit::Active => fail!("Class hierarchy cycle through {}", self.classes[position].class_type),
            Visit::Pending => {}
        }
        state[position] = Visit::Active;
        let class = &self.classes[position];
        for parent in class.superclass.iter().chain(class.interfaces.iter()) {
            if let Some(parent_position) = self.positions.get(parent) {
                self.visit(*parent_position, state, order)?;
            }
        }
        state[position] = Visit::Done;
        order.push(position);
        Ok(())
    }

    /// Classes in definition order. Empty until the pool is closed.
    pub fn sorted(&self) -> impl Iterator<Item = &ClassDef> + '_ {
        self.order.iter().flatten().map(move |position| &self.classes[*position])
    }

    pub fn into_classes(self) -> Vec<ClassDef> {
        self.classes
    }
}

/// The pool-mode front end: single threaded interning into one set of pools owned together.
///
/// ```ignore
/// let mut pool = DexPool::new(Opcodes::for_api(26));
/// for class in classes {
///     pool.intern_class(class)?;
/// }
/// let bytes = DexWriter::new(&mut pool).write()?;
/// ```
#[derive(Debug)]
pub struct DexPool {
    opcodes: Opcodes,
    pub(crate) strings: StringPool,
    pub(crate) types: TypePool,
    pub(crate) type_lists: TypeListPool,
    pub(crate) protos: ProtoPool,
    pub(crate) fields: FieldPool,
    pub(crate) methods: MethodPool,
    pub(crate) annotations: AnnotationPool,
    pub(crate) annotation_sets: AnnotationSetPool,
    pub(crate) encoded_arrays: EncodedArrayPool,
    pub(crate) call_sites: CallSitePool,
    pub(crate) method_handles: MethodHandlePool,
    pub(crate) classes: ClassPool,
}

impl DexPool {
    pub fn new(opcodes: Opcodes) -> DexPool {
        DexPool {
            opcodes,
            strings: InternPool::new("String"),
            types: InternPool::new("Type"),
            type_lists: InternPool::new("Type list"),
            protos: InternPool::new("Proto"),
            fields: InternPool::new("Field"),
            methods: InternPool::new("Method"),
            annotations: InternPool::new("Annotation"),
            annotation_sets: InternPool::new("Annotation set"),
            encoded_arrays: InternPool::new("Encoded array"),
            call_sites: InternPool::new("Call site"),
            method_handles: InternPool::new("Method handle"),
            classes: ClassPool::default(),
        }
    }

    pub fn opcodes(&self) -> &Opcodes {
        &self.opcodes
    }

    pub fn is_closed(&self) -> bool {
        self.strings.is_closed()
    }

    pub fn intern_string(&mut self, value: &str) -> Result<PoolHandle, DexError> {
        if let Some(handle) = self.strings.handle_of(value) {
            return Ok(handle);
        }
        self.strings.intern(value.to_string())
    }

    pub fn intern_type(&mut self, descriptor: &str) -> Result<PoolHandle, DexError> {
        if let Some(handle) = self.types.handle_of(descriptor) {
            return Ok(handle);
        }
        self.intern_string(descriptor)?;
        self.types.intern(descriptor.to_string())
    }

    /// An empty list interns to `None`; the format stores no item for it.
    pub fn intern_type_list(&mut self, types: &[String]) -> Result<Option<PoolHandle>, DexError> {
        if types.is_empty() {
            return Ok(None);
        }
        for t in types {
            self.intern_type(t)?;
        }
        Ok(Some(self.type_lists.intern(types.to_vec())?))
    }

    pub fn intern_proto(&mut self, proto: &ProtoRef) -> Result<PoolHandle, DexError> {
        if let Some(handle) = self.protos.handle_of(proto) {
            return Ok(handle);
        }
        self.intern_string(&proto.shorty())?;
        self.intern_type(&proto.return_type)?;
        self.intern_type_list(&proto.parameters)?;
        self.protos.intern(proto.clone())
    }

    pub fn intern_field(&mut self, field: &FieldRef) -> Result<PoolHandle, DexError> {
        if let Some(handle) = self.fields.handle_of(field) {
            return Ok(handle);
        }
        self.intern_type(&field.defining_class)?;
        self.intern_string(&field.name)?;
        self.intern_type(&field.field_type)?;
        self.fields.intern(field.clone())
    }

    pub fn intern_method(&mut self, method: &MethodRef) -> Result<PoolHandle, DexError> {
        if let Some(handle) = self.methods.handle_of(method) {
            return Ok(handle);
        }
        self.intern_type(&method.defining_class)?;
        self.intern_string(&method.name)?;
        self.intern_proto(&method.proto)?;
        self.methods.intern(method.clone())
    }

    pub fn intern_method_handle(&mut self, handle: &MethodHandleRef) -> Result<PoolHandle, DexError> {
        match &handle.target {
            MethodHandleTarget::Field(field) => self.intern_field(field)?,
            MethodHandleTarget::Method(method) => self.intern_method(method)?,
        };
        self.method_handles.intern(handle.clone())
    }

    pub fn intern_call_site(&mut self, call_site: &CallSiteRef) -> Result<PoolHandle, DexError> {
        if let Some(handle) = self.call_sites.handle_of(call_site) {
            return Ok(handle);
        }
        self.intern_encoded_array(&call_site.encoded_array())?;
        self.call_sites.intern(call_site.clone())
    }

    /// Interns everything a value mentions, recursing into arrays and nested annotations.
    pub fn intern_encoded_value(&mut self, value: &EncodedValue) -> Result<(), DexError> {
        match value {
            EncodedValue::String(s) => {
                self.intern_string(s)?;
            }
            EncodedValue::Type(t) => {
                self.intern_type(t)?;
            }
            EncodedValue::Field(f) | EncodedValue::Enum(f) => {
                self.intern_field(f)?;
            }
            EncodedValue::Method(m) => {
                self.intern_method(m)?;
            }
            EncodedValue::MethodType(p) => {
                self.intern_proto(p)?;
            }
            EncodedValue::MethodHandle(h) => {
                self.intern_method_handle(h)?;
            }
            EncodedValue::Array(values) => {
                for v in values {
                    self.intern_encoded_value(v)?;
                }
            }
            EncodedValue::Annotation(annotation) => {
                self.intern_type(&annotation.annotation_type)?;
                for element in &annotation.elements {
                    self.intern_string(&element.name)?;
                    self.intern_encoded_value(&element.value)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn intern_encoded_array(&mut self, values: &[EncodedValue]) -> Result<PoolHandle, DexError> {
        for v in values {
            self.intern_encoded_value(v)?;
        }
        self.encoded_arrays.intern(values.to_vec())
    }

    pub fn intern_annotation(&mut self, annotation: &Annotation) -> Result<PoolHandle, DexError> {
        if let Some(handle) = self.annotations.handle_of(annotation) {
            return Ok(handle);
        }
        self.intern_type(&annotation.annotation_type)?;
        for element in &annotation.elements {
            self.intern_string(&element.name)?;
            self.intern_encoded_value(&element.value)?;
        }
        self.annotations.intern(annotation.clone())
    }

    /// An empty set interns to `None`. Sets compare as sets: element order does not matter.
    pub fn intern_annotation_set(&mut self, annotations: &[Annotation]) -> Result<Option<PoolHandle>, DexError> {
        if annotations.is_empty() {
            return Ok(None);
        }
        let key = annotation_set_key(annotations)?;
        for annotation in &key {
            self.intern_annotation(annotation)?;
        }
        Ok(Some(self.annotation_sets.intern(key)?))
    }

    pub fn intern_reference(&mut self, reference: &Reference) -> Result<(), DexError> {
        match reference {
            Reference::String(s) => self.intern_string(s)?,
            Reference::Type(t) => self.intern_type(t)?,
            Reference::Field(f) => self.intern_field(f)?,
            Reference::Method(m) => self.intern_method(m)?,
            Reference::MethodProto(p) => self.intern_proto(p)?,
            Reference::CallSite(c) => self.intern_call_site(c)?,
            Reference::MethodHandle(h) => self.intern_method_handle(h)?,
        };
        Ok(())
    }

    /// Adds a class and everything it refers to. On failure the pools are left as they were
    /// before the call.
    pub fn intern_class(&mut self, class: ClassDef) -> Result<PoolHandle, DexError> {
        if self.classes.contains(&class.class_type) {
            fail!("Class {} has already been interned", class.class_type);
        }
        let mark = self.pool_lengths();
        if let Err(e) = intern_class_graph(self, &class) {
            self.rollback(mark);
            return Err(e);
        }
        self.classes.intern(class)
    }

    fn pool_lengths(&self) -> [usize; 11] {
        [
            self.strings.len(),
            self.types.len(),
            self.type_lists.len(),
            self.protos.len(),
            self.fields.len(),
            self.methods.len(),
            self.annotations.len(),
            self.annotation_sets.len(),
            self.encoded_arrays.len(),
            self.call_sites.len(),
            self.method_handles.len(),
        ]
    }

    fn rollback(&mut self, mark: [usize; 11]) {
        let [strings, types, type_lists, protos, fields, methods, annotations, annotation_sets, encoded_arrays, call_sites, method_handles] =
            mark;
        self.strings.truncate(strings);
        self.types.truncate(types);
        self.type_lists.truncate(type_lists);
        self.protos.truncate(protos);
        self.fields.truncate(fields);
        self.methods.truncate(methods);
        self.annotations.truncate(annotations);
        self.annotation_sets.truncate(annotation_sets);
        self.encoded_arrays.truncate(encoded_arrays);
        self.call_sites.truncate(call_sites);
        self.method_handles.truncate(method_handles);
    }

    /// Fixes the final order of every pool. Index pools are sorted in dependency order so each
    /// comparison can use the indices of the pools it refers to.
    pub fn close(&mut self) -> Result<(), DexError> {
        if self.is_closed() {
            return Ok(());
        }
        self.strings.close_by(|a, b| compare_utf16(a, b));
        let strings = &self.strings;
        self.types.close_by(|a, b| compare_utf16(a, b));
        let types = &self.types;

        self.protos.close_by_key(|proto| {
            let params: Result<Vec<u32>, DexError> = proto.parameters.iter().map(|p| types.index(p.as_str())).collect();
            Ok((types.index(proto.return_type.as_str())?, params?))
        })?;
        self.fields.close_by_key(|field| {
            Ok((
                types.index(field.defining_class.as_str())?,
                strings.index(field.name.as_str())?,
                types.index(field.field_type.as_str())?,
            ))
        })?;
        let protos = &self.protos;
        self.methods.close_by_key(|method| {
            Ok((
                types.index(method.defining_class.as_str())?,
                strings.index(method.name.as_str())?,
                protos.index(&method.proto)?,
            ))
        })?;

        let fields = &self.fields;
        let methods = &self.methods;
        self.method_handles.close_by_key(|handle| {
            let target = match &handle.target {
                MethodHandleTarget::Field(f) => fields.index(f)?,
                MethodHandleTarget::Method(m) => methods.index(m)?,
            };
            Ok((handle.kind.value(), target))
        })?;
        // Encoded arrays are laid out in intern order, so this keeps call_site_ids sorted by offset.
        let encoded_arrays = &self.encoded_arrays;
        self.call_sites.close_by_key(|call_site| match encoded_arrays.handle_of(&call_site.encoded_array()) {
            Some(array) => Ok((array.position(), call_site.name.encode_utf16().collect::<Vec<u16>>())),
            None => fail!("Call site {} has no interned encoded array", call_site.name),
        })?;

        self.type_lists.close();
        self.encoded_arrays.close();
        self.annotations.close();
        self.annotation_sets.close();
        self.classes.close()?;

        debug!(
            "closed pools: {} strings, {} types, {} protos, {} fields, {} methods, {} classes",
            self.strings.len(),
            self.types.len(),
            self.protos.len(),
            self.fields.len(),
            self.methods.len(),
            self.classes.len()
        );
        Ok(())
    }
}

/// The steps a class walk takes. Both front ends implement it so they share one cascade and one
/// set of validation rules.
pub(crate) trait ClassInterner {
    fn add_string(&mut self, value: &str) -> Result<(), DexError>;
    fn add_type(&mut self, descriptor: &str) -> Result<(), DexError>;
    fn add_type_list(&mut self, types: &[String]) -> Result<(), DexError>;
    fn add_field(&mut self, field: &FieldRef) -> Result<(), DexError>;
    fn add_method(&mut self, method: &MethodRef) -> Result<(), DexError>;
    fn add_encoded_value(&mut self, value: &EncodedValue) -> Result<(), DexError>;
    fn add_encoded_array(&mut self, values: &[EncodedValue]) -> Result<(), DexError>;
    fn add_annotation_set(&mut self, annotations: &[Annotation]) -> Result<(), DexError>;
    fn add_reference(&mut self, reference: &Reference) -> Result<(), DexError>;
}

impl ClassInterner for DexPool {
    fn add_string(&mut self, value: &str) -> Result<(), DexError> {
        self.intern_string(value).map(drop)
    }

    fn add_type(&mut self, descriptor: &str) -> Result<(), DexError> {
        self.intern_type(descriptor).map(drop)
    }

    fn add_type_list(&mut self, types: &[String]) -> Result<(), DexError> {
        self.intern_type_list(types).map(drop)
    }

    fn add_field(&mut self, field: &FieldRef) -> Result<(), DexError> {
        self.intern_field(field).map(drop)
    }

    fn add_method(&mut self, method: &MethodRef) -> Result<(), DexError> {
        self.intern_method(method).map(drop)
    }

    fn add_encoded_value(&mut self, value: &EncodedValue) -> Result<(), DexError> {
        self.intern_encoded_value(value)
    }

    fn add_encoded_array(&mut self, values: &[EncodedValue]) -> Result<(), DexError> {
        self.intern_encoded_array(values).map(drop)
    }

    fn add_annotation_set(&mut self, annotations: &[Annotation]) -> Result<(), DexError> {
        self.intern_annotation_set(annotations).map(drop)
    }

    fn add_reference(&mut self, reference: &Reference) -> Result<(), DexError> {
        self.intern_reference(reference)
    }
}

/// Interns everything a class mentions. Errors carry the class (and method) they came from.
pub(crate) fn intern_class_graph<I: ClassInterner + ?Sized>(interner: &mut I, class: &ClassDef) -> Result<(), DexError> {
    intern_class_contents(interner, class).map_err(|e| err!(e, "class {}", class.class_type))
}

fn intern_class_contents<I: ClassInterner + ?Sized>(interner: &mut I, class: &ClassDef) -> Result<(), DexError> {
    interner.add_type(&class.class_type)?;
    if let Some(superclass) = &class.superclass {
        interner.add_type(superclass)?;
    }
    interner.add_type_list(&class.interfaces)?;
    if let Some(source_file) = &class.source_file {
        interner.add_string(source_file)?;
    }
    interner.add_annotation_set(&class.annotations)?;

    let mut seen_fields = HashSet::new();
    for field in &class.fields {
        let field_ref = field.field_ref();
        if !seen_fields.insert((field.name.as_str(), field.field_type.as_str())) {
            fail!("Multiple definitions for field {}", field_ref);
        }
        interner.add_field(&field_ref)?;
        if let Some(value) = &field.initial_value {
            interner.add_encoded_value(value)?;
        }
        interner.add_annotation_set(&field.annotations)?;
    }
    if let Some(values) = class.static_initializers() {
        interner.add_encoded_array(&values)?;
    }

    let mut seen_methods = HashSet::new();
    for method in &class.methods {
        let method_ref = method.method_ref();
        if !seen_methods.insert((method_ref.name.clone(), method_ref.proto.clone())) {
            fail!("Multiple definitions for method {}", method_ref);
        }
        interner.add_method(&method_ref)?;
        interner.add_annotation_set(&method.annotations)?;
        for set in method.parameter_annotations() {
            interner.add_annotation_set(set)?;
        }
        intern_method_body(interner, method, &method_ref).map_err(|e| err!(e, "method {}", method_ref))?;
    }
    Ok(())
}

fn intern_method_body<I: ClassInterner + ?Sized>(interner: &mut I, method: &Method, method_ref: &MethodRef) -> Result<(), DexError> {
    let implementation = match &method.implementation {
        Some(implementation) => implementation,
        None => return Ok(()),
    };
    if implementation.instructions.is_empty() && !implementation.try_blocks.is_empty() {
        fail!("Method {} has no instructions, but has try blocks.", method_ref);
    }

    for parameter in &method.parameters {
        if let Some(name) = &parameter.name {
            interner.add_string(name)?;
        }
    }
    intern_instructions(interner, implementation)?;
    for block in &implementation.try_blocks {
        for handler in &block.handlers {
            if let Some(exception_type) = &handler.exception_type {
                interner.add_type(exception_type)?;
            }
        }
    }
    for item in &implementation.debug_items {
        match item {
            DebugItem::StartLocal { name, local_type, signature, .. } => {
                if let Some(name) = name {
                    interner.add_string(name)?;
                }
                if let Some(local_type) = local_type {
                    interner.add_type(local_type)?;
                }
                if let Some(signature) = signature {
                    interner.add_string(signature)?;
                }
            }
            DebugItem::SetSourceFile { source_file: Some(source_file), .. } => {
                interner.add_string(source_file)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn intern_instructions<I: ClassInterner + ?Sized>(interner: &mut I, implementation: &MethodImplementation) -> Result<(), DexError> {
    for instruction in &implementation.instructions {
        let expected = match &instruction.operands {
            Operands::VerificationError { error, .. } => Instruction::verification_reference_type(*error),
            _ => instruction.opcode.reference_type,
        };
        if let Some(reference) = instruction.reference() {
            intern_instruction_reference(interner, instruction, expected, reference)?;
        }
        if let Some(reference) = instruction.reference2() {
            let expected = instruction.opcode.reference_type2.unwrap_or(ReferenceType::None);
            intern_instruction_reference(interner, instruction, expected, reference)?;
        }
    }
    Ok(())
}

fn intern_instruction_reference<I: ClassInterner + ?Sized>(
    interner: &mut I,
    instruction: &Instruction,
    expected: ReferenceType,
    reference: &InstructionRef,
) -> Result<(), DexError> {
    match reference {
        InstructionRef::Resolved(r) => {
            if r.reference_type() != expected {
                fail!(
                    "Expected a {} reference for {} but found {} reference {}",
                    expected,
                    instruction.opcode.name,
                    r.reference_type(),
                    r
                );
            }
            interner.add_reference(r)
        }
        InstructionRef::Index(idx) if expected != ReferenceType::None => {
            fail!("Unresolved {} index {} in {}", expected, idx, instruction.opcode.name)
        }
        InstructionRef::Index(_) => Ok(()),
    }
}

/// Canonical form of an annotation set: sorted by type, rejecting two annotations of one type.
pub(crate) fn annotation_set_key(annotations: &[Annotation]) -> Result<Vec<Annotation>, DexError> {
    let mut key = annotations.to_vec();
    key.sort_by(|a, b| compare_utf16(&a.annotation_type, &b.annotation_type));
    for pair in key.windows(2) {
        if pair[0].annotation_type == pair[1].annotation_type {
            if pair[0] == pair[1] {
                continue;
            }
            fail!("Multiple annotations of type {} in one set", pair[0].annotation_type);
        }
    }
    key.dedup();
    Ok(key)
}

impl IndexResolver for DexPool {
    fn string_index(&self, value: &str) -> Result<u32, DexError> {
        self.strings.index(value)
    }

    fn type_index(&self, descriptor: &str) -> Result<u32, DexError> {
        self.types.index(descriptor)
    }

    fn proto_index(&self, proto: &ProtoRef) -> Result<u32, DexError> {
        self.protos.index(proto)
    }

    fn field_index(&self, field: &FieldRef) -> Result<u32, DexError> {
        self.fields.index(field)
    }

    fn method_index(&self, method: &MethodRef) -> Result<u32, DexError> {
        self.methods.index(method)
    }

    fn call_site_index(&self, call_site: &CallSiteRef) -> Result<u32, DexError> {
        self.call_sites.index(call_site)
    }

    fn method_handle_index(&self, handle: &MethodHandleRef) -> Result<u32, DexError> {
        self.method_handles.index(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::encoded_values::{AnnotationElement, AnnotationVisibility};
    use crate::dex::model::{AccessFlags, ExceptionHandler, Field, MethodParameter, TryBlock};

    fn object_class(class_type: &str) -> ClassDef {
        ClassDef::new(class_type, AccessFlags::PUBLIC, Some("Ljava/lang/Object;"))
    }

    fn instruction(opcodes: &Opcodes, name: &str, operands: Operands) -> Instruction {
        Instruction::from_name(opcodes, name, operands).unwrap()
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut pool = DexPool::new(Opcodes::default());
        let a = pool.intern_string("hello").unwrap();
        let b = pool.intern_string("hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.strings.len(), 1);

        let m = MethodRef::new("La;", "run", &["I"], "V");
        let h1 = pool.intern_method(&m).unwrap();
        let h2 = pool.intern_method(&m.clone()).unwrap();
        assert_eq!(h1, h2);
        pool.close().unwrap();
        assert_eq!(pool.methods.index_of(h1).unwrap(), pool.method_index(&m).unwrap());
    }

    #[test]
    fn test_string_order_is_utf16_and_independent_of_intern_order() {
        let mut pool = DexPool::new(Opcodes::default());
        for s in ["zeta", "\u{1f600}", "alpha", "\u{ff5e}", "Beta"] {
            pool.intern_string(s).unwrap();
        }
        pool.close().unwrap();
        let sorted: Vec<&String> = pool.strings.sorted().map(|(_, s)| s).collect();
        assert_eq!(sorted, vec!["Beta", "alpha", "zeta", "\u{1f600}", "\u{ff5e}"]);
        for pair in sorted.windows(2) {
            assert_ne!(compare_utf16(pair[0], pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn test_method_cascade_and_proto_order() {
        let mut pool = DexPool::new(Opcodes::default());
        pool.intern_method(&MethodRef::new("LB;", "b", &["J"], "I")).unwrap();
        pool.intern_method(&MethodRef::new("LA;", "a", &[], "V")).unwrap();
        pool.intern_proto(&ProtoRef::new(&["I"], "V")).unwrap();
        pool.close().unwrap();

        for s in ["LA;", "LB;", "a", "b", "IJ", "V", "VI", "I", "J"] {
            assert!(pool.strings.index(s).is_ok(), "{} missing", s);
        }
        assert_eq!(pool.type_lists.len(), 2);
        // Protos order by return type index first, then parameters: V() < V(I) and I(J) < V(..)
        let protos: Vec<String> = pool.protos.sorted().map(|(_, p)| p.to_string()).collect();
        assert_eq!(protos, vec!["(J)I", "()V", "(I)V"]);
        let methods: Vec<String> = pool.methods.sorted().map(|(_, m)| m.to_string()).collect();
        assert_eq!(methods, vec!["LA;->a()V", "LB;->b(J)I"]);
    }

    #[test]
    fn test_empty_type_list_and_annotation_set_are_absent() {
        let mut pool = DexPool::new(Opcodes::default());
        assert_eq!(pool.intern_type_list(&[]).unwrap(), None);
        assert_eq!(pool.intern_annotation_set(&[]).unwrap(), None);
        assert!(pool.type_lists.is_empty());
        assert!(pool.annotation_sets.is_empty());
    }

    #[test]
    fn test_annotation_set_is_order_insensitive() {
        let mut pool = DexPool::new(Opcodes::default());
        let a = Annotation::new(AnnotationVisibility::Runtime, "LA;", vec![]);
        let b = Annotation::new(
            AnnotationVisibility::Build,
            "LB;",
            vec![AnnotationElement::new("value", EncodedValue::Type("LC;".to_string()))],
        );
        let first = pool.intern_annotation_set(&[a.clone(), b.clone()]).unwrap();
        let second = pool.intern_annotation_set(&[b, a]).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.annotations.len(), 2);
        assert!(pool.types.handle_of("LC;").is_some());
        assert!(pool.strings.handle_of("value").is_some());
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut pool = DexPool::new(Opcodes::default());
        pool.intern_class(object_class("LA;")).unwrap();
        let e = pool.intern_class(object_class("LA;")).unwrap_err();
        assert_eq!(e.to_string(), "Class LA; has already been interned");
    }

    #[test]
    fn test_duplicate_members_rejected() {
        let mut pool = DexPool::new(Opcodes::default());
        let mut class = object_class("LA;");
        class.fields = vec![
            Field::new("LA;", "x", "I", AccessFlags::STATIC),
            Field::new("LA;", "x", "I", AccessFlags::PRIVATE),
        ];
        let e = pool.intern_class(class).unwrap_err();
        assert_eq!(e.message(), "Multiple definitions for field LA;->x:I");

        let mut class = object_class("LB;");
        class.methods = vec![
            Method::new("LB;", "m", vec![MethodParameter::new("I")], "V", AccessFlags::PUBLIC),
            Method::new("LB;", "m", vec![MethodParameter::named("I", "other")], "V", AccessFlags::STATIC),
        ];
        let e = pool.intern_class(class).unwrap_err();
        assert_eq!(e.to_string(), "Multiple definitions for method LB;->m(I)V for class LB;");
    }

    #[test]
    fn test_failed_class_leaves_pools_untouched() {
        let mut pool = DexPool::new(Opcodes::default());
        pool.intern_class(object_class("LA;")).unwrap();
        let before = pool.pool_lengths();

        let mut class = object_class("LB;");
        class.source_file = Some("B.java".to_string());
        class.fields = vec![
            Field::new("LB;", "y", "Ljava/util/List;", AccessFlags::STATIC).with_initial_value(EncodedValue::Int(3)),
            Field::new("LB;", "y", "Ljava/util/List;", AccessFlags::PRIVATE),
        ];
        assert!(pool.intern_class(class).is_err());
        assert_eq!(pool.pool_lengths(), before);
        assert!(pool.strings.handle_of("B.java").is_none());
        assert!(pool.types.handle_of("LB;").is_none());

        let mut class = object_class("LB;");
        class.source_file = Some("B.java".to_string());
        pool.intern_class(class).unwrap();
        pool.close().unwrap();
        assert_eq!(pool.strings.len(), 4);
        assert_eq!(pool.strings.index("B.java").unwrap(), 0);
        assert!(pool.strings.handle_of("y").is_none());
        assert_eq!(pool.classes.len(), 2);
    }

    #[test]
    fn test_try_blocks_without_instructions_rejected() {
        let mut pool = DexPool::new(Opcodes::default());
        let mut class = object_class("LA;");
        let mut implementation = MethodImplementation::new(1, vec![]);
        implementation.try_blocks.push(TryBlock {
            start_address: 0,
            code_unit_count: 1,
            handlers: vec![ExceptionHandler::new(None, 0)],
        });
        class.methods.push(Method::new("LA;", "m", vec![], "V", AccessFlags::STATIC).with_implementation(implementation));
        let e = pool.intern_class(class).unwrap_err();
        assert_eq!(e.message(), "Method LA;->m()V has no instructions, but has try blocks.");
    }

    #[test]
    fn test_wrong_reference_kind_rejected() {
        let opcodes = Opcodes::default();
        let mut pool = DexPool::new(Opcodes::default());
        let mut class = object_class("LA;");
        let sget = instruction(
            &opcodes,
            "sget",
            Operands::RegRef { a: 0, reference: InstructionRef::Resolved(Reference::String("oops".to_string())) },
        );
        let ret = instruction(&opcodes, "return-void", Operands::None);
        class.methods.push(
            Method::new("LA;", "m", vec![], "V", AccessFlags::STATIC)
                .with_implementation(MethodImplementation::new(1, vec![sget, ret])),
        );
        let e = pool.intern_class(class).unwrap_err();
        assert!(e.message().starts_with("Expected a field reference for sget but found string"), "{}", e);
        assert!(!pool.classes.contains("LA;"));
    }

    #[test]
    fn test_class_cascade_interns_method_constants() {
        let opcodes = Opcodes::default();
        let mut pool = DexPool::new(Opcodes::default());
        let mut class = object_class("LA;");
        class.interfaces = vec!["Ljava/lang/Runnable;".to_string()];
        class.source_file = Some("A.java".to_string());
        let body = vec![
            instruction(
                &opcodes,
                "const-string",
                Operands::RegRef { a: 0, reference: InstructionRef::Resolved(Reference::String("hi".to_string())) },
            ),
            instruction(
                &opcodes,
                "invoke-static",
                Operands::Invoke {
                    registers: vec![0],
                    reference: InstructionRef::Resolved(Reference::Method(MethodRef::new(
                        "LLog;",
                        "d",
                        &["Ljava/lang/String;"],
                        "V",
                    ))),
                    reference2: None,
                },
            ),
            instruction(&opcodes, "return-void", Operands::None),
        ];
        let mut implementation = MethodImplementation::new(1, body);
        implementation.try_blocks.push(TryBlock {
            start_address: 0,
            code_unit_count: 2,
            handlers: vec![ExceptionHandler::new(Some("Ljava/io/IOException;"), 5)],
        });
        implementation.debug_items.push(DebugItem::StartLocal {
            address: 2,
            register: 0,
            name: Some("message".to_string()),
            local_type: Some("Ljava/lang/CharSequence;".to_string()),
            signature: None,
        });
        class.methods.push(
            Method::new("LA;", "run", vec![], "V", AccessFlags::PUBLIC).with_implementation(implementation),
        );
        pool.intern_class(class).unwrap();

        for s in ["hi", "A.java", "d", "message"] {
            assert!(pool.strings.handle_of(s).is_some(), "{} missing", s);
        }
        for t in ["Ljava/lang/Runnable;", "LLog;", "Ljava/io/IOException;", "Ljava/lang/CharSequence;"] {
            assert!(pool.types.handle_of(t).is_some(), "{} missing", t);
        }
        assert!(pool.methods.handle_of(&MethodRef::new("LA;", "run", &[], "V")).is_some());
    }

    #[test]
    fn test_static_values_dedup_through_encoded_array_pool() {
        let mut pool = DexPool::new(Opcodes::default());
        for class_type in ["LA;", "LB;"] {
            let mut class = object_class(class_type);
            class.fields = vec![
                Field::new(class_type, "a", "I", AccessFlags::STATIC).with_initial_value(EncodedValue::Int(0)),
                Field::new(class_type, "b", "I", AccessFlags::STATIC).with_initial_value(EncodedValue::Int(5)),
                Field::new(class_type, "c", "I", AccessFlags::STATIC).with_initial_value(EncodedValue::Int(0)),
            ];
            pool.intern_class(class).unwrap();
        }
        let mut class = object_class("LC;");
        class.fields = vec![Field::new("LC;", "z", "Z", AccessFlags::STATIC)];
        pool.intern_class(class).unwrap();

        assert_eq!(pool.encoded_arrays.len(), 1);
        pool.close().unwrap();
        let (_, values) = pool.encoded_arrays.sorted().next().unwrap();
        assert_eq!(values, &vec![EncodedValue::Int(0), EncodedValue::Int(5)]);
    }

    #[test]
    fn test_class_order_puts_supertypes_first() {
        let mut pool = DexPool::new(Opcodes::default());
        pool.intern_class(ClassDef::new("LA;", AccessFlags::PUBLIC, Some("LZ;"))).unwrap();
        let mut b = ClassDef::new("LB;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        b.interfaces = vec!["LY;".to_string()];
        pool.intern_class(b).unwrap();
        pool.intern_class(ClassDef::new("LY;", AccessFlags::INTERFACE, Some("Ljava/lang/Object;"))).unwrap();
        pool.intern_class(ClassDef::new("LZ;", AccessFlags::PUBLIC, Some("LB;"))).unwrap();
        pool.close().unwrap();

        let order: Vec<&str> = pool.classes.sorted().map(|c| c.class_type.as_str()).collect();
        assert_eq!(order, vec!["LY;", "LB;", "LZ;", "LA;"]);
    }

    #[test]
    fn test_unknown_reference_reports_missing_key() {
        let mut pool = DexPool::new(Opcodes::default());
        pool.intern_string("known").unwrap();
        pool.close().unwrap();
        let e = pool.string_index("missing").unwrap_err();
        assert_eq!(e.to_string(), "String not interned: \"missing\"");
        assert!(pool.intern_string("late").is_err());
    }

    #[test]
    fn test_method_handles_sort_by_kind_then_target() {
        use crate::dex::references::MethodHandleKind;

        let mut pool = DexPool::new(Opcodes::default());
        let invoke = MethodHandleRef::new(
            MethodHandleKind::InvokeStatic,
            MethodHandleTarget::Method(MethodRef::new("LA;", "m", &[], "V")),
        )
        .unwrap();
        let getter =
            MethodHandleRef::new(MethodHandleKind::StaticGet, MethodHandleTarget::Field(FieldRef::new("LA;", "f", "I")))
                .unwrap();
        pool.intern_method_handle(&invoke).unwrap();
        pool.intern_method_handle(&getter).unwrap();
        pool.close().unwrap();
        assert_eq!(pool.method_handle_index(&getter).unwrap(), 0);
        assert_eq!(pool.method_handle_index(&invoke).unwrap(), 1);
    }
}
