//! Host object model the enforcement engine operates on.
//!
//! An arena of ordinary objects with ES-style property descriptors:
//!
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Prototype chains**: `[[Prototype]]` slot with bounded, cycle-checked walks
//! - **Extensibility**: `[[Extensible]]` / `[[PreventExtensions]]`
//! - **Symbol keys**: property keys that are either strings or symbols
//! - **Host-managed slots**: properties whose descriptors the host refuses to
//!   alter, but which the host itself keeps rewriting through `host_write`
//! - **Native callables**: `JsValue::Function` values dispatch into a table of
//!   plain `fn` pointers registered by the host; read-only getters are a
//!   separate kind so `[[Get]]` can run them against a shared heap
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialize/deserialize `BTreeMap<PropertyKey, PropertyDescriptor>` as a
/// sorted sequence of `[key, descriptor]` pairs.  serde_json requires string
/// keys for JSON maps but `PropertyKey` is an enum.
mod properties_as_seq {
    use super::{BTreeMap, PropertyDescriptor, PropertyKey};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PropertyKey, PropertyDescriptor>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&PropertyKey, &PropertyDescriptor)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PropertyKey, PropertyDescriptor>, D::Error> {
        let pairs: Vec<(PropertyKey, PropertyDescriptor)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// PropertyKey: string or symbol
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key.
    Symbol(SymbolId),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

// ---------------------------------------------------------------------------
// ObjectHandle: typed reference to heap objects
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// JsValue: runtime value
// ---------------------------------------------------------------------------

/// Runtime value stored in property slots.
///
/// `Function` references an entry in the heap's native callable table; it
/// carries no properties of its own and is therefore classified as primitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
    Function(u32),
}

/// Closed classification used as the recursion base case of every graph walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// Atomic value without addressable properties.
    Primitive,
    /// Value with addressable named properties.
    Structured(ObjectHandle),
}

impl JsValue {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// Classify this value as primitive or structured.
    pub fn classify(&self) -> ValueClass {
        match self {
            Self::Object(handle) => ValueClass::Structured(*handle),
            _ => ValueClass::Primitive,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }

    /// SameValue comparison.
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
            Self::Function(idx) => write!(f, "[function#{idx}]"),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Property descriptor: either a data slot or an accessor pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: getter and/or setter callables.
    Accessor {
        get: Option<JsValue>,
        set: Option<JsValue>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create a writable, configurable but non-enumerable data descriptor,
    /// the shape host platform objects use for most of their members.
    pub fn data_hidden(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Is this descriptor configurable?
    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    /// Is this descriptor enumerable?
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    /// Is this a data descriptor?
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Is this an accessor descriptor?
    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    /// Neither writable nor configurable.
    pub fn is_locked(&self) -> bool {
        !self.is_writable() && !self.is_configurable()
    }

    /// The same descriptor with `writable=false, configurable=false`, keeping
    /// value, accessor pair and enumerability.
    pub fn locked(&self) -> Self {
        match self {
            Self::Data {
                value, enumerable, ..
            } => Self::Data {
                value: value.clone(),
                writable: false,
                enumerable: *enumerable,
                configurable: false,
            },
            Self::Accessor {
                get,
                set,
                enumerable,
                ..
            } => Self::Accessor {
                get: get.clone(),
                set: set.clone(),
                enumerable: *enumerable,
                configurable: false,
            },
        }
    }

    /// Values reachable through this descriptor without invoking anything:
    /// the data value, or the getter/setter themselves.
    pub fn reachable_values(&self) -> Vec<JsValue> {
        match self {
            Self::Data { value, .. } => vec![value.clone()],
            Self::Accessor { get, set, .. } => get.iter().chain(set.iter()).cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from object model operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectError {
    /// TypeError raised by a strict-mode operation.
    TypeError(String),
    /// Object not found in the heap.
    ObjectNotFound(ObjectHandle),
    /// No native callable registered under this id.
    FunctionNotFound(u32),
    /// Value is not callable.
    NotCallable(String),
    /// Prototype chain cycle detected.
    PrototypeCycleDetected,
    /// Maximum prototype chain depth exceeded.
    PrototypeChainTooDeep { depth: u32, max: u32 },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError(msg) => write!(f, "TypeError: {msg}"),
            Self::ObjectNotFound(h) => write!(f, "object#{} not found", h.0),
            Self::FunctionNotFound(id) => write!(f, "function#{id} not found"),
            Self::NotCallable(what) => write!(f, "TypeError: {what} is not a function"),
            Self::PrototypeCycleDetected => write!(f, "TypeError: prototype chain cycle detected"),
            Self::PrototypeChainTooDeep { depth, max } => {
                write!(
                    f,
                    "TypeError: prototype chain depth {depth} exceeds max {max}"
                )
            }
        }
    }
}

impl std::error::Error for ObjectError {}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

/// Maximum prototype chain depth to prevent infinite loops.
const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// An ordinary object with internal slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` internal slot (None means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    /// Own properties with descriptors, keyed by PropertyKey.
    #[serde(with = "properties_as_seq")]
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// Class tag for host object identification (e.g. `Storage`).
    pub class_tag: Option<String>,
    /// Keys whose descriptors only the host may change.
    #[serde(default)]
    pub host_managed: BTreeSet<PropertyKey>,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            class_tag: None,
            host_managed: BTreeSet::new(),
        }
    }
}

impl OrdinaryObject {
    /// Create a new ordinary object with the given prototype.
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    /// `[[GetOwnProperty]](P)`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    /// Does this object have an own property `key`?
    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// `[[DefineOwnProperty]](P, Desc)`: define or update a property.
    ///
    /// Returns `Ok(true)` if the property was defined, `Ok(false)` if the
    /// change was refused (non-configurable conflict, non-extensible target,
    /// or a host-managed slot).
    pub fn define_own_property(
        &mut self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        if self.host_managed.contains(&key) {
            return Ok(false);
        }
        if let Some(current) = self.properties.get(&key) {
            if !current.is_configurable() {
                if desc.is_configurable() {
                    return Ok(false);
                }
                if desc.is_enumerable() != current.is_enumerable() {
                    return Ok(false);
                }
                if current.is_data() != desc.is_data() {
                    return Ok(false);
                }
                if let (
                    PropertyDescriptor::Data {
                        writable: current_w,
                        value: current_v,
                        ..
                    },
                    PropertyDescriptor::Data {
                        writable: new_w,
                        value: new_v,
                        ..
                    },
                ) = (current, &desc)
                    && !current_w
                    && (*new_w || !current_v.same_value(new_v))
                {
                    return Ok(false);
                }
                if let (
                    PropertyDescriptor::Accessor {
                        get: cur_get,
                        set: cur_set,
                        ..
                    },
                    PropertyDescriptor::Accessor {
                        get: new_get,
                        set: new_set,
                        ..
                    },
                ) = (current, &desc)
                    && (cur_get != new_get || cur_set != new_set)
                {
                    return Ok(false);
                }
            }
            self.properties.insert(key, desc);
            Ok(true)
        } else {
            if !self.extensible {
                return Ok(false);
            }
            self.properties.insert(key, desc);
            Ok(true)
        }
    }

    /// `[[Delete]](P)`: returns `false` if non-configurable or host-managed.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            None => true,
            Some(desc) if !desc.is_configurable() || self.host_managed.contains(key) => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
        }
    }

    /// `[[OwnPropertyKeys]]()`: integer indices (numeric order), then string
    /// keys, then symbol keys. Includes non-enumerable keys.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in self.properties.keys() {
            match key {
                PropertyKey::String(s) => {
                    if let Ok(n) = s.parse::<u64>() {
                        int_keys.push((n, key.clone()));
                    } else {
                        str_keys.push(key.clone());
                    }
                }
                PropertyKey::Symbol(_) => sym_keys.push(key.clone()),
            }
        }

        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        result
    }

    /// `[[PreventExtensions]]()`.
    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }

    /// Non-extensible and every own property locked.
    pub fn is_frozen(&self) -> bool {
        !self.extensible && self.properties.values().all(PropertyDescriptor::is_locked)
    }
}

// ---------------------------------------------------------------------------
// ObjectHeap: the managed object store
// ---------------------------------------------------------------------------

/// Native callable: `(heap, receiver, args) -> result`.
pub type NativeFunction =
    fn(&mut ObjectHeap, ObjectHandle, &[JsValue]) -> Result<JsValue, ObjectError>;

/// Native accessor getter: computes a value from a shared heap.
pub type NativeGetter = fn(&ObjectHeap, ObjectHandle) -> Result<JsValue, ObjectError>;

#[derive(Debug, Clone, Copy)]
enum Native {
    Method(NativeFunction),
    Getter(NativeGetter),
}

/// The object heap: arena of ordinary objects plus the native callable table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectHeap {
    objects: Vec<OrdinaryObject>,
    next_symbol: u32,
    #[serde(skip)]
    natives: Vec<Native>,
}

impl ObjectHeap {
    /// Create a new empty heap.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            next_symbol: 1,
            natives: Vec::new(),
        }
    }

    /// Allocate a new ordinary object with the given prototype.
    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(OrdinaryObject::with_prototype(proto));
        handle
    }

    /// Allocate a new ordinary object without prototype.
    pub fn alloc_plain(&mut self) -> ObjectHandle {
        self.alloc(None)
    }

    /// Allocate a new unique symbol id.
    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    /// Register a native callable and return the value referencing it.
    pub fn register_native(&mut self, function: NativeFunction) -> JsValue {
        self.push_native(Native::Method(function))
    }

    /// Register a read-only accessor getter and return the value referencing it.
    pub fn register_getter(&mut self, getter: NativeGetter) -> JsValue {
        self.push_native(Native::Getter(getter))
    }

    fn push_native(&mut self, native: Native) -> JsValue {
        let id = self.natives.len() as u32;
        self.natives.push(native);
        JsValue::Function(id)
    }

    fn native(&self, callee: &JsValue) -> Result<Native, ObjectError> {
        let JsValue::Function(id) = callee else {
            return Err(ObjectError::NotCallable(callee.type_name().to_string()));
        };
        self.natives
            .get(*id as usize)
            .copied()
            .ok_or(ObjectError::FunctionNotFound(*id))
    }

    /// Invoke `callee` with `receiver` as `this`.
    pub fn call(
        &mut self,
        callee: &JsValue,
        receiver: ObjectHandle,
        args: &[JsValue],
    ) -> Result<JsValue, ObjectError> {
        match self.native(callee)? {
            Native::Method(function) => function(self, receiver, args),
            Native::Getter(getter) => getter(self, receiver),
        }
    }

    /// Run an accessor getter with `receiver` as `this`.
    pub fn call_getter(
        &self,
        getter: &JsValue,
        receiver: ObjectHandle,
    ) -> Result<JsValue, ObjectError> {
        match self.native(getter)? {
            Native::Getter(getter) => getter(self, receiver),
            Native::Method(_) => Err(ObjectError::TypeError(format!(
                "{getter} is not registered as an accessor getter"
            ))),
        }
    }

    /// Get a reference to an object.
    pub fn get(&self, handle: ObjectHandle) -> Result<&OrdinaryObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Get a mutable reference to an object.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut OrdinaryObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Number of objects allocated.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Is the heap empty?
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Tag an object with a host class name.
    pub fn set_class_tag(&mut self, handle: ObjectHandle, tag: &str) -> Result<(), ObjectError> {
        self.get_mut(handle)?.class_tag = Some(tag.to_string());
        Ok(())
    }

    // -- Property access -----------------------------------------------------

    /// `[[Get]](O, P)`: walks the prototype chain. An accessor found anywhere
    /// on the chain runs its getter with `handle` as receiver.
    pub fn get_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<JsValue, ObjectError> {
        let mut current = Some(handle);
        let mut depth: u32 = 0;
        let mut visited = BTreeSet::new();

        while let Some(h) = current {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }

            let obj = self.get(h)?;
            if let Some(desc) = obj.get_own_property(key) {
                return match desc {
                    PropertyDescriptor::Data { value, .. } => Ok(value.clone()),
                    PropertyDescriptor::Accessor { get: None, .. } => Ok(JsValue::Undefined),
                    PropertyDescriptor::Accessor {
                        get: Some(getter), ..
                    } => self.call_getter(getter, handle),
                };
            }
            current = obj.prototype;
            depth += 1;
        }

        Ok(JsValue::Undefined)
    }

    /// `[[HasProperty]](O, P)`: walks the prototype chain.
    pub fn has_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        let mut current = Some(handle);
        let mut depth: u32 = 0;
        let mut visited = BTreeSet::new();

        while let Some(h) = current {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            let obj = self.get(h)?;
            if obj.has_own_property(key) {
                return Ok(true);
            }
            current = obj.prototype;
            depth += 1;
        }
        Ok(false)
    }

    /// `[[Set]](O, P, V)` on own properties. An own accessor runs its setter.
    /// `Ok(false)` means the assignment silently failed (non-writable,
    /// accessor without setter, host-managed, or a new key on a
    /// non-extensible object).
    pub fn set_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        let obj = self.get(handle)?;
        if obj.host_managed.contains(&key) {
            return Ok(false);
        }
        if let Some(PropertyDescriptor::Accessor { set, .. }) = obj.get_own_property(&key) {
            let Some(setter) = set.clone() else {
                return Ok(false);
            };
            self.call(&setter, handle, &[value])?;
            return Ok(true);
        }
        let obj = self.get_mut(handle)?;
        match obj.properties.get_mut(&key) {
            Some(PropertyDescriptor::Data {
                value: slot,
                writable: true,
                ..
            }) => {
                *slot = value;
                Ok(true)
            }
            Some(_) => Ok(false),
            None if obj.extensible => {
                obj.properties.insert(key, PropertyDescriptor::data(value));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Strict-mode assignment: a silent failure becomes a `TypeError`.
    pub fn set_property_strict(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<(), ObjectError> {
        let shown = key.to_string();
        if self.set_property(handle, key, value)? {
            Ok(())
        } else {
            Err(ObjectError::TypeError(format!(
                "cannot assign to read only property '{shown}' of {handle}"
            )))
        }
    }

    /// `[[Delete]](O, P)`.
    pub fn delete_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Ok(self.get_mut(handle)?.delete(key))
    }

    /// `Object.defineProperty(O, P, Desc)`: `Ok(false)` on refusal.
    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        self.get_mut(handle)?.define_own_property(key, desc)
    }

    /// `Object.getOwnPropertyDescriptor(O, P)`.
    pub fn get_own_property_descriptor(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Ok(self.get(handle)?.get_own_property(key).cloned())
    }

    /// `Reflect.ownKeys(O)`: every own key, enumerable or not.
    pub fn own_property_keys(&self, handle: ObjectHandle) -> Result<Vec<PropertyKey>, ObjectError> {
        Ok(self.get(handle)?.own_property_keys())
    }

    /// `Object.keys(O)`: enumerable own string keys.
    pub fn keys(&self, handle: ObjectHandle) -> Result<Vec<String>, ObjectError> {
        let obj = self.get(handle)?;
        Ok(obj
            .own_property_keys()
            .into_iter()
            .filter(|k| {
                obj.properties
                    .get(k)
                    .is_some_and(PropertyDescriptor::is_enumerable)
            })
            .filter_map(|k| match k {
                PropertyKey::String(s) => Some(s),
                PropertyKey::Symbol(_) => None,
            })
            .collect())
    }

    /// `Object.getPrototypeOf(O)`.
    pub fn get_prototype_of(
        &self,
        handle: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        Ok(self.get(handle)?.prototype)
    }

    /// `Object.setPrototypeOf(O, proto)`.
    pub fn set_prototype_of(
        &mut self,
        handle: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        if let Some(p) = proto {
            let mut current = Some(p);
            let mut visited = BTreeSet::new();
            visited.insert(handle);
            while let Some(h) = current {
                if !visited.insert(h) {
                    return Err(ObjectError::PrototypeCycleDetected);
                }
                current = self.get(h)?.prototype;
            }
        }

        let obj = self.get_mut(handle)?;
        if !obj.extensible {
            // Non-extensible: can only "set" the current prototype.
            return Ok(obj.prototype == proto);
        }
        obj.prototype = proto;
        Ok(true)
    }

    /// `Object.isExtensible(O)`.
    pub fn is_extensible(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        Ok(self.get(handle)?.extensible)
    }

    /// `Object.preventExtensions(O)`.
    pub fn prevent_extensions(&mut self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        self.get_mut(handle)?.prevent_extensions();
        Ok(true)
    }

    /// `Object.isFrozen(O)`.
    pub fn is_frozen(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        Ok(self.get(handle)?.is_frozen())
    }

    // -- Host-side operations ------------------------------------------------

    /// Pin `key` on `handle` as a host-managed slot. Author-level define,
    /// assign and delete on it are refused from now on.
    pub fn mark_host_managed(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
    ) -> Result<(), ObjectError> {
        self.get_mut(handle)?.host_managed.insert(key);
        Ok(())
    }

    /// Host-internal rewrite of a slot, bypassing descriptor checks.
    pub fn host_write(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<(), ObjectError> {
        let obj = self.get_mut(handle)?;
        match obj.properties.get_mut(&key) {
            Some(PropertyDescriptor::Data { value: slot, .. }) => *slot = value,
            _ => {
                obj.properties
                    .insert(key, PropertyDescriptor::data_hidden(value));
            }
        }
        Ok(())
    }
}
