//! Write-rejecting, read-through handles over live host objects.
//!
//! Some host bindings cannot be frozen: the host keeps rewriting their slots
//! or swaps the referenced object at will. For those, the access path is
//! wrapped instead of the object. A [`GuardedHandle`] forwards every
//! read-shaped operation to its target and rejects every write-shaped one
//! with [`GuardError::MutationRejected`] before the heap is touched.
//!
//! Reads never leak a raw nested handle: any structured result (property
//! value, getter result, descriptor value, method return value) comes back
//! wrapped in a fresh `GuardedHandle`, so the guarantee holds at every depth.
//! Accessor-backed members read as their computed value: the getter runs
//! with the real target as receiver. Handles are `Copy` and compare by
//! target identity, so wrapping the same object twice yields equal handles.
//!
//! Calling a method through a guard is allowed and runs with the real target
//! as receiver. Only replacing or removing members is prevented.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object_model::{
    JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey, ValueClass,
};

/// Stable error code for rejected mutations.
pub const MUTATION_REJECTED_CODE: &str = "FE-GUARD-0001";
/// Stable error code for object-model failures on a guarded read path.
pub const OBJECT_MODEL_CODE: &str = "FE-GUARD-0002";

// ---------------------------------------------------------------------------
// MutationKind / GuardError
// ---------------------------------------------------------------------------

/// Write-shaped operation kinds a guard intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Set,
    DefineProperty,
    DeleteProperty,
    PreventExtensions,
    SetPrototype,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => f.write_str("set"),
            Self::DefineProperty => f.write_str("define_property"),
            Self::DeleteProperty => f.write_str("delete_property"),
            Self::PreventExtensions => f.write_str("prevent_extensions"),
            Self::SetPrototype => f.write_str("set_prototype"),
        }
    }
}

/// Errors surfaced by guarded and raw access paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("mutation rejected: {operation} of {} on guarded {target}", describe_key(.key))]
    MutationRejected {
        operation: MutationKind,
        /// Property key, or `None` for whole-object operations.
        key: Option<PropertyKey>,
        target: ObjectHandle,
    },
    #[error("object model: {0}")]
    Object(#[from] ObjectError),
}

impl GuardError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MutationRejected { .. } => MUTATION_REJECTED_CODE,
            Self::Object(_) => OBJECT_MODEL_CODE,
        }
    }

    pub fn is_mutation_rejected(&self) -> bool {
        matches!(self, Self::MutationRejected { .. })
    }
}

fn describe_key(key: &Option<PropertyKey>) -> String {
    match key {
        Some(k) => format!("'{k}'"),
        None => "object".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Read-shaped operations. Method invocation counts as a read: it never
/// replaces a member.
pub trait ReadAccess {
    type Value;

    fn get(&self, heap: &ObjectHeap, key: &PropertyKey) -> Result<Self::Value, GuardError>;

    fn has(&self, heap: &ObjectHeap, key: &PropertyKey) -> Result<bool, GuardError>;

    /// Every own key, enumerable or not.
    fn own_keys(&self, heap: &ObjectHeap) -> Result<Vec<PropertyKey>, GuardError>;

    /// Read `key` and call it with the underlying object as receiver.
    fn invoke(
        &self,
        heap: &mut ObjectHeap,
        key: &PropertyKey,
        args: &[JsValue],
    ) -> Result<Self::Value, GuardError>;
}

/// Write-shaped operations. `Ok(false)` is an ordinary silent failure of
/// the object model; `Err` is a rejection.
pub trait WriteAccess {
    fn set(
        &self,
        heap: &mut ObjectHeap,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, GuardError>;

    fn define_property(
        &self,
        heap: &mut ObjectHeap,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, GuardError>;

    fn delete_property(
        &self,
        heap: &mut ObjectHeap,
        key: &PropertyKey,
    ) -> Result<bool, GuardError>;

    fn prevent_extensions(&self, heap: &mut ObjectHeap) -> Result<bool, GuardError>;

    fn set_prototype_of(
        &self,
        heap: &mut ObjectHeap,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, GuardError>;
}

// -- Raw handles: real effects ---------------------------------------------

impl ReadAccess for ObjectHandle {
    type Value = JsValue;

    fn get(&self, heap: &ObjectHeap, key: &PropertyKey) -> Result<JsValue, GuardError> {
        Ok(heap.get_property(*self, key)?)
    }

    fn has(&self, heap: &ObjectHeap, key: &PropertyKey) -> Result<bool, GuardError> {
        Ok(heap.has_property(*self, key)?)
    }

    fn own_keys(&self, heap: &ObjectHeap) -> Result<Vec<PropertyKey>, GuardError> {
        Ok(heap.own_property_keys(*self)?)
    }

    fn invoke(
        &self,
        heap: &mut ObjectHeap,
        key: &PropertyKey,
        args: &[JsValue],
    ) -> Result<JsValue, GuardError> {
        let callee = heap.get_property(*self, key)?;
        Ok(heap.call(&callee, *self, args)?)
    }
}

impl WriteAccess for ObjectHandle {
    fn set(
        &self,
        heap: &mut ObjectHeap,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, GuardError> {
        Ok(heap.set_property(*self, key, value)?)
    }

    fn define_property(
        &self,
        heap: &mut ObjectHeap,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, GuardError> {
        Ok(heap.define_property(*self, key, desc)?)
    }

    fn delete_property(
        &self,
        heap: &mut ObjectHeap,
        key: &PropertyKey,
    ) -> Result<bool, GuardError> {
        Ok(heap.delete_property(*self, key)?)
    }

    fn prevent_extensions(&self, heap: &mut ObjectHeap) -> Result<bool, GuardError> {
        Ok(heap.prevent_extensions(*self)?)
    }

    fn set_prototype_of(
        &self,
        heap: &mut ObjectHeap,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, GuardError> {
        Ok(heap.set_prototype_of(*self, proto)?)
    }
}

// ---------------------------------------------------------------------------
// GuardedHandle
// ---------------------------------------------------------------------------

/// Opaque read-through, write-rejecting reference to a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuardedHandle {
    target: ObjectHandle,
}

/// Wrap `target` in a guard. Has no effect on `target`.
pub fn guard(target: ObjectHandle) -> GuardedHandle {
    GuardedHandle { target }
}

/// Wrap a value: structured values are guarded, primitives pass as-is.
pub fn guard_value(value: JsValue) -> GuardedValue {
    match value.classify() {
        ValueClass::Structured(handle) => GuardedValue::Structured(guard(handle)),
        ValueClass::Primitive => GuardedValue::Primitive(value),
    }
}

impl GuardedHandle {
    /// Does this guard stand in for `handle`?
    pub fn guards(&self, handle: ObjectHandle) -> bool {
        self.target == handle
    }

    /// Own descriptor of `key`, with every reachable object wrapped.
    pub fn get_own_property(
        &self,
        heap: &ObjectHeap,
        key: &PropertyKey,
    ) -> Result<Option<GuardedDescriptor>, GuardError> {
        Ok(heap
            .get_own_property_descriptor(self.target, key)?
            .map(GuardedDescriptor::from))
    }

    /// Enumerable own string keys.
    pub fn keys(&self, heap: &ObjectHeap) -> Result<Vec<String>, GuardError> {
        Ok(heap.keys(self.target)?)
    }

    pub fn is_extensible(&self, heap: &ObjectHeap) -> Result<bool, GuardError> {
        Ok(heap.is_extensible(self.target)?)
    }

    /// Guarded prototype, if any.
    pub fn get_prototype_of(&self, heap: &ObjectHeap) -> Result<Option<GuardedHandle>, GuardError> {
        Ok(heap.get_prototype_of(self.target)?.map(guard))
    }

    fn reject(&self, operation: MutationKind, key: Option<PropertyKey>) -> GuardError {
        GuardError::MutationRejected {
            operation,
            key,
            target: self.target,
        }
    }
}

impl fmt::Display for GuardedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "guarded({})", self.target)
    }
}

impl ReadAccess for GuardedHandle {
    type Value = GuardedValue;

    fn get(&self, heap: &ObjectHeap, key: &PropertyKey) -> Result<GuardedValue, GuardError> {
        Ok(guard_value(heap.get_property(self.target, key)?))
    }

    fn has(&self, heap: &ObjectHeap, key: &PropertyKey) -> Result<bool, GuardError> {
        self.target.has(heap, key)
    }

    fn own_keys(&self, heap: &ObjectHeap) -> Result<Vec<PropertyKey>, GuardError> {
        self.target.own_keys(heap)
    }

    fn invoke(
        &self,
        heap: &mut ObjectHeap,
        key: &PropertyKey,
        args: &[JsValue],
    ) -> Result<GuardedValue, GuardError> {
        Ok(guard_value(self.target.invoke(heap, key, args)?))
    }
}

impl WriteAccess for GuardedHandle {
    fn set(
        &self,
        _heap: &mut ObjectHeap,
        key: PropertyKey,
        _value: JsValue,
    ) -> Result<bool, GuardError> {
        Err(self.reject(MutationKind::Set, Some(key)))
    }

    fn define_property(
        &self,
        _heap: &mut ObjectHeap,
        key: PropertyKey,
        _desc: PropertyDescriptor,
    ) -> Result<bool, GuardError> {
        Err(self.reject(MutationKind::DefineProperty, Some(key)))
    }

    fn delete_property(
        &self,
        _heap: &mut ObjectHeap,
        key: &PropertyKey,
    ) -> Result<bool, GuardError> {
        Err(self.reject(MutationKind::DeleteProperty, Some(key.clone())))
    }

    fn prevent_extensions(&self, _heap: &mut ObjectHeap) -> Result<bool, GuardError> {
        Err(self.reject(MutationKind::PreventExtensions, None))
    }

    fn set_prototype_of(
        &self,
        _heap: &mut ObjectHeap,
        _proto: Option<ObjectHandle>,
    ) -> Result<bool, GuardError> {
        Err(self.reject(MutationKind::SetPrototype, None))
    }
}

// ---------------------------------------------------------------------------
// GuardedValue / GuardedDescriptor
// ---------------------------------------------------------------------------

/// Result of a guarded read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardedValue {
    Primitive(JsValue),
    Structured(GuardedHandle),
}

impl GuardedValue {
    pub fn as_primitive(&self) -> Option<&JsValue> {
        match self {
            Self::Primitive(v) => Some(v),
            Self::Structured(_) => None,
        }
    }

    pub fn as_guarded(&self) -> Option<GuardedHandle> {
        match self {
            Self::Structured(h) => Some(*h),
            Self::Primitive(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }
}

/// Descriptor view returned through a guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardedDescriptor {
    Data {
        value: GuardedValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<GuardedValue>,
        set: Option<GuardedValue>,
        enumerable: bool,
        configurable: bool,
    },
}

impl From<PropertyDescriptor> for GuardedDescriptor {
    fn from(desc: PropertyDescriptor) -> Self {
        match desc {
            PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => Self::Data {
                value: guard_value(value),
                writable,
                enumerable,
                configurable,
            },
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => Self::Accessor {
                get: get.map(guard_value),
                set: set.map(guard_value),
                enumerable,
                configurable,
            },
        }
    }
}
