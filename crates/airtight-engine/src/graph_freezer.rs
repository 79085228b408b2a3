//! Deep, cycle-safe immutabilization of an object graph.
//!
//! Starting from a root, every reachable own property (enumerable or not,
//! string or symbol keyed) is redefined as `writable=false,
//! configurable=false` with its value, accessor pair and enumerability
//! untouched, and every reached object is made non-extensible.
//!
//! Traversal uses an explicit worklist and an identity-keyed visited set, so
//! each node is processed once per pass regardless of cycles or diamonds and
//! graph depth cannot exhaust the native stack. Getters are never invoked:
//! accessor properties contribute their getter/setter function objects to the
//! walk instead of their computed values.
//!
//! The freezer never fails. Descriptors the host refuses to alter and
//! dangling handles are skipped and counted in the [`FreezeReport`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::object_model::{
    JsValue, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey, ValueClass,
};
use crate::protection_event::{EventLog, ProtectionEvent};

const COMPONENT: &str = "graph_freezer";

/// Error code attached to host-refusal skip events.
pub const HOST_REFUSED_CODE: &str = "FE-FREEZE-0001";
/// Error code attached to dangling-reference skip events.
pub const DANGLING_REFERENCE_CODE: &str = "FE-FREEZE-0002";
/// Error code attached to the truncation event.
pub const NODE_LIMIT_CODE: &str = "FE-FREEZE-0003";

// ---------------------------------------------------------------------------
// FreezeConfig
// ---------------------------------------------------------------------------

/// Tunables for a freeze pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreezeConfig {
    /// Also freeze the `[[Prototype]]` of every visited node.
    pub follow_prototypes: bool,
    /// Stop after this many nodes; the report is marked truncated.
    pub max_nodes: Option<usize>,
}

// ---------------------------------------------------------------------------
// FreezeReport
// ---------------------------------------------------------------------------

/// Outcome counters for one freeze pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeReport {
    /// Distinct objects made non-extensible.
    pub nodes_frozen: usize,
    /// Descriptors rewritten to non-writable, non-configurable.
    pub descriptors_rewritten: usize,
    /// Descriptors that were already locked and left untouched.
    pub descriptors_already_locked: usize,
    /// Descriptor rewrites the host refused.
    pub host_refusals: usize,
    /// Handles reached that do not resolve to a heap object.
    pub dangling_references: usize,
    /// The pass stopped at `max_nodes` before the graph was exhausted.
    pub truncated: bool,
}

impl FreezeReport {
    /// Fold another pass's counters into this one.
    pub fn merge(&mut self, other: &FreezeReport) {
        self.nodes_frozen += other.nodes_frozen;
        self.descriptors_rewritten += other.descriptors_rewritten;
        self.descriptors_already_locked += other.descriptors_already_locked;
        self.host_refusals += other.host_refusals;
        self.dangling_references += other.dangling_references;
        self.truncated |= other.truncated;
    }
}

// ---------------------------------------------------------------------------
// GraphFreezer
// ---------------------------------------------------------------------------

/// Deep freezer carrying configuration and an audit log across passes.
#[derive(Debug, Clone)]
pub struct GraphFreezer {
    config: FreezeConfig,
    trace_id: String,
    log: EventLog,
}

impl GraphFreezer {
    pub fn new(config: FreezeConfig, trace_id: &str) -> Self {
        Self {
            config,
            trace_id: trace_id.to_string(),
            log: EventLog::new(),
        }
    }

    pub fn config(&self) -> &FreezeConfig {
        &self.config
    }

    /// Freeze everything reachable from `root`.
    pub fn deep_freeze(&mut self, heap: &mut ObjectHeap, root: &JsValue) -> FreezeReport {
        let mut report = FreezeReport::default();
        let ValueClass::Structured(start) = root.classify() else {
            return report;
        };

        let mut visited = BTreeSet::new();
        let mut worklist = vec![start];

        while let Some(handle) = worklist.pop() {
            if visited.contains(&handle) {
                continue;
            }
            if let Some(max) = self.config.max_nodes
                && report.nodes_frozen >= max
            {
                report.truncated = true;
                self.log.skip(
                    &self.trace_id,
                    COMPONENT,
                    "node_limit_reached",
                    &handle.to_string(),
                    NODE_LIMIT_CODE,
                );
                break;
            }
            visited.insert(handle);

            let Ok(obj) = heap.get(handle) else {
                report.dangling_references += 1;
                self.log.skip(
                    &self.trace_id,
                    COMPONENT,
                    "dangling_reference",
                    &handle.to_string(),
                    DANGLING_REFERENCE_CODE,
                );
                continue;
            };
            let prototype = obj.prototype;
            let entries: Vec<(PropertyKey, PropertyDescriptor)> = obj
                .own_property_keys()
                .into_iter()
                .filter_map(|key| obj.get_own_property(&key).cloned().map(|d| (key, d)))
                .collect();

            for (key, desc) in entries {
                for value in desc.reachable_values() {
                    if let ValueClass::Structured(child) = value.classify()
                        && !visited.contains(&child)
                    {
                        worklist.push(child);
                    }
                }

                if desc.is_locked() {
                    report.descriptors_already_locked += 1;
                    continue;
                }
                match heap.define_property(handle, key.clone(), desc.locked()) {
                    Ok(true) => report.descriptors_rewritten += 1,
                    Ok(false) | Err(_) => {
                        report.host_refusals += 1;
                        self.log.skip(
                            &self.trace_id,
                            COMPONENT,
                            "host_refused",
                            &format!("{handle}.{key}"),
                            HOST_REFUSED_CODE,
                        );
                    }
                }
            }

            if self.config.follow_prototypes
                && let Some(proto) = prototype
                && !visited.contains(&proto)
            {
                worklist.push(proto);
            }

            if heap.prevent_extensions(handle).is_ok() {
                report.nodes_frozen += 1;
                self.log
                    .pass(&self.trace_id, COMPONENT, "node_frozen", &handle.to_string());
            }
        }

        report
    }

    /// Drain accumulated events.
    pub fn drain_events(&mut self) -> Vec<ProtectionEvent> {
        self.log.drain_events()
    }

    pub(crate) fn log_mut(&mut self) -> &mut EventLog {
        &mut self.log
    }
}

/// Freeze everything reachable from `root` with the default configuration.
pub fn deep_freeze(heap: &mut ObjectHeap, root: &JsValue) -> FreezeReport {
    GraphFreezer::new(FreezeConfig::default(), "deep_freeze").deep_freeze(heap, root)
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Every live object reachable from `root`, in handle order.
pub fn reachable_objects(
    heap: &ObjectHeap,
    root: &JsValue,
    follow_prototypes: bool,
) -> BTreeSet<ObjectHandle> {
    let mut visited = BTreeSet::new();
    let ValueClass::Structured(start) = root.classify() else {
        return visited;
    };
    let mut worklist = vec![start];
    while let Some(handle) = worklist.pop() {
        let Ok(obj) = heap.get(handle) else {
            continue;
        };
        if !visited.insert(handle) {
            continue;
        }
        for desc in obj.properties.values() {
            for value in desc.reachable_values() {
                if let ValueClass::Structured(child) = value.classify() {
                    worklist.push(child);
                }
            }
        }
        if follow_prototypes && let Some(proto) = obj.prototype {
            worklist.push(proto);
        }
    }
    visited
}

/// Findings of a deep-freeze audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeAudit {
    pub objects_checked: usize,
    /// Reachable objects that still accept new properties.
    pub extensible: Vec<ObjectHandle>,
    /// Reachable properties that are still writable or configurable.
    pub unlocked: Vec<(ObjectHandle, PropertyKey)>,
}

impl FreezeAudit {
    pub fn is_clean(&self) -> bool {
        self.extensible.is_empty() && self.unlocked.is_empty()
    }
}

/// Check that the deep-freeze invariant holds for everything reachable
/// from `root`.
pub fn audit_deep_freeze(
    heap: &ObjectHeap,
    root: &JsValue,
    follow_prototypes: bool,
) -> FreezeAudit {
    let mut audit = FreezeAudit::default();
    for handle in reachable_objects(heap, root, follow_prototypes) {
        let Ok(obj) = heap.get(handle) else {
            continue;
        };
        audit.objects_checked += 1;
        if obj.extensible {
            audit.extensible.push(handle);
        }
        for key in obj.own_property_keys() {
            if obj.get_own_property(&key).is_some_and(|d| !d.is_locked()) {
                audit.unlocked.push((handle, key));
            }
        }
    }
    audit
}

/// `sha256:<hex>` over the canonical JSON of every descriptor and
/// extensibility flag reachable from `root`.
pub fn descriptor_digest(heap: &ObjectHeap, root: &JsValue, follow_prototypes: bool) -> String {
    let mut hasher = Sha256::new();
    for handle in reachable_objects(heap, root, follow_prototypes) {
        let Ok(obj) = heap.get(handle) else {
            continue;
        };
        hasher.update(handle.0.to_le_bytes());
        hasher.update([u8::from(obj.extensible)]);
        for key in obj.own_property_keys() {
            if let Some(desc) = obj.get_own_property(&key) {
                let encoded = serde_json::to_vec(&(&key, desc)).unwrap_or_default();
                hasher.update((encoded.len() as u64).to_le_bytes());
                hasher.update(&encoded);
            }
        }
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::ObjectError;

    fn str_key(s: &str) -> PropertyKey {
        PropertyKey::String(s.to_string())
    }

    fn int_val(n: i64) -> JsValue {
        JsValue::Int(n)
    }

    fn obj_with(heap: &mut ObjectHeap, props: &[(&str, JsValue)]) -> ObjectHandle {
        let h = heap.alloc_plain();
        for (k, v) in props {
            heap.set_property(h, str_key(k), v.clone()).unwrap();
        }
        h
    }

    #[test]
    fn primitive_root_is_a_no_op() {
        let mut heap = ObjectHeap::new();
        for root in [JsValue::Undefined, JsValue::Null, int_val(1), JsValue::Function(0)] {
            assert_eq!(deep_freeze(&mut heap, &root), FreezeReport::default());
        }
    }

    #[test]
    fn nested_graph_is_locked_and_sealed() {
        let mut heap = ObjectHeap::new();
        let inner = obj_with(&mut heap, &[("b", int_val(1))]);
        let root = obj_with(&mut heap, &[("a", JsValue::Object(inner))]);

        let report = deep_freeze(&mut heap, &JsValue::Object(root));
        assert_eq!(report.nodes_frozen, 2);
        assert_eq!(report.descriptors_rewritten, 2);
        assert!(heap.is_frozen(root).unwrap());
        assert!(heap.is_frozen(inner).unwrap());
        assert!(audit_deep_freeze(&heap, &JsValue::Object(root), false).is_clean());
    }

    #[test]
    fn enumerability_and_values_survive() {
        let mut heap = ObjectHeap::new();
        let root = heap.alloc_plain();
        heap.define_property(root, str_key("hidden"), PropertyDescriptor::data_hidden(int_val(3)))
            .unwrap();
        deep_freeze(&mut heap, &JsValue::Object(root));
        let d = heap
            .get_own_property_descriptor(root, &str_key("hidden"))
            .unwrap()
            .unwrap();
        assert!(!d.is_enumerable());
        assert!(d.is_locked());
        assert_eq!(d.value(), Some(&int_val(3)));
    }

    #[test]
    fn self_cycle_terminates() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc_plain();
        heap.set_property(a, str_key("self"), JsValue::Object(a)).unwrap();
        let report = deep_freeze(&mut heap, &JsValue::Object(a));
        assert_eq!(report.nodes_frozen, 1);
        assert!(heap.is_frozen(a).unwrap());
    }

    #[test]
    fn diamond_visits_shared_node_once() {
        let mut heap = ObjectHeap::new();
        let shared = obj_with(&mut heap, &[("v", int_val(1))]);
        let left = obj_with(&mut heap, &[("s", JsValue::Object(shared))]);
        let right = obj_with(&mut heap, &[("s", JsValue::Object(shared))]);
        let root = obj_with(
            &mut heap,
            &[("l", JsValue::Object(left)), ("r", JsValue::Object(right))],
        );
        let report = deep_freeze(&mut heap, &JsValue::Object(root));
        assert_eq!(report.nodes_frozen, 4);
        assert_eq!(report.descriptors_rewritten, 5);
    }

    fn first_object_getter(
        _heap: &ObjectHeap,
        _receiver: ObjectHandle,
    ) -> Result<JsValue, ObjectError> {
        Ok(JsValue::Object(ObjectHandle(0)))
    }

    #[test]
    fn accessors_are_locked_without_running_getters() {
        let mut heap = ObjectHeap::new();
        // Only reachable through the getter's result.
        let computed = heap.alloc_plain();
        let getter = heap.register_getter(first_object_getter);
        let root = heap.alloc_plain();
        heap.define_property(
            root,
            str_key("computed"),
            PropertyDescriptor::Accessor {
                get: Some(getter.clone()),
                set: None,
                enumerable: true,
                configurable: true,
            },
        )
        .unwrap();
        assert_eq!(
            heap.get_property(root, &str_key("computed")).unwrap(),
            JsValue::Object(computed)
        );

        let report = deep_freeze(&mut heap, &JsValue::Object(root));
        let d = heap
            .get_own_property_descriptor(root, &str_key("computed"))
            .unwrap()
            .unwrap();
        assert!(d.is_accessor());
        assert!(!d.is_configurable());
        assert_eq!(d.reachable_values(), vec![getter]);
        assert_eq!(report.nodes_frozen, 1);
        assert!(heap.is_extensible(computed).unwrap());
    }

    #[test]
    fn host_refusal_is_skipped_and_reported() {
        let mut heap = ObjectHeap::new();
        let root = obj_with(&mut heap, &[("plain", int_val(1))]);
        heap.host_write(root, str_key("live"), int_val(2)).unwrap();
        heap.mark_host_managed(root, str_key("live")).unwrap();

        let mut freezer = GraphFreezer::new(FreezeConfig::default(), "trace-host");
        let report = freezer.deep_freeze(&mut heap, &JsValue::Object(root));
        assert_eq!(report.host_refusals, 1);
        assert_eq!(report.descriptors_rewritten, 1);
        assert!(!heap.is_extensible(root).unwrap());

        let events = freezer.drain_events();
        let refused: Vec<_> = events.iter().filter(|e| e.event == "host_refused").collect();
        assert_eq!(refused.len(), 1);
        assert_eq!(refused[0].subject, "object#0.live");
        assert_eq!(refused[0].error_code.as_deref(), Some(HOST_REFUSED_CODE));
    }

    #[test]
    fn dangling_reference_is_counted() {
        let mut heap = ObjectHeap::new();
        let root = obj_with(&mut heap, &[("ghost", JsValue::Object(ObjectHandle(77)))]);
        let report = deep_freeze(&mut heap, &JsValue::Object(root));
        assert_eq!(report.dangling_references, 1);
        assert_eq!(report.nodes_frozen, 1);
    }

    #[test]
    fn prototypes_followed_only_when_configured() {
        let mut heap = ObjectHeap::new();
        let proto = obj_with(&mut heap, &[("method", JsValue::Function(0))]);
        let root = heap.alloc(Some(proto));

        deep_freeze(&mut heap, &JsValue::Object(root));
        assert!(heap.is_extensible(proto).unwrap());

        let config = FreezeConfig {
            follow_prototypes: true,
            max_nodes: None,
        };
        GraphFreezer::new(config, "t").deep_freeze(&mut heap, &JsValue::Object(root));
        assert!(heap.is_frozen(proto).unwrap());
    }

    #[test]
    fn node_limit_truncates() {
        let mut heap = ObjectHeap::new();
        let c = heap.alloc_plain();
        let b = obj_with(&mut heap, &[("c", JsValue::Object(c))]);
        let a = obj_with(&mut heap, &[("b", JsValue::Object(b))]);
        let config = FreezeConfig {
            follow_prototypes: false,
            max_nodes: Some(2),
        };
        let report = GraphFreezer::new(config, "t").deep_freeze(&mut heap, &JsValue::Object(a));
        assert!(report.truncated);
        assert_eq!(report.nodes_frozen, 2);
        assert!(heap.is_extensible(c).unwrap());
    }

    #[test]
    fn second_pass_is_idempotent() {
        let mut heap = ObjectHeap::new();
        let inner = obj_with(&mut heap, &[("b", int_val(1))]);
        let root = obj_with(&mut heap, &[("a", JsValue::Object(inner))]);
        let root_val = JsValue::Object(root);

        deep_freeze(&mut heap, &root_val);
        let first = descriptor_digest(&heap, &root_val, false);
        let second_report = deep_freeze(&mut heap, &root_val);
        assert_eq!(second_report.descriptors_rewritten, 0);
        assert_eq!(second_report.descriptors_already_locked, 2);
        assert_eq!(descriptor_digest(&heap, &root_val, false), first);
    }

    #[test]
    fn audit_reports_unlocked_members() {
        let mut heap = ObjectHeap::new();
        let root = obj_with(&mut heap, &[("x", int_val(1))]);
        let audit = audit_deep_freeze(&heap, &JsValue::Object(root), false);
        assert!(!audit.is_clean());
        assert_eq!(audit.extensible, vec![root]);
        assert_eq!(audit.unlocked, vec![(root, str_key("x"))]);
    }

    #[test]
    fn report_merge_accumulates() {
        let mut total = FreezeReport::default();
        total.merge(&FreezeReport {
            nodes_frozen: 2,
            host_refusals: 1,
            ..FreezeReport::default()
        });
        total.merge(&FreezeReport {
            nodes_frozen: 1,
            truncated: true,
            ..FreezeReport::default()
        });
        assert_eq!(total.nodes_frozen, 3);
        assert_eq!(total.host_refusals, 1);
        assert!(total.truncated);
    }
}
