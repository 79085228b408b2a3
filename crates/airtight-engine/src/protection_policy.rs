//! Applies the enforcement engine to a fixed set of named host roots.
//!
//! A [`ProtectedRootSet`] lists host binding names with their treatment:
//! `Freeze` roots are deep-frozen in place, `Guard` roots have their binding
//! slot in [`HostBindings`] replaced by a [`GuardedHandle`]. Names on the
//! exemption list (network request interfaces by default) can never enter a
//! root set, so they stay fully mutable.
//!
//! The root set is validated once when it is built and exposes no mutating
//! API afterwards. [`PolicyRunner::apply`] resolves every root before touching
//! anything, so an unbound name aborts the pass without partial effects.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::graph_freezer::{
    FreezeConfig, FreezeReport, GraphFreezer, descriptor_digest, reachable_objects,
};
use crate::mutation_guard::{GuardedHandle, GuardedValue, guard, guard_value};
use crate::object_model::{JsValue, ObjectHandle, ObjectHeap, OrdinaryObject};
use crate::protection_event::{EventLog, ProtectionEvent};

const COMPONENT: &str = "protection_policy";

/// Error code attached to the event for an exempt object changed by a pass.
pub const EXEMPT_ALTERED_CODE: &str = "FE-POLICY-0007";

/// Status line recorded when a pass completes.
pub const STATUS_LINE: &str = "all host interfaces except network are now airtight";

/// Network request interfaces left untouched by default.
pub const DEFAULT_NETWORK_EXEMPTIONS: &[&str] = &[
    "fetch",
    "XMLHttpRequest",
    "Request",
    "Response",
    "Headers",
    "HTMLImageElement",
    "HTMLScriptElement",
    "HTMLLinkElement",
];

// ---------------------------------------------------------------------------
// PolicyError
// ---------------------------------------------------------------------------

/// Errors from building or applying a protection policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("root '{name}' has no host binding")]
    UnboundRoot { name: String },
    #[error("root '{name}' listed more than once")]
    DuplicateRoot { name: String },
    #[error("root '{name}' is exempt and cannot be protected")]
    ExemptRootListed { name: String },
    #[error("root '{name}' is already guarded and cannot be frozen")]
    TreatmentConflict { name: String },
    #[error("invalid protection config: {reason}")]
    InvalidConfig { reason: String },
    #[error("freeze root '{root}' reaches exempt binding '{exempt}'")]
    ExemptReachable { root: String, exempt: String },
}

impl PolicyError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnboundRoot { .. } => "FE-POLICY-0001",
            Self::DuplicateRoot { .. } => "FE-POLICY-0002",
            Self::ExemptRootListed { .. } => "FE-POLICY-0003",
            Self::TreatmentConflict { .. } => "FE-POLICY-0004",
            Self::InvalidConfig { .. } => "FE-POLICY-0005",
            Self::ExemptReachable { .. } => "FE-POLICY-0006",
        }
    }
}

// ---------------------------------------------------------------------------
// ProtectionConfig
// ---------------------------------------------------------------------------

/// Configuration for a protection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub trace_id: String,
    /// Binding names that must never be frozen or guarded.
    pub exempt_names: BTreeSet<String>,
    pub freeze: FreezeConfig,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            trace_id: "airtight".to_string(),
            exempt_names: DEFAULT_NETWORK_EXEMPTIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            freeze: FreezeConfig::default(),
        }
    }
}

impl ProtectionConfig {
    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let config: Self = serde_json::from_str(json).map_err(|e| PolicyError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.trace_id.trim().is_empty() {
            return Err(PolicyError::InvalidConfig {
                reason: "trace_id must not be empty".to_string(),
            });
        }
        if self.freeze.max_nodes == Some(0) {
            return Err(PolicyError::InvalidConfig {
                reason: "freeze.max_nodes must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_exempt(&self, name: &str) -> bool {
        self.exempt_names.contains(name)
    }
}

// ---------------------------------------------------------------------------
// ProtectedRootSet
// ---------------------------------------------------------------------------

/// Enforcement strategy for one root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    /// Deep-freeze the referenced graph in place.
    Freeze,
    /// Keep the binding live and replace it with a guarded handle.
    Guard,
}

/// One named root and its treatment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSpec {
    pub name: String,
    pub treatment: Treatment,
}

impl RootSpec {
    pub fn new(name: &str, treatment: Treatment) -> Self {
        Self {
            name: name.to_string(),
            treatment,
        }
    }
}

/// Validated, immutable list of protected roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedRootSet {
    roots: Vec<RootSpec>,
}

impl ProtectedRootSet {
    /// Validate `roots` against `config`: no duplicates, no exempt names.
    pub fn new(roots: Vec<RootSpec>, config: &ProtectionConfig) -> Result<Self, PolicyError> {
        let mut seen = BTreeSet::new();
        for root in &roots {
            if config.is_exempt(&root.name) {
                return Err(PolicyError::ExemptRootListed {
                    name: root.name.clone(),
                });
            }
            if !seen.insert(root.name.as_str()) {
                return Err(PolicyError::DuplicateRoot {
                    name: root.name.clone(),
                });
            }
        }
        Ok(Self { roots })
    }

    pub fn builder() -> ProtectedRootSetBuilder {
        ProtectedRootSetBuilder::default()
    }

    pub fn roots(&self) -> &[RootSpec] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn treatment_of(&self, name: &str) -> Option<Treatment> {
        self.roots
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.treatment)
    }
}

/// Accumulates roots before validation.
#[derive(Debug, Clone, Default)]
pub struct ProtectedRootSetBuilder {
    roots: Vec<RootSpec>,
}

impl ProtectedRootSetBuilder {
    pub fn freeze(mut self, name: &str) -> Self {
        self.roots.push(RootSpec::new(name, Treatment::Freeze));
        self
    }

    pub fn guard(mut self, name: &str) -> Self {
        self.roots.push(RootSpec::new(name, Treatment::Guard));
        self
    }

    pub fn build(self, config: &ProtectionConfig) -> Result<ProtectedRootSet, PolicyError> {
        ProtectedRootSet::new(self.roots, config)
    }
}

// ---------------------------------------------------------------------------
// HostBindings
// ---------------------------------------------------------------------------

/// Content of one host binding slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binding {
    Value(JsValue),
    Guarded(GuardedHandle),
}

/// Live, name-addressed binding slots the host re-reads on every access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBindings {
    slots: BTreeMap<String, Binding>,
    #[serde(default)]
    guarded: BTreeSet<String>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind or rebind `name`. A slot under guard stays under guard: a new
    /// object is wrapped before it is installed.
    pub fn bind(&mut self, name: &str, value: JsValue) {
        let binding = match value {
            JsValue::Object(handle) if self.guarded.contains(name) => {
                Binding::Guarded(guard(handle))
            }
            value => Binding::Value(value),
        };
        self.slots.insert(name.to_string(), binding);
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.slots.get(name)
    }

    /// The guard installed in `name`, if the slot is under guard.
    pub fn guarded_handle(&self, name: &str) -> Option<GuardedHandle> {
        match self.slots.get(name) {
            Some(Binding::Guarded(h)) => Some(*h),
            _ => None,
        }
    }

    /// Raw value of an unguarded slot.
    pub fn raw(&self, name: &str) -> Option<&JsValue> {
        match self.slots.get(name) {
            Some(Binding::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn is_guarded(&self, name: &str) -> bool {
        self.guarded.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    fn install_guard(&mut self, name: &str, handle: GuardedHandle) {
        self.slots.insert(name.to_string(), Binding::Guarded(handle));
        self.guarded.insert(name.to_string());
    }
}

// ---------------------------------------------------------------------------
// ProtectionReport
// ---------------------------------------------------------------------------

/// What happened to a single root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootOutcome {
    Frozen {
        report: FreezeReport,
        descriptor_digest: String,
    },
    Guarded,
    AlreadyGuarded,
    /// The binding held a primitive; nothing to protect.
    Primitive,
}

/// Per-root record in a [`ProtectionReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    pub name: String,
    pub treatment: Treatment,
    pub outcome: RootOutcome,
}

/// Result of one protection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionReport {
    pub trace_id: String,
    pub roots: Vec<RootRecord>,
    pub freeze_totals: FreezeReport,
    /// Exempt names present in the bindings, left untouched.
    pub exempt_untouched: Vec<String>,
    pub events: Vec<ProtectionEvent>,
}

impl ProtectionReport {
    pub fn frozen_count(&self) -> usize {
        self.roots
            .iter()
            .filter(|r| matches!(r.outcome, RootOutcome::Frozen { .. }))
            .count()
    }

    pub fn guarded_count(&self) -> usize {
        self.roots
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    RootOutcome::Guarded | RootOutcome::AlreadyGuarded
                )
            })
            .count()
    }

    /// One-line human summary of the pass.
    pub fn summary_line(&self) -> String {
        format!(
            "{STATUS_LINE} ({} frozen, {} guarded, {} exempt, {} host refusals)",
            self.frozen_count(),
            self.guarded_count(),
            self.exempt_untouched.len(),
            self.freeze_totals.host_refusals,
        )
    }
}

// ---------------------------------------------------------------------------
// PolicyRunner
// ---------------------------------------------------------------------------

/// A root resolved against its binding slot.
#[derive(Debug)]
enum PlannedRoot<'r> {
    Freeze(&'r RootSpec, JsValue),
    Guard(&'r RootSpec, JsValue),
    AlreadyGuarded(&'r RootSpec),
}

/// Object state of every exempt binding before a pass.
type ExemptSnapshot = BTreeMap<String, Option<(ObjectHandle, OrdinaryObject)>>;

fn exempt_snapshot(
    heap: &ObjectHeap,
    bindings: &HostBindings,
    config: &ProtectionConfig,
) -> ExemptSnapshot {
    bindings
        .names()
        .filter(|name| config.is_exempt(name))
        .map(|name| {
            let state = match bindings.raw(name) {
                Some(JsValue::Object(handle)) => {
                    heap.get(*handle).ok().map(|object| (*handle, object.clone()))
                }
                _ => None,
            };
            (name.to_string(), state)
        })
        .collect()
}

/// Applies a root set to a heap and its bindings.
#[derive(Debug, Clone)]
pub struct PolicyRunner {
    config: ProtectionConfig,
    log: EventLog,
}

impl PolicyRunner {
    pub fn new(config: ProtectionConfig) -> Result<Self, PolicyError> {
        config.validate()?;
        Ok(Self {
            config,
            log: EventLog::new(),
        })
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Protect every root. Must run before untrusted code sees `heap`.
    pub fn apply(
        &mut self,
        heap: &mut ObjectHeap,
        bindings: &mut HostBindings,
        roots: &ProtectedRootSet,
    ) -> Result<ProtectionReport, PolicyError> {
        let trace_id = self.config.trace_id.clone();
        let plan = match self.preflight(heap, bindings, roots) {
            Ok(plan) => plan,
            Err(error) => {
                self.log.fail(
                    &trace_id,
                    COMPONENT,
                    "preflight_rejected",
                    &error.to_string(),
                    error.error_code(),
                );
                return Err(error);
            }
        };
        let exempt_before = exempt_snapshot(heap, bindings, &self.config);

        let mut freezer = GraphFreezer::new(self.config.freeze.clone(), &trace_id);
        let mut records = Vec::with_capacity(plan.len());
        let mut freeze_totals = FreezeReport::default();

        for step in plan {
            let (entry, outcome) = match step {
                PlannedRoot::Freeze(entry, value) if value.is_object() => {
                    let report = freezer.deep_freeze(heap, &value);
                    freeze_totals.merge(&report);
                    let digest =
                        descriptor_digest(heap, &value, self.config.freeze.follow_prototypes);
                    self.log.absorb(freezer.log_mut());
                    self.log.pass(&trace_id, COMPONENT, "root_frozen", &entry.name);
                    let outcome = RootOutcome::Frozen {
                        report,
                        descriptor_digest: digest,
                    };
                    (entry, outcome)
                }
                PlannedRoot::Guard(entry, value) => match guard_value(value) {
                    GuardedValue::Structured(handle) => {
                        bindings.install_guard(&entry.name, handle);
                        self.log.pass(&trace_id, COMPONENT, "root_guarded", &entry.name);
                        (entry, RootOutcome::Guarded)
                    }
                    GuardedValue::Primitive(_) => {
                        self.log.pass(&trace_id, COMPONENT, "primitive_root", &entry.name);
                        (entry, RootOutcome::Primitive)
                    }
                },
                PlannedRoot::Freeze(entry, _) => {
                    self.log.pass(&trace_id, COMPONENT, "primitive_root", &entry.name);
                    (entry, RootOutcome::Primitive)
                }
                PlannedRoot::AlreadyGuarded(entry) => {
                    self.log
                        .pass(&trace_id, COMPONENT, "already_guarded", &entry.name);
                    (entry, RootOutcome::AlreadyGuarded)
                }
            };
            records.push(RootRecord {
                name: entry.name.clone(),
                treatment: entry.treatment,
                outcome,
            });
        }

        let exempt_untouched = self.untouched_exempt_names(heap, exempt_before);
        self.log
            .pass(&trace_id, COMPONENT, "protection_complete", STATUS_LINE);

        Ok(ProtectionReport {
            trace_id,
            roots: records,
            freeze_totals,
            exempt_untouched,
            events: self.log.drain_events(),
        })
    }

    /// Event counters across every pass of this runner.
    pub fn event_counts(&self) -> &BTreeMap<String, u64> {
        self.log.event_counts()
    }

    /// Resolve every root before anything is touched. Rejects exempt or
    /// unbound names, freezing a guarded slot, and freeze roots whose graph
    /// reaches an exempt object.
    fn preflight<'r>(
        &self,
        heap: &ObjectHeap,
        bindings: &HostBindings,
        roots: &'r ProtectedRootSet,
    ) -> Result<Vec<PlannedRoot<'r>>, PolicyError> {
        let mut plan = Vec::with_capacity(roots.len());
        for entry in roots.roots() {
            if self.config.is_exempt(&entry.name) {
                return Err(PolicyError::ExemptRootListed {
                    name: entry.name.clone(),
                });
            }
            let step = match (entry.treatment, bindings.lookup(&entry.name)) {
                (_, None) => {
                    return Err(PolicyError::UnboundRoot {
                        name: entry.name.clone(),
                    });
                }
                (Treatment::Freeze, Some(Binding::Guarded(_))) => {
                    return Err(PolicyError::TreatmentConflict {
                        name: entry.name.clone(),
                    });
                }
                (Treatment::Freeze, Some(Binding::Value(value))) => {
                    PlannedRoot::Freeze(entry, value.clone())
                }
                (Treatment::Guard, Some(Binding::Value(value))) => {
                    PlannedRoot::Guard(entry, value.clone())
                }
                (Treatment::Guard, Some(Binding::Guarded(_))) => {
                    PlannedRoot::AlreadyGuarded(entry)
                }
            };
            plan.push(step);
        }

        let exempt_objects: Vec<(&str, ObjectHandle)> = bindings
            .names()
            .filter(|name| self.config.is_exempt(name))
            .filter_map(|name| match bindings.raw(name) {
                Some(JsValue::Object(handle)) => Some((name, *handle)),
                _ => None,
            })
            .collect();
        if !exempt_objects.is_empty() {
            for step in &plan {
                let PlannedRoot::Freeze(entry, value) = step else {
                    continue;
                };
                let reachable =
                    reachable_objects(heap, value, self.config.freeze.follow_prototypes);
                if let Some((exempt, _)) = exempt_objects
                    .iter()
                    .find(|(_, handle)| reachable.contains(handle))
                {
                    return Err(PolicyError::ExemptReachable {
                        root: entry.name.clone(),
                        exempt: (*exempt).to_string(),
                    });
                }
            }
        }
        Ok(plan)
    }

    /// Exempt names whose object state is identical to `before`. Any other
    /// exempt name is logged as altered and left out.
    fn untouched_exempt_names(
        &mut self,
        heap: &ObjectHeap,
        before: ExemptSnapshot,
    ) -> Vec<String> {
        let trace_id = self.config.trace_id.clone();
        let mut untouched = Vec::with_capacity(before.len());
        for (name, state) in before {
            let unchanged = match &state {
                None => true,
                Some((handle, object)) => heap.get(*handle).ok() == Some(object),
            };
            if unchanged {
                self.log.pass(&trace_id, COMPONENT, "exempt_untouched", &name);
                untouched.push(name);
            } else {
                self.log.fail(
                    &trace_id,
                    COMPONENT,
                    "exempt_altered",
                    &name,
                    EXEMPT_ALTERED_CODE,
                );
            }
        }
        untouched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation_guard::{ReadAccess, WriteAccess};
    use crate::object_model::{ObjectHandle, PropertyKey};

    fn str_key(s: &str) -> PropertyKey {
        PropertyKey::String(s.to_string())
    }

    fn obj_with(heap: &mut ObjectHeap, key: &str, value: JsValue) -> ObjectHandle {
        let h = heap.alloc_plain();
        heap.set_property(h, str_key(key), value).unwrap();
        h
    }

    fn host() -> (ObjectHeap, HostBindings) {
        let mut heap = ObjectHeap::new();
        let mut bindings = HostBindings::new();
        let json = obj_with(&mut heap, "parse", JsValue::Function(0));
        let storage = obj_with(&mut heap, "length", JsValue::Int(0));
        let fetch = obj_with(&mut heap, "timeout", JsValue::Int(30));
        bindings.bind("JSON", JsValue::Object(json));
        bindings.bind("localStorage", JsValue::Object(storage));
        bindings.bind("fetch", JsValue::Object(fetch));
        (heap, bindings)
    }

    #[test]
    fn default_config_exempts_network() {
        let config = ProtectionConfig::default();
        assert!(config.is_exempt("fetch"));
        assert!(config.is_exempt("XMLHttpRequest"));
        assert!(!config.is_exempt("JSON"));
    }

    #[test]
    fn config_from_json_fills_defaults() {
        let config = ProtectionConfig::from_json(r#"{"trace_id":"t-1"}"#).unwrap();
        assert_eq!(config.trace_id, "t-1");
        assert!(config.is_exempt("fetch"));
        assert_eq!(config.freeze, FreezeConfig::default());
    }

    #[test]
    fn config_rejects_empty_trace_id() {
        let err = ProtectionConfig::from_json(r#"{"trace_id":"  "}"#).unwrap_err();
        assert_eq!(err.error_code(), "FE-POLICY-0005");
        assert!(ProtectionConfig::from_json("not json").is_err());
    }

    #[test]
    fn root_set_rejects_exempt_and_duplicate_names() {
        let config = ProtectionConfig::default();
        let err = ProtectedRootSet::builder()
            .freeze("fetch")
            .build(&config)
            .unwrap_err();
        assert_eq!(
            err,
            PolicyError::ExemptRootListed {
                name: "fetch".to_string()
            }
        );
        let err = ProtectedRootSet::builder()
            .freeze("JSON")
            .guard("JSON")
            .build(&config)
            .unwrap_err();
        assert_eq!(err.error_code(), "FE-POLICY-0002");
    }

    #[test]
    fn apply_freezes_guards_and_skips_exempt() {
        let (mut heap, mut bindings) = host();
        let config = ProtectionConfig::default();
        let roots = ProtectedRootSet::builder()
            .freeze("JSON")
            .guard("localStorage")
            .build(&config)
            .unwrap();
        let mut runner = PolicyRunner::new(config).unwrap();
        let report = runner.apply(&mut heap, &mut bindings, &roots).unwrap();

        assert_eq!(report.frozen_count(), 1);
        assert_eq!(report.guarded_count(), 1);
        assert_eq!(report.exempt_untouched, vec!["fetch".to_string()]);
        assert!(report.summary_line().starts_with(STATUS_LINE));

        let Some(JsValue::Object(json)) = bindings.raw("JSON").cloned() else {
            panic!("JSON binding should stay raw");
        };
        assert!(heap.is_frozen(json).unwrap());

        let Some(storage) = bindings.guarded_handle("localStorage") else {
            panic!("localStorage binding should be guarded");
        };
        assert!(storage.set(&mut heap, str_key("length"), JsValue::Int(9)).is_err());

        let Some(JsValue::Object(fetch)) = bindings.raw("fetch").cloned() else {
            panic!("fetch binding should stay raw");
        };
        assert!(fetch.set(&mut heap, str_key("timeout"), JsValue::Int(60)).unwrap());
        assert_eq!(fetch.get(&heap, &str_key("timeout")).unwrap(), JsValue::Int(60));
    }

    #[test]
    fn unbound_root_aborts_without_partial_effect() {
        let (mut heap, mut bindings) = host();
        let config = ProtectionConfig::default();
        let roots = ProtectedRootSet::builder()
            .freeze("JSON")
            .guard("navigator")
            .build(&config)
            .unwrap();
        let mut runner = PolicyRunner::new(config).unwrap();
        let err = runner.apply(&mut heap, &mut bindings, &roots).unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnboundRoot {
                name: "navigator".to_string()
            }
        );
        let Some(JsValue::Object(json)) = bindings.raw("JSON").cloned() else {
            panic!("JSON binding should stay raw");
        };
        assert!(heap.is_extensible(json).unwrap());
        assert_eq!(runner.event_counts().get("preflight_rejected"), Some(&1));
    }

    #[test]
    fn second_application_is_stable() {
        let (mut heap, mut bindings) = host();
        let config = ProtectionConfig::default();
        let roots = ProtectedRootSet::builder()
            .freeze("JSON")
            .guard("localStorage")
            .build(&config)
            .unwrap();
        let mut runner = PolicyRunner::new(config).unwrap();
        let first = runner.apply(&mut heap, &mut bindings, &roots).unwrap();
        let second = runner.apply(&mut heap, &mut bindings, &roots).unwrap();

        let digest = |report: &ProtectionReport| match &report.roots[0].outcome {
            RootOutcome::Frozen {
                descriptor_digest, ..
            } => descriptor_digest.clone(),
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(digest(&first), digest(&second));
        assert_eq!(second.roots[1].outcome, RootOutcome::AlreadyGuarded);
        assert_eq!(second.freeze_totals.descriptors_rewritten, 0);
    }

    #[test]
    fn freeze_of_guarded_slot_is_a_conflict() {
        let (mut heap, mut bindings) = host();
        let config = ProtectionConfig::default();
        let guard_roots = ProtectedRootSet::builder()
            .guard("localStorage")
            .build(&config)
            .unwrap();
        let freeze_roots = ProtectedRootSet::builder()
            .freeze("localStorage")
            .build(&config)
            .unwrap();
        let mut runner = PolicyRunner::new(config).unwrap();
        runner.apply(&mut heap, &mut bindings, &guard_roots).unwrap();
        let err = runner
            .apply(&mut heap, &mut bindings, &freeze_roots)
            .unwrap_err();
        assert_eq!(err.error_code(), "FE-POLICY-0004");
    }

    #[test]
    fn rebinding_a_guarded_slot_keeps_it_guarded() {
        let (mut heap, mut bindings) = host();
        let config = ProtectionConfig::default();
        let roots = ProtectedRootSet::builder()
            .guard("localStorage")
            .build(&config)
            .unwrap();
        PolicyRunner::new(config)
            .unwrap()
            .apply(&mut heap, &mut bindings, &roots)
            .unwrap();

        let fresh = obj_with(&mut heap, "length", JsValue::Int(1));
        bindings.bind("localStorage", JsValue::Object(fresh));
        assert!(bindings.is_guarded("localStorage"));
        let Some(h) = bindings.guarded_handle("localStorage") else {
            panic!("rebound slot should stay guarded");
        };
        assert!(h.guards(fresh));
        assert_eq!(bindings.raw("localStorage"), None);
        assert!(h.set(&mut heap, str_key("length"), JsValue::Int(2)).is_err());

        // Unguarded slots still take raw values.
        let other = obj_with(&mut heap, "timeout", JsValue::Int(5));
        bindings.bind("fetch", JsValue::Object(other));
        assert_eq!(bindings.raw("fetch"), Some(&JsValue::Object(other)));
        assert_eq!(bindings.guarded_handle("fetch"), None);
    }

    #[test]
    fn freeze_root_reaching_exempt_object_is_rejected() {
        let (mut heap, mut bindings) = host();
        let Some(JsValue::Object(fetch)) = bindings.raw("fetch").cloned() else {
            panic!("fetch binding should be raw");
        };
        let window = obj_with(&mut heap, "fetch", JsValue::Object(fetch));
        bindings.bind("window", JsValue::Object(window));

        let config = ProtectionConfig::default();
        let roots = ProtectedRootSet::builder()
            .freeze("window")
            .build(&config)
            .unwrap();
        let mut runner = PolicyRunner::new(config).unwrap();
        let err = runner.apply(&mut heap, &mut bindings, &roots).unwrap_err();
        assert_eq!(
            err,
            PolicyError::ExemptReachable {
                root: "window".to_string(),
                exempt: "fetch".to_string(),
            }
        );
        assert_eq!(err.error_code(), "FE-POLICY-0006");
        assert!(heap.is_extensible(window).unwrap());
        assert!(heap.is_extensible(fetch).unwrap());
        assert!(fetch.set(&mut heap, str_key("timeout"), JsValue::Int(90)).unwrap());
    }

    #[test]
    fn exempt_object_changed_during_pass_is_not_reported_untouched() {
        let (mut heap, bindings) = host();
        let mut runner = PolicyRunner::new(ProtectionConfig::default()).unwrap();
        let before = exempt_snapshot(&heap, &bindings, runner.config());
        assert_eq!(before.len(), 1);

        let Some(JsValue::Object(fetch)) = bindings.raw("fetch").cloned() else {
            panic!("fetch binding should be raw");
        };
        heap.prevent_extensions(fetch).unwrap();
        let untouched = runner.untouched_exempt_names(&heap, before);
        assert!(untouched.is_empty());
        assert_eq!(runner.event_counts().get("exempt_altered"), Some(&1));
        assert_eq!(runner.event_counts().get("exempt_untouched"), None);
    }

    #[test]
    fn primitive_roots_are_recorded() {
        let mut heap = ObjectHeap::new();
        let mut bindings = HostBindings::new();
        bindings.bind("version", JsValue::Int(3));
        bindings.bind("origin", JsValue::Str("https://example.test".into()));
        let config = ProtectionConfig::default();
        let roots = ProtectedRootSet::builder()
            .freeze("version")
            .guard("origin")
            .build(&config)
            .unwrap();
        let report = PolicyRunner::new(config)
            .unwrap()
            .apply(&mut heap, &mut bindings, &roots)
            .unwrap();
        assert!(report
            .roots
            .iter()
            .all(|r| r.outcome == RootOutcome::Primitive));
        assert!(!bindings.is_guarded("origin"));
    }

    #[test]
    fn report_events_end_with_status_line() {
        let (mut heap, mut bindings) = host();
        let config = ProtectionConfig {
            trace_id: "trace-report".to_string(),
            ..ProtectionConfig::default()
        };
        let roots = ProtectedRootSet::builder().freeze("JSON").build(&config).unwrap();
        let report = PolicyRunner::new(config)
            .unwrap()
            .apply(&mut heap, &mut bindings, &roots)
            .unwrap();
        let last = report.events.last().unwrap();
        assert_eq!(last.event, "protection_complete");
        assert_eq!(last.subject, STATUS_LINE);
        assert!(report.events.iter().all(|e| e.trace_id == "trace-report"));
        assert!(report.events.iter().any(|e| e.component == "graph_freezer"));
    }
}
