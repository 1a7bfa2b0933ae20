//! Instance identity
//!
//! [`InstanceRegistry`] hands out monotonically increasing instance ids and maps them
//! to the records that handles share. It also runs the deserialization session that
//! binds handles decoded from a stream (which carry saved ids) to live objects.

use super::error::{SceneResult, SessionStateError};
use super::handle::{AnyHandle, Handle, HandleData, HandleDataPtr, RecordPtr, INVALID_INSTANCE_ID};
use bitflags::bitflags;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

slotmap::new_key_type! {
    /// Arena key of a scene node
    pub struct NodeKey;
    /// Arena key of a component
    pub struct ComponentKey;
}

/// Storage location of a live object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// Live scene node
    Node(NodeKey),
    /// Live component
    Component(ComponentKey),
}

/// Identity shared by all handles to one object
#[derive(Debug)]
pub struct InstanceRecord {
    instance_id: u64,
    object: Option<ObjectKey>,
    destroy_queued: bool,
}

impl InstanceRecord {
    /// Stable id of this object
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Live object, `None` once destroyed
    pub fn object(&self) -> Option<ObjectKey> {
        self.object
    }

    /// Destruction was requested but has not run yet
    pub fn is_destroy_queued(&self) -> bool {
        self.destroy_queued
    }

    pub(crate) fn mark_destroy_queued(&mut self) {
        self.destroy_queued = true;
    }

    pub(crate) fn clear_object(&mut self) {
        self.object = None;
    }
}

bitflags! {
    /// Options for a deserialization session
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct DeserializationFlags: u32 {
        /// Assign fresh ids to decoded objects instead of reusing saved ids
        const USE_NEW_IDS = 1 << 0;
        /// Handles to objects outside the decoded set become null
        const BREAK_EXTERNAL = 1 << 1;
        /// Handles that resolve to nothing stay pending instead of dying
        const KEEP_MISSING = 1 << 2;
    }
}

/// Callback executed when the active session ends
pub type SessionEndCallback = Box<dyn FnOnce(&mut InstanceRegistry)>;

/// Outcome of handle resolution at session end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Bound to an object decoded in the session
    pub remapped: usize,
    /// Bound to a pre-existing live object
    pub external: usize,
    /// Left pending
    pub pending: usize,
    /// Made null
    pub broken: usize,
}

/// Ids decoded from a payload nested in the active session
///
/// Payload ids are either saved ids of objects the payload itself creates or ids of
/// live objects. They never mix with the saved ids of the enclosing stream.
#[derive(Default)]
struct PayloadScope {
    remapped_ids: HashMap<u64, u64>,
    shared: HashMap<u64, HandleDataPtr>,
    unresolved: Vec<HandleDataPtr>,
}

#[derive(Default)]
struct DeserializationSession {
    flags: DeserializationFlags,
    /// Saved id -> new id of objects decoded in this session
    remapped_ids: HashMap<u64, u64>,
    /// One shared handle data per saved id
    shared: HashMap<u64, HandleDataPtr>,
    unresolved: Vec<HandleDataPtr>,
    scope: Option<PayloadScope>,
    on_end: Vec<SessionEndCallback>,
}

/// Process-wide directory of live objects
pub struct InstanceRegistry {
    next_id: u64,
    objects: HashMap<u64, RecordPtr>,
    session: Option<DeserializationSession>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    /// Empty registry with no session
    pub fn new() -> Self {
        Self {
            next_id: 1,
            objects: HashMap::new(),
            session: None,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_record(&mut self, instance_id: u64, object: ObjectKey) -> RecordPtr {
        let record = Rc::new(RefCell::new(InstanceRecord {
            instance_id,
            object: Some(object),
            destroy_queued: false,
        }));
        self.objects.insert(instance_id, record.clone());
        record
    }

    /// Register a new object under a fresh id
    pub(crate) fn register<T: ?Sized>(&mut self, object: ObjectKey) -> Handle<T> {
        let id = self.allocate_id();
        Handle::from_data(HandleData::bound(self.insert_record(id, object)))
    }

    /// Remove an object from the id map
    ///
    /// The record itself lives on in any handle still holding it.
    pub(crate) fn unregister<T: ?Sized>(&mut self, handle: &Handle<T>) {
        if let Some(record) = handle.record() {
            let id = record.borrow().instance_id();
            if self.objects.get(&id).is_some_and(|current| Rc::ptr_eq(current, &record)) {
                self.objects.remove(&id);
            }
            record.borrow_mut().clear_object();
        }
    }

    /// Handle to a live object by id
    pub fn lookup(&self, instance_id: u64) -> Option<AnyHandle> {
        self.objects
            .get(&instance_id)
            .map(|record| Handle::from_data(HandleData::bound(record.clone())))
    }

    /// Whether an object with `instance_id` is live
    pub fn exists(&self, instance_id: u64) -> bool {
        self.objects.contains_key(&instance_id)
    }

    /// Number of live registered objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no objects are registered
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Point `self_handle`'s data at an existing record
    ///
    /// Used when a rebuilt object takes over the identity of the object it replaces.
    /// The record the handle held before is retired.
    pub(crate) fn adopt_record<T: ?Sized>(&mut self, self_handle: &Handle<T>, record: RecordPtr, object: ObjectKey) {
        if let Some(current) = self_handle.record() {
            if Rc::ptr_eq(&current, &record) {
                return;
            }
            let id = current.borrow().instance_id();
            if self.objects.get(&id).is_some_and(|r| Rc::ptr_eq(r, &current)) {
                self.objects.remove(&id);
            }
            current.borrow_mut().clear_object();
        }

        {
            let mut adopted = record.borrow_mut();
            adopted.object = Some(object);
            adopted.destroy_queued = false;
        }
        let id = record.borrow().instance_id();
        self.objects.insert(id, record.clone());

        let mut data = self_handle.data.borrow_mut();
        data.record = Some(record);
        data.pending_id = INVALID_INSTANCE_ID;
    }

    // ---- deserialization session ----

    /// Whether a deserialization session is open
    pub fn is_session_active(&self) -> bool {
        self.session.is_some()
    }

    /// Flags of the active session
    pub fn session_flags(&self) -> Option<DeserializationFlags> {
        self.session.as_ref().map(|s| s.flags)
    }

    /// Open a session; saved ids decoded until [`InstanceRegistry::end_deserialization`] share one map
    pub fn begin_deserialization(&mut self, flags: DeserializationFlags) -> Result<(), SessionStateError> {
        if self.session.is_some() {
            return Err(SessionStateError::AlreadyActive);
        }
        log::trace!("Deserialization session started with {:?}", flags);
        self.session = Some(DeserializationSession {
            flags,
            ..Default::default()
        });
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut DeserializationSession, SessionStateError> {
        self.session.as_mut().ok_or(SessionStateError::NotActive)
    }

    /// Record that the object saved as `saved_id` now lives under `new_id`
    pub fn register_deserialized_id(&mut self, saved_id: u64, new_id: u64) -> Result<(), SessionStateError> {
        self.session_mut()?.remapped_ids.insert(saved_id, new_id);
        Ok(())
    }

    /// Queue a handle for resolution at session end
    pub fn register_unresolved_handle<T: ?Sized>(&mut self, handle: &Handle<T>) -> Result<(), SessionStateError> {
        let session = self.session_mut()?;
        session.unresolved.push(handle.data.clone());
        Ok(())
    }

    /// Register a callback run once the active session has resolved its handles
    pub fn register_session_end_callback(&mut self, callback: SessionEndCallback) -> Result<(), SessionStateError> {
        self.session_mut()?.on_end.push(callback);
        Ok(())
    }

    /// Register an object being decoded
    ///
    /// Returns its self handle, which shares data with every handle decoded for the
    /// same saved id in this session.
    pub(crate) fn register_deserialized<T: ?Sized>(&mut self, saved_id: u64, object: ObjectKey) -> SceneResult<Handle<T>> {
        let session = self.session_mut()?;
        let fresh = session.flags.contains(DeserializationFlags::USE_NEW_IDS) || session.scope.is_some();

        let reuse_saved = !fresh && saved_id != INVALID_INSTANCE_ID && !self.objects.contains_key(&saved_id);
        let id = if reuse_saved {
            self.next_id = self.next_id.max(saved_id + 1);
            saved_id
        } else {
            self.allocate_id()
        };
        let record = self.insert_record(id, object);

        if saved_id == INVALID_INSTANCE_ID {
            return Ok(Handle::from_data(HandleData::bound(record)));
        }

        let session = self.session_mut()?;
        let (remapped_ids, shared) = match session.scope.as_mut() {
            Some(scope) => (&mut scope.remapped_ids, &mut scope.shared),
            None => (&mut session.remapped_ids, &mut session.shared),
        };
        remapped_ids.insert(saved_id, id);
        let data = shared
            .entry(saved_id)
            .or_insert_with(|| HandleData::pending(saved_id))
            .clone();
        {
            let mut data = data.borrow_mut();
            data.record = Some(record);
            data.pending_id = INVALID_INSTANCE_ID;
        }
        Ok(Handle::from_data(data))
    }

    /// Handle decoded from a saved id
    ///
    /// Inside a session the handle is queued and shared per saved id. Outside one the
    /// id is looked up directly; unknown ids yield a destroyed handle.
    pub(crate) fn handle_for_saved_id<T: ?Sized>(&mut self, saved_id: u64) -> Handle<T> {
        if let Some(session) = self.session.as_mut() {
            let (shared, unresolved) = match session.scope.as_mut() {
                Some(scope) => (&mut scope.shared, &mut scope.unresolved),
                None => (&mut session.shared, &mut session.unresolved),
            };
            if let Some(data) = shared.get(&saved_id) {
                return Handle::from_data(data.clone());
            }
            let data = HandleData::pending(saved_id);
            shared.insert(saved_id, data.clone());
            unresolved.push(data.clone());
            return Handle::from_data(data);
        }

        match self.objects.get(&saved_id) {
            Some(record) => Handle::from_data(HandleData::bound(record.clone())),
            None => Handle::missing(saved_id),
        }
    }

    /// Decode the following objects as a payload embedded in the active session
    ///
    /// Until [`end_payload_scope`](Self::end_payload_scope) decoded objects always get
    /// fresh ids and decoded handles are kept apart from the session's own.
    pub(crate) fn begin_payload_scope(&mut self) -> Result<(), SessionStateError> {
        let session = self.session_mut()?;
        if session.scope.is_some() {
            return Err(SessionStateError::AlreadyActive);
        }
        session.scope = Some(PayloadScope::default());
        Ok(())
    }

    /// Close the payload scope
    ///
    /// Handles to objects the payload created are bound now. Handles to live objects
    /// are bound to those objects' records when the session ends; ids that name no
    /// live object follow the session's missing-reference policy. Returns the number
    /// of handles left for the session end.
    pub(crate) fn end_payload_scope(&mut self) -> Result<usize, SessionStateError> {
        let scope = self.session_mut()?.scope.take().ok_or(SessionStateError::NotActive)?;

        let mut live = Vec::new();
        for data in scope.unresolved {
            let saved_id = {
                let data = data.borrow();
                if data.record.is_some() {
                    continue;
                }
                data.pending_id
            };
            match scope.remapped_ids.get(&saved_id).and_then(|id| self.objects.get(id)) {
                Some(record) => {
                    let mut data = data.borrow_mut();
                    data.record = Some(record.clone());
                    data.pending_id = INVALID_INSTANCE_ID;
                }
                None => {
                    let record = self.objects.get(&saved_id).cloned();
                    live.push((data, record));
                }
            }
        }

        let count = live.len();
        if count > 0 {
            self.session_mut()?.on_end.push(Box::new(move |registry: &mut InstanceRegistry| {
                let keep_missing = registry
                    .session_flags()
                    .is_some_and(|flags| flags.contains(DeserializationFlags::KEEP_MISSING));
                for (data, record) in live {
                    let mut data = data.borrow_mut();
                    match record {
                        Some(record) => {
                            data.record = Some(record);
                            data.pending_id = INVALID_INSTANCE_ID;
                        }
                        None if keep_missing => {}
                        None => {
                            log::debug!("Payload handle {} found no live object", data.pending_id);
                            data.pending_id = INVALID_INSTANCE_ID;
                        }
                    }
                }
            }));
        }
        Ok(count)
    }

    /// Resolve queued handles, run session-end callbacks and close the session
    pub fn end_deserialization(&mut self) -> Result<ResolveStats, SessionStateError> {
        let (flags, unresolved) = {
            let session = self.session_mut()?;
            (session.flags, std::mem::take(&mut session.unresolved))
        };

        let mut stats = ResolveStats::default();
        for data in unresolved {
            let saved_id = {
                let data = data.borrow();
                if data.record.is_some() {
                    stats.remapped += 1;
                    continue;
                }
                data.pending_id
            };
            let remapped = self
                .session
                .as_ref()
                .and_then(|s| s.remapped_ids.get(&saved_id).copied());
            let mut data = data.borrow_mut();

            if let Some(record) = remapped.and_then(|id| self.objects.get(&id)) {
                data.record = Some(record.clone());
                data.pending_id = INVALID_INSTANCE_ID;
                stats.remapped += 1;
            } else if flags.contains(DeserializationFlags::BREAK_EXTERNAL) {
                log::trace!("Breaking external reference to {}", saved_id);
                data.pending_id = INVALID_INSTANCE_ID;
                stats.broken += 1;
            } else if let Some(record) = self.objects.get(&saved_id) {
                data.record = Some(record.clone());
                data.pending_id = INVALID_INSTANCE_ID;
                stats.external += 1;
            } else if flags.contains(DeserializationFlags::KEEP_MISSING) {
                stats.pending += 1;
            } else {
                data.pending_id = INVALID_INSTANCE_ID;
                stats.broken += 1;
            }
        }

        let callbacks = match self.session.as_mut() {
            Some(session) => std::mem::take(&mut session.on_end),
            None => Vec::new(),
        };
        for callback in callbacks {
            callback(self);
        }

        self.session = None;
        log::trace!("Deserialization session ended: {:?}", stats);
        Ok(stats)
    }

    /// Try to bind a pending handle against the live registry
    pub fn resolve_pending<T: ?Sized>(&self, handle: &Handle<T>) -> bool {
        let mut data = handle.data.borrow_mut();
        if data.record.is_some() {
            return true;
        }
        match self.objects.get(&data.pending_id) {
            Some(record) => {
                data.record = Some(record.clone());
                data.pending_id = INVALID_INSTANCE_ID;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn node_keys() -> SlotMap<NodeKey, ()> {
        SlotMap::with_key()
    }

    #[test]
    fn test_ids_are_monotonic_and_never_zero() {
        let mut registry = InstanceRegistry::new();
        let mut keys = node_keys();
        let a: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));
        let b: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));

        assert_eq!(a.instance_id(), 1);
        assert_eq!(b.instance_id(), 2);

        registry.unregister(&a);
        assert!(!registry.exists(1));
        assert!(a.is_destroyed(false));

        let c: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));
        assert_eq!(c.instance_id(), 3);
    }

    #[test]
    fn test_lookup_shares_record() {
        let mut registry = InstanceRegistry::new();
        let mut keys = node_keys();
        let a: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));

        let found = registry.lookup(a.instance_id()).unwrap();
        registry.unregister(&a);
        assert!(found.is_destroyed(false));
        assert!(registry.lookup(a.instance_id()).is_none());
    }

    #[test]
    fn test_nested_session_is_rejected() {
        let mut registry = InstanceRegistry::new();
        registry.begin_deserialization(DeserializationFlags::empty()).unwrap();
        assert_eq!(
            registry.begin_deserialization(DeserializationFlags::USE_NEW_IDS),
            Err(SessionStateError::AlreadyActive)
        );
        registry.end_deserialization().unwrap();
        assert_eq!(registry.end_deserialization(), Err(SessionStateError::NotActive));
    }

    #[test]
    fn test_session_remaps_decoded_objects() {
        let mut registry = InstanceRegistry::new();
        let mut keys = node_keys();
        let existing: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));

        registry.begin_deserialization(DeserializationFlags::USE_NEW_IDS).unwrap();
        // Handle decoded before its target
        let early: Handle<()> = registry.handle_for_saved_id(40);
        let decoded: Handle<()> = registry
            .register_deserialized(40, ObjectKey::Node(keys.insert(())))
            .unwrap();
        let external: Handle<()> = registry.handle_for_saved_id(existing.instance_id());
        let missing: Handle<()> = registry.handle_for_saved_id(999);
        let stats = registry.end_deserialization().unwrap();

        assert_ne!(decoded.instance_id(), 40);
        assert!(early.shares_data(&decoded));
        assert_eq!(early, decoded);
        assert_eq!(external, existing);
        assert!(missing.is_null());
        assert_eq!(stats.external, 1);
        assert_eq!(stats.broken, 1);
    }

    #[test]
    fn test_break_external_and_keep_missing() {
        let mut registry = InstanceRegistry::new();
        let mut keys = node_keys();
        let existing: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));

        registry.begin_deserialization(DeserializationFlags::BREAK_EXTERNAL).unwrap();
        let external: Handle<()> = registry.handle_for_saved_id(existing.instance_id());
        registry.end_deserialization().unwrap();
        assert!(external.is_null());

        registry.begin_deserialization(DeserializationFlags::KEEP_MISSING).unwrap();
        let later: Handle<()> = registry.handle_for_saved_id(77);
        registry.end_deserialization().unwrap();
        assert!(later.is_pending());
        assert_eq!(later.instance_id(), 77);
    }

    #[test]
    fn test_saved_ids_reused_without_new_ids_flag() {
        let mut registry = InstanceRegistry::new();
        let mut keys = node_keys();

        registry.begin_deserialization(DeserializationFlags::empty()).unwrap();
        let decoded: Handle<()> = registry
            .register_deserialized(12, ObjectKey::Node(keys.insert(())))
            .unwrap();
        registry.end_deserialization().unwrap();
        assert_eq!(decoded.instance_id(), 12);

        let next: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));
        assert_eq!(next.instance_id(), 13);
    }

    #[test]
    fn test_callbacks_run_after_resolution() {
        let mut registry = InstanceRegistry::new();
        registry.begin_deserialization(DeserializationFlags::empty()).unwrap();

        let seen = Rc::new(RefCell::new(false));
        let flag = seen.clone();
        registry
            .register_session_end_callback(Box::new(move |r: &mut InstanceRegistry| {
                *flag.borrow_mut() = r.is_session_active();
            }))
            .unwrap();
        registry.end_deserialization().unwrap();

        assert!(*seen.borrow());
        assert!(!registry.is_session_active());
    }

    #[test]
    fn test_payload_ids_do_not_mix_with_stream_ids() {
        let mut registry = InstanceRegistry::new();
        let mut keys = node_keys();
        let live: Handle<()> = registry.register(ObjectKey::Node(keys.insert(())));
        let live_id = live.instance_id();

        registry.begin_deserialization(DeserializationFlags::USE_NEW_IDS).unwrap();
        registry.begin_payload_scope().unwrap();
        let to_live: Handle<()> = registry.handle_for_saved_id(live_id);
        let to_copy: Handle<()> = registry.handle_for_saved_id(30);
        let copy: Handle<()> = registry
            .register_deserialized(30, ObjectKey::Node(keys.insert(())))
            .unwrap();
        assert_eq!(registry.end_payload_scope().unwrap(), 1);
        assert_eq!(to_copy, copy);
        assert!(to_live.is_pending());

        // Stream object saved under the live object's id
        let from_stream: Handle<()> = registry
            .register_deserialized(live_id, ObjectKey::Node(keys.insert(())))
            .unwrap();
        let stream_ref: Handle<()> = registry.handle_for_saved_id(live_id);
        registry.end_deserialization().unwrap();

        assert_eq!(to_live, live);
        assert!(!to_live.shares_data(&from_stream));
        assert_eq!(stream_ref, from_stream);
        assert_ne!(from_stream.instance_id(), live_id);
    }

    #[test]
    fn test_payload_scope_needs_session() {
        let mut registry = InstanceRegistry::new();
        assert_eq!(registry.begin_payload_scope(), Err(SessionStateError::NotActive));
        registry.begin_deserialization(DeserializationFlags::empty()).unwrap();
        registry.begin_payload_scope().unwrap();
        assert_eq!(registry.begin_payload_scope(), Err(SessionStateError::AlreadyActive));
        registry.end_payload_scope().unwrap();
        assert_eq!(registry.end_payload_scope(), Err(SessionStateError::NotActive));
        registry.end_deserialization().unwrap();
    }
}
