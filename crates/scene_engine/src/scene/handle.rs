//! Shared references to scene objects
//!
//! A [`Handle`] never owns the object it points at. All handles to the same object
//! share one [`InstanceRecord`] through an `Rc`, so when the record is re-pointed at a
//! replacement object (prefab revert/update) every handle follows. Handles created
//! during a deserialization session additionally share their `HandleData`, which lets
//! the session resolve all of them at once.

use super::error::{SceneError, SceneResult};
use super::instance::{InstanceRecord, ObjectKey};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

/// Instance id reserved for "no object"
pub const INVALID_INSTANCE_ID: u64 = 0;

pub(crate) type RecordPtr = Rc<RefCell<InstanceRecord>>;
pub(crate) type HandleDataPtr = Rc<RefCell<HandleData>>;

/// State shared by every copy of a handle
#[derive(Debug)]
pub(crate) struct HandleData {
    /// Bound record; `None` while unresolved or dead
    pub(crate) record: Option<RecordPtr>,
    /// Saved id awaiting resolution, or the id of the object that was never found
    pub(crate) pending_id: u64,
}

impl HandleData {
    pub(crate) fn bound(record: RecordPtr) -> HandleDataPtr {
        Rc::new(RefCell::new(Self {
            record: Some(record),
            pending_id: INVALID_INSTANCE_ID,
        }))
    }

    pub(crate) fn pending(saved_id: u64) -> HandleDataPtr {
        Rc::new(RefCell::new(Self {
            record: None,
            pending_id: saved_id,
        }))
    }
}

/// Reference to a node or component
///
/// The type parameter only documents what the handle is expected to point at;
/// typed access goes through the scene, which checks it.
pub struct Handle<T: ?Sized> {
    pub(crate) data: HandleDataPtr,
    _marker: PhantomData<*const T>,
}

/// Handle with the target type erased
pub type AnyHandle = Handle<dyn Any>;

impl<T: ?Sized> Handle<T> {
    pub(crate) fn from_data(data: HandleDataPtr) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Handle that points at nothing
    pub fn null() -> Self {
        Self::from_data(HandleData::pending(INVALID_INSTANCE_ID))
    }

    /// Handle to an object that could not be found
    ///
    /// It keeps the id it was looked up with but is permanently destroyed.
    pub(crate) fn missing(instance_id: u64) -> Self {
        Self::from_data(HandleData::pending(instance_id))
    }

    /// Id of the target object
    ///
    /// Unresolved and missing handles report the id they were created with;
    /// null handles report [`INVALID_INSTANCE_ID`].
    pub fn instance_id(&self) -> u64 {
        let data = self.data.borrow();
        match &data.record {
            Some(record) => record.borrow().instance_id(),
            None => data.pending_id,
        }
    }

    /// Whether this is the null handle
    pub fn is_null(&self) -> bool {
        self.instance_id() == INVALID_INSTANCE_ID
    }

    /// Whether the target is gone
    ///
    /// With `include_queued`, objects whose deferred destruction was requested
    /// also count as destroyed.
    pub fn is_destroyed(&self, include_queued: bool) -> bool {
        match &self.data.borrow().record {
            Some(record) => {
                let record = record.borrow();
                record.object().is_none() || (include_queued && record.is_destroy_queued())
            }
            None => true,
        }
    }

    /// Whether the handle still waits for session resolution
    pub fn is_pending(&self) -> bool {
        let data = self.data.borrow();
        data.record.is_none() && data.pending_id != INVALID_INSTANCE_ID
    }

    /// Storage key of the target
    ///
    /// Fails with [`SceneError::DestroyedReference`] once the target is destroyed.
    pub fn object_key(&self) -> SceneResult<ObjectKey> {
        let data = self.data.borrow();
        data.record
            .as_ref()
            .and_then(|record| record.borrow().object())
            .ok_or(SceneError::DestroyedReference {
                id: match &data.record {
                    Some(record) => record.borrow().instance_id(),
                    None => data.pending_id,
                },
            })
    }

    /// Same target, different static type
    pub fn cast<U: ?Sized>(&self) -> Handle<U> {
        Handle::from_data(self.data.clone())
    }

    /// Untyped handle sharing the same target
    pub fn erase(&self) -> AnyHandle {
        self.cast()
    }

    /// Bind this handle (and every copy sharing its data) to `other`'s target
    pub(crate) fn resolve<U: ?Sized>(&self, other: &Handle<U>) {
        let record = other.record();
        let mut data = self.data.borrow_mut();
        data.record = record;
        data.pending_id = INVALID_INSTANCE_ID;
    }

    pub(crate) fn record(&self) -> Option<RecordPtr> {
        self.data.borrow().record.clone()
    }

    /// Whether both handles share the same underlying data
    pub(crate) fn shares_data<U: ?Sized>(&self, other: &Handle<U>) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::from_data(self.data.clone())
    }
}

impl<T: ?Sized> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.instance_id() == other.instance_id()
    }
}

impl<T: ?Sized> Eq for Handle<T> {}

impl<T: ?Sized> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.instance_id().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("instance_id", &self.instance_id())
            .field("destroyed", &self.is_destroyed(false))
            .finish()
    }
}
