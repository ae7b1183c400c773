//! Runtime context
//!
//! One [`UdonRuntime`] is shared by every behaviour of a host. It constructs
//! VMs, owns the extern registry, tracks which behaviour is currently
//! executing, and holds the network relay hook. Behaviours keep an `Rc` to
//! the runtime; the runtime only keeps weak handles back to them.

use crate::behaviour::UdonBehaviour;
use crate::options::RuntimeOptions;
use crate::vm::{Extern, ExternCall, ExternError, ExternRegistry, UdonVm};
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, info};

/// Identifier of a behaviour within one runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BehaviourId(u64);

impl BehaviourId {
    /// Wrap a raw id, as stored in a behaviour object handle
    pub fn from_u64(id: u64) -> Self {
        BehaviourId(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BehaviourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who receives a relayed network event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEventTarget {
    /// Every instance, including the local one
    All,
    /// Only the instance owned by the object's owner
    Owner,
}

impl NetworkEventTarget {
    /// Decode the value programs pass to `SendCustomNetworkEvent`
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(NetworkEventTarget::All),
            1 => Some(NetworkEventTarget::Owner),
            _ => None,
        }
    }
}

/// A request to run an event on remote instances of the same program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEventRequest {
    /// Name of the sending program
    pub program_name: String,
    /// Content hash identifying the program topology
    pub content_hash: String,
    /// Sending behaviour
    pub sender: BehaviourId,
    /// Receivers
    pub target: NetworkEventTarget,
    /// Event to run
    pub event_name: String,
}

/// Transport hook for network events
pub trait NetworkRelay {
    /// Deliver `request` to remote instances
    fn relay(&self, request: &NetworkEventRequest);
}

/// Shared runtime state for a set of behaviours
pub struct UdonRuntime {
    options: RuntimeOptions,
    externs: RefCell<ExternRegistry>,
    behaviours: RefCell<FxHashMap<BehaviourId, Weak<UdonBehaviour>>>,
    current: Cell<Option<BehaviourId>>,
    nesting: Cell<usize>,
    relay: RefCell<Option<Rc<dyn NetworkRelay>>>,
    next_id: Cell<u64>,
}

impl UdonRuntime {
    /// Create a runtime with the built-in externs registered
    pub fn new(options: RuntimeOptions) -> Rc<Self> {
        info!(
            instruction_set = %options.instruction_set_id,
            version = %options.instruction_set_version,
            "udon runtime created"
        );
        Rc::new(Self {
            options,
            externs: RefCell::new(ExternRegistry::with_builtins()),
            behaviours: RefCell::new(FxHashMap::default()),
            current: Cell::new(None),
            nesting: Cell::new(0),
            relay: RefCell::new(None),
            next_id: Cell::new(1),
        })
    }

    /// Options every constructed VM receives
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Construct a VM configured by this runtime
    pub fn construct_vm(&self) -> Rc<UdonVm> {
        Rc::new(UdonVm::new(self.options.clone()))
    }

    /// Register (or replace) an extern
    pub fn register_extern<F>(&self, signature: impl Into<String>, arity: usize, func: F)
    where
        F: Fn(&ExternCall<'_>) -> Result<(), ExternError> + 'static,
    {
        self.externs.borrow_mut().register(signature, arity, func);
    }

    /// Look up an extern; the registry is not borrowed while it runs
    pub fn extern_for(&self, signature: &str) -> Option<Extern> {
        self.externs.borrow().get(signature).cloned()
    }

    /// Install the network transport
    pub fn set_network_relay(&self, relay: Rc<dyn NetworkRelay>) {
        *self.relay.borrow_mut() = Some(relay);
    }

    /// Installed network transport
    pub fn network_relay(&self) -> Option<Rc<dyn NetworkRelay>> {
        self.relay.borrow().clone()
    }

    /// Behaviour whose code is running right now
    pub fn current_behaviour(&self) -> Option<BehaviourId> {
        self.current.get()
    }

    /// Swap the currently executing behaviour, returning the previous one
    pub(crate) fn enter_behaviour(&self, id: Option<BehaviourId>) -> Option<BehaviourId> {
        self.current.replace(id)
    }

    /// Number of entry point runs currently on the call stack
    pub fn nesting_depth(&self) -> usize {
        self.nesting.get()
    }

    /// Claim one nesting level, failing once `max_nesting_depth` is reached
    pub(crate) fn enter_nested(&self) -> VmResult<()> {
        let depth = self.nesting.get();
        if depth >= self.options.max_nesting_depth {
            return Err(VmError::RecursionLimit(self.options.max_nesting_depth));
        }
        self.nesting.set(depth + 1);
        Ok(())
    }

    pub(crate) fn exit_nested(&self) {
        self.nesting.set(self.nesting.get().saturating_sub(1));
    }

    /// Live behaviour by id
    pub fn behaviour(&self, id: BehaviourId) -> Option<Rc<UdonBehaviour>> {
        self.behaviours.borrow().get(&id).and_then(Weak::upgrade)
    }

    /// Number of registered behaviours
    pub fn behaviour_count(&self) -> usize {
        self.behaviours.borrow().len()
    }

    pub(crate) fn register_behaviour(&self, behaviour: &Rc<UdonBehaviour>) {
        self.behaviours
            .borrow_mut()
            .insert(behaviour.id(), Rc::downgrade(behaviour));
    }

    pub(crate) fn allocate_id(&self) -> BehaviourId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        BehaviourId(id)
    }

    pub(crate) fn unregister_behaviour(&self, id: BehaviourId) {
        self.behaviours.borrow_mut().remove(&id);
    }

    /// Drop every behaviour handle and the relay
    pub fn shutdown(&self) {
        let count = self.behaviours.borrow().len();
        self.behaviours.borrow_mut().clear();
        *self.relay.borrow_mut() = None;
        self.current.set(None);
        info!(behaviours = count, "udon runtime shut down");
    }
}

impl Drop for UdonRuntime {
    fn drop(&mut self) {
        debug!("udon runtime dropped");
    }
}
