//! Behaviour host
//!
//! An [`UdonBehaviour`] owns one program instance: its own heap, its own VM
//! and the event table derived from the program's entry points. Hosts drive
//! it through [`initialize`](UdonBehaviour::initialize) and
//! [`dispatch`](UdonBehaviour::dispatch); programs reach other behaviours
//! through externs.
//!
//! ```text
//! Unloaded → Loading → Ready ⇄ Executing
//!               │                 │
//!               ▼                 ▼
//!           Disabled           Faulted
//! ```
//!
//! `Disabled` and `Faulted` are terminal.

mod events;
mod public_vars;

pub use events::{EventCategory, EventKind, EventTable};
pub use public_vars::{
    PublicVariable, PublicVariableError, PublicVariableTable, SerializedPublicVariables,
};

use crate::context::{BehaviourId, NetworkEventRequest, NetworkEventTarget, UdonRuntime};
use crate::vm::{UdonVm, RESULT_OK};
use crate::{VmError, VmResult};
use std::cell::{Cell, OnceCell, RefCell};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use udon_bytecode::{Heap, HeapError, ObjectKind, ObjectRef, Program, TypeTag, Value};

/// Lifecycle state of a behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviourState {
    /// Created, not yet initialized
    Unloaded,
    /// Initialization in progress
    Loading,
    /// Idle and accepting events
    Ready,
    /// Running an entry point
    Executing,
    /// An entry point faulted; no further execution
    Faulted,
    /// Initialization failed; no execution
    Disabled,
}

impl BehaviourState {
    /// Whether entry points may run
    pub fn is_runnable(self) -> bool {
        matches!(self, BehaviourState::Ready | BehaviourState::Executing)
    }
}

/// Host objects a behaviour's `this` references resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostObjects {
    /// Entity hosting the behaviour
    pub game_object: ObjectRef,
    /// Spatial transform of the entity
    pub transform: ObjectRef,
}

impl HostObjects {
    /// Handles for an entity and its transform
    pub fn new(game_object: u64, transform: u64) -> Self {
        Self {
            game_object: ObjectRef::new(ObjectKind::GameObject, game_object),
            transform: ObjectRef::new(ObjectKind::Transform, transform),
        }
    }
}

/// Error type returned by initialization hooks
pub type InitHookError = Box<dyn std::error::Error>;

type InitHook = Box<dyn Fn(&UdonBehaviour) -> Result<(), InitHookError>>;

/// Initialization failures
#[derive(Debug, Error)]
pub enum LoadError {
    /// No program was assigned
    #[error("Behaviour has no program")]
    MissingProgram,

    /// `initialize` was already called
    #[error("Behaviour is already initialized")]
    AlreadyInitialized,

    /// The VM refused the program
    #[error("Program rejected: {0}")]
    Program(#[from] VmError),

    /// A `this` reference has a type the host cannot provide
    #[error("Cannot resolve this reference at {address:#x} as {type_tag}")]
    UnsupportedReference {
        /// Heap address
        address: u32,
        /// Requested type
        type_tag: TypeTag,
    },

    /// Writing a resolved reference failed
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),

    /// The host's initialization hook failed
    #[error("Initialization hook failed: {0}")]
    InitializationHook(String),
}

/// One running program instance
pub struct UdonBehaviour {
    id: BehaviourId,
    runtime: Rc<UdonRuntime>,
    host: HostObjects,
    program: Option<Rc<Program>>,
    content_hash: OnceCell<String>,
    public_variables: RefCell<PublicVariableTable>,
    vm: RefCell<Option<Rc<UdonVm>>>,
    events: RefCell<Rc<EventTable>>,
    state: Cell<BehaviourState>,
    init_hook: RefCell<Option<InitHook>>,
}

impl UdonBehaviour {
    /// Create a behaviour and register it with the runtime
    pub fn new(
        runtime: &Rc<UdonRuntime>,
        host: HostObjects,
        program: Option<Rc<Program>>,
    ) -> Rc<Self> {
        let behaviour = Rc::new(Self {
            id: runtime.allocate_id(),
            runtime: Rc::clone(runtime),
            host,
            program,
            content_hash: OnceCell::new(),
            public_variables: RefCell::new(PublicVariableTable::new()),
            vm: RefCell::new(None),
            events: RefCell::new(Rc::new(EventTable::default())),
            state: Cell::new(BehaviourState::Unloaded),
            init_hook: RefCell::new(None),
        });
        runtime.register_behaviour(&behaviour);
        behaviour
    }

    /// Identifier within the runtime
    pub fn id(&self) -> BehaviourId {
        self.id
    }

    /// Handle programs use to refer to this behaviour
    pub fn self_reference(&self) -> ObjectRef {
        ObjectRef::new(ObjectKind::UdonBehaviour, self.id.as_u64())
    }

    /// Runtime this behaviour belongs to
    pub fn runtime(&self) -> &Rc<UdonRuntime> {
        &self.runtime
    }

    /// Hosting entity and transform
    pub fn host(&self) -> HostObjects {
        self.host
    }

    /// Assigned program
    pub fn program(&self) -> Option<&Rc<Program>> {
        self.program.as_ref()
    }

    /// VM, once initialized
    pub fn vm(&self) -> Option<Rc<UdonVm>> {
        self.vm.borrow().clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> BehaviourState {
        self.state.get()
    }

    /// Event table built at initialization
    pub fn events(&self) -> Rc<EventTable> {
        self.events.borrow().clone()
    }

    /// Supply initial values for public variables; used by `initialize`
    pub fn set_public_variables(&self, table: PublicVariableTable) {
        *self.public_variables.borrow_mut() = table;
    }

    /// Public variable table, minus entries dropped during initialization
    pub fn public_variables(&self) -> PublicVariableTable {
        self.public_variables.borrow().clone()
    }

    /// Callback run once after the program loads
    pub fn set_initialization_hook<F>(&self, hook: F)
    where
        F: Fn(&UdonBehaviour) -> Result<(), InitHookError> + 'static,
    {
        *self.init_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Load the program, apply public variables, resolve `this` references
    /// and build the event table
    ///
    /// Any failure disables the behaviour and is logged once.
    #[instrument(skip(self), fields(behaviour = %self.id))]
    pub fn initialize(&self) -> Result<(), LoadError> {
        if self.state.get() != BehaviourState::Unloaded {
            return Err(LoadError::AlreadyInitialized);
        }
        self.state.set(BehaviourState::Loading);

        if let Err(error) = self.load() {
            self.state.set(BehaviourState::Disabled);
            error!(behaviour = %self.id, %error, "failed to load program");
            return Err(error);
        }
        self.state.set(BehaviourState::Ready);

        let hook = self.init_hook.borrow_mut().take();
        if let Some(hook) = hook {
            if let Err(hook_error) = hook(self) {
                let error = LoadError::InitializationHook(hook_error.to_string());
                self.disable();
                error!(behaviour = %self.id, %error, "initialization hook failed");
                return Err(error);
            }
        }

        info!(
            behaviour = %self.id,
            program = self.program.as_ref().map(|p| p.name.as_str()).unwrap_or_default(),
            "behaviour ready"
        );
        Ok(())
    }

    fn load(&self) -> Result<(), LoadError> {
        let program = self.program.clone().ok_or(LoadError::MissingProgram)?;

        let mut heap = program.heap.clone();
        self.apply_public_variables(&program, &mut heap);
        self.resolve_references(&mut heap)?;

        let vm = self.runtime.construct_vm();
        vm.load_program_with_heap(Rc::clone(&program), heap)?;

        *self.events.borrow_mut() = Rc::new(EventTable::build(&program.entry_points));
        *self.vm.borrow_mut() = Some(vm);
        Ok(())
    }

    fn apply_public_variables(&self, program: &Program, heap: &mut Heap) {
        let mut table = self.public_variables.borrow_mut();
        let mut rejected = Vec::new();

        for (name, variable) in table.iter() {
            let Some(symbol) = program.symbol_table.get(name) else {
                continue;
            };
            if !symbol.exported {
                continue;
            }
            if variable.type_tag != symbol.type_tag {
                debug!(
                    behaviour = %self.id,
                    variable = name,
                    supplied = %variable.type_tag,
                    declared = %symbol.type_tag,
                    "public variable type mismatch"
                );
                rejected.push(name.to_string());
                continue;
            }
            if let Err(error) = heap.set(symbol.address, variable.value.clone()) {
                debug!(behaviour = %self.id, variable = name, %error, "public variable rejected");
                rejected.push(name.to_string());
            }
        }

        for name in rejected {
            table.remove(&name);
        }
    }

    fn resolve_references(&self, heap: &mut Heap) -> Result<(), LoadError> {
        let pending: Vec<_> = heap.pending_references().collect();
        for (address, reference) in pending {
            let object = match reference.target() {
                TypeTag::GameObject => self.host.game_object,
                TypeTag::Transform => self.host.transform,
                TypeTag::UdonBehaviour => self.self_reference(),
                type_tag => return Err(LoadError::UnsupportedReference { address, type_tag }),
            };
            heap.set(address, Value::Object(object))?;
        }
        Ok(())
    }

    fn disable(&self) {
        self.state.set(BehaviourState::Disabled);
        *self.vm.borrow_mut() = None;
    }

    /// Run every handler registered for `event`, in declaration order
    ///
    /// A no-op for unknown events and for behaviours that are not runnable.
    pub fn dispatch(&self, event: &str) {
        if !self.state.get().is_runnable() {
            return;
        }
        let events = self.events();
        self.run_addresses(events.addresses(event));
    }

    /// Run every handler registered for a vocabulary event
    pub fn dispatch_event(&self, kind: EventKind) {
        if !self.state.get().is_runnable() {
            return;
        }
        let events = self.events();
        self.run_addresses(events.addresses_for(kind));
    }

    fn run_addresses(&self, addresses: &[u32]) {
        for &address in addresses {
            if !self.run_at_address(address) {
                break;
            }
        }
    }

    /// Run one entry point to completion
    ///
    /// The VM's program counter, operand stack depth and the runtime's
    /// current behaviour are restored on every exit path. A fault leaves the
    /// behaviour `Faulted`, including a run refused because entry points are
    /// already nested `max_nesting_depth` deep. Returns whether the run halted normally.
    pub fn run_at_address(&self, address: u32) -> bool {
        if !self.state.get().is_runnable() {
            return false;
        }
        let Some(vm) = self.vm() else {
            return false;
        };

        let result = match ExecutionScope::enter(self, &vm, address) {
            Ok(_scope) => vm.interpret(&self.runtime),
            Err(error) => Err(error),
        };

        match result {
            Ok(RESULT_OK) => true,
            Ok(code) => {
                error!(behaviour = %self.id, address, code, "execution aborted");
                self.fault(&vm);
                false
            }
            // a nested run already reported the fault
            Err(VmError::Halted) => {
                self.fault(&vm);
                false
            }
            Err(error) => {
                error!(
                    behaviour = %self.id,
                    address,
                    code = error.result_code(),
                    %error,
                    "execution fault"
                );
                self.fault(&vm);
                false
            }
        }
    }

    fn fault(&self, vm: &UdonVm) {
        vm.mark_faulted();
        self.state.set(BehaviourState::Faulted);
    }

    /// Stop the running entry point at the next instruction boundary
    pub fn request_abort(&self) {
        if let Some(vm) = self.vm() {
            vm.request_abort();
        }
    }

    /// Run the exported entry point named `event`
    ///
    /// Unlike [`dispatch`](Self::dispatch) this reaches any exported entry
    /// point, including underscore names outside the event vocabulary.
    pub fn send_custom_event(&self, event: &str) {
        if !self.state.get().is_runnable() {
            return;
        }
        let address = self
            .program
            .as_ref()
            .and_then(|program| program.entry_points.get(event))
            .filter(|entry| entry.exported)
            .map(|entry| entry.address);

        match address {
            Some(address) => {
                self.run_at_address(address);
            }
            None => debug!(behaviour = %self.id, event, "custom event not found"),
        }
    }

    /// Ask the network relay to run `event` on remote instances
    ///
    /// Underscore events are never relayed. `All` also runs the event
    /// locally, as does any target when no relay is installed.
    pub fn send_custom_network_event(&self, target: NetworkEventTarget, event: &str) {
        if !self.state.get().is_runnable() {
            return;
        }
        if event.starts_with('_') {
            warn!(behaviour = %self.id, event, "refusing to relay an underscore event");
            return;
        }
        if !self.runtime.options().allow_network_events {
            debug!(behaviour = %self.id, event, "network events disabled");
            return;
        }
        let Some(program) = self.program.as_ref() else {
            return;
        };

        let relay = self.runtime.network_relay();
        if let Some(relay) = &relay {
            let request = NetworkEventRequest {
                program_name: program.name.clone(),
                content_hash: self.content_hash.get_or_init(|| program.content_hash()).clone(),
                sender: self.id,
                target,
                event_name: event.to_string(),
            };
            debug!(behaviour = %self.id, event, ?target, "relaying network event");
            relay.relay(&request);
        }

        if target == NetworkEventTarget::All || relay.is_none() {
            self.send_custom_event(event);
        }
    }

    /// Read a variable by symbol name
    ///
    /// `None` when the symbol is unknown or the behaviour has no VM.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        let address = self.program.as_ref()?.symbol_table.address_of(name)?;
        self.vm()?.heap_value(address).ok()
    }

    /// Write a variable by symbol name
    ///
    /// Unknown symbols and values of the wrong type are ignored.
    pub fn set_variable(&self, name: &str, value: Value) {
        let Some(address) = self
            .program
            .as_ref()
            .and_then(|program| program.symbol_table.address_of(name))
        else {
            return;
        };
        let Some(vm) = self.vm() else {
            return;
        };
        if let Err(error) = vm.set_heap_value(address, value) {
            debug!(behaviour = %self.id, variable = name, %error, "variable write ignored");
        }
    }

    /// Values of the synced variables, after running `_onPreSerialization`
    pub fn serialize_synced_variables(&self) -> Vec<(String, Value)> {
        self.dispatch_event(EventKind::PreSerialization);
        if !self.state.get().is_runnable() {
            return Vec::new();
        }
        let Some(program) = self.program.as_ref() else {
            return Vec::new();
        };
        program
            .sync_metadata
            .iter()
            .filter_map(|entry| {
                self.get_variable(&entry.name)
                    .map(|value| (entry.name.clone(), value))
            })
            .collect()
    }

    /// Write received synced values, then run `_onDeserialization`
    ///
    /// Names that are not synced and values of the wrong type are skipped.
    pub fn deserialize_synced_variables(&self, values: &[(String, Value)]) {
        if !self.state.get().is_runnable() {
            return;
        }
        let Some(program) = self.program.as_ref() else {
            return;
        };
        for (name, value) in values {
            if program.sync_metadata.get(name).is_none() {
                debug!(behaviour = %self.id, variable = %name, "ignoring unsynced variable");
                continue;
            }
            self.set_variable(name, value.clone());
        }
        self.dispatch_event(EventKind::Deserialization);
    }
}

impl Drop for UdonBehaviour {
    fn drop(&mut self) {
        self.runtime.unregister_behaviour(self.id);
    }
}

/// Saved execution position, restored when dropped
struct ExecutionScope<'a> {
    behaviour: &'a UdonBehaviour,
    vm: &'a UdonVm,
    saved_pc: u32,
    saved_depth: usize,
    saved_state: BehaviourState,
    previous: Option<BehaviourId>,
}

impl<'a> ExecutionScope<'a> {
    fn enter(behaviour: &'a UdonBehaviour, vm: &'a UdonVm, address: u32) -> VmResult<Self> {
        behaviour.runtime.enter_nested()?;
        let scope = Self {
            behaviour,
            vm,
            saved_pc: vm.program_counter(),
            saved_depth: vm.stack_depth(),
            saved_state: behaviour.state.get(),
            previous: behaviour.runtime.enter_behaviour(Some(behaviour.id)),
        };
        vm.set_program_counter(address);
        behaviour.state.set(BehaviourState::Executing);
        Ok(scope)
    }
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        self.vm.set_program_counter(self.saved_pc);
        self.vm.truncate_stack(self.saved_depth);
        self.behaviour.runtime.enter_behaviour(self.previous);
        self.behaviour.runtime.exit_nested();
        if self.behaviour.state.get() == BehaviourState::Executing {
            self.behaviour.state.set(self.saved_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RuntimeOptions;
    use udon_bytecode::assemble;

    const COUNTER: &str = r#"
.data_start
    .export count
    .sync count, none
    count: %SystemInt32, 0
    one: %SystemInt32, 1
    self: %VRCUdonUdonBehaviour, this
    owner: %UnityEngineGameObject, this
.data_end
.code_start
    .export _interact
    _interact:
        PUSH, count
        PUSH, one
        PUSH, count
        EXTERN, "SystemInt32.__op_Addition__SystemInt32_SystemInt32__SystemInt32"
        JUMP, 0xFFFFFFFC
    .export Reset
    Reset:
        PUSH, one
        PUSH, count
        COPY
        JUMP, 0xFFFFFFFC
.code_end
"#;

    fn behaviour(source: &str) -> (Rc<UdonRuntime>, Rc<UdonBehaviour>) {
        let runtime = UdonRuntime::new(RuntimeOptions::default());
        let program = Rc::new(assemble("counter", source).unwrap());
        let behaviour = UdonBehaviour::new(&runtime, HostObjects::new(10, 11), Some(program));
        (runtime, behaviour)
    }

    #[test]
    fn test_initialize_and_dispatch() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        assert_eq!(behaviour.state(), BehaviourState::Unloaded);

        behaviour.initialize().unwrap();
        assert_eq!(behaviour.state(), BehaviourState::Ready);

        behaviour.dispatch("_interact");
        behaviour.dispatch_event(EventKind::Interact);
        assert_eq!(behaviour.get_variable("count"), Some(Value::Int32(2)));

        behaviour.dispatch("Reset");
        assert_eq!(behaviour.get_variable("count"), Some(Value::Int32(1)));
        assert_eq!(behaviour.state(), BehaviourState::Ready);
    }

    #[test]
    fn test_this_references_resolve() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        behaviour.initialize().unwrap();

        assert_eq!(
            behaviour.get_variable("self"),
            Some(Value::Object(behaviour.self_reference()))
        );
        assert_eq!(
            behaviour.get_variable("owner"),
            Some(Value::Object(ObjectRef::new(ObjectKind::GameObject, 10)))
        );
    }

    #[test]
    fn test_initialize_twice() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        behaviour.initialize().unwrap();
        assert!(matches!(
            behaviour.initialize(),
            Err(LoadError::AlreadyInitialized)
        ));
        assert_eq!(behaviour.state(), BehaviourState::Ready);
    }

    #[test]
    fn test_missing_program_disables() {
        let runtime = UdonRuntime::new(RuntimeOptions::default());
        let behaviour = UdonBehaviour::new(&runtime, HostObjects::new(1, 2), None);

        assert!(matches!(behaviour.initialize(), Err(LoadError::MissingProgram)));
        assert_eq!(behaviour.state(), BehaviourState::Disabled);
        behaviour.dispatch("_interact");
        assert_eq!(behaviour.get_variable("count"), None);
    }

    #[test]
    fn test_public_variables_applied() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        let mut table = PublicVariableTable::new();
        table.insert("count", TypeTag::Int32, Value::Int32(41));
        table.insert("one", TypeTag::Int32, Value::Int32(100));
        table.insert("missing", TypeTag::Int32, Value::Int32(5));
        behaviour.set_public_variables(table);

        behaviour.initialize().unwrap();

        assert_eq!(behaviour.get_variable("count"), Some(Value::Int32(41)));
        // not exported
        assert_eq!(behaviour.get_variable("one"), Some(Value::Int32(1)));
        assert!(behaviour.public_variables().contains("missing"));
    }

    #[test]
    fn test_public_variable_type_mismatch_is_dropped() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        let mut table = PublicVariableTable::new();
        table.insert("count", TypeTag::String, Value::String("nope".into()));
        behaviour.set_public_variables(table);

        behaviour.initialize().unwrap();

        assert_eq!(behaviour.get_variable("count"), Some(Value::Int32(0)));
        assert!(!behaviour.public_variables().contains("count"));
    }

    #[test]
    fn test_set_variable_ignores_bad_writes() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        behaviour.initialize().unwrap();

        behaviour.set_variable("count", Value::Int32(9));
        behaviour.set_variable("count", Value::Boolean(true));
        behaviour.set_variable("ghost", Value::Int32(1));

        assert_eq!(behaviour.get_variable("count"), Some(Value::Int32(9)));
        assert_eq!(behaviour.get_variable("ghost"), None);
    }

    #[test]
    fn test_initialization_hook_failure_disables() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        behaviour.set_initialization_hook(|_| Err("scene not ready".into()));

        let error = behaviour.initialize().unwrap_err();
        assert!(matches!(error, LoadError::InitializationHook(ref msg) if msg == "scene not ready"));
        assert_eq!(behaviour.state(), BehaviourState::Disabled);
        behaviour.dispatch("_interact");
        assert_eq!(behaviour.get_variable("count"), None);
    }

    #[test]
    fn test_initialization_hook_sees_loaded_program() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        behaviour.set_initialization_hook(|b| {
            b.set_variable("count", Value::Int32(5));
            Ok(())
        });

        behaviour.initialize().unwrap();
        assert_eq!(behaviour.get_variable("count"), Some(Value::Int32(5)));
    }

    #[test]
    fn test_synced_variables() {
        let (_runtime, behaviour) = behaviour(COUNTER);
        behaviour.initialize().unwrap();
        behaviour.set_variable("count", Value::Int32(3));

        assert_eq!(
            behaviour.serialize_synced_variables(),
            vec![("count".to_string(), Value::Int32(3))]
        );

        behaviour.deserialize_synced_variables(&[
            ("count".to_string(), Value::Int32(8)),
            ("one".to_string(), Value::Int32(8)),
        ]);
        assert_eq!(behaviour.get_variable("count"), Some(Value::Int32(8)));
        assert_eq!(behaviour.get_variable("one"), Some(Value::Int32(1)));
    }

    #[test]
    fn test_drop_unregisters() {
        let (runtime, behaviour) = behaviour(COUNTER);
        let id = behaviour.id();
        assert!(runtime.behaviour(id).is_some());

        drop(behaviour);
        assert!(runtime.behaviour(id).is_none());
        assert_eq!(runtime.behaviour_count(), 0);
    }
}
