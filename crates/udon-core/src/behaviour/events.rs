//! Event vocabulary and per-program event tables

use rustc_hash::FxHashMap;
use udon_bytecode::SymbolTable;

/// Group an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Object lifecycle
    Lifecycle,
    /// Collisions, triggers and joints
    Physics,
    /// Rendering callbacks
    Rendering,
    /// Mouse input
    Input,
    /// Interaction and pickups
    Interaction,
    /// Player lifecycle and stations
    Player,
    /// Video playback
    Media,
    /// Serialization around network sync
    Network,
    /// Program-defined events
    Custom,
}

macro_rules! define_events {
    ($($category:ident { $($variant:ident => $name:literal,)* })*) => {
        /// Host event with a fixed entry point name
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )*)*
        }

        impl EventKind {
            /// Every recognised event
            pub const ALL: &'static [EventKind] = &[$($(EventKind::$variant,)*)*];

            /// Entry point name
            pub fn name(self) -> &'static str {
                match self {
                    $($(EventKind::$variant => $name,)*)*
                }
            }

            /// Parse an entry point name
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($($name => Some(EventKind::$variant),)*)*
                    _ => None,
                }
            }

            /// Category of the event
            pub fn category(self) -> EventCategory {
                match self {
                    $($(EventKind::$variant => EventCategory::$category,)*)*
                }
            }
        }
    };
}

define_events! {
    Lifecycle {
        Start => "_start",
        Update => "_update",
        LateUpdate => "_lateUpdate",
        FixedUpdate => "_fixedUpdate",
        Enable => "_onEnable",
        Disable => "_onDisable",
        Destroy => "_onDestroy",
    }
    Physics {
        CollisionEnter => "_onCollisionEnter",
        CollisionExit => "_onCollisionExit",
        CollisionStay => "_onCollisionStay",
        CollisionEnter2D => "_onCollisionEnter2D",
        CollisionExit2D => "_onCollisionExit2D",
        CollisionStay2D => "_onCollisionStay2D",
        TriggerEnter => "_onTriggerEnter",
        TriggerExit => "_onTriggerExit",
        TriggerStay => "_onTriggerStay",
        TriggerEnter2D => "_onTriggerEnter2D",
        TriggerExit2D => "_onTriggerExit2D",
        TriggerStay2D => "_onTriggerStay2D",
        JointBreak => "_onJointBreak",
        JointBreak2D => "_onJointBreak2D",
        ControllerColliderHit => "_onControllerColliderHit",
        ParticleCollision => "_onParticleCollision",
        AnimatorIk => "_onAnimatorIk",
        AnimatorMove => "_onAnimatorMove",
    }
    Rendering {
        BecameVisible => "_onBecameVisible",
        BecameInvisible => "_onBecameInvisible",
        WillRenderObject => "_onWillRenderObject",
        PreCull => "_onPreCull",
        PreRender => "_onPreRender",
        PostRender => "_onPostRender",
        RenderObject => "_onRenderObject",
    }
    Input {
        MouseDown => "_onMouseDown",
        MouseUp => "_onMouseUp",
        MouseUpAsButton => "_onMouseUpAsButton",
        MouseEnter => "_onMouseEnter",
        MouseExit => "_onMouseExit",
        MouseOver => "_onMouseOver",
        MouseDrag => "_onMouseDrag",
    }
    Interaction {
        Interact => "_interact",
        Drop => "_onDrop",
        Pickup => "_onPickup",
        PickupUseDown => "_onPickupUseDown",
        PickupUseUp => "_onPickupUseUp",
        OwnershipTransferred => "_onOwnershipTransferred",
    }
    Player {
        PlayerJoined => "_onPlayerJoined",
        PlayerLeft => "_onPlayerLeft",
        Spawn => "_onSpawn",
        StationEntered => "_onStationEntered",
        StationExited => "_onStationExited",
    }
    Media {
        VideoEnd => "_onVideoEnd",
        VideoPause => "_onVideoPause",
        VideoPlay => "_onVideoPlay",
        VideoStart => "_onVideoStart",
    }
    Network {
        PreSerialization => "_onPreSerialization",
        Deserialization => "_onDeserialization",
    }
}

/// Event → entry point addresses for one program
///
/// Built once at initialization from the exported entry points. Addresses
/// keep declaration order. Exported names outside the vocabulary become
/// custom events unless they start with `_`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTable {
    builtin: FxHashMap<EventKind, Vec<u32>>,
    custom: FxHashMap<String, Vec<u32>>,
}

impl EventTable {
    /// Build the table for a program's entry points
    pub fn build(entry_points: &SymbolTable) -> Self {
        let mut table = Self::default();
        for entry in entry_points.exported() {
            if let Some(kind) = EventKind::from_name(&entry.name) {
                table.builtin.entry(kind).or_default().push(entry.address);
            } else if !entry.name.starts_with('_') {
                table
                    .custom
                    .entry(entry.name.clone())
                    .or_default()
                    .push(entry.address);
            }
        }
        table
    }

    /// Addresses registered for a vocabulary event
    pub fn addresses_for(&self, kind: EventKind) -> &[u32] {
        self.builtin.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Addresses registered under `name`, vocabulary or custom
    pub fn addresses(&self, name: &str) -> &[u32] {
        match EventKind::from_name(name) {
            Some(kind) => self.addresses_for(kind),
            None => self.custom.get(name).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    /// Whether anything is registered for `kind`
    pub fn handles(&self, kind: EventKind) -> bool {
        !self.addresses_for(kind).is_empty()
    }

    /// Custom event names, unordered
    pub fn custom_events(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    /// Vocabulary events with at least one handler in `category`
    pub fn events_in(&self, category: EventCategory) -> Vec<EventKind> {
        EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.category() == category && self.handles(*kind))
            .collect()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.custom.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use udon_bytecode::{Symbol, TypeTag};

    fn entry(name: &str, address: u32, exported: bool) -> Symbol {
        Symbol {
            name: name.into(),
            address,
            type_tag: TypeTag::Object,
            exported,
        }
    }

    #[test]
    fn test_names_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(*kind));
            assert!(kind.name().starts_with('_'));
        }
        assert_eq!(EventKind::from_name("_unknownThing"), None);
        assert_eq!(EventKind::Interact.category(), EventCategory::Interaction);
        assert_eq!(EventKind::Deserialization.category(), EventCategory::Network);
    }

    #[test]
    fn test_partitions_entry_points() {
        let mut entries = SymbolTable::new();
        entries.insert(entry("_update", 10, true)).unwrap();
        entries.insert(entry("_interact", 20, true)).unwrap();
        entries.insert(entry("OpenDoor", 40, true)).unwrap();
        entries.insert(entry("_internalHelper", 60, true)).unwrap();
        entries.insert(entry("hidden", 80, false)).unwrap();

        let table = EventTable::build(&entries);

        assert_eq!(table.addresses_for(EventKind::Update), &[10]);
        assert_eq!(table.addresses("_interact"), &[20]);
        assert_eq!(table.addresses("OpenDoor"), &[40]);
        assert!(table.addresses("_internalHelper").is_empty());
        assert!(table.addresses("hidden").is_empty());
        assert!(table.addresses("_start").is_empty());
        assert_eq!(table.custom_events().collect::<Vec<_>>(), vec!["OpenDoor"]);
        assert_eq!(table.events_in(EventCategory::Lifecycle), vec![EventKind::Update]);
    }

    #[test]
    fn test_empty_table() {
        let table = EventTable::build(&SymbolTable::new());
        assert!(table.is_empty());
        assert!(!table.handles(EventKind::Start));
    }
}
