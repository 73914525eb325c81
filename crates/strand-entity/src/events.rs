//! Entity lifecycle notifications posted on the loop's event bus.

/// Posted after an entity joined a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRegistered {
    pub entity_id: String,
    pub loop_id: String,
}

/// Posted before an entity leaves a loop, while it is still registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUnregistering {
    pub entity_id: String,
    pub loop_id: String,
}

/// Posted after an entity left a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUnregistered {
    pub entity_id: String,
    pub loop_id: String,
}
