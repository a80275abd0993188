//! Runtime keys for the elements held in a stage's arenas.
//!
//! Keys are generational: a key held after its element was disposed and
//! reclaimed resolves to `None` rather than aliasing a newer element.

slotmap::new_key_type! {
    /// Runtime key for a Component.
    pub struct ComponentKey;
}

slotmap::new_key_type! {
    /// Runtime key for a Reaction.
    pub struct ReactionKey;
}
