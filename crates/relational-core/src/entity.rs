//! Entity model: property access, shared handles and type resolution.
//!
//! Hydration never needs to know the concrete type of an entity. It goes
//! through the [`Entity`] trait, which exposes properties by name, and asks an
//! [`EntityRegistry`] for a fresh instance of a styled type name. Names with no
//! registered factory produce a [`Record`], a plain ordered property bag.
//!
//! Entities are shared through [`EntityRef`]. Two references are the same
//! entity exactly when their [`EntityHandle`]s are equal; structural equality
//! of properties is irrelevant to identity.

use crate::value::Value;
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The value of one entity property.
#[derive(Clone)]
pub enum FieldValue {
    /// A plain column value
    Scalar(Value),
    /// A reference to another entity (a resolved foreign key)
    Entity(EntityRef),
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Scalar(Value::Null)
    }
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(v) => Some(v),
            FieldValue::Entity(_) => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            FieldValue::Entity(e) => Some(e),
            FieldValue::Scalar(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Scalar(Value::Null))
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Scalar(v) => write!(f, "{:?}", v),
            FieldValue::Entity(e) => write!(f, "{:?}", e),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Scalar(a), FieldValue::Scalar(b)) => a == b,
            (FieldValue::Entity(a), FieldValue::Entity(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        FieldValue::Scalar(v)
    }
}

impl From<EntityRef> for FieldValue {
    fn from(e: EntityRef) -> Self {
        FieldValue::Entity(e)
    }
}

impl From<&EntityRef> for FieldValue {
    fn from(e: &EntityRef) -> Self {
        FieldValue::Entity(e.clone())
    }
}

macro_rules! scalar_field_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    FieldValue::Scalar(Value::from(v))
                }
            }
        )*
    };
}

scalar_field_from!(bool, i32, i64, f64, String, &str);

/// Dynamic property access implemented by every entity type.
pub trait Entity: Any + fmt::Debug {
    /// Read a property, `None` when the entity has no such property.
    fn get(&self, property: &str) -> Option<FieldValue>;

    /// Write a property. Typed entities may ignore names they do not declare.
    fn set(&mut self, property: &str, value: FieldValue);

    /// Property names in declaration (or insertion) order.
    fn properties(&self) -> Vec<String>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Generic entity used when no typed entity is registered for a name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    type_name: String,
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style property assignment.
    pub fn with(mut self, property: &str, value: impl Into<FieldValue>) -> Self {
        self.set(property, value.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Entity for Record {
    fn get(&self, property: &str) -> Option<FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, v)| v.clone())
    }

    fn set(&mut self, property: &str, value: FieldValue) {
        if let Some(slot) = self.fields.iter_mut().find(|(name, _)| name == property) {
            slot.1 = value;
        } else {
            self.fields.push((property.to_string(), value));
        }
    }

    fn properties(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Stable, process-unique identity of an entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(u64);

impl EntityHandle {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EntityHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared, single-threaded reference to an entity.
///
/// Cloning the reference never clones the entity.
#[derive(Clone)]
pub struct EntityRef {
    handle: EntityHandle,
    inner: Rc<RefCell<Box<dyn Entity>>>,
}

impl EntityRef {
    pub fn new<E: Entity>(entity: E) -> Self {
        Self::from_boxed(Box::new(entity))
    }

    pub fn from_boxed(entity: Box<dyn Entity>) -> Self {
        Self {
            handle: EntityHandle::next(),
            inner: Rc::new(RefCell::new(entity)),
        }
    }

    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        self.handle == other.handle
    }

    pub fn get(&self, property: &str) -> Option<FieldValue> {
        self.inner.borrow().get(property)
    }

    /// Scalar value of a property; `None` for missing or entity-valued ones.
    pub fn value(&self, property: &str) -> Option<Value> {
        match self.get(property)? {
            FieldValue::Scalar(v) => Some(v),
            FieldValue::Entity(_) => None,
        }
    }

    /// Entity held by a property, if it has been resolved to one.
    pub fn related(&self, property: &str) -> Option<EntityRef> {
        match self.get(property)? {
            FieldValue::Entity(e) => Some(e),
            FieldValue::Scalar(_) => None,
        }
    }

    pub fn set(&self, property: &str, value: impl Into<FieldValue>) {
        self.inner.borrow_mut().set(property, value.into());
    }

    pub fn properties(&self) -> Vec<String> {
        self.inner.borrow().properties()
    }

    pub fn borrow(&self) -> Ref<'_, dyn Entity> {
        Ref::map(self.inner.borrow(), |boxed| &**boxed)
    }

    pub fn borrow_mut(&self) -> RefMut<'_, dyn Entity> {
        RefMut::map(self.inner.borrow_mut(), |boxed| &mut **boxed)
    }

    /// Borrow the entity as its concrete type.
    pub fn downcast<T: Entity>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.inner.borrow(), |boxed| {
            boxed.as_any().downcast_ref::<T>()
        })
        .ok()
    }

    /// Mutably borrow the entity as its concrete type.
    pub fn downcast_mut<T: Entity>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.inner.borrow_mut(), |boxed| {
            boxed.as_any_mut().downcast_mut::<T>()
        })
        .ok()
    }

    pub fn is<T: Entity>(&self) -> bool {
        self.inner.borrow().as_any().is::<T>()
    }
}

impl fmt::Debug for EntityRef {
    // Entity graphs may be cyclic; print the handle only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({})", self.handle)
    }
}

type Factory = Box<dyn Fn() -> Box<dyn Entity>>;

/// Maps styled entity names to factories for typed entities.
#[derive(Default)]
pub struct EntityRegistry {
    factories: HashMap<String, Factory>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a styled entity name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Entity> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Register `T::default()` as the factory for `name`.
    pub fn register_default<T: Entity + Default>(&mut self, name: impl Into<String>) {
        self.register(name, || Box::new(T::default()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a fresh instance, falling back to a [`Record`].
    pub fn create(&self, name: &str) -> Box<dyn Entity> {
        match self.factories.get(name) {
            Some(factory) => factory(),
            None => {
                tracing::trace!(entity = name, "No factory registered; using Record");
                Box::new(Record::new(name))
            }
        }
    }

    pub fn instantiate(&self, name: &str) -> EntityRef {
        EntityRef::from_boxed(self.create(name))
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("EntityRegistry")
            .field("factories", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Post {
        id: Option<i64>,
        title: String,
    }

    impl Entity for Post {
        fn get(&self, property: &str) -> Option<FieldValue> {
            match property {
                "id" => Some(Value::from(self.id).into()),
                "title" => Some(self.title.as_str().into()),
                _ => None,
            }
        }

        fn set(&mut self, property: &str, value: FieldValue) {
            match (property, value) {
                ("id", FieldValue::Scalar(v)) => self.id = v.as_i64(),
                ("title", FieldValue::Scalar(v)) => {
                    self.title = v.as_str().unwrap_or_default().to_string();
                }
                _ => {}
            }
        }

        fn properties(&self) -> Vec<String> {
            vec!["id".into(), "title".into()]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn record_keeps_insertion_order() {
        let record = Record::new("Comment")
            .with("id", 1i64)
            .with("text", "hello")
            .with("id", 2i64);
        assert_eq!(record.properties(), vec!["id", "text"]);
        assert_eq!(record.get("id"), Some(FieldValue::Scalar(Value::BigInt(2))));
        assert_eq!(record.type_name(), "Comment");
    }

    #[test]
    fn entity_refs_compare_by_identity() {
        let a = EntityRef::new(Record::new("Post").with("id", 5i64));
        let b = EntityRef::new(Record::new("Post").with("id", 5i64));
        let a2 = a.clone();

        assert!(a.ptr_eq(&a2));
        assert!(!a.ptr_eq(&b));
        assert_ne!(a.handle(), b.handle());
        assert_ne!(FieldValue::from(&a), FieldValue::from(&b));
    }

    #[test]
    fn clones_share_mutations() {
        let a = EntityRef::new(Record::new("Post"));
        let alias = a.clone();
        alias.set("title", "changed");
        assert_eq!(a.value("title"), Some(Value::Text("changed".into())));
    }

    #[test]
    fn related_and_value_accessors() {
        let post = EntityRef::new(Record::new("Post").with("id", 5i64));
        let comment = EntityRef::new(Record::new("Comment"));
        comment.set("post_id", &post);

        assert!(comment.related("post_id").unwrap().ptr_eq(&post));
        assert_eq!(comment.value("post_id"), None);
        assert_eq!(comment.value("missing"), None);
    }

    #[test]
    fn registry_builds_typed_entities_and_falls_back() {
        let mut registry = EntityRegistry::new();
        registry.register_default::<Post>("Post");

        let post = registry.instantiate("Post");
        assert!(post.is::<Post>());
        post.set("title", "Hello");
        assert_eq!(post.downcast::<Post>().unwrap().title, "Hello");

        let other = registry.instantiate("Comment");
        assert!(other.is::<Record>());
        assert_eq!(other.downcast::<Record>().unwrap().type_name(), "Comment");
        assert!(other.downcast::<Post>().is_none());
    }

    #[test]
    fn typed_entities_ignore_unknown_properties() {
        let post = EntityRef::new(Post::default());
        post.set("unknown", 1i64);
        assert_eq!(post.get("unknown"), None);
        post.downcast_mut::<Post>().unwrap().id = Some(9);
        assert_eq!(post.value("id"), Some(Value::BigInt(9)));
    }

    #[test]
    fn debug_does_not_recurse_through_cycles() {
        let a = EntityRef::new(Record::new("A"));
        let b = EntityRef::new(Record::new("B"));
        a.set("b_id", &b);
        b.set("a_id", &a);
        let text = format!("{:?}", a.borrow());
        assert!(text.contains("EntityRef(#"));
    }
}
