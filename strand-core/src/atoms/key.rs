//! Atom and scope identity.
//!
//! An atom is identified by its descriptor type plus a key. The key is an
//! explicit name, any hashable value, or the source location the descriptor
//! was constructed at. Two descriptors with the same type and an equal key
//! address the same graph node, wherever they were built.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Identity of an atom within a store scope.
#[derive(Clone)]
pub struct AtomKey {
    family: TypeId,
    family_name: &'static str,
    id: KeyId,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum KeyId {
    Named(Arc<str>),
    Location {
        file: &'static str,
        line: u32,
        column: u32,
    },
    Custom(ErasedKey),
}

impl AtomKey {
    /// Key a descriptor of type `D` by name.
    pub fn named<D: 'static>(name: impl Into<Arc<str>>) -> Self {
        Self::with_id::<D>(KeyId::Named(name.into()))
    }

    /// Key a descriptor of type `D` by a source location.
    pub fn located<D: 'static>(location: &'static Location<'static>) -> Self {
        Self::with_id::<D>(KeyId::Location {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        })
    }

    /// Key a descriptor of type `D` by an arbitrary hashable value.
    pub fn custom<D: 'static, K>(key: K) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        Self::with_id::<D>(KeyId::Custom(ErasedKey::new(key)))
    }

    fn with_id<D: 'static>(id: KeyId) -> Self {
        Self {
            family: TypeId::of::<D>(),
            family_name: type_name::<D>(),
            id,
        }
    }

    /// The descriptor type this key belongs to.
    pub fn family(&self) -> TypeId {
        self.family
    }
}

impl PartialEq for AtomKey {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family && self.id == other.id
    }
}

impl Eq for AtomKey {}

impl Hash for AtomKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.family.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for AtomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for AtomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = short_type_name(self.family_name);
        match &self.id {
            KeyId::Named(name) => write!(f, "{family}({name:?})"),
            KeyId::Location { file, line, column } => {
                write!(f, "{family}({file}:{line}:{column})")
            }
            KeyId::Custom(key) => write!(f, "{family}({key:?})"),
        }
    }
}

/// Strip module paths, keeping generic arguments readable.
fn short_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut segment_start = 0;
    for (index, ch) in name.char_indices() {
        match ch {
            ':' => segment_start = index + 1,
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' => {
                out.push_str(&name[segment_start..index]);
                out.push(ch);
                segment_start = index + 1;
            }
            _ => {}
        }
    }
    out.push_str(&name[segment_start..]);
    out
}

/// Token selecting a child scope of a store.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(ErasedKey);

impl ScopeKey {
    pub fn new<K>(key: K) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        Self(ErasedKey::new(key))
    }
}

impl From<&str> for ScopeKey {
    fn from(key: &str) -> Self {
        Self::new(key.to_owned())
    }
}

impl From<String> for ScopeKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopeKey").field(&self.0).finish()
    }
}

/// A hashable value of any type, compared by type and value.
#[derive(Clone)]
struct ErasedKey(Arc<dyn KeyValue>);

impl ErasedKey {
    fn new<K>(key: K) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(key))
    }
}

impl PartialEq for ErasedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_dyn(other.0.as_any())
    }
}

impl Eq for ErasedKey {}

impl Hash for ErasedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_dyn(state);
    }
}

impl fmt::Debug for ErasedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_dyn(f)
    }
}

trait KeyValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_dyn(&self, other: &dyn Any) -> bool;
    fn hash_dyn(&self, state: &mut dyn Hasher);
    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<K> KeyValue for K
where
    K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<K>().is_some_and(|other| self == other)
    }

    fn hash_dyn(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<K>().hash(&mut state);
        self.hash(&mut state);
    }

    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Counter;
    struct Label;

    #[test]
    fn equal_type_and_name_are_one_key() {
        let a = AtomKey::named::<Counter>("count");
        let b = AtomKey::named::<Counter>(String::from("count"));
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn same_name_different_type_differs() {
        assert_ne!(
            AtomKey::named::<Counter>("count"),
            AtomKey::named::<Label>("count")
        );
    }

    #[test]
    fn custom_keys_compare_by_type_and_value() {
        assert_eq!(
            AtomKey::custom::<Counter, _>(("user", 7_u32)),
            AtomKey::custom::<Counter, _>(("user", 7_u32))
        );
        assert_ne!(
            AtomKey::custom::<Counter, _>(7_u32),
            AtomKey::custom::<Counter, _>(7_u64)
        );
    }

    #[test]
    fn location_keys_differ_per_call_site() {
        let first = AtomKey::located::<Counter>(Location::caller());
        let second = AtomKey::located::<Counter>(Location::caller());
        assert_ne!(first, second);
    }

    #[test]
    fn display_uses_short_type_names() {
        let key = AtomKey::named::<Option<Counter>>("n");
        assert_eq!(key.to_string(), r#"Option<Counter>("n")"#);
    }

    #[test]
    fn scope_keys_from_strings() {
        assert_eq!(ScopeKey::from("left"), ScopeKey::from(String::from("left")));
        assert_ne!(ScopeKey::from("left"), ScopeKey::from("right"));
        assert_ne!(ScopeKey::from("1"), ScopeKey::new(1_u8));
    }
}
