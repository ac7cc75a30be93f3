//! Typed descriptors for constructor inputs and outputs.
//!
//! Constructors are plain functions; their parameter types implement
//! [`Dependency`] and their return type implements [`Provides`]. The
//! resolver only ever sees the erased form: a list of input [`TypeKey`]s,
//! a list of output keys and a call that reads its inputs from the
//! [`ObjectGraph`].

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::graph::ObjectGraph;
use crate::naming;

/// A constructed value as stored in the object graph.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Type identity used to match providers with requirements.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn raw_name(&self) -> &'static str {
        self.name
    }

    /// Diagnostic name with internal module paths stripped.
    pub fn pretty(&self) -> String {
        naming::trim_name(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

/// A type a constructor or invoke function can take as a parameter.
///
/// Implemented for `Arc<T>` (the value provided for `T`) and for the
/// built-in handles [`crate::Lifecycle`] and [`crate::Shutdowner`].
pub trait Dependency: Sized + 'static {
    fn key() -> TypeKey;
    fn fetch(graph: &ObjectGraph) -> Option<Self>;
}

impl<T: Send + Sync + 'static> Dependency for Arc<T> {
    fn key() -> TypeKey {
        TypeKey::of::<T>()
    }

    fn fetch(graph: &ObjectGraph) -> Option<Self> {
        graph.get::<T>()
    }
}

/// The output of a constructor: one `Arc<T>` or a tuple of them.
pub trait Provides: Send + 'static {
    fn keys() -> Vec<TypeKey>;
    fn into_values(self) -> Vec<(TypeKey, Value)>;
}

impl<T: Send + Sync + 'static> Provides for Arc<T> {
    fn keys() -> Vec<TypeKey> {
        vec![TypeKey::of::<T>()]
    }

    fn into_values(self) -> Vec<(TypeKey, Value)> {
        vec![(TypeKey::of::<T>(), self as Value)]
    }
}

macro_rules! impl_provides_tuple {
    ($($out:ident),+) => {
        impl<$($out: Provides),+> Provides for ($($out,)+) {
            fn keys() -> Vec<TypeKey> {
                let mut keys = Vec::new();
                $(keys.extend($out::keys());)+
                keys
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<(TypeKey, Value)> {
                let ($($out,)+) = self;
                let mut values = Vec::new();
                $(values.extend($out.into_values());)+
                values
            }
        }
    };
}

impl_provides_tuple!(A, B);
impl_provides_tuple!(A, B, C);
impl_provides_tuple!(A, B, C, D);

/// A function whose parameters can all be fetched from the object graph.
///
/// `Args` is the tuple of parameter types; it only exists so that one
/// function type can implement the trait for exactly one arity.
pub trait Injectable<Args, R>: Send + Sync + 'static {
    fn inputs() -> Vec<TypeKey>;

    /// Fetch the parameters and call the function. `Err` carries the first
    /// parameter type missing from the graph.
    fn call(&self, graph: &ObjectGraph) -> Result<anyhow::Result<R>, TypeKey>;
}

macro_rules! impl_injectable {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Injectable<($($arg,)*), R> for F
        where
            F: Fn($($arg),*) -> anyhow::Result<R> + Send + Sync + 'static,
            $($arg: Dependency,)*
        {
            fn inputs() -> Vec<TypeKey> {
                vec![$($arg::key()),*]
            }

            #[allow(non_snake_case, unused_variables)]
            fn call(&self, graph: &ObjectGraph) -> Result<anyhow::Result<R>, TypeKey> {
                $(let $arg = $arg::fetch(graph).ok_or_else($arg::key)?;)*
                Ok((self)($($arg),*))
            }
        }
    };
}

impl_injectable!();
impl_injectable!(A1);
impl_injectable!(A1, A2);
impl_injectable!(A1, A2, A3);
impl_injectable!(A1, A2, A3, A4);
impl_injectable!(A1, A2, A3, A4, A5);
impl_injectable!(A1, A2, A3, A4, A5, A6);
impl_injectable!(A1, A2, A3, A4, A5, A6, A7);
impl_injectable!(A1, A2, A3, A4, A5, A6, A7, A8);

#[cfg(test)]
mod tests {
    use super::*;

    struct A(u32);
    struct B;

    fn needs_a(a: Arc<A>) -> anyhow::Result<Arc<B>> {
        assert_eq!(a.0, 7);
        Ok(Arc::new(B))
    }

    fn inputs_of<Args, R, F: Injectable<Args, R>>(_: &F) -> Vec<TypeKey> {
        F::inputs()
    }

    #[test]
    fn type_keys_compare_by_type() {
        assert_eq!(TypeKey::of::<A>(), TypeKey::of::<A>());
        assert_ne!(TypeKey::of::<A>(), TypeKey::of::<B>());
        assert_eq!(TypeKey::of::<A>().pretty(), "A");
    }

    #[test]
    fn injectable_lists_inputs_and_reports_missing_ones() {
        assert_eq!(inputs_of(&needs_a), vec![TypeKey::of::<A>()]);

        let graph = ObjectGraph::default();
        let missing = needs_a.call(&graph).err();
        assert_eq!(missing, Some(TypeKey::of::<A>()));
    }

    #[test]
    fn injectable_calls_with_fetched_values() {
        let mut graph = ObjectGraph::default();
        graph.insert(TypeKey::of::<A>(), Arc::new(A(7)));
        let out = needs_a.call(&graph).unwrap().unwrap();
        assert_eq!(<Arc<B> as Provides>::keys(), vec![TypeKey::of::<B>()]);
        assert_eq!(out.into_values().len(), 1);
    }

    #[test]
    fn tuples_provide_every_member() {
        let keys = <(Arc<A>, Arc<B>) as Provides>::keys();
        assert_eq!(keys, vec![TypeKey::of::<A>(), TypeKey::of::<B>()]);
        let values = (Arc::new(A(1)), Arc::new(B)).into_values();
        assert_eq!(values[0].0, TypeKey::of::<A>());
        assert_eq!(values[1].0, TypeKey::of::<B>());
    }
}
