//! Dense integer identifiers used to index the registries of a grounded task and the plan arena.

/// Declares a copyable identifier wrapping a `u32` that converts to and from `usize`
/// so that it can directly index the `Vec` it was allocated from.
#[macro_export]
macro_rules! dense_id {
    ($(#[$meta:meta])* $type_name:ident) => {
        $(#[$meta])*
        #[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
        pub struct $type_name(u32);

        impl $type_name {
            pub const fn from_u32(u: u32) -> Self {
                $type_name(u)
            }
            pub const fn to_u32(self) -> u32 {
                self.0
            }
        }
        impl From<usize> for $type_name {
            fn from(u: usize) -> Self {
                debug_assert!(u <= u32::MAX as usize);
                $type_name(u as u32)
            }
        }
        impl From<$type_name> for usize {
            fn from(v: $type_name) -> Self {
                v.0 as usize
            }
        }
        impl std::fmt::Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl<V> std::ops::Index<$type_name> for Vec<V> {
            type Output = V;
            fn index(&self, index: $type_name) -> &Self::Output {
                &self[usize::from(index)]
            }
        }
        impl<V> std::ops::IndexMut<$type_name> for Vec<V> {
            fn index_mut(&mut self, index: $type_name) -> &mut Self::Output {
                &mut self[usize::from(index)]
            }
        }
    };
}

dense_id!(
    /// A type of the type registry.
    TypeId
);
dense_id!(
    /// An object (constant) of the task, including the built-in `true` and `false`.
    ObjId
);
dense_id!(
    /// A function (predicate, object fluent or numeric fluent) signature.
    FunId
);
dense_id!(
    /// A ground variable: a function applied to a tuple of objects.
    VarId
);
dense_id!(
    /// A ground value `variable = object` reached in the relaxed planning graph.
    ValueId
);
dense_id!(
    /// A ground action.
    ActionId
);
dense_id!(
    /// A step of a partial-order plan. `StepId::INIT` and `StepId::GOAL` are the two sentinels.
    StepId
);
dense_id!(
    /// A node of the plan arena.
    PlanId
);

impl StepId {
    /// Universal initial step, ordered before every other step.
    pub const INIT: StepId = StepId(0);
    /// Universal final step, ordered after every other step.
    pub const GOAL: StepId = StepId(1);

    pub fn is_sentinel(self) -> bool {
        self.0 < 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_index_vectors() {
        let v = vec!["a", "b", "c"];
        let id = VarId::from(2usize);
        assert_eq!(v[id], "c");
        assert_eq!(usize::from(id), 2);
        assert!(StepId::INIT.is_sentinel());
        assert!(StepId::GOAL.is_sentinel());
        assert!(!StepId::from(2usize).is_sentinel());
    }
}
