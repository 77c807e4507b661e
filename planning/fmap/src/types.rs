//! Type hierarchy and object registry.

use fixedbitset::FixedBitSet;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::errors::TaskError;
use crate::ids::{ObjId, TypeId};
use crate::task::{self, Task};

/// Type hierarchy with multiple inheritance.
///
/// Subtyping is materialized as a boolean matrix (`is_subtype[x][y]` is true iff `x` is a
/// subtype of `y`) which is reflexive and transitively closed after every modification.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    names: Vec<String>,
    index: HashMap<String, TypeId>,
    parents: Vec<SmallVec<[TypeId; 2]>>,
    subtype: Vec<FixedBitSet>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub const OBJECT: TypeId = TypeId::from_u32(0);
    pub const BOOLEAN: TypeId = TypeId::from_u32(1);
    pub const NUMBER: TypeId = TypeId::from_u32(2);
    pub const AGENT: TypeId = TypeId::from_u32(3);

    pub fn new() -> Self {
        let mut reg = TypeRegistry {
            names: Vec::new(),
            index: HashMap::new(),
            parents: Vec::new(),
            subtype: Vec::new(),
        };
        reg.insert(task::OBJECT);
        reg.insert(task::BOOLEAN);
        reg.insert(task::NUMBER);
        let agent = reg.insert(task::AGENT);
        reg.parents[agent].push(Self::OBJECT);
        reg.close();
        reg
    }

    fn insert(&mut self, name: &str) -> TypeId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = TypeId::from(self.names.len());
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        self.parents.push(SmallVec::new());
        id
    }

    /// Records a type with the given parents. Unknown parents are created as children of `object`.
    /// Adding parents to an existing type extends its parent list.
    pub fn add_type(&mut self, name: &str, parents: &[&str]) -> TypeId {
        let id = self.insert(name);
        for p in parents {
            let pid = match self.index.get(*p) {
                Some(&pid) => pid,
                None => {
                    let pid = self.insert(p);
                    if pid != Self::OBJECT {
                        self.parents[pid].push(Self::OBJECT);
                    }
                    pid
                }
            };
            if pid != id && !self.parents[id].contains(&pid) {
                self.parents[id].push(pid);
            }
        }
        if self.parents[id].is_empty() && ![Self::OBJECT, Self::BOOLEAN, Self::NUMBER].contains(&id) {
            self.parents[id].push(Self::OBJECT);
        }
        self.close();
        id
    }

    /// Recomputes the reflexive and transitive closure of the parent relation.
    fn close(&mut self) {
        let n = self.names.len();
        self.subtype = vec![FixedBitSet::with_capacity(n); n];
        for x in 0..n {
            let mut stack = vec![x];
            while let Some(t) = stack.pop() {
                if self.subtype[x].contains(t) {
                    continue;
                }
                self.subtype[x].insert(t);
                stack.extend(self.parents[t].iter().map(|&p| usize::from(p)));
            }
        }
    }

    pub fn id(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Result<TypeId, TaskError> {
        self.id(name).ok_or_else(|| TaskError::UnknownType(name.to_string()))
    }

    pub fn name(&self, tpe: TypeId) -> &str {
        &self.names[tpe]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.names.len()).map(TypeId::from)
    }

    /// True if `x` is `y` or one of its (transitive) subtypes.
    pub fn is_subtype(&self, x: TypeId, y: TypeId) -> bool {
        self.subtype[x].contains(usize::from(y))
    }

    pub fn parents(&self, tpe: TypeId) -> &[TypeId] {
        &self.parents[tpe]
    }

    /// Direct children of the type.
    pub fn children(&self, tpe: TypeId) -> impl Iterator<Item = TypeId> + '_ {
        self.types().filter(move |&t| self.parents[t].contains(&tpe))
    }
}

/// Objects of the task, each with the list of types it belongs to.
#[derive(Clone, Debug)]
pub struct Objects {
    names: Vec<String>,
    types: Vec<SmallVec<[TypeId; 1]>>,
    index: HashMap<String, ObjId>,
}

impl Objects {
    pub const TRUE: ObjId = ObjId::from_u32(0);
    pub const FALSE: ObjId = ObjId::from_u32(1);

    fn new() -> Self {
        let mut objs = Objects {
            names: Vec::new(),
            types: Vec::new(),
            index: HashMap::new(),
        };
        objs.add(task::TRUE, &[TypeRegistry::BOOLEAN]);
        objs.add(task::FALSE, &[TypeRegistry::BOOLEAN]);
        objs
    }

    /// Adds an object or, if it already exists, extends its type memberships.
    fn add(&mut self, name: &str, types: &[TypeId]) -> ObjId {
        let id = match self.index.get(name) {
            Some(&id) => id,
            None => {
                let id = ObjId::from(self.names.len());
                self.names.push(name.to_string());
                self.types.push(SmallVec::new());
                self.index.insert(name.to_string(), id);
                id
            }
        };
        for t in types {
            if !self.types[id].contains(t) {
                self.types[id].push(*t);
            }
        }
        id
    }

    pub fn id(&self, name: &str) -> Option<ObjId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, obj: ObjId) -> &str {
        &self.names[obj]
    }

    pub fn types_of(&self, obj: ObjId) -> &[TypeId] {
        &self.types[obj]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjId> + '_ {
        (0..self.names.len()).map(ObjId::from)
    }
}

/// The type hierarchy together with the objects it classifies.
#[derive(Clone, Debug)]
pub struct Registry {
    pub types: TypeRegistry,
    pub objects: Objects,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            types: TypeRegistry::new(),
            objects: Objects::new(),
        }
    }
}

impl Registry {
    pub fn from_task(task: &Task) -> Result<Registry, TaskError> {
        let mut reg = Registry::default();
        for decl in &task.types {
            let parents: Vec<&str> = decl.parents.iter().map(String::as_str).collect();
            reg.types.add_type(&decl.name, &parents);
        }
        for decl in &task.objects {
            let mut types = Vec::with_capacity(decl.types.len());
            for t in &decl.types {
                types.push(reg.types.get(t)?);
            }
            if types.is_empty() {
                types.push(TypeRegistry::OBJECT);
            }
            reg.objects.add(&decl.name, &types);
        }
        Ok(reg)
    }

    /// Registers an object reported by a peer. Its type names are taken from the peer's message;
    /// types unknown locally are created below `object`.
    pub fn learn_object(&mut self, name: &str, type_names: &[String]) -> ObjId {
        let types: Vec<TypeId> = type_names
            .iter()
            .map(|t| match self.types.id(t) {
                Some(id) => id,
                None => self.types.add_type(t, &[]),
            })
            .collect();
        self.objects.add(name, &types)
    }

    pub fn object(&self, name: &str) -> Result<ObjId, TaskError> {
        self.objects.id(name).ok_or_else(|| TaskError::UnknownObject(name.to_string()))
    }

    /// True if one of the object's types is a subtype of `tpe`.
    pub fn compatible(&self, obj: ObjId, tpe: TypeId) -> bool {
        self.objects.types_of(obj).iter().any(|&t| self.types.is_subtype(t, tpe))
    }

    /// True if the object is compatible with at least one of the types (an `either` type).
    /// An empty list accepts any object.
    pub fn compatible_any(&self, obj: ObjId, types: &[TypeId]) -> bool {
        types.is_empty() || types.iter().any(|&t| self.compatible(obj, t))
    }

    pub fn objects_of(&self, types: &[TypeId]) -> Vec<ObjId> {
        self.objects.iter().filter(|&o| self.compatible_any(o, types)).collect()
    }

    pub fn type_names_of(&self, obj: ObjId) -> Vec<String> {
        self.objects
            .types_of(obj)
            .iter()
            .map(|&t| self.types.name(t).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_closed() {
        let mut ts = TypeRegistry::new();
        ts.add_type("vehicle", &[]);
        ts.add_type("truck", &["vehicle"]);
        ts.add_type("amphibian", &["vehicle", "boat"]);
        let ids: Vec<TypeId> = ["vehicle", "truck", "amphibian", "boat"]
            .iter()
            .map(|n| ts.id(n).unwrap())
            .collect();
        let [vehicle, truck, amphibian, boat] = ids[..] else { panic!() };
        assert!(ts.is_subtype(truck, truck));
        assert!(ts.is_subtype(truck, vehicle));
        assert!(ts.is_subtype(truck, TypeRegistry::OBJECT));
        assert!(!ts.is_subtype(vehicle, truck));
        assert!(ts.is_subtype(amphibian, boat));
        assert!(ts.is_subtype(amphibian, vehicle));
        assert!(!ts.is_subtype(boat, vehicle));
        assert_eq!(ts.parents(amphibian), &[vehicle, boat]);
        let children: Vec<_> = ts.children(vehicle).collect();
        assert_eq!(children, vec![truck, amphibian]);
    }

    #[test]
    fn learned_objects_extend_the_registry() {
        let mut reg = Registry::default();
        let o = reg.learn_object("door1", &["door".to_string()]);
        let door = reg.types.id("door").unwrap();
        assert!(reg.compatible(o, door));
        assert!(reg.compatible(o, TypeRegistry::OBJECT));
        assert!(!reg.compatible(Objects::TRUE, door));
        assert!(reg.compatible(Objects::TRUE, TypeRegistry::BOOLEAN));
        assert_eq!(reg.objects_of(&[door]), vec![o]);
    }
}
