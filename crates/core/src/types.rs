//! The Orus type system.
//!
//! Types are arena-allocated (`spec.md` §3: "Types are arena-allocated;
//! equality is structural; a type-variable store supports unification").
//! Concrete types compare structurally via `PartialEq`; type variables are
//! resolved through a [`TypeVarStore`] union-find so that unification can
//! be cheap and so that two variables unified together always observe the
//! same resolved type afterwards.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Primitive scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    I32,
    I64,
    U32,
    U64,
    F64,
    Bool,
    String,
    Nil,
}

impl Primitive {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Primitive::I32 | Primitive::I64 | Primitive::U32 | Primitive::U64 | Primitive::F64
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Primitive::I32 | Primitive::I64 | Primitive::U32 | Primitive::U64
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::F64 => "f64",
            Primitive::Bool => "bool",
            Primitive::String => "string",
            Primitive::Nil => "nil",
        };
        write!(f, "{s}")
    }
}

/// A struct field: name plus declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
}

/// The tagged variant over Orus's type universe (`spec.md` §3 "Type").
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Primitive(Primitive),
    Function(Rc<FunctionType>),
    Struct(Rc<StructType>),
    Array(Rc<Type>),
    /// An unresolved type variable, identified by a unique id assigned by the
    /// owning [`TypeVarStore`].
    GenericVar(TypeVarId),
    /// A named generic instantiation, e.g. `List<i32>`.
    Instance(Rc<InstanceType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub result: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceType {
    pub name: String,
    pub args: Vec<Type>,
}

impl Type {
    pub fn i32() -> Type {
        Type::Primitive(Primitive::I32)
    }
    pub fn i64() -> Type {
        Type::Primitive(Primitive::I64)
    }
    pub fn u32() -> Type {
        Type::Primitive(Primitive::U32)
    }
    pub fn u64() -> Type {
        Type::Primitive(Primitive::U64)
    }
    pub fn f64() -> Type {
        Type::Primitive(Primitive::F64)
    }
    pub fn bool() -> Type {
        Type::Primitive(Primitive::Bool)
    }
    pub fn string() -> Type {
        Type::Primitive(Primitive::String)
    }
    pub fn nil() -> Type {
        Type::Primitive(Primitive::Nil)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_numeric())
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_integer())
    }

    pub fn function(params: Vec<Type>, result: Type) -> Type {
        Type::Function(Rc::new(FunctionType { params, result }))
    }

    pub fn array(elem: Type) -> Type {
        Type::Array(Rc::new(elem))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Function(ft) => {
                write!(f, "fn(")?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {}", ft.result)
            }
            Type::Struct(st) => write!(f, "{}", st.name),
            Type::Array(elem) => write!(f, "[{elem}]"),
            Type::GenericVar(id) => write!(f, "?{}", id.0),
            Type::Instance(it) => {
                write!(f, "{}<", it.name)?;
                for (i, a) in it.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// Identifier for a type variable inside a [`TypeVarStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeVarId(pub u32);

/// Union-find over type variables, supporting Hindley-Milner style
/// unification. Each variable is either unbound or bound to a concrete
/// [`Type`] (itself possibly containing further variables).
#[derive(Debug, Default)]
pub struct TypeVarStore {
    bindings: RefCell<Vec<Option<Type>>>,
}

impl TypeVarStore {
    pub fn new() -> Self {
        TypeVarStore::default()
    }

    /// Allocate a fresh, currently-unbound type variable.
    pub fn fresh(&self) -> Type {
        let mut bindings = self.bindings.borrow_mut();
        let id = TypeVarId(bindings.len() as u32);
        bindings.push(None);
        Type::GenericVar(id)
    }

    /// Follow variable bindings until a concrete type or an unbound variable
    /// is reached ("path compression" in spirit, though we don't rewrite the
    /// chain since each variable binds directly to its resolved type).
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::GenericVar(id) => {
                let bindings = self.bindings.borrow();
                match bindings.get(id.0 as usize).and_then(|b| b.clone()) {
                    Some(bound) => {
                        drop(bindings);
                        self.resolve(&bound)
                    }
                    None => ty.clone(),
                }
            }
            other => other.clone(),
        }
    }

    /// Attempt to unify two types, binding any free variables encountered.
    /// Returns `Err` with a human-readable mismatch description on failure.
    pub fn unify(&self, a: &Type, b: &Type) -> Result<Type, String> {
        let a = self.resolve(a);
        let b = self.resolve(b);
        match (&a, &b) {
            (Type::GenericVar(id), other) | (other, Type::GenericVar(id)) => {
                self.bind(*id, other.clone());
                Ok(other.clone())
            }
            (Type::Primitive(pa), Type::Primitive(pb)) if pa == pb => Ok(a),
            (Type::Array(ea), Type::Array(eb)) => {
                let elem = self.unify(ea, eb)?;
                Ok(Type::array(elem))
            }
            (Type::Function(fa), Type::Function(fb)) => {
                if fa.params.len() != fb.params.len() {
                    return Err(format!(
                        "function arity mismatch: {} vs {}",
                        fa.params.len(),
                        fb.params.len()
                    ));
                }
                let mut params = Vec::with_capacity(fa.params.len());
                for (pa, pb) in fa.params.iter().zip(fb.params.iter()) {
                    params.push(self.unify(pa, pb)?);
                }
                let result = self.unify(&fa.result, &fb.result)?;
                Ok(Type::function(params, result))
            }
            (Type::Struct(sa), Type::Struct(sb)) if sa.name == sb.name => Ok(a),
            (Type::Instance(ia), Type::Instance(ib)) if ia.name == ib.name => {
                if ia.args.len() != ib.args.len() {
                    return Err(format!("generic arity mismatch for {}", ia.name));
                }
                let mut args = Vec::with_capacity(ia.args.len());
                for (xa, xb) in ia.args.iter().zip(ib.args.iter()) {
                    args.push(self.unify(xa, xb)?);
                }
                Ok(Type::Instance(Rc::new(InstanceType {
                    name: ia.name.clone(),
                    args,
                })))
            }
            _ => Err(format!("type mismatch: expected {a}, found {b}")),
        }
    }

    fn bind(&self, id: TypeVarId, ty: Type) {
        let mut bindings = self.bindings.borrow_mut();
        if (id.0 as usize) >= bindings.len() {
            bindings.resize(id.0 as usize + 1, None);
        }
        bindings[id.0 as usize] = Some(ty);
    }
}

/// Arena of named struct/union definitions visible during type checking,
/// keyed by name so `Type::Struct`/`Type::Instance` lookups are O(1).
#[derive(Debug, Default)]
pub struct TypeArena {
    structs: HashMap<String, Rc<StructType>>,
}

impl TypeArena {
    pub fn new() -> Self {
        TypeArena::default()
    }

    pub fn define_struct(&mut self, def: StructType) -> Type {
        let rc = Rc::new(def);
        self.structs.insert(rc.name.clone(), rc.clone());
        Type::Struct(rc)
    }

    pub fn lookup_struct(&self, name: &str) -> Option<Type> {
        self.structs.get(name).map(|s| Type::Struct(s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_for_concrete_types() {
        assert_eq!(Type::i32(), Type::i32());
        assert_ne!(Type::i32(), Type::i64());
    }

    #[test]
    fn unify_binds_a_fresh_variable() {
        let store = TypeVarStore::new();
        let v = store.fresh();
        let unified = store.unify(&v, &Type::f64()).unwrap();
        assert_eq!(unified, Type::f64());
        assert_eq!(store.resolve(&v), Type::f64());
    }

    #[test]
    fn unify_rejects_mismatched_primitives() {
        let store = TypeVarStore::new();
        assert!(store.unify(&Type::i32(), &Type::string()).is_err());
    }

    #[test]
    fn unify_recurses_into_arrays_and_functions() {
        let store = TypeVarStore::new();
        let v = store.fresh();
        let a = Type::array(v.clone());
        let b = Type::array(Type::bool());
        let unified = store.unify(&a, &b).unwrap();
        assert_eq!(unified, Type::array(Type::bool()));
        assert_eq!(store.resolve(&v), Type::bool());
    }

    #[test]
    fn type_arena_roundtrips_struct_lookup() {
        let mut arena = TypeArena::new();
        arena.define_struct(StructType {
            name: "Point".into(),
            fields: vec![
                FieldInfo {
                    name: "x".into(),
                    ty: Type::i32(),
                },
                FieldInfo {
                    name: "y".into(),
                    ty: Type::i32(),
                },
            ],
        });
        assert!(arena.lookup_struct("Point").is_some());
        assert!(arena.lookup_struct("Nope").is_none());
    }
}
