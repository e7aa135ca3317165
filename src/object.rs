use std::{cell::RefCell, fmt};

use crate::{Chunk, Gc, Table, Value};

/// Hash a string with FNV-1a, the hash function used for all interned strings.
pub fn hash_str(s: &str) -> u32 {
    let mut hash = 2166136261u32;
    for byte in s.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// An immutable string with its hash computed once at creation.
///
/// Strings are always interned, so two strings with equal contents are the
/// same object and can be compared by identity.
#[derive(Debug)]
pub struct ObjString {
    /// The string contents
    pub chars: String,
    /// FNV-1a hash of the contents
    pub hash: u32,
}

impl fmt::Display for ObjString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chars)
    }
}

/// A structure for managing closed-over value
#[derive(Debug)]
pub enum ObjUpvalue {
    /// This field stores a slot offset which points to a value that was captured
    Open(usize),
    /// This stores the closed over value
    Closed(Value),
}

/// A function that capture its surrounding environemnt,
#[derive(Debug)]
pub struct ObjClosure {
    /// The base function of this closure
    pub fun: Gc<ObjFun>,
    /// Upvalues for indirect access to closed-over variables
    pub upvalues: Vec<Gc<RefCell<ObjUpvalue>>>,
}

impl fmt::Display for ObjClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fun)
    }
}

/// A function object that holds the bytecode of the function along with other metadata
#[derive(Debug)]
pub struct ObjFun {
    /// The name of the function, or nothing for the top-level script
    pub name: Option<Gc<ObjString>>,
    /// Number of parameters the function has
    pub arity: u8,
    /// Number of upvalues captured by the function
    pub upvalue_count: usize,
    /// The bytecode chunk of this function
    pub chunk: Chunk,
}

impl ObjFun {
    /// Create a new function object with an empty chunk
    pub fn new(name: Option<Gc<ObjString>>) -> Self {
        Self {
            name,
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::default(),
        }
    }
}

impl fmt::Display for ObjFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            None => write!(f, "<script>"),
            Some(name) => write!(f, "<fn {}>", name),
        }
    }
}

/// A class object holding the methods shared by its instances
#[derive(Debug)]
pub struct ObjClass {
    /// The name of the class
    pub name: Gc<ObjString>,
    /// Methods of the class, keyed by interned method name
    pub methods: Table,
}

impl ObjClass {
    /// Create a new class with no methods
    pub fn new(name: Gc<ObjString>) -> Self {
        Self {
            name,
            methods: Table::default(),
        }
    }
}

impl fmt::Display for ObjClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An instance of a class with its own set of fields
#[derive(Debug)]
pub struct ObjInstance {
    /// The class this object is an instance of
    pub class: Gc<RefCell<ObjClass>>,
    /// Fields held by the instance, keyed by interned field name
    pub fields: Table,
}

impl ObjInstance {
    /// Create a new instance with no fields
    pub fn new(class: Gc<RefCell<ObjClass>>) -> Self {
        Self {
            class,
            fields: Table::default(),
        }
    }
}

impl fmt::Display for ObjInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance", self.class.borrow().name)
    }
}

/// A method bound to the instance it was accessed through
#[derive(Debug)]
pub struct ObjBoundMethod {
    /// The instance `this` resolves to when the method runs
    pub receiver: Value,
    /// The underlying method
    pub method: Gc<ObjClosure>,
}

impl fmt::Display for ObjBoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method)
    }
}

/// A native function
#[derive(Clone)]
pub struct NativeFun {
    /// Function's name
    pub name: Gc<ObjString>,
    /// Number of parameters
    pub arity: u8,
    /// Native function reference
    pub call: fn(&[Value]) -> Value,
}

impl fmt::Display for NativeFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

impl fmt::Debug for NativeFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}
