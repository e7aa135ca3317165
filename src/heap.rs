use core::fmt;
use std::{
    cell::{Cell, RefCell},
    fmt::Display,
    mem,
    ops::Deref,
    ptr::NonNull,
};

use crate::{
    hash_str, ObjBoundMethod, ObjClass, ObjClosure, ObjFun, ObjInstance, ObjString, ObjUpvalue,
    Table, Value,
};

const GC_HEAP_GROW_FACTOR: usize = 2;
const GC_NEXT_INITIAL: usize = 1024 * 1024;

/// Bookkeeping shared by every heap object: the tri-color mark flag and the
/// intrusive link to the next allocated object.
struct GcHeader {
    marked: Cell<bool>,
    next: Cell<Option<Object>>,
}

struct GcBox<T> {
    header: GcHeader,
    data: T,
}

/// A smart pointer for garbage collected object.
///
/// The pointee is owned by the [`Heap`] that allocated it and stays valid for
/// as long as it is reachable from the virtual machine's roots. Handles are
/// plain copyable pointers; equality of objects is handle identity.
pub struct Gc<T> {
    ptr: NonNull<GcBox<T>>,
}

impl<T> Gc<T> {
    /// Check whether two references point to the same object.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    fn header(&self) -> &GcHeader {
        unsafe { &self.ptr.as_ref().header }
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.header().marked.get()
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> AsRef<T> for Gc<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> Deref for Gc<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &self.ptr.as_ref().data }
    }
}

impl<T: fmt::Debug> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: Display> Display for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

/// A type-erased reference to any heap object, used by the all-objects list
/// and the collector's gray worklist.
#[derive(Debug, Clone, Copy)]
pub enum Object {
    /// An interned string
    String(Gc<ObjString>),
    /// A compiled function
    Fun(Gc<ObjFun>),
    /// A closure capturing its surrounding variables
    Closure(Gc<ObjClosure>),
    /// A captured variable's cell
    Upvalue(Gc<RefCell<ObjUpvalue>>),
    /// A class
    Class(Gc<RefCell<ObjClass>>),
    /// An instance of a class
    Instance(Gc<RefCell<ObjInstance>>),
    /// A method bound to its receiver
    BoundMethod(Gc<ObjBoundMethod>),
}

impl Object {
    fn header(&self) -> &GcHeader {
        match self {
            Self::String(v) => v.header(),
            Self::Fun(v) => v.header(),
            Self::Closure(v) => v.header(),
            Self::Upvalue(v) => v.header(),
            Self::Class(v) => v.header(),
            Self::Instance(v) => v.header(),
            Self::BoundMethod(v) => v.header(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::String(v) => mem::size_of::<GcBox<ObjString>>() + v.chars.len(),
            Self::Fun(_) => mem::size_of::<GcBox<ObjFun>>(),
            Self::Closure(_) => mem::size_of::<GcBox<ObjClosure>>(),
            Self::Upvalue(_) => mem::size_of::<GcBox<RefCell<ObjUpvalue>>>(),
            Self::Class(_) => mem::size_of::<GcBox<RefCell<ObjClass>>>(),
            Self::Instance(_) => mem::size_of::<GcBox<RefCell<ObjInstance>>>(),
            Self::BoundMethod(_) => mem::size_of::<GcBox<ObjBoundMethod>>(),
        }
    }

    /// Reclaim the object's storage. The caller must guarantee that no live
    /// handle to this object remains.
    unsafe fn free(self) {
        match self {
            Self::String(v) => drop(Box::from_raw(v.ptr.as_ptr())),
            Self::Fun(v) => drop(Box::from_raw(v.ptr.as_ptr())),
            Self::Closure(v) => drop(Box::from_raw(v.ptr.as_ptr())),
            Self::Upvalue(v) => drop(Box::from_raw(v.ptr.as_ptr())),
            Self::Class(v) => drop(Box::from_raw(v.ptr.as_ptr())),
            Self::Instance(v) => drop(Box::from_raw(v.ptr.as_ptr())),
            Self::BoundMethod(v) => drop(Box::from_raw(v.ptr.as_ptr())),
        }
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => write!(f, "{}", v),
            Self::Fun(v) => write!(f, "{}", v),
            Self::Closure(v) => write!(f, "{}", v),
            Self::Upvalue(_) => write!(f, "upvalue"),
            Self::Class(v) => write!(f, "{}", v.borrow()),
            Self::Instance(v) => write!(f, "{}", v.borrow()),
            Self::BoundMethod(v) => write!(f, "{}", v),
        }
    }
}

/// The allocator and garbage collector for all Lox heap objects.
///
/// Every object is linked into an intrusive all-objects list the moment it is
/// allocated, so a collection between two allocations always sees both. The
/// collector is a stop-the-world tri-color mark-sweep: the mutator marks its
/// roots, [`Heap::collect`] traces the gray worklist to a fixpoint, drops
/// intern-table entries whose string died, and sweeps the unmarked remainder.
pub struct Heap {
    head: Option<Object>,
    strings: Table,
    gray: Vec<Object>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("bytes_allocated", &self.bytes_allocated)
            .field("next_gc", &self.next_gc)
            .finish()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self {
            head: None,
            strings: Table::default(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: GC_NEXT_INITIAL,
        }
    }
}

impl Heap {
    fn alloc<T>(&mut self, data: T, wrap: fn(Gc<T>) -> Object) -> Gc<T> {
        let boxed = Box::new(GcBox {
            header: GcHeader {
                marked: Cell::new(false),
                next: Cell::new(self.head),
            },
            data,
        });
        let gc = Gc {
            ptr: NonNull::from(Box::leak(boxed)),
        };
        let object = wrap(gc);
        self.bytes_allocated += object.size();
        self.head = Some(object);
        #[cfg(feature = "log-gc")]
        eprintln!(
            "-- gc allocate {} bytes for {}",
            object.size(),
            object
        );
        gc
    }

    /// Allocate a function object.
    pub fn alloc_fun(&mut self, fun: ObjFun) -> Gc<ObjFun> {
        self.alloc(fun, Object::Fun)
    }

    /// Allocate a closure object.
    pub fn alloc_closure(&mut self, closure: ObjClosure) -> Gc<ObjClosure> {
        self.alloc(closure, Object::Closure)
    }

    /// Allocate an upvalue object.
    pub fn alloc_upvalue(&mut self, upvalue: ObjUpvalue) -> Gc<RefCell<ObjUpvalue>> {
        self.alloc(RefCell::new(upvalue), Object::Upvalue)
    }

    /// Allocate a class object.
    pub fn alloc_class(&mut self, class: ObjClass) -> Gc<RefCell<ObjClass>> {
        self.alloc(RefCell::new(class), Object::Class)
    }

    /// Allocate an instance object.
    pub fn alloc_instance(&mut self, instance: ObjInstance) -> Gc<RefCell<ObjInstance>> {
        self.alloc(RefCell::new(instance), Object::Instance)
    }

    /// Allocate a bound method object.
    pub fn alloc_bound_method(&mut self, bound: ObjBoundMethod) -> Gc<ObjBoundMethod> {
        self.alloc(bound, Object::BoundMethod)
    }

    /// Get the canonical string object for the given contents, allocating one
    /// if it was never interned. Two equal strings always intern to the same
    /// object, so string equality is handle identity.
    pub fn intern(&mut self, s: &str) -> Gc<ObjString> {
        let hash = hash_str(s);
        if let Some(existing) = self.strings.find_string(s, hash) {
            return existing;
        }
        let string = self.alloc(
            ObjString {
                chars: s.to_string(),
                hash,
            },
            Object::String,
        );
        self.strings.set(string, Value::Nil);
        string
    }

    /// Number of bytes currently attributed to live objects.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Whether enough has been allocated since the last collection that the
    /// mutator should collect at its next safepoint.
    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    /// Paint a value's object gray, scheduling it for tracing.
    pub fn mark_value(&mut self, value: &Value) {
        match value {
            Value::Nil | Value::Bool(_) | Value::Number(_) => {}
            Value::String(v) => self.mark_object(Object::String(*v)),
            Value::NativeFun(f) => self.mark_object(Object::String(f.name)),
            Value::Fun(v) => self.mark_object(Object::Fun(*v)),
            Value::Closure(v) => self.mark_object(Object::Closure(*v)),
            Value::Class(v) => self.mark_object(Object::Class(*v)),
            Value::Instance(v) => self.mark_object(Object::Instance(*v)),
            Value::BoundMethod(v) => self.mark_object(Object::BoundMethod(*v)),
        }
    }

    /// Paint an object gray, scheduling it for tracing.
    pub fn mark_object(&mut self, object: Object) {
        if object.header().marked.get() {
            return;
        }
        object.header().marked.set(true);
        #[cfg(feature = "log-gc")]
        eprintln!("-- gc mark {}", object);
        self.gray.push(object);
    }

    /// Paint every key and value of a table gray.
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(Object::String(key));
            self.mark_value(value);
        }
    }

    /// Run a collection. The caller must have painted all of its roots via
    /// the `mark_*` methods; everything not reachable from them is freed.
    pub fn collect(&mut self) {
        #[cfg(feature = "log-gc")]
        let before = self.bytes_allocated;

        self.trace_references();
        self.strings.remove_white();
        self.sweep();
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;

        #[cfg(feature = "log-gc")]
        eprintln!(
            "-- gc collected {} bytes (from {} to {}) next at {}",
            before - self.bytes_allocated,
            before,
            self.bytes_allocated,
            self.next_gc,
        );
    }

    fn trace_references(&mut self) {
        while let Some(object) = self.gray.pop() {
            self.blacken(object);
        }
    }

    fn blacken(&mut self, object: Object) {
        match object {
            Object::String(_) => {}
            Object::Fun(fun) => {
                if let Some(name) = fun.name {
                    self.mark_object(Object::String(name));
                }
                for constant in fun.chunk.constants() {
                    self.mark_value(constant);
                }
            }
            Object::Closure(closure) => {
                self.mark_object(Object::Fun(closure.fun));
                for upvalue in &closure.upvalues {
                    self.mark_object(Object::Upvalue(*upvalue));
                }
            }
            Object::Upvalue(upvalue) => match &*upvalue.borrow() {
                ObjUpvalue::Open(_) => {}
                ObjUpvalue::Closed(value) => self.mark_value(value),
            },
            Object::Class(class) => {
                let class = class.borrow();
                self.mark_object(Object::String(class.name));
                for (key, value) in class.methods.iter() {
                    self.mark_object(Object::String(key));
                    self.mark_value(value);
                }
            }
            Object::Instance(instance) => {
                let instance = instance.borrow();
                self.mark_object(Object::Class(instance.class));
                for (key, value) in instance.fields.iter() {
                    self.mark_object(Object::String(key));
                    self.mark_value(value);
                }
            }
            Object::BoundMethod(bound) => {
                self.mark_value(&bound.receiver);
                self.mark_object(Object::Closure(bound.method));
            }
        }
    }

    fn sweep(&mut self) {
        let mut prev: Option<Object> = None;
        let mut cursor = self.head;
        while let Some(object) = cursor {
            let next = object.header().next.get();
            if object.header().marked.get() {
                object.header().marked.set(false);
                prev = Some(object);
            } else {
                match prev {
                    Some(p) => p.header().next.set(next),
                    None => self.head = next,
                }
                self.bytes_allocated -= object.size();
                #[cfg(feature = "log-gc")]
                eprintln!("-- gc free {}", object);
                unsafe { object.free() };
            }
            cursor = next;
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut cursor = self.head;
        while let Some(object) = cursor {
            cursor = object.header().next.get();
            unsafe { object.free() };
        }
    }
}
