use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    compile, Error, Gc, Heap, NativeFun, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance,
    ObjString, ObjUpvalue, Object, OpCode, RuntimeError, Table, Value, MAX_FRAMES, MAX_STACK,
};

#[cfg(feature = "trace-execution")]
use crate::{disassemble_chunk, disassemble_instruction};

/// A single ongoing function call. Its window into the value stack starts at
/// `slots`, where slot 0 holds the callee (or `this` inside a method).
#[derive(Debug)]
struct CallFrame {
    closure: Gc<ObjClosure>,
    ip: usize,
    slots: usize,
}

/// A bytecode virtual machine for the Lox programming language
pub struct VM {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    open_upvalues: Vec<Gc<RefCell<ObjUpvalue>>>,
    init_string: Gc<ObjString>,
    heap: Heap,
    output: Box<dyn Write>,
}

impl fmt::Debug for VM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VM")
            .field("stack", &self.stack)
            .field("frames", &self.frames)
            .field("heap", &self.heap)
            .finish_non_exhaustive()
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

fn native_clock(_args: &[Value]) -> Value {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Value::Number(elapsed.as_secs_f64())
}

impl VM {
    /// Create a new virtual machine that prints to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Create a new virtual machine that prints to the given output.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        let mut heap = Heap::default();
        let init_string = heap.intern("init");
        let mut vm = Self {
            stack: Vec::with_capacity(MAX_STACK),
            frames: Vec::with_capacity(MAX_FRAMES),
            globals: Table::default(),
            open_upvalues: Vec::new(),
            init_string,
            heap,
            output,
        };
        vm.define_native("clock", 0, native_clock);
        vm
    }

    fn define_native(&mut self, name: &str, arity: u8, call: fn(&[Value]) -> Value) {
        let name = self.heap.intern(name);
        self.globals
            .set(name, Value::NativeFun(NativeFun { name, arity, call }));
    }

    /// Compile and run the given source code.
    ///
    /// Globals and interned strings survive across calls, so a REPL can feed
    /// one line at a time to the same machine. Compile and runtime
    /// diagnostics are printed to stderr; a runtime error also resets the
    /// value and frame stacks.
    pub fn interpret(&mut self, src: &str) -> Result<(), Error> {
        let fun = compile(src, &mut self.heap).ok_or(Error::Compile)?;

        #[cfg(feature = "trace-execution")]
        disassemble_chunk(&fun.chunk, "code");

        let closure = self.heap.alloc_closure(ObjClosure {
            fun,
            upvalues: Vec::new(),
        });
        self.run_script(closure).map_err(|err| {
            self.report_runtime_error(&err);
            Error::Runtime
        })
    }

    fn run_script(&mut self, closure: Gc<ObjClosure>) -> Result<(), RuntimeError> {
        self.push(Value::Closure(closure))?;
        self.call_closure(closure, 0)?;
        self.run()
    }

    fn report_runtime_error(&mut self, err: &RuntimeError) {
        eprintln!("{}", err);
        for frame in self.frames.iter().rev() {
            let fun = &frame.closure.fun;
            let (_, pos) = fun.chunk.read_instruction(frame.ip.saturating_sub(1));
            match &fun.name {
                None => eprintln!("[line {}] in script", pos.line),
                Some(name) => eprintln!("[line {}] in {}()", pos.line, name),
            }
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let (closure, slots, ip) = {
                let frame = self.frames.last_mut().expect("Call frame must be present.");
                let ip = frame.ip;
                frame.ip += 1;
                (frame.closure, frame.slots, ip)
            };

            #[cfg(feature = "trace-execution")]
            {
                print_stack_trace(&self.stack);
                disassemble_instruction(&closure.fun.chunk, ip);
            }

            let (opcode, _) = closure.fun.chunk.read_instruction(ip);
            match opcode {
                OpCode::Constant(const_id) => {
                    let val = closure.fun.chunk.read_const(*const_id).clone();
                    self.push(val)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::GetLocal(slot) => {
                    let local = self.stack[slots + *slot as usize].clone();
                    self.push(local)?;
                }
                OpCode::SetLocal(slot) => {
                    let val = self.peek(0)?.clone();
                    self.stack[slots + *slot as usize] = val;
                }
                OpCode::GetGlobal(const_id) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let val = match self.globals.get(name) {
                        Some(val) => val.clone(),
                        None => {
                            return Err(RuntimeError::UndefinedVariable(name.chars.clone()));
                        }
                    };
                    self.push(val)?;
                }
                OpCode::DefineGlobal(const_id) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let val = self.peek(0)?.clone();
                    self.globals.set(name, val);
                    self.pop()?;
                }
                OpCode::SetGlobal(const_id) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    if self.globals.get(name).is_none() {
                        return Err(RuntimeError::UndefinedVariable(name.chars.clone()));
                    }
                    let val = self.peek(0)?.clone();
                    self.globals.set(name, val);
                }
                OpCode::GetUpvalue(slot) => {
                    let upvalue = closure.upvalues[*slot as usize];
                    let val = match &*upvalue.borrow() {
                        ObjUpvalue::Open(stack_slot) => self.stack[*stack_slot].clone(),
                        ObjUpvalue::Closed(val) => val.clone(),
                    };
                    self.push(val)?;
                }
                OpCode::SetUpvalue(slot) => {
                    let val = self.peek(0)?.clone();
                    let upvalue = closure.upvalues[*slot as usize];
                    match &mut *upvalue.borrow_mut() {
                        ObjUpvalue::Open(stack_slot) => self.stack[*stack_slot] = val,
                        ObjUpvalue::Closed(closed) => *closed = val,
                    };
                }
                OpCode::GetProperty(const_id) => {
                    let instance = match self.peek(0)? {
                        Value::Instance(instance) => *instance,
                        _ => return Err(RuntimeError::PropertyOnNonInstance),
                    };
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let field = instance.borrow().fields.get(name).cloned();
                    match field {
                        Some(val) => {
                            self.pop()?;
                            self.push(val)?;
                        }
                        None => {
                            let class = instance.borrow().class;
                            self.bind_method(class, name)?;
                        }
                    }
                }
                OpCode::SetProperty(const_id) => {
                    let instance = match self.peek(1)? {
                        Value::Instance(instance) => *instance,
                        _ => return Err(RuntimeError::FieldOnNonInstance),
                    };
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let val = self.peek(0)?.clone();
                    instance.borrow_mut().fields.set(name, val);
                    // Assignment is an expression, so the written value stays
                    // on the stack where the instance used to be.
                    let val = self.pop()?;
                    self.pop()?;
                    self.push(val)?;
                }
                OpCode::GetSuper(const_id) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let superclass = *self.pop()?.as_class();
                    self.bind_method(superclass, name)?;
                }
                OpCode::Equal => {
                    let v2 = self.pop()?;
                    let v1 = self.peek_mut(0)?;
                    *v1 = Value::Bool(*v1 == v2);
                }
                OpCode::Greater => {
                    let v2 = self.pop()?;
                    let v1 = self.peek_mut(0)?;
                    *v1 = v1.gt(&v2)?;
                }
                OpCode::Less => {
                    let v2 = self.pop()?;
                    let v1 = self.peek_mut(0)?;
                    *v1 = v1.lt(&v2)?;
                }
                OpCode::Add => {
                    let rhs = self.peek(0)?.clone();
                    let lhs = self.peek(1)?.clone();
                    match (lhs, rhs) {
                        (Value::Number(n1), Value::Number(n2)) => {
                            self.pop()?;
                            let v1 = self.peek_mut(0)?;
                            *v1 = Value::Number(n1 + n2);
                        }
                        (Value::String(s1), Value::String(s2)) => {
                            // Interning may collect, so the operands stay on
                            // the stack until the result exists.
                            let res = format!("{}{}", s1.chars, s2.chars);
                            let res = self.intern(&res);
                            self.pop()?;
                            self.pop()?;
                            self.push(Value::String(res))?;
                        }
                        _ => return Err(RuntimeError::InvalidAddOperands),
                    }
                }
                OpCode::Subtract => {
                    let v2 = self.pop()?;
                    let v1 = self.peek_mut(0)?;
                    *v1 = (&*v1 - &v2)?;
                }
                OpCode::Multiply => {
                    let v2 = self.pop()?;
                    let v1 = self.peek_mut(0)?;
                    *v1 = (&*v1 * &v2)?;
                }
                OpCode::Divide => {
                    let v2 = self.pop()?;
                    let v1 = self.peek_mut(0)?;
                    *v1 = (&*v1 / &v2)?;
                }
                OpCode::Not => {
                    let v = self.peek_mut(0)?;
                    *v = !&*v;
                }
                OpCode::Negate => {
                    let v = self.peek_mut(0)?;
                    *v = (-&*v)?;
                }
                OpCode::Print => {
                    let val = self.pop()?;
                    writeln!(self.output, "{}", val)?;
                    self.output.flush()?;
                }
                OpCode::Jump(offset) => {
                    let frame = self.frames.last_mut().expect("Call frame must be present.");
                    frame.ip += *offset as usize;
                }
                OpCode::JumpIfFalse(offset) => {
                    if self.peek(0)?.is_falsey() {
                        let offset = *offset as usize;
                        let frame = self.frames.last_mut().expect("Call frame must be present.");
                        frame.ip += offset;
                    }
                }
                OpCode::Loop(offset) => {
                    let frame = self.frames.last_mut().expect("Call frame must be present.");
                    frame.ip -= *offset as usize;
                }
                OpCode::Call(argc) => {
                    let callee = self.peek(*argc as usize)?.clone();
                    self.call_value(callee, *argc)?;
                }
                OpCode::Invoke(const_id, argc) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    self.invoke(name, *argc)?;
                }
                OpCode::SuperInvoke(const_id, argc) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let superclass = *self.pop()?.as_class();
                    self.invoke_from_class(superclass, name, *argc)?;
                }
                OpCode::Closure(const_id, upvalue_descriptors) => {
                    let fun = *closure.fun.chunk.read_const(*const_id).as_fun();
                    let mut upvalues = Vec::with_capacity(upvalue_descriptors.len());
                    for descriptor in upvalue_descriptors {
                        if descriptor.is_local {
                            upvalues
                                .push(self.capture_upvalue(slots + descriptor.index as usize));
                        } else {
                            upvalues.push(closure.upvalues[descriptor.index as usize]);
                        }
                    }
                    let new_closure = self.alloc_closure(ObjClosure { fun, upvalues });
                    self.push(Value::Closure(new_closure))?;
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop()?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().expect("Call frame must be present.");
                    self.close_upvalues(frame.slots);
                    if self.frames.is_empty() {
                        // pop the script closure and exit the interpreter
                        self.pop()?;
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }
                OpCode::Class(const_id) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let class = self.alloc_class(ObjClass::new(name));
                    self.push(Value::Class(class))?;
                }
                OpCode::Inherit => {
                    let superclass = match self.peek(1)? {
                        Value::Class(class) => *class,
                        _ => return Err(RuntimeError::SuperclassNotClass),
                    };
                    let subclass = *self.peek(0)?.as_class();
                    subclass
                        .borrow_mut()
                        .methods
                        .add_all(&superclass.borrow().methods);
                    self.pop()?;
                }
                OpCode::Method(const_id) => {
                    let name = *closure.fun.chunk.read_const(*const_id).as_str();
                    let method = self.peek(0)?.clone();
                    let class = *self.peek(1)?.as_class();
                    class.borrow_mut().methods.set(name, method);
                    self.pop()?;
                }
            }
        }
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Class(class) => self.call_class(class, argc),
            Value::BoundMethod(bound) => {
                // The receiver takes over the callee slot so the method sees
                // it as `this` in slot 0.
                let receiver = bound.receiver.clone();
                let callee_slot = self.stack.len() - argc as usize - 1;
                self.stack[callee_slot] = receiver;
                self.call_closure(bound.method, argc)
            }
            Value::NativeFun(native) => self.call_native(&native, argc),
            _ => Err(RuntimeError::InvalidCall),
        }
    }

    fn call_closure(&mut self, closure: Gc<ObjClosure>, argc: u8) -> Result<(), RuntimeError> {
        if argc != closure.fun.arity {
            return Err(RuntimeError::ArityMismatch {
                expected: closure.fun.arity,
                got: argc,
            });
        }
        if self.frames.len() == MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - argc as usize - 1,
        });
        Ok(())
    }

    fn call_class(
        &mut self,
        class: Gc<RefCell<ObjClass>>,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let instance = self.alloc_instance(ObjInstance::new(class));
        let callee_slot = self.stack.len() - argc as usize - 1;
        self.stack[callee_slot] = Value::Instance(instance);

        let init = class.borrow().methods.get(self.init_string).cloned();
        match init {
            Some(init) => self.call_closure(*init.as_closure(), argc),
            None if argc != 0 => Err(RuntimeError::ArityMismatch {
                expected: 0,
                got: argc,
            }),
            None => Ok(()),
        }
    }

    fn call_native(&mut self, native: &NativeFun, argc: u8) -> Result<(), RuntimeError> {
        if argc != native.arity {
            return Err(RuntimeError::ArityMismatch {
                expected: native.arity,
                got: argc,
            });
        }
        let args_start = self.stack.len() - argc as usize;
        let result = (native.call)(&self.stack[args_start..]);
        self.stack.truncate(args_start - 1);
        self.push(result)
    }

    fn invoke(&mut self, name: Gc<ObjString>, argc: u8) -> Result<(), RuntimeError> {
        let instance = match self.peek(argc as usize)? {
            Value::Instance(instance) => *instance,
            _ => return Err(RuntimeError::MethodOnNonInstance),
        };
        // A field holding a callable shadows a method of the same name.
        let field = instance.borrow().fields.get(name).cloned();
        match field {
            Some(field) => {
                let callee_slot = self.stack.len() - argc as usize - 1;
                self.stack[callee_slot] = field.clone();
                self.call_value(field, argc)
            }
            None => {
                let class = instance.borrow().class;
                self.invoke_from_class(class, name, argc)
            }
        }
    }

    fn invoke_from_class(
        &mut self,
        class: Gc<RefCell<ObjClass>>,
        name: Gc<ObjString>,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let method = class.borrow().methods.get(name).cloned();
        match method {
            Some(method) => self.call_closure(*method.as_closure(), argc),
            None => Err(RuntimeError::UndefinedProperty(name.chars.clone())),
        }
    }

    fn bind_method(
        &mut self,
        class: Gc<RefCell<ObjClass>>,
        name: Gc<ObjString>,
    ) -> Result<(), RuntimeError> {
        let method = match class.borrow().methods.get(name) {
            Some(method) => *method.as_closure(),
            None => return Err(RuntimeError::UndefinedProperty(name.chars.clone())),
        };
        let bound = self.alloc_bound_method(ObjBoundMethod {
            receiver: self.peek(0)?.clone(),
            method,
        });
        self.pop()?;
        self.push(Value::BoundMethod(bound))
    }

    /// Find or create the upvalue capturing the given stack slot. Every
    /// closure capturing the same slot shares one upvalue, which is what
    /// makes sibling closures see each other's writes.
    fn capture_upvalue(&mut self, slot: usize) -> Gc<RefCell<ObjUpvalue>> {
        for upvalue in &self.open_upvalues {
            match *upvalue.borrow() {
                ObjUpvalue::Open(open_slot) if open_slot == slot => return *upvalue,
                _ => {}
            }
        }
        let upvalue = self.alloc_upvalue(ObjUpvalue::Open(slot));
        self.open_upvalues.push(upvalue);
        upvalue
    }

    /// Close every open upvalue pointing at `last` or above, moving the
    /// captured value off the stack and into the upvalue itself.
    fn close_upvalues(&mut self, last: usize) {
        let mut idx = 0;
        while idx < self.open_upvalues.len() {
            let upvalue = self.open_upvalues[idx];
            let slot = match *upvalue.borrow() {
                ObjUpvalue::Open(slot) if slot >= last => Some(slot),
                _ => None,
            };
            match slot {
                Some(slot) => {
                    *upvalue.borrow_mut() = ObjUpvalue::Closed(self.stack[slot].clone());
                    self.open_upvalues.swap_remove(idx);
                }
                None => idx += 1,
            }
        }
    }

    fn intern(&mut self, s: &str) -> Gc<ObjString> {
        self.collect_if_needed();
        self.heap.intern(s)
    }

    fn alloc_closure(&mut self, closure: ObjClosure) -> Gc<ObjClosure> {
        self.collect_if_needed();
        self.heap.alloc_closure(closure)
    }

    fn alloc_upvalue(&mut self, upvalue: ObjUpvalue) -> Gc<RefCell<ObjUpvalue>> {
        self.collect_if_needed();
        self.heap.alloc_upvalue(upvalue)
    }

    fn alloc_class(&mut self, class: ObjClass) -> Gc<RefCell<ObjClass>> {
        self.collect_if_needed();
        self.heap.alloc_class(class)
    }

    fn alloc_instance(&mut self, instance: ObjInstance) -> Gc<RefCell<ObjInstance>> {
        self.collect_if_needed();
        self.heap.alloc_instance(instance)
    }

    fn alloc_bound_method(&mut self, bound: ObjBoundMethod) -> Gc<ObjBoundMethod> {
        self.collect_if_needed();
        self.heap.alloc_bound_method(bound)
    }

    fn collect_if_needed(&mut self) {
        if cfg!(feature = "stress-gc") || self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        #[cfg(feature = "log-gc")]
        eprintln!("-- gc begin");

        for value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_object(Object::Closure(frame.closure));
        }
        for upvalue in &self.open_upvalues {
            self.heap.mark_object(Object::Upvalue(*upvalue));
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_object(Object::String(self.init_string));
        self.heap.collect();
    }

    fn peek(&self, steps: usize) -> Result<&Value, RuntimeError> {
        let idx = self
            .stack
            .len()
            .checked_sub(steps + 1)
            .ok_or(RuntimeError::StackUnderflow)?;
        self.stack.get(idx).ok_or(RuntimeError::StackUnderflow)
    }

    fn peek_mut(&mut self, steps: usize) -> Result<&mut Value, RuntimeError> {
        let idx = self
            .stack
            .len()
            .checked_sub(steps + 1)
            .ok_or(RuntimeError::StackUnderflow)?;
        self.stack.get_mut(idx).ok_or(RuntimeError::StackUnderflow)
    }

    fn push(&mut self, val: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == MAX_STACK {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(val);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }
}

#[cfg(feature = "trace-execution")]
fn print_stack_trace(stack: &[Value]) {
    print!("          ");
    for val in stack {
        print!("[ {} ]", val);
    }
    println!();
}
