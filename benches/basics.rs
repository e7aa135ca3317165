//! These benchmarks are whole Lox programs taken from the language's classic
//! benchmark suite, trimmed down so a run stays in the millisecond range.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lox::VM;

pub fn binary_trees(c: &mut Criterion) {
    let src = r#"
class Tree {
  init(item, depth) {
    this.item = item;
    this.depth = depth;
    if (depth > 0) {
      var item2 = item + item;
      depth = depth - 1;
      this.left = Tree(item2 - 1, depth);
      this.right = Tree(item2, depth);
    } else {
      this.left = nil;
      this.right = nil;
    }
  }

  check() {
    if (this.left == nil) {
      return this.item;
    }
    return this.item + this.left.check() - this.right.check();
  }
}

var minDepth = 4;
var maxDepth = 6;
var stretchDepth = maxDepth + 1;

Tree(0, stretchDepth).check();

var longLivedTree = Tree(0, maxDepth);

var iterations = 1;
var d = 0;
while (d < maxDepth) {
  iterations = iterations * 2;
  d = d + 1;
}

var depth = minDepth;
while (depth < stretchDepth) {
  var check = 0;
  var i = 1;
  while (i <= iterations) {
    check = check + Tree(i, depth).check() + Tree(-i, depth).check();
    i = i + 1;
  }
  iterations = iterations / 4;
  depth = depth + 2;
}

longLivedTree.check();
"#;
    c.bench_function("binary_trees", |b| {
        let mut vm = VM::default();
        b.iter(|| vm.interpret(black_box(src)));
    });
}

pub fn fib(c: &mut Criterion) {
    let src = r#"
fun fib(n) { if (n < 2) return n; return fib(n - 2) + fib(n - 1); }
fib(20);
"#;
    c.bench_function("fib_20", |b| {
        let mut vm = VM::default();
        b.iter(|| vm.interpret(black_box(src)));
    });
}

pub fn equality(c: &mut Criterion) {
    let src = r#"
var i = 0;
while (i < 10000) {
  i = i + 1;

  1 == 1; 1 == 2; 1 == nil; 1 == "str"; 1 == true;
  nil == nil; nil == 1; nil == "str"; nil == true;
  true == true; true == 1; true == false; true == "str"; true == nil;
  "str" == "str"; "str" == "stru"; "str" == 1; "str" == nil; "str" == true;
}
"#;
    c.bench_function("equality", |b| {
        let mut vm = VM::default();
        b.iter(|| vm.interpret(black_box(src)));
    });
}

pub fn instantiation(c: &mut Criterion) {
    let src = r#"
class Foo {
  init() {}
}
var i = 0;
while (i < 1000) {
  Foo(); Foo(); Foo(); Foo(); Foo(); Foo(); Foo(); Foo();
  Foo(); Foo(); Foo(); Foo(); Foo(); Foo(); Foo(); Foo();
  i = i + 1;
}
"#;
    c.bench_function("instantiation", |b| {
        let mut vm = VM::default();
        b.iter(|| vm.interpret(black_box(src)));
    });
}

pub fn method_call(c: &mut Criterion) {
    let src = r#"
class Toggle {
  init(startState) { this.state = startState; }
  value() { return this.state; }
  activate() {
    this.state = !this.state;
    return this;
  }
}
class NthToggle < Toggle {
  init(startState, maxCounter) {
    super.init(startState);
    this.countMax = maxCounter;
    this.count = 0;
  }
  activate() {
    this.count = this.count + 1;
    if (this.count >= this.countMax) {
      super.activate();
      this.count = 0;
    }
    return this;
  }
}
var n = 500;
var val = true;
var toggle = Toggle(val);
for (var i = 0; i < n; i = i + 1) {
  val = toggle.activate().value();
  val = toggle.activate().value();
  val = toggle.activate().value();
}
val = true;
var ntoggle = NthToggle(val, 3);
for (var i = 0; i < n; i = i + 1) {
  val = ntoggle.activate().value();
  val = ntoggle.activate().value();
  val = ntoggle.activate().value();
}
"#;
    c.bench_function("method_call", |b| {
        let mut vm = VM::default();
        b.iter(|| vm.interpret(black_box(src)));
    });
}

pub fn closures(c: &mut Criterion) {
    let src = r#"
fun makeCounter() {
  var count = 0;
  fun increment() {
    count = count + 1;
    return count;
  }
  return increment;
}

var counter = makeCounter();
var i = 0;
while (i < 10000) {
  counter();
  i = i + 1;
}
"#;
    c.bench_function("closures", |b| {
        let mut vm = VM::default();
        b.iter(|| vm.interpret(black_box(src)));
    });
}

pub fn zoo(c: &mut Criterion) {
    let src = r#"
class Zoo {
  init() {
    this.aarvark  = 1;
    this.baboon   = 1;
    this.cat      = 1;
    this.donkey   = 1;
    this.elephant = 1;
    this.fox      = 1;
  }
  ant()    { return this.aarvark; }
  banana() { return this.baboon; }
  tuna()   { return this.cat; }
  hay()    { return this.donkey; }
  grass()  { return this.elephant; }
  mouse()  { return this.fox; }
}

var zoo = Zoo();
var sum = 0;
while (sum < 10000) {
  sum = sum + zoo.ant()
            + zoo.banana()
            + zoo.tuna()
            + zoo.hay()
            + zoo.grass()
            + zoo.mouse();
}
"#;
    c.bench_function("zoo", |b| {
        let mut vm = VM::default();
        b.iter(|| vm.interpret(black_box(src)));
    });
}

criterion_group!(
    basics,
    binary_trees,
    closures,
    equality,
    fib,
    instantiation,
    method_call,
    zoo,
);
criterion_main!(basics);
