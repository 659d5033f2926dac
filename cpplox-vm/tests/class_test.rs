// cpplox-vm - Class, instance, and inheritance tests
// Copyright (c) 2026 cpplox contributors. MIT licensed.

mod common;

use common::assert_prints;

#[test]
fn test_fields_and_method_on_this() {
    assert_prints(
        "class A { greet() { print \"hi \" + this.name; } }
         var a = A();
         a.name = \"Lox\";
         a.greet();",
        &["hi Lox"],
    );
}

#[test]
fn test_initializer_with_arguments() {
    assert_prints(
        "class Point {
           init(x, y) { this.x = x; this.y = y; }
           sum() { return this.x + this.y; }
         }
         var p = Point(3, 4);
         print p.sum();
         print Point(1, 2).x;",
        &["7", "1"],
    );
}

#[test]
fn test_initializer_implicitly_returns_this() {
    assert_prints(
        "class C { init() { this.v = 1; return; } }
         print C().v;",
        &["1"],
    );
}

#[test]
fn test_class_without_initializer_takes_no_arguments() {
    assert_prints("class Empty {} print Empty().v = 9;", &["9"]);
}

#[test]
fn test_bound_method_remembers_receiver() {
    assert_prints(
        "class A { m() { return this.tag; } }
         var a = A();
         a.tag = \"bound\";
         var m = a.m;
         print m();",
        &["bound"],
    );
}

#[test]
fn test_field_shadows_method() {
    assert_prints(
        "class B { m() { return \"method\"; } }
         fun f() { return \"field\"; }
         var b = B();
         print b.m();
         b.m = f;
         print b.m();",
        &["method", "field"],
    );
}

#[test]
fn test_methods_are_inherited() {
    assert_prints(
        "class Animal {
           speak() { return \"...\"; }
           kind() { return \"animal\"; }
         }
         class Dog < Animal {
           speak() { return \"woof\"; }
         }
         print Dog().speak();
         print Dog().kind();",
        &["woof", "animal"],
    );
}

#[test]
fn test_super_calls_the_overridden_method() {
    assert_prints(
        "class A { m() { print \"A\"; } }
         class B < A { m() { super.m(); print \"B\"; } }
         B().m();",
        &["A", "B"],
    );
}

#[test]
fn test_super_through_two_levels() {
    assert_prints(
        "class A { describe() { return \"A\"; } }
         class B < A { describe() { return super.describe() + \"B\"; } }
         class C < B { describe() { return super.describe() + \"C\"; } }
         print C().describe();",
        &["ABC"],
    );
}

#[test]
fn test_super_method_as_value() {
    assert_prints(
        "class A { m() { return \"from A\"; } }
         class B < A {
           grab() { var m = super.m; return m(); }
         }
         print B().grab();",
        &["from A"],
    );
}

#[test]
fn test_inherited_initializer_runs() {
    assert_prints(
        "class Base { init(v) { this.v = v; } }
         class Derived < Base {}
         print Derived(42).v;",
        &["42"],
    );
}

#[test]
fn test_invoking_method_directly_on_expression() {
    assert_prints(
        "class Greeter {
           init(name) { this.name = name; }
           hello() { return \"hello \" + this.name; }
         }
         print Greeter(\"world\").hello();",
        &["hello world"],
    );
}

#[test]
fn test_class_and_instance_formatting() {
    assert_prints("class Thing {} print Thing;", &["<class Thing>"]);
    assert_prints("class Thing {} print Thing();", &["Thing instance"]);
    assert_prints(
        "class Thing { m() {} } var t = Thing(); print t.m;",
        &["<fn m>"],
    );
}

#[test]
fn test_methods_can_call_each_other_through_this() {
    assert_prints(
        "class Calc {
           init() { this.total = 0; }
           add(n) { this.total = this.total + n; return this; }
           result() { return this.total; }
         }
         print Calc().add(2).add(3).result();",
        &["5"],
    );
}

#[test]
fn test_sibling_classes_have_separate_supers() {
    assert_prints(
        "class Base { id() { return \"base\"; } }
         class Left < Base { id() { return super.id() + \"-left\"; } }
         class Right < Base { id() { return super.id() + \"-right\"; } }
         print Left().id();
         print Right().id();",
        &["base-left", "base-right"],
    );
}
