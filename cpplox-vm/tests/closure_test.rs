// cpplox-vm - Closure and upvalue tests
// Copyright (c) 2026 cpplox contributors. MIT licensed.

mod common;

use common::assert_prints;

#[test]
fn test_counter_mutates_through_upvalue() {
    assert_prints(
        "fun counter() {
           var i = 0;
           fun tick() { i = i + 1; return i; }
           return tick;
         }
         var t = counter();
         print t();
         print t();
         print t();",
        &["1", "2", "3"],
    );
}

#[test]
fn test_each_closure_gets_its_own_environment() {
    assert_prints(
        "fun counter() {
           var i = 0;
           fun tick() { i = i + 1; return i; }
           return tick;
         }
         var a = counter();
         var b = counter();
         print a();
         print a();
         print b();",
        &["1", "2", "1"],
    );
}

#[test]
fn test_two_closures_share_one_variable() {
    assert_prints(
        "var inc;
         var get;
         {
           var shared = 10;
           fun bump() { shared = shared + 1; }
           fun read() { return shared; }
           inc = bump;
           get = read;
         }
         inc();
         inc();
         print get();",
        &["12"],
    );
}

#[test]
fn test_closure_captures_variable_not_value() {
    assert_prints(
        "var get;
         {
           var x = \"before\";
           fun read() { return x; }
           get = read;
           x = \"after\";
         }
         print get();",
        &["after"],
    );
}

#[test]
fn test_transitive_capture_through_nested_functions() {
    assert_prints(
        "fun outer() {
           var x = \"carried\";
           fun middle() {
             fun inner() { return x; }
             return inner;
           }
           return middle;
         }
         print outer()()();",
        &["carried"],
    );
}

#[test]
fn test_closed_upvalue_survives_the_frame() {
    assert_prints(
        "fun make(greeting) {
           fun greet(name) { return greeting + \" \" + name; }
           return greet;
         }
         var hello = make(\"hello\");
         var howdy = make(\"howdy\");
         print hello(\"world\");
         print howdy(\"lox\");",
        &["hello world", "howdy lox"],
    );
}

#[test]
fn test_block_scoped_capture_in_loop() {
    // Each iteration declares a fresh local, so each closure closes over
    // its own copy.
    assert_prints(
        "var first;
         var second;
         var i = 0;
         while (i < 2) {
           var snapshot = i;
           fun read() { return snapshot; }
           if (i == 0) first = read;
           else second = read;
           i = i + 1;
         }
         print first();
         print second();",
        &["0", "1"],
    );
}

#[test]
fn test_closure_as_argument() {
    assert_prints(
        "fun twice(f, x) { return f(f(x)); }
         fun add3(n) { return n + 3; }
         print twice(add3, 1);",
        &["7"],
    );
}
