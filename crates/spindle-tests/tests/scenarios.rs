//! Pinned compilations: exact block-by-block output for a set of small
//! generator bodies. Block numbering and emission order are deterministic,
//! so these compare rendered blocks literally.

use spindle::ast::Value;
use spindle::{compile, CompileOptions, Expr};

fn rendered(body: Expr) -> Vec<String> {
    compile(body, &CompileOptions::default())
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[test]
fn repeat_with_a_single_yield() {
    // repeat { yield(1) }
    let body = Expr::repeat(Expr::yield_(Expr::lit(1)));
    assert_eq!(
        rendered(body),
        ["B1: goto(2)", "B2: pause(2, 1)", "B3: return(invisible)"]
    );
}

#[test]
fn repeat_with_code_after_the_yield() {
    // repeat { yield(1); "x" }
    let body = Expr::repeat(Expr::block(vec![
        Expr::yield_(Expr::lit(1)),
        Expr::lit("x"),
    ]));
    assert_eq!(
        rendered(body),
        [
            "B1: goto(2)",
            "B2: pause(3, 1)",
            "B3: \"x\"; goto(2)",
            "B4: return(invisible)"
        ]
    );
}

#[test]
fn while_true_with_a_single_yield() {
    // while (TRUE) yield(1)
    let body = Expr::while_(Expr::lit(true), Expr::yield_(Expr::lit(1)));
    assert_eq!(
        rendered(body),
        [
            "B1: if (TRUE) mblock(goto(2)) else mblock(goto(3))",
            "B2: pause(1, 1)",
            "B3: return(invisible)"
        ]
    );
}

#[test]
fn repeat_with_break_and_next_arms() {
    // repeat { "loop-after"; if (TRUE) break else next; "next-after" }
    let body = Expr::repeat(Expr::block(vec![
        Expr::lit("loop-after"),
        Expr::if_else(Expr::lit(true), Expr::Break, Expr::Next),
        Expr::lit("next-after"),
    ]));
    assert_eq!(
        rendered(body),
        [
            "B1: goto(2)",
            "B2: \"loop-after\"; if (TRUE) mblock(goto(4)) else mblock(goto(2))",
            "B3: \"next-after\"; goto(2)",
            "B4: return(invisible)"
        ]
    );
}

#[test]
fn for_over_a_sequence_with_a_yield() {
    // for (i in x) yield(1)
    let body = Expr::for_("i", Expr::sym("x"), Expr::yield_(Expr::lit(1)));
    assert_eq!(
        rendered(body),
        [
            "B1: _for_iter_1 <- iterator(x); goto(2)",
            "B2: if (has_next(_for_iter_1)) mblock(goto(3)) else mblock(goto(4))",
            "B3: i <- next(_for_iter_1); pause(2, 1)",
            "B4: return(invisible)"
        ]
    );
}

#[test]
fn non_yielding_repeat_stays_inside_the_first_block() {
    // { "before"; repeat NULL; yield(1); "after" }
    let body = Expr::block(vec![
        Expr::lit("before"),
        Expr::repeat(Expr::lit(Value::Null)),
        Expr::yield_(Expr::lit(1)),
        Expr::lit("after"),
    ]);
    assert_eq!(
        rendered(body),
        [
            "B1: \"before\"; repeat NULL; pause(2, 1)",
            "B2: return(\"after\")"
        ]
    );
}
