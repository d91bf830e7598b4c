use eql_ir::{
    BindingExpr, CMMode, Cardinal, Expr, NameGen, abstract_over_expr, alpha_equivalent,
    instantiate_expr,
};
use proptest::{
    prelude::prop,
    prop_oneof,
    strategy::{Just, Strategy},
    test_runner::{Config, TestCaseError, TestRunner},
};

fn cardinal() -> impl Strategy<Value = Cardinal> {
    prop_oneof![Just(Cardinal::Zero), Just(Cardinal::One), Just(Cardinal::Inf)]
}

fn mode() -> impl Strategy<Value = CMMode> {
    prop_oneof![
        Just(CMMode::ONE),
        Just(CMMode::AT_MOST_ONE),
        Just(CMMode::AT_LEAST_ONE),
        Just(CMMode::ANY),
    ]
}

fn check(cond: bool, what: &str) -> Result<(), TestCaseError> {
    if cond {
        Ok(())
    } else {
        Err(TestCaseError::fail(what.to_string()))
    }
}

#[test]
fn cardinal_semiring_laws() {
    let mut runner = TestRunner::new(Config {
        cases: 128,
        ..Config::default()
    });
    runner
        .run(&(cardinal(), cardinal(), cardinal()), |(a, b, c)| {
            check(a + b == b + a, "addition commutes")?;
            check((a + b) + c == a + (b + c), "addition associates")?;
            check(Cardinal::Zero + a == a, "zero is the additive identity")?;
            check(Cardinal::One * a == a, "one is the multiplicative identity")?;
            check((a * b) * c == a * (b * c), "multiplication associates")?;
            check(a <= b || b <= a, "order is total")?;
            if a <= b && b <= c {
                check(a <= c, "order is transitive")?;
            }
            Ok(())
        })
        .expect("cardinal laws");
}

#[test]
fn mode_arithmetic_laws() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        ..Config::default()
    });
    runner
        .run(&(mode(), mode(), mode()), |(a, b, c)| {
            check(a + b == b + a, "union commutes")?;
            check((a + b) + c == a + (b + c), "union associates")?;
            check(a * b == b * a, "product commutes")?;
            check(CMMode::ONE * a == a, "one is the product identity")?;
            check(a.lower <= a.upper && (a + b).lower <= (a + b).upper, "lower <= upper")?;
            check(a.is_subcard_of(CMMode::ANY), "everything fits in any")?;
            Ok(())
        })
        .expect("mode laws");
}

fn var_name() -> impl Strategy<Value = String> {
    prop_oneof![Just("x"), Just("y"), Just("z")].prop_map(str::to_string)
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (0i64..5).prop_map(Expr::int),
        var_name().prop_map(Expr::BoundVar),
        var_name().prop_map(Expr::FreeVar),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Expr::UnnamedTuple),
            (inner.clone(), "[a-c]").prop_map(|(e, l)| Expr::proj(e, l)),
            (var_name(), inner.clone(), inner)
                .prop_map(|(v, bound, body)| Expr::with(bound, BindingExpr::new(v, body))),
        ]
    })
}

#[test]
fn instantiate_then_abstract_is_alpha_equivalent() {
    let mut runner = TestRunner::new(Config {
        cases: 128,
        ..Config::default()
    });
    runner
        .run(&(var_name(), arb_expr()), |(var, body)| {
            let names = NameGen::new();
            let original = BindingExpr::new(var, body);
            let fresh = names.fresh("y");
            let opened = instantiate_expr(&names, &Expr::FreeVar(fresh.clone()), &original);
            let closed = abstract_over_expr(&names, &opened, &fresh);
            check(
                alpha_equivalent(
                    &Expr::Binding(Box::new(original)),
                    &Expr::Binding(Box::new(closed)),
                ),
                "round trip through a fresh name",
            )
        })
        .expect("alpha equivalence");
}

#[test]
fn alpha_equivalence_distinguishes_free_variables() {
    let a = Expr::Binding(Box::new(BindingExpr::new("x", Expr::FreeVar("x".into()))));
    let b = Expr::Binding(Box::new(BindingExpr::new("x", Expr::BoundVar("x".into()))));
    assert!(!alpha_equivalent(&a, &b));
}
