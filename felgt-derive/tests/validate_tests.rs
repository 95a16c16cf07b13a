#[test]
fn validate_macro_tests() {
    let t = trybuild::TestCases::new();

    t.pass("tests/ok/basic_valid.rs");
    t.pass("tests/ok/struct_rules.rs");
    t.pass("tests/ok/skip_field.rs");
    t.pass("tests/ok/optional_field.rs");
    t.pass("tests/ok/nit_rule.rs");
    t.pass("tests/ok/result_alias.rs");
}
