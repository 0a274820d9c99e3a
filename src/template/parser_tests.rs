use pretty_assertions::assert_eq;

use super::*;

fn call(name: &str, args: Vec<TemplateExpression>) -> TemplateExpression {
    TemplateExpression::Function(FunctionCall {
        name: name.to_string(),
        args,
        properties: vec![],
    })
}

#[test]
fn plain_strings_are_not_expressions() {
    assert!(!is_expression("just a name"));
    assert!(!is_expression("[unbalanced"));
    assert!(!is_expression("ends]"));
    assert!(is_expression("[parameters('x')]"));
}

#[test]
fn double_bracket_escapes_a_literal() {
    assert!(!is_expression("[[not(evaluated)]"));
    assert_eq!(unescape_literal("[[not(evaluated)]"), "[not(evaluated)]");
    assert_eq!(unescape_literal("plain"), "plain");
}

#[test]
fn parses_a_simple_call() {
    let parsed = parse_expression("[resourceGroup()]").unwrap();
    assert_eq!(parsed, call("resourceGroup", vec![]));
}

#[test]
fn parses_nested_calls_with_literals() {
    let parsed = parse_expression("[concat(parameters('prefix'), '-suffix', 2)]").unwrap();
    assert_eq!(
        parsed,
        call(
            "concat",
            vec![
                call(
                    "parameters",
                    vec![TemplateExpression::String("prefix".to_string())]
                ),
                TemplateExpression::String("-suffix".to_string()),
                TemplateExpression::Integer(2),
            ]
        )
    );
}

#[test]
fn parses_doubled_quote_escape() {
    let parsed = parse_expression("[concat('it''s')]").unwrap();
    assert_eq!(
        parsed,
        call(
            "concat",
            vec![TemplateExpression::String("it's".to_string())]
        )
    );
}

#[test]
fn parses_negative_integers() {
    let parsed = parse_expression("[copyIndex(-1)]").unwrap();
    assert_eq!(parsed, call("copyIndex", vec![TemplateExpression::Integer(-1)]));
}

#[test]
fn parses_property_and_index_access() {
    let parsed = parse_expression("[reference('store').sku.tier]").unwrap();
    match parsed {
        TemplateExpression::Function(function) => {
            assert_eq!(function.name, "reference");
            assert_eq!(
                function.properties,
                vec![
                    PropertyAccess::Field("sku".to_string()),
                    PropertyAccess::Field("tier".to_string()),
                ]
            );
        }
        other => panic!("expected function, got {:?}", other),
    }

    let parsed = parse_expression("[variables('list')[0]]").unwrap();
    match parsed {
        TemplateExpression::Function(function) => {
            assert_eq!(
                function.properties,
                vec![PropertyAccess::Index(TemplateExpression::Integer(0))]
            );
        }
        other => panic!("expected function, got {:?}", other),
    }
}

#[test]
fn parses_namespaced_user_functions() {
    let parsed = parse_expression("[contoso.uniqueName('x')]").unwrap();
    match parsed {
        TemplateExpression::Function(function) => {
            assert_eq!(function.name, "contoso.uniqueName");
        }
        other => panic!("expected function, got {:?}", other),
    }
}

#[test]
fn tolerates_whitespace() {
    let parsed = parse_expression("[ if( true() , 'a' , 'b' ) ]").unwrap();
    match parsed {
        TemplateExpression::Function(function) => {
            assert_eq!(function.name, "if");
            assert_eq!(function.args.len(), 3);
        }
        other => panic!("expected function, got {:?}", other),
    }
}

#[test]
fn rejects_malformed_expressions() {
    assert!(parse_expression("[concat('a'").is_err());
    assert!(parse_expression("[concat('a' 'b')]").is_err());
    assert!(parse_expression("[123abc()]").is_err());
    assert!(parse_expression("[]").is_err());
}
