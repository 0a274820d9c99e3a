use std::env;
use std::fs;

use indoc::indoc;
use pretty_assertions::assert_eq;

use arm_guard::commands::analyze::Analyze;
use arm_guard::commands::{Executable, FAILURE_STATUS_CODE, SUCCESS_STATUS_CODE};
use arm_guard::utils::writer::{WriteBuffer, Writer};

const TEMPLATE: &str = indoc! {r#"
    {
      "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
      "contentVersion": "1.0.0.0",
      "resources": [
        {
          "type": "Microsoft.Web/sites",
          "name": "site",
          "apiVersion": "2021-02-01",
          "properties": {
            "httpsOnly": false
          }
        }
      ]
    }
"#};

const RULES: &str = indoc! {r#"
    [
      {
        "id": "TA-000004",
        "description": "Web apps should only be accessible over HTTPS",
        "recommendation": "Set properties.httpsOnly to true",
        "severity": 2,
        "evaluation": {
          "resourceType": "Microsoft.Web/sites",
          "path": "properties.httpsOnly",
          "equals": true
        }
      }
    ]
"#};

fn write_fixture(name: &str, contents: &str) -> String {
    let dir = env::temp_dir().join(format!("arm-guard-cmd-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn run(command: &Analyze) -> (i32, String) {
    let mut writer = Writer::new(WriteBuffer::Vec(vec![]));
    let code = command.execute(&mut writer).unwrap();
    (code, writer.into_string().unwrap())
}

#[test]
fn failing_template_exits_with_the_failure_code() {
    let command = Analyze {
        template: write_fixture("failing.json", TEMPLATE),
        parameters: None,
        rules: write_fixture("rules.json", RULES),
        config: None,
        source_map: None,
        strict: false,
    };
    let (code, output) = run(&command);
    assert_eq!(code, FAILURE_STATUS_CODE);

    let records: serde_json::Value = serde_json::from_str(&output).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["ruleId"], "TA-000004");
    assert_eq!(records[0]["passed"], false);
    assert_eq!(records[0]["fileIdentifier"], "failing.json");
    assert_eq!(
        records[0]["subEvaluations"][0]["result"]["path"],
        "resources[0].properties.httpsOnly"
    );
    assert_eq!(
        records[0]["subEvaluations"][0]["result"]["lineNumber"],
        10
    );
}

#[test]
fn passing_template_exits_clean() {
    let command = Analyze {
        template: write_fixture("passing.json", &TEMPLATE.replace("false", "true")),
        parameters: None,
        rules: write_fixture("rules-pass.json", RULES),
        config: None,
        source_map: None,
        strict: false,
    };
    let (code, _) = run(&command);
    assert_eq!(code, SUCCESS_STATUS_CODE);
}

#[test]
fn excluded_rules_do_not_run() {
    let command = Analyze {
        template: write_fixture("excluded.json", TEMPLATE),
        parameters: None,
        rules: write_fixture("rules-excl.json", RULES),
        config: Some(write_fixture(
            "config.json",
            r#"{ "exclusions": { "ids": ["TA-000004"] } }"#,
        )),
        source_map: None,
        strict: false,
    };
    let (code, output) = run(&command);
    assert_eq!(code, SUCCESS_STATUS_CODE);
    let records: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert!(records.as_array().unwrap().is_empty());
}
