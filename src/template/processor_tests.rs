use indoc::indoc;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::template::functions::StandardFunctions;

const SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#";

fn process(template: &Value) -> ProcessedTemplate {
    process_with(template, None, ProcessorOptions::default()).unwrap()
}

fn process_with(
    template: &Value,
    parameters: Option<&str>,
    options: ProcessorOptions,
) -> Result<ProcessedTemplate> {
    let text = serde_json::to_string_pretty(template).unwrap();
    TemplateProcessor::new(&StandardFunctions, options).process(&text, parameters)
}

fn template(resources: Value) -> Value {
    json!({
        "$schema": SCHEMA,
        "contentVersion": "1.0.0.0",
        "resources": resources
    })
}

#[test]
fn rejects_non_deployment_schemas() {
    let bad = json!({ "$schema": "https://example.com/other.json", "resources": [] });
    let err = process_with(&bad, None, ProcessorOptions::default()).unwrap_err();
    assert!(matches!(err, Error::TemplateParse(_)));

    let no_resources = json!({ "$schema": SCHEMA });
    assert!(process_with(&no_resources, None, ProcessorOptions::default()).is_err());
}

#[test]
fn copy_loop_expands_to_count_instances() {
    let source = template(json!([{
        "type": "Microsoft.Storage/storageAccounts",
        "name": "[concat('storage', copyIndex())]",
        "apiVersion": "2021-04-01",
        "copy": { "name": "loop", "count": 3 },
        "properties": { "supportsHttpsTrafficOnly": true }
    }]));
    let processed = process(&source);

    let resources = processed.template["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 3);
    assert_eq!(resources[0]["name"], json!("storage0"));
    assert_eq!(resources[2]["name"], json!("storage2"));
    assert!(resources[0].get("copy").is_none());

    for index in 0..3 {
        assert_eq!(
            processed
                .mappings
                .to_original(&format!("resources[{}]", index)),
            "resources[0]"
        );
    }
}

#[test]
fn copy_count_accepts_expressions_over_parameters() {
    let source = json!({
        "$schema": SCHEMA,
        "parameters": { "instances": { "type": "int", "defaultValue": 2 } },
        "resources": [{
            "type": "Microsoft.Storage/storageAccounts",
            "name": "[concat('s', copyIndex('loop'))]",
            "apiVersion": "2021-04-01",
            "copy": { "name": "loop", "count": "[parameters('instances')]" }
        }]
    });
    let processed = process_with(&source, None, ProcessorOptions::default()).unwrap();
    assert_eq!(processed.template["resources"].as_array().unwrap().len(), 2);
}

#[test]
fn copy_count_zero_removes_the_resource() {
    let source = template(json!([
        {
            "type": "Microsoft.Storage/storageAccounts",
            "name": "[concat('s', copyIndex())]",
            "apiVersion": "2021-04-01",
            "copy": { "name": "loop", "count": 0 }
        },
        { "type": "Microsoft.Web/sites", "name": "site", "apiVersion": "2021-01-01" }
    ]));
    let processed = process(&source);
    let resources = processed.template["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["name"], json!("site"));
    // the displaced resource keeps a mapping to its source position
    assert_eq!(processed.mappings.to_original("resources[0]"), "resources[1]");
}

#[test]
fn negative_copy_count_is_a_template_error() {
    let source = template(json!([{
        "type": "t", "name": "n", "apiVersion": "v",
        "copy": { "name": "loop", "count": -1 }
    }]));
    assert!(process_with(&source, None, ProcessorOptions::default()).is_err());
}

#[test]
fn resources_shifted_behind_a_copy_keep_mappings() {
    let source = template(json!([
        {
            "type": "Microsoft.Storage/storageAccounts",
            "name": "[concat('s', copyIndex())]",
            "apiVersion": "2021-04-01",
            "copy": { "name": "loop", "count": 2 }
        },
        { "type": "Microsoft.Web/sites", "name": "site", "apiVersion": "2021-01-01" }
    ]));
    let processed = process(&source);
    assert_eq!(processed.mappings.to_original("resources[2]"), "resources[1]");
    assert_eq!(
        processed.mappings.to_original("resources[1].properties.x"),
        "resources[0].properties.x"
    );
}

#[test]
fn parameters_and_variables_flow_into_properties() {
    let source = json!({
        "$schema": SCHEMA,
        "parameters": {
            "storageName": { "type": "string", "minLength": 3 }
        },
        "variables": {
            "sku": "[toUpper('standard_lrs')]"
        },
        "resources": [{
            "type": "Microsoft.Storage/storageAccounts",
            "name": "[parameters('storageName')]",
            "apiVersion": "2021-04-01",
            "properties": { "sku": "[variables('sku')]" }
        }]
    });
    let processed = process_with(&source, None, ProcessorOptions::default()).unwrap();
    let resource = &processed.template["resources"][0];
    // deterministic placeholder satisfying minLength
    let name = resource["name"].as_str().unwrap();
    assert!(name.chars().count() >= 3);
    assert_eq!(name, "storagenameplaceholder");
    assert_eq!(resource["properties"]["sku"], json!("STANDARD_LRS"));
}

#[test]
fn supplied_parameters_override_placeholders() {
    let source = json!({
        "$schema": SCHEMA,
        "parameters": { "storageName": { "type": "string" } },
        "resources": [{
            "type": "Microsoft.Storage/storageAccounts",
            "name": "[parameters('storageName')]",
            "apiVersion": "2021-04-01"
        }]
    });
    let parameters = indoc! {r#"
        {
          "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#",
          "parameters": { "storageName": { "value": "realname" } }
        }
    "#};
    let processed =
        process_with(&source, Some(parameters), ProcessorOptions::default()).unwrap();
    assert_eq!(processed.template["resources"][0]["name"], json!("realname"));
}

#[test]
fn failing_expressions_become_not_parsed_in_lenient_mode() {
    let source = template(json!([{
        "type": "Microsoft.Web/sites",
        "name": "site",
        "apiVersion": "2021-01-01",
        "properties": { "bad": "[unknownFn()]", "ok": "[concat('a', 'b')]" }
    }]));
    let processed = process(&source);
    let properties = &processed.template["resources"][0]["properties"];
    assert_eq!(properties["bad"], json!("NOT_PARSED"));
    assert_eq!(properties["ok"], json!("ab"));
}

#[test]
fn strict_mode_surfaces_expression_errors() {
    let source = template(json!([{
        "type": "Microsoft.Web/sites",
        "name": "site",
        "apiVersion": "2021-01-01",
        "properties": { "bad": "[unknownFn()]" }
    }]));
    let err = process_with(
        &source,
        None,
        ProcessorOptions {
            strict_expressions: true,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::ExpressionEvaluation(_, _)));
}

#[test]
fn outputs_are_evaluated() {
    let mut source = template(json!([
        { "type": "t1", "name": "n1", "apiVersion": "v" }
    ]));
    source["outputs"] = json!({
        "endpoint": { "type": "string", "value": "[concat('https://', 'host')]" }
    });
    let processed = process(&source);
    assert_eq!(
        processed.template["outputs"]["endpoint"]["value"],
        json!("https://host")
    );
}

#[test]
fn flattening_cascades_names_and_types() {
    let source = template(json!([{
        "type": "Microsoft.Sql/servers",
        "name": "srv",
        "apiVersion": "2021-02-01",
        "resources": [{
            "type": "databases",
            "name": "db",
            "apiVersion": "2021-02-01"
        }]
    }]));
    let processed = process(&source);
    let keys: Vec<&str> = processed.flattened.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["srv Microsoft.Sql/servers", "srv/db Microsoft.Sql/servers/databases"]
    );
    assert_eq!(
        processed.flattened[1].path.as_str(),
        "resources[0].resources[0]"
    );
}

#[test]
fn fully_qualified_child_types_are_not_recascaded() {
    let source = template(json!([{
        "type": "Microsoft.Sql/servers",
        "name": "srv",
        "apiVersion": "2021-02-01",
        "resources": [{
            "type": "Microsoft.Sql/servers/databases",
            "name": "srv/db",
            "apiVersion": "2021-02-01"
        }]
    }]));
    let processed = process(&source);
    assert_eq!(
        processed.flattened[1].key,
        "srv/db Microsoft.Sql/servers/databases"
    );
}

#[test]
fn duplicate_flat_keys_fail_fast() {
    let source = template(json!([
        { "type": "Microsoft.Web/sites", "name": "same", "apiVersion": "v" },
        { "type": "microsoft.web/sites", "name": "SAME", "apiVersion": "v" }
    ]));
    let err = process_with(&source, None, ProcessorOptions::default()).unwrap_err();
    assert!(err.to_string().contains("duplicate resource key"));
}

#[test]
fn depends_on_attaches_the_dependent_under_its_parent() {
    let source = template(json!([
        {
            "type": "Microsoft.Web/serverfarms",
            "name": "plan",
            "apiVersion": "2021-01-01"
        },
        {
            "type": "Microsoft.Web/sites",
            "name": "site",
            "apiVersion": "2021-01-01",
            "dependsOn": ["plan"],
            "properties": { "httpsOnly": true }
        }
    ]));
    let processed = process(&source);
    let plan_children = processed.template["resources"][0]["resources"]
        .as_array()
        .unwrap();
    assert_eq!(plan_children.len(), 1);
    assert_eq!(plan_children[0]["name"], json!("site"));
    assert_eq!(
        processed.mappings.to_original("resources[0].resources[0].properties.httpsOnly"),
        "resources[1].properties.httpsOnly"
    );
}

#[test]
fn depends_on_resolves_full_resource_ids() {
    let source = template(json!([
        {
            "type": "Microsoft.Web/serverfarms",
            "name": "plan",
            "apiVersion": "2021-01-01"
        },
        {
            "type": "Microsoft.Web/sites",
            "name": "site",
            "apiVersion": "2021-01-01",
            "dependsOn": ["[resourceId('Microsoft.Web/serverfarms', 'plan')]"]
        }
    ]));
    let processed = process(&source);
    let plan_children = processed.template["resources"][0]["resources"]
        .as_array()
        .unwrap();
    assert_eq!(plan_children.len(), 1);
}

#[test]
fn ambiguous_bare_names_are_skipped() {
    let source = template(json!([
        { "type": "Microsoft.Web/serverfarms", "name": "dup", "apiVersion": "v" },
        { "type": "Microsoft.Sql/servers", "name": "dup", "apiVersion": "v" },
        {
            "type": "Microsoft.Web/sites",
            "name": "site",
            "apiVersion": "v",
            "dependsOn": ["dup"]
        }
    ]));
    let processed = process(&source);
    for index in 0..2 {
        assert!(processed.template["resources"][index].get("resources").is_none());
    }
}

#[test]
fn missing_depends_on_parents_are_skipped() {
    let source = template(json!([{
        "type": "Microsoft.Web/sites",
        "name": "site",
        "apiVersion": "v",
        "dependsOn": ["ghost"]
    }]));
    let processed = process(&source);
    assert_eq!(processed.flattened.len(), 1);
}

#[test]
fn reference_to_sibling_properties_resolves() {
    let source = template(json!([
        {
            "type": "Microsoft.Storage/storageAccounts",
            "name": "store",
            "apiVersion": "2021-04-01",
            "properties": { "tier": "Hot" }
        },
        {
            "type": "Microsoft.Web/sites",
            "name": "site",
            "apiVersion": "2021-01-01",
            "properties": { "storageTier": "[reference('store').tier]" }
        }
    ]));
    let processed = process(&source);
    assert_eq!(
        processed.template["resources"][1]["properties"]["storageTier"],
        json!("Hot")
    );
}

#[test]
fn dependents_attached_under_copies_resolve_to_the_prototype() {
    let source = template(json!([
        {
            "type": "Microsoft.Web/serverfarms",
            "name": "[concat('plan', copyIndex())]",
            "apiVersion": "2021-01-01",
            "copy": { "name": "plans", "count": 2 }
        },
        {
            "type": "Microsoft.Web/sites",
            "name": "site",
            "apiVersion": "2021-01-01",
            "dependsOn": ["plan0"],
            "properties": { "httpsOnly": false }
        }
    ]));
    let processed = process(&source);
    // the site is attached under plan0 (resources[0]); through the copy
    // alias the same child under plan1 resolves to the site's source too
    assert_eq!(
        processed
            .mappings
            .to_original("resources[0].resources[0].properties.httpsOnly"),
        "resources[1].properties.httpsOnly"
    );
    assert_eq!(
        processed
            .mappings
            .to_original("resources[1].resources[0].properties.httpsOnly"),
        "resources[1].properties.httpsOnly"
    );
}
