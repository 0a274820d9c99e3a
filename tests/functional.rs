// Copyright Amazon Web Services, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use indoc::indoc;
use pretty_assertions::assert_eq;

use arm_guard::{
    AnalyzerConfig, RuleCatalog, RuleResult, SourceMap, TemplateAnalyzer,
};

const CATALOG: &str = indoc! {r#"
    [
      {
        "id": "TA-000001",
        "description": "Function apps should require authentication",
        "recommendation": "Enable App Service authentication",
        "helpUri": "https://example.com/TA-000001",
        "severity": 3,
        "evaluation": {
          "resourceType": "Microsoft.Web/sites",
          "where": {
            "allOf": [
              { "path": "kind", "regex": "^functionapp" },
              { "not": { "path": "kind", "regex": "linux" } }
            ]
          },
          "path": "properties.siteConfig.authSettings.enabled",
          "equals": true
        }
      },
      {
        "id": "TA-000004",
        "description": "Web apps should only be accessible over HTTPS",
        "recommendation": "Set properties.httpsOnly to true",
        "helpUri": "https://example.com/TA-000004",
        "severity": 2,
        "evaluation": {
          "resourceType": "Microsoft.Web/sites",
          "where": { "not": { "path": "kind", "regex": "^functionapp" } },
          "path": "properties.httpsOnly",
          "equals": true
        }
      },
      {
        "id": "TA-000006",
        "description": "CORS should not allow every origin",
        "recommendation": "Remove the * entry from allowedOrigins",
        "helpUri": "https://example.com/TA-000006",
        "severity": 3,
        "evaluation": {
          "resourceType": "Microsoft.Web/sites",
          "where": { "path": "kind", "regex": "^api" },
          "path": "properties.siteConfig.cors.allowedOrigins[*]",
          "notEquals": "*"
        }
      },
      {
        "id": "TA-000025",
        "description": "Clusters should run a supported Kubernetes version",
        "recommendation": "Upgrade to Kubernetes 1.12 or later",
        "helpUri": "https://example.com/TA-000025",
        "severity": 1,
        "evaluation": {
          "resourceType": "Microsoft.ContainerService/managedClusters",
          "not": {
            "anyOf": [
              { "path": "properties.kubernetesVersion", "regex": "^(0|1\\.(\\d|1[01]))\\." },
              { "path": "properties.orchestratorProfile.orchestratorVersion", "regex": "^(0|1\\.(\\d|1[01]))\\." }
            ]
          }
        }
      }
    ]
"#};

fn analyze(template: &str, parameters: Option<&str>) -> Vec<RuleResult> {
    analyze_with(CATALOG, template, parameters, None)
}

fn analyze_with(
    catalog: &str,
    template: &str,
    parameters: Option<&str>,
    source_map: Option<SourceMap>,
) -> Vec<RuleResult> {
    let catalog = RuleCatalog::from_json(catalog).unwrap();
    TemplateAnalyzer::new(catalog)
        .analyze_template(template, parameters, "template.json", source_map)
        .unwrap()
}

fn results_for<'r>(results: &'r [RuleResult], rule_id: &str) -> Vec<&'r RuleResult> {
    results
        .iter()
        .filter(|result| result.rule_id == rule_id)
        .collect()
}

const HTTPS_ONLY_FALSE: &str = indoc! {r#"
    {
      "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
      "contentVersion": "1.0.0.0",
      "resources": [
        {
          "type": "Microsoft.Web/sites",
          "name": "contoso-site",
          "apiVersion": "2021-02-01",
          "properties": {
            "httpsOnly": false
          }
        }
      ]
    }
"#};

#[test]
fn https_only_true_passes() {
    let template = HTTPS_ONLY_FALSE.replace("false", "true");
    let results = analyze(&template, None);
    let https = results_for(&results, "TA-000004");
    assert_eq!(https.len(), 1);
    assert!(https[0].passed);
}

#[test]
fn https_only_false_fails_at_the_offending_path() {
    let results = analyze(HTTPS_ONLY_FALSE, None);
    let https = results_for(&results, "TA-000004");
    assert_eq!(https.len(), 1);
    assert!(!https[0].passed);
    assert_eq!(https[0].severity, 2);
    assert_eq!(https[0].file_identifier, "template.json");

    let failed = https[0].failed_results();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].path, "resources[0].properties.httpsOnly");
    assert_eq!(failed[0].line_number, 10);
}

const API_SITE_CORS: &str = indoc! {r#"
    {
      "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
      "contentVersion": "1.0.0.0",
      "resources": [
        {
          "type": "Microsoft.Web/sites",
          "name": "api-site",
          "apiVersion": "2021-02-01",
          "kind": "api",
          "properties": {
            "httpsOnly": true,
            "siteConfig": {
              "cors": {
                "allowedOrigins": [
                  "https://contoso.com",
                  "*"
                ]
              }
            }
          }
        }
      ]
    }
"#};

#[test]
fn cors_wildcard_entry_fails_with_its_index() {
    let results = analyze(API_SITE_CORS, None);
    let cors = results_for(&results, "TA-000006");
    assert_eq!(cors.len(), 1);
    assert!(!cors[0].passed);

    let failed = cors[0].failed_results();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].path,
        "resources[0].properties.siteConfig.cors.allowedOrigins[1]"
    );
    assert_eq!(failed[0].line_number, 16);
}

#[test]
fn cors_without_wildcard_passes() {
    let template = API_SITE_CORS.replace("\"*\"", "\"https://fabrikam.com\"");
    let results = analyze(&template, None);
    let cors = results_for(&results, "TA-000006");
    assert_eq!(cors.len(), 1);
    assert!(cors[0].passed);
}

fn cluster_template(version: &str) -> String {
    indoc::formatdoc! {r#"
        {{
          "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
          "contentVersion": "1.0.0.0",
          "resources": [
            {{
              "type": "Microsoft.ContainerService/managedClusters",
              "name": "cluster",
              "apiVersion": "2021-03-01",
              "properties": {{
                "kubernetesVersion": "{version}"
              }}
            }}
          ]
        }}
    "#}
}

#[test]
fn old_kubernetes_version_fails() {
    let results = analyze(&cluster_template("1.11.8"), None);
    let cluster = results_for(&results, "TA-000025");
    assert_eq!(cluster.len(), 1);
    assert!(!cluster[0].passed);

    let failed = cluster[0].failed_results();
    assert!(failed
        .iter()
        .any(|result| result.path == "resources[0].properties.kubernetesVersion"));
}

#[test]
fn supported_kubernetes_version_passes() {
    let results = analyze(&cluster_template("1.14.0"), None);
    let cluster = results_for(&results, "TA-000025");
    assert_eq!(cluster.len(), 1);
    assert!(cluster[0].passed);
}

#[test]
fn linux_function_apps_are_filtered_out_silently() {
    let template = indoc! {r#"
        {
          "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
          "contentVersion": "1.0.0.0",
          "resources": [
            {
              "type": "Microsoft.Web/sites",
              "name": "fn-app",
              "apiVersion": "2021-02-01",
              "kind": "functionapp,linux",
              "properties": {}
            }
          ]
        }
    "#};
    let results = analyze(template, None);
    assert!(results_for(&results, "TA-000001").is_empty());
}

const COPY_LOOP: &str = indoc! {r#"
    {
      "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
      "contentVersion": "1.0.0.0",
      "resources": [
        {
          "type": "Microsoft.Web/sites",
          "name": "[concat('site', copyIndex())]",
          "apiVersion": "2021-02-01",
          "copy": {
            "name": "siteLoop",
            "count": 3
          },
          "properties": {
            "httpsOnly": false
          }
        }
      ]
    }
"#};

#[test]
fn copy_loop_failures_report_the_prototype_line() {
    let results = analyze(COPY_LOOP, None);
    let https = results_for(&results, "TA-000004");
    assert_eq!(https.len(), 3);
    for (index, result) in https.iter().enumerate() {
        assert!(!result.passed);
        let failed = result.failed_results();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].path,
            format!("resources[{}].properties.httpsOnly", index)
        );
        assert_eq!(failed[0].line_number, 14);
    }
}

#[test]
fn missing_parameters_get_deterministic_placeholders() {
    let template = indoc! {r#"
        {
          "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
          "contentVersion": "1.0.0.0",
          "parameters": {
            "storageName": { "type": "string", "minLength": 3 }
          },
          "resources": [
            {
              "type": "Microsoft.Storage/storageAccounts",
              "name": "[parameters('storageName')]",
              "apiVersion": "2021-04-01",
              "properties": {}
            }
          ]
        }
    "#};
    let catalog = indoc! {r#"
        [
          {
            "id": "TA-900001",
            "description": "Storage account names are at least 3 characters",
            "recommendation": "Use a longer name",
            "severity": 3,
            "evaluation": {
              "resourceType": "Microsoft.Storage/storageAccounts",
              "path": "name",
              "regex": "^.{3,}$"
            }
          }
        ]
    "#};
    let first = analyze_with(catalog, template, None, None);
    assert_eq!(first.len(), 1);
    assert!(first[0].passed);

    let second = analyze_with(catalog, template, None, None);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn analysis_is_deterministic() {
    let first = analyze(API_SITE_CORS, None);
    let second = analyze(API_SITE_CORS, None);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn rules_for_absent_resource_types_yield_no_evaluations() {
    let results = analyze(HTTPS_ONLY_FALSE, None);
    assert!(results_for(&results, "TA-000025").is_empty());
    assert!(results_for(&results, "TA-000001").is_empty());
}

#[test]
fn supplied_parameters_flow_through_analysis() {
    let template = indoc! {r#"
        {
          "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
          "contentVersion": "1.0.0.0",
          "parameters": {
            "secure": { "type": "bool", "defaultValue": false }
          },
          "resources": [
            {
              "type": "Microsoft.Web/sites",
              "name": "site",
              "apiVersion": "2021-02-01",
              "properties": {
                "httpsOnly": "[parameters('secure')]"
              }
            }
          ]
        }
    "#};
    let parameters = indoc! {r#"
        {
          "parameters": { "secure": { "value": true } }
        }
    "#};
    let with_default = analyze(template, None);
    assert!(!results_for(&with_default, "TA-000004")[0].passed);

    let with_supplied = analyze(template, Some(parameters));
    assert!(results_for(&with_supplied, "TA-000004")[0].passed);
}

#[test]
fn source_maps_translate_lines_to_bicep() {
    let source_map = SourceMap::from_json(indoc! {r#"
        {
          "entries": [
            { "filePath": "main.bicep", "sourceLine": 4, "targetLine": 10 }
          ]
        }
    "#})
    .unwrap();
    let results = analyze_with(CATALOG, HTTPS_ONLY_FALSE, None, Some(source_map));
    let https = results_for(&results, "TA-000004");
    let failed = https[0].failed_results();
    assert_eq!(failed[0].line_number, 4);
}

#[test]
fn catalog_filters_apply_before_analysis() {
    let mut catalog = RuleCatalog::from_json(CATALOG).unwrap();
    let config = AnalyzerConfig::from_json(r#"{ "exclusions": { "ids": ["TA-000004"] } }"#).unwrap();
    catalog.filter(&config).unwrap();
    let results = TemplateAnalyzer::new(catalog)
        .analyze_template(HTTPS_ONLY_FALSE, None, "template.json", None)
        .unwrap();
    assert!(results_for(&results, "TA-000004").is_empty());
}

#[test]
fn evaluations_are_ordered_by_rule_then_resource() {
    let template = indoc! {r#"
        {
          "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
          "contentVersion": "1.0.0.0",
          "resources": [
            {
              "type": "Microsoft.Web/sites",
              "name": "one",
              "apiVersion": "2021-02-01",
              "properties": { "httpsOnly": true }
            },
            {
              "type": "Microsoft.Web/sites",
              "name": "two",
              "apiVersion": "2021-02-01",
              "properties": { "httpsOnly": false }
            }
          ]
        }
    "#};
    let results = analyze(template, None);
    let https = results_for(&results, "TA-000004");
    assert_eq!(https.len(), 2);
    assert!(https[0].passed);
    assert!(!https[1].passed);
}
