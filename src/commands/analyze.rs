// Copyright Amazon Web Services, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::io::Write;
use std::path::Path;

use clap::Args;

use crate::commands::{Executable, FAILURE_STATUS_CODE, SUCCESS_STATUS_CODE};
use crate::rules::catalog::{AnalyzerConfig, RuleCatalog};
use crate::rules::Result;
use crate::template::{ProcessorOptions, SourceMap};
use crate::utils::writer::Writer;
use crate::TemplateAnalyzer;

const ABOUT: &str = r#"Statically analyzes an ARM deployment template against a
rule catalog and prints the evaluation records as JSON. The exit code is 0 when
every rule passed, 19 when at least one failed."#;

const TEMPLATE_HELP: &str = "Path to the ARM deployment template (JSON)";
const PARAMETERS_HELP: &str = "Path to a deployment parameters file (JSON)";
const RULES_HELP: &str = "Path to the rule catalog (JSON array of rule definitions)";
const CONFIG_HELP: &str = "Path to an analyzer configuration with rule filters and severity overrides";
const SOURCE_MAP_HELP: &str = "Path to a Bicep source map for line number translation";
const STRICT_HELP: &str = "Fail on template expression evaluation errors instead of substituting NOT_PARSED";

#[derive(Debug, Clone, Eq, PartialEq, Args)]
#[clap(about=ABOUT)]
#[clap(arg_required_else_help = true)]
pub struct Analyze {
    #[arg(short, long, help=TEMPLATE_HELP)]
    pub template: String,
    #[arg(short, long, help=PARAMETERS_HELP)]
    pub parameters: Option<String>,
    #[arg(short, long, help=RULES_HELP)]
    pub rules: String,
    #[arg(short, long, help=CONFIG_HELP)]
    pub config: Option<String>,
    #[arg(short = 'm', long = "source-map", help=SOURCE_MAP_HELP)]
    pub source_map: Option<String>,
    #[arg(short, long, help=STRICT_HELP)]
    pub strict: bool,
}

impl Executable for Analyze {
    fn execute(&self, writer: &mut Writer) -> Result<i32> {
        let template_text = fs::read_to_string(&self.template)?;
        let parameters_text = match &self.parameters {
            Some(path) => Some(fs::read_to_string(path)?),
            None => None,
        };

        let mut catalog = RuleCatalog::from_json(&fs::read_to_string(&self.rules)?)?;
        if let Some(path) = &self.config {
            let config = AnalyzerConfig::from_json(&fs::read_to_string(path)?)?;
            catalog.filter(&config)?;
        }

        let source_map = match &self.source_map {
            Some(path) => Some(SourceMap::from_json(&fs::read_to_string(path)?)?),
            None => None,
        };

        let identifier = Path::new(&self.template)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(self.template.as_str())
            .to_string();

        let analyzer = TemplateAnalyzer::with_options(
            catalog,
            ProcessorOptions {
                strict_expressions: self.strict,
            },
        );
        let results = analyzer.analyze_template(
            &template_text,
            parameters_text.as_deref(),
            &identifier,
            source_map,
        )?;

        serde_json::to_writer_pretty(&mut *writer, &results)?;
        writeln!(writer)?;

        let failed = results.iter().any(|result| !result.passed);
        Ok(if failed {
            FAILURE_STATUS_CODE
        } else {
            SUCCESS_STATUS_CODE
        })
    }
}
