// Copyright Amazon Web Services, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/* require return types marked as must_use to be used (such as Result types) */
#![deny(unused_must_use)]

pub mod commands;
pub mod rules;
pub mod template;
pub mod utils;

pub use crate::rules::catalog::{AnalyzerConfig, FilterSpec, RuleCatalog, RuleDefinition};
pub use crate::rules::errors::Error;
pub use crate::rules::{Evaluation, LeafResult, Result, RuleResult};
pub use crate::template::{ProcessorOptions, SourceMap, TemplateContext};

/// End-to-end analysis of one ARM template against a loaded rule
/// catalog. The catalog is immutable once handed over and may be shared
/// across template analyses.
pub struct TemplateAnalyzer {
    catalog: RuleCatalog,
    options: ProcessorOptions,
}

impl TemplateAnalyzer {
    pub fn new(catalog: RuleCatalog) -> Self {
        TemplateAnalyzer {
            catalog,
            options: ProcessorOptions::default(),
        }
    }

    pub fn with_options(catalog: RuleCatalog, options: ProcessorOptions) -> Self {
        TemplateAnalyzer { catalog, options }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Expands the template (with optional deployment parameters) and
    /// evaluates every catalog rule against it. `source_map` translates
    /// reported lines for Bicep-derived templates.
    pub fn analyze_template(
        &self,
        template_text: &str,
        parameters_text: Option<&str>,
        identifier: &str,
        source_map: Option<SourceMap>,
    ) -> Result<Vec<RuleResult>> {
        let context = TemplateContext::build(
            template_text,
            parameters_text,
            identifier,
            source_map,
            &self.options,
        )?;
        Ok(self
            .catalog
            .analyze(&context, context.expanded(), &context.identifier))
    }
}
