use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Error parsing incoming JSON context {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Formatting error when writing {0}")]
    FormatError(#[from] std::fmt::Error),
    #[error("I/O error when reading {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parser Error when parsing `{0}`")]
    ParseError(String),
    #[error("Regex expression parse error for rule catalog {0}")]
    RegexError(#[from] Box<fancy_regex::Error>),
    #[error("Rule `{rule_id}` could not be loaded: {reason}")]
    CatalogParse { rule_id: String, reason: String },
    #[error("Template is malformed: {0}")]
    TemplateParse(String),
    #[error("Parameters file is malformed: {0}")]
    ParameterParse(String),
    #[error("Could not evaluate template expression `{0}`: {1}")]
    ExpressionEvaluation(String, String),
    #[error("Expanded path `{expanded}` already maps to `{existing}`, refusing to remap to `{conflicting}`")]
    ResourceMappingConflict {
        expanded: String,
        existing: String,
        conflicting: String,
    },
    #[error("{0}")]
    IllegalArguments(String),
}

impl From<fancy_regex::Error> for Error {
    fn from(err: fancy_regex::Error) -> Self {
        Error::RegexError(Box::new(err))
    }
}
