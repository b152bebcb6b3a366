//! Config compiler: renders a persisted stream into the engine's YAML
//! config document.
//!
//! ```text
//! cache_resources:        # only when the stream has any
//!   - label: <label>
//!     <component>: {...}
//! rate_limit_resources:   # only when the stream has any
//! input:
//!   <component>: {...}
//!   label: <label>
//! pipeline:               # only when the stream has processors
//!   processors:
//!     - <component>: {...}
//!       label: <label>
//! output:
//!   <component>: {...}
//!   label: <label>
//! ```
//!
//! Component blobs are YAML (JSON is accepted as a subset). A blank blob
//! compiles to an empty mapping.

use flowgrid_state::{Component, Stream};
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, ConfigResult, SectionError};

/// Processors whose config is a list of nested processor definitions.
const LIST_PROCESSORS: [&str; 2] = ["catch", "switch"];

/// Processor whose config is a script, inlined verbatim.
const SCRIPT_PROCESSOR: &str = "mapping";

/// A compiled stream config.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    document: Value,
}

impl StreamConfig {
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Render as the YAML text sent to a worker.
    pub fn render(&self) -> ConfigResult<String> {
        serde_yaml::to_string(&self.document).map_err(|e| ConfigError::Render(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigBuilder;

impl ConfigBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Compile `stream`, failing on the first malformed section.
    pub fn build_stream_config(&self, stream: &Stream) -> ConfigResult<StreamConfig> {
        let mut document = Mapping::new();

        if !stream.cache_resources.is_empty() {
            let resources = stream
                .cache_resources
                .iter()
                .map(|c| resource(c, format!("cache_resources[{}]", c.label)))
                .collect::<Result<Vec<_>, _>>()?;
            document.insert("cache_resources".into(), Value::Sequence(resources));
        }

        if !stream.rate_limit_resources.is_empty() {
            let resources = stream
                .rate_limit_resources
                .iter()
                .map(|c| resource(c, format!("rate_limit_resources[{}]", c.label)))
                .collect::<Result<Vec<_>, _>>()?;
            document.insert("rate_limit_resources".into(), Value::Sequence(resources));
        }

        document.insert("input".into(), section(&stream.input, "input")?);

        if !stream.processors.is_empty() {
            let processors = stream
                .processors
                .iter()
                .enumerate()
                .map(|(index, p)| processor(index, p))
                .collect::<Result<Vec<_>, _>>()?;
            let mut pipeline = Mapping::new();
            pipeline.insert("processors".into(), Value::Sequence(processors));
            document.insert("pipeline".into(), Value::Mapping(pipeline));
        }

        document.insert("output".into(), section(&stream.output, "output")?);

        Ok(StreamConfig {
            document: Value::Mapping(document),
        })
    }

    /// Compile every section independently and report all malformed ones.
    pub fn validate_stream(&self, stream: &Stream) -> ConfigResult<()> {
        let mut failures = Vec::new();

        for c in &stream.cache_resources {
            if let Err(e) = resource(c, format!("cache_resources[{}]", c.label)) {
                failures.push(e);
            }
        }
        for c in &stream.rate_limit_resources {
            if let Err(e) = resource(c, format!("rate_limit_resources[{}]", c.label)) {
                failures.push(e);
            }
        }
        if let Err(e) = section(&stream.input, "input") {
            failures.push(e);
        }
        for (index, p) in stream.processors.iter().enumerate() {
            if let Err(e) = processor(index, p) {
                failures.push(e);
            }
        }
        if let Err(e) = section(&stream.output, "output") {
            failures.push(e);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Sections(failures))
        }
    }
}

/// `{<component>: <config>, label: <label>}` for input and output.
fn section(component: &Component, name: &str) -> Result<Value, SectionError> {
    let config = parse_mapping(name, &component.config)?;
    Ok(labelled(component, config))
}

fn processor(index: usize, component: &Component) -> Result<Value, SectionError> {
    let name = format!("processor[{index}:{}]", component.label);
    let config = if component.component == SCRIPT_PROCESSOR {
        Value::String(component.config.clone())
    } else if LIST_PROCESSORS.contains(&component.component.as_str()) {
        parse_sequence(&name, &component.config)?
    } else {
        parse_mapping(&name, &component.config)?
    };
    Ok(labelled(component, config))
}

/// `{label: <label>, <component>: <config>}` for shared resources.
fn resource(component: &Component, name: String) -> Result<Value, SectionError> {
    let config = parse_mapping(&name, &component.config)?;
    let mut entry = Mapping::new();
    entry.insert("label".into(), Value::String(component.label.clone()));
    entry.insert(Value::String(component.component.clone()), config);
    Ok(Value::Mapping(entry))
}

fn labelled(component: &Component, config: Value) -> Value {
    let mut entry = Mapping::new();
    entry.insert(Value::String(component.component.clone()), config);
    entry.insert("label".into(), Value::String(component.label.clone()));
    Value::Mapping(entry)
}

fn parse_mapping(section: &str, raw: &str) -> Result<Value, SectionError> {
    match parse(section, raw)? {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        value @ Value::Mapping(_) => Ok(value),
        other => Err(malformed(
            section,
            format!("expected a mapping, found {}", kind(&other)),
        )),
    }
}

fn parse_sequence(section: &str, raw: &str) -> Result<Value, SectionError> {
    match parse(section, raw)? {
        Value::Null => Ok(Value::Sequence(Vec::new())),
        value @ Value::Sequence(_) => Ok(value),
        other => Err(malformed(
            section,
            format!("expected a list of processors, found {}", kind(&other)),
        )),
    }
}

fn parse(section: &str, raw: &str) -> Result<Value, SectionError> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(raw).map_err(|e| malformed(section, e.to_string()))
}

fn malformed(section: &str, reason: String) -> SectionError {
    SectionError {
        section: section.to_string(),
        reason,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
