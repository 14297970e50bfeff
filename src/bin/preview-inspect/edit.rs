//! Parsing of `--set path=json` edits.

use anyhow::{Context, Result};

use collab_preview::{DocPath, DocProp, Value};

/// One edit given on the command line.
#[derive(Debug, PartialEq)]
pub struct Edit {
    pub path: DocPath,
    pub value: Value,
}

/// Parses `tags/0="z"` into a path and a JSON value.
///
/// Numeric segments address list indices; everything else is a map key.
pub fn parse_edit(arg: &str) -> Result<Edit> {
    let (path, json) = arg
        .split_once('=')
        .with_context(|| format!("Edit '{}' is not of the form path=json", arg))?;
    let path = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.parse::<usize>() {
            Ok(index) => DocProp::Index(index),
            Err(_) => DocProp::Key(segment.to_string()),
        })
        .collect();
    let json: serde_json::Value =
        serde_json::from_str(json).with_context(|| format!("Invalid JSON in edit '{}'", arg))?;
    Ok(Edit {
        path,
        value: Value::from(json),
    })
}
