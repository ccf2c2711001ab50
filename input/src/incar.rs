use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Map, Serializer, Value};
use std::{
    convert::Infallible,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::{debug, trace};

/// Header emitted by `Incar::render` when the document has no top-level `SYSTEM` tag
const DEFAULT_SYSTEM: &str = "user_provided";

#[derive(Debug, Error)]
pub enum IncarError {
    #[error("Failed to read {path:?}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to write {path:?}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Invalid JSON document")]
    Json(#[from] serde_json::Error),
    #[error("INCAR document must be a JSON object")]
    NotAnObject,
    #[error("{0:?} cannot be written as INCAR text")]
    UnsupportedValue(String),
    #[error("Section {0:?} has the same name as a top-level tag")]
    DuplicateName(String),
}

/// A named group of tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

/// Parsed INCAR file
///
/// Tags keep the order of the file. `tags` holds everything before the first section header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Incar {
    pub tags: Vec<(String, String)>,
    pub sections: Vec<Section>,
}

// a later assignment of the same key wins but keeps the first position
fn set_tag(tags: &mut Vec<(String, String)>, key: &str, value: &str) {
    match tags.iter_mut().find(|(existing, _)| existing == key) {
        Some((_, old)) => *old = value.to_string(),
        None => tags.push((key.to_string(), value.to_string())),
    }
}

fn strip_comment(value: &str) -> &str {
    value.split(&['!', '#'][..]).next().unwrap_or("").trim()
}

// unindented single word without `=`, an optional trailing colon is dropped
fn section_header(line: &str) -> Option<&str> {
    if line.starts_with(char::is_whitespace) || line.split_whitespace().count() != 1 {
        return None;
    }

    let name = line.trim().trim_end_matches(':');
    (!name.is_empty()).then_some(name)
}

impl Incar {
    pub fn parse(text: &str) -> Self {
        let mut incar = Self::default();
        let mut current: Option<usize> = None;

        for line in text.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with(['!', '#']) {
                continue;
            }

            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    trace!("Skipping assignment without a key: {line:?}");
                    continue;
                }

                let tags = match current {
                    Some(index) => &mut incar.sections[index].tags,
                    None => &mut incar.tags,
                };
                set_tag(tags, key, strip_comment(value));
            } else if let Some(name) = section_header(line) {
                current = Some(incar.section_index(name));
            } else {
                trace!("Skipping line: {line:?}");
            }
        }

        incar
    }

    /// index of the named section, a repeated header continues the existing section
    fn section_index(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|section| section.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    tags: Vec::new(),
                });

                self.sections.len() - 1
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }

    /// Tags and sections share one JSON object, so a section may not reuse a tag name
    pub fn to_json(&self) -> Result<Value, IncarError> {
        let mut document = tags_to_map(&self.tags);

        for section in self.sections.iter() {
            if document.contains_key(&section.name) {
                return Err(IncarError::DuplicateName(section.name.clone()));
            }

            document.insert(
                section.name.clone(),
                Value::Object(tags_to_map(&section.tags)),
            );
        }

        Ok(Value::Object(document))
    }

    /// Accepts only what `render` can write so that `parse` reads it back unchanged
    pub fn from_json(document: &Value) -> Result<Self, IncarError> {
        let members = document.as_object().ok_or(IncarError::NotAnObject)?;
        let mut incar = Self::default();

        for (key, value) in members {
            match value {
                Value::Object(section) => {
                    if !valid_section_name(key) {
                        return Err(IncarError::UnsupportedValue(key.clone()));
                    }
                    let index = incar.section_index(key);

                    for (tag, value) in section {
                        let value = tag_value(tag, value)
                            .ok_or_else(|| IncarError::UnsupportedValue(format!("{key}.{tag}")))?;
                        set_tag(&mut incar.sections[index].tags, tag, &value);
                    }
                }
                value => {
                    let value = tag_value(key, value)
                        .ok_or_else(|| IncarError::UnsupportedValue(key.clone()))?;
                    set_tag(&mut incar.tags, key, &value);
                }
            }
        }

        Ok(incar)
    }

    /// Render as INCAR text, `parse` of the result restores the same document
    pub fn render(&self) -> String {
        let mut output = String::new();

        if self.get("SYSTEM").is_none() {
            output.push_str(&format!("SYSTEM = {DEFAULT_SYSTEM}\n"));
        }
        for (key, value) in self.tags.iter() {
            output.push_str(&format!("{key} = {value}\n"));
        }

        for section in self.sections.iter() {
            output.push_str(&format!("\n{}\n", section.name));

            for (key, value) in section.tags.iter() {
                output.push_str(&format!("  {key} = {value}\n"));
            }
        }

        output
    }
}

fn tags_to_map(tags: &[(String, String)]) -> Map<String, Value> {
    tags.iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect()
}

fn has_comment_or_newline(text: &str) -> bool {
    text.contains(['!', '#', '\n', '\r'])
}

// `parse` trims both sides of the `=` and cuts values at the first comment marker
fn valid_key(key: &str) -> bool {
    !key.is_empty() && key.trim() == key && !key.contains('=') && !has_comment_or_newline(key)
}

// `SYSTEM` is reserved for the tag `render` may add in front of the document
fn valid_section_name(name: &str) -> bool {
    valid_key(name)
        && name != "SYSTEM"
        && !name.ends_with(':')
        && section_header(name) == Some(name)
}

fn tag_value(key: &str, value: &Value) -> Option<String> {
    let value = scalar(value)?;

    (valid_key(key) && value.trim() == value && !has_comment_or_newline(&value)).then_some(value)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl FromStr for Incar {
    type Err = Infallible;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(text))
    }
}

impl fmt::Display for Incar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parse an INCAR file and write it as a JSON document indented by four spaces
pub fn txt_to_json_file(incar_path: &Path, json_path: &Path) -> Result<Incar, IncarError> {
    let text = fs::read_to_string(incar_path).map_err(|source| IncarError::Read {
        path: incar_path.to_path_buf(),
        source,
    })?;
    let incar = Incar::parse(&text);

    let mut buffer = Vec::new();
    let mut serializer =
        Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    incar.to_json()?.serialize(&mut serializer)?;
    buffer.push(b'\n');

    fs::write(json_path, buffer).map_err(|source| IncarError::Write {
        path: json_path.to_path_buf(),
        source,
    })?;
    debug!("Wrote INCAR data to {}", json_path.to_string_lossy());

    Ok(incar)
}

/// Read a JSON document and write it as INCAR text
pub fn json_to_txt_file(json_path: &Path, incar_path: &Path) -> Result<Incar, IncarError> {
    let text = fs::read_to_string(json_path).map_err(|source| IncarError::Read {
        path: json_path.to_path_buf(),
        source,
    })?;
    let incar = Incar::from_json(&serde_json::from_str(&text)?)?;

    fs::write(incar_path, incar.render()).map_err(|source| IncarError::Write {
        path: incar_path.to_path_buf(),
        source,
    })?;
    debug!("Wrote INCAR text to {}", incar_path.to_string_lossy());

    Ok(incar)
}
