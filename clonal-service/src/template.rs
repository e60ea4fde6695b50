// Command Templates
// Renders stage command templates against a task's resolved inputs, outputs and params

use crate::error::{ServiceError, ServiceResult};
use crate::stages::StageKind;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Values available to a stage's command template
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub stage: Option<StageKind>,
    pub task_dir: Option<&'a Path>,
    pub inputs: HashMap<&'a str, &'a Path>,
    pub outputs: HashMap<&'a str, &'a Path>,
    pub dirs: HashMap<&'a str, PathBuf>,
    pub params: HashMap<&'a str, &'a str>,
}

impl<'a> TemplateContext<'a> {
    fn lookup(&self, key: &str) -> Option<String> {
        if key == "task_dir" {
            return self.task_dir.map(|dir| shell_quote(&dir.to_string_lossy()));
        }
        let (namespace, name) = key.split_once('.')?;
        match namespace {
            "inputs" => self.inputs.get(name).map(|p| quote_path(p)),
            "outputs" => self.outputs.get(name).map(|p| quote_path(p)),
            "dirs" => self.dirs.get(name).map(|p| quote_path(p)),
            "params" => self.params.get(name).map(|v| shell_quote(v)),
            _ => None,
        }
    }

    fn stage_name(&self) -> &'static str {
        self.stage.map(|s| s.name()).unwrap_or("command")
    }
}

/// Substitute `{namespace.name}` placeholders; `{{` and `}}` are literal braces
pub fn render(template: &str, context: &TemplateContext<'_>) -> ServiceResult<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                rendered.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                rendered.push('}');
            }
            '{' => {
                let rest = &template[start + 1..];
                let end = rest.find('}').ok_or_else(|| {
                    ServiceError::SchemaMismatch(format!(
                        "unterminated placeholder in '{}' command at byte {}",
                        context.stage_name(),
                        start
                    ))
                })?;
                let key = rest[..end].trim();
                let value = context.lookup(key).ok_or_else(|| {
                    ServiceError::SchemaMismatch(format!(
                        "'{}' command references unknown placeholder '{{{}}}'",
                        context.stage_name(),
                        key
                    ))
                })?;
                rendered.push_str(&value);
                // Skip the placeholder body and its closing brace
                for _ in 0..=rest[..end].chars().count() {
                    chars.next();
                }
            }
            _ => rendered.push(c),
        }
    }

    Ok(rendered)
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Quote a word for POSIX shells, leaving plain words untouched
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
