//! Dockerfile FROM extraction
//!
//! Only the base image of each build stage matters here, so this reads the
//! `ARG` declarations ahead of the first stage and every `FROM` instruction,
//! substituting build arguments and resolving stage-name references.

use std::collections::BTreeMap;

/// Base image of one build stage after argument substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseRef {
    /// A concrete image reference (e.g. "mcr.microsoft.com/dotnet/runtime:6.0")
    Image(String),
    /// `FROM scratch`
    Scratch,
    /// A reference still containing variables nothing could resolve
    Unresolved(String),
}

impl BaseRef {
    /// The image reference, if this stage has a real base image
    pub fn image(&self) -> Option<&str> {
        match self {
            Self::Image(reference) => Some(reference),
            Self::Scratch | Self::Unresolved(_) => None,
        }
    }
}

/// A build stage: optional `AS` name and its resolved base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: Option<String>,
    pub base: BaseRef,
}

/// Parse the stage list of a Dockerfile.
///
/// Returns an error message when the file declares no stage.
pub fn parse_stages(
    content: &str,
    build_args: &BTreeMap<String, String>,
) -> Result<Vec<Stage>, String> {
    let mut global_args: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut stages: Vec<Stage> = Vec::new();

    for (line_num, line) in logical_lines(content) {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };

        if keyword.eq_ignore_ascii_case("ARG") && stages.is_empty() {
            for decl in words {
                let (name, default) = match decl.split_once('=') {
                    Some((name, value)) => (name, Some(unquote(value).to_string())),
                    None => (decl, None),
                };
                global_args.insert(name.to_string(), default);
            }
        } else if keyword.eq_ignore_ascii_case("FROM") {
            let args: Vec<&str> = words.filter(|w| !w.starts_with("--")).collect();
            let image = args
                .first()
                .ok_or_else(|| format!("line {}: FROM requires an image reference", line_num))?;

            let name = match (args.get(1), args.get(2)) {
                (Some(kw), Some(name)) if kw.eq_ignore_ascii_case("AS") => Some(name.to_string()),
                (Some(kw), None) if kw.eq_ignore_ascii_case("AS") => {
                    return Err(format!("line {}: FROM ... AS requires a stage name", line_num))
                }
                _ => None,
            };

            let base = resolve_base(image, &global_args, build_args, &stages);
            stages.push(Stage { name, base });
        }
    }

    if stages.is_empty() {
        return Err("no FROM instruction found".to_string());
    }

    Ok(stages)
}

/// Join continuation lines and drop comments, keeping the starting line number
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if current.is_empty() {
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            start = idx + 1;
        } else if trimmed.starts_with('#') {
            continue;
        }

        if let Some(stripped) = trimmed.strip_suffix('\\') {
            current.push_str(stripped);
            current.push(' ');
        } else {
            current.push_str(trimmed);
            lines.push((start, std::mem::take(&mut current)));
        }
    }

    if !current.trim().is_empty() {
        lines.push((start, current));
    }

    lines
}

fn resolve_base(
    image: &str,
    global_args: &BTreeMap<String, Option<String>>,
    build_args: &BTreeMap<String, String>,
    previous: &[Stage],
) -> BaseRef {
    let Some(reference) = expand_args(image, global_args, build_args) else {
        return BaseRef::Unresolved(image.to_string());
    };

    if reference.eq_ignore_ascii_case("scratch") {
        return BaseRef::Scratch;
    }

    // A stage name shadows an image of the same name
    if let Some(stage) = previous
        .iter()
        .rev()
        .find(|s| s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&reference)))
    {
        return stage.base.clone();
    }

    BaseRef::Image(reference)
}

/// Expand `$NAME`, `${NAME}` and `${NAME:-default}`; `None` if a variable has
/// no value.
///
/// Only arguments declared before the first stage are in scope, so a build
/// argument applies only when such an `ARG` names it.
fn expand_args(
    value: &str,
    global_args: &BTreeMap<String, Option<String>>,
    build_args: &BTreeMap<String, String>,
) -> Option<String> {
    let lookup = |name: &str| -> Option<String> {
        let declared = global_args.get(name)?;
        build_args.get(name).cloned().or_else(|| declared.clone())
    };

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut inner = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                inner.push(c);
            }
            match inner.split_once(":-") {
                Some((name, default)) => {
                    out.push_str(&lookup(name).unwrap_or_else(|| default.to_string()))
                }
                None => out.push_str(&lookup(&inner)?),
            }
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
            } else {
                out.push_str(&lookup(&name)?);
            }
        }
    }

    Some(out)
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"').trim_matches('\'')
}
