use std::fmt;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::error::{Error, Result};

/// Namespace every recognized config element must be bound to
pub const CONFIG_NAMESPACE: &str = "https://pictor.dev/config/1.0";

/// One `Param` occurrence: key with group prefixes applied, value still raw.
/// Entries come out in document order across groups and imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParam {
    pub key: String,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Import,
    Group,
    Param,
    Other,
}

/// Parses one source file, following `Import` nodes relative to this file's
/// directory
pub fn parse_source(path: &Path, prefix: &str, skip_missing: bool) -> Result<Vec<RawParam>> {
    if !path.exists() {
        if skip_missing {
            tracing::debug!(path = %path.display(), "skipping missing config source");
            return Ok(Vec::new());
        }
        return Err(Error::SourceNotFound(path.to_owned()));
    }

    tracing::debug!(path = %path.display(), "parsing config source");
    let content = std::fs::read_to_string(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_document(&content, prefix, base_dir, skip_missing).map_err(|err| match err {
        Error::Parse(message) => Error::Parse(format!("{}: {message}", path.display())),
        other => other,
    })
}

/// Parses a whole document. The root element's name is not interpreted; only
/// its children are walked
pub fn parse_document(
    content: &str,
    prefix: &str,
    base_dir: &Path,
    skip_missing: bool,
) -> Result<Vec<RawParam>> {
    let mut reader = NsReader::from_str(content);
    reader.config_mut().trim_text(false);

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(_) => {
                return collect_children(&mut reader, prefix, base_dir, skip_missing)
            }
            Event::Empty(_) | Event::Eof => return Ok(Vec::new()),
            _ => {}
        }
    }
}

// Groups recurse with an extended prefix; imports splice in the target file
// under the same prefix.
fn collect_children(
    reader: &mut NsReader<&[u8]>,
    prefix: &str,
    base_dir: &Path,
    skip_missing: bool,
) -> Result<Vec<RawParam>> {
    let mut entries = Vec::new();

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(node) => match classify(reader, &node) {
                NodeKind::Import => {
                    let target = import_target(&node, base_dir)?;
                    reader.read_to_end(node.name()).map_err(parse_err)?;
                    entries.extend(parse_source(&target, prefix, skip_missing)?);
                }
                NodeKind::Group => {
                    let name = require_attr(&node, "name")?;
                    let child_prefix = format!("{prefix}{name}/");
                    entries.extend(collect_children(
                        reader,
                        &child_prefix,
                        base_dir,
                        skip_missing,
                    )?);
                }
                NodeKind::Param => {
                    let name = require_attr(&node, "name")?;
                    let raw = match attr(&node, "value")? {
                        Some(value) => {
                            reader.read_to_end(node.name()).map_err(parse_err)?;
                            value
                        }
                        None => inline_text(reader)?,
                    };
                    entries.push(RawParam {
                        key: format!("{prefix}{name}"),
                        raw,
                    });
                }
                NodeKind::Other => {
                    reader.read_to_end(node.name()).map_err(parse_err)?;
                }
            },
            Event::Empty(node) => match classify(reader, &node) {
                NodeKind::Import => {
                    let target = import_target(&node, base_dir)?;
                    entries.extend(parse_source(&target, prefix, skip_missing)?);
                }
                NodeKind::Param => {
                    let name = require_attr(&node, "name")?;
                    let raw = attr(&node, "value")?.unwrap_or_default();
                    entries.push(RawParam {
                        key: format!("{prefix}{name}"),
                        raw,
                    });
                }
                NodeKind::Group | NodeKind::Other => {}
            },
            Event::End(_) | Event::Eof => return Ok(entries),
            _ => {}
        }
    }
}

// Direct text and CDATA content of a Param, verbatim. CDATA lets long-text
// values carry embedded markup; nested elements contribute nothing.
fn inline_text(reader: &mut NsReader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Text(chunk) => {
                if depth == 0 {
                    text.push_str(&chunk.unescape().map_err(parse_err)?);
                }
            }
            Event::CData(chunk) => {
                if depth == 0 {
                    let raw = std::str::from_utf8(&chunk).map_err(|err| {
                        Error::Parse(format!("param text is not valid utf-8: {err}"))
                    })?;
                    text.push_str(raw);
                }
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(text);
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(Error::Parse(
                    "document ended inside a Param element".to_owned(),
                ))
            }
            _ => {}
        }
    }
}

fn classify(reader: &NsReader<&[u8]>, node: &BytesStart) -> NodeKind {
    let (resolved, local) = reader.resolve_element(node.name());
    let ResolveResult::Bound(Namespace(namespace)) = resolved else {
        return NodeKind::Other;
    };
    if namespace != CONFIG_NAMESPACE.as_bytes() {
        return NodeKind::Other;
    }

    match local.as_ref() {
        b"Import" => NodeKind::Import,
        b"Group" => NodeKind::Group,
        b"Param" => NodeKind::Param,
        _ => NodeKind::Other,
    }
}

fn import_target(node: &BytesStart, base_dir: &Path) -> Result<PathBuf> {
    let src = require_attr(node, "src")?;
    Ok(base_dir.join(src))
}

fn attr(node: &BytesStart, name: &str) -> Result<Option<String>> {
    let found = node.try_get_attribute(name).map_err(|err| {
        Error::Parse(format!(
            "bad attributes on <{}>: {err}",
            element_name(node)
        ))
    })?;

    match found {
        Some(attribute) => {
            let value = attribute
                .unescape_value()
                .map_err(|err| Error::Parse(format!("bad '{name}' attribute: {err}")))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn require_attr(node: &BytesStart, name: &str) -> Result<String> {
    attr(node, name)?.ok_or_else(|| {
        Error::Parse(format!(
            "<{}> is missing its '{name}' attribute",
            element_name(node)
        ))
    })
}

fn element_name(node: &BytesStart) -> String {
    String::from_utf8_lossy(node.name().as_ref()).into_owned()
}

fn parse_err(err: impl fmt::Display) -> Error {
    Error::Parse(err.to_string())
}
