use std::fs;
use std::io;
use std::path::Path;

use serde_json::json;

use crate::event_log;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillMetadata {
    pub docstring: String,
    pub signature: String,
}

#[derive(Debug)]
pub enum MetadataError {
    MissingMetadata,
    MissingField(&'static str),
    MissingValue(&'static str),
    UnexpectedDelimiter(&'static str),
    UnterminatedField(&'static str),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::MissingMetadata => write!(f, "no metadata block found"),
            MetadataError::MissingField(field) => write!(f, "field '{field}' not found"),
            MetadataError::MissingValue(field) => write!(f, "field '{field}' has no value"),
            MetadataError::UnexpectedDelimiter(field) => {
                write!(f, "field '{field}' has an unexpected string delimiter")
            }
            MetadataError::UnterminatedField(field) => {
                write!(f, "no closing delimiter for field '{field}'")
            }
        }
    }
}

impl std::error::Error for MetadataError {}

/// Extracts the `docstring:` and `signature:` string fields from a skill
/// source file's `METADATA` block. This is a read-only documentation lookup;
/// the worker remains the authority on what its skills actually do.
pub fn extract_skill_metadata(source: &str) -> Result<SkillMetadata, MetadataError> {
    let marker = source.find("METADATA").ok_or(MetadataError::MissingMetadata)?;
    let open = source[marker..]
        .find('{')
        .map(|offset| marker + offset)
        .ok_or(MetadataError::MissingMetadata)?;
    let close = source[open..]
        .find('}')
        .map(|offset| open + offset)
        .ok_or(MetadataError::MissingMetadata)?;
    let content = source[open + 1..close].trim();

    Ok(SkillMetadata {
        docstring: extract_field(content, "docstring:")?,
        signature: extract_field(content, "signature:")?,
    })
}

fn extract_field(content: &str, field_name: &'static str) -> Result<String, MetadataError> {
    let start = content
        .find(field_name)
        .ok_or(MetadataError::MissingField(field_name))?;
    let rest = content[start + field_name.len()..].trim_start();
    let delimiter = match rest.chars().next() {
        Some(ch @ ('"' | '\'' | '`')) => ch,
        Some(_) => return Err(MetadataError::UnexpectedDelimiter(field_name)),
        None => return Err(MetadataError::MissingValue(field_name)),
    };

    let body = &rest[delimiter.len_utf8()..];
    let mut search_from = 0;
    loop {
        let Some(found) = body[search_from..].find(delimiter) else {
            return Err(MetadataError::UnterminatedField(field_name));
        };
        let index = search_from + found;
        // Skip delimiters escaped with a backslash inside the value.
        if index > 0 && body.as_bytes()[index - 1] == b'\\' {
            search_from = index + delimiter.len_utf8();
            continue;
        }
        return Ok(body[..index].to_string());
    }
}

/// Scans `<skills_dir>/<name>/<name>.ts` for each skill subdirectory and
/// formats one docs entry per skill. Files without usable metadata (or with
/// a TODO docstring) are skipped.
pub fn collect_skills_docs(skills_dir: &Path) -> io::Result<Vec<String>> {
    let mut entries: Vec<_> = fs::read_dir(skills_dir)?.filter_map(Result::ok).collect();
    entries.sort_by_key(|entry| entry.file_name());

    let mut docs = Vec::new();
    for entry in entries {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let source_path = path.join(format!("{name}.ts"));
        let Ok(source) = fs::read_to_string(&source_path) else {
            continue;
        };
        let metadata = match extract_skill_metadata(&source) {
            Ok(metadata) => metadata,
            Err(err) => {
                event_log::log(
                    "skill_docs_skip",
                    json!({"path": source_path.to_string_lossy(), "reason": err.to_string()}),
                );
                continue;
            }
        };
        if metadata.docstring.contains("TODO") {
            continue;
        }
        docs.push(format!(
            "{}\n{}",
            strip_docstring_indent(&metadata.docstring),
            metadata.signature
        ));
    }
    Ok(docs)
}

fn strip_docstring_indent(text: &str) -> String {
    text.lines()
        .map(str::trim_start)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKILL_SOURCE: &str = r#"
import { Skill } from "../skill";

export const METADATA: SkillMetadata = {
    signature: "mineBlocks(blockName: string, count: number)",
    docstring: `
        Mines up to \`count\` blocks of the named type.
        Stops early when none remain visible.
    `,
};
"#;

    #[test]
    fn extracts_docstring_and_signature() {
        let metadata = extract_skill_metadata(SKILL_SOURCE).expect("extract");
        assert_eq!(
            metadata.signature,
            "mineBlocks(blockName: string, count: number)"
        );
        assert!(metadata.docstring.contains("Mines up to"));
    }

    #[test]
    fn escaped_delimiters_do_not_terminate_a_field() {
        let source = "METADATA = { docstring: 'it\\'s fine', signature: 'f()' }";
        let metadata = extract_skill_metadata(source).expect("extract");
        assert_eq!(metadata.docstring, "it\\'s fine");
        assert_eq!(metadata.signature, "f()");
    }

    #[test]
    fn missing_metadata_block_is_an_error() {
        assert!(matches!(
            extract_skill_metadata("export const x = 1;"),
            Err(MetadataError::MissingMetadata)
        ));
    }

    #[test]
    fn missing_field_is_an_error() {
        let source = "METADATA = { signature: 'f()' }";
        assert!(matches!(
            extract_skill_metadata(source),
            Err(MetadataError::MissingField("docstring:"))
        ));
    }

    #[test]
    fn docstring_lines_are_left_stripped() {
        assert_eq!(
            strip_docstring_indent("\n    first line\n        second line\n"),
            "first line\nsecond line"
        );
    }

    #[test]
    fn collects_docs_per_skill_directory_and_skips_todos() {
        let temp = tempfile::tempdir().expect("tempdir");
        let skills_dir = temp.path();

        let mine = skills_dir.join("mine-blocks");
        std::fs::create_dir(&mine).expect("mkdir");
        std::fs::write(
            mine.join("mine-blocks.ts"),
            "METADATA = { docstring: 'Mines blocks.', signature: 'mineBlocks(name)' }",
        )
        .expect("write");

        let todo = skills_dir.join("place-block");
        std::fs::create_dir(&todo).expect("mkdir");
        std::fs::write(
            todo.join("place-block.ts"),
            "METADATA = { docstring: 'TODO: document', signature: 'placeBlock(name)' }",
        )
        .expect("write");

        let empty = skills_dir.join("no-source");
        std::fs::create_dir(&empty).expect("mkdir");

        let docs = collect_skills_docs(skills_dir).expect("collect");
        assert_eq!(docs, vec!["Mines blocks.\nmineBlocks(name)".to_string()]);
    }
}
