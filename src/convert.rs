//! Source file converters: curated YAML entries and Markdown help pages.
//!
//! Both produce a [`Document`] whose hash comes from the normalized section
//! content, so re-converting an unchanged file always yields the same hash.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};

use kowalski_core::models::{LineType, SectionNode};
use kowalski_core::{Document, Line, Section};

/// A hand-written entry for a specific tool or task. Aliases are alternate
/// phrasings of the title that widen what the entry is retrieved for.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Curated {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub text: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl Curated {
    /// One canonical section followed by one alias section per alternate title.
    pub fn into_document(self, source: &str) -> Document {
        let mut canonical = Section::new(self.id.trim());
        for line in self.text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            canonical = canonical.with_line(Line::text(line));
        }
        for command in &self.commands {
            canonical = canonical.with_line(Line::command(command.trim()));
        }
        canonical = canonical.with_files(self.files);

        let mut sections = vec![canonical];
        sections.extend(
            self.aliases
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .map(Section::alias),
        );
        Document::new(source, sections)
    }
}

pub fn parse_curated(content: &str, source: &str) -> Result<Document> {
    let curated: Curated = serde_yaml::from_str(content)
        .with_context(|| format!("Failed to parse curated entry: {}", source))?;
    if curated.id.trim().is_empty() {
        bail!("curated entry {} has an empty Id", source);
    }
    Ok(curated.into_document(source))
}

/// Convert Markdown into a section tree by heading level.
///
/// Text before the first heading becomes a section titled `fallback_title`.
/// Code blocks tagged as shell (or untagged fences) become command lines,
/// other code blocks formatted lines. Inline code spans that look like
/// absolute paths are recorded as referenced files.
pub fn parse_markdown(content: &str, source: &str, fallback_title: &str) -> Document {
    let mut builder = TreeBuilder::new(fallback_title);
    let mut heading: Option<(usize, String)> = None;
    let mut code: Option<(LineType, String)> = None;

    for event in Parser::new(content) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                builder.flush_paragraph();
                heading = Some((heading_level(level), String::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, title)) = heading.take() {
                    builder.open_section(level, title.trim());
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                builder.flush_paragraph();
                let kind = match kind {
                    CodeBlockKind::Fenced(info) => {
                        fence_kind(info.split_whitespace().next().unwrap_or(""))
                    }
                    CodeBlockKind::Indented => LineType::Formatted,
                };
                code = Some((kind, String::new()));
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((kind, text)) = code.take() {
                    builder.push_code(kind, &text);
                }
            }
            Event::Start(Tag::Item) | Event::End(TagEnd::Item) | Event::End(TagEnd::Paragraph) => {
                builder.flush_paragraph();
            }
            Event::Text(text) => {
                if let Some((_, title)) = heading.as_mut() {
                    title.push_str(&text);
                } else if let Some((_, body)) = code.as_mut() {
                    body.push_str(&text);
                } else {
                    builder.paragraph.push_str(&text);
                }
            }
            Event::Code(span) => {
                if let Some((_, title)) = heading.as_mut() {
                    title.push_str(&span);
                } else {
                    if span.starts_with('/') && !span.contains(char::is_whitespace) {
                        builder.files.push(span.to_string());
                    }
                    builder.paragraph.push_str(&span);
                }
            }
            Event::SoftBreak | Event::HardBreak => match heading.as_mut() {
                Some((_, title)) => title.push(' '),
                None => builder.paragraph.push('\n'),
            },
            _ => {}
        }
    }

    builder.finish(source)
}

/// Convert the file at `path`, choosing the converter by extension.
pub fn convert_file(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let source = path.display().to_string();
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => parse_curated(&content, &source),
        Some("md") | Some("markdown") | Some("txt") => {
            let title = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled");
            Ok(parse_markdown(&content, &source, title))
        }
        _ => bail!("Unsupported document format: {}", path.display()),
    }
}

fn fence_kind(info: &str) -> LineType {
    match info {
        "" | "sh" | "bash" | "shell" | "console" | "zsh" => LineType::Command,
        _ => LineType::Formatted,
    }
}

fn heading_level(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn warning(line: &str) -> Option<&str> {
    let stripped = line.trim_start_matches('>').trim_start();
    ["WARNING:", "**Warning:**", "**Warning**:", "Warning:"]
        .iter()
        .find_map(|p| stripped.strip_prefix(p))
        .map(str::trim)
}

/// Open headings as a stack of `(level, node)`; level `0` is the
/// fallback section for text before the first heading.
struct TreeBuilder<'a> {
    fallback_title: &'a str,
    roots: Vec<SectionNode>,
    stack: Vec<(usize, SectionNode)>,
    paragraph: String,
    files: Vec<String>,
}

impl<'a> TreeBuilder<'a> {
    fn new(fallback_title: &'a str) -> Self {
        Self {
            fallback_title,
            roots: Vec::new(),
            stack: Vec::new(),
            paragraph: String::new(),
            files: Vec::new(),
        }
    }

    fn open_section(&mut self, level: usize, title: &str) {
        while self.stack.last().is_some_and(|(l, _)| *l >= level || *l == 0) {
            self.pop();
        }
        self.stack.push((level, SectionNode::leaf(Section::new(title))));
    }

    fn current(&mut self) -> &mut Section {
        if self.stack.is_empty() {
            self.stack
                .push((0, SectionNode::leaf(Section::new(self.fallback_title))));
        }
        let last = self.stack.len() - 1;
        &mut self.stack[last].1.section
    }

    fn push_line(&mut self, line: Line) {
        let section = self.current();
        *section = std::mem::take(section).with_line(line);
    }

    fn push_code(&mut self, kind: LineType, text: &str) {
        for raw in text.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let text = if kind == LineType::Command {
                trimmed.trim_start_matches("$ ").trim_start_matches("# ")
            } else {
                raw.trim_end()
            };
            self.push_line(Line::new(kind, text));
        }
    }

    fn flush_paragraph(&mut self) {
        let paragraph = std::mem::take(&mut self.paragraph);
        for text in paragraph.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let line = match warning(text) {
                Some(rest) => Line::new(LineType::Warning, rest),
                None => Line::text(text),
            };
            self.push_line(line);
        }
        let files = std::mem::take(&mut self.files);
        if !files.is_empty() {
            let section = self.current();
            *section = std::mem::take(section).with_files(files);
        }
    }

    fn pop(&mut self) {
        if let Some((_, node)) = self.stack.pop() {
            match self.stack.last_mut() {
                Some((_, parent)) => parent.children.push(node),
                None => self.roots.push(node),
            }
        }
    }

    fn finish(mut self, source: &str) -> Document {
        self.flush_paragraph();
        while !self.stack.is_empty() {
            self.pop();
        }
        Document::from_tree(source, self.roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURATED: &str = r#"
Id: Refresh repositories with zypper
Aliases:
  - update package lists
  - zypper refresh
Text: |
  Refreshing downloads the current metadata
  of all enabled repositories.
Commands:
  - zypper refresh
Files:
  - /etc/zypp/repos.d/
"#;

    #[test]
    fn test_curated_sections() {
        let doc = parse_curated(CURATED, "zypper.yaml").unwrap();
        assert_eq!(doc.sections.len(), 3);
        let canonical = &doc.sections[0];
        assert!(!canonical.is_alias);
        assert_eq!(canonical.lines.len(), 3);
        assert_eq!(canonical.commands, vec!["zypper refresh"]);
        assert_eq!(canonical.files, vec!["/etc/zypp/repos.d/"]);
        assert!(doc.sections[1..].iter().all(|s| s.is_alias && s.lines.is_empty()));
        assert_eq!(doc.files, vec!["/etc/zypp/repos.d/"]);
        assert_eq!(doc.resolve_section(2).unwrap().title, canonical.title);
    }

    #[test]
    fn test_curated_hash_ignores_formatting() {
        let reformatted = CURATED.replace("of all enabled", "of  all   enabled");
        assert_eq!(
            parse_curated(CURATED, "a.yaml").unwrap().hash,
            parse_curated(&reformatted, "b.yaml").unwrap().hash
        );
    }

    #[test]
    fn test_curated_rejects_missing_id() {
        assert!(parse_curated("Text: hello\n", "x.yaml").is_err());
        assert!(parse_curated("Id: ' '\nText: hello\n", "x.yaml").is_err());
    }

    #[test]
    fn test_markdown_tree() {
        let doc = parse_markdown(
            "intro text\n\
             # Snapper\n\
             ## Rollback\n\
             Use `/etc/snapper/configs/root` to tune.\n\
             ```sh\n\
             $ snapper rollback\n\
             ```\n\
             > WARNING: reboot afterwards\n\
             # Btrfs\n\
             Balance regularly.\n",
            "snapper.md",
            "snapper",
        );
        let titles: Vec<&str> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["snapper", "Snapper / Rollback", "Btrfs"]);
        let rollback = &doc.sections[1];
        assert_eq!(rollback.commands, vec!["snapper rollback"]);
        assert_eq!(rollback.files, vec!["/etc/snapper/configs/root"]);
        assert_eq!(rollback.lines.last().unwrap().kind, LineType::Warning);
        assert_eq!(doc.commands, vec!["snapper rollback"]);
    }

    #[test]
    fn test_markdown_tilde_fence_is_not_a_heading() {
        let doc = parse_markdown(
            "# Intro\ntext\n~~~\n# not a heading\n~~~\n",
            "intro.md",
            "intro",
        );
        let titles: Vec<&str> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Intro"]);
        assert_eq!(doc.sections[0].commands, vec!["not a heading"]);
    }

    #[test]
    fn test_markdown_setext_heading() {
        let doc = parse_markdown("Title\n=====\nbody\n\nSub\n---\nmore\n", "s.md", "s");
        let titles: Vec<&str> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Title", "Sub"]);
        assert_eq!(doc.sections[0].lines[0].text, "body");
    }

    #[test]
    fn test_markdown_indented_code_is_formatted() {
        let doc = parse_markdown("# Config\n\n    [main]\n    key = 1\n", "c.md", "c");
        let kinds: Vec<LineType> = doc.sections[0].lines.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![LineType::Formatted, LineType::Formatted]);
        assert!(doc.sections[0].commands.is_empty());
    }
}
