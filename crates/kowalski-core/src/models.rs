//! Core data models used throughout Kowalski.
//!
//! A [`Document`] is an ordered list of [`Section`]s, each made of typed
//! [`Line`]s. Documents are identified by a content hash that ignores the
//! source path and any computed embeddings, so re-ingesting identical content
//! from another location is recognised as the same document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of a text fragment inside a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Text,
    Command,
    File,
    Formatted,
    Title,
    Subtitle,
    Subsubtitle,
    Warning,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Text => "text",
            LineType::Command => "command",
            LineType::File => "file",
            LineType::Formatted => "formatted",
            LineType::Title => "title",
            LineType::Subtitle => "subtitle",
            LineType::Subsubtitle => "subsubtitle",
            LineType::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: LineType,
}

impl Line {
    pub fn new(kind: LineType, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(LineType::Text, text)
    }

    pub fn command(text: impl Into<String>) -> Self {
        Self::new(LineType::Command, text)
    }
}

/// A titled unit of text within a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<Line>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Present only once the section has been embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Alternate title for the document's canonical section; carries no content.
    #[serde(default)]
    pub is_alias: bool,
}

impl Section {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn alias(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_alias: true,
            ..Default::default()
        }
    }

    pub fn with_line(mut self, line: Line) -> Self {
        match line.kind {
            LineType::File => merge_unique(&mut self.files, std::slice::from_ref(&line.text)),
            LineType::Command => merge_unique(&mut self.commands, std::slice::from_ref(&line.text)),
            _ => {}
        }
        self.lines.push(line);
        self
    }

    pub fn with_files<I: IntoIterator<Item = S>, S: Into<String>>(mut self, files: I) -> Self {
        let files: Vec<String> = files.into_iter().map(Into::into).collect();
        merge_unique(&mut self.files, &files);
        self
    }

    pub fn with_commands<I: IntoIterator<Item = S>, S: Into<String>>(mut self, commands: I) -> Self {
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        merge_unique(&mut self.commands, &commands);
        self
    }

    /// True when an embedding vector with at least one component is present.
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Text handed to the embedding provider for this section.
    pub fn embedding_text(&self) -> String {
        if self.is_alias {
            self.title.clone()
        } else {
            self.render()
        }
    }
}

/// A section together with its nested subsections, as produced by converters
/// for hierarchical formats.
#[derive(Debug, Clone, Default)]
pub struct SectionNode {
    pub section: Section,
    pub children: Vec<SectionNode>,
}

impl SectionNode {
    pub fn leaf(section: Section) -> Self {
        Self {
            section,
            children: Vec::new(),
        }
    }
}

/// Flatten a section tree into document order.
///
/// Pre-order traversal. A heading without content of its own is not emitted;
/// its title is folded into its children's titles as `Parent / Child`.
pub fn flatten(nodes: Vec<SectionNode>) -> Vec<Section> {
    let mut out = Vec::new();
    for node in nodes {
        flatten_into(node, None, &mut out);
    }
    out
}

fn flatten_into(node: SectionNode, prefix: Option<&str>, out: &mut Vec<Section>) {
    let SectionNode {
        mut section,
        children,
    } = node;
    if let Some(prefix) = prefix {
        section.title = format!("{} / {}", prefix, section.title);
    }
    let container = !section.is_alias
        && section.lines.is_empty()
        && section.files.is_empty()
        && section.commands.is_empty()
        && !children.is_empty();
    if container {
        for child in children {
            flatten_into(child, Some(&section.title), out);
        }
    } else {
        out.push(section);
        for child in children {
            flatten_into(child, None, out);
        }
    }
}

/// Append the entries of `extra` not yet present in `target`, keeping order.
pub fn merge_unique(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// A unit of knowledge: an ordered list of sections from one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Content digest; the durable identity of the document.
    pub hash: String,
    /// Origin locator, usually a file path.
    pub source: String,
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
}

impl Document {
    /// Build a document, aggregating files and commands and computing its hash.
    pub fn new(source: impl Into<String>, sections: Vec<Section>) -> Self {
        let mut doc = Self {
            hash: String::new(),
            source: source.into(),
            sections,
            files: Vec::new(),
            commands: Vec::new(),
        };
        doc.aggregate();
        doc.hash = doc.compute_hash();
        doc
    }

    /// Build a document from a section tree.
    pub fn from_tree(source: impl Into<String>, nodes: Vec<SectionNode>) -> Self {
        Self::new(source, flatten(nodes))
    }

    /// Recompute the document-level `files`/`commands` as the union over sections.
    pub fn aggregate(&mut self) {
        let mut files = Vec::new();
        let mut commands = Vec::new();
        for section in &self.sections {
            merge_unique(&mut files, &section.files);
            merge_unique(&mut commands, &section.commands);
        }
        self.files = files;
        self.commands = commands;
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// SHA-256 over the normalized content of all sections.
    ///
    /// Whitespace runs are collapsed and trimmed; `source` and embeddings do
    /// not contribute, so structurally identical inputs hash identically.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for section in &self.sections {
            hasher.update(b"S\0");
            hasher.update(normalize(&section.title).as_bytes());
            hasher.update(if section.is_alias { b"\0a" } else { b"\0c" });
            for line in &section.lines {
                hasher.update(b"\0L");
                hasher.update(line.kind.as_str().as_bytes());
                hasher.update(b"\0");
                hasher.update(normalize(&line.text).as_bytes());
            }
            for file in &section.files {
                hasher.update(b"\0F");
                hasher.update(file.as_bytes());
            }
            for cmd in &section.commands {
                hasher.update(b"\0C");
                hasher.update(normalize(cmd).as_bytes());
            }
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Section to present for an index ordinal.
    ///
    /// Alias sections resolve to the first non-alias section of the document.
    pub fn resolve_section(&self, ordinal: usize) -> Option<&Section> {
        let section = self.sections.get(ordinal)?;
        if !section.is_alias {
            return Some(section);
        }
        Some(self.sections.iter().find(|s| !s.is_alias).unwrap_or(section))
    }

    pub fn summary(&self, id: impl Into<String>, added_at: DateTime<Utc>) -> DocumentSummary {
        DocumentSummary {
            id: id.into(),
            hash: self.hash.clone(),
            source: self.source.clone(),
            sections: self.sections.len(),
            files: self.files.len(),
            commands: self.commands.len(),
            added_at,
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lightweight listing entry; never carries embeddings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    /// Store-native identifier.
    pub id: String,
    pub hash: String,
    pub source: String,
    pub sections: usize,
    pub files: usize,
    pub commands: usize,
    pub added_at: DateTime<Utc>,
}

/// A section returned by a retrieval query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedSection {
    pub section: Section,
    /// Distance to the query; lower is more similar.
    pub distance: f32,
    pub document_hash: String,
    /// Collection the document was resolved from.
    pub collection: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zypper_doc(source: &str) -> Document {
        Document::new(
            source,
            vec![
                Section::new("Installing packages")
                    .with_line(Line::text("Use zypper to install   packages."))
                    .with_line(Line::command("zypper in vim")),
                Section::new("Repositories")
                    .with_line(Line::new(LineType::File, "/etc/zypp/repos.d/"))
                    .with_line(Line::text("Repositories live here.")),
            ],
        )
    }

    #[test]
    fn test_hash_is_deterministic_and_ignores_source() {
        let a = zypper_doc("a.xml");
        let b = zypper_doc("copy/of/a.xml");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn test_hash_ignores_whitespace_runs_and_embeddings() {
        let a = zypper_doc("a.xml");
        let mut b = zypper_doc("a.xml");
        b.sections[0].lines[0].text = "  Use zypper to install packages.\n".into();
        b.sections[1].embedding = Some(vec![0.5, 0.25]);
        assert_eq!(a.hash, b.compute_hash());
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = zypper_doc("a.xml");
        let mut b = zypper_doc("a.xml");
        b.sections[1].title = "Repos".into();
        assert_ne!(a.hash, b.compute_hash());
    }

    #[test]
    fn test_alias_flag_contributes_to_hash() {
        let a = Document::new("x", vec![Section::new("zypper")]);
        let b = Document::new("x", vec![Section::alias("zypper")]);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_aggregate_is_ordered_union() {
        let doc = Document::new(
            "x",
            vec![
                Section::new("a").with_files(["/etc/a", "/etc/b"]).with_commands(["ls"]),
                Section::new("b").with_files(["/etc/b", "/etc/c"]).with_commands(["ls", "cat"]),
            ],
        );
        assert_eq!(doc.files, vec!["/etc/a", "/etc/b", "/etc/c"]);
        assert_eq!(doc.commands, vec!["ls", "cat"]);
    }

    #[test]
    fn test_with_line_tracks_files_and_commands() {
        let doc = zypper_doc("a.xml");
        assert_eq!(doc.sections[0].commands, vec!["zypper in vim"]);
        assert_eq!(doc.files, vec!["/etc/zypp/repos.d/"]);
    }

    #[test]
    fn test_resolve_alias_to_canonical() {
        let doc = Document::new(
            "curated.yaml",
            vec![
                Section::alias("install software"),
                Section::new("zypper-install").with_line(Line::text("zypper in <pkg>")),
                Section::alias("add package"),
            ],
        );
        assert_eq!(doc.resolve_section(0).unwrap().title, "zypper-install");
        assert_eq!(doc.resolve_section(2).unwrap().title, "zypper-install");
        assert_eq!(doc.resolve_section(1).unwrap().title, "zypper-install");
        assert!(doc.resolve_section(3).is_none());
    }

    #[test]
    fn test_resolve_alias_only_document_falls_back() {
        let doc = Document::new("x", vec![Section::alias("only")]);
        assert_eq!(doc.resolve_section(0).unwrap().title, "only");
    }

    #[test]
    fn test_flatten_folds_empty_headings() {
        let tree = vec![SectionNode {
            section: Section::new("Administration"),
            children: vec![
                SectionNode::leaf(Section::new("Users").with_line(Line::text("useradd"))),
                SectionNode {
                    section: Section::new("Network").with_line(Line::text("wicked")),
                    children: vec![SectionNode::leaf(
                        Section::new("DNS").with_files(["/etc/resolv.conf"]),
                    )],
                },
            ],
        }];
        let titles: Vec<String> = flatten(tree).into_iter().map(|s| s.title).collect();
        assert_eq!(
            titles,
            vec!["Administration / Users", "Administration / Network", "DNS"]
        );
    }

    #[test]
    fn test_from_tree_aggregates_nested_files() {
        let doc = Document::from_tree(
            "guide.xml",
            vec![SectionNode {
                section: Section::new("Top").with_line(Line::text("intro")),
                children: vec![SectionNode::leaf(
                    Section::new("Nested").with_files(["/etc/hosts"]),
                )],
            }],
        );
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.files, vec!["/etc/hosts"]);
    }

    #[test]
    fn test_embedding_text_for_alias_is_title() {
        assert_eq!(Section::alias("install vim").embedding_text(), "install vim");
    }

    #[test]
    fn test_document_json_shape() {
        let doc = zypper_doc("a.xml");
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["sections"][0]["lines"][1]["type"], "command");
        assert!(json["sections"][0].get("embedding").is_none());
    }
}
