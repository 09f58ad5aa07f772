//! Plain-text rendering of sections and documents.
//!
//! The rendered section text is what gets embedded at ingestion time and
//! what the context assembler places into the prompt.

use std::fmt::Write;

use crate::models::{Document, LineType, Section};

impl Section {
    /// Render as `# Title` followed by one line per fragment.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", self.title);
        for line in &self.lines {
            let _ = match line.kind {
                LineType::Command => writeln!(out, "'''{}'''", line.text),
                LineType::Subtitle => writeln!(out, "## {}", line.text),
                LineType::Subsubtitle => writeln!(out, "### {}", line.text),
                LineType::Warning => writeln!(out, "WARNING: {}", line.text),
                _ => writeln!(out, "{}", line.text),
            };
        }
        collapse_blank_lines(&out)
    }
}

impl Document {
    /// Source and section titles only; used for listings.
    pub fn render_titles(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Source: {}", self.source);
        let _ = writeln!(out, "Hash: {}", self.hash);
        for section in &self.sections {
            if section.is_alias {
                let _ = writeln!(out, "  {} (alias)", section.title);
            } else {
                let _ = writeln!(out, "  {}", section.title);
            }
        }
        out
    }

    /// All sections rendered in order.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .filter(|s| !s.is_alias)
            .map(Section::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One pass: each `\n\n` pair becomes a single newline.
fn collapse_blank_lines(text: &str) -> String {
    text.replace("\n\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Line, Section};

    #[test]
    fn test_render_line_prefixes() {
        let section = Section::new("Firewall")
            .with_line(Line::new(LineType::Subtitle, "Opening ports"))
            .with_line(Line::command("firewall-cmd --add-port=22/tcp"))
            .with_line(Line::new(LineType::Subsubtitle, "Permanent"))
            .with_line(Line::new(LineType::Warning, "Reload afterwards"))
            .with_line(Line::text("Done."));
        assert_eq!(
            section.render(),
            "# Firewall\n## Opening ports\n'''firewall-cmd --add-port=22/tcp'''\n### Permanent\nWARNING: Reload afterwards\nDone.\n"
        );
    }

    #[test]
    fn test_render_collapses_blank_lines() {
        let section = Section::new("t").with_line(Line::text("a\n\nb"));
        assert_eq!(section.render(), "# t\na\nb\n");
        let section = Section::new("t").with_line(Line::text("a\n\n\n\n\nb"));
        assert_eq!(section.render(), "# t\na\n\n\nb\n");
    }

    #[test]
    fn test_render_titles_marks_aliases() {
        let doc = Document::new(
            "curated/zypper.yaml",
            vec![Section::new("zypper"), Section::alias("install software")],
        );
        let out = doc.render_titles();
        assert!(out.starts_with("Source: curated/zypper.yaml\n"));
        assert!(out.contains("  install software (alias)\n"));
    }
}
