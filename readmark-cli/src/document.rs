use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub lines: Vec<String>,
}

/// A plain text document split into chapters. A chapter starts at a `# ` heading line or a
/// form feed; text with neither is a single chapter.
#[derive(Debug, Clone)]
pub struct TextDocument {
    chapters: Vec<Chapter>,
}

impl TextDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut chapters = Vec::new();
        let mut current = Chapter {
            title: String::new(),
            lines: Vec::new(),
        };

        for line in text.lines() {
            let heading = line.strip_prefix("# ").map(str::trim).map(str::to_owned);
            let form_feed = line.starts_with('\u{c}');
            if heading.is_some() || form_feed {
                if !current.title.is_empty() || current.lines.iter().any(|l| !l.trim().is_empty())
                {
                    chapters.push(current);
                }
                let title = heading.unwrap_or_else(|| format!("Chapter {}", chapters.len() + 1));
                current = Chapter {
                    title,
                    lines: Vec::new(),
                };
                if form_feed {
                    let rest = line.trim_start_matches('\u{c}');
                    if !rest.is_empty() {
                        current.lines.push(rest.to_owned());
                    }
                }
                continue;
            }
            current.lines.push(line.to_owned());
        }
        if chapters.is_empty() || !current.title.is_empty() || !current.lines.is_empty() {
            chapters.push(current);
        }
        for (index, chapter) in chapters.iter_mut().enumerate() {
            if chapter.title.is_empty() {
                chapter.title = format!("Chapter {}", index + 1);
            }
        }
        Self { chapters }
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    pub fn line_counts(&self) -> Vec<usize> {
        self.chapters.iter().map(|chapter| chapter.lines.len()).collect()
    }
}
