//! Tabular view of artifact records.

use std::fmt;

use crate::cache::Artifact;
use crate::value::Kwargs;

const HEADERS: [&str; 7] = [
    "key",
    "serializer",
    "load_kwargs",
    "dump_kwargs",
    "custom_fields",
    "checksum",
    "created_at",
];

const CHECKSUM_WIDTH: usize = 12;

/// One row per artifact, rendered with box-drawing characters.
#[derive(Debug, Clone)]
pub struct ArtifactTable {
    rows: Vec<Vec<String>>,
    column_widths: Vec<usize>,
}

fn compact(kwargs: &Kwargs) -> String {
    serde_json::to_string(kwargs).unwrap_or_else(|_| "{}".to_string())
}

impl ArtifactTable {
    pub fn new(artifacts: &[Artifact]) -> Self {
        let mut table = Self {
            rows: Vec::with_capacity(artifacts.len()),
            column_widths: HEADERS.iter().map(|h| h.chars().count()).collect(),
        };
        for artifact in artifacts {
            table.push(artifact);
        }
        table
    }

    fn push(&mut self, artifact: &Artifact) {
        let checksum = artifact
            .checksum
            .as_deref()
            .map(|c| c.chars().take(CHECKSUM_WIDTH).collect())
            .unwrap_or_else(|| "-".to_string());
        let row = vec![
            artifact.key.clone(),
            artifact.serializer.clone(),
            compact(&artifact.load_kwargs),
            compact(&artifact.dump_kwargs),
            compact(&artifact.custom_fields),
            checksum,
            artifact.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ];
        for (width, cell) in self.column_widths.iter_mut().zip(&row) {
            *width = (*width).max(cell.chars().count());
        }
        self.rows.push(row);
    }

    /// Number of artifacts shown.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys in row order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row[0].as_str())
    }

    fn border(&self, f: &mut fmt::Formatter<'_>, left: char, mid: char, right: char) -> fmt::Result {
        let segments: Vec<String> = self
            .column_widths
            .iter()
            .map(|width| "─".repeat(width + 2))
            .collect();
        write!(f, "{}{}{}", left, segments.join(&mid.to_string()), right)
    }

    fn row<S: AsRef<str>>(&self, f: &mut fmt::Formatter<'_>, cells: &[S]) -> fmt::Result {
        write!(f, "│")?;
        for (cell, width) in cells.iter().zip(&self.column_widths) {
            write!(f, " {:width$} │", cell.as_ref(), width = width)?;
        }
        Ok(())
    }
}

impl fmt::Display for ArtifactTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.border(f, '┌', '┬', '┐')?;
        writeln!(f)?;
        self.row(f, &HEADERS)?;
        writeln!(f)?;
        self.border(f, '├', '┼', '┤')?;
        writeln!(f)?;
        for row in &self.rows {
            self.row(f, row)?;
            writeln!(f)?;
        }
        self.border(f, '└', '┴', '┘')
    }
}
