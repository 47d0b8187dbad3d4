//! Source document schemas, text assembly, and chunk records.
//!
//! Two source families exist: course syllabi exported as CSV rows with a
//! fixed set of recognized columns, and faculty regulation records
//! extracted from PDFs into JSON. Both collapse into [`Document`] — an
//! ordered text body plus the citation metadata the retrieval layer needs —
//! so the rest of the pipeline never touches the raw formats. Unrecognized
//! CSV columns are ignored by design.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::chunker::Chunker;
use crate::normalizer::normalize;

/// A logical source unit (one CSV row, one extracted PDF section),
/// immutable once built.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier, unique within a source.
    pub id: String,
    /// Source family label ("courses", "faculty-rules", ...).
    pub source_label: String,
    /// Composed, normalized text body.
    pub text: String,
    /// Citation metadata carried onto every chunk of this document.
    pub metadata: ChunkMetadata,
}

/// Fields needed to render a citation or filter results without
/// re-fetching the source document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Course or regulation title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Instructor name(s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor: Option<String>,
    /// Term / day / period string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Campus name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campus: Option<String>,
    /// Originating file (CSV export, PDF path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Syllabus or reference URL, when one was present in the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One retrieval unit: a bounded segment of a document's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier of the parent [`Document`].
    pub document_id: String,
    /// Zero-based position of this chunk within its document.
    pub sequence_index: usize,
    /// Chunk text.
    pub text: String,
    /// Citation metadata copied from the parent document.
    pub metadata: ChunkMetadata,
}

/// Recognized syllabus CSV columns. Short fields form the searchable
/// header line; long fields become labeled body sections. Extra columns in
/// the export are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyllabusRow {
    /// Course name.
    #[serde(default, rename = "科目名", alias = "course_name")]
    pub course_name: String,
    /// Instructor name(s).
    #[serde(default, rename = "担当教員", alias = "instructor")]
    pub instructor: String,
    /// Term / day / period.
    #[serde(default, rename = "学期曜日時限", alias = "schedule")]
    pub schedule: String,
    /// Campus.
    #[serde(default, rename = "キャンパス", alias = "campus")]
    pub campus: String,
    /// Classroom.
    #[serde(default, rename = "使用教室", alias = "room")]
    pub room: String,
    /// Eligible year.
    #[serde(default, rename = "配当年次", alias = "year")]
    pub year: String,
    /// Credits.
    #[serde(default, rename = "単位数", alias = "credits")]
    pub credits: String,
    /// Subject category.
    #[serde(default, rename = "科目区分", alias = "category")]
    pub category: String,
    /// Teaching method category.
    #[serde(default, rename = "授業方法区分", alias = "method")]
    pub method: String,
    /// Language of instruction.
    #[serde(default, rename = "授業で使用する言語", alias = "language")]
    pub language: String,
    /// Course level.
    #[serde(default, rename = "レベル", alias = "level")]
    pub level: String,
    /// Course format.
    #[serde(default, rename = "授業形態", alias = "format")]
    pub format: String,
    /// Subtitle.
    #[serde(default, rename = "副題", alias = "subtitle")]
    pub subtitle: String,
    /// Course overview.
    #[serde(default, rename = "授業概要", alias = "overview")]
    pub overview: String,
    /// Learning objectives.
    #[serde(default, rename = "授業の到達目標", alias = "objectives")]
    pub objectives: String,
    /// Preparation and review guidance.
    #[serde(default, rename = "事前・事後学習の内容", alias = "preparation")]
    pub preparation: String,
    /// Week-by-week plan.
    #[serde(default, rename = "授業計画", alias = "plan")]
    pub plan: String,
    /// Textbook.
    #[serde(default, rename = "教科書", alias = "textbook")]
    pub textbook: String,
    /// Reference works.
    #[serde(default, rename = "参考文献", alias = "references")]
    pub references: String,
    /// Grading policy.
    #[serde(default, rename = "成績評価方法", alias = "grading")]
    pub grading: String,
    /// Remarks, usually containing the syllabus URL.
    #[serde(default, rename = "備考・関連URL", alias = "remarks")]
    pub remarks: String,
}

impl SyllabusRow {
    /// Short (name, value) pairs joined into the document header.
    fn short_fields(&self) -> [(&'static str, &str); 13] {
        [
            ("科目名", &self.course_name),
            ("担当教員", &self.instructor),
            ("学期曜日時限", &self.schedule),
            ("キャンパス", &self.campus),
            ("使用教室", &self.room),
            ("配当年次", &self.year),
            ("単位数", &self.credits),
            ("科目区分", &self.category),
            ("授業方法区分", &self.method),
            ("授業で使用する言語", &self.language),
            ("レベル", &self.level),
            ("授業形態", &self.format),
            ("副題", &self.subtitle),
        ]
    }

    /// Long (label, value) pairs rendered as body sections.
    fn long_fields(&self) -> [(&'static str, &str); 8] {
        [
            ("授業概要", &self.overview),
            ("授業の到達目標", &self.objectives),
            ("事前・事後学習の内容", &self.preparation),
            ("授業計画", &self.plan),
            ("教科書", &self.textbook),
            ("参考文献", &self.references),
            ("成績評価方法", &self.grading),
            ("備考・関連URL", &self.remarks),
        ]
    }

    /// Assembles the row into a [`Document`]: short fields first as one
    /// searchable header line, long fields after as labeled sections.
    pub fn into_document(self, row_index: usize, source_file: &str) -> Document {
        let header = self
            .short_fields()
            .iter()
            .filter_map(|(name, value)| {
                let value = normalize(value);
                (!value.is_empty()).then(|| format!("{name}: {value}"))
            })
            .collect::<Vec<_>>()
            .join(" / ");
        let body = self
            .long_fields()
            .iter()
            .filter_map(|(name, value)| {
                let value = normalize(value);
                (!value.is_empty()).then(|| format!("{name}\n{value}"))
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let text = normalize(&format!("{header}\n\n{body}"));

        let metadata = ChunkMetadata {
            title: non_empty(normalize(&self.course_name)),
            instructor: non_empty(normalize(&self.instructor)),
            schedule: non_empty(normalize(&self.schedule)),
            campus: non_empty(normalize(&self.campus)),
            source_file: Some(source_file.to_string()),
            url: extract_url(&self.remarks),
        };

        Document {
            id: format!("course-{row_index}"),
            source_label: "courses".to_string(),
            text,
            metadata,
        }
    }
}

/// One faculty regulation record extracted from a PDF.
#[derive(Debug, Clone, Deserialize)]
pub struct FacultyRuleRecord {
    /// Record kind tag from the extraction layer.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Human-readable source label (faculty name).
    #[serde(default)]
    pub source_label: String,
    /// Regulation title.
    #[serde(default)]
    pub title: String,
    /// Section heading within the regulation.
    #[serde(default)]
    pub section: String,
    /// Regulation body text.
    #[serde(default)]
    pub content: String,
    /// Path of the source PDF.
    #[serde(default)]
    pub source_path: String,
}

impl FacultyRuleRecord {
    /// Assembles the record into a [`Document`].
    pub fn into_document(self, record_index: usize) -> Document {
        let mut parts = Vec::new();
        for piece in [&self.title, &self.section, &self.content] {
            let piece = normalize(piece);
            if !piece.is_empty() {
                parts.push(piece);
            }
        }
        let metadata = ChunkMetadata {
            title: non_empty(normalize(&self.title)),
            source_file: non_empty(self.source_path.clone()),
            ..ChunkMetadata::default()
        };
        Document {
            id: format!("rule-{record_index}"),
            source_label: "faculty-rules".to_string(),
            text: parts.join("\n\n"),
            metadata,
        }
    }
}

/// Reads a syllabus CSV export into documents, one per row, in file order.
pub fn load_syllabus_csv(path: &Path) -> Result<Vec<Document>> {
    let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let source_file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let mut documents = Vec::new();
    for (row_index, row) in reader.deserialize::<SyllabusRow>().enumerate() {
        let row = row.with_context(|| format!("invalid syllabus row {}", row_index + 1))?;
        documents.push(row.into_document(row_index, &source_file));
    }
    Ok(documents)
}

/// Reads a faculty-rule JSON array into documents, in file order.
pub fn load_faculty_rules(path: &Path) -> Result<Vec<Document>> {
    let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let records: Vec<FacultyRuleRecord> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid faculty-rule records in {path:?}"))?;
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(index, record)| record.into_document(index))
        .collect())
}

/// Chunks one document, assigning contiguous sequence indexes from zero
/// and copying the document's citation metadata onto every chunk.
pub fn chunk_document(chunker: &Chunker, document: &Document) -> Vec<Chunk> {
    chunker
        .chunk(&document.text)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| Chunk {
            document_id: document.id.clone(),
            sequence_index,
            text,
            metadata: document.metadata.clone(),
        })
        .collect()
}

/// Pulls the first http(s) URL out of a free-text remarks field.
fn extract_url(remarks: &str) -> Option<String> {
    let start = remarks.find("http://").or_else(|| remarks.find("https://"))?;
    let rest = &remarks[start..];
    let end = rest
        .find(|ch: char| ch.is_whitespace() || ch == '、' || ch == '。')
        .unwrap_or(rest.len());
    non_empty(rest[..end].to_string())
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
