//! Domain types shared by the loader, trainer and evaluator.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type DocId = String;
pub type QueryId = String;

/// Document id -> content. `None` marks an id referenced by questions but
/// absent from the training documents.
pub type Corpus = BTreeMap<DocId, Option<String>>;

/// A chunk of source text from one of the dataset splits.
///
/// `paperFile`/`chunkIndex` are written by the data generator and kept as
/// metadata only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl Document {
    pub fn new(id: impl Into<DocId>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), paper_file: None, chunk_index: None }
    }
}

/// A generated question, keyed `"{doc_id}_{index}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: QueryId,
    pub doc_id: DocId,
    pub text: String,
}

impl Question {
    pub fn composite_id(doc_id: &str, index: usize) -> QueryId { format!("{doc_id}_{index}") }
}

/// One (query, positive passage) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingExample {
    pub query: String,
    pub passage: String,
}

/// Questions grouped by the document they were generated from.
///
/// Deserialized from a JSON object `doc_id -> [question, ...]`; entries keep
/// the file's order so example order (and therefore in-batch negatives) is
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionSet {
    entries: Vec<(DocId, Vec<String>)>,
}

impl QuestionSet {
    pub fn new(entries: Vec<(DocId, Vec<String>)>) -> Self { Self { entries } }

    /// Number of documents with questions.
    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Total number of questions across all documents.
    pub fn total_questions(&self) -> usize { self.entries.iter().map(|(_, qs)| qs.len()).sum() }

    pub fn iter(&self) -> impl Iterator<Item = (&DocId, &[String])> {
        self.entries.iter().map(|(id, qs)| (id, qs.as_slice()))
    }
}

impl<'de> Deserialize<'de> for QuestionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuestionSetVisitor;

        impl<'de> Visitor<'de> for QuestionSetVisitor {
            type Value = QuestionSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping document ids to lists of questions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((doc_id, questions)) = map.next_entry::<DocId, Vec<String>>()? {
                    entries.push((doc_id, questions));
                }
                Ok(QuestionSet { entries })
            }
        }

        deserializer.deserialize_map(QuestionSetVisitor)
    }
}

/// The aligned mappings built from questions and documents, plus the
/// flattened training examples.
#[derive(Debug, Clone, Default)]
pub struct PairSet {
    /// Queries in question-file order.
    pub queries: Vec<Question>,
    pub relevant_docs: BTreeMap<QueryId, BTreeSet<DocId>>,
    pub corpus: Corpus,
    pub examples: Vec<TrainingExample>,
}

impl PairSet {
    /// Corpus entries that resolved to a document.
    pub fn resolved_corpus(&self) -> impl Iterator<Item = (&DocId, &str)> {
        self.corpus.iter().filter_map(|(id, content)| content.as_deref().map(|c| (id, c)))
    }

    /// Document ids referenced by questions but missing from the documents.
    pub fn unresolved(&self) -> Vec<&DocId> {
        self.corpus.iter().filter(|(_, c)| c.is_none()).map(|(id, _)| id).collect()
    }
}
