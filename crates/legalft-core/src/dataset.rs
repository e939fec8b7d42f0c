use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{resolve_with_base, DataSettings};
use crate::error::{Error, Result};
use crate::types::{Document, PairSet, Question, QuestionSet, TrainingExample};

/// Resolved locations of the four dataset files.
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub training_set: PathBuf,
    pub validation_set: PathBuf,
    pub test_set: PathBuf,
    pub questions: PathBuf,
}

impl DatasetPaths {
    pub fn from_settings(data: &DataSettings, base: &Path) -> Self {
        let dir = resolve_with_base(base, &data.dir);
        Self {
            training_set: dir.join(&data.training_set),
            validation_set: dir.join(&data.validation_set),
            test_set: dir.join(&data.test_set),
            questions: dir.join(&data.questions),
        }
    }

    /// Default file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        let data = DataSettings::default();
        Self {
            training_set: dir.join(&data.training_set),
            validation_set: dir.join(&data.validation_set),
            test_set: dir.join(&data.test_set),
            questions: dir.join(&data.questions),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub training: Vec<Document>,
    /// Loaded and counted; not used for training or evaluation.
    pub validation: Vec<Document>,
    /// Loaded and counted; not used for training or evaluation.
    pub test: Vec<Document>,
    pub questions: QuestionSet,
}

pub struct DatasetLoader {
    paths: DatasetPaths,
}

impl DatasetLoader {
    pub fn new(paths: DatasetPaths) -> Self { Self { paths } }

    pub fn paths(&self) -> &DatasetPaths { &self.paths }

    pub fn load(&self) -> Result<DatasetSplits> {
        let training: Vec<Document> = read_json(&self.paths.training_set)?;
        info!("Loaded train set with {} items", training.len());
        let validation: Vec<Document> = read_json(&self.paths.validation_set)?;
        info!("Loaded validation set with {} items", validation.len());
        let test: Vec<Document> = read_json(&self.paths.test_set)?;
        info!("Loaded test set with {} items", test.len());
        let questions: QuestionSet = read_json(&self.paths.questions)?;
        info!("Loaded questions with {} items", questions.len());
        Ok(DatasetSplits { training, validation, test, questions })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            Error::Io { path: path.to_path_buf(), source }
        }
    })?;
    serde_json::from_str(&raw).map_err(|source| Error::Json { path: path.to_path_buf(), source })
}

/// Cross-reference questions with documents.
///
/// Each question becomes a query `"{doc_id}_{i}"` relevant to exactly its
/// source document. Document content is found by a linear scan. Unknown ids
/// are recorded as `None` in the corpus and yield no training example.
/// Documents with an empty question list are skipped entirely.
pub fn build_pairs(documents: &[Document], questions: &QuestionSet) -> PairSet {
    let mut pairs = PairSet::default();
    for (doc_id, texts) in questions.iter() {
        if texts.is_empty() { continue; }
        let content = find_content(documents, doc_id);
        if content.is_none() {
            warn!(doc_id = %doc_id, questions = texts.len(), "questions reference a document missing from the training set");
        }
        pairs.corpus.insert(doc_id.clone(), content.map(str::to_string));
        for (index, text) in texts.iter().enumerate() {
            let id = Question::composite_id(doc_id, index);
            pairs.relevant_docs.insert(id.clone(), BTreeSet::from([doc_id.clone()]));
            pairs.queries.push(Question { id, doc_id: doc_id.clone(), text: text.clone() });
        }
    }

    for question in &pairs.queries {
        if let Some(Some(passage)) = pairs.corpus.get(&question.doc_id) {
            pairs.examples.push(TrainingExample { query: question.text.clone(), passage: passage.clone() });
        }
    }
    info!("Created {} examples from {} questions", pairs.examples.len(), pairs.queries.len());
    pairs
}

fn find_content<'a>(documents: &'a [Document], doc_id: &str) -> Option<&'a str> {
    documents.iter().find(|d| d.id == doc_id).map(|d| d.content.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qs(entries: &[(&str, &[&str])]) -> QuestionSet {
        QuestionSet::new(
            entries
                .iter()
                .map(|(id, q)| (id.to_string(), q.iter().map(|s| s.to_string()).collect()))
                .collect(),
        )
    }

    #[test]
    fn two_documents_five_questions() {
        let docs = vec![Document::new("a", "alpha text"), Document::new("b", "bravo text")];
        let questions = qs(&[("a", &["q1", "q2", "q3"]), ("b", &["q4", "q5"])]);
        let pairs = build_pairs(&docs, &questions);
        assert_eq!(pairs.examples.len(), 5);
        assert_eq!(pairs.corpus.len(), 2);
        assert_eq!(pairs.queries.len(), 5);
        assert_eq!(pairs.relevant_docs["a_2"], BTreeSet::from(["a".to_string()]));
    }

    #[test]
    fn corpus_entries_match_document_content() {
        let docs = vec![Document::new("a", "alpha text"), Document::new("b", "bravo text"), Document::new("c", "unused")];
        let questions = qs(&[("b", &["q"]), ("a", &["q"])]);
        let pairs = build_pairs(&docs, &questions);
        for (id, content) in &pairs.corpus {
            let doc = docs.iter().find(|d| &d.id == id).unwrap();
            assert_eq!(content.as_deref(), Some(doc.content.as_str()));
        }
        // only referenced documents land in the corpus
        assert!(!pairs.corpus.contains_key("c"));
    }

    #[test]
    fn examples_follow_question_order() {
        let docs = vec![Document::new("z", "zulu"), Document::new("a", "alpha")];
        let questions = qs(&[("z", &["first", "second"]), ("a", &["third"])]);
        let pairs = build_pairs(&docs, &questions);
        let queries: Vec<&str> = pairs.examples.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["first", "second", "third"]);
        assert_eq!(pairs.examples[0].passage, "zulu");
        assert_eq!(pairs.queries[1].id, "z_1");
    }

    #[test]
    fn unknown_document_yields_null_corpus_entry() {
        let docs = vec![Document::new("a", "alpha")];
        let questions = qs(&[("a", &["q1"]), ("ghost", &["q2", "q3"])]);
        let pairs = build_pairs(&docs, &questions);
        assert_eq!(pairs.corpus.get("ghost"), Some(&None));
        assert_eq!(pairs.unresolved(), vec!["ghost"]);
        // queries are still recorded for the unresolved document
        assert_eq!(pairs.queries.len(), 3);
        assert_eq!(pairs.examples.len(), 1);
        assert_eq!(pairs.resolved_corpus().count(), 1);
    }

    #[test]
    fn documents_without_questions_stay_out_of_the_corpus() {
        let docs = vec![Document::new("a", "alpha"), Document::new("b", "bravo")];
        let questions = qs(&[("a", &["q"]), ("b", &[]), ("ghost", &[])]);
        let pairs = build_pairs(&docs, &questions);
        assert_eq!(pairs.corpus.len(), 1);
        assert_eq!(pairs.corpus.get("a"), Some(&Some("alpha".to_string())));
        assert!(pairs.unresolved().is_empty());
        assert_eq!(pairs.examples.len(), 1);
    }
}
