//! Persisted result sets.
//!
//! A bundle stored under tag `T` in folder `F` consists of
//!
//! - `F/T_co-occurrence.csv.zip`: the long-format table
//! - `F/T_vectorized_corpus.zip`: partition x pair matrix, pair vocabulary, partition index
//! - `F/T_vocabulary.json`: the word vocabulary
//! - `F/T_document_index.csv`: the source document index (tab separated)
//! - `F/T_token_window_counts.json`: corpus and per-partition window counts
//! - `F/T_co-occurrence.json`: the options used, crate version and creation time
//!
//! Bundles are discovered by the `_co-occurrence.csv.zip` suffix.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::aggregate::WindowCounts;
use crate::corpus::VectorizedCorpus;
use crate::document_index::DocumentIndex;
use crate::error::{CoOccurrenceError, Result};
use crate::pipeline::{CoOccurrenceComputeResult, ComputeOpts};
use crate::reader::{ReaderOpts, TokensTransformOpts};
use crate::significance::PartitionWindowCounts;
use crate::table::CoOccurrenceTable;
use crate::vocabulary::Token2Id;

pub const CO_OCCURRENCE_SUFFIX: &str = "_co-occurrence.csv.zip";
const CORPUS_SUFFIX: &str = "_vectorized_corpus.zip";
const VOCABULARY_SUFFIX: &str = "_vocabulary.json";
const DOCUMENT_INDEX_SUFFIX: &str = "_document_index.csv";
const WINDOW_COUNTS_SUFFIX: &str = "_token_window_counts.json";
const OPTIONS_SUFFIX: &str = "_co-occurrence.json";

/// Options sidecar written next to every bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOptions {
    pub tag: String,
    pub version: String,
    pub created: String,
    pub source: Option<String>,
    pub compute_opts: ComputeOpts,
    pub reader_opts: Option<ReaderOpts>,
    pub transform_opts: Option<TokensTransformOpts>,
}

impl ComputeOptions {
    pub fn new(tag: &str, compute_opts: ComputeOpts) -> Self {
        ComputeOptions {
            tag: tag.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            source: None,
            compute_opts,
            reader_opts: None,
            transform_opts: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredWindowCounts {
    corpus: WindowCounts,
    partitions: PartitionWindowCounts,
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub tag: String,
    pub folder: PathBuf,
    pub co_occurrences: CoOccurrenceTable,
    pub vocabulary: Token2Id,
    pub document_index: DocumentIndex,
    pub window_counts: PartitionWindowCounts,
    pub corpus_window_counts: WindowCounts,
    pub corpus: VectorizedCorpus,
    pub options: ComputeOptions,
}

impl Bundle {
    pub fn new(result: CoOccurrenceComputeResult, folder: &Path, options: ComputeOptions) -> Self {
        Bundle {
            tag: options.tag.clone(),
            folder: folder.to_path_buf(),
            co_occurrences: result.co_occurrences,
            vocabulary: result.vocabulary,
            document_index: result.document_index,
            window_counts: result.window_counts,
            corpus_window_counts: result.corpus_window_counts,
            corpus: result.corpus,
            options,
        }
    }

    fn path(&self, suffix: &str) -> PathBuf {
        self.folder.join(format!("{}{suffix}", self.tag))
    }

    /// Writes every artifact; returns the path of the co-occurrence archive.
    pub fn store(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.folder)?;

        let mut table = Vec::new();
        self.co_occurrences.store(&mut table)?;
        let filename = folder_and_tag_to_filename(&self.folder, &self.tag);
        let entry = format!("{}_co-occurrence.csv", self.tag);
        write_zip(&filename, &[(entry.as_str(), table)])?;

        self.corpus.store(&self.path(CORPUS_SUFFIX))?;
        std::fs::write(self.path(VOCABULARY_SUFFIX), serde_json::to_vec(&self.vocabulary)?)?;
        self.document_index.store(&self.path(DOCUMENT_INDEX_SUFFIX))?;
        let window_counts = StoredWindowCounts {
            corpus: self.corpus_window_counts.clone(),
            partitions: self.window_counts.clone(),
        };
        std::fs::write(self.path(WINDOW_COUNTS_SUFFIX), serde_json::to_vec(&window_counts)?)?;
        std::fs::write(self.path(OPTIONS_SUFFIX), serde_json::to_vec_pretty(&self.options)?)?;

        info!("stored bundle {} in {}", self.tag, self.folder.display());
        Ok(filename)
    }

    /// Loads a bundle from the path of its co-occurrence archive.
    pub fn load(filename: &Path) -> Result<Self> {
        let tag = tag_from_filename(filename).ok_or_else(|| {
            CoOccurrenceError::usage(format!(
                "{} does not end with {CO_OCCURRENCE_SUFFIX}",
                filename.display()
            ))
        })?;
        let folder = filename.parent().map(Path::to_path_buf).unwrap_or_default();
        let path = |suffix: &str| folder.join(format!("{tag}{suffix}"));

        let mut archive = ZipArchive::new(File::open(filename)?)?;
        let table = read_zip_entry(&mut archive, &format!("{tag}_co-occurrence.csv"))?;
        let co_occurrences = CoOccurrenceTable::load(table.as_slice())?;

        let vocabulary: Token2Id =
            serde_json::from_slice(&std::fs::read(path(VOCABULARY_SUFFIX))?)?;
        let window_counts: StoredWindowCounts =
            serde_json::from_slice(&std::fs::read(path(WINDOW_COUNTS_SUFFIX))?)?;
        let options: ComputeOptions =
            serde_json::from_slice(&std::fs::read(path(OPTIONS_SUFFIX))?)?;

        Ok(Bundle {
            co_occurrences,
            vocabulary,
            document_index: DocumentIndex::load(&path(DOCUMENT_INDEX_SUFFIX))?,
            window_counts: window_counts.partitions,
            corpus_window_counts: window_counts.corpus,
            corpus: VectorizedCorpus::load(&path(CORPUS_SUFFIX))?,
            options,
            folder,
            tag,
        })
    }
}

pub fn folder_and_tag_to_filename(folder: &Path, tag: &str) -> PathBuf {
    folder.join(format!("{tag}{CO_OCCURRENCE_SUFFIX}"))
}

/// `a/b/TAG_co-occurrence.csv.zip` -> `TAG`
pub fn tag_from_filename(filename: &Path) -> Option<String> {
    filename
        .file_name()?
        .to_str()?
        .strip_suffix(CO_OCCURRENCE_SUFFIX)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
}

/// Co-occurrence archives below `folder`, sorted by path.
pub fn find_bundles(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.map_err(|e| CoOccurrenceError::Io(e.into()))?;
        if entry.file_type().is_file() && tag_from_filename(entry.path()).is_some() {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

pub(crate) fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in entries {
        zip.start_file(*name, deflated)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

pub(crate) fn read_zip_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name)?;
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_index::Document;
    use crate::pipeline::compute;
    use crate::reader::TokenizedDocument;
    use crate::windows::ContextOpts;

    fn bundle(folder: &Path) -> Bundle {
        let documents: Vec<TokenizedDocument> = [("a_1990.txt", "a b c a"), ("b_1991.txt", "b c d")]
            .into_iter()
            .map(|(filename, text)| TokenizedDocument {
                filename: filename.into(),
                tokens: text.split_whitespace().map(String::from).collect(),
                n_raw_tokens: 4,
            })
            .collect();
        let index = DocumentIndex::new(vec![
            Document::new(0, "a_1990.txt").with_attribute("year", 1990).with_token_counts(4, 4),
            Document::new(1, "b_1991.txt").with_attribute("year", 1991).with_token_counts(4, 3),
        ])
        .unwrap();
        let opts = ComputeOpts::new(ContextOpts::new(1).unwrap().with_partition_keys(["year"]));
        let result = compute(&documents, index, &opts).unwrap();
        Bundle::new(result, folder, ComputeOptions::new("demo", opts))
    }

    #[test]
    fn tag_and_filename_are_inverse() {
        let filename = folder_and_tag_to_filename(Path::new("out"), "riksdag");
        assert_eq!(filename, Path::new("out/riksdag_co-occurrence.csv.zip"));
        assert_eq!(tag_from_filename(&filename).as_deref(), Some("riksdag"));
        assert_eq!(tag_from_filename(Path::new("x_co-occurrence.json")), None);
        assert_eq!(tag_from_filename(Path::new("_co-occurrence.csv.zip")), None);
    }

    #[test]
    fn store_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = bundle(dir.path());
        let filename = bundle.store().unwrap();
        assert!(dir.path().join("demo_vectorized_corpus.zip").exists());
        assert!(dir.path().join("demo_co-occurrence.json").exists());

        let loaded = Bundle::load(&filename).unwrap();
        assert_eq!(loaded.tag, "demo");
        assert_eq!(loaded.co_occurrences, bundle.co_occurrences);
        assert_eq!(loaded.vocabulary, bundle.vocabulary);
        assert_eq!(loaded.document_index, bundle.document_index);
        assert_eq!(loaded.window_counts, bundle.window_counts);
        assert_eq!(loaded.corpus.sum(), bundle.corpus.sum());
        assert_eq!(loaded.options, bundle.options);
        assert_eq!(loaded.options.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn find_bundles_walks_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        bundle(&dir.path().join("one")).store().unwrap();
        let mut second = bundle(&dir.path().join("two").join("deep"));
        second.tag = "other".into();
        second.store().unwrap();
        let found = find_bundles(dir.path()).unwrap();
        let tags: Vec<String> = found.iter().filter_map(|p| tag_from_filename(p)).collect();
        assert_eq!(tags, vec!["demo", "other"]);
    }
}
