#![forbid(unsafe_code)]
//! # text_cooccurrence
//!
//! Windowed co-occurrence statistics for tokenized text corpora.
//!
//! Documents are slid over with a symmetric context window, optionally only
//! around a set of concept tokens. Unordered word pairs are counted per
//! partition (e.g. per year), normalized by document and token totals,
//! weighted by significance metrics (PPMI, LLR, Dice, HAL ...) and stored
//! as a bundle that can be queried later.
//!
//! ## Example
//! ```
//! use text_cooccurrence::{
//!     ComputeOpts, ContextOpts, Document, DocumentIndex, TokenizedDocument, compute,
//! };
//!
//! let documents = vec![TokenizedDocument {
//!     filename: "a_1990.txt".into(),
//!     tokens: ["a", "b", "c"].map(String::from).to_vec(),
//!     n_raw_tokens: 3,
//! }];
//! let index = DocumentIndex::new(vec![
//!     Document::new(0, "a_1990.txt").with_attribute("year", 1990).with_token_counts(3, 3),
//! ])
//! .unwrap();
//! let opts = ComputeOpts::new(ContextOpts::new(1).unwrap().with_partition_keys(["year"]));
//! let result = compute(&documents, index, &opts).unwrap();
//! // windows: [* * a] [* a b] [a b c] [b c *]
//! assert_eq!(result.co_occurrences.total_value(), 5);
//! ```

pub mod aggregate;
pub mod bundle;
pub mod corpus;
pub mod document_index;
pub mod error;
pub mod export;
pub mod helper;
pub mod pipeline;
pub mod reader;
pub mod significance;
pub mod table;
pub mod vocabulary;
pub mod windows;

pub use aggregate::{
    Aggregate, PartitionedAggregator, TermTermMatrix, Weighting, WindowAggregator, WindowCounts,
};
pub use bundle::{
    Bundle, ComputeOptions, find_bundles, folder_and_tag_to_filename, tag_from_filename,
};
pub use corpus::VectorizedCorpus;
pub use document_index::{Document, DocumentIndex, FilenameField, PivotValue};
pub use error::{CoOccurrenceError, Result};
pub use export::{ExportFormat, csv_safe_cell, export_table};
pub use helper::{CoOccurrenceHelper, TokenRef};
pub use pipeline::{CoOccurrenceComputeResult, ComputeOpts, compute};
pub use reader::{
    ContentType, CorpusReader, ReaderOpts, StemLang, StemMode, TokenizedDocument,
    TokensTransformOpts,
};
pub use significance::{KeynessMetric, partitioned_significances};
pub use table::{CoOccurrence, CoOccurrenceTable, TableBuilder, TotalsBasis, ValueColumn};
pub use vocabulary::Token2Id;
pub use windows::{ContextOpts, DEFAULT_PAD};
