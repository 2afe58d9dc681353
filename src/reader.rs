//! Corpus reader: turns a folder or zip archive of documents into token
//! streams plus a document index.
//!
//! The content kind is chosen explicitly with [`ContentType`]; each kind has
//! its own [`ContentSerializer`]. Token transforms (case folding, length and
//! stopword filters, stemming) run after serialization. Documents are read and
//! tokenized in parallel with rayon and collected in input order.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};
use rayon::prelude::*;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::document_index::{DocumentIndex, FilenameField};
use crate::error::{CoOccurrenceError, Result};
use crate::windows::DEFAULT_PAD;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Running text, split into words.
    #[default]
    Text,
    /// Pre-tokenized text, whitespace separated.
    Tokens,
    /// Tab-separated frame with token, lemma and part-of-speech columns.
    TaggedFrame,
}

impl ContentType {
    /// File extension read by default for this kind.
    pub fn default_extension(&self) -> &'static str {
        match self {
            ContentType::Text | ContentType::Tokens => "txt",
            ContentType::TaggedFrame => "csv",
        }
    }

    pub fn serializer(
        &self,
        tagged_frame: &TaggedFrameOpts,
        pad: &str,
    ) -> Box<dyn ContentSerializer> {
        match self {
            ContentType::Text => Box::new(TextSerializer),
            ContentType::Tokens => Box::new(TokensSerializer),
            ContentType::TaggedFrame => Box::new(TaggedFrameSerializer {
                opts: tagged_frame.clone(),
                pad: pad.to_string(),
            }),
        }
    }
}

impl FromStr for ContentType {
    type Err = CoOccurrenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ContentType::Text),
            "tokens" => Ok(ContentType::Tokens),
            "tagged_frame" | "tagged-frame" => Ok(ContentType::TaggedFrame),
            other => Err(CoOccurrenceError::config(format!("unknown content type {other:?}"))),
        }
    }
}

/// Serialized document: tokens plus the number of tokens before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serialized {
    pub tokens: Vec<String>,
    pub n_raw_tokens: u64,
}

/// Converts raw document content into tokens.
pub trait ContentSerializer: Send + Sync {
    fn serialize(&self, content: &str) -> Result<Serialized>;
}

pub struct TextSerializer;

impl ContentSerializer for TextSerializer {
    fn serialize(&self, content: &str) -> Result<Serialized> {
        let tokens = split_words(content);
        Ok(Serialized {
            n_raw_tokens: tokens.len() as u64,
            tokens,
        })
    }
}

/// Splits running text into words: hyphens separate words, surrounding
/// punctuation and possessive `'s` are removed.
pub fn split_words(content: &str) -> Vec<String> {
    content
        .split(|c: char| c.is_whitespace() || c == '-' || c == '\u{2014}')
        .map(|word| {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            word.strip_suffix("'s")
                .or_else(|| word.strip_suffix("\u{2019}s"))
                .unwrap_or(word)
        })
        .filter(|word| !word.is_empty())
        .map(String::from)
        .collect()
}

pub struct TokensSerializer;

impl ContentSerializer for TokensSerializer {
    fn serialize(&self, content: &str) -> Result<Serialized> {
        let tokens: Vec<String> = content.split_whitespace().map(String::from).collect();
        Ok(Serialized {
            n_raw_tokens: tokens.len() as u64,
            tokens,
        })
    }
}

/// Column names and extraction rules for tagged frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedFrameOpts {
    pub text_column: String,
    pub lemma_column: String,
    pub pos_column: String,
    pub lemmatize: bool,
    /// Keep only these tags; empty keeps every tag.
    pub pos_includes: BTreeSet<String>,
    /// Tags replaced by the pad token, preserving distances.
    pub pos_paddings: BTreeSet<String>,
    pub pos_excludes: BTreeSet<String>,
    /// Tokens kept regardless of tag.
    pub passthrough: BTreeSet<String>,
}

impl Default for TaggedFrameOpts {
    fn default() -> Self {
        TaggedFrameOpts {
            text_column: "token".to_string(),
            lemma_column: "baseform".to_string(),
            pos_column: "pos".to_string(),
            lemmatize: false,
            pos_includes: BTreeSet::new(),
            pos_paddings: BTreeSet::new(),
            pos_excludes: BTreeSet::new(),
            passthrough: BTreeSet::new(),
        }
    }
}

pub struct TaggedFrameSerializer {
    opts: TaggedFrameOpts,
    pad: String,
}

impl ContentSerializer for TaggedFrameSerializer {
    fn serialize(&self, content: &str) -> Result<Serialized> {
        let opts = &self.opts;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_reader(content.as_bytes());
        let headers = rdr.headers()?.clone();
        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                CoOccurrenceError::config(format!("tagged frame lacks column {name:?}"))
            })
        };
        let text_at = column(&opts.text_column)?;
        let pos_at = column(&opts.pos_column)?;
        let lemma_at = if opts.lemmatize {
            Some(column(&opts.lemma_column)?)
        } else {
            None
        };

        let mut tokens = Vec::new();
        let mut n_raw_tokens = 0u64;
        for record in rdr.records() {
            let record = record?;
            n_raw_tokens += 1;
            let text = record.get(text_at).unwrap_or_default();
            let token = lemma_at
                .and_then(|i| record.get(i))
                .filter(|lemma| !lemma.is_empty())
                .unwrap_or(text);
            let pos = record.get(pos_at).unwrap_or_default();
            if opts.passthrough.contains(token) || opts.passthrough.contains(text) {
                tokens.push(token.to_string());
            } else if opts.pos_paddings.contains(pos) {
                tokens.push(self.pad.clone());
            } else if (opts.pos_includes.is_empty() || opts.pos_includes.contains(pos))
                && !opts.pos_excludes.contains(pos)
            {
                tokens.push(token.to_string());
            }
        }
        Ok(Serialized {
            tokens,
            n_raw_tokens,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemLang {
    Ar,
    Da,
    De,
    El,
    En,
    Es,
    Fi,
    Fr,
    Hu,
    It,
    Nl,
    No,
    Pt,
    Ro,
    Ru,
    Sv,
    Ta,
    Tr,
}

impl StemLang {
    fn algorithm(self) -> Algorithm {
        match self {
            StemLang::Ar => Algorithm::Arabic,
            StemLang::Da => Algorithm::Danish,
            StemLang::De => Algorithm::German,
            StemLang::El => Algorithm::Greek,
            StemLang::En => Algorithm::English,
            StemLang::Es => Algorithm::Spanish,
            StemLang::Fi => Algorithm::Finnish,
            StemLang::Fr => Algorithm::French,
            StemLang::Hu => Algorithm::Hungarian,
            StemLang::It => Algorithm::Italian,
            StemLang::Nl => Algorithm::Dutch,
            StemLang::No => Algorithm::Norwegian,
            StemLang::Pt => Algorithm::Portuguese,
            StemLang::Ro => Algorithm::Romanian,
            StemLang::Ru => Algorithm::Russian,
            StemLang::Sv => Algorithm::Swedish,
            StemLang::Ta => Algorithm::Tamil,
            StemLang::Tr => Algorithm::Turkish,
        }
    }

    /// Maps a detected language to a supported stemmer language.
    pub fn from_whatlang(lang: whatlang::Lang) -> Option<Self> {
        use whatlang::Lang;
        Some(match lang {
            Lang::Ara => StemLang::Ar,
            Lang::Dan => StemLang::Da,
            Lang::Deu => StemLang::De,
            Lang::Ell => StemLang::El,
            Lang::Eng => StemLang::En,
            Lang::Spa => StemLang::Es,
            Lang::Fin => StemLang::Fi,
            Lang::Fra => StemLang::Fr,
            Lang::Hun => StemLang::Hu,
            Lang::Ita => StemLang::It,
            Lang::Nld => StemLang::Nl,
            Lang::Nob => StemLang::No,
            Lang::Por => StemLang::Pt,
            Lang::Ron => StemLang::Ro,
            Lang::Rus => StemLang::Ru,
            Lang::Swe => StemLang::Sv,
            Lang::Tam => StemLang::Ta,
            Lang::Tur => StemLang::Tr,
            _ => return None,
        })
    }
}

impl FromStr for StemLang {
    type Err = CoOccurrenceError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| CoOccurrenceError::config(format!("unsupported stemming language {s:?}")))
    }
}

impl fmt::Display for StemLang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{self:?}").to_ascii_lowercase();
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemMode {
    #[default]
    Off,
    /// Detect the language per document with whatlang.
    Auto,
    Force(StemLang),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensTransformOpts {
    pub to_lower: bool,
    pub min_len: usize,
    pub max_len: Option<usize>,
    pub only_alphabetic: bool,
    pub stopwords: BTreeSet<String>,
    pub stem_mode: StemMode,
    /// With `StemMode::Auto`, fail when no stemmer language is detected.
    pub stem_require_detected: bool,
}

impl Default for TokensTransformOpts {
    fn default() -> Self {
        TokensTransformOpts {
            to_lower: true,
            min_len: 1,
            max_len: None,
            only_alphabetic: false,
            stopwords: BTreeSet::new(),
            stem_mode: StemMode::Off,
            stem_require_detected: false,
        }
    }
}

impl TokensTransformOpts {
    /// Applies the transforms in order: case folding, stopwords, length and
    /// alphabetic filters, stemming. Tokens in `passthrough` are kept unchanged.
    pub fn transform(
        &self,
        tokens: Vec<String>,
        passthrough: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let stemmer = match self.stem_mode {
            StemMode::Off => None,
            StemMode::Force(lang) => Some(Stemmer::create(lang.algorithm())),
            StemMode::Auto => {
                let sample = tokens.join(" ");
                let detected =
                    whatlang::detect(&sample).and_then(|info| StemLang::from_whatlang(info.lang()));
                match detected {
                    Some(lang) => {
                        debug!("detected stemming language {lang}");
                        Some(Stemmer::create(lang.algorithm()))
                    }
                    None if self.stem_require_detected => {
                        return Err(CoOccurrenceError::config(
                            "no supported stemming language detected",
                        ));
                    }
                    None => {
                        warn!("no supported stemming language detected, stemming skipped");
                        None
                    }
                }
            }
        };

        let mut kept = Vec::with_capacity(tokens.len());
        for token in tokens {
            if passthrough.contains(&token) {
                kept.push(token);
                continue;
            }
            let token = if self.to_lower { token.to_lowercase() } else { token };
            if passthrough.contains(&token) {
                kept.push(token);
                continue;
            }
            if self.stopwords.contains(&token) {
                continue;
            }
            let len = token.chars().count();
            if len < self.min_len || self.max_len.is_some_and(|max| len > max) {
                continue;
            }
            if self.only_alphabetic && !token.chars().all(char::is_alphabetic) {
                continue;
            }
            kept.push(match &stemmer {
                Some(stemmer) => stemmer.stem(&token).into_owned(),
                None => token,
            });
        }
        Ok(kept)
    }
}

/// Reads stopwords from a text file, one per line; `#` starts a comment.
pub fn load_stopwords(path: &Path) -> Result<BTreeSet<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_lowercase)
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderOpts {
    pub content_type: ContentType,
    /// File extension to read; defaults to the content type's extension.
    pub extension: Option<String>,
    pub filename_fields: Vec<FilenameField>,
    /// Tab-separated document index used instead of filename fields.
    pub document_index: Option<PathBuf>,
}

/// One tokenized document in corpus order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedDocument {
    pub filename: String,
    pub tokens: Vec<String>,
    pub n_raw_tokens: u64,
}

pub struct CorpusReader {
    pub reader_opts: ReaderOpts,
    pub transform_opts: TokensTransformOpts,
    pub tagged_frame_opts: TaggedFrameOpts,
    pub pad: String,
    /// Tokens never transformed or filtered (concept tokens).
    pub passthrough: BTreeSet<String>,
}

impl CorpusReader {
    pub fn new(reader_opts: ReaderOpts) -> Self {
        CorpusReader {
            reader_opts,
            transform_opts: TokensTransformOpts::default(),
            tagged_frame_opts: TaggedFrameOpts::default(),
            pad: DEFAULT_PAD.to_string(),
            passthrough: BTreeSet::new(),
        }
    }

    /// Reads every matching document under `source` (a folder or `.zip`).
    ///
    /// Returns the documents in filename order and a document index with
    /// `n_raw_tokens`/`n_tokens` filled in.
    pub fn read(&self, source: &Path) -> Result<(Vec<TokenizedDocument>, DocumentIndex)> {
        let extension = self
            .reader_opts
            .extension
            .clone()
            .unwrap_or_else(|| self.reader_opts.content_type.default_extension().to_string());
        let raw = if source.is_dir() {
            read_folder(source, &extension)?
        } else if source.extension().is_some_and(|e| e == "zip") {
            read_zip(source, &extension)?
        } else {
            return Err(CoOccurrenceError::config(format!(
                "corpus source {} is neither a folder nor a .zip archive",
                source.display()
            )));
        };
        info!("read {} documents from {}", raw.len(), source.display());

        let serializer = self
            .reader_opts
            .content_type
            .serializer(&self.tagged_frame_opts, &self.pad);
        let mut passthrough = self.passthrough.clone();
        passthrough.insert(self.pad.clone());

        let documents: Vec<TokenizedDocument> = raw
            .par_iter()
            .map(|(filename, content)| {
                let serialized = serializer.serialize(content)?;
                let tokens = self.transform_opts.transform(serialized.tokens, &passthrough)?;
                debug!("{filename}: {} of {} tokens kept", tokens.len(), serialized.n_raw_tokens);
                Ok(TokenizedDocument {
                    filename: filename.clone(),
                    tokens,
                    n_raw_tokens: serialized.n_raw_tokens,
                })
            })
            .collect::<Result<_>>()?;

        let mut document_index = match &self.reader_opts.document_index {
            Some(path) => {
                let index = DocumentIndex::load(path)?;
                let missing = documents
                    .iter()
                    .find(|d| index.by_filename(&d.filename).is_none());
                if let Some(missing) = missing {
                    return Err(CoOccurrenceError::DocumentIndex(format!(
                        "{} not found in document index {}",
                        missing.filename,
                        path.display()
                    )));
                }
                index
            }
            None => DocumentIndex::from_filenames(
                documents.iter().map(|d| d.filename.as_str()),
                &self.reader_opts.filename_fields,
            )?,
        };
        let counts: Vec<(String, u64, u64)> = documents
            .iter()
            .map(|d| (d.filename.clone(), d.n_raw_tokens, d.tokens.len() as u64))
            .collect();
        document_index.update_token_counts(&counts);
        Ok((documents, document_index))
    }
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
}

fn read_folder(root: &Path, extension: &str) -> Result<Vec<(String, String)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| CoOccurrenceError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !has_extension(&relative, extension) {
            continue;
        }
        files.push((relative, std::fs::read_to_string(entry.path())?));
    }
    Ok(files)
}

fn read_zip(path: &Path, extension: &str) -> Result<Vec<(String, String)>> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && has_extension(name, extension))
        .map(String::from)
        .collect();
    names.sort();
    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let mut content = String::new();
        archive.by_name(&name)?.read_to_string(&mut content)?;
        files.push((name, content));
    }
    Ok(files)
}
