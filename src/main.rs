#![forbid(unsafe_code)]
//! # Text Co-occurrence CLI
//!
//! Command-line interface for the `text_cooccurrence` crate.
//! Computes windowed co-occurrence bundles from a corpus folder or `.zip`
//! archive, queries stored bundles and lists the bundles found in a folder.
//!
//! ## Example
//! ```bash
//! cargo run --release -- compute path/to/corpus --tag demo --context-width 2 \
//!     --filename-field year:_:1 --partition-key year
//! cargo run --release -- query demo_co-occurrence.csv.zip --metric PPMI --largest 10
//! cargo run --release -- list .
//! ```
//!
//! See `--help` for all available options.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use text_cooccurrence::{
    Bundle, CoOccurrenceHelper, ComputeOptions, ComputeOpts, ContentType, ContextOpts,
    CorpusReader, ExportFormat, FilenameField, KeynessMetric, ReaderOpts, Result, StemLang,
    StemMode, TokenRef, TokensTransformOpts, TotalsBasis, ValueColumn, Weighting, compute,
    export::render_txt, export_table, find_bundles, reader::load_stopwords, tag_from_filename,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute co-occurrences for a corpus and store them as a bundle
    Compute(ComputeArgs),
    /// Load a bundle, filter and rank it, print or export the result
    Query(QueryArgs),
    /// List bundles found below a folder
    List {
        /// Folder to search
        #[arg(default_value = ".")]
        folder: PathBuf,
    },
}

#[derive(Args)]
struct ComputeArgs {
    /// Corpus folder or .zip archive
    corpus: PathBuf,

    /// Tag used as filename prefix of the bundle
    #[arg(long)]
    tag: String,

    /// Folder the bundle is written to
    #[arg(long, default_value = ".")]
    output_folder: PathBuf,

    /// Half window size (e.g. 2 = ±2)
    #[arg(long, default_value_t = 2)]
    context_width: usize,

    /// Concept token(s); only windows centered on one of them are counted
    #[arg(long, value_delimiter = ',')]
    concept: Vec<String>,

    /// Drop the concept token from its windows
    #[arg(long, default_value_t = false)]
    ignore_concept: bool,

    /// Padding token
    #[arg(long, default_value = "*")]
    pad: String,

    /// Document index column to partition counts by (e.g. year)
    #[arg(long)]
    partition_key: Vec<String>,

    /// Content type of the corpus files (text, tokens, tagged_frame)
    #[arg(long, default_value = "text")]
    content_type: ContentType,

    /// File extension to read (defaults to the content type's extension)
    #[arg(long)]
    extension: Option<String>,

    /// Document attribute taken from filenames, as name:separator:index (e.g. year:_:1)
    #[arg(long)]
    filename_field: Vec<FilenameField>,

    /// Tab-separated document index to use instead of filename fields
    #[arg(long)]
    document_index: Option<PathBuf>,

    /// Optional path to stopword file (.txt, one word per line)
    #[arg(long)]
    stopwords: Option<PathBuf>,

    /// Keep the original letter case
    #[arg(long, default_value_t = false)]
    keep_case: bool,

    /// Minimum token length
    #[arg(long, default_value_t = 1)]
    min_len: usize,

    /// Maximum token length
    #[arg(long)]
    max_len: Option<usize>,

    /// Keep only alphabetic tokens
    #[arg(long, default_value_t = false)]
    only_alphabetic: bool,

    /// Stemming: off, auto (detect language) or a language code (e.g. en)
    #[arg(long, default_value = "off")]
    stem: String,

    /// With --stem auto, fail when the language cannot be detected
    #[arg(long, default_value_t = false)]
    stem_require_detected: bool,

    /// Use the lemma column of tagged frames
    #[arg(long, default_value_t = false)]
    lemmatize: bool,

    /// Keep only these POS tags (tagged frames)
    #[arg(long, value_delimiter = ',')]
    pos_includes: Vec<String>,

    /// Replace these POS tags with the pad token (tagged frames)
    #[arg(long, value_delimiter = ',')]
    pos_paddings: Vec<String>,

    /// Drop these POS tags (tagged frames)
    #[arg(long, value_delimiter = ',')]
    pos_excludes: Vec<String>,

    /// Drop tokens rarer than this from the vocabulary
    #[arg(long, default_value_t = 1)]
    tf_threshold: u64,

    /// Drop rows with a smaller count per partition
    #[arg(long, default_value_t = 1)]
    min_count: u64,

    /// Drop pairs with a smaller corpus-wide count
    #[arg(long, default_value_t = 1)]
    global_threshold: u64,

    /// Also accumulate 1/distance weights (needed by HAL_cwr)
    #[arg(long, default_value_t = false)]
    hal: bool,

    /// Normalize value_n_t by retained pairs instead of document totals
    #[arg(long, default_value_t = false)]
    retained_totals: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Path of a <tag>_co-occurrence.csv.zip file
    bundle: PathBuf,

    /// Regroup by these document index columns
    #[arg(long, value_delimiter = ',', conflicts_with = "metric")]
    groupby: Vec<String>,

    /// Normalize regrouped values by raw token totals
    #[arg(long, default_value_t = false)]
    normalize: bool,

    /// Alias column added when regrouping (default time_period)
    #[arg(long)]
    target_pivot_key: Option<String>,

    /// Significance metric (TF, TF_normalized, TF_IDF, PPMI, LLR, LLR_Dunning, DICE, HAL_cwr)
    #[arg(long)]
    metric: Option<KeynessMetric>,

    /// Column to partition significance scores by
    #[arg(long)]
    pivot_key: Option<String>,

    /// Scale scores so each group's maximum is 1
    #[arg(long, default_value_t = false)]
    normalize_scores: bool,

    /// Drop pairs rarer than this corpus-wide
    #[arg(long)]
    global_threshold: Option<u64>,

    /// Keep pairs containing one of these tokens
    #[arg(long = "match", value_delimiter = ',')]
    match_tokens: Vec<String>,

    /// Drop pairs containing one of these tokens
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Column used by --rank and --largest
    #[arg(long, default_value = "value")]
    rank_by: ValueColumn,

    /// Keep the top N rows per --rank-group group
    #[arg(long)]
    rank: Option<usize>,

    /// Group columns for --rank
    #[arg(long, value_delimiter = ',')]
    rank_group: Vec<String>,

    /// Keep the top N rows per pivot group
    #[arg(long)]
    largest: Option<usize>,

    /// Keep only the first N rows
    #[arg(long)]
    head: Option<usize>,

    /// Export the result (txt, csv, tsv, json) instead of printing it
    #[arg(long)]
    export_format: Option<ExportFormat>,

    /// Folder for exported files
    #[arg(long, default_value = ".")]
    export_folder: PathBuf,
}

fn parse_stem_mode(value: &str) -> Result<StemMode> {
    match value.to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(StemMode::Off),
        "auto" => Ok(StemMode::Auto),
        lang => Ok(StemMode::Force(lang.parse::<StemLang>()?)),
    }
}

fn run_compute(args: ComputeArgs) -> Result<()> {
    let context_opts = ContextOpts::new(args.context_width)?
        .with_concept(args.concept.iter().cloned())?
        .with_ignore_concept(args.ignore_concept)
        .with_pad(args.pad.clone())?
        .with_partition_keys(args.partition_key.iter().cloned());

    let reader_opts = ReaderOpts {
        content_type: args.content_type,
        extension: args.extension,
        filename_fields: args.filename_field,
        document_index: args.document_index,
    };
    let stopwords = match &args.stopwords {
        Some(path) => load_stopwords(path)?,
        None => BTreeSet::new(),
    };
    let transform_opts = TokensTransformOpts {
        to_lower: !args.keep_case,
        min_len: args.min_len,
        max_len: args.max_len,
        only_alphabetic: args.only_alphabetic,
        stopwords,
        stem_mode: parse_stem_mode(&args.stem)?,
        stem_require_detected: args.stem_require_detected,
    };
    let passthrough: BTreeSet<String> = context_opts.concept().clone();

    let mut reader = CorpusReader::new(reader_opts.clone());
    reader.transform_opts = transform_opts.clone();
    reader.tagged_frame_opts.lemmatize = args.lemmatize;
    reader.tagged_frame_opts.pos_includes = args.pos_includes.into_iter().collect();
    reader.tagged_frame_opts.pos_paddings = args.pos_paddings.into_iter().collect();
    reader.tagged_frame_opts.pos_excludes = args.pos_excludes.into_iter().collect();
    reader.tagged_frame_opts.passthrough = passthrough.clone();
    reader.pad = args.pad;
    reader.passthrough = passthrough;

    let (documents, document_index) = reader.read(&args.corpus)?;

    let mut opts = ComputeOpts::new(context_opts);
    opts.weighting = if args.hal { Weighting::Distance } else { Weighting::Flat };
    opts.tf_threshold = args.tf_threshold;
    opts.min_count = args.min_count;
    opts.global_threshold = args.global_threshold;
    opts.totals = if args.retained_totals {
        TotalsBasis::RetainedPairs
    } else {
        TotalsBasis::DocumentIndex
    };

    let result = match compute(&documents, document_index, &opts) {
        Ok(result) => result,
        Err(e) if e.is_zero_compute() => {
            println!("no co-occurrences");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut options = ComputeOptions::new(&args.tag, opts);
    options.source = Some(args.corpus.display().to_string());
    options.reader_opts = Some(reader_opts);
    options.transform_opts = Some(transform_opts);

    let bundle = Bundle::new(result, &args.output_folder, options);
    let filename = bundle.store()?;
    println!(
        "{} co-occurrences stored in {}",
        bundle.co_occurrences.len(),
        filename.display()
    );
    Ok(())
}

fn run_query(args: QueryArgs) -> Result<()> {
    let bundle = Bundle::load(&args.bundle)?;
    let tag = bundle.tag.clone();
    let mut helper = CoOccurrenceHelper::from_bundle(bundle)?;

    if let Some(metric) = args.metric {
        helper.weigh_by_significance(metric, args.pivot_key.as_deref(), args.normalize_scores)?;
    } else if !args.groupby.is_empty() {
        helper.groupby(&args.groupby, args.normalize, args.target_pivot_key.as_deref())?;
    }
    if let Some(threshold) = args.global_threshold {
        helper.trunk_by_global_count(threshold);
    }
    helper.match_tokens(args.match_tokens.as_slice());
    let excludes: Vec<TokenRef> = args.exclude.iter().map(|t| TokenRef::from(t.as_str())).collect();
    helper.exclude(&excludes);
    if let Some(n) = args.rank {
        helper.rank(n, args.rank_by, &args.rank_group)?;
    }
    if let Some(n) = args.largest {
        helper.largest(n, args.rank_by)?;
    }
    if let Some(n) = args.head {
        helper.head(n);
    }

    let table = helper.value()?;
    info!("{} rows selected", table.len());
    match args.export_format {
        Some(format) => {
            let path = export_table(table, &args.export_folder, &tag, "co_occurrences", format)?;
            println!("exported to {}", path.display());
        }
        None => print!("{}", render_txt(table)),
    }
    Ok(())
}

fn run_list(folder: PathBuf) -> Result<()> {
    let bundles = find_bundles(&folder)?;
    if bundles.is_empty() {
        println!("no bundles found in {}", folder.display());
    }
    for path in bundles {
        let tag = tag_from_filename(&path).unwrap_or_default();
        println!("{tag}\t{}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Compute(args) => run_compute(args),
        Command::Query(args) => run_query(args),
        Command::List { folder } => run_list(folder),
    };
    if let Err(e) = outcome {
        error!("Error: {}", e);
        process::exit(1);
    }
}
