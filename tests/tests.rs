//! Integration tests for `text_cooccurrence`.
//
// This suite verifies:
// - Library behavior (windows, aggregation, table building, normalization, helper chain)
// - Corpus reading from folders and zip archives, bundle store/load/discovery
// - CLI behavior for compute/query/list, including export formats
//
// Notes:
// - CLI tests run the binary with a per-process working directory (no global CWD change).
// - The two-document corpus used throughout (width 1, partitioned by year) yields
//     1990 "alpha beta gamma alpha beta": alpha/beta 5, alpha/gamma 3, beta/gamma 3
//     1991 "alpha beta delta":            alpha/beta 2, alpha/delta 1, beta/delta 2

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use csv::WriterBuilder;
use predicates::prelude::*;
use regex::Regex;
use serde_json::Value as Json;
use tempfile::tempdir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use text_cooccurrence::{
    Bundle, CoOccurrenceComputeResult, CoOccurrenceHelper, ComputeOptions, ComputeOpts,
    ContextOpts, CorpusReader, KeynessMetric, PivotValue, ReaderOpts, TokenizedDocument,
    ValueColumn, Weighting, compute, csv_safe_cell, find_bundles,
};

// --------------------- helpers ---------------------

const DOC_1990: &str = "alpha beta gamma alpha beta";
const DOC_1991: &str = "alpha beta delta";

/// Create a file with content in a temp dir.
fn write_file(dir: &assert_fs::TempDir, name: &str, content: &str) -> PathBuf {
    let f = dir.child(name);
    f.write_str(content).unwrap();
    f.path().to_path_buf()
}

/// Write the two-document corpus into `<dir>/corpus`.
fn write_corpus(dir: &assert_fs::TempDir) -> PathBuf {
    write_file(dir, "corpus/doc_1990.txt", DOC_1990);
    write_file(dir, "corpus/doc_1991.txt", DOC_1991);
    dir.path().join("corpus")
}

/// Reader options extracting `year` from `doc_<year>.txt`.
fn reader_opts() -> ReaderOpts {
    ReaderOpts {
        filename_fields: vec!["year:_:1".parse().unwrap()],
        ..ReaderOpts::default()
    }
}

fn compute_opts(width: usize) -> ComputeOpts {
    ComputeOpts::new(ContextOpts::new(width).unwrap().with_partition_keys(["year"]))
}

fn compute_corpus(source: &Path) -> CoOccurrenceComputeResult {
    let (documents, index) = CorpusReader::new(reader_opts()).read(source).unwrap();
    compute(&documents, index, &compute_opts(1)).unwrap()
}

/// `(w1, w2, year, value)` of every row, decoded with the result vocabulary.
fn decoded_rows(result: &CoOccurrenceComputeResult) -> Vec<(String, String, i64, u64)> {
    let vocabulary = &result.vocabulary;
    result
        .co_occurrences
        .rows()
        .iter()
        .map(|r| {
            let year = match r.keys[0] {
                PivotValue::Int(y) => y,
                PivotValue::Text(_) => panic!("year should be numeric"),
            };
            (
                vocabulary.id2token(r.w1_id).unwrap().to_string(),
                vocabulary.id2token(r.w2_id).unwrap().to_string(),
                year,
                r.value,
            )
        })
        .collect()
}

/// Run CLI successfully with a specific working directory.
fn run_cli_ok_in(dir: &std::path::Path, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = assert_cmd::Command::cargo_bin("text_cooccurrence").unwrap();
    cmd.current_dir(dir);
    cmd.args(args).assert().success()
}

/// Run CLI expecting failure with a specific working directory.
fn run_cli_fail_in(dir: &std::path::Path, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = assert_cmd::Command::cargo_bin("text_cooccurrence").unwrap();
    cmd.current_dir(dir);
    cmd.args(args).assert().failure()
}

/// Compute the `demo` bundle into `<dir>/out` through the CLI.
fn cli_compute_demo(dir: &assert_fs::TempDir) -> PathBuf {
    write_corpus(dir);
    run_cli_ok_in(
        dir.path(),
        &[
            "compute",
            "corpus",
            "--tag",
            "demo",
            "--output-folder",
            "out",
            "--context-width",
            "1",
            "--filename-field",
            "year:_:1",
            "--partition-key",
            "year",
        ],
    )
    .stdout(predicate::str::contains("co-occurrences stored in"));
    dir.path().join("out").join("demo_co-occurrence.csv.zip")
}

/// Find a JSON export file that ends with a given suffix (e.g., "_co_occurrences.json").
fn find_json_with_suffix(dir: &Path, suffix: &str) -> PathBuf {
    for entry in fs::read_dir(dir).unwrap().filter_map(|e| e.ok()) {
        let p = entry.path();
        if p.extension().map(|e| e == "json").unwrap_or(false) {
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(suffix) {
                    return p;
                }
            }
        }
    }
    panic!("No JSON file found ending with {}", suffix);
}

// --------------------- library tests ---------------------

#[test]
fn lib_window_count_is_length_plus_width() {
    let opts = ContextOpts::new(2).unwrap();
    let windows: Vec<Vec<&str>> = opts.windows(["a", "b", "c", "d", "e"]).collect();
    assert_eq!(windows.len(), 7);
    assert!(windows.iter().all(|w| w.len() == 5));
    assert!(windows[0][..4].iter().all(|t| *t == "*"));
    assert!(windows[6][3..].iter().all(|t| *t == "*"));
}

#[test]
fn lib_concept_windows_are_centered() {
    let tokens = ["a", "b", "c", "b", "a"];
    let opts = ContextOpts::new(1).unwrap().with_concept(["b"]).unwrap();
    let windows: Vec<Vec<&str>> = opts.windows(tokens).collect();
    assert_eq!(windows, vec![vec!["a", "b", "c"], vec!["c", "b", "a"]]);

    let opts = opts.with_ignore_concept(true);
    let windows: Vec<Vec<&str>> = opts.windows(tokens).collect();
    assert_eq!(windows, vec![vec!["a", "c"], vec!["c", "a"]]);
}

#[test]
fn lib_reader_builds_index_from_filenames() {
    let td = assert_fs::TempDir::new().unwrap();
    let corpus = write_corpus(&td);
    let (documents, index) = CorpusReader::new(reader_opts()).read(&corpus).unwrap();

    let names: Vec<&str> = documents.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, vec!["doc_1990.txt", "doc_1991.txt"]);
    assert_eq!(index.len(), 2);
    let first = index.by_filename("doc_1990.txt").unwrap();
    assert_eq!(first.value("year"), Some(PivotValue::Int(1990)));
    assert_eq!(first.n_raw_tokens, Some(5));
    assert_eq!(index.by_filename("doc_1991.txt").unwrap().n_tokens, Some(3));
}

#[test]
fn lib_pipeline_counts_pairs_per_partition() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));

    let expected: Vec<(String, String, i64, u64)> = [
        ("alpha", "beta", 1990, 5),
        ("alpha", "beta", 1991, 2),
        ("alpha", "gamma", 1990, 3),
        ("alpha", "delta", 1991, 1),
        ("beta", "gamma", 1990, 3),
        ("beta", "delta", 1991, 2),
    ]
    .into_iter()
    .map(|(a, b, y, v)| (a.to_string(), b.to_string(), y, v))
    .collect();
    assert_eq!(decoded_rows(&result), expected);

    for row in result.co_occurrences.rows() {
        assert!(row.w1_id < row.w2_id, "pairs must be canonical: {row:?}");
    }
}

#[test]
fn lib_normalized_values_use_partition_totals() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));
    let rows = result.co_occurrences.rows();

    // one document per year, 5 and 3 raw tokens
    assert_eq!(rows[0].value_n_d, Some(5.0));
    assert_eq!(rows[0].value_n_t, Some(1.0));
    let n_t = rows[1].value_n_t.unwrap();
    assert!((n_t - 2.0 / 3.0).abs() < 1e-12, "got {n_t}");
}

#[test]
fn lib_statistics_are_added_to_document_index() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));
    let first = result.document_index.by_filename("doc_1990.txt").unwrap();
    assert_eq!(first.value("n_windows"), Some(PivotValue::Int(6)));
    assert_eq!(first.value("n_window_tokens"), Some(PivotValue::Int(18)));
    assert_eq!(first.n_tokens, Some(5));
    assert_eq!(result.corpus_window_counts.n_windows, 10);
}

#[test]
fn lib_same_stem_in_subfolders_counts_both_documents() {
    let td = assert_fs::TempDir::new().unwrap();
    write_file(&td, "corpus/a/report_1990.txt", "p q r");
    write_file(&td, "corpus/b/report_1990.txt", "s t");
    let result = compute_corpus(&td.path().join("corpus"));

    let index = &result.document_index;
    assert_eq!(index.len(), 2);
    for filename in ["a/report_1990.txt", "b/report_1990.txt"] {
        let document = index.by_filename(filename).unwrap();
        assert!(document.value("n_windows").is_some(), "{filename} lost its statistics");
    }
    assert_eq!(index.by_filename("a/report_1990.txt").unwrap().n_raw_tokens, Some(3));
    assert_eq!(index.by_filename("b/report_1990.txt").unwrap().n_raw_tokens, Some(2));

    let partition = result.corpus.document_index().get(0).unwrap();
    assert_eq!(partition.n_raw_tokens, Some(5));
}

#[test]
fn lib_table_total_matches_vectorized_corpus() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));
    assert_eq!(result.co_occurrences.total_value(), 16);
    assert_eq!(result.corpus.sum(), result.co_occurrences.total_value());
    assert_eq!(result.corpus.n_docs(), 2);
    assert_eq!(result.corpus.n_terms(), 5);
}

#[test]
fn lib_absent_concept_is_zero_compute() {
    let documents = vec![TokenizedDocument {
        filename: "doc_1990.txt".into(),
        tokens: DOC_1990.split_whitespace().map(String::from).collect(),
        n_raw_tokens: 5,
    }];
    let index = text_cooccurrence::DocumentIndex::from_filenames(
        ["doc_1990.txt"],
        &reader_opts().filename_fields,
    )
    .unwrap();
    let opts = ComputeOpts::new(
        ContextOpts::new(2)
            .unwrap()
            .with_concept(["zebra"])
            .unwrap()
            .with_partition_keys(["year"]),
    );
    let err = compute(&documents, index, &opts).unwrap_err();
    assert!(err.is_zero_compute(), "expected ZeroCompute, got {err}");
}

#[test]
fn lib_zip_source_matches_folder() {
    let td = assert_fs::TempDir::new().unwrap();
    let folder = write_corpus(&td);
    let archive = td.path().join("corpus.zip");
    {
        let mut zip = ZipWriter::new(fs::File::create(&archive).unwrap());
        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in [("doc_1991.txt", DOC_1991), ("doc_1990.txt", DOC_1990)] {
            zip.start_file(name, opts).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    let from_zip = compute_corpus(&archive);
    let from_folder = compute_corpus(&folder);
    assert_eq!(decoded_rows(&from_zip), decoded_rows(&from_folder));
}

#[test]
fn lib_helper_decode_twice_and_reset() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));
    let mut helper =
        CoOccurrenceHelper::new(result.corpus, result.vocabulary, result.window_counts).unwrap();

    let once = helper.value().unwrap().clone();
    let twice = helper.decode().unwrap().data().clone();
    assert_eq!(once, twice);
    assert_eq!(once.rows()[0].token.as_deref(), Some("alpha/beta"));

    let n = helper.data().len();
    helper.match_tokens(&["gamma"]).exclude(&["alpha".into()]);
    assert_eq!(helper.data().len(), 1);
    assert_eq!(helper.reset().data().len(), n);
}

#[test]
fn lib_helper_rank_tie_keeps_first_seen() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));
    let mut helper =
        CoOccurrenceHelper::new(result.corpus, result.vocabulary, result.window_counts).unwrap();

    // alpha/gamma and beta/gamma both count 3 in 1990
    let group = vec!["time_period".to_string()];
    let mut picks = Vec::new();
    for _ in 0..3 {
        helper.reset().match_tokens(&["gamma"]);
        helper.rank(1, ValueColumn::Value, &group).unwrap();
        let table = helper.value().unwrap();
        assert_eq!(table.len(), 1);
        picks.push(table.rows()[0].token.clone());
    }
    assert!(picks.iter().all(|p| p.as_deref() == Some("alpha/gamma")), "{picks:?}");
}

#[test]
fn lib_helper_significance_scores_every_row() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));
    let n = result.co_occurrences.len();
    let mut helper =
        CoOccurrenceHelper::new(result.corpus, result.vocabulary, result.window_counts).unwrap();

    helper
        .match_tokens(&["delta"])
        .weigh_by_significance(KeynessMetric::PPMI, Some("year"), true)
        .unwrap();
    let table = helper.data();
    assert_eq!(table.len(), n, "significance is computed on the full table");
    for row in table.rows() {
        let score = row.score.expect("score");
        assert!(score.is_finite() && score.abs() <= 1.0 + 1e-12, "{row:?}");
    }
}

#[test]
fn lib_bundle_round_trip_and_discovery() {
    let td = assert_fs::TempDir::new().unwrap();
    let result = compute_corpus(&write_corpus(&td));
    let out = td.path().join("out");
    let bundle = Bundle::new(result, &out, ComputeOptions::new("demo", compute_opts(1)));
    let filename = bundle.store().unwrap();

    assert_eq!(find_bundles(td.path()).unwrap(), vec![filename.clone()]);
    let loaded = Bundle::load(&filename).unwrap();
    assert_eq!(loaded.co_occurrences, bundle.co_occurrences);
    assert_eq!(loaded.vocabulary, bundle.vocabulary);
    assert_eq!(loaded.options.compute_opts, compute_opts(1));

    let mut helper = CoOccurrenceHelper::from_bundle(loaded).unwrap();
    assert_eq!(helper.value().unwrap().len(), bundle.co_occurrences.len());
}

#[test]
fn lib_hal_cwr_works_on_a_loaded_bundle() {
    let td = assert_fs::TempDir::new().unwrap();
    let (documents, index) = CorpusReader::new(reader_opts()).read(&write_corpus(&td)).unwrap();
    let opts = ComputeOpts {
        weighting: Weighting::Distance,
        ..compute_opts(1)
    };
    let result = compute(&documents, index, &opts).unwrap();
    let bundle = Bundle::new(result, &td.path().join("out"), ComputeOptions::new("hal", opts));
    let loaded = Bundle::load(&bundle.store().unwrap()).unwrap();

    let mut helper = CoOccurrenceHelper::from_bundle(loaded).unwrap();
    assert!(helper.data().rows().iter().all(|r| r.hal_value.is_some()));
    helper
        .weigh_by_significance(KeynessMetric::HALcwr, Some("year"), false)
        .unwrap();
    let scores: Vec<f64> = helper.data().rows().iter().map(|r| r.score.unwrap()).collect();
    assert_eq!(scores.len(), 6);
    assert!(scores.iter().all(|s| s.is_finite() && *s >= 0.0), "{scores:?}");
    assert!(scores.iter().any(|s| *s > 0.0), "{scores:?}");
}

// --------------------- CLI tests ---------------------

#[test]
fn cli_nonexistent_corpus_fails() {
    let td = tempdir().unwrap();
    let bad = td.path().join("does_not_exist_here");
    run_cli_fail_in(
        td.path(),
        &["compute", bad.to_string_lossy().as_ref(), "--tag", "x"],
    );
}

#[test]
fn cli_zero_context_width_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    write_corpus(&td);
    run_cli_fail_in(
        td.path(),
        &["compute", "corpus", "--tag", "x", "--context-width", "0"],
    );
}

#[test]
fn cli_absent_concept_reports_no_cooccurrences() {
    let td = assert_fs::TempDir::new().unwrap();
    write_corpus(&td);
    run_cli_ok_in(
        td.path(),
        &["compute", "corpus", "--tag", "x", "--concept", "zebra"],
    )
    .stdout(predicate::str::contains("no co-occurrences"));
    assert!(!td.path().join("x_co-occurrence.csv.zip").exists());
}

#[test]
fn cli_compute_then_list() {
    let td = assert_fs::TempDir::new().unwrap();
    let bundle = cli_compute_demo(&td);
    assert!(bundle.exists());
    assert!(td.path().join("out/demo_vocabulary.json").exists());
    assert!(td.path().join("out/demo_co-occurrence.json").exists());

    run_cli_ok_in(td.path(), &["list", "out"]).stdout(
        predicate::str::contains("demo")
            .and(predicate::str::contains("demo_co-occurrence.csv.zip")),
    );
}

#[test]
fn cli_query_match_export_json() {
    let td = assert_fs::TempDir::new().unwrap();
    let bundle = cli_compute_demo(&td);

    run_cli_ok_in(
        td.path(),
        &[
            "query",
            bundle.to_string_lossy().as_ref(),
            "--match",
            "gamma",
            "--export-format",
            "json",
        ],
    );

    let p = find_json_with_suffix(td.path(), "_co_occurrences.json");
    let v: Json = serde_json::from_str(&fs::read_to_string(p).unwrap()).expect("valid json");
    let rows = v.as_array().expect("json array");
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert!(row["token"].as_str().unwrap().contains("gamma"));
        assert_eq!(row["year"], 1990);
        assert_eq!(row["value"], 3);
    }
}

#[test]
fn cli_query_csv_export_is_timestamped() {
    let td = assert_fs::TempDir::new().unwrap();
    let bundle = cli_compute_demo(&td);

    run_cli_ok_in(
        td.path(),
        &[
            "query",
            bundle.to_string_lossy().as_ref(),
            "--largest",
            "1",
            "--export-format",
            "csv",
        ],
    );

    let re = Regex::new(r"^demo_\d{8}_\d{6}_co_occurrences\.csv$").unwrap();
    let found: Vec<PathBuf> = fs::read_dir(td.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| re.is_match(e.file_name().to_string_lossy().as_ref()))
        .map(|e| e.path())
        .collect();
    assert_eq!(found.len(), 1, "Expected demo_*_co_occurrences.csv in temp dir");

    // one row per year, each the year's largest pair
    let content = fs::read_to_string(&found[0]).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains("alpha/beta"));
    assert!(lines[2].contains("alpha/beta"));
}

#[test]
fn cli_query_metric_prints_scores() {
    let td = assert_fs::TempDir::new().unwrap();
    let bundle = cli_compute_demo(&td);

    run_cli_ok_in(
        td.path(),
        &[
            "query",
            bundle.to_string_lossy().as_ref(),
            "--metric",
            "LLR",
            "--pivot-key",
            "year",
        ],
    )
    .stdout(predicate::str::contains("score").and(predicate::str::contains("beta/delta")));
}

#[test]
fn cli_query_unknown_metric_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    let bundle = cli_compute_demo(&td);
    run_cli_fail_in(
        td.path(),
        &["query", bundle.to_string_lossy().as_ref(), "--metric", "CHI2"],
    );
}

#[test]
fn cli_stem_force_language() {
    let td = assert_fs::TempDir::new().unwrap();
    write_file(&td, "corpus/doc_2001.txt", "running runs quickly running");
    run_cli_ok_in(
        td.path(),
        &["compute", "corpus", "--tag", "stem", "--stem", "en", "--context-width", "1"],
    );
    let vocabulary = fs::read_to_string(td.path().join("stem_vocabulary.json")).unwrap();
    assert!(vocabulary.contains("\"run\""), "{vocabulary}");
    assert!(!vocabulary.contains("\"running\""), "{vocabulary}");
}

// --- Tests to verify sanitizing works ---

#[test]
fn csv_writer_sanitizes_and_quotes_correctly() {
    let mut buf = Vec::new();
    {
        let mut wtr = WriterBuilder::new().from_writer(&mut buf);
        wtr.write_record(["token", "note"]).unwrap();

        // dangerous: starts with '=' and contains quotes
        let dangerous = r#"=HYPERLINK("http://x")"#.to_string();
        wtr.write_record([csv_safe_cell(dangerous), "ok".to_string()])
            .unwrap();
        wtr.flush().unwrap();
    }

    let out = String::from_utf8(buf).unwrap();
    assert!(
        out.contains(r#"'=HYPERLINK(""http://x"")"#),
        "CSV must prefix '=' and double inner quotes"
    );
}

#[test]
fn no_double_prefix_when_cell_already_safe() {
    let already_safe = "'@SAFE".to_string();
    assert_eq!(csv_safe_cell(already_safe.clone()), already_safe, "must not add a second quote");
    assert_eq!(csv_safe_cell("-1".into()), "'-1");
    assert_eq!(csv_safe_cell("normal".into()), "normal");
}
