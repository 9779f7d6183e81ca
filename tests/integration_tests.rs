//! Integration tests for the full pipeline

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use ferro_join::enrich::enrich_all;
use ferro_join::record::{read_category, read_records, write_records};
use ferro_join::task::{run_task, JoinTask, ResolveReferenceTask, Task, TaskContext};
use ferro_join::{
    redact, resolve_reference, BroadcastJoinEngine, Category, DonorSample, DonorSampleLookup,
    Executor, JoinError, ParallelConfig, PipelineConfig, Record,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use tempfile::TempDir;

fn record(value: Value) -> Record {
    Record::from_value(value).unwrap()
}

fn executor() -> Executor {
    Executor::new(ParallelConfig::new().with_chunk_size(3).with_num_threads(4)).unwrap()
}

fn donors() -> DonorSampleLookup {
    vec![
        DonorSample::new("P1", "DO1", "SP1", "SA1"),
        DonorSample::new("P1", "DO2", "SP2", "SA2"),
    ]
    .into_iter()
    .collect()
}

fn write_part(root: &Path, category: &str, project: &str, name: &str, records: &[Record]) {
    let dir = root.join(category.to_lowercase()).join(project);
    fs::create_dir_all(&dir).unwrap();
    write_records(dir.join(name), records).unwrap();
}

#[test]
fn test_end_to_end_join_example() {
    let ex = executor();
    let primary = record(json!({
        "_donor_id": "DO1",
        "analysis_id": "A1",
        "analyzed_sample_id": "S1",
        "x": 1
    }));
    let meta = record(json!({"analysis_id": "A1", "analyzed_sample_id": "S1", "y": 2}));

    let out = BroadcastJoinEngine::new(&ex)
        .join(ex.partition(vec![primary]), ex.partition(vec![meta]))
        .unwrap()
        .into_vec();

    assert_eq!(
        out,
        vec![record(json!({
            "_donor_id": "DO1",
            "analysis_id": "A1",
            "analyzed_sample_id": "S1",
            "x": 1,
            "y": 2
        }))]
    );
}

#[test]
fn test_join_then_enrich_many_partitions() {
    let ex = executor();
    let primaries: Vec<_> = (0..40)
        .map(|i| {
            record(json!({
                "_donor_id": if i % 2 == 0 { "DO1" } else { "DO2" },
                "_project_id": "P1",
                "analysis_id": format!("A{}", i % 4),
                "analyzed_sample_id": format!("S{}", i % 4),
                "i": i
            }))
        })
        .collect();
    let metas: Vec<_> = (0..4)
        .map(|i| {
            record(json!({
                "analysis_id": format!("A{}", i),
                "analyzed_sample_id": format!("S{}", i),
                "platform": format!("PL{}", i)
            }))
        })
        .collect();

    let joined = BroadcastJoinEngine::new(&ex)
        .join(ex.partition(primaries), ex.partition(metas))
        .unwrap();
    let enriched = enrich_all(&ex, joined, "ssm", Arc::new(donors())).unwrap();

    assert_eq!(enriched.len(), 40);
    let mut seen: Vec<i64> = enriched
        .iter()
        .map(|r| r.get("i").and_then(Value::as_i64).unwrap())
        .collect();
    seen.sort();
    assert_eq!(seen, (0..40).collect::<Vec<_>>());

    for r in enriched.iter() {
        let i = r.get("i").and_then(Value::as_i64).unwrap();
        assert_eq!(
            r.text_value("platform"),
            Some(format!("PL{}", i % 4))
        );
        let expected_sample = if i % 2 == 0 { "SA1" } else { "SA2" };
        assert_eq!(r.text_value("_sample_id").as_deref(), Some(expected_sample));
        assert_eq!(r.text_value("_type").as_deref(), Some("ssm"));
    }
}

#[test]
fn test_redact_example() {
    let controlled: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
    let input = record(json!({
        "a": 1,
        "c": 2,
        "b": 3,
        "observations": [{"a": 1, "d": 2}, {"b": 1}, {"e": 5}]
    }));

    let once = redact(input, &controlled);
    assert_eq!(
        once,
        record(json!({"c": 2, "observations": [{"d": 2}, {}, {"e": 5}]}))
    );
    assert_eq!(redact(once.clone(), &controlled), once);
}

#[test]
fn test_resolve_reference_example() {
    let ex = executor();
    let s1 = record(json!({"analyzed_sample_id": "S1", "raw_data_repository": "EGA"}));
    let s2 = record(json!({"analyzed_sample_id": "S2", "raw_data_repository": "EGA"}));

    let mut collections = BTreeMap::new();
    collections.insert(Category::new("SSM_M").unwrap(), ex.partition(vec![s1.clone()]));
    collections.insert(
        Category::new("STSM_M").unwrap(),
        ex.partition(vec![s1.clone()]),
    );
    collections.insert(
        Category::new("CNSM_M").unwrap(),
        ex.partition(vec![s1, s2]),
    );

    let excluded: HashSet<_> = [Category::new("STSM_M").unwrap()].into_iter().collect();
    let out = resolve_reference(&ex, collections, &excluded, &Default::default()).unwrap();

    assert_eq!(out.len(), 2);
    let mut ids: Vec<_> = out
        .iter()
        .map(|r| r.text_value("analyzed_sample_id").unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["S1", "S2"]);
    assert!(out.iter().all(|r| r.text_value("repository").as_deref() == Some("EGA")));
}

#[test]
fn test_join_task_reads_gzip_and_multiple_parts() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    write_part(
        input.path(),
        "CNSM_P",
        "P1",
        "part-00000.json",
        &[record(json!({
            "_donor_id": "DO1",
            "_project_id": "P1",
            "analysis_id": "A1",
            "analyzed_sample_id": "S1",
            "segment": 1
        }))],
    );

    let gz_path = input.path().join("cnsm_p/P1/part-00001.json.gz");
    let mut encoder = GzEncoder::new(File::create(&gz_path).unwrap(), Compression::default());
    writeln!(
        encoder,
        "{}",
        json!({
            "_donor_id": "DO2",
            "_project_id": "P1",
            "analysis_id": "A1",
            "analyzed_sample_id": "S1",
            "segment": 2
        })
    )
    .unwrap();
    encoder.finish().unwrap();
    fs::write(input.path().join("cnsm_p/P1/_SUCCESS"), "").unwrap();

    write_part(
        input.path(),
        "CNSM_M",
        "P1",
        "part-00000.json",
        &[record(json!({"analysis_id": "A1", "analyzed_sample_id": "S1", "assembly": "GRCh37"}))],
    );

    let ctx = TaskContext::new(input.path(), output.path(), PipelineConfig::default(), donors())
        .unwrap();
    let task = JoinTask::new(Category::parse("CNSM_P").unwrap()).unwrap();
    let summaries = run_task(&ctx, &task, &ctx.projects(task.primary()).unwrap()).unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].task, "JoinTask(CNSM)");
    assert_eq!(summaries[0].output_records, 2);
    assert_eq!(summaries[0].open_records, None);

    let written = read_category(output.path(), task.output(), "P1").unwrap();
    assert_eq!(written.len(), 2);
    assert!(written
        .iter()
        .all(|r| r.text_value("assembly").as_deref() == Some("GRCh37")));
    assert!(!output.path().join("cnsm_open").exists());
}

#[test]
fn test_join_task_unresolved_donor_commits_nothing() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_part(
        input.path(),
        "SSM_P",
        "P1",
        "part-00000.json",
        &[record(json!({
            "_donor_id": "DO404",
            "_project_id": "P1",
            "analysis_id": "A1",
            "analyzed_sample_id": "S1"
        }))],
    );
    write_part(
        input.path(),
        "SSM_M",
        "P1",
        "part-00000.json",
        &[record(json!({"analysis_id": "A1", "analyzed_sample_id": "S1"}))],
    );

    let mut config = PipelineConfig::default();
    config.controlled_fields = vec!["x".to_string()];
    let ctx = TaskContext::new(input.path(), output.path(), config, donors()).unwrap();
    let task = JoinTask::new(Category::parse("SSM_P").unwrap()).unwrap();

    let err = task.execute(&ctx, "P1").unwrap_err();
    assert_eq!(
        err,
        JoinError::UnresolvedDonor {
            project_id: "P1".to_string(),
            donor_id: "DO404".to_string()
        }
    );
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
}

#[test]
fn test_join_task_malformed_input() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let dir = input.path().join("ssm_p/P1");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("part-00000.json"), "{\"_donor_id\":\"DO1\"}\n{broken\n").unwrap();

    let ctx = TaskContext::new(input.path(), output.path(), PipelineConfig::default(), donors())
        .unwrap();
    let task = JoinTask::new(Category::parse("SSM_P").unwrap()).unwrap();
    match task.execute(&ctx, "P1") {
        Err(JoinError::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_rerun_replaces_previous_output() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let primary = |i: i64| {
        record(json!({
            "_donor_id": "DO1",
            "_project_id": "P1",
            "analysis_id": "A1",
            "analyzed_sample_id": "S1",
            "i": i
        }))
    };
    write_part(
        input.path(),
        "SSM_M",
        "P1",
        "part-00000.json",
        &[record(json!({"analysis_id": "A1", "analyzed_sample_id": "S1"}))],
    );

    let ctx = TaskContext::new(input.path(), output.path(), PipelineConfig::default(), donors())
        .unwrap();
    let task = JoinTask::new(Category::parse("SSM_P").unwrap()).unwrap();

    write_part(input.path(), "SSM_P", "P1", "part-00000.json", &[primary(1), primary(2)]);
    task.execute(&ctx, "P1").unwrap();
    write_part(input.path(), "SSM_P", "P1", "part-00000.json", &[primary(3)]);
    task.execute(&ctx, "P1").unwrap();

    let written = read_records(output.path().join("ssm/P1/part-00000.json")).unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].text_value("i").as_deref(), Some("3"));
}

#[test]
fn test_reference_task_across_projects() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let sample = |id: &str| record(json!({"analyzed_sample_id": id, "raw_data_accession": "EGA"}));
    write_part(input.path(), "SSM_M", "P1", "part-00000.json", &[sample("S1"), sample("S1")]);
    write_part(input.path(), "SSM_M", "P2", "part-00000.json", &[sample("S2")]);
    write_part(input.path(), "METH_ARRAY_M", "P2", "part-00000.json", &[sample("S9")]);

    let ctx = TaskContext::new(
        input.path(),
        output.path(),
        PipelineConfig::default(),
        DonorSampleLookup::new(),
    )
    .unwrap();
    let task = ResolveReferenceTask::from_config(ctx.config()).unwrap();
    run_task(&ctx, &task, &["P1".to_string(), "P2".to_string()]).unwrap();

    let table = task.into_table();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get("P1").map(<[Record]>::len), Some(1));
    let p2 = table.get("P2").unwrap();
    assert_eq!(p2.len(), 1);
    assert_eq!(p2[0].text_value("analyzed_sample_id").as_deref(), Some("S2"));
    assert!(!output.path().join("raw_sequence").exists());
}
