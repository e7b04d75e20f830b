//! Loading a data source from disk and planning tasks from it.

use std::io::Write;

use gridrunner::config::GeneratorConfig;
use gridrunner::grid::{Analyzer, DataSource};
use gridrunner::tasks::{AiType, TaskGenerator};

const SOURCE: &str = r#"{
  "rows": [
    ["", "", "", "", ""],
    ["AI", "ChatGPT", "", "Gemini", ""],
    ["menu", "prompt", "answer", "prompt", "answer"],
    ["", "", "", "", ""],
    ["", "", "", "", ""],
    ["", "", "", "", ""],
    ["", "", "", "", ""],
    ["", "", "", "", ""],
    ["", 42, null, "summarize", "already done"],
    ["", "second", "", null, ""]
  ],
  "groups": [
    { "prompt_columns": ["B"], "answer_columns": ["C"], "ai_type": "ChatGPT" },
    { "prompt_columns": [3], "answer_columns": [{ "column": "E", "ai_type": "Gemini" }] },
    { "answer_columns": ["F"] }
  ]
}"#;

fn write_source() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SOURCE.as_bytes()).unwrap();
    file
}

#[test]
fn plans_from_explicit_descriptors_on_disk() {
    let file = write_source();
    let data = DataSource::from_json_file(file.path()).unwrap();

    // Numbers are stringified, nulls become empty.
    assert_eq!(data.grid().cell(8, 1), "42");
    assert_eq!(data.grid().cell(8, 2), "");

    let analysis = Analyzer::new(GeneratorConfig::default()).analyze(&data);
    // The descriptor without prompt columns is skipped.
    assert_eq!(analysis.groups.len(), 2);

    let tasks = TaskGenerator::new(data.grid(), &analysis).generate_all();
    let cells: Vec<String> = tasks.iter().map(|t| t.answer_address().to_string()).collect();
    assert_eq!(cells, vec!["C9", "C10"]);
    assert!(tasks.iter().all(|t| t.ai_type == AiType::ChatGpt));
    assert_eq!(tasks[0].prompts, vec!["42".to_string()]);
}

#[test]
fn single_group_plan_matches_its_share_of_the_full_plan() {
    let file = write_source();
    let data = DataSource::from_json_file(file.path()).unwrap();
    let analysis = Analyzer::new(GeneratorConfig::default()).analyze(&data);
    let generator = TaskGenerator::new(data.grid(), &analysis);

    let all = generator.generate_all();
    let first = generator.generate_for_group(0).unwrap();
    let second = generator.generate_for_group(1).unwrap();
    assert_eq!(first.len() + second.len(), all.len());
    assert!(second.is_empty());
    assert!(generator.generate_for_group(2).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DataSource::from_json_file(&dir.path().join("absent.json")).is_err());
}
