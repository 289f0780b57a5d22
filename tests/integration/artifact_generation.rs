//! Integration tests for build context generation

use factorbox::artifact::ArtifactGenerator;
use factorbox::catalog::FactorCatalog;
use factorbox::error::FilesystemError;
use factorbox::template;
use std::sync::{Arc, Barrier};
use tempfile::TempDir;

#[test]
fn test_builtin_poc_context_layout() {
    let temp_dir = TempDir::new().unwrap();
    let poc = FactorCatalog::builtin().get("poc").unwrap();
    let entry_point = template::render_entry_point(poc).unwrap();

    let generator = ArtifactGenerator::new(temp_dir.path(), "python:3.10");
    let context = generator.generate(poc, &entry_point).unwrap();

    let dir = temp_dir.path().join("poc");
    assert_eq!(context.dir(), dir);
    assert_eq!(std::fs::read_to_string(dir.join("main.py")).unwrap(), entry_point);
    assert_eq!(
        std::fs::read_to_string(dir.join("POC.py")).unwrap(),
        poc.computation_source
    );
    assert_eq!(
        std::fs::read_to_string(dir.join("requirements.txt")).unwrap(),
        "pymongo\npandas\n"
    );
    let build_file = std::fs::read_to_string(dir.join("Dockerfile")).unwrap();
    assert!(build_file.starts_with("FROM python:3.10\n"));
    assert!(build_file.contains("RUN pip install -r requirements.txt --no-cache-dir"));
}

#[test]
fn test_entry_point_flags_follow_parameter_order() {
    let macd = FactorCatalog::builtin().get("MACD").unwrap();
    let script = template::render_entry_point(macd).unwrap();

    let positions: Vec<usize> = [
        "\"--interval\"",
        "\"--fast\"",
        "\"--slow\"",
        "\"--dea\"",
        "\"--task_id\"",
        "\"--host\"",
        "\"--port\"",
        "\"--database\"",
        "\"--collection\"",
        "\"--start\"",
        "\"--end\"",
    ]
    .iter()
    .map(|flag| script.find(flag).unwrap_or_else(|| panic!("missing {}", flag)))
    .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
}

#[test]
fn test_concurrent_same_name_generation_has_one_winner() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_path_buf();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let root = root.clone();
            std::thread::spawn(move || {
                let poc = FactorCatalog::builtin().get("POC").unwrap();
                let generator = ArtifactGenerator::new(root, "python:3.10");
                barrier.wait();
                generator.generate(poc, &format!("# writer {}\n", i))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(FilesystemError::DirectoryExists(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, threads - 1);

    // The winner's context is complete
    let entries = std::fs::read_dir(root.join("poc")).unwrap().count();
    assert_eq!(entries, 4);
}

#[test]
fn test_distinct_factors_share_a_root() {
    let temp_dir = TempDir::new().unwrap();
    let generator = ArtifactGenerator::new(temp_dir.path(), "python:3.10");
    for factor in FactorCatalog::builtin().list() {
        let entry_point = template::render_entry_point(factor).unwrap();
        generator.generate(factor, &entry_point).unwrap();
    }
    assert!(temp_dir.path().join("poc/main.py").exists());
    assert!(temp_dir.path().join("macd/main.py").exists());
}
