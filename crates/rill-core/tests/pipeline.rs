//! End-to-end pipeline scenarios against a real filesystem.

use std::path::PathBuf;

use rill_core::{
    Engine, EngineOptions, Processor, SourceMapBuilder, SourceMapObject, WorkMode,
};
use tempfile::TempDir;

fn engine_at(dir: &TempDir) -> Engine {
    Engine::new(EngineOptions {
        cwd: Some(dir.path().to_path_buf()),
        ..Default::default()
    })
}

#[tokio::test]
async fn identity_copy() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "hi").unwrap();

    let engine = engine_at(&dir);
    engine.src(&["*.txt"]).unwrap().dest("out");
    engine.idle().await;

    let written = std::fs::read_to_string(dir.path().join("out/a.txt")).unwrap();
    assert_eq!(written, "hi");
    assert!(!dir.path().join("out/a.txt.map").exists());
    assert_eq!(engine.processed_count(), 1);
    assert_eq!(engine.error_count(), 0);
}

#[tokio::test]
async fn transform_with_source_map() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.js"), "var x = 1;").unwrap();

    let engine = engine_at(&dir);
    engine
        .src(&["*.js"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            let upper = file.content()?.to_uppercase();
            file.set_content(upper);
            let mut map = SourceMapBuilder::new();
            map.add_mapping(0, 0, Some(("a.js", 0, 0)), None);
            file.apply_source_map(map);
            Ok(())
        }))
        .unwrap()
        .dest("out");
    engine.idle().await;

    let written = std::fs::read_to_string(dir.path().join("out/a.js")).unwrap();
    assert_eq!(written, "VAR X = 1;\n//# sourceMappingURL=a.js.map");

    let map_json = std::fs::read_to_string(dir.path().join("out/a.js.map")).unwrap();
    let map: SourceMapObject = serde_json::from_str(&map_json).unwrap();
    assert_eq!(map.version, 3);
    assert_eq!(map.file.as_deref(), Some("a.js"));
    assert_eq!(map.sources, vec!["../a.js".to_string()]);
}

#[tokio::test]
async fn source_map_composition_across_stages() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.js"), "abcdef").unwrap();

    let engine = engine_at(&dir);
    let out = engine
        .src(&["a.js"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            // First transformation: generated (0,0) came from a.js (0,3).
            let mut map = SourceMapBuilder::new();
            map.add_mapping(0, 0, Some(("a.js", 0, 3)), None);
            file.apply_source_map(map);
            file.set_content("defabc");
            Ok(())
        }))
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            // Second transformation: generated (0,2) came from the
            // intermediate (0,0).
            let mut map = SourceMapBuilder::new();
            map.add_mapping(0, 2, Some(("intermediate", 0, 0)), None);
            file.apply_source_map(map);
            file.set_content("xxdefabc");
            Ok(())
        }))
        .unwrap();
    engine.idle().await;

    let files = out.files();
    let guard = files[0].lock();
    let builder = guard.source_map().unwrap().to_builder().unwrap();
    let loc = builder.get_source(0, 2);
    assert_eq!(loc.path.as_deref(), Some("a.js"));
    assert_eq!((loc.line, loc.column), (0, 3));
}

#[tokio::test]
async fn clean_restores_tracked_tree() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.js"), "var x = 1;").unwrap();

    let engine = engine_at(&dir);
    engine
        .src(&["*.js"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            let upper = file.content()?.to_uppercase();
            file.set_content(upper);
            let mut map = SourceMapBuilder::new();
            map.add_mapping(0, 0, Some(("a.js", 0, 0)), None);
            file.apply_source_map(map);
            Ok(())
        }))
        .unwrap()
        .dest("out");
    engine.idle().await;
    assert!(dir.path().join("out/a.js").exists());
    assert!(dir.path().join("out/a.js.map").exists());
    engine.save_state().unwrap();

    // A later run consumes the persisted cache to delete exactly what the
    // build wrote, pruning directories that become empty.
    let cleaner = engine_at(&dir);
    cleaner.load_state();
    let removed = cleaner.clean_tracked().await.unwrap();
    assert_eq!(removed, 2);
    assert!(!dir.path().join("out").exists());
    assert!(dir.path().join("a.js").exists());
}

#[tokio::test]
async fn overwrite_guard_blocks_then_allows() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "hi").unwrap();

    // Without overwrite: EEXIST diagnostic, source untouched.
    let engine = engine_at(&dir);
    engine
        .src(&["a.txt"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            let upper = file.content()?.to_uppercase();
            file.set_content(upper);
            Ok(())
        }))
        .unwrap()
        .dest(".");
    engine.idle().await;
    assert_eq!(engine.error_count(), 1);
    assert_eq!(engine.exit_code(), 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "hi"
    );

    // With overwrite: the write proceeds and the cache records the
    // source as its own output.
    let engine = Engine::new(EngineOptions {
        cwd: Some(dir.path().to_path_buf()),
        overwrite: true,
        ..Default::default()
    });
    engine
        .src(&["a.txt"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            let upper = file.content()?.to_uppercase();
            file.set_content(upper);
            Ok(())
        }))
        .unwrap()
        .dest(".");
    engine.idle().await;
    assert_eq!(engine.error_count(), 0);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "HI"
    );
    assert_eq!(engine.tracked_outputs(), vec![dir.path().join("a.txt")]);
}

#[tokio::test]
async fn unmodified_save_onto_source_is_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "hi").unwrap();

    let engine = engine_at(&dir);
    engine.src(&["a.txt"]).unwrap().dest(".");
    engine.idle().await;

    // No diagnostic, nothing rewritten, nothing tracked.
    assert_eq!(engine.error_count(), 0);
    assert!(engine.tracked_outputs().is_empty());
}

#[tokio::test]
async fn preview_mode_counts_without_writing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "hi").unwrap();

    let engine = Engine::new(EngineOptions {
        cwd: Some(dir.path().to_path_buf()),
        mode: WorkMode::Preview,
        ..Default::default()
    });
    engine.src(&["*.txt"]).unwrap().dest("out");
    engine.idle().await;

    assert_eq!(engine.processed_count(), 1);
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn delete_stage_removes_sources() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("trash")).unwrap();
    std::fs::write(dir.path().join("trash/junk.tmp"), "x").unwrap();

    let engine = engine_at(&dir);
    engine.src(&["trash/*.tmp"]).unwrap().delete(true);
    engine.idle().await;

    assert!(!dir.path().join("trash/junk.tmp").exists());
    assert!(!dir.path().join("trash").exists());
    assert_eq!(engine.processed_count(), 1);
}

#[tokio::test]
async fn inline_source_map_is_embedded() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.js"), "var x = 1;").unwrap();

    let mut options = EngineOptions {
        cwd: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    options.source_map.inline = true;
    let engine = Engine::new(options);

    engine
        .src(&["*.js"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            let upper = file.content()?.to_uppercase();
            file.set_content(upper);
            let mut map = SourceMapBuilder::new();
            map.add_mapping(0, 0, Some(("a.js", 0, 0)), None);
            file.apply_source_map(map);
            Ok(())
        }))
        .unwrap()
        .dest("out");
    engine.idle().await;

    let written = std::fs::read_to_string(dir.path().join("out/a.js")).unwrap();
    assert!(written.contains("//# sourceMappingURL=data:application/json;base64,"));
    assert!(!dir.path().join("out/a.js.map").exists());
}

#[tokio::test]
async fn non_js_output_uses_block_comment() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.css"), "body{}").unwrap();

    let engine = engine_at(&dir);
    engine
        .src(&["*.css"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            let text = file.content()?.to_string();
            file.set_content(text);
            let mut map = SourceMapBuilder::new();
            map.add_mapping(0, 0, Some(("a.css", 0, 0)), None);
            file.apply_source_map(map);
            Ok(())
        }))
        .unwrap()
        .dest("out");
    engine.idle().await;

    let written = std::fs::read_to_string(dir.path().join("out/a.css")).unwrap();
    assert!(written.ends_with("/*# sourceMappingURL=a.css.map */"));
}

#[tokio::test]
async fn renamed_extension_flows_through_dest() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.ts"), "let x = 1;").unwrap();

    let engine = engine_at(&dir);
    let out = engine
        .src(&["*.ts"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            let path = file.path().with_extension("js");
            file.set_path(path);
            let text = file.content()?.replace("let", "var");
            file.set_content(text);
            Ok(())
        }))
        .unwrap()
        .dest("out");
    engine.idle().await;

    assert!(out.get("a.js").is_some());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out/a.js")).unwrap(),
        "var x = 1;"
    );
}

#[tokio::test]
async fn dependency_edges_survive_persistence() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("main.css"), "@import 'base';").unwrap();
    std::fs::write(dir.path().join("base.css"), "body{}").unwrap();

    let engine = engine_at(&dir);
    engine
        .src(&["main.css"])
        .unwrap()
        .pipe(Processor::sync_fn(|file, _cx| {
            file.dep("base.css", None);
            Ok(())
        }))
        .unwrap()
        .dest("out");
    engine.idle().await;
    engine.save_state().unwrap();

    let restored = engine_at(&dir);
    restored.load_state();
    assert_eq!(
        restored.dependents_of(&dir.path().join("base.css")),
        vec![dir.path().join("main.css")]
    );
}
