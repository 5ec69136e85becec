//! Integration test: batch parameters loaded from a TOML file.

use quill_integration_tests::LogHarness;
use quill_sequencer::SequencerConfig;
use quill_types::RequestContext;

const CONFIG: &str = r#"
[sequencer]
batch_size = 8
guard_window = "10s"
max_root_duration = "1h"

[quota]
increase_factor = 1.25
"#;

#[tokio::test]
async fn test_config_driven_sequencing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quill.toml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = SequencerConfig::load(&path).unwrap();
    let params = config.batch_params();
    assert_eq!(params.limit, 8);

    let h = LogHarness::new();
    h.factor.set(config.increase_factor());
    let tree = h.init_tree(1).await;
    let ctx = RequestContext::new();

    h.queue(tree.id, "entry", 20);

    // Everything is still inside the guard window.
    h.tick();
    let n = h
        .sequencer
        .integrate_batch(&ctx, &tree, params.limit, params.guard_window, params.max_root_duration)
        .await
        .unwrap();
    assert_eq!(n, 0);

    h.clock.advance(params.guard_window);
    let mut batches = Vec::new();
    loop {
        h.tick();
        let n = h
            .sequencer
            .integrate_batch(&ctx, &tree, params.limit, params.guard_window, params.max_root_duration)
            .await
            .unwrap();
        if n == 0 {
            break;
        }
        batches.push(n);
    }
    assert_eq!(batches, vec![8, 8, 4]);

    // Idle for the configured maximum age: the root is re-signed.
    h.clock.advance(params.max_root_duration);
    let n = h
        .sequencer
        .integrate_batch(&ctx, &tree, params.limit, params.guard_window, params.max_root_duration)
        .await
        .unwrap();
    assert_eq!(n, 0);

    let roots = h.storage.signed_roots(tree.id).unwrap();
    assert_eq!(roots.len(), 5);
    assert_eq!(roots[4].root.tree_size, 20);
    h.verify_log(tree.id);
}
