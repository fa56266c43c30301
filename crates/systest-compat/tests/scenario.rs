//! Runs the compatibility scenario against stub binaries and the in-memory
//! client from `systest-cluster`'s test utilities.

#![cfg(unix)]

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use systest_cluster::testing::{FakeDialer, StubProvisioner, invocations, write_stub_binary};
use systest_cluster::{PortAllocator, ProvisionError, Provisioner};
use systest_compat::{CompareMode, CompatibilityFixture, CompatibilityScenario, Error, Phase};
use systest_config::HarnessConfig;
use tempfile::TempDir;
use test_case::test_case;

fn config(root: &Path) -> HarnessConfig {
    let bin_dir = root.join("current-bin");
    write_stub_binary(&bin_dir, "dgraph").unwrap();

    let mut config = HarnessConfig::local();
    config.cluster.bin_dir = bin_dir;
    config.compat.data_dir = Some(root.join("data"));
    config.compat.build_root = Some(root.join("build"));
    config
}

fn allocator(config: &HarnessConfig) -> Arc<PortAllocator> {
    Arc::new(PortAllocator::from_settings(&config.ports))
}

/// Reverses every array, so only order-insensitive comparison accepts it.
fn shuffled(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().rev().map(shuffled).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), shuffled(v)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

/// Answers the fixture query like the database would, once every fixture
/// statement has been committed.
fn faithful_dialer() -> FakeDialer {
    let fixture = CompatibilityFixture::standard();
    FakeDialer::with_responder(move |committed, query| {
        let complete = fixture
            .statements()
            .all(|s| committed.iter().any(|c| c == s));
        match fixture.checks.iter().find(|c| c.query == query) {
            Some(check) if complete => shuffled(&check.expected),
            _ => json!({ "q": [] }),
        }
    })
}

#[tokio::test]
async fn scenario_passes_when_data_survives_upgrade() {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());
    let dialer = faithful_dialer();
    let provisioner = StubProvisioner::new("dgraph");

    let report = CompatibilityScenario::new(config.clone(), dialer.clone(), provisioner.clone())
        .with_allocator(allocator(&config))
        .run()
        .await
        .unwrap();

    assert_eq!(report.from_version, "v1.0.2");
    assert_eq!(report.checks_in(Phase::BeforeUpgrade).count(), 1);
    assert_eq!(report.checks_in(Phase::AfterUpgrade).count(), 1);
    assert_eq!(
        provisioner.calls(),
        vec![("v1.0.2".to_string(), temp.path().join("build"))]
    );

    let store = dialer.store();
    assert_eq!(store.schema, ["list: [string] ."]);
    assert_eq!(store.committed.len(), 12);
    assert_eq!(store.discarded, 1);

    // The second phase queries through a connection to the new cluster
    assert_eq!(store.dials.len(), 2);
    assert_ne!(store.dials[0], store.dials[1]);
    let queried: Vec<_> = store.queries.iter().map(|(endpoint, _)| *endpoint).collect();
    assert_eq!(queried, store.dials);
    drop(store);

    let lines = invocations(&temp.path().join("data"));
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("zero ") && lines[2].starts_with("zero "));
    assert!(lines[1].starts_with("server ") && lines[3].starts_with("server "));
    assert_ne!(lines[1], lines[3]);
}

#[tokio::test]
async fn mismatch_before_upgrade_stops_the_run() {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());

    let err = CompatibilityScenario::new(
        config.clone(),
        FakeDialer::new(),
        StubProvisioner::new("dgraph"),
    )
    .with_allocator(allocator(&config))
    .run()
    .await
    .unwrap_err();

    match err {
        Error::Mismatch { phase, query, diff } => {
            assert_eq!(phase, Phase::BeforeUpgrade);
            assert_eq!(query, "expand-all");
            assert!(!diff.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    // The current cluster never started
    assert_eq!(invocations(&temp.path().join("data")).len(), 2);
}

#[tokio::test]
async fn mismatch_after_upgrade_is_reported() {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());
    let expected = CompatibilityFixture::standard().checks[0].expected.clone();
    let answered = AtomicUsize::new(0);
    let dialer = FakeDialer::with_responder(move |_, _| {
        if answered.fetch_add(1, Ordering::SeqCst) == 0 {
            expected.clone()
        } else {
            json!({ "q": [{ "name": "abcd" }] })
        }
    });

    let err = CompatibilityScenario::new(config.clone(), dialer, StubProvisioner::new("dgraph"))
        .with_allocator(allocator(&config))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Mismatch {
            phase: Phase::AfterUpgrade,
            ..
        }
    ));
    assert!(err.to_string().contains("after upgrade"));
    assert_eq!(invocations(&temp.path().join("data")).len(), 4);
}

#[tokio::test]
async fn list_order_change_across_upgrade_is_reported() {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());
    let before = CompatibilityFixture::standard().checks[0].expected.clone();
    let mut after = before.clone();
    after["q"][2]["list"] = json!(["first", "second"]);
    let answered = AtomicUsize::new(0);
    let dialer = FakeDialer::with_responder(move |_, _| {
        if answered.fetch_add(1, Ordering::SeqCst) == 0 {
            before.clone()
        } else {
            after.clone()
        }
    });

    // Both results match the fixture in canonical mode; only the
    // comparison with the old release's result catches the reordering
    let err = CompatibilityScenario::new(config.clone(), dialer, StubProvisioner::new("dgraph"))
        .with_allocator(allocator(&config))
        .run()
        .await
        .unwrap_err();

    match err {
        Error::Mismatch { phase, diff, .. } => {
            assert_eq!(phase, Phase::AfterUpgrade);
            let paths: Vec<&str> = diff.differences.iter().map(|d| d.path.as_str()).collect();
            assert_eq!(paths, ["$.q[2].list[0]", "$.q[2].list[1]"]);
            assert_eq!(diff.differences[0].expected, Some(json!("second")));
            assert_eq!(diff.differences[0].actual, Some(json!("first")));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Offsets passed to the stub binaries through `-o` and `--port_offset`.
fn logged_offsets(lines: &[String]) -> Vec<u16> {
    lines
        .iter()
        .filter_map(|line| {
            let args: Vec<&str> = line.split_whitespace().collect();
            args.windows(2)
                .find(|pair| pair[0] == "-o" || pair[0] == "--port_offset")
                .map(|pair| pair[1].parse().unwrap())
        })
        .collect()
}

#[tokio::test]
async fn configured_offset_window_is_used() {
    let temp = TempDir::new().unwrap();
    let mut config = config(temp.path());
    config.ports.offset_min = 31000;
    config.ports.offset_max = 31008;

    CompatibilityScenario::new(config, faithful_dialer(), StubProvisioner::new("dgraph"))
        .run()
        .await
        .unwrap();

    let offsets = logged_offsets(&invocations(&temp.path().join("data")));
    assert_eq!(offsets.len(), 4);
    assert!(
        offsets.iter().all(|o| (31000..31008).contains(o)),
        "{offsets:?}"
    );
}

struct MissingTag;

impl Provisioner for MissingTag {
    async fn provision(&self, version: &str, _root: &Path) -> systest_cluster::Result<PathBuf> {
        Err(ProvisionError::TagNotFound {
            tag: version.to_string(),
            repo: "local".to_string(),
        }
        .into())
    }
}

#[tokio::test]
async fn provisioning_failure_starts_nothing() {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());

    let err = CompatibilityScenario::new(config.clone(), faithful_dialer(), MissingTag)
        .with_allocator(allocator(&config))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Cluster(systest_cluster::Error::Provision(
            ProvisionError::TagNotFound { .. }
        ))
    ));
    assert!(invocations(&temp.path().join("data")).is_empty());
}

#[test_case(CompareMode::Canonical, true ; "canonical accepts reordered lists")]
#[test_case(CompareMode::Exact, false ; "exact rejects reordered lists")]
#[tokio::test]
async fn compare_mode_decides_on_reordered_results(mode: CompareMode, passes: bool) {
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());
    let fixture = CompatibilityFixture {
        mode,
        ..CompatibilityFixture::standard()
    };

    let result = CompatibilityScenario::new(
        config.clone(),
        faithful_dialer(),
        StubProvisioner::new("dgraph"),
    )
    .with_fixture(fixture)
    .with_allocator(allocator(&config))
    .run()
    .await;

    assert_eq!(result.is_ok(), passes);
}
