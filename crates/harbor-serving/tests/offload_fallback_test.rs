//! Placement and fallback: where a model lands under resource pressure, and
//! the single-retry behavior when the chosen path fails.

mod common;

use common::{build_manager, CountingLoader, FixedProbe, TestBackend, TestCatalog};
use harbor_abstraction::InferenceRequest;
use harbor_serving::{ServeError, ServingConfig};
use std::sync::Arc;

#[tokio::test]
async fn constrained_host_places_the_model_remotely() {
    let loader = CountingLoader::new();
    let backend = TestBackend::new();
    let manager = build_manager(
        ServingConfig::default(),
        TestCatalog::with_models(&["m1"]),
        Arc::clone(&loader),
        FixedProbe::constrained(),
        Some(Arc::clone(&backend)),
    );

    let response = manager.infer("m1", InferenceRequest::new("hi")).await.unwrap();
    assert!(response.output.contains("hi"));
    assert_eq!(backend.remote_loads(), 1);
    assert_eq!(loader.loads(), 0, "no local attempt when placed remotely");
    assert!(manager.status().entries[0].is_remote);
}

#[tokio::test]
async fn unreachable_backend_forces_local_placement() {
    let loader = CountingLoader::new();
    let backend = TestBackend::new();
    backend.set_reachable(false);
    let manager = build_manager(
        ServingConfig::default(),
        TestCatalog::with_models(&["m1"]),
        Arc::clone(&loader),
        FixedProbe::constrained(),
        Some(Arc::clone(&backend)),
    );

    manager.load("m1").await.unwrap();
    assert_eq!(loader.loads(), 1);
    assert_eq!(backend.remote_loads(), 0);
    assert!(!manager.status().entries[0].is_remote);
}

#[tokio::test]
async fn failed_local_load_falls_back_to_remote_exactly_once() {
    let loader = CountingLoader::new();
    loader.set_fail(true);
    let backend = TestBackend::new();
    let manager = build_manager(
        ServingConfig::default(),
        TestCatalog::with_models(&["m1"]),
        Arc::clone(&loader),
        FixedProbe::relaxed(),
        Some(Arc::clone(&backend)),
    );

    manager.load("m1").await.unwrap();
    assert_eq!(loader.loads(), 1);
    assert_eq!(backend.remote_loads(), 1);
    assert!(manager.status().entries[0].is_remote);
}

#[tokio::test]
async fn failed_local_load_without_a_backend_surfaces_the_local_error() {
    let loader = CountingLoader::new();
    loader.set_fail(true);
    let manager = build_manager(
        ServingConfig::default(),
        TestCatalog::with_models(&["m1"]),
        Arc::clone(&loader),
        FixedProbe::relaxed(),
        None,
    );

    let err = manager.load("m1").await.unwrap_err();
    assert!(matches!(err, ServeError::LoadFailedLocal { .. }));
    assert_eq!(loader.loads(), 1, "exactly one attempt, no silent retry");
}

#[tokio::test]
async fn failed_remote_load_falls_back_to_local_exactly_once() {
    let loader = CountingLoader::new();
    let backend = TestBackend::new();
    backend.set_fail(true);
    let manager = build_manager(
        ServingConfig::default(),
        TestCatalog::with_models(&["m1"]),
        Arc::clone(&loader),
        FixedProbe::constrained(),
        Some(Arc::clone(&backend)),
    );

    manager.load("m1").await.unwrap();
    assert_eq!(backend.remote_loads(), 1);
    assert_eq!(loader.loads(), 1);
    assert!(!manager.status().entries[0].is_remote);
}

#[tokio::test]
async fn both_paths_failing_reports_both_reasons() {
    let loader = CountingLoader::new();
    loader.set_fail(true);
    let backend = TestBackend::new();
    backend.set_fail(true);
    let manager = build_manager(
        ServingConfig::default(),
        TestCatalog::with_models(&["m1"]),
        Arc::clone(&loader),
        FixedProbe::relaxed(),
        Some(Arc::clone(&backend)),
    );

    let err = manager.load("m1").await.unwrap_err();
    match err {
        ServeError::LoadFailedRemote { local_reason, remote_reason, .. } => {
            assert!(local_reason.contains("scripted load failure"));
            assert!(remote_reason.contains("scripted remote failure"));
        }
        other => panic!("expected LoadFailedRemote, got {other:?}"),
    }
    assert_eq!(loader.loads(), 1);
    assert_eq!(backend.remote_loads(), 1);
}

#[tokio::test]
async fn oversized_model_is_offloaded_even_on_a_healthy_host() {
    let loader = CountingLoader::new();
    let backend = TestBackend::new();
    // 64 GiB free at a 0.7 fraction gives a ~44.8 GiB local budget.
    let catalog = TestCatalog::with_models(&[]).with_descriptor(
        harbor_abstraction::ModelDescriptor::new(
            "big",
            "file:///models/big",
            60 * 1024 * 1024 * 1024,
        ),
    );
    let manager = build_manager(
        ServingConfig::default(),
        catalog,
        Arc::clone(&loader),
        FixedProbe::relaxed(),
        Some(Arc::clone(&backend)),
    );

    manager.load("big").await.unwrap();
    assert_eq!(backend.remote_loads(), 1);
    assert_eq!(loader.loads(), 0);
}
