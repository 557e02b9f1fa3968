#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::core::ApiResource;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vkube_core::{gvk, gvk_key, DynamicObject, GroupVersionKind, NamespacedName};
use vkube_mappings::{register_default_mappers, GenericMapper, Registry};
use vkube_patches::{ExportConfig, ExportPatcher};
use vkube_syncer::syncers::create_host_object;
use vkube_syncer::{Backoff, ClientError, ClusterClient, ExportSyncer, FakeCluster, GenericSyncer, Outcome, SyncContext, SyncController, SyncError, Syncer, WatchEvent, WriteCounts};
use vkube_translate::{SingleNamespaceTranslator, Translator};

struct Env {
    virt: Arc<FakeCluster>,
    host: Arc<FakeCluster>,
    ctx: SyncContext,
}

fn env_with(registry: Registry) -> Env {
    let translator: Arc<dyn Translator> = Arc::new(SingleNamespaceTranslator::new("suffix", "test"));
    let virt = Arc::new(FakeCluster::new("virtual"));
    let host = Arc::new(FakeCluster::new("host"));
    let ctx = SyncContext::new(virt.clone(), host.clone(), translator, Arc::new(registry));
    Env { virt, host, ctx }
}

fn env() -> Env {
    let registry = Registry::new();
    register_default_mappers(&registry, Arc::new(SingleNamespaceTranslator::new("suffix", "test")));
    env_with(registry)
}

fn controller(env: &Env, syncer: impl Syncer + 'static) -> Arc<SyncController> {
    Arc::new(SyncController::new(env.ctx.clone(), Arc::new(syncer), Backoff::default()))
}

fn secret(name: &str, ns: &str, uid: &str) -> DynamicObject {
    let mut o = DynamicObject::new(name, &ApiResource::from_gvk(&gvk::secrets())).within(ns);
    o.metadata.uid = Some(uid.into());
    o.metadata.labels = Some(BTreeMap::from([("app".to_string(), "web".to_string())]));
    o.metadata.annotations = Some(BTreeMap::from([("note".to_string(), "x".to_string())]));
    o.data = json!({ "type": "Opaque", "data": { "k": "dg==" } });
    o
}

fn host_key(name: &str) -> NamespacedName { NamespacedName::new("test", format!("{name}-x-default-x-suffix")) }

fn key(name: &str) -> NamespacedName { NamespacedName::new("default", name) }

#[tokio::test]
async fn creates_host_object_with_ownership_metadata() {
    let env = env();
    env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let c = controller(&env, GenericSyncer::secrets());

    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Created);

    let host = env.host.object(&gvk::secrets(), &host_key("a")).expect("host secret");
    let annotations = host.metadata.annotations.clone().unwrap();
    assert_eq!(annotations["vcluster.loft.sh/object-name"], "a");
    assert_eq!(annotations["vcluster.loft.sh/object-namespace"], "default");
    assert_eq!(annotations["vcluster.loft.sh/object-uid"], "123");
    assert_eq!(annotations["vcluster.loft.sh/object-kind"], "/v1, Kind=Secret");
    assert_eq!(annotations["note"], "x");
    let labels = host.metadata.labels.clone().unwrap();
    assert_eq!(labels["vcluster.loft.sh/namespace"], "default");
    assert_eq!(labels["app"], "web");
    assert_eq!(host.data["data"], json!({ "k": "dg==" }));
    assert_eq!(host.data["type"], "Opaque");
}

#[tokio::test]
async fn second_reconcile_writes_nothing() {
    let env = env();
    env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let c = controller(&env, GenericSyncer::secrets());

    c.reconcile(&key("a")).await.unwrap();
    let writes = env.host.writes();
    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Unchanged);
    assert_eq!(env.host.writes(), writes);
}

#[tokio::test]
async fn virtual_changes_flow_down() {
    let env = env();
    env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let c = controller(&env, GenericSyncer::secrets());
    c.reconcile(&key("a")).await.unwrap();

    let mut v = env.virt.object(&gvk::secrets(), &key("a")).unwrap();
    v.data["data"] = json!({ "k": "dzI=" });
    env.virt.update(&gvk::secrets(), &v).await.unwrap();

    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Updated);
    let host = env.host.object(&gvk::secrets(), &host_key("a")).unwrap();
    assert_eq!(host.data["data"], json!({ "k": "dzI=" }));
}

#[tokio::test]
async fn unmanaged_host_object_is_a_conflict_and_untouched() {
    let env = env();
    env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let mut existing = DynamicObject::new("a-x-default-x-suffix", &ApiResource::from_gvk(&gvk::secrets())).within("test");
    existing.metadata.annotations = Some(BTreeMap::from([("app".to_string(), "existing".to_string())]));
    existing.data = json!({ "data": { "other": "eA==" } });
    env.host.insert(&gvk::secrets(), existing);
    let before = serde_json::to_value(env.host.object(&gvk::secrets(), &host_key("a")).unwrap()).unwrap();
    let c = controller(&env, GenericSyncer::secrets());

    let err = c.reconcile(&key("a")).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(
        err.to_string(),
        "conflict: cannot sync virtual object default/a as unmanaged physical object test/a-x-default-x-suffix exists with desired name"
    );
    let after = serde_json::to_value(env.host.object(&gvk::secrets(), &host_key("a")).unwrap()).unwrap();
    assert_eq!(before, after);
    assert_eq!(env.host.writes().total(), 0);
}

#[tokio::test]
async fn virtual_delete_removes_only_its_host_object() {
    let env = env();
    env.virt.insert(&gvk::secrets(), secret("a", "default", "1"));
    env.virt.insert(&gvk::secrets(), secret("b", "default", "2"));
    let c = controller(&env, GenericSyncer::secrets());
    c.reconcile(&key("a")).await.unwrap();
    c.reconcile(&key("b")).await.unwrap();

    env.virt.delete(&gvk::secrets(), &key("a")).await.unwrap();
    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Deleted);

    assert!(env.host.object(&gvk::secrets(), &host_key("a")).is_none());
    assert!(env.host.object(&gvk::secrets(), &host_key("b")).is_some());
    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Noop);
}

#[tokio::test]
async fn unmanaged_host_object_without_virtual_is_left_alone() {
    let env = env();
    env.host.insert(&gvk::secrets(), DynamicObject::new("a-x-default-x-suffix", &ApiResource::from_gvk(&gvk::secrets())).within("test"));
    let c = controller(&env, GenericSyncer::secrets());

    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Noop);
    assert!(env.host.object(&gvk::secrets(), &host_key("a")).is_some());
    assert_eq!(env.host.writes().deletes, 0);
}

#[tokio::test]
async fn recreated_virtual_object_replaces_stale_host_object() {
    let env = env();
    env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let c = controller(&env, GenericSyncer::secrets());
    c.reconcile(&key("a")).await.unwrap();

    env.virt.delete(&gvk::secrets(), &key("a")).await.unwrap();
    env.virt.insert(&gvk::secrets(), secret("a", "default", "456"));

    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Requeue);
    assert!(env.host.object(&gvk::secrets(), &host_key("a")).is_none());
    assert_eq!(c.reconcile(&key("a")).await.unwrap(), Outcome::Created);
    let host = env.host.object(&gvk::secrets(), &host_key("a")).unwrap();
    assert_eq!(host.metadata.annotations.unwrap()["vcluster.loft.sh/object-uid"], "456");
}

fn database_gvk() -> GroupVersionKind { GroupVersionKind::gvk("example.com", "v1", "Database") }

fn database(name: &str, ns: &str, data: serde_json::Value) -> DynamicObject {
    let mut o = DynamicObject::new(name, &ApiResource::from_gvk(&database_gvk())).within(ns);
    o.metadata.uid = Some("u1".into());
    o.data = data;
    o
}

const DATABASE_EXPORT: &str = r#"
apiVersion: example.com/v1
kind: Database
patches:
  - op: copyFromObject
    path: spec
  - op: rewriteName
    path: spec.credentialsSecret
reversePatches:
  - op: copyFromObject
    path: status
"#;

fn export_env() -> (Env, Arc<SyncController>) {
    let cfg: ExportConfig = serde_yaml::from_str(DATABASE_EXPORT).unwrap();
    let translator: Arc<dyn Translator> = Arc::new(SingleNamespaceTranslator::new("suffix", "test"));
    let registry = Registry::new();
    registry.add_mapper(Arc::new(GenericMapper::namespaced(database_gvk(), translator.clone())));
    let env = env_with(registry);
    let patcher = ExportPatcher::new(Arc::new(cfg.validate().unwrap()), translator);
    let c = controller(&env, ExportSyncer::new(patcher));
    (env, c)
}

#[tokio::test]
async fn export_syncs_spec_down_and_status_up() {
    let (env, c) = export_env();

    env.virt.insert(&database_gvk(), database("orders", "default", json!({ "spec": { "credentialsSecret": "orders-creds", "size": "10Gi" } })));
    assert_eq!(c.reconcile(&key("orders")).await.unwrap(), Outcome::Created);

    let hk = host_key("orders");
    let mut host = env.host.object(&database_gvk(), &hk).unwrap();
    assert_eq!(host.data["spec"], json!({ "credentialsSecret": "orders-creds-x-default-x-suffix", "size": "10Gi" }));

    host.data["status"] = json!({ "phase": "Ready" });
    env.host.update_status(&database_gvk(), &host).await.unwrap();

    assert_eq!(c.reconcile(&key("orders")).await.unwrap(), Outcome::Updated);
    let v = env.virt.object(&database_gvk(), &key("orders")).unwrap();
    assert_eq!(v.data["status"], json!({ "phase": "Ready" }));
    assert_eq!(v.data["spec"]["credentialsSecret"], "orders-creds");
    // only the create and the status write above
    assert_eq!(env.host.writes(), WriteCounts { creates: 1, updates: 1, deletes: 0 });

    assert_eq!(c.reconcile(&key("orders")).await.unwrap(), Outcome::Unchanged);
}

#[tokio::test]
async fn export_removes_dropped_fields_and_labels_from_host() {
    let (env, c) = export_env();
    let mut v = database("orders", "default", json!({ "spec": { "size": "10Gi", "backup": true } }));
    v.metadata.labels = Some(BTreeMap::from([("tier".to_string(), "gold".to_string())]));
    env.virt.insert(&database_gvk(), v);
    assert_eq!(c.reconcile(&key("orders")).await.unwrap(), Outcome::Created);

    let hk = host_key("orders");
    let mut host = env.host.object(&database_gvk(), &hk).unwrap();
    assert_eq!(host.metadata.labels.clone().unwrap()["tier"], "gold");
    host.data["status"] = json!({ "phase": "Ready" });
    env.host.update_status(&database_gvk(), &host).await.unwrap();

    let mut v = env.virt.object(&database_gvk(), &key("orders")).unwrap();
    v.data["spec"] = json!({ "size": "10Gi" });
    v.metadata.labels = None;
    env.virt.update(&database_gvk(), &v).await.unwrap();

    assert_eq!(c.reconcile(&key("orders")).await.unwrap(), Outcome::Updated);
    let host = env.host.object(&database_gvk(), &hk).unwrap();
    assert_eq!(host.data["spec"], json!({ "size": "10Gi" }));
    assert!(!host.metadata.labels.clone().unwrap_or_default().contains_key("tier"));
    assert_eq!(host.data["status"], json!({ "phase": "Ready" }));
    assert_eq!(host.metadata.annotations.unwrap()["vcluster.loft.sh/object-name"], "orders");

    assert_eq!(c.reconcile(&key("orders")).await.unwrap(), Outcome::Unchanged);
}

#[tokio::test]
async fn create_race_with_own_host_object_becomes_an_update() {
    let env = env();
    let v = env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let desired = GenericSyncer::secrets().translate(&env.ctx, &v).unwrap();
    env.host.insert(&gvk::secrets(), desired.clone());

    let mut newer = desired;
    newer.data["data"] = json!({ "k": "dzI=" });
    let written = create_host_object(&env.ctx, &gvk::secrets(), &v, newer).await.unwrap();

    assert_eq!(written.data["data"], json!({ "k": "dzI=" }));
    assert_eq!(env.host.object(&gvk::secrets(), &host_key("a")).unwrap().data["data"], json!({ "k": "dzI=" }));
    assert_eq!(env.host.writes(), WriteCounts { creates: 0, updates: 1, deletes: 0 });
}

#[tokio::test]
async fn create_race_with_foreign_host_object_is_a_conflict() {
    let env = env();
    let v = env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let desired = GenericSyncer::secrets().translate(&env.ctx, &v).unwrap();

    let mut unowned = DynamicObject::new("a-x-default-x-suffix", &ApiResource::from_gvk(&gvk::secrets())).within("test");
    unowned.data = json!({ "data": { "other": "eA==" } });
    env.host.insert(&gvk::secrets(), unowned);
    let before = serde_json::to_value(env.host.object(&gvk::secrets(), &host_key("a")).unwrap()).unwrap();

    let err = create_host_object(&env.ctx, &gvk::secrets(), &v, desired.clone()).await.unwrap_err();
    assert!(matches!(&err, SyncError::Conflict { virtual_key, host_key: hk } if *virtual_key == key("a") && *hk == host_key("a")), "{err}");
    let after = serde_json::to_value(env.host.object(&gvk::secrets(), &host_key("a")).unwrap()).unwrap();
    assert_eq!(before, after);

    // same name and owner, earlier incarnation
    let mut stale = desired.clone();
    stale.metadata.annotations.as_mut().unwrap().insert("vcluster.loft.sh/object-uid".into(), "999".into());
    env.host.insert(&gvk::secrets(), stale);
    let err = create_host_object(&env.ctx, &gvk::secrets(), &v, desired).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(env.host.object(&gvk::secrets(), &host_key("a")).unwrap().metadata.annotations.unwrap()["vcluster.loft.sh/object-uid"], "999");
    assert_eq!(env.host.writes().total(), 0);
}

#[tokio::test]
async fn run_syncs_watched_objects_until_shutdown() {
    let env = env();
    let c = controller(&env, GenericSyncer::secrets());
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(c.clone().run(2, shutdown.clone()));

    env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let mut synced = false;
    for _ in 0..200 {
        if env.host.object(&gvk::secrets(), &host_key("a")).is_some() {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(synced, "host object never appeared");

    shutdown.cancel();
    let res = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert!(res.is_ok());
}

#[tokio::test]
async fn missing_mapper_stops_the_controller() {
    let env = env_with(Registry::new());
    env.virt.insert(&gvk::secrets(), secret("a", "default", "123"));
    let c = controller(&env, GenericSyncer::secrets());

    let res = tokio::time::timeout(Duration::from_secs(5), c.run(1, CancellationToken::new())).await.unwrap();
    assert!(matches!(res, Err(SyncError::Mapping(_))));
    assert_eq!(env.host.writes().total(), 0);
}

#[tokio::test]
async fn unmappable_host_object_stops_the_controller_without_further_events() {
    let env = env_with(Registry::new());
    env.host.insert(&gvk::secrets(), DynamicObject::new("a-x-default-x-suffix", &ApiResource::from_gvk(&gvk::secrets())).within("test"));
    let c = controller(&env, GenericSyncer::secrets());

    let res = tokio::time::timeout(Duration::from_secs(5), c.run(1, CancellationToken::new())).await.expect("controller kept running");
    assert!(matches!(res, Err(SyncError::Mapping(_))));
}

/// Delegates to a `FakeCluster` but cannot watch.
struct Unwatchable(Arc<FakeCluster>);

#[async_trait]
impl ClusterClient for Unwatchable {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<Option<DynamicObject>, ClientError> { self.0.get(gvk, key).await }
    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> { self.0.create(gvk, obj).await }
    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> { self.0.update(gvk, obj).await }
    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> { self.0.update_status(gvk, obj).await }
    async fn delete(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<(), ClientError> { self.0.delete(gvk, key).await }
    async fn watch(&self, gvk: &GroupVersionKind, _: Option<&str>, _: mpsc::Sender<WatchEvent>) -> Result<(), ClientError> {
        Err(ClientError::UnknownResource(gvk_key(gvk)))
    }
}

#[tokio::test]
async fn failed_host_watch_stops_the_controller() {
    let registry = Registry::new();
    let translator: Arc<dyn Translator> = Arc::new(SingleNamespaceTranslator::new("suffix", "test"));
    register_default_mappers(&registry, translator.clone());
    let virt = Arc::new(FakeCluster::new("virtual"));
    let host = Arc::new(Unwatchable(Arc::new(FakeCluster::new("host"))));
    let ctx = SyncContext::new(virt, host, translator, Arc::new(registry));
    let c = Arc::new(SyncController::new(ctx, Arc::new(GenericSyncer::secrets()), Backoff::default()));

    let res = tokio::time::timeout(Duration::from_secs(5), c.run(1, CancellationToken::new())).await.expect("controller kept running");
    assert!(matches!(res, Err(SyncError::Client(ClientError::UnknownResource(_)))), "{res:?}");
}
