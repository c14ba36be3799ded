use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use opizontas_hub::services::config_client::ConfigSnapshot;
use opizontas_hub::services::diff::ConfigKey;
use opizontas_hub::services::failover::{FAILOVER_SWITCH, FailoverStore, FailoverStoreConfig, SnapshotSource};
use opizontas_hub::services::naming::{Instance, ServiceInfo};
use opizontas_hub::services::scheduler::Scheduler;

fn naming_store(dir: &std::path::Path) -> (Arc<DashMap<String, ServiceInfo>>, FailoverStore<ServiceInfo>) {
    let source: Arc<DashMap<String, ServiceInfo>> = Arc::new(DashMap::new());
    let store = FailoverStore::new(
        "naming-test",
        dir.join("failover"),
        FailoverStoreConfig::default(),
        source.clone() as Arc<dyn SnapshotSource<ServiceInfo>>,
    );
    (source, store)
}

fn service_with_host(name: &str) -> ServiceInfo {
    let mut info = ServiceInfo::new(name, "");
    info.hosts.push(Instance::new("10.0.0.1", 8080, None));
    info
}

/// 记录落盘次数的数据来源
#[derive(Default)]
struct CountingSource {
    views: AtomicUsize,
    inner: DashMap<String, ServiceInfo>,
}

impl SnapshotSource<ServiceInfo> for CountingSource {
    fn snapshot_view(&self) -> HashMap<String, ServiceInfo> {
        self.views.fetch_add(1, Ordering::SeqCst);
        self.inner.snapshot_view()
    }
}

// 文件操作跑在阻塞线程池里，用真实时间等待它们完成，暂停的时钟保持不动
async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
        tokio::task::yield_now().await;
    }
    cond()
}

#[tokio::test]
async fn test_reserved_names_are_never_persisted() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (_, store) = naming_store(dir.path());

    let sentinel = service_with_host("000--00-ALL_IPS--00--000");
    let normal = service_with_host("DEFAULT_GROUP@@orders");
    let view = HashMap::from([
        (sentinel.name.clone(), sentinel),
        (normal.name.clone(), normal.clone()),
    ]);

    assert_eq!(store.write_all(&view).await.unwrap(), 1);
    store.set_failover_switch(true).await.unwrap();
    store.refresh_switch().await.unwrap();

    assert!(store.is_failover_on());
    assert_eq!(store.cached_keys(), vec!["DEFAULT_GROUP@@orders".to_string()]);
    assert_eq!(store.read("DEFAULT_GROUP@@orders"), Some(normal));
    assert_eq!(store.read("000--00-ALL_IPS--00--000"), None);
}

#[tokio::test]
async fn test_read_is_gated_by_switch() {
    let dir = tempfile::tempdir().unwrap();
    let (_, store) = naming_store(dir.path());

    let info = service_with_host("orders");
    store
        .write_all(&HashMap::from([(info.name.clone(), info)]))
        .await
        .unwrap();
    assert_eq!(store.reload().await.unwrap(), 1);

    // 开关文件不存在时为关闭
    store.refresh_switch().await.unwrap();
    assert!(!store.is_failover_on());
    assert_eq!(store.read("orders"), None);

    // 多行内容以最后一个有效行为准
    tokio::fs::write(store.switch_file(), "0\n1\n").await.unwrap();
    store.refresh_switch().await.unwrap();
    assert!(store.is_failover_on());
    assert!(store.read("orders").is_some());

    tokio::fs::remove_file(store.switch_file()).await.unwrap();
    store.refresh_switch().await.unwrap();
    assert!(!store.is_failover_on());
    assert_eq!(store.read("orders"), None);
}

#[tokio::test]
async fn test_broken_file_is_isolated_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let (_, store) = naming_store(dir.path());

    let good = service_with_host("orders");
    store
        .write_all(&HashMap::from([(good.name.clone(), good)]))
        .await
        .unwrap();
    tokio::fs::write(store.failover_dir().join("broken"), "{not json")
        .await
        .unwrap();
    // 没有实例的服务不会被加载
    let empty = ServiceInfo::new("empty", "");
    tokio::fs::write(
        store.failover_dir().join("empty"),
        serde_json::to_string(&empty).unwrap(),
    )
    .await
    .unwrap();
    tokio::fs::create_dir(store.failover_dir().join("nested")).await.unwrap();

    assert_eq!(store.reload().await.unwrap(), 1);
    assert_eq!(store.cached_keys(), vec!["orders".to_string()]);
}

#[tokio::test]
async fn test_empty_reload_keeps_previous_table() {
    let dir = tempfile::tempdir().unwrap();
    let (_, store) = naming_store(dir.path());

    let info = service_with_host("orders");
    store
        .write_all(&HashMap::from([(info.name.clone(), info)]))
        .await
        .unwrap();
    store.reload().await.unwrap();

    for entry in std::fs::read_dir(store.failover_dir()).unwrap() {
        let entry = entry.unwrap();
        if entry.file_name() != FAILOVER_SWITCH {
            std::fs::remove_file(entry.path()).unwrap();
        }
    }

    assert_eq!(store.reload().await.unwrap(), 0);
    assert_eq!(store.cached_keys(), vec!["orders".to_string()]);
}

#[tokio::test]
async fn test_bootstrap_dumps_source_when_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (source, store) = naming_store(dir.path());
    source.insert("orders".to_string(), service_with_host("orders"));

    assert!(store.bootstrap_if_empty().await.unwrap());
    assert!(store.failover_dir().join("orders").is_file());
    // 目录非空时不再落盘
    assert!(!store.bootstrap_if_empty().await.unwrap());
}

#[tokio::test]
async fn test_config_snapshots_use_encoded_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let source: Arc<DashMap<String, ConfigSnapshot>> = Arc::new(DashMap::new());
    let store = FailoverStore::new(
        "config-test",
        dir.path().join("failover"),
        FailoverStoreConfig::default(),
        source.clone() as Arc<dyn SnapshotSource<ConfigSnapshot>>,
    );

    let snapshot = ConfigSnapshot::new(ConfigKey::from_parts("app.yaml", "grp", Some("dev")), "a: 1", None);
    source.insert(snapshot.key.group_key(), snapshot.clone());

    assert_eq!(store.dump().await.unwrap(), 1);
    assert!(store.failover_dir().join("app.yaml%2Bgrp%2Bdev").is_file());

    store.set_failover_switch(true).await.unwrap();
    store.refresh_switch().await.unwrap();
    assert_eq!(store.read("app.yaml+grp+dev"), Some(snapshot));
}

#[tokio::test(start_paused = true)]
async fn test_start_bootstraps_then_dumps_daily() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(CountingSource::default());
    source.inner.insert("orders".to_string(), service_with_host("orders"));
    let store = Arc::new(FailoverStore::new(
        "naming-test",
        dir.path().join("failover"),
        FailoverStoreConfig::default(),
        source.clone() as Arc<dyn SnapshotSource<ServiceInfo>>,
    ));
    let scheduler = Scheduler::new("failover-test");
    store.start(&scheduler).unwrap();
    let views = || source.views.load(Ordering::SeqCst);

    // 目录为空，10 秒后兜底落盘一次
    tokio::time::advance(Duration::from_millis(9_900)).await;
    assert!(!wait_until(|| views() > 0).await);
    tokio::time::advance(Duration::from_millis(200)).await;
    assert!(wait_until(|| views() == 1).await);
    assert!(wait_until(|| store.failover_dir().join("orders").is_file()).await);

    // 首次定时落盘在 30 分钟
    tokio::time::advance(Duration::from_secs(30 * 60) - Duration::from_millis(10_200)).await;
    assert!(!wait_until(|| views() > 1).await);
    tokio::time::advance(Duration::from_millis(200)).await;
    assert!(wait_until(|| views() == 2).await);

    // 之后每 24 小时一次
    tokio::time::advance(Duration::from_secs(24 * 60 * 60) - Duration::from_millis(200)).await;
    assert!(!wait_until(|| views() > 2).await);
    tokio::time::advance(Duration::from_millis(400)).await;
    assert!(wait_until(|| views() == 3).await);

    scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_skips_bootstrap_when_dir_has_files() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(CountingSource::default());
    source.inner.insert("orders".to_string(), service_with_host("orders"));
    let failover_dir = dir.path().join("failover");
    std::fs::create_dir_all(&failover_dir).unwrap();
    std::fs::write(failover_dir.join("stale"), "").unwrap();

    let store = Arc::new(FailoverStore::new(
        "naming-test",
        failover_dir,
        FailoverStoreConfig::default(),
        source.clone() as Arc<dyn SnapshotSource<ServiceInfo>>,
    ));
    let scheduler = Scheduler::new("failover-test");
    store.start(&scheduler).unwrap();

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(!wait_until(|| source.views.load(Ordering::SeqCst) > 0).await);
    assert!(!store.failover_dir().join("orders").exists());

    scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_polls_switch_on_interval() {
    let dir = tempfile::tempdir().unwrap();
    let (source, store) = naming_store(dir.path());
    let info = service_with_host("orders");
    source.insert(info.name.clone(), info.clone());
    store.write_all(&HashMap::from([(info.name.clone(), info)])).await.unwrap();
    store.set_failover_switch(true).await.unwrap();

    let store = Arc::new(store);
    let scheduler = Scheduler::new("failover-test");
    store.start(&scheduler).unwrap();

    // 启动时立即检查一次开关
    assert!(wait_until(|| store.is_failover_on()).await);
    assert!(wait_until(|| store.read("orders").is_some()).await);

    std::fs::remove_file(store.switch_file()).unwrap();
    tokio::time::advance(Duration::from_millis(4_900)).await;
    assert!(!wait_until(|| !store.is_failover_on()).await);
    tokio::time::advance(Duration::from_millis(200)).await;
    assert!(wait_until(|| !store.is_failover_on()).await);

    scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_unchanged_switch_mtime_skips_reread() {
    let dir = tempfile::tempdir().unwrap();
    let (_, store) = naming_store(dir.path());
    let info = service_with_host("orders");
    store
        .write_all(&HashMap::from([(info.name.clone(), info)]))
        .await
        .unwrap();

    store.set_failover_switch(true).await.unwrap();
    store.refresh_switch().await.unwrap();
    assert!(store.is_failover_on());

    let switch_file = store.switch_file();
    let modified: SystemTime = std::fs::metadata(&switch_file).unwrap().modified().unwrap();

    // 内容改为关闭但修改时间不变，不会重新读取
    std::fs::write(&switch_file, "0").unwrap();
    let file = std::fs::File::options().write(true).open(&switch_file).unwrap();
    file.set_modified(modified).unwrap();
    drop(file);
    store.refresh_switch().await.unwrap();
    assert!(store.is_failover_on());
    assert!(store.read("orders").is_some());

    // 修改时间前进后才生效
    let file = std::fs::File::options().write(true).open(&switch_file).unwrap();
    file.set_modified(modified + Duration::from_secs(1)).unwrap();
    drop(file);
    store.refresh_switch().await.unwrap();
    assert!(!store.is_failover_on());
}
