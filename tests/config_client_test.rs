use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use opizontas_hub::services::config_client::{
    ConfigClient, ConfigClientConfig, ConfigError, ConfigFilter, ConfigFilterChain, ConfigRequest, ConfigResponse,
    ConfigServerAgent, ConfigSnapshot, PublishRequest,
};
use opizontas_hub::services::diff::{ClientWatchSet, ConfigKey, encode_changed_keys, encode_watch_set};

const TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Clone)]
enum Query {
    Found(&'static str),
    NotFound,
    Forbidden,
    ServerError,
    Hang,
}

/// 可编排响应的服务端代理
struct MockAgent {
    query: Mutex<Query>,
    queries: AtomicUsize,
    publish_ok: AtomicBool,
    published: Mutex<Vec<PublishRequest>>,
    removed: Mutex<Vec<(ConfigKey, Option<String>)>>,
    listened: Mutex<Vec<(String, Duration)>>,
    listen_response: Mutex<String>,
    healthy: AtomicBool,
}

impl MockAgent {
    fn new(query: Query) -> Arc<Self> {
        Arc::new(Self {
            query: Mutex::new(query),
            queries: AtomicUsize::new(0),
            publish_ok: AtomicBool::new(true),
            published: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            listened: Mutex::new(Vec::new()),
            listen_response: Mutex::new(String::new()),
            healthy: AtomicBool::new(true),
        })
    }

    fn respond(&self, query: Query) {
        *self.query.lock().unwrap() = query;
    }
}

impl ConfigServerAgent for MockAgent {
    fn name(&self) -> &str {
        "mock"
    }

    fn query_config<'a>(
        &'a self,
        key: &'a ConfigKey,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<ConfigSnapshot>, ConfigError>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let query = self.query.lock().unwrap().clone();
        Box::pin(async move {
            match query {
                Query::Found(content) => Ok(Some(ConfigSnapshot::new(key.clone(), content, None))),
                Query::NotFound => Ok(None),
                Query::Forbidden => Err(ConfigError::Forbidden(key.to_string())),
                Query::ServerError => Err(ConfigError::Server {
                    status: 500,
                    message: "boom".to_string(),
                }),
                Query::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(None)
                }
            }
        })
    }

    fn publish_config<'a>(&'a self, request: &'a PublishRequest) -> BoxFuture<'a, Result<bool, ConfigError>> {
        self.published.lock().unwrap().push(request.clone());
        let ok = self.publish_ok.load(Ordering::SeqCst);
        Box::pin(async move { Ok(ok) })
    }

    fn remove_config<'a>(
        &'a self,
        key: &'a ConfigKey,
        tag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool, ConfigError>> {
        self.removed
            .lock()
            .unwrap()
            .push((key.clone(), tag.map(str::to_string)));
        Box::pin(async { Ok(true) })
    }

    fn listen(&self, listening_configs: String, timeout: Duration) -> BoxFuture<'_, Result<String, ConfigError>> {
        self.listened.lock().unwrap().push((listening_configs, timeout));
        let response = self.listen_response.lock().unwrap().clone();
        Box::pin(async move { Ok(response) })
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// 收集日志输出，用于断言日志内容
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn client_with(agent: Arc<MockAgent>, filters: ConfigFilterChain, dir: &std::path::Path) -> ConfigClient {
    let config = ConfigClientConfig {
        cache_dir: dir.to_path_buf(),
        ..Default::default()
    };
    ConfigClient::new(config, agent, filters)
}

#[tokio::test]
async fn test_server_result_is_returned_and_remembered() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::Found("port: 80"));
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());

    let content = client
        .get_config("app.yaml", None, None, TIMEOUT)
        .await
        .expect("get_config failed");
    assert_eq!(content.as_deref(), Some("port: 80"));

    let key = ConfigKey::from_parts("app.yaml", "DEFAULT_GROUP", None);
    assert_eq!(client.cached(&key).map(|s| s.content), Some("port: 80".to_string()));
    assert_eq!(
        client.local_snapshots().get(&key).await.unwrap().as_deref(),
        Some("port: 80")
    );
}

#[tokio::test]
async fn test_failover_preempts_server() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::Found("v1"));
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());

    client.get_config("app.yaml", Some("grp"), None, TIMEOUT).await.unwrap();
    let failover = client.failover_store();
    assert_eq!(failover.dump().await.unwrap(), 1);
    failover.set_failover_switch(true).await.unwrap();
    failover.refresh_switch().await.unwrap();

    agent.respond(Query::Found("v2"));
    let queries = agent.queries.load(Ordering::SeqCst);
    let content = client.get_config("app.yaml", Some("grp"), None, TIMEOUT).await.unwrap();

    assert_eq!(content.as_deref(), Some("v1"));
    assert_eq!(agent.queries.load(Ordering::SeqCst), queries);
}

#[tokio::test]
async fn test_forbidden_propagates_even_with_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::Found("v1"));
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());
    client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap();

    agent.respond(Query::Forbidden);
    let err = client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap_err();
    assert!(err.is_forbidden());
}

#[tokio::test]
async fn test_server_failures_fall_back_to_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::Found("v1"));
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());
    client.get_config("app.yaml", None, Some("dev"), TIMEOUT).await.unwrap();

    agent.respond(Query::ServerError);
    let content = client.get_config("app.yaml", None, Some("dev"), TIMEOUT).await.unwrap();
    assert_eq!(content.as_deref(), Some("v1"));

    agent.respond(Query::Hang);
    let content = client
        .get_config("app.yaml", None, Some("dev"), Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(content.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_missing_snapshot_is_logged_as_missing() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::ServerError);
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());

    assert_eq!(client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap(), None);
    let output = logs.contents();
    assert!(output.contains("[get-config] no snapshot available"));
    assert!(!output.contains("[get-config] get snapshot ok"));

    agent.respond(Query::Found("v1"));
    client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap();
    agent.respond(Query::ServerError);
    assert_eq!(
        client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap().as_deref(),
        Some("v1")
    );
    assert!(logs.contents().contains("[get-config] get snapshot ok"));
}

#[tokio::test]
async fn test_not_found_clears_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::Found("v1"));
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());
    client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap();

    agent.respond(Query::NotFound);
    assert_eq!(client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap(), None);

    agent.respond(Query::ServerError);
    assert_eq!(client.get_config("app.yaml", None, None, TIMEOUT).await.unwrap(), None);
    assert!(
        client
            .cached(&ConfigKey::from_parts("app.yaml", "DEFAULT_GROUP", None))
            .is_none()
    );
}

#[tokio::test]
async fn test_publish_cas_failure_is_false() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::NotFound);
    agent.publish_ok.store(false, Ordering::SeqCst);
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());

    let ok = client
        .publish_config("app.yaml", None, None, "a: 1", Some("yaml"), Some("stale-md5"))
        .await
        .expect("CAS failure must not be an error");
    assert!(!ok);

    let published = agent.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].cas_md5.as_deref(), Some("stale-md5"));
    assert_eq!(published[0].config_type, "yaml");
}

#[tokio::test]
async fn test_invalid_params_never_reach_server() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::Found("v1"));
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());

    for data_id in ["", "  ", "a/b", "a b"] {
        let err = client.get_config(data_id, None, None, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParam(_)), "dataId {data_id:?}");
    }
    let err = client
        .publish_config("app.yaml", None, None, "   ", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidParam(_)));
    let err = client.remove_config("app.yaml", Some(""), None, None).await.unwrap_err();
    assert!(matches!(err, ConfigError::InvalidParam(_)));

    assert_eq!(agent.queries.load(Ordering::SeqCst), 0);
    assert!(agent.published.lock().unwrap().is_empty());
    assert!(agent.removed.lock().unwrap().is_empty());
}

struct Envelope;

impl ConfigFilter for Envelope {
    fn name(&self) -> &str {
        "envelope"
    }

    fn order(&self) -> i32 {
        0
    }

    fn filter_request(&self, request: &mut ConfigRequest) -> Result<(), ConfigError> {
        request.content = format!("enc:{}", request.content);
        Ok(())
    }

    fn filter_response(&self, response: &mut ConfigResponse) -> Result<(), ConfigError> {
        if let Some(content) = response.content.as_mut() {
            if let Some(plain) = content.strip_prefix("enc:") {
                *content = plain.to_string();
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_filters_wrap_publish_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::Found("enc:secret"));
    let mut filters = ConfigFilterChain::new();
    filters.add_filter(Arc::new(Envelope));
    let client = client_with(agent.clone(), filters, dir.path());

    assert!(client.publish_config("db.yaml", None, None, "secret", None, None).await.unwrap());
    assert_eq!(agent.published.lock().unwrap()[0].content, "enc:secret");

    let content = client.get_config("db.yaml", None, None, TIMEOUT).await.unwrap();
    assert_eq!(content.as_deref(), Some("secret"));
}

#[tokio::test]
async fn test_remove_uses_default_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::NotFound);
    let config = ConfigClientConfig {
        cache_dir: dir.path().to_path_buf(),
        namespace: Some("dev".to_string()),
        ..Default::default()
    };
    let client = ConfigClient::new(config, agent.clone(), ConfigFilterChain::new());

    assert!(client.remove_config("app.yaml", None, None, Some("beta")).await.unwrap());
    let removed = agent.removed.lock().unwrap();
    assert_eq!(removed[0].0, ConfigKey::from_parts("app.yaml", "DEFAULT_GROUP", Some("dev")));
    assert_eq!(removed[0].1.as_deref(), Some("beta"));
}

#[tokio::test]
async fn test_poll_changes_uses_wire_codec() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::NotFound);
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());

    let changed = ConfigKey::from_parts("app.yaml", "grp", Some("dev"));
    *agent.listen_response.lock().unwrap() = encode_changed_keys(&[changed.clone()]);

    let mut watch_set = ClientWatchSet::new();
    watch_set.insert(&changed, "old-md5");
    let keys = client
        .poll_changes(&watch_set, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(keys, vec![changed]);

    let listened = agent.listened.lock().unwrap();
    assert_eq!(listened[0].0, encode_watch_set(&watch_set).unwrap());
    assert_eq!(listened[0].1, Duration::from_secs(1));
}

#[tokio::test]
async fn test_server_status_follows_agent_health() {
    let dir = tempfile::tempdir().unwrap();
    let agent = MockAgent::new(Query::NotFound);
    let client = client_with(agent.clone(), ConfigFilterChain::new(), dir.path());

    assert_eq!(client.server_status(), "UP");
    agent.healthy.store(false, Ordering::SeqCst);
    assert_eq!(client.server_status(), "DOWN");
}
