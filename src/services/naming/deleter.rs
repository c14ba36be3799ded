use std::time::Duration;

use futures::future::BoxFuture;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::types::NamingConfig;

/// 过期实例删除请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInstanceRequest {
    pub ip: String,
    pub port: u16,
    pub ephemeral: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub namespace_id: String,
}

/// 删除错误类型
#[derive(Error, Debug)]
pub enum DeleteError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Delete rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Delete queue closed")]
    QueueClosed,

    #[error("Instance not found: {0}")]
    NotFound(String),
}

/// 异步删除实例，调用方只关心完成结果，不做重试
pub trait InstanceDeleter: Send + Sync {
    fn delete_instance(&self, request: DeleteInstanceRequest) -> BoxFuture<'static, Result<(), DeleteError>>;
}

/// 调用本节点自身 HTTP 接口删除实例
#[derive(Debug, Clone)]
pub struct HttpInstanceDeleter {
    url: String,
    client: reqwest::Client,
}

impl HttpInstanceDeleter {
    pub fn new(config: &NamingConfig) -> Result<Self, DeleteError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(500))
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            url: format!("http://{}{}/instance", config.local_address(), config.context_path),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl InstanceDeleter for HttpInstanceDeleter {
    fn delete_instance(&self, request: DeleteInstanceRequest) -> BoxFuture<'static, Result<(), DeleteError>> {
        let client = self.client.clone();
        let url = self.url.clone();

        Box::pin(async move {
            let response = client.delete(&url).query(&request).send().await?;
            match response.status() {
                StatusCode::OK => Ok(()),
                status => {
                    let message = response.text().await.unwrap_or_default();
                    Err(DeleteError::Rejected {
                        status: status.as_u16(),
                        message,
                    })
                }
            }
        })
    }
}

/// 进程内删除队列中的一项
pub type DeleteTask = (DeleteInstanceRequest, oneshot::Sender<Result<(), DeleteError>>);

/// 把删除请求投递到进程内队列，由注册表消费
#[derive(Debug, Clone)]
pub struct QueuedInstanceDeleter {
    tx: mpsc::Sender<DeleteTask>,
}

impl QueuedInstanceDeleter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeleteTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl InstanceDeleter for QueuedInstanceDeleter {
    fn delete_instance(&self, request: DeleteInstanceRequest) -> BoxFuture<'static, Result<(), DeleteError>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            let (done_tx, done_rx) = oneshot::channel();
            tx.send((request, done_tx))
                .await
                .map_err(|_| DeleteError::QueueClosed)?;
            done_rx.await.map_err(|_| DeleteError::QueueClosed)?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_deleter_targets_local_node() {
        let config = NamingConfig {
            local_ip: "10.0.0.5".to_string(),
            http_port: 8848,
            ..Default::default()
        };
        let deleter = HttpInstanceDeleter::new(&config).unwrap();
        assert_eq!(deleter.url(), "http://10.0.0.5:8848/nacos/v1/ns/instance");
    }

    #[tokio::test]
    async fn test_queued_deleter_round_trip() {
        let (deleter, mut rx) = QueuedInstanceDeleter::channel(4);
        tokio::spawn(async move {
            while let Some((request, done)) = rx.recv().await {
                let result = if request.ip == "10.0.0.1" {
                    Ok(())
                } else {
                    Err(DeleteError::NotFound(request.ip))
                };
                let _ = done.send(result);
            }
        });

        let request = DeleteInstanceRequest {
            ip: "10.0.0.1".to_string(),
            port: 80,
            ephemeral: true,
            cluster_name: "DEFAULT".to_string(),
            service_name: "orders".to_string(),
            namespace_id: "public".to_string(),
        };
        assert!(deleter.delete_instance(request.clone()).await.is_ok());

        let missing = DeleteInstanceRequest {
            ip: "10.0.0.9".to_string(),
            ..request
        };
        assert!(matches!(
            deleter.delete_instance(missing).await,
            Err(DeleteError::NotFound(_))
        ));
    }
}
