use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use super::client::Client;
use crate::config::ServerConfig;
use crate::session::ImportSession;

/// 同时读取的连接上限
pub const MAX_PARALLEL_READS: usize = 50;

/// 接收 dump 的 TCP 服务
///
/// 每个连接转成阻塞 socket 交给 blocking 线程池，连接内容按懒加载方式扫描进同一个文档。
pub struct Server {
    session: Arc<ImportSession>,
    bind: String,
    port: u16,
    permits: Arc<Semaphore>,
}

impl Server {
    pub fn new(session: Arc<ImportSession>, config: &ServerConfig) -> Self {
        Self {
            session,
            bind: config.bind.clone(),
            port: config.port,
            permits: Arc::new(Semaphore::new(MAX_PARALLEL_READS)),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind((self.bind.as_str(), self.port)).await?;
        tracing::info!("Dump server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let permit = self.permits.clone().acquire_owned().await?;
            let (socket, peer) = listener.accept().await?;
            let session = self.session.clone();
            let stream = match into_blocking(socket) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Dropping connection from {}: {}", peer, e);
                    continue;
                }
            };
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let _ = Client::new(session, peer).run(stream);
            });
        }
    }
}

fn into_blocking(socket: tokio::net::TcpStream) -> std::io::Result<std::net::TcpStream> {
    let stream = socket.into_std()?;
    stream.set_nonblocking(false)?;
    Ok(stream)
}

/// 绑定到任意端口（测试 / 嵌入用），返回实际地址
pub async fn bind_ephemeral(bind: &str) -> anyhow::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((bind, 0)).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}
