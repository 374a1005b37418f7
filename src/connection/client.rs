use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use crate::session::{ImportSession, ScanReport};

/// 一个已接入的 dump 发送端
pub struct Client {
    session: Arc<ImportSession>,
    peer: SocketAddr,
}

impl Client {
    pub fn new(session: Arc<ImportSession>, peer: SocketAddr) -> Self {
        Self { session, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// 阻塞读取整个连接；返回时连接已关闭、主扫描已结束
    pub fn run(self, stream: TcpStream) -> anyhow::Result<ScanReport> {
        tracing::info!("Client {} connected", self.peer);
        let label = format!("client-{}", self.peer);
        let job = self.session.scan_stream(stream, &label)?;
        match job.join() {
            Ok(report) => {
                tracing::info!(
                    "Client {} finished: {} bytes, {} groups",
                    self.peer,
                    report.summary.end,
                    report.groups
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("Client {} failed: {}", self.peer, e);
                Err(e.into())
            }
        }
    }
}
