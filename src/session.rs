use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::Config;
use crate::core::LoadExecutor;
use crate::error::{DumpError, Result};
use crate::event::{NotifyContext, NotifyThread};
use crate::lazy::{CompletionEnv, RetryPolicy, ScanningBuilder};
use crate::model::{Document, ModelBuilder};
use crate::pool::{ConstantPool, PoolTrace};
use crate::stats::{SessionStats, StatsReport};
use crate::storage::{CachedContent, ContentReader, FileContent, NetworkStreamContent};
use crate::stream::{BinaryReader, BinarySource, ParseSummary};

/// 一次主扫描的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanReport {
    pub label: String,
    pub summary: ParseSummary,
    /// 登记的顶层分组数
    pub groups: usize,
}

/// 后台主扫描线程
pub struct ScanJob {
    label: String,
    handle: JoinHandle<Result<ScanReport>>,
}

impl ScanJob {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待扫描结束；格式错误在这里返回
    pub fn join(self) -> Result<ScanReport> {
        match self.handle.join() {
            Ok(r) => r,
            Err(_) => Err(DumpError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("scan thread '{}' panicked", self.label),
            ))),
        }
    }
}

/// 导入会话：一个文档、一个执行器、一个通知线程
pub struct ImportSession {
    config: Config,
    document: Arc<Document>,
    executor: LoadExecutor,
    notify: NotifyContext,
    notify_thread: Mutex<Option<NotifyThread>>,
    stats: Arc<SessionStats>,
    pool_trace: Option<PoolTrace>,
}

impl ImportSession {
    pub fn new(config: Config) -> Result<Self> {
        let (notify, thread) = NotifyContext::spawn("bgv-notify")?;
        Self::build(config, notify, Some(thread))
    }

    /// 通知在产生它的线程上直接执行
    pub fn with_inline_notify(config: Config) -> Result<Self> {
        Self::build(config, NotifyContext::inline(), None)
    }

    fn build(config: Config, notify: NotifyContext, thread: Option<NotifyThread>) -> Result<Self> {
        config.validate()?;
        let executor = LoadExecutor::new("bgv-load", config.completion.workers)?;
        tracing::info!(
            "Import session ready: {} load workers, retry {}x{:?}",
            executor.workers(),
            config.completion.retry_attempts,
            config.completion.retry_delay()
        );
        Ok(Self {
            config,
            document: Document::new(),
            executor,
            notify,
            notify_thread: Mutex::new(thread),
            stats: Arc::new(SessionStats::default()),
            pool_trace: None,
        })
    }

    /// 记录之后所有扫描与补全的常量池访问
    pub fn with_pool_trace(mut self, trace: PoolTrace) -> Self {
        self.pool_trace = Some(trace);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn notify(&self) -> &NotifyContext {
        &self.notify
    }

    pub fn stats(&self) -> StatsReport {
        self.stats.report()
    }

    /// 懒加载扫描一个文件；`follow` 时文件到尾后继续等待增长
    pub fn scan_file(&self, path: &Path, follow: bool) -> Result<ScanJob> {
        let content = if follow {
            FileContent::follow(path, self.config.follow.idle_timeout())?
        } else {
            FileContent::open(path)?
        };
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.scan_content(Arc::new(content), &label)
    }

    /// 懒加载扫描一个字节流（如网络连接），超出窗口的数据落盘
    pub fn scan_stream<R: Read + Send + 'static>(&self, reader: R, label: &str) -> Result<ScanJob> {
        let content = Arc::new(NetworkStreamContent::new(
            Box::new(reader),
            self.config.network.receive_window,
            &self.config.network.spill_dir,
        )?);
        let stats = self.stats.clone();
        let net = content.clone();
        self.spawn_scan(content, label, move || {
            SessionStats::add(&stats.spilled_bytes, net.spilled_bytes());
        })
    }

    pub fn scan_content(&self, content: Arc<dyn CachedContent>, label: &str) -> Result<ScanJob> {
        self.spawn_scan(content, label, || {})
    }

    fn spawn_scan(
        &self,
        content: Arc<dyn CachedContent>,
        label: &str,
        after: impl FnOnce() + Send + 'static,
    ) -> Result<ScanJob> {
        let env = CompletionEnv {
            content,
            executor: self.executor.clone(),
            notify: self.notify.clone(),
            retry: RetryPolicy::from_config(&self.config),
            buffer_size: self.config.scan.read_buffer_size,
            stats: self.stats.clone(),
            pool_trace: self.pool_trace.clone(),
        };
        let document = self.document.clone();
        let name = label.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("bgv-scan-{}", label))
            .spawn(move || {
                let r = run_scan(document, env, name);
                after();
                r
            })?;
        Ok(ScanJob {
            label: label.to_string(),
            handle,
        })
    }

    /// 不走懒加载，在当前线程上把整个文件读进文档
    pub fn load_eager(&self, path: &Path) -> Result<ParseSummary> {
        let content: Arc<dyn CachedContent> = Arc::new(FileContent::open(path)?);
        let source = BinarySource::with_capacity(
            ContentReader::new(content.clone()),
            self.config.scan.read_buffer_size,
        );
        let builder = ModelBuilder::new(self.document.clone(), self.notify.clone());
        let mut pool = ConstantPool::new();
        pool.set_trace(self.pool_trace.clone());
        let mut reader = BinaryReader::new(source, builder, pool);
        let result = reader.parse();
        content.close()?;
        let summary = result?;
        SessionStats::add(&self.stats.bytes_scanned, summary.end);
        SessionStats::add(
            &self.stats.graphs_scanned,
            reader.builder().graph_count() as u64,
        );
        tracing::info!("Loaded {} eagerly ({} bytes)", path.display(), summary.end);
        Ok(summary)
    }

    /// 停止执行器与通知线程；未执行的补全以取消结束
    pub fn shutdown(&self) {
        self.executor.shutdown();
        if let Some(t) = self.notify_thread.lock().take() {
            t.stop();
        }
        tracing::info!("Import session stopped");
    }
}

impl Drop for ImportSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_scan(document: Arc<Document>, env: CompletionEnv, label: String) -> Result<ScanReport> {
    let content = env.content.clone();
    let stats = env.stats.clone();
    let mut pool = ConstantPool::new();
    pool.set_trace(env.pool_trace.clone());
    let source = BinarySource::with_capacity(ContentReader::new(content.clone()), env.buffer_size);
    let builder = ScanningBuilder::new(document, env);
    let mut reader = BinaryReader::new(source, builder, pool);

    let result = reader.parse();
    if let Err(e) = content.close() {
        tracing::warn!("Closing {} failed: {}", label, e);
    }
    let summary = match result {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Scan of {} failed: {}", label, e);
            return Err(e);
        }
    };
    SessionStats::add(&stats.bytes_scanned, summary.end);
    let groups = reader.builder().groups();
    tracing::info!(
        "Scanned {}: {} bytes, {} lazy groups",
        label,
        summary.end,
        groups
    );
    Ok(ScanReport {
        label,
        summary,
        groups,
    })
}
