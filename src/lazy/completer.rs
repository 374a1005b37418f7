use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::content::{Feedback, LazyState};
use super::handle::CompletionHandle;
use super::single::SingleGroupBuilder;
use crate::config::Config;
use crate::core::{Job, LoadExecutor};
use crate::error::{DumpError, Result};
use crate::event::NotifyContext;
use crate::model::{FolderElement, Group};
use crate::pool::{ConstantPool, PoolSnapshot, PoolTrace};
use crate::stats::SessionStats;
use crate::storage::CachedContent;
use crate::stream::{BinaryReader, BinarySource, ParseMonitor};

/// end 未知时的重试策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.completion.retry_attempts,
            delay: config.completion.retry_delay(),
        }
    }
}

/// 补全任务共享的运行环境
#[derive(Clone)]
pub struct CompletionEnv {
    pub content: Arc<dyn CachedContent>,
    pub executor: LoadExecutor,
    pub notify: NotifyContext,
    pub retry: RetryPolicy,
    pub buffer_size: usize,
    pub stats: Arc<SessionStats>,
    /// 调试用：记录补全期间所有常量池访问
    pub pool_trace: Option<PoolTrace>,
}

/// 主扫描期间统计的分组概要
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupSummary {
    pub graphs: usize,
    pub nodes: usize,
    pub edges: usize,
    pub start: u64,
    pub end: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPhase {
    Created,
    Ranged,
    Completing,
    Rescheduled,
    Delivered,
}

struct Inner {
    end: Option<u64>,
    pool: Option<PoolSnapshot>,
    summary: GroupSummary,
    phase: CompletionPhase,
    attempts: u32,
    handle: Option<CompletionHandle>,
    feedbacks: Vec<Arc<dyn Feedback>>,
}

enum Plan {
    Idle,
    Retry(CompletionHandle, u32),
    GiveUp(u32),
    Load(u64, Option<PoolSnapshot>),
}

/// 懒加载分组的补全器
///
/// 记住分组在流中的 `[start, end)` 以及分组开始时的常量池快照，
/// 被请求时在执行器上重放该区间。锁顺序：分组状态锁 → `inner`。
pub struct GroupCompleter {
    start: u64,
    env: CompletionEnv,
    group: OnceLock<Weak<Group>>,
    inner: Mutex<Inner>,
    partial: Arc<Mutex<Vec<FolderElement>>>,
}

/// 提交给执行器的任务；未执行就被丢弃时按取消处理
struct FetchJob {
    completer: Option<Arc<GroupCompleter>>,
}

impl FetchJob {
    fn run(mut self) {
        if let Some(c) = self.completer.take() {
            c.run();
        }
    }
}

impl Drop for FetchJob {
    fn drop(&mut self) {
        if let Some(c) = self.completer.take() {
            tracing::debug!("Completion of group at {} abandoned", c.start);
            c.deliver_cancelled();
        }
    }
}

struct CompletionMonitor {
    completer: Arc<GroupCompleter>,
    total: u64,
    label: String,
}

impl ParseMonitor for CompletionMonitor {
    fn is_cancelled(&self) -> bool {
        self.completer.all_cancelled()
    }

    fn update_progress(&self, consumed: u64) {
        let feedbacks = self.completer.inner.lock().feedbacks.clone();
        for fb in feedbacks {
            fb.report_progress(consumed, self.total, Some(&self.label));
        }
    }
}

impl GroupCompleter {
    pub fn new(env: CompletionEnv, start: u64) -> Arc<Self> {
        Arc::new(Self {
            start,
            env,
            group: OnceLock::new(),
            inner: Mutex::new(Inner {
                end: None,
                pool: None,
                summary: GroupSummary {
                    start,
                    ..Default::default()
                },
                phase: CompletionPhase::Created,
                attempts: 0,
                handle: None,
                feedbacks: Vec::new(),
            }),
            partial: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn attach(&self, group: &Arc<Group>) {
        let _ = self.group.set(Arc::downgrade(group));
    }

    fn group(&self) -> Option<Arc<Group>> {
        self.group.get().and_then(Weak::upgrade)
    }

    fn label(&self) -> String {
        match self.group() {
            Some(g) => g.name(),
            None => format!("@{}", self.start),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> Option<u64> {
        self.inner.lock().end
    }

    pub fn phase(&self) -> CompletionPhase {
        self.inner.lock().phase
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn summary(&self) -> GroupSummary {
        self.inner.lock().summary.clone()
    }

    /// 主扫描到达分组结尾：记录 end 与常量池快照
    pub(crate) fn set_range_end(&self, end: u64, pool: PoolSnapshot, mut summary: GroupSummary) {
        let mut inner = self.inner.lock();
        summary.start = self.start;
        summary.end = Some(end);
        inner.end = Some(end);
        inner.pool = Some(pool);
        inner.summary = summary;
        if inner.phase == CompletionPhase::Created {
            inner.phase = CompletionPhase::Ranged;
        }
        tracing::trace!("Group range [{}, {}) known", self.start, end);
    }

    /// 主扫描期间更新概要
    pub(crate) fn update_summary(&self, summary: &GroupSummary) {
        let mut inner = self.inner.lock();
        inner.summary.graphs = summary.graphs;
        inner.summary.nodes = summary.nodes;
        inner.summary.edges = summary.edges;
    }

    pub(crate) fn notify(&self) -> &NotifyContext {
        &self.env.notify
    }

    pub(crate) fn partial(&self) -> Vec<FolderElement> {
        self.partial.lock().clone()
    }

    pub(crate) fn request(self: &Arc<Self>, handle: CompletionHandle, feedback: Option<Arc<dyn Feedback>>) {
        {
            let mut inner = self.inner.lock();
            inner.handle = Some(handle);
            if let Some(fb) = feedback {
                inner.feedbacks.push(fb);
            }
            inner.attempts = 0;
            inner.phase = CompletionPhase::Completing;
        }
        self.partial.lock().clear();
        SessionStats::bump(&self.env.stats.completions_requested);
        tracing::debug!("Completion of group '{}' requested", self.label());
        self.schedule(Duration::ZERO);
    }

    pub(crate) fn attach_feedback(&self, feedback: Arc<dyn Feedback>) {
        self.inner.lock().feedbacks.push(feedback);
    }

    /// 释放内容后回到可再次请求的状态
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.phase = if inner.end.is_some() {
            CompletionPhase::Ranged
        } else {
            CompletionPhase::Created
        };
        inner.attempts = 0;
        inner.handle = None;
    }

    fn all_cancelled(&self) -> bool {
        let inner = self.inner.lock();
        !inner.feedbacks.is_empty() && inner.feedbacks.iter().all(|f| f.is_cancelled())
    }

    fn schedule(self: &Arc<Self>, delay: Duration) {
        let job = FetchJob {
            completer: Some(self.clone()),
        };
        // 被退回的任务在这里 drop，随之走取消流程
        if self
            .env
            .executor
            .schedule(delay, Box::new(move || job.run()))
            .is_err()
        {
            tracing::debug!("Executor closed, group at {} not loaded", self.start);
        }
    }

    fn run(self: &Arc<Self>) {
        if self.all_cancelled() {
            self.deliver_cancelled();
            return;
        }
        let plan = {
            let mut inner = self.inner.lock();
            match (&inner.handle, inner.end) {
                (None, _) => Plan::Idle,
                (Some(h), None) => {
                    let h = h.clone();
                    inner.attempts += 1;
                    if inner.attempts > self.env.retry.attempts {
                        Plan::GiveUp(inner.attempts - 1)
                    } else {
                        inner.phase = CompletionPhase::Rescheduled;
                        Plan::Retry(h, inner.attempts)
                    }
                }
                (Some(_), Some(end)) => {
                    inner.phase = CompletionPhase::Completing;
                    Plan::Load(end, inner.pool.clone())
                }
            }
        };

        match plan {
            Plan::Idle => {}
            Plan::Retry(handle, attempt) => {
                handle.rebind();
                SessionStats::bump(&self.env.stats.retries);
                tracing::debug!(
                    "End of group at {} unknown, retry {} in {:?}",
                    self.start,
                    attempt,
                    self.env.retry.delay
                );
                self.schedule(self.env.retry.delay);
            }
            Plan::GiveUp(attempts) => {
                tracing::warn!(
                    "Group '{}' at {} never ended after {} retries, delivering empty",
                    self.label(),
                    self.start,
                    attempts
                );
                SessionStats::bump(&self.env.stats.completions_failed);
                self.deliver(Vec::new());
            }
            Plan::Load(end, pool) => match self.load(end, pool) {
                Ok(items) => self.deliver(items),
                Err(DumpError::Cancelled) => self.deliver_cancelled(),
                Err(e) => {
                    tracing::warn!(
                        "Loading group '{}' [{}, {}) failed: {}",
                        self.label(),
                        self.start,
                        end,
                        e
                    );
                    SessionStats::bump(&self.env.stats.completions_failed);
                    self.deliver(Vec::new());
                }
            },
        }
    }

    fn load(self: &Arc<Self>, end: u64, pool: Option<PoolSnapshot>) -> Result<Vec<FolderElement>> {
        let group = self.group().ok_or(DumpError::Cancelled)?;
        let range = self.env.content.sub_range(self.start, end)?;
        let monitor = Arc::new(CompletionMonitor {
            completer: self.clone(),
            total: end - self.start,
            label: group.name(),
        });
        let source = BinarySource::with_capacity(range, self.env.buffer_size)
            .starting_at(self.start)
            .with_monitor(monitor);

        let mut pool = pool.map(|p| p.thaw()).unwrap_or_else(ConstantPool::new);
        pool.set_trace(self.env.pool_trace.clone());

        let builder = SingleGroupBuilder::new(group, self.env.notify.clone(), self.partial.clone());
        let mut reader = BinaryReader::new(source, builder, pool);
        let parsed = reader.parse()?;
        let (builder, _) = reader.into_parts();
        let items = builder.into_items();
        tracing::debug!(
            "Loaded group at [{}, {}): {} elements",
            self.start,
            parsed.end,
            items.len()
        );
        Ok(items)
    }

    fn deliver(&self, items: Vec<FolderElement>) {
        let items = Arc::new(items);
        let group = self.group();
        let taken = match group.as_ref().and_then(|g| g.lazy.as_ref().map(|l| (g, l))) {
            Some((g, lazy)) => {
                let mut state = lazy.state.lock();
                let taken = self.take_delivered();
                if let Some((handle, _)) = &taken {
                    *g.elements.write() = (*items).clone();
                    *state = LazyState::Complete(handle.clone());
                }
                taken
            }
            None => self.take_delivered(),
        };
        let Some((handle, feedbacks)) = taken else {
            return;
        };
        self.partial.lock().clear();
        handle.complete(items);
        SessionStats::bump(&self.env.stats.completions_delivered);

        // 通知在句柄完成之后，由执行器转交通知上下文
        let notify = self.env.notify.clone();
        let follow_up: Job = Box::new(move || {
            notify.execute(move || {
                if let Some(g) = group {
                    g.changed().fire();
                }
                for fb in feedbacks {
                    fb.finish();
                }
            })
        });
        if let Err(job) = self.env.executor.execute(follow_up) {
            job();
        }
    }

    fn take_delivered(&self) -> Option<(CompletionHandle, Vec<Arc<dyn Feedback>>)> {
        let mut inner = self.inner.lock();
        let handle = inner.handle.clone()?;
        inner.phase = CompletionPhase::Delivered;
        inner.attempts = 0;
        Some((handle, std::mem::take(&mut inner.feedbacks)))
    }

    /// 取消：句柄以空结果结束，分组回到未完成，不发 changed
    fn deliver_cancelled(&self) {
        let take = |inner: &mut Inner| {
            inner.phase = if inner.end.is_some() {
                CompletionPhase::Ranged
            } else {
                CompletionPhase::Created
            };
            inner.attempts = 0;
            (inner.handle.take(), std::mem::take(&mut inner.feedbacks))
        };
        let group = self.group();
        let (handle, feedbacks) = match group.as_ref().and_then(|g| g.lazy.as_ref()) {
            Some(lazy) => {
                let mut state = lazy.state.lock();
                let taken = take(&mut *self.inner.lock());
                if matches!(&*state, LazyState::Completing(_)) {
                    *state = LazyState::Incomplete;
                }
                taken
            }
            None => take(&mut *self.inner.lock()),
        };
        self.partial.lock().clear();
        if let Some(handle) = handle {
            handle.cancel();
            SessionStats::bump(&self.env.stats.completions_cancelled);
            tracing::debug!("Completion of group at {} cancelled", self.start);
        }
        if feedbacks.is_empty() {
            return;
        }
        self.env.notify.execute(move || {
            for fb in feedbacks {
                fb.finish();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::{LazyContent, ProgressFeedback, ScanningBuilder};
    use crate::model::Document;
    use crate::storage::{ContentReader, NetworkStreamContent, SubRange};
    use crate::stream::{DumpWriter, GraphSpec, Prop};
    use std::io::Read;
    use std::time::Instant;

    /// 内存中的字节源
    struct MemContent {
        data: Vec<u8>,
        pos: Mutex<usize>,
    }

    impl MemContent {
        fn new(data: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                data,
                pos: Mutex::new(0),
            })
        }
    }

    impl CachedContent for MemContent {
        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let mut pos = self.pos.lock();
            let n = buf.len().min(self.data.len() - *pos);
            buf[..n].copy_from_slice(&self.data[*pos..*pos + n]);
            *pos += n;
            Ok(n)
        }

        fn sub_range(&self, start: u64, end: u64) -> Result<SubRange> {
            crate::storage::check_range(start, end, self.delivered())?;
            let bytes: Arc<[u8]> = Arc::from(&self.data[start as usize..end as usize]);
            Ok(SubRange::new(start, end, vec![crate::storage::Chunk::Owned(bytes)]))
        }

        fn delivered(&self) -> u64 {
            *self.pos.lock() as u64
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        doc: Arc<Document>,
        env: CompletionEnv,
    }

    fn fixture(content: Arc<dyn CachedContent>, retry: RetryPolicy) -> Fixture {
        Fixture {
            doc: Document::new(),
            env: CompletionEnv {
                content,
                executor: LoadExecutor::new("bgv-test-load", 2).unwrap(),
                notify: NotifyContext::inline(),
                retry,
                buffer_size: 64,
                stats: Arc::new(SessionStats::default()),
                pool_trace: None,
            },
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 10,
            delay: Duration::from_millis(20),
        }
    }

    fn scan(fx: &Fixture) {
        let reader = ContentReader::new(fx.env.content.clone());
        let builder = ScanningBuilder::new(fx.doc.clone(), fx.env.clone());
        let mut r = BinaryReader::new(BinarySource::with_capacity(reader, 64), builder, ConstantPool::new());
        r.parse().unwrap();
    }

    fn wait_until(what: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if what() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        what()
    }

    fn dump_a() -> Vec<u8> {
        let mut w = DumpWriter::new();
        w.header();
        w.begin_group("A", "", None, &[("type", Prop::str("phase"))]);
        w.graph("g0", &GraphSpec::with_nodes(3, "Const"));
        w.close_group();
        w.into_bytes()
    }

    #[test]
    fn end_to_end_single_group() {
        let fx = fixture(MemContent::new(dump_a()), quick_retry());
        scan(&fx);

        let groups = fx.doc.groups();
        assert_eq!(groups.len(), 1);
        let a = &groups[0];
        assert_eq!(a.name(), "A");
        assert_eq!(a.kind(), "phase");
        assert!(!a.is_complete());
        assert!(a.elements().is_empty());
        assert_eq!(a.completer().unwrap().phase(), CompletionPhase::Ranged);

        let items = a.complete_contents(None).get();
        assert_eq!(items.len(), 1);
        let g = items[0].as_graph().unwrap();
        assert_eq!(g.title, "g0");
        assert_eq!(g.nodes.len(), 3);
        assert!(a.is_complete());
        assert_eq!(a.graphs().len(), 1);
        // 分组头属性不会重复
        assert_eq!(a.properties().len(), 2);
        fx.env.executor.shutdown();
    }

    #[test]
    fn concurrent_requests_complete_once() {
        let fx = fixture(MemContent::new(dump_a()), quick_retry());
        scan(&fx);
        let a = fx.doc.groups()[0].clone();

        let f1 = ProgressFeedback::new();
        let f2 = ProgressFeedback::new();
        let h1 = a.complete_contents(Some(f1.clone()));
        let h2 = a.complete_contents(Some(f2.clone()));
        assert!(h1.same_as(&h2));
        let r1 = h1.get();
        let r2 = h2.get();
        assert!(Arc::ptr_eq(&r1, &r2));

        assert!(wait_until(|| a.changed().fire_count() == 1));
        assert!(wait_until(|| f1.is_finished() && f2.is_finished()));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(a.changed().fire_count(), 1);
        assert_eq!(fx.env.stats.report().completions_delivered, 1);

        // 已完成：直接返回同一句柄
        let h3 = a.complete_contents(None);
        assert!(h3.same_as(&h1));
        fx.env.executor.shutdown();
    }

    #[test]
    fn release_then_reload() {
        let fx = fixture(MemContent::new(dump_a()), quick_retry());
        scan(&fx);
        let a = fx.doc.groups()[0].clone();
        let first = a.complete_contents(None).get();
        assert!(wait_until(|| a.changed().fire_count() == 1));

        let seen_on_fire = Arc::new(Mutex::new(None));
        let seen = seen_on_fire.clone();
        let weak = Arc::downgrade(&a);
        a.changed().subscribe(move || {
            if let Some(g) = weak.upgrade() {
                *seen.lock() = Some(g.elements().len());
            }
        });
        assert!(a.release_contents());
        assert!(!a.is_complete());
        assert!(a.elements().is_empty());
        assert_eq!(*seen_on_fire.lock(), Some(1));

        let second = a.complete_contents(None).get();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
        assert!(a.is_complete());
        fx.env.executor.shutdown();
    }

    #[test]
    fn release_notifies_on_notify_thread() {
        let mut fx = fixture(MemContent::new(dump_a()), quick_retry());
        let (notify, thread) = NotifyContext::spawn("bgv-test-notify").unwrap();
        fx.env.notify = notify;
        scan(&fx);
        assert!(wait_until(|| !fx.doc.groups().is_empty()));
        let a = fx.doc.groups()[0].clone();
        a.complete_contents(None).get();
        assert!(wait_until(|| a.changed().fire_count() == 1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let weak = Arc::downgrade(&a);
        a.changed().subscribe(move || {
            let count = weak.upgrade().map(|g| g.elements().len());
            let name = std::thread::current().name().map(str::to_string);
            record.lock().push((name, count));
        });
        assert!(a.release_contents());
        assert!(!a.is_complete());
        assert!(wait_until(|| !seen.lock().is_empty()));
        assert!(wait_until(|| a.elements().is_empty()));
        assert_eq!(
            seen.lock()[0],
            (Some("bgv-test-notify".to_string()), Some(1))
        );

        fx.env.executor.shutdown();
        thread.stop();
    }

    #[test]
    fn reload_before_release_notification_keeps_new_contents() {
        let mut fx = fixture(MemContent::new(dump_a()), quick_retry());
        let (notify, thread) = NotifyContext::spawn("bgv-test-notify-race").unwrap();
        fx.env.notify = notify.clone();
        scan(&fx);
        assert!(wait_until(|| !fx.doc.groups().is_empty()));
        let a = fx.doc.groups()[0].clone();
        a.complete_contents(None).get();

        // 堵住通知线程，让释放通知排在重新加载之后
        let (open_tx, open_rx) = crossbeam::channel::bounded::<()>(0);
        notify.execute(move || {
            let _ = open_rx.recv();
        });
        assert!(a.release_contents());
        let second = a.complete_contents(None).get();
        assert_eq!(second.len(), 1);
        open_tx.send(()).unwrap();

        assert!(wait_until(|| a.changed().fire_count() >= 3));
        assert!(a.is_complete());
        assert_eq!(a.elements().len(), 1);
        fx.env.executor.shutdown();
        thread.stop();
    }

    #[test]
    fn cancel_without_request_still_finishes_feedback() {
        let fx = fixture(MemContent::new(dump_a()), quick_retry());
        let completer = GroupCompleter::new(fx.env.clone(), 8);
        let fb = ProgressFeedback::new();
        completer.attach_feedback(fb.clone());
        completer.deliver_cancelled();
        assert_eq!(fb.finish_count(), 1);
        assert_eq!(fx.env.stats.report().completions_cancelled, 0);
        fx.env.executor.shutdown();
    }

    #[test]
    fn cancelled_request_reverts() {
        let fx = fixture(MemContent::new(dump_a()), quick_retry());
        scan(&fx);
        let a = fx.doc.groups()[0].clone();

        let fb = ProgressFeedback::new();
        fb.cancel();
        let h = a.complete_contents(Some(fb.clone()));
        let items = h.get();
        assert!(items.is_empty());
        assert!(h.is_cancelled());
        assert!(wait_until(|| fb.is_finished()));
        assert!(!a.is_complete());
        assert_eq!(a.changed().fire_count(), 0);

        // 之后的请求正常加载
        let again = a.complete_contents(None);
        assert!(!again.same_as(&h));
        assert_eq!(again.get().len(), 1);
        fx.env.executor.shutdown();
    }

    /// sub_range 总是失败的字节源
    struct NoRange(Arc<MemContent>);

    impl CachedContent for NoRange {
        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            self.0.read(buf)
        }

        fn sub_range(&self, start: u64, end: u64) -> Result<SubRange> {
            Err(DumpError::RangeNotReady {
                start,
                end,
                available: 0,
            })
        }

        fn delivered(&self) -> u64 {
            self.0.delivered()
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_load_delivers_empty() {
        let fx = fixture(Arc::new(NoRange(MemContent::new(dump_a()))), quick_retry());
        scan(&fx);
        let a = fx.doc.groups()[0].clone();
        let h = a.complete_contents(None);
        assert!(h.get().is_empty());
        assert!(!h.is_cancelled());
        assert!(a.is_complete());
        assert_eq!(fx.env.stats.report().completions_failed, 1);
        assert!(wait_until(|| a.changed().fire_count() == 1));
        fx.env.executor.shutdown();
    }

    #[test]
    fn retry_exhaustion_delivers_empty() {
        let mut w = DumpWriter::new();
        w.header();
        w.begin_group("open", "", None, &[]);
        w.graph("g0", &GraphSpec::with_nodes(1, "N"));
        let fx = fixture(
            MemContent::new(w.into_bytes()),
            RetryPolicy {
                attempts: 2,
                delay: Duration::from_millis(5),
            },
        );
        let group = {
            // 只登记分组，不把流读完：end 永远未知
            let completer = GroupCompleter::new(fx.env.clone(), 8);
            let g = Group::new_lazy(completer);
            g.set_property("name", "open");
            g
        };
        let h = group.complete_contents(None);
        let items = h.get_timeout(Duration::from_secs(5)).unwrap();
        assert!(items.is_empty());
        assert!(!h.is_cancelled());
        assert_eq!(h.rebinds(), 2);
        assert!(group.is_complete());
        assert_eq!(fx.env.stats.report().completions_failed, 1);
        fx.env.executor.shutdown();
    }

    /// 按需放行字节的阻塞读端
    struct Gate {
        rx: crossbeam::channel::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl Read for Gate {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(chunk) => self.pending = chunk,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    #[test]
    fn request_before_end_retries_until_ranged() {
        let mut w = DumpWriter::new();
        w.header();
        w.begin_group("slow", "", None, &[]);
        w.graph("g0", &GraphSpec::with_nodes(2, "N"));
        let split = w.position() as usize;
        w.graph("g1", &GraphSpec::with_nodes(2, "N"));
        w.close_group();
        let bytes = w.into_bytes();

        let (tx, rx) = crossbeam::channel::unbounded();
        let dir = std::env::temp_dir().join(format!(
            "bgv-lazy-completer-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let content = Arc::new(
            NetworkStreamContent::new(
                Box::new(Gate {
                    rx,
                    pending: Vec::new(),
                }),
                1024,
                &dir,
            )
            .unwrap(),
        );
        let fx = fixture(content, quick_retry());

        tx.send(bytes[..split].to_vec()).unwrap();
        let doc = fx.doc.clone();
        let env = fx.env.clone();
        let scan_thread = std::thread::spawn(move || {
            let reader = ContentReader::new(env.content.clone());
            let builder = ScanningBuilder::new(doc, env);
            let mut r = BinaryReader::new(BinarySource::with_capacity(reader, 64), builder, ConstantPool::new());
            r.parse().unwrap();
        });

        assert!(wait_until(|| !fx.doc.groups().is_empty()));
        let g = fx.doc.groups()[0].clone();
        let h = g.complete_contents(None);
        assert!(wait_until(|| h.rebinds() >= 1));
        assert!(!h.is_done());

        tx.send(bytes[split..].to_vec()).unwrap();
        drop(tx);
        let items = h.get_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(items.len(), 2);
        assert!(!h.is_cancelled());
        scan_thread.join().unwrap();
        fx.env.executor.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_executor_resolves_cancelled() {
        let fx = fixture(MemContent::new(dump_a()), quick_retry());
        scan(&fx);
        let a = fx.doc.groups()[0].clone();
        fx.env.executor.shutdown();
        let h = a.complete_contents(None);
        assert!(h.is_cancelled());
        assert!(!a.is_complete());
    }
}
