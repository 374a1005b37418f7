use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::completer::{GroupCompleter, GroupSummary};
use super::handle::CompletionHandle;
use crate::model::{FolderElement, Group};

/// 补全进度回调
pub trait Feedback: Send + Sync {
    fn report_progress(&self, done: u64, total: u64, description: Option<&str>);

    fn is_cancelled(&self) -> bool;

    fn cancel(&self);

    /// 补全周期结束（成功、失败或取消）时调用一次
    fn finish(&self);
}

/// 内容可能尚未加载的文件夹
pub trait LazyContent {
    /// 内容已加载且句柄已完成
    fn is_complete(&self) -> bool;

    /// 触发（或加入进行中的）加载
    fn complete_contents(&self, feedback: Option<Arc<dyn Feedback>>) -> CompletionHandle;

    /// 当前已收到的部分子元素，可与加载并发调用
    fn partial_data(&self) -> Vec<FolderElement>;
}

/// 原子计数实现的 [`Feedback`]
#[derive(Default)]
pub struct ProgressFeedback {
    done: AtomicU64,
    total: AtomicU64,
    cancelled: AtomicBool,
    finished: AtomicU32,
    last_description: Mutex<Option<String>>,
}

impl ProgressFeedback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress(&self) -> (u64, u64) {
        (
            self.done.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }

    pub fn finish_count(&self) -> u32 {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finish_count() > 0
    }

    pub fn description(&self) -> Option<String> {
        self.last_description.lock().clone()
    }
}

impl Feedback for ProgressFeedback {
    fn report_progress(&self, done: u64, total: u64, description: Option<&str>) {
        self.done.store(done, Ordering::Release);
        self.total.store(total, Ordering::Release);
        if let Some(d) = description {
            *self.last_description.lock() = Some(d.to_string());
        }
        tracing::trace!("progress {}/{} {}", done, total, description.unwrap_or(""));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::AcqRel);
    }
}

pub(crate) enum LazyState {
    Incomplete,
    Completing(CompletionHandle),
    /// 子元素已安装；句柄可能还差最后一步
    Complete(CompletionHandle),
}

/// 懒加载分组附带的状态
pub struct LazySupport {
    pub(crate) completer: Arc<GroupCompleter>,
    pub(crate) state: Mutex<LazyState>,
}

impl Group {
    /// 内容由 `completer` 按需加载的分组
    pub fn new_lazy(completer: Arc<GroupCompleter>) -> Arc<Group> {
        let group = Arc::new(Group::with_lazy(Some(LazySupport {
            completer: completer.clone(),
            state: Mutex::new(LazyState::Incomplete),
        })));
        completer.attach(&group);
        group
    }

    pub fn completer(&self) -> Option<&Arc<GroupCompleter>> {
        self.lazy.as_ref().map(|l| &l.completer)
    }

    /// 主扫描得到的统计；非懒加载分组为 None
    pub fn summary(&self) -> Option<GroupSummary> {
        self.lazy.as_ref().map(|l| l.completer.summary())
    }

    /// 释放已加载的子元素，下次访问重新加载
    ///
    /// 分组立即回到未完成；changed 经通知上下文发出，监听者执行时旧子元素仍在，
    /// 之后才丢弃。未完成的分组返回 false。
    pub fn release_contents(self: &Arc<Self>) -> bool {
        let Some(lazy) = &self.lazy else {
            return false;
        };
        {
            let mut state = lazy.state.lock();
            match &*state {
                LazyState::Complete(h) if h.is_done() => {}
                _ => return false,
            }
            *state = LazyState::Incomplete;
            lazy.completer.reset();
        }
        let group = self.clone();
        lazy.completer.notify().execute(move || {
            group.changed().fire();
            let old = group.take_released();
            tracing::debug!("Released {} elements of group '{}'", old.len(), group.name());
        });
        true
    }

    /// 取走被释放的子元素；期间已重新加载完成则保留新内容
    fn take_released(&self) -> Vec<FolderElement> {
        let Some(lazy) = &self.lazy else {
            return Vec::new();
        };
        let state = lazy.state.lock();
        if matches!(&*state, LazyState::Complete(_)) {
            return Vec::new();
        }
        std::mem::take(&mut *self.elements.write())
    }
}

impl LazyContent for Group {
    fn is_complete(&self) -> bool {
        match &self.lazy {
            None => true,
            Some(lazy) => matches!(&*lazy.state.lock(), LazyState::Complete(h) if h.is_done()),
        }
    }

    fn complete_contents(&self, feedback: Option<Arc<dyn Feedback>>) -> CompletionHandle {
        let Some(lazy) = &self.lazy else {
            if let Some(fb) = feedback {
                fb.finish();
            }
            return CompletionHandle::resolved(self.elements());
        };

        let mut state = lazy.state.lock();
        let handle = match &*state {
            LazyState::Complete(h) => {
                let h = h.clone();
                drop(state);
                if let Some(fb) = feedback {
                    fb.finish();
                }
                return h;
            }
            LazyState::Completing(h) => {
                let h = h.clone();
                if let Some(fb) = feedback {
                    lazy.completer.attach_feedback(fb);
                }
                return h;
            }
            LazyState::Incomplete => {
                let h = CompletionHandle::pending();
                *state = LazyState::Completing(h.clone());
                h
            }
        };
        drop(state);
        lazy.completer.request(handle.clone(), feedback);
        handle
    }

    fn partial_data(&self) -> Vec<FolderElement> {
        match &self.lazy {
            Some(lazy) if !self.is_complete() => lazy.completer.partial(),
            _ => self.elements(),
        }
    }
}
