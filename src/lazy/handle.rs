use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::model::FolderElement;

#[derive(Default)]
struct State {
    result: Option<Arc<Vec<FolderElement>>>,
    cancelled: bool,
    rebinds: u32,
}

struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

/// 一次补全请求的结果句柄
///
/// 同一个补全周期内的所有请求者拿到同一个句柄；结果只写入一次。
/// 重试不会换句柄，只累计 `rebinds`。
#[derive(Clone)]
pub struct CompletionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("CompletionHandle")
            .field("done", &st.result.is_some())
            .field("cancelled", &st.cancelled)
            .field("rebinds", &st.rebinds)
            .finish()
    }
}

impl CompletionHandle {
    pub(crate) fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                ready: Condvar::new(),
            }),
        }
    }

    /// 已经完成的句柄
    pub fn resolved(items: Vec<FolderElement>) -> Self {
        let h = Self::pending();
        h.complete(Arc::new(items));
        h
    }

    pub fn is_done(&self) -> bool {
        self.shared.state.lock().result.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }

    pub fn rebinds(&self) -> u32 {
        self.shared.state.lock().rebinds
    }

    pub fn same_as(&self, other: &CompletionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// 阻塞等待结果
    pub fn get(&self) -> Arc<Vec<FolderElement>> {
        let mut st = self.shared.state.lock();
        loop {
            if let Some(r) = &st.result {
                return r.clone();
            }
            self.shared.ready.wait(&mut st);
        }
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<Arc<Vec<FolderElement>>> {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state.lock();
        loop {
            if let Some(r) = &st.result {
                return Some(r.clone());
            }
            if self.shared.ready.wait_until(&mut st, deadline).timed_out() {
                return st.result.clone();
            }
        }
    }

    /// 写入结果；已有结果时返回 false
    pub(crate) fn complete(&self, items: Arc<Vec<FolderElement>>) -> bool {
        let mut st = self.shared.state.lock();
        if st.result.is_some() {
            return false;
        }
        st.result = Some(items);
        self.shared.ready.notify_all();
        true
    }

    /// 以空结果结束并标记取消
    pub(crate) fn cancel(&self) {
        let mut st = self.shared.state.lock();
        if st.result.is_some() {
            return;
        }
        st.cancelled = true;
        st.result = Some(Arc::new(Vec::new()));
        self.shared.ready.notify_all();
    }

    pub(crate) fn rebind(&self) {
        self.shared.state.lock().rebinds += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InputGraph;

    #[test]
    fn first_completion_wins() {
        let h = CompletionHandle::pending();
        assert!(!h.is_done());
        let items = Arc::new(vec![FolderElement::Graph(Arc::new(InputGraph::new("g")))]);
        assert!(h.complete(items.clone()));
        assert!(!h.complete(Arc::new(Vec::new())));
        h.cancel();
        assert!(!h.is_cancelled());
        assert!(Arc::ptr_eq(&h.get(), &items));
    }

    #[test]
    fn waiters_wake_up() {
        let h = CompletionHandle::pending();
        let h2 = h.clone();
        let t = std::thread::spawn(move || h2.get().len());
        std::thread::sleep(Duration::from_millis(20));
        h.complete(Arc::new(vec![FolderElement::Graph(Arc::new(InputGraph::new(
            "g",
        )))]));
        assert_eq!(t.join().unwrap(), 1);
    }

    #[test]
    fn timeout_and_cancel() {
        let h = CompletionHandle::pending();
        assert!(h.get_timeout(Duration::from_millis(10)).is_none());
        h.rebind();
        h.cancel();
        assert!(h.is_cancelled());
        assert_eq!(h.rebinds(), 1);
        assert!(h.get().is_empty());
    }
}
