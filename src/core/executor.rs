use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::Result;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// 显式关闭时等待进行中任务的上限
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct Inner {
    name: String,
    workers: usize,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    shutdown: Arc<AtomicBool>,
}

/// 会话级加载执行器
///
/// 每个会话一个 tokio runtime：延迟用 `time::sleep`，回放等阻塞任务走
/// `spawn_blocking`（上限 `workers` 个线程）。关闭后提交的任务原样退回，
/// 已排队未执行的任务被丢弃（丢弃即 drop，持有资源的任务可以在 Drop 里收尾）。
#[derive(Clone)]
pub struct LoadExecutor {
    inner: Arc<Inner>,
}

impl LoadExecutor {
    pub fn new(name: &str, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name(format!("{}-worker", name))
            .enable_time()
            .build()?;

        tracing::debug!("Load executor '{}' started with {} workers", name, workers);

        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                workers,
                handle: runtime.handle().clone(),
                runtime: Mutex::new(Some(runtime)),
                shutdown: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    /// 按 CPU 核数取 worker 数
    pub fn adaptive(name: &str) -> Result<Self> {
        Self::new(name, num_cpus::get().clamp(1, 8))
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// `delay` 之后在阻塞线程池上执行；执行器已关闭时退回任务
    pub fn schedule(&self, delay: Duration, job: Job) -> std::result::Result<(), Job> {
        if self.is_shutdown() {
            return Err(job);
        }
        let flag = self.inner.shutdown.clone();
        self.inner.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if flag.load(Ordering::Acquire) {
                drop(job);
                return;
            }
            let run = tokio::task::spawn_blocking(move || {
                if flag.load(Ordering::Acquire) {
                    drop(job);
                } else {
                    job();
                }
            });
            if let Err(e) = run.await {
                if e.is_panic() {
                    tracing::error!("Load job panicked");
                }
            }
        });
        Ok(())
    }

    pub fn execute(&self, job: Job) -> std::result::Result<(), Job> {
        self.schedule(Duration::ZERO, job)
    }

    /// 停止接收任务，丢弃排队中的任务并等待进行中的任务结束
    ///
    /// 在本执行器的线程内调用时不等待（否则会等到自己）。
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(runtime) = self.inner.runtime.lock().take() else {
            return;
        };
        if self.on_own_thread() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
        tracing::debug!("Load executor '{}' stopped", self.inner.name);
    }

    fn on_own_thread(&self) -> bool {
        let own = format!("{}-worker", self.inner.name);
        std::thread::current().name() == Some(own.as_str())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // 最后一个引用可能在本 runtime 的线程上释放，不能阻塞等待
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_jobs_on_workers() {
        let ex = LoadExecutor::new("bgv-test", 2).unwrap();
        let (tx, rx) = unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            ex.execute(Box::new(move || tx.send(i).unwrap())).ok().unwrap();
        }
        let mut got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        ex.shutdown();
    }

    #[test]
    fn delayed_jobs_run_in_due_order() {
        let ex = LoadExecutor::new("bgv-test-delay", 1).unwrap();
        let (tx, rx) = unbounded();
        let t1 = tx.clone();
        ex.schedule(Duration::from_millis(80), Box::new(move || t1.send("late").unwrap()))
            .ok()
            .unwrap();
        ex.schedule(Duration::from_millis(10), Box::new(move || tx.send("early").unwrap()))
            .ok()
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
        ex.shutdown();
    }

    struct DropFlag(Arc<AtomicUsize>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn shutdown_drops_pending_and_rejects_new() {
        let ex = LoadExecutor::new("bgv-test-stop", 1).unwrap();
        let dropped = Arc::new(AtomicUsize::new(0));
        let flag = DropFlag(dropped.clone());
        ex.schedule(
            Duration::from_secs(3600),
            Box::new(move || {
                let _keep = flag;
            }),
        )
        .ok()
        .unwrap();
        ex.shutdown();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert!(ex.is_shutdown());
        assert!(ex.execute(Box::new(|| {})).is_err());
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let ex = LoadExecutor::new("bgv-test-panic", 1).unwrap();
        ex.execute(Box::new(|| panic!("boom"))).ok().unwrap();
        let (tx, rx) = unbounded();
        ex.execute(Box::new(move || tx.send(1).unwrap())).ok().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        ex.shutdown();
    }

    #[test]
    fn shutdown_from_own_job_returns() {
        let ex = LoadExecutor::new("bgv-test-self-stop", 1).unwrap();
        let (tx, rx) = unbounded();
        let inner = ex.clone();
        ex.execute(Box::new(move || {
            inner.shutdown();
            tx.send(inner.is_shutdown()).unwrap();
        }))
        .ok()
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(ex.execute(Box::new(|| {})).is_err());
    }
}
