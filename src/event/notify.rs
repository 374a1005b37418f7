use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Msg {
    Run(Job),
    Stop,
}

/// 通知上下文：所有模型变更通知都投递到这里，按 FIFO 在同一线程执行
#[derive(Clone)]
pub struct NotifyContext {
    tx: Option<Sender<Msg>>,
}

/// 通知线程句柄
pub struct NotifyThread {
    tx: Sender<Msg>,
    handle: Option<JoinHandle<()>>,
}

impl NotifyContext {
    /// 在调用线程上直接执行（测试 / 单线程嵌入）
    pub fn inline() -> Self {
        Self { tx: None }
    }

    pub fn spawn(name: &str) -> Result<(Self, NotifyThread)> {
        let (tx, rx) = unbounded::<Msg>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for msg in rx.iter() {
                    match msg {
                        Msg::Run(job) => {
                            let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                            if r.is_err() {
                                tracing::error!("notification listener panicked");
                            }
                        }
                        Msg::Stop => break,
                    }
                }
            })?;
        Ok((
            Self {
                tx: Some(tx.clone()),
            },
            NotifyThread {
                tx,
                handle: Some(handle),
            },
        ))
    }

    pub fn is_inline(&self) -> bool {
        self.tx.is_none()
    }

    /// 投递；通知线程已退出时退化为就地执行
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match &self.tx {
            None => job(),
            Some(tx) => {
                if let Err(e) = tx.send(Msg::Run(Box::new(job))) {
                    if let Msg::Run(job) = e.into_inner() {
                        job();
                    }
                }
            }
        }
    }
}

impl NotifyThread {
    /// 执行完已排队的通知后退出
    pub fn stop(mut self) {
        let _ = self.tx.send(Msg::Stop);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                tracing::warn!("notify thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn runs_in_order_on_one_thread() {
        let (ctx, thread) = NotifyContext::spawn("bgv-notify-test").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = seen.clone();
            ctx.execute(move || {
                let name = std::thread::current().name().map(str::to_string);
                seen.lock().push((i, name));
            });
        }
        thread.stop();
        let seen = seen.lock();
        assert_eq!(seen.len(), 20);
        for (i, (n, name)) in seen.iter().enumerate() {
            assert_eq!(*n, i);
            assert_eq!(name.as_deref(), Some("bgv-notify-test"));
        }
    }

    #[test]
    fn falls_back_inline_after_stop() {
        let (ctx, thread) = NotifyContext::spawn("bgv-notify-stop").unwrap();
        thread.stop();
        let hit = Arc::new(Mutex::new(false));
        let h = hit.clone();
        ctx.execute(move || *h.lock() = true);
        assert!(*hit.lock());
    }
}
