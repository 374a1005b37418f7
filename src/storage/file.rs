use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::{check_range, CachedContent, Chunk, MmapRegion, SubRange};
use crate::error::Result;

/// 文件字节源：前向读取走文件句柄，子区间直接按需 mmap
pub struct FileContent {
    path: PathBuf,
    reader: Mutex<File>,
    // 映射专用句柄，不受读位置影响
    mapper: File,
    delivered: AtomicU64,
    follower: Mutex<Option<Follower>>,
}

/// 跟随模式：文件仍在被写入时，EOF 之后等待修改事件
struct Follower {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<notify::Event>>,
    idle: Duration,
}

impl Follower {
    fn start(path: &Path, idle: Duration) -> Result<Self> {
        let (tx, rx) = unbounded();
        let mut watcher = notify::recommended_watcher(move |res| {
            // 接收端已关闭时静默丢弃
            let _ = tx.send(res);
        })
        .map_err(notify_err)?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(notify_err)?;
        Ok(Self {
            _watcher: watcher,
            rx,
            idle,
        })
    }

    /// 等待文件增长；超时返回 false（视为流结束）
    fn wait_for_growth(&self) -> bool {
        let deadline = Instant::now() + self.idle;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(Ok(event)) if event.kind.is_modify() || event.kind.is_create() => {
                    // 合并排队中的事件
                    while self.rx.try_recv().is_ok() {}
                    return true;
                }
                Ok(Ok(event)) => {
                    tracing::trace!("follow: ignoring {:?}", event.kind);
                }
                Ok(Err(e)) => {
                    tracing::warn!("follow watcher error: {}", e);
                    return false;
                }
                Err(_) => return false,
            }
        }
    }
}

fn notify_err(e: notify::Error) -> crate::error::DumpError {
    crate::error::DumpError::Io(std::io::Error::new(ErrorKind::Other, e))
}

impl FileContent {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = File::open(&path)?;
        let mapper = reader.try_clone()?;
        Ok(Self {
            path,
            reader: Mutex::new(reader),
            mapper,
            delivered: AtomicU64::new(0),
            follower: Mutex::new(None),
        })
    }

    /// 打开一个仍在增长的文件：EOF 后最多等待 `idle` 再判定结束
    pub fn follow(path: impl AsRef<Path>, idle: Duration) -> Result<Self> {
        let content = Self::open(path)?;
        let follower = Follower::start(&content.path, idle)?;
        *content.follower.lock() = Some(follower);
        Ok(content)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CachedContent for FileContent {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut file = self.reader.lock();
        loop {
            let n = match file.read(buf) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n > 0 {
                self.delivered.fetch_add(n as u64, Ordering::Release);
                return Ok(n);
            }
            let follower = self.follower.lock();
            match follower.as_ref() {
                Some(f) if f.wait_for_growth() => continue,
                _ => return Ok(0),
            }
        }
    }

    fn sub_range(&self, start: u64, end: u64) -> Result<SubRange> {
        check_range(start, end, self.delivered())?;
        if start == end {
            return Ok(SubRange::empty(start));
        }
        let len = (end - start) as usize;
        let map = MmapRegion::map_readonly(&self.mapper, start, len)?;
        Ok(SubRange::new(
            start,
            end,
            vec![Chunk::Mapped {
                map: std::sync::Arc::new(map),
                from: 0,
                to: len,
            }],
        ))
    }

    fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        // 停止跟随；已发出的子区间持有自己的映射
        self.follower.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DumpError;
    use std::io::Write;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("bgv-lazy-file-{}-{}", tag, nanos))
    }

    fn read_all(r: &mut impl Read) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn sub_range_only_after_delivery() {
        let dir = unique_tmp_dir("delivery");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dump.bgv");
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        File::create(&path).unwrap().write_all(&data).unwrap();

        let content = FileContent::open(&path).unwrap();
        let mut buf = vec![0u8; 1000];
        let n = content.read(&mut buf).unwrap();
        assert_eq!(n, 1000);

        let err = content.sub_range(10, 2000).unwrap_err();
        assert!(matches!(err, DumpError::RangeNotReady { available: 1000, .. }));

        let mut r = content.sub_range(10, 900).unwrap();
        assert_eq!(read_all(&mut r), &data[10..900]);

        while content.read(&mut buf).unwrap() > 0 {}
        assert_eq!(content.delivered(), 5000);
        let mut r = content.sub_range(4000, 5000).unwrap();
        assert_eq!(read_all(&mut r), &data[4000..]);
        assert!(content.sub_range(77, 77).unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn plain_file_reports_eof() {
        let dir = unique_tmp_dir("eof");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dump.bgv");
        File::create(&path).unwrap().write_all(b"abc").unwrap();

        let content = FileContent::open(&path).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(content.read(&mut buf).unwrap(), 3);
        assert_eq!(content.read(&mut buf).unwrap(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn follow_gives_up_after_idle_timeout() {
        let dir = unique_tmp_dir("follow");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dump.bgv");
        File::create(&path).unwrap().write_all(b"xyz").unwrap();

        let content = FileContent::follow(&path, Duration::from_millis(50)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(content.read(&mut buf).unwrap(), 3);
        let started = std::time::Instant::now();
        assert_eq!(content.read(&mut buf).unwrap(), 0);
        assert!(started.elapsed() >= Duration::from_millis(40));
        content.close().unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn follow_picks_up_appended_bytes() {
        let dir = unique_tmp_dir("append");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dump.bgv");
        File::create(&path).unwrap().write_all(b"xyz").unwrap();

        let content = FileContent::follow(&path, Duration::from_secs(5)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(content.read(&mut buf).unwrap(), 3);
        assert!(content.sub_range(0, 7).is_err());

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            f.write_all(b"more").unwrap();
            f.sync_data().unwrap();
        });

        // EOF 后等到追加的数据
        let n = content.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"more");
        writer.join().unwrap();
        assert_eq!(content.delivered(), 7);
        let mut r = content.sub_range(0, 7).unwrap();
        assert_eq!(read_all(&mut r), b"xyzmore");
        let mut r = content.sub_range(3, 7).unwrap();
        assert_eq!(read_all(&mut r), b"more");
        content.close().unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }
}
