use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;

use super::{check_range, CachedContent, Chunk, MmapRegion, SubRange};
use crate::error::Result;

static SPILL_SEQ: AtomicU64 = AtomicU64::new(0);

/// 已落盘并映射的区段
struct Segment {
    start: u64,
    map: Arc<Mmap>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.map.len() as u64
    }
}

struct CacheState {
    /// 接收窗口（仍在变化）
    window: Vec<u8>,
    /// 窗口首字节的绝对偏移 == 已落盘字节数
    window_start: u64,
    flushed: Vec<Segment>,
    spill: File,
}

/// 网络流字节源
///
/// 收到的字节先进入固定大小的接收窗口；窗口写满后追加到 spill 文件、
/// sync，再把这一段只读映射出来供子区间使用。spill 文件只有主扫描线程写。
pub struct NetworkStreamContent {
    source: Mutex<Box<dyn Read + Send>>,
    state: Mutex<CacheState>,
    window_size: usize,
    spill_path: PathBuf,
    delivered: AtomicU64,
    closed: AtomicBool,
}

impl NetworkStreamContent {
    pub fn new(
        source: Box<dyn Read + Send>,
        window_size: usize,
        spill_dir: &Path,
    ) -> Result<Self> {
        std::fs::create_dir_all(spill_dir)?;
        let seq = SPILL_SEQ.fetch_add(1, Ordering::Relaxed);
        let spill_path = spill_dir.join(format!("bgvdata_{}_{}.bgv", std::process::id(), seq));
        let spill = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&spill_path)?;
        tracing::debug!("spill file: {}", spill_path.display());

        let window_size = window_size.max(1);
        Ok(Self {
            source: Mutex::new(source),
            state: Mutex::new(CacheState {
                window: Vec::with_capacity(window_size),
                window_start: 0,
                flushed: Vec::new(),
                spill,
            }),
            window_size,
            spill_path,
            delivered: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn spill_path(&self) -> &Path {
        &self.spill_path
    }

    /// 已经落盘的字节数
    pub fn spilled_bytes(&self) -> u64 {
        self.state.lock().window_start
    }

    fn capture(&self, mut data: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        while !data.is_empty() {
            let room = self.window_size - st.window.len();
            let n = room.min(data.len());
            st.window.extend_from_slice(&data[..n]);
            data = &data[n..];
            if st.window.len() == self.window_size {
                flush_window(&mut st)?;
            }
        }
        Ok(())
    }
}

fn flush_window(st: &mut CacheState) -> Result<()> {
    if st.window.is_empty() {
        return Ok(());
    }
    let len = st.window.len();
    st.spill.write_all(&st.window)?;
    // 先写盘再映射：映射建立后对所有读者可见
    st.spill.sync_data()?;
    let map = MmapRegion::map_readonly(&st.spill, st.window_start, len)?;
    let start = st.window_start;
    st.flushed.push(Segment {
        start,
        map: Arc::new(map),
    });
    st.window_start += len as u64;
    st.window.clear();
    tracing::trace!("flushed [{}, {})", start, st.window_start);
    Ok(())
}

impl CachedContent for NetworkStreamContent {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        let n = {
            let mut src = self.source.lock();
            loop {
                match src.read(buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        if n > 0 {
            self.capture(&buf[..n])?;
            self.delivered.fetch_add(n as u64, Ordering::Release);
        }
        Ok(n)
    }

    fn sub_range(&self, start: u64, end: u64) -> Result<SubRange> {
        check_range(start, end, self.delivered())?;
        if start == end {
            return Ok(SubRange::empty(start));
        }
        let st = self.state.lock();
        let mut chunks = Vec::new();

        let first = st.flushed.partition_point(|s| s.end() <= start);
        for seg in &st.flushed[first..] {
            if seg.start >= end {
                break;
            }
            let from = start.max(seg.start) - seg.start;
            let to = end.min(seg.end()) - seg.start;
            chunks.push(Chunk::Mapped {
                map: seg.map.clone(),
                from: from as usize,
                to: to as usize,
            });
        }

        if end > st.window_start {
            // 落在仍在变化的窗口里：拷一份私有数据
            let from = (start.max(st.window_start) - st.window_start) as usize;
            let to = (end - st.window_start) as usize;
            chunks.push(Chunk::Owned(Arc::from(&st.window[from..to])));
        }
        Ok(SubRange::new(start, end, chunks))
    }

    fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut st = self.state.lock();
        flush_window(&mut st)
    }
}

impl Drop for NetworkStreamContent {
    fn drop(&mut self) {
        // 已映射的区段在 unlink 之后仍然有效
        if let Err(e) = std::fs::remove_file(&self.spill_path) {
            tracing::debug!("remove spill {}: {}", self.spill_path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DumpError;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("bgv-lazy-net-{}-{}", tag, nanos))
    }

    /// 每次最多吐出 `step` 个字节，模拟碎片化的网络读取
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    fn drain(r: &mut impl Read) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    fn content(data: &[u8], step: usize, window: usize, dir: &Path) -> NetworkStreamContent {
        let src = Trickle {
            data: data.to_vec(),
            pos: 0,
            step,
        };
        NetworkStreamContent::new(Box::new(src), window, dir).unwrap()
    }

    #[test]
    fn ranges_across_spill_and_window() {
        let dir = unique_tmp_dir("spill");
        let data = sample(1000);
        let net = content(&data, 37, 128, &dir);

        let mut buf = [0u8; 64];
        let mut total = 0;
        while total < 700 {
            total += net.read(&mut buf).unwrap();
        }
        assert_eq!(net.delivered(), total as u64);
        assert!(net.spilled_bytes() >= 512);
        assert!(net.spilled_bytes() <= total as u64);

        // 跨越多个映射段
        let mut r = net.sub_range(100, 500).unwrap();
        assert_eq!(drain(&mut r), &data[100..500]);

        // 一部分在已落盘区，一部分在开放窗口
        let tail = total as u64;
        let mut r = net.sub_range(300, tail).unwrap();
        assert_eq!(drain(&mut r), &data[300..total]);

        // 超出已送达范围
        assert!(matches!(
            net.sub_range(0, tail + 1),
            Err(DumpError::RangeNotReady { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn window_copy_is_private() {
        let dir = unique_tmp_dir("private");
        let data = sample(600);
        let net = content(&data, 50, 256, &dir);

        let mut buf = [0u8; 50];
        for _ in 0..3 {
            net.read(&mut buf).unwrap();
        }
        // [100,150) 还在窗口里
        let mut early = net.sub_range(100, 150).unwrap();

        // 继续读取，窗口被落盘并清空重用
        while net.read(&mut buf).unwrap() > 0 {}
        assert_eq!(drain(&mut early), &data[100..150]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn close_flushes_and_drop_removes_spill() {
        let dir = unique_tmp_dir("close");
        let data = sample(300);
        let net = content(&data, 300, 4096, &dir);

        let mut buf = [0u8; 512];
        assert_eq!(net.read(&mut buf).unwrap(), 300);
        assert_eq!(net.spilled_bytes(), 0);
        net.close().unwrap();
        assert_eq!(net.spilled_bytes(), 300);
        assert_eq!(net.read(&mut buf).unwrap(), 0);

        let mut r = net.sub_range(10, 290).unwrap();
        let spill = net.spill_path().to_path_buf();
        assert!(spill.exists());
        drop(net);
        assert!(!spill.exists());
        // 子区间比父对象活得更久
        assert_eq!(drain(&mut r), &data[10..290]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
