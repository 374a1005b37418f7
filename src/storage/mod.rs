pub mod file;
pub mod mmap;
pub mod network;

pub use file::FileContent;
pub use mmap::MmapRegion;
pub use network::NetworkStreamContent;

use std::io::{self, Read};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{DumpError, Result};

/// 可回看的字节源
///
/// `read` 只能前向推进；`sub_range` 对任何已经通过 `read` 送达的
/// `[start, end)` 都必须成功，即使前端还在继续读取。
pub trait CachedContent: Send + Sync {
    /// 返回 0 表示流结束
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// 取出已送达字节的独立只读视图（可比父对象活得更久）
    fn sub_range(&self, start: u64, end: u64) -> Result<SubRange>;

    /// 已经通过 `read` 送达的字节数
    fn delivered(&self) -> u64;

    fn close(&self) -> Result<()>;
}

/// 子区间的一段数据：映射区或私有拷贝
#[derive(Clone, Debug)]
pub enum Chunk {
    Mapped { map: Arc<Mmap>, from: usize, to: usize },
    Owned(Arc<[u8]>),
}

impl Chunk {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Chunk::Mapped { map, from, to } => &map[*from..*to],
            Chunk::Owned(data) => data,
        }
    }
}

/// `[start, end)` 的独立只读通道
#[derive(Debug)]
pub struct SubRange {
    start: u64,
    end: u64,
    chunks: Vec<Chunk>,
    chunk: usize,
    offset: usize,
}

impl SubRange {
    pub(crate) fn new(start: u64, end: u64, chunks: Vec<Chunk>) -> Self {
        Self {
            start,
            end,
            chunks,
            chunk: 0,
            offset: 0,
        }
    }

    pub fn empty(at: u64) -> Self {
        Self::new(at, at, Vec::new())
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Read for SubRange {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(chunk) = self.chunks.get(self.chunk) {
            let bytes = chunk.bytes();
            if self.offset >= bytes.len() {
                self.chunk += 1;
                self.offset = 0;
                continue;
            }
            let n = (bytes.len() - self.offset).min(buf.len());
            buf[..n].copy_from_slice(&bytes[self.offset..self.offset + n]);
            self.offset += n;
            return Ok(n);
        }
        Ok(0)
    }
}

/// 把 `CachedContent` 适配成 `std::io::Read`（主扫描线程使用）
pub struct ContentReader {
    content: Arc<dyn CachedContent>,
}

impl ContentReader {
    pub fn new(content: Arc<dyn CachedContent>) -> Self {
        Self { content }
    }
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf).map_err(|e| match e {
            DumpError::Io(inner) => inner,
            DumpError::Eof => io::Error::from(io::ErrorKind::UnexpectedEof),
            other => io::Error::new(io::ErrorKind::Other, other),
        })
    }
}

/// 校验子区间请求是否落在已送达范围内
pub(crate) fn check_range(start: u64, end: u64, delivered: u64) -> Result<()> {
    if start > end {
        return Err(DumpError::decode(format!("inverted range [{}, {})", start, end)));
    }
    if end > delivered {
        return Err(DumpError::RangeNotReady {
            start,
            end,
            available: delivered,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_range_reads_across_chunks() {
        let a: Arc<[u8]> = Arc::from(&b"hello "[..]);
        let b: Arc<[u8]> = Arc::from(&b""[..]);
        let c: Arc<[u8]> = Arc::from(&b"world"[..]);
        let mut r = SubRange::new(
            100,
            111,
            vec![Chunk::Owned(a), Chunk::Owned(b), Chunk::Owned(c)],
        );
        assert_eq!(r.len(), 11);

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn range_checks() {
        assert!(check_range(0, 10, 10).is_ok());
        assert!(matches!(
            check_range(0, 11, 10),
            Err(DumpError::RangeNotReady { available: 10, .. })
        ));
        assert!(matches!(check_range(5, 4, 10), Err(DumpError::Decode(_))));
    }
}
