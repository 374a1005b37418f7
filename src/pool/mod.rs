pub mod value;

pub use value::*;

use std::sync::Arc;

use parking_lot::Mutex;
use roaring::RoaringBitmap;

use crate::error::{DumpError, Result};

// 分块写时复制：快照只复制块指针，写入只复制被改动的块
const CHUNK_BITS: usize = 8;
const CHUNK_SIZE: usize = 1 << CHUNK_BITS;
const CHUNK_MASK: usize = CHUNK_SIZE - 1;

type Slot = Option<PoolValue>;

#[derive(Clone, Default)]
struct Table {
    chunks: Vec<Arc<Vec<Slot>>>,
    len: usize,
}

impl Table {
    fn get(&self, index: usize) -> Option<&PoolValue> {
        if index >= self.len {
            return None;
        }
        self.chunks
            .get(index >> CHUNK_BITS)
            .and_then(|c| c[index & CHUNK_MASK].as_ref())
    }

    fn set(&mut self, index: usize, value: PoolValue) {
        let chunk = index >> CHUNK_BITS;
        while self.chunks.len() <= chunk {
            self.chunks.push(Arc::new(vec![None; CHUNK_SIZE]));
        }
        self.len = self.len.max(index + 1);
        Arc::make_mut(&mut self.chunks[chunk])[index & CHUNK_MASK] = Some(value);
    }
}

/// 常量池访问记录（用于校验子区间重放与主解析一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Get,
    Put,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoolOp {
    pub at: u64,
    pub index: u16,
    pub access: Access,
    pub value: PoolValue,
}

#[derive(Clone, Default)]
pub struct PoolTrace(Arc<Mutex<Vec<PoolOp>>>);

impl PoolTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, op: PoolOp) {
        self.0.lock().push(op);
    }

    pub fn ops(&self) -> Vec<PoolOp> {
        self.0.lock().clone()
    }

    /// 落在 `[start, end)` 字节区间内的操作
    pub fn ops_in(&self, start: u64, end: u64) -> Vec<PoolOp> {
        self.0
            .lock()
            .iter()
            .filter(|op| op.at >= start && op.at < end)
            .cloned()
            .collect()
    }
}

/// 冻结的常量池表（不可变，可跨线程共享）
#[derive(Clone)]
pub struct PoolSnapshot {
    table: Arc<Table>,
    generation: u32,
}

impl PoolSnapshot {
    pub fn get(&self, index: u16) -> Option<&PoolValue> {
        self.table.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.table.len
    }

    pub fn is_empty(&self) -> bool {
        self.table.len == 0
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// 以快照为种子得到一个可写的独立常量池
    pub fn thaw(&self) -> ConstantPool {
        ConstantPool {
            table: (*self.table).clone(),
            frozen: None,
            read: RoaringBitmap::new(),
            generation: self.generation,
            trace: None,
        }
    }
}

/// 可分叉的常量池
///
/// 主扫描独占可变的 live 表。一个已被读过的下标即将被覆盖时，先冻结一份
/// 覆盖前的表（每个 epoch 只冻结一次），再继续修改 live 表。
pub struct ConstantPool {
    table: Table,
    frozen: Option<Arc<Table>>,
    read: RoaringBitmap,
    generation: u32,
    trace: Option<PoolTrace>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ConstantPool {
    /// 独立副本：共享数据块，但 read 标记与冻结状态各自独立
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            frozen: None,
            read: RoaringBitmap::new(),
            generation: self.generation,
            trace: None,
        }
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            table: Table::default(),
            frozen: None,
            read: RoaringBitmap::new(),
            generation: 0,
            trace: None,
        }
    }

    pub fn set_trace(&mut self, trace: Option<PoolTrace>) {
        self.trace = trace;
    }

    pub fn len(&self) -> usize {
        self.table.len
    }

    pub fn is_empty(&self) -> bool {
        self.table.len == 0
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// 是否存在尚未被 fork 取走的冻结表
    pub fn has_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// 读取并标记为已读
    pub fn get(&mut self, index: u16, at: u64) -> Result<PoolValue> {
        let value = self.table.get(index as usize).cloned().ok_or_else(|| {
            DumpError::decode(format!(
                "Invalid constant pool index {} at {} (size {})",
                index, at, self.table.len
            ))
        })?;
        self.read.insert(index as u32);
        if let Some(trace) = &self.trace {
            trace.record(PoolOp {
                at,
                index,
                access: Access::Get,
                value: value.clone(),
            });
        }
        Ok(value)
    }

    /// 写入；覆盖已读下标前先冻结当前表
    pub fn put(&mut self, index: u16, value: PoolValue, at: u64) -> PoolValue {
        if self.read.contains(index as u32) {
            if self.frozen.is_none() {
                self.frozen = Some(Arc::new(self.table.clone()));
                self.generation += 1;
                tracing::trace!(
                    "pool fork-before-write: index {} at {}, generation {}",
                    index,
                    at,
                    self.generation
                );
            }
            self.read.clear();
        }
        if let Some(trace) = &self.trace {
            trace.record(PoolOp {
                at,
                index,
                access: Access::Put,
                value: value.clone(),
            });
        }
        self.table.set(index as usize, value.clone());
        value
    }

    /// 取走冻结表（若本 epoch 发生过冲突写入），否则返回当前表的快照
    pub fn fork(&mut self) -> PoolSnapshot {
        match self.frozen.take() {
            Some(table) => PoolSnapshot {
                table,
                generation: self.generation - 1,
            },
            None => self.snapshot(),
        }
    }

    /// 丢弃旧 epoch 的冻结表：之后的 fork 只反映从此刻开始的冲突写入
    pub fn settle(&mut self) {
        if self.frozen.take().is_some() {
            tracing::trace!("pool settle: dropped stale frozen table");
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            table: Arc::new(self.table.clone()),
            generation: self.generation,
        }
    }

    /// 新的 dump 头：清空常量池
    pub fn restart(&mut self) {
        self.table = Table::default();
        self.frozen = None;
        self.read.clear();
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> PoolValue {
        PoolValue::String(Arc::from(v))
    }

    #[test]
    fn unread_overwrite_does_not_freeze() {
        let mut pool = ConstantPool::new();
        pool.put(3, s("a"), 0);
        pool.put(3, s("b"), 1);
        assert!(!pool.has_frozen());
        assert_eq!(pool.get(3, 2).unwrap(), s("b"));
        let err = pool.get(4, 3).unwrap_err();
        assert!(matches!(err, DumpError::Decode(_)));
    }

    #[test]
    fn read_then_overwrite_freezes_old_value() {
        let mut pool = ConstantPool::new();
        pool.put(7, s("v1"), 0);
        // 读者在 T 时刻之前拿到的快照
        let before = pool.snapshot();
        assert_eq!(pool.get(7, 1).unwrap(), s("v1"));

        pool.put(7, s("v2"), 2);
        assert!(pool.has_frozen());
        assert_eq!(before.get(7), Some(&s("v1")));
        assert_eq!(pool.get(7, 3).unwrap(), s("v2"));

        let forked = pool.fork();
        assert!(!pool.has_frozen());
        assert_eq!(forked.get(7), Some(&s("v1")));
        assert_eq!(pool.get(7, 4).unwrap(), s("v2"));
    }

    #[test]
    fn frozen_taken_once_per_epoch() {
        let mut pool = ConstantPool::new();
        pool.put(1, s("a"), 0);
        pool.put(2, s("b"), 0);
        pool.get(1, 1).unwrap();
        pool.put(1, s("a2"), 2);
        pool.get(2, 3).unwrap();
        // 第二次冲突写入不再冻结，冻结表保持第一次覆盖之前的状态
        pool.put(2, s("b2"), 4);
        let forked = pool.fork();
        assert_eq!(forked.get(1), Some(&s("a")));
        assert_eq!(forked.get(2), Some(&s("b")));
        assert_eq!(forked.generation(), 0);
        assert_eq!(pool.generation(), 1);
    }

    #[test]
    fn fork_without_conflict_is_current_state() {
        let mut pool = ConstantPool::new();
        pool.put(0, s("x"), 0);
        pool.get(0, 1).unwrap();
        pool.put(1, s("y"), 2);
        let snap = pool.fork();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(1), Some(&s("y")));
    }

    #[test]
    fn settle_drops_stale_frozen() {
        let mut pool = ConstantPool::new();
        pool.put(0, s("x"), 0);
        pool.get(0, 1).unwrap();
        pool.put(0, s("x2"), 2);
        pool.settle();
        pool.put(5, s("late"), 3);
        let snap = pool.fork();
        assert_eq!(snap.get(0), Some(&s("x2")));
        assert_eq!(snap.get(5), Some(&s("late")));
    }

    #[test]
    fn clone_is_isolated_from_live_writes() {
        let mut live = ConstantPool::new();
        for i in 0..600u16 {
            live.put(i, s(&format!("v{}", i)), i as u64);
        }
        let mut copy = live.clone();
        live.put(300, s("changed"), 1000);
        assert_eq!(copy.get(300, 0).unwrap(), s("v300"));
        // clone 的读标记独立：live 上覆盖不会因 copy 的读而冻结
        live.put(301, s("changed"), 1001);
        assert!(!live.has_frozen());

        let thawed = live.snapshot().thaw();
        assert_eq!(thawed.len(), 600);
    }

    #[test]
    fn trace_records_reads_and_writes() {
        let trace = PoolTrace::new();
        let mut pool = ConstantPool::new();
        pool.set_trace(Some(trace.clone()));
        pool.put(2, s("k"), 10);
        pool.get(2, 20).unwrap();
        pool.get(2, 30).unwrap();

        let ops = trace.ops();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].access, Access::Put);
        assert_eq!(ops[1].access, Access::Get);
        assert_eq!(trace.ops_in(15, 30).len(), 1);
    }

    #[test]
    fn restart_clears_everything() {
        let mut pool = ConstantPool::new();
        pool.put(0, s("x"), 0);
        pool.get(0, 1).unwrap();
        pool.put(0, s("y"), 2);
        pool.restart();
        assert!(pool.is_empty());
        assert!(!pool.has_frozen());
        assert!(pool.get(0, 3).is_err());
    }
}
