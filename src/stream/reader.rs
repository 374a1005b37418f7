use std::io::Read;
use std::sync::Arc;

use super::defs::*;
use super::event::{Builder, EdgeEvent, EdgeKind, Event, PropertyValue, ReadContext};
use super::source::{BinarySource, GraphDigest};
use crate::error::{DumpError, Result};
use crate::pool::{
    ConstantPool, EnumValue, Field, Klass, Method, NodeClass, PoolKind, PoolValue, Port,
    Signature, TypedPort,
};

// 计数来自流，预分配不超过这个数
const MAX_PREALLOC: usize = 1024;

/// 当前打开的结构，用于截断时合成关闭事件
#[derive(Clone, Copy, Debug)]
enum Open {
    Group,
    Graph,
    Node(i32),
    Block(i32),
}

/// 一次 driver 循环的结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// 停止时的绝对偏移
    pub end: u64,
    /// 因流结束而合成关闭的结构数
    pub synthesized_closes: usize,
}

/// 顶层 driver：读取记录并把事件交给 builder
pub struct BinaryReader<R, B> {
    source: BinarySource<R>,
    builder: B,
    pool: ConstantPool,
    open: Vec<Open>,
    folder_level: usize,
    hash_stack: Vec<Option<GraphDigest>>,
    seen_header: bool,
}

impl<R: Read, B: Builder> BinaryReader<R, B> {
    pub fn new(source: BinarySource<R>, builder: B, pool: ConstantPool) -> Self {
        Self {
            source,
            builder,
            pool,
            open: Vec::new(),
            folder_level: 0,
            hash_stack: Vec::new(),
            seen_header: false,
        }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    pub fn into_parts(self) -> (B, ConstantPool) {
        (self.builder, self.pool)
    }

    fn emit(&mut self, event: Event) -> Result<()> {
        let mut cx = ReadContext {
            mark: self.source.mark(),
            pool: &mut self.pool,
        };
        self.builder.handle(event, &mut cx)
    }

    fn open(&mut self, what: Open, event: Event) -> Result<()> {
        self.open.push(what);
        self.emit(event)
    }

    fn close(&mut self, event: Event) -> Result<()> {
        self.open.pop();
        self.emit(event)
    }

    /// 解析到流结束
    ///
    /// 截断（EOF）不算错误；格式错误在合成关闭事件之后返回。
    pub fn parse(&mut self) -> Result<ParseSummary> {
        self.emit(Event::Start)?;
        self.hash_stack.push(None);

        let outcome = self.parse_records();
        let dangling = self.open.len();
        if dangling > 0 {
            tracing::debug!(
                "stream stopped at {} with {} open structures",
                self.source.mark(),
                dangling
            );
        }
        let unwound = self.unwind();
        self.hash_stack.clear();
        let ended = self.emit(Event::End);

        let summary = ParseSummary {
            end: self.source.mark(),
            synthesized_closes: dangling,
        };
        match outcome {
            Err(DumpError::Eof) => {
                unwound?;
                ended?;
                Ok(summary)
            }
            Err(e) => {
                if let Err(u) = unwound {
                    tracing::warn!("error while closing open structures: {}", u);
                }
                Err(e)
            }
            Ok(()) => {
                unwound?;
                ended?;
                Ok(summary)
            }
        }
    }

    fn unwind(&mut self) -> Result<()> {
        let mut first = None;
        while let Some(open) = self.open.pop() {
            let event = match open {
                Open::Group => Event::EndGroup,
                Open::Graph => Event::EndGraph,
                Open::Node(id) => Event::EndNode { id },
                Open::Block(id) => Event::EndBlock { id },
            };
            if let Err(e) = self.emit(event) {
                first.get_or_insert(e);
            }
        }
        self.folder_level = 0;
        first.map_or(Ok(()), Err)
    }

    fn parse_records(&mut self) -> Result<()> {
        loop {
            if self.folder_level == 0 && self.source.read_header()? {
                if self.seen_header {
                    tracing::info!("new dump header at {}, resetting pool", self.source.mark());
                    self.pool.restart();
                    self.emit(Event::ResetStream)?;
                }
                self.seen_header = true;
            }
            self.parse_root()?;
        }
    }

    fn parse_root(&mut self) -> Result<()> {
        let at = self.source.mark();
        match self.source.read_u8()? {
            BEGIN_GROUP => self.begin_group(),
            BEGIN_GRAPH => {
                let title = self.read_pool_string()?;
                self.parse_graph(title, true)
            }
            CLOSE_GROUP => self.close_group(at),
            tag => Err(DumpError::decode(format!(
                "unknown root tag {:#04x} at {}",
                tag, at
            ))),
        }
    }

    fn begin_group(&mut self) -> Result<()> {
        self.open(Open::Group, Event::StartGroup)?;
        self.folder_level += 1;
        self.hash_stack.push(None);

        let name = self.read_pool_string_or_empty()?;
        let short_name = self.read_pool_string_or_empty()?;
        let method = self.read_pool_object(Some(PoolKind::Method))?;
        let bci = self.source.read_i32()?;
        self.emit(Event::GroupName { name, short_name })?;
        self.parse_properties()?;
        if let Some(PoolValue::Method(method)) = method {
            self.emit(Event::GroupMethod { method, bci })?;
        }
        self.emit(Event::StartGroupContent)
    }

    fn close_group(&mut self, at: u64) -> Result<()> {
        if self.folder_level == 0 {
            return Err(DumpError::decode(format!("unbalanced groups at {}", at)));
        }
        self.folder_level -= 1;
        self.hash_stack.pop();
        self.close(Event::EndGroup)
    }

    fn parse_graph(&mut self, title: Arc<str>, toplevel: bool) -> Result<()> {
        self.open(Open::Graph, Event::StartGraph { title })?;
        self.parse_properties()?;
        if toplevel {
            self.source.start_digest();
        }
        self.parse_nodes()?;
        self.parse_blocks()?;
        if toplevel {
            let digest = self.source.finish_digest();
            let duplicate = match self.hash_stack.last_mut() {
                Some(top) if *top == Some(digest) => true,
                Some(top) => {
                    *top = Some(digest);
                    false
                }
                None => false,
            };
            if duplicate {
                self.emit(Event::MarkDuplicate)?;
            }
        }
        self.close(Event::EndGraph)
    }

    fn parse_properties(&mut self) -> Result<()> {
        let count = self.source.read_u16()?;
        for _ in 0..count {
            let key = self.read_pool_string()?;
            let tag = self.source.read_u8()?;
            if tag == PROPERTY_SUBGRAPH {
                self.emit(Event::StartNestedProperty { key })?;
                self.parse_graph(Arc::from(""), false)?;
                continue;
            }
            let value = self.read_property_value(tag)?;
            self.emit(Event::Property { key, value })?;
        }
        Ok(())
    }

    fn read_property_value(&mut self, tag: u8) -> Result<PropertyValue> {
        let value = match tag {
            PROPERTY_POOL => match self.read_pool_object(None)? {
                Some(v) => PropertyValue::Pool(v),
                None => PropertyValue::Null,
            },
            PROPERTY_INT => PropertyValue::Int(self.source.read_i32()?),
            PROPERTY_LONG => PropertyValue::Long(self.source.read_i64()?),
            PROPERTY_DOUBLE => PropertyValue::Double(self.source.read_f64()?),
            PROPERTY_FLOAT => PropertyValue::Float(self.source.read_f32()?),
            PROPERTY_TRUE => PropertyValue::Bool(true),
            PROPERTY_FALSE => PropertyValue::Bool(false),
            PROPERTY_ARRAY => self.read_array()?,
            other => {
                return Err(DumpError::decode(format!(
                    "unknown property tag {:#04x} at {}",
                    other,
                    self.source.mark()
                )))
            }
        };
        Ok(value)
    }

    fn read_array(&mut self) -> Result<PropertyValue> {
        let subtype = self.source.read_u8()?;
        let len = self.source.read_i32()?;
        if len < 0 {
            return Ok(PropertyValue::Null);
        }
        let len = len as usize;
        let rendered = match subtype {
            PROPERTY_INT => self.source.read_ints_to_string(len)?,
            PROPERTY_DOUBLE => self.source.read_doubles_to_string(len)?,
            PROPERTY_POOL => {
                let mut parts = Vec::with_capacity(len.min(MAX_PREALLOC));
                for _ in 0..len {
                    match self.read_pool_object(None)? {
                        Some(v) => parts.push(v.to_string()),
                        None => parts.push("null".to_string()),
                    }
                }
                format!("[{}]", parts.join(", "))
            }
            other => {
                return Err(DumpError::decode(format!(
                    "unknown array subtype {:#04x}",
                    other
                )))
            }
        };
        Ok(PropertyValue::Array(rendered))
    }

    fn parse_nodes(&mut self) -> Result<()> {
        let count = self.read_count("node")?;
        for _ in 0..count {
            let id = self.source.read_i32()?;
            let class = match self.read_pool_object(Some(PoolKind::NodeClass))? {
                Some(PoolValue::NodeClass(nc)) => nc,
                _ => {
                    return Err(DumpError::decode(format!(
                        "node {} without node class",
                        id
                    )))
                }
            };
            let preds = self.source.read_u8()?;
            self.open(
                Open::Node(id),
                Event::StartNode {
                    id,
                    has_predecessors: preds > 0,
                },
            )?;
            self.emit(Event::NodeClass(class.clone()))?;
            self.parse_properties()?;
            self.parse_edges(id, preds as u32, &class, EdgeKind::Input)?;
            self.parse_edges(id, 0, &class, EdgeKind::Successor)?;
            self.close(Event::EndNode { id })?;
        }
        Ok(())
    }

    fn parse_edges(&mut self, id: i32, base: u32, class: &NodeClass, kind: EdgeKind) -> Result<()> {
        let ports: Vec<(&Port, Option<Arc<str>>)> = match kind {
            EdgeKind::Input => class
                .inputs
                .iter()
                .map(|p| (&p.port, p.kind.as_ref().map(|k| Arc::from(k.name()))))
                .collect(),
            EdgeKind::Successor => class.successors.iter().map(|p| (p, None)).collect(),
        };
        for (num, (port, edge_type)) in ports.into_iter().enumerate() {
            let num = base + num as u32;
            if port.is_list {
                let size = self.source.read_u16()?;
                for index in 0..size {
                    let other = self.source.read_i32()?;
                    self.edge(kind, id, other, num, index as i32, port, &edge_type)?;
                }
            } else {
                let other = self.source.read_i32()?;
                self.edge(kind, id, other, num, -1, port, &edge_type)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn edge(
        &mut self,
        kind: EdgeKind,
        id: i32,
        other: i32,
        num: u32,
        index: i32,
        port: &Port,
        edge_type: &Option<Arc<str>>,
    ) -> Result<()> {
        if other < 0 {
            return Ok(());
        }
        let (from, to) = match kind {
            EdgeKind::Input => (other, id),
            EdgeKind::Successor => (id, other),
        };
        self.emit(Event::Edge(EdgeEvent {
            kind,
            from,
            to,
            num,
            index,
            label: port.name.clone(),
            edge_type: edge_type.clone(),
        }))
    }

    fn parse_blocks(&mut self) -> Result<()> {
        let count = self.read_count("block")?;
        for _ in 0..count {
            let id = self.source.read_i32()?;
            self.open(Open::Block(id), Event::StartBlock { id })?;
            let nodes = self.read_count("block node")?;
            for _ in 0..nodes {
                let node = self.source.read_i32()?;
                if node >= 0 {
                    self.emit(Event::BlockNode { node })?;
                }
            }
            let edges = self.read_count("block edge")?;
            for _ in 0..edges {
                let to = self.source.read_i32()?;
                self.emit(Event::BlockEdge { from: id, to })?;
            }
            self.close(Event::EndBlock { id })?;
        }
        Ok(())
    }

    fn read_count(&mut self, what: &str) -> Result<usize> {
        let n = self.source.read_i32()?;
        usize::try_from(n).map_err(|_| {
            DumpError::decode(format!("negative {} count {} at {}", what, n, self.source.mark()))
        })
    }

    fn read_pool_string(&mut self) -> Result<Arc<str>> {
        match self.read_pool_object(Some(PoolKind::String))? {
            Some(PoolValue::String(s)) => Ok(s),
            _ => Err(DumpError::decode(format!(
                "unexpected null string at {}",
                self.source.mark()
            ))),
        }
    }

    fn read_pool_string_or_empty(&mut self) -> Result<Arc<str>> {
        match self.read_pool_object(Some(PoolKind::String))? {
            Some(PoolValue::String(s)) => Ok(s),
            _ => Ok(Arc::from("")),
        }
    }

    fn read_pool_klass(&mut self) -> Result<Option<Arc<Klass>>> {
        match self.read_pool_object(Some(PoolKind::Klass))? {
            Some(PoolValue::Klass(k)) => Ok(Some(k)),
            _ => Ok(None),
        }
    }

    /// 读取常量池对象：null / 新定义（写入池）/ 引用（从池读取）
    fn read_pool_object(&mut self, expected: Option<PoolKind>) -> Result<Option<PoolValue>> {
        let at = self.source.mark();
        let tag = self.source.read_u8()?;
        if tag == POOL_NULL {
            return Ok(None);
        }
        if tag == POOL_NEW {
            let index = self.source.read_u16()?;
            let kind_tag = self.source.read_u8()?;
            let kind = self.check_kind(kind_tag, expected, at)?;
            let value = self.read_pool_payload(kind)?;
            return Ok(Some(self.pool.put(index, value, at)));
        }
        let kind = self.check_kind(tag, expected, at)?;
        let index = self.source.read_u16()?;
        let value = self.pool.get(index, at)?;
        if value.kind() != kind {
            return Err(DumpError::decode(format!(
                "pool index {} holds {:?}, referenced as {:?} at {}",
                index,
                value.kind(),
                kind,
                at
            )));
        }
        Ok(Some(value))
    }

    fn check_kind(&self, tag: u8, expected: Option<PoolKind>, at: u64) -> Result<PoolKind> {
        let kind = pool_kind(tag)
            .ok_or_else(|| DumpError::decode(format!("unknown pool tag {:#04x} at {}", tag, at)))?;
        match expected {
            Some(want) if want != kind => Err(DumpError::decode(format!(
                "expected pool {:?} but got {:?} at {}",
                want, kind, at
            ))),
            _ => Ok(kind),
        }
    }

    fn read_pool_payload(&mut self, kind: PoolKind) -> Result<PoolValue> {
        let value = match kind {
            PoolKind::String => PoolValue::String(self.source.read_string()?),
            PoolKind::Klass => {
                let name = self.source.read_string()?;
                let values = match self.source.read_u8()? {
                    ENUM_KLASS => {
                        let n = self.read_count("enum value")?;
                        let mut values = Vec::with_capacity(n.min(MAX_PREALLOC));
                        for _ in 0..n {
                            values.push(self.read_pool_string()?);
                        }
                        Some(values)
                    }
                    KLASS => None,
                    other => {
                        return Err(DumpError::decode(format!(
                            "unknown klass type {:#04x}",
                            other
                        )))
                    }
                };
                PoolValue::Klass(Arc::new(Klass { name, values }))
            }
            PoolKind::Enum => {
                let klass = self.read_pool_klass()?.ok_or_else(|| {
                    DumpError::decode(format!("enum without class at {}", self.source.mark()))
                })?;
                let ordinal = self.source.read_i32()?;
                PoolValue::Enum(Arc::new(EnumValue { klass, ordinal }))
            }
            PoolKind::NodeClass => {
                let class_name = self.source.read_string()?;
                let name_template = self.source.read_string()?;
                let n_inputs = self.source.read_u16()?;
                let mut inputs = Vec::with_capacity(n_inputs as usize);
                for _ in 0..n_inputs {
                    let is_list = self.source.read_u8()? != 0;
                    let name = self.read_pool_string()?;
                    let kind = match self.read_pool_object(Some(PoolKind::Enum))? {
                        Some(PoolValue::Enum(e)) => Some(e),
                        _ => None,
                    };
                    inputs.push(TypedPort {
                        port: Port { is_list, name },
                        kind,
                    });
                }
                let n_sux = self.source.read_u16()?;
                let mut successors = Vec::with_capacity(n_sux as usize);
                for _ in 0..n_sux {
                    let is_list = self.source.read_u8()? != 0;
                    let name = self.read_pool_string()?;
                    successors.push(Port { is_list, name });
                }
                PoolValue::NodeClass(Arc::new(NodeClass {
                    class_name,
                    name_template,
                    inputs,
                    successors,
                }))
            }
            PoolKind::Method => {
                let holder = self.read_pool_klass()?;
                let name = self.read_pool_string()?;
                let signature = match self.read_pool_object(Some(PoolKind::Signature))? {
                    Some(PoolValue::Signature(s)) => Some(s),
                    _ => None,
                };
                let flags = self.source.read_i32()?;
                let code = self.source.read_bytes()?.map(Arc::from);
                PoolValue::Method(Arc::new(Method {
                    holder,
                    name,
                    signature,
                    flags,
                    code,
                }))
            }
            PoolKind::Field => {
                let holder = self.read_pool_klass()?;
                let name = self.read_pool_string()?;
                let type_name = self.read_pool_string()?;
                let flags = self.source.read_i32()?;
                PoolValue::Field(Arc::new(Field {
                    holder,
                    name,
                    type_name,
                    flags,
                }))
            }
            PoolKind::Signature => {
                let argc = self.source.read_u16()?;
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    args.push(self.read_pool_string()?);
                }
                let ret = self.read_pool_string()?;
                PoolValue::Signature(Arc::new(Signature { args, ret }))
            }
        };
        Ok(value)
    }
}
