use std::sync::Arc;

use crate::error::Result;
use crate::pool::{ConstantPool, Method, NodeClass, PoolValue};

/// 属性值
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    /// 数组已格式化为 "[a, b]"
    Array(String),
    Pool(PoolValue),
    Null,
}

impl PropertyValue {
    pub fn render(&self) -> String {
        match self {
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Long(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::Double(v) => v.to_string(),
            PropertyValue::Bool(v) => v.to_string(),
            PropertyValue::Array(s) => s.clone(),
            PropertyValue::Pool(v) => v.to_string(),
            PropertyValue::Null => "null".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Input,
    Successor,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EdgeEvent {
    pub kind: EdgeKind,
    pub from: i32,
    pub to: i32,
    /// 端口编号（input 端口从 preds 开始编号）
    pub num: u32,
    /// 列表端口内的位置；单端口为 -1
    pub index: i32,
    pub label: Arc<str>,
    pub edge_type: Option<Arc<str>>,
}

/// driver 产生的结构事件
///
/// 每个 `Start*` 都会收到唯一对应的 `End*`，截断时由 driver 合成。
#[derive(Clone, Debug)]
pub enum Event {
    Start,
    End,
    /// 新的 dump 头：常量池已清空
    ResetStream,

    StartGroup,
    GroupName {
        name: Arc<str>,
        short_name: Arc<str>,
    },
    GroupMethod {
        method: Arc<Method>,
        bci: i32,
    },
    StartGroupContent,
    EndGroup,

    StartGraph {
        title: Arc<str>,
    },
    /// 接下来的子图挂在当前节点的 `key` 属性下
    StartNestedProperty {
        key: Arc<str>,
    },
    Property {
        key: Arc<str>,
        value: PropertyValue,
    },
    MarkDuplicate,
    EndGraph,

    StartNode {
        id: i32,
        has_predecessors: bool,
    },
    NodeClass(Arc<NodeClass>),
    Edge(EdgeEvent),
    EndNode {
        id: i32,
    },

    StartBlock {
        id: i32,
    },
    BlockNode {
        node: i32,
    },
    BlockEdge {
        from: i32,
        to: i32,
    },
    EndBlock {
        id: i32,
    },
}

/// 事件发生时 builder 可见的解析上下文
pub struct ReadContext<'a> {
    /// 当前绝对偏移（事件对应的字节已经消费）
    pub mark: u64,
    pub pool: &'a mut ConstantPool,
}

/// builder 角色：每个角色一个 `handle` 函数，driver 静态分派
pub trait Builder {
    fn handle(&mut self, event: Event, cx: &mut ReadContext<'_>) -> Result<()>;
}
