use std::collections::HashMap;

use super::defs::*;

/// 属性值（写入侧）
#[derive(Clone, Debug)]
pub enum Prop {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i32>),
    Doubles(Vec<f64>),
    Strings(Vec<String>),
    Field {
        holder: String,
        name: String,
        type_name: String,
    },
    Subgraph(GraphSpec),
}

impl Prop {
    pub fn str(s: impl Into<String>) -> Self {
        Prop::Str(s.into())
    }
}

#[derive(Clone, Debug)]
pub enum PortValue {
    Single(i32),
    List(Vec<i32>),
}

#[derive(Clone, Debug, Default)]
pub struct NodeClassSpec {
    pub name: String,
    pub template: String,
    pub inputs: Vec<(bool, String)>,
    pub successors: Vec<(bool, String)>,
}

impl NodeClassSpec {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub id: i32,
    pub class: NodeClassSpec,
    pub preds: u8,
    pub props: Vec<(String, Prop)>,
    pub inputs: Vec<PortValue>,
    pub successors: Vec<PortValue>,
}

impl NodeSpec {
    pub fn new(id: i32, class: NodeClassSpec) -> Self {
        Self {
            id,
            class,
            preds: 0,
            props: Vec::new(),
            inputs: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: Prop) -> Self {
        self.props.push((key.into(), value));
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlockSpec {
    pub id: i32,
    pub nodes: Vec<i32>,
    pub successors: Vec<i32>,
}

#[derive(Clone, Debug, Default)]
pub struct GraphSpec {
    pub props: Vec<(String, Prop)>,
    pub nodes: Vec<NodeSpec>,
    pub blocks: Vec<BlockSpec>,
}

impl GraphSpec {
    /// `n` 个无边节点
    pub fn with_nodes(n: i32, class: &str) -> Self {
        Self {
            props: Vec::new(),
            nodes: (0..n)
                .map(|id| NodeSpec::new(id, NodeClassSpec::simple(class)))
                .collect(),
            blocks: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum PoolKey {
    String(String),
    Klass(String),
    EnumKlass(String),
    Enum(String, i32),
    NodeClass(String),
    Method(String, String),
    Field(String, String),
    Signature(Vec<String>, String),
}

const INPUT_TYPE: &str = "InputType";
const INPUT_TYPE_VALUES: [&str; 2] = ["Value", "State"];

/// dump 编码器
///
/// 常量池容量有限：写满后按轮转复用下标，从而在流中产生覆盖记录。
pub struct DumpWriter {
    out: Vec<u8>,
    index_of: HashMap<PoolKey, u16>,
    slots: Vec<Option<PoolKey>>,
    capacity: usize,
    next: usize,
}

impl Default for DumpWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpWriter {
    pub fn new() -> Self {
        Self::with_pool_capacity(u16::MAX as usize)
    }

    pub fn with_pool_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::new(),
            index_of: HashMap::new(),
            slots: Vec::new(),
            capacity: capacity.clamp(1, u16::MAX as usize),
            next: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.out.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn header(&mut self) -> &mut Self {
        self.out.extend_from_slice(&MAGIC);
        self.u8(MAJOR_VERSION);
        self.u8(MINOR_VERSION);
        self
    }

    /// 原样追加字节（构造损坏数据用）
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.out.extend_from_slice(bytes);
        self
    }

    /// 返回组记录 tag 所在偏移
    pub fn begin_group(
        &mut self,
        name: &str,
        short_name: &str,
        method: Option<(&str, &str)>,
        props: &[(&str, Prop)],
    ) -> u64 {
        let at = self.position();
        self.u8(BEGIN_GROUP);
        self.pool_string(name);
        self.pool_string(short_name);
        match method {
            Some((holder, name)) => self.pool_method(holder, name),
            None => self.u8(POOL_NULL),
        }
        self.i32(0);
        self.u16(props.len() as u16);
        for (k, v) in props {
            self.property(k, v);
        }
        at
    }

    /// 返回关闭后（组结束）的偏移
    pub fn close_group(&mut self) -> u64 {
        self.u8(CLOSE_GROUP);
        self.position()
    }

    pub fn graph(&mut self, title: &str, spec: &GraphSpec) -> u64 {
        let at = self.position();
        self.u8(BEGIN_GRAPH);
        self.pool_string(title);
        self.graph_body(spec);
        at
    }

    fn graph_body(&mut self, spec: &GraphSpec) {
        self.u16(spec.props.len() as u16);
        for (k, v) in &spec.props {
            self.property(k, v);
        }
        self.i32(spec.nodes.len() as i32);
        for node in &spec.nodes {
            self.node(node);
        }
        self.i32(spec.blocks.len() as i32);
        for block in &spec.blocks {
            self.i32(block.id);
            self.i32(block.nodes.len() as i32);
            for n in &block.nodes {
                self.i32(*n);
            }
            self.i32(block.successors.len() as i32);
            for s in &block.successors {
                self.i32(*s);
            }
        }
    }

    fn node(&mut self, node: &NodeSpec) {
        self.i32(node.id);
        self.pool_node_class(&node.class);
        self.u8(node.preds);
        self.u16(node.props.len() as u16);
        for (k, v) in &node.props {
            self.property(k, v);
        }
        for (i, (is_list, _)) in node.class.inputs.iter().enumerate() {
            self.port(*is_list, node.inputs.get(i));
        }
        for (i, (is_list, _)) in node.class.successors.iter().enumerate() {
            self.port(*is_list, node.successors.get(i));
        }
    }

    fn port(&mut self, is_list: bool, value: Option<&PortValue>) {
        if is_list {
            let ids: Vec<i32> = match value {
                Some(PortValue::List(ids)) => ids.clone(),
                Some(PortValue::Single(id)) => vec![*id],
                None => Vec::new(),
            };
            self.u16(ids.len() as u16);
            for id in ids {
                self.i32(id);
            }
        } else {
            let id = match value {
                Some(PortValue::Single(id)) => *id,
                Some(PortValue::List(ids)) => ids.first().copied().unwrap_or(-1),
                None => -1,
            };
            self.i32(id);
        }
    }

    fn property(&mut self, key: &str, value: &Prop) {
        self.pool_string(key);
        match value {
            Prop::Int(v) => {
                self.u8(PROPERTY_INT);
                self.i32(*v);
            }
            Prop::Long(v) => {
                self.u8(PROPERTY_LONG);
                self.out.extend_from_slice(&v.to_be_bytes());
            }
            Prop::Float(v) => {
                self.u8(PROPERTY_FLOAT);
                self.out.extend_from_slice(&v.to_be_bytes());
            }
            Prop::Double(v) => {
                self.u8(PROPERTY_DOUBLE);
                self.out.extend_from_slice(&v.to_be_bytes());
            }
            Prop::Bool(true) => self.u8(PROPERTY_TRUE),
            Prop::Bool(false) => self.u8(PROPERTY_FALSE),
            Prop::Str(s) => {
                self.u8(PROPERTY_POOL);
                self.pool_string(s);
            }
            Prop::Ints(vs) => {
                self.u8(PROPERTY_ARRAY);
                self.u8(PROPERTY_INT);
                self.i32(vs.len() as i32);
                for v in vs {
                    self.i32(*v);
                }
            }
            Prop::Doubles(vs) => {
                self.u8(PROPERTY_ARRAY);
                self.u8(PROPERTY_DOUBLE);
                self.i32(vs.len() as i32);
                for v in vs {
                    self.out.extend_from_slice(&v.to_be_bytes());
                }
            }
            Prop::Strings(vs) => {
                self.u8(PROPERTY_ARRAY);
                self.u8(PROPERTY_POOL);
                self.i32(vs.len() as i32);
                for v in vs {
                    self.pool_string(v);
                }
            }
            Prop::Field {
                holder,
                name,
                type_name,
            } => {
                self.u8(PROPERTY_POOL);
                self.pooled(PoolKey::Field(holder.clone(), name.clone()), POOL_FIELD, |w| {
                    w.pool_klass(holder);
                    w.pool_string(name);
                    w.pool_string(type_name);
                    w.i32(0);
                });
            }
            Prop::Subgraph(spec) => {
                self.u8(PROPERTY_SUBGRAPH);
                self.graph_body(spec);
            }
        }
    }

    fn pool_string(&mut self, s: &str) {
        self.pooled(PoolKey::String(s.to_string()), POOL_STRING, |w| w.string(s));
    }

    fn pool_klass(&mut self, name: &str) {
        self.pooled(PoolKey::Klass(name.to_string()), POOL_CLASS, |w| {
            w.string(name);
            w.u8(KLASS);
        });
    }

    fn pool_input_type(&mut self) {
        self.pooled(PoolKey::Enum(INPUT_TYPE.to_string(), 0), POOL_ENUM, |w| {
            w.pooled(
                PoolKey::EnumKlass(INPUT_TYPE.to_string()),
                POOL_CLASS,
                |w| {
                    w.string(INPUT_TYPE);
                    w.u8(ENUM_KLASS);
                    w.i32(INPUT_TYPE_VALUES.len() as i32);
                    for v in INPUT_TYPE_VALUES {
                        w.pool_string(v);
                    }
                },
            );
            w.i32(0);
        });
    }

    fn pool_method(&mut self, holder: &str, name: &str) {
        let key = PoolKey::Method(holder.to_string(), name.to_string());
        self.pooled(key, POOL_METHOD, |w| {
            w.pool_klass(holder);
            w.pool_string(name);
            w.pooled(
                PoolKey::Signature(Vec::new(), "void".to_string()),
                POOL_SIGNATURE,
                |w| {
                    w.u16(0);
                    w.pool_string("void");
                },
            );
            w.i32(0);
            w.i32(-1);
        });
    }

    fn pool_node_class(&mut self, class: &NodeClassSpec) {
        self.pooled(PoolKey::NodeClass(class.name.clone()), POOL_NODE_CLASS, |w| {
            w.string(&class.name);
            w.string(&class.template);
            w.u16(class.inputs.len() as u16);
            for (is_list, name) in &class.inputs {
                w.u8(*is_list as u8);
                w.pool_string(name);
                w.pool_input_type();
            }
            w.u16(class.successors.len() as u16);
            for (is_list, name) in &class.successors {
                w.u8(*is_list as u8);
                w.pool_string(name);
            }
        });
    }

    /// 已在池中则写引用；否则先写好 payload（嵌套条目先入池），再分配下标
    fn pooled(&mut self, key: PoolKey, tag: u8, payload: impl FnOnce(&mut Self)) {
        if let Some(&index) = self.index_of.get(&key) {
            self.u8(tag);
            self.u16(index);
            return;
        }
        let saved = std::mem::take(&mut self.out);
        payload(self);
        let body = std::mem::replace(&mut self.out, saved);
        let index = self.allocate(key);
        self.u8(POOL_NEW);
        self.u16(index);
        self.u8(tag);
        self.out.extend_from_slice(&body);
    }

    fn allocate(&mut self, key: PoolKey) -> u16 {
        let index = if self.slots.len() < self.capacity {
            self.slots.push(None);
            self.slots.len() - 1
        } else {
            let index = self.next;
            self.next = (self.next + 1) % self.capacity;
            index
        };
        if let Some(old) = self.slots[index].take() {
            self.index_of.remove(&old);
        }
        self.slots[index] = Some(key.clone());
        self.index_of.insert(key, index as u16);
        index as u16
    }

    fn string(&mut self, s: &str) {
        self.i32(s.len() as i32);
        self.out.extend_from_slice(s.as_bytes());
    }

    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }
}
