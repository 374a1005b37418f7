use std::sync::Arc;

use crate::stream::EdgeKind;

/// 有序键值属性表（键唯一，后写覆盖）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties(Vec<(String, String)>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InputNode {
    pub id: i32,
    pub properties: Properties,
    /// 挂在节点属性下的子图
    pub subgraphs: Vec<(String, Arc<InputGraph>)>,
}

impl InputNode {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            properties: Properties::new(),
            subgraphs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.properties.get("name").unwrap_or("")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InputEdge {
    pub kind: EdgeKind,
    pub from: i32,
    pub to: i32,
    pub num: u32,
    pub index: i32,
    pub label: String,
    pub edge_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputBlock {
    pub id: i32,
    pub nodes: Vec<i32>,
    pub successors: Vec<i32>,
}

/// 一张完整的图快照
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputGraph {
    pub title: String,
    pub properties: Properties,
    pub nodes: Vec<InputNode>,
    pub edges: Vec<InputEdge>,
    pub blocks: Vec<InputBlock>,
}

impl InputGraph {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn node(&self, id: i32) -> Option<&InputNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// 与前一张图字节完全相同
    pub fn is_duplicate(&self) -> bool {
        self.properties.get("_isDuplicate") == Some("true")
    }
}
