use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::graph::{InputGraph, Properties};
use crate::event::ChangedEvent;
use crate::lazy::LazySupport;
use crate::pool::Method;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// 文件夹里的一项
#[derive(Clone, Debug)]
pub enum FolderElement {
    Group(Arc<Group>),
    Graph(Arc<InputGraph>),
}

impl FolderElement {
    pub fn name(&self) -> String {
        match self {
            FolderElement::Group(g) => g.name(),
            FolderElement::Graph(g) => g.title.clone(),
        }
    }

    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            FolderElement::Group(g) => Some(g),
            FolderElement::Graph(_) => None,
        }
    }

    pub fn as_graph(&self) -> Option<&Arc<InputGraph>> {
        match self {
            FolderElement::Graph(g) => Some(g),
            FolderElement::Group(_) => None,
        }
    }
}

/// 分组：属性 + 子元素；懒加载分组额外带完成状态
pub struct Group {
    id: u64,
    pub(crate) properties: RwLock<Properties>,
    pub(crate) method: RwLock<Option<Arc<Method>>>,
    pub(crate) elements: RwLock<Vec<FolderElement>>,
    pub(crate) lazy: Option<LazySupport>,
    changed: ChangedEvent,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("lazy", &self.lazy.is_some())
            .finish()
    }
}

impl Group {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_lazy(None))
    }

    pub(crate) fn with_lazy(lazy: Option<LazySupport>) -> Self {
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            properties: RwLock::new(Properties::new()),
            method: RwLock::new(None),
            elements: RwLock::new(Vec::new()),
            lazy,
            changed: ChangedEvent::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> String {
        self.property("name").unwrap_or_default()
    }

    pub fn short_name(&self) -> String {
        self.property("shortName").unwrap_or_default()
    }

    /// 分组类型（"type" 属性，缺省为空串）
    pub fn kind(&self) -> String {
        self.property("type").unwrap_or_default()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).map(str::to_string)
    }

    pub fn properties(&self) -> Properties {
        self.properties.read().clone()
    }

    pub fn method(&self) -> Option<Arc<Method>> {
        self.method.read().clone()
    }

    pub(crate) fn set_property(&self, key: &str, value: impl Into<String>) {
        self.properties.write().set(key, value);
    }

    pub(crate) fn set_method(&self, method: Arc<Method>) {
        *self.method.write() = Some(method);
    }

    /// 当前已有的子元素（不触发加载）
    pub fn elements(&self) -> Vec<FolderElement> {
        self.elements.read().clone()
    }

    pub fn graphs(&self) -> Vec<Arc<InputGraph>> {
        self.elements
            .read()
            .iter()
            .filter_map(|e| e.as_graph().cloned())
            .collect()
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy.is_some()
    }

    pub(crate) fn add_element(&self, element: FolderElement) {
        self.elements.write().push(element);
        self.changed.fire();
    }

    pub fn changed(&self) -> &ChangedEvent {
        &self.changed
    }
}

/// 文档根：顶层分组与图
#[derive(Default)]
pub struct Document {
    elements: RwLock<Vec<FolderElement>>,
    changed: ChangedEvent,
}

impl Document {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn elements(&self) -> Vec<FolderElement> {
        self.elements.read().clone()
    }

    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.elements
            .read()
            .iter()
            .filter_map(|e| e.as_group().cloned())
            .collect()
    }

    pub fn find_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups().into_iter().find(|g| g.name() == name)
    }

    pub(crate) fn add_element(&self, element: FolderElement) {
        self.elements.write().push(element);
        self.changed.fire();
    }

    pub fn changed(&self) -> &ChangedEvent {
        &self.changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_defaults_and_changed() {
        let g = Group::new();
        assert_eq!(g.name(), "");
        assert_eq!(g.kind(), "");
        assert!(!g.is_lazy());
        g.set_property("name", "A");
        g.add_element(FolderElement::Graph(Arc::new(InputGraph::new("g0"))));
        assert_eq!(g.name(), "A");
        assert_eq!(g.graphs().len(), 1);
        assert_eq!(g.changed().fire_count(), 1);
    }

    #[test]
    fn document_lookup() {
        let doc = Document::new();
        let g = Group::new();
        g.set_property("name", "B");
        doc.add_element(FolderElement::Group(g.clone()));
        assert!(Arc::ptr_eq(&doc.find_group("B").unwrap(), &g));
        assert!(doc.find_group("C").is_none());
        assert_eq!(doc.changed().fire_count(), 1);
    }
}
