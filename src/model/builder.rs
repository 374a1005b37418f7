use std::sync::Arc;

use parking_lot::Mutex;

use super::graph::{InputBlock, InputEdge, InputGraph, InputNode};
use super::group::{Document, FolderElement, Group};
use crate::error::Result;
use crate::event::NotifyContext;
use crate::pool::NodeClass;
use crate::stream::{Builder, Event, ReadContext};

struct GraphDraft {
    graph: InputGraph,
    /// 作为节点属性的子图：属性名
    nested_key: Option<String>,
}

struct NodeDraft {
    node: InputNode,
    class: Option<Arc<NodeClass>>,
    edges: Vec<InputEdge>,
    pending_subgraph: Option<String>,
}

enum Frame {
    Group(Arc<Group>),
    Graph(GraphDraft),
    Node(NodeDraft),
    Block(InputBlock),
}

/// 目标分组收集模式：属于目标分组的子元素不挂进模型，而是收集起来一次性交付
struct Sink {
    target: Arc<Group>,
    items: Vec<FolderElement>,
    partial: Option<Arc<Mutex<Vec<FolderElement>>>>,
}

/// 立即构建完整模型的 builder
pub struct ModelBuilder {
    document: Arc<Document>,
    notify: NotifyContext,
    stack: Vec<Frame>,
    sink: Option<Sink>,
    graphs: usize,
}

impl ModelBuilder {
    pub fn new(document: Arc<Document>, notify: NotifyContext) -> Self {
        Self {
            document,
            notify,
            stack: Vec::new(),
            sink: None,
            graphs: 0,
        }
    }

    /// 收集 `target` 的子元素；`partial` 实时镜像已完成的子元素
    pub fn for_group(
        target: Arc<Group>,
        notify: NotifyContext,
        partial: Option<Arc<Mutex<Vec<FolderElement>>>>,
    ) -> Self {
        let mut b = Self::new(Document::new(), notify);
        b.sink = Some(Sink {
            target,
            items: Vec::new(),
            partial,
        });
        b
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// 已完成的图数量（含子图）
    pub fn graph_count(&self) -> usize {
        self.graphs
    }

    /// 把已存在的分组压栈，后续事件写入该分组
    pub fn push_group(&mut self, group: Arc<Group>) {
        self.stack.push(Frame::Group(group));
    }

    /// 把收集目标压栈
    pub fn enter_target(&mut self) -> bool {
        match &self.sink {
            Some(sink) => {
                self.stack.push(Frame::Group(sink.target.clone()));
                true
            }
            None => false,
        }
    }

    pub fn pop_group(&mut self) -> Option<Arc<Group>> {
        match self.stack.pop() {
            Some(Frame::Group(g)) => Some(g),
            Some(other) => {
                self.stack.push(other);
                None
            }
            None => None,
        }
    }

    pub fn current_group(&self) -> Option<&Arc<Group>> {
        match self.stack.last() {
            Some(Frame::Group(g)) => Some(g),
            _ => None,
        }
    }

    /// 栈顶是收集目标
    pub fn at_target(&self) -> bool {
        match (&self.sink, self.current_group()) {
            (Some(sink), Some(g)) => Arc::ptr_eq(&sink.target, g),
            _ => false,
        }
    }

    pub fn into_items(self) -> Vec<FolderElement> {
        self.sink.map(|s| s.items).unwrap_or_default()
    }

    fn register(&mut self, item: FolderElement) {
        match self.stack.last() {
            Some(Frame::Group(parent)) => {
                if let Some(sink) = self.sink.as_mut() {
                    if Arc::ptr_eq(&sink.target, parent) {
                        if let Some(partial) = &sink.partial {
                            partial.lock().push(item.clone());
                        }
                        sink.items.push(item);
                        return;
                    }
                }
                let parent = parent.clone();
                self.notify.execute(move || parent.add_element(item));
            }
            None => {
                let doc = self.document.clone();
                self.notify.execute(move || doc.add_element(item));
            }
            Some(_) => tracing::debug!("Dropping {} outside of a folder", item.name()),
        }
    }

    fn finish_graph(&mut self, draft: GraphDraft) {
        self.graphs += 1;
        let graph = Arc::new(draft.graph);
        match draft.nested_key {
            Some(key) => {
                if let Some(Frame::Node(node)) = self.stack.last_mut() {
                    node.node.subgraphs.push((key, graph));
                }
            }
            None => self.register(FolderElement::Graph(graph)),
        }
    }

    fn finish_node(&mut self, draft: NodeDraft) {
        let NodeDraft {
            mut node,
            class,
            edges,
            ..
        } = draft;
        if let Some(class) = class {
            let name = class.format_name(|k| node.properties.get(k));
            node.properties.set("name", name);
        }
        if let Some(Frame::Graph(g)) = self.stack.last_mut() {
            g.graph.nodes.push(node);
            g.graph.edges.extend(edges);
        }
    }
}

impl Builder for ModelBuilder {
    fn handle(&mut self, event: Event, _cx: &mut ReadContext<'_>) -> Result<()> {
        match event {
            Event::Start | Event::ResetStream => {}
            Event::End => {
                tracing::trace!("Model builder finished, {} graphs", self.graphs);
            }

            Event::StartGroup => self.stack.push(Frame::Group(Group::new())),
            Event::GroupName { name, short_name } => {
                if let Some(g) = self.current_group() {
                    g.set_property("name", &*name);
                    if !short_name.is_empty() {
                        g.set_property("shortName", &*short_name);
                    }
                }
            }
            Event::GroupMethod { method, bci } => {
                if let Some(g) = self.current_group() {
                    g.set_property("bci", bci.to_string());
                    g.set_method(method);
                }
            }
            Event::StartGroupContent => {
                if let Some(Frame::Group(g)) = self.stack.pop() {
                    self.register(FolderElement::Group(g.clone()));
                    self.stack.push(Frame::Group(g));
                }
            }
            Event::EndGroup => {
                self.pop_group();
            }

            Event::StartNestedProperty { key } => {
                if let Some(Frame::Node(n)) = self.stack.last_mut() {
                    n.pending_subgraph = Some(key.to_string());
                }
            }
            Event::StartGraph { title } => {
                let nested_key = match self.stack.last_mut() {
                    Some(Frame::Node(n)) => n.pending_subgraph.take(),
                    _ => None,
                };
                self.stack.push(Frame::Graph(GraphDraft {
                    graph: InputGraph::new(&*title),
                    nested_key,
                }));
            }
            Event::MarkDuplicate => {
                if let Some(Frame::Graph(g)) = self.stack.last_mut() {
                    g.graph.properties.set("_isDuplicate", "true");
                }
            }
            Event::EndGraph => {
                if let Some(Frame::Graph(draft)) = self.stack.pop() {
                    self.finish_graph(draft);
                }
            }
            Event::Property { key, value } => match self.stack.last_mut() {
                Some(Frame::Group(g)) => g.set_property(&key, value.render()),
                Some(Frame::Graph(g)) => g.graph.properties.set(&key, value.render()),
                Some(Frame::Node(n)) => n.node.properties.set(&key, value.render()),
                Some(Frame::Block(_)) | None => {}
            },

            Event::StartNode {
                id,
                has_predecessors,
            } => {
                let mut node = InputNode::new(id);
                if has_predecessors {
                    node.properties.set("hasPredecessor", "true");
                }
                self.stack.push(Frame::Node(NodeDraft {
                    node,
                    class: None,
                    edges: Vec::new(),
                    pending_subgraph: None,
                }));
            }
            Event::NodeClass(class) => {
                if let Some(Frame::Node(n)) = self.stack.last_mut() {
                    n.node.properties.set("class", &*class.class_name);
                    n.class = Some(class);
                }
            }
            Event::Edge(e) => {
                if let Some(Frame::Node(n)) = self.stack.last_mut() {
                    n.edges.push(InputEdge {
                        kind: e.kind,
                        from: e.from,
                        to: e.to,
                        num: e.num,
                        index: e.index,
                        label: e.label.to_string(),
                        edge_type: e.edge_type.map(|t| t.to_string()),
                    });
                }
            }
            Event::EndNode { .. } => {
                if let Some(Frame::Node(draft)) = self.stack.pop() {
                    self.finish_node(draft);
                }
            }

            Event::StartBlock { id } => self.stack.push(Frame::Block(InputBlock {
                id,
                ..Default::default()
            })),
            Event::BlockNode { node } => {
                if let Some(Frame::Block(b)) = self.stack.last_mut() {
                    b.nodes.push(node);
                }
            }
            Event::BlockEdge { to, .. } => {
                if let Some(Frame::Block(b)) = self.stack.last_mut() {
                    b.successors.push(to);
                }
            }
            Event::EndBlock { .. } => {
                if let Some(Frame::Block(block)) = self.stack.pop() {
                    if let Some(Frame::Graph(g)) = self.stack.last_mut() {
                        g.graph.blocks.push(block);
                    }
                }
            }
        }
        Ok(())
    }
}
