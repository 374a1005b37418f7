use std::sync::Arc;

use super::completer::{CompletionEnv, GroupCompleter, GroupSummary};
use crate::error::Result;
use crate::model::{Document, Group, ModelBuilder};
use crate::stats::SessionStats;
use crate::stream::{Builder, Event, ReadContext};

/// 主扫描 builder
///
/// 顶层分组只登记头部（名字、属性、方法），内容跳过并记下区间；
/// 顶层之外的图照常立即构建。
pub struct ScanningBuilder {
    model: ModelBuilder,
    env: CompletionEnv,
    group_level: usize,
    graph_level: usize,
    current: Option<Arc<GroupCompleter>>,
    summary: GroupSummary,
    groups: usize,
}

impl ScanningBuilder {
    pub fn new(document: Arc<Document>, env: CompletionEnv) -> Self {
        let model = ModelBuilder::new(document, env.notify.clone());
        Self {
            model,
            env,
            group_level: 0,
            graph_level: 0,
            current: None,
            summary: GroupSummary::default(),
            groups: 0,
        }
    }

    /// 已登记的顶层分组数
    pub fn groups(&self) -> usize {
        self.groups
    }

    fn begin_top_group(&mut self, cx: &mut ReadContext<'_>) {
        // tag 字节已被消费
        let start = cx.mark.saturating_sub(1);
        cx.pool.settle();
        let completer = GroupCompleter::new(self.env.clone(), start);
        let group = Group::new_lazy(completer.clone());
        self.model.push_group(group);
        self.current = Some(completer);
        self.summary = GroupSummary::default();
        self.groups += 1;
        SessionStats::bump(&self.env.stats.groups_scanned);
        tracing::trace!("Lazy group #{} starts at {}", self.groups, start);
    }

    fn end_top_group(&mut self, cx: &mut ReadContext<'_>) {
        self.model.pop_group();
        if let Some(completer) = self.current.take() {
            let snapshot = cx.pool.fork();
            completer.set_range_end(cx.mark, snapshot, self.summary.clone());
        }
    }
}

impl Builder for ScanningBuilder {
    fn handle(&mut self, event: Event, cx: &mut ReadContext<'_>) -> Result<()> {
        match &event {
            Event::StartGroup => {
                self.group_level += 1;
                if self.group_level == 1 {
                    self.begin_top_group(cx);
                }
                return Ok(());
            }
            Event::EndGroup => {
                let level = self.group_level;
                self.group_level = level.saturating_sub(1);
                if level == 1 {
                    self.end_top_group(cx);
                }
                return Ok(());
            }
            Event::StartGraph { .. } => self.graph_level += 1,
            Event::EndGraph => {
                self.graph_level = self.graph_level.saturating_sub(1);
                if self.graph_level == 0 {
                    SessionStats::bump(&self.env.stats.graphs_scanned);
                }
                if self.group_level == 1 && self.graph_level == 0 {
                    self.summary.graphs += 1;
                    if let Some(c) = &self.current {
                        c.update_summary(&self.summary);
                    }
                }
            }
            Event::EndNode { .. } if self.group_level > 0 => self.summary.nodes += 1,
            Event::Edge(_) if self.group_level > 0 => self.summary.edges += 1,
            _ => {}
        }

        if self.group_level == 0 {
            return self.model.handle(event, cx);
        }
        let header = matches!(
            event,
            Event::GroupName { .. }
                | Event::GroupMethod { .. }
                | Event::StartGroupContent
                | Event::Property { .. }
        );
        if header && self.group_level == 1 && self.graph_level == 0 {
            return self.model.handle(event, cx);
        }
        Ok(())
    }
}
