use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::event::NotifyContext;
use crate::model::{FolderElement, Group, ModelBuilder};
use crate::stream::{Builder, Event, ReadContext};

/// 重放单个分组区间的 builder
///
/// 区间内最外层分组就是已存在的目标分组：它的头部（名字、属性）在主扫描时已经登记，
/// 这里跳过；其余子元素收集起来，一次性交给补全器。
pub struct SingleGroupBuilder {
    model: ModelBuilder,
    depth: usize,
}

impl SingleGroupBuilder {
    pub fn new(
        target: Arc<Group>,
        notify: NotifyContext,
        partial: Arc<Mutex<Vec<FolderElement>>>,
    ) -> Self {
        Self {
            model: ModelBuilder::for_group(target, notify, Some(partial)),
            depth: 0,
        }
    }

    pub fn into_items(self) -> Vec<FolderElement> {
        self.model.into_items()
    }
}

impl Builder for SingleGroupBuilder {
    fn handle(&mut self, event: Event, cx: &mut ReadContext<'_>) -> Result<()> {
        match &event {
            Event::StartGroup => {
                self.depth += 1;
                if self.depth == 1 {
                    self.model.enter_target();
                    return Ok(());
                }
            }
            Event::EndGroup => {
                self.depth = self.depth.saturating_sub(1);
                if self.depth == 0 {
                    self.model.pop_group();
                    return Ok(());
                }
            }
            Event::GroupName { .. }
            | Event::GroupMethod { .. }
            | Event::StartGroupContent
            | Event::Property { .. }
                if self.depth == 1 && self.model.at_target() =>
            {
                return Ok(());
            }
            _ => {}
        }
        self.model.handle(event, cx)
    }
}
