//! 空群组的延迟清理计时器

use std::collections::HashMap;
use std::time::Duration;

use domain::GroupId;
use tokio::time::Instant;

/// 群组 -> 删除截止时间。只有处于待删除状态的群组才会出现在这里。
#[derive(Debug, Default)]
pub(crate) struct CleanupScheduler {
    deadlines: HashMap<GroupId, Instant>,
}

impl CleanupScheduler {
    /// 安排（或重新安排）清理，返回截止时间
    pub fn schedule(&mut self, group_id: GroupId, now: Instant, grace: Duration) -> Instant {
        let deadline = now + grace;
        self.deadlines.insert(group_id, deadline);
        deadline
    }

    pub fn cancel(&mut self, group_id: GroupId) -> bool {
        self.deadlines.remove(&group_id).is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// 取出所有截止时间不晚于 `now` 的群组
    pub fn take_due(&mut self, now: Instant) -> Vec<GroupId> {
        let due: Vec<GroupId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(group_id, _)| *group_id)
            .collect();
        for group_id in &due {
            self.deadlines.remove(group_id);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }
}
