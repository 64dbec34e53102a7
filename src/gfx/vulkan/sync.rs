//! Fence 与命令队列
//!
//! Fence 是一个 timeline semaphore。队列上的 `wait` 不会立即提交，
//! 而是挂到该队列的下一次提交（`execute` 或 `signal`）上。

use ash::vk;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{CalibrationTimestamp, CommandListType, RhiCommandList, RhiCommandQueue, RhiFence};

use super::command_list::VulkanCommandList;
use super::device::DeviceShared;
use super::{vk_error, VulkanBackend};

/// 基于 timeline semaphore 的 fence
pub struct VulkanFence {
    shared: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
}

impl VulkanFence {
    pub(crate) fn new(shared: Arc<DeviceShared>, initial_value: u64) -> Result<Self> {
        let semaphore = shared.create_timeline(initial_value)?;
        Ok(Self { shared, semaphore })
    }

    pub(crate) fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl RhiFence for VulkanFence {
    fn signal(&self, value: u64) -> Result<()> {
        // vkSignalSemaphore 要求新值严格大于当前值
        if value <= self.shared.timeline_value(self.semaphore)? {
            trace!(value, "Ignoring fence signal that does not advance the counter");
            return Ok(());
        }
        let signal_info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.semaphore)
            .value(value);
        unsafe { self.shared.device.signal_semaphore(&signal_info) }
            .map_err(vk_error(GraphicsError::Synchronization, "vkSignalSemaphore"))
    }

    fn wait(&self, value: u64) -> Result<()> {
        self.shared.wait_timeline(self.semaphore, value)
    }

    fn completed_value(&self) -> u64 {
        match self.shared.timeline_value(self.semaphore) {
            Ok(value) => value,
            Err(_) => 0,
        }
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// 队列自身的提交计数，命令池据此判断能否复用
pub(crate) struct SubmissionTimeline {
    shared: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
    next: AtomicU64,
}

impl SubmissionTimeline {
    fn new(shared: Arc<DeviceShared>) -> Result<Self> {
        let semaphore = shared.create_timeline(0)?;
        Ok(Self {
            shared,
            semaphore,
            next: AtomicU64::new(0),
        })
    }

    fn advance(&self) -> u64 {
        self.next.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 阻塞直到第 `value` 次提交完成
    pub(crate) fn wait(&self, value: u64) -> Result<()> {
        self.shared.wait_timeline(self.semaphore, value)
    }

    fn last_submitted(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

impl Drop for SubmissionTimeline {
    fn drop(&mut self) {
        if let Err(e) = self.wait(self.last_submitted()) {
            error!("Failed to drain queue submissions: {}", e);
        }
        unsafe { self.shared.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// Vulkan 命令队列
pub struct VulkanCommandQueue {
    shared: Arc<DeviceShared>,
    queue_type: CommandListType,
    queue: Arc<Mutex<vk::Queue>>,
    timeline: Arc<SubmissionTimeline>,
    /// 挂起的等待，随下一次提交一起发出
    pending_waits: Mutex<Vec<(vk::Semaphore, u64)>>,
}

impl VulkanCommandQueue {
    pub(crate) fn new(shared: Arc<DeviceShared>, queue_type: CommandListType) -> Result<Self> {
        let queue = Arc::clone(&shared.queue(queue_type).queue);
        let timeline = Arc::new(SubmissionTimeline::new(Arc::clone(&shared))?);
        debug!(
            queue_type = queue_type.name(),
            family = shared.queue(queue_type).family,
            "Vulkan command queue created"
        );
        Ok(Self {
            shared,
            queue_type,
            queue,
            timeline,
            pending_waits: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn raw_queue(&self) -> &Arc<Mutex<vk::Queue>> {
        &self.queue
    }

    /// 带挂起等待的提交，额外 signal `signals` 与队列自身的提交计数
    fn submit(&self, command_buffers: &[vk::CommandBuffer], signals: &[(vk::Semaphore, u64)]) -> Result<u64> {
        let waits: Vec<(vk::Semaphore, u64)> = std::mem::take(&mut *self.pending_waits.lock());
        let submission = self.timeline.advance();

        let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|(s, _)| *s).collect();
        let wait_values: Vec<u64> = waits.iter().map(|(_, v)| *v).collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];

        let mut signal_semaphores: Vec<vk::Semaphore> = signals.iter().map(|(s, _)| *s).collect();
        let mut signal_values: Vec<u64> = signals.iter().map(|(_, v)| *v).collect();
        signal_semaphores.push(self.timeline.semaphore);
        signal_values.push(submission);

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let queue = self.queue.lock();
        unsafe { self.shared.device.queue_submit(*queue, &[submit], vk::Fence::null()) }
            .map_err(vk_error(GraphicsError::CommandExecution, "vkQueueSubmit"))?;
        trace!(
            queue_type = self.queue_type.name(),
            command_buffers = command_buffers.len(),
            waits = waits.len(),
            submission,
            "Submitted"
        );
        Ok(submission)
    }
}

impl RhiCommandQueue<VulkanBackend> for VulkanCommandQueue {
    fn queue_type(&self) -> CommandListType {
        self.queue_type
    }

    fn execute(&self, lists: &[&VulkanCommandList]) -> Result<()> {
        let mut command_buffers = Vec::with_capacity(lists.len());
        for list in lists {
            if list.is_recording() {
                return Err(GraphicsError::InvalidState(format!(
                    "{} list submitted while still recording",
                    list.list_type().name()
                ))
                .into());
            }
            if let Some(command_buffer) = list.submittable() {
                command_buffers.push(command_buffer);
            }
        }

        let submission = self.submit(&command_buffers, &[])?;
        for list in lists {
            list.mark_submitted(&self.timeline, submission);
        }
        Ok(())
    }

    fn signal(&self, fence: &VulkanFence, value: u64) -> Result<()> {
        self.submit(&[], &[(fence.raw(), value)]).map(|_| ())
    }

    fn wait(&self, fence: &VulkanFence, value: u64) -> Result<()> {
        self.pending_waits.lock().push((fence.raw(), value));
        Ok(())
    }

    fn calibration_timestamp(&self) -> Result<CalibrationTimestamp> {
        self.shared.calibration_timestamp()
    }
}
