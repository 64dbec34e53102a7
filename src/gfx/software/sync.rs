//! 软件后端的 Fence 与命令队列
//!
//! 每个队列是一个工作线程（GPU 时间线），按顺序消费 `Execute / Signal / Wait`。
//! 队列上的 `wait` 只阻塞该工作线程，不阻塞提交方。

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace};

use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::rhi::{CalibrationTimestamp, CommandListType, RhiCommandList, RhiCommandQueue, RhiFence};

use super::command_list::{RecordedCommands, SoftwareCommandList};
use super::device::DeviceShared;
use super::SoftwareBackend;

/// Fence 的共享状态
pub(crate) struct FenceShared {
    value: Mutex<u64>,
    completed: AtomicU64,
    cond: Condvar,
}

impl FenceShared {
    fn new(initial: u64) -> Self {
        Self {
            value: Mutex::new(initial),
            completed: AtomicU64::new(initial),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        if value < *current {
            debug!(current = *current, requested = value, "Ignoring non-monotonic fence signal");
            return;
        }
        *current = value;
        self.completed.store(value, Ordering::Release);
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self, value: u64) {
        let mut current = self.value.lock();
        while *current < value {
            self.cond.wait(&mut current);
        }
    }

    fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

/// 软件 Fence
pub struct SoftwareFence {
    shared: Arc<FenceShared>,
}

impl SoftwareFence {
    pub(crate) fn new(initial: u64) -> Self {
        Self {
            shared: Arc::new(FenceShared::new(initial)),
        }
    }
}

impl RhiFence for SoftwareFence {
    fn signal(&self, value: u64) -> Result<()> {
        self.shared.signal(value);
        Ok(())
    }

    fn wait(&self, value: u64) -> Result<()> {
        self.shared.wait(value);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.shared.completed()
    }
}

enum QueueOp {
    Execute(Vec<Arc<RecordedCommands>>),
    Signal(Arc<FenceShared>, u64),
    Wait(Arc<FenceShared>, u64),
}

pub(crate) struct QueueShared {
    queue_type: CommandListType,
    sender: Option<Sender<QueueOp>>,
    worker: Option<JoinHandle<()>>,
    device: Arc<DeviceShared>,
    idle_fence: Arc<FenceShared>,
    idle_counter: AtomicU64,
}

impl QueueShared {
    fn send(&self, op: QueueOp) -> Result<()> {
        let sender = self.sender.as_ref().ok_or_else(|| self.disconnected())?;
        sender.send(op).map_err(|_| self.disconnected())
    }

    fn disconnected(&self) -> DistRhiError {
        GraphicsError::DeviceLost(format!("{} queue worker has stopped", self.queue_type.name())).into()
    }

    /// 阻塞直到此前提交的所有工作完成
    pub(crate) fn drain(&self) -> Result<()> {
        let value = self.idle_counter.fetch_add(1, Ordering::AcqRel) + 1;
        self.send(QueueOp::Signal(Arc::clone(&self.idle_fence), value))?;
        self.idle_fence.wait(value);
        Ok(())
    }
}

impl Drop for QueueShared {
    fn drop(&mut self) {
        // 关闭通道后工作线程处理完剩余操作即退出
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(queue = self.queue_type.name(), "Queue worker panicked");
            }
        }
    }
}

/// 软件命令队列
#[derive(Clone)]
pub struct SoftwareCommandQueue {
    shared: Arc<QueueShared>,
}

impl SoftwareCommandQueue {
    pub(crate) fn new(queue_type: CommandListType, device: Arc<DeviceShared>) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let worker_device = Arc::clone(&device);
        let worker = std::thread::Builder::new()
            .name(format!("software-{}-queue", queue_type.name().to_lowercase()))
            .spawn(move || run_queue(receiver, worker_device))
            .map_err(|e| GraphicsError::DeviceCreation(format!("queue thread: {}", e)))?;

        Ok(Self {
            shared: Arc::new(QueueShared {
                queue_type,
                sender: Some(sender),
                worker: Some(worker),
                device,
                idle_fence: Arc::new(FenceShared::new(0)),
                idle_counter: AtomicU64::new(0),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<QueueShared> {
        &self.shared
    }
}

fn run_queue(receiver: Receiver<QueueOp>, device: Arc<DeviceShared>) {
    for op in receiver.iter() {
        match op {
            QueueOp::Execute(batches) => {
                if !device.submit_latency.is_zero() {
                    std::thread::sleep(device.submit_latency);
                }
                for commands in batches {
                    commands.replay(&device);
                }
            }
            QueueOp::Signal(fence, value) => fence.signal(value),
            QueueOp::Wait(fence, value) => fence.wait(value),
        }
    }
}

impl RhiCommandQueue<SoftwareBackend> for SoftwareCommandQueue {
    fn queue_type(&self) -> CommandListType {
        self.shared.queue_type
    }

    fn execute(&self, lists: &[&SoftwareCommandList]) -> Result<()> {
        let mut batches = Vec::with_capacity(lists.len());
        for list in lists {
            debug_assert_eq!(list.list_type(), self.shared.queue_type);
            let commands = list.sealed().ok_or_else(|| {
                DistRhiError::from(GraphicsError::InvalidState(format!(
                    "executing a {} list that is still recording or was never recorded",
                    list.list_type().name()
                )))
            })?;
            batches.push(commands);
        }

        self.shared.device.stats.record_submission();
        trace!(queue = self.shared.queue_type.name(), lists = batches.len(), "Execute");
        self.shared.send(QueueOp::Execute(batches))
    }

    fn signal(&self, fence: &SoftwareFence, value: u64) -> Result<()> {
        trace!(queue = self.shared.queue_type.name(), value, "Queue signal");
        self.shared.send(QueueOp::Signal(Arc::clone(&fence.shared), value))
    }

    fn wait(&self, fence: &SoftwareFence, value: u64) -> Result<()> {
        trace!(queue = self.shared.queue_type.name(), value, "Queue wait");
        self.shared.send(QueueOp::Wait(Arc::clone(&fence.shared), value))
    }

    fn calibration_timestamp(&self) -> Result<CalibrationTimestamp> {
        let ticks = self.shared.device.now_ticks();
        Ok(CalibrationTimestamp {
            gpu_ticks: ticks,
            gpu_frequency: 1_000_000_000,
            cpu_ticks: ticks,
            cpu_frequency: 1_000_000_000,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fence_is_monotonic() {
        let fence = SoftwareFence::new(0);
        fence.signal(5).unwrap();
        fence.signal(3).unwrap();
        assert_eq!(fence.completed_value(), 5);
        assert!(fence.is_completed(4));
        assert!(!fence.is_completed(6));
        // 已达到的值立即返回
        fence.wait(2).unwrap();
    }

    #[test]
    fn test_wait_never_returns_early() {
        let fence = Arc::new(SoftwareFence::new(0));
        let signaler = Arc::clone(&fence);
        let handle = std::thread::spawn(move || {
            for v in 1..=10 {
                std::thread::sleep(Duration::from_millis(1));
                signaler.signal(v).unwrap();
            }
        });

        for target in [3, 7, 10] {
            fence.wait(target).unwrap();
            assert!(fence.completed_value() >= target);
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_queue_signal_orders_after_wait() {
        let device = DeviceShared::for_tests(Duration::ZERO);
        let queue = SoftwareCommandQueue::new(CommandListType::Compute, device).unwrap();
        let gate = SoftwareFence::new(0);
        let done = SoftwareFence::new(0);

        queue.wait(&gate, 1).unwrap();
        queue.signal(&done, 1).unwrap();

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(done.completed_value(), 0);

        gate.signal(1).unwrap();
        done.wait(1).unwrap();
        assert_eq!(done.completed_value(), 1);
    }

    #[test]
    fn test_drain_waits_for_latency() {
        let device = DeviceShared::for_tests(Duration::from_millis(20));
        let queue = SoftwareCommandQueue::new(CommandListType::Copy, Arc::clone(&device)).unwrap();
        let mut list = SoftwareCommandList::new(CommandListType::Copy, device);
        list.begin_recording(false).unwrap();
        list.end_recording().unwrap();

        let start = std::time::Instant::now();
        queue.execute(&[&list]).unwrap();
        queue.shared().drain().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_execute_recording_list_is_rejected() {
        let device = DeviceShared::for_tests(Duration::ZERO);
        let queue = SoftwareCommandQueue::new(CommandListType::Graphics, Arc::clone(&device)).unwrap();
        let mut list = SoftwareCommandList::new(CommandListType::Graphics, device);
        list.begin_recording(false).unwrap();
        assert!(queue.execute(&[&list]).unwrap_err().is_invalid_state());
    }
}
