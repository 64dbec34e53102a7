//! Fence 与命令队列

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};
use windows::core::{Interface, PCSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Performance::QueryPerformanceFrequency;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{CalibrationTimestamp, CommandListType, RhiCommandList, RhiCommandQueue, RhiFence};

use super::command_list::Dx12CommandList;
use super::{conversion, hr_error, Dx12Backend};

/// 自动复位的 Win32 事件
struct FenceEvent(HANDLE);

unsafe impl Send for FenceEvent {}
unsafe impl Sync for FenceEvent {}

impl FenceEvent {
    fn new() -> Result<Self> {
        let handle = unsafe { CreateEventA(None, false, false, PCSTR::null()) }
            .map_err(hr_error(GraphicsError::Synchronization, "CreateEventA"))?;
        Ok(Self(handle))
    }
}

impl Drop for FenceEvent {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            let _ = unsafe { CloseHandle(self.0) };
        }
    }
}

/// 原生 fence + 等待用的事件
pub(crate) struct NativeFence {
    pub(crate) fence: ID3D12Fence,
    /// 同一个事件不能被两个等待者同时使用
    event: Mutex<FenceEvent>,
}

impl NativeFence {
    pub(crate) fn new(device: &ID3D12Device, initial_value: u64) -> Result<Self> {
        let fence: ID3D12Fence = unsafe { device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(hr_error(GraphicsError::Synchronization, "CreateFence"))?;
        Ok(Self {
            fence,
            event: Mutex::new(FenceEvent::new()?),
        })
    }

    pub(crate) fn completed(&self) -> Result<u64> {
        let value = unsafe { self.fence.GetCompletedValue() };
        // 设备移除后 GetCompletedValue 返回 UINT64_MAX
        if value == u64::MAX {
            return Err(GraphicsError::DeviceLost("fence reports device removal".to_string()).into());
        }
        Ok(value)
    }

    pub(crate) fn wait(&self, value: u64) -> Result<()> {
        if self.completed()? >= value {
            return Ok(());
        }
        let event = self.event.lock();
        unsafe { self.fence.SetEventOnCompletion(value, event.0) }
            .map_err(hr_error(GraphicsError::Synchronization, "SetEventOnCompletion"))?;
        let result = unsafe { WaitForSingleObject(event.0, INFINITE) };
        if result != WAIT_OBJECT_0 {
            return Err(GraphicsError::Synchronization(format!(
                "WaitForSingleObject returned {:?} while waiting for {}",
                result, value
            ))
            .into());
        }
        Ok(())
    }
}

/// 基于 `ID3D12Fence` 的 fence
pub struct Dx12Fence {
    inner: NativeFence,
}

unsafe impl Send for Dx12Fence {}
unsafe impl Sync for Dx12Fence {}

impl Dx12Fence {
    pub(crate) fn new(device: &ID3D12Device, initial_value: u64) -> Result<Self> {
        Ok(Self {
            inner: NativeFence::new(device, initial_value)?,
        })
    }

    pub fn raw(&self) -> &ID3D12Fence {
        &self.inner.fence
    }
}

impl RhiFence for Dx12Fence {
    fn signal(&self, value: u64) -> Result<()> {
        if value <= self.inner.completed()? {
            debug!(value, "Ignoring fence signal that does not advance the counter");
            return Ok(());
        }
        unsafe { self.inner.fence.Signal(value) }
            .map_err(hr_error(GraphicsError::Synchronization, "ID3D12Fence::Signal"))
    }

    fn wait(&self, value: u64) -> Result<()> {
        self.inner.wait(value)
    }

    fn completed_value(&self) -> u64 {
        self.inner.completed().unwrap_or(0)
    }
}

/// 队列自身的提交计数，命令分配器据此判断能否复用
pub(crate) struct SubmissionTimeline {
    inner: NativeFence,
    next: AtomicU64,
}

unsafe impl Send for SubmissionTimeline {}
unsafe impl Sync for SubmissionTimeline {}

impl SubmissionTimeline {
    fn new(device: &ID3D12Device) -> Result<Self> {
        Ok(Self {
            inner: NativeFence::new(device, 0)?,
            next: AtomicU64::new(0),
        })
    }

    fn advance(&self) -> u64 {
        self.next.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 阻塞直到第 `value` 次提交完成
    pub(crate) fn wait(&self, value: u64) -> Result<()> {
        self.inner.wait(value)
    }

    fn last_submitted(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// 等待迄今为止的所有提交
    pub(crate) fn drain(&self) -> Result<()> {
        self.wait(self.last_submitted())
    }
}

impl Drop for SubmissionTimeline {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            error!("Failed to drain queue submissions: {}", e);
        }
    }
}

/// D3D12 命令队列
pub struct Dx12CommandQueue {
    queue_type: CommandListType,
    queue: ID3D12CommandQueue,
    timeline: Arc<SubmissionTimeline>,
}

unsafe impl Send for Dx12CommandQueue {}
unsafe impl Sync for Dx12CommandQueue {}

impl Dx12CommandQueue {
    pub(crate) fn new(device: &ID3D12Device, queue_type: CommandListType) -> Result<Self> {
        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: conversion::command_list_type(queue_type),
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            })
        }
        .map_err(hr_error(GraphicsError::DeviceCreation, "CreateCommandQueue"))?;
        if let Ok(object) = queue.cast::<ID3D12Object>() {
            super::set_debug_name(&object, &format!("{}Queue", queue_type.name()));
        }
        debug!(queue_type = queue_type.name(), "D3D12 command queue created");
        Ok(Self {
            queue_type,
            queue,
            timeline: Arc::new(SubmissionTimeline::new(device)?),
        })
    }

    pub fn raw(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    pub(crate) fn timeline(&self) -> &Arc<SubmissionTimeline> {
        &self.timeline
    }
}

impl RhiCommandQueue<Dx12Backend> for Dx12CommandQueue {
    fn queue_type(&self) -> CommandListType {
        self.queue_type
    }

    fn execute(&self, lists: &[&Dx12CommandList]) -> Result<()> {
        let mut native = Vec::with_capacity(lists.len());
        for list in lists {
            if list.is_recording() {
                return Err(GraphicsError::InvalidState(format!(
                    "{} list submitted while still recording",
                    list.list_type().name()
                ))
                .into());
            }
            if let Some(raw) = list.submittable() {
                let raw = raw
                    .cast::<ID3D12CommandList>()
                    .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12CommandList cast"))?;
                native.push(Some(raw));
            }
        }

        if !native.is_empty() {
            unsafe { self.queue.ExecuteCommandLists(&native) };
        }
        let submission = self.timeline.advance();
        unsafe { self.queue.Signal(&self.timeline.inner.fence, submission) }
            .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12CommandQueue::Signal"))?;
        trace!(
            queue_type = self.queue_type.name(),
            command_lists = native.len(),
            submission,
            "Submitted"
        );
        for list in lists {
            list.mark_submitted(&self.timeline, submission);
        }
        Ok(())
    }

    fn signal(&self, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe { self.queue.Signal(fence.raw(), value) }
            .map_err(hr_error(GraphicsError::Synchronization, "ID3D12CommandQueue::Signal"))
    }

    fn wait(&self, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe { self.queue.Wait(fence.raw(), value) }
            .map_err(hr_error(GraphicsError::Synchronization, "ID3D12CommandQueue::Wait"))
    }

    fn calibration_timestamp(&self) -> Result<CalibrationTimestamp> {
        let mut gpu_ticks = 0u64;
        let mut cpu_ticks = 0u64;
        let mut cpu_frequency = 0i64;
        unsafe {
            self.queue
                .GetClockCalibration(&mut gpu_ticks, &mut cpu_ticks)
                .map_err(hr_error(GraphicsError::CommandExecution, "GetClockCalibration"))?;
            QueryPerformanceFrequency(&mut cpu_frequency)
                .map_err(hr_error(GraphicsError::CommandExecution, "QueryPerformanceFrequency"))?;
        }
        let gpu_frequency = unsafe { self.queue.GetTimestampFrequency() }
            .map_err(hr_error(GraphicsError::CommandExecution, "GetTimestampFrequency"))?;
        Ok(CalibrationTimestamp {
            gpu_ticks,
            gpu_frequency,
            cpu_ticks,
            cpu_frequency: cpu_frequency as u64,
        })
    }
}
