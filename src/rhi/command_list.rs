//! 命令列表模块
//!
//! 命令列表的状态机：
//!
//! ```text
//! Closed --begin_recording--> Recording --end_recording--> Closed
//!                               │   ▲
//!              begin_render_pass│   │end_render_pass（仅 Graphics）
//!                               ▼   │
//!                           InRenderPass
//! ```
//!
//! 录制状态错配（重复 begin、在通道内 end 等）返回 [`GraphicsError::InvalidState`]；
//! 在计算 / 拷贝列表上录制图形命令属于调用约定违例，只在 debug 构建中断言。

use std::sync::Arc;
use tracing::error;

use super::resource::{ResourceRef, ResourceState, TextureCopyLocation, TransitionBarrier};
use super::types::{CommandListType, ScissorRect, Viewport};
use super::RhiBackend;
use crate::core::error::{GraphicsError, Result};

/// 命令列表录制状态跟踪
///
/// 各后端的命令列表内嵌一个，负责状态机检查。
#[derive(Debug, Clone)]
pub struct CommandListState {
    list_type: CommandListType,
    recording: bool,
    in_render_pass: bool,
    /// 本次录制中的命令数
    command_count: u32,
}

impl CommandListState {
    pub fn new(list_type: CommandListType) -> Self {
        Self {
            list_type,
            recording: false,
            in_render_pass: false,
            command_count: 0,
        }
    }

    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    pub fn command_count(&self) -> u32 {
        self.command_count
    }

    /// Closed → Recording
    pub fn begin(&mut self) -> Result<()> {
        if self.recording {
            return Err(self.invalid("begin_recording on a list that is already recording"));
        }
        self.recording = true;
        self.command_count = 0;
        Ok(())
    }

    /// Recording → Closed
    pub fn end(&mut self) -> Result<()> {
        if !self.recording {
            return Err(self.invalid("end_recording on a closed list"));
        }
        if self.in_render_pass {
            return Err(self.invalid("end_recording inside a render pass"));
        }
        self.recording = false;
        Ok(())
    }

    pub fn begin_render_pass(&mut self) {
        self.require_graphics("begin_render_pass");
        debug_assert!(!self.in_render_pass, "render pass already open");
        self.in_render_pass = true;
        self.command_count += 1;
    }

    pub fn end_render_pass(&mut self) {
        self.require_recording("end_render_pass");
        debug_assert!(self.in_render_pass, "end_render_pass without an open render pass");
        self.in_render_pass = false;
        self.command_count += 1;
    }

    /// 记录一条普通命令
    pub fn record(&mut self, op: &str) {
        self.require_recording(op);
        self.command_count += 1;
    }

    /// 仅图形列表可录制的命令
    pub fn require_graphics(&mut self, op: &str) {
        debug_assert!(
            self.list_type == CommandListType::Graphics,
            "{} is only valid on a Graphics list, got {}",
            op,
            self.list_type.name()
        );
        self.require_recording(op);
    }

    /// 需要计算能力的命令
    pub fn require_compute(&mut self, op: &str) {
        debug_assert!(
            self.list_type.supports_compute(),
            "{} is not valid on a {} list",
            op,
            self.list_type.name()
        );
        debug_assert!(!self.in_render_pass, "{} inside a render pass", op);
        self.record(op);
    }

    /// 只能在渲染通道外录制的命令（拷贝、时间戳查询重置）
    pub fn require_outside_render_pass(&mut self, op: &str) {
        debug_assert!(!self.in_render_pass, "{} inside a render pass", op);
        self.record(op);
    }

    fn require_recording(&self, op: &str) {
        debug_assert!(self.recording, "{} on a closed {} list", op, self.list_type.name());
    }

    fn invalid(&self, msg: &str) -> crate::core::error::DistRhiError {
        error!(list_type = self.list_type.name(), "{}", msg);
        GraphicsError::InvalidState(format!("{} ({} list)", msg, self.list_type.name())).into()
    }
}

/// 拷贝前资源的状态，供 `complete_copy` 恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyStates {
    pub dst_before: ResourceState,
    pub src_before: ResourceState,
}

/// 拷贝源允许的状态。上传堆资源在 D3D12 中必须保持 GenericRead。
pub fn is_copy_source_state(state: ResourceState) -> bool {
    matches!(state, ResourceState::CopySource | ResourceState::GenericRead)
}

/// 拷贝命令的前置条件检查
pub fn debug_check_copy<B: RhiBackend>(dst: ResourceRef<'_, B>, src: ResourceRef<'_, B>) {
    debug_assert_eq!(
        dst.usage_state(),
        ResourceState::CopyDest,
        "copy destination '{}' is not in CopyDest",
        dst.name()
    );
    debug_assert!(
        is_copy_source_state(src.usage_state()),
        "copy source '{}' is in {:?}",
        src.name(),
        src.usage_state()
    );
}

/// 命令列表
pub trait RhiCommandList<B: RhiBackend>: Send {
    fn list_type(&self) -> CommandListType;

    fn is_recording(&self) -> bool;

    fn is_in_render_pass(&self) -> bool;

    /// 开始录制。`continue_last_render_pass` 为真时以加载语义重新打开上一次的渲染通道。
    fn begin_recording(&mut self, continue_last_render_pass: bool) -> Result<()>;

    fn end_recording(&mut self) -> Result<()>;

    fn begin_render_pass(&mut self, render_pass: &Arc<B::RenderPass>, frame_buffer: &Arc<B::FrameBuffer>);

    fn end_render_pass(&mut self);

    fn set_viewport(&mut self, viewport: &Viewport);

    fn set_scissor(&mut self, rect: &ScissorRect);

    fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32);

    /// 录制状态转换，并立即更新被跟踪状态
    fn resource_barrier(&mut self, barriers: &[TransitionBarrier<'_, B>]);

    /// 整个资源拷贝，两端尺寸与格式必须一致
    fn copy_resource(&mut self, dst: ResourceRef<'_, B>, src: ResourceRef<'_, B>);

    fn copy_buffer_region(
        &mut self,
        dst: &Arc<B::Buffer>,
        dst_offset: u64,
        src: &Arc<B::Buffer>,
        src_offset: u64,
        size: u64,
    );

    /// 拷贝源的整个区域到目标的原点
    fn copy_texture_region(&mut self, dst: &TextureCopyLocation<'_, B>, src: &TextureCopyLocation<'_, B>);

    /// 内联写入缓冲区，目标需处于 `CopyDest`
    fn update_buffer(&mut self, dst: &Arc<B::Buffer>, offset: u64, data: &[u32]);

    fn write_timestamp(&mut self, query_heap: &Arc<B::QueryHeap>, index: u32);

    /// 把目标转到 `CopyDest`、源转到 `CopySource`，返回转换前的状态
    fn prepare_copy(&mut self, dst: ResourceRef<'_, B>, src: ResourceRef<'_, B>) -> CopyStates {
        let states = CopyStates {
            dst_before: dst.usage_state(),
            src_before: src.usage_state(),
        };

        let mut barriers = Vec::with_capacity(2);
        if states.dst_before != ResourceState::CopyDest {
            barriers.push(TransitionBarrier {
                resource: dst,
                after: ResourceState::CopyDest,
            });
        }
        if !is_copy_source_state(states.src_before) {
            barriers.push(TransitionBarrier {
                resource: src,
                after: ResourceState::CopySource,
            });
        }
        if !barriers.is_empty() {
            self.resource_barrier(&barriers);
        }
        states
    }

    /// 恢复拷贝前状态；`dst_after` 指定时目标转到该状态
    fn complete_copy(
        &mut self,
        dst: ResourceRef<'_, B>,
        src: ResourceRef<'_, B>,
        states: CopyStates,
        dst_after: Option<ResourceState>,
    ) {
        let dst_target = dst_after.unwrap_or(states.dst_before);
        let mut barriers = Vec::with_capacity(2);
        if dst.usage_state() != dst_target {
            barriers.push(TransitionBarrier {
                resource: dst,
                after: dst_target,
            });
        }
        if src.usage_state() != states.src_before {
            barriers.push(TransitionBarrier {
                resource: src,
                after: states.src_before,
            });
        }
        if !barriers.is_empty() {
            self.resource_barrier(&barriers);
        }
    }

    /// 带前后屏障的整资源拷贝
    fn copy_resource_with_barriers(
        &mut self,
        dst: ResourceRef<'_, B>,
        src: ResourceRef<'_, B>,
        dst_after: Option<ResourceState>,
    ) {
        let states = self.prepare_copy(dst, src);
        self.copy_resource(dst, src);
        self.complete_copy(dst, src, states, dst_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut state = CommandListState::new(CommandListType::Graphics);
        assert!(!state.is_recording());

        state.begin().unwrap();
        assert!(state.begin().unwrap_err().is_invalid_state());

        state.begin_render_pass();
        assert!(state.is_in_render_pass());
        assert!(state.end().unwrap_err().is_invalid_state());

        state.end_render_pass();
        state.record("draw");
        assert_eq!(state.command_count(), 3);
        state.end().unwrap();
        assert!(state.end().unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_begin_resets_command_count() {
        let mut state = CommandListState::new(CommandListType::Copy);
        state.begin().unwrap();
        state.require_outside_render_pass("copy");
        state.end().unwrap();
        state.begin().unwrap();
        assert_eq!(state.command_count(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "only valid on a Graphics list")]
    fn test_render_pass_on_compute_list_asserts() {
        let mut state = CommandListState::new(CommandListType::Compute);
        state.begin().unwrap();
        state.begin_render_pass();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not valid on a Copy list")]
    fn test_dispatch_on_copy_list_asserts() {
        let mut state = CommandListState::new(CommandListType::Copy);
        state.begin().unwrap();
        state.require_compute("dispatch");
    }

    #[test]
    fn test_copy_source_states() {
        assert!(is_copy_source_state(ResourceState::CopySource));
        assert!(is_copy_source_state(ResourceState::GenericRead));
        assert!(!is_copy_source_state(ResourceState::ShaderResource));
    }
}
