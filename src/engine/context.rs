//! 帧内资源上传上下文

use std::sync::Arc;

use crate::rhi::RhiBackend;

/// 帧内创建资源所需的对象
///
/// 由 [`super::LowLevelGraphicsEngine::resource_context`] 借出：设备、
/// 正在录制的图形命令列表和着色器可见描述符堆。上传用的暂存缓冲通过
/// [`ResourceContext::retire_staging`] 交给引擎，在本帧的 CPU 等待之后释放。
pub struct ResourceContext<'a, B: RhiBackend> {
    pub device: &'a B::Device,
    pub command_list: &'a mut B::CommandList,
    pub heap: &'a mut B::DescriptorHeap,
    staging: &'a mut Vec<Arc<B::Buffer>>,
}

impl<'a, B: RhiBackend> ResourceContext<'a, B> {
    pub(crate) fn new(
        device: &'a B::Device,
        command_list: &'a mut B::CommandList,
        heap: &'a mut B::DescriptorHeap,
        staging: &'a mut Vec<Arc<B::Buffer>>,
    ) -> Self {
        Self {
            device,
            command_list,
            heap,
            staging,
        }
    }

    /// 保留暂存缓冲直到 GPU 完成本帧
    pub fn retire_staging(&mut self, buffer: Arc<B::Buffer>) {
        self.staging.push(buffer);
    }

    /// 本帧等待释放的暂存缓冲数量
    pub fn pending_staging(&self) -> usize {
        self.staging.len()
    }
}
