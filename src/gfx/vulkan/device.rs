//! Vulkan 实例、适配器与设备

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::render_pass::attachment_extent;
use crate::rhi::resource::check_view_resource;
use crate::rhi::{
    AdapterInfo, BufferDesc, CalibrationTimestamp, CommandListType, DescriptorLimits, Format,
    GraphicsApi, InstanceDesc, RenderPassDesc, ResourceUsage, ResourceViewDesc, ResourceViewType,
    RhiAdapter, RhiDescriptorHeap, RhiDevice, RhiInstance, RhiRenderPass, RhiTexture, SwapchainDesc, TextureDesc,
    ViewResource, WindowHandle,
};

use super::command_list::VulkanCommandList;
use super::descriptor::VulkanDescriptorHeap;
use super::render_pass::{VulkanFrameBuffer, VulkanRenderPass};
use super::resource::{VulkanBuffer, VulkanQueryHeap, VulkanResourceView, VulkanTexture};
use super::swapchain::VulkanSwapchain;
use super::sync::{VulkanCommandQueue, VulkanFence};
use super::{vk_error, VulkanBackend};

const API_VERSION: u32 = vk::API_VERSION_1_2;
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// 实例级共享状态，设备与交换链持有它以保证实例最后销毁
pub(crate) struct InstanceShared {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    /// 是否启用了 VK_EXT_swapchain_colorspace（HDR 色彩空间）
    pub(crate) hdr_color_space: bool,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan instance destroyed");
    }
}

/// 平台需要的实例扩展，按可用性过滤后启用
fn wanted_instance_extensions(debug_layer: bool) -> Vec<&'static CStr> {
    let mut names = vec![ash::khr::surface::NAME, ash::ext::swapchain_colorspace::NAME];
    #[cfg(target_os = "windows")]
    names.push(ash::khr::win32_surface::NAME);
    #[cfg(all(unix, not(target_os = "macos")))]
    names.extend([
        ash::khr::xlib_surface::NAME,
        ash::khr::xcb_surface::NAME,
        ash::khr::wayland_surface::NAME,
    ]);
    #[cfg(target_os = "macos")]
    names.extend([ash::ext::metal_surface::NAME, ash::khr::portability_enumeration::NAME]);
    if debug_layer {
        names.push(ash::ext::debug_utils::NAME);
    }
    names
}

fn extension_names(properties: &[vk::ExtensionProperties]) -> Vec<&CStr> {
    properties
        .iter()
        .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) })
        .collect()
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || unsafe { (*callback_data).p_message.is_null() } {
        String::from("(no message)")
    } else {
        unsafe { CStr::from_ptr((*callback_data).p_message) }
            .to_string_lossy()
            .into_owned()
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", kind, "{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", kind, "{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => debug!(target: "vulkan", kind, "{}", message),
        _ => trace!(target: "vulkan", kind, "{}", message),
    }
    vk::FALSE
}

/// Vulkan 实例
pub struct VulkanInstance {
    shared: Arc<InstanceShared>,
}

impl RhiInstance<VulkanBackend> for VulkanInstance {
    fn create(desc: &InstanceDesc) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GraphicsError::DeviceCreation(format!("failed to load the Vulkan loader: {}", e)))?;

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(vk_error(GraphicsError::DeviceCreation, "vkEnumerateInstanceExtensionProperties"))?;
        let available = extension_names(&available);
        let extensions: Vec<&CStr> = wanted_instance_extensions(desc.debug_layer)
            .into_iter()
            .filter(|name| {
                let found = available.contains(name);
                if !found {
                    debug!(extension = ?name, "Instance extension not available");
                }
                found
            })
            .collect();
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|n| n.as_ptr()).collect();

        let mut layers: Vec<*const c_char> = Vec::new();
        if desc.debug_layer {
            let layer_props = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(vk_error(GraphicsError::DeviceCreation, "vkEnumerateInstanceLayerProperties"))?;
            let has_validation = layer_props
                .iter()
                .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
            if has_validation {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                warn!("Validation layer requested but VK_LAYER_KHRONOS_validation is not installed");
            }
        }

        let app_name = CString::new(desc.application_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"DistRHI")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extension_ptrs);
        if extensions.contains(&ash::khr::portability_enumeration::NAME) {
            create_info = create_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(vk_error(GraphicsError::DeviceCreation, "vkCreateInstance"))?;

        let debug_utils = if extensions.contains(&ash::ext::debug_utils::NAME) {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    warn!("Failed to create debug messenger: {:?}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        info!(
            extensions = extensions.len(),
            validation = !layers.is_empty(),
            "Vulkan instance created"
        );

        Ok(Self {
            shared: Arc::new(InstanceShared {
                entry,
                instance,
                surface_loader,
                hdr_color_space: extensions.contains(&ash::ext::swapchain_colorspace::NAME),
                debug_utils,
            }),
        })
    }

    fn search_high_performance_adapter(&self) -> Result<VulkanAdapter> {
        let instance = &self.shared.instance;
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(vk_error(GraphicsError::DeviceCreation, "vkEnumeratePhysicalDevices"))?;

        let mut best: Option<((u32, u64), VulkanAdapter)> = None;
        for physical_device in physical_devices {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            if properties.api_version < API_VERSION {
                debug!(adapter = %name, "Skipping adapter without Vulkan 1.2");
                continue;
            }

            let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
            let dedicated_video_memory: u64 = memory.memory_heaps[..memory.memory_heap_count as usize]
                .iter()
                .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                .map(|heap| heap.size)
                .sum();

            let rank = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            };
            debug!(adapter = %name, rank, memory_mb = dedicated_video_memory / (1024 * 1024), "Found adapter");

            let key = (rank, dedicated_video_memory);
            if best.as_ref().map_or(true, |(best_key, _)| key > *best_key) {
                let adapter = VulkanAdapter {
                    instance: Arc::clone(&self.shared),
                    physical_device,
                    timestamp_period: properties.limits.timestamp_period,
                    info: AdapterInfo {
                        name,
                        api: GraphicsApi::Vulkan,
                        vendor_id: properties.vendor_id,
                        device_id: properties.device_id,
                        dedicated_video_memory,
                        is_software: properties.device_type == vk::PhysicalDeviceType::CPU,
                    },
                };
                best = Some((key, adapter));
            }
        }

        let (_, adapter) = best.ok_or_else(|| {
            GraphicsError::DeviceCreation("no Vulkan 1.2 capable adapter found".to_string())
        })?;
        info!(
            adapter = %adapter.info.name,
            vendor_id = adapter.info.vendor_id,
            memory_mb = adapter.info.dedicated_video_memory / (1024 * 1024),
            "Selected adapter"
        );
        Ok(adapter)
    }
}

/// Vulkan 物理设备
pub struct VulkanAdapter {
    instance: Arc<InstanceShared>,
    physical_device: vk::PhysicalDevice,
    timestamp_period: f32,
    info: AdapterInfo,
}

/// 为三种队列类型挑选队列族：优先使用专用族，没有时退回更通用的族
fn select_queue_families(families: &[vk::QueueFamilyProperties]) -> Option<[u32; 3]> {
    let find = |required: vk::QueueFlags, excluded: vk::QueueFlags| {
        families
            .iter()
            .position(|f| f.queue_count > 0 && f.queue_flags.contains(required) && !f.queue_flags.intersects(excluded))
            .map(|i| i as u32)
    };

    let graphics = find(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::empty())?;
    let compute = find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics);
    let copy = find(
        vk::QueueFlags::TRANSFER,
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
    )
    .unwrap_or(compute);
    Some([graphics, compute, copy])
}

impl RhiAdapter<VulkanBackend> for VulkanAdapter {
    fn info(&self) -> &AdapterInfo {
        &self.info
    }

    fn create_device(&self) -> Result<VulkanDevice> {
        let instance = &self.instance.instance;
        let physical_device = self.physical_device;

        let family_props = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let families = select_queue_families(&family_props).ok_or_else(|| {
            GraphicsError::DeviceCreation(format!("adapter '{}' has no graphics queue", self.info.name))
        })?;

        let mut unique_families: Vec<u32> = families.to_vec();
        unique_families.sort_unstable();
        unique_families.dedup();
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .map_err(vk_error(GraphicsError::DeviceCreation, "vkEnumerateDeviceExtensionProperties"))?;
        let available = extension_names(&available);
        let has_swapchain = available.contains(&ash::khr::swapchain::NAME);
        let has_calibration = available.contains(&ash::ext::calibrated_timestamps::NAME);
        let mut extension_ptrs = Vec::new();
        if has_swapchain {
            extension_ptrs.push(ash::khr::swapchain::NAME.as_ptr());
        }
        if has_calibration {
            extension_ptrs.push(ash::ext::calibrated_timestamps::NAME.as_ptr());
        }

        let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut supported12);
            unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
        }
        if supported12.timeline_semaphore != vk::TRUE {
            return Err(GraphicsError::DeviceCreation(format!(
                "adapter '{}' does not support timeline semaphores",
                self.info.name
            ))
            .into());
        }
        let update_after_bind = supported12.runtime_descriptor_array == vk::TRUE
            && supported12.descriptor_binding_partially_bound == vk::TRUE
            && supported12.descriptor_binding_uniform_buffer_update_after_bind == vk::TRUE
            && supported12.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
            && supported12.descriptor_binding_storage_image_update_after_bind == vk::TRUE
            && supported12.descriptor_binding_storage_buffer_update_after_bind == vk::TRUE;

        let mut enabled12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        if update_after_bind {
            enabled12 = enabled12
                .runtime_descriptor_array(true)
                .descriptor_binding_partially_bound(true)
                .descriptor_binding_uniform_buffer_update_after_bind(true)
                .descriptor_binding_sampled_image_update_after_bind(true)
                .descriptor_binding_storage_image_update_after_bind(true)
                .descriptor_binding_storage_buffer_update_after_bind(true);
        } else {
            warn!("Update-after-bind descriptors unavailable, descriptor writes require an idle heap");
        }

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut enabled12);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(vk_error(GraphicsError::DeviceCreation, "vkCreateDevice"))?;

        let mut handles: HashMap<u32, Arc<Mutex<vk::Queue>>> = HashMap::new();
        for &family in &unique_families {
            let queue = unsafe { device.get_device_queue(family, 0) };
            handles.insert(family, Arc::new(Mutex::new(queue)));
        }
        let queues = families.map(|family| QueueSlot {
            family,
            queue: Arc::clone(&handles[&family]),
        });

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| GraphicsError::DeviceCreation(format!("failed to create memory allocator: {}", e)))?;

        let immediate = ImmediateContext::new(&device, families[CommandListType::Graphics.index()])?;
        let swapchain_loader = has_swapchain.then(|| ash::khr::swapchain::Device::new(instance, &device));
        let calibration = has_calibration.then(|| ash::ext::calibrated_timestamps::Device::new(instance, &device));

        info!(
            adapter = %self.info.name,
            graphics_family = families[0],
            compute_family = families[1],
            copy_family = families[2],
            update_after_bind,
            calibrated_timestamps = has_calibration,
            "Vulkan device created"
        );

        Ok(VulkanDevice {
            shared: Arc::new(DeviceShared {
                instance: Arc::clone(&self.instance),
                physical_device,
                device,
                allocator: Mutex::new(Some(allocator)),
                queues,
                swapchain_loader,
                calibration,
                update_after_bind,
                timestamp_period: self.timestamp_period,
                clock: Instant::now(),
                immediate: Mutex::new(immediate),
                warned_uncalibrated: AtomicBool::new(false),
            }),
            destroyed: false,
        })
    }
}

/// 一种队列类型对应的队列族与队列句柄
///
/// 共用同一队列族的类型共享句柄和它的锁，`vkQueueSubmit` 需要外部同步。
pub(crate) struct QueueSlot {
    pub(crate) family: u32,
    pub(crate) queue: Arc<Mutex<vk::Queue>>,
}

/// 资源创建时的一次性提交（初始布局转换）
struct ImmediateContext {
    pool: vk::CommandPool,
    fence: vk::Fence,
}

impl ImmediateContext {
    fn new(device: &ash::Device, family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(vk_error(GraphicsError::DeviceCreation, "vkCreateCommandPool"))?;
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(vk_error(GraphicsError::DeviceCreation, "vkCreateFence"))?;
        Ok(Self { pool, fence })
    }
}

/// 设备与所有子对象共享的状态
pub(crate) struct DeviceShared {
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) allocator: Mutex<Option<Allocator>>,
    queues: [QueueSlot; 3],
    pub(crate) swapchain_loader: Option<ash::khr::swapchain::Device>,
    calibration: Option<ash::ext::calibrated_timestamps::Device>,
    pub(crate) update_after_bind: bool,
    /// 每个 GPU tick 的纳秒数
    timestamp_period: f32,
    clock: Instant,
    immediate: Mutex<ImmediateContext>,
    warned_uncalibrated: AtomicBool,
}

impl DeviceShared {
    pub(crate) fn queue(&self, queue_type: CommandListType) -> &QueueSlot {
        &self.queues[queue_type.index()]
    }

    /// 去重后的队列族，资源在多个族之间以 CONCURRENT 模式共享
    pub(crate) fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.queues.iter().map(|slot| slot.family).collect();
        families.sort_unstable();
        families.dedup();
        families
    }

    /// 设备创建以来的纳秒数
    pub(crate) fn now_ticks(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }

    pub(crate) fn timestamp_frequency(&self) -> u64 {
        if self.timestamp_period > 0.0 {
            (1.0e9 / self.timestamp_period as f64) as u64
        } else {
            1_000_000_000
        }
    }

    pub(crate) fn create_timeline(&self, initial_value: u64) -> Result<vk::Semaphore> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(vk_error(GraphicsError::Synchronization, "vkCreateSemaphore"))
    }

    pub(crate) fn wait_timeline(&self, semaphore: vk::Semaphore, value: u64) -> Result<()> {
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(vk_error(GraphicsError::Synchronization, "vkWaitSemaphores"))
    }

    pub(crate) fn timeline_value(&self, semaphore: vk::Semaphore) -> Result<u64> {
        unsafe { self.device.get_semaphore_counter_value(semaphore) }
            .map_err(vk_error(GraphicsError::Synchronization, "vkGetSemaphoreCounterValue"))
    }

    /// 录制一段命令并同步执行完毕
    pub(crate) fn immediate_submit(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let context = self.immediate.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(context.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_error(GraphicsError::CommandExecution, "vkAllocateCommandBuffers"))?[0];

        let result = (|| {
            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
                .map_err(vk_error(GraphicsError::CommandExecution, "vkBeginCommandBuffer"))?;
            record(&self.device, command_buffer);
            unsafe { self.device.end_command_buffer(command_buffer) }
                .map_err(vk_error(GraphicsError::CommandExecution, "vkEndCommandBuffer"))?;

            let command_buffers = [command_buffer];
            let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
            {
                let queue = self.queue(CommandListType::Graphics).queue.lock();
                unsafe { self.device.queue_submit(*queue, &[submit], context.fence) }
                    .map_err(vk_error(GraphicsError::CommandExecution, "vkQueueSubmit"))?;
            }
            unsafe {
                self.device
                    .wait_for_fences(&[context.fence], true, u64::MAX)
                    .map_err(vk_error(GraphicsError::Synchronization, "vkWaitForFences"))?;
                self.device
                    .reset_fences(&[context.fence])
                    .map_err(vk_error(GraphicsError::Synchronization, "vkResetFences"))
            }
        })();

        unsafe { self.device.free_command_buffers(context.pool, &[command_buffer]) };
        result
    }

    /// 成对采样 GPU / CPU 时钟
    pub(crate) fn calibration_timestamp(&self) -> Result<CalibrationTimestamp> {
        let gpu_frequency = self.timestamp_frequency();
        if let Some(calibration) = &self.calibration {
            let info = [vk::CalibratedTimestampInfoEXT::default().time_domain(vk::TimeDomainEXT::DEVICE)];
            let cpu_ticks = self.now_ticks();
            let (timestamps, _max_deviation) = unsafe { calibration.get_calibrated_timestamps(&info) }
                .map_err(vk_error(GraphicsError::Synchronization, "vkGetCalibratedTimestampsEXT"))?;
            return Ok(CalibrationTimestamp {
                gpu_ticks: timestamps[0],
                gpu_frequency,
                cpu_ticks,
                cpu_frequency: 1_000_000_000,
            });
        }

        if !self.warned_uncalibrated.swap(true, Ordering::Relaxed) {
            warn!("VK_EXT_calibrated_timestamps unavailable, GPU timestamps follow the CPU clock");
        }
        let now = self.now_ticks();
        Ok(CalibrationTimestamp {
            gpu_ticks: now,
            gpu_frequency: 1_000_000_000,
            cpu_ticks: now,
            cpu_frequency: 1_000_000_000,
        })
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("vkDeviceWaitIdle failed during teardown: {:?}", e);
            }
            drop(self.allocator.lock().take());
            let context = self.immediate.get_mut();
            self.device.destroy_fence(context.fence, None);
            self.device.destroy_command_pool(context.pool, None);
            self.device.destroy_device(None);
        }
        debug!("Vulkan device destroyed");
    }
}

/// Vulkan 逻辑设备
pub struct VulkanDevice {
    shared: Arc<DeviceShared>,
    destroyed: bool,
}

impl VulkanDevice {
    fn check_alive(&self) -> Result<()> {
        if self.destroyed {
            return Err(GraphicsError::DeviceLost("Vulkan device was destroyed".to_string()).into());
        }
        Ok(())
    }
}

fn view_mismatch(view_type: ResourceViewType, what: &str) -> crate::core::error::DistRhiError {
    GraphicsError::ResourceCreation(format!("{:?} view requires {}", view_type, what)).into()
}

impl RhiDevice<VulkanBackend> for VulkanDevice {
    fn create_command_queue(&self, queue_type: CommandListType) -> Result<VulkanCommandQueue> {
        self.check_alive()?;
        VulkanCommandQueue::new(Arc::clone(&self.shared), queue_type)
    }

    fn create_command_list(&self, list_type: CommandListType) -> Result<VulkanCommandList> {
        self.check_alive()?;
        VulkanCommandList::new(Arc::clone(&self.shared), list_type)
    }

    fn create_fence(&self, initial_value: u64) -> Result<VulkanFence> {
        self.check_alive()?;
        VulkanFence::new(Arc::clone(&self.shared), initial_value)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<VulkanBuffer>> {
        self.check_alive()?;
        if desc.size == 0 {
            return Err(GraphicsError::ResourceCreation(format!("buffer '{}' has zero size", desc.name)).into());
        }
        Ok(Arc::new(VulkanBuffer::new(Arc::clone(&self.shared), desc)?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<VulkanTexture>> {
        self.check_alive()?;
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.depth_or_array_layers == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture '{}' has an empty extent {}x{}",
                desc.name, desc.width, desc.height
            ))
            .into());
        }
        if desc.format == Format::Unknown {
            return Err(GraphicsError::ResourceCreation(format!("texture '{}' has no format", desc.name)).into());
        }
        let texture = VulkanTexture::new(Arc::clone(&self.shared), desc)?;
        texture.initialize_layout()?;
        Ok(Arc::new(texture))
    }

    fn create_resource_view(
        &self,
        heap: &mut VulkanDescriptorHeap,
        resource: ViewResource<'_, VulkanBackend>,
        desc: &ResourceViewDesc,
    ) -> Result<Arc<VulkanResourceView>> {
        self.check_alive()?;
        let view_type = desc.view_type;
        check_view_resource(&resource, view_type)?;

        let id = heap.allocate(view_type.heap_type())?;
        let view = Arc::new(VulkanResourceView::new(Arc::clone(&self.shared), id, resource, desc)?);
        heap.write(&view)?;
        Ok(view)
    }

    fn create_descriptor_heap(&self, limits: &DescriptorLimits) -> Result<VulkanDescriptorHeap> {
        self.check_alive()?;
        VulkanDescriptorHeap::new(Arc::clone(&self.shared), limits)
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<VulkanRenderPass>> {
        self.check_alive()?;
        Ok(Arc::new(VulkanRenderPass::new(Arc::clone(&self.shared), desc)?))
    }

    fn create_frame_buffer(
        &self,
        heap: &mut VulkanDescriptorHeap,
        render_pass: &Arc<VulkanRenderPass>,
        color_attachments: &[Arc<VulkanTexture>],
        depth_attachment: Option<&Arc<VulkanTexture>>,
    ) -> Result<Arc<VulkanFrameBuffer>> {
        self.check_alive()?;
        attachment_extent(render_pass.desc(), color_attachments, depth_attachment)?;
        let mut rtv_ids = Vec::with_capacity(color_attachments.len());
        for texture in color_attachments {
            if !texture.desc().usage.contains(ResourceUsage::RENDER_TARGET) {
                return Err(view_mismatch(ResourceViewType::RenderTarget, "a render target texture"));
            }
            rtv_ids.push(heap.allocate(ResourceViewType::RenderTarget.heap_type())?);
        }
        let dsv_id = match depth_attachment {
            Some(texture) => {
                if !texture.desc().usage.contains(ResourceUsage::DEPTH_STENCIL) {
                    return Err(view_mismatch(ResourceViewType::DepthStencil, "a depth texture"));
                }
                Some(heap.allocate(ResourceViewType::DepthStencil.heap_type())?)
            }
            None => None,
        };

        Ok(Arc::new(VulkanFrameBuffer::new(
            Arc::clone(&self.shared),
            render_pass,
            color_attachments,
            depth_attachment,
            rtv_ids,
            dsv_id,
        )?))
    }

    fn create_swapchain(
        &self,
        graphics_queue: &VulkanCommandQueue,
        window: Option<&WindowHandle>,
        desc: &SwapchainDesc,
    ) -> Result<VulkanSwapchain> {
        self.check_alive()?;
        let window = window.ok_or_else(|| {
            GraphicsError::Unsupported("the Vulkan backend needs a window to create a swapchain".to_string())
        })?;
        VulkanSwapchain::new(Arc::clone(&self.shared), graphics_queue, window, desc)
    }

    fn create_query_heap(&self, count: u32) -> Result<Arc<VulkanQueryHeap>> {
        self.check_alive()?;
        Ok(Arc::new(VulkanQueryHeap::new(Arc::clone(&self.shared), count)?))
    }

    fn wait_idle(&self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        unsafe { self.shared.device.device_wait_idle() }
            .map_err(vk_error(GraphicsError::Synchronization, "vkDeviceWaitIdle"))
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = self.wait_idle() {
            error!("Failed to drain the device before destruction: {}", e);
        }
        self.destroyed = true;
        info!(
            outstanding_refs = Arc::strong_count(&self.shared) - 1,
            "Vulkan device destroyed, native handle released with its last user"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedicated_families_are_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(select_queue_families(&families), Some([0, 1, 2]));
    }

    #[test]
    fn test_single_family_serves_all_queues() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        assert_eq!(select_queue_families(&families), Some([0, 0, 0]));
        assert_eq!(select_queue_families(&[family(vk::QueueFlags::TRANSFER)]), None);
    }
}
