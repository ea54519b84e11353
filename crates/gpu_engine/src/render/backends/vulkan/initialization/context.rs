//! Vulkan context management
//!
//! Instance, physical device selection, logical device and swapchain. The
//! context owns every object whose lifetime spans the whole renderer; all
//! other wrappers hold a cloned `ash::Device` and must be dropped first.

use ash::{Device, Entry, Instance};
#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::{CStr, CString};
use thiserror::Error;

use super::capabilities::{CoreFeatureSupport, DeviceCapabilities, DeviceFeatures, ExtensionLoaders};
use super::surface::SurfaceProvider;
use crate::assets::{AssetError, PixelFormat};
use crate::render::backends::vulkan::state::swapchain::Swapchain;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A buffer or image allocation was rejected
    #[error("Failed to allocate {what}: {result:?}")]
    Allocation {
        /// What was being allocated
        what: &'static str,
        /// Result reported by the allocator
        result: vk::Result,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// A device feature or extension the operation depends on is not enabled
    #[error("Missing device capability: {0}")]
    MissingCapability(&'static str),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Shader or texture loading failed
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Decoded texture format with no Vulkan counterpart
    #[error("Unsupported texture format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    /// A scene array the renderer needs is empty
    #[error("Scene has no {what}")]
    EmptySceneData {
        /// Name of the empty array
        what: &'static str,
    },

    /// Scene upload attempted before any texture was loaded
    #[error("No textures loaded; at least one texture is required")]
    NoTextures,

    /// The bindless texture table has no free slot
    #[error("Texture table is full ({capacity} textures)")]
    TextureTableFull {
        /// Fixed capacity of the table
        capacity: u32,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

fn c_string(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|e| VulkanError::InitializationFailed(format!("Invalid C string {:?}: {}", value, e)))
}

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    pub debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (debug builds)
    #[cfg(debug_assertions)]
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a Vulkan 1.3 instance with the extensions the surface provider needs
    pub fn new(
        provider: &dyn SurfaceProvider,
        app_name: &str,
        app_version: (u32, u32, u32),
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = c_string(app_name)?;
        let engine_name_cstr = c_string("GpuEngine")?;
        let (major, minor, patch) = app_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let cstr_extensions = provider
            .required_instance_extensions()?
            .iter()
            .map(|ext| c_string(ext))
            .collect::<VulkanResult<Vec<_>>>()?;

        #[allow(unused_mut)]
        let mut extensions: Vec<*const i8> = cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let validation = enable_validation && Self::layer_available(&entry, VALIDATION_LAYER);
        if enable_validation && !validation {
            log::warn!("[CONTEXT] {} requested but not installed", VALIDATION_LAYER);
        }

        #[cfg(debug_assertions)]
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation { vec![c_string(VALIDATION_LAYER)?] } else { Vec::new() };
        let layer_name_ptrs: Vec<*const i8> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let enabled_validation_features = [vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION];
        let mut validation_features = vk::ValidationFeaturesEXT::builder()
            .enabled_validation_features(&enabled_validation_features);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);
        if validation {
            create_info = create_info.push_next(&mut validation_features);
        }

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };
        log::info!(
            "[CONTEXT] Created Vulkan 1.3 instance for '{}' (validation: {})",
            app_name, validation
        );

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let debug_messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(debug_messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
            #[cfg(debug_assertions)]
            debug_messenger,
        })
    }

    fn layer_available(entry: &Entry, name: &str) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                    layer_name.to_bytes() == name.as_bytes()
                })
            })
            .unwrap_or(false)
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let (Some(debug_utils), Some(debug_messenger)) = (&self.debug_utils, &self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(*debug_messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Queue family used for graphics, compute, transfer and present
    pub queue_family: u32,
    /// Optional features the device supports
    pub supported: DeviceFeatures,
}

impl PhysicalDeviceInfo {
    /// Select a Vulkan 1.3 device with a queue that can draw, dispatch and present
    ///
    /// Discrete GPUs win over everything else.
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        let mut candidates = Vec::new();
        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => candidates.push(info),
                Err(e) => log::debug!("[CONTEXT] Skipping device: {}", e),
            }
        }

        let position = candidates
            .iter()
            .position(|info| info.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
            .unwrap_or(0);

        if candidates.is_empty() {
            return Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()));
        }

        let device_info = candidates.swap_remove(position);
        log::info!("[CONTEXT] Selected GPU: {} ({:?})", device_info.name(), device_info.supported);
        Ok(device_info)
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            return Err(VulkanError::InitializationFailed("Vulkan 1.3 not supported".to_string()));
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let wanted = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

        let mut queue_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };

            if family.queue_flags.contains(wanted) && present_support {
                queue_family = Some(index);
                break;
            }
        }

        let queue_family = queue_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No queue family with graphics, compute and present".to_string())
        })?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device).map_err(VulkanError::Api)? };
        let available: Vec<&CStr> = extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        let missing = DeviceCapabilities::missing_required_extensions(&available);
        if !missing.is_empty() {
            return Err(VulkanError::InitializationFailed(format!(
                "Required device extensions not supported: {:?}",
                missing
            )));
        }

        let core = CoreFeatureSupport::query(instance, device);
        let missing = core.missing();
        if !missing.is_empty() {
            return Err(VulkanError::InitializationFailed(format!("Missing device features: {:?}", missing)));
        }

        let supported = DeviceFeatures::from_extensions(&available) & core.optional_features();

        Ok(Self {
            device,
            properties,
            queue_family,
            supported,
        })
    }

    /// Device name reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// The single queue every submission goes to
    pub queue: vk::Queue,
    /// Index of the queue family
    pub queue_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the logical device with the core Vulkan 1.3 features and `enabled` extras
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        enabled: DeviceFeatures,
    ) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device_info.queue_family)
            .queue_priorities(&priorities)
            .build()];

        let extension_names = DeviceCapabilities::device_extensions(enabled);
        let extension_ptrs: Vec<*const i8> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let core_features = vk::PhysicalDeviceFeatures::builder()
            .multi_draw_indirect(true)
            .sampler_anisotropy(true)
            .build();
        let mut features11 = vk::PhysicalDeviceVulkan11Features::builder().shader_draw_parameters(true);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .draw_indirect_count(true)
            .sampler_filter_minmax(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .descriptor_binding_partially_bound(true)
            .buffer_device_address(enabled.contains(DeviceFeatures::RAY_TRACING));
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut mesh_features = vk::PhysicalDeviceMeshShaderFeaturesEXT::builder()
            .task_shader(true)
            .mesh_shader(true);
        let mut acceleration_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder().acceleration_structure(true);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&core_features)
            .push_next(&mut features11)
            .push_next(&mut features12)
            .push_next(&mut features13);
        if enabled.contains(DeviceFeatures::MESH_SHADING) {
            create_info = create_info.push_next(&mut mesh_features);
        }
        if enabled.contains(DeviceFeatures::RAY_TRACING) {
            create_info = create_info.push_next(&mut acceleration_features);
        }

        let device = unsafe {
            instance
                .create_device(physical_device_info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let queue = unsafe { device.get_device_queue(physical_device_info.queue_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        log::info!("[CONTEXT] Logical device created with {} extension(s)", extension_names.len());

        Ok(Self {
            device,
            queue,
            queue_family: physical_device_info.queue_family,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns all core Vulkan resources
///
/// Fields drop in declaration order: the swapchain and extension loaders
/// before the device, the device before the instance.
pub struct VulkanContext {
    /// Swapchain for presenting frames
    swapchain: Option<Swapchain>,
    /// Typed entry points of the enabled extensions
    loaders: ExtensionLoaders,
    /// Negotiated optional features
    capabilities: DeviceCapabilities,
    /// Logical device for operations
    device: LogicalDevice,
    /// Selected physical device information
    physical_device: PhysicalDeviceInfo,
    /// Vulkan surface for rendering
    surface: vk::SurfaceKHR,
    /// Surface extension loader
    surface_loader: Surface,
    /// Vulkan instance and debug utilities
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a context presenting to the provider's surface
    ///
    /// `requested` optional features are enabled only where the selected
    /// device supports them.
    pub fn new(
        provider: &mut dyn SurfaceProvider,
        app_name: &str,
        app_version: (u32, u32, u32),
        enable_validation: bool,
        requested: DeviceFeatures,
    ) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(provider, app_name, app_version, enable_validation)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = provider.create_surface(&instance.entry, &instance.instance)?;

        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader)?;
        let capabilities = DeviceCapabilities::negotiate(requested, physical_device.supported);

        let device = LogicalDevice::new(&instance.instance, &physical_device, capabilities.enabled())?;
        let loaders = ExtensionLoaders::new(&instance.instance, &device.device, capabilities.enabled());

        let (width, height) = provider.framebuffer_extent();
        let swapchain = Swapchain::new(
            &instance.instance,
            device.device.clone(),
            surface,
            &surface_loader,
            &physical_device,
            vk::Extent2D { width, height },
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            swapchain: Some(swapchain),
            loaders,
            capabilities,
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
        })
    }

    /// Get a reference to the Vulkan entry
    pub fn entry(&self) -> &Entry {
        &self.instance.entry
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Borrow the device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// The single submission queue
    pub fn queue(&self) -> vk::Queue {
        self.device.queue
    }

    /// Family index of [`Self::queue`]
    pub fn queue_family(&self) -> u32 {
        self.device.queue_family
    }

    /// Negotiated capabilities
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Extension entry points
    pub fn loaders(&self) -> &ExtensionLoaders {
        &self.loaders
    }

    /// Get the swapchain
    pub fn swapchain(&self) -> VulkanResult<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "swapchain is being recreated".to_string(),
        })
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Wait until the queue has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }

    /// Recreate the swapchain for a new framebuffer extent
    pub fn recreate_swapchain(&mut self, extent: (u32, u32)) -> VulkanResult<()> {
        self.wait_idle()?;

        let old = self.swapchain.take();
        let old_handle = old.as_ref().map_or(vk::SwapchainKHR::null(), Swapchain::handle);

        let swapchain = Swapchain::new(
            &self.instance.instance,
            self.device.device.clone(),
            self.surface,
            &self.surface_loader,
            &self.physical_device,
            vk::Extent2D { width: extent.0, height: extent.1 },
            old_handle,
        )?;
        drop(old);

        log::info!("[CONTEXT] Swapchain recreated at {:?}", swapchain.extent());
        self.swapchain = Some(swapchain);
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.swapchain.take();
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
