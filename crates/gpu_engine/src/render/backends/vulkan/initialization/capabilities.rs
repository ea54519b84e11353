//! Optional device features, negotiated once at device creation
//!
//! Extension entry points are resolved here and handed out as typed `ash`
//! loaders; nothing else in the backend looks up function pointers.

use ash::extensions::{ext, khr};
use ash::{vk, Device, Instance};
use bitflags::bitflags;
use std::ffi::CStr;

use super::context::{VulkanError, VulkanResult};

bitflags! {
    /// Optional rendering paths
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFeatures: u32 {
        /// Task and mesh shaders (`VK_EXT_mesh_shader`)
        const MESH_SHADING = 1 << 0;
        /// Bottom-level acceleration structures (`VK_KHR_acceleration_structure`)
        const RAY_TRACING = 1 << 1;
    }
}

impl DeviceFeatures {
    /// Features whose extensions appear in `available`
    pub fn from_extensions(available: &[&CStr]) -> Self {
        let has = |name: &CStr| available.iter().any(|ext| *ext == name);

        let mut features = Self::empty();
        if has(ext::MeshShader::name()) {
            features |= Self::MESH_SHADING;
        }
        if has(khr::AccelerationStructure::name()) && has(khr::DeferredHostOperations::name()) {
            features |= Self::RAY_TRACING;
        }
        features
    }
}

/// Core Vulkan 1.1-1.3 features the renderer cannot run without, plus the
/// feature bits behind the optional paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreFeatureSupport {
    /// `multiDrawIndirect`
    pub multi_draw_indirect: bool,
    /// `shaderDrawParameters`, for `gl_DrawID`
    pub shader_draw_parameters: bool,
    /// `drawIndirectCount`
    pub draw_indirect_count: bool,
    /// `samplerFilterMinmax`, for the min-reduction pyramid sampler
    pub sampler_filter_minmax: bool,
    /// `runtimeDescriptorArray`, for the bindless texture table
    pub runtime_descriptor_array: bool,
    /// `shaderSampledImageArrayNonUniformIndexing`
    pub non_uniform_indexing: bool,
    /// `dynamicRendering`
    pub dynamic_rendering: bool,
    /// `synchronization2`
    pub synchronization2: bool,
    /// `bufferDeviceAddress`, needed only for ray tracing
    pub buffer_device_address: bool,
    /// `taskShader` and `meshShader`
    pub mesh_shader: bool,
    /// `accelerationStructure`
    pub acceleration_structure: bool,
}

impl CoreFeatureSupport {
    /// Query a physical device
    pub fn query(instance: &Instance, device: vk::PhysicalDevice) -> Self {
        let mut features11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut mesh = vk::PhysicalDeviceMeshShaderFeaturesEXT::default();
        let mut acceleration = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();

        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut features11)
            .push_next(&mut features12)
            .push_next(&mut features13)
            .push_next(&mut mesh)
            .push_next(&mut acceleration);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
        let core = features.features;

        Self {
            multi_draw_indirect: core.multi_draw_indirect == vk::TRUE,
            shader_draw_parameters: features11.shader_draw_parameters == vk::TRUE,
            draw_indirect_count: features12.draw_indirect_count == vk::TRUE,
            sampler_filter_minmax: features12.sampler_filter_minmax == vk::TRUE,
            runtime_descriptor_array: features12.runtime_descriptor_array == vk::TRUE,
            non_uniform_indexing: features12.shader_sampled_image_array_non_uniform_indexing == vk::TRUE,
            dynamic_rendering: features13.dynamic_rendering == vk::TRUE,
            synchronization2: features13.synchronization2 == vk::TRUE,
            buffer_device_address: features12.buffer_device_address == vk::TRUE,
            mesh_shader: mesh.task_shader == vk::TRUE && mesh.mesh_shader == vk::TRUE,
            acceleration_structure: acceleration.acceleration_structure == vk::TRUE,
        }
    }

    /// Names of required features the device lacks
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (self.multi_draw_indirect, "multiDrawIndirect"),
            (self.shader_draw_parameters, "shaderDrawParameters"),
            (self.draw_indirect_count, "drawIndirectCount"),
            (self.sampler_filter_minmax, "samplerFilterMinmax"),
            (self.runtime_descriptor_array, "runtimeDescriptorArray"),
            (self.non_uniform_indexing, "shaderSampledImageArrayNonUniformIndexing"),
            (self.dynamic_rendering, "dynamicRendering"),
            (self.synchronization2, "synchronization2"),
        ]
        .iter()
        .filter(|(supported, _)| !supported)
        .map(|&(_, name)| name)
        .collect()
    }

    /// Optional paths whose feature bits are present
    pub fn optional_features(&self) -> DeviceFeatures {
        let mut features = DeviceFeatures::empty();
        if self.mesh_shader {
            features |= DeviceFeatures::MESH_SHADING;
        }
        if self.acceleration_structure && self.buffer_device_address {
            features |= DeviceFeatures::RAY_TRACING;
        }
        features
    }
}

/// Requested and supported optional features, fixed for the device's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    requested: DeviceFeatures,
    supported: DeviceFeatures,
}

impl DeviceCapabilities {
    /// Extensions every device must expose
    pub fn required_extensions() -> [&'static CStr; 2] {
        [khr::Swapchain::name(), khr::PushDescriptor::name()]
    }

    /// Required extensions not present in `available`
    pub fn missing_required_extensions(available: &[&CStr]) -> Vec<&'static CStr> {
        Self::required_extensions()
            .into_iter()
            .filter(|required| !available.iter().any(|ext| ext == required))
            .collect()
    }

    /// Extensions to enable for `enabled` optional features
    pub fn device_extensions(enabled: DeviceFeatures) -> Vec<&'static CStr> {
        let mut extensions = Self::required_extensions().to_vec();
        if enabled.contains(DeviceFeatures::MESH_SHADING) {
            extensions.push(ext::MeshShader::name());
        }
        if enabled.contains(DeviceFeatures::RAY_TRACING) {
            extensions.push(khr::AccelerationStructure::name());
            extensions.push(khr::DeferredHostOperations::name());
        }
        extensions
    }

    /// Enable what was asked for and is available
    pub fn negotiate(requested: DeviceFeatures, supported: DeviceFeatures) -> Self {
        let unavailable = requested - supported;
        if !unavailable.is_empty() {
            log::warn!("[CONTEXT] Requested features not supported by the device: {:?}", unavailable);
        }
        Self { requested, supported }
    }

    /// Features that are both requested and supported
    pub fn enabled(&self) -> DeviceFeatures {
        self.requested & self.supported
    }

    /// Features the device offers, requested or not
    pub fn supported(&self) -> DeviceFeatures {
        self.supported
    }

    /// Whether the mesh shading path is enabled
    pub fn mesh_shading(&self) -> bool {
        self.enabled().contains(DeviceFeatures::MESH_SHADING)
    }

    /// Whether BLAS builds are enabled
    pub fn ray_tracing(&self) -> bool {
        self.enabled().contains(DeviceFeatures::RAY_TRACING)
    }
}

/// Typed extension entry points
pub struct ExtensionLoaders {
    push_descriptor: khr::PushDescriptor,
    mesh_shader: Option<ext::MeshShader>,
    acceleration_structure: Option<khr::AccelerationStructure>,
}

impl ExtensionLoaders {
    /// Load the entry points of the required and `enabled` extensions
    pub fn new(instance: &Instance, device: &Device, enabled: DeviceFeatures) -> Self {
        Self {
            push_descriptor: khr::PushDescriptor::new(instance, device),
            mesh_shader: enabled
                .contains(DeviceFeatures::MESH_SHADING)
                .then(|| ext::MeshShader::new(instance, device)),
            acceleration_structure: enabled
                .contains(DeviceFeatures::RAY_TRACING)
                .then(|| khr::AccelerationStructure::new(instance, device)),
        }
    }

    /// `VK_KHR_push_descriptor`
    pub fn push_descriptor(&self) -> &khr::PushDescriptor {
        &self.push_descriptor
    }

    /// `VK_EXT_mesh_shader`, if enabled
    pub fn mesh_shader(&self) -> VulkanResult<&ext::MeshShader> {
        self.mesh_shader.as_ref().ok_or(VulkanError::MissingCapability("VK_EXT_mesh_shader"))
    }

    /// `VK_KHR_acceleration_structure`, if enabled
    pub fn acceleration_structure(&self) -> VulkanResult<&khr::AccelerationStructure> {
        self.acceleration_structure
            .as_ref()
            .ok_or(VulkanError::MissingCapability("VK_KHR_acceleration_structure"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_from_extensions() {
        let mesh_only = [khr::Swapchain::name(), ext::MeshShader::name()];
        assert_eq!(DeviceFeatures::from_extensions(&mesh_only), DeviceFeatures::MESH_SHADING);

        // Acceleration structures also need deferred host operations
        let partial = [khr::AccelerationStructure::name()];
        assert!(DeviceFeatures::from_extensions(&partial).is_empty());

        let full = [khr::AccelerationStructure::name(), khr::DeferredHostOperations::name()];
        assert_eq!(DeviceFeatures::from_extensions(&full), DeviceFeatures::RAY_TRACING);
    }

    #[test]
    fn test_negotiation_keeps_only_supported_requests() {
        let caps = DeviceCapabilities::negotiate(DeviceFeatures::all(), DeviceFeatures::MESH_SHADING);
        assert!(caps.mesh_shading());
        assert!(!caps.ray_tracing());

        let caps = DeviceCapabilities::negotiate(DeviceFeatures::empty(), DeviceFeatures::all());
        assert!(caps.enabled().is_empty());
        assert_eq!(caps.supported(), DeviceFeatures::all());
    }

    #[test]
    fn test_device_extensions_follow_features() {
        assert_eq!(DeviceCapabilities::device_extensions(DeviceFeatures::empty()).len(), 2);
        let all = DeviceCapabilities::device_extensions(DeviceFeatures::all());
        assert_eq!(all.len(), 5);
        assert!(all.contains(&khr::PushDescriptor::name()));
    }

    #[test]
    fn test_missing_required_extensions() {
        let missing = DeviceCapabilities::missing_required_extensions(&[khr::Swapchain::name()]);
        assert_eq!(missing, vec![khr::PushDescriptor::name()]);
    }

    #[test]
    fn test_core_feature_report() {
        let mut support = CoreFeatureSupport {
            multi_draw_indirect: true,
            shader_draw_parameters: true,
            draw_indirect_count: true,
            sampler_filter_minmax: true,
            runtime_descriptor_array: true,
            non_uniform_indexing: true,
            dynamic_rendering: true,
            synchronization2: true,
            ..Default::default()
        };
        assert!(support.missing().is_empty());
        assert!(support.optional_features().is_empty());

        support.synchronization2 = false;
        support.acceleration_structure = true;
        support.buffer_device_address = true;
        assert_eq!(support.missing(), vec!["synchronization2"]);
        assert_eq!(support.optional_features(), DeviceFeatures::RAY_TRACING);
    }
}
