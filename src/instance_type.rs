use std::collections::BTreeSet;

use crate::resources::ResourceVector;

/// Capability descriptor for one instance type, as exposed by the cloud
/// provider. Read-only for the lifetime of a packing pass; `capacity`
/// dominates `overhead` component-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceType {
    /// The provider's native identifier, e.g. "cx22".
    pub name: String,
    /// Zones this instance type can launch in.
    pub zones: BTreeSet<String>,
    /// CPU architectures, e.g. "amd64", "arm64".
    pub architectures: BTreeSet<String>,
    pub operating_systems: BTreeSet<String>,
    /// Total resources on a freshly launched node.
    pub capacity: ResourceVector,
    /// Kernel, kubelet, and system reservations subtracted from capacity
    /// before user workloads land.
    pub overhead: ResourceVector,
    /// Relative hourly price, used to rank packing candidates.
    pub price_per_hour: f64,
}

/// Everything the cloud provider supports, unioned across its instance
/// types. Passed by reference into provisioner validation and schedule
/// construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudProviderCapabilities {
    pub zones: BTreeSet<String>,
    pub architectures: BTreeSet<String>,
    pub operating_systems: BTreeSet<String>,
    pub instance_types: BTreeSet<String>,
}

impl CloudProviderCapabilities {
    pub fn from_instance_types(instance_types: &[InstanceType]) -> Self {
        let mut capabilities = CloudProviderCapabilities::default();
        for instance_type in instance_types {
            capabilities
                .instance_types
                .insert(instance_type.name.clone());
            capabilities.zones.extend(instance_type.zones.iter().cloned());
            capabilities
                .architectures
                .extend(instance_type.architectures.iter().cloned());
            capabilities
                .operating_systems
                .extend(instance_type.operating_systems.iter().cloned());
        }
        capabilities
    }
}
