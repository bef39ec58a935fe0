use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

/// Extended resource name for NVIDIA GPUs.
pub const NVIDIA_GPU: &str = "nvidia.com/gpu";
/// Extended resource name for AMD GPUs.
pub const AMD_GPU: &str = "amd.com/gpu";
/// Extended resource name for AWS Neuron accelerators.
pub const AWS_NEURON: &str = "aws.amazon.com/neuron";

/// The fixed set of resource names the engine arithmetics over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Cpu,
    Memory,
    Pods,
    NvidiaGpu,
    AmdGpu,
    AwsNeuron,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::Cpu,
        Resource::Memory,
        Resource::Pods,
        Resource::NvidiaGpu,
        Resource::AmdGpu,
        Resource::AwsNeuron,
    ];

    /// Accelerator classes an instance type may expose.
    pub const ACCELERATORS: [Resource; 3] =
        [Resource::NvidiaGpu, Resource::AmdGpu, Resource::AwsNeuron];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Pods => "pods",
            Resource::NvidiaGpu => NVIDIA_GPU,
            Resource::AmdGpu => AMD_GPU,
            Resource::AwsNeuron => AWS_NEURON,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantityError {
    #[error("unparseable quantity {0:?}")]
    Malformed(String),
    #[error("negative quantity {0:?}")]
    Negative(String),
    #[error("quantity {0:?} is too large")]
    Overflow(String),
    #[error("{resource} request {quantity:?} must be a whole number")]
    Fractional { resource: &'static str, quantity: String },
}

/// Vector-valued quantity over the fixed resource alphabet.
///
/// CPU is held in milli-cores, memory in bytes, everything else as a plain
/// count, so all arithmetic and comparison is exact integer math. A resource
/// that was never set is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceVector {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub pods: i64,
    pub nvidia_gpus: i64,
    pub amd_gpus: i64,
    pub aws_neurons: i64,
}

impl ResourceVector {
    pub fn get(&self, resource: Resource) -> i64 {
        match resource {
            Resource::Cpu => self.cpu_millis,
            Resource::Memory => self.memory_bytes,
            Resource::Pods => self.pods,
            Resource::NvidiaGpu => self.nvidia_gpus,
            Resource::AmdGpu => self.amd_gpus,
            Resource::AwsNeuron => self.aws_neurons,
        }
    }

    pub fn set(&mut self, resource: Resource, value: i64) {
        match resource {
            Resource::Cpu => self.cpu_millis = value,
            Resource::Memory => self.memory_bytes = value,
            Resource::Pods => self.pods = value,
            Resource::NvidiaGpu => self.nvidia_gpus = value,
            Resource::AmdGpu => self.amd_gpus = value,
            Resource::AwsNeuron => self.aws_neurons = value,
        }
    }

    /// Component-wise addition.
    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = *self;
        for resource in Resource::ALL {
            out.set(resource, self.get(resource) + other.get(resource));
        }
        out
    }

    /// Component-wise subtraction. None if any component would go negative.
    pub fn checked_sub(&self, other: &ResourceVector) -> Option<ResourceVector> {
        let mut out = *self;
        for resource in Resource::ALL {
            let remaining = self.get(resource) - other.get(resource);
            if remaining < 0 {
                return None;
            }
            out.set(resource, remaining);
        }
        Some(out)
    }

    /// Component-wise `self <= other`.
    pub fn le(&self, other: &ResourceVector) -> bool {
        Resource::ALL
            .iter()
            .all(|&resource| self.get(resource) <= other.get(resource))
    }

    /// Component-wise maximum.
    pub fn max(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = *self;
        for resource in Resource::ALL {
            out.set(resource, self.get(resource).max(other.get(resource)));
        }
        out
    }

    pub fn is_zero(&self) -> bool {
        Resource::ALL.iter().all(|&resource| self.get(resource) == 0)
    }

    /// Component-wise sum of a batch of vectors.
    pub fn sum<'a>(vectors: impl IntoIterator<Item = &'a ResourceVector>) -> ResourceVector {
        vectors
            .into_iter()
            .fold(ResourceVector::default(), |acc, v| acc.add(v))
    }

    /// Parse a Kubernetes resource-request map. Names outside the alphabet
    /// (ephemeral-storage, hugepages, vendor extensions) are ignored.
    pub fn from_requests(requests: &BTreeMap<String, Quantity>) -> Result<Self, QuantityError> {
        let mut vector = ResourceVector::default();
        for (name, quantity) in requests {
            match name.as_str() {
                "cpu" => vector.cpu_millis += parse_cpu(quantity)?,
                "memory" => vector.memory_bytes += parse_memory(quantity)?,
                "pods" => vector.pods += parse_count(quantity, "pods")?,
                NVIDIA_GPU => vector.nvidia_gpus += parse_count(quantity, NVIDIA_GPU)?,
                AMD_GPU => vector.amd_gpus += parse_count(quantity, AMD_GPU)?,
                AWS_NEURON => vector.aws_neurons += parse_count(quantity, AWS_NEURON)?,
                _ => {}
            }
        }
        Ok(vector)
    }

    /// Render as a Kubernetes capacity/allocatable map. Zero-valued
    /// accelerators are omitted.
    pub fn to_quantity_map(&self) -> BTreeMap<String, Quantity> {
        let mut map = BTreeMap::from([
            ("cpu".to_string(), Quantity(format!("{}m", self.cpu_millis))),
            ("memory".to_string(), Quantity(self.memory_bytes.to_string())),
            ("pods".to_string(), Quantity(self.pods.to_string())),
        ]);
        for resource in Resource::ACCELERATORS {
            let count = self.get(resource);
            if count > 0 {
                map.insert(resource.name().to_string(), Quantity(count.to_string()));
            }
        }
        map
    }
}

/// Effective requests of a pod spec: the sum of the regular containers'
/// requests, lifted component-wise to at least the largest single init
/// container. Init containers run one at a time, so they don't sum.
/// The `pods` component is left unset; callers add it when a pod slot is
/// actually consumed.
pub fn requests_for(spec: &PodSpec) -> Result<ResourceVector, QuantityError> {
    let mut total = ResourceVector::default();
    for container in &spec.containers {
        if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            total = total.add(&ResourceVector::from_requests(requests)?);
        }
    }
    let mut init_max = ResourceVector::default();
    for container in spec.init_containers.iter().flatten() {
        if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            init_max = init_max.max(&ResourceVector::from_requests(requests)?);
        }
    }
    Ok(total.max(&init_max))
}

/// Namespace/name pair identifying a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A pod reduced to what the packing engine needs: its identity and its
/// effective resource requests.
#[derive(Debug, Clone, PartialEq)]
pub struct PodRequest {
    pub id: PodId,
    pub requests: ResourceVector,
}

impl PodRequest {
    pub fn from_pod(pod: &Pod) -> Result<Self, QuantityError> {
        let requests = match pod.spec.as_ref() {
            Some(spec) => requests_for(spec)?,
            None => ResourceVector::default(),
        };
        Ok(PodRequest {
            id: PodId {
                namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                name: pod.metadata.name.clone().unwrap_or_default(),
            },
            requests,
        })
    }
}

/// CPU quantity in milli-cores. Sub-milli remainders round up, matching the
/// apimachinery MilliValue convention.
pub fn parse_cpu(quantity: &Quantity) -> Result<i64, QuantityError> {
    let (numerator, denominator) = parse_fraction(&quantity.0)?;
    ceil_div(numerator * 1000, denominator, &quantity.0)
}

/// Memory quantity in bytes. Fractional bytes round up.
pub fn parse_memory(quantity: &Quantity) -> Result<i64, QuantityError> {
    let (numerator, denominator) = parse_fraction(&quantity.0)?;
    ceil_div(numerator, denominator, &quantity.0)
}

/// Countable quantity (pods, accelerators). Must be a whole number.
pub fn parse_count(quantity: &Quantity, resource: &'static str) -> Result<i64, QuantityError> {
    let (numerator, denominator) = parse_fraction(&quantity.0)?;
    if numerator % denominator != 0 {
        return Err(QuantityError::Fractional {
            resource,
            quantity: quantity.0.clone(),
        });
    }
    to_i64(numerator / denominator, &quantity.0)
}

/// Decompose a serialized quantity into an exact fraction of its base unit:
/// `"1.5Gi"` becomes 15 * 1024^3 / 10. Supports the decimal (k M G T P E)
/// and binary (Ki Mi Gi Ti Pi Ei) suffixes plus `m` for milli.
fn parse_fraction(text: &str) -> Result<(i128, i128), QuantityError> {
    let unsigned = match text.strip_prefix('+') {
        Some(rest) => rest,
        None => {
            if text.starts_with('-') {
                return Err(QuantityError::Negative(text.to_string()));
            }
            text
        }
    };

    let digits_end = unsigned
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(unsigned.len());
    let (mantissa_text, suffix) = unsigned.split_at(digits_end);

    let (integer_text, fraction_text) = match mantissa_text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa_text, ""),
    };
    if integer_text.is_empty() && fraction_text.is_empty() {
        return Err(QuantityError::Malformed(text.to_string()));
    }
    if integer_text.len() + fraction_text.len() > 15 {
        return Err(QuantityError::Overflow(text.to_string()));
    }

    let mut mantissa: i128 = 0;
    for c in integer_text.chars().chain(fraction_text.chars()) {
        let digit = c
            .to_digit(10)
            .ok_or_else(|| QuantityError::Malformed(text.to_string()))?;
        mantissa = mantissa * 10 + i128::from(digit);
    }

    let scale: i128 = 10i128.pow(fraction_text.len() as u32);
    let (numerator, denominator): (i128, i128) = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return Err(QuantityError::Malformed(text.to_string())),
    };

    Ok((mantissa * numerator, scale * denominator))
}

fn ceil_div(numerator: i128, denominator: i128, text: &str) -> Result<i64, QuantityError> {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    let ceiled = if (remainder > 0 && denominator > 0) || (remainder < 0 && denominator < 0) {
        quotient + 1
    } else {
        quotient
    };
    to_i64(ceiled, text)
}

fn to_i64(value: i128, text: &str) -> Result<i64, QuantityError> {
    i64::try_from(value).map_err(|_| QuantityError::Overflow(text.to_string()))
}
