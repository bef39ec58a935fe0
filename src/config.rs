use envconfig::Envconfig;

/// Runtime configuration, read from the environment at startup.
#[derive(Debug, Envconfig)]
pub struct Config {
    /// Seconds between reconcile passes.
    #[envconfig(from = "SPROUT_RECONCILE_INTERVAL_SECONDS", default = "10")]
    pub reconcile_interval_seconds: u64,

    /// How long a fetched instance-type listing stays fresh.
    #[envconfig(from = "SPROUT_INSTANCE_TYPE_TTL_SECONDS", default = "300")]
    pub instance_type_ttl_seconds: u64,

    /// Bind address for /healthz and /readyz.
    #[envconfig(from = "SPROUT_HEALTH_ADDR", default = "0.0.0.0:8081")]
    pub health_addr: String,

    /// Provisioner whose policy is stamped onto launched nodes.
    #[envconfig(from = "SPROUT_PROVISIONER", default = "default")]
    pub provisioner: String,
}
