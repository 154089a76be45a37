//! Fault catalog - turns a fault description into an experiment plan.
//!
//! Each fault knows its action kind, the parameters its executor expects,
//! the targets it applies to, and what "fault active" / "fault cleared"
//! look like when the target is observed.

use crate::action::ChaosAction;
use crate::agent_link::{STATE_INJECTED, STATE_REVERTED};
use crate::config::ExperimentConfig;
use crate::control_plane::DISKS_PARAM;
use crate::convergence::StatePredicate;
use crate::error::ChaosError;
use crate::timeline::ExperimentPlan;
use chaos_env::{TargetKind, TargetRef};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Disk state once detached.
pub const DISK_UNATTACHED: &str = "Unattached";

/// Disk state once attached.
pub const DISK_ATTACHED: &str = "Attached";

/// Parameters of a network fault applied by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkFault {
    pub interface: String,
    pub latency_ms: u64,
    pub loss_percentage: u8,
    pub destination_hosts: Vec<String>,
    pub destination_ips: Vec<String>,
}

impl Default for NetworkFault {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            latency_ms: 2000,
            loss_percentage: 100,
            destination_hosts: Vec::new(),
            destination_ips: Vec::new(),
        }
    }
}

/// Parameters of an I/O stress fault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoStress {
    pub workers: u32,

    /// Filesystem utilization in percent; wins over `utilization_gb`
    pub utilization_percentage: u32,
    pub utilization_gb: u32,
    pub mount_path: Option<String>,

    /// Extra CPU stressors alongside the I/O ones
    pub cpu_cores: u32,
}

impl IoStress {
    /// The `--hdd-bytes` value.
    pub fn hdd_bytes(&self) -> String {
        match (self.utilization_percentage, self.utilization_gb) {
            (0, 0) => {
                info!("No filesystem utilization given, using the default of 10%");
                "10%".to_string()
            }
            (0, gb) => format!("{}G", gb),
            (pct, 0) => format!("{}%", pct),
            (pct, _) => {
                warn!("Both filesystem utilization percentage and bytes given, using the percentage");
                format!("{}%", pct)
            }
        }
    }
}

/// A proxy toxic and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum HttpToxic {
    /// Added latency in ms
    Latency(u64),

    /// Request timeout in ms
    Timeout(u64),

    /// Rate limit in KB/s
    RateLimit(u64),

    /// Bytes allowed before the connection closes
    DataLimit(u64),
}

impl HttpToxic {
    /// Builds a toxic from its type name.
    pub fn new(toxic_type: &str, value: u64) -> Result<Self, ChaosError> {
        match toxic_type {
            "latency" => Ok(HttpToxic::Latency(value)),
            "timeout" => Ok(HttpToxic::Timeout(value)),
            "rate-limit" => Ok(HttpToxic::RateLimit(value)),
            "data-limit" => Ok(HttpToxic::DataLimit(value)),
            other => Err(ChaosError::action(format!("http chaos type {} is not supported", other))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HttpToxic::Latency(_) => "latency",
            HttpToxic::Timeout(_) => "timeout",
            HttpToxic::RateLimit(_) => "rate-limit",
            HttpToxic::DataLimit(_) => "data-limit",
        }
    }

    pub fn value(&self) -> u64 {
        match *self {
            HttpToxic::Latency(v) | HttpToxic::Timeout(v) | HttpToxic::RateLimit(v) | HttpToxic::DataLimit(v) => v,
        }
    }
}

/// An HTTP proxy fault applied through run-command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFault {
    pub toxic: HttpToxic,
    pub listen_port: u16,
    pub stream_type: String,
    pub stream_port: u16,
    #[serde(default)]
    pub install_dependency: bool,
}

impl HttpFault {
    /// Name of the toxic on the proxy, `<stream>_<type>`.
    pub fn toxic_name(&self) -> String {
        format!("{}_{}", self.stream_type, self.toxic.type_name())
    }
}

/// Every fault the engine knows how to plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FaultSpec {
    #[serde(rename = "os-network-latency")]
    NetworkLatency(NetworkFault),

    #[serde(rename = "os-network-loss")]
    NetworkLoss(NetworkFault),

    #[serde(rename = "disk-loss")]
    DiskLoss { disks: Vec<String> },

    #[serde(rename = "cpu-hog")]
    CpuHog {
        cores: u32,
        #[serde(default)]
        install_dependency: bool,
    },

    #[serde(rename = "memory-hog")]
    MemoryHog {
        workers: u32,
        memory_mb: u32,
        #[serde(default)]
        install_dependency: bool,
    },

    #[serde(rename = "io-stress")]
    IoStress(IoStress),

    #[serde(rename = "http-chaos")]
    Http(HttpFault),
}

impl FaultSpec {
    /// Parses a fault description; unknown kinds are invalid actions.
    pub fn from_json(json: &str) -> Result<Self, ChaosError> {
        serde_json::from_str(json).map_err(|e| ChaosError::action(format!("unsupported fault description: {}", e)))
    }

    /// Action kind handed to the executor.
    pub fn kind(&self) -> &'static str {
        match self {
            FaultSpec::NetworkLatency(_) => "os-network-latency",
            FaultSpec::NetworkLoss(_) => "os-network-loss",
            FaultSpec::DiskLoss { .. } => "disk-loss",
            FaultSpec::CpuHog { .. } => "cpu-hog",
            FaultSpec::MemoryHog { .. } => "memory-hog",
            FaultSpec::IoStress(_) => "io-stress",
            FaultSpec::Http(_) => "http-chaos",
        }
    }

    /// Target kinds this fault can be applied to.
    pub fn supported_targets(&self) -> &'static [TargetKind] {
        match self {
            FaultSpec::NetworkLatency(_) | FaultSpec::NetworkLoss(_) => &[TargetKind::AgentConnection],
            _ => &[TargetKind::Instance, TargetKind::ScaleSetMember],
        }
    }

    /// Executor parameters, validated.
    pub fn parameters(&self, config: &ExperimentConfig) -> Result<Vec<(String, String)>, ChaosError> {
        let params = match self {
            FaultSpec::NetworkLatency(net) => {
                if net.latency_ms == 0 {
                    return Err(ChaosError::action("network latency must be greater than zero"));
                }
                network_params(net)
            }
            FaultSpec::NetworkLoss(net) => {
                if net.loss_percentage == 0 || net.loss_percentage > 100 {
                    return Err(ChaosError::action(format!(
                        "packet loss percentage must be within 1..=100, got {}",
                        net.loss_percentage
                    )));
                }
                network_params(net)
            }
            FaultSpec::DiskLoss { disks } => {
                if disks.is_empty() {
                    return Err(ChaosError::action("disk-loss needs at least one disk name"));
                }
                vec![(DISKS_PARAM.to_string(), disks.join(","))]
            }
            FaultSpec::CpuHog { cores, install_dependency } => {
                info!("[Info]: Details of Stressor: CPU Core {}, Timeout {}s", cores, config.chaos_interval);
                stress_params(self.kind(), *install_dependency, config, format!("--cpu {}", cores), String::new())
            }
            FaultSpec::MemoryHog {
                workers,
                memory_mb,
                install_dependency,
            } => {
                info!(
                    "[Info]: Details of Stressor: Workers {}, Memory {}M, Timeout {}s",
                    workers, memory_mb, config.chaos_interval
                );
                stress_params(
                    self.kind(),
                    *install_dependency,
                    config,
                    format!("--vm {} --vm-bytes {}M", workers, memory_mb),
                    String::new(),
                )
            }
            FaultSpec::IoStress(io) => {
                let mut args = format!("--io {} --hdd {} --hdd-bytes {}", io.workers, io.workers, io.hdd_bytes());
                if let Some(path) = io.mount_path.as_deref().filter(|p| !p.is_empty()) {
                    args.push_str(" --temp-path ");
                    args.push_str(path);
                }
                let additional = if io.cpu_cores > 0 {
                    format!("--cpu {}", io.cpu_cores)
                } else {
                    String::new()
                };
                stress_params(self.kind(), false, config, args, additional)
            }
            FaultSpec::Http(http) => {
                info!(
                    "[Info]: Details of Http Chaos: {} {} on {} stream, listen port {}, stream port {}",
                    http.toxic.type_name(),
                    http.toxic.value(),
                    http.stream_type,
                    http.listen_port,
                    http.stream_port
                );
                vec![
                    ("InstallDependency".to_string(), http.install_dependency.to_string()),
                    ("ToxicName".to_string(), http.toxic_name()),
                    ("ListenPort".to_string(), http.listen_port.to_string()),
                    ("StreamType".to_string(), http.stream_type.clone()),
                    ("StreamPort".to_string(), http.stream_port.to_string()),
                    ("ToxicType".to_string(), http.toxic.type_name().to_string()),
                    ("ToxicValue".to_string(), format!("\"{}\"", http.toxic.value())),
                ]
            }
        };
        Ok(params)
    }

    /// Observed state once the fault is applied.
    pub fn fault_active(&self) -> StatePredicate {
        match self {
            FaultSpec::NetworkLatency(_) | FaultSpec::NetworkLoss(_) => StatePredicate::equals(STATE_INJECTED),
            FaultSpec::DiskLoss { .. } => StatePredicate::equals(DISK_UNATTACHED),
            _ => StatePredicate::any(),
        }
    }

    /// Observed state once the fault is gone.
    pub fn fault_cleared(&self) -> StatePredicate {
        match self {
            FaultSpec::NetworkLatency(_) | FaultSpec::NetworkLoss(_) => StatePredicate::equals(STATE_REVERTED),
            FaultSpec::DiskLoss { .. } => StatePredicate::equals(DISK_ATTACHED),
            _ => StatePredicate::any(),
        }
    }

    /// Builds the experiment plan for `target`.
    pub fn plan(&self, target: TargetRef, config: &ExperimentConfig) -> Result<ExperimentPlan, ChaosError> {
        if !self.supported_targets().contains(&target.kind) {
            return Err(ChaosError::action(format!(
                "{} cannot be applied to {} targets",
                self.kind(),
                target.kind
            )));
        }

        let inject = ChaosAction::inject(self.kind(), target, config.action_timeout()).with_params(self.parameters(config)?);
        Ok(ExperimentPlan::new(inject, self.fault_active(), self.fault_cleared()))
    }
}

fn network_params(net: &NetworkFault) -> Vec<(String, String)> {
    vec![
        ("NetworkInterface".to_string(), net.interface.clone()),
        ("NetworkLatency".to_string(), net.latency_ms.to_string()),
        ("NetworkPacketLossPercentage".to_string(), net.loss_percentage.to_string()),
        ("DestinationHosts".to_string(), net.destination_hosts.join(",")),
        ("DestinationIPs".to_string(), net.destination_ips.join(",")),
    ]
}

fn stress_params(
    kind: &str,
    install_dependency: bool,
    config: &ExperimentConfig,
    stress_args: String,
    additional_args: String,
) -> Vec<(String, String)> {
    vec![
        ("InstallDependency".to_string(), install_dependency.to_string()),
        ("Duration".to_string(), format!("{}s", config.chaos_interval)),
        ("ExperimentName".to_string(), kind.to_string()),
        ("StressArgs".to_string(), stress_args),
        ("AdditionalArgs".to_string(), additional_args),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param<'a>(params: &'a [(String, String)], key: &str) -> &'a str {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn test_memory_hog_args() {
        let fault = FaultSpec::MemoryHog {
            workers: 2,
            memory_mb: 512,
            install_dependency: true,
        };
        let params = fault.parameters(&ExperimentConfig::default()).unwrap();

        assert_eq!(param(&params, "StressArgs"), "--vm 2 --vm-bytes 512M");
        assert_eq!(param(&params, "Duration"), "10s");
        assert_eq!(param(&params, "ExperimentName"), "memory-hog");
        assert_eq!(param(&params, "InstallDependency"), "true");
    }

    #[test]
    fn test_io_stress_utilization_precedence() {
        let mut io = IoStress {
            workers: 4,
            ..IoStress::default()
        };
        assert_eq!(io.hdd_bytes(), "10%");

        io.utilization_gb = 3;
        assert_eq!(io.hdd_bytes(), "3G");

        io.utilization_percentage = 40;
        assert_eq!(io.hdd_bytes(), "40%");
    }

    #[test]
    fn test_io_stress_mount_path_and_cpu() {
        let fault = FaultSpec::IoStress(IoStress {
            workers: 2,
            mount_path: Some("/mnt/data".to_string()),
            cpu_cores: 1,
            ..IoStress::default()
        });
        let params = fault.parameters(&ExperimentConfig::default()).unwrap();

        assert_eq!(
            param(&params, "StressArgs"),
            "--io 2 --hdd 2 --hdd-bytes 10% --temp-path /mnt/data"
        );
        assert_eq!(param(&params, "AdditionalArgs"), "--cpu 1");
    }

    #[test]
    fn test_http_toxic_params() {
        let fault = FaultSpec::Http(HttpFault {
            toxic: HttpToxic::new("rate-limit", 64).unwrap(),
            listen_port: 20000,
            stream_type: "downstream".to_string(),
            stream_port: 8080,
            install_dependency: false,
        });
        let params = fault.parameters(&ExperimentConfig::default()).unwrap();

        assert_eq!(param(&params, "ToxicName"), "downstream_rate-limit");
        assert_eq!(param(&params, "ToxicValue"), "\"64\"");
        assert!(HttpToxic::new("bandwidth", 1).is_err());
    }

    #[test]
    fn test_plan_rejects_wrong_target_kind() {
        let fault = FaultSpec::NetworkLoss(NetworkFault::default());
        let err = fault
            .plan(TargetRef::instance("vm-1"), &ExperimentConfig::default())
            .unwrap_err();
        assert!(matches!(err, ChaosError::InvalidAction(_)));
    }

    #[test]
    fn test_disk_loss_plan() {
        let fault = FaultSpec::DiskLoss {
            disks: vec!["data-0".to_string(), "data-1".to_string()],
        };
        let plan = fault
            .plan(TargetRef::scale_set_member("pool_3"), &ExperimentConfig::default())
            .unwrap();

        assert_eq!(plan.inject.kind(), "disk-loss");
        assert_eq!(plan.inject.param(DISKS_PARAM), Some("data-0,data-1"));
        assert_eq!(plan.inject.timeout(), std::time::Duration::from_secs(60));
        assert!(plan.fault_active.matches(DISK_UNATTACHED));
        assert!(plan.fault_cleared.matches(DISK_ATTACHED));
    }

    #[test]
    fn test_invalid_loss_percentage() {
        let fault = FaultSpec::NetworkLoss(NetworkFault {
            loss_percentage: 0,
            ..NetworkFault::default()
        });
        assert!(fault.parameters(&ExperimentConfig::default()).is_err());
    }

    #[test]
    fn test_from_json_kinds() {
        let fault = FaultSpec::from_json(r#"{"kind": "cpu-hog", "cores": 2}"#).unwrap();
        assert_eq!(fault.kind(), "cpu-hog");

        let err = FaultSpec::from_json(r#"{"kind": "kernel-panic"}"#).unwrap_err();
        assert!(matches!(err, ChaosError::InvalidAction(_)));
    }
}
