//! Wire-format DTOs shared between the control plane and node agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Proxy/load-balancer engine managed on a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Xray proxy core.
    Xray,
    /// Sing-box proxy core.
    Singbox,
    /// Nginx reverse proxy.
    Nginx,
    /// WireGuard tunnel.
    Wireguard,
    /// HAProxy load balancer.
    Haproxy,
}

impl ServiceType {
    /// Canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Xray => "xray",
            ServiceType::Singbox => "singbox",
            ServiceType::Nginx => "nginx",
            ServiceType::Wireguard => "wireguard",
            ServiceType::Haproxy => "haproxy",
        }
    }
}

/// Transport protocol a service listens on.
///
/// `Both` occupies the tcp and udp slots of a port at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP only.
    Tcp,
    /// UDP only.
    Udp,
    /// TCP and UDP.
    Both,
}

impl Protocol {
    /// Canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Both => "both",
        }
    }

    /// Whether two protocols contend for the same port.
    pub fn overlaps(&self, other: Protocol) -> bool {
        matches!(self, Protocol::Both) || matches!(other, Protocol::Both) || *self == other
    }
}

/// Lifecycle status of a managed node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node is healthy and reporting.
    Active,
    /// Node stopped reporting or was parked by an operator.
    Inactive,
    /// Node is under planned maintenance.
    Maintenance,
    /// Node or its agent reported an error.
    Error,
}

/// Runtime status of a service instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service is up.
    Running,
    /// Service is down. Initial state on create.
    Stopped,
    /// Service failed.
    Error,
    /// Service is coming up.
    Starting,
    /// Service is shutting down.
    Stopping,
}

/// Overall agent health reported in a heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    /// Everything nominal.
    Healthy,
    /// Running with warnings.
    Degraded,
    /// Agent-level failure.
    Error,
}

/// Connection state of the agent as tracked by the control plane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentConnectionStatus {
    /// Agent heartbeats are current.
    Connected,
    /// Agent missed its heartbeat window.
    Disconnected,
    /// Agent reported an error.
    Error,
}

/// Action the control plane asks an agent to perform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Restart a service instance.
    RestartService,
    /// Start a service instance.
    StartService,
    /// Stop a service instance.
    StopService,
    /// Re-apply the service configuration.
    UpdateConfig,
}

/// Delivery state of a pending command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    /// Queued, not yet handed to the agent.
    Pending,
    /// Included in exactly one heartbeat response.
    Delivered,
    /// Agent confirmed successful execution.
    Acked,
    /// Agent reported failure.
    Failed,
    /// Timed out or cancelled by a cascade.
    Expired,
}

/// Operating system snapshot reported by an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct OsInfo {
    /// OS name, e.g. "debian".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// OS release version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// CPU architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Kernel release string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
}

/// Agent bookkeeping stored on the node record.
///
/// Written exclusively by the agent heartbeat path and the liveness
/// sweeper; admin node updates never touch it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AgentInfo {
    /// Agent build version.
    pub version: String,
    /// Connection state.
    pub status: AgentConnectionStatus,
    /// Last time the agent contacted the control plane.
    pub last_contact: DateTime<Utc>,
    /// Token the agent authenticated with.
    pub token_id: Uuid,
}

/// Point-in-time resource metrics for one service instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ServiceMetrics {
    /// CPU usage in percent of one core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    /// Resident memory in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    /// Open connection count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<u64>,
    /// Cumulative received bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_bytes: Option<u64>,
    /// Cumulative transmitted bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_bytes: Option<u64>,
    /// When the sample was collected on the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<DateTime<Utc>>,
}

/// Per-service status embedded in a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatusUpdate {
    /// Target service instance.
    pub service_id: Uuid,
    /// Observed runtime status.
    pub status: ServiceStatus,
    /// Latest metrics snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ServiceMetrics>,
    /// Free-form status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Heartbeat sent by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    /// Overall agent health.
    pub status: AgentHealth,
    /// Agent build version.
    pub version: String,
    /// Agent process uptime in seconds.
    #[serde(default)]
    pub uptime_secs: u64,
    /// Optional OS snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_info: Option<OsInfo>,
    /// Service statuses observed since the last heartbeat.
    #[serde(default)]
    pub services: Vec<ServiceStatusUpdate>,
    /// Agent-side clock at send time, used for skew analysis only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Command handed to an agent inside a heartbeat response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandPayload {
    /// Command identifier, echoed back in status reports.
    pub command_id: Uuid,
    /// Action to perform.
    pub command_type: CommandType,
    /// Target service, when the action is service-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<Uuid>,
    /// Opaque action parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Seconds the agent may spend before giving up.
    pub timeout_seconds: u32,
    /// When the command was enqueued.
    pub created_at: DateTime<Utc>,
}

/// Heartbeat acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatResponse {
    /// Always "acknowledged" on success.
    pub status: String,
    /// Commands popped for this agent; each appears in exactly one
    /// heartbeat response.
    pub commands: Vec<CommandPayload>,
    /// Server clock at response time.
    pub timestamp: DateTime<Utc>,
}

/// One entry of the configurations response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ServiceConfigurationEntry {
    /// A rendered, versioned configuration bundle.
    Bundle(ServiceConfiguration),
    /// The service's stored config failed renderer validation.
    Invalid(ServiceConfigurationError),
}

/// Rendered configuration bundle for one service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceConfiguration {
    /// Owning service instance.
    pub service_id: Uuid,
    /// Engine the document targets.
    pub service_type: ServiceType,
    /// Canonical engine-native document.
    pub configuration: Value,
    /// Monotonic per-service version.
    pub version: i64,
    /// Hex SHA-256 of the canonical document.
    pub checksum: String,
    /// When the bundle was last (re)rendered.
    pub updated_at: DateTime<Utc>,
}

/// Error entry returned when a stored config no longer renders.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceConfigurationError {
    /// Owning service instance.
    pub service_id: Uuid,
    /// Human-readable validation failure.
    pub error: String,
}

/// Result of a command execution, attached to a status report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandResult {
    /// Command being acknowledged.
    pub command_id: Uuid,
    /// Whether the agent executed it successfully.
    pub success: bool,
    /// Failure detail when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One service status report submitted by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatusReport {
    /// Target service instance.
    pub service_id: Uuid,
    /// Observed runtime status.
    pub status: ServiceStatus,
    /// Latest metrics snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ServiceMetrics>,
    /// Free-form status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Outcome of a previously delivered command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_result: Option<CommandResult>,
}

/// Batch of status reports.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusReportsRequest {
    /// Individual reports, processed best-effort.
    pub reports: Vec<ServiceStatusReport>,
}

/// Aggregate outcome of a status-report batch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusReportsResponse {
    /// Reports applied to owned services.
    pub processed: usize,
    /// Reports skipped (not owned, unknown service, or store failure).
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_overlap_treats_both_as_tcp_and_udp() {
        assert!(Protocol::Both.overlaps(Protocol::Tcp));
        assert!(Protocol::Both.overlaps(Protocol::Udp));
        assert!(Protocol::Tcp.overlaps(Protocol::Both));
        assert!(Protocol::Tcp.overlaps(Protocol::Tcp));
        assert!(!Protocol::Tcp.overlaps(Protocol::Udp));
    }

    #[test]
    fn service_type_round_trips_lowercase() {
        let parsed: ServiceType = serde_json::from_str("\"singbox\"").unwrap();
        assert_eq!(parsed, ServiceType::Singbox);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"singbox\"");
        assert_eq!(parsed.as_str(), "singbox");
    }

    #[test]
    fn configuration_entry_serializes_untagged() {
        let entry = ServiceConfigurationEntry::Invalid(ServiceConfigurationError {
            service_id: Uuid::nil(),
            error: "missing inbounds".into(),
        });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["error"], "missing inbounds");
        assert!(value.get("configuration").is_none());
    }
}
