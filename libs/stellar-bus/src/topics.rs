//! Topic and status key naming
//!
//! Every name is prefixed with the scope so several scopes can share one bus.

use common::Scope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicKeys {
    scope: Scope,
}

impl TopicKeys {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    // ========== Packet topics ==========

    /// `telemetry-raw`: buffers as read from an interface
    pub fn telemetry_raw(&self, target: &str, packet: &str) -> String {
        format!("{}__TELEMETRY__{}__{}", self.scope, target, packet)
    }

    /// `telemetry-decoded`: decom JSON per packet
    pub fn telemetry_decoded(&self, target: &str, packet: &str) -> String {
        format!("{}__DECOM__{}__{}", self.scope, target, packet)
    }

    /// `command-raw`: command buffers as written to an interface
    pub fn command_raw(&self, target: &str, packet: &str) -> String {
        format!("{}__COMMAND__{}__{}", self.scope, target, packet)
    }

    /// `command-decoded`: decom JSON of sent commands
    pub fn command_decoded(&self, target: &str, packet: &str) -> String {
        format!("{}__DECOMCMD__{}__{}", self.scope, target, packet)
    }

    // ========== Event topics ==========

    /// `limits-events`
    pub fn limits_events(&self) -> String {
        format!("{}__stellar_limits_events", self.scope)
    }

    /// `trigger-events` for one trigger group
    pub fn trigger_events(&self, group: &str) -> String {
        format!("{}__stellar_trigger_events__{}", self.scope, group)
    }

    /// `reaction-events`
    pub fn reaction_events(&self) -> String {
        format!("{}__stellar_reaction_events", self.scope)
    }

    // ========== Side channels ==========

    /// Directives addressed to an interface's command handler
    pub fn interface_cmd(&self, interface: &str) -> String {
        format!("{}__CMD__INTERFACE__{}", self.scope, interface)
    }

    /// Responses from an interface's command handler
    pub fn interface_ack(&self, interface: &str) -> String {
        format!("{}__ACKCMD__INTERFACE__{}", self.scope, interface)
    }

    /// Directives addressed to a router's telemetry handler
    pub fn router_cmd(&self, router: &str) -> String {
        format!("{}__CMD__ROUTER__{}", self.scope, router)
    }

    pub fn router_ack(&self, router: &str) -> String {
        format!("{}__ACKCMD__ROUTER__{}", self.scope, router)
    }

    // ========== Status store keys ==========

    /// Hash of interface status records keyed by interface name
    pub fn interface_status(&self) -> String {
        format!("{}__interface_status", self.scope)
    }

    pub fn router_status(&self) -> String {
        format!("{}__router_status", self.scope)
    }

    /// Hash of rule engine status records keyed by group name
    pub fn rules_status(&self) -> String {
        format!("{}__rules_status", self.scope)
    }
}

impl Default for TopicKeys {
    fn default() -> Self {
        Self::new(Scope::default())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_packet_topics() {
        let keys = TopicKeys::default();
        assert_eq!(
            keys.telemetry_raw("INST", "HEALTH_STATUS"),
            "DEFAULT__TELEMETRY__INST__HEALTH_STATUS"
        );
        assert_eq!(
            keys.telemetry_decoded("INST", "HEALTH_STATUS"),
            "DEFAULT__DECOM__INST__HEALTH_STATUS"
        );
        assert_eq!(keys.command_raw("INST", "ABORT"), "DEFAULT__COMMAND__INST__ABORT");
        assert_eq!(keys.command_decoded("INST", "ABORT"), "DEFAULT__DECOMCMD__INST__ABORT");
    }

    #[test]
    fn test_scope_prefix() {
        let keys = TopicKeys::new(Scope::new("ops").unwrap());
        assert_eq!(keys.limits_events(), "OPS__stellar_limits_events");
        assert_eq!(keys.trigger_events("GROUP1"), "OPS__stellar_trigger_events__GROUP1");
        assert_eq!(keys.interface_cmd("INST_INT"), "OPS__CMD__INTERFACE__INST_INT");
        assert_eq!(keys.interface_status(), "OPS__interface_status");
    }
}
