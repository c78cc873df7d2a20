use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct GatewayMetrics {
    pub messages_received: IntCounter,
    pub messages_dropped: IntCounter,
    pub lines_emitted: IntCounter,
    pub directives_relayed: IntCounter,
    pub directives_failed: IntCounter,
    pub connections: IntCounter,
    pub devices_known: IntGauge,
    pub states_known: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub gateway: GatewayMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let gateway = GatewayMetrics {
            messages_received: IntCounter::new(
                "sampler_messages_received",
                "Telemetry messages received",
            )?,
            messages_dropped: IntCounter::new(
                "sampler_messages_dropped",
                "Telemetry messages that produced no output line",
            )?,
            lines_emitted: IntCounter::new("sampler_lines_emitted", "Output lines written")?,
            directives_relayed: IntCounter::new(
                "sampler_directives_relayed",
                "Monitor directives acknowledged by the control plane",
            )?,
            directives_failed: IntCounter::new(
                "sampler_directives_failed",
                "Monitor directives that could not be delivered",
            )?,
            connections: IntCounter::new(
                "sampler_connections",
                "Control-plane sessions established",
            )?,
            devices_known: IntGauge::new("sampler_devices_known", "Entries in the device registry")?,
            states_known: IntGauge::new("sampler_states_known", "Entries in the state registry")?,
        };
        registry.register(Box::new(gateway.messages_received.clone()))?;
        registry.register(Box::new(gateway.messages_dropped.clone()))?;
        registry.register(Box::new(gateway.lines_emitted.clone()))?;
        registry.register(Box::new(gateway.directives_relayed.clone()))?;
        registry.register(Box::new(gateway.directives_failed.clone()))?;
        registry.register(Box::new(gateway.connections.clone()))?;
        registry.register(Box::new(gateway.devices_known.clone()))?;
        registry.register(Box::new(gateway.states_known.clone()))?;
        Ok(Self { registry, gateway })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() -> anyhow::Result<()> {
        let hub = MetricsHub::new()?;
        hub.gateway.lines_emitted.inc_by(3);
        hub.gateway.devices_known.set(2);
        let text = hub.encode_text();
        assert!(text.contains("sampler_lines_emitted 3"));
        assert!(text.contains("sampler_devices_known 2"));
        Ok(())
    }
}
