//! Component catalog and reference designs.
//!
//! Blueprints are the templates the editor offers. A design instantiates a
//! blueprint under its own id and name.

use crate::scenarios::ScenarioId;
use archsim_core::{Component, ComponentKind, Connection, Topology, TrafficClass};

/// Every blueprint offered by the catalog.
pub fn blueprints() -> Vec<Component> {
    vec![
        Component::new("server-nano", "Nano Server", ComponentKind::Server)
            .with_max_qps(200.0)
            .with_costs(50.0, 0.05)
            .with_base_latency(100.0),
        Component::new("server-standard", "Standard Server", ComponentKind::Server)
            .with_max_qps(1_000.0)
            .with_costs(200.0, 0.20)
            .with_base_latency(50.0),
        Component::new("server-high-perf", "High-Perf Server", ComponentKind::Server)
            .with_max_qps(5_000.0)
            .with_costs(800.0, 0.70)
            .with_base_latency(20.0),
        Component::new("lb-simple", "Round-Robin LB", ComponentKind::LoadBalancer)
            .with_max_qps(20_000.0)
            .with_costs(150.0, 0.10),
        Component::new("asg-standard", "Auto Scaling Group", ComponentKind::AutoScalingGroup)
            .with_max_qps(1_000.0)
            .with_costs(300.0, 0.20)
            .with_autoscaling(0.7, 12, 5)
            .with_base_latency(50.0),
        Component::new("db-primary", "Primary Database", ComponentKind::Database)
            .with_max_qps(3_000.0)
            .with_costs(500.0, 0.40)
            .with_replication(2),
        Component::new("cache-redis", "Redis Cache", ComponentKind::Cache)
            .with_max_qps(20_000.0)
            .with_costs(250.0, 0.15),
        Component::new("queue-standard", "Message Queue", ComponentKind::Queue)
            .with_max_qps(10_000.0)
            .with_costs(200.0, 0.10),
        Component::new("gateway-edge", "Edge API Gateway", ComponentKind::Gateway)
            .with_max_qps(20_000.0)
            .with_costs(400.0, 0.25),
        Component::new("users", "Users", ComponentKind::TrafficSource),
    ]
}

/// Instantiates a blueprint under a design-local id and display name.
pub fn instantiate(blueprint_id: &str, id: &str, name: &str) -> Option<Component> {
    let mut comp = blueprints()
        .into_iter()
        .find(|b| b.id.as_str() == blueprint_id)?;
    comp.id = id.into();
    comp.name = name.to_string();
    Some(comp)
}

/// A design that meets the scenario's goal.
pub fn reference_topology(scenario: ScenarioId) -> Topology {
    let mut topo = Topology::new();
    let mut place = |blueprint: &str, id: &str, name: &str| {
        if let Some(comp) = instantiate(blueprint, id, name) {
            topo.add_component(comp);
        }
    };

    place("users", "users", "Users");
    match scenario {
        ScenarioId::TinyUrl | ScenarioId::FlashSale => {
            place("lb-simple", "lb", "Load Balancer");
            place("asg-standard", "app", "App Servers");
            place("cache-redis", "cache", "Cache");
            place("db-primary", "db", "Database");
        }
        ScenarioId::DdosSiege => {
            place("gateway-edge", "gateway", "API Gateway");
            place("lb-simple", "lb", "Load Balancer");
            place("asg-standard", "app", "App Servers");
        }
    }

    match scenario {
        ScenarioId::TinyUrl | ScenarioId::FlashSale => {
            topo.connect(Connection::new("users", "lb"));
            topo.connect(Connection::new("lb", "app"));
            topo.connect(Connection::new("app", "cache").carrying(TrafficClass::Read));
            topo.connect(Connection::new("cache", "db").carrying(TrafficClass::Read));
            topo.connect(Connection::new("app", "db").carrying(TrafficClass::Write));
        }
        ScenarioId::DdosSiege => {
            topo.connect(Connection::new("users", "gateway"));
            topo.connect(Connection::new("gateway", "lb"));
            topo.connect(Connection::new("lb", "app"));
        }
    }

    topo
}

/// The smallest possible design: one nano server behind the users.
pub fn minimal_topology() -> Topology {
    let mut topo = Topology::new();
    topo.components.extend(instantiate("users", "users", "Users"));
    topo.components.extend(instantiate("server-nano", "web", "Web Server"));
    topo.connect(Connection::new("users", "web"));
    topo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blueprint_ids_unique() {
        let all = blueprints();
        let ids: std::collections::BTreeSet<_> = all.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids.len(), all.len());
    }

    #[test]
    fn test_instantiate() {
        let lb = instantiate("lb-simple", "lb-1", "Front LB").unwrap();
        assert_eq!(lb.id.as_str(), "lb-1");
        assert_eq!(lb.name, "Front LB");
        assert_eq!(lb.kind, ComponentKind::LoadBalancer);
        assert_eq!(lb.properties.capacity(), 20_000.0);
        assert_eq!(lb.setup_cost, 150.0);

        assert!(instantiate("server-quantum", "x", "X").is_none());
    }

    #[test]
    fn test_reference_designs_are_well_formed() {
        for id in ScenarioId::all() {
            let topo = reference_topology(id);
            assert!(topo.structural_warnings().is_empty(), "{}", id);
            assert!(topo.component("users").is_some());
            assert!(topo.component("app").unwrap().properties.auto_scaling);
        }
    }
}
