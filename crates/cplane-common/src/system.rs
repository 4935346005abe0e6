//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Shared types, domain events, and configuration."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Closed set of managed external systems.
///
/// Connectors and fault injectors are wired per variant at construction time;
/// no component discovers systems by name at runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SystemType {
    /// Relational database dependency.
    Mysql,
    /// Cache dependency.
    Redis,
    /// Messaging backbone dependency.
    Kafka,
}

impl SystemType {
    /// All managed systems, in a stable iteration order.
    pub const ALL: [SystemType; 3] = [SystemType::Mysql, SystemType::Redis, SystemType::Kafka];

    /// Name of the fault-proxy instance fronting this system.
    pub fn proxy_name(&self) -> &'static str {
        match self {
            SystemType::Mysql => "mysql-proxy",
            SystemType::Redis => "redis-proxy",
            SystemType::Kafka => "kafka-proxy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_through_lowercase_names() {
        for system in SystemType::ALL {
            let rendered = system.to_string();
            assert_eq!(rendered, rendered.to_lowercase());
            assert_eq!(SystemType::from_str(&rendered).unwrap(), system);
        }
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&SystemType::Mysql).unwrap();
        assert_eq!(json, "\"mysql\"");
        let back: SystemType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SystemType::Mysql);
    }
}
