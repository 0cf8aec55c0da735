use std::collections::{HashMap, HashSet};

use muxdedup_core::{Channel, Mux, Service};

/// Services referenced by at least one channel, plus the display names needed
/// to explain those references in reports. Built once per run.
#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    service_channels: HashMap<String, Vec<String>>,
    service_names: HashMap<String, String>,
}

impl MappingIndex {
    pub fn build(channels: &[Channel], services: &[Service]) -> Self {
        let mut service_channels: HashMap<String, Vec<String>> = HashMap::new();
        for channel in channels {
            let label = if channel.name.is_empty() {
                channel.uuid.clone()
            } else {
                channel.name.clone()
            };
            for service in &channel.services {
                let names = service_channels.entry(service.clone()).or_default();
                if !names.contains(&label) {
                    names.push(label.clone());
                }
            }
        }

        let service_names = services
            .iter()
            .map(|s| (s.uuid.clone(), s.svcname.clone()))
            .collect();

        Self {
            service_channels,
            service_names,
        }
    }

    pub fn is_mapped(&self, service_uuid: &str) -> bool {
        self.service_channels.contains_key(service_uuid)
    }

    /// Number of distinct services on `mux` that some channel presents. Zero
    /// means the mux can go without breaking any channel.
    pub fn mapping_count(&self, mux: &Mux) -> usize {
        mux.services
            .iter()
            .filter(|s| self.is_mapped(s))
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn channel_names(&self, service_uuid: &str) -> &[String] {
        self.service_channels
            .get(service_uuid)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Service display name, falling back to the uuid for unnamed or unknown services.
    pub fn service_name<'a>(&'a self, service_uuid: &'a str) -> &'a str {
        match self.service_names.get(service_uuid) {
            Some(name) if !name.is_empty() => name.as_str(),
            _ => service_uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mux;

    fn channel(name: &str, services: &[&str]) -> Channel {
        Channel {
            uuid: format!("ch-{name}"),
            name: name.to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn mapping_count_is_intersection_with_channel_services() {
        let index = MappingIndex::build(
            &[channel("One", &["s1", "s2"]), channel("Two", &["s2", "s9"])],
            &[],
        );
        let mut m = mux("m", "19.2E", "H", 10_714_000);
        m.services = vec!["s1".into(), "s3".into(), "s2".into(), "s1".into()];
        assert_eq!(index.mapping_count(&m), 2);

        m.services = vec!["s3".into()];
        assert_eq!(index.mapping_count(&m), 0);
        assert!(index.is_mapped("s9"));
    }

    #[test]
    fn names_resolve_for_reports() {
        let index = MappingIndex::build(
            &[channel("One", &["s1"]), channel("", &["s1"])],
            &[
                Service {
                    uuid: "s1".into(),
                    svcname: "Das Erste HD".into(),
                },
                Service {
                    uuid: "s2".into(),
                    svcname: String::new(),
                },
            ],
        );
        assert_eq!(index.channel_names("s1"), ["One".to_string(), "ch-".to_string()]);
        assert!(index.channel_names("s2").is_empty());
        assert_eq!(index.service_name("s1"), "Das Erste HD");
        assert_eq!(index.service_name("s2"), "s2");
        assert_eq!(index.service_name("nope"), "nope");
    }
}
