use ipnet::IpNet;
use std::net::IpAddr;

/// Networks whose client addresses remote commands may act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub allow: Vec<IpNet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Policy {
    pub fn from_config(allow: &[String]) -> Result<Self, String> {
        if allow.is_empty() {
            return Err("policy.allow must not be empty".to_string());
        }
        let allow = allow
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .map_err(|e| format!("invalid cidr {}: {}", cidr, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { allow })
    }

    pub fn evaluate(&self, wlan_user_ip: &str) -> Decision {
        let ip = match wlan_user_ip.trim().parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(e) => {
                return Decision::Deny {
                    reason: format!("invalid client ip {:?}: {}", wlan_user_ip, e),
                }
            }
        };
        if self.allow.iter().any(|net| net.contains(&ip)) {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!("client ip {} not allowed", ip),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(nets: &[&str]) -> Policy {
        let nets: Vec<String> = nets.iter().map(|n| n.to_string()).collect();
        Policy::from_config(&nets).expect("policy")
    }

    #[test]
    fn policy_allows_address_inside_network() {
        let policy = policy(&["10.0.0.0/24", "172.16.0.0/12"]);
        assert_eq!(policy.evaluate("10.0.0.5"), Decision::Allow);
        assert_eq!(policy.evaluate("172.20.1.1"), Decision::Allow);
    }

    #[test]
    fn policy_denies_outside_networks() {
        let policy = policy(&["10.0.0.0/24"]);
        match policy.evaluate("10.0.1.5") {
            Decision::Deny { reason } => assert!(reason.contains("not allowed")),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn policy_denies_unparseable_address() {
        let policy = policy(&["10.0.0.0/24"]);
        assert!(matches!(policy.evaluate(""), Decision::Deny { .. }));
        assert!(matches!(policy.evaluate("10.0.0"), Decision::Deny { .. }));
    }

    #[test]
    fn policy_rejects_bad_config() {
        assert!(Policy::from_config(&[]).unwrap_err().contains("empty"));
        let err = Policy::from_config(&["10.0.0.0/33".to_string()]).unwrap_err();
        assert!(err.contains("invalid cidr"));
    }
}
