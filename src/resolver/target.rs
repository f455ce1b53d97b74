//! Dial target parsing.

use std::fmt;
use std::str::FromStr;

use crate::discovery::types::validate_service_name;
use crate::discovery::DiscoveryError;

/// A parsed dial target: `scheme://authority/service` or a bare `service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Option<String>,
    pub authority: String,
    pub endpoint: String,
}

impl FromStr for Target {
    type Err = DiscoveryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, authority, endpoint) = match raw.split_once("://") {
            Some((scheme, rest)) => {
                if scheme.is_empty() {
                    return Err(DiscoveryError::Configuration(format!(
                        "target '{}' has an empty scheme",
                        raw
                    )));
                }
                let (authority, path) = rest.split_once('/').unwrap_or(("", rest));
                (Some(scheme.to_string()), authority.to_string(), path)
            }
            None => (None, String::new(), raw),
        };

        let endpoint = endpoint.trim_start_matches('/').to_string();
        validate_service_name(&endpoint)
            .map_err(|e| DiscoveryError::Configuration(format!("target '{}': {}", raw, e)))?;

        Ok(Self {
            scheme,
            authority,
            endpoint,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scheme {
            Some(scheme) => write!(f, "{}://{}/{}", scheme, self.authority, self.endpoint),
            None => f.write_str(&self.endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let t: Target = "discovery:///orders".parse().unwrap();
        assert_eq!(t.scheme.as_deref(), Some("discovery"));
        assert_eq!(t.authority, "");
        assert_eq!(t.endpoint, "orders");

        let t: Target = "discovery://cluster-a/payments".parse().unwrap();
        assert_eq!(t.authority, "cluster-a");
        assert_eq!(t.endpoint, "payments");

        let t: Target = "orders".parse().unwrap();
        assert_eq!(t.scheme, None);
        assert_eq!(t.to_string(), "orders");
    }

    #[test]
    fn test_rejects_empty_endpoint() {
        assert!("discovery:///".parse::<Target>().is_err());
        assert!("://orders".parse::<Target>().is_err());
        assert!("discovery:///a/b".parse::<Target>().is_err());
    }
}
