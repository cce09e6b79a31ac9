//! The three affiliated group brands and their service endpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HakoError;

/// Slugs accepted by [`Group::from_str`], in declaration order.
pub const VALID_GROUPS: [&str; 3] = ["hinatazaka46", "nogizaka46", "sakurazaka46"];

/// A target Sakamichi group brand. Each brand runs its own instance of the
/// talk service under a dedicated domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Hinatazaka46,
    Nogizaka46,
    Sakurazaka46,
}

/// Static per-group service endpoints and headers.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Versioned API root, e.g. `https://api.message.hinatazaka46.com/v2`.
    pub api_base: &'static str,
    /// Default `x-talk-app-id` header value.
    pub app_id: &'static str,
    /// Web login origin the session acquirer navigates to.
    pub auth_url: &'static str,
    /// Human-readable brand name, used for output directory naming.
    pub display_name: &'static str,
}

const HINATAZAKA46: GroupConfig = GroupConfig {
    api_base: "https://api.message.hinatazaka46.com/v2",
    app_id: "jp.co.sonymusic.communication.keyakizaka 2.5",
    auth_url: "https://message.hinatazaka46.com/",
    display_name: "日向坂46",
};

const NOGIZAKA46: GroupConfig = GroupConfig {
    api_base: "https://api.message.nogizaka46.com/v2",
    app_id: "jp.co.sonymusic.communication.nogizaka 2.5",
    auth_url: "https://message.nogizaka46.com/",
    display_name: "乃木坂46",
};

const SAKURAZAKA46: GroupConfig = GroupConfig {
    api_base: "https://api.message.sakurazaka46.com/v2",
    app_id: "jp.co.sonymusic.communication.sakurazaka 2.5",
    auth_url: "https://message.sakurazaka46.com/",
    display_name: "櫻坂46",
};

impl Group {
    pub fn config(&self) -> &'static GroupConfig {
        match self {
            Group::Hinatazaka46 => &HINATAZAKA46,
            Group::Nogizaka46 => &NOGIZAKA46,
            Group::Sakurazaka46 => &SAKURAZAKA46,
        }
    }

    /// The lowercase slug, used as the storage key and CLI name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Hinatazaka46 => "hinatazaka46",
            Group::Nogizaka46 => "nogizaka46",
            Group::Sakurazaka46 => "sakurazaka46",
        }
    }

    /// Host segment of the API base, e.g. `api.message.hinatazaka46.com`.
    /// Requests to this host are what the login observer watches for.
    pub fn api_host(&self) -> &'static str {
        let base = self.config().api_base;
        let without_scheme = base.trim_start_matches("https://");
        match without_scheme.find('/') {
            Some(idx) => &without_scheme[..idx],
            None => without_scheme,
        }
    }

    /// Host of the web login origin, e.g. `message.hinatazaka46.com`.
    /// Cookies are filtered against this domain when a bundle is captured.
    pub fn service_domain(&self) -> &'static str {
        let url = self.config().auth_url;
        let without_scheme = url.trim_start_matches("https://");
        without_scheme.trim_end_matches('/')
    }
}

impl FromStr for Group {
    type Err = HakoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hinatazaka46" => Ok(Group::Hinatazaka46),
            "nogizaka46" => Ok(Group::Nogizaka46),
            "sakurazaka46" => Ok(Group::Sakurazaka46),
            _ => Err(HakoError::InvalidGroup(s.to_string())),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every group's API base contains its own domain segment.
    #[test]
    fn test_api_base_contains_group_domain() {
        for slug in VALID_GROUPS {
            let group: Group = slug.parse().unwrap();
            let domain = slug; // slug doubles as the domain segment
            assert!(
                group.config().api_base.contains(domain),
                "api_base for {} should contain '{}'",
                slug,
                domain
            );
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let group: Group = "Nogizaka46".parse().unwrap();
        assert_eq!(group, Group::Nogizaka46);
    }

    /// An invalid group string always raises the configuration error.
    #[test]
    fn test_invalid_group_is_config_error() {
        let err = "keyakizaka46".parse::<Group>().unwrap_err();
        match err {
            HakoError::InvalidGroup(given) => assert_eq!(given, "keyakizaka46"),
            other => panic!("expected InvalidGroup, got {:?}", other),
        }
        // The message enumerates the valid set so users can self-correct.
        let msg = "keyakizaka46".parse::<Group>().unwrap_err().to_string();
        for slug in VALID_GROUPS {
            assert!(msg.contains(slug));
        }
    }

    #[test]
    fn test_host_helpers() {
        let group = Group::Sakurazaka46;
        assert_eq!(group.api_host(), "api.message.sakurazaka46.com");
        assert_eq!(group.service_domain(), "message.sakurazaka46.com");
    }
}
