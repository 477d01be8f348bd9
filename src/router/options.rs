//! Routing request options

use serde::Deserialize;

/// The routing-relevant fields of an open request
///
/// Unknown fields are ignored, so a whole `open` message can be
/// deserialized into this directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteOptions {
    pub host: Option<String>,
    pub user: Option<String>,
    /// `"private"` asks for a connection of its own
    pub session: Option<String>,
    pub channel: Option<String>,
    pub init_superuser: Option<String>,
    pub password: Option<String>,
}

impl RouteOptions {
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_superuser(mut self, superuser: impl Into<String>) -> Self {
        self.init_superuser = Some(superuser.into());
        self
    }

    /// Ask for a private session bound to `channel`
    pub fn private(mut self, channel: impl Into<String>) -> Self {
        self.session = Some("private".to_string());
        self.channel = Some(channel.into());
        self
    }

    pub fn is_private(&self) -> bool {
        self.session.as_deref() == Some("private")
    }
}
