use crate::FrameError;
use serde::Deserialize;

/// Portal credentials for a single client session.
///
/// Field names double as the keys of the standalone accounts file.
#[derive(Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub wlan_user_ip: String,
    pub wlan_user_mac: String,
    pub wlan_ac_ip: String,
    pub wlan_ac_name: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("wlan_user_ip", &self.wlan_user_ip)
            .field("wlan_user_mac", &self.wlan_user_mac)
            .field("wlan_ac_ip", &self.wlan_ac_ip)
            .field("wlan_ac_name", &self.wlan_ac_name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Login,
    Logout,
    /// Logout followed by login.
    All,
    Unknown(String),
}

impl CommandKind {
    fn from_wire(value: &str) -> Self {
        match value {
            "login" => Self::Login,
            "logout" => Self::Logout,
            "all" => Self::All,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub kind: CommandKind,
    pub credential: Credential,
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCommand {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    net_account: String,
    #[serde(default)]
    net_password: String,
    #[serde(default)]
    wlan_user_ip: String,
    #[serde(default)]
    wlan_user_mac: String,
    #[serde(default)]
    wlan_ac_ip: String,
    #[serde(default)]
    wlan_ac_name: String,
    #[serde(default)]
    email: String,
}

/// Parses one inbound control frame.
///
/// Missing fields default to empty strings and an unrecognised `type`
/// becomes [`CommandKind::Unknown`]. Only text that is not a JSON object
/// is an error.
pub fn parse_command(text: &str) -> Result<CommandEnvelope, FrameError> {
    let wire: WireCommand = serde_json::from_str(text)?;
    Ok(CommandEnvelope {
        kind: CommandKind::from_wire(wire.kind.trim()),
        credential: Credential {
            username: wire.net_account,
            password: wire.net_password,
            wlan_user_ip: wire.wlan_user_ip,
            wlan_user_mac: wire.wlan_user_mac,
            wlan_ac_ip: wire.wlan_ac_ip,
            wlan_ac_name: wire.wlan_ac_name,
        },
        email: wire.email,
    })
}
