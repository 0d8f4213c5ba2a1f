use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// Characters allowed in a cgroup device permission mask.
pub const PERMISSION_CHARS: &str = "rwm";

/// A host character device offered to pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// device node on the host, e.g. /dev/fuse
    pub path: PathBuf,
    /// cgroup permissions granted to the container, "rwm" or a subset
    #[serde(default = "default_permissions")]
    pub permissions: String,
}

fn default_permissions() -> String {
    PERMISSION_CHARS.to_string()
}

impl DeviceConfig {
    pub fn new(path: impl Into<PathBuf>, permissions: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            permissions: permissions.into(),
        }
    }

    /// Last path component, e.g. "fuse" for /dev/fuse.
    pub fn base_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Returns true when the mask is a non-empty subset of "rwm".
    pub fn has_valid_permissions(&self) -> bool {
        !self.permissions.is_empty()
            && self.permissions.len() <= PERMISSION_CHARS.len()
            && self.permissions.chars().all(|c| PERMISSION_CHARS.contains(c))
            && !has_repeated_chars(&self.permissions)
    }
}

fn has_repeated_chars(s: &str) -> bool {
    s.char_indices()
        .any(|(i, c)| s[i + c.len_utf8()..].contains(c))
}

/// The fixed set of devices this process can offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceTable(Vec<DeviceConfig>);

impl DeviceTable {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        Self(devices)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for DeviceTable {
    /// FUSE, Android shared memory and Android binder.
    fn default() -> Self {
        Self(vec![
            DeviceConfig::new("/dev/fuse", "rwm"),
            DeviceConfig::new("/dev/ashmem", "rwm"),
            DeviceConfig::new("/dev/binder", "rwm"),
        ])
    }
}

/// Parse a JSON device list, e.g. `[{"path":"/dev/fuse","permissions":"rw"}]`
pub(crate) fn parse_device_table(s: &str) -> Result<DeviceTable, String> {
    let table: DeviceTable =
        serde_json::from_str(s).map_err(|e| format!("Failed to parse device table JSON: {e}"))?;
    if table.is_empty() {
        return Err("Device table must contain at least one device".to_string());
    }
    Ok(table)
}
