use std::fmt;

/// Identifies one synced shadow: a thing name plus a shadow name.
///
/// `shadow_name = ""` denotes the classic shadow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ShadowKey {
    pub thing_name: String,
    pub shadow_name: String,
}

impl ShadowKey {
    pub fn new<T: Into<String>, S: Into<String>>(thing_name: T, shadow_name: S) -> Self {
        ShadowKey {
            thing_name: thing_name.into(),
            shadow_name: shadow_name.into(),
        }
    }

    pub fn classic<T: Into<String>>(thing_name: T) -> Self {
        ShadowKey::new(thing_name, "")
    }

    pub fn is_classic(&self) -> bool {
        self.shadow_name.is_empty()
    }
}

impl fmt::Display for ShadowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shadow_name.is_empty() {
            write!(f, "{}", self.thing_name)
        } else {
            write!(f, "{}/{}", self.thing_name, self.shadow_name)
        }
    }
}

/// Policy flag restricting which side's mutations propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    BetweenDeviceAndCloud,
    DeviceToCloud,
    CloudToDevice,
}

impl Direction {
    pub fn allows_cloud_update(self) -> bool {
        !matches!(self, Direction::CloudToDevice)
    }

    pub fn allows_local_update(self) -> bool {
        !matches!(self, Direction::DeviceToCloud)
    }

    pub fn allows_cloud_delete(self) -> bool {
        self.allows_cloud_update()
    }

    pub fn allows_local_delete(self) -> bool {
        self.allows_local_update()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_key_displays_without_slash() {
        let key = ShadowKey::classic("widget-1");
        assert!(key.is_classic());
        assert_eq!(key.to_string(), "widget-1");
    }

    #[test]
    fn named_key_displays_with_slash() {
        let key = ShadowKey::new("widget-1", "config");
        assert!(!key.is_classic());
        assert_eq!(key.to_string(), "widget-1/config");
    }

    #[test]
    fn direction_gates_match_spec_matrix() {
        assert!(Direction::BetweenDeviceAndCloud.allows_cloud_update());
        assert!(Direction::BetweenDeviceAndCloud.allows_local_update());

        assert!(Direction::DeviceToCloud.allows_cloud_update());
        assert!(!Direction::DeviceToCloud.allows_local_update());

        assert!(!Direction::CloudToDevice.allows_cloud_update());
        assert!(Direction::CloudToDevice.allows_local_update());
    }
}
