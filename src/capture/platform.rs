//! Device identifier resolution

/// Prefix selecting a built-in synthetic device
pub const TEST_SCHEME: &str = "test://";

/// What a configured device identifier refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    /// Built-in moving colour bars
    TestPattern,

    /// V4L2 device node
    V4l2(String),
}

/// Resolves a configured device identifier.
///
/// A bare index selects `/dev/videoN`, anything else is taken as a path.
pub fn resolve_device(device: &str) -> Result<DeviceSpec, String> {
    let device = device.trim();

    if let Some(name) = device.strip_prefix(TEST_SCHEME) {
        return match name {
            "pattern" => Ok(DeviceSpec::TestPattern),
            other => Err(format!("unknown test device '{}'", other)),
        };
    }

    if let Ok(index) = device.parse::<u32>() {
        return Ok(DeviceSpec::V4l2(default_device_path(index)));
    }

    Ok(DeviceSpec::V4l2(device.to_string()))
}

/// Gets the device node for a camera index
pub fn default_device_path(camera_index: u32) -> String {
    format!("/dev/video{}", camera_index)
}
